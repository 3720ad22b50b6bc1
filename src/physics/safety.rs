//! Driver-assistance filters.
//!
//! Brake and throttle requests pass through ABS, ESP, ACC and ODS in that
//! order before the dynamics step; the speed limiter runs on the integrated
//! velocity afterwards. Every filter is a passthrough while its flag is off.

use std::fmt;

use crate::config::SimConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SafetySystem {
    /// Anti-lock braking.
    Abs,
    /// Electronic stability program.
    Esp,
    /// Adaptive cruise control.
    Acc,
    /// Obstacle detection.
    Ods,
    /// Speed limiter.
    Spd,
}

impl SafetySystem {
    pub const ALL: [SafetySystem; 5] = [
        SafetySystem::Abs,
        SafetySystem::Esp,
        SafetySystem::Acc,
        SafetySystem::Ods,
        SafetySystem::Spd,
    ];
}

impl fmt::Display for SafetySystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SafetySystem::Abs => "ABS",
            SafetySystem::Esp => "ESP",
            SafetySystem::Acc => "ACC",
            SafetySystem::Ods => "ODS",
            SafetySystem::Spd => "SPD",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SafetyFlags {
    pub abs: bool,
    pub esp: bool,
    pub acc: bool,
    pub ods: bool,
    pub spd: bool,
}

impl SafetyFlags {
    pub fn get(&self, system: SafetySystem) -> bool {
        match system {
            SafetySystem::Abs => self.abs,
            SafetySystem::Esp => self.esp,
            SafetySystem::Acc => self.acc,
            SafetySystem::Ods => self.ods,
            SafetySystem::Spd => self.spd,
        }
    }

    fn slot(&mut self, system: SafetySystem) -> &mut bool {
        match system {
            SafetySystem::Abs => &mut self.abs,
            SafetySystem::Esp => &mut self.esp,
            SafetySystem::Acc => &mut self.acc,
            SafetySystem::Ods => &mut self.ods,
            SafetySystem::Spd => &mut self.spd,
        }
    }

    /// Flips one flag and returns its new state.
    pub fn toggle(&mut self, system: SafetySystem) -> bool {
        let slot = self.slot(system);
        *slot = !*slot;
        info!("{} {}", system, if *slot { "enabled" } else { "disabled" });
        *slot
    }
}

/// Driver requests after ABS, ESP, ACC and ODS.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilteredPedals {
    pub throttle: f32,
    pub brake: f32,
}

/// The five filters with their tuning. `flags` is the only mutable part.
#[derive(Debug, Clone, Copy)]
pub struct SafetyPipeline {
    pub flags: SafetyFlags,
    abs_max_brake: f32,
    esp_threshold_deg: f32,
    esp_power_reduction: f32,
    acc_target_speed: f32,
    acc_step: f32,
    ods_power_reduction: f32,
    spd_max_speed: f32,
}

impl SafetyPipeline {
    pub fn new(config: &SimConfig) -> SafetyPipeline {
        SafetyPipeline {
            flags: SafetyFlags::default(),
            abs_max_brake: config.abs_max_brake,
            esp_threshold_deg: config.esp_threshold_deg,
            esp_power_reduction: config.esp_power_reduction,
            acc_target_speed: config.acc_target_speed,
            acc_step: config.acc_step,
            ods_power_reduction: config.ods_power_reduction,
            spd_max_speed: config.spd_max_speed,
        }
    }

    pub fn apply_abs(&self, brake: f32) -> f32 {
        if self.flags.abs {
            brake.min(self.abs_max_brake)
        } else {
            brake
        }
    }

    pub fn apply_esp(&self, throttle: f32, steering_angle: f32) -> f32 {
        if self.flags.esp && steering_angle.abs() > self.esp_threshold_deg {
            throttle * self.esp_power_reduction
        } else {
            throttle
        }
    }

    /// Fixed-step cruise controller: one `acc_step` per tick towards the
    /// target, however far away it is.
    pub fn apply_acc(&self, throttle: f32, current_speed: f32) -> f32 {
        if !self.flags.acc {
            return throttle;
        }
        if current_speed < self.acc_target_speed {
            (throttle + self.acc_step).min(1.0)
        } else if current_speed > self.acc_target_speed {
            (throttle - self.acc_step).max(0.0)
        } else {
            throttle
        }
    }

    pub fn apply_ods(&self, throttle: f32) -> f32 {
        if self.flags.ods {
            throttle * self.ods_power_reduction
        } else {
            throttle
        }
    }

    /// Runs after integration, on signed velocity.
    pub fn apply_speed_limiter(&self, velocity: f32) -> f32 {
        if self.flags.spd {
            velocity.clamp(-self.spd_max_speed, self.spd_max_speed)
        } else {
            velocity
        }
    }

    /// ABS, ESP, ACC and ODS in order. `speed` is the unsigned road speed.
    pub fn filter_pedals(&self, throttle: f32, brake: f32, steering_angle: f32, speed: f32) -> FilteredPedals {
        let brake = self.apply_abs(brake);
        let throttle = self.apply_esp(throttle, steering_angle);
        let throttle = self.apply_acc(throttle, speed);
        let throttle = self.apply_ods(throttle);
        FilteredPedals {
            throttle: throttle.clamp(0.0, 1.0),
            brake: brake.clamp(0.0, 1.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline(enabled: &[SafetySystem]) -> SafetyPipeline {
        let mut pipeline = SafetyPipeline::new(&SimConfig::default());
        for system in enabled {
            pipeline.flags.toggle(*system);
        }
        pipeline
    }

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn abs_caps_brake_only_when_enabled() {
        assert_eq!(pipeline(&[SafetySystem::Abs]).apply_abs(1.0), 0.6);
        assert_eq!(pipeline(&[SafetySystem::Abs]).apply_abs(0.3), 0.3);
        assert_eq!(pipeline(&[]).apply_abs(1.0), 1.0);
    }

    #[test]
    fn esp_cuts_throttle_past_threshold() {
        let esp = pipeline(&[SafetySystem::Esp]);
        assert!(close(esp.apply_esp(0.8, 45.0), 0.4));
        assert!(close(esp.apply_esp(0.8, -45.0), 0.4));
        assert_eq!(esp.apply_esp(0.8, 10.0), 0.8);
        assert_eq!(pipeline(&[]).apply_esp(0.8, 45.0), 0.8);
    }

    #[test]
    fn acc_steps_by_a_constant() {
        let acc = pipeline(&[SafetySystem::Acc]);
        assert!(close(acc.apply_acc(0.5, 50.0), 0.52));
        assert!(close(acc.apply_acc(0.5, 0.0), 0.52));
        assert_eq!(acc.apply_acc(0.99, 50.0), 1.0);
        assert!(close(acc.apply_acc(0.5, 70.0), 0.48));
        assert_eq!(acc.apply_acc(0.01, 70.0), 0.0);
        assert_eq!(acc.apply_acc(0.5, 60.0), 0.5);
        assert_eq!(pipeline(&[]).apply_acc(0.5, 50.0), 0.5);
    }

    #[test]
    fn ods_scales_unconditionally() {
        assert!(close(pipeline(&[SafetySystem::Ods]).apply_ods(1.0), 0.3));
        assert_eq!(pipeline(&[]).apply_ods(1.0), 1.0);
    }

    #[test]
    fn limiter_clamps_both_directions() {
        let spd = pipeline(&[SafetySystem::Spd]);
        assert_eq!(spd.apply_speed_limiter(150.0), 120.0);
        assert_eq!(spd.apply_speed_limiter(-150.0), -120.0);
        assert_eq!(spd.apply_speed_limiter(80.0), 80.0);
        assert_eq!(pipeline(&[]).apply_speed_limiter(150.0), 150.0);
    }

    #[test]
    fn filters_compose_in_order() {
        // ESP halves 0.8 to 0.4, ACC adds 0.02, ODS scales by 0.3.
        let all = pipeline(&[SafetySystem::Abs, SafetySystem::Esp, SafetySystem::Acc, SafetySystem::Ods]);
        let out = all.filter_pedals(0.8, 1.0, 90.0, 10.0);
        assert!(close(out.throttle, (0.4 + 0.02) * 0.3));
        assert_eq!(out.brake, 0.6);
    }

    #[test]
    fn toggle_reports_new_state() {
        let mut flags = SafetyFlags::default();
        assert!(flags.toggle(SafetySystem::Ods));
        assert!(flags.get(SafetySystem::Ods));
        assert!(!flags.toggle(SafetySystem::Ods));
        for system in SafetySystem::ALL.iter() {
            assert!(!flags.get(*system));
        }
    }
}
