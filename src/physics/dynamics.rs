use std::time::Instant;

use crate::config::SimConfig;
use crate::controls::Gear;
use crate::physics::transmission::{Transmission, STANDSTILL_SPEED};

/// Clutch travel at or above which no power reaches the wheels.
pub const CLUTCH_DISENGAGED: f32 = 0.70;

const ENGINE_POWER: f32 = 1.5;
const FORWARD_REV_CEILING: f32 = 3500.0;
const FORWARD_BRAKE_DECEL: f32 = 8.0;
const DRAG_BASE: f32 = 0.5;
const DRAG_PER_KMH: f32 = 0.02;

const REVERSE_REV_CEILING: f32 = 2500.0;
const REVERSE_POWER: f32 = 1.0;
const REVERSE_MAX_SPEED: f32 = 40.0;
const REVERSE_BRAKE_DECEL: f32 = 6.0;

const NEUTRAL_REV_CEILING: f32 = 4000.0;
const COAST_BASE: f32 = 1.0;
const COAST_PER_KMH: f32 = 0.03;

const ENGINE_OFF_DECEL: f32 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VehicleState {
    /// km/h, negative while rolling backwards.
    pub velocity: f32,
    pub acceleration: f32,
    /// km.
    pub odometer: f64,
}

impl Default for VehicleState {
    fn default() -> Self {
        VehicleState { velocity: 0.0, acceleration: 0.0, odometer: 0.0 }
    }
}

impl VehicleState {
    pub fn speed(&self) -> f32 {
        self.velocity.abs()
    }
}

/// Pedal and gearbox state for one powered tick, after the safety filters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriveInput {
    pub throttle: f32,
    pub brake: f32,
    pub clutch: f32,
    pub gear: Gear,
}

/// Integrates vehicle state one tick at a time.
#[derive(Debug, Clone)]
pub struct VehicleDynamics {
    state: VehicleState,
    transmission: Transmission,
    max_speed: f32,
    last_update: Option<Instant>,
}

fn decay_towards_zero(velocity: f32, amount: f32) -> f32 {
    if velocity > 0.0 {
        (velocity - amount).max(0.0)
    } else {
        (velocity + amount).min(0.0)
    }
}

impl VehicleDynamics {
    pub fn new(config: &SimConfig) -> VehicleDynamics {
        VehicleDynamics {
            state: VehicleState::default(),
            transmission: Transmission::new(config),
            max_speed: config.max_speed,
            last_update: None,
        }
    }

    pub fn state(&self) -> VehicleState {
        self.state
    }

    pub fn reset(&mut self) {
        self.state = VehicleState::default();
        self.last_update = None;
    }

    /// Overwrites the signed velocity. The speed limiter writes back through
    /// this after `drive`.
    pub fn set_velocity(&mut self, velocity: f32) {
        self.state.velocity = velocity;
    }

    /// One powered tick with the engine running. Returns the target RPM.
    pub fn drive(&mut self, input: DriveInput) -> f32 {
        match input.gear {
            Gear::Forward(_) => self.drive_forward(input),
            Gear::Reverse => self.drive_reverse(input),
            Gear::Neutral => self.drive_neutral(input),
        }
    }

    fn rev_up(&self, throttle: f32, ceiling: f32) -> f32 {
        let idle = self.transmission.idle_rpm();
        idle + throttle * (ceiling - idle)
    }

    fn power_transmitted(input: &DriveInput) -> bool {
        input.throttle > 0.0 && input.clutch < CLUTCH_DISENGAGED
    }

    fn drive_forward(&mut self, input: DriveInput) -> f32 {
        let speed = self.state.speed();
        let rpm = if speed > STANDSTILL_SPEED {
            self.transmission.rpm_from_speed(speed, input.gear)
        } else {
            self.rev_up(input.throttle, FORWARD_REV_CEILING)
        };

        if Self::power_transmitted(&input) {
            let acceleration = input.throttle * self.transmission.acceleration_factor(input.gear) * ENGINE_POWER;
            self.state.acceleration = acceleration;
            self.state.velocity = (self.state.velocity + acceleration).min(self.max_speed);
        } else {
            self.state.acceleration = 0.0;
        }

        // Brake is applied after the throttle step, not netted against it.
        if input.brake > 0.0 {
            self.state.velocity = (self.state.velocity - input.brake * FORWARD_BRAKE_DECEL).max(0.0);
        }

        if input.throttle == 0.0 && input.brake == 0.0 {
            let drag = DRAG_BASE + speed * DRAG_PER_KMH;
            self.state.velocity = (self.state.velocity - drag).max(0.0);
        }

        rpm
    }

    fn drive_reverse(&mut self, input: DriveInput) -> f32 {
        let speed = self.state.speed();
        let rpm = if speed > STANDSTILL_SPEED {
            self.transmission.rpm_from_speed(speed, input.gear)
        } else {
            self.rev_up(input.throttle, REVERSE_REV_CEILING)
        };

        if Self::power_transmitted(&input) {
            let acceleration = -input.throttle * REVERSE_POWER;
            self.state.acceleration = acceleration;
            self.state.velocity = (self.state.velocity + acceleration).max(-REVERSE_MAX_SPEED);
        } else {
            self.state.acceleration = 0.0;
        }

        if input.brake > 0.0 && self.state.velocity < 0.0 {
            self.state.velocity = (self.state.velocity + input.brake * REVERSE_BRAKE_DECEL).min(0.0);
        }

        if input.throttle == 0.0 && input.brake == 0.0 {
            let drag = DRAG_BASE + speed * DRAG_PER_KMH;
            self.state.velocity = decay_towards_zero(self.state.velocity, drag);
        }

        rpm
    }

    fn drive_neutral(&mut self, input: DriveInput) -> f32 {
        let speed = self.state.speed();
        self.state.acceleration = 0.0;
        self.state.velocity = decay_towards_zero(self.state.velocity, COAST_BASE + speed * COAST_PER_KMH);
        self.rev_up(input.throttle, NEUTRAL_REV_CEILING)
    }

    /// Engine running but the drive simulation paused: roll out at idle.
    pub fn coast(&mut self) -> f32 {
        let speed = self.state.speed();
        self.state.acceleration = 0.0;
        self.state.velocity = decay_towards_zero(self.state.velocity, COAST_BASE + speed * COAST_PER_KMH);
        self.transmission.idle_rpm()
    }

    /// Engine off: faster roll-out, no revs.
    pub fn coast_engine_off(&mut self) -> f32 {
        self.state.acceleration = 0.0;
        self.state.velocity = decay_towards_zero(self.state.velocity, ENGINE_OFF_DECEL);
        0.0
    }

    /// Accumulates distance over the measured time since the previous call.
    /// The first call after construction or reset only records `now`.
    pub fn update_odometer(&mut self, now: Instant) {
        if let Some(last) = self.last_update {
            let elapsed = now.saturating_duration_since(last).as_secs_f64();
            self.state.odometer += self.state.speed() as f64 * elapsed / 3600.0;
        }
        if self.last_update.map_or(true, |last| now >= last) {
            self.last_update = Some(now);
        }
    }
}
