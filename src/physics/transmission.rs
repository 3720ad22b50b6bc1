use crate::config::SimConfig;
use crate::controls::Gear;

/// Below this speed (km/h) the car counts as stopped.
pub const STANDSTILL_SPEED: f32 = 0.1;

const NEUTRAL_RATIO: f32 = 1.0;
const DEFAULT_ACCELERATION_FACTOR: f32 = 0.5;
const ACCELERATION_FACTORS: [f32; 6] = [1.2, 0.9, 0.7, 0.5, 0.4, 0.35];

/// Gearbox lookup tables. Holds no state beyond the configured constants.
#[derive(Debug, Clone, Copy)]
pub struct Transmission {
    idle_rpm: f32,
    gear_ratios: [f32; 6],
    reverse_ratio: f32,
    tire_circumference: f32,
    final_drive_ratio: f32,
}

impl Transmission {
    pub fn new(config: &SimConfig) -> Transmission {
        Transmission {
            idle_rpm: config.idle_rpm,
            gear_ratios: config.gear_ratios,
            reverse_ratio: config.reverse_ratio,
            tire_circumference: config.tire_circumference,
            final_drive_ratio: config.final_drive_ratio,
        }
    }

    pub fn idle_rpm(&self) -> f32 {
        self.idle_rpm
    }

    pub fn gear_ratio(&self, gear: Gear) -> f32 {
        match gear {
            Gear::Reverse => self.reverse_ratio,
            Gear::Forward(n) => forward_index(n)
                .map(|idx| self.gear_ratios[idx])
                .unwrap_or(NEUTRAL_RATIO),
            Gear::Neutral => NEUTRAL_RATIO,
        }
    }

    /// Engine speed implied by road speed. Only forward gears are coupled to
    /// the wheels here; everything else idles.
    pub fn rpm_from_speed(&self, speed: f32, gear: Gear) -> f32 {
        if !gear.is_forward() || speed <= STANDSTILL_SPEED {
            return self.idle_rpm;
        }

        let speed_mps = speed * 1000.0 / 3600.0;
        let wheel_rpm = speed_mps / self.tire_circumference * 60.0;
        let rpm = wheel_rpm * self.gear_ratio(gear) * self.final_drive_ratio;
        rpm.max(self.idle_rpm)
    }

    pub fn acceleration_factor(&self, gear: Gear) -> f32 {
        match gear {
            Gear::Forward(n) => forward_index(n)
                .map(|idx| ACCELERATION_FACTORS[idx])
                .unwrap_or(DEFAULT_ACCELERATION_FACTOR),
            _ => DEFAULT_ACCELERATION_FACTOR,
        }
    }
}

fn forward_index(gear: u8) -> Option<usize> {
    match gear {
        1..=6 => Some(gear as usize - 1),
        _ => None,
    }
}
