use std::fmt;
use std::str::FromStr;

use crate::error::SimError;

pub const FORWARD_GEARS: u8 = 6;
pub const STEERING_LIMIT_DEG: f32 = 550.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gear {
    Reverse,
    Neutral,
    Forward(u8),
}

impl Gear {
    pub fn forward(gear: u8) -> Result<Gear, SimError> {
        Gear::Forward(gear).validated()
    }

    /// Rejects forward gears outside 1..=6.
    pub fn validated(self) -> Result<Gear, SimError> {
        match self {
            Gear::Forward(n) if n == 0 || n > FORWARD_GEARS => {
                Err(SimError::InvalidInput(format!("undefined forward gear {}", n)))
            }
            gear => Ok(gear),
        }
    }

    pub fn is_forward(&self) -> bool {
        matches!(self, Gear::Forward(_))
    }
}

impl Default for Gear {
    fn default() -> Self {
        Gear::Forward(1)
    }
}

impl fmt::Display for Gear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gear::Reverse => write!(f, "R"),
            Gear::Neutral => write!(f, "N"),
            Gear::Forward(n) => write!(f, "{}", n),
        }
    }
}

/// Selector encoding used by the dashboard buttons: -1 reverse, 0 neutral.
impl TryFrom<i32> for Gear {
    type Error = SimError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(Gear::Reverse),
            0 => Ok(Gear::Neutral),
            n if n > 0 && n <= FORWARD_GEARS as i32 => Ok(Gear::Forward(n as u8)),
            n => Err(SimError::InvalidInput(format!("undefined gear {}", n))),
        }
    }
}

impl FromStr for Gear {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "R" | "r" => Ok(Gear::Reverse),
            "N" | "n" => Ok(Gear::Neutral),
            other => other
                .parse::<u8>()
                .map_err(|_| SimError::InvalidInput(format!("undefined gear {:?}", other)))
                .and_then(Gear::forward),
        }
    }
}

/// Snapshot of everything the driver controls. The simulation loop copies this
/// once per tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlInputs {
    pub throttle: f32,
    pub brake: f32,
    pub clutch: f32,
    pub steering_angle: f32,
    pub gear: Gear,
    pub engine_on: bool,
    pub simulation_running: bool,
}

impl Default for ControlInputs {
    fn default() -> Self {
        ControlInputs {
            throttle: 0.0,
            brake: 0.0,
            clutch: 0.0,
            steering_angle: 0.0,
            gear: Gear::default(),
            engine_on: false,
            simulation_running: false,
        }
    }
}

/// Clamps a pedal value into [0, 1]. NaN reads as a released pedal.
pub fn clamp_fraction(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// The dashboard sliders report 0-100.
pub fn percent_to_fraction(percent: f32) -> f32 {
    clamp_fraction(percent / 100.0)
}

pub fn clamp_steering(degrees: f32) -> f32 {
    if degrees.is_nan() {
        0.0
    } else {
        degrees.clamp(-STEERING_LIMIT_DEG, STEERING_LIMIT_DEG)
    }
}
