//! Headless presentation side: eases the gauges toward the published targets
//! and renders them as a line of text.

use std::fmt;

use crate::config::SimConfig;
use crate::simulator::PublishedTargets;

const SPEED_EASING: f32 = 0.1;
const SPEED_SNAP: f32 = 0.1;
const RPM_EASING: f32 = 0.15;
const RPM_SNAP: f32 = 10.0;

pub trait StateUpdater {
    fn update_state(&mut self, targets: &PublishedTargets);
}

pub trait Drawable {
    fn draw(&self, canvas: &mut dyn fmt::Write) -> fmt::Result;
}

pub trait Overlay: Drawable + StateUpdater {}

fn ease(current: f32, target: f32, easing: f32, snap: f32) -> f32 {
    let diff = target - current;
    if diff.abs() > snap {
        current + diff * easing
    } else {
        target
    }
}

/// Position of a gauge needle as a fraction of full scale.
pub fn needle_fraction(value: f32, full_scale: f32) -> f32 {
    (value / full_scale).clamp(0.0, 1.0)
}

#[derive(Debug, Clone)]
pub struct Dashboard {
    speed: f32,
    rpm: f32,
    odometer: f64,
    max_speed: f32,
    max_rpm: f32,
}

impl Dashboard {
    pub fn new(config: &SimConfig) -> Dashboard {
        Dashboard {
            speed: 0.0,
            rpm: 0.0,
            odometer: 0.0,
            max_speed: config.max_speed,
            max_rpm: config.max_rpm,
        }
    }

    pub fn speed(&self) -> f32 {
        self.speed
    }

    pub fn rpm(&self) -> f32 {
        self.rpm
    }

    pub fn odometer(&self) -> f64 {
        self.odometer
    }

    pub fn render(&self) -> String {
        let mut line = String::new();
        // Writing into a String cannot fail.
        let _ = self.draw(&mut line);
        line
    }
}

impl Overlay for Dashboard {}

impl StateUpdater for Dashboard {
    fn update_state(&mut self, targets: &PublishedTargets) {
        self.speed = ease(self.speed, targets.target_speed, SPEED_EASING, SPEED_SNAP);
        self.rpm = ease(self.rpm, targets.target_rpm, RPM_EASING, RPM_SNAP);
        self.odometer = targets.odometer;
    }
}

impl Drawable for Dashboard {
    fn draw(&self, canvas: &mut dyn fmt::Write) -> fmt::Result {
        write!(
            canvas,
            "{:>5.1} km/h [{:>3.0}%] | {:>4.0} rpm [{:>3.0}%] | {:.2} km",
            self.speed,
            needle_fraction(self.speed, self.max_speed) * 100.0,
            self.rpm,
            needle_fraction(self.rpm, self.max_rpm) * 100.0,
            self.odometer,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn targets(speed: f32, rpm: f32) -> PublishedTargets {
        PublishedTargets { target_speed: speed, target_rpm: rpm, odometer: 1.234, tick: 1 }
    }

    #[test]
    fn needles_ease_towards_targets() {
        let mut dash = Dashboard::new(&SimConfig::default());
        dash.update_state(&targets(100.0, 3000.0));
        assert!((dash.speed() - 10.0).abs() < 1e-4);
        assert!((dash.rpm() - 450.0).abs() < 1e-3);
        assert_eq!(dash.odometer(), 1.234);

        for _ in 0..200 {
            dash.update_state(&targets(100.0, 3000.0));
        }
        assert_eq!(dash.speed(), 100.0);
        assert_eq!(dash.rpm(), 3000.0);
    }

    #[test]
    fn small_gaps_snap() {
        let mut dash = Dashboard::new(&SimConfig::default());
        dash.update_state(&targets(0.05, 8.0));
        assert_eq!(dash.speed(), 0.05);
        assert_eq!(dash.rpm(), 8.0);
    }

    #[test]
    fn needle_is_capped_at_full_scale() {
        assert_eq!(needle_fraction(300.0, 260.0), 1.0);
        assert_eq!(needle_fraction(130.0, 260.0), 0.5);
        assert_eq!(needle_fraction(-5.0, 260.0), 0.0);
    }

    #[test]
    fn renders_readout() {
        let mut dash = Dashboard::new(&SimConfig::default());
        for _ in 0..200 {
            dash.update_state(&targets(130.0, 4000.0));
        }
        assert_eq!(dash.render(), "130.0 km/h [ 50%] | 4000 rpm [ 50%] | 1.23 km");
    }
}
