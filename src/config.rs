use std::path::Path;
use std::time::Duration;

use async_std::fs::File;
use async_std::prelude::*;
use yaml_rust::{Yaml, YamlLoader};

use crate::controls::FORWARD_GEARS;
use crate::error::SimError;

/// Every tunable constant of the simulator, supplied once at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct SimConfig {
    pub idle_rpm: f32,
    pub max_speed: f32,
    pub max_rpm: f32,
    /// Ratios for forward gears 1 through 6.
    pub gear_ratios: [f32; FORWARD_GEARS as usize],
    pub reverse_ratio: f32,
    /// Meters.
    pub tire_circumference: f32,
    pub final_drive_ratio: f32,
    pub abs_max_brake: f32,
    pub esp_threshold_deg: f32,
    pub esp_power_reduction: f32,
    pub acc_target_speed: f32,
    pub acc_step: f32,
    pub ods_power_reduction: f32,
    pub spd_max_speed: f32,
    pub tick_period: Duration,
    /// Cadence of the presentation side. Not used by the core.
    pub refresh_period: Duration,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            idle_rpm: 800.0,
            max_speed: 260.0,
            max_rpm: 8000.0,
            gear_ratios: [3.50, 2.10, 1.40, 1.00, 0.80, 0.65],
            reverse_ratio: 3.20,
            tire_circumference: 2.0,
            final_drive_ratio: 3.70,
            abs_max_brake: 0.6,
            esp_threshold_deg: 30.0,
            esp_power_reduction: 0.5,
            acc_target_speed: 60.0,
            acc_step: 0.02,
            ods_power_reduction: 0.3,
            spd_max_speed: 120.0,
            tick_period: Duration::from_millis(50),
            refresh_period: Duration::from_millis(30),
        }
    }
}

fn number(doc: &Yaml, key: &str) -> Result<Option<f32>, SimError> {
    match &doc[key] {
        Yaml::BadValue | Yaml::Null => Ok(None),
        Yaml::Real(_) => doc[key]
            .as_f64()
            .map(|v| Some(v as f32))
            .ok_or_else(|| SimError::Config(format!("{} is not a number", key))),
        Yaml::Integer(v) => Ok(Some(*v as f32)),
        other => Err(SimError::Config(format!("{} must be a number, got {:?}", key, other))),
    }
}

fn millis(doc: &Yaml, key: &str) -> Result<Option<Duration>, SimError> {
    match &doc[key] {
        Yaml::BadValue | Yaml::Null => Ok(None),
        Yaml::Integer(ms) if *ms > 0 => Ok(Some(Duration::from_millis(*ms as u64))),
        other => Err(SimError::Config(format!(
            "{} must be a positive number of milliseconds, got {:?}",
            key, other
        ))),
    }
}

impl TryFrom<&str> for SimConfig {
    type Error = SimError;

    /// Parses a YAML mapping. Missing keys keep their defaults.
    fn try_from(str: &str) -> Result<Self, Self::Error> {
        let docs = YamlLoader::load_from_str(str)
            .map_err(|err| SimError::Config(format!("Failed to parse yaml: {:?}", err)))?;

        let mut config = SimConfig::default();
        let doc = match docs.into_iter().next() {
            Some(Yaml::Null) | None => return Ok(config),
            Some(doc @ Yaml::Hash(_)) => doc,
            Some(other) => {
                return Err(SimError::Config(format!("expected a mapping, got {:?}", other)))
            }
        };

        let scalars: [(&str, &mut f32); 13] = [
            ("idle_rpm", &mut config.idle_rpm),
            ("max_speed", &mut config.max_speed),
            ("max_rpm", &mut config.max_rpm),
            ("reverse_ratio", &mut config.reverse_ratio),
            ("tire_circumference", &mut config.tire_circumference),
            ("final_drive_ratio", &mut config.final_drive_ratio),
            ("abs_max_brake", &mut config.abs_max_brake),
            ("esp_threshold_deg", &mut config.esp_threshold_deg),
            ("esp_power_reduction", &mut config.esp_power_reduction),
            ("acc_target_speed", &mut config.acc_target_speed),
            ("acc_step", &mut config.acc_step),
            ("ods_power_reduction", &mut config.ods_power_reduction),
            ("spd_max_speed", &mut config.spd_max_speed),
        ];
        for (key, slot) in scalars {
            if let Some(value) = number(&doc, key)? {
                *slot = value;
            }
        }

        match &doc["gear_ratios"] {
            Yaml::BadValue | Yaml::Null => {}
            Yaml::Array(ratios) if ratios.len() == FORWARD_GEARS as usize => {
                for (idx, ratio) in ratios.iter().enumerate() {
                    config.gear_ratios[idx] = match ratio {
                        Yaml::Integer(v) => *v as f32,
                        Yaml::Real(_) => ratio.as_f64().unwrap_or_default() as f32,
                        other => {
                            return Err(SimError::Config(format!(
                                "gear ratio {} is not a number: {:?}",
                                idx + 1,
                                other
                            )))
                        }
                    };
                }
            }
            _ => {
                return Err(SimError::Config(format!(
                    "gear_ratios must list exactly {} numbers",
                    FORWARD_GEARS
                )))
            }
        }

        if let Some(period) = millis(&doc, "tick_period")? {
            config.tick_period = period;
        }
        if let Some(period) = millis(&doc, "refresh_period")? {
            config.refresh_period = period;
        }

        config.validate()?;
        Ok(config)
    }
}

impl SimConfig {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<SimConfig, SimError> {
        let path = path.as_ref();
        info!["Loading simulator config {}", path.display()];

        let mut file = File::open(path)
            .await
            .map_err(|err| SimError::Config(format!["Could not open {}: {}", path.display(), err]))?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .await
            .map_err(|err| SimError::Config(format!["Could not read {}: {}", path.display(), err]))?;

        SimConfig::try_from(contents.as_str())
    }

    pub fn validate(&self) -> Result<(), SimError> {
        let scalars = [
            ("idle_rpm", self.idle_rpm),
            ("max_speed", self.max_speed),
            ("max_rpm", self.max_rpm),
            ("reverse_ratio", self.reverse_ratio),
            ("tire_circumference", self.tire_circumference),
            ("final_drive_ratio", self.final_drive_ratio),
            ("abs_max_brake", self.abs_max_brake),
            ("esp_threshold_deg", self.esp_threshold_deg),
            ("esp_power_reduction", self.esp_power_reduction),
            ("acc_target_speed", self.acc_target_speed),
            ("acc_step", self.acc_step),
            ("ods_power_reduction", self.ods_power_reduction),
            ("spd_max_speed", self.spd_max_speed),
        ];
        for (key, value) in scalars.iter() {
            if !value.is_finite() {
                return Err(SimError::Config(format!("{} must be finite, got {}", key, value)));
            }
        }

        let positive = [
            ("idle_rpm", self.idle_rpm),
            ("max_speed", self.max_speed),
            ("max_rpm", self.max_rpm),
            ("reverse_ratio", self.reverse_ratio),
            ("tire_circumference", self.tire_circumference),
            ("final_drive_ratio", self.final_drive_ratio),
            ("spd_max_speed", self.spd_max_speed),
        ];
        for (key, value) in positive.iter() {
            if !(*value > 0.0) {
                return Err(SimError::Config(format!("{} must be positive, got {}", key, value)));
            }
        }
        if let Some(ratio) = self.gear_ratios.iter().find(|r| !(r.is_finite() && **r > 0.0)) {
            return Err(SimError::Config(format!("gear ratios must be positive, got {}", ratio)));
        }

        let fractions = [
            ("abs_max_brake", self.abs_max_brake),
            ("esp_power_reduction", self.esp_power_reduction),
            ("acc_step", self.acc_step),
            ("ods_power_reduction", self.ods_power_reduction),
        ];
        for (key, value) in fractions.iter() {
            if !(0.0..=1.0).contains(value) {
                return Err(SimError::Config(format!("{} must lie in [0, 1], got {}", key, value)));
            }
        }

        if self.esp_threshold_deg < 0.0 || self.acc_target_speed < 0.0 {
            return Err(SimError::Config("thresholds must not be negative".to_string()));
        }
        if self.idle_rpm >= self.max_rpm {
            return Err(SimError::Config(format!(
                "idle_rpm {} must be below max_rpm {}",
                self.idle_rpm, self.max_rpm
            )));
        }
        if self.tick_period.is_zero() || self.refresh_period.is_zero() {
            return Err(SimError::Config("periods must be non-zero".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_std::task;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(SimConfig::default().validate(), Ok(()));
    }

    #[test]
    fn empty_document_yields_defaults() {
        assert_eq!(SimConfig::try_from(""), Ok(SimConfig::default()));
    }

    #[test]
    fn shipped_config_matches_defaults() {
        let shipped = SimConfig::try_from(include_str!("../config/dashsim.yaml")).unwrap();
        assert_eq!(shipped, SimConfig::default());
    }

    #[test]
    fn yaml_overrides_selected_keys() {
        let yaml = "
idle_rpm: 900
abs_max_brake: 0.45
gear_ratios: [4, 2.5, 1.6, 1.1, 0.9, 0.7]
tick_period: 20
";
        let config = SimConfig::try_from(yaml).unwrap();
        assert_eq!(config.idle_rpm, 900.0);
        assert_eq!(config.abs_max_brake, 0.45);
        assert_eq!(config.gear_ratios, [4.0, 2.5, 1.6, 1.1, 0.9, 0.7]);
        assert_eq!(config.tick_period, Duration::from_millis(20));
        assert_eq!(config.max_speed, SimConfig::default().max_speed);
    }

    #[test]
    fn malformed_values_are_config_errors() {
        let cases = [
            "idle_rpm: fast",
            "gear_ratios: [1, 2, 3]",
            "tick_period: 0",
            "abs_max_brake: 1.5",
            "idle_rpm: 9000",
            "- just\n- a list",
            "idle_rpm: [",
            "esp_threshold_deg: .nan",
            "acc_target_speed: .nan",
            "max_speed: .inf",
            "spd_max_speed: .inf",
            "gear_ratios: [.inf, 2.1, 1.4, 1.0, 0.8, 0.65]",
        ];
        for yaml in cases.iter() {
            match SimConfig::try_from(*yaml) {
                Err(SimError::Config(_)) => {}
                other => panic!("{:?} should be rejected, got {:?}", yaml, other),
            }
        }
    }

    #[test]
    fn missing_file_is_reported() {
        let result = task::block_on(SimConfig::load("/nonexistent/dashsim.yaml"));
        assert!(matches!(result, Err(SimError::Config(_))));
    }
}
