use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::error::PowerMonitorError;
use super::types::*;

pub const GRID_VOLTAGE: f64 = 124.2;
pub const AC_TRANSFORMER_OUTPUT_VOLTAGE: f64 = 10.2;

/// Multipliers that trim each input against a reference meter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccuracyCalibration {
    pub ct: Vec<f64>,
    pub ac: f64,
}

impl Default for AccuracyCalibration {
    fn default() -> Self {
        Self {
            ct: vec![1.0; CHANNEL_COUNT],
            ac: 1.0,
        }
    }
}

/// Candidate grid and rounding used by the phase calibration search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseSearchConfig {
    pub start: f64,
    pub stop: f64,
    pub step: f64,
    pub pf_rounding_digits: u32, // Power factors equal at this precision form the best band
    pub display_digits: u32,     // Rounding of the recommended value shown to the operator
}

impl Default for PhaseSearchConfig {
    fn default() -> Self {
        Self {
            start: 0.5,
            stop: 2.5,
            step: 0.005,
            pf_rounding_digits: 3,
            display_digits: 8,
        }
    }
}

impl PhaseSearchConfig {
    /// Candidate coefficients `start + k * step`, inclusive of `stop`.
    pub fn candidates(&self) -> Vec<f64> {
        let count = ((self.stop - self.start) / self.step + 1e-9).floor() as usize + 1;
        (0..count).map(|k| self.start + k as f64 * self.step).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerMonitorConfig {
    pub grid_voltage: f64,
    pub transformer_output_voltage: f64,
    pub adc_full_scale: f64,
    pub accuracy_calibration: AccuracyCalibration,
    pub phase_correction: Vec<f64>,
    pub average_samples: usize,
    pub samples_per_batch: usize,
    pub enabled_channels: Vec<u8>,
    pub phase_search: PhaseSearchConfig,
}

impl Default for PowerMonitorConfig {
    fn default() -> Self {
        Self {
            grid_voltage: GRID_VOLTAGE,
            transformer_output_voltage: AC_TRANSFORMER_OUTPUT_VOLTAGE,
            adc_full_scale: ADC_FULL_SCALE,
            accuracy_calibration: AccuracyCalibration::default(),
            phase_correction: vec![1.0; CHANNEL_COUNT],
            average_samples: AVERAGE_SAMPLES,
            samples_per_batch: SAMPLES_PER_BATCH,
            enabled_channels: (0..CHANNEL_COUNT as u8).collect(),
            phase_search: PhaseSearchConfig::default(),
        }
    }
}

impl PowerMonitorConfig {
    pub fn load(path: &Path) -> Result<Self, PowerMonitorError> {
        let json = fs::read_to_string(path)?;
        let config: PowerMonitorConfig = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    /// Rough transformer-plus-divider ratio from nameplate voltages.
    pub fn voltage_ratio(&self) -> f64 {
        (self.grid_voltage / self.transformer_output_voltage) * VOLTAGE_DIVIDER_RATIO
    }

    pub fn phase_coefficient(&self, channel: ChannelId) -> f64 {
        self.phase_correction[channel.index()]
    }

    pub fn is_enabled(&self, channel: ChannelId) -> bool {
        self.enabled_channels.contains(&channel.0)
    }

    pub fn validate(&self) -> Result<(), PowerMonitorError> {
        let invalid = |msg: String| Err(PowerMonitorError::InvalidConfig(msg));

        if self.phase_correction.len() != CHANNEL_COUNT {
            return invalid(format!(
                "phase_correction needs {} entries, found {}",
                CHANNEL_COUNT,
                self.phase_correction.len()
            ));
        }
        if self.accuracy_calibration.ct.len() != CHANNEL_COUNT {
            return invalid(format!(
                "accuracy_calibration.ct needs {} entries, found {}",
                CHANNEL_COUNT,
                self.accuracy_calibration.ct.len()
            ));
        }
        if self.adc_full_scale <= 0.0 {
            return invalid("adc_full_scale must be positive".to_string());
        }
        if self.grid_voltage <= 0.0 || self.transformer_output_voltage <= 0.0 {
            return invalid("grid and transformer voltages must be positive".to_string());
        }
        if self.average_samples == 0 {
            return invalid("average_samples must be at least 1".to_string());
        }
        if self.samples_per_batch == 0 {
            return invalid("samples_per_batch must be at least 1".to_string());
        }
        if let Some(ct) = self.enabled_channels.iter().find(|&&ct| ct as usize >= CHANNEL_COUNT) {
            return invalid(format!("enabled channel ct{} does not exist", ct));
        }

        let search = &self.phase_search;
        if search.step <= 0.0 || search.stop < search.start {
            return invalid(format!(
                "phase search range {}..{} step {} is empty",
                search.start, search.stop, search.step
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = PowerMonitorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.enabled_channels.len(), CHANNEL_COUNT);
    }

    #[test]
    fn candidate_grid_includes_both_ends() {
        let search = PhaseSearchConfig::default();
        let candidates = search.candidates();
        assert_eq!(candidates.len(), 401);
        assert!((candidates[0] - 0.5).abs() < 1e-12);
        assert!((candidates[400] - 2.5).abs() < 1e-9);
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "grid_voltage": 230.0, "phase_correction": [1.0, 1.1, 1.2, 1.0, 1.0, 1.0] }}"#).unwrap();

        let config = PowerMonitorConfig::load(file.path()).unwrap();
        assert_eq!(config.grid_voltage, 230.0);
        assert_eq!(config.phase_coefficient(ChannelId(2)), 1.2);
        assert_eq!(config.average_samples, AVERAGE_SAMPLES);
    }

    #[test]
    fn rejects_wrong_channel_count() {
        let config = PowerMonitorConfig {
            phase_correction: vec![1.0; 4],
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(PowerMonitorError::InvalidConfig(_))));
    }

    #[test]
    fn rejects_empty_search_range() {
        let mut config = PowerMonitorConfig::default();
        config.phase_search.stop = 0.1;
        assert!(config.validate().is_err());

        let mut config = PowerMonitorConfig::default();
        config.enabled_channels = vec![0, 7];
        assert!(config.validate().is_err());
    }
}
