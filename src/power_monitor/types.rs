use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use super::config::PowerMonitorConfig;
use super::error::PowerMonitorError;

pub const CHANNEL_COUNT: usize = 6;

pub const ADC_FULL_SCALE: f64 = 1024.0; // 10-bit converter (0 - 1023)
pub const SAMPLES_PER_BATCH: usize = 2000;
pub const AVERAGE_SAMPLES: usize = 5;

pub const CURRENT_SCALE: f64 = 100.0; // Burden resistor and CT ratio folded into one multiplier
pub const VOLTAGE_DIVIDER_RATIO: f64 = 11.0; // On-board divider after the AC transformer

pub const BOARD_RAIL_VOLTAGE: f64 = 3.31;
pub const BOARD_RAIL_DIVIDER: f64 = 2.0;
pub const BOARD_VOLTAGE_READS: usize = 10;

/// Identifies one current transformer input (`ct0`..`ct5`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub u8);

impl ChannelId {
    pub fn new(index: usize) -> Option<Self> {
        if index < CHANNEL_COUNT {
            Some(ChannelId(index as u8))
        } else {
            None
        }
    }

    pub fn index(&self) -> usize {
        self.0 as usize
    }

    pub fn all() -> impl Iterator<Item = ChannelId> {
        (0..CHANNEL_COUNT as u8).map(ChannelId)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ct{}", self.0)
    }
}

/// One acquisition cycle of raw ADC codes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleBatch {
    pub captured_at: SystemTime, // Capture timestamp supplied by the sampler
    pub currents: Vec<Vec<i32>>, // One sequence per CT channel, in channel order
    pub voltage: Vec<i32>,       // Shared voltage reference sequence
}

impl SampleBatch {
    pub fn new(currents: Vec<Vec<i32>>, voltage: Vec<i32>) -> Self {
        Self {
            captured_at: SystemTime::now(),
            currents,
            voltage,
        }
    }

    pub fn len(&self) -> usize {
        self.voltage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voltage.is_empty()
    }

    pub fn current(&self, channel: ChannelId) -> &[i32] {
        &self.currents[channel.index()]
    }

    /*
    * @brief Check the batch shape before any arithmetic touches it.
    * @return Error when a channel is missing or a sequence length differs from the voltage sequence.
    */
    pub fn validate(&self) -> Result<(), PowerMonitorError> {
        if self.voltage.is_empty() {
            return Err(PowerMonitorError::EmptyBatch);
        }

        if self.currents.len() != CHANNEL_COUNT {
            return Err(PowerMonitorError::ChannelMismatch {
                expected: CHANNEL_COUNT,
                actual: self.currents.len(),
            });
        }

        for (index, current) in self.currents.iter().enumerate() {
            if current.len() != self.voltage.len() {
                return Err(PowerMonitorError::LengthMismatch {
                    channel: format!("ct{}", index),
                    expected: self.voltage.len(),
                    actual: current.len(),
                });
            }
        }

        Ok(())
    }
}

/// Raw samples of one channel paired with the voltage wave corrected for it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconstructedWave {
    pub current: Vec<i32>,
    pub voltage: Vec<f64>,
}

/// Original sequences plus one phase-corrected voltage sequence per CT channel.
#[derive(Debug, Clone)]
pub struct ReconstructedWaveforms {
    pub voltage: Vec<i32>,
    pub currents: Vec<Vec<i32>>,
    pub corrected_voltages: Vec<Vec<f64>>,
}

impl ReconstructedWaveforms {
    pub fn len(&self) -> usize {
        self.voltage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voltage.is_empty()
    }

    pub fn channel(&self, channel: ChannelId) -> (&[i32], &[f64]) {
        (
            &self.currents[channel.index()],
            &self.corrected_voltages[channel.index()],
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelMetrics {
    pub channel: ChannelId,
    pub power: f64,        // Real power (W)
    pub current: f64,      // RMS current (A)
    pub voltage: f64,      // RMS of this channel's corrected voltage wave (V)
    pub power_factor: f64, // Real power / apparent power, 0 when apparent power is 0
}

impl ChannelMetrics {
    pub fn zero(channel: ChannelId) -> Self {
        Self {
            channel,
            power: 0.0,
            current: 0.0,
            voltage: 0.0,
            power_factor: 0.0,
        }
    }
}

/// Per-channel metrics plus the representative grid voltage (channel 0).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsRecord {
    pub channels: Vec<ChannelMetrics>,
    pub voltage: f64,
}

impl MetricsRecord {
    pub fn channel(&self, channel: ChannelId) -> Option<&ChannelMetrics> {
        self.channels.iter().find(|m| m.channel == channel)
    }
}

/// Raw-code to physical-unit multipliers for one reference-voltage reading.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalingFactors {
    pub current: [f64; CHANNEL_COUNT],
    pub voltage: f64,
}

impl ScalingFactors {
    pub fn new(config: &PowerMonitorConfig, reference_voltage: f64) -> Self {
        let vref = reference_voltage / config.adc_full_scale;

        let mut current = [0.0; CHANNEL_COUNT];
        for (factor, accuracy) in current.iter_mut().zip(config.accuracy_calibration.ct.iter()) {
            *factor = vref * CURRENT_SCALE * accuracy;
        }

        Self {
            current,
            voltage: vref * config.voltage_ratio() * config.accuracy_calibration.ac,
        }
    }

    pub fn current_factor(&self, channel: ChannelId) -> f64 {
        self.current[channel.index()]
    }
}
