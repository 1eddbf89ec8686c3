//! Acquisition side of the pipeline.
//!
//! The core only talks to a [`Sampler`]; the simulated and replay
//! implementations below stand in for the SPI converter.

use std::collections::VecDeque;
use std::f64::consts::SQRT_2;
use std::fs;
use std::path::Path;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use super::config::PowerMonitorConfig;
use super::error::PowerMonitorError;
use super::generate_signal::{generate_signals, ChannelSignal, SignalParams, F, FS};
use super::types::*;

/// Source of raw batches and of the auxiliary reference-voltage reading.
pub trait Sampler {
    /// Blocks until `samples` samples per channel have been captured.
    fn collect(&mut self, samples: usize) -> Result<SampleBatch, PowerMonitorError>;

    /// Live reading of the converter reference rail, in volts.
    fn reference_voltage(&mut self) -> Result<f64, PowerMonitorError>;
}

impl<S: Sampler + ?Sized> Sampler for Box<S> {
    fn collect(&mut self, samples: usize) -> Result<SampleBatch, PowerMonitorError> {
        (**self).collect(samples)
    }

    fn reference_voltage(&mut self) -> Result<f64, PowerMonitorError> {
        (**self).reference_voltage()
    }
}

/*
* @brief Convert auxiliary-channel readings of the board rail to volts.
* @param codes Raw readings, usually BOARD_VOLTAGE_READS of them
* @param full_scale ADC full-scale code
* @note The rail is read through a divide-by-two network.
*/
pub fn board_voltage_from_codes(codes: &[i32], full_scale: f64) -> Result<f64, PowerMonitorError> {
    if codes.is_empty() {
        return Err(PowerMonitorError::Sampler("no board voltage readings".to_string()));
    }
    let avg_reading = codes.iter().map(|&c| c as f64).sum::<f64>() / codes.len() as f64;
    Ok((avg_reading / full_scale) * BOARD_RAIL_VOLTAGE * BOARD_RAIL_DIVIDER)
}

/// Per-channel load of the simulated installation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulatedLoad {
    pub rms_current: f64,
    pub load_angle_deg: f64,
    pub skew: f64,
    pub reversed: bool,
}

impl Default for SimulatedLoad {
    fn default() -> Self {
        Self {
            rms_current: 5.0,
            load_angle_deg: 0.0,
            skew: 0.0,
            reversed: false,
        }
    }
}

/// Synthetic multiplexed converter driven by `generate_signals`.
pub struct SimulatedSampler {
    config: PowerMonitorConfig,
    pub board_voltage: f64,
    pub sample_rate_hz: f64,
    pub frequency_hz: f64,
    pub loads: [SimulatedLoad; CHANNEL_COUNT],
    pub noise: f64,
    pub realtime: bool,
    elapsed_s: f64,
    rng: StdRng,
}

impl SimulatedSampler {
    pub fn new(config: &PowerMonitorConfig, seed: u64) -> Self {
        Self {
            config: config.clone(),
            board_voltage: 3.3,
            sample_rate_hz: FS,
            frequency_hz: F,
            loads: [SimulatedLoad::default(); CHANNEL_COUNT],
            noise: 0.0,
            realtime: false,
            elapsed_s: 0.0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn set_reversed(&mut self, channel: ChannelId, reversed: bool) {
        self.loads[channel.index()].reversed = reversed;
    }

    fn board_code(&self) -> i32 {
        (self.board_voltage / (BOARD_RAIL_VOLTAGE * BOARD_RAIL_DIVIDER) * self.config.adc_full_scale).round() as i32
    }

    fn signal_params(&self, samples: usize) -> Result<SignalParams, PowerMonitorError> {
        let measured = board_voltage_from_codes(&[self.board_code()], self.config.adc_full_scale)?;
        let scaling = ScalingFactors::new(&self.config, measured);

        let mut channels = vec![ChannelSignal::default(); CHANNEL_COUNT];
        for (channel, (signal, load)) in ChannelId::all().zip(channels.iter_mut().zip(self.loads.iter())) {
            let polarity = if load.reversed { -1.0 } else { 1.0 };
            *signal = ChannelSignal {
                amplitude: polarity * load.rms_current * SQRT_2 / scaling.current_factor(channel),
                load_angle_deg: load.load_angle_deg,
                skew: load.skew,
            };
        }

        Ok(SignalParams {
            sample_rate_hz: self.sample_rate_hz,
            frequency_hz: self.frequency_hz,
            samples,
            full_scale: self.config.adc_full_scale,
            midpoint: self.config.adc_full_scale / 2.0,
            voltage_amplitude: self.config.grid_voltage * SQRT_2 / scaling.voltage,
            channels,
            noise: self.noise,
        })
    }
}

impl Sampler for SimulatedSampler {
    fn collect(&mut self, samples: usize) -> Result<SampleBatch, PowerMonitorError> {
        let params = self.signal_params(samples)?;
        let batch = generate_signals(&params, self.elapsed_s, &mut self.rng);

        let duration = samples as f64 / self.sample_rate_hz;
        self.elapsed_s += duration;
        if self.realtime {
            spin_sleep::sleep(Duration::from_secs_f64(duration));
        }

        Ok(batch)
    }

    fn reference_voltage(&mut self) -> Result<f64, PowerMonitorError> {
        let readings = vec![self.board_code(); BOARD_VOLTAGE_READS];
        board_voltage_from_codes(&readings, self.config.adc_full_scale)
    }
}

/// Captured batch plus the reference reading taken with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleDump {
    pub reference_voltage: f64,
    pub batch: SampleBatch,
}

impl SampleDump {
    pub fn load(path: &Path) -> Result<Self, PowerMonitorError> {
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), PowerMonitorError> {
        let json = serde_json::to_string(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

/// Serves previously captured batches in order.
pub struct ReplaySampler {
    queue: VecDeque<SampleBatch>,
    reference_voltage: f64,
    cycle: bool,
}

impl ReplaySampler {
    pub fn new(batches: impl IntoIterator<Item = SampleBatch>, reference_voltage: f64) -> Self {
        Self {
            queue: batches.into_iter().collect(),
            reference_voltage,
            cycle: false,
        }
    }

    /// Replays one dump forever.
    pub fn from_dump(dump: SampleDump) -> Self {
        Self {
            queue: VecDeque::from([dump.batch]),
            reference_voltage: dump.reference_voltage,
            cycle: true,
        }
    }
}

impl Sampler for ReplaySampler {
    fn collect(&mut self, samples: usize) -> Result<SampleBatch, PowerMonitorError> {
        let batch = self
            .queue
            .pop_front()
            .ok_or_else(|| PowerMonitorError::Sampler("replay exhausted".to_string()))?;

        if self.cycle {
            self.queue.push_back(batch.clone());
        }

        if batch.len() < samples {
            log::warn!("Replayed batch holds {} samples, {} requested", batch.len(), samples);
        }

        Ok(batch)
    }

    fn reference_voltage(&mut self) -> Result<f64, PowerMonitorError> {
        Ok(self.reference_voltage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::power_monitor::power::calculate_channel_power;
    use crate::power_monitor::waveform::rebuild_wave;

    #[test]
    fn board_voltage_averages_readings() {
        let volts = board_voltage_from_codes(&[510, 512, 514], 1024.0).unwrap();
        assert!((volts - 512.0 / 1024.0 * 3.31 * 2.0).abs() < 1e-12);
        assert!(board_voltage_from_codes(&[], 1024.0).is_err());
    }

    #[test]
    fn simulated_batch_reads_back_configured_load() {
        let config = PowerMonitorConfig::default();
        let mut sampler = SimulatedSampler::new(&config, 11);
        sampler.loads[1].rms_current = 8.0;

        let vref = sampler.reference_voltage().unwrap();
        let batch = sampler.collect(2000).unwrap();
        let scaling = ScalingFactors::new(&config, vref);

        let channel = ChannelId(1);
        let voltage = rebuild_wave(&batch.voltage, 1.0);
        let metrics =
            calculate_channel_power(channel, batch.current(channel), &voltage, scaling.current_factor(channel), scaling.voltage)
                .unwrap();

        assert!((metrics.current - 8.0).abs() < 0.08, "current = {}", metrics.current);
        assert!((metrics.voltage - config.grid_voltage).abs() < config.grid_voltage * 0.01);
        assert!(metrics.power_factor > 0.99);
    }

    #[test]
    fn reversed_load_flips_power_sign() {
        let config = PowerMonitorConfig::default();
        let mut sampler = SimulatedSampler::new(&config, 5);
        sampler.set_reversed(ChannelId(0), true);

        let batch = sampler.collect(2000).unwrap();
        let voltage = rebuild_wave(&batch.voltage, 1.0);
        let metrics = calculate_channel_power(ChannelId(0), batch.current(ChannelId(0)), &voltage, 1.0, 1.0).unwrap();
        assert!(metrics.power_factor < -0.99);
    }

    #[test]
    fn replay_serves_in_order_then_fails() {
        let first = SampleBatch::new(vec![vec![1; 4]; CHANNEL_COUNT], vec![1; 4]);
        let second = SampleBatch::new(vec![vec![2; 4]; CHANNEL_COUNT], vec![2; 4]);
        let mut sampler = ReplaySampler::new(vec![first, second], 3.3);

        assert_eq!(sampler.collect(4).unwrap().voltage[0], 1);
        assert_eq!(sampler.collect(4).unwrap().voltage[0], 2);
        assert!(matches!(sampler.collect(4), Err(PowerMonitorError::Sampler(_))));
        assert_eq!(sampler.reference_voltage().unwrap(), 3.3);
    }

    #[test]
    fn dump_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last-debug.json");
        let dump = SampleDump {
            reference_voltage: 3.29,
            batch: SampleBatch::new(vec![vec![500, 520]; CHANNEL_COUNT], vec![400, 600]),
        };
        dump.save(&path).unwrap();

        let mut sampler = ReplaySampler::from_dump(SampleDump::load(&path).unwrap());
        for _ in 0..3 {
            let batch = sampler.collect(2).unwrap();
            assert_eq!(batch.voltage, vec![400, 600]);
            assert_eq!(batch.currents[5], vec![500, 520]);
        }
    }
}
