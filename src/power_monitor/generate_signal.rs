use ndarray::Array1;
use rand::Rng;
use std::f64::consts::PI;

use super::types::*;

pub const FS: f64 = 4000.0; // Per-channel sampling frequency of the multiplexed ADC
pub const F: f64 = 50.0; // Grid frequency in Hz
pub const ADC_MIDPOINT: f64 = 512.0; // Bias point of the AC inputs

/// One simulated CT input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelSignal {
    pub amplitude: f64,      // Peak current in ADC codes, negative when the CT is clipped on backwards
    pub load_angle_deg: f64, // Current lag behind voltage (0 for a resistive load)
    pub skew: f64,           // Sampling instant after the voltage sample, in sample periods
}

impl Default for ChannelSignal {
    fn default() -> Self {
        Self {
            amplitude: 0.0,
            load_angle_deg: 0.0,
            skew: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignalParams {
    pub sample_rate_hz: f64,
    pub frequency_hz: f64,
    pub samples: usize,
    pub midpoint: f64,
    pub full_scale: f64,
    pub voltage_amplitude: f64, // Peak voltage in ADC codes
    pub channels: Vec<ChannelSignal>,
    pub noise: f64, // Peak uniform noise in ADC codes
}

impl Default for SignalParams {
    fn default() -> Self {
        Self {
            sample_rate_hz: FS,
            frequency_hz: F,
            samples: SAMPLES_PER_BATCH,
            midpoint: ADC_MIDPOINT,
            full_scale: ADC_FULL_SCALE,
            voltage_amplitude: 400.0,
            channels: vec![ChannelSignal::default(); CHANNEL_COUNT],
            noise: 0.0,
        }
    }
}

fn offset(deg: f64) -> f64 {
    deg * 2.0 * PI / 360.0
}

fn to_code(value: f64, full_scale: f64) -> i32 {
    value.round().clamp(0.0, full_scale - 1.0) as i32
}

/*
* @brief Generate one multiplexed batch of a sinusoidal grid.
* @param params Amplitudes, skews and sampling setup
* @param start_s Time of the first voltage sample, in seconds
* @param rng Noise source
* @return Batch with the voltage and every CT channel quantised to ADC codes
*/
pub fn generate_signals<R: Rng>(params: &SignalParams, start_s: f64, rng: &mut R) -> SampleBatch {
    let samples = Array1::range(0.0, params.samples as f64, 1.0);
    let omega = 2.0 * PI * params.frequency_hz / params.sample_rate_hz;
    let start = 2.0 * PI * params.frequency_hz * start_s;

    let mut noise = |scale: f64| {
        if scale > 0.0 {
            rng.gen_range(-scale..scale)
        } else {
            0.0
        }
    };

    let voltage: Vec<i32> = samples
        .iter()
        .map(|&s| {
            let v = params.midpoint + params.voltage_amplitude * (start + omega * s).sin() + noise(params.noise);
            to_code(v, params.full_scale)
        })
        .collect();

    let currents: Vec<Vec<i32>> = params
        .channels
        .iter()
        .map(|channel| {
            samples
                .iter()
                .map(|&s| {
                    let angle = start + omega * (s + channel.skew) - offset(channel.load_angle_deg);
                    let i = params.midpoint + channel.amplitude * angle.sin() + noise(params.noise);
                    to_code(i, params.full_scale)
                })
                .collect()
        })
        .collect();

    SampleBatch::new(currents, voltage)
}
