pub mod average;
pub mod config;
pub mod error;
pub mod generate_signal;
pub mod phase_calibration;
pub mod power;
pub mod print;
pub mod processing;
pub mod sampler;
pub mod sink;
pub mod types;
pub mod waveform;

pub use average::{average_samples, Accumulate};
pub use config::{AccuracyCalibration, PhaseSearchConfig, PowerMonitorConfig};
pub use error::{CalibrationAbort, PowerMonitorError};
pub use generate_signal::generate_signals;
pub use phase_calibration::{
    find_phasecal, recommend_phasecal, run_calibration, suggest_accuracy_factor, CalibrationOperator,
    CalibrationSession, CalibrationState, PhaseCandidate, PolarityOutcome, Recommendation, ScriptedOperator,
};
pub use power::{calculate_channel_power, calculate_power};
pub use processing::PowerMonitor;
pub use sampler::{board_voltage_from_codes, ReplaySampler, SampleDump, Sampler, SimulatedLoad, SimulatedSampler};
pub use sink::{JsonLinesSink, LogSink, MetricsSink};
pub use types::*;
pub use waveform::{rebuild_channel_wave, rebuild_wave, rebuild_waves};
