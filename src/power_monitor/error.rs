use thiserror::Error;

use super::types::ChannelId;

#[derive(Debug, Error)]
pub enum PowerMonitorError {
    #[error("sample batch is empty")]
    EmptyBatch,
    #[error("sequence length mismatch on {channel}: expected {expected}, got {actual}")]
    LengthMismatch {
        channel: String,
        expected: usize,
        actual: usize,
    },
    #[error("channel count mismatch: expected {expected}, got {actual}")]
    ChannelMismatch { expected: usize, actual: usize },
    #[error("metrics records do not share the same channel set")]
    ShapeMismatch,
    #[error("cannot average an empty window")]
    EmptyWindow,
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("sampler failure: {0}")]
    Sampler(String),
    #[error("metrics sink failure: {0}")]
    Sink(String),
    #[error("calibration aborted: {0}")]
    CalibrationAborted(#[from] CalibrationAbort),
    #[error("calibration step `{action}` is not valid while {state}")]
    InvalidTransition { action: &'static str, state: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Fatal outcomes of a phase calibration session.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CalibrationAbort {
    #[error("channel {0} does not exist, choose from 0 to 5")]
    InvalidChannel(usize),
    #[error("operator did not confirm a resistive load on the sensor")]
    LoadNotConfirmed,
    #[error("{channel} still reads a negative power factor ({power_factor:.3}) after reversal; is this a resistive load?")]
    SensorReversed { channel: ChannelId, power_factor: f64 },
    #[error("{0} reads no load current; is the load switched on?")]
    NoSignal(ChannelId),
    #[error("phase search produced no candidates")]
    NoCandidates,
}
