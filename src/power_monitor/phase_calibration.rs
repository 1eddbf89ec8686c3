//! Phase-correction calibration.
//!
//! With a purely resistive load on one CT, the true power factor is 1, so the
//! coefficient that maximises the measured power factor is the one that best
//! cancels the sampling skew between the voltage and that CT.
//!
//! The session is an explicit state machine:
//!
//! ```text
//! AwaitChannelSelection -> AwaitLoadConfirmation -> PolarityCheck
//!     -> [ReversalPrompt -> PolarityRecheck] -> Search -> Recommend
//! ```
//!
//! Any state may end in `Aborted`. [`run_calibration`] drives it from a
//! [`Sampler`] and a [`CalibrationOperator`]; tests can call the transitions
//! directly.

use std::fmt;

use serde::Serialize;

use super::config::{PhaseSearchConfig, PowerMonitorConfig};
use super::error::{CalibrationAbort, PowerMonitorError};
use super::power::calculate_channel_power;
use super::sampler::Sampler;
use super::types::*;
use super::waveform::{rebuild_channel_wave, rebuild_wave};

/// Coefficient used to re-check polarity after the operator reversed a CT.
const RECHECK_PHASECAL: f64 = 1.0;

pub fn round_to(value: f64, digits: u32) -> f64 {
    let scale = 10f64.powi(digits as i32);
    (value * scale).round() / scale
}

/// Power factor of one channel for one candidate coefficient.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PhaseCandidate {
    pub coefficient: f64,
    pub power_factor: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    pub channel: ChannelId,
    pub coefficient: f64,         // Mean of the best band
    pub display_coefficient: f64, // Rounded for the operator
    pub power_factor: f64,        // Highest power factor seen during the search
    pub best_band: Vec<PhaseCandidate>,
    pub waveform: ReconstructedWave, // Current and voltage corrected with `coefficient`
}

/*
* @brief Power factor of a channel with its voltage wave shifted by `phasecal`.
* @param current Raw current codes of the channel under test
* @param voltage Raw voltage codes of the same batch
* @param phasecal Candidate phase correction coefficient
* @param current_factor Raw-code to amps multiplier of the channel
* @param voltage_factor Raw-code to volts multiplier
*/
pub fn check_phasecal(
    channel: ChannelId,
    current: &[i32],
    voltage: &[i32],
    phasecal: f64,
    current_factor: f64,
    voltage_factor: f64,
) -> Result<ChannelMetrics, PowerMonitorError> {
    let corrected = rebuild_wave(voltage, phasecal);
    calculate_channel_power(channel, current, &corrected, current_factor, voltage_factor)
}

/*
* @brief Sweep the candidate grid and keep the band of best power factors.
* @param search Candidate range and rounding precision
* @return Candidates whose power factor rounds to the rounded maximum, in ascending coefficient order
* @note Every candidate costs one reconstruction plus one accumulation pass.
*/
pub fn find_phasecal(
    channel: ChannelId,
    current: &[i32],
    voltage: &[i32],
    current_factor: f64,
    voltage_factor: f64,
    search: &PhaseSearchConfig,
) -> Result<Vec<PhaseCandidate>, PowerMonitorError> {
    let results = search
        .candidates()
        .into_iter()
        .map(|coefficient| {
            check_phasecal(channel, current, voltage, coefficient, current_factor, voltage_factor).map(|metrics| {
                PhaseCandidate {
                    coefficient,
                    power_factor: metrics.power_factor,
                }
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let scale = 10f64.powi(search.pf_rounding_digits as i32);
    let rounded = |pf: f64| (pf * scale).round() as i64;

    let max_pf = results
        .iter()
        .map(|c| rounded(c.power_factor))
        .max()
        .ok_or(CalibrationAbort::NoCandidates)?;

    Ok(results.into_iter().filter(|c| rounded(c.power_factor) == max_pf).collect())
}

/// Mean coefficient of the best band.
pub fn recommend_phasecal(best_band: &[PhaseCandidate]) -> Result<f64, PowerMonitorError> {
    if best_band.is_empty() {
        return Err(CalibrationAbort::NoCandidates.into());
    }
    Ok(best_band.iter().map(|c| c.coefficient).sum::<f64>() / best_band.len() as f64)
}

/// Corrected multiplier from a reference-meter reading.
pub fn suggest_accuracy_factor(measured: f64, actual: f64, current_factor: f64) -> Result<f64, PowerMonitorError> {
    if measured <= 0.0 {
        return Err(PowerMonitorError::InvalidConfig(format!(
            "cannot calibrate against a measured value of {measured}"
        )));
    }
    Ok(current_factor * actual / measured)
}

#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationState {
    AwaitChannelSelection,
    AwaitLoadConfirmation(ChannelId),
    PolarityCheck(ChannelId),
    ReversalPrompt(ChannelId),
    PolarityRecheck(ChannelId),
    Search(ChannelId),
    Recommend(ChannelId),
    Aborted(CalibrationAbort),
}

impl fmt::Display for CalibrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalibrationState::AwaitChannelSelection => write!(f, "awaiting channel selection"),
            CalibrationState::AwaitLoadConfirmation(ct) => write!(f, "awaiting load confirmation for {ct}"),
            CalibrationState::PolarityCheck(ct) => write!(f, "checking polarity of {ct}"),
            CalibrationState::ReversalPrompt(ct) => write!(f, "waiting for {ct} to be reversed"),
            CalibrationState::PolarityRecheck(ct) => write!(f, "re-checking polarity of {ct}"),
            CalibrationState::Search(ct) => write!(f, "searching phase correction for {ct}"),
            CalibrationState::Recommend(ct) => write!(f, "recommendation ready for {ct}"),
            CalibrationState::Aborted(reason) => write!(f, "aborted ({reason})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PolarityOutcome {
    Correct { power_factor: f64 },
    Reversed { power_factor: f64 },
}

/// One calibration session. Transitions are only valid from their own state.
pub struct CalibrationSession {
    config: PowerMonitorConfig,
    state: CalibrationState,
    recommendation: Option<Recommendation>,
}

impl CalibrationSession {
    pub fn new(config: &PowerMonitorConfig) -> Result<Self, PowerMonitorError> {
        config.validate()?;
        Ok(Self {
            config: config.clone(),
            state: CalibrationState::AwaitChannelSelection,
            recommendation: None,
        })
    }

    pub fn state(&self) -> &CalibrationState {
        &self.state
    }

    pub fn recommendation(&self) -> Option<&Recommendation> {
        self.recommendation.as_ref()
    }

    fn invalid(&self, action: &'static str) -> PowerMonitorError {
        PowerMonitorError::InvalidTransition {
            action,
            state: self.state.to_string(),
        }
    }

    fn abort(&mut self, reason: CalibrationAbort) -> PowerMonitorError {
        log::error!("Calibration aborted: {}", reason);
        self.state = CalibrationState::Aborted(reason.clone());
        PowerMonitorError::CalibrationAborted(reason)
    }

    fn factors(&self, channel: ChannelId, reference_voltage: f64) -> (f64, f64) {
        let scaling = ScalingFactors::new(&self.config, reference_voltage);
        (scaling.current_factor(channel), scaling.voltage)
    }

    fn power_factor(&self, channel: ChannelId, batch: &SampleBatch, reference_voltage: f64, phasecal: f64) -> Result<f64, PowerMonitorError> {
        batch.validate()?;
        let (current_factor, voltage_factor) = self.factors(channel, reference_voltage);
        let metrics = check_phasecal(channel, batch.current(channel), &batch.voltage, phasecal, current_factor, voltage_factor)?;
        Ok(metrics.power_factor)
    }

    pub fn select_channel(&mut self, index: usize) -> Result<ChannelId, PowerMonitorError> {
        if self.state != CalibrationState::AwaitChannelSelection {
            return Err(self.invalid("select_channel"));
        }
        match ChannelId::new(index) {
            Some(channel) => {
                self.state = CalibrationState::AwaitLoadConfirmation(channel);
                Ok(channel)
            }
            None => Err(self.abort(CalibrationAbort::InvalidChannel(index))),
        }
    }

    pub fn confirm_load(&mut self, confirmed: bool) -> Result<(), PowerMonitorError> {
        let CalibrationState::AwaitLoadConfirmation(channel) = self.state else {
            return Err(self.invalid("confirm_load"));
        };
        if !confirmed {
            return Err(self.abort(CalibrationAbort::LoadNotConfirmed));
        }
        self.state = CalibrationState::PolarityCheck(channel);
        Ok(())
    }

    /*
    * @brief Check CT orientation at the configured coefficient.
    * @return Reversed when the power factor is negative; the operator must then reverse the CT.
    */
    pub fn check_polarity(&mut self, batch: &SampleBatch, reference_voltage: f64) -> Result<PolarityOutcome, PowerMonitorError> {
        let CalibrationState::PolarityCheck(channel) = self.state else {
            return Err(self.invalid("check_polarity"));
        };

        let power_factor = self.power_factor(channel, batch, reference_voltage, self.config.phase_coefficient(channel))?;
        log::debug!("{} initial power factor {:.4}", channel, power_factor);

        if power_factor == 0.0 {
            return Err(self.abort(CalibrationAbort::NoSignal(channel)));
        }
        if power_factor < 0.0 {
            self.state = CalibrationState::ReversalPrompt(channel);
            Ok(PolarityOutcome::Reversed { power_factor })
        } else {
            self.state = CalibrationState::Search(channel);
            Ok(PolarityOutcome::Correct { power_factor })
        }
    }

    pub fn acknowledge_reversal(&mut self) -> Result<(), PowerMonitorError> {
        let CalibrationState::ReversalPrompt(channel) = self.state else {
            return Err(self.invalid("acknowledge_reversal"));
        };
        self.state = CalibrationState::PolarityRecheck(channel);
        Ok(())
    }

    pub fn recheck_polarity(&mut self, batch: &SampleBatch, reference_voltage: f64) -> Result<f64, PowerMonitorError> {
        let CalibrationState::PolarityRecheck(channel) = self.state else {
            return Err(self.invalid("recheck_polarity"));
        };

        let power_factor = self.power_factor(channel, batch, reference_voltage, RECHECK_PHASECAL)?;
        if power_factor == 0.0 {
            return Err(self.abort(CalibrationAbort::NoSignal(channel)));
        }
        if power_factor < 0.0 {
            return Err(self.abort(CalibrationAbort::SensorReversed { channel, power_factor }));
        }

        self.state = CalibrationState::Search(channel);
        Ok(power_factor)
    }

    /*
    * @brief Run the coefficient sweep and build the recommendation.
    * @param batch Fresh batch captured with the resistive load running
    * @param reference_voltage Reference reading taken with the batch
    * @note The result is advisory; the configuration is never modified.
    */
    pub fn search(&mut self, batch: &SampleBatch, reference_voltage: f64) -> Result<&Recommendation, PowerMonitorError> {
        let CalibrationState::Search(channel) = self.state else {
            return Err(self.invalid("search"));
        };
        batch.validate()?;

        let (current_factor, voltage_factor) = self.factors(channel, reference_voltage);
        let current = batch.current(channel);

        let best_band = match find_phasecal(channel, current, &batch.voltage, current_factor, voltage_factor, &self.config.phase_search) {
            Ok(band) => band,
            Err(PowerMonitorError::CalibrationAborted(reason)) => return Err(self.abort(reason)),
            Err(e) => return Err(e),
        };
        let coefficient = recommend_phasecal(&best_band)?;
        let power_factor = best_band.iter().map(|c| c.power_factor).fold(f64::MIN, f64::max);
        if power_factor <= 0.0 {
            return Err(self.abort(CalibrationAbort::NoSignal(channel)));
        }

        log::info!(
            "{}: {} candidates share the best power factor {:.4}",
            channel,
            best_band.len(),
            power_factor
        );

        let recommendation = Recommendation {
            channel,
            coefficient,
            display_coefficient: round_to(coefficient, self.config.phase_search.display_digits),
            power_factor,
            best_band,
            waveform: rebuild_channel_wave(current, &batch.voltage, coefficient)?,
        };

        self.state = CalibrationState::Recommend(channel);
        Ok(&*self.recommendation.insert(recommendation))
    }
}

/// The person (or script) on the other side of a calibration session.
pub trait CalibrationOperator {
    fn select_channel(&mut self) -> Result<usize, PowerMonitorError>;

    /// Asks whether a purely resistive load is on `channel` and running.
    fn confirm_load(&mut self, channel: ChannelId) -> Result<bool, PowerMonitorError>;

    /// Returns once the CT on `channel` has been clipped on the other way.
    fn reverse_sensor(&mut self, channel: ChannelId, power_factor: f64) -> Result<(), PowerMonitorError>;
}

/// Pre-recorded answers for unattended runs.
#[derive(Debug, Clone)]
pub struct ScriptedOperator {
    pub channel: usize,
    pub confirm_load: bool,
    pub reversals: usize,
}

impl ScriptedOperator {
    pub fn new(channel: usize) -> Self {
        Self {
            channel,
            confirm_load: true,
            reversals: 0,
        }
    }
}

impl CalibrationOperator for ScriptedOperator {
    fn select_channel(&mut self) -> Result<usize, PowerMonitorError> {
        Ok(self.channel)
    }

    fn confirm_load(&mut self, _channel: ChannelId) -> Result<bool, PowerMonitorError> {
        Ok(self.confirm_load)
    }

    fn reverse_sensor(&mut self, _channel: ChannelId, _power_factor: f64) -> Result<(), PowerMonitorError> {
        self.reversals += 1;
        Ok(())
    }
}

fn acquire<S: Sampler>(sampler: &mut S, samples: usize) -> Result<(SampleBatch, f64), PowerMonitorError> {
    let batch = sampler.collect(samples)?;
    let reference_voltage = sampler.reference_voltage()?;
    Ok((batch, reference_voltage))
}

/*
* @brief Drive a session from selection to recommendation.
* @param session Fresh session
* @param sampler Source of batches; one batch per polarity check and one for the search
* @param operator Answers the prompts
* @param samples Samples per channel for every batch
*/
pub fn run_calibration<S: Sampler, O: CalibrationOperator>(
    session: &mut CalibrationSession,
    sampler: &mut S,
    operator: &mut O,
    samples: usize,
) -> Result<Recommendation, PowerMonitorError> {
    let channel = session.select_channel(operator.select_channel()?)?;
    session.confirm_load(operator.confirm_load(channel)?)?;

    let (batch, reference_voltage) = acquire(sampler, samples)?;
    if let PolarityOutcome::Reversed { power_factor } = session.check_polarity(&batch, reference_voltage)? {
        log::warn!("{} is installed backwards (power factor {:.3})", channel, power_factor);
        operator.reverse_sensor(channel, power_factor)?;
        session.acknowledge_reversal()?;

        let (batch, reference_voltage) = acquire(sampler, samples)?;
        session.recheck_polarity(&batch, reference_voltage)?;
    }

    let (batch, reference_voltage) = acquire(sampler, samples)?;
    Ok(session.search(&batch, reference_voltage)?.clone())
}
