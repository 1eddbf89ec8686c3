use super::error::PowerMonitorError;
use super::types::*;

/// Running sums for one channel, filled in a single pass over the samples.
#[derive(Debug, Default, Clone, Copy)]
struct ChannelAccumulator {
    samples: usize,
    sum_current: f64,
    sum_voltage: f64,
    sum_inst_power: f64,
    sum_squared_current: f64,
    sum_squared_voltage: f64,
}

impl ChannelAccumulator {
    #[inline]
    fn push(&mut self, current: f64, voltage: f64) {
        self.samples += 1;
        self.sum_current += current;
        self.sum_voltage += voltage;
        self.sum_inst_power += current * voltage;
        self.sum_squared_current += current * current;
        self.sum_squared_voltage += voltage * voltage;
    }

    /*
    * @brief Combine the sums into physical quantities.
    * @param channel Channel the sums belong to
    * @param current_factor Raw-code to amps multiplier
    * @param voltage_factor Raw-code to volts multiplier
    * @note Means of both signals are subtracted so the ADC mid-scale offset never reaches the result.
    */
    fn finish(&self, channel: ChannelId, current_factor: f64, voltage_factor: f64) -> ChannelMetrics {
        if self.samples == 0 {
            return ChannelMetrics::zero(channel);
        }

        let n = self.samples as f64;
        let avg_current = self.sum_current / n;
        let avg_voltage = self.sum_voltage / n;

        let mean_inst_power = self.sum_inst_power / n - avg_current * avg_voltage;
        let power = mean_inst_power * current_factor * voltage_factor;

        let rms_current = variance_to_rms(self.sum_squared_current / n - avg_current * avg_current) * current_factor;
        let rms_voltage = variance_to_rms(self.sum_squared_voltage / n - avg_voltage * avg_voltage) * voltage_factor;

        let apparent_power = rms_voltage * rms_current;

        ChannelMetrics {
            channel,
            power,
            current: rms_current,
            voltage: rms_voltage,
            power_factor: calculate_power_factor_from_apparent_and_real_power(apparent_power, power),
        }
    }
}

// Cancellation can leave a tiny negative variance for flat signals.
fn variance_to_rms(variance: f64) -> f64 {
    if variance > 0.0 {
        variance.sqrt()
    } else {
        0.0
    }
}

pub fn calculate_power_factor_from_apparent_and_real_power(apparent_power: f64, real_power: f64) -> f64 {
    if apparent_power != 0.0 {
        real_power / apparent_power
    } else {
        //cannot calculate power factor
        0.0
    }
}

/*
* @brief Compute real power, RMS current, RMS voltage and power factor of one channel.
* @param channel Channel being measured
* @param current Raw current codes
* @param voltage Phase-corrected voltage wave for this channel
* @param current_factor Raw-code to amps multiplier
* @param voltage_factor Raw-code to volts multiplier
*/
pub fn calculate_channel_power(
    channel: ChannelId,
    current: &[i32],
    voltage: &[f64],
    current_factor: f64,
    voltage_factor: f64,
) -> Result<ChannelMetrics, PowerMonitorError> {
    if voltage.is_empty() {
        return Err(PowerMonitorError::EmptyBatch);
    }
    if current.len() != voltage.len() {
        return Err(PowerMonitorError::LengthMismatch {
            channel: channel.to_string(),
            expected: voltage.len(),
            actual: current.len(),
        });
    }

    let mut acc = ChannelAccumulator::default();
    for (&i, &v) in current.iter().zip(voltage.iter()) {
        acc.push(i as f64, v);
    }

    Ok(acc.finish(channel, current_factor, voltage_factor))
}

/*
* @brief Phase corrected power calculation for every CT channel.
* @param waves Current samples and corrected voltage waves of one batch
* @param scaling Multipliers derived from the live reference-voltage reading
* @return Metrics record; the shared voltage is channel 0's RMS voltage
*/
pub fn calculate_power(waves: &ReconstructedWaveforms, scaling: &ScalingFactors) -> Result<MetricsRecord, PowerMonitorError> {
    if waves.currents.len() != CHANNEL_COUNT || waves.corrected_voltages.len() != CHANNEL_COUNT {
        return Err(PowerMonitorError::ChannelMismatch {
            expected: CHANNEL_COUNT,
            actual: waves.currents.len().min(waves.corrected_voltages.len()),
        });
    }

    let channels = ChannelId::all()
        .map(|channel| {
            let (current, voltage) = waves.channel(channel);
            calculate_channel_power(channel, current, voltage, scaling.current_factor(channel), scaling.voltage)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let voltage = channels[0].voltage;

    Ok(MetricsRecord { channels, voltage })
}
