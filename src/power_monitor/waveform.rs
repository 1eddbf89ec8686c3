/* ----------------- Phase-Corrected Waveform Reconstruction ------------------ */

use super::error::PowerMonitorError;
use super::types::*;

/*
* @brief Shift a voltage wave by a fraction of a sample period.
* @param voltage Raw voltage samples
* @param phasecal Phase correction coefficient of the channel
* @return Corrected voltage wave, same length as the input
* @note Each point interpolates between the previous and current sample:
*       v'[i] = v[i-1] + phasecal * (v[i] - v[i-1]), v'[0] = v[0].
*       A coefficient of 1 returns the wave unchanged, 0 delays it by one sample.
*/
pub fn rebuild_wave(voltage: &[i32], phasecal: f64) -> Vec<f64> {
    let mut wave = Vec::with_capacity(voltage.len());

    let Some(&first) = voltage.first() else {
        return wave;
    };
    wave.push(first as f64);

    for pair in voltage.windows(2) {
        let previous = pair[0] as f64;
        let current = pair[1] as f64;
        wave.push(previous + phasecal * (current - previous));
    }

    wave
}

/*
* @brief Build one corrected voltage wave per CT channel from a batch.
* @param batch Raw samples of one acquisition cycle
* @param phase_correction One coefficient per channel, in channel order
* @return Original sequences plus the per-channel corrected voltage waves
*/
pub fn rebuild_waves(
    batch: &SampleBatch,
    phase_correction: &[f64],
) -> Result<ReconstructedWaveforms, PowerMonitorError> {
    batch.validate()?;

    if phase_correction.len() != CHANNEL_COUNT {
        return Err(PowerMonitorError::ChannelMismatch {
            expected: CHANNEL_COUNT,
            actual: phase_correction.len(),
        });
    }

    let corrected_voltages = phase_correction
        .iter()
        .map(|&phasecal| rebuild_wave(&batch.voltage, phasecal))
        .collect();

    Ok(ReconstructedWaveforms {
        voltage: batch.voltage.clone(),
        currents: batch.currents.clone(),
        corrected_voltages,
    })
}

/// Pairs one channel's current samples with its corrected voltage wave.
pub fn rebuild_channel_wave(current: &[i32], voltage: &[i32], phasecal: f64) -> Result<ReconstructedWave, PowerMonitorError> {
    if voltage.is_empty() {
        return Err(PowerMonitorError::EmptyBatch);
    }
    if current.len() != voltage.len() {
        return Err(PowerMonitorError::LengthMismatch {
            channel: "current".to_string(),
            expected: voltage.len(),
            actual: current.len(),
        });
    }

    Ok(ReconstructedWave {
        current: current.to_vec(),
        voltage: rebuild_wave(voltage, phasecal),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const WAVE: [i32; 6] = [512, 600, 700, 650, 500, 400];

    #[test]
    fn unity_coefficient_keeps_wave() {
        let rebuilt = rebuild_wave(&WAVE, 1.0);
        let expected: Vec<f64> = WAVE.iter().map(|&v| v as f64).collect();
        assert_eq!(rebuilt, expected);
    }

    #[test]
    fn zero_coefficient_delays_one_sample() {
        let rebuilt = rebuild_wave(&WAVE, 0.0);
        assert_eq!(rebuilt[0], 512.0);
        for i in 1..WAVE.len() {
            assert_eq!(rebuilt[i], WAVE[i - 1] as f64);
        }
    }

    #[test]
    fn fractional_coefficient_interpolates() {
        let rebuilt = rebuild_wave(&WAVE, 0.5);
        assert_eq!(rebuilt[1], 556.0);
        let rebuilt = rebuild_wave(&WAVE, 1.5);
        assert_eq!(rebuilt[2], 750.0);
    }

    #[test]
    fn short_waves_keep_their_length() {
        assert_eq!(rebuild_wave(&[42], 1.7), vec![42.0]);
        assert!(rebuild_wave(&[], 1.7).is_empty());
        assert_eq!(rebuild_wave(&WAVE, 0.3).len(), WAVE.len());
    }

    #[test]
    fn waves_use_each_channel_coefficient() {
        let batch = SampleBatch::new(vec![WAVE.to_vec(); CHANNEL_COUNT], WAVE.to_vec());
        let coefficients = [1.0, 0.0, 0.5, 1.0, 1.0, 2.0];
        let waves = rebuild_waves(&batch, &coefficients).unwrap();

        assert_eq!(waves.corrected_voltages.len(), CHANNEL_COUNT);
        assert_eq!(waves.corrected_voltages[1][1], 512.0);
        assert_eq!(waves.corrected_voltages[2][1], 556.0);
        assert_eq!(waves.corrected_voltages[5][1], 688.0);
        assert_eq!(waves.currents[0], WAVE.to_vec());
        assert_eq!(waves.voltage, WAVE.to_vec());
    }

    #[test]
    fn waves_reject_mismatched_input() {
        let batch = SampleBatch::new(vec![WAVE.to_vec(); CHANNEL_COUNT], WAVE.to_vec());
        assert!(rebuild_waves(&batch, &[1.0; 3]).is_err());
        assert!(rebuild_channel_wave(&WAVE[..3], &WAVE, 1.0).is_err());
    }
}
