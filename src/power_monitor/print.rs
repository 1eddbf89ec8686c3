use log::Level;

use super::phase_calibration::Recommendation;
use super::types::MetricsRecord;

/*
* @brief Format a metrics record as a table, one column per CT channel.
* @param results Averaged or single-batch metrics record
*/
pub fn format_results(results: &MetricsRecord) -> String {
    let mut header = format!("{:<10}", "");
    let mut watts = format!("{:<10}", "Watts");
    let mut current = format!("{:<10}", "Current");
    let mut pf = format!("{:<10}", "P.F.");

    for channel in &results.channels {
        header.push_str(&format!("{:>10}", channel.channel.to_string().to_uppercase()));
        watts.push_str(&format!("{:>10.3}", channel.power));
        current.push_str(&format!("{:>10.3}", channel.current));
        pf.push_str(&format!("{:>10.3}", channel.power_factor));
    }

    let voltage = format!("{:<10}{:>10.3}", "Voltage", results.voltage);

    [header, watts, current, pf, voltage].join("\n")
}

pub fn print_results(results: &MetricsRecord, level: Level) {
    for line in format_results(results).lines() {
        log::log!(level, "{}", line);
    }
}

/*
* @brief Print the outcome of a phase calibration session.
* @param recommendation Recommended coefficient and the band it came from
*/
pub fn print_recommendation(recommendation: &Recommendation) {
    log::info!("Phase calibration for {}:", recommendation.channel);
    log::info!("  Best power factor: {:.4}", recommendation.power_factor);
    log::info!(
        "  Best band: {} candidates between {:.3} and {:.3}",
        recommendation.best_band.len(),
        recommendation.best_band.first().map(|c| c.coefficient).unwrap_or_default(),
        recommendation.best_band.last().map(|c| c.coefficient).unwrap_or_default()
    );
    log::info!(
        "Please update the value for {} in phase_correction with the following value: {}",
        recommendation.channel,
        recommendation.display_coefficient
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::power_monitor::types::{ChannelId, ChannelMetrics};

    #[test]
    fn table_has_a_column_per_channel() {
        let record = MetricsRecord {
            channels: ChannelId::all()
                .map(|channel| ChannelMetrics {
                    channel,
                    power: 10.0,
                    current: 0.5,
                    voltage: 120.0,
                    power_factor: 0.95,
                })
                .collect(),
            voltage: 120.0,
        };

        let table = format_results(&record);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[0].contains("CT0") && lines[0].contains("CT5"));
        assert_eq!(lines[3].matches("0.950").count(), 6);
        assert!(lines[4].contains("120.000"));
    }
}
