use super::error::PowerMonitorError;
use super::types::*;

/// Field-wise accumulation used to average records of identical shape.
pub trait Accumulate: Sized + Clone {
    /// Adds `other` into `self`, failing when the shapes differ.
    fn accumulate(&mut self, other: &Self) -> Result<(), PowerMonitorError>;

    fn divide(&mut self, count: f64);
}

impl Accumulate for f64 {
    fn accumulate(&mut self, other: &Self) -> Result<(), PowerMonitorError> {
        *self += *other;
        Ok(())
    }

    fn divide(&mut self, count: f64) {
        *self /= count;
    }
}

impl Accumulate for ChannelMetrics {
    fn accumulate(&mut self, other: &Self) -> Result<(), PowerMonitorError> {
        if self.channel != other.channel {
            return Err(PowerMonitorError::ShapeMismatch);
        }
        self.power.accumulate(&other.power)?;
        self.current.accumulate(&other.current)?;
        self.voltage.accumulate(&other.voltage)?;
        self.power_factor.accumulate(&other.power_factor)
    }

    fn divide(&mut self, count: f64) {
        self.power.divide(count);
        self.current.divide(count);
        self.voltage.divide(count);
        self.power_factor.divide(count);
    }
}

impl Accumulate for MetricsRecord {
    fn accumulate(&mut self, other: &Self) -> Result<(), PowerMonitorError> {
        if self.channels.len() != other.channels.len() {
            return Err(PowerMonitorError::ShapeMismatch);
        }
        for (mine, theirs) in self.channels.iter_mut().zip(other.channels.iter()) {
            mine.accumulate(theirs)?;
        }
        self.voltage.accumulate(&other.voltage)
    }

    fn divide(&mut self, count: f64) {
        for channel in self.channels.iter_mut() {
            channel.divide(count);
        }
        self.voltage.divide(count);
    }
}

/*
* @brief Average a window of records leaf by leaf.
* @param samples Window of records sharing the same channel set
* @return Record whose every numeric field is the arithmetic mean of the window
* @note Fails on an empty window or on records with different channel sets.
*/
pub fn average_samples<T: Accumulate>(samples: &[T]) -> Result<T, PowerMonitorError> {
    let (first, rest) = samples.split_first().ok_or(PowerMonitorError::EmptyWindow)?;

    let mut averaged = first.clone();
    for sample in rest {
        averaged.accumulate(sample)?;
    }
    averaged.divide(samples.len() as f64);

    Ok(averaged)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(scale: f64) -> MetricsRecord {
        MetricsRecord {
            channels: ChannelId::all()
                .map(|channel| ChannelMetrics {
                    channel,
                    power: 100.0 * scale + channel.0 as f64,
                    current: 1.5 * scale,
                    voltage: 120.0 * scale,
                    power_factor: 0.9,
                })
                .collect(),
            voltage: 120.0 * scale,
        }
    }

    #[test]
    fn identical_records_average_to_themselves() {
        let sample = record(1.0);
        let window = vec![sample.clone(); 5];
        let averaged = average_samples(&window).unwrap();

        for (a, b) in averaged.channels.iter().zip(sample.channels.iter()) {
            assert_eq!(a.channel, b.channel);
            assert!((a.power - b.power).abs() < 1e-9);
            assert!((a.current - b.current).abs() < 1e-12);
            assert!((a.power_factor - b.power_factor).abs() < 1e-12);
        }
        assert!((averaged.voltage - sample.voltage).abs() < 1e-9);
    }

    #[test]
    fn averages_every_leaf() {
        let averaged = average_samples(&[record(1.0), record(2.0), record(3.0)]).unwrap();
        assert!((averaged.voltage - 240.0).abs() < 1e-9);
        assert!((averaged.channels[2].power - 202.0).abs() < 1e-9);
        assert!((averaged.channels[5].current - 3.0).abs() < 1e-12);
    }

    #[test]
    fn rejects_different_channel_sets() {
        let mut other = record(1.0);
        other.channels.pop();
        assert!(matches!(
            average_samples(&[record(1.0), other]),
            Err(PowerMonitorError::ShapeMismatch)
        ));

        let mut swapped = record(1.0);
        swapped.channels.swap(0, 1);
        assert!(average_samples(&[record(1.0), swapped]).is_err());
    }

    #[test]
    fn rejects_empty_window() {
        let window: Vec<MetricsRecord> = Vec::new();
        assert!(matches!(average_samples(&window), Err(PowerMonitorError::EmptyWindow)));
    }
}
