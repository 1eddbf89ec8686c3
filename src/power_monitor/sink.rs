use std::collections::BTreeMap;
use std::io::Write;
use std::time::{SystemTime, UNIX_EPOCH};

use log::Level;
use serde::Serialize;

use super::error::PowerMonitorError;
use super::print::print_results;
use super::types::*;

/// Destination of averaged metrics records.
pub trait MetricsSink {
    fn write(&mut self, record: &MetricsRecord) -> Result<(), PowerMonitorError>;
}

#[derive(Debug, Serialize)]
struct Point {
    measurement: &'static str,
    tags: BTreeMap<&'static str, String>,
    fields: BTreeMap<&'static str, f64>,
    time: u64,
}

/// Writes one JSON point per line, stamped with the write time in milliseconds.
pub struct JsonLinesSink<W: Write> {
    writer: W,
    enabled_channels: Vec<ChannelId>,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W, enabled_channels: impl IntoIterator<Item = ChannelId>) -> Self {
        Self {
            writer,
            enabled_channels: enabled_channels.into_iter().collect(),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn points(&self, record: &MetricsRecord, time: u64) -> Vec<Point> {
        let mut points: Vec<Point> = record
            .channels
            .iter()
            .filter(|metrics| self.enabled_channels.contains(&metrics.channel))
            .map(|metrics| Point {
                measurement: "raw_cts",
                tags: BTreeMap::from([("ct", metrics.channel.0.to_string())]),
                fields: BTreeMap::from([
                    ("current", metrics.current),
                    ("power", metrics.power),
                    ("pf", metrics.power_factor),
                ]),
                time,
            })
            .collect();

        points.push(Point {
            measurement: "voltages",
            tags: BTreeMap::from([("v_input", "grid".to_string())]),
            fields: BTreeMap::from([("voltage", record.voltage)]),
            time,
        });

        points
    }
}

impl<W: Write> MetricsSink for JsonLinesSink<W> {
    fn write(&mut self, record: &MetricsRecord) -> Result<(), PowerMonitorError> {
        let time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| PowerMonitorError::Sink(e.to_string()))?
            .as_millis() as u64;

        for point in self.points(record, time) {
            serde_json::to_writer(&mut self.writer, &point)?;
            self.writer.write_all(b"\n")?;
        }
        self.writer.flush()?;

        Ok(())
    }
}

/// Logs every record as a table.
pub struct LogSink {
    level: Level,
}

impl LogSink {
    pub fn new(level: Level) -> Self {
        Self { level }
    }
}

impl MetricsSink for LogSink {
    fn write(&mut self, record: &MetricsRecord) -> Result<(), PowerMonitorError> {
        print_results(record, self.level);
        Ok(())
    }
}
