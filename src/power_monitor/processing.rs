use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use super::average::average_samples;
use super::config::PowerMonitorConfig;
use super::error::PowerMonitorError;
use super::power::calculate_power;
use super::sampler::Sampler;
use super::sink::MetricsSink;
use super::types::*;
use super::waveform::rebuild_waves;

/// Continuous acquisition loop: sample, correct, measure, average, publish.
pub struct PowerMonitor<S: Sampler> {
    config: PowerMonitorConfig,
    sampler: S,
    sinks: Vec<Box<dyn MetricsSink>>,
    window: VecDeque<MetricsRecord>,
    last: Option<MetricsRecord>,
}

impl<S: Sampler> PowerMonitor<S> {
    pub fn new(config: PowerMonitorConfig, sampler: S) -> Result<Self, PowerMonitorError> {
        config.validate()?;
        let window = VecDeque::with_capacity(config.average_samples);
        Ok(Self {
            config,
            sampler,
            sinks: Vec::new(),
            window,
            last: None,
        })
    }

    pub fn add_sink(&mut self, sink: Box<dyn MetricsSink>) {
        self.sinks.push(sink);
    }

    pub fn config(&self) -> &PowerMonitorConfig {
        &self.config
    }

    pub fn sampler_mut(&mut self) -> &mut S {
        &mut self.sampler
    }

    /// Most recent single-batch record.
    pub fn last_record(&self) -> Option<&MetricsRecord> {
        self.last.as_ref()
    }

    /*
    * @brief Turn one raw batch into a metrics record.
    * @param batch Raw samples of one acquisition cycle
    * @param reference_voltage Board reference reading taken with the batch
    */
    pub fn process_batch(&self, batch: &SampleBatch, reference_voltage: f64) -> Result<MetricsRecord, PowerMonitorError> {
        let waves = rebuild_waves(batch, &self.config.phase_correction)?;
        let scaling = ScalingFactors::new(&self.config, reference_voltage);
        calculate_power(&waves, &scaling)
    }

    /*
    * @brief Run one acquisition cycle.
    * @return The averaged record once the window is full, None while it is still filling
    * @note Once full, every cycle drops the oldest record and publishes a fresh average.
    */
    pub fn step(&mut self) -> Result<Option<MetricsRecord>, PowerMonitorError> {
        let batch = self.sampler.collect(self.config.samples_per_batch)?;
        let reference_voltage = self.sampler.reference_voltage()?;
        let record = self.process_batch(&batch, reference_voltage)?;

        if self.window.len() == self.config.average_samples {
            self.window.pop_front();
        }
        self.window.push_back(record.clone());
        self.last = Some(record);

        if self.window.len() < self.config.average_samples {
            log::trace!("Averaging window {}/{}", self.window.len(), self.config.average_samples);
            return Ok(None);
        }

        let averaged = average_samples(self.window.make_contiguous())?;
        for sink in self.sinks.iter_mut() {
            sink.write(&averaged)?;
        }

        Ok(Some(averaged))
    }

    /// Loops until `stop` is raised. Checked between batches.
    pub fn run(&mut self, stop: &AtomicBool) -> Result<usize, PowerMonitorError> {
        let mut cycles = 0;
        log::info!("Starting continuous monitoring");

        while !stop.load(Ordering::Relaxed) {
            self.step()?;
            cycles += 1;
        }

        log::info!("Stopped after {} cycles", cycles);
        Ok(cycles)
    }
}
