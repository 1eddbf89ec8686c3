use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use ::power_monitor::*;

#[derive(Clone, Default)]
struct Collected(Rc<RefCell<Vec<MetricsRecord>>>);

impl MetricsSink for Collected {
    fn write(&mut self, record: &MetricsRecord) -> Result<(), PowerMonitorError> {
        self.0.borrow_mut().push(record.clone());
        Ok(())
    }
}

#[test]
fn resistive_load_on_every_channel_reads_unity_power_factor() {
    let config = PowerMonitorConfig::default();
    let mut sampler = SimulatedSampler::new(&config, 2024);
    for (k, load) in sampler.loads.iter_mut().enumerate() {
        load.rms_current = 2.0 + k as f64;
    }

    let mut monitor = PowerMonitor::new(config.clone(), sampler).unwrap();
    let batch = monitor.sampler_mut().collect(2000).unwrap();
    assert_eq!(batch.len(), 2000);
    let reference_voltage = monitor.sampler_mut().reference_voltage().unwrap();
    let record = monitor.process_batch(&batch, reference_voltage).unwrap();

    assert_eq!(record.channels.len(), CHANNEL_COUNT);
    for metrics in &record.channels {
        assert!((metrics.power_factor - 1.0).abs() < 0.01, "{} pf {}", metrics.channel, metrics.power_factor);
        assert!(
            (metrics.voltage - config.grid_voltage).abs() < config.grid_voltage * 0.01,
            "{} voltage {}",
            metrics.channel,
            metrics.voltage
        );
    }
    assert_eq!(record.voltage, record.channels[0].voltage);
}

#[test]
fn idle_inputs_read_zero_without_nan() {
    let config = PowerMonitorConfig::default();
    let mut sampler = SimulatedSampler::new(&config, 1);
    for load in sampler.loads.iter_mut() {
        load.rms_current = 0.0;
    }

    let mut monitor = PowerMonitor::new(config, sampler).unwrap();
    let batch = monitor.sampler_mut().collect(2000).unwrap();
    let record = monitor.process_batch(&batch, 3.3).unwrap();

    for metrics in &record.channels {
        assert_eq!(metrics.power, 0.0);
        assert_eq!(metrics.current, 0.0);
        assert_eq!(metrics.power_factor, 0.0);
    }
    assert!(record.voltage > 0.0);
}

#[test]
fn averaged_records_reach_every_sink() {
    let config = PowerMonitorConfig::default();
    let sampler = SimulatedSampler::new(&config, 77);
    let mut monitor = PowerMonitor::new(config.clone(), sampler).unwrap();

    let collected = Collected::default();
    monitor.add_sink(Box::new(collected.clone()));

    for _ in 0..config.average_samples + 2 {
        monitor.step().unwrap();
    }

    let records = collected.0.borrow();
    assert_eq!(records.len(), 3);
    for record in records.iter() {
        assert!(record.channels.iter().all(|c| (c.current - 5.0).abs() < 0.1));
    }
}

#[test]
fn scripted_calibration_recovers_channel_skew() {
    let config = PowerMonitorConfig::default();
    let channel = ChannelId(5);
    let mut sampler = SimulatedSampler::new(&config, 3);
    sampler.loads[channel.index()].rms_current = 10.0;
    sampler.loads[channel.index()].skew = 0.8;

    let mut session = CalibrationSession::new(&config).unwrap();
    let mut operator = ScriptedOperator::new(5);
    let recommendation = run_calibration(&mut session, &mut sampler, &mut operator, 2000).unwrap();

    assert_eq!(recommendation.channel, channel);
    assert!((recommendation.coefficient - 1.8).abs() < 0.02, "coefficient {}", recommendation.coefficient);
    assert!(recommendation.power_factor > 0.99);

    // The recommended coefficient lines the channel up when applied.
    let mut tuned = config.clone();
    tuned.phase_correction[channel.index()] = recommendation.coefficient;
    let mut monitor = PowerMonitor::new(tuned, sampler).unwrap();
    let batch = monitor.sampler_mut().collect(2000).unwrap();
    let record = monitor.process_batch(&batch, 3.3).unwrap();
    assert!(record.channel(channel).unwrap().power_factor > 0.999);
}

#[test]
fn declined_load_ends_session_without_recommendation() {
    let config = PowerMonitorConfig::default();
    let mut sampler = SimulatedSampler::new(&config, 3);
    let mut operator = ScriptedOperator {
        confirm_load: false,
        ..ScriptedOperator::new(0)
    };
    let mut session = CalibrationSession::new(&config).unwrap();

    let err = run_calibration(&mut session, &mut sampler, &mut operator, 2000).unwrap_err();
    assert!(matches!(
        err,
        PowerMonitorError::CalibrationAborted(CalibrationAbort::LoadNotConfirmed)
    ));
    assert!(session.recommendation().is_none());
}

#[test]
fn config_and_dump_files_drive_a_replayed_run() {
    let dir = tempfile::tempdir().unwrap();

    let config_path = dir.path().join("config.json");
    let mut file = std::fs::File::create(&config_path).unwrap();
    write!(file, r#"{{ "average_samples": 2, "enabled_channels": [0, 1] }}"#).unwrap();
    let config = PowerMonitorConfig::load(&config_path).unwrap();
    assert_eq!(config.average_samples, 2);

    let mut simulated = SimulatedSampler::new(&config, 8);
    let dump = SampleDump {
        reference_voltage: simulated.reference_voltage().unwrap(),
        batch: simulated.collect(config.samples_per_batch).unwrap(),
    };
    let dump_path = dir.path().join("last-debug.json");
    dump.save(&dump_path).unwrap();

    let sampler = ReplaySampler::from_dump(SampleDump::load(&dump_path).unwrap());
    let mut monitor = PowerMonitor::new(config.clone(), sampler).unwrap();

    let output_path = dir.path().join("points.jsonl");
    let output = std::fs::File::create(&output_path).unwrap();
    let enabled = ChannelId::all().filter(|&ct| config.is_enabled(ct));
    monitor.add_sink(Box::new(JsonLinesSink::new(output, enabled)));

    assert!(monitor.step().unwrap().is_none());
    let averaged = monitor.step().unwrap().unwrap();

    // Replaying the same batch twice averages to that batch's record.
    let single = monitor.last_record().unwrap();
    assert!((averaged.channels[1].power - single.channels[1].power).abs() < 1e-9);

    let written = std::fs::read_to_string(&output_path).unwrap();
    let lines: Vec<serde_json::Value> = written.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0]["tags"]["ct"], "0");
    assert_eq!(lines[1]["tags"]["ct"], "1");
    assert_eq!(lines[2]["measurement"], "voltages");
}
