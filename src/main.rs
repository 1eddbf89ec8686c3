use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use log::Level;
use signal_hook::consts::signal::{SIGINT, SIGTERM};

use ::power_monitor::print::{print_recommendation, print_results};
use ::power_monitor::*;

mod calibrate;
use calibrate::ConsoleOperator;

const DEBUG_DUMP_DIR: &str = "data/samples";

/// Power Monitor CLI
#[derive(Parser, Debug)]
#[command(author, version, about = "Six-channel CT power monitor", long_about = None)]
struct Args {
    /// JSON configuration file; defaults apply to every missing key
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Replay a captured sample dump instead of simulating the converter
    #[arg(short, long, global = true)]
    replay: Option<PathBuf>,

    /// Seed of the simulated converter noise
    #[arg(long, global = true, default_value_t = 0)]
    seed: u64,

    /// Debug logging unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    mode: Option<Mode>,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Continuous monitoring (default)
    Run {
        /// Log every averaged record as a table
        #[arg(short, long)]
        terminal: bool,

        /// Append JSON points to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Interactive phase correction calibration
    Phase {
        #[arg(short, long, default_value = "phase-calibration")]
        title: String,
    },
    /// Capture one batch, report the sample rate and dump it to data/samples/<title>.json
    Debug {
        #[arg(short, long, default_value = "last-debug")]
        title: String,
    },
    /// Suggest an AC accuracy multiplier from a reference-meter reading
    Voltage {
        /// Voltage shown by the reference meter
        #[arg(short, long)]
        actual: f64,
    },
}

fn build_sampler(args: &Args, config: &PowerMonitorConfig) -> anyhow::Result<Box<dyn Sampler>> {
    match &args.replay {
        Some(path) => {
            let dump = SampleDump::load(path).with_context(|| format!("reading sample dump {}", path.display()))?;
            log::info!("Replaying samples from {}", path.display());
            Ok(Box::new(ReplaySampler::from_dump(dump)))
        }
        None => {
            log::info!("Simulating signals instead of reading from hardware.");
            let mut sampler = SimulatedSampler::new(config, args.seed);
            sampler.realtime = true;
            Ok(Box::new(sampler))
        }
    }
}

fn run(monitor: &mut PowerMonitor<Box<dyn Sampler>>, terminal: bool, output: Option<&Path>) -> anyhow::Result<()> {
    let enabled: Vec<ChannelId> = ChannelId::all().filter(|&ct| monitor.config().is_enabled(ct)).collect();

    match output {
        Some(path) => {
            let file = File::options()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening {}", path.display()))?;
            monitor.add_sink(Box::new(JsonLinesSink::new(BufWriter::new(file), enabled)));
        }
        None => monitor.add_sink(Box::new(JsonLinesSink::new(io::stdout(), enabled))),
    }

    let level = if terminal { Level::Info } else { Level::Debug };
    monitor.add_sink(Box::new(LogSink::new(level)));

    let stop = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(&stop)).context("registering signal handler")?;
    }

    monitor.run(&stop)?;
    Ok(())
}

fn phase(config: &PowerMonitorConfig, sampler: &mut Box<dyn Sampler>, title: &str) -> anyhow::Result<()> {
    let stdin = io::stdin();
    let mut operator = ConsoleOperator::new(stdin.lock(), io::stdout());
    let mut session = CalibrationSession::new(config)?;

    let recommendation = run_calibration(&mut session, sampler, &mut operator, config.samples_per_batch)?;
    print_recommendation(&recommendation);

    let path = PathBuf::from(format!("{title}.json"));
    fs::write(&path, serde_json::to_string(&recommendation)?).with_context(|| format!("writing {}", path.display()))?;
    log::info!("Waveform written to {}", path.display());
    Ok(())
}

fn debug_dump_path(title: &str) -> PathBuf {
    Path::new(DEBUG_DUMP_DIR).join(format!("{title}.json"))
}

fn debug(config: &PowerMonitorConfig, sampler: &mut Box<dyn Sampler>, title: &str) -> anyhow::Result<()> {
    let started = Instant::now();
    let batch = sampler.collect(config.samples_per_batch)?;
    let elapsed = started.elapsed().as_secs_f64();
    let reference_voltage = sampler.reference_voltage()?;

    // The voltage input is multiplexed with the CT inputs.
    let conversions = batch.len() * (CHANNEL_COUNT + 1);
    if elapsed > 0.0 {
        log::info!("{}: {:.2} kSPS over {:.3} s", title, conversions as f64 / elapsed / 1000.0, elapsed);
    }
    log::info!("Board reference voltage: {:.3} V", reference_voltage);

    let path = debug_dump_path(title);
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    SampleDump { reference_voltage, batch }.save(&path)?;
    log::info!("Samples written to {}", path.display());
    Ok(())
}

fn voltage(monitor: &mut PowerMonitor<Box<dyn Sampler>>, actual: f64) -> anyhow::Result<()> {
    let samples = monitor.config().samples_per_batch;
    let batch = monitor.sampler_mut().collect(samples)?;
    let reference_voltage = monitor.sampler_mut().reference_voltage()?;
    let record = monitor.process_batch(&batch, reference_voltage)?;
    print_results(&record, Level::Info);

    let ac = monitor.config().accuracy_calibration.ac;
    let suggested = suggest_accuracy_factor(record.voltage, actual, ac)?;
    log::info!(
        "Measured {:.2} V against {:.2} V; set accuracy_calibration.ac to {:.6}",
        record.voltage,
        actual,
        suggested
    );
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    let config = match &args.config {
        Some(path) => PowerMonitorConfig::load(path).with_context(|| format!("loading config {}", path.display()))?,
        None => PowerMonitorConfig::default(),
    };
    let mut sampler = build_sampler(&args, &config)?;

    match args.mode.unwrap_or(Mode::Run {
        terminal: false,
        output: None,
    }) {
        Mode::Run { terminal, output } => {
            let mut monitor = PowerMonitor::new(config, sampler)?;
            run(&mut monitor, terminal, output.as_deref())
        }
        Mode::Phase { title } => phase(&config, &mut sampler, &title),
        Mode::Debug { title } => debug(&config, &mut sampler, &title),
        Mode::Voltage { actual } => {
            let mut monitor = PowerMonitor::new(config, sampler)?;
            voltage(&mut monitor, actual)
        }
    }
}
