//! RTIO system tester entry point.
//!
//! Runs the LED, TTL output and TTL input (loopback gate/count) test suites
//! against the simulated controller, with signal-driven abort.

mod signals;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use rtio_common::config::HarnessConfig;
use rtio_runtime::{
    blink_led, loopback_check, pulse_train, AbortFlag, ChannelSet, GateCountTest, RoutineReport,
    RtioController, Session, SimulatedController, StopCondition,
};
use std::path::PathBuf;
use tracing::{error, info, warn};

use crate::signals::SignalHandler;

/// Test suites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Suite {
    /// Blink every LED.
    Leds,
    /// Pulse TTL outputs in groups.
    Outputs,
    /// Loopback gate/count on every TTL input.
    Inputs,
    /// All of the above, in that order.
    All,
}

impl Suite {
    fn includes(self, other: Suite) -> bool {
        self == Suite::All || self == other
    }
}

/// RTIO tester command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "rtio-tester",
    about = "RTIO system tester - LED, TTL output and loopback input tests",
    version,
    long_about = None
)]
struct Args {
    /// Path to a harness configuration file (TOML).
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Test suite to run.
    #[arg(long, short = 's', value_enum, default_value = "all")]
    suite: Suite,

    /// Outer iterations of the open-ended tests (0 = until signal).
    #[arg(long, short = 'n', default_value = "1")]
    iterations: u64,

    /// Print each report as a JSON line.
    #[arg(long)]
    json: bool,

    /// Print the effective configuration as TOML and exit.
    #[arg(long)]
    print_config: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    let config = load_config(&args)?;
    config.validate().context("Invalid configuration")?;

    if args.print_config {
        print!("{}", config.to_toml().context("Failed to serialize configuration")?);
        return Ok(());
    }

    info!(version = env!("CARGO_PKG_VERSION"), suite = ?args.suite, "Starting RTIO tester");

    let abort = AbortFlag::new();
    let signal_handler =
        SignalHandler::new(abort.clone()).context("Failed to set up signal handlers")?;

    let controller =
        SimulatedController::from_config(&config).context("Failed to build simulated controller")?;
    let mut session = Session::new(controller, &config)
        .context("Failed to create session")?
        .with_abort(abort.clone());

    let summary = run_suites(&mut session, &config, &args, &abort)?;

    info!(
        passed = summary.passed,
        failed = summary.failed,
        signals = signal_handler.state().signal_count(),
        events = session.events_emitted(),
        "Tester finished"
    );

    if summary.failed > 0 {
        anyhow::bail!("{} test(s) failed", summary.failed);
    }
    Ok(())
}

/// Initialize logging with the specified log level.
fn init_logging(level: &str) {
    let filter = format!("rtio_tester={level},rtio_runtime={level},rtio_common={level}");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Resolution priority (first existing file wins):
/// 1. Command-line `--config` argument
/// 2. `RTIO_CONFIG_PATH` environment variable
/// 3. `config/default.toml` (local development)
/// 4. Built-in defaults
fn load_config(args: &Args) -> Result<HarnessConfig> {
    if let Some(config_path) = &args.config {
        info!(?config_path, "Loading config from command-line argument");
        return HarnessConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {config_path:?}"));
    }

    if let Ok(env_path) = std::env::var("RTIO_CONFIG_PATH") {
        let config_path = PathBuf::from(&env_path);
        if config_path.exists() {
            info!(?config_path, "Loading config from RTIO_CONFIG_PATH");
            return HarnessConfig::from_file(&config_path).with_context(|| {
                format!("Failed to load config from RTIO_CONFIG_PATH={env_path:?}")
            });
        }
        warn!(
            path = %env_path,
            "RTIO_CONFIG_PATH set but file does not exist, checking other locations"
        );
    }

    let local_path = PathBuf::from("config/default.toml");
    if local_path.exists() {
        info!(?local_path, "Loading config from local path");
        return HarnessConfig::from_file(&local_path)
            .with_context(|| format!("Failed to load config from {local_path:?}"));
    }

    info!("No config file found, using built-in defaults");
    Ok(HarnessConfig::default())
}

/// Stop on abort, or after `iterations` outer iterations (0 = never).
fn stop_condition(abort: &AbortFlag, iterations: u64) -> impl StopCondition + '_ {
    let mut remaining = iterations;
    move || {
        if abort.is_requested() {
            return true;
        }
        if iterations == 0 {
            return false;
        }
        if remaining == 0 {
            return true;
        }
        remaining -= 1;
        false
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
struct Summary {
    passed: usize,
    failed: usize,
}

impl Summary {
    fn record(&mut self, name: &str, passed: bool) {
        if passed {
            self.passed += 1;
            println!("{name}: PASSED");
        } else {
            self.failed += 1;
            println!("{name}: FAILED");
        }
    }
}

fn print_json(args: &Args, value: &impl serde::Serialize) -> Result<()> {
    if args.json {
        println!("{}", serde_json::to_string(value).context("Failed to encode report")?);
    }
    Ok(())
}

fn routine_result(
    args: &Args,
    summary: &mut Summary,
    name: &str,
    result: rtio_common::RtioResult<RoutineReport>,
) -> Result<()> {
    match result {
        Ok(report) => {
            print_json(args, &report)?;
            summary.record(name, true);
        }
        Err(e) => {
            error!(test = name, error = %e, "Test aborted by fault");
            summary.record(name, false);
        }
    }
    Ok(())
}

/// Run the selected suites.
fn run_suites<C: RtioController>(
    session: &mut Session<C>,
    config: &HarnessConfig,
    args: &Args,
    abort: &AbortFlag,
) -> Result<Summary> {
    let channels =
        ChannelSet::from_configs(&config.channels).context("Failed to resolve channels")?;
    let mut summary = Summary::default();

    if args.suite.includes(Suite::Leds) {
        info!(count = channels.leds.len(), "Testing LEDs");
        for led in &channels.leds {
            if abort.is_requested() {
                break;
            }
            let result = blink_led(
                session,
                led,
                &config.led_test,
                &mut stop_condition(abort, args.iterations),
            );
            routine_result(args, &mut summary, &format!("LED {}", led.name()), result)?;
        }
    }

    if args.suite.includes(Suite::Outputs) {
        info!(count = channels.ttl_outs.len(), "Testing TTL outputs");
        for group in channels.chunks(config.ttl_out_test.group_size) {
            if abort.is_requested() {
                break;
            }
            let names: Vec<&str> = group.iter().map(|t| t.name()).collect();
            let result = pulse_train(
                session,
                group,
                &config.ttl_out_test,
                &mut stop_condition(abort, args.iterations),
            );
            routine_result(
                args,
                &mut summary,
                &format!("TTL outputs {}", names.join(", ")),
                result,
            )?;
        }
    }

    if args.suite.includes(Suite::Inputs) && !abort.is_requested() {
        match channels.ttl_outs.first() {
            Some(output) => {
                info!(count = channels.ttl_ins.len(), "Testing TTL inputs");
                let test = GateCountTest::from(&config.gate_count);
                for result in loopback_check(session, output, &channels.ttl_ins, &test) {
                    let name = format!("TTL input {} from {}", result.input, output.name());
                    match &result.outcome {
                        Ok(outcome) => print_json(args, outcome)?,
                        Err(e) => error!(test = %name, error = %e, "Test aborted by fault"),
                    }
                    summary.record(&name, result.passed());
                }
            }
            None => warn!("No TTL output to drive the inputs, skipping input tests"),
        }
    }

    if abort.is_requested() {
        warn!("Aborted, remaining tests skipped");
    }
    Ok(summary)
}
