//! `sensorwatch` – replays a scenario file through the availability engine.
//!
//! The binary:
//!
//! 1. Loads `~/.sensorwatch/config.toml`, writing the defaults on first run.
//! 2. Installs the tracing pipeline (`RUST_LOG`, `SENSORWATCH_LOG_FORMAT`,
//!    `OTEL_EXPORTER_OTLP_ENDPOINT`).
//! 3. Drives an [`Engine`] over a [`SimHost`] frame by frame, printing
//!    availability edges and indicator transitions as they happen.
//! 4. Stops cleanly on **Ctrl-C**.

mod config;
mod scenario;

use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{info, warn};

use sensorwatch_middleware::Topic;
use sensorwatch_runtime::{Engine, FrameOutcome, IndicatorSink, init_tracing};
use sensorwatch_types::{EventPayload, IndicatorState, ProviderState};

use scenario::{Scenario, SimHost};

fn main() {
    let cfg = match config::load() {
        Ok(Some(cfg)) => cfg,
        Ok(None) => {
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            match config::save(&config::Config::default()) {
                Ok(()) => println!(
                    "  {} Default config written to {}",
                    "✓".green().bold(),
                    config::config_path().display().to_string().bold()
                ),
                Err(e) => println!("{}: {}", "Error saving config".red(), e),
            }
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };

    let _guard = init_tracing("sensorwatch", cfg.log_format);

    print_banner();

    let Some(path) = std::env::args_os().nth(1).map(PathBuf::from) else {
        eprintln!("{} sensorwatch <scenario.toml>", "usage:".bold());
        std::process::exit(2);
    };
    let scenario = match Scenario::load(&path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{}: {}", "Scenario error".red(), e);
            std::process::exit(1);
        }
    };
    println!(
        "  Scenario {} – {} experiment(s), {} frame spec(s), coverage {:?}\n",
        path.display().to_string().bold(),
        scenario.experiments.len(),
        scenario.frames.len(),
        cfg.engine.coverage_provider,
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping after this frame …".yellow().bold());
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler");
    }

    let mut host = SimHost::new(&scenario);
    let mut engine: Engine<SimHost> = Engine::new(
        cfg.engine.clone(),
        scenario.experiments.clone(),
        Box::new(ConsoleIndicator),
    );
    engine.subscribe(Some(Topic::Availability), |event| {
        if let EventPayload::AvailabilityChanged { experiment, available } = &event.payload {
            let mark = if *available {
                "available".green().bold()
            } else {
                "unavailable".dimmed()
            };
            println!("  [{:>4}] {} {}", event.tick, experiment.bold(), mark);
        }
    });
    engine.subscribe(Some(Topic::Coverage), |event| {
        if let EventPayload::CoverageProviderStateChanged(state) = &event.payload {
            let state = match state {
                ProviderState::Bound => "bound".cyan(),
                ProviderState::Unbound => "unbound".yellow(),
            };
            println!("  [{:>4}] coverage provider {}", event.tick, state);
        }
    });

    let interval = Duration::from_millis(cfg.frame_interval_ms);
    let mut last_pending: Option<String> = None;
    for step in scenario.timeline() {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        host.apply(&step);
        if step.first
            && let Some(kind) = step.spec.coverage
        {
            println!("  {} coverage source → {:?}", "»".bold(), kind);
            engine.set_coverage_kind(&host, kind);
        }

        match engine.frame(&host) {
            Ok(FrameOutcome::Waiting { pending }) => {
                if last_pending.as_deref() != Some(pending.as_str()) {
                    println!("  {} waiting for {}", "…".dimmed(), pending.dimmed());
                }
                last_pending = Some(pending);
            }
            Ok(FrameOutcome::Ticked(states)) => {
                last_pending = None;
                let available = states.iter().filter(|s| s.available()).count();
                info!(frame = step.frame, tracked = states.len(), available, "frame evaluated");
            }
            Err(e) => {
                eprintln!("{}: {}", "Engine error".red(), e);
                std::process::exit(1);
            }
        }

        std::thread::sleep(interval);
    }

    let summary = engine
        .context()
        .map(|ctx| {
            let manager = ctx.manager();
            format!(
                "vessel {} at {}: {} experiment(s) tracked, any available: {}",
                ctx.vessel_id(),
                ctx.body(),
                manager.len(),
                manager.any_available()
            )
        })
        .unwrap_or_else(|| "no active vessel".to_string());
    let frames = engine.frames();
    engine.stop();

    println!();
    println!("  {} {} frame(s) replayed", "✓".green().bold(), frames);
    println!("  {}", summary.dimmed());
}

/// Prints indicator transitions to the console.
struct ConsoleIndicator;

impl IndicatorSink for ConsoleIndicator {
    fn set_indicator_state(&mut self, state: IndicatorState) {
        let label = match state {
            IndicatorState::Idle => "idle".normal(),
            IndicatorState::Alerting => "ALERT".green().bold(),
            IndicatorState::Busy => "busy".yellow(),
        };
        println!("  indicator: {}", label);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", "  ┌─────────────────────────────────┐".bold().cyan());
    println!("{}", "  │  sensorwatch · science alerts   │".bold().cyan());
    println!("{}", "  └─────────────────────────────────┘".bold().cyan());
    println!("  {}", env!("CARGO_PKG_VERSION").dimmed());
    println!();
}
