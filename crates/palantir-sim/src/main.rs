use std::process;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use palantir_sim::{Simulation, SimulationConfig};

/// Beings taking turns gazing into a shared pool of palantiri.
#[derive(Debug, Parser)]
#[command(name = "palantir-sim", version, about)]
struct Cli {
    #[command(flatten)]
    config: SimulationConfig,

    /// Print the report as JSON instead of a summary
    #[arg(long)]
    json: bool,
}

/// Logs go to stderr so stdout stays clean for the report.
///
/// `RUST_LOG` wins when set, otherwise `PALANTIR_LOG` picks the level.
/// `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let base_level = match std::env::var("PALANTIR_LOG").as_deref() {
            Ok("trace") => "trace",
            Ok("debug") => "debug",
            Ok("info") => "info",
            Ok("error") => "error",
            _ => "warn",
        };

        EnvFilter::new(format!(
            "palantir={level},palantir_sim={level}",
            level = base_level
        ))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

/// Returns whether the run was sound.
fn run(cli: Cli) -> anyhow::Result<bool> {
    let simulation = Simulation::new(cli.config).context("failed to set up simulation")?;
    let report = simulation.run().context("simulation failed")?;

    if cli.json {
        let json = serde_json::to_string_pretty(&report).context("failed to encode report")?;
        println!("{json}");
    } else {
        print!("{}", report.summary());
    }

    Ok(report.is_sound())
}

fn main() {
    let cli = Cli::parse();
    init_tracing();

    match run(cli) {
        Ok(true) => {}
        Ok(false) => {
            eprintln!("error: palantir pool misbehaved");
            process::exit(1);
        }
        Err(e) => {
            eprintln!("error: {e:#}");
            process::exit(2);
        }
    }
}
