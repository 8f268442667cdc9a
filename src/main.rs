// src/main.rs - CLI for running the incubator twin against the simulated plant
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use incubator_twin::config::{self, Config};
use incubator_twin::export::RunRecorder;
use incubator_twin::scenario::{builtin_scenarios, find_scenario};
use incubator_twin::{TwinError, build_simulated_twin};

/// Incubator digital twin with online recalibration
#[derive(Parser, Debug)]
#[command(name = "incubator-twin", about = "Runs the incubator self-adaptation loop against a simulated plant.")]
struct Cli {
    /// Path to a TOML config file (overrides defaults)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output directory for CSV/JSONL and the effective config
    #[arg(short, long, default_value = "./twin_output")]
    output: PathBuf,

    /// Built-in scenario replacing the configured disturbances
    #[arg(long)]
    scenario: Option<String>,

    /// Simulated seconds to run (overrides simulation.duration)
    #[arg(long)]
    duration: Option<f64>,

    /// Debug-level logging
    #[arg(short, long)]
    verbose: bool,

    /// Also write steps.jsonl
    #[arg(long)]
    jsonl: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the twin (default)
    Run,
    /// List available built-in scenarios
    ListScenarios,
    /// Print the effective configuration as TOML
    DumpConfig,
}

fn effective_config(cli: &Cli) -> Result<Config, TwinError> {
    let mut config = match &cli.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path.display());
            config::load_config(&path.to_string_lossy())?
        }
        None => Config::default(),
    };
    if let Some(name) = &cli.scenario {
        let scenario = find_scenario(name).ok_or_else(|| TwinError::UnknownScenario(name.clone()))?;
        tracing::info!("Scenario: {} ({})", scenario.name, scenario.description);
        scenario.apply(&mut config);
    }
    if let Some(duration) = cli.duration {
        config.simulation.duration = duration;
    }
    config.validate()?;
    Ok(config)
}

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO })
        .init();

    match &cli.command {
        Some(Commands::ListScenarios) => {
            for scenario in builtin_scenarios() {
                println!("{:<12} {}", scenario.name, scenario.description);
            }
        }
        Some(Commands::DumpConfig) => {
            let config = effective_config(&cli)?;
            print!("{}", config.to_toml().map_err(TwinError::from)?);
        }
        Some(Commands::Run) | None => {
            let config = effective_config(&cli)?;
            tracing::info!("Starting incubator twin");
            tracing::info!(
                "Step size {:.1}s, duration {:.0}s, {} scheduled disturbances",
                config.simulation.step_size,
                config.simulation.duration,
                config.disturbances.len()
            );

            let mut recorder = RunRecorder::create(&cli.output, cli.jsonl).map_err(TwinError::from)?;
            std::fs::write(cli.output.join("config.toml"), config.to_toml().map_err(TwinError::from)?)?;

            let mut twin = build_simulated_twin(&config).map_err(|e| {
                tracing::error!("Failed to initialize twin: {}", e);
                e
            })?;
            let summary = twin.run_until(config.simulation.duration, &mut recorder)?;
            let rows = recorder.finish().map_err(TwinError::from)?;
            std::fs::write(cli.output.join("summary.json"), serde_json::to_string_pretty(&summary)?)?;
            tracing::info!("Wrote {} rows to {}", rows, cli.output.display());
        }
    }
    Ok(())
}
