//! BioSIM catalog inspector
//!
//! Prints the epoch catalog, resolves year ranges onto epochs and shows the
//! effective limits, all without starting any engine.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::error;

use biosim::request::parse_scenario;
use biosim::telemetry::init_tracing;
use biosim::{
    BioSimConfig, BioSimResult, DailySlot, EpochCatalog, Source, SpanResolver, ValidationError, YearRange, MODELS,
};

/// Inspect the BioSIM epoch catalog.
#[derive(Parser)]
#[command(name = "biosim-catalog", about = "Inspect the BioSIM epoch catalog")]
struct Cli {
    /// Configuration file; `BIOSIM_*` variables override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List every epoch with its interval and worker count.
    Epochs {
        /// Also print each epoch's initialization command.
        #[arg(long)]
        init: bool,
    },
    /// Resolve a year range onto epochs.
    Resolve {
        /// First year.
        #[arg(long)]
        from: i32,
        /// Last year.
        #[arg(long)]
        to: i32,
        /// `FromObservation` or `FromNormals`.
        #[arg(long, default_value = "FromObservation")]
        source: String,
        /// Emission pathway (`4_5` or `8_5`).
        #[arg(long)]
        rcp: Option<String>,
        /// Climate model (`Hadley`, `GCM4`, `RCM4`).
        #[arg(long)]
        clim_mod: Option<String>,
    },
    /// Print coordinate caps, cache capacity and worker sizing.
    Limits,
    /// List model names.
    Models,
}

fn run(cli: Cli) -> BioSimResult<()> {
    let config = BioSimConfig::load(cli.config.as_deref())?;
    let catalog = EpochCatalog::standard(config.workers.generation_workers());

    match cli.command {
        Command::Epochs { init } => {
            let layout = config.layout();
            for epoch in catalog.iter() {
                println!(
                    "{}\t{}\tworkers={}",
                    epoch.id(),
                    epoch.interval(Source::FromObservation),
                    epoch.workers()
                );
                if init {
                    println!("\t{}", epoch.init_command(&layout, DailySlot::Primary));
                }
            }
        }
        Command::Resolve {
            from,
            to,
            source,
            rcp,
            clim_mod,
        } => {
            let source = Source::parse(&source).ok_or_else(|| ValidationError::UnknownValue {
                field: "source".to_string(),
                value: source.clone(),
                allowed: "FromObservation, FromNormals".to_string(),
            })?;
            let scenario = parse_scenario(rcp.as_deref(), clim_mod.as_deref())?;
            let requested = YearRange::new(from, to)?;
            let resolution = SpanResolver::resolve(requested, source, &catalog.generation_epochs(scenario, source));
            for span in &resolution.spans {
                println!("{}\t{}", span.bounds, span.epoch.id());
            }
            for gap in resolution.uncovered() {
                println!("{gap}\tuncovered");
            }
        }
        Command::Limits => {
            let limits = &config.limits;
            println!("max_coordinates_generation={}", limits.max_coordinates_generation);
            println!("max_coordinates_normals={}", limits.max_coordinates_normals);
            println!("max_replicates={}", limits.max_replicates);
            println!("cache_capacity={}", limits.cache_capacity);
            println!("generation_workers={}", config.workers.generation_workers());
        }
        Command::Models => {
            for model in MODELS {
                println!("{}\tworkers={}", model.name, config.workers.model_workers(model.nominal_processes));
            }
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    init_tracing();
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "biosim-catalog failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
