//! `emtrig` CLI: batch scenario evaluation, replay import/export.

use anyhow::Result;
use clap::{Parser, Subcommand};
use rayon::prelude::*;
use sim::generator::SectorEvent;
use sim::{load_replay, save_replay, ReplayLog, Scenario, ScenarioKind, SyntheticGeometry};
use std::path::PathBuf;
use trigger_core::metrics::TriggerMetrics;
use trigger_core::pipeline::{SectorConfig, SectorProcessor};

#[derive(Parser)]
#[command(name = "emtrig", about = "Muon endcap trigger sector CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a named scenario and run every event through the pipeline.
    RunScenario {
        #[arg(value_enum)]
        scenario: ScenarioKind,
        /// Random seed for reproducibility
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Override the scenario's event count
        #[arg(long)]
        events: Option<usize>,
        /// Disable neighbor-sector inclusion
        #[arg(long)]
        no_neighbor: bool,
        /// Use legacy reduced-precision phi windows
        #[arg(long)]
        legacy_phi: bool,
        /// Output metrics to a JSON file
        #[arg(long)]
        output: Option<PathBuf>,
        /// Also save the full event log for later replay
        #[arg(long)]
        save_replay: Option<PathBuf>,
    },
    /// Load and re-process a previously recorded event log.
    Replay {
        /// Path to replay JSON file
        input: PathBuf,
        /// Output metrics to a JSON file
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::RunScenario {
            scenario,
            seed,
            events,
            no_neighbor,
            legacy_phi,
            output,
            save_replay: save_path,
        } => {
            let mut scenario = Scenario::build(scenario, seed);
            if let Some(n) = events {
                scenario.events = n;
            }
            if no_neighbor {
                scenario.sector.include_neighbor = false;
            }
            if legacy_phi {
                scenario.sector.fix_zone_phi = false;
            }

            let (events, setup_anomalies) = scenario.generate_events();
            tracing::info!(
                scenario = %scenario.name,
                events = events.len(),
                "generated events"
            );

            let mut metrics = run_events(&scenario.sector, &events)?;
            metrics.anomalies += setup_anomalies.len() as u64;
            report(&metrics, output.as_deref())?;

            if let Some(path) = save_path {
                let log = ReplayLog {
                    scenario_name: scenario.name.clone(),
                    seed,
                    sector: scenario.sector.clone(),
                    events,
                };
                save_replay(&log, &path)?;
                tracing::info!(path = %path.display(), "saved replay");
            }
        }
        Commands::Replay { input, output } => {
            let log = load_replay(&input)?;
            tracing::info!(
                scenario = %log.scenario_name,
                events = log.events.len(),
                "loaded replay"
            );
            let metrics = run_events(&log.sector, &log.events)?;
            report(&metrics, output.as_deref())?;
        }
    }

    Ok(())
}

/// Run every event through its own independent sector invocation. The
/// core is single-threaded per invocation by design, so the fan-out
/// happens here.
fn run_events(sector: &SectorConfig, events: &[SectorEvent]) -> Result<TriggerMetrics> {
    let processor = SectorProcessor::new(sector.clone());

    let outputs = events
        .par_iter()
        .map(|event| {
            processor
                .process(&event.primitives, &event.zone_roads, &SyntheticGeometry)
                .map(|out| (event, out))
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut metrics = TriggerMetrics::default();
    for (event, out) in &outputs {
        metrics.accumulate(event.primitives.len(), event.num_roads(), out);
    }
    Ok(metrics)
}

fn report(metrics: &TriggerMetrics, output: Option<&std::path::Path>) -> Result<()> {
    println!("events:            {}", metrics.events);
    println!("primitives in:     {}", metrics.primitives_in);
    println!("hits selected:     {}", metrics.hits_selected);
    println!("mean occupancy:    {:.2} links/event", metrics.mean_occupancy());
    println!("roads in:          {}", metrics.roads_in);
    println!("tracks out:        {}", metrics.tracks_out);
    println!("match rate:        {:.3}", metrics.match_rate());
    println!("mean track hits:   {:.2}", metrics.mean_track_hits());
    println!("anomalies:         {}", metrics.anomalies);

    if let Some(path) = output {
        std::fs::write(path, serde_json::to_string_pretty(metrics)?)?;
        tracing::info!(path = %path.display(), "saved metrics");
    }
    Ok(())
}
