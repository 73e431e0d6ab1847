#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Command-line consumer for the Seattle Fire real-time dispatch pipeline.
//!
//! Prints the current incident list, resolved map markers, or a single
//! incident's location, or follows the feed until interrupted. Set
//! `RUST_LOG=debug` to see per-row and per-lookup detail.

use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use dispatch_pipeline::{
    DispatchConfig, DispatchContext, FetchOutcome, Incident, IncidentSnapshot, ResolvedLocation,
};

/// Refresh interval for `watch` when neither the flag nor the config sets one.
const DEFAULT_WATCH_INTERVAL_SECS: u64 = 60;

#[derive(Parser)]
#[command(name = "dispatch_cli", about = "Seattle Fire real-time 911 dispatch viewer")]
struct Cli {
    /// TOML file overriding the built-in configuration
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the feed once and print every incident
    List,
    /// Fetch the feed once, geocode every incident and print the markers
    Map,
    /// Fetch the feed once and geocode a single incident
    Lookup {
        /// 0-based feed row
        row: usize,
    },
    /// Follow the feed, printing each new snapshot until Ctrl-C
    Watch {
        /// Seconds between refreshes (overrides `refresh_interval_secs`)
        #[arg(long)]
        interval: Option<u64>,
    },
    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();
    let cli = Cli::parse();

    let mut config = DispatchConfig::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Config => {
            print!("{}", config.to_toml_string()?);
        }
        Commands::List => {
            let context = DispatchContext::from_config(config)?;
            let snapshot = fetch_once(&context).await?;
            for incident in &snapshot.incidents {
                print_incident(incident);
            }
            println!();
            println!(
                "{} incidents, {} rows skipped",
                snapshot.len(),
                snapshot.skipped_rows
            );
        }
        Commands::Map => {
            let context = DispatchContext::from_config(config)?;
            fetch_once(&context).await?;
            let summary = context.refresh_locations().await?;
            for location in context.current_locations().iter() {
                print_location(location);
            }
            println!();
            println!(
                "{} resolved, {} not found, {} failed",
                summary.resolved, summary.unresolved, summary.failed
            );
        }
        Commands::Lookup { row } => {
            let context = DispatchContext::from_config(config)?;
            let snapshot = fetch_once(&context).await?;
            let incident = snapshot
                .row(row)
                .ok_or_else(|| format!("No incident at row {row}"))?;
            print_incident(incident);

            match context.lookup_single(incident).await? {
                Some(location) => {
                    let bbox = location.marker_region().bounding_box();
                    println!("  at {}", location.coordinate);
                    println!(
                        "  marker region: W {:.5} S {:.5} E {:.5} N {:.5}",
                        bbox.west, bbox.south, bbox.east, bbox.north
                    );
                }
                None => println!("  location not found"),
            }
        }
        Commands::Watch { interval } => {
            let seconds = interval
                .or(config.refresh_interval_secs)
                .unwrap_or(DEFAULT_WATCH_INTERVAL_SECS)
                .max(1);
            config.refresh_interval_secs = Some(seconds);
            watch(DispatchContext::from_config(config)?.start(), ctrl_c()).await?;
        }
    }

    Ok(())
}

/// Runs one fetch and returns the published snapshot.
async fn fetch_once(
    context: &DispatchContext,
) -> Result<Arc<IncidentSnapshot>, dispatch_pipeline::DispatchError> {
    match context.fetch_now().await {
        FetchOutcome::Failed { error, .. } => Err(error),
        FetchOutcome::Published { .. } | FetchOutcome::Superseded { .. } => {
            Ok(context.current_incidents())
        }
    }
}

/// Follows published snapshots until `shutdown` completes.
///
/// `shutdown` is created once and polled for the whole session, including
/// while a resolve pass is running, so an interrupt is never missed.
async fn watch(
    context: Arc<DispatchContext>,
    shutdown: impl Future<Output = ()>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut shutdown = std::pin::pin!(shutdown);
    let mut incidents = context.incidents();
    log::info!(
        "Watching the feed every {}s, press Ctrl-C to stop",
        context.config().refresh_interval_secs.unwrap_or_default()
    );

    loop {
        let Some(changed) = or_shutdown(incidents.changed(), &mut shutdown).await else {
            break;
        };
        if changed.is_err() {
            return Ok(());
        }

        let snapshot = Arc::clone(&incidents.borrow_and_update());
        let active = snapshot.incidents.iter().filter(|i| i.is_active).count();
        println!(
            "[generation {}] {} incidents ({active} active, {} rows skipped)",
            snapshot.generation,
            snapshot.len(),
            snapshot.skipped_rows
        );

        let Some(summary) = or_shutdown(context.refresh_locations(), &mut shutdown).await else {
            break;
        };
        let summary = summary?;
        println!(
            "[generation {}] {} of {} locations resolved",
            summary.generation,
            context.current_locations().len(),
            snapshot.len()
        );
    }

    log::info!("Interrupted, stopping");
    Ok(())
}

/// Runs `work` to completion unless `shutdown` completes first, in which
/// case `None` is returned.
async fn or_shutdown<W, S>(work: W, shutdown: &mut Pin<&mut S>) -> Option<W::Output>
where
    W: Future,
    S: Future<Output = ()>,
{
    tokio::select! {
        output = work => Some(output),
        () = shutdown.as_mut() => None,
    }
}

/// Completes on the first Ctrl-C. Never completes if the handler cannot be
/// installed.
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
}

/// Icon name, or the severity level for unclassified incidents.
fn icon_column(incident: &Incident) -> String {
    incident.icon().map_or_else(
        || format!("L{}", incident.severity_level),
        |icon| icon.to_string(),
    )
}

fn print_incident(incident: &Incident) {
    println!(
        "{:>3}  {:<24} {:<22} {}  {}",
        incident.id,
        icon_column(incident),
        incident.label,
        incident.timestamp.format("%-I:%M %p"),
        incident.location_text
    );
    println!(
        "     {}{} · level {} · {}: {}",
        if incident.is_active { "ACTIVE · " } else { "" },
        incident.incident_id,
        incident.severity_level,
        incident.unit_count_label(),
        incident.units_joined()
    );
}

fn print_location(location: &ResolvedLocation) {
    println!(
        "{:>3}  {:<24} {}  {}",
        location.incident.id,
        icon_column(&location.incident),
        location.coordinate,
        location.incident.label
    );
}
