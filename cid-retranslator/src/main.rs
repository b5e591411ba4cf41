//! CID Retranslator - headless Contact ID relay
//!
//! Accepts alarm panel connections, keeps device state, and relays every
//! event to one upstream monitoring receiver. Queue statistics are logged
//! periodically; Ctrl-C stops the service.

mod settings;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use cid_relay::Retranslator;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long shutdown waits for tasks before aborting them
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

/// Headless Contact ID retranslator
#[derive(Parser, Debug)]
#[command(name = "cid-retranslator", version, about)]
struct Args {
    /// Engine configuration file (JSON)
    #[arg(short, long, default_value = "config.json", env = "CID_CONFIG")]
    config: PathBuf,

    /// Event dictionary file (JSON)
    #[arg(short, long, default_value = "events.json", env = "CID_EVENTS")]
    events: PathBuf,

    /// Seconds between queue statistics log lines (0 disables)
    #[arg(long, default_value_t = 60)]
    stats_interval: u64,

    /// Override the panel listen address (host:port)
    #[arg(long)]
    listen: Option<String>,

    /// Override the upstream receiver address (host:port)
    #[arg(long)]
    upstream: Option<String>,

    /// Print the effective configuration as JSON and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "cid_retranslator=info,cid_protocol=info,cid_relay=info,cid_sim=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = settings::load_config(&args.config)?;
    settings::apply_overrides(&mut config, args.listen.as_deref(), args.upstream.as_deref())?;

    if args.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let dictionary = settings::load_dictionary(&args.events)?;

    info!("Starting CID Retranslator");
    let retranslator = Retranslator::startup(config, dictionary)
        .await
        .context("Failed to start retranslator")?;

    let stats_bound = retranslator.config().timeouts.stats();
    let mut stats_timer = interval(Duration::from_secs(args.stats_interval.max(1)));
    stats_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately
    stats_timer.tick().await;

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("Failed to listen for Ctrl-C: {}", e);
                }
                break;
            }
            _ = stats_timer.tick(), if args.stats_interval > 0 => {
                match retranslator.queue_stats(stats_bound).await {
                    Ok(stats) => info!(
                        "Upstream {}: accepted {}, rejected {}, queued {}, reconnects {}, dropped {}, uptime {}",
                        if stats.connected { "connected" } else { "disconnected" },
                        stats.accepted,
                        stats.rejected,
                        stats.queued,
                        stats.reconnects,
                        stats.dropped_in_flight,
                        stats.uptime_string()
                    ),
                    Err(e) => warn!("Could not read queue stats: {}", e),
                }
            }
        }
    }

    let report = retranslator.shutdown(SHUTDOWN_DEADLINE).await;
    if !report.clean {
        warn!("Forced shutdown of: {}", report.aborted_tasks.join(", "));
    }
    Ok(())
}
