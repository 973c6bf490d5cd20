use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use pathprobe::cli::Args;
use pathprobe::config::TraceConfig;
use pathprobe::defaults::Defaults;
use pathprobe::lookup::DnsLookup;
use pathprobe::probe::UdpTransport;
use pathprobe::state::HopRecord;
use pathprobe::trace::{TraceEngine, TraceEvent};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    init_logging(args.verbose);

    let defaults = match &args.config {
        Some(path) => Defaults::load_from(path)?,
        None => Defaults::load(),
    };
    let config = TraceConfig::from_args(&args, &defaults);

    let resolver = Arc::new(DnsLookup::new());
    let transport = Arc::new(UdpTransport::new(args.port));
    let mut engine = TraceEngine::new(config, transport, resolver);

    let mut events = engine.subscribe();
    if !engine.start() {
        anyhow::bail!("Failed to start trace to {}", engine.target());
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    loop {
        tokio::select! {
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                // Finished follows through the event stream
                engine.stop();
            }
            event = events.recv() => match event {
                Ok(TraceEvent::SnapshotUpdated(hops)) => print_hops(&hops),
                Ok(TraceEvent::Error(message)) => eprintln!("Error: {}", message),
                Ok(TraceEvent::Finished) => break,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Output fell behind, skipping snapshots");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    Ok(())
}

/// RUST_LOG wins; otherwise debug with -v and warnings only without
fn init_logging(verbose: bool) {
    let fallback = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_hops(hops: &[HopRecord]) {
    for hop in hops.iter().filter(|h| h.sent > 0) {
        println!(
            "TTL {:2}  {:15}  {:20}  {:>6}  {:>5.1}% loss",
            hop.hop_number,
            hop.display_ip(),
            hop.hostname.as_deref().unwrap_or(""),
            hop.avg
                .map(|avg| format!("{:.2}ms", avg))
                .unwrap_or_else(|| "*".to_string()),
            hop.loss_pct()
        );
    }
    println!("---");
}
