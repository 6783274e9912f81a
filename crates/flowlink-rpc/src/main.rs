//! flowlink broker daemon.
//!
//! Hosts the single-slot broker between the editor's browser UI, the
//! backend process, and one external worker application.

mod handlers;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use flowlink_core::{Broker, BrokerConfig, ConnectionSlot, ShutdownToken};

#[derive(Parser, Debug)]
#[command(name = "flowlink-rpc")]
#[command(about = "Worker broker daemon for flowlink")]
struct Args {
    /// Port to listen on (0 = auto-assign)
    #[arg(short, long, default_value = "0")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Accept/receive poll interval in milliseconds
    #[arg(long, default_value = "250")]
    poll_interval_ms: u64,

    /// Defer listening until an embedding process triggers activation
    /// (the standalone daemon provides no trigger, so it stays inert)
    #[arg(long)]
    lazy: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("Starting flowlink broker");

    let config = BrokerConfig {
        host: args.host,
        port: args.port,
        poll_interval: Duration::from_millis(args.poll_interval_ms),
        lazy: args.lazy,
    };

    let slot = Arc::new(ConnectionSlot::new());
    let shutdown = ShutdownToken::new();
    let methods = handlers::build_method_table(slot.clone(), shutdown.clone());

    let lazy = config.lazy;
    let broker = Arc::new(Broker::new(
        config,
        slot,
        Arc::new(methods),
        Arc::new(handlers::LogSink),
        shutdown.clone(),
    ));

    if !lazy {
        let addr = broker.bind().await?;
        // Print the port for the embedding process to read (intentional
        // stdout). This format must match what the editor backend expects.
        println!("BROKER_PORT={}", addr.port());
        info!("Broker listening on {}", addr);
    }

    let supervisor = tokio::spawn({
        let broker = broker.clone();
        async move { broker.run().await }
    });

    // Wait for either ctrl-c or a remote shutdown method call
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Shutdown signal received");
        }
        _ = shutdown.cancelled() => {
            info!("Shutdown requested over the wire");
        }
    }

    broker.shutdown();
    supervisor.await??;
    info!("Broker stopped");

    Ok(())
}
