mod conn;
mod server;
mod stats;

use anyhow::{Context, Result};
use bean_protocol::ParseOptionsBuilder;
use clap::Parser;
use server::Server;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use tubeyard_queue::{Broker, BrokerConfigBuilder};

fn setup_logger() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new("info"))
                .context("error parsing RUST_LOG env")?
        )
        .init();
    Ok(())
}

/// An in-memory work queue speaking the beanstalkd protocol.
///
/// Tubeyard follows the beanstalkd protocol
/// (https://github.com/beanstalkd/beanstalkd/blob/master/doc/protocol.txt)
/// so existing beanstalkd clients can talk to it as-is. Every tube is scheduled by its own
/// task, so busy tubes never hold up quiet ones. Jobs are kept in memory only: they do not
/// survive a restart.
#[derive(Debug, Parser)]
#[command(max_term_width=100)]
struct Args {
    /// The address to listen on.
    #[arg(short = 'l', long, default_value = "127.0.0.1")]
    listen: String,

    /// The port to listen on.
    #[arg(short = 'p', long, default_value = "11300")]
    port: u16,

    /// The largest job body (in bytes) we accept. Bigger puts get JOB_TOO_BIG.
    #[arg(short = 'z', long, default_value = "65535")]
    max_job_size: u64,

    /// Jobs with a priority below this value count as urgent in stats.
    #[arg(long, default_value = "1024")]
    urgent_threshold: u32,

    /// The smallest TTR (in seconds) a job can have. Jobs put with a smaller TTR get this one.
    #[arg(long, default_value = "1")]
    min_ttr: u64,

    /// How many commands can pile up for a single tube before clients have to wait their
    /// turn.
    #[arg(long, default_value = "1024")]
    inbox_capacity: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logger()
        .context("Failed to setup logging")?;
    let args = Args::parse();
    let broker_config = BrokerConfigBuilder::default()
        .urgent_threshold(args.urgent_threshold)
        .min_ttr(Duration::from_secs(args.min_ttr))
        .inbox_capacity(args.inbox_capacity)
        .build()
        .context("Invalid broker configuration")?;
    let parse_options = ParseOptionsBuilder::default()
        .max_job_size(args.max_job_size)
        .build()
        .context("Invalid protocol configuration")?;
    let server = Arc::new(Server::new(Broker::new(broker_config), parse_options));

    let listener = TcpListener::bind((args.listen.as_str(), args.port)).await
        .with_context(|| format!("Failed to listen on {}:{}", args.listen, args.port))?;
    info!("Listening on {}:{}", args.listen, args.port);

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("main() -- ctrl-c received, shutting down");
                    shutdown.cancel();
                }
                Err(e) => error!("main() -- cannot listen for ctrl-c: {:?}", e),
            }
        }
    });
    server::serve(listener, server, shutdown).await
}
