//! Shared server state and the accept loop.

use crate::{conn, stats::ServerStats};
use anyhow::Result;
use bean_protocol::ParseOptions;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tubeyard_queue::{Broker, job::ClientID};

/// Everything a connection needs to talk to the rest of the process.
#[derive(Debug)]
pub struct Server {
    pub broker: Broker,
    pub stats: ServerStats,
    pub parse_options: ParseOptions,
    next_client: AtomicU64,
}

impl Server {
    pub fn new(broker: Broker, parse_options: ParseOptions) -> Self {
        Self {
            broker,
            stats: ServerStats::default(),
            parse_options,
            next_client: AtomicU64::new(1),
        }
    }

    /// Hand out an id for a new connection.
    pub fn next_client(&self) -> ClientID {
        ClientID::from(self.next_client.fetch_add(1, Ordering::Relaxed))
    }
}

/// Accept connections until `shutdown` is cancelled. Every connection runs in its own task and
/// gets a child of `shutdown` so it stops along with us.
pub async fn serve(listener: TcpListener, server: Arc<Server>, shutdown: CancellationToken) -> Result<()> {
    loop {
        let (socket, addr) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("serve() -- error accepting connection: {:?}", e);
                    continue;
                }
            },
        };
        if let Err(e) = socket.set_nodelay(true) {
            warn!("{} -- could not set nodelay: {:?}", addr, e);
        }
        let server = server.clone();
        let closing = shutdown.child_token();
        tokio::spawn(async move {
            let client = server.next_client();
            if let Err(e) = conn::handle(socket, addr.to_string(), client, server, closing).await {
                error!("{} -- handler error: {:?}", addr, e);
            }
        });
    }
    info!("serve() -- no longer accepting connections");
    Ok(())
}
