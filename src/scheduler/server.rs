//! TCP server for the scheduler RPC surface.
//!
//! One tokio task per accepted connection; each request on a connection is
//! read with a bounded timeout so half-dead peers cannot pin a task
//! forever. Transport faults drop the offending connection and nothing
//! else. The outer loop re-binds after listener-level failures.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, info, warn};
use tokio::io::BufStream;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, watch};

use crate::config::SchedulerConfig;
use crate::scheduler::state::SchedulerState;
use crate::wire::{self, Request, WireError};

/// How long a connection may sit idle between requests before it is shed.
const CONN_READ_TIMEOUT: Duration = Duration::from_secs(20);

/// The scheduler RPC server.
pub struct SchedulerServer {
    state: Arc<Mutex<SchedulerState>>,
    bind_addr: String,
    failover: Duration,
}

impl SchedulerServer {
    pub fn new(config: &SchedulerConfig, state: Arc<Mutex<SchedulerState>>) -> Self {
        Self {
            state,
            bind_addr: config.bind_addr(),
            failover: config.server_failover(),
        }
    }

    /// Serve until the shutdown flag flips, then flush the frontier.
    /// Listener-level failures are logged and retried after the failover
    /// interval.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        while !*shutdown.borrow() {
            let listener = match TcpListener::bind(&self.bind_addr).await {
                Ok(l) => l,
                Err(e) => {
                    warn!(
                        "failed to bind {}: {e}; retrying in {:?}",
                        self.bind_addr, self.failover
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(self.failover) => continue,
                        _ = shutdown.changed() => break,
                    }
                }
            };
            info!("scheduler serving on {}", self.bind_addr);
            if let Err(e) = serve(&listener, Arc::clone(&self.state), &mut shutdown).await {
                if !*shutdown.borrow() {
                    warn!("accept loop failed: {e:#}; restarting in {:?}", self.failover);
                    tokio::time::sleep(self.failover).await;
                }
            }
        }

        self.state.lock().await.shutdown().await;
        info!("scheduler service stopped");
    }
}

/// Accept connections on `listener` until the shutdown flag flips or the
/// listener fails. Exposed so tests can drive the service on an ephemeral
/// port.
pub async fn serve(
    listener: &TcpListener,
    state: Arc<Mutex<SchedulerState>>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<()> {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted.context("accept failed")?;
                debug!("accepted connection from {peer}");
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    if let Err(e) = serve_connection(stream, state).await {
                        if e.is_disconnect() {
                            debug!("peer {peer} disconnected");
                        } else {
                            warn!("connection from {peer} dropped: {e}");
                        }
                    }
                });
            }
            _ = shutdown.changed() => return Ok(()),
        }
    }
}

/// Serve the request/response loop on one connection until the peer goes
/// away, times out, or sends garbage.
async fn serve_connection(
    stream: TcpStream,
    state: Arc<Mutex<SchedulerState>>,
) -> Result<(), WireError> {
    let mut stream = BufStream::new(stream);
    loop {
        let request: Request =
            match tokio::time::timeout(CONN_READ_TIMEOUT, wire::read_frame(&mut stream)).await {
                Ok(Ok(req)) => req,
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    debug!("connection idle past {CONN_READ_TIMEOUT:?}, shedding");
                    return Ok(());
                }
            };

        let response = state.lock().await.handle(request).await;
        wire::write_frame(&mut stream, &response).await?;
    }
}
