//! Link-submission fan-in.
//!
//! The pipeline produces many small link batches from many tasks; opening
//! a transport per producer call would be wasteful and racy. The sink puts
//! batches on an unbounded queue consumed by one task that owns the
//! transport: open, dispatch by class, close, loop. A failed dispatch is
//! retried with the same batch after the failover interval; the retry
//! sleep races the shutdown flag so a dead scheduler cannot pin the
//! consumer past stop.

use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::scheduler::client::SchedulerClient;
use crate::wire::LinkClass;

enum SinkCommand {
    Batch(Vec<String>, LinkClass),
    Stop,
}

/// Cheap cloneable handle; producers enqueue and never block.
#[derive(Clone)]
pub struct LinkSink {
    tx: mpsc::UnboundedSender<SinkCommand>,
}

impl LinkSink {
    /// Spawn the consumer task and return the producer handle.
    pub fn start(
        scheduler_addr: String,
        failover: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(consume(scheduler_addr, failover, rx, shutdown));
        (Self { tx }, handle)
    }

    /// Enqueue a batch. Never blocks; a batch enqueued after `stop` is
    /// silently dropped.
    pub fn submit_links(&self, links: Vec<String>, class: LinkClass) {
        if links.is_empty() {
            return;
        }
        if self.tx.send(SinkCommand::Batch(links, class)).is_err() {
            warn!("link sink is stopped; dropping batch");
        }
    }

    /// Ask the consumer to drain what is queued and exit.
    pub fn stop(&self) {
        let _ = self.tx.send(SinkCommand::Stop);
    }
}

async fn consume(
    scheduler_addr: String,
    failover: Duration,
    mut rx: mpsc::UnboundedReceiver<SinkCommand>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("link sink consumer started");
    let mut client = SchedulerClient::new(scheduler_addr);
    while let Some(command) = rx.recv().await {
        match command {
            SinkCommand::Stop => break,
            SinkCommand::Batch(links, class) => {
                let delivered = dispatch(&mut client, links, class, failover, &mut shutdown).await;
                client.close();
                if !delivered {
                    // Shutdown interrupted the retry; anything still queued
                    // would hit the same dead scheduler.
                    break;
                }
            }
        }
    }
    info!("link sink consumer stopped");
}

/// Dispatch one batch, retrying the same batch until the scheduler takes
/// it or shutdown interrupts the failover sleep. Returns whether the
/// batch was delivered.
async fn dispatch(
    client: &mut SchedulerClient,
    links: Vec<String>,
    class: LinkClass,
    failover: Duration,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    loop {
        if *shutdown.borrow() {
            warn!("shutting down; dropping batch of {} links", links.len());
            return false;
        }
        let result = match class {
            LinkClass::General => client.submit_links(links.clone()).await,
            LinkClass::Topic => client.submit_topic_links(links.clone()).await,
        };
        match result {
            Ok(_) => {
                debug!("submitted {} {class:?} links", links.len());
                return true;
            }
            Err(e) => {
                warn!("link submission failed: {e}; retrying in {failover:?}");
                tokio::select! {
                    _ = tokio::time::sleep(failover) => {}
                    _ = shutdown.changed() => {
                        warn!("shutting down; dropping batch of {} links", links.len());
                        return false;
                    }
                }
            }
        }
    }
}
