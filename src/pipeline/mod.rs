//! Response-processing pipeline contract and engine.
//!
//! The downloader hands every fetched page to [`Pipeline::feed`], which
//! must neither block nor panic into the caller. The concrete engine here
//! queues pages onto an unbounded channel drained by a small worker pool;
//! each worker classifies the response, runs the matching handler, writes
//! the produced records to a [`RecordSink`] and fans extracted links back
//! to the scheduler through the [`LinkSink`]. Handler failures are logged
//! and the response abandoned.

pub mod routes;

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::config::PipelineConfig;
use crate::scheduler::LinkSink;
use crate::wire::LinkClass;

pub use routes::ResponseKind;

/// One fetched HTTP response, opaque to the scheduler.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// The link as grabbed from the frontier.
    pub url: String,
    /// Where the fetch actually landed after redirects.
    pub final_url: String,
    pub status: u16,
    pub body: String,
    pub fetched_at: DateTime<Utc>,
}

/// The single method the downloader needs from a response processor.
pub trait Pipeline: Send + Sync {
    fn feed(&self, page: FetchedPage);
}

/// Summary record emitted per processed response.
#[derive(Debug, Clone, Serialize)]
pub struct PageRecord {
    pub kind: ResponseKind,
    pub url: String,
    pub final_url: String,
    pub status: u16,
    pub body_bytes: usize,
    pub links_found: usize,
    pub fetched_at: DateTime<Utc>,
}

/// Generic destination for extracted records.
pub trait RecordSink: Send + Sync {
    fn write(&self, record: &PageRecord) -> Result<()>;
}

/// Appends one JSON object per line.
pub struct JsonlSink {
    file: parking_lot::Mutex<std::fs::File>,
}

impl JsonlSink {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open record file {}", path.display()))?;
        Ok(Self {
            file: parking_lot::Mutex::new(file),
        })
    }
}

impl RecordSink for JsonlSink {
    fn write(&self, record: &PageRecord) -> Result<()> {
        let line = serde_json::to_string(record).context("failed to serialize record")?;
        let mut file = self.file.lock();
        writeln!(file, "{line}").context("failed to append record")?;
        Ok(())
    }
}

/// Queue-fed pipeline engine.
pub struct PipelineEngine {
    tx: mpsc::UnboundedSender<FetchedPage>,
}

impl PipelineEngine {
    /// Spawn `engine_pool_size` workers draining the feed queue. Returns
    /// the engine handle and the worker join handles.
    pub fn start(
        config: &PipelineConfig,
        sink: Arc<dyn RecordSink>,
        links: LinkSink,
    ) -> (Arc<Self>, Vec<JoinHandle<()>>) {
        let (tx, rx) = mpsc::unbounded_channel::<FetchedPage>();
        let rx = Arc::new(Mutex::new(rx));

        let pool_size = config.engine_pool_size.max(1) as usize;
        let max_retries = config.link_max_retries;
        let mut workers = Vec::with_capacity(pool_size);
        for idx in 0..pool_size {
            let rx = Arc::clone(&rx);
            let sink = Arc::clone(&sink);
            let links = links.clone();
            workers.push(tokio::spawn(async move {
                debug!("pipeline worker {idx} started");
                loop {
                    let page = { rx.lock().await.recv().await };
                    let Some(page) = page else { break };
                    let mut attempt = 0;
                    while let Err(e) = process(&page, sink.as_ref(), &links) {
                        attempt += 1;
                        if attempt > max_retries {
                            error!("abandoning response {}: {e:#}", page.url);
                            break;
                        }
                        warn!(
                            "pipeline error for {} (attempt {attempt}/{max_retries}): {e:#}",
                            page.url
                        );
                    }
                }
                debug!("pipeline worker {idx} stopped");
            }));
        }
        info!("pipeline engine started with {pool_size} workers");

        (Arc::new(Self { tx }), workers)
    }
}

impl Pipeline for PipelineEngine {
    fn feed(&self, page: FetchedPage) {
        if self.tx.send(page).is_err() {
            warn!("pipeline engine is stopped; dropping response");
        }
    }
}

/// Run one response through classification, the handler and the sinks.
fn process(page: &FetchedPage, sink: &dyn RecordSink, links: &LinkSink) -> Result<()> {
    let kind = ResponseKind::classify(&page.final_url);
    let output = routes::route(kind, page);

    let mut general = Vec::new();
    let mut topic = Vec::new();
    for link in output.links {
        match LinkClass::of(&link) {
            LinkClass::General => general.push(link),
            LinkClass::Topic => topic.push(link),
        }
    }
    links.submit_links(general, LinkClass::General);
    links.submit_links(topic, LinkClass::Topic);

    sink.write(&output.record)?;
    Ok(())
}
