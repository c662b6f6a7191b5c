//! spindle: a distributed crawler for a microblog site.
//!
//! The crate is organized around a central scheduler that owns the crawl
//! frontier and every scarce resource, a fleet of downloader workers that
//! lease from it over a typed RPC surface, and a response pipeline that
//! fans extracted links back in:
//!
//! - [`wire`]: the shared RPC schema and length-framed codec
//! - [`frontier`]: the persistent pending/dead link store
//! - [`pools`]: identity, cookie and proxy leasing
//! - [`scheduler`]: service state, TCP server, client, fan-in, seeders
//! - [`downloader`]: the worker state machine
//! - [`pipeline`]: the response-processing contract and engine
//! - [`config`] / [`daemon`]: startup plumbing

pub mod config;
pub mod daemon;
pub mod downloader;
pub mod frontier;
pub mod pipeline;
pub mod pools;
pub mod scheduler;
pub mod wire;

pub use config::Config;
pub use downloader::Downloader;
pub use frontier::FrontierStore;
pub use pipeline::{FetchedPage, Pipeline, PipelineEngine};
pub use scheduler::{LinkSink, SchedulerClient, SchedulerServer, SchedulerState};
pub use wire::{Cookie, LinkClass, ProxyAddress, RetStatus, UserIdentity};
