//! Configuration for the scheduler, the downloader fleet and the pipeline.
//!
//! One [`Config`] is built at startup (from a JSON file or defaults) and
//! passed explicitly to every component. There is no process-global
//! configuration state.

pub mod types;

pub use types::{Config, DownloaderConfig, PipelineConfig, SchedulerConfig};
