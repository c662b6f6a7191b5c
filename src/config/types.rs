//! Configuration types and the JSON loader.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::wire::UserIdentity;

/// Scheduler-side settings: bind address, credential list, proxy source,
/// seeder cadence and frontier store tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Bind address for the RPC server.
    pub addr: String,
    pub port: u16,

    /// Login credentials granted exclusively, one per downloader.
    pub user_identity: Vec<UserIdentity>,

    /// HTTP endpoint returning newline-separated `addr:port` proxies.
    pub proxy_provider: String,
    /// Batch size a downloader pulls into its local proxy cache.
    pub proxy_pool_size: u32,
    /// Seconds between proxy refreshes, on both server and worker side.
    pub proxy_interval: u64,

    /// Seconds the server waits before re-binding after a listener failure.
    pub server_failover_interval: u64,
    /// Seconds a client sleeps before retrying a failed transport.
    pub client_failover_interval: u64,

    /// Seconds between trending-page seed rounds.
    pub hot_seeder_interval: u64,
    /// Seed URL templates for the trending seeder; `{uuid}` is replaced with
    /// a fresh random token each round so the fingerprint bypasses the dead
    /// set.
    pub hot_seeder_templates: Vec<String>,

    /// Seconds between topic seed rounds.
    pub topic_seeder_interval: u64,
    /// Topic seed URL template; `{page}` is replaced with `1..=topic_seeder_pages`.
    pub topic_seeder_template: String,
    pub topic_seeder_pages: u32,

    /// Bounded retry policy for frontier store writes.
    pub store_max_retries: u32,
    /// Seconds between store write retries.
    pub store_retry_delay: u64,

    /// Directory holding the frontier database and the advisory count file.
    pub database_dir: PathBuf,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1".to_string(),
            port: 7180,
            user_identity: Vec::new(),
            proxy_provider: String::new(),
            proxy_pool_size: 20,
            proxy_interval: 300,
            server_failover_interval: 10,
            client_failover_interval: 10,
            hot_seeder_interval: 2,
            hot_seeder_templates: vec![
                "https://m.weibo.cn/api/container/getIndex?containerid=102803&openApp=0&uuid={uuid}"
                    .to_string(),
            ],
            topic_seeder_interval: 3600,
            topic_seeder_template:
                "https://m.weibo.cn/api/container/getIndex?containerid=100803&page={page}"
                    .to_string(),
            topic_seeder_pages: 50,
            store_max_retries: 3,
            store_retry_delay: 1,
            database_dir: PathBuf::from("database"),
        }
    }
}

impl SchedulerConfig {
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.addr, self.port)
    }

    #[must_use]
    pub fn client_failover(&self) -> Duration {
        Duration::from_secs(self.client_failover_interval)
    }

    #[must_use]
    pub fn server_failover(&self) -> Duration {
        Duration::from_secs(self.server_failover_interval)
    }

    #[must_use]
    pub fn store_retry_delay(&self) -> Duration {
        Duration::from_secs(self.store_retry_delay)
    }
}

/// Downloader fleet settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloaderConfig {
    /// Workers grabbing from the general queue.
    pub num_downloaders: u32,
    /// Workers grabbing from the topic queue.
    pub num_topic_downloaders: u32,
    /// Links requested per grab.
    pub link_batch_size: u32,
    /// Per-request HTTP timeout, seconds.
    pub requests_timeout: u64,
    /// Seconds between cookie polls while waiting out a login challenge.
    pub cookie_update_interval: u64,
    /// Worker names are `{name_prefix}-{idx}` / `{name_prefix}-topic-{idx}`.
    pub name_prefix: String,
    /// Seconds between local proxy-cache refreshes.
    pub proxy_interval: u64,
    /// Pacing delay between successful fetches, seconds.
    pub inter_request_delay: u64,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            num_downloaders: 4,
            num_topic_downloaders: 1,
            link_batch_size: 20,
            requests_timeout: 30,
            cookie_update_interval: 10,
            name_prefix: "downloader".to_string(),
            proxy_interval: 300,
            inter_request_delay: 5,
        }
    }
}

impl DownloaderConfig {
    #[must_use]
    pub fn requests_timeout(&self) -> Duration {
        Duration::from_secs(self.requests_timeout)
    }

    #[must_use]
    pub fn cookie_update_interval(&self) -> Duration {
        Duration::from_secs(self.cookie_update_interval)
    }

    #[must_use]
    pub fn inter_request_delay(&self) -> Duration {
        Duration::from_secs(self.inter_request_delay)
    }
}

/// Response pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of concurrent pipeline workers.
    pub engine_pool_size: u32,
    /// How many times a handler may resubmit a link it failed to process.
    pub link_max_retries: u32,
    /// JSONL file extracted records are appended to.
    pub records_path: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            engine_pool_size: 4,
            link_max_retries: 3,
            records_path: PathBuf::from("records.jsonl"),
        }
    }
}

/// Root configuration, loaded once at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    pub downloader: DownloaderConfig,
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Load from a JSON file. Unknown keys are ignored; missing keys take
    /// their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    /// Load from `path` when given, otherwise fall back to defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_usable() {
        let cfg = Config::default();
        assert_eq!(cfg.scheduler.bind_addr(), "127.0.0.1:7180");
        assert!(cfg.downloader.num_downloaders > 0);
        assert!(cfg.pipeline.engine_pool_size > 0);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(
            f,
            r#"{{
                "scheduler": {{
                    "port": 9999,
                    "user_identity": [{{"name": "u", "pwd": "p"}}]
                }},
                "downloader": {{"num_downloaders": 2}}
            }}"#
        )
        .unwrap();

        let cfg = Config::load(f.path()).unwrap();
        assert_eq!(cfg.scheduler.port, 9999);
        assert_eq!(cfg.scheduler.user_identity.len(), 1);
        assert_eq!(cfg.downloader.num_downloaders, 2);
        // Untouched sections keep their defaults.
        assert_eq!(cfg.downloader.link_batch_size, 20);
        assert_eq!(cfg.pipeline.engine_pool_size, 4);
    }
}
