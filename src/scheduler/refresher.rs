//! Periodic proxy refresh from an external provider.
//!
//! Each tick fetches the provider URL, parses newline-separated
//! `addr:port` entries and atomically replaces the scheduler's master
//! proxy set. Any failure leaves the previous set intact.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use log::{info, warn};
use tokio::sync::{Mutex, watch};

use crate::scheduler::state::SchedulerState;
use crate::wire::ProxyAddress;

pub struct ProxyRefresher {
    state: Arc<Mutex<SchedulerState>>,
    provider: String,
    interval: Duration,
    http: reqwest::Client,
}

impl ProxyRefresher {
    #[must_use]
    pub fn new(state: Arc<Mutex<SchedulerState>>, provider: String, interval: Duration) -> Self {
        Self {
            state,
            provider,
            interval,
            http: reqwest::Client::new(),
        }
    }

    /// Tick until shutdown. The first fetch happens immediately so workers
    /// do not wait a full interval for their first proxies.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        if self.provider.is_empty() {
            info!("no proxy provider configured; refresher idle");
            return;
        }
        loop {
            match self.fetch().await {
                Ok(proxies) => {
                    info!("installing {} proxies from provider", proxies.len());
                    self.state.lock().await.install_proxies(proxies);
                }
                Err(e) => warn!("proxy refresh failed, keeping previous set: {e:#}"),
            }
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.changed() => return,
            }
        }
    }

    async fn fetch(&self) -> Result<Vec<ProxyAddress>> {
        let body = self
            .http
            .get(&self.provider)
            .send()
            .await
            .context("provider request failed")?
            .error_for_status()
            .context("provider returned an error status")?
            .text()
            .await
            .context("failed to read provider body")?;
        parse_provider_body(&body)
    }
}

/// Parse `addr:port` lines into a deduplicated proxy list. Malformed lines
/// are skipped with a warning; a body with no valid line at all is an
/// error so the previous set survives.
pub fn parse_provider_body(body: &str) -> Result<Vec<ProxyAddress>> {
    let mut seen = HashSet::new();
    let mut proxies = Vec::new();
    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line.rsplit_once(':') {
            Some((addr, port)) if !addr.is_empty() => match port.parse::<u16>() {
                Ok(port) => {
                    let proxy = ProxyAddress::new(addr, port);
                    if seen.insert(proxy.clone()) {
                        proxies.push(proxy);
                    }
                }
                Err(_) => warn!("skipping proxy line with bad port: {line}"),
            },
            _ => warn!("skipping malformed proxy line: {line}"),
        }
    }
    if proxies.is_empty() {
        bail!("provider body contained no usable proxies");
    }
    Ok(proxies)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_dedupes_lines() {
        let body = "1.2.3.4:8080\n\n5.6.7.8:3128\n1.2.3.4:8080\n";
        let proxies = parse_provider_body(body).unwrap();
        assert_eq!(
            proxies,
            vec![
                ProxyAddress::new("1.2.3.4", 8080),
                ProxyAddress::new("5.6.7.8", 3128),
            ]
        );
    }

    #[test]
    fn malformed_lines_are_skipped_not_fatal() {
        let body = "nonsense\n1.2.3.4:99999\n5.6.7.8:3128\n";
        let proxies = parse_provider_body(body).unwrap();
        assert_eq!(proxies, vec![ProxyAddress::new("5.6.7.8", 3128)]);
    }

    #[test]
    fn empty_body_is_an_error() {
        assert!(parse_provider_body("").is_err());
        assert!(parse_provider_body("garbage\n").is_err());
    }

    #[tokio::test]
    async fn fetch_parses_provider_response() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/proxies")
            .with_status(200)
            .with_body("9.9.9.9:8000\n8.8.8.8:8001\n")
            .create_async()
            .await;

        let dir = tempfile::TempDir::new().unwrap();
        let state = Arc::new(Mutex::new(
            crate::scheduler::SchedulerState::open_at(
                &crate::config::SchedulerConfig::default(),
                dir.path(),
            )
            .await
            .unwrap(),
        ));
        let refresher = ProxyRefresher::new(
            state,
            format!("{}/proxies", server.url()),
            Duration::from_secs(60),
        );

        let proxies = refresher.fetch().await.unwrap();
        assert_eq!(proxies.len(), 2);
        mock.assert_async().await;
    }
}
