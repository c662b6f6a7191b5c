//! Scheduler state and the request dispatcher.
//!
//! Every RPC operation is serialized against this state through one
//! `tokio::sync::Mutex`; operations are O(1) or O(batch) in memory plus a
//! batched SQLite write, so the coarse lock is not a bottleneck.

use std::collections::HashSet;
use std::path::Path;

use anyhow::Result;
use log::{debug, warn};

use crate::config::SchedulerConfig;
use crate::frontier::FrontierStore;
use crate::pools::{CookiePool, IdentityPool, ProxyPool};
use crate::wire::{LinkClass, Request, Response, RetStatus, UserIdentity};

/// Everything the scheduler owns: frontier, pools and the downloader
/// registry.
pub struct SchedulerState {
    frontier: FrontierStore,
    identities: IdentityPool,
    cookies: CookiePool,
    proxies: ProxyPool,
    downloaders: HashSet<String>,
}

impl SchedulerState {
    /// Open the frontier under `database_dir` and build the pools from
    /// configuration.
    pub async fn open(config: &SchedulerConfig) -> Result<Self> {
        Self::open_at(config, &config.database_dir).await
    }

    /// Like [`SchedulerState::open`] with an explicit database directory.
    pub async fn open_at(config: &SchedulerConfig, database_dir: &Path) -> Result<Self> {
        let frontier = FrontierStore::open(
            database_dir,
            config.store_max_retries,
            config.store_retry_delay(),
        )
        .await?;
        Ok(Self {
            frontier,
            identities: IdentityPool::new(config.user_identity.clone()),
            cookies: CookiePool::new(),
            proxies: ProxyPool::new(),
            downloaders: HashSet::new(),
        })
    }

    /// Dispatch one RPC operation. Protocol failures are expressed as a
    /// `RetStatus::Failed` payload, never as a torn connection.
    pub async fn handle(&mut self, request: Request) -> Response {
        match request {
            Request::RegisterDownloader { name } => {
                if !self.downloaders.insert(name.clone()) {
                    warn!("downloader {name} registered twice");
                } else {
                    debug!("registered downloader {name}");
                }
                Response::Status(RetStatus::Success)
            }
            Request::UnregisterDownloader { name } => {
                if self.downloaders.remove(&name) {
                    self.identities.reclaim(&name);
                    debug!("unregistered downloader {name}");
                    Response::Status(RetStatus::Success)
                } else {
                    warn!("unregister of unknown downloader {name}");
                    Response::Status(RetStatus::Failed)
                }
            }
            Request::RequestUserIdentity { name } => match self.identities.request(&name) {
                Some(identity) => {
                    debug!("granted identity {} to {name}", identity.name);
                    Response::Identity(identity)
                }
                None => {
                    warn!("no identities configured; granting empty pair to {name}");
                    Response::Identity(UserIdentity::new("", ""))
                }
            },
            Request::ResignUserIdentity { identity, name } => {
                if self.identities.resign(&identity, &name) {
                    Response::Status(RetStatus::Success)
                } else {
                    warn!("{name} resigned identity {} it does not hold", identity.name);
                    Response::Status(RetStatus::Failed)
                }
            }
            Request::GrabLinks { size } => {
                let links = self.frontier.grab(size as usize, LinkClass::General).await;
                debug!("dispensed {} general links", links.len());
                Response::Links(links)
            }
            Request::SubmitLinks { links } => {
                let accepted = self.frontier.submit(&links, LinkClass::General).await;
                debug!("accepted {accepted}/{} general links", links.len());
                Response::Status(RetStatus::Success)
            }
            Request::GrabTopicLinks { size } => {
                let links = self.frontier.grab(size as usize, LinkClass::Topic).await;
                debug!("dispensed {} topic links", links.len());
                Response::Links(links)
            }
            Request::SubmitTopicLinks { links } => {
                let accepted = self.frontier.submit(&links, LinkClass::Topic).await;
                debug!("accepted {accepted}/{} topic links", links.len());
                Response::Status(RetStatus::Success)
            }
            Request::RequestProxies { name, size } => {
                let proxies = self.proxies.request(size as usize);
                debug!("granted {} proxies to {name}", proxies.len());
                Response::Proxies(proxies)
            }
            Request::RequestCookie { name } => {
                let cookie = self.cookies.request();
                if cookie.is_sentinel() {
                    debug!("no cookies for {name}, returning sentinel");
                }
                Response::Cookie(cookie)
            }
            Request::SubmitCookies { cookies } => {
                debug!("received {} cookies", cookies.len());
                self.cookies.submit(cookies);
                Response::Status(RetStatus::Success)
            }
        }
    }

    /// Install a freshly fetched master proxy set.
    pub fn install_proxies(&mut self, proxies: Vec<crate::wire::ProxyAddress>) {
        self.proxies.install_master(proxies);
    }

    /// Pending frontier size for one class.
    #[must_use]
    pub fn frontier_size(&self, class: LinkClass) -> usize {
        self.frontier.size(class)
    }

    /// Flush volatile counters and close the store. Called once on
    /// shutdown.
    pub async fn shutdown(&self) {
        if let Err(e) = self.frontier.flush().await {
            warn!("failed to flush frontier counters: {e:#}");
        }
        self.frontier.close().await;
    }
}
