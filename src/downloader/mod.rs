//! Downloader workers.
//!
//! Each worker is one tokio task walking the INIT → REGISTERING → RUNNING
//! ⇄ BACKOFF → DRAINING machine: connect and register against the
//! scheduler, lease an identity, then grab/fetch/feed until told to stop.
//! Remote RPC failures never kill a worker; they only send it back
//! through the failover sleep. On stop the worker resubmits whatever is
//! left of its local batch and unregisters.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::Utc;
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::Config;
use crate::pipeline::{FetchedPage, Pipeline};
use crate::scheduler::SchedulerClient;
use crate::wire::{LinkClass, ProxyAddress};

/// Response landed on the rate-limit interstitial: transient, retry.
static SYS_BUSY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)sysbusy|touch\.weibo\.cn/delay").expect("busy pattern"));

/// Response bounced to the login wall: the session cookie has expired.
static LOGIN_CHALLENGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)passport\.weibo|login\.sina\.com").expect("login pattern"));

/// Pause before re-picking when the local proxy cache is empty.
const EMPTY_PROXY_CACHE_DELAY: Duration = Duration::from_secs(2);

/// Outcome of a single fetch attempt. The fetch loop branches on values
/// instead of threading exceptions through it.
enum FetchOutcome {
    Fetched(FetchedPage),
    /// Rate-limited or transport trouble; retry with a new proxy pick.
    Transient,
    /// Bounced to the login wall; refresh the cookie, then retry.
    AuthExpired,
}

/// One downloader worker.
pub struct Downloader {
    name: String,
    class: LinkClass,
    config: Arc<Config>,
    pipeline: Arc<dyn Pipeline>,
    /// Local proxy cache; the refresh task swaps the whole vec, fetch
    /// attempts read an atomic snapshot.
    proxies: Arc<ArcSwap<Vec<ProxyAddress>>>,
    /// Current session cookie string.
    cookie: Arc<parking_lot::Mutex<String>>,
    shutdown: watch::Receiver<bool>,
}

impl Downloader {
    #[must_use]
    pub fn new(
        name: String,
        class: LinkClass,
        config: Arc<Config>,
        pipeline: Arc<dyn Pipeline>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            name,
            class,
            config,
            pipeline,
            proxies: Arc::new(ArcSwap::from_pointee(Vec::new())),
            cookie: Arc::new(parking_lot::Mutex::new(String::new())),
            shutdown,
        }
    }

    fn stopping(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Sleep, returning early (true) when shutdown flips.
    async fn interruptible_sleep(&mut self, d: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(d) => false,
            _ = self.shutdown.changed() => true,
        }
    }

    /// Entry point: the full worker lifecycle.
    pub async fn run(mut self) {
        info!("starting downloader {}", self.name);
        let failover = self.config.scheduler.client_failover();
        let mut client = SchedulerClient::new(self.config.scheduler.bind_addr());

        // INIT / REGISTERING: keep trying until registered or stopped.
        loop {
            if self.stopping() {
                info!("downloader {} stopped before registering", self.name);
                return;
            }
            match self.register(&mut client).await {
                Ok(()) => break,
                Err(e) => {
                    warn!(
                        "{}: registration failed: {e}; retrying in {failover:?}",
                        self.name
                    );
                    client.close();
                    if self.interruptible_sleep(failover).await {
                        info!("downloader {} stopped before registering", self.name);
                        return;
                    }
                }
            }
        }

        let refresher = self.spawn_proxy_refresher();

        // RUNNING / BACKOFF.
        let mut batch: Vec<String> = Vec::new();
        while !self.stopping() {
            match self.grab(&mut client).await {
                Ok(links) if links.is_empty() => {
                    debug!("{}: frontier empty", self.name);
                    if self.interruptible_sleep(failover).await {
                        break;
                    }
                }
                Ok(links) => {
                    batch = links;
                    self.work_batch(&mut client, &mut batch).await;
                }
                Err(e) => {
                    warn!("{}: grab failed: {e}; backing off {failover:?}", self.name);
                    if self.interruptible_sleep(failover).await {
                        break;
                    }
                }
            }
        }

        refresher.abort();

        // DRAINING: push leftover work back, then unregister.
        self.drain(&mut client, batch).await;
        info!("downloader {} stopped", self.name);
    }

    async fn register(&self, client: &mut SchedulerClient) -> Result<(), crate::scheduler::ClientError> {
        client.register_downloader(&self.name).await?;
        let identity = client.request_user_identity(&self.name).await?;
        debug!("{}: leased identity {}", self.name, identity.name);
        Ok(())
    }

    async fn grab(
        &self,
        client: &mut SchedulerClient,
    ) -> Result<Vec<String>, crate::scheduler::ClientError> {
        let size = self.config.downloader.link_batch_size;
        match self.class {
            LinkClass::General => client.grab_links(size).await,
            LinkClass::Topic => client.grab_topic_links(size).await,
        }
    }

    /// Fetch every link in the batch, feeding the pipeline and pacing
    /// between successes. Links disappear from the batch as they finish;
    /// whatever is left when shutdown interrupts goes back in DRAINING.
    async fn work_batch(&mut self, client: &mut SchedulerClient, batch: &mut Vec<String>) {
        while let Some(link) = batch.last().cloned() {
            let Some(page) = self.fetch(client, &link).await else {
                return; // shutdown observed mid-fetch
            };
            self.pipeline.feed(page);
            batch.pop();
            if self
                .interruptible_sleep(self.config.downloader.inter_request_delay())
                .await
            {
                return;
            }
        }
    }

    /// Fetch one link, retrying through proxy churn, rate-limit bounces
    /// and cookie expiry until it lands or shutdown interrupts.
    async fn fetch(&mut self, client: &mut SchedulerClient, link: &str) -> Option<FetchedPage> {
        loop {
            if self.stopping() {
                return None;
            }
            let Some(proxy) = self.pick_proxy() else {
                debug!("{}: proxy cache empty, waiting", self.name);
                if self.interruptible_sleep(EMPTY_PROXY_CACHE_DELAY).await {
                    return None;
                }
                continue;
            };
            match self.attempt(link, &proxy).await {
                FetchOutcome::Fetched(page) => return Some(page),
                FetchOutcome::Transient => {}
                FetchOutcome::AuthExpired => {
                    info!("{}: session expired, refreshing cookie", self.name);
                    if !self.update_cookie(client).await {
                        return None;
                    }
                }
            }
        }
    }

    /// One HTTP attempt through one proxy.
    async fn attempt(&self, link: &str, proxy: &ProxyAddress) -> FetchOutcome {
        let http = match reqwest::Client::builder()
            .proxy(match reqwest::Proxy::all(proxy.to_proxy_url()) {
                Ok(p) => p,
                Err(e) => {
                    warn!("{}: unusable proxy {}: {e}", self.name, proxy.to_proxy_url());
                    return FetchOutcome::Transient;
                }
            })
            .danger_accept_invalid_certs(true)
            .timeout(self.config.downloader.requests_timeout())
            .build()
        {
            Ok(c) => c,
            Err(e) => {
                warn!("{}: failed to build http client: {e}", self.name);
                return FetchOutcome::Transient;
            }
        };

        let cookie = self.cookie.lock().clone();
        let mut request = http.get(link);
        if !cookie.is_empty() {
            request = request.header(reqwest::header::COOKIE, cookie);
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                debug!("{}: fetch of {link} failed: {e}", self.name);
                return FetchOutcome::Transient;
            }
        };

        let final_url = response.url().to_string();
        if SYS_BUSY_RE.is_match(&final_url) {
            debug!("{}: rate-limited on {link}", self.name);
            return FetchOutcome::Transient;
        }
        if LOGIN_CHALLENGE_RE.is_match(&final_url) {
            return FetchOutcome::AuthExpired;
        }

        let status = response.status().as_u16();
        match response.text().await {
            Ok(body) => FetchOutcome::Fetched(FetchedPage {
                url: link.to_string(),
                final_url,
                status,
                body,
                fetched_at: Utc::now(),
            }),
            Err(e) => {
                debug!("{}: failed to read body of {link}: {e}", self.name);
                FetchOutcome::Transient
            }
        }
    }

    /// Random pick from an atomic snapshot of the proxy cache.
    fn pick_proxy(&self) -> Option<ProxyAddress> {
        let snapshot = self.proxies.load();
        if snapshot.is_empty() {
            return None;
        }
        let idx = rand::rng().random_range(0..snapshot.len());
        Some(snapshot[idx].clone())
    }

    /// Poll the scheduler until a usable cookie arrives. Returns false
    /// when shutdown interrupts the wait.
    async fn update_cookie(&mut self, client: &mut SchedulerClient) -> bool {
        let interval = self.config.downloader.cookie_update_interval();
        loop {
            match client.request_cookie(&self.name).await {
                Ok(cookie) if !cookie.is_sentinel() => {
                    debug!("{}: got cookie for user {}", self.name, cookie.user);
                    *self.cookie.lock() = cookie.cookie;
                    return true;
                }
                Ok(_) => debug!("{}: no cookie available yet", self.name),
                Err(e) => warn!("{}: cookie request failed: {e}", self.name),
            }
            if self.interruptible_sleep(interval).await {
                return false;
            }
        }
    }

    /// Periodically pull a fresh proxy batch into the local cache. An
    /// empty batch leaves the cache untouched; a non-empty one replaces
    /// it wholesale.
    fn spawn_proxy_refresher(&self) -> JoinHandle<()> {
        let name = self.name.clone();
        let addr = self.config.scheduler.bind_addr();
        let pool_size = self.config.scheduler.proxy_pool_size;
        let interval = Duration::from_secs(self.config.downloader.proxy_interval);
        let proxies = Arc::clone(&self.proxies);
        let mut shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            let mut client = SchedulerClient::new(addr);
            loop {
                match client.request_proxies(&name, pool_size).await {
                    Ok(batch) if batch.is_empty() => {
                        debug!("{name}: proxy refresh returned nothing, keeping cache")
                    }
                    Ok(batch) => {
                        debug!("{name}: proxy cache refreshed with {} entries", batch.len());
                        proxies.store(Arc::new(batch));
                    }
                    Err(e) => {
                        warn!("{name}: proxy refresh failed: {e}");
                        client.close();
                    }
                }
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown.changed() => return,
                }
            }
        })
    }

    /// Resubmit leftover links and unregister. General links get a fresh
    /// uniqueness suffix so the dead set does not swallow them.
    async fn drain(&self, client: &mut SchedulerClient, batch: Vec<String>) {
        if !batch.is_empty() {
            info!(
                "{}: resubmitting {} unfinished links",
                self.name,
                batch.len()
            );
            let result = match self.class {
                LinkClass::General => {
                    let token = Uuid::new_v4().simple().to_string();
                    let links = batch
                        .into_iter()
                        .map(|l| {
                            let sep = if l.contains('?') { '&' } else { '?' };
                            format!("{l}{sep}uuid={token}")
                        })
                        .collect();
                    client.submit_links(links).await
                }
                LinkClass::Topic => client.submit_topic_links(batch).await,
            };
            if let Err(e) = result {
                warn!("{}: failed to resubmit unfinished links: {e}", self.name);
            }
        }
        if let Err(e) = client.unregister_downloader(&self.name).await {
            warn!("{}: unregister failed: {e}", self.name);
        }
        client.close();
    }
}

/// Spawn the configured fleet: general workers named
/// `{prefix}-{idx}` and topic workers named `{prefix}-topic-{idx}`.
pub fn spawn_fleet(
    config: Arc<Config>,
    pipeline: Arc<dyn Pipeline>,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let prefix = config.downloader.name_prefix.clone();
    let mut handles = Vec::new();
    for idx in 0..config.downloader.num_downloaders {
        let worker = Downloader::new(
            format!("{prefix}-{idx}"),
            LinkClass::General,
            Arc::clone(&config),
            Arc::clone(&pipeline),
            shutdown.clone(),
        );
        handles.push(tokio::spawn(worker.run()));
    }
    for idx in 0..config.downloader.num_topic_downloaders {
        let worker = Downloader::new(
            format!("{prefix}-topic-{idx}"),
            LinkClass::Topic,
            Arc::clone(&config),
            Arc::clone(&pipeline),
            shutdown.clone(),
        );
        handles.push(tokio::spawn(worker.run()));
    }
    info!("spawned {} downloaders", handles.len());
    handles
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_and_login_patterns() {
        assert!(SYS_BUSY_RE.is_match("https://m.weibo.cn/sysbusy"));
        assert!(SYS_BUSY_RE.is_match("https://touch.weibo.cn/delay?x=1"));
        assert!(LOGIN_CHALLENGE_RE.is_match("https://passport.weibo.com/signin"));
        assert!(LOGIN_CHALLENGE_RE.is_match("https://login.sina.com.cn/sso"));
        assert!(!SYS_BUSY_RE.is_match("https://m.weibo.cn/u/1"));
        assert!(!LOGIN_CHALLENGE_RE.is_match("https://m.weibo.cn/u/1"));
    }
}
