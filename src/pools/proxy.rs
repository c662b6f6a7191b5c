//! Shared batch dispensation of HTTP proxies.

use log::debug;

use crate::wire::ProxyAddress;

/// The proxy pool keeps a master set (replaced wholesale by the refresher)
/// and an idle set that is re-copied from master whenever a request would
/// drain it below the asked-for batch size. Proxies are not tracked per
/// downloader and many downloaders may use the same proxy at once.
///
/// Invariant: idle is always a subset of master.
#[derive(Debug, Default)]
pub struct ProxyPool {
    master: Vec<ProxyAddress>,
    idle: Vec<ProxyAddress>,
}

impl ProxyPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pop up to `size` proxies, replenishing idle from master first when
    /// it is low. Returns fewer than `size` only when master itself is
    /// smaller.
    pub fn request(&mut self, size: usize) -> Vec<ProxyAddress> {
        if self.idle.len() < size {
            self.idle = self.master.clone();
        }
        let take = size.min(self.idle.len());
        self.idle.split_off(self.idle.len() - take)
    }

    /// Atomically replace the master set. The idle set is left alone and
    /// picks up the new proxies at its next low-watermark refill.
    pub fn install_master(&mut self, proxies: Vec<ProxyAddress>) {
        debug!("installing {} proxies as the new master set", proxies.len());
        self.master = proxies;
    }

    #[must_use]
    pub fn master_len(&self) -> usize {
        self.master.len()
    }
}
