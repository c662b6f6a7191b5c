//! Seed-link daemons.
//!
//! Two seeders keep the crawl alive. The hot seeder re-injects the
//! trending pages every few seconds, suffixing each URL with a fresh
//! random token so its fingerprint differs between rounds and bypasses
//! the dead set. The topic seeder emits page-numbered index URLs
//! unchanged; the topic queue deduplicates them.

use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::watch;
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::scheduler::client::SchedulerClient;

/// Placeholder replaced with a fresh token each hot round.
const UUID_PLACEHOLDER: &str = "{uuid}";
/// Placeholder replaced with the page number in topic templates.
const PAGE_PLACEHOLDER: &str = "{page}";

/// Seeder for trending pages.
pub struct HotSeeder {
    scheduler_addr: String,
    templates: Vec<String>,
    interval: Duration,
}

impl HotSeeder {
    #[must_use]
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            scheduler_addr: config.bind_addr(),
            templates: config.hot_seeder_templates.clone(),
            interval: Duration::from_secs(config.hot_seeder_interval),
        }
    }

    /// Emit one round per interval until shutdown. The transport is opened
    /// and closed per round; a failed round is logged and the links are
    /// regenerated next time (the token makes retrying the same strings
    /// pointless).
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("hot seeder started ({} templates)", self.templates.len());
        let mut client = SchedulerClient::new(self.scheduler_addr.clone());
        loop {
            let links = hot_round(&self.templates);
            match client.submit_links(links).await {
                Ok(_) => debug!("hot seed round submitted"),
                Err(e) => warn!("hot seed round failed: {e}"),
            }
            client.close();
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.changed() => break,
            }
        }
        info!("hot seeder stopped");
    }
}

/// Expand the templates with one fresh 128-bit token.
fn hot_round(templates: &[String]) -> Vec<String> {
    let token = Uuid::new_v4().simple().to_string();
    templates
        .iter()
        .map(|t| t.replace(UUID_PLACEHOLDER, &token))
        .collect()
}

/// Seeder for topic index pages.
pub struct TopicSeeder {
    scheduler_addr: String,
    template: String,
    pages: u32,
    interval: Duration,
}

impl TopicSeeder {
    #[must_use]
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            scheduler_addr: config.bind_addr(),
            template: config.topic_seeder_template.clone(),
            pages: config.topic_seeder_pages,
            interval: Duration::from_secs(config.topic_seeder_interval),
        }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("topic seeder started ({} pages)", self.pages);
        let mut client = SchedulerClient::new(self.scheduler_addr.clone());
        loop {
            let links = topic_round(&self.template, self.pages);
            match client.submit_topic_links(links).await {
                Ok(_) => debug!("topic seed round submitted"),
                Err(e) => warn!("topic seed round failed: {e}"),
            }
            client.close();
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.changed() => break,
            }
        }
        info!("topic seeder stopped");
    }
}

fn topic_round(template: &str, pages: u32) -> Vec<String> {
    (1..=pages)
        .map(|page| template.replace(PAGE_PLACEHOLDER, &page.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hot_rounds_differ_between_invocations() {
        let templates = vec!["https://example.com/trending?uuid={uuid}".to_string()];
        let a = hot_round(&templates);
        let b = hot_round(&templates);
        assert_eq!(a.len(), 1);
        assert_ne!(a[0], b[0]);
        assert!(!a[0].contains(UUID_PLACEHOLDER));
    }

    #[test]
    fn topic_rounds_are_page_numbered_and_stable() {
        let links = topic_round("https://example.com/topics?page={page}", 3);
        assert_eq!(
            links,
            vec![
                "https://example.com/topics?page=1",
                "https://example.com/topics?page=2",
                "https://example.com/topics?page=3",
            ]
        );
        // Unchanged between rounds; the topic queue deduplicates.
        assert_eq!(links, topic_round("https://example.com/topics?page={page}", 3));
    }
}
