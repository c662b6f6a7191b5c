//! Persistent crawl frontier.
//!
//! The frontier keeps two pending queues (general and topic links) and the
//! per-class dead sets that suppress re-enqueue storms from the pipeline.
//! In-memory queues serve every operation; SQLite (WAL mode) under
//! `database/frontier.sqlite` makes insertions durable by the time
//! `submit` returns and records dispensation in the same transaction as
//! the pending-row delete.
//!
//! Keys are plain UTF-8 link strings, so the database stays portable
//! across implementations.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, warn};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;

use crate::wire::LinkClass;

const SCHEMA_SQL: &str = r#"
-- Pending links for both classes; seq preserves FIFO order.
CREATE TABLE IF NOT EXISTS pending_links (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    link TEXT NOT NULL,
    class INTEGER NOT NULL,
    UNIQUE(link, class)
);

-- Fingerprints dispensed at least once, per class.
CREATE TABLE IF NOT EXISTS dead_links (
    link TEXT PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS dead_topic_links (
    link TEXT PRIMARY KEY
);
"#;

/// Advisory pending-count file, refreshed on shutdown.
const LINK_NUMBERS_FILE: &str = "link_numbers";

fn class_code(class: LinkClass) -> i64 {
    match class {
        LinkClass::General => 0,
        LinkClass::Topic => 1,
    }
}

fn dead_table(class: LinkClass) -> &'static str {
    match class {
        LinkClass::General => "dead_links",
        LinkClass::Topic => "dead_topic_links",
    }
}

/// In-memory state for one link class.
#[derive(Debug, Default)]
struct ClassQueue {
    /// FIFO of pending links.
    queue: VecDeque<String>,
    /// Membership mirror of `queue`.
    pending: HashSet<String>,
    /// Fingerprints already dispensed in this deployment.
    dead: HashSet<String>,
}

/// Persistent frontier store. Owned by the scheduler state; all access is
/// serialized by the scheduler's mutex, so methods take `&mut self`.
pub struct FrontierStore {
    pool: SqlitePool,
    database_dir: PathBuf,
    general: ClassQueue,
    topic: ClassQueue,
    max_retries: u32,
    retry_delay: Duration,
    /// Batches abandoned after the store retry budget ran out.
    dropped_batches: u64,
    /// Links skipped on submit because they were pending or dead.
    skipped_links: u64,
}

impl FrontierStore {
    /// Open the store under `database_dir`, creating the directory and the
    /// schema when missing, and rebuild the in-memory queues from storage.
    pub async fn open(
        database_dir: &Path,
        max_retries: u32,
        retry_delay: Duration,
    ) -> Result<Self> {
        tokio::fs::create_dir_all(database_dir)
            .await
            .with_context(|| format!("failed to create {}", database_dir.display()))?;

        let db_path = database_dir.join("frontier.sqlite");
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("failed to open frontier database")?;

        sqlx::query(SCHEMA_SQL)
            .execute(&pool)
            .await
            .context("failed to initialize frontier schema")?;

        let mut store = Self {
            pool,
            database_dir: database_dir.to_path_buf(),
            general: ClassQueue::default(),
            topic: ClassQueue::default(),
            max_retries,
            retry_delay,
            dropped_batches: 0,
            skipped_links: 0,
        };
        store.load().await?;
        Ok(store)
    }

    /// Rebuild the in-memory queues and dead sets from storage.
    async fn load(&mut self) -> Result<()> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT link, class FROM pending_links ORDER BY seq")
                .fetch_all(&self.pool)
                .await
                .context("failed to load pending links")?;
        for (link, class) in rows {
            let q = if class == class_code(LinkClass::Topic) {
                &mut self.topic
            } else {
                &mut self.general
            };
            if q.pending.insert(link.clone()) {
                q.queue.push_back(link);
            }
        }

        let dead: Vec<(String,)> = sqlx::query_as("SELECT link FROM dead_links")
            .fetch_all(&self.pool)
            .await
            .context("failed to load dead links")?;
        self.general.dead = dead.into_iter().map(|(l,)| l).collect();

        let dead: Vec<(String,)> = sqlx::query_as("SELECT link FROM dead_topic_links")
            .fetch_all(&self.pool)
            .await
            .context("failed to load dead topic links")?;
        self.topic.dead = dead.into_iter().map(|(l,)| l).collect();

        debug!(
            "frontier loaded: {} general pending, {} topic pending, {} / {} dead",
            self.general.queue.len(),
            self.topic.queue.len(),
            self.general.dead.len(),
            self.topic.dead.len()
        );
        Ok(())
    }

    fn class_queue(&self, class: LinkClass) -> &ClassQueue {
        match class {
            LinkClass::General => &self.general,
            LinkClass::Topic => &self.topic,
        }
    }

    fn class_queue_mut(&mut self, class: LinkClass) -> &mut ClassQueue {
        match class {
            LinkClass::General => &mut self.general,
            LinkClass::Topic => &mut self.topic,
        }
    }

    /// Insert every link that is neither pending nor dead for `class`.
    ///
    /// Duplicates are silent no-ops. The accepted subset is written to
    /// storage before the in-memory queue is touched; if the write retries
    /// are exhausted the whole batch is dropped and only logged, per the
    /// store-failure policy.
    pub async fn submit(&mut self, links: &[String], class: LinkClass) -> usize {
        let mut fresh = Vec::new();
        {
            let q = self.class_queue(class);
            let mut seen = HashSet::new();
            for link in links {
                if q.pending.contains(link) || q.dead.contains(link) || !seen.insert(link.clone()) {
                    continue;
                }
                fresh.push(link.clone());
            }
        }
        self.skipped_links += (links.len() - fresh.len()) as u64;
        if fresh.is_empty() {
            return 0;
        }

        if let Err(e) = self.persist_submit(&fresh, class).await {
            self.dropped_batches += 1;
            warn!(
                "dropping batch of {} links after store failure: {e:#}",
                fresh.len()
            );
            return 0;
        }

        let count = fresh.len();
        let q = self.class_queue_mut(class);
        for link in fresh {
            q.pending.insert(link.clone());
            q.queue.push_back(link);
        }
        count
    }

    async fn persist_submit(&self, links: &[String], class: LinkClass) -> Result<()> {
        self.with_retries(move || async move {
            let mut tx = self.pool.begin().await?;
            for link in links {
                sqlx::query("INSERT OR IGNORE INTO pending_links (link, class) VALUES (?, ?)")
                    .bind(link)
                    .bind(class_code(class))
                    .execute(&mut *tx)
                    .await?;
            }
            tx.commit().await?;
            Ok(())
        })
        .await
    }

    /// Remove up to `size` links from the head of the class queue and mark
    /// each one dead in the same transaction. Empty frontier yields an
    /// empty vec; a store failure leaves everything pending and also
    /// yields an empty vec.
    pub async fn grab(&mut self, size: usize, class: LinkClass) -> Vec<String> {
        if size == 0 || self.class_queue(class).queue.is_empty() {
            return Vec::new();
        }

        let batch: Vec<String> = {
            let q = self.class_queue(class);
            q.queue.iter().take(size).cloned().collect()
        };

        if let Err(e) = self.persist_grab(&batch, class).await {
            warn!(
                "grab of {} links not dispensed after store failure: {e:#}",
                batch.len()
            );
            return Vec::new();
        }

        let q = self.class_queue_mut(class);
        for link in &batch {
            q.queue.pop_front();
            q.pending.remove(link);
            q.dead.insert(link.clone());
        }
        batch
    }

    async fn persist_grab(&self, links: &[String], class: LinkClass) -> Result<()> {
        let dead = dead_table(class);
        self.with_retries(move || async move {
            let mut tx = self.pool.begin().await?;
            for link in links {
                sqlx::query("DELETE FROM pending_links WHERE link = ? AND class = ?")
                    .bind(link)
                    .bind(class_code(class))
                    .execute(&mut *tx)
                    .await?;
                sqlx::query(&format!("INSERT OR IGNORE INTO {dead} (link) VALUES (?)"))
                    .bind(link)
                    .execute(&mut *tx)
                    .await?;
            }
            tx.commit().await?;
            Ok(())
        })
        .await
    }

    /// Pending count for one class.
    #[must_use]
    pub fn size(&self, class: LinkClass) -> usize {
        self.class_queue(class).queue.len()
    }

    /// Links skipped and batches dropped since startup.
    #[must_use]
    pub fn counters(&self) -> (u64, u64) {
        (self.skipped_links, self.dropped_batches)
    }

    /// Write the advisory pending-count file. Called on shutdown; the
    /// database itself is already durable.
    pub async fn flush(&self) -> Result<()> {
        let total = self.general.queue.len() + self.topic.queue.len();
        let path = self.database_dir.join(LINK_NUMBERS_FILE);
        tokio::fs::write(&path, format!("{total}\n"))
            .await
            .with_context(|| format!("failed to write {}", path.display()))
    }

    /// Close the database pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn with_retries<F, Fut>(&self, op: F) -> Result<()>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<(), sqlx::Error>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        "frontier write failed (attempt {attempt}/{}): {e}",
                        self.max_retries
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => return Err(e).context("frontier write retries exhausted"),
            }
        }
    }
}
