use std::{
    collections::HashMap,
    str::FromStr,
    sync::{
        atomic::{AtomicI64, Ordering},
        PoisonError, RwLock,
    },
};

pub use sqlx::Error;
use sqlx::{
    migrate::MigrateDatabase,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Executor, Row, Sqlite,
};

type Pool = sqlx::Pool<Sqlite>;

/// Where the cache lives unless configured otherwise.
pub const DEFAULT_DB_PATH: &str = "sqlite:webhooks.sqlite";

/// Remembers which webhook the bot made in which channel.
///
/// Everything is kept in memory and every [`WebhookCache::set`] is written
/// through to sqlite, so the bindings survive restarts.
///
/// Every write gets a sequence number. Both sqlite and memory only accept a
/// write newer than what they hold, so racing writes to one channel end up
/// agreeing on the last one to start.
pub struct WebhookCache {
    pool: Pool,
    /// Channel -> (webhook, sequence number of the write that put it there).
    bindings: RwLock<HashMap<u64, (u64, i64)>>,
    next_seq: AtomicI64,
}

impl WebhookCache {
    /// Open (or create) the database at sqlx URL `path` and load all of it.
    pub async fn open(path: &str) -> Result<WebhookCache, Error> {
        if !Sqlite::database_exists(path).await.unwrap_or(false) {
            Sqlite::create_database(path).await?;
        }
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(
                SqliteConnectOptions::from_str(path)?
                    .busy_timeout(std::time::Duration::from_secs(30)),
            )
            .await?;

        // WEBHOOKS:
        // channel_id (unique primary key, Discord snowflake as string)
        // webhook_id (Discord snowflake as string)
        // seq (sequence number of the last write, newer writes win)
        pool.execute(sqlx::query(
            "
                CREATE TABLE IF NOT EXISTS webhooks (
                    channel_id TEXT PRIMARY KEY NOT NULL,
                    webhook_id TEXT NOT NULL,
                    seq INTEGER NOT NULL DEFAULT 0
                ) STRICT;",
        ))
        .await?;

        // Databases from before `seq` existed. Fails harmlessly if it's there already.
        let _ = pool
            .execute(sqlx::query(
                "ALTER TABLE webhooks ADD COLUMN seq INTEGER NOT NULL DEFAULT 0;",
            ))
            .await;

        let rows = sqlx::query("SELECT channel_id, webhook_id, seq FROM webhooks;")
            .map(|row: SqliteRow| {
                (
                    row.get::<String, _>("channel_id"),
                    row.get::<String, _>("webhook_id"),
                    row.get::<i64, _>("seq"),
                )
            })
            .fetch_all(&pool)
            .await?;

        let mut bindings = HashMap::with_capacity(rows.len());
        let mut last_seq: i64 = 0;
        for (channel, webhook, seq) in rows {
            last_seq = last_seq.max(seq);
            match (channel.parse::<u64>(), webhook.parse::<u64>()) {
                (Ok(channel), Ok(webhook)) => {
                    bindings.insert(channel, (webhook, seq));
                }
                _ => log::warn!("Skipping garbled webhook binding {channel} -> {webhook}"),
            }
        }
        log::info!("Loaded {} webhook bindings.", bindings.len());

        Ok(WebhookCache {
            pool,
            bindings: RwLock::new(bindings),
            next_seq: AtomicI64::new(last_seq + 1),
        })
    }

    /// Is there a webhook bound to this channel?
    pub fn has(&self, channel: u64) -> bool {
        self.bindings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&channel)
    }

    /// ID of the webhook bound to this channel, if any.
    pub fn get(&self, channel: u64) -> Option<u64> {
        self.bindings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&channel)
            .map(|&(webhook, _)| webhook)
    }

    /// Bind a webhook to a channel, replacing whatever was bound before.
    ///
    /// The row is written before memory is updated, so a failed write
    /// leaves the cache as it was. If two `set`s on one channel race, the
    /// one called last wins, in memory and on disk alike.
    pub async fn set(&self, channel: u64, webhook: u64) -> Result<(), Error> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.set_with_seq(channel, webhook, seq).await
    }

    async fn set_with_seq(&self, channel: u64, webhook: u64, seq: i64) -> Result<(), Error> {
        sqlx::query(
            "INSERT INTO webhooks(channel_id, webhook_id, seq)
            VALUES (?, ?, ?)
        ON CONFLICT DO
            UPDATE SET webhook_id=excluded.webhook_id, seq=excluded.seq
            WHERE excluded.seq > webhooks.seq;",
        )
        .bind(channel.to_string())
        .bind(webhook.to_string())
        .bind(seq)
        .execute(&self.pool)
        .await?;

        let mut bindings = self.bindings.write().unwrap_or_else(PoisonError::into_inner);
        match bindings.get(&channel) {
            Some(&(_, newer)) if newer > seq => {
                log::debug!("Dropping stale webhook binding {channel} -> {webhook}");
            }
            _ => {
                bindings.insert(channel, (webhook, seq));
            }
        }
        Ok(())
    }

    /// Amount of channels with a webhook bound.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.bindings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait for pending writes and close the database.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db_url(dir: &tempfile::TempDir) -> String {
        format!("sqlite:{}", dir.path().join("webhooks.sqlite").display())
    }

    #[tokio::test]
    async fn set_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let cache = WebhookCache::open(&db_url(&dir)).await.unwrap();

        assert!(cache.is_empty());
        assert!(!cache.has(1));
        assert_eq!(cache.get(1), None);

        cache.set(1, 100).await.unwrap();
        assert!(cache.has(1));
        assert_eq!(cache.get(1), Some(100));
        assert!(!cache.has(2));

        cache.set(1, 101).await.unwrap();
        assert_eq!(cache.get(1), Some(101));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn survives_reopening() {
        let dir = tempfile::tempdir().unwrap();
        let url = db_url(&dir);

        {
            let cache = WebhookCache::open(&url).await.unwrap();
            cache.set(1_136_025_433_722_941_510, 1_200_000_000_000_000_001).await.unwrap();
            cache.set(2, 200).await.unwrap();
            cache.set(2, 201).await.unwrap();
            cache.close().await;
        }

        let cache = WebhookCache::open(&url).await.unwrap();
        assert_eq!(cache.len(), 2);
        assert!(cache.has(1_136_025_433_722_941_510));
        assert_eq!(
            cache.get(1_136_025_433_722_941_510),
            Some(1_200_000_000_000_000_001)
        );
        assert_eq!(cache.get(2), Some(201));
    }

    #[tokio::test]
    async fn concurrent_sets_on_different_channels() {
        let dir = tempfile::tempdir().unwrap();
        let cache = std::sync::Arc::new(WebhookCache::open(&db_url(&dir)).await.unwrap());

        let tasks = (0..16u64)
            .map(|i| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.set(i, i + 1000).await })
            })
            .collect::<Vec<_>>();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        for i in 0..16u64 {
            assert_eq!(cache.get(i), Some(i + 1000));
        }
    }

    #[tokio::test]
    async fn older_write_finishing_last_does_not_win() {
        let dir = tempfile::tempdir().unwrap();
        let url = db_url(&dir);

        {
            let cache = WebhookCache::open(&url).await.unwrap();
            // Second write started first but landed after the newer one.
            cache.set_with_seq(1, 500, 5).await.unwrap();
            cache.set_with_seq(1, 300, 3).await.unwrap();
            assert_eq!(cache.get(1), Some(500));
            cache.close().await;
        }

        let cache = WebhookCache::open(&url).await.unwrap();
        assert_eq!(cache.get(1), Some(500));

        // Numbering carries on past what's on disk.
        cache.set(1, 600).await.unwrap();
        assert_eq!(cache.get(1), Some(600));
        cache.close().await;

        let cache = WebhookCache::open(&url).await.unwrap();
        assert_eq!(cache.get(1), Some(600));
    }

    #[tokio::test]
    async fn concurrent_sets_on_one_channel_agree() {
        let dir = tempfile::tempdir().unwrap();
        let url = db_url(&dir);
        let cache = std::sync::Arc::new(WebhookCache::open(&url).await.unwrap());

        let tasks = (0..16u64)
            .map(|i| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.set(7, i + 1000).await })
            })
            .collect::<Vec<_>>();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let in_memory = cache.get(7);
        assert!(in_memory.is_some());
        cache.close().await;

        let reopened = WebhookCache::open(&url).await.unwrap();
        assert_eq!(reopened.get(7), in_memory);
    }
}
