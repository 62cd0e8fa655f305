use anyhow::Result;
use async_trait::async_trait;

use super::schema::Database;

const WATERMARK_KEY: &str = "watermark_ms";

impl Database {
    // ========================================================================
    // Watermark Operations
    // ========================================================================

    /// Read the persisted watermark (epoch millis), or `None` before the first sync.
    pub async fn get_watermark(&self) -> Result<Option<i64>> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT value FROM sync_state WHERE key = ?")
            .bind(WATERMARK_KEY)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|(value,)| value))
    }

    /// Raise the persisted watermark to `candidate_ms` if it is newer.
    ///
    /// The upsert keeps `max(old, new)`, so the stored value never moves
    /// backwards even if two writers race. Returns the value now stored.
    pub async fn advance_watermark(&self, candidate_ms: i64) -> Result<i64> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO sync_state (key, value, updated_at)
            VALUES (?, ?, datetime('now'))
            ON CONFLICT(key) DO UPDATE SET
                value = max(sync_state.value, excluded.value),
                updated_at = excluded.updated_at
        "#,
        )
        .bind(WATERMARK_KEY)
        .bind(candidate_ms)
        .execute(&mut *tx)
        .await?;

        let (stored,): (i64,) = sqlx::query_as("SELECT value FROM sync_state WHERE key = ?")
            .bind(WATERMARK_KEY)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(stored)
    }
}

/// Durable home of the sync watermark.
///
/// The sync engine only needs these two operations, so any backend that
/// keeps `max(old, new)` on write can stand in for the database.
#[async_trait]
pub trait WatermarkStore: Send + Sync {
    /// Stored watermark in epoch millis, `None` before the first sync.
    async fn load(&self) -> Result<Option<i64>>;

    /// Raise the stored watermark to `candidate_ms` unless it is already
    /// newer. Returns the value now stored.
    async fn advance(&self, candidate_ms: i64) -> Result<i64>;
}

#[async_trait]
impl WatermarkStore for Database {
    async fn load(&self) -> Result<Option<i64>> {
        self.get_watermark().await
    }

    async fn advance(&self, candidate_ms: i64) -> Result<i64> {
        self.advance_watermark(candidate_ms).await
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::{Database, WatermarkStore};

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_watermark_missing_before_first_write() {
        let db = test_db().await;
        assert_eq!(db.get_watermark().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_advance_watermark_stores_value() {
        let db = test_db().await;
        let stored = db.advance_watermark(1_700_000_000_000).await.unwrap();
        assert_eq!(stored, 1_700_000_000_000);
        assert_eq!(db.get_watermark().await.unwrap(), Some(1_700_000_000_000));
    }

    #[tokio::test]
    async fn test_advance_watermark_never_decreases() {
        let db = test_db().await;
        db.advance_watermark(2_000).await.unwrap();

        let stored = db.advance_watermark(1_000).await.unwrap();
        assert_eq!(stored, 2_000);
        assert_eq!(db.get_watermark().await.unwrap(), Some(2_000));

        let stored = db.advance_watermark(3_000).await.unwrap();
        assert_eq!(stored, 3_000);
    }

    #[tokio::test]
    async fn test_advance_watermark_accepts_negative_values() {
        let db = test_db().await;
        let stored = db.advance_watermark(i64::MIN).await.unwrap();
        assert_eq!(stored, i64::MIN);
        let stored = db.advance_watermark(0).await.unwrap();
        assert_eq!(stored, 0);
    }

    #[tokio::test]
    async fn test_store_trait_delegates_to_database() {
        let db = test_db().await;
        let store: &dyn WatermarkStore = &db;
        assert_eq!(store.load().await.unwrap(), None);
        assert_eq!(store.advance(500).await.unwrap(), 500);
        assert_eq!(store.advance(100).await.unwrap(), 500);
        assert_eq!(db.get_watermark().await.unwrap(), Some(500));
    }
}
