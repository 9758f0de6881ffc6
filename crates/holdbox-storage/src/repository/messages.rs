//! Message repository

use crate::db::DatabasePool;
use crate::models::{CreateMessage, StoredMessage};
use async_trait::async_trait;
use holdbox_common::types::{MessageId, MessageRef};
use holdbox_common::{Error, Result};
use sqlx::types::Json;
use sqlx::Row;
use tracing::debug;
use uuid::Uuid;

const SUMMARY_COLUMNS: &str =
    "id, message_id_header, subject, from_address, to_addresses, size, read, created_at";

/// Message repository trait
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Store a captured message exactly as received
    async fn create(&self, raw: &[u8]) -> Result<StoredMessage>;

    /// Get a message summary by ID
    async fn get(&self, id: MessageId) -> Result<Option<StoredMessage>>;

    /// Resolve a reference (including `latest`) to a message summary
    async fn resolve(&self, reference: MessageRef) -> Result<Option<StoredMessage>>;

    /// Load the original bytes of a message
    async fn load_raw(&self, reference: MessageRef) -> Result<Option<Vec<u8>>>;

    /// List messages, newest first
    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<StoredMessage>>;

    /// Count all messages
    async fn count(&self) -> Result<i64>;

    /// Count unread messages
    async fn count_unread(&self) -> Result<i64>;

    /// Mark messages read or unread, returning the number updated
    async fn set_read(&self, ids: &[MessageId], read: bool) -> Result<u64>;

    /// Mark every message read or unread
    async fn set_all_read(&self, read: bool) -> Result<u64>;

    /// Delete messages, returning the number removed
    async fn delete(&self, ids: &[MessageId]) -> Result<u64>;

    /// Delete every message, returning the number removed
    async fn delete_all(&self) -> Result<u64>;
}

/// SQLite message repository implementation
#[derive(Clone)]
pub struct DbMessageRepository {
    pool: DatabasePool,
}

impl DbMessageRepository {
    /// Create a new repository
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Build a `?, ?, ?` placeholder list for an `IN` clause
    fn placeholders(count: usize) -> String {
        vec!["?"; count].join(", ")
    }
}

#[async_trait]
impl MessageRepository for DbMessageRepository {
    async fn create(&self, raw: &[u8]) -> Result<StoredMessage> {
        let id = Uuid::now_v7();
        let now = chrono::Utc::now();
        let input = CreateMessage::from_raw(raw);

        sqlx::query(
            r#"
            INSERT INTO messages (
                id, message_id_header, subject, from_address, to_addresses,
                size, read, created_at, raw
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(&input.message_id_header)
        .bind(&input.subject)
        .bind(&input.from_address)
        .bind(Json(&input.to_addresses))
        .bind(raw.len() as i64)
        .bind(false)
        .bind(now)
        .bind(raw)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        debug!(message_id = %id, size = raw.len(), "Stored message");

        self.get(id)
            .await?
            .ok_or_else(|| Error::Internal("Failed to retrieve created message".to_string()))
    }

    async fn get(&self, id: MessageId) -> Result<Option<StoredMessage>> {
        let query = format!("SELECT {} FROM messages WHERE id = ?", SUMMARY_COLUMNS);

        sqlx::query_as::<_, StoredMessage>(&query)
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    async fn resolve(&self, reference: MessageRef) -> Result<Option<StoredMessage>> {
        match reference {
            MessageRef::Id(id) => self.get(id).await,
            MessageRef::Latest => {
                let query = format!(
                    "SELECT {} FROM messages ORDER BY seq DESC LIMIT 1",
                    SUMMARY_COLUMNS
                );

                sqlx::query_as::<_, StoredMessage>(&query)
                    .fetch_optional(self.pool.pool())
                    .await
                    .map_err(|e| Error::Database(e.to_string()))
            }
        }
    }

    async fn load_raw(&self, reference: MessageRef) -> Result<Option<Vec<u8>>> {
        let row = match reference {
            MessageRef::Id(id) => {
                sqlx::query("SELECT raw FROM messages WHERE id = ?")
                    .bind(id)
                    .fetch_optional(self.pool.pool())
                    .await
            }
            MessageRef::Latest => {
                sqlx::query("SELECT raw FROM messages ORDER BY seq DESC LIMIT 1")
                    .fetch_optional(self.pool.pool())
                    .await
            }
        }
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(row.map(|r| r.get::<Vec<u8>, _>("raw")))
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<StoredMessage>> {
        let query = format!(
            "SELECT {} FROM messages ORDER BY seq DESC LIMIT ? OFFSET ?",
            SUMMARY_COLUMNS
        );

        sqlx::query_as::<_, StoredMessage>(&query)
            .bind(limit)
            .bind(offset)
            .fetch_all(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    async fn count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM messages")
            .fetch_one(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok(row.get::<i64, _>("count"))
    }

    async fn count_unread(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM messages WHERE read = FALSE")
            .fetch_one(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok(row.get::<i64, _>("count"))
    }

    async fn set_read(&self, ids: &[MessageId], read: bool) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let query = format!(
            "UPDATE messages SET read = ? WHERE id IN ({})",
            Self::placeholders(ids.len())
        );
        let mut q = sqlx::query(&query).bind(read);
        for id in ids {
            q = q.bind(*id);
        }

        let result = q
            .execute(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok(result.rows_affected())
    }

    async fn set_all_read(&self, read: bool) -> Result<u64> {
        let result = sqlx::query("UPDATE messages SET read = ?")
            .bind(read)
            .execute(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok(result.rows_affected())
    }

    async fn delete(&self, ids: &[MessageId]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let query = format!(
            "DELETE FROM messages WHERE id IN ({})",
            Self::placeholders(ids.len())
        );
        let mut q = sqlx::query(&query);
        for id in ids {
            q = q.bind(*id);
        }

        let result = q
            .execute(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok(result.rows_affected())
    }

    async fn delete_all(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM messages")
            .execute(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok(result.rows_affected())
    }
}
