//! # PostgreSQL Message Queue Client (pgmq-rs)
//!
//! Rust client using the pgmq-rs crate for the pipeline's two durable
//! topics. `send` commits the message row before returning, which is the
//! durable-publish acknowledgment the dispatcher relies on.

use pgmq::{types::Message, PGMQueue};
use tracing::{debug, info, warn};

/// pgmq-rs based message queue client
#[derive(Debug, Clone)]
pub struct PgmqClient {
    pgmq: PGMQueue,
}

impl PgmqClient {
    /// Create new pgmq client using connection string
    pub async fn new(database_url: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let pgmq = PGMQueue::new(database_url.to_string()).await?;

        info!("✅ Connected to pgmq");
        Ok(Self { pgmq })
    }

    /// Create new pgmq client using existing connection pool (BYOP - Bring Your Own Pool)
    pub async fn new_with_pool(pool: sqlx::PgPool) -> Self {
        let pgmq = PGMQueue::new_with_pool(pool).await;

        info!("✅ pgmq client created with shared pool");
        Self { pgmq }
    }

    /// Create queue if it doesn't exist
    pub async fn create_queue(
        &self,
        queue_name: &str,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        debug!("📋 Creating queue: {}", queue_name);

        self.pgmq
            .create(queue_name)
            .await
            .map_err(|e| format!("Failed to create queue {queue_name}: {e}"))?;

        Ok(())
    }

    /// Send JSON message to queue. Returns the broker message id once the
    /// message row is committed (durable publish).
    pub async fn send_json_message<T: serde::Serialize>(
        &self,
        queue_name: &str,
        message: &T,
    ) -> Result<i64, Box<dyn std::error::Error + Send + Sync>> {
        let serialized = serde_json::to_value(message)?;
        let message_id = self
            .pgmq
            .send(queue_name, &serialized)
            .await
            .map_err(|e| format!("Failed to send message to {queue_name}: {e}"))?;

        debug!(
            "📤 Message sent to queue: {} with id: {}",
            queue_name, message_id
        );
        Ok(message_id)
    }

    /// Read messages from queue with a visibility timeout. Unacked messages
    /// become visible again after `vt` seconds (at-least-once redelivery).
    pub async fn read_messages(
        &self,
        queue_name: &str,
        vt: Option<i32>,
        limit: Option<i32>,
    ) -> Result<Vec<Message<serde_json::Value>>, Box<dyn std::error::Error + Send + Sync>> {
        let messages = match limit {
            Some(l) => self
                .pgmq
                .read_batch(queue_name, vt, l)
                .await?
                .unwrap_or_default(),
            None => match self.pgmq.read(queue_name, vt).await? {
                Some(msg) => vec![msg],
                None => vec![],
            },
        };

        debug!(
            "📨 Read {} messages from queue: {}",
            messages.len(),
            queue_name
        );
        Ok(messages)
    }

    /// Delete message from queue (successful processing acknowledgment)
    pub async fn delete_message(
        &self,
        queue_name: &str,
        message_id: i64,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.pgmq
            .delete(queue_name, message_id)
            .await
            .map_err(|e| format!("Failed to delete message {message_id}: {e}"))?;

        debug!("🗑️ Message deleted: {} from {}", message_id, queue_name);
        Ok(())
    }

    /// Archive message (dead-letter: moved out of the live queue, retained
    /// for inspection)
    pub async fn archive_message(
        &self,
        queue_name: &str,
        message_id: i64,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.pgmq
            .archive(queue_name, message_id)
            .await
            .map_err(|e| format!("Failed to archive message {message_id}: {e}"))?;

        debug!("📦 Message archived: {} from {}", message_id, queue_name);
        Ok(())
    }

    /// Purge queue (delete all messages)
    pub async fn purge_queue(
        &self,
        queue_name: &str,
    ) -> Result<u64, Box<dyn std::error::Error + Send + Sync>> {
        warn!("🧹 Purging queue: {}", queue_name);

        let purged_count = self
            .pgmq
            .purge(queue_name)
            .await
            .map_err(|e| format!("Failed to purge queue {queue_name}: {e}"))?;

        Ok(purged_count)
    }

    /// Create the pipeline's two topics if they don't exist. Callers pass the
    /// configured names so queue overrides get created too.
    pub async fn initialize_pipeline_queues(
        &self,
        intent_queue: &str,
        update_queue: &str,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        for queue_name in [intent_queue, update_queue] {
            self.create_queue(queue_name).await?;
        }

        info!(
            "🏗️ Initialized pipeline queues: {} / {}",
            intent_queue, update_queue
        );
        Ok(())
    }

    /// Get reference to underlying connection pool for advanced operations
    pub fn pool(&self) -> &sqlx::PgPool {
        &self.pgmq.connection
    }
}
