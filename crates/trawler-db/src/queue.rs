use std::time::Duration;

use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use trawler_core::error::AppError;
use trawler_core::job_queue::{
    FailedEntry, MAX_BATCH_SIZE, OutboundMessage, QueueProvider, ReceivedMessage,
    SendBatchOutcome, SentMessage,
};

/// PostgreSQL durable queue claimed with `SELECT FOR UPDATE SKIP LOCKED`.
///
/// A received message is hidden until `visible_at`; an ack deletes it and a
/// nack reschedules it. Once a message has been delivered `max_receives`
/// times and its visibility lapses again it is dead-lettered instead of
/// being redelivered.
#[derive(Clone)]
pub struct PgQueue {
    pool: Pool<Postgres>,
    name: String,
    region: Option<String>,
    visibility_timeout: Duration,
    max_receives: u32,
}

/// Message counts for one named queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, sqlx::FromRow)]
pub struct QueueStats {
    pub visible: i64,
    pub in_flight: i64,
    pub dead_lettered: i64,
}

#[derive(sqlx::FromRow)]
struct ClaimedRow {
    id: Uuid,
    receipt_handle: Uuid,
    body: String,
    receive_count: i32,
}

impl From<ClaimedRow> for ReceivedMessage {
    fn from(row: ClaimedRow) -> Self {
        ReceivedMessage {
            message_id: row.id.to_string(),
            receipt_handle: row.receipt_handle.to_string(),
            body: row.body,
            receive_count: row.receive_count.max(0) as u32,
        }
    }
}

fn queue_error(context: &str, e: sqlx::Error) -> AppError {
    AppError::QueueError(format!("{context}: {e}"))
}

fn parse_receipt(receipt_handle: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(receipt_handle)
        .map_err(|_| AppError::QueueError(format!("Malformed receipt handle '{receipt_handle}'")))
}

impl PgQueue {
    pub fn new(pool: PgPool, name: impl Into<String>) -> Self {
        Self {
            pool,
            name: name.into(),
            region: None,
            visibility_timeout: Duration::from_secs(300),
            max_receives: 5,
        }
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    pub fn with_max_receives(mut self, max_receives: u32) -> Self {
        self.max_receives = max_receives.max(1);
        self
    }

    /// Deployment region; labels logs and operator output only.
    pub fn with_region(mut self, region: Option<String>) -> Self {
        self.region = region.filter(|r| !r.is_empty());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    /// `name@region`, or just the name when no region is configured.
    pub fn label(&self) -> String {
        match &self.region {
            Some(region) => format!("{}@{region}", self.name),
            None => self.name.clone(),
        }
    }

    /// Moves exhausted messages whose visibility has lapsed to the dead-letter state.
    pub async fn sweep_dead_letters(&self) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE queue_messages
            SET dead_lettered_at = NOW(), receipt_handle = NULL
            WHERE queue = $1
              AND dead_lettered_at IS NULL
              AND receive_count >= $2
              AND visible_at <= NOW()
            "#,
        )
        .bind(&self.name)
        .bind(self.max_receives as i32)
        .execute(&self.pool)
        .await
        .map_err(|e| queue_error("Dead-letter sweep failed", e))?;

        let moved = result.rows_affected();
        if moved > 0 {
            tracing::warn!(queue = %self.label(), count = moved, "Messages dead-lettered");
        }
        Ok(moved)
    }

    /// Bodies of dead-lettered messages, oldest first.
    pub async fn dead_letters(&self, limit: i64) -> Result<Vec<String>, AppError> {
        sqlx::query_scalar::<_, String>(
            r#"
            SELECT body FROM queue_messages
            WHERE queue = $1 AND dead_lettered_at IS NOT NULL
            ORDER BY dead_lettered_at ASC
            LIMIT $2
            "#,
        )
        .bind(&self.name)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| queue_error("Failed to list dead letters", e))
    }

    /// Returns dead-lettered messages to the queue with a fresh receive count.
    pub async fn redrive(&self) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE queue_messages
            SET dead_lettered_at = NULL, receive_count = 0, visible_at = NOW()
            WHERE queue = $1 AND dead_lettered_at IS NOT NULL
            "#,
        )
        .bind(&self.name)
        .execute(&self.pool)
        .await
        .map_err(|e| queue_error("Redrive failed", e))?;

        tracing::info!(queue = %self.label(), count = result.rows_affected(), "Dead letters redriven");
        Ok(result.rows_affected())
    }

    pub async fn stats(&self) -> Result<QueueStats, AppError> {
        sqlx::query_as::<_, QueueStats>(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE dead_lettered_at IS NULL AND visible_at <= NOW()) AS visible,
                COUNT(*) FILTER (WHERE dead_lettered_at IS NULL AND visible_at > NOW()) AS in_flight,
                COUNT(*) FILTER (WHERE dead_lettered_at IS NOT NULL) AS dead_lettered
            FROM queue_messages
            WHERE queue = $1
            "#,
        )
        .bind(&self.name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| queue_error("Failed to read queue stats", e))
    }
}

impl QueueProvider for PgQueue {
    async fn send_batch(&self, messages: Vec<OutboundMessage>) -> Result<SendBatchOutcome, AppError> {
        if messages.len() > MAX_BATCH_SIZE {
            return Err(AppError::QueueError(format!(
                "Batch of {} exceeds the limit of {MAX_BATCH_SIZE} entries",
                messages.len()
            )));
        }

        let mut outcome = SendBatchOutcome::default();
        for message in messages {
            let inserted = sqlx::query_scalar::<_, Uuid>(
                r#"
                INSERT INTO queue_messages (queue, body, visible_at)
                VALUES ($1, $2, NOW() + make_interval(secs => $3))
                RETURNING id
                "#,
            )
            .bind(&self.name)
            .bind(&message.body)
            .bind(message.delay.as_secs_f64())
            .fetch_one(&self.pool)
            .await;

            match inserted {
                Ok(id) => outcome.successful.push(SentMessage {
                    entry_id: message.entry_id,
                    message_id: id.to_string(),
                }),
                Err(e) => {
                    tracing::warn!(queue = %self.label(), entry = %message.entry_id, error = %e, "Send failed");
                    outcome.failed.push(FailedEntry {
                        entry_id: message.entry_id,
                        error: e.to_string(),
                    });
                }
            }
        }
        Ok(outcome)
    }

    async fn receive(&self) -> Result<Option<ReceivedMessage>, AppError> {
        self.sweep_dead_letters().await?;

        let row = sqlx::query_as::<_, ClaimedRow>(
            r#"
            UPDATE queue_messages
            SET receive_count = receive_count + 1,
                receipt_handle = gen_random_uuid(),
                visible_at = NOW() + make_interval(secs => $2)
            WHERE id = (
                SELECT id FROM queue_messages
                WHERE queue = $1
                  AND dead_lettered_at IS NULL
                  AND visible_at <= NOW()
                ORDER BY visible_at ASC, created_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING id, receipt_handle, body, receive_count
            "#,
        )
        .bind(&self.name)
        .bind(self.visibility_timeout.as_secs_f64())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| queue_error("Receive failed", e))?;

        Ok(row.map(Into::into))
    }

    async fn ack(&self, receipt_handle: &str) -> Result<(), AppError> {
        let receipt = parse_receipt(receipt_handle)?;
        let result = sqlx::query("DELETE FROM queue_messages WHERE receipt_handle = $1")
            .bind(receipt)
            .execute(&self.pool)
            .await
            .map_err(|e| queue_error("Ack failed", e))?;

        if result.rows_affected() == 0 {
            return Err(AppError::QueueError(format!(
                "Receipt handle {receipt_handle} is no longer valid"
            )));
        }
        Ok(())
    }

    async fn nack(&self, receipt_handle: &str, delay: Duration) -> Result<(), AppError> {
        let receipt = parse_receipt(receipt_handle)?;
        let result = sqlx::query(
            r#"
            UPDATE queue_messages
            SET visible_at = NOW() + make_interval(secs => $2), receipt_handle = NULL
            WHERE receipt_handle = $1
            "#,
        )
        .bind(receipt)
        .bind(delay.as_secs_f64())
        .execute(&self.pool)
        .await
        .map_err(|e| queue_error("Nack failed", e))?;

        if result.rows_affected() == 0 {
            return Err(AppError::QueueError(format!(
                "Receipt handle {receipt_handle} is no longer valid"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_receipt() {
        let id = Uuid::new_v4();
        assert_eq!(parse_receipt(&id.to_string()).unwrap(), id);
        assert!(matches!(parse_receipt("rh-1"), Err(AppError::QueueError(_))));
    }

    #[tokio::test]
    async fn test_label_includes_region() {
        let pool = PgPool::connect_lazy("postgres://localhost/trawler").unwrap();

        let queue = PgQueue::new(pool, "jobs");
        assert_eq!(queue.label(), "jobs");
        assert!(queue.region().is_none());

        let queue = queue.with_region(Some("eu-west-1".into()));
        assert_eq!(queue.label(), "jobs@eu-west-1");
        assert_eq!(queue.clone().with_region(Some(String::new())).label(), "jobs");
    }
}
