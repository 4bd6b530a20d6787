// ============================================
// Async Audit Buffer
// ============================================
//
// Batches audit_log INSERT operations to keep audit writes off the request
// path. Producers push entries into a tokio mpsc channel; a background task
// flushes them in batches (every FLUSH_INTERVAL_MS or when BATCH_SIZE is
// reached). Queueing never blocks and never fails the caller.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::sync::mpsc;
use tokio::time::{Duration, interval};
use uuid::Uuid;

// ============================================
// Configuration
// ============================================

/// Maximum number of entries to batch in a single INSERT
const BATCH_SIZE: usize = 100;

/// How often to flush pending entries (milliseconds)
const FLUSH_INTERVAL_MS: u64 = 500;

/// Channel buffer size — how many entries can queue before drops begin
const CHANNEL_BUFFER: usize = 10_000;

// ============================================
// Audit Entry
// ============================================

/// Structured audit event: who did what to which entity.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub id: Uuid,
    pub actor_id: Option<String>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub target_id: Option<String>,
    pub details: serde_json::Value,
    pub snapshot: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(action: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            actor_id: None,
            action: action.into(),
            entity_type: entity_type.into(),
            entity_id: None,
            target_id: None,
            details: serde_json::Value::Object(Default::default()),
            snapshot: None,
            created_at: Utc::now(),
        }
    }

    pub fn actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    pub fn entity(mut self, entity_id: impl ToString) -> Self {
        self.entity_id = Some(entity_id.to_string());
        self
    }

    pub fn target(mut self, target_id: impl ToString) -> Self {
        self.target_id = Some(target_id.to_string());
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    pub fn snapshot(mut self, snapshot: serde_json::Value) -> Self {
        self.snapshot = Some(snapshot);
        self
    }
}

// ============================================
// Audit Handle (clone-friendly sender)
// ============================================

#[derive(Clone)]
pub struct AuditHandle {
    tx: mpsc::Sender<AuditEntry>,
}

impl AuditHandle {
    /// Queue an audit entry. Fire-and-forget: returns immediately, and a
    /// full or closed channel only logs — it never propagates to the
    /// caller or changes the request outcome.
    pub fn queue(&self, entry: AuditEntry) {
        if let Err(e) = self.tx.try_send(entry) {
            match e {
                mpsc::error::TrySendError::Full(_) => {
                    tracing::warn!(
                        "Audit buffer full ({} capacity). Dropping entry.",
                        CHANNEL_BUFFER
                    );
                }
                mpsc::error::TrySendError::Closed(_) => {
                    tracing::error!("Audit buffer channel closed unexpectedly");
                }
            }
        }
    }

}

// ============================================
// Audit Writer (background flush task)
// ============================================

pub struct AuditWriter {
    pool: PgPool,
    rx: mpsc::Receiver<AuditEntry>,
}

impl AuditWriter {
    /// Spawn the audit writer. Returns a handle for queueing entries.
    pub fn spawn(pool: PgPool) -> AuditHandle {
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER);

        let writer = AuditWriter { pool, rx };

        tokio::spawn(async move {
            writer.run().await;
        });

        tracing::info!(
            "Audit writer started (batch_size={}, flush_interval={}ms, channel_buffer={})",
            BATCH_SIZE,
            FLUSH_INTERVAL_MS,
            CHANNEL_BUFFER
        );

        AuditHandle { tx }
    }

    /// Main loop: collect entries and flush in batches
    async fn run(mut self) {
        let mut batch: Vec<AuditEntry> = Vec::with_capacity(BATCH_SIZE);
        let mut flush_timer = interval(Duration::from_millis(FLUSH_INTERVAL_MS));

        loop {
            tokio::select! {
                entry = self.rx.recv() => {
                    match entry {
                        Some(e) => {
                            batch.push(e);
                            if batch.len() >= BATCH_SIZE {
                                self.flush_batch(&mut batch).await;
                            }
                        }
                        None => {
                            // Channel closed — flush remaining and exit
                            if !batch.is_empty() {
                                self.flush_batch(&mut batch).await;
                            }
                            tracing::info!("Audit writer shutting down");
                            return;
                        }
                    }
                }
                _ = flush_timer.tick() => {
                    if !batch.is_empty() {
                        self.flush_batch(&mut batch).await;
                    }
                }
            }
        }
    }

    async fn flush_batch(&self, batch: &mut Vec<AuditEntry>) {
        if batch.is_empty() {
            return;
        }

        let count = batch.len();
        let entries: Vec<AuditEntry> = batch.drain(..).collect();

        match self.batch_insert(&entries).await {
            Ok(()) => {
                tracing::debug!("Flushed {} audit entries to DB", count);
            }
            Err(e) => {
                tracing::error!("Failed to flush {} audit entries: {}", count, e);
            }
        }
    }

    /// Execute a batch INSERT using raw SQL with multiple value tuples
    async fn batch_insert(&self, entries: &[AuditEntry]) -> Result<(), sqlx::Error> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut query = String::from(
            "INSERT INTO audit_log (
                id, actor_id, action, entity_type, entity_id,
                target_id, details, snapshot, created_at
            ) VALUES ",
        );

        let mut param_idx = 1u32;
        for (i, _) in entries.iter().enumerate() {
            if i > 0 {
                query.push_str(", ");
            }
            query.push('(');
            for j in 0..9 {
                if j > 0 {
                    query.push_str(", ");
                }
                query.push('$');
                query.push_str(&param_idx.to_string());
                param_idx += 1;
            }
            query.push(')');
        }

        let mut q = sqlx::query(&query);

        for entry in entries {
            q = q
                .bind(entry.id)
                .bind(&entry.actor_id)
                .bind(&entry.action)
                .bind(&entry.entity_type)
                .bind(&entry.entity_id)
                .bind(&entry.target_id)
                .bind(&entry.details)
                .bind(&entry.snapshot)
                .bind(entry.created_at.naive_utc());
        }

        q.execute(&self.pool).await?;
        Ok(())
    }
}
