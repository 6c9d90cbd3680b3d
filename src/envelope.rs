//! Cross-connection consistency envelope
//!
//! When constraint deferral is requested, the whole batch runs between one
//! destination transaction (constraint checks postponed to commit) and one
//! source transaction (repeatable read snapshot). Every job then sees the
//! same source snapshot, and destination writes become visible atomically
//! or not at all. The envelope only ever wraps the sequential execution
//! path, so the two transactions are never contended across workers.
//!
//! Commit order: the read-only source transaction commits first, the
//! destination last, so deferred constraint checks run after all writes
//! have landed. The source transaction never outlives the destination
//! commit.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::db::ConnectionPair;
use crate::error::SyncError;

/// Settlement surface of an open envelope. Both outcomes consume the
/// envelope; there is no third state.
#[async_trait]
pub trait TransactionEnvelope {
    /// Commit both transactions. A failure here is batch-fatal.
    async fn commit(self) -> Result<(), SyncError>;

    /// Roll both transactions back. Never fails; the batch is already
    /// failing when this runs.
    async fn rollback(self);
}

pub struct ConsistencyEnvelope<'a> {
    pair: &'a ConnectionPair,
}

impl<'a> ConsistencyEnvelope<'a> {
    /// Open both transactions on the top-level connection pair.
    pub async fn open(pair: &'a ConnectionPair) -> anyhow::Result<ConsistencyEnvelope<'a>> {
        pair.destination
            .batch_execute("BEGIN; SET CONSTRAINTS ALL DEFERRED")
            .await?;
        pair.source
            .batch_execute("BEGIN ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .await?;
        debug!("opened consistency envelope (deferred constraints + snapshot read)");
        Ok(ConsistencyEnvelope { pair })
    }
}

#[async_trait]
impl TransactionEnvelope for ConsistencyEnvelope<'_> {
    /// Commit source then destination. Deferred constraint violations
    /// surface here, after every job already reported its result.
    async fn commit(self) -> Result<(), SyncError> {
        self.pair
            .source
            .batch_execute("COMMIT")
            .await
            .map_err(|e| SyncError::Consistency(format!("source snapshot commit failed: {e:#}")))?;
        self.pair
            .destination
            .batch_execute("COMMIT")
            .await
            .map_err(|e| {
                SyncError::Consistency(format!("destination commit failed: {e:#}"))
            })?;
        debug!("consistency envelope committed");
        Ok(())
    }

    /// Roll both transactions back; no partial destination writes become
    /// visible. Rollback failures are logged, not propagated.
    async fn rollback(self) {
        if let Err(e) = self.pair.source.batch_execute("ROLLBACK").await {
            warn!("source rollback failed: {e:#}");
        }
        if let Err(e) = self.pair.destination.batch_execute("ROLLBACK").await {
            warn!("destination rollback failed: {e:#}");
        }
    }
}
