//! Persisted FIFO of reviews the backend has not acknowledged yet.
//!
//! The queue lives in its own LMDB environment (`outbox.lmdb`), separate from
//! the collection snapshots, and is keyed by an auto-incrementing big-endian
//! sequence so LMDB's key order is enqueue order.
//!
//! Draining replays strictly oldest-first with at most one request in
//! flight. The first failure of any kind halts the drain and leaves the
//! failing item and everything after it queued: a failure is taken to mean
//! the backend is unreachable, so skipping ahead would only reorder writes.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::app_error::{CoreError, CoreResult};
use crate::durable_store::Unavailable;
use crate::local_db_model::Review;
use crate::local_db_state::{decode_seq, AppDbState};
use crate::transport::Backend;

const OUTBOX_DB: &str = "pending-reviews";

/// Storage seam for the queue.
pub trait QueueStorage: Send + Sync {
    fn is_persistent(&self) -> bool;
    fn push(&self, body: &[u8]) -> CoreResult<u64>;
    fn front(&self) -> CoreResult<Option<(u64, Vec<u8>)>>;
    /// Removes the entry with the smallest sequence; false when empty.
    fn pop_front(&self) -> CoreResult<bool>;
    fn len(&self) -> CoreResult<usize>;
    fn entries(&self) -> CoreResult<Vec<(u64, Vec<u8>)>>;
}

pub struct LmdbOutbox {
    state: AppDbState,
}

impl LmdbOutbox {
    pub fn open(dir: impl AsRef<Path>, map_size: usize) -> CoreResult<Self> {
        let state = AppDbState::init(dir.as_ref().join("outbox.lmdb"), map_size)?;
        state.database(OUTBOX_DB)?;
        Ok(Self { state })
    }
}

impl QueueStorage for LmdbOutbox {
    fn is_persistent(&self) -> bool {
        true
    }

    fn push(&self, body: &[u8]) -> CoreResult<u64> {
        self.state.append(OUTBOX_DB, body)
    }

    fn front(&self) -> CoreResult<Option<(u64, Vec<u8>)>> {
        match self.state.first(OUTBOX_DB)? {
            Some((key, value)) => Ok(Some((decode_seq(&key)?, value))),
            None => Ok(None),
        }
    }

    fn pop_front(&self) -> CoreResult<bool> {
        match self.state.first(OUTBOX_DB)? {
            Some((key, _)) => self.state.delete(OUTBOX_DB, &key),
            None => Ok(false),
        }
    }

    fn len(&self) -> CoreResult<usize> {
        self.state.count(OUTBOX_DB)
    }

    fn entries(&self) -> CoreResult<Vec<(u64, Vec<u8>)>> {
        self.state
            .scan(OUTBOX_DB)?
            .into_iter()
            .map(|(key, value)| Ok((decode_seq(&key)?, value)))
            .collect()
    }
}

/// Without persistence nothing can be queued; submission goes straight to
/// the network instead.
impl QueueStorage for Unavailable {
    fn is_persistent(&self) -> bool {
        false
    }

    fn push(&self, _body: &[u8]) -> CoreResult<u64> {
        Err(CoreError::StorageUnavailable)
    }

    fn front(&self) -> CoreResult<Option<(u64, Vec<u8>)>> {
        Ok(None)
    }

    fn pop_front(&self) -> CoreResult<bool> {
        Ok(false)
    }

    fn len(&self) -> CoreResult<usize> {
        Ok(0)
    }

    fn entries(&self) -> CoreResult<Vec<(u64, Vec<u8>)>> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingWrite {
    #[serde(skip)]
    pub seq: u64,
    pub review: Review,
    #[serde(rename = "enqueuedAt")]
    pub enqueued_at: i64,
}

impl PendingWrite {
    fn decode(seq: u64, bytes: &[u8]) -> CoreResult<Self> {
        let mut pending: PendingWrite = serde_json::from_slice(bytes)?;
        pending.seq = seq;
        Ok(pending)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DrainOutcome {
    /// Queue was empty; nothing was sent.
    Idle,
    /// Another drain is running; this call did nothing.
    AlreadyDraining,
    /// Connectivity is down; nothing was attempted.
    Offline,
    Completed { sent: Vec<Review> },
    Halted {
        sent: Vec<Review>,
        remaining: usize,
        reason: String,
    },
}

impl DrainOutcome {
    pub fn sent(&self) -> &[Review] {
        match self {
            DrainOutcome::Completed { sent } | DrainOutcome::Halted { sent, .. } => sent,
            _ => &[],
        }
    }
}

/// Resets the draining flag however the drain ends.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct PendingWriteQueue {
    storage: Arc<dyn QueueStorage>,
    draining: AtomicBool,
}

impl PendingWriteQueue {
    pub fn new(storage: Arc<dyn QueueStorage>) -> Self {
        Self {
            storage,
            draining: AtomicBool::new(false),
        }
    }

    /// Same probing rules as the durable store.
    pub fn open(dir: Option<&Path>, map_size: usize) -> Self {
        let Some(dir) = dir else {
            return Self::new(Arc::new(Unavailable));
        };
        match LmdbOutbox::open(dir, map_size) {
            Ok(outbox) => Self::new(Arc::new(outbox)),
            Err(e) => {
                warn!("Pending-write queue unavailable, reviews will be posted directly: {e}");
                Self::new(Arc::new(Unavailable))
            }
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.storage.is_persistent()
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    pub fn enqueue(&self, review: &Review) -> CoreResult<u64> {
        let pending = PendingWrite {
            seq: 0,
            review: review.clone(),
            enqueued_at: chrono::Utc::now().timestamp_millis(),
        };
        let seq = self.storage.push(&serde_json::to_vec(&pending)?)?;
        info!("Queued review for restaurant {} as #{seq}", review.restaurant_id);
        Ok(seq)
    }

    pub fn peek_oldest(&self) -> CoreResult<Option<PendingWrite>> {
        self.storage
            .front()?
            .map(|(seq, bytes)| PendingWrite::decode(seq, &bytes))
            .transpose()
    }

    /// No-op on an empty queue.
    pub fn remove_oldest(&self) -> CoreResult<()> {
        self.storage.pop_front()?;
        Ok(())
    }

    pub fn len(&self) -> CoreResult<usize> {
        self.storage.len()
    }

    pub fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Every queued write, oldest first.
    pub fn pending(&self) -> CoreResult<Vec<PendingWrite>> {
        self.storage
            .entries()?
            .iter()
            .map(|(seq, bytes)| PendingWrite::decode(*seq, bytes))
            .collect()
    }

    /// Replays queued reviews oldest-first until the queue is empty or the
    /// first failure. Never returns an error: failures end up in
    /// [`DrainOutcome::Halted`].
    pub async fn drain(&self, backend: &dyn Backend) -> DrainOutcome {
        if self.draining.swap(true, Ordering::AcqRel) {
            return DrainOutcome::AlreadyDraining;
        }
        let _guard = DrainGuard(&self.draining);

        let mut sent = Vec::new();
        loop {
            let pending = match self.peek_oldest() {
                Ok(Some(pending)) => pending,
                Ok(None) => break,
                Err(e) => return self.halt(sent, e),
            };

            let confirmed = match backend.create_review(&pending.review).await {
                Ok(confirmed) => confirmed,
                Err(e) => return self.halt(sent, e),
            };

            // Acknowledged: only now may the entry leave the queue.
            if let Err(e) = self.remove_oldest() {
                return self.halt(sent, e);
            }
            sent.push(confirmed);
        }

        if sent.is_empty() {
            DrainOutcome::Idle
        } else {
            info!("Drained {} queued reviews", sent.len());
            DrainOutcome::Completed { sent }
        }
    }

    fn halt(&self, sent: Vec<Review>, reason: CoreError) -> DrainOutcome {
        let remaining = self.len().unwrap_or_default();
        warn!(
            "Drain halted after {} sent, {remaining} still queued: {reason}",
            sent.len()
        );
        DrainOutcome::Halted {
            sent,
            remaining,
            reason: reason.to_string(),
        }
    }
}
