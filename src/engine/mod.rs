mod availability;
mod conflict;
mod error;
mod lock;
mod mutations;
mod queries;
mod store;
#[cfg(test)]
mod tests;

pub use availability::{
    compute_day_slots, lead_minutes, within_cutoff, SlotAvailability, SlotReason,
};
pub use error::EngineError;
pub use lock::{SlotLocks, SlotTurn};
pub use mutations::NewReservation;
pub use store::ReservationStore;

use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use tokio::sync::{mpsc, oneshot};
use tracing::{error, warn};

use crate::clock::Clock;
use crate::model::*;
use crate::wal::Wal;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
///
/// 1. Block until the first Append arrives.
/// 2. Drain all immediately available Appends (the batch window).
/// 3. One flush_sync for the whole batch.
/// 4. Apply the batch to the store, then answer every sender.
///
/// Applying here rather than in the caller means a compaction snapshot
/// always covers exactly what the log holds.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>, store: Arc<ReservationStore>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }
                commit_batch(&mut wal, &store, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, &store, other);
                }
            }
            other => handle_non_append(&mut wal, &store, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, store: &ReservationStore, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (event, tx) in batch.drain(..) {
        let reply = match &result {
            Ok(()) => {
                store.apply(&event);
                Ok(())
            }
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(reply);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let mut append_err = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    let result = match append_err {
        Some(e) => Err(e),
        None => wal.flush_sync(),
    };
    if result.is_err() {
        // The whole batch is reported failed, so none of it may survive on disk.
        if let Err(e) = wal.rollback() {
            error!(path = %wal.path().display(), error = %e, "WAL rollback after failed batch failed");
        }
    }
    result
}

fn handle_non_append(wal: &mut Wal, store: &ReservationStore, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { response } => {
            let events = store.snapshot();
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

/// One tenant's reservation state: durable store, per-slot turns, WAL.
pub struct Engine {
    tenant: String,
    pub store: Arc<ReservationStore>,
    pub locks: SlotLocks,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
}

impl Engine {
    pub fn new(tenant: impl Into<String>, wal_path: PathBuf, clock: Arc<dyn Clock>) -> io::Result<Self> {
        let tenant = tenant.into();
        let replay = Wal::replay(&wal_path)?;
        if replay.discarded_tail {
            warn!(
                tenant = %tenant,
                path = %wal_path.display(),
                valid_len = replay.valid_len,
                "discarded torn WAL tail during replay"
            );
            Wal::truncate_to(&wal_path, replay.valid_len)?;
        }

        let store = Arc::new(ReservationStore::new());
        for event in &replay.events {
            store.apply(event);
        }

        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx, store.clone()));

        Ok(Self {
            tenant,
            store,
            locks: SlotLocks::new(),
            clock,
            wal_tx,
        })
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn slot_key(&self, date: NaiveDate, time: NaiveTime) -> SlotKey {
        SlotKey::new(self.tenant.clone(), date, time)
    }

    /// Durably log `event`; the writer applies it to the store before replying.
    pub(super) async fn persist_and_apply(&self, event: Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append { event, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// Run `op` while holding the turn for `key`.
    ///
    /// The operation runs in its own task: a caller that stops waiting does
    /// not cancel it, so acquire → validate → write → release always completes.
    pub(super) async fn run_in_turn<F, Fut, T>(self: &Arc<Self>, key: SlotKey, op: F) -> Result<T, EngineError>
    where
        F: FnOnce(Arc<Engine>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, EngineError>> + Send + 'static,
        T: Send + 'static,
    {
        let engine = self.clone();
        let task = tokio::spawn(async move {
            let turn = engine.locks.acquire(&key).await;
            let result = op(engine.clone()).await;
            engine.locks.release(turn);
            result
        });
        task.await
            .map_err(|e| EngineError::Internal(format!("slot task failed: {e}")))?
    }

    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
