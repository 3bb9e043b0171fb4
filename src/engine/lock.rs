use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::model::SlotKey;

/// Per-slot serialization points.
///
/// One FIFO turn per slot key, created on first use and dropped once nobody
/// holds or awaits it. Keys never share a critical section. The map only
/// orders operations; it holds no booking data and is safe to lose.
#[derive(Default)]
pub struct SlotLocks {
    turns: DashMap<SlotKey, Arc<Mutex<()>>>,
}

/// Exclusive turn on one slot. Released on drop.
pub struct SlotTurn {
    key: SlotKey,
    _guard: OwnedMutexGuard<()>,
}

impl SlotTurn {
    pub fn key(&self) -> &SlotKey {
        &self.key
    }
}

impl SlotLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for this key's turn. Waiters are served in arrival order.
    pub async fn acquire(&self, key: &SlotKey) -> SlotTurn {
        let turn = self
            .turns
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();
        let waited = Instant::now();
        let guard = turn.lock_owned().await;
        metrics::histogram!(crate::observability::SLOT_TURN_WAIT_SECONDS)
            .record(waited.elapsed().as_secs_f64());
        SlotTurn {
            key: key.clone(),
            _guard: guard,
        }
    }

    /// End a turn and drop the key's entry if nobody else is queued on it.
    pub fn release(&self, turn: SlotTurn) {
        let key = turn.key.clone();
        drop(turn);
        self.turns
            .remove_if(&key, |_, mutex| Arc::strong_count(mutex) == 1);
    }

    /// Drop every idle entry. Returns how many were removed.
    pub fn sweep_idle(&self) -> usize {
        let before = self.turns.len();
        self.turns.retain(|_, mutex| Arc::strong_count(mutex) > 1);
        before.saturating_sub(self.turns.len())
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
