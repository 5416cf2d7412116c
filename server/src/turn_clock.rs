//! Process-wide turn counter and per-turn dispatch backlog
//!
//! The turn number only moves forward, by exactly one per simulation step.
//! Alongside it the clock counts, per turn, how many raised notifications are
//! still waiting for the dispatcher. `advance` never waits on those counts;
//! the simulation reads them to decide when turn-scoped bookkeeping may be
//! trimmed and to notice a slow network consumer.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TurnClockError {
    #[error("release for turn {turn} without a matching pending notification")]
    NoPending { turn: u64 },
}

#[derive(Debug, Default)]
pub struct TurnClock {
    turn: AtomicU64,
    pending: Mutex<BTreeMap<u64, usize>>,
}

impl TurnClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current turn, safe from any thread
    pub fn current_turn(&self) -> u64 {
        self.turn.load(Ordering::Acquire)
    }

    /// Moves to the next turn and returns it. Only the simulation loop calls this.
    pub fn advance(&self) -> u64 {
        self.turn.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Counts one more undelivered notification raised during `turn`
    pub fn register_pending(&self, turn: u64) {
        let mut pending = self.lock_pending();
        *pending.entry(turn).or_insert(0) += 1;
    }

    /// Marks one notification of `turn` as delivered and returns what remains
    pub fn release_pending(&self, turn: u64) -> Result<usize, TurnClockError> {
        let mut pending = self.lock_pending();
        let Some(count) = pending.get_mut(&turn) else {
            return Err(TurnClockError::NoPending { turn });
        };
        *count -= 1;
        let remaining = *count;
        if remaining == 0 {
            pending.remove(&turn);
        }
        Ok(remaining)
    }

    pub fn pending_for(&self, turn: u64) -> usize {
        self.lock_pending().get(&turn).copied().unwrap_or(0)
    }

    /// Total undelivered notifications across all turns
    pub fn backlog(&self) -> usize {
        self.lock_pending().values().sum()
    }

    /// Oldest turn that still has undelivered notifications
    pub fn oldest_pending_turn(&self) -> Option<u64> {
        self.lock_pending().keys().next().copied()
    }

    /// True once nothing raised at or before `turn` is waiting for dispatch
    pub fn is_drained_through(&self, turn: u64) -> bool {
        self.oldest_pending_turn().map_or(true, |oldest| oldest > turn)
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, BTreeMap<u64, usize>> {
        // Counts stay consistent even if a holder panicked mid-update.
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
