//! Application-level reliability over the best-effort channel
//!
//! Sender side: [`AckStore`] keeps every must-arrive event until the client
//! acknowledges it, and hands the survivors back on every resend sweep.
//!
//! Receiver side: [`ProcessedEvents`] remembers `(player, sequence)` pairs so
//! a duplicate datagram is acknowledged again but never re-applied.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::game::player::{PlayerId, Sequence};

/// An event waiting for its ack
#[derive(Debug, Clone)]
pub struct PendingAck {
    /// Match session the event was stamped with
    pub match_session_id: u32,
    /// Encoded datagram, resent verbatim
    pub payload: Arc<[u8]>,
    pub resends: u32,
}

/// Per-session outbound store of unacknowledged events
#[derive(Debug, Default)]
pub struct AckStore {
    pending: Mutex<FxHashMap<Sequence, PendingAck>>,
}

impl AckStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require_ack(&self, sequence: Sequence, match_session_id: u32, payload: Arc<[u8]>) {
        self.pending.lock().insert(
            sequence,
            PendingAck {
                match_session_id,
                payload,
                resends: 0,
            },
        );
    }

    /// Returns false for unknown or already-acked sequences
    pub fn ack_received(&self, sequence: Sequence) -> bool {
        self.pending.lock().remove(&sequence).is_some()
    }

    /// Drop every entry matching `predicate`, returning how many went
    pub fn ack_not_required<F>(&self, predicate: F) -> usize
    where
        F: Fn(Sequence, &PendingAck) -> bool,
    {
        let mut pending = self.pending.lock();
        let before = pending.len();
        pending.retain(|seq, entry| !predicate(*seq, entry));
        before - pending.len()
    }

    /// Drop everything stamped with a match session other than `current`
    pub fn invalidate_stale_sessions(&self, current: u32) -> usize {
        self.ack_not_required(|_, entry| entry.match_session_id != current)
    }

    /// Payloads to resend this sweep, in sequence order
    pub fn due_for_resend(&self) -> Vec<(Sequence, Arc<[u8]>)> {
        let mut pending = self.pending.lock();
        let mut due: Vec<(Sequence, Arc<[u8]>)> = pending
            .iter_mut()
            .map(|(seq, entry)| {
                entry.resends = entry.resends.saturating_add(1);
                (*seq, entry.payload.clone())
            })
            .collect();
        due.sort_unstable_by_key(|(seq, _)| *seq);
        due
    }

    pub fn contains(&self, sequence: Sequence) -> bool {
        self.pending.lock().contains_key(&sequence)
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    pub fn clear(&self) {
        self.pending.lock().clear();
    }
}

/// Per-room inbound dedup store
#[derive(Debug, Default)]
pub struct ProcessedEvents {
    seen: DashMap<(PlayerId, Sequence), Instant>,
}

impl ProcessedEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_already_processed(&self, player_id: PlayerId, sequence: Sequence) -> bool {
        self.seen.contains_key(&(player_id, sequence))
    }

    /// Record the event. Returns true only for the first caller,
    /// which is the one allowed to apply its side effect.
    pub fn mark_event_processed(&self, player_id: PlayerId, sequence: Sequence, now: Instant) -> bool {
        let mut first = false;
        self.seen.entry((player_id, sequence)).or_insert_with(|| {
            first = true;
            now
        });
        first
    }

    /// Drop every record of one player. Sequences restart at 1 after a respawn.
    pub fn forget_player(&self, player_id: PlayerId) -> usize {
        let before = self.seen.len();
        self.seen.retain(|(id, _), _| *id != player_id);
        before.saturating_sub(self.seen.len())
    }

    /// Remove records older than `ttl`
    pub fn sweep(&self, now: Instant, ttl: Duration) -> usize {
        let before = self.seen.len();
        self.seen
            .retain(|_, recorded| now.saturating_duration_since(*recorded) < ttl);
        before.saturating_sub(self.seen.len())
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
