//! Short-lived kill/death snapshots kept after a disconnect

use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::game::player::PlayerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveredStats {
    pub kills: u32,
    pub deaths: u32,
}

#[derive(Debug, Clone, Copy)]
struct Snapshot {
    stats: RecoveredStats,
    expires_at: Instant,
}

/// Keyed by the player id the stats were earned under
#[derive(Debug)]
pub struct StatsRecovery {
    snapshots: DashMap<PlayerId, Snapshot>,
    timeout: Duration,
}

impl StatsRecovery {
    pub fn new(timeout: Duration) -> Self {
        Self {
            snapshots: DashMap::new(),
            timeout,
        }
    }

    pub fn save(&self, player_id: PlayerId, kills: u32, deaths: u32, now: Instant) {
        self.snapshots.insert(
            player_id,
            Snapshot {
                stats: RecoveredStats { kills, deaths },
                expires_at: now + self.timeout,
            },
        );
    }

    /// Remove and return the snapshot if it has not expired
    pub fn take(&self, player_id: PlayerId, now: Instant) -> Option<RecoveredStats> {
        let (_, snapshot) = self.snapshots.remove(&player_id)?;
        (now < snapshot.expires_at).then_some(snapshot.stats)
    }

    pub fn sweep(&self, now: Instant) -> usize {
        let before = self.snapshots.len();
        self.snapshots.retain(|_, s| now < s.expires_at);
        before.saturating_sub(self.snapshots.len())
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}
