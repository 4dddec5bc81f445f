use serde::{Deserialize, Serialize};

use crate::game::player::{PlayerId, PlayerState};

/// One leaderboard row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub player_id: PlayerId,
    pub name: String,
    pub kills: u32,
    pub deaths: u32,
}

/// Sorted by kills (desc), then deaths (asc), then id
pub fn build<'a>(players: impl IntoIterator<Item = &'a PlayerState>) -> Vec<LeaderboardEntry> {
    let mut rows: Vec<LeaderboardEntry> = players
        .into_iter()
        .map(|p| LeaderboardEntry {
            player_id: p.id,
            name: p.name.clone(),
            kills: p.kills(),
            deaths: p.deaths(),
        })
        .collect();

    rows.sort_by(|a, b| {
        b.kills
            .cmp(&a.kills)
            .then_with(|| a.deaths.cmp(&b.deaths))
            .then_with(|| a.player_id.cmp(&b.player_id))
    });
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::player::{Coordinates, PlayerClass};

    fn player(id: PlayerId, kills: u32, deaths: u32) -> PlayerState {
        let p = PlayerState::new(
            id,
            format!("p{}", id),
            0,
            PlayerClass::Commoner,
            Coordinates::default(),
            1,
        );
        p.restore_stats(kills, deaths);
        p
    }

    #[test]
    fn test_ordering() {
        let players = [player(1, 2, 5), player(2, 5, 1), player(3, 2, 1), player(4, 2, 1)];
        let ids: Vec<PlayerId> = build(players.iter()).iter().map(|e| e.player_id).collect();
        assert_eq!(ids, vec![2, 3, 4, 1]);
    }
}
