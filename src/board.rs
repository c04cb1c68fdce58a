use serde::{Deserialize, Serialize};

use crate::error::{GameError, GameResult};
use crate::store::Store;
use crate::types::*;

/// Read-only snapshot of a room, derived from the store on demand.
///
/// Both clients (to render) and the orchestrator (to decide transitions)
/// consume this structure. It is stale the instant it is produced; anything
/// with real consequences re-derives before acting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardState {
    pub room: Room,
    /// Every player ever admitted, sorted by name (case-insensitive)
    pub players: Vec<Player>,
    /// Connected players only, same ordering
    pub connected_players: Vec<Player>,
    pub player_count: usize,
    pub category_pool: Vec<CategoryId>,
    pub current_round: Option<Round>,
    /// Players who have submitted in the current round
    pub submitted_player_ids: Vec<PlayerId>,
    pub submission_count: usize,
    pub submissions: Vec<Submission>,
}

impl BoardState {
    /// Derive a snapshot for a room. Pure with respect to store contents.
    pub async fn project(store: &dyn Store, code: &str) -> GameResult<BoardState> {
        let room = store
            .get_room(code)
            .await?
            .ok_or_else(|| GameError::RoomNotFound(code.to_string()))?;

        let mut players = store.list_players(code).await?;
        players.sort_by_key(|p| p.name.to_lowercase());

        let connected_players: Vec<Player> =
            players.iter().filter(|p| p.connected).cloned().collect();

        let current_round = store.current_round(code).await?;

        let (submissions, submitted_player_ids) = match &current_round {
            Some(round) => {
                let submissions = store.list_submissions(&round.id).await?;
                let ids = submissions.iter().map(|s| s.player_id.clone()).collect();
                (submissions, ids)
            }
            None => (Vec::new(), Vec::new()),
        };

        Ok(BoardState {
            player_count: players.len(),
            category_pool: room.category_pool.clone(),
            submission_count: submissions.len(),
            players,
            connected_players,
            current_round,
            submitted_player_ids,
            submissions,
            room,
        })
    }

    /// The player owed the current round by rotation: connected players in
    /// name order, indexed by the room's round counter.
    pub fn rotation_owner(&self) -> Option<&Player> {
        if self.connected_players.is_empty() {
            return None;
        }
        let index = self.room.round_counter as usize % self.connected_players.len();
        self.connected_players.get(index)
    }

    /// Whether every connected player has submitted this round
    pub fn all_submitted(&self) -> bool {
        !self.connected_players.is_empty()
            && self.submission_count >= self.connected_players.len()
    }
}
