use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

use super::{Store, StoreError, StoreResult};
use crate::types::{
    CategoryId, Guess, Player, PlayerId, Room, RoomStatus, Round, RoundPhase, RoundResults,
    Submission, SubmissionId, Vote,
};

/// In-process reference store.
///
/// Each trait method takes exactly one lock, so every write is atomic the
/// way a single SQL statement would be; the conditional updates check and
/// write under the same guard.
#[derive(Default)]
pub struct MemStore {
    rooms: RwLock<HashMap<String, Room>>,
    players: RwLock<HashMap<String, Player>>,
    rounds: RwLock<HashMap<String, Round>>,
    submissions: RwLock<HashMap<String, Submission>>,
    guesses: RwLock<HashMap<(String, String), Guess>>,
    votes: RwLock<HashMap<(String, String), Vec<Vote>>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemStore {
    async fn insert_room(&self, room: Room) -> StoreResult<()> {
        let mut rooms = self.rooms.write().await;
        if let Some(existing) = rooms.get(&room.code) {
            let live = existing.status != RoomStatus::Ended && existing.expires_at > Utc::now();
            if live {
                return Err(StoreError::DuplicateCode);
            }
        }
        rooms.insert(room.code.clone(), room);
        Ok(())
    }

    async fn get_room(&self, code: &str) -> StoreResult<Option<Room>> {
        Ok(self.rooms.read().await.get(code).cloned())
    }

    async fn update_room_status(
        &self,
        code: &str,
        from: &[RoomStatus],
        to: RoomStatus,
    ) -> StoreResult<bool> {
        let mut rooms = self.rooms.write().await;
        match rooms.get_mut(code) {
            Some(room) if from.contains(&room.status) => {
                room.status = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_category_pool(&self, code: &str, pool: Vec<CategoryId>) -> StoreResult<bool> {
        let mut rooms = self.rooms.write().await;
        match rooms.get_mut(code) {
            Some(room) => {
                room.category_pool = pool;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn apply_round_outcome(
        &self,
        code: &str,
        chameleon_deltas: &HashMap<PlayerId, u32>,
        crowd_deltas: &HashMap<PlayerId, u32>,
    ) -> StoreResult<bool> {
        let mut rooms = self.rooms.write().await;
        match rooms.get_mut(code) {
            Some(room) => {
                for (player, delta) in chameleon_deltas {
                    *room.chameleon_scores.entry(player.clone()).or_insert(0) += delta;
                }
                for (player, delta) in crowd_deltas {
                    *room.crowd_scores.entry(player.clone()).or_insert(0) += delta;
                }
                room.round_counter += 1;
                room.status = RoomStatus::Results;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_player(&self, player: Player) -> StoreResult<()> {
        self.players
            .write()
            .await
            .insert(player.id.clone(), player);
        Ok(())
    }

    async fn get_player(&self, id: &str) -> StoreResult<Option<Player>> {
        Ok(self.players.read().await.get(id).cloned())
    }

    async fn list_players(&self, code: &str) -> StoreResult<Vec<Player>> {
        Ok(self
            .players
            .read()
            .await
            .values()
            .filter(|p| p.room_code == code)
            .cloned()
            .collect())
    }

    async fn set_player_connected(&self, id: &str, connected: bool) -> StoreResult<bool> {
        let mut players = self.players.write().await;
        match players.get_mut(id) {
            Some(player) => {
                player.connected = connected;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_player_categories(
        &self,
        id: &str,
        categories: HashSet<CategoryId>,
    ) -> StoreResult<bool> {
        let mut players = self.players.write().await;
        match players.get_mut(id) {
            Some(player) => {
                player.categories = categories;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_round(&self, round: Round) -> StoreResult<()> {
        self.rounds.write().await.insert(round.id.clone(), round);
        Ok(())
    }

    async fn get_round(&self, id: &str) -> StoreResult<Option<Round>> {
        Ok(self.rounds.read().await.get(id).cloned())
    }

    async fn current_round(&self, code: &str) -> StoreResult<Option<Round>> {
        Ok(self
            .rounds
            .read()
            .await
            .values()
            .filter(|r| r.room_code == code)
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
            .cloned())
    }

    async fn set_reveal_order(
        &self,
        round_id: &str,
        order: Vec<SubmissionId>,
        vote_deadline: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut rounds = self.rounds.write().await;
        match rounds.get_mut(round_id) {
            Some(round) if round.reveal_order.is_none() => {
                round.reveal_order = Some(order);
                round.vote_deadline = Some(vote_deadline);
                round.phase = RoundPhase::Revealed;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_voting(&self, round_id: &str) -> StoreResult<bool> {
        let mut rounds = self.rounds.write().await;
        match rounds.get_mut(round_id) {
            Some(round) if round.phase == RoundPhase::Revealed => {
                round.phase = RoundPhase::Voting;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn finalize_round(&self, round_id: &str, results: RoundResults) -> StoreResult<bool> {
        let mut rounds = self.rounds.write().await;
        match rounds.get_mut(round_id) {
            Some(round) if round.phase != RoundPhase::Finalized => {
                round.results = Some(results);
                round.phase = RoundPhase::Finalized;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_submission(&self, submission: Submission) -> StoreResult<()> {
        self.submissions
            .write()
            .await
            .insert(submission.id.clone(), submission);
        Ok(())
    }

    async fn list_submissions(&self, round_id: &str) -> StoreResult<Vec<Submission>> {
        let mut list: Vec<_> = self
            .submissions
            .read()
            .await
            .values()
            .filter(|s| s.round_id == round_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(list)
    }

    async fn count_submissions(&self, round_id: &str) -> StoreResult<usize> {
        Ok(self
            .submissions
            .read()
            .await
            .values()
            .filter(|s| s.round_id == round_id)
            .count())
    }

    async fn find_submission(
        &self,
        round_id: &str,
        player_id: &str,
    ) -> StoreResult<Option<Submission>> {
        let mut list: Vec<_> = self
            .submissions
            .read()
            .await
            .values()
            .filter(|s| s.round_id == round_id && s.player_id == player_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(list.into_iter().next())
    }

    async fn upsert_guess(&self, guess: Guess) -> StoreResult<()> {
        self.guesses
            .write()
            .await
            .insert((guess.round_id.clone(), guess.player_id.clone()), guess);
        Ok(())
    }

    async fn list_guesses(&self, round_id: &str) -> StoreResult<Vec<Guess>> {
        Ok(self
            .guesses
            .read()
            .await
            .values()
            .filter(|g| g.round_id == round_id)
            .cloned()
            .collect())
    }

    async fn replace_votes(
        &self,
        round_id: &str,
        player_id: &str,
        votes: Vec<Vote>,
    ) -> StoreResult<()> {
        let key = (round_id.to_string(), player_id.to_string());
        let mut all = self.votes.write().await;
        if votes.is_empty() {
            all.remove(&key);
        } else {
            all.insert(key, votes);
        }
        Ok(())
    }

    async fn list_votes(&self, round_id: &str) -> StoreResult<Vec<Vote>> {
        Ok(self
            .votes
            .read()
            .await
            .iter()
            .filter(|((rid, _), _)| rid == round_id)
            .flat_map(|(_, v)| v.iter().cloned())
            .collect())
    }
}
