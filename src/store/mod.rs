//! Persistent store contract.
//!
//! The engine owns no authoritative state; everything lives behind this
//! trait. Backends guarantee per-statement atomicity only, so every write
//! that guards a phase transition is expressed as a conditional update
//! (set-if-absent, flip-if-not-yet) rather than a read-then-write pair.

mod memory;

pub use memory::MemStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;

use crate::types::{
    CategoryId, Guess, Player, PlayerId, Room, RoomStatus, Round, RoundResults, Submission,
    SubmissionId, Vote,
};

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Error raised by store backends regardless of the underlying engine.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A room with this code already exists and has not expired.
    #[error("room code already in use")]
    DuplicateCode,
    /// Backend failure (connection loss, timeout, ...).
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait Store: Send + Sync {
    // ---- rooms ----

    /// Insert a new room. Fails with [`StoreError::DuplicateCode`] if the
    /// code is held by a live (not ended, not expired) room.
    async fn insert_room(&self, room: Room) -> StoreResult<()>;

    async fn get_room(&self, code: &str) -> StoreResult<Option<Room>>;

    /// Compare-and-set the room status. Returns whether the transition was
    /// applied; `false` means the room was missing or not in a `from` state.
    async fn update_room_status(
        &self,
        code: &str,
        from: &[RoomStatus],
        to: RoomStatus,
    ) -> StoreResult<bool>;

    /// Replace the room's category pool wholesale.
    async fn set_category_pool(&self, code: &str, pool: Vec<CategoryId>) -> StoreResult<bool>;

    /// Apply a finalized round's outcome to the room row in one update:
    /// leaderboard increments, round counter bump, status to `Results`.
    async fn apply_round_outcome(
        &self,
        code: &str,
        chameleon_deltas: &HashMap<PlayerId, u32>,
        crowd_deltas: &HashMap<PlayerId, u32>,
    ) -> StoreResult<bool>;

    // ---- players ----

    async fn insert_player(&self, player: Player) -> StoreResult<()>;

    async fn get_player(&self, id: &str) -> StoreResult<Option<Player>>;

    async fn list_players(&self, code: &str) -> StoreResult<Vec<Player>>;

    async fn set_player_connected(&self, id: &str, connected: bool) -> StoreResult<bool>;

    async fn set_player_categories(
        &self,
        id: &str,
        categories: std::collections::HashSet<CategoryId>,
    ) -> StoreResult<bool>;

    // ---- rounds ----

    async fn insert_round(&self, round: Round) -> StoreResult<()>;

    async fn get_round(&self, id: &str) -> StoreResult<Option<Round>>;

    /// The room's current round: the most recently created one.
    async fn current_round(&self, code: &str) -> StoreResult<Option<Round>>;

    /// Set the reveal order and vote deadline, only if no reveal order is
    /// present yet. Returns whether this call won the write; the loser of a
    /// concurrent reveal observes `false` and must not re-broadcast its own
    /// permutation.
    async fn set_reveal_order(
        &self,
        round_id: &str,
        order: Vec<SubmissionId>,
        vote_deadline: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Advance a revealed round into the voting phase.
    async fn mark_voting(&self, round_id: &str) -> StoreResult<bool>;

    /// Store results and flip the phase to `Finalized`, only if the round is
    /// not finalized yet. Returns whether this call won; exactly one caller
    /// wins per round, and only the winner may touch the leaderboards.
    async fn finalize_round(&self, round_id: &str, results: RoundResults) -> StoreResult<bool>;

    // ---- submissions ----

    async fn insert_submission(&self, submission: Submission) -> StoreResult<()>;

    /// Submissions for a round, ordered by insertion (ULIDs sort by time).
    async fn list_submissions(&self, round_id: &str) -> StoreResult<Vec<Submission>>;

    async fn count_submissions(&self, round_id: &str) -> StoreResult<usize>;

    async fn find_submission(
        &self,
        round_id: &str,
        player_id: &str,
    ) -> StoreResult<Option<Submission>>;

    // ---- guesses ----

    /// Upsert keyed by (round, player): a new guess replaces the prior one
    /// in a single statement.
    async fn upsert_guess(&self, guess: Guess) -> StoreResult<()>;

    async fn list_guesses(&self, round_id: &str) -> StoreResult<Vec<Guess>>;

    // ---- votes ----

    /// Replace the player's entire vote set for the round in one statement.
    /// An empty set clears the player's votes.
    async fn replace_votes(
        &self,
        round_id: &str,
        player_id: &str,
        votes: Vec<Vote>,
    ) -> StoreResult<()>;

    async fn list_votes(&self, round_id: &str) -> StoreResult<Vec<Vote>>;
}
