use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Opaque ID types for type safety
pub type RoomCode = String;
pub type PlayerId = String;
pub type RoundId = String;
pub type SubmissionId = String;
pub type GuessId = String;
pub type VoteId = String;
pub type CategoryId = String;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum RoomStatus {
    Lobby,
    InRound,
    Results,
    Ended,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoundPhase {
    Submitting,
    Revealed,
    Voting,
    Finalized,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameConfig {
    pub submit_seconds: u32,
    pub vote_seconds: u32,
    pub max_answer_chars: usize,
    pub min_players: usize,
    pub max_players: usize,
    pub room_ttl_minutes: i64,
    pub code_attempts: u32,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            submit_seconds: 60,
            vote_seconds: 30,
            max_answer_chars: 100,
            min_players: 3,
            max_players: 8,
            room_ttl_minutes: 30,
            code_attempts: 8,
        }
    }
}

impl GameConfig {
    /// Build a config from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
            std::env::var(key).ok().and_then(|v| v.parse().ok())
        }

        let defaults = Self::default();
        Self {
            submit_seconds: env_parse("CHAMELEON_SUBMIT_SECONDS").unwrap_or(defaults.submit_seconds),
            vote_seconds: env_parse("CHAMELEON_VOTE_SECONDS").unwrap_or(defaults.vote_seconds),
            max_answer_chars: env_parse("CHAMELEON_MAX_ANSWER_CHARS")
                .unwrap_or(defaults.max_answer_chars),
            min_players: env_parse("CHAMELEON_MIN_PLAYERS").unwrap_or(defaults.min_players),
            max_players: env_parse("CHAMELEON_MAX_PLAYERS").unwrap_or(defaults.max_players),
            room_ttl_minutes: env_parse("CHAMELEON_ROOM_TTL_MINUTES")
                .unwrap_or(defaults.room_ttl_minutes),
            code_attempts: env_parse("CHAMELEON_CODE_ATTEMPTS").unwrap_or(defaults.code_attempts),
        }
    }
}

/// One game session, identified by a short join code
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub code: RoomCode,
    pub host_device_id: String,
    pub status: RoomStatus,
    /// Categories every opted-in connected player has agreed to (recomputed, never merged)
    pub category_pool: Vec<CategoryId>,
    /// Monotonic counter used to rotate round ownership
    pub round_counter: u32,
    /// Leaderboard: correct owner guesses per player
    pub chameleon_scores: HashMap<PlayerId, u32>,
    /// Leaderboard: votes received per player
    pub crowd_scores: HashMap<PlayerId, u32>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub room_code: RoomCode,
    pub name: String,
    /// Avatar color, unique among connected players of the same room
    pub color: String,
    pub connected: bool,
    /// Selected categories; empty means the player has not opted in yet
    pub categories: HashSet<CategoryId>,
}

/// One prompt/answer/guess/vote cycle within a room
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Round {
    pub id: RoundId,
    pub room_code: RoomCode,
    pub category: CategoryId,
    pub prompt: String,
    /// The player whose submission is the guess target this round
    pub owner_id: PlayerId,
    pub phase: RoundPhase,
    pub submit_deadline: DateTime<Utc>,
    /// Set when the reveal fires; recoverable from the store after a reload
    pub vote_deadline: Option<DateTime<Utc>>,
    /// Randomized permutation of submission ids, set at most once per round
    pub reveal_order: Option<Vec<SubmissionId>>,
    pub results: Option<RoundResults>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoundResults {
    /// The owner's submission, None if the owner never submitted
    pub owner_answer_id: Option<SubmissionId>,
    pub correct_guessers: Vec<PlayerId>,
    pub vote_counts: HashMap<SubmissionId, u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub id: SubmissionId,
    pub round_id: RoundId,
    pub player_id: PlayerId,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Guess {
    pub id: GuessId,
    pub round_id: RoundId,
    pub player_id: PlayerId,
    pub submission_id: SubmissionId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub id: VoteId,
    pub round_id: RoundId,
    pub player_id: PlayerId,
    pub submission_id: SubmissionId,
}
