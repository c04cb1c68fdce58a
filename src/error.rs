use thiserror::Error;

use crate::store::StoreError;

/// Errors surfaced synchronously to the caller of a failing game operation.
///
/// Broadcast failures are never represented here: notifications are
/// best-effort and are logged where they occur.
#[derive(Debug, Error)]
pub enum GameError {
    #[error("room {0} not found")]
    RoomNotFound(String),
    #[error("round {0} not found")]
    RoundNotFound(String),
    #[error("player {0} not found")]
    PlayerNotFound(String),
    #[error("no active round")]
    NoActiveRound,
    #[error("room is not joinable")]
    RoomNotJoinable,
    #[error("room is full")]
    RoomFull,
    #[error("color already taken")]
    ColorTaken,
    #[error("category pool is empty")]
    EmptyCategoryPool,
    #[error("unknown category {0}")]
    UnknownCategory(String),
    #[error("need at least {0} connected players")]
    NotEnoughPlayers(usize),
    #[error("wrong phase for {0}")]
    WrongPhase(&'static str),
    #[error("only the host can do this")]
    NotHost,
    #[error("already submitted this round")]
    AlreadySubmitted,
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("room code space exhausted after {0} attempts")]
    CodeExhaustion(u32),
    #[error("room is no longer active")]
    RoomGone,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl GameError {
    /// Stable wire code sent back to clients alongside the message
    pub fn code(&self) -> &'static str {
        match self {
            GameError::RoomNotFound(_) => "ROOM_NOT_FOUND",
            GameError::RoundNotFound(_) => "ROUND_NOT_FOUND",
            GameError::PlayerNotFound(_) => "PLAYER_NOT_FOUND",
            GameError::NoActiveRound => "NO_ACTIVE_ROUND",
            GameError::RoomNotJoinable => "ROOM_NOT_JOINABLE",
            GameError::RoomFull => "ROOM_FULL",
            GameError::ColorTaken => "COLOR_TAKEN",
            GameError::EmptyCategoryPool => "EMPTY_CATEGORY_POOL",
            GameError::UnknownCategory(_) => "UNKNOWN_CATEGORY",
            GameError::NotEnoughPlayers(_) => "NOT_ENOUGH_PLAYERS",
            GameError::WrongPhase(_) => "WRONG_PHASE",
            GameError::NotHost => "NOT_HOST",
            GameError::AlreadySubmitted => "ALREADY_SUBMITTED",
            GameError::Validation(_) => "VALIDATION_ERROR",
            GameError::CodeExhaustion(_) => "CODE_EXHAUSTION",
            GameError::RoomGone => "ROOM_GONE",
            GameError::Store(_) => "STORE_ERROR",
        }
    }

    /// True for failures of the Conflict class (room/phase state disagrees
    /// with the request, as opposed to missing or malformed input)
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            GameError::RoomNotJoinable
                | GameError::RoomFull
                | GameError::ColorTaken
                | GameError::EmptyCategoryPool
                | GameError::NotEnoughPlayers(_)
                | GameError::WrongPhase(_)
                | GameError::NotHost
                | GameError::AlreadySubmitted
        )
    }
}

pub type GameResult<T> = Result<T, GameError>;
