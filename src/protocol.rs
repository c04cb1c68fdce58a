use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::board::BoardState;
use crate::types::*;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Create a new room; the caller becomes its host.
    CreateRoom {
        host_device_id: String,
    },
    /// Join the room this socket is attached to.
    Join {
        name: String,
        color: String,
    },
    Leave {
        player_id: PlayerId,
    },
    SelectCategories {
        player_id: PlayerId,
        categories: Vec<CategoryId>,
    },
    /// Host action. Category/prompt are optional overrides.
    StartRound {
        device_id: String,
        category: Option<CategoryId>,
        prompt: Option<String>,
    },
    Submit {
        player_id: PlayerId,
        text: String,
    },
    Guess {
        player_id: PlayerId,
        submission_id: SubmissionId,
    },
    /// Replaces the player's entire vote set; empty clears.
    Vote {
        player_id: PlayerId,
        submission_ids: Vec<SubmissionId>,
    },
    /// Re-derive the full room snapshot from the store.
    GetBoard,
}

/// An anonymized answer as shown during reveal and voting
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RevealItem {
    pub id: SubmissionId,
    pub text: String,
}

/// Events published on a room's broadcast channel, plus direct replies.
///
/// Delivery is best-effort with no ordering guarantee; everything a client
/// needs is also re-derivable from the board (`GetBoard`), so a dropped
/// event never strands anyone.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum ServerEvent {
    /// Generic "something about the room changed, re-render" signal
    #[serde(rename = "room:update")]
    RoomUpdate { board: BoardState },

    #[serde(rename = "round:start")]
    RoundStart {
        round_id: RoundId,
        category: CategoryId,
        deadline: DateTime<Utc>,
        prompt: String,
    },

    /// A player submitted; the text stays hidden until reveal
    #[serde(rename = "round:submit")]
    RoundSubmit { player_id: PlayerId },

    #[serde(rename = "round:reveal")]
    RoundReveal {
        round_id: RoundId,
        items: Vec<RevealItem>,
    },

    #[serde(rename = "round:vote_start")]
    VoteStart { vote_deadline: DateTime<Utc> },

    #[serde(rename = "round:results")]
    RoundResultsEvent {
        owner_answer_id: Option<SubmissionId>,
        correct_guessers: Vec<PlayerId>,
        vote_counts: HashMap<SubmissionId, u32>,
    },

    #[serde(rename = "categories:update")]
    CategoriesUpdate {
        player_id: PlayerId,
        selected_categories: Vec<CategoryId>,
    },

    // Direct (socket-only) replies, not routed through the room channel
    #[serde(rename = "room_created")]
    RoomCreated {
        code: RoomCode,
        expires_at: DateTime<Utc>,
    },

    #[serde(rename = "joined")]
    Joined {
        player_id: PlayerId,
        board: BoardState,
    },

    #[serde(rename = "board")]
    Board { board: BoardState },

    #[serde(rename = "error")]
    Error { code: String, msg: String },
}
