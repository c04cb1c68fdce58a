use chrono::{Duration, Utc};
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::board::BoardState;
use crate::broadcast::RoomChannels;
use crate::categories::{self, update_category_pool};
use crate::error::{GameError, GameResult};
use crate::orchestrator::{self, RoomHandle};
use crate::protocol::ServerEvent;
use crate::store::{Store, StoreError};
use crate::types::*;

/// Safe character set for room codes (excludes 0/O, 1/I/L to avoid confusion)
const CODE_CHARS: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
const CODE_LENGTH: usize = 5;

fn generate_room_code() -> String {
    let mut rng = rand::rng();
    (0..CODE_LENGTH)
        .map(|_| CODE_CHARS[rng.random_range(0..CODE_CHARS.len())] as char)
        .collect()
}

/// Owns active rooms: their orchestrator handles and broadcast channels.
pub struct RoomManager {
    store: Arc<dyn Store>,
    channels: Arc<RoomChannels>,
    config: GameConfig,
    handles: RwLock<HashMap<RoomCode, RoomHandle>>,
}

impl RoomManager {
    pub fn new(store: Arc<dyn Store>, config: GameConfig) -> Self {
        Self {
            store,
            channels: Arc::new(RoomChannels::new()),
            config,
            handles: RwLock::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    pub fn channels(&self) -> &Arc<RoomChannels> {
        &self.channels
    }

    pub async fn handle(&self, code: &str) -> Option<RoomHandle> {
        self.handles.read().await.get(code).cloned()
    }

    /// Derive the current room snapshot straight from the store
    pub async fn board(&self, code: &str) -> GameResult<BoardState> {
        BoardState::project(self.store.as_ref(), code).await
    }

    /// Create a room with a fresh code and spawn its orchestrator.
    /// Code generation retries a bounded number of times on collision.
    pub async fn create_room(&self, host_device_id: &str) -> GameResult<Room> {
        let mut room = None;
        for _ in 0..self.config.code_attempts {
            let now = Utc::now();
            let candidate = Room {
                code: generate_room_code(),
                host_device_id: host_device_id.to_string(),
                status: RoomStatus::Lobby,
                category_pool: Vec::new(),
                round_counter: 0,
                chameleon_scores: HashMap::new(),
                crowd_scores: HashMap::new(),
                created_at: now,
                expires_at: now + Duration::minutes(self.config.room_ttl_minutes),
            };
            match self.store.insert_room(candidate.clone()).await {
                Ok(()) => {
                    room = Some(candidate);
                    break;
                }
                Err(StoreError::DuplicateCode) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        let room = room.ok_or(GameError::CodeExhaustion(self.config.code_attempts))?;

        self.channels.register(&room.code).await;
        let handle = orchestrator::spawn(
            room.code.clone(),
            self.store.clone(),
            self.channels.clone(),
            self.config.clone(),
        );
        self.handles
            .write()
            .await
            .insert(room.code.clone(), handle);

        tracing::info!(room = %room.code, "room created");
        Ok(room)
    }

    /// Admit a player into a lobby. Capacity and color uniqueness are
    /// checked against currently-connected players only.
    pub async fn join_room(&self, code: &str, name: &str, color: &str) -> GameResult<Player> {
        let name = name.trim();
        if name.is_empty() {
            return Err(GameError::Validation("name must not be empty".into()));
        }
        if color.trim().is_empty() {
            return Err(GameError::Validation("color must not be empty".into()));
        }

        let room = self
            .store
            .get_room(code)
            .await?
            .ok_or_else(|| GameError::RoomNotFound(code.to_string()))?;
        if room.status != RoomStatus::Lobby {
            return Err(GameError::RoomNotJoinable);
        }

        let players = self.store.list_players(code).await?;
        let connected: Vec<_> = players.iter().filter(|p| p.connected).collect();
        if connected.len() >= self.config.max_players {
            return Err(GameError::RoomFull);
        }
        if connected.iter().any(|p| p.color == color) {
            return Err(GameError::ColorTaken);
        }

        let player = Player {
            id: ulid::Ulid::new().to_string(),
            room_code: code.to_string(),
            name: name.to_string(),
            color: color.to_string(),
            connected: true,
            categories: HashSet::new(),
        };
        self.store.insert_player(player.clone()).await?;

        tracing::info!(room = %code, player = %player.id, "player {} joined", name);
        self.after_membership_change(code).await;

        Ok(player)
    }

    /// Mark a player disconnected. History (submissions, guesses, votes)
    /// survives for scoring; the color becomes available again.
    pub async fn leave(&self, player_id: &str) -> GameResult<()> {
        let player = self
            .store
            .get_player(player_id)
            .await?
            .ok_or_else(|| GameError::PlayerNotFound(player_id.to_string()))?;

        self.store.set_player_connected(player_id, false).await?;

        tracing::info!(room = %player.room_code, player = %player_id, "player left");
        self.after_membership_change(&player.room_code).await;

        Ok(())
    }

    /// Store a player's category selection and recompute the room pool
    pub async fn select_categories(
        &self,
        player_id: &str,
        selected: Vec<CategoryId>,
    ) -> GameResult<Vec<CategoryId>> {
        for id in &selected {
            if categories::category(id).is_none() {
                return Err(GameError::UnknownCategory(id.clone()));
            }
        }

        let player = self
            .store
            .get_player(player_id)
            .await?
            .ok_or_else(|| GameError::PlayerNotFound(player_id.to_string()))?;

        self.store
            .set_player_categories(player_id, selected.iter().cloned().collect())
            .await?;

        let pool = update_category_pool(self.store.as_ref(), &player.room_code).await?;

        self.channels
            .publish(
                &player.room_code,
                ServerEvent::CategoriesUpdate {
                    player_id: player_id.to_string(),
                    selected_categories: selected,
                },
            )
            .await;

        Ok(pool)
    }

    /// Recompute the category pool, refresh subscribers, and nudge the
    /// orchestrator. All best-effort: joins and leaves have already been
    /// persisted, so a failed notification only delays a refresh.
    async fn after_membership_change(&self, code: &str) {
        if let Err(e) = update_category_pool(self.store.as_ref(), code).await {
            tracing::warn!(room = %code, "category pool update failed: {}", e);
        }

        match BoardState::project(self.store.as_ref(), code).await {
            Ok(board) => {
                self.channels
                    .publish(code, ServerEvent::RoomUpdate { board })
                    .await;
            }
            Err(e) => tracing::warn!(room = %code, "board refresh failed: {}", e),
        }

        if let Some(handle) = self.handle(code).await {
            handle.sync().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemStore;

    fn manager() -> RoomManager {
        RoomManager::new(Arc::new(MemStore::new()), GameConfig::default())
    }

    #[tokio::test]
    async fn created_codes_use_safe_alphabet() {
        let manager = manager();
        let room = manager.create_room("host-device").await.unwrap();

        assert_eq!(room.code.len(), CODE_LENGTH);
        assert!(room
            .code
            .bytes()
            .all(|b| CODE_CHARS.contains(&b)));
        assert_eq!(room.status, RoomStatus::Lobby);
        assert!(room.expires_at > room.created_at);
    }

    #[tokio::test]
    async fn join_rejects_unknown_room() {
        let manager = manager();
        let err = manager
            .join_room("ZZZZZ", "alice", "#ff0000")
            .await
            .unwrap_err();
        assert!(matches!(err, GameError::RoomNotFound(_)));
    }

    #[tokio::test]
    async fn join_rejects_empty_name() {
        let manager = manager();
        let room = manager.create_room("host-device").await.unwrap();

        let err = manager
            .join_room(&room.code, "   ", "#ff0000")
            .await
            .unwrap_err();
        assert!(matches!(err, GameError::Validation(_)));
    }

    #[tokio::test]
    async fn join_enforces_capacity_against_connected_players() {
        let manager = manager();
        let room = manager.create_room("host-device").await.unwrap();

        for i in 0..8 {
            manager
                .join_room(&room.code, &format!("player{i}"), &format!("#color{i}"))
                .await
                .unwrap();
        }

        let err = manager
            .join_room(&room.code, "ninth", "#color9")
            .await
            .unwrap_err();
        assert!(matches!(err, GameError::RoomFull));
    }

    #[tokio::test]
    async fn color_is_unique_among_connected_only() {
        let manager = manager();
        let room = manager.create_room("host-device").await.unwrap();

        let alice = manager
            .join_room(&room.code, "alice", "#ff0000")
            .await
            .unwrap();

        let err = manager
            .join_room(&room.code, "bob", "#ff0000")
            .await
            .unwrap_err();
        assert!(matches!(err, GameError::ColorTaken));

        // Once alice disconnects her color frees up
        manager.leave(&alice.id).await.unwrap();
        manager
            .join_room(&room.code, "bob", "#ff0000")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn join_requires_lobby_status() {
        let manager = manager();
        let room = manager.create_room("host-device").await.unwrap();
        manager
            .store()
            .update_room_status(&room.code, &[RoomStatus::Lobby], RoomStatus::InRound)
            .await
            .unwrap();

        let err = manager
            .join_room(&room.code, "alice", "#ff0000")
            .await
            .unwrap_err();
        assert!(matches!(err, GameError::RoomNotJoinable));
    }

    #[tokio::test]
    async fn leaving_keeps_the_player_row() {
        let manager = manager();
        let room = manager.create_room("host-device").await.unwrap();
        let alice = manager
            .join_room(&room.code, "alice", "#ff0000")
            .await
            .unwrap();

        manager.leave(&alice.id).await.unwrap();

        let stored = manager
            .store()
            .get_player(&alice.id)
            .await
            .unwrap()
            .expect("player row survives disconnect");
        assert!(!stored.connected);
    }

    #[tokio::test]
    async fn category_selection_recomputes_the_pool() {
        let manager = manager();
        let room = manager.create_room("host-device").await.unwrap();
        let alice = manager
            .join_room(&room.code, "alice", "#ff0000")
            .await
            .unwrap();
        let bob = manager
            .join_room(&room.code, "bob", "#00ff00")
            .await
            .unwrap();

        manager
            .select_categories(
                &alice.id,
                vec!["headline_hijack".to_string(), "hot_takes".to_string()],
            )
            .await
            .unwrap();
        let pool = manager
            .select_categories(&bob.id, vec!["hot_takes".to_string()])
            .await
            .unwrap();

        assert_eq!(pool, vec!["hot_takes".to_string()]);
        let stored = manager
            .store()
            .get_room(&room.code)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.category_pool, vec!["hot_takes".to_string()]);
    }

    #[tokio::test]
    async fn unknown_category_selection_is_rejected() {
        let manager = manager();
        let room = manager.create_room("host-device").await.unwrap();
        let alice = manager
            .join_room(&room.code, "alice", "#ff0000")
            .await
            .unwrap();

        let err = manager
            .select_categories(&alice.id, vec!["no_such_category".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, GameError::UnknownCategory(_)));
    }
}
