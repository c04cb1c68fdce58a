use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};

use crate::protocol::ServerEvent;
use crate::types::RoomCode;

const CHANNEL_CAPACITY: usize = 100;

/// Per-room publish/subscribe registry.
///
/// One broadcast channel per active room, registered when the room's
/// orchestrator starts and dropped when it exits. Delivery is best-effort:
/// sends without subscribers succeed silently and lagging receivers lose
/// messages, which is fine because clients can always re-derive the board
/// from the store.
#[derive(Default)]
pub struct RoomChannels {
    channels: RwLock<HashMap<RoomCode, broadcast::Sender<ServerEvent>>>,
}

impl RoomChannels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or fetch) the channel for a room
    pub async fn register(&self, code: &str) -> broadcast::Sender<ServerEvent> {
        let mut channels = self.channels.write().await;
        channels
            .entry(code.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    /// Subscribe to a room's events; None if the room has no channel
    pub async fn subscribe(&self, code: &str) -> Option<broadcast::Receiver<ServerEvent>> {
        self.channels
            .read()
            .await
            .get(code)
            .map(|tx| tx.subscribe())
    }

    /// Best-effort publish; failures are logged, never surfaced
    pub async fn publish(&self, code: &str, event: ServerEvent) {
        match self.channels.read().await.get(code) {
            // No receivers connected is fine
            Some(tx) => {
                let _ = tx.send(event);
            }
            None => {
                tracing::debug!("dropping event for unregistered room {}", code);
            }
        }
    }

    /// Drop a room's channel once its orchestrator has exited
    pub async fn remove(&self, code: &str) {
        self.channels.write().await.remove(code);
    }
}
