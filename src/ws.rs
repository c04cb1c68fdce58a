use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use futures::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

use crate::error::GameError;
use crate::protocol::{ClientMessage, ServerEvent};
use crate::rooms::RoomManager;
use crate::types::PlayerId;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Room to attach to; omitted when the client only wants to create one
    pub room: Option<String>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsQuery>,
    State(manager): State<Arc<RoomManager>>,
) -> impl IntoResponse {
    tracing::info!("WebSocket connection request: room={:?}", params.room);
    ws.on_upgrade(move |socket| handle_socket(socket, params, manager))
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, params: WsQuery, manager: Arc<RoomManager>) {
    let (mut sender, mut receiver) = socket.split();

    // Attach to the room's channel up front so no event between subscribe
    // and the first board derivation is missed
    let mut room_rx = match &params.room {
        Some(code) => match manager.channels().subscribe(code).await {
            Some(rx) => Some(rx),
            None => {
                send_event(
                    &mut sender,
                    &ServerEvent::Error {
                        code: "ROOM_NOT_FOUND".to_string(),
                        msg: format!("room {} not found", code),
                    },
                )
                .await;
                return;
            }
        },
        None => None,
    };

    // Player admitted over this socket, for the disconnect/unload signal
    let mut joined_player: Option<PlayerId> = None;

    loop {
        tokio::select! {
            event = recv_or_pending(&mut room_rx) => {
                match event {
                    Ok(event) => {
                        if !send_event(&mut sender, &event).await {
                            break;
                        }
                    }
                    // Missed events are fine, the board is re-derivable
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!("subscriber lagged, skipped {} events", skipped);
                    }
                    Err(RecvError::Closed) => {
                        room_rx = None;
                    }
                }
            }

            ws_msg = receiver.next() => {
                match ws_msg {
                    Some(Ok(Message::Text(text))) => {
                        let reply = match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(msg) => {
                                handle_message(msg, params.room.as_deref(), &mut joined_player, &manager)
                                    .await
                            }
                            Err(e) => Some(ServerEvent::Error {
                                code: "BAD_MESSAGE".to_string(),
                                msg: e.to_string(),
                            }),
                        };
                        if let Some(reply) = reply {
                            if !send_event(&mut sender, &reply).await {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // ping/pong/binary
                    Some(Err(e)) => {
                        tracing::debug!("WebSocket error: {}", e);
                        break;
                    }
                }
            }
        }
    }

    // Socket gone without an explicit leave: treat it as the unload signal
    if let Some(player_id) = joined_player {
        if let Err(e) = manager.leave(&player_id).await {
            tracing::warn!("disconnect cleanup for {} failed: {}", player_id, e);
        }
    }
}

async fn recv_or_pending(
    rx: &mut Option<tokio::sync::broadcast::Receiver<ServerEvent>>,
) -> Result<ServerEvent, RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn send_event(
    sender: &mut (impl SinkExt<Message> + Unpin),
    event: &ServerEvent,
) -> bool {
    match serde_json::to_string(event) {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            tracing::error!("failed to serialize event: {}", e);
            true
        }
    }
}

fn error_reply(e: GameError) -> Option<ServerEvent> {
    Some(ServerEvent::Error {
        code: e.code().to_string(),
        msg: e.to_string(),
    })
}

/// Everything except room creation happens inside a room
fn no_room() -> Option<ServerEvent> {
    Some(ServerEvent::Error {
        code: "NO_ROOM".to_string(),
        msg: "connect with ?room=CODE first".to_string(),
    })
}

/// Dispatch a client message. State-changing successes answer through the
/// room broadcast; only errors and direct queries reply on this socket.
async fn handle_message(
    msg: ClientMessage,
    room_code: Option<&str>,
    joined_player: &mut Option<PlayerId>,
    manager: &Arc<RoomManager>,
) -> Option<ServerEvent> {
    match msg {
        ClientMessage::CreateRoom { host_device_id } => {
            match manager.create_room(&host_device_id).await {
                Ok(room) => Some(ServerEvent::RoomCreated {
                    code: room.code,
                    expires_at: room.expires_at,
                }),
                Err(e) => error_reply(e),
            }
        }

        ClientMessage::Join { name, color } => {
            let Some(code) = room_code else {
                return no_room();
            };
            match manager.join_room(code, &name, &color).await {
                Ok(player) => {
                    *joined_player = Some(player.id.clone());
                    match manager.board(code).await {
                        Ok(board) => Some(ServerEvent::Joined {
                            player_id: player.id,
                            board,
                        }),
                        Err(e) => error_reply(e),
                    }
                }
                Err(e) => error_reply(e),
            }
        }

        ClientMessage::Leave { player_id } => {
            if joined_player.as_deref() == Some(player_id.as_str()) {
                *joined_player = None;
            }
            match manager.leave(&player_id).await {
                Ok(()) => None,
                Err(e) => error_reply(e),
            }
        }

        ClientMessage::SelectCategories {
            player_id,
            categories,
        } => match manager.select_categories(&player_id, categories).await {
            Ok(_) => None,
            Err(e) => error_reply(e),
        },

        ClientMessage::StartRound {
            device_id,
            category,
            prompt,
        } => {
            let Some(code) = room_code else {
                return no_room();
            };
            match manager.handle(code).await {
                Some(handle) => match handle.start_round(device_id, category, prompt).await {
                    Ok(_) => None,
                    Err(e) => error_reply(e),
                },
                None => error_reply(GameError::RoomGone),
            }
        }

        ClientMessage::Submit { player_id, text } => {
            let Some(code) = room_code else {
                return no_room();
            };
            match manager.handle(code).await {
                Some(handle) => match handle.submit(player_id, text).await {
                    Ok(_) => None,
                    Err(e) => error_reply(e),
                },
                None => error_reply(GameError::RoomGone),
            }
        }

        ClientMessage::Guess {
            player_id,
            submission_id,
        } => {
            let Some(code) = room_code else {
                return no_room();
            };
            match manager.handle(code).await {
                Some(handle) => match handle.guess(player_id, submission_id).await {
                    Ok(()) => None,
                    Err(e) => error_reply(e),
                },
                None => error_reply(GameError::RoomGone),
            }
        }

        ClientMessage::Vote {
            player_id,
            submission_ids,
        } => {
            let Some(code) = room_code else {
                return no_room();
            };
            match manager.handle(code).await {
                Some(handle) => match handle.set_votes(player_id, submission_ids).await {
                    Ok(()) => None,
                    Err(e) => error_reply(e),
                },
                None => error_reply(GameError::RoomGone),
            }
        }

        ClientMessage::GetBoard => {
            let Some(code) = room_code else {
                return no_room();
            };
            match manager.board(code).await {
                Ok(board) => Some(ServerEvent::Board { board }),
                Err(e) => error_reply(e),
            }
        }
    }
}
