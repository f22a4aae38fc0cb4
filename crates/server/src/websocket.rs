//! WebSocket bridge between a browser client and one conversation
//!
//! One socket per conversation: captured audio and control messages come
//! in, orchestrator events and generated speech go out. The socket is an
//! observer plus microphone; closing it does not end the conversation.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use parley_audio::AudioIoChannel;
use parley_core::{AudioFrame, Channels, SampleRate, TurnId, TurnRole};
use parley_orchestrator::{OrchestratorEvent, SessionOrchestrator};

use crate::state::AppState;

/// Messages from the client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// One captured PCM16 frame, base64-encoded
    Audio { data: String, sample_rate: u32 },
    /// Request a mid-conversation agent switch
    Switch { target_agent_id: String },
    /// End the conversation gracefully
    Stop,
}

/// Messages to the client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    SessionStarted {
        session_id: String,
        agent_id: String,
    },
    Reconnected {
        session_id: String,
    },
    Transcript {
        turn_id: TurnId,
        role: TurnRole,
        text: String,
        is_final: bool,
    },
    TurnCompleted {
        turn_id: TurnId,
        role: TurnRole,
    },
    TurnInterrupted {
        turn_id: TurnId,
    },
    ToolStarted {
        invocation_id: String,
        tool_name: String,
    },
    ToolResolved {
        invocation_id: String,
        tool_name: String,
        is_error: bool,
        duration_ms: u64,
    },
    SwitchStarted {
        target_agent_id: String,
    },
    SwitchCompleted {
        session_id: String,
        agent_id: String,
    },
    SwitchFailed {
        target_agent_id: String,
        reason: String,
    },
    /// Generated speech, PCM16 base64, tagged with the turn it belongs to
    Audio {
        data: String,
        sample_rate: u32,
        turn_id: TurnId,
    },
    Error {
        message: String,
    },
    SessionEnded {
        session_id: String,
    },
}

impl ServerMessage {
    fn from_event(event: OrchestratorEvent) -> Self {
        match event {
            OrchestratorEvent::SessionStarted {
                session_id,
                agent_id,
            } => ServerMessage::SessionStarted {
                session_id,
                agent_id,
            },
            OrchestratorEvent::Reconnected { session_id } => {
                ServerMessage::Reconnected { session_id }
            }
            OrchestratorEvent::TranscriptUpdate {
                turn_id,
                role,
                text,
                is_final,
            } => ServerMessage::Transcript {
                turn_id,
                role,
                text,
                is_final,
            },
            OrchestratorEvent::TurnCompleted { turn_id, role } => {
                ServerMessage::TurnCompleted { turn_id, role }
            }
            OrchestratorEvent::TurnInterrupted { turn_id } => {
                ServerMessage::TurnInterrupted { turn_id }
            }
            OrchestratorEvent::ToolStarted {
                invocation_id,
                tool_name,
            } => ServerMessage::ToolStarted {
                invocation_id,
                tool_name,
            },
            OrchestratorEvent::ToolResolved {
                invocation_id,
                tool_name,
                is_error,
                duration_ms,
            } => ServerMessage::ToolResolved {
                invocation_id,
                tool_name,
                is_error,
                duration_ms,
            },
            OrchestratorEvent::SwitchStarted { target_agent_id } => {
                ServerMessage::SwitchStarted { target_agent_id }
            }
            OrchestratorEvent::SwitchCompleted {
                session_id,
                agent_id,
            } => ServerMessage::SwitchCompleted {
                session_id,
                agent_id,
            },
            OrchestratorEvent::SwitchFailed {
                target_agent_id,
                reason,
            } => ServerMessage::SwitchFailed {
                target_agent_id,
                reason,
            },
            OrchestratorEvent::SessionError { message } => ServerMessage::Error { message },
            OrchestratorEvent::SessionEnded { session_id } => {
                ServerMessage::SessionEnded { session_id }
            }
        }
    }
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    let Some((orchestrator, audio)) = state
        .conversations
        .get(&id)
        .map(|c| (c.orchestrator.clone(), Arc::clone(&c.audio)))
    else {
        return StatusCode::NOT_FOUND.into_response();
    };

    ws.on_upgrade(move |socket| handle_socket(socket, id, orchestrator, audio))
}

async fn handle_socket(
    mut socket: WebSocket,
    conversation_id: String,
    orchestrator: SessionOrchestrator,
    audio: Arc<AudioIoChannel>,
) {
    tracing::info!(conversation = %conversation_id, "WebSocket client attached");
    let mut events = orchestrator.subscribe();
    let playback = audio.playback_queue();
    let mut sequence: u64 = 0;

    loop {
        tokio::select! {
            message = socket.recv() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(msg) => {
                                let done = handle_client_message(msg, &orchestrator, &mut sequence).await;
                                if done {
                                    break;
                                }
                            }
                            Err(e) => {
                                tracing::debug!(error = %e, "Unparseable client message");
                                let reply = ServerMessage::Error {
                                    message: format!("unparseable message: {}", e),
                                };
                                if send_message(&mut socket, &reply).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "WebSocket receive error");
                        break;
                    }
                }
            }
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        let ended = matches!(event, OrchestratorEvent::SessionEnded { .. });
                        let msg = ServerMessage::from_event(event);
                        if send_message(&mut socket, &msg).await.is_err() {
                            break;
                        }
                        if ended {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "WebSocket client lagged behind event stream");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            (turn_id, frame) = playback.next() => {
                let msg = ServerMessage::Audio {
                    data: BASE64.encode(frame.to_pcm16()),
                    sample_rate: frame.sample_rate.as_u32(),
                    turn_id,
                };
                if send_message(&mut socket, &msg).await.is_err() {
                    break;
                }
            }
        }
    }

    tracing::info!(conversation = %conversation_id, "WebSocket client detached");
}

/// Returns true when the socket loop should end
async fn handle_client_message(
    message: ClientMessage,
    orchestrator: &SessionOrchestrator,
    sequence: &mut u64,
) -> bool {
    match message {
        ClientMessage::Audio { data, sample_rate } => {
            let Ok(bytes) = BASE64.decode(&data) else {
                tracing::debug!("Discarding audio frame with invalid base64");
                return false;
            };
            let rate = SampleRate::from_u32(sample_rate).unwrap_or_default();
            let frame = AudioFrame::from_pcm16(&bytes, rate, Channels::Mono, *sequence);
            *sequence += 1;
            orchestrator.submit_audio_frame(frame);
            false
        }
        ClientMessage::Switch { target_agent_id } => {
            if let Err(e) = orchestrator.request_switch(&target_agent_id).await {
                tracing::debug!(target = %target_agent_id, error = %e, "Switch request rejected");
            }
            false
        }
        ClientMessage::Stop => {
            if let Err(e) = orchestrator.stop().await {
                tracing::warn!(error = %e, "Error stopping conversation");
            }
            true
        }
    }
}

async fn send_message(socket: &mut WebSocket, message: &ServerMessage) -> Result<(), axum::Error> {
    let text = serde_json::to_string(message).unwrap_or_default();
    socket.send(Message::Text(text)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_parsing() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type": "audio", "data": "AAA=", "sample_rate": 16000}"#)
                .unwrap();
        assert!(matches!(msg, ClientMessage::Audio { sample_rate: 16000, .. }));

        let msg: ClientMessage =
            serde_json::from_str(r#"{"type": "switch", "target_agent_id": "sales"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Switch { .. }));

        let msg: ClientMessage = serde_json::from_str(r#"{"type": "stop"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Stop));
    }

    #[test]
    fn test_server_message_tagging() {
        let json = serde_json::to_value(ServerMessage::Transcript {
            turn_id: 3,
            role: TurnRole::Agent,
            text: "hello".into(),
            is_final: true,
        })
        .unwrap();
        assert_eq!(json["type"], "transcript");
        assert_eq!(json["role"], "agent");
        assert_eq!(json["turn_id"], 3);

        let json = serde_json::to_value(ServerMessage::Audio {
            data: "AAA=".into(),
            sample_rate: 24000,
            turn_id: 7,
        })
        .unwrap();
        assert_eq!(json["type"], "audio");
        assert_eq!(json["sample_rate"], 24000);
    }

    #[test]
    fn test_event_mapping() {
        let msg = ServerMessage::from_event(OrchestratorEvent::SwitchFailed {
            target_agent_id: "sales".into(),
            reason: "unreachable".into(),
        });
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "switch_failed");
        assert_eq!(json["reason"], "unreachable");

        let msg = ServerMessage::from_event(OrchestratorEvent::SessionError {
            message: "stream failure".into(),
        });
        assert!(matches!(msg, ServerMessage::Error { .. }));
    }
}
