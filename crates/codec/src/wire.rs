//! Wire message types and translation

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use parley_core::{
    AudioFrame, Channels, InboundEvent, OutboundEvent, SampleRate, ToolInvocation, ToolOutcome,
    TurnRole, VoiceParams,
};

/// A malformed or unexpected inbound message
///
/// The orchestrator logs and skips these; only a burst beyond its
/// short-window threshold fails the session.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed wire message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid audio payload: {0}")]
    InvalidAudio(String),

    #[error("unexpected inbound message type: {0}")]
    UnexpectedType(&'static str),
}

/// Wire message envelope, shared by both directions of the stream
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    /// Outbound: open a session for an agent persona
    SessionStart {
        session_id: String,
        agent_id: String,
        instructions: String,
        voice: VoiceParams,
        tools: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context: Option<String>,
    },
    /// Both directions: PCM16 audio, base64-encoded
    Audio { data: String, sample_rate: u32 },
    /// Outbound: resolved tool call
    ToolResult {
        invocation_id: String,
        outcome: ToolOutcome,
    },
    /// Outbound: graceful end of session
    SessionEnd { session_id: String },
    /// Inbound: transcript fragment for either party
    Transcript {
        role: TurnRole,
        text: String,
        is_final: bool,
    },
    /// Inbound: the model requests a tool call
    ToolInvocation {
        invocation_id: String,
        name: String,
        #[serde(default)]
        arguments: Value,
    },
    /// Inbound: the current turn for `role` is complete
    TurnComplete { role: TurnRole },
    /// Inbound: the service observed the user taking the floor
    Interrupted,
    /// Inbound: transport-level failure reported in-band
    Error { message: String },
}

/// Encode a local outbound event into a wire message
pub fn encode(event: &OutboundEvent) -> String {
    let message = match event {
        OutboundEvent::SessionStart {
            session_id,
            agent,
            context,
        } => WireMessage::SessionStart {
            session_id: session_id.clone(),
            agent_id: agent.id.clone(),
            instructions: agent.instructions.clone(),
            voice: agent.voice.clone(),
            tools: agent.tools.clone(),
            context: context.clone(),
        },
        OutboundEvent::AudioChunk { frame } => WireMessage::Audio {
            data: BASE64.encode(frame.to_pcm16()),
            sample_rate: frame.sample_rate.as_u32(),
        },
        OutboundEvent::ToolResult {
            invocation_id,
            outcome,
        } => WireMessage::ToolResult {
            invocation_id: invocation_id.clone(),
            outcome: outcome.clone(),
        },
        OutboundEvent::SessionEnd { session_id } => WireMessage::SessionEnd {
            session_id: session_id.clone(),
        },
    };

    // WireMessage serialization cannot fail: all payloads are plain data
    serde_json::to_string(&message).expect("wire message serialization")
}

/// Decode a wire message into a local inbound event
pub fn decode(text: &str) -> Result<InboundEvent, DecodeError> {
    let message: WireMessage = serde_json::from_str(text)?;

    match message {
        WireMessage::Transcript {
            role,
            text,
            is_final,
        } => Ok(InboundEvent::TranscriptDelta {
            role,
            text,
            is_final,
        }),
        WireMessage::Audio { data, sample_rate } => {
            let bytes = BASE64
                .decode(data.as_bytes())
                .map_err(|e| DecodeError::InvalidAudio(e.to_string()))?;
            let rate = SampleRate::from_u32(sample_rate).ok_or_else(|| {
                DecodeError::InvalidAudio(format!("unsupported sample rate {}", sample_rate))
            })?;
            let frame = AudioFrame::from_pcm16(&bytes, rate, Channels::Mono, 0);
            Ok(InboundEvent::AudioChunk { frame })
        },
        WireMessage::ToolInvocation {
            invocation_id,
            name,
            arguments,
        } => Ok(InboundEvent::ToolInvocation(ToolInvocation::new(
            invocation_id,
            name,
            arguments,
        ))),
        WireMessage::TurnComplete { role } => Ok(InboundEvent::TurnComplete { role }),
        WireMessage::Interrupted => Ok(InboundEvent::Interrupted),
        WireMessage::Error { message } => Ok(InboundEvent::StreamError { message }),
        WireMessage::SessionStart { .. } => Err(DecodeError::UnexpectedType("session_start")),
        WireMessage::ToolResult { .. } => Err(DecodeError::UnexpectedType("tool_result")),
        WireMessage::SessionEnd { .. } => Err(DecodeError::UnexpectedType("session_end")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::AgentDefinition;

    #[test]
    fn test_encode_session_start() {
        let agent = AgentDefinition::new("support", "You help.")
            .with_tools(["lookup_knowledge"]);
        let json = encode(&OutboundEvent::SessionStart {
            session_id: "s-1".into(),
            agent: agent.clone(),
            context: Some("handoff note".into()),
        });

        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "session_start");
        assert_eq!(value["agent_id"], "support");
        assert_eq!(value["context"], "handoff note");
        assert_eq!(value["tools"][0], "lookup_knowledge");
    }

    #[test]
    fn test_encode_session_start_omits_empty_context() {
        let agent = AgentDefinition::new("support", "You help.");
        let json = encode(&OutboundEvent::SessionStart {
            session_id: "s-1".into(),
            agent,
            context: None,
        });
        let value: Value = serde_json::from_str(&json).unwrap();
        assert!(value.get("context").is_none());
    }

    #[test]
    fn test_audio_round_trip() {
        let frame = AudioFrame::new(vec![0.25, -0.25], SampleRate::Hz16000, Channels::Mono, 3);
        let json = encode(&OutboundEvent::AudioChunk {
            frame: frame.clone(),
        });

        match decode(&json).unwrap() {
            InboundEvent::AudioChunk { frame: decoded } => {
                assert_eq!(decoded.samples.len(), 2);
                assert_eq!(decoded.sample_rate, SampleRate::Hz16000);
                assert!((decoded.samples[0] - 0.25).abs() < 1e-3);
            },
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_decode_transcript_and_turn_complete() {
        let event = decode(r#"{"type":"transcript","role":"user","text":"hi","is_final":false}"#)
            .unwrap();
        match event {
            InboundEvent::TranscriptDelta { role, text, is_final } => {
                assert_eq!(role, TurnRole::User);
                assert_eq!(text, "hi");
                assert!(!is_final);
            },
            other => panic!("unexpected event: {:?}", other),
        }

        let event = decode(r#"{"type":"turn_complete","role":"agent"}"#).unwrap();
        assert!(matches!(
            event,
            InboundEvent::TurnComplete {
                role: TurnRole::Agent
            }
        ));
    }

    #[test]
    fn test_decode_tool_invocation() {
        let event = decode(
            r#"{"type":"tool_invocation","invocation_id":"inv-1","name":"lookup_knowledge","arguments":{"query":"rates"}}"#,
        )
        .unwrap();
        match event {
            InboundEvent::ToolInvocation(inv) => {
                assert_eq!(inv.invocation_id, "inv-1");
                assert_eq!(inv.tool_name, "lookup_knowledge");
                assert_eq!(inv.arguments["query"], "rates");
            },
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_decode_malformed() {
        assert!(matches!(
            decode("{not json"),
            Err(DecodeError::Malformed(_))
        ));
        assert!(matches!(
            decode(r#"{"type":"no_such_thing"}"#),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_rejects_outbound_types() {
        assert!(matches!(
            decode(r#"{"type":"session_end","session_id":"s-1"}"#),
            Err(DecodeError::UnexpectedType("session_end"))
        ));
    }

    #[test]
    fn test_decode_bad_audio() {
        assert!(matches!(
            decode(r#"{"type":"audio","data":"!!!","sample_rate":16000}"#),
            Err(DecodeError::InvalidAudio(_))
        ));
        assert!(matches!(
            decode(r#"{"type":"audio","data":"","sample_rate":44100}"#),
            Err(DecodeError::InvalidAudio(_))
        ));
    }
}
