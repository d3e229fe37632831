//! Realtime duplex voice session engine.
//!
//! Owns the full lifecycle of one voice conversation with a remote
//! conversational agent: microphone capture and PCM16 encoding, the
//! websocket session itself, gapless scheduling of synthesized audio,
//! barge-in cancellation, and dispatch of remote tool calls to
//! application-registered handlers. The UI shell drives it through
//! [`VoiceEngine`] and renders the [`InboundEvent`] stream.

mod capture;
mod config;
mod consts;
mod engine;
mod error;
mod levels;
mod playback;
mod protocol;
mod tools;

pub use voicelink_types as types;
pub use voicelink_utils as utils;

pub use config::{EngineConfig, EngineConfigBuilder};
pub use engine::{SessionState, VoiceEngine};
pub use error::{AudioError, ConnectError, SessionError};
pub use protocol::InboundEvent;
pub use tools::{ToolHandler, ToolResult};
pub use voicelink_types::{ToolCallRequest, ToolSchema};
