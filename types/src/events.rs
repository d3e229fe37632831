pub mod client;
mod server;

use crate::tools::ToolCallRequest;
use client::*;
pub use server::Speaker;
use server::*;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.start")]
    SessionStart(SessionStartEvent),
    #[serde(rename = "input_audio.append")]
    InputAudioAppend(InputAudioAppendEvent),
    #[serde(rename = "text.message")]
    TextMessage(TextMessageEvent),
    #[serde(rename = "tool.result")]
    ToolResult(ToolResultEvent),
    #[serde(rename = "session.end")]
    SessionEnd(SessionEndEvent),
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "session.ready")]
    SessionReady(SessionReadyEvent),
    #[serde(rename = "audio.delta")]
    AudioDelta(AudioDeltaEvent),
    #[serde(rename = "transcript.partial")]
    TranscriptPartial(TranscriptEvent),
    #[serde(rename = "transcript.final")]
    TranscriptFinal(TranscriptEvent),
    #[serde(rename = "tool.call")]
    ToolCall(ToolCallRequest),
    #[serde(rename = "interrupted")]
    Interrupted,
    #[serde(rename = "error")]
    Error(ErrorEvent),
    #[serde(rename = "close")]
    Close { reason: Option<String> },
}
