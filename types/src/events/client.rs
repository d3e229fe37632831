use crate::audio::Base64EncodedAudioBytes;
use crate::tools::ToolSchema;

/// `session.start` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SessionStartEvent {
    /// The voice profile the remote uses to select a synthesis voice
    voice: String,

    /// Tools the application exposes for this session
    tools: Vec<ToolSchema>,
}

impl SessionStartEvent {
    pub fn new(voice: String, tools: Vec<ToolSchema>) -> Self {
        Self { voice, tools }
    }

    pub fn voice(&self) -> &str {
        &self.voice
    }

    pub fn tools(&self) -> &[ToolSchema] {
        &self.tools
    }
}

/// `input_audio.append` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct InputAudioAppendEvent {
    /// The captured audio block, base64 PCM16 at the wire rate
    audio: Base64EncodedAudioBytes,
}

impl InputAudioAppendEvent {
    pub fn new(audio: Base64EncodedAudioBytes) -> Self {
        Self { audio }
    }

    pub fn audio(&self) -> &Base64EncodedAudioBytes {
        &self.audio
    }
}

/// `text.message` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TextMessageEvent {
    text: String,
}

impl TextMessageEvent {
    pub fn new(text: String) -> Self {
        Self { text }
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

/// `tool.result` event. Exactly one of `output`/`error` is set.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolResultEvent {
    call_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ToolResultEvent {
    pub fn success(call_id: String, output: serde_json::Value) -> Self {
        Self {
            call_id,
            output: Some(output),
            error: None,
        }
    }

    pub fn failure(call_id: String, error: String) -> Self {
        Self {
            call_id,
            output: None,
            error: Some(error),
        }
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn output(&self) -> Option<&serde_json::Value> {
        self.output.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

/// `session.end` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SessionEndEvent {}

impl SessionEndEvent {
    pub fn new() -> Self {
        Self {}
    }
}

impl Default for SessionEndEvent {
    fn default() -> Self {
        Self::new()
    }
}
