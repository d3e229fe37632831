use crate::audio::Base64EncodedAudioBytes;

/// Who produced a transcript fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Agent,
}

/// `session.ready` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SessionReadyEvent {
    session_id: String,
}

impl SessionReadyEvent {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

/// `audio.delta` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AudioDeltaEvent {
    /// Synthesized audio, base64 PCM16 at the wire rate
    audio: Base64EncodedAudioBytes,

    /// Sample rate of the payload; absent means the wire rate
    #[serde(skip_serializing_if = "Option::is_none")]
    sample_rate: Option<u32>,
}

impl AudioDeltaEvent {
    pub fn audio(&self) -> &Base64EncodedAudioBytes {
        &self.audio
    }

    pub fn sample_rate(&self) -> Option<u32> {
        self.sample_rate
    }
}

/// `transcript.partial` / `transcript.final` events
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TranscriptEvent {
    speaker: Speaker,
    text: String,
}

impl TranscriptEvent {
    pub fn speaker(&self) -> Speaker {
        self.speaker
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

/// `error` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ErrorEvent {
    /// Details about the error
    message: String,
}

impl ErrorEvent {
    pub fn message(&self) -> &str {
        &self.message
    }
}
