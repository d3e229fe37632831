use std::time::Duration;

pub const API_TOKEN_ENV: &str = "VOICELINK_API_TOKEN";

pub const DEFAULT_ENDPOINT: &str = "wss://api.voicelink.dev/v1";
pub const DEFAULT_VOICE: &str = "alto";

pub const AUTHORIZATION_HEADER: &str = "Authorization";

/// Samples per capture chunk handed to the resampler.
pub const INPUT_CHUNK_SIZE: usize = 1024;
/// Frames per output device callback.
pub const OUTPUT_CHUNK_SIZE: usize = 1024;

pub const EVENT_CHANNEL_CAPACITY: usize = 1024;
pub const AUDIO_CHANNEL_CAPACITY: usize = 64;

pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_TOOL_WARN_TIMEOUT: Duration = Duration::from_secs(10);
