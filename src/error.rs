use thiserror::Error;

/// Setup failures, reported once through the `connect` result and never
/// retried internally.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("microphone unavailable: {0}")]
    NoMicrophonePermission(String),

    #[error("audio output unavailable: {0}")]
    NoAudioOutput(String),

    #[error("endpoint unreachable: {0}")]
    EndpointUnreachable(String),

    #[error("protocol handshake failed: {0}")]
    ProtocolHandshakeFailed(String),

    #[error("a session is already running")]
    AlreadyActive,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session is not active")]
    NotActive,

    #[error("transport closed")]
    TransportClosed,
}

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("audio device error: {0}")]
    Device(String),

    #[error("audio stream error: {0}")]
    Stream(String),

    #[error("audio configuration error: {0}")]
    Config(String),
}
