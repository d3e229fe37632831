use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot, Notify};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::Message;

use secrecy::ExposeSecret;
use voicelink_types::audio::WIRE_SAMPLE_RATE;
use voicelink_types::events::client::{InputAudioAppendEvent, SessionStartEvent};
use voicelink_types::{ClientEvent, InboundFrame, OutboundFrame, ServerEvent, Speaker, ToolCallRequest, ToolSchema};
use voicelink_utils as utils;

use crate::config::EngineConfig;
use crate::consts::AUTHORIZATION_HEADER;
use crate::error::{ConnectError, SessionError};

pub type OutboundTx = mpsc::Sender<ClientEvent>;
pub type InboundRx = mpsc::Receiver<InboundEvent>;

/// Engine-facing event union, parsed from the wire at the transport
/// boundary. Delivered strictly in arrival order over a single channel;
/// `Closed` is terminal and emitted exactly once per session.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    AudioChunk(InboundFrame),
    PartialTranscript { speaker: Speaker, text: String },
    FinalTranscript { speaker: Speaker, text: String },
    ToolCall(ToolCallRequest),
    Interrupted,
    Closed { reason: Option<String> },
}

/// Cheap clone handle to a live transport: outbound sends and the
/// single close path.
#[derive(Clone)]
pub struct ProtocolHandle {
    outbound: OutboundTx,
    closing: Arc<AtomicBool>,
    close_notify: Arc<Notify>,
}

impl ProtocolHandle {
    /// Fire-and-forget: a full outbound channel drops the frame rather
    /// than stalling the capture pipeline.
    pub fn send_audio(&self, frame: &OutboundFrame) {
        if self.closing.load(Ordering::SeqCst) {
            return;
        }
        let audio = utils::audio::encode_i16(frame.samples());
        let event = ClientEvent::InputAudioAppend(InputAudioAppendEvent::new(audio));
        if let Err(e) = self.outbound.try_send(event) {
            tracing::warn!("dropping outbound audio frame: {}", e);
        }
    }

    pub async fn send(&self, event: ClientEvent) -> Result<(), SessionError> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(SessionError::TransportClosed);
        }
        self.outbound
            .send(event)
            .await
            .map_err(|_| SessionError::TransportClosed)
    }

    pub(crate) fn outbound(&self) -> OutboundTx {
        self.outbound.clone()
    }

    /// Idempotent local close: stops accepting new sends and asks the send
    /// loop to say goodbye (`session.end` + websocket close frame). The
    /// terminal `Closed` event still arrives through the inbound stream.
    pub fn close(&self) {
        if !self.closing.swap(true, Ordering::SeqCst) {
            self.close_notify.notify_one();
        }
    }
}

pub(crate) struct ProtocolConnection {
    pub handle: ProtocolHandle,
    pub inbound: InboundRx,
}

fn build_request(config: &EngineConfig) -> tokio_tungstenite::tungstenite::Result<Request> {
    let mut request = format!("{}/session", config.endpoint()).into_client_request()?;
    request.headers_mut().insert(
        AUTHORIZATION_HEADER,
        format!("Bearer {}", config.api_token().expose_secret())
            .as_str()
            .parse()?,
    );
    Ok(request)
}

/// Opens the duplex session and completes the handshake: `session.start`
/// goes out, `session.ready` must come back before the timeout.
pub(crate) async fn connect(
    config: &EngineConfig,
    tools: Vec<ToolSchema>,
) -> Result<ProtocolConnection, ConnectError> {
    let request =
        build_request(config).map_err(|e| ConnectError::EndpointUnreachable(e.to_string()))?;
    let (ws_stream, _) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| ConnectError::EndpointUnreachable(e.to_string()))?;

    let (mut write, mut read) = ws_stream.split();

    let (c_tx, mut c_rx) = mpsc::channel::<ClientEvent>(config.channel_capacity());
    let (i_tx, i_rx) = mpsc::channel::<InboundEvent>(config.channel_capacity());
    let (ready_tx, ready_rx) = oneshot::channel::<Result<(), String>>();

    let closing = Arc::new(AtomicBool::new(false));
    let close_notify = Arc::new(Notify::new());

    let send_notify = close_notify.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                maybe_event = c_rx.recv() => {
                    let event = match maybe_event {
                        Some(event) => event,
                        None => break,
                    };
                    match serde_json::to_string(&event) {
                        Ok(text) => {
                            if let Err(e) = write.send(Message::Text(text)).await {
                                tracing::error!("failed to send message: {}", e);
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::error!("failed to serialize event: {}", e);
                        }
                    }
                }
                _ = send_notify.notified() => {
                    let goodbye = ClientEvent::SessionEnd(
                        voicelink_types::events::client::SessionEndEvent::new(),
                    );
                    if let Ok(text) = serde_json::to_string(&goodbye) {
                        let _ = write.send(Message::Text(text)).await;
                    }
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    tokio::spawn(async move {
        let mut ready_tx = Some(ready_tx);
        let mut close_reason: Option<String> = None;
        while let Some(message) = read.next().await {
            let message = match message {
                Err(e) => {
                    tracing::error!("failed to read message: {}", e);
                    close_reason = Some(format!("transport error: {e}"));
                    break;
                }
                Ok(message) => message,
            };
            match message {
                Message::Text(text) => match serde_json::from_str::<ServerEvent>(&text) {
                    Ok(ServerEvent::SessionReady(data)) => {
                        tracing::debug!("session ready: {}", data.session_id());
                        if let Some(tx) = ready_tx.take() {
                            let _ = tx.send(Ok(()));
                        }
                    }
                    Ok(ServerEvent::Error(data)) => {
                        tracing::error!("server error: {}", data.message());
                        if let Some(tx) = ready_tx.take() {
                            let _ = tx.send(Err(data.message().to_string()));
                        }
                    }
                    Ok(ServerEvent::Close { reason }) => {
                        tracing::info!("connection closed by remote: {:?}", reason);
                        close_reason = reason;
                        break;
                    }
                    Ok(event) => {
                        if let Some(event) = into_inbound(event) {
                            if i_tx.send(event).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        tracing::error!("failed to deserialize event: {}, text=> {:?}", e, text);
                    }
                },
                Message::Binary(bin) => {
                    tracing::warn!("unexpected binary message: {} bytes", bin.len());
                }
                Message::Close(frame) => {
                    tracing::info!("connection closed: {:?}", frame);
                    close_reason = frame.map(|f| f.reason.to_string());
                    break;
                }
                _ => {}
            }
        }
        // Single exit point for every disconnect flavor; the terminal event
        // fires exactly once.
        if let Some(tx) = ready_tx.take() {
            let _ = tx.send(Err(close_reason
                .clone()
                .unwrap_or_else(|| "connection closed during handshake".to_string())));
        }
        let _ = i_tx
            .send(InboundEvent::Closed {
                reason: close_reason,
            })
            .await;
    });

    let handle = ProtocolHandle {
        outbound: c_tx,
        closing,
        close_notify,
    };

    let start = ClientEvent::SessionStart(SessionStartEvent::new(
        config.voice().to_string(),
        tools,
    ));
    if handle.send(start).await.is_err() {
        handle.close();
        return Err(ConnectError::ProtocolHandshakeFailed(
            "transport closed before handshake".to_string(),
        ));
    }

    match tokio::time::timeout(config.handshake_timeout(), ready_rx).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(message))) => {
            handle.close();
            return Err(ConnectError::ProtocolHandshakeFailed(message));
        }
        Ok(Err(_)) => {
            handle.close();
            return Err(ConnectError::ProtocolHandshakeFailed(
                "connection closed during handshake".to_string(),
            ));
        }
        Err(_) => {
            handle.close();
            return Err(ConnectError::ProtocolHandshakeFailed(
                "timed out waiting for session.ready".to_string(),
            ));
        }
    }

    Ok(ProtocolConnection {
        handle,
        inbound: i_rx,
    })
}

/// Wire event -> engine event, at the transport boundary. A malformed audio
/// payload drops the single frame and keeps the session alive.
fn into_inbound(event: ServerEvent) -> Option<InboundEvent> {
    match event {
        ServerEvent::AudioDelta(data) => {
            let samples = utils::audio::decode(data.audio());
            if samples.is_empty() {
                tracing::warn!("dropping malformed audio delta");
                return None;
            }
            let sample_rate = data.sample_rate().unwrap_or(WIRE_SAMPLE_RATE);
            Some(InboundEvent::AudioChunk(InboundFrame::new(
                samples,
                sample_rate,
                1,
            )))
        }
        ServerEvent::TranscriptPartial(data) => Some(InboundEvent::PartialTranscript {
            speaker: data.speaker(),
            text: data.text().to_string(),
        }),
        ServerEvent::TranscriptFinal(data) => Some(InboundEvent::FinalTranscript {
            speaker: data.speaker(),
            text: data.text().to_string(),
        }),
        ServerEvent::ToolCall(request) => Some(InboundEvent::ToolCall(request)),
        ServerEvent::Interrupted => Some(InboundEvent::Interrupted),
        // Handled by the recv loop before mapping.
        ServerEvent::SessionReady(_) | ServerEvent::Error(_) | ServerEvent::Close { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use serde_json::json;
    use std::future::Future;
    use std::time::Duration;
    use tokio::net::TcpStream;
    use tokio_tungstenite::WebSocketStream;

    type ServerSocket = WebSocketStream<TcpStream>;

    async fn spawn_server<F, Fut>(script: F) -> String
    where
        F: FnOnce(ServerSocket) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let socket = tokio_tungstenite::accept_async(stream).await.expect("ws");
            script(socket).await;
        });
        format!("ws://{addr}")
    }

    fn test_config(endpoint: &str) -> EngineConfig {
        EngineConfig::builder()
            .with_endpoint(endpoint)
            .with_api_token("test-token")
            .with_voice("alto")
            .with_handshake_timeout(Duration::from_millis(500))
            .build()
    }

    async fn send_json(socket: &mut ServerSocket, value: serde_json::Value) {
        socket
            .send(Message::Text(value.to_string()))
            .await
            .expect("server send");
    }

    async fn expect_text(socket: &mut ServerSocket) -> serde_json::Value {
        loop {
            match socket.next().await.expect("server recv").expect("message") {
                Message::Text(text) => return serde_json::from_str(&text).expect("json"),
                Message::Close(_) => panic!("unexpected close"),
                _ => {}
            }
        }
    }

    async fn ready_after_session_start(socket: &mut ServerSocket) {
        let start = expect_text(socket).await;
        assert_eq!(start["type"], "session.start");
        send_json(socket, json!({"type": "session.ready", "session_id": "s-1"})).await;
    }

    #[tokio::test]
    async fn handshake_advertises_voice_and_tools() {
        let url = spawn_server(|mut socket| async move {
            let start = expect_text(&mut socket).await;
            assert_eq!(start["type"], "session.start");
            assert_eq!(start["voice"], "alto");
            assert_eq!(start["tools"][0]["name"], "set_theme");
            send_json(&mut socket, json!({"type": "session.ready", "session_id": "s-1"})).await;
            socket.close(None).await.ok();
        })
        .await;

        let tools = vec![ToolSchema::new(
            "set_theme".to_string(),
            "Switch the dashboard theme".to_string(),
            json!({"type": "object"}),
        )];
        let connection = connect(&test_config(&url), tools).await.expect("connect");
        connection.handle.close();
    }

    #[tokio::test]
    async fn inbound_events_arrive_in_order_with_single_closed() {
        let audio = utils::audio::encode_i16(&[100i16; 1600]);
        let url = spawn_server(move |mut socket| async move {
            ready_after_session_start(&mut socket).await;
            send_json(&mut socket, json!({"type": "audio.delta", "audio": audio})).await;
            send_json(
                &mut socket,
                json!({"type": "transcript.partial", "speaker": "agent", "text": "hel"}),
            )
            .await;
            send_json(&mut socket, json!({"type": "interrupted"})).await;
            send_json(
                &mut socket,
                json!({"type": "transcript.final", "speaker": "agent", "text": "hello"}),
            )
            .await;
            send_json(&mut socket, json!({"type": "close", "reason": "done"})).await;
        })
        .await;

        let mut connection = connect(&test_config(&url), vec![]).await.expect("connect");

        match connection.inbound.recv().await {
            Some(InboundEvent::AudioChunk(frame)) => {
                assert_eq!(frame.sample_rate(), WIRE_SAMPLE_RATE);
                assert_eq!(frame.samples().len(), 1600);
            }
            other => panic!("expected audio chunk, got {other:?}"),
        }
        match connection.inbound.recv().await {
            Some(InboundEvent::PartialTranscript { speaker, text }) => {
                assert_eq!(speaker, Speaker::Agent);
                assert_eq!(text, "hel");
            }
            other => panic!("expected partial transcript, got {other:?}"),
        }
        assert!(matches!(
            connection.inbound.recv().await,
            Some(InboundEvent::Interrupted)
        ));
        assert!(matches!(
            connection.inbound.recv().await,
            Some(InboundEvent::FinalTranscript { .. })
        ));
        match connection.inbound.recv().await {
            Some(InboundEvent::Closed { reason }) => assert_eq!(reason.as_deref(), Some("done")),
            other => panic!("expected closed, got {other:?}"),
        }
        assert!(connection.inbound.recv().await.is_none(), "stream must end after Closed");
    }

    #[tokio::test]
    async fn malformed_audio_is_dropped_and_session_continues() {
        let url = spawn_server(|mut socket| async move {
            ready_after_session_start(&mut socket).await;
            send_json(&mut socket, json!({"type": "audio.delta", "audio": "@@not-base64@@"})).await;
            send_json(
                &mut socket,
                json!({"type": "transcript.final", "speaker": "user", "text": "still here"}),
            )
            .await;
            send_json(&mut socket, json!({"type": "close"})).await;
        })
        .await;

        let mut connection = connect(&test_config(&url), vec![]).await.expect("connect");
        assert!(matches!(
            connection.inbound.recv().await,
            Some(InboundEvent::FinalTranscript { .. })
        ));
        assert!(matches!(
            connection.inbound.recv().await,
            Some(InboundEvent::Closed { .. })
        ));
    }

    #[tokio::test]
    async fn outbound_audio_frames_sent_in_order() {
        let url = spawn_server(|mut socket| async move {
            ready_after_session_start(&mut socket).await;
            for expected in 1..=3i16 {
                let append = expect_text(&mut socket).await;
                assert_eq!(append["type"], "input_audio.append");
                let decoded =
                    utils::audio::decode(append["audio"].as_str().expect("audio field"));
                assert_eq!(decoded.len(), 1600);
                let level = (expected as f32 * 1000.0) / i16::MAX as f32;
                assert!((decoded[0] - level).abs() < 1e-3);
            }
            send_json(&mut socket, json!({"type": "close"})).await;
        })
        .await;

        let mut connection = connect(&test_config(&url), vec![]).await.expect("connect");
        for value in 1..=3i16 {
            let frame = OutboundFrame::new(vec![value * 1000; 1600], WIRE_SAMPLE_RATE);
            connection.handle.send_audio(&frame);
        }
        assert!(matches!(
            connection.inbound.recv().await,
            Some(InboundEvent::Closed { .. })
        ));
    }

    #[tokio::test]
    async fn handshake_timeout_fails_connect() {
        let url = spawn_server(|mut socket| async move {
            // Swallow session.start and go silent.
            let _ = expect_text(&mut socket).await;
            tokio::time::sleep(Duration::from_secs(2)).await;
        })
        .await;

        match connect(&test_config(&url), vec![]).await {
            Err(ConnectError::ProtocolHandshakeFailed(msg)) => {
                assert!(msg.contains("timed out"), "{msg}");
            }
            other => panic!("expected handshake failure, got {:?}", other.is_ok()),
        }
    }

    #[tokio::test]
    async fn server_error_during_handshake_fails_connect() {
        let url = spawn_server(|mut socket| async move {
            let _ = expect_text(&mut socket).await;
            send_json(&mut socket, json!({"type": "error", "message": "bad token"})).await;
        })
        .await;

        match connect(&test_config(&url), vec![]).await {
            Err(ConnectError::ProtocolHandshakeFailed(msg)) => assert_eq!(msg, "bad token"),
            other => panic!("expected handshake failure, got {:?}", other.is_ok()),
        }
    }

    #[tokio::test]
    async fn unreachable_endpoint_fails_connect() {
        let config = test_config("ws://127.0.0.1:9");
        assert!(matches!(
            connect(&config, vec![]).await,
            Err(ConnectError::EndpointUnreachable(_))
        ));
    }

    #[tokio::test]
    async fn local_close_emits_single_closed() {
        let url = spawn_server(|mut socket| async move {
            ready_after_session_start(&mut socket).await;
            // Drain until the client closes, echoing the close handshake.
            while let Some(Ok(message)) = socket.next().await {
                if matches!(message, Message::Close(_)) {
                    break;
                }
            }
        })
        .await;

        let mut connection = connect(&test_config(&url), vec![]).await.expect("connect");
        connection.handle.close();
        connection.handle.close();

        assert!(matches!(
            connection.inbound.recv().await,
            Some(InboundEvent::Closed { .. })
        ));
        assert!(connection.inbound.recv().await.is_none());

        // New sends are refused after close.
        let frame = OutboundFrame::new(vec![0; 16], WIRE_SAMPLE_RATE);
        connection.handle.send_audio(&frame);
        assert!(connection
            .handle
            .send(ClientEvent::TextMessage(
                voicelink_types::events::client::TextMessageEvent::new("late".to_string()),
            ))
            .await
            .is_err());
    }
}
