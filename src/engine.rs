use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use tokio::sync::{broadcast, mpsc};

use voicelink_types::events::client::TextMessageEvent;
use voicelink_types::{ClientEvent, InboundFrame, ToolSchema};

use crate::capture::{self, CaptureHandle};
use crate::config::EngineConfig;
use crate::consts::AUDIO_CHANNEL_CAPACITY;
use crate::error::{ConnectError, SessionError};
use crate::levels::LevelMeter;
use crate::playback::{EnqueueOutcome, PlaybackScheduler};
use crate::protocol::{self, InboundEvent, ProtocolHandle};
use crate::tools::{ToolDispatcher, ToolHandler, ToolRegistry, ToolResult};

/// Externally observable lifecycle of a controller. The interrupted
/// condition is handled within one event-processing step and is never a
/// stable state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Active,
    Closing,
    Closed,
}

/// Everything a live session owns. Teardown runs once, in a fixed order:
/// stop capture, close transport, flush and release playback.
struct SessionRuntime {
    capture: CaptureHandle,
    playback: Arc<PlaybackScheduler>,
    protocol: ProtocolHandle,
    dispatcher: ToolDispatcher,
    input_level: Arc<LevelMeter>,
    state: Arc<Mutex<SessionState>>,
    closed: AtomicBool,
}

impl SessionRuntime {
    fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.capture.stop();
        self.protocol.close();
        self.playback.flush_all();
        self.playback.stop();
        self.input_level.reset();
        for call_id in self.dispatcher.drain_pending() {
            tracing::warn!("tool call {:?} unresolved at session close", call_id);
        }
    }
}

/// The session controller: owns the lifecycle state machine, wires capture
/// into the transport, fans inbound events out to playback, tools, and
/// subscribers, and exposes the narrow API the UI shell drives.
pub struct VoiceEngine {
    config: EngineConfig,
    state: Arc<Mutex<SessionState>>,
    registry: ToolRegistry,
    events_tx: broadcast::Sender<InboundEvent>,
    input_level: Arc<LevelMeter>,
    runtime: Option<Arc<SessionRuntime>>,
    started_at: Option<SystemTime>,
}

impl VoiceEngine {
    pub fn new(config: EngineConfig) -> Self {
        let (events_tx, _) = broadcast::channel(config.channel_capacity());
        Self {
            config,
            state: Arc::new(Mutex::new(SessionState::Idle)),
            registry: ToolRegistry::new(),
            events_tx,
            input_level: Arc::new(LevelMeter::new()),
            runtime: None,
            started_at: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
            .lock()
            .map(|state| *state)
            .unwrap_or(SessionState::Closed)
    }

    pub fn started_at(&self) -> Option<SystemTime> {
        self.started_at
    }

    /// Registers a tool handler. Schemas registered before `connect` are
    /// advertised to the remote in `session.start`.
    pub fn register_tool<F, Fut>(&self, schema: ToolSchema, handler: F)
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ToolResult> + Send + 'static,
    {
        let handler: ToolHandler = Arc::new(move |args| Box::pin(handler(args)));
        self.registry.register(schema, handler);
    }

    /// Same ordered inbound stream for every subscriber. A subscriber that
    /// falls behind lags; the engine never waits for it.
    pub fn subscribe(&self) -> broadcast::Receiver<InboundEvent> {
        self.events_tx.subscribe()
    }

    pub fn input_level(&self) -> f32 {
        self.input_level.get()
    }

    pub fn output_level(&self) -> f32 {
        self.runtime
            .as_ref()
            .map(|runtime| runtime.playback.output_level())
            .unwrap_or(0.0)
    }

    /// Opens one session: transport handshake, then the audio devices, then
    /// the pump tasks. Only one live session per controller; `connect` while
    /// one is running is rejected.
    pub async fn connect(&mut self) -> Result<(), ConnectError> {
        {
            let Ok(mut state) = self.state.lock() else {
                return Err(ConnectError::AlreadyActive);
            };
            match *state {
                SessionState::Idle | SessionState::Closed => *state = SessionState::Connecting,
                _ => return Err(ConnectError::AlreadyActive),
            }
        }

        match self.establish().await {
            Ok(runtime) => {
                if let Ok(mut state) = self.state.lock() {
                    *state = SessionState::Active;
                }
                self.runtime = Some(runtime);
                self.started_at = Some(SystemTime::now());
                Ok(())
            }
            Err(e) => {
                if let Ok(mut state) = self.state.lock() {
                    *state = SessionState::Closed;
                }
                Err(e)
            }
        }
    }

    async fn establish(&self) -> Result<Arc<SessionRuntime>, ConnectError> {
        let tools = self.registry.schemas();
        let connection = protocol::connect(&self.config, tools).await?;
        let protocol::ProtocolConnection {
            handle: protocol_handle,
            inbound,
        } = connection;

        let (capture_handle, capture_frames) =
            match capture::start(&self.config, self.input_level.clone()).await {
                Ok(started) => started,
                Err(e) => {
                    protocol_handle.close();
                    return Err(ConnectError::NoMicrophonePermission(e.to_string()));
                }
            };

        let playback = match PlaybackScheduler::start(&self.config).await {
            Ok(playback) => Arc::new(playback),
            Err(e) => {
                capture_handle.stop();
                protocol_handle.close();
                return Err(ConnectError::NoAudioOutput(e.to_string()));
            }
        };

        let dispatcher = ToolDispatcher::new(
            self.registry.clone(),
            protocol_handle.outbound(),
            self.config.tool_warn_timeout(),
        );

        let runtime = Arc::new(SessionRuntime {
            capture: capture_handle,
            playback,
            protocol: protocol_handle.clone(),
            dispatcher: dispatcher.clone(),
            input_level: self.input_level.clone(),
            state: self.state.clone(),
            closed: AtomicBool::new(false),
        });

        // Capture -> transport, at the capture device's cadence.
        tokio::spawn(async move {
            let mut capture_frames = capture_frames;
            while let Some(frame) = capture_frames.recv().await {
                protocol_handle.send_audio(&frame);
            }
        });

        // Decoded frames -> scheduler, off the event loop so a slow resample
        // never delays event fan-out. Frames are stamped before the hop;
        // a flush in between invalidates them.
        let (play_tx, mut play_rx) = mpsc::channel::<(InboundFrame, u64)>(AUDIO_CHANNEL_CAPACITY);
        let pump_playback = runtime.playback.clone();
        tokio::spawn(async move {
            while let Some((frame, generation)) = play_rx.recv().await {
                if pump_playback.enqueue(&frame, generation) == EnqueueOutcome::Stale {
                    tracing::debug!("stale audio frame dropped after barge-in");
                }
            }
        });

        // The single consumer of the inbound stream: fan-out strictly in
        // arrival order.
        let loop_runtime = runtime.clone();
        let events_tx = self.events_tx.clone();
        tokio::spawn(async move {
            let mut inbound = inbound;
            while let Some(event) = inbound.recv().await {
                match &event {
                    InboundEvent::AudioChunk(frame) => {
                        let generation = loop_runtime.playback.generation();
                        if let Err(e) = play_tx.try_send((frame.clone(), generation)) {
                            tracing::warn!("playback queue full, dropping frame: {}", e);
                        }
                    }
                    InboundEvent::Interrupted => {
                        loop_runtime.playback.flush_all();
                    }
                    InboundEvent::ToolCall(request) => {
                        loop_runtime.dispatcher.dispatch(request.clone());
                    }
                    InboundEvent::Closed { reason } => {
                        tracing::info!("session closed: {:?}", reason);
                    }
                    InboundEvent::PartialTranscript { .. }
                    | InboundEvent::FinalTranscript { .. } => {}
                }

                let terminal = matches!(event, InboundEvent::Closed { .. });
                // A send error only means nobody is subscribed right now.
                let _ = events_tx.send(event);
                if terminal {
                    loop_runtime.shutdown();
                    if let Ok(mut state) = loop_runtime.state.lock() {
                        *state = SessionState::Closed;
                    }
                    break;
                }
            }
        });

        Ok(runtime)
    }

    /// Sends a text message into the conversation. Active sessions only.
    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), SessionError> {
        if self.state() != SessionState::Active {
            return Err(SessionError::NotActive);
        }
        let runtime = self.runtime.as_ref().ok_or(SessionError::NotActive)?;
        runtime
            .protocol
            .send(ClientEvent::TextMessage(TextMessageEvent::new(text.into())))
            .await
    }

    /// Idempotent; safe from every state, including an already-closed
    /// session. Always terminates in `Closed` with all devices released.
    pub fn disconnect(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            if let Ok(mut state) = self.state.lock() {
                *state = SessionState::Closing;
            }
            runtime.shutdown();
        }
        if let Ok(mut state) = self.state.lock() {
            *state = SessionState::Closed;
        }
    }
}

impl Drop for VoiceEngine {
    fn drop(&mut self) {
        self.disconnect();
    }
}
