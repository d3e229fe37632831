use anyhow::Context;
use serde_json::json;
use tracing::Level;
use tracing_subscriber::fmt::time::ChronoLocal;

use voicelink::{EngineConfig, InboundEvent, ToolSchema, VoiceEngine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv_override().ok();

    tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    let config = EngineConfig::builder().with_voice("alto").build();
    let mut engine = VoiceEngine::new(config);

    engine.register_tool(
        ToolSchema::new(
            "set_theme".to_string(),
            "Switch the dashboard color theme".to_string(),
            json!({
                "type": "object",
                "properties": {
                    "theme": { "type": "string", "enum": ["light", "dark"] }
                },
                "required": ["theme"]
            }),
        ),
        |args| async move {
            println!("agent asked to set theme: {args}");
            Ok(json!({ "applied": true }))
        },
    );

    let mut events = engine.subscribe();
    let transcript_printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                InboundEvent::PartialTranscript { speaker, text } => {
                    println!("{speaker:?} (partial): {text}");
                }
                InboundEvent::FinalTranscript { speaker, text } => {
                    println!("{speaker:?}: {text}");
                }
                InboundEvent::Closed { reason } => {
                    println!("session closed: {reason:?}");
                    break;
                }
                _ => {}
            }
        }
    });

    engine.connect().await.context("failed to connect")?;
    println!("session active, speak into the microphone (ctrl-c to quit)");

    tokio::select! {
        _ = transcript_printer => {},
        _ = tokio::signal::ctrl_c() => {
            println!("Received Ctrl-C, shutting down...");
        }
    }
    engine.disconnect();
    println!("Shutting down...");
    Ok(())
}
