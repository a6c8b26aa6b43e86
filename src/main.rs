use std::path::PathBuf;

use anyhow::anyhow;
use bytes::Bytes;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use devvoice_engine::{
    BaseRealtime, EngineConfig, FunctionCallBridge, OpenAIRealtime, RealtimeEvent,
    core::realtime::{LifecycleEvent, NoToolExecutor, TranscriptStage},
};

/// Realtime session engine for a voice-controlled developer assistant
#[derive(Parser, Debug)]
#[command(name = "devvoice-engine")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Stream a raw audio file as one user turn and print the reply
    Talk {
        /// Raw audio in the configured input format (PCM16 24kHz mono by default)
        #[arg(short = 'a', long = "audio", value_name = "FILE")]
        audio: PathBuf,

        /// Bytes per append
        #[arg(long = "chunk-bytes", default_value_t = 4800)]
        chunk_bytes: usize,

        /// Write received audio here
        #[arg(short = 'o', long = "output", value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Validate configuration and print provider info
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Must be installed before the first TLS handshake
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let config = if let Some(config_path) = cli.config {
        info!("Loading configuration from {}", config_path.display());
        EngineConfig::from_file(&config_path).map_err(|e| anyhow!(e.to_string()))?
    } else {
        EngineConfig::from_env().map_err(|e| anyhow!(e.to_string()))?
    };

    match cli.command {
        Commands::Check => check(&config),
        Commands::Talk {
            audio,
            chunk_bytes,
            output,
        } => talk(&config, &audio, chunk_bytes, output).await,
    }
}

fn check(config: &EngineConfig) -> anyhow::Result<()> {
    let session = OpenAIRealtime::new(config.realtime_config())?;
    println!("Configuration OK");
    println!("Endpoint: {}", session.endpoint());
    println!("{}", serde_json::to_string_pretty(&session.get_provider_info())?);
    Ok(())
}

async fn talk(
    config: &EngineConfig,
    audio_path: &PathBuf,
    chunk_bytes: usize,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    if chunk_bytes == 0 {
        anyhow::bail!("--chunk-bytes must be greater than zero");
    }

    let audio = tokio::fs::read(audio_path)
        .await
        .map_err(|e| anyhow!("Failed to read {}: {}", audio_path.display(), e))?;
    let audio = Bytes::from(audio);

    let mut realtime_config = config.realtime_config();
    // The loop below ends on `response.done`
    realtime_config.forward_lifecycle = true;

    let session = OpenAIRealtime::new(realtime_config)?;
    session.start().await?;
    let mut events = session
        .take_events()
        .ok_or_else(|| anyhow!("event stream already taken"))?;

    let mut offset = 0;
    while offset < audio.len() {
        let end = (offset + chunk_bytes).min(audio.len());
        session.send_audio(audio.slice(offset..end)).await?;
        offset = end;
    }
    let buffered = session.buffered_audio();
    info!(
        "Sent {} bytes in {} chunks ({} ms)",
        buffered.bytes,
        buffered.chunks,
        session.audio_format().duration_ms(buffered.bytes)
    );
    session.commit_audio().await?;

    let bridge = FunctionCallBridge::new(&session);
    let mut received_audio: Vec<u8> = Vec::new();
    let mut open_responses: usize = 1;

    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        };

        let Some(event) = event else {
            info!("Event stream closed");
            break;
        };

        match event {
            RealtimeEvent::AudioDelta(chunk) => received_audio.extend_from_slice(&chunk),
            RealtimeEvent::TextDelta(text) => print!("{text}"),
            RealtimeEvent::Transcription {
                text, role, stage, ..
            } => {
                if stage == TranscriptStage::Final {
                    println!("[{role}] {text}");
                }
            }
            RealtimeEvent::FunctionCall(request) => {
                println!(
                    "[tool] {}({})",
                    request.name,
                    serde_json::Value::Object(request.arguments.clone())
                );
                bridge.handle(&request, &NoToolExecutor).await?;
                open_responses += 1;
            }
            RealtimeEvent::Error { message } => warn!("Service error: {}", message),
            RealtimeEvent::Lifecycle(LifecycleEvent::ResponseDone { response_id, status }) => {
                info!(
                    "Response {} done ({})",
                    response_id,
                    status.as_deref().unwrap_or("unknown")
                );
                open_responses = open_responses.saturating_sub(1);
                if open_responses == 0 {
                    break;
                }
            }
            RealtimeEvent::Lifecycle(marker) => tracing::debug!("{:?}", marker),
            RealtimeEvent::Unknown(event_type) => tracing::debug!("Ignored {}", event_type),
        }
    }

    if events.dropped() > 0 {
        warn!("{} delta events dropped by backpressure", events.dropped());
    }

    // Nothing reads past this point
    events.close();
    session.close().await?;

    info!("Received {} bytes of audio", received_audio.len());
    if let Some(path) = output {
        tokio::fs::write(&path, &received_audio)
            .await
            .map_err(|e| anyhow!("Failed to write {}: {}", path.display(), e))?;
        println!("Audio written to {}", path.display());
    }

    Ok(())
}
