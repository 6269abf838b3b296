use std::io::Write;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use meetscribe::{
    AudioSource, CaptureEngine, Config, EngineEvent, EngineServices, EnvCredentials, LogSink,
    SyntheticTapFactory, SystemTapFactory, TapFactory, WsConnector,
};

#[derive(Parser)]
#[command(name = "meetscribe", about = "Meeting capture and live transcription engine")]
struct Cli {
    /// Path to a config file; defaults apply when absent
    #[arg(long, default_value = "config/meetscribe")]
    config: String,

    /// Capture only the microphone
    #[arg(long)]
    mic_only: bool,

    /// Use synthetic taps instead of the platform tap capability
    #[arg(long)]
    synthetic: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    let taps: Arc<dyn TapFactory> = if cli.synthetic {
        Arc::new(SyntheticTapFactory::new())
    } else {
        Arc::new(SystemTapFactory)
    };

    let services = EngineServices {
        taps,
        connector: Arc::new(WsConnector),
        credentials: Arc::new(EnvCredentials::new(cfg.transcription.api_key_env.clone())),
        sink: Arc::new(LogSink),
    };
    let engine = CaptureEngine::new(&cfg, services);

    let sources = if cli.mic_only {
        vec![AudioSource::Microphone]
    } else {
        vec![AudioSource::Microphone, AudioSource::SystemOutput]
    };

    let mut events = engine.subscribe();
    engine.start(&sources).await?;
    info!("recording; press Ctrl-C to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(EngineEvent::ChunkUpdated(chunk)) => {
                    if chunk.is_final {
                        println!("\n[{}] {}", chunk.source.label(), chunk.text);
                    } else {
                        print!("\r{}", chunk.text);
                        std::io::stdout().flush().ok();
                    }
                }
                Ok(EngineEvent::Error { error, fatal }) => {
                    error!("{}", error);
                    if fatal {
                        break;
                    }
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    let transcript = engine.transcript().await;
    engine.stop().await;

    info!(
        "captured {} chunks ({} final)",
        transcript.len(),
        transcript.iter().filter(|c| c.is_final).count()
    );

    Ok(())
}
