use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use waav_session::{
    AssistantConfig, CallMode, SessionController, SessionEvent, SyntheticMediaCapability,
};

/// WaaV Session - Realtime voice/video assistant client
#[derive(Parser, Debug)]
#[command(name = "waav-session")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Place a headless call with synthetic media, chatting over stdin
    Call {
        /// Start a video call (camera toggled with /camera)
        #[arg(long)]
        video: bool,
    },

    /// Validate the configuration and print the effective settings
    Check,
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<AssistantConfig> {
    match path {
        Some(config_path) => {
            println!("Loading configuration from {}", config_path.display());
            AssistantConfig::from_file(&config_path).map_err(|e| anyhow!(e.to_string()))
        }
        None => AssistantConfig::from_env().map_err(|e| anyhow!(e.to_string())),
    }
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::State(state) => println!("* {state}"),
        SessionEvent::Transcript(item) if !item.is_open() => {
            println!("[{}] {:?}: {}", item.timestamp, item.speaker, item.text)
        }
        SessionEvent::Transcript(_) => {}
        SessionEvent::ToolCall(call) => {
            println!("* tool {} ({}) answered", call.name_or_default(), call.call_id)
        }
        SessionEvent::Error { message, fatal } => {
            let kind = if *fatal { "fatal" } else { "error" };
            eprintln!("! {kind}: {message}");
        }
        SessionEvent::Closed => println!("* call ended"),
    }
}

async fn run_call(config: AssistantConfig) -> anyhow::Result<()> {
    let controller = SessionController::from_config(config, Arc::new(SyntheticMediaCapability::default()));
    let mut events = controller.subscribe();

    controller.start().await.map_err(|e| anyhow!(e.user_message()))?;
    println!("Connected. Type to chat; /mute, /camera, /frame, /quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(event) => {
                    print_event(&event);
                    if event == SessionEvent::Closed {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event output lagging"),
                Err(RecvError::Closed) => break,
            },
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let result = match line.trim() {
                    "" => Ok(()),
                    "/quit" => break,
                    "/mute" => {
                        let muted = controller.toggle_mute().await;
                        println!("* microphone {}", if muted { "muted" } else { "live" });
                        Ok(())
                    }
                    "/camera" => controller.toggle_camera().await.map(|on| {
                        println!("* camera {}", if on { "on" } else { "off" });
                    }),
                    "/frame" => controller.send_frame().await,
                    text => controller.send_text(text).await,
                };
                if let Err(e) = result {
                    eprintln!("! {}", e.user_message());
                }
            }
        }
    }

    controller.hang_up().await;
    info!("Call finished");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let mut config = load_config(cli.config)?;

    match cli.command {
        Commands::Check => {
            println!("Credential endpoint: {}", config.credential_url);
            println!("Signaling endpoint:  {}", config.signaling_url);
            println!("Model:               {}", config.model);
            println!("Voice:               {}", config.voice);
            println!("Call mode:           {}", config.call_mode);
            println!("Tools:               {}", config.tools.len());
            Ok(())
        }
        Commands::Call { video } => {
            if video {
                config.call_mode = CallMode::Video;
            }
            run_call(config).await
        }
    }
}
