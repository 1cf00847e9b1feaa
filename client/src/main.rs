//! Paroli TTS Client
//!
//! Streams synthesized speech from a Paroli server and plays it as it arrives.
//!
//! Usage:
//!   # Interactive mode (type text, press Enter to synthesize and play)
//!   cargo run --release -p paroli-client
//!
//!   # Single text mode
//!   cargo run --release -p paroli-client -- --text "Hello world"
//!
//!   # Record to a WAV file instead of playing
//!   cargo run --release -p paroli-client -- --text "Hello world" --output hello.wav

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use paroli_protocol::{RequestBuilder, SpeakerDirectory};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use paroli_client::audio::{SinkFactory, SpeakerSinkFactory, WavSinkFactory};
use paroli_client::config::{self, ClientConfig};
use paroli_client::directory::{VoiceDirectory, VoiceSelection};
use paroli_client::session::TracingReporter;
use paroli_client::{ClientHandle, StreamingClient};

/// How long single text mode waits for the first audio
const FIRST_AUDIO_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(author, version, about = "Paroli streaming TTS client")]
struct Args {
    /// Server base URL, e.g. http://127.0.0.1:8848
    #[arg(short, long)]
    server: Option<String>,

    /// Text to synthesize (if not provided, runs in interactive mode)
    #[arg(short, long)]
    text: Option<String>,

    /// Record to a WAV file instead of playing
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Speaker name or id
    #[arg(short = 'v', long)]
    speaker: Option<String>,

    /// Bearer token for the stream endpoint
    #[arg(long)]
    token: Option<String>,

    /// Sample rate the server streams at
    #[arg(long)]
    sample_rate: Option<u32>,

    /// Requested audio format; empty to omit the field
    #[arg(long)]
    format: Option<String>,

    #[arg(long)]
    length_scale: Option<f32>,

    #[arg(long)]
    noise_scale: Option<f32>,

    #[arg(long)]
    noise_w: Option<f32>,

    /// Config file (defaults to ./paroli.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seconds without audio after which single text mode exits
    #[arg(long, default_value = "1.5")]
    idle_secs: f64,
}

impl Args {
    fn apply(&self, config: &mut ClientConfig) {
        if let Some(server) = &self.server {
            config.server.url = server.clone();
        }
        if let Some(token) = &self.token {
            config.server.auth_token = Some(token.clone());
        }
        if let Some(rate) = self.sample_rate {
            config.audio.sample_rate = rate;
        }
        if let Some(format) = &self.format {
            config.audio.format = format.clone();
        }
        if let Some(speaker) = &self.speaker {
            config.synthesis.speaker = Some(speaker.clone());
        }
        config.synthesis.length_scale = self.length_scale.or(config.synthesis.length_scale);
        config.synthesis.noise_scale = self.noise_scale.or(config.synthesis.noise_scale);
        config.synthesis.noise_w = self.noise_w.or(config.synthesis.noise_w);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = config::load_config_from_path(args.config.as_deref())?;
    args.apply(&mut config);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("paroli_client={}", config.log.level).parse()?)
                .add_directive("tokio_tungstenite=warn".parse()?),
        )
        .init();

    config::validate_config(&config)?;
    config::print_config(&config);

    let directory = match VoiceDirectory::new(&config.server)?.fetch().await {
        Ok(directory) => directory,
        Err(e) => {
            warn!("{}; assuming a single speaker model", e);
            SpeakerDirectory::default()
        }
    };
    let selection = VoiceSelection::initial(&directory, config.synthesis.speaker.as_deref())?;
    if !selection.is_enabled() {
        info!("Speaker selection disabled for single speaker models");
    }

    match args.output.clone() {
        Some(path) => run(&args, config, directory, selection, WavSinkFactory::new(path)).await,
        None => {
            let sinks = SpeakerSinkFactory::new(config.audio.flush_interval());
            run(&args, config, directory, selection, sinks).await
        }
    }
}

async fn run<F>(
    args: &Args,
    config: ClientConfig,
    directory: SpeakerDirectory,
    selection: VoiceSelection,
    sinks: F,
) -> Result<()>
where
    F: SinkFactory + Send + 'static,
    F::Sink: Send + 'static,
{
    let (client, handle) = StreamingClient::websocket(&config, sinks, TracingReporter);
    let task = tokio::spawn(client.run());

    if let Some(text) = &args.text {
        // Single text mode
        handle.speak(request(&config, &selection, text))?;
        let idle = Duration::from_secs_f64(args.idle_secs);
        let status = handle.wait_until_idle(FIRST_AUDIO_TIMEOUT, idle).await?;
        info!("Received {} bytes of audio", status.audio_bytes);
    } else {
        interactive(&handle, &config, &directory, selection).await?;
    }

    handle.shutdown()?;
    let mut session = task.await?;
    tokio::task::spawn_blocking(move || session.shutdown()).await?;

    Ok(())
}

fn request(config: &ClientConfig, selection: &VoiceSelection, text: &str) -> RequestBuilder {
    // Format was validated with the rest of the config
    let encoding = config.audio.encoding().ok().flatten();
    let builder = RequestBuilder::new(text)
        .with_voice(selection.voice())
        .with_encoding(encoding);
    config.synthesis.apply(builder)
}

async fn interactive(
    handle: &ClientHandle,
    config: &ClientConfig,
    directory: &SpeakerDirectory,
    mut selection: VoiceSelection,
) -> Result<()> {
    println!("Paroli TTS Client - Interactive Mode");
    println!("====================================");
    println!("Type text and press Enter to synthesize and play.");
    println!("Commands:");
    println!("  :q or :quit    - Exit");
    println!("  :s <speaker>   - Change speaker (name or id)");
    println!("  :speakers      - List speakers");
    println!("  :close         - Close the connection");
    println!();

    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line == ":q" || line == ":quit" {
            println!("Goodbye!");
            break;
        }

        if line == ":speakers" {
            if directory.is_single_voice() {
                println!("Single speaker model");
            }
            for (name, id) in directory.by_id() {
                println!("  {:>4}  {}", id, name);
            }
            continue;
        }

        if let Some(speaker) = line.strip_prefix(":s ") {
            match selection.select(directory, speaker) {
                Ok(next) => {
                    selection = next;
                    println!("Speaker changed to: {}", selection.voice());
                }
                Err(e) => println!("{}", e),
            }
            continue;
        }

        if line == ":close" {
            handle.close()?;
            continue;
        }

        if let Err(e) = handle.speak(request(config, &selection, line)) {
            error!("Error: {}", e);
        }
    }

    Ok(())
}
