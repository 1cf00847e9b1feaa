//! Paroli stub server
//!
//! Speaks the Paroli streaming protocol without a voice model: every request
//! is answered with a sine tone whose length follows the text.
//!
//! Endpoints:
//! - /api/v1/speakers   GET   speaker name to id map
//! - /api/v1/stream     WS    synthesis stream, behind an optional bearer token

use std::f32::consts::TAU;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::{Sink, SinkExt, StreamExt};
use paroli_protocol::{
    AudioEncoding, SpeakerDirectory, StatusFrame, SynthesisRequest, SAMPLE_RATE, SPEAKERS_PATH,
    STREAM_PATH,
};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

const TONE_HZ: f32 = 440.0;
const TONE_AMPLITUDE: f32 = 0.3 * i16::MAX as f32;

#[derive(Debug, Clone)]
pub struct StubConfig {
    pub sample_rate: u32,
    /// Upper bound on one binary audio frame
    pub chunk_bytes: usize,
    /// Samples rendered per input character
    pub samples_per_char: usize,
    /// Advertised speaker names, id = position. Empty for a single voice.
    pub speakers: Vec<String>,
    /// Send an empty binary frame between audio chunks
    pub keepalive: bool,
    /// Send a text frame that is not a status object before each reply
    pub garbage_text: bool,
    /// Drop the connection without a close frame once this many chunks went
    /// out on it
    pub drop_after_chunks: Option<usize>,
    pub auth_token: Option<String>,
    /// Served verbatim instead of the speaker map
    pub speakers_body: Option<String>,
    pub chunk_delay: Duration,
}

impl Default for StubConfig {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            chunk_bytes: 4096,
            // 50 ms per character
            samples_per_char: SAMPLE_RATE as usize / 20,
            speakers: Vec::new(),
            keepalive: false,
            garbage_text: false,
            drop_after_chunks: None,
            auth_token: None,
            speakers_body: None,
            chunk_delay: Duration::ZERO,
        }
    }
}

impl StubConfig {
    pub fn directory(&self) -> SpeakerDirectory {
        self.speakers.iter().cloned().zip(0i64..).collect()
    }

    fn num_speakers(&self) -> i64 {
        self.speakers.len().max(1) as i64
    }

    /// Reject requests the real server would reject
    fn check(&self, request: &SynthesisRequest) -> Result<(), String> {
        if request.audio_format() == Some(AudioEncoding::Opus) {
            return Err("Opus encoding is not available on this server".to_string());
        }
        if request.speaker_id() >= self.num_speakers() {
            return Err(format!(
                "Speaker ID is out of range: {} (have {})",
                request.speaker_id(),
                self.num_speakers()
            ));
        }
        Ok(())
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        let Some(token) = &self.auth_token else {
            return true;
        };
        let provided = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
        provided == Some(format!("Bearer {}", token).as_str())
    }
}

#[derive(Debug, Default)]
struct Recorded {
    connections: usize,
    requests: Vec<SynthesisRequest>,
}

#[derive(Clone)]
struct StubState {
    config: Arc<StubConfig>,
    recorded: Arc<Mutex<Recorded>>,
}

/// A stub bound to an ephemeral local port
pub struct StubServer {
    addr: SocketAddr,
    recorded: Arc<Mutex<Recorded>>,
}

impl StubServer {
    pub async fn start(config: StubConfig) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = StubState {
            config: Arc::new(config),
            recorded: Arc::new(Mutex::new(Recorded::default())),
        };
        let recorded = Arc::clone(&state.recorded);

        tokio::spawn(async move {
            if let Err(e) = run(listener, state).await {
                error!("Stub server stopped: {}", e);
            }
        });

        Ok(Self { addr, recorded })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Base URL for the client's `server.url` setting
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Websocket connections accepted so far
    pub async fn connections(&self) -> usize {
        self.recorded.lock().await.connections
    }

    /// Every well-formed request received, in order
    pub async fn requests(&self) -> Vec<SynthesisRequest> {
        self.recorded.lock().await.requests.clone()
    }
}

/// Serve until the listener fails
pub async fn serve(listener: TcpListener, config: Arc<StubConfig>) -> std::io::Result<()> {
    let state = StubState {
        config,
        recorded: Arc::new(Mutex::new(Recorded::default())),
    };
    run(listener, state).await
}

async fn run(listener: TcpListener, state: StubState) -> std::io::Result<()> {
    let app = create_routes().with_state(state);
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await
}

fn create_routes() -> Router<StubState> {
    Router::new()
        .route(&format!("/{}", SPEAKERS_PATH), get(list_speakers))
        .route(&format!("/{}", STREAM_PATH), get(stream_handler))
}

async fn list_speakers(State(state): State<StubState>) -> Response {
    match &state.config.speakers_body {
        Some(body) => body.clone().into_response(),
        None => Json(state.config.directory()).into_response(),
    }
}

async fn stream_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    ConnectInfo(peer_addr): ConnectInfo<SocketAddr>,
    State(state): State<StubState>,
) -> Response {
    if !state.config.authorized(&headers) {
        warn!("Rejected {}: missing or invalid token", peer_addr);
        return (StatusCode::UNAUTHORIZED, "missing or invalid token").into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, peer_addr, state))
}

async fn handle_socket(socket: WebSocket, peer_addr: SocketAddr, state: StubState) {
    state.recorded.lock().await.connections += 1;
    info!("New connection from: {}", peer_addr);

    if let Err(e) = serve_socket(socket, peer_addr, &state).await {
        error!("Connection error from {}: {}", peer_addr, e);
    }
    info!("Connection closed: {}", peer_addr);
}

async fn serve_socket(socket: WebSocket, peer_addr: SocketAddr, state: &StubState) -> Result<()> {
    let config = &state.config;
    let (mut sender, mut receiver) = socket.split();

    let mut chunks_sent = 0;
    while let Some(msg) = receiver.next().await {
        let msg = match msg {
            Ok(m) => m,
            Err(e) => {
                warn!("WebSocket error from {}: {}", peer_addr, e);
                break;
            }
        };

        match msg {
            Message::Text(text) => {
                let request = match SynthesisRequest::from_frame(&text) {
                    Ok(r) => r,
                    Err(e) => {
                        send_status(&mut sender, &StatusFrame::error(e.to_string())).await?;
                        continue;
                    }
                };
                state.recorded.lock().await.requests.push(request.clone());

                if config.garbage_text {
                    sender.send(Message::Text("<html>busy</html>".to_string())).await?;
                }
                if let Err(message) = config.check(&request) {
                    send_status(&mut sender, &StatusFrame::error(message)).await?;
                    continue;
                }

                info!(
                    "Synthesizing {} chars for {} (speaker: {})",
                    request.text().chars().count(),
                    peer_addr,
                    request.speaker_id()
                );
                if !stream_tone(&mut sender, &request, config, &mut chunks_sent).await? {
                    // Dropping the socket ends the TCP connection without a close frame
                    warn!("Dropping {} mid-stream", peer_addr);
                    return Ok(());
                }
            }
            Message::Binary(_) => {
                warn!("Received unexpected binary message from {}", peer_addr);
            }
            // Pongs are sent by axum
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Close(_) => {
                info!("Client {} disconnected", peer_addr);
                break;
            }
        }
    }

    Ok(())
}

/// Returns false when the connection should be dropped
async fn stream_tone<S>(
    sender: &mut S,
    request: &SynthesisRequest,
    config: &StubConfig,
    chunks_sent: &mut usize,
) -> Result<bool>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    let samples = request.text().chars().count() * config.samples_per_char;
    let pcm = render_tone(config.sample_rate, samples);
    send_status(sender, &StatusFrame::ok()).await?;

    // Keep chunks sample aligned
    let chunk_bytes = (config.chunk_bytes.max(2) / 2) * 2;
    for (i, chunk) in pcm.chunks(chunk_bytes).enumerate() {
        if config.drop_after_chunks == Some(*chunks_sent) {
            return Ok(false);
        }
        if i > 0 && config.keepalive {
            sender.send(Message::Binary(Vec::new())).await?;
        }
        sender.send(Message::Binary(chunk.to_vec())).await?;
        *chunks_sent += 1;

        if !config.chunk_delay.is_zero() {
            tokio::time::sleep(config.chunk_delay).await;
        }
    }

    debug!("Streamed {} bytes", pcm.len());
    Ok(true)
}

async fn send_status<S>(sender: &mut S, status: &StatusFrame) -> Result<()>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    sender.send(Message::Text(serde_json::to_string(status)?)).await?;
    Ok(())
}

/// Mono 16-bit little-endian sine
pub fn render_tone(sample_rate: u32, samples: usize) -> Vec<u8> {
    let mut pcm = Vec::with_capacity(samples * 2);
    for n in 0..samples {
        let t = n as f32 / sample_rate as f32;
        let value = (TAU * TONE_HZ * t).sin() * TONE_AMPLITUDE;
        pcm.extend_from_slice(&(value as i16).to_le_bytes());
    }
    pcm
}

#[cfg(test)]
mod tests {
    use paroli_protocol::RequestBuilder;

    use super::*;

    #[test]
    fn test_render_tone_length() {
        let pcm = render_tone(24000, 3072);
        assert_eq!(pcm.len(), 6144);
        // Starts at zero phase
        assert_eq!(&pcm[..2], &[0, 0]);
        assert!(pcm.chunks(2).any(|s| i16::from_le_bytes([s[0], s[1]]) > 1000));
    }

    #[test]
    fn test_directory_ids_follow_position() {
        let config = StubConfig {
            speakers: vec!["alice".to_string(), "bob".to_string()],
            ..StubConfig::default()
        };
        let directory = config.directory();
        assert_eq!(directory.resolve("bob"), Some(1));
        assert_eq!(directory.default_speaker(), Some(("alice", 0)));
        assert!(StubConfig::default().directory().is_single_voice());
    }

    #[test]
    fn test_check_rejects_out_of_range_speaker() {
        let config = StubConfig::default();
        let ok = RequestBuilder::new("hi").build().unwrap();
        assert!(config.check(&ok).is_ok());

        let request = RequestBuilder::new("hi").with_speaker_id(3).build().unwrap();
        let err = config.check(&request).unwrap_err();
        assert!(err.starts_with("Speaker ID is out of range"));
    }

    #[test]
    fn test_check_rejects_opus() {
        let request = RequestBuilder::new("hi")
            .with_encoding(Some(AudioEncoding::Opus))
            .build()
            .unwrap();
        assert!(StubConfig::default().check(&request).is_err());
    }

    #[test]
    fn test_token_check() {
        let config = StubConfig {
            auth_token: Some("secret".to_string()),
            ..StubConfig::default()
        };
        let mut headers = HeaderMap::new();
        assert!(!config.authorized(&headers));
        headers.insert(AUTHORIZATION, "Bearer guess".parse().unwrap());
        assert!(!config.authorized(&headers));
        headers.insert(AUTHORIZATION, "Bearer secret".parse().unwrap());
        assert!(config.authorized(&headers));
        assert!(StubConfig::default().authorized(&HeaderMap::new()));
    }

    #[tokio::test]
    async fn test_speakers_over_http() {
        let server = StubServer::start(StubConfig {
            speakers: vec!["alice".to_string()],
            ..StubConfig::default()
        })
        .await
        .unwrap();

        let url = format!("{}/{}", server.base_url(), SPEAKERS_PATH);
        let response = reqwest::get(&url).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(response.text().await.unwrap(), r#"{"alice":0}"#);
        assert_eq!(server.connections().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_path_not_found() {
        let server = StubServer::start(StubConfig::default()).await.unwrap();

        let response = reqwest::get(format!("{}/api/v2/speakers", server.base_url()))
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_missing_token_refused() {
        let server = StubServer::start(StubConfig {
            auth_token: Some("secret".to_string()),
            ..StubConfig::default()
        })
        .await
        .unwrap();

        let url = format!("ws://{}/{}", server.addr(), STREAM_PATH);
        assert!(tokio_tungstenite::connect_async(url).await.is_err());
        assert_eq!(server.connections().await, 0);
    }
}
