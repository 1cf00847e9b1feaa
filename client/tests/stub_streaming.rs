//! End to end streaming against the stub server

use std::future::Future;
use std::time::Duration;

use paroli_client::audio::{ChannelSinkFactory, SinkChunk};
use paroli_client::config::ClientConfig;
use paroli_client::session::TracingReporter;
use paroli_client::transport::WsConnector;
use paroli_client::{ClientHandle, Phase, Session, StreamingClient};
use paroli_protocol::RequestBuilder;
use paroli_stub_server::{render_tone, StubConfig, StubServer};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

type WsSession = Session<WsConnector, ChannelSinkFactory, TracingReporter>;

struct Harness {
    stub: StubServer,
    handle: ClientHandle,
    task: JoinHandle<WsSession>,
    audio: UnboundedReceiver<SinkChunk>,
}

async fn start(stub: StubConfig, token: Option<&str>) -> Harness {
    let stub = StubServer::start(stub).await.unwrap();

    let mut config = ClientConfig::default();
    config.server.url = stub.base_url();
    config.server.auth_token = token.map(String::from);

    let (sinks, audio) = ChannelSinkFactory::channel();
    let (client, handle) = StreamingClient::websocket(&config, sinks, TracingReporter);
    let task = tokio::spawn(client.run());

    Harness {
        stub,
        handle,
        task,
        audio,
    }
}

async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(10), future)
        .await
        .expect("timed out")
}

/// Receive chunks until `bytes` bytes of audio arrived
async fn collect(audio: &mut UnboundedReceiver<SinkChunk>, bytes: usize) -> Vec<SinkChunk> {
    let mut chunks = Vec::new();
    let mut total = 0;
    while total < bytes {
        let chunk = within(audio.recv()).await.unwrap();
        total += chunk.pcm.len();
        chunks.push(chunk);
    }
    chunks
}

impl Harness {
    async fn stop(self) -> WsSession {
        self.handle.shutdown().unwrap();
        self.task.await.unwrap()
    }
}

#[tokio::test]
async fn test_audio_streams_in_order() {
    let mut h = start(StubConfig::default(), None).await;

    h.handle.speak(RequestBuilder::new("hello")).unwrap();
    let expected = render_tone(24000, 5 * 1200);
    let chunks = collect(&mut h.audio, expected.len()).await;

    assert!(chunks.iter().all(|c| c.sink == 0));
    let received: Vec<u8> = chunks.into_iter().flat_map(|c| c.pcm).collect();
    assert_eq!(received, expected);

    let requests = h.stub.requests().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].text(), "hello");
    assert_eq!(requests[0].speaker_id(), 0);

    let session = h.stop().await;
    assert_eq!(session.phase(), Phase::Open);
    assert_eq!(session.stats().connections_opened, 1);
}

#[tokio::test]
async fn test_chunk_boundaries_preserved() {
    let stub = StubConfig {
        chunk_bytes: 4096,
        samples_per_char: 1024,
        ..StubConfig::default()
    };
    let mut h = start(stub, None).await;

    h.handle.speak(RequestBuilder::new("abc")).unwrap();
    let chunks = collect(&mut h.audio, 6144).await;

    let sizes: Vec<usize> = chunks.iter().map(|c| c.pcm.len()).collect();
    assert_eq!(sizes, vec![4096, 2048]);
    h.stop().await;
}

#[tokio::test]
async fn test_keepalives_never_reach_sink() {
    let stub = StubConfig {
        chunk_bytes: 1024,
        samples_per_char: 1024,
        keepalive: true,
        ..StubConfig::default()
    };
    let mut h = start(stub, None).await;

    h.handle.speak(RequestBuilder::new("ab")).unwrap();
    let chunks = collect(&mut h.audio, 4096).await;
    assert_eq!(chunks.len(), 4);
    assert!(chunks.iter().all(|c| !c.pcm.is_empty()));

    let session = h.stop().await;
    assert_eq!(session.stats().keepalives, 3);
    assert_eq!(session.stats().audio_chunks, 4);
}

#[tokio::test]
async fn test_server_error_keeps_connection_open() {
    let stub = StubConfig {
        speakers: vec!["alice".to_string(), "bob".to_string()],
        ..StubConfig::default()
    };
    let mut h = start(stub, None).await;

    h.handle
        .speak(RequestBuilder::new("hello").with_speaker_id(5))
        .unwrap();
    let status = within(h.handle.wait_for(|s| s.server_errors == 1))
        .await
        .unwrap();
    assert_eq!(status.phase, Phase::Open);
    assert_eq!(status.audio_chunks, 0);

    h.handle
        .speak(RequestBuilder::new("hi").with_voice("1"))
        .unwrap();
    let chunks = collect(&mut h.audio, 2 * 1200 * 2).await;
    assert!(chunks.iter().all(|c| c.sink == 0));

    assert_eq!(h.stub.connections().await, 1);
    let speakers: Vec<i64> = h.stub.requests().await.iter().map(|r| r.speaker_id()).collect();
    assert_eq!(speakers, vec![5, 1]);
    h.stop().await;
}

#[tokio::test]
async fn test_malformed_text_frame_is_skipped() {
    let stub = StubConfig {
        garbage_text: true,
        ..StubConfig::default()
    };
    let mut h = start(stub, None).await;

    h.handle.speak(RequestBuilder::new("abc")).unwrap();
    let chunks = collect(&mut h.audio, 3 * 1200 * 2).await;
    assert!(chunks.iter().all(|c| c.sink == 0));

    h.handle.speak(RequestBuilder::new("de")).unwrap();
    let chunks = collect(&mut h.audio, 2 * 1200 * 2).await;
    assert!(chunks.iter().all(|c| c.sink == 0));

    let status = within(h.handle.wait_for(|s| s.audio_bytes == 5 * 1200 * 2))
        .await
        .unwrap();
    assert_eq!(status.phase, Phase::Open);
    assert_eq!(status.server_errors, 0);
    assert_eq!(h.stub.connections().await, 1);
    h.stop().await;
}

#[tokio::test]
async fn test_dropped_connection_reopens_on_next_request() {
    let stub = StubConfig {
        chunk_bytes: 1024,
        samples_per_char: 1024,
        drop_after_chunks: Some(1),
        ..StubConfig::default()
    };
    let mut h = start(stub, None).await;

    h.handle.speak(RequestBuilder::new("abcd")).unwrap();
    let first = within(h.audio.recv()).await.unwrap();
    assert_eq!(first.sink, 0);
    within(h.handle.wait_for(|s| s.phase == Phase::Closed))
        .await
        .unwrap();

    h.handle.speak(RequestBuilder::new("abcd")).unwrap();
    let second = within(h.audio.recv()).await.unwrap();
    assert_eq!(second.sink, 1);
    assert_eq!(second.pcm, first.pcm);

    let status = within(h.handle.wait_for(|s| s.audio_chunks == 2))
        .await
        .unwrap();
    assert_eq!(status.connections_opened, 2);
    assert_eq!(h.stub.connections().await, 2);
    h.stop().await;
}

#[tokio::test]
async fn test_latest_request_wins_while_connecting() {
    let mut h = start(StubConfig::default(), None).await;

    h.handle.speak(RequestBuilder::new("first")).unwrap();
    h.handle.speak(RequestBuilder::new("second")).unwrap();

    let chunks = collect(&mut h.audio, 6 * 1200 * 2).await;
    assert!(chunks.iter().all(|c| c.sink == 1));

    let texts: Vec<String> = h
        .stub
        .requests()
        .await
        .iter()
        .map(|r| r.text().to_string())
        .collect();
    assert_eq!(texts, vec!["second"]);

    let session = h.stop().await;
    assert_eq!(session.stats().requests_sent, 1);
}

#[tokio::test]
async fn test_bearer_token_accepted() {
    let stub = StubConfig {
        auth_token: Some("secret".to_string()),
        ..StubConfig::default()
    };
    let mut h = start(stub, Some("secret")).await;

    h.handle.speak(RequestBuilder::new("a")).unwrap();
    let chunks = collect(&mut h.audio, 1200 * 2).await;
    assert!(!chunks.is_empty());
    h.stop().await;
}

#[tokio::test]
async fn test_wrong_token_closes_session() {
    let stub = StubConfig {
        auth_token: Some("secret".to_string()),
        ..StubConfig::default()
    };
    let h = start(stub, Some("guess")).await;

    h.handle.speak(RequestBuilder::new("a")).unwrap();
    let status = within(h.handle.wait_for(|s| s.phase == Phase::Closed))
        .await
        .unwrap();
    assert_eq!(status.requests_sent, 0);
    assert_eq!(h.stub.connections().await, 0);
    h.stop().await;
}
