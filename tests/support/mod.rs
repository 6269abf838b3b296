// Shared test doubles: an in-memory transcription service connection and a
// recording persistence sink. The synthetic tap factory lives in the crate
// itself (`meetscribe::SyntheticTapFactory`).
#![allow(dead_code)]

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use meetscribe::capture::TranscriptChunk;
use meetscribe::config::Config;
use meetscribe::credentials::StaticCredentials;
use meetscribe::error::CaptureError;
use meetscribe::persist::TranscriptSink;
use meetscribe::transcribe::{Connector, TransportRx, TransportTx};
use meetscribe::{EngineServices, SyntheticTapFactory};

type EventSender = mpsc::UnboundedSender<Result<String, CaptureError>>;

struct FakeConn {
    sent: Arc<Mutex<Vec<String>>>,
    events: Option<EventSender>,
}

#[derive(Default)]
struct FakeState {
    connections: Vec<FakeConn>,
    fail_connects: u32,
    deny: Option<CaptureError>,
}

/// In-memory stand-in for the transcription service. Each `connect` yields
/// a fresh connection whose outbound messages are recorded and whose
/// inbound events are pushed by the test.
#[derive(Clone, Default)]
pub struct FakeConnector {
    state: Arc<Mutex<FakeState>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect_count(&self) -> usize {
        self.state.lock().unwrap().connections.len()
    }

    /// Messages sent on one connection, in order.
    pub fn sent(&self, conn: usize) -> Vec<String> {
        self.state.lock().unwrap().connections[conn]
            .sent
            .lock()
            .unwrap()
            .clone()
    }

    /// Messages sent across all connections.
    pub fn all_sent(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .connections
            .iter()
            .flat_map(|c| c.sent.lock().unwrap().clone())
            .collect()
    }

    /// Push one inbound event onto a connection.
    pub fn push(&self, conn: usize, json: &str) {
        let state = self.state.lock().unwrap();
        if let Some(events) = state.connections[conn].events.as_ref() {
            let _ = events.send(Ok(json.to_string()));
        }
    }

    /// Close a connection from the server side.
    pub fn close(&self, conn: usize) {
        let mut state = self.state.lock().unwrap();
        state.connections[conn].events.take();
    }

    /// Make the next `n` connect attempts fail with a network error.
    pub fn fail_next_connects(&self, n: u32) {
        self.state.lock().unwrap().fail_connects = n;
    }

    /// Make every connect attempt fail with the given error.
    pub fn deny(&self, err: CaptureError) {
        self.state.lock().unwrap().deny = Some(err);
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        _url: &str,
        _api_key: &str,
    ) -> Result<(Box<dyn TransportTx>, Box<dyn TransportRx>), CaptureError> {
        let mut state = self.state.lock().unwrap();

        if let Some(err) = state.deny.clone() {
            return Err(err);
        }
        if state.fail_connects > 0 {
            state.fail_connects -= 1;
            return Err(CaptureError::NetworkFailure("connection refused".into()));
        }

        let sent = Arc::new(Mutex::new(Vec::new()));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        state.connections.push(FakeConn {
            sent: sent.clone(),
            events: Some(events_tx),
        });

        Ok((
            Box::new(FakeTx { sent }),
            Box::new(FakeRx { rx: events_rx }),
        ))
    }
}

struct FakeTx {
    sent: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl TransportTx for FakeTx {
    async fn send_text(&mut self, text: String) -> Result<(), CaptureError> {
        self.sent.lock().unwrap().push(text);
        Ok(())
    }

    async fn ping(&mut self) -> Result<(), CaptureError> {
        Ok(())
    }

    async fn close(&mut self) {}
}

struct FakeRx {
    rx: mpsc::UnboundedReceiver<Result<String, CaptureError>>,
}

#[async_trait]
impl TransportRx for FakeRx {
    async fn next_text(&mut self) -> Option<Result<String, CaptureError>> {
        self.rx.recv().await
    }
}

/// Persistence sink that records every handoff.
#[derive(Default)]
pub struct RecordingSink {
    pub finalized: Mutex<Vec<TranscriptChunk>>,
    pub sessions: Mutex<Vec<(String, Vec<TranscriptChunk>)>>,
}

#[async_trait]
impl TranscriptSink for RecordingSink {
    async fn chunk_finalized(&self, chunk: &TranscriptChunk) {
        self.finalized.lock().unwrap().push(chunk.clone());
    }

    async fn session_complete(&self, name: &str, chunks: Vec<TranscriptChunk>) {
        self.sessions
            .lock()
            .unwrap()
            .push((name.to_string(), chunks));
    }
}

impl RecordingSink {
    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }
}

/// Engine services wired entirely to test doubles.
pub fn fake_services(
    taps: &SyntheticTapFactory,
    connector: &FakeConnector,
    sink: &Arc<RecordingSink>,
) -> EngineServices {
    EngineServices {
        taps: Arc::new(taps.clone()),
        connector: Arc::new(connector.clone()),
        credentials: Arc::new(StaticCredentials::new("sk-test")),
        sink: sink.clone(),
    }
}

/// Config with timings tightened for tests.
pub fn test_config() -> Config {
    let mut cfg = Config::default();
    cfg.transcription.connect_timeout_secs = 2;
    cfg.transcription.retry_delay_ms = 20;
    cfg.transcription.max_retries = 2;
    cfg.audio.tap_reactivate_limit = 2;
    cfg
}

pub fn delta_json(text: &str) -> String {
    format!(
        r#"{{"type":"conversation.item.input_audio_transcription.delta","item_id":"item-1","delta":"{}"}}"#,
        text
    )
}

pub fn completed_json(text: &str) -> String {
    format!(
        r#"{{"type":"conversation.item.input_audio_transcription.completed","item_id":"item-1","transcript":"{}"}}"#,
        text
    )
}

pub fn error_json(code: &str, message: &str) -> String {
    format!(
        r#"{{"type":"error","code":"{}","message":"{}"}}"#,
        code, message
    )
}

/// Poll an async condition until it holds or the timeout elapses.
pub async fn eventually<F, Fut>(mut cond: F, timeout_ms: u64) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        if cond().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
