//! In-process fakes for driving a call session without network peers.

#![allow(dead_code)]

use async_trait::async_trait;
use callrelay_knowledge::{KnowledgeClient, KnowledgeError, RetrievalContext, RetryPolicy};
use callrelay_server::config::Config;
use callrelay_server::error::CallError;
use callrelay_server::session::{run_call, CallOutcome, CallSettings, SessionServices};
use callrelay_transfer::MemoryTransferStore;
use callrelay_voice::{EngineConnector, Link, VoiceError};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const SESSION_ID: &str = "6f1c2a52-8d8e-4d0b-9d54-3f0f4b1d2e77";
pub const STREAM_SID: &str = "MZ00000000000000000000000000000001";

/// Hands the test the engine side of every link it opens.
pub struct FakeEngine {
    fail: bool,
    peers: mpsc::UnboundedSender<Link>,
}

#[async_trait]
impl EngineConnector for FakeEngine {
    async fn connect(&self) -> Result<Link, VoiceError> {
        if self.fail {
            return Err(VoiceError::Connect("connection refused".to_string()));
        }
        let (session_side, engine_side) = Link::pair(64);
        self.peers
            .send(engine_side)
            .map_err(|_| VoiceError::Connect("test dropped the engine".to_string()))?;
        Ok(session_side)
    }
}

/// Answers from a queue; `None` entries and an empty queue fail.
#[derive(Default)]
pub struct FakeKnowledge {
    answers: Mutex<VecDeque<Option<String>>>,
    /// How long each request takes before it answers or fails.
    delay: Duration,
    pub seen: Mutex<Vec<(RetrievalContext, String)>>,
}

impl FakeKnowledge {
    pub fn answering(answers: &[Option<&str>]) -> Self {
        Self {
            answers: Mutex::new(answers.iter().map(|a| a.map(str::to_string)).collect()),
            delay: Duration::ZERO,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn queries(&self) -> Vec<String> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .map(|(_, q)| q.clone())
            .collect()
    }
}

#[async_trait]
impl KnowledgeClient for FakeKnowledge {
    async fn ask(&self, ctx: &RetrievalContext, query: &str) -> Result<String, KnowledgeError> {
        self.seen
            .lock()
            .unwrap()
            .push((ctx.clone(), query.to_string()));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.answers.lock().unwrap().pop_front().flatten() {
            Some(answer) => Ok(answer),
            None => Err(KnowledgeError::Status {
                status: 503,
                body: "unavailable".to_string(),
            }),
        }
    }
}

pub fn test_settings() -> CallSettings {
    let mut settings = CallSettings::from_config(&Config::default()).unwrap();
    settings.retry = RetryPolicy::new(2, Duration::from_millis(5));
    settings.idle_timeout = Duration::from_secs(30);
    settings.watchdog_poll = Duration::from_millis(100);
    settings
}

/// Services backed by the fakes, for tests that go through the router.
pub fn fake_services(
    store: Arc<MemoryTransferStore>,
    knowledge: FakeKnowledge,
) -> (SessionServices, mpsc::UnboundedReceiver<Link>) {
    let (peers_tx, peers_rx) = mpsc::unbounded_channel();
    let services = SessionServices {
        engine: Arc::new(FakeEngine {
            fail: false,
            peers: peers_tx,
        }),
        knowledge: Arc::new(knowledge),
        transfers: store,
        settings: Arc::new(test_settings()),
    };
    (services, peers_rx)
}

pub struct Setup {
    pub settings: CallSettings,
    pub knowledge: FakeKnowledge,
    pub engine_fails: bool,
}

impl Setup {
    pub fn new() -> Self {
        Self {
            settings: test_settings(),
            knowledge: FakeKnowledge::default(),
            engine_fails: false,
        }
    }

    pub fn start(self) -> Call {
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        let store = Arc::new(MemoryTransferStore::new());
        let knowledge = Arc::new(self.knowledge);
        let services = SessionServices {
            engine: Arc::new(FakeEngine {
                fail: self.engine_fails,
                peers: peers_tx,
            }),
            knowledge: knowledge.clone(),
            transfers: store.clone(),
            settings: Arc::new(self.settings),
        };

        let (session_side, caller_side) = Link::pair(64);
        let handle = tokio::spawn(run_call(SESSION_ID, session_side, services));
        Call {
            caller: caller_side,
            engines: peers_rx,
            store,
            knowledge,
            handle,
        }
    }
}

/// A running session and the test's ends of its two legs.
pub struct Call {
    pub caller: Link,
    pub engines: mpsc::UnboundedReceiver<Link>,
    pub store: Arc<MemoryTransferStore>,
    pub knowledge: Arc<FakeKnowledge>,
    pub handle: JoinHandle<Result<CallOutcome, CallError>>,
}

impl Call {
    pub async fn send(&self, frame: Value) {
        self.caller.tx.send(frame.to_string()).await.unwrap();
    }

    /// Next frame the session sent towards the caller, or `None` once the leg closed.
    pub async fn caller_frame(&mut self) -> Option<Value> {
        recv_json(&mut self.caller.rx).await
    }

    pub async fn engine(&mut self) -> Link {
        tokio::time::timeout(Duration::from_secs(5), self.engines.recv())
            .await
            .expect("session never connected to the engine")
            .expect("engine connector dropped")
    }

    pub async fn outcome(self) -> Result<CallOutcome, CallError> {
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("session did not finish")
            .unwrap()
    }
}

pub async fn recv_json(rx: &mut mpsc::Receiver<String>) -> Option<Value> {
    let text = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for a frame")?;
    Some(serde_json::from_str(&text).unwrap())
}

/// Next engine-bound event, asserting its type.
pub async fn expect_event(engine: &mut Link, kind: &str) -> Value {
    let event = recv_json(&mut engine.rx)
        .await
        .unwrap_or_else(|| panic!("engine leg closed while waiting for {}", kind));
    assert_eq!(event["type"], kind, "unexpected engine event: {}", event);
    event
}

pub async fn engine_send(engine: &Link, event: Value) {
    engine.tx.send(event.to_string()).await.unwrap();
}

pub fn start_frame(parameters: Value) -> Value {
    json!({
        "event": "start",
        "sequenceNumber": "1",
        "start": {
            "streamSid": STREAM_SID,
            "callSid": "CA00000000000000000000000000000001",
            "accountSid": "AC00000000000000000000000000000001",
            "tracks": ["inbound"],
            "customParameters": parameters,
            "mediaFormat": {"encoding": "audio/x-mulaw", "sampleRate": 8000, "channels": 1}
        },
        "streamSid": STREAM_SID
    })
}

pub fn default_start() -> Value {
    start_frame(json!({"project_id": "4242", "api_key": "cgpt-key"}))
}

pub fn media(payload: &str) -> Value {
    json!({
        "event": "media",
        "streamSid": STREAM_SID,
        "media": {"track": "inbound", "chunk": "1", "timestamp": "5", "payload": payload}
    })
}

pub fn dtmf(digit: &str) -> Value {
    json!({
        "event": "dtmf",
        "streamSid": STREAM_SID,
        "dtmf": {"track": "inbound_track", "digit": digit}
    })
}

pub fn stop() -> Value {
    json!({"event": "stop", "streamSid": STREAM_SID, "stop": {}})
}

pub fn audio_delta(response_id: &str, delta: &str) -> Value {
    json!({
        "type": "response.audio.delta",
        "response_id": response_id,
        "item_id": "item_1",
        "output_index": 0,
        "content_index": 0,
        "delta": delta
    })
}

pub fn speech_started() -> Value {
    json!({"type": "input_audio_buffer.speech_started", "audio_start_ms": 1200, "item_id": "item_2"})
}

pub fn function_call(name: &str, call_id: &str, arguments: &str) -> Value {
    json!({
        "type": "response.function_call_arguments.done",
        "response_id": "resp_fn",
        "item_id": "item_fn",
        "output_index": 0,
        "call_id": call_id,
        "name": name,
        "arguments": arguments
    })
}
