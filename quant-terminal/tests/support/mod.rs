//! Harness shared by the terminal integration tests: a local feed server,
//! history/order fakes and snapshot helpers.
#![allow(dead_code)]

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use quant_terminal::{
    BackfillError, ControllerConfig, FeedConfig, Fill, GatewayError, HistorySample, HistorySource,
    MemorySessionStore, Notice, Order, OrderClient, OrderGateway, Session, SessionError,
    SessionStore, TerminalController, TerminalHandle, TerminalSnapshot,
};
use tokio::{
    net::TcpListener,
    sync::{mpsc, Notify, Semaphore},
};
use tokio_tungstenite::{accept_async, tungstenite::Message};

pub const WAIT: Duration = Duration::from_secs(5);
pub const TICKER: &str = "NIFTY_SIM";

/// History source answering with fixed samples, optionally held until the
/// gate is notified
pub struct FakeHistory {
    samples: Result<Vec<HistorySample>, BackfillError>,
    gate: Option<Arc<Notify>>,
}

impl FakeHistory {
    pub fn ok(samples: Vec<HistorySample>) -> Self {
        Self {
            samples: Ok(samples),
            gate: None,
        }
    }

    pub fn failing(error: BackfillError) -> Self {
        Self {
            samples: Err(error),
            gate: None,
        }
    }

    pub fn held(samples: Vec<HistorySample>, gate: Arc<Notify>) -> Self {
        Self {
            samples: Ok(samples),
            gate: Some(gate),
        }
    }
}

#[async_trait]
impl HistorySource for FakeHistory {
    async fn get_history(&self, _ticker: &str) -> Result<Vec<HistorySample>, BackfillError> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.samples.clone()
    }
}

/// Order gateway answering from a script.
///
/// Each call waits for a permit, then takes the next scripted answer, so
/// answers are handed out in release order. Once the script runs dry the
/// last answer repeats.
pub struct ScriptedGateway {
    answers: Mutex<VecDeque<Result<Fill, GatewayError>>>,
    last: Result<Fill, GatewayError>,
    calls: AtomicUsize,
    gate: Semaphore,
}

impl ScriptedGateway {
    pub fn immediate(answer: Result<Fill, GatewayError>) -> Arc<Self> {
        Self::build(vec![answer], Semaphore::MAX_PERMITS)
    }

    pub fn held(answer: Result<Fill, GatewayError>) -> Arc<Self> {
        Self::build(vec![answer], 0)
    }

    pub fn held_script(answers: Vec<Result<Fill, GatewayError>>) -> Arc<Self> {
        Self::build(answers, 0)
    }

    fn build(answers: Vec<Result<Fill, GatewayError>>, permits: usize) -> Arc<Self> {
        let last = answers
            .last()
            .cloned()
            .unwrap_or(Err(GatewayError::Transport("empty script".to_string())));
        Arc::new(Self {
            answers: Mutex::new(answers.into()),
            last,
            calls: AtomicUsize::new(0),
            gate: Semaphore::new(permits),
        })
    }

    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OrderGateway for ScriptedGateway {
    async fn place_order(&self, _: &Order, _: &Session) -> Result<Fill, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.gate.acquire().await.unwrap().forget();
        let next = self.answers.lock().pop_front();
        next.unwrap_or_else(|| self.last.clone())
    }
}

/// Session store counting invalidations
#[derive(Default)]
pub struct CountingStore {
    inner: MemorySessionStore,
    invalidations: AtomicUsize,
}

impl CountingStore {
    pub fn invalidations(&self) -> usize {
        self.invalidations.load(Ordering::SeqCst)
    }
}

impl SessionStore for CountingStore {
    fn load(&self) -> Result<Option<Session>, SessionError> {
        self.inner.load()
    }

    fn save(&self, session: &Session) -> Result<(), SessionError> {
        self.inner.save(session)
    }

    fn invalidate(&self) -> Result<bool, SessionError> {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
        self.inner.invalidate()
    }
}

/// Feed server pushing frames on demand; reports when the client leaves
pub struct FeedServer {
    pub url: String,
    pub frames: mpsc::UnboundedSender<String>,
    pub client_left: Arc<Notify>,
}

impl FeedServer {
    pub fn push(&self, frame: impl Into<String>) {
        self.frames.send(frame.into()).unwrap();
    }

    pub async fn wait_client_left(&self) {
        tokio::time::timeout(WAIT, self.client_left.notified())
            .await
            .expect("feed was not closed");
    }
}

pub async fn spawn_feed_server() -> FeedServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/ws", listener.local_addr().unwrap());
    let (frames, mut frames_rx) = mpsc::unbounded_channel::<String>();
    let client_left = Arc::new(Notify::new());

    let left = Arc::clone(&client_left);
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        loop {
            tokio::select! {
                Some(frame) = frames_rx.recv() => {
                    if ws.send(Message::Text(frame.into())).await.is_err() {
                        break;
                    }
                }
                msg = ws.next() => match msg {
                    Some(Ok(msg)) if !msg.is_close() => {}
                    _ => break,
                },
            }
        }
        left.notify_one();
    });

    FeedServer {
        url,
        frames,
        client_left,
    }
}

/// Address nothing listens on
pub async fn unreachable_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/ws", listener.local_addr().unwrap());
    drop(listener);
    url
}

pub fn sample(minute: u32, value: f64) -> HistorySample {
    HistorySample::new(
        Utc.with_ymd_and_hms(2024, 1, 2, 10, minute, 0).unwrap(),
        value,
    )
}

pub fn backfill() -> Vec<HistorySample> {
    (0..3).map(|m| sample(m, 21400.0 + m as f64)).collect()
}

pub fn values(snapshot: &TerminalSnapshot) -> Vec<f64> {
    snapshot.history.iter().map(|s| s.value).collect()
}

pub fn logged_in() -> Arc<CountingStore> {
    let store = CountingStore::default();
    store.save(&Session::new("jwt-token", "trader1")).unwrap();
    Arc::new(store)
}

pub fn filled() -> Result<Fill, GatewayError> {
    Ok(Fill {
        execution_price: 21500.0,
        new_balance: 98500.0,
    })
}

pub fn config(feed_url: &str) -> ControllerConfig {
    ControllerConfig {
        ticker: TICKER.to_string(),
        order_quantity: 1,
        history_capacity: 60,
        initial_balance: 100_000.0,
        feed: FeedConfig::new(feed_url, TICKER)
            .with_reconnect_delay(Duration::from_millis(20), Duration::from_millis(100)),
    }
}

pub fn mount(
    feed_url: &str,
    sessions: Arc<dyn SessionStore>,
    history: FakeHistory,
    gateway: Arc<ScriptedGateway>,
) -> (TerminalHandle, mpsc::UnboundedReceiver<Notice>) {
    mount_with(config(feed_url), sessions, history, OrderClient::new(gateway))
}

pub fn mount_with(
    config: ControllerConfig,
    sessions: Arc<dyn SessionStore>,
    history: FakeHistory,
    orders: OrderClient,
) -> (TerminalHandle, mpsc::UnboundedReceiver<Notice>) {
    TerminalController::new(config, sessions, Arc::new(history), orders).mount()
}

pub async fn wait_until<F>(handle: &TerminalHandle, predicate: F) -> TerminalSnapshot
where
    F: Fn(&TerminalSnapshot) -> bool,
{
    let mut rx = handle.subscribe();
    let snapshot = tokio::time::timeout(WAIT, rx.wait_for(|s| predicate(s)))
        .await
        .expect("timed out waiting for terminal state")
        .expect("controller stopped")
        .clone();
    snapshot
}

pub async fn next_notice(rx: &mut mpsc::UnboundedReceiver<Notice>) -> Notice {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for notice")
        .expect("notice channel closed")
}
