//! WebSocket client for the market data feed
//!
//! Connects to the trading API's `/ws` endpoint, extracts the subscribed
//! ticker from every price frame and forwards it as a [`Tick`]. The
//! connection is supervised: once established, losses are retried with
//! exponential backoff and reported as [`ConnectionStatus`] events.

use crate::shared::{error::FeedError, types::Tick};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::time::Duration;
use tokio::{net::TcpStream, sync::{mpsc, watch}, task::JoinHandle};
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};

type FeedStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Feed client configuration
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// WebSocket server URL
    pub url: String,
    /// Symbol whose prices are forwarded; every other key is ignored
    pub ticker: String,
    /// Ping interval to keep connection alive
    pub ping_interval: Duration,
    /// A connection silent for this long is treated as lost
    pub read_timeout: Duration,
    /// First reconnection delay after a disconnect
    pub reconnect_delay: Duration,
    /// Upper bound for the doubling reconnection delay
    pub max_reconnect_delay: Duration,
    /// Maximum channel buffer size for events
    pub channel_buffer_size: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080/ws".to_string(),
            ticker: "NIFTY_SIM".to_string(),
            ping_interval: Duration::from_secs(30),
            read_timeout: Duration::from_secs(120),
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
            channel_buffer_size: 1000,
        }
    }
}

impl FeedConfig {
    /// Create a new configuration with custom URL and ticker
    pub fn new(url: impl Into<String>, ticker: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ticker: ticker.into(),
            ..Default::default()
        }
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the initial and maximum reconnection delay
    pub fn with_reconnect_delay(mut self, initial: Duration, max: Duration) -> Self {
        self.reconnect_delay = initial;
        self.max_reconnect_delay = max.max(initial);
        self
    }

    pub fn with_channel_buffer_size(mut self, size: usize) -> Self {
        self.channel_buffer_size = size.max(1);
        self
    }
}

/// Connection status updates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Reconnecting,
}

/// Events emitted by a running feed
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Tick(Tick),
    Status(ConnectionStatus),
}

/// Price of one entry in a feed frame
///
/// Either a bare number or a stock record carrying a price field.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FramePrice {
    Number(f64),
    Record {
        #[serde(alias = "Price")]
        price: f64,
    },
}

impl FramePrice {
    fn value(&self) -> f64 {
        match self {
            FramePrice::Number(price) => *price,
            FramePrice::Record { price } => *price,
        }
    }
}

/// Extract the price of `ticker` from a ticker→price frame.
///
/// Returns `Ok(None)` when the frame is well formed but does not quote
/// `ticker`.
pub fn parse_frame(text: &str, ticker: &str) -> Result<Option<f64>, FeedError> {
    let frame: serde_json::Map<String, serde_json::Value> = serde_json::from_str(text)
        .map_err(|e| FeedError::MalformedMessage(e.to_string()))?;

    let Some(raw) = frame.get(ticker) else {
        return Ok(None);
    };

    let price = FramePrice::deserialize(raw)
        .map_err(|e| FeedError::MalformedMessage(format!("{}: {}", ticker, e)))?
        .value();

    if !price.is_finite() || price <= 0.0 {
        return Err(FeedError::MalformedMessage(format!(
            "{}: invalid price {}",
            ticker, price
        )));
    }

    Ok(Some(price))
}

/// Handle to a running feed. Closing is idempotent.
#[derive(Debug)]
pub struct FeedHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl FeedHandle {
    /// Stop the feed. After the first call the supervisor sends a close
    /// frame and exits; later calls are no-ops.
    pub fn close(&self) {
        let already_closed = self.shutdown_tx.send_replace(true);
        if !already_closed {
            debug!("feed close requested");
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Whether the supervising task has exited
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for FeedHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// WebSocket client for ticks of one instrument
pub struct FeedClient {
    config: FeedConfig,
}

impl FeedClient {
    pub fn new(config: FeedConfig) -> Self {
        Self { config }
    }

    /// Establish the feed connection.
    ///
    /// Fails with [`FeedError::Connection`] if the first attempt cannot be
    /// established. Once connected, a supervising task owns the socket and
    /// reconnects with backoff until the handle is closed or the event
    /// receiver is dropped.
    pub async fn connect(self) -> Result<(FeedHandle, mpsc::Receiver<FeedEvent>), FeedError> {
        let (ws_stream, _) = connect_async(&self.config.url)
            .await
            .map_err(|e| FeedError::Connection {
                url: self.config.url.clone(),
                reason: e.to_string(),
            })?;
        info!(url = %self.config.url, ticker = %self.config.ticker, "connected to market data feed");

        let (event_tx, event_rx) = mpsc::channel(self.config.channel_buffer_size);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(run_feed_supervisor(
            self.config,
            ws_stream,
            event_tx,
            shutdown_rx,
        ));

        Ok((FeedHandle { shutdown_tx, task }, event_rx))
    }
}

/// Why a single connection ended
#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    /// Handle closed or event receiver dropped; do not reconnect
    Stop,
    /// Connection lost; reconnect after backoff
    Lost,
}

/// Supervise connections until shutdown, reconnecting with doubling backoff
async fn run_feed_supervisor(
    config: FeedConfig,
    first_stream: FeedStream,
    event_tx: mpsc::Sender<FeedEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut next_stream = Some(first_stream);
    let mut delay = config.reconnect_delay;

    loop {
        if let Some(ws_stream) = next_stream.take() {
            delay = config.reconnect_delay;

            if event_tx.send(FeedEvent::Status(ConnectionStatus::Connected)).await.is_err() {
                return;
            }

            match run_connection(&config, ws_stream, &event_tx, &mut shutdown_rx).await {
                SessionEnd::Stop => return,
                SessionEnd::Lost => {
                    if event_tx.send(FeedEvent::Status(ConnectionStatus::Disconnected)).await.is_err() {
                        return;
                    }
                    warn!(url = %config.url, "feed connection lost, will reconnect...");
                }
            }
        }

        // Wait before reconnecting
        debug!("Waiting {:?} before reconnecting...", delay);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown_requested(&mut shutdown_rx) => return,
        }

        if event_tx.send(FeedEvent::Status(ConnectionStatus::Reconnecting)).await.is_err() {
            return;
        }

        tokio::select! {
            result = connect_async(&config.url) => match result {
                Ok((ws_stream, _)) => {
                    info!(url = %config.url, "reconnected to market data feed");
                    next_stream = Some(ws_stream);
                }
                Err(e) => {
                    error!(url = %config.url, error = %e, "failed to reconnect");
                    if event_tx.send(FeedEvent::Status(ConnectionStatus::Disconnected)).await.is_err() {
                        return;
                    }
                    delay = (delay * 2).min(config.max_reconnect_delay);
                }
            },
            _ = shutdown_requested(&mut shutdown_rx) => return,
        }
    }
}

/// Resolves once the handle is closed or dropped. The borrow guard from
/// `wait_for` is released here so callers stay `Send` across later awaits.
async fn shutdown_requested(shutdown_rx: &mut watch::Receiver<bool>) {
    let _ = shutdown_rx.wait_for(|closed| *closed).await;
}

/// Read one connection until it is lost or shut down
async fn run_connection(
    config: &FeedConfig,
    ws_stream: FeedStream,
    event_tx: &mpsc::Sender<FeedEvent>,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let (mut write, mut read) = ws_stream.split();

    let mut ping = tokio::time::interval(config.ping_interval);
    ping.tick().await;

    loop {
        tokio::select! {
            _ = shutdown_requested(shutdown_rx) => {
                debug!("feed shutting down");
                let _ = write.send(Message::Close(None)).await;
                return SessionEnd::Stop;
            }
            _ = ping.tick() => {
                if write.send(Message::Ping(vec![].into())).await.is_err() {
                    debug!("Failed to send ping, connection likely dead");
                    return SessionEnd::Lost;
                }
            }
            msg = tokio::time::timeout(config.read_timeout, read.next()) => {
                let msg = match msg {
                    Ok(Some(msg)) => msg,
                    Ok(None) => {
                        info!("Server ended feed stream");
                        return SessionEnd::Lost;
                    }
                    Err(_) => {
                        warn!(
                            timeout_secs = config.read_timeout.as_secs(),
                            "feed read timeout - no data received"
                        );
                        return SessionEnd::Lost;
                    }
                };

                match msg {
                    Ok(Message::Text(text)) => match parse_frame(&text, &config.ticker) {
                        Ok(Some(price)) => {
                            let tick = Tick::new(config.ticker.clone(), price, Utc::now());
                            if event_tx.send(FeedEvent::Tick(tick)).await.is_err() {
                                warn!("Event receiver dropped, stopping feed");
                                return SessionEnd::Stop;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            warn!(error = %e, "dropping feed frame");
                            debug!("Raw message: {}", text.chars().take(200).collect::<String>());
                        }
                    },
                    Ok(Message::Close(_)) => {
                        info!("Server closed connection");
                        return SessionEnd::Lost;
                    }
                    Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                        // Heartbeat messages - tungstenite handles these automatically
                    }
                    Err(e) => {
                        error!("WebSocket error: {}", e);
                        return SessionEnd::Lost;
                    }
                    _ => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    async fn recv_event(rx: &mut mpsc::Receiver<FeedEvent>) -> FeedEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for feed event")
            .expect("feed channel closed")
    }

    /// Accepts one connection, sends `frames`, then keeps it open until the
    /// client goes away
    async fn spawn_frame_server(frames: Vec<String>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            for frame in frames {
                ws.send(Message::Text(frame.into())).await.unwrap();
            }
            while let Some(Ok(msg)) = ws.next().await {
                if msg.is_close() {
                    break;
                }
            }
        });

        format!("ws://{}/ws", addr)
    }

    #[test]
    fn test_parse_frame() {
        struct TestCase {
            input: &'static str,
            expected: Result<Option<f64>, ()>,
        }

        let tests = vec![
            TestCase {
                // TC0: subscribed symbol extracted, others ignored
                input: r#"{"NIFTY_SIM":21460.5,"OTHER":9}"#,
                expected: Ok(Some(21460.5)),
            },
            TestCase {
                // TC1: symbol absent
                input: r#"{"OTHER":9}"#,
                expected: Ok(None),
            },
            TestCase {
                // TC2: stock record as served by the market engine
                input: r#"{"NIFTY_SIM":{"Ticker":"NIFTY_SIM","Price":21455.25,"Volatility":0.15}}"#,
                expected: Ok(Some(21455.25)),
            },
            TestCase {
                // TC3: not json
                input: "hello",
                expected: Err(()),
            },
            TestCase {
                // TC4: json but not a mapping
                input: "[1,2,3]",
                expected: Err(()),
            },
            TestCase {
                // TC5: price of the wrong type
                input: r#"{"NIFTY_SIM":"cheap"}"#,
                expected: Err(()),
            },
            TestCase {
                // TC6: non-positive price
                input: r#"{"NIFTY_SIM":0}"#,
                expected: Err(()),
            },
            TestCase {
                // TC7: malformed sibling entry does not matter
                input: r#"{"NIFTY_SIM":100.0,"OTHER":"n/a"}"#,
                expected: Ok(Some(100.0)),
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = parse_frame(test.input, "NIFTY_SIM").map_err(|_| ());
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_config_builder() {
        let config = FeedConfig::new("ws://localhost:8080/ws", "AAPL")
            .with_ping_interval(Duration::from_secs(15))
            .with_read_timeout(Duration::from_secs(60))
            .with_reconnect_delay(Duration::from_secs(5), Duration::from_secs(2))
            .with_channel_buffer_size(500);

        assert_eq!(config.url, "ws://localhost:8080/ws");
        assert_eq!(config.ticker, "AAPL");
        assert_eq!(config.ping_interval, Duration::from_secs(15));
        assert_eq!(config.read_timeout, Duration::from_secs(60));
        assert_eq!(config.reconnect_delay, Duration::from_secs(5));
        // max is never below the initial delay
        assert_eq!(config.max_reconnect_delay, Duration::from_secs(5));
        assert_eq!(config.channel_buffer_size, 500);
    }

    #[tokio::test]
    async fn test_connect_failure_is_connection_error() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = FeedClient::new(FeedConfig::new(format!("ws://{}/ws", addr), "NIFTY_SIM"));
        let result = client.connect().await;
        assert!(matches!(result, Err(FeedError::Connection { .. })));
    }

    #[tokio::test]
    async fn test_feed_emits_only_subscribed_ticks() {
        let url = spawn_frame_server(vec![
            r#"{"NIFTY_SIM":21460.5,"OTHER":9}"#.to_string(),
            "garbage".to_string(),
            r#"{"OTHER":10}"#.to_string(),
            r#"{"NIFTY_SIM":21461.0}"#.to_string(),
        ])
        .await;

        let (handle, mut rx) = FeedClient::new(FeedConfig::new(url, "NIFTY_SIM"))
            .connect()
            .await
            .unwrap();

        assert_eq!(recv_event(&mut rx).await, FeedEvent::Status(ConnectionStatus::Connected));

        let prices: Vec<f64> = {
            let mut prices = Vec::new();
            while prices.len() < 2 {
                match recv_event(&mut rx).await {
                    FeedEvent::Tick(tick) => {
                        assert_eq!(tick.ticker, "NIFTY_SIM");
                        prices.push(tick.price);
                    }
                    other => panic!("unexpected event {:?}", other),
                }
            }
            prices
        };
        assert_eq!(prices, vec![21460.5, 21461.0]);

        handle.close();
        handle.close();
        assert!(handle.is_closed());

        // Supervisor exits and drops the sender
        let end = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        assert_eq!(end, None);
    }

    #[tokio::test]
    async fn test_feed_reports_loss_and_reconnects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            // First connection is dropped straight away
            let (stream, _) = listener.accept().await.unwrap();
            let ws = accept_async(stream).await.unwrap();
            drop(ws);

            // Second connection serves one frame
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            ws.send(Message::Text(r#"{"NIFTY_SIM":101.5}"#.into())).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                if msg.is_close() {
                    break;
                }
            }
        });

        let config = FeedConfig::new(format!("ws://{}/ws", addr), "NIFTY_SIM")
            .with_reconnect_delay(Duration::from_millis(10), Duration::from_millis(50));
        let (handle, mut rx) = FeedClient::new(config).connect().await.unwrap();

        let expected = vec![
            FeedEvent::Status(ConnectionStatus::Connected),
            FeedEvent::Status(ConnectionStatus::Disconnected),
            FeedEvent::Status(ConnectionStatus::Reconnecting),
            FeedEvent::Status(ConnectionStatus::Connected),
        ];
        for event in expected {
            assert_eq!(recv_event(&mut rx).await, event);
        }

        match recv_event(&mut rx).await {
            FeedEvent::Tick(tick) => assert_eq!(tick.price, 101.5),
            other => panic!("unexpected event {:?}", other),
        }

        handle.close();
    }

    #[tokio::test]
    async fn test_supervisor_future_is_send() {
        fn assert_send<T: Send>(_: &T) {}

        let url = spawn_frame_server(Vec::new()).await;
        let (ws_stream, _) = connect_async(&url).await.unwrap();
        let (event_tx, _event_rx) = mpsc::channel(1);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let supervisor =
            run_feed_supervisor(FeedConfig::new(url, "NIFTY_SIM"), ws_stream, event_tx, shutdown_rx);
        assert_send(&supervisor);
    }

    #[tokio::test]
    async fn test_close_during_backoff_stops_supervisor() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = accept_async(stream).await.unwrap();
            drop(ws);
            // Keep the listener alive without accepting again
            std::future::pending::<()>().await;
        });

        let config = FeedConfig::new(format!("ws://{}/ws", addr), "NIFTY_SIM")
            .with_reconnect_delay(Duration::from_secs(30), Duration::from_secs(60));
        let (handle, mut rx) = FeedClient::new(config).connect().await.unwrap();

        assert_eq!(recv_event(&mut rx).await, FeedEvent::Status(ConnectionStatus::Connected));
        assert_eq!(recv_event(&mut rx).await, FeedEvent::Status(ConnectionStatus::Disconnected));

        handle.close();
        let end = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        assert_eq!(end, None);

        tokio::time::timeout(Duration::from_secs(5), async {
            while !handle.is_finished() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("supervisor task did not exit");
    }
}
