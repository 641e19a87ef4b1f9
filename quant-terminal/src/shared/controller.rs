//! Terminal controller
//!
//! Single owner of the terminal's view state (current price, cash balance,
//! rolling history). Feed events, backfill results, order completions and
//! user commands all arrive on one task and are applied in sequence, so the
//! two concurrent producers (tick stream, order round trips) never write
//! the state at the same time.
//!
//! Observers read [`TerminalSnapshot`]s from a watch channel and receive
//! [`Notice`]s for anything the user should be told about.

use std::{collections::VecDeque, sync::Arc, time::Duration};

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use super::{
    backfill::HistorySource,
    buffer::RollingBuffer,
    config::TerminalConfig,
    error::{BackfillError, FeedError},
    order::{unauthenticated, OrderClient},
    session::{Session, SessionStore},
    types::{Fill, HistorySample, Order, OrderFailureKind, OrderResult, Side, Tick},
    websocket::{ConnectionStatus, FeedClient, FeedConfig, FeedEvent, FeedHandle},
};

/// Controller lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No session; the user must log in
    Unauthenticated,
    /// Backfill in flight, live ticks are queued
    Loading,
    /// Feed active, history updating
    Live,
    /// At least one order in flight; ticks keep flowing
    Trading,
    /// The order service rejected the session. Terminal.
    SessionExpired,
    /// Unmounted
    Closed,
}

impl Phase {
    pub fn label(&self) -> &'static str {
        match self {
            Phase::Unauthenticated => "LOGIN REQUIRED",
            Phase::Loading => "LOADING",
            Phase::Live => "LIVE",
            Phase::Trading => "TRADING",
            Phase::SessionExpired => "SESSION EXPIRED",
            Phase::Closed => "CLOSED",
        }
    }

    fn wants_feed(&self) -> bool {
        matches!(self, Phase::Loading | Phase::Live | Phase::Trading)
    }
}

/// Events for the presentation layer
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    /// Navigate to the login flow
    LoginRequired,
    OrderFilled { side: Side, fill: Fill },
    /// Order failed; the terminal remains usable
    OrderRejected {
        kind: OrderFailureKind,
        message: String,
    },
    /// Blocking notice, then navigate to the login flow
    SessionExpired,
    /// Feed could not be reached; a retry is scheduled
    Disconnected(String),
    /// Chart starts empty
    BackfillFailed(String),
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub ticker: String,
    pub order_quantity: u32,
    pub history_capacity: usize,
    pub initial_balance: f64,
    pub feed: FeedConfig,
}

impl From<&TerminalConfig> for ControllerConfig {
    fn from(config: &TerminalConfig) -> Self {
        Self {
            ticker: config.ticker.clone(),
            order_quantity: config.order_quantity,
            history_capacity: config.history_capacity,
            initial_balance: config.initial_balance,
            feed: config.feed_config(),
        }
    }
}

/// Read-only copy of the view state
#[derive(Debug, Clone, PartialEq)]
pub struct TerminalSnapshot {
    pub ticker: String,
    pub phase: Phase,
    pub connection: ConnectionStatus,
    pub current_price: Option<f64>,
    pub balance: f64,
    pub history: Vec<HistorySample>,
    pub pending_orders: usize,
    pub user_id: Option<String>,
}

/// Canonical mutable view state
#[derive(Debug)]
struct ViewState {
    current_price: Option<f64>,
    balance: f64,
    history: RollingBuffer,
}

enum Command {
    Submit(Side),
    Logout,
    Unmount(oneshot::Sender<()>),
    FeedRetrying,
    FeedConnected(Result<(FeedHandle, mpsc::Receiver<FeedEvent>), FeedError>),
    Backfilled(Result<Vec<HistorySample>, BackfillError>),
    OrderCompleted { order: Order, result: OrderResult },
}

pub struct TerminalController {
    config: ControllerConfig,
    sessions: Arc<dyn SessionStore>,
    history_source: Arc<dyn HistorySource>,
    orders: OrderClient,
}

impl TerminalController {
    pub fn new(
        config: ControllerConfig,
        sessions: Arc<dyn SessionStore>,
        history_source: Arc<dyn HistorySource>,
        orders: OrderClient,
    ) -> Self {
        Self {
            config,
            sessions,
            history_source,
            orders,
        }
    }

    /// Start the controller task.
    ///
    /// Returns a handle for commands and snapshots, and the notice stream.
    /// Dropping every handle unmounts the terminal.
    pub fn mount(self) -> (TerminalHandle, mpsc::UnboundedReceiver<Notice>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();

        let view = ViewState {
            current_price: None,
            balance: self.config.initial_balance,
            history: RollingBuffer::new(self.config.history_capacity),
        };

        let (state_tx, state_rx) = watch::channel(TerminalSnapshot {
            ticker: self.config.ticker.clone(),
            phase: Phase::Loading,
            connection: ConnectionStatus::Disconnected,
            current_price: None,
            balance: self.config.initial_balance,
            history: Vec::new(),
            pending_orders: 0,
            user_id: None,
        });

        let mut actor = TerminalActor {
            session: None,
            phase: Phase::Loading,
            connection: ConnectionStatus::Disconnected,
            view,
            queued_ticks: VecDeque::new(),
            pending_orders: 0,
            feed: None,
            feed_rx: None,
            connect_attempts: 0,
            inbox_tx: command_tx.downgrade(),
            inbox: command_rx,
            notices: notice_tx,
            state_tx,
            config: self.config,
            sessions: self.sessions,
            history_source: self.history_source,
            orders: self.orders,
        };

        actor.on_mount();
        actor.publish();

        tokio::spawn(actor.run());

        (
            TerminalHandle {
                commands: command_tx,
                state_rx,
            },
            notice_rx,
        )
    }
}

/// Handle to a mounted terminal
#[derive(Clone)]
pub struct TerminalHandle {
    commands: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<TerminalSnapshot>,
}

impl TerminalHandle {
    pub fn buy(&self) {
        self.submit(Side::Buy);
    }

    pub fn sell(&self) {
        self.submit(Side::Sell);
    }

    /// Submit a market order for the configured quantity. Never blocks.
    pub fn submit(&self, side: Side) {
        let _ = self.commands.send(Command::Submit(side));
    }

    pub fn logout(&self) {
        let _ = self.commands.send(Command::Logout);
    }

    /// Close the feed and stop the controller. Results that resolve
    /// afterwards are discarded.
    pub async fn unmount(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.commands.send(Command::Unmount(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }

    pub fn snapshot(&self) -> TerminalSnapshot {
        self.state_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TerminalSnapshot> {
        self.state_rx.clone()
    }
}

struct TerminalActor {
    config: ControllerConfig,
    sessions: Arc<dyn SessionStore>,
    history_source: Arc<dyn HistorySource>,
    orders: OrderClient,

    session: Option<Session>,
    phase: Phase,
    connection: ConnectionStatus,
    view: ViewState,
    /// Ticks received before the backfill resolved, bounded by history capacity
    queued_ticks: VecDeque<Tick>,
    pending_orders: usize,

    feed: Option<FeedHandle>,
    feed_rx: Option<mpsc::Receiver<FeedEvent>>,
    connect_attempts: u32,

    inbox_tx: mpsc::WeakUnboundedSender<Command>,
    inbox: mpsc::UnboundedReceiver<Command>,
    notices: mpsc::UnboundedSender<Notice>,
    state_tx: watch::Sender<TerminalSnapshot>,
}

/// Delay before the next connect attempt, doubling up to the configured max
fn reconnect_delay(feed: &FeedConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    feed.reconnect_delay
        .checked_mul(1u32 << exponent)
        .unwrap_or(feed.max_reconnect_delay)
        .min(feed.max_reconnect_delay)
}

async fn next_feed_event(feed_rx: &mut Option<mpsc::Receiver<FeedEvent>>) -> Option<FeedEvent> {
    match feed_rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl TerminalActor {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.inbox.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => {
                        debug!("all terminal handles dropped");
                        self.unmount();
                        return;
                    }
                },
                event = next_feed_event(&mut self.feed_rx) => match event {
                    Some(event) => self.on_feed_event(event),
                    None => {
                        debug!("feed event stream ended");
                        self.feed = None;
                        self.feed_rx = None;
                        self.connection = ConnectionStatus::Disconnected;
                    }
                },
            }
            if self.phase == Phase::Closed {
                return;
            }
            self.publish();
        }
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Submit(side) => self.on_submit(side),
            Command::Logout => self.logout(),
            Command::FeedRetrying => {
                if self.phase.wants_feed() && self.feed.is_none() {
                    self.connection = ConnectionStatus::Reconnecting;
                }
            }
            Command::FeedConnected(result) => self.on_feed_connected(result),
            Command::Backfilled(result) => self.on_backfilled(result),
            Command::OrderCompleted { order, result } => self.on_order_completed(order, result),
            Command::Unmount(ack) => {
                self.unmount();
                let _ = ack.send(());
            }
        }
    }

    fn on_mount(&mut self) {
        let session = match self.sessions.load() {
            Ok(session) => session.filter(Session::is_valid),
            Err(e) => {
                warn!(error = %e, "could not read session");
                None
            }
        };

        let Some(session) = session else {
            info!("no session, login required");
            self.phase = Phase::Unauthenticated;
            self.notify(Notice::LoginRequired);
            return;
        };

        info!(user_id = %session.user_id, ticker = %self.config.ticker, "mounting terminal");
        self.session = Some(session);
        self.phase = Phase::Loading;

        // Backfill and feed connect race; ticks that win are queued
        self.spawn_backfill();
        self.spawn_feed_connect(Duration::ZERO);
    }

    fn spawn_backfill(&self) {
        let source = Arc::clone(&self.history_source);
        let ticker = self.config.ticker.clone();
        let inbox = self.inbox_tx.clone();

        tokio::spawn(async move {
            let result = source.get_history(&ticker).await;
            if let Some(tx) = inbox.upgrade() {
                let _ = tx.send(Command::Backfilled(result));
            }
        });
    }

    fn spawn_feed_connect(&self, delay: Duration) {
        let client = FeedClient::new(self.config.feed.clone());
        let inbox = self.inbox_tx.clone();

        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
                match inbox.upgrade() {
                    Some(tx) if tx.send(Command::FeedRetrying).is_ok() => {}
                    _ => return,
                }
            }
            let result = client.connect().await;
            // An undelivered handle closes itself on drop
            if let Some(tx) = inbox.upgrade() {
                let _ = tx.send(Command::FeedConnected(result));
            }
        });
    }

    fn on_feed_connected(
        &mut self,
        result: Result<(FeedHandle, mpsc::Receiver<FeedEvent>), FeedError>,
    ) {
        if !self.phase.wants_feed() {
            if let Ok((handle, _)) = result {
                debug!(phase = ?self.phase, "closing feed connected after teardown");
                handle.close();
            }
            return;
        }

        match result {
            Ok((handle, rx)) => {
                self.feed = Some(handle);
                self.feed_rx = Some(rx);
                self.connect_attempts = 0;
            }
            Err(e) => {
                if self.connect_attempts == 0 {
                    self.notify(Notice::Disconnected(e.to_string()));
                }
                self.connect_attempts = self.connect_attempts.saturating_add(1);
                let delay = reconnect_delay(&self.config.feed, self.connect_attempts);
                warn!(error = %e, attempt = self.connect_attempts, ?delay, "feed unavailable, retrying");
                self.connection = ConnectionStatus::Disconnected;
                self.spawn_feed_connect(delay);
            }
        }
    }

    fn on_feed_event(&mut self, event: FeedEvent) {
        match event {
            FeedEvent::Tick(tick) => match self.phase {
                Phase::Loading => {
                    self.view.current_price = Some(tick.price);
                    if self.queued_ticks.len() >= self.view.history.capacity() {
                        self.queued_ticks.pop_front();
                    }
                    self.queued_ticks.push_back(tick);
                }
                Phase::Live | Phase::Trading => self.apply_tick(&tick),
                _ => {}
            },
            FeedEvent::Status(status) => {
                debug!(?status, "feed connection status");
                self.connection = status;
            }
        }
    }

    fn apply_tick(&mut self, tick: &Tick) {
        self.view.current_price = Some(tick.price);
        self.view.history.append(HistorySample::from(tick));
    }

    fn on_backfilled(&mut self, result: Result<Vec<HistorySample>, BackfillError>) {
        if self.phase != Phase::Loading {
            debug!(phase = ?self.phase, "discarding backfill");
            return;
        }

        match result {
            Ok(samples) => self.view.history.seed(samples),
            Err(e) => {
                warn!(error = %e, ticker = %self.config.ticker, "backfill failed, chart starts empty");
                self.view.history.seed(Vec::new());
                self.notify(Notice::BackfillFailed(e.to_string()));
            }
        }

        let replayed = self.queued_ticks.len();
        while let Some(tick) = self.queued_ticks.pop_front() {
            self.apply_tick(&tick);
        }

        self.phase = if self.pending_orders > 0 {
            Phase::Trading
        } else {
            Phase::Live
        };
        info!(
            history = self.view.history.len(),
            replayed,
            "terminal live"
        );
    }

    fn on_submit(&mut self, side: Side) {
        let order = Order::new(self.config.ticker.clone(), self.config.order_quantity, side);

        let Some(session) = self.session.clone().filter(Session::is_valid) else {
            if let OrderResult::Failure { kind, message } = unauthenticated() {
                self.notify(Notice::OrderRejected { kind, message });
            }
            return;
        };

        self.pending_orders += 1;
        if self.phase == Phase::Live {
            self.phase = Phase::Trading;
        }
        debug!(%side, pending = self.pending_orders, "order submitted");

        let orders = self.orders.clone();
        let inbox = self.inbox_tx.clone();
        tokio::spawn(async move {
            let result = orders.submit(&order, Some(&session)).await;
            let delivered = inbox
                .upgrade()
                .is_some_and(|tx| tx.send(Command::OrderCompleted { order, result }).is_ok());
            if !delivered {
                debug!("discarding order result after unmount");
            }
        });
    }

    fn on_order_completed(&mut self, order: Order, result: OrderResult) {
        self.pending_orders = self.pending_orders.saturating_sub(1);

        match result {
            OrderResult::Success(fill) => {
                if self.session.is_some() {
                    self.view.balance = fill.new_balance;
                    self.notify(Notice::OrderFilled {
                        side: order.side,
                        fill,
                    });
                } else {
                    info!(?fill, "discarding fill received after session ended");
                }
            }
            OrderResult::Failure {
                kind: OrderFailureKind::SessionExpired,
                ..
            } => self.expire_session(),
            OrderResult::Failure { kind, message } => {
                self.notify(Notice::OrderRejected { kind, message });
            }
        }

        if self.phase == Phase::Trading && self.pending_orders == 0 {
            self.phase = Phase::Live;
        }
    }

    /// Invalidate the session once, however many in-flight orders report it
    fn expire_session(&mut self) {
        let Some(session) = self.session.take() else {
            debug!("session already invalidated");
            return;
        };

        warn!(user_id = %session.user_id, "session expired");
        self.close_feed();
        self.queued_ticks.clear();
        self.phase = Phase::SessionExpired;
        if let Err(e) = self.sessions.invalidate() {
            warn!(error = %e, "failed to invalidate session");
        }
        self.notify(Notice::SessionExpired);
    }

    fn logout(&mut self) {
        if let Some(session) = self.session.take() {
            info!(user_id = %session.user_id, "logging out");
            if let Err(e) = self.sessions.invalidate() {
                warn!(error = %e, "failed to invalidate session");
            }
        }
        self.close_feed();
        self.queued_ticks.clear();
        self.phase = Phase::Unauthenticated;
        self.notify(Notice::LoginRequired);
    }

    fn unmount(&mut self) {
        self.close_feed();
        self.queued_ticks.clear();
        self.phase = Phase::Closed;
        info!(pending_orders = self.pending_orders, "terminal unmounted");
        self.publish();
    }

    fn close_feed(&mut self) {
        if let Some(feed) = self.feed.take() {
            feed.close();
        }
        self.feed_rx = None;
        self.connection = ConnectionStatus::Disconnected;
    }

    fn notify(&self, notice: Notice) {
        let _ = self.notices.send(notice);
    }

    fn publish(&self) {
        self.state_tx.send_replace(TerminalSnapshot {
            ticker: self.config.ticker.clone(),
            phase: self.phase,
            connection: self.connection,
            current_price: self.view.current_price,
            balance: self.view.balance,
            history: self.view.history.to_vec(),
            pending_orders: self.pending_orders,
            user_id: self.session.as_ref().map(|s| s.user_id.clone()),
        });
    }
}
