//! Quant Terminal - Shared Library
//!
//! Client-side trading terminal for a single instrument:
//! - Live price feed over WebSocket with reconnect
//! - Rolling price history seeded from the history endpoint
//! - Authenticated market orders with session expiry handling
//!
//! The library includes:
//! - Core data types for ticks, history samples and orders
//! - Feed, backfill, order and auth clients
//! - The terminal controller that owns the view state

pub mod shared;

// Re-export commonly used types for convenience
pub use shared::types::{Fill, HistorySample, Order, OrderFailureKind, OrderResult, Side, Tick};

pub use shared::websocket::{ConnectionStatus, FeedClient, FeedConfig, FeedEvent, FeedHandle};

pub use shared::auth::AuthClient;
pub use shared::backfill::{HistorySource, HttpHistoryClient};
pub use shared::buffer::RollingBuffer;
pub use shared::config::TerminalConfig;
pub use shared::error::{AuthError, BackfillError, ConfigError, FeedError, SessionError};
pub use shared::order::{GatewayError, HttpOrderGateway, OrderClient, OrderGateway};
pub use shared::session::{FileSessionStore, MemorySessionStore, Session, SessionStore};

// Terminal controller
pub use shared::controller::{
    ControllerConfig, Notice, Phase, TerminalController, TerminalHandle, TerminalSnapshot,
};
