//! Core data types for ticks, history samples and orders
//!
//! These types match the JSON formats served by the trading API
//! at http://127.0.0.1:8080

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One timestamped price observation for a ticker, produced by the feed
#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    /// Instrument symbol (e.g., "NIFTY_SIM")
    pub ticker: String,
    /// Last traded price
    pub price: f64,
    /// Time the frame carrying this price was received
    pub observed_at: DateTime<Utc>,
}

impl Tick {
    pub fn new(ticker: impl Into<String>, price: f64, observed_at: DateTime<Utc>) -> Self {
        Self {
            ticker: ticker.into(),
            price,
            observed_at,
        }
    }
}

/// A single chart point
///
/// Served by `GET /history` as `{"time": ..., "val": ...}`
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct HistorySample {
    #[serde(rename = "time", alias = "timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "val", alias = "value")]
    pub value: f64,
}

impl HistorySample {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }
}

impl From<&Tick> for HistorySample {
    fn from(tick: &Tick) -> Self {
        Self {
            timestamp: tick.observed_at,
            value: tick.price,
        }
    }
}

/// Order side (Buy or Sell)
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub enum Side {
    #[serde(rename = "BUY")]
    Buy,
    #[serde(rename = "SELL")]
    Sell,
}

impl Side {
    /// Wire representation expected by the order endpoint
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }

    pub fn is_buy(&self) -> bool {
        matches!(self, Side::Buy)
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Market order for the displayed instrument. Not persisted beyond the call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Order {
    pub ticker: String,
    pub quantity: u32,
    pub side: Side,
}

impl Order {
    pub fn new(ticker: impl Into<String>, quantity: u32, side: Side) -> Self {
        Self {
            ticker: ticker.into(),
            quantity,
            side,
        }
    }

    pub fn buy(ticker: impl Into<String>, quantity: u32) -> Self {
        Self::new(ticker, quantity, Side::Buy)
    }

    pub fn sell(ticker: impl Into<String>, quantity: u32) -> Self {
        Self::new(ticker, quantity, Side::Sell)
    }
}

/// Server confirmation of a filled order
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct Fill {
    pub execution_price: f64,
    pub new_balance: f64,
}

/// Classification of a failed order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderFailureKind {
    /// No session held locally, nothing was sent
    Unauthenticated,
    /// Service rejected the bearer token
    SessionExpired,
    /// Business rejection, transport failure or server error
    Rejected,
    /// No response within the configured order timeout
    Timeout,
}

impl OrderFailureKind {
    /// Failures after which the terminal remains usable
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Rejected | Self::Timeout)
    }
}

/// Outcome of an order submission
#[derive(Debug, Clone, PartialEq)]
pub enum OrderResult {
    Success(Fill),
    Failure {
        kind: OrderFailureKind,
        message: String,
    },
}

impl OrderResult {
    pub fn success(execution_price: f64, new_balance: f64) -> Self {
        Self::Success(Fill {
            execution_price,
            new_balance,
        })
    }

    pub fn failure(kind: OrderFailureKind, message: impl Into<String>) -> Self {
        Self::Failure {
            kind,
            message: message.into(),
        }
    }

    pub fn failure_kind(&self) -> Option<OrderFailureKind> {
        match self {
            Self::Success(_) => None,
            Self::Failure { kind, .. } => Some(*kind),
        }
    }
}
