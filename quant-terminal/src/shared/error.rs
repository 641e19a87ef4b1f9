//! Error types for the feed, backfill, auth, session and config layers

use thiserror::Error;

/// Errors raised by the market data feed client.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum FeedError {
    #[error("failed to connect to market data feed at {url}: {reason}")]
    Connection { url: String, reason: String },

    #[error("malformed feed frame: {0}")]
    MalformedMessage(String),
}

/// Errors raised while fetching the chart backfill.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum BackfillError {
    #[error("history request failed: {0}")]
    Http(String),

    #[error("history endpoint returned status {0}")]
    Status(u16),

    #[error("history payload could not be parsed: {0}")]
    Parse(String),
}

/// Errors returned by the authentication service client.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum AuthError {
    /// Human readable message supplied by the service
    #[error("{0}")]
    Rejected(String),

    #[error("authentication request failed: {0}")]
    Http(String),

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Errors raised by a [`SessionStore`](crate::shared::session::SessionStore).
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum SessionError {
    #[error("session storage io error: {0}")]
    Io(String),

    #[error("session storage is corrupt: {0}")]
    Corrupt(String),
}

impl From<std::io::Error> for SessionError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(value: serde_json::Error) -> Self {
        Self::Corrupt(value.to_string())
    }
}

/// Invalid terminal configuration.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },

    #[error("invalid endpoint url {0}")]
    Url(String),
}

impl From<reqwest::Error> for BackfillError {
    fn from(value: reqwest::Error) -> Self {
        Self::Http(value.to_string())
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(value: reqwest::Error) -> Self {
        Self::Http(value.to_string())
    }
}
