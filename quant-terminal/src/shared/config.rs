//! Terminal configuration from environment variables

use std::{path::PathBuf, str::FromStr, time::Duration};

use url::Url;

use super::{
    buffer::DEFAULT_HISTORY_CAPACITY,
    error::ConfigError,
    http::endpoint,
    order::DEFAULT_ORDER_TIMEOUT,
    websocket::FeedConfig,
};

/// Everything the terminal needs to reach the trading API
#[derive(Debug, Clone)]
pub struct TerminalConfig {
    /// REST base URL (history, orders, auth)
    pub api_url: Url,
    /// Market data WebSocket URL
    pub ws_url: String,
    /// Displayed instrument
    pub ticker: String,
    pub history_capacity: usize,
    pub order_quantity: u32,
    pub order_timeout: Duration,
    /// Balance shown until the first server-confirmed fill
    pub initial_balance: f64,
    pub session_file: PathBuf,
    pub log_file: PathBuf,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            api_url: Url::parse("http://127.0.0.1:8080").expect("static url is valid"),
            ws_url: "ws://127.0.0.1:8080/ws".to_string(),
            ticker: "NIFTY_SIM".to_string(),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            order_quantity: 1,
            order_timeout: DEFAULT_ORDER_TIMEOUT,
            initial_balance: 100_000.0,
            session_file: PathBuf::from(".quant-terminal/session.json"),
            log_file: PathBuf::from("quant-terminal.log"),
        }
    }
}

impl TerminalConfig {
    /// Read `QT_*` environment variables, falling back to defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let api_url = match lookup("QT_API_URL") {
            Some(raw) => Url::parse(&raw).map_err(|e| ConfigError::Url(format!("{}: {}", raw, e)))?,
            None => defaults.api_url,
        };

        Ok(Self {
            api_url,
            ws_url: lookup("QT_WS_URL").unwrap_or(defaults.ws_url),
            ticker: lookup("QT_TICKER").unwrap_or(defaults.ticker),
            history_capacity: parse_var(&lookup, "QT_HISTORY_CAPACITY")?
                .unwrap_or(defaults.history_capacity),
            order_quantity: parse_var(&lookup, "QT_ORDER_QUANTITY")?
                .unwrap_or(defaults.order_quantity),
            order_timeout: parse_var::<u64, _>(&lookup, "QT_ORDER_TIMEOUT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.order_timeout),
            initial_balance: parse_var(&lookup, "QT_INITIAL_BALANCE")?
                .unwrap_or(defaults.initial_balance),
            session_file: lookup("QT_SESSION_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.session_file),
            log_file: lookup("QT_LOG_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.log_file),
        })
    }

    pub fn feed_config(&self) -> FeedConfig {
        FeedConfig::new(self.ws_url.clone(), self.ticker.clone())
    }

    pub fn history_url(&self) -> Result<Url, ConfigError> {
        endpoint(&self.api_url, "history")
    }

    pub fn order_url(&self) -> Result<Url, ConfigError> {
        endpoint(&self.api_url, "order")
    }

    pub fn login_url(&self) -> Result<Url, ConfigError> {
        endpoint(&self.api_url, "login")
    }

    pub fn register_url(&self) -> Result<Url, ConfigError> {
        endpoint(&self.api_url, "register")
    }
}

fn parse_var<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => {
            let value = raw.trim().parse::<T>().map_err(|_| ConfigError::Invalid {
                key,
                value: raw.clone(),
            })?;
            Ok(Some(value))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = TerminalConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.ticker, "NIFTY_SIM");
        assert_eq!(config.history_capacity, 60);
        assert_eq!(config.order_quantity, 1);
        assert_eq!(config.order_timeout, Duration::from_secs(10));
        assert_eq!(config.initial_balance, 100_000.0);
        assert_eq!(config.history_url().unwrap().as_str(), "http://127.0.0.1:8080/history");
        assert_eq!(config.feed_config().url, "ws://127.0.0.1:8080/ws");
    }

    #[test]
    fn test_env_overrides() {
        let config = TerminalConfig::from_lookup(lookup_from(&[
            ("QT_API_URL", "https://desk.example.com/api"),
            ("QT_WS_URL", "wss://desk.example.com/ws"),
            ("QT_TICKER", "AAPL"),
            ("QT_HISTORY_CAPACITY", "120"),
            ("QT_ORDER_TIMEOUT_MS", "2500"),
            ("QT_INITIAL_BALANCE", "5000.5"),
        ]))
        .unwrap();

        assert_eq!(config.order_url().unwrap().as_str(), "https://desk.example.com/api/order");
        assert_eq!(config.feed_config().ticker, "AAPL");
        assert_eq!(config.history_capacity, 120);
        assert_eq!(config.order_timeout, Duration::from_millis(2500));
        assert_eq!(config.initial_balance, 5000.5);
    }

    #[test]
    fn test_invalid_values() {
        struct TestCase {
            key: &'static str,
            value: &'static str,
        }

        let tests = vec![
            TestCase { key: "QT_HISTORY_CAPACITY", value: "sixty" }, // TC0
            TestCase { key: "QT_ORDER_QUANTITY", value: "-1" },      // TC1
            TestCase { key: "QT_ORDER_TIMEOUT_MS", value: "1.5" },   // TC2
            TestCase { key: "QT_API_URL", value: "not a url" },      // TC3
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let result = TerminalConfig::from_lookup(lookup_from(&[(test.key, test.value)]));
            assert!(result.is_err(), "TC{} failed", index);
        }
    }
}
