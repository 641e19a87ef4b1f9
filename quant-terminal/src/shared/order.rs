//! Order execution client
//!
//! Sends authenticated market orders and classifies every outcome into an
//! [`OrderResult`]. The client never mutates terminal state; applying a fill
//! is the controller's job.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use tracing::{debug, info, warn};
use url::Url;

use super::{
    http::service_error_message,
    session::Session,
    types::{Fill, Order, OrderFailureKind, OrderResult, Side},
};

/// Default time allowed for an order round trip
pub const DEFAULT_ORDER_TIMEOUT: Duration = Duration::from_secs(10);

/// Failure reported by an [`OrderGateway`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Bearer token rejected (HTTP 401)
    Unauthorized,
    /// Service answered with an error status
    Rejected { status: u16, message: Option<String> },
    /// No usable response from the service
    Transport(String),
}

/// Transport for order placement
#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn place_order(&self, order: &Order, session: &Session) -> Result<Fill, GatewayError>;
}

/// Body of `POST /order`
#[derive(Debug, Serialize)]
struct OrderRequest<'a> {
    user_id: &'a str,
    ticker: &'a str,
    quantity: u32,
    side: Side,
}

/// `POST /order` with a bearer token
#[derive(Debug, Clone)]
pub struct HttpOrderGateway {
    client: reqwest::Client,
    order_url: Url,
}

impl HttpOrderGateway {
    pub fn new(client: reqwest::Client, order_url: Url) -> Self {
        Self { client, order_url }
    }
}

#[async_trait]
impl OrderGateway for HttpOrderGateway {
    async fn place_order(&self, order: &Order, session: &Session) -> Result<Fill, GatewayError> {
        let request = OrderRequest {
            user_id: &session.user_id,
            ticker: &order.ticker,
            quantity: order.quantity,
            side: order.side,
        };

        let response = self
            .client
            .post(self.order_url.clone())
            .bearer_auth(&session.token)
            .json(&request)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(GatewayError::Unauthorized);
        }

        let body = response
            .text()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                message: service_error_message(&body),
            });
        }

        serde_json::from_str::<Fill>(&body).map_err(|e| GatewayError::Rejected {
            status: status.as_u16(),
            message: Some(format!("unexpected order response: {}", e)),
        })
    }
}

/// Classifies gateway outcomes and enforces the order timeout
#[derive(Clone)]
pub struct OrderClient {
    gateway: Arc<dyn OrderGateway>,
    timeout: Duration,
}

impl OrderClient {
    pub fn new(gateway: Arc<dyn OrderGateway>) -> Self {
        Self {
            gateway,
            timeout: DEFAULT_ORDER_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Submit `order` on behalf of `session`.
    ///
    /// Without a usable session this resolves to `Unauthenticated` before
    /// touching the gateway.
    pub async fn submit(&self, order: &Order, session: Option<&Session>) -> OrderResult {
        let session = match session.filter(|s| s.is_valid()) {
            Some(session) => session,
            None => {
                debug!(ticker = %order.ticker, side = %order.side, "order blocked: no session");
                return unauthenticated();
            }
        };

        let placed = tokio::time::timeout(self.timeout, self.gateway.place_order(order, session)).await;

        match placed {
            Ok(Ok(fill)) => {
                info!(
                    ticker = %order.ticker,
                    side = %order.side,
                    quantity = order.quantity,
                    execution_price = fill.execution_price,
                    new_balance = fill.new_balance,
                    "order filled"
                );
                OrderResult::Success(fill)
            }
            Ok(Err(GatewayError::Unauthorized)) => {
                warn!(ticker = %order.ticker, "order rejected: session expired");
                OrderResult::failure(
                    OrderFailureKind::SessionExpired,
                    "Session expired. Please login again.",
                )
            }
            Ok(Err(GatewayError::Rejected { status, message })) => {
                let message = message.unwrap_or_else(|| format!("order failed with status {}", status));
                warn!(ticker = %order.ticker, status, %message, "order rejected");
                OrderResult::failure(OrderFailureKind::Rejected, message)
            }
            Ok(Err(GatewayError::Transport(reason))) => {
                warn!(ticker = %order.ticker, %reason, "order transport failure");
                OrderResult::failure(
                    OrderFailureKind::Rejected,
                    "Trade failed: could not reach the order service",
                )
            }
            Err(_) => {
                warn!(ticker = %order.ticker, timeout_ms = self.timeout.as_millis() as u64, "order timed out");
                OrderResult::failure(
                    OrderFailureKind::Timeout,
                    format!("Trade failed: no response within {}ms", self.timeout.as_millis()),
                )
            }
        }
    }
}

/// Result for an order attempted without a session
pub fn unauthenticated() -> OrderResult {
    OrderResult::failure(OrderFailureKind::Unauthenticated, "Not logged in")
}
