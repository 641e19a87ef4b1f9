//! Authentication service client
//!
//! `login` exchanges credentials for a token and persists the resulting
//! [`Session`]; `register` creates an account.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use url::Url;

use super::{
    error::AuthError,
    http::service_error_message,
    session::{Session, SessionStore},
};

#[derive(Debug, Serialize)]
struct Credentials<'a> {
    user_id: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct RegisterResponse {
    #[serde(default)]
    message: Option<String>,
}

pub struct AuthClient {
    client: reqwest::Client,
    login_url: Url,
    register_url: Url,
    sessions: Arc<dyn SessionStore>,
}

impl AuthClient {
    pub fn new(
        client: reqwest::Client,
        login_url: Url,
        register_url: Url,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            client,
            login_url,
            register_url,
            sessions,
        }
    }

    /// Log in and persist the session
    pub async fn login(&self, user_id: &str, password: &str) -> Result<Session, AuthError> {
        let body = self.post(&self.login_url, user_id, password).await?;

        let response: LoginResponse = serde_json::from_str(&body)
            .map_err(|e| AuthError::Http(format!("unexpected login response: {}", e)))?;
        let session = Session::new(response.token, user_id);
        if !session.is_valid() {
            return Err(AuthError::Rejected("Login returned an empty token".to_string()));
        }

        self.sessions.save(&session)?;
        info!(user_id, "logged in");
        Ok(session)
    }

    /// Create an account. Returns the service's confirmation message.
    pub async fn register(&self, user_id: &str, password: &str) -> Result<String, AuthError> {
        let body = self.post(&self.register_url, user_id, password).await?;

        let message = serde_json::from_str::<RegisterResponse>(&body)
            .ok()
            .and_then(|r| r.message)
            .unwrap_or_else(|| "User created".to_string());
        info!(user_id, "registered");
        Ok(message)
    }

    /// Drop the stored session
    pub fn logout(&self) -> Result<bool, AuthError> {
        Ok(self.sessions.invalidate()?)
    }

    async fn post(&self, url: &Url, user_id: &str, password: &str) -> Result<String, AuthError> {
        let response = self
            .client
            .post(url.clone())
            .json(&Credentials { user_id, password })
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let message = service_error_message(&body)
                .unwrap_or_else(|| format!("request failed with status {}", status.as_u16()));
            warn!(user_id, status = status.as_u16(), %message, "authentication rejected");
            return Err(AuthError::Rejected(message));
        }

        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::{
        http::{endpoint, mock},
        session::MemorySessionStore,
    };

    async fn client_for(response: mock::MockResponse) -> (AuthClient, Arc<MemorySessionStore>, mock::Recorded) {
        let server = mock::spawn(response).await;
        let store = Arc::new(MemorySessionStore::new());
        let client = AuthClient::new(
            reqwest::Client::new(),
            endpoint(&server.base_url, "login").unwrap(),
            endpoint(&server.base_url, "register").unwrap(),
            store.clone(),
        );
        (client, store, server.recorded)
    }

    #[tokio::test]
    async fn test_login_persists_session() {
        let (client, store, recorded) =
            client_for(mock::MockResponse::json(200, r#"{"token":"jwt-token"}"#)).await;

        let session = client.login("trader1", "hunter2").await.unwrap();

        assert_eq!(session, Session::new("jwt-token", "trader1"));
        assert_eq!(store.load().unwrap(), Some(session));
        let request = recorded.last().unwrap();
        assert!(request.starts_with("POST /login "), "{}", request);
        assert!(request.contains(r#""user_id":"trader1""#), "{}", request);

        assert!(client.logout().unwrap());
        assert_eq!(store.load().unwrap(), None);
    }

    #[tokio::test]
    async fn test_login_rejected_with_service_message() {
        let (client, store, _) =
            client_for(mock::MockResponse::json(401, r#"{"error":"Invalid credentials"}"#)).await;

        let error = client.login("trader1", "wrong").await.unwrap_err();

        assert_eq!(error, AuthError::Rejected("Invalid credentials".to_string()));
        assert_eq!(store.load().unwrap(), None);
    }

    #[tokio::test]
    async fn test_register() {
        let (client, _, recorded) =
            client_for(mock::MockResponse::json(200, r#"{"message":"User created"}"#)).await;
        assert_eq!(client.register("trader2", "pw").await.unwrap(), "User created");
        assert!(recorded.last().unwrap().starts_with("POST /register "));

        let (client, _, _) =
            client_for(mock::MockResponse::json(400, r#"{"error":"User already exists"}"#)).await;
        assert_eq!(
            client.register("trader2", "pw").await,
            Err(AuthError::Rejected("User already exists".to_string()))
        );
    }
}
