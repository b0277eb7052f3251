//! CredentialCache - bearer token for the streaming gateway
//!
//! ## Responsibilities
//!
//! - Login against the auth endpoint (`POST /login`)
//! - Cache the token, honoring an expiry when the endpoint supplies one
//! - Invalidation when a collaborator rejects the token
//!
//! Login is never retried here; retry policy belongs to the caller.

use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

/// Tokens this close to expiry are refreshed instead of reused
const EXPIRY_MARGIN_SECS: i64 = 30;

/// Bearer token plus optional expiry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    /// A credential without expiry is valid until invalidated
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at > now + chrono::Duration::seconds(EXPIRY_MARGIN_SECS),
            None => true,
        }
    }
}

/// Result of a successful login
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginGrant {
    pub token: String,
    /// Lifetime in seconds, when the endpoint states one
    pub expires_in: Option<i64>,
}

/// Auth endpoint
#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn login(&self) -> Result<LoginGrant>;
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    #[serde(alias = "access_token", alias = "accessToken")]
    token: String,
    #[serde(default, alias = "expires_in")]
    expires_in: Option<i64>,
}

/// Decode a login body, accepting an optional `{data: ...}` envelope
fn decode_login(body: Value) -> Result<LoginGrant> {
    let inner = match body {
        Value::Object(mut obj) if !obj.contains_key("token") && obj.contains_key("data") => {
            obj.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    };

    let resp: LoginResponse = serde_json::from_value(inner)
        .map_err(|e| Error::Decode(format!("login response: {}", e)))?;

    if resp.token.is_empty() {
        return Err(Error::Decode("login response carried an empty token".to_string()));
    }

    Ok(LoginGrant {
        token: resp.token,
        expires_in: resp.expires_in,
    })
}

/// reqwest-backed auth endpoint
pub struct HttpAuthApi {
    client: Client,
    base_url: String,
    username: String,
    password: String,
}

impl HttpAuthApi {
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            username: username.into(),
            password: password.into(),
        })
    }
}

#[async_trait]
impl AuthApi for HttpAuthApi {
    async fn login(&self) -> Result<LoginGrant> {
        let url = format!("{}/login", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&LoginRequest {
                username: &self.username,
                password: &self.password,
            })
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(Error::Unauthorized(format!("login rejected: HTTP {}", status.as_u16())));
        }
        if !status.is_success() {
            return Err(Error::api(status, resp.text().await.unwrap_or_default()));
        }

        let body: Value = resp.json().await?;
        decode_login(body)
    }
}

/// CredentialCache instance
pub struct CredentialCache {
    auth: Arc<dyn AuthApi>,
    cached: RwLock<Option<Credential>>,
    /// Serializes logins so concurrent misses share one request
    refresh: Mutex<()>,
}

impl CredentialCache {
    pub fn new(auth: Arc<dyn AuthApi>) -> Self {
        Self {
            auth,
            cached: RwLock::new(None),
            refresh: Mutex::new(()),
        }
    }

    /// Get a valid token (from cache or login)
    pub async fn get_token(&self) -> Result<String> {
        if let Some(token) = self.valid_cached().await {
            return Ok(token);
        }

        let _refresh = self.refresh.lock().await;

        // Another caller may have logged in while we waited.
        if let Some(token) = self.valid_cached().await {
            return Ok(token);
        }

        match self.auth.login().await {
            Ok(grant) => {
                let expires_at = grant
                    .expires_in
                    .map(|secs| Utc::now() + chrono::Duration::seconds(secs));
                *self.cached.write().await = Some(Credential {
                    token: grant.token.clone(),
                    expires_at,
                });
                tracing::info!(expires_at = ?expires_at, "Access token refreshed");
                Ok(grant.token)
            }
            Err(e) => {
                *self.cached.write().await = None;
                tracing::warn!(error = %e, "Login failed");
                Err(e)
            }
        }
    }

    /// Drop the cached token so the next call logs in again
    pub async fn invalidate(&self) {
        if self.cached.write().await.take().is_some() {
            tracing::debug!("Access token invalidated");
        }
    }

    /// Current credential, if any
    pub async fn current(&self) -> Option<Credential> {
        self.cached.read().await.clone()
    }

    async fn valid_cached(&self) -> Option<String> {
        self.cached
            .read()
            .await
            .as_ref()
            .filter(|c| c.is_valid_at(Utc::now()))
            .map(|c| c.token.clone())
    }
}
