// Drive session: OAuth tokens in the OS keychain, refreshed on demand.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::backend::BackendError;
use crate::config::DriveConfig;
use crate::security::{SecretStore, KEYRING_SERVICE};

const TOKEN_ACCOUNT: &str = "drive_tokens";
/// Tokens this close to expiry are treated as expired.
const EXPIRY_SKEW_SECS: i64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthTokens {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// `None` means the token does not expire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl AuthTokens {
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at - Duration::seconds(EXPIRY_SKEW_SECS) > now,
            None => true,
        }
    }
}

/// A restored drive session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub expires_at: Option<DateTime<Utc>>,
}

/// What the backends and the reconciler need from the auth layer.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// The usable session, refreshing silently when possible.
    async fn restore_session(&self) -> Result<Option<Session>, BackendError>;

    /// A fresh access token, or `Unauthorized`.
    async fn access_token(&self) -> Result<String, BackendError>;

    async fn sign_in(&self, tokens: AuthTokens) -> Result<(), BackendError>;

    async fn sign_out(&self) -> Result<(), BackendError>;
}

/// OAuth token endpoint operations.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<AuthTokens, BackendError>;
    async fn revoke(&self, token: &str) -> Result<(), BackendError>;
}

pub struct HttpTokenEndpoint {
    http: reqwest::Client,
    token_url: String,
    revoke_url: String,
    client_id: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

impl HttpTokenEndpoint {
    /// `None` when no OAuth client id is configured.
    pub fn from_config(config: &DriveConfig) -> Option<Self> {
        let client_id = config.client_id.clone()?;
        Some(Self {
            http: reqwest::Client::new(),
            token_url: config.token_url.clone(),
            revoke_url: config.revoke_url.clone(),
            client_id,
        })
    }
}

#[async_trait]
impl TokenEndpoint for HttpTokenEndpoint {
    async fn refresh(&self, refresh_token: &str) -> Result<AuthTokens, BackendError> {
        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.client_id.as_str()),
            ])
            .send()
            .await?;
        let status = response.status();
        if status.as_u16() == 400 || status.as_u16() == 401 {
            return Err(BackendError::Unauthorized);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(BackendError::Remote { status: status.as_u16(), message });
        }
        let body: TokenResponse = response.json().await?;
        Ok(AuthTokens {
            access_token: body.access_token,
            refresh_token: body.refresh_token.or_else(|| Some(refresh_token.to_string())),
            expires_at: body.expires_in.map(|secs| Utc::now() + Duration::seconds(secs)),
        })
    }

    async fn revoke(&self, token: &str) -> Result<(), BackendError> {
        let response = self.http.post(&self.revoke_url).form(&[("token", token)]).send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(BackendError::Remote { status: status.as_u16(), message: "token revocation failed".into() })
        }
    }
}

/// Keychain-backed session with an in-memory cache.
pub struct SessionManager {
    store: Arc<dyn SecretStore>,
    endpoint: Option<Arc<dyn TokenEndpoint>>,
    cached: Mutex<Option<AuthTokens>>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SecretStore>, endpoint: Option<Arc<dyn TokenEndpoint>>) -> Self {
        Self { store, endpoint, cached: Mutex::new(None) }
    }

    fn cache(&self) -> MutexGuard<'_, Option<AuthTokens>> {
        self.cached.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stored_tokens(&self) -> Result<Option<AuthTokens>, BackendError> {
        if let Some(tokens) = self.cache().clone() {
            return Ok(Some(tokens));
        }
        let Some(raw) = self.store.get_secret(KEYRING_SERVICE, TOKEN_ACCOUNT)? else {
            return Ok(None);
        };
        match serde_json::from_str::<AuthTokens>(&raw) {
            Ok(tokens) => {
                *self.cache() = Some(tokens.clone());
                Ok(Some(tokens))
            }
            Err(error) => {
                warn!(error = %error, "discarding unreadable drive session");
                self.store.delete_secret(KEYRING_SERVICE, TOKEN_ACCOUNT)?;
                Ok(None)
            }
        }
    }

    fn persist(&self, tokens: &AuthTokens) -> Result<(), BackendError> {
        let raw = serde_json::to_string(tokens).map_err(|error| BackendError::Decode(error.to_string()))?;
        self.store.set_secret(KEYRING_SERVICE, TOKEN_ACCOUNT, &raw)?;
        *self.cache() = Some(tokens.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), BackendError> {
        *self.cache() = None;
        self.store.delete_secret(KEYRING_SERVICE, TOKEN_ACCOUNT)?;
        Ok(())
    }

    /// Token lookup against an explicit clock.
    pub async fn access_token_at(&self, now: DateTime<Utc>) -> Result<String, BackendError> {
        self.fresh_tokens_at(now).await.map(|tokens| tokens.access_token)
    }

    async fn fresh_tokens_at(&self, now: DateTime<Utc>) -> Result<AuthTokens, BackendError> {
        let Some(tokens) = self.stored_tokens()? else {
            return Err(BackendError::Unauthorized);
        };
        if tokens.is_fresh_at(now) {
            return Ok(tokens);
        }

        let (Some(endpoint), Some(refresh_token)) = (&self.endpoint, tokens.refresh_token.as_deref()) else {
            info!("drive session expired and cannot be refreshed");
            self.clear()?;
            return Err(BackendError::Unauthorized);
        };
        match endpoint.refresh(refresh_token).await {
            Ok(refreshed) => {
                debug!("refreshed drive access token");
                self.persist(&refreshed)?;
                Ok(refreshed)
            }
            Err(BackendError::Unauthorized) => {
                info!("drive refresh token rejected");
                self.clear()?;
                Err(BackendError::Unauthorized)
            }
            Err(error) => Err(error),
        }
    }
}

#[async_trait]
impl SessionProvider for SessionManager {
    async fn restore_session(&self) -> Result<Option<Session>, BackendError> {
        match self.fresh_tokens_at(Utc::now()).await {
            Ok(tokens) => Ok(Some(Session { expires_at: tokens.expires_at })),
            Err(BackendError::Unauthorized) => Ok(None),
            Err(error) => Err(error),
        }
    }

    async fn access_token(&self) -> Result<String, BackendError> {
        self.access_token_at(Utc::now()).await
    }

    async fn sign_in(&self, tokens: AuthTokens) -> Result<(), BackendError> {
        if tokens.access_token.trim().is_empty() {
            return Err(BackendError::Unauthorized);
        }
        self.persist(&tokens)?;
        info!("signed in to drive");
        Ok(())
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        let tokens = self.stored_tokens()?;
        if let (Some(endpoint), Some(tokens)) = (&self.endpoint, tokens) {
            if let Err(error) = endpoint.revoke(&tokens.access_token).await {
                warn!(error = %error, "failed to revoke drive token");
            }
        }
        self.clear()?;
        info!("signed out of drive");
        Ok(())
    }
}
