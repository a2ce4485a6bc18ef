//! OAuth token refresh and encrypted credential storage.
//!
//! The authorization *grant* happens outside this crate; what lives here is
//! keeping a user's access token fresh and their credential material
//! encrypted at rest. An `invalid_grant` answer from the token endpoint is
//! the unambiguous revocation signal: the user is flagged for
//! re-authorization and nothing is retried.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::AuthConfig;
use crate::db::{user_repo, Database, DatabaseError};
use crate::secrets::{secret_from_env, CredentialSealer, SecretError};

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Authorization revoked by provider")]
    Revoked,

    #[error("Token endpoint transient failure: {0}")]
    Transient(String),

    #[error("Token endpoint protocol error: {0}")]
    Protocol(String),

    #[error("Credential material unreadable: {0}")]
    Credential(String),

    #[error("User '{0}' not found")]
    UnknownUser(String),

    #[error("Secret resolution failed: {0}")]
    Secret(#[from] SecretError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Decrypted credential material for one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialSet {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl CredentialSet {
    /// A token that expires within the margin counts as expired.
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(at) => at <= now + chrono::Duration::seconds(60),
            None => false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    #[serde(default)]
    error: String,
}

/// Refreshes access tokens against the provider token endpoint.
pub struct TokenRefresher {
    http: Client,
    token_url: String,
    client_id: SecretString,
    client_secret: SecretString,
}

impl TokenRefresher {
    pub fn from_config(config: &AuthConfig) -> Result<Self, AuthError> {
        let client_id = secret_from_env(&config.client_id_env_var)?;
        let client_secret = secret_from_env(&config.client_secret_env_var)?;
        Ok(Self::new(&config.token_url, client_id, client_secret))
    }

    pub fn new(token_url: &str, client_id: SecretString, client_secret: SecretString) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client with static config");
        Self {
            http,
            token_url: token_url.to_string(),
            client_id,
            client_secret,
        }
    }

    pub async fn refresh(
        &self,
        refresh_token: &str,
        now: DateTime<Utc>,
    ) -> Result<CredentialSet, AuthError> {
        debug!("Refreshing access token");
        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.client_id.expose_secret()),
                ("client_secret", self.client_secret.expose_secret()),
            ])
            .send()
            .await
            .map_err(|e| AuthError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let token: TokenResponse = response
                .json()
                .await
                .map_err(|e| AuthError::Protocol(e.to_string()))?;
            return Ok(CredentialSet {
                access_token: token.access_token,
                refresh_token: refresh_token.to_string(),
                expires_at: token
                    .expires_in
                    .map(|secs| now + chrono::Duration::seconds(secs as i64)),
            });
        }

        let body = response.text().await.unwrap_or_default();
        if status.as_u16() == 400 || status.as_u16() == 401 {
            let parsed: TokenErrorResponse = serde_json::from_str(&body).unwrap_or(
                TokenErrorResponse {
                    error: String::new(),
                },
            );
            if parsed.error == "invalid_grant" {
                warn!("Refresh token rejected with invalid_grant");
                return Err(AuthError::Revoked);
            }
            return Err(AuthError::Protocol(format!("{}: {}", status, parsed.error)));
        }
        Err(AuthError::Transient(format!("{}", status)))
    }
}

/// Loads, refreshes, and re-persists user credentials.
pub struct CredentialStore {
    db: Database,
    sealer: CredentialSealer,
    refresher: TokenRefresher,
}

impl CredentialStore {
    pub fn new(db: Database, sealer: CredentialSealer, refresher: TokenRefresher) -> Self {
        Self {
            db,
            sealer,
            refresher,
        }
    }

    /// Returns a usable access token, refreshing first when the stored one
    /// is expired. On revocation the user is flagged for re-authorization
    /// before the error propagates.
    pub async fn access_token_for(&self, user_id: &str) -> Result<SecretString, AuthError> {
        let creds = self.load(user_id)?;
        let now = Utc::now();
        if !creds.is_expired(now) {
            return Ok(SecretString::from(creds.access_token));
        }
        self.refresh_and_store(user_id, &creds, now).await
    }

    /// Refreshes unconditionally — for when the upstream rejected a token
    /// that looked fresh locally.
    pub async fn force_refresh(&self, user_id: &str) -> Result<SecretString, AuthError> {
        let creds = self.load(user_id)?;
        self.refresh_and_store(user_id, &creds, Utc::now()).await
    }

    async fn refresh_and_store(
        &self,
        user_id: &str,
        creds: &CredentialSet,
        now: DateTime<Utc>,
    ) -> Result<SecretString, AuthError> {
        match self.refresher.refresh(&creds.refresh_token, now).await {
            Ok(fresh) => {
                self.store(user_id, &fresh)?;
                info!(user_id, "access token refreshed");
                Ok(SecretString::from(fresh.access_token))
            }
            Err(AuthError::Revoked) => {
                self.db
                    .with_conn(|conn| user_repo::mark_needs_reauth(conn, user_id, now))?;
                warn!(user_id, "user marked for re-authorization");
                Err(AuthError::Revoked)
            }
            Err(e) => Err(e),
        }
    }

    fn load(&self, user_id: &str) -> Result<CredentialSet, AuthError> {
        let user = self
            .db
            .with_conn(|conn| user_repo::find_by_id(conn, user_id))?
            .ok_or_else(|| AuthError::UnknownUser(user_id.to_string()))?;
        if user.needs_reauth {
            return Err(AuthError::Revoked);
        }
        let (cipher, nonce) = match (user.credential_cipher, user.credential_nonce) {
            (Some(c), Some(n)) => (c, n),
            _ => {
                return Err(AuthError::Credential(
                    "no credential material stored".to_string(),
                ))
            }
        };
        let plain = self
            .sealer
            .unseal(&cipher, &nonce)
            .map_err(|e| AuthError::Credential(e.to_string()))?;
        serde_json::from_slice(&plain).map_err(|e| AuthError::Credential(e.to_string()))
    }

    /// Seals and persists a credential set.
    pub fn store(&self, user_id: &str, creds: &CredentialSet) -> Result<(), AuthError> {
        let plain =
            serde_json::to_vec(creds).map_err(|e| AuthError::Credential(e.to_string()))?;
        let (cipher, nonce) = self
            .sealer
            .seal(&plain)
            .map_err(|e| AuthError::Credential(e.to_string()))?;
        self.db.with_conn(|conn| {
            user_repo::set_credentials(conn, user_id, &cipher, &nonce, Utc::now())
        })?;
        Ok(())
    }
}
