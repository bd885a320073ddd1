//! OAuth 2.0 flows against the identity provider.
//!
//! Builds consent URLs, exchanges authorization codes, refreshes access
//! tokens, and persists every successful grant into the token store,
//! enriched with the channel identity fetched from the provider:
//!
//! 1. Caller opens the authorization URL and approves access
//! 2. `exchange_code` trades the callback code for a token set
//! 3. The channel identity is fetched with the new access token
//! 4. A credential record is upserted and marked active
//! 5. Later, `refresh` trades the refresh token for a new access token

mod identity;

pub use identity::AccountIdentity;

use crate::config::Config;
use crate::credentials::{CredentialRecord, TokenStore};
use crate::error::{Error, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Token response from the provider's token endpoint (standard OAuth 2.0).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    /// Granted scopes, space-joined as the provider returns them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl TokenResponse {
    /// Granted scopes as a list.
    pub fn scopes(&self) -> Vec<String> {
        self.scope
            .as_deref()
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }
}

/// Parameters for the consent URL. `Default` requests offline access with
/// a consent prompt, which is what yields a refresh token.
#[derive(Clone, Debug)]
pub struct AuthorizationRequest {
    /// Scopes to request; `None` uses the configured scopes
    pub scopes: Option<Vec<String>>,
    /// Opaque CSRF state echoed back on the callback
    pub state: Option<String>,
    pub access_type: String,
    pub prompt: String,
}

impl Default for AuthorizationRequest {
    fn default() -> Self {
        Self {
            scopes: None,
            state: None,
            access_type: "offline".to_string(),
            prompt: "consent".to_string(),
        }
    }
}

/// OAuth flow manager.
///
/// Owns the grant exchanges against the provider's token endpoint and the
/// persistence side effect that follows each successful grant.
#[derive(Clone, Debug)]
pub struct OAuthFlow {
    config: Config,
    http_client: reqwest::Client,
    store: TokenStore,
}

impl OAuthFlow {
    pub fn new(config: &Config, store: TokenStore) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.api.timeout_secs))
            .build()
            .expect("Failed to build HTTP client");
        Self {
            config: config.clone(),
            http_client,
            store,
        }
    }

    /// Builds the provider consent URL.
    ///
    /// Fails with a configuration error when no client id is set.
    pub fn authorization_url(&self, request: &AuthorizationRequest) -> Result<String> {
        if self.config.oauth.client_id.is_empty() {
            return Err(Error::Configuration(
                "client id is not set; set TUBECAST_CLIENT_ID".to_string(),
            ));
        }

        let scopes = request
            .scopes
            .as_deref()
            .unwrap_or(&self.config.oauth.scopes)
            .join(" ");

        let mut url = format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type={}&prompt={}",
            self.config.oauth.auth_url,
            urlencoding::encode(&self.config.oauth.client_id),
            urlencoding::encode(&self.config.oauth.redirect_uri),
            urlencoding::encode(&scopes),
            urlencoding::encode(&request.access_type),
            urlencoding::encode(&request.prompt),
        );
        if let Some(state) = &request.state {
            url.push_str("&state=");
            url.push_str(&urlencoding::encode(state));
        }
        Ok(url)
    }

    /// Exchanges an authorization code for a token set and persists it.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenResponse> {
        self.require_client_credentials()?;

        let mut form = HashMap::new();
        form.insert("grant_type", "authorization_code");
        form.insert("code", code);
        form.insert("redirect_uri", self.config.oauth.redirect_uri.as_str());
        form.insert("client_id", self.config.oauth.client_id.as_str());
        form.insert("client_secret", self.config.oauth.client_secret.as_str());

        debug!(token_url = %self.config.oauth.token_url, "Exchanging authorization code");
        let tokens = self.token_grant(&form).await?;

        info!(
            has_refresh_token = tokens.refresh_token.is_some(),
            expires_in = ?tokens.expires_in,
            "Authorization code exchanged"
        );

        self.persist_tokens(&tokens).await?;
        Ok(tokens)
    }

    /// Trades a refresh token for a new access token and persists the
    /// result.
    ///
    /// The provider does not always return a refresh token on this grant;
    /// the input token is kept on the result so the stored record never
    /// loses its refresh capability.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse> {
        self.require_client_credentials()?;

        let mut form = HashMap::new();
        form.insert("grant_type", "refresh_token");
        form.insert("refresh_token", refresh_token);
        form.insert("client_id", self.config.oauth.client_id.as_str());
        form.insert("client_secret", self.config.oauth.client_secret.as_str());

        debug!(token_url = %self.config.oauth.token_url, "Refreshing access token");
        let mut tokens = self.token_grant(&form).await?;

        // Keep the original refresh token if the provider did not rotate it
        if tokens.refresh_token.is_none() {
            tokens.refresh_token = Some(refresh_token.to_string());
        }

        self.persist_tokens(&tokens).await?;
        Ok(tokens)
    }

    fn require_client_credentials(&self) -> Result<()> {
        if self.config.oauth.client_id.is_empty() || self.config.oauth.client_secret.is_empty() {
            return Err(Error::Configuration(
                "client id/secret are not set; set TUBECAST_CLIENT_ID and TUBECAST_CLIENT_SECRET"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// POSTs a form-encoded grant request to the token endpoint.
    async fn token_grant(&self, form: &HashMap<&str, &str>) -> Result<TokenResponse> {
        let response = self
            .http_client
            .post(&self.config.oauth.token_url)
            .header("Accept", "application/json")
            .form(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            return Err(Error::Upstream { status, body });
        }

        Ok(response.json().await?)
    }

    /// Persistence side effect shared by both grants: sync the legacy flat
    /// store when one exists, then upsert an identity-keyed record and
    /// mark its account active.
    ///
    /// An identity lookup that fails or yields no channel skips the
    /// record upsert; the grant itself still succeeds.
    async fn persist_tokens(&self, tokens: &TokenResponse) -> Result<()> {
        if let Value::Object(fields) = serde_json::to_value(tokens)? {
            self.store.merge_legacy(&fields)?;
        }

        match identity::fetch_account_identity(
            &self.http_client,
            &self.config.api.base_url,
            &tokens.access_token,
        )
        .await
        {
            Ok(Some(identity)) => {
                let now = Utc::now();
                let account_id = identity.account_id.clone();
                self.store.upsert(CredentialRecord {
                    account_id: identity.account_id,
                    display_name: identity.display_name,
                    label: identity.label,
                    access_token: tokens.access_token.clone(),
                    refresh_token: tokens.refresh_token.clone(),
                    token_type: tokens.token_type.clone(),
                    expires_in: tokens.expires_in,
                    scopes: tokens.scopes(),
                    created_at: now,
                    updated_at: now,
                })?;
                self.store.write_active(&account_id)?;
                info!(account_id = %account_id, "Stored credentials for account");
            }
            Ok(None) => {
                warn!("Identity lookup returned no channel; account record not stored");
            }
            Err(e) => {
                warn!(error = %e, "Identity lookup failed; account record not stored");
            }
        }

        Ok(())
    }
}
