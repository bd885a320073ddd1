//! Authenticated request execution against the YouTube Data API.
//!
//! Attaches a bearer credential to each call, detects authorization
//! failure, refreshes the credential, and retries the call exactly once
//! with the new access token. Payload semantics are left to the caller:
//! request bodies and responses pass through as raw JSON.

use crate::config::Config;
use crate::credentials::{CredentialResolver, ResolvedCredential, TokenStore, TokenUpdate};
use crate::error::{Error, Result};
use crate::oauth::{OAuthFlow, TokenResponse};
use reqwest::{Method, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

/// HTTP client for bearer-authenticated API calls.
///
/// Holds no credential state of its own: the credential is re-resolved
/// from the token store on every call, so concurrent calls and external
/// store updates always see current tokens.
pub struct YouTubeClient {
    api_base_url: String,
    upload_base_url: String,
    http_client: reqwest::Client,
    resolver: CredentialResolver,
    oauth: OAuthFlow,
    store: TokenStore,
}

impl YouTubeClient {
    pub fn new(config: &Config, store: TokenStore) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.api.timeout_secs))
            .build()
            .expect("Failed to build HTTP client");
        Self {
            api_base_url: config.api.base_url.trim_end_matches('/').to_string(),
            upload_base_url: config.api.upload_base_url.trim_end_matches('/').to_string(),
            http_client,
            resolver: CredentialResolver::new(config, store.clone()),
            oauth: OAuthFlow::new(config, store.clone()),
            store,
        }
    }

    /// Performs an authenticated API call using the default credential
    /// selection (active account, most recent, or override tokens).
    pub async fn execute(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value> {
        self.execute_as(None, method, path, query, body).await
    }

    /// Performs an authenticated API call for a specific stored account.
    ///
    /// A 401 response triggers exactly one refresh-and-retry; any other
    /// non-success status is surfaced as an upstream error, untouched.
    pub async fn execute_as(
        &self,
        account_id: Option<&str>,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value> {
        let resolved = self.resolve(account_id)?;
        let access_token = require_access_token(&resolved)?;
        let url = format!("{}/{}", self.api_base_url, path.trim_start_matches('/'));

        debug!(method = %method, url = %url, "API request");
        let mut response = self
            .send_json(&method, &url, query, body, &access_token)
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            match self.refresh_credential(&resolved).await? {
                Some(new_token) => {
                    debug!(url = %url, "Retrying request with refreshed access token");
                    response = self.send_json(&method, &url, query, body, &new_token).await?;
                }
                None => {
                    return Err(Error::AuthenticationRequired(
                        "access token was rejected and no refresh token is available".to_string(),
                    ));
                }
            }
        }

        read_api_response(response).await
    }

    /// Uploads a thumbnail image for a video via the multipart endpoint.
    ///
    /// Same single refresh-and-retry behavior as [`YouTubeClient::execute`].
    pub async fn upload_thumbnail(&self, video_id: &str, image: Vec<u8>) -> Result<Value> {
        let resolved = self.resolve(None)?;
        let access_token = require_access_token(&resolved)?;
        let url = format!("{}/thumbnails/set", self.upload_base_url);
        let query = [
            ("videoId", video_id.to_string()),
            ("uploadType", "multipart".to_string()),
        ];

        debug!(video_id = %video_id, bytes = image.len(), "Thumbnail upload");
        let mut response = self
            .send_upload(&url, &query, image.clone(), &access_token)
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            match self.refresh_credential(&resolved).await? {
                Some(new_token) => {
                    debug!(video_id = %video_id, "Retrying upload with refreshed access token");
                    response = self.send_upload(&url, &query, image, &new_token).await?;
                }
                None => {
                    return Err(Error::AuthenticationRequired(
                        "access token was rejected and no refresh token is available".to_string(),
                    ));
                }
            }
        }

        read_api_response(response).await
    }

    fn resolve(&self, account_id: Option<&str>) -> Result<ResolvedCredential> {
        self.resolver.resolve(account_id).ok_or_else(|| {
            Error::AuthenticationRequired(
                "no stored credential; run the authorization flow first".to_string(),
            )
        })
    }

    async fn send_json(
        &self,
        method: &Method,
        url: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
        access_token: &str,
    ) -> Result<reqwest::Response> {
        let mut request = self
            .http_client
            .request(method.clone(), url)
            .bearer_auth(access_token);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        Ok(request.send().await?)
    }

    async fn send_upload(
        &self,
        url: &str,
        query: &[(&str, String)],
        image: Vec<u8>,
        access_token: &str,
    ) -> Result<reqwest::Response> {
        let part = reqwest::multipart::Part::bytes(image)
            .file_name("thumbnail")
            .mime_str("application/octet-stream")?;
        let form = reqwest::multipart::Form::new().part("media", part);
        Ok(self
            .http_client
            .post(url)
            .query(query)
            .bearer_auth(access_token)
            .multipart(form)
            .send()
            .await?)
    }

    /// One refresh attempt for the resolved credential.
    ///
    /// Returns the new access token, or `None` when the credential carries
    /// no refresh token. The refreshed token set is persisted into the
    /// store before the caller retries.
    async fn refresh_credential(&self, resolved: &ResolvedCredential) -> Result<Option<String>> {
        let Some(refresh_token) = &resolved.refresh_token else {
            return Ok(None);
        };

        info!(
            account_id = resolved.account_id.as_deref().unwrap_or("<unsegmented>"),
            "Access token rejected, refreshing"
        );
        let tokens = self.oauth.refresh(refresh_token).await?;
        self.persist_refreshed(resolved, &tokens)?;
        Ok(Some(tokens.access_token.clone()))
    }

    /// Merges the refreshed token set into the store: the legacy flat
    /// object when one exists, and the record the credential resolved
    /// from (most recent when the credential carried no account id).
    fn persist_refreshed(&self, resolved: &ResolvedCredential, tokens: &TokenResponse) -> Result<()> {
        if let Value::Object(fields) = serde_json::to_value(tokens)? {
            self.store.merge_legacy(&fields)?;
        }

        self.store.merge_update(
            resolved.account_id.as_deref(),
            &TokenUpdate {
                access_token: Some(tokens.access_token.clone()),
                refresh_token: tokens.refresh_token.clone(),
                token_type: tokens.token_type.clone(),
                expires_in: tokens.expires_in,
                scopes: tokens.scopes(),
            },
        )
    }
}

fn require_access_token(resolved: &ResolvedCredential) -> Result<String> {
    resolved.access_token.clone().ok_or_else(|| {
        Error::AuthenticationRequired(
            "missing access token; run the authorization flow first".to_string(),
        )
    })
}

/// Maps the final response after the (at most one) refresh-and-retry: a
/// lingering 401 is a terminal authentication failure, any other
/// non-success status is an upstream error with its body preserved.
async fn read_api_response(response: reqwest::Response) -> Result<Value> {
    let status = response.status();

    if status == StatusCode::UNAUTHORIZED {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<failed to read body>".to_string());
        warn!(body = %body, "Authorization still failing after refresh");
        return Err(Error::AuthenticationRequired(
            "authorization failed after token refresh".to_string(),
        ));
    }

    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<failed to read body>".to_string());
        warn!(status = status.as_u16(), body = %body, "API call failed");
        return Err(Error::Upstream {
            status: status.as_u16(),
            body,
        });
    }

    Ok(response.json().await?)
}
