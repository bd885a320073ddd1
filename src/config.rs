//! Runtime configuration.
//!
//! Values come from built-in defaults, an optional TOML file, and
//! `TUBECAST_*` environment variables (client secrets and token overrides
//! are env-only). Each component receives its configuration at
//! construction; there is no process-wide settings singleton.

use serde::Deserialize;
use std::path::PathBuf;
use tracing::warn;

/// OAuth client and provider endpoint settings.
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthSettings {
    /// OAuth client id (env: `TUBECAST_CLIENT_ID`). Required for consent
    /// and exchange flows, not for pure access-token usage.
    #[serde(default)]
    pub client_id: String,

    /// OAuth client secret (env: `TUBECAST_CLIENT_SECRET`)
    #[serde(default)]
    pub client_secret: String,

    /// Redirect URI registered with the OAuth client
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,

    /// Scopes requested during authorization
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,

    /// Provider authorization endpoint
    #[serde(default = "default_auth_url")]
    pub auth_url: String,

    /// Provider token endpoint
    #[serde(default = "default_token_url")]
    pub token_url: String,
}

fn default_redirect_uri() -> String {
    "http://localhost".to_string()
}

fn default_scopes() -> Vec<String> {
    vec!["https://www.googleapis.com/auth/youtube.force-ssl".to_string()]
}

fn default_auth_url() -> String {
    "https://accounts.google.com/o/oauth2/v2/auth".to_string()
}

fn default_token_url() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

impl Default for OAuthSettings {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: default_redirect_uri(),
            scopes: default_scopes(),
            auth_url: default_auth_url(),
            token_url: default_token_url(),
        }
    }
}

/// API endpoint settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiSettings {
    /// Base URL for regular API calls
    #[serde(default = "default_api_base_url")]
    pub base_url: String,

    /// Base URL for media uploads
    #[serde(default = "default_upload_base_url")]
    pub upload_base_url: String,

    /// Per-call network timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_base_url() -> String {
    "https://www.googleapis.com/youtube/v3".to_string()
}

fn default_upload_base_url() -> String {
    "https://www.googleapis.com/upload/youtube/v3".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: default_api_base_url(),
            upload_base_url: default_upload_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Token store file locations.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageSettings {
    /// Credential store file (JSON)
    #[serde(default = "default_token_store_path")]
    pub token_store_path: PathBuf,

    /// Active account pointer file (single id string)
    #[serde(default = "default_active_account_path")]
    pub active_account_path: PathBuf,
}

fn default_token_store_path() -> PathBuf {
    PathBuf::from(".tokens.json")
}

fn default_active_account_path() -> PathBuf {
    PathBuf::from(".active_account")
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            token_store_path: default_token_store_path(),
            active_account_path: default_active_account_path(),
        }
    }
}

/// Out-of-band credential overrides. Env-only, never read from the config
/// file.
#[derive(Debug, Clone, Default)]
pub struct OverrideSettings {
    /// Access token that bypasses the store entirely (env: `TUBECAST_ACCESS_TOKEN`)
    pub access_token: Option<String>,

    /// Refresh token companion to the access-token override (env: `TUBECAST_REFRESH_TOKEN`)
    pub refresh_token: Option<String>,

    /// Default account id used when a call names none (env: `TUBECAST_ACCOUNT_ID`)
    pub account_id: Option<String>,
}

/// Complete tubecast configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub oauth: OAuthSettings,
    #[serde(default)]
    pub api: ApiSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(skip)]
    pub overrides: OverrideSettings,
}

impl Config {
    /// Build a configuration from defaults plus `TUBECAST_*` environment
    /// variables.
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env();
        config
    }

    /// Apply environment overrides on top of the current values.
    fn apply_env(&mut self) {
        if let Some(v) = env_var("TUBECAST_CLIENT_ID") {
            self.oauth.client_id = v;
        }
        if let Some(v) = env_var("TUBECAST_CLIENT_SECRET") {
            self.oauth.client_secret = v;
        }
        if let Some(v) = env_var("TUBECAST_REDIRECT_URI") {
            self.oauth.redirect_uri = v;
        }
        if let Some(v) = env_var("TUBECAST_SCOPES") {
            self.oauth.scopes = split_scopes(&v);
        }
        if let Some(v) = env_var("TUBECAST_AUTH_URL") {
            self.oauth.auth_url = v;
        }
        if let Some(v) = env_var("TUBECAST_TOKEN_URL") {
            self.oauth.token_url = v;
        }
        if let Some(v) = env_var("TUBECAST_API_BASE_URL") {
            self.api.base_url = v;
        }
        if let Some(v) = env_var("TUBECAST_UPLOAD_BASE_URL") {
            self.api.upload_base_url = v;
        }
        if let Some(v) = env_var("TUBECAST_HTTP_TIMEOUT") {
            match v.parse() {
                Ok(secs) => self.api.timeout_secs = secs,
                Err(_) => warn!(value = %v, "Ignoring unparsable TUBECAST_HTTP_TIMEOUT"),
            }
        }
        if let Some(v) = env_var("TUBECAST_TOKEN_STORE") {
            self.storage.token_store_path = PathBuf::from(v);
        }
        if let Some(v) = env_var("TUBECAST_ACTIVE_ACCOUNT") {
            self.storage.active_account_path = PathBuf::from(v);
        }
        self.overrides.access_token = env_var("TUBECAST_ACCESS_TOKEN");
        self.overrides.refresh_token = env_var("TUBECAST_REFRESH_TOKEN");
        self.overrides.account_id = env_var("TUBECAST_ACCOUNT_ID");
    }
}

/// Load configuration from a TOML file, then apply environment overrides.
pub fn load_config(path: &str) -> Result<Config, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)?;
    let mut config: Config = toml::from_str(&contents)?;
    config.apply_env();
    Ok(config)
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Split a scope list on commas and/or whitespace.
fn split_scopes(raw: &str) -> Vec<String> {
    raw.replace(',', " ")
        .split_whitespace()
        .map(str::to_string)
        .collect()
}
