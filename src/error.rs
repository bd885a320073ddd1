//! Error taxonomy for the credential lifecycle and API calls.
//!
//! Callers match on the kind: configuration problems are never retried,
//! `AuthenticationRequired` means a new authorization flow is needed, and
//! `Upstream` preserves the provider's raw status and body for diagnostics.

use thiserror::Error;

/// Failures surfaced by the OAuth flow manager, token store, and request
/// executor.
#[derive(Debug, Error)]
pub enum Error {
    /// Required OAuth client credentials are not configured.
    #[error("OAuth configuration error: {0}")]
    Configuration(String),

    /// No usable credential could be resolved, or authorization kept
    /// failing after a refresh attempt.
    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    /// Non-success response from the identity provider or the API.
    #[error("upstream error {status}: {body}")]
    Upstream { status: u16, body: String },

    /// Token store write failure. Read failures never surface here; the
    /// store degrades to an empty state instead.
    #[error("token store error: {0}")]
    Storage(#[from] std::io::Error),

    /// Token store serialization failure.
    #[error("token store encoding error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Network-level failure talking to the provider or the API.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// An account id that is not present in the token store.
    #[error("unknown account: {0}")]
    UnknownAccount(String),
}

pub type Result<T> = std::result::Result<T, Error>;
