//! Multi-account credential storage and resolution.
//!
//! This module owns the on-disk representation of linked accounts' OAuth
//! tokens and decides which credential an outgoing call should use.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       CredentialResolver                 │
//! │  - override / explicit / active / recent │
//! └─────────────────────────────────────────┘
//!                     ↓
//! ┌─────────────────────────────────────────┐
//! │       TokenStore                         │
//! │  - merge-upsert keyed by account id      │
//! │  - atomic temp-file-and-rename writes    │
//! │  - active account pointer file           │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Durability
//!
//! Every write lands in a temporary file that is renamed over the
//! destination, so a crash mid-write never exposes a truncated store.
//! Reads fail soft: a missing, unreadable, or malformed file degrades to
//! an empty store (with a warning) instead of an error. File permissions
//! are restricted to the owning user after each write, best-effort.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

mod resolver;
mod store;

pub use resolver::{CredentialResolver, ResolvedCredential};
pub use store::TokenStore;

/// One linked account's OAuth tokens plus identity metadata.
///
/// `account_id` is the unique key within the store. `created_at` is set
/// once when the account is first linked; `updated_at` is stamped on every
/// upsert.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CredentialRecord {
    /// Stable channel id from the provider
    pub account_id: String,

    /// Human-readable handle (custom URL or channel title)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// Channel title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Short-lived bearer secret
    pub access_token: String,

    /// Long-lived refresh secret; absent for access-token-only setups
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,

    /// Advisory lifetime in seconds. Expiry is detected reactively via
    /// 401 responses, never by this value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,

    #[serde(default)]
    pub scopes: Vec<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

/// Token fields merged into an existing record after a refresh grant.
///
/// `None` fields leave the stored value in place.
#[derive(Clone, Debug, Default)]
pub struct TokenUpdate {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub token_type: Option<String>,
    pub expires_in: Option<i64>,
    pub scopes: Vec<String>,
}

/// Listing entry for a stored account.
#[derive(Clone, Debug, Serialize)]
pub struct AccountSummary {
    pub account_id: String,
    pub display_name: Option<String>,
    pub label: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Whether the active-account pointer names this account
    pub active: bool,
}

/// Index of the most recently updated record; ties go to the later entry.
pub(crate) fn most_recent_index(records: &[CredentialRecord]) -> Option<usize> {
    records
        .iter()
        .enumerate()
        .max_by_key(|(_, record)| record.updated_at)
        .map(|(index, _)| index)
}
