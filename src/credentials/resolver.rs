//! Credential selection for outgoing calls.

use super::{most_recent_index, CredentialRecord, TokenStore};
use crate::config::Config;
use serde_json::{Map, Value};

/// Credential chosen for a single call.
///
/// `access_token` is optional because an environment override may supply
/// only a refresh token; the executor treats a missing access token as
/// authentication-required. `account_id` names the store record the
/// credential came from, absent for overrides and legacy credentials.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedCredential {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub account_id: Option<String>,
}

/// Picks the credential for an outgoing call.
///
/// Selection order, first match wins:
/// 1. environment-supplied override tokens (bypass the store entirely)
/// 2. a stored record: explicit per-call account id, else the configured
///    default account id, else the persisted active pointer, else the most
///    recently updated record
/// 3. the legacy flat-object store
///
/// Override tokens and the default account id are captured from the
/// configuration at construction.
#[derive(Clone, Debug)]
pub struct CredentialResolver {
    access_token_override: Option<String>,
    refresh_token_override: Option<String>,
    default_account_id: Option<String>,
    store: TokenStore,
}

impl CredentialResolver {
    pub fn new(config: &Config, store: TokenStore) -> Self {
        Self {
            access_token_override: config.overrides.access_token.clone(),
            refresh_token_override: config.overrides.refresh_token.clone(),
            default_account_id: config.overrides.account_id.clone(),
            store,
        }
    }

    /// Resolves the credential for a call, `None` when no credential of
    /// any kind is available.
    pub fn resolve(&self, explicit_account_id: Option<&str>) -> Option<ResolvedCredential> {
        // Override tokens win unconditionally and carry no account id
        if self.access_token_override.is_some() || self.refresh_token_override.is_some() {
            return Some(ResolvedCredential {
                access_token: self.access_token_override.clone(),
                refresh_token: self.refresh_token_override.clone(),
                account_id: None,
            });
        }

        let records = self.store.load();
        if !records.is_empty() {
            let wanted = explicit_account_id
                .map(str::to_string)
                .or_else(|| self.default_account_id.clone())
                .or_else(|| self.store.read_active());
            if let Some(id) = wanted {
                if let Some(record) = records.iter().find(|r| r.account_id == id) {
                    return Some(from_record(record));
                }
                // Selector names an account no longer stored: fall through
                // to recency
            }
            return most_recent_index(&records).map(|index| from_record(&records[index]));
        }

        // Legacy single-credential store
        let legacy = self.store.load_legacy();
        let access_token = string_field(&legacy, "access_token");
        let refresh_token = string_field(&legacy, "refresh_token");
        if access_token.is_some() || refresh_token.is_some() {
            return Some(ResolvedCredential {
                access_token,
                refresh_token,
                account_id: None,
            });
        }

        None
    }
}

fn from_record(record: &CredentialRecord) -> ResolvedCredential {
    ResolvedCredential {
        access_token: Some(record.access_token.clone()),
        refresh_token: record.refresh_token.clone(),
        account_id: Some(record.account_id.clone()),
    }
}

fn string_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
