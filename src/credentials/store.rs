//! File-backed token store.
//!
//! Credential records for zero or more accounts persist as a single JSON
//! document, with a separate pointer file naming the active account. The
//! store file holds either a JSON array of records (current format) or a
//! flat JSON object (legacy single-credential format kept readable for
//! backward compatibility).

use super::{most_recent_index, AccountSummary, CredentialRecord, TokenUpdate};
use crate::error::{Error, Result};
use chrono::Utc;
use serde_json::{Map, Value};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::warn;

/// File-backed credential storage.
///
/// # Durability
/// Every write goes to `<path>.tmp` first and is renamed over the
/// destination, so readers never observe a half-written store. After each
/// write, permissions are restricted to the owning user (best-effort).
///
/// # Read policy
/// Reads never fail: a missing, unreadable, or malformed file degrades to
/// an empty store, with a warning when on-disk content had to be
/// discarded.
///
/// # Thread safety
/// Clones share a single writer lock that serializes every
/// read-merge-write sequence, so overlapping upserts cannot drop each
/// other's records.
#[derive(Clone, Debug)]
pub struct TokenStore {
    store_path: PathBuf,
    active_path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl TokenStore {
    /// Creates a store over the given credential and active-pointer files.
    ///
    /// Neither file needs to exist yet; parent directories are created on
    /// first write.
    pub fn new(store_path: PathBuf, active_path: PathBuf) -> Self {
        Self {
            store_path,
            active_path,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Returns all stored records, or an empty list when no usable store
    /// exists.
    pub fn load(&self) -> Vec<CredentialRecord> {
        read_records(&self.store_path)
    }

    /// Persists the full record list, replacing prior content.
    pub fn save(&self, records: &[CredentialRecord]) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap();
        write_records(&self.store_path, records)
    }

    /// Inserts or merge-updates a record, keyed by `account_id`.
    ///
    /// An existing record keeps its `created_at` and any field the
    /// incoming record leaves unset; `updated_at` is stamped either way.
    pub fn upsert(&self, record: CredentialRecord) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap();
        let mut records = read_records(&self.store_path);
        let now = Utc::now();

        match records.iter().position(|r| r.account_id == record.account_id) {
            Some(index) => {
                let existing = &mut records[index];
                merge_record(existing, record);
                existing.updated_at = now;
            }
            None => {
                let mut record = record;
                record.updated_at = now;
                records.push(record);
            }
        }

        write_records(&self.store_path, &records)
    }

    /// Merges refreshed token fields into the record for `account_id`,
    /// falling back to the most recently updated record when no account is
    /// named or the named one is gone. No-op on an empty store.
    pub fn merge_update(&self, account_id: Option<&str>, update: &TokenUpdate) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap();
        let mut records = read_records(&self.store_path);

        let index = account_id
            .and_then(|id| records.iter().position(|r| r.account_id == id))
            .or_else(|| most_recent_index(&records));
        let Some(index) = index else {
            return Ok(());
        };

        let record = &mut records[index];
        if let Some(access_token) = &update.access_token {
            record.access_token = access_token.clone();
        }
        if update.refresh_token.is_some() {
            record.refresh_token = update.refresh_token.clone();
        }
        if update.token_type.is_some() {
            record.token_type = update.token_type.clone();
        }
        if update.expires_in.is_some() {
            record.expires_in = update.expires_in;
        }
        if !update.scopes.is_empty() {
            record.scopes = update.scopes.clone();
        }
        record.updated_at = Utc::now();

        write_records(&self.store_path, &records)
    }

    /// Returns the persisted active account id, if any.
    pub fn read_active(&self) -> Option<String> {
        let value = fs::read_to_string(&self.active_path).ok()?;
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    /// Persists the active account pointer, replacing prior content.
    ///
    /// The pointer is not validated against store membership; use
    /// [`TokenStore::set_active`] for the validated variant.
    pub fn write_active(&self, account_id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap();
        write_atomic(&self.active_path, account_id.trim())
    }

    /// Sets the active account after checking it exists in the store.
    pub fn set_active(&self, account_id: &str) -> Result<()> {
        if !self.load().iter().any(|r| r.account_id == account_id) {
            return Err(Error::UnknownAccount(account_id.to_string()));
        }
        self.write_active(account_id)
    }

    /// Lists stored accounts with their identity metadata and active flag.
    pub fn list_accounts(&self) -> Vec<AccountSummary> {
        let active = self.read_active();
        self.load()
            .into_iter()
            .map(|record| AccountSummary {
                active: active.as_deref() == Some(record.account_id.as_str()),
                account_id: record.account_id,
                display_name: record.display_name,
                label: record.label,
                created_at: record.created_at,
                updated_at: record.updated_at,
            })
            .collect()
    }

    /// Reads the legacy flat-object store shape, empty when the file is
    /// missing or holds the record-list format.
    pub fn load_legacy(&self) -> Map<String, Value> {
        match read_json(&self.store_path) {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    /// Merges raw token fields into the legacy flat store.
    ///
    /// Only applies when a non-empty legacy object is already on disk; new
    /// deployments never create one.
    pub fn merge_legacy(&self, fields: &Map<String, Value>) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap();
        let mut existing = match read_json(&self.store_path) {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };
        if existing.is_empty() {
            return Ok(());
        }
        for (key, value) in fields {
            existing.insert(key.clone(), value.clone());
        }
        write_json(&self.store_path, &Value::Object(existing))
    }
}

/// Field-level merge for an upsert hitting an existing record.
///
/// Required fields take the incoming value; optional fields only move when
/// the incoming record sets them. `created_at` is never touched.
fn merge_record(existing: &mut CredentialRecord, incoming: CredentialRecord) {
    existing.access_token = incoming.access_token;
    if incoming.display_name.is_some() {
        existing.display_name = incoming.display_name;
    }
    if incoming.label.is_some() {
        existing.label = incoming.label;
    }
    if incoming.refresh_token.is_some() {
        existing.refresh_token = incoming.refresh_token;
    }
    if incoming.token_type.is_some() {
        existing.token_type = incoming.token_type;
    }
    if incoming.expires_in.is_some() {
        existing.expires_in = incoming.expires_in;
    }
    if !incoming.scopes.is_empty() {
        existing.scopes = incoming.scopes;
    }
}

fn read_json(path: &Path) -> Option<Value> {
    let data = match fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Token store unreadable, treating as empty");
            return None;
        }
    };
    match serde_json::from_str(&data) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Token store malformed, treating as empty");
            None
        }
    }
}

fn read_records(path: &Path) -> Vec<CredentialRecord> {
    let Some(Value::Array(items)) = read_json(path) else {
        return Vec::new();
    };
    let total = items.len();
    let records: Vec<CredentialRecord> = items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect();
    if records.len() < total {
        warn!(
            path = %path.display(),
            dropped = total - records.len(),
            "Skipped malformed entries in token store"
        );
    }
    records
}

fn write_records(path: &Path, records: &[CredentialRecord]) -> Result<()> {
    write_json(path, &serde_json::to_value(records)?)
}

fn write_json(path: &Path, value: &Value) -> Result<()> {
    write_atomic(path, &serde_json::to_string_pretty(value)?)
}

/// Writes via a temp file and rename so the destination is replaced
/// atomically, then restricts permissions to the owning user.
fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let tmp = tmp_path(path);
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(contents.as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;

    harden_permissions(path);
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".tmp");
    PathBuf::from(os)
}

/// Owner-only permissions, best-effort. A failure here must not fail the
/// write that preceded it.
fn harden_permissions(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
            warn!(path = %path.display(), error = %e, "Failed to restrict token store permissions");
        }
    }
    #[cfg(not(unix))]
    let _ = path;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn test_store(dir: &tempfile::TempDir) -> TokenStore {
        TokenStore::new(
            dir.path().join("tokens.json"),
            dir.path().join("active_account"),
        )
    }

    fn record(account_id: &str) -> CredentialRecord {
        let now = Utc::now();
        CredentialRecord {
            account_id: account_id.to_string(),
            display_name: Some(format!("@{account_id}")),
            label: Some(format!("{account_id} channel")),
            access_token: format!("access-{account_id}"),
            refresh_token: Some(format!("refresh-{account_id}")),
            token_type: Some("Bearer".to_string()),
            expires_in: Some(3600),
            scopes: vec!["https://www.googleapis.com/auth/youtube.force-ssl".to_string()],
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);
        assert!(store.load().is_empty());
        assert!(store.read_active().is_none());
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);
        let records = vec![record("UC-a"), record("UC-b")];

        store.save(&records).unwrap();
        assert_eq!(store.load(), records);
    }

    #[test]
    fn test_upsert_inserts_then_merges() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);

        store.upsert(record("UC-a")).unwrap();
        let first = store.load().remove(0);

        // Second upsert with identical fields: count and created_at stay,
        // updated_at advances.
        store.upsert(record("UC-a")).unwrap();
        let records = store.load();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].created_at, first.created_at);
        assert!(records[0].updated_at >= first.updated_at);
        assert_eq!(records[0].access_token, first.access_token);
    }

    #[test]
    fn test_upsert_merge_keeps_unset_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);
        store.upsert(record("UC-a")).unwrap();

        let update = CredentialRecord {
            display_name: None,
            label: None,
            refresh_token: None,
            token_type: None,
            expires_in: None,
            scopes: Vec::new(),
            access_token: "access-new".to_string(),
            ..record("UC-a")
        };
        store.upsert(update).unwrap();

        let records = store.load();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].access_token, "access-new");
        // Unset fields keep their stored values
        assert_eq!(records[0].refresh_token, Some("refresh-UC-a".to_string()));
        assert_eq!(records[0].display_name, Some("@UC-a".to_string()));
        assert_eq!(records[0].scopes.len(), 1);
    }

    #[test]
    fn test_upsert_appends_new_account() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);

        store.upsert(record("UC-a")).unwrap();
        store.upsert(record("UC-b")).unwrap();

        let records = store.load();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].account_id, "UC-a");
        assert_eq!(records[1].account_id, "UC-b");
    }

    #[test]
    fn test_corrupt_store_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);

        fs::write(dir.path().join("tokens.json"), "{not valid json").unwrap();
        assert!(store.load().is_empty());
        assert!(store.load_legacy().is_empty());

        // A corrupt store is still writable
        store.upsert(record("UC-a")).unwrap();
        assert_eq!(store.load().len(), 1);
    }

    #[test]
    fn test_malformed_entries_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);
        store.upsert(record("UC-a")).unwrap();

        // Splice a junk entry into the array on disk
        let path = dir.path().join("tokens.json");
        let mut value: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        value.as_array_mut().unwrap().push(Value::String("junk".to_string()));
        fs::write(&path, serde_json::to_string(&value).unwrap()).unwrap();

        let records = store.load();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].account_id, "UC-a");
    }

    #[test]
    fn test_stale_temp_file_does_not_corrupt_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);
        store.upsert(record("UC-a")).unwrap();

        // Simulate a crash that left a partial temp file behind
        fs::write(dir.path().join("tokens.json.tmp"), "{trunc").unwrap();
        assert_eq!(store.load().len(), 1);

        // The next write replaces the stale temp file and succeeds
        store.upsert(record("UC-b")).unwrap();
        assert_eq!(store.load().len(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_store_permissions_restricted() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);
        store.upsert(record("UC-a")).unwrap();
        store.write_active("UC-a").unwrap();

        for name in ["tokens.json", "active_account"] {
            let mode = fs::metadata(dir.path().join(name)).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600, "{name} should be owner-only");
        }
    }

    #[test]
    fn test_active_pointer_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);

        assert!(store.read_active().is_none());
        store.write_active("  UC-a \n").unwrap();
        assert_eq!(store.read_active(), Some("UC-a".to_string()));

        store.write_active("UC-b").unwrap();
        assert_eq!(store.read_active(), Some("UC-b".to_string()));
    }

    #[test]
    fn test_write_active_does_not_validate() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);

        // The raw pointer write accepts ids the store has never seen
        store.write_active("UC-ghost").unwrap();
        assert_eq!(store.read_active(), Some("UC-ghost".to_string()));
    }

    #[test]
    fn test_set_active_requires_membership() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);
        store.upsert(record("UC-a")).unwrap();

        store.set_active("UC-a").unwrap();
        assert_eq!(store.read_active(), Some("UC-a".to_string()));

        let err = store.set_active("UC-missing").unwrap_err();
        assert!(matches!(err, Error::UnknownAccount(id) if id == "UC-missing"));
        // Pointer untouched by the failed call
        assert_eq!(store.read_active(), Some("UC-a".to_string()));
    }

    #[test]
    fn test_list_accounts_marks_active() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);
        store.upsert(record("UC-a")).unwrap();
        store.upsert(record("UC-b")).unwrap();
        store.write_active("UC-b").unwrap();

        let accounts = store.list_accounts();
        assert_eq!(accounts.len(), 2);
        assert!(!accounts[0].active);
        assert!(accounts[1].active);
        assert_eq!(accounts[1].account_id, "UC-b");
    }

    #[test]
    fn test_merge_update_targets_named_account() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);
        store.upsert(record("UC-a")).unwrap();
        store.upsert(record("UC-b")).unwrap();

        let update = TokenUpdate {
            access_token: Some("access-fresh".to_string()),
            ..TokenUpdate::default()
        };
        store.merge_update(Some("UC-a"), &update).unwrap();

        let records = store.load();
        assert_eq!(records[0].access_token, "access-fresh");
        // Other fields and other records untouched
        assert_eq!(records[0].refresh_token, Some("refresh-UC-a".to_string()));
        assert_eq!(records[1].access_token, "access-UC-b");
    }

    #[test]
    fn test_merge_update_falls_back_to_most_recent() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);

        let now = Utc::now();
        let mut older = record("UC-a");
        older.updated_at = now - Duration::minutes(5);
        let mut newer = record("UC-b");
        newer.updated_at = now;
        store.save(&[older, newer]).unwrap();

        let update = TokenUpdate {
            access_token: Some("access-fresh".to_string()),
            ..TokenUpdate::default()
        };
        store.merge_update(None, &update).unwrap();

        let records = store.load();
        assert_eq!(records[0].access_token, "access-UC-a");
        assert_eq!(records[1].access_token, "access-fresh");
    }

    #[test]
    fn test_merge_update_empty_store_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);

        let update = TokenUpdate {
            access_token: Some("access-fresh".to_string()),
            ..TokenUpdate::default()
        };
        store.merge_update(None, &update).unwrap();
        assert!(store.load().is_empty());
        assert!(!dir.path().join("tokens.json").exists());
    }

    #[test]
    fn test_legacy_flat_store_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);

        fs::write(
            dir.path().join("tokens.json"),
            r#"{"access_token": "legacy-access", "refresh_token": "legacy-refresh"}"#,
        )
        .unwrap();

        // Flat object: no records, but legacy fields readable
        assert!(store.load().is_empty());
        let legacy = store.load_legacy();
        assert_eq!(legacy["access_token"], "legacy-access");
    }

    #[test]
    fn test_merge_legacy_only_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);

        let mut fields = Map::new();
        fields.insert("access_token".to_string(), Value::String("fresh".to_string()));

        // No legacy store on disk: merge must not create one
        store.merge_legacy(&fields).unwrap();
        assert!(!dir.path().join("tokens.json").exists());

        // With a legacy object present, fields merge in and others survive
        fs::write(
            dir.path().join("tokens.json"),
            r#"{"access_token": "stale", "refresh_token": "keep-me"}"#,
        )
        .unwrap();
        store.merge_legacy(&fields).unwrap();

        let legacy = store.load_legacy();
        assert_eq!(legacy["access_token"], "fresh");
        assert_eq!(legacy["refresh_token"], "keep-me");
    }

    #[test]
    fn test_merge_legacy_ignores_record_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);
        store.upsert(record("UC-a")).unwrap();

        let mut fields = Map::new();
        fields.insert("access_token".to_string(), Value::String("fresh".to_string()));
        store.merge_legacy(&fields).unwrap();

        // The record-list store is not clobbered into a flat object
        assert_eq!(store.load().len(), 1);
    }
}
