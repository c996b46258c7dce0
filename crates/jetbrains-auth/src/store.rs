//! Accounts document storage
//!
//! The JSON document on disk is the single source of truth. Nothing is cached
//! between operations: every read goes to disk, and every mutation re-reads
//! the file, applies the change, backs up the pre-mutation file and writes
//! the result atomically (temp file + rename). A tokio Mutex serialises
//! writers inside this process. Writers in other processes are not
//! coordinated; the last writer wins.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::account::{AccountRecord, AccountsDocument};
use crate::error::{Error, Result};

/// File-backed accounts document.
pub struct AccountStore {
    path: PathBuf,
    backup_path: PathBuf,
    write_lock: Mutex<()>,
}

impl AccountStore {
    /// Store for `path`, backing up to the sibling `<stem>-backup.<ext>`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let backup_path = default_backup_path(&path);
        Self {
            path,
            backup_path,
            write_lock: Mutex::new(()),
        }
    }

    /// Override the backup location.
    pub fn with_backup_path(mut self, backup_path: impl Into<PathBuf>) -> Self {
        self.backup_path = backup_path.into();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_path(&self) -> &Path {
        &self.backup_path
    }

    /// Read and parse the document from disk.
    pub async fn load(&self) -> Result<AccountsDocument> {
        read_document(&self.path).await
    }

    /// Copy the current file to the backup path.
    ///
    /// Returns `false` (and logs) when there is no file to back up yet.
    pub async fn backup(&self) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        self.backup_locked().await
    }

    /// Replace the whole document (backup first).
    pub async fn save(&self, document: &AccountsDocument) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.backup_locked().await?;
        write_json_atomic(&self.path, document).await?;
        info!(path = %self.path.display(), accounts = document.accounts.len(), "saved accounts document");
        Ok(())
    }

    /// Apply `mutate` to one account of a freshly read document and persist it.
    ///
    /// The re-read happens under the write lock, so concurrent in-process
    /// updates to different fields of the document do not overwrite each
    /// other. Returns the updated record.
    pub async fn update_account<F>(&self, name: &str, mutate: F) -> Result<AccountRecord>
    where
        F: FnOnce(&mut AccountRecord),
    {
        let _guard = self.write_lock.lock().await;
        let mut document = read_document(&self.path).await?;
        let record = document
            .accounts
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        mutate(record);
        let updated = record.clone();

        self.backup_locked().await?;
        write_json_atomic(&self.path, &document).await?;
        debug!(account = name, "persisted account update");
        Ok(updated)
    }

    /// Backup body; callers hold `write_lock`.
    async fn backup_locked(&self) -> Result<bool> {
        if !tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            warn!(path = %self.path.display(), "accounts file does not exist, nothing to back up");
            return Ok(false);
        }
        tokio::fs::copy(&self.path, &self.backup_path)
            .await
            .map_err(|e| {
                Error::Config(format!(
                    "backing up {} to {}: {e}",
                    self.path.display(),
                    self.backup_path.display()
                ))
            })?;
        restrict_permissions(&self.backup_path).await?;
        debug!(backup = %self.backup_path.display(), "backed up accounts file");
        Ok(true)
    }
}

/// `config.json` → `config-backup.json`, in the same directory.
pub fn default_backup_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| String::from("accounts"));
    let name = match path.extension() {
        Some(ext) => format!("{stem}-backup.{}", ext.to_string_lossy()),
        None => format!("{stem}-backup"),
    };
    path.with_file_name(name)
}

async fn read_document(path: &Path) -> Result<AccountsDocument> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::Config(format!("reading {}: {e}", path.display())))?;
    serde_json::from_str(&contents)
        .map_err(|e| Error::Config(format!("parsing {}: {e}", path.display())))
}

/// Serialize `value` as pretty JSON and write it atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target, so a crash mid-write never leaves a truncated file. The file
/// holds bearer tokens and is restricted to 0600.
pub async fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut json = serde_json::to_string_pretty(value)
        .map_err(|e| Error::Config(format!("serializing {}: {e}", path.display())))?;
    json.push('\n');

    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = dir.join(format!(".{file_name}.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Config(format!("writing {}: {e}", tmp_path.display())))?;
    restrict_permissions(&tmp_path).await?;

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Config(format!("renaming into {}: {e}", path.display())))?;
    Ok(())
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .await
        .map_err(|e| Error::Config(format!("setting permissions on {}: {e}", path.display())))
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    use crate::account::Timestamp;

    async fn write_fixture(dir: &tempfile::TempDir, value: &Value) -> PathBuf {
        let path = dir.path().join("config.json");
        tokio::fs::write(&path, serde_json::to_string_pretty(value).unwrap())
            .await
            .unwrap();
        path
    }

    fn fixture() -> Value {
        json!({
            "accounts": {
                "a": {"id_token": "id_a", "license_id": "LIC-A", "custom": [1, 2]},
                "b": {"access_token": "at_b"}
            },
            "schema": "v2"
        })
    }

    async fn read_json(path: &Path) -> Value {
        serde_json::from_str(&tokio::fs::read_to_string(path).await.unwrap()).unwrap()
    }

    #[test]
    fn backup_path_is_sibling() {
        assert_eq!(
            default_backup_path(Path::new("/etc/jb/config.json")),
            PathBuf::from("/etc/jb/config-backup.json")
        );
        assert_eq!(
            default_backup_path(Path::new("accounts")),
            PathBuf::from("accounts-backup")
        );
    }

    #[tokio::test]
    async fn load_reads_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = AccountStore::new(write_fixture(&dir, &fixture()).await);

        let doc = store.load().await.unwrap();
        assert_eq!(doc.accounts.len(), 2);
        assert_eq!(doc.accounts["a"].license_id(), Some("LIC-A"));
    }

    #[tokio::test]
    async fn load_missing_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = AccountStore::new(dir.path().join("absent.json"));

        let err = store.load().await.unwrap_err();
        assert!(matches!(err, Error::Config(_)), "got: {err:?}");
    }

    #[tokio::test]
    async fn load_malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        tokio::fs::write(&path, "{ not json").await.unwrap();

        let err = AccountStore::new(path).load().await.unwrap_err();
        assert!(err.to_string().contains("parsing"), "got: {err}");
    }

    #[tokio::test]
    async fn update_backs_up_pre_write_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(&dir, &fixture()).await;
        let store = AccountStore::new(&path);

        let updated = store
            .update_account("a", |record| {
                record.access_token = Some("at_new".into());
                record.access_token_expires_at = Some(Timestamp::from(1_900_000_000));
            })
            .await
            .unwrap();
        assert_eq!(updated.access_token(), Some("at_new"));

        // Backup equals the document as it was before the write
        assert_eq!(read_json(store.backup_path()).await, fixture());

        // Written document has the change and keeps unknown fields
        let written = read_json(&path).await;
        assert_eq!(written["accounts"]["a"]["access_token"], "at_new");
        assert_eq!(written["accounts"]["a"]["custom"], json!([1, 2]));
        assert_eq!(written["schema"], "v2");
    }

    #[tokio::test]
    async fn each_write_backs_up_the_previous_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(&dir, &fixture()).await;
        let store = AccountStore::new(&path);

        store
            .update_account("a", |r| r.access_token = Some("first".into()))
            .await
            .unwrap();
        let after_first = read_json(&path).await;
        store
            .update_account("b", |r| r.access_token = Some("second".into()))
            .await
            .unwrap();

        assert_eq!(read_json(store.backup_path()).await, after_first);
    }

    #[tokio::test]
    async fn update_leaves_other_accounts_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let account_a = json!({
            "id_token": "id_a",
            "access_token_expires_at": 1760000000.25,
            "created_time": 1750000000.123456,
            "quota_info": {
                "remaining_amount": 750000,
                "usage_percentage": 25.0,
                "status": "paused",
                "until": "2026-11-01"
            }
        });
        let path = write_fixture(
            &dir,
            &json!({"accounts": {"a": account_a.clone(), "b": {"access_token": "at_b"}}}),
        )
        .await;
        let store = AccountStore::new(&path);

        store
            .update_account("b", |r| r.access_token = Some("at_b2".into()))
            .await
            .unwrap();

        let written = read_json(&path).await;
        assert_eq!(written["accounts"]["a"], account_a);
        assert_eq!(written["accounts"]["b"]["access_token"], "at_b2");
    }

    #[tokio::test]
    async fn update_unknown_account_leaves_file_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(&dir, &fixture()).await;
        let store = AccountStore::new(&path);

        let err = store.update_account("zzz", |_| {}).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)), "got: {err:?}");
        assert!(!store.backup_path().exists());
        assert_eq!(read_json(&path).await, fixture());
    }

    #[tokio::test]
    async fn backup_without_file_reports_false() {
        let dir = tempfile::tempdir().unwrap();
        let store = AccountStore::new(dir.path().join("config.json"));
        assert!(!store.backup().await.unwrap());
    }

    #[tokio::test]
    async fn custom_backup_path_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(&dir, &fixture()).await;
        let backup = dir.path().join("snapshots").join("before.json");
        tokio::fs::create_dir_all(backup.parent().unwrap()).await.unwrap();
        let store = AccountStore::new(&path).with_backup_path(&backup);

        assert!(store.backup().await.unwrap());
        assert_eq!(read_json(&backup).await, fixture());
    }

    #[tokio::test]
    async fn save_round_trips_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(&dir, &fixture()).await;
        let store = AccountStore::new(&path);

        let doc = store.load().await.unwrap();
        store.save(&doc).await.unwrap();
        assert_eq!(read_json(&path).await, fixture());
    }

    #[tokio::test]
    async fn concurrent_updates_do_not_lose_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(&dir, &fixture()).await;
        let store = std::sync::Arc::new(AccountStore::new(&path));

        let mut handles = vec![];
        for i in 0..10 {
            let store = store.clone();
            let name = if i % 2 == 0 { "a" } else { "b" };
            handles.push(tokio::spawn(async move {
                store
                    .update_account(name, move |record| {
                        record.extra.insert(format!("touch_{i}"), json!(i));
                    })
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let written = read_json(&path).await;
        for i in 0..10 {
            let name = if i % 2 == 0 { "a" } else { "b" };
            assert_eq!(written["accounts"][name][format!("touch_{i}")], json!(i));
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn written_file_is_0600() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(&dir, &fixture()).await;
        let store = AccountStore::new(&path);
        store.update_account("a", |_| {}).await.unwrap();

        let mode = tokio::fs::metadata(&path).await.unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "accounts file must be 0600, got {mode:o}");
    }
}
