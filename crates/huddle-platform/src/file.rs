use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;
use tracing::debug;

use crate::{CredentialError, CredentialStore, ServiceTokens, TokenKind};

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("failed {action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed parsing {}: {source}", .path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed encoding {}: {source}", .path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

fn io_error(action: &'static str, path: &Path, source: io::Error) -> PersistError {
    PersistError::Io {
        action,
        path: path.to_path_buf(),
        source,
    }
}

/// Load JSON from disk; `Ok(None)` when the file does not exist.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, PersistError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(io_error("reading", path, err)),
    };

    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|source| PersistError::Decode {
            path: path.to_path_buf(),
            source,
        })
}

/// Write JSON through a temp file and rename, creating parent directories.
pub fn save_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), PersistError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|err| io_error("creating directory", parent, err))?;
    }

    let encoded = serde_json::to_vec_pretty(value).map_err(|source| PersistError::Encode {
        path: path.to_path_buf(),
        source,
    })?;
    let temp_path = temp_path_for(path);
    fs::write(&temp_path, encoded).map_err(|err| io_error("writing", &temp_path, err))?;

    if let Err(rename_err) = fs::rename(&temp_path, path) {
        // Windows does not allow replacing existing files via rename.
        debug!(
            path = %path.display(),
            error = %rename_err,
            "rename over existing file failed; replacing"
        );
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                let _ = fs::remove_file(&temp_path);
                return Err(io_error("replacing", path, err));
            }
        }
        fs::rename(&temp_path, path).map_err(|err| {
            let _ = fs::remove_file(&temp_path);
            io_error("renaming into", path, err)
        })?;
    }

    Ok(())
}

/// Remove a JSON file; missing files are fine.
pub fn clear_json(path: &Path) -> Result<(), PersistError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_error("deleting", path, err)),
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .and_then(|value| value.to_str())
        .unwrap_or("huddle.json");
    let now_nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_nanos())
        .unwrap_or(0);
    parent.join(format!(".{file_name}.{now_nanos}.tmp"))
}

type TokenFile = BTreeMap<String, ServiceTokens>;

/// Plain JSON file of tokens per service:
/// `{"huddle@example.com": {"access": "...", "refresh": "..."}}`.
///
/// For machines without a usable keyring. The file is not encrypted.
pub struct FileCredentialStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_tokens(&self) -> Result<TokenFile, CredentialError> {
        load_json::<TokenFile>(&self.path)
            .map(Option::unwrap_or_default)
            .map_err(|err| CredentialError::Backend(err.to_string()))
    }

    /// Writes `tokens`, or deletes the file once no service has any left.
    fn write_tokens(&self, tokens: &TokenFile) -> Result<(), CredentialError> {
        let written = if tokens.is_empty() {
            clear_json(&self.path)
        } else {
            save_json_atomic(&self.path, tokens)
        };
        written.map_err(|err| CredentialError::Backend(err.to_string()))
    }

    fn locked(&self) -> Result<MutexGuard<'_, ()>, CredentialError> {
        self.lock
            .lock()
            .map_err(|_| CredentialError::Backend("poisoned lock".to_owned()))
    }
}

impl CredentialStore for FileCredentialStore {
    fn store_token(
        &self,
        service: &str,
        kind: TokenKind,
        token: &str,
    ) -> Result<(), CredentialError> {
        let _guard = self.locked()?;
        let mut tokens = self.read_tokens()?;
        *tokens.entry(service.to_owned()).or_default().slot(kind) = Some(token.to_owned());
        self.write_tokens(&tokens)
    }

    fn load_token(
        &self,
        service: &str,
        kind: TokenKind,
    ) -> Result<Option<String>, CredentialError> {
        let _guard = self.locked()?;
        Ok(self
            .read_tokens()?
            .get(service)
            .and_then(|stored| stored.get(kind))
            .cloned())
    }

    fn remove_token(&self, service: &str, kind: TokenKind) -> Result<(), CredentialError> {
        let _guard = self.locked()?;
        let mut tokens = self.read_tokens()?;
        let Some(stored) = tokens.get_mut(service) else {
            return Ok(());
        };
        if stored.slot(kind).take().is_none() {
            return Ok(());
        }
        if stored.is_empty() {
            tokens.remove(service);
        }
        self.write_tokens(&tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn unique_temp_path(label: &str) -> PathBuf {
        let now_nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        env::temp_dir().join(format!("huddle-{label}-{now_nanos}.json"))
    }

    #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[test]
    fn json_save_load_clear() {
        let path = unique_temp_path("json");
        let sample = Sample {
            name: "general".into(),
            count: 3,
        };

        save_json_atomic(&path, &sample).expect("save should work");
        save_json_atomic(&path, &sample).expect("overwrite should work");
        let loaded = load_json::<Sample>(&path)
            .expect("load should work")
            .expect("file should be present");
        assert_eq!(loaded, sample);

        clear_json(&path).expect("clear should work");
        clear_json(&path).expect("clearing twice is fine");
        assert!(load_json::<Sample>(&path).expect("load after clear").is_none());
    }

    #[test]
    fn corrupt_json_is_a_decode_error() {
        let path = unique_temp_path("corrupt");
        fs::write(&path, "{not json").expect("write fixture");

        let err = load_json::<Sample>(&path).expect_err("corrupt file must fail");
        assert!(matches!(err, PersistError::Decode { .. }));
        clear_json(&path).expect("cleanup");
    }

    #[test]
    fn file_store_keeps_tokens_across_instances() {
        let path = unique_temp_path("credentials");
        let store = FileCredentialStore::new(&path);
        store
            .store_token("huddle", TokenKind::Access, "tok")
            .expect("store should work");

        let reopened = FileCredentialStore::new(&path);
        assert_eq!(
            reopened.load_token("huddle", TokenKind::Access).expect("load"),
            Some("tok".into())
        );
        assert_eq!(reopened.load_token("huddle", TokenKind::Refresh).expect("load"), None);

        let on_disk = fs::read_to_string(&path).expect("token file exists");
        let on_disk: serde_json::Value =
            serde_json::from_str(&on_disk).expect("token file is JSON");
        assert_eq!(on_disk, serde_json::json!({"huddle": {"access": "tok"}}));

        reopened
            .remove_token("huddle", TokenKind::Access)
            .expect("remove should work");
        assert_eq!(store.load_token("huddle", TokenKind::Access).expect("load"), None);
        assert!(!path.exists(), "empty token file is removed");
    }

    #[test]
    fn removing_a_missing_token_leaves_the_file_untouched() {
        let path = unique_temp_path("credentials-missing");
        let store = FileCredentialStore::new(&path);
        store
            .remove_token("huddle", TokenKind::Refresh)
            .expect("nothing stored is fine");
        assert!(!path.exists());

        store
            .store_token("huddle", TokenKind::Refresh, "r1")
            .expect("store refresh");
        store
            .remove_token("other", TokenKind::Refresh)
            .expect("other service is fine");
        assert_eq!(
            store.load_token("huddle", TokenKind::Refresh).expect("load"),
            Some("r1".into())
        );
        clear_json(&path).expect("cleanup");
    }
}
