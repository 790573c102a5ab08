//! Persistent secrets for services that need one injected at start.
//!
//! The web UI signs sessions with a secret key; regenerating it on every
//! start would log everyone out. Secrets are generated once and kept as
//! owner-only files under the user data directory.

use std::path::PathBuf;

use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::debug;

use crate::error::{Error, Result};

const SECRET_LEN: usize = 48;

#[async_trait]
pub trait SecretSource: Send + Sync {
    /// Return the named secret, generating and persisting it on first use.
    async fn get_or_create(&self, name: &str) -> Result<String>;
}

/// File-backed store: one secret per file, mode 0600.
pub struct FileSecretStore {
    dir: PathBuf,
}

impl FileSecretStore {
    pub fn new() -> Result<Self> {
        let base = dirs::data_dir()
            .ok_or_else(|| Error::Secret("no user data directory available".to_string()))?;
        Ok(Self::at(base.join("podstack").join("secrets")))
    }

    pub fn at(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn generate() -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(SECRET_LEN)
            .map(char::from)
            .collect()
    }
}

#[async_trait]
impl SecretSource for FileSecretStore {
    async fn get_or_create(&self, name: &str) -> Result<String> {
        let path = self.dir.join(name);
        if path.exists() {
            let value = std::fs::read_to_string(&path)?;
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Ok(trimmed.to_string());
            }
        }

        std::fs::create_dir_all(&self.dir)?;
        let secret = Self::generate();
        std::fs::write(&path, &secret)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
        }
        debug!(secret = name, path = %path.display(), "generated new secret");
        Ok(secret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn generates_then_reuses_secret() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSecretStore::at(dir.path().to_path_buf());
        let first = store.get_or_create("webui").await.unwrap();
        let second = store.get_or_create("webui").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), SECRET_LEN);
        assert!(first.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[tokio::test]
    async fn distinct_names_get_distinct_secrets() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSecretStore::at(dir.path().to_path_buf());
        let a = store.get_or_create("a").await.unwrap();
        let b = store.get_or_create("b").await.unwrap();
        assert_ne!(a, b);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn secret_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let store = FileSecretStore::at(dir.path().to_path_buf());
        store.get_or_create("webui").await.unwrap();
        let mode = std::fs::metadata(dir.path().join("webui"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn empty_file_is_regenerated() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("webui"), "  \n").unwrap();
        let store = FileSecretStore::at(dir.path().to_path_buf());
        let secret = store.get_or_create("webui").await.unwrap();
        assert_eq!(secret.len(), SECRET_LEN);
    }
}
