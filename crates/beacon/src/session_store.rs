use std::path::{Path, PathBuf};

use anyhow::Context as _;
use beacon_core::credentials::StoredSession;

/// On-disk home of the bearer token, written atomically.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing or unreadable file is treated as "not logged in".
    pub async fn load(&self) -> Option<StoredSession> {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "read session");
                return None;
            }
        };
        match serde_json::from_str(&data) {
            Ok(session) => Some(session),
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "parse session");
                None
            }
        }
    }

    pub async fn save(&self, session: &StoredSession) -> anyhow::Result<()> {
        let dir = self
            .path
            .parent()
            .context("session path has no parent directory")?;
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("create session dir: {}", dir.display()))?;

        let tmp = self.path.with_extension("json.tmp");
        let data = serde_json::to_vec_pretty(session).context("serialize session")?;

        tokio::fs::write(&tmp, &data)
            .await
            .with_context(|| format!("write {}", tmp.display()))?;
        restrict_permissions(&tmp).await?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("rename {} -> {}", tmp.display(), self.path.display()))?;

        Ok(())
    }

    /// Returns whether a file was removed.
    pub async fn wipe(&self) -> anyhow::Result<bool> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err).with_context(|| format!("remove {}", self.path.display())),
        }
    }
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt as _;

    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .await
        .with_context(|| format!("chmod {}", path.display()))
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path) -> anyhow::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_load_wipe() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = SessionStore::new(dir.path().join("nested").join("session.json"));
        assert!(store.load().await.is_none());

        let session = StoredSession::new("http://localhost:8600", "opaque-token");
        store.save(&session).await.unwrap();
        assert_eq!(store.load().await, Some(session));
        assert!(!dir.path().join("nested").join("session.json.tmp").exists());

        assert!(store.wipe().await.unwrap());
        assert!(store.load().await.is_none());
        assert!(!store.wipe().await.unwrap());
    }

    #[tokio::test]
    async fn corrupt_file_loads_as_none() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(SessionStore::new(path).load().await.is_none());
    }
}
