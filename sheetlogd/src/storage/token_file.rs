use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Installed-application credentials as downloaded from the API console.
#[derive(Debug, Clone, Deserialize)]
pub struct CredentialsFile {
    pub installed: InstalledCredentials,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstalledCredentials {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
}

impl CredentialsFile {
    pub fn load(path: &Path) -> Result<Self, StorageError> {
        let raw = fs::read(path)?;
        Ok(serde_json::from_slice(&raw)?)
    }
}

/// Cached OAuth state, persisted between runs so the consent flow only
/// happens once.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OAuthState {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<i64>,
}

pub struct TokenFile {
    path: PathBuf,
}

impl TokenFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `None` when no token has been cached yet.
    pub fn load(&self) -> Result<Option<OAuthState>, StorageError> {
        match fs::read(&self.path) {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub fn save(&self, state: &OAuthState) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_vec_pretty(state)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_returns_none_for_missing_token() {
        let dir = tempfile::tempdir().unwrap();
        let file = TokenFile::new(dir.path().join("token.json"));
        assert!(file.load().unwrap().is_none());
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let file = TokenFile::new(dir.path().join("token.json"));
        let state = OAuthState {
            access_token: "access-1".into(),
            refresh_token: Some("refresh-1".into()),
            expires_at: Some(1_700_000_000),
        };

        file.save(&state).unwrap();
        let loaded = file.load().unwrap().unwrap();

        assert_eq!(loaded.access_token, "access-1");
        assert_eq!(loaded.refresh_token.as_deref(), Some("refresh-1"));
        assert_eq!(loaded.expires_at, Some(1_700_000_000));
    }

    #[test]
    fn credentials_parse_installed_section() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        fs::write(
            &path,
            r#"{
                "installed": {
                    "client_id": "client-id",
                    "client_secret": "client-secret",
                    "redirect_uris": ["urn:ietf:wg:oauth:2.0:oob"]
                }
            }"#,
        )
        .unwrap();

        let credentials = CredentialsFile::load(&path).unwrap();
        assert_eq!(credentials.installed.client_id, "client-id");
        assert_eq!(
            credentials.installed.redirect_uris,
            vec!["urn:ietf:wg:oauth:2.0:oob".to_string()]
        );
    }
}
