use serde::{Deserialize, Serialize};
use std::{io, path::PathBuf, sync::Arc};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("credential file error: {0}")]
    Io(#[from] io::Error),
    #[error("credential file is not valid json: {0}")]
    Serialization(String),
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CredentialFile {
    #[serde(default)]
    auth_token: Option<String>,
}

#[derive(Debug)]
enum Backend {
    Memory(RwLock<Option<String>>),
    File(PathBuf),
}

/// Where the access token lives between runs. Cheap to clone; clones share
/// the same backing storage.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    backend: Arc<Backend>,
}

impl CredentialStore {
    pub fn in_memory() -> Self {
        Self {
            backend: Arc::new(Backend::Memory(RwLock::new(None))),
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: Arc::new(Backend::File(path.into())),
        }
    }

    pub async fn token(&self) -> Result<Option<String>, CredentialError> {
        match self.backend.as_ref() {
            Backend::Memory(slot) => Ok(slot.read().await.clone()),
            Backend::File(path) => {
                let bytes = match tokio::fs::read(path).await {
                    Ok(bytes) => bytes,
                    Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
                    Err(err) => return Err(err.into()),
                };
                let parsed: CredentialFile = serde_json::from_slice(&bytes)
                    .map_err(|err| CredentialError::Serialization(err.to_string()))?;
                Ok(parsed.auth_token.filter(|token| !token.is_empty()))
            }
        }
    }

    pub async fn save(&self, token: &str) -> Result<(), CredentialError> {
        match self.backend.as_ref() {
            Backend::Memory(slot) => {
                *slot.write().await = Some(token.to_string());
                Ok(())
            }
            Backend::File(path) => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                }
                let body = serde_json::to_vec(&CredentialFile {
                    auth_token: Some(token.to_string()),
                })
                .map_err(|err| CredentialError::Serialization(err.to_string()))?;
                tokio::fs::write(path, body).await?;
                debug!(event = "credential_saved", path = %path.display());
                Ok(())
            }
        }
    }

    pub async fn clear(&self) -> Result<(), CredentialError> {
        match self.backend.as_ref() {
            Backend::Memory(slot) => {
                *slot.write().await = None;
                Ok(())
            }
            Backend::File(path) => match tokio::fs::remove_file(path).await {
                Ok(()) => {
                    debug!(event = "credential_cleared", path = %path.display());
                    Ok(())
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(err.into()),
            },
        }
    }

    /// Any read failure counts as "no credential".
    pub async fn has_token(&self) -> bool {
        matches!(self.token().await, Ok(Some(_)))
    }
}
