use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use super::oauth::{OAuthTokens, TokenStore};

#[derive(Debug, Error)]
pub enum TokenFileError {
    #[error("token file {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("token file {path} is not valid JSON: {source}")]
    Decode {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Stores [`OAuthTokens`] as pretty JSON at a fixed path (conventionally `token.json`).
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `None` when no token file has been written yet.
    pub async fn load(&self) -> Result<Option<OAuthTokens>, TokenFileError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(TokenFileError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|source| TokenFileError::Decode {
                path: self.path.clone(),
                source,
            })
    }

    pub async fn save(&self, tokens: &OAuthTokens) -> Result<(), TokenFileError> {
        let io_err = |source| TokenFileError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        let body = serde_json::to_vec_pretty(tokens).map_err(|source| TokenFileError::Decode {
            path: self.path.clone(),
            source,
        })?;

        // Readers only ever see a complete file.
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(io_err)?;
        Ok(())
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    type Error = TokenFileError;

    async fn save_tokens(&self, tokens: &OAuthTokens) -> Result<(), Self::Error> {
        self.save(tokens).await
    }
}
