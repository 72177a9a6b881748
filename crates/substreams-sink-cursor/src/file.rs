//! File cursor backend.
//!
//! The cursor lives in one flat file as raw UTF-8. Writes go to a sibling
//! temporary file which is then renamed over the target, so a crash never
//! leaves a half-written cursor behind.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use substreams_sink_core::checkpoint::CursorStore;
use substreams_sink_core::cursor::CursorToken;
use substreams_sink_core::error::CursorError;

/// Cursor stored in a local file (default `cursor.lock`).
#[derive(Debug, Clone)]
pub struct FileCursorStore {
    path: PathBuf,
    location: String,
}

impl FileCursorStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            location: path.display().to_string(),
            path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "cursor".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn io_error(&self, source: std::io::Error) -> CursorError {
        CursorError::Io {
            location: self.location.clone(),
            source,
        }
    }
}

#[async_trait]
impl CursorStore for FileCursorStore {
    async fn read(&self) -> Result<CursorToken, CursorError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => Ok(CursorToken::from(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(CursorToken::empty()),
            Err(e) => Err(self.io_error(e)),
        }
    }

    async fn write(&self, token: &CursorToken) -> Result<(), CursorError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_error(e))?;
        }
        let temp = self.temp_path();
        tokio::fs::write(&temp, token.as_str())
            .await
            .map_err(|e| self.io_error(e))?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(|e| self.io_error(e))
    }

    fn location(&self) -> &str {
        &self.location
    }
}
