//! Provides a loader which serves the files of a directory.
//!
//! The value of a key is the contents of the file with the same name. This is mostly useful to
//! run and observe a cluster of nodes without writing any code.
use std::path::PathBuf;

use anyhow::Context;
use peercache::group::Loader;

/// Loads values from the files within a directory.
pub struct DirectoryLoader {
    directory: PathBuf,
}

impl DirectoryLoader {
    /// Creates a loader for the given directory.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        DirectoryLoader {
            directory: directory.into(),
        }
    }
}

#[async_trait::async_trait]
impl Loader for DirectoryLoader {
    async fn load(&self, key: &str) -> anyhow::Result<Vec<u8>> {
        // Keys must never escape the directory...
        if key.contains('/') || key.contains('\\') || key.contains("..") {
            return Err(anyhow::anyhow!("Invalid key: {}", key));
        }

        let path = self.directory.join(key);
        log::debug!("Reading {}...", path.to_string_lossy());
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("Cannot read {}", path.to_string_lossy()))
    }
}
