//! Request-scoped config files handed to the runner.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::debug;

/// A JSON file that exists exactly as long as this value.
///
/// Contents are flushed and synced before [`TransientConfigFile::path`] is
/// handed out. Dropping the value removes the file, on error paths too.
#[derive(Debug)]
pub struct TransientConfigFile {
    file: NamedTempFile,
}

impl TransientConfigFile {
    /// Serialize `value` into a new file under `dir` (system temp dir when `None`).
    pub fn create<T: Serialize + ?Sized>(dir: Option<&Path>, value: &T) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("envrun-config-").suffix(".json");
        let mut file = match dir {
            Some(dir) => builder
                .tempfile_in(dir)
                .with_context(|| format!("create config file in {}", dir.display()))?,
            None => builder.tempfile().context("create config file")?,
        };

        serde_json::to_writer_pretty(&mut file, value).context("serialize runner config")?;
        file.write_all(b"\n").context("write runner config")?;
        file.flush().context("flush runner config")?;
        file.as_file().sync_all().context("sync runner config")?;

        debug!(path = %file.path().display(), "wrote transient config");
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}
