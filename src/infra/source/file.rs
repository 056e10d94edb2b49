//! Newline-delimited device files.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::DeviceSource;
use crate::core::DispatchError;

/// Reads one device token per line. Blank lines and `#` comments are skipped.
///
/// With an empty key the configured path is read directly; otherwise the key
/// names a file inside it.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    /// Source rooted at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Configured path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn resolve(&self, key: &str) -> PathBuf {
        if key.is_empty() {
            self.path.clone()
        } else {
            self.path.join(key)
        }
    }
}

impl DeviceSource for FileSource {
    fn fetch(&self, key: &str) -> Result<Vec<String>, DispatchError> {
        let path = self.resolve(key);
        let content = fs::read_to_string(&path)
            .map_err(|e| DispatchError::SourceUnavailable(format!("{}: {e}", path.display())))?;
        let devices: Vec<String> = content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(ToString::to_string)
            .collect();
        debug!(path = %path.display(), devices = devices.len(), "device file read");
        Ok(devices)
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_tokens_from_keyed_file() {
        let dir = std::env::temp_dir().join(format!("push-dispatch-file-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("vip.txt"), "# header\naaaa\n\n  bbbb  \ncccc\n").unwrap();

        let source = FileSource::new(&dir);
        assert_eq!(source.fetch("vip.txt").unwrap(), vec!["aaaa", "bbbb", "cccc"]);

        let direct = FileSource::new(dir.join("vip.txt"));
        assert_eq!(direct.fetch("").unwrap().len(), 3);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_missing_file() {
        let source = FileSource::new("/nonexistent/push-dispatch");
        assert!(matches!(source.fetch("x"), Err(DispatchError::SourceUnavailable(_))));
    }
}
