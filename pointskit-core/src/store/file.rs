//! File-system storage backend with atomic write semantics.
//!
//! Writes follow the write-to-temp-then-rename pattern:
//!
//! 1. Write the value to a temporary file in the same directory
//! 2. `fsync()` the temporary file
//! 3. Atomically rename it onto the target name
//!
//! A reader therefore always observes either the complete old value or the
//! complete new value, never a partial write.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{LedgerError, LedgerResult};

use super::{BackendTier, StorageBackend};

fn io_error(context: &str, err: &std::io::Error) -> LedgerError {
    LedgerError::storage(format!("{context}: {err}"))
}

/// File-system implementation of [`StorageBackend`].
///
/// Each key maps to one file inside the backend directory. Keys are
/// sanitized to a safe filename alphabet before touching the file system.
#[derive(Debug, Clone)]
pub struct FileBackend {
    name: String,
    tier: BackendTier,
    directory: PathBuf,
}

impl FileBackend {
    /// Creates a backend rooted at `directory`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn new<S: Into<String>, P: AsRef<Path>>(
        name: S,
        tier: BackendTier,
        directory: P,
    ) -> LedgerResult<Self> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory).map_err(|e| {
            io_error(
                &format!("failed to create backend directory '{}'", directory.display()),
                &e,
            )
        })?;
        Ok(Self {
            name: name.into(),
            tier,
            directory,
        })
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let filename: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
            .collect();
        self.directory.join(filename)
    }
}

impl StorageBackend for FileBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn tier(&self) -> BackendTier {
        self.tier
    }

    fn read(&self, key: &str) -> LedgerResult<Option<String>> {
        let path = self.entry_path(key);
        match fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(
                &format!("failed to read '{}'", path.display()),
                &e,
            )),
        }
    }

    fn write(&self, key: &str, value: &str) -> LedgerResult<()> {
        let path = self.entry_path(key);
        // Append rather than `with_extension`: keys contain dots, and two
        // keys sharing a stem must not share a temp file.
        let mut tmp_os = path.clone().into_os_string();
        tmp_os.push(".tmp");
        let tmp_path = PathBuf::from(tmp_os);

        let mut tmp = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)
            .map_err(|e| {
                io_error(
                    &format!("failed to open temp file '{}'", tmp_path.display()),
                    &e,
                )
            })?;

        tmp.write_all(value.as_bytes())
            .map_err(|e| io_error("failed to write temp file", &e))?;
        tmp.sync_all()
            .map_err(|e| io_error("failed to sync temp file", &e))?;
        drop(tmp);

        fs::rename(&tmp_path, &path).map_err(|e| {
            io_error(
                &format!("failed to rename onto '{}'", path.display()),
                &e,
            )
        })?;

        // Sync the directory so the rename itself survives a crash.
        if let Ok(dir) = File::open(&self.directory) {
            let _ = dir.sync_all();
        }
        Ok(())
    }

    fn delete(&self, key: &str) -> LedgerResult<()> {
        let path = self.entry_path(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(
                &format!("failed to delete '{}'", path.display()),
                &e,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_backend_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new("file", BackendTier::Durable, dir.path()).unwrap();

        assert!(backend.read("pointskit.ledger").unwrap().is_none());

        backend.write("pointskit.ledger", "payload-1").unwrap();
        assert_eq!(
            backend.read("pointskit.ledger").unwrap(),
            Some("payload-1".to_string())
        );

        backend.write("pointskit.ledger", "payload-2").unwrap();
        assert_eq!(
            backend.read("pointskit.ledger").unwrap(),
            Some("payload-2".to_string())
        );

        backend.delete("pointskit.ledger").unwrap();
        assert!(backend.read("pointskit.ledger").unwrap().is_none());
        backend.delete("pointskit.ledger").unwrap();
    }

    #[test]
    fn test_file_backend_sanitizes_keys() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new("file", BackendTier::Durable, dir.path()).unwrap();

        backend.write("../escape/attempt", "value").unwrap();
        assert_eq!(
            backend.read("../escape/attempt").unwrap(),
            Some("value".to_string())
        );

        // Nothing may be written outside the backend directory.
        let parent_entries: Vec<_> = fs::read_dir(dir.path().parent().unwrap())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().contains("escape"))
            .collect();
        assert!(parent_entries.is_empty());
    }

    #[test]
    fn test_file_backend_no_leftover_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new("file", BackendTier::Durable, dir.path()).unwrap();

        backend.write("key", "value").unwrap();

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
