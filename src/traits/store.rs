//! Persistent configuration store used for turnout state.
//!
//! The store treats each named entry as one opaque blob that is replaced
//! atomically. A failed write leaves the registry dirty, so the next persist
//! attempt writes it again.

use crate::error::StoreError;

/// Whole-blob key/value storage.
///
/// # Example
///
/// ```rust
/// use rs_dccstation::traits::ConfigStore;
/// use rs_dccstation::hal::MockConfigStore;
///
/// let mut store = MockConfigStore::new();
/// store.store("turnouts.json", b"[]").unwrap();
/// assert_eq!(store.load("turnouts.json").unwrap().as_deref(), Some(&b"[]"[..]));
/// assert!(store.load("missing").unwrap().is_none());
/// ```
pub trait ConfigStore {
    /// Reads the named entry, `Ok(None)` if it was never stored.
    fn load(&mut self, name: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Replaces the named entry.
    fn store(&mut self, name: &str, data: &[u8]) -> Result<(), StoreError>;
}

/// Filesystem-backed store: one file per entry inside a directory.
///
/// On the ESP32 the directory is a mounted SPIFFS/LittleFS partition; on the
/// desktop any writable directory works.
#[derive(Debug, Clone)]
pub struct FsConfigStore {
    root: std::path::PathBuf,
}

impl FsConfigStore {
    /// Creates a store rooted at `root`. The directory must already exist.
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, name: &str) -> std::path::PathBuf {
        self.root.join(name)
    }
}

impl ConfigStore for FsConfigStore {
    fn load(&mut self, name: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match std::fs::read(self.path(name)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn store(&mut self, name: &str, data: &[u8]) -> Result<(), StoreError> {
        // write-then-rename so a crash never leaves a truncated file behind
        let final_path = self.path(name);
        let tmp_path = self.path(&format!("{name}.tmp"));
        std::fs::write(&tmp_path, data)?;
        std::fs::rename(&tmp_path, &final_path)?;
        Ok(())
    }
}
