use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::types::{PersistError, StateDocument};

/// Durable home of the [`StateDocument`].
///
/// The store loads the document once at startup and rewrites it in full
/// after every mutation.
pub trait Persistence: Send + Sync {
    /// Returns the stored document, or `None` when nothing has been saved yet.
    fn load(&self) -> Result<Option<StateDocument>, PersistError>;

    /// Replaces the stored document.
    fn save(&self, doc: &StateDocument) -> Result<(), PersistError>;
}

impl<P: Persistence + ?Sized> Persistence for Arc<P> {
    fn load(&self) -> Result<Option<StateDocument>, PersistError> {
        (**self).load()
    }

    fn save(&self, doc: &StateDocument) -> Result<(), PersistError> {
        (**self).save(doc)
    }
}

/// Pretty-printed JSON file, replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct JsonFile {
    path: PathBuf,
}

impl JsonFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Persistence for JsonFile {
    fn load(&self) -> Result<Option<StateDocument>, PersistError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "No state file found");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        if content.trim().is_empty() {
            return Ok(None);
        }

        Ok(Some(serde_json::from_str(&content)?))
    }

    fn save(&self, doc: &StateDocument) -> Result<(), PersistError> {
        // serde_json writes non-ASCII characters verbatim
        let content = serde_json::to_vec_pretty(doc)?;
        atomic_write(&self.path, &content)?;
        Ok(())
    }
}

/// Writes `content` to `dst` through a temp file + fsync + rename, so the
/// destination is never left half-written.
fn atomic_write(dst: &Path, content: &[u8]) -> std::io::Result<()> {
    use std::time::{SystemTime, UNIX_EPOCH};

    if let Some(parent) = dst.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    // SEC-009: Unpredictable temp name so nobody can pre-plant a symlink there
    let random_suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let temp_path = dst.with_extension(format!("tmp.{:016x}", random_suffix));

    let result = (|| {
        let mut temp_file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)?;
        temp_file.write_all(content)?;
        temp_file.sync_all()?;
        drop(temp_file);

        // On Windows, rename fails if destination exists
        #[cfg(windows)]
        if dst.exists() {
            std::fs::remove_file(dst)?;
        }

        std::fs::rename(&temp_path, dst)
    })();

    if result.is_err() {
        let _ = std::fs::remove_file(&temp_path);
    }
    result
}

/// Keeps the document in memory only. Used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    doc: Mutex<Option<StateDocument>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from an existing document, as if it had been saved before.
    pub fn with_document(doc: StateDocument) -> Self {
        Self {
            doc: Mutex::new(Some(doc)),
        }
    }

    /// Last saved document.
    pub fn snapshot(&self) -> Option<StateDocument> {
        self.doc
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl Persistence for MemoryPersistence {
    fn load(&self) -> Result<Option<StateDocument>, PersistError> {
        Ok(self.snapshot())
    }

    fn save(&self, doc: &StateDocument) -> Result<(), PersistError> {
        *self
            .doc
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(doc.clone());
        Ok(())
    }
}
