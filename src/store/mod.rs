//! File Store Abstraction
//!
//! A key-addressed content store: write/read/list/delete over string paths.
//! The webhook notifiers wrap any `FileStore` and delegate all four
//! operations to it unchanged.
//!
//! Implementations:
//! - `InMemoryFileStore`: For unit tests and simulation
//! - `LocalFsFileStore`: Files rooted under a base directory

pub mod local_fs;

pub use local_fs::LocalFsFileStore;

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::io::{Error as IoError, ErrorKind};
use std::sync::Arc;

/// Stored content: either text or raw bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Contents {
    Text(String),
    Bytes(Vec<u8>),
}

impl Contents {
    /// Length in bytes (UTF-8 length for text)
    pub fn len(&self) -> usize {
        match self {
            Contents::Text(s) => s.len(),
            Contents::Bytes(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Contents::Text(s) => s.as_bytes(),
            Contents::Bytes(b) => b,
        }
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, Contents::Bytes(_))
    }
}

impl Default for Contents {
    fn default() -> Self {
        Contents::Text(String::new())
    }
}

impl From<&str> for Contents {
    fn from(s: &str) -> Self {
        Contents::Text(s.to_string())
    }
}

impl From<String> for Contents {
    fn from(s: String) -> Self {
        Contents::Text(s)
    }
}

impl From<Vec<u8>> for Contents {
    fn from(b: Vec<u8>) -> Self {
        Contents::Bytes(b)
    }
}

impl From<&[u8]> for Contents {
    fn from(b: &[u8]) -> Self {
        Contents::Bytes(b.to_vec())
    }
}

impl<const N: usize> From<&[u8; N]> for Contents {
    fn from(b: &[u8; N]) -> Self {
        Contents::Bytes(b.to_vec())
    }
}

/// Error type for file store operations
#[derive(Debug)]
pub enum StoreError {
    /// Path not found
    NotFound(String),
    /// Path escapes the store root or is otherwise unusable
    InvalidPath(String),
    /// I/O error
    Io(IoError),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound(path) => write!(f, "File not found: {}", path),
            StoreError::InvalidPath(path) => write!(f, "Invalid path: {}", path),
            StoreError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<IoError> for StoreError {
    fn from(e: IoError) -> Self {
        match e.kind() {
            ErrorKind::NotFound => StoreError::NotFound(e.to_string()),
            _ => StoreError::Io(e),
        }
    }
}

/// Synchronous key-value file store
///
/// The store owns the semantics of `read` and `list`; wrappers must not
/// reinterpret their results.
pub trait FileStore: Send + Sync + 'static {
    /// Create or overwrite the content at `path`
    fn write(&self, path: &str, contents: Contents) -> Result<(), StoreError>;

    /// Read the content at `path`
    fn read(&self, path: &str) -> Result<Contents, StoreError>;

    /// List paths starting with `prefix`
    fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Delete the content at `path`
    fn delete(&self, path: &str) -> Result<(), StoreError>;
}

impl<S: FileStore + ?Sized> FileStore for Arc<S> {
    fn write(&self, path: &str, contents: Contents) -> Result<(), StoreError> {
        (**self).write(path, contents)
    }

    fn read(&self, path: &str) -> Result<Contents, StoreError> {
        (**self).read(path)
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        (**self).list(prefix)
    }

    fn delete(&self, path: &str) -> Result<(), StoreError> {
        (**self).delete(path)
    }
}

// ============================================================================
// InMemoryFileStore - For tests and simulation
// ============================================================================

/// In-memory file store
///
/// Missing paths read as empty text and `list` is a plain string-prefix test.
#[derive(Debug, Default, Clone)]
pub struct InMemoryFileStore {
    files: Arc<RwLock<BTreeMap<String, Contents>>>,
}

impl InMemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored files
    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }

    /// Copy of every stored file, ordered by path
    pub fn snapshot(&self) -> BTreeMap<String, Contents> {
        self.files.read().clone()
    }
}

impl FileStore for InMemoryFileStore {
    fn write(&self, path: &str, contents: Contents) -> Result<(), StoreError> {
        self.files.write().insert(path.to_string(), contents);
        Ok(())
    }

    fn read(&self, path: &str) -> Result<Contents, StoreError> {
        Ok(self.files.read().get(path).cloned().unwrap_or_default())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .files
            .read()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn delete(&self, path: &str) -> Result<(), StoreError> {
        self.files.write().remove(path);
        Ok(())
    }
}
