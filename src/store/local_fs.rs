//! Local filesystem file store
//!
//! Store paths are mapped onto files under a base directory. Leading
//! separators are ignored so `/a/b.txt` and `a/b.txt` name the same file.

use super::{Contents, FileStore, StoreError};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

/// Local filesystem file store
#[derive(Debug, Clone)]
pub struct LocalFsFileStore {
    base_path: PathBuf,
}

impl LocalFsFileStore {
    /// Create a store rooted at `base_path`, creating the directory if needed
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let base_path = base_path.into();
        std::fs::create_dir_all(&base_path)?;
        Ok(LocalFsFileStore { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Map a store path onto the filesystem, rejecting anything that could
    /// escape the base directory
    fn full_path(&self, path: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(path.trim_start_matches('/'));
        for component in relative.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => return Err(StoreError::InvalidPath(path.to_string())),
            }
        }
        Ok(self.base_path.join(relative))
    }

    fn walk_dir(&self, dir: &Path, prefix: &str, out: &mut Vec<String>) -> Result<(), StoreError> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();

            if path.is_dir() {
                self.walk_dir(&path, prefix, out)?;
            } else if let Ok(relative) = path.strip_prefix(&self.base_path) {
                let key = format!("/{}", relative.to_string_lossy().replace('\\', "/"));
                if key.starts_with(prefix) {
                    out.push(key);
                }
            }
        }
        Ok(())
    }
}

impl FileStore for LocalFsFileStore {
    fn write(&self, path: &str, contents: Contents) -> Result<(), StoreError> {
        let full = self.full_path(path)?;
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&full, contents.as_bytes())?;
        Ok(())
    }

    fn read(&self, path: &str) -> Result<Contents, StoreError> {
        let full = self.full_path(path)?;
        let data = match std::fs::read(&full) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound(path.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        match String::from_utf8(data) {
            Ok(text) => Ok(Contents::Text(text)),
            Err(e) => Ok(Contents::Bytes(e.into_bytes())),
        }
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut paths = Vec::new();
        self.walk_dir(&self.base_path, prefix, &mut paths)?;
        paths.sort();
        Ok(paths)
    }

    fn delete(&self, path: &str) -> Result<(), StoreError> {
        let full = self.full_path(path)?;
        match std::fs::remove_file(&full) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()), // Already deleted
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_localfs_write_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFsFileStore::new(dir.path()).unwrap();

        store.write("/nested/file.txt", "hello world".into()).unwrap();
        assert_eq!(
            store.read("/nested/file.txt").unwrap(),
            Contents::from("hello world")
        );
    }

    #[test]
    fn test_localfs_binary_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFsFileStore::new(dir.path()).unwrap();

        store.write("/blob.bin", Contents::Bytes(vec![0x00, 0x01, 0xff])).unwrap();
        assert_eq!(
            store.read("/blob.bin").unwrap(),
            Contents::Bytes(vec![0x00, 0x01, 0xff])
        );
    }

    #[test]
    fn test_localfs_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFsFileStore::new(dir.path()).unwrap();

        assert!(matches!(store.read("/nope"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_localfs_rejects_escape() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFsFileStore::new(dir.path()).unwrap();

        let result = store.write("/../outside.txt", "x".into());
        assert!(matches!(result, Err(StoreError::InvalidPath(_))));
    }

    #[test]
    fn test_localfs_list_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFsFileStore::new(dir.path()).unwrap();

        store.write("/sessions/a.json", "1".into()).unwrap();
        store.write("/sessions/b.json", "2".into()).unwrap();
        store.write("/users/c.json", "3".into()).unwrap();

        assert_eq!(
            store.list("/sessions/").unwrap(),
            vec!["/sessions/a.json", "/sessions/b.json"]
        );

        store.delete("/sessions/a.json").unwrap();
        store.delete("/sessions/a.json").unwrap();
        assert_eq!(store.list("/sessions/").unwrap(), vec!["/sessions/b.json"]);
    }
}
