use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

pub trait StorageManager: Send + Sync {
    fn write(&self, ident: &str, data: &[u8]) -> std::io::Result<()>;
    fn read(&self, ident: &str) -> std::io::Result<Vec<u8>>;
    fn exists(&self, ident: &str) -> bool;
}

/// Files kept directly under one base directory.
#[derive(Clone)]
pub struct BackendLocal {
    pub base_dir: PathBuf,
}

impl BackendLocal {
    pub fn new(storage_dir: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(storage_dir)?;
        Ok(BackendLocal {
            base_dir: storage_dir.to_path_buf(),
        })
    }

    fn path(&self, ident: &str) -> PathBuf {
        self.base_dir.join(ident)
    }
}

impl StorageManager for BackendLocal {
    fn exists(&self, ident: &str) -> bool {
        std::fs::metadata(self.path(ident)).is_ok()
    }

    fn read(&self, ident: &str) -> std::io::Result<Vec<u8>> {
        std::fs::read(self.path(ident))
    }

    /// Write through a temp file and rename, so readers never see a partial file.
    fn write(&self, ident: &str, data: &[u8]) -> std::io::Result<()> {
        let temp_path = self.path(&format!(
            ".{ident}-{}-{}",
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::SeqCst)
        ));

        let written =
            std::fs::write(&temp_path, data).and_then(|_| std::fs::rename(&temp_path, self.path(ident)));

        if written.is_err() {
            let _ = std::fs::remove_file(&temp_path);
        }

        written
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = BackendLocal::new(&dir.path().join("nested")).unwrap();

        assert!(!store.exists("config.yaml"));
        store.write("config.yaml", b"search: {}\n").unwrap();
        assert!(store.exists("config.yaml"));
        assert_eq!(store.read("config.yaml").unwrap(), b"search: {}\n");

        // no temp files left behind
        let entries = std::fs::read_dir(&store.base_dir).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn failed_write_removes_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = BackendLocal::new(dir.path()).unwrap();

        // a non-empty directory in the way makes the rename fail
        let blocker = store.base_dir.join("config.yaml");
        std::fs::create_dir(&blocker).unwrap();
        std::fs::write(blocker.join("keep"), b"").unwrap();

        assert!(store.write("config.yaml", b"search: {}\n").is_err());

        let entries: Vec<_> = std::fs::read_dir(&store.base_dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("config.yaml")]);
    }

    #[test]
    fn read_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = BackendLocal::new(dir.path()).unwrap();
        assert!(store.read("missing").is_err());
    }
}
