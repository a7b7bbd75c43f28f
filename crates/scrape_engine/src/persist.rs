use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("directory missing or not writable: {0}")]
    Directory(String),
    #[error("invalid target path {0}")]
    InvalidTarget(PathBuf),
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Ensure a directory exists and accepts new files; create it if missing.
pub fn ensure_output_dir(dir: &Path) -> Result<(), PersistError> {
    if dir.exists() {
        let meta = fs::metadata(dir).map_err(|e| PersistError::Directory(e.to_string()))?;
        if !meta.is_dir() {
            return Err(PersistError::Directory(format!(
                "{} is not a directory",
                dir.display()
            )));
        }
    } else {
        fs::create_dir_all(dir).map_err(|e| PersistError::Directory(e.to_string()))?;
    }
    NamedTempFile::new_in(dir).map_err(|e| PersistError::Directory(e.to_string()))?;
    Ok(())
}

/// Writes a whole file through a sibling temp file and a rename, so readers
/// see either the old or the new content, never a mix.
#[derive(Debug, Clone)]
pub struct AtomicFileWriter {
    dir: PathBuf,
}

impl AtomicFileWriter {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Writer for the directory holding `path`, plus the file name to write.
    pub fn for_path(path: &Path) -> Result<(Self, String), PersistError> {
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| PersistError::InvalidTarget(path.to_path_buf()))?
            .to_string();
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Ok((Self::new(dir), filename))
    }

    pub fn write(&self, filename: &str, content: &[u8]) -> Result<PathBuf, PersistError> {
        ensure_output_dir(&self.dir)?;

        let target = self.dir.join(filename);
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(content)?;
        tmp.flush()?;
        tmp.as_file_mut().sync_all()?;
        tmp.persist(&target).map_err(|e| PersistError::Io(e.error))?;
        Ok(target)
    }
}

/// Pretty-printed JSON written atomically to `path`.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<PathBuf, PersistError> {
    let (writer, filename) = AtomicFileWriter::for_path(path)?;
    let mut json = serde_json::to_vec_pretty(value)?;
    json.push(b'\n');
    writer.write(&filename, &json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn creates_missing_output_dir() {
        let temp = TempDir::new().unwrap();
        let new_dir = temp.path().join("out");
        ensure_output_dir(&new_dir).unwrap();
        assert!(new_dir.is_dir());
    }

    #[test]
    fn write_replaces_existing_content() {
        let temp = TempDir::new().unwrap();
        let writer = AtomicFileWriter::new(temp.path().to_path_buf());

        let first = writer.write("store.json", b"hello").unwrap();
        let second = writer.write("store.json", b"world").unwrap();
        assert_eq!(first, second);
        assert_eq!(fs::read_to_string(&second).unwrap(), "world");
    }

    #[test]
    fn no_partial_file_when_directory_is_a_file() {
        let temp = TempDir::new().unwrap();
        let file_path = temp.path().join("not_a_dir");
        fs::write(&file_path, "x").unwrap();

        let writer = AtomicFileWriter::new(file_path.clone());
        assert!(writer.write("store.json", b"data").is_err());
        assert!(!file_path.with_file_name("store.json").exists());
    }

    #[test]
    fn json_lands_at_the_requested_path() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("report.json");
        write_json(&path, &vec![1, 2, 3]).unwrap();
        let parsed: Vec<u32> = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed, vec![1, 2, 3]);
    }
}
