//! Local filesystem store: one file per key under a base directory.
//!
//! The base directory is created on first write. Streaming writes go to a
//! temporary sibling file that is renamed over the target on commit, so a
//! reader never observes a half-written entry.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{split_scheme, KeyValueStore, StorageError, StorageResult, StoreWriter};

// ---------------------------------------------------------------------------
// FileSystemStore
// ---------------------------------------------------------------------------

/// Store keeping each entry in `<base_dir>/<key>`.
#[derive(Debug, Clone)]
pub struct FileSystemStore {
    base_dir: PathBuf,
}

impl FileSystemStore {
    /// Creates a store rooted at `base_dir`.
    ///
    /// A leading `~` is expanded to the home directory and relative paths are
    /// resolved against the current directory. Nothing is created yet.
    pub fn new(base_dir: impl AsRef<Path>) -> StorageResult<Self> {
        let expanded = expand_home(base_dir.as_ref());
        let base_dir = if expanded.is_absolute() {
            expanded
        } else {
            std::env::current_dir()?.join(expanded)
        };
        Ok(Self { base_dir })
    }

    /// Creates a store from a `file:` URI, or from a bare path.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::UnsupportedUri`] for another scheme, a host,
    /// a query or fragment, or an empty path.
    pub fn from_uri(uri: &str) -> StorageResult<Self> {
        let path = parse_file_uri(uri)?;
        Self::new(path)
    }

    /// The directory holding the entries.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn entry_path(&self, key: &str) -> StorageResult<PathBuf> {
        if key.is_empty()
            || key == "."
            || key == ".."
            || key.contains(['/', '\\'])
        {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.base_dir.join(key))
    }

    fn ensure_base_dir(&self) -> StorageResult<()> {
        fs::create_dir_all(&self.base_dir)?;
        Ok(())
    }
}

impl KeyValueStore for FileSystemStore {
    fn uri(&self) -> String {
        format!("file:{}/", self.base_dir.display())
    }

    fn get(&self, key: &str) -> StorageResult<String> {
        let path = self.entry_path(key)?;
        fs::read_to_string(&path).map_err(|e| map_read_error(e, key))
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let path = self.entry_path(key)?;
        self.ensure_base_dir()?;
        fs::write(&path, value)?;
        debug!(path = %path.display(), size = value.len(), "file store set");
        Ok(())
    }

    fn has(&self, key: &str) -> StorageResult<bool> {
        Ok(self.entry_path(key)?.is_file())
    }

    fn reader<'a>(&'a self, key: &str) -> StorageResult<Box<dyn Read + 'a>> {
        let path = self.entry_path(key)?;
        let file = File::open(&path).map_err(|e| map_read_error(e, key))?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn writer<'a>(&'a self, key: &str) -> StorageResult<Box<dyn StoreWriter + 'a>> {
        let target = self.entry_path(key)?;
        self.ensure_base_dir()?;
        let temp = self
            .base_dir
            .join(format!(".{key}.{}.tmp", std::process::id()));
        let file = File::create(&temp)?;
        Ok(Box::new(AtomicFileWriter {
            file: Some(BufWriter::new(file)),
            temp,
            target,
        }))
    }
}

/// Maps a read failure, turning a missing file into the not-found signal.
fn map_read_error(e: io::Error, key: &str) -> StorageError {
    match e.kind() {
        io::ErrorKind::NotFound => StorageError::NotFound {
            key: key.to_string(),
        },
        io::ErrorKind::InvalidData => StorageError::Encoding(format!("{key}: {e}")),
        _ => StorageError::Io(e),
    }
}

// ---------------------------------------------------------------------------
// AtomicFileWriter
// ---------------------------------------------------------------------------

/// Writes to a temporary file and renames it into place on commit.
struct AtomicFileWriter {
    file: Option<BufWriter<File>>,
    temp: PathBuf,
    target: PathBuf,
}

impl Write for AtomicFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.file.as_mut() {
            Some(file) => file.write(buf),
            None => Err(io::Error::other("writer already committed")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl StoreWriter for AtomicFileWriter {
    fn commit(mut self: Box<Self>) -> StorageResult<()> {
        if let Some(file) = self.file.take() {
            let file = file.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()?;
        }
        fs::rename(&self.temp, &self.target)?;
        debug!(path = %self.target.display(), "file store commit");
        Ok(())
    }
}

impl Drop for AtomicFileWriter {
    fn drop(&mut self) {
        // Uncommitted (or failed) writes leave no trace.
        if self.temp.exists() {
            let _ = fs::remove_file(&self.temp);
        }
    }
}

// ---------------------------------------------------------------------------
// URI helpers
// ---------------------------------------------------------------------------

/// Extracts the path from a `file:` URI. URIs without a scheme are paths.
fn parse_file_uri(uri: &str) -> StorageResult<&str> {
    let path = match split_scheme(uri) {
        None => uri,
        Some((scheme, rest)) if scheme == "file" => match rest.strip_prefix("//") {
            Some(authority_and_path) => {
                let (host, path) = match authority_and_path.find('/') {
                    Some(i) => authority_and_path.split_at(i),
                    None => (authority_and_path, ""),
                };
                if !host.is_empty() {
                    return Err(StorageError::UnsupportedUri(format!(
                        "{uri}: the file scheme does not support a hostname"
                    )));
                }
                path
            }
            None => rest,
        },
        Some(_) => {
            return Err(StorageError::UnsupportedUri(format!(
                "{uri}: not a file scheme"
            )))
        }
    };
    if path.contains(['?', '#']) {
        return Err(StorageError::UnsupportedUri(format!(
            "{uri}: the file scheme does not support query or fragment"
        )));
    }
    if path.is_empty() {
        return Err(StorageError::UnsupportedUri(format!("{uri}: path is empty")));
    }
    Ok(path)
}

/// Expands a leading `~` to the home directory.
fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE")) {
        Some(home) => PathBuf::from(home).join(rest),
        None => path.to_path_buf(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
