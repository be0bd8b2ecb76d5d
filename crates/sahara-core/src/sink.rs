//! Output artifact abstraction.
//!
//! Region files and the crash-info report are written through an
//! `OutputSink`, so the engine itself never touches the filesystem.
//! `DirSink` is the production implementation; `MemorySink` backs the
//! tests.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// An open artifact handle. Dropping it closes the artifact; written
/// data is kept on every path, including failure.
pub trait SinkFile: Send {
    fn append(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Flush buffered data and make it durable.
    fn sync(&mut self) -> io::Result<()>;
}

/// Factory for named output artifacts.
pub trait OutputSink {
    /// Create or truncate the named artifact.
    fn create(&mut self, name: &str) -> io::Result<Box<dyn SinkFile>>;
}

/// Directory-backed sink: one file per artifact.
pub struct DirSink {
    dir: PathBuf,
}

impl DirSink {
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }
}

impl OutputSink for DirSink {
    fn create(&mut self, name: &str) -> io::Result<Box<dyn SinkFile>> {
        // Artifact names come off the wire; keep them inside the directory.
        if name.contains(['/', '\\']) || name == ".." {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("artifact name {name:?} escapes the output directory"),
            ));
        }
        let path = self.dir.join(name);
        debug!(path = %path.display(), "creating artifact");
        Ok(Box::new(FileHandle(File::create(path)?)))
    }
}

struct FileHandle(File);

impl SinkFile for FileHandle {
    fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.0.write_all(bytes)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.0.flush()?;
        self.0.sync_all()
    }
}

/// In-memory sink for tests. Clones share contents.
#[derive(Clone, Default)]
pub struct MemorySink {
    files: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes written to the named artifact, if it was created.
    pub fn contents(&self, name: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(name).cloned()
    }

    pub fn file_names(&self) -> Vec<String> {
        self.files.lock().unwrap().keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.files.lock().unwrap().is_empty()
    }
}

impl OutputSink for MemorySink {
    fn create(&mut self, name: &str) -> io::Result<Box<dyn SinkFile>> {
        self.files
            .lock()
            .unwrap()
            .insert(name.to_string(), Vec::new());
        Ok(Box::new(MemFile {
            name: name.to_string(),
            files: Arc::clone(&self.files),
        }))
    }
}

struct MemFile {
    name: String,
    files: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl SinkFile for MemFile {
    fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut files = self.files.lock().unwrap();
        files
            .get_mut(&self.name)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, self.name.clone()))?
            .extend_from_slice(bytes);
        Ok(())
    }

    fn sync(&mut self) -> io::Result<()> {
        Ok(())
    }
}
