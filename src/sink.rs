//! Output destinations and result rendering.
//!
//! # Design
//!
//! The drain task is the only writer for a run; everything else communicates
//! through the result queue. These types only abstract *where* bytes go
//! (`OutputSink`) and how structured results become bytes (`Render`).
//!
//! Write failures return errors instead of panicking: a broken destination
//! must abort the whole pipeline through the normal error path.

use serde_yaml::Value;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

/// Buffer size for file-backed sinks (64 KiB keeps syscalls off the drain loop).
const DEFAULT_BUF_CAPACITY: usize = 64 * 1024;

// ============================================================================
// Destinations
// ============================================================================

/// Byte destination for the drain task.
///
/// Implementations serialize concurrent callers internally, but the pipeline
/// only ever writes from its single drain task.
pub trait OutputSink: Send + Sync + 'static {
    fn write_all(&self, bytes: &[u8]) -> io::Result<()>;
    fn flush(&self) -> io::Result<()>;
}

/// Stdout destination.
pub struct StdoutSink {
    out: Mutex<BufWriter<io::Stdout>>,
}

impl StdoutSink {
    pub fn new() -> Self {
        Self {
            out: Mutex::new(BufWriter::with_capacity(DEFAULT_BUF_CAPACITY, io::stdout())),
        }
    }
}

impl Default for StdoutSink {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputSink for StdoutSink {
    fn write_all(&self, bytes: &[u8]) -> io::Result<()> {
        self.out
            .lock()
            .expect("stdout sink mutex poisoned")
            .write_all(bytes)
    }

    fn flush(&self) -> io::Result<()> {
        self.out.lock().expect("stdout sink mutex poisoned").flush()
    }
}

/// File destination.
pub struct FileSink {
    out: Mutex<BufWriter<File>>,
}

impl FileSink {
    /// Wrap an already-opened file (the CLI owns open flags and permissions).
    pub fn from_file(file: File) -> Self {
        Self {
            out: Mutex::new(BufWriter::with_capacity(DEFAULT_BUF_CAPACITY, file)),
        }
    }

    /// Create or truncate `path`.
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self::from_file(File::create(path)?))
    }
}

impl OutputSink for FileSink {
    fn write_all(&self, bytes: &[u8]) -> io::Result<()> {
        self.out
            .lock()
            .expect("file sink mutex poisoned")
            .write_all(bytes)
    }

    fn flush(&self) -> io::Result<()> {
        self.out.lock().expect("file sink mutex poisoned").flush()
    }
}

/// In-memory destination for tests.
pub struct VecSink {
    buf: Mutex<Vec<u8>>,
}

impl VecSink {
    pub fn new() -> Self {
        Self {
            buf: Mutex::new(Vec::new()),
        }
    }

    /// Extract captured bytes, leaving the buffer empty.
    pub fn take(&self) -> Vec<u8> {
        std::mem::take(&mut self.buf.lock().expect("vec sink mutex poisoned"))
    }

    pub fn len(&self) -> usize {
        self.buf.lock().expect("vec sink mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for VecSink {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputSink for VecSink {
    fn write_all(&self, bytes: &[u8]) -> io::Result<()> {
        self.buf
            .lock()
            .expect("vec sink mutex poisoned")
            .extend_from_slice(bytes);
        Ok(())
    }

    fn flush(&self) -> io::Result<()> {
        Ok(())
    }
}

/// Destination that fails every write; test-only aid for abort paths.
pub struct FailingSink;

impl OutputSink for FailingSink {
    fn write_all(&self, _bytes: &[u8]) -> io::Result<()> {
        Err(io::Error::other("sink write failure (synthetic)"))
    }

    fn flush(&self) -> io::Result<()> {
        Ok(())
    }
}

// ============================================================================
// Rendering
// ============================================================================

/// Serialize a structured result for emission. Raw byte results never pass
/// through here.
pub trait Render: Send + Sync + 'static {
    fn render(&self, object: &Value) -> io::Result<Vec<u8>>;
}

/// YAML renderer.
pub struct YamlRenderer;

impl Render for YamlRenderer {
    fn render(&self, object: &Value) -> io::Result<Vec<u8>> {
        serde_yaml::to_string(object)
            .map(String::into_bytes)
            .map_err(io::Error::other)
    }
}

// ============================================================================
// Tests
// ============================================================================
