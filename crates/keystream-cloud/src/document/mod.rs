//! Document-store buckets and the stream adapter on top of them
//!
//! A bucket stores named files through strictly one-way transports: an
//! upload stream that becomes visible when closed, or a download stream
//! that reads from the start. Neither can seek.

mod stream;

pub use stream::{DocumentStream, OperatingState};

use crate::object::ObjectBackend;
use crate::{BackendError, Result};
use bytes::Bytes;
use keystream_core::Transport;
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, trace};

/// A client for a bucket of named files
pub trait DocumentBucket: Send + Sync {
    /// Prepare the client for use; calling it again is a no-op
    fn register(&self) -> Result<()> {
        Ok(())
    }

    fn open_upload_stream(&self, name: &str) -> Result<Box<dyn Transport>>;

    /// Open a download; fails with `NotFound` for unknown names
    fn open_download_stream_by_name(&self, name: &str) -> Result<Box<dyn Transport>>;

    fn exists(&self, name: &str) -> Result<bool>;

    /// Remove a file; fails with `NotFound` for unknown names
    fn delete(&self, name: &str) -> Result<()>;
}

type Files = Arc<Mutex<HashMap<String, Bytes>>>;

fn lock(files: &Files) -> MutexGuard<'_, HashMap<String, Bytes>> {
    files.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-process bucket, shared between clones
#[derive(Debug, Clone, Default)]
pub struct MemoryBucket {
    files: Files,
    registered: Arc<AtomicBool>,
}

impl MemoryBucket {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `data` under `name` directly, replacing any previous file
    pub fn insert(&self, name: impl Into<String>, data: impl Into<Bytes>) {
        lock(&self.files).insert(name.into(), data.into());
    }

    /// Current contents of `name`
    pub fn get(&self, name: &str) -> Option<Bytes> {
        lock(&self.files).get(name).cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.files).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }
}

impl DocumentBucket for MemoryBucket {
    fn register(&self) -> Result<()> {
        self.registered.store(true, Ordering::Release);
        Ok(())
    }

    fn open_upload_stream(&self, name: &str) -> Result<Box<dyn Transport>> {
        trace!("Opening upload stream for {}", name);
        Ok(Box::new(MemoryUpload {
            files: self.files.clone(),
            name: name.to_string(),
            data: Vec::new(),
            closed: false,
        }))
    }

    fn open_download_stream_by_name(&self, name: &str) -> Result<Box<dyn Transport>> {
        let data = self
            .get(name)
            .ok_or_else(|| BackendError::NotFound(name.to_string()))?;
        trace!("Opening download stream for {} ({} bytes)", name, data.len());
        Ok(Box::new(MemoryDownload {
            name: name.to_string(),
            data,
            pos: 0,
            closed: false,
        }))
    }

    fn exists(&self, name: &str) -> Result<bool> {
        Ok(lock(&self.files).contains_key(name))
    }

    fn delete(&self, name: &str) -> Result<()> {
        match lock(&self.files).remove(name) {
            Some(_) => Ok(()),
            None => Err(BackendError::NotFound(name.to_string())),
        }
    }
}

fn closed_error(name: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotConnected,
        format!("stream for {} is already closed", name),
    )
}

/// Upload stream of a [`MemoryBucket`]; the file appears on close
#[derive(Debug)]
struct MemoryUpload {
    files: Files,
    name: String,
    data: Vec<u8>,
    closed: bool,
}

impl Transport for MemoryUpload {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(closed_error(&self.name));
        }
        self.data.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn position(&self) -> u64 {
        self.data.len() as u64
    }

    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Err(closed_error(&self.name));
        }
        self.closed = true;
        let data = Bytes::from(std::mem::take(&mut self.data));
        debug!("Stored {} ({} bytes)", self.name, data.len());
        lock(&self.files).insert(self.name.clone(), data);
        Ok(())
    }

    fn abort(&mut self) {
        self.closed = true;
        self.data.clear();
    }
}

/// Download stream of a [`MemoryBucket`]
#[derive(Debug)]
struct MemoryDownload {
    name: String,
    data: Bytes,
    pos: usize,
    closed: bool,
}

impl Transport for MemoryDownload {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.closed {
            return Err(closed_error(&self.name));
        }
        let remaining = &self.data[self.pos.min(self.data.len())..];
        let n = buf.len().min(remaining.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.pos += n;
        Ok(n)
    }

    fn position(&self) -> u64 {
        self.pos as u64
    }

    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Err(closed_error(&self.name));
        }
        self.closed = true;
        Ok(())
    }
}

/// Bucket semantics over an [`ObjectBackend`], one object per file name
///
/// Names are stored under an optional key prefix.
#[derive(Clone)]
pub struct StoreBucket {
    backend: Arc<dyn ObjectBackend>,
    prefix: String,
}

impl std::fmt::Debug for StoreBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreBucket")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl StoreBucket {
    pub fn new(backend: Arc<dyn ObjectBackend>) -> Self {
        Self::with_prefix(backend, "")
    }

    pub fn with_prefix(backend: Arc<dyn ObjectBackend>, prefix: impl Into<String>) -> Self {
        StoreBucket {
            backend,
            prefix: prefix.into(),
        }
    }

    fn key(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", self.prefix.trim_end_matches('/'), name)
        }
    }
}

impl DocumentBucket for StoreBucket {
    fn register(&self) -> Result<()> {
        self.backend.register()
    }

    fn open_upload_stream(&self, name: &str) -> Result<Box<dyn Transport>> {
        self.backend.open_upload(&self.key(name), None)
    }

    fn open_download_stream_by_name(&self, name: &str) -> Result<Box<dyn Transport>> {
        self.backend.open_download(&self.key(name), false)
    }

    fn exists(&self, name: &str) -> Result<bool> {
        self.backend.exists(&self.key(name))
    }

    fn delete(&self, name: &str) -> Result<()> {
        let key = self.key(name);
        if !self.backend.exists(&key)? {
            return Err(BackendError::NotFound(name.to_string()));
        }
        self.backend.delete(&key)
    }
}
