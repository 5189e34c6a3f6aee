//! CloudReader - download transport for cloud objects

use crate::object::ObjectInfo;
use crate::BackendError;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use keystream_core::{Transport, TransportConfig};
use lru::LruCache;
use object_store::path::Path;
use object_store::ObjectStore;
use std::io::{self, SeekFrom};
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tracing::{debug, trace};

/// A download channel for one object
///
/// Data is fetched in aligned chunks with ranged GETs. A sequential reader
/// refuses to seek; a seekable one keeps recently used chunks in an LRU
/// cache so jumping back and forth does not refetch.
pub struct CloudReader {
    store: Arc<dyn ObjectStore>,
    runtime: Arc<Runtime>,
    path: Path,
    /// Current position in the object
    position: u64,
    /// Total size of the object
    size: u64,
    content_type: Option<String>,
    last_modified: DateTime<Utc>,
    seekable: bool,
    chunk_size: usize,
    /// Cache of recently read chunks, keyed by chunk start
    cache: LruCache<u64, Bytes>,
    closed: bool,
}

impl std::fmt::Debug for CloudReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudReader")
            .field("path", &self.path)
            .field("position", &self.position)
            .field("size", &self.size)
            .field("content_type", &self.content_type)
            .field("seekable", &self.seekable)
            .field("closed", &self.closed)
            .finish()
    }
}

impl CloudReader {
    pub(crate) fn new(
        store: Arc<dyn ObjectStore>,
        runtime: Arc<Runtime>,
        path: Path,
        info: ObjectInfo,
        seekable: bool,
        config: &TransportConfig,
    ) -> Self {
        // Sequential readers only ever look at the current chunk
        let cache_size = if seekable { config.read_cache_size } else { 1 };
        let cache_size = NonZeroUsize::new(cache_size.max(1)).unwrap_or(NonZeroUsize::MIN);

        CloudReader {
            store,
            runtime,
            path,
            position: 0,
            size: info.size,
            content_type: info.content_type,
            last_modified: info.last_modified,
            seekable,
            chunk_size: config.read_chunk_size.max(1),
            cache: LruCache::new(cache_size),
            closed: false,
        }
    }

    fn check_open(&self) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                format!("download of {} is already closed", self.path),
            ));
        }
        Ok(())
    }

    /// Download a chunk of data from the store
    fn fetch_chunk(&self, start: u64) -> io::Result<Bytes> {
        let end = (start + self.chunk_size as u64).min(self.size);
        debug!("Downloading chunk from {}: {:?}", self.path, start..end);

        self.runtime
            .block_on(self.store.get_range(&self.path, start as usize..end as usize))
            .map_err(|e| BackendError::from_store(self.path.as_ref(), e).into())
    }

    /// Get the chunk covering `position`, from cache or the store
    fn chunk_at(&mut self, position: u64) -> io::Result<(u64, Bytes)> {
        let chunk_start = (position / self.chunk_size as u64) * self.chunk_size as u64;

        if let Some(data) = self.cache.get(&chunk_start) {
            trace!("Cache hit for position {}", position);
            return Ok((chunk_start, data.clone()));
        }

        trace!("Cache miss for position {}", position);
        let data = self.fetch_chunk(chunk_start)?;
        self.cache.put(chunk_start, data.clone());
        Ok((chunk_start, data))
    }
}

impl Transport for CloudReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.check_open()?;
        if self.position >= self.size || buf.is_empty() {
            return Ok(0);
        }

        let (start, chunk) = self.chunk_at(self.position)?;
        let offset = (self.position - start) as usize;
        if offset >= chunk.len() {
            // Object shrank underneath us
            return Ok(0);
        }
        let to_read = buf.len().min(chunk.len() - offset);
        buf[..to_read].copy_from_slice(&chunk[offset..offset + to_read]);
        self.position += to_read as u64;
        Ok(to_read)
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.check_open()?;
        if !self.seekable {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("download of {} was not opened seekable", self.path),
            ));
        }

        let new_pos = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(offset) => self.size.checked_add_signed(offset),
            SeekFrom::Current(offset) => self.position.checked_add_signed(offset),
        };
        let new_pos = new_pos.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "Cannot seek before start of object")
        })?;
        if new_pos > self.size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Cannot seek beyond end of object",
            ));
        }

        self.position = new_pos;
        Ok(self.position)
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn len(&self) -> u64 {
        self.size
    }

    fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    fn is_seekable(&self) -> bool {
        self.seekable
    }

    fn last_modified(&self) -> Option<DateTime<Utc>> {
        Some(self.last_modified)
    }

    fn close(&mut self) -> io::Result<()> {
        self.check_open()?;
        self.closed = true;
        self.cache.clear();
        Ok(())
    }
}
