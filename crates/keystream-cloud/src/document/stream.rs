//! Stream adapter for document buckets
//!
//! Native bucket transports only go one way and never seek. Combined
//! read+write modes are served from a local [`BufferStream`] from the start;
//! a native handle asked to seek is converted into one. Buffered content
//! reaches the bucket as a full re-upload on flush and close.

use super::DocumentBucket;
use crate::BackendError;
use keystream_core::{
    copy_transport, copy_transport_limit, read_up_to, write_all, BufferConfig, BufferStream,
    CastKind, LocalBuffer, Result, Stream, StreamError, StreamMode, StreamStat, Transport, Whence,
};
use std::fmt;
use std::io::{self, SeekFrom};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Observable operating state of a [`DocumentStream`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatingState {
    Closed,
    NativeRead,
    NativeWrite,
    Buffered,
}

impl fmt::Display for OperatingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperatingState::Closed => "closed",
            OperatingState::NativeRead => "native read",
            OperatingState::NativeWrite => "native write",
            OperatingState::Buffered => "buffered",
        };
        f.write_str(name)
    }
}

enum State {
    Closed,
    NativeRead(Box<dyn Transport>),
    NativeWrite(Box<dyn Transport>),
    Buffered(BufferStream),
}

impl State {
    fn operating(&self) -> OperatingState {
        match self {
            State::Closed => OperatingState::Closed,
            State::NativeRead(_) => OperatingState::NativeRead,
            State::NativeWrite(_) => OperatingState::NativeWrite,
            State::Buffered(_) => OperatingState::Buffered,
        }
    }
}

/// POSIX-like stream over one file of a [`DocumentBucket`]
///
/// Once a handle has become buffered it stays buffered until closed.
pub struct DocumentStream {
    bucket: Arc<dyn DocumentBucket>,
    key: String,
    config: BufferConfig,
    mode: Option<StreamMode>,
    state: State,
}

impl fmt::Debug for DocumentStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentStream")
            .field("key", &self.key)
            .field("mode", &self.mode)
            .field("state", &self.state.operating())
            .finish()
    }
}

impl DocumentStream {
    /// Create a stream for file `key`, registering the bucket client
    pub fn new(bucket: Arc<dyn DocumentBucket>, key: impl Into<String>) -> Result<Self> {
        Self::with_config(bucket, key, BufferConfig::default())
    }

    pub fn with_config(
        bucket: Arc<dyn DocumentBucket>,
        key: impl Into<String>,
        config: BufferConfig,
    ) -> Result<Self> {
        let key = key.into();
        bucket
            .register()
            .map_err(|e| StreamError::backend(key.as_str(), e))?;

        Ok(DocumentStream {
            bucket,
            key,
            config,
            mode: None,
            state: State::Closed,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn mode(&self) -> Option<StreamMode> {
        self.mode
    }

    pub fn state(&self) -> OperatingState {
        self.state.operating()
    }

    fn open_err(&self, err: impl Into<keystream_core::BoxError>) -> StreamError {
        StreamError::backend_open(self.key.as_str(), err)
    }

    fn backend_err(&self, err: impl Into<keystream_core::BoxError>) -> StreamError {
        StreamError::backend(self.key.as_str(), err)
    }

    /// Delete the stored file, treating a missing one as already gone
    fn discard_stored(&self) -> Result<()> {
        match self.bucket.delete(&self.key) {
            Ok(()) | Err(BackendError::NotFound(_)) => Ok(()),
            Err(e) => Err(self.backend_err(e)),
        }
    }

    /// Copy the stored file into `to`, up to `limit` bytes
    fn download_into(&self, to: &mut dyn Transport, limit: u64) -> Result<u64> {
        let mut download = self
            .bucket
            .open_download_stream_by_name(&self.key)
            .map_err(|e| self.open_err(e))?;
        let copied = copy_transport_limit(download.as_mut(), to, limit);
        let _ = download.close();
        copied.map_err(|e| self.backend_err(e))
    }

    fn open_buffered(&self, mode: StreamMode, exists: bool) -> Result<State> {
        let mut buffer = LocalBuffer::new(self.config.spill_threshold);
        if exists && !mode.implies_existing_content_deletion() {
            let copied = self.download_into(&mut buffer, u64::MAX)?;
            trace!("Buffered {} existing bytes of {}", copied, self.key);
        }

        let position = if mode.implies_positioning_cursor_at_the_end() {
            SeekFrom::End(0)
        } else {
            SeekFrom::Start(0)
        };
        Transport::seek(&mut buffer, position)?;
        Ok(State::Buffered(BufferStream::with_buffer(
            self.key.as_str(),
            mode,
            buffer,
        )))
    }

    fn open_native_write(&self, mode: StreamMode, exists: bool) -> Result<State> {
        if exists && mode.implies_existing_content_deletion() {
            self.discard_stored()?;
        }

        let mut upload = self
            .bucket
            .open_upload_stream(&self.key)
            .map_err(|e| self.open_err(e))?;

        if exists && !mode.implies_existing_content_deletion() {
            match self.download_into(upload.as_mut(), u64::MAX) {
                Ok(copied) => trace!("Preserved {} existing bytes of {}", copied, self.key),
                Err(e) => {
                    upload.abort();
                    return Err(e);
                }
            }
        }
        Ok(State::NativeWrite(upload))
    }

    /// Turn a native handle into a buffered one holding the same content
    ///
    /// The native handle is consumed and released on every path.
    fn rebuffer(&mut self, mode: StreamMode) -> Result<()> {
        let state = std::mem::replace(&mut self.state, State::Closed);
        let buffer = match state {
            State::NativeWrite(upload) => self.rebuffer_write(upload),
            State::NativeRead(download) => self.rebuffer_read(download),
            other => {
                self.state = other;
                return Ok(());
            }
        };

        match buffer {
            Ok(buffer) => {
                self.state = State::Buffered(BufferStream::with_buffer(
                    self.key.as_str(),
                    mode,
                    buffer,
                ));
                Ok(())
            }
            Err(e) => {
                self.mode = None;
                Err(e)
            }
        }
    }

    /// Commit what was written, pull it back locally, drop the stored copy
    fn rebuffer_write(&self, mut upload: Box<dyn Transport>) -> Result<LocalBuffer> {
        let position = upload.position();
        debug!("Rebuffering write handle of {} at {}", self.key, position);
        finish(upload.as_mut()).map_err(|e| self.backend_err(e))?;

        let mut buffer = LocalBuffer::new(self.config.spill_threshold);
        let exists = self.bucket.exists(&self.key).map_err(|e| self.backend_err(e))?;
        if exists {
            self.download_into(&mut buffer, u64::MAX)?;
        }
        self.discard_stored()?;

        let end = buffer.len();
        Transport::seek(&mut buffer, SeekFrom::Start(position.min(end)))?;
        Ok(buffer)
    }

    /// Rebuild the consumed prefix from a fresh download, drain the rest
    /// from the live handle
    fn rebuffer_read(&self, mut download: Box<dyn Transport>) -> Result<LocalBuffer> {
        let position = download.position();
        debug!("Rebuffering read handle of {} at {}", self.key, position);

        let mut buffer = LocalBuffer::new(self.config.spill_threshold);
        let filled = self
            .download_into(&mut buffer, position)
            .and_then(|_| {
                copy_transport(download.as_mut(), &mut buffer).map_err(|e| self.backend_err(e))
            });
        if let Err(e) = download.close() {
            warn!("Failed to close download of {}: {}", self.key, e);
        }
        filled?;

        Transport::seek(&mut buffer, SeekFrom::Start(position))?;
        Ok(buffer)
    }

    /// Replace the stored file with the whole buffer, keeping the cursor
    fn reupload(&self, buffered: &mut BufferStream) -> Result<()> {
        let Some(buffer) = buffered.buffer_mut() else {
            return Ok(());
        };
        let position = buffer.position();
        debug!("Re-uploading {} ({} bytes)", self.key, buffer.len());

        self.discard_stored()?;
        let mut upload = self
            .bucket
            .open_upload_stream(&self.key)
            .map_err(|e| self.open_err(e))?;

        Transport::seek(buffer, SeekFrom::Start(0))?;
        let copied = copy_transport(buffer, upload.as_mut());
        Transport::seek(buffer, SeekFrom::Start(position))?;
        if let Err(e) = copied {
            upload.abort();
            return Err(self.backend_err(e));
        }
        finish(upload.as_mut()).map_err(|e| self.backend_err(e))
    }

    /// Let go of the live handle without anything reaching the bucket
    fn release_uncommitted(&mut self) {
        self.mode = None;
        match std::mem::replace(&mut self.state, State::Closed) {
            State::Closed => {}
            State::Buffered(mut buffered) => {
                if let Some(mut buffer) = buffered.take_buffer() {
                    let _ = buffer.truncate();
                    let _ = Transport::close(&mut buffer);
                }
            }
            State::NativeWrite(mut upload) => upload.abort(),
            State::NativeRead(mut download) => {
                if let Err(e) = download.close() {
                    warn!("Failed to close download of {}: {}", self.key, e);
                }
            }
        }
        trace!("Released {} without committing", self.key);
    }

    fn native(&mut self) -> Option<&mut dyn Transport> {
        match &mut self.state {
            State::NativeRead(transport) | State::NativeWrite(transport) => {
                Some(transport.as_mut())
            }
            _ => None,
        }
    }
}

/// Flush, then finalize; an upload that fails to flush is discarded
fn finish(transport: &mut dyn Transport) -> io::Result<()> {
    if let Err(e) = transport.flush() {
        transport.abort();
        return Err(e);
    }
    transport.close()
}

impl Stream for DocumentStream {
    fn open(&mut self, mode: StreamMode) -> Result<bool> {
        if !matches!(self.state, State::Closed) {
            self.close()?;
        }

        let exists = self
            .bucket
            .exists(&self.key)
            .map_err(|e| self.open_err(e))?;
        if exists && !mode.allows_existing_file_opening() {
            debug!("Refusing {} ({}): file exists", self.key, mode);
            return Ok(false);
        }
        if !exists && !mode.allows_new_file_opening() {
            debug!("Refusing {} ({}): file does not exist", self.key, mode);
            return Ok(false);
        }

        let state = if mode.is_read_write() {
            self.open_buffered(mode, exists)?
        } else if mode.allows_read() {
            let download = self
                .bucket
                .open_download_stream_by_name(&self.key)
                .map_err(|e| self.open_err(e))?;
            State::NativeRead(download)
        } else {
            self.open_native_write(mode, exists)?
        };
        debug!("Opened {} ({}) in {} state", self.key, mode, state.operating());

        self.mode = Some(mode);
        self.state = state;
        Ok(true)
    }

    fn read(&mut self, count: usize) -> Result<Option<Vec<u8>>> {
        let Some(mode) = self.mode else {
            return Ok(None);
        };
        if !mode.allows_read() {
            return Err(StreamError::access_denied(self.key.as_str(), "read"));
        }

        match &mut self.state {
            State::Closed => Ok(None),
            State::Buffered(buffered) => buffered.read(count),
            State::NativeRead(transport) | State::NativeWrite(transport) => {
                match read_up_to(transport.as_mut(), count) {
                    Ok(data) => Ok(Some(data)),
                    Err(e) => Err(StreamError::backend(self.key.as_str(), e)),
                }
            }
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<Option<usize>> {
        let Some(mode) = self.mode else {
            return Ok(None);
        };
        if !mode.allows_write() {
            return Err(StreamError::access_denied(self.key.as_str(), "write"));
        }

        match &mut self.state {
            State::Closed => Ok(None),
            State::Buffered(buffered) => buffered.write(data),
            State::NativeRead(transport) | State::NativeWrite(transport) => {
                match write_all(transport.as_mut(), data) {
                    Ok(()) => Ok(Some(data.len())),
                    Err(e) => Err(StreamError::backend(self.key.as_str(), e)),
                }
            }
        }
    }

    fn close(&mut self) -> Result<bool> {
        let state = std::mem::replace(&mut self.state, State::Closed);
        let mode = self.mode.take();

        let committed = match state {
            State::Closed => return Ok(false),
            State::Buffered(mut buffered) => {
                let uploaded = if mode.map_or(false, |mode| mode.allows_write()) {
                    self.reupload(&mut buffered)
                } else {
                    Ok(())
                };
                buffered.close()?;
                uploaded
            }
            State::NativeRead(mut transport) | State::NativeWrite(mut transport) => {
                finish(transport.as_mut()).map_err(|e| self.backend_err(e))
            }
        };
        committed?;
        trace!("Closed {}", self.key);
        Ok(true)
    }

    fn flush(&mut self) -> Result<bool> {
        let writable = self.mode.map_or(false, |mode| mode.allows_write());
        let mut state = std::mem::replace(&mut self.state, State::Closed);
        let result = match &mut state {
            State::Closed => Ok(false),
            State::Buffered(buffered) if writable => self.reupload(buffered).map(|_| true),
            State::Buffered(buffered) => buffered.flush(),
            State::NativeRead(transport) | State::NativeWrite(transport) => transport
                .flush()
                .map(|_| true)
                .map_err(|e| self.backend_err(e)),
        };
        self.state = state;
        result
    }

    fn seek(&mut self, offset: i64, whence: i32) -> Result<bool> {
        let Some(mode) = self.mode else {
            return Ok(false);
        };
        if let State::Buffered(buffered) = &mut self.state {
            return buffered.seek(offset, whence);
        }

        let Some(pos) = Whence::try_from(whence)
            .ok()
            .and_then(|whence| whence.to_seek_from(offset))
        else {
            return Ok(false);
        };
        let Some(transport) = self.native() else {
            return Ok(false);
        };
        if transport.seek(pos).is_ok() {
            return Ok(true);
        }

        self.rebuffer(mode)?;
        match &mut self.state {
            State::Buffered(buffered) => buffered.seek(offset, whence),
            _ => Ok(false),
        }
    }

    fn tell(&mut self) -> Result<Option<u64>> {
        match &mut self.state {
            State::Closed => Ok(None),
            State::Buffered(buffered) => buffered.tell(),
            State::NativeRead(transport) | State::NativeWrite(transport) => {
                Ok(Some(transport.position()))
            }
        }
    }

    fn eof(&mut self) -> bool {
        match &mut self.state {
            State::Closed => true,
            State::Buffered(buffered) => buffered.eof(),
            State::NativeRead(transport) | State::NativeWrite(transport) => transport.is_eof(),
        }
    }

    fn stat(&mut self) -> Result<Option<StreamStat>> {
        match &mut self.state {
            State::Closed => Ok(None),
            State::Buffered(buffered) => buffered.stat(),
            State::NativeRead(transport) | State::NativeWrite(transport) => {
                Ok(Some(StreamStat {
                    size: transport.len(),
                    position: transport.position(),
                    content_type: transport.content_type().map(str::to_string),
                    last_modified: transport.last_modified(),
                    ..Default::default()
                }))
            }
        }
    }

    fn cast(&mut self, kind: CastKind) -> Option<&mut dyn Transport> {
        match &mut self.state {
            State::Closed => None,
            State::Buffered(buffered) => buffered.cast(kind),
            State::NativeRead(transport) | State::NativeWrite(transport) => {
                Some(transport.as_mut())
            }
        }
    }

    fn unlink(&mut self) -> Result<bool> {
        let truncating = self
            .mode
            .map_or(false, |mode| mode.implies_existing_content_deletion());
        if !truncating {
            return Ok(false);
        }
        self.discard_stored()?;
        self.release_uncommitted();
        Ok(true)
    }
}

impl Drop for DocumentStream {
    fn drop(&mut self) {
        if !matches!(self.state, State::Closed) {
            if let Err(e) = self.close() {
                warn!("Failed to close {} on drop: {}", self.key, e);
            }
        }
    }
}
