//! Stream adapter for object stores

use super::ObjectBackend;
use crate::BackendError;
use keystream_core::sniff::sniff_reader;
use keystream_core::stream::resolve_seek;
use keystream_core::{
    copy_transport, read_up_to, write_all, CastKind, ContentSniffer, LocalBuffer, MagicSniffer,
    Result, Stream, StreamConfig, StreamError, StreamMode, StreamStat, Transport, Whence,
};
use std::io::{self, SeekFrom};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// The handle a stream currently serves calls from
enum Handle {
    /// Backend upload or download transport
    Native(Box<dyn Transport>),
    /// Local buffer collecting a truncating write until the content type is known
    Buffer(LocalBuffer),
}

impl Handle {
    fn transport(&mut self) -> &mut dyn Transport {
        match self {
            Handle::Native(transport) => transport.as_mut(),
            Handle::Buffer(buffer) => buffer,
        }
    }

    fn transport_ref(&self) -> &dyn Transport {
        match self {
            Handle::Native(transport) => transport.as_ref(),
            Handle::Buffer(buffer) => buffer,
        }
    }

    fn error(&self, key: &str, err: io::Error) -> StreamError {
        match self {
            Handle::Native(_) => StreamError::backend(key, err),
            Handle::Buffer(_) => StreamError::Io(err),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Handle::Native(_) => "native",
            Handle::Buffer(_) => "buffer",
        }
    }
}

/// POSIX-like stream over one key of an [`ObjectBackend`]
///
/// Handles are one-directional: opening with a combined read+write mode is
/// refused. Downloads start sequential and are reopened seekable on the
/// first seek. With content-type detection enabled, truncating writes are
/// collected locally and uploaded on close under the detected type.
pub struct ObjectStream {
    backend: Arc<dyn ObjectBackend>,
    key: String,
    config: StreamConfig,
    sniffer: Arc<dyn ContentSniffer>,
    mode: Option<StreamMode>,
    handle: Option<Handle>,
    seekable: bool,
}

impl std::fmt::Debug for ObjectStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStream")
            .field("key", &self.key)
            .field("mode", &self.mode)
            .field("handle", &self.handle.as_ref().map(Handle::label))
            .field("seekable", &self.seekable)
            .finish()
    }
}

impl ObjectStream {
    /// Create a stream for `key`, registering the backend client
    pub fn new(
        backend: Arc<dyn ObjectBackend>,
        key: impl Into<String>,
        config: StreamConfig,
    ) -> Result<Self> {
        let key = key.into();
        backend
            .register()
            .map_err(|e| StreamError::backend(key.as_str(), e))?;

        Ok(ObjectStream {
            backend,
            key,
            config,
            sniffer: Arc::new(MagicSniffer),
            mode: None,
            handle: None,
            seekable: false,
        })
    }

    /// Replace the content-type detector
    pub fn with_sniffer(mut self, sniffer: Arc<dyn ContentSniffer>) -> Self {
        self.sniffer = sniffer;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn mode(&self) -> Option<StreamMode> {
        self.mode
    }

    /// Whether the download was reopened in seekable form
    pub fn is_seekable(&self) -> bool {
        self.seekable
    }

    /// Whether writes are being collected locally for content-type detection
    pub fn is_buffered(&self) -> bool {
        matches!(self.handle, Some(Handle::Buffer(_)))
    }

    fn open_err(&self, err: BackendError) -> StreamError {
        StreamError::backend_open(self.key.as_str(), err)
    }

    fn open_native(&self, mode: StreamMode, seekable: bool) -> Result<Box<dyn Transport>> {
        if !mode.allows_write() {
            return self
                .backend
                .open_download(&self.key, seekable)
                .map_err(|e| self.open_err(e));
        }

        let existing = if mode.allows_append() || !mode.allows_existing_file_opening() {
            self.backend.head(&self.key).map_err(|e| self.open_err(e))?
        } else {
            None
        };
        if existing.is_some() && !mode.allows_existing_file_opening() {
            return Err(self.open_err(BackendError::AlreadyExists(self.key.clone())));
        }

        let content_type = existing.as_ref().and_then(|info| info.content_type.as_deref());
        let mut upload = self
            .backend
            .open_upload(&self.key, content_type)
            .map_err(|e| self.open_err(e))?;

        if let Some(info) = existing.as_ref().filter(|_| mode.allows_append()) {
            trace!("Replaying {} existing bytes of {}", info.size, self.key);
            if let Err(e) = self.replay_existing(upload.as_mut()) {
                upload.abort();
                return Err(e);
            }
        }
        Ok(upload)
    }

    /// Copy the stored object into a fresh upload so appends keep it
    fn replay_existing(&self, upload: &mut dyn Transport) -> Result<()> {
        let mut download = self
            .backend
            .open_download(&self.key, false)
            .map_err(|e| self.open_err(e))?;
        let copied = copy_transport(download.as_mut(), upload);
        let _ = download.close();
        copied.map_err(|e| self.open_err(e.into()))?;
        Ok(())
    }

    /// Sniff the buffered payload, then upload it under the detected type
    fn upload_buffer(&self, buffer: &mut LocalBuffer) -> Result<()> {
        io::Seek::seek(buffer, SeekFrom::Start(0))?;
        let content_type =
            sniff_reader(self.sniffer.as_ref(), buffer, self.config.sniff.prefix_len)?;
        io::Seek::seek(buffer, SeekFrom::Start(0))?;
        debug!("Uploading {} as {}", self.key, content_type);

        let mut upload = self
            .backend
            .open_upload(&self.key, Some(&content_type))
            .map_err(|e| self.open_err(e))?;
        if let Err(e) = copy_transport(buffer, upload.as_mut()) {
            upload.abort();
            return Err(StreamError::backend(self.key.as_str(), e));
        }
        finish(upload.as_mut()).map_err(|e| StreamError::backend(self.key.as_str(), e))
    }

    /// Let go of the live handle without uploading anything
    fn release_uncommitted(&mut self) {
        self.mode = None;
        self.seekable = false;
        match self.handle.take() {
            Some(Handle::Native(mut upload)) => upload.abort(),
            Some(Handle::Buffer(mut buffer)) => {
                let _ = buffer.truncate();
                let _ = Transport::close(&mut buffer);
            }
            None => {}
        }
        trace!("Released {} without committing", self.key);
    }

    /// Swap the sequential download for a seekable one at the same offset
    fn upgrade_to_seekable(&mut self) -> Result<()> {
        let Some(mode) = self.mode else {
            return Ok(());
        };
        let position = match self.handle.take() {
            Some(Handle::Native(mut old)) => {
                let position = old.position();
                if let Err(e) = old.close() {
                    warn!("Failed to close sequential download of {}: {}", self.key, e);
                }
                position
            }
            other => {
                self.handle = other;
                return Ok(());
            }
        };

        debug!("Reopening {} seekable at offset {}", self.key, position);
        let mut fresh = match self.open_native(mode, true) {
            Ok(fresh) => fresh,
            Err(e) => {
                self.mode = None;
                return Err(e);
            }
        };
        if let Err(e) = fresh.seek(SeekFrom::Start(position)) {
            let _ = fresh.close();
            self.mode = None;
            return Err(StreamError::backend(self.key.as_str(), e));
        }

        self.handle = Some(Handle::Native(fresh));
        self.seekable = true;
        Ok(())
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

impl Stream for ObjectStream {
    fn open(&mut self, mode: StreamMode) -> Result<bool> {
        if self.handle.is_some() {
            self.close()?;
        }

        if mode.is_read_write() {
            return Err(StreamError::ModeConflict {
                key: self.key.clone(),
                reason: format!(
                    "mode \"{}\" needs simultaneous read and write, which object transports do not offer",
                    mode
                ),
            });
        }

        let handle = if mode.implies_existing_content_deletion()
            && self.config.sniff.detect_content_type
        {
            Handle::Buffer(LocalBuffer::new(self.config.buffer.spill_threshold))
        } else {
            Handle::Native(self.open_native(mode, false)?)
        };
        debug!("Opened {} ({}) on {} handle", self.key, mode, handle.label());

        self.mode = Some(mode);
        self.handle = Some(handle);
        self.seekable = false;
        Ok(true)
    }

    fn read(&mut self, count: usize) -> Result<Option<Vec<u8>>> {
        let (Some(mode), Some(handle)) = (self.mode, self.handle.as_mut()) else {
            return Ok(None);
        };
        if !mode.allows_read() {
            return Err(StreamError::access_denied(self.key.as_str(), "read"));
        }

        match read_up_to(handle.transport(), count) {
            Ok(data) => Ok(Some(data)),
            Err(e) => Err(handle.error(&self.key, e)),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<Option<usize>> {
        let (Some(mode), Some(handle)) = (self.mode, self.handle.as_mut()) else {
            return Ok(None);
        };
        if !mode.allows_write() {
            return Err(StreamError::access_denied(self.key.as_str(), "write"));
        }

        match write_all(handle.transport(), data) {
            Ok(()) => Ok(Some(data.len())),
            Err(e) => Err(handle.error(&self.key, e)),
        }
    }

    fn close(&mut self) -> Result<bool> {
        let Some(handle) = self.handle.take() else {
            return Ok(false);
        };
        self.mode = None;
        self.seekable = false;

        match handle {
            Handle::Buffer(mut buffer) => {
                let uploaded = self.upload_buffer(&mut buffer);
                let _ = Transport::close(&mut buffer);
                uploaded?;
            }
            Handle::Native(mut transport) => {
                finish(transport.as_mut())
                    .map_err(|e| StreamError::backend(self.key.as_str(), e))?;
            }
        }
        trace!("Closed {}", self.key);
        Ok(true)
    }

    fn flush(&mut self) -> Result<bool> {
        let Some(handle) = self.handle.as_mut() else {
            return Ok(false);
        };
        match handle.transport().flush() {
            Ok(()) => Ok(true),
            Err(e) => Err(handle.error(&self.key, e)),
        }
    }

    fn seek(&mut self, offset: i64, whence: i32) -> Result<bool> {
        let (Some(mode), Some(handle)) = (self.mode, self.handle.as_mut()) else {
            return Ok(false);
        };
        let Ok(whence) = Whence::try_from(whence) else {
            return Ok(false);
        };
        let Some(pos) = whence.to_seek_from(offset) else {
            return Ok(false);
        };

        if let Handle::Native(transport) = handle {
            if mode.allows_write() {
                // Uploads cannot be repositioned; only a no-op succeeds
                let current = transport.position();
                return Ok(resolve_seek(pos, current, transport.len()) == Some(current));
            }
            if !self.seekable {
                self.upgrade_to_seekable()?;
            }
        }

        let Some(handle) = self.handle.as_mut() else {
            return Ok(false);
        };
        let transport = handle.transport();
        let Some(target) = resolve_seek(pos, transport.position(), transport.len()) else {
            return Ok(false);
        };
        match transport.seek(SeekFrom::Start(target)) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(false),
            Err(e) => Err(handle.error(&self.key, e)),
        }
    }

    fn tell(&mut self) -> Result<Option<u64>> {
        Ok(self
            .handle
            .as_ref()
            .map(|handle| handle.transport_ref().position()))
    }

    fn eof(&mut self) -> bool {
        self.handle
            .as_ref()
            .map_or(true, |handle| handle.transport_ref().is_eof())
    }

    fn stat(&mut self) -> Result<Option<StreamStat>> {
        if let Some(handle) = self.handle.as_ref() {
            let transport = handle.transport_ref();
            return Ok(Some(StreamStat {
                size: transport.len(),
                position: transport.position(),
                content_type: transport.content_type().map(str::to_string),
                last_modified: transport.last_modified(),
                ..Default::default()
            }));
        }

        let prefix = format!("{}/", self.key.trim_end_matches('/'));
        let children = self
            .backend
            .list(&prefix)
            .map_err(|e| StreamError::backend(self.key.as_str(), e))?;
        if children.is_empty() {
            return Ok(None);
        }
        Ok(Some(StreamStat {
            is_dir: true,
            ..Default::default()
        }))
    }

    fn cast(&mut self, _kind: CastKind) -> Option<&mut dyn Transport> {
        self.handle.as_mut().map(Handle::transport)
    }

    fn unlink(&mut self) -> Result<bool> {
        let truncating = self
            .mode
            .map_or(false, |mode| mode.implies_existing_content_deletion());
        if !truncating {
            return Ok(false);
        }

        match self.backend.delete(&self.key) {
            Ok(()) | Err(BackendError::NotFound(_)) => {}
            Err(e) => return Err(StreamError::backend(self.key.as_str(), e)),
        }
        self.release_uncommitted();
        Ok(true)
    }
}

impl Drop for ObjectStream {
    fn drop(&mut self) {
        if self.handle.is_some() {
            if let Err(e) = self.close() {
                warn!("Failed to close {} on drop: {}", self.key, e);
            }
        }
    }
}
