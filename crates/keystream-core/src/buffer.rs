//! Fully capable local buffer streams
//!
//! [`LocalBuffer`] keeps bytes in memory until they outgrow the spill
//! threshold, then moves them to an anonymous temporary file. [`BufferStream`]
//! puts the [`Stream`] contract on top of it and is the fallback used by the
//! backend adapters whenever a backend cannot serve a request natively.

use crate::config::BufferConfig;
use crate::stream::{resolve_seek, unsupported, CastKind, Stream, StreamStat, Transport, Whence};
use crate::{Result, StreamError, StreamMode};
use std::io::{self, Read, Seek, SeekFrom, Write};
use tempfile::SpooledTempFile;
use tracing::trace;

/// Read + write + seek byte container on transient local storage
#[derive(Debug)]
pub struct LocalBuffer {
    file: SpooledTempFile,
    len: u64,
    pos: u64,
    closed: bool,
}

impl LocalBuffer {
    /// Create an empty buffer that spills to disk above `spill_threshold` bytes
    pub fn new(spill_threshold: usize) -> Self {
        Self {
            file: SpooledTempFile::new(spill_threshold),
            len: 0,
            pos: 0,
            closed: false,
        }
    }

    /// Create a buffer holding `data`, cursor at the start
    pub fn from_bytes(data: &[u8], spill_threshold: usize) -> io::Result<Self> {
        let mut buffer = Self::new(spill_threshold);
        buffer.write_all(data)?;
        buffer.rewind()?;
        Ok(buffer)
    }

    /// Whether the contents moved to a temporary file
    pub fn is_spilled(&self) -> bool {
        self.file.is_rolled()
    }

    /// Drop all contents and move the cursor to zero
    pub fn truncate(&mut self) -> io::Result<()> {
        self.check_open()?;
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.len = 0;
        self.pos = 0;
        Ok(())
    }

    /// Copy of the whole contents; the cursor is restored afterwards
    pub fn contents(&mut self) -> io::Result<Vec<u8>> {
        self.check_open()?;
        let saved = self.pos;
        self.file.seek(SeekFrom::Start(0))?;
        let mut data = Vec::with_capacity(self.len as usize);
        (&mut self.file).take(self.len).read_to_end(&mut data)?;
        self.file.seek(SeekFrom::Start(saved))?;
        Ok(data)
    }

    fn check_open(&self) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "local buffer is closed",
            ));
        }
        Ok(())
    }
}

impl Read for LocalBuffer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.check_open()?;
        let n = self.file.read(buf)?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl Write for LocalBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.check_open()?;
        let n = self.file.write(buf)?;
        self.pos += n as u64;
        self.len = self.len.max(self.pos);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.check_open()?;
        self.file.flush()
    }
}

impl Seek for LocalBuffer {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.check_open()?;
        let target = resolve_seek(pos, self.pos, self.len).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before start of buffer")
        })?;
        self.pos = self.file.seek(SeekFrom::Start(target))?;
        Ok(self.pos)
    }
}

impl Transport for LocalBuffer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(self, buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Write::write(self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Write::flush(self)
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        Seek::seek(self, pos)
    }

    fn position(&self) -> u64 {
        self.pos
    }

    fn len(&self) -> u64 {
        self.len
    }

    fn is_seekable(&self) -> bool {
        !self.closed
    }

    fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Err(unsupported("close on a closed buffer"));
        }
        self.file.set_len(0)?;
        self.closed = true;
        Ok(())
    }
}

/// [`Stream`] served entirely from a [`LocalBuffer`]
#[derive(Debug)]
pub struct BufferStream {
    key: String,
    mode: Option<StreamMode>,
    buffer: Option<LocalBuffer>,
    spill_threshold: usize,
}

impl BufferStream {
    /// Create an unopened buffer stream labelled with `key`
    pub fn new(key: impl Into<String>) -> Self {
        Self::with_config(key, &BufferConfig::default())
    }

    pub fn with_config(key: impl Into<String>, config: &BufferConfig) -> Self {
        Self {
            key: key.into(),
            mode: None,
            buffer: None,
            spill_threshold: config.spill_threshold,
        }
    }

    /// Wrap an already populated buffer as an open stream
    pub fn with_buffer(key: impl Into<String>, mode: StreamMode, buffer: LocalBuffer) -> Self {
        Self {
            key: key.into(),
            mode: Some(mode),
            buffer: Some(buffer),
            spill_threshold: BufferConfig::default().spill_threshold,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn mode(&self) -> Option<StreamMode> {
        self.mode
    }

    pub fn buffer_mut(&mut self) -> Option<&mut LocalBuffer> {
        self.buffer.as_mut()
    }

    /// Detach the buffer; the stream is left closed
    pub fn take_buffer(&mut self) -> Option<LocalBuffer> {
        self.mode = None;
        self.buffer.take()
    }

    /// Full contents without moving the cursor, `None` when not open
    pub fn contents(&mut self) -> Result<Option<Vec<u8>>> {
        match self.buffer.as_mut() {
            Some(buffer) => Ok(Some(buffer.contents()?)),
            None => Ok(None),
        }
    }

    fn open_mode(&self) -> Result<StreamMode> {
        self.mode
            .ok_or_else(|| StreamError::Io(io::Error::from(io::ErrorKind::NotConnected)))
    }
}

impl Stream for BufferStream {
    fn open(&mut self, mode: StreamMode) -> Result<bool> {
        if let Some(mut previous) = self.buffer.take() {
            previous.close()?;
        }

        let mut buffer = LocalBuffer::new(self.spill_threshold);
        if mode.implies_positioning_cursor_at_the_end() {
            Seek::seek(&mut buffer, SeekFrom::End(0))?;
        }
        trace!("Opened local buffer for {} ({})", self.key, mode);

        self.mode = Some(mode);
        self.buffer = Some(buffer);
        Ok(true)
    }

    fn read(&mut self, count: usize) -> Result<Option<Vec<u8>>> {
        if self.buffer.is_none() {
            return Ok(None);
        }
        if !self.open_mode()?.allows_read() {
            return Err(StreamError::access_denied(&self.key, "read"));
        }
        let Some(buffer) = self.buffer.as_mut() else {
            return Ok(None);
        };

        let mut data = Vec::with_capacity(count.min(64 * 1024));
        buffer.take(count as u64).read_to_end(&mut data)?;
        Ok(Some(data))
    }

    fn write(&mut self, data: &[u8]) -> Result<Option<usize>> {
        if self.buffer.is_none() {
            return Ok(None);
        }
        let mode = self.open_mode()?;
        if !mode.allows_write() {
            return Err(StreamError::access_denied(&self.key, "write"));
        }
        let Some(buffer) = self.buffer.as_mut() else {
            return Ok(None);
        };

        if mode.allows_append() {
            Seek::seek(buffer, SeekFrom::End(0))?;
        }
        buffer.write_all(data)?;
        Ok(Some(data.len()))
    }

    fn close(&mut self) -> Result<bool> {
        let Some(mut buffer) = self.buffer.take() else {
            return Ok(false);
        };
        self.mode = None;
        Transport::close(&mut buffer)?;
        Ok(true)
    }

    fn flush(&mut self) -> Result<bool> {
        match self.buffer.as_mut() {
            Some(buffer) => {
                Write::flush(buffer)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn seek(&mut self, offset: i64, whence: i32) -> Result<bool> {
        let Some(buffer) = self.buffer.as_mut() else {
            return Ok(false);
        };
        let Ok(whence) = Whence::try_from(whence) else {
            return Ok(false);
        };
        let Some(target) = whence
            .to_seek_from(offset)
            .and_then(|pos| resolve_seek(pos, buffer.position(), Transport::len(buffer)))
        else {
            return Ok(false);
        };

        Seek::seek(buffer, SeekFrom::Start(target))?;
        Ok(true)
    }

    fn tell(&mut self) -> Result<Option<u64>> {
        Ok(self.buffer.as_ref().map(|buffer| buffer.position()))
    }

    fn eof(&mut self) -> bool {
        self.buffer.as_ref().map_or(true, |buffer| buffer.is_eof())
    }

    fn stat(&mut self) -> Result<Option<StreamStat>> {
        Ok(self.buffer.as_ref().map(|buffer| StreamStat {
            size: Transport::len(buffer),
            position: buffer.position(),
            ..Default::default()
        }))
    }

    fn cast(&mut self, _kind: CastKind) -> Option<&mut dyn Transport> {
        self.buffer
            .as_mut()
            .map(|buffer| buffer as &mut dyn Transport)
    }

    fn unlink(&mut self) -> Result<bool> {
        let truncating = self
            .mode
            .map_or(false, |mode| mode.implies_existing_content_deletion());
        match self.buffer.as_mut() {
            Some(buffer) if truncating => {
                buffer.truncate()?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
