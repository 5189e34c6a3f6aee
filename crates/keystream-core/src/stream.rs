//! The stream capability contract shared by every adapter

use crate::{Result, StreamError, StreamMode};
use chrono::{DateTime, Utc};
use std::io::{self, SeekFrom};

/// Seek relative to the start of the stream
pub const SEEK_SET: i32 = 0;
/// Seek relative to the current position
pub const SEEK_CUR: i32 = 1;
/// Seek relative to the end of the stream
pub const SEEK_END: i32 = 2;

/// Reference point for [`Stream::seek`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Set,
    Current,
    End,
}

impl Whence {
    /// Combine with an offset into a `SeekFrom`, or `None` when the target
    /// would lie before the start of the stream
    pub fn to_seek_from(self, offset: i64) -> Option<SeekFrom> {
        match self {
            Whence::Set => u64::try_from(offset).ok().map(SeekFrom::Start),
            Whence::Current => Some(SeekFrom::Current(offset)),
            Whence::End => Some(SeekFrom::End(offset)),
        }
    }
}

impl TryFrom<i32> for Whence {
    type Error = StreamError;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            SEEK_SET => Ok(Whence::Set),
            SEEK_CUR => Ok(Whence::Current),
            SEEK_END => Ok(Whence::End),
            other => Err(StreamError::InvalidMode(format!("whence {}", other))),
        }
    }
}

/// Resolve a seek target against a position and a length
///
/// Returns `None` for targets before offset zero.
pub fn resolve_seek(pos: SeekFrom, current: u64, len: u64) -> Option<u64> {
    let target = match pos {
        SeekFrom::Start(offset) => return Some(offset),
        SeekFrom::Current(offset) => current as i128 + offset as i128,
        SeekFrom::End(offset) => len as i128 + offset as i128,
    };
    u64::try_from(target).ok()
}

/// What a caller wants the underlying handle for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastKind {
    /// Readiness polling
    Select,
    /// Direct standard I/O on the handle
    Stdio,
}

/// Metadata reported by [`Stream::stat`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamStat {
    /// Number of bytes currently known to the handle
    pub size: u64,
    /// Cursor position
    pub position: u64,
    /// Declared or detected media type, when known
    pub content_type: Option<String>,
    /// Backend modification time, when known
    pub last_modified: Option<DateTime<Utc>>,
    /// The key names a directory-like prefix rather than an object
    pub is_dir: bool,
}

/// A native byte channel opened for one key
///
/// Backend transports usually support a single direction and no seeking;
/// unsupported calls fail with [`io::ErrorKind::Unsupported`].
pub trait Transport: Send {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let _ = buf;
        Err(unsupported("read"))
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = buf;
        Err(unsupported("write"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let _ = pos;
        Err(unsupported("seek"))
    }

    /// Current cursor position
    fn position(&self) -> u64;

    /// Total number of bytes known to the transport
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_eof(&self) -> bool {
        self.position() >= self.len()
    }

    /// Media type declared for the object, if any
    fn content_type(&self) -> Option<&str> {
        None
    }

    fn is_seekable(&self) -> bool {
        false
    }

    /// Modification time of the stored object, for downloads
    fn last_modified(&self) -> Option<DateTime<Utc>> {
        None
    }

    /// Finalize the transport; uploads become visible here
    fn close(&mut self) -> io::Result<()>;

    /// Release the transport without committing pending data
    fn abort(&mut self) {
        let _ = self.close();
    }
}

pub(crate) fn unsupported(operation: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        format!("transport does not support {}", operation),
    )
}

/// Read everything left in `from` and write it to `to`, returning the
/// number of bytes copied
pub fn copy_transport(from: &mut dyn Transport, to: &mut dyn Transport) -> io::Result<u64> {
    copy_transport_limit(from, to, u64::MAX)
}

/// Like [`copy_transport`], stopping after `limit` bytes
pub fn copy_transport_limit(
    from: &mut dyn Transport,
    to: &mut dyn Transport,
    limit: u64,
) -> io::Result<u64> {
    let mut buf = vec![0u8; 64 * 1024];
    let mut copied = 0u64;
    while copied < limit {
        let want = buf.len().min((limit - copied).min(usize::MAX as u64) as usize);
        let n = from.read(&mut buf[..want])?;
        if n == 0 {
            break;
        }
        write_all(to, &buf[..n])?;
        copied += n as u64;
    }
    Ok(copied)
}

/// Read until `count` bytes are collected or the transport is exhausted
pub fn read_up_to(from: &mut dyn Transport, count: usize) -> io::Result<Vec<u8>> {
    let mut data = vec![0u8; count.min(64 * 1024)];
    let mut filled = 0;
    while filled < count {
        if filled == data.len() {
            data.resize((data.len() * 2).min(count), 0);
        }
        let n = from.read(&mut data[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    data.truncate(filled);
    Ok(data)
}

/// Write the whole slice, retrying short writes
pub fn write_all(to: &mut dyn Transport, mut data: &[u8]) -> io::Result<()> {
    while !data.is_empty() {
        let n = to.write(data)?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "transport accepted no bytes",
            ));
        }
        data = &data[n..];
    }
    Ok(())
}

/// POSIX-like stream semantics over one key
///
/// `Ok(false)` / `Ok(None)` mean "not applicable": the handle is not open,
/// was already closed, or the request cannot be honoured on this handle.
/// Errors are reserved for contract violations and backend failures.
pub trait Stream {
    fn open(&mut self, mode: StreamMode) -> Result<bool>;

    fn read(&mut self, count: usize) -> Result<Option<Vec<u8>>>;

    fn write(&mut self, data: &[u8]) -> Result<Option<usize>>;

    fn close(&mut self) -> Result<bool>;

    fn flush(&mut self) -> Result<bool>;

    /// Move the cursor; `whence` is one of [`SEEK_SET`], [`SEEK_CUR`],
    /// [`SEEK_END`]. Anything else returns `Ok(false)` and leaves the
    /// cursor where it was.
    fn seek(&mut self, offset: i64, whence: i32) -> Result<bool>;

    fn tell(&mut self) -> Result<Option<u64>>;

    fn eof(&mut self) -> bool;

    fn stat(&mut self) -> Result<Option<StreamStat>>;

    fn cast(&mut self, kind: CastKind) -> Option<&mut dyn Transport>;

    fn unlink(&mut self) -> Result<bool>;
}
