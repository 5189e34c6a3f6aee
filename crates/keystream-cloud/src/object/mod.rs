//! Object-store backends and the stream adapter on top of them

mod stream;

pub use stream::ObjectStream;

use crate::Result;
use chrono::{DateTime, Utc};
use keystream_core::Transport;

/// Metadata of a stored object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    /// Content type declared when the object was uploaded
    pub content_type: Option<String>,
}

/// A client for a store of keyed objects with one-way transports
///
/// Upload transports commit on close; download transports only seek when
/// asked for at open time.
pub trait ObjectBackend: Send + Sync {
    /// Prepare the client for blocking use; calling it again is a no-op
    fn register(&self) -> Result<()>;

    /// Open an upload for `key`, declaring `content_type` when given
    fn open_upload(&self, key: &str, content_type: Option<&str>) -> Result<Box<dyn Transport>>;

    /// Open a download for `key`; fails with `NotFound` for missing keys
    fn open_download(&self, key: &str, seekable: bool) -> Result<Box<dyn Transport>>;

    fn exists(&self, key: &str) -> Result<bool>;

    fn delete(&self, key: &str) -> Result<()>;

    /// Metadata for `key`, `None` when it does not exist
    fn head(&self, key: &str) -> Result<Option<ObjectInfo>>;

    /// Whether the configured bucket is reachable
    fn bucket_exists(&self) -> Result<bool>;

    /// Keys stored under `prefix`
    fn list(&self, prefix: &str) -> Result<Vec<String>>;
}
