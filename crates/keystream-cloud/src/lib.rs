//! # keystream-cloud
//!
//! POSIX-like streams over backends that only offer one-way transports.
//!
//! Two adapters implement [`keystream_core::Stream`]:
//! - [`ObjectStream`] over an [`ObjectBackend`] such as [`CloudBackend`]
//!   (anything the `object_store` crate can talk to). It refuses combined
//!   read+write modes, reopens downloads seekable on demand and can detect
//!   the content type of truncating writes before uploading them.
//! - [`DocumentStream`] over a [`DocumentBucket`] such as [`MemoryBucket`] or
//!   [`StoreBucket`]. It emulates combined read+write and seeking with a
//!   local buffer that is re-uploaded on flush and close.
//!
//! ## Example
//!
//! ```no_run
//! use keystream_cloud::{CloudBackend, ObjectStream};
//! use keystream_core::{Stream, StreamConfig, StreamMode};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = CloudBackend::from_url("s3://my-bucket", Default::default())?;
//! let config = StreamConfig::default().with_content_type_detection();
//! let mut stream = ObjectStream::new(Arc::new(backend), "images/logo.png", config)?;
//!
//! stream.open(StreamMode::parse("wb")?)?;
//! stream.write(b"\x89PNG\r\n\x1a\n")?;
//! stream.close()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_debug_implementations)]

pub mod document;
pub mod error;
pub mod object;
pub mod reader;
mod runtime;
pub mod store;
pub mod writer;

pub use document::{DocumentBucket, DocumentStream, MemoryBucket, OperatingState, StoreBucket};
pub use error::{BackendError, Result};
pub use object::{ObjectBackend, ObjectInfo, ObjectStream};
pub use reader::CloudReader;
pub use store::{CloudBackend, CloudPath, CloudScheme};
pub use writer::CloudWriter;
