//! # keystream-core
//!
//! The backend-independent half of keystream: open-mode parsing, the
//! [`Stream`] contract every adapter implements, the [`Transport`] trait for
//! native backend channels, and [`BufferStream`], the fully capable local
//! stream adapters fall back to when a backend cannot serve a request.

#![warn(missing_debug_implementations)]

pub mod buffer;
pub mod config;
pub mod error;
pub mod mode;
pub mod sniff;
pub mod stream;

pub use buffer::{BufferStream, LocalBuffer};
pub use config::{BufferConfig, SniffConfig, StreamConfig, TransportConfig};
pub use error::{BoxError, Result, StreamError};
pub use mode::StreamMode;
pub use sniff::{ContentSniffer, MagicSniffer};
pub use stream::{
    copy_transport, copy_transport_limit, read_up_to, write_all, CastKind, Stream, StreamStat,
    Transport, Whence, SEEK_CUR, SEEK_END, SEEK_SET,
};
