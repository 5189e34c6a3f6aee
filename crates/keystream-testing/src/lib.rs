//! Testing utilities and fixtures for keystream
//!
//! This crate provides backends pre-seeded with known content, payloads with
//! recognizable magic bytes, and helpers that drive a [`Stream`] through a
//! whole open/write/close or open/read/close cycle.
//!
//! [`Stream`]: keystream_core::Stream

pub mod assertions;
pub mod fixtures;
pub mod helpers;

use tracing_subscriber::EnvFilter;

/// Install a test-friendly `tracing` subscriber honouring `RUST_LOG`
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
