//! Common assertions for keystream testing

use anyhow::{bail, Context, Result};
use keystream_cloud::{DocumentBucket, ObjectBackend};
use keystream_core::read_up_to;

/// Asserts that the object stored under `key` holds exactly `expected`
pub fn assert_object_eq(backend: &dyn ObjectBackend, key: &str, expected: &[u8]) -> Result<()> {
    let mut download = backend
        .open_download(key, false)
        .with_context(|| format!("Failed to download {}", key))?;
    let actual = read_up_to(download.as_mut(), usize::MAX)?;
    download.close()?;

    if actual != expected {
        bail!(
            "Content mismatch for {}: {:?} vs {:?}",
            key,
            String::from_utf8_lossy(&actual),
            String::from_utf8_lossy(expected)
        );
    }
    Ok(())
}

/// Asserts that `key` is absent from the backend
pub fn assert_object_missing(backend: &dyn ObjectBackend, key: &str) -> Result<()> {
    if backend.exists(key)? {
        bail!("Expected {} to be absent", key);
    }
    Ok(())
}

/// Asserts the content type declared for `key`
pub fn assert_content_type(backend: &dyn ObjectBackend, key: &str, expected: &str) -> Result<()> {
    let info = backend
        .head(key)?
        .with_context(|| format!("{} does not exist", key))?;
    match info.content_type.as_deref() {
        Some(actual) if actual == expected => Ok(()),
        other => bail!("Content type of {} is {:?}, expected {}", key, other, expected),
    }
}

/// Asserts that the bucket file `name` holds exactly `expected`
pub fn assert_document_eq(bucket: &dyn DocumentBucket, name: &str, expected: &[u8]) -> Result<()> {
    let mut download = bucket
        .open_download_stream_by_name(name)
        .with_context(|| format!("Failed to download {}", name))?;
    let actual = read_up_to(download.as_mut(), usize::MAX)?;
    download.close()?;

    if actual != expected {
        bail!(
            "Content mismatch for {}: {:?} vs {:?}",
            name,
            String::from_utf8_lossy(&actual),
            String::from_utf8_lossy(expected)
        );
    }
    Ok(())
}
