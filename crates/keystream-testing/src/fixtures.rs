//! Common test fixtures for keystream testing

use anyhow::Result;
use keystream_cloud::{CloudBackend, MemoryBucket, ObjectBackend};
use keystream_core::{write_all, StreamConfig, TransportConfig};
use object_store::memory::InMemory;
use std::sync::Arc;

/// Twelve bytes used by the seek scenarios
pub const TEST_CONTENT: &[u8] = b"test content";

/// Signature plus IHDR chunk of a 1x1 RGBA PNG
pub const PNG_HEADER: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, // signature
    0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52, // IHDR length and type
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, // width, height
    0x08, 0x06, 0x00, 0x00, 0x00, 0x1F, 0x15, 0xC4, 0x89, // depth..crc
];

/// A small PDF document body
pub const PDF_DOCUMENT: &[u8] = b"%PDF-1.4\n1 0 obj\n<< /Type /Catalog >>\nendobj\n%%EOF\n";

/// Registered object backend over a fresh in-memory store
pub fn memory_backend() -> Result<Arc<CloudBackend>> {
    memory_backend_with_config(TransportConfig::default())
}

/// Like [`memory_backend`] with custom transport tuning
pub fn memory_backend_with_config(config: TransportConfig) -> Result<Arc<CloudBackend>> {
    let backend = CloudBackend::with_config(Arc::new(InMemory::new()), config);
    backend.register()?;
    Ok(Arc::new(backend))
}

/// In-memory object backend holding the given objects
pub fn seeded_backend(objects: &[(&str, &[u8])]) -> Result<Arc<CloudBackend>> {
    let backend = memory_backend()?;
    for (key, data) in objects {
        put_object(backend.as_ref(), key, data, None)?;
    }
    Ok(backend)
}

/// Store `data` under `key` through a native upload
pub fn put_object(
    backend: &dyn ObjectBackend,
    key: &str,
    data: &[u8],
    content_type: Option<&str>,
) -> Result<()> {
    let mut upload = backend.open_upload(key, content_type)?;
    write_all(upload.as_mut(), data)?;
    upload.close()?;
    Ok(())
}

/// Memory bucket holding the given files
pub fn seeded_bucket(files: &[(&str, &[u8])]) -> Arc<MemoryBucket> {
    let bucket = MemoryBucket::new();
    for (name, data) in files {
        bucket.insert(*name, data.to_vec());
    }
    Arc::new(bucket)
}

/// Stream configuration with content-type detection switched on
pub fn sniffing_config() -> StreamConfig {
    StreamConfig::default().with_content_type_detection()
}
