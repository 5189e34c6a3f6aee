//! CloudWriter - sequential upload transport for cloud objects

use crate::BackendError;
use bytes::{BufMut, Bytes, BytesMut};
use keystream_core::{Transport, TransportConfig};
use object_store::path::Path;
use object_store::{
    Attribute, Attributes, MultipartUpload, ObjectStore, PutMultipartOpts, PutOptions, PutPayload,
};
use std::io;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tracing::{debug, trace, warn};

/// An upload channel for one object
///
/// Bytes accumulate locally and are sent as a single PUT on close, switching
/// to a multipart upload once the configured threshold is crossed. The
/// content type is fixed when the writer is created. Nothing becomes visible
/// in the store before [`close`](Transport::close).
pub struct CloudWriter {
    store: Arc<dyn ObjectStore>,
    runtime: Arc<Runtime>,
    path: Path,
    /// Buffer for accumulating data before upload
    buffer: BytesMut,
    config: TransportConfig,
    attributes: Attributes,
    content_type: Option<String>,
    /// Total bytes written
    total_written: u64,
    /// Multipart upload handle (for large objects)
    multipart: Option<Box<dyn MultipartUpload>>,
    part_number: usize,
    closed: bool,
}

impl std::fmt::Debug for CloudWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudWriter")
            .field("path", &self.path)
            .field("content_type", &self.content_type)
            .field("total_written", &self.total_written)
            .field("multipart", &self.multipart.is_some())
            .field("closed", &self.closed)
            .finish()
    }
}

impl CloudWriter {
    pub(crate) fn new(
        store: Arc<dyn ObjectStore>,
        runtime: Arc<Runtime>,
        path: Path,
        content_type: Option<&str>,
        config: TransportConfig,
    ) -> Self {
        let mut attributes = Attributes::new();
        if let Some(content_type) = content_type {
            attributes.insert(Attribute::ContentType, content_type.to_string().into());
        }

        CloudWriter {
            store,
            runtime,
            path,
            buffer: BytesMut::with_capacity(config.write_buffer_size.min(1024 * 1024)),
            config,
            attributes,
            content_type: content_type.map(str::to_string),
            total_written: 0,
            multipart: None,
            part_number: 0,
            closed: false,
        }
    }

    fn check_open(&self) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                format!("upload of {} is already closed", self.path),
            ));
        }
        Ok(())
    }

    fn store_err(&self, err: object_store::Error) -> io::Error {
        BackendError::from_store(self.path.as_ref(), err).into()
    }

    /// Send every full part that has accumulated
    ///
    /// Only parts of exactly [`TransportConfig::part_size`] bytes leave
    /// before close; the shorter tail is the final part.
    fn flush_parts(&mut self) -> io::Result<()> {
        if self.multipart.is_none() {
            if !self.config.use_multipart_upload
                || self.total_written <= self.config.multipart_threshold as u64
            {
                // Still small enough for a single PUT on close
                return Ok(());
            }
            debug!("Starting multipart upload for {}", self.path);
            self.start_multipart()?;
        }

        let part_size = self.config.part_size();
        while self.buffer.len() >= part_size {
            let data = self.buffer.split_to(part_size).freeze();
            self.upload_part(data)?;
        }
        Ok(())
    }

    fn start_multipart(&mut self) -> io::Result<()> {
        let opts = PutMultipartOpts {
            attributes: self.attributes.clone(),
            ..Default::default()
        };
        let upload = self
            .runtime
            .block_on(self.store.put_multipart_opts(&self.path, opts))
            .map_err(|e| self.store_err(e))?;

        self.multipart = Some(upload);
        self.part_number = 0;
        Ok(())
    }

    fn upload_part(&mut self, data: Bytes) -> io::Result<()> {
        if let Some(upload) = self.multipart.as_mut() {
            trace!("Uploading part {} ({} bytes)", self.part_number, data.len());
            let part = upload.put_part(PutPayload::from(data));
            self.runtime
                .block_on(part)
                .map_err(|e| BackendError::from_store(self.path.as_ref(), e))?;
            self.part_number += 1;
        }
        Ok(())
    }

    /// Complete the upload
    fn finish_upload(&mut self) -> io::Result<()> {
        if let Some(mut upload) = self.multipart.take() {
            let data = self.buffer.split().freeze();
            if !data.is_empty() {
                let part = upload.put_part(PutPayload::from(data));
                self.runtime
                    .block_on(part)
                    .map_err(|e| self.store_err(e))?;
            }
            debug!("Completing multipart upload for {}", self.path);
            self.runtime
                .block_on(upload.complete())
                .map_err(|e| self.store_err(e))?;
        } else {
            let data = self.buffer.split().freeze();
            debug!("Uploading {} bytes to {}", data.len(), self.path);
            let opts = PutOptions {
                attributes: self.attributes.clone(),
                ..Default::default()
            };
            self.runtime
                .block_on(self.store.put_opts(&self.path, PutPayload::from(data), opts))
                .map_err(|e| self.store_err(e))?;
        }
        Ok(())
    }
}

impl Transport for CloudWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.check_open()?;
        if buf.is_empty() {
            return Ok(0);
        }

        self.buffer.put_slice(buf);
        self.total_written += buf.len() as u64;
        self.flush_parts()?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.check_open()?;
        self.flush_parts()
    }

    fn position(&self) -> u64 {
        self.total_written
    }

    fn len(&self) -> u64 {
        self.total_written
    }

    fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    fn close(&mut self) -> io::Result<()> {
        self.check_open()?;
        self.closed = true;
        self.finish_upload()
    }

    fn abort(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.buffer.clear();
        if let Some(mut upload) = self.multipart.take() {
            if let Err(e) = self.runtime.block_on(upload.abort()) {
                warn!("Failed to abort multipart upload for {}: {}", self.path, e);
            }
        }
        debug!("Aborted upload of {}", self.path);
    }
}

impl Drop for CloudWriter {
    fn drop(&mut self) {
        // Best effort to complete the upload
        if !self.closed {
            self.closed = true;
            if let Err(e) = self.finish_upload() {
                warn!("Failed to finalize upload of {} on drop: {}", self.path, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures_util::stream::BoxStream;
    use object_store::memory::InMemory;
    use object_store::{GetOptions, GetResult, ListResult, ObjectMeta, PutResult, UploadPart};
    use std::sync::Mutex;

    /// Store that records the size of every multipart part it receives
    #[derive(Debug, Default)]
    struct PartRecorder {
        inner: InMemory,
        parts: Arc<Mutex<Vec<usize>>>,
    }

    impl std::fmt::Display for PartRecorder {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "PartRecorder({})", self.inner)
        }
    }

    #[derive(Debug)]
    struct RecordingUpload {
        inner: Box<dyn MultipartUpload>,
        parts: Arc<Mutex<Vec<usize>>>,
    }

    #[async_trait]
    impl MultipartUpload for RecordingUpload {
        fn put_part(&mut self, data: PutPayload) -> UploadPart {
            self.parts.lock().unwrap().push(data.content_length());
            self.inner.put_part(data)
        }

        async fn complete(&mut self) -> object_store::Result<PutResult> {
            self.inner.complete().await
        }

        async fn abort(&mut self) -> object_store::Result<()> {
            self.inner.abort().await
        }
    }

    #[async_trait]
    impl ObjectStore for PartRecorder {
        async fn put_opts(
            &self,
            location: &Path,
            payload: PutPayload,
            opts: PutOptions,
        ) -> object_store::Result<PutResult> {
            self.inner.put_opts(location, payload, opts).await
        }

        async fn put_multipart_opts(
            &self,
            location: &Path,
            opts: PutMultipartOpts,
        ) -> object_store::Result<Box<dyn MultipartUpload>> {
            let inner = self.inner.put_multipart_opts(location, opts).await?;
            Ok(Box::new(RecordingUpload {
                inner,
                parts: self.parts.clone(),
            }))
        }

        async fn get_opts(
            &self,
            location: &Path,
            options: GetOptions,
        ) -> object_store::Result<GetResult> {
            self.inner.get_opts(location, options).await
        }

        async fn delete(&self, location: &Path) -> object_store::Result<()> {
            self.inner.delete(location).await
        }

        fn list(&self, prefix: Option<&Path>) -> BoxStream<'_, object_store::Result<ObjectMeta>> {
            self.inner.list(prefix)
        }

        async fn list_with_delimiter(
            &self,
            prefix: Option<&Path>,
        ) -> object_store::Result<ListResult> {
            self.inner.list_with_delimiter(prefix).await
        }

        async fn copy(&self, from: &Path, to: &Path) -> object_store::Result<()> {
            self.inner.copy(from, to).await
        }

        async fn copy_if_not_exists(&self, from: &Path, to: &Path) -> object_store::Result<()> {
            self.inner.copy_if_not_exists(from, to).await
        }
    }

    fn runtime() -> Arc<Runtime> {
        Arc::new(
            tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap(),
        )
    }

    fn stored(store: &PartRecorder, runtime: &Runtime, path: &Path) -> Vec<u8> {
        let result = runtime.block_on(store.inner.get(path)).unwrap();
        runtime.block_on(result.bytes()).unwrap().to_vec()
    }

    #[test]
    fn test_multipart_parts_never_undersized() {
        let store = Arc::new(PartRecorder::default());
        let runtime = runtime();
        let config = TransportConfig {
            write_buffer_size: 64,
            multipart_threshold: 64,
            min_part_size: 100,
            ..Default::default()
        };
        let path = Path::from("parts");
        let mut writer =
            CloudWriter::new(store.clone(), runtime.clone(), path.clone(), None, config);

        let mut payload = vec![7u8];
        payload.extend((0..450u32).map(|i| (i % 251) as u8));
        writer.write(&payload[..1]).unwrap();
        writer.write(&payload[1..]).unwrap();
        writer.flush().unwrap();
        writer.flush().unwrap();
        assert_eq!(*store.parts.lock().unwrap(), vec![100, 100, 100, 100]);

        writer.close().unwrap();
        assert_eq!(*store.parts.lock().unwrap(), vec![100, 100, 100, 100, 51]);
        assert_eq!(stored(&store, &runtime, &path), payload);
    }

    #[test]
    fn test_small_upload_is_single_put() {
        let store = Arc::new(PartRecorder::default());
        let runtime = runtime();
        let path = Path::from("small");
        let mut writer = CloudWriter::new(
            store.clone(),
            runtime.clone(),
            path.clone(),
            Some("text/plain"),
            TransportConfig::default(),
        );

        writer.write(b"tiny").unwrap();
        writer.flush().unwrap();
        writer.close().unwrap();
        assert!(store.parts.lock().unwrap().is_empty());
        assert_eq!(stored(&store, &runtime, &path), b"tiny");
    }
}
