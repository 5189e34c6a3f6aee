use crate::object::{ObjectBackend, ObjectInfo};
use crate::runtime::RuntimeSlot;
use crate::{BackendError, CloudReader, CloudWriter, Result};
use futures_util::TryStreamExt;
use keystream_core::{Transport, TransportConfig};
use object_store::path::Path;
use object_store::prefix::PrefixStore;
use object_store::{Attribute, DynObjectStore, GetOptions, ObjectStore};
use std::sync::Arc;
use tokio::runtime::Runtime;
use tracing::debug;
use url::Url;

/// Provider named by the scheme of a cloud URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudScheme {
    /// `s3://`
    S3,
    /// `gs://`
    Gcs,
    /// `az://` or `azblob://`
    Azure,
}

impl CloudScheme {
    fn from_url_scheme(scheme: &str) -> Option<Self> {
        match scheme {
            "s3" => Some(CloudScheme::S3),
            "gs" => Some(CloudScheme::Gcs),
            "az" | "azblob" => Some(CloudScheme::Azure),
            _ => None,
        }
    }
}

/// Bucket and key prefix named by a URL like `s3://bucket/prefix`
#[derive(Debug, Clone)]
pub struct CloudPath {
    pub scheme: CloudScheme,
    pub bucket: String,
    /// Keys are resolved below this prefix; empty for the bucket root
    pub prefix: Path,
}

impl CloudPath {
    pub fn parse(url: &str) -> Result<Self> {
        let url = Url::parse(url)?;
        let scheme = CloudScheme::from_url_scheme(url.scheme()).ok_or_else(|| {
            BackendError::InvalidPath(format!("{} is not an s3://, gs:// or az:// URL", url))
        })?;
        let bucket = match url.host_str() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => return Err(BackendError::InvalidPath(format!("{} names no bucket", url))),
        };

        Ok(CloudPath {
            scheme,
            bucket,
            prefix: Path::from(url.path().trim_start_matches('/')),
        })
    }
}

/// Object backend over any [`ObjectStore`]
///
/// Each client owns its blocking runtime, created by
/// [`register`](ObjectBackend::register). Clones share store and runtime.
#[derive(Debug, Clone)]
pub struct CloudBackend {
    store: Arc<DynObjectStore>,
    runtime: Arc<RuntimeSlot>,
    config: TransportConfig,
}

impl CloudBackend {
    pub fn new(store: Arc<DynObjectStore>) -> Self {
        Self::with_config(store, TransportConfig::default())
    }

    pub fn with_config(store: Arc<DynObjectStore>, config: TransportConfig) -> Self {
        CloudBackend {
            store,
            runtime: Arc::new(RuntimeSlot::default()),
            config,
        }
    }

    /// Build a client for the bucket named by a cloud URL
    ///
    /// Credentials and region come from the environment, as the
    /// `object_store` builders read them.
    pub fn from_url(url: &str, config: TransportConfig) -> Result<Self> {
        let CloudPath {
            scheme,
            bucket,
            prefix,
        } = CloudPath::parse(url)?;
        let store = create_object_store(scheme, &bucket)?;
        debug!("Created {:?} client for bucket {} under {:?}", scheme, bucket, prefix.as_ref());

        let store: Arc<DynObjectStore> = if prefix.as_ref().is_empty() {
            store
        } else {
            Arc::new(PrefixStore::new(store, prefix))
        };
        Ok(Self::with_config(store, config))
    }

    /// Get the object store instance
    pub fn store(&self) -> &Arc<DynObjectStore> {
        &self.store
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn is_registered(&self) -> bool {
        self.runtime.is_registered()
    }

    fn runtime(&self) -> Result<Arc<Runtime>> {
        self.runtime.get()
    }

    fn head_path(&self, runtime: &Runtime, path: &Path) -> Result<Option<ObjectInfo>> {
        let options = GetOptions {
            head: true,
            ..Default::default()
        };
        let result = match runtime.block_on(self.store.get_opts(path, options)) {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(BackendError::from_store(path.as_ref(), e)),
        };

        Ok(Some(ObjectInfo {
            key: result.meta.location.to_string(),
            size: result.meta.size as u64,
            last_modified: result.meta.last_modified,
            content_type: result
                .attributes
                .get(&Attribute::ContentType)
                .map(|value| value.to_string()),
        }))
    }
}

impl ObjectBackend for CloudBackend {
    fn register(&self) -> Result<()> {
        self.runtime.register().map(|_| ())
    }

    fn open_upload(&self, key: &str, content_type: Option<&str>) -> Result<Box<dyn Transport>> {
        let runtime = self.runtime()?;
        debug!("Opening upload for {} (content type {:?})", key, content_type);
        Ok(Box::new(CloudWriter::new(
            self.store.clone(),
            runtime,
            Path::from(key),
            content_type,
            self.config.clone(),
        )))
    }

    fn open_download(&self, key: &str, seekable: bool) -> Result<Box<dyn Transport>> {
        let runtime = self.runtime()?;
        let path = Path::from(key);
        let info = self
            .head_path(&runtime, &path)?
            .ok_or_else(|| BackendError::NotFound(key.to_string()))?;

        debug!(
            "Opening {} download for {} ({} bytes)",
            if seekable { "seekable" } else { "sequential" },
            key,
            info.size
        );
        Ok(Box::new(CloudReader::new(
            self.store.clone(),
            runtime,
            path,
            info,
            seekable,
            &self.config,
        )))
    }

    fn exists(&self, key: &str) -> Result<bool> {
        let runtime = self.runtime()?;
        match runtime.block_on(self.store.head(&Path::from(key))) {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(BackendError::from_store(key, e)),
        }
    }

    fn delete(&self, key: &str) -> Result<()> {
        let runtime = self.runtime()?;
        debug!("Deleting {}", key);
        runtime
            .block_on(self.store.delete(&Path::from(key)))
            .map_err(|e| BackendError::from_store(key, e))
    }

    fn head(&self, key: &str) -> Result<Option<ObjectInfo>> {
        let runtime = self.runtime()?;
        self.head_path(&runtime, &Path::from(key))
    }

    fn bucket_exists(&self) -> Result<bool> {
        let runtime = self.runtime()?;
        match runtime.block_on(self.store.list_with_delimiter(None)) {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let runtime = self.runtime()?;
        let prefix = Path::from(prefix);
        let objects = runtime
            .block_on(self.store.list(Some(&prefix)).try_collect::<Vec<_>>())
            .map_err(|e| BackendError::from_store(prefix.as_ref(), e))?;

        Ok(objects
            .into_iter()
            .map(|meta| meta.location.to_string())
            .collect())
    }
}

#[allow(unused_variables, unreachable_patterns)]
fn create_object_store(scheme: CloudScheme, bucket: &str) -> Result<Arc<DynObjectStore>> {
    match scheme {
        #[cfg(feature = "aws")]
        CloudScheme::S3 => {
            let store = object_store::aws::AmazonS3Builder::from_env()
                .with_bucket_name(bucket)
                .build()?;
            Ok(Arc::new(store))
        }
        #[cfg(feature = "gcp")]
        CloudScheme::Gcs => {
            let store = object_store::gcp::GoogleCloudStorageBuilder::from_env()
                .with_bucket_name(bucket)
                .build()?;
            Ok(Arc::new(store))
        }
        #[cfg(feature = "azure")]
        CloudScheme::Azure => {
            let store = object_store::azure::MicrosoftAzureBuilder::from_env()
                .with_container_name(bucket)
                .build()?;
            Ok(Arc::new(store))
        }
        _ => Err(BackendError::InvalidPath(format!(
            "{:?} support is not enabled in this build",
            scheme
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;

    fn backend() -> CloudBackend {
        let backend = CloudBackend::new(Arc::new(InMemory::new()));
        backend.register().unwrap();
        backend
    }

    fn put(backend: &CloudBackend, key: &str, data: &[u8], content_type: Option<&str>) {
        let mut upload = backend.open_upload(key, content_type).unwrap();
        keystream_core::write_all(upload.as_mut(), data).unwrap();
        upload.close().unwrap();
    }

    #[test]
    fn test_cloud_path_parsing() {
        let path = CloudPath::parse("s3://my-bucket/path/to/prefix").unwrap();
        assert_eq!(path.scheme, CloudScheme::S3);
        assert_eq!(path.bucket, "my-bucket");
        assert_eq!(path.prefix.as_ref(), "path/to/prefix");

        let path = CloudPath::parse("gs://gcs-bucket/").unwrap();
        assert_eq!(path.scheme, CloudScheme::Gcs);
        assert_eq!(path.bucket, "gcs-bucket");
        assert!(path.prefix.as_ref().is_empty());

        let path = CloudPath::parse("azblob://container/blob").unwrap();
        assert_eq!(path.scheme, CloudScheme::Azure);
        assert_eq!(path.bucket, "container");
    }

    #[test]
    fn test_from_url_rejects_bad_urls() {
        for url in ["http://not-cloud/file", "not a url", "s3://", "ftp://bucket/key"] {
            assert!(
                matches!(
                    CloudBackend::from_url(url, TransportConfig::default()),
                    Err(BackendError::InvalidPath(_))
                ),
                "{} was accepted",
                url
            );
        }
    }

    #[cfg(not(feature = "gcp"))]
    #[test]
    fn test_from_url_reports_disabled_provider() {
        let err = CloudBackend::from_url("gs://bucket/prefix", TransportConfig::default())
            .unwrap_err();
        assert!(err.to_string().contains("not enabled"), "{}", err);
    }

    #[test]
    fn test_invalid_paths() {
        assert!(CloudPath::parse("http://not-cloud/file").is_err());
        assert!(CloudPath::parse("/local/path/file").is_err());
        assert!(CloudPath::parse("s3://").is_err());
    }

    #[test]
    fn test_unregistered_backend_refuses_transports() {
        let backend = CloudBackend::new(Arc::new(InMemory::new()));
        assert!(!backend.is_registered());
        assert!(matches!(
            backend.open_upload("key", None),
            Err(BackendError::Runtime(_))
        ));

        backend.register().unwrap();
        backend.register().unwrap();
        assert!(backend.is_registered());
    }

    #[test]
    fn test_head_reports_declared_content_type() {
        let backend = backend();
        put(&backend, "logo.png", b"\x89PNG\r\n\x1a\n", Some("image/png"));
        put(&backend, "plain", b"abc", None);

        let info = backend.head("logo.png").unwrap().unwrap();
        assert_eq!(info.size, 8);
        assert_eq!(info.content_type.as_deref(), Some("image/png"));
        assert_eq!(backend.head("plain").unwrap().unwrap().content_type, None);
        assert_eq!(backend.head("missing").unwrap(), None);
    }

    #[test]
    fn test_exists_delete_and_list() {
        let backend = backend();
        assert!(backend.bucket_exists().unwrap());
        put(&backend, "dir/a", b"1", None);
        put(&backend, "dir/b", b"2", None);
        put(&backend, "other", b"3", None);

        assert!(backend.exists("dir/a").unwrap());
        let mut keys = backend.list("dir/").unwrap();
        keys.sort();
        assert_eq!(keys, vec!["dir/a".to_string(), "dir/b".to_string()]);

        backend.delete("dir/a").unwrap();
        assert!(!backend.exists("dir/a").unwrap());
        assert!(matches!(
            backend.open_download("dir/a", false),
            Err(BackendError::NotFound(_))
        ));
    }

    #[test]
    fn test_sequential_and_seekable_downloads() {
        use std::io::SeekFrom;

        let backend = backend();
        put(&backend, "data", b"0123456789", None);

        let mut sequential = backend.open_download("data", false).unwrap();
        assert!(!sequential.is_seekable());
        assert!(sequential.seek(SeekFrom::Start(2)).is_err());

        let mut seekable = backend.open_download("data", true).unwrap();
        assert_eq!(seekable.seek(SeekFrom::End(-3)).unwrap(), 7);
        let mut buf = [0u8; 8];
        let n = seekable.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"789");
        assert!(seekable.is_eof());
        assert!(seekable.seek(SeekFrom::Start(11)).is_err());
    }

    #[test]
    fn test_upload_is_invisible_until_close() {
        let backend = backend();
        let mut upload = backend.open_upload("pending", None).unwrap();
        keystream_core::write_all(upload.as_mut(), b"data").unwrap();
        upload.flush().unwrap();
        assert!(!backend.exists("pending").unwrap());

        upload.close().unwrap();
        assert!(backend.exists("pending").unwrap());
        assert!(upload.close().is_err());
    }

    #[test]
    fn test_aborted_upload_is_discarded() {
        let backend = backend();
        let mut upload = backend.open_upload("aborted", None).unwrap();
        keystream_core::write_all(upload.as_mut(), b"data").unwrap();
        upload.abort();
        drop(upload);
        assert!(!backend.exists("aborted").unwrap());
    }

    #[test]
    fn test_multipart_upload_above_threshold() {
        let config = TransportConfig {
            write_buffer_size: 8,
            multipart_threshold: 8,
            min_part_size: 8,
            ..Default::default()
        };
        let backend = CloudBackend::with_config(Arc::new(InMemory::new()), config);
        backend.register().unwrap();

        let payload: Vec<u8> = (0..40u8).collect();
        put(&backend, "big", &payload, Some("application/octet-stream"));

        let mut download = backend.open_download("big", false).unwrap();
        let mut out = Vec::new();
        let mut buf = [0u8; 7];
        loop {
            let n = download.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(out, payload);
    }
}
