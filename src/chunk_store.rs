use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::chunk_downloader_file::ChunkDownloaderFile;
use crate::chunk_downloader_http::ChunkDownloaderHTTP;
use crate::chunk_downloader_s3::ChunkDownloaderS3;
use crate::error::{FailureKind, RetrievalFailure};
use crate::metrics::{
    CHUNK_BYTES_RETRIEVED, CHUNK_REQUESTS, CHUNK_REQUEST_FAILURES, CHUNK_REQUEST_TIME,
};
use crate::resource_manager::{ResourceError, ResourceManager};
use crate::retrieval::{ByteRangeRequest, RetrievalBackend};
use crate::s3_client::S3Credentials;

use async_trait::async_trait;
use bytes::Bytes;
use strum_macros::Display;
use url::Url;

/// Chunk downloader trait.
///
/// Defines the interface for downloaders of a single kind of storage location.
pub trait ChunkDownloader {
    /// Download requested byte range.
    ///
    /// Returns bytes.
    ///
    /// # Arguments
    ///
    /// * `url`: Location of the object
    /// * `request`: Requested byte range
    /// * `resource_manager`: ResourceManager object
    fn download(
        &self,
        url: &Url,
        request: &ByteRangeRequest,
        resource_manager: &ResourceManager,
    ) -> impl std::future::Future<Output = Result<Bytes, RetrievalFailure>> + Send;
}

/// Configuration used to construct the retrieval backends.
#[derive(Clone, Debug, Default)]
pub struct StoreConfig {
    /// Object storage API URL used for `s3://` locations
    pub s3_endpoint: Option<Url>,
    /// Object storage account credentials
    pub s3_credentials: S3Credentials,
    /// Timeout applied to every HTTP request
    pub http_timeout: Option<Duration>,
    /// Query parameter `(name, value)` appended to every HTTP request URL
    pub tracking_parameter: Option<(String, String)>,
}

/// Parse a `name=value` query parameter.
pub fn parse_query_parameter(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("expected name=value, got {:?}", s)),
    }
}

/// Kind of storage location, used to dispatch requests and label metrics.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
#[strum(serialize_all = "lowercase")]
enum Backend {
    File,
    Http,
    S3,
    Unsupported,
}

impl Backend {
    /// Classify a location identifier by its URL scheme.
    ///
    /// Locations that are not absolute URLs are treated as local paths.
    fn classify(location: &str) -> Self {
        match Url::parse(location) {
            Ok(url) => match url.scheme() {
                "file" => Backend::File,
                "http" | "https" => Backend::Http,
                "s3" => Backend::S3,
                _ => Backend::Unsupported,
            },
            Err(url::ParseError::RelativeUrlWithoutBase) => Backend::File,
            Err(_) => Backend::Unsupported,
        }
    }
}

/// Chunk store.
///
/// Implements [RetrievalBackend] for local files, HTTP(S) servers and S3-compatible object
/// stores, dispatching each request on the scheme of its location.
#[derive(Debug)]
pub struct ChunkStore {
    /// Downloader for local files.
    downloader_file: ChunkDownloaderFile,
    /// Downloader for HTTP.
    downloader_http: ChunkDownloaderHTTP,
    /// Downloader for S3.
    downloader_s3: ChunkDownloaderS3,
    /// Process wide resource limits.
    resource_manager: Arc<ResourceManager>,
}

impl ChunkStore {
    /// Initialize the chunk store.
    ///
    /// # Arguments
    ///
    /// * `config`: Backend configuration
    /// * `resource_manager`: ResourceManager object shared with other stores
    pub fn new(
        config: &StoreConfig,
        resource_manager: Arc<ResourceManager>,
    ) -> Result<Self, RetrievalFailure> {
        Ok(Self {
            downloader_file: ChunkDownloaderFile::new(),
            downloader_http: ChunkDownloaderHTTP::new(config)?,
            downloader_s3: ChunkDownloaderS3::new(config),
            resource_manager,
        })
    }

    /// Download requested data.
    ///
    /// Returns bytes.
    ///
    /// # Arguments
    ///
    /// * `backend`: Kind of storage location
    /// * `request`: Requested byte range
    #[tracing::instrument(level = "DEBUG", skip(self, request), fields(location = %request.location))]
    async fn download(
        &self,
        backend: Backend,
        request: &ByteRangeRequest,
    ) -> Result<Bytes, RetrievalFailure> {
        let length = usize::try_from(request.length).map_err(ResourceError::from)?;
        // Acquire memory permit to be freed via drop when this function returns
        let _mem_permits = self.resource_manager.memory(length).await?;

        // Dispatch to appropriate downloader based on storage type
        match backend {
            Backend::File => match Url::parse(&request.location) {
                Ok(url) => {
                    self.downloader_file
                        .download(&url, request, &self.resource_manager)
                        .await
                }
                Err(_) => {
                    self.downloader_file
                        .read(Path::new(&request.location), request)
                        .await
                }
            },
            Backend::Http => {
                let url = parse_url(&request.location)?;
                self.downloader_http
                    .download(&url, request, &self.resource_manager)
                    .await
            }
            Backend::S3 => {
                let url = parse_url(&request.location)?;
                self.downloader_s3
                    .download(&url, request, &self.resource_manager)
                    .await
            }
            Backend::Unsupported => Err(RetrievalFailure::new(
                FailureKind::Other,
                format!("unsupported location {}", request.location),
            )),
        }
    }
}

#[async_trait]
impl RetrievalBackend for ChunkStore {
    async fn fetch(&self, request: &ByteRangeRequest) -> Result<Bytes, RetrievalFailure> {
        let backend = Backend::classify(&request.location);
        let label = backend.to_string();
        CHUNK_REQUESTS.with_label_values(&[&label]).inc();
        let timer = CHUNK_REQUEST_TIME
            .with_label_values(&[&label])
            .start_timer();
        let result = self.download(backend, request).await;
        timer.observe_duration();
        match &result {
            Ok(data) => CHUNK_BYTES_RETRIEVED
                .with_label_values(&[&label])
                .inc_by(data.len() as u64),
            Err(failure) => {
                tracing::debug!("Request for {} failed: {}", request.location, failure);
                CHUNK_REQUEST_FAILURES.with_label_values(&[&label]).inc()
            }
        }
        result
    }
}

/// Parse a location identifier as a URL.
fn parse_url(location: &str) -> Result<Url, RetrievalFailure> {
    Url::parse(location).map_err(|err| {
        RetrievalFailure::new(FailureKind::Other, format!("invalid URL {}", location))
            .with_source(err)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;

    fn make_store(resource_manager: ResourceManager) -> ChunkStore {
        ChunkStore::new(&StoreConfig::default(), Arc::new(resource_manager)).unwrap()
    }

    fn temp_file(data: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(data).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_classify() {
        assert_eq!(Backend::File, Backend::classify("/data/file.h5"));
        assert_eq!(Backend::File, Backend::classify("data/file.h5"));
        assert_eq!(Backend::File, Backend::classify("file:///data/file.h5"));
        assert_eq!(Backend::Http, Backend::classify("http://example.com/file.h5"));
        assert_eq!(Backend::Http, Backend::classify("https://example.com/file.h5"));
        assert_eq!(Backend::S3, Backend::classify("s3://bucket/file.h5"));
        assert_eq!(Backend::Unsupported, Backend::classify("ftp://example.com/file.h5"));
    }

    #[test]
    fn test_backend_label() {
        assert_eq!("file", Backend::File.to_string());
        assert_eq!("s3", Backend::S3.to_string());
    }

    #[test]
    fn test_parse_query_parameter() {
        assert_eq!(
            ("tracking".to_string(), "abc=1".to_string()),
            parse_query_parameter("tracking=abc=1").unwrap()
        );
        assert_eq!(
            ("empty".to_string(), "".to_string()),
            parse_query_parameter("empty=").unwrap()
        );
        assert!(parse_query_parameter("novalue").is_err());
        assert!(parse_query_parameter("=value").is_err());
    }

    #[tokio::test]
    async fn fetch_bare_path() {
        let data: Vec<u8> = (0..64).collect();
        let file = temp_file(&data);
        let store = make_store(ResourceManager::default());
        let location = file.path().to_str().unwrap();
        let before = CHUNK_REQUESTS.with_label_values(&["file"]).get();
        let result = store
            .fetch(&ByteRangeRequest::new(location, 8, 16))
            .await
            .unwrap();
        assert_eq!(&data[8..24], result);
        assert!(CHUNK_REQUESTS.with_label_values(&["file"]).get() > before);
    }

    #[tokio::test]
    async fn fetch_file_url() {
        let data: Vec<u8> = (0..64).collect();
        let file = temp_file(&data);
        let store = make_store(ResourceManager::default());
        let url = Url::from_file_path(file.path()).unwrap();
        let result = store
            .fetch(&ByteRangeRequest::new(url.as_str(), 0, 4))
            .await
            .unwrap();
        assert_eq!(&data[0..4], result);
    }

    #[tokio::test]
    async fn fetch_unsupported_scheme() {
        let store = make_store(ResourceManager::default());
        let failure = store
            .fetch(&ByteRangeRequest::new("ftp://example.com/data.h5", 0, 4))
            .await
            .unwrap_err();
        assert_eq!(FailureKind::Other, failure.kind);
        assert!(!failure.is_transient());
        assert_eq!(
            "retrieval failure: unsupported location ftp://example.com/data.h5",
            failure.to_string()
        );
    }

    #[tokio::test]
    async fn fetch_exceeds_memory_limit() {
        let store = make_store(ResourceManager::new(None, Some(8)));
        let failure = store
            .fetch(&ByteRangeRequest::new("/data/file.h5", 0, 16))
            .await
            .unwrap_err();
        assert_eq!(FailureKind::Other, failure.kind);
        assert_eq!(
            "retrieval failure: requested 16 bytes of memory, exceeding the total of 8 bytes",
            failure.to_string()
        );
    }
}
