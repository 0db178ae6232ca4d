use crate::chunk_store::{ChunkDownloader, StoreConfig};
use crate::error::{FailureKind, RetrievalFailure};
use crate::resource_manager::ResourceManager;
use crate::retrieval::ByteRangeRequest;
use crate::s3_client;

use bytes::Bytes;
use tracing::Instrument;
use url::Url;

/// S3 chunk downloader.
///
/// Implements [ChunkDownloader] for `s3://bucket/key` locations, served by the configured
/// S3-compatible endpoint.
#[derive(Debug)]
pub struct ChunkDownloaderS3 {
    /// Map of S3 client objects.
    s3_client_map: s3_client::S3ClientMap,
    /// Object storage API URL
    endpoint: Option<Url>,
    /// Object storage account credentials
    credentials: s3_client::S3Credentials,
}

impl ChunkDownloaderS3 {
    /// Create a new S3 chunk downloader.
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            s3_client_map: s3_client::S3ClientMap::new(),
            endpoint: config.s3_endpoint.clone(),
            credentials: config.s3_credentials.clone(),
        }
    }
}

impl ChunkDownloader for ChunkDownloaderS3 {
    /// Download requested chunk.
    ///
    /// Returns bytes.
    ///
    /// # Arguments
    ///
    /// * `url`: `s3://bucket/key` location of the object
    /// * `request`: Requested byte range
    /// * `resource_manager`: ResourceManager object
    #[tracing::instrument(level = "DEBUG", skip(self, request, resource_manager), fields(offset = request.offset, length = request.length))]
    async fn download(
        &self,
        url: &Url,
        request: &ByteRangeRequest,
        resource_manager: &ResourceManager,
    ) -> Result<Bytes, RetrievalFailure> {
        let endpoint = self.endpoint.as_ref().ok_or_else(|| {
            RetrievalFailure::new(FailureKind::Other, "no S3 endpoint is configured")
        })?;
        let (bucket, key) = s3_client::parse_location(url)?;
        let s3_client = self
            .s3_client_map
            .get(endpoint, &self.credentials)
            .instrument(tracing::Span::current())
            .await;

        // Acquire connection permit to be freed via drop when this function returns
        let _conn_permits = resource_manager.connection_s3().await?;

        let download = s3_client.download_range(&bucket, &key, request.offset, request.length);
        match request.timeout {
            Some(timeout) => tokio::time::timeout(timeout, download)
                .await
                .map_err(|_| {
                    RetrievalFailure::new(FailureKind::Timeout, "S3 request exceeded its deadline")
                })?,
            None => download.await,
        }
    }
}
