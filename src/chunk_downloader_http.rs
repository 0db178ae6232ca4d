use crate::chunk_store::{ChunkDownloader, StoreConfig};
use crate::error::{FailureKind, RetrievalFailure};
use crate::resource_manager::ResourceManager;
use crate::retrieval::ByteRangeRequest;

use bytes::Bytes;
use reqwest::StatusCode;
use url::Url;

/// HTTP chunk downloader.
///
/// Implements [ChunkDownloader] for HTTP and HTTPS using ranged GET requests.
#[derive(Debug)]
pub struct ChunkDownloaderHTTP {
    reqwest_client: reqwest::Client,
    /// Query parameter appended to every request URL
    tracking_parameter: Option<(String, String)>,
}

impl ChunkDownloaderHTTP {
    /// Create a new HTTP chunk downloader.
    pub fn new(config: &StoreConfig) -> Result<Self, RetrievalFailure> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.http_timeout {
            builder = builder.timeout(timeout);
        }
        let reqwest_client = builder.build()?;
        Ok(Self {
            reqwest_client,
            tracking_parameter: config.tracking_parameter.clone(),
        })
    }

    /// Returns the URL to request, with the tracking parameter if configured.
    fn request_url(&self, url: &Url) -> Url {
        let mut url = url.clone();
        if let Some((name, value)) = &self.tracking_parameter {
            url.query_pairs_mut().append_pair(name, value);
        }
        url
    }
}

impl ChunkDownloader for ChunkDownloaderHTTP {
    /// Download requested chunk.
    ///
    /// Returns bytes.
    ///
    /// # Arguments
    ///
    /// * `url`: Location of the object
    /// * `request`: Requested byte range
    /// * `resource_manager`: ResourceManager object
    #[tracing::instrument(level = "DEBUG", skip(self, request, resource_manager), fields(offset = request.offset, length = request.length))]
    async fn download(
        &self,
        url: &Url,
        request: &ByteRangeRequest,
        resource_manager: &ResourceManager,
    ) -> Result<Bytes, RetrievalFailure> {
        // Acquire connection permit to be freed via drop when this function returns
        let _conn_permits = resource_manager.connection_http().await?;
        let mut builder = self
            .reqwest_client
            .get(self.request_url(url))
            .header(reqwest::header::RANGE, request.range_header());
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        // Send the request
        let response = builder.send().await?;
        let status = response.status();
        if !(status == StatusCode::OK || status == StatusCode::PARTIAL_CONTENT) {
            return Err(failure_for_status(status));
        }
        let body = response.bytes().await?;
        if status == StatusCode::OK {
            tracing::debug!("Server ignored range request for {}", url);
        }
        let body = select_range(status, body, request)?;

        // The data returned by the client does not have any alignment guarantees. Copy it into
        // an 8-byte aligned Vec<u8> so that decoded chunks can be reinterpreted as numbers.
        let mut buf = maligned::align_first::<u8, maligned::A8>(body.len());
        buf.extend_from_slice(&body);
        // Return as Bytes.
        Ok(buf.into())
    }
}

/// Returns the requested range of a successful response body.
///
/// A 206 response holds just the range. A 200 response means the server ignored the Range
/// header and returned the whole object, so the range is sliced out of it.
fn select_range(
    status: StatusCode,
    body: Bytes,
    request: &ByteRangeRequest,
) -> Result<Bytes, RetrievalFailure> {
    if status != StatusCode::OK {
        return Ok(body);
    }
    let end = request.offset.saturating_add(request.length);
    if end > body.len() as u64 {
        return Err(RetrievalFailure::new(
            FailureKind::LengthMismatch,
            format!(
                "object of {} bytes does not contain range {}",
                body.len(),
                request.range_header()
            ),
        ));
    }
    Ok(body.slice(request.offset as usize..end as usize))
}

/// Classify an unsuccessful HTTP status.
pub fn failure_for_status(status: StatusCode) -> RetrievalFailure {
    let kind = match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => FailureKind::NotFound,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FailureKind::PermissionDenied,
        StatusCode::RANGE_NOT_SATISFIABLE => FailureKind::InvalidRange,
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => FailureKind::Transient,
        status if status.is_server_error() => FailureKind::Transient,
        _ => FailureKind::Other,
    };
    RetrievalFailure::new(kind, format!("HTTP request failed with status: {}", status))
}

impl From<reqwest::Error> for RetrievalFailure {
    /// Convert a reqwest error into a retrieval failure.
    fn from(error: reqwest::Error) -> Self {
        let kind = if error.is_timeout() {
            FailureKind::Timeout
        } else if error.is_connect() || error.is_request() || error.is_body() {
            FailureKind::Transient
        } else if let Some(status) = error.status() {
            failure_for_status(status).kind
        } else {
            FailureKind::Other
        };
        RetrievalFailure::new(kind, "HTTP request failed").with_source(error)
    }
}
