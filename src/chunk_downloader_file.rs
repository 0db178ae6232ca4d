use std::io::SeekFrom;
use std::path::Path;

use crate::chunk_store::ChunkDownloader;
use crate::error::{FailureKind, RetrievalFailure};
use crate::resource_manager::ResourceManager;
use crate::retrieval::ByteRangeRequest;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use url::Url;

/// Local file chunk downloader.
///
/// Implements [ChunkDownloader] for `file://` URLs and bare paths.
#[derive(Debug, Default)]
pub struct ChunkDownloaderFile;

impl ChunkDownloaderFile {
    /// Create a new file chunk downloader.
    pub fn new() -> Self {
        Self
    }

    /// Read a byte range of a file at a local path.
    #[tracing::instrument(level = "DEBUG", skip(request), fields(offset = request.offset, length = request.length))]
    pub async fn read_range(
        &self,
        path: &Path,
        request: &ByteRangeRequest,
    ) -> Result<Bytes, RetrievalFailure> {
        let length: usize = request.length.try_into().map_err(|_| {
            RetrievalFailure::new(
                FailureKind::Other,
                format!("length {} too large", request.length),
            )
        })?;
        let mut file = tokio::fs::File::open(path).await?;
        file.seek(SeekFrom::Start(request.offset)).await?;
        // Read into an 8-byte aligned Vec<u8> so that decoded chunks can be reinterpreted as
        // numbers.
        let mut buf = maligned::align_first::<u8, maligned::A8>(length);
        buf.resize(length, 0);
        file.read_exact(&mut buf).await.map_err(|err| {
            if err.kind() == std::io::ErrorKind::UnexpectedEof {
                RetrievalFailure::new(
                    FailureKind::LengthMismatch,
                    format!("{} ends before byte {}", path.display(), request.last_byte()),
                )
                .with_source(err)
            } else {
                err.into()
            }
        })?;
        Ok(buf.into())
    }

    /// Read a byte range of a local path, bounded by the request timeout.
    pub async fn read(
        &self,
        path: &Path,
        request: &ByteRangeRequest,
    ) -> Result<Bytes, RetrievalFailure> {
        match request.timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.read_range(path, request))
                .await
                .map_err(|_| {
                    RetrievalFailure::new(FailureKind::Timeout, "file read exceeded its deadline")
                })?,
            None => self.read_range(path, request).await,
        }
    }
}

impl ChunkDownloader for ChunkDownloaderFile {
    async fn download(
        &self,
        url: &Url,
        request: &ByteRangeRequest,
        _resource_manager: &ResourceManager,
    ) -> Result<Bytes, RetrievalFailure> {
        let path = url.to_file_path().map_err(|_| {
            RetrievalFailure::new(FailureKind::Other, format!("invalid file URL {}", url))
        })?;
        self.read(&path, request).await
    }
}
