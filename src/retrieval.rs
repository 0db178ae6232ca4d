//! Retrieval backend interface
//!
//! A retrieval backend supplies the raw bytes of a byte range of a storage location. The
//! reconstruction engine treats local files, HTTP servers and object stores uniformly through
//! [RetrievalBackend].

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::RetrievalFailure;

/// Request for the byte range `[offset, offset + length)` of a location
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ByteRangeRequest {
    /// Location identifier (URL or path)
    pub location: String,
    /// Offset in bytes of the first requested byte
    pub offset: u64,
    /// Number of requested bytes
    pub length: u64,
    /// Time remaining before the caller's deadline, if any
    pub timeout: Option<Duration>,
}

impl ByteRangeRequest {
    /// Return a new ByteRangeRequest object with no timeout.
    pub fn new(location: impl Into<String>, offset: u64, length: u64) -> Self {
        ByteRangeRequest {
            location: location.into(),
            offset,
            length,
            timeout: None,
        }
    }

    /// Inclusive end offset of the range, as used by HTTP `Range` headers.
    ///
    /// Requests always have a non-zero length.
    pub fn last_byte(&self) -> u64 {
        self.offset + self.length.saturating_sub(1)
    }

    /// Value of an HTTP `Range` header for this request.
    pub fn range_header(&self) -> String {
        format!("bytes={}-{}", self.offset, self.last_byte())
    }
}

/// Source of raw chunk bytes.
///
/// Implementations must be safe to call concurrently. They return exactly the requested bytes,
/// or a [RetrievalFailure] classifying why they could not. Returning fewer bytes than requested
/// is detected by the caller and reported as a length mismatch.
#[async_trait]
pub trait RetrievalBackend: Send + Sync {
    /// Fetch a byte range.
    async fn fetch(&self, request: &ByteRangeRequest) -> Result<Bytes, RetrievalFailure>;
}

#[async_trait]
impl<T: RetrievalBackend + ?Sized> RetrievalBackend for std::sync::Arc<T> {
    async fn fetch(&self, request: &ByteRangeRequest) -> Result<Bytes, RetrievalFailure> {
        (**self).fetch(request).await
    }
}
