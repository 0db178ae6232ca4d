//! Resource management

use crate::error::{FailureKind, RetrievalFailure};

use thiserror::Error;
use tokio::sync::{AcquireError, Semaphore, SemaphorePermit};

/// Error acquiring a resource.
#[derive(Debug, Error)]
pub enum ResourceError {
    /// A request for more memory than the total pool
    #[error("requested {requested} bytes of memory, exceeding the total of {total} bytes")]
    InsufficientMemory { requested: usize, total: usize },

    /// The semaphore was closed
    #[error("failed to acquire resource")]
    Acquire(#[from] AcquireError),

    /// The number of permits does not fit a semaphore
    #[error("resource request is too large")]
    TooLarge(#[from] std::num::TryFromIntError),
}

impl From<ResourceError> for RetrievalFailure {
    fn from(error: ResourceError) -> Self {
        RetrievalFailure::new(FailureKind::Other, error.to_string()).with_source(error)
    }
}

/// [crate::resource_manager::ResourceManager] provides a simple way to allocate various resources
/// to tasks. Resource management is performed using a Tokio Semaphore for each type of resource.
///
/// Limits are process wide and shared by every reconstruction call using the same manager.
#[derive(Debug, Default)]
pub struct ResourceManager {
    /// Optional semaphore for HTTP connections.
    http_connections: Option<Semaphore>,

    /// Optional semaphore for S3 connections.
    s3_connections: Option<Semaphore>,

    /// Optional semaphore for memory (bytes).
    memory: Option<Semaphore>,

    /// Optional total memory pool in bytes.
    total_memory: Option<usize>,
}

impl ResourceManager {
    /// Returns a new ResourceManager object.
    pub fn new(connection_limit: Option<usize>, memory_limit: Option<usize>) -> Self {
        Self {
            http_connections: connection_limit.map(Semaphore::new),
            s3_connections: connection_limit.map(Semaphore::new),
            memory: memory_limit.map(Semaphore::new),
            total_memory: memory_limit,
        }
    }

    /// Acquire an HTTP connection resource.
    pub async fn connection_http(&self) -> Result<Option<SemaphorePermit>, ResourceError> {
        optional_acquire(&self.http_connections, 1).await
    }

    /// Acquire an S3 connection resource.
    pub async fn connection_s3(&self) -> Result<Option<SemaphorePermit>, ResourceError> {
        optional_acquire(&self.s3_connections, 1).await
    }

    /// Acquire memory resource.
    pub async fn memory(&self, bytes: usize) -> Result<Option<SemaphorePermit>, ResourceError> {
        if let Some(total_memory) = self.total_memory {
            if bytes > total_memory {
                return Err(ResourceError::InsufficientMemory {
                    requested: bytes,
                    total: total_memory,
                });
            };
        };
        optional_acquire(&self.memory, bytes).await
    }
}

/// Acquire permits on an optional Semaphore, if present.
async fn optional_acquire(
    sem: &Option<Semaphore>,
    n: usize,
) -> Result<Option<SemaphorePermit>, ResourceError> {
    let n = n.try_into()?;
    if let Some(sem) = sem {
        sem.acquire_many(n)
            .await
            .map(Some)
            .map_err(|err| err.into())
    } else {
        Ok(None)
    }
}
