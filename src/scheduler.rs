//! Retrieval scheduling
//!
//! Chunks with stored data are grouped into [RetrievalTask]s, one byte range request each.
//! Adjacent byte ranges of the same location may be coalesced into a single request up to a
//! size limit. Each task is retried on transient failures with exponential backoff, and the
//! number of tasks in flight at once is bounded by a semaphore.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{FailureKind, ReconstructionError, RetrievalFailure};
use crate::intersect::ChunkIntersection;
use crate::models::ChunkCoord;
use crate::resource_manager::ResourceError;
use crate::retrieval::{ByteRangeRequest, RetrievalBackend};

use bytes::Bytes;
use tokio::sync::Semaphore;
use tokio::time::Instant;

/// Retry policy for transient retrieval failures
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub initial_backoff: Duration,
    /// Factor applied to the delay after each further failed attempt
    pub multiplier: u32,
    /// Upper bound on any single delay
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(250),
            multiplier: 2,
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Delay before the attempt following failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        self.initial_backoff
            .saturating_mul(self.multiplier.saturating_pow(exponent))
            .min(self.max_backoff)
    }
}

/// State of a [RetrievalTask]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TaskState {
    Pending,
    InFlight,
    Retrying,
    Succeeded,
    Failed,
}

/// A chunk served by part of a [RetrievalTask]'s byte range
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TaskPart {
    /// Index of the chunk's intersection
    pub index: usize,
    /// Position of the chunk in the chunk grid
    pub coord: ChunkCoord,
    /// Offset of the chunk's bytes within the task's byte range
    pub offset: u64,
    /// Number of bytes stored for the chunk
    pub length: u64,
}

/// One byte range request serving one or more chunks
#[derive(Clone, Debug)]
pub struct RetrievalTask {
    /// Byte range to request
    pub request: ByteRangeRequest,
    /// Chunks served by the byte range, in offset order
    pub parts: Vec<TaskPart>,
    state: TaskState,
    attempts: u32,
}

impl RetrievalTask {
    fn new(part: TaskPart, location: &str, offset: u64) -> Self {
        Self {
            request: ByteRangeRequest::new(location, offset, part.length),
            parts: vec![part],
            state: TaskState::Pending,
            attempts: 0,
        }
    }

    /// Current state of the task.
    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Number of attempts made so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Grid coordinates of every chunk served by the task.
    pub fn coords(&self) -> Vec<ChunkCoord> {
        self.parts.iter().map(|part| part.coord.clone()).collect()
    }

    /// Try to extend the task's byte range with the chunk at `offset`, if it directly follows the
    /// current range and the result does not exceed `limit` bytes.
    fn try_extend(&mut self, part: &TaskPart, location: &str, offset: u64, limit: u64) -> bool {
        let end = self.request.offset + self.request.length;
        let merged = self.request.length + part.length;
        if self.request.location != location || end != offset || merged > limit {
            return false;
        }
        self.parts.push(TaskPart {
            offset: self.request.length,
            ..part.clone()
        });
        self.request.length = merged;
        true
    }

    /// Split retrieved bytes into per-chunk buffers.
    fn split(&self, data: Bytes) -> Vec<FetchedChunk> {
        self.parts
            .iter()
            .map(|part| FetchedChunk {
                index: part.index,
                coord: part.coord.clone(),
                data: data.slice(part.offset as usize..(part.offset + part.length) as usize),
            })
            .collect()
    }

    fn failed(&mut self, cause: RetrievalFailure) -> ReconstructionError {
        self.state = TaskState::Failed;
        ReconstructionError::Retrieval {
            coords: self.coords(),
            cause,
        }
    }
}

/// Raw stored bytes of one chunk
#[derive(Clone, Debug, PartialEq)]
pub struct FetchedChunk {
    /// Index of the chunk's intersection
    pub index: usize,
    /// Position of the chunk in the chunk grid
    pub coord: ChunkCoord,
    /// Stored (still encoded) bytes
    pub data: Bytes,
}

/// Plan the retrieval tasks for a set of chunk intersections.
///
/// Fill-only intersections are skipped. With a non-zero `coalesce_limit`, chunks of the same
/// location whose byte ranges are directly adjacent share a task whose total length is at most
/// `coalesce_limit` bytes. Part indices refer to positions in `intersections`.
pub fn plan(intersections: &[ChunkIntersection], coalesce_limit: u64) -> Vec<RetrievalTask> {
    let mut stored: Vec<_> = intersections
        .iter()
        .enumerate()
        .filter_map(|(index, intersection)| {
            intersection.location.as_ref().map(|location| {
                let part = TaskPart {
                    index,
                    coord: intersection.coord.clone(),
                    offset: 0,
                    length: location.length,
                };
                (location, part)
            })
        })
        .collect();
    if coalesce_limit == 0 {
        return stored
            .into_iter()
            .map(|(location, part)| RetrievalTask::new(part, &location.location, location.offset))
            .collect();
    }

    stored.sort_by(|(a, _), (b, _)| (&a.location, a.offset).cmp(&(&b.location, b.offset)));
    let mut tasks: Vec<RetrievalTask> = Vec::new();
    for (location, part) in stored {
        let extended = tasks.last_mut().is_some_and(|task| {
            task.try_extend(&part, &location.location, location.offset, coalesce_limit)
        });
        if !extended {
            tasks.push(RetrievalTask::new(part, &location.location, location.offset));
        }
    }
    tasks
}

/// Executes retrieval tasks against a backend.
///
/// Clones share the backend and the concurrency bound, so a clone may be moved into each
/// spawned retrieval task.
#[derive(Clone)]
pub struct Scheduler {
    backend: Arc<dyn RetrievalBackend>,
    policy: RetryPolicy,
    deadline: Option<Instant>,
    permits: Arc<Semaphore>,
}

impl Scheduler {
    /// Returns a new scheduler allowing at most `max_concurrency` tasks in flight.
    ///
    /// # Arguments
    ///
    /// * `backend`: Source of the byte ranges
    /// * `policy`: Retry policy for transient failures
    /// * `max_concurrency`: Maximum number of requests in flight, at least 1
    /// * `deadline`: Optional instant by which all retrieval must complete
    pub fn new(
        backend: Arc<dyn RetrievalBackend>,
        policy: RetryPolicy,
        max_concurrency: usize,
        deadline: Option<Instant>,
    ) -> Self {
        Self {
            backend,
            policy,
            deadline,
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
        }
    }

    /// Retrieve the bytes of a task, retrying transient failures.
    ///
    /// Waits for a concurrency permit first. Returns the stored bytes of each chunk served by the
    /// task.
    ///
    /// # Errors
    ///
    /// [ReconstructionError::Retrieval] naming every chunk of the task if the request fails
    /// with a non-transient failure, exhausts its attempts, returns the wrong number of bytes or
    /// runs past the deadline.
    pub async fn retrieve(
        &self,
        task: &mut RetrievalTask,
    ) -> Result<Vec<FetchedChunk>, ReconstructionError> {
        let _permit = match self.permits.acquire().await {
            Ok(permit) => permit,
            Err(err) => return Err(task.failed(ResourceError::from(err).into())),
        };
        let max_attempts = self.policy.max_attempts.max(1);
        loop {
            let mut request = task.request.clone();
            if let Some(deadline) = self.deadline {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(task.failed(deadline_exceeded(task.attempts)));
                }
                request.timeout = Some(remaining);
            }

            task.state = TaskState::InFlight;
            task.attempts += 1;
            let result = match self.deadline {
                Some(deadline) => {
                    match tokio::time::timeout_at(deadline, self.backend.fetch(&request)).await {
                        Ok(result) => result,
                        Err(_) => Err(deadline_exceeded(task.attempts)),
                    }
                }
                None => self.backend.fetch(&request).await,
            };
            let failure = match result.and_then(|data| verify_length(&request, data)) {
                Ok(data) => {
                    task.state = TaskState::Succeeded;
                    return Ok(task.split(data));
                }
                Err(failure) => failure,
            };
            if !failure.is_transient() || task.attempts >= max_attempts {
                return Err(task.failed(failure));
            }

            let delay = self.policy.backoff(task.attempts);
            if let Some(deadline) = self.deadline {
                if Instant::now() + delay >= deadline {
                    let cause = deadline_exceeded(task.attempts).with_source(failure);
                    return Err(task.failed(cause));
                }
            }
            task.state = TaskState::Retrying;
            tokio::time::sleep(delay).await;
        }
    }
}

/// Check that a response has exactly the requested length.
fn verify_length(request: &ByteRangeRequest, data: Bytes) -> Result<Bytes, RetrievalFailure> {
    if data.len() as u64 != request.length {
        return Err(RetrievalFailure::new(
            FailureKind::LengthMismatch,
            format!(
                "received {} bytes from {}, expected {}",
                data.len(),
                request.location,
                request.length
            ),
        ));
    }
    Ok(data)
}

fn deadline_exceeded(attempts: u32) -> RetrievalFailure {
    RetrievalFailure::new(
        FailureKind::Timeout,
        format!("deadline exceeded after {} attempt(s)", attempts),
    )
}
