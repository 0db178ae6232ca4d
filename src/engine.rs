//! Hyperslab reconstruction engine
//!
//! [Engine::read] reconstructs a hyperslab of a chunked array into a caller supplied buffer:
//!
//! 1. The hyperslab is validated and intersected with the chunk grid.
//! 2. Chunks absent from the chunk index are written with the fill value, without retrieval.
//! 3. Stored chunks are retrieved through the [RetrievalBackend] by spawned tasks, one per
//!    request, with bounded concurrency.
//! 4. Each retrieved chunk is decoded by the filter pipeline on a blocking thread or the rayon
//!    thread pool.
//! 5. The selected elements of each decoded chunk are copied to the output as tasks complete.
//!
//! Reconstruction is all or nothing: if any step fails the output buffer is zeroed.

use std::sync::Arc;
use std::time::Duration;

use crate::assemble::Assembler;
use crate::error::ReconstructionError;
use crate::filter_pipeline::filter_pipeline;
use crate::intersect::intersect;
use crate::layout::Layout;
use crate::models::{Filter, Hyperslab};
use crate::retrieval::RetrievalBackend;
use crate::scheduler::{self, FetchedChunk, RetryPolicy, Scheduler};

use bytes::Bytes;
use tokio::task::JoinSet;
use tokio::time::Instant;

/// Engine configuration
#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    /// Maximum number of retrieval requests in flight per call
    pub max_concurrency: usize,
    /// Retry policy for transient retrieval failures
    pub retry: RetryPolicy,
    /// Maximum size in bytes of a coalesced request. 0 disables coalescing.
    pub coalesce_limit: u64,
    /// Decode chunks on the rayon thread pool rather than tokio's blocking threads
    pub use_rayon: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: num_cpus::get() * 2,
            retry: RetryPolicy::default(),
            coalesce_limit: 0,
            use_rayon: false,
        }
    }
}

/// Options for a single reconstruction call
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReadOptions {
    /// Time allowed for the whole call, bounding every request and retry backoff
    pub timeout: Option<Duration>,
}

/// Hyperslab reconstruction engine.
#[derive(Clone)]
pub struct Engine {
    backend: Arc<dyn RetrievalBackend>,
    config: EngineConfig,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Returns a new engine retrieving chunks from `backend`.
    pub fn new(backend: Arc<dyn RetrievalBackend>, config: EngineConfig) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Size in bytes of the output buffer for a hyperslab of an array.
    ///
    /// # Errors
    ///
    /// [ReconstructionError::OutOfRange] if the hyperslab does not lie within the array.
    pub fn output_size(
        layout: &Layout,
        hyperslab: &Hyperslab,
    ) -> Result<usize, ReconstructionError> {
        hyperslab.validate(layout.shape())?;
        hyperslab
            .num_elements()
            .and_then(|count| count.checked_mul(layout.element_size()))
            .ok_or_else(|| ReconstructionError::OutOfRange {
                dimension: None,
                reason: "hyperslab size overflows".to_string(),
            })
    }

    /// Reconstruct a hyperslab into `out`.
    ///
    /// `out` must be exactly [Engine::output_size] bytes long. On success it holds the selected
    /// elements in row-major order and host byte order. On failure it is zeroed.
    ///
    /// # Arguments
    ///
    /// * `layout`: Layout of the array
    /// * `hyperslab`: Selection to reconstruct
    /// * `out`: Output buffer
    /// * `options`: Options for this call
    pub async fn read(
        &self,
        layout: &Layout,
        hyperslab: &Hyperslab,
        out: &mut [u8],
        options: &ReadOptions,
    ) -> Result<(), ReconstructionError> {
        let result = self.reconstruct(layout, hyperslab, out, options).await;
        if result.is_err() {
            out.fill(0);
        }
        result
    }

    /// Reconstruct a hyperslab into a new 8-byte aligned buffer.
    pub async fn read_to_vec(
        &self,
        layout: &Layout,
        hyperslab: &Hyperslab,
        options: &ReadOptions,
    ) -> Result<Vec<u8>, ReconstructionError> {
        let size = Self::output_size(layout, hyperslab)?;
        let mut out = maligned::align_first::<u8, maligned::A8>(size);
        out.resize(size, 0);
        self.read(layout, hyperslab, &mut out, options).await?;
        Ok(out)
    }

    async fn reconstruct(
        &self,
        layout: &Layout,
        hyperslab: &Hyperslab,
        out: &mut [u8],
        options: &ReadOptions,
    ) -> Result<(), ReconstructionError> {
        let size = Self::output_size(layout, hyperslab)?;
        if out.len() != size {
            return Err(ReconstructionError::OutOfRange {
                dimension: None,
                reason: format!(
                    "output buffer holds {} bytes, hyperslab needs {}",
                    out.len(),
                    size
                ),
            });
        }
        let intersections = intersect(layout, hyperslab)?;

        let assembler = Assembler::new(layout, hyperslab);
        for intersection in intersections.iter().filter(|i| i.is_fill()) {
            assembler.write_fill(intersection, out);
        }

        let deadline = options.timeout.map(|timeout| Instant::now() + timeout);
        let scheduler = Scheduler::new(
            self.backend.clone(),
            self.config.retry,
            self.config.max_concurrency,
            deadline,
        );
        let decoder = ChunkDecoder {
            filters: layout.filters().into(),
            element_size: layout.element_size(),
            expected_size: layout.chunk_byte_size(),
            use_rayon: self.config.use_rayon,
        };
        // Each task retrieves and decodes one request. Dropping the set on error aborts the
        // remaining tasks.
        let mut tasks = JoinSet::new();
        for mut task in scheduler::plan(&intersections, self.config.coalesce_limit) {
            let scheduler = scheduler.clone();
            let decoder = decoder.clone();
            tasks.spawn(async move {
                let chunks = scheduler.retrieve(&mut task).await?;
                decoder.decode(chunks).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let decoded = joined.unwrap_or_else(|err| std::panic::resume_unwind(err.into_panic()));
            for (index, data) in decoded? {
                assembler.write_chunk(&intersections[index], &data, out);
            }
        }
        Ok(())
    }
}

/// Decodes retrieved chunks through a layout's filter pipeline.
#[derive(Clone, Debug)]
struct ChunkDecoder {
    filters: Arc<[Filter]>,
    element_size: usize,
    expected_size: usize,
    use_rayon: bool,
}

impl ChunkDecoder {
    /// Decode retrieved chunks off the async runtime.
    async fn decode(
        self,
        chunks: Vec<FetchedChunk>,
    ) -> Result<Vec<(usize, Bytes)>, ReconstructionError> {
        let use_rayon = self.use_rayon;
        let decode = move || -> Result<Vec<(usize, Bytes)>, ReconstructionError> {
            chunks
                .into_iter()
                .map(|chunk| {
                    filter_pipeline(
                        &self.filters,
                        self.element_size,
                        self.expected_size,
                        chunk.data,
                    )
                    .map(|data| (chunk.index, data))
                    .map_err(|error| ReconstructionError::Decompression {
                        coord: chunk.coord,
                        error,
                    })
                })
                .collect()
        };
        if use_rayon {
            tokio_rayon::spawn(decode).await
        } else {
            tokio::task::spawn_blocking(decode)
                .await
                .unwrap_or_else(|err| std::panic::resume_unwind(err.into_panic()))
        }
    }
}
