//! This crate reconstructs hyperslabs of chunked, compressed scientific arrays held in remote
//! storage. Only the chunks that overlap a requested selection are fetched, using byte-range
//! requests against local files, HTTP servers or S3-compatible object stores. Each chunk is
//! decoded through its filter pipeline and its overlapping region is copied into the caller's
//! buffer in host byte order.
//!
//! The reconstruction core is made up of:
//!
//! * [layout]: immutable description of an array's chunk grid, element type, byte order, fill
//!   value, filter pipeline and chunk index.
//! * [intersect]: closed-form computation of the chunks overlapping a [models::Hyperslab].
//! * [scheduler]: bounded-concurrency retrieval with retry and backoff of transient failures.
//! * [filter_pipeline]: decoding of deflate, gzip, shuffle and fletcher32 filtered chunks.
//! * [assemble]: strided copy of decoded chunks and fill values into the output buffer.
//! * [engine]: the entry point tying these together.
//!
//! The core never logs; it returns a typed [error::ReconstructionError].
//!
//! Around the core are a [manifest] reader, a [metadata_cache] of layouts, and a
//! [chunk_store::ChunkStore] retrieval backend built on a number of open source components.
//!
//! * [Tokio](tokio), the most popular asynchronous Rust runtime.
//! * [reqwest] for HTTP range requests.
//! * [AWS SDK for S3](aws-sdk-s3) is used to interact with S3-compatible object stores.
//! * [Serde](serde) and [validator] perform deserialisation and validation of JSON manifests.
//! * [ndarray] provides [NumPy](https://numpy.org)-like n-dimensional array views of the results.

pub mod array;
pub mod assemble;
pub mod chunk_downloader_file;
pub mod chunk_downloader_http;
pub mod chunk_downloader_s3;
pub mod chunk_store;
pub mod cli;
pub mod compression;
pub mod engine;
pub mod error;
pub mod filter_pipeline;
pub mod filters;
pub mod intersect;
pub mod layout;
pub mod manifest;
pub mod metadata_cache;
pub mod metrics;
pub mod models;
pub mod resource_manager;
pub mod retrieval;
pub mod s3_client;
pub mod scheduler;
#[cfg(test)]
pub mod test_utils;
pub mod tracing;
pub mod types;
