//! Command Line Interface (CLI) arguments.

use std::path::PathBuf;
use std::time::Duration;

use crate::chunk_store::{parse_query_parameter, StoreConfig};
use crate::engine::{EngineConfig, ReadOptions};
use crate::models::Hyperslab;
use crate::s3_client::S3Credentials;
use crate::scheduler::RetryPolicy;

use byte_unit::Byte;
use clap::Parser;
use expanduser::expanduser;
use url::Url;

/// Parse a path, expanding a leading `~` to the user's home directory.
fn parse_path(s: &str) -> Result<PathBuf, String> {
    expanduser(s).map_err(|err| format!("failed to expand path {}: {}", s, err))
}

/// Parse a human readable size such as `4MiB` into a number of bytes.
fn parse_size(s: &str) -> Result<u64, String> {
    Byte::parse_str(s, /* ignore case */ true)
        .map(|size| size.as_u64())
        .map_err(|err| err.to_string())
}

/// Hyperchunk command line interface
#[derive(Clone, Debug, Parser)]
#[command(version, about)]
pub struct CommandLineArgs {
    /// Path to the JSON manifest describing the chunked array
    #[arg(long, value_parser = parse_path, env = "HYPERCHUNK_MANIFEST")]
    pub manifest: PathBuf,
    /// Hyperslab to read, as comma separated `start:stride:count` per dimension. May be repeated.
    /// The whole array is read if omitted.
    #[arg(long)]
    pub selection: Vec<Hyperslab>,
    /// File to write the raw reconstructed bytes to. Standard output is used if omitted.
    #[arg(long, value_parser = parse_path, env = "HYPERCHUNK_OUTPUT")]
    pub output: Option<PathBuf>,
    /// Print metrics in Prometheus text format to standard error on completion
    #[arg(long, default_value_t = false, env = "HYPERCHUNK_PRINT_METRICS")]
    pub print_metrics: bool,
    /// S3 endpoint URL. Required for s3:// chunk locations.
    #[arg(long, env = "HYPERCHUNK_S3_ENDPOINT")]
    pub s3_endpoint: Option<Url>,
    /// S3 access key
    #[arg(long, env = "HYPERCHUNK_S3_ACCESS_KEY", requires = "s3_secret_key")]
    pub s3_access_key: Option<String>,
    /// S3 secret key
    #[arg(long, env = "HYPERCHUNK_S3_SECRET_KEY", requires = "s3_access_key")]
    pub s3_secret_key: Option<String>,
    /// Timeout in seconds for each HTTP range request
    #[arg(long, env = "HYPERCHUNK_HTTP_TIMEOUT")]
    pub http_timeout: Option<u64>,
    /// Query parameter `name=value` appended to HTTP chunk URLs to mark requests from this tool
    #[arg(long, value_parser = parse_query_parameter, env = "HYPERCHUNK_TRACKING_PARAMETER")]
    pub tracking_parameter: Option<(String, String)>,
    /// Maximum number of simultaneous connections per storage backend
    #[arg(long, env = "HYPERCHUNK_CONNECTION_LIMIT")]
    pub connection_limit: Option<usize>,
    /// Maximum memory held by in-flight chunk downloads, e.g. `512MiB`
    #[arg(long, value_parser = parse_size, env = "HYPERCHUNK_MEMORY_LIMIT")]
    pub memory_limit: Option<u64>,
    /// Maximum number of retrieval requests in flight per selection.
    /// Defaults to twice the number of CPUs.
    #[arg(long, env = "HYPERCHUNK_MAX_CONCURRENCY")]
    pub max_concurrency: Option<usize>,
    /// Maximum attempts for each retrieval request
    #[arg(long, default_value_t = 10, env = "HYPERCHUNK_RETRY_ATTEMPTS")]
    pub retry_attempts: u32,
    /// Backoff in milliseconds before the first retry. Doubles on each further retry.
    #[arg(long, default_value_t = 250, env = "HYPERCHUNK_RETRY_BACKOFF_MS")]
    pub retry_backoff_ms: u64,
    /// Merge adjacent chunks in the same object into requests up to this size, e.g. `1MiB`.
    /// 0 disables merging.
    #[arg(long, value_parser = parse_size, default_value = "0", env = "HYPERCHUNK_COALESCE_LIMIT")]
    pub coalesce_limit: u64,
    /// Whether to use Rayon for execution of CPU-bound tasks.
    #[arg(long, default_value_t = false, env = "HYPERCHUNK_USE_RAYON")]
    pub use_rayon: bool,
    /// Time in seconds allowed for each selection, including retries
    #[arg(long, env = "HYPERCHUNK_TIMEOUT")]
    pub timeout: Option<u64>,
    /// Maximum number of layouts held in the metadata cache
    #[arg(long, default_value_t = 100, env = "HYPERCHUNK_CACHE_SIZE")]
    pub cache_size: usize,
}

impl CommandLineArgs {
    /// Backend configuration derived from the arguments.
    pub fn store_config(&self) -> StoreConfig {
        let s3_credentials = match (&self.s3_access_key, &self.s3_secret_key) {
            (Some(access_key), Some(secret_key)) => {
                S3Credentials::access_key(access_key, secret_key)
            }
            _ => S3Credentials::None,
        };
        StoreConfig {
            s3_endpoint: self.s3_endpoint.clone(),
            s3_credentials,
            http_timeout: self.http_timeout.map(Duration::from_secs),
            tracking_parameter: self.tracking_parameter.clone(),
        }
    }

    /// Engine configuration derived from the arguments.
    pub fn engine_config(&self) -> EngineConfig {
        let defaults = EngineConfig::default();
        EngineConfig {
            max_concurrency: self.max_concurrency.unwrap_or(defaults.max_concurrency).max(1),
            retry: RetryPolicy {
                max_attempts: self.retry_attempts.max(1),
                initial_backoff: Duration::from_millis(self.retry_backoff_ms),
                ..defaults.retry
            },
            coalesce_limit: self.coalesce_limit,
            use_rayon: self.use_rayon,
        }
    }

    /// Options applied to every selection.
    pub fn read_options(&self) -> ReadOptions {
        ReadOptions {
            timeout: self.timeout.map(Duration::from_secs),
        }
    }
}

/// Returns parsed command line arguments.
pub fn parse() -> CommandLineArgs {
    CommandLineArgs::parse()
}
