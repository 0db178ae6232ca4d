//! This file defines the hyperchunk binary entry point.

use std::error::Error;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use hyperchunk::chunk_store::ChunkStore;
use hyperchunk::cli::{self, CommandLineArgs};
use hyperchunk::engine::Engine;
use hyperchunk::error::{log_error, ReconstructionError};
use hyperchunk::layout::Layout;
use hyperchunk::manifest::Manifest;
use hyperchunk::metadata_cache::{LayoutCache, DEFAULT_PURGE_FRACTION};
use hyperchunk::metrics;
use hyperchunk::models::Hyperslab;
use hyperchunk::resource_manager::ResourceManager;
use hyperchunk::tracing;

use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Returns the layout described by a manifest file, reading it only on a cache miss.
async fn load_layout(cache: &LayoutCache, path: &Path) -> Result<Arc<Layout>, ReconstructionError> {
    cache
        .get_or_try_insert_with(&path.to_string_lossy(), || async {
            Manifest::load(path).await?.into_layout()
        })
        .await
}

/// Reconstruct every selection and write the results.
async fn run(args: &CommandLineArgs) -> Result<(), Box<dyn Error>> {
    let memory_limit = args.memory_limit.map(usize::try_from).transpose()?;
    let resource_manager = Arc::new(ResourceManager::new(args.connection_limit, memory_limit));
    let store = ChunkStore::new(&args.store_config(), resource_manager)?;
    let engine = Engine::new(Arc::new(store), args.engine_config());
    let cache = LayoutCache::new(args.cache_size, DEFAULT_PURGE_FRACTION);
    let options = args.read_options();

    let mut output: Box<dyn AsyncWrite + Unpin> = match &args.output {
        Some(path) => Box::new(tokio::fs::File::create(path).await?),
        None => Box::new(tokio::io::stdout()),
    };

    let start = Instant::now();
    let mut total_bytes = 0;
    let mut selections = args.selection.clone();
    if selections.is_empty() {
        let layout = load_layout(&cache, &args.manifest).await?;
        selections.push(Hyperslab::full(layout.shape()));
    }
    for hyperslab in &selections {
        let layout = load_layout(&cache, &args.manifest).await?;
        let data = engine.read_to_vec(&layout, hyperslab, &options).await?;
        ::tracing::debug!(
            shape = ?hyperslab.shape(),
            bytes = data.len(),
            "reconstructed selection"
        );
        output.write_all(&data).await?;
        total_bytes += data.len();
    }
    output.flush().await?;
    ::tracing::info!(
        manifest = %args.manifest.display(),
        selections = selections.len(),
        bytes = total_bytes,
        elapsed = ?start.elapsed(),
        "reconstruction complete"
    );
    Ok(())
}

/// Application entry point
#[tokio::main]
async fn main() {
    let args = cli::parse();
    tracing::init_tracing();
    if let Err(err) = metrics::register_metrics() {
        log_error(&err);
    }
    let result = run(&args).await;
    if args.print_metrics {
        match metrics::gather_metrics() {
            Ok(text) => eprint!("{}", text),
            Err(err) => log_error(&err),
        }
    }
    if let Err(err) = result {
        log_error(err.as_ref());
        std::process::exit(1);
    }
}
