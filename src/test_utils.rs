use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::compression::test_utils::{compress_gzip, compress_zlib};
use crate::error::{FailureKind, RetrievalFailure};
use crate::filters::fletcher32::test_utils::append as append_checksum;
use crate::filters::shuffle::test_utils::shuffle;
use crate::layout::{ChunkLocation, Layout};
use crate::models::{ChunkCoord, ElementType, Filter};
use crate::retrieval::{ByteRangeRequest, RetrievalBackend};
use crate::types::{ByteOrder, FillValue};

use async_trait::async_trait;
use bytes::Bytes;
use hashbrown::HashMap;
use tokio::time::Instant;

/// In-memory [RetrievalBackend] with scripted failures and delays.
///
/// Failures and delays are keyed on `(location, offset)`. Ranges running past the end of an
/// object return the bytes that exist, so short reads can be provoked.
#[derive(Debug, Default)]
pub(crate) struct MemoryBackend {
    objects: HashMap<String, Bytes>,
    failures: Mutex<HashMap<(String, u64), VecDeque<FailureKind>>>,
    delays: HashMap<(String, u64), Duration>,
    calls: Mutex<Vec<(Instant, ByteRangeRequest)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MemoryBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_object(mut self, location: &str, data: impl Into<Bytes>) -> Self {
        self.objects.insert(location.to_string(), data.into());
        self
    }

    /// Fail the next requests at `offset` of `location` with each of `kinds` in turn.
    pub(crate) fn with_failures(self, location: &str, offset: u64, kinds: &[FailureKind]) -> Self {
        self.failures
            .lock()
            .unwrap()
            .entry((location.to_string(), offset))
            .or_default()
            .extend(kinds);
        self
    }

    pub(crate) fn with_delay(mut self, location: &str, offset: u64, delay: Duration) -> Self {
        self.delays.insert((location.to_string(), offset), delay);
        self
    }

    pub(crate) fn calls(&self) -> Vec<ByteRangeRequest> {
        let calls = self.calls.lock().unwrap();
        calls.iter().map(|(_, request)| request.clone()).collect()
    }

    pub(crate) fn call_times(&self) -> Vec<Instant> {
        let calls = self.calls.lock().unwrap();
        calls.iter().map(|(time, _)| *time).collect()
    }

    pub(crate) fn num_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn read(&self, request: &ByteRangeRequest) -> Result<Bytes, RetrievalFailure> {
        let key = (request.location.clone(), request.offset);
        if let Some(kind) = self
            .failures
            .lock()
            .unwrap()
            .get_mut(&key)
            .and_then(VecDeque::pop_front)
        {
            return Err(RetrievalFailure::new(kind, "scripted failure"));
        }
        let object = self.objects.get(&request.location).ok_or_else(|| {
            RetrievalFailure::new(FailureKind::NotFound, request.location.clone())
        })?;
        let start = (request.offset as usize).min(object.len());
        let end = (request.offset + request.length).min(object.len() as u64) as usize;
        Ok(object.slice(start..end))
    }
}

#[async_trait]
impl RetrievalBackend for MemoryBackend {
    async fn fetch(&self, request: &ByteRangeRequest) -> Result<Bytes, RetrievalFailure> {
        self.calls
            .lock()
            .unwrap()
            .push((Instant::now(), request.clone()));
        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        if let Some(delay) = self
            .delays
            .get(&(request.location.clone(), request.offset))
        {
            tokio::time::sleep(*delay).await;
        }
        let result = self.read(request);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Apply the encoding direction of a filter pipeline, last filter first.
pub(crate) fn encode(filters: &[Filter], element_size: usize, data: &[u8]) -> Vec<u8> {
    filters.iter().rev().fold(data.to_vec(), |data, filter| match filter {
        Filter::Deflate { .. } => compress_zlib(&data),
        Filter::Gzip => compress_gzip(&data),
        Filter::Shuffle { element_size: size } => shuffle(&data, size.unwrap_or(element_size)),
        Filter::Fletcher32 => append_checksum(&data),
        filter => panic!("no encoder for {} filter", filter.codec_name()),
    })
}

/// Description of a chunked array fixture.
pub(crate) struct Fixture {
    pub(crate) shape: Vec<usize>,
    pub(crate) chunk_shape: Vec<usize>,
    pub(crate) element_type: ElementType,
    pub(crate) byte_order: ByteOrder,
    pub(crate) fill_value: Option<FillValue>,
    pub(crate) filters: Vec<Filter>,
    /// Grid coordinates of chunks left out of the chunk index
    pub(crate) missing: Vec<ChunkCoord>,
}

impl Fixture {
    pub(crate) fn new(shape: &[usize], chunk_shape: &[usize], element_type: ElementType) -> Self {
        Self {
            shape: shape.to_vec(),
            chunk_shape: chunk_shape.to_vec(),
            element_type,
            byte_order: ByteOrder::Little,
            fill_value: None,
            filters: vec![],
            missing: vec![],
        }
    }

    /// Split a row-major array in the stored byte order into encoded chunks.
    ///
    /// All chunks are stored back to back in a single object, `mem://array`. Edge chunks are
    /// padded to the full chunk shape with zeros.
    pub(crate) fn build(&self, data: &[u8]) -> (Layout, MemoryBackend) {
        let element_size = self.element_type.size_of();
        let grid: Vec<usize> = self
            .shape
            .iter()
            .zip(&self.chunk_shape)
            .map(|(extent, chunk)| extent.div_ceil(*chunk))
            .collect();
        let mut builder = Layout::builder(
            self.shape.clone(),
            self.chunk_shape.clone(),
            self.element_type,
        )
        .byte_order(self.byte_order)
        .fill_value(self.fill_value.clone())
        .filters(self.filters.clone());
        let mut object = vec![];
        for coord in multi_indices(&grid) {
            if self.missing.contains(&coord) {
                continue;
            }
            let mut chunk = vec![];
            for within in multi_indices(&self.chunk_shape) {
                let global: Vec<usize> = coord
                    .iter()
                    .zip(&within)
                    .zip(&self.chunk_shape)
                    .map(|((c, w), extent)| c * extent + w)
                    .collect();
                if global.iter().zip(&self.shape).all(|(g, extent)| g < extent) {
                    let offset = linear_index(&global, &self.shape) * element_size;
                    chunk.extend_from_slice(&data[offset..offset + element_size]);
                } else {
                    chunk.extend(std::iter::repeat(0).take(element_size));
                }
            }
            let encoded = encode(&self.filters, element_size, &chunk);
            let location =
                ChunkLocation::new("mem://array", object.len() as u64, encoded.len() as u64);
            object.extend_from_slice(&encoded);
            builder = builder.chunk(coord, location);
        }
        let layout = builder.build().unwrap();
        (layout, MemoryBackend::new().with_object("mem://array", object))
    }
}

/// All multi-indices of a shape in row-major order.
pub(crate) fn multi_indices(shape: &[usize]) -> Vec<Vec<usize>> {
    shape.iter().fold(vec![vec![]], |indices, extent| {
        indices
            .into_iter()
            .flat_map(|prefix| {
                (0..*extent).map(move |i| {
                    let mut index = prefix.clone();
                    index.push(i);
                    index
                })
            })
            .collect()
    })
}

/// Row-major linear index of a multi-index.
pub(crate) fn linear_index(index: &[usize], shape: &[usize]) -> usize {
    index
        .iter()
        .zip(shape)
        .fold(0, |linear, (i, extent)| linear * extent + i)
}

/// Little endian bytes of a sequence of i32.
pub(crate) fn i32_bytes(values: impl IntoIterator<Item = i32>) -> Vec<u8> {
    values.into_iter().flat_map(i32::to_le_bytes).collect()
}

/// Host order i32 values of a byte buffer.
pub(crate) fn i32_values(bytes: &[u8]) -> Vec<i32> {
    bytes
        .chunks_exact(4)
        .map(|b| i32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}
