//! Content reassembly
//!
//! Resolves a head node and streams its linked pieces back in link
//! order. Up to `prefetch_depth` pieces are fetched concurrently while the
//! consumer drains earlier ones. Every piece is checked against the size
//! recorded in its link before any of its bytes are yielded.

use bytes::{Bytes, BytesMut};
use ddc_core::dag::{DagNode, LinkSlice};
use ddc_core::error::{DdcError, Result};
use ddc_core::uri::BucketId;
use ddc_core::{ContentId, MAX_PIECE_SIZE};
use ddc_storage::{ByteStream, StorageBackend};
use futures::future;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::ops::Range;
use std::sync::Arc;
use tracing::{debug, warn};

/// Default number of pieces fetched ahead of the consumer
pub const DEFAULT_PREFETCH_DEPTH: usize = 4;

/// How a head node is located
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeadRef {
    /// Head node CID
    Cid(ContentId),
    /// Name bound to the head node
    Name(String),
}

impl From<ContentId> for HeadRef {
    fn from(cid: ContentId) -> Self {
        HeadRef::Cid(cid)
    }
}

/// Streams stored files back
pub struct Reassembler {
    backend: Arc<dyn StorageBackend>,
    prefetch_depth: usize,
}

impl Reassembler {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            prefetch_depth: DEFAULT_PREFETCH_DEPTH,
        }
    }

    /// Pieces fetched concurrently ahead of the one being yielded
    pub fn with_prefetch_depth(mut self, depth: usize) -> Self {
        self.prefetch_depth = depth.max(1);
        self
    }

    /// Resolve `head` to its CID
    pub async fn resolve_cid(&self, bucket: &BucketId, head: &HeadRef) -> Result<ContentId> {
        match head {
            HeadRef::Cid(cid) => Ok(cid.clone()),
            HeadRef::Name(name) => {
                let cid = self.backend.resolve_name(bucket, name).await?;
                debug!(bucket = %bucket, name = %name, cid = %cid, "Name resolved");
                Ok(cid)
            }
        }
    }

    /// Fetch the head node
    pub async fn head(&self, bucket: &BucketId, head: &HeadRef) -> Result<DagNode> {
        let cid = self.resolve_cid(bucket, head).await?;
        self.backend.get_dag_node(bucket, &cid).await
    }

    /// Stream the whole file
    pub async fn read(&self, bucket: &BucketId, head: &HeadRef) -> Result<ByteStream> {
        let node = self.head(bucket, head).await?;
        node.check_links()?;
        let size = node.total_size()?;
        self.stream_node(bucket, node, 0..size)
    }

    /// Stream bytes `range` of the file; the end is clamped to its size
    pub async fn read_range(
        &self,
        bucket: &BucketId,
        head: &HeadRef,
        range: Range<u64>,
    ) -> Result<ByteStream> {
        check_range(&range)?;
        let node = self.head(bucket, head).await?;
        self.stream_node(bucket, node, range)
    }

    /// Stream `range` of an already fetched node
    pub fn stream_node(
        &self,
        bucket: &BucketId,
        node: DagNode,
        range: Range<u64>,
    ) -> Result<ByteStream> {
        if node.links.is_empty() {
            let data = node.data.unwrap_or_default();
            let data = trim(data, &range)?;
            return Ok(if data.is_empty() {
                stream::empty().boxed()
            } else {
                stream::once(future::ready(Ok(data))).boxed()
            });
        }

        node.check_links()?;
        let slices = node.slices_for_range(range)?;
        debug!(
            bucket = %bucket,
            pieces = slices.len(),
            prefetch = self.prefetch_depth,
            "Reassembling file"
        );

        let backend = self.backend.clone();
        let bucket = bucket.clone();
        let pieces = stream::iter(slices)
            .map(move |slice| fetch_slice(backend.clone(), bucket.clone(), slice))
            .buffered(self.prefetch_depth);

        Ok(stop_after_error(pieces.boxed()))
    }

    /// Stream a single piece as stored
    pub async fn read_piece(&self, bucket: &BucketId, cid: &ContentId) -> Result<ByteStream> {
        self.backend.get_piece(bucket, cid).await
    }

    /// Bytes `range` of a single piece
    pub async fn read_piece_range(
        &self,
        bucket: &BucketId,
        cid: &ContentId,
        range: Range<u64>,
    ) -> Result<ByteStream> {
        check_range(&range)?;
        let data = collect(self.read_piece(bucket, cid).await?).await?;
        let data = trim(data, &range)?;
        Ok(stream::once(future::ready(Ok(data))).boxed())
    }
}

fn check_range(range: &Range<u64>) -> Result<()> {
    if range.start > range.end {
        return Err(DdcError::InvalidRange {
            start: range.start,
            end: range.end,
        });
    }
    Ok(())
}

/// Clamp `range` to `data` and slice
fn trim(data: Bytes, range: &Range<u64>) -> Result<Bytes> {
    check_range(range)?;
    let len = data.len() as u64;
    let start = range.start.min(len) as usize;
    let end = range.end.min(len) as usize;
    Ok(data.slice(start..end))
}

async fn collect(stream: ByteStream) -> Result<Bytes> {
    let data = stream
        .try_fold(BytesMut::new(), |mut acc, chunk| {
            acc.extend_from_slice(&chunk);
            future::ready(Ok(acc))
        })
        .await?;
    Ok(data.freeze())
}

/// Fetch one piece, verify its size, and keep the sliced part
async fn fetch_slice(
    backend: Arc<dyn StorageBackend>,
    bucket: BucketId,
    slice: LinkSlice,
) -> Result<Bytes> {
    let expected = slice.link.size;
    let mut stream = backend.get_piece(&bucket, &slice.link.cid).await?;

    let mut data = BytesMut::with_capacity(expected.min(MAX_PIECE_SIZE as u64) as usize);
    while let Some(chunk) = stream.next().await {
        data.extend_from_slice(&chunk?);
        if data.len() as u64 > expected {
            break;
        }
    }

    let actual = data.len() as u64;
    if actual != expected {
        warn!(
            bucket = %bucket,
            cid = %slice.link.cid,
            expected,
            actual,
            "Piece size does not match its link"
        );
        return Err(DdcError::SizeMismatch {
            bucket: bucket.to_string(),
            cid: slice.link.cid.to_string(),
            expected,
            actual,
        });
    }

    let data = data.freeze();
    if slice.is_full() {
        return Ok(data);
    }
    let start = slice.offset as usize;
    Ok(data.slice(start..start + slice.len as usize))
}

/// End the stream after its first error
fn stop_after_error(stream: ByteStream) -> ByteStream {
    stream
        .scan(false, |failed, item| {
            if *failed {
                return future::ready(None);
            }
            *failed = item.is_err();
            future::ready(Some(item))
        })
        .boxed()
}
