//! Streaming chunker
//!
//! Splits a content stream into pieces of at most `max_piece_size` bytes
//! and uploads them while the stream is still being read. Each piece is
//! streamed to the backend through its own bounded channel, so several
//! uploads can be in flight at once. Links are emitted in content order
//! regardless of the order in which uploads complete.

use bytes::Bytes;
use ddc_core::dag::{DagNode, Link};
use ddc_core::error::{DdcError, Result};
use ddc_core::piece::{ChunkData, Tag};
use ddc_core::uri::BucketId;
use ddc_core::{ContentId, MAX_PIECE_SIZE};
use ddc_storage::{PieceUpload, StorageBackend};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::content::Content;

/// Default number of buffers queued per open piece upload
pub const DEFAULT_UPLOAD_BUFFER: usize = 16;

/// Result of chunking and storing a file
#[derive(Debug, Clone)]
pub struct ChunkedFile {
    /// CID of the stored head node
    pub cid: ContentId,

    /// Head node linking every piece in order
    pub head: DagNode,

    /// Total content size in bytes
    pub size: u64,
}

/// Splits content into pieces and uploads them
pub struct Chunker {
    backend: Arc<dyn StorageBackend>,
    max_piece_size: usize,
    upload_buffer: usize,
}

impl Chunker {
    /// Create a chunker producing pieces of at most `max_piece_size` bytes
    pub fn new(backend: Arc<dyn StorageBackend>, max_piece_size: usize) -> Result<Self> {
        if max_piece_size == 0 || max_piece_size > MAX_PIECE_SIZE {
            return Err(DdcError::InvalidPieceSize {
                size: max_piece_size,
                min: 1,
                max: MAX_PIECE_SIZE,
            });
        }

        Ok(Self {
            backend,
            max_piece_size,
            upload_buffer: DEFAULT_UPLOAD_BUFFER,
        })
    }

    /// Buffers queued per upload before the reader waits on the backend
    pub fn with_upload_buffer(mut self, buffers: usize) -> Self {
        self.upload_buffer = buffers.max(1);
        self
    }

    pub fn max_piece_size(&self) -> usize {
        self.max_piece_size
    }

    /// Chunk and upload `content`, returning links in content order.
    ///
    /// Empty content produces no pieces. If any upload fails the remaining
    /// uploads are aborted and the first error is returned.
    pub async fn chunk(&self, bucket: &BucketId, content: Content) -> Result<Vec<Link>> {
        let mut source = content.into_stream();
        let mut pipeline = UploadPipeline::new(self, bucket.clone());

        while let Some(buffer) = source.next().await {
            let buffer = match buffer {
                Ok(buffer) => buffer,
                Err(e) => {
                    warn!(bucket = %bucket, error = %e, "Content stream failed, aborting uploads");
                    return Err(e);
                }
            };
            pipeline.push(buffer).await?;
            pipeline.poll_completed()?;
        }

        pipeline.finish().await
    }

    /// Chunk `content` and store a head node linking its pieces.
    ///
    /// `tags` are attached to the head node only. No head node is stored
    /// when any piece fails to upload.
    pub async fn store(
        &self,
        bucket: &BucketId,
        content: Content,
        tags: Vec<Tag>,
    ) -> Result<ChunkedFile> {
        let links = self.chunk(bucket, content).await?;
        let head = DagNode::from_links(links).with_tags(tags);
        let size = head.total_size()?;
        let cid = self.backend.store_dag_node(bucket, &head).await?;

        info!(
            bucket = %bucket,
            cid = %cid,
            pieces = head.links.len(),
            size,
            "File stored"
        );

        Ok(ChunkedFile { cid, head, size })
    }
}

/// Piece currently receiving bytes
struct OpenPiece {
    position: usize,
    written: usize,
    sink: mpsc::Sender<Result<Bytes>>,
}

type UploadOutcome = (usize, Result<ContentId>);

/// Per-call upload state
struct UploadPipeline<'a> {
    /// Dropped first so no task sees a truncated body as complete
    handles: AbortOnDrop,
    chunker: &'a Chunker,
    bucket: BucketId,
    open: Option<OpenPiece>,
    /// Piece sizes by position, known once a piece is closed
    sizes: Vec<u64>,
    uploads: FuturesUnordered<BoxFuture<'static, UploadOutcome>>,
    slots: LinkSlots,
}

impl<'a> UploadPipeline<'a> {
    fn new(chunker: &'a Chunker, bucket: BucketId) -> Self {
        Self {
            handles: AbortOnDrop(Vec::new()),
            chunker,
            bucket,
            open: None,
            sizes: Vec::new(),
            uploads: FuturesUnordered::new(),
            slots: LinkSlots::default(),
        }
    }

    /// Route one source buffer into pieces, splitting at piece boundaries
    async fn push(&mut self, mut buffer: Bytes) -> Result<()> {
        while !buffer.is_empty() {
            let (position, written) = match self.open.as_ref().map(|o| (o.position, o.written)) {
                Some(state) => state,
                None => (self.open_piece(), 0),
            };

            let take = (self.chunker.max_piece_size - written).min(buffer.len());
            self.write(ChunkData {
                position,
                data: buffer.split_to(take),
            })
            .await?;
        }
        Ok(())
    }

    fn open_piece(&mut self) -> usize {
        let position = self.slots.open();
        self.sizes.push(0);

        let (sink, rx) = mpsc::channel(self.chunker.upload_buffer);
        let backend = self.chunker.backend.clone();
        let bucket = self.bucket.clone();
        let handle = tokio::spawn(async move {
            let body = ReceiverStream::new(rx).boxed();
            backend.store_piece(&bucket, PieceUpload::new(body)).await
        });
        self.handles.0.push(handle.abort_handle());

        let bucket = self.bucket.clone();
        self.uploads.push(
            async move {
                let result = handle.await.unwrap_or_else(|e| {
                    warn!(bucket = %bucket, position, error = %e, "Upload task did not complete");
                    Err(DdcError::UploadAborted {
                        bucket: bucket.to_string(),
                        position,
                    })
                });
                (position, result)
            }
            .boxed(),
        );

        debug!(bucket = %self.bucket, position, "Piece opened");
        self.open = Some(OpenPiece {
            position,
            written: 0,
            sink,
        });
        position
    }

    async fn write(&mut self, chunk: ChunkData) -> Result<()> {
        let Some(open) = self.open.as_mut() else {
            return Err(DdcError::Internal("write without an open piece".to_string()));
        };
        debug_assert_eq!(open.position, chunk.position);

        let len = chunk.data.len();
        if open.sink.send(Ok(chunk.data)).await.is_err() {
            // Upload ended early; its outcome carries the reason
            let position = open.position;
            self.open = None;
            return Err(self.failure_of(position).await);
        }
        open.written += len;

        if open.written == self.chunker.max_piece_size {
            self.close_piece();
        }
        Ok(())
    }

    /// Close the open piece; dropping the sink ends its upload body
    fn close_piece(&mut self) {
        if let Some(open) = self.open.take() {
            self.sizes[open.position] = open.written as u64;
            debug!(
                bucket = %self.bucket,
                position = open.position,
                size = open.written,
                "Piece closed"
            );
        }
    }

    /// Record uploads that have already completed without waiting
    fn poll_completed(&mut self) -> Result<()> {
        while let Some(Some((position, result))) = self.uploads.next().now_or_never() {
            self.complete(position, result)?;
        }
        Ok(())
    }

    fn complete(&mut self, position: usize, result: Result<ContentId>) -> Result<()> {
        let cid = match result {
            Ok(cid) => cid,
            Err(e) => {
                warn!(bucket = %self.bucket, position, error = %e, "Piece upload failed");
                return Err(e);
            }
        };

        let size = self.sizes[position];
        debug!(bucket = %self.bucket, position, cid = %cid, size, "Piece uploaded");
        self.slots.fill(position, Link::new(cid, size));
        Ok(())
    }

    /// First upload error, once the upload at `position` stopped accepting bytes
    async fn failure_of(&mut self, position: usize) -> DdcError {
        while let Some((_, result)) = self.uploads.next().await {
            if let Err(e) = result {
                return e;
            }
        }
        DdcError::UploadAborted {
            bucket: self.bucket.to_string(),
            position,
        }
    }

    /// Close the last piece and wait for every upload
    async fn finish(mut self) -> Result<Vec<Link>> {
        self.close_piece();

        while let Some((position, result)) = self.uploads.next().await {
            self.complete(position, result)?;
        }

        self.slots.into_links()
    }
}

/// Aborts every upload task still running when dropped
struct AbortOnDrop(Vec<AbortHandle>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

/// Positional link buffer.
///
/// Slots are reserved in content order when pieces open and filled as
/// uploads complete; the contiguous filled prefix is moved to the output.
#[derive(Debug, Default)]
pub(crate) struct LinkSlots {
    slots: Vec<Option<Link>>,
    /// Links released in order
    ready: Vec<Link>,
}

impl LinkSlots {
    /// Reserve the next slot
    pub(crate) fn open(&mut self) -> usize {
        self.slots.push(None);
        self.slots.len() - 1
    }

    /// Fill a slot and release any contiguous prefix
    pub(crate) fn fill(&mut self, position: usize, link: Link) {
        self.slots[position] = Some(link);
        while let Some(Some(_)) = self.slots.get(self.ready.len()) {
            if let Some(link) = self.slots[self.ready.len()].take() {
                self.ready.push(link);
            }
        }
    }

    /// Links released so far
    pub(crate) fn ready(&self) -> &[Link] {
        &self.ready
    }

    pub(crate) fn into_links(self) -> Result<Vec<Link>> {
        if self.ready.len() != self.slots.len() {
            return Err(DdcError::Internal(format!(
                "{} of {} pieces missing a link",
                self.slots.len() - self.ready.len(),
                self.slots.len()
            )));
        }
        Ok(self.ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ddc_storage::MemoryBackend;
    use futures::stream;

    fn link(i: u8) -> Link {
        Link::new(ContentId::from_data(&[i]), 1)
    }

    fn chunked(parts: &[&'static str]) -> Content {
        let buffers: Vec<Result<Bytes>> = parts
            .iter()
            .map(|p| Ok(Bytes::from_static(p.as_bytes())))
            .collect();
        Content::Stream(stream::iter(buffers).boxed())
    }

    #[test]
    fn test_link_slots_out_of_order() {
        let mut slots = LinkSlots::default();
        for _ in 0..3 {
            slots.open();
        }

        slots.fill(2, link(2));
        assert!(slots.ready().is_empty());
        slots.fill(0, link(0));
        assert_eq!(slots.ready(), &[link(0)]);
        slots.fill(1, link(1));

        assert_eq!(slots.into_links().unwrap(), vec![link(0), link(1), link(2)]);
    }

    #[test]
    fn test_link_slots_incomplete() {
        let mut slots = LinkSlots::default();
        slots.open();
        slots.open();
        slots.fill(1, link(1));
        assert!(slots.into_links().is_err());
    }

    #[test]
    fn test_invalid_piece_size() {
        let backend = Arc::new(MemoryBackend::new());
        assert!(Chunker::new(backend.clone(), 0).is_err());
        assert!(Chunker::new(backend.clone(), MAX_PIECE_SIZE + 1).is_err());
        assert!(Chunker::new(backend, 1).is_ok());
    }

    #[tokio::test]
    async fn test_buffers_split_across_pieces() {
        let backend = Arc::new(MemoryBackend::new());
        let chunker = Chunker::new(backend.clone(), 4).unwrap();
        let bucket = BucketId::Id(1);

        let links = chunker
            .chunk(&bucket, chunked(&["ab", "cdefghi", "", "j"]))
            .await
            .unwrap();

        let sizes: Vec<u64> = links.iter().map(|l| l.size).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
        assert_eq!(links[0].cid, ContentId::from_data(b"abcd"));
        assert_eq!(links[1].cid, ContentId::from_data(b"efgh"));
        assert_eq!(links[2].cid, ContentId::from_data(b"ij"));
        assert_eq!(backend.list_pieces(&bucket).len(), 3);
    }

    #[tokio::test]
    async fn test_exact_multiple_has_no_trailing_piece() {
        let backend = Arc::new(MemoryBackend::new());
        let chunker = Chunker::new(backend, 3).unwrap();

        let links = chunker
            .chunk(&BucketId::Id(1), Content::from("abcdef"))
            .await
            .unwrap();
        assert_eq!(links.len(), 2);
        assert!(links.iter().all(|l| l.size == 3));
    }

    #[tokio::test]
    async fn test_empty_content_has_no_links() {
        let backend = Arc::new(MemoryBackend::new());
        let chunker = Chunker::new(backend.clone(), 8).unwrap();

        let file = chunker
            .store(&BucketId::Id(1), Content::from(""), vec![Tag::new("kind", "empty")])
            .await
            .unwrap();
        assert!(file.head.links.is_empty());
        assert_eq!(file.size, 0);
        assert_eq!(file.head.tags, vec![Tag::new("kind", "empty")]);
        assert_eq!(backend.stats().piece_count, 0);
        assert_eq!(backend.stats().node_count, 1);
    }

    #[tokio::test]
    async fn test_source_error_stops_chunking() {
        let backend = Arc::new(MemoryBackend::new());
        let chunker = Chunker::new(backend.clone(), 4).unwrap();

        let content = Content::Stream(
            stream::iter(vec![
                Ok(Bytes::from_static(b"abcdef")),
                Err(DdcError::Internal("source closed".to_string())),
            ])
            .boxed(),
        );

        let err = chunker
            .store(&BucketId::Id(1), content, Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DdcError::Internal(_)));
        assert_eq!(backend.stats().node_count, 0);
    }
}
