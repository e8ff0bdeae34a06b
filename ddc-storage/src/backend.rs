//! Storage backend trait
//!
//! Defines the interface the content engine uses to reach the storage
//! network. Implementations own transport, retries at the wire level and
//! timeouts; the engine treats every call as a black box.

use bytes::Bytes;
use ddc_core::dag::DagNode;
use ddc_core::error::Result;
use ddc_core::piece::{Piece, Tag};
use ddc_core::uri::BucketId;
use ddc_core::ContentId;
use futures::stream::{self, BoxStream, StreamExt};
use std::future::Future;
use std::pin::Pin;

/// Stream of byte chunks
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Piece body handed to the backend.
///
/// The body may still be growing while the backend consumes it; the
/// chunker feeds it through a channel as bytes arrive.
pub struct PieceUpload {
    /// Tags stored alongside the piece
    pub tags: Vec<Tag>,

    /// Piece bytes
    pub body: ByteStream,
}

impl PieceUpload {
    /// Upload from a byte stream
    pub fn new(body: ByteStream) -> Self {
        Self {
            tags: Vec::new(),
            body,
        }
    }

    /// Upload of a complete in-memory piece
    pub fn from_piece(piece: &Piece) -> Self {
        Self {
            tags: piece.tags.clone(),
            body: stream::once(futures::future::ready(Ok(piece.data.clone()))).boxed(),
        }
    }

    pub fn with_tags(mut self, tags: Vec<Tag>) -> Self {
        self.tags = tags;
        self
    }
}

impl std::fmt::Debug for PieceUpload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PieceUpload")
            .field("tags", &self.tags)
            .finish_non_exhaustive()
    }
}

/// Storage statistics
#[derive(Debug, Clone, Default)]
pub struct StorageStats {
    /// Total number of pieces stored
    pub piece_count: u64,

    /// Total number of DAG nodes stored
    pub node_count: u64,

    /// Total bytes used by pieces and nodes
    pub bytes_used: u64,

    /// Total storage capacity (0 = unlimited)
    pub bytes_capacity: u64,

    /// Number of read operations
    pub reads: u64,

    /// Number of write operations
    pub writes: u64,
}

impl StorageStats {
    /// Calculate usage percentage
    pub fn usage_percent(&self) -> f64 {
        if self.bytes_capacity == 0 {
            0.0
        } else {
            (self.bytes_used as f64 / self.bytes_capacity as f64) * 100.0
        }
    }

    /// Available space in bytes
    pub fn bytes_available(&self) -> u64 {
        if self.bytes_capacity == 0 {
            u64::MAX
        } else {
            self.bytes_capacity.saturating_sub(self.bytes_used)
        }
    }
}

/// Async storage backend trait
///
/// All storage implementations must be Send + Sync so they can be shared
/// across upload tasks behind an `Arc`.
pub trait StorageBackend: Send + Sync {
    /// Store a piece and return its CID (computed over the piece bytes)
    fn store_piece<'a>(
        &'a self,
        bucket: &'a BucketId,
        upload: PieceUpload,
    ) -> Pin<Box<dyn Future<Output = Result<ContentId>> + Send + 'a>>;

    /// Store a DAG node and return its CID (computed over its encoding)
    fn store_dag_node<'a>(
        &'a self,
        bucket: &'a BucketId,
        node: &'a DagNode,
    ) -> Pin<Box<dyn Future<Output = Result<ContentId>> + Send + 'a>>;

    /// Open a piece for reading
    fn get_piece<'a>(
        &'a self,
        bucket: &'a BucketId,
        cid: &'a ContentId,
    ) -> Pin<Box<dyn Future<Output = Result<ByteStream>> + Send + 'a>>;

    /// Fetch a DAG node
    fn get_dag_node<'a>(
        &'a self,
        bucket: &'a BucketId,
        cid: &'a ContentId,
    ) -> Pin<Box<dyn Future<Output = Result<DagNode>> + Send + 'a>>;

    /// Resolve a name to the CID it points at
    fn resolve_name<'a>(
        &'a self,
        bucket: &'a BucketId,
        name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<ContentId>> + Send + 'a>>;

    /// Point a name at a CID, replacing any previous binding
    fn store_name<'a>(
        &'a self,
        bucket: &'a BucketId,
        name: &'a str,
        cid: &'a ContentId,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}
