//! In-memory storage backend
//!
//! Used for testing and development. Not persistent.

use crate::backend::{ByteStream, PieceUpload, StorageBackend, StorageStats};
use bytes::{Bytes, BytesMut};
use ddc_core::dag::DagNode;
use ddc_core::error::{DdcError, Result};
use ddc_core::uri::BucketId;
use ddc_core::{CidBuilder, ContentId};
use futures::stream::{self, StreamExt};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Default size of the chunks a piece is streamed back in
pub const DEFAULT_READ_CHUNK_SIZE: usize = 64 * 1024;

type Key = (BucketId, ContentId);

/// In-memory storage backend
pub struct MemoryBackend {
    /// CID scheme used for stored content
    builder: CidBuilder,

    /// Piece storage
    pieces: RwLock<HashMap<Key, Bytes>>,

    /// Encoded DAG nodes
    nodes: RwLock<HashMap<Key, Bytes>>,

    /// Name bindings
    names: RwLock<HashMap<(BucketId, String), ContentId>>,

    /// Maximum capacity (0 = unlimited)
    max_capacity: u64,

    /// Chunk size used when streaming pieces back
    read_chunk_size: usize,

    /// Current bytes used
    bytes_used: AtomicU64,

    /// Operation counters
    reads: AtomicU64,
    writes: AtomicU64,
}

impl MemoryBackend {
    /// Create a new in-memory backend
    pub fn new() -> Self {
        Self {
            builder: CidBuilder::new(),
            pieces: RwLock::new(HashMap::new()),
            nodes: RwLock::new(HashMap::new()),
            names: RwLock::new(HashMap::new()),
            max_capacity: 0,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            bytes_used: AtomicU64::new(0),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// Create with a maximum capacity
    pub fn with_capacity(max_bytes: u64) -> Self {
        Self {
            max_capacity: max_bytes,
            ..Self::new()
        }
    }

    /// Use a non-default CID scheme
    pub fn with_cid_builder(mut self, builder: CidBuilder) -> Self {
        self.builder = builder;
        self
    }

    /// Stream pieces back in chunks of `size` bytes
    pub fn with_read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size.max(1);
        self
    }

    /// Overwrite the bytes stored under a piece CID without re-hashing.
    ///
    /// Simulates a node serving corrupted or truncated content.
    pub fn overwrite_piece(&self, bucket: &BucketId, cid: &ContentId, data: Bytes) {
        self.pieces
            .write()
            .insert((bucket.clone(), cid.clone()), data);
    }

    /// Whether a piece is stored
    pub fn has_piece(&self, bucket: &BucketId, cid: &ContentId) -> bool {
        self.pieces
            .read()
            .contains_key(&(bucket.clone(), cid.clone()))
    }

    /// CIDs of all pieces in a bucket
    pub fn list_pieces(&self, bucket: &BucketId) -> Vec<ContentId> {
        self.pieces
            .read()
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, cid)| cid.clone())
            .collect()
    }

    /// Get storage statistics
    pub fn stats(&self) -> StorageStats {
        StorageStats {
            piece_count: self.pieces.read().len() as u64,
            node_count: self.nodes.read().len() as u64,
            bytes_used: self.bytes_used.load(Ordering::SeqCst),
            bytes_capacity: self.max_capacity,
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
        }
    }

    /// Clear all stored content and names
    pub fn clear(&self) {
        self.pieces.write().clear();
        self.nodes.write().clear();
        self.names.write().clear();
        self.bytes_used.store(0, Ordering::SeqCst);
    }

    fn insert(
        &self,
        table: &RwLock<HashMap<Key, Bytes>>,
        operation: &'static str,
        bucket: &BucketId,
        cid: ContentId,
        data: Bytes,
    ) -> Result<ContentId> {
        let data_len = data.len() as u64;
        let mut entries = table.write();

        // Content addressing makes re-stores of the same bytes free
        if entries.contains_key(&(bucket.clone(), cid.clone())) {
            self.writes.fetch_add(1, Ordering::Relaxed);
            return Ok(cid);
        }

        if self.max_capacity > 0 {
            let current = self.bytes_used.load(Ordering::SeqCst);
            if current + data_len > self.max_capacity {
                return Err(DdcError::backend(
                    operation,
                    bucket,
                    &cid,
                    format!("storage full: {} / {} bytes", current, self.max_capacity),
                ));
            }
        }

        entries.insert((bucket.clone(), cid.clone()), data);
        self.bytes_used.fetch_add(data_len, Ordering::SeqCst);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(cid)
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageBackend for MemoryBackend {
    fn store_piece<'a>(
        &'a self,
        bucket: &'a BucketId,
        upload: PieceUpload,
    ) -> Pin<Box<dyn Future<Output = Result<ContentId>> + Send + 'a>> {
        Box::pin(async move {
            let mut body = upload.body;
            let mut data = BytesMut::new();
            while let Some(chunk) = body.next().await {
                data.extend_from_slice(&chunk?);
            }

            let data = data.freeze();
            let cid = self.builder.build(&data);
            let size = data.len();
            let cid = self.insert(&self.pieces, "store_piece", bucket, cid, data)?;
            debug!(bucket = %bucket, cid = %cid, size, "Stored piece");
            Ok(cid)
        })
    }

    fn store_dag_node<'a>(
        &'a self,
        bucket: &'a BucketId,
        node: &'a DagNode,
    ) -> Pin<Box<dyn Future<Output = Result<ContentId>> + Send + 'a>> {
        Box::pin(async move {
            let encoded = Bytes::from(node.encode());
            let cid = self.builder.build(&encoded);
            let cid = self.insert(&self.nodes, "store_dag_node", bucket, cid, encoded)?;
            debug!(bucket = %bucket, cid = %cid, links = node.links.len(), "Stored DAG node");
            Ok(cid)
        })
    }

    fn get_piece<'a>(
        &'a self,
        bucket: &'a BucketId,
        cid: &'a ContentId,
    ) -> Pin<Box<dyn Future<Output = Result<ByteStream>> + Send + 'a>> {
        Box::pin(async move {
            self.reads.fetch_add(1, Ordering::Relaxed);
            let data = self
                .pieces
                .read()
                .get(&(bucket.clone(), cid.clone()))
                .cloned()
                .ok_or_else(|| DdcError::NotFound {
                    bucket: bucket.to_string(),
                    target: format!("piece {}", cid),
                })?;

            let chunk_size = self.read_chunk_size;
            let chunks: Vec<Result<Bytes>> = (0..data.len())
                .step_by(chunk_size)
                .map(|start| Ok(data.slice(start..(start + chunk_size).min(data.len()))))
                .collect();
            let body: ByteStream = stream::iter(chunks).boxed();
            Ok(body)
        })
    }

    fn get_dag_node<'a>(
        &'a self,
        bucket: &'a BucketId,
        cid: &'a ContentId,
    ) -> Pin<Box<dyn Future<Output = Result<DagNode>> + Send + 'a>> {
        Box::pin(async move {
            self.reads.fetch_add(1, Ordering::Relaxed);
            let encoded = self
                .nodes
                .read()
                .get(&(bucket.clone(), cid.clone()))
                .cloned()
                .ok_or_else(|| DdcError::NotFound {
                    bucket: bucket.to_string(),
                    target: format!("DAG node {}", cid),
                })?;
            DagNode::decode(&encoded)
        })
    }

    fn resolve_name<'a>(
        &'a self,
        bucket: &'a BucketId,
        name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<ContentId>> + Send + 'a>> {
        Box::pin(async move {
            self.names
                .read()
                .get(&(bucket.clone(), name.to_string()))
                .cloned()
                .ok_or_else(|| DdcError::NotFound {
                    bucket: bucket.to_string(),
                    target: format!("name '{}'", name),
                })
        })
    }

    fn store_name<'a>(
        &'a self,
        bucket: &'a BucketId,
        name: &'a str,
        cid: &'a ContentId,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            self.names
                .write()
                .insert((bucket.clone(), name.to_string()), cid.clone());
            debug!(bucket = %bucket, name = %name, cid = %cid, "Bound name");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ddc_core::dag::Link;
    use ddc_core::piece::Piece;
    use std::sync::Arc;

    async fn read_all(stream: ByteStream) -> Vec<u8> {
        let chunks: Vec<Result<Bytes>> = stream.collect().await;
        chunks
            .into_iter()
            .flat_map(|c| c.unwrap().to_vec())
            .collect()
    }

    #[tokio::test]
    async fn test_store_get_piece() {
        let backend = MemoryBackend::new();
        let bucket = BucketId::Id(1);
        let piece = Piece::new(Bytes::from_static(b"hello world"));

        let cid = backend
            .store_piece(&bucket, PieceUpload::from_piece(&piece))
            .await
            .unwrap();
        assert_eq!(cid, ContentId::from_data(b"hello world"));
        assert!(backend.has_piece(&bucket, &cid));

        let data = read_all(backend.get_piece(&bucket, &cid).await.unwrap()).await;
        assert_eq!(data, b"hello world");
    }

    #[tokio::test]
    async fn test_piece_streamed_in_chunks() {
        let backend = MemoryBackend::new().with_read_chunk_size(4);
        let bucket = BucketId::Id(1);
        let upload = PieceUpload::from_piece(&Piece::new(vec![7u8; 10]));
        let cid = backend.store_piece(&bucket, upload).await.unwrap();

        let chunks: Vec<Result<Bytes>> =
            backend.get_piece(&bucket, &cid).await.unwrap().collect().await;
        let sizes: Vec<usize> = chunks.iter().map(|c| c.as_ref().unwrap().len()).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
    }

    #[tokio::test]
    async fn test_buckets_are_isolated() {
        let backend = MemoryBackend::new();
        let upload = PieceUpload::from_piece(&Piece::new(Bytes::from_static(b"x")));
        let cid = backend.store_piece(&BucketId::Id(1), upload).await.unwrap();

        let err = backend
            .get_piece(&BucketId::Id(2), &cid)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DdcError::NotFound { .. }));
        assert!(backend.list_pieces(&BucketId::Id(2)).is_empty());
        assert_eq!(backend.list_pieces(&BucketId::Id(1)), vec![cid]);
    }

    #[tokio::test]
    async fn test_dag_node_roundtrip() {
        let backend = MemoryBackend::new();
        let bucket = BucketId::Name("media".to_string());
        let node = DagNode::from_links(vec![Link::new(ContentId::from_data(b"a"), 1)]);

        let cid = backend.store_dag_node(&bucket, &node).await.unwrap();
        assert_eq!(cid, node.cid(&CidBuilder::new()));
        assert_eq!(backend.get_dag_node(&bucket, &cid).await.unwrap(), node);
    }

    #[tokio::test]
    async fn test_names() {
        let backend = MemoryBackend::new();
        let bucket = BucketId::Id(3);
        let cid = ContentId::from_data(b"head");

        assert!(backend.resolve_name(&bucket, "docs/a.txt").await.is_err());
        backend.store_name(&bucket, "docs/a.txt", &cid).await.unwrap();
        assert_eq!(backend.resolve_name(&bucket, "docs/a.txt").await.unwrap(), cid);
    }

    #[tokio::test]
    async fn test_capacity_limit() {
        let backend = MemoryBackend::with_capacity(100);
        let bucket = BucketId::Id(1);

        for fill in [1u8, 2] {
            let upload = PieceUpload::from_piece(&Piece::new(vec![fill; 50]));
            backend.store_piece(&bucket, upload).await.unwrap();
        }

        let upload = PieceUpload::from_piece(&Piece::new(vec![3u8; 1]));
        let err = backend.store_piece(&bucket, upload).await.unwrap_err();
        assert!(matches!(err, DdcError::Backend { operation: "store_piece", .. }));
    }

    /// Captured log output
    #[derive(Clone, Default)]
    struct LogBuffer(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogBuffer {
        type Writer = LogBuffer;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[tokio::test]
    async fn test_rejected_store_is_not_logged() {
        let logs = LogBuffer::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let backend = MemoryBackend::with_capacity(100);
        let bucket = BucketId::Id(1);
        let upload = PieceUpload::from_piece(&Piece::new(vec![1u8; 60]));
        backend.store_piece(&bucket, upload).await.unwrap();
        let upload = PieceUpload::from_piece(&Piece::new(vec![2u8; 60]));
        assert!(backend.store_piece(&bucket, upload).await.is_err());

        let output = String::from_utf8(logs.0.lock().clone()).unwrap();
        assert_eq!(output.matches("Stored piece").count(), 1);
    }

    #[tokio::test]
    async fn test_stats_and_dedup() {
        let backend = MemoryBackend::with_capacity(1000);
        let bucket = BucketId::Id(1);

        for _ in 0..2 {
            let upload = PieceUpload::from_piece(&Piece::new(vec![0u8; 100]));
            backend.store_piece(&bucket, upload).await.unwrap();
        }
        let cid = ContentId::from_data(&[0u8; 100]);
        backend.get_piece(&bucket, &cid).await.unwrap();

        let stats = backend.stats();
        assert_eq!(stats.piece_count, 1);
        assert_eq!(stats.bytes_used, 100);
        assert_eq!(stats.writes, 2);
        assert_eq!(stats.reads, 1);
        assert_eq!(stats.usage_percent(), 10.0);

        backend.clear();
        assert_eq!(backend.stats().piece_count, 0);
        assert_eq!(backend.stats().bytes_used, 0);
    }
}
