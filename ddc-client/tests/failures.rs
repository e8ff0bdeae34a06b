//! Failure semantics of the write and read paths
//!
//! Wraps `MemoryBackend` with injected faults and delays.
//!
//! Run with: cargo test --package ddc-client --test failures

use bytes::Bytes;
use ddc_client::{BucketId, ByteStream, Chunker, Content, DdcError, HeadRef, Reassembler};
use ddc_core::{ContentId, DagNode};
use ddc_storage::{MemoryBackend, PieceUpload, StorageBackend};
use futures::stream::{self, StreamExt, TryStreamExt};
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

type BoxFut<'a, T> = Pin<Box<dyn Future<Output = ddc_client::Result<T>> + Send + 'a>>;

/// Backend with scripted faults
#[derive(Default)]
struct FlakyBackend {
    inner: MemoryBackend,
    /// Fail the n-th piece upload (1-based); 0 disables
    fail_upload: usize,
    /// Fail reads of this piece
    fail_read: Mutex<Option<ContentId>>,
    /// Upload delay, shorter for later calls
    reverse_delay: bool,
    /// Read delay, shorter for later calls
    reverse_read_delay: bool,
    reads_started: AtomicUsize,
    /// Read call numbers in completion order
    reads_completed: Mutex<Vec<usize>>,
    uploads_started: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    nodes_stored: AtomicUsize,
}

impl StorageBackend for FlakyBackend {
    fn store_piece<'a>(
        &'a self,
        bucket: &'a BucketId,
        upload: PieceUpload,
    ) -> BoxFut<'a, ContentId> {
        Box::pin(async move {
            let call = self.uploads_started.fetch_add(1, Ordering::SeqCst) + 1;
            if call == self.fail_upload {
                return Err(DdcError::backend("store_piece", bucket, "piece", "node unreachable"));
            }

            // Drain the body before storing so the upload overlaps with others
            let data: Vec<Bytes> = upload.body.try_collect().await?;
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            if self.reverse_delay {
                let delay = 60u64.saturating_sub(call as u64 * 10);
                tokio::time::sleep(Duration::from_millis(delay)).await;
            } else {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let body = stream::iter(data.into_iter().map(Ok)).boxed();
            self.inner
                .store_piece(bucket, PieceUpload::new(body).with_tags(upload.tags))
                .await
        })
    }

    fn store_dag_node<'a>(&'a self, bucket: &'a BucketId, node: &'a DagNode) -> BoxFut<'a, ContentId> {
        self.nodes_stored.fetch_add(1, Ordering::SeqCst);
        self.inner.store_dag_node(bucket, node)
    }

    fn get_piece<'a>(&'a self, bucket: &'a BucketId, cid: &'a ContentId) -> BoxFut<'a, ByteStream> {
        if self.fail_read.lock().as_ref() == Some(cid) {
            return Box::pin(async move {
                Err::<ByteStream, _>(DdcError::backend("get_piece", bucket, cid, "timeout"))
            });
        }
        if !self.reverse_read_delay {
            return self.inner.get_piece(bucket, cid);
        }
        Box::pin(async move {
            let call = self.reads_started.fetch_add(1, Ordering::SeqCst) + 1;
            let delay = 60u64.saturating_sub(call as u64 * 10);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            let stream = self.inner.get_piece(bucket, cid).await;
            self.reads_completed.lock().push(call);
            stream
        })
    }

    fn get_dag_node<'a>(&'a self, bucket: &'a BucketId, cid: &'a ContentId) -> BoxFut<'a, DagNode> {
        self.inner.get_dag_node(bucket, cid)
    }

    fn resolve_name<'a>(&'a self, bucket: &'a BucketId, name: &'a str) -> BoxFut<'a, ContentId> {
        self.inner.resolve_name(bucket, name)
    }

    fn store_name<'a>(
        &'a self,
        bucket: &'a BucketId,
        name: &'a str,
        cid: &'a ContentId,
    ) -> BoxFut<'a, ()> {
        self.inner.store_name(bucket, name, cid)
    }
}

fn pieces(parts: usize, size: usize) -> Vec<u8> {
    (0..parts * size).map(|i| (i / size) as u8).collect()
}

fn streamed(data: &[u8], buffer_size: usize) -> Content {
    let buffers: Vec<ddc_client::Result<Bytes>> = data
        .chunks(buffer_size)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    Content::Stream(stream::iter(buffers).boxed())
}

#[tokio::test]
async fn test_failed_upload_stores_no_head() {
    let backend = Arc::new(FlakyBackend {
        fail_upload: 2,
        ..Default::default()
    });
    let chunker = Chunker::new(backend.clone(), 16).unwrap();
    let data = pieces(6, 16);

    let err = chunker
        .store(&BucketId::Id(1), streamed(&data, 5), Vec::new())
        .await
        .unwrap_err();

    assert!(matches!(err, DdcError::Backend { operation: "store_piece", .. }));
    assert!(err.to_string().contains("node unreachable"));
    assert_eq!(backend.nodes_stored.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_links_ordered_despite_completion_order() {
    let backend = Arc::new(FlakyBackend {
        reverse_delay: true,
        ..Default::default()
    });
    let chunker = Chunker::new(backend.clone(), 8).unwrap();
    let data = pieces(5, 8);

    let links = chunker
        .chunk(&BucketId::Id(1), streamed(&data, 3))
        .await
        .unwrap();

    let expected: Vec<ContentId> = data.chunks(8).map(ContentId::from_data).collect();
    let actual: Vec<ContentId> = links.into_iter().map(|l| l.cid).collect();
    assert_eq!(actual, expected);
}

#[tokio::test]
async fn test_uploads_run_concurrently() {
    let backend = Arc::new(FlakyBackend::default());
    let chunker = Chunker::new(backend.clone(), 4).unwrap();
    let data = pieces(8, 4);

    let links = chunker
        .chunk(&BucketId::Id(1), streamed(&data, 4))
        .await
        .unwrap();

    assert_eq!(links.len(), 8);
    assert!(backend.max_in_flight.load(Ordering::SeqCst) > 1);
}

#[tokio::test]
async fn test_read_error_ends_stream_after_prior_pieces() {
    let backend = Arc::new(FlakyBackend::default());
    let bucket = BucketId::Id(1);
    let chunker = Chunker::new(backend.clone(), 4).unwrap();
    let file = chunker
        .store(&bucket, Content::from("aaaabbbbccccdddd"), Vec::new())
        .await
        .unwrap();

    *backend.fail_read.lock() = Some(file.head.links[2].cid.clone());

    let reader = Reassembler::new(backend).with_prefetch_depth(4);
    let items: Vec<ddc_client::Result<Bytes>> = reader
        .read(&bucket, &HeadRef::Cid(file.cid))
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(items.len(), 3);
    assert_eq!(items[0].as_ref().unwrap(), &Bytes::from_static(b"aaaa"));
    assert_eq!(items[1].as_ref().unwrap(), &Bytes::from_static(b"bbbb"));
    assert!(matches!(items[2], Err(DdcError::Backend { operation: "get_piece", .. })));
}

#[tokio::test]
async fn test_truncated_piece_is_integrity_error() {
    let backend = Arc::new(MemoryBackend::new());
    let bucket = BucketId::Id(5);
    let chunker = Chunker::new(backend.clone(), 4).unwrap();
    let file = chunker
        .store(&bucket, Content::from("0123456789"), Vec::new())
        .await
        .unwrap();

    let last = &file.head.links[2];
    assert_eq!(last.size, 2);
    backend.overwrite_piece(&bucket, &last.cid, Bytes::from_static(b"89!"));

    let reader = Reassembler::new(backend);
    let result: ddc_client::Result<Vec<Bytes>> = reader
        .read(&bucket, &HeadRef::Cid(file.cid))
        .await
        .unwrap()
        .try_collect()
        .await;

    match result {
        Err(err @ DdcError::SizeMismatch { .. }) => {
            let msg = err.to_string();
            assert!(msg.contains("bucket 5"));
            assert!(msg.contains(&last.cid.to_string()));
            assert!(msg.contains("expected 2 bytes, got 3"));
        }
        other => panic!("expected integrity error, got {:?}", other.map(|v| v.len())),
    }
}

#[tokio::test]
async fn test_read_order_despite_completion_order() {
    let backend = Arc::new(FlakyBackend {
        reverse_read_delay: true,
        ..Default::default()
    });
    let bucket = BucketId::Id(1);
    let chunker = Chunker::new(backend.clone(), 4).unwrap();
    let data = pieces(5, 4);
    let file = chunker
        .store(&bucket, streamed(&data, 3), Vec::new())
        .await
        .unwrap();

    let reader = Reassembler::new(backend.clone()).with_prefetch_depth(5);
    let read: Vec<Bytes> = reader
        .read(&bucket, &HeadRef::Cid(file.cid))
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();

    assert_eq!(read.concat(), data);
    assert_eq!(*backend.reads_completed.lock(), vec![5, 4, 3, 2, 1]);
}
