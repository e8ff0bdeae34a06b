//! DDC client
//!
//! Ties the content engine together: pieces and files are written through
//! the chunker, read back through the reassembler, and every stored byte
//! is recorded as gas. When a settlement sink is configured, usage is
//! settled by a debounced background task.

use ddc_core::dag::DagNode;
use ddc_core::error::{DdcError, Result};
use ddc_core::piece::{Piece, Tag};
use ddc_core::uri::{BucketId, DdcUri, Protocol};
use ddc_core::{ContentId, MAX_PIECE_SIZE};
use ddc_storage::{ByteStream, PieceUpload, StorageBackend};
use std::future::Future;
use std::ops::Range;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::chunker::Chunker;
use crate::config::ClientConfig;
use crate::content::Content;
use crate::gas::GasCounter;
use crate::reader::{HeadRef, Reassembler};
use crate::tasks::{TaskFn, TasksRunner};

/// Task key for usage settlement
const SETTLE_USAGE: &str = "settle-usage";

/// Receiver of consumed-resource totals
pub trait UsageSettlement: Send + Sync {
    /// Settle `amount` units of usage. On error the usage is kept and
    /// settled again on the next attempt.
    fn settle<'a>(
        &'a self,
        amount: u64,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;
}

/// Options for storing a file
#[derive(Debug, Clone, Default)]
pub struct FileOptions {
    /// Tags for the head node
    pub tags: Vec<Tag>,

    /// Name to bind to the head node; the returned URI uses it
    pub name: Option<String>,
}

impl FileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push(Tag::new(key, value));
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Content engine client
pub struct DdcClient {
    config: ClientConfig,
    backend: Arc<dyn StorageBackend>,
    chunker: Chunker,
    reader: Reassembler,
    gas: Arc<GasCounter>,
    tasks: TasksRunner<&'static str, ()>,
    settlement: Option<Arc<dyn UsageSettlement>>,
}

impl DdcClient {
    /// Create a client over `backend`
    pub fn new(backend: Arc<dyn StorageBackend>, config: ClientConfig) -> Result<Self> {
        config.validate()?;

        let chunker = Chunker::new(backend.clone(), config.max_piece_size)?
            .with_upload_buffer(config.upload_buffer);
        let reader = Reassembler::new(backend.clone()).with_prefetch_depth(config.prefetch_depth);
        let tasks = TasksRunner::new(config.flush_delay());

        info!(
            max_piece_size = config.max_piece_size,
            prefetch_depth = config.prefetch_depth,
            "DDC client created"
        );

        Ok(Self {
            config,
            backend,
            chunker,
            reader,
            gas: Arc::new(GasCounter::new()),
            tasks,
            settlement: None,
        })
    }

    /// Settle recorded usage through `settlement`
    pub fn with_settlement(mut self, settlement: Arc<dyn UsageSettlement>) -> Self {
        self.settlement = Some(settlement);
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Usage recorded by this client
    pub fn gas(&self) -> &Arc<GasCounter> {
        &self.gas
    }

    /// Number of pending settlement tasks
    pub fn pending_tasks(&self) -> usize {
        self.tasks.pending()
    }

    /// Store a single piece; returns an `ipiece` URI
    #[instrument(skip(self, piece), fields(size = piece.size()))]
    pub async fn store_piece(&self, bucket: &BucketId, mut piece: Piece) -> Result<DdcUri> {
        if piece.size() > MAX_PIECE_SIZE {
            return Err(DdcError::InvalidPieceSize {
                size: piece.size(),
                min: 0,
                max: MAX_PIECE_SIZE,
            });
        }

        let cid = self
            .backend
            .store_piece(bucket, PieceUpload::from_piece(&piece))
            .await?;
        piece.assign_cid(cid.clone())?;
        self.record_usage(piece.size() as u64);

        debug!(cid = %cid, "Piece stored");
        DdcUri::inline_piece(bucket.clone(), cid)
    }

    /// Store a file of any size.
    ///
    /// Returns an `ifile` URI, or a named `file` URI when
    /// `options.name` is set.
    #[instrument(skip(self, content, options), fields(size_hint = tracing::field::Empty))]
    pub async fn store_file(
        &self,
        bucket: &BucketId,
        content: impl Into<Content>,
        options: FileOptions,
    ) -> Result<DdcUri> {
        let content = content.into();
        if let Some(size) = content.size_hint() {
            tracing::Span::current().record("size_hint", size);
        }

        // Validate the name before any piece is uploaded
        let named = options
            .name
            .as_deref()
            .map(|name| DdcUri::named_file(bucket.clone(), name))
            .transpose()?;

        let file = self.chunker.store(bucket, content, options.tags).await?;
        self.record_usage(file.size);

        match named {
            Some(uri) => {
                let name = uri
                    .name()
                    .ok_or_else(|| DdcError::invalid_uri(uri.to_string(), "missing path"))?;
                self.backend.store_name(bucket, &name, &file.cid).await?;
                debug!(name = %name, cid = %file.cid, "Name bound");
                Ok(uri)
            }
            None => DdcUri::inline_file(bucket.clone(), file.cid),
        }
    }

    /// Stream the content addressed by `uri`
    #[instrument(skip(self, uri), fields(uri = %uri))]
    pub async fn read(&self, uri: &DdcUri) -> Result<ByteStream> {
        let bucket = uri.bucket();
        match uri.protocol() {
            Protocol::InlinePiece | Protocol::Piece => {
                let cid = self.piece_cid(uri).await?;
                self.reader.read_piece(bucket, &cid).await
            }
            Protocol::InlineFile | Protocol::File => {
                self.reader.read(bucket, &head_ref(uri)?).await
            }
        }
    }

    /// Stream bytes `range` of the content addressed by `uri`
    #[instrument(skip(self, uri), fields(uri = %uri))]
    pub async fn read_range(&self, uri: &DdcUri, range: Range<u64>) -> Result<ByteStream> {
        let bucket = uri.bucket();
        match uri.protocol() {
            Protocol::InlinePiece | Protocol::Piece => {
                let cid = self.piece_cid(uri).await?;
                self.reader.read_piece_range(bucket, &cid, range).await
            }
            Protocol::InlineFile | Protocol::File => {
                self.reader.read_range(bucket, &head_ref(uri)?, range).await
            }
        }
    }

    /// Fetch the head node of a file URI
    pub async fn head(&self, uri: &DdcUri) -> Result<DagNode> {
        if !uri.protocol().is_file() {
            return Err(DdcError::invalid_uri(uri.to_string(), "not a file URI"));
        }
        self.reader.head(uri.bucket(), &head_ref(uri)?).await
    }

    /// Cancel pending settlement; usage stays recorded in the counter
    pub fn reset_tasks(&self) {
        self.tasks.reset();
    }

    async fn piece_cid(&self, uri: &DdcUri) -> Result<ContentId> {
        self.reader.resolve_cid(uri.bucket(), &head_ref(uri)?).await
    }

    fn record_usage(&self, amount: u64) {
        self.gas.push(amount);

        let Some(settlement) = self.settlement.clone() else {
            return;
        };
        self.tasks
            .add_task(SETTLE_USAGE, settle_task(self.gas.clone(), settlement), ());
    }
}

/// Where a URI's head is found
fn head_ref(uri: &DdcUri) -> Result<HeadRef> {
    if let Some(cid) = uri.cid() {
        return Ok(HeadRef::Cid(cid.clone()));
    }
    uri.name()
        .map(HeadRef::Name)
        .ok_or_else(|| DdcError::invalid_uri(uri.to_string(), "missing path"))
}

/// Settle everything uncommitted; revert the snapshot if settlement fails
fn settle_task(gas: Arc<GasCounter>, settlement: Arc<dyn UsageSettlement>) -> TaskFn<()> {
    Arc::new(move |()| {
        let gas = gas.clone();
        let settlement = settlement.clone();
        Box::pin(async move {
            let (total, commit) = gas.read_uncommitted();
            if total == 0 {
                gas.commit(commit);
                return Ok(());
            }

            match settlement.settle(total).await {
                Ok(()) => {
                    gas.commit(commit);
                    info!(amount = total, "Usage settled");
                    Ok(())
                }
                Err(e) => {
                    gas.revert(commit);
                    warn!(amount = total, error = %e, "Usage settlement failed");
                    Err(e)
                }
            }
        })
    })
}
