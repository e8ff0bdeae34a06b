//! DDC Client
//!
//! Content engine client for the DDC storage network:
//! - `Chunker` splits content into pieces and uploads them concurrently
//! - `Reassembler` streams files back with bounded prefetch
//! - `GasCounter` records usage with commit/revert snapshots
//! - `TasksRunner` debounces background work such as usage settlement
//! - `DdcClient` wires the above to a `StorageBackend`

pub mod chunker;
pub mod client;
pub mod config;
pub mod content;
pub mod gas;
pub mod reader;
pub mod tasks;

pub use chunker::{ChunkedFile, Chunker};
pub use client::{DdcClient, FileOptions, UsageSettlement};
pub use config::ClientConfig;
pub use content::Content;
pub use gas::{CommitId, GasCounter, GasEntry};
pub use reader::{HeadRef, Reassembler};
pub use tasks::{TaskFn, TasksRunner};

pub use ddc_core::{BucketId, ContentId, DdcError, DdcUri, Piece, Result, Tag};
pub use ddc_storage::{ByteStream, StorageBackend};
