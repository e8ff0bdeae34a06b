//! DDC Core Library
//!
//! Core abstractions for the DDC content engine.
//! This crate provides:
//! - Content identifiers (CIDv1, raw codec, sha2-256, base32)
//! - Pieces, DAG nodes and links (the Merkle-DAG data model)
//! - `DdcUri` addressing and parsing
//! - Common error handling

pub mod content_id;
pub mod dag;
pub mod error;
pub mod piece;
pub mod uri;

pub use content_id::{CidBuilder, ContentId, HashAlgorithm};
pub use dag::{DagNode, Link, LinkSlice};
pub use error::{DdcError, Result};
pub use piece::{ChunkData, Piece, Tag};
pub use uri::{BucketId, DdcPath, DdcUri, Protocol};

/// Piece size constants
///
/// Pieces written by the chunker are at most `MAX_PIECE_SIZE` bytes; a
/// configured piece size below `MIN_PIECE_SIZE` is rejected by the client.
pub const MIN_PIECE_SIZE: usize = 1024 * 1024; // 1 MB
pub const MAX_PIECE_SIZE: usize = 100 * 1024 * 1024; // 100 MB
pub const DEFAULT_PIECE_SIZE: usize = MAX_PIECE_SIZE;
