//! DDC Storage Backend
//!
//! Provides the storage boundary of the content engine:
//! - `StorageBackend` trait implemented by network clients
//! - `MemoryBackend` for testing and local development

pub mod backend;
pub mod memory;

pub use backend::{ByteStream, PieceUpload, StorageBackend, StorageStats};
pub use memory::MemoryBackend;
