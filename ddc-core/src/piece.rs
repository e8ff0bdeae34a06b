//! Pieces and tags
//!
//! A piece is the leaf unit of storage: raw bytes plus searchable tags.
//! Its CID covers the bytes only, so tagging never changes the identifier.

use crate::content_id::{CidBuilder, ContentId};
use crate::error::{DdcError, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Searchable key/value tag attached to pieces and DAG nodes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Leaf content unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Piece {
    /// Raw piece data
    pub data: Bytes,

    /// Tags in insertion order
    pub tags: Vec<Tag>,

    /// Set once the piece has been stored
    cid: Option<ContentId>,
}

impl Piece {
    /// Create an unstored piece
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            tags: Vec::new(),
            cid: None,
        }
    }

    /// Append a tag
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push(Tag::new(key, value));
        self
    }

    /// Replace all tags
    pub fn with_tags(mut self, tags: Vec<Tag>) -> Self {
        self.tags = tags;
        self
    }

    /// First tag value for `key`
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.key == key)
            .map(|t| t.value.as_str())
    }

    /// CID assigned by the storage backend, if stored
    pub fn cid(&self) -> Option<&ContentId> {
        self.cid.as_ref()
    }

    /// Size of the piece data in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// CID the piece will have once stored
    pub fn compute_cid(&self, builder: &CidBuilder) -> ContentId {
        builder.build(&self.data)
    }

    /// Record the CID returned by the backend.
    ///
    /// Re-assigning the same CID is accepted; a different one is rejected.
    pub fn assign_cid(&mut self, cid: ContentId) -> Result<()> {
        match &self.cid {
            Some(existing) if *existing != cid => Err(DdcError::CidAlreadyAssigned {
                existing: existing.to_string(),
            }),
            Some(_) => Ok(()),
            None => {
                self.cid = Some(cid);
                Ok(())
            }
        }
    }
}

/// Positioned slice of content produced while chunking
#[derive(Debug, Clone)]
pub struct ChunkData {
    /// Index of the piece within the file
    pub position: usize,

    /// Chunk bytes
    pub data: Bytes,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_do_not_affect_cid() {
        let builder = CidBuilder::new();
        let plain = Piece::new(Bytes::from_static(b"same bytes"));
        let tagged = Piece::new(Bytes::from_static(b"same bytes"))
            .with_tag("content-type", "text/plain")
            .with_tag("owner", "alice");

        assert_eq!(plain.compute_cid(&builder), tagged.compute_cid(&builder));
        assert_eq!(tagged.tag("owner"), Some("alice"));
        assert_eq!(tagged.tag("missing"), None);
    }

    #[test]
    fn test_cid_is_write_once() {
        let mut piece = Piece::new(Bytes::from_static(b"data"));
        let cid = piece.compute_cid(&CidBuilder::new());
        assert!(piece.cid().is_none());

        piece.assign_cid(cid.clone()).unwrap();
        assert_eq!(piece.cid(), Some(&cid));

        // Same CID again is fine
        piece.assign_cid(cid.clone()).unwrap();

        let other = ContentId::from_data(b"other");
        let err = piece.assign_cid(other).unwrap_err();
        assert!(matches!(err, DdcError::CidAlreadyAssigned { .. }));
        assert_eq!(piece.cid(), Some(&cid));
    }

    #[test]
    fn test_size() {
        let piece = Piece::new(vec![0u8; 1024]);
        assert_eq!(piece.size(), 1024);
    }
}
