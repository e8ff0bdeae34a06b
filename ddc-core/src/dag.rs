//! Merkle-DAG nodes
//!
//! A `DagNode` references child content through ordered `Link`s. The link
//! order is the reconstruction order of the file the node represents, and
//! it is part of the node's identity: the CID is computed over the
//! canonical protobuf encoding of data, links and tags together.

use crate::content_id::{CidBuilder, ContentId};
use crate::error::{DdcError, Result};
use crate::piece::Tag;
use crate::MAX_PIECE_SIZE;
use bytes::Bytes;
use prost::Message;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Edge from a DAG node to child content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    /// CID of the referenced piece or node
    pub cid: ContentId,

    /// Exact byte length of the referenced content
    pub size: u64,

    /// Optional link name
    pub name: Option<String>,
}

impl Link {
    pub fn new(cid: ContentId, size: u64) -> Self {
        Self {
            cid,
            size,
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Composite content unit
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DagNode {
    /// Inline data; the whole content when there are no links
    pub data: Option<Bytes>,

    /// Children in reconstruction order
    pub links: Vec<Link>,

    /// Tags in insertion order
    pub tags: Vec<Tag>,
}

/// Part of a link that intersects a requested byte range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSlice {
    /// Link to fetch
    pub link: Link,

    /// Bytes to skip at the start of the fetched piece
    pub offset: u64,

    /// Bytes to keep after `offset`
    pub len: u64,
}

impl LinkSlice {
    /// Whether the whole piece is kept
    pub fn is_full(&self) -> bool {
        self.offset == 0 && self.len == self.link.size
    }
}

impl DagNode {
    /// Node pointing at `links`
    pub fn from_links(links: Vec<Link>) -> Self {
        Self {
            data: None,
            links,
            tags: Vec::new(),
        }
    }

    /// Node carrying its content inline
    pub fn inline(data: impl Into<Bytes>) -> Self {
        Self {
            data: Some(data.into()),
            links: Vec::new(),
            tags: Vec::new(),
        }
    }

    pub fn with_tags(mut self, tags: Vec<Tag>) -> Self {
        self.tags = tags;
        self
    }

    /// Logical content size: sum of link sizes, or inline data length.
    ///
    /// Fails with [`DdcError::CorruptNode`] when the sizes overflow.
    pub fn total_size(&self) -> Result<u64> {
        if self.links.is_empty() {
            return Ok(self.data.as_ref().map_or(0, |d| d.len() as u64));
        }
        self.links.iter().try_fold(0u64, |total, link| {
            total
                .checked_add(link.size)
                .ok_or_else(|| DdcError::CorruptNode("link sizes overflow u64".to_string()))
        })
    }

    /// Reject links no chunker could have written
    pub fn check_links(&self) -> Result<()> {
        match self.links.iter().find(|l| l.size > MAX_PIECE_SIZE as u64) {
            Some(link) => Err(DdcError::CorruptNode(format!(
                "link {} claims {} bytes (max {})",
                link.cid, link.size, MAX_PIECE_SIZE
            ))),
            None => Ok(()),
        }
    }

    /// Canonical protobuf encoding
    pub fn encode(&self) -> Vec<u8> {
        to_proto(self).encode_to_vec()
    }

    /// Decode a node from its canonical encoding
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        from_proto(proto::Node::decode(bytes)?)
    }

    /// CID of the node
    pub fn cid(&self, builder: &CidBuilder) -> ContentId {
        builder.build(&self.encode())
    }

    /// Links intersecting `range`, with per-link trims.
    ///
    /// The end of the range is clamped to the node size. Zero-length links
    /// never intersect a range.
    pub fn slices_for_range(&self, range: Range<u64>) -> Result<Vec<LinkSlice>> {
        if range.start > range.end {
            return Err(DdcError::InvalidRange {
                start: range.start,
                end: range.end,
            });
        }

        let mut slices = Vec::new();
        if range.start == range.end {
            return Ok(slices);
        }
        let mut cursor = 0u64;

        for link in &self.links {
            let link_start = cursor;
            let link_end = cursor
                .checked_add(link.size)
                .ok_or_else(|| DdcError::CorruptNode("link sizes overflow u64".to_string()))?;
            cursor = link_end;

            if link_end <= range.start || link.size == 0 {
                continue;
            }
            if link_start >= range.end {
                break;
            }

            let offset = range.start.saturating_sub(link_start);
            let keep_end = range.end.min(link_end) - link_start;
            slices.push(LinkSlice {
                link: link.clone(),
                offset,
                len: keep_end - offset,
            });
        }

        Ok(slices)
    }
}

/// Wire representation
mod proto {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub(super) struct Node {
        #[prost(bytes = "vec", optional, tag = "1")]
        pub data: Option<Vec<u8>>,
        #[prost(message, repeated, tag = "2")]
        pub links: Vec<Link>,
        #[prost(message, repeated, tag = "3")]
        pub tags: Vec<Tag>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub(super) struct Link {
        #[prost(string, tag = "1")]
        pub cid: String,
        #[prost(uint64, tag = "2")]
        pub size: u64,
        #[prost(string, optional, tag = "3")]
        pub name: Option<String>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub(super) struct Tag {
        #[prost(string, tag = "1")]
        pub key: String,
        #[prost(string, tag = "2")]
        pub value: String,
    }
}

fn to_proto(node: &DagNode) -> proto::Node {
    proto::Node {
        data: node.data.as_ref().map(|d| d.to_vec()),
        links: node
            .links
            .iter()
            .map(|l| proto::Link {
                cid: l.cid.to_string(),
                size: l.size,
                name: l.name.clone(),
            })
            .collect(),
        tags: node
            .tags
            .iter()
            .map(|t| proto::Tag {
                key: t.key.clone(),
                value: t.value.clone(),
            })
            .collect(),
    }
}

fn from_proto(node: proto::Node) -> Result<DagNode> {
    let links = node
        .links
        .into_iter()
        .map(|l| {
            Ok(Link {
                cid: l.cid.parse()?,
                size: l.size,
                name: l.name,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(DagNode {
        data: node.data.map(Bytes::from),
        links,
        tags: node
            .tags
            .into_iter()
            .map(|t| Tag::new(t.key, t.value))
            .collect(),
    })
}
