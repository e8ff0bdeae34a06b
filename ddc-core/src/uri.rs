//! DDC URIs
//!
//! Canonical text form:
//!
//! ```text
//! /ddc[/org/<org>]/buc/<bucket>/<protocol>/<path...>[?<options>]
//! ```
//!
//! `ipiece` and `ifile` address content directly by CID (a single path
//! segment). `piece` and `file` address content by name; every remaining
//! segment belongs to the path and an empty trailing segment marks a
//! directory.

use crate::content_id::ContentId;
use crate::error::{DdcError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Fixed path prefix of every DDC URI
pub const URI_PREFIX: &str = "/ddc";

/// Bucket reference: numeric id or name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BucketId {
    Id(u64),
    Name(String),
}

impl BucketId {
    fn validate(&self) -> std::result::Result<(), String> {
        match self {
            BucketId::Id(_) => Ok(()),
            BucketId::Name(name) => {
                if name.is_empty() {
                    Err("bucket name is empty".to_string())
                } else if name.parse::<u64>().is_ok() {
                    // Would parse back as an id
                    Err(format!("bucket name '{}' is numeric; use a bucket id", name))
                } else if has_reserved_char(name) {
                    Err(format!("bucket name '{}' contains '/' or '?'", name))
                } else {
                    Ok(())
                }
            }
        }
    }
}

impl From<u64> for BucketId {
    fn from(id: u64) -> Self {
        BucketId::Id(id)
    }
}

impl From<&str> for BucketId {
    fn from(s: &str) -> Self {
        match s.parse::<u64>() {
            Ok(id) => BucketId::Id(id),
            Err(_) => BucketId::Name(s.to_string()),
        }
    }
}

impl fmt::Display for BucketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BucketId::Id(id) => write!(f, "{}", id),
            BucketId::Name(name) => f.write_str(name),
        }
    }
}

/// Addressing protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    /// Single piece by CID (`ipiece`)
    InlinePiece,
    /// File head node by CID (`ifile`)
    InlineFile,
    /// Piece by name (`piece`)
    Piece,
    /// File by name (`file`)
    File,
}

impl Protocol {
    /// Token used in the text form
    pub const fn token(self) -> &'static str {
        match self {
            Protocol::InlinePiece => "ipiece",
            Protocol::InlineFile => "ifile",
            Protocol::Piece => "piece",
            Protocol::File => "file",
        }
    }

    /// Whether the path is a bare CID
    pub const fn is_inline(self) -> bool {
        matches!(self, Protocol::InlinePiece | Protocol::InlineFile)
    }

    /// Whether the target is a file (head node) rather than a piece
    pub const fn is_file(self) -> bool {
        matches!(self, Protocol::InlineFile | Protocol::File)
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "ipiece" => Ok(Protocol::InlinePiece),
            "ifile" => Ok(Protocol::InlineFile),
            "piece" => Ok(Protocol::Piece),
            "file" => Ok(Protocol::File),
            other => Err(format!(
                "unknown protocol '{}' (expected ipiece, ifile, piece or file)",
                other
            )),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// URI path: a CID for inline protocols, named segments otherwise
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DdcPath {
    Cid(ContentId),
    Segments(Vec<String>),
}

/// Parsed DDC URI
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DdcUri {
    bucket: BucketId,
    protocol: Protocol,
    path: DdcPath,
    organization: Option<String>,
    options: Option<String>,
}

impl DdcUri {
    /// Create a URI, rejecting path shapes that do not fit the protocol
    pub fn new(bucket: impl Into<BucketId>, protocol: Protocol, path: DdcPath) -> Result<Self> {
        let uri = Self {
            bucket: bucket.into(),
            protocol,
            path,
            organization: None,
            options: None,
        };
        uri.validate()?;
        Ok(uri)
    }

    /// `ipiece` URI for a stored piece
    pub fn inline_piece(bucket: impl Into<BucketId>, cid: ContentId) -> Result<Self> {
        Self::new(bucket, Protocol::InlinePiece, DdcPath::Cid(cid))
    }

    /// `ifile` URI for a stored head node
    pub fn inline_file(bucket: impl Into<BucketId>, cid: ContentId) -> Result<Self> {
        Self::new(bucket, Protocol::InlineFile, DdcPath::Cid(cid))
    }

    /// `file` URI from a slash-separated name
    pub fn named_file(bucket: impl Into<BucketId>, name: &str) -> Result<Self> {
        Self::new(bucket, Protocol::File, DdcPath::Segments(split_name(name)))
    }

    /// `piece` URI from a slash-separated name
    pub fn named_piece(bucket: impl Into<BucketId>, name: &str) -> Result<Self> {
        Self::new(bucket, Protocol::Piece, DdcPath::Segments(split_name(name)))
    }

    /// Set the organization segment
    pub fn with_organization(mut self, organization: impl Into<String>) -> Result<Self> {
        self.organization = Some(organization.into());
        self.validate()?;
        Ok(self)
    }

    /// Set the query string (without the leading `?`)
    pub fn with_options(mut self, options: impl Into<String>) -> Self {
        self.options = Some(options.into());
        self
    }

    pub fn bucket(&self) -> &BucketId {
        &self.bucket
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn path(&self) -> &DdcPath {
        &self.path
    }

    pub fn organization(&self) -> Option<&str> {
        self.organization.as_deref()
    }

    pub fn options(&self) -> Option<&str> {
        self.options.as_deref()
    }

    /// CID for inline protocols
    pub fn cid(&self) -> Option<&ContentId> {
        match &self.path {
            DdcPath::Cid(cid) => Some(cid),
            DdcPath::Segments(_) => None,
        }
    }

    /// Slash-joined name for named protocols
    pub fn name(&self) -> Option<String> {
        match &self.path {
            DdcPath::Cid(_) => None,
            DdcPath::Segments(segments) => Some(segments.join("/")),
        }
    }

    /// Parse the text form
    pub fn parse(uri: &str) -> Result<Self> {
        let fail = |reason: String| DdcError::invalid_uri(uri, reason);

        let (body, options) = match uri.split_once('?') {
            Some((body, options)) => (body, Some(options.to_string())),
            None => (uri, None),
        };

        let rest = body
            .strip_prefix(URI_PREFIX)
            .ok_or_else(|| fail(format!("missing '{}' prefix", URI_PREFIX)))?;
        if rest.is_empty() {
            return Err(fail("missing bucket segment".to_string()));
        }
        let rest = rest
            .strip_prefix('/')
            .ok_or_else(|| fail(format!("missing '{}' prefix", URI_PREFIX)))?;

        let parts: Vec<&str> = rest.split('/').collect();
        let mut idx = 0;

        let organization = if parts.first() == Some(&"org") {
            let org = parts
                .get(1)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| fail("missing organization after 'org'".to_string()))?;
            idx = 2;
            Some(org.to_string())
        } else {
            None
        };

        if parts.get(idx) != Some(&"buc") {
            return Err(fail("missing bucket segment".to_string()));
        }
        let bucket = parts
            .get(idx + 1)
            .filter(|s| !s.is_empty())
            .map(|s| BucketId::from(*s))
            .ok_or_else(|| fail("missing bucket after 'buc'".to_string()))?;

        let protocol = parts
            .get(idx + 2)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| fail("missing protocol".to_string()))?
            .parse::<Protocol>()
            .map_err(fail)?;

        let path_parts = parts.get(idx + 3..).unwrap_or(&[]);
        let path = if protocol.is_inline() {
            match path_parts {
                [cid] if !cid.is_empty() => DdcPath::Cid(cid.parse().map_err(|e: DdcError| {
                    fail(format!("invalid CID for '{}': {}", protocol, e))
                })?),
                [] | [_] => return Err(fail(format!("missing CID for '{}'", protocol))),
                _ => {
                    return Err(fail(format!(
                        "'{}' takes a single CID, got {} path segments",
                        protocol,
                        path_parts.len()
                    )))
                }
            }
        } else {
            if path_parts.is_empty() {
                return Err(fail(format!("missing path for '{}'", protocol)));
            }
            DdcPath::Segments(path_parts.iter().map(|s| s.to_string()).collect())
        };

        let uri = Self {
            bucket,
            protocol,
            path,
            organization,
            options,
        };
        uri.validate().map_err(|e| match e {
            DdcError::InvalidUri { reason, .. } => fail(reason),
            other => other,
        })?;
        Ok(uri)
    }

    fn validate(&self) -> Result<()> {
        let fail = |reason: String| DdcError::invalid_uri(self.to_string(), reason);

        self.bucket.validate().map_err(fail)?;

        if let Some(org) = &self.organization {
            if org.is_empty() || has_reserved_char(org) {
                return Err(fail(format!("invalid organization '{}'", org)));
            }
        }

        match (&self.path, self.protocol.is_inline()) {
            (DdcPath::Cid(_), true) => Ok(()),
            (DdcPath::Segments(segments), false) => {
                if segments.is_empty() {
                    return Err(fail(format!("'{}' requires a path", self.protocol)));
                }
                if let Some(bad) = segments.iter().find(|s| has_reserved_char(s)) {
                    return Err(fail(format!("path segment '{}' contains '/' or '?'", bad)));
                }
                Ok(())
            }
            (DdcPath::Segments(_), true) => Err(fail(format!(
                "'{}' requires a CID path, got named segments",
                self.protocol
            ))),
            (DdcPath::Cid(_), false) => Err(fail(format!(
                "'{}' requires named path segments, got a CID",
                self.protocol
            ))),
        }
    }
}

impl fmt::Display for DdcUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(URI_PREFIX)?;
        if let Some(org) = &self.organization {
            write!(f, "/org/{}", org)?;
        }
        write!(f, "/buc/{}/{}/", self.bucket, self.protocol)?;
        match &self.path {
            DdcPath::Cid(cid) => write!(f, "{}", cid)?,
            DdcPath::Segments(segments) => f.write_str(&segments.join("/"))?,
        }
        if let Some(options) = &self.options {
            write!(f, "?{}", options)?;
        }
        Ok(())
    }
}

impl FromStr for DdcUri {
    type Err = DdcError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn has_reserved_char(s: &str) -> bool {
    s.contains('/') || s.contains('?')
}

fn split_name(name: &str) -> Vec<String> {
    name.trim_start_matches('/')
        .split('/')
        .map(str::to_string)
        .collect()
}
