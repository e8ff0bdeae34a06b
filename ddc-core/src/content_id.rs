//! Content identifiers
//!
//! Every piece and DAG node is addressed by a CID computed from its bytes.
//! The default scheme is the one the DDC network speaks:
//!
//! `multibase(base32-lower, <cidv1> <raw codec> <sha2-256 multihash>)`
//!
//! Example: `bafkreifzjut3te2nhyekklss27nh3k72ysco7y32koao5eei66wof36n5e`

use crate::error::{DdcError, Result};
use cid::multibase::Base;
use cid::Cid;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// CID version byte
pub const CID_VERSION: u8 = 0x01;

/// Multicodec for raw binary content
pub const RAW_CODEC: u64 = 0x55;

/// Digest length produced by every supported algorithm
pub const DIGEST_SIZE: usize = 32;

/// Hash function used inside the CID multihash.
///
/// `Sha2_256` is the network default. `Blake3` is only used when a caller
/// opts in explicitly; CIDs produced with it are not interchangeable with
/// SHA-256 ones even for identical content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HashAlgorithm {
    #[default]
    Sha2_256,
    Blake3,
}

impl HashAlgorithm {
    /// Multihash code of the algorithm
    pub const fn code(self) -> u64 {
        match self {
            HashAlgorithm::Sha2_256 => 0x12,
            HashAlgorithm::Blake3 => 0x1e,
        }
    }

    /// Look up an algorithm by multihash code
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0x12 => Some(HashAlgorithm::Sha2_256),
            0x1e => Some(HashAlgorithm::Blake3),
            _ => None,
        }
    }

    /// Compute the 32-byte digest of `data`
    pub fn digest(self, data: &[u8]) -> [u8; DIGEST_SIZE] {
        match self {
            HashAlgorithm::Sha2_256 => {
                let digest = ring::digest::digest(&ring::digest::SHA256, data);
                let mut out = [0u8; DIGEST_SIZE];
                out.copy_from_slice(digest.as_ref());
                out
            }
            HashAlgorithm::Blake3 => *blake3::hash(data).as_bytes(),
        }
    }
}

/// Builds CIDs from raw bytes.
///
/// Pure and deterministic: the identifier depends on the bytes only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CidBuilder {
    algorithm: HashAlgorithm,
}

impl CidBuilder {
    /// Builder using the network default (sha2-256)
    pub const fn new() -> Self {
        Self {
            algorithm: HashAlgorithm::Sha2_256,
        }
    }

    /// Builder using an explicit hash algorithm
    pub const fn with_algorithm(algorithm: HashAlgorithm) -> Self {
        Self { algorithm }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Compute the CID of `data`
    pub fn build(&self, data: &[u8]) -> ContentId {
        let digest = self.algorithm.digest(data);

        // All codes and the digest length are below 0x80, so every varint
        // in the frame is a single byte.
        let mut frame = Vec::with_capacity(4 + DIGEST_SIZE);
        frame.push(CID_VERSION);
        frame.push(RAW_CODEC as u8);
        frame.push(self.algorithm.code() as u8);
        frame.push(DIGEST_SIZE as u8);
        frame.extend_from_slice(&digest);

        ContentId(cid::multibase::encode(Base::Base32Lower, frame))
    }
}

/// Validated, encoded content identifier
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentId(String);

impl ContentId {
    /// Compute the CID of `data` with the default builder
    pub fn from_data(data: &[u8]) -> Self {
        CidBuilder::new().build(data)
    }

    /// Get the encoded form
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hash algorithm recorded in the multihash, if supported
    pub fn algorithm(&self) -> Option<HashAlgorithm> {
        let cid = Cid::try_from(self.0.as_str()).ok()?;
        HashAlgorithm::from_code(cid.hash().code())
    }

    /// Verify that `data` hashes to this identifier
    pub fn verify(&self, data: &[u8]) -> bool {
        let Ok(cid) = Cid::try_from(self.0.as_str()) else {
            return false;
        };
        match HashAlgorithm::from_code(cid.hash().code()) {
            Some(algorithm) => cid.hash().digest() == algorithm.digest(data).as_slice(),
            None => false,
        }
    }
}

impl FromStr for ContentId {
    type Err = DdcError;

    fn from_str(s: &str) -> Result<Self> {
        Cid::try_from(s).map_err(|e| DdcError::InvalidCid {
            cid: s.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for ContentId {
    type Error = DdcError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<ContentId> for String {
    fn from(id: ContentId) -> Self {
        id.0
    }
}

impl AsRef<str> for ContentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = self.0.get(..16).unwrap_or(&self.0);
        write!(f, "ContentId({})", short)
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
