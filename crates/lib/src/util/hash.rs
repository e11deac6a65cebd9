//! Content hashing for artifacts and integrity records.
//!
//! This module provides:
//! - `ContentHash`: a full 64-character SHA-256 digest in lowercase hex
//! - `hash_file()`: streaming hash of a file's full byte content
//! - `hash_bytes()`: hash of an in-memory buffer

use std::fs;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Width of a hex-encoded SHA-256 digest.
pub const HASH_HEX_LEN: usize = 64;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// A full SHA-256 hash used to attest artifact content.
///
/// # Format
///
/// The hash is a lowercase hexadecimal string (64 characters). Parsing
/// accepts uppercase digits and normalises them. The only ways to obtain one
/// are hashing content or parsing, so every value is well-formed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
  fn from_digest(digest: &[u8]) -> Self {
    ContentHash(hex::encode(digest))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// Short form for log lines and working-copy prefixes.
  pub fn short(&self) -> &str {
    self.0.get(..12).unwrap_or(&self.0)
  }
}

impl TryFrom<String> for ContentHash {
  type Error = InvalidDigest;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    value.parse()
  }
}

impl From<ContentHash> for String {
  fn from(hash: ContentHash) -> Self {
    hash.0
  }
}

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// A token that is not a well-formed SHA-256 hex digest.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("expected {HASH_HEX_LEN} hex digits, got {token:?}")]
pub struct InvalidDigest {
  pub token: String,
}

impl FromStr for ContentHash {
  type Err = InvalidDigest;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let invalid = || InvalidDigest { token: s.to_string() };
    if s.len() != HASH_HEX_LEN {
      return Err(invalid());
    }
    hex::decode(s).map_err(|_| invalid())?;
    Ok(ContentHash(s.to_ascii_lowercase()))
  }
}

/// Hash a file's contents.
///
/// Reads the file in fixed-size chunks so arbitrarily large artifacts never
/// need to fit in memory.
pub fn hash_file(path: &Path) -> std::io::Result<ContentHash> {
  let mut file = fs::File::open(path)?;

  let mut hasher = Sha256::new();
  let mut buffer = vec![0u8; READ_BUFFER_SIZE];

  loop {
    let bytes_read = file.read(&mut buffer)?;
    if bytes_read == 0 {
      break;
    }
    hasher.update(&buffer[..bytes_read]);
  }

  Ok(ContentHash::from_digest(&hasher.finalize()))
}

/// Hash arbitrary bytes.
pub fn hash_bytes(data: &[u8]) -> ContentHash {
  ContentHash::from_digest(&Sha256::digest(data))
}
