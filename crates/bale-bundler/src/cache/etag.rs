//! Content-addressed cache keys.
//!
//! An etag is a BLAKE3 digest over a module's source hash and the options
//! that influence how it builds. Any change to either yields a new etag, so
//! stale entries are never looked up again.

use std::fmt;

use bale_graph::ContentHash;
use blake3::Hasher;
use serde::{Deserialize, Serialize};

/// Bumped whenever the layout of hashed inputs changes.
const ETAG_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Etag(String);

impl Etag {
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_hex(&self) -> &str {
        &self.0
    }

    pub fn builder() -> EtagBuilder {
        EtagBuilder::new()
    }

    /// Etag of a module given its source hash and the build options etag.
    pub fn for_module(content_hash: &ContentHash, options: &Etag) -> Self {
        Self::builder()
            .bytes(content_hash)
            .str(options.as_hex())
            .finish()
    }

    /// Combine etags without regard to their order. Equal multisets give equal
    /// results.
    pub fn combine<'a>(parts: impl IntoIterator<Item = &'a Etag>) -> Self {
        let mut hexes: Vec<&str> = parts.into_iter().map(Etag::as_hex).collect();
        hexes.sort_unstable();
        hexes
            .into_iter()
            .fold(Self::builder().u64(0xC0), |b, hex| b.str(hex))
            .finish()
    }
}

impl fmt::Display for Etag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Length-prefixed BLAKE3 input builder. Prefixing keeps `("ab", "c")` and
/// `("a", "bc")` apart.
#[derive(Debug, Clone)]
pub struct EtagBuilder {
    hasher: Hasher,
}

impl EtagBuilder {
    fn new() -> Self {
        let mut hasher = Hasher::new();
        hasher.update(&ETAG_FORMAT_VERSION.to_le_bytes());
        Self { hasher }
    }

    pub fn bytes(mut self, bytes: &[u8]) -> Self {
        self.hasher.update(&(bytes.len() as u64).to_le_bytes());
        self.hasher.update(bytes);
        self
    }

    pub fn str(self, value: &str) -> Self {
        self.bytes(value.as_bytes())
    }

    pub fn u64(mut self, value: u64) -> Self {
        self.hasher.update(&value.to_le_bytes());
        self
    }

    pub fn finish(self) -> Etag {
        Etag(self.hasher.finalize().to_hex().to_string())
    }
}

/// Etag of everything besides the source that affects a module build.
pub fn build_options_etag(cache_version: &str, factory_fingerprint: &str) -> Etag {
    Etag::builder()
        .str(env!("CARGO_PKG_VERSION"))
        .str(cache_version)
        .str(factory_fingerprint)
        .finish()
}
