// src/hash.rs

//! Self-describing checksums for artifact integrity
//!
//! Checksums travel in metadata as `"<algorithm>:<hexdigest>"` strings. The
//! format itself is open (any lowercase algorithm name is accepted when a
//! document is parsed) but only the algorithms in [`HashAlgorithm`] can be
//! recomputed. Verifying against any other algorithm fails with
//! [`Error::UnsupportedAlgorithm`] instead of passing silently.
//!
//! | Algorithm | Use |
//! |-----------|-----|
//! | SHA-256 | Default for everything written by this crate |
//! | SHA-512 | Accepted in legacy image checksum maps |
//! | MD5 | Legacy image checksum maps and implant checks |
//!
//! All computation streams through a fixed-size buffer, so memory use does
//! not depend on the artifact size.

use crate::error::{Error, Result};
use crate::location::Location;
use md5::Md5;
use sha1::Sha1;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;
use std::sync::LazyLock;
use tracing::debug;

/// Buffer size for streaming hash computation (64 KB)
pub(crate) const STREAM_BUFFER_SIZE: usize = 64 * 1024;

static CHECKSUM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<algorithm>[a-z0-9]+):(?P<digest>[0-9a-f]+)$").expect("valid checksum regex")
});

/// Hash algorithms this crate can compute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HashAlgorithm {
    /// SHA-256, the default for all new metadata
    #[default]
    Sha256,
    /// SHA-512
    Sha512,
    /// SHA-1 (accepted in existing metadata, never chosen for new records)
    Sha1,
    /// MD5 (legacy checksum maps only)
    Md5,
}

impl HashAlgorithm {
    /// Get the hash output length in bytes
    #[inline]
    pub const fn output_len(&self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Sha512 => 64,
            Self::Sha1 => 20,
            Self::Md5 => 16,
        }
    }

    /// Get the hash output length as a hex string
    #[inline]
    pub const fn hex_len(&self) -> usize {
        self.output_len() * 2
    }

    /// Get the algorithm name as it appears in checksum strings
    #[inline]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
            Self::Sha1 => "sha1",
            Self::Md5 => "md5",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(Self::Sha256),
            "sha512" | "sha-512" => Ok(Self::Sha512),
            "sha1" | "sha-1" => Ok(Self::Sha1),
            "md5" => Ok(Self::Md5),
            _ => Err(Error::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

/// A checksum in `"<algorithm>:<hexdigest>"` form
///
/// Parsing only checks the shape of the string; whether the algorithm can
/// actually be recomputed is decided at verification time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Checksum {
    algorithm: String,
    digest: String,
}

impl Checksum {
    /// Parse a checksum string, rejecting anything not matching `^[a-z0-9]+:[0-9a-f]+$`
    pub fn parse(s: &str) -> Result<Self> {
        let caps = CHECKSUM_RE.captures(s).ok_or_else(|| {
            Error::InvalidChecksum(format!(
                "'{s}' is not in 'algorithm:hexdigest' format"
            ))
        })?;
        Ok(Self {
            algorithm: caps["algorithm"].to_string(),
            digest: caps["digest"].to_string(),
        })
    }

    /// Build a checksum from a known algorithm and a hex digest of any case
    pub fn from_parts(algorithm: HashAlgorithm, digest: &str) -> Result<Self> {
        Self::parse(&format!("{}:{}", algorithm.name(), digest.to_lowercase()))
    }

    /// The algorithm prefix as written
    pub fn algorithm_name(&self) -> &str {
        &self.algorithm
    }

    /// The hex digest
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Resolve the prefix to a computable algorithm
    pub fn algorithm(&self) -> Result<HashAlgorithm> {
        self.algorithm.parse()
    }

    /// Compare two checksums (algorithm must match, hex is case-insensitive)
    pub fn matches(&self, other: &Checksum) -> bool {
        self.algorithm == other.algorithm && self.digest.eq_ignore_ascii_case(&other.digest)
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.digest)
    }
}

impl FromStr for Checksum {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Checksum {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<Checksum> for String {
    fn from(c: Checksum) -> Self {
        c.to_string()
    }
}

/// Incremental hasher for any supported algorithm
///
/// Also counts the bytes it has seen, so a single pass yields both the
/// checksum and the size of an artifact.
pub struct Hasher {
    algorithm: HashAlgorithm,
    state: HasherState,
    len: u64,
}

enum HasherState {
    Sha256(Sha256),
    Sha512(Sha512),
    Sha1(Sha1),
    Md5(Md5),
}

impl Hasher {
    /// Create a new hasher with the specified algorithm
    pub fn new(algorithm: HashAlgorithm) -> Self {
        let state = match algorithm {
            HashAlgorithm::Sha256 => HasherState::Sha256(Sha256::new()),
            HashAlgorithm::Sha512 => HasherState::Sha512(Sha512::new()),
            HashAlgorithm::Sha1 => HasherState::Sha1(Sha1::new()),
            HashAlgorithm::Md5 => HasherState::Md5(Md5::new()),
        };
        Self {
            algorithm,
            state,
            len: 0,
        }
    }

    /// Update the hasher with more data
    pub fn update(&mut self, data: &[u8]) {
        match &mut self.state {
            HasherState::Sha256(h) => h.update(data),
            HasherState::Sha512(h) => h.update(data),
            HasherState::Sha1(h) => h.update(data),
            HasherState::Md5(h) => h.update(data),
        }
        self.len += data.len() as u64;
    }

    /// Number of bytes hashed so far
    #[inline]
    pub fn len(&self) -> u64 {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Get the algorithm being used
    #[inline]
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Finalize and return the checksum
    pub fn finalize(self) -> Checksum {
        let digest = match self.state {
            HasherState::Sha256(h) => hex::encode(h.finalize()),
            HasherState::Sha512(h) => hex::encode(h.finalize()),
            HasherState::Sha1(h) => hex::encode(h.finalize()),
            HasherState::Md5(h) => hex::encode(h.finalize()),
        };
        Checksum {
            algorithm: self.algorithm.name().to_string(),
            digest,
        }
    }
}

/// Compute the checksum of a byte slice
pub fn hash_bytes(algorithm: HashAlgorithm, data: &[u8]) -> Checksum {
    let mut hasher = Hasher::new(algorithm);
    hasher.update(data);
    hasher.finalize()
}

/// Compute the checksum and length of everything a reader yields
pub fn hash_reader<R: Read>(algorithm: HashAlgorithm, reader: &mut R) -> io::Result<(Checksum, u64)> {
    let mut hasher = Hasher::new(algorithm);
    let mut buffer = vec![0u8; STREAM_BUFFER_SIZE];

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    let len = hasher.len();
    Ok((hasher.finalize(), len))
}

/// Compute the default (SHA-256) checksum of a byte stream
pub fn compute<R: Read>(reader: &mut R) -> io::Result<Checksum> {
    hash_reader(HashAlgorithm::Sha256, reader).map(|(c, _)| c)
}

/// Compute SHA-256 checksum and size of a file
pub fn compute_file(path: &Path) -> Result<(Checksum, u64)> {
    let mut file = File::open(path)
        .map_err(|e| Error::IoError(format!("Failed to open {}: {e}", path.display())))?;
    let result = hash_reader(HashAlgorithm::Sha256, &mut file)
        .map_err(|e| Error::IoError(format!("Failed to read {}: {e}", path.display())))?;
    debug!("Computed {} for {}", result.0, path.display());
    Ok(result)
}

/// Compute several checksums of a file in one pass, plus its size
pub fn compute_file_with(path: &Path, algorithms: &[HashAlgorithm]) -> Result<(Vec<Checksum>, u64)> {
    let mut file = File::open(path)
        .map_err(|e| Error::IoError(format!("Failed to open {}: {e}", path.display())))?;
    let mut hashers: Vec<Hasher> = algorithms.iter().map(|a| Hasher::new(*a)).collect();
    let mut buffer = vec![0u8; STREAM_BUFFER_SIZE];
    let mut len = 0u64;

    loop {
        let n = file
            .read(&mut buffer)
            .map_err(|e| Error::IoError(format!("Failed to read {}: {e}", path.display())))?;
        if n == 0 {
            break;
        }
        for hasher in &mut hashers {
            hasher.update(&buffer[..n]);
        }
        len += n as u64;
    }

    Ok((hashers.into_iter().map(Hasher::finalize).collect(), len))
}

/// Recompute a stream's checksum with `expected`'s algorithm and compare
pub fn verify<R: Read>(expected: &Checksum, reader: &mut R) -> Result<bool> {
    let algorithm = expected.algorithm()?;
    let (actual, _) = hash_reader(algorithm, reader)?;
    Ok(expected.matches(&actual))
}

/// Like [`verify`] but returns [`Error::ChecksumMismatch`] on a mismatch
pub fn ensure<R: Read>(expected: &Checksum, reader: &mut R) -> Result<()> {
    let algorithm = expected.algorithm()?;
    let (actual, _) = hash_reader(algorithm, reader)?;
    if expected.matches(&actual) {
        Ok(())
    } else {
        Err(Error::ChecksumMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        })
    }
}

/// Verify a stream against a location's declared checksum
///
/// A location without a checksum has nothing to compare and passes.
pub fn verify_location<R: Read>(location: &Location, reader: &mut R) -> Result<bool> {
    match location.checksum() {
        Some(expected) => verify(expected, reader),
        None => {
            debug!("No checksum recorded for {}, skipping verification", location.reference());
            Ok(true)
        }
    }
}

/// Verify a file on disk against an expected checksum
pub fn verify_file(expected: &Checksum, path: &Path) -> Result<bool> {
    let mut file = File::open(path)
        .map_err(|e| Error::IoError(format!("Failed to open {}: {e}", path.display())))?;
    verify(expected, &mut file)
}
