// src/version.rs

//! Schema version detection and negotiation
//!
//! Every document starts with a header:
//!
//! ```json
//! {"header": {"type": "productmd.rpms", "version": "2.0"}, ...}
//! ```
//!
//! Only the header is inspected here. Major versions are not wire
//! compatible with each other (v1 stores plain path strings, v2 stores
//! location objects); minor versions of the same major only add fields.
//! Known wire revisions are listed in [`WireRevision`]; a document with an
//! unknown minor of a known major is read as the newest revision of that
//! major.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// A `<major>.<minor>` schema version as declared in a header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SchemaVersion {
    pub major: u32,
    pub minor: u32,
}

impl SchemaVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Legacy local-path format
    pub fn is_v1(&self) -> bool {
        self.major == 1
    }

    /// Distributed location format
    pub fn is_v2(&self) -> bool {
        self.major == 2
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for SchemaVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let malformed = || Error::MalformedHeader(format!("version '{s}' is not '<int>.<int>'"));
        let (major, minor) = s.split_once('.').ok_or_else(malformed)?;
        let digits = |p: &str| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit());
        if !digits(major) || !digits(minor) {
            return Err(malformed());
        }
        Ok(Self {
            major: major.parse().map_err(|_| malformed())?,
            minor: minor.parse().map_err(|_| malformed())?,
        })
    }
}

impl Serialize for SchemaVersion {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SchemaVersion {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Wire revisions this crate reads and writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WireRevision {
    /// Initial format
    V1_0,
    /// Adds `subvariant` to images
    V1_1,
    /// Last legacy revision
    V1_2,
    /// Distributed locations
    V2_0,
}

impl WireRevision {
    pub const ALL: [WireRevision; 4] = [Self::V1_0, Self::V1_1, Self::V1_2, Self::V2_0];

    /// Revision written by default
    pub const LATEST: WireRevision = Self::V2_0;

    /// Newest legacy revision, used when downgrading
    pub const LATEST_V1: WireRevision = Self::V1_2;

    pub const fn version(&self) -> SchemaVersion {
        match self {
            Self::V1_0 => SchemaVersion::new(1, 0),
            Self::V1_1 => SchemaVersion::new(1, 1),
            Self::V1_2 => SchemaVersion::new(1, 2),
            Self::V2_0 => SchemaVersion::new(2, 0),
        }
    }

    /// The adjacent newer revision, if any
    pub const fn next(&self) -> Option<WireRevision> {
        match self {
            Self::V1_0 => Some(Self::V1_1),
            Self::V1_1 => Some(Self::V1_2),
            Self::V1_2 => Some(Self::V2_0),
            Self::V2_0 => None,
        }
    }

    /// Map a declared version onto a known revision
    pub fn resolve(version: SchemaVersion) -> Result<Self> {
        if let Some(rev) = Self::ALL.iter().find(|r| r.version() == version) {
            return Ok(*rev);
        }
        let newest = Self::ALL
            .iter()
            .filter(|r| r.version().major == version.major)
            .max()
            .copied()
            .ok_or_else(|| Error::UnsupportedVersion(version.to_string()))?;
        if version < newest.version() {
            return Err(Error::UnsupportedVersion(version.to_string()));
        }
        debug!(
            "Unknown minor version {}, reading as {}",
            version,
            newest.version()
        );
        Ok(newest)
    }

    pub fn is_v1(&self) -> bool {
        self.version().is_v1()
    }

    pub fn is_v2(&self) -> bool {
        self.version().is_v2()
    }
}

impl fmt::Display for WireRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.version().fmt(f)
    }
}

/// Kinds of metadata documents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DocumentKind {
    ComposeInfo,
    Rpms,
    Images,
    ExtraFiles,
}

impl DocumentKind {
    pub const ALL: [DocumentKind; 4] =
        [Self::ComposeInfo, Self::Rpms, Self::Images, Self::ExtraFiles];

    /// Literal written to `header.type`
    pub const fn type_tag(&self) -> &'static str {
        match self {
            Self::ComposeInfo => "productmd.composeinfo",
            Self::Rpms => "productmd.rpms",
            Self::Images => "productmd.images",
            Self::ExtraFiles => "productmd.extra_files",
        }
    }

    /// Top-level payload key holding the artifacts
    pub const fn payload_key(&self) -> &'static str {
        match self {
            Self::ComposeInfo => "variants",
            Self::Rpms => "rpms",
            Self::Images => "images",
            Self::ExtraFiles => "extra_files",
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_tag())
    }
}

impl FromStr for DocumentKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.type_tag() == s)
            .ok_or_else(|| Error::UnknownDocumentType {
                expected: Self::ALL.map(|k| k.type_tag()).join("|"),
                found: s.to_string(),
            })
    }
}

/// Decoded document header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub kind: DocumentKind,
    pub version: SchemaVersion,
}

impl Header {
    pub fn new(kind: DocumentKind, revision: WireRevision) -> Self {
        Self {
            kind,
            version: revision.version(),
        }
    }

    /// Known revision for the declared version
    pub fn revision(&self) -> Result<WireRevision> {
        WireRevision::resolve(self.version)
    }

    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "type": self.kind.type_tag(),
            "version": self.version.to_string(),
        })
    }
}

fn header_field<'a>(raw: &'a Value, field: &str) -> Result<&'a str> {
    let header = raw
        .get("header")
        .and_then(Value::as_object)
        .ok_or_else(|| Error::MalformedHeader("missing 'header' object".to_string()))?;
    header
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::MalformedHeader(format!("missing or non-string 'header.{field}'")))
}

/// Read the declared schema version from a raw document
pub fn detect(raw: &Value) -> Result<SchemaVersion> {
    header_field(raw, "version")?.parse()
}

/// Read both the declared kind and version
pub fn detect_header(raw: &Value) -> Result<Header> {
    let version = detect(raw)?;
    let kind = header_field(raw, "type")?.parse()?;
    Ok(Header { kind, version })
}

/// Read the version of a document that must be of `expected` kind
pub fn detect_for(raw: &Value, expected: DocumentKind) -> Result<SchemaVersion> {
    let version = detect(raw)?;
    let found = header_field(raw, "type")?;
    if found != expected.type_tag() {
        return Err(Error::UnknownDocumentType {
            expected: expected.type_tag().to_string(),
            found: found.to_string(),
        });
    }
    Ok(version)
}

pub fn is_v1(raw: &Value) -> Result<bool> {
    detect(raw).map(|v| v.is_v1())
}

pub fn is_v2(raw: &Value) -> Result<bool> {
    detect(raw).map(|v| v.is_v2())
}
