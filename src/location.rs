// src/location.rs

//! Artifact locations for distributed (v2) metadata
//!
//! A [`Location`] says where an artifact lives and how to check it once
//! fetched. The reference is resolved once at construction into one of the
//! [`Reference`] schemes, so everything downstream matches on an enum
//! instead of re-inspecting URL prefixes.
//!
//! Wire form:
//!
//! ```json
//! {
//!     "checksum": "sha256:...",
//!     "local_path": "Server/x86_64/os/Packages/b/bash-5.2.15-3.fc39.x86_64.rpm",
//!     "size": 1234,
//!     "url": "https://cdn.example.com/Server/x86_64/os/Packages/b/bash-5.2.15-3.fc39.x86_64.rpm"
//! }
//! ```

use crate::error::{Error, Result};
use crate::hash::Checksum;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path};
use std::sync::LazyLock;

static OCI_REFERENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^oci://(?P<registry>[^/]+)/(?P<repository>[^:@]+)(:(?P<tag>[^@]+))?@(?P<digest>[a-z0-9]+:[0-9a-f]+)$",
    )
    .expect("valid OCI reference regex")
});

static LAYER_DIGEST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^sha256:[0-9a-f]+$").expect("valid layer digest regex"));

/// Components of an `oci://` reference
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OciReference {
    pub registry: String,
    /// Namespace and name, e.g. `fedora/bash`
    pub repository: String,
    pub tag: Option<String>,
    /// Content digest, always present (`sha256:...`)
    pub digest: String,
}

impl fmt::Display for OciReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "oci://{}/{}", self.registry, self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        write!(f, "@{}", self.digest)
    }
}

/// Where an artifact's bytes can be obtained
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Reference {
    /// Path relative to the compose root
    Relative(String),
    Http(String),
    Https(String),
    Oci(OciReference),
}

impl Reference {
    /// Parse and classify a reference string
    pub fn parse(s: &str) -> Result<Self> {
        if s.trim().is_empty() {
            return Err(Error::InvalidLocation("reference must not be blank".to_string()));
        }

        if s.starts_with("https://") {
            return Ok(Self::Https(s.to_string()));
        }
        if s.starts_with("http://") {
            return Ok(Self::Http(s.to_string()));
        }
        if s.starts_with("oci://") {
            let caps = OCI_REFERENCE_RE.captures(s).ok_or_else(|| {
                Error::InvalidLocation(format!(
                    "'{s}' is not a valid OCI reference (expected oci://registry/name[:tag]@algorithm:digest)"
                ))
            })?;
            return Ok(Self::Oci(OciReference {
                registry: caps["registry"].to_string(),
                repository: caps["repository"].to_string(),
                tag: caps.name("tag").map(|m| m.as_str().to_string()),
                digest: caps["digest"].to_string(),
            }));
        }
        if let Some((scheme, _)) = s.split_once("://") {
            return Err(Error::InvalidLocation(format!(
                "unsupported URL scheme '{scheme}' in '{s}'"
            )));
        }

        validate_relative_path(s, "reference")?;
        Ok(Self::Relative(s.to_string()))
    }

    pub fn is_remote(&self) -> bool {
        !matches!(self, Self::Relative(_))
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Relative(s) | Self::Http(s) | Self::Https(s) => f.write_str(s),
            Self::Oci(oci) => oci.fmt(f),
        }
    }
}

/// Non-blank, relative, and never climbing out of its root
pub(crate) fn validate_relative_path(path: &str, field: &str) -> Result<()> {
    if path.trim().is_empty() {
        return Err(Error::InvalidLocation(format!("{field} must not be blank")));
    }
    if path.starts_with('/') || Path::new(path).is_absolute() {
        return Err(Error::InvalidLocation(format!(
            "{field} must be a relative path, got '{path}'"
        )));
    }
    if Path::new(path).components().any(|c| c == Component::ParentDir) {
        return Err(Error::InvalidLocation(format!(
            "{field} must not contain '..', got '{path}'"
        )));
    }
    Ok(())
}

/// One file inside a bundle (multi-file OCI artifact)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "FileEntryRecord", into = "FileEntryRecord")]
pub struct FileEntry {
    file: String,
    size: u64,
    checksum: Checksum,
    layer_digest: String,
}

#[derive(Serialize, Deserialize)]
struct FileEntryRecord {
    file: String,
    size: serde_json::Number,
    checksum: Checksum,
    layer_digest: String,
}

impl FileEntry {
    pub fn new(file: &str, size: u64, checksum: Checksum, layer_digest: &str) -> Result<Self> {
        validate_relative_path(file, "file entry path")?;
        if !LAYER_DIGEST_RE.is_match(layer_digest) {
            return Err(Error::InvalidLocation(format!(
                "layer_digest '{layer_digest}' must be 'sha256:<hex>'"
            )));
        }
        Ok(Self {
            file: file.to_string(),
            size,
            checksum,
            layer_digest: layer_digest.to_string(),
        })
    }

    /// Path of the file relative to the bundle's local directory
    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn checksum(&self) -> &Checksum {
        &self.checksum
    }

    pub fn layer_digest(&self) -> &str {
        &self.layer_digest
    }

    /// Hex part of the layer digest (the blob name inside an image layout)
    pub fn layer_hex(&self) -> &str {
        self.layer_digest
            .split_once(':')
            .map_or(self.layer_digest.as_str(), |(_, hex)| hex)
    }
}

impl TryFrom<FileEntryRecord> for FileEntry {
    type Error = Error;

    fn try_from(r: FileEntryRecord) -> Result<Self> {
        let size = parse_size(&r.size)?;
        Self::new(&r.file, size, r.checksum, &r.layer_digest)
    }
}

impl From<FileEntry> for FileEntryRecord {
    fn from(e: FileEntry) -> Self {
        Self {
            file: e.file,
            size: e.size.into(),
            checksum: e.checksum,
            layer_digest: e.layer_digest,
        }
    }
}

fn parse_size(n: &serde_json::Number) -> Result<u64> {
    if let Some(v) = n.as_u64() {
        return Ok(v);
    }
    if n.as_i64().is_some() {
        return Err(Error::InvalidLocation(format!("size must not be negative, got {n}")));
    }
    Err(Error::InvalidLocation(format!("size must be an integer, got {n}")))
}

/// Where an artifact lives and how to verify it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "LocationRecord", into = "LocationRecord")]
pub struct Location {
    reference: Reference,
    size: Option<u64>,
    checksum: Option<Checksum>,
    local_path: Option<String>,
    contents: Vec<FileEntry>,
}

#[derive(Serialize, Deserialize)]
struct LocationRecord {
    url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    size: Option<serde_json::Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    checksum: Option<Checksum>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    local_path: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    contents: Vec<FileEntry>,
}

impl TryFrom<LocationRecord> for Location {
    type Error = Error;

    fn try_from(r: LocationRecord) -> Result<Self> {
        let size = r.size.as_ref().map(parse_size).transpose()?;
        Location::builder(&r.url)
            .size_opt(size)
            .checksum_opt(r.checksum)
            .local_path_opt(r.local_path)
            .contents(r.contents)
            .build()
    }
}

impl From<Location> for LocationRecord {
    fn from(l: Location) -> Self {
        Self {
            url: l.reference.to_string(),
            size: l.size.map(Into::into),
            checksum: l.checksum,
            local_path: l.local_path,
            contents: l.contents,
        }
    }
}

/// Builder for [`Location`]; all validation happens in [`build`](Self::build)
#[derive(Debug, Clone, Default)]
pub struct LocationBuilder {
    url: String,
    size: Option<u64>,
    checksum: Option<Checksum>,
    local_path: Option<String>,
    contents: Vec<FileEntry>,
}

impl LocationBuilder {
    pub fn size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn size_opt(mut self, size: Option<u64>) -> Self {
        self.size = size;
        self
    }

    pub fn checksum(mut self, checksum: Checksum) -> Self {
        self.checksum = Some(checksum);
        self
    }

    pub fn checksum_opt(mut self, checksum: Option<Checksum>) -> Self {
        self.checksum = checksum;
        self
    }

    pub fn local_path(mut self, path: impl Into<String>) -> Self {
        self.local_path = Some(path.into());
        self
    }

    pub fn local_path_opt(mut self, path: Option<String>) -> Self {
        self.local_path = path;
        self
    }

    pub fn contents(mut self, contents: Vec<FileEntry>) -> Self {
        self.contents = contents;
        self
    }

    pub fn build(self) -> Result<Location> {
        let reference = Reference::parse(&self.url)?;

        if let Some(local) = &self.local_path {
            validate_relative_path(local, "local_path")?;
        }
        if !self.contents.is_empty() && !matches!(reference, Reference::Oci(_)) {
            return Err(Error::InvalidLocation(format!(
                "contents are only allowed for OCI references, not '{}'",
                self.url
            )));
        }

        Ok(Location {
            reference,
            size: self.size,
            checksum: self.checksum,
            local_path: self.local_path,
            contents: self.contents,
        })
    }
}

impl Location {
    /// Start building a location for the given reference string
    pub fn builder(url: &str) -> LocationBuilder {
        LocationBuilder {
            url: url.to_string(),
            ..Default::default()
        }
    }

    /// Shorthand for a location with only a reference
    pub fn parse(url: &str) -> Result<Self> {
        Self::builder(url).build()
    }

    pub fn reference(&self) -> &Reference {
        &self.reference
    }

    /// The reference as it appears on the wire
    pub fn url(&self) -> String {
        self.reference.to_string()
    }

    pub fn size(&self) -> Option<u64> {
        self.size
    }

    pub fn checksum(&self) -> Option<&Checksum> {
        self.checksum.as_ref()
    }

    pub fn checksum_algorithm(&self) -> Option<&str> {
        self.checksum.as_ref().map(Checksum::algorithm_name)
    }

    pub fn checksum_value(&self) -> Option<&str> {
        self.checksum.as_ref().map(Checksum::digest)
    }

    pub fn local_path(&self) -> Option<&str> {
        self.local_path.as_deref()
    }

    pub fn contents(&self) -> &[FileEntry] {
        &self.contents
    }

    pub fn is_remote(&self) -> bool {
        self.reference.is_remote()
    }

    pub fn is_local(&self) -> bool {
        !self.is_remote()
    }

    pub fn is_http(&self) -> bool {
        matches!(self.reference, Reference::Http(_))
    }

    pub fn is_https(&self) -> bool {
        matches!(self.reference, Reference::Https(_))
    }

    pub fn is_oci(&self) -> bool {
        matches!(self.reference, Reference::Oci(_))
    }

    pub fn oci(&self) -> Option<&OciReference> {
        match &self.reference {
            Reference::Oci(oci) => Some(oci),
            _ => None,
        }
    }

    pub fn has_contents(&self) -> bool {
        !self.contents.is_empty()
    }

    /// Path to use when placing the artifact in a local layout
    ///
    /// The `local_path` hint wins; a relative reference is its own local
    /// path. Remote references without a hint have none.
    pub fn resolve_local_path(&self) -> Option<&str> {
        match (&self.local_path, &self.reference) {
            (Some(local), _) => Some(local.as_str()),
            (None, Reference::Relative(path)) => Some(path.as_str()),
            (None, _) => None,
        }
    }

    /// Rewrite the reference to `<base>/<local path>`, keeping the hint
    pub fn with_remote_url(&self, base_url: &str) -> Result<Self> {
        let local = self.resolve_local_path().ok_or_else(|| {
            Error::InvalidLocation(format!(
                "cannot rebase '{}' without a local_path",
                self.reference
            ))
        })?;
        let url = format!("{}/{}", base_url.trim_end_matches('/'), local);
        Self::builder(&url)
            .size_opt(self.size)
            .checksum_opt(self.checksum.clone())
            .local_path(local)
            .contents(self.contents.clone())
            .build()
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.reference.fmt(f)
    }
}
