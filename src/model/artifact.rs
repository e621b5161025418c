// src/model/artifact.rs

//! File-bearing entries of a metadata document
//!
//! Three artifact kinds are filed under variant/arch: RPM packages, images
//! and extra files. Each carries an [`ArtifactPath`], resolved once when the
//! document is read: a plain local path for legacy documents, a
//! [`Location`] for distributed ones.

use crate::error::{Error, Result};
use crate::hash::{Checksum, HashAlgorithm};
use crate::location::Location;
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

static NEVRA_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(.*/)?(?P<name>.*)-((?P<epoch>\d+):)?(?P<version>.*)-(?P<release>.*)\.(?P<arch>.*)$",
    )
    .expect("valid NEVRA regex")
});

/// Image types accepted by validation
pub const SUPPORTED_IMAGE_TYPES: &[&str] = &[
    "boot",
    "cd",
    "docker",
    "dvd",
    "ec2",
    "kvm",
    "live",
    "netinst",
    "p2v",
    "qcow2",
    "raw-xz",
    "rescue",
    "vagrant-libvirt",
    "vagrant-virtualbox",
];

/// Image formats accepted by validation (these match file suffixes)
pub const SUPPORTED_IMAGE_FORMATS: &[&str] = &[
    "iso",
    "qcow",
    "qcow2",
    "raw",
    "raw.xz",
    "rhevm.ova",
    "sda.raw",
    "tar.gz",
    "tar.xz",
    "vagrant-libvirt.box",
    "vagrant-virtualbox.box",
    "vdi",
    "vmdk",
    "vmx",
    "vsphere.ova",
];

/// Where an artifact's bytes are, resolved once at parse time
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactPath {
    /// Legacy relative path under the compose root
    Local(String),
    /// Distributed location
    Distributed(Location),
}

impl ArtifactPath {
    /// Local layout path, if one is known
    pub fn local_path(&self) -> Option<&str> {
        match self {
            Self::Local(p) => Some(p),
            Self::Distributed(loc) => loc.resolve_local_path(),
        }
    }

    pub fn location(&self) -> Option<&Location> {
        match self {
            Self::Local(_) => None,
            Self::Distributed(loc) => Some(loc),
        }
    }

    pub fn is_remote(&self) -> bool {
        self.location().is_some_and(Location::is_remote)
    }

    /// Local path, or the reference for hint-less remote locations
    pub fn display_path(&self) -> String {
        match self.local_path() {
            Some(p) => p.to_string(),
            None => self.to_string(),
        }
    }

    /// Project onto a v2 location (a local path becomes a relative reference)
    pub fn to_location(&self, size: Option<u64>, checksum: Option<Checksum>) -> Result<Location> {
        match self {
            Self::Local(p) => Location::builder(p)
                .local_path(p.as_str())
                .size_opt(size)
                .checksum_opt(checksum)
                .build(),
            Self::Distributed(loc) => Ok(loc.clone()),
        }
    }
}

impl fmt::Display for ArtifactPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(p) => f.write_str(p),
            Self::Distributed(loc) => loc.fmt(f),
        }
    }
}

/// Parsed `name-epoch:version-release.arch`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Nevra {
    pub name: String,
    pub epoch: Option<u64>,
    pub version: String,
    pub release: String,
    pub arch: String,
}

impl Nevra {
    /// Parse a NEVRA (or NVRA); a leading directory and `.rpm` suffix are ignored
    pub fn parse(s: &str) -> Result<Self> {
        let trimmed = s.strip_suffix(".rpm").unwrap_or(s);
        let caps = NEVRA_RE
            .captures(trimmed)
            .ok_or_else(|| Error::ParseError(format!("invalid N-E:V-R.A '{s}'")))?;
        let part = |name: &str| caps.name(name).map_or("", |m| m.as_str()).to_string();

        let nevra = Self {
            name: part("name"),
            epoch: caps
                .name("epoch")
                .map(|m| m.as_str().parse())
                .transpose()
                .map_err(|_| Error::ParseError(format!("epoch out of range in '{s}'")))?,
            version: part("version"),
            release: part("release"),
            arch: part("arch"),
        };
        if nevra.name.is_empty() || nevra.version.is_empty() || nevra.release.is_empty() || nevra.arch.is_empty() {
            return Err(Error::ParseError(format!("invalid N-E:V-R.A '{s}'")));
        }
        Ok(nevra)
    }

    /// Parse a NEVRA that must spell out its epoch, normalizing it
    pub fn parse_strict(s: &str) -> Result<Self> {
        if !s.contains(':') {
            return Err(Error::ParseError(format!("missing epoch in N-E:V-R.A '{s}'")));
        }
        Self::parse(s)
    }

    pub fn is_source(&self) -> bool {
        matches!(self.arch.as_str(), "src" | "nosrc")
    }
}

impl fmt::Display for Nevra {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}:{}-{}.{}",
            self.name,
            self.epoch.unwrap_or(0),
            self.version,
            self.release,
            self.arch
        )
    }
}

impl FromStr for Nevra {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// RPM category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RpmCategory {
    Binary,
    Debug,
    Source,
}

impl RpmCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Binary => "binary",
            Self::Debug => "debug",
            Self::Source => "source",
        }
    }
}

impl fmt::Display for RpmCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RpmCategory {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "binary" => Ok(Self::Binary),
            "debug" => Ok(Self::Debug),
            "source" => Ok(Self::Source),
            _ => Err(Error::ParseError(format!("invalid RPM category '{s}'"))),
        }
    }
}

/// One RPM package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpmEntry {
    pub nevra: Nevra,
    /// Source package; `None` for source packages themselves
    pub srpm_nevra: Option<Nevra>,
    pub sigkey: Option<String>,
    pub category: RpmCategory,
    pub path: ArtifactPath,
}

impl RpmEntry {
    /// Build an entry enforcing the package rules: epoch spelled out,
    /// category agreeing with arch, srpm present exactly for non-source
    /// packages. The sigkey is lowercased.
    pub fn new(
        nevra: &str,
        srpm_nevra: Option<&str>,
        sigkey: Option<&str>,
        category: RpmCategory,
        path: ArtifactPath,
    ) -> Result<Self> {
        let nevra = Nevra::parse_strict(nevra)?;
        let srpm_nevra = srpm_nevra.map(Nevra::parse_strict).transpose()?;

        if category == RpmCategory::Source && srpm_nevra.is_some() {
            return Err(Error::ParseError(format!(
                "source package {nevra} must not name a source RPM"
            )));
        }
        if category != RpmCategory::Source && srpm_nevra.is_none() {
            return Err(Error::ParseError(format!("missing srpm_nevra for package {nevra}")));
        }
        if (category == RpmCategory::Source) != nevra.is_source() {
            return Err(Error::ParseError(format!(
                "invalid category/arch combination: {category}/{nevra}"
            )));
        }

        Ok(Self {
            nevra,
            srpm_nevra,
            sigkey: sigkey.map(str::to_lowercase),
            category,
            path,
        })
    }

    /// Key the package is grouped under on the wire
    pub fn srpm_key(&self) -> String {
        self.srpm_nevra.as_ref().unwrap_or(&self.nevra).to_string()
    }
}

/// One image (ISO, disk image, container tarball, ...)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageEntry {
    pub path: ArtifactPath,
    pub mtime: i64,
    pub size: Option<u64>,
    pub volume_id: Option<String>,
    pub image_type: String,
    pub format: String,
    pub arch: String,
    pub disc_number: u32,
    pub disc_count: u32,
    /// Legacy checksum map (algorithm to hex digest)
    pub checksums: BTreeMap<String, String>,
    pub implant_md5: Option<String>,
    pub bootable: bool,
    pub subvariant: String,
}

/// A loose file shipped with a variant (GPL, EULA, ...)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtraFileEntry {
    pub path: ArtifactPath,
    pub size: Option<u64>,
    pub checksums: BTreeMap<String, String>,
}

/// What an artifact is, as seen by URL mappers and error reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Rpm,
    Image,
    ExtraFile,
    /// Directory entry of a variant path set (tree, repository, ...)
    VariantPath,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rpm => "rpm",
            Self::Image => "image",
            Self::ExtraFile => "extra_file",
            Self::VariantPath => "variant_path",
        }
    }

    /// Whether the kind names a single file that can be fetched
    pub fn is_file(&self) -> bool {
        !matches!(self, Self::VariantPath)
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity tuple used to detect duplicates
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArtifactKey {
    /// Unique per variant/arch
    Rpm {
        variant: String,
        arch: String,
        srpm: String,
        nevra: String,
    },
    /// Unique within the whole compose
    Image {
        subvariant: String,
        image_type: String,
        format: String,
        arch: String,
        disc_number: u32,
    },
    /// Unique per variant/arch
    ExtraFile {
        variant: String,
        arch: String,
        path: String,
    },
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rpm { srpm, nevra, .. } => write!(f, "rpm {nevra} (from {srpm})"),
            Self::Image {
                subvariant,
                image_type,
                format,
                arch,
                disc_number,
            } => write!(
                f,
                "image {subvariant}/{image_type}/{format}/{arch} disc {disc_number}"
            ),
            Self::ExtraFile { path, .. } => write!(f, "extra file {path}"),
        }
    }
}

/// Any file-bearing entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    Rpm(RpmEntry),
    Image(ImageEntry),
    ExtraFile(ExtraFileEntry),
}

impl Artifact {
    pub fn kind(&self) -> ArtifactKind {
        match self {
            Self::Rpm(_) => ArtifactKind::Rpm,
            Self::Image(_) => ArtifactKind::Image,
            Self::ExtraFile(_) => ArtifactKind::ExtraFile,
        }
    }

    pub fn path(&self) -> &ArtifactPath {
        match self {
            Self::Rpm(r) => &r.path,
            Self::Image(i) => &i.path,
            Self::ExtraFile(e) => &e.path,
        }
    }

    /// Identity of this artifact when filed under `variant`/`arch`
    pub fn key(&self, variant: &str, arch: &str) -> ArtifactKey {
        match self {
            Self::Rpm(r) => ArtifactKey::Rpm {
                variant: variant.to_string(),
                arch: arch.to_string(),
                srpm: r.srpm_key(),
                nevra: r.nevra.to_string(),
            },
            Self::Image(i) => ArtifactKey::Image {
                subvariant: i.subvariant.clone(),
                image_type: i.image_type.clone(),
                format: i.format.clone(),
                arch: i.arch.clone(),
                disc_number: i.disc_number,
            },
            Self::ExtraFile(e) => ArtifactKey::ExtraFile {
                variant: variant.to_string(),
                arch: arch.to_string(),
                path: e.path.display_path(),
            },
        }
    }

    /// Size recorded by the legacy record or the location
    pub fn recorded_size(&self) -> Option<u64> {
        let from_location = self.path().location().and_then(Location::size);
        match self {
            Self::Rpm(_) => from_location,
            Self::Image(i) => from_location.or(i.size),
            Self::ExtraFile(e) => from_location.or(e.size),
        }
    }

    /// Legacy checksum map (empty for RPMs)
    pub fn legacy_checksums(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            Self::Rpm(_) => None,
            Self::Image(i) => Some(&i.checksums),
            Self::ExtraFile(e) => Some(&e.checksums),
        }
    }

    /// Every checksum known for the artifact
    pub fn recorded_checksums(&self) -> Vec<Checksum> {
        let mut sums: Vec<Checksum> = self
            .legacy_checksums()
            .into_iter()
            .flatten()
            .filter_map(|(alg, hex)| Checksum::parse(&format!("{alg}:{}", hex.to_lowercase())).ok())
            .collect();
        if let Some(c) = self.path().location().and_then(Location::checksum)
            && !sums.iter().any(|s| s.algorithm_name() == c.algorithm_name())
        {
            sums.push(c.clone());
        }
        sums
    }

    /// Replace the path, folding a location's size and checksum into the
    /// legacy record so both views agree
    pub fn relocate(&mut self, path: ArtifactPath) {
        let (size, checksum) = match &path {
            ArtifactPath::Distributed(loc) => (loc.size(), loc.checksum().cloned()),
            ArtifactPath::Local(_) => (None, None),
        };
        let merge = |legacy_size: &mut Option<u64>, sums: &mut BTreeMap<String, String>| {
            if size.is_some() {
                *legacy_size = size;
            }
            if let Some(c) = &checksum {
                let digest = c.digest();
                sums.entry(c.algorithm_name().to_string())
                    .and_modify(|hex| {
                        if !hex.eq_ignore_ascii_case(digest) {
                            *hex = digest.to_string();
                        }
                    })
                    .or_insert_with(|| digest.to_string());
            }
        };
        match self {
            Self::Rpm(r) => r.path = path,
            Self::Image(i) => {
                merge(&mut i.size, &mut i.checksums);
                i.path = path;
            }
            Self::ExtraFile(e) => {
                merge(&mut e.size, &mut e.checksums);
                e.path = path;
            }
        }
    }
}

/// Pick the checksum a v2 location should carry from a legacy map
///
/// Prefers the strongest computable algorithm; falls back to the first
/// entry in key order.
pub fn primary_checksum(checksums: &BTreeMap<String, String>) -> Option<Checksum> {
    let preferred = [HashAlgorithm::Sha256, HashAlgorithm::Sha512, HashAlgorithm::Sha1, HashAlgorithm::Md5];
    preferred
        .iter()
        .find_map(|alg| checksums.get(alg.name()).map(|hex| (alg.name(), hex)))
        .or_else(|| checksums.iter().next().map(|(a, h)| (a.as_str(), h)))
        .and_then(|(alg, hex)| Checksum::parse(&format!("{alg}:{}", hex.to_lowercase())).ok())
}
