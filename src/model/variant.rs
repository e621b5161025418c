// src/model/variant.rs

//! Variants and their path sets

use super::artifact::ArtifactPath;
use super::compose::Release;
use crate::error::{Error, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

static VARIANT_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9]+$").expect("valid variant id regex"));

/// Kind of variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VariantType {
    Variant,
    Optional,
    Addon,
    LayeredProduct,
}

impl VariantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Variant => "variant",
            Self::Optional => "optional",
            Self::Addon => "addon",
            Self::LayeredProduct => "layered-product",
        }
    }
}

impl fmt::Display for VariantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VariantType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "variant" => Ok(Self::Variant),
            "optional" => Ok(Self::Optional),
            "addon" => Ok(Self::Addon),
            "layered-product" => Ok(Self::LayeredProduct),
            _ => Err(Error::ParseError(format!("unknown variant type '{s}'"))),
        }
    }
}

/// Directory categories a variant may publish per arch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathCategory {
    OsTree,
    Packages,
    Repository,
    Isos,
    Jigdos,
    SourceTree,
    SourcePackages,
    SourceRepository,
    SourceIsos,
    SourceJigdos,
    DebugTree,
    DebugPackages,
    DebugRepository,
    /// Product certificate
    Identity,
}

impl PathCategory {
    pub const ALL: [PathCategory; 14] = [
        Self::OsTree,
        Self::Packages,
        Self::Repository,
        Self::Isos,
        Self::Jigdos,
        Self::SourceTree,
        Self::SourcePackages,
        Self::SourceRepository,
        Self::SourceIsos,
        Self::SourceJigdos,
        Self::DebugTree,
        Self::DebugPackages,
        Self::DebugRepository,
        Self::Identity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OsTree => "os_tree",
            Self::Packages => "packages",
            Self::Repository => "repository",
            Self::Isos => "isos",
            Self::Jigdos => "jigdos",
            Self::SourceTree => "source_tree",
            Self::SourcePackages => "source_packages",
            Self::SourceRepository => "source_repository",
            Self::SourceIsos => "source_isos",
            Self::SourceJigdos => "source_jigdos",
            Self::DebugTree => "debug_tree",
            Self::DebugPackages => "debug_packages",
            Self::DebugRepository => "debug_repository",
            Self::Identity => "identity",
        }
    }
}

impl fmt::Display for PathCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PathCategory {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| Error::ParseError(format!("unknown variant path category '{s}'")))
    }
}

/// Per-category, per-arch directory paths of one variant
///
/// Shared by top-level variants and their children.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathSet {
    entries: BTreeMap<PathCategory, BTreeMap<String, ArtifactPath>>,
}

impl PathSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, category: PathCategory, arch: &str, path: ArtifactPath) {
        self.entries.entry(category).or_default().insert(arch.to_string(), path);
    }

    pub fn get(&self, category: PathCategory, arch: &str) -> Option<&ArtifactPath> {
        self.entries.get(&category).and_then(|m| m.get(arch))
    }

    /// Every (category, arch, path), in category then arch order
    pub fn iter(&self) -> impl Iterator<Item = (PathCategory, &str, &ArtifactPath)> {
        self.entries.iter().flat_map(|(category, arches)| {
            arches
                .iter()
                .map(move |(arch, path)| (*category, arch.as_str(), path))
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (PathCategory, &str, &mut ArtifactPath)> {
        self.entries.iter_mut().flat_map(|(category, arches)| {
            arches
                .iter_mut()
                .map(move |(arch, path)| (*category, arch.as_str(), path))
        })
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One variant of the compose
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    /// Short id, e.g. `optional`
    pub id: String,
    /// Unique id, `<parent uid>-<id>` for children, e.g. `Server-optional`
    pub uid: String,
    pub name: String,
    pub variant_type: VariantType,
    arches: Vec<String>,
    pub paths: PathSet,
    /// Child variant ids
    pub children: Vec<String>,
    /// Layered product release
    pub release: Option<Release>,
}

impl Variant {
    pub fn new(uid: &str, name: &str, variant_type: VariantType) -> Self {
        let id = uid.rsplit('-').next().unwrap_or(uid).to_string();
        Self {
            id,
            uid: uid.to_string(),
            name: name.to_string(),
            variant_type,
            arches: Vec::new(),
            paths: PathSet::new(),
            children: Vec::new(),
            release: None,
        }
    }

    /// A variant known only by the uid its artifacts are filed under
    pub fn bare(uid: &str) -> Self {
        Self::new(uid, uid, VariantType::Variant)
    }

    pub fn with_arches<I, S>(mut self, arches: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for arch in arches {
            self.add_arch(&arch.into());
        }
        self
    }

    /// Declare an arch (idempotent)
    pub fn add_arch(&mut self, arch: &str) {
        if !self.has_arch(arch) {
            self.arches.push(arch.to_string());
        }
    }

    pub fn has_arch(&self, arch: &str) -> bool {
        self.arches.iter().any(|a| a == arch)
    }

    /// Arches in declaration order
    pub fn arches(&self) -> &[String] {
        &self.arches
    }

    /// Uid of the parent, derived from the uid
    pub fn parent_uid(&self) -> Option<&str> {
        self.uid
            .rsplit_once('-')
            .map(|(parent, _)| parent)
    }

    /// Uid of a child with the given id
    pub fn child_uid(&self, child_id: &str) -> String {
        format!("{}-{}", self.uid, child_id)
    }

    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if !VARIANT_ID_RE.is_match(&self.id) {
            problems.push(format!("variant '{}': id '{}' must be alphanumeric", self.uid, self.id));
        }
        if self.name.trim().is_empty() {
            problems.push(format!("variant '{}': name must not be blank", self.uid));
        }
        if self.variant_type == VariantType::LayeredProduct && self.release.is_none() {
            problems.push(format!("variant '{}': layered product without release", self.uid));
        }
        for arch in &self.arches {
            if !super::is_known_arch(arch) {
                problems.push(format!("variant '{}': unknown arch '{arch}'", self.uid));
            }
        }
        for (category, arch, _) in self.paths.iter() {
            if !self.has_arch(arch) {
                problems.push(format!(
                    "variant '{}': {category} path for undeclared arch '{arch}'",
                    self.uid
                ));
            }
        }
        problems
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_ids() {
        let child = Variant::new("Server-optional", "Optional", VariantType::Optional);
        assert_eq!(child.id, "optional");
        assert_eq!(child.parent_uid(), Some("Server"));

        let top = Variant::bare("Server");
        assert_eq!(top.id, "Server");
        assert_eq!(top.parent_uid(), None);
        assert_eq!(top.child_uid("HA"), "Server-HA");
    }

    #[test]
    fn test_arches_keep_declaration_order() {
        let mut v = Variant::bare("Server").with_arches(["x86_64", "aarch64"]);
        v.add_arch("x86_64");
        assert_eq!(v.arches(), ["x86_64", "aarch64"]);
    }

    #[test]
    fn test_path_set() {
        let mut paths = PathSet::new();
        paths.set(PathCategory::Packages, "x86_64", ArtifactPath::Local("Server/x86_64/os/Packages".into()));
        paths.set(PathCategory::OsTree, "x86_64", ArtifactPath::Local("Server/x86_64/os".into()));
        assert_eq!(paths.len(), 2);

        let order: Vec<_> = paths.iter().map(|(c, _, _)| c).collect();
        assert_eq!(order, vec![PathCategory::OsTree, PathCategory::Packages]);
        assert!(paths.get(PathCategory::Isos, "x86_64").is_none());
    }

    #[test]
    fn test_problems() {
        let mut v = Variant::new("Server", "", VariantType::LayeredProduct).with_arches(["vax"]);
        v.paths.set(PathCategory::OsTree, "x86_64", ArtifactPath::Local("Server/x86_64/os".into()));
        assert_eq!(v.problems().len(), 4);
    }

    #[test]
    fn test_category_names() {
        for category in PathCategory::ALL {
            assert_eq!(category.as_str().parse::<PathCategory>().unwrap(), category);
        }
        assert!("nope".parse::<PathCategory>().is_err());
    }
}
