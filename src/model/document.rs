// src/model/document.rs

//! The metadata document: header, compose identity, variant table and
//! artifacts grouped by variant and arch

use super::artifact::{
    Artifact, ArtifactKey, ArtifactKind, ArtifactPath, ExtraFileEntry, ImageEntry, RpmCategory,
    RpmEntry, SUPPORTED_IMAGE_FORMATS, SUPPORTED_IMAGE_TYPES, primary_checksum,
};
use super::compose::{ComposeIdentity, Release};
use super::variant::{PathCategory, Variant};
use super::wire::{
    ExtraFileRecordV1, ExtraFileRecordV2, ImageRecordV1, ImageRecordV2, RpmRecordV1, RpmRecordV2,
    VariantRecord,
};
use super::is_known_arch;
use crate::error::{ArtifactRef, Error, Result};
use crate::location::Location;
use crate::version::{self, DocumentKind, Header, WireRevision};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::debug;

/// Where an entry sits inside a document
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntryContext {
    pub variant: String,
    pub arch: String,
    pub kind: ArtifactKind,
    /// Set for variant path entries only
    pub category: Option<PathCategory>,
}

impl EntryContext {
    pub fn artifact_ref(&self, path: &ArtifactPath) -> ArtifactRef {
        ArtifactRef::new(&self.variant, &self.arch, path.display_path())
    }
}

/// Read-only view of one path-bearing entry
#[derive(Debug, Clone, Copy)]
pub struct Entry<'a> {
    pub variant: &'a str,
    pub arch: &'a str,
    pub kind: ArtifactKind,
    pub category: Option<PathCategory>,
    pub path: &'a ArtifactPath,
    /// The owning artifact (absent for variant path entries)
    pub artifact: Option<&'a Artifact>,
}

impl Entry<'_> {
    pub fn to_context(&self) -> EntryContext {
        EntryContext {
            variant: self.variant.to_string(),
            arch: self.arch.to_string(),
            kind: self.kind,
            category: self.category,
        }
    }

    pub fn artifact_ref(&self) -> ArtifactRef {
        ArtifactRef::new(self.variant, self.arch, self.path.display_path())
    }
}

/// Mutable handle on one path-bearing entry
#[derive(Debug)]
pub enum EntryMut<'a> {
    Artifact(&'a mut Artifact),
    VariantPath(&'a mut ArtifactPath),
}

impl EntryMut<'_> {
    pub fn path(&self) -> &ArtifactPath {
        match self {
            Self::Artifact(a) => a.path(),
            Self::VariantPath(p) => p,
        }
    }

    pub fn artifact(&self) -> Option<&Artifact> {
        match self {
            Self::Artifact(a) => Some(a),
            Self::VariantPath(_) => None,
        }
    }

    pub fn relocate(&mut self, path: ArtifactPath) {
        match self {
            Self::Artifact(a) => a.relocate(path),
            Self::VariantPath(p) => **p = path,
        }
    }
}

/// A parsed compose metadata document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataDocument {
    kind: DocumentKind,
    revision: WireRevision,
    compose: ComposeIdentity,
    release: Option<Release>,
    variants: BTreeMap<String, Variant>,
    artifacts: BTreeMap<String, BTreeMap<String, Vec<Artifact>>>,
    index: HashSet<ArtifactKey>,
}

impl MetadataDocument {
    pub fn new(kind: DocumentKind, revision: WireRevision, compose: ComposeIdentity) -> Self {
        Self {
            kind,
            revision,
            compose,
            release: None,
            variants: BTreeMap::new(),
            artifacts: BTreeMap::new(),
            index: HashSet::new(),
        }
    }

    pub fn kind(&self) -> DocumentKind {
        self.kind
    }

    /// Revision the document was read as (and is written as by default)
    pub fn revision(&self) -> WireRevision {
        self.revision
    }

    pub fn header(&self) -> Header {
        Header::new(self.kind, self.revision)
    }

    pub fn compose(&self) -> &ComposeIdentity {
        &self.compose
    }

    pub fn release(&self) -> Option<&Release> {
        self.release.as_ref()
    }

    pub fn set_release(&mut self, release: Release) {
        self.release = Some(release);
    }

    /// Same content, written as `revision` by default
    pub(crate) fn with_revision(mut self, revision: WireRevision) -> Self {
        self.revision = revision;
        self
    }

    // Variants

    /// Add a variant to the table
    ///
    /// Re-declaring a uid replaces its description and keeps the union of
    /// arches. A child whose parent is already declared is registered in the
    /// parent's child list.
    pub fn declare_variant(&mut self, variant: Variant) -> Result<()> {
        if variant.uid.trim().is_empty() {
            return Err(Error::ValidationError(vec!["variant uid must not be blank".to_string()]));
        }

        if let Some(parent_uid) = variant.parent_uid()
            && let Some(parent) = self.variants.get_mut(parent_uid)
            && !parent.children.contains(&variant.id)
        {
            parent.children.push(variant.id.clone());
        }

        match self.variants.get_mut(&variant.uid) {
            Some(existing) => {
                let previous = existing.arches().to_vec();
                *existing = variant;
                for arch in previous {
                    existing.add_arch(&arch);
                }
            }
            None => {
                self.variants.insert(variant.uid.clone(), variant);
            }
        }
        Ok(())
    }

    pub fn variant(&self, uid: &str) -> Option<&Variant> {
        self.variants.get(uid)
    }

    pub fn has_variant(&self, uid: &str) -> bool {
        self.variants.contains_key(uid)
    }

    /// Variants in uid order
    pub fn variants(&self) -> impl Iterator<Item = &Variant> {
        self.variants.values()
    }

    /// Declared arches of a variant, in declaration order or sorted
    pub fn get_arches(&self, variant: &str, sorted: bool) -> Result<Vec<String>> {
        let v = self
            .variants
            .get(variant)
            .ok_or_else(|| Error::UnknownVariant(variant.to_string()))?;
        let mut arches = v.arches().to_vec();
        if sorted {
            arches.sort();
        }
        Ok(arches)
    }

    // Artifacts

    /// File an artifact under a declared variant and an arch
    ///
    /// The arch is added to the variant if it was not declared yet.
    pub fn add_artifact(&mut self, variant: &str, arch: &str, artifact: Artifact) -> Result<()> {
        let kind = self.kind;
        let v = self
            .variants
            .get_mut(variant)
            .ok_or_else(|| Error::UnknownVariant(variant.to_string()))?;

        let problems = placement_problems(kind, arch, &artifact);
        if !problems.is_empty() {
            return Err(Error::ValidationError(problems));
        }

        let key = artifact.key(variant, arch);
        if self.index.contains(&key) {
            return Err(Error::DuplicateArtifact(vec![ArtifactRef::new(
                variant,
                arch,
                artifact.path().display_path(),
            )]));
        }

        self.index.insert(key);
        v.add_arch(arch);
        self.artifacts
            .entry(variant.to_string())
            .or_default()
            .entry(arch.to_string())
            .or_default()
            .push(artifact);
        Ok(())
    }

    /// Artifacts filed under one variant/arch
    pub fn artifacts_in(&self, variant: &str, arch: &str) -> &[Artifact] {
        self.artifacts
            .get(variant)
            .and_then(|arches| arches.get(arch))
            .map_or(&[], Vec::as_slice)
    }

    /// Every artifact with its variant and arch
    pub fn artifacts(&self) -> impl Iterator<Item = (&str, &str, &Artifact)> {
        self.artifacts.iter().flat_map(|(variant, arches)| {
            arches.iter().flat_map(move |(arch, list)| {
                list.iter()
                    .map(move |a| (variant.as_str(), arch.as_str(), a))
            })
        })
    }

    pub fn artifact_count(&self) -> usize {
        self.artifacts.values().flat_map(BTreeMap::values).map(Vec::len).sum()
    }

    pub fn contains_key(&self, key: &ArtifactKey) -> bool {
        self.index.contains(key)
    }

    /// Every path-bearing entry: artifacts first, then variant paths
    pub fn entries(&self) -> Vec<Entry<'_>> {
        let mut entries: Vec<Entry<'_>> = self
            .artifacts()
            .map(|(variant, arch, artifact)| Entry {
                variant,
                arch,
                kind: artifact.kind(),
                category: None,
                path: artifact.path(),
                artifact: Some(artifact),
            })
            .collect();
        for variant in self.variants.values() {
            for (category, arch, path) in variant.paths.iter() {
                entries.push(Entry {
                    variant: &variant.uid,
                    arch,
                    kind: ArtifactKind::VariantPath,
                    category: Some(category),
                    path,
                    artifact: None,
                });
            }
        }
        entries
    }

    /// Every distributed location with its context
    pub fn locations(&self) -> impl Iterator<Item = (EntryContext, &Location)> {
        self.entries()
            .into_iter()
            .filter_map(|e| e.path.location().map(|loc| (e.to_context(), loc)))
    }

    /// Mutable handles on every path-bearing entry
    ///
    /// Callers that change artifact identity must call
    /// [`rebuild_index`](Self::rebuild_index) afterwards.
    pub(crate) fn entries_mut(&mut self) -> Vec<(EntryContext, EntryMut<'_>)> {
        let mut entries = Vec::new();
        for (variant, arches) in self.artifacts.iter_mut() {
            for (arch, list) in arches.iter_mut() {
                for artifact in list.iter_mut() {
                    let context = EntryContext {
                        variant: variant.clone(),
                        arch: arch.clone(),
                        kind: artifact.kind(),
                        category: None,
                    };
                    entries.push((context, EntryMut::Artifact(artifact)));
                }
            }
        }
        for variant in self.variants.values_mut() {
            let uid = variant.uid.clone();
            for (category, arch, path) in variant.paths.iter_mut() {
                let context = EntryContext {
                    variant: uid.clone(),
                    arch: arch.to_string(),
                    kind: ArtifactKind::VariantPath,
                    category: Some(category),
                };
                entries.push((context, EntryMut::VariantPath(path)));
            }
        }
        entries
    }

    /// Recompute the identity index, reporting every collision
    pub(crate) fn rebuild_index(&mut self) -> Result<()> {
        let (index, duplicates) = self.compute_index();
        if !duplicates.is_empty() {
            return Err(Error::DuplicateArtifact(duplicates));
        }
        self.index = index;
        Ok(())
    }

    fn compute_index(&self) -> (HashSet<ArtifactKey>, Vec<ArtifactRef>) {
        let mut index = HashSet::new();
        let mut duplicates = Vec::new();
        for (variant, arch, artifact) in self.artifacts() {
            if !index.insert(artifact.key(variant, arch)) {
                duplicates.push(ArtifactRef::new(variant, arch, artifact.path().display_path()));
            }
        }
        (index, duplicates)
    }

    // Validation

    /// Check every invariant, reporting all violations at once
    pub fn validate(&self) -> Result<()> {
        let mut problems = self.compose.problems();

        if self.kind == DocumentKind::ComposeInfo {
            match &self.release {
                Some(release) => problems.extend(release.problems()),
                None => problems.push("compose info requires a release".to_string()),
            }
        }

        // only compose info carries the variant hierarchy
        let hierarchy = self.kind == DocumentKind::ComposeInfo;
        for variant in self.variants.values() {
            problems.extend(variant.problems());
            if !hierarchy {
                continue;
            }
            if let Some(parent) = variant.parent_uid()
                && !self.variants.contains_key(parent)
            {
                problems.push(format!("variant '{}': parent '{parent}' is not declared", variant.uid));
            }
            for child in &variant.children {
                let uid = variant.child_uid(child);
                if !self.variants.contains_key(&uid) {
                    problems.push(format!("variant '{}': child '{uid}' is not declared", variant.uid));
                }
            }
        }

        for (uid, arches) in &self.artifacts {
            let Some(variant) = self.variants.get(uid) else {
                problems.push(format!("artifacts filed under undeclared variant '{uid}'"));
                continue;
            };
            for (arch, list) in arches {
                if !variant.has_arch(arch) {
                    problems.push(format!("{uid}/{arch}: arch not declared for variant"));
                }
                for artifact in list {
                    let at = format!("{uid}/{arch}: {}", artifact.path().display_path());
                    problems.extend(
                        placement_problems(self.kind, arch, artifact)
                            .into_iter()
                            .chain(artifact_problems(artifact, self.revision))
                            .map(|p| format!("{at}: {p}")),
                    );
                }
            }
        }

        let (_, duplicates) = self.compute_index();
        problems.extend(duplicates.iter().map(|d| format!("duplicate artifact {d}")));

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::ValidationError(problems))
        }
    }

    // Serialization

    /// Serialize to a JSON value, as `version` or the document's own revision
    ///
    /// Writing a distributed document as v1 projects each location onto its
    /// local path; entries without one fail with
    /// [`Error::MissingLocalPathHint`].
    pub fn to_value(&self, version: Option<WireRevision>) -> Result<Value> {
        let revision = version.unwrap_or(self.revision);
        let mut missing = Vec::new();

        let body = match self.kind {
            DocumentKind::ComposeInfo => self.variants_value(revision, &mut missing)?,
            DocumentKind::Rpms => self.rpms_value(revision, &mut missing)?,
            DocumentKind::Images => self.images_value(revision, &mut missing)?,
            DocumentKind::ExtraFiles => self.extra_files_value(revision, &mut missing)?,
        };
        if !missing.is_empty() {
            return Err(Error::MissingLocalPathHint(missing));
        }

        let mut payload = Map::new();
        payload.insert("compose".to_string(), serde_json::to_value(&self.compose)?);
        if self.kind == DocumentKind::ComposeInfo
            && let Some(release) = &self.release
        {
            payload.insert("release".to_string(), serde_json::to_value(release)?);
        }
        payload.insert(self.kind.payload_key().to_string(), body);

        let mut root = Map::new();
        root.insert("header".to_string(), Header::new(self.kind, revision).to_value());
        root.insert("payload".to_string(), Value::Object(payload));
        Ok(Value::Object(root))
    }

    /// Canonical JSON text: sorted keys, 4-space indentation
    pub fn to_json(&self, version: Option<WireRevision>) -> Result<String> {
        let value = self.to_value(version)?;
        to_canonical_json(&value)
    }

    /// Write canonical JSON to `path` (temp file + rename)
    pub fn save(&self, path: &Path, version: Option<WireRevision>) -> Result<()> {
        let json = self.to_json(version)?;
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.persist(path)
            .map_err(|e| Error::IoError(format!("Failed to write {}: {}", path.display(), e.error)))?;
        debug!("Wrote {} ({}) to {}", self.kind, version.unwrap_or(self.revision), path.display());
        Ok(())
    }

    fn project_v1(
        path: &ArtifactPath,
        variant: &str,
        arch: &str,
        missing: &mut Vec<ArtifactRef>,
    ) -> String {
        match path.local_path() {
            Some(p) => p.to_string(),
            None => {
                missing.push(ArtifactRef::new(variant, arch, path.to_string()));
                String::new()
            }
        }
    }

    fn rpms_value(&self, revision: WireRevision, missing: &mut Vec<ArtifactRef>) -> Result<Value> {
        let mut variants = Map::new();
        for (uid, variant) in &self.variants {
            let mut arches = Map::new();
            for arch in variant.arches() {
                let mut srpms: BTreeMap<String, BTreeMap<String, Value>> = BTreeMap::new();
                for artifact in self.artifacts_in(uid, arch) {
                    let Artifact::Rpm(rpm) = artifact else { continue };
                    let record = if revision.is_v1() {
                        serde_json::to_value(RpmRecordV1 {
                            path: Self::project_v1(&rpm.path, uid, arch, missing),
                            sigkey: rpm.sigkey.clone(),
                            category: rpm.category.to_string(),
                        })?
                    } else {
                        serde_json::to_value(RpmRecordV2 {
                            location: rpm.path.to_location(None, None)?,
                            sigkey: rpm.sigkey.clone(),
                            category: rpm.category.to_string(),
                        })?
                    };
                    srpms
                        .entry(rpm.srpm_key())
                        .or_default()
                        .insert(rpm.nevra.to_string(), record);
                }
                arches.insert(arch.clone(), serde_json::to_value(srpms)?);
            }
            variants.insert(uid.clone(), Value::Object(arches));
        }
        Ok(Value::Object(variants))
    }

    fn images_value(&self, revision: WireRevision, missing: &mut Vec<ArtifactRef>) -> Result<Value> {
        self.listed_value(|artifact, uid, arch| {
            let Artifact::Image(image) = artifact else {
                return Ok(None);
            };
            let value = if revision.is_v1() {
                let path = Self::project_v1(&image.path, uid, arch, missing);
                let record = ImageRecordV1 {
                    path: path.clone(),
                    mtime: image.mtime,
                    size: image.size,
                    volume_id: image.volume_id.clone(),
                    image_type: image.image_type.clone(),
                    format: image.format.clone(),
                    arch: image.arch.clone(),
                    disc_number: image.disc_number,
                    disc_count: image.disc_count,
                    checksums: image.checksums.clone(),
                    implant_md5: image.implant_md5.clone(),
                    bootable: image.bootable,
                    subvariant: (revision >= WireRevision::V1_1).then(|| image.subvariant.clone()),
                };
                (path, serde_json::to_value(record)?)
            } else {
                let location = image
                    .path
                    .to_location(image.size, primary_checksum(&image.checksums))?;
                let sort_key = image.path.display_path();
                let record = ImageRecordV2 {
                    additional_checksums: additional_checksums(&image.checksums, &location),
                    location,
                    mtime: image.mtime,
                    volume_id: image.volume_id.clone(),
                    image_type: image.image_type.clone(),
                    format: image.format.clone(),
                    arch: image.arch.clone(),
                    disc_number: image.disc_number,
                    disc_count: image.disc_count,
                    implant_md5: image.implant_md5.clone(),
                    bootable: image.bootable,
                    subvariant: image.subvariant.clone(),
                };
                (sort_key, serde_json::to_value(record)?)
            };
            Ok(Some(value))
        })
    }

    fn extra_files_value(&self, revision: WireRevision, missing: &mut Vec<ArtifactRef>) -> Result<Value> {
        self.listed_value(|artifact, uid, arch| {
            let Artifact::ExtraFile(extra) = artifact else {
                return Ok(None);
            };
            let value = if revision.is_v1() {
                let file = Self::project_v1(&extra.path, uid, arch, missing);
                let record = ExtraFileRecordV1 {
                    file: file.clone(),
                    size: extra.size,
                    checksums: extra.checksums.clone(),
                };
                (file, serde_json::to_value(record)?)
            } else {
                let location = extra
                    .path
                    .to_location(extra.size, primary_checksum(&extra.checksums))?;
                let full = extra.path.display_path();
                let file = full.rsplit('/').next().unwrap_or(&full).to_string();
                let record = ExtraFileRecordV2 {
                    file,
                    additional_checksums: additional_checksums(&extra.checksums, &location),
                    location,
                };
                (full, serde_json::to_value(record)?)
            };
            Ok(Some(value))
        })
    }

    /// variant -> arch -> list, each list sorted by its path
    fn listed_value<F>(&self, mut record: F) -> Result<Value>
    where
        F: FnMut(&Artifact, &str, &str) -> Result<Option<(String, Value)>>,
    {
        let mut variants = Map::new();
        for (uid, variant) in &self.variants {
            let mut arches = Map::new();
            for arch in variant.arches() {
                let mut list = Vec::new();
                for artifact in self.artifacts_in(uid, arch) {
                    if let Some(entry) = record(artifact, uid, arch)? {
                        list.push(entry);
                    }
                }
                list.sort_by(|a, b| a.0.cmp(&b.0));
                arches.insert(
                    arch.clone(),
                    Value::Array(list.into_iter().map(|(_, v)| v).collect()),
                );
            }
            variants.insert(uid.clone(), Value::Object(arches));
        }
        Ok(Value::Object(variants))
    }

    fn variants_value(&self, revision: WireRevision, missing: &mut Vec<ArtifactRef>) -> Result<Value> {
        let mut out = Map::new();
        for (uid, variant) in &self.variants {
            let mut arches = variant.arches().to_vec();
            arches.sort();
            let mut children = variant.children.clone();
            children.sort();

            let value = if revision.is_v1() {
                let mut paths: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
                for (category, arch, path) in variant.paths.iter() {
                    paths
                        .entry(category.to_string())
                        .or_default()
                        .insert(arch.to_string(), Self::project_v1(path, uid, arch, missing));
                }
                serde_json::to_value(variant_record(variant, arches, paths, children))?
            } else {
                let mut paths: BTreeMap<String, BTreeMap<String, Location>> = BTreeMap::new();
                for (category, arch, path) in variant.paths.iter() {
                    paths
                        .entry(category.to_string())
                        .or_default()
                        .insert(arch.to_string(), path.to_location(None, None)?);
                }
                serde_json::to_value(variant_record(variant, arches, paths, children))?
            };
            out.insert(uid.clone(), value);
        }
        Ok(Value::Object(out))
    }

    // Parsing

    /// Parse any supported document, detecting kind and version from the header
    pub fn from_value(raw: &Value) -> Result<Self> {
        let header = version::detect_header(raw)?;
        Self::parse_body(raw, header.kind, header.revision()?)
    }

    /// Parse a document that must be of `kind`
    pub fn from_value_as(raw: &Value, kind: DocumentKind) -> Result<Self> {
        let declared = version::detect_for(raw, kind)?;
        Self::parse_body(raw, kind, WireRevision::resolve(declared)?)
    }

    pub fn from_json(s: &str) -> Result<Self> {
        let raw: Value = serde_json::from_str(s)?;
        Self::from_value(&raw)
    }

    /// Read and parse a document file
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| Error::IoError(format!("Failed to read {}: {e}", path.display())))?;
        let doc = Self::from_json(&text)?;
        debug!(
            "Loaded {} v{} from {} ({} artifacts)",
            doc.kind,
            doc.revision,
            path.display(),
            doc.artifact_count()
        );
        Ok(doc)
    }

    fn parse_body(raw: &Value, kind: DocumentKind, revision: WireRevision) -> Result<Self> {
        let mut payload = raw
            .get("payload")
            .and_then(Value::as_object)
            .cloned()
            .ok_or_else(|| Error::ParseError("missing 'payload' object".to_string()))?;
        migrate_minor(kind, revision, &mut payload);

        let compose: ComposeIdentity = decode(
            payload
                .get("compose")
                .ok_or_else(|| Error::ParseError("missing 'payload.compose'".to_string()))?,
            "payload.compose",
        )?;
        let mut doc = Self::new(kind, revision, compose);

        if let Some(release) = payload.get("release")
            && kind == DocumentKind::ComposeInfo
        {
            doc.release = Some(decode(release, "payload.release")?);
        }

        let body = payload.get(kind.payload_key()).ok_or_else(|| {
            Error::ParseError(format!("missing 'payload.{}'", kind.payload_key()))
        })?;

        let mut sink = ParseSink::default();
        match kind {
            DocumentKind::ComposeInfo => doc.parse_variants(body, &mut sink)?,
            DocumentKind::Rpms => doc.parse_rpms(body, &mut sink)?,
            DocumentKind::Images | DocumentKind::ExtraFiles => doc.parse_listed(body, &mut sink)?,
        }

        if !sink.duplicates.is_empty() {
            return Err(Error::DuplicateArtifact(sink.duplicates));
        }
        if !sink.problems.is_empty() {
            return Err(Error::ValidationError(sink.problems));
        }
        doc.validate()?;
        Ok(doc)
    }

    fn file_artifact(
        &mut self,
        variant: &str,
        arch: &str,
        artifact: Artifact,
        sink: &mut ParseSink,
    ) {
        match self.add_artifact(variant, arch, artifact) {
            Ok(()) => {}
            Err(Error::DuplicateArtifact(refs)) => sink.duplicates.extend(refs),
            Err(Error::ValidationError(problems)) => sink
                .problems
                .extend(problems.into_iter().map(|p| format!("{variant}/{arch}: {p}"))),
            Err(e) => sink.problems.push(format!("{variant}/{arch}: {e}")),
        }
    }

    fn declare_bare(&mut self, variant: &str, arch: &str) -> Result<()> {
        if !self.variants.contains_key(variant) {
            self.declare_variant(Variant::bare(variant))?;
        }
        if let Some(v) = self.variants.get_mut(variant) {
            v.add_arch(arch);
        }
        Ok(())
    }

    fn parse_rpms(&mut self, body: &Value, sink: &mut ParseSink) -> Result<()> {
        let v1 = self.revision.is_v1();
        for (variant, arches) in object(body, "rpms")? {
            for (arch, srpms) in object(arches, variant)? {
                self.declare_bare(variant, arch)?;
                for (srpm, rpms) in object(srpms, arch)? {
                    for (nevra, record) in object(rpms, srpm)? {
                        let (path, sigkey, category) = if v1 {
                            let r: RpmRecordV1 = decode(record, nevra)?;
                            match local_path(&r.path) {
                                Ok(p) => (p, r.sigkey, r.category),
                                Err(e) => {
                                    sink.problems.push(format!("{variant}/{arch}: {nevra}: {e}"));
                                    continue;
                                }
                            }
                        } else {
                            let r: RpmRecordV2 = decode(record, nevra)?;
                            (ArtifactPath::Distributed(r.location), r.sigkey, r.category)
                        };

                        let entry = category.parse::<RpmCategory>().and_then(|category| {
                            let srpm = (category != RpmCategory::Source).then_some(srpm.as_str());
                            RpmEntry::new(nevra, srpm, sigkey.as_deref(), category, path)
                        });
                        match entry {
                            Ok(rpm) => self.file_artifact(variant, arch, Artifact::Rpm(rpm), sink),
                            Err(e) => sink.problems.push(format!("{variant}/{arch}: {nevra}: {e}")),
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn parse_listed(&mut self, body: &Value, sink: &mut ParseSink) -> Result<()> {
        let v1 = self.revision.is_v1();
        let images = self.kind == DocumentKind::Images;
        for (variant, arches) in object(body, self.kind.payload_key())? {
            for (arch, list) in object(arches, variant)? {
                self.declare_bare(variant, arch)?;
                let items = list.as_array().ok_or_else(|| {
                    Error::ParseError(format!("{variant}/{arch}: expected a list"))
                })?;
                for item in items {
                    let parsed = match (images, v1) {
                        (true, true) => image_from_v1(decode(item, variant)?),
                        (true, false) => Ok(image_from_v2(decode(item, variant)?)),
                        (false, true) => extra_file_from_v1(decode(item, variant)?),
                        (false, false) => Ok(extra_file_from_v2(decode(item, variant)?)),
                    };
                    match parsed {
                        Ok(artifact) => self.file_artifact(variant, arch, artifact, sink),
                        Err(e) => sink.problems.push(format!("{variant}/{arch}: {e}")),
                    }
                }
            }
        }
        Ok(())
    }

    fn parse_variants(&mut self, body: &Value, sink: &mut ParseSink) -> Result<()> {
        let v1 = self.revision.is_v1();
        for (uid, record) in object(body, "variants")? {
            let parsed = if v1 {
                let r: VariantRecord<String> = decode(record, uid)?;
                variant_from_record(r, |p| local_path(&p))
            } else {
                let r: VariantRecord<Location> = decode(record, uid)?;
                variant_from_record(r, |loc| Ok(ArtifactPath::Distributed(loc)))
            };
            match parsed {
                Ok(variant) if variant.uid != *uid => sink
                    .problems
                    .push(format!("variant key '{uid}' does not match uid '{}'", variant.uid)),
                Ok(variant) => self.declare_variant(variant)?,
                Err(e) => sink.problems.push(format!("variant '{uid}': {e}")),
            }
        }
        Ok(())
    }
}

#[derive(Default)]
struct ParseSink {
    problems: Vec<String>,
    duplicates: Vec<ArtifactRef>,
}

/// Serialize any JSON value with sorted keys and 4-space indentation
pub fn to_canonical_json(value: &Value) -> Result<String> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut ser)?;
    String::from_utf8(buf).map_err(|e| Error::ParseError(e.to_string()))
}

fn decode<T: DeserializeOwned>(value: &Value, context: &str) -> Result<T> {
    serde_json::from_value(value.clone()).map_err(|e| Error::ParseError(format!("{context}: {e}")))
}

fn object<'a>(value: &'a Value, context: &str) -> Result<&'a Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| Error::ParseError(format!("{context}: expected an object")))
}

/// A legacy path: relative, non-blank, no URL scheme
fn local_path(path: &str) -> Result<ArtifactPath> {
    if path.trim().is_empty() || path.starts_with('/') || path.contains("://") {
        return Err(Error::InvalidLocation(format!(
            "legacy path must be a relative path, got '{path}'"
        )));
    }
    crate::location::validate_relative_path(path, "legacy path")?;
    Ok(ArtifactPath::Local(path.to_string()))
}

/// Placement rules checked whenever an artifact is filed
fn placement_problems(kind: DocumentKind, arch: &str, artifact: &Artifact) -> Vec<String> {
    let mut problems = Vec::new();
    let expected = match kind {
        DocumentKind::Rpms => Some(ArtifactKind::Rpm),
        DocumentKind::Images => Some(ArtifactKind::Image),
        DocumentKind::ExtraFiles => Some(ArtifactKind::ExtraFile),
        DocumentKind::ComposeInfo => None,
    };
    if expected != Some(artifact.kind()) {
        problems.push(format!("{} artifacts do not belong in {kind}", artifact.kind()));
    }
    if !is_known_arch(arch) {
        problems.push(format!("unknown arch '{arch}'"));
    }
    if matches!(artifact, Artifact::Rpm(_)) && matches!(arch, "src" | "nosrc") {
        problems.push("source arch is not allowed; file source packages under binary arches".to_string());
    }
    problems
}

/// Field rules of a single artifact under a given revision
fn artifact_problems(artifact: &Artifact, revision: WireRevision) -> Vec<String> {
    let mut problems = Vec::new();
    match artifact {
        Artifact::Rpm(rpm) => {
            if let Some(key) = &rpm.sigkey
                && (key.is_empty() || !key.bytes().all(|b| b.is_ascii_hexdigit()))
            {
                problems.push(format!("sigkey '{key}' is not hexadecimal"));
            }
        }
        Artifact::Image(image) => {
            if !SUPPORTED_IMAGE_TYPES.contains(&image.image_type.as_str()) {
                problems.push(format!("unsupported image type '{}'", image.image_type));
            }
            if !SUPPORTED_IMAGE_FORMATS.contains(&image.format.as_str()) {
                problems.push(format!("unsupported image format '{}'", image.format));
            }
            if !is_known_arch(&image.arch) {
                problems.push(format!("unknown image arch '{}'", image.arch));
            }
            if image.disc_number < 1 || image.disc_number > image.disc_count {
                problems.push(format!(
                    "disc {} of {} is out of range",
                    image.disc_number, image.disc_count
                ));
            }
            if let Some(md5) = &image.implant_md5
                && (md5.len() != 32 || !md5.bytes().all(|b| b.is_ascii_hexdigit()))
            {
                problems.push(format!("implant_md5 '{md5}' is not an MD5 digest"));
            }
            if revision.is_v1() {
                if image.size.is_none() {
                    problems.push("size is required".to_string());
                }
                if image.checksums.is_empty() {
                    problems.push("checksums must not be empty".to_string());
                }
            }
        }
        Artifact::ExtraFile(extra) => {
            if revision.is_v1() && extra.checksums.is_empty() {
                problems.push("checksums must not be empty".to_string());
            }
        }
    }
    problems
}

/// Legacy checksums not already carried verbatim by the location
///
/// A primary digest recorded in another hex case stays here so the legacy
/// spelling survives a trip through v2.
fn additional_checksums(checksums: &BTreeMap<String, String>, location: &Location) -> BTreeMap<String, String> {
    let carried = location.checksum();
    checksums
        .iter()
        .filter(|(alg, hex)| {
            carried.is_none_or(|c| c.algorithm_name() != alg.as_str() || c.digest() != hex.as_str())
        })
        .map(|(a, h)| (a.clone(), h.clone()))
        .collect()
}

fn image_from_v1(r: ImageRecordV1) -> Result<Artifact> {
    Ok(Artifact::Image(ImageEntry {
        path: local_path(&r.path)?,
        mtime: r.mtime,
        size: r.size,
        volume_id: r.volume_id,
        image_type: r.image_type,
        format: r.format,
        arch: r.arch,
        disc_number: r.disc_number,
        disc_count: r.disc_count,
        checksums: r.checksums,
        implant_md5: r.implant_md5,
        bootable: r.bootable,
        subvariant: r.subvariant.unwrap_or_default(),
    }))
}

fn image_from_v2(r: ImageRecordV2) -> Artifact {
    let mut artifact = Artifact::Image(ImageEntry {
        path: ArtifactPath::Local(String::new()),
        mtime: r.mtime,
        size: None,
        volume_id: r.volume_id,
        image_type: r.image_type,
        format: r.format,
        arch: r.arch,
        disc_number: r.disc_number,
        disc_count: r.disc_count,
        checksums: r.additional_checksums,
        implant_md5: r.implant_md5,
        bootable: r.bootable,
        subvariant: r.subvariant,
    });
    artifact.relocate(ArtifactPath::Distributed(r.location));
    artifact
}

fn extra_file_from_v1(r: ExtraFileRecordV1) -> Result<Artifact> {
    Ok(Artifact::ExtraFile(ExtraFileEntry {
        path: local_path(&r.file)?,
        size: r.size,
        checksums: r.checksums,
    }))
}

fn extra_file_from_v2(r: ExtraFileRecordV2) -> Artifact {
    let mut artifact = Artifact::ExtraFile(ExtraFileEntry {
        path: ArtifactPath::Local(String::new()),
        size: None,
        checksums: r.additional_checksums,
    });
    artifact.relocate(ArtifactPath::Distributed(r.location));
    artifact
}

fn variant_record<P>(
    variant: &Variant,
    arches: Vec<String>,
    paths: BTreeMap<String, BTreeMap<String, P>>,
    children: Vec<String>,
) -> VariantRecord<P> {
    VariantRecord {
        id: variant.id.clone(),
        uid: variant.uid.clone(),
        name: variant.name.clone(),
        variant_type: variant.variant_type.to_string(),
        arches,
        paths,
        variants: children,
        release: variant.release.clone(),
    }
}

fn variant_from_record<P, F>(r: VariantRecord<P>, mut to_path: F) -> Result<Variant>
where
    F: FnMut(P) -> Result<ArtifactPath>,
{
    let mut variant = Variant::new(&r.uid, &r.name, r.variant_type.parse()?).with_arches(r.arches);
    variant.id = r.id;
    variant.children = r.variants;
    variant.release = r.release;
    for (category, arches) in r.paths {
        let category: PathCategory = category.parse()?;
        for (arch, path) in arches {
            variant.paths.set(category, &arch, to_path(path)?);
        }
    }
    Ok(variant)
}

/// Apply the adjacent-minor upgrade steps from `from` to the newest minor
/// of the same major
fn migrate_minor(kind: DocumentKind, from: WireRevision, payload: &mut Map<String, Value>) {
    let mut revision = from;
    while let Some(next) = revision.next() {
        if next.version().major != revision.version().major {
            break;
        }
        upgrade_step(kind, revision, payload);
        revision = next;
    }
}

fn upgrade_step(kind: DocumentKind, from: WireRevision, payload: &mut Map<String, Value>) {
    // 1.0 -> 1.1: images gained `subvariant`
    if from == WireRevision::V1_0 && kind == DocumentKind::Images {
        let Some(Value::Object(variants)) = payload.get_mut("images") else {
            return;
        };
        for arches in variants.values_mut().filter_map(Value::as_object_mut) {
            for list in arches.values_mut().filter_map(Value::as_array_mut) {
                for image in list.iter_mut().filter_map(Value::as_object_mut) {
                    image
                        .entry("subvariant")
                        .or_insert_with(|| Value::String(String::new()));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::variant::VariantType;
    use serde_json::json;

    const SHA: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    fn compose() -> ComposeIdentity {
        ComposeIdentity::from_id("Fedora-39-20231102.0").unwrap()
    }

    fn rpm(nevra: &str, srpm: &str, path: &str) -> Artifact {
        Artifact::Rpm(
            RpmEntry::new(
                nevra,
                Some(srpm),
                Some("a15b79cc"),
                RpmCategory::Binary,
                ArtifactPath::Local(path.to_string()),
            )
            .unwrap(),
        )
    }

    fn rpms_doc() -> MetadataDocument {
        let mut doc = MetadataDocument::new(DocumentKind::Rpms, WireRevision::V1_2, compose());
        doc.declare_variant(Variant::bare("Server").with_arches(["x86_64"])).unwrap();
        doc.add_artifact(
            "Server",
            "x86_64",
            rpm(
                "bash-0:5.2.15-3.fc39.x86_64",
                "bash-0:5.2.15-3.fc39.src",
                "Server/x86_64/os/Packages/b/bash-5.2.15-3.fc39.x86_64.rpm",
            ),
        )
        .unwrap();
        doc
    }

    fn image_json(path: &str, disc: u32) -> Value {
        json!({
            "path": path,
            "mtime": 1704067200,
            "size": 2048,
            "volume_id": "Fedora-39",
            "type": "dvd",
            "format": "iso",
            "arch": "x86_64",
            "disc_number": disc,
            "disc_count": 2,
            "checksums": {"sha256": SHA},
            "implant_md5": null,
            "bootable": true,
            "subvariant": "Server"
        })
    }

    #[test]
    fn test_add_artifact_rules() {
        let mut doc = rpms_doc();
        assert_eq!(doc.artifact_count(), 1);

        let dup = rpm(
            "bash-0:5.2.15-3.fc39.x86_64",
            "bash-0:5.2.15-3.fc39.src",
            "elsewhere/bash.rpm",
        );
        assert!(matches!(
            doc.add_artifact("Server", "x86_64", dup.clone()),
            Err(Error::DuplicateArtifact(_))
        ));
        // same identity under another arch is a different artifact
        doc.add_artifact("Server", "aarch64", dup.clone()).unwrap();
        assert_eq!(doc.get_arches("Server", true).unwrap(), vec!["aarch64", "x86_64"]);

        assert!(matches!(
            doc.add_artifact("Client", "x86_64", dup.clone()),
            Err(Error::UnknownVariant(v)) if v == "Client"
        ));
        assert!(matches!(
            doc.add_artifact("Server", "src", dup.clone()),
            Err(Error::ValidationError(_))
        ));
        assert!(matches!(
            doc.add_artifact("Server", "vax", dup),
            Err(Error::ValidationError(_))
        ));
    }

    #[test]
    fn test_get_arches() {
        let mut doc = MetadataDocument::new(DocumentKind::Rpms, WireRevision::V1_2, compose());
        doc.declare_variant(Variant::bare("Server").with_arches(["x86_64", "aarch64", "s390x"]))
            .unwrap();
        assert_eq!(doc.get_arches("Server", false).unwrap(), vec!["x86_64", "aarch64", "s390x"]);
        assert_eq!(doc.get_arches("Server", true).unwrap(), vec!["aarch64", "s390x", "x86_64"]);
        assert!(matches!(doc.get_arches("Nope", true), Err(Error::UnknownVariant(_))));
    }

    #[test]
    fn test_rpms_wire_v1_and_v2() {
        let doc = rpms_doc();
        let v1 = doc.to_value(None).unwrap();
        assert_eq!(v1["header"]["version"], "1.2");
        let record = &v1["payload"]["rpms"]["Server"]["x86_64"]["bash-0:5.2.15-3.fc39.src"]
            ["bash-0:5.2.15-3.fc39.x86_64"];
        assert_eq!(
            record,
            &json!({
                "path": "Server/x86_64/os/Packages/b/bash-5.2.15-3.fc39.x86_64.rpm",
                "sigkey": "a15b79cc",
                "category": "binary"
            })
        );

        let v2 = doc.to_value(Some(WireRevision::V2_0)).unwrap();
        let record = &v2["payload"]["rpms"]["Server"]["x86_64"]["bash-0:5.2.15-3.fc39.src"]
            ["bash-0:5.2.15-3.fc39.x86_64"];
        assert!(record.get("path").is_none());
        assert_eq!(
            record["location"]["local_path"],
            "Server/x86_64/os/Packages/b/bash-5.2.15-3.fc39.x86_64.rpm"
        );

        let back = MetadataDocument::from_value(&v2).unwrap();
        assert_eq!(back.revision(), WireRevision::V2_0);
        assert_eq!(back.to_value(Some(WireRevision::V1_2)).unwrap(), v1);
    }

    #[test]
    fn test_canonical_json_layout() {
        let json = rpms_doc().to_json(None).unwrap();
        assert!(json.starts_with("{\n    \"header\": {\n        \"type\": \"productmd.rpms\""));
        let reparsed = MetadataDocument::from_json(&json).unwrap();
        assert_eq!(reparsed.to_json(None).unwrap(), json);
    }

    #[test]
    fn test_images_parse_and_identity() {
        let raw = json!({
            "header": {"type": "productmd.images", "version": "1.2"},
            "payload": {
                "compose": {"id": "Fedora-39-20231102.0", "type": "production", "date": "20231102", "respin": 0},
                "images": {
                    "Server": {"x86_64": [
                        image_json("Server/x86_64/iso/disc2.iso", 2),
                        image_json("Server/x86_64/iso/disc1.iso", 1)
                    ]}
                }
            }
        });
        let doc = MetadataDocument::from_value(&raw).unwrap();
        assert_eq!(doc.artifact_count(), 2);

        // lists come back sorted by path
        let out = doc.to_value(None).unwrap();
        assert_eq!(out["payload"]["images"]["Server"]["x86_64"][0]["path"], "Server/x86_64/iso/disc1.iso");

        // the same image identity under a different variant collides
        let mut dup = raw.clone();
        dup["payload"]["images"]["Client"] = json!({"x86_64": [image_json("Client/x86_64/iso/disc1.iso", 1)]});
        match MetadataDocument::from_value(&dup).unwrap_err() {
            Error::DuplicateArtifact(refs) => {
                assert_eq!(refs.len(), 1);
                assert!(refs[0].path.contains("disc1.iso"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_images_v1_0_migration() {
        let mut image = image_json("Server/x86_64/iso/disc1.iso", 1);
        image.as_object_mut().unwrap().remove("subvariant");
        let raw = json!({
            "header": {"type": "productmd.images", "version": "1.0"},
            "payload": {
                "compose": {"id": "Fedora-39-20231102.0", "type": "production", "date": "20231102", "respin": 0},
                "images": {"Server": {"x86_64": [image]}}
            }
        });
        let doc = MetadataDocument::from_value(&raw).unwrap();
        let (_, _, artifact) = doc.artifacts().next().unwrap();
        let Artifact::Image(parsed) = artifact else { panic!("expected an image") };
        assert_eq!(parsed.subvariant, "");

        // written back as 1.0 without the field, as 1.2 with it
        let same = doc.to_value(None).unwrap();
        assert!(same["payload"]["images"]["Server"]["x86_64"][0].get("subvariant").is_none());
        let newer = doc.to_value(Some(WireRevision::V1_2)).unwrap();
        assert_eq!(newer["payload"]["images"]["Server"]["x86_64"][0]["subvariant"], "");
    }

    #[test]
    fn test_uppercase_legacy_digest_survives_v2() {
        let mut image = image_json("Server/x86_64/iso/disc1.iso", 1);
        image["checksums"]["sha256"] = json!(SHA.to_uppercase());
        let raw = json!({
            "header": {"type": "productmd.images", "version": "1.2"},
            "payload": {
                "compose": {"id": "Fedora-39-20231102.0", "type": "production", "date": "20231102", "respin": 0},
                "images": {"Server": {"x86_64": [image]}}
            }
        });
        let doc = MetadataDocument::from_value(&raw).unwrap();
        let v2 = doc.to_value(Some(WireRevision::V2_0)).unwrap();
        let record = &v2["payload"]["images"]["Server"]["x86_64"][0];
        assert_eq!(record["location"]["checksum"], format!("sha256:{SHA}"));
        assert_eq!(record["additional_checksums"]["sha256"], SHA.to_uppercase());

        let back = MetadataDocument::from_value(&v2).unwrap();
        let legacy = back.to_value(Some(WireRevision::V1_2)).unwrap();
        assert_eq!(legacy, doc.to_value(None).unwrap());
        assert_eq!(
            legacy["payload"]["images"]["Server"]["x86_64"][0]["checksums"]["sha256"],
            SHA.to_uppercase()
        );
    }

    #[test]
    fn test_image_v2_keeps_extra_checksums() {
        let mut image = image_json("Server/x86_64/iso/disc1.iso", 1);
        image["checksums"]["md5"] = json!("d41d8cd98f00b204e9800998ecf8427e");
        let raw = json!({
            "header": {"type": "productmd.images", "version": "1.2"},
            "payload": {
                "compose": {"id": "Fedora-39-20231102.0", "type": "production", "date": "20231102", "respin": 0},
                "images": {"Server": {"x86_64": [image]}}
            }
        });
        let doc = MetadataDocument::from_value(&raw).unwrap();
        let v2 = doc.to_value(Some(WireRevision::V2_0)).unwrap();
        let record = &v2["payload"]["images"]["Server"]["x86_64"][0];
        assert_eq!(record["location"]["checksum"], format!("sha256:{SHA}"));
        assert_eq!(record["location"]["size"], 2048);
        assert_eq!(record["additional_checksums"]["md5"], "d41d8cd98f00b204e9800998ecf8427e");
        assert!(record.get("checksums").is_none());

        let back = MetadataDocument::from_value(&v2).unwrap();
        assert_eq!(back.to_value(Some(WireRevision::V1_2)).unwrap(), doc.to_value(None).unwrap());
    }

    #[test]
    fn test_extra_files_v2_file_is_basename() {
        let raw = json!({
            "header": {"type": "productmd.extra_files", "version": "1.2"},
            "payload": {
                "compose": {"id": "Fedora-39-20231102.0", "type": "production", "date": "20231102", "respin": 0},
                "extra_files": {"Server": {"x86_64": [
                    {"file": "Server/x86_64/os/GPL", "size": 18092, "checksums": {"sha256": SHA}}
                ]}}
            }
        });
        let doc = MetadataDocument::from_value(&raw).unwrap();
        let v2 = doc.to_value(Some(WireRevision::V2_0)).unwrap();
        let entry = &v2["payload"]["extra_files"]["Server"]["x86_64"][0];
        assert_eq!(entry["file"], "GPL");
        assert_eq!(entry["location"]["local_path"], "Server/x86_64/os/GPL");
        assert_eq!(entry["location"]["size"], 18092);
    }

    #[test]
    fn test_remote_projection_needs_hint() {
        let raw = json!({
            "header": {"type": "productmd.extra_files", "version": "2.0"},
            "payload": {
                "compose": {"id": "Fedora-39-20231102.0", "type": "production", "date": "20231102", "respin": 0},
                "extra_files": {"Server": {"x86_64": [
                    {"file": "GPL", "location": {"url": "https://cdn.example.com/GPL", "size": 1, "checksum": format!("sha256:{SHA}")}},
                    {"file": "EULA", "location": {"url": "https://cdn.example.com/EULA", "size": 1, "checksum": format!("sha256:{SHA}")}}
                ]}}
            }
        });
        let doc = MetadataDocument::from_value(&raw).unwrap();
        match doc.to_value(Some(WireRevision::V1_2)).unwrap_err() {
            Error::MissingLocalPathHint(refs) => assert_eq!(refs.len(), 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_composeinfo_roundtrip() {
        let mut doc = MetadataDocument::new(DocumentKind::ComposeInfo, WireRevision::V1_2, compose());
        doc.set_release(Release::new("Fedora", "Fedora", "39"));
        let mut server = Variant::new("Server", "Fedora Server", VariantType::Variant).with_arches(["x86_64"]);
        server
            .paths
            .set(PathCategory::OsTree, "x86_64", ArtifactPath::Local("Server/x86_64/os".into()));
        doc.declare_variant(server).unwrap();
        doc.declare_variant(
            Variant::new("Server-optional", "Optional", VariantType::Optional).with_arches(["x86_64"]),
        )
        .unwrap();
        doc.validate().unwrap();

        let value = doc.to_value(None).unwrap();
        assert_eq!(value["payload"]["variants"]["Server"]["variants"], json!(["optional"]));
        assert_eq!(value["payload"]["variants"]["Server"]["paths"]["os_tree"]["x86_64"], "Server/x86_64/os");

        let v2 = doc.to_value(Some(WireRevision::V2_0)).unwrap();
        assert_eq!(
            v2["payload"]["variants"]["Server"]["paths"]["os_tree"]["x86_64"]["local_path"],
            "Server/x86_64/os"
        );

        let back = MetadataDocument::from_value(&value).unwrap();
        assert_eq!(back.to_value(None).unwrap(), value);
        assert_eq!(back.entries().len(), 1);
    }

    #[test]
    fn test_validate_aggregates() {
        let mut doc = MetadataDocument::new(DocumentKind::ComposeInfo, WireRevision::V1_2, compose());
        let mut v = Variant::bare("Server").with_arches(["x86_64"]);
        v.children.push("missing".to_string());
        doc.declare_variant(v).unwrap();
        doc.declare_variant(Variant::bare("Ghost-child")).unwrap();
        match doc.validate().unwrap_err() {
            // no release, undeclared child, undeclared parent
            Error::ValidationError(problems) => assert_eq!(problems.len(), 3, "{problems:?}"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_wrong_header_type() {
        let value = rpms_doc().to_value(None).unwrap();
        assert!(matches!(
            MetadataDocument::from_value_as(&value, DocumentKind::Images),
            Err(Error::UnknownDocumentType { .. })
        ));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rpms.json");
        let doc = rpms_doc();
        doc.save(&path, None).unwrap();
        assert_eq!(MetadataDocument::load(&path).unwrap(), doc);
    }
}
