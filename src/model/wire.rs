// src/model/wire.rs

//! Serde records for each major wire revision
//!
//! v1 records store plain relative paths; v2 records store [`Location`]
//! objects. Minor revisions of the same major share a record and differ only
//! in optional fields.

use super::compose::Release;
use crate::location::Location;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Serialize, Deserialize)]
pub(super) struct RpmRecordV1 {
    pub path: String,
    pub sigkey: Option<String>,
    pub category: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub(super) struct RpmRecordV2 {
    pub location: Location,
    pub sigkey: Option<String>,
    pub category: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub(super) struct ImageRecordV1 {
    pub path: String,
    pub mtime: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    pub volume_id: Option<String>,
    #[serde(rename = "type")]
    pub image_type: String,
    pub format: String,
    pub arch: String,
    pub disc_number: u32,
    pub disc_count: u32,
    #[serde(default)]
    pub checksums: BTreeMap<String, String>,
    pub implant_md5: Option<String>,
    #[serde(default)]
    pub bootable: bool,
    /// Absent before 1.1
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subvariant: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(super) struct ImageRecordV2 {
    pub location: Location,
    pub mtime: i64,
    pub volume_id: Option<String>,
    #[serde(rename = "type")]
    pub image_type: String,
    pub format: String,
    pub arch: String,
    pub disc_number: u32,
    pub disc_count: u32,
    pub implant_md5: Option<String>,
    #[serde(default)]
    pub bootable: bool,
    #[serde(default)]
    pub subvariant: String,
    /// Legacy checksums of algorithms other than the location's
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub additional_checksums: BTreeMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(super) struct ExtraFileRecordV1 {
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default)]
    pub checksums: BTreeMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(super) struct ExtraFileRecordV2 {
    /// Base name only; the full path is the location's `local_path`
    pub file: String,
    pub location: Location,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub additional_checksums: BTreeMap<String, String>,
}

/// Variant as stored in compose info; `P` is a path string (v1) or a
/// [`Location`] (v2)
#[derive(Debug, Serialize, Deserialize)]
pub(super) struct VariantRecord<P> {
    pub id: String,
    pub uid: String,
    pub name: String,
    #[serde(rename = "type")]
    pub variant_type: String,
    #[serde(default)]
    pub arches: Vec<String>,
    #[serde(default = "BTreeMap::new")]
    pub paths: BTreeMap<String, BTreeMap<String, P>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variants: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<Release>,
}
