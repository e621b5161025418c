// src/model/compose.rs

//! Compose identity and release description

use crate::error::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

static COMPOSE_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^.*\d{8}(\.nightly|\.n|\.ci|\.test|\.t)?(\.\d+)?").expect("valid compose id regex")
});

static DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{8}$").expect("valid date regex"));

static DATE_TYPE_RESPIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^.*(?P<date>\d{8})(?P<type>\.[a-z]+)?(\.(?P<respin>\d+))?.*$")
        .expect("valid date/type/respin regex")
});

static LABEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<name>[A-Za-z]+)-(?P<major>\d+)\.(?P<minor>\d+)$").expect("valid label regex")
});

/// Milestone names, in release order
pub const LABEL_NAMES: &[&str] = &[
    "EA",
    "DevelPhaseExit",
    "InternalAlpha",
    "Alpha",
    "InternalSnapshot",
    "Beta",
    "Snapshot",
    "RC",
    "Update",
    "SecurityFix",
];

/// Kind of compose, ordered by rank (test < ci < nightly < production)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComposeType {
    Test,
    Ci,
    Nightly,
    Production,
}

impl ComposeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Test => "test",
            Self::Ci => "ci",
            Self::Nightly => "nightly",
            Self::Production => "production",
        }
    }

    /// Suffix appended to the date in compose ids
    pub fn id_suffix(&self) -> &'static str {
        match self {
            Self::Test => ".t",
            Self::Ci => ".ci",
            Self::Nightly => ".n",
            Self::Production => "",
        }
    }

    fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "t" | "test" => Some(Self::Test),
            "ci" => Some(Self::Ci),
            "n" | "nightly" => Some(Self::Nightly),
            _ => None,
        }
    }
}

impl fmt::Display for ComposeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComposeType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "test" => Ok(Self::Test),
            "ci" => Ok(Self::Ci),
            "nightly" => Ok(Self::Nightly),
            "production" => Ok(Self::Production),
            _ => Err(Error::ParseError(format!("unknown compose type '{s}'"))),
        }
    }
}

/// Milestone label such as `Beta-1.0`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Label {
    pub name: String,
    pub major: u32,
    pub minor: u32,
}

impl Label {
    fn rank(&self) -> usize {
        LABEL_NAMES
            .iter()
            .position(|n| *n == self.name)
            .unwrap_or(LABEL_NAMES.len())
    }
}

impl FromStr for Label {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::ParseError(format!("label '{s}' is not '<Milestone>-<major>.<minor>'"));
        let caps = LABEL_RE.captures(s).ok_or_else(invalid)?;
        let name = &caps["name"];
        if !LABEL_NAMES.contains(&name) {
            return Err(Error::ParseError(format!("unknown milestone '{name}' in label '{s}'")));
        }
        Ok(Self {
            name: name.to_string(),
            major: caps["major"].parse().map_err(|_| invalid())?,
            minor: caps["minor"].parse().map_err(|_| invalid())?,
        })
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}.{}", self.name, self.major, self.minor)
    }
}

impl PartialOrd for Label {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Label {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank()
            .cmp(&other.rank())
            .then(self.major.cmp(&other.major))
            .then(self.minor.cmp(&other.minor))
    }
}

/// Recover (date, type, respin) from a compose id
///
/// `Fedora-39-20231102.n.2` yields `("20231102", Nightly, 2)`; a missing
/// suffix means production and a missing respin means 0.
pub fn parse_compose_id(id: &str) -> Result<(String, ComposeType, u32)> {
    let caps = DATE_TYPE_RESPIN_RE
        .captures(id)
        .ok_or_else(|| Error::ParseError(format!("no date found in compose id '{id}'")))?;

    let compose_type = match caps.name("type") {
        None => ComposeType::Production,
        Some(m) => ComposeType::from_suffix(&m.as_str()[1..]).ok_or_else(|| {
            Error::ParseError(format!("unknown compose type suffix '{}' in '{id}'", m.as_str()))
        })?,
    };
    let respin = match caps.name("respin") {
        Some(m) => m
            .as_str()
            .parse()
            .map_err(|_| Error::ParseError(format!("respin out of range in '{id}'")))?,
        None => 0,
    };

    Ok((caps["date"].to_string(), compose_type, respin))
}

/// Immutable identity of one compose
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComposeIdentity {
    pub id: String,
    #[serde(rename = "type")]
    pub compose_type: ComposeType,
    pub date: String,
    pub respin: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(rename = "final", default, skip_serializing_if = "std::ops::Not::not")]
    pub is_final: bool,
}

impl ComposeIdentity {
    /// Build and validate an identity
    pub fn new(id: &str, compose_type: ComposeType, date: &str, respin: u32) -> Result<Self> {
        let identity = Self {
            id: id.to_string(),
            compose_type,
            date: date.to_string(),
            respin,
            label: None,
            is_final: false,
        };
        let problems = identity.problems();
        if problems.is_empty() {
            Ok(identity)
        } else {
            Err(Error::ValidationError(problems))
        }
    }

    /// Build an identity from an id alone
    pub fn from_id(id: &str) -> Result<Self> {
        let (date, compose_type, respin) = parse_compose_id(id)?;
        Self::new(id, compose_type, &date, respin)
    }

    pub fn with_label(mut self, label: &str, is_final: bool) -> Result<Self> {
        label.parse::<Label>()?;
        self.label = Some(label.to_string());
        self.is_final = is_final;
        Ok(self)
    }

    pub fn parsed_label(&self) -> Option<Label> {
        self.label.as_deref().and_then(|l| l.parse().ok())
    }

    /// `<date><type suffix>.<respin>`, e.g. `20231102.n.0`
    pub fn date_type_respin(&self) -> String {
        format!("{}{}.{}", self.date, self.compose_type.id_suffix(), self.respin)
    }

    /// Same compose: id, date, type and respin all agree (labels may differ)
    pub fn same_compose(&self, other: &Self) -> bool {
        self.id == other.id
            && self.date == other.date
            && self.compose_type == other.compose_type
            && self.respin == other.respin
    }

    /// Every rule this identity breaks
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.id.trim().is_empty() {
            problems.push("compose.id must not be blank".to_string());
        } else if !COMPOSE_ID_RE.is_match(&self.id) {
            problems.push(format!("compose.id '{}' does not contain a compose date", self.id));
        }
        if !DATE_RE.is_match(&self.date) {
            problems.push(format!("compose.date '{}' is not YYYYMMDD", self.date));
        }
        if let Some(label) = &self.label
            && let Err(e) = label.parse::<Label>()
        {
            problems.push(format!("compose.label: {e}"));
        }
        problems
    }
}

impl PartialOrd for ComposeIdentity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ComposeIdentity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.date
            .cmp(&other.date)
            .then(self.compose_type.cmp(&other.compose_type))
            .then(self.respin.cmp(&other.respin))
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl fmt::Display for ComposeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// Product release a compose belongs to (compose info documents only)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub name: String,
    pub short: String,
    pub version: String,
    #[serde(rename = "type", default = "default_release_type")]
    pub release_type: String,
    #[serde(default)]
    pub internal: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_layered: bool,
}

fn default_release_type() -> String {
    "ga".to_string()
}

impl Release {
    pub fn new(name: &str, short: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            short: short.to_string(),
            version: version.to_string(),
            release_type: default_release_type(),
            internal: false,
            is_layered: false,
        }
    }

    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        for (field, value) in [
            ("name", &self.name),
            ("short", &self.short),
            ("version", &self.version),
            ("type", &self.release_type),
        ] {
            if value.trim().is_empty() {
                problems.push(format!("release.{field} must not be blank"));
            }
        }
        problems
    }
}

impl fmt::Display for Release {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.short, self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_compose_id() {
        assert_eq!(
            parse_compose_id("Fedora-39-20231102.n.2").unwrap(),
            ("20231102".to_string(), ComposeType::Nightly, 2)
        );
        assert_eq!(
            parse_compose_id("RHEL-9.4-20240101.0").unwrap(),
            ("20240101".to_string(), ComposeType::Production, 0)
        );
        assert_eq!(
            parse_compose_id("Fedora-Rawhide-20240101.t.1").unwrap().1,
            ComposeType::Test
        );
        assert_eq!(parse_compose_id("X-20240101.ci.3").unwrap().1, ComposeType::Ci);
        assert!(parse_compose_id("no-date-here").is_err());
        assert!(parse_compose_id("X-20240101.zz.1").is_err());
    }

    #[test]
    fn test_identity_validation() {
        assert!(ComposeIdentity::new("Test-1.0-20240101.0", ComposeType::Production, "20240101", 0).is_ok());

        match ComposeIdentity::new("", ComposeType::Test, "2024-01-01", 0).unwrap_err() {
            Error::ValidationError(problems) => assert_eq!(problems.len(), 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_identity_ordering() {
        let a = ComposeIdentity::from_id("F-20240101.n.0").unwrap();
        let b = ComposeIdentity::from_id("F-20240101.0").unwrap();
        let c = ComposeIdentity::from_id("F-20240101.1").unwrap();
        let d = ComposeIdentity::from_id("F-20240102.t.0").unwrap();
        let mut ids = vec![d.clone(), c.clone(), a.clone(), b.clone()];
        ids.sort();
        assert_eq!(ids, vec![a, b, c, d]);
    }

    #[test]
    fn test_labels() {
        let label: Label = "Beta-1.0".parse().unwrap();
        assert_eq!(label.to_string(), "Beta-1.0");
        assert!("Gamma-1.0".parse::<Label>().is_err());
        assert!("Beta-1".parse::<Label>().is_err());

        let alpha: Label = "Alpha-2.0".parse().unwrap();
        let rc: Label = "RC-1.0".parse().unwrap();
        assert!(alpha < label && label < rc);

        let id = ComposeIdentity::from_id("F-20240101.0")
            .unwrap()
            .with_label("RC-1.1", true)
            .unwrap();
        assert_eq!(id.parsed_label(), Some("RC-1.1".parse().unwrap()));
    }

    #[test]
    fn test_identity_wire_format() {
        let id = ComposeIdentity::from_id("Fedora-39-20231102.n.0").unwrap();
        let value = serde_json::to_value(&id).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "id": "Fedora-39-20231102.n.0",
                "type": "nightly",
                "date": "20231102",
                "respin": 0
            })
        );
        assert_eq!(id.date_type_respin(), "20231102.n.0");

        let labelled = id.with_label("Beta-1.0", true).unwrap();
        let value = serde_json::to_value(&labelled).unwrap();
        assert_eq!(value["label"], "Beta-1.0");
        assert_eq!(value["final"], true);
    }
}
