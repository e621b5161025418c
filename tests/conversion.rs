// tests/conversion.rs
//! Integration tests for upgrading and downgrading metadata documents
//!
//! These tests drive whole documents through the public API:
//! - v1 -> v2 with a base URL, persisted and reloaded
//! - v2 -> v1 with and without localization
//! - checksum computation against files on disk
//! - variant paths in compose info documents

mod common;

use common::{BASH, BASH_SRC, COMPOSE_ID};
use composemd::convert::{self, BaseUrlMapper, UpgradeOptions};
use composemd::localize::{LocalizeOptions, Localizer};
use composemd::model::{ComposeIdentity, PathCategory, Release, VariantType};
use composemd::transfer::LocalTransfer;
use composemd::{
    ArtifactPath, ArtifactRef, DocumentKind, Error, MetadataDocument, Variant, WireRevision,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const CDN: &str = "https://cdn.example.com/compose";

fn cdn_upgrade(doc: &MetadataDocument) -> MetadataDocument {
    let mapper = BaseUrlMapper::new(CDN).unwrap();
    let options = UpgradeOptions {
        mapper: &mapper,
        ..Default::default()
    };
    convert::upgrade(doc, &options).unwrap()
}

fn as_value(doc: &MetadataDocument, version: Option<WireRevision>) -> Value {
    serde_json::from_str(&doc.to_json(version).unwrap()).unwrap()
}

#[test]
fn test_upgrade_bash_with_base_url() {
    let upgraded = cdn_upgrade(&common::rpms_v1());
    let value = as_value(&upgraded, None);

    assert_eq!(value["header"]["type"], "productmd.rpms");
    assert_eq!(value["header"]["version"], "2.0");

    let record = &value["payload"]["rpms"]["Server"]["x86_64"]["bash-0:5.2.15-3.fc39.src"]
        ["bash-0:5.2.15-3.fc39.x86_64"];
    assert_eq!(record["location"]["url"], format!("{CDN}/{BASH}"));
    assert_eq!(record["location"]["local_path"], BASH);
    assert_eq!(record["sigkey"], "18b8e74c");
    assert_eq!(record["category"], "binary");
    assert!(record.get("path").is_none());
}

#[test]
fn test_upgraded_document_survives_save_and_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("rpms.json");
    let upgraded = cdn_upgrade(&common::rpms_v1());

    upgraded.save(&path, None).unwrap();
    let reloaded = MetadataDocument::load(&path).unwrap();
    assert_eq!(reloaded, upgraded);
    assert_eq!(reloaded.revision(), WireRevision::V2_0);
    reloaded.validate().unwrap();
}

#[test]
fn test_downgrade_refuses_remote_files() {
    let upgraded = cdn_upgrade(&common::rpms_v1());
    match convert::downgrade(&upgraded).unwrap_err() {
        Error::RemoteArtifactsPresent(mut refs) => {
            refs.sort();
            let mut expected = vec![
                ArtifactRef::new("Server", "x86_64", BASH),
                ArtifactRef::new("Server", "x86_64", BASH_SRC),
            ];
            expected.sort();
            assert_eq!(refs, expected);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_downgrade_refuses_remote_file_without_hint() {
    let raw = serde_json::json!({
        "header": {"type": "productmd.rpms", "version": "2.0"},
        "payload": {
            "compose": common::compose(),
            "rpms": {"Server": {"x86_64": {"bash-0:5.2.15-3.fc39.src": {"bash-0:5.2.15-3.fc39.x86_64": {
                "location": {"url": "https://x/y.rpm"},
                "sigkey": "18b8e74c",
                "category": "binary"
            }}}}}
        }
    });
    let doc = MetadataDocument::from_value(&raw).unwrap();
    match convert::downgrade(&doc).unwrap_err() {
        Error::RemoteArtifactsPresent(refs) => {
            assert_eq!(refs, vec![ArtifactRef::new("Server", "x86_64", "https://x/y.rpm")]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_downgrade_with_download_restores_legacy_document() {
    let original = common::rpms_v1();
    let upgraded = cdn_upgrade(&original);

    let mirror = TempDir::new().unwrap();
    common::write_file(mirror.path(), BASH, b"bash binary rpm");
    common::write_file(mirror.path(), BASH_SRC, b"bash source rpm");
    let out = TempDir::new().unwrap();

    let transfer = LocalTransfer::new(mirror.path()).with_mirror(CDN, mirror.path());
    let localizer = Localizer::with_options(
        Arc::new(transfer),
        LocalizeOptions {
            retry_delay: Duration::from_millis(1),
            ..Default::default()
        },
    );
    let (legacy, report) = convert::downgrade_with_download(&upgraded, &localizer, out.path())
        .await
        .unwrap();

    assert_eq!(report.succeeded(), 2);
    assert_eq!(std::fs::read(out.path().join(BASH)).unwrap(), b"bash binary rpm");
    assert_eq!(std::fs::read(out.path().join(BASH_SRC)).unwrap(), b"bash source rpm");
    assert_eq!(legacy.revision(), WireRevision::LATEST_V1);
    assert_eq!(
        legacy.to_json(None).unwrap(),
        original.to_json(Some(WireRevision::LATEST_V1)).unwrap()
    );
}

#[test]
fn test_extra_files_round_trip_with_computed_checksums() {
    let root = TempDir::new().unwrap();
    let files: [(&str, &[u8]); 2] = [("GPL", b"GNU GENERAL PUBLIC LICENSE"), ("EULA", b"eula")];
    for (name, body) in files {
        common::write_file(root.path(), &format!("Server/x86_64/os/{name}"), body);
    }
    let original = common::extra_files_v1(&files);

    let options = UpgradeOptions {
        compute_checksums: true,
        compose_root: root.path(),
        ..Default::default()
    };
    let upgraded = convert::upgrade(&original, &options).unwrap();

    let value = as_value(&upgraded, None);
    let entries = value["payload"]["extra_files"]["Server"]["x86_64"].as_array().unwrap();
    let gpl = entries.iter().find(|e| e["file"] == "GPL").unwrap();
    assert_eq!(gpl["location"]["url"], "Server/x86_64/os/GPL");
    assert_eq!(gpl["location"]["size"], 26);
    assert_eq!(
        gpl["location"]["checksum"],
        format!("sha256:{}", common::sha256(b"GNU GENERAL PUBLIC LICENSE"))
    );

    let restored = convert::downgrade(&upgraded).unwrap();
    assert_eq!(
        restored.to_json(None).unwrap(),
        original.to_json(Some(WireRevision::LATEST_V1)).unwrap()
    );
}

#[test]
fn test_upgrade_catches_files_changed_after_compose() {
    let root = TempDir::new().unwrap();
    let original = common::extra_files_v1(&[("GPL", b"license v3"), ("EULA", b"eula")]);
    common::write_file(root.path(), "Server/x86_64/os/GPL", b"license v2");
    common::write_file(root.path(), "Server/x86_64/os/EULA", b"eula");

    let options = UpgradeOptions {
        compute_checksums: true,
        compose_root: root.path(),
        ..Default::default()
    };
    match convert::upgrade(&original, &options).unwrap_err() {
        Error::InconsistentArtifacts(refs) => {
            assert_eq!(refs, vec![ArtifactRef::new("Server", "x86_64", "Server/x86_64/os/GPL")]);
        }
        other => panic!("unexpected error: {other}"),
    }

    // nothing is hashed without the flag, so the stale record passes through
    assert!(convert::upgrade(&original, &UpgradeOptions::default()).is_ok());
}

#[test]
fn test_composeinfo_variant_paths_round_trip() {
    let mut original = MetadataDocument::new(
        DocumentKind::ComposeInfo,
        WireRevision::V1_2,
        ComposeIdentity::from_id(COMPOSE_ID).unwrap(),
    );
    original.set_release(Release::new("Fedora", "Fedora", "39"));
    let mut server = Variant::new("Server", "Fedora Server", VariantType::Variant).with_arches(["x86_64"]);
    server
        .paths
        .set(PathCategory::OsTree, "x86_64", ArtifactPath::Local("Server/x86_64/os".into()));
    server.paths.set(
        PathCategory::Packages,
        "x86_64",
        ArtifactPath::Local("Server/x86_64/os/Packages".into()),
    );
    original.declare_variant(server).unwrap();
    original.validate().unwrap();

    let upgraded = cdn_upgrade(&original);
    let value = as_value(&upgraded, None);
    let os_tree = &value["payload"]["variants"]["Server"]["paths"]["os_tree"]["x86_64"];
    assert_eq!(os_tree["url"], format!("{CDN}/Server/x86_64/os"));
    assert_eq!(os_tree["local_path"], "Server/x86_64/os");

    // directories are never fetched, so remote variant paths downgrade directly
    let restored = convert::downgrade(&upgraded).unwrap();
    assert_eq!(
        restored.to_json(None).unwrap(),
        original.to_json(Some(WireRevision::LATEST_V1)).unwrap()
    );
}

#[test]
fn test_upgrade_of_distributed_document_is_a_no_op() {
    let upgraded = cdn_upgrade(&common::rpms_v1());
    let again = cdn_upgrade(&upgraded);
    assert_eq!(again, upgraded);
}
