// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use composemd::hash::{HashAlgorithm, hash_bytes};
use composemd::transfer::{ByteStream, Transfer};
use composemd::{Error, Location, MetadataDocument};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::Path;

pub const COMPOSE_ID: &str = "Fedora-39-20231102.0";

pub const BASH: &str = "Server/x86_64/os/Packages/b/bash-5.2.15-3.fc39.x86_64.rpm";
pub const BASH_SRC: &str = "Server/source/tree/Packages/b/bash-5.2.15-3.fc39.src.rpm";

pub fn compose() -> Value {
    json!({"id": COMPOSE_ID, "type": "production", "date": "20231102", "respin": 0})
}

pub fn sha256(body: &[u8]) -> String {
    hash_bytes(HashAlgorithm::Sha256, body).digest().to_string()
}

pub fn md5(body: &[u8]) -> String {
    hash_bytes(HashAlgorithm::Md5, body).digest().to_string()
}

/// Write `body` at `root/rel`, creating parent directories
pub fn write_file(root: &Path, rel: &str, body: &[u8]) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, body).unwrap();
}

/// Legacy RPM manifest with bash and its source package
pub fn rpms_v1() -> MetadataDocument {
    MetadataDocument::from_value(&json!({
        "header": {"type": "productmd.rpms", "version": "1.2"},
        "payload": {
            "compose": compose(),
            "rpms": {
                "Server": {
                    "x86_64": {
                        "bash-0:5.2.15-3.fc39.src": {
                            "bash-0:5.2.15-3.fc39.x86_64": {
                                "path": BASH,
                                "sigkey": "18b8e74c",
                                "category": "binary"
                            },
                            "bash-0:5.2.15-3.fc39.src": {
                                "path": BASH_SRC,
                                "sigkey": "18b8e74c",
                                "category": "source"
                            }
                        }
                    }
                }
            }
        }
    }))
    .unwrap()
}

/// Legacy extra files manifest; every file gets both md5 and sha256 records
pub fn extra_files_v1(files: &[(&str, &[u8])]) -> MetadataDocument {
    let entries: Vec<Value> = files
        .iter()
        .map(|(name, body)| {
            json!({
                "file": format!("Server/x86_64/os/{name}"),
                "size": body.len(),
                "checksums": {"md5": md5(body), "sha256": sha256(body)}
            })
        })
        .collect();
    MetadataDocument::from_value(&json!({
        "header": {"type": "productmd.extra_files", "version": "1.2"},
        "payload": {
            "compose": compose(),
            "extra_files": {"Server": {"x86_64": entries}}
        }
    }))
    .unwrap()
}

pub fn image(subvariant: &str, body: &[u8]) -> Value {
    json!({
        "path": format!("Server/x86_64/images/Fedora-{subvariant}-39.x86_64.qcow2"),
        "mtime": 1698900000,
        "size": body.len(),
        "volume_id": null,
        "type": "qcow2",
        "format": "qcow2",
        "arch": "x86_64",
        "disc_number": 1,
        "disc_count": 1,
        "checksums": {"sha256": sha256(body)},
        "implant_md5": null,
        "bootable": false,
        "subvariant": subvariant
    })
}

/// Legacy images manifest with one qcow2 image per subvariant
pub fn images_v1(images: &[(&str, &[u8])]) -> MetadataDocument {
    let entries: Vec<Value> = images.iter().map(|(sub, body)| image(sub, body)).collect();
    MetadataDocument::from_value(&json!({
        "header": {"type": "productmd.images", "version": "1.2"},
        "payload": {
            "compose": compose(),
            "images": {"Server": {"x86_64": entries}}
        }
    }))
    .unwrap()
}

/// Serves fixed bytes by reference URL
#[derive(Default)]
pub struct MemoryTransfer {
    objects: HashMap<String, Vec<u8>>,
}

impl MemoryTransfer {
    pub fn with(mut self, url: &str, body: &[u8]) -> Self {
        self.objects.insert(url.to_string(), body.to_vec());
        self
    }
}

#[async_trait]
impl Transfer for MemoryTransfer {
    async fn fetch(&self, location: &Location) -> composemd::Result<ByteStream> {
        let url = location.url();
        let body = self
            .objects
            .get(&url)
            .cloned()
            .ok_or_else(|| Error::TransferError(format!("404 {url}")))?;
        Ok(Box::pin(std::io::Cursor::new(body)))
    }

    async fn exists(&self, location: &Location) -> bool {
        self.objects.contains_key(&location.url())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// OCI image layout archive holding each blob under `blobs/sha256/<hex>`
pub fn layout_tar(blobs: &[&[u8]]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for blob in blobs {
        let mut header = tar::Header::new_gnu();
        header.set_size(blob.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, format!("blobs/sha256/{}", sha256(blob)), *blob)
            .unwrap();
    }
    builder.into_inner().unwrap()
}
