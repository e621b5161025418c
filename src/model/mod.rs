// src/model/mod.rs

//! In-memory model of compose metadata documents

pub mod artifact;
pub mod compose;
pub mod document;
pub mod variant;
mod wire;

pub use artifact::{
    Artifact, ArtifactKey, ArtifactKind, ArtifactPath, ExtraFileEntry, ImageEntry, Nevra,
    RpmCategory, RpmEntry,
};
pub use compose::{ComposeIdentity, ComposeType, Label, Release};
pub use document::{Entry, EntryContext, MetadataDocument, to_canonical_json};
pub use variant::{PathCategory, PathSet, Variant, VariantType};

/// Architectures accepted as variant/arch keys
pub const RPM_ARCHES: &[&str] = &[
    "aarch64", "alpha", "alphaev4", "alphaev45", "alphaev5", "alphaev56", "alphaev6",
    "alphaev67", "alphaev68", "alphaev7", "alphapca56", "amd64", "arm64", "armhfp", "armv5tejl",
    "armv5tel", "armv6hl", "armv6l", "armv7hl", "armv7hnl", "armv7l", "athlon", "geode", "i386",
    "i486", "i586", "i686", "ia32e", "ia64", "ppc", "ppc64", "ppc64iseries", "ppc64le", "ppc64p7",
    "ppc64pseries", "riscv64", "s390", "s390x", "sh3", "sh4", "sh4a", "sparc", "sparc64",
    "sparc64v", "sparcv8", "sparcv9", "sparcv9v", "x86_64", "src", "nosrc", "noarch",
];

pub fn is_known_arch(arch: &str) -> bool {
    RPM_ARCHES.contains(&arch)
}
