//! Serde models for the four TUF top-level roles.
//!
//! Documents arrive as `{"signatures": [...], "signed": {...}}` envelopes and
//! are decoded with `rust-tuf`'s POUF-1 JSON format. Parsing keeps the
//! canonical encoding of the `signed` object next to the typed view so
//! signatures can be checked against exactly what was parsed.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tuf::crypto::{PublicKey, Signature};
use tuf::metadata::MetadataPath;
use tuf::pouf::{Pouf, Pouf1};

use crate::error::{Result, UptaneError};

/// File name for TUF root metadata.
pub const META_ROOT: &str = "root.json";
/// File name for TUF timestamp metadata.
pub const META_TIMESTAMP: &str = "timestamp.json";
/// File name for TUF snapshot metadata.
pub const META_SNAPSHOT: &str = "snapshot.json";
/// File name for TUF targets metadata.
pub const META_TARGETS: &str = "targets.json";

/// Top-level TUF roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RoleName {
    Root,
    Timestamp,
    Snapshot,
    Targets,
}

impl RoleName {
    /// Value of the `_type` field and key of the role in `root.roles`.
    pub fn as_str(&self) -> &'static str {
        match self {
            RoleName::Root => "root",
            RoleName::Timestamp => "timestamp",
            RoleName::Snapshot => "snapshot",
            RoleName::Targets => "targets",
        }
    }

    /// Metadata file name used in snapshot/timestamp `meta` maps and status output.
    pub fn file_name(&self) -> &'static str {
        match self {
            RoleName::Root => META_ROOT,
            RoleName::Timestamp => META_TIMESTAMP,
            RoleName::Snapshot => META_SNAPSHOT,
            RoleName::Targets => META_TARGETS,
        }
    }

    /// Role path `rust-tuf` attaches to signature failures.
    pub fn metadata_path(&self) -> MetadataPath {
        match self {
            RoleName::Root => MetadataPath::root(),
            RoleName::Timestamp => MetadataPath::timestamp(),
            RoleName::Snapshot => MetadataPath::snapshot(),
            RoleName::Targets => MetadataPath::targets(),
        }
    }
}

impl fmt::Display for RoleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keys authorized for a role and the number of them required to sign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleKeys {
    pub keyids: Vec<String>,
    pub threshold: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RootMetadata {
    #[serde(rename = "_type")]
    pub type_tag: String,
    pub version: u64,
    pub expires: DateTime<Utc>,
    #[serde(default)]
    pub consistent_snapshot: bool,
    /// Declared key id to public key. Ids are taken as declared; signatures
    /// are matched against them rather than against recomputed ids.
    pub keys: BTreeMap<String, PublicKey>,
    pub roles: BTreeMap<String, RoleKeys>,
}

impl RootMetadata {
    /// Returns the key assignment for `role`, if the root declares one.
    pub fn role_keys(&self, role: RoleName) -> Option<&RoleKeys> {
        self.roles.get(role.as_str())
    }
}

/// Version, length and hashes of a metadata file referenced by another role.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MetaFile {
    pub version: u64,
    #[serde(default)]
    pub length: Option<u64>,
    #[serde(default)]
    pub hashes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TimestampMetadata {
    #[serde(rename = "_type")]
    pub type_tag: String,
    pub version: u64,
    pub expires: DateTime<Utc>,
    pub meta: BTreeMap<String, MetaFile>,
}

impl TimestampMetadata {
    /// Snapshot description the timestamp vouches for.
    pub fn snapshot_meta(&self) -> Result<&MetaFile> {
        self.meta
            .get(META_SNAPSHOT)
            .ok_or_else(|| UptaneError::malformed("timestamp", "missing snapshot.json entry"))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SnapshotMetadata {
    #[serde(rename = "_type")]
    pub type_tag: String,
    pub version: u64,
    pub expires: DateTime<Utc>,
    pub meta: BTreeMap<String, MetaFile>,
}

impl SnapshotMetadata {
    /// Version floor the snapshot declares for `targets.json`.
    pub fn targets_version(&self) -> Result<u64> {
        self.meta
            .get(META_TARGETS)
            .map(|entry| entry.version)
            .ok_or_else(|| UptaneError::malformed("snapshot", "missing targets.json entry"))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TargetsMetadata {
    #[serde(rename = "_type")]
    pub type_tag: String,
    pub version: u64,
    pub expires: DateTime<Utc>,
    #[serde(default)]
    pub targets: BTreeMap<String, TargetDescription>,
    #[serde(default)]
    pub custom: Option<Value>,
}

/// Metadata describing an individual target entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDescription {
    /// Advertised file length.
    pub length: u64,
    /// Content hashes keyed by algorithm (e.g., `sha256`).
    #[serde(default)]
    pub hashes: BTreeMap<String, String>,
    /// Optional custom metadata associated with the target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<Value>,
}

/// Common accessors over the signed section of every role.
pub trait SignedRole: DeserializeOwned {
    const ROLE: RoleName;

    fn type_tag(&self) -> &str;
    fn version(&self) -> u64;
    fn expires(&self) -> DateTime<Utc>;
}

macro_rules! impl_signed_role {
    ($ty:ty, $role:expr) => {
        impl SignedRole for $ty {
            const ROLE: RoleName = $role;

            fn type_tag(&self) -> &str {
                &self.type_tag
            }

            fn version(&self) -> u64 {
                self.version
            }

            fn expires(&self) -> DateTime<Utc> {
                self.expires
            }
        }
    };
}

impl_signed_role!(RootMetadata, RoleName::Root);
impl_signed_role!(TimestampMetadata, RoleName::Timestamp);
impl_signed_role!(SnapshotMetadata, RoleName::Snapshot);
impl_signed_role!(TargetsMetadata, RoleName::Targets);

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(default)]
    signatures: Vec<Signature>,
    signed: Value,
}

/// A parsed but not yet verified metadata document.
#[derive(Debug, Clone)]
pub struct Envelope<T> {
    pub signatures: Vec<Signature>,
    pub signed: T,
    /// Canonical JSON encoding of the `signed` object; the message signatures cover.
    pub signed_bytes: Vec<u8>,
}

/// Parses a metadata envelope for role `T` and checks its `_type` tag.
pub fn parse_envelope<T: SignedRole>(bytes: &[u8]) -> Result<Envelope<T>> {
    let role = T::ROLE;
    let raw: RawEnvelope =
        Pouf1::from_slice(bytes).map_err(|err| UptaneError::malformed(role.as_str(), err))?;
    let signed_bytes = Pouf1::canonicalize(&raw.signed)
        .map_err(|err| UptaneError::malformed(role.as_str(), err))?;
    let signed: T = Pouf1::deserialize(&raw.signed)
        .map_err(|err| UptaneError::malformed(role.as_str(), err))?;
    if signed.type_tag() != role.as_str() {
        return Err(UptaneError::malformed(
            role.as_str(),
            format!("unexpected _type '{}'", signed.type_tag()),
        ));
    }
    Ok(Envelope {
        signatures: raw.signatures,
        signed,
        signed_bytes,
    })
}

/// Parses a targets document into its signed section without checking signatures.
///
/// Only used on bytes that were verified when they were committed.
pub fn parse_trusted_targets(bytes: &[u8]) -> Result<TargetsMetadata> {
    Ok(parse_envelope::<TargetsMetadata>(bytes)?.signed)
}
