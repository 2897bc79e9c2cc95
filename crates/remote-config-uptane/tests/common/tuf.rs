// Minimal TUF signing helpers shared across tests.
//
// These fixtures produce signed metadata and target payloads so tests can
// emulate backend-issued Uptane repositories without reproducing the signing
// logic inline. Keys are derived from fixed seeds, so every run signs the
// same bytes. Key ids, canonical encoding and signatures all come from
// rust-tuf.
use std::collections::BTreeMap;
use std::sync::Arc;

use ed25519_dalek::SigningKey;
use remote_config_proto::{ConfigMetas, DirectorMetas, File, LatestConfigsResponse, TopMeta};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tuf::crypto::{Ed25519PrivateKey, PrivateKey};
use tuf::pouf::{Pouf, Pouf1};

/// Expiry used for metadata that should stay valid for the whole test run.
pub(crate) const FAR_FUTURE: &str = "2099-01-01T00:00:00Z";

/// Deterministic Ed25519 key plus its TUF key id.
#[derive(Clone)]
pub(crate) struct TestKey {
    private: Arc<Ed25519PrivateKey>,
    id: String,
}

impl TestKey {
    pub(crate) fn from_seed(seed: u8) -> Self {
        let keypair = SigningKey::from_bytes(&[seed; 32]).to_keypair_bytes();
        let private = Ed25519PrivateKey::from_ed25519(&keypair).expect("seeded ed25519 key");
        let id = private.public().key_id().to_string();
        Self {
            private: Arc::new(private),
            id,
        }
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn private(&self) -> &Ed25519PrivateKey {
        &self.private
    }

    /// Key object as it appears in a root document's `keys` map.
    pub(crate) fn public_json(&self) -> Value {
        serde_json::to_value(self.private.public()).expect("public key serializes")
    }

    fn sign(&self, message: &[u8]) -> Value {
        let signature = self.private.sign(message).expect("ed25519 signing");
        serde_json::to_value(signature).expect("signature serializes")
    }
}

/// Wraps `signed` in an envelope signed by every key in `signers`.
pub(crate) fn sign_with(signed: &Value, signers: &[&TestKey]) -> Vec<u8> {
    let message = Pouf1::canonicalize(signed).expect("signed section canonicalizes");
    let signatures: Vec<Value> = signers.iter().map(|key| key.sign(&message)).collect();
    serde_json::to_vec(&json!({"signatures": signatures, "signed": signed}))
        .expect("envelope serializes")
}

/// Describes the declared length and sha256 of a payload.
pub(crate) fn target_entry(payload: &[u8]) -> Value {
    json!({
        "length": payload.len(),
        "hashes": {"sha256": sha256_hex(payload)},
    })
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Role versions for one signed repository snapshot.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Versions {
    pub timestamp: u64,
    pub snapshot: u64,
    pub targets: u64,
}

/// Signed top-level metadata of one repository.
#[derive(Clone)]
pub(crate) struct Metas {
    pub roots: Vec<TopMeta>,
    pub timestamp: TopMeta,
    pub snapshot: TopMeta,
    pub targets: TopMeta,
}

impl Metas {
    pub(crate) fn config(self) -> ConfigMetas {
        ConfigMetas {
            roots: self.roots,
            timestamp: Some(self.timestamp),
            snapshot: Some(self.snapshot),
            top_targets: Some(self.targets),
        }
    }

    pub(crate) fn director(self) -> DirectorMetas {
        DirectorMetas {
            roots: self.roots,
            timestamp: Some(self.timestamp),
            snapshot: Some(self.snapshot),
            targets: Some(self.targets),
        }
    }
}

/// A signing repository whose keys and root history can be evolved by tests.
#[derive(Clone)]
pub(crate) struct TestRepo {
    pub root_keys: Vec<TestKey>,
    pub root_threshold: u32,
    pub timestamp_key: TestKey,
    pub snapshot_key: TestKey,
    pub targets_key: TestKey,
    /// Expiry written into metadata signed from now on.
    pub expires: String,
    roots: Vec<Vec<u8>>,
}

impl TestRepo {
    /// Builds a repository whose keys derive from `seed..seed + 4`, with root version 1.
    pub(crate) fn new(seed: u8) -> Self {
        let mut repo = Self {
            root_keys: vec![TestKey::from_seed(seed)],
            root_threshold: 1,
            timestamp_key: TestKey::from_seed(seed.wrapping_add(1)),
            snapshot_key: TestKey::from_seed(seed.wrapping_add(2)),
            targets_key: TestKey::from_seed(seed.wrapping_add(3)),
            expires: FAR_FUTURE.to_string(),
            roots: Vec::new(),
        };
        let keys: Vec<TestKey> = repo.root_keys.clone();
        let signers: Vec<&TestKey> = keys.iter().collect();
        let root = repo.signed_root(1, &signers);
        repo.roots.push(root);
        repo
    }

    /// Signed root for `version` from the recorded history.
    pub(crate) fn root(&self, version: u64) -> Vec<u8> {
        self.roots[(version - 1) as usize].clone()
    }

    pub(crate) fn root_version(&self) -> u64 {
        self.roots.len() as u64
    }

    /// Replaces every key with ones derived from `seed` and records the next
    /// root version, signed by both the previous and the new root keys.
    pub(crate) fn rotate_root(&mut self, seed: u8) {
        let previous = self.root_keys.clone();
        self.root_keys = vec![TestKey::from_seed(seed)];
        self.timestamp_key = TestKey::from_seed(seed.wrapping_add(1));
        self.snapshot_key = TestKey::from_seed(seed.wrapping_add(2));
        self.targets_key = TestKey::from_seed(seed.wrapping_add(3));
        let current = self.root_keys.clone();
        let signers: Vec<&TestKey> = previous.iter().chain(current.iter()).collect();
        let version = self.root_version() + 1;
        let root = self.signed_root(version, &signers);
        self.roots.push(root);
    }

    /// Root `signed` section describing the repository's current keys.
    pub(crate) fn root_json(&self, version: u64) -> Value {
        let mut keys = serde_json::Map::new();
        for key in self
            .root_keys
            .iter()
            .chain([&self.timestamp_key, &self.snapshot_key, &self.targets_key])
        {
            keys.insert(key.id().to_string(), key.public_json());
        }
        let root_ids: Vec<&str> = self.root_keys.iter().map(TestKey::id).collect();
        json!({
            "_type": "root",
            "spec_version": "1.0",
            "version": version,
            "expires": self.expires,
            "consistent_snapshot": true,
            "keys": keys,
            "roles": {
                "root": {"keyids": root_ids, "threshold": self.root_threshold},
                "timestamp": {"keyids": [self.timestamp_key.id()], "threshold": 1},
                "snapshot": {"keyids": [self.snapshot_key.id()], "threshold": 1},
                "targets": {"keyids": [self.targets_key.id()], "threshold": 1},
            },
        })
    }

    pub(crate) fn signed_root(&self, version: u64, signers: &[&TestKey]) -> Vec<u8> {
        sign_with(&self.root_json(version), signers)
    }

    pub(crate) fn timestamp_json(
        &self,
        version: u64,
        snapshot: &[u8],
        snapshot_version: u64,
    ) -> Value {
        json!({
            "_type": "timestamp",
            "spec_version": "1.0",
            "version": version,
            "expires": self.expires,
            "meta": {
                "snapshot.json": {
                    "version": snapshot_version,
                    "length": snapshot.len(),
                    "hashes": {"sha256": sha256_hex(snapshot)},
                }
            },
        })
    }

    pub(crate) fn signed_timestamp(
        &self,
        version: u64,
        snapshot: &[u8],
        snapshot_version: u64,
    ) -> Vec<u8> {
        sign_with(
            &self.timestamp_json(version, snapshot, snapshot_version),
            &[&self.timestamp_key],
        )
    }

    pub(crate) fn snapshot_json(&self, version: u64, targets_version: u64) -> Value {
        json!({
            "_type": "snapshot",
            "spec_version": "1.0",
            "version": version,
            "expires": self.expires,
            "meta": {"targets.json": {"version": targets_version}},
        })
    }

    pub(crate) fn signed_snapshot(&self, version: u64, targets_version: u64) -> Vec<u8> {
        sign_with(
            &self.snapshot_json(version, targets_version),
            &[&self.snapshot_key],
        )
    }

    pub(crate) fn targets_json(&self, version: u64, targets: &[(&str, &[u8])]) -> Value {
        let entries: BTreeMap<&str, Value> = targets
            .iter()
            .map(|(path, payload)| (*path, target_entry(payload)))
            .collect();
        json!({
            "_type": "targets",
            "spec_version": "1.0",
            "version": version,
            "expires": self.expires,
            "targets": entries,
        })
    }

    pub(crate) fn signed_targets(&self, version: u64, targets: &[(&str, &[u8])]) -> Vec<u8> {
        sign_with(&self.targets_json(version, targets), &[&self.targets_key])
    }

    /// Signs a consistent timestamp/snapshot/targets set plus the root history.
    pub(crate) fn metas(&self, versions: Versions, targets: &[(&str, &[u8])]) -> Metas {
        let targets_raw = self.signed_targets(versions.targets, targets);
        let snapshot_raw = self.signed_snapshot(versions.snapshot, versions.targets);
        let timestamp_raw =
            self.signed_timestamp(versions.timestamp, &snapshot_raw, versions.snapshot);
        Metas {
            roots: self
                .roots
                .iter()
                .enumerate()
                .map(|(idx, raw)| top_meta(idx as u64 + 1, raw.clone()))
                .collect(),
            timestamp: top_meta(versions.timestamp, timestamp_raw),
            snapshot: top_meta(versions.snapshot, snapshot_raw),
            targets: top_meta(versions.targets, targets_raw),
        }
    }
}

pub(crate) fn top_meta(version: u64, raw: Vec<u8>) -> TopMeta {
    TopMeta { version, raw }
}

/// Assembles an update bundle from both repositories' metadata and payloads.
pub(crate) fn bundle(
    config: ConfigMetas,
    director: DirectorMetas,
    files: &[(&str, &[u8])],
) -> LatestConfigsResponse {
    LatestConfigsResponse {
        config_metas: Some(config),
        director_metas: Some(director),
        target_files: files
            .iter()
            .map(|(path, raw)| File {
                path: path.to_string(),
                raw: raw.to_vec(),
            })
            .collect(),
    }
}

/// Config/Director repository pair mirroring the backend's version layout:
/// config roles at 10+v / 100+v / 1000+v, director roles at 20+v / 200+v / 2000+v.
#[derive(Clone)]
pub(crate) struct TestRepositories {
    pub config: TestRepo,
    pub director: TestRepo,
}

impl TestRepositories {
    pub(crate) fn new() -> Self {
        Self {
            config: TestRepo::new(1),
            director: TestRepo::new(101),
        }
    }

    pub(crate) fn config_versions(v: u64) -> Versions {
        Versions {
            timestamp: 10 + v,
            snapshot: 1000 + v,
            targets: 100 + v,
        }
    }

    pub(crate) fn director_versions(v: u64) -> Versions {
        Versions {
            timestamp: 20 + v,
            snapshot: 2000 + v,
            targets: 200 + v,
        }
    }

    /// Pinned roots the client starts from.
    pub(crate) fn anchors(&self) -> (Vec<u8>, Vec<u8>) {
        (self.config.root(1), self.director.root(1))
    }

    /// Bundle at generation `v` with separate config and director target sets.
    pub(crate) fn bundle(
        &self,
        v: u64,
        config_targets: &[(&str, &[u8])],
        director_targets: &[(&str, &[u8])],
        files: &[(&str, &[u8])],
    ) -> LatestConfigsResponse {
        bundle(
            self.config
                .metas(Self::config_versions(v), config_targets)
                .config(),
            self.director
                .metas(Self::director_versions(v), director_targets)
                .director(),
            files,
        )
    }
}
