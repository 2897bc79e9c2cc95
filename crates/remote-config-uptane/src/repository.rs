//! A single TUF trust chain (root, timestamp, snapshot, targets).
//!
//! The Config and Director repositories are both [`Repository`] values; they
//! differ only by [`RepositoryKind`], which names them in logs and errors.
//! Cross-repository rules live in the client, above this layer.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use remote_config_proto::{ConfigMetas, DirectorMetas, PersistedRepository, TopMeta};
use tracing::{debug, info, warn};

use crate::crypto::sha256_hex;
use crate::error::{Result, UptaneError};
use crate::metadata::{
    RoleName, RootMetadata, SnapshotMetadata, TargetsMetadata, TimestampMetadata, META_SNAPSHOT,
};
use crate::verifier::{
    check_expiry, reverify, reverify_root, trust_anchor, verify_hash_chain, verify_root,
    verify_snapshot, verify_targets, verify_timestamp, Verified,
};

/// Which of the two Uptane repositories a chain belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepositoryKind {
    Config,
    Director,
}

impl RepositoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepositoryKind::Config => "config",
            RepositoryKind::Director => "director",
        }
    }
}

impl fmt::Display for RepositoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Candidate metadata for one repository, borrowed from an update bundle.
///
/// Omitted roles fall back to the currently trusted bytes, which are then
/// verified again against the (possibly rotated) root.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetaUpdate<'a> {
    pub roots: &'a [TopMeta],
    pub timestamp: Option<&'a [u8]>,
    pub snapshot: Option<&'a [u8]>,
    pub targets: Option<&'a [u8]>,
}

impl<'a> From<&'a ConfigMetas> for MetaUpdate<'a> {
    fn from(metas: &'a ConfigMetas) -> Self {
        Self {
            roots: &metas.roots,
            timestamp: metas.timestamp.as_ref().map(|meta| meta.raw.as_slice()),
            snapshot: metas.snapshot.as_ref().map(|meta| meta.raw.as_slice()),
            targets: metas.top_targets.as_ref().map(|meta| meta.raw.as_slice()),
        }
    }
}

impl<'a> From<&'a DirectorMetas> for MetaUpdate<'a> {
    fn from(metas: &'a DirectorMetas) -> Self {
        Self {
            roots: &metas.roots,
            timestamp: metas.timestamp.as_ref().map(|meta| meta.raw.as_slice()),
            snapshot: metas.snapshot.as_ref().map(|meta| meta.raw.as_slice()),
            targets: metas.targets.as_ref().map(|meta| meta.raw.as_slice()),
        }
    }
}

/// Metadata state summary containing version, hash and validity information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaState {
    /// Metadata version number.
    pub version: u64,
    /// SHA-256 hash of the metadata contents.
    pub hash: String,
    /// Expiry declared by the metadata.
    pub expires: DateTime<Utc>,
    /// Whether the metadata had expired when the summary was taken.
    pub expired: bool,
}

impl MetaState {
    fn from_verified<T: crate::metadata::SignedRole>(
        verified: &Verified<T>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            version: verified.version(),
            hash: sha256_hex(&verified.raw),
            expires: verified.expires(),
            expired: verified.expires() <= now,
        }
    }
}

/// Currently trusted metadata of one repository.
///
/// Timestamp, snapshot and targets are absent only until the first
/// successful update after bootstrapping from a trust anchor.
#[derive(Debug, Clone, PartialEq)]
pub struct RepositoryState {
    pub root: Verified<RootMetadata>,
    pub timestamp: Option<Verified<TimestampMetadata>>,
    pub snapshot: Option<Verified<SnapshotMetadata>>,
    pub targets: Option<Verified<TargetsMetadata>>,
}

impl RepositoryState {
    /// Seeds a repository from a pinned root.
    pub fn bootstrap(root: &[u8]) -> Result<Self> {
        Ok(Self {
            root: trust_anchor(root)?,
            timestamp: None,
            snapshot: None,
            targets: None,
        })
    }

    /// Rebuilds state from persisted bytes, re-checking every signature.
    pub fn restore(persisted: &PersistedRepository) -> Result<Self> {
        let root = reverify_root(&persisted.root)?;
        let timestamp = persisted
            .timestamp
            .as_deref()
            .map(|bytes| reverify::<TimestampMetadata>(&root.signed, bytes))
            .transpose()?;
        let snapshot = persisted
            .snapshot
            .as_deref()
            .map(|bytes| reverify::<SnapshotMetadata>(&root.signed, bytes))
            .transpose()?;
        let targets = persisted
            .targets
            .as_deref()
            .map(|bytes| reverify::<TargetsMetadata>(&root.signed, bytes))
            .transpose()?;
        Ok(Self {
            root,
            timestamp,
            snapshot,
            targets,
        })
    }

    pub fn to_persisted(&self) -> PersistedRepository {
        PersistedRepository {
            root: self.root.raw.clone(),
            timestamp: self.timestamp.as_ref().map(|meta| meta.raw.clone()),
            snapshot: self.snapshot.as_ref().map(|meta| meta.raw.clone()),
            targets: self.targets.as_ref().map(|meta| meta.raw.clone()),
        }
    }

    /// Per-file summaries keyed by metadata file name (`root.json`, ...).
    pub fn meta_states(&self, now: DateTime<Utc>) -> BTreeMap<String, MetaState> {
        let mut states = BTreeMap::new();
        states.insert(
            RoleName::Root.file_name().to_string(),
            MetaState::from_verified(&self.root, now),
        );
        if let Some(timestamp) = &self.timestamp {
            states.insert(
                RoleName::Timestamp.file_name().to_string(),
                MetaState::from_verified(timestamp, now),
            );
        }
        if let Some(snapshot) = &self.snapshot {
            states.insert(
                RoleName::Snapshot.file_name().to_string(),
                MetaState::from_verified(snapshot, now),
            );
        }
        if let Some(targets) = &self.targets {
            states.insert(
                RoleName::Targets.file_name().to_string(),
                MetaState::from_verified(targets, now),
            );
        }
        states
    }
}

/// One repository's trust chain.
#[derive(Debug, Clone, PartialEq)]
pub struct Repository {
    kind: RepositoryKind,
    state: RepositoryState,
}

impl Repository {
    pub fn new(kind: RepositoryKind, state: RepositoryState) -> Self {
        Self { kind, state }
    }

    pub fn kind(&self) -> RepositoryKind {
        self.kind
    }

    pub fn state(&self) -> &RepositoryState {
        &self.state
    }

    /// Verifies `update` against the trusted chain and returns the state it
    /// would produce. The repository itself is left untouched.
    pub fn stage(&self, update: &MetaUpdate<'_>, now: DateTime<Utc>) -> Result<RepositoryState> {
        let trusted = &self.state;

        // Walk the root chain one candidate at a time; the first rejection ends the update.
        let mut root = trusted.root.clone();
        for candidate in update.roots {
            let next = verify_root(&root, &candidate.raw)
                .map_err(|err| self.reject(RoleName::Root, err))?;
            if next.version() != root.version() {
                info!(
                    repository = %self.kind,
                    from = root.version(),
                    to = next.version(),
                    "uptane: root rotated"
                );
            }
            root = next;
        }
        check_expiry(RoleName::Root, root.expires(), now)
            .map_err(|err| self.reject(RoleName::Root, err))?;

        let timestamp_floor = trusted.timestamp.as_ref().map(Verified::version);
        let snapshot_floor = trusted.snapshot.as_ref().map(Verified::version);
        let targets_floor = trusted.targets.as_ref().map(Verified::version);

        let timestamp_bytes = self.resolve(
            RoleName::Timestamp,
            update.timestamp,
            trusted.timestamp.as_ref().map(|meta| meta.raw.as_slice()),
        )?;
        let snapshot_bytes = self.resolve(
            RoleName::Snapshot,
            update.snapshot,
            trusted.snapshot.as_ref().map(|meta| meta.raw.as_slice()),
        )?;
        let targets_bytes = self.resolve(
            RoleName::Targets,
            update.targets,
            trusted.targets.as_ref().map(|meta| meta.raw.as_slice()),
        )?;

        let timestamp = verify_timestamp(&root.signed, timestamp_floor, timestamp_bytes, now)
            .map_err(|err| self.reject(RoleName::Timestamp, err))?;
        let declared = timestamp.signed.snapshot_meta()?;
        verify_hash_chain(META_SNAPSHOT, declared, snapshot_bytes)
            .map_err(|err| self.reject(RoleName::Snapshot, err))?;
        let snapshot = verify_snapshot(&root.signed, snapshot_floor, snapshot_bytes, now)
            .map_err(|err| self.reject(RoleName::Snapshot, err))?;
        let targets_version_floor = snapshot.signed.targets_version()?;
        let targets = verify_targets(
            &root.signed,
            targets_floor,
            targets_version_floor,
            targets_bytes,
            now,
        )
        .map_err(|err| self.reject(RoleName::Targets, err))?;

        debug!(
            repository = %self.kind,
            root = root.version(),
            timestamp = timestamp.version(),
            snapshot = snapshot.version(),
            targets = targets.version(),
            "uptane: repository metadata verified"
        );
        Ok(RepositoryState {
            root,
            timestamp: Some(timestamp),
            snapshot: Some(snapshot),
            targets: Some(targets),
        })
    }

    /// Stages `update` and, if it verifies, replaces the trusted state.
    pub fn apply_update(&mut self, update: &MetaUpdate<'_>, now: DateTime<Utc>) -> Result<()> {
        self.state = self.stage(update, now)?;
        Ok(())
    }

    /// Bytes to verify for `role`: the incoming document or, when omitted, the trusted one.
    fn resolve<'a>(
        &self,
        role: RoleName,
        incoming: Option<&'a [u8]>,
        trusted: Option<&'a [u8]>,
    ) -> Result<&'a [u8]> {
        if let Some(bytes) = incoming {
            return Ok(bytes);
        }
        // Cold starts still require every role so nothing unauthenticated is trusted.
        trusted.ok_or_else(|| {
            self.reject(
                role,
                UptaneError::malformed(
                    format!("{} {}", self.kind, role),
                    "missing from update and not previously trusted",
                ),
            )
        })
    }

    fn reject(&self, role: RoleName, err: UptaneError) -> UptaneError {
        warn!(
            repository = %self.kind,
            role = %role,
            kind = %err.kind(),
            error = %err,
            "uptane: metadata rejected"
        );
        err
    }
}
