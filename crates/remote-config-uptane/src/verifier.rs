//! Stateless TUF verification predicates.
//!
//! Every function here is a pure function of its inputs, including the
//! verification time, so resubmitting the same bundle always yields the same
//! verdict.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use tuf::crypto::{KeyId, PublicKey, SignatureScheme};

use crate::crypto::digest_hex;
use crate::error::{Mismatch, Result, UptaneError};
use crate::metadata::{
    parse_envelope, Envelope, MetaFile, RoleKeys, RoleName, RootMetadata, SignedRole,
    SnapshotMetadata, TargetDescription, TargetsMetadata, TimestampMetadata,
};

/// Metadata whose signatures and version checks have passed, with the exact
/// bytes that were verified.
#[derive(Debug, Clone, PartialEq)]
pub struct Verified<T> {
    pub signed: T,
    pub raw: Vec<u8>,
}

impl<T: SignedRole> Verified<T> {
    pub fn version(&self) -> u64 {
        self.signed.version()
    }

    pub fn expires(&self) -> DateTime<Utc> {
        self.signed.expires()
    }
}

/// Accepts a pinned root without signature checks; it is trusted by construction.
pub fn trust_anchor(bytes: &[u8]) -> Result<Verified<RootMetadata>> {
    let envelope = parse_envelope::<RootMetadata>(bytes)?;
    Ok(Verified {
        signed: envelope.signed,
        raw: bytes.to_vec(),
    })
}

/// Re-checks a root read back from storage against its own root keys.
pub fn reverify_root(bytes: &[u8]) -> Result<Verified<RootMetadata>> {
    let envelope = parse_envelope::<RootMetadata>(bytes)?;
    verify_signatures(
        RoleName::Root,
        &envelope.signed.keys,
        envelope.signed.role_keys(RoleName::Root),
        &envelope,
    )?;
    Ok(Verified {
        signed: envelope.signed,
        raw: bytes.to_vec(),
    })
}

/// Re-checks signatures of metadata read back from storage. Versions and
/// expiry are not evaluated; they were enforced when the bytes were committed.
pub fn reverify<T: SignedRole>(root: &RootMetadata, bytes: &[u8]) -> Result<Verified<T>> {
    let envelope = parse_envelope::<T>(bytes)?;
    verify_signatures(T::ROLE, &root.keys, root.role_keys(T::ROLE), &envelope)?;
    Ok(Verified {
        signed: envelope.signed,
        raw: bytes.to_vec(),
    })
}

/// Checks that `envelope` carries at least `threshold` valid signatures from
/// keys the root authorizes for `role`.
///
/// Follows `tuf::verify::verify_signatures`: signatures are deduplicated by
/// key id and signatures from unauthorized keys are ignored. Unlike it, a
/// missed threshold caused by a bad signature from an authorized key is
/// reported as [`UptaneError::SignatureInvalid`].
fn verify_signatures<T>(
    role: RoleName,
    keys: &BTreeMap<String, PublicKey>,
    role_keys: Option<&RoleKeys>,
    envelope: &Envelope<T>,
) -> Result<()> {
    let Some(role_keys) = role_keys else {
        return Err(UptaneError::malformed(
            "root",
            format!("no keys assigned to role {role}"),
        ));
    };
    if role_keys.threshold < 1 {
        return Err(UptaneError::malformed(
            "root",
            format!("threshold for role {role} must be at least 1"),
        ));
    }

    let authorized: HashMap<&str, &PublicKey> = role_keys
        .keyids
        .iter()
        .filter_map(|id| match keys.get(id) {
            Some(key) if *key.scheme() == SignatureScheme::Ed25519 => Some((id.as_str(), key)),
            _ => {
                debug!(role = %role, key_id = %id, "uptane: authorized key is unusable");
                None
            }
        })
        .collect();

    let path = role.metadata_path();
    let mut seen: HashSet<&KeyId> = HashSet::new();
    let mut valid = 0usize;
    let mut bad_key: Option<String> = None;
    for signature in &envelope.signatures {
        if !seen.insert(signature.key_id()) {
            continue;
        }
        let key_id = signature.key_id().to_string();
        let Some(key) = authorized.get(key_id.as_str()) else {
            debug!(
                role = %role,
                key_id = %key_id,
                "uptane: ignoring signature from key not authorized for role"
            );
            continue;
        };
        match key.verify(&path, &envelope.signed_bytes, signature) {
            Ok(()) => valid += 1,
            Err(err) => {
                warn!(role = %role, key_id = %key_id, error = %err, "uptane: bad signature");
                bad_key.get_or_insert(key_id);
            }
        }
    }

    if valid >= role_keys.threshold as usize {
        return Ok(());
    }
    match bad_key {
        Some(key_id) => Err(UptaneError::SignatureInvalid { role, key_id }),
        None => Err(UptaneError::ThresholdNotMet {
            role,
            valid,
            threshold: role_keys.threshold,
        }),
    }
}

/// Fails with [`UptaneError::Expired`] once `expires` is not after `now`.
pub fn check_expiry(role: RoleName, expires: DateTime<Utc>, now: DateTime<Utc>) -> Result<()> {
    if expires <= now {
        return Err(UptaneError::Expired { role, expires });
    }
    Ok(())
}

fn check_version(role: RoleName, trusted: Option<u64>, candidate: u64) -> Result<()> {
    match trusted {
        Some(trusted) if candidate < trusted => Err(UptaneError::VersionRollback {
            role,
            trusted,
            candidate,
        }),
        _ => Ok(()),
    }
}

/// Verifies one step of the root chain against the currently trusted root.
///
/// A candidate must be signed by a threshold of the trusted root's root keys
/// and by a threshold of its own root keys, and must be exactly one version
/// ahead. Resubmitting the trusted root itself is accepted as a no-op.
/// Expiry is not checked here; only the root at the end of a chain must be
/// unexpired.
pub fn verify_root(
    trusted: &Verified<RootMetadata>,
    candidate: &[u8],
) -> Result<Verified<RootMetadata>> {
    let envelope = parse_envelope::<RootMetadata>(candidate)?;
    let trusted_version = trusted.version();
    let candidate_version = envelope.signed.version;

    check_version(RoleName::Root, Some(trusted_version), candidate_version)?;
    if candidate_version == trusted_version {
        if envelope.signed == trusted.signed {
            return Ok(trusted.clone());
        }
        return Err(UptaneError::malformed(
            "root",
            format!("conflicting root for trusted version {trusted_version}"),
        ));
    }
    if candidate_version != trusted_version + 1 {
        return Err(UptaneError::malformed(
            "root",
            format!("root version gap: trusted {trusted_version}, candidate {candidate_version}"),
        ));
    }

    verify_signatures(
        RoleName::Root,
        &trusted.signed.keys,
        trusted.signed.role_keys(RoleName::Root),
        &envelope,
    )?;
    verify_signatures(
        RoleName::Root,
        &envelope.signed.keys,
        envelope.signed.role_keys(RoleName::Root),
        &envelope,
    )?;

    Ok(Verified {
        signed: envelope.signed,
        raw: candidate.to_vec(),
    })
}

/// Shared flow for the non-root roles: signatures, version floor, expiry.
fn verify_role<T: SignedRole>(
    root: &RootMetadata,
    trusted_version: Option<u64>,
    candidate: &[u8],
    now: DateTime<Utc>,
) -> Result<Verified<T>> {
    let envelope = parse_envelope::<T>(candidate)?;
    verify_signatures(T::ROLE, &root.keys, root.role_keys(T::ROLE), &envelope)?;
    check_version(T::ROLE, trusted_version, envelope.signed.version())?;
    check_expiry(T::ROLE, envelope.signed.expires(), now)?;
    Ok(Verified {
        signed: envelope.signed,
        raw: candidate.to_vec(),
    })
}

pub fn verify_timestamp(
    root: &RootMetadata,
    trusted_version: Option<u64>,
    candidate: &[u8],
    now: DateTime<Utc>,
) -> Result<Verified<TimestampMetadata>> {
    let verified = verify_role::<TimestampMetadata>(root, trusted_version, candidate, now)?;
    verified.signed.snapshot_meta()?;
    Ok(verified)
}

pub fn verify_snapshot(
    root: &RootMetadata,
    trusted_version: Option<u64>,
    candidate: &[u8],
    now: DateTime<Utc>,
) -> Result<Verified<SnapshotMetadata>> {
    let verified = verify_role::<SnapshotMetadata>(root, trusted_version, candidate, now)?;
    verified.signed.targets_version()?;
    Ok(verified)
}

/// Verifies targets metadata; its version must reach both the previously
/// trusted version and the floor declared by the snapshot.
pub fn verify_targets(
    root: &RootMetadata,
    trusted_version: Option<u64>,
    snapshot_floor: u64,
    candidate: &[u8],
    now: DateTime<Utc>,
) -> Result<Verified<TargetsMetadata>> {
    let verified = verify_role::<TargetsMetadata>(root, trusted_version, candidate, now)?;
    check_version(RoleName::Targets, Some(snapshot_floor), verified.version())?;
    Ok(verified)
}

/// Binds metadata to the exact bytes another role declared for it.
pub fn verify_hash_chain(subject: &str, declared: &MetaFile, actual: &[u8]) -> Result<()> {
    check_integrity(subject, declared.length, &declared.hashes, actual)
}

/// Checks a target payload against its targets-metadata entry.
pub fn verify_payload(path: &str, declared: &TargetDescription, actual: &[u8]) -> Result<()> {
    check_integrity(path, Some(declared.length), &declared.hashes, actual)
}

fn check_integrity(
    subject: &str,
    length: Option<u64>,
    hashes: &BTreeMap<String, String>,
    actual: &[u8],
) -> Result<()> {
    let mismatch = |mismatch| UptaneError::HashMismatch {
        subject: subject.to_string(),
        mismatch,
    };
    if let Some(expected) = length {
        let actual_len = actual.len() as u64;
        if actual_len != expected {
            return Err(mismatch(Mismatch::Length {
                expected,
                actual: actual_len,
            }));
        }
    }
    let mut checked = 0usize;
    for (algorithm, expected) in hashes {
        let Some(computed) = digest_hex(algorithm, actual) else {
            continue;
        };
        if !computed.eq_ignore_ascii_case(expected) {
            return Err(mismatch(Mismatch::Hash {
                algorithm: algorithm.to_ascii_lowercase(),
            }));
        }
        checked += 1;
    }
    if checked == 0 {
        return Err(mismatch(Mismatch::NoSupportedHash));
    }
    Ok(())
}
