//! Error taxonomy shared by the verifier, repositories and client.
//!
//! Every failure maps onto exactly one [`ErrorKind`]. Callers that only need
//! to branch on the failure class use [`UptaneError::kind`]; the variants
//! themselves carry enough context to be logged as-is.

use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::metadata::RoleName;
use crate::store::StoreError;

/// Flat failure classes exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    SignatureInvalid,
    ThresholdNotMet,
    VersionRollback,
    Expired,
    HashMismatch,
    MalformedMetadata,
    CrossRepoInconsistency,
    OrgMismatch,
    NotFound,
    StorageFailure,
}

impl ErrorKind {
    /// Stable identifier used in logs and the CLI exit message.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::SignatureInvalid => "signature_invalid",
            ErrorKind::ThresholdNotMet => "threshold_not_met",
            ErrorKind::VersionRollback => "version_rollback",
            ErrorKind::Expired => "expired",
            ErrorKind::HashMismatch => "hash_mismatch",
            ErrorKind::MalformedMetadata => "malformed_metadata",
            ErrorKind::CrossRepoInconsistency => "cross_repo_inconsistency",
            ErrorKind::OrgMismatch => "org_mismatch",
            ErrorKind::NotFound => "not_found",
            ErrorKind::StorageFailure => "storage_failure",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a payload or metadata blob failed its integrity check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mismatch {
    Length { expected: u64, actual: u64 },
    Hash { algorithm: String },
    NoSupportedHash,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mismatch::Length { expected, actual } => {
                write!(f, "length {actual} does not match declared {expected}")
            }
            Mismatch::Hash { algorithm } => write!(f, "{algorithm} digest differs"),
            Mismatch::NoSupportedHash => f.write_str("no supported hash algorithm declared"),
        }
    }
}

/// Errors emitted while verifying or committing Uptane metadata.
#[derive(Debug, Error)]
pub enum UptaneError {
    #[error("{role} signature from key '{key_id}' failed verification")]
    SignatureInvalid { role: RoleName, key_id: String },
    #[error("{role} has {valid} valid signatures, threshold is {threshold}")]
    ThresholdNotMet {
        role: RoleName,
        valid: usize,
        threshold: u32,
    },
    #[error("{role} version {candidate} is older than trusted version {trusted}")]
    VersionRollback {
        role: RoleName,
        trusted: u64,
        candidate: u64,
    },
    #[error("{role} expired at {expires}")]
    Expired {
        role: RoleName,
        expires: DateTime<Utc>,
    },
    #[error("'{subject}' integrity check failed: {mismatch}")]
    HashMismatch { subject: String, mismatch: Mismatch },
    #[error("malformed {context}: {reason}")]
    MalformedMetadata { context: String, reason: String },
    #[error("director target '{path}' is inconsistent with config repository: {reason}")]
    CrossRepoInconsistency { path: String, reason: String },
    #[error("target path '{path}' org_id mismatch (expected {expected}, actual {})", .actual.map_or_else(|| "none".to_string(), |id| id.to_string()))]
    OrgMismatch {
        path: String,
        expected: u64,
        actual: Option<u64>,
    },
    #[error("{0} not found")]
    NotFound(String),
    #[error("storage failure: {0}")]
    StorageFailure(#[from] StoreError),
}

impl UptaneError {
    /// Returns the failure class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            UptaneError::SignatureInvalid { .. } => ErrorKind::SignatureInvalid,
            UptaneError::ThresholdNotMet { .. } => ErrorKind::ThresholdNotMet,
            UptaneError::VersionRollback { .. } => ErrorKind::VersionRollback,
            UptaneError::Expired { .. } => ErrorKind::Expired,
            UptaneError::HashMismatch { .. } => ErrorKind::HashMismatch,
            UptaneError::MalformedMetadata { .. } => ErrorKind::MalformedMetadata,
            UptaneError::CrossRepoInconsistency { .. } => ErrorKind::CrossRepoInconsistency,
            UptaneError::OrgMismatch { .. } => ErrorKind::OrgMismatch,
            UptaneError::NotFound(_) => ErrorKind::NotFound,
            UptaneError::StorageFailure(_) => ErrorKind::StorageFailure,
        }
    }

    pub(crate) fn malformed(context: impl Into<String>, reason: impl fmt::Display) -> Self {
        UptaneError::MalformedMetadata {
            context: context.into(),
            reason: reason.to_string(),
        }
    }
}

/// Convenience alias for results emitted by the Uptane helpers.
pub type Result<T> = std::result::Result<T, UptaneError>;
