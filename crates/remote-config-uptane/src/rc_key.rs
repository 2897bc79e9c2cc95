//! Decoder for legacy Remote Config keys (`DDRCM_...`).
//!
//! The key is a base32 (no padding) encoding of a msgpack map carrying the
//! application key, the org id and the datacenter. The client only needs the
//! org id, which scopes every Director target.

use data_encoding::BASE32_NOPAD;
use rmp_serde::decode::Error as RmpError;
use serde::Deserialize;
use thiserror::Error;

const RC_KEY_PREFIX: &str = "DDRCM_";

/// Decoded RC key payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RcKey {
    pub app_key: String,
    pub org_id: u64,
    pub datacenter: String,
}

#[derive(Debug, Error)]
pub enum RcKeyError {
    #[error("rc key must not be empty")]
    Empty,
    #[error("rc key base32 decode error: {0}")]
    Base32(data_encoding::DecodeError),
    #[error("rc key payload decode error: {0}")]
    Msgpack(RmpError),
    #[error("rc key missing required fields")]
    MissingFields,
}

#[derive(Deserialize)]
#[cfg_attr(test, derive(serde::Serialize))]
struct RcKeyWire {
    #[serde(rename = "key")]
    app_key: String,
    #[serde(rename = "org")]
    org_id: u64,
    #[serde(rename = "dc")]
    datacenter: String,
}

impl RcKey {
    /// Decodes an RC key, with or without the `DDRCM_` prefix.
    pub fn decode(input: &str) -> Result<Self, RcKeyError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(RcKeyError::Empty);
        }
        let payload = trimmed.strip_prefix(RC_KEY_PREFIX).unwrap_or(trimmed);
        let bytes = BASE32_NOPAD
            .decode(payload.as_bytes())
            .map_err(RcKeyError::Base32)?;
        let wire: RcKeyWire = rmp_serde::from_slice(&bytes).map_err(RcKeyError::Msgpack)?;
        if wire.app_key.is_empty() || wire.datacenter.is_empty() {
            return Err(RcKeyError::MissingFields);
        }
        Ok(Self {
            app_key: wire.app_key,
            org_id: wire.org_id,
            datacenter: wire.datacenter,
        })
    }
}

#[cfg(test)]
pub(crate) fn encode_for_tests(org_id: u64) -> String {
    let wire = RcKeyWire {
        app_key: "58d58c60b8ac337293ce2ca6b28b19eb".into(),
        org_id,
        datacenter: "datadoghq.com".into(),
    };
    let bytes = rmp_serde::to_vec_named(&wire).unwrap();
    format!("{RC_KEY_PREFIX}{}", BASE32_NOPAD.encode(&bytes))
}
