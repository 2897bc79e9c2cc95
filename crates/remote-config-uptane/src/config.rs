//! Client configuration and its environment-driven construction.
//!
//! Embedders either build a [`ClientConfig`] directly or derive one from the
//! process environment through [`UptaneEnv`].

use std::collections::HashMap;
use std::env;

use thiserror::Error;

use crate::rc_key::{RcKey, RcKeyError};

/// Environment variable carrying the pinned Config repository root.
const ENV_CONFIG_ROOT: &str = "DD_REMOTE_CONFIGURATION_CONFIG_ROOT";
/// Environment variable carrying the pinned Director repository root.
const ENV_DIRECTOR_ROOT: &str = "DD_REMOTE_CONFIGURATION_DIRECTOR_ROOT";
/// Environment variable setting the legacy remote configuration key.
const ENV_RC_KEY: &str = "DD_REMOTE_CONFIGURATION_KEY";
/// Environment variable setting the org id explicitly.
const ENV_ORG_ID: &str = "DD_REMOTE_CONFIGURATION_ORG_ID";
/// Environment variable sizing the persisted history ring.
const ENV_HISTORY: &str = "DD_REMOTE_CONFIGURATION_HISTORY";
/// Environment variable pointing at the on-disk trust store.
const ENV_STORE_PATH: &str = "DD_REMOTE_CONFIGURATION_STORE_PATH";
/// Environment variable naming the cache key state is persisted under.
const ENV_CACHE_KEY: &str = "DD_REMOTE_CONFIGURATION_CACHE_KEY";

/// Default number of committed states kept per cache key.
pub const DEFAULT_HISTORY_LIMIT: usize = 2;
/// Cache key used when none is configured.
pub const DEFAULT_CACHE_KEY: &str = "default";

/// Pinned roots each repository's chain of trust starts from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustAnchors {
    pub config_root: Vec<u8>,
    pub director_root: Vec<u8>,
}

/// Settings an [`crate::UptaneClient`] is constructed with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Organization every Director target must belong to.
    pub org_id: u64,
    pub trust_anchors: TrustAnchors,
    /// Committed states kept per cache key for diagnostics.
    pub history_limit: usize,
}

impl ClientConfig {
    pub fn new(org_id: u64, trust_anchors: TrustAnchors) -> Self {
        Self {
            org_id,
            trust_anchors,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
    #[error("invalid remote configuration key: {0}")]
    RcKey(#[from] RcKeyError),
}

/// Environment-derived options used to build a [`ClientConfig`].
#[derive(Debug, Clone, Default)]
pub struct UptaneEnv {
    pub config_root: Option<String>,
    pub director_root: Option<String>,
    pub rc_key: Option<String>,
    pub org_id: Option<String>,
    pub history: Option<String>,
    pub store_path: Option<String>,
    pub cache_key: Option<String>,
}

impl UptaneEnv {
    /// Builds settings from the current process environment.
    pub fn from_os_env() -> Self {
        Self::from_env_iter(env::vars())
    }

    /// Builds settings from an iterator of key/value pairs (typically for tests).
    pub fn from_env_iter<I, K, V>(iter: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map: HashMap<String, String> = iter
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let get = |name: &str| map.get(name).and_then(|value| sanitize_non_empty(value));

        Self {
            config_root: get(ENV_CONFIG_ROOT),
            director_root: get(ENV_DIRECTOR_ROOT),
            rc_key: get(ENV_RC_KEY),
            org_id: get(ENV_ORG_ID),
            history: get(ENV_HISTORY),
            store_path: get(ENV_STORE_PATH),
            cache_key: get(ENV_CACHE_KEY),
        }
    }

    /// Validates the captured settings into a [`ClientConfig`].
    ///
    /// An explicit org id wins over the one embedded in the RC key.
    pub fn client_config(&self) -> Result<ClientConfig, ConfigError> {
        let config_root = self
            .config_root
            .as_ref()
            .ok_or(ConfigError::Missing(ENV_CONFIG_ROOT))?;
        let director_root = self
            .director_root
            .as_ref()
            .ok_or(ConfigError::Missing(ENV_DIRECTOR_ROOT))?;

        let org_id = match (&self.org_id, &self.rc_key) {
            (Some(raw), _) => raw.parse::<u64>().map_err(|err| ConfigError::Invalid {
                name: ENV_ORG_ID,
                reason: err.to_string(),
            })?,
            (None, Some(rc_key)) => RcKey::decode(rc_key)?.org_id,
            (None, None) => return Err(ConfigError::Missing(ENV_ORG_ID)),
        };

        let history_limit = match &self.history {
            Some(raw) => raw.parse::<usize>().map_err(|err| ConfigError::Invalid {
                name: ENV_HISTORY,
                reason: err.to_string(),
            })?,
            None => DEFAULT_HISTORY_LIMIT,
        };

        Ok(ClientConfig {
            org_id,
            trust_anchors: TrustAnchors {
                config_root: config_root.as_bytes().to_vec(),
                director_root: director_root.as_bytes().to_vec(),
            },
            history_limit,
        })
    }

    /// Cache key to persist under, falling back to [`DEFAULT_CACHE_KEY`].
    pub fn cache_key(&self) -> &str {
        self.cache_key.as_deref().unwrap_or(DEFAULT_CACHE_KEY)
    }
}

/// Helper trimming whitespace and discarding empty values.
fn sanitize_non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
