//! Message definitions for the `datadog.config` package.
//!
//! Field tags follow the backend protobuf schema; the persistence messages
//! at the bottom are local to the client and only ever read back by it.

use serde::{Deserialize, Serialize};

/// One signed top-level metadata document and its advertised version.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
pub struct TopMeta {
    #[prost(uint64, tag = "1")]
    #[serde(default)]
    pub version: u64,
    #[prost(bytes = "vec", tag = "2")]
    #[serde(with = "crate::serde_base64")]
    pub raw: Vec<u8>,
}

/// Config repository metadata carried by a backend response.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
pub struct ConfigMetas {
    #[prost(message, repeated, tag = "1")]
    #[serde(
        default,
        deserialize_with = "crate::null_as_default::deserialize",
        skip_serializing_if = "crate::skip_vec::is_empty"
    )]
    pub roots: Vec<TopMeta>,
    #[prost(message, optional, tag = "2")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<TopMeta>,
    #[prost(message, optional, tag = "3")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<TopMeta>,
    #[prost(message, optional, tag = "4")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_targets: Option<TopMeta>,
}

/// Director repository metadata carried by a backend response.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
pub struct DirectorMetas {
    #[prost(message, repeated, tag = "1")]
    #[serde(
        default,
        deserialize_with = "crate::null_as_default::deserialize",
        skip_serializing_if = "crate::skip_vec::is_empty"
    )]
    pub roots: Vec<TopMeta>,
    #[prost(message, optional, tag = "2")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<TopMeta>,
    #[prost(message, optional, tag = "3")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<TopMeta>,
    #[prost(message, optional, tag = "4")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targets: Option<TopMeta>,
}

/// Raw target payload keyed by its target path.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
pub struct File {
    #[prost(string, tag = "1")]
    pub path: String,
    #[prost(bytes = "vec", tag = "2")]
    #[serde(with = "crate::serde_base64")]
    pub raw: Vec<u8>,
}

/// Update bundle: both repositories' metadata plus the payloads they describe.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
pub struct LatestConfigsResponse {
    #[prost(message, optional, tag = "1")]
    #[serde(default)]
    pub config_metas: Option<ConfigMetas>,
    #[prost(message, optional, tag = "2")]
    #[serde(default)]
    pub director_metas: Option<DirectorMetas>,
    #[prost(message, repeated, tag = "3")]
    #[serde(default, deserialize_with = "crate::null_as_default::deserialize")]
    pub target_files: Vec<File>,
}

/// Trusted signed metadata of one repository, as persisted by the client.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
pub struct PersistedRepository {
    #[prost(bytes = "vec", tag = "1")]
    #[serde(with = "crate::serde_base64")]
    pub root: Vec<u8>,
    #[prost(bytes = "vec", optional, tag = "2")]
    #[serde(default, with = "crate::serde_base64_option")]
    pub timestamp: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "3")]
    #[serde(default, with = "crate::serde_base64_option")]
    pub snapshot: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "4")]
    #[serde(default, with = "crate::serde_base64_option")]
    pub targets: Option<Vec<u8>>,
}

/// Complete client state stored under a cache key.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
pub struct PersistedClientState {
    #[prost(message, optional, tag = "1")]
    #[serde(default)]
    pub config: Option<PersistedRepository>,
    #[prost(message, optional, tag = "2")]
    #[serde(default)]
    pub director: Option<PersistedRepository>,
    #[prost(message, repeated, tag = "3")]
    #[serde(default, deserialize_with = "crate::null_as_default::deserialize")]
    pub target_files: Vec<File>,
}
