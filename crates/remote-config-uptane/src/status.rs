//! JSON status report of a client's trusted metadata and target cache.
//!
//! Layout:
//!
//! ```json
//! {
//!   "cacheKey": "...",
//!   "orgId": 2,
//!   "configRepo": {"root.json": {"version": 1, "expires": "...", "valid": true}, ...},
//!   "directorRepo": {...},
//!   "targetCount": 1,
//!   "targetFiles": {"datadog/2/APM_TRACING/abc/config": "<sha256>"}
//! }
//! ```

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::client::State;
use crate::repository::MetaState;

/// Renders `state` as the status report for `cache_key`.
pub fn status_report(cache_key: &str, org_id: u64, state: &State) -> Value {
    let mut map = Map::new();
    map.insert("cacheKey".into(), Value::String(cache_key.to_string()));
    map.insert("orgId".into(), Value::from(org_id));
    map.insert("configRepo".into(), repository_map(&state.config_state));
    map.insert("directorRepo".into(), repository_map(&state.director_state));
    map.insert("targetCount".into(), Value::from(state.target_count()));
    map.insert(
        "targetFiles".into(),
        Value::Object(
            state
                .target_filenames
                .iter()
                .map(|(path, hash)| (path.clone(), Value::String(hash.clone())))
                .collect(),
        ),
    );
    Value::Object(map)
}

fn repository_map(roles: &BTreeMap<String, MetaState>) -> Value {
    let mut map = Map::new();
    for (file, meta) in roles {
        let mut entry = Map::new();
        entry.insert("version".into(), Value::from(meta.version));
        entry.insert("expires".into(), Value::String(meta.expires.to_rfc3339()));
        entry.insert("valid".into(), Value::Bool(!meta.expired));
        map.insert(file.clone(), Value::Object(entry));
    }
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    #[test]
    /// Verifies the report layout, including expired roles rendered as invalid.
    fn status_report_renders_roles_and_targets() {
        let expires = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        let meta = |version, expired| MetaState {
            version,
            hash: "00".into(),
            expires,
            expired,
        };
        let state = State {
            config_state: BTreeMap::from([("root.json".to_string(), meta(1, false))]),
            director_state: BTreeMap::from([("timestamp.json".to_string(), meta(21, true))]),
            target_filenames: BTreeMap::from([("datadog/2/X/a/f".to_string(), "ab".to_string())]),
        };

        let report = status_report("agent", 2, &state);
        assert_eq!(
            report,
            json!({
                "cacheKey": "agent",
                "orgId": 2,
                "configRepo": {
                    "root.json": {"version": 1, "expires": "2030-01-01T00:00:00+00:00", "valid": true}
                },
                "directorRepo": {
                    "timestamp.json": {"version": 21, "expires": "2030-01-01T00:00:00+00:00", "valid": false}
                },
                "targetCount": 1,
                "targetFiles": {"datadog/2/X/a/f": "ab"}
            })
        );
    }
}
