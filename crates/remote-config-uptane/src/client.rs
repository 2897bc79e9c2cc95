//! Dual-repository Uptane client.
//!
//! The client owns a Config and a Director [`Repository`], the cache of
//! verified target payloads, and a handle to the [`TrustStore`] its state is
//! committed to. Updates are verified end to end against a copy of the
//! current state, persisted, and only then swapped in, so readers observe
//! either the state before an update or the state after it.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use prost::Message;
use remote_config_proto::{File, LatestConfigsResponse, PersistedClientState, PersistedRepository};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::crypto::sha256_hex;
use crate::error::{Result, UptaneError};
use crate::metadata::{TargetDescription, TargetsMetadata};
use crate::repository::{MetaState, MetaUpdate, Repository, RepositoryKind, RepositoryState};
use crate::status::status_report;
use crate::store::{StoreError, TrustStore};
use crate::uptane_path::{parse_target_path, TargetPathSource};
use crate::verifier::verify_payload;

/// Snapshot of the client's trusted metadata and cached targets.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct State {
    /// Config repository roles keyed by metadata file name.
    pub config_state: BTreeMap<String, MetaState>,
    /// Director repository roles keyed by metadata file name.
    pub director_state: BTreeMap<String, MetaState>,
    /// Cached target paths mapped to the sha256 of their payload.
    pub target_filenames: BTreeMap<String, String>,
}

impl State {
    pub fn config_root_version(&self) -> u64 {
        version_of(&self.config_state, crate::metadata::META_ROOT)
    }

    pub fn config_snapshot_version(&self) -> u64 {
        version_of(&self.config_state, crate::metadata::META_SNAPSHOT)
    }

    pub fn director_root_version(&self) -> u64 {
        version_of(&self.director_state, crate::metadata::META_ROOT)
    }

    pub fn director_targets_version(&self) -> u64 {
        version_of(&self.director_state, crate::metadata::META_TARGETS)
    }

    pub fn target_count(&self) -> usize {
        self.target_filenames.len()
    }
}

/// Version recorded for `file`, or zero when the role is not trusted yet.
fn version_of(states: &BTreeMap<String, MetaState>, file: &str) -> u64 {
    states.get(file).map(|state| state.version).unwrap_or(0)
}

/// Committed state shared with readers through an `Arc`.
#[derive(Debug, Clone)]
struct ClientState {
    config: Repository,
    director: Repository,
    target_files: BTreeMap<String, Vec<u8>>,
    /// Encoding of this state as last read from or written to the store.
    persisted: Option<Vec<u8>>,
}

impl ClientState {
    fn bootstrap(config: &ClientConfig) -> Result<Self> {
        let anchors = &config.trust_anchors;
        Ok(Self {
            config: Repository::new(
                RepositoryKind::Config,
                RepositoryState::bootstrap(&anchors.config_root)?,
            ),
            director: Repository::new(
                RepositoryKind::Director,
                RepositoryState::bootstrap(&anchors.director_root)?,
            ),
            target_files: BTreeMap::new(),
            persisted: None,
        })
    }

    fn restore(bytes: Vec<u8>) -> std::result::Result<Self, StoreError> {
        let decoded = PersistedClientState::decode(bytes.as_slice())
            .map_err(|err| StoreError::Corrupt(err.to_string()))?;
        let repository = |kind: RepositoryKind, persisted: Option<PersistedRepository>| {
            let persisted = persisted
                .ok_or_else(|| StoreError::Corrupt(format!("{kind} repository missing")))?;
            RepositoryState::restore(&persisted)
                .map(|state| Repository::new(kind, state))
                .map_err(|err| StoreError::Corrupt(format!("{kind} repository: {err}")))
        };
        Ok(Self {
            config: repository(RepositoryKind::Config, decoded.config)?,
            director: repository(RepositoryKind::Director, decoded.director)?,
            target_files: decoded
                .target_files
                .into_iter()
                .map(|file| (file.path, file.raw))
                .collect(),
            persisted: Some(bytes),
        })
    }

    fn encode(&self) -> Vec<u8> {
        PersistedClientState {
            config: Some(self.config.state().to_persisted()),
            director: Some(self.director.state().to_persisted()),
            target_files: self
                .target_files
                .iter()
                .map(|(path, raw)| File {
                    path: path.clone(),
                    raw: raw.clone(),
                })
                .collect(),
        }
        .encode_to_vec()
    }

    fn director_targets(&self) -> Option<&TargetsMetadata> {
        self.director
            .state()
            .targets
            .as_ref()
            .map(|targets| &targets.signed)
    }
}

/// Uptane client verifying Config and Director metadata and caching targets.
pub struct UptaneClient {
    store: Arc<dyn TrustStore>,
    cache_key: String,
    org_id: u64,
    history_limit: usize,
    update_lock: Arc<Mutex<()>>,
    state: RwLock<Arc<ClientState>>,
}

impl std::fmt::Debug for UptaneClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UptaneClient")
            .field("cache_key", &self.cache_key)
            .field("org_id", &self.org_id)
            .finish_non_exhaustive()
    }
}

impl UptaneClient {
    /// Restores the state committed under `cache_key`, or bootstraps both
    /// repositories from the configured trust anchors.
    ///
    /// Bootstrapped state is not persisted until the first successful update.
    pub fn new(
        store: Arc<dyn TrustStore>,
        cache_key: impl Into<String>,
        config: ClientConfig,
    ) -> Result<Self> {
        let cache_key = cache_key.into();
        let state = match store.load(&cache_key)? {
            Some(bytes) => {
                let restored = ClientState::restore(bytes).map_err(|err| {
                    warn!(cache_key = %cache_key, error = %err, "uptane: persisted state rejected");
                    UptaneError::from(err)
                })?;
                info!(
                    cache_key = %cache_key,
                    config_root = restored.config.state().root.version(),
                    director_root = restored.director.state().root.version(),
                    targets = restored.target_files.len(),
                    "uptane: restored client state"
                );
                restored
            }
            None => {
                debug!(cache_key = %cache_key, "uptane: bootstrapping from trust anchors");
                ClientState::bootstrap(&config)?
            }
        };
        let update_lock = store.update_lock(&cache_key);
        Ok(Self {
            store,
            cache_key,
            org_id: config.org_id,
            history_limit: config.history_limit,
            update_lock,
            state: RwLock::new(Arc::new(state)),
        })
    }

    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }

    pub fn org_id(&self) -> u64 {
        self.org_id
    }

    /// Verifies `bundle` against the current time and commits it.
    pub fn update(&self, bundle: &LatestConfigsResponse) -> Result<()> {
        self.update_at(bundle, Utc::now())
    }

    /// Verifies `bundle` as of `now` and commits it on success.
    ///
    /// Nothing is persisted and the in-memory state is unchanged when any
    /// check fails, including the final save.
    pub fn update_at(&self, bundle: &LatestConfigsResponse, now: DateTime<Utc>) -> Result<()> {
        let lock = Arc::clone(&self.update_lock);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let base = self.synchronized_state()?;

        let config_update = bundle
            .config_metas
            .as_ref()
            .map(MetaUpdate::from)
            .unwrap_or_default();
        let director_update = bundle
            .director_metas
            .as_ref()
            .map(MetaUpdate::from)
            .unwrap_or_default();

        let config = base.config.stage(&config_update, now)?;
        let director = base.director.stage(&director_update, now)?;
        let config_targets = staged_targets(RepositoryKind::Config, &config)?;
        let director_targets = staged_targets(RepositoryKind::Director, &director)?;

        verify_target_sets(&config_targets.targets, &director_targets.targets)?;
        verify_org_id_for_targets(&director_targets.targets, self.org_id)?;
        let target_files = build_target_cache(
            &base.target_files,
            &director_targets.targets,
            &bundle.target_files,
        )?;

        let mut next = ClientState {
            config: Repository::new(RepositoryKind::Config, config),
            director: Repository::new(RepositoryKind::Director, director),
            target_files,
            persisted: None,
        };
        let encoded = next.encode();
        self.store
            .save(&self.cache_key, &encoded, self.history_limit)
            .map_err(|err| {
                warn!(
                    cache_key = %self.cache_key,
                    error = %err,
                    "uptane: failed to persist update"
                );
                UptaneError::from(err)
            })?;
        next.persisted = Some(encoded);

        info!(
            cache_key = %self.cache_key,
            config_root = next.config.state().root.version(),
            director_root = next.director.state().root.version(),
            director_targets = next.director_targets().map(|t| t.version).unwrap_or_default(),
            targets = next.target_files.len(),
            "uptane: update committed"
        );
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
        Ok(())
    }

    /// Returns the cached payload for `path` after re-checking it against the
    /// committed Director entry.
    pub fn target_file(&self, path: &str) -> Result<Vec<u8>> {
        let state = self.current();
        let Some(bytes) = state.target_files.get(path) else {
            return Err(UptaneError::NotFound(format!("target file '{path}'")));
        };
        let Some(declared) = state
            .director_targets()
            .and_then(|targets| targets.targets.get(path))
        else {
            return Err(UptaneError::NotFound(format!("director target '{path}'")));
        };
        verify_payload(path, declared, bytes)?;
        Ok(bytes.clone())
    }

    /// Raw bytes of the committed Director targets metadata.
    pub fn targets_meta(&self) -> Result<Vec<u8>> {
        self.current()
            .director
            .state()
            .targets
            .as_ref()
            .map(|targets| targets.raw.clone())
            .ok_or_else(|| UptaneError::NotFound("director targets metadata".to_string()))
    }

    pub fn state(&self) -> State {
        self.state_at(Utc::now())
    }

    /// Like [`UptaneClient::state`], evaluating expiry as of `now`.
    pub fn state_at(&self, now: DateTime<Utc>) -> State {
        let state = self.current();
        State {
            config_state: state.config.state().meta_states(now),
            director_state: state.director.state().meta_states(now),
            target_filenames: state
                .target_files
                .iter()
                .map(|(path, raw)| (path.clone(), sha256_hex(raw)))
                .collect(),
        }
    }

    /// JSON status report of both repositories and the target cache.
    pub fn full_state(&self) -> Value {
        status_report(&self.cache_key, self.org_id, &self.state())
    }

    fn current(&self) -> Arc<ClientState> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Current state, refreshed from the store when another client sharing
    /// the cache key committed since this one last did.
    fn synchronized_state(&self) -> Result<Arc<ClientState>> {
        let current = self.current();
        let Some(stored) = self.store.load(&self.cache_key)? else {
            return Ok(current);
        };
        if current.persisted.as_deref() == Some(stored.as_slice()) {
            return Ok(current);
        }
        debug!(cache_key = %self.cache_key, "uptane: reloading state committed elsewhere");
        let reloaded = Arc::new(ClientState::restore(stored)?);
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&reloaded);
        Ok(reloaded)
    }
}

fn staged_targets(kind: RepositoryKind, state: &RepositoryState) -> Result<&TargetsMetadata> {
    state
        .targets
        .as_ref()
        .map(|targets| &targets.signed)
        .ok_or_else(|| UptaneError::malformed(format!("{kind} targets"), "not staged"))
}

/// Ensures every Director target is published by the Config repository with
/// the same length and hashes.
fn verify_target_sets(
    config_targets: &BTreeMap<String, TargetDescription>,
    director_targets: &BTreeMap<String, TargetDescription>,
) -> Result<()> {
    let inconsistent = |path: &str, reason: String| {
        warn!(target_path = %path, reason = %reason, "uptane: director target rejected");
        UptaneError::CrossRepoInconsistency {
            path: path.to_string(),
            reason,
        }
    };
    for (path, director_meta) in director_targets {
        // Branch 1: director references a path the config repo never published.
        let Some(config_meta) = config_targets.get(path) else {
            return Err(inconsistent(path, "missing from config targets".to_string()));
        };
        // Branch 2: lengths diverge.
        if director_meta.length != config_meta.length {
            return Err(inconsistent(
                path,
                format!(
                    "length {} differs from config length {}",
                    director_meta.length, config_meta.length
                ),
            ));
        }
        let config_hashes = normalised_hashes(&config_meta.hashes);
        let director_hashes = normalised_hashes(&director_meta.hashes);
        // Branch 3: nothing to compare, so identical content cannot be shown.
        if director_hashes.is_empty() {
            return Err(inconsistent(path, "director entry declares no content hash".to_string()));
        }
        for (algorithm, director_hash) in director_hashes {
            // Branch 4: config repo omitted a hash algorithm.
            let Some(config_hash) = config_hashes.get(&algorithm) else {
                return Err(inconsistent(
                    path,
                    format!("{algorithm} hash missing from config targets"),
                ));
            };
            // Branch 5: hashes disagree even though the algorithm exists.
            if !director_hash.eq_ignore_ascii_case(config_hash) {
                return Err(inconsistent(path, format!("{algorithm} hash differs")));
            }
        }
    }
    Ok(())
}

/// Ensures every org-scoped Director target belongs to `expected_org_id`.
fn verify_org_id_for_targets(
    director_targets: &BTreeMap<String, TargetDescription>,
    expected_org_id: u64,
) -> Result<()> {
    for path in director_targets.keys() {
        let info = match parse_target_path(path) {
            Ok(info) => info,
            Err(reason) => {
                warn!(
                    target_path = %path,
                    expected_org_id,
                    %reason,
                    "uptane: unparseable target path"
                );
                return Err(UptaneError::OrgMismatch {
                    path: path.clone(),
                    expected: expected_org_id,
                    actual: None,
                });
            }
        };
        if info.source == TargetPathSource::Employee {
            continue;
        }
        if info.org_id != Some(expected_org_id) {
            warn!(
                target_path = %path,
                expected_org_id,
                actual_org_id = ?info.org_id,
                "uptane: target org id mismatch"
            );
            return Err(UptaneError::OrgMismatch {
                path: path.clone(),
                expected: expected_org_id,
                actual: info.org_id,
            });
        }
    }
    Ok(())
}

/// Builds the next target cache from supplied payloads and still-valid cached copies.
fn build_target_cache(
    previous: &BTreeMap<String, Vec<u8>>,
    director_targets: &BTreeMap<String, TargetDescription>,
    files: &[File],
) -> Result<BTreeMap<String, Vec<u8>>> {
    let mut cache = BTreeMap::new();
    for file in files {
        // Branch 1: payload for a path the director does not reference; never retrievable.
        let Some(declared) = director_targets.get(&file.path) else {
            debug!(target_path = %file.path, "uptane: dropping unreferenced target payload");
            continue;
        };
        verify_payload(&file.path, declared, &file.raw)?;
        cache.insert(file.path.clone(), file.raw.clone());
    }
    for (path, declared) in director_targets {
        if cache.contains_key(path) {
            continue;
        }
        // Branch 2: not supplied this time; keep the cached copy if it still matches.
        if let Some(raw) = previous.get(path) {
            if verify_payload(path, declared, raw).is_ok() {
                cache.insert(path.clone(), raw.clone());
            } else {
                debug!(target_path = %path, "uptane: evicting stale cached target");
            }
        }
    }
    Ok(cache)
}

fn normalised_hashes(hashes: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    hashes
        .iter()
        .map(|(algorithm, value)| (algorithm.to_ascii_lowercase(), value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tracing_test::traced_test;

    fn entry(payload: &[u8]) -> TargetDescription {
        TargetDescription {
            length: payload.len() as u64,
            hashes: BTreeMap::from([("sha256".to_string(), sha256_hex(payload))]),
            custom: None,
        }
    }

    fn targets(entries: &[(&str, TargetDescription)]) -> BTreeMap<String, TargetDescription> {
        entries
            .iter()
            .map(|(path, meta)| (path.to_string(), meta.clone()))
            .collect()
    }

    #[test]
    /// Director targets that match config entries pass, including case-only hash differences.
    fn target_sets_accept_consistent_entries() {
        let mut upper = entry(b"a");
        upper.hashes = BTreeMap::from([("SHA256".to_string(), sha256_hex(b"a").to_uppercase())]);
        let config = targets(&[
            ("datadog/2/X/a/f", entry(b"a")),
            ("datadog/2/X/b/f", entry(b"b")),
        ]);
        let director = targets(&[("datadog/2/X/a/f", upper)]);
        verify_target_sets(&config, &director).unwrap();
    }

    #[test]
    fn target_sets_reject_each_divergence() {
        let config = targets(&[("datadog/2/X/a/f", entry(b"a"))]);

        let missing = targets(&[("datadog/2/X/b/f", entry(b"b"))]);
        let longer = targets(&[("datadog/2/X/a/f", entry(b"aa"))]);
        let mut other_hash = entry(b"a");
        other_hash.hashes = BTreeMap::from([("sha256".to_string(), sha256_hex(b"z"))]);
        let different = targets(&[("datadog/2/X/a/f", other_hash)]);
        let mut extra_algorithm = entry(b"a");
        extra_algorithm
            .hashes
            .insert("sha512".to_string(), "00".to_string());
        let unpublished_hash = targets(&[("datadog/2/X/a/f", extra_algorithm)]);

        for director in [missing, longer, different, unpublished_hash] {
            let err = verify_target_sets(&config, &director).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::CrossRepoInconsistency);
        }
    }

    #[test]
    /// A director entry without hashes matches on length alone, which is not enough.
    fn target_sets_reject_director_entry_without_hashes() {
        let config = targets(&[("datadog/2/X/a/f", entry(b"abc"))]);
        let mut hashless = entry(b"abc");
        hashless.hashes.clear();
        let director = targets(&[("datadog/2/X/a/f", hashless)]);
        let err = verify_target_sets(&config, &director).unwrap_err();
        assert!(matches!(
            err,
            UptaneError::CrossRepoInconsistency { ref path, .. } if path == "datadog/2/X/a/f"
        ));
    }

    #[test]
    /// Employee paths skip org scoping; foreign and unparseable paths fail it.
    fn org_scoping_rules() {
        let ok = targets(&[
            ("datadog/2/X/a/f", entry(b"a")),
            ("employee/X/a/f", entry(b"a")),
        ]);
        verify_org_id_for_targets(&ok, 2).unwrap();

        let foreign = targets(&[("datadog/3/X/a/f", entry(b"a"))]);
        assert!(matches!(
            verify_org_id_for_targets(&foreign, 2),
            Err(UptaneError::OrgMismatch {
                expected: 2,
                actual: Some(3),
                ..
            })
        ));

        let short = targets(&[("datadog/2/X", entry(b"a"))]);
        assert!(matches!(
            verify_org_id_for_targets(&short, 2),
            Err(UptaneError::OrgMismatch { actual: None, .. })
        ));
    }

    #[test]
    /// Fresh payloads win, stale cached copies are evicted, unreferenced payloads are dropped.
    fn target_cache_merges_fresh_and_cached_payloads() {
        let previous = BTreeMap::from([
            ("datadog/2/X/a/f".to_string(), b"a".to_vec()),
            ("datadog/2/X/b/f".to_string(), b"old".to_vec()),
        ]);
        let director = targets(&[
            ("datadog/2/X/a/f", entry(b"a")),
            ("datadog/2/X/b/f", entry(b"new")),
            ("datadog/2/X/c/f", entry(b"c")),
        ]);
        let files = vec![
            File {
                path: "datadog/2/X/c/f".to_string(),
                raw: b"c".to_vec(),
            },
            File {
                path: "datadog/2/X/unlisted/f".to_string(),
                raw: b"?".to_vec(),
            },
        ];
        let cache = build_target_cache(&previous, &director, &files).unwrap();
        assert_eq!(
            cache.keys().map(String::as_str).collect::<Vec<_>>(),
            vec!["datadog/2/X/a/f", "datadog/2/X/c/f"]
        );

        let bad = vec![File {
            path: "datadog/2/X/c/f".to_string(),
            raw: b"C".to_vec(),
        }];
        let err = build_target_cache(&previous, &director, &bad).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HashMismatch);
    }

    #[test]
    fn state_accessors_default_to_zero() {
        let state = State::default();
        assert_eq!(state.config_root_version(), 0);
        assert_eq!(state.director_targets_version(), 0);
        assert_eq!(state.target_count(), 0);
    }

    #[test]
    #[traced_test]
    /// Org mismatches are logged with the offending path.
    fn org_mismatch_is_logged() {
        let foreign = targets(&[("datadog/9/X/a/f", entry(b"a"))]);
        let _ = verify_org_id_for_targets(&foreign, 2);
        assert!(logs_contain("uptane: target org id mismatch"));
        assert!(logs_contain("datadog/9/X/a/f"));
    }

    #[test]
    /// Corrupt persisted bytes surface as a storage failure, not a panic.
    fn corrupt_persisted_state_is_a_storage_error() {
        let err = ClientState::restore(b"\xff\xff\xff".to_vec()).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));

        let empty = PersistedClientState::default().encode_to_vec();
        let err = ClientState::restore(empty).unwrap_err();
        assert!(err.to_string().contains("config repository missing"));
    }
}
