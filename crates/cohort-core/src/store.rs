//! Persistence for cohorts and cached results.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use cohort_model::{AssociationResult, Cohort, CohortId, Digest, FeatureCounts};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cache::{
    Access, AssociationEntry, CountEntry, EvictionPolicy, EvictionReport, evict,
};
use crate::error::StoreError;

/// Current snapshot layout version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// The cohort relation and both result caches.
///
/// Implementations serialize their own access and never hold a lock across a
/// computation; callers may race, and the uniqueness check in
/// [`CohortStore::insert_cohort`] decides the winner.
pub trait CohortStore: Send + Sync {
    /// Allocate the next sequential cohort id. The id is not reserved.
    fn next_cohort_id(&self) -> CohortId;

    /// Insert a new cohort, failing with [`StoreError::IdCollision`] if the id exists.
    fn insert_cohort(&self, cohort: Cohort) -> Result<(), StoreError>;

    fn cohort(&self, cohort_id: &CohortId) -> Option<Cohort>;

    /// The cohort stored for exactly this definition, if any.
    fn find_cohort(&self, table: &str, year: Option<i32>, predicates: &str) -> Option<Cohort>;

    /// All cohorts, optionally restricted to one table, in id order.
    fn cohorts(&self, table: Option<&str>) -> Vec<Cohort>;

    /// Cached association, touching its access time on a hit.
    fn association(&self, digest: &Digest) -> Option<AssociationResult>;

    fn put_association(&self, entry: AssociationEntry);

    /// Cached single-feature counts, touching its access time on a hit.
    fn count(&self, digest: &Digest) -> Option<FeatureCounts>;

    fn put_count(&self, entry: CountEntry);

    /// Apply `policy` to both caches as of `now`.
    fn evict(&self, policy: &EvictionPolicy, now: DateTime<Utc>) -> EvictionReport;

    /// Stamp for an entry about to be inserted or touched.
    fn access_now(&self) -> Access;
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    access_sequence: u64,
    cohorts: BTreeMap<CohortId, Cohort>,
    associations: BTreeMap<Digest, AssociationEntry>,
    counts: BTreeMap<Digest, CountEntry>,
}

impl State {
    fn stamp(&mut self) -> Access {
        self.access_sequence += 1;
        Access {
            time: Utc::now(),
            sequence: self.access_sequence,
        }
    }
}

/// On-disk form of a [`MemoryStore`].
#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    next_id: u64,
    access_sequence: u64,
    cohorts: Vec<Cohort>,
    associations: Vec<AssociationEntry>,
    counts: Vec<CountEntry>,
}

/// Mutex-guarded in-memory store with JSON snapshots.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    policy: EvictionPolicy,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evict with `policy` after every cache insert.
    #[must_use]
    pub fn with_policy(mut self, policy: EvictionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &EvictionPolicy {
        &self.policy
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn cache_sizes(&self) -> (usize, usize) {
        let state = self.lock();
        (state.associations.len(), state.counts.len())
    }

    /// Load a snapshot, or start empty when `path` does not exist.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if path.exists() {
            Self::load_snapshot(path)
        } else {
            Ok(Self::new())
        }
    }

    pub fn load_snapshot(path: &Path) -> Result<Self, StoreError> {
        let bytes = fs::read(path).map_err(|source| StoreError::Io {
            operation: "read",
            path: path.to_path_buf(),
            source,
        })?;
        let snapshot: Snapshot =
            serde_json::from_slice(&bytes).map_err(|source| StoreError::Snapshot {
                path: path.to_path_buf(),
                source,
            })?;
        if snapshot.version > SNAPSHOT_VERSION {
            return Err(StoreError::UnsupportedSnapshot {
                found: snapshot.version,
                max_supported: SNAPSHOT_VERSION,
            });
        }
        let state = State {
            next_id: snapshot.next_id,
            access_sequence: snapshot.access_sequence,
            cohorts: snapshot
                .cohorts
                .into_iter()
                .map(|cohort| (cohort.cohort_id.clone(), cohort))
                .collect(),
            associations: snapshot
                .associations
                .into_iter()
                .map(|entry| (entry.digest, entry))
                .collect(),
            counts: snapshot
                .counts
                .into_iter()
                .map(|entry| (entry.digest, entry))
                .collect(),
        };
        info!(
            path = %path.display(),
            cohorts = state.cohorts.len(),
            associations = state.associations.len(),
            counts = state.counts.len(),
            "loaded store snapshot"
        );
        Ok(Self {
            state: Mutex::new(state),
            policy: EvictionPolicy::default(),
        })
    }

    /// Write the whole store to `path` (temp file + rename).
    pub fn save_snapshot(&self, path: &Path) -> Result<(), StoreError> {
        let bytes = {
            let state = self.lock();
            let snapshot = Snapshot {
                version: SNAPSHOT_VERSION,
                next_id: state.next_id,
                access_sequence: state.access_sequence,
                cohorts: state.cohorts.values().cloned().collect(),
                associations: state.associations.values().cloned().collect(),
                counts: state.counts.values().cloned().collect(),
            };
            serde_json::to_vec_pretty(&snapshot).map_err(|source| StoreError::Snapshot {
                path: path.to_path_buf(),
                source,
            })?
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_error("create directory", parent))?;
        }
        let temp_path = path.with_extension("json.tmp");
        let mut file = File::create(&temp_path).map_err(io_error("create", &temp_path))?;
        file.write_all(&bytes).map_err(io_error("write", &temp_path))?;
        file.sync_all().map_err(io_error("sync", &temp_path))?;
        fs::rename(&temp_path, path).map_err(|source| StoreError::AtomicWriteFailed {
            temp_path: temp_path.clone(),
            target_path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "saved store snapshot");
        Ok(())
    }
}

/// Sequential ids in numeric order, then explicit ids by name.
fn id_order(id: &CohortId) -> (bool, u64, &str) {
    match id.sequence() {
        Some(n) => (false, n, id.as_str()),
        None => (true, 0, id.as_str()),
    }
}

fn io_error(operation: &'static str, path: &Path) -> impl FnOnce(std::io::Error) -> StoreError {
    let path = path.to_path_buf();
    move |source| StoreError::Io {
        operation,
        path,
        source,
    }
}

impl CohortStore for MemoryStore {
    fn next_cohort_id(&self) -> CohortId {
        let mut state = self.lock();
        state.next_id += 1;
        CohortId::sequential(state.next_id)
    }

    fn insert_cohort(&self, cohort: Cohort) -> Result<(), StoreError> {
        let mut state = self.lock();
        if state.cohorts.contains_key(&cohort.cohort_id) {
            return Err(StoreError::IdCollision(cohort.cohort_id));
        }
        debug!(cohort_id = %cohort.cohort_id, table = %cohort.table, "inserted cohort");
        state.cohorts.insert(cohort.cohort_id.clone(), cohort);
        Ok(())
    }

    fn cohort(&self, cohort_id: &CohortId) -> Option<Cohort> {
        self.lock().cohorts.get(cohort_id).cloned()
    }

    fn find_cohort(&self, table: &str, year: Option<i32>, predicates: &str) -> Option<Cohort> {
        let state = self.lock();
        let mut matching: Vec<&Cohort> = state
            .cohorts
            .values()
            .filter(|cohort| cohort.has_definition(table, year, predicates))
            .collect();
        // Prefer the oldest sequential id when aliases exist.
        matching.sort_by(|a, b| id_order(&a.cohort_id).cmp(&id_order(&b.cohort_id)));
        matching.first().map(|cohort| (*cohort).clone())
    }

    fn cohorts(&self, table: Option<&str>) -> Vec<Cohort> {
        let state = self.lock();
        let mut cohorts: Vec<Cohort> = state
            .cohorts
            .values()
            .filter(|cohort| table.is_none_or(|table| cohort.table == table))
            .cloned()
            .collect();
        cohorts.sort_by(|a, b| id_order(&a.cohort_id).cmp(&id_order(&b.cohort_id)));
        cohorts
    }

    fn association(&self, digest: &Digest) -> Option<AssociationResult> {
        let mut state = self.lock();
        let stamp = state.stamp();
        let entry = state.associations.get_mut(digest)?;
        entry.last_access = stamp;
        Some(entry.result.clone())
    }

    fn put_association(&self, entry: AssociationEntry) {
        let mut state = self.lock();
        state.associations.insert(entry.digest, entry);
        if !self.policy.is_unbounded() {
            let report = evict(&mut state.associations, &self.policy, Utc::now());
            if report.total() > 0 {
                debug!(evicted = report.total(), "association cache eviction");
            }
        }
    }

    fn count(&self, digest: &Digest) -> Option<FeatureCounts> {
        let mut state = self.lock();
        let stamp = state.stamp();
        let entry = state.counts.get_mut(digest)?;
        entry.last_access = stamp;
        Some(entry.result.clone())
    }

    fn put_count(&self, entry: CountEntry) {
        let mut state = self.lock();
        state.counts.insert(entry.digest, entry);
        if !self.policy.is_unbounded() {
            let report = evict(&mut state.counts, &self.policy, Utc::now());
            if report.total() > 0 {
                debug!(evicted = report.total(), "count cache eviction");
            }
        }
    }

    fn evict(&self, policy: &EvictionPolicy, now: DateTime<Utc>) -> EvictionReport {
        let mut state = self.lock();
        let mut report = evict(&mut state.associations, policy, now);
        report += evict(&mut state.counts, policy, now);
        report
    }

    fn access_now(&self) -> Access {
        self.lock().stamp()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cohort_model::{FeatureBins, Marginal, Qualifier, normalize};

    fn cohort(id: CohortId, table: &str) -> Cohort {
        let predicates = normalize(Some(2010), &[]).unwrap();
        Cohort::new(id, table, Some(2010), 20, &predicates)
    }

    fn count_entry(store: &MemoryStore, seed: u8) -> CountEntry {
        let feature = FeatureBins::new("Sex", vec![Qualifier::equals("Male")]);
        CountEntry {
            digest: Digest::of_bytes(&[seed]),
            table: "patient".into(),
            cohort_predicates: "[]".into(),
            cohort_year: None,
            feature: feature.clone(),
            result: FeatureCounts {
                feature,
                counts: vec![Marginal {
                    frequency: 3,
                    percentage: 1.0,
                }],
                total: 3,
            },
            last_access: store.access_now(),
        }
    }

    #[test]
    fn ids_are_sequential() {
        let store = MemoryStore::new();
        assert_eq!(store.next_cohort_id().as_str(), "COHORT:1");
        assert_eq!(store.next_cohort_id().as_str(), "COHORT:2");
    }

    #[test]
    fn duplicate_ids_collide() {
        let store = MemoryStore::new();
        store
            .insert_cohort(cohort(CohortId::sequential(1), "patient"))
            .unwrap();
        let err = store
            .insert_cohort(cohort(CohortId::sequential(1), "patient"))
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn listing_orders_ids_numerically() {
        let store = MemoryStore::new();
        for id in [
            CohortId::sequential(10),
            CohortId::new("alias"),
            CohortId::sequential(2),
        ] {
            store.insert_cohort(cohort(id, "patient")).unwrap();
        }
        store
            .insert_cohort(cohort(CohortId::sequential(3), "visit"))
            .unwrap();
        let ids: Vec<String> = store
            .cohorts(Some("patient"))
            .into_iter()
            .map(|c| c.cohort_id.to_string())
            .collect();
        assert_eq!(ids, vec!["COHORT:2", "COHORT:10", "alias"]);
        assert_eq!(store.cohorts(None).len(), 4);
    }

    #[test]
    fn hits_refresh_access_order() {
        let store = MemoryStore::new();
        store.put_count(count_entry(&store, 1));
        store.put_count(count_entry(&store, 2));
        assert!(store.count(&Digest::of_bytes(&[1])).is_some());

        let policy = EvictionPolicy::unbounded().with_capacity(1);
        let report = store.evict(&policy, Utc::now());
        assert_eq!(report.over_capacity, 1);
        assert!(store.count(&Digest::of_bytes(&[1])).is_some());
        assert!(store.count(&Digest::of_bytes(&[2])).is_none());
    }

    #[test]
    fn policy_applies_on_insert() {
        let store = MemoryStore::new().with_policy(EvictionPolicy::unbounded().with_capacity(2));
        for seed in 0..5 {
            store.put_count(count_entry(&store, seed));
        }
        assert_eq!(store.cache_sizes(), (0, 2));
    }
}
