//! Content-addressed result cache.
//!
//! Keys are SHA-256 digests of the normalized request tuple, so any two
//! requests that normalize identically share an entry. Entries carry their key
//! fields as plain values and a last-access time used for eviction.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cohort_model::{AssociationResult, Digest, FeatureBins, FeatureCounts};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Normalized identity of an association request.
#[derive(Debug, Clone, Serialize)]
pub struct AssociationKey<'a> {
    pub table: &'a str,
    pub cohort_predicates: &'a str,
    pub cohort_year: Option<i32>,
    pub feature_a: &'a FeatureBins,
    pub feature_b: &'a FeatureBins,
}

impl AssociationKey<'_> {
    pub fn digest(&self) -> Result<Digest> {
        Ok(Digest::of(self)?)
    }
}

/// Normalized identity of a single-feature count request.
#[derive(Debug, Clone, Serialize)]
pub struct CountKey<'a> {
    pub table: &'a str,
    pub cohort_predicates: &'a str,
    pub cohort_year: Option<i32>,
    pub feature: &'a FeatureBins,
}

impl CountKey<'_> {
    pub fn digest(&self) -> Result<Digest> {
        Ok(Digest::of(self)?)
    }
}

/// When the last access happened, with a sequence number to break ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Access {
    pub time: DateTime<Utc>,
    pub sequence: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssociationEntry {
    pub digest: Digest,
    pub table: String,
    pub cohort_predicates: String,
    pub cohort_year: Option<i32>,
    pub feature_a: FeatureBins,
    pub feature_b: FeatureBins,
    pub result: AssociationResult,
    pub last_access: Access,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountEntry {
    pub digest: Digest,
    pub table: String,
    pub cohort_predicates: String,
    pub cohort_year: Option<i32>,
    pub feature: FeatureBins,
    pub result: FeatureCounts,
    pub last_access: Access,
}

/// Anything with a last-access stamp can be evicted.
pub trait CacheEntry {
    fn last_access(&self) -> Access;
}

impl CacheEntry for AssociationEntry {
    fn last_access(&self) -> Access {
        self.last_access
    }
}

impl CacheEntry for CountEntry {
    fn last_access(&self) -> Access {
        self.last_access
    }
}

/// Bounds applied to each cache independently.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvictionPolicy {
    /// Maximum number of entries kept.
    pub capacity: Option<usize>,
    /// Entries not accessed for longer than this are dropped.
    pub max_age: Option<Duration>,
}

impl EvictionPolicy {
    pub fn unbounded() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    #[must_use]
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn is_unbounded(&self) -> bool {
        self.capacity.is_none() && self.max_age.is_none()
    }
}

/// Entries removed by one eviction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvictionReport {
    pub expired: usize,
    pub over_capacity: usize,
}

impl EvictionReport {
    pub fn total(&self) -> usize {
        self.expired + self.over_capacity
    }
}

impl std::ops::AddAssign for EvictionReport {
    fn add_assign(&mut self, other: Self) {
        self.expired += other.expired;
        self.over_capacity += other.over_capacity;
    }
}

/// Apply `policy` to one cache map: age first, then least recently accessed.
pub fn evict<T: CacheEntry>(
    entries: &mut BTreeMap<Digest, T>,
    policy: &EvictionPolicy,
    now: DateTime<Utc>,
) -> EvictionReport {
    let mut report = EvictionReport::default();

    if let Some(max_age) = policy.max_age.and_then(|age| chrono::Duration::from_std(age).ok()) {
        let before = entries.len();
        entries.retain(|_, entry| now.signed_duration_since(entry.last_access().time) <= max_age);
        report.expired = before - entries.len();
    }

    if let Some(capacity) = policy.capacity {
        let excess = entries.len().saturating_sub(capacity);
        if excess > 0 {
            let mut by_age: Vec<(Access, Digest)> = entries
                .iter()
                .map(|(digest, entry)| (entry.last_access(), *digest))
                .collect();
            by_age.sort_unstable();
            for (_, digest) in by_age.into_iter().take(excess) {
                entries.remove(&digest);
            }
            report.over_capacity = excess;
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Stamp(Access);

    impl CacheEntry for Stamp {
        fn last_access(&self) -> Access {
            self.0
        }
    }

    fn entries(now: DateTime<Utc>) -> BTreeMap<Digest, Stamp> {
        (0..4u64)
            .map(|i| {
                let access = Access {
                    time: now - chrono::Duration::minutes(10 * i as i64),
                    sequence: 10 - i,
                };
                (Digest::of_bytes(&i.to_le_bytes()), Stamp(access))
            })
            .collect()
    }

    #[test]
    fn capacity_drops_least_recent() {
        let now = Utc::now();
        let mut map = entries(now);
        let report = evict(&mut map, &EvictionPolicy::unbounded().with_capacity(2), now);
        assert_eq!(report.over_capacity, 2);
        assert!(map.contains_key(&Digest::of_bytes(&0u64.to_le_bytes())));
        assert!(map.contains_key(&Digest::of_bytes(&1u64.to_le_bytes())));
    }

    #[test]
    fn age_drops_stale_entries() {
        let now = Utc::now();
        let mut map = entries(now);
        let policy = EvictionPolicy::unbounded().with_max_age(Duration::from_secs(15 * 60));
        let report = evict(&mut map, &policy, now);
        assert_eq!(report.expired, 2);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn unbounded_keeps_everything() {
        let now = Utc::now();
        let mut map = entries(now);
        assert_eq!(evict(&mut map, &EvictionPolicy::unbounded(), now).total(), 0);
        assert_eq!(map.len(), 4);
    }

    #[test]
    fn key_digest_depends_on_every_field() {
        let bins = FeatureBins::new("Sex", vec![cohort_model::Qualifier::equals("Male")]);
        let key = AssociationKey {
            table: "patient",
            cohort_predicates: "[]",
            cohort_year: None,
            feature_a: &bins,
            feature_b: &bins,
        };
        let other = AssociationKey {
            cohort_year: Some(2010),
            ..key.clone()
        };
        assert_ne!(key.digest().unwrap(), other.digest().unwrap());
        assert_eq!(key.digest().unwrap(), key.clone().digest().unwrap());
    }
}
