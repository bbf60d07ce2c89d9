//! Single-feature counts over a cohort.

use cohort_model::{
    CohortId, Digest, FeatureBins, FeatureCounts, Marginal, NormalizedPredicates, ratio,
};
use cohort_query::{ColumnRequest, GroupedCounts};
use tracing::{debug, info_span};

use crate::cache::{CountEntry, CountKey};
use crate::engine::Engine;
use crate::error::Result;

impl Engine {
    /// Per-bin frequencies of one feature over a stored cohort.
    pub fn compute_feature_counts(
        &self,
        table: &str,
        cohort_id: &CohortId,
        feature_bins: FeatureBins,
    ) -> Result<FeatureCounts> {
        let _span = info_span!(
            "compute_feature_counts",
            table,
            cohort_id = %cohort_id,
            feature = %feature_bins.feature_name
        )
        .entered();
        let (cohort, year) = self.resolve_cohort(table, cohort_id)?;
        self.check_bins(table, &feature_bins)?;
        let feature = feature_bins.normalized(year);

        let digest = self.count_digest(table, &cohort, year, &feature)?;
        if let Some(cached) = self.store().count(&digest) {
            debug!(%digest, "count cache hit");
            return Ok(cached);
        }

        let columns = [ColumnRequest::new(feature.feature_name.clone(), feature.year)];
        let query = self
            .warehouse()
            .build(table, cohort.predicates(), year, &columns)?;
        let counts = self.warehouse().grouped_counts(&query, &query.aliases)?;
        let result = feature_counts(&counts, &columns[0], feature.clone());
        self.cache_count(table, &cohort, year, feature, &result)?;
        Ok(result)
    }

    /// Counts for every available catalog feature with full-domain bins.
    ///
    /// Uncached features are grouped in batches of at most
    /// `max_columns_per_query` columns, one grouped query per batch.
    pub fn cohort_features(&self, table: &str, cohort_id: &CohortId) -> Result<Vec<FeatureCounts>> {
        let _span = info_span!("cohort_features", table, cohort_id = %cohort_id).entered();
        let (cohort, year) = self.resolve_cohort(table, cohort_id)?;

        let mut slots: Vec<Option<FeatureCounts>> = Vec::new();
        let mut pending: Vec<(usize, FeatureBins)> = Vec::new();
        for feature in self.available_features(table)? {
            let bins = self.full_domain_bins(table, feature, year)?;
            let digest = self.count_digest(table, &cohort, year, &bins)?;
            match self.store().count(&digest) {
                Some(cached) => slots.push(Some(cached)),
                None => {
                    pending.push((slots.len(), bins));
                    slots.push(None);
                }
            }
        }

        let batch_size = self.options().max_columns_per_query.max(1);
        for (batch_index, batch) in pending.chunks(batch_size).enumerate() {
            debug!(batch = batch_index, columns = batch.len(), "feature count batch");
            let columns: Vec<ColumnRequest> = batch
                .iter()
                .map(|(_, bins)| ColumnRequest::new(bins.feature_name.clone(), bins.year))
                .collect();
            let query = self
                .warehouse()
                .build(table, cohort.predicates(), year, &columns)?;
            let counts = self.warehouse().grouped_counts(&query, &query.aliases)?;
            for ((slot, bins), request) in batch.iter().zip(&columns) {
                let result = feature_counts(&counts, request, bins.clone());
                self.cache_count(table, &cohort, year, bins.clone(), &result)?;
                slots[*slot] = Some(result);
            }
        }

        Ok(slots.into_iter().flatten().collect())
    }

    fn count_digest(
        &self,
        table: &str,
        cohort: &NormalizedPredicates,
        year: Option<i32>,
        feature: &FeatureBins,
    ) -> Result<Digest> {
        CountKey {
            table,
            cohort_predicates: cohort.canonical(),
            cohort_year: year,
            feature,
        }
        .digest()
    }

    fn cache_count(
        &self,
        table: &str,
        cohort: &NormalizedPredicates,
        year: Option<i32>,
        feature: FeatureBins,
        result: &FeatureCounts,
    ) -> Result<()> {
        let digest = self.count_digest(table, cohort, year, &feature)?;
        self.store().put_count(CountEntry {
            digest,
            table: table.to_string(),
            cohort_predicates: cohort.canonical().to_string(),
            cohort_year: year,
            feature,
            result: result.clone(),
            last_access: self.store().access_now(),
        });
        Ok(())
    }
}

/// Per-bin marginals of one grouped column. The total counts every cohort row.
fn feature_counts(
    counts: &GroupedCounts,
    request: &ColumnRequest,
    feature: FeatureBins,
) -> FeatureCounts {
    let total = counts.total();
    let position = counts.position(&request.alias());
    let marginals = feature
        .bins
        .iter()
        .map(|qualifier| {
            let frequency = counts.sum_where(|values| {
                let value = position.and_then(|idx| values.get(idx)?.as_ref());
                qualifier.matches(value)
            });
            Marginal {
                frequency,
                percentage: ratio(frequency, total),
            }
        })
        .collect();
    FeatureCounts {
        feature,
        counts: marginals,
        total,
    }
}
