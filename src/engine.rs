// Recalculation trigger: load a run's completed responses, compute every scope's
// ranked metric sets, write them, and build the actionable pages list.

use crate::canonical::Canonicalizer;
use crate::citations::aggregate_citations;
use crate::config::Settings;
use crate::error::BrandscopeError;
use crate::fingerprint::input_fingerprint;
use crate::mapping::MappingResolver;
use crate::metrics::{summarize_bucket, BrandUniverse};
use crate::partition::partition_all;
use crate::ranking::assign_ranks;
use crate::source::{load_completed, ResponseSource};
use crate::store::AggregateStore;
use crate::types::{
    AggregatedMetricSet, CitationReport, DateRange, RecalcOutcome, RecalcRequest, RunKey,
    ScopeKey, ScoredResponse,
};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Result of [`Engine::analyze`]: metrics write outcome plus the citation pass
#[derive(Debug, Clone)]
pub struct Analysis {
    pub outcome: RecalcOutcome,
    pub pages: CitationReport,
}

pub struct Engine<'a> {
    source: &'a dyn ResponseSource,
    store: &'a AggregateStore,
    settings: &'a Settings,
    canonicalizer: Canonicalizer,
}

impl<'a> Engine<'a> {
    pub fn new(
        source: &'a dyn ResponseSource,
        store: &'a AggregateStore,
        settings: &'a Settings,
    ) -> Self {
        Self {
            source,
            store,
            settings,
            canonicalizer: Canonicalizer::new(&settings.tracking_params),
        }
    }

    /// Recompute and store every metric set of `req.run`.
    ///
    /// Unless `force` is set, an input set identical to the one behind the stored
    /// sets returns `cached` without writing.
    pub fn recalculate(&self, req: &RecalcRequest) -> Result<RecalcOutcome, BrandscopeError> {
        let range = validated_range(req)?;
        let run_lock = self.store.run_lock(&req.run)?;
        let _guard = run_lock
            .lock()
            .map_err(|_| BrandscopeError::Store(format!("lock for {} poisoned", req.run)))?;

        let responses = self.load(&req.run, range.as_ref())?;
        let fingerprint = input_fingerprint(&responses, range.as_ref())?;
        if let Some(hit) = self.cached_outcome(req, &fingerprint, responses.len())? {
            return Ok(hit);
        }

        let previous = self.previous_sets(&req.run)?;
        let sets = compute_sets(&responses, &req.run, &previous, Utc::now());
        self.write(&req.run, &sets, fingerprint, responses.len())
    }

    /// Metrics recalculation and the citation pass together. Both run concurrently
    /// over the same loaded responses.
    pub fn analyze(
        &self,
        req: &RecalcRequest,
        primary_domain: Option<&str>,
    ) -> Result<Analysis, BrandscopeError> {
        let range = validated_range(req)?;
        let run_lock = self.store.run_lock(&req.run)?;
        let _guard = run_lock
            .lock()
            .map_err(|_| BrandscopeError::Store(format!("lock for {} poisoned", req.run)))?;

        let responses = self.load(&req.run, range.as_ref())?;
        let resolver = self.resolver(&req.run, primary_domain)?;
        let fingerprint = input_fingerprint(&responses, range.as_ref())?;
        if let Some(outcome) = self.cached_outcome(req, &fingerprint, responses.len())? {
            let pages = aggregate_citations(&responses, &resolver, &self.canonicalizer);
            return Ok(Analysis { outcome, pages });
        }

        let previous = self.previous_sets(&req.run)?;
        let canonicalizer = &self.canonicalizer;
        let now = Utc::now();
        let (sets, pages) = rayon::join(
            || compute_sets(&responses, &req.run, &previous, now),
            || aggregate_citations(&responses, &resolver, canonicalizer),
        );
        let outcome = self.write(&req.run, &sets, fingerprint, responses.len())?;
        Ok(Analysis { outcome, pages })
    }

    /// Actionable pages of a run. `primary_domain` overrides the configured domain.
    pub fn actionable_pages(
        &self,
        run: &RunKey,
        primary_domain: Option<&str>,
    ) -> Result<CitationReport, BrandscopeError> {
        let responses = self.load(run, None)?;
        let resolver = self.resolver(run, primary_domain)?;
        Ok(aggregate_citations(&responses, &resolver, &self.canonicalizer))
    }

    fn load(
        &self,
        run: &RunKey,
        range: Option<&DateRange>,
    ) -> Result<Vec<ScoredResponse>, BrandscopeError> {
        let responses = load_completed(self.source, run, range, self.settings.batch_size)?;
        if responses.is_empty() {
            return Err(BrandscopeError::NoData(match range {
                Some(r) => format!(
                    "{} between {} and {}",
                    run,
                    r.start.format("%Y-%m-%d"),
                    r.end.format("%Y-%m-%d")
                ),
                None => run.to_string(),
            }));
        }
        Ok(responses)
    }

    fn resolver(
        &self,
        run: &RunKey,
        primary_domain: Option<&str>,
    ) -> Result<MappingResolver, BrandscopeError> {
        let rules = self.source.mapping_rules(run)?;
        let domain = primary_domain.or_else(|| self.settings.primary_domain(&run.user_id));
        Ok(MappingResolver::new(&rules, &self.canonicalizer, domain))
    }

    fn cached_outcome(
        &self,
        req: &RecalcRequest,
        fingerprint: &str,
        total_prompts: usize,
    ) -> Result<Option<RecalcOutcome>, BrandscopeError> {
        if req.force {
            return Ok(None);
        }
        let stored = self.store.fingerprints(&req.run)?;
        if stored.len() == 1 && stored[0] == fingerprint {
            info!(run = %req.run, "input unchanged, keeping stored metric sets");
            return Ok(Some(RecalcOutcome {
                scopes_recalculated: 0,
                cached: true,
                total_prompts,
                fingerprint: fingerprint.to_string(),
            }));
        }
        Ok(None)
    }

    fn previous_sets(
        &self,
        run: &RunKey,
    ) -> Result<BTreeMap<ScopeKey, AggregatedMetricSet>, BrandscopeError> {
        Ok(self
            .store
            .load_sets(run, None)?
            .into_iter()
            .map(|set| (set.scope_key(), set))
            .collect())
    }

    fn write(
        &self,
        run: &RunKey,
        sets: &[AggregatedMetricSet],
        fingerprint: String,
        total_prompts: usize,
    ) -> Result<RecalcOutcome, BrandscopeError> {
        self.store.replace_run_sets(run, sets, &fingerprint)?;
        info!(run = %run, scopes = sets.len(), prompts = total_prompts, "recalculated");
        Ok(RecalcOutcome {
            scopes_recalculated: sets.len(),
            cached: false,
            total_prompts,
            fingerprint,
        })
    }
}

fn validated_range(req: &RecalcRequest) -> Result<Option<DateRange>, BrandscopeError> {
    req.date_range
        .map(|r| DateRange::new(r.start, r.end))
        .transpose()
}

/// Ranked metric sets for every bucket of every scope, ordered by scope key.
///
/// The brand universe spans all of `responses`, so every set ranks the same
/// competitive set. `previous` supplies the rank-change baseline per key.
pub fn compute_sets(
    responses: &[ScoredResponse],
    run: &RunKey,
    previous: &BTreeMap<ScopeKey, AggregatedMetricSet>,
    now: DateTime<Utc>,
) -> Vec<AggregatedMetricSet> {
    let refs: Vec<&ScoredResponse> = responses.iter().collect();
    let universe = BrandUniverse::from_responses(refs.iter().copied());
    let buckets = partition_all(&refs);

    buckets
        .par_iter()
        .filter_map(|(key, bucket)| {
            let start = bucket.iter().map(|r| r.tested_at).min()?;
            let end = bucket.iter().map(|r| r.tested_at).max()?;
            let brands = assign_ranks(summarize_bucket(bucket, &universe), previous.get(key));
            debug!(bucket = %key, prompts = bucket.len(), brands = brands.len(), "bucket ranked");
            Some(AggregatedMetricSet {
                user_id: run.user_id.clone(),
                run_id: run.run_id.clone(),
                scope: key.scope(),
                scope_value: key.value().to_string(),
                date_range: DateRange { start, end },
                total_prompts: bucket.len(),
                total_brands: brands.len(),
                brands,
                last_calculated: now,
            })
        })
        .collect()
}
