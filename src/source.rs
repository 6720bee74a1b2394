// Query capability over upstream-owned records: completed responses of a run
// (optionally date-bounded) and the run's URL mapping rules.

use crate::error::BrandscopeError;
use crate::types::{DateRange, RunKey, ScoredResponse, UrlMappingRule};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

pub trait ResponseSource {
    /// Up to `limit` completed responses of `run` inside `range`, with id greater
    /// than `after_id`, in ascending id order.
    fn response_batch(
        &self,
        run: &RunKey,
        range: Option<&DateRange>,
        after_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ScoredResponse>, BrandscopeError>;

    fn mapping_rules(&self, run: &RunKey) -> Result<Vec<UrlMappingRule>, BrandscopeError>;
}

/// Materialize every qualifying response of `run`, reading `batch_size` rows at a time.
pub fn load_completed(
    source: &dyn ResponseSource,
    run: &RunKey,
    range: Option<&DateRange>,
    batch_size: usize,
) -> Result<Vec<ScoredResponse>, BrandscopeError> {
    if batch_size == 0 {
        return Err(BrandscopeError::Validation("batch size must be > 0".to_string()));
    }

    let mut all: Vec<ScoredResponse> = Vec::new();
    let mut after: Option<String> = None;
    loop {
        let batch = source.response_batch(run, range, after.as_deref(), batch_size)?;
        let full = batch.len() >= batch_size;
        let last = batch.last().map(|r| r.id.clone());
        debug!(run = %run, rows = batch.len(), "loaded response batch");
        all.extend(batch.into_iter().filter(|r| r.qualifies(range)));

        match last {
            // stop unless the keyset advanced
            Some(id) if full && after.as_deref().map_or(true, |prev| id.as_str() > prev) => {
                after = Some(id)
            }
            _ => break,
        }
    }
    Ok(all)
}

/// In-memory source, used for JSON bundles and tests
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    responses: Vec<ScoredResponse>,
    rules: Vec<UrlMappingRule>,
}

impl MemorySource {
    pub fn new(mut responses: Vec<ScoredResponse>, rules: Vec<UrlMappingRule>) -> Self {
        responses.sort_by(|a, b| a.id.cmp(&b.id));
        Self { responses, rules }
    }
}

impl From<IngestBundle> for MemorySource {
    fn from(bundle: IngestBundle) -> Self {
        MemorySource::new(bundle.responses, bundle.mapping_rules)
    }
}

impl ResponseSource for MemorySource {
    fn response_batch(
        &self,
        run: &RunKey,
        range: Option<&DateRange>,
        after_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ScoredResponse>, BrandscopeError> {
        Ok(self
            .responses
            .iter()
            .filter(|r| r.run_key() == *run && r.qualifies(range))
            .filter(|r| after_id.map_or(true, |after| r.id.as_str() > after))
            .take(limit)
            .cloned()
            .collect())
    }

    fn mapping_rules(&self, run: &RunKey) -> Result<Vec<UrlMappingRule>, BrandscopeError> {
        Ok(self
            .rules
            .iter()
            .filter(|r| r.user_id == run.user_id && r.run_id == run.run_id)
            .cloned()
            .collect())
    }
}

/// Upstream export: `{ "responses": [...], "mapping_rules": [...] }`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestBundle {
    #[serde(default)]
    pub responses: Vec<ScoredResponse>,
    #[serde(default)]
    pub mapping_rules: Vec<UrlMappingRule>,
}

impl IngestBundle {
    pub fn from_json(json: &str) -> Result<Self, BrandscopeError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, BrandscopeError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResponseStatus;
    use chrono::{TimeZone, Utc};

    fn response(id: &str, run: &str, status: ResponseStatus) -> ScoredResponse {
        ScoredResponse {
            id: id.to_string(),
            user_id: "u1".to_string(),
            run_id: run.to_string(),
            prompt_id: "p".to_string(),
            platform: "chatgpt".to_string(),
            topic: None,
            persona: None,
            tested_at: Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap(),
            updated_at: None,
            status,
            brands: vec![],
        }
    }

    #[test]
    fn test_pages_through_everything() {
        let rs: Vec<ScoredResponse> = (0..7)
            .map(|i| response(&format!("id-{:02}", i), "r1", ResponseStatus::Completed))
            .collect();
        let source = MemorySource::new(rs, vec![]);
        let loaded = load_completed(&source, &RunKey::new("u1", "r1"), None, 3).unwrap();
        assert_eq!(loaded.len(), 7);
        assert_eq!(loaded[6].id, "id-06");
    }

    #[test]
    fn test_filters_run_and_status() {
        let source = MemorySource::new(
            vec![
                response("a", "r1", ResponseStatus::Completed),
                response("b", "r1", ResponseStatus::Failed),
                response("c", "r2", ResponseStatus::Completed),
            ],
            vec![],
        );
        let loaded = load_completed(&source, &RunKey::new("u1", "r1"), None, 10).unwrap();
        let ids: Vec<&str> = loaded.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a"]);
    }

    #[test]
    fn test_zero_batch_is_validation_error() {
        let source = MemorySource::default();
        let err = load_completed(&source, &RunKey::new("u1", "r1"), None, 0).unwrap_err();
        assert!(matches!(err, BrandscopeError::Validation(_)));
    }

    #[test]
    fn test_bundle_defaults_missing_lists() {
        let bundle = IngestBundle::from_json(r#"{"responses": []}"#).unwrap();
        assert!(bundle.mapping_rules.is_empty());
    }
}
