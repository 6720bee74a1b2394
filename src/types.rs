use crate::error::BrandscopeError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Bucket value used when a response lacks the scope's dimension.
pub const UNKNOWN_SCOPE_VALUE: &str = "Unknown";

/// Sentinel scope value of the single `overall` bucket.
pub const OVERALL_SCOPE_VALUE: &str = "all";

/// One (user, analysis-run) key space.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunKey {
    pub user_id: String,
    pub run_id: String,
}

impl RunKey {
    pub fn new(user_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            run_id: run_id.into(),
        }
    }
}

impl fmt::Display for RunKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.user_id, self.run_id)
    }
}

// ── Input records (owned upstream) ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Pending,
    Completed,
    Failed,
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseStatus::Pending => write!(f, "pending"),
            ResponseStatus::Completed => write!(f, "completed"),
            ResponseStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A raw citation URL scraped from a response, tagged with its kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitationRef {
    pub url: String,
    #[serde(default = "default_citation_type")]
    pub citation_type: String,
}

fn default_citation_type() -> String {
    "link".to_string()
}

/// Per-brand scorecard entry of one response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrandSignal {
    pub brand: String,
    #[serde(default)]
    pub is_owner: bool,
    #[serde(default)]
    pub mentioned: bool,
    /// 0-100, meaningful only when `mentioned`
    #[serde(default)]
    pub visibility_score: f64,
    /// 1-based rank inside the response text; `None` or 0 when not positioned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<u32>,
    #[serde(default)]
    pub word_count: u32,
    #[serde(default)]
    pub depth_of_mention: f64,
    #[serde(default)]
    pub citations: Vec<CitationRef>,
}

impl BrandSignal {
    /// Position if the brand was actually placed in the response.
    pub fn placed_position(&self) -> Option<u32> {
        self.position.filter(|p| *p > 0)
    }
}

/// One prompt tested against one LLM platform, already scored upstream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredResponse {
    pub id: String,
    pub user_id: String,
    pub run_id: String,
    pub prompt_id: String,
    pub platform: String,
    /// Topic name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    /// Persona type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona: Option<String>,
    pub tested_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    pub status: ResponseStatus,
    #[serde(default)]
    pub brands: Vec<BrandSignal>,
}

impl ScoredResponse {
    pub fn run_key(&self) -> RunKey {
        RunKey::new(&self.user_id, &self.run_id)
    }

    /// Completed and inside the optional date range.
    pub fn qualifies(&self, range: Option<&DateRange>) -> bool {
        self.status == ResponseStatus::Completed
            && range.map_or(true, |r| r.contains(self.tested_at))
    }

    /// Last time this response changed; falls back to `tested_at`.
    pub fn last_touched(&self) -> DateTime<Utc> {
        self.updated_at.unwrap_or(self.tested_at)
    }
}

/// User-owned rewrite from a stale source host/page to a current target URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UrlMappingRule {
    pub id: String,
    pub user_id: String,
    pub run_id: String,
    /// `host`, `host/path`, or `host/path*` (prefix)
    pub source: String,
    pub target: String,
}

/// Inclusive date window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, BrandscopeError> {
        if start > end {
            return Err(BrandscopeError::Validation(format!(
                "date range start {} is after end {}",
                start.to_rfc3339(),
                end.to_rfc3339()
            )));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts <= self.end
    }
}

// ── Scopes ──

/// Partitioning dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Overall,
    Platform,
    Topic,
    Persona,
}

impl Scope {
    pub const ALL: [Scope; 4] = [Scope::Overall, Scope::Platform, Scope::Topic, Scope::Persona];

    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Overall => "overall",
            Scope::Platform => "platform",
            Scope::Topic => "topic",
            Scope::Persona => "persona",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = BrandscopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "overall" => Ok(Scope::Overall),
            "platform" => Ok(Scope::Platform),
            "topic" => Ok(Scope::Topic),
            "persona" => Ok(Scope::Persona),
            other => Err(BrandscopeError::Validation(format!("unknown scope: {}", other))),
        }
    }
}

/// A concrete bucket: scope plus its value
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "scope", content = "value", rename_all = "lowercase")]
pub enum ScopeKey {
    Overall,
    Platform(String),
    Topic(String),
    Persona(String),
}

impl ScopeKey {
    /// Rebuild a key from its persisted (scope, value) pair.
    pub fn from_parts(scope: Scope, value: &str) -> Self {
        match scope {
            Scope::Overall => ScopeKey::Overall,
            Scope::Platform => ScopeKey::Platform(value.to_string()),
            Scope::Topic => ScopeKey::Topic(value.to_string()),
            Scope::Persona => ScopeKey::Persona(value.to_string()),
        }
    }

    pub fn scope(&self) -> Scope {
        match self {
            ScopeKey::Overall => Scope::Overall,
            ScopeKey::Platform(_) => Scope::Platform,
            ScopeKey::Topic(_) => Scope::Topic,
            ScopeKey::Persona(_) => Scope::Persona,
        }
    }

    pub fn value(&self) -> &str {
        match self {
            ScopeKey::Overall => OVERALL_SCOPE_VALUE,
            ScopeKey::Platform(v) | ScopeKey::Topic(v) | ScopeKey::Persona(v) => v,
        }
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.scope(), self.value())
    }
}

// ── Aggregated output ──

/// Per-brand statistics inside one bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrandMetricSummary {
    pub brand: String,
    pub is_owner: bool,
    /// Mean over mentioned responses, 0 if never mentioned
    pub visibility_score: f64,
    pub visibility_rank: u32,
    /// previous rank - new rank; `None` without a prior snapshot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank_change: Option<i32>,
    /// mentions / bucket prompts * 100, within 0..=100
    pub share_of_voice: f64,
    /// Mean over positioned responses, 0 if never positioned
    pub avg_position: f64,
    pub avg_position_rank: u32,
    pub word_count: u64,
    pub word_count_rank: u32,
    pub depth_of_mention: f64,
    pub depth_of_mention_rank: u32,
    pub first_place_count: u32,
    pub second_place_count: u32,
    pub third_place_count: u32,
    pub total_appearances: u32,
}

/// Current summary for one (user, run, scope, scope value)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedMetricSet {
    pub user_id: String,
    pub run_id: String,
    pub scope: Scope,
    pub scope_value: String,
    pub date_range: DateRange,
    pub total_prompts: usize,
    pub total_brands: usize,
    pub brands: Vec<BrandMetricSummary>,
    pub last_calculated: DateTime<Utc>,
}

impl AggregatedMetricSet {
    pub fn scope_key(&self) -> ScopeKey {
        ScopeKey::from_parts(self.scope, &self.scope_value)
    }

    pub fn run_key(&self) -> RunKey {
        RunKey::new(&self.user_id, &self.run_id)
    }

    pub fn brand(&self, name: &str) -> Option<&BrandMetricSummary> {
        self.brands.iter().find(|b| b.brand == name)
    }
}

// ── Citations ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingStatus {
    /// Host agrees with the owner's primary domain, no rule applied
    Clean,
    /// Rewritten by a user mapping rule
    Mapped,
    /// Foreign host with no mapping rule
    HostnameWarning,
}

impl fmt::Display for MappingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MappingStatus::Clean => write!(f, "clean"),
            MappingStatus::Mapped => write!(f, "mapped"),
            MappingStatus::HostnameWarning => write!(f, "hostname-warning"),
        }
    }
}

/// One (platform, prompt) pair that cited a page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OccurrenceDetail {
    pub platform: String,
    pub prompt_id: String,
    pub citation_types: BTreeSet<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// A deduplicated actionable page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitationEntry {
    /// `host/path[?query]` dedup key
    pub canonical_url: String,
    /// Display form
    pub url: String,
    pub hostname: String,
    pub source_urls: BTreeSet<String>,
    pub platforms: BTreeSet<String>,
    pub occurrences: Vec<OccurrenceDetail>,
    pub mapping: MappingStatus,
    /// Canonical keys rewritten into this entry by mapping rules
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub mapped_from: BTreeSet<String>,
}

impl CitationEntry {
    pub fn occurrence_count(&self) -> usize {
        self.occurrences.len()
    }
}

/// A citation dropped because its URL could not be canonicalized
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedCitation {
    pub response_id: String,
    pub brand: String,
    pub raw_url: String,
    pub reason: String,
}

/// Actionable pages plus the warnings gathered while building them
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CitationReport {
    pub entries: Vec<CitationEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<SkippedCitation>,
}

// ── Recalculation trigger ──

#[derive(Debug, Clone)]
pub struct RecalcRequest {
    pub run: RunKey,
    pub date_range: Option<DateRange>,
    /// Recompute even if the input set is unchanged since the last write
    pub force: bool,
}

impl RecalcRequest {
    pub fn new(run: RunKey) -> Self {
        Self {
            run,
            date_range: None,
            force: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecalcOutcome {
    pub scopes_recalculated: usize,
    /// True when the stored sets already matched the input and nothing was written
    pub cached: bool,
    pub total_prompts: usize,
    pub fingerprint: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn scope_parse_is_case_insensitive() {
        assert_eq!("Platform".parse::<Scope>().unwrap(), Scope::Platform);
        assert_eq!(" persona ".parse::<Scope>().unwrap(), Scope::Persona);
    }

    #[test]
    fn scope_parse_rejects_unknown() {
        let err = "region".parse::<Scope>().unwrap_err();
        assert!(matches!(err, BrandscopeError::Validation(_)));
    }

    #[test]
    fn scope_key_roundtrips_parts() {
        let key = ScopeKey::Topic("pricing".to_string());
        assert_eq!(ScopeKey::from_parts(key.scope(), key.value()), key);
        assert_eq!(ScopeKey::Overall.value(), OVERALL_SCOPE_VALUE);
    }

    #[test]
    fn inverted_date_range_is_rejected() {
        let a = Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        assert!(DateRange::new(a, b).is_err());
        let range = DateRange::new(b, a).unwrap();
        assert!(range.contains(a));
        assert!(range.contains(b));
    }

    #[test]
    fn zero_position_is_not_placed() {
        let signal = BrandSignal {
            brand: "Acme".to_string(),
            is_owner: false,
            mentioned: true,
            visibility_score: 40.0,
            position: Some(0),
            word_count: 10,
            depth_of_mention: 1.0,
            citations: vec![],
        };
        assert_eq!(signal.placed_position(), None);
    }

    #[test]
    fn signal_defaults_from_sparse_json() {
        let signal: BrandSignal = serde_json::from_str(r#"{"brand": "Acme"}"#).unwrap();
        assert!(!signal.mentioned);
        assert!(signal.citations.is_empty());
        assert_eq!(signal.position, None);
    }
}
