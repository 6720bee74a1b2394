// Citation aggregator: owner-brand citations of a run -> deduplicated actionable pages.

use crate::canonical::Canonicalizer;
use crate::mapping::MappingResolver;
use crate::types::{
    CitationEntry, CitationReport, MappingStatus, OccurrenceDetail, ScoredResponse,
    SkippedCitation,
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Accumulator for one effective canonical key
#[derive(Debug, Default)]
struct PageAcc {
    url: String,
    hostname: String,
    source_urls: BTreeSet<String>,
    platforms: BTreeSet<String>,
    occurrences: BTreeMap<(String, String), OccurrenceDetail>,
    mapped: bool,
    warned: bool,
    mapped_from: BTreeSet<String>,
}

impl PageAcc {
    fn into_entry(self, key: String) -> CitationEntry {
        let mapping = if self.mapped {
            MappingStatus::Mapped
        } else if self.warned {
            MappingStatus::HostnameWarning
        } else {
            MappingStatus::Clean
        };
        CitationEntry {
            url: self.url,
            canonical_url: key,
            hostname: self.hostname,
            source_urls: self.source_urls,
            platforms: self.platforms,
            occurrences: self.occurrences.into_values().collect(),
            mapping,
            mapped_from: self.mapped_from,
        }
    }
}

#[derive(Default)]
struct Fold {
    pages: BTreeMap<String, PageAcc>,
    skipped: Vec<SkippedCitation>,
}

/// Group every owner-brand citation of the completed `responses` by its effective
/// canonical key.
///
/// Entries are ordered by occurrence count descending, then canonical key. Citations
/// that cannot be canonicalized are listed in `skipped` and never abort the pass.
pub fn aggregate_citations(
    responses: &[ScoredResponse],
    resolver: &MappingResolver,
    canonicalizer: &Canonicalizer,
) -> CitationReport {
    let citations = responses
        .iter()
        .filter(|r| r.qualifies(None))
        .flat_map(|r| {
            r.brands
                .iter()
                .filter(|b| b.is_owner)
                .flat_map(move |b| b.citations.iter().map(move |c| (r, b, c)))
        });

    let fold = citations.fold(Fold::default(), |mut acc, (response, brand, citation)| {
        let raw = citation.url.trim();
        let canonical = match canonicalizer.canonicalize(raw) {
            Ok(c) => c,
            Err(reason) => {
                warn!(response_id = %response.id, brand = %brand.brand, url = %raw, %reason,
                    "skipping citation");
                acc.skipped.push(SkippedCitation {
                    response_id: response.id.clone(),
                    brand: brand.brand.clone(),
                    raw_url: raw.to_string(),
                    reason: reason.to_string(),
                });
                return acc;
            }
        };

        let resolution = resolver.resolve(&canonical);
        let page = acc
            .pages
            .entry(resolution.effective.key.clone())
            .or_insert_with(|| PageAcc {
                url: resolution.effective.display_url(),
                hostname: resolution.effective.host.clone(),
                ..PageAcc::default()
            });

        page.source_urls.insert(raw.to_string());
        page.platforms.insert(response.platform.clone());
        match resolution.status {
            MappingStatus::Mapped => {
                page.mapped = true;
                page.mapped_from.insert(canonical.key.clone());
            }
            MappingStatus::HostnameWarning => page.warned = true,
            MappingStatus::Clean => {}
        }

        let first = response.tested_at;
        let last = response.last_touched();
        page.occurrences
            .entry((response.platform.clone(), response.prompt_id.clone()))
            .and_modify(|o| {
                o.citation_types.insert(citation.citation_type.clone());
                o.first_seen = o.first_seen.min(first);
                o.last_seen = o.last_seen.max(last);
            })
            .or_insert_with(|| OccurrenceDetail {
                platform: response.platform.clone(),
                prompt_id: response.prompt_id.clone(),
                citation_types: BTreeSet::from([citation.citation_type.clone()]),
                first_seen: first,
                last_seen: last,
            });
        acc
    });

    let mut entries: Vec<CitationEntry> = fold
        .pages
        .into_iter()
        .map(|(key, page)| page.into_entry(key))
        .collect();
    entries.sort_by(|a, b| {
        b.occurrence_count()
            .cmp(&a.occurrence_count())
            .then_with(|| a.canonical_url.cmp(&b.canonical_url))
    });

    debug!(
        pages = entries.len(),
        skipped = fold.skipped.len(),
        rules = resolver.rule_count(),
        primary_domain = resolver.primary_domain().unwrap_or("-"),
        "citations aggregated"
    );

    CitationReport {
        entries,
        skipped: fold.skipped,
    }
}
