// Mapping resolver: applies user URL mapping rules to canonical citations and
// flags foreign-host citations that have no redirect mapping.

use crate::canonical::{bare_host, CanonicalUrl, Canonicalizer};
use crate::types::{MappingStatus, UrlMappingRule};
use std::cmp::Reverse;
use tracing::warn;

/// How a rule's source selects citations, most specific first
#[derive(Debug, Clone, PartialEq, Eq)]
enum Matcher {
    /// `host/path`: exactly this page. A source without a query matches the page
    /// under any query; a source with one matches that query only.
    Exact(String),
    /// `host/path*`: the page and everything below it
    Prefix(String),
    /// `host`: every page on the host
    Host(String),
}

impl Matcher {
    fn specificity(&self) -> (u8, usize) {
        match self {
            Matcher::Exact(k) => (2, k.len()),
            Matcher::Prefix(k) => (1, k.len()),
            Matcher::Host(h) => (0, h.len()),
        }
    }

    fn matches(&self, citation: &CanonicalUrl) -> bool {
        let key = site_key(&citation.key);
        match self {
            Matcher::Exact(k) if k.contains('?') => key == k.as_str(),
            Matcher::Exact(k) => without_query(key) == k.as_str(),
            Matcher::Prefix(p) => {
                key == p.as_str()
                    || key
                        .strip_prefix(p.as_str())
                        .map_or(false, |rest| rest.starts_with('/') || rest.starts_with('?'))
            }
            Matcher::Host(h) => bare_host(&citation.host) == h.as_str(),
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    id: String,
    matcher: Matcher,
    target: CanonicalUrl,
}

/// Outcome of resolving one citation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Canonical URL after any rewrite
    pub effective: CanonicalUrl,
    pub status: MappingStatus,
    pub rule_id: Option<String>,
}

/// Rule set of one user/run plus the owner brand's primary domain.
#[derive(Debug, Clone, Default)]
pub struct MappingResolver {
    rules: Vec<CompiledRule>,
    primary_domain: Option<String>,
}

impl MappingResolver {
    /// Compile rules. Rules whose source or target cannot be canonicalized are
    /// dropped with a warning; rule order is by id so fetch order never matters.
    pub fn new(
        rules: &[UrlMappingRule],
        canonicalizer: &Canonicalizer,
        primary_domain: Option<&str>,
    ) -> Self {
        let mut sorted: Vec<&UrlMappingRule> = rules.iter().collect();
        sorted.sort_by(|a, b| a.id.cmp(&b.id));

        let compiled = sorted
            .into_iter()
            .filter_map(|rule| match compile_rule(rule, canonicalizer) {
                Some(c) => Some(c),
                None => {
                    warn!(rule_id = %rule.id, source = %rule.source, target = %rule.target,
                        "skipping unusable url mapping rule");
                    None
                }
            })
            .collect();

        let primary_domain = primary_domain
            .and_then(|d| canonicalizer.canonicalize(d).ok())
            .map(|c| bare_host(&c.host).to_string());

        Self {
            rules: compiled,
            primary_domain,
        }
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn primary_domain(&self) -> Option<&str> {
        self.primary_domain.as_deref()
    }

    /// Apply the most specific matching rule; otherwise classify the host.
    pub fn resolve(&self, citation: &CanonicalUrl) -> Resolution {
        let best = self
            .rules
            .iter()
            .enumerate()
            .filter(|(_, r)| r.matcher.matches(citation))
            .max_by_key(|(idx, r)| (r.matcher.specificity(), Reverse(*idx)));

        if let Some((_, rule)) = best {
            let effective = match (&rule.matcher, rule.target.is_root()) {
                // host-to-host rule keeps the cited path
                (Matcher::Host(_), true) => citation.with_host(rule.target.host_port()),
                _ => rule.target.clone(),
            };
            return Resolution {
                effective,
                status: MappingStatus::Mapped,
                rule_id: Some(rule.id.clone()),
            };
        }

        let status = if self.is_foreign(&citation.host) {
            MappingStatus::HostnameWarning
        } else {
            MappingStatus::Clean
        };
        Resolution {
            effective: citation.clone(),
            status,
            rule_id: None,
        }
    }

    /// Subdomains of the primary domain count as the same site.
    /// Without a known primary domain nothing is foreign.
    fn is_foreign(&self, host: &str) -> bool {
        match &self.primary_domain {
            None => false,
            Some(primary) => {
                let host = bare_host(host);
                host != primary.as_str() && !host.ends_with(&format!(".{}", primary))
            }
        }
    }
}

fn compile_rule(rule: &UrlMappingRule, canonicalizer: &Canonicalizer) -> Option<CompiledRule> {
    let target = canonicalizer.canonicalize(&rule.target).ok()?;
    let raw_source = rule.source.trim();
    let (source_text, is_prefix) = match raw_source.strip_suffix('*') {
        Some(rest) => (rest, true),
        None => (raw_source, false),
    };
    let source = canonicalizer.canonicalize(source_text).ok()?;

    let matcher = if source.is_root() {
        Matcher::Host(bare_host(&source.host).to_string())
    } else if is_prefix {
        Matcher::Prefix(site_key(&source.key).to_string())
    } else {
        Matcher::Exact(site_key(&source.key).to_string())
    };

    Some(CompiledRule {
        id: rule.id.clone(),
        matcher,
        target,
    })
}

fn site_key(key: &str) -> &str {
    bare_host(key)
}

fn without_query(key: &str) -> &str {
    key.split_once('?').map_or(key, |(page, _)| page)
}
