// URL canonicalization: raw citation URL -> `host/path[?query]` dedup key.
// Pure string transformation, never touches the network.

use std::fmt;
use url::form_urlencoded;
use url::Url;

/// Query parameters that only carry attribution and never change the page.
const TRACKING_PARAMS: &[&str] = &[
    "_ga",
    "_gl",
    "dclid",
    "fbclid",
    "gclid",
    "igshid",
    "mc_cid",
    "mc_eid",
    "msclkid",
    "ref",
    "ref_src",
    "srsltid",
    "yclid",
];

/// Any parameter starting with this prefix is tracking (utm_source, utm_medium, ...).
const TRACKING_PREFIX: &str = "utm_";

/// A citation reduced to its dedup key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CanonicalUrl {
    /// `host[:port]/path[?query]`
    pub key: String,
    /// Lower-cased host without port
    pub host: String,
    host_port_len: usize,
}

impl CanonicalUrl {
    /// Display form of the key, always https.
    pub fn display_url(&self) -> String {
        format!("https://{}", self.key)
    }

    /// Everything after `host[:port]`, starting with `/`.
    pub fn path_and_query(&self) -> &str {
        &self.key[self.host_port_len..]
    }

    /// True when the key addresses the bare root with no query.
    pub fn is_root(&self) -> bool {
        self.path_and_query() == "/"
    }

    /// Same key with a different `host[:port]`.
    pub fn with_host(&self, host_port: &str) -> CanonicalUrl {
        let host = host_port.split(':').next().unwrap_or(host_port).to_string();
        CanonicalUrl {
            key: format!("{}{}", host_port, self.path_and_query()),
            host,
            host_port_len: host_port.len(),
        }
    }

    pub fn host_port(&self) -> &str {
        &self.key[..self.host_port_len]
    }
}

impl fmt::Display for CanonicalUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

/// Why a raw string produced no canonical key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlRejection {
    Empty,
    UnsupportedScheme(String),
    /// No scheme and no dot-containing host segment
    NotUrlLike,
    Unparseable(String),
}

impl fmt::Display for UrlRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UrlRejection::Empty => write!(f, "empty url"),
            UrlRejection::UnsupportedScheme(s) => write!(f, "unsupported scheme: {}", s),
            UrlRejection::NotUrlLike => write!(f, "not url-like (no scheme, no dotted host)"),
            UrlRejection::Unparseable(e) => write!(f, "unparseable url: {}", e),
        }
    }
}

/// Canonicalizer with the built-in tracking list plus configured extras.
#[derive(Debug, Clone, Default)]
pub struct Canonicalizer {
    extra_params: Vec<String>,
}

impl Canonicalizer {
    pub fn new<I, S>(extra_params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            extra_params: extra_params
                .into_iter()
                .map(|p| p.as_ref().trim().to_ascii_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    fn is_tracking(&self, param: &str) -> bool {
        let lower = param.to_ascii_lowercase();
        lower.starts_with(TRACKING_PREFIX)
            || TRACKING_PARAMS.contains(&lower.as_str())
            || self.extra_params.iter().any(|p| *p == lower)
    }

    pub fn canonicalize(&self, raw: &str) -> Result<CanonicalUrl, UrlRejection> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(UrlRejection::Empty);
        }

        let with_scheme = match explicit_scheme(trimmed) {
            Some(scheme) => {
                let scheme = scheme.to_ascii_lowercase();
                if scheme != "http" && scheme != "https" {
                    return Err(UrlRejection::UnsupportedScheme(scheme));
                }
                trimmed.to_string()
            }
            None => {
                let bare = trimmed.trim_start_matches('/');
                let host_segment = bare
                    .split(|c| c == '/' || c == '?' || c == '#')
                    .next()
                    .unwrap_or("");
                if !host_segment.contains('.')
                    || host_segment.contains(char::is_whitespace)
                    || host_segment.contains('@')
                {
                    return Err(UrlRejection::NotUrlLike);
                }
                // `host:port` is fine, `mailto:` / `javascript:` style prefixes are not
                if let Some((_, port)) = host_segment.split_once(':') {
                    if port.is_empty() || !port.chars().all(|c| c.is_ascii_digit()) {
                        return Err(UrlRejection::NotUrlLike);
                    }
                }
                format!("https://{}", bare)
            }
        };

        let parsed = Url::parse(&with_scheme).map_err(|e| UrlRejection::Unparseable(e.to_string()))?;
        let host = parsed
            .host_str()
            .map(|h| h.trim_end_matches('.').to_ascii_lowercase())
            .filter(|h| !h.is_empty())
            .ok_or_else(|| UrlRejection::Unparseable("missing host".to_string()))?;

        // Url::port() is None for the scheme's default port
        let host_port = match parsed.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.clone(),
        };

        let mut path = parsed.path().trim_end_matches('/').to_string();
        if path.is_empty() {
            path.push('/');
        }

        let mut kept: Vec<(String, String)> = parsed
            .query_pairs()
            .filter(|(k, _)| !self.is_tracking(k))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        kept.sort();
        let query = if kept.is_empty() {
            String::new()
        } else {
            let encoded = form_urlencoded::Serializer::new(String::new())
                .extend_pairs(kept)
                .finish();
            format!("?{}", encoded)
        };

        Ok(CanonicalUrl {
            key: format!("{}{}{}", host_port, path, query),
            host,
            host_port_len: host_port.len(),
        })
    }
}

/// Scheme of `raw` when it starts with `scheme://`. A `://` that appears after a
/// path, query or fragment character (e.g. inside a query value) is not a scheme.
fn explicit_scheme(raw: &str) -> Option<&str> {
    let (scheme, _) = raw.split_once("://")?;
    let mut chars = scheme.chars();
    let valid = chars.next().map_or(false, |c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    valid.then_some(scheme)
}

/// Canonicalize with the built-in tracking list only.
pub fn canonicalize(raw: &str) -> Result<CanonicalUrl, UrlRejection> {
    Canonicalizer::default().canonicalize(raw)
}

/// Dedup key of `raw`, or `None` when the string is not a usable URL.
pub fn canonical_key(raw: &str) -> Option<String> {
    canonicalize(raw).ok().map(|c| c.key)
}

/// Host with a leading `www.` removed, for site-level comparisons.
pub fn bare_host(host: &str) -> &str {
    host.strip_prefix("www.").unwrap_or(host)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_case_slash_and_tracking_are_equivalent() {
        assert_eq!(
            canonical_key("https://Example.com/blog/post/?utm_source=x"),
            canonical_key("example.com/blog/post")
        );
        assert_eq!(
            canonical_key("example.com/blog/post").as_deref(),
            Some("example.com/blog/post")
        );
    }

    #[test]
    fn http_and_https_collapse() {
        assert_eq!(canonical_key("http://site.com/a"), canonical_key("https://site.com/a/"));
    }

    #[test]
    fn default_port_removed_custom_port_kept() {
        assert_eq!(canonical_key("https://site.com:443/a").as_deref(), Some("site.com/a"));
        assert_eq!(canonical_key("http://site.com:80/a").as_deref(), Some("site.com/a"));
        assert_eq!(canonical_key("https://site.com:8443/a").as_deref(), Some("site.com:8443/a"));
    }

    #[test]
    fn root_keeps_its_slash() {
        let c = canonicalize("https://Site.com").unwrap();
        assert_eq!(c.key, "site.com/");
        assert!(c.is_root());
        assert_eq!(canonical_key("site.com/").as_deref(), Some("site.com/"));
    }

    #[test]
    fn meaningful_query_is_preserved() {
        assert_eq!(
            canonical_key("https://shop.com/item?id=42&utm_medium=cpc&fbclid=zz").as_deref(),
            Some("shop.com/item?id=42")
        );
    }

    #[test]
    fn fragment_is_dropped() {
        assert_eq!(canonical_key("https://docs.rs/a#section").as_deref(), Some("docs.rs/a"));
    }

    #[test]
    fn extra_tracking_params_from_config() {
        let c = Canonicalizer::new(["CID"]);
        assert_eq!(c.canonicalize("https://a.com/x?cid=9&page=2").unwrap().key, "a.com/x?page=2");
    }

    #[test]
    fn malformed_inputs_are_rejected() {
        assert_eq!(canonicalize("   "), Err(UrlRejection::Empty));
        assert_eq!(canonicalize("not a url"), Err(UrlRejection::NotUrlLike));
        assert_eq!(canonicalize("localhost/page"), Err(UrlRejection::NotUrlLike));
        assert!(matches!(
            canonicalize("mailto:someone@site.com"),
            Err(UrlRejection::NotUrlLike)
        ));
        assert!(matches!(
            canonicalize("ftp://files.site.com/a"),
            Err(UrlRejection::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn nested_url_in_query_is_not_a_scheme() {
        assert_eq!(
            canonical_key("site.com/redirect?to=https://x.com/a").as_deref(),
            Some("site.com/redirect?to=https%3A%2F%2Fx.com%2Fa")
        );
        assert_eq!(
            canonical_key("https://site.com/redirect?to=https://x.com/a"),
            canonical_key("site.com/redirect?to=https://x.com/a")
        );
    }

    #[test]
    fn query_order_does_not_split_pages() {
        assert_eq!(
            canonical_key("https://shop.com/list?b=2&a=1").as_deref(),
            Some("shop.com/list?a=1&b=2")
        );
        assert_eq!(
            canonical_key("shop.com/list?a=1&b=2"),
            canonical_key("shop.com/list?b=2&utm_source=x&a=1")
        );
    }

    #[test]
    fn scheme_allows_dotless_host() {
        assert_eq!(canonical_key("http://intranet/wiki").as_deref(), Some("intranet/wiki"));
    }

    #[test]
    fn with_host_swaps_only_the_host() {
        let c = canonicalize("https://old.com/a/b?q=1").unwrap();
        let moved = c.with_host("new.com");
        assert_eq!(moved.key, "new.com/a/b?q=1");
        assert_eq!(moved.host, "new.com");
        assert_eq!(moved.path_and_query(), "/a/b?q=1");
    }

    #[test]
    fn bare_host_strips_www() {
        assert_eq!(bare_host("www.acme.com"), "acme.com");
        assert_eq!(bare_host("blog.acme.com"), "blog.acme.com");
    }
}
