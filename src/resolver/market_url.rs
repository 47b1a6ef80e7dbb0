use thiserror::Error;
use url::Url;

use crate::config::POLYMARKET_EVENT_URL_PREFIX;
use crate::types::Platform;

/// A market URL reduced to its venue and the venue's own identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMarket {
    pub platform: Platform,
    pub identifier: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("Market URL must be a non-empty string")]
    Empty,

    #[error("Malformed market URL: {0}")]
    Malformed(String),

    #[error("Unsupported platform '{host}'. Only Polymarket and Kalshi URLs are supported.")]
    UnsupportedPlatform { host: String },

    #[error("No market identifier found in {platform} URL. Expected {expected}")]
    MissingIdentifier {
        platform: Platform,
        expected: &'static str,
    },
}

impl ResolveError {
    /// Stable machine-readable kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ResolveError::Empty => "empty",
            ResolveError::Malformed(_) => "malformed_url",
            ResolveError::UnsupportedPlatform { .. } => "unsupported_platform",
            ResolveError::MissingIdentifier { .. } => "missing_identifier",
        }
    }
}

const POLYMARKET_FORMAT: &str = "https://polymarket.com/event/{slug}";
const KALSHI_FORMAT: &str = "https://kalshi.com/markets/{series}/{category}/{ticker}";

/// Resolve a raw market URL into `(platform, identifier)`.
///
/// Pure: the same input always yields the same output and nothing leaves the process.
pub fn resolve(raw_url: &str) -> Result<ResolvedMarket, ResolveError> {
    let trimmed = raw_url.trim();
    if trimmed.is_empty() {
        return Err(ResolveError::Empty);
    }

    let url = Url::parse(trimmed).map_err(|e| ResolveError::Malformed(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ResolveError::Malformed(format!(
            "unsupported scheme '{}'",
            url.scheme()
        )));
    }
    let host = url
        .host_str()
        .ok_or_else(|| ResolveError::Malformed("URL has no host".to_string()))?
        .to_ascii_lowercase();

    let platform = detect_platform(&host);
    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|p| !p.is_empty()).collect())
        .unwrap_or_default();

    match platform {
        Platform::Polymarket => match segments.as_slice() {
            ["event", slug, ..] => Ok(ResolvedMarket {
                platform,
                identifier: (*slug).to_string(),
            }),
            _ => Err(ResolveError::MissingIdentifier {
                platform,
                expected: POLYMARKET_FORMAT,
            }),
        },
        Platform::Kalshi => match segments.as_slice() {
            ["markets", rest @ ..] if !rest.is_empty() => Ok(ResolvedMarket {
                platform,
                identifier: rest.join("/"),
            }),
            _ => Err(ResolveError::MissingIdentifier {
                platform,
                expected: KALSHI_FORMAT,
            }),
        },
        Platform::Unknown => Err(ResolveError::UnsupportedPlatform { host }),
    }
}

fn detect_platform(host: &str) -> Platform {
    if host_matches(host, "polymarket.com") {
        Platform::Polymarket
    } else if host_matches(host, "kalshi.com") {
        Platform::Kalshi
    } else {
        Platform::Unknown
    }
}

/// Exact domain or a subdomain of it; `notpolymarket.com` does not match.
fn host_matches(host: &str, domain: &str) -> bool {
    host == domain
        || host
            .strip_suffix(domain)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

/// Turn a legacy bare Polymarket slug into its canonical event URL.
pub fn normalize_legacy_slug(slug: &str) -> Result<String, ResolveError> {
    let slug = slug.trim().trim_matches('/');
    if slug.is_empty() {
        return Err(ResolveError::Empty);
    }
    Ok(format!("{POLYMARKET_EVENT_URL_PREFIX}{slug}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polymarket_event_slug() {
        let r = resolve("https://polymarket.com/event/will-ai-win").unwrap();
        assert_eq!(r.platform, Platform::Polymarket);
        assert_eq!(r.identifier, "will-ai-win");
    }

    #[test]
    fn polymarket_submarket_keeps_event_slug() {
        let r = resolve("https://www.polymarket.com/event/election-2028/who-wins?tid=1").unwrap();
        assert_eq!(r.platform, Platform::Polymarket);
        assert_eq!(r.identifier, "election-2028");
    }

    #[test]
    fn kalshi_joins_remaining_path() {
        let r = resolve("https://kalshi.com/markets/kxtime/times-person-of-the-year/KXTIME-25").unwrap();
        assert_eq!(r.platform, Platform::Kalshi);
        assert_eq!(r.identifier, "kxtime/times-person-of-the-year/KXTIME-25");
    }

    #[test]
    fn kalshi_single_segment() {
        let r = resolve("https://kalshi.com/markets/kxgovshut/").unwrap();
        assert_eq!(r.identifier, "kxgovshut");
    }

    #[test]
    fn resolve_is_deterministic() {
        for raw in [
            "https://polymarket.com/event/foo",
            "https://kalshi.com/markets/a/b/c",
        ] {
            assert_eq!(resolve(raw), resolve(raw));
        }
    }

    #[test]
    fn unsupported_host_is_distinct_from_malformed() {
        let unsupported = resolve("https://manifold.markets/event/foo").unwrap_err();
        let malformed = resolve("not a url at all").unwrap_err();
        assert!(matches!(unsupported, ResolveError::UnsupportedPlatform { .. }));
        assert!(matches!(malformed, ResolveError::Malformed(_)));
        assert_ne!(unsupported.kind(), malformed.kind());
    }

    #[test]
    fn lookalike_domain_is_unsupported() {
        let err = resolve("https://notpolymarket.com/event/foo").unwrap_err();
        assert_eq!(err.kind(), "unsupported_platform");
    }

    #[test]
    fn non_http_scheme_is_malformed() {
        let err = resolve("ftp://polymarket.com/event/foo").unwrap_err();
        assert_eq!(err.kind(), "malformed_url");
    }

    #[test]
    fn supported_host_without_identifier() {
        let err = resolve("https://polymarket.com/markets").unwrap_err();
        assert!(matches!(
            err,
            ResolveError::MissingIdentifier { platform: Platform::Polymarket, .. }
        ));
        let err = resolve("https://kalshi.com/markets").unwrap_err();
        assert_eq!(err.kind(), "missing_identifier");
    }

    #[test]
    fn empty_input() {
        assert_eq!(resolve("   ").unwrap_err(), ResolveError::Empty);
        assert_eq!(normalize_legacy_slug("").unwrap_err(), ResolveError::Empty);
    }

    #[test]
    fn legacy_slug_matches_canonical_url() {
        let url = normalize_legacy_slug("foo-bar").unwrap();
        assert_eq!(url, "https://polymarket.com/event/foo-bar");
        assert_eq!(
            resolve(&url).unwrap(),
            resolve("https://polymarket.com/event/foo-bar").unwrap()
        );
    }
}
