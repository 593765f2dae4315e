use serde::{Deserialize, Serialize};
use url::Url;

use crate::scraper::ScrapeError;

/// Canonical form of a website address, used as the cache and job-result key.
///
/// Invariants: scheme is always `http://`, host is lowercase with no leading
/// `www.`, no trailing slash, query and fragment are dropped. Normalization
/// is idempotent.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedUrl(String);

impl NormalizedUrl {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for NormalizedUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for NormalizedUrl {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Normalize a raw website string into its canonical form.
pub fn normalize_url(raw: &str) -> Result<NormalizedUrl, ScrapeError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ScrapeError::InvalidUrl(raw.to_string()));
    }

    // Force the scheme to http:// so that http/https variants of the same
    // site share one cache key.
    let lower = trimmed.to_ascii_lowercase();
    let with_scheme = if lower.starts_with("https://") {
        format!("http://{}", &trimmed["https://".len()..])
    } else if lower.starts_with("http://") {
        format!("http://{}", &trimmed["http://".len()..])
    } else {
        format!("http://{}", trimmed)
    };

    let parsed =
        Url::parse(&with_scheme).map_err(|_| ScrapeError::InvalidUrl(raw.to_string()))?;

    let host = parsed
        .host_str()
        .ok_or_else(|| ScrapeError::InvalidUrl(raw.to_string()))?
        .to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);

    let authority = match parsed.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };

    let normalized = format!("http://{}{}", authority, parsed.path());
    Ok(NormalizedUrl(
        normalized.trim_end_matches('/').to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    #[test]
    fn test_scheme_and_www_are_canonicalized() {
        assert_eq!(
            normalize_url("HTTPS://WWW.Example.com/").unwrap().as_str(),
            "http://example.com"
        );
        assert_eq!(
            normalize_url("example.com").unwrap().as_str(),
            "http://example.com"
        );
        assert_eq!(
            normalize_url("https://www.example.com/about/").unwrap().as_str(),
            "http://example.com/about"
        );
    }

    #[test]
    fn test_normalization_is_idempotent() {
        for raw in [
            "example.com",
            "https://WWW.Example.com/Contact/",
            "http://example.com:8080/team",
        ] {
            let once = normalize_url(raw).unwrap();
            let twice = normalize_url(once.as_str()).unwrap();
            assert_eq!(once, twice, "re-normalizing {} changed the key", raw);
        }
    }

    #[test]
    fn test_port_is_preserved() {
        assert_eq!(
            normalize_url("example.com:8080/x").unwrap().as_str(),
            "http://example.com:8080/x"
        );
    }

    #[test]
    fn test_invalid_urls_are_rejected() {
        assert!(matches!(
            normalize_url("bad url ##"),
            Err(ScrapeError::InvalidUrl(_))
        ));
        assert!(matches!(normalize_url(""), Err(ScrapeError::InvalidUrl(_))));
        assert!(matches!(
            normalize_url("   "),
            Err(ScrapeError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_surrounding_whitespace_is_stripped() {
        let url = normalize_url("  example.com  ");
        assert_ok!(&url);
        assert_eq!(url.unwrap().as_str(), "http://example.com");
    }
}
