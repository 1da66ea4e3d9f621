//! Embeddable-URL probing.
//!
//! Clients may ask whether an arbitrary website can be embedded in an
//! iframe. The gateway answers by probing the URL: an HTTP HEAD with a
//! five-second timeout (some servers reject HEAD with 405, in which case
//! the probe retries with GET), then an `X-Frame-Options` inspection.
//! LinkedIn answers status 999 to bots, which means reachable-but-blocked.
//! A configured domain allow-list short-circuits the probe entirely.

use std::time::Duration;
use tracing::debug;

/// Environment variable holding the comma-separated domain allow-list.
pub const ALLOWLIST_ENV: &str = "EMBEDDABLE_DOMAINS_ALLOWLIST";

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of a probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Embeddability {
    /// The site can be iframed
    Embeddable,
    /// The site answered and forbids framing
    NotEmbeddable,
    /// The site is reachable but refuses automated requests (status 999)
    Blocked,
    /// The site could not be reached at all
    Unreachable(String),
}

impl Embeddability {
    pub fn is_embeddable(&self) -> bool {
        matches!(self, Embeddability::Embeddable)
    }

    /// True when the probe reached the site (used for the `state` answer
    /// field).
    pub fn is_reachable(&self) -> bool {
        !matches!(self, Embeddability::Unreachable(_))
    }

    pub fn message(&self) -> Option<String> {
        match self {
            Embeddability::Unreachable(reason) => Some(reason.clone()),
            Embeddability::Blocked => Some("site blocks automated requests".to_string()),
            _ => None,
        }
    }
}

/// Probes websites for embeddability.
#[derive(Debug)]
pub struct EmbeddableChecker {
    allowlist: Vec<String>,
    http: reqwest::Client,
}

impl EmbeddableChecker {
    /// Creates a checker with an explicit allow-list of domain substrings.
    pub fn new(allowlist: Vec<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .expect("reqwest client");
        Self { allowlist, http }
    }

    /// Reads the allow-list from `EMBEDDABLE_DOMAINS_ALLOWLIST`
    /// (comma-separated substrings; empty or unset means no allow-list).
    pub fn from_env() -> Self {
        let allowlist = std::env::var(ALLOWLIST_ENV)
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        Self::new(allowlist)
    }

    /// True when the URL's domain matches an allow-list entry.
    pub fn is_allowlisted(&self, url: &str) -> bool {
        match url::Url::parse(url) {
            Ok(parsed) => parsed
                .host_str()
                .map(|host| self.allowlist.iter().any(|entry| host.contains(entry.as_str())))
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Probes one URL.
    pub async fn check(&self, target: &str) -> Embeddability {
        if self.is_allowlisted(target) {
            debug!("{} allow-listed; skipping probe", target);
            return Embeddability::Embeddable;
        }

        let response = match self.http.head(target).send().await {
            Ok(response) if response.status().as_u16() == 405 => {
                // HEAD not allowed; retry with the verb the site accepts.
                match self.http.get(target).send().await {
                    Ok(response) => response,
                    Err(err) => return Embeddability::Unreachable(err.to_string()),
                }
            }
            Ok(response) => response,
            Err(err) => return Embeddability::Unreachable(err.to_string()),
        };

        // LinkedIn idiom: reachable, but bots are refused.
        if response.status().as_u16() == 999 {
            return Embeddability::Blocked;
        }

        match response.headers().get("x-frame-options") {
            Some(value) => {
                let value = value.to_str().unwrap_or_default().to_ascii_lowercase();
                if value.contains("deny") || value.contains("sameorigin") {
                    Embeddability::NotEmbeddable
                } else {
                    Embeddability::Embeddable
                }
            }
            None => Embeddability::Embeddable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowlist_matches_domain_substrings() {
        let checker = EmbeddableChecker::new(vec!["example.com".to_string()]);
        assert!(checker.is_allowlisted("https://docs.example.com/page"));
        assert!(!checker.is_allowlisted("https://example.org/"));
        assert!(!checker.is_allowlisted("not a url"));
    }

    #[tokio::test]
    async fn allowlisted_urls_skip_the_probe() {
        let checker = EmbeddableChecker::new(vec!["intra.test".to_string()]);
        // The host does not resolve; only the allow-list makes this pass.
        let result = checker.check("https://wiki.intra.test/page").await;
        assert_eq!(result, Embeddability::Embeddable);
    }

    #[tokio::test]
    async fn unreachable_hosts_report_unreachable() {
        let checker = EmbeddableChecker::new(vec![]);
        let result = checker
            .check("http://127.0.0.1:1/nothing-listens-here")
            .await;
        assert!(matches!(result, Embeddability::Unreachable(_)));
        assert!(!result.is_reachable());
    }
}
