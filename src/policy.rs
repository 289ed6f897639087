use url::Url;

use crate::agent::AgentError;

pub const DEFAULT_BLOCKED_DOMAINS: &[&str] = &[
    "maliciousbook.com",
    "evilvideos.com",
    "darkwebforum.com",
    "shadytok.com",
    "suspiciouspins.com",
    "ilanbigio.com",
];

/// Denylist of domains the browser must never land on. A host matches when it equals a
/// listed domain or is a subdomain of it.
#[derive(Clone, Debug)]
pub struct UrlPolicy {
    blocked_domains: Vec<String>,
}

impl Default for UrlPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCKED_DOMAINS.iter().copied())
    }
}

impl UrlPolicy {
    pub fn new<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            blocked_domains: domains
                .into_iter()
                .map(|d| d.into().trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|d| !d.is_empty())
                .collect(),
        }
    }

    pub fn allow_all() -> Self {
        Self { blocked_domains: Vec::new() }
    }

    pub fn is_blocked(&self, raw_url: &str) -> bool {
        let Some(host) = Url::parse(raw_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
        else {
            return false;
        };
        self.blocked_domains.iter().any(|d| {
            host == *d || host.strip_suffix(d.as_str()).is_some_and(|rest| rest.ends_with('.'))
        })
    }

    pub fn check(&self, raw_url: &str) -> Result<(), AgentError> {
        if self.is_blocked(raw_url) {
            return Err(AgentError::BlockedUrl(raw_url.to_string()));
        }
        Ok(())
    }
}
