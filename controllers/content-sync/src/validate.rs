//! Repository URL allowlist
//!
//! Repository URLs are tenant input, so every clone or pull is checked
//! against an operator-supplied list of Git hosts before any network access.
//! The check fails closed: an empty allowlist rejects everything.
//!
//! Entries are host names compared case-insensitively with any port
//! stripped. `*.example.com` matches every subdomain of `example.com` but not
//! `example.com` itself.

use crate::error::SyncError;
use url::{Host, Url};

#[derive(Debug, Clone, PartialEq, Eq)]
enum HostPattern {
    Exact(String),
    /// Stored with its leading dot (`.example.com`)
    Suffix(String),
}

impl HostPattern {
    fn parse(raw: &str) -> Option<Self> {
        let host = strip_port(raw.trim()).trim_end_matches('.').to_ascii_lowercase();
        if host.is_empty() {
            return None;
        }
        match host.strip_prefix("*.") {
            Some("") => None,
            Some(domain) => Some(HostPattern::Suffix(format!(".{domain}"))),
            None => Some(HostPattern::Exact(host)),
        }
    }

    fn matches(&self, host: &str) -> bool {
        match self {
            HostPattern::Exact(exact) => host == exact,
            HostPattern::Suffix(suffix) => host.len() > suffix.len() && host.ends_with(suffix.as_str()),
        }
    }
}

fn strip_port(entry: &str) -> &str {
    if entry.starts_with('[') {
        return entry.find(']').map_or(entry, |end| &entry[..=end]);
    }
    entry.split_once(':').map_or(entry, |(host, _)| host)
}

/// Set of Git hosts content may be fetched from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostAllowlist {
    patterns: Vec<HostPattern>,
}

impl HostAllowlist {
    /// Parses a comma separated host list; blank entries are ignored
    pub fn parse(list: &str) -> Self {
        Self {
            patterns: list.split(',').filter_map(HostPattern::parse).collect(),
        }
    }

    /// Whether no host is allowed
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    fn allows(&self, host: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(host))
    }

    /// Checks a repository URL and returns it parsed
    pub fn validate_repo_url(&self, raw: &str) -> Result<Url, SyncError> {
        if self.is_empty() {
            return Err(SyncError::RepoNotAllowed("no Git hosts are allowed".to_string()));
        }

        let url = Url::parse(raw.trim()).map_err(|e| SyncError::InvalidRepoUrl(format!("{raw}: {e}")))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(SyncError::RepoNotAllowed(format!(
                "scheme {} is not allowed, use http or https",
                url.scheme()
            )));
        }
        if !url.username().is_empty() || url.password().is_some() {
            return Err(SyncError::RepoNotAllowed(
                "credentials in the repository URL are not allowed, use secretRef".to_string(),
            ));
        }

        let host = match url.host() {
            Some(Host::Domain(domain)) => domain.trim_end_matches('.').to_ascii_lowercase(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => format!("[{addr}]"),
            None => return Err(SyncError::InvalidRepoUrl(format!("{raw}: missing host"))),
        };

        if !self.allows(&host) {
            return Err(SyncError::RepoNotAllowed(format!("host {host} is not in the allowlist")));
        }
        Ok(url)
    }
}

impl std::fmt::Display for HostAllowlist {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries: Vec<String> = self
            .patterns
            .iter()
            .map(|p| match p {
                HostPattern::Exact(host) => host.clone(),
                HostPattern::Suffix(suffix) => format!("*{suffix}"),
            })
            .collect();
        f.write_str(&entries.join(","))
    }
}

/// Canonical form of a repository URL for comparing webhook payloads with
/// records: scheme, case, trailing `/` and `.git` are ignored
pub fn normalize_repo_url(raw: &str) -> String {
    let lower = raw.trim().to_ascii_lowercase();
    let without_scheme = lower
        .strip_prefix("https://")
        .or_else(|| lower.strip_prefix("http://"))
        .unwrap_or(&lower);
    let trimmed = without_scheme.trim_end_matches('/');
    trimmed.strip_suffix(".git").unwrap_or(trimmed).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_allowlist() {
        let allowlist = HostAllowlist::parse("*.example.com");
        assert!(allowlist.validate_repo_url("https://git.example.com/x.git").is_ok());
        assert!(matches!(
            allowlist.validate_repo_url("https://git.other.com/x.git"),
            Err(SyncError::RepoNotAllowed(_))
        ));
        assert!(matches!(
            allowlist.validate_repo_url("ssh://git@example.com/x.git"),
            Err(SyncError::RepoNotAllowed(_))
        ));
        // the wildcard covers subdomains only
        assert!(allowlist.validate_repo_url("https://example.com/x.git").is_err());
        assert!(allowlist.validate_repo_url("https://evil-example.com/x.git").is_err());
    }

    #[test]
    fn test_empty_allowlist_rejects_everything() {
        let allowlist = HostAllowlist::parse(" , ");
        assert!(allowlist.is_empty());
        assert!(matches!(
            allowlist.validate_repo_url("https://git.example.com/x.git"),
            Err(SyncError::RepoNotAllowed(_))
        ));
    }

    #[test]
    fn test_case_and_port_are_ignored() {
        let allowlist = HostAllowlist::parse("GitHub.com, git.internal:8443");
        assert_eq!(allowlist.len(), 2);
        assert!(allowlist.validate_repo_url("https://GITHUB.COM/org/repo").is_ok());
        assert!(allowlist.validate_repo_url("https://github.com:443/org/repo").is_ok());
        assert!(allowlist.validate_repo_url("http://git.internal:3000/org/repo").is_ok());
        assert!(allowlist.validate_repo_url("https://api.github.com/org/repo").is_err());
    }

    #[test]
    fn test_rejects_scp_syntax_and_embedded_credentials() {
        let allowlist = HostAllowlist::parse("github.com");
        assert!(matches!(
            allowlist.validate_repo_url("git@github.com:org/repo.git"),
            Err(SyncError::InvalidRepoUrl(_))
        ));
        assert!(matches!(
            allowlist.validate_repo_url("https://user:pw@github.com/org/repo.git"),
            Err(SyncError::RepoNotAllowed(_))
        ));
        assert!(allowlist.validate_repo_url("file:///etc/passwd").is_err());
    }

    #[test]
    fn test_ip_literals_need_explicit_entries() {
        let allowlist = HostAllowlist::parse("*.example.com");
        assert!(allowlist.validate_repo_url("http://169.254.169.254/latest").is_err());

        let allowlist = HostAllowlist::parse("10.0.0.5:3000");
        assert!(allowlist.validate_repo_url("http://10.0.0.5/org/repo").is_ok());
    }

    #[test]
    fn test_display() {
        assert_eq!(HostAllowlist::parse("a.io, *.B.io").to_string(), "a.io,*.b.io");
    }

    #[test]
    fn test_normalize_repo_url() {
        assert_eq!(normalize_repo_url("https://GitHub.com/Org/Repo.git"), "github.com/org/repo");
        assert_eq!(normalize_repo_url("http://github.com/org/repo/"), "github.com/org/repo");
        assert_eq!(
            normalize_repo_url("https://github.com/org/repo"),
            normalize_repo_url("https://github.com/org/repo.git")
        );
    }
}
