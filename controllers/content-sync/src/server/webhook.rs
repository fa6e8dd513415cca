//! Git provider push webhooks

use serde::Deserialize;

const BRANCH_REF_PREFIX: &str = "refs/heads/";

/// Supported webhook senders
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    /// GitHub
    GitHub,
    /// Gitea
    Gitea,
    /// Forgejo
    Forgejo,
}

impl Provider {
    /// Provider named by the `/webhook/{provider}` path segment
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "github" => Some(Provider::GitHub),
            "gitea" => Some(Provider::Gitea),
            "forgejo" => Some(Provider::Forgejo),
            _ => None,
        }
    }

    /// Path segment and metric label
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::GitHub => "github",
            Provider::Gitea => "gitea",
            Provider::Forgejo => "forgejo",
        }
    }

    /// Header carrying the HMAC-SHA256 body signature
    pub fn signature_header(self) -> &'static str {
        match self {
            Provider::GitHub => "x-hub-signature-256",
            Provider::Gitea => "x-gitea-signature",
            Provider::Forgejo => "x-forgejo-signature",
        }
    }

    /// Header naming the event type
    pub fn event_header(self) -> &'static str {
        match self {
            Provider::GitHub => "x-github-event",
            Provider::Gitea => "x-gitea-event",
            Provider::Forgejo => "x-forgejo-event",
        }
    }

    /// Hex digest from a signature header value
    pub fn signature_hex(self, header: &str) -> &str {
        let header = header.trim();
        match self {
            Provider::GitHub => header.strip_prefix("sha256=").unwrap_or(header),
            Provider::Gitea | Provider::Forgejo => header,
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct PushPayload {
    #[serde(rename = "ref")]
    git_ref: String,
    repository: PushRepository,
}

#[derive(Debug, Deserialize)]
struct PushRepository {
    #[serde(default)]
    clone_url: Option<String>,
    #[serde(default)]
    html_url: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

/// Branch push extracted from a webhook body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushEvent {
    /// URLs the provider reports for the repository
    pub repo_urls: Vec<String>,
    /// Pushed branch without `refs/heads/`
    pub branch: String,
}

/// Parses a push payload.
///
/// Returns `Ok(None)` for pushes that are not to a branch (tags) or that
/// carry no repository URL.
pub fn parse_push(body: &[u8]) -> Result<Option<PushEvent>, serde_json::Error> {
    let payload: PushPayload = serde_json::from_slice(body)?;
    let Some(branch) = payload.git_ref.strip_prefix(BRANCH_REF_PREFIX).filter(|b| !b.is_empty()) else {
        return Ok(None);
    };

    let mut repo_urls: Vec<String> = Vec::new();
    for url in [payload.repository.clone_url, payload.repository.html_url, payload.repository.url]
        .into_iter()
        .flatten()
    {
        if !url.is_empty() && !repo_urls.contains(&url) {
            repo_urls.push(url);
        }
    }
    if repo_urls.is_empty() {
        return Ok(None);
    }

    Ok(Some(PushEvent {
        repo_urls,
        branch: branch.to_string(),
    }))
}
