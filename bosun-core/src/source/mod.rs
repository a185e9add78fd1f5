//! Source-fetcher contract
//!
//! A workflow's code lives in a remote VCS repository. The engine only ever
//! needs two things from it: a downloadable tarball of the tree (consumed by
//! the init container) and raw-file access (config download and existence
//! probes). Three providers implement that capability behind one trait;
//! the provider tag never travels past [`fetcher_for`].

mod bitbucket;
mod github;
mod gitlab;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::SourceError;

pub use bitbucket::BitbucketFetcher;
pub use github::GitHubFetcher;
pub use gitlab::GitLabFetcher;

const ALLOWED_HOSTS: [(&str, Provider); 3] = [
    ("github.com", Provider::GitHub),
    ("gitlab.com", Provider::GitLab),
    ("bitbucket.org", Provider::Bitbucket),
];

/// Supported VCS hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Provider {
    GitHub,
    GitLab,
    Bitbucket,
}

impl Provider {
    /// Name of the env variable the PAT is injected under; also the sole
    /// data field of the workflow's `repo-<name>` secret.
    pub fn token_env(self) -> &'static str {
        match self {
            Provider::GitHub => "GITHUB_TOKEN",
            Provider::GitLab => "GITLAB_TOKEN",
            Provider::Bitbucket => "BITBUCKET_TOKEN",
        }
    }
}

/// A parsed reference to a repository at a branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRef {
    /// The URL as the user supplied it.
    pub url: String,
    pub provider: Provider,
    pub owner: String,
    pub repo: String,
    pub branch: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Numeric project id, required by GitLab's API for private repos.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
}

impl SourceRef {
    /// Parse a repository URL. Only `https://` URLs pointing at github,
    /// gitlab or bitbucket are accepted.
    pub fn parse(
        url: &str,
        branch: &str,
        token: Option<String>,
        project_id: Option<String>,
    ) -> Result<Self, SourceError> {
        let rest = url.strip_prefix("https://").ok_or_else(|| {
            SourceError::InvalidUrl(format!(
                "{url}: only the https protocol is supported; \
                 for private repos pass a PAT token instead of ssh"
            ))
        })?;

        let mut segments = rest.split('/').filter(|s| !s.is_empty());
        let host = segments
            .next()
            .ok_or_else(|| SourceError::InvalidUrl(url.to_string()))?;
        let provider = ALLOWED_HOSTS
            .iter()
            .find(|(h, _)| *h == host)
            .map(|(_, p)| *p)
            .ok_or_else(|| SourceError::UnsupportedHost(host.to_string()))?;

        let owner = segments
            .next()
            .ok_or_else(|| SourceError::InvalidUrl(url.to_string()))?
            .to_string();
        let repo = segments
            .next()
            .ok_or_else(|| SourceError::InvalidUrl(url.to_string()))?
            .trim_end_matches(".git")
            .to_string();
        if owner.is_empty() || repo.is_empty() {
            return Err(SourceError::InvalidUrl(url.to_string()));
        }

        Ok(Self {
            url: url.to_string(),
            provider,
            owner,
            repo,
            branch: branch.to_string(),
            token,
            project_id,
        })
    }

    pub fn is_private(&self) -> bool {
        self.token.is_some()
    }
}

/// A downloadable tarball of the source tree.
///
/// `auth_header` is the full header line in shell form, referencing the
/// token env variable (e.g. `Authorization: Bearer $GITHUB_TOKEN`), ready
/// to be spliced into the init container's download command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Archive {
    pub url: String,
    pub auth_header: Option<String>,
}

/// Capability surface over one VCS provider.
pub trait SourceFetcher: Send + Sync {
    /// Tarball of the tree at the ref's branch.
    fn tarball(&self, source: &SourceRef) -> Result<Archive, SourceError>;

    /// URL serving the raw content of one file at the ref's branch.
    fn raw_file_url(&self, source: &SourceRef, path: &str) -> Result<String, SourceError>;

    /// Header (name, value) carrying the actual token for client-side
    /// requests, when the ref is private.
    fn auth(&self, source: &SourceRef) -> Option<(&'static str, String)>;
}

/// Select the fetcher for a ref's host.
pub fn fetcher_for(provider: Provider) -> &'static dyn SourceFetcher {
    match provider {
        Provider::GitHub => &GitHubFetcher,
        Provider::GitLab => &GitLabFetcher,
        Provider::Bitbucket => &BitbucketFetcher,
    }
}

/// Download the workflow config file from the repository root.
pub async fn download_config(
    fetcher: &dyn SourceFetcher,
    source: &SourceRef,
    file: &str,
) -> Result<Vec<u8>, SourceError> {
    let url = fetcher.raw_file_url(source, file)?;
    let mut request = reqwest::Client::new().get(&url);
    if let Some((name, value)) = fetcher.auth(source) {
        request = request.header(name, value);
    }
    let response = request.send().await?;
    let status = response.status().as_u16();
    match status {
        200..=299 => Ok(response.bytes().await?.to_vec()),
        401 | 403 | 404 => Err(SourceError::Denied { url, status }),
        _ => Err(SourceError::Status { url, status }),
    }
}

/// Probe which of the given repository paths exist, via HEAD requests on
/// their raw URLs. Paths that answer 2xx end up in the returned set.
pub async fn probe_files<'a, I>(
    fetcher: &dyn SourceFetcher,
    source: &SourceRef,
    paths: I,
) -> Result<HashSet<String>, SourceError>
where
    I: IntoIterator<Item = &'a str>,
{
    let client = reqwest::Client::new();
    let mut found = HashSet::new();
    for path in paths {
        let url = fetcher.raw_file_url(source, path)?;
        let mut request = client.head(&url);
        if let Some((name, value)) = fetcher.auth(source) {
            request = request.header(name, value);
        }
        let response = request.send().await?;
        if response.status().is_success() {
            found.insert(path.to_string());
        }
    }
    Ok(found)
}

// GitLab wants `/` inside file paths escaped in API routes.
pub(crate) fn encode_path(path: &str) -> String {
    path.replace('/', "%2F")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_github_url() {
        let source =
            SourceRef::parse("https://github.com/acme/models.git", "main", None, None).unwrap();
        assert_eq!(source.provider, Provider::GitHub);
        assert_eq!(source.owner, "acme");
        assert_eq!(source.repo, "models");
        assert!(!source.is_private());
    }

    #[test]
    fn test_parse_rejects_non_https() {
        assert!(matches!(
            SourceRef::parse("git@github.com:acme/models.git", "main", None, None),
            Err(SourceError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_parse_rejects_unknown_host() {
        assert!(matches!(
            SourceRef::parse("https://example.com/acme/models", "main", None, None),
            Err(SourceError::UnsupportedHost(_))
        ));
    }

    #[test]
    fn test_parse_rejects_missing_repo() {
        assert!(SourceRef::parse("https://github.com/acme", "main", None, None).is_err());
    }

    #[test]
    fn test_fetcher_selection_is_total() {
        for provider in [Provider::GitHub, Provider::GitLab, Provider::Bitbucket] {
            let source = SourceRef {
                url: String::new(),
                provider,
                owner: "acme".to_string(),
                repo: "models".to_string(),
                branch: "main".to_string(),
                token: None,
                project_id: Some("42".to_string()),
            };
            assert!(fetcher_for(provider).tarball(&source).is_ok());
        }
    }

    #[test]
    fn test_encode_path() {
        assert_eq!(encode_path("src/train.py"), "src%2Ftrain.py");
    }
}
