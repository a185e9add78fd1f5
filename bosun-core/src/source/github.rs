//! GitHub source fetcher

use crate::error::SourceError;

use super::{Archive, SourceFetcher, SourceRef};

pub struct GitHubFetcher;

impl SourceFetcher for GitHubFetcher {
    fn tarball(&self, source: &SourceRef) -> Result<Archive, SourceError> {
        // The api endpoint redirects to codeload; wget follows it.
        let url = format!(
            "https://api.github.com/repos/{}/{}/tarball/{}",
            source.owner, source.repo, source.branch
        );
        let auth_header = source
            .token
            .as_ref()
            .map(|_| "Authorization: Bearer $GITHUB_TOKEN".to_string());
        Ok(Archive { url, auth_header })
    }

    fn raw_file_url(&self, source: &SourceRef, path: &str) -> Result<String, SourceError> {
        Ok(format!(
            "https://raw.githubusercontent.com/{}/{}/{}/{}",
            source.owner, source.repo, source.branch, path
        ))
    }

    fn auth(&self, source: &SourceRef) -> Option<(&'static str, String)> {
        source
            .token
            .as_ref()
            .map(|token| ("Authorization", format!("token {token}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Provider;

    fn source(token: Option<&str>) -> SourceRef {
        SourceRef {
            url: "https://github.com/acme/models".to_string(),
            provider: Provider::GitHub,
            owner: "acme".to_string(),
            repo: "models".to_string(),
            branch: "master".to_string(),
            token: token.map(String::from),
            project_id: None,
        }
    }

    #[test]
    fn test_public_tarball_has_no_auth() {
        let archive = GitHubFetcher.tarball(&source(None)).unwrap();
        assert_eq!(archive.url, "https://api.github.com/repos/acme/models/tarball/master");
        assert!(archive.auth_header.is_none());
    }

    #[test]
    fn test_private_tarball_references_token_env() {
        let archive = GitHubFetcher.tarball(&source(Some("xyz"))).unwrap();
        assert_eq!(
            archive.auth_header.as_deref(),
            Some("Authorization: Bearer $GITHUB_TOKEN")
        );
    }

    #[test]
    fn test_raw_file_url() {
        let url = GitHubFetcher.raw_file_url(&source(None), "config.yaml").unwrap();
        assert_eq!(url, "https://raw.githubusercontent.com/acme/models/master/config.yaml");
    }

    #[test]
    fn test_auth_uses_actual_token() {
        let (name, value) = GitHubFetcher.auth(&source(Some("xyz"))).unwrap();
        assert_eq!(name, "Authorization");
        assert_eq!(value, "token xyz");
    }
}
