//! GitLab source fetcher
//!
//! GitLab's API addresses repositories by project id. Public repositories
//! fall back to the url-encoded `owner/repo` path; private ones require the
//! explicit `--id` because the path form is not resolvable with a bare PAT.

use crate::error::SourceError;

use super::{encode_path, Archive, SourceFetcher, SourceRef};

pub struct GitLabFetcher;

impl GitLabFetcher {
    fn project(&self, source: &SourceRef) -> Result<String, SourceError> {
        match (&source.project_id, &source.token) {
            (Some(id), _) => Ok(id.clone()),
            (None, Some(_)) => Err(SourceError::MissingProjectId),
            (None, None) => Ok(format!("{}%2F{}", source.owner, source.repo)),
        }
    }
}

impl SourceFetcher for GitLabFetcher {
    fn tarball(&self, source: &SourceRef) -> Result<Archive, SourceError> {
        let url = format!(
            "https://gitlab.com/api/v4/projects/{}/repository/archive.tar.gz?sha={}",
            self.project(source)?,
            source.branch
        );
        let auth_header = source
            .token
            .as_ref()
            .map(|_| "PRIVATE-TOKEN: $GITLAB_TOKEN".to_string());
        Ok(Archive { url, auth_header })
    }

    fn raw_file_url(&self, source: &SourceRef, path: &str) -> Result<String, SourceError> {
        Ok(format!(
            "https://gitlab.com/api/v4/projects/{}/repository/files/{}/raw?ref={}",
            self.project(source)?,
            encode_path(path),
            source.branch
        ))
    }

    fn auth(&self, source: &SourceRef) -> Option<(&'static str, String)> {
        source
            .token
            .as_ref()
            .map(|token| ("PRIVATE-TOKEN", token.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Provider;

    fn source(token: Option<&str>, id: Option<&str>) -> SourceRef {
        SourceRef {
            url: "https://gitlab.com/acme/models".to_string(),
            provider: Provider::GitLab,
            owner: "acme".to_string(),
            repo: "models".to_string(),
            branch: "master".to_string(),
            token: token.map(String::from),
            project_id: id.map(String::from),
        }
    }

    #[test]
    fn test_public_repo_uses_encoded_path() {
        let archive = GitLabFetcher.tarball(&source(None, None)).unwrap();
        assert_eq!(
            archive.url,
            "https://gitlab.com/api/v4/projects/acme%2Fmodels/repository/archive.tar.gz?sha=master"
        );
    }

    #[test]
    fn test_private_repo_requires_project_id() {
        assert!(matches!(
            GitLabFetcher.tarball(&source(Some("xyz"), None)),
            Err(SourceError::MissingProjectId)
        ));
    }

    #[test]
    fn test_raw_file_url_with_id() {
        let url = GitLabFetcher
            .raw_file_url(&source(Some("xyz"), Some("42")), "src/train.py")
            .unwrap();
        assert_eq!(
            url,
            "https://gitlab.com/api/v4/projects/42/repository/files/src%2Ftrain.py/raw?ref=master"
        );
    }
}
