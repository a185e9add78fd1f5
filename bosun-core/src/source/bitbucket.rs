//! Bitbucket source fetcher

use crate::error::SourceError;

use super::{Archive, SourceFetcher, SourceRef};

pub struct BitbucketFetcher;

impl SourceFetcher for BitbucketFetcher {
    fn tarball(&self, source: &SourceRef) -> Result<Archive, SourceError> {
        let url = format!(
            "https://bitbucket.org/{}/{}/get/{}.tar.gz",
            source.owner, source.repo, source.branch
        );
        let auth_header = source
            .token
            .as_ref()
            .map(|_| "Authorization: Bearer $BITBUCKET_TOKEN".to_string());
        Ok(Archive { url, auth_header })
    }

    fn raw_file_url(&self, source: &SourceRef, path: &str) -> Result<String, SourceError> {
        Ok(format!(
            "https://api.bitbucket.org/2.0/repositories/{}/{}/src/{}/{}",
            source.owner, source.repo, source.branch, path
        ))
    }

    fn auth(&self, source: &SourceRef) -> Option<(&'static str, String)> {
        source
            .token
            .as_ref()
            .map(|token| ("Authorization", format!("Bearer {token}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Provider;

    fn source() -> SourceRef {
        SourceRef {
            url: "https://bitbucket.org/acme/models".to_string(),
            provider: Provider::Bitbucket,
            owner: "acme".to_string(),
            repo: "models".to_string(),
            branch: "develop".to_string(),
            token: None,
            project_id: None,
        }
    }

    #[test]
    fn test_tarball_url() {
        let archive = BitbucketFetcher.tarball(&source()).unwrap();
        assert_eq!(archive.url, "https://bitbucket.org/acme/models/get/develop.tar.gz");
    }

    #[test]
    fn test_raw_file_url() {
        let url = BitbucketFetcher.raw_file_url(&source(), "requirements.txt").unwrap();
        assert_eq!(
            url,
            "https://api.bitbucket.org/2.0/repositories/acme/models/src/develop/requirements.txt"
        );
    }
}
