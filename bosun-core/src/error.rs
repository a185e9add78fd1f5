//! Error types for config loading and source fetching

use thiserror::Error;

/// Errors produced while loading and validating a workflow description
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The YAML document could not be parsed at all
    #[error("failed to parse workflow config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// The document parsed but violates the config schema
    #[error("invalid workflow config: {0}")]
    Schema(String),

    /// Two names collapsed to the same DNS label after normalization
    #[error("name collision after normalization: {0}")]
    NameCollision(String),

    /// A referenced file does not exist in the repository
    #[error("file not found in repository: {0}")]
    MissingFile(String),

    /// A referenced secret does not exist in the target namespace
    #[error("secret {name} not found in {namespace} namespace")]
    SecretNotFound { name: String, namespace: String },

    /// The cron schedule expression is invalid
    #[error("invalid cron schedule: {0}")]
    Schedule(String),
}

/// Errors produced while resolving or downloading repository content
#[derive(Debug, Error)]
pub enum SourceError {
    /// The repository URL could not be parsed
    #[error("invalid repository url: {0}")]
    InvalidUrl(String),

    /// The URL points at a host other than github, gitlab or bitbucket
    #[error("unsupported repository host: {0} (only github, gitlab and bitbucket are supported)")]
    UnsupportedHost(String),

    /// GitLab requires a numeric project id for token-authenticated raw access
    #[error("gitlab repositories require --id when a token is provided")]
    MissingProjectId,

    /// The HTTP request itself failed
    #[error("request to repository failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with 401/404, usually a missing or stale token
    #[error(
        "cannot fetch {url} (status {status}); \
         make sure you provide a PAT token in case your repo is private"
    )]
    Denied { url: String, status: u16 },

    /// Any other non-success response
    #[error("unexpected status {status} fetching {url}")]
    Status { url: String, status: u16 },
}
