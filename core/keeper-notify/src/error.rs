//! Error types for keeper-notify.

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Failed to create HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),

    #[error("Request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Unexpected response from {url}: {status}")]
    Status { url: String, status: u16 },

    #[error("API error: {0}")]
    Api(String),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("No API key configured")]
    MissingApiKey,

    #[error("Failed to read {path}: {source}")]
    Artifact {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl NotifyError {
    pub(crate) fn request(url: &str, source: reqwest::Error) -> Self {
        NotifyError::Request {
            url: url.to_string(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, NotifyError>;
