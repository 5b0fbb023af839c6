use thiserror::Error;

/// Why a page could not be loaded.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("network error for {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("browser error for {url}: {message}")]
    Browser { url: String, message: String },

    #[error("unexpected response from {url}: {message}")]
    Malformed { url: String, message: String },
}

impl FetchError {
    pub fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout { url: url.to_string() }
        } else if let Some(status) = err.status() {
            FetchError::Status { url: url.to_string(), status: status.as_u16() }
        } else {
            FetchError::Network { url: url.to_string(), source: err }
        }
    }

    pub fn browser(url: &str, message: impl std::fmt::Display) -> Self {
        FetchError::Browser { url: url.to_string(), message: message.to_string() }
    }
}

/// The listing phase could not produce a link set.
#[derive(Debug, Error)]
pub enum CollectError {
    #[error("listing page failed: {0}")]
    Listing(#[from] FetchError),

    #[error("listing page {url} is behind a challenge")]
    Blocked { url: String },
}

/// A page was fetched but does not describe a record we can key.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("no record identifier in {0}")]
    MissingKey(String),

    #[error("malformed structured data: {0}")]
    StructuredData(String),
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("could not persist {path}: {source}")]
    Persist {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("backend returned HTTP {status}: {body}")]
    Remote { status: u16, body: String },

    #[error("invalid backend url: {0}")]
    BadUrl(#[from] url::ParseError),

    #[error("backend request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("backend not configured: {0}")]
    NotConfigured(&'static str),
}
