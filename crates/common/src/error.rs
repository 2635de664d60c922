use thiserror::Error;

/// Failure talking to the Data API or Gamma API.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("{url} returned HTTP {status}")]
    Status {
        status: u16,
        url: String,
        retry_after_secs: Option<f64>,
    },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("failed to decode response body: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    InvalidUrl,
    RateLimited,
    ServerError,
    ClientError,
    Timeout,
    Transport,
    Decode,
}

impl ApiErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidUrl => "invalid_url",
            Self::RateLimited => "rate_limited",
            Self::ServerError => "server_error",
            Self::ClientError => "client_error",
            Self::Timeout => "timeout",
            Self::Transport => "transport",
            Self::Decode => "decode",
        }
    }
}

/// Statuses worth retrying with backoff.
pub const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

impl ApiError {
    pub fn kind(&self) -> ApiErrorKind {
        match self {
            Self::InvalidUrl { .. } => ApiErrorKind::InvalidUrl,
            Self::Status { status: 429, .. } => ApiErrorKind::RateLimited,
            Self::Status { status, .. } if *status >= 500 => ApiErrorKind::ServerError,
            Self::Status { .. } => ApiErrorKind::ClientError,
            Self::Transport(e) if e.is_timeout() => ApiErrorKind::Timeout,
            Self::Transport(_) => ApiErrorKind::Transport,
            Self::Decode(_) => ApiErrorKind::Decode,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Status { status, .. } => RETRYABLE_STATUSES.contains(status),
            Self::Transport(_) => true,
            Self::InvalidUrl { .. } | Self::Decode(_) => false,
        }
    }

    /// Server-requested delay from a `Retry-After` header, if any.
    pub fn retry_after_secs(&self) -> Option<f64> {
        match self {
            Self::Status {
                retry_after_secs, ..
            } => *retry_after_secs,
            _ => None,
        }
    }
}

/// Failure opening, reading or writing persisted watcher state.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to access state file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode state: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("state database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("unsupported state document version {0}")]
    UnsupportedVersion(i64),
}

impl StateError {
    pub fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}
