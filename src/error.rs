use thiserror::Error;

use crate::feed::Category;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Cache backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Cache backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Fetch failed: {0}")]
    FetchFailure(String),

    #[error("No news available for {0}")]
    NoDataAvailable(Category),

    #[error("Request timeout: {0}")]
    Timeout(String),

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("Feed parsing error: {0}")]
    FeedParse(String),

    #[error("Translation error: {0}")]
    Translation(String),

    #[error("Unknown category: {0}")]
    InvalidCategory(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error()
            || err.is_connection_refusal()
            || err.is_connection_dropped()
            || err.is_timeout()
        {
            Error::BackendUnavailable(err.to_string())
        } else {
            Error::Backend(err.to_string())
        }
    }
}

impl Error {
    pub fn is_temporary(&self) -> bool {
        matches!(
            self,
            Error::BackendUnavailable(_)
                | Error::HttpError(_)
                | Error::Timeout(_)
                | Error::FetchFailure(_)
                | Error::Io(_)
        )
    }

    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidCategory(_) | Error::InvalidUrl(_) | Error::Config(_)
        )
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Error::BackendUnavailable(_) => "BACKEND_UNAVAILABLE",
            Error::Backend(_) => "BACKEND",
            Error::Serialization(_) => "SERIALIZATION",
            Error::FetchFailure(_) => "FETCH_FAILURE",
            Error::NoDataAvailable(_) => "NO_DATA_AVAILABLE",
            Error::Timeout(_) => "TIMEOUT",
            Error::HttpError(_) => "HTTP_ERROR",
            Error::FeedParse(_) => "FEED_PARSE",
            Error::Translation(_) => "TRANSLATION",
            Error::InvalidCategory(_) => "INVALID_CATEGORY",
            Error::InvalidUrl(_) => "INVALID_URL",
            Error::Config(_) => "CONFIG",
            Error::Io(_) => "IO_ERROR",
            Error::NotFound(_) => "NOT_FOUND",
            Error::InvalidState(_) => "INVALID_STATE",
        }
    }
}
