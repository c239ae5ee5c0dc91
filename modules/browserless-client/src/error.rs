use thiserror::Error;

pub type Result<T> = std::result::Result<T, BrowserlessError>;

#[derive(Debug, Error)]
pub enum BrowserlessError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Decode error: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for BrowserlessError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BrowserlessError::Timeout(err.to_string())
        } else if err.is_decode() {
            BrowserlessError::Decode(err.to_string())
        } else {
            BrowserlessError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for BrowserlessError {
    fn from(err: serde_json::Error) -> Self {
        BrowserlessError::Decode(err.to_string())
    }
}
