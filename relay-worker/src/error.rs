use thiserror::Error;

/// Ways a call to the generative-text service can fail. None of these reach the
/// dispatcher: the quote generator replaces them with a fallback quote.
#[derive(Error, Debug)]
pub enum QuoteError {
    #[error("quote request timed out: {0}")]
    Timeout(reqwest::Error),
    #[error("quote request could not be sent: {0}")]
    Transport(reqwest::Error),
    #[error("quote service answered with status {0}")]
    Status(reqwest::StatusCode),
    #[error("quote response could not be decoded: {0}")]
    Decode(reqwest::Error),
}

impl QuoteError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            QuoteError::Timeout(_) => "timeout",
            QuoteError::Transport(_) => "transport",
            QuoteError::Status(_) => "status",
            QuoteError::Decode(_) => "decode",
        }
    }
}

impl From<reqwest::Error> for QuoteError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            QuoteError::Timeout(error)
        } else if error.is_decode() || error.is_body() {
            QuoteError::Decode(error)
        } else {
            QuoteError::Transport(error)
        }
    }
}

/// Enumeration of errors when handing a display payload to the bus.
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("failed to serialize display payload: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("bus client rejected publish: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("broker did not acknowledge publish within {0:?}")]
    AckTimeout(std::time::Duration),
    #[error("publish was abandoned before the broker acknowledged it")]
    Abandoned,
}

/// Enumeration of errors that stop the worker.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("failed to build the quote http client: {0}")]
    HttpClient(reqwest::Error),
    #[error("failed to subscribe to {topic}: {error}")]
    Subscribe {
        topic: String,
        error: rumqttc::ClientError,
    },
    #[error("status server failed: {0}")]
    Server(#[from] std::io::Error),
    #[error("bus event loop exited")]
    EventLoopExited,
}
