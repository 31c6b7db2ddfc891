use thiserror::Error;

#[derive(Error, Debug)]
pub enum PairWatchError {
    #[error("WebSocket error: {0}")]
    WebsocketError(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Malformed feed message. The feed task logs it and keeps reading.
    #[error("Decode error: {0}")]
    DecodeError(String),

    /// Socket closed or errored. Fatal for that instrument's feed task.
    #[error("Connection error on {symbol}: {reason}")]
    ConnectionError { symbol: String, reason: String },

    /// Historical fetch failed. The refresh cycle is abandoned.
    #[error("Fetch error: {0}")]
    FetchError(String),

    #[error("Degenerate input: {0}")]
    DegenerateInput(String),

    #[error("Startup failed: {0}")]
    StartupError(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Task exited unexpectedly: {0}")]
    TaskExited(String),

    #[error("Price feed for {0} closed before publishing a price")]
    FeedClosed(String),
}

pub type Result<T> = std::result::Result<T, PairWatchError>;
