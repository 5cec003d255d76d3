use thiserror::Error;

use archevault_types::validate::ModelError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    #[error("HTTP error: {0}")]
    Http(Box<reqwest::Error>),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("invalid input: {0}")]
    Invalid(#[from] ModelError),

    #[error("no room selected")]
    NoCurrentRoom,

    #[error("message {0} is not loaded")]
    UnknownMessage(uuid::Uuid),

    #[error("subscription closed")]
    Closed,

    #[error("gateway did not confirm the subscription in time")]
    HandshakeTimeout,

    #[error("gateway refused the subscription to room {0}")]
    SubscriptionRefused(uuid::Uuid),

    #[error("session cache: {0}")]
    Cache(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ClientError>;

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        ClientError::WebSocket(Box::new(e))
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        ClientError::Http(Box::new(e))
    }
}
