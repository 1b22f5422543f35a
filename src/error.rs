use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Why an inbound chat message was refused at the socket boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidMessage {
    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("field `{0}` must not be empty")]
    EmptyField(&'static str),

    #[error("message is {len} characters long, the limit is {max}")]
    TooLong { len: usize, max: usize },
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid message: {0}")]
    InvalidMessage(#[from] InvalidMessage),

    #[error("Invalid value for {key}: {reason}")]
    Config { key: &'static str, reason: String },

    #[error("Participant {0} is already connected")]
    DuplicateParticipant(String),

    #[error("Client {0} went away before joining")]
    ClientGone(String),

    #[error("Dispatcher is no longer running")]
    DispatcherClosed,

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
