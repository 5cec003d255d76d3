//! Validating constructors for values that arrive from the outside world.
//!
//! Request bodies and database rows are converted into these once, at the
//! edge, so the rest of the code can assume they hold.

use thiserror::Error;

pub const MAX_ROOM_NAME: usize = 64;
pub const MAX_MESSAGE_LEN: usize = 4000;
pub const MAX_EMOJI_BYTES: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("{0} must not be empty")]
    Empty(&'static str),
    #[error("{field} exceeds {max} characters")]
    TooLong { field: &'static str, max: usize },
    #[error("invalid emoji")]
    InvalidEmoji,
    #[error("invalid id: {0}")]
    InvalidId(String),
    #[error("invalid presence status: {0}")]
    InvalidStatus(String),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
    #[error("corrupt stored value: {0}")]
    Corrupt(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomName(String);

impl RoomName {
    pub fn parse(raw: &str) -> Result<Self, ModelError> {
        let name = raw.trim();
        if name.is_empty() {
            return Err(ModelError::Empty("room name"));
        }
        if name.chars().count() > MAX_ROOM_NAME {
            return Err(ModelError::TooLong {
                field: "room name",
                max: MAX_ROOM_NAME,
            });
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageContent(String);

impl MessageContent {
    pub fn parse(raw: &str) -> Result<Self, ModelError> {
        if raw.trim().is_empty() {
            return Err(ModelError::Empty("message content"));
        }
        if raw.chars().count() > MAX_MESSAGE_LEN {
            return Err(ModelError::TooLong {
                field: "message content",
                max: MAX_MESSAGE_LEN,
            });
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Emoji(String);

impl Emoji {
    pub fn parse(raw: &str) -> Result<Self, ModelError> {
        if raw.is_empty() || raw.len() > MAX_EMOJI_BYTES || raw.chars().any(char::is_whitespace) {
            return Err(ModelError::InvalidEmoji);
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

pub fn check_url(raw: &str) -> Result<(), ModelError> {
    if raw.starts_with("https://") || raw.starts_with("http://") {
        Ok(())
    } else {
        Err(ModelError::InvalidUrl(raw.to_string()))
    }
}

pub fn check_len(field: &'static str, value: &str, max: usize) -> Result<(), ModelError> {
    if value.chars().count() > max {
        return Err(ModelError::TooLong { field, max });
    }
    Ok(())
}
