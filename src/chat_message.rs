use crate::error::InvalidMessage;
use serde::{Deserialize, Serialize};

/// A single chat line as it travels over the wire and sits in a room's log.
///
/// `message_id` is supplied by the client and is only a display key: two
/// messages may share one and both are kept.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ChatMessage {
    pub message_id: String,
    pub user_id: String,
    pub username: String,
    pub message: String,
}

impl ChatMessage {
    pub fn new(
        message_id: impl Into<String>,
        user_id: impl Into<String>,
        username: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            user_id: user_id.into(),
            username: username.into(),
            message: message.into(),
        }
    }

    /// Checks the fields a well-formed client always fills in.
    /// `max_len` counts characters, not bytes.
    pub fn validate(&self, max_len: usize) -> Result<(), InvalidMessage> {
        let required = [
            ("messageId", &self.message_id),
            ("userId", &self.user_id),
            ("username", &self.username),
            ("message", &self.message),
        ];

        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(InvalidMessage::EmptyField(name));
            }
        }

        let len = self.message.chars().count();
        if len > max_len {
            return Err(InvalidMessage::TooLong { len, max: max_len });
        }

        Ok(())
    }
}
