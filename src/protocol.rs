use crate::{chat_message::ChatMessage, client::ClientMessage, error::InvalidMessage};
use serde::{Deserialize, Serialize};
use std::{str::FromStr, sync::Arc};

#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum IncomingMessage {
    SendMsg(ChatMessage),
}

impl FromStr for IncomingMessage {
    type Err = InvalidMessage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_str(s).map_err(|e| InvalidMessage::Malformed(e.to_string()))
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum OutgoingMessage {
    LoadMessages(Vec<Arc<ChatMessage>>),
    ReceiveMsg(Arc<ChatMessage>),
    Error { reason: String },
    Shutdown,
}

impl OutgoingMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<ClientMessage> for OutgoingMessage {
    fn from(msg: ClientMessage) -> Self {
        match msg {
            ClientMessage::History { messages } => OutgoingMessage::LoadMessages(messages),
            ClientMessage::Chat { message } => OutgoingMessage::ReceiveMsg(message),
            ClientMessage::Rejected { reason } => OutgoingMessage::Error { reason },
            ClientMessage::Shutdown => OutgoingMessage::Shutdown,
        }
    }
}
