//! Real-time relay for the marketplace's community chat.
//!
//! Clients connect over WebSocket, are placed in a room, receive that room's
//! message log once and then every message sent to the room while they stay
//! connected. All relay state lives in memory and is lost on restart.

pub mod chat_message;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod protocol;
pub mod room;
pub mod server;

pub use chat_message::ChatMessage;
pub use config::Config;
pub use error::{AppError, InvalidMessage};
pub use server::serve;
