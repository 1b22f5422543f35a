//! Rooms and their message logs.
//!
//! A [`RoomRegistry`] is the whole relay state: every room keeps its own
//! ordered log and the outbound channels of the participants currently in it.
//! The registry is owned by the dispatcher task and never shared, so nothing
//! in here locks.

use crate::{chat_message::ChatMessage, client::ClientMessage};
use std::{
    collections::{HashMap, VecDeque},
    num::NonZeroUsize,
    sync::Arc,
};
use tokio::sync::mpsc;
use uuid::Uuid;

pub type RoomId = String;
pub type ParticipantId = Uuid;

pub struct Room {
    id: RoomId,
    log: VecDeque<Arc<ChatMessage>>,
    /// `None` keeps every message for the lifetime of the process.
    history_limit: Option<NonZeroUsize>,
    members: HashMap<ParticipantId, mpsc::UnboundedSender<ClientMessage>>,
}

impl Room {
    pub fn new(id: RoomId, history_limit: Option<NonZeroUsize>) -> Self {
        Self {
            id,
            log: VecDeque::new(),
            history_limit,
            members: HashMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Adds a member and returns the log as it stands right now.
    /// Returns `None` if the participant is already in the room.
    pub fn join(&mut self, id: ParticipantId, tx: mpsc::UnboundedSender<ClientMessage>) -> Option<Vec<Arc<ChatMessage>>> {
        if self.members.contains_key(&id) {
            return None;
        }
        self.members.insert(id, tx);
        Some(self.snapshot())
    }

    pub fn leave(&mut self, id: &ParticipantId) -> bool {
        self.members.remove(id).is_some()
    }

    pub fn is_member(&self, id: &ParticipantId) -> bool {
        self.members.contains_key(id)
    }

    /// Appends to the log, evicting the oldest entry once the limit is reached.
    pub fn append(&mut self, message: ChatMessage) -> Arc<ChatMessage> {
        let message = Arc::new(message);

        if let Some(limit) = self.history_limit {
            while self.log.len() >= limit.get() {
                self.log.pop_front();
            }
        }
        self.log.push_back(message.clone());

        message
    }

    pub fn snapshot(&self) -> Vec<Arc<ChatMessage>> {
        self.log.iter().cloned().collect()
    }

    pub fn log_len(&self) -> usize {
        self.log.len()
    }

    pub fn member(&self, id: &ParticipantId) -> Option<&mpsc::UnboundedSender<ClientMessage>> {
        self.members.get(id)
    }

    pub fn members(&self) -> impl Iterator<Item = (&ParticipantId, &mpsc::UnboundedSender<ClientMessage>)> {
        self.members.iter()
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub(crate) fn drain_members(&mut self) -> impl Iterator<Item = (ParticipantId, mpsc::UnboundedSender<ClientMessage>)> + '_ {
        self.members.drain()
    }
}

pub struct RoomRegistry {
    rooms: HashMap<RoomId, Room>,
    history_limit: Option<NonZeroUsize>,
}

impl RoomRegistry {
    /// A `history_limit` of zero means the logs grow without bound.
    pub fn new(history_limit: usize) -> Self {
        Self {
            rooms: HashMap::new(),
            history_limit: NonZeroUsize::new(history_limit),
        }
    }

    pub fn get(&self, id: &str) -> Option<&Room> {
        self.rooms.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Room> {
        self.rooms.get_mut(id)
    }

    /// Rooms come into existence on first use and are never removed.
    pub fn get_or_create(&mut self, id: &str) -> &mut Room {
        let limit = self.history_limit;
        self.rooms
            .entry(id.to_string())
            .or_insert_with(|| Room::new(id.to_string(), limit))
    }

    pub fn rooms_mut(&mut self) -> impl Iterator<Item = &mut Room> {
        self.rooms.values_mut()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
