use crate::{
    chat_message::ChatMessage,
    client::ClientMessage,
    error::AppError,
    room::{ParticipantId, RoomId, RoomRegistry},
};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub enum DispatcherMessage {
    Connect {
        id: ParticipantId,
        room: RoomId,
        tx: mpsc::UnboundedSender<ClientMessage>,
        res_chan: oneshot::Sender<Result<(), AppError>>,
    },
    Send {
        from: ParticipantId,
        room: RoomId,
        message: ChatMessage,
    },
    /// Reports a refused frame back to its sender only.
    Reject {
        id: ParticipantId,
        room: RoomId,
        reason: String,
    },
    Disconnect {
        id: ParticipantId,
        room: RoomId,
    },
    History {
        room: RoomId,
        res_chan: oneshot::Sender<Vec<Arc<ChatMessage>>>,
    },
}

/// Owns every room and applies commands strictly one at a time, so the order
/// of a room's log is the order in which `Send`s reached this queue.
pub struct Dispatcher {
    rooms: RoomRegistry,
    rx: mpsc::Receiver<DispatcherMessage>,
}

impl Dispatcher {
    pub fn new(rooms: RoomRegistry, rx: mpsc::Receiver<DispatcherMessage>) -> Self {
        Self { rooms, rx }
    }

    pub async fn run(mut self, ct: CancellationToken) {
        loop {
            tokio::select! {
                msg = self.rx.recv() => match msg {
                    Some(msg) => self.handle(msg),
                    None => break,
                },
                _ = ct.cancelled() => {
                    break;
                }
            }
        }

        self.rx.close();
        while let Some(msg) = self.rx.recv().await {
            self.handle(msg);
        }

        for room in self.rooms.rooms_mut() {
            for (id, tx) in room.drain_members() {
                let _ = tx.send(ClientMessage::Shutdown);
                info!("Sent shutdown notification to client {}", id);
            }
        }
    }

    fn handle(&mut self, msg: DispatcherMessage) {
        match msg {
            DispatcherMessage::Connect { id, room, tx, res_chan } => {
                let result = self.connect(id, &room, tx);
                let _ = res_chan.send(result);
            }
            DispatcherMessage::Send { from, room, message } => self.send(from, &room, message),
            DispatcherMessage::Reject { id, room, reason } => {
                if let Some(tx) = self.rooms.get(&room).and_then(|r| r.member(&id)) {
                    let _ = tx.send(ClientMessage::Rejected { reason });
                }
            }
            DispatcherMessage::Disconnect { id, room } => {
                if let Some(r) = self.rooms.get_mut(&room) {
                    if r.leave(&id) {
                        info!("Client {} left room {} ({} remaining)", id, room, r.member_count());
                    }
                }
            }
            DispatcherMessage::History { room, res_chan } => {
                let snapshot = self.rooms.get(&room).map(|r| r.snapshot()).unwrap_or_default();
                let _ = res_chan.send(snapshot);
            }
        }
    }

    fn connect(&mut self, id: ParticipantId, room_id: &str, tx: mpsc::UnboundedSender<ClientMessage>) -> Result<(), AppError> {
        let room = self.rooms.get_or_create(room_id);

        let Some(history) = room.join(id, tx.clone()) else {
            return Err(AppError::DuplicateParticipant(id.to_string()));
        };

        info!(
            "Client {} joined room {} ({} members, {} messages replayed)",
            id,
            room.id(),
            room.member_count(),
            history.len()
        );

        if tx.send(ClientMessage::History { messages: history }).is_err() {
            room.leave(&id);
            return Err(AppError::ClientGone(id.to_string()));
        }

        Ok(())
    }

    fn send(&mut self, from: ParticipantId, room_id: &str, message: ChatMessage) {
        let Some(room) = self.rooms.get_mut(room_id).filter(|r| r.is_member(&from)) else {
            warn!("Dropping message from {}: not a member of room {}", from, room_id);
            return;
        };

        let message = room.append(message);
        debug!("Message {} appended to room {} by {}", message.message_id, room_id, from);

        let mut closed = Vec::new();
        for (id, tx) in room.members() {
            if tx.send(ClientMessage::Chat { message: message.clone() }).is_err() {
                closed.push(*id);
            }
        }

        for id in closed {
            room.leave(&id);
            info!("Client {} removed from room {}: channel closed", id, room_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    struct Harness {
        tx: mpsc::Sender<DispatcherMessage>,
        ct: CancellationToken,
        handle: tokio::task::JoinHandle<()>,
    }

    impl Harness {
        fn start(history_limit: usize) -> Self {
            let (tx, rx) = mpsc::channel(64);
            let ct = CancellationToken::new();
            let handle = tokio::spawn(Dispatcher::new(RoomRegistry::new(history_limit), rx).run(ct.clone()));
            Self { tx, ct, handle }
        }

        async fn connect(&self, room: &str) -> (ParticipantId, mpsc::UnboundedReceiver<ClientMessage>) {
            let id = Uuid::new_v4();
            let (cl_tx, cl_rx) = mpsc::unbounded_channel();
            let (res_tx, res_rx) = oneshot::channel();
            self.tx
                .send(DispatcherMessage::Connect {
                    id,
                    room: room.to_string(),
                    tx: cl_tx,
                    res_chan: res_tx,
                })
                .await
                .unwrap();
            res_rx.await.unwrap().unwrap();
            (id, cl_rx)
        }

        async fn send(&self, from: ParticipantId, room: &str, message: ChatMessage) {
            self.tx
                .send(DispatcherMessage::Send {
                    from,
                    room: room.to_string(),
                    message,
                })
                .await
                .unwrap();
        }

        async fn history(&self, room: &str) -> Vec<Arc<ChatMessage>> {
            let (res_tx, res_rx) = oneshot::channel();
            self.tx
                .send(DispatcherMessage::History {
                    room: room.to_string(),
                    res_chan: res_tx,
                })
                .await
                .unwrap();
            res_rx.await.unwrap()
        }
    }

    fn msg(id: &str, text: &str) -> ChatMessage {
        ChatMessage::new(id, "u1", "alice", text)
    }

    async fn expect_history(rx: &mut mpsc::UnboundedReceiver<ClientMessage>) -> Vec<Arc<ChatMessage>> {
        match rx.recv().await {
            Some(ClientMessage::History { messages }) => messages,
            other => panic!("expected history, got {other:?}"),
        }
    }

    async fn expect_chat(rx: &mut mpsc::UnboundedReceiver<ClientMessage>) -> Arc<ChatMessage> {
        match rx.recv().await {
            Some(ClientMessage::Chat { message }) => message,
            other => panic!("expected chat message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn new_client_receives_full_history_in_order() {
        let h = Harness::start(0);
        let (a, mut a_rx) = h.connect("community").await;
        assert!(expect_history(&mut a_rx).await.is_empty());

        for i in 0..5 {
            h.send(a, "community", msg(&i.to_string(), "hi")).await;
        }

        let (_b, mut b_rx) = h.connect("community").await;
        let ids: Vec<_> = expect_history(&mut b_rx)
            .await
            .iter()
            .map(|m| m.message_id.clone())
            .collect();
        assert_eq!(ids, ["0", "1", "2", "3", "4"]);
    }

    #[tokio::test]
    async fn send_reaches_every_member_including_sender() {
        let h = Harness::start(0);
        let mut clients = Vec::new();
        for _ in 0..4 {
            let (id, mut rx) = h.connect("community").await;
            expect_history(&mut rx).await;
            clients.push((id, rx));
        }

        let sender = clients[0].0;
        h.send(sender, "community", msg("1", "hello all")).await;

        for (_, rx) in clients.iter_mut() {
            assert_eq!(expect_chat(rx).await.message, "hello all");
            assert!(rx.try_recv().is_err());
        }
    }

    #[tokio::test]
    async fn burst_of_sends_is_delivered_in_full() {
        let h = Harness::start(0);
        let (a, mut a_rx) = h.connect("community").await;
        let (_b, mut b_rx) = h.connect("community").await;
        expect_history(&mut a_rx).await;
        expect_history(&mut b_rx).await;

        for i in 0..500 {
            h.send(a, "community", msg(&i.to_string(), "burst")).await;
        }

        for rx in [&mut a_rx, &mut b_rx] {
            for i in 0..500 {
                assert_eq!(expect_chat(rx).await.message_id, i.to_string());
            }
            assert!(rx.try_recv().is_err());
        }
        assert_eq!(h.history("community").await.len(), 500);
    }

    #[tokio::test]
    async fn rejection_reaches_only_its_sender() {
        let h = Harness::start(0);
        let (a, mut a_rx) = h.connect("community").await;
        let (_b, mut b_rx) = h.connect("community").await;
        expect_history(&mut a_rx).await;
        expect_history(&mut b_rx).await;

        h.tx
            .send(DispatcherMessage::Reject {
                id: a,
                room: "community".into(),
                reason: "too long".into(),
            })
            .await
            .unwrap();
        h.history("community").await;

        assert!(matches!(a_rx.try_recv(), Ok(ClientMessage::Rejected { reason }) if reason == "too long"));
        assert!(b_rx.try_recv().is_err());
        assert!(h.history("community").await.is_empty());
    }

    #[tokio::test]
    async fn client_gone_before_history_is_not_joined() {
        let h = Harness::start(0);
        let (cl_tx, cl_rx) = mpsc::unbounded_channel();
        drop(cl_rx);

        let (res_tx, res_rx) = oneshot::channel();
        h.tx
            .send(DispatcherMessage::Connect {
                id: Uuid::new_v4(),
                room: "community".into(),
                tx: cl_tx,
                res_chan: res_tx,
            })
            .await
            .unwrap();

        assert!(matches!(res_rx.await.unwrap(), Err(AppError::ClientGone(_))));
    }

    #[tokio::test]
    async fn rooms_do_not_leak_into_each_other() {
        let h = Harness::start(0);
        let (a, mut a_rx) = h.connect("room-a").await;
        let (b, mut b_rx) = h.connect("room-b").await;
        expect_history(&mut a_rx).await;
        expect_history(&mut b_rx).await;

        h.send(b, "room-b", msg("1", "for b")).await;
        h.send(a, "room-a", msg("2", "for a")).await;

        assert_eq!(expect_chat(&mut a_rx).await.message, "for a");
        assert_eq!(expect_chat(&mut b_rx).await.message, "for b");
        assert!(a_rx.try_recv().is_err());
        assert!(b_rx.try_recv().is_err());
        assert_eq!(h.history("room-a").await.len(), 1);
        assert_eq!(h.history("room-b").await.len(), 1);
    }

    #[tokio::test]
    async fn sender_outside_the_room_is_ignored() {
        let h = Harness::start(0);
        let (a, mut a_rx) = h.connect("room-a").await;
        let (_b, mut b_rx) = h.connect("room-b").await;
        expect_history(&mut a_rx).await;
        expect_history(&mut b_rx).await;

        h.send(a, "room-b", msg("1", "sneaky")).await;

        assert!(h.history("room-b").await.is_empty());
        assert!(b_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn duplicate_message_ids_are_broadcast_twice() {
        let h = Harness::start(0);
        let (a, mut a_rx) = h.connect("community").await;
        expect_history(&mut a_rx).await;

        h.send(a, "community", msg("dup", "one")).await;
        h.send(a, "community", msg("dup", "two")).await;

        assert_eq!(expect_chat(&mut a_rx).await.message, "one");
        assert_eq!(expect_chat(&mut a_rx).await.message, "two");
        assert_eq!(h.history("community").await.len(), 2);
    }

    #[tokio::test]
    async fn history_is_capped_by_limit() {
        let h = Harness::start(2);
        let (a, mut a_rx) = h.connect("community").await;
        expect_history(&mut a_rx).await;

        for i in 0..4 {
            h.send(a, "community", msg(&i.to_string(), "hi")).await;
        }

        let ids: Vec<_> = h
            .history("community")
            .await
            .iter()
            .map(|m| m.message_id.clone())
            .collect();
        assert_eq!(ids, ["2", "3"]);
    }

    #[tokio::test]
    async fn disconnected_client_stops_receiving() {
        let h = Harness::start(0);
        let (a, mut a_rx) = h.connect("community").await;
        let (b, mut b_rx) = h.connect("community").await;
        expect_history(&mut a_rx).await;
        expect_history(&mut b_rx).await;

        h.tx
            .send(DispatcherMessage::Disconnect {
                id: b,
                room: "community".into(),
            })
            .await
            .unwrap();
        h.send(a, "community", msg("1", "anyone?")).await;

        assert_eq!(expect_chat(&mut a_rx).await.message, "anyone?");
        assert!(b_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn duplicate_participant_is_rejected() {
        let h = Harness::start(0);
        let id = Uuid::new_v4();

        let mut results = Vec::new();
        for _ in 0..2 {
            let (cl_tx, _cl_rx) = mpsc::unbounded_channel();
            let (res_tx, res_rx) = oneshot::channel();
            h.tx
                .send(DispatcherMessage::Connect {
                    id,
                    room: "community".into(),
                    tx: cl_tx,
                    res_chan: res_tx,
                })
                .await
                .unwrap();
            results.push(res_rx.await.unwrap());
        }

        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(AppError::DuplicateParticipant(_))));
    }

    #[tokio::test]
    async fn cancellation_notifies_members() {
        let h = Harness::start(0);
        let (_a, mut a_rx) = h.connect("community").await;
        expect_history(&mut a_rx).await;

        h.ct.cancel();
        h.handle.await.unwrap();

        assert!(matches!(a_rx.recv().await, Some(ClientMessage::Shutdown)));
        assert!(a_rx.recv().await.is_none());
    }
}
