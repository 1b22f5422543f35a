use crate::{
    chat_message::ChatMessage,
    config::Config,
    dispatcher::DispatcherMessage,
    error::{AppError, InvalidMessage},
    protocol::{IncomingMessage, OutgoingMessage},
    room::{ParticipantId, RoomId},
};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use std::{net::SocketAddr, sync::Arc};
use tokio::{
    net::TcpStream,
    sync::{mpsc, oneshot},
    time,
};
use tokio_tungstenite::{WebSocketStream, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsSource = SplitStream<WebSocketStream<TcpStream>>;

/// What the dispatcher queues for a socket.
#[derive(Debug)]
pub enum ClientMessage {
    History { messages: Vec<Arc<ChatMessage>> },
    Chat { message: Arc<ChatMessage> },
    Rejected { reason: String },
    Shutdown,
}

pub struct Client {
    id: ParticipantId,
    addr: SocketAddr,
    room: RoomId,
    ws_stream: WebSocketStream<TcpStream>,
    disp_tx: mpsc::Sender<DispatcherMessage>,
    config: Arc<Config>,
    ct: CancellationToken,
}

impl Client {
    pub fn new(
        id: ParticipantId,
        addr: SocketAddr,
        room: RoomId,
        ws_stream: WebSocketStream<TcpStream>,
        disp_tx: mpsc::Sender<DispatcherMessage>,
        config: Arc<Config>,
        ct: CancellationToken,
    ) -> Self {
        Self {
            id,
            addr,
            room,
            ws_stream,
            disp_tx,
            config,
            ct,
        }
    }

    pub async fn run(self) -> Result<(), AppError> {
        // Unbounded: a live client never loses a message, however far behind it is.
        let (cl_tx, cl_rx) = mpsc::unbounded_channel::<ClientMessage>();

        let (res_tx, res_rx) = oneshot::channel();
        self.disp_tx
            .send(DispatcherMessage::Connect {
                id: self.id,
                room: self.room.clone(),
                tx: cl_tx,
                res_chan: res_tx,
            })
            .await
            .map_err(|_| AppError::DispatcherClosed)?;

        res_rx.await.map_err(|_| AppError::DispatcherClosed)??;
        info!("Client {} ({}) connected to room {}", self.id, self.addr, self.room);

        let (ws_tx, ws_rx) = self.ws_stream.split();
        let mut send_task = tokio::spawn(Self::cl_rx_handler(ws_tx, cl_rx, self.id));
        let mut recv_task = tokio::spawn(Self::ws_rx_handler(
            ws_rx,
            self.disp_tx.clone(),
            self.id,
            self.room.clone(),
            self.config.max_message_len,
        ));

        let grace = self.config.shutdown_grace;
        let ct = self.ct.clone();
        let deadline = async move {
            ct.cancelled().await;
            time::sleep(grace).await;
        };

        tokio::select! {
            _ = &mut send_task => {
                recv_task.abort();
            },
            _ = &mut recv_task => {
                send_task.abort();
            },
            _ = deadline => {
                warn!("Client {} still busy {:?} after shutdown, dropping it", self.id, grace);
                send_task.abort();
                recv_task.abort();
            },
        }

        let _ = self
            .disp_tx
            .send(DispatcherMessage::Disconnect {
                id: self.id,
                room: self.room.clone(),
            })
            .await;
        info!("Client {} ({}) disconnected", self.id, self.addr);

        Ok(())
    }

    async fn cl_rx_handler(
        mut ws_tx: WsSink,
        mut cl_rx: mpsc::UnboundedReceiver<ClientMessage>,
        client_id: ParticipantId,
    ) {
        while let Some(cl_msg) = cl_rx.recv().await {
            let shutdown = matches!(cl_msg, ClientMessage::Shutdown);
            let outgoing_msg: OutgoingMessage = cl_msg.into();

            let json = match outgoing_msg.to_json() {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to encode message for {}: {}", client_id, e);
                    continue;
                }
            };

            if let Err(e) = ws_tx.send(Message::Text(json.into())).await {
                error!("Write error for client {}: {}", client_id, e);
                break;
            }

            if shutdown {
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }
        }
    }

    async fn ws_rx_handler(
        mut ws_rx: WsSource,
        disp_tx: mpsc::Sender<DispatcherMessage>,
        client_id: ParticipantId,
        room: RoomId,
        max_message_len: usize,
    ) {
        while let Some(Ok(ws_msg)) = ws_rx.next().await {
            match ws_msg {
                Message::Text(text) => {
                    let disp_msg = match decode_frame(&text, max_message_len) {
                        Ok(message) => DispatcherMessage::Send {
                            from: client_id,
                            room: room.clone(),
                            message,
                        },
                        Err(e) => {
                            warn!("Rejected message from {}: {}", client_id, e);
                            DispatcherMessage::Reject {
                                id: client_id,
                                room: room.clone(),
                                reason: e.to_string(),
                            }
                        }
                    };

                    if disp_tx.send(disp_msg).await.is_err() {
                        error!("Dispatcher gone, dropping client {}", client_id);
                        break;
                    }
                }
                Message::Close(_) => {
                    debug!("Client {} sent close frame", client_id);
                    break;
                }
                m => debug!("Ignoring non-text ws message from {}: {:?}", client_id, m),
            }
        }
    }
}

/// Turns one inbound text frame into a message fit for the log.
pub(crate) fn decode_frame(text: &str, max_message_len: usize) -> Result<ChatMessage, InvalidMessage> {
    let IncomingMessage::SendMsg(message) = text.parse::<IncomingMessage>()?;
    message.validate(max_message_len)?;
    Ok(message)
}
