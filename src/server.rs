use crate::{
    client::Client,
    config::Config,
    dispatcher::{Dispatcher, DispatcherMessage},
    error::AppError,
    room::{RoomId, RoomRegistry},
};
use futures_util::TryFutureExt;
use std::{net::SocketAddr, sync::Arc};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc,
};
use tokio_tungstenite::{
    accept_hdr_async,
    tungstenite::{
        handshake::server::{ErrorResponse, Request, Response},
        http::StatusCode,
    },
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{error, info};
use uuid::Uuid;

/// Runs the relay on `listener` until `ct` is cancelled, then waits for
/// every open connection to wind down.
pub async fn serve(listener: TcpListener, config: Arc<Config>, ct: CancellationToken) -> Result<(), AppError> {
    let (disp_tx, disp_rx) = mpsc::channel(config.dispatcher_buffer);
    let rooms = RoomRegistry::new(config.history_limit);
    let dispatcher = tokio::spawn(Dispatcher::new(rooms, disp_rx).run(ct.clone()));

    info!("Listening on ws://{}{}", listener.local_addr()?, config.socket_path);
    let conn_task_tracker = TaskTracker::new();

    loop {
        tokio::select! {
            biased;
            _ = ct.cancelled() => {
                info!("No longer accepting new connections");
                break;
            },
            res = listener.accept() => {
                match res {
                    Ok((tcp_stream, addr)) => {
                        conn_task_tracker.spawn(
                            tcp_handler(tcp_stream, addr, disp_tx.clone(), config.clone(), ct.clone())
                                .inspect_err(move |e| error!("Connection {} failed: {}", addr, e)),
                        );
                    },
                    Err(e) => error!("{}", e),
                }
            }
        }
    }

    drop(disp_tx);
    conn_task_tracker.close();
    conn_task_tracker.wait().await;
    info!("All connections closed");

    if let Err(e) = dispatcher.await {
        error!("Dispatcher task failed: {}", e);
    }

    Ok(())
}

async fn tcp_handler(
    tcp_stream: TcpStream,
    addr: SocketAddr,
    disp_tx: mpsc::Sender<DispatcherMessage>,
    config: Arc<Config>,
    ct: CancellationToken,
) -> Result<(), AppError> {
    let mut room = None;
    let handshake = accept_hdr_async(tcp_stream, |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        room = Some(route(req, &config)?);
        Ok(resp)
    });

    let ws_stream = tokio::select! {
        res = handshake => res?,
        _ = ct.cancelled() => return Ok(()),
    };

    let room = room.unwrap_or_else(|| config.default_room.clone());

    Client::new(Uuid::new_v4(), addr, room, ws_stream, disp_tx, config, ct)
        .run()
        .await
}

/// Picks the room for a handshake, refusing anything off the socket path.
fn route(req: &Request, config: &Config) -> Result<RoomId, ErrorResponse> {
    if req.uri().path() != config.socket_path {
        return Err(reject(StatusCode::NOT_FOUND, "unknown endpoint"));
    }

    match requested_room(req.uri().query()) {
        None => Ok(config.default_room.clone()),
        Some(room) if is_valid_room_id(room) => Ok(room.to_string()),
        Some(_) => Err(reject(StatusCode::BAD_REQUEST, "invalid room id")),
    }
}

fn requested_room(query: Option<&str>) -> Option<&str> {
    query?.split('&').find_map(|pair| pair.strip_prefix("room="))
}

fn reject(status: StatusCode, reason: &str) -> ErrorResponse {
    let mut resp = ErrorResponse::new(Some(reason.to_string()));
    *resp.status_mut() = status;
    resp
}

pub fn is_valid_room_id(id: &str) -> bool {
    (1..=64).contains(&id.len()) && id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}
