use std::fmt::Debug;
use std::sync::Arc;

use futures::{Sink, SinkExt, Stream, StreamExt};
use orion::kdf::SecretKey;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;

use crate::server::handlers;
use crate::server::state::StateRef;
use crate::transfer::connection::ServerConnection;
use crate::transfer::messages::{FromClientMessage, ToClientMessage};

pub async fn handle_client_connections(
    state_ref: StateRef,
    listener: TcpListener,
    end_flag: Arc<Notify>,
    key: Arc<SecretKey>,
) {
    while let Ok((connection, _)) = listener.accept().await {
        let state_ref = state_ref.clone();
        let end_flag = end_flag.clone();
        let key = key.clone();

        tokio::task::spawn_local(async move {
            if let Err(e) = handle_client(connection, state_ref, end_flag, key).await {
                log::error!("Client error: {e}");
            }
        });
    }
}

async fn handle_client(
    socket: TcpStream,
    state_ref: StateRef,
    end_flag: Arc<Notify>,
    key: Arc<SecretKey>,
) -> crate::Result<()> {
    log::debug!("New client connection");
    let socket = ServerConnection::accept_client(socket, key).await?;
    let (tx, rx) = socket.split();

    client_rpc_loop(tx, rx, state_ref, end_flag).await;
    log::debug!("Client connection ended");
    Ok(())
}

pub async fn client_rpc_loop<
    Tx: Sink<ToClientMessage, Error = crate::Error> + Unpin,
    Rx: Stream<Item = crate::Result<FromClientMessage>> + Unpin,
>(
    mut tx: Tx,
    mut rx: Rx,
    state_ref: StateRef,
    end_flag: Arc<Notify>,
) where
    Tx::Error: Debug,
{
    while let Some(message_result) = rx.next().await {
        match message_result {
            Ok(message) => {
                let response = match message {
                    FromClientMessage::Request(msg) => handlers::handle_request(&state_ref, msg),
                    FromClientMessage::Query(msg) => handlers::handle_query(&state_ref, msg),
                    FromClientMessage::KeepAlive(msg) => {
                        handlers::handle_keepalive(&state_ref, msg)
                    }
                    FromClientMessage::Remove(msg) => handlers::handle_remove(&state_ref, msg),
                    FromClientMessage::GuestAdd(msg) => {
                        handlers::handle_guest_add(&state_ref, msg)
                    }
                    FromClientMessage::GuestRemove(msg) => {
                        handlers::handle_guest_remove(&state_ref, msg)
                    }
                    FromClientMessage::Authorize(msg) => {
                        handlers::handle_authorize(&state_ref, msg)
                    }
                    FromClientMessage::Stats => handlers::handle_stats(&state_ref),
                    FromClientMessage::ServerInfo => handlers::handle_server_info(&state_ref),
                    FromClientMessage::Stop => {
                        end_flag.notify_one();
                        break;
                    }
                };
                if let Err(error) = tx.send(response).await {
                    log::error!("Cannot send response to client: {error:?}");
                    break;
                }
            }
            Err(error) => {
                log::error!("Cannot parse client message: {error}");
                if tx
                    .send(ToClientMessage::Error(error.to_string()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        }
    }
}
