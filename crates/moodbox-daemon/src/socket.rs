use crate::core::DaemonEvent;
use crate::BroadcastMessage;
use moodbox_proto::protocol::{Broadcast, Command, Message, MAX_FRAME_LEN, PROTOCOL_VERSION};
use moodbox_proto::state::StateManager;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

pub async fn bind(bind_address: &str, port: u16) -> std::io::Result<TcpListener> {
    let addr = format!("{}:{}", bind_address, port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Control socket listening at {}", addr);
    Ok(listener)
}

/// Accept control clients. Commands go into the controller channel like
/// remote presses; every `StateUpdated` goes back out as a `State` frame.
pub fn start_server(
    listener: TcpListener,
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<DaemonEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut client_id = 0usize;
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    client_id += 1;
                    let id = client_id;
                    info!("Client {} connected from {}", id, peer);

                    let sm = state_manager.clone();
                    let evt_tx = event_tx.clone();
                    let bcast_rx = broadcast_tx.subscribe();
                    tokio::spawn(async move {
                        handle_client(stream, sm, id, evt_tx, bcast_rx).await;
                        info!("Client {} disconnected", id);
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    })
}

async fn handle_client(
    stream: TcpStream,
    state_manager: Arc<StateManager>,
    client_id: usize,
    event_tx: mpsc::Sender<DaemonEvent>,
    mut broadcast_rx: broadcast::Receiver<BroadcastMessage>,
) {
    let (mut read_half, mut write_half) = stream.into_split();
    let mut tmp = [0u8; 1024];
    let mut read_buf: Vec<u8> = Vec::new();

    if let Ok(encoded) = encode_hello(&state_manager).await {
        if write_half.write_all(&encoded).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            result = read_half.read(&mut tmp) => {
                match result {
                    Ok(0) => break,
                    Ok(n) => {
                        read_buf.extend_from_slice(&tmp[..n]);
                        loop {
                            match next_frame(&mut read_buf) {
                                Frame::Incomplete => break,
                                Frame::Command(cmd) => {
                                    info!("Client {} sent command: {}", client_id, cmd);
                                    if event_tx.send(DaemonEvent::Command(cmd)).await.is_err() {
                                        warn!("DaemonEvent channel closed");
                                        return;
                                    }
                                }
                                Frame::Other => {
                                    debug!("Client {} sent a broadcast frame, ignored", client_id);
                                }
                                Frame::Malformed(e) => {
                                    warn!("Client {} sent an unreadable frame: {}", client_id, e);
                                }
                                Frame::Oversized(len) => {
                                    warn!(
                                        "Client {} announced a {} byte frame, closing",
                                        client_id, len
                                    );
                                    return;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        error!("Read error from client {}: {}", client_id, e);
                        break;
                    }
                }
            }

            msg = broadcast_rx.recv() => {
                let encoded = match msg {
                    Ok(BroadcastMessage::StateUpdated) => encode_state(&state_manager).await,
                    Ok(BroadcastMessage::Log(message)) => {
                        Message::Broadcast(Broadcast::Log { message }).encode()
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Client {} missed {} broadcast messages", client_id, n);
                        encode_state(&state_manager).await
                    }
                    Err(_) => break,
                };
                if let Ok(encoded) = encoded {
                    if write_half.write_all(&encoded).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
}

/// What the front of a client's read buffer holds.
#[derive(Debug)]
enum Frame {
    /// Wait for more bytes.
    Incomplete,
    Command(Command),
    /// A well-formed frame that is not a command.
    Other,
    /// A complete frame whose body is not a message; already dropped.
    Malformed(serde_json::Error),
    /// Header beyond `MAX_FRAME_LEN`; the stream cannot be resynchronised.
    Oversized(usize),
}

/// Take the next frame off `buf`. Complete frames are always consumed, so
/// one bad frame never blocks the ones behind it.
fn next_frame(buf: &mut Vec<u8>) -> Frame {
    let Some(len) = Message::frame_body_len(buf) else {
        return Frame::Incomplete;
    };
    if len > MAX_FRAME_LEN {
        return Frame::Oversized(len);
    }
    if buf.len() < 4 + len {
        return Frame::Incomplete;
    }
    let parsed = serde_json::from_slice::<Message>(&buf[4..4 + len]);
    buf.drain(..4 + len);
    match parsed {
        Ok(Message::Command(cmd)) => Frame::Command(cmd),
        Ok(Message::Broadcast(_)) => Frame::Other,
        Err(e) => Frame::Malformed(e),
    }
}

async fn encode_hello(state_manager: &StateManager) -> anyhow::Result<Vec<u8>> {
    Message::Broadcast(Broadcast::Hello {
        protocol_version: PROTOCOL_VERSION,
        snapshot: state_manager.get_state().await,
    })
    .encode()
}

async fn encode_state(state_manager: &StateManager) -> anyhow::Result<Vec<u8>> {
    Message::Broadcast(Broadcast::State {
        snapshot: state_manager.get_state().await,
    })
    .encode()
}
