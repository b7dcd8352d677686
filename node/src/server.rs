use log::{debug, error, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

use crate::error::NodeError;
use crate::network_client::NetworkClient;
use crate::node::ChordNode;

/// Binds the RPC listener. Failing here is the one fatal startup error.
pub async fn bind(address: &str) -> Result<TcpListener, NodeError> {
    TcpListener::bind(address)
        .await
        .map_err(|source| NodeError::Bind {
            address: address.to_string(),
            source,
        })
}

/// Accepts connections forever, serving at most `workers` of them at once.
/// When every worker is busy new connections wait in the listen backlog.
/// A connection that sends nothing for `idle_timeout` is closed so that it
/// gives its worker back.
pub async fn serve<T: NetworkClient>(
    node: ChordNode<T>,
    listener: TcpListener,
    workers: usize,
    idle_timeout: Duration,
) {
    let local = listener
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| node.info.socket_address());
    info!(
        "[{}] Chord node {} listening on {}",
        node.info, node.info.id, local
    );

    let permits = Arc::new(Semaphore::new(workers.max(1)));
    loop {
        let Ok(permit) = permits.clone().acquire_owned().await else {
            // The semaphore is never closed
            return;
        };
        match listener.accept().await {
            Ok((socket, peer)) => {
                let node = node.clone();
                tokio::spawn(async move {
                    debug!("[{}] Accepted connection from {}", node.info, peer);
                    handle_connection(&node, socket, idle_timeout).await;
                    drop(permit);
                });
            }
            Err(e) => {
                error!("[{}] Failed to accept connection: {}", node.info, e);
            }
        }
    }
}

/// Answers request lines until the peer closes its side or stays silent
/// for longer than `idle_timeout`.
pub async fn handle_connection<T: NetworkClient>(
    node: &ChordNode<T>,
    socket: TcpStream,
    idle_timeout: Duration,
) {
    let (reader, mut writer) = socket.into_split();
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = match tokio::time::timeout(idle_timeout, lines.next_line()).await {
            Ok(Ok(Some(line))) => line,
            Ok(Ok(None)) => return,
            Err(_) => {
                debug!("[{}] Closing connection idle for {:?}", node.info, idle_timeout);
                return;
            }
            Ok(Err(e)) => {
                error!("[{}] Failed to read from socket: {}", node.info, e);
                return;
            }
        };

        let mut response = node.handle_line(&line).await;
        response.push('\n');
        if let Err(e) = writer.write_all(response.as_bytes()).await {
            error!("[{}] Failed to write response to socket: {}", node.info, e);
            return;
        }
    }
}
