use async_trait::async_trait;
use chord_lib::dht_messages::{DhtMessage, DhtResponse};
use log::debug;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::PeerUnreachable;

/// Client side of the RPC transport: one request line, one response line.
///
/// Implementations never retry; retry policy belongs to the caller.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NetworkClient: Send + Sync + 'static {
    async fn call_node(
        &self,
        address: &str,
        message: DhtMessage,
    ) -> Result<DhtResponse, PeerUnreachable>;
}

/// Dials peers over plain TCP with a deadline on every step.
pub struct RealNetworkClient {
    timeout: Duration,
}

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

impl RealNetworkClient {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn exchange(&self, address: &str, message: &DhtMessage) -> Result<String, PeerUnreachable> {
        let unreachable = |reason: String| PeerUnreachable::new(address, reason);

        let stream = match timeout(self.timeout, TcpStream::connect(address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(unreachable(format!("connect failed: {}", e))),
            Err(_) => {
                return Err(unreachable(format!(
                    "connect timed out after {:?}",
                    self.timeout
                )))
            }
        };

        let (reader, mut writer) = stream.into_split();
        let request = format!("{}\n", message);
        debug!("Sending to {}: {}", address, message);

        match timeout(self.timeout, writer.write_all(request.as_bytes())).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(unreachable(format!("write failed: {}", e))),
            Err(_) => return Err(unreachable("write timed out".to_string())),
        }

        let mut line = String::new();
        let mut reader = BufReader::new(reader);
        match timeout(self.timeout, reader.read_line(&mut line)).await {
            Ok(Ok(0)) => Err(unreachable("connection closed before a response".to_string())),
            Ok(Ok(_)) => Ok(line),
            Ok(Err(e)) => Err(unreachable(format!("read failed: {}", e))),
            Err(_) => Err(unreachable(format!("read timed out after {:?}", self.timeout))),
        }
    }
}

impl Default for RealNetworkClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NetworkClient for RealNetworkClient {
    async fn call_node(
        &self,
        address: &str,
        message: DhtMessage,
    ) -> Result<DhtResponse, PeerUnreachable> {
        let line = self.exchange(address, &message).await?;
        let response = message
            .parse_response(&line)
            .map_err(|e| PeerUnreachable::new(address, e))?;
        debug!("Received from {}: {}", address, response);

        // The peer failed to serve the request, which callers cannot tell
        // apart from the peer being gone.
        if response == DhtResponse::Error {
            return Err(PeerUnreachable::new(
                address,
                format!("{} answered with ERROR", message.kind()),
            ));
        }
        Ok(response)
    }
}
