//! # Control-plane TCP server.
//!
//! A stateless listener: each accepted connection carries exactly one
//! command of at most 1024 bytes, receives one textual response, and is
//! closed. The accept loop winds down silently when the supervisor's root
//! token fires; any other accept error is logged and the loop continues.
//!
//! The socket carries no authentication. Bind it to loopback or restrict it
//! at the network layer.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::control::command;
use crate::core::Coordinator;

/// Upper bound on one inbound command.
const MAX_COMMAND_BYTES: usize = 1024;
/// Upper bound on one response read by the forwarding client.
const MAX_RESPONSE_BYTES: usize = 4096;

/// TCP command dispatcher over a [`Coordinator`].
pub struct ControlServer {
    coordinator: Arc<Coordinator>,
    cancel: CancellationToken,
}

impl ControlServer {
    pub fn new(coordinator: Arc<Coordinator>, cancel: CancellationToken) -> Self {
        Self {
            coordinator,
            cancel,
        }
    }

    /// Accepts connections until the cancellation token fires.
    pub async fn serve(self, listener: TcpListener) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, _addr)) => {
                        let coordinator = Arc::clone(&self.coordinator);
                        tokio::spawn(handle_connection(stream, coordinator));
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "Error accepting connection");
                    }
                }
            }
        }
    }
}

/// One command in, one response out, then the socket closes.
async fn handle_connection(mut stream: TcpStream, coordinator: Arc<Coordinator>) {
    let mut buf = [0u8; MAX_COMMAND_BYTES];
    let size = match stream.read(&mut buf).await {
        Ok(size) => size,
        Err(_) => return,
    };
    let input = String::from_utf8_lossy(&buf[..size]);
    let response = command::respond(&coordinator, &input).await;
    let _ = stream.write_all(response.as_bytes()).await;
}

/// Sends one command to a supervisor on localhost and returns its response.
/// Backs the `--operation service` command-line mode.
pub async fn forward(port: u16, command: &str) -> std::io::Result<String> {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await?;
    stream.write_all(command.as_bytes()).await?;

    let mut buf = vec![0u8; MAX_RESPONSE_BYTES];
    let size = stream.read(&mut buf).await?;
    Ok(String::from_utf8_lossy(&buf[..size]).into_owned())
}
