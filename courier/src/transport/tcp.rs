/*
 * Copyright (c) 2025. Courier Contributors
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */

//! The TCP channel transport: length-prefixed JSON frames over a
//! `tokio::net::TcpStream`, with connect-on-start client lifecycle and an
//! accept-loop listener with cooperative shutdown.
//!
//! Only the transport contract is implemented here; TLS plumbing sits behind
//! it in deployments that need it and is out of scope.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use courier_core::error::TransportError;
use courier_core::message::{Envelope, ServiceMessage};
use courier_core::traits::Sender;

use crate::transport::TransportClient;

/// Maximum size of a single wire frame.
pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

/// Writes one length-prefixed JSON frame.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    message: &ServiceMessage,
) -> Result<(), TransportError> {
    let body = serde_json::to_vec(message)?;
    if body.len() > MAX_FRAME_SIZE {
        return Err(TransportError::Send(format!(
            "frame of {} bytes exceeds maximum of {MAX_FRAME_SIZE}",
            body.len()
        )));
    }
    writer.write_all(&(body.len() as u32).to_be_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one length-prefixed JSON frame.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<ServiceMessage, TransportError> {
    let mut header = [0u8; 4];
    reader.read_exact(&mut header).await?;
    let length = u32::from_be_bytes(header) as usize;
    if length > MAX_FRAME_SIZE {
        return Err(TransportError::Serialization(format!(
            "frame of {length} bytes exceeds maximum of {MAX_FRAME_SIZE}"
        )));
    }
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await?;
    Ok(serde_json::from_slice(&body)?)
}

/// Outbound TCP connection for one priority partition.
///
/// Connects on `start`, shuts the stream down on `stop`, and can be
/// restarted in place — the lifecycle the messaging service drives during a
/// reset.
pub struct TcpChannelClient {
    address: String,
    connection: Mutex<Option<TcpStream>>,
}

impl TcpChannelClient {
    /// Creates a client that will connect to `address` on start.
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            connection: Mutex::new(None),
        }
    }

    /// Transmits one message over the open connection.
    pub async fn transmit(&self, message: &ServiceMessage) -> Result<(), TransportError> {
        let mut guard = self.connection.lock().await;
        let stream = guard.as_mut().ok_or(TransportError::ConnectionClosed)?;
        write_frame(stream, message).await
    }
}

#[async_trait]
impl TransportClient for TcpChannelClient {
    async fn start(&self) -> Result<(), TransportError> {
        let stream = TcpStream::connect(&self.address).await?;
        debug!(address = %self.address, "tcp channel connected");
        *self.connection.lock().await = Some(stream);
        Ok(())
    }

    async fn stop(&self) -> Result<(), TransportError> {
        if let Some(mut stream) = self.connection.lock().await.take() {
            stream.shutdown().await?;
        }
        Ok(())
    }
}

/// A sender that carries one channel over a [`TcpChannelClient`].
pub struct TcpChannelSender {
    channel_id: String,
    client: Arc<TcpChannelClient>,
}

impl TcpChannelSender {
    /// Creates a sender for `channel_id` transmitting through `client`.
    #[must_use]
    pub fn new(channel_id: impl Into<String>, client: Arc<TcpChannelClient>) -> Self {
        Self {
            channel_id: channel_id.into(),
            client,
        }
    }
}

#[async_trait]
impl Sender for TcpChannelSender {
    fn supports_channel(&self, channel_id: &str) -> bool {
        self.channel_id.eq_ignore_ascii_case(channel_id)
    }

    async fn process_message(&self, envelope: Envelope) -> Result<bool, TransportError> {
        self.client.transmit(&envelope.message).await?;
        Ok(true)
    }
}

/// Inbound TCP endpoint for one priority partition.
///
/// Binds on `start` and accepts connections until stopped; every decoded
/// frame is wrapped in an [`Envelope`] and forwarded to the sink handed out
/// at construction. Stop is cooperative: in-flight reads observe the
/// cancellation token at frame boundaries.
pub struct TcpChannelListener {
    address: String,
    sink: mpsc::UnboundedSender<Envelope>,
    local_addr: Mutex<Option<std::net::SocketAddr>>,
    shutdown: Mutex<Option<CancellationToken>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl TcpChannelListener {
    /// Creates a listener that will bind `address` on start. The returned
    /// receiver yields every inbound envelope.
    #[must_use]
    pub fn new(address: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<Envelope>) {
        let (sink, source) = mpsc::unbounded_channel();
        (
            Self {
                address: address.into(),
                sink,
                local_addr: Mutex::new(None),
                shutdown: Mutex::new(None),
                accept_task: Mutex::new(None),
            },
            source,
        )
    }

    /// The address actually bound, available once started. Useful when the
    /// configured address requested an ephemeral port.
    pub async fn local_addr(&self) -> Option<std::net::SocketAddr> {
        *self.local_addr.lock().await
    }
}

#[async_trait]
impl TransportClient for TcpChannelListener {
    async fn start(&self) -> Result<(), TransportError> {
        let listener = TcpListener::bind(&self.address).await?;
        *self.local_addr.lock().await = listener.local_addr().ok();
        debug!(address = %self.address, "tcp channel listening");

        // A fresh token per start so the listener can be reset in place.
        let shutdown = CancellationToken::new();
        *self.shutdown.lock().await = Some(shutdown.clone());

        let sink = self.sink.clone();
        let task = tokio::spawn(accept_loop(listener, sink, shutdown));
        *self.accept_task.lock().await = Some(task);
        Ok(())
    }

    async fn stop(&self) -> Result<(), TransportError> {
        if let Some(shutdown) = self.shutdown.lock().await.take() {
            shutdown.cancel();
        }
        if let Some(task) = self.accept_task.lock().await.take() {
            let _ = task.await;
        }
        Ok(())
    }
}

async fn accept_loop(
    listener: TcpListener,
    sink: mpsc::UnboundedSender<Envelope>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    trace!(%peer, "tcp channel connection accepted");
                    tokio::spawn(connection_loop(stream, sink.clone(), shutdown.clone()));
                }
                Err(err) => {
                    error!(%err, "tcp channel accept failed");
                }
            },
        }
    }
}

async fn connection_loop(
    mut stream: TcpStream,
    sink: mpsc::UnboundedSender<Envelope>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            frame = read_frame(&mut stream) => match frame {
                Ok(message) => {
                    if sink.send(Envelope::new(message)).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    debug!(%err, "tcp channel connection terminated");
                    break;
                }
            },
        }
    }
}
