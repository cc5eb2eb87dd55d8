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

//! The in-process bridge agent: pairs listeners and senders without a
//! network, in round-robin or broadcast mode.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{instrument, trace};

use courier_core::error::TransportError;
use courier_core::message::{Envelope, PayloadCodec};
use courier_core::traits::{Listener, Sender};

/// How the bridge distributes each transmitted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BridgeMode {
    /// Deliver each message to one listener, rotating through the set.
    #[default]
    RoundRobin,
    /// Deliver an independent copy of each message to every listener.
    Broadcast,
}

/// An in-process transport simulator.
///
/// The agent hands out [`BridgeSender`]s and [`BridgeListener`]s; whatever a
/// sender transmits is delivered to the registered listeners according to the
/// [`BridgeMode`]. Every delivered copy is produced by serializing and
/// deserializing the message through the injected [`PayloadCodec`], so
/// listener-side mutation can never alias the sender-side original or another
/// listener's copy.
///
/// Sends with no listeners registered are silent no-ops, mirroring the
/// "nobody is listening yet" window during startup.
pub struct BridgeAgent {
    mode: BridgeMode,
    codec: Arc<dyn PayloadCodec>,
    listeners: RwLock<Vec<Arc<BridgeListener>>>,
    send_count: AtomicU64,
}

impl BridgeAgent {
    /// Creates a bridge agent with the given dispatch mode and payload
    /// codec.
    #[must_use]
    pub fn new(mode: BridgeMode, codec: Arc<dyn PayloadCodec>) -> Arc<Self> {
        Arc::new(Self {
            mode,
            codec,
            listeners: RwLock::new(Vec::new()),
            send_count: AtomicU64::new(0),
        })
    }

    /// Creates and registers a new listener endpoint for `channel_id`.
    pub async fn listener(self: &Arc<Self>, channel_id: impl Into<String>) -> Arc<BridgeListener> {
        let listener = Arc::new(BridgeListener::new(channel_id.into()));
        self.listeners.write().await.push(Arc::clone(&listener));
        listener
    }

    /// Creates a new sender endpoint for `channel_id`.
    #[must_use]
    pub fn sender(self: &Arc<Self>, channel_id: impl Into<String>) -> Arc<BridgeSender> {
        Arc::new(BridgeSender {
            channel_id: channel_id.into(),
            agent: Arc::downgrade(self),
        })
    }

    /// The number of messages transmitted so far.
    #[must_use]
    pub fn send_count(&self) -> u64 {
        self.send_count.load(Ordering::SeqCst)
    }

    /// Delivers the envelope to the registered listeners per the dispatch
    /// mode.
    #[instrument(skip(self, envelope), fields(message = %envelope.message.to_key()))]
    async fn dispatch(&self, envelope: &Envelope) -> Result<(), TransportError> {
        let listeners = self.listeners.read().await.clone();
        if listeners.is_empty() {
            trace!("no listeners registered; send is a no-op");
            return Ok(());
        }

        // One increment per transmitted message, even in broadcast mode.
        let count = self.send_count.fetch_add(1, Ordering::SeqCst);

        match self.mode {
            BridgeMode::RoundRobin => {
                let position = (count % listeners.len() as u64) as usize;
                listeners[position].inject(self.payload_copy(envelope)?).await;
            }
            BridgeMode::Broadcast => {
                for listener in &listeners {
                    listener.inject(self.payload_copy(envelope)?).await;
                }
            }
        }
        Ok(())
    }

    /// Produces an independent copy of the envelope by round-tripping its
    /// message through the codec. The copy carries a fresh cancellation
    /// token and completion signal, like a message that crossed a real wire.
    fn payload_copy(&self, envelope: &Envelope) -> Result<Envelope, TransportError> {
        let bytes = self.codec.encode(&envelope.message)?;
        Ok(Envelope::new(self.codec.decode(&bytes)?))
    }
}

impl std::fmt::Debug for BridgeAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeAgent")
            .field("mode", &self.mode)
            .field("send_count", &self.send_count())
            .finish()
    }
}

/// The transmit side of a bridge pairing.
pub struct BridgeSender {
    channel_id: String,
    agent: Weak<BridgeAgent>,
}

#[async_trait]
impl Sender for BridgeSender {
    fn supports_channel(&self, channel_id: &str) -> bool {
        self.channel_id.eq_ignore_ascii_case(channel_id)
    }

    async fn process_message(&self, envelope: Envelope) -> Result<bool, TransportError> {
        match self.agent.upgrade() {
            Some(agent) => {
                agent.dispatch(&envelope).await?;
                Ok(true)
            }
            None => Err(TransportError::ConnectionClosed),
        }
    }
}

impl std::fmt::Debug for BridgeSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeSender")
            .field("channel_id", &self.channel_id)
            .finish()
    }
}

/// The receive side of a bridge pairing. Injected envelopes queue in an
/// unbounded inbox until the consumer drains them.
pub struct BridgeListener {
    channel_id: String,
    inbox: mpsc::UnboundedSender<Envelope>,
    outbox: Mutex<mpsc::UnboundedReceiver<Envelope>>,
}

impl BridgeListener {
    fn new(channel_id: String) -> Self {
        let (inbox, outbox) = mpsc::unbounded_channel();
        Self {
            channel_id,
            inbox,
            outbox: Mutex::new(outbox),
        }
    }

    /// The channel this listener accepts.
    #[must_use]
    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    /// Receives the next injected envelope, waiting until one arrives.
    pub async fn recv(&self) -> Option<Envelope> {
        self.outbox.lock().await.recv().await
    }

    /// Receives an already-queued envelope without waiting.
    pub async fn try_recv(&self) -> Option<Envelope> {
        self.outbox.lock().await.try_recv().ok()
    }
}

#[async_trait]
impl Listener for BridgeListener {
    fn supports_channel(&self, channel_id: &str) -> bool {
        self.channel_id.eq_ignore_ascii_case(channel_id)
    }

    async fn inject(&self, envelope: Envelope) {
        if self.inbox.send(envelope).is_err() {
            trace!(channel = %self.channel_id, "listener inbox closed; envelope discarded");
        }
    }
}

impl std::fmt::Debug for BridgeListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeListener")
            .field("channel_id", &self.channel_id)
            .finish()
    }
}
