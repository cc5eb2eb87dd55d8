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

//! The outbound send path: sender registration, the channel→sender cache,
//! and concurrent fan-out.

use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use tokio::sync::RwLock;
use tracing::{error, info, instrument, warn};

use courier_core::message::Envelope;
use courier_core::traits::Sender;

/// Owns the registered senders and routes outbound envelopes to every sender
/// that supports their channel.
///
/// Channel resolution is cached per channel id. A channel with zero matching
/// senders is cached as an empty list so repeated unresolvable sends do not
/// rescan the registry; the whole cache is invalidated whenever a sender is
/// added, since a new sender might support any channel. Envelopes without a
/// channel id always miss the cache and are matched against the empty
/// channel.
pub struct CommunicationContainer {
    originator_service_id: String,
    senders: RwLock<Vec<Arc<dyn Sender>>>,
    channel_cache: DashMap<String, Vec<Arc<dyn Sender>>>,
}

impl CommunicationContainer {
    /// Creates a container that stamps `originator_service_id` on outbound
    /// envelopes that do not already carry an originator.
    #[must_use]
    pub fn new(originator_service_id: impl Into<String>) -> Self {
        Self {
            originator_service_id: originator_service_id.into(),
            senders: RwLock::new(Vec::new()),
            channel_cache: DashMap::new(),
        }
    }

    /// Registers a sender and invalidates the entire channel cache.
    pub async fn sender_add(&self, sender: Arc<dyn Sender>) {
        self.senders.write().await.push(sender);
        self.channel_cache.clear();
    }

    /// The number of registered senders.
    pub async fn sender_count(&self) -> usize {
        self.senders.read().await.len()
    }

    /// Resolves the senders supporting `channel_id`, consulting and
    /// populating the cache. A `None` channel id is matched against the
    /// empty channel and never cached.
    pub async fn resolve(&self, channel_id: Option<&str>) -> Vec<Arc<dyn Sender>> {
        match channel_id {
            Some(id) => {
                if let Some(cached) = self.channel_cache.get(id) {
                    return cached.value().clone();
                }
                let matched = self.scan(id).await;
                // The empty case is cached too, to short-circuit future scans.
                self.channel_cache.insert(id.to_string(), matched.clone());
                matched
            }
            None => self.scan("").await,
        }
    }

    async fn scan(&self, channel_id: &str) -> Vec<Arc<dyn Sender>> {
        self.senders
            .read()
            .await
            .iter()
            .filter(|sender| sender.supports_channel(channel_id))
            .cloned()
            .collect()
    }

    /// Transmits the envelope through every sender that supports its
    /// channel, concurrently.
    ///
    /// Returns `false` (logged, never thrown) when no sender matches or when
    /// any matching sender fails. Partial delivery to the other senders in
    /// the same call is not rolled back; senders are assumed
    /// duplicate-tolerant at the transport level.
    #[instrument(skip(self, envelope), fields(message = %envelope.message.to_key()))]
    pub async fn send(&self, mut envelope: Envelope) -> bool {
        let senders = self.resolve(envelope.message.channel_id.as_deref()).await;
        if senders.is_empty() {
            info!("unable to resolve sender for message");
            return false;
        }

        if envelope
            .message
            .originator_service_id
            .as_deref()
            .map_or(true, str::is_empty)
        {
            envelope.message.originator_service_id = Some(self.originator_service_id.clone());
        }

        let dispatches = senders
            .iter()
            .map(|sender| sender.process_message(envelope.clone()));

        let mut delivered = true;
        for result in join_all(dispatches).await {
            match result {
                Ok(true) => {}
                Ok(false) => {
                    warn!("sender reported the message as undelivered");
                    delivered = false;
                }
                Err(err) => {
                    error!(%err, "unable to send message");
                    delivered = false;
                }
            }
        }
        delivered
    }
}

impl std::fmt::Debug for CommunicationContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommunicationContainer")
            .field("originator_service_id", &self.originator_service_id)
            .field("cached_channels", &self.channel_cache.len())
            .finish()
    }
}
