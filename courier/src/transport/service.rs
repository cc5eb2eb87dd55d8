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

//! The messaging service: one transport client per priority partition, with
//! default-priority resolution and reset-with-backoff recovery.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

use courier_core::error::TransportError;

use crate::transport::{ClientFactory, ClientHolder, PartitionConfig};

/// Names a partition client: the bare channel id for priority 1, otherwise
/// the channel id suffixed with the priority.
fn partition_client_name(channel_id: &str, priority: u32) -> String {
    if priority == 1 {
        channel_id.to_string()
    } else {
        format!("{channel_id}{priority}")
    }
}

/// Supervises the transport clients for one channel.
///
/// The service owns a client holder per configured priority partition. It
/// starts and stops them as a group, resolves the correct client for an
/// inbound priority (falling back to the default priority when the requested
/// one is not configured), and recovers a faulted client with an unbounded
/// reset-with-backoff loop.
///
/// The client map is mutated only by `start` and `stop`; `resolve` and
/// `reset` only read it, so concurrent sends never race a mutation.
pub struct MessagingService {
    channel_id: String,
    partitions: Vec<PartitionConfig>,
    factory: Box<dyn ClientFactory>,
    clients: DashMap<u32, Arc<ClientHolder>>,
    default_priority: AtomicU32,
    started: AtomicBool,
    reset_backoff_step: Duration,
}

impl MessagingService {
    /// Creates a service for `channel_id` over the given partitions. Clients
    /// are not created until [`MessagingService::start`].
    #[must_use]
    pub fn new(
        channel_id: impl Into<String>,
        partitions: Vec<PartitionConfig>,
        factory: Box<dyn ClientFactory>,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            partitions,
            factory,
            clients: DashMap::new(),
            default_priority: AtomicU32::new(1),
            started: AtomicBool::new(false),
            reset_backoff_step: Duration::from_millis(100),
        }
    }

    /// Overrides the reset backoff step (attempt `n` sleeps `n * step`).
    #[must_use]
    pub fn with_reset_backoff_step(mut self, step: Duration) -> Self {
        self.reset_backoff_step = step;
        self
    }

    /// The channel this service transports.
    #[must_use]
    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    /// The default priority computed at start: 1 when configured, else the
    /// maximum configured priority.
    #[must_use]
    pub fn default_priority(&self) -> u32 {
        self.default_priority.load(Ordering::SeqCst)
    }

    /// Whether the service has started and not yet stopped.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Creates and starts the partition clients.
    ///
    /// Fails with [`TransportError::Configuration`] when the channel id or
    /// the partition list is unset. A client whose `can_start` is `false`
    /// is registered but left stopped, with a log rather than an error.
    /// Starting twice without stopping is undefined.
    #[instrument(skip(self), fields(channel = %self.channel_id))]
    pub async fn start(&self) -> Result<(), TransportError> {
        if self.channel_id.is_empty() {
            return Err(TransportError::Configuration(
                "channel id cannot be empty".into(),
            ));
        }
        if self.partitions.is_empty() {
            return Err(TransportError::Configuration(
                "at least one priority partition must be configured".into(),
            ));
        }

        for partition in &self.partitions {
            let client = self.factory.create(&self.channel_id, partition);
            let holder = Arc::new(ClientHolder::new(
                partition.priority,
                partition_client_name(&self.channel_id, partition.priority),
                self.factory.client_type(),
                client,
            ));

            self.clients.insert(partition.priority, Arc::clone(&holder));

            if holder.can_start() {
                holder.start().await?;
            } else {
                info!(
                    client = holder.name(),
                    client_type = holder.client_type(),
                    priority = holder.priority(),
                    "client not started"
                );
            }
        }

        // Unmatched inbound priorities fall back to 1, unless 1 is not
        // configured, in which case the highest configured priority wins.
        let default = if self.partitions.iter().any(|p| p.priority == 1) {
            1
        } else {
            self.partitions
                .iter()
                .map(|p| p.priority)
                .max()
                .unwrap_or(1)
        };
        self.default_priority.store(default, Ordering::SeqCst);
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Stops every client best-effort and clears the client map. A failing
    /// stop is logged, not propagated.
    #[instrument(skip(self), fields(channel = %self.channel_id))]
    pub async fn stop(&self) {
        let holders: Vec<Arc<ClientHolder>> = self
            .clients
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for holder in holders {
            if let Err(err) = holder.stop().await {
                warn!(client = holder.name(), %err, "client stop failed");
            }
        }
        self.clients.clear();
        self.started.store(false, Ordering::SeqCst);
    }

    /// Resolves the client for `priority`, falling back to the default
    /// priority when the requested one is not configured. Returns `None`
    /// only before a successful start.
    #[must_use]
    pub fn resolve(&self, priority: u32) -> Option<Arc<ClientHolder>> {
        self.clients
            .get(&priority)
            .or_else(|| self.clients.get(&self.default_priority()))
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Recovers a faulted partition client: stop (errors swallowed), then
    /// re-initialize and start with linear backoff, forever.
    ///
    /// There is deliberately no maximum attempt count. A service whose
    /// transport is permanently dead is non-functional either way, so it
    /// keeps attempting recovery rather than giving up silently. Resets are
    /// per-partition; other clients are untouched.
    #[instrument(skip(self, error), fields(channel = %self.channel_id))]
    pub async fn reset(&self, priority: u32, error: &TransportError) {
        let Some(holder) = self.resolve(priority) else {
            warn!("reset requested for an unknown priority");
            return;
        };

        error!(client = holder.name(), %error, "client signalled failure; resetting");

        if let Err(stop_err) = holder.stop().await {
            warn!(client = holder.name(), %stop_err, "stop during reset failed");
        }

        let mut attempt: u32 = 0;
        loop {
            match holder.start().await {
                Ok(()) => {
                    info!(client = holder.name(), attempt, "client reset complete");
                    break;
                }
                Err(err) => {
                    attempt += 1;
                    error!(client = holder.name(), %err, attempt, "client reset attempt failed");
                    sleep(self.reset_backoff_step * attempt).await;
                }
            }
        }
    }
}

impl std::fmt::Debug for MessagingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessagingService")
            .field("channel_id", &self.channel_id)
            .field("partitions", &self.partitions)
            .field("clients", &self.clients.len())
            .field("default_priority", &self.default_priority())
            .finish()
    }
}
