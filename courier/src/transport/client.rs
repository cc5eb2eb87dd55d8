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

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use courier_core::error::TransportError;

/// Configuration for one priority partition of a channel.
///
/// Each partition gets its own transport client, so independent message
/// streams on the same channel cannot starve one another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionConfig {
    /// The partition priority. Unique within a messaging service.
    pub priority: u32,
}

impl PartitionConfig {
    /// Creates a partition configuration for the given priority.
    #[must_use]
    pub const fn new(priority: u32) -> Self {
        Self { priority }
    }
}

/// The lifecycle contract a concrete transport client implements.
///
/// One implementation exists per transport flavor (TCP channel, in-process
/// bridge, queue fabric); the messaging service drives whichever was selected
/// at construction. All methods take `&self`: implementations keep their
/// connection state behind interior mutability so a holder can be stopped and
/// restarted in place during reset.
#[async_trait]
pub trait TransportClient: Send + Sync {
    /// Whether this client can run at all. A read-only sender with no
    /// source reports `false` and is skipped at service start.
    fn can_start(&self) -> bool {
        true
    }

    /// Prepares the underlying fabric (declares queues, resolves endpoints).
    /// Runs before `start` and again on every reset.
    async fn fabric_initialize(&self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Opens the connection.
    async fn start(&self) -> Result<(), TransportError>;

    /// Closes the connection. Called on service stop and at the head of a
    /// reset; must be safe to call on a client that never started.
    async fn stop(&self) -> Result<(), TransportError>;

    /// Reports the pending message count, when the transport can know it.
    fn queue_length(&self) -> Option<usize> {
        None
    }
}

/// Wraps one transport client with its partition identity and lifecycle
/// state. Exclusively owned by its messaging service.
pub struct ClientHolder {
    priority: u32,
    name: String,
    client_type: String,
    is_active: AtomicBool,
    client: Box<dyn TransportClient>,
}

impl ClientHolder {
    /// Creates a holder around a concrete transport client.
    #[must_use]
    pub fn new(
        priority: u32,
        name: impl Into<String>,
        client_type: impl Into<String>,
        client: Box<dyn TransportClient>,
    ) -> Self {
        Self {
            priority,
            name: name.into(),
            client_type: client_type.into(),
            is_active: AtomicBool::new(false),
            client,
        }
    }

    /// The partition priority this holder serves.
    #[must_use]
    pub fn priority(&self) -> u32 {
        self.priority
    }

    /// The holder name, derived from the channel id and priority.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The transport flavor, for logging.
    #[must_use]
    pub fn client_type(&self) -> &str {
        &self.client_type
    }

    /// Whether the client is currently started.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.is_active.load(Ordering::SeqCst)
    }

    /// Whether the underlying client can run at all.
    #[must_use]
    pub fn can_start(&self) -> bool {
        self.client.can_start()
    }

    /// The pending message count reported by the client, if known.
    #[must_use]
    pub fn queue_length(&self) -> Option<usize> {
        self.client.queue_length()
    }

    /// Access to the underlying transport client.
    #[must_use]
    pub fn client(&self) -> &dyn TransportClient {
        self.client.as_ref()
    }

    /// Initializes the fabric and starts the client.
    pub async fn start(&self) -> Result<(), TransportError> {
        self.client.fabric_initialize().await?;
        self.client.start().await?;
        self.is_active.store(true, Ordering::SeqCst);
        debug!(client = %self.name, client_type = %self.client_type, "client started");
        Ok(())
    }

    /// Stops the client. The holder is marked inactive even when the stop
    /// itself fails.
    pub async fn stop(&self) -> Result<(), TransportError> {
        self.is_active.store(false, Ordering::SeqCst);
        let stopped = self.client.stop().await;
        debug!(client = %self.name, ok = stopped.is_ok(), "client stopped");
        stopped
    }
}

impl std::fmt::Debug for ClientHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHolder")
            .field("priority", &self.priority)
            .field("name", &self.name)
            .field("client_type", &self.client_type)
            .field("is_active", &self.is_active())
            .finish()
    }
}

/// Creates the transport clients a messaging service supervises, one per
/// priority partition. The factory pins the transport flavor at construction.
pub trait ClientFactory: Send + Sync {
    /// The transport flavor this factory produces, for holder naming and
    /// logs.
    fn client_type(&self) -> &str;

    /// Creates the client for one partition of the channel.
    fn create(&self, channel_id: &str, partition: &PartitionConfig) -> Box<dyn TransportClient>;
}
