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

#![forbid(unsafe_code)]

//! # Courier
//!
//! Courier is a message-driven microservice runtime. Components communicate
//! by exchanging envelopes over pluggable transports, and a persistence
//! command engine turns inbound envelopes into entity operations with retry,
//! timeout correction, cache coherence and audit logging.
//!
//! ## Key Concepts
//!
//! - **Envelope**: the routed message unit, carrying correlation, cancellation
//!   and fabric-level completion signalling (from `courier-core`).
//! - **Messaging service ([`MessagingService`](transport::MessagingService))**:
//!   supervises one transport client per priority partition, with
//!   reset-with-backoff recovery.
//! - **Communication container
//!   ([`CommunicationContainer`](transport::CommunicationContainer))**:
//!   resolves outbound envelopes to the senders that support their channel and
//!   fans the send out concurrently.
//! - **Bridge agent ([`BridgeAgent`](transport::BridgeAgent))**: an in-process
//!   transport simulator pairing listeners and senders without a network, in
//!   round-robin or broadcast mode.
//! - **Persistence engine ([`PersistenceEngine`](persistence::PersistenceEngine))**:
//!   executes create/read/update/delete/version actions against a storage
//!   collaborator inside a bounded retry loop with timeout reclassification,
//!   resource profiling and best-effort audit.
//! - **Dispatch ([`CommandRegistry`](dispatch::CommandRegistry) /
//!   [`Dispatcher`](dispatch::Dispatcher))**: a statically built mapping from
//!   (channel, entity type, action) to handler, wired between listeners and
//!   the container.

/// Runtime configuration.
pub(crate) mod common;

/// The statically built command registry and the dispatch pipeline.
pub mod dispatch;

/// The persistence command engine and its collaborator contracts.
pub mod persistence;

/// Client supervision, the communication container, the bridge agent and the
/// TCP channel transport.
pub mod transport;

pub use common::config;

/// A prelude module for conveniently importing the most commonly used items.
pub mod prelude {
    pub use async_trait::async_trait;

    pub use courier_core::prelude::*;

    pub use crate::common::config::{ChannelConfig, CourierConfig};
    pub use crate::dispatch::{CommandKey, CommandRegistry, Dispatcher};
    pub use crate::persistence::{
        CacheManager, EntityTransform, EventSource, EventSourceEntry, MemoryCacheManager,
        MemoryStorageProvider, NullCacheManager, OperationContext, PersistenceAction,
        PersistenceEngine, PersistenceRetryPolicy, PersistenceStatistics, Preaction,
        RepositoryRequest, RepositoryResponse, RepositorySettings, RequestHolder,
        ResourceProfiler, ResourceRequestResult, ResourceRetryReason, StorageProvider,
        StorageResponse, TimeoutCorrection, VersionPolicy,
    };
    pub use crate::transport::{
        BridgeAgent, BridgeListener, BridgeMode, BridgeSender, ClientFactory, ClientHolder,
        CommunicationContainer, MessagingService, PartitionConfig, TcpChannelClient,
        TcpChannelListener, TcpChannelSender, TransportClient,
    };
}
