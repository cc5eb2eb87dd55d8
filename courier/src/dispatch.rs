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

//! The statically built command registry and the dispatch pipeline.
//!
//! Handlers are registered explicitly at construction time under a
//! `(channel, entity type, action)` key; nothing is discovered by scanning
//! metadata at runtime.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tracing::{instrument, warn};

use courier_core::message::{Envelope, ServiceMessage};

use crate::transport::{BridgeListener, CommunicationContainer};

/// The dispatch key: channel, entity type and action, all lowercased.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommandKey {
    channel_id: String,
    entity_type: String,
    action: String,
}

impl CommandKey {
    /// Builds a key, lowercasing every component.
    #[must_use]
    pub fn new(
        channel_id: impl Into<String>,
        entity_type: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            channel_id: channel_id.into().to_lowercase(),
            entity_type: entity_type.into().to_lowercase(),
            action: action.into().to_lowercase(),
        }
    }

    /// The key addressed by an inbound message: its channel, message type
    /// and action type.
    #[must_use]
    pub fn from_message(message: &ServiceMessage) -> Self {
        Self::new(
            message.channel_id.as_deref().unwrap_or(""),
            message.message_type.as_deref().unwrap_or(""),
            message.action_type.as_deref().unwrap_or(""),
        )
    }
}

impl std::fmt::Display for CommandKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.channel_id, self.entity_type, self.action)
    }
}

type CommandFn = Arc<dyn Fn(Envelope) -> BoxFuture<'static, Vec<Envelope>> + Send + Sync>;

struct CommandHandler {
    action: CommandFn,
    executions: AtomicU64,
}

/// The statically built mapping from [`CommandKey`] to handler.
#[derive(Default)]
pub struct CommandRegistry {
    handlers: DashMap<CommandKey, CommandHandler>,
}

impl CommandRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler under `key`, replacing any previous registration.
    pub fn register<F, Fut>(&self, key: CommandKey, handler: F)
    where
        F: Fn(Envelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Vec<Envelope>> + Send + 'static,
    {
        self.handlers.insert(
            key,
            CommandHandler {
                action: Arc::new(move |envelope| Box::pin(handler(envelope))),
                executions: AtomicU64::new(0),
            },
        );
    }

    /// Whether a handler is registered under `key`.
    #[must_use]
    pub fn supports(&self, key: &CommandKey) -> bool {
        self.handlers.contains_key(key)
    }

    /// The number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// How many times the handler under `key` has executed.
    #[must_use]
    pub fn executions(&self, key: &CommandKey) -> Option<u64> {
        self.handlers
            .get(key)
            .map(|handler| handler.executions.load(Ordering::Relaxed))
    }

    /// Dispatches an inbound envelope to its handler and returns the
    /// outbound envelopes, or `None` when no handler matches.
    pub async fn process(&self, envelope: Envelope) -> Option<Vec<Envelope>> {
        let key = CommandKey::from_message(&envelope.message);
        let action = {
            let Some(handler) = self.handlers.get(&key) else {
                warn!(%key, "no handler registered for inbound message");
                return None;
            };
            handler.executions.fetch_add(1, Ordering::Relaxed);
            Arc::clone(&handler.action)
        };
        Some(action(envelope).await)
    }
}

impl std::fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

/// Wires a command registry to a communication container: inbound envelopes
/// run through their handler, and every resulting response is sent back out
/// through the container.
pub struct Dispatcher {
    registry: Arc<CommandRegistry>,
    container: Arc<CommunicationContainer>,
}

impl Dispatcher {
    /// Creates a dispatcher over a registry and a container.
    #[must_use]
    pub fn new(registry: Arc<CommandRegistry>, container: Arc<CommunicationContainer>) -> Self {
        Self {
            registry,
            container,
        }
    }

    /// Processes one inbound envelope end to end.
    #[instrument(skip(self, envelope), fields(message = %envelope.message.to_key()))]
    pub async fn process(&self, envelope: Envelope) {
        let Some(responses) = self.registry.process(envelope).await else {
            return;
        };
        for response in responses {
            if !self.container.send(response).await {
                warn!("response envelope could not be delivered");
            }
        }
    }

    /// Drains a bridge listener, processing each inbound envelope as its own
    /// task. The returned handle completes when the listener closes.
    pub fn attach(self: Arc<Self>, listener: Arc<BridgeListener>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(envelope) = listener.recv().await {
                let dispatcher = Arc::clone(&self);
                tokio::spawn(async move {
                    dispatcher.process(envelope).await;
                });
            }
        })
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .finish()
    }
}
