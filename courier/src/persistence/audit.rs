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

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use courier_core::error::PersistenceError;

/// One audit record describing a successful state-changing action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSourceEntry<K, E> {
    /// The entity type the action touched.
    pub entity_type: String,
    /// The action performed, e.g. `create` or `delete`.
    pub event_type: String,
    /// The resulting entity, when the action produced one.
    pub entity: Option<E>,
    /// The entity key.
    pub entity_key: Option<K>,
    /// Batch id carried over from the request settings.
    pub batch_id: Option<String>,
    /// Correlation id carried over from the request settings.
    pub correlation_id: Option<String>,
    /// The entity version after the action.
    pub entity_version: Option<String>,
    /// The entity version the request was issued against.
    pub entity_version_old: Option<String>,
}

/// The audit collaborator.
///
/// Writes are best-effort: the engine logs a failed write and moves on, so a
/// broken audit sink can never fail a persistence invocation.
#[async_trait]
pub trait EventSource<K, E>: Send + Sync {
    /// Writes one audit record on behalf of `originator_key`. `sync` asks
    /// the sink to confirm durability before returning.
    async fn write(
        &self,
        originator_key: &str,
        entry: EventSourceEntry<K, E>,
        sync: bool,
    ) -> Result<(), PersistenceError>;
}
