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

//! The repository request/response wire types and the per-invocation holder
//! the engine threads through the retry loop.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use courier_core::message::Envelope;

use crate::persistence::ResourceRequestResult;

/// Caller-controlled settings carried on a repository request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositorySettings {
    /// Whether reads may be served from the cache.
    pub use_cache: bool,
    /// Fire-and-forget: suppress the response envelope on success.
    pub process_async: bool,
    /// Whether a successful state change should be written to the audit
    /// event source.
    pub log_event_source: bool,
    /// Caller correlation id, carried into audit records.
    pub correlation_id: Option<String>,
    /// Batch id, carried into audit records.
    pub batch_id: Option<String>,
    /// The entity version the request was issued against (or, on a
    /// response, the resulting version).
    pub version_id: Option<String>,
    /// Free-form source tag.
    pub source: Option<String>,
}

impl Default for RepositorySettings {
    fn default() -> Self {
        Self {
            use_cache: true,
            process_async: false,
            log_event_source: true,
            correlation_id: None,
            batch_id: None,
            version_id: None,
            source: None,
        }
    }
}

/// A typed repository request, deserialized from the envelope blob (or
/// taken from the envelope's in-memory object form).
///
/// The retry-state fields are engine-internal and never travel on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(
    serialize = "K: Serialize, E: Serialize",
    deserialize = "K: serde::Deserialize<'de>, E: serde::Deserialize<'de>"
))]
pub struct RepositoryRequest<K, E> {
    /// The entity key, for key-shaped actions.
    #[serde(default)]
    pub key: Option<K>,
    /// The reference tuple, for by-reference actions.
    #[serde(default)]
    pub key_reference: Option<(String, String)>,
    /// The entity, for create/update.
    #[serde(default)]
    pub entity: Option<E>,
    /// Caller settings.
    #[serde(default)]
    pub settings: RepositorySettings,
    /// Request timeout in milliseconds; defaulted by the engine when unset.
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Whether any attempt has been retried.
    #[serde(skip)]
    pub is_retry: bool,
    /// Ceiling-counted retries so far.
    #[serde(skip)]
    pub retry: u32,
    /// Scratch timeout marker, reset at each retry boundary.
    #[serde(skip)]
    pub is_timeout: bool,
}

impl<K, E> Default for RepositoryRequest<K, E> {
    fn default() -> Self {
        Self {
            key: None,
            key_reference: None,
            entity: None,
            settings: RepositorySettings::default(),
            timeout_ms: None,
            is_retry: false,
            retry: 0,
            is_timeout: false,
        }
    }
}

impl<K, E> RepositoryRequest<K, E> {
    /// A request addressing an entity by key.
    #[must_use]
    pub fn for_key(key: K) -> Self {
        Self {
            key: Some(key),
            ..Self::default()
        }
    }

    /// A request carrying an entity body (create/update).
    #[must_use]
    pub fn for_entity(entity: E) -> Self {
        Self {
            entity: Some(entity),
            ..Self::default()
        }
    }

    /// A request addressing an entity by reference tuple.
    #[must_use]
    pub fn for_reference(reference_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key_reference: Some((reference_type.into(), value.into())),
            ..Self::default()
        }
    }

    /// Replaces the settings.
    #[must_use]
    pub fn with_settings(mut self, settings: RepositorySettings) -> Self {
        self.settings = settings;
        self
    }
}

/// The typed repository response serialized into the response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(
    serialize = "K: Serialize, E: Serialize",
    deserialize = "K: serde::Deserialize<'de>, E: serde::Deserialize<'de>"
))]
pub struct RepositoryResponse<K, E> {
    /// HTTP-style status of the operation (distinct from the envelope's
    /// transport-level status).
    #[serde(default)]
    pub response_code: u16,
    /// Short, non-sensitive description of the outcome.
    #[serde(default)]
    pub response_message: Option<String>,
    /// The entity key.
    #[serde(default)]
    pub key: Option<K>,
    /// The `(key, version)` reference of the result.
    #[serde(default)]
    pub key_reference: Option<(String, String)>,
    /// The resulting entity, for entity-shaped actions.
    #[serde(default)]
    pub entity: Option<E>,
    /// Settings echoed back with the resulting version id.
    #[serde(default)]
    pub settings: RepositorySettings,
    /// Whether the final attempt timed out.
    #[serde(default)]
    pub is_timeout: bool,

    /// Collaborator-requested retry marker; engine-internal.
    #[serde(skip)]
    pub should_retry: bool,
}

impl<K, E> Default for RepositoryResponse<K, E> {
    fn default() -> Self {
        Self {
            response_code: 0,
            response_message: None,
            key: None,
            key_reference: None,
            entity: None,
            settings: RepositorySettings::default(),
            is_timeout: false,
            should_retry: false,
        }
    }
}

impl<K, E> RepositoryResponse<K, E> {
    /// Whether the operation succeeded (2xx).
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.response_code)
    }
}

/// Per-invocation state threaded through the retry loop. Created once per
/// inbound envelope, mutated across retry iterations, discarded after the
/// response is emitted; never shared across invocations.
pub struct RequestHolder<K, E> {
    /// The resource-profiling correlation id.
    pub profile_id: Uuid,
    /// The inbound envelope.
    pub envelope: Envelope,
    /// The deserialized request plus retry state.
    pub rq: RepositoryRequest<K, E>,
    /// The response under construction; recreated at each retry iteration.
    pub rs: RepositoryResponse<K, E>,
    /// When the invocation entered the engine.
    pub start: Instant,
    /// Terminal classification, set as the invocation resolves.
    pub result: Option<ResourceRequestResult>,
}

impl<K, E> RequestHolder<K, E> {
    /// Creates the holder for one inbound envelope.
    #[must_use]
    pub fn new(profile_id: Uuid, envelope: Envelope) -> Self {
        Self {
            profile_id,
            envelope,
            rq: RepositoryRequest::default(),
            rs: RepositoryResponse::default(),
            start: Instant::now(),
            result: None,
        }
    }
}
