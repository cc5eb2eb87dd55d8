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

//! The persistence command engine.
//!
//! One engine serves one entity type on one channel. At construction it
//! registers a handler per action into the command registry; each inbound
//! envelope then runs the same pipeline: mirror a response envelope,
//! deserialize the typed request, drive the storage action through a bounded
//! retry loop, reclassify ambiguous timeouts through the correction hook,
//! write the audit record, redact faults, and emit the response — all
//! bracketed by resource profiling.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use courier_core::error::PersistenceError;
use courier_core::message::Envelope;

use crate::dispatch::{CommandKey, CommandRegistry};
use crate::persistence::{
    CacheManager, EntityTransform, EventSource, EventSourceEntry, NullCacheManager,
    OperationContext, PersistenceRetryPolicy, PersistenceStatistics, RepositoryRequest,
    RepositoryResponse, RequestHolder, ResourceProfiler, ResourceRequestResult,
    ResourceRetryReason, StorageProvider, StorageResponse,
};

/// One CRUD-family persistence action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PersistenceAction {
    /// Persist a new entity.
    Create,
    /// Read an entity by key.
    Read,
    /// Read an entity by reference tuple.
    ReadByRef,
    /// Replace an existing entity.
    Update,
    /// Delete an entity by key.
    Delete,
    /// Delete an entity by reference tuple.
    DeleteByRef,
    /// Read an entity's version by key.
    Version,
    /// Read an entity's version by reference tuple.
    VersionByRef,
    /// Placeholder; permanently answers 501.
    Search,
}

impl PersistenceAction {
    /// Every action the engine registers.
    pub const ALL: [Self; 9] = [
        Self::Create,
        Self::Read,
        Self::ReadByRef,
        Self::Update,
        Self::Delete,
        Self::DeleteByRef,
        Self::Version,
        Self::VersionByRef,
        Self::Search,
    ];

    /// The lowercase dispatch name of the action.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::ReadByRef => "readbyref",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::DeleteByRef => "deletebyref",
            Self::Version => "version",
            Self::VersionByRef => "versionbyref",
            Self::Search => "search",
        }
    }

    /// Whether a successful invocation of this action is written to the
    /// audit event source. Only state changes are.
    #[must_use]
    pub const fn logs_on_success(&self) -> bool {
        matches!(
            self,
            Self::Create | Self::Update | Self::Delete | Self::DeleteByRef
        )
    }

    /// Whether the timeout-correction hook applies to this action. Reads
    /// are repeatable, so only state changes need correction.
    #[must_use]
    pub const fn timeout_correctable(&self) -> bool {
        matches!(
            self,
            Self::Create | Self::Update | Self::Delete | Self::DeleteByRef
        )
    }
}

impl std::fmt::Display for PersistenceAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hook consulted when an invocation ends unsuccessfully after at least one
/// timeout. Returning `true` confirms the underlying write actually landed,
/// reclassifying the invocation as successful.
pub type TimeoutCorrection<K, E> =
    Arc<dyn for<'a> Fn(&'a RequestHolder<K, E>) -> BoxFuture<'a, bool> + Send + Sync>;

/// Hook run before each attempt. Returning `false` aborts the invocation
/// without running the action and without treating it as an error.
pub type Preaction<K, E> =
    Arc<dyn for<'a> Fn(&'a mut RequestHolder<K, E>) -> BoxFuture<'a, bool> + Send + Sync>;

/// The persistence command engine for one entity type on one channel.
pub struct PersistenceEngine<K, E> {
    channel_id: String,
    transform: EntityTransform<K, E>,
    storage: Arc<dyn StorageProvider<K, E>>,
    cache: Arc<dyn CacheManager<K, E>>,
    profiler: Option<Arc<dyn ResourceProfiler>>,
    event_source: Option<Arc<dyn EventSource<K, E>>>,
    retry_policy: PersistenceRetryPolicy,
    default_timeout: Duration,
    timeout_correction: Option<TimeoutCorrection<K, E>>,
    preaction: Option<Preaction<K, E>>,
    stats: Arc<PersistenceStatistics>,
}

impl<K, E> PersistenceEngine<K, E>
where
    K: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    E: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Creates an engine over the given storage collaborator with no cache,
    /// no profiler, no audit sink and the default retry policy. The default
    /// request timeout is ten seconds.
    #[must_use]
    pub fn new(
        channel_id: impl Into<String>,
        transform: EntityTransform<K, E>,
        storage: Arc<dyn StorageProvider<K, E>>,
    ) -> Self {
        Self {
            channel_id: channel_id.into().to_lowercase(),
            transform,
            storage,
            cache: Arc::new(NullCacheManager),
            profiler: None,
            event_source: None,
            retry_policy: PersistenceRetryPolicy::default(),
            default_timeout: Duration::from_secs(10),
            timeout_correction: None,
            preaction: None,
            stats: Arc::new(PersistenceStatistics::default()),
        }
    }

    /// Attaches a cache collaborator.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn CacheManager<K, E>>) -> Self {
        self.cache = cache;
        self
    }

    /// Attaches a resource profiler.
    #[must_use]
    pub fn with_profiler(mut self, profiler: Arc<dyn ResourceProfiler>) -> Self {
        self.profiler = Some(profiler);
        self
    }

    /// Attaches an audit event source.
    #[must_use]
    pub fn with_event_source(mut self, event_source: Arc<dyn EventSource<K, E>>) -> Self {
        self.event_source = Some(event_source);
        self
    }

    /// Overrides the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry_policy: PersistenceRetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Overrides the default request timeout.
    #[must_use]
    pub fn with_default_timeout(mut self, default_timeout: Duration) -> Self {
        self.default_timeout = default_timeout;
        self
    }

    /// Installs the timeout-correction hook. Without one, timed-out
    /// invocations are never reclassified.
    #[must_use]
    pub fn with_timeout_correction(mut self, correction: TimeoutCorrection<K, E>) -> Self {
        self.timeout_correction = Some(correction);
        self
    }

    /// Installs the preaction hook.
    #[must_use]
    pub fn with_preaction(mut self, preaction: Preaction<K, E>) -> Self {
        self.preaction = Some(preaction);
        self
    }

    /// The entity type this engine serves.
    #[must_use]
    pub fn entity_type(&self) -> &str {
        self.transform.entity_name()
    }

    /// The engine's running statistics.
    #[must_use]
    pub fn statistics(&self) -> Arc<PersistenceStatistics> {
        Arc::clone(&self.stats)
    }

    /// Registers one handler per action under
    /// `(channel, entity type, action)`.
    pub fn register(self: &Arc<Self>, registry: &CommandRegistry) {
        for action in PersistenceAction::ALL {
            let engine = Arc::clone(self);
            registry.register(
                CommandKey::new(&self.channel_id, self.entity_type(), action.as_str()),
                move |envelope| {
                    let engine = Arc::clone(&engine);
                    async move { engine.execute(action, envelope).await }
                },
            );
        }
    }

    /// Runs one inbound envelope through the pipeline and returns the
    /// outbound envelopes (empty for fire-and-forget requests).
    #[instrument(skip(self, envelope), fields(entity = %self.entity_type(), action = %action))]
    pub async fn execute(&self, action: PersistenceAction, envelope: Envelope) -> Vec<Envelope> {
        let profile_id = self.profile_start(&envelope);
        let mut holder = RequestHolder::new(profile_id, envelope);
        let mut outbound = Vec::new();

        self.execute_inner(action, &mut holder, &mut outbound).await;

        let result = holder.result.unwrap_or(ResourceRequestResult::Unknown);
        if result == ResourceRequestResult::Success {
            self.stats.success_increment();
        } else {
            self.stats.failure_increment();
        }
        // The profile always closes, whatever path the invocation took.
        self.profile_end(holder.profile_id, holder.start, result);

        outbound
    }

    async fn execute_inner(
        &self,
        action: PersistenceAction,
        holder: &mut RequestHolder<K, E>,
        outbound: &mut Vec<Envelope>,
    ) {
        let mut response = holder.envelope.to_response();

        match self.unpack_request(&holder.envelope) {
            Ok(rq) => holder.rq = rq,
            Err(err) => {
                error!(%err, "unable to deserialize persistence request");
                holder.envelope.signal_fail();
                holder.result = Some(ResourceRequestResult::Exception);
                response.message.status = Some(500);
                response.message.status_description = Some("invalid request payload".into());
                outbound.push(response);
                return;
            }
        }

        if holder.rq.timeout_ms.is_none() {
            holder.rq.timeout_ms = Some(self.default_timeout.as_millis() as u64);
        }

        let mut has_timed_out = false;
        let mut preaction_aborted = false;

        match self
            .run_retry_loop(action, holder, &mut has_timed_out, &mut preaction_aborted)
            .await
        {
            Ok(retry_exceeded) => {
                holder.envelope.signal(!retry_exceeded);
                if retry_exceeded {
                    error!(
                        cancelled = holder.envelope.cancellation().is_cancelled(),
                        retries = holder.rq.retry,
                        "retry limit exceeded"
                    );
                    holder.result = Some(ResourceRequestResult::RetryExceeded);
                }
            }
            Err(err) => {
                self.redact_error(action, holder, &err);
                holder.envelope.signal_fail();
                holder.result = Some(ResourceRequestResult::Exception);
            }
        }

        let mut audit_eligible =
            !preaction_aborted && action.logs_on_success() && holder.rs.is_success();

        // Timeouts are ambiguous: the write may have landed even though no
        // acknowledgment arrived. The correction hook gets the final word
        // before the invocation is reported as failed.
        if !holder.rs.is_success()
            && has_timed_out
            && holder.result != Some(ResourceRequestResult::Exception)
            && action.timeout_correctable()
        {
            if let Some(correction) = &self.timeout_correction {
                if correction(holder).await {
                    audit_eligible = true;
                    holder.result = Some(ResourceRequestResult::Success);
                    holder.rs.response_code = 200;
                    holder.rs.is_timeout = false;
                    info!("recovered timeout successfully");
                } else {
                    error!("timeout was not recovered");
                }
            }
        }

        if audit_eligible && holder.rs.settings.log_event_source {
            self.write_audit(action, holder).await;
        }

        self.pack_response(&mut response, holder);

        if holder.result.is_none() {
            holder.result = Some(ResourceRequestResult::Success);
        }

        // Fire-and-forget requests produce no response traffic.
        if !holder.rq.settings.process_async {
            outbound.push(response);
        }
    }

    /// Drives the storage action until it succeeds, the retry ceiling is
    /// passed, or cancellation is requested. Returns `Ok(true)` when the
    /// loop ended by exceeding retries.
    ///
    /// A retryable-but-not-timed-out result does not count against the
    /// ceiling, so a collaborator that keeps requesting retries can loop
    /// until the envelope's cancellation token ends it.
    async fn run_retry_loop(
        &self,
        action: PersistenceAction,
        holder: &mut RequestHolder<K, E>,
        has_timed_out: &mut bool,
        preaction_aborted: &mut bool,
    ) -> Result<bool, PersistenceError> {
        let maximum_retries = self.retry_policy.maximum_retries(&holder.envelope);

        loop {
            let attempt_start = Instant::now();
            // Discard any previous attempt's response.
            holder.rs = RepositoryResponse::default();

            if let Some(preaction) = &self.preaction {
                if !preaction(holder).await {
                    debug!("preaction declined the invocation");
                    *preaction_aborted = true;
                    return Ok(false);
                }
            }

            self.run_action(action, holder).await?;

            *has_timed_out |= holder.rs.is_timeout;

            if !holder.rs.is_timeout && !holder.rs.should_retry {
                return Ok(false);
            }

            let reason = if holder.rs.should_retry {
                ResourceRetryReason::Other
            } else {
                ResourceRetryReason::Timeout
            };
            self.profile_retry(holder.profile_id, attempt_start, reason);
            self.stats.retry_increment();
            info!(
                retry = holder.rq.retry,
                %reason,
                "storage action did not complete; scheduling retry"
            );

            holder.rq.is_retry = true;
            if !holder.rs.should_retry {
                holder.rq.retry += 1;
            }
            holder.rq.is_timeout = false;

            // Cancellation is only observed here, at the retry boundary; an
            // attempt already in flight is never interrupted.
            if holder.envelope.cancellation().is_cancelled() || holder.rq.retry > maximum_retries {
                return Ok(true);
            }
        }
    }

    /// Runs one attempt of the action, including its cache interaction.
    async fn run_action(
        &self,
        action: PersistenceAction,
        holder: &mut RequestHolder<K, E>,
    ) -> Result<(), PersistenceError> {
        let context = OperationContext {
            timeout: Duration::from_millis(
                holder.rq.timeout_ms.unwrap_or(self.default_timeout.as_millis() as u64),
            ),
            is_retry: holder.rq.is_retry,
            retry: holder.rq.retry,
        };

        match action {
            PersistenceAction::Create => {
                let entity = Self::required_entity(holder)?;
                let result = self.storage.create(entity, &context).await?;
                self.populate_cache(&result).await;
                self.process_output_entity(holder, result);
            }
            PersistenceAction::Read => {
                let key = Self::required_key(holder)?;
                let cached = if self.cache.is_active() && holder.rq.settings.use_cache {
                    self.cache
                        .read(&self.transform, &key)
                        .await
                        .filter(|hit| hit.is_success)
                } else {
                    None
                };
                let result = match cached {
                    Some(hit) => hit,
                    None => {
                        let result = self.storage.read(&key, &context).await?;
                        self.populate_cache(&result).await;
                        result
                    }
                };
                self.process_output_entity(holder, result);
            }
            PersistenceAction::ReadByRef => {
                let reference = Self::required_reference(holder)?;
                let cached = if self.cache.is_active() && holder.rq.settings.use_cache {
                    self.cache
                        .read_by_ref(&self.transform, &reference)
                        .await
                        .filter(|hit| hit.is_success)
                } else {
                    None
                };
                let result = match cached {
                    Some(hit) => hit,
                    None => {
                        let result = self.storage.read_by_ref(&reference, &context).await?;
                        self.populate_cache(&result).await;
                        result
                    }
                };
                self.process_output_entity(holder, result);
            }
            PersistenceAction::Update => {
                let entity = Self::required_entity(holder)?;
                let result = self.storage.update(entity, &context).await?;
                self.populate_cache(&result).await;
                self.process_output_entity(holder, result);
            }
            PersistenceAction::Delete => {
                let key = Self::required_key(holder)?;
                let result = self.storage.delete(&key, &context).await?;
                if self.cache.is_active() && !self.cache.is_read_only() && result.is_success {
                    self.cache.delete(&self.transform, &key).await;
                }
                self.process_output_key(holder, result);
            }
            PersistenceAction::DeleteByRef => {
                let reference = Self::required_reference(holder)?;
                let result = self.storage.delete_by_ref(&reference, &context).await?;
                if self.cache.is_active() && !self.cache.is_read_only() && result.is_success {
                    // Invalidate through the key the storage reported.
                    if let Some(key) = result
                        .id
                        .as_deref()
                        .and_then(|id| self.transform.key_from_string(id))
                    {
                        self.cache.delete(&self.transform, &key).await;
                    }
                }
                self.process_output_key(holder, result);
            }
            PersistenceAction::Version => {
                let key = Self::required_key(holder)?;
                let cached = if self.cache.is_active() {
                    self.cache
                        .version_read(&self.transform, &key)
                        .await
                        .filter(|hit| hit.is_success)
                } else {
                    None
                };
                let result = match cached {
                    Some(hit) => hit,
                    None => self.storage.version(&key, &context).await?,
                };
                self.process_output_key(holder, result);
            }
            PersistenceAction::VersionByRef => {
                let reference = Self::required_reference(holder)?;
                let cached = if self.cache.is_active() {
                    self.cache
                        .version_read_by_ref(&self.transform, &reference)
                        .await
                        .filter(|hit| hit.is_success)
                } else {
                    None
                };
                let result = match cached {
                    Some(hit) => hit,
                    None => self.storage.version_by_ref(&reference, &context).await?,
                };
                self.process_output_key(holder, result);
            }
            PersistenceAction::Search => {
                holder.rs.response_code = 501;
                holder.rs.response_message = Some("Not implemented.".into());
            }
        }

        Ok(())
    }

    /// Write-through population after a successful storage result.
    async fn populate_cache(&self, result: &StorageResponse<E>) {
        if self.cache.is_active() && !self.cache.is_read_only() && result.is_success {
            if let Some(entity) = &result.entity {
                self.cache.write(&self.transform, entity).await;
            }
        }
    }

    fn required_key(holder: &RequestHolder<K, E>) -> Result<K, PersistenceError> {
        holder
            .rq
            .key
            .clone()
            .ok_or_else(|| PersistenceError::MissingField("key".into()))
    }

    fn required_entity(holder: &RequestHolder<K, E>) -> Result<E, PersistenceError> {
        holder
            .rq
            .entity
            .clone()
            .ok_or_else(|| PersistenceError::MissingField("entity".into()))
    }

    fn required_reference(
        holder: &RequestHolder<K, E>,
    ) -> Result<(String, String), PersistenceError> {
        holder
            .rq
            .key_reference
            .clone()
            .ok_or_else(|| PersistenceError::MissingField("key_reference".into()))
    }

    /// Folds an entity-shaped storage result into the response.
    fn process_output_entity(&self, holder: &mut RequestHolder<K, E>, result: StorageResponse<E>) {
        holder.rs.response_code = result.status_code;
        holder.rs.should_retry = result.should_retry;

        if result.is_success {
            if let Some(entity) = result.entity {
                let key = self.transform.key_for(&entity);
                let version = self.transform.version().version_of(&entity);
                holder.rs.settings.version_id = version.clone();
                holder.rs.key_reference = Some((
                    self.transform.key_to_string(&key),
                    version.unwrap_or_default(),
                ));
                holder.rs.key = Some(key);
                holder.rs.entity = Some(entity);
            }
        } else {
            self.process_output_error(holder, &result);
        }
    }

    /// Folds a key-shaped storage result (delete/version) into the
    /// response.
    fn process_output_key(&self, holder: &mut RequestHolder<K, E>, result: StorageResponse<E>) {
        holder.rs.key = holder.rq.key.clone();
        holder.rs.response_code = result.status_code;
        holder.rs.should_retry = result.should_retry;

        if result.is_success {
            holder.rs.settings.version_id = result.version_id.clone();
            let id = result
                .id
                .clone()
                .or_else(|| {
                    holder
                        .rs
                        .key
                        .as_ref()
                        .map(|key| self.transform.key_to_string(key))
                })
                .unwrap_or_default();
            holder.rs.key_reference = Some((id, result.version_id.unwrap_or_default()));
        } else {
            holder.rs.is_timeout = result.is_timeout;
        }
    }

    fn process_output_error(&self, holder: &mut RequestHolder<K, E>, result: &StorageResponse<E>) {
        match (&result.error, result.is_timeout) {
            (Some(error), false) => {
                error!(entity = self.entity_type(), code = result.status_code, %error, "error in persistence")
            }
            (Some(error), true) => {
                warn!(entity = self.entity_type(), code = result.status_code, %error, "timeout in persistence")
            }
            (None, true) => {
                warn!(
                    entity = self.entity_type(),
                    code = result.status_code,
                    "timeout in persistence"
                )
            }
            (None, false) => {
                debug!(
                    entity = self.entity_type(),
                    code = result.status_code,
                    "persistence action reported failure"
                )
            }
        }
        holder.rs.is_timeout = result.is_timeout;
    }

    fn unpack_request(
        &self,
        envelope: &Envelope,
    ) -> Result<RepositoryRequest<K, E>, PersistenceError> {
        if let Some(object) = envelope.message_object::<RepositoryRequest<K, E>>() {
            return Ok((*object).clone());
        }
        if envelope.message.blob.is_empty() {
            return Err(PersistenceError::MalformedRequest("empty request body".into()));
        }
        Ok(serde_json::from_slice(&envelope.message.blob)?)
    }

    /// Serializes the repository response into the outbound envelope. The
    /// envelope status reflects the pipeline (200 = processed); the
    /// operation's own status travels in the body.
    fn pack_response(&self, response: &mut Envelope, holder: &RequestHolder<K, E>) {
        match serde_json::to_vec(&holder.rs) {
            Ok(blob) => {
                response.message.blob = blob;
                response.message.status = Some(200);
                response.attach_object(Arc::new(holder.rs.clone()));
            }
            Err(err) => {
                error!(%err, "unable to serialize persistence response");
                response.message.status = Some(500);
                response.message.status_description =
                    Some("response serialization failure".into());
            }
        }
    }

    /// Redacts a pipeline fault: the caller gets a tracker string with a
    /// fresh correlation id; the fault itself stays in local logs.
    fn redact_error(
        &self,
        action: PersistenceAction,
        holder: &mut RequestHolder<K, E>,
        err: &PersistenceError,
    ) {
        let tracker = Uuid::new_v4();
        let originator = holder
            .envelope
            .message
            .originator_key
            .clone()
            .unwrap_or_default();
        error!(
            %err,
            %tracker,
            cancelled = holder.envelope.cancellation().is_cancelled(),
            "error processing persistence request"
        );
        holder.rs.response_message =
            Some(format!("Exception tracker {action}/{originator}/{tracker}"));
        holder.rs.response_code = 500;
    }

    /// Best-effort audit write; a failure is logged and swallowed.
    async fn write_audit(&self, action: PersistenceAction, holder: &RequestHolder<K, E>) {
        let Some(event_source) = &self.event_source else {
            return;
        };
        let entry = EventSourceEntry {
            entity_type: self.entity_type().to_string(),
            event_type: action.as_str().to_string(),
            entity: holder.rs.entity.clone(),
            entity_key: holder.rs.key.clone(),
            batch_id: holder.rq.settings.batch_id.clone(),
            correlation_id: holder.rq.settings.correlation_id.clone(),
            entity_version: holder.rs.settings.version_id.clone(),
            entity_version_old: holder.rq.settings.version_id.clone(),
        };
        let originator = holder
            .envelope
            .message
            .originator_key
            .clone()
            .unwrap_or_default();
        if let Err(err) = event_source.write(&originator, entry, true).await {
            error!(
                entity = self.entity_type(),
                %action,
                %err,
                "audit write failed"
            );
        }
    }

    fn profile_start(&self, envelope: &Envelope) -> Uuid {
        match &self.profiler {
            Some(profiler) => profiler.start(&envelope.message.to_key(), envelope.id),
            None => Uuid::new_v4(),
        }
    }

    fn profile_end(&self, profile_id: Uuid, start: Instant, result: ResourceRequestResult) {
        if let Some(profiler) = &self.profiler {
            profiler.end(profile_id, start, result);
        }
    }

    fn profile_retry(&self, profile_id: Uuid, attempt_start: Instant, reason: ResourceRetryReason) {
        if let Some(profiler) = &self.profiler {
            profiler.retry(profile_id, attempt_start, reason);
        }
    }
}

impl<K, E> std::fmt::Debug for PersistenceEngine<K, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceEngine")
            .field("channel_id", &self.channel_id)
            .field("entity_type", &self.transform.entity_name())
            .finish()
    }
}
