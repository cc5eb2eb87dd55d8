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

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use courier::prelude::*;

use crate::setup::initialize_tracing;

mod setup;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Widget {
    id: u64,
    label: String,
    revision: u32,
}

fn widget(id: u64) -> Widget {
    Widget {
        id,
        label: format!("widget-{id}"),
        revision: 1,
    }
}

fn transform() -> EntityTransform<u64, Widget> {
    EntityTransform::new("widget", |w: &Widget| w.id)
        .with_key_deserializer(|raw| raw.parse().ok())
        .with_reference_maker(|w: &Widget| vec![("label".to_string(), w.label.clone())])
        .with_version_policy(VersionPolicy::new(|w: &Widget| w.revision.to_string()))
}

fn request_envelope(action: &str, request: &RepositoryRequest<u64, Widget>) -> Envelope {
    let mut message = ServiceMessage::new("widgets", "widget", action);
    message.originator_key = Some("client-7".into());
    message.correlation_key = Some("corr-1".into());
    message.response_channel_id = Some("widgets-response".into());
    message.response_channel_priority = 1;
    message.response_message_type = Some("widget".into());
    message.response_action_type = Some(action.into());
    let mut envelope = Envelope::new(message);
    envelope.pack(request).unwrap();
    envelope
}

fn response_body(envelope: &Envelope) -> RepositoryResponse<u64, Widget> {
    envelope.unpack().unwrap()
}

/// Storage that times out on every create, counting attempts.
#[derive(Default)]
struct TimeoutStorage {
    attempts: AtomicU32,
}

#[async_trait]
impl StorageProvider<u64, Widget> for TimeoutStorage {
    async fn create(
        &self,
        _entity: Widget,
        _context: &OperationContext,
    ) -> Result<StorageResponse<Widget>, PersistenceError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Ok(StorageResponse::timeout())
    }
}

/// Storage that faults outright on create.
struct FaultyStorage;

#[async_trait]
impl StorageProvider<u64, Widget> for FaultyStorage {
    async fn create(
        &self,
        _entity: Widget,
        _context: &OperationContext,
    ) -> Result<StorageResponse<Widget>, PersistenceError> {
        Err(PersistenceError::Storage("database exploded".into()))
    }
}

/// Storage that requests a scripted number of non-timeout retries before
/// succeeding.
struct RetryThenSucceed {
    remaining: AtomicU32,
    attempts: AtomicU32,
}

impl RetryThenSucceed {
    fn after(retries: u32) -> Self {
        Self {
            remaining: AtomicU32::new(retries),
            attempts: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl StorageProvider<u64, Widget> for RetryThenSucceed {
    async fn create(
        &self,
        entity: Widget,
        _context: &OperationContext,
    ) -> Result<StorageResponse<Widget>, PersistenceError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.remaining.load(Ordering::SeqCst) > 0 {
            self.remaining.fetch_sub(1, Ordering::SeqCst);
            return Ok(StorageResponse::retry_requested());
        }
        Ok(StorageResponse::success(entity))
    }
}

/// Delegates to an in-memory provider while counting storage reads, to
/// prove cache hits never touch storage.
struct CountingStorage {
    inner: MemoryStorageProvider<u64, Widget>,
    reads: AtomicU32,
}

impl CountingStorage {
    fn new() -> Self {
        Self {
            inner: MemoryStorageProvider::new(transform()),
            reads: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl StorageProvider<u64, Widget> for CountingStorage {
    async fn create(
        &self,
        entity: Widget,
        context: &OperationContext,
    ) -> Result<StorageResponse<Widget>, PersistenceError> {
        self.inner.create(entity, context).await
    }

    async fn read(
        &self,
        key: &u64,
        context: &OperationContext,
    ) -> Result<StorageResponse<Widget>, PersistenceError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.read(key, context).await
    }

    async fn delete(
        &self,
        key: &u64,
        context: &OperationContext,
    ) -> Result<StorageResponse<Widget>, PersistenceError> {
        self.inner.delete(key, context).await
    }
}

/// Records profile lifecycle calls for assertions.
#[derive(Default)]
struct RecordingProfiler {
    ends: Mutex<Vec<ResourceRequestResult>>,
    retries: AtomicU32,
}

impl RecordingProfiler {
    fn final_result(&self) -> Option<ResourceRequestResult> {
        self.ends.lock().unwrap().last().copied()
    }
}

impl ResourceProfiler for RecordingProfiler {
    fn start(&self, _key: &str, envelope_id: Uuid) -> Uuid {
        envelope_id
    }

    fn end(&self, _profile_id: Uuid, _start: Instant, result: ResourceRequestResult) {
        self.ends.lock().unwrap().push(result);
    }

    fn retry(&self, _profile_id: Uuid, _attempt_start: Instant, _reason: ResourceRetryReason) {
        self.retries.fetch_add(1, Ordering::SeqCst);
    }
}

/// Records audit entries.
#[derive(Default)]
struct RecordingEventSource {
    entries: Mutex<Vec<EventSourceEntry<u64, Widget>>>,
}

#[async_trait]
impl EventSource<u64, Widget> for RecordingEventSource {
    async fn write(
        &self,
        _originator_key: &str,
        entry: EventSourceEntry<u64, Widget>,
        _sync: bool,
    ) -> Result<(), PersistenceError> {
        self.entries.lock().unwrap().push(entry);
        Ok(())
    }
}

/// An audit sink that always fails.
struct FailingEventSource;

#[async_trait]
impl EventSource<u64, Widget> for FailingEventSource {
    async fn write(
        &self,
        _originator_key: &str,
        _entry: EventSourceEntry<u64, Widget>,
        _sync: bool,
    ) -> Result<(), PersistenceError> {
        Err(PersistenceError::Audit("sink down".into()))
    }
}

fn confirm_recovered<'a>(_holder: &'a RequestHolder<u64, Widget>) -> BoxFuture<'a, bool> {
    Box::pin(async { true })
}

fn decline_invocation<'a>(_holder: &'a mut RequestHolder<u64, Widget>) -> BoxFuture<'a, bool> {
    Box::pin(async { false })
}

fn signal_capture(envelope: &Envelope) -> Arc<Mutex<Option<bool>>> {
    let slot = Arc::new(Mutex::new(None));
    let captured = Arc::clone(&slot);
    envelope.on_completion(move |success| {
        *captured.lock().unwrap() = Some(success);
    });
    slot
}

/// Retry ceiling: a storage action that always times out runs exactly
/// `max_retries + 1` attempts and classifies as retry-exceeded, with the
/// failure reflected in the response body and a requeue signal to the
/// fabric.
#[tokio::test]
async fn retry_ceiling_runs_max_plus_one_attempts() -> anyhow::Result<()> {
    initialize_tracing();
    let storage = Arc::new(TimeoutStorage::default());
    let profiler = Arc::new(RecordingProfiler::default());
    let engine = PersistenceEngine::new("widgets", transform(), storage.clone())
        .with_retry_policy(PersistenceRetryPolicy::new(2, 2))
        .with_profiler(profiler.clone());

    let envelope = request_envelope("create", &RepositoryRequest::for_entity(widget(1)));
    let signal = signal_capture(&envelope);
    let outbound = engine.execute(PersistenceAction::Create, envelope).await;

    assert_eq!(storage.attempts.load(Ordering::SeqCst), 3);
    assert_eq!(
        profiler.final_result(),
        Some(ResourceRequestResult::RetryExceeded)
    );
    assert_eq!(profiler.retries.load(Ordering::SeqCst), 3);
    assert_eq!(*signal.lock().unwrap(), Some(false));

    let body = response_body(&outbound[0]);
    assert!(!body.is_success());
    assert_eq!(body.response_code, 408);
    assert!(body.is_timeout);
    // The envelope itself was processed; the failure travels in the body.
    assert_eq!(outbound[0].message.status, Some(200));
    Ok(())
}

/// Timeout correction: when the hook confirms the write landed, the
/// invocation is reclassified as a success instead of an error.
#[tokio::test]
async fn confirmed_timeout_correction_recovers_the_invocation() -> anyhow::Result<()> {
    initialize_tracing();
    let storage = Arc::new(TimeoutStorage::default());
    let profiler = Arc::new(RecordingProfiler::default());
    let engine = PersistenceEngine::new("widgets", transform(), storage)
        .with_retry_policy(PersistenceRetryPolicy::new(0, 0))
        .with_profiler(profiler.clone())
        .with_timeout_correction(Arc::new(confirm_recovered));

    let envelope = request_envelope("create", &RepositoryRequest::for_entity(widget(1)));
    let outbound = engine.execute(PersistenceAction::Create, envelope).await;

    assert_eq!(profiler.final_result(), Some(ResourceRequestResult::Success));
    let body = response_body(&outbound[0]);
    assert!(body.is_success());
    assert_eq!(body.response_code, 200);
    assert_eq!(engine.statistics().snapshot().successes, 1);
    Ok(())
}

/// Error redaction: a faulting storage action never leaks its text to the
/// caller. The response carries a tracker string with the action name, the
/// originator key and a fresh correlation id, and a 500 code.
#[tokio::test]
async fn storage_faults_are_redacted_with_a_tracker_id() -> anyhow::Result<()> {
    initialize_tracing();
    let profiler = Arc::new(RecordingProfiler::default());
    let engine = PersistenceEngine::new("widgets", transform(), Arc::new(FaultyStorage))
        .with_profiler(profiler.clone());

    let envelope = request_envelope("create", &RepositoryRequest::for_entity(widget(1)));
    let signal = signal_capture(&envelope);
    let outbound = engine.execute(PersistenceAction::Create, envelope).await;

    let body = response_body(&outbound[0]);
    assert_eq!(body.response_code, 500);
    let message = body.response_message.unwrap();
    assert!(!message.contains("database exploded"));
    assert!(message.starts_with("Exception tracker create/client-7/"));
    let tracker = message.rsplit('/').next().unwrap();
    assert!(Uuid::parse_str(tracker).is_ok());

    assert_eq!(*signal.lock().unwrap(), Some(false));
    assert_eq!(
        profiler.final_result(),
        Some(ResourceRequestResult::Exception)
    );
    Ok(())
}

/// Cache coherence: after a successful create, a cache-enabled read is
/// served from the cache without touching storage.
#[tokio::test]
async fn reads_after_create_are_served_from_the_cache() -> anyhow::Result<()> {
    initialize_tracing();
    let storage = Arc::new(CountingStorage::new());
    let engine = PersistenceEngine::new("widgets", transform(), storage.clone())
        .with_cache(Arc::new(MemoryCacheManager::new()));

    let created = engine
        .execute(
            PersistenceAction::Create,
            request_envelope("create", &RepositoryRequest::for_entity(widget(1))),
        )
        .await;
    assert!(response_body(&created[0]).is_success());

    let read = engine
        .execute(
            PersistenceAction::Read,
            request_envelope("read", &RepositoryRequest::for_key(1)),
        )
        .await;
    let body = response_body(&read[0]);
    assert!(body.is_success());
    assert_eq!(body.entity, Some(widget(1)));
    assert_eq!(storage.reads.load(Ordering::SeqCst), 0);
    Ok(())
}

/// A request that disables cache use goes straight to storage.
#[tokio::test]
async fn cache_disabled_requests_fall_through_to_storage() -> anyhow::Result<()> {
    initialize_tracing();
    let storage = Arc::new(CountingStorage::new());
    let engine = PersistenceEngine::new("widgets", transform(), storage.clone())
        .with_cache(Arc::new(MemoryCacheManager::new()));

    engine
        .execute(
            PersistenceAction::Create,
            request_envelope("create", &RepositoryRequest::for_entity(widget(1))),
        )
        .await;

    let mut request = RepositoryRequest::for_key(1);
    request.settings.use_cache = false;
    let read = engine
        .execute(
            PersistenceAction::Read,
            request_envelope("read", &request),
        )
        .await;

    assert!(response_body(&read[0]).is_success());
    assert_eq!(storage.reads.load(Ordering::SeqCst), 1);
    Ok(())
}

/// Async suppression: a fire-and-forget request appends no response
/// envelope even though the action ran.
#[tokio::test]
async fn process_async_requests_suppress_the_response() -> anyhow::Result<()> {
    initialize_tracing();
    let storage = Arc::new(MemoryStorageProvider::new(transform()));
    let engine = PersistenceEngine::new("widgets", transform(), storage.clone());

    let mut request = RepositoryRequest::for_entity(widget(1));
    request.settings.process_async = true;
    let outbound = engine
        .execute(
            PersistenceAction::Create,
            request_envelope("create", &request),
        )
        .await;

    assert!(outbound.is_empty());
    assert_eq!(storage.len(), 1);
    Ok(())
}

/// Search is a placeholder that always answers 501.
#[tokio::test]
async fn search_always_answers_not_implemented() -> anyhow::Result<()> {
    initialize_tracing();
    let engine = PersistenceEngine::new(
        "widgets",
        transform(),
        Arc::new(MemoryStorageProvider::new(transform())),
    );

    let outbound = engine
        .execute(
            PersistenceAction::Search,
            request_envelope("search", &RepositoryRequest::for_key(1)),
        )
        .await;

    let body = response_body(&outbound[0]);
    assert_eq!(body.response_code, 501);
    assert_eq!(body.response_message.as_deref(), Some("Not implemented."));
    Ok(())
}

/// Retryable-but-not-timed-out results do not count against the ceiling:
/// with a ceiling of zero, two requested retries still reach success.
#[tokio::test]
async fn requested_retries_do_not_count_against_the_ceiling() -> anyhow::Result<()> {
    initialize_tracing();
    let storage = Arc::new(RetryThenSucceed::after(2));
    let engine = PersistenceEngine::new("widgets", transform(), storage.clone())
        .with_retry_policy(PersistenceRetryPolicy::new(0, 0));

    let outbound = engine
        .execute(
            PersistenceAction::Create,
            request_envelope("create", &RepositoryRequest::for_entity(widget(1))),
        )
        .await;

    assert_eq!(storage.attempts.load(Ordering::SeqCst), 3);
    assert!(response_body(&outbound[0]).is_success());
    assert_eq!(engine.statistics().snapshot().retries, 2);
    Ok(())
}

/// A preaction that declines aborts the invocation without running the
/// action and without treating it as an error.
#[tokio::test]
async fn declined_preaction_aborts_without_error() -> anyhow::Result<()> {
    initialize_tracing();
    let storage = Arc::new(TimeoutStorage::default());
    let profiler = Arc::new(RecordingProfiler::default());
    let engine = PersistenceEngine::new("widgets", transform(), storage.clone())
        .with_profiler(profiler.clone())
        .with_preaction(Arc::new(decline_invocation));

    let envelope = request_envelope("create", &RepositoryRequest::for_entity(widget(1)));
    let signal = signal_capture(&envelope);
    let outbound = engine.execute(PersistenceAction::Create, envelope).await;

    assert_eq!(storage.attempts.load(Ordering::SeqCst), 0);
    assert_eq!(*signal.lock().unwrap(), Some(true));
    assert_eq!(profiler.final_result(), Some(ResourceRequestResult::Success));
    assert!(!response_body(&outbound[0]).is_success());
    Ok(())
}

/// Successful state changes are written to the audit event source; reads
/// are not.
#[tokio::test]
async fn audit_records_state_changes_only() -> anyhow::Result<()> {
    initialize_tracing();
    let audit = Arc::new(RecordingEventSource::default());
    let engine = PersistenceEngine::new(
        "widgets",
        transform(),
        Arc::new(MemoryStorageProvider::new(transform())),
    )
    .with_event_source(audit.clone());

    engine
        .execute(
            PersistenceAction::Create,
            request_envelope("create", &RepositoryRequest::for_entity(widget(1))),
        )
        .await;
    engine
        .execute(
            PersistenceAction::Read,
            request_envelope("read", &RepositoryRequest::for_key(1)),
        )
        .await;

    let entries = audit.entries.lock().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].event_type, "create");
    assert_eq!(entries[0].entity_key, Some(1));
    assert_eq!(entries[0].entity_version.as_deref(), Some("1"));
    Ok(())
}

/// A broken audit sink never fails the invocation.
#[tokio::test]
async fn audit_failures_are_swallowed() -> anyhow::Result<()> {
    initialize_tracing();
    let engine = PersistenceEngine::new(
        "widgets",
        transform(),
        Arc::new(MemoryStorageProvider::new(transform())),
    )
    .with_event_source(Arc::new(FailingEventSource));

    let outbound = engine
        .execute(
            PersistenceAction::Create,
            request_envelope("create", &RepositoryRequest::for_entity(widget(1))),
        )
        .await;

    assert!(response_body(&outbound[0]).is_success());
    assert_eq!(engine.statistics().snapshot().successes, 1);
    Ok(())
}

/// Cancellation ends the retry loop at the first boundary as retry
/// exceeded, without waiting out the ceiling.
#[tokio::test]
async fn cancellation_ends_the_retry_loop_immediately() -> anyhow::Result<()> {
    initialize_tracing();
    let storage = Arc::new(TimeoutStorage::default());
    let profiler = Arc::new(RecordingProfiler::default());
    let engine = PersistenceEngine::new("widgets", transform(), storage.clone())
        .with_retry_policy(PersistenceRetryPolicy::new(5, 5))
        .with_profiler(profiler.clone());

    let envelope = request_envelope("create", &RepositoryRequest::for_entity(widget(1)));
    envelope.cancellation().cancel();
    engine.execute(PersistenceAction::Create, envelope).await;

    assert_eq!(storage.attempts.load(Ordering::SeqCst), 1);
    assert_eq!(
        profiler.final_result(),
        Some(ResourceRequestResult::RetryExceeded)
    );
    Ok(())
}

/// The engine registers one handler per action, and dispatch mirrors the
/// response routing with the request's correlation key.
#[tokio::test]
async fn registry_dispatch_mirrors_response_routing() -> anyhow::Result<()> {
    initialize_tracing();
    let registry = CommandRegistry::new();
    let engine = Arc::new(PersistenceEngine::new(
        "widgets",
        transform(),
        Arc::new(MemoryStorageProvider::new(transform())),
    ));
    engine.register(&registry);
    assert_eq!(registry.len(), 9);

    let responses = registry
        .process(request_envelope(
            "create",
            &RepositoryRequest::for_entity(widget(1)),
        ))
        .await
        .unwrap();

    assert_eq!(responses.len(), 1);
    let response = &responses[0];
    assert_eq!(response.message.channel_id.as_deref(), Some("widgets-response"));
    assert_eq!(response.message.correlation_key.as_deref(), Some("corr-1"));

    // A message with no registered handler dispatches to none.
    let unknown = request_envelope("purge", &RepositoryRequest::for_key(1));
    assert!(registry.process(unknown).await.is_none());
    Ok(())
}

/// Co-located callers can skip serialization entirely by attaching the
/// typed request as the envelope's in-memory object form.
#[tokio::test]
async fn message_object_requests_skip_deserialization() -> anyhow::Result<()> {
    initialize_tracing();
    let engine = PersistenceEngine::new(
        "widgets",
        transform(),
        Arc::new(MemoryStorageProvider::new(transform())),
    );

    let mut message = ServiceMessage::new("widgets", "widget", "create");
    message.originator_key = Some("client-7".into());
    let envelope = Envelope::new(message)
        .with_object(Arc::new(RepositoryRequest::<u64, Widget>::for_entity(widget(9))));

    let outbound = engine.execute(PersistenceAction::Create, envelope).await;
    let body = response_body(&outbound[0]);
    assert!(body.is_success());
    assert_eq!(body.key, Some(9));

    // The response also carries its typed form for co-located consumers.
    assert!(outbound[0]
        .message_object::<RepositoryResponse<u64, Widget>>()
        .is_some());
    Ok(())
}

/// Delete invalidates the cache entry so a later read misses the stale
/// entity.
#[tokio::test]
async fn delete_invalidates_the_cache_entry() -> anyhow::Result<()> {
    initialize_tracing();
    let storage = Arc::new(CountingStorage::new());
    let engine = PersistenceEngine::new("widgets", transform(), storage.clone())
        .with_cache(Arc::new(MemoryCacheManager::new()));

    engine
        .execute(
            PersistenceAction::Create,
            request_envelope("create", &RepositoryRequest::for_entity(widget(1))),
        )
        .await;
    let deleted = engine
        .execute(
            PersistenceAction::Delete,
            request_envelope("delete", &RepositoryRequest::for_key(1)),
        )
        .await;
    assert!(response_body(&deleted[0]).is_success());

    // The cached copy is gone: the read consults storage and finds nothing.
    let read = engine
        .execute(
            PersistenceAction::Read,
            request_envelope("read", &RepositoryRequest::for_key(1)),
        )
        .await;
    assert_eq!(response_body(&read[0]).response_code, 404);
    assert_eq!(storage.reads.load(Ordering::SeqCst), 1);
    Ok(())
}

/// Version reads resolve through the cache when active, and report the
/// entity's version without materializing it.
#[tokio::test]
async fn version_reads_resolve_from_the_cache() -> anyhow::Result<()> {
    initialize_tracing();
    let engine = PersistenceEngine::new(
        "widgets",
        transform(),
        Arc::new(MemoryStorageProvider::new(transform())),
    )
    .with_cache(Arc::new(MemoryCacheManager::new()));

    engine
        .execute(
            PersistenceAction::Create,
            request_envelope("create", &RepositoryRequest::for_entity(widget(1))),
        )
        .await;

    let version = engine
        .execute(
            PersistenceAction::Version,
            request_envelope("version", &RepositoryRequest::for_key(1)),
        )
        .await;
    let body = response_body(&version[0]);
    assert!(body.is_success());
    assert_eq!(body.key, Some(1));
    assert_eq!(body.key_reference, Some(("1".to_string(), "1".to_string())));
    assert!(body.entity.is_none());
    Ok(())
}

/// By-reference reads resolve the reference tuple through storage.
#[tokio::test]
async fn read_by_reference_resolves_the_tuple() -> anyhow::Result<()> {
    initialize_tracing();
    let engine = PersistenceEngine::new(
        "widgets",
        transform(),
        Arc::new(MemoryStorageProvider::new(transform())),
    );

    engine
        .execute(
            PersistenceAction::Create,
            request_envelope("create", &RepositoryRequest::for_entity(widget(4))),
        )
        .await;

    let read = engine
        .execute(
            PersistenceAction::ReadByRef,
            request_envelope(
                "readbyref",
                &RepositoryRequest::for_reference("label", "widget-4"),
            ),
        )
        .await;
    let body = response_body(&read[0]);
    assert!(body.is_success());
    assert_eq!(body.entity, Some(widget(4)));
    Ok(())
}
