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

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::trace;
use uuid::Uuid;

use crate::error::TransportError;
use crate::message::ServiceMessage;

/// The completion hook invoked exactly once when processing terminates.
type CompletionHook = Box<dyn FnOnce(bool) + Send>;

/// At-most-once completion signalling shared by every clone of an envelope.
///
/// The transport registers a hook to acknowledge or requeue the message at
/// the fabric level; whichever pipeline stage terminates processing fires it.
/// A second signal finds the slot empty and is a no-op.
#[derive(Clone, Default)]
struct CompletionSignal {
    hook: Arc<Mutex<Option<CompletionHook>>>,
}

impl CompletionSignal {
    fn register(&self, hook: CompletionHook) {
        if let Ok(mut slot) = self.hook.lock() {
            *slot = Some(hook);
        }
    }

    fn fire(&self, success: bool) {
        let taken = self.hook.lock().ok().and_then(|mut slot| slot.take());
        match taken {
            Some(hook) => hook(success),
            None => trace!(success, "completion already signalled or no hook registered"),
        }
    }
}

/// The envelope that carries a [`ServiceMessage`] through the system.
///
/// Alongside the message itself an envelope holds:
///
/// - an optional in-memory object form of the payload, letting co-located
///   components skip a serialize/deserialize round trip;
/// - a cancellation token the recipient may observe to abandon retries;
/// - completion callbacks ([`Envelope::signal_success`] /
///   [`Envelope::signal_fail`]) used by the transport to acknowledge or
///   requeue at the fabric level. At most one invocation has effect.
///
/// Cloning an envelope clones the message but shares the cancellation token
/// and the completion signal: however many components handle copies of the
/// same in-flight envelope, processing terminates exactly once.
pub struct Envelope {
    /// Unique id for this in-flight payload, used for profiling correlation.
    pub id: Uuid,
    /// The routed message.
    pub message: ServiceMessage,
    message_object: Option<Arc<dyn Any + Send + Sync>>,
    cancellation: CancellationToken,
    signal: CompletionSignal,
}

impl Envelope {
    /// Wraps a message in a fresh envelope with its own cancellation token
    /// and an unarmed completion signal.
    #[must_use]
    pub fn new(message: ServiceMessage) -> Self {
        Self {
            id: Uuid::new_v4(),
            message,
            message_object: None,
            cancellation: CancellationToken::new(),
            signal: CompletionSignal::default(),
        }
    }

    /// Attaches the in-memory object form of the payload so co-located
    /// recipients can downcast instead of deserializing the blob.
    #[must_use]
    pub fn with_object(mut self, object: Arc<dyn Any + Send + Sync>) -> Self {
        self.message_object = Some(object);
        self
    }

    /// Attaches the in-memory payload form to an envelope already in hand.
    pub fn attach_object(&mut self, object: Arc<dyn Any + Send + Sync>) {
        self.message_object = Some(object);
    }

    /// Returns the in-memory payload downcast to `T`, if one was attached
    /// and the type matches.
    #[must_use]
    pub fn message_object<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.message_object
            .as_ref()
            .and_then(|object| Arc::clone(object).downcast::<T>().ok())
    }

    /// The cancellation token recipients observe at retry boundaries.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Registers the fabric-level completion hook. The hook receives `true`
    /// on acknowledge and `false` on requeue.
    pub fn on_completion(&self, hook: impl FnOnce(bool) + Send + 'static) {
        self.signal.register(Box::new(hook));
    }

    /// Signals that processing terminated; `success` selects acknowledge
    /// versus requeue. Only the first signal has effect.
    pub fn signal(&self, success: bool) {
        self.signal.fire(success);
    }

    /// Signals successful completion. Equivalent to `signal(true)`.
    pub fn signal_success(&self) {
        self.signal.fire(true);
    }

    /// Signals failed completion, asking the fabric to requeue.
    pub fn signal_fail(&self) {
        self.signal.fire(false);
    }

    /// Derives the response envelope for this request: a fresh envelope
    /// (own id, cancellation and signal) around
    /// [`ServiceMessage::to_response`].
    #[must_use]
    pub fn to_response(&self) -> Self {
        Self::new(self.message.to_response())
    }

    /// Serializes a typed payload into the message blob.
    pub fn pack<T: Serialize>(&mut self, payload: &T) -> Result<(), TransportError> {
        self.message.blob = serde_json::to_vec(payload)?;
        Ok(())
    }

    /// Deserializes the message blob into a typed payload.
    pub fn unpack<T: DeserializeOwned>(&self) -> Result<T, TransportError> {
        Ok(serde_json::from_slice(&self.message.blob)?)
    }
}

impl Clone for Envelope {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            message: self.message.clone(),
            message_object: self.message_object.clone(),
            cancellation: self.cancellation.clone(),
            signal: self.signal.clone(),
        }
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("id", &self.id)
            .field("message", &self.message)
            .field("has_object", &self.message_object.is_some())
            .field("cancelled", &self.cancellation.is_cancelled())
            .finish()
    }
}
