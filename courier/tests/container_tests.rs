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
use std::sync::Arc;

use tokio::sync::Mutex;

use courier::prelude::*;

use crate::setup::initialize_tracing;

mod setup;

/// A sender that records what it is asked and what it delivers, optionally
/// failing every transmission.
struct RecordingSender {
    channel_id: String,
    fail: bool,
    supports_calls: AtomicU32,
    delivered: Mutex<Vec<Envelope>>,
}

impl RecordingSender {
    fn new(channel_id: &str) -> Arc<Self> {
        Arc::new(Self {
            channel_id: channel_id.to_string(),
            fail: false,
            supports_calls: AtomicU32::new(0),
            delivered: Mutex::new(Vec::new()),
        })
    }

    fn failing(channel_id: &str) -> Arc<Self> {
        Arc::new(Self {
            channel_id: channel_id.to_string(),
            fail: true,
            supports_calls: AtomicU32::new(0),
            delivered: Mutex::new(Vec::new()),
        })
    }

    async fn delivered_count(&self) -> usize {
        self.delivered.lock().await.len()
    }
}

#[async_trait]
impl Sender for RecordingSender {
    fn supports_channel(&self, channel_id: &str) -> bool {
        self.supports_calls.fetch_add(1, Ordering::SeqCst);
        self.channel_id.eq_ignore_ascii_case(channel_id)
    }

    async fn process_message(&self, envelope: Envelope) -> Result<bool, TransportError> {
        if self.fail {
            return Err(TransportError::Send("scripted failure".into()));
        }
        self.delivered.lock().await.push(envelope);
        Ok(true)
    }
}

fn envelope_for(channel: &str) -> Envelope {
    Envelope::new(ServiceMessage::new(channel, "order", "create"))
}

/// With no registered senders, a send fails with `false` rather than
/// erroring.
#[tokio::test]
async fn send_without_senders_reports_false() -> anyhow::Result<()> {
    initialize_tracing();
    let container = CommunicationContainer::new("svc-1");
    assert!(!container.send(envelope_for("orders")).await);
    Ok(())
}

/// A matching sender receives the envelope, stamped with the container's
/// originator service id when the envelope carried none.
#[tokio::test]
async fn send_stamps_the_originator_and_delivers() -> anyhow::Result<()> {
    initialize_tracing();
    let container = CommunicationContainer::new("svc-1");
    let sender = RecordingSender::new("orders");
    container.sender_add(sender.clone()).await;

    assert!(container.send(envelope_for("orders")).await);

    let delivered = sender.delivered.lock().await;
    assert_eq!(delivered.len(), 1);
    assert_eq!(
        delivered[0].message.originator_service_id.as_deref(),
        Some("svc-1")
    );
    Ok(())
}

/// Every sender supporting the channel receives the envelope; an unrelated
/// channel's sender does not.
#[tokio::test]
async fn send_fans_out_to_all_matching_senders() -> anyhow::Result<()> {
    initialize_tracing();
    let container = CommunicationContainer::new("svc-1");
    let first = RecordingSender::new("orders");
    let second = RecordingSender::new("orders");
    let other = RecordingSender::new("billing");
    container.sender_add(first.clone()).await;
    container.sender_add(second.clone()).await;
    container.sender_add(other.clone()).await;

    assert!(container.send(envelope_for("orders")).await);

    assert_eq!(first.delivered_count().await, 1);
    assert_eq!(second.delivered_count().await, 1);
    assert_eq!(other.delivered_count().await, 0);
    Ok(())
}

/// A failing sender makes the whole send report `false`, but delivery to the
/// healthy sender in the same call is not rolled back.
#[tokio::test]
async fn one_failing_sender_fails_the_send_without_rollback() -> anyhow::Result<()> {
    initialize_tracing();
    let container = CommunicationContainer::new("svc-1");
    let healthy = RecordingSender::new("orders");
    let broken = RecordingSender::failing("orders");
    container.sender_add(healthy.clone()).await;
    container.sender_add(broken).await;

    assert!(!container.send(envelope_for("orders")).await);
    assert_eq!(healthy.delivered_count().await, 1);
    Ok(())
}

/// Cache stability: resolving the same channel twice returns the identical
/// sender set without rescanning the registry.
#[tokio::test]
async fn channel_resolution_is_cached() -> anyhow::Result<()> {
    initialize_tracing();
    let container = CommunicationContainer::new("svc-1");
    let sender = RecordingSender::new("orders");
    container.sender_add(sender.clone()).await;

    let first = container.resolve(Some("orders")).await;
    let scans_after_first = sender.supports_calls.load(Ordering::SeqCst);
    let second = container.resolve(Some("orders")).await;

    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 1);
    assert!(Arc::ptr_eq(&first[0], &second[0]));
    // The second resolution came from the cache.
    assert_eq!(sender.supports_calls.load(Ordering::SeqCst), scans_after_first);
    Ok(())
}

/// An unresolvable channel is cached as empty, so repeated sends do not
/// rescan the registry.
#[tokio::test]
async fn unresolvable_channels_are_cached_as_empty() -> anyhow::Result<()> {
    initialize_tracing();
    let container = CommunicationContainer::new("svc-1");
    let sender = RecordingSender::new("orders");
    container.sender_add(sender.clone()).await;

    assert!(container.resolve(Some("billing")).await.is_empty());
    let scans = sender.supports_calls.load(Ordering::SeqCst);
    assert!(container.resolve(Some("billing")).await.is_empty());
    assert_eq!(sender.supports_calls.load(Ordering::SeqCst), scans);
    Ok(())
}

/// Adding a sender invalidates the cache: a channel that resolved to one
/// sender resolves to both afterwards.
#[tokio::test]
async fn sender_add_invalidates_the_cache() -> anyhow::Result<()> {
    initialize_tracing();
    let container = CommunicationContainer::new("svc-1");
    container.sender_add(RecordingSender::new("orders")).await;
    assert_eq!(container.resolve(Some("orders")).await.len(), 1);

    container.sender_add(RecordingSender::new("orders")).await;
    assert_eq!(container.resolve(Some("orders")).await.len(), 2);
    Ok(())
}

/// An envelope without a channel id bypasses the cache and is matched
/// against the empty channel.
#[tokio::test]
async fn missing_channel_id_uses_the_empty_channel_matcher() -> anyhow::Result<()> {
    initialize_tracing();
    let container = CommunicationContainer::new("svc-1");
    let generic = RecordingSender::new("");
    let orders = RecordingSender::new("orders");
    container.sender_add(generic.clone()).await;
    container.sender_add(orders.clone()).await;

    let envelope = Envelope::new(ServiceMessage::default());
    assert!(envelope.message.channel_id.is_none());
    assert!(container.send(envelope).await);

    assert_eq!(generic.delivered_count().await, 1);
    assert_eq!(orders.delivered_count().await, 0);
    Ok(())
}
