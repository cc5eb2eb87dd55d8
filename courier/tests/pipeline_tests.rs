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

//! End-to-end: caller container → bridge → dispatcher → persistence engine
//! → response container → response bridge.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use courier::prelude::*;

use crate::setup::initialize_tracing;

mod setup;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Widget {
    id: u64,
    label: String,
}

fn widget(id: u64) -> Widget {
    Widget {
        id,
        label: format!("widget-{id}"),
    }
}

fn transform() -> EntityTransform<u64, Widget> {
    EntityTransform::new("widget", |w: &Widget| w.id)
}

fn create_envelope(entity: Widget) -> Envelope {
    let mut message = ServiceMessage::new("widgets", "widget", "create");
    message.originator_key = Some("client-7".into());
    message.correlation_key = Some("corr-42".into());
    message.response_channel_id = Some("widgets-response".into());
    message.response_channel_priority = 1;
    message.response_message_type = Some("widget".into());
    message.response_action_type = Some("create".into());
    let mut envelope = Envelope::new(message);
    envelope
        .pack(&RepositoryRequest::<u64, Widget>::for_entity(entity))
        .unwrap();
    envelope
}

/// A create request sent by a caller travels the whole pipeline and its
/// response comes back on the response channel, correlated to the request.
#[tokio::test]
async fn request_flows_through_the_whole_pipeline() -> anyhow::Result<()> {
    initialize_tracing();

    // The in-process transport: one bridge per logical channel.
    let request_bridge = BridgeAgent::new(BridgeMode::RoundRobin, Arc::new(JsonCodec));
    let request_listener = request_bridge.listener("widgets").await;
    let request_sender = request_bridge.sender("widgets");

    let response_bridge = BridgeAgent::new(BridgeMode::RoundRobin, Arc::new(JsonCodec));
    let response_listener = response_bridge.listener("widgets-response").await;
    let response_sender = response_bridge.sender("widgets-response");

    // The service side: engine registered in a registry, dispatcher wired
    // to the response container, draining the request listener.
    let registry = Arc::new(CommandRegistry::new());
    let storage = Arc::new(MemoryStorageProvider::new(transform()));
    let engine = Arc::new(PersistenceEngine::new(
        "widgets",
        transform(),
        storage.clone() as Arc<dyn StorageProvider<u64, Widget>>,
    ));
    engine.register(&registry);

    let service_container = Arc::new(CommunicationContainer::new("svc-widgets"));
    service_container.sender_add(response_sender).await;

    let dispatcher = Arc::new(Dispatcher::new(registry, service_container));
    let _drain = Arc::clone(&dispatcher).attach(Arc::clone(&request_listener));

    // The caller side.
    let caller_container = CommunicationContainer::new("svc-caller");
    caller_container.sender_add(request_sender).await;
    assert!(caller_container.send(create_envelope(widget(3))).await);

    let response = tokio::time::timeout(Duration::from_secs(5), response_listener.recv())
        .await?
        .unwrap();

    assert_eq!(
        response.message.channel_id.as_deref(),
        Some("widgets-response")
    );
    assert_eq!(response.message.correlation_key.as_deref(), Some("corr-42"));
    assert_eq!(
        response.message.originator_service_id.as_deref(),
        Some("svc-widgets")
    );

    let body: RepositoryResponse<u64, Widget> = response.unpack()?;
    assert!(body.is_success());
    assert_eq!(body.entity, Some(widget(3)));
    assert_eq!(storage.len(), 1);
    Ok(())
}
