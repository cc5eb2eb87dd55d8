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

use serde::{Deserialize, Serialize};

/// The routed message unit exchanged between Courier components.
///
/// A `ServiceMessage` carries routing (channel id + priority, message and
/// action type), correlation and originator metadata, response routing, a
/// transport-level status, and an opaque binary payload. Every field listed
/// here is the minimum any serializer must round-trip.
///
/// Response messages are never assembled by hand: they are derived from the
/// request with [`ServiceMessage::to_response`], which swaps the response
/// routing fields into the active positions while preserving the correlation
/// key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceMessage {
    /// The logical named route this message travels on.
    pub channel_id: Option<String>,
    /// The priority partition within the channel.
    pub channel_priority: i32,
    /// The message type; persistence commands use the entity type here.
    pub message_type: Option<String>,
    /// The action within the message type, e.g. `create` or `read`.
    pub action_type: Option<String>,

    /// The service instance that transmitted the message. Stamped by the
    /// communication container on the way out when unset.
    pub originator_service_id: Option<String>,
    /// The key of the originating party, carried into audit records.
    pub originator_key: Option<String>,
    /// Correlates a response with its request.
    pub correlation_key: Option<String>,

    /// The channel a response should be routed to.
    pub response_channel_id: Option<String>,
    /// The priority partition a response should be routed to.
    pub response_channel_priority: i32,
    /// The message type a response should carry.
    pub response_message_type: Option<String>,
    /// The action type a response should carry.
    pub response_action_type: Option<String>,

    /// Transport-level status code for the message as a whole.
    pub status: Option<u16>,
    /// Short human-readable status description.
    pub status_description: Option<String>,

    /// The opaque serialized payload body.
    pub blob: Vec<u8>,
}

impl ServiceMessage {
    /// Creates a message addressed to `channel_id` with the given message and
    /// action types.
    pub fn new(
        channel_id: impl Into<String>,
        message_type: impl Into<String>,
        action_type: impl Into<String>,
    ) -> Self {
        Self {
            channel_id: Some(channel_id.into()),
            channel_priority: 1,
            message_type: Some(message_type.into()),
            action_type: Some(action_type.into()),
            ..Self::default()
        }
    }

    /// Derives the response message for this request.
    ///
    /// The response routing fields become the active routing fields, the
    /// correlation key and originator key are preserved, and the response
    /// routing slots of the derived message are left empty. The originator
    /// service id is not carried: the responding service stamps its own
    /// identity on the way out.
    #[must_use]
    pub fn to_response(&self) -> Self {
        Self {
            channel_id: self.response_channel_id.clone(),
            channel_priority: self.response_channel_priority,
            message_type: self.response_message_type.clone(),
            action_type: self.response_action_type.clone(),
            originator_key: self.originator_key.clone(),
            correlation_key: self.correlation_key.clone(),
            ..Self::default()
        }
    }

    /// The `channel/message_type/action_type` key used for handler dispatch
    /// and resource profiling, lowercased.
    #[must_use]
    pub fn to_key(&self) -> String {
        format!(
            "{}/{}/{}",
            self.channel_id.as_deref().unwrap_or(""),
            self.message_type.as_deref().unwrap_or(""),
            self.action_type.as_deref().unwrap_or(""),
        )
        .to_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ServiceMessage {
        let mut m = ServiceMessage::new("orders", "order", "create");
        m.originator_key = Some("client-7".into());
        m.correlation_key = Some("corr-42".into());
        m.response_channel_id = Some("orders-response".into());
        m.response_channel_priority = 2;
        m.response_message_type = Some("order".into());
        m.response_action_type = Some("create".into());
        m
    }

    #[test]
    fn to_response_swaps_routing_fields() {
        let rs = request().to_response();
        assert_eq!(rs.channel_id.as_deref(), Some("orders-response"));
        assert_eq!(rs.channel_priority, 2);
        assert_eq!(rs.message_type.as_deref(), Some("order"));
        assert_eq!(rs.action_type.as_deref(), Some("create"));
        assert!(rs.response_channel_id.is_none());
        assert!(rs.response_message_type.is_none());
    }

    #[test]
    fn to_response_preserves_the_correlation_key() {
        let rs = request().to_response();
        assert_eq!(rs.correlation_key.as_deref(), Some("corr-42"));
    }

    #[test]
    fn to_key_is_lowercased() {
        let m = ServiceMessage::new("Orders", "Order", "Create");
        assert_eq!(m.to_key(), "orders/order/create");
    }
}
