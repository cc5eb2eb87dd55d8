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

use crate::error::TransportError;
use crate::message::ServiceMessage;

/// Serialization seam for moving a [`ServiceMessage`] across a process or
/// machine boundary.
///
/// Components that need copy or wire semantics (the bridge agent, the TCP
/// transport) take a codec as a constructor argument rather than reaching for
/// a process-wide serializer.
pub trait PayloadCodec: Send + Sync {
    /// Serializes the message to bytes.
    fn encode(&self, message: &ServiceMessage) -> Result<Vec<u8>, TransportError>;

    /// Deserializes a message from bytes.
    fn decode(&self, bytes: &[u8]) -> Result<ServiceMessage, TransportError>;
}

/// JSON payload codec.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl PayloadCodec for JsonCodec {
    fn encode(&self, message: &ServiceMessage) -> Result<Vec<u8>, TransportError> {
        Ok(serde_json::to_vec(message)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<ServiceMessage, TransportError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_codec_round_trips_every_envelope_field() {
        let mut message = ServiceMessage::new("orders", "order", "create");
        message.originator_service_id = Some("svc-1".into());
        message.originator_key = Some("client-7".into());
        message.correlation_key = Some("corr-42".into());
        message.response_channel_id = Some("orders-response".into());
        message.response_channel_priority = 2;
        message.status = Some(200);
        message.status_description = Some("OK".into());
        message.blob = vec![1, 2, 3];

        let codec = JsonCodec;
        let decoded = codec.decode(&codec.encode(&message).unwrap()).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn decode_rejects_malformed_input() {
        assert!(matches!(
            JsonCodec.decode(b"not-json"),
            Err(TransportError::Serialization(_))
        ));
    }
}
