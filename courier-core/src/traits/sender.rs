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

use crate::error::TransportError;
use crate::message::Envelope;

/// Transmit-side transport capability.
///
/// A sender declares which channels it can carry and transmits envelopes for
/// them. The communication container resolves senders by channel and fans
/// each outbound envelope out to every matching sender concurrently.
#[async_trait]
pub trait Sender: Send + Sync {
    /// Returns `true` when this sender can carry the given channel.
    /// Channel comparison is case-insensitive; the empty string is the
    /// generic matcher for envelopes without a channel id.
    fn supports_channel(&self, channel_id: &str) -> bool;

    /// Transmits the envelope. Returns `true` when the message was delivered
    /// to the fabric.
    async fn process_message(&self, envelope: Envelope) -> Result<bool, TransportError>;
}
