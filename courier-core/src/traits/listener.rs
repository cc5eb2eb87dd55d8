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

use crate::message::Envelope;

/// Receive-side transport capability.
///
/// A listener accepts envelopes injected by a transport (or by the in-process
/// bridge agent) and hands them to the local dispatch pipeline.
#[async_trait]
pub trait Listener: Send + Sync {
    /// Returns `true` when this listener accepts the given channel.
    fn supports_channel(&self, channel_id: &str) -> bool;

    /// Injects an inbound envelope into the listener.
    async fn inject(&self, envelope: Envelope);
}
