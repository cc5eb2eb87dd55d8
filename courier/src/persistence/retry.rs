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

use courier_core::message::Envelope;

/// Computes the retry ceiling for a persistence invocation.
///
/// Background traffic (channel priority zero) is fire-and-forget and can
/// afford a more generous ceiling than interactive requests, where a caller
/// is waiting on the response.
#[derive(Debug, Clone)]
pub struct PersistenceRetryPolicy {
    standard_retries: u32,
    background_retries: u32,
}

impl Default for PersistenceRetryPolicy {
    fn default() -> Self {
        Self {
            standard_retries: 5,
            background_retries: 10,
        }
    }
}

impl PersistenceRetryPolicy {
    /// Creates a policy with explicit ceilings.
    #[must_use]
    pub const fn new(standard_retries: u32, background_retries: u32) -> Self {
        Self {
            standard_retries,
            background_retries,
        }
    }

    /// The maximum number of retries allowed for this envelope.
    #[must_use]
    pub fn maximum_retries(&self, envelope: &Envelope) -> u32 {
        if envelope.message.channel_priority <= 0 {
            self.background_retries
        } else {
            self.standard_retries
        }
    }
}
