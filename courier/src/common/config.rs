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

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use courier_core::error::TransportError;

use crate::persistence::PersistenceRetryPolicy;
use crate::transport::PartitionConfig;

/// Configuration for a Courier runtime.
///
/// Every value has a default, so an empty TOML document is a valid
/// configuration. Unknown channels resolve to `None` rather than erroring;
/// validation of the values that matter (a channel id, at least one
/// partition) happens when the messaging service starts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    /// Channel definitions: id plus priority partitions.
    pub channels: Vec<ChannelConfig>,
    /// Timeout configuration.
    pub timeouts: TimeoutConfig,
    /// Retry ceilings for the persistence engine.
    pub retries: RetryConfig,
}

/// One logical channel and its priority partitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// The channel id.
    pub id: String,
    /// The priority partitions served on this channel.
    pub partitions: Vec<u32>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            partitions: vec![1],
        }
    }
}

/// Timeout-related configuration values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Default persistence request timeout in milliseconds when the request
    /// does not carry one.
    pub default_request_timeout_ms: u64,
    /// Backoff step for client reset in milliseconds; attempt `n` sleeps
    /// `n * step`.
    pub client_reset_backoff_step_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            default_request_timeout_ms: 10_000,
            client_reset_backoff_step_ms: 100,
        }
    }
}

/// Retry ceilings applied by the persistence engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum retries for standard-priority requests.
    pub standard_retries: u32,
    /// Maximum retries for background (priority zero) requests.
    pub background_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            standard_retries: 5,
            background_retries: 10,
        }
    }
}

impl CourierConfig {
    /// Parses a configuration from a TOML document.
    pub fn from_toml_str(document: &str) -> Result<Self, TransportError> {
        toml::from_str(document).map_err(|err| TransportError::Configuration(err.to_string()))
    }

    /// Loads a configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TransportError> {
        let document = std::fs::read_to_string(path.as_ref())
            .map_err(|err| TransportError::Configuration(err.to_string()))?;
        Self::from_toml_str(&document)
    }

    /// The default persistence request timeout.
    #[must_use]
    pub fn default_request_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.default_request_timeout_ms)
    }

    /// The client-reset backoff step.
    #[must_use]
    pub fn reset_backoff_step(&self) -> Duration {
        Duration::from_millis(self.timeouts.client_reset_backoff_step_ms)
    }

    /// The retry policy described by this configuration.
    #[must_use]
    pub fn retry_policy(&self) -> PersistenceRetryPolicy {
        PersistenceRetryPolicy::new(self.retries.standard_retries, self.retries.background_retries)
    }

    /// The partition set configured for `channel_id`, if the channel exists.
    #[must_use]
    pub fn partitions(&self, channel_id: &str) -> Option<Vec<PartitionConfig>> {
        self.channels
            .iter()
            .find(|channel| channel.id.eq_ignore_ascii_case(channel_id))
            .map(|channel| {
                channel
                    .partitions
                    .iter()
                    .map(|&priority| PartitionConfig::new(priority))
                    .collect()
            })
    }
}
