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

use std::time::Instant;

use uuid::Uuid;

/// Terminal classification of one persistence invocation, reported to the
/// resource profiler when the profile closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceRequestResult {
    /// The action completed successfully (possibly after retries or a
    /// confirmed timeout correction).
    Success,
    /// The retry ceiling was reached or the request was cancelled.
    RetryExceeded,
    /// An unexpected fault ended the invocation.
    Exception,
    /// The invocation ended without a classification.
    Unknown,
}

impl std::fmt::Display for ResourceRequestResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::RetryExceeded => write!(f, "retry_exceeded"),
            Self::Exception => write!(f, "exception"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Why an attempt is being retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceRetryReason {
    /// The storage action timed out.
    Timeout,
    /// The storage action asked for a retry without timing out.
    Other,
}

impl std::fmt::Display for ResourceRetryReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Accounting collaborator tracking start, end and retries of each
/// invocation for capacity and SLA observability.
///
/// The profiler is optional: when none is configured the engine still
/// generates a profile id so correlation survives in the logs.
pub trait ResourceProfiler: Send + Sync {
    /// Opens a profile for the invocation identified by `envelope_id` and
    /// the dispatch `key`. Returns the profile id used for the rest of the
    /// invocation.
    fn start(&self, key: &str, envelope_id: Uuid) -> Uuid;

    /// Closes the profile with its terminal classification. Always called,
    /// including on early fault paths.
    fn end(&self, profile_id: Uuid, start: Instant, result: ResourceRequestResult);

    /// Records one retry of the profiled invocation.
    fn retry(&self, profile_id: Uuid, attempt_start: Instant, reason: ResourceRetryReason);
}
