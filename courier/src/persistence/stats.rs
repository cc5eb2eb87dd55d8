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

use std::sync::atomic::{AtomicU64, Ordering};

/// Running counters for one persistence engine.
#[derive(Debug, Default)]
pub struct PersistenceStatistics {
    retries: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
}

impl PersistenceStatistics {
    /// Records one retry of a storage action.
    pub fn retry_increment(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one invocation that ended successfully.
    pub fn success_increment(&self) {
        self.successes.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one invocation that ended in failure.
    pub fn failure_increment(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// A point-in-time copy of the counters.
    #[must_use]
    pub fn snapshot(&self) -> PersistenceStatisticsSnapshot {
        PersistenceStatisticsSnapshot {
            retries: self.retries.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of [`PersistenceStatistics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistenceStatisticsSnapshot {
    /// Storage action retries performed.
    pub retries: u64,
    /// Invocations that ended successfully.
    pub successes: u64,
    /// Invocations that ended in failure.
    pub failures: u64,
}
