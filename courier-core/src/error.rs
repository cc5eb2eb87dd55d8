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

//! Error taxonomy shared by the transport and persistence layers.
//!
//! Propagation policy: configuration errors are fatal and surface from
//! `start()`; transport faults trigger client reset and are reported to the
//! immediate caller as boolean results; persistence faults are recovered at
//! the dispatch boundary and embedded in the response envelope. No error
//! escapes the dispatch pipeline to its transport caller.

use std::fmt;

/// Errors raised by the transport layer: service startup, client lifecycle
/// and the send path.
#[derive(Debug, Clone)]
pub enum TransportError {
    /// Missing or invalid startup parameters. Fatal; thrown at start.
    Configuration(String),

    /// No registered sender supports the requested channel.
    ChannelUnresolved(String),

    /// A send/receive operation faulted. Triggers client reset with
    /// backoff; never surfaced to the caller of `send`.
    Send(String),

    /// The underlying connection is closed or was never opened.
    ConnectionClosed,

    /// Socket or I/O error.
    Io(String),

    /// Payload serialization or deserialization failure.
    Serialization(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration(msg) => write!(f, "configuration error: {msg}"),
            Self::ChannelUnresolved(channel) => {
                write!(f, "no sender supports channel: {channel}")
            }
            Self::Send(msg) => write!(f, "transmission failure: {msg}"),
            Self::ConnectionClosed => write!(f, "connection closed"),
            Self::Io(msg) => write!(f, "I/O error: {msg}"),
            Self::Serialization(msg) => write!(f, "serialization error: {msg}"),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Errors raised inside the persistence command pipeline.
///
/// These never reach a remote caller verbatim: the engine redacts them into
/// a tracker string with a fresh correlation id before the response leaves
/// the process.
#[derive(Debug, Clone)]
pub enum PersistenceError {
    /// The incoming request body was absent or failed to deserialize.
    MalformedRequest(String),

    /// The request was missing a field the action requires (key or entity).
    MissingField(String),

    /// The storage collaborator faulted outside its response contract.
    Storage(String),

    /// The audit collaborator faulted. Best-effort; swallowed after logging.
    Audit(String),

    /// Serialization of the response body failed.
    Serialization(String),
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedRequest(msg) => write!(f, "malformed request: {msg}"),
            Self::MissingField(field) => write!(f, "request is missing field: {field}"),
            Self::Storage(msg) => write!(f, "storage fault: {msg}"),
            Self::Audit(msg) => write!(f, "audit write failure: {msg}"),
            Self::Serialization(msg) => write!(f, "serialization error: {msg}"),
        }
    }
}

impl std::error::Error for PersistenceError {}

impl From<serde_json::Error> for PersistenceError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
