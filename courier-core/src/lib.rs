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

#![forbid(unsafe_code)]

//! # Courier Core
//!
//! This crate provides the message primitives shared by every Courier
//! component: the [`ServiceMessage`](message::ServiceMessage) routing unit,
//! the [`Envelope`](message::Envelope) that carries it through the system
//! together with cancellation and completion signalling, the
//! [`PayloadCodec`](message::PayloadCodec) serialization seam, the transport
//! capability traits ([`Sender`](traits::Sender) / [`Listener`](traits::Listener))
//! and the shared error taxonomy.
//!
//! The runtime itself — messaging service, communication container, bridge
//! agent and the persistence command engine — lives in the `courier` crate.

/// Defines message types and envelopes used for communication.
pub mod message;

/// Defines the transport capability traits.
pub mod traits;

/// Shared error taxonomy.
pub mod error;

/// A prelude module for conveniently importing the most commonly used items.
pub mod prelude {
    pub use async_trait::async_trait;

    pub use crate::error::{PersistenceError, TransportError};
    pub use crate::message::{Envelope, JsonCodec, PayloadCodec, ServiceMessage};
    pub use crate::traits::{Listener, Sender};
}
