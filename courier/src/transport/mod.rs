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

//! The transport layer: per-partition client supervision, the outbound
//! communication container, the in-process bridge agent, and the TCP channel
//! transport.

mod bridge;
mod client;
mod container;
mod service;
mod tcp;

pub use bridge::{BridgeAgent, BridgeListener, BridgeMode, BridgeSender};
pub use client::{ClientFactory, ClientHolder, PartitionConfig, TransportClient};
pub use container::CommunicationContainer;
pub use service::MessagingService;
pub use tcp::{
    read_frame, write_frame, TcpChannelClient, TcpChannelListener, TcpChannelSender,
    MAX_FRAME_SIZE,
};
