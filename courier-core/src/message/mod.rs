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

//! Message primitives: the routed [`ServiceMessage`], the [`Envelope`] that
//! carries it, and the [`PayloadCodec`] serialization seam.

mod codec;
mod envelope;
mod service_message;

pub use codec::{JsonCodec, PayloadCodec};
pub use envelope::Envelope;
pub use service_message::ServiceMessage;
