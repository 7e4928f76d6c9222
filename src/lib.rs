// Copyright 2025 Dustin McAfee
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # surfacevnc
//!
//! An RFB (VNC, RFC 6143) server that streams a host-supplied in-memory
//! surface to remote viewers. The host owns the pixel buffer — typically the
//! output of a software rasterizer — and this crate handles everything
//! downstream of it: handshake and authentication negotiation, pixel-format
//! conversion, per-client incremental diffing, and input event delivery.
//!
//! ## What this crate does NOT do
//!
//! - It does not draw anything. The host supplies a [`surface::Surface`] and
//!   a lock; this crate only reads through them.
//! - It does not implement compression codecs beyond raw pixel rectangles,
//!   plus the DesktopSize/DesktopName pseudo-encodings.
//! - It does not tunnel TLS, though the byte stream is generic over any
//!   `AsyncRead + AsyncWrite` transport so one can be layered in front.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use parking_lot::Mutex;
//! use surfacevnc::surface::{MemorySurface, SurfaceFormat, LockedSurface};
//! use surfacevnc::server::{ServerOptions, VncServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let surface = Arc::new(Mutex::new(MemorySurface::new(200, 200, SurfaceFormat::Argb32)));
//!     let options = ServerOptions::new(5900).with_display_name("demo");
//!     let server = VncServer::new(LockedSurface::new(surface), options);
//!     server.serve().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │           Host application               │
//! │  • owns the surface + lock               │
//! │  • drives the animation loop             │
//! │  • consumes input events                 │
//! └──────────────────┬──────────────────────┘
//!                    │ replace_surface / set_display_name / notify_frame_ready
//!                    ▼
//! ┌─────────────────────────────────────────┐
//! │              VncServer                   │
//! │  • TCP listener, client registry          │
//! │  • snapshot cache, event queue            │
//! └──────────────────┬──────────────────────┘
//!        ┌───────────┼───────────┐
//!        ▼           ▼           ▼
//!   ┌────────┐ ┌────────┐ ┌────────┐
//!   │Client 1│ │Client 2│ │Client N│   one tokio task per connection
//!   └────────┘ └────────┘ └────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod events;
pub mod protocol;
pub mod server;
pub mod surface;

mod auth;
mod connection;
mod converter;
mod dispatcher;
mod region;
mod snapshot;
mod stream;

pub use error::{Result, VncError};
pub use events::{Event, EventKind};
pub use protocol::PixelFormat;
pub use server::{ServerOptions, VncServer};
pub use surface::{LockedSurface, MemorySurface, Surface, SurfaceFormat};

/// The RFB protocol version this server advertises.
pub const PROTOCOL_VERSION: &str = "RFB 003.008\n";

/// The conventional VNC port.
pub const DEFAULT_PORT: u16 = 5900;
