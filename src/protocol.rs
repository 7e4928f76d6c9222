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

//! VNC Remote Framebuffer (RFB) protocol constants and wire structures.
//!
//! This module provides the fundamental building blocks for RFB communication:
//! protocol version negotiation, message types, security handshake codes, the
//! small set of encodings this server emits, and the pixel format descriptor.
//! It implements the subset of RFC 6143 described in full at the crate root.
//!
//! # Protocol phases
//!
//! 1. **ProtocolVersion** - server and client agree on the wire version.
//! 2. **Security** - authentication method selection and execution.
//! 3. **Init** - exchange of framebuffer parameters and capabilities.
//! 4. **Active** - ongoing message exchange for input and screen updates.

use bytes::{Buf, BufMut, BytesMut};
use std::io;

/// The RFB protocol version string advertised by the server.
pub const PROTOCOL_VERSION: &str = "RFB 003.008\n";

// Client-to-server message types.

/// Client requests to change the pixel format it receives updates in.
pub const CLIENT_MSG_SET_PIXEL_FORMAT: u8 = 0;

/// Client advertises the encodings (and pseudo-encodings) it understands.
pub const CLIENT_MSG_SET_ENCODINGS: u8 = 2;

/// Client requests a framebuffer update, incremental or full.
pub const CLIENT_MSG_FRAMEBUFFER_UPDATE_REQUEST: u8 = 3;

/// Client reports a key press or release.
pub const CLIENT_MSG_KEY_EVENT: u8 = 4;

/// Client reports pointer position and button state.
pub const CLIENT_MSG_POINTER_EVENT: u8 = 5;

/// Client transfers clipboard text to the server.
pub const CLIENT_MSG_CLIENT_CUT_TEXT: u8 = 6;

// Server-to-client message types.

/// Server sends one or more rectangles of pixel data.
pub const SERVER_MSG_FRAMEBUFFER_UPDATE: u8 = 0;

/// Reserved: indexed colour palette updates. Never emitted (true-colour only).
#[allow(dead_code)]
pub const SERVER_MSG_SET_COLOUR_MAP_ENTRIES: u8 = 1;

/// Reserved: bell notification. Never emitted.
#[allow(dead_code)]
pub const SERVER_MSG_BELL: u8 = 2;

/// Reserved: server-to-client clipboard text. Never emitted.
#[allow(dead_code)]
pub const SERVER_MSG_SERVER_CUT_TEXT: u8 = 3;

// Encodings this server can place in a FramebufferUpdate rectangle.

/// Raw pixel data, uncompressed. The only real encoding this server emits.
pub const ENCODING_RAW: i32 = 0;

/// Pseudo-encoding: signals a new framebuffer size inside a FramebufferUpdate.
pub const ENCODING_DESKTOP_SIZE: i32 = -223;

/// Pseudo-encoding: signals a new desktop name inside a FramebufferUpdate.
pub const ENCODING_DESKTOP_NAME: i32 = -307;

/// Apple's extension pseudo-encoding; its presence in a client's capability
/// set switches that client into push-frames mode (see [`crate::connection`]).
pub const ENCODING_PUSH_FRAMES: i32 = -1011;

// Security types.

/// Invalid/no security type (used only as a sentinel, never offered).
#[allow(dead_code)]
pub const SECURITY_TYPE_INVALID: u8 = 0;

/// No authentication required.
pub const SECURITY_TYPE_NONE: u8 = 1;

/// DES challenge-response ("VNC Authentication").
pub const SECURITY_TYPE_VNC_AUTH: u8 = 2;

/// SecurityResult: authentication (or lack thereof) succeeded.
pub const SECURITY_RESULT_OK: u32 = 0;

/// SecurityResult: authentication failed.
pub const SECURITY_RESULT_FAILED: u32 = 1;

/// The on-wire pixel format descriptor (16 bytes), and the canonical internal
/// layout this server stores surface snapshots in.
///
/// The server's internal row layout is little-endian 32-bit words of the form
/// `0x00RRGGBB` — bytes `[B, G, R, 0]` in memory — referred to elsewhere in
/// this crate as BGRX. [`PixelFormat::canonical`] describes that layout on
/// the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelFormat {
    /// Bits per pixel: 8, 16, or 32.
    pub bits_per_pixel: u8,
    /// Number of significant colour bits.
    pub depth: u8,
    /// Non-zero if the client wants big-endian multi-byte pixels.
    pub big_endian_flag: u8,
    /// Non-zero for true-colour (paletted mode is rejected by the converter).
    pub true_colour_flag: u8,
    /// Maximum value representable in the red channel.
    pub red_max: u16,
    /// Maximum value representable in the green channel.
    pub green_max: u16,
    /// Maximum value representable in the blue channel.
    pub blue_max: u16,
    /// Bit position of the red channel's low bit.
    pub red_shift: u8,
    /// Bit position of the green channel's low bit.
    pub green_shift: u8,
    /// Bit position of the blue channel's low bit.
    pub blue_shift: u8,
}

impl PixelFormat {
    /// The server's canonical internal layout: little-endian 32bpp BGRX,
    /// i.e. on the wire red-shift=16, green-shift=8, blue-shift=0.
    pub fn canonical() -> Self {
        PixelFormat {
            bits_per_pixel: 32,
            depth: 24,
            big_endian_flag: 0,
            true_colour_flag: 1,
            red_max: 255,
            green_max: 255,
            blue_max: 255,
            red_shift: 16,
            green_shift: 8,
            blue_shift: 0,
        }
    }

    /// The big-endian 32bpp layout that happens to produce the same bytes on
    /// the wire as [`PixelFormat::canonical`] (red-shift=8, green-shift=16,
    /// blue-shift=24). The converter factory treats this as an Identity case.
    pub fn canonical_big_endian() -> Self {
        PixelFormat {
            bits_per_pixel: 32,
            depth: 24,
            big_endian_flag: 1,
            true_colour_flag: 1,
            red_max: 255,
            green_max: 255,
            blue_max: 255,
            red_shift: 8,
            green_shift: 16,
            blue_shift: 24,
        }
    }

    /// Sanity-checks the format: supported bpp, shifts/max fit within bpp,
    /// and paletted mode is never accepted (the converter only does
    /// true-colour).
    pub fn is_valid(&self) -> bool {
        if !matches!(self.bits_per_pixel, 8 | 16 | 32) {
            return false;
        }
        if self.depth == 0 || self.depth > 32 {
            return false;
        }
        if self.true_colour_flag == 0 {
            return false;
        }
        for (shift, max) in [
            (self.red_shift, self.red_max),
            (self.green_shift, self.green_max),
            (self.blue_shift, self.blue_max),
        ] {
            if shift as u32 >= self.bits_per_pixel as u32 {
                return false;
            }
            let bits_needed = 16 - max.leading_zeros().min(16);
            if shift as u32 + bits_needed > self.bits_per_pixel as u32 {
                return false;
            }
        }
        true
    }

    /// Serializes this format into its 16-byte wire representation.
    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u8(self.bits_per_pixel);
        buf.put_u8(self.depth);
        buf.put_u8(self.big_endian_flag);
        buf.put_u8(self.true_colour_flag);
        buf.put_u16(self.red_max);
        buf.put_u16(self.green_max);
        buf.put_u16(self.blue_max);
        buf.put_u8(self.red_shift);
        buf.put_u8(self.green_shift);
        buf.put_u8(self.blue_shift);
        buf.put_slice(&[0u8; 3]);
    }

    /// Parses a 16-byte wire pixel format descriptor.
    pub fn from_bytes(buf: &mut BytesMut) -> io::Result<Self> {
        if buf.len() < 16 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "short pixel format"));
        }
        let bits_per_pixel = buf.get_u8();
        let depth = buf.get_u8();
        let big_endian_flag = buf.get_u8();
        let true_colour_flag = buf.get_u8();
        let red_max = buf.get_u16();
        let green_max = buf.get_u16();
        let blue_max = buf.get_u16();
        let red_shift = buf.get_u8();
        let green_shift = buf.get_u8();
        let blue_shift = buf.get_u8();
        buf.advance(3);
        Ok(PixelFormat {
            bits_per_pixel,
            depth,
            big_endian_flag,
            true_colour_flag,
            red_max,
            green_max,
            blue_max,
            red_shift,
            green_shift,
            blue_shift,
        })
    }
}

/// The ServerInit message: framebuffer dimensions, the server's initial pixel
/// format, and a UTF-8 desktop name.
#[derive(Debug, Clone)]
pub struct ServerInit {
    /// Framebuffer width in pixels.
    pub framebuffer_width: u16,
    /// Framebuffer height in pixels.
    pub framebuffer_height: u16,
    /// The pixel format updates are initially sent in (before any
    /// `SetPixelFormat`).
    pub pixel_format: PixelFormat,
    /// Desktop name, sent length-prefixed as UTF-8.
    pub name: String,
}

impl ServerInit {
    /// Serializes the full ServerInit message.
    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u16(self.framebuffer_width);
        buf.put_u16(self.framebuffer_height);
        self.pixel_format.write_to(buf);
        let name_bytes = self.name.as_bytes();
        buf.put_u32(name_bytes.len() as u32);
        buf.put_slice(name_bytes);
    }
}

/// A single rectangle header within a FramebufferUpdate message.
#[derive(Debug, Clone, Copy)]
pub struct Rectangle {
    /// Left edge.
    pub x: u16,
    /// Top edge.
    pub y: u16,
    /// Width in pixels.
    pub width: u16,
    /// Height in pixels.
    pub height: u16,
    /// Encoding code (non-negative for real encodings, negative for
    /// pseudo-encodings).
    pub encoding: i32,
}

impl Rectangle {
    /// Writes the 12-byte rectangle header (x, y, width, height, encoding).
    pub fn write_header(&self, buf: &mut BytesMut) {
        buf.put_u16(self.x);
        buf.put_u16(self.y);
        buf.put_u16(self.width);
        buf.put_u16(self.height);
        buf.put_i32(self.encoding);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_round_trips_through_wire_bytes() {
        let fmt = PixelFormat::canonical();
        let mut buf = BytesMut::new();
        fmt.write_to(&mut buf);
        assert_eq!(buf.len(), 16);
        let parsed = PixelFormat::from_bytes(&mut buf).unwrap();
        assert_eq!(fmt, parsed);
    }

    #[test]
    fn canonical_is_valid() {
        assert!(PixelFormat::canonical().is_valid());
        assert!(PixelFormat::canonical_big_endian().is_valid());
    }

    #[test]
    fn paletted_format_is_invalid() {
        let mut fmt = PixelFormat::canonical();
        fmt.true_colour_flag = 0;
        assert!(!fmt.is_valid());
    }

    #[test]
    fn shift_past_bpp_is_invalid() {
        let mut fmt = PixelFormat::canonical();
        fmt.bits_per_pixel = 16;
        fmt.red_shift = 20;
        assert!(!fmt.is_valid());
    }

    #[test]
    fn server_init_serializes_fields_in_order() {
        let init = ServerInit {
            framebuffer_width: 200,
            framebuffer_height: 200,
            pixel_format: PixelFormat::canonical(),
            name: "Cairo".to_string(),
        };
        let mut buf = BytesMut::new();
        init.write_to(&mut buf);
        assert_eq!(&buf[0..2], &200u16.to_be_bytes());
        assert_eq!(&buf[2..4], &200u16.to_be_bytes());
        assert_eq!(buf.len(), 4 + 16 + 4 + 5);
    }
}
