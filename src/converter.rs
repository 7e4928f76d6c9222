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

//! Builds a per-client row converter from the server's canonical internal
//! pixel layout to whatever format a client has requested via
//! `SetPixelFormat`.
//!
//! Unlike a display-oriented converter, this one never rescales channel
//! values to fill a different bit depth: it masks the internal 8-bit channel
//! down to the client's `*_max` and shifts it into place. A client that asks
//! for `red_max = 31` (5-bit red) gets the low 5 bits of the internal 8-bit
//! red channel, not a proportionally rescaled value. This matches the
//! behavior of the external reference implementation this protocol was
//! modeled on.

use crate::error::{Result, VncError};
use crate::protocol::PixelFormat;

/// Converts rows from the server's canonical BGRX layout into a client's
/// requested pixel format.
pub enum PixelConverter {
    /// The client's format is byte-identical to the internal layout; rows
    /// pass through unmodified.
    Identity,
    /// The client's format differs; each pixel is unpacked and repacked.
    Generic(GenericParams),
}

/// Parameters captured once per `SetPixelFormat`, reused for every row.
pub struct GenericParams {
    bytes_per_pixel: usize,
    big_endian: bool,
    red_shift: u32,
    green_shift: u32,
    blue_shift: u32,
    red_max: u32,
    green_max: u32,
    blue_max: u32,
}

impl PixelConverter {
    /// Builds a converter for `format`, rejecting paletted or unsupported
    /// formats with [`VncError::BadPixelFormat`].
    pub fn build(format: &PixelFormat) -> Result<Self> {
        if !format.is_valid() {
            return Err(VncError::BadPixelFormat(format!(
                "pixel format fails validation: {:?}",
                format
            )));
        }
        if *format == PixelFormat::canonical() || *format == PixelFormat::canonical_big_endian() {
            return Ok(PixelConverter::Identity);
        }
        let bytes_per_pixel = match format.bits_per_pixel {
            8 => 1,
            16 => 2,
            32 => 4,
            other => {
                return Err(VncError::BadPixelFormat(format!(
                    "unsupported bits-per-pixel: {other}"
                )))
            }
        };
        Ok(PixelConverter::Generic(GenericParams {
            bytes_per_pixel,
            big_endian: format.big_endian_flag != 0,
            red_shift: format.red_shift as u32,
            green_shift: format.green_shift as u32,
            blue_shift: format.blue_shift as u32,
            red_max: format.red_max as u32,
            green_max: format.green_max as u32,
            blue_max: format.blue_max as u32,
        }))
    }

    /// Converts one canonical BGRX row (4 bytes per pixel: B, G, R, 0) into
    /// the client's requested layout.
    pub fn convert_row(&self, row: &[u8]) -> Vec<u8> {
        match self {
            PixelConverter::Identity => row.to_vec(),
            PixelConverter::Generic(params) => {
                let pixel_count = row.len() / 4;
                let mut out = Vec::with_capacity(pixel_count * params.bytes_per_pixel);
                for px in row.chunks_exact(4) {
                    let (b, g, r) = (px[0] as u32, px[1] as u32, px[2] as u32);
                    let word = ((r & params.red_max) << params.red_shift)
                        | ((g & params.green_max) << params.green_shift)
                        | ((b & params.blue_max) << params.blue_shift);
                    write_word(&mut out, word, params.bytes_per_pixel, params.big_endian);
                }
                out
            }
        }
    }
}

fn write_word(out: &mut Vec<u8>, word: u32, bytes_per_pixel: usize, big_endian: bool) {
    let bytes = word.to_be_bytes(); // [b0,b1,b2,b3] big-endian of the full u32
    let significant = &bytes[4 - bytes_per_pixel..];
    if big_endian {
        out.extend_from_slice(significant);
    } else {
        out.extend(significant.iter().rev());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pixel(b: u8, g: u8, r: u8) -> [u8; 4] {
        [b, g, r, 0]
    }

    #[test]
    fn canonical_format_is_identity() {
        let converter = PixelConverter::build(&PixelFormat::canonical()).unwrap();
        let row = pixel(1, 2, 3);
        assert_eq!(converter.convert_row(&row), row.to_vec());
    }

    #[test]
    fn big_endian_identity_layout_is_identity() {
        let converter = PixelConverter::build(&PixelFormat::canonical_big_endian()).unwrap();
        let row = pixel(1, 2, 3);
        assert_eq!(converter.convert_row(&row), row.to_vec());
    }

    #[test]
    fn rgb565_masks_without_rescaling() {
        let format = PixelFormat {
            bits_per_pixel: 16,
            depth: 16,
            big_endian_flag: 0,
            true_colour_flag: 1,
            red_max: 31,
            green_max: 63,
            blue_max: 31,
            red_shift: 11,
            green_shift: 5,
            blue_shift: 0,
        };
        let converter = PixelConverter::build(&format).unwrap();
        // Pure red in the internal 8-bit channel: r=255 masked by red_max=31
        // is 255 & 31 = 31, NOT rescaled to the full 5-bit range via 255/8.
        let row = pixel(0, 0, 255);
        let out = converter.convert_row(&row);
        let word = u16::from_le_bytes([out[0], out[1]]);
        assert_eq!(word, 31u16 << 11);
    }

    #[test]
    fn eight_bit_truecolour_round_trips_through_mask() {
        let format = PixelFormat {
            bits_per_pixel: 8,
            depth: 8,
            big_endian_flag: 0,
            true_colour_flag: 1,
            red_max: 7,
            green_max: 7,
            blue_max: 3,
            red_shift: 5,
            green_shift: 2,
            blue_shift: 0,
        };
        let converter = PixelConverter::build(&format).unwrap();
        let row = pixel(3, 7, 7);
        let out = converter.convert_row(&row);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0], (7u8 << 5) | (7u8 << 2) | 3u8);
    }

    #[test]
    fn paletted_format_is_rejected() {
        let mut format = PixelFormat::canonical();
        format.true_colour_flag = 0;
        assert!(matches!(
            PixelConverter::build(&format),
            Err(VncError::BadPixelFormat(_))
        ));
    }
}
