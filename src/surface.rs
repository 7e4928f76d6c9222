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

//! The surface contract: the host application owns a 2D pixel buffer and
//! supplies it to the server through this trait plus a scoped lock.
//!
//! This crate never constructs a surface itself; [`MemorySurface`] exists
//! only so tests and demo binaries have something concrete to point at.

use std::sync::Arc;

/// The raw pixel layout a [`Surface`] can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceFormat {
    /// 32-bit RGB; the 4th byte is present but must be ignored.
    Rgb32,
    /// 32-bit ARGB; the 4th byte is alpha, not premultiplied.
    Argb32,
}

/// A host-owned 2D pixel buffer. All methods are expected to be called while
/// holding the lock returned alongside the surface (see [`crate::server`]).
pub trait Surface: Send + Sync {
    /// The surface's pixel layout.
    fn get_format(&self) -> SurfaceFormat;
    /// Width in pixels.
    fn get_width(&self) -> u16;
    /// Height in pixels.
    fn get_height(&self) -> u16;
    /// Row stride in bytes (may exceed `width * 4` due to alignment padding).
    fn get_stride(&self) -> usize;
    /// The full pixel buffer, `stride * height` bytes.
    fn get_data(&self) -> &[u8];
}

/// A `Surface` backed by a plain, host-owned `Vec<u8>`. Used by the demo
/// binaries and by this crate's own tests; real hosts supply their own
/// rasterizer-backed implementation instead.
pub struct MemorySurface {
    width: u16,
    height: u16,
    format: SurfaceFormat,
    data: Vec<u8>,
}

impl MemorySurface {
    /// Creates a surface filled with zeroed pixels.
    pub fn new(width: u16, height: u16, format: SurfaceFormat) -> Self {
        let stride = width as usize * 4;
        MemorySurface {
            width,
            height,
            format,
            data: vec![0u8; stride * height as usize],
        }
    }

    /// Mutable access to the backing buffer for in-place drawing. Callers
    /// are expected to hold the surface's lock for the duration of any edit.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Surface for MemorySurface {
    fn get_format(&self) -> SurfaceFormat {
        self.format
    }

    fn get_width(&self) -> u16 {
        self.width
    }

    fn get_height(&self) -> u16 {
        self.height
    }

    fn get_stride(&self) -> usize {
        self.width as usize * 4
    }

    fn get_data(&self) -> &[u8] {
        &self.data
    }
}

/// A surface plus the lock that must be held while reading or writing it,
/// exactly as the host supplies it to [`crate::server::VncServer`].
#[derive(Clone)]
pub struct LockedSurface {
    pub(crate) surface: Arc<parking_lot::Mutex<dyn Surface>>,
}

impl LockedSurface {
    /// Wraps a surface and its lock together for handoff to the server.
    pub fn new(surface: Arc<parking_lot::Mutex<dyn Surface>>) -> Self {
        LockedSurface { surface }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_surface_reports_geometry() {
        let s = MemorySurface::new(4, 3, SurfaceFormat::Argb32);
        assert_eq!(s.get_width(), 4);
        assert_eq!(s.get_height(), 3);
        assert_eq!(s.get_stride(), 16);
        assert_eq!(s.get_data().len(), 48);
    }
}
