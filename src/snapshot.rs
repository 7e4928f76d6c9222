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

//! Rate-limited, locked capture of the host surface into an immutable,
//! row-addressed snapshot shared by every connected client.

use crate::error::{Result, VncError};
use crate::surface::{LockedSurface, SurfaceFormat};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// An immutable capture of the surface at a point in time. Rows are
/// reference-counted so identical consecutive captures can share row
/// storage with zero copies.
#[derive(Clone)]
pub struct Snapshot {
    pub width: u16,
    pub height: u16,
    pub rows: Vec<Arc<[u8]>>,
}

/// Caches surface captures so that many clients polling independently do not
/// each force a fresh lock-and-copy of the surface.
pub struct SnapshotCache {
    surface: LockedSurface,
    min_period: Duration,
    last_capture: Option<Instant>,
    cached: Option<Snapshot>,
}

impl SnapshotCache {
    /// Builds a cache over `surface`, capturing at most `max_framerate`
    /// times per second.
    pub fn new(surface: LockedSurface, max_framerate: u32) -> Self {
        let max_framerate = max_framerate.max(1);
        SnapshotCache {
            surface,
            min_period: Duration::from_secs_f64(1.0 / max_framerate as f64),
            last_capture: None,
            cached: None,
        }
    }

    /// Replaces the underlying surface (and its lock), discarding any cached
    /// snapshot so the next `get_data` call captures fresh geometry. If the
    /// new handle points at the identical surface Arc, the lock is swapped
    /// but no invalidation occurs (the caller is just refreshing the lock).
    /// Returns `true` if the surface actually changed identity (and the
    /// cache was therefore invalidated), `false` if only the lock handle was
    /// refreshed.
    pub fn replace_surface(&mut self, surface: LockedSurface) -> bool {
        let same_surface = Arc::ptr_eq(&self.surface.surface, &surface.surface);
        self.surface = surface;
        if !same_surface {
            self.cached = None;
            self.last_capture = None;
        }
        !same_surface
    }

    /// Reads width/height through the surface lock without rate limiting.
    pub fn get_size(&self) -> (u16, u16) {
        let guard = self.surface.surface.lock();
        (guard.get_width(), guard.get_height())
    }

    /// Returns the current snapshot, reusing the cached one if less than
    /// `min_period` has elapsed since the last real capture.
    pub fn get_data(&mut self) -> Result<Snapshot> {
        if let (Some(last), Some(snap)) = (self.last_capture, &self.cached) {
            if last.elapsed() < self.min_period {
                return Ok(snap.clone());
            }
        }
        let fresh = self.capture()?;
        self.last_capture = Some(Instant::now());
        self.cached = Some(fresh.clone());
        Ok(fresh)
    }

    fn capture(&self) -> Result<Snapshot> {
        let guard = self.surface.surface.lock();
        let format = guard.get_format();
        let width = guard.get_width();
        let height = guard.get_height();
        let stride = guard.get_stride();
        let data = guard.get_data();

        let mut rows: Vec<Arc<[u8]>> = Vec::with_capacity(height as usize);

        for y in 0..height as usize {
            let start = y * stride;
            let end = start + width as usize * 4;
            if end > data.len() {
                return Err(VncError::BadSurfaceFormat(
                    "surface row extends past its buffer".to_string(),
                ));
            }
            let raw = &data[start..end];
            let converted = convert_row(raw, format);

            // Structural sharing: if this row is byte-identical to the
            // previous row in the same capture, reuse its Arc rather than
            // allocating a new one.
            if let Some(prev) = rows.last() {
                if prev.as_ref() == &converted[..] {
                    rows.push(prev.clone());
                    continue;
                }
            }
            rows.push(Arc::from(converted));
        }

        Ok(Snapshot { width, height, rows })
    }
}

fn convert_row(raw: &[u8], format: SurfaceFormat) -> Vec<u8> {
    match format {
        SurfaceFormat::Argb32 => raw.to_vec(),
        SurfaceFormat::Rgb32 => {
            let mut out = raw.to_vec();
            for px in out.chunks_exact_mut(4) {
                px[3] = 0;
            }
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::MemorySurface;
    use parking_lot::Mutex;

    fn cache_over(surface: MemorySurface, framerate: u32) -> SnapshotCache {
        let locked = LockedSurface::new(Arc::new(Mutex::new(surface)));
        SnapshotCache::new(locked, framerate)
    }

    #[test]
    fn zero_surface_yields_zeroed_rows() {
        let surface = MemorySurface::new(2, 2, SurfaceFormat::Argb32);
        let mut cache = cache_over(surface, 1000);
        let snap = cache.get_data().unwrap();
        assert_eq!(snap.width, 2);
        assert_eq!(snap.height, 2);
        assert_eq!(snap.rows.len(), 2);
        assert!(snap.rows.iter().all(|r| r.iter().all(|&b| b == 0)));
    }

    #[test]
    fn rgb32_forces_fourth_byte_to_zero() {
        let mut surface = MemorySurface::new(1, 1, SurfaceFormat::Rgb32);
        surface.data_mut()[3] = 0xFF;
        let mut cache = cache_over(surface, 1000);
        let snap = cache.get_data().unwrap();
        assert_eq!(snap.rows[0][3], 0);
    }

    #[test]
    fn rate_limiting_returns_stale_snapshot_within_min_period() {
        let locked_surface = Arc::new(Mutex::new(MemorySurface::new(1, 1, SurfaceFormat::Argb32)));
        let mut cache = SnapshotCache::new(LockedSurface::new(locked_surface.clone()), 1);
        let first = cache.get_data().unwrap();
        locked_surface.lock().data_mut()[0] = 0xAB;
        let second = cache.get_data().unwrap();
        assert_eq!(first.rows[0][0], second.rows[0][0]);
    }

    #[test]
    fn equal_consecutive_rows_share_identity() {
        let surface = MemorySurface::new(2, 3, SurfaceFormat::Argb32);
        let mut cache = cache_over(surface, 1000);
        let snap = cache.get_data().unwrap();
        assert!(Arc::ptr_eq(&snap.rows[0], &snap.rows[1]));
    }
}
