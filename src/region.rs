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

//! A single client's queue of pending `FramebufferUpdateRequest`s.

use std::collections::VecDeque;

/// One `FramebufferUpdateRequest` from a client.
#[derive(Debug, Clone, Copy)]
pub struct RegionRequest {
    pub incremental: bool,
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
}

impl RegionRequest {
    /// The exclusive right edge of the requested rectangle.
    pub fn x1(&self) -> u16 {
        self.x + self.width
    }

    /// The exclusive bottom edge of the requested rectangle.
    pub fn y1(&self) -> u16 {
        self.y + self.height
    }

    /// A non-incremental request covering the full surface.
    pub fn full_frame(width: u16, height: u16) -> Self {
        RegionRequest {
            incremental: false,
            x: 0,
            y: 0,
            width,
            height,
        }
    }
}

/// FIFO of pending region requests for one client.
#[derive(Debug, Default)]
pub struct RegionQueue {
    pending: VecDeque<RegionRequest>,
}

impl RegionQueue {
    /// An empty queue.
    pub fn new() -> Self {
        RegionQueue::default()
    }

    /// Appends a request to the back of the queue.
    pub fn add(&mut self, request: RegionRequest) {
        self.pending.push_back(request);
    }

    /// Removes and returns the oldest pending request, if any.
    pub fn pop(&mut self) -> Option<RegionRequest> {
        self.pending.pop_front()
    }

    /// True if no requests are pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Discards every pending request. Used when the surface is resized: a
    /// fresh non-incremental full-frame request replaces whatever was queued
    /// against the old geometry.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_corners_match_origin_plus_size() {
        let r = RegionRequest {
            incremental: true,
            x: 10,
            y: 20,
            width: 30,
            height: 40,
        };
        assert_eq!(r.x1(), 40);
        assert_eq!(r.y1(), 60);
    }

    #[test]
    fn pop_is_fifo() {
        let mut q = RegionQueue::new();
        q.add(RegionRequest::full_frame(1, 1));
        q.add(RegionRequest {
            incremental: true,
            x: 1,
            y: 1,
            width: 1,
            height: 1,
        });
        let first = q.pop().unwrap();
        assert!(!first.incremental);
        let second = q.pop().unwrap();
        assert!(second.incremental);
        assert!(q.pop().is_none());
    }

    #[test]
    fn clear_discards_pending_requests() {
        let mut q = RegionQueue::new();
        q.add(RegionRequest::full_frame(1, 1));
        q.clear();
        assert!(q.is_empty());
    }
}
