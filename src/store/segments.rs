//! In-memory segment registry.

use std::collections::HashSet;
use std::sync::RwLock;

use crate::store::traits::SegmentMeta;
use crate::task::SegmentId;

/// Tracks dropped segments. Every segment not explicitly dropped is healthy.
#[derive(Debug, Default)]
pub struct SegmentRegistry {
    dropped: RwLock<HashSet<SegmentId>>,
}

impl SegmentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a segment as dropped. Returns `false` if it already was.
    pub fn drop_segment(&self, segment_id: SegmentId) -> bool {
        self.dropped
            .write()
            .map(|mut dropped| dropped.insert(segment_id))
            .unwrap_or(false)
    }

    pub fn dropped_count(&self) -> usize {
        self.dropped.read().map(|d| d.len()).unwrap_or(0)
    }
}

impl SegmentMeta for SegmentRegistry {
    fn is_segment_healthy(&self, segment_id: SegmentId) -> bool {
        self.dropped
            .read()
            .map(|dropped| !dropped.contains(&segment_id))
            .unwrap_or(true)
    }
}
