use std::collections::BTreeMap;

use crate::chunk::ChunkMetadata;

/// A horizontal slice of a table: its row count and per-column chunk
/// metadata, plus a cached device assignment per memory level.
#[derive(Debug, Clone)]
pub struct FragmentInfo {
    pub fragment_id: i32,
    pub num_tuples: usize,
    /// Keyed by column id.
    pub chunk_metadata: BTreeMap<i32, ChunkMetadata>,
    /// Device id per memory level (CPU, accelerator).
    pub device_ids: [i32; 2],
}

impl FragmentInfo {
    pub fn new(fragment_id: i32) -> Self {
        Self {
            fragment_id,
            num_tuples: 0,
            chunk_metadata: BTreeMap::new(),
            device_ids: [0, 0],
        }
    }
}
