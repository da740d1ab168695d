use std::fmt::{self, Display};

use crate::sql::{Datum, SqlType};

/// Uniquely names one chunk (one column of one fragment) in the page store.
///
/// Keys order lexicographically over `(db, table, column, fragment)`, which
/// the derived `Ord` provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChunkKey {
    pub db_id: i32,
    pub table_id: i32,
    pub column_id: i32,
    pub fragment_id: i32,
}

impl ChunkKey {
    pub const SERIALIZED_LEN: usize = 4 + 4 * 4;

    pub fn new(db_id: i32, table_id: i32, column_id: i32, fragment_id: i32) -> Self {
        Self {
            db_id,
            table_id,
            column_id,
            fragment_id,
        }
    }

    /// Byte-reproducible serialization: a `u32` length prefix followed by the
    /// tuple elements as little-endian `i32`s. The open path reconstructs the
    /// chunk map from page headers alone, so this layout is stable.
    pub fn to_bytes(&self) -> [u8; Self::SERIALIZED_LEN] {
        let mut buf = [0u8; Self::SERIALIZED_LEN];
        buf[..4].copy_from_slice(&4u32.to_le_bytes());
        for (i, v) in [self.db_id, self.table_id, self.column_id, self.fragment_id]
            .into_iter()
            .enumerate()
        {
            buf[4 + i * 4..8 + i * 4].copy_from_slice(&v.to_le_bytes());
        }
        buf
    }

    /// Inverse of [`Self::to_bytes`]; `None` if the length prefix is wrong.
    pub fn from_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::SERIALIZED_LEN {
            return None;
        }
        let len = u32::from_le_bytes(buf[..4].try_into().unwrap());
        if len != 4 {
            return None;
        }
        let mut parts = [0i32; 4];
        for (i, part) in parts.iter_mut().enumerate() {
            *part = i32::from_le_bytes(buf[4 + i * 4..8 + i * 4].try_into().unwrap());
        }
        Some(Self::new(parts[0], parts[1], parts[2], parts[3]))
    }
}

impl Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{{},{},{},{}}}",
            self.db_id, self.table_id, self.column_id, self.fragment_id
        )
    }
}

/// How elements are laid out in a chunk's byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    /// One element per `width` bytes, stored as-is.
    Raw { width: usize },
    /// Fixed-width narrow integer encoding; appends that do not fit the
    /// target width fail.
    Fixed { bits: u8 },
}

impl Encoding {
    /// Stored width in bytes of one encoded element.
    pub fn stored_width(&self) -> usize {
        match self {
            Self::Raw { width } => *width,
            Self::Fixed { bits } => (*bits as usize) / 8,
        }
    }
}

/// Authoritative statistics for one chunk, updated on every mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkStats {
    pub min: Option<Datum>,
    pub max: Option<Datum>,
    pub has_nulls: bool,
}

impl ChunkStats {
    pub fn new() -> Self {
        Self {
            min: None,
            max: None,
            has_nulls: false,
        }
    }

    /// Fold one non-null logical value into the statistics.
    pub fn update(&mut self, v: &Datum) {
        debug_assert!(!v.is_null());
        match &self.min {
            Some(m) if m <= v => {}
            _ => self.min = Some(v.clone()),
        }
        match &self.max {
            Some(m) if m >= v => {}
            _ => self.max = Some(v.clone()),
        }
    }

    pub fn update_null(&mut self) {
        self.has_nulls = true;
    }

    /// Integer view of the minimum, for fragment skipping on integer and
    /// time columns.
    pub fn min_i64(&self) -> Option<i64> {
        self.min.as_ref().and_then(Datum::as_i64)
    }

    pub fn max_i64(&self) -> Option<i64> {
        self.max.as_ref().and_then(Datum::as_i64)
    }
}

impl Default for ChunkStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Cached per-column metadata held by a fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkMetadata {
    pub sql_type: SqlType,
    pub encoding: Encoding,
    pub num_bytes: usize,
    pub num_elements: usize,
    pub stats: ChunkStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_key_orders_lexicographically() {
        let a = ChunkKey::new(1, 2, 3, 4);
        let b = ChunkKey::new(1, 2, 4, 0);
        let c = ChunkKey::new(2, 0, 0, 0);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn chunk_key_round_trips_through_bytes() {
        let key = ChunkKey::new(1, -2, 3, i32::MAX);
        let bytes = key.to_bytes();
        assert_eq!(ChunkKey::from_bytes(&bytes), Some(key));
        // byte-reproducible: same key, same bytes
        assert_eq!(bytes, key.to_bytes());
    }

    #[test]
    fn stats_track_min_max() {
        let mut stats = ChunkStats::new();
        for v in [5i64, -3, 17, 0] {
            stats.update(&Datum::Int(v));
        }
        assert_eq!(stats.min_i64(), Some(-3));
        assert_eq!(stats.max_i64(), Some(17));
        assert!(!stats.has_nulls);
        stats.update_null();
        assert!(stats.has_nulls);
    }
}
