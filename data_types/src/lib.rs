//! Shared data types for the storage and query layers.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

mod chunk;
mod fragment;
mod sql;
mod table;

pub use chunk::{ChunkKey, ChunkMetadata, ChunkStats, Encoding};
pub use fragment::FragmentInfo;
pub use sql::{Datum, SqlType};
pub use table::{ColumnInfo, TableInfo};

/// The aggregate computed for one output target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggKind {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

/// Per-output-column description of what the kernel writes into its slots.
///
/// An AVG target occupies two adjacent output slots (sum, count); everything
/// else occupies one.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetInfo {
    /// `None` for plain projection targets.
    pub agg_kind: Option<AggKind>,
    pub sql_type: SqlType,
    /// Skip the type's null sentinel when aggregating.
    pub skip_null_val: bool,
    /// COUNT(DISTINCT ..) targets; the slot holds a bitmap or set id.
    pub is_distinct: bool,
}

impl TargetInfo {
    pub fn is_agg(&self) -> bool {
        self.agg_kind.is_some()
    }

    /// Number of output slots this target occupies.
    pub fn slot_count(&self) -> usize {
        match self.agg_kind {
            Some(AggKind::Avg) => 2,
            _ => 1,
        }
    }
}
