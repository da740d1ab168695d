//! Table fragmentation over the page store.
//!
//! The executor only sees the [`Fragmenter`] trait; the insert-order
//! implementation appends rows to the newest fragment until it reaches the
//! configured row cap, then opens the next one. Per-fragment chunk metadata
//! (sizes, statistics) is kept current on every insert, which is what makes
//! fragment skipping possible.
use std::collections::BTreeMap;
use std::sync::Arc;

use data_types::{ChunkKey, FragmentInfo, TableInfo};
use hashbrown::HashMap;
use observability_deps::tracing::debug;
use page_store::PageStore;
use parking_lot::RwLock;

use crate::{Result, StorageSnafu};
use snafu::ResultExt;

/// One batch of rows bound to per-column byte buffers.
#[derive(Debug, Clone)]
pub struct InsertData {
    pub db_id: i32,
    pub table_id: i32,
    /// Column id to its packed little-endian values, one element per row.
    pub columns: Vec<(i32, Vec<u8>)>,
    pub num_rows: usize,
}

/// Supplies fragments for scans and accepts bound inserts.
pub trait Fragmenter: Send + Sync {
    fn table_info(&self, table_id: i32) -> Option<TableInfo>;

    /// The table's fragments, with cached chunk metadata.
    fn fragments_for_query(&self, table_id: i32) -> Vec<FragmentInfo>;

    /// The merged `[min, max]` over all fragments of an integer-like
    /// column, when known.
    fn table_range(&self, table_id: i32, column_id: i32) -> Option<(i64, i64)> {
        let mut range: Option<(i64, i64)> = None;
        for fragment in self.fragments_for_query(table_id) {
            let Some(meta) = fragment.chunk_metadata.get(&column_id) else {
                return None;
            };
            let (Some(lo), Some(hi)) = (meta.stats.min_i64(), meta.stats.max_i64()) else {
                return None;
            };
            range = Some(match range {
                Some((a, b)) => (a.min(lo), b.max(hi)),
                None => (lo, hi),
            });
        }
        range
    }

    fn insert_data(&self, insert: &InsertData) -> Result<()>;
}

#[derive(Debug, Clone, Copy)]
pub struct FragmenterConfig {
    pub max_rows_per_fragment: usize,
    pub page_size: usize,
}

impl Default for FragmenterConfig {
    fn default() -> Self {
        Self {
            max_rows_per_fragment: 32 * 1024 * 1024,
            page_size: 1024 * 1024,
        }
    }
}

#[derive(Debug)]
struct TableState {
    info: TableInfo,
    fragments: Vec<FragmentInfo>,
}

/// Appends rows in arrival order; the newest fragment fills up before the
/// next one opens.
#[derive(Debug)]
pub struct InsertOrderFragmenter {
    store: PageStore,
    config: FragmenterConfig,
    tables: RwLock<HashMap<i32, TableState>>,
}

impl InsertOrderFragmenter {
    pub fn new(store: PageStore, config: FragmenterConfig) -> Arc<Self> {
        Arc::new(Self {
            store,
            config,
            tables: RwLock::new(HashMap::new()),
        })
    }

    /// Register a table, rebuilding its fragments from the chunks live in
    /// the store.
    pub fn register_table(&self, info: TableInfo) -> Result<()> {
        let mut fragments: BTreeMap<i32, FragmentInfo> = BTreeMap::new();
        for key in self.store.chunk_keys() {
            if key.db_id != info.db_id || key.table_id != info.table_id {
                continue;
            }
            let chunk = self.store.get_chunk(key).context(StorageSnafu)?;
            let Some(meta) = chunk.metadata() else {
                continue;
            };
            let fragment = fragments
                .entry(key.fragment_id)
                .or_insert_with(|| FragmentInfo::new(key.fragment_id));
            fragment.num_tuples = fragment.num_tuples.max(meta.num_elements);
            fragment.chunk_metadata.insert(key.column_id, meta);
        }
        let fragments: Vec<FragmentInfo> = fragments.into_values().collect();
        debug!(
            table_id = info.table_id,
            fragments = fragments.len(),
            "registered table"
        );
        self.tables
            .write()
            .insert(info.table_id, TableState { info, fragments });
        Ok(())
    }
}

impl Fragmenter for InsertOrderFragmenter {
    fn table_info(&self, table_id: i32) -> Option<TableInfo> {
        self.tables.read().get(&table_id).map(|t| t.info.clone())
    }

    fn fragments_for_query(&self, table_id: i32) -> Vec<FragmentInfo> {
        self.tables
            .read()
            .get(&table_id)
            .map(|t| t.fragments.clone())
            .unwrap_or_default()
    }

    fn insert_data(&self, insert: &InsertData) -> Result<()> {
        let mut tables = self.tables.write();
        let table = tables.get_mut(&insert.table_id).ok_or_else(|| {
            crate::Error::InvalidPlan {
                what: format!("table {} is not registered", insert.table_id),
            }
        })?;

        let mut row = 0usize;
        while row < insert.num_rows {
            // fill the newest fragment up to the row cap
            let needs_new = table
                .fragments
                .last()
                .map_or(true, |f| f.num_tuples >= self.config.max_rows_per_fragment);
            if needs_new {
                let next_id = table.fragments.last().map_or(0, |f| f.fragment_id + 1);
                table.fragments.push(FragmentInfo::new(next_id));
            }
            let (fragment_id, used) = {
                let last = table.fragments.last().expect("fragment just ensured");
                (last.fragment_id, last.num_tuples)
            };
            let capacity = self.config.max_rows_per_fragment - used;
            let batch = capacity.min(insert.num_rows - row);

            for (column_id, data) in &insert.columns {
                let column = table.info.column(*column_id).ok_or_else(|| {
                    crate::Error::InvalidPlan {
                        what: format!("column {column_id} is not in the table"),
                    }
                })?;
                let width = column.sql_type.byte_width();
                let key = ChunkKey::new(
                    insert.db_id,
                    insert.table_id,
                    *column_id,
                    fragment_id,
                );
                let chunk = match self.store.get_chunk(key) {
                    Ok(chunk) => chunk,
                    Err(page_store::Error::NotFound { .. }) => {
                        let chunk = self
                            .store
                            .create_chunk(key, self.config.page_size)
                            .context(StorageSnafu)?;
                        chunk.init_encoder(column.sql_type, column.encoding);
                        chunk
                    }
                    Err(e) => return Err(e).context(StorageSnafu),
                };
                chunk
                    .append(&data[row * width..(row + batch) * width], batch)
                    .context(StorageSnafu)?;

                let fragment = table
                    .fragments
                    .iter_mut()
                    .find(|f| f.fragment_id == fragment_id)
                    .expect("fragment just selected");
                if let Some(meta) = chunk.metadata() {
                    fragment.chunk_metadata.insert(*column_id, meta);
                }
            }

            let fragment = table
                .fragments
                .iter_mut()
                .find(|f| f.fragment_id == fragment_id)
                .expect("fragment just selected");
            fragment.num_tuples += batch;
            row += batch;
        }
        Ok(())
    }
}
