//! Chunk buffers: one logical byte stream per `(db, table, column,
//! fragment)`, assembled from an ordered list of pages, with an optional
//! typed encoder maintaining element counts and statistics.
use data_types::{ChunkKey, ChunkStats, Datum, Encoding, SqlType};
use hashbrown::HashSet;
use snafu::ensure;

use crate::file::FileSet;
use crate::page::{Page, PageHeader, PageStatus, PAGE_HEADER_LEN};
use crate::{EncodingOverflowSnafu, OutOfRangeSnafu, Result};

/// Mutable store context a chunk needs to perform IO: the backing files,
/// the epoch new writes are stamped with, and the dirty-page set feeding the
/// next checkpoint.
pub(crate) struct StoreIo<'a> {
    pub files: &'a mut FileSet,
    pub pending_epoch: u64,
    pub dirty: &'a mut HashSet<Page>,
}

/// One page version backing part of a chunk.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PageVersion {
    pub page: Page,
    pub epoch: u64,
}

#[derive(Debug)]
pub(crate) struct ChunkState {
    pub key: ChunkKey,
    pub page_size: usize,
    /// Visible page per logical page number, in order.
    pub pages: Vec<PageVersion>,
    /// Superseded page versions, physically retained until compaction.
    pub shadows: Vec<Page>,
    /// Logical byte length.
    pub size: usize,
    pub num_elems: usize,
    pub sql_type: Option<SqlType>,
    pub encoding: Option<Encoding>,
    pub stats: ChunkStats,
}

impl ChunkState {
    pub(crate) fn new(key: ChunkKey, page_size: usize) -> Self {
        Self {
            key,
            page_size,
            pages: Vec::new(),
            shadows: Vec::new(),
            size: 0,
            num_elems: 0,
            sql_type: None,
            encoding: None,
            stats: ChunkStats::new(),
        }
    }

    fn payload_cap(&self) -> usize {
        self.page_size - PAGE_HEADER_LEN
    }

    /// Initialise the typed encoder for this chunk. The element count and
    /// statistics become authoritative from this point on.
    pub(crate) fn init_encoder(&mut self, sql_type: SqlType, encoding: Encoding) {
        self.sql_type = Some(sql_type);
        self.encoding = Some(encoding);
    }

    /// The page backing logical page `n` at the pending epoch, allocating or
    /// copy-on-writing as required.
    fn page_for_write(&mut self, io: &mut StoreIo<'_>, n: usize) -> Result<Page> {
        let cap = self.payload_cap();
        while self.pages.len() <= n {
            let page = io.files.allocate(self.page_size)?;
            let header = PageHeader {
                key: self.key,
                logical_page_num: self.pages.len() as u32,
                epoch: io.pending_epoch,
                status: PageStatus::Live,
            };
            io.files.file_mut(page.file_id).write_page_header(page.page_id, &header)?;
            io.dirty.insert(page);
            self.pages.push(PageVersion {
                page,
                epoch: io.pending_epoch,
            });
        }

        let version = self.pages[n];
        if version.epoch == io.pending_epoch {
            return Ok(version.page);
        }

        // the visible version is durable at an earlier epoch; shadow it so
        // reopening at that epoch still sees the old bytes
        let fresh = io.files.allocate(self.page_size)?;
        let mut payload = vec![0u8; cap];
        io.files
            .file_mut(version.page.file_id)
            .read_payload(version.page.page_id, 0, &mut payload)?;
        let header = PageHeader {
            key: self.key,
            logical_page_num: n as u32,
            epoch: io.pending_epoch,
            status: PageStatus::Live,
        };
        let file = io.files.file_mut(fresh.file_id);
        file.write_page_header(fresh.page_id, &header)?;
        file.write_payload(fresh.page_id, 0, &payload)?;
        io.dirty.insert(fresh);
        self.shadows.push(version.page);
        self.pages[n] = PageVersion {
            page: fresh,
            epoch: io.pending_epoch,
        };
        Ok(fresh)
    }

    /// Raw byte write at `offset`; extends the page list as needed and grows
    /// the logical size to cover the written range.
    pub(crate) fn write_at(
        &mut self,
        io: &mut StoreIo<'_>,
        offset: usize,
        data: &[u8],
    ) -> Result<()> {
        let cap = self.payload_cap();
        let mut written = 0usize;
        while written < data.len() {
            let pos = offset + written;
            let page_num = pos / cap;
            let in_page = pos % cap;
            let n = (cap - in_page).min(data.len() - written);
            let page = self.page_for_write(io, page_num)?;
            io.files
                .file_mut(page.file_id)
                .write_payload(page.page_id, in_page, &data[written..written + n])?;
            io.dirty.insert(page);
            written += n;
        }
        self.size = self.size.max(offset + data.len());
        Ok(())
    }

    /// Raw byte read; fails with `OutOfRange` when the requested range
    /// extends past the chunk's logical size.
    pub(crate) fn read_at(
        &self,
        files: &mut FileSet,
        offset: usize,
        len: usize,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        ensure!(
            offset + len <= self.size,
            OutOfRangeSnafu {
                offset,
                len,
                size: self.size,
            }
        );
        let cap = self.payload_cap();
        let start = out.len();
        out.resize(start + len, 0);
        let mut read = 0usize;
        while read < len {
            let pos = offset + read;
            let page_num = pos / cap;
            let in_page = pos % cap;
            let n = (cap - in_page).min(len - read);
            let page = self.pages[page_num].page;
            files
                .file_mut(page.file_id)
                .read_payload(page.page_id, in_page, &mut out[start + read..start + read + n])?;
            read += n;
        }
        Ok(())
    }

    /// Append `n` elements from `data` (source elements at the SQL type's
    /// natural width), narrowing under a `Fixed` encoding and keeping
    /// statistics current. Without an encoder this is a plain byte append.
    pub(crate) fn append_elements(
        &mut self,
        io: &mut StoreIo<'_>,
        data: &[u8],
        n: usize,
    ) -> Result<()> {
        let (sql_type, encoding) = match (self.sql_type, self.encoding) {
            (Some(t), Some(e)) => (t, e),
            _ => {
                // untyped buffer: bytes through, count elements
                let offset = self.size;
                self.write_at(io, offset, data)?;
                self.num_elems += n;
                return Ok(());
            }
        };

        let src_width = sql_type.byte_width();
        debug_assert_eq!(data.len(), n * src_width);
        let encoded = encode_elements(sql_type, encoding, data, n, &mut self.stats)?;
        let offset = self.size;
        self.write_at(io, offset, &encoded)?;
        self.num_elems += n;
        Ok(())
    }
}

/// Narrow (or pass through) `n` source elements, updating `stats`. The whole
/// batch is validated before anything is returned, so a failed append leaves
/// the chunk untouched.
fn encode_elements(
    sql_type: SqlType,
    encoding: Encoding,
    data: &[u8],
    n: usize,
    stats: &mut ChunkStats,
) -> Result<Vec<u8>> {
    let src_width = sql_type.byte_width();
    let out_width = encoding.stored_width();
    let mut out = Vec::with_capacity(n * out_width);
    let mut pending = Vec::with_capacity(n);

    for i in 0..n {
        let src = &data[i * src_width..(i + 1) * src_width];
        let value = decode_source(sql_type, src);
        match (&value, encoding) {
            (SourceValue::Int(v), Encoding::Fixed { bits }) => {
                let narrowed = narrow(*v, bits);
                ensure!(
                    narrowed.is_some(),
                    EncodingOverflowSnafu { value: *v, bits }
                );
                out.extend_from_slice(&narrowed.unwrap()[..out_width]);
            }
            (_, Encoding::Fixed { bits }) => {
                // only integer-like values narrow
                return EncodingOverflowSnafu { value: 0i64, bits }.fail();
            }
            (_, Encoding::Raw { .. }) => out.extend_from_slice(src),
        }
        pending.push(value);
    }

    for value in pending {
        match value {
            SourceValue::Int(v) if !sql_type.is_fp() && v == sql_type.null_sentinel() => {
                stats.update_null()
            }
            SourceValue::Int(v) => stats.update(&Datum::Int(v)),
            SourceValue::Double(v) if v == sql_type.null_sentinel_f64() => stats.update_null(),
            SourceValue::Double(v) => stats.update(&Datum::from_f64(v)),
        }
    }
    Ok(out)
}

enum SourceValue {
    Int(i64),
    Double(f64),
}

fn decode_source(sql_type: SqlType, src: &[u8]) -> SourceValue {
    match sql_type {
        SqlType::Boolean => SourceValue::Int(src[0] as i8 as i64),
        SqlType::SmallInt => {
            SourceValue::Int(i16::from_le_bytes(src.try_into().unwrap()) as i64)
        }
        SqlType::Int | SqlType::Text { dict_id: Some(_) } => {
            SourceValue::Int(i32::from_le_bytes(src.try_into().unwrap()) as i64)
        }
        SqlType::BigInt | SqlType::Time | SqlType::Timestamp | SqlType::Date => {
            SourceValue::Int(i64::from_le_bytes(src.try_into().unwrap()))
        }
        SqlType::Float => {
            SourceValue::Double(f32::from_le_bytes(src.try_into().unwrap()) as f64)
        }
        SqlType::Double => SourceValue::Double(f64::from_le_bytes(src.try_into().unwrap())),
        SqlType::Text { dict_id: None } => {
            unreachable!("real string columns do not use the fixed-width encoder")
        }
    }
}

/// Narrow `v` to `bits`; `None` when the value does not round-trip.
fn narrow(v: i64, bits: u8) -> Option<[u8; 8]> {
    let ok = match bits {
        8 => v == (v as i8) as i64,
        16 => v == (v as i16) as i64,
        32 => v == (v as i32) as i64,
        _ => false,
    };
    ok.then(|| v.to_le_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrow_detects_overflow() {
        assert!(narrow(127, 8).is_some());
        assert!(narrow(-128, 8).is_some());
        assert!(narrow(128, 8).is_none());
        assert!(narrow(200, 8).is_none());
        assert!(narrow(-200, 8).is_none());
        assert!(narrow(i32::MAX as i64, 32).is_some());
        assert!(narrow(i32::MAX as i64 + 1, 32).is_none());
    }

    #[test]
    fn encode_updates_stats_only_on_success() {
        let mut stats = ChunkStats::new();
        let data: Vec<u8> = [5i32, -3, 17]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let out =
            encode_elements(SqlType::Int, Encoding::Fixed { bits: 8 }, &data, 3, &mut stats)
                .unwrap();
        assert_eq!(out, vec![5u8, 0xfd, 17]);
        assert_eq!(stats.min_i64(), Some(-3));
        assert_eq!(stats.max_i64(), Some(17));

        let bad: Vec<u8> = 200i32.to_le_bytes().to_vec();
        let err = encode_elements(SqlType::Int, Encoding::Fixed { bits: 8 }, &bad, 1, &mut stats)
            .unwrap_err();
        assert!(matches!(err, crate::Error::EncodingOverflow { .. }));
        // failed batch must not move the statistics
        assert_eq!(stats.max_i64(), Some(17));
    }
}
