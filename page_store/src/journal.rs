//! Epoch journal and the chunk-metadata sidecar.
//!
//! The journal records one fixed-width entry per checkpoint; the last
//! complete, crc-valid entry defines the visible epoch at open. The meta
//! sidecar carries epoch-stamped encoder state (type, encoding, element
//! count, byte size, statistics) so statistics survive reopen without being
//! re-derived from page payloads.
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use data_types::{ChunkKey, ChunkStats, Datum, Encoding, SqlType};
use observability_deps::tracing::{debug, warn};
use snafu::ResultExt;

use crate::{CorruptSnafu, IoSnafu, Result};

const JOURNAL_RECORD_LEN: usize = 28;

/// One durable checkpoint: `epoch ← epoch + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct JournalRecord {
    pub epoch: u64,
    pub unix_secs: u64,
    pub dirty_pages: u64,
}

impl JournalRecord {
    fn encode(&self) -> [u8; JOURNAL_RECORD_LEN] {
        let mut buf = [0u8; JOURNAL_RECORD_LEN];
        buf[..8].copy_from_slice(&self.epoch.to_le_bytes());
        buf[8..16].copy_from_slice(&self.unix_secs.to_le_bytes());
        buf[16..24].copy_from_slice(&self.dirty_pages.to_le_bytes());
        let crc = crc32fast::hash(&buf[..24]);
        buf[24..28].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    fn decode(buf: &[u8; JOURNAL_RECORD_LEN]) -> Option<Self> {
        let crc = u32::from_le_bytes(buf[24..28].try_into().unwrap());
        if crc != crc32fast::hash(&buf[..24]) {
            return None;
        }
        Some(Self {
            epoch: u64::from_le_bytes(buf[..8].try_into().unwrap()),
            unix_secs: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
            dirty_pages: u64::from_le_bytes(buf[16..24].try_into().unwrap()),
        })
    }
}

/// Scan the journal and return the highest fully-committed epoch, `0` when
/// no checkpoint has ever been taken. A torn or corrupt tail is discarded.
pub(crate) fn recover_epoch(path: &Path) -> Result<u64> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e).context(IoSnafu { path }),
    };
    let mut epoch = 0;
    let mut buf = [0u8; JOURNAL_RECORD_LEN];
    loop {
        match file.read_exact(&mut buf) {
            Ok(()) => match JournalRecord::decode(&buf) {
                Some(rec) => epoch = rec.epoch,
                None => {
                    warn!(epoch, "corrupt journal record; discarding tail");
                    break;
                }
            },
            // torn tail from a crash mid-append
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e).context(IoSnafu { path }),
        }
    }
    Ok(epoch)
}

/// Append and sync one checkpoint record; its durability is what commits
/// the epoch.
pub(crate) fn commit_epoch(path: &Path, epoch: u64, dirty_pages: u64) -> Result<()> {
    let unix_secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let rec = JournalRecord {
        epoch,
        unix_secs,
        dirty_pages,
    };
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .context(IoSnafu { path })?;
    file.write_all(&rec.encode()).context(IoSnafu { path })?;
    file.sync_all().context(IoSnafu { path })?;
    debug!(epoch, dirty_pages, "journaled checkpoint");
    Ok(())
}

/// Encoder state persisted per chunk at checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ChunkMetaRecord {
    pub page_size: usize,
    pub num_elems: usize,
    pub size: usize,
    pub sql_type: Option<SqlType>,
    pub encoding: Option<Encoding>,
    pub stats: ChunkStats,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum MetaOp {
    Upsert(ChunkMetaRecord),
    Tombstone,
}

fn push_datum(buf: &mut Vec<u8>, v: &Option<Datum>) {
    match v {
        None => buf.push(0),
        Some(Datum::Null) => buf.push(1),
        Some(Datum::Bool(b)) => {
            buf.push(2);
            buf.push(*b as u8);
        }
        Some(Datum::Int(i)) => {
            buf.push(3);
            buf.extend_from_slice(&i.to_le_bytes());
        }
        Some(Datum::Double(d)) => {
            buf.push(4);
            buf.extend_from_slice(&d.0.to_le_bytes());
        }
        Some(Datum::Str(s)) => {
            buf.push(5);
            buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
            buf.extend_from_slice(s.as_bytes());
        }
    }
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return CorruptSnafu {
                what: "meta record truncated",
            }
            .fail();
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }
}

fn read_datum(c: &mut Cursor<'_>) -> Result<Option<Datum>> {
    Ok(match c.u8()? {
        0 => None,
        1 => Some(Datum::Null),
        2 => Some(Datum::Bool(c.u8()? != 0)),
        3 => Some(Datum::Int(c.i64()?)),
        4 => Some(Datum::from_f64(c.f64()?)),
        5 => {
            let len = c.u32()? as usize;
            let bytes = c.take(len)?;
            Some(Datum::Str(String::from_utf8_lossy(bytes).into_owned()))
        }
        _ => {
            return CorruptSnafu {
                what: "bad datum tag in meta record",
            }
            .fail()
        }
    })
}

fn sql_type_tag(t: SqlType) -> (u8, i32) {
    match t {
        SqlType::Boolean => (0, 0),
        SqlType::SmallInt => (1, 0),
        SqlType::Int => (2, 0),
        SqlType::BigInt => (3, 0),
        SqlType::Float => (4, 0),
        SqlType::Double => (5, 0),
        SqlType::Time => (6, 0),
        SqlType::Timestamp => (7, 0),
        SqlType::Date => (8, 0),
        SqlType::Text { dict_id: None } => (9, -1),
        SqlType::Text { dict_id: Some(id) } => (10, id),
    }
}

fn sql_type_from_tag(tag: u8, param: i32) -> Result<SqlType> {
    Ok(match tag {
        0 => SqlType::Boolean,
        1 => SqlType::SmallInt,
        2 => SqlType::Int,
        3 => SqlType::BigInt,
        4 => SqlType::Float,
        5 => SqlType::Double,
        6 => SqlType::Time,
        7 => SqlType::Timestamp,
        8 => SqlType::Date,
        9 => SqlType::Text { dict_id: None },
        10 => SqlType::Text {
            dict_id: Some(param),
        },
        _ => {
            return CorruptSnafu {
                what: "bad sql type tag in meta record",
            }
            .fail()
        }
    })
}

fn encode_meta_body(epoch: u64, key: &ChunkKey, op: &MetaOp) -> Vec<u8> {
    let mut body = Vec::with_capacity(96);
    body.extend_from_slice(&epoch.to_le_bytes());
    body.extend_from_slice(&key.to_bytes());
    match op {
        MetaOp::Tombstone => body.push(0),
        MetaOp::Upsert(rec) => {
            body.push(1);
            body.extend_from_slice(&(rec.page_size as u64).to_le_bytes());
            body.extend_from_slice(&(rec.num_elems as u64).to_le_bytes());
            body.extend_from_slice(&(rec.size as u64).to_le_bytes());
            match rec.sql_type {
                None => body.extend_from_slice(&[0xff, 0, 0, 0, 0]),
                Some(t) => {
                    let (tag, param) = sql_type_tag(t);
                    body.push(tag);
                    body.extend_from_slice(&param.to_le_bytes());
                }
            }
            match rec.encoding {
                None => body.extend_from_slice(&[0xff, 0, 0, 0, 0]),
                Some(Encoding::Raw { width }) => {
                    body.push(0);
                    body.extend_from_slice(&(width as u32).to_le_bytes());
                }
                Some(Encoding::Fixed { bits }) => {
                    body.push(1);
                    body.extend_from_slice(&(bits as u32).to_le_bytes());
                }
            }
            body.push(rec.stats.has_nulls as u8);
            push_datum(&mut body, &rec.stats.min);
            push_datum(&mut body, &rec.stats.max);
        }
    }
    body
}

fn decode_meta_body(body: &[u8]) -> Result<(u64, ChunkKey, MetaOp)> {
    let mut c = Cursor { buf: body, pos: 0 };
    let epoch = c.u64()?;
    let key_bytes = c.take(ChunkKey::SERIALIZED_LEN)?;
    let key = ChunkKey::from_bytes(key_bytes).ok_or_else(|| {
        CorruptSnafu {
            what: "bad chunk key in meta record",
        }
        .build()
    })?;
    let op = match c.u8()? {
        0 => MetaOp::Tombstone,
        1 => {
            let page_size = c.u64()? as usize;
            let num_elems = c.u64()? as usize;
            let size = c.u64()? as usize;
            let type_tag = c.u8()?;
            let type_param = c.i32()?;
            let sql_type = if type_tag == 0xff {
                None
            } else {
                Some(sql_type_from_tag(type_tag, type_param)?)
            };
            let enc_tag = c.u8()?;
            let enc_param = c.u32()?;
            let encoding = match enc_tag {
                0xff => None,
                0 => Some(Encoding::Raw {
                    width: enc_param as usize,
                }),
                1 => Some(Encoding::Fixed {
                    bits: enc_param as u8,
                }),
                _ => {
                    return CorruptSnafu {
                        what: "bad encoding tag in meta record",
                    }
                    .fail()
                }
            };
            let has_nulls = c.u8()? != 0;
            let min = read_datum(&mut c)?;
            let max = read_datum(&mut c)?;
            MetaOp::Upsert(ChunkMetaRecord {
                page_size,
                num_elems,
                size,
                sql_type,
                encoding,
                stats: ChunkStats {
                    min,
                    max,
                    has_nulls,
                },
            })
        }
        _ => {
            return CorruptSnafu {
                what: "bad meta op tag",
            }
            .fail()
        }
    };
    Ok((epoch, key, op))
}

/// Append a batch of meta records at `epoch` and sync.
pub(crate) fn append_meta(
    path: &Path,
    epoch: u64,
    records: &[(ChunkKey, MetaOp)],
) -> Result<()> {
    if records.is_empty() {
        return Ok(());
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .context(IoSnafu { path })?;
    let mut buf = Vec::new();
    for (key, op) in records {
        let body = encode_meta_body(epoch, key, op);
        buf.extend_from_slice(&(body.len() as u32).to_le_bytes());
        buf.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
        buf.extend_from_slice(&body);
    }
    file.write_all(&buf).context(IoSnafu { path })?;
    file.sync_all().context(IoSnafu { path })?;
    Ok(())
}

/// Replay meta records visible at `open_epoch`, in file order, last record
/// per key winning. A torn or corrupt tail is discarded.
pub(crate) fn replay_meta(
    path: &Path,
    open_epoch: u64,
) -> Result<std::collections::BTreeMap<ChunkKey, ChunkMetaRecord>> {
    let mut out = std::collections::BTreeMap::new();
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
        Err(e) => return Err(e).context(IoSnafu { path }),
    };
    let len = file
        .seek(SeekFrom::End(0))
        .context(IoSnafu { path })?;
    file.seek(SeekFrom::Start(0)).context(IoSnafu { path })?;
    let mut data = Vec::with_capacity(len as usize);
    file.read_to_end(&mut data).context(IoSnafu { path })?;

    let mut pos = 0usize;
    while pos + 8 <= data.len() {
        let body_len = u32::from_le_bytes(data[pos..pos + 4].try_into().unwrap()) as usize;
        let crc = u32::from_le_bytes(data[pos + 4..pos + 8].try_into().unwrap());
        if pos + 8 + body_len > data.len() {
            warn!("torn meta record; discarding tail");
            break;
        }
        let body = &data[pos + 8..pos + 8 + body_len];
        if crc32fast::hash(body) != crc {
            warn!("corrupt meta record; discarding tail");
            break;
        }
        let (epoch, key, op) = decode_meta_body(body)?;
        if epoch <= open_epoch {
            match op {
                MetaOp::Upsert(rec) => {
                    out.insert(key, rec);
                }
                MetaOp::Tombstone => {
                    out.remove(&key);
                }
            }
        }
        pos += 8 + body_len;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_helpers::tmp_dir;

    #[test]
    fn journal_round_trip_and_torn_tail() {
        let dir = tmp_dir().unwrap();
        let path = dir.path().join("journal");
        assert_eq!(recover_epoch(&path).unwrap(), 0);

        commit_epoch(&path, 1, 3).unwrap();
        commit_epoch(&path, 2, 5).unwrap();
        assert_eq!(recover_epoch(&path).unwrap(), 2);

        // simulate a crash mid-append: write half a record
        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(&[0u8; JOURNAL_RECORD_LEN / 2]).unwrap();
        drop(f);
        assert_eq!(recover_epoch(&path).unwrap(), 2);
    }

    #[test]
    fn meta_replay_respects_epoch_and_tombstones() {
        let dir = tmp_dir().unwrap();
        let path = dir.path().join("meta");
        let key = ChunkKey::new(1, 2, 3, 4);
        let rec = |n: usize| ChunkMetaRecord {
            page_size: 4096,
            num_elems: n,
            size: n * 4,
            sql_type: Some(SqlType::Int),
            encoding: Some(Encoding::Raw { width: 4 }),
            stats: ChunkStats {
                min: Some(Datum::Int(0)),
                max: Some(Datum::Int(n as i64)),
                has_nulls: false,
            },
        };
        append_meta(&path, 1, &[(key, MetaOp::Upsert(rec(10)))]).unwrap();
        append_meta(&path, 2, &[(key, MetaOp::Upsert(rec(20)))]).unwrap();
        append_meta(&path, 3, &[(key, MetaOp::Tombstone)]).unwrap();

        let at1 = replay_meta(&path, 1).unwrap();
        assert_eq!(at1.get(&key).unwrap().num_elems, 10);
        let at2 = replay_meta(&path, 2).unwrap();
        assert_eq!(at2.get(&key).unwrap().num_elems, 20);
        assert_eq!(at2.get(&key).unwrap().stats.max, Some(Datum::Int(20)));
        let at3 = replay_meta(&path, 3).unwrap();
        assert!(at3.is_empty());
    }
}
