//! Paged, file-backed storage addressed by chunk keys, with epoch-based
//! durability.
//!
//! A [`PageStore`] manages a directory of page files. Chunks (one column of
//! one fragment) are ordered lists of pages forming a logical byte stream;
//! all writes are stamped with the pending epoch and become visible only
//! once [`PageStore::checkpoint`] journals that epoch. Opening a store at an
//! explicit epoch presents the state as of that checkpoint; later writes are
//! invisible but physically retained.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use data_types::{ChunkKey, ChunkMetadata, ChunkStats, Encoding, SqlType};
use hashbrown::{HashMap, HashSet};
use observability_deps::tracing::{debug, info};
use parking_lot::Mutex;
use snafu::Snafu;

mod chunk;
mod file;
mod journal;
mod page;

use chunk::{ChunkState, PageVersion, StoreIo};
use file::{FileSet, PageFile};
use journal::{ChunkMetaRecord, MetaOp};
pub use page::{Page, PageStatus};
use page::{PageHeader, PAGE_HEADER_LEN};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("no space left for a page of {page_size} bytes"))]
    NoSpace { page_size: usize },

    #[snafu(display("chunk {key} already exists"))]
    AlreadyExists { key: ChunkKey },

    #[snafu(display("chunk {key} does not exist"))]
    NotFound { key: ChunkKey },

    #[snafu(display(
        "read of {len} bytes at offset {offset} out of range for chunk of {size} bytes"
    ))]
    OutOfRange {
        offset: usize,
        len: usize,
        size: usize,
    },

    #[snafu(display("value {value} does not fit the fixed {bits}-bit encoding"))]
    EncodingOverflow { value: i64, bits: u8 },

    #[snafu(display("corrupt storage: {what}"))]
    Corrupt { what: String },

    #[snafu(display("i/o failure on {}: {source}", path.display()))]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Tunables for a page store.
#[derive(Debug, Clone, Copy)]
pub struct PageStoreConfig {
    /// Number of pages added to a size class when its free list runs dry.
    pub growth_pages: usize,
}

impl Default for PageStoreConfig {
    fn default() -> Self {
        Self { growth_pages: 256 }
    }
}

#[derive(Debug)]
struct StoreState {
    files: FileSet,
    chunks: BTreeMap<ChunkKey, Arc<Mutex<ChunkState>>>,
    durable_epoch: u64,
    pending_epoch: u64,
    dirty_pages: HashSet<Page>,
    meta_dirty: BTreeSet<ChunkKey>,
    tombstones: Vec<ChunkKey>,
    /// Dead pages awaiting an epoch strictly greater than their death epoch.
    dead_pages: Vec<(Page, u64, usize)>,
}

#[derive(Debug)]
struct Inner {
    journal_path: PathBuf,
    meta_path: PathBuf,
    state: Mutex<StoreState>,
}

/// Persistent, page-addressed storage for chunk buffers.
#[derive(Debug, Clone)]
pub struct PageStore {
    inner: Arc<Inner>,
}

impl PageStore {
    /// Open (creating if necessary) the store at `dir`, presenting the
    /// latest fully-committed epoch.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        Self::open_impl(dir.as_ref(), None, PageStoreConfig::default())
    }

    /// Open the store restricted to the state as of checkpoint `epoch`.
    /// Writes at later epochs are invisible and physically retained.
    pub fn open_at(dir: impl AsRef<Path>, epoch: u64) -> Result<Self> {
        Self::open_impl(dir.as_ref(), Some(epoch), PageStoreConfig::default())
    }

    pub fn open_with_config(dir: impl AsRef<Path>, config: PageStoreConfig) -> Result<Self> {
        Self::open_impl(dir.as_ref(), None, config)
    }

    fn open_impl(dir: &Path, requested_epoch: Option<u64>, config: PageStoreConfig) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|source| Error::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let journal_path = dir.join("epoch.journal");
        let meta_path = dir.join("chunk.meta");

        let durable_epoch = journal::recover_epoch(&journal_path)?;
        let open_epoch = requested_epoch.map_or(durable_epoch, |e| e.min(durable_epoch));

        let mut files = FileSet::new(dir.to_path_buf(), config.growth_pages);
        // live page candidates: (key, logical page) -> versions
        let mut candidates: HashMap<(ChunkKey, u32), Vec<(Page, u64)>> = HashMap::new();
        let mut page_sizes: HashMap<ChunkKey, usize> = HashMap::new();
        let mut dead_pages = Vec::new();

        let entries = std::fs::read_dir(dir).map_err(|source| Error::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        for entry in entries {
            let entry = entry.map_err(|source| Error::Io {
                path: dir.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            if path.extension().map_or(true, |e| e != "data") {
                continue;
            }
            let mut pf = PageFile::open(&path)?;
            let page_size = pf.page_size;
            for page_id in 0..pf.num_pages {
                let header = pf.read_page_header(page_id)?;
                let page = Page::new(pf.file_id, page_id);
                match header.status {
                    PageStatus::Free => files.mark_free(page_size, page),
                    PageStatus::Live if header.epoch <= open_epoch => {
                        candidates
                            .entry((header.key, header.logical_page_num))
                            .or_default()
                            .push((page, header.epoch));
                        page_sizes.insert(header.key, page_size);
                    }
                    // future write on a discarded timeline: retained, not
                    // visible, not reused
                    PageStatus::Live => {}
                    PageStatus::Dead if header.epoch < open_epoch => {
                        files.mark_free(page_size, page)
                    }
                    PageStatus::Dead if header.epoch == open_epoch => {
                        dead_pages.push((page, header.epoch, page_size))
                    }
                    PageStatus::Dead => {}
                }
            }
            files.insert_opened(pf);
        }

        let meta = journal::replay_meta(&meta_path, open_epoch)?;

        // assemble chunk states: pages grouped by key, winner per logical
        // page is the greatest epoch at or below the open epoch
        let mut grouped: BTreeMap<ChunkKey, BTreeMap<u32, Vec<(Page, u64)>>> = BTreeMap::new();
        for ((key, logical), versions) in candidates {
            grouped.entry(key).or_default().insert(logical, versions);
        }

        let mut chunks = BTreeMap::new();
        let keys: BTreeSet<ChunkKey> = grouped.keys().copied().chain(meta.keys().copied()).collect();
        for key in keys {
            let page_size = page_sizes
                .get(&key)
                .copied()
                .or_else(|| meta.get(&key).map(|m| m.page_size));
            let page_size = match page_size {
                Some(s) => s,
                None => continue,
            };
            let mut state = ChunkState::new(key, page_size);
            if let Some(by_logical) = grouped.remove(&key) {
                for (logical, mut versions) in by_logical {
                    versions.sort_by_key(|(_, epoch)| *epoch);
                    let (winner, epoch) = *versions.last().expect("at least one version");
                    for (shadow, _) in &versions[..versions.len() - 1] {
                        state.shadows.push(*shadow);
                    }
                    debug_assert_eq!(logical as usize, state.pages.len());
                    state.pages.push(PageVersion {
                        page: winner,
                        epoch,
                    });
                }
            }
            match meta.get(&key) {
                Some(rec) => {
                    state.size = rec.size;
                    state.num_elems = rec.num_elems;
                    state.sql_type = rec.sql_type;
                    state.encoding = rec.encoding;
                    state.stats = rec.stats.clone();
                }
                None => {
                    // pages without a meta record can only come from an
                    // epoch that never checkpointed metadata
                    state.size = state.pages.len() * (page_size - PAGE_HEADER_LEN);
                }
            }
            chunks.insert(key, Arc::new(Mutex::new(state)));
        }

        info!(
            epoch = open_epoch,
            durable = durable_epoch,
            chunks = chunks.len(),
            "opened page store"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                journal_path,
                meta_path,
                state: Mutex::new(StoreState {
                    files,
                    chunks,
                    durable_epoch: open_epoch,
                    pending_epoch: open_epoch + 1,
                    dirty_pages: HashSet::new(),
                    meta_dirty: BTreeSet::new(),
                    tombstones: Vec::new(),
                    dead_pages,
                }),
            }),
        })
    }

    /// The latest fully-committed epoch visible through this handle.
    pub fn epoch(&self) -> u64 {
        self.inner.state.lock().durable_epoch
    }

    /// Hand out one free page of the requested size class.
    pub fn request_free_page(&self, page_size: usize) -> Result<Page> {
        self.inner.state.lock().files.allocate(page_size)
    }

    /// Append `n` free pages of the requested size class to `out`.
    pub fn request_free_pages(
        &self,
        n: usize,
        page_size: usize,
        out: &mut Vec<Page>,
    ) -> Result<()> {
        let mut state = self.inner.state.lock();
        out.reserve(n);
        for _ in 0..n {
            out.push(state.files.allocate(page_size)?);
        }
        Ok(())
    }

    /// Create a new chunk buffer for `key` with pages of `page_size` bytes.
    pub fn create_chunk(&self, key: ChunkKey, page_size: usize) -> Result<ChunkHandle> {
        let mut state = self.inner.state.lock();
        if state.chunks.contains_key(&key) {
            return AlreadyExistsSnafu { key }.fail();
        }
        let chunk = Arc::new(Mutex::new(ChunkState::new(key, page_size)));
        state.chunks.insert(key, Arc::clone(&chunk));
        state.meta_dirty.insert(key);
        debug!(%key, page_size, "created chunk");
        Ok(ChunkHandle {
            inner: Arc::clone(&self.inner),
            chunk,
        })
    }

    /// The live chunk buffer for `key`.
    pub fn get_chunk(&self, key: ChunkKey) -> Result<ChunkHandle> {
        let state = self.inner.state.lock();
        let chunk = state.chunks.get(&key).ok_or_else(|| {
            NotFoundSnafu { key }.build()
        })?;
        Ok(ChunkHandle {
            inner: Arc::clone(&self.inner),
            chunk: Arc::clone(chunk),
        })
    }

    /// Mark the chunk dead. Its pages return to the free list once an epoch
    /// strictly greater than the death epoch is durable.
    pub fn delete_chunk(&self, key: ChunkKey) -> Result<()> {
        let mut state = self.inner.state.lock();
        let chunk = state
            .chunks
            .remove(&key)
            .ok_or_else(|| NotFoundSnafu { key }.build())?;
        let pending = state.pending_epoch;
        let chunk = chunk.lock();
        let dead_header = |logical: u32| PageHeader {
            key,
            logical_page_num: logical,
            epoch: pending,
            status: PageStatus::Dead,
        };
        for (logical, version) in chunk.pages.iter().enumerate() {
            let StoreState {
                files,
                dirty_pages,
                dead_pages,
                ..
            } = &mut *state;
            files
                .file_mut(version.page.file_id)
                .write_page_header(version.page.page_id, &dead_header(logical as u32))?;
            dirty_pages.insert(version.page);
            dead_pages.push((version.page, pending, chunk.page_size));
        }
        for shadow in &chunk.shadows {
            let StoreState {
                files,
                dirty_pages,
                dead_pages,
                ..
            } = &mut *state;
            files
                .file_mut(shadow.file_id)
                .write_page_header(shadow.page_id, &dead_header(0))?;
            dirty_pages.insert(*shadow);
            dead_pages.push((*shadow, pending, chunk.page_size));
        }
        state.meta_dirty.remove(&key);
        state.tombstones.push(key);
        debug!(%key, "deleted chunk");
        Ok(())
    }

    /// Ordered keys of all live chunks.
    pub fn chunk_keys(&self) -> Vec<ChunkKey> {
        self.inner.state.lock().chunks.keys().copied().collect()
    }

    /// Atomically publish all writes since the last checkpoint at a new
    /// epoch. On crash, the next open rewinds to the highest epoch whose
    /// journal record was fully written.
    pub fn checkpoint(&self) -> Result<u64> {
        let mut state = self.inner.state.lock();
        let epoch = state.pending_epoch;
        let dirty = state.dirty_pages.len() as u64;

        for file in state.files.files_mut() {
            file.sync()?;
        }

        let mut records: Vec<(ChunkKey, MetaOp)> = Vec::new();
        for key in &state.meta_dirty {
            if let Some(chunk) = state.chunks.get(key) {
                let c = chunk.lock();
                records.push((
                    *key,
                    MetaOp::Upsert(ChunkMetaRecord {
                        page_size: c.page_size,
                        num_elems: c.num_elems,
                        size: c.size,
                        sql_type: c.sql_type,
                        encoding: c.encoding,
                        stats: c.stats.clone(),
                    }),
                ));
            }
        }
        for key in &state.tombstones {
            records.push((*key, MetaOp::Tombstone));
        }
        journal::append_meta(&self.inner.meta_path, epoch, &records)?;
        journal::commit_epoch(&self.inner.journal_path, epoch, dirty)?;

        state.durable_epoch = epoch;
        state.pending_epoch = epoch + 1;
        state.dirty_pages.clear();
        state.meta_dirty.clear();
        state.tombstones.clear();

        // recycle pages whose death epoch is now strictly below durable
        let durable = state.durable_epoch;
        let (recycle, keep): (Vec<_>, Vec<_>) = state
            .dead_pages
            .drain(..)
            .partition(|(_, death, _)| *death < durable);
        state.dead_pages = keep;
        for (page, _, page_size) in recycle {
            state
                .files
                .file_mut(page.file_id)
                .write_page_header(page.page_id, &PageHeader::free())?;
            state.files.mark_free(page_size, page);
        }

        info!(epoch, dirty_pages = dirty, "checkpoint complete");
        Ok(epoch)
    }
}

/// Shared handle to one chunk buffer. Clones (and repeated `get_chunk`
/// calls) refer to the same underlying buffer.
#[derive(Debug, Clone)]
pub struct ChunkHandle {
    inner: Arc<Inner>,
    chunk: Arc<Mutex<ChunkState>>,
}

impl ChunkHandle {
    pub fn key(&self) -> ChunkKey {
        self.chunk.lock().key
    }

    /// Logical byte length of the chunk.
    pub fn size(&self) -> usize {
        self.chunk.lock().size
    }

    pub fn num_elems(&self) -> usize {
        self.chunk.lock().num_elems
    }

    pub fn sql_type(&self) -> Option<SqlType> {
        self.chunk.lock().sql_type
    }

    pub fn encoding(&self) -> Option<Encoding> {
        self.chunk.lock().encoding
    }

    pub fn stats(&self) -> ChunkStats {
        self.chunk.lock().stats.clone()
    }

    /// Whether two handles refer to the same underlying buffer.
    pub fn same_buffer(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.chunk, &other.chunk)
    }

    /// Initialise the typed encoder; element counts and statistics are
    /// authoritative from here on.
    pub fn init_encoder(&self, sql_type: SqlType, encoding: Encoding) {
        let mut state = self.inner.state.lock();
        let mut chunk = self.chunk.lock();
        chunk.init_encoder(sql_type, encoding);
        state.meta_dirty.insert(chunk.key);
    }

    /// Append `n` elements, updating element count and statistics; may
    /// extend the underlying page list.
    pub fn append(&self, data: &[u8], n: usize) -> Result<()> {
        let mut state = self.inner.state.lock();
        let StoreState {
            files,
            dirty_pages,
            pending_epoch,
            meta_dirty,
            ..
        } = &mut *state;
        let mut chunk = self.chunk.lock();
        let mut io = StoreIo {
            files,
            pending_epoch: *pending_epoch,
            dirty: dirty_pages,
        };
        chunk.append_elements(&mut io, data, n)?;
        meta_dirty.insert(chunk.key);
        Ok(())
    }

    /// Raw byte write at `offset`.
    pub fn write(&self, offset: usize, data: &[u8]) -> Result<()> {
        let mut state = self.inner.state.lock();
        let StoreState {
            files,
            dirty_pages,
            pending_epoch,
            meta_dirty,
            ..
        } = &mut *state;
        let mut chunk = self.chunk.lock();
        let mut io = StoreIo {
            files,
            pending_epoch: *pending_epoch,
            dirty: dirty_pages,
        };
        chunk.write_at(&mut io, offset, data)?;
        meta_dirty.insert(chunk.key);
        Ok(())
    }

    /// Raw byte read appended to `out`; fails with `OutOfRange` on
    /// over-read.
    pub fn read(&self, offset: usize, len: usize, out: &mut Vec<u8>) -> Result<()> {
        let mut state = self.inner.state.lock();
        let chunk = self.chunk.lock();
        chunk.read_at(&mut state.files, offset, len, out)
    }

    /// The chunk's whole byte stream.
    pub fn read_all(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let len = self.size();
        self.read(0, len, &mut out)?;
        Ok(out)
    }

    /// Cached metadata for fragment bookkeeping; `None` until an encoder is
    /// initialised.
    pub fn metadata(&self) -> Option<ChunkMetadata> {
        let chunk = self.chunk.lock();
        Some(ChunkMetadata {
            sql_type: chunk.sql_type?,
            encoding: chunk.encoding?,
            num_bytes: chunk.size,
            num_elements: chunk.num_elems,
            stats: chunk.stats.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use data_types::Datum;

    fn le_ints(range: std::ops::Range<i32>) -> Vec<u8> {
        range.flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn get_free_pages() {
        let dir = test_helpers::tmp_dir().unwrap();
        let store = PageStore::open(dir.path()).unwrap();
        let mut free_pages = Vec::new();
        store.request_free_pages(2048, 4096, &mut free_pages).unwrap();
        assert_eq!(free_pages.len(), 2048);
    }

    #[test]
    fn get_free_page() {
        let dir = test_helpers::tmp_dir().unwrap();
        let store = PageStore::open(dir.path()).unwrap();
        store.request_free_page(1_024_796).unwrap();
    }

    #[test]
    fn create_chunk_returns_same_buffer() {
        let dir = test_helpers::tmp_dir().unwrap();
        let store = PageStore::open(dir.path()).unwrap();
        let key = ChunkKey::new(2, 3, 4, 5);
        let chunk1 = store.create_chunk(key, 4096).unwrap();
        let chunk2 = store.get_chunk(key).unwrap();
        assert!(chunk1.same_buffer(&chunk2));

        // creating the same chunk again must fail
        let err = store.create_chunk(key, 4096).unwrap_err();
        assert!(matches!(err, Error::AlreadyExists { .. }));
    }

    #[test]
    fn delete_chunk_lifecycle() {
        let dir = test_helpers::tmp_dir().unwrap();
        let key1 = ChunkKey::new(2, 3, 4, 5);
        let key2 = ChunkKey::new(2, 4, 4, 5);
        {
            let store = PageStore::open(dir.path()).unwrap();
            let chunk = store.create_chunk(key1, 4096).unwrap();
            chunk.write(0, &le_ints(0..4096)).unwrap();

            store.delete_chunk(key1).unwrap();
            assert!(matches!(
                store.get_chunk(key1).unwrap_err(),
                Error::NotFound { .. }
            ));
            // never-created and already-deleted chunks both report NotFound
            assert!(matches!(
                store.delete_chunk(key2).unwrap_err(),
                Error::NotFound { .. }
            ));
            assert!(matches!(
                store.delete_chunk(key1).unwrap_err(),
                Error::NotFound { .. }
            ));
            store.checkpoint().unwrap();
        }
        // no trace of the deleted chunk after reopen
        let store = PageStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.get_chunk(key1).unwrap_err(),
            Error::NotFound { .. }
        ));
    }

    #[test]
    fn write_read_chunk() {
        let dir = test_helpers::tmp_dir().unwrap();
        let store = PageStore::open(dir.path()).unwrap();
        let key = ChunkKey::new(1, 2, 3, 4);
        let chunk = store.create_chunk(key, 1_024_796).unwrap();
        let data = le_ints(0..100_000);
        chunk.write(0, &data).unwrap();
        store.checkpoint().unwrap();

        let mut back = Vec::new();
        chunk.read(0, data.len(), &mut back).unwrap();
        assert_eq!(back, data);

        // over-read is out of range
        let err = chunk.read(0, data.len() + 1, &mut Vec::new()).unwrap_err();
        assert!(matches!(err, Error::OutOfRange { .. }));
    }

    #[test]
    fn persistence_round_trip() {
        let dir = test_helpers::tmp_dir().unwrap();
        let key = ChunkKey::new(1, 2, 3, 4);
        let num_ints = 1_000_000;
        let data = le_ints(0..num_ints);
        {
            let store = PageStore::open(dir.path()).unwrap();
            let chunk = store.create_chunk(key, 1_024_796).unwrap();
            chunk.append(&data, num_ints as usize).unwrap();
            store.checkpoint().unwrap();
        }
        let store = PageStore::open(dir.path()).unwrap();
        let chunk = store.get_chunk(key).unwrap();
        assert_eq!(chunk.size(), num_ints as usize * 4);
        assert_eq!(chunk.read_all().unwrap(), data);
    }

    #[test]
    fn epoch_rewind() {
        let dir = test_helpers::tmp_dir().unwrap();
        let key = ChunkKey::new(1, 2, 3, 4);
        let num_ints = 100_000usize;
        let data = le_ints(0..num_ints as i32);
        {
            let store = PageStore::open(dir.path()).unwrap();
            let chunk = store.create_chunk(key, 1_024_796).unwrap();
            for _ in 0..4 {
                chunk.append(&data, num_ints).unwrap();
                store.checkpoint().unwrap();
            }
        }
        {
            let store = PageStore::open(dir.path()).unwrap();
            let chunk = store.get_chunk(key).unwrap();
            assert_eq!(chunk.size(), 4 * num_ints * 4);
        }
        for epoch in [3u64, 2] {
            let store = PageStore::open_at(dir.path(), epoch).unwrap();
            let chunk = store.get_chunk(key).unwrap();
            assert_eq!(chunk.size(), epoch as usize * num_ints * 4);
            // the visible prefix carries the original bytes
            let mut back = Vec::new();
            chunk.read(0, num_ints * 4, &mut back).unwrap();
            assert_eq!(back, data);
        }
        // rewinding must not have destroyed later epochs
        let store = PageStore::open(dir.path()).unwrap();
        assert_eq!(store.get_chunk(key).unwrap().size(), 4 * num_ints * 4);
    }

    #[test]
    fn fixed_encoding_survives_reopen() {
        let dir = test_helpers::tmp_dir().unwrap();
        let key1 = ChunkKey::new(1, 2, 3, 4);
        let key2 = ChunkKey::new(5, 6, 7, 8);
        let num_elems = 10_000usize;
        let data1: Vec<u8> = (0..num_elems as i32)
            .flat_map(|i| (i % 100).to_le_bytes())
            .collect();
        let data2: Vec<u8> = (0..num_elems as i32)
            .flat_map(|i| (-(i % 100)).to_le_bytes())
            .collect();
        {
            let store = PageStore::open(dir.path()).unwrap();
            let chunk1 = store.create_chunk(key1, 8192).unwrap();
            chunk1.init_encoder(SqlType::Int, Encoding::Fixed { bits: 8 });
            assert_eq!(chunk1.sql_type(), Some(SqlType::Int));
            assert_eq!(chunk1.encoding(), Some(Encoding::Fixed { bits: 8 }));

            chunk1.append(&data1, num_elems).unwrap();
            assert_eq!(chunk1.size(), num_elems);
            assert_eq!(chunk1.num_elems(), num_elems);

            let chunk2 = store.create_chunk(key2, 8192).unwrap();
            chunk2.init_encoder(SqlType::Int, Encoding::Raw { width: 4 });
            chunk2.append(&data2, num_elems).unwrap();
            assert_eq!(chunk2.size(), num_elems * 4);
            assert_eq!(chunk2.num_elems(), num_elems);
            store.checkpoint().unwrap();
        }

        let store = PageStore::open(dir.path()).unwrap();
        let chunk1 = store.get_chunk(key1).unwrap();
        assert_eq!(chunk1.sql_type(), Some(SqlType::Int));
        assert_eq!(chunk1.encoding(), Some(Encoding::Fixed { bits: 8 }));
        assert_eq!(chunk1.size(), num_elems);
        assert_eq!(chunk1.num_elems(), num_elems);
        // statistics are persisted, not re-derived
        let stats = chunk1.stats();
        assert_eq!(stats.min, Some(Datum::Int(0)));
        assert_eq!(stats.max, Some(Datum::Int(99)));

        // narrow round-trip preserved every value
        let back = chunk1.read_all().unwrap();
        for (i, b) in back.iter().enumerate() {
            assert_eq!(*b as i8 as i32, i as i32 % 100);
        }

        // appending keeps working after reopen
        chunk1.append(&data1, num_elems).unwrap();
        assert_eq!(chunk1.size(), num_elems * 2);
        assert_eq!(chunk1.num_elems(), num_elems * 2);

        let chunk2 = store.get_chunk(key2).unwrap();
        assert_eq!(chunk2.encoding(), Some(Encoding::Raw { width: 4 }));
        let stats2 = chunk2.stats();
        assert_eq!(stats2.min, Some(Datum::Int(-99)));
        assert_eq!(stats2.max, Some(Datum::Int(0)));

        // a value outside the 8-bit range must be rejected
        let wide = 200i32.to_le_bytes();
        let err = chunk1.append(&wide, 1).unwrap_err();
        assert!(matches!(err, Error::EncodingOverflow { value: 200, .. }));
        // and must not corrupt the element count
        assert_eq!(chunk1.num_elems(), num_elems * 2);
    }

    #[test]
    fn checkpoint_then_reopen_is_identical() {
        let dir = test_helpers::tmp_dir().unwrap();
        let keys: Vec<ChunkKey> = (0..4).map(|i| ChunkKey::new(1, 1, i, 0)).collect();
        let mut expected = Vec::new();
        {
            let store = PageStore::open(dir.path()).unwrap();
            for (i, key) in keys.iter().enumerate() {
                let chunk = store.create_chunk(*key, 4096).unwrap();
                let data = le_ints(0..(1000 * (i as i32 + 1)));
                chunk.write(0, &data).unwrap();
                expected.push(data);
            }
            store.checkpoint().unwrap();
        }
        let store = PageStore::open(dir.path()).unwrap();
        for (key, want) in keys.iter().zip(&expected) {
            let chunk = store.get_chunk(*key).unwrap();
            assert_eq!(&chunk.read_all().unwrap(), want);
        }
    }

    #[test]
    fn uncheckpointed_writes_are_invisible_after_reopen() {
        let dir = test_helpers::tmp_dir().unwrap();
        let key = ChunkKey::new(1, 2, 3, 4);
        {
            let store = PageStore::open(dir.path()).unwrap();
            let chunk = store.create_chunk(key, 4096).unwrap();
            chunk.write(0, &le_ints(0..1000)).unwrap();
            store.checkpoint().unwrap();
            // a second batch that never checkpoints
            chunk.write(4000, &le_ints(0..1000)).unwrap();
        }
        let store = PageStore::open(dir.path()).unwrap();
        let chunk = store.get_chunk(key).unwrap();
        assert_eq!(chunk.size(), 4000);
    }
}
