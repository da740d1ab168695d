//! Backing page files and free-page bookkeeping.
//!
//! Each file holds pages of a single size class: a small fixed header
//! followed by `num_pages` fixed-size pages. Exhaustion of a size class
//! extends its newest file by the configured growth step, creating a new
//! file for a class seen for the first time.
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use hashbrown::HashMap;
use observability_deps::tracing::debug;
use snafu::{ensure, ResultExt};

use crate::page::{Page, PageHeader, PAGE_HEADER_LEN};
use crate::{CorruptSnafu, IoSnafu, NoSpaceSnafu, Result};

const FILE_MAGIC: u32 = 0x5046_494c; // "PFIL"
const FILE_HEADER_LEN: u64 = 16;

pub(crate) struct PageFile {
    file: File,
    path: PathBuf,
    pub(crate) file_id: i32,
    pub(crate) page_size: usize,
    pub(crate) num_pages: u32,
}

impl std::fmt::Debug for PageFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageFile")
            .field("path", &self.path)
            .field("file_id", &self.file_id)
            .field("page_size", &self.page_size)
            .field("num_pages", &self.num_pages)
            .finish()
    }
}

impl PageFile {
    fn create(dir: &Path, file_id: i32, page_size: usize) -> Result<Self> {
        let path = dir.join(format!("{file_id}.data"));
        let file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(&path)
            .context(IoSnafu {
                path: path.clone(),
            })?;
        let mut pf = Self {
            file,
            path,
            file_id,
            page_size,
            num_pages: 0,
        };
        pf.write_file_header()?;
        Ok(pf)
    }

    pub(crate) fn open(path: &Path) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .context(IoSnafu { path })?;
        let mut hdr = [0u8; FILE_HEADER_LEN as usize];
        file.seek(SeekFrom::Start(0)).context(IoSnafu { path })?;
        file.read_exact(&mut hdr).context(IoSnafu { path })?;
        let magic = u32::from_le_bytes(hdr[..4].try_into().unwrap());
        ensure!(
            magic == FILE_MAGIC,
            CorruptSnafu {
                what: "bad page file magic"
            }
        );
        let file_id = i32::from_le_bytes(hdr[4..8].try_into().unwrap());
        let page_size = u32::from_le_bytes(hdr[8..12].try_into().unwrap()) as usize;
        let num_pages = u32::from_le_bytes(hdr[12..16].try_into().unwrap());
        Ok(Self {
            file,
            path: path.to_path_buf(),
            file_id,
            page_size,
            num_pages,
        })
    }

    fn write_file_header(&mut self) -> Result<()> {
        let mut hdr = [0u8; FILE_HEADER_LEN as usize];
        hdr[..4].copy_from_slice(&FILE_MAGIC.to_le_bytes());
        hdr[4..8].copy_from_slice(&self.file_id.to_le_bytes());
        hdr[8..12].copy_from_slice(&(self.page_size as u32).to_le_bytes());
        hdr[12..16].copy_from_slice(&self.num_pages.to_le_bytes());
        self.file
            .seek(SeekFrom::Start(0))
            .context(IoSnafu { path: &self.path })?;
        self.file
            .write_all(&hdr)
            .context(IoSnafu { path: &self.path })?;
        Ok(())
    }

    fn page_offset(&self, page_id: u32) -> u64 {
        FILE_HEADER_LEN + page_id as u64 * self.page_size as u64
    }

    /// Capacity of one page's payload region.
    pub(crate) fn payload_capacity(&self) -> usize {
        self.page_size - PAGE_HEADER_LEN
    }

    pub(crate) fn read_page_header(&mut self, page_id: u32) -> Result<PageHeader> {
        let mut buf = [0u8; PAGE_HEADER_LEN];
        let off = self.page_offset(page_id);
        self.file
            .seek(SeekFrom::Start(off))
            .context(IoSnafu { path: &self.path })?;
        self.file
            .read_exact(&mut buf)
            .context(IoSnafu { path: &self.path })?;
        PageHeader::decode(&buf)
    }

    pub(crate) fn write_page_header(&mut self, page_id: u32, header: &PageHeader) -> Result<()> {
        let off = self.page_offset(page_id);
        self.file
            .seek(SeekFrom::Start(off))
            .context(IoSnafu { path: &self.path })?;
        self.file
            .write_all(&header.encode())
            .context(IoSnafu { path: &self.path })?;
        Ok(())
    }

    /// Read `buf.len()` payload bytes starting at `offset` within the page's
    /// payload region.
    pub(crate) fn read_payload(&mut self, page_id: u32, offset: usize, buf: &mut [u8]) -> Result<()> {
        debug_assert!(offset + buf.len() <= self.payload_capacity());
        let off = self.page_offset(page_id) + PAGE_HEADER_LEN as u64 + offset as u64;
        self.file
            .seek(SeekFrom::Start(off))
            .context(IoSnafu { path: &self.path })?;
        self.file
            .read_exact(buf)
            .context(IoSnafu { path: &self.path })?;
        Ok(())
    }

    pub(crate) fn write_payload(&mut self, page_id: u32, offset: usize, data: &[u8]) -> Result<()> {
        debug_assert!(offset + data.len() <= self.payload_capacity());
        let off = self.page_offset(page_id) + PAGE_HEADER_LEN as u64 + offset as u64;
        self.file
            .seek(SeekFrom::Start(off))
            .context(IoSnafu { path: &self.path })?;
        self.file
            .write_all(data)
            .context(IoSnafu { path: &self.path })?;
        Ok(())
    }

    /// Append `n` pages with `Free` headers; returns the new page ids.
    fn extend(&mut self, n: usize) -> Result<Vec<u32>> {
        let first = self.num_pages;
        let free_header = PageHeader::free().encode();
        // zero-fill the new region so page payloads are defined on disk
        let zeroes = vec![0u8; self.page_size - PAGE_HEADER_LEN];
        for i in 0..n {
            let page_id = first + i as u32;
            let off = self.page_offset(page_id);
            let res = (|| {
                self.file.seek(SeekFrom::Start(off))?;
                self.file.write_all(&free_header)?;
                self.file.write_all(&zeroes)?;
                Ok::<_, std::io::Error>(())
            })();
            if let Err(source) = res {
                // filesystem refused to grow the backing file
                debug!(%source, file_id = self.file_id, "page file extension failed");
                return NoSpaceSnafu {
                    page_size: self.page_size,
                }
                .fail();
            }
        }
        self.num_pages = first + n as u32;
        self.write_file_header()?;
        Ok((first..self.num_pages).collect())
    }

    pub(crate) fn sync(&mut self) -> Result<()> {
        self.file.sync_all().context(IoSnafu { path: &self.path })
    }
}

/// All page files of a store plus the per-size-class free lists.
#[derive(Debug)]
pub(crate) struct FileSet {
    dir: PathBuf,
    growth_pages: usize,
    files: HashMap<i32, PageFile>,
    /// Newest file id per size class, extension target.
    class_tail: HashMap<usize, i32>,
    free: HashMap<usize, Vec<Page>>,
    next_file_id: i32,
}

impl FileSet {
    pub(crate) fn new(dir: PathBuf, growth_pages: usize) -> Self {
        Self {
            dir,
            growth_pages,
            files: HashMap::new(),
            class_tail: HashMap::new(),
            free: HashMap::new(),
            next_file_id: 0,
        }
    }

    pub(crate) fn insert_opened(&mut self, pf: PageFile) {
        self.next_file_id = self.next_file_id.max(pf.file_id + 1);
        self.class_tail
            .entry(pf.page_size)
            .and_modify(|tail| *tail = (*tail).max(pf.file_id))
            .or_insert(pf.file_id);
        self.files.insert(pf.file_id, pf);
    }

    pub(crate) fn files_mut(&mut self) -> impl Iterator<Item = &mut PageFile> {
        self.files.values_mut()
    }

    pub(crate) fn file_mut(&mut self, file_id: i32) -> &mut PageFile {
        self.files.get_mut(&file_id).expect("known page file")
    }

    pub(crate) fn mark_free(&mut self, page_size: usize, page: Page) {
        self.free.entry(page_size).or_default().push(page);
    }

    /// Hand out one free page of the requested size class, extending the
    /// backing storage when the class is exhausted.
    pub(crate) fn allocate(&mut self, page_size: usize) -> Result<Page> {
        ensure!(
            page_size > PAGE_HEADER_LEN,
            NoSpaceSnafu { page_size }
        );
        if let Some(page) = self.free.get_mut(&page_size).and_then(Vec::pop) {
            return Ok(page);
        }

        let file_id = match self.class_tail.get(&page_size) {
            Some(id) => *id,
            None => {
                let id = self.next_file_id;
                self.next_file_id += 1;
                let pf = PageFile::create(&self.dir, id, page_size)?;
                debug!(file_id = id, page_size, "created page file");
                self.class_tail.insert(page_size, id);
                self.files.insert(id, pf);
                id
            }
        };

        let new_ids = self.files.get_mut(&file_id).unwrap().extend(self.growth_pages)?;
        let free = self.free.entry(page_size).or_default();
        free.extend(new_ids.into_iter().map(|page_id| Page::new(file_id, page_id)));
        Ok(free.pop().expect("growth step produced pages"))
    }
}
