//! A persisted bijection between strings and dense 32-bit ids.
//!
//! One dictionary backs every dictionary-encoded column that shares its
//! dictionary id. The on-disk form is an append-only file of length-prefixed
//! entries; an id is the position of its entry, so the file alone
//! reconstructs the full bijection.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use hashbrown::HashMap;
use parking_lot::RwLock;
use snafu::{ResultExt, Snafu};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("i/o failure on {}: {source}", path.display()))]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("corrupt dictionary entry at offset {offset}"))]
    Corrupt { offset: usize },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The id handed out for strings that are not in the dictionary.
pub const INVALID_STR_ID: i32 = -1;

#[derive(Debug, Default)]
struct Bijection {
    strings: Vec<String>,
    ids: HashMap<String, i32>,
}

/// A string dictionary persisted at a fixed path.
#[derive(Debug)]
pub struct StringDictionary {
    path: PathBuf,
    state: RwLock<Bijection>,
}

impl StringDictionary {
    /// Open (creating if necessary) the dictionary persisted at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut state = Bijection::default();

        match File::open(&path) {
            Ok(mut file) => {
                let mut data = Vec::new();
                file.read_to_end(&mut data).context(IoSnafu { path: &path })?;
                let mut pos = 0usize;
                while pos < data.len() {
                    if pos + 4 > data.len() {
                        return CorruptSnafu { offset: pos }.fail();
                    }
                    let len =
                        u32::from_le_bytes(data[pos..pos + 4].try_into().unwrap()) as usize;
                    if pos + 4 + len > data.len() {
                        return CorruptSnafu { offset: pos }.fail();
                    }
                    let s = std::str::from_utf8(&data[pos + 4..pos + 4 + len])
                        .map_err(|_| CorruptSnafu { offset: pos }.build())?
                        .to_owned();
                    let id = state.strings.len() as i32;
                    state.ids.insert(s.clone(), id);
                    state.strings.push(s);
                    pos += 4 + len;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => return Err(Error::Io { path, source }),
        }

        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    /// Number of strings in the dictionary.
    pub fn len(&self) -> usize {
        self.state.read().strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The id for `s`, or [`INVALID_STR_ID`] when absent.
    pub fn get_id(&self, s: &str) -> i32 {
        self.state.read().ids.get(s).copied().unwrap_or(INVALID_STR_ID)
    }

    /// The string for `id`, when the id is in range.
    pub fn get_string(&self, id: i32) -> Option<String> {
        if id < 0 {
            return None;
        }
        self.state.read().strings.get(id as usize).cloned()
    }

    /// The id for `s`, inserting and persisting it when absent.
    pub fn get_or_add(&self, s: &str) -> Result<i32> {
        if let Some(id) = self.state.read().ids.get(s) {
            return Ok(*id);
        }
        let mut state = self.state.write();
        // raced with another inserter?
        if let Some(id) = state.ids.get(s) {
            return Ok(*id);
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .context(IoSnafu { path: &self.path })?;
        file.write_all(&(s.len() as u32).to_le_bytes())
            .context(IoSnafu { path: &self.path })?;
        file.write_all(s.as_bytes())
            .context(IoSnafu { path: &self.path })?;
        file.sync_all().context(IoSnafu { path: &self.path })?;

        let id = state.strings.len() as i32;
        state.ids.insert(s.to_owned(), id);
        state.strings.push(s.to_owned());
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_dense_and_stable() {
        let dir = test_helpers::tmp_dir().unwrap();
        let path = dir.path().join("dict.0");
        let dict = StringDictionary::open(&path).unwrap();
        assert_eq!(dict.get_or_add("foo").unwrap(), 0);
        assert_eq!(dict.get_or_add("bar").unwrap(), 1);
        assert_eq!(dict.get_or_add("foo").unwrap(), 0);
        assert_eq!(dict.get_id("bar"), 1);
        assert_eq!(dict.get_id("baz"), INVALID_STR_ID);
        assert_eq!(dict.get_string(1).as_deref(), Some("bar"));
        assert_eq!(dict.get_string(7), None);
    }

    #[test]
    fn survives_reopen() {
        let dir = test_helpers::tmp_dir().unwrap();
        let path = dir.path().join("dict.0");
        {
            let dict = StringDictionary::open(&path).unwrap();
            for s in ["a", "b", "c"] {
                dict.get_or_add(s).unwrap();
            }
        }
        let dict = StringDictionary::open(&path).unwrap();
        assert_eq!(dict.len(), 3);
        assert_eq!(dict.get_id("c"), 2);
        assert_eq!(dict.get_or_add("d").unwrap(), 3);
    }
}
