//! Hoisted literal buffers.
//!
//! Constants referenced by a query are serialized into one byte buffer the
//! kernel receives as an argument, so the compiled code contains only loads.
//! The builder deduplicates by `(value, type)` and hands out stable 16-bit
//! offsets; values are word-aligned per type.
use data_types::{Datum, SqlType};
use hashbrown::HashMap;

use crate::{CompilationFailedSnafu, Result};

/// One packed literal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum LitKey {
    I16(i16),
    I32(i32),
    I64(i64),
    F32(u32),
    F64(u64),
    /// Length-prefixed bytes, for LIKE patterns against real strings.
    Bytes(Vec<u8>),
}

impl LitKey {
    fn width(&self) -> usize {
        match self {
            Self::I16(_) => 2,
            Self::I32(_) | Self::F32(_) => 4,
            Self::I64(_) | Self::F64(_) => 8,
            Self::Bytes(b) => 4 + b.len(),
        }
    }

    fn alignment(&self) -> usize {
        match self {
            Self::I16(_) => 2,
            Self::I32(_) | Self::F32(_) | Self::Bytes(_) => 4,
            Self::I64(_) | Self::F64(_) => 8,
        }
    }
}

/// Builds the literal buffer for one query.
#[derive(Debug, Default)]
pub struct LiteralBuffer {
    entries: Vec<(LitKey, u16)>,
    offsets: HashMap<LitKey, u16>,
    len: usize,
}

impl LiteralBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn intern(&mut self, key: LitKey) -> Result<u16> {
        if let Some(off) = self.offsets.get(&key) {
            return Ok(*off);
        }
        let align = key.alignment();
        let padded = (self.len + align - 1) / align * align;
        let end = padded + key.width();
        if end > u16::MAX as usize {
            return CompilationFailedSnafu {
                what: "literal buffer exceeds 16-bit addressing",
            }
            .fail();
        }
        let off = padded as u16;
        self.offsets.insert(key.clone(), off);
        self.entries.push((key, off));
        self.len = end;
        Ok(off)
    }

    /// The stable offset for `value` of `ty`, interning it on first sight.
    /// Dictionary-encoded string literals intern as their 32-bit ids,
    /// resolved by the caller.
    pub fn offset_of(&mut self, value: &Datum, ty: SqlType) -> Result<u16> {
        let key = match (value, ty) {
            (Datum::Int(v), SqlType::SmallInt) => LitKey::I16(*v as i16),
            (Datum::Int(v), SqlType::Int) => LitKey::I32(*v as i32),
            (Datum::Int(v), _) if ty.is_integer() || ty.is_time() => LitKey::I64(*v),
            (Datum::Bool(b), _) => LitKey::I16(*b as i16),
            (Datum::Double(v), SqlType::Float) => LitKey::F32((v.0 as f32).to_bits()),
            (Datum::Double(v), _) => LitKey::F64(v.0.to_bits()),
            (Datum::Int(v), SqlType::Text { dict_id: Some(_) }) => LitKey::I32(*v as i32),
            (Datum::Str(s), _) => LitKey::Bytes(s.as_bytes().to_vec()),
            (value, ty) => {
                return CompilationFailedSnafu {
                    what: format!("cannot hoist literal {value:?} as {ty}"),
                }
                .fail()
            }
        };
        self.intern(key)
    }

    /// The id literal for a dictionary-encoded string.
    pub fn offset_of_string_id(&mut self, id: i32) -> Result<u16> {
        self.intern(LitKey::I32(id))
    }

    /// Serialize into the byte buffer passed to the kernel.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.len];
        for (key, off) in &self.entries {
            let off = *off as usize;
            match key {
                LitKey::I16(v) => buf[off..off + 2].copy_from_slice(&v.to_le_bytes()),
                LitKey::I32(v) => buf[off..off + 4].copy_from_slice(&v.to_le_bytes()),
                LitKey::I64(v) => buf[off..off + 8].copy_from_slice(&v.to_le_bytes()),
                LitKey::F32(v) => buf[off..off + 4].copy_from_slice(&v.to_le_bytes()),
                LitKey::F64(v) => buf[off..off + 8].copy_from_slice(&v.to_le_bytes()),
                LitKey::Bytes(b) => {
                    buf[off..off + 4].copy_from_slice(&(b.len() as u32).to_le_bytes());
                    buf[off + 4..off + 4 + b.len()].copy_from_slice(b);
                }
            }
        }
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_by_value_and_type() {
        let mut lits = LiteralBuffer::new();
        let a = lits.offset_of(&Datum::Int(7), SqlType::BigInt).unwrap();
        let b = lits.offset_of(&Datum::Int(7), SqlType::BigInt).unwrap();
        assert_eq!(a, b);
        // same value, different type: distinct slot
        let c = lits.offset_of(&Datum::Int(7), SqlType::Int).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn word_alignment_per_type() {
        let mut lits = LiteralBuffer::new();
        let a = lits.offset_of(&Datum::Int(1), SqlType::SmallInt).unwrap();
        let b = lits.offset_of(&Datum::Int(2), SqlType::BigInt).unwrap();
        assert_eq!(a, 0);
        assert_eq!(b % 8, 0);
        let buf = lits.serialize();
        assert_eq!(
            i64::from_le_bytes(buf[b as usize..b as usize + 8].try_into().unwrap()),
            2
        );
        assert_eq!(i16::from_le_bytes(buf[0..2].try_into().unwrap()), 1);
    }

    #[test]
    fn strings_serialize_length_prefixed() {
        let mut lits = LiteralBuffer::new();
        let off = lits
            .offset_of(&Datum::Str("ab%".into()), SqlType::Text { dict_id: None })
            .unwrap() as usize;
        let buf = lits.serialize();
        let len = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap()) as usize;
        assert_eq!(&buf[off + 4..off + 4 + len], b"ab%");
    }
}
