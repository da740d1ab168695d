//! The query memory descriptor: the shape declaration of the aggregation
//! buffer a compiled kernel writes into.
use data_types::{AggKind, TargetInfo};
use hashbrown::HashMap;

/// Group-by buffer layout strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupByColRangeType {
    /// Statically known range, only possible for column expressions.
    OneColKnownRange,
    /// Best guess: a hash buffer for the guess plus a small overflow buffer
    /// for outliers.
    OneColGuessedRange,
    MultiCol,
    MultiColPerfectHash,
    /// The plan is not a group-by plan.
    Scan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountDistinctImplType {
    Bitmap,
    OrderedSet,
}

/// How one COUNT(DISTINCT ..) target stores what it has seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountDistinctDescriptor {
    pub impl_type: CountDistinctImplType,
    pub min_val: i64,
    pub bitmap_sz_bits: i64,
}

impl CountDistinctDescriptor {
    /// Bitmap size in bytes; only meaningful for the bitmap implementation.
    pub fn bitmap_size_bytes(&self) -> usize {
        debug_assert!(self.impl_type == CountDistinctImplType::Bitmap);
        let bits = self.bitmap_sz_bits as usize;
        bits / 8 + usize::from(bits % 8 != 0)
    }
}

/// The key slot value marking an unclaimed group entry.
pub const EMPTY_KEY: i64 = i64::MIN;

/// Slot id marking a count-distinct slot with no allocation yet.
pub const EMPTY_DISTINCT_ID: i64 = -1;

/// The normalized in-slot null sentinel for integer-like values. Kernels
/// normalize narrower column sentinels to this on load.
pub const NULL_INT: i64 = i64::MIN;

/// The normalized null sentinel for floating point slots.
pub const NULL_DOUBLE: f64 = f64::MIN;

/// Shape of the aggregation buffer for one query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryMemoryDescriptor {
    pub hash_type: GroupByColRangeType,
    /// No key columns are materialised; the entry position implies the key.
    pub keyless: bool,
    /// Compact byte widths per group key column.
    pub group_col_widths: Vec<i8>,
    /// Compact byte widths per aggregate slot.
    pub agg_col_widths: Vec<i8>,
    /// Entries in the main buffer.
    pub entry_count: usize,
    /// Entries in the small overflow buffer.
    pub entry_count_small: usize,
    /// Lowest group key value for the known-range and perfect-hash layouts.
    pub min_val: i64,
    /// Per-key inclusive ranges, used by the perfect-hash layout.
    pub key_ranges: Vec<(i64, i64)>,
    /// One contiguous column per slot instead of rowwise entries.
    pub output_columnar: bool,
    /// Keyed by target index.
    pub count_distinct_descriptors: HashMap<usize, CountDistinctDescriptor>,
}

impl QueryMemoryDescriptor {
    /// A descriptor for a plain scan / keyless aggregation.
    pub fn scan(agg_col_widths: Vec<i8>) -> Self {
        Self {
            hash_type: GroupByColRangeType::Scan,
            keyless: true,
            group_col_widths: Vec::new(),
            agg_col_widths,
            entry_count: 1,
            entry_count_small: 0,
            min_val: 0,
            key_ranges: Vec::new(),
            output_columnar: false,
            count_distinct_descriptors: HashMap::new(),
        }
    }

    pub fn key_count(&self) -> usize {
        self.group_col_widths.len()
    }

    pub fn slot_count(&self) -> usize {
        self.agg_col_widths.len()
    }

    fn entry_width(&self) -> usize {
        self.key_count() + self.slot_count()
    }

    /// Index of group key `key_idx` of entry `entry` in the main buffer.
    pub fn key_offset(&self, entry: usize, key_idx: usize) -> usize {
        if self.output_columnar {
            key_idx * self.entry_count + entry
        } else {
            entry * self.entry_width() + key_idx
        }
    }

    /// Index of aggregate slot `slot_idx` of entry `entry` in the main
    /// buffer.
    pub fn slot_offset(&self, entry: usize, slot_idx: usize) -> usize {
        if self.output_columnar {
            (self.key_count() + slot_idx) * self.entry_count + entry
        } else {
            entry * self.entry_width() + self.key_count() + slot_idx
        }
    }

    fn small_key_offset(&self, entry: usize, key_idx: usize) -> usize {
        entry * self.entry_width() + key_idx
    }

    pub fn small_slot_offset(&self, entry: usize, slot_idx: usize) -> usize {
        entry * self.entry_width() + self.key_count() + slot_idx
    }

    /// Allocate and initialise the group buffers: key slots empty, aggregate
    /// slots at their initial values.
    pub fn create_buffers(&self, init_vals: &[i64]) -> GroupBuffers {
        debug_assert_eq!(init_vals.len(), self.slot_count());
        let mut main = vec![0i64; self.entry_count * self.entry_width()];
        for entry in 0..self.entry_count {
            for k in 0..self.key_count() {
                main[self.key_offset(entry, k)] = EMPTY_KEY;
            }
            for (s, init) in init_vals.iter().enumerate() {
                main[self.slot_offset(entry, s)] = *init;
            }
        }
        let mut small = vec![0i64; self.entry_count_small * self.entry_width()];
        for entry in 0..self.entry_count_small {
            for k in 0..self.key_count() {
                small[self.small_key_offset(entry, k)] = EMPTY_KEY;
            }
            for (s, init) in init_vals.iter().enumerate() {
                small[self.small_slot_offset(entry, s)] = *init;
            }
        }
        GroupBuffers { main, small }
    }

    /// Find (claiming if new) the entry for `keys`. `None` means both
    /// buffers are exhausted and the kernel must report an overflow.
    pub fn group_entry(&self, bufs: &mut GroupBuffers, keys: &[i64]) -> Option<GroupEntry> {
        match self.hash_type {
            GroupByColRangeType::Scan => Some(GroupEntry::Main(0)),
            GroupByColRangeType::OneColKnownRange => {
                let idx = keys[0].checked_sub(self.min_val)?;
                if idx < 0 || idx as usize >= self.entry_count {
                    return None;
                }
                let idx = idx as usize;
                bufs.main[self.key_offset(idx, 0)] = keys[0];
                Some(GroupEntry::Main(idx))
            }
            GroupByColRangeType::MultiColPerfectHash => {
                let mut idx = 0usize;
                let mut stride = 1usize;
                for (k, (lo, hi)) in keys.iter().zip(&self.key_ranges) {
                    if k < lo || k > hi {
                        return None;
                    }
                    idx += (k - lo) as usize * stride;
                    stride *= (hi - lo + 1) as usize;
                }
                if idx >= self.entry_count {
                    return None;
                }
                for (i, k) in keys.iter().enumerate() {
                    bufs.main[self.key_offset(idx, i)] = *k;
                }
                Some(GroupEntry::Main(idx))
            }
            GroupByColRangeType::OneColGuessedRange | GroupByColRangeType::MultiCol => {
                if let Some(entry) = self.probe(bufs, keys) {
                    return Some(entry);
                }
                // main buffer exhausted; spill to the small buffer
                self.probe_small(bufs, keys)
            }
        }
    }

    fn probe(&self, bufs: &mut GroupBuffers, keys: &[i64]) -> Option<GroupEntry> {
        if self.entry_count == 0 {
            return None;
        }
        let start = hash_keys(keys) as usize % self.entry_count;
        for i in 0..self.entry_count {
            let entry = (start + i) % self.entry_count;
            let first = bufs.main[self.key_offset(entry, 0)];
            if first == EMPTY_KEY {
                for (k, v) in keys.iter().enumerate() {
                    bufs.main[self.key_offset(entry, k)] = *v;
                }
                return Some(GroupEntry::Main(entry));
            }
            if (0..keys.len()).all(|k| bufs.main[self.key_offset(entry, k)] == keys[k]) {
                return Some(GroupEntry::Main(entry));
            }
        }
        None
    }

    fn probe_small(&self, bufs: &mut GroupBuffers, keys: &[i64]) -> Option<GroupEntry> {
        for entry in 0..self.entry_count_small {
            let first = bufs.small[self.small_key_offset(entry, 0)];
            if first == EMPTY_KEY {
                for (k, v) in keys.iter().enumerate() {
                    bufs.small[self.small_key_offset(entry, k)] = *v;
                }
                return Some(GroupEntry::Small(entry));
            }
            if (0..keys.len()).all(|k| bufs.small[self.small_key_offset(entry, k)] == keys[k]) {
                return Some(GroupEntry::Small(entry));
            }
        }
        None
    }
}

/// Where a group landed: the main buffer or the small overflow buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupEntry {
    Main(usize),
    Small(usize),
}

/// Raw aggregation storage: 64-bit slots, laid out per the descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupBuffers {
    pub main: Vec<i64>,
    pub small: Vec<i64>,
}

fn hash_keys(keys: &[i64]) -> u64 {
    let mut h = 0xcbf2_9ce4_8422_2325u64;
    for k in keys {
        h ^= *k as u64;
        h = h.wrapping_mul(0x1000_0000_01b3);
    }
    h
}

/// The initial slot values for a target, one per occupied slot.
///
/// Aggregates that skip the null sentinel start at the sentinel so an
/// all-null group surfaces as null; MIN/MAX start at the identity of their
/// lattice; COUNT starts at zero.
pub fn initial_slot_values(target: &TargetInfo) -> Vec<i64> {
    let Some(kind) = target.agg_kind else {
        return vec![0];
    };
    if target.is_distinct {
        return vec![EMPTY_DISTINCT_ID];
    }
    let fp = target.sql_type.is_fp();
    match kind {
        AggKind::Count => vec![0],
        AggKind::Sum => vec![null_init(target, fp)],
        AggKind::Avg => vec![if fp { 0f64.to_bits() as i64 } else { 0 }, 0],
        AggKind::Min => vec![if fp {
            f64::INFINITY.to_bits() as i64
        } else {
            i64::MAX
        }],
        AggKind::Max => vec![if fp {
            f64::NEG_INFINITY.to_bits() as i64
        } else {
            i64::MIN
        }],
    }
}

fn null_init(target: &TargetInfo, fp: bool) -> i64 {
    if !target.skip_null_val {
        return if fp { 0f64.to_bits() as i64 } else { 0 };
    }
    if fp {
        NULL_DOUBLE.to_bits() as i64
    } else {
        NULL_INT
    }
}

/// Initial values for every slot of a target list, in slot order.
pub fn initial_values(targets: &[TargetInfo]) -> Vec<i64> {
    targets.iter().flat_map(|t| initial_slot_values(t)).collect()
}
