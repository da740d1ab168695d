//! Shared ownership of count-distinct state and group buffers.
//!
//! Aggregate slots never carry pointers: a count-distinct slot stores an id
//! handed out by the query's [`RowSetMemoryOwner`], and everything the id
//! refers to is freed when the owner drops. Result-set copies share the
//! owner.
use std::collections::BTreeSet;

use parking_lot::Mutex;

use crate::descriptor::{CountDistinctDescriptor, CountDistinctImplType};

/// Resolves the ids stored in count-distinct slots.
#[derive(Debug, Default)]
pub struct RowSetMemoryOwner {
    state: Mutex<OwnerState>,
}

#[derive(Debug, Default)]
struct OwnerState {
    bitmaps: Vec<Vec<u8>>,
    sets: Vec<BTreeSet<i64>>,
}

impl RowSetMemoryOwner {
    /// Allocate the backing state for one count-distinct slot and return
    /// its id.
    pub fn allocate_distinct(&self, desc: &CountDistinctDescriptor) -> i64 {
        let mut state = self.state.lock();
        match desc.impl_type {
            CountDistinctImplType::Bitmap => {
                state.bitmaps.push(vec![0u8; desc.bitmap_size_bytes()]);
                (state.bitmaps.len() - 1) as i64
            }
            CountDistinctImplType::OrderedSet => {
                state.sets.push(BTreeSet::new());
                (state.sets.len() - 1) as i64
            }
        }
    }

    /// Record `value` in the distinct state `id`.
    pub fn insert_distinct(&self, desc: &CountDistinctDescriptor, id: i64, value: i64) {
        let mut state = self.state.lock();
        match desc.impl_type {
            CountDistinctImplType::Bitmap => {
                let bit = (value - desc.min_val) as usize;
                let bitmap = &mut state.bitmaps[id as usize];
                if bit / 8 < bitmap.len() {
                    bitmap[bit / 8] |= 1 << (bit % 8);
                }
            }
            CountDistinctImplType::OrderedSet => {
                state.sets[id as usize].insert(value);
            }
        }
    }

    /// Merge distinct state `src` into `dst`: bitmap OR, or set union. The
    /// bitmap length in bytes comes from the descriptor.
    pub fn unify_distinct(&self, desc: &CountDistinctDescriptor, dst: i64, src: i64) {
        if dst == src {
            return;
        }
        let mut state = self.state.lock();
        match desc.impl_type {
            CountDistinctImplType::Bitmap => {
                let n = desc.bitmap_size_bytes();
                let (dst_i, src_i) = (dst as usize, src as usize);
                debug_assert!(state.bitmaps[dst_i].len() >= n && state.bitmaps[src_i].len() >= n);
                for byte in 0..n {
                    let s = state.bitmaps[src_i][byte];
                    state.bitmaps[dst_i][byte] |= s;
                }
            }
            CountDistinctImplType::OrderedSet => {
                let src_set = state.sets[src as usize].clone();
                state.sets[dst as usize].extend(src_set);
            }
        }
    }

    /// Cardinality of the distinct state `id`.
    pub fn distinct_count(&self, desc: &CountDistinctDescriptor, id: i64) -> i64 {
        if id < 0 {
            return 0;
        }
        let state = self.state.lock();
        match desc.impl_type {
            CountDistinctImplType::Bitmap => state.bitmaps[id as usize]
                .iter()
                .map(|b| b.count_ones() as i64)
                .sum(),
            CountDistinctImplType::OrderedSet => state.sets[id as usize].len() as i64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bitmap_desc() -> CountDistinctDescriptor {
        CountDistinctDescriptor {
            impl_type: CountDistinctImplType::Bitmap,
            min_val: 10,
            bitmap_sz_bits: 20,
        }
    }

    #[test]
    fn bitmap_insert_and_unify() {
        let owner = RowSetMemoryOwner::default();
        let desc = bitmap_desc();
        let a = owner.allocate_distinct(&desc);
        let b = owner.allocate_distinct(&desc);
        owner.insert_distinct(&desc, a, 10);
        owner.insert_distinct(&desc, a, 12);
        owner.insert_distinct(&desc, b, 12);
        owner.insert_distinct(&desc, b, 29);
        assert_eq!(owner.distinct_count(&desc, a), 2);
        assert_eq!(owner.distinct_count(&desc, b), 2);
        owner.unify_distinct(&desc, a, b);
        assert_eq!(owner.distinct_count(&desc, a), 3);
    }

    #[test]
    fn set_union() {
        let owner = RowSetMemoryOwner::default();
        let desc = CountDistinctDescriptor {
            impl_type: CountDistinctImplType::OrderedSet,
            min_val: 0,
            bitmap_sz_bits: 0,
        };
        let a = owner.allocate_distinct(&desc);
        let b = owner.allocate_distinct(&desc);
        for v in [1, 5, 9] {
            owner.insert_distinct(&desc, a, v);
        }
        for v in [5, 100] {
            owner.insert_distinct(&desc, b, v);
        }
        owner.unify_distinct(&desc, a, b);
        assert_eq!(owner.distinct_count(&desc, a), 4);
    }
}
