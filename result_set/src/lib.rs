//! Result sets: grouped aggregate buffers materialised into rows, the
//! reduction operator that merges per-device and per-fragment partials, and
//! stable sorting of the final rows.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use data_types::{AggKind, TargetInfo};
use hashbrown::HashMap;
use observability_deps::tracing::debug;

mod descriptor;
mod owner;

pub use descriptor::{
    initial_slot_values, initial_values, CountDistinctDescriptor, CountDistinctImplType,
    GroupBuffers, GroupByColRangeType, GroupEntry, QueryMemoryDescriptor, EMPTY_DISTINCT_ID,
    EMPTY_KEY, NULL_DOUBLE, NULL_INT,
};
pub use owner::RowSetMemoryOwner;

/// Resolves dictionary-encoded string ids during sorting and iteration.
pub trait DictResolver {
    fn lookup(&self, dict_id: i32, string_id: i32) -> Option<String>;
}

/// A scalar value surfaced to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    Null,
    Int(i64),
    Double(f64),
    Str(String),
}

/// One materialised aggregate slot. Count-distinct slots carry an id
/// resolved through the row-set memory owner, never a pointer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SlotVal {
    Null,
    Int(i64),
    Double(f64),
    /// AVG over integer arguments: (sum, count).
    Pair(i64, i64),
    /// AVG over floating point arguments: (sum, count).
    DoublePair(f64, i64),
    Distinct(i64),
}

/// Group keys of one row; empty for keyless results.
type Key = Vec<i64>;

/// A row/column oriented buffer of grouped aggregates.
#[derive(Debug, Clone)]
pub struct ResultSet {
    targets: Vec<TargetInfo>,
    query_mem_desc: QueryMemoryDescriptor,
    owner: Arc<RowSetMemoryOwner>,
    keys: Vec<Key>,
    target_values: Vec<Vec<SlotVal>>,
}

impl ResultSet {
    /// An empty result set over `targets`.
    pub fn empty(targets: Vec<TargetInfo>, owner: Arc<RowSetMemoryOwner>) -> Self {
        let slot_widths = targets.iter().flat_map(|t| vec![8i8; t.slot_count()]).collect();
        Self {
            targets,
            query_mem_desc: QueryMemoryDescriptor::scan(slot_widths),
            owner,
            keys: Vec::new(),
            target_values: Vec::new(),
        }
    }

    /// Materialise rows out of the raw group buffers a kernel produced.
    pub fn from_group_buffers(
        targets: Vec<TargetInfo>,
        query_mem_desc: QueryMemoryDescriptor,
        owner: Arc<RowSetMemoryOwner>,
        buffers: &GroupBuffers,
    ) -> Self {
        let mut set = Self {
            targets,
            query_mem_desc,
            owner,
            keys: Vec::new(),
            target_values: Vec::new(),
        };
        set.materialize(buffers);
        set
    }

    /// Build a projection result from per-row raw output slots.
    pub fn from_slot_rows(
        targets: Vec<TargetInfo>,
        owner: Arc<RowSetMemoryOwner>,
        rows: &[Vec<i64>],
    ) -> Self {
        let mut set = Self::empty(targets, owner);
        for raw in rows {
            let row = set.decode_row(raw);
            set.keys.push(Vec::new());
            set.target_values.push(row);
        }
        set
    }

    pub fn targets(&self) -> &[TargetInfo] {
        &self.targets
    }

    pub fn owner(&self) -> &Arc<RowSetMemoryOwner> {
        &self.owner
    }

    pub fn is_empty(&self) -> bool {
        self.target_values.is_empty()
    }

    pub fn row_count(&self) -> usize {
        self.target_values.len()
    }

    fn key_count(&self) -> usize {
        self.query_mem_desc.key_count()
    }

    fn materialize(&mut self, buffers: &GroupBuffers) {
        let qmd = self.query_mem_desc.clone();
        let keyless = qmd.hash_type == GroupByColRangeType::Scan;
        for entry in 0..qmd.entry_count {
            if !keyless && buffers.main[qmd.key_offset(entry, 0)] == EMPTY_KEY {
                continue;
            }
            let key: Key = (0..qmd.key_count())
                .map(|k| buffers.main[qmd.key_offset(entry, k)])
                .collect();
            let raw: Vec<i64> = (0..qmd.slot_count())
                .map(|s| buffers.main[qmd.slot_offset(entry, s)])
                .collect();
            let row = self.decode_row(&raw);
            self.keys.push(key);
            self.target_values.push(row);
        }
        for entry in 0..qmd.entry_count_small {
            let base = entry * (qmd.key_count() + qmd.slot_count());
            if buffers.small[base] == EMPTY_KEY {
                continue;
            }
            let key: Key = buffers.small[base..base + qmd.key_count()].to_vec();
            let raw: Vec<i64> = (0..qmd.slot_count())
                .map(|s| buffers.small[qmd.small_slot_offset(entry, s)])
                .collect();
            let row = self.decode_row(&raw);
            self.keys.push(key);
            self.target_values.push(row);
        }
    }

    /// Decode one entry's raw slots into typed values, target by target.
    fn decode_row(&self, raw: &[i64]) -> Vec<SlotVal> {
        let mut out = Vec::with_capacity(self.targets.len());
        let mut slot = 0usize;
        for target in &self.targets {
            out.push(decode_slots(target, &raw[slot..slot + target.slot_count()]));
            slot += target.slot_count();
        }
        out
    }

    /// Merge `other` into `self` under the per-target reduction rules.
    ///
    /// Reduction is commutative and associative per target kind, so task
    /// completion order does not affect the final values.
    pub fn reduce(&mut self, other: Self) {
        if other.is_empty() {
            return;
        }
        if self.is_empty() {
            *self = other;
            return;
        }

        if self.key_count() == 0 {
            // keyless: exactly one row of aggregates on both sides
            debug_assert_eq!(self.row_count(), 1);
            debug_assert_eq!(other.row_count(), 1);
            let new_row = &other.target_values[0];
            for (idx, target) in self.targets.iter().enumerate() {
                let crt = &mut self.target_values[0][idx];
                reduce_slot(crt, &new_row[idx], target, idx, &self.query_mem_desc, &self.owner);
            }
            return;
        }

        debug!(
            rows = self.row_count(),
            other_rows = other.row_count(),
            "reducing grouped partials"
        );
        if self.key_count() == 1 {
            // single-column keys merge through an unordered map
            let mut map: HashMap<i64, Vec<SlotVal>> = HashMap::with_capacity(self.row_count());
            for (key, row) in self.keys.drain(..).zip(self.target_values.drain(..)) {
                map.insert(key[0], row);
            }
            for (key, row) in other.keys.into_iter().zip(other.target_values.into_iter()) {
                match map.entry(key[0]) {
                    hashbrown::hash_map::Entry::Vacant(v) => {
                        v.insert(row);
                    }
                    hashbrown::hash_map::Entry::Occupied(mut o) => {
                        merge_rows(o.get_mut(), &row, &self.targets, &self.query_mem_desc, &self.owner);
                    }
                }
            }
            for (key, row) in map {
                self.keys.push(vec![key]);
                self.target_values.push(row);
            }
        } else {
            // multi-column keys merge through an ordered map over tuples
            let mut map: BTreeMap<Key, Vec<SlotVal>> = BTreeMap::new();
            for (key, row) in self.keys.drain(..).zip(self.target_values.drain(..)) {
                map.insert(key, row);
            }
            for (key, row) in other.keys.into_iter().zip(other.target_values.into_iter()) {
                match map.entry(key) {
                    std::collections::btree_map::Entry::Vacant(v) => {
                        v.insert(row);
                    }
                    std::collections::btree_map::Entry::Occupied(mut o) => {
                        merge_rows(o.get_mut(), &row, &self.targets, &self.query_mem_desc, &self.owner);
                    }
                }
            }
            for (key, row) in map {
                self.keys.push(key);
                self.target_values.push(row);
            }
        }
    }

    /// Append `other`'s rows; the projection counterpart of [`Self::reduce`].
    pub fn append(&mut self, other: Self) {
        self.keys.extend(other.keys);
        self.target_values.extend(other.target_values);
    }

    /// Stable lexicographic sort: entries are applied right-to-left so the
    /// leftmost order entry dominates. Dictionary-encoded string targets
    /// compare by decoded string.
    pub fn sort(&mut self, order: &[(usize, bool)], dicts: Option<&dyn DictResolver>) {
        let mut rows: Vec<(Key, Vec<SlotVal>)> = self
            .keys
            .drain(..)
            .zip(self.target_values.drain(..))
            .collect();
        for &(target_no, desc) in order.iter().rev() {
            let target = &self.targets[target_no];
            rows.sort_by(|a, b| {
                let ord = compare_slots(
                    &a.1[target_no],
                    &b.1[target_no],
                    target,
                    target_no,
                    &self.query_mem_desc,
                    &self.owner,
                    dicts,
                );
                if desc {
                    ord.reverse()
                } else {
                    ord
                }
            });
        }
        for (key, row) in rows {
            self.keys.push(key);
            self.target_values.push(row);
        }
    }

    /// Truncate to the first `n` rows.
    pub fn keep_first_n(&mut self, n: usize) {
        self.keys.truncate(n);
        self.target_values.truncate(n);
    }

    /// Discard the first `n` rows.
    pub fn drop_first_n(&mut self, n: usize) {
        let n = n.min(self.row_count());
        self.keys.drain(..n);
        self.target_values.drain(..n);
    }

    /// The value of output column `col` in row `row`, optionally translating
    /// dictionary-encoded string ids.
    pub fn value_at(
        &self,
        row: usize,
        col: usize,
        translate_strings: bool,
        dicts: Option<&dyn DictResolver>,
    ) -> ScalarValue {
        let target = &self.targets[col];
        let slot = &self.target_values[row][col];
        match slot {
            SlotVal::Null => ScalarValue::Null,
            SlotVal::Int(v) => {
                if translate_strings && target.sql_type.is_dict_encoded() {
                    let dict_id = target.sql_type.dict_id().expect("dict-encoded type");
                    match dicts.and_then(|d| d.lookup(dict_id, *v as i32)) {
                        Some(s) => ScalarValue::Str(s),
                        None => ScalarValue::Null,
                    }
                } else {
                    ScalarValue::Int(*v)
                }
            }
            SlotVal::Double(v) => ScalarValue::Double(*v),
            SlotVal::Pair(sum, count) => {
                if *count == 0 {
                    ScalarValue::Null
                } else {
                    ScalarValue::Double(*sum as f64 / *count as f64)
                }
            }
            SlotVal::DoublePair(sum, count) => {
                if *count == 0 {
                    ScalarValue::Null
                } else {
                    ScalarValue::Double(*sum / *count as f64)
                }
            }
            SlotVal::Distinct(id) => {
                let desc = self
                    .query_mem_desc
                    .count_distinct_descriptors
                    .get(&col)
                    .expect("descriptor for count-distinct target");
                ScalarValue::Int(self.owner.distinct_count(desc, *id))
            }
        }
    }

    /// Raw slot access for tests and the executor's retry bookkeeping.
    pub fn slot_at(&self, row: usize, col: usize) -> SlotVal {
        self.target_values[row][col]
    }

    /// The group key tuple of `row`; empty for keyless results.
    pub fn key_at(&self, row: usize) -> &[i64] {
        &self.keys[row]
    }
}

fn merge_rows(
    crt: &mut [SlotVal],
    new: &[SlotVal],
    targets: &[TargetInfo],
    qmd: &QueryMemoryDescriptor,
    owner: &Arc<RowSetMemoryOwner>,
) {
    debug_assert_eq!(crt.len(), new.len());
    for (idx, target) in targets.iter().enumerate() {
        reduce_slot(&mut crt[idx], &new[idx], target, idx, qmd, owner);
    }
}

/// Reduce one target's slot: the per-aggregation merge table.
fn reduce_slot(
    crt: &mut SlotVal,
    new: &SlotVal,
    target: &TargetInfo,
    target_idx: usize,
    qmd: &QueryMemoryDescriptor,
    owner: &Arc<RowSetMemoryOwner>,
) {
    use SlotVal::*;

    if target.is_distinct {
        let desc = qmd
            .count_distinct_descriptors
            .get(&target_idx)
            .expect("descriptor for count-distinct target");
        match (*crt, *new) {
            (_, Distinct(new_id)) if new_id < 0 => {}
            (Distinct(crt_id), Distinct(new_id)) if crt_id < 0 => *crt = Distinct(new_id),
            (Distinct(crt_id), Distinct(new_id)) => owner.unify_distinct(desc, crt_id, new_id),
            _ => unreachable!("count-distinct slots always carry ids"),
        }
        return;
    }

    let kind = match target.agg_kind {
        Some(k) => k,
        // projection slots do not reduce
        None => return,
    };

    // null on either side: the other side wins
    if matches!(new, Null) {
        return;
    }
    if matches!(crt, Null) {
        *crt = *new;
        return;
    }

    match kind {
        AggKind::Count | AggKind::Sum => match (&mut *crt, new) {
            (Int(a), Int(b)) => *a += b,
            (Double(a), Double(b)) => *a += b,
            (a, b) => unreachable!("mismatched sum slots: {a:?} vs {b:?}"),
        },
        AggKind::Avg => match (&mut *crt, new) {
            (Pair(s, c), Pair(ns, nc)) => {
                *s += ns;
                *c += nc;
            }
            (DoublePair(s, c), DoublePair(ns, nc)) => {
                *s += ns;
                *c += nc;
            }
            (a, b) => unreachable!("mismatched avg slots: {a:?} vs {b:?}"),
        },
        AggKind::Min => match (&mut *crt, new) {
            (Int(a), Int(b)) => *a = (*a).min(*b),
            (Double(a), Double(b)) => *a = a.min(*b),
            (a, b) => unreachable!("mismatched min slots: {a:?} vs {b:?}"),
        },
        AggKind::Max => match (&mut *crt, new) {
            (Int(a), Int(b)) => *a = (*a).max(*b),
            (Double(a), Double(b)) => *a = a.max(*b),
            (a, b) => unreachable!("mismatched max slots: {a:?} vs {b:?}"),
        },
    }
}

/// Materialise one target's raw slots into a typed value. Kernels normalize
/// nulls to the 64-bit sentinels, so those are what the raw slots carry.
fn decode_slots(target: &TargetInfo, raw: &[i64]) -> SlotVal {
    let fp = target.sql_type.is_fp();
    if target.is_distinct {
        return SlotVal::Distinct(raw[0]);
    }
    let Some(kind) = target.agg_kind else {
        return if fp {
            let v = f64::from_bits(raw[0] as u64);
            if v == NULL_DOUBLE {
                SlotVal::Null
            } else {
                SlotVal::Double(v)
            }
        } else if raw[0] == NULL_INT {
            SlotVal::Null
        } else {
            SlotVal::Int(raw[0])
        };
    };
    match kind {
        AggKind::Count => SlotVal::Int(raw[0]),
        AggKind::Sum => {
            if fp {
                let v = f64::from_bits(raw[0] as u64);
                if target.skip_null_val && v == NULL_DOUBLE {
                    SlotVal::Null
                } else {
                    SlotVal::Double(v)
                }
            } else if target.skip_null_val && raw[0] == NULL_INT {
                SlotVal::Null
            } else {
                SlotVal::Int(raw[0])
            }
        }
        AggKind::Avg => {
            if fp {
                SlotVal::DoublePair(f64::from_bits(raw[0] as u64), raw[1])
            } else {
                SlotVal::Pair(raw[0], raw[1])
            }
        }
        AggKind::Min => {
            if fp {
                let v = f64::from_bits(raw[0] as u64);
                if v == f64::INFINITY {
                    SlotVal::Null
                } else {
                    SlotVal::Double(v)
                }
            } else if raw[0] == i64::MAX {
                SlotVal::Null
            } else {
                SlotVal::Int(raw[0])
            }
        }
        AggKind::Max => {
            if fp {
                let v = f64::from_bits(raw[0] as u64);
                if v == f64::NEG_INFINITY {
                    SlotVal::Null
                } else {
                    SlotVal::Double(v)
                }
            } else if raw[0] == i64::MIN {
                SlotVal::Null
            } else {
                SlotVal::Int(raw[0])
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn compare_slots(
    a: &SlotVal,
    b: &SlotVal,
    target: &TargetInfo,
    target_idx: usize,
    qmd: &QueryMemoryDescriptor,
    owner: &Arc<RowSetMemoryOwner>,
    dicts: Option<&dyn DictResolver>,
) -> Ordering {
    use SlotVal::*;
    match (a, b) {
        (Null, Null) => Ordering::Equal,
        (Null, _) => Ordering::Less,
        (_, Null) => Ordering::Greater,
        (Int(x), Int(y)) => {
            if target.sql_type.is_dict_encoded() {
                let dict_id = target.sql_type.dict_id().expect("dict-encoded type");
                let xs = dicts.and_then(|d| d.lookup(dict_id, *x as i32));
                let ys = dicts.and_then(|d| d.lookup(dict_id, *y as i32));
                xs.cmp(&ys)
            } else {
                x.cmp(y)
            }
        }
        (Double(x), Double(y)) => x.total_cmp(y),
        (Pair(xs, xc), Pair(ys, yc)) => {
            pair_to_double(*xs as f64, *xc).total_cmp(&pair_to_double(*ys as f64, *yc))
        }
        (DoublePair(xs, xc), DoublePair(ys, yc)) => {
            pair_to_double(*xs, *xc).total_cmp(&pair_to_double(*ys, *yc))
        }
        (Distinct(x), Distinct(y)) => {
            let desc = qmd
                .count_distinct_descriptors
                .get(&target_idx)
                .expect("descriptor for count-distinct target");
            owner.distinct_count(desc, *x).cmp(&owner.distinct_count(desc, *y))
        }
        _ => Ordering::Equal,
    }
}

fn pair_to_double(sum: f64, count: i64) -> f64 {
    if count == 0 {
        f64::NAN
    } else {
        sum / count as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use data_types::SqlType;
    use proptest::prelude::*;

    fn target(kind: AggKind, ty: SqlType) -> TargetInfo {
        TargetInfo {
            agg_kind: Some(kind),
            sql_type: ty,
            skip_null_val: false,
            is_distinct: false,
        }
    }

    fn keyless_set(targets: Vec<TargetInfo>, row: Vec<SlotVal>) -> ResultSet {
        let owner = Arc::new(RowSetMemoryOwner::default());
        let mut set = ResultSet::empty(targets, owner);
        set.keys.push(Vec::new());
        set.target_values.push(row);
        set
    }

    #[test]
    fn avg_reduces_pairwise() {
        let targets = vec![target(AggKind::Avg, SqlType::Int)];
        let mut a = keyless_set(targets.clone(), vec![SlotVal::Pair(10, 2)]);
        let b = keyless_set(targets, vec![SlotVal::Pair(32, 4)]);
        a.reduce(b);
        assert_eq!(a.slot_at(0, 0), SlotVal::Pair(42, 6));
        assert_eq!(a.value_at(0, 0, false, None), ScalarValue::Double(7.0));
    }

    #[test]
    fn min_max_skip_nulls() {
        let targets = vec![
            target(AggKind::Min, SqlType::Int),
            target(AggKind::Max, SqlType::Int),
        ];
        let mut a = keyless_set(
            targets.clone(),
            vec![SlotVal::Null, SlotVal::Int(5)],
        );
        let b = keyless_set(targets, vec![SlotVal::Int(3), SlotVal::Null]);
        a.reduce(b);
        assert_eq!(a.slot_at(0, 0), SlotVal::Int(3));
        assert_eq!(a.slot_at(0, 1), SlotVal::Int(5));
    }

    #[test]
    fn grouped_reduce_merges_by_key() {
        let targets = vec![target(AggKind::Sum, SqlType::Int)];
        let owner = Arc::new(RowSetMemoryOwner::default());
        let qmd = QueryMemoryDescriptor {
            hash_type: GroupByColRangeType::OneColGuessedRange,
            keyless: false,
            group_col_widths: vec![8],
            agg_col_widths: vec![8],
            entry_count: 8,
            entry_count_small: 0,
            min_val: 0,
            key_ranges: Vec::new(),
            output_columnar: false,
            count_distinct_descriptors: Default::default(),
        };
        let mut a = ResultSet {
            targets: targets.clone(),
            query_mem_desc: qmd.clone(),
            owner: Arc::clone(&owner),
            keys: vec![vec![1], vec![2]],
            target_values: vec![vec![SlotVal::Int(10)], vec![SlotVal::Int(20)]],
        };
        let b = ResultSet {
            targets,
            query_mem_desc: qmd,
            owner,
            keys: vec![vec![2], vec![3]],
            target_values: vec![vec![SlotVal::Int(5)], vec![SlotVal::Int(7)]],
        };
        a.reduce(b);
        assert_eq!(a.row_count(), 3);
        let by_key: std::collections::HashMap<i64, SlotVal> = (0..a.row_count())
            .map(|r| (a.key_at(r)[0], a.slot_at(r, 0)))
            .collect();
        assert_eq!(by_key[&1], SlotVal::Int(10));
        assert_eq!(by_key[&2], SlotVal::Int(25));
        assert_eq!(by_key[&3], SlotVal::Int(7));
    }

    #[test]
    fn sort_is_stable_and_leftmost_dominates() {
        let targets = vec![
            target(AggKind::Min, SqlType::Int),
            target(AggKind::Min, SqlType::Int),
        ];
        let owner = Arc::new(RowSetMemoryOwner::default());
        let mut set = ResultSet::empty(targets, owner);
        for (a, b) in [(2, 1), (1, 2), (2, 0), (1, 1)] {
            set.keys.push(Vec::new());
            set.target_values
                .push(vec![SlotVal::Int(a), SlotVal::Int(b)]);
        }
        set.sort(&[(0, false), (1, true)], None);
        let rows: Vec<(i64, i64)> = (0..set.row_count())
            .map(|r| {
                let a = match set.slot_at(r, 0) {
                    SlotVal::Int(v) => v,
                    _ => unreachable!(),
                };
                let b = match set.slot_at(r, 1) {
                    SlotVal::Int(v) => v,
                    _ => unreachable!(),
                };
                (a, b)
            })
            .collect();
        assert_eq!(rows, vec![(1, 2), (1, 1), (2, 1), (2, 0)]);
    }

    #[test]
    fn limit_and_offset() {
        let targets = vec![target(AggKind::Min, SqlType::Int)];
        let owner = Arc::new(RowSetMemoryOwner::default());
        let mut set = ResultSet::empty(targets, owner);
        for v in 0..10 {
            set.keys.push(Vec::new());
            set.target_values.push(vec![SlotVal::Int(v)]);
        }
        set.drop_first_n(3);
        set.keep_first_n(4);
        assert_eq!(set.row_count(), 4);
        assert_eq!(set.slot_at(0, 0), SlotVal::Int(3));
        assert_eq!(set.slot_at(3, 0), SlotVal::Int(6));
    }

    proptest! {
        // reduce(A, B) == reduce(B, A) and associativity, for bitwise
        // equality on integer slots
        #[test]
        fn reduction_is_commutative_and_associative(
            a in -1000i64..1000,
            b in -1000i64..1000,
            c in -1000i64..1000,
            na in 1i64..100,
            nb in 1i64..100,
            nc in 1i64..100,
        ) {
            let targets = vec![
                target(AggKind::Sum, SqlType::BigInt),
                target(AggKind::Min, SqlType::BigInt),
                target(AggKind::Max, SqlType::BigInt),
                target(AggKind::Avg, SqlType::BigInt),
            ];
            let mk = |v: i64, n: i64| keyless_set(
                targets.clone(),
                vec![
                    SlotVal::Int(v * n),
                    SlotVal::Int(v),
                    SlotVal::Int(v),
                    SlotVal::Pair(v * n, n),
                ],
            );

            let mut ab = mk(a, na);
            ab.reduce(mk(b, nb));
            let mut ba = mk(b, nb);
            ba.reduce(mk(a, na));
            for col in 0..4 {
                prop_assert_eq!(ab.slot_at(0, col), ba.slot_at(0, col));
            }

            let mut left = mk(a, na);
            left.reduce(mk(b, nb));
            left.reduce(mk(c, nc));
            let mut right_inner = mk(b, nb);
            right_inner.reduce(mk(c, nc));
            let mut right = mk(a, na);
            right.reduce(right_inner);
            for col in 0..4 {
                prop_assert_eq!(left.slot_at(0, col), right.slot_at(0, col));
            }
        }
    }
}
