//! Just-in-time compilation of per-query row functions.
//!
//! A planned tree's expressions lower into a basic-block IR ([`ir`]); the
//! pipeline in [`passes`] inlines the row function into its query template
//! and optimizes it; the finalized [`engine::ExecutionEngine`] is the
//! executable code object, cached by the printed-IR fingerprints of both
//! functions. Null-aware arithmetic and string predicates dispatch to the
//! C-ABI helpers in [`runtime`], which accelerator backends link unchanged.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use std::sync::Arc;

use observability_deps::tracing::debug;
use snafu::Snafu;

pub mod accel;
pub mod cache;
pub mod compiler;
pub mod engine;
pub mod ir;
pub mod literals;
pub mod passes;
pub mod runtime;

pub use accel::{AcceleratorBackend, AcceleratorKernel};
pub use cache::{CodeCache, CodeCacheKey};
pub use compiler::{build_target_infos, CompileInput, LoweredKernel};
pub use engine::{ExecutionEngine, KernelOut, LaunchArgs};
pub use ir::{Module, ERR_DIV_BY_ZERO, ERR_OUT_OF_SLOTS};
pub use passes::OptLevel;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("kernel compilation failed: {what}"))]
    CompilationFailed { what: String },

    #[snafu(display("operation unsupported on the accelerator: {what}"))]
    UnsupportedOnAccelerator { what: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A compiled kernel plus everything the executor needs to launch it.
#[derive(Debug, Clone)]
pub struct CompilationResult {
    pub engine: Arc<ExecutionEngine>,
    /// The lowered module, for accelerator backends that compile it again
    /// for their own devices.
    pub module: Module,
    pub literal_buf: Vec<u8>,
    pub query_mem_desc: result_set::QueryMemoryDescriptor,
    pub target_infos: Vec<data_types::TargetInfo>,
    pub init_agg_vals: Vec<i64>,
    /// The kernel needs capabilities no accelerator backend provides; the
    /// executor reroutes it to the CPU.
    pub must_run_on_cpu: bool,
}

/// Lower, optimize and finalize a kernel, consulting `cache` first.
///
/// Cache hit and cache miss are observationally equivalent: a hit returns
/// the previously finalized engine and drops the freshly lowered module.
pub fn compile_kernel(
    input: &CompileInput<'_>,
    opt_level: OptLevel,
    cache: &parking_lot::Mutex<CodeCache>,
) -> Result<CompilationResult> {
    let lowered = compiler::lower_kernel(input)?;
    let key = CodeCacheKey::for_module(&lowered.module);

    let mut cache = cache.lock();
    let engine = match cache.get(&key) {
        Some(engine) => engine,
        None => {
            let engine = Arc::new(passes::optimize_and_finalize(
                &lowered.module,
                input.hoist_literals,
                opt_level,
            ));
            cache.put(key, Arc::clone(&engine));
            debug!(name = input.name, "installed compiled kernel");
            engine
        }
    };

    let init_agg_vals = result_set::initial_values(&lowered.target_infos);
    Ok(CompilationResult {
        engine,
        module: lowered.module,
        literal_buf: lowered.literal_buf,
        query_mem_desc: lowered.query_mem_desc,
        target_infos: lowered.target_infos,
        init_agg_vals,
        must_run_on_cpu: lowered.must_run_on_cpu,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use data_types::{AggKind, Datum, Encoding, SqlType};
    use parking_lot::Mutex;
    use plan::{BinOpKind, Expr, Target};
    use result_set::{GroupBuffers, RowSetMemoryOwner};

    use super::*;

    fn col(id: i32, ty: SqlType) -> Expr {
        Expr::ColumnRef {
            table_id: 1,
            column_id: id,
            ty,
            nullable: false,
        }
    }

    fn lit(v: i64, ty: SqlType) -> Expr {
        Expr::Literal {
            value: Datum::Int(v),
            ty,
        }
    }

    fn int_input<'a>(
        groupby: &'a [Expr],
        targets: &'a [Target],
        quals: &'a [Expr],
        slots: &'a BTreeMap<i32, u16>,
        encodings: &'a BTreeMap<i32, Encoding>,
        ranges: &'a BTreeMap<i32, (i64, i64)>,
    ) -> CompileInput<'a> {
        CompileInput {
            name: "test_kernel",
            groupby_exprs: groupby,
            targets,
            quals,
            col_slots: slots,
            col_encodings: encodings,
            col_ranges: ranges,
            hoist_literals: true,
        }
    }

    fn launch_keyless(
        result: &CompilationResult,
        col_bufs: &[&[u8]],
        num_rows: usize,
    ) -> (i32, GroupBuffers, Arc<RowSetMemoryOwner>) {
        let owner = Arc::new(RowSetMemoryOwner::default());
        let mut buffers = result.query_mem_desc.create_buffers(&result.init_agg_vals);
        let code = result.engine.launch(&mut LaunchArgs {
            col_bufs,
            num_rows,
            scan_limit: None,
            literals: &result.literal_buf,
            init_agg_vals: &result.init_agg_vals,
            out: KernelOut::Group {
                query_mem_desc: &result.query_mem_desc,
                buffers: &mut buffers,
                owner: &owner,
            },
            dicts: None,
        });
        (code, buffers, owner)
    }

    #[test]
    fn count_with_filter() {
        let slots: BTreeMap<i32, u16> = [(1, 0)].into();
        let encodings: BTreeMap<i32, Encoding> = [(1, Encoding::Raw { width: 4 })].into();
        let ranges = BTreeMap::new();
        let targets = vec![Target::Aggregate {
            kind: AggKind::Count,
            arg: None,
            distinct: false,
        }];
        let quals = vec![Expr::BinOp {
            op: BinOpKind::Gt,
            ty: SqlType::Boolean,
            lhs: Box::new(col(1, SqlType::Int)),
            rhs: Box::new(lit(41, SqlType::Int)),
        }];
        let input = int_input(&[], &targets, &quals, &slots, &encodings, &ranges);
        let cache = Mutex::new(CodeCache::default());
        let result = compile_kernel(&input, OptLevel::Default, &cache).unwrap();
        assert!(!result.must_run_on_cpu);

        let data: Vec<u8> = (0..100i32).flat_map(|v| v.to_le_bytes()).collect();
        let (code, buffers, _owner) = launch_keyless(&result, &[&data], 100);
        assert_eq!(code, 0);
        // rows 42..=99 pass the filter
        assert_eq!(buffers.main[0], 58);
    }

    #[test]
    fn division_by_zero_aborts_the_kernel() {
        let slots: BTreeMap<i32, u16> = [(1, 0), (2, 1)].into();
        let encodings: BTreeMap<i32, Encoding> =
            [(1, Encoding::Raw { width: 4 }), (2, Encoding::Raw { width: 4 })].into();
        let ranges = BTreeMap::new();
        let targets = vec![Target::Projection(Expr::BinOp {
            op: BinOpKind::Divide,
            ty: SqlType::Int,
            lhs: Box::new(col(1, SqlType::Int)),
            rhs: Box::new(col(2, SqlType::Int)),
        })];
        let input = int_input(&[], &targets, &[], &slots, &encodings, &ranges);
        let cache = Mutex::new(CodeCache::default());
        let result = compile_kernel(&input, OptLevel::Default, &cache).unwrap();

        let a: Vec<u8> = [10i32, 20, 30].iter().flat_map(|v| v.to_le_bytes()).collect();
        let b: Vec<u8> = [2i32, 0, 3].iter().flat_map(|v| v.to_le_bytes()).collect();
        let mut rows = Vec::new();
        let code = result.engine.launch(&mut LaunchArgs {
            col_bufs: &[&a, &b],
            num_rows: 3,
            scan_limit: None,
            literals: &result.literal_buf,
            init_agg_vals: &result.init_agg_vals,
            out: KernelOut::Rows(&mut rows),
            dicts: None,
        });
        assert_eq!(code, ERR_DIV_BY_ZERO);
    }

    #[test]
    fn grouped_sum_over_known_range() {
        let slots: BTreeMap<i32, u16> = [(1, 0), (2, 1)].into();
        let encodings: BTreeMap<i32, Encoding> =
            [(1, Encoding::Raw { width: 4 }), (2, Encoding::Raw { width: 4 })].into();
        let ranges: BTreeMap<i32, (i64, i64)> = [(1, (0, 3))].into();
        let groupby = vec![col(1, SqlType::Int)];
        let targets = vec![
            Target::Projection(col(1, SqlType::Int)),
            Target::Aggregate {
                kind: AggKind::Sum,
                arg: Some(col(2, SqlType::Int)),
                distinct: false,
            },
        ];
        let input = int_input(&groupby, &targets, &[], &slots, &encodings, &ranges);
        let cache = Mutex::new(CodeCache::default());
        let result = compile_kernel(&input, OptLevel::Default, &cache).unwrap();
        assert_eq!(
            result.query_mem_desc.hash_type,
            result_set::GroupByColRangeType::OneColKnownRange
        );

        // keys 0..4 cycling, values 1,2,3,...
        let keys: Vec<u8> = (0..8i32).map(|i| i % 4).flat_map(|v| v.to_le_bytes()).collect();
        let vals: Vec<u8> = (1..=8i32).flat_map(|v| v.to_le_bytes()).collect();
        let (code, buffers, owner) = launch_keyless(&result, &[&keys, &vals], 8);
        assert_eq!(code, 0);

        let set = result_set::ResultSet::from_group_buffers(
            result.target_infos.clone(),
            result.query_mem_desc.clone(),
            owner,
            &buffers,
        );
        assert_eq!(set.row_count(), 4);
        for row in 0..4 {
            let key = match set.slot_at(row, 0) {
                result_set::SlotVal::Int(k) => k,
                v => panic!("unexpected key slot {v:?}"),
            };
            // rows i and i+4 share key i: values i+1 and i+5
            assert_eq!(
                set.slot_at(row, 1),
                result_set::SlotVal::Int((key + 1) + (key + 5))
            );
        }
    }

    #[test]
    fn cache_hits_reuse_the_engine() {
        let slots: BTreeMap<i32, u16> = [(1, 0)].into();
        let encodings: BTreeMap<i32, Encoding> = [(1, Encoding::Raw { width: 4 })].into();
        let ranges = BTreeMap::new();
        let targets = vec![Target::Projection(col(1, SqlType::Int))];
        let input = int_input(&[], &targets, &[], &slots, &encodings, &ranges);
        let cache = Mutex::new(CodeCache::default());
        let first = compile_kernel(&input, OptLevel::Default, &cache).unwrap();
        let second = compile_kernel(&input, OptLevel::Default, &cache).unwrap();
        assert!(Arc::ptr_eq(&first.engine, &second.engine));
        assert_eq!(cache.lock().len(), 1);
    }

    #[test]
    fn hoisted_literals_load_from_the_buffer() {
        let slots: BTreeMap<i32, u16> = [(1, 0)].into();
        let encodings: BTreeMap<i32, Encoding> = [(1, Encoding::Raw { width: 4 })].into();
        let ranges = BTreeMap::new();
        let targets = vec![Target::Projection(Expr::BinOp {
            op: BinOpKind::Plus,
            ty: SqlType::Int,
            lhs: Box::new(col(1, SqlType::Int)),
            rhs: Box::new(lit(100, SqlType::Int)),
        })];
        let input = int_input(&[], &targets, &[], &slots, &encodings, &ranges);
        let cache = Mutex::new(CodeCache::default());
        let result = compile_kernel(&input, OptLevel::Default, &cache).unwrap();
        assert!(!result.literal_buf.is_empty());

        let data: Vec<u8> = [1i32, 2].iter().flat_map(|v| v.to_le_bytes()).collect();
        let mut rows = Vec::new();
        let code = result.engine.launch(&mut LaunchArgs {
            col_bufs: &[&data],
            num_rows: 2,
            scan_limit: None,
            literals: &result.literal_buf,
            init_agg_vals: &result.init_agg_vals,
            out: KernelOut::Rows(&mut rows),
            dicts: None,
        });
        assert_eq!(code, 0);
        assert_eq!(rows, vec![vec![101], vec![102]]);
    }

    #[test]
    fn avg_writes_sum_and_count_slots() {
        let slots: BTreeMap<i32, u16> = [(1, 0)].into();
        let encodings: BTreeMap<i32, Encoding> = [(1, Encoding::Raw { width: 4 })].into();
        let ranges = BTreeMap::new();
        let targets = vec![Target::Aggregate {
            kind: AggKind::Avg,
            arg: Some(col(1, SqlType::Int)),
            distinct: false,
        }];
        let input = int_input(&[], &targets, &[], &slots, &encodings, &ranges);
        let cache = Mutex::new(CodeCache::default());
        let result = compile_kernel(&input, OptLevel::Default, &cache).unwrap();
        assert_eq!(result.init_agg_vals.len(), 2);

        let data: Vec<u8> = [10i32, 20, 30].iter().flat_map(|v| v.to_le_bytes()).collect();
        let (code, buffers, _owner) = launch_keyless(&result, &[&data], 3);
        assert_eq!(code, 0);
        assert_eq!(buffers.main[0], 60);
        assert_eq!(buffers.main[1], 3);
    }

    #[test]
    fn case_lowers_as_reverse_block_chain() {
        let slots: BTreeMap<i32, u16> = [(1, 0)].into();
        let encodings: BTreeMap<i32, Encoding> = [(1, Encoding::Raw { width: 4 })].into();
        let ranges = BTreeMap::new();
        let case = Expr::Case {
            branches: vec![(
                Expr::BinOp {
                    op: BinOpKind::Lt,
                    ty: SqlType::Boolean,
                    lhs: Box::new(col(1, SqlType::Int)),
                    rhs: Box::new(lit(10, SqlType::Int)),
                },
                lit(1, SqlType::Int),
            )],
            else_expr: Some(Box::new(lit(2, SqlType::Int))),
            ty: SqlType::Int,
        };
        let targets = vec![Target::Projection(case)];
        let input = int_input(&[], &targets, &[], &slots, &encodings, &ranges);
        let cache = Mutex::new(CodeCache::default());
        let result = compile_kernel(&input, OptLevel::Default, &cache).unwrap();

        let data: Vec<u8> = [5i32, 50].iter().flat_map(|v| v.to_le_bytes()).collect();
        let mut rows = Vec::new();
        let code = result.engine.launch(&mut LaunchArgs {
            col_bufs: &[&data],
            num_rows: 2,
            scan_limit: None,
            literals: &result.literal_buf,
            init_agg_vals: &result.init_agg_vals,
            out: KernelOut::Rows(&mut rows),
            dicts: None,
        });
        assert_eq!(code, 0);
        assert_eq!(rows, vec![vec![1], vec![2]]);
    }
}
