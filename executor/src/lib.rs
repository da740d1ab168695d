//! The query executor: drives a planned statement end to end.
//!
//! SELECT: compile a per-query kernel, enumerate the table's fragments,
//! skip fragments whose statistics refute a simple qualifier, dispatch the
//! survivors to a pool of CPU worker slots and accelerator slots, reduce
//! the partial result sets and apply SORT/LIMIT. INSERT: bind literals to
//! per-column buffers, dictionary-encode strings, hand the batch to the
//! fragmenter and checkpoint.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use data_types::{Datum, FragmentInfo, SqlType};
use hashbrown::HashMap;
use kernel_compiler::{
    AcceleratorBackend, AcceleratorKernel, CodeCache, CodeCacheKey, CompilationResult,
    CompileInput, KernelOut, LaunchArgs, OptLevel, ERR_DIV_BY_ZERO, ERR_OUT_OF_SLOTS,
};
use observability_deps::tracing::{debug, info, warn};
use once_cell::sync::Lazy;
use page_store::PageStore;
use parking_lot::Mutex;
use plan::{BinOpKind, Expr, InsertValues, Plan, RootPlan, Target};
use result_set::{DictResolver, QueryMemoryDescriptor, ResultSet, RowSetMemoryOwner};
use snafu::{ResultExt, Snafu};
use string_dictionary::StringDictionary;

mod device;
mod fragmenter;

pub use device::{Device, DevicePool, DeviceType};
pub use fragmenter::{Fragmenter, FragmenterConfig, InsertData, InsertOrderFragmenter};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("division by zero"))]
    DivByZero,

    #[snafu(display("group buffer overflow"))]
    GroupBufferOverflow,

    #[snafu(display("invalid plan: {what}"))]
    InvalidPlan { what: String },

    #[snafu(display("storage failure: {source}"))]
    Storage { source: page_store::Error },

    #[snafu(display("compiler failure: {source}"))]
    Compiler { source: kernel_compiler::Error },

    #[snafu(display("dictionary failure: {source}"))]
    Dictionary { source: string_dictionary::Error },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// What a statement returns.
#[derive(Debug)]
pub enum ExecutionResult {
    Rows(ResultSet),
    Inserted(usize),
}

/// The storage-side collaborators a query runs against.
#[derive(Clone)]
pub struct ExecutionContext {
    pub store: PageStore,
    pub fragmenter: Arc<dyn Fragmenter>,
    /// Directory holding `dict_<id>` files.
    pub dict_dir: PathBuf,
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("dict_dir", &self.dict_dir)
            .finish()
    }
}

/// Process-wide executor registry, keyed by `(db_id, block_size,
/// grid_size)`. Creation is serialized and idempotent.
static EXECUTORS: Lazy<Mutex<HashMap<(i32, usize, usize), Arc<Executor>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// One query at a time per process.
static EXECUTE_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Serializes chunk materialisation during kernel setup so device-memory
/// copies stay deterministic.
static CHUNK_FETCH_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

#[derive(Debug, Clone, Copy)]
pub struct ExecutorConfig {
    pub block_size: usize,
    pub grid_size: usize,
    /// Overrides the CPU slot default of twice the online processor count.
    pub cpu_slots: Option<usize>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            block_size: 1024,
            grid_size: 16,
            cpu_slots: None,
        }
    }
}

/// The per-database query executor.
pub struct Executor {
    db_id: i32,
    config: ExecutorConfig,
    device_pool: DevicePool,
    cpu_code_cache: Mutex<CodeCache>,
    accel_kernel_cache: Mutex<HashMap<CodeCacheKey, Arc<dyn AcceleratorKernel>>>,
    accel_backend: Option<Arc<dyn AcceleratorBackend>>,
    dicts: DictCache,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("db_id", &self.db_id)
            .field("config", &self.config)
            .finish()
    }
}

impl Executor {
    /// The process-wide executor for `(db_id, block_size, grid_size)`,
    /// created on first use.
    pub fn get(db_id: i32, config: ExecutorConfig) -> Arc<Self> {
        let mut executors = EXECUTORS.lock();
        let key = (db_id, config.block_size, config.grid_size);
        if let Some(executor) = executors.get(&key) {
            return Arc::clone(executor);
        }
        let accel_backend: Option<Arc<dyn AcceleratorBackend>> = None;
        let accel_ids = accel_backend
            .as_ref()
            .map_or(Vec::new(), |b| (0..b.device_count() as i32).collect());
        let executor = Arc::new(Self {
            db_id,
            config,
            device_pool: DevicePool::new(config.cpu_slots, accel_ids),
            cpu_code_cache: Mutex::new(CodeCache::default()),
            accel_kernel_cache: Mutex::new(HashMap::new()),
            accel_backend,
            dicts: DictCache::default(),
        });
        executors.insert(key, Arc::clone(&executor));
        executor
    }

    /// The process-wide dictionary for `dict_id`, loaded lazily from the
    /// context's dictionary directory.
    pub fn string_dictionary(
        &self,
        ctx: &ExecutionContext,
        dict_id: i32,
    ) -> Result<Arc<StringDictionary>> {
        self.dicts.get_or_load(&ctx.dict_dir, dict_id)
    }

    /// Execute a planned statement.
    pub fn execute(
        &self,
        root: &RootPlan,
        ctx: &ExecutionContext,
        hoist_literals: bool,
        device: DeviceType,
        opt_level: OptLevel,
    ) -> Result<ExecutionResult> {
        let _query_lock = EXECUTE_LOCK.lock();
        match root {
            RootPlan::Select {
                plan,
                limit,
                offset,
            } => {
                let rows = self.execute_select(plan, *limit, *offset, ctx, hoist_literals, device, opt_level)?;
                Ok(ExecutionResult::Rows(rows))
            }
            RootPlan::Insert(insert) => {
                let inserted = self.execute_insert(insert, ctx)?;
                Ok(ExecutionResult::Inserted(inserted))
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn execute_select(
        &self,
        plan: &Plan,
        limit: Option<usize>,
        offset: usize,
        ctx: &ExecutionContext,
        hoist_literals: bool,
        device: DeviceType,
        opt_level: OptLevel,
    ) -> Result<ResultSet> {
        let scan = plan.scan();
        let is_agg = plan.agg().is_some();
        let table = ctx
            .fragmenter
            .table_info(scan.table_id)
            .ok_or_else(|| Error::InvalidPlan {
                what: format!("table {} is not registered", scan.table_id),
            })?;

        // column buffer layout, encodings and known ranges for the compiler
        let columns = scan.columns();
        let mut col_slots = BTreeMap::new();
        let mut col_encodings = BTreeMap::new();
        let mut col_ranges = BTreeMap::new();
        for (slot, column_id) in columns.iter().enumerate() {
            let column = table.column(*column_id).ok_or_else(|| Error::InvalidPlan {
                what: format!("column {column_id} is not in table {}", scan.table_id),
            })?;
            col_slots.insert(*column_id, slot as u16);
            col_encodings.insert(*column_id, column.encoding);
            if let Some(range) = ctx.fragmenter.table_range(scan.table_id, *column_id) {
                col_ranges.insert(*column_id, range);
            }
        }

        let (groupby, targets): (&[Expr], &[Target]) = match plan.agg() {
            Some(agg) => (&agg.groupby_exprs, &agg.targets),
            None => (&[], &scan.targets),
        };
        if !is_agg && targets.iter().any(|t| !matches!(t, Target::Projection(_))) {
            return InvalidPlanSnafu {
                what: "aggregates outside an aggregation stage",
            }
            .fail();
        }
        if is_agg
            && groupby.is_empty()
            && targets.iter().all(|t| matches!(t, Target::Projection(_)))
        {
            return InvalidPlanSnafu {
                what: "aggregation stage without aggregates or group keys",
            }
            .fail();
        }
        let mut quals: Vec<Expr> = scan.simple_quals.clone();
        quals.extend(scan.quals.iter().cloned());

        let input = CompileInput {
            name: "select",
            groupby_exprs: groupby,
            targets,
            quals: &quals,
            col_slots: &col_slots,
            col_encodings: &col_encodings,
            col_ranges: &col_ranges,
            hoist_literals,
        };
        let compiled =
            kernel_compiler::compile_kernel(&input, opt_level, &self.cpu_code_cache)
                .context(CompilerSnafu)?;

        // the accelerator path only exists when a backend is registered and
        // the kernel has no CPU-only capabilities
        let mut device = device;
        if compiled.must_run_on_cpu || self.accel_backend.is_none() {
            if device == DeviceType::Accelerator {
                debug!("rerouting accelerator request to CPU");
            }
            device = DeviceType::Cpu;
        }
        if let (Some(backend), false) = (&self.accel_backend, compiled.must_run_on_cpu) {
            if device != DeviceType::Cpu {
                // finalize (or fetch) the accelerator kernel so both device
                // classes can serve fragments
                let key = CodeCacheKey::for_module(&compiled.module);
                let mut cache = self.accel_kernel_cache.lock();
                if !cache.contains_key(&key) {
                    let kernel = backend
                        .compile(&compiled.module, self.config.block_size, self.config.grid_size)
                        .context(CompilerSnafu)?;
                    cache.insert(key, kernel);
                }
            }
        }

        let fragments = ctx.fragmenter.fragments_for_query(scan.table_id);
        let surviving: Vec<FragmentInfo> = fragments
            .into_iter()
            .filter(|f| {
                let skip = skip_fragment(f, &scan.simple_quals);
                if skip {
                    debug!(fragment_id = f.fragment_id, "skipped fragment");
                }
                !skip
            })
            .collect();
        info!(
            table_id = scan.table_id,
            fragments = surviving.len(),
            agg = is_agg,
            "dispatching query"
        );

        // the projection scan may stop once offset + limit rows are
        // materialised; a Sort over the scan needs every row, so no budget
        let scan_budget = if matches!(plan, Plan::Sort { .. }) {
            None
        } else {
            limit.map(|l| l.saturating_add(offset))
        };
        let dispatch = Dispatch {
            compiled: &compiled,
            table_id: scan.table_id,
            fragments: &surviving,
            col_slots: &col_slots,
            ctx,
            is_agg,
            scan_budget,
        };
        let result = self.dispatch_fragments(&dispatch, device, None);

        let mut rows = match result {
            Err(Error::GroupBufferOverflow) => {
                // reissue on the CPU with a buffer sized to the largest
                // fragment; the entry count is no longer a guess
                let sized = surviving.iter().map(|f| f.num_tuples).max().unwrap_or(1);
                warn!(entry_count = sized, "group buffers overflowed; retrying sized on CPU");
                self.dispatch_fragments(&dispatch, DeviceType::Cpu, Some(sized))?
            }
            other => other?,
        };

        if let Plan::Sort { order, .. } = plan {
            let entries: Vec<(usize, bool)> =
                order.iter().map(|o| (o.target_no, o.desc)).collect();
            let resolver = ContextResolver {
                dicts: &self.dicts,
                dir: &ctx.dict_dir,
            };
            rows.sort(&entries, Some(&resolver));
        }
        if offset > 0 {
            rows.drop_first_n(offset);
        }
        if let Some(limit) = limit {
            rows.keep_first_n(limit);
        }
        Ok(rows)
    }

    /// Run the kernel over every surviving fragment and reduce the partial
    /// results. Grouping queries get one worker thread per fragment;
    /// projections run sequentially so LIMIT can stop the scan early.
    fn dispatch_fragments(
        &self,
        dispatch: &Dispatch<'_>,
        device: DeviceType,
        entry_count_override: Option<usize>,
    ) -> Result<ResultSet> {
        let mut query_mem_desc = dispatch.compiled.query_mem_desc.clone();
        if let Some(entries) = entry_count_override {
            query_mem_desc.entry_count = entries;
            query_mem_desc.entry_count_small = 0;
        }
        let owner = Arc::new(RowSetMemoryOwner::default());
        let resolver = ContextResolver {
            dicts: &self.dicts,
            dir: &dispatch.ctx.dict_dir,
        };

        if !dispatch.is_agg {
            // sequential projection honoring LIMIT
            let mut result =
                ResultSet::empty(dispatch.compiled.target_infos.clone(), Arc::clone(&owner));
            for fragment in dispatch.fragments {
                let remaining = dispatch
                    .scan_budget
                    .map(|budget| budget.saturating_sub(result.row_count()));
                if remaining == Some(0) {
                    break;
                }
                let device_slot = self.device_pool.acquire(DeviceType::Cpu);
                let partial = self.run_fragment(
                    dispatch,
                    &query_mem_desc,
                    fragment,
                    &owner,
                    remaining,
                    &resolver,
                );
                self.device_pool.release(device_slot);
                result.append(partial?);
            }
            return Ok(result);
        }

        // grouped or keyless aggregation: one task per fragment
        let error_code: Mutex<i32> = Mutex::new(0);
        let partials: Mutex<Vec<ResultSet>> = Mutex::new(Vec::new());
        std::thread::scope(|scope| {
            for fragment in dispatch.fragments {
                let owner = Arc::clone(&owner);
                let query_mem_desc = &query_mem_desc;
                let error_code = &error_code;
                let partials = &partials;
                let resolver = &resolver;
                scope.spawn(move || {
                    if *error_code.lock() != 0 {
                        return;
                    }
                    let device_slot = self.device_pool.acquire(device);
                    let outcome =
                        self.run_fragment(dispatch, query_mem_desc, fragment, &owner, None, resolver);
                    self.device_pool.release(device_slot);
                    match outcome {
                        Ok(partial) => partials.lock().push(partial),
                        Err(e) => {
                            let mut code = error_code.lock();
                            if *code == 0 {
                                *code = match e {
                                    Error::DivByZero => ERR_DIV_BY_ZERO,
                                    Error::GroupBufferOverflow => ERR_OUT_OF_SLOTS,
                                    _ => i32::MAX,
                                };
                                // remaining partials are dead weight now
                                partials.lock().clear();
                            }
                        }
                    }
                });
            }
        });

        let code = *error_code.lock();
        match code {
            0 => {}
            ERR_DIV_BY_ZERO => return DivByZeroSnafu.fail(),
            ERR_OUT_OF_SLOTS => return GroupBufferOverflowSnafu.fail(),
            _ => {
                return InvalidPlanSnafu {
                    what: "fragment task failed",
                }
                .fail()
            }
        }

        let mut reduced = ResultSet::empty(dispatch.compiled.target_infos.clone(), owner);
        for partial in partials.into_inner() {
            reduced.reduce(partial);
        }
        Ok(reduced)
    }

    /// Fetch one fragment's chunks and launch the kernel over them.
    fn run_fragment(
        &self,
        dispatch: &Dispatch<'_>,
        query_mem_desc: &QueryMemoryDescriptor,
        fragment: &FragmentInfo,
        owner: &Arc<RowSetMemoryOwner>,
        scan_limit: Option<usize>,
        resolver: &ContextResolver<'_>,
    ) -> Result<ResultSet> {
        let compiled = dispatch.compiled;
        // chunk materialisation is serialized during kernel setup
        let col_bufs: Vec<Vec<u8>> = {
            let _fetch_lock = CHUNK_FETCH_LOCK.lock();
            let mut bufs = vec![Vec::new(); dispatch.col_slots.len()];
            for (column_id, slot) in dispatch.col_slots {
                let key = data_types::ChunkKey::new(
                    self.db_id,
                    dispatch.table_id,
                    *column_id,
                    fragment.fragment_id,
                );
                let chunk = dispatch.ctx.store.get_chunk(key).context(StorageSnafu)?;
                bufs[*slot as usize] = chunk.read_all().context(StorageSnafu)?;
            }
            bufs
        };
        let buf_refs: Vec<&[u8]> = col_bufs.iter().map(Vec::as_slice).collect();

        let code;
        let result;
        if dispatch.is_agg {
            let mut buffers = query_mem_desc.create_buffers(&compiled.init_agg_vals);
            code = compiled.engine.launch(&mut LaunchArgs {
                col_bufs: &buf_refs,
                num_rows: fragment.num_tuples,
                scan_limit: None,
                literals: &compiled.literal_buf,
                init_agg_vals: &compiled.init_agg_vals,
                out: KernelOut::Group {
                    query_mem_desc,
                    buffers: &mut buffers,
                    owner,
                },
                dicts: Some(resolver),
            });
            result = ResultSet::from_group_buffers(
                compiled.target_infos.clone(),
                query_mem_desc.clone(),
                Arc::clone(owner),
                &buffers,
            );
        } else {
            let mut rows = Vec::new();
            code = compiled.engine.launch(&mut LaunchArgs {
                col_bufs: &buf_refs,
                num_rows: fragment.num_tuples,
                scan_limit,
                literals: &compiled.literal_buf,
                init_agg_vals: &compiled.init_agg_vals,
                out: KernelOut::Rows(&mut rows),
                dicts: Some(resolver),
            });
            result = ResultSet::from_slot_rows(
                compiled.target_infos.clone(),
                Arc::clone(owner),
                &rows,
            );
        }

        match code {
            0 => Ok(result),
            ERR_DIV_BY_ZERO => DivByZeroSnafu.fail(),
            ERR_OUT_OF_SLOTS => GroupBufferOverflowSnafu.fail(),
            other => InvalidPlanSnafu {
                what: format!("kernel returned error code {other}"),
            }
            .fail(),
        }
    }

    /// Bind INSERT literals to per-column byte buffers (one scalar per
    /// column), dictionary-encoding strings, then delegate to the
    /// fragmenter and checkpoint.
    fn execute_insert(&self, insert: &InsertValues, ctx: &ExecutionContext) -> Result<usize> {
        let table = ctx
            .fragmenter
            .table_info(insert.table_id)
            .ok_or_else(|| Error::InvalidPlan {
                what: format!("table {} is not registered", insert.table_id),
            })?;
        if insert.column_ids.len() != insert.values.len() {
            return InvalidPlanSnafu {
                what: "INSERT values do not match its column list",
            }
            .fail();
        }

        let mut columns = Vec::with_capacity(insert.column_ids.len());
        for (column_id, value) in insert.column_ids.iter().zip(&insert.values) {
            let column = table.column(*column_id).ok_or_else(|| Error::InvalidPlan {
                what: format!("column {column_id} is not in table {}", insert.table_id),
            })?;
            let bytes = self.bind_scalar(ctx, column.sql_type, value)?;
            columns.push((*column_id, bytes));
        }

        ctx.fragmenter.insert_data(&InsertData {
            db_id: insert.db_id,
            table_id: insert.table_id,
            columns,
            num_rows: 1,
        })?;
        ctx.store.checkpoint().context(StorageSnafu)?;
        Ok(1)
    }

    fn bind_scalar(
        &self,
        ctx: &ExecutionContext,
        ty: SqlType,
        value: &Datum,
    ) -> Result<Vec<u8>> {
        let bytes = match (ty, value) {
            (SqlType::Text { dict_id: Some(id) }, Datum::Str(s)) => {
                let dict = self.dicts.get_or_load(&ctx.dict_dir, id)?;
                let string_id = dict.get_or_add(s).context(DictionarySnafu)?;
                string_id.to_le_bytes().to_vec()
            }
            (SqlType::Text { dict_id: Some(_) }, Datum::Null) => {
                (i32::MIN).to_le_bytes().to_vec()
            }
            (SqlType::Text { dict_id: None }, _) => {
                return InvalidPlanSnafu {
                    what: "real string columns cannot be bound",
                }
                .fail()
            }
            (t, Datum::Null) if !t.is_fp() => {
                let sentinel = t.null_sentinel();
                int_bytes(sentinel, t.byte_width())
            }
            (SqlType::Double, Datum::Null) => f64::MIN.to_le_bytes().to_vec(),
            (SqlType::Float, Datum::Null) => f32::MIN.to_le_bytes().to_vec(),
            (SqlType::Double, v) => v
                .as_f64()
                .ok_or_else(|| Error::InvalidPlan {
                    what: format!("cannot bind {v:?} as DOUBLE"),
                })?
                .to_le_bytes()
                .to_vec(),
            (SqlType::Float, v) => (v
                .as_f64()
                .ok_or_else(|| Error::InvalidPlan {
                    what: format!("cannot bind {v:?} as FLOAT"),
                })? as f32)
                .to_le_bytes()
                .to_vec(),
            (t, v) => {
                let value = v.as_i64().ok_or_else(|| Error::InvalidPlan {
                    what: format!("cannot bind {v:?} as {t}"),
                })?;
                int_bytes(value, t.byte_width())
            }
        };
        Ok(bytes)
    }
}

fn int_bytes(v: i64, width: usize) -> Vec<u8> {
    v.to_le_bytes()[..width].to_vec()
}

/// Everything one SELECT dispatch needs, shared across fragment tasks.
struct Dispatch<'a> {
    compiled: &'a CompilationResult,
    table_id: i32,
    fragments: &'a [FragmentInfo],
    col_slots: &'a BTreeMap<i32, u16>,
    ctx: &'a ExecutionContext,
    is_agg: bool,
    /// How many projection rows the scan may stop after: offset + limit,
    /// or `None` when a Sort needs the full scan.
    scan_budget: Option<usize>,
}

/// Fragment skipping: a `col op const` qualifier refutes the whole fragment
/// when the predicate cannot hold anywhere in the chunk's `[min, max]`.
/// Only integer and time columns participate.
pub fn skip_fragment(fragment: &FragmentInfo, simple_quals: &[Expr]) -> bool {
    for qual in simple_quals {
        let Expr::BinOp { op, lhs, rhs, .. } = qual else {
            return false;
        };
        let Expr::ColumnRef {
            column_id, ty, ..
        } = lhs.as_ref()
        else {
            return false;
        };
        if !ty.is_integer() && !ty.is_time() {
            return false;
        }
        let Expr::Literal { value, .. } = rhs.as_ref() else {
            return false;
        };
        let Some(v) = value.as_i64() else {
            return false;
        };
        let Some(meta) = fragment.chunk_metadata.get(column_id) else {
            return false;
        };
        let (Some(chunk_min), Some(chunk_max)) = (meta.stats.min_i64(), meta.stats.max_i64())
        else {
            return false;
        };
        let skip = match op {
            BinOpKind::Ge => chunk_max < v,
            BinOpKind::Gt => chunk_max <= v,
            BinOpKind::Le => chunk_min > v,
            BinOpKind::Lt => chunk_min >= v,
            _ => false,
        };
        if skip {
            return true;
        }
    }
    false
}

/// Process-wide `dict_id -> dictionary` cache behind a mutex.
#[derive(Debug, Default)]
struct DictCache {
    dicts: Mutex<HashMap<i32, Arc<StringDictionary>>>,
}

impl DictCache {
    fn get_or_load(&self, dir: &std::path::Path, dict_id: i32) -> Result<Arc<StringDictionary>> {
        let mut dicts = self.dicts.lock();
        if let Some(dict) = dicts.get(&dict_id) {
            return Ok(Arc::clone(dict));
        }
        let dict = Arc::new(
            StringDictionary::open(dir.join(format!("dict_{dict_id}")))
                .context(DictionarySnafu)?,
        );
        dicts.insert(dict_id, Arc::clone(&dict));
        Ok(dict)
    }
}

/// Resolves dictionary ids through the executor's cache for sorting,
/// iteration and string kernels.
struct ContextResolver<'a> {
    dicts: &'a DictCache,
    dir: &'a std::path::Path,
}

impl DictResolver for ContextResolver<'_> {
    fn lookup(&self, dict_id: i32, string_id: i32) -> Option<String> {
        self.dicts
            .get_or_load(self.dir, dict_id)
            .ok()
            .and_then(|d| d.get_string(string_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use data_types::{ChunkMetadata, ChunkStats, Encoding};

    fn fragment_with_range(column_id: i32, min: i64, max: i64) -> FragmentInfo {
        let mut fragment = FragmentInfo::new(0);
        fragment.num_tuples = 100;
        fragment.chunk_metadata.insert(
            column_id,
            ChunkMetadata {
                sql_type: SqlType::Int,
                encoding: Encoding::Raw { width: 4 },
                num_bytes: 400,
                num_elements: 100,
                stats: ChunkStats {
                    min: Some(Datum::Int(min)),
                    max: Some(Datum::Int(max)),
                    has_nulls: false,
                },
            },
        );
        fragment
    }

    fn qual(op: BinOpKind, column_id: i32, v: i64) -> Expr {
        Expr::BinOp {
            op,
            ty: SqlType::Boolean,
            lhs: Box::new(Expr::ColumnRef {
                table_id: 1,
                column_id,
                ty: SqlType::Int,
                nullable: false,
            }),
            rhs: Box::new(Expr::Literal {
                value: Datum::Int(v),
                ty: SqlType::Int,
            }),
        }
    }

    #[test]
    fn skip_operator_table() {
        let fragment = fragment_with_range(1, 0, 41);
        // x > 41 refutes [0, 41]
        assert!(skip_fragment(&fragment, &[qual(BinOpKind::Gt, 1, 41)]));
        // x >= 41 does not
        assert!(!skip_fragment(&fragment, &[qual(BinOpKind::Ge, 1, 41)]));
        assert!(skip_fragment(&fragment, &[qual(BinOpKind::Ge, 1, 42)]));
        // x < 0 refutes, x <= 0 does not
        assert!(skip_fragment(&fragment, &[qual(BinOpKind::Lt, 1, 0)]));
        assert!(!skip_fragment(&fragment, &[qual(BinOpKind::Le, 1, 0)]));
        // equality predicates never skip
        assert!(!skip_fragment(&fragment, &[qual(BinOpKind::Eq, 1, 500)]));
    }

    #[test]
    fn skip_requires_stats() {
        let mut fragment = FragmentInfo::new(0);
        fragment.num_tuples = 10;
        assert!(!skip_fragment(&fragment, &[qual(BinOpKind::Gt, 1, 41)]));
    }

    #[test]
    fn executor_registry_is_idempotent() {
        let a = Executor::get(7, ExecutorConfig::default());
        let b = Executor::get(7, ExecutorConfig::default());
        assert!(Arc::ptr_eq(&a, &b));
        let c = Executor::get(
            7,
            ExecutorConfig {
                grid_size: 32,
                ..Default::default()
            },
        );
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
