//! The execution engine: a finalized code object that runs the optimized
//! query function over a fragment's column buffers.
//!
//! Kernel entry point shape:
//! `launch(col_bufs, num_rows, scan_limit, literals, init_agg_vals, out)`,
//! returning `0` or an internal error code. The preamble block runs once per
//! launch; per-row execution starts at block 1.
use observability_deps::tracing::trace;
use result_set::{
    DictResolver, GroupBuffers, GroupEntry, QueryMemoryDescriptor, RowSetMemoryOwner,
    EMPTY_DISTINCT_ID, NULL_DOUBLE, NULL_INT,
};

use crate::ir::{
    AggOp, BinOp, Block, ColDecoder, Function, Helper, Inst, OpTy, Terminator, ERR_DIV_BY_ZERO,
    ERR_OUT_OF_SLOTS,
};
use crate::runtime;

/// Where a kernel writes its output.
pub enum KernelOut<'a> {
    /// Grouped (or keyless) aggregation into raw group buffers.
    Group {
        query_mem_desc: &'a QueryMemoryDescriptor,
        buffers: &'a mut GroupBuffers,
        owner: &'a RowSetMemoryOwner,
    },
    /// Plain projection: one slot row per passing input row.
    Rows(&'a mut Vec<Vec<i64>>),
}

impl std::fmt::Debug for KernelOut<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Group { .. } => f.write_str("KernelOut::Group"),
            Self::Rows(_) => f.write_str("KernelOut::Rows"),
        }
    }
}

/// Arguments for one kernel launch over one fragment.
pub struct LaunchArgs<'a> {
    pub col_bufs: &'a [&'a [u8]],
    pub num_rows: usize,
    /// Stop after this many output rows (projections only).
    pub scan_limit: Option<usize>,
    /// The serialized hoisted-literal buffer.
    pub literals: &'a [u8],
    /// Initial slot values; seeds projection rows.
    pub init_agg_vals: &'a [i64],
    pub out: KernelOut<'a>,
    /// Resolves dictionary ids for string helpers.
    pub dicts: Option<&'a dyn DictResolver>,
}

impl std::fmt::Debug for LaunchArgs<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchArgs")
            .field("num_rows", &self.num_rows)
            .field("scan_limit", &self.scan_limit)
            .field("out", &self.out)
            .finish()
    }
}

/// A finalized, launchable code object. Cache entries own their engine
/// exclusively; the executor shares it through an `Arc`.
#[derive(Debug)]
pub struct ExecutionEngine {
    func: Function,
}

impl ExecutionEngine {
    pub(crate) fn new(func: Function) -> Self {
        Self { func }
    }

    pub fn function(&self) -> &Function {
        &self.func
    }

    /// Run the kernel over one fragment. Returns `0` on success or an
    /// internal error code.
    pub fn launch(&self, args: &mut LaunchArgs<'_>) -> i32 {
        let mut regs = vec![0i64; self.func.num_regs as usize];
        let mut state = RowState {
            entry: None,
            row: vec![0i64; args.init_agg_vals.len()],
            wrote: false,
        };

        // preamble: hoisted literal loads and other loop invariants
        debug_assert!(!self.func.blocks.is_empty());
        if let Err(code) = self.exec_insts(&self.func.blocks[0], &mut regs, 0, args, &mut state) {
            return code;
        }

        let mut emitted = 0usize;
        for pos in 0..args.num_rows {
            state.entry = None;
            state.wrote = false;
            for (slot, init) in state.row.iter_mut().zip(args.init_agg_vals) {
                *slot = *init;
            }

            let mut block = 1usize;
            loop {
                let b = &self.func.blocks[block];
                if let Err(code) = self.exec_insts(b, &mut regs, pos, args, &mut state) {
                    return code;
                }
                match b.term {
                    Terminator::Jump(next) => block = next,
                    Terminator::Branch {
                        cond,
                        then_block,
                        else_block,
                    } => {
                        // a predicate passes only on exactly 1; the boolean
                        // null sentinel falls through to the else block
                        block = if regs[cond as usize] == 1 {
                            then_block
                        } else {
                            else_block
                        };
                    }
                    Terminator::Ret => break,
                    Terminator::RetError(code) => return code,
                }
            }

            if state.wrote {
                if let KernelOut::Rows(rows) = &mut args.out {
                    rows.push(state.row.clone());
                }
                emitted += 1;
                if let Some(limit) = args.scan_limit {
                    if emitted >= limit {
                        trace!(emitted, "scan limit reached");
                        break;
                    }
                }
            }
        }
        0
    }

    fn exec_insts(
        &self,
        block: &Block,
        regs: &mut [i64],
        pos: usize,
        args: &mut LaunchArgs<'_>,
        state: &mut RowState,
    ) -> Result<(), i32> {
        for inst in &block.insts {
            self.exec_inst(inst, regs, pos, args, state)?;
        }
        Ok(())
    }

    fn exec_inst(
        &self,
        inst: &Inst,
        regs: &mut [i64],
        pos: usize,
        args: &mut LaunchArgs<'_>,
        state: &mut RowState,
    ) -> Result<(), i32> {
        match inst {
            Inst::LoadCol {
                dst,
                col,
                decoder,
                null_sentinel,
                ..
            } => {
                let buf = args.col_bufs[*col as usize];
                let mut v = decode_col(buf, pos, *decoder);
                if let Some(sentinel) = null_sentinel {
                    // normalize the stored sentinel to the 64-bit one
                    if v == *sentinel {
                        v = match decoder {
                            ColDecoder::RawFloat { .. } => NULL_DOUBLE.to_bits() as i64,
                            _ => NULL_INT,
                        };
                    }
                }
                regs[*dst as usize] = v;
            }
            Inst::LoadLit {
                dst,
                offset,
                width,
                ty,
            } => {
                regs[*dst as usize] = load_literal(args.literals, *offset, *width, *ty);
            }
            Inst::Const { dst, value } => regs[*dst as usize] = *value,
            Inst::Copy { dst, src } => regs[*dst as usize] = regs[*src as usize],
            Inst::BinOp { dst, op, ty, lhs, rhs } => {
                let a = regs[*lhs as usize];
                let b = regs[*rhs as usize];
                regs[*dst as usize] = fold_binop(*op, *ty, a, b)?;
            }
            Inst::Neg { dst, src, ty } => {
                regs[*dst as usize] = match ty {
                    OpTy::I64 => regs[*src as usize].wrapping_neg(),
                    OpTy::F64 => (-f64::from_bits(regs[*src as usize] as u64)).to_bits() as i64,
                };
            }
            Inst::Not { dst, src } => {
                regs[*dst as usize] = match regs[*src as usize] {
                    1 => 0,
                    0 => 1,
                    _ => runtime::BOOLEAN_NULL,
                };
            }
            Inst::IntToDouble { dst, src, nullable } => {
                let v = regs[*src as usize];
                regs[*dst as usize] = if *nullable && v == NULL_INT {
                    NULL_DOUBLE.to_bits() as i64
                } else {
                    (v as f64).to_bits() as i64
                };
            }
            Inst::DoubleToInt { dst, src, nullable } => {
                let v = f64::from_bits(regs[*src as usize] as u64);
                regs[*dst as usize] = if *nullable && v == NULL_DOUBLE {
                    NULL_INT
                } else {
                    v as i64
                };
            }
            Inst::IsNull { dst, src, sentinel } => {
                regs[*dst as usize] = (regs[*src as usize] == *sentinel) as i64;
            }
            Inst::CallUnary {
                dst,
                helper,
                arg,
                null_val,
            } => {
                let a = regs[*arg as usize];
                regs[*dst as usize] = if a == *null_val {
                    *null_val
                } else {
                    call_unary(*helper, a)
                };
            }
            Inst::CallBinary {
                dst,
                helper,
                lhs,
                rhs,
                null_val,
            } => {
                let a = regs[*lhs as usize];
                let b = regs[*rhs as usize];
                regs[*dst as usize] = call_binary(*helper, a, b, *null_val);
            }
            Inst::CallString {
                dst,
                helper,
                arg,
                pattern,
                escape,
                dict_id,
            } => {
                regs[*dst as usize] = call_string(
                    *helper,
                    regs[*arg as usize],
                    regs[*pattern as usize],
                    *escape,
                    *dict_id,
                    args,
                );
            }
            Inst::InValues {
                dst,
                arg,
                values,
                null_val,
            } => {
                let a = regs[*arg as usize];
                regs[*dst as usize] = if a == *null_val {
                    runtime::BOOLEAN_NULL
                } else {
                    values.contains(&a) as i64
                };
            }
            Inst::GroupEntry { keys } => {
                let key_vals: Vec<i64> = keys.iter().map(|k| regs[*k as usize]).collect();
                match &mut args.out {
                    KernelOut::Group {
                        query_mem_desc,
                        buffers,
                        ..
                    } => match query_mem_desc.group_entry(buffers, &key_vals) {
                        Some(entry) => state.entry = Some(entry),
                        None => return Err(ERR_OUT_OF_SLOTS),
                    },
                    KernelOut::Rows(_) => state.entry = None,
                }
            }
            Inst::Agg {
                op,
                slot,
                arg,
                skip_null,
                null_val,
                target,
            } => {
                let value = arg.map(|r| regs[r as usize]);
                exec_agg(*op, *slot, value, *skip_null, *null_val, *target, args, state)?;
                state.wrote = true;
            }
            Inst::Project { slot, src } => {
                let value = regs[*src as usize];
                match &mut args.out {
                    KernelOut::Group {
                        query_mem_desc,
                        buffers,
                        ..
                    } => {
                        let entry = state.entry.expect("group entry resolved before projection");
                        let off = slot_offset(query_mem_desc, entry, *slot);
                        match entry {
                            GroupEntry::Main(_) => buffers.main[off] = value,
                            GroupEntry::Small(_) => buffers.small[off] = value,
                        }
                    }
                    KernelOut::Rows(_) => state.row[*slot as usize] = value,
                }
                state.wrote = true;
            }
        }
        Ok(())
    }
}

struct RowState {
    entry: Option<GroupEntry>,
    row: Vec<i64>,
    wrote: bool,
}

fn slot_offset(qmd: &QueryMemoryDescriptor, entry: GroupEntry, slot: u16) -> usize {
    match entry {
        GroupEntry::Main(e) => qmd.slot_offset(e, slot as usize),
        GroupEntry::Small(e) => qmd.small_slot_offset(e, slot as usize),
    }
}

fn decode_col(buf: &[u8], pos: usize, decoder: ColDecoder) -> i64 {
    match decoder {
        ColDecoder::RawInt { width } | ColDecoder::FixedInt { width } => {
            let off = pos * width as usize;
            let bytes = &buf[off..off + width as usize];
            match width {
                1 => bytes[0] as i8 as i64,
                2 => i16::from_le_bytes(bytes.try_into().unwrap()) as i64,
                4 => i32::from_le_bytes(bytes.try_into().unwrap()) as i64,
                8 => i64::from_le_bytes(bytes.try_into().unwrap()),
                _ => unreachable!("bad integer width"),
            }
        }
        ColDecoder::RawFloat { width } => {
            let off = pos * width as usize;
            let bytes = &buf[off..off + width as usize];
            let v = match width {
                4 => f32::from_le_bytes(bytes.try_into().unwrap()) as f64,
                8 => f64::from_le_bytes(bytes.try_into().unwrap()),
                _ => unreachable!("bad float width"),
            };
            v.to_bits() as i64
        }
        ColDecoder::DictId => {
            let off = pos * 4;
            i32::from_le_bytes(buf[off..off + 4].try_into().unwrap()) as i64
        }
    }
}

fn load_literal(literals: &[u8], offset: u16, width: u8, ty: OpTy) -> i64 {
    let off = offset as usize;
    let bytes = &literals[off..off + width as usize];
    match (ty, width) {
        (OpTy::I64, 2) => i16::from_le_bytes(bytes.try_into().unwrap()) as i64,
        (OpTy::I64, 4) => i32::from_le_bytes(bytes.try_into().unwrap()) as i64,
        (OpTy::I64, 8) => i64::from_le_bytes(bytes.try_into().unwrap()),
        (OpTy::F64, 4) => (f32::from_le_bytes(bytes.try_into().unwrap()) as f64).to_bits() as i64,
        (OpTy::F64, 8) => f64::from_le_bytes(bytes.try_into().unwrap()).to_bits() as i64,
        _ => unreachable!("bad literal width"),
    }
}

/// Evaluate one direct binary operation; also the constant-folding rule for
/// the combine pass.
pub(crate) fn fold_binop(op: BinOp, ty: OpTy, a: i64, b: i64) -> Result<i64, i32> {
    Ok(match ty {
        OpTy::I64 => match op {
            BinOp::Add => a.wrapping_add(b),
            BinOp::Sub => a.wrapping_sub(b),
            BinOp::Mul => a.wrapping_mul(b),
            BinOp::Div => {
                if b == 0 {
                    return Err(ERR_DIV_BY_ZERO);
                }
                a.wrapping_div(b)
            }
            BinOp::Mod => {
                if b == 0 {
                    return Err(ERR_DIV_BY_ZERO);
                }
                a.wrapping_rem(b)
            }
            BinOp::CmpEq => (a == b) as i64,
            BinOp::CmpNe => (a != b) as i64,
            BinOp::CmpLt => (a < b) as i64,
            BinOp::CmpLe => (a <= b) as i64,
            BinOp::CmpGt => (a > b) as i64,
            BinOp::CmpGe => (a >= b) as i64,
            BinOp::LogicalAnd => ((a == 1) && (b == 1)) as i64,
            BinOp::LogicalOr => ((a == 1) || (b == 1)) as i64,
        },
        OpTy::F64 => {
            let x = f64::from_bits(a as u64);
            let y = f64::from_bits(b as u64);
            match op {
                BinOp::Add => (x + y).to_bits() as i64,
                BinOp::Sub => (x - y).to_bits() as i64,
                BinOp::Mul => (x * y).to_bits() as i64,
                BinOp::Div => {
                    if y == 0.0 {
                        return Err(ERR_DIV_BY_ZERO);
                    }
                    (x / y).to_bits() as i64
                }
                BinOp::Mod => {
                    if y == 0.0 {
                        return Err(ERR_DIV_BY_ZERO);
                    }
                    (x % y).to_bits() as i64
                }
                BinOp::CmpEq => (x == y) as i64,
                BinOp::CmpNe => (x != y) as i64,
                BinOp::CmpLt => (x < y) as i64,
                BinOp::CmpLe => (x <= y) as i64,
                BinOp::CmpGt => (x > y) as i64,
                BinOp::CmpGe => (x >= y) as i64,
                BinOp::LogicalAnd | BinOp::LogicalOr => {
                    unreachable!("logical ops are integer-typed")
                }
            }
        }
    })
}

fn call_unary(helper: Helper, a: i64) -> i64 {
    match helper {
        Helper::ExtractYear => runtime::extract_year(a),
        Helper::ExtractMonth => runtime::extract_month(a),
        Helper::ExtractDay => runtime::extract_day(a),
        Helper::ExtractHour => runtime::extract_hour(a),
        Helper::ExtractMinute => runtime::extract_minute(a),
        Helper::ExtractSecond => runtime::extract_second(a),
        Helper::ExtractDayOfWeek => runtime::extract_day_of_week(a),
        Helper::ExtractDayOfYear => runtime::extract_day_of_year(a),
        Helper::ExtractEpoch => runtime::extract_epoch(a),
        _ => unreachable!("not a unary helper"),
    }
}

fn cmp_op_code(op: BinOp) -> i32 {
    match op {
        BinOp::CmpEq => 0,
        BinOp::CmpNe => 1,
        BinOp::CmpLt => 2,
        BinOp::CmpLe => 3,
        BinOp::CmpGt => 4,
        BinOp::CmpGe => 5,
        _ => unreachable!("not a comparison"),
    }
}

fn call_binary(helper: Helper, a: i64, b: i64, null_val: i64) -> i64 {
    match helper {
        Helper::AddI64Nullable => runtime::add_i64_nullable(a, b, null_val),
        Helper::SubI64Nullable => runtime::sub_i64_nullable(a, b, null_val),
        Helper::MulI64Nullable => runtime::mul_i64_nullable(a, b, null_val),
        Helper::DivI64Nullable => runtime::div_i64_nullable(a, b, null_val),
        Helper::ModI64Nullable => runtime::mod_i64_nullable(a, b, null_val),
        Helper::AddDoubleNullable => runtime::add_double_nullable(
            f64::from_bits(a as u64),
            f64::from_bits(b as u64),
            f64::from_bits(null_val as u64),
        )
        .to_bits() as i64,
        Helper::SubDoubleNullable => runtime::sub_double_nullable(
            f64::from_bits(a as u64),
            f64::from_bits(b as u64),
            f64::from_bits(null_val as u64),
        )
        .to_bits() as i64,
        Helper::MulDoubleNullable => runtime::mul_double_nullable(
            f64::from_bits(a as u64),
            f64::from_bits(b as u64),
            f64::from_bits(null_val as u64),
        )
        .to_bits() as i64,
        Helper::DivDoubleNullable => runtime::div_double_nullable(
            f64::from_bits(a as u64),
            f64::from_bits(b as u64),
            f64::from_bits(null_val as u64),
        )
        .to_bits() as i64,
        Helper::CmpI64Nullable { op } => {
            runtime::cmp_i64_nullable(cmp_op_code(op), a, b, null_val)
        }
        Helper::CmpDoubleNullable { op } => runtime::cmp_double_nullable(
            cmp_op_code(op),
            f64::from_bits(a as u64),
            f64::from_bits(b as u64),
            f64::from_bits(null_val as u64),
        ),
        _ => unreachable!("not a binary helper"),
    }
}

fn call_string(
    helper: Helper,
    arg_id: i64,
    pattern_offset: i64,
    escape: u8,
    dict_id: i32,
    args: &LaunchArgs<'_>,
) -> i64 {
    if arg_id == i32::MIN as i64 {
        return runtime::BOOLEAN_NULL;
    }
    let s = match args
        .dicts
        .and_then(|d| d.lookup(dict_id, arg_id as i32))
    {
        Some(s) => s,
        None => return runtime::BOOLEAN_NULL,
    };
    let off = pattern_offset as usize;
    let len = u32::from_le_bytes(args.literals[off..off + 4].try_into().unwrap()) as usize;
    let pattern = &args.literals[off + 4..off + 4 + len];
    match helper {
        Helper::StringLike => runtime::like_match(s.as_bytes(), pattern, escape, false) as i64,
        Helper::StringILike => runtime::like_match(s.as_bytes(), pattern, escape, true) as i64,
        Helper::StringCmp { op } => {
            let ord = s.as_bytes().cmp(pattern);
            let r = match op {
                BinOp::CmpEq => ord.is_eq(),
                BinOp::CmpNe => ord.is_ne(),
                BinOp::CmpLt => ord.is_lt(),
                BinOp::CmpLe => ord.is_le(),
                BinOp::CmpGt => ord.is_gt(),
                BinOp::CmpGe => ord.is_ge(),
                _ => unreachable!("not a comparison"),
            };
            r as i64
        }
        _ => unreachable!("not a string helper"),
    }
}

#[allow(clippy::too_many_arguments)]
fn exec_agg(
    op: AggOp,
    slot: u16,
    value: Option<i64>,
    skip_null: bool,
    null_val: i64,
    target: u16,
    args: &mut LaunchArgs<'_>,
    state: &mut RowState,
) -> Result<(), i32> {
    let (qmd, buffers, owner) = match &mut args.out {
        KernelOut::Group {
            query_mem_desc,
            buffers,
            owner,
        } => (*query_mem_desc, buffers, *owner),
        KernelOut::Rows(_) => {
            unreachable!("aggregates always write group buffers")
        }
    };
    let entry = state.entry.expect("group entry resolved before aggregation");
    let off = slot_offset(qmd, entry, slot);
    let slot_ref: &mut i64 = match entry {
        GroupEntry::Main(_) => &mut buffers.main[off],
        GroupEntry::Small(_) => &mut buffers.small[off],
    };

    if skip_null {
        if let Some(v) = value {
            if v == null_val {
                return Ok(());
            }
        }
    }

    match op {
        AggOp::Count => *slot_ref += 1,
        AggOp::Sum => {
            let v = value.expect("sum needs an argument");
            if skip_null && *slot_ref == null_val {
                *slot_ref = v;
            } else {
                *slot_ref = slot_ref.wrapping_add(v);
            }
        }
        AggOp::SumDouble => {
            let v = f64::from_bits(value.expect("sum needs an argument") as u64);
            if skip_null && *slot_ref == null_val {
                *slot_ref = v.to_bits() as i64;
            } else {
                let crt = f64::from_bits(*slot_ref as u64);
                *slot_ref = (crt + v).to_bits() as i64;
            }
        }
        AggOp::Min => {
            let v = value.expect("min needs an argument");
            *slot_ref = (*slot_ref).min(v);
        }
        AggOp::MinDouble => {
            let v = f64::from_bits(value.expect("min needs an argument") as u64);
            let crt = f64::from_bits(*slot_ref as u64);
            *slot_ref = crt.min(v).to_bits() as i64;
        }
        AggOp::Max => {
            let v = value.expect("max needs an argument");
            *slot_ref = (*slot_ref).max(v);
        }
        AggOp::MaxDouble => {
            let v = f64::from_bits(value.expect("max needs an argument") as u64);
            let crt = f64::from_bits(*slot_ref as u64);
            *slot_ref = crt.max(v).to_bits() as i64;
        }
        AggOp::CountDistinct => {
            let v = value.expect("count distinct needs an argument");
            let desc = qmd
                .count_distinct_descriptors
                .get(&(target as usize))
                .expect("descriptor for count-distinct target");
            let mut id = *slot_ref;
            if id == EMPTY_DISTINCT_ID {
                id = owner.allocate_distinct(desc);
                *slot_ref = id;
            }
            owner.insert_distinct(desc, id, v);
        }
    }
    Ok(())
}
