//! Lowering from planned expressions to the row-function IR.
//!
//! The row function decodes referenced columns, evaluates the filter and all
//! target expressions for one row position, and writes into the output slots
//! or the grouped aggregation buffer. Nullable operands go through the
//! null-aware runtime helpers; non-null operands use direct instructions.
use std::collections::BTreeMap;

use data_types::{AggKind, Datum, Encoding, SqlType, TargetInfo};
use hashbrown::HashMap;
use observability_deps::tracing::debug;
use plan::{BinOpKind, Expr, ExtractField, Target, UOpKind};
use result_set::{
    CountDistinctDescriptor, CountDistinctImplType, GroupByColRangeType, QueryMemoryDescriptor,
    NULL_DOUBLE, NULL_INT,
};

use crate::ir::{
    AggOp, BinOp, BlockId, ColDecoder, Function, Helper, Inst, Module, OpTy, Reg, Terminator,
    ERR_DIV_BY_ZERO,
};
use crate::literals::LiteralBuffer;
use crate::{CompilationFailedSnafu, Result};

/// Guessed-range group buffers get this many main entries.
const GUESSED_ENTRY_COUNT: usize = 2048;
/// And this many small-overflow entries.
const GUESSED_SMALL_COUNT: usize = 128;
/// Largest dense range the known-range and perfect-hash layouts accept.
const MAX_DENSE_ENTRIES: usize = 1 << 20;
/// Largest value span a count-distinct bitmap covers.
const MAX_BITMAP_BITS: i64 = 1 << 23;

/// Everything the lowering needs to know about the scanned table.
#[derive(Debug)]
pub struct CompileInput<'a> {
    pub name: &'a str,
    pub groupby_exprs: &'a [Expr],
    pub targets: &'a [Target],
    pub quals: &'a [Expr],
    /// Column id to kernel column-buffer index.
    pub col_slots: &'a BTreeMap<i32, u16>,
    /// Column id to storage encoding.
    pub col_encodings: &'a BTreeMap<i32, Encoding>,
    /// Known value ranges per column, from chunk statistics.
    pub col_ranges: &'a BTreeMap<i32, (i64, i64)>,
    pub hoist_literals: bool,
}

/// The lowered module plus everything the executor needs to launch it.
#[derive(Debug)]
pub struct LoweredKernel {
    pub module: Module,
    pub literal_buf: Vec<u8>,
    pub query_mem_desc: QueryMemoryDescriptor,
    pub target_infos: Vec<TargetInfo>,
    pub must_run_on_cpu: bool,
}

struct Lowerer<'a> {
    input: &'a CompileInput<'a>,
    func: Function,
    cur: BlockId,
    lits: LiteralBuffer,
    must_run_on_cpu: bool,
}

impl<'a> Lowerer<'a> {
    fn new(input: &'a CompileInput<'a>) -> Self {
        let mut func = Function::new("row_func");
        let preamble = func.add_block();
        func.blocks[preamble].term = Terminator::Jump(1);
        let body = func.add_block();
        Self {
            input,
            func,
            cur: body,
            lits: LiteralBuffer::new(),
            must_run_on_cpu: false,
        }
    }

    fn push(&mut self, inst: Inst) {
        self.func.blocks[self.cur].insts.push(inst);
    }

    fn op_ty(ty: SqlType) -> OpTy {
        if ty.is_fp() {
            OpTy::F64
        } else {
            OpTy::I64
        }
    }

    fn null_val(ty: OpTy) -> i64 {
        match ty {
            OpTy::I64 => NULL_INT,
            OpTy::F64 => NULL_DOUBLE.to_bits() as i64,
        }
    }

    fn lower_column(&mut self, column_id: i32, ty: SqlType, nullable: bool) -> Result<Reg> {
        let col = *self.input.col_slots.get(&column_id).ok_or_else(|| {
            CompilationFailedSnafu {
                what: format!("column {column_id} has no buffer slot"),
            }
            .build()
        })?;
        let encoding = self.input.col_encodings.get(&column_id).copied().ok_or_else(|| {
            CompilationFailedSnafu {
                what: format!("column {column_id} has no encoding"),
            }
            .build()
        })?;

        let decoder = match (encoding, ty) {
            (_, SqlType::Text { dict_id: None }) => {
                return CompilationFailedSnafu {
                    what: "real string columns are not supported by the row function",
                }
                .fail()
            }
            (Encoding::Raw { .. }, SqlType::Text { dict_id: Some(_) }) => ColDecoder::DictId,
            (Encoding::Raw { width }, t) if t.is_fp() => ColDecoder::RawFloat {
                width: width as u8,
            },
            (Encoding::Raw { width }, _) => ColDecoder::RawInt {
                width: width as u8,
            },
            (Encoding::Fixed { bits }, _) => ColDecoder::FixedInt { width: bits / 8 },
        };

        let null_sentinel = nullable.then(|| match decoder {
            ColDecoder::RawFloat { width: 4 } => ((f32::MIN as f64).to_bits()) as i64,
            ColDecoder::RawFloat { .. } => f64::MIN.to_bits() as i64,
            ColDecoder::RawInt { .. } | ColDecoder::DictId => ty.null_sentinel(),
            // fixed-width encodings narrow the stored sentinel with the data
            ColDecoder::FixedInt { width } => match width {
                1 => i8::MIN as i64,
                2 => i16::MIN as i64,
                4 => i32::MIN as i64,
                _ => i64::MIN,
            },
        });

        let dst = self.func.alloc_reg();
        self.push(Inst::LoadCol {
            dst,
            col,
            decoder,
            ty,
            null_sentinel,
        });
        Ok(dst)
    }

    fn lower_literal(&mut self, value: &Datum, ty: SqlType) -> Result<Reg> {
        let dst = self.func.alloc_reg();
        if value.is_null() {
            let null = Self::null_val(Self::op_ty(ty));
            self.push(Inst::Const { dst, value: null });
            return Ok(dst);
        }
        // string literals always live in the literal buffer; the register
        // carries their offset
        if let Datum::Str(_) = value {
            let offset = self.lits.offset_of(value, ty)?;
            self.push(Inst::Const {
                dst,
                value: offset as i64,
            });
            return Ok(dst);
        }
        if self.input.hoist_literals {
            let offset = self.lits.offset_of(value, ty)?;
            let (width, op_ty) = match ty {
                SqlType::SmallInt | SqlType::Boolean => (2, OpTy::I64),
                SqlType::Int | SqlType::Text { .. } => (4, OpTy::I64),
                SqlType::Float => (4, OpTy::F64),
                SqlType::Double => (8, OpTy::F64),
                _ => (8, OpTy::I64),
            };
            self.push(Inst::LoadLit {
                dst,
                offset,
                width,
                ty: op_ty,
            });
        } else {
            let bits = match Self::op_ty(ty) {
                OpTy::I64 => value.as_i64().ok_or_else(|| {
                    CompilationFailedSnafu {
                        what: format!("literal {value:?} is not integer-typed"),
                    }
                    .build()
                })?,
                OpTy::F64 => {
                    let v = value.as_f64().ok_or_else(|| {
                        CompilationFailedSnafu {
                            what: format!("literal {value:?} is not double-typed"),
                        }
                        .build()
                    })?;
                    v.to_bits() as i64
                }
            };
            self.push(Inst::Const { dst, value: bits });
        }
        Ok(dst)
    }

    /// Widen an integer-typed register to the punned-double view.
    fn widen_to_double(&mut self, src: Reg, nullable: bool) -> Reg {
        let dst = self.func.alloc_reg();
        self.push(Inst::IntToDouble { dst, src, nullable });
        dst
    }

    fn lower_binop(&mut self, op: BinOpKind, lhs: &Expr, rhs: &Expr) -> Result<Reg> {
        // dictionary-encoded string comparisons route through the string
        // helpers and pin the kernel to the CPU
        if lhs.ty().is_string() || rhs.ty().is_string() {
            if !op.is_comparison() {
                return CompilationFailedSnafu {
                    what: format!("{op:?} is not defined over strings"),
                }
                .fail();
            }
            return self.lower_string_cmp(op, lhs, rhs);
        }

        let mut l = self.lower_expr(lhs)?;
        let mut r = self.lower_expr(rhs)?;
        let fp = lhs.ty().is_fp() || rhs.ty().is_fp();
        if fp && !lhs.ty().is_fp() {
            l = self.widen_to_double(l, lhs.nullable());
        }
        if fp && !rhs.ty().is_fp() {
            r = self.widen_to_double(r, rhs.nullable());
        }
        let op_ty = if fp { OpTy::F64 } else { OpTy::I64 };
        let nullable = lhs.nullable() || rhs.nullable();

        // division exits the kernel on a zero divisor, nullable or not
        if matches!(op, BinOpKind::Divide | BinOpKind::Modulo) {
            self.emit_div_zero_check(r, op_ty);
        }

        let dst = self.func.alloc_reg();
        if nullable {
            let helper = nullable_helper(op, op_ty)?;
            self.push(Inst::CallBinary {
                dst,
                helper,
                lhs: l,
                rhs: r,
                null_val: Self::null_val(op_ty),
            });
        } else {
            self.push(Inst::BinOp {
                dst,
                op: direct_op(op),
                ty: op_ty,
                lhs: l,
                rhs: r,
            });
        }
        Ok(dst)
    }

    /// Branch to a kernel exit with the division-by-zero code when the
    /// divisor register is zero.
    fn emit_div_zero_check(&mut self, divisor: Reg, ty: OpTy) {
        let zero = self.func.alloc_reg();
        self.push(Inst::Const {
            dst: zero,
            value: match ty {
                OpTy::I64 => 0,
                OpTy::F64 => 0f64.to_bits() as i64,
            },
        });
        let is_zero = self.func.alloc_reg();
        self.push(Inst::BinOp {
            dst: is_zero,
            op: BinOp::CmpEq,
            ty,
            lhs: divisor,
            rhs: zero,
        });
        let err_block = self.func.add_block();
        self.func.blocks[err_block].term = Terminator::RetError(ERR_DIV_BY_ZERO);
        let cont = self.func.add_block();
        self.func.blocks[self.cur].term = Terminator::Branch {
            cond: is_zero,
            then_block: err_block,
            else_block: cont,
        };
        self.cur = cont;
    }

    fn lower_string_cmp(&mut self, op: BinOpKind, lhs: &Expr, rhs: &Expr) -> Result<Reg> {
        self.must_run_on_cpu = true;
        let (col, lit) = match (lhs, rhs) {
            (col @ Expr::ColumnRef { .. }, Expr::Literal { value, .. }) => (col, value),
            (Expr::Literal { value, .. }, col @ Expr::ColumnRef { .. }) => (col, value),
            _ => {
                return CompilationFailedSnafu {
                    what: "string comparison requires a column and a literal",
                }
                .fail()
            }
        };
        let dict_id = col.ty().dict_id().ok_or_else(|| {
            CompilationFailedSnafu {
                what: "string comparison requires a dictionary-encoded column",
            }
            .build()
        })?;
        let arg = self.lower_expr(col)?;
        let pattern = self.lower_literal(lit, SqlType::Text { dict_id: None })?;
        let dst = self.func.alloc_reg();
        self.push(Inst::CallString {
            dst,
            helper: Helper::StringCmp {
                op: direct_op(op),
            },
            arg,
            pattern,
            escape: 0,
            dict_id,
        });
        Ok(dst)
    }

    /// CASE lowering: the branch chain is emitted in reverse, each predicate
    /// block jumping to its value block or to the next predicate; the else
    /// block is the tail.
    fn lower_case(
        &mut self,
        branches: &[(Expr, Expr)],
        else_expr: Option<&Expr>,
        ty: SqlType,
    ) -> Result<Reg> {
        let prev = self.cur;
        let result = self.func.alloc_reg();
        let merge = self.func.add_block();

        let else_block = self.func.add_block();
        self.cur = else_block;
        let val = match else_expr {
            Some(e) => self.lower_expr(e)?,
            None => {
                let dst = self.func.alloc_reg();
                self.push(Inst::Const {
                    dst,
                    value: Self::null_val(Self::op_ty(ty)),
                });
                dst
            }
        };
        self.push(Inst::Copy { dst: result, src: val });
        self.func.blocks[self.cur].term = Terminator::Jump(merge);

        let mut tail = else_block;
        for (pred, val) in branches.iter().rev() {
            let val_block = self.func.add_block();
            self.cur = val_block;
            let v = self.lower_expr(val)?;
            self.push(Inst::Copy { dst: result, src: v });
            self.func.blocks[self.cur].term = Terminator::Jump(merge);

            let pred_block = self.func.add_block();
            self.cur = pred_block;
            let p = self.lower_expr(pred)?;
            self.func.blocks[self.cur].term = Terminator::Branch {
                cond: p,
                then_block: val_block,
                else_block: tail,
            };
            tail = pred_block;
        }

        // route the preceding block into the chain; evaluation continues at
        // the merge point
        self.func.blocks[prev].term = Terminator::Jump(tail);
        self.cur = merge;
        Ok(result)
    }

    fn lower_expr(&mut self, e: &Expr) -> Result<Reg> {
        match e {
            Expr::ColumnRef {
                column_id,
                ty,
                nullable,
                ..
            } => self.lower_column(*column_id, *ty, *nullable),
            Expr::Literal { value, ty } => self.lower_literal(value, *ty),
            Expr::BinOp { op, lhs, rhs, .. } => self.lower_binop(*op, lhs, rhs),
            Expr::UOp { op, ty, arg } => self.lower_uop(*op, *ty, arg),
            Expr::Case {
                branches,
                else_expr,
                ty,
            } => self.lower_case(branches, else_expr.as_deref(), *ty),
            Expr::Extract { field, arg } => {
                let a = self.lower_expr(arg)?;
                let dst = self.func.alloc_reg();
                self.push(Inst::CallUnary {
                    dst,
                    helper: extract_helper(*field),
                    arg: a,
                    null_val: NULL_INT,
                });
                Ok(dst)
            }
            Expr::Like {
                arg,
                pattern,
                escape,
                case_insensitive,
            } => self.lower_like(arg, pattern, *escape, *case_insensitive),
            Expr::InValues { arg, values } => {
                let a = self.lower_expr(arg)?;
                let ints: Result<Vec<i64>> = values
                    .iter()
                    .map(|v| {
                        v.as_i64().ok_or_else(|| {
                            CompilationFailedSnafu {
                                what: "IN list values must be integer-typed",
                            }
                            .build()
                        })
                    })
                    .collect();
                let dst = self.func.alloc_reg();
                self.push(Inst::InValues {
                    dst,
                    arg: a,
                    values: ints?,
                    null_val: NULL_INT,
                });
                Ok(dst)
            }
        }
    }

    fn lower_uop(&mut self, op: UOpKind, ty: SqlType, arg: &Expr) -> Result<Reg> {
        match op {
            UOpKind::Not => {
                let a = self.lower_expr(arg)?;
                let dst = self.func.alloc_reg();
                self.push(Inst::Not { dst, src: a });
                Ok(dst)
            }
            UOpKind::Minus => {
                let a = self.lower_expr(arg)?;
                let op_ty = Self::op_ty(arg.ty());
                let dst = self.func.alloc_reg();
                if arg.nullable() {
                    // null-aware negate: multiply by minus one
                    let minus_one = self.func.alloc_reg();
                    self.push(Inst::Const {
                        dst: minus_one,
                        value: match op_ty {
                            OpTy::I64 => -1,
                            OpTy::F64 => (-1f64).to_bits() as i64,
                        },
                    });
                    let helper = match op_ty {
                        OpTy::I64 => Helper::MulI64Nullable,
                        OpTy::F64 => Helper::MulDoubleNullable,
                    };
                    self.push(Inst::CallBinary {
                        dst,
                        helper,
                        lhs: a,
                        rhs: minus_one,
                        null_val: Self::null_val(op_ty),
                    });
                } else {
                    self.push(Inst::Neg {
                        dst,
                        src: a,
                        ty: op_ty,
                    });
                }
                Ok(dst)
            }
            UOpKind::IsNull => {
                let a = self.lower_expr(arg)?;
                let dst = self.func.alloc_reg();
                self.push(Inst::IsNull {
                    dst,
                    src: a,
                    sentinel: Self::null_val(Self::op_ty(arg.ty())),
                });
                Ok(dst)
            }
            UOpKind::Cast => {
                let a = self.lower_expr(arg)?;
                let from = Self::op_ty(arg.ty());
                let to = Self::op_ty(ty);
                match (from, to) {
                    (OpTy::I64, OpTy::F64) => {
                        let dst = self.func.alloc_reg();
                        self.push(Inst::IntToDouble {
                            dst,
                            src: a,
                            nullable: arg.nullable(),
                        });
                        Ok(dst)
                    }
                    (OpTy::F64, OpTy::I64) => {
                        let dst = self.func.alloc_reg();
                        self.push(Inst::DoubleToInt {
                            dst,
                            src: a,
                            nullable: arg.nullable(),
                        });
                        Ok(dst)
                    }
                    // width changes are free in 64-bit registers
                    _ => Ok(a),
                }
            }
        }
    }

    fn lower_like(
        &mut self,
        arg: &Expr,
        pattern: &Expr,
        escape: Option<char>,
        case_insensitive: bool,
    ) -> Result<Reg> {
        self.must_run_on_cpu = true;
        let dict_id = arg.ty().dict_id().ok_or_else(|| {
            CompilationFailedSnafu {
                what: "LIKE requires a dictionary-encoded column",
            }
            .build()
        })?;
        let Expr::Literal { value, .. } = pattern else {
            return CompilationFailedSnafu {
                what: "LIKE pattern must be a literal",
            }
            .fail();
        };
        let a = self.lower_expr(arg)?;
        let p = self.lower_literal(value, SqlType::Text { dict_id: None })?;
        let dst = self.func.alloc_reg();
        self.push(Inst::CallString {
            dst,
            helper: if case_insensitive {
                Helper::StringILike
            } else {
                Helper::StringLike
            },
            arg: a,
            pattern: p,
            escape: escape.map_or(0, |c| c as u8),
            dict_id,
        });
        Ok(dst)
    }
}

fn direct_op(op: BinOpKind) -> BinOp {
    match op {
        BinOpKind::Plus => BinOp::Add,
        BinOpKind::Minus => BinOp::Sub,
        BinOpKind::Times => BinOp::Mul,
        BinOpKind::Divide => BinOp::Div,
        BinOpKind::Modulo => BinOp::Mod,
        BinOpKind::Eq => BinOp::CmpEq,
        BinOpKind::Ne => BinOp::CmpNe,
        BinOpKind::Lt => BinOp::CmpLt,
        BinOpKind::Le => BinOp::CmpLe,
        BinOpKind::Gt => BinOp::CmpGt,
        BinOpKind::Ge => BinOp::CmpGe,
        BinOpKind::And => BinOp::LogicalAnd,
        BinOpKind::Or => BinOp::LogicalOr,
    }
}

fn nullable_helper(op: BinOpKind, ty: OpTy) -> Result<Helper> {
    let helper = match (op, ty) {
        (BinOpKind::Plus, OpTy::I64) => Helper::AddI64Nullable,
        (BinOpKind::Minus, OpTy::I64) => Helper::SubI64Nullable,
        (BinOpKind::Times, OpTy::I64) => Helper::MulI64Nullable,
        (BinOpKind::Divide, OpTy::I64) => Helper::DivI64Nullable,
        (BinOpKind::Modulo, OpTy::I64) => Helper::ModI64Nullable,
        (BinOpKind::Plus, OpTy::F64) => Helper::AddDoubleNullable,
        (BinOpKind::Minus, OpTy::F64) => Helper::SubDoubleNullable,
        (BinOpKind::Times, OpTy::F64) => Helper::MulDoubleNullable,
        (BinOpKind::Divide, OpTy::F64) => Helper::DivDoubleNullable,
        (op, OpTy::I64) if op.is_comparison() => Helper::CmpI64Nullable {
            op: direct_op(op),
        },
        (op, OpTy::F64) if op.is_comparison() => Helper::CmpDoubleNullable {
            op: direct_op(op),
        },
        (BinOpKind::And | BinOpKind::Or, _) => {
            // logical connectives treat null as not-true
            return CompilationFailedSnafu {
                what: "logical connectives lower to direct instructions",
            }
            .fail();
        }
        (op, ty) => {
            return CompilationFailedSnafu {
                what: format!("no nullable helper for {op:?} over {ty:?}"),
            }
            .fail()
        }
    };
    Ok(helper)
}

fn extract_helper(field: ExtractField) -> Helper {
    match field {
        ExtractField::Year => Helper::ExtractYear,
        ExtractField::Month => Helper::ExtractMonth,
        ExtractField::Day => Helper::ExtractDay,
        ExtractField::Hour => Helper::ExtractHour,
        ExtractField::Minute => Helper::ExtractMinute,
        ExtractField::Second => Helper::ExtractSecond,
        ExtractField::DayOfWeek => Helper::ExtractDayOfWeek,
        ExtractField::DayOfYear => Helper::ExtractDayOfYear,
        ExtractField::Epoch => Helper::ExtractEpoch,
    }
}

/// Build the target descriptors for the output columns. For AVG the carried
/// type is the argument's, so slot decoding picks the right pair flavour.
pub fn build_target_infos(targets: &[Target]) -> Vec<TargetInfo> {
    targets
        .iter()
        .map(|t| match t {
            Target::Projection(e) => TargetInfo {
                agg_kind: None,
                sql_type: e.ty(),
                skip_null_val: false,
                is_distinct: false,
            },
            Target::Aggregate {
                kind,
                arg,
                distinct,
            } => {
                let arg_ty = arg.as_ref().map(Expr::ty);
                let sql_type = match kind {
                    AggKind::Count => SqlType::BigInt,
                    AggKind::Avg => arg_ty.unwrap_or(SqlType::BigInt),
                    _ => arg_ty.unwrap_or(SqlType::BigInt),
                };
                TargetInfo {
                    agg_kind: Some(*kind),
                    sql_type,
                    skip_null_val: arg.as_ref().is_some_and(Expr::nullable),
                    is_distinct: *distinct,
                }
            }
        })
        .collect()
}

/// Choose the group-by layout from the key expressions and the known column
/// ranges, and describe every count-distinct target.
fn build_query_mem_desc(
    input: &CompileInput<'_>,
    target_infos: &[TargetInfo],
) -> QueryMemoryDescriptor {
    let slot_widths: Vec<i8> = target_infos
        .iter()
        .flat_map(|t| vec![8i8; t.slot_count()])
        .collect();

    let mut count_distinct_descriptors = HashMap::new();
    for (idx, (target, info)) in input.targets.iter().zip(target_infos).enumerate() {
        if !info.is_distinct {
            continue;
        }
        let range = match target {
            Target::Aggregate {
                arg: Some(Expr::ColumnRef { column_id, .. }),
                ..
            } => input.col_ranges.get(column_id),
            _ => None,
        };
        let desc = match range {
            Some((lo, hi)) if hi - lo < MAX_BITMAP_BITS => CountDistinctDescriptor {
                impl_type: CountDistinctImplType::Bitmap,
                min_val: *lo,
                bitmap_sz_bits: hi - lo + 1,
            },
            _ => CountDistinctDescriptor {
                impl_type: CountDistinctImplType::OrderedSet,
                min_val: 0,
                bitmap_sz_bits: 0,
            },
        };
        count_distinct_descriptors.insert(idx, desc);
    }

    let key_range = |e: &Expr| match e {
        Expr::ColumnRef { column_id, .. } => input.col_ranges.get(column_id).copied(),
        _ => None,
    };

    let (hash_type, entry_count, entry_count_small, min_val, key_ranges) =
        match input.groupby_exprs.len() {
            0 => (GroupByColRangeType::Scan, 1, 0, 0, Vec::new()),
            1 => match key_range(&input.groupby_exprs[0]) {
                Some((lo, hi)) if (hi - lo + 1) as usize <= MAX_DENSE_ENTRIES => (
                    GroupByColRangeType::OneColKnownRange,
                    (hi - lo + 1) as usize,
                    0,
                    lo,
                    Vec::new(),
                ),
                _ => (
                    GroupByColRangeType::OneColGuessedRange,
                    GUESSED_ENTRY_COUNT,
                    GUESSED_SMALL_COUNT,
                    0,
                    Vec::new(),
                ),
            },
            _ => {
                let ranges: Option<Vec<(i64, i64)>> =
                    input.groupby_exprs.iter().map(&key_range).collect();
                match ranges {
                    Some(ranges)
                        if ranges
                            .iter()
                            .map(|(lo, hi)| (hi - lo + 1) as usize)
                            .product::<usize>()
                            <= MAX_DENSE_ENTRIES =>
                    {
                        let product = ranges
                            .iter()
                            .map(|(lo, hi)| (hi - lo + 1) as usize)
                            .product();
                        (
                            GroupByColRangeType::MultiColPerfectHash,
                            product,
                            0,
                            0,
                            ranges,
                        )
                    }
                    _ => (
                        GroupByColRangeType::MultiCol,
                        GUESSED_ENTRY_COUNT,
                        GUESSED_SMALL_COUNT,
                        0,
                        Vec::new(),
                    ),
                }
            }
        };

    QueryMemoryDescriptor {
        hash_type,
        keyless: input.groupby_exprs.is_empty(),
        group_col_widths: vec![8; input.groupby_exprs.len()],
        agg_col_widths: slot_widths,
        entry_count,
        entry_count_small,
        min_val,
        key_ranges,
        output_columnar: false,
        count_distinct_descriptors,
    }
}

/// Lower the planned expressions into a module: a query template and the
/// row function it will inline.
pub fn lower_kernel(input: &CompileInput<'_>) -> Result<LoweredKernel> {
    let target_infos = build_target_infos(input.targets);
    let query_mem_desc = build_query_mem_desc(input, &target_infos);

    let mut lo = Lowerer::new(input);

    // filter: all qualifiers must hold; a failed predicate skips the row
    let exit = lo.func.add_block();
    lo.func.blocks[exit].term = Terminator::Ret;
    for qual in input.quals {
        let pred = lo.lower_expr(qual)?;
        let next = lo.func.add_block();
        lo.func.blocks[lo.cur].term = Terminator::Branch {
            cond: pred,
            then_block: next,
            else_block: exit,
        };
        lo.cur = next;
    }

    // group entry resolution precedes every slot write
    if !input.groupby_exprs.is_empty() || input.targets.iter().any(|t| !matches!(t, Target::Projection(_))) {
        let mut keys = Vec::with_capacity(input.groupby_exprs.len());
        for key_expr in input.groupby_exprs {
            if key_expr.ty().is_fp() {
                return CompilationFailedSnafu {
                    what: "floating point group keys are not supported",
                }
                .fail();
            }
            keys.push(lo.lower_expr(key_expr)?);
        }
        lo.push(Inst::GroupEntry { keys });
    }

    let mut slot = 0u16;
    for (idx, (target, info)) in input.targets.iter().zip(&target_infos).enumerate() {
        match target {
            Target::Projection(e) => {
                let src = lo.lower_expr(e)?;
                lo.push(Inst::Project { slot, src });
            }
            Target::Aggregate { kind, arg, distinct } => {
                let arg_reg = match arg {
                    Some(a) => Some(lo.lower_expr(a)?),
                    None => None,
                };
                let fp = info.sql_type.is_fp();
                let null_val = Lowerer::null_val(if fp { OpTy::F64 } else { OpTy::I64 });
                let skip_null = info.skip_null_val;
                if *distinct {
                    lo.push(Inst::Agg {
                        op: AggOp::CountDistinct,
                        slot,
                        arg: arg_reg,
                        skip_null,
                        null_val,
                        target: idx as u16,
                    });
                } else {
                    match kind {
                        AggKind::Count => lo.push(Inst::Agg {
                            op: AggOp::Count,
                            slot,
                            arg: arg_reg,
                            skip_null,
                            null_val,
                            target: idx as u16,
                        }),
                        AggKind::Sum => lo.push(Inst::Agg {
                            op: if fp { AggOp::SumDouble } else { AggOp::Sum },
                            slot,
                            arg: arg_reg,
                            skip_null,
                            null_val,
                            target: idx as u16,
                        }),
                        AggKind::Avg => {
                            lo.push(Inst::Agg {
                                op: if fp { AggOp::SumDouble } else { AggOp::Sum },
                                slot,
                                arg: arg_reg,
                                skip_null,
                                null_val,
                                target: idx as u16,
                            });
                            lo.push(Inst::Agg {
                                op: AggOp::Count,
                                slot: slot + 1,
                                arg: arg_reg,
                                skip_null,
                                null_val,
                                target: idx as u16,
                            });
                        }
                        AggKind::Min => lo.push(Inst::Agg {
                            op: if fp { AggOp::MinDouble } else { AggOp::Min },
                            slot,
                            arg: arg_reg,
                            skip_null: true,
                            null_val,
                            target: idx as u16,
                        }),
                        AggKind::Max => lo.push(Inst::Agg {
                            op: if fp { AggOp::MaxDouble } else { AggOp::Max },
                            slot,
                            arg: arg_reg,
                            skip_null: true,
                            null_val,
                            target: idx as u16,
                        }),
                    }
                }
            }
        }
        slot += info.slot_count() as u16;
    }
    lo.func.blocks[lo.cur].term = Terminator::Ret;

    // the query template the row function inlines into; its shape depends on
    // whether the kernel aggregates and whether literals are hoisted
    let template_name = if input.groupby_exprs.is_empty() && query_mem_desc.keyless {
        if input.hoist_literals {
            "query_template_hoisted"
        } else {
            "query_template"
        }
    } else if input.hoist_literals {
        "query_group_by_template_hoisted"
    } else {
        "query_group_by_template"
    };
    let mut query_func = Function::new(template_name);
    let preamble = query_func.add_block();
    query_func.blocks[preamble].term = Terminator::Jump(1);
    let body = query_func.add_block();
    query_func.blocks[body].term = Terminator::Ret;

    debug!(
        name = input.name,
        blocks = lo.func.blocks.len(),
        must_run_on_cpu = lo.must_run_on_cpu,
        "lowered row function"
    );

    Ok(LoweredKernel {
        module: Module {
            query_func,
            row_func: lo.func,
        },
        literal_buf: lo.lits.serialize(),
        query_mem_desc,
        target_infos,
        must_run_on_cpu: lo.must_run_on_cpu,
    })
}
