//! The row-function IR: explicit basic blocks over virtual 64-bit
//! registers.
//!
//! Floating point values travel bit-punned through the 64-bit registers and
//! are only re-interpreted at operation boundaries; the materialised result
//! set never sees raw bits. The printed form of a function is its
//! fingerprint for the code cache, so `Display` is total and deterministic.
use std::fmt::{self, Display};

use data_types::SqlType;

/// A virtual register.
pub type Reg = u32;

/// A basic block index within a function.
pub type BlockId = usize;

/// How a referenced column decodes at a row position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColDecoder {
    /// Width-specific little-endian load with sign extension.
    RawInt { width: u8 },
    /// Raw IEEE load, widened to a punned f64.
    RawFloat { width: u8 },
    /// Narrow load followed by sign extension.
    FixedInt { width: u8 },
    /// 32-bit dictionary id load.
    DictId,
}

/// Whether an operation runs on the integer or the punned-double view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpTy {
    I64,
    F64,
}

/// Direct (non-null-aware) binary operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    CmpEq,
    CmpNe,
    CmpLt,
    CmpLe,
    CmpGt,
    CmpGe,
    LogicalAnd,
    LogicalOr,
}

/// Runtime helpers linked against the kernel; the C ABI surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Helper {
    AddI64Nullable,
    SubI64Nullable,
    MulI64Nullable,
    DivI64Nullable,
    ModI64Nullable,
    AddDoubleNullable,
    SubDoubleNullable,
    MulDoubleNullable,
    DivDoubleNullable,
    CmpI64Nullable { op: BinOp },
    CmpDoubleNullable { op: BinOp },
    ExtractYear,
    ExtractMonth,
    ExtractDay,
    ExtractHour,
    ExtractMinute,
    ExtractSecond,
    ExtractDayOfWeek,
    ExtractDayOfYear,
    ExtractEpoch,
    StringLike,
    StringILike,
    StringCmp { op: BinOp },
}

/// Aggregation steps applied to the current group entry's slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggOp {
    Count,
    Sum,
    SumDouble,
    Min,
    MinDouble,
    Max,
    MaxDouble,
    /// Bitmap insert or set insert, resolved through the memory owner by
    /// the target index carried in the instruction.
    CountDistinct,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inst {
    /// Decode the referenced column at the current row position. For
    /// nullable columns `null_sentinel` carries the stored type's sentinel
    /// (bits, for float decoders); the loaded value is normalized to the
    /// 64-bit null sentinel.
    LoadCol {
        dst: Reg,
        col: u16,
        decoder: ColDecoder,
        ty: SqlType,
        null_sentinel: Option<i64>,
    },
    /// Load a hoisted literal of `width` bytes from the literals buffer.
    LoadLit {
        dst: Reg,
        offset: u16,
        width: u8,
        ty: OpTy,
    },
    /// Inline constant; only emitted when literals are not hoisted.
    Const { dst: Reg, value: i64 },
    Copy { dst: Reg, src: Reg },
    BinOp {
        dst: Reg,
        op: BinOp,
        ty: OpTy,
        lhs: Reg,
        rhs: Reg,
    },
    /// Integer negate / logical not / int-float conversions.
    Neg { dst: Reg, src: Reg, ty: OpTy },
    Not { dst: Reg, src: Reg },
    IntToDouble { dst: Reg, src: Reg, nullable: bool },
    DoubleToInt { dst: Reg, src: Reg, nullable: bool },
    /// 1 when the operand equals the type's null sentinel.
    IsNull { dst: Reg, src: Reg, sentinel: i64 },
    /// Null-aware or string helper call.
    CallUnary { dst: Reg, helper: Helper, arg: Reg, null_val: i64 },
    CallBinary {
        dst: Reg,
        helper: Helper,
        lhs: Reg,
        rhs: Reg,
        null_val: i64,
    },
    /// String helper over `(ptr, len, pattern_ptr, pattern_len, escape)`;
    /// operands are dictionary-resolved string registers.
    CallString {
        dst: Reg,
        helper: Helper,
        arg: Reg,
        pattern: Reg,
        escape: u8,
        dict_id: i32,
    },
    /// Membership test against an inline list of constants.
    InValues { dst: Reg, arg: Reg, values: Vec<i64>, null_val: i64 },
    /// Resolve (claiming if new) the group entry for the key registers;
    /// exits the kernel with the out-of-slots code when the buffers are
    /// full.
    GroupEntry { keys: Vec<Reg> },
    /// One aggregation step on slot `slot` of the current group entry.
    Agg {
        op: AggOp,
        slot: u16,
        arg: Option<Reg>,
        /// Skip the null sentinel instead of aggregating it.
        skip_null: bool,
        /// The sentinel for the argument's type (bits, for double ops).
        null_val: i64,
        /// Target index, for count-distinct descriptor lookup.
        target: u16,
    },
    /// Write a projected value to output slot `slot`.
    Project { slot: u16, src: Reg },
}

/// Internal kernel error codes; surfaced to callers only as error kinds.
pub const ERR_DIV_BY_ZERO: i32 = 1;
pub const ERR_OUT_OF_SLOTS: i32 = 2;

#[derive(Debug, Clone, PartialEq)]
pub enum Terminator {
    Jump(BlockId),
    Branch {
        cond: Reg,
        then_block: BlockId,
        else_block: BlockId,
    },
    /// Row processed without error.
    Ret,
    /// Abort the whole kernel with an error code.
    RetError(i32),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub insts: Vec<Inst>,
    pub term: Terminator,
}

/// One function: block 0 is the per-fragment preamble (runs once per
/// launch), execution per row starts at block 1.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub blocks: Vec<Block>,
    pub num_regs: u32,
}

impl Function {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            blocks: Vec::new(),
            num_regs: 0,
        }
    }

    pub fn alloc_reg(&mut self) -> Reg {
        let r = self.num_regs;
        self.num_regs += 1;
        r
    }

    pub fn add_block(&mut self) -> BlockId {
        self.blocks.push(Block {
            insts: Vec::new(),
            term: Terminator::Ret,
        });
        self.blocks.len() - 1
    }

    /// The printed IR; the stable fingerprint for the code cache.
    pub fn fingerprint(&self) -> String {
        self.to_string()
    }
}

/// A compiled module: the query template plus the row function it inlines.
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub query_func: Function,
    pub row_func: Function,
}

impl Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "define {}({} regs) {{", self.name, self.num_regs)?;
        for (i, block) in self.blocks.iter().enumerate() {
            writeln!(f, "bb{i}:")?;
            for inst in &block.insts {
                writeln!(f, "  {inst:?}")?;
            }
            writeln!(f, "  {:?}", block.term)?;
        }
        writeln!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic() {
        let mut func = Function::new("row_func");
        let entry = func.add_block();
        let body = func.add_block();
        let r = func.alloc_reg();
        func.blocks[entry].term = Terminator::Jump(body);
        func.blocks[body].insts.push(Inst::Const { dst: r, value: 7 });
        func.blocks[body].term = Terminator::Ret;

        assert_eq!(func.fingerprint(), func.clone().fingerprint());
        let mut other = func.clone();
        other.blocks[1].insts[0] = Inst::Const { dst: r, value: 8 };
        assert_ne!(func.fingerprint(), other.fingerprint());
    }
}
