//! The optimization pipeline run over a compiled module before it is
//! finalized into an execution engine.
//!
//! Order follows the query compiler's fixed pipeline: always-inline the row
//! function into the query template, promote values to registers, simplify,
//! combine; loop-invariant code motion only applies when literals are
//! hoisted, and loop-strength reduction is opt-in via the optimization
//! level.
use observability_deps::tracing::debug;

use crate::engine::ExecutionEngine;
use crate::ir::{BinOp, Function, Inst, Module, OpTy, Terminator};

/// Optimization levels exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptLevel {
    #[default]
    Default,
    LoopStrengthReduction,
}

/// Run the pipeline and materialise the executable code object.
pub fn optimize_and_finalize(
    module: &Module,
    hoist_literals: bool,
    opt_level: OptLevel,
) -> ExecutionEngine {
    let mut func = always_inline(module);
    promote_mem_to_reg(&mut func);
    instruction_simplify(&mut func);
    instruction_combine(&mut func);
    if hoist_literals {
        licm(&mut func);
    }
    if opt_level == OptLevel::LoopStrengthReduction {
        loop_strength_reduce(&mut func);
    }
    debug!(name = %func.name, blocks = func.blocks.len(), "finalized kernel");
    ExecutionEngine::new(func)
}

/// Splice the row function into the query template. The template's preamble
/// prefixes the row function's; per-row blocks keep their positions.
pub fn always_inline(module: &Module) -> Function {
    let mut out = module.row_func.clone();
    out.name = format!("{}_inlined", module.query_func.name);
    let mut preamble = module.query_func.blocks.first().map_or_else(Vec::new, |b| b.insts.clone());
    preamble.extend(out.blocks[0].insts.drain(..));
    out.blocks[0].insts = preamble;
    out.num_regs = out.num_regs.max(module.query_func.num_regs);
    out
}

fn def_reg(inst: &Inst) -> Option<u32> {
    match inst {
        Inst::LoadCol { dst, .. }
        | Inst::LoadLit { dst, .. }
        | Inst::Const { dst, .. }
        | Inst::Copy { dst, .. }
        | Inst::BinOp { dst, .. }
        | Inst::Neg { dst, .. }
        | Inst::Not { dst, .. }
        | Inst::IntToDouble { dst, .. }
        | Inst::DoubleToInt { dst, .. }
        | Inst::IsNull { dst, .. }
        | Inst::CallUnary { dst, .. }
        | Inst::CallBinary { dst, .. }
        | Inst::CallString { dst, .. }
        | Inst::InValues { dst, .. } => Some(*dst),
        Inst::GroupEntry { .. } | Inst::Agg { .. } | Inst::Project { .. } => None,
    }
}

fn for_each_use(inst: &mut Inst, mut f: impl FnMut(&mut u32)) {
    match inst {
        Inst::LoadCol { .. } | Inst::LoadLit { .. } | Inst::Const { .. } => {}
        Inst::Copy { src, .. }
        | Inst::Neg { src, .. }
        | Inst::Not { src, .. }
        | Inst::IntToDouble { src, .. }
        | Inst::DoubleToInt { src, .. }
        | Inst::IsNull { src, .. } => f(src),
        Inst::BinOp { lhs, rhs, .. } => {
            f(lhs);
            f(rhs);
        }
        Inst::CallUnary { arg, .. } => f(arg),
        Inst::CallBinary { lhs, rhs, .. } => {
            f(lhs);
            f(rhs);
        }
        Inst::CallString { arg, pattern, .. } => {
            f(arg);
            f(pattern);
        }
        Inst::InValues { arg, .. } => f(arg),
        Inst::GroupEntry { keys } => {
            for k in keys {
                f(k);
            }
        }
        Inst::Agg { arg, .. } => {
            if let Some(a) = arg {
                f(a);
            }
        }
        Inst::Project { src, .. } => f(src),
    }
}

fn assignment_counts(func: &Function) -> Vec<u32> {
    let mut counts = vec![0u32; func.num_regs as usize];
    for block in &func.blocks {
        for inst in &block.insts {
            if let Some(dst) = def_reg(inst) {
                counts[dst as usize] += 1;
            }
        }
    }
    counts
}

fn rewrite_uses(func: &mut Function, map: &[Option<u32>]) {
    for block in &mut func.blocks {
        for inst in &mut block.insts {
            for_each_use(inst, |r| {
                if let Some(new) = map[*r as usize] {
                    *r = new;
                }
            });
        }
        if let Terminator::Branch { cond, .. } = &mut block.term {
            if let Some(new) = map[*cond as usize] {
                *cond = new;
            }
        }
    }
}

/// Copy propagation: a single-assignment copy of a single-assignment source
/// forwards the source register to every use.
pub fn promote_mem_to_reg(func: &mut Function) {
    let counts = assignment_counts(func);
    let mut forward: Vec<Option<u32>> = vec![None; func.num_regs as usize];
    for block in &func.blocks {
        for inst in &block.insts {
            if let Inst::Copy { dst, src } = inst {
                if counts[*dst as usize] == 1 && counts[*src as usize] == 1 {
                    forward[*dst as usize] = Some(*src);
                }
            }
        }
    }
    // chase chains a -> b -> c
    for i in 0..forward.len() {
        let mut target = forward[i];
        while let Some(t) = target {
            match forward[t as usize] {
                Some(next) => target = Some(next),
                None => break,
            }
        }
        forward[i] = target;
    }
    rewrite_uses(func, &forward);
    for block in &mut func.blocks {
        block.insts.retain(|inst| match inst {
            Inst::Copy { dst, .. } => forward[*dst as usize].is_none(),
            _ => true,
        });
    }
}

fn known_consts(func: &Function) -> Vec<Option<i64>> {
    let counts = assignment_counts(func);
    let mut consts = vec![None; func.num_regs as usize];
    for block in &func.blocks {
        for inst in &block.insts {
            if let Inst::Const { dst, value } = inst {
                if counts[*dst as usize] == 1 {
                    consts[*dst as usize] = Some(*value);
                }
            }
        }
    }
    consts
}

/// Algebraic identities: `x + 0`, `x - 0`, `x * 1` forward the operand,
/// `x * 0` becomes the constant zero.
pub fn instruction_simplify(func: &mut Function) {
    let consts = known_consts(func);
    for block in &mut func.blocks {
        for inst in &mut block.insts {
            let Inst::BinOp { dst, op, ty: OpTy::I64, lhs, rhs } = inst else {
                continue;
            };
            let (dst, op, lhs, rhs) = (*dst, *op, *lhs, *rhs);
            let lc = consts[lhs as usize];
            let rc = consts[rhs as usize];
            let replacement = match op {
                BinOp::Add if rc == Some(0) => Some(Inst::Copy { dst, src: lhs }),
                BinOp::Add if lc == Some(0) => Some(Inst::Copy { dst, src: rhs }),
                BinOp::Sub if rc == Some(0) => Some(Inst::Copy { dst, src: lhs }),
                BinOp::Mul if rc == Some(1) => Some(Inst::Copy { dst, src: lhs }),
                BinOp::Mul if lc == Some(1) => Some(Inst::Copy { dst, src: rhs }),
                BinOp::Mul if rc == Some(0) || lc == Some(0) => {
                    Some(Inst::Const { dst, value: 0 })
                }
                _ => None,
            };
            if let Some(new_inst) = replacement {
                *inst = new_inst;
            }
        }
    }
    // the rewrites may have exposed fresh copies
    promote_mem_to_reg(func);
}

/// Constant folding over direct (non-null-aware) operations.
pub fn instruction_combine(func: &mut Function) {
    let consts = known_consts(func);
    for block in &mut func.blocks {
        for inst in &mut block.insts {
            let Inst::BinOp { dst, op, ty, lhs, rhs } = inst else {
                continue;
            };
            let (dst, op, ty, lhs, rhs) = (*dst, *op, *ty, *lhs, *rhs);
            let (Some(a), Some(b)) = (consts[lhs as usize], consts[rhs as usize]) else {
                continue;
            };
            // a zero divisor must keep its runtime check
            if let Ok(value) = crate::engine::fold_binop(op, ty, a, b) {
                *inst = Inst::Const { dst, value };
            }
        }
    }
}

/// Loop-invariant code motion: literal and constant loads have no operands,
/// so they move to the preamble, leaving only per-row work in the loop body.
pub fn licm(func: &mut Function) {
    let mut hoisted = Vec::new();
    for block in func.blocks.iter_mut().skip(1) {
        let mut kept = Vec::with_capacity(block.insts.len());
        for inst in block.insts.drain(..) {
            match inst {
                Inst::LoadLit { .. } | Inst::Const { .. } => hoisted.push(inst),
                other => kept.push(other),
            }
        }
        block.insts = kept;
    }
    func.blocks[0].insts.extend(hoisted);
}

/// Reduce per-row strength by hoisting operations whose operands are all
/// defined in the preamble.
pub fn loop_strength_reduce(func: &mut Function) {
    loop {
        let mut preamble_regs = vec![false; func.num_regs as usize];
        for inst in &func.blocks[0].insts {
            if let Some(dst) = def_reg(inst) {
                preamble_regs[dst as usize] = true;
            }
        }
        let counts = assignment_counts(func);

        let mut moved = false;
        let mut hoisted = Vec::new();
        for block in func.blocks.iter_mut().skip(1) {
            let mut kept = Vec::with_capacity(block.insts.len());
            for mut inst in block.insts.drain(..) {
                let invariant = matches!(inst, Inst::BinOp { .. } | Inst::Neg { .. }) && {
                    let mut all_preamble = true;
                    for_each_use(&mut inst, |r| {
                        all_preamble &= preamble_regs[*r as usize];
                    });
                    all_preamble && def_reg(&inst).is_some_and(|d| counts[d as usize] == 1)
                };
                if invariant {
                    hoisted.push(inst);
                    moved = true;
                } else {
                    kept.push(inst);
                }
            }
            block.insts = kept;
        }
        func.blocks[0].insts.extend(hoisted);
        if !moved {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Block;

    fn func_with_body(insts: Vec<Inst>, num_regs: u32) -> Function {
        Function {
            name: "row_func".into(),
            blocks: vec![
                Block {
                    insts: Vec::new(),
                    term: Terminator::Jump(1),
                },
                Block {
                    insts,
                    term: Terminator::Ret,
                },
            ],
            num_regs,
        }
    }

    #[test]
    fn copy_propagation_removes_chains() {
        let mut func = func_with_body(
            vec![
                Inst::Const { dst: 0, value: 7 },
                Inst::Copy { dst: 1, src: 0 },
                Inst::Copy { dst: 2, src: 1 },
                Inst::Project { slot: 0, src: 2 },
            ],
            3,
        );
        promote_mem_to_reg(&mut func);
        assert_eq!(
            func.blocks[1].insts,
            vec![
                Inst::Const { dst: 0, value: 7 },
                Inst::Project { slot: 0, src: 0 },
            ]
        );
    }

    #[test]
    fn simplify_multiply_by_one() {
        let mut func = func_with_body(
            vec![
                Inst::LoadCol {
                    dst: 0,
                    col: 0,
                    decoder: crate::ir::ColDecoder::RawInt { width: 4 },
                    ty: data_types::SqlType::Int,
                    null_sentinel: None,
                },
                Inst::Const { dst: 1, value: 1 },
                Inst::BinOp {
                    dst: 2,
                    op: BinOp::Mul,
                    ty: OpTy::I64,
                    lhs: 0,
                    rhs: 1,
                },
                Inst::Project { slot: 0, src: 2 },
            ],
            3,
        );
        instruction_simplify(&mut func);
        assert!(func.blocks[1]
            .insts
            .iter()
            .all(|i| !matches!(i, Inst::BinOp { .. })));
        assert!(func.blocks[1]
            .insts
            .contains(&Inst::Project { slot: 0, src: 0 }));
    }

    #[test]
    fn combine_folds_constants() {
        let mut func = func_with_body(
            vec![
                Inst::Const { dst: 0, value: 6 },
                Inst::Const { dst: 1, value: 7 },
                Inst::BinOp {
                    dst: 2,
                    op: BinOp::Mul,
                    ty: OpTy::I64,
                    lhs: 0,
                    rhs: 1,
                },
                Inst::Project { slot: 0, src: 2 },
            ],
            3,
        );
        instruction_combine(&mut func);
        assert!(func.blocks[1]
            .insts
            .contains(&Inst::Const { dst: 2, value: 42 }));
    }

    #[test]
    fn licm_hoists_literal_loads() {
        let mut func = func_with_body(
            vec![
                Inst::LoadLit {
                    dst: 0,
                    offset: 0,
                    width: 8,
                    ty: OpTy::I64,
                },
                Inst::Project { slot: 0, src: 0 },
            ],
            1,
        );
        licm(&mut func);
        assert_eq!(func.blocks[0].insts.len(), 1);
        assert_eq!(func.blocks[1].insts.len(), 1);
    }
}
