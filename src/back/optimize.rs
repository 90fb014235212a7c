//! The peephole optimizer (`spec.md` §4.6): three ordered passes over the
//! fully-resolved instruction stream.

use crate::middle::ir::{Insn, Mnemonic, Op, Operand};

/// Run all three passes, in order. The order matters: PUSH/POP fusion runs
/// before self-MOV elimination so that `PUSH A; POP A` collapses to
/// `MOV A A` and then disappears; self-MOV elimination runs before
/// mirror-MOV elimination so that mirrors which reduce to a pair of
/// self-MOVs are already gone.
pub fn optimize(insns: Vec<Insn>) -> Vec<Insn> {
    let insns = fuse_push_pop(insns);
    let insns = drop_self_mov(insns);
    drop_mirror_mov(insns)
}

fn is_mov(insn: &Insn, a: &str, b: &str) -> bool {
    matches!(&insn.op, Op::Real(Mnemonic::MOV))
        && insn.operands.len() == 2
        && insn.operands[0] == Operand::raw(a)
        && insn.operands[1] == Operand::raw(b)
}

/// `PUSH X; POP Y` => `MOV X Y`.
fn fuse_push_pop(insns: Vec<Insn>) -> Vec<Insn> {
    let mut out: Vec<Insn> = Vec::with_capacity(insns.len());
    let mut iter = insns.into_iter().peekable();

    while let Some(insn) = iter.next() {
        if matches!(&insn.op, Op::Real(Mnemonic::PUSH)) && insn.operands.len() == 1 {
            if let Some(next) = iter.peek() {
                if matches!(&next.op, Op::Real(Mnemonic::POP)) && next.operands.len() == 1 {
                    let push_operand = insn.operands[0].clone();
                    let next = iter.next().unwrap();
                    let pop_operand = next.operands[0].clone();
                    out.push(
                        Insn::real(Mnemonic::MOV, vec![push_operand, pop_operand])
                            .with_scope(insn.scope)
                            .with_comment(insn.comment),
                    );
                    continue;
                }
            }
        }
        out.push(insn);
    }

    out
}

/// Drop `MOV X X`.
fn drop_self_mov(insns: Vec<Insn>) -> Vec<Insn> {
    insns
        .into_iter()
        .filter(|insn| {
            !(matches!(&insn.op, Op::Real(Mnemonic::MOV))
                && insn.operands.len() == 2
                && insn.operands[0] == insn.operands[1])
        })
        .collect()
}

/// Drop the second of `MOV A B; MOV B A`.
fn drop_mirror_mov(insns: Vec<Insn>) -> Vec<Insn> {
    let mut out: Vec<Insn> = Vec::with_capacity(insns.len());

    for insn in insns {
        if matches!(&insn.op, Op::Real(Mnemonic::MOV)) && insn.operands.len() == 2 {
            if let Some(prev) = out.last() {
                let a = insn.operands[0].raw_text();
                let b = insn.operands[1].raw_text();
                if is_mov(prev, b, a) {
                    continue;
                }
            }
        }
        out.push(insn);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::id;

    fn mov(a: &str, b: &str) -> Insn {
        Insn::real(Mnemonic::MOV, vec![Operand::raw(a), Operand::raw(b)]).with_scope(id(""))
    }

    #[test]
    fn fuses_push_pop_into_mov() {
        let insns = vec![
            Insn::real(Mnemonic::PUSH, vec![Operand::raw("A")]),
            Insn::real(Mnemonic::POP, vec![Operand::raw("B")]),
        ];
        let out = optimize(insns);
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0].op, Op::Real(Mnemonic::MOV)));
    }

    #[test]
    fn push_a_pop_a_vanishes_entirely() {
        let insns = vec![
            Insn::real(Mnemonic::PUSH, vec![Operand::raw("A")]),
            Insn::real(Mnemonic::POP, vec![Operand::raw("A")]),
        ];
        assert!(optimize(insns).is_empty());
    }

    #[test]
    fn drops_self_mov() {
        let insns = vec![mov("A", "A"), mov("A", "B")];
        let out = optimize(insns);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].operands[1], Operand::raw("B"));
    }

    #[test]
    fn drops_mirror_mov() {
        let insns = vec![mov("A", "B"), mov("B", "A")];
        let out = optimize(insns);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].operands, vec![Operand::raw("A"), Operand::raw("B")]);
    }

    #[test]
    fn optimizer_is_idempotent() {
        let insns = vec![
            Insn::real(Mnemonic::PUSH, vec![Operand::raw("A")]),
            Insn::real(Mnemonic::POP, vec![Operand::raw("B")]),
            mov("C", "C"),
            mov("D", "E"),
            mov("E", "D"),
        ];
        let once = optimize(insns);
        let twice = optimize(once.clone());
        assert_eq!(
            once.iter().map(|i| (&i.op, &i.operands)).collect::<Vec<_>>(),
            twice.iter().map(|i| (&i.op, &i.operands)).collect::<Vec<_>>()
        );
    }
}
