//! The fixpoint resolver (`spec.md` §4.5): consumes meta-IR, enforces scope
//! invariants, allocates registers, inserts spills/reloads, and expands
//! symbolic operand kinds into raw register/literal operands.
//!
//! Unlike the original's pointer-identity progress check, the guard here
//! keys off each [`Insn`]'s stable `id` (REDESIGN FLAGS,
//! "fixpoint-by-pointer-identity").

use std::collections::{BTreeSet, VecDeque};

use crate::common::{Id, Map, Register, ASSIGNABLE_REGISTERS};
use crate::error::{CompileError, Result};
use crate::middle::generators::{evict_register, var_from_heap, var_to_heap};
use crate::middle::ir::{Insn, Mnemonic, MetaOp, Op, Operand};
use crate::middle::state::CompileState;
use crate::middle::types::{type_is_word, Variable};

/// Number of unprogressed re-visits of the same instruction id before the
/// fixpoint loop gives up (`spec.md` §5).
const DIVERGENCE_LIMIT: u32 = 100;

/// Drive the meta-IR to a fixpoint: every operand of every returned
/// instruction is [`Operand::Raw`].
pub fn resolve(insns: Vec<Insn>, state: &mut CompileState) -> Result<Vec<Insn>> {
    let mut out = Vec::new();
    let mut queue: VecDeque<Insn> = insns.into();
    let mut progress: Map<u64, u32> = Map::new();

    while let Some(insn) = queue.pop_front() {
        if insn.is_meta() {
            let pre = apply_meta(&insn, state)?;
            out.extend(pre);
            out.push(insn);
            continue;
        }

        if let Some(idx) = find_calc_index(&insn)? {
            bump_progress(&mut progress, &insn)?;

            let calc_text = match &insn.operands[idx] {
                Operand::Calc(t) => t.clone(),
                _ => unreachable!(),
            };
            let mut expanded = crate::middle::calc::resolve_calc(&calc_text, insn.scope, state);

            let is_setreg_immediate = matches!(insn.op, Op::Real(Mnemonic::SETREG))
                && idx == 1
                && insn.operands[0].is_raw();

            let host = if is_setreg_immediate {
                Insn::real(Mnemonic::MOV, vec![Operand::raw("F"), insn.operands[0].clone()])
                    .with_scope(insn.scope)
                    .with_comment(insn.comment.clone())
            } else {
                let mut host = insn;
                host.operands[idx] = Operand::raw("F");
                host
            };

            expanded.push(host);
            for item in expanded.into_iter().rev() {
                queue.push_front(item);
            }
            continue;
        }

        match translate_operands(insn, state)? {
            TranslateOutcome::Requeue(insn) => {
                bump_progress(&mut progress, &insn)?;
                queue.push_front(insn);
            }
            TranslateOutcome::Resolved { pre, host, post } => {
                out.extend(pre);
                out.push(host);
                out.extend(post);
            }
        }
    }

    Ok(out)
}

fn bump_progress(progress: &mut Map<u64, u32>, insn: &Insn) -> Result<()> {
    let count = progress.entry(insn.id).or_insert(0);
    *count += 1;
    if *count > DIVERGENCE_LIMIT {
        return Err(CompileError::FixpointDivergence {
            limit: DIVERGENCE_LIMIT,
            instruction: format!("{:?} {:?}", insn.op, insn.operands),
        });
    }
    Ok(())
}

fn find_calc_index(insn: &Insn) -> Result<Option<usize>> {
    let calc_positions: Vec<usize> = insn
        .operands
        .iter()
        .enumerate()
        .filter(|(_, op)| matches!(op, Operand::Calc(_)))
        .map(|(i, _)| i)
        .collect();

    match calc_positions.len() {
        0 => Ok(None),
        1 => Ok(Some(calc_positions[0])),
        _ => Err(CompileError::AllocatorInvariant(format!(
            "two Calc operands in a single instruction: {:?} {:?}",
            insn.op, insn.operands
        ))),
    }
}

// ---- Meta-op dispatch ----

fn apply_meta(insn: &Insn, state: &mut CompileState) -> Result<Vec<Insn>> {
    let scope = insn.scope;
    match insn.op {
        Op::Meta(MetaOp::ClearScope) => {
            state.clear_scope();
            Ok(Vec::new())
        }
        Op::Meta(MetaOp::FlushScope) => Ok(flush_scope(scope, state)),
        Op::Meta(MetaOp::FlushGlobals) => Ok(flush_globals(scope, state)),
        Op::Meta(MetaOp::AssumeScope) => {
            let ann = insn.meta.as_ref().expect("__ASSUMESCOPE must carry an annotation");
            state.scope_register_assignment.insert(ann.name, ann.register);
            state.scope_register_dirty.insert(ann.register, true);
            Ok(Vec::new())
        }
        Op::Meta(MetaOp::ForceScope) => {
            let ann = insn.meta.as_ref().expect("__FORCESCOPE must carry an annotation");
            check_force_scope_target(ann.name.as_str(), scope.as_str(), state)?;
            Ok(force_scope(ann.name, ann.register, scope, state))
        }
        Op::Meta(MetaOp::SetDirect) => {
            let ann = insn.meta.as_ref().expect("__SET_DIRECT must carry an annotation");
            Ok(set_direct(ann.name, scope, state))
        }
        Op::Real(_) | Op::Label(_) => unreachable!("apply_meta called on a non-meta instruction"),
    }
}

fn flush_scope(scope: Id, state: &mut CompileState) -> Vec<Insn> {
    let dirty: Vec<usize> = state
        .scope_register_dirty
        .iter()
        .filter(|(_, &d)| d)
        .map(|(&r, _)| r)
        .collect();

    let mut out = Vec::new();
    for reg in dirty {
        out.extend(evict_register(reg, scope, state));
    }
    state.scope_register_dirty.clear();
    out
}

fn flush_globals(scope: Id, state: &mut CompileState) -> Vec<Insn> {
    let dirty_globals: Vec<usize> = state
        .scope_register_dirty
        .iter()
        .filter(|(_, &d)| d)
        .filter_map(|(&r, _)| state.name_for_register(r).map(|n| (r, n)))
        .filter(|(_, name)| state.global_memory_map.contains_key(&CompileState::global_key(name.as_str())))
        .map(|(r, _)| r)
        .collect();

    let mut out = Vec::new();
    for reg in dirty_globals {
        out.extend(evict_register(reg, scope, state));
        state.scope_register_dirty.insert(reg, false);
    }
    out
}

fn set_direct(var: Id, scope: Id, state: &mut CompileState) -> Vec<Insn> {
    if state.global_memory_map.contains_key(&CompileState::global_key(var.as_str())) {
        return Vec::new();
    }

    state.scope_variable_direct_marks.insert(var, true);

    if let Some(&reg) = state.scope_register_assignment.get(&var) {
        if state.scope_register_dirty.get(&reg).copied().unwrap_or(false) {
            let out = evict_register(reg, scope, state);
            state.scope_register_dirty.insert(reg, false);
            return out;
        }
    }
    Vec::new()
}

fn force_scope(var: Id, target_reg: usize, scope: Id, state: &mut CompileState) -> Vec<Insn> {
    if state.scope_register_assignment.get(&var) == Some(&target_reg) {
        state.scope_register_dirty.insert(target_reg, true);
        return Vec::new();
    }

    let target_name = Register::from_index(target_reg).to_string();
    let mut out = Vec::new();

    if let Some(&src_reg) = state.scope_register_assignment.get(&var) {
        let target_occupant = state.name_for_register(target_reg);
        match target_occupant {
            None => {
                let src_name = Register::from_index(src_reg).to_string();
                out.push(Insn::real(Mnemonic::MOV, vec![Operand::raw(src_name), Operand::raw(&target_name)]).with_scope(scope));
                state.scope_register_dirty.insert(src_reg, false);
                state.scope_register_assignment.remove(&var);
                state.scope_register_assignment.insert(var, target_reg);
            }
            Some(other) => {
                let src_name = Register::from_index(src_reg).to_string();
                out.push(Insn::real(Mnemonic::XOR, vec![Operand::raw(&target_name), Operand::raw(&src_name), Operand::raw(&target_name)]).with_scope(scope));
                out.push(Insn::real(Mnemonic::XOR, vec![Operand::raw(&src_name), Operand::raw(&target_name), Operand::raw(&src_name)]).with_scope(scope));
                out.push(Insn::real(Mnemonic::XOR, vec![Operand::raw(&target_name), Operand::raw(&src_name), Operand::raw(&target_name)]).with_scope(scope));
                state.scope_register_assignment.insert(var, target_reg);
                state.scope_register_assignment.insert(other, src_reg);
            }
        }
    } else {
        if let Some(other) = state.name_for_register(target_reg) {
            out.extend(evict_register(target_reg, scope, state));
            state.scope_register_assignment.remove(&other);
        }
        let (v, offset) = state.get_var(var.as_str(), scope.as_str());
        out.extend(var_from_heap(&v, offset, &target_name, scope));
        state.scope_register_assignment.insert(var, target_reg);
    }

    state.scope_register_dirty.insert(target_reg, true);
    out
}

// ---- Operand translation ----

enum TranslateOutcome {
    /// One new symbolic operand (a `Calc`) was introduced; put the whole
    /// instruction back on the queue to expand it next.
    Requeue(Insn),
    Resolved { pre: Vec<Insn>, host: Insn, post: Vec<Insn> },
}

fn assert_word_sized(accessor: &str, v: Variable, offset: usize, state: &CompileState) -> Result<(Variable, usize)> {
    let base_ty = state
        .type_map
        .get(&v.ty)
        .unwrap_or_else(|| panic!("ERROR: type '{}' of variable '{accessor}' is not registered", v.ty));
    if !type_is_word(base_ty, accessor, &state.type_map) {
        return Err(CompileError::Type(format!(
            "variable '{accessor}' does not resolve to a single word (struct values may only be touched via pointers)"
        )));
    }
    Ok((v, offset))
}

fn check_word_sized(accessor: &str, scope: &str, state: &CompileState) -> Result<(Variable, usize)> {
    let (v, offset) = state.get_var(accessor, scope);
    assert_word_sized(accessor, v, offset, state)
}

/// `_reg_assign`/`__FORCESCOPE` only works on function-local variables
/// (`spec.md` §6; `examples/original_source/mscr/compiler/asm_resolver.go:101-122`
/// searches only the scope's local variable table and panics rather than
/// falling back to a global).
fn check_force_scope_target(accessor: &str, scope: &str, state: &CompileState) -> Result<(Variable, usize)> {
    let (v, offset) = state.local_var(accessor, scope).ok_or_else(|| {
        CompileError::SpecialFunctionMisuse(format!(
            "tried to force unknown variable '{accessor}' into a register: _reg_assign only works with function local variables, not globals"
        ))
    })?;
    assert_word_sized(accessor, v, offset, state)
}

fn translate_operands(mut insn: Insn, state: &mut CompileState) -> Result<TranslateOutcome> {
    let scope = insn.scope;
    let mut pre = Vec::new();
    let mut post = Vec::new();
    let mut used_by_this_instr: BTreeSet<usize> = BTreeSet::new();

    for idx in 0..insn.operands.len() {
        let op = insn.operands[idx].clone();
        match op {
            Operand::Raw(_) => {}

            Operand::ScopeVarCount(fn_scope) => {
                let size = state.scope_var_count(&fn_scope);
                let is_setreg_shortcut =
                    matches!(insn.op, Op::Real(Mnemonic::SETREG)) && idx == 1 && insn.operands[0].is_raw();
                if is_setreg_shortcut {
                    insn.operands[idx] = Operand::raw(format!("0x{size:x}"));
                } else {
                    insn.operands[idx] = Operand::Calc(size.to_string());
                    return Ok(TranslateOutcome::Requeue(insn));
                }
            }

            Operand::StringRead(name) => {
                let addr = *state
                    .string_map
                    .get(&CompileState::global_key(name.as_str()))
                    .ok_or_else(|| CompileError::Symbol(format!("unknown string '{name}'")))?;
                insn.operands[idx] = Operand::Calc(format!("0x{addr:x}"));
                return Ok(TranslateOutcome::Requeue(insn));
            }

            Operand::GlobalAddr(name) => {
                let addr = *state
                    .global_memory_map
                    .get(&CompileState::global_key(name.as_str()))
                    .ok_or_else(|| CompileError::Symbol(format!("unknown global '{name}'")))?;
                insn.operands[idx] = Operand::Calc(format!("0x{addr:x}"));
                return Ok(TranslateOutcome::Requeue(insn));
            }

            Operand::StringAddr(name) => {
                return Err(CompileError::Type(format!(
                    "cannot take the address of string '{name}' (strings are already pointers)"
                )));
            }

            Operand::VarAddr(name) => {
                let (v, offset) = state.get_var(name.as_str(), scope.as_str());
                pre.push(
                    Insn::real(
                        Mnemonic::SETREG,
                        vec![Operand::raw("F"), Operand::raw(format!("0x{:x}", v.order_number.wrapping_sub(offset)))],
                    )
                    .with_scope(scope),
                );
                pre.push(
                    Insn::real(Mnemonic::SUB, vec![Operand::raw("H"), Operand::raw("F"), Operand::raw("F")])
                        .with_scope(scope),
                );
                insn.operands[idx] = Operand::raw("F");
            }

            Operand::VarRead(name) | Operand::VarWrite(name) => {
                let is_write = matches!(op, Operand::VarWrite(_));
                let (v, offset) = check_word_sized(name.as_str(), scope.as_str(), state)?;
                let (p, po, reg) = allocate_register(name, &v, offset, is_write, scope, state, &mut used_by_this_instr)?;
                pre.extend(p);
                post.extend(po);
                insn.operands[idx] = Operand::raw(reg);
            }

            Operand::GlobalRead(name) | Operand::GlobalWrite(name) => {
                let is_write = matches!(op, Operand::GlobalWrite(_));
                let (v, offset) = check_word_sized(name.as_str(), scope.as_str(), state)?;
                let (p, po, reg) = allocate_register(name, &v, offset, is_write, scope, state, &mut used_by_this_instr)?;
                pre.extend(p);
                post.extend(po);
                insn.operands[idx] = Operand::raw(reg);
            }

            Operand::Calc(_) => unreachable!("Calc operands are handled before translate_operands runs"),
        }
    }

    Ok(TranslateOutcome::Resolved { pre, host: insn, post })
}

/// The register allocator (`spec.md` §4.5 point 3.b). `accessor` is the
/// dotted variable/global name, used as the key into the scope's
/// register-assignment cache.
fn allocate_register(
    accessor: Id,
    v: &Variable,
    offset: usize,
    is_write: bool,
    scope: Id,
    state: &mut CompileState,
    used_by_this_instr: &mut BTreeSet<usize>,
) -> Result<(Vec<Insn>, Vec<Insn>, String)> {
    let is_direct = state.scope_variable_direct_marks.get(&accessor).copied().unwrap_or(false);

    if !v.is_global && !is_direct {
        if let Some(&reg) = state.scope_register_assignment.get(&accessor) {
            used_by_this_instr.insert(reg);
            if is_write {
                state.scope_register_dirty.insert(reg, true);
            }
            return Ok((Vec::new(), Vec::new(), Register::from_index(reg).to_string()));
        }
    }

    // Prefer a register that isn't used by this instruction and isn't
    // dirty. The original keeps overwriting its candidate on every match
    // instead of stopping at the first one, so the *last* clean register
    // wins, not the first (see `spec.md` §9 Open Questions — preserved here
    // deliberately).
    let mut candidate: Option<usize> = None;
    for r in 0..ASSIGNABLE_REGISTERS {
        let dirty = state.scope_register_dirty.get(&r).copied().unwrap_or(false);
        if !used_by_this_instr.contains(&r) && !dirty {
            candidate = Some(r);
        }
    }

    let reg = match candidate {
        Some(r) => r,
        None => {
            let default = v.order_number % ASSIGNABLE_REGISTERS;
            let mut chosen = None;
            for step in 0..ASSIGNABLE_REGISTERS {
                let r = (default + step) % ASSIGNABLE_REGISTERS;
                if !used_by_this_instr.contains(&r) {
                    chosen = Some(r);
                    break;
                }
            }
            chosen.ok_or_else(|| {
                CompileError::AllocatorInvariant(format!(
                    "too many distinct variable operands in a single instruction (scope '{scope}')"
                ))
            })?
        }
    };

    let mut pre = Vec::new();
    if state.scope_register_dirty.get(&reg).copied().unwrap_or(false) {
        pre.extend(evict_register(reg, scope, state));
    }
    if let Some(prev) = state.name_for_register(reg) {
        state.scope_register_assignment.remove(&prev);
    }
    state.scope_register_dirty.insert(reg, false);
    state.scope_register_assignment.insert(accessor, reg);
    used_by_this_instr.insert(reg);

    let reg_name = Register::from_index(reg).to_string();
    let mut post = Vec::new();
    if is_write {
        if v.is_global || is_direct {
            post.extend(var_to_heap(v, offset, &reg_name, scope));
        } else {
            state.scope_register_dirty.insert(reg, true);
        }
    } else {
        pre.extend(var_from_heap(v, offset, &reg_name, scope));
    }

    Ok((pre, post, reg_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::id;
    use crate::middle::ir::is_resolved;
    use crate::middle::types::{builtin_type_map, FuncSig};

    fn state_with_main() -> CompileState {
        let mut state = CompileState::new(false);
        state.type_map = builtin_type_map();
        state.function_table.push(FuncSig {
            name: id("main"),
            label: id("mscr_function_main_params_2"),
            params: vec![(id("a"), id("word")), (id("b"), id("word"))],
            return_type: Some(id("word")),
        });
        state.current_function = id("main");
        state
    }

    #[test]
    fn resolves_a_literal_return_to_raw_operands() {
        let mut state = state_with_main();
        let insns = vec![
            Insn::meta_op(MetaOp::ClearScope).with_scope(id("main")),
            Insn::real(Mnemonic::MOV, vec![Operand::Calc("7".into()), Operand::raw("A")]).with_scope(id("main")),
        ];
        let resolved = resolve(insns, &mut state).unwrap();
        assert!(is_resolved(&resolved));
    }

    #[test]
    fn distinct_variable_operands_get_distinct_registers() {
        let mut state = state_with_main();
        state.add_variable("x", "word");
        state.add_variable("y", "word");
        state.add_variable("z", "word");

        let insns = vec![
            Insn::meta_op(MetaOp::ClearScope).with_scope(id("main")),
            Insn::real(Mnemonic::MOV, vec![Operand::VarRead(id("x")), Operand::raw("E")]).with_scope(id("main")),
            Insn::real(
                Mnemonic::ADD,
                vec![Operand::VarRead(id("x")), Operand::VarRead(id("y")), Operand::VarWrite(id("z"))],
            )
            .with_scope(id("main")),
        ];
        let resolved = resolve(insns, &mut state).unwrap();
        assert!(is_resolved(&resolved));

        let add = resolved.iter().find(|i| matches!(i.op, Op::Real(Mnemonic::ADD))).unwrap();
        let regs: BTreeSet<&str> = add.operands.iter().map(|o| o.raw_text()).collect();
        assert_eq!(regs.len(), 3, "three distinct variable operands must land in three distinct registers");
    }

    #[test]
    fn force_scope_rejects_a_global() {
        let mut state = state_with_main();
        state.global_memory_map.insert(CompileState::global_key("g"), 3);

        let insns = vec![
            Insn::meta_op(MetaOp::ClearScope).with_scope(id("main")),
            Insn::new(Op::Meta(MetaOp::ForceScope), Vec::new())
                .with_scope(id("main"))
                .annotated(id("g"), 0),
        ];
        let err = resolve(insns, &mut state).unwrap_err();
        assert_eq!(err.kind(), crate::error::CompileErrorKindHint::SpecialFunctionMisuse);
    }

    #[test]
    fn flush_scope_leaves_no_dirty_registers() {
        let mut state = state_with_main();
        state.add_variable("x", "word");

        let insns = vec![
            Insn::meta_op(MetaOp::ClearScope).with_scope(id("main")),
            Insn::real(Mnemonic::MOV, vec![Operand::raw("0x1"), Operand::VarWrite(id("x"))]).with_scope(id("main")),
            Insn::meta_op(MetaOp::FlushScope).with_scope(id("main")),
        ];
        resolve(insns, &mut state).unwrap();
        assert!(state.scope_register_dirty.values().all(|&d| !d));
    }

    #[test]
    fn two_calc_operands_is_an_allocator_invariant_error() {
        let mut state = state_with_main();
        let insns = vec![Insn::real(
            Mnemonic::ADD,
            vec![Operand::Calc("1".into()), Operand::Calc("2".into()), Operand::raw("A")],
        )
        .with_scope(id("main"))];
        let err = resolve(insns, &mut state).unwrap_err();
        assert_eq!(err.kind(), crate::error::CompileErrorKindHint::AllocatorInvariant);
    }
}
