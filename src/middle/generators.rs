//! Side-effect-free builders emitting fixed meta-IR templates (`spec.md`
//! §4.2).

use crate::common::{id, Id};
use crate::middle::ir::{Insn, Mnemonic, MetaOp, Operand};
use crate::middle::state::CompileState;
use crate::middle::types::Variable;

/// `varToHeap(var, fieldOffset, reg, scope)`.
///
/// For globals: `SETREG G <addr>; STOR <reg> G`.
/// For locals: `SETREG G <orderNumber - fieldOffset>; SUB H G G; STOR <reg> G`
/// — the local's absolute address is `H - orderNumber + fieldOffset`, since
/// the VarHeap grows upward from `H`.
pub fn var_to_heap(v: &Variable, field_offset: usize, register: &str, scope: Id) -> Vec<Insn> {
    if v.is_global {
        return vec![
            Insn::real(
                Mnemonic::SETREG,
                vec![Operand::raw("G"), Operand::raw(format!("0x{:x}", v.order_number))],
            )
            .with_scope(scope),
            Insn::real(Mnemonic::STOR, vec![Operand::raw(register), Operand::raw("G")])
                .with_scope(scope),
        ];
    }

    vec![
        Insn::real(
            Mnemonic::SETREG,
            vec![
                Operand::raw("G"),
                Operand::raw(format!("0x{:x}", v.order_number.wrapping_sub(field_offset))),
            ],
        )
        .with_scope(scope),
        Insn::real(Mnemonic::SUB, vec![Operand::raw("H"), Operand::raw("G"), Operand::raw("G")])
            .with_scope(scope),
        Insn::real(Mnemonic::STOR, vec![Operand::raw(register), Operand::raw("G")])
            .with_scope(scope),
    ]
}

/// Mirror of [`var_to_heap`] using `LOAD`.
pub fn var_from_heap(v: &Variable, field_offset: usize, register: &str, scope: Id) -> Vec<Insn> {
    if v.is_global {
        return vec![
            Insn::real(
                Mnemonic::SETREG,
                vec![Operand::raw("G"), Operand::raw(format!("0x{:x}", v.order_number))],
            )
            .with_scope(scope),
            Insn::real(Mnemonic::LOAD, vec![Operand::raw(register), Operand::raw("G")])
                .with_scope(scope),
        ];
    }

    vec![
        Insn::real(
            Mnemonic::SETREG,
            vec![
                Operand::raw("G"),
                Operand::raw(format!("0x{:x}", v.order_number.wrapping_sub(field_offset))),
            ],
        )
        .with_scope(scope),
        Insn::real(Mnemonic::SUB, vec![Operand::raw("H"), Operand::raw("G"), Operand::raw("G")])
            .with_scope(scope),
        Insn::real(Mnemonic::LOAD, vec![Operand::raw(register), Operand::raw("G")])
            .with_scope(scope),
    ]
}

/// Look up the variable currently assigned to `reg` and emit its
/// `var_to_heap` eviction sequence.
pub fn evict_register(reg: usize, scope: Id, state: &CompileState) -> Vec<Insn> {
    let name = state
        .name_for_register(reg)
        .unwrap_or_else(|| panic!("ERROR: Variable<>Register assignment failure; Internal error, scopeRegisterAssignment map inconsistent with register dirty state. (Tried to evict register with no variable assigned)"));

    let (var, offset) = state.get_var(&name, &scope);
    var_to_heap(&var, offset, &crate::common::Register::from_index(reg).to_string(), scope)
}

/// Reserves a function's VarHeap region: `SETREG G [ScopeVarCount(fn)]; ADD G H H`.
pub fn func_push_state(current_function: Id) -> Vec<Insn> {
    vec![
        Insn::real(
            Mnemonic::SETREG,
            vec![Operand::raw("G"), Operand::ScopeVarCount(current_function)],
        ),
        Insn::real(Mnemonic::ADD, vec![Operand::raw("G"), Operand::raw("H"), Operand::raw("H")]),
    ]
}

/// Releases a function's VarHeap region: `SETREG G [ScopeVarCount(fn)]; SUB H H G`.
pub fn func_pop_state(current_function: Id) -> Vec<Insn> {
    vec![
        Insn::real(
            Mnemonic::SETREG,
            vec![Operand::raw("G"), Operand::ScopeVarCount(current_function)],
        ),
        Insn::real(Mnemonic::SUB, vec![Operand::raw("H"), Operand::raw("H"), Operand::raw("G")]),
    ]
}

/// `PUSH VarRead(name)`.
pub fn var_to_stack(var_name: &str) -> Vec<Insn> {
    vec![Insn::real(Mnemonic::PUSH, vec![Operand::VarRead(id(var_name))])]
}

/// `POP VarWrite(name)`.
pub fn var_from_stack(var_name: &str) -> Vec<Insn> {
    vec![Insn::real(Mnemonic::POP, vec![Operand::VarWrite(id(var_name))])]
}

/// Emit a call to `name` with `args` already lowered to operands: push each
/// argument, flush the scope, clear it across the call boundary, `CALL
/// .<label>`, and clear again (the callee starts with a fresh register
/// allocator state).
pub fn call_func(name: &str, args: Vec<Operand>, state: &CompileState) -> Vec<Insn> {
    let arity = args.len();
    let mut out = Vec::new();

    for a in args {
        out.push(Insn::real(Mnemonic::PUSH, vec![a]));
    }

    out.push(Insn::meta_op(MetaOp::FlushScope));
    out.push(Insn::meta_op(MetaOp::ClearScope));

    let label = crate::middle::types::func_label(name, arity);
    let known = state.function_table.iter().any(|f| f.label == label);
    if !known {
        log::warn!("Cannot find function to call: Function '{name}' (Assuming extern function)");
    }

    out.push(Insn::real(Mnemonic::CALL, vec![Operand::raw(format!(".{label}"))]));
    out.push(Insn::meta_op(MetaOp::ClearScope));

    out
}

/// Build a `Raw`-only instruction sequence from a `_asm { ... }` block's
/// contents: split on newlines, then whitespace per line.
pub fn to_raw_asm(text: &str) -> Vec<Insn> {
    let mut out = Vec::new();
    for line in text.lines() {
        let mut words = line.split_whitespace();
        let Some(mnemonic) = words.next() else { continue };
        let mnemonic = mnemonic.to_string();
        let operands: Vec<Operand> = words.map(Operand::raw).collect();
        out.push(Insn::new(
            crate::middle::ir::Op::Real(parse_mnemonic_lenient(&mnemonic)),
            operands,
        ));
    }
    out
}

/// `_asm` blocks written by users may reference meta-ops like
/// `__CLEARSCOPE` directly (see `spec.md`'s conditional-lowering use of a
/// synthesized `_asm { __CLEARSCOPE }`), so raw-asm parsing accepts both
/// real mnemonics and meta-op names.
fn parse_mnemonic_lenient(s: &str) -> Mnemonic {
    use Mnemonic::*;
    match s {
        "SETREG" => SETREG,
        "MOV" => MOV,
        "ADD" => ADD,
        "SUB" => SUB,
        "MUL" => MUL,
        "AND" => AND,
        "OR" => OR,
        "XOR" => XOR,
        "NEG" => NEG,
        "COM" => COM,
        "EQ" => EQ,
        "NEQ" => NEQ,
        "GT" => GT,
        "LT" => LT,
        "GTOE" => GTOE,
        "LTOE" => LTOE,
        "SHFL" => SHFL,
        "SHFR" => SHFR,
        "PUSH" => PUSH,
        "POP" => POP,
        "LOAD" => LOAD,
        "STOR" => STOR,
        "CALL" => CALL,
        "RET" => RET,
        "JMP" => JMP,
        "JMPEZ" => JMPEZ,
        "JMPNZ" => JMPNZ,
        "FAULT" => FAULT,
        "INC" => INC,
        "HALT" => HALT,
        "SET" => SET,
        other => panic!("ERROR: Unknown mnemonic '{other}' in raw asm block"),
    }
}

/// `_asm { ... }` block built from a meta-op name alone (used internally by
/// lowering to splice a bare `__CLEARSCOPE`/`__FLUSHSCOPE` into an `_asm`
/// sequence position).
pub fn raw_meta_insn(name: &str) -> Insn {
    match name {
        "__CLEARSCOPE" => Insn::meta_op(MetaOp::ClearScope),
        "__FLUSHSCOPE" => Insn::meta_op(MetaOp::FlushScope),
        "__FLUSHGLOBALS" => Insn::meta_op(MetaOp::FlushGlobals),
        other => panic!("ERROR: Unknown meta-op '{other}'"),
    }
}
