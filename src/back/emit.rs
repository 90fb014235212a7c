//! The emitter (`spec.md` §4.7): orders the init asm, data section, and
//! code into the final textual assembly, and emits non-fatal warnings.

use crate::middle::ir::{is_resolved, Insn, Mnemonic, Op};
use crate::middle::lower::FAULT_NO_RETURN;
use crate::middle::state::CompileState;
use crate::middle::types::func_label;

/// Where the bootloader's ROM-mapped copy of the data section lives, before
/// `.mscr_init_bootloader` copies it down into RAM starting at address 0.
/// Not specified further than "a configured ROM region" by `spec.md` §6;
/// recorded as an Open Question resolution in `DESIGN.md`.
pub const BOOTLOADER_ROM_BASE: u16 = 0xF000;

/// Top of RAM, used to seed the hardware stack pointer in the init
/// preamble. Also an Open Question resolution (`DESIGN.md`).
pub const STACK_TOP: u16 = 0xEFFF;

pub struct EmitResult {
    pub asm: String,
    pub warnings: Vec<String>,
}

/// Assemble the final textual program. Panics if `resolved` contains any
/// non-`Raw` operand — that is the emitter's documented precondition, which
/// the driver is responsible for upholding (`spec.md` §4.8: "assert
/// isResolved").
pub fn emit(resolved: &[Insn], state: &CompileState, bootloader: bool) -> EmitResult {
    assert!(
        is_resolved(resolved),
        "emitter precondition violated: an unresolved operand reached the emitter"
    );

    let warnings = collect_warnings(resolved);

    let mut lines: Vec<String> = Vec::new();
    lines.push("; mscr generated assembly".to_string());
    lines.push("JMP .mscr_init_main".to_string());
    lines.push(".mscr_data __LABEL_SET".to_string());
    for word in &state.bin_data {
        lines.push(format!("0x{word:04x}"));
    }

    lines.push(".mscr_init_main __LABEL_SET".to_string());
    lines.push(format!("SET 0x{STACK_TOP:04x} ;stack pointer"));
    lines.push(format!("SETREG H 0x{:04x} ;VarHeap base, right after the data section", state.max_data_addr));
    if bootloader {
        lines.push("CALL .mscr_init_bootloader".to_string());
    }
    lines.push("CALL .mscr_init_userland".to_string());
    lines.push("SETREG A 0x0".to_string());
    lines.push("PUSH A".to_string());
    lines.push("PUSH A".to_string());
    lines.push(format!("CALL .{}", func_label("main", 2)));
    lines.push("MOV A H".to_string());
    lines.push("HALT".to_string());

    if bootloader {
        lines.extend(bootloader_init_asm(state));
    }

    for insn in resolved {
        if let Some(rendered) = render_insn(insn) {
            lines.push(rendered);
        }
    }

    lines.push(".mscr_code_end __LABEL_SET".to_string());
    lines.push("HALT".to_string());

    lines.push(String::new());
    EmitResult { asm: lines.join("\n"), warnings }
}

fn bootloader_init_asm(state: &CompileState) -> Vec<String> {
    vec![
        ".mscr_init_bootloader __LABEL_SET".to_string(),
        format!("SETREG E 0x{BOOTLOADER_ROM_BASE:04x} ;ROM source cursor"),
        "SETREG F 0x0 ;RAM destination cursor".to_string(),
        format!("SETREG G 0x{:04x} ;words to copy", state.max_data_addr),
        ".mscr_bootloader_copy_loop __LABEL_SET".to_string(),
        "EQ B F G".to_string(),
        "JMPNZ .mscr_bootloader_copy_end B".to_string(),
        "LOAD B E".to_string(),
        "STOR B F".to_string(),
        "INC E".to_string(),
        "INC F".to_string(),
        "JMP .mscr_bootloader_copy_loop".to_string(),
        ".mscr_bootloader_copy_end __LABEL_SET".to_string(),
        "RET".to_string(),
    ]
}

/// Meta-op instructions render to nothing (the resolver has already
/// consumed their side effects); everything else renders to one line.
fn render_insn(insn: &Insn) -> Option<String> {
    match &insn.op {
        Op::Meta(_) => None,
        Op::Label(name) => Some(format!(".{name} __LABEL_SET")),
        Op::Real(m) => {
            let mut line = m.to_string();
            for op in &insn.operands {
                line.push(' ');
                line.push_str(op.raw_text());
            }
            if !insn.comment.is_empty() {
                line.push_str(&format!(" ;{}", insn.comment));
            }
            Some(line)
        }
    }
}

/// "A non-void function without a trailing return": for every sentinel
/// `FAULT FAULT_NO_RETURN`, warn if the nearest preceding real instruction
/// (skipping meta-ops, which render to nothing) is not `RET`.
fn collect_warnings(resolved: &[Insn]) -> Vec<String> {
    let mut warnings = Vec::new();

    for (idx, insn) in resolved.iter().enumerate() {
        let is_sentinel = matches!(&insn.op, Op::Real(Mnemonic::FAULT))
            && insn.operands.len() == 1
            && insn.operands[0].raw_text() == FAULT_NO_RETURN;
        if !is_sentinel {
            continue;
        }

        let prior_is_ret = resolved[..idx]
            .iter()
            .rev()
            .find(|i| matches!(&i.op, Op::Real(_)))
            .map(|i| matches!(&i.op, Op::Real(Mnemonic::RET)))
            .unwrap_or(false);

        if !prior_is_ret {
            warnings.push(format!(
                "non-void function without trailing return (scope '{}')",
                insn.scope
            ));
        }
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::id;
    use crate::middle::ir::{MetaOp, Operand};
    use crate::middle::state::CompileState;

    #[test]
    fn emits_header_data_and_trailer() {
        let mut state = CompileState::new(false);
        state.bin_data = vec![5, 0];
        state.max_data_addr = 5;
        let result = emit(&[], &state, false);
        assert!(result.asm.contains("JMP .mscr_init_main"));
        assert!(result.asm.contains(".mscr_data __LABEL_SET"));
        assert!(result.asm.contains("0x0005"));
        assert!(result.asm.contains(".mscr_code_end __LABEL_SET"));
    }

    #[test]
    fn bootloader_mode_adds_the_copy_preamble() {
        let state = CompileState::new(false);
        let result = emit(&[], &state, true);
        assert!(result.asm.contains(".mscr_init_bootloader __LABEL_SET"));
        assert!(result.asm.contains("CALL .mscr_init_bootloader"));
    }

    #[test]
    fn warns_on_missing_trailing_return() {
        let insns = vec![
            Insn::real(Mnemonic::SETREG, vec![Operand::raw("A"), Operand::raw("0x1")]).with_scope(id("f")),
            Insn::real(Mnemonic::FAULT, vec![Operand::raw(FAULT_NO_RETURN)]).with_scope(id("f")),
        ];
        let state = CompileState::new(false);
        let result = emit(&insns, &state, false);
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn no_warning_when_function_ends_in_ret() {
        let insns = vec![
            Insn::real(Mnemonic::RET, Vec::new()).with_scope(id("f")),
            Insn::meta_op(MetaOp::ClearScope).with_scope(id("f")),
            Insn::real(Mnemonic::FAULT, vec![Operand::raw(FAULT_NO_RETURN)]).with_scope(id("f")),
        ];
        let state = CompileState::new(false);
        let result = emit(&insns, &state, false);
        assert!(result.warnings.is_empty());
    }
}
