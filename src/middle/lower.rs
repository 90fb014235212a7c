//! AST-to-meta-IR lowering (`spec.md` §4.4), mirroring the original's
//! `asmForNodePre`/`asmForNodePost` pre/post-order visitor pairs, but driven
//! directly off our own typed AST instead of a generic reflection walk.

use crate::common::{id, Id};
use crate::error::{CompileError, Result};
use crate::front::ast::*;
use crate::middle::generators;
use crate::middle::ir::{Insn, Mnemonic, MetaOp, Op, Operand};
use crate::middle::state::CompileState;
use crate::middle::types::{func_label, type_is_word, FuncSig, TypeDef};

/// Sentinel FAULT operand marking "function fell off its end without a
/// `return`" — checked for by the emitter to decide whether to warn.
pub const FAULT_NO_RETURN: &str = "0xFFFF";

/// Validate the program (redefinition checks, type registration, entry
/// point existence) and build the initial [`CompileState`] tables, mirroring
/// `ast.go`'s first `walkInterface` pass over the AST.
pub fn validate(program: &Program, verbose: bool) -> Result<CompileState> {
    let mut state = CompileState::new(verbose);

    let mut seen_globals: std::collections::BTreeSet<Id> = Default::default();
    let mut seen_structs: std::collections::BTreeSet<Id> = Default::default();

    for top in &program.top {
        match top {
            TopLevel::Global(g) => {
                if !seen_globals.insert(g.name) {
                    return Err(CompileError::Redefinition { kind: "global", name: g.name });
                }
            }
            TopLevel::Struct(s) => {
                if !seen_structs.insert(s.name) || state.type_map.contains_key(&s.name) {
                    return Err(CompileError::Redefinition { kind: "struct", name: s.name });
                }

                let mut members = Vec::new();
                let mut size = 0usize;
                for m in &s.members {
                    let mty = state
                        .type_map
                        .get(&m.ty)
                        .ok_or_else(|| CompileError::Type(format!("use of undefined type '{}' for struct member {}.{}", m.ty, s.name, m.name)))?
                        .clone();
                    size += mty.size_in_words;
                    members.push((m.name, mty.name));
                }

                state.type_map.insert(
                    s.name,
                    TypeDef { name: s.name, size_in_words: size, builtin: false, members },
                );
            }
            TopLevel::Function(f) => {
                let label = func_label(f.name.as_str(), f.params.len());
                if state.function_table.iter().any(|sig| sig.label == label) {
                    return Err(CompileError::Redefinition { kind: "function", name: f.name });
                }

                let return_type = if f.return_type.as_str() == "void" {
                    None
                } else {
                    let ret = state
                        .type_map
                        .get(&f.return_type)
                        .ok_or_else(|| CompileError::Type(format!("use of undefined type '{}' in return type of function '{}'", f.return_type, f.name)))?;
                    if ret.size_in_words != 1 {
                        return Err(CompileError::Type(format!(
                            "return types with size != 1 are prohibited (type '{}' in function '{}')",
                            f.return_type, f.name
                        )));
                    }
                    Some(ret.name)
                };

                if return_type.is_none() {
                    state.void_functions.insert(label);
                }

                let mut params = Vec::new();
                for p in &f.params {
                    let pty = state
                        .type_map
                        .get(&p.ty)
                        .ok_or_else(|| CompileError::Type(format!("use of undefined type '{}' in parameter '{}' (function '{}')", p.ty, p.name, f.name)))?;
                    if pty.size_in_words != 1 {
                        return Err(CompileError::Type(format!(
                            "parameter types with size != 1 are prohibited (type '{}' in parameter '{}', function '{}')",
                            p.ty, p.name, f.name
                        )));
                    }
                    params.push((p.name, pty.name));
                }

                state.function_table.push(FuncSig { name: f.name, label, params, return_type });
            }
            TopLevel::View(_) => {}
        }
    }

    let main_label = func_label("main", 2);
    let main = state
        .function_table
        .iter()
        .find(|f| f.label == main_label)
        .ok_or(CompileError::MissingEntryPoint)?;
    let word = id("word");
    let sig_ok = main.params.len() == 2
        && main.params[0].1 == word
        && main.params[1].1 == word
        && main.return_type == Some(word);
    if !sig_ok {
        return Err(CompileError::Type(
            "function main must have type signature 'func word main (word argc, word argp)'".to_string(),
        ));
    }

    Ok(state)
}

/// Lower a validated program into meta-IR.
pub fn lower(program: &Program, bootloader: bool, state: &mut CompileState) -> Vec<Insn> {
    let mut asm = Vec::new();

    for top in &program.top {
        match top {
            TopLevel::Function(f) => asm.extend(lower_function(f, state)),
            TopLevel::Global(g) => lower_global(g, state),
            TopLevel::View(v) => {
                state.global_memory_map.insert(CompileState::global_key(v.name.as_str()), v.address as usize);
            }
            TopLevel::Struct(_) => {}
        }
    }

    if bootloader {
        state
            .specific_initialization_asm
            .insert(0, Insn::real(Mnemonic::CALL, vec![Operand::raw(".mscr_init_bootloader")]));
    }

    state.specific_initialization_asm.insert(0, Insn::label(id("mscr_init_userland")));
    state
        .specific_initialization_asm
        .push(Insn::real(Mnemonic::RET, Vec::new()).with_comment("Userland init end\n"));

    let mut out = std::mem::take(&mut state.specific_initialization_asm);
    out.push(Insn::meta_op(MetaOp::ClearScope));
    out.rotate_right(1); // ClearScope goes first, ahead of the init asm.
    out.extend(asm);
    asm = out;

    for insn in &mut asm {
        crate::middle::state::fix_global_and_string_param_types(insn, state);
    }

    asm
}

fn lower_global(g: &Global, state: &mut CompileState) {
    let key = CompileState::global_key(g.name.as_str());
    match &g.value {
        Some(GlobalValue::Text(s)) => {
            state.string_map.insert(key, state.max_data_addr);
            let mut data: Vec<u16> = s.chars().map(|c| c as u16).collect();
            data.push(0);
            state.max_data_addr += data.len();
            state.bin_data.extend(data);
        }
        Some(GlobalValue::Number(n)) => {
            state.global_memory_map.insert(key, state.max_data_addr);
            state.max_data_addr += 1;
            state.bin_data.push(*n as u16);
        }
        None => {
            state.global_memory_map.insert(key, state.max_data_addr);
            state.max_data_addr += 1;
            state.bin_data.push(0);
        }
    }
}

fn lower_function(f: &Function, state: &mut CompileState) -> Vec<Insn> {
    let label = func_label(f.name.as_str(), f.params.len());
    state.current_function = f.name;

    let mut out = vec![Insn::label(label)];
    out.push(Insn::meta_op(MetaOp::ClearScope));
    out.extend(generators::func_push_state(f.name));
    out.push(Insn::real(Mnemonic::POP, vec![Operand::raw("E")]));

    for p in f.params.iter().rev() {
        out.extend(generators::var_from_stack(p.name.as_str()));
        state.add_variable(p.name.as_str(), p.ty.as_str());
    }

    out.push(Insn::real(Mnemonic::PUSH, vec![Operand::raw("E")]));

    for stmt in &f.body {
        out.extend(lower_stmt(stmt, state));
    }

    let is_void = state.void_functions.contains(&label);
    if is_void {
        out.extend(generators::func_pop_state(f.name));
        out.push(Insn::meta_op(MetaOp::FlushGlobals));
        out.push(Insn::real(Mnemonic::RET, Vec::new()));
    }

    out.push(
        Insn::real(Mnemonic::FAULT, vec![Operand::raw(FAULT_NO_RETURN)])
            .with_comment(format!(" Ending function: {}", f.name)),
    );

    for insn in &mut out {
        insn.scope = f.name;
    }

    state.current_function = id("");
    state.current_scope_variable_count = 0;

    out
}

fn lower_stmt(stmt: &Stmt, state: &mut CompileState) -> Vec<Insn> {
    let scope = state.current_function;
    let mut out = match stmt {
        Stmt::Variable { ty, name, value } => {
            state.add_variable(name.as_str(), ty.as_str());
            match value {
                Some(v) => vec![Insn::real(
                    Mnemonic::MOV,
                    vec![Operand::Calc(runtime_value_to_calc(v)), Operand::VarWrite(*name)],
                )],
                None => Vec::new(),
            }
        }

        Stmt::Assignment { name, op, value } => {
            let value_calc = runtime_value_to_calc(value);
            let calc = match op.calc_symbol() {
                None => value_calc,
                Some(sym) => format!("{name} {sym} ({value_calc})"),
            };
            vec![Insn::real(Mnemonic::MOV, vec![Operand::Calc(calc), Operand::VarWrite(*name)])]
        }

        Stmt::Return(value) => {
            let mut v = vec![Insn::real(Mnemonic::MOV, vec![Operand::Calc(runtime_value_to_calc(value)), Operand::raw("A")])];
            v.extend(generators::func_pop_state(state.current_function));
            v.push(Insn::meta_op(MetaOp::FlushGlobals));
            v.push(Insn::real(Mnemonic::RET, Vec::new()));
            v
        }

        Stmt::Asm(text) => generators::to_raw_asm(text.trim_start_matches("_asm").trim().trim_start_matches('{').trim_end_matches('}')),

        Stmt::FunctionCall(call) => lower_call_stmt(call, state),

        Stmt::If { id: node_id, condition, body_if, body_else } => lower_if(*node_id, condition, body_if, body_else, state),

        Stmt::While { id: node_id, condition, body } => lower_while(*node_id, condition, body, state),
    };

    for insn in &mut out {
        insn.scope = scope;
    }
    out
}

/// Top-level (value-discarding) function call statement, including the
/// compiler-recognized meta-functions `_reg_assign`, `$` and `$$`.
fn lower_call_stmt(call: &FunctionCallStmt, state: &CompileState) -> Vec<Insn> {
    match call.name.as_str() {
        "_reg_assign" => {
            if call.params.len() != 2 {
                panic!("ERROR: A call to _reg_assign must have two parameters (register, variable)");
            }
            let reg = match &call.params[0] {
                RuntimeValue::Number(n) => *n as usize,
                _ => panic!("ERROR: A call to _reg_assign must have a register number as its first parameter"),
            };
            let var = match &call.params[1] {
                RuntimeValue::Variable(v) => *v,
                _ => panic!("ERROR: A call to _reg_assign must have a variable as its second parameter"),
            };
            vec![Insn::new(Op::Meta(MetaOp::ForceScope), Vec::new())
                .annotated(var, reg)
                .with_comment(" _reg_assign")]
        }

        "$$" => {
            if call.params.len() != 2 {
                panic!("ERROR: A call to $$ must have two parameters (address, value)");
            }
            let addr = Operand::Calc(runtime_value_to_calc(&call.params[0]));
            let val = Operand::Calc(runtime_value_to_calc(&call.params[1]));
            vec![
                Insn::real(Mnemonic::PUSH, vec![val]).with_comment(" call to $$"),
                Insn::real(Mnemonic::MOV, vec![addr, Operand::raw("F")]).with_comment(" call to $$"),
                Insn::real(Mnemonic::POP, vec![Operand::raw("G")]).with_comment(" call to $$"),
                Insn::real(Mnemonic::STOR, vec![Operand::raw("G"), Operand::raw("F")]).with_comment(" call to $$"),
            ]
        }

        "$" => panic!(
            "ERROR: Cannot use special function '$' in non-value context (e.g. calling $ as a void function/standalone. Use calc context [] instead.)"
        ),

        name => {
            let args = call.params.iter().map(|p| Operand::Calc(runtime_value_to_calc(p))).collect();
            generators::call_func(name, args, state)
        }
    }
}

fn lower_if(node_id: u64, condition: &str, body_if: &[Stmt], body_else: &[Stmt], state: &mut CompileState) -> Vec<Insn> {
    let label_else = id(format!("mscr_cond_else_{node_id}"));
    let label_end = id(format!("mscr_cond_end_{node_id}"));

    let mut out = vec![Insn::meta_op(MetaOp::FlushScope), Insn::meta_op(MetaOp::ClearScope)];
    out.push(Insn::real(
        Mnemonic::JMPEZ,
        vec![Operand::raw(format!(".{label_else}")), Operand::Calc(condition.to_string())],
    ));

    for stmt in body_if {
        out.extend(lower_stmt(stmt, state));
    }
    out.push(Insn::meta_op(MetaOp::FlushScope));
    out.push(Insn::real(Mnemonic::JMP, vec![Operand::raw(format!(".{label_end}"))]));

    out.push(Insn::label(label_else));
    out.push(Insn::meta_op(MetaOp::ClearScope));
    for stmt in body_else {
        out.extend(lower_stmt(stmt, state));
    }

    out.push(Insn::meta_op(MetaOp::FlushScope));
    out.push(Insn::meta_op(MetaOp::ClearScope));
    out.push(Insn::label(label_end));

    out
}

fn lower_while(node_id: u64, condition: &str, body: &[Stmt], state: &mut CompileState) -> Vec<Insn> {
    let label_start = id(format!("mscr_while_start_{node_id}"));
    let label_end = id(format!("mscr_while_end_{node_id}"));

    let mut out = vec![Insn::meta_op(MetaOp::FlushScope), Insn::meta_op(MetaOp::ClearScope)];
    out.push(Insn::label(label_start));
    out.push(Insn::real(Mnemonic::MOV, vec![Operand::Calc(condition.to_string()), Operand::raw("F")]));
    out.push(Insn::real(Mnemonic::JMPEZ, vec![Operand::raw(format!(".{label_end}")), Operand::raw("F")]));

    for stmt in body {
        out.extend(lower_stmt(stmt, state));
    }

    out.push(Insn::meta_op(MetaOp::FlushScope));
    out.push(Insn::real(Mnemonic::JMP, vec![Operand::raw(format!(".{label_start}"))]));
    out.push(Insn::label(label_end));
    out.push(Insn::meta_op(MetaOp::ClearScope));

    out
}

/// Render a `RuntimeValue` into calc-expander syntax, replacing the
/// original's text-preprocessing "auto calc bracket" pass: every runtime
/// value funnels into the same shunting-yard expander regardless of shape.
fn runtime_value_to_calc(rv: &RuntimeValue) -> String {
    match rv {
        RuntimeValue::Number(n) => n.to_string(),
        RuntimeValue::Variable(name) => name.to_string(),
        RuntimeValue::Eval(text) => format!("({text})"),
        RuntimeValue::FunctionCall(call) => {
            let args: Vec<String> = call.params.iter().map(runtime_value_to_calc).collect();
            format!("{}({})", call.name, args.join(","))
        }
    }
}

/// Check a (possibly dotted) accessor resolves to a single word within the
/// given scope's variable table — used by `_reg_assign`'s `__FORCESCOPE`
/// handling in the resolver, exposed here since lowering is where the
/// accessor string is first built.
pub fn assert_word_sized(accessor: &str, base_type: &TypeDef, types: &crate::middle::types::TypeMap) {
    if !type_is_word(base_type, accessor, types) {
        panic!("ERROR: variable '{accessor}' does not resolve to a single word");
    }
}
