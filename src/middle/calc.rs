//! The calc expander (`spec.md` §4.3): lowers a textual arithmetic/
//! relational/function-call expression into meta-IR that leaves its result
//! in register `F`, using an in-process shunting-yard conversion to RPN
//! instead of the original's subprocess tool (REDESIGN FLAGS).

use crate::common::{id, Id};
use crate::middle::ir::{Insn, Mnemonic, MetaOp, Operand};
use crate::middle::state::{fix_global_and_string_param_types, CompileState};

/// Entry point: lower `calc` (optionally `[`-`]`-delimited) into meta-IR,
/// attributing every emitted instruction to `scope`.
pub fn resolve_calc(calc: &str, scope: Id, state: &CompileState) -> Vec<Insn> {
    if state.verbose {
        log::debug!("calc expression \"{calc}\" resolving to meta-asm:");
    }

    let mut out = resolve_calc_internal(calc, scope, state);
    for insn in &mut out {
        insn.scope = scope;
    }

    if state.verbose {
        for insn in &out {
            log::debug!("  meta/calc {:?} {:?}", insn.op, insn.operands);
        }
    }

    out
}

fn resolve_calc_internal(calc: &str, scope: Id, state: &CompileState) -> Vec<Insn> {
    let calc = calc.trim_matches(|c| c == '[' || c == ']').trim();

    if let Some(body) = strip_asm_escape(calc) {
        // Raw-asm escape: "asm { ... }" - pass through verbatim, the author
        // is responsible for leaving the result in F.
        return crate::middle::generators::to_raw_asm(body);
    }

    if is_literal(calc) {
        return set_reg_to_literal(calc, "F");
    }

    if !is_math_expression(calc) {
        panic!("ERROR: Unsupported calc string: {calc}");
    }

    let tokens = shunt(calc);
    let mut out: Vec<Insn> = Vec::new();

    let mut func_funct: Option<String> = None;
    let mut func_stack_offset: i64 = 0;
    let mut func_funarg_last: usize = 0;
    let mut last_var: Option<String> = None;

    let mut i = 0usize;
    while i < tokens.len() {
        let tok = &tokens[i];
        match tok.kind {
            YardKind::Funct => func_funct = Some(tok.value.clone()),
            YardKind::Funarg => {
                let n: usize = tok.value.parse().unwrap_or(0);
                func_stack_offset -= n as i64;
                func_funarg_last = n;
            }
            YardKind::Sys => {
                debug_assert_eq!(tok.value, "INVOKE");

                if func_funct.as_deref() == Some("$$") {
                    let preceding_is_plain_var = i >= 3
                        && matches!(tokens[i - 3].kind, YardKind::Oprnd)
                        && !is_literal(&tokens[i - 3].value);
                    if !preceding_is_plain_var {
                        panic!("ERROR: Tried calling special function $$ on anything else than a variable name (Note: $$ does not support nesting or addressing literals)");
                    }
                }

                out.extend(call_calc_func(
                    func_funct.as_deref().unwrap_or(""),
                    func_funarg_last,
                    state,
                    last_var.as_deref(),
                ));

                if matches!(func_funct.as_deref(), Some("$") | Some("$$")) {
                    func_stack_offset += func_funarg_last as i64;
                }
            }
            YardKind::Oprnd => {
                if is_literal(&tok.value) {
                    out.extend(set_reg_to_literal(&tok.value, "F"));
                } else {
                    let mut cmd = Insn::real(
                        Mnemonic::MOV,
                        vec![Operand::VarRead(id(&tok.value)), Operand::raw("F")],
                    )
                    .with_comment(format!(" CALC: var {}", tok.value));
                    last_var = Some(tok.value.clone());
                    fix_global_and_string_param_types(&mut cmd, state);
                    out.push(cmd);
                }

                out.push(Insn::real(Mnemonic::PUSH, vec![Operand::raw("F")]).with_comment(" CALC: push operand"));
            }
            YardKind::Oper => match tok.value.as_str() {
                "+" | "*" | "-" | "&" | "|" | "^" | "==" | "<" | ">" | "<=" | ">=" | "!=" | ">>" | "<<" => {
                    out.push(Insn::real(Mnemonic::POP, vec![Operand::raw("E")]));
                    out.push(Insn::real(Mnemonic::POP, vec![Operand::raw("F")]));
                    let alu = symbol_to_alu(&tok.value);
                    out.push(
                        Insn::real(alu, vec![Operand::raw("F"), Operand::raw("F"), Operand::raw("E")])
                            .with_comment(format!(" CALC: operator {alu}")),
                    );
                    out.push(Insn::real(Mnemonic::PUSH, vec![Operand::raw("F")]));
                }
                ".-" | ".~" | "~" => {
                    out.push(Insn::real(Mnemonic::POP, vec![Operand::raw("F")]));
                    let alu = if tok.value == ".-" { Mnemonic::NEG } else { Mnemonic::COM };
                    out.push(Insn::real(alu, vec![Operand::raw("F"), Operand::raw("F")]));
                    out.push(Insn::real(Mnemonic::PUSH, vec![Operand::raw("F")]));
                }
                other => panic!("ERROR: Unsupported operator token in calc instruction: {other}"),
            },
        }
        i += 1;
    }

    out.push(Insn::real(Mnemonic::POP, vec![Operand::raw("F")]));

    let mut stack_value: i64 = 0;
    for c in &out {
        match c.op {
            crate::middle::ir::Op::Real(Mnemonic::PUSH) => stack_value += 1,
            crate::middle::ir::Op::Real(Mnemonic::POP) => stack_value -= 1,
            _ => {}
        }
    }
    stack_value += func_stack_offset;

    if stack_value != 0 {
        panic!(
            "ERROR: Calc-resolved instructions would produce invalid stack. This is either a compiler bug or an invalid calc-string (e.g. invalid operators or function calls). (Stack value: {stack_value}; should be 0)"
        );
    }

    for insn in &mut out {
        insn.scope = scope;
    }

    // Shortcut: a trailing "PUSH F; POP F" still leaves the result in F.
    if out.len() > 1 {
        let second_to_last = &out[out.len() - 2];
        if matches!(second_to_last.op, crate::middle::ir::Op::Real(Mnemonic::PUSH))
            && second_to_last.operands == [Operand::raw("F")]
        {
            out.truncate(out.len() - 2);
        }
    }

    out
}

fn strip_asm_escape(calc: &str) -> Option<&str> {
    let calc = calc.trim();
    let rest = calc.strip_prefix("asm")?;
    let rest = rest.trim_start();
    let inner = rest.strip_prefix('{')?.strip_suffix('}')?;
    Some(inner)
}

fn is_literal(s: &str) -> bool {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        !hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit())
    } else {
        !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
    }
}

fn is_math_expression(s: &str) -> bool {
    s.chars().all(|c| {
        c.is_ascii_alphanumeric()
            || matches!(
                c,
                '_' | '$' | '.' | '~' | '|' | '&' | '^' | '+' | '-' | '*' | '/' | '%' | '(' | ')' | ' ' | '\t' | ',' | '<' | '>' | '='
            )
    })
}

fn symbol_to_alu(op: &str) -> Mnemonic {
    use Mnemonic::*;
    match op {
        "*" => MUL,
        "+" => ADD,
        "-" => SUB,
        "^" => XOR,
        "&" => AND,
        "|" => OR,
        "==" => EQ,
        "!=" => NEQ,
        ">" => GT,
        "<" => LT,
        "<=" => LTOE,
        ">=" => GTOE,
        "<<" => SHFL,
        ">>" => SHFR,
        other => panic!("ERROR: Unsupported operator in calc instruction: {other}"),
    }
}

fn set_reg_to_literal(calc: &str, reg: &str) -> Vec<Insn> {
    let calc = calc.trim();
    let value: u64 = if let Some(hex) = calc.strip_prefix("0x").or_else(|| calc.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).unwrap_or(0)
    } else {
        calc.parse().unwrap_or(0)
    };

    if value == 1 {
        vec![Insn::real(Mnemonic::MOV, vec![Operand::raw("1"), Operand::raw(reg)])
            .with_comment(format!(" CALC: literal {calc} (from const reg)"))]
    } else if value == 0xFFFF {
        vec![Insn::real(Mnemonic::MOV, vec![Operand::raw("-1"), Operand::raw(reg)])
            .with_comment(format!(" CALC: literal {calc} (from const reg)"))]
    } else if value == 0 {
        vec![Insn::real(Mnemonic::MOV, vec![Operand::raw("0"), Operand::raw(reg)])
            .with_comment(format!(" CALC: literal {calc} (from const reg)"))]
    } else {
        vec![Insn::real(Mnemonic::SETREG, vec![Operand::raw(reg), Operand::raw(format!("0x{value:x}"))])
            .with_comment(format!(" CALC: literal {calc}"))]
    }
}

fn call_calc_func(func_name: &str, param_count: usize, state: &CompileState, last_var: Option<&str>) -> Vec<Insn> {
    let mut out = Vec::new();

    if func_name == "$" {
        if param_count != 1 {
            panic!("ERROR: Special function $ requires exactly 1 argument, {param_count} given");
        }

        out.push(Insn::real(Mnemonic::POP, vec![Operand::raw("F")]));
        let mut load = Insn::real(Mnemonic::LOAD, vec![Operand::raw("F"), Operand::raw("F")]);
        fix_global_and_string_param_types(&mut load, state);
        out.push(load);
        out.push(Insn::real(Mnemonic::PUSH, vec![Operand::raw("F")]));
    } else if func_name == "$$" {
        if param_count != 1 {
            panic!("ERROR: Special function $$ requires exactly 1 argument, {param_count} given");
        }

        let last_var = last_var.expect("ERROR: $$ requires a preceding variable operand");

        // Technically useless, but needed to keep the stack sane; the
        // peephole optimizer cleans this up later.
        out.push(Insn::real(Mnemonic::POP, vec![Operand::raw("F")]));

        out.push(Insn::new(
            crate::middle::ir::Op::Meta(MetaOp::SetDirect),
            Vec::new(),
        ).annotated(id(last_var), 0));

        let mut mov = Insn::real(Mnemonic::MOV, vec![Operand::VarAddr(id(last_var)), Operand::raw("F")]);
        fix_global_and_string_param_types(&mut mov, state);
        out.push(mov);

        out.push(Insn::real(Mnemonic::PUSH, vec![Operand::raw("F")]));
    } else {
        out.push(Insn::meta_op(MetaOp::FlushScope));
        out.push(Insn::meta_op(MetaOp::ClearScope));

        let label = crate::middle::types::func_label(func_name, param_count);
        let func = state.function_table.iter().find(|f| f.label == label);
        match func {
            Some(f) if f.return_type.is_none() => {
                panic!("ERROR: Tried calling a void function in a calc context: Function '{func_name}' with {param_count} parameters");
            }
            Some(_) => {}
            None => {
                log::warn!("Cannot find function to call (calc): Function '{func_name}' with {param_count} parameters (Assuming extern function)");
            }
        }

        out.push(Insn::real(Mnemonic::CALL, vec![Operand::raw(format!(".{label}"))]));
        out.push(Insn::real(Mnemonic::PUSH, vec![Operand::raw("A")]));
        out.push(Insn::meta_op(MetaOp::ClearScope));
    }

    out
}

// ---- In-process shunting-yard (Dijkstra two-stack) ----

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YardKind {
    Oprnd,
    Oper,
    Funct,
    Funarg,
    Sys,
}

#[derive(Debug, Clone)]
pub struct YardToken {
    pub kind: YardKind,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Lexeme {
    Num(String),
    Ident(String),
    Op(String),
    LParen,
    RParen,
    Comma,
}

fn lex_calc(input: &str) -> Vec<Lexeme> {
    let chars: Vec<char> = input.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c.is_ascii_digit() {
            let start = i;
            if c == '0' && i + 1 < chars.len() && (chars[i + 1] == 'x' || chars[i + 1] == 'X') {
                i += 2;
                while i < chars.len() && chars[i].is_ascii_hexdigit() {
                    i += 1;
                }
            } else {
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
            }
            out.push(Lexeme::Num(chars[start..i].iter().collect()));
            continue;
        }
        if c.is_ascii_alphabetic() || c == '_' || c == '$' {
            let start = i;
            // `$` and `$$` are their own complete identifiers (special
            // function names); everything else is `[a-zA-Z_][a-zA-Z0-9_.]*`.
            if c == '$' {
                i += 1;
                if i < chars.len() && chars[i] == '$' {
                    i += 1;
                }
            } else {
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '.') {
                    i += 1;
                }
            }
            out.push(Lexeme::Ident(chars[start..i].iter().collect()));
            continue;
        }
        match c {
            '(' => {
                out.push(Lexeme::LParen);
                i += 1;
            }
            ')' => {
                out.push(Lexeme::RParen);
                i += 1;
            }
            ',' => {
                out.push(Lexeme::Comma);
                i += 1;
            }
            _ => {
                // Multi-char operators first.
                let two: String = chars[i..(i + 2).min(chars.len())].iter().collect();
                if ["==", "!=", "<=", ">=", "<<", ">>"].contains(&two.as_str()) {
                    out.push(Lexeme::Op(two));
                    i += 2;
                } else {
                    out.push(Lexeme::Op(c.to_string()));
                    i += 1;
                }
            }
        }
    }
    out
}

fn precedence(op: &str) -> u8 {
    match op {
        ".-" | ".~" => 6,
        "*" | "/" | "%" => 5,
        "+" | "-" => 4,
        "<<" | ">>" => 3,
        "<" | ">" | "<=" | ">=" => 2,
        "==" | "!=" => 1,
        "&" | "^" | "|" => 0,
        _ => 0,
    }
}

fn is_right_assoc(op: &str) -> bool {
    matches!(op, ".-" | ".~")
}

enum StackItem {
    Op(String),
    LParen,
    /// A function-call `(`, carrying the function name and a running
    /// argument count (starts at 1 as soon as any token is seen, per the
    /// original's FUNARG convention of counting commas + 1 unless the
    /// argument list is empty).
    FuncParen(String, usize, bool),
}

/// Convert an infix calc expression into RPN tokens using a standard
/// two-stack (Dijkstra) shunting-yard algorithm, extended to track
/// function-call argument counts and unary `-`/`~`.
pub fn shunt(input: &str) -> Vec<YardToken> {
    let lexemes = lex_calc(input);
    let mut output: Vec<YardToken> = Vec::new();
    let mut ops: Vec<StackItem> = Vec::new();
    // True when the next token may be a unary operator (start of
    // expression, after '(', ',', or another operator).
    let mut expect_unary = true;

    let mut i = 0;
    while i < lexemes.len() {
        match &lexemes[i] {
            Lexeme::Num(n) => {
                output.push(YardToken { kind: YardKind::Oprnd, value: n.clone() });
                if let Some(StackItem::FuncParen(_, count, has_tok)) = ops.last_mut() {
                    *has_tok = true;
                    let _ = count;
                }
                expect_unary = false;
            }
            Lexeme::Ident(name) => {
                let is_call = matches!(lexemes.get(i + 1), Some(Lexeme::LParen));
                if is_call {
                    ops.push(StackItem::FuncParen(name.clone(), 0, false));
                } else {
                    output.push(YardToken { kind: YardKind::Oprnd, value: name.clone() });
                    if let Some(StackItem::FuncParen(_, _, has_tok)) = ops.last_mut() {
                        *has_tok = true;
                    }
                }
                expect_unary = false;
            }
            Lexeme::LParen => {
                if matches!(ops.last(), Some(StackItem::FuncParen(_, _, false))) {
                    // the '(' immediately following a function name: consumed
                    // implicitly, nothing to push.
                } else {
                    ops.push(StackItem::LParen);
                }
                expect_unary = true;
            }
            Lexeme::RParen => {
                loop {
                    match ops.pop() {
                        Some(StackItem::Op(o)) => output.push(YardToken { kind: YardKind::Oper, value: o }),
                        Some(StackItem::LParen) => break,
                        Some(StackItem::FuncParen(name, count, has_tok)) => {
                            let total = count + if has_tok { 1 } else { 0 };
                            output.push(YardToken { kind: YardKind::Funct, value: name });
                            output.push(YardToken { kind: YardKind::Funarg, value: total.to_string() });
                            output.push(YardToken { kind: YardKind::Sys, value: "INVOKE".to_string() });
                            break;
                        }
                        None => panic!("ERROR: unbalanced parentheses in calc expression"),
                    }
                }
                expect_unary = false;
            }
            Lexeme::Comma => {
                loop {
                    match ops.last_mut() {
                        Some(StackItem::Op(_)) => {
                            if let Some(StackItem::Op(o)) = ops.pop() {
                                output.push(YardToken { kind: YardKind::Oper, value: o });
                            }
                        }
                        Some(StackItem::FuncParen(_, count, has_tok)) => {
                            if *has_tok {
                                *count += 1;
                            }
                            break;
                        }
                        _ => break,
                    }
                }
                if let Some(StackItem::FuncParen(_, _, has_tok)) = ops.last_mut() {
                    *has_tok = false;
                }
                expect_unary = true;
            }
            Lexeme::Op(sym) => {
                let sym = if expect_unary && sym == "-" {
                    ".-".to_string()
                } else if expect_unary && sym == "~" {
                    ".~".to_string()
                } else {
                    sym.clone()
                };

                if sym == ".-" || sym == ".~" {
                    // Unary: right-associative, bind only to the next operand.
                    while let Some(StackItem::Op(top)) = ops.last() {
                        if is_right_assoc(&sym) {
                            break;
                        }
                        if precedence(top) >= precedence(&sym) {
                            if let Some(StackItem::Op(o)) = ops.pop() {
                                output.push(YardToken { kind: YardKind::Oper, value: o });
                            }
                        } else {
                            break;
                        }
                    }
                    ops.push(StackItem::Op(sym));
                } else {
                    while let Some(StackItem::Op(top)) = ops.last() {
                        let pop = if is_right_assoc(&sym) {
                            precedence(top) > precedence(&sym)
                        } else {
                            precedence(top) >= precedence(&sym)
                        };
                        if pop {
                            if let Some(StackItem::Op(o)) = ops.pop() {
                                output.push(YardToken { kind: YardKind::Oper, value: o });
                            }
                        } else {
                            break;
                        }
                    }
                    ops.push(StackItem::Op(sym));
                }
                if let Some(StackItem::FuncParen(_, _, has_tok)) = ops.iter_mut().rev().find(|s| matches!(s, StackItem::FuncParen(..))) {
                    *has_tok = true;
                }
                expect_unary = true;
            }
        }
        i += 1;
    }

    while let Some(item) = ops.pop() {
        match item {
            StackItem::Op(o) => output.push(YardToken { kind: YardKind::Oper, value: o }),
            StackItem::LParen => panic!("ERROR: unbalanced parentheses in calc expression"),
            StackItem::FuncParen(name, count, has_tok) => {
                let total = count + if has_tok { 1 } else { 0 };
                output.push(YardToken { kind: YardKind::Funct, value: name });
                output.push(YardToken { kind: YardKind::Funarg, value: total.to_string() });
                output.push(YardToken { kind: YardKind::Sys, value: "INVOKE".to_string() });
            }
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_detection() {
        assert!(is_literal("123"));
        assert!(is_literal("0x1F"));
        assert!(!is_literal("foo"));
        assert!(!is_literal("0xzz"));
    }

    #[test]
    fn shunt_simple_arithmetic() {
        let toks = shunt("1 + 2 * 3");
        let kinds: Vec<_> = toks.iter().map(|t| (t.kind, t.value.clone())).collect();
        assert_eq!(
            kinds,
            vec![
                (YardKind::Oprnd, "1".into()),
                (YardKind::Oprnd, "2".into()),
                (YardKind::Oprnd, "3".into()),
                (YardKind::Oper, "*".into()),
                (YardKind::Oper, "+".into()),
            ]
        );
    }

    #[test]
    fn shunt_function_call() {
        let toks = shunt("add(40, 2)");
        let kinds: Vec<_> = toks.iter().map(|t| (t.kind, t.value.clone())).collect();
        assert_eq!(
            kinds,
            vec![
                (YardKind::Oprnd, "40".into()),
                (YardKind::Oprnd, "2".into()),
                (YardKind::Funct, "add".into()),
                (YardKind::Funarg, "2".into()),
                (YardKind::Sys, "INVOKE".into()),
            ]
        );
    }

    #[test]
    fn shunt_unary_minus() {
        let toks = shunt("-x");
        let kinds: Vec<_> = toks.iter().map(|t| (t.kind, t.value.clone())).collect();
        assert_eq!(kinds, vec![(YardKind::Oprnd, "x".into()), (YardKind::Oper, ".-".into())]);
    }
}
