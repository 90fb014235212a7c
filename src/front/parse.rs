//! The parser: recursive descent over the token stream from `lex`, matching
//! the original's participle grammar (`parser.go`).

use std::fmt::Debug;

use derive_more::derive::Display;

use crate::common::id;

use super::ast::*;
use super::lex::{Lexer, TokenKind};

#[derive(Display)]
#[display("Parse error: {}", self.0)]
pub struct ParseError(String);

impl Debug for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

fn err(msg: impl Into<String>) -> ParseError {
    ParseError(msg.into())
}

struct Parser {
    toks: Vec<(TokenKind, String, usize)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&(TokenKind, String, usize)> {
        self.toks.get(self.pos)
    }

    fn peek_text(&self) -> &str {
        self.peek().map(|(_, t, _)| t.as_str()).unwrap_or("<eof>")
    }

    fn bump(&mut self) -> Option<(TokenKind, String, usize)> {
        let t = self.toks.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect_punct(&mut self, p: &str) -> Result<(), ParseError> {
        match self.bump() {
            Some((TokenKind::Punct, t, _)) if t == p => Ok(()),
            other => Err(err(format!("expected '{p}', found {other:?}"))),
        }
    }

    fn expect_ident(&mut self) -> Result<String, ParseError> {
        match self.bump() {
            Some((TokenKind::Ident, t, _)) => Ok(t),
            other => Err(err(format!("expected identifier, found {other:?}"))),
        }
    }

    fn expect_ident_text(&mut self, text: &str) -> Result<(), ParseError> {
        match self.bump() {
            Some((TokenKind::Ident, t, _)) if t == text => Ok(()),
            other => Err(err(format!("expected '{text}', found {other:?}"))),
        }
    }

    fn at_punct(&self, p: &str) -> bool {
        matches!(self.peek(), Some((TokenKind::Punct, t, _)) if t == p)
    }

    fn at_ident(&self, text: &str) -> bool {
        matches!(self.peek(), Some((TokenKind::Ident, t, _)) if t == text)
    }

    fn parse_program(&mut self) -> Result<Program, ParseError> {
        let mut top = Vec::new();
        while self.peek().is_some() {
            top.push(self.parse_top_level()?);
        }
        Ok(Program { top })
    }

    fn parse_top_level(&mut self) -> Result<TopLevel, ParseError> {
        if self.at_ident("func") {
            return Ok(TopLevel::Function(self.parse_function()?));
        }
        if self.at_ident("struct") {
            return Ok(TopLevel::Struct(self.parse_struct()?));
        }
        if self.at_ident("global") {
            let g = self.parse_global()?;
            self.expect_punct(";")?;
            return Ok(TopLevel::Global(g));
        }
        if self.at_ident("view") {
            let v = self.parse_view()?;
            self.expect_punct(";")?;
            return Ok(TopLevel::View(v));
        }
        Err(err(format!("expected top-level declaration, found '{}'", self.peek_text())))
    }

    fn parse_function(&mut self) -> Result<Function, ParseError> {
        self.expect_ident_text("func")?;
        let inline = if self.at_ident("inline") {
            self.bump();
            true
        } else {
            false
        };
        let return_type = self.expect_ident()?;
        let name = self.expect_ident()?;
        self.expect_punct("(")?;
        let mut params = Vec::new();
        while !self.at_punct(")") {
            let ty = self.expect_ident()?;
            let pname = self.expect_ident()?;
            params.push(Param { ty: id(ty), name: id(pname) });
            if self.at_punct(",") {
                self.bump();
            }
        }
        self.expect_punct(")")?;
        self.expect_punct("{")?;
        let mut body = Vec::new();
        while !self.at_punct("}") {
            body.push(self.parse_stmt()?);
        }
        self.expect_punct("}")?;

        Ok(Function { inline, return_type: id(return_type), name: id(name), params, body })
    }

    fn parse_struct(&mut self) -> Result<StructDef, ParseError> {
        self.expect_ident_text("struct")?;
        let name = self.expect_ident()?;
        self.expect_punct("{")?;
        let mut members = Vec::new();
        while !self.at_punct("}") {
            let ty = self.expect_ident()?;
            let mname = self.expect_ident()?;
            self.expect_punct(";")?;
            members.push(Param { ty: id(ty), name: id(mname) });
        }
        self.expect_punct("}")?;
        Ok(StructDef { name: id(name), members })
    }

    fn parse_global(&mut self) -> Result<Global, ParseError> {
        self.expect_ident_text("global")?;
        let ty = self.expect_ident()?;
        let name = self.expect_ident()?;
        let value = if matches!(self.peek(), Some((TokenKind::AssignOp, t, _)) if t == "=") {
            self.bump();
            Some(self.parse_global_value()?)
        } else {
            None
        };
        Ok(Global { ty: id(ty), name: id(name), value })
    }

    fn parse_global_value(&mut self) -> Result<GlobalValue, ParseError> {
        match self.bump() {
            Some((TokenKind::Str, t, _)) => Ok(GlobalValue::Text(unquote(&t))),
            Some((TokenKind::Int, t, _)) => Ok(GlobalValue::Number(parse_int(&t))),
            other => Err(err(format!("expected string or number literal, found {other:?}"))),
        }
    }

    fn parse_view(&mut self) -> Result<View, ParseError> {
        self.expect_ident_text("view")?;
        let name = self.expect_ident()?;
        self.expect_punct("@")?;
        let address = match self.bump() {
            Some((TokenKind::Int, t, _)) => parse_int(&t),
            other => return Err(err(format!("expected address literal after '@', found {other:?}"))),
        };
        Ok(View { name: id(name), address })
    }

    fn parse_stmt(&mut self) -> Result<Stmt, ParseError> {
        if self.at_ident("while") {
            return self.parse_while();
        }
        if self.at_ident("if") {
            return self.parse_if();
        }
        if self.at_ident("return") {
            self.bump();
            let value = self.parse_runtime_value()?;
            self.expect_punct(";")?;
            return Ok(Stmt::Return(value));
        }
        if let Some((TokenKind::Asm, text, _)) = self.peek().cloned() {
            self.bump();
            self.expect_punct(";")?;
            return Ok(Stmt::Asm(text));
        }

        // Either `Type name [= value];` (variable declaration),
        // `name OP= value;` (assignment), or `name(args);` (bare call).
        if matches!(self.peek(), Some((TokenKind::Ident, _, _))) {
            let first = self.expect_ident()?;

            if self.at_punct("(") {
                self.bump();
                let params = self.parse_runtime_value_list(")")?;
                self.expect_punct(")")?;
                self.expect_punct(";")?;
                return Ok(Stmt::FunctionCall(FunctionCallStmt { name: id(first), params }));
            }

            if matches!(self.peek(), Some((TokenKind::AssignOp, _, _))) {
                let (_, op_text, _) = self.bump().unwrap();
                let value = self.parse_runtime_value()?;
                self.expect_punct(";")?;
                let op = match op_text.as_str() {
                    "=" => AssignOp::Set,
                    "+=" => AssignOp::AddAssign,
                    "-=" => AssignOp::SubAssign,
                    "*=" => AssignOp::MulAssign,
                    "/=" => AssignOp::DivAssign,
                    "%=" => AssignOp::ModAssign,
                    other => return Err(err(format!("unknown assignment operator '{other}'"))),
                };
                return Ok(Stmt::Assignment { name: id(first), op, value });
            }

            if matches!(self.peek(), Some((TokenKind::Ident, _, _))) {
                // `Type name [= value];`
                let name = self.expect_ident()?;
                let value = if matches!(self.peek(), Some((TokenKind::AssignOp, t, _)) if t == "=") {
                    self.bump();
                    Some(self.parse_runtime_value()?)
                } else {
                    None
                };
                self.expect_punct(";")?;
                return Ok(Stmt::Variable { ty: id(first), name: id(name), value });
            }
        }

        Err(err(format!("unexpected token '{}' while parsing a statement", self.peek_text())))
    }

    fn parse_while(&mut self) -> Result<Stmt, ParseError> {
        self.expect_ident_text("while")?;
        let condition = self.expect_eval()?;
        self.expect_punct("{")?;
        let mut body = Vec::new();
        while !self.at_punct("}") {
            body.push(self.parse_stmt()?);
        }
        self.expect_punct("}")?;
        Ok(Stmt::While { id: next_node_id(), condition, body })
    }

    fn parse_if(&mut self) -> Result<Stmt, ParseError> {
        self.expect_ident_text("if")?;
        let condition = self.expect_eval()?;
        self.expect_punct("{")?;
        let mut body_if = Vec::new();
        while !self.at_punct("}") {
            body_if.push(self.parse_stmt()?);
        }
        self.expect_punct("}")?;

        let mut body_else = Vec::new();
        if self.at_ident("else") {
            self.bump();
            self.expect_punct("{")?;
            while !self.at_punct("}") {
                body_else.push(self.parse_stmt()?);
            }
            self.expect_punct("}")?;
        }

        Ok(Stmt::If { id: next_node_id(), condition, body_if, body_else })
    }

    fn expect_eval(&mut self) -> Result<String, ParseError> {
        match self.bump() {
            Some((TokenKind::Eval, t, _)) => Ok(t.trim_matches(|c| c == '[' || c == ']').to_string()),
            other => Err(err(format!("expected a bracketed condition, found {other:?}"))),
        }
    }

    fn parse_runtime_value_list(&mut self, terminator: &str) -> Result<Vec<RuntimeValue>, ParseError> {
        let mut out = Vec::new();
        while !self.at_punct(terminator) {
            out.push(self.parse_runtime_value()?);
            if self.at_punct(",") {
                self.bump();
            }
        }
        Ok(out)
    }

    fn parse_runtime_value(&mut self) -> Result<RuntimeValue, ParseError> {
        match self.peek().cloned() {
            Some((TokenKind::Eval, t, _)) => {
                self.bump();
                Ok(RuntimeValue::Eval(t.trim_matches(|c| c == '[' || c == ']').to_string()))
            }
            Some((TokenKind::Int, t, _)) => {
                self.bump();
                Ok(RuntimeValue::Number(parse_int(&t)))
            }
            Some((TokenKind::Ident, t, _)) => {
                self.bump();
                if self.at_punct("(") {
                    self.bump();
                    let params = self.parse_runtime_value_list(")")?;
                    self.expect_punct(")")?;
                    Ok(RuntimeValue::FunctionCall(FunctionCallStmt { name: id(t), params }))
                } else {
                    Ok(RuntimeValue::Variable(id(t)))
                }
            }
            other => Err(err(format!("expected a value, found {other:?}"))),
        }
    }
}

fn unquote(s: &str) -> String {
    let inner = s.strip_prefix('"').and_then(|s| s.strip_suffix('"')).unwrap_or(s);
    inner.replace("\\\"", "\"").replace("\\n", "\n").replace("\\t", "\t").replace("\\\\", "\\")
}

fn parse_int(s: &str) -> i64 {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).unwrap_or(0)
    } else {
        s.parse().unwrap_or(0)
    }
}

pub fn parse(input: &str) -> Result<Program, ParseError> {
    let toks = Lexer::new(input).tokenize().map_err(|e| err(e.to_string()))?;
    let mut parser = Parser { toks, pos: 0 };
    parser.parse_program()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_main() {
        let src = "func word main(word argc, word argp) { return 0; }";
        let prog = parse(src).unwrap();
        assert_eq!(prog.top.len(), 1);
        match &prog.top[0] {
            TopLevel::Function(f) => {
                assert_eq!(f.name.as_str(), "main");
                assert_eq!(f.params.len(), 2);
                assert_eq!(f.body.len(), 1);
            }
            _ => panic!("expected a function"),
        }
    }

    #[test]
    fn parses_global_and_view() {
        let src = r#"global word counter = 5; view leds @0xF000;"#;
        let prog = parse(src).unwrap();
        assert_eq!(prog.top.len(), 2);
        assert!(matches!(prog.top[0], TopLevel::Global(_)));
        assert!(matches!(prog.top[1], TopLevel::View(_)));
    }

    #[test]
    fn parses_if_while_and_assignment() {
        let src = "func void loop() { word i = 0; while [i < 10] { i += 1; if [i == 5] { i = 0; } } }";
        let prog = parse(src).unwrap();
        match &prog.top[0] {
            TopLevel::Function(f) => assert_eq!(f.body.len(), 2),
            _ => panic!("expected a function"),
        }
    }
}
