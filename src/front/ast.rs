//! The abstract syntax tree for M-Script.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::common::Id;

#[derive(Debug)]
pub struct Program {
    pub top: Vec<TopLevel>,
}

#[derive(Debug)]
pub enum TopLevel {
    Function(Function),
    Struct(StructDef),
    Global(Global),
    View(View),
}

#[derive(Debug)]
pub struct Function {
    pub inline: bool,
    pub return_type: Id,
    pub name: Id,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub ty: Id,
    pub name: Id,
}

#[derive(Debug)]
pub struct StructDef {
    pub name: Id,
    pub members: Vec<Param>,
}

#[derive(Debug)]
pub struct Global {
    pub ty: Id,
    pub name: Id,
    pub value: Option<GlobalValue>,
}

#[derive(Debug)]
pub enum GlobalValue {
    Text(String),
    Number(i64),
}

#[derive(Debug)]
pub struct View {
    pub name: Id,
    pub address: i64,
}

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// A unique id minted per `if`/`while` node, used to synthesize globally
/// unique labels for their start/else/end points — the original keys these
/// off lexer source position (file/line/column/offset); any value that is
/// stable and unique per node serves the same purpose.
pub fn next_node_id() -> u64 {
    NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug)]
pub enum Stmt {
    Assignment {
        name: Id,
        op: AssignOp,
        value: RuntimeValue,
    },
    FunctionCall(FunctionCallStmt),
    Variable {
        ty: Id,
        name: Id,
        value: Option<RuntimeValue>,
    },
    Return(RuntimeValue),
    While {
        id: u64,
        condition: String,
        body: Vec<Stmt>,
    },
    If {
        id: u64,
        condition: String,
        body_if: Vec<Stmt>,
        body_else: Vec<Stmt>,
    },
    Asm(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Set,
    AddAssign,
    SubAssign,
    MulAssign,
    DivAssign,
    ModAssign,
}

impl AssignOp {
    /// The calc operator symbol used to build a `[name OP (value)]`
    /// compound-assignment calc string, or `None` for plain `=`.
    pub fn calc_symbol(self) -> Option<&'static str> {
        match self {
            AssignOp::Set => None,
            AssignOp::AddAssign => Some("+"),
            AssignOp::SubAssign => Some("-"),
            AssignOp::MulAssign => Some("*"),
            AssignOp::DivAssign => Some("/"),
            AssignOp::ModAssign => Some("%"),
        }
    }
}

#[derive(Debug)]
pub struct FunctionCallStmt {
    pub name: Id,
    pub params: Vec<RuntimeValue>,
}

#[derive(Debug)]
pub enum RuntimeValue {
    FunctionCall(FunctionCallStmt),
    Eval(String),
    Number(i64),
    Variable(Id),
}
