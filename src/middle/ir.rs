//! The meta-assembly IR: instructions and operands (`spec.md` §3, §4.1).

use std::sync::atomic::{AtomicU64, Ordering};

use crate::common::Id;

/// Real MCPC mnemonics, `spec.md` §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum Mnemonic {
    SETREG,
    MOV,
    ADD,
    SUB,
    MUL,
    AND,
    OR,
    XOR,
    NEG,
    COM,
    EQ,
    NEQ,
    GT,
    LT,
    GTOE,
    LTOE,
    SHFL,
    SHFR,
    PUSH,
    POP,
    LOAD,
    STOR,
    CALL,
    RET,
    JMP,
    JMPEZ,
    JMPNZ,
    FAULT,
    INC,
    HALT,
    SET,
}

/// The meta-ops, which never appear in the emitted text output — the
/// resolver consumes them entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum MetaOp {
    #[display("__CLEARSCOPE")]
    ClearScope,
    #[display("__ASSUMESCOPE")]
    AssumeScope,
    #[display("__FORCESCOPE")]
    ForceScope,
    #[display("__FLUSHSCOPE")]
    FlushScope,
    #[display("__FLUSHGLOBALS")]
    FlushGlobals,
    #[display("__SET_DIRECT")]
    SetDirect,
}

/// The operation an instruction performs: a real mnemonic, a meta-op, or a
/// label definition (`.name __LABEL_SET` in the original's string encoding;
/// kept as its own variant here instead of embedding it in `op`, per
/// REDESIGN FLAGS on tagged variants over ad hoc string tagging).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Real(Mnemonic),
    Meta(MetaOp),
    Label(Id),
}

impl std::fmt::Display for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Op::Real(m) => write!(f, "{m}"),
            Op::Meta(m) => write!(f, "{m}"),
            Op::Label(name) => write!(f, ".{name} __LABEL_SET"),
        }
    }
}

/// An operand, in one of the nine symbolic kinds from `spec.md` §3, or
/// fully resolved (`Raw`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    /// A literal register name, immediate, or label — the only kind the
    /// emitter accepts.
    Raw(String),
    VarRead(Id),
    VarWrite(Id),
    VarAddr(Id),
    GlobalRead(Id),
    GlobalWrite(Id),
    GlobalAddr(Id),
    StringRead(Id),
    StringAddr(Id),
    /// An arbitrary textual expression to be lowered by the calc expander.
    Calc(String),
    /// Evaluates to the heap-slot count of a named function's locals.
    ScopeVarCount(Id),
}

impl Operand {
    pub fn is_raw(&self) -> bool {
        matches!(self, Operand::Raw(_))
    }

    pub fn raw(text: impl Into<String>) -> Operand {
        Operand::Raw(text.into())
    }

    /// The raw text, if this operand is already resolved; panics otherwise
    /// (callers are expected to have checked `is_raw` first — this mirrors
    /// the original's `asmString` unconverted-param panic).
    pub fn raw_text(&self) -> &str {
        match self {
            Operand::Raw(s) => s,
            other => panic!("ERROR: Unconverted operand found ({other:?}). How did you get here?"),
        }
    }
}

/// Annotation data carried by `AssumeScope`/`ForceScope`/`SetDirect` meta-ops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeAnnotation {
    pub name: Id,
    /// Register index 0..4 (only meaningful for AssumeScope/ForceScope).
    pub register: usize,
}

static NEXT_INSN_ID: AtomicU64 = AtomicU64::new(1);

/// One meta-assembly instruction.
#[derive(Debug, Clone)]
pub struct Insn {
    /// Stable identity used by the fixpoint resolver's progress guard —
    /// replaces the original's pointer-identity comparison, which does not
    /// translate to a value-oriented IR (REDESIGN FLAGS).
    pub id: u64,
    pub op: Op,
    pub operands: Vec<Operand>,
    /// The enclosing function name ("" for top-level/init instructions).
    pub scope: Id,
    pub meta: Option<ScopeAnnotation>,
    pub comment: String,
    pub indent: i32,
}

impl Insn {
    pub fn new(op: Op, operands: Vec<Operand>) -> Insn {
        Insn {
            id: NEXT_INSN_ID.fetch_add(1, Ordering::Relaxed),
            op,
            operands,
            scope: crate::common::id(""),
            meta: None,
            comment: String::new(),
            indent: 0,
        }
    }

    pub fn real(m: Mnemonic, operands: Vec<Operand>) -> Insn {
        Insn::new(Op::Real(m), operands)
    }

    pub fn meta_op(m: MetaOp) -> Insn {
        Insn::new(Op::Meta(m), Vec::new())
    }

    pub fn label(name: Id) -> Insn {
        Insn::new(Op::Label(name), Vec::new())
    }

    pub fn with_scope(mut self, scope: Id) -> Insn {
        self.scope = scope;
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Insn {
        self.comment = comment.into();
        self
    }

    pub fn annotated(mut self, name: Id, register: usize) -> Insn {
        self.meta = Some(ScopeAnnotation { name, register });
        self
    }

    pub fn is_meta(&self) -> bool {
        matches!(self.op, Op::Meta(_))
    }
}

/// True iff every operand of every instruction is [`Operand::Raw`] — the
/// emitter's precondition.
pub fn is_resolved(insns: &[Insn]) -> bool {
    insns.iter().all(|cmd| cmd.operands.iter().all(Operand::is_raw))
}
