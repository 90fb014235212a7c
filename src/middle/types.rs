//! The type-system registry and variable/function records (`spec.md` §3).

use crate::common::{Id, Map};

/// A type: `word` (the single built-in, size 1) or a `struct` built from it.
#[derive(Debug, Clone)]
pub struct TypeDef {
    pub name: Id,
    pub size_in_words: usize,
    pub builtin: bool,
    /// Ordered members, as declared.
    pub members: Vec<(Id, Id)>,
}

impl TypeDef {
    pub fn word() -> TypeDef {
        TypeDef {
            name: crate::common::id("word"),
            size_in_words: 1,
            builtin: true,
            members: Vec::new(),
        }
    }
}

pub type TypeMap = Map<Id, TypeDef>;

pub fn builtin_type_map() -> TypeMap {
    let mut m = TypeMap::new();
    let word = TypeDef::word();
    m.insert(word.name, word);
    m
}

/// A function-local or global variable.
#[derive(Debug, Clone)]
pub struct Variable {
    pub name: Id,
    /// Monotonically increasing slot index within the owning scope (locals)
    /// or the absolute data-section address (globals).
    pub order_number: usize,
    pub is_global: bool,
    pub ty: Id,
}

/// A declared function's signature, keyed by its mangled label.
#[derive(Debug, Clone)]
pub struct FuncSig {
    pub name: Id,
    pub label: Id,
    /// Ordered (name, type) pairs.
    pub params: Vec<(Id, Id)>,
    /// `None` for `void`.
    pub return_type: Option<Id>,
}

pub fn func_label(name: &str, arity: usize) -> Id {
    crate::common::id(format!("mscr_function_{name}_params_{arity}"))
}

/// Resolve a (possibly dotted) member-access chain's byte offset and size
/// within `base_type`, e.g. `"s.f1.f2"` against the type of `s`.
///
/// `chain` is expected to be the *full* accessor path including the leading
/// variable name; only the parts after the first `.` are walked.
pub fn member_info(chain: &str, base_type: &TypeDef, types: &TypeMap) -> (usize, usize) {
    let parts: Vec<&str> = chain.split('.').collect();
    if parts.len() <= 1 {
        return (0, base_type.size_in_words);
    }

    let mut offset = 0usize;
    let mut ty = base_type;
    for part in &parts[1..] {
        let mut found = false;
        for (mname, mtype) in &ty.members {
            if mname.as_str() == *part {
                ty = types.get(mtype).expect("member type must be registered");
                found = true;
                break;
            } else {
                offset += types.get(mtype).map(|t| t.size_in_words).unwrap_or(1);
            }
        }
        if !found {
            panic!(
                "ERROR: Type '{}' does not contain a member called '{}'",
                ty.name, part
            );
        }
    }

    (offset, ty.size_in_words)
}

/// True iff `accessor` (within `base_type`) resolves to a single word; only
/// words (or aliases thereof via member access) may be checked into
/// registers.
pub fn type_is_word(base_type: &TypeDef, accessor: &str, types: &TypeMap) -> bool {
    member_info(accessor, base_type, types).1 == 1
}
