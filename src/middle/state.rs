//! Process-wide (well, compilation-wide) mutable state (`spec.md` §3
//! `asmTransformState`), threaded explicitly through lowering and resolving
//! rather than held behind a module-level global (REDESIGN FLAGS).

use crate::common::{id, Id, Map};
use crate::middle::ir::{Insn, Operand};
use crate::middle::types::{builtin_type_map, FuncSig, TypeMap, Variable};

/// Data-section addresses below this value are reserved (the original's
/// `maxDataAddr` starts at 3 to leave room for the stack-pointer and
/// var-heap-pointer bootstrap constants written by `initializationAsm`).
pub const DATA_SECTION_RESERVED: usize = 3;

#[derive(Default)]
pub struct CompileState {
    pub current_function: Id,
    pub current_scope_variable_count: usize,

    pub function_table: Vec<FuncSig>,
    /// Functions declared `void`, tracked separately so lowering's
    /// post-order visit of `Function` can decide whether to append the
    /// implicit trailing return.
    pub void_functions: std::collections::BTreeSet<Id>,

    pub type_map: TypeMap,

    pub global_memory_map: Map<Id, usize>,
    pub string_map: Map<Id, usize>,
    pub max_data_addr: usize,

    pub variable_map: Map<Id, Vec<Variable>>,

    pub bin_data: Vec<u16>,
    pub specific_initialization_asm: Vec<Insn>,

    /// accessor string -> register index 0..ASSIGNABLE_REGISTERS
    pub scope_register_assignment: Map<Id, usize>,
    /// register index -> dirty
    pub scope_register_dirty: Map<usize, bool>,
    /// accessor string -> "must always reload/store through memory"
    pub scope_variable_direct_marks: Map<Id, bool>,

    pub print_indent: i32,
    pub verbose: bool,
}

impl CompileState {
    pub fn new(verbose: bool) -> CompileState {
        CompileState {
            current_function: id(""),
            type_map: builtin_type_map(),
            max_data_addr: DATA_SECTION_RESERVED,
            verbose,
            ..Default::default()
        }
    }

    pub fn global_key(name: &str) -> Id {
        id(format!("global_{name}"))
    }

    /// Reset the register-allocator caches — the `__CLEARSCOPE` effect.
    pub fn clear_scope(&mut self) {
        self.scope_register_assignment.clear();
        self.scope_register_dirty.clear();
        self.scope_variable_direct_marks.clear();
    }

    /// Look up a (possibly dotted) variable accessor among `scope`'s local
    /// variables only — no fallback to globals. Used wherever the original
    /// restricts an operation to function-local variables (e.g.
    /// `_reg_assign`/`__FORCESCOPE`, `spec.md` §6).
    pub fn local_var(&self, name: &str, scope: &str) -> Option<(Variable, usize)> {
        let head = name.split('.').next().unwrap_or(name);
        let vars = self.variable_map.get(&id(scope))?;
        let v = vars.iter().find(|v| v.name.as_str() == head)?;
        let offset = if name.contains('.') {
            let base_ty = self
                .type_map
                .get(&v.ty)
                .unwrap_or_else(|| panic!("ERROR: unknown type for variable '{name}'"));
            crate::middle::types::member_info(name, base_ty, &self.type_map).0
        } else {
            0
        };
        Some((v.clone(), offset))
    }

    /// Look up a (possibly dotted) variable accessor within `scope`,
    /// returning the backing [`Variable`] record and the member offset.
    /// Falls back to a global lookup if no local variable matches the
    /// leading path segment.
    pub fn get_var(&self, name: &str, scope: &str) -> (Variable, usize) {
        if let Some(result) = self.local_var(name, scope) {
            return result;
        }

        if name.contains('.') {
            panic!("FIXME: Typed globals currently not supported");
        }

        if let Some(&addr) = self.global_memory_map.get(&Self::global_key(name)) {
            return (
                Variable {
                    name: id(name),
                    order_number: addr,
                    is_global: true,
                    ty: id("word"),
                },
                0,
            );
        }

        panic!("ERROR: Invalid variable name in resolve: {name} (scope: {scope})");
    }

    pub fn scope_var_count(&self, scope: &Id) -> usize {
        self.variable_map
            .get(scope)
            .map(|vars| {
                vars.iter()
                    .map(|v| {
                        self.type_map
                            .get(&v.ty)
                            .map(|t| t.size_in_words)
                            .unwrap_or(1)
                    })
                    .sum()
            })
            .unwrap_or(0)
    }

    /// Register a new local variable in the current function's scope,
    /// advancing `orderNumber` by the type's size. Fatal (panics) on
    /// redefinition within the same scope.
    pub fn add_variable(&mut self, name: &str, ty_name: &str) {
        let ty = self
            .type_map
            .get(&id(ty_name))
            .unwrap_or_else(|| panic!("ERROR: Invalid type '{ty_name}' given to variable '{name}' (scope: {})", self.current_function))
            .clone();

        let scope = self.current_function;
        let entry = self.variable_map.entry(scope).or_default();

        if entry.iter().any(|v| v.name.as_str() == name) {
            panic!(
                "ERROR: Redefinition of variable '{name}' in scope '{}'",
                self.current_function
            );
        }

        let order_number = entry
            .iter()
            .map(|v| v.order_number + ty.size_in_words)
            .max()
            .unwrap_or(0);

        entry.push(Variable {
            name: id(name),
            order_number,
            is_global: false,
            ty: ty.name,
        });

        self.current_scope_variable_count += 1;
    }

    pub fn name_for_register(&self, reg: usize) -> Option<Id> {
        self.scope_register_assignment
            .iter()
            .find(|(_, &r)| r == reg)
            .map(|(name, _)| *name)
    }
}

/// Rewrites every `VarRead`/`VarAddr` operand whose name matches a known
/// global or string into the corresponding `Global*`/`String*` operand, and
/// every `VarWrite` matching a global into `GlobalWrite`. Writing to a
/// string is fatal.
pub fn fix_global_and_string_param_types(insn: &mut Insn, state: &CompileState) {
    for p in &mut insn.operands {
        match p {
            Operand::VarRead(name) => {
                let key = CompileState::global_key(name);
                if let Some(&_addr) = state.global_memory_map.get(&key) {
                    *p = Operand::GlobalRead(*name);
                } else if state.string_map.contains_key(&key) {
                    *p = Operand::StringRead(*name);
                }
            }
            Operand::VarAddr(name) => {
                let key = CompileState::global_key(name);
                if state.global_memory_map.contains_key(&key) {
                    *p = Operand::GlobalAddr(*name);
                } else if state.string_map.contains_key(&key) {
                    *p = Operand::StringAddr(*name);
                }
            }
            Operand::VarWrite(name) => {
                let key = CompileState::global_key(name);
                if state.global_memory_map.contains_key(&key) {
                    *p = Operand::GlobalWrite(*name);
                } else if state.string_map.contains_key(&key) {
                    panic!("ERROR: Cannot write to a string variable: '{name}'");
                }
            }
            _ => {}
        }
    }
}
