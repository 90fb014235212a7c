//! The driver (C8, `spec.md` §4.8): sequences preprocess -> parse -> lower
//! -> resolve -> optimize -> emit.

use crate::back::{emit, optimize};
use crate::error::{CompileError, Result};
use crate::front::{self, Preprocessor};
use crate::middle::ir::is_resolved;
use crate::middle::{lower, resolver};

pub struct CompileOptions {
    pub bootloader: bool,
    pub optimize: bool,
    pub verbose: bool,
}

#[derive(Debug)]
pub struct CompileOutput {
    pub asm: String,
    pub warnings: Vec<String>,
}

pub fn compile(source: &str, preprocessor: &dyn Preprocessor, options: &CompileOptions) -> Result<CompileOutput> {
    log::info!("preprocessing");
    let preprocessed = preprocessor.preprocess(source)?;

    log::info!("parsing");
    let program = front::parse(&preprocessed).map_err(|e| CompileError::Syntax(format!("{e:?}")))?;

    log::info!("validating and lowering");
    let mut state = lower::validate(&program, options.verbose)?;
    let insns = lower::lower(&program, options.bootloader, &mut state);

    log::info!("resolving ({} instructions before fixpoint)", insns.len());
    let resolved = resolver::resolve(insns, &mut state)?;
    assert!(is_resolved(&resolved), "ERROR: resolver returned an unresolved instruction stream");

    let resolved = if options.optimize {
        log::info!("optimizing");
        optimize::optimize(resolved)
    } else {
        resolved
    };

    log::info!("emitting");
    let result = emit::emit(&resolved, &state, options.bootloader);
    for warning in &result.warnings {
        log::warn!("{warning}");
    }

    Ok(CompileOutput { asm: result.asm, warnings: result.warnings })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::front::NoOpPreprocessor;

    fn options() -> CompileOptions {
        CompileOptions { bootloader: false, optimize: true, verbose: false }
    }

    #[test]
    fn compiles_a_trivial_program() {
        let source = "func word main(word a, word b) {\n  return [1 + 2 * 3];\n}\n";
        let out = compile(source, &NoOpPreprocessor, &options()).unwrap();
        assert!(out.asm.contains(".mscr_init_main"));
        assert!(out.asm.contains(".mscr_code_end"));
    }

    #[test]
    fn missing_main_is_a_compile_error() {
        let source = "func word notmain(word a, word b) {\n  return [1];\n}\n";
        let err = compile(source, &NoOpPreprocessor, &options()).unwrap_err();
        assert_eq!(err.kind(), crate::error::CompileErrorKindHint::MissingEntryPoint);
    }
}
