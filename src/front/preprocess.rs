//! The external GPP-style preprocessor (`spec.md` §6), modeled as a trait so
//! the driver can fall back to a no-op when `gpp` isn't on `PATH` instead of
//! failing outright — comment stripping and char-literal handling happen in
//! the lexer regardless, so plain programs still compile without it.

use std::process::Command;

use crate::error::{CompileError, Result};

pub trait Preprocessor {
    fn preprocess(&self, source: &str) -> Result<String>;
}

/// Shells out to a `gpp` binary discovered on `PATH`.
pub struct GppPreprocessor {
    pub program: String,
}

impl Default for GppPreprocessor {
    fn default() -> Self {
        GppPreprocessor { program: "gpp".to_string() }
    }
}

impl Preprocessor for GppPreprocessor {
    fn preprocess(&self, source: &str) -> Result<String> {
        use std::io::Write;

        let mut child = Command::new(&self.program)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| CompileError::Subprocess { program: self.program.clone(), detail: e.to_string() })?;

        child
            .stdin
            .take()
            .expect("ERROR: gpp child process has no stdin pipe")
            .write_all(source.as_bytes())
            .map_err(|e| CompileError::Subprocess { program: self.program.clone(), detail: e.to_string() })?;

        let output = child
            .wait_with_output()
            .map_err(|e| CompileError::Subprocess { program: self.program.clone(), detail: e.to_string() })?;

        if !output.status.success() {
            return Err(CompileError::Subprocess {
                program: self.program.clone(),
                detail: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Passes the source through unchanged, used when `gpp` isn't available.
pub struct NoOpPreprocessor;

impl Preprocessor for NoOpPreprocessor {
    fn preprocess(&self, source: &str) -> Result<String> {
        Ok(source.to_string())
    }
}

/// `GppPreprocessor` if `gpp` is on `PATH`, else `NoOpPreprocessor`.
pub fn default_preprocessor() -> Box<dyn Preprocessor> {
    let found = std::env::var_os("PATH")
        .map(|path| std::env::split_paths(&path).any(|dir| dir.join("gpp").is_file()))
        .unwrap_or(false);

    if found {
        Box::new(GppPreprocessor::default())
    } else {
        log::warn!("gpp not found on PATH, preprocessing directives will not be expanded");
        Box::new(NoOpPreprocessor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_preprocessor_passes_through() {
        let pp = NoOpPreprocessor;
        assert_eq!(pp.preprocess("func word main() {}").unwrap(), "func word main() {}");
    }
}
