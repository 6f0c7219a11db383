//! # Cinder
//!
//! A small scripting language with a bytecode compiler and a stack VM that
//! can be paused, single-stepped and called into from Rust.
//!
//! ```no_run
//! use cinder::{HostValue, Vm};
//!
//! let mut vm = Vm::compile("function twice(n) { return n * 2; }")?;
//! vm.run()?;
//! assert_eq!(vm.call("twice", &[HostValue::from(4)])?, HostValue::from(8));
//! # Ok::<(), cinder::Error>(())
//! ```

pub mod bytecode;
pub mod frontend;
pub mod lang;
pub mod runtime;

pub use bytecode::{CompileError, Compiler, Program, VerifyError};
pub use frontend::{LexerError, ParserError};
pub use lang::value::{HostValue, Value};
pub use runtime::{RunMode, RuntimeError, Vm, VmConfig};

/// Any failure between source text and a finished run.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("lexer error: {0}")]
    Lexer(#[from] LexerError),

    #[error("parser error: {0}")]
    Parser(#[from] ParserError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// Scans, parses and compiles `source` into a program.
pub fn compile_source(source: &str) -> Result<Program, Error> {
    let tokens = frontend::tokenize(source)?;
    let statements = frontend::Parser::new(tokens.clone()).parse()?;
    let program = Compiler::new().compile(&statements, tokens, source)?;
    Ok(program)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errors_carry_their_stage() {
        let err = compile_source("var = 1;").unwrap_err();
        assert!(matches!(err, Error::Parser(_)));
        assert!(err.to_string().starts_with("parser error: 1:"));

        let err = compile_source("var s = \"open").unwrap_err();
        assert!(matches!(err, Error::Lexer(_)));

        let err = compile_source("break;").unwrap_err();
        assert!(matches!(err, Error::Compile(_)));
        let message = err.to_string();
        assert!(message.starts_with("compile error: "), "{}", message);
        assert_eq!(message.matches("compile error").count(), 1, "{}", message);
    }

    #[test]
    fn test_end_to_end() {
        let mut vm = Vm::compile("function twice(n) { return n * 2; }").unwrap();
        assert_eq!(vm.run().unwrap(), RunMode::Done);
        assert_eq!(vm.call("twice", &[HostValue::from(4)]).unwrap(), HostValue::from(8));
    }

    #[test]
    fn test_runtime_error_converts() {
        let mut vm = Vm::compile("throw \"late\";").unwrap();
        let err: Error = vm.run().unwrap_err().into();
        assert!(err.to_string().contains("uncaught exception: late"));
    }
}
