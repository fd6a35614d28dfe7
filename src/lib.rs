//! initsafe: initialization safety checking for class hierarchies
//!
//! Proves, without running the program, that no constructor path reads a
//! field before it is assigned and that no partially constructed object
//! escapes into code that treats it as fully initialized:
//! - Virtual calls from a base constructor into overriding subclass code
//! - Closures over `this` that escape while construction is in progress
//! - Inner objects reading their outer object's fields too early
//!
//! # Architecture
//!
//! ```text
//! Source → Lexer → Parser → AST → ClassTable → InitChecker → ClassReport
//! ```
//!
//! # Example
//!
//! ```text
//! class Base {
//!     val size = compute()
//!     def compute(): Int = 1
//! }
//!
//! class Derived extends Base {
//!     val factor = 2
//!     override def compute(): Int = factor * 2   // reads `factor` too early
//! }
//! ```

pub mod ast;
pub mod common;
pub mod config;
pub mod diagnostics;
pub mod init;
pub mod lexer;
pub mod parser;

// Re-export diagnostics for convenience
pub use diagnostics::{CompileError, Reporter, SourceFile};

// Re-exports for convenience
pub use ast::Program;
pub use config::CheckerConfig;
pub use init::{ClassReport, Effect, ProgramReport};

/// Checker version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Parse source code to AST
pub fn parse(source: &str) -> miette::Result<Program> {
    let tokens = lexer::lex(source)?;
    parser::parse(&tokens, source)
}

/// Check every class in `source` with the default configuration
pub fn check(source: &str) -> miette::Result<ProgramReport> {
    check_with(source, &CheckerConfig::default())
}

/// Check every class in `source` selected by `config`
pub fn check_with(source: &str, config: &CheckerConfig) -> miette::Result<ProgramReport> {
    let program = parse(source)?;
    Ok(init::check_program(&program, config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_check_clean_source() {
        let report = check("final class Point(x: Int, y: Int) { val sum = x + y }").unwrap();
        assert!(report.is_clean());
    }
}
