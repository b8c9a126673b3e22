pub mod analysis;
pub mod context;
pub mod diags;
pub mod error;
pub mod ir;
pub mod lexer;
pub mod module_loader;
pub mod parser;
pub mod position;
pub mod rp;
pub mod settings;
pub mod symbol_table;

pub use error::CompilerError;
pub use settings::{ProgramKind, Settings};

use context::Context;
use diags::{DiagnosticCollector, ErrorSink};
use error::Result;
use ir::Program;
use module_loader::ModuleLoader;
use parser::Parser;

/// Compiles source text of one program kind, from parsing through
/// raster-pipeline code generation.
pub struct Compiler {
    kind: ProgramKind,
    settings: Settings,
}

impl Default for Compiler {
    fn default() -> Self {
        Compiler::new(ProgramKind::RuntimeShader, Settings::default())
    }
}

impl Compiler {
    pub fn new(kind: ProgramKind, settings: Settings) -> Self {
        Compiler { kind, settings }
    }

    pub fn kind(&self) -> ProgramKind {
        self.kind
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Parses and type-checks a program against the built-in module for its
    /// kind. Every reported error comes back in `CompilerError::Diagnostics`.
    pub fn parse(&self, source: &str) -> Result<Program> {
        let module = ModuleLoader::get().module_for_program_kind(self.kind)?;
        let mut collector = DiagnosticCollector::new();
        let program = {
            let ctx = Context::new(
                self.kind,
                self.settings.clone(),
                Some(module),
                false,
                ErrorSink::new(&mut collector),
            );
            Parser::new(source, ctx).program()
        };
        match program {
            Some(program) => {
                log::debug!(
                    "parsed {} program ({} elements)",
                    self.kind.name(),
                    program.elements.len()
                );
                Ok(program)
            }
            None => {
                let diagnostics = collector.take();
                log::debug!("parse failed with {} error(s)", diagnostics.len());
                Err(CompilerError::Diagnostics(diagnostics))
            }
        }
    }

    /// Type-check only (no code generation).
    pub fn check_only(&self, source: &str) -> Result<()> {
        self.parse(source).map(|_| ())
    }

    /// Compiles to a raster-pipeline program.
    pub fn compile(&self, source: &str) -> Result<rp::Program> {
        let program = self.parse(source)?;
        rp::codegen::generate(&program)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_only_accepts_valid_shader() {
        let compiler = Compiler::default();
        assert!(compiler
            .check_only("half4 main(float2 p) { return half4(p.x, p.y, 0, 1); }")
            .is_ok());
    }

    #[test]
    fn test_parse_errors_are_collected() {
        let compiler = Compiler::default();
        match compiler.check_only("half4 main(float2 p) { return undefined_thing; }") {
            Err(CompilerError::Diagnostics(diags)) => {
                assert_eq!(diags.len(), 1);
                assert!(diags[0].message.contains("undefined_thing"), "{}", diags[0].message);
            }
            other => panic!("expected diagnostics, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_compile_produces_stages() {
        let compiler = Compiler::default();
        let program = compiler
            .compile("half4 main(float2 p) { return half4(p.x, p.y, 0, 1); }")
            .expect("compile");
        assert!(program.dump().contains("load_src"));
    }
}
