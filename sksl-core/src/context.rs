//! Compilation session state threaded through parsing and IR conversion.

use crate::diags::ErrorSink;
use crate::ir::function::FunctionDeclaration;
use crate::ir::program::{Module, ProgramElement};
use crate::ir::types::{builtin_types, BuiltinTypes};
use crate::position::Position;
use crate::settings::{ProgramKind, Settings};
use crate::symbol_table::SymbolTable;
use std::sync::Arc;

pub struct Context<'a> {
    pub kind: ProgramKind,
    pub settings: Settings,
    pub symbols: SymbolTable,
    pub errors: ErrorSink<'a>,
    /// True while compiling a built-in module.
    pub is_builtin: bool,
    /// The module the program or module under construction inherits from.
    pub module: Option<Arc<Module>>,
    pub current_function: Option<Arc<FunctionDeclaration>>,
    pub elements: Vec<ProgramElement>,
    loop_depth: usize,
    switch_depth: usize,
}

impl<'a> Context<'a> {
    pub fn new(
        kind: ProgramKind,
        settings: Settings,
        module: Option<Arc<Module>>,
        is_builtin: bool,
        errors: ErrorSink<'a>,
    ) -> Self {
        let parent = module.as_ref().map(|m| m.symbols.clone());
        Context {
            kind,
            settings,
            symbols: SymbolTable::new(parent, is_builtin),
            errors,
            is_builtin,
            module,
            current_function: None,
            elements: Vec::new(),
            loop_depth: 0,
            switch_depth: 0,
        }
    }

    pub fn types(&self) -> &'static BuiltinTypes {
        builtin_types()
    }

    pub fn error(&mut self, position: Position, message: impl Into<String>) {
        self.errors.error(position, message);
    }

    /// ES2 rules apply to loops, indexing and array usage.
    pub fn strict_es2(&self) -> bool {
        self.settings.enforce_es2_restrictions || self.kind.is_es2()
    }

    pub fn enter_loop(&mut self) {
        self.loop_depth += 1;
    }

    pub fn exit_loop(&mut self) {
        self.loop_depth = self.loop_depth.saturating_sub(1);
    }

    pub fn enter_switch(&mut self) {
        self.switch_depth += 1;
    }

    pub fn exit_switch(&mut self) {
        self.switch_depth = self.switch_depth.saturating_sub(1);
    }

    pub fn in_loop(&self) -> bool {
        self.loop_depth > 0
    }

    pub fn can_break(&self) -> bool {
        self.loop_depth > 0 || self.switch_depth > 0
    }
}
