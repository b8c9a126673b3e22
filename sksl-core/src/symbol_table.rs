//! Scope-chained symbol table.
//!
//! A table holds a stack of lexical scopes and an optional parent table. Built-in
//! modules publish their tables as `Arc<SymbolTable>` and programs chain onto
//! them; a table marked `builtin` is never mutated once shared.

use crate::ir::function::FunctionDeclaration;
use crate::ir::types::TypeRef;
use crate::ir::variable::Variable;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub enum Symbol {
    Variable(Arc<Variable>),
    Type(TypeRef),
    /// Every overload visible under one name, innermost first.
    Functions(Vec<Arc<FunctionDeclaration>>),
    /// A member of an anonymous interface block, visible as a global.
    Field { owner: Arc<Variable>, field_index: usize },
}

#[derive(Debug, Default)]
struct Scope {
    symbols: HashMap<String, Symbol>,
}

#[derive(Debug)]
pub struct SymbolTable {
    scopes: Vec<Scope>,
    parent: Option<Arc<SymbolTable>>,
    builtin: bool,
}

impl SymbolTable {
    /// Creates a table with a single (global) scope.
    pub fn new(parent: Option<Arc<SymbolTable>>, builtin: bool) -> Self {
        SymbolTable {
            scopes: vec![Scope::default()],
            parent,
            builtin,
        }
    }

    pub fn is_builtin(&self) -> bool {
        self.builtin
    }

    pub fn parent(&self) -> Option<&Arc<SymbolTable>> {
        self.parent.as_ref()
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(Scope::default());
    }

    /// Pops the innermost scope. The global scope is never popped.
    pub fn pop_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    /// Current scope depth; 0 is the global scope.
    pub fn depth(&self) -> usize {
        self.scopes.len() - 1
    }

    pub fn is_defined_in_current_scope(&self, name: &str) -> bool {
        self.scopes
            .last()
            .map(|scope| scope.symbols.contains_key(name))
            .unwrap_or(false)
    }

    /// Adds a symbol to the innermost scope. Fails if the name is already
    /// taken in that scope.
    pub fn insert(&mut self, name: &str, symbol: Symbol) -> Result<(), String> {
        if self.is_defined_in_current_scope(name) {
            return Err(format!("symbol '{}' was already defined", name));
        }
        if let Some(scope) = self.scopes.last_mut() {
            scope.symbols.insert(name.to_string(), symbol);
        }
        Ok(())
    }

    /// Adds a function overload. Overloads from outer scopes and parent tables
    /// stay visible alongside the new one.
    pub fn insert_function(&mut self, decl: Arc<FunctionDeclaration>) -> Result<(), String> {
        let name = decl.name.clone();
        let mut overloads = match self.lookup(&name) {
            Some(Symbol::Functions(existing)) => existing,
            Some(_) if self.is_defined_in_current_scope(&name) => {
                return Err(format!("symbol '{}' was already defined", name));
            }
            _ => Vec::new(),
        };
        overloads.insert(0, decl);
        if let Some(scope) = self.scopes.last_mut() {
            scope.symbols.insert(name, Symbol::Functions(overloads));
        }
        Ok(())
    }

    /// Replaces a prototype with its definition's declaration.
    pub fn replace_function(&mut self, old: &Arc<FunctionDeclaration>, new: Arc<FunctionDeclaration>) {
        for scope in self.scopes.iter_mut().rev() {
            if let Some(Symbol::Functions(overloads)) = scope.symbols.get_mut(&new.name) {
                for slot in overloads.iter_mut() {
                    if slot.id == old.id {
                        *slot = new;
                        return;
                    }
                }
            }
        }
    }

    /// Looks up a name, searching from the innermost scope outward and then
    /// through the parent chain. Nearest scope wins.
    pub fn lookup(&self, name: &str) -> Option<Symbol> {
        for scope in self.scopes.iter().rev() {
            if let Some(symbol) = scope.symbols.get(name) {
                return Some(symbol.clone());
            }
        }
        self.parent.as_ref().and_then(|p| p.lookup(name))
    }

    pub fn lookup_type(&self, name: &str) -> Option<TypeRef> {
        match self.lookup(name) {
            Some(Symbol::Type(ty)) => Some(ty),
            _ => None,
        }
    }

    pub fn is_type(&self, name: &str) -> bool {
        self.lookup_type(name).is_some()
    }

    /// Every symbol defined directly in this table's global scope.
    pub fn global_symbols(&self) -> impl Iterator<Item = (&String, &Symbol)> {
        self.scopes.iter().take(1).flat_map(|scope| scope.symbols.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::modifiers::Modifiers;
    use crate::ir::types::builtin_types;
    use crate::ir::variable::VariableStorage;
    use crate::position::Position;

    fn var(name: &str) -> Arc<Variable> {
        Variable::new(
            name,
            builtin_types().float.clone(),
            Modifiers::default(),
            VariableStorage::Local,
            Position::default(),
            false,
        )
    }

    fn var_id(symbol: Option<Symbol>) -> Option<u32> {
        match symbol {
            Some(Symbol::Variable(v)) => Some(v.id),
            _ => None,
        }
    }

    #[test]
    fn test_shadowing_and_pop() {
        let mut table = SymbolTable::new(None, false);
        let outer = var("x");
        let inner = var("x");
        table.insert("x", Symbol::Variable(outer.clone())).unwrap();
        table.push_scope();
        table.insert("x", Symbol::Variable(inner.clone())).unwrap();
        assert_eq!(var_id(table.lookup("x")), Some(inner.id));
        table.pop_scope();
        assert_eq!(var_id(table.lookup("x")), Some(outer.id));
    }

    #[test]
    fn test_duplicate_in_same_scope() {
        let mut table = SymbolTable::new(None, false);
        table.insert("x", Symbol::Variable(var("x"))).unwrap();
        let err = table.insert("x", Symbol::Variable(var("x"))).unwrap_err();
        assert_eq!(err, "symbol 'x' was already defined");
    }

    #[test]
    fn test_parent_chain() {
        let mut root = SymbolTable::new(None, true);
        root.insert("float", Symbol::Type(builtin_types().float.clone())).unwrap();
        let root = Arc::new(root);
        let mut child = SymbolTable::new(Some(root), false);
        assert!(child.is_type("float"));
        child.insert("float", Symbol::Variable(var("float"))).unwrap();
        assert!(!child.is_type("float"));
        assert!(child.parent().map(|p| p.is_builtin()).unwrap_or(false));
    }
}
