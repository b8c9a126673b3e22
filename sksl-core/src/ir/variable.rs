use super::expr::Expression;
use super::modifiers::Modifiers;
use super::types::TypeRef;
use crate::position::Position;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};

static NEXT_SYMBOL_ID: AtomicU32 = AtomicU32::new(1);

/// Process-unique identity for variables and function declarations, so that
/// symbols from shared built-in modules never collide with program symbols.
pub fn next_symbol_id() -> u32 {
    NEXT_SYMBOL_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariableStorage {
    Global,
    InterfaceBlock,
    Local,
    Parameter,
}

/// A named storage location. Expressions refer to it through `Arc`, never by copy.
#[derive(Debug)]
pub struct Variable {
    pub id: u32,
    pub name: String,
    pub ty: TypeRef,
    pub modifiers: Modifiers,
    pub storage: VariableStorage,
    pub position: Position,
    pub builtin: bool,
    /// Initializer of a `const` variable, recorded once when its declaration is converted.
    pub const_value: OnceLock<Expression>,
}

impl Variable {
    pub fn new(
        name: impl Into<String>,
        ty: TypeRef,
        modifiers: Modifiers,
        storage: VariableStorage,
        position: Position,
        builtin: bool,
    ) -> Arc<Variable> {
        Arc::new(Variable {
            id: next_symbol_id(),
            name: name.into(),
            ty,
            modifiers,
            storage,
            position,
            builtin,
            const_value: OnceLock::new(),
        })
    }

    pub fn is_uniform(&self) -> bool {
        self.modifiers.is_uniform()
    }

    pub fn is_const(&self) -> bool {
        self.modifiers.is_const()
    }

    pub fn is_parameter(&self) -> bool {
        self.storage == VariableStorage::Parameter
    }

    pub fn constant_initializer(&self) -> Option<&Expression> {
        self.const_value.get()
    }

    pub fn is_global(&self) -> bool {
        matches!(self.storage, VariableStorage::Global | VariableStorage::InterfaceBlock)
    }
}

impl PartialEq for Variable {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Variable {}
