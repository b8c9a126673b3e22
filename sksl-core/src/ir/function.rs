use super::intrinsics::IntrinsicKind;
use super::modifiers::{ModifierFlags, Modifiers};
use super::stmt::Statement;
use super::types::TypeRef;
use super::variable::{next_symbol_id, Variable};
use crate::position::Position;
use std::fmt;
use std::sync::Arc;

#[derive(Debug)]
pub struct FunctionDeclaration {
    pub id: u32,
    pub name: String,
    pub parameters: Vec<Arc<Variable>>,
    pub return_type: TypeRef,
    pub modifiers: Modifiers,
    pub intrinsic: Option<IntrinsicKind>,
    pub builtin: bool,
    pub position: Position,
}

impl FunctionDeclaration {
    pub fn new(
        name: impl Into<String>,
        parameters: Vec<Arc<Variable>>,
        return_type: TypeRef,
        modifiers: Modifiers,
        builtin: bool,
        position: Position,
    ) -> Arc<FunctionDeclaration> {
        let name = name.into();
        let intrinsic = if builtin { IntrinsicKind::from_name(&name) } else { None };
        Arc::new(FunctionDeclaration {
            id: next_symbol_id(),
            name,
            parameters,
            return_type,
            modifiers,
            intrinsic,
            builtin,
            position,
        })
    }

    pub fn is_main(&self) -> bool {
        self.name == "main"
    }

    pub fn is_pure(&self) -> bool {
        self.modifiers.flags.contains(ModifierFlags::PURE)
    }

    pub fn is_generic(&self) -> bool {
        self.return_type.is_generic() || self.parameters.iter().any(|p| p.ty.is_generic())
    }

    /// Parameter types match exactly, used to pair prototypes with definitions.
    pub fn matches_signature(&self, other: &FunctionDeclaration) -> bool {
        self.name == other.name
            && self.parameters.len() == other.parameters.len()
            && self
                .parameters
                .iter()
                .zip(&other.parameters)
                .all(|(a, b)| a.ty == b.ty)
    }

    /// `half4 main(float2 coords)`
    pub fn signature(&self) -> String {
        let params: Vec<String> = self
            .parameters
            .iter()
            .map(|p| format!("{}{} {}", p.modifiers, p.ty.name, p.name))
            .collect();
        format!("{} {}({})", self.return_type.name, self.name, params.join(", "))
    }
}

impl fmt::Display for FunctionDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.modifiers, self.signature())
    }
}

#[derive(Debug)]
pub struct FunctionDefinition {
    pub declaration: Arc<FunctionDeclaration>,
    pub body: Statement,
}
