use super::function::{FunctionDeclaration, FunctionDefinition};
use super::stmt::{Statement, StmtKind};
use super::types::TypeRef;
use super::variable::Variable;
use crate::position::Position;
use crate::settings::{ProgramKind, Settings};
use crate::symbol_table::SymbolTable;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub enum ProgramElement {
    /// A `VarDeclaration` statement at global scope.
    GlobalVar(Statement),
    InterfaceBlock {
        variable: Arc<Variable>,
        type_name: String,
        instance_name: String,
        position: Position,
    },
    Function(Arc<FunctionDefinition>),
    Prototype(Arc<FunctionDeclaration>),
    StructDefinition {
        ty: TypeRef,
        position: Position,
    },
    Extension {
        name: String,
        behavior: String,
        position: Position,
    },
}

impl ProgramElement {
    pub fn position(&self) -> Position {
        match self {
            ProgramElement::GlobalVar(stmt) => stmt.position,
            ProgramElement::InterfaceBlock { position, .. }
            | ProgramElement::StructDefinition { position, .. }
            | ProgramElement::Extension { position, .. } => *position,
            ProgramElement::Function(def) => def.declaration.position,
            ProgramElement::Prototype(decl) => decl.position,
        }
    }

    pub fn description(&self) -> String {
        match self {
            ProgramElement::GlobalVar(stmt) => stmt.description(),
            ProgramElement::InterfaceBlock {
                variable,
                type_name,
                instance_name,
                ..
            } => {
                let mut out = format!("{}{} {{\n", variable.modifiers, type_name);
                let block_type = match &variable.ty.kind {
                    super::types::TypeKind::Array { element, .. } => element.clone(),
                    _ => variable.ty.clone(),
                };
                for field in block_type.fields() {
                    out.push_str(&format!("    {}{} {};\n", field.modifiers, field.ty.name, field.name));
                }
                out.push('}');
                if !instance_name.is_empty() {
                    out.push(' ');
                    out.push_str(instance_name);
                    if let Some(n) = variable.ty.array_size() {
                        out.push_str(&format!("[{}]", n));
                    }
                }
                out.push(';');
                out
            }
            ProgramElement::Function(def) => {
                format!("{}\n{}", def.declaration, def.body.description())
            }
            ProgramElement::Prototype(decl) => format!("{};", decl),
            ProgramElement::StructDefinition { ty, .. } => {
                let mut out = format!("struct {} {{\n", ty.name);
                for field in ty.fields() {
                    let (base, suffix) = match field.ty.name.find('[') {
                        Some(i) => (&field.ty.name[..i], &field.ty.name[i..]),
                        None => (field.ty.name.as_str(), ""),
                    };
                    out.push_str(&format!("    {}{} {}{};\n", field.modifiers, base, field.name, suffix));
                }
                out.push_str("};");
                out
            }
            ProgramElement::Extension { name, behavior, .. } => {
                format!("#extension {} : {}", name, behavior)
            }
        }
    }
}

/// The definition among `elements` for `decl`, matched by identity first and
/// then by signature.
pub fn find_in(elements: &[ProgramElement], decl: &FunctionDeclaration) -> Option<Arc<FunctionDefinition>> {
    let definitions = || {
        elements.iter().filter_map(|e| match e {
            ProgramElement::Function(def) => Some(def),
            _ => None,
        })
    };
    definitions()
        .find(|def| def.declaration.id == decl.id)
        .or_else(|| definitions().find(|def| def.declaration.matches_signature(decl)))
        .cloned()
}

/// A parsed built-in module. Modules form a chain through `parent`, and a
/// module's symbol table inherits from its parent's.
#[derive(Debug)]
pub struct Module {
    pub name: &'static str,
    pub symbols: Arc<SymbolTable>,
    pub elements: Vec<ProgramElement>,
    pub parent: Option<Arc<Module>>,
}

impl Module {
    /// Finds a function definition in this module or any ancestor. A
    /// prototype resolves to the definition with the same signature.
    pub fn find_definition(&self, decl: &FunctionDeclaration) -> Option<Arc<FunctionDefinition>> {
        find_in(&self.elements, decl).or_else(|| self.parent.as_ref().and_then(|p| p.find_definition(decl)))
    }
}

/// A fully parsed and type-checked program.
#[derive(Debug)]
pub struct Program {
    pub kind: ProgramKind,
    pub settings: Settings,
    pub source: Arc<str>,
    pub module: Arc<Module>,
    pub symbols: SymbolTable,
    pub elements: Vec<ProgramElement>,
}

impl Program {
    pub fn functions(&self) -> impl Iterator<Item = &Arc<FunctionDefinition>> {
        self.elements.iter().filter_map(|e| match e {
            ProgramElement::Function(def) => Some(def),
            _ => None,
        })
    }

    pub fn main(&self) -> Option<&Arc<FunctionDefinition>> {
        self.functions().find(|f| f.declaration.is_main())
    }

    /// Definition of `decl`, whether it lives in the program or a built-in module.
    pub fn find_definition(&self, decl: &FunctionDeclaration) -> Option<Arc<FunctionDefinition>> {
        find_in(&self.elements, decl).or_else(|| self.module.find_definition(decl))
    }

    pub fn global_variables(&self) -> impl Iterator<Item = (&Arc<Variable>, Option<&super::expr::Expression>)> {
        self.elements.iter().filter_map(|e| match e {
            ProgramElement::GlobalVar(Statement {
                kind: StmtKind::VarDeclaration { variable, value },
                ..
            }) => Some((variable, value.as_ref())),
            ProgramElement::InterfaceBlock { variable, .. } => Some((variable, None)),
            _ => None,
        })
    }

    /// Source text equivalent to the program; parsing it yields the same IR shape.
    pub fn description(&self) -> String {
        let mut out = String::new();
        for element in &self.elements {
            out.push_str(&element.description());
            out.push('\n');
        }
        out
    }
}
