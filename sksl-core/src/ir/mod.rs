//! Typed intermediate representation produced by the parser.

pub mod constant;
pub mod convert;
pub mod expr;
pub mod function;
pub mod intrinsics;
pub mod modifiers;
pub mod operator;
pub mod program;
pub mod stmt;
pub mod types;
pub mod variable;
pub mod visitor;

pub use expr::{ExprKind, Expression, RefKind};
pub use function::{FunctionDeclaration, FunctionDefinition};
pub use intrinsics::IntrinsicKind;
pub use modifiers::{Layout, ModifierFlags, Modifiers};
pub use operator::Operator;
pub use program::{Module, Program, ProgramElement};
pub use stmt::{LoopUnrollInfo, Statement, StmtKind, SwitchCase};
pub use types::{builtin_types, NumberKind, Type, TypeKind, TypeRef};
pub use variable::{Variable, VariableStorage};
