//! IR visitor for traversing expressions and statements.
//!
//! Analyses implement [`Visitor`] and override only the hooks they need; the
//! `walk_*` functions perform the actual traversal. Returning
//! `ControlFlow::Break` from any hook stops the walk early.

use super::expr::{ExprKind, Expression};
use super::program::ProgramElement;
use super::stmt::{Statement, StmtKind};
use std::ops::ControlFlow;

pub trait Visitor: Sized {
    type Break;

    fn visit_program_element(&mut self, e: &ProgramElement) -> ControlFlow<Self::Break> {
        walk_program_element(self, e)
    }

    fn visit_statement(&mut self, s: &Statement) -> ControlFlow<Self::Break> {
        walk_statement(self, s)
    }

    fn visit_expression(&mut self, e: &Expression) -> ControlFlow<Self::Break> {
        walk_expression(self, e)
    }
}

pub fn walk_program_element<V: Visitor>(v: &mut V, e: &ProgramElement) -> ControlFlow<V::Break> {
    match e {
        ProgramElement::GlobalVar(stmt) => v.visit_statement(stmt),
        ProgramElement::Function(def) => v.visit_statement(&def.body),
        ProgramElement::InterfaceBlock { .. }
        | ProgramElement::Prototype(_)
        | ProgramElement::StructDefinition { .. }
        | ProgramElement::Extension { .. } => ControlFlow::Continue(()),
    }
}

pub fn walk_statement<V: Visitor>(v: &mut V, s: &Statement) -> ControlFlow<V::Break> {
    match &s.kind {
        StmtKind::Block { statements, .. } => {
            for stmt in statements {
                v.visit_statement(stmt)?;
            }
            ControlFlow::Continue(())
        }
        StmtKind::Expression(expr) => v.visit_expression(expr),
        StmtKind::VarDeclaration { value, .. } => match value {
            Some(value) => v.visit_expression(value),
            None => ControlFlow::Continue(()),
        },
        StmtKind::If {
            test,
            if_true,
            if_false,
        } => {
            v.visit_expression(test)?;
            v.visit_statement(if_true)?;
            if let Some(f) = if_false {
                v.visit_statement(f)?;
            }
            ControlFlow::Continue(())
        }
        StmtKind::For {
            initializer,
            test,
            next,
            body,
            ..
        } => {
            if let Some(init) = initializer {
                v.visit_statement(init)?;
            }
            if let Some(test) = test {
                v.visit_expression(test)?;
            }
            if let Some(next) = next {
                v.visit_expression(next)?;
            }
            v.visit_statement(body)
        }
        StmtKind::Do { body, test } => {
            v.visit_statement(body)?;
            v.visit_expression(test)
        }
        StmtKind::Switch { value, cases } => {
            v.visit_expression(value)?;
            for case in cases {
                for stmt in &case.statements {
                    v.visit_statement(stmt)?;
                }
            }
            ControlFlow::Continue(())
        }
        StmtKind::Return(Some(expr)) => v.visit_expression(expr),
        StmtKind::Return(None)
        | StmtKind::Break
        | StmtKind::Continue
        | StmtKind::Discard
        | StmtKind::Nop => ControlFlow::Continue(()),
    }
}

pub fn walk_expression<V: Visitor>(v: &mut V, e: &Expression) -> ControlFlow<V::Break> {
    match &e.kind {
        ExprKind::Literal(_) | ExprKind::VariableReference { .. } | ExprKind::Poison => {
            ControlFlow::Continue(())
        }
        ExprKind::Binary { left, right, .. } => {
            v.visit_expression(left)?;
            v.visit_expression(right)
        }
        ExprKind::Prefix { operand, .. } | ExprKind::Postfix { operand, .. } => v.visit_expression(operand),
        ExprKind::FieldAccess { base, .. } | ExprKind::Swizzle { base, .. } => v.visit_expression(base),
        ExprKind::Index { base, index } => {
            v.visit_expression(base)?;
            v.visit_expression(index)
        }
        ExprKind::Ternary {
            test,
            if_true,
            if_false,
        } => {
            v.visit_expression(test)?;
            v.visit_expression(if_true)?;
            v.visit_expression(if_false)
        }
        ExprKind::FunctionCall { arguments, .. } | ExprKind::ChildCall { arguments, .. } => {
            for arg in arguments {
                v.visit_expression(arg)?;
            }
            ControlFlow::Continue(())
        }
        ExprKind::ConstructorCast(_)
        | ExprKind::ConstructorSplat(_)
        | ExprKind::ConstructorDiagonalMatrix(_)
        | ExprKind::ConstructorMatrixResize(_)
        | ExprKind::ConstructorCompound(_)
        | ExprKind::ConstructorArray(_)
        | ExprKind::ConstructorStruct(_) => {
            for arg in e.constructor_arguments() {
                v.visit_expression(arg)?;
            }
            ControlFlow::Continue(())
        }
    }
}
