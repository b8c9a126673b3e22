//! Read-only analyses over the IR.
//!
//! Everything here is built on [`crate::ir::visitor`]; each query is a small
//! visitor that breaks out of the walk as soon as the answer is known.

pub mod control_flow;
pub mod recursion;
pub mod unroll;
pub mod usage;

use crate::ir::constant::get_constant_int;
use crate::ir::expr::{ExprKind, Expression, RefKind};
use crate::ir::operator::Operator;
use crate::ir::visitor::{walk_expression, Visitor};
use std::ops::ControlFlow;

pub use control_flow::{can_exit_without_returning_value, function_has_early_return, loop_control_flow, LoopControlFlow};
pub use recursion::{detect_recursion, undefined_calls};
pub use unroll::get_loop_unroll_info;
pub use usage::{ProgramUsage, VariableCounts};

fn call_is_pure(expr: &Expression) -> bool {
    match &expr.kind {
        ExprKind::FunctionCall { function, .. } => {
            function.is_pure() || function.intrinsic.map(|i| i.is_pure()).unwrap_or(false)
        }
        _ => true,
    }
}

struct SideEffects;

impl Visitor for SideEffects {
    type Break = ();

    fn visit_expression(&mut self, e: &Expression) -> ControlFlow<()> {
        match &e.kind {
            ExprKind::FunctionCall { .. } if !call_is_pure(e) => ControlFlow::Break(()),
            ExprKind::Binary { op, .. } if op.is_assignment() => ControlFlow::Break(()),
            ExprKind::Prefix {
                op: Operator::PlusPlus | Operator::MinusMinus,
                ..
            }
            | ExprKind::Postfix { .. } => ControlFlow::Break(()),
            _ => walk_expression(self, e),
        }
    }
}

/// True if evaluating `expr` can write storage or call an impure function.
pub fn has_side_effects(expr: &Expression) -> bool {
    SideEffects.visit_expression(expr).is_break()
}

/// Expressions cheap enough to evaluate more than once: literals, variables,
/// and swizzles, fields or constant indices of those.
pub fn is_trivial_expression(expr: &Expression) -> bool {
    match &expr.kind {
        ExprKind::Literal(_) | ExprKind::VariableReference { .. } => true,
        ExprKind::Swizzle { base, .. } | ExprKind::FieldAccess { base, .. } => is_trivial_expression(base),
        ExprKind::Index { base, index } => get_constant_int(index).is_some() && is_trivial_expression(base),
        ExprKind::ConstructorCast(arg) | ExprKind::ConstructorSplat(arg) | ExprKind::ConstructorDiagonalMatrix(arg) => {
            is_trivial_expression(arg)
        }
        ExprKind::ConstructorCompound(args) => args.iter().all(Expression::is_literal),
        _ => false,
    }
}

/// Literals and constructors built entirely from literals.
pub fn is_compile_time_constant(expr: &Expression) -> bool {
    match &expr.kind {
        ExprKind::Literal(_) => true,
        _ if expr.is_constructor() => expr.constructor_arguments().iter().all(is_compile_time_constant),
        _ => false,
    }
}

struct ConstantExpression;

impl Visitor for ConstantExpression {
    type Break = ();

    fn visit_expression(&mut self, e: &Expression) -> ControlFlow<()> {
        match &e.kind {
            ExprKind::VariableReference { variable, .. } => {
                if variable.is_const() {
                    ControlFlow::Continue(())
                } else {
                    ControlFlow::Break(())
                }
            }
            ExprKind::Binary { op, .. } if op.is_assignment() => ControlFlow::Break(()),
            ExprKind::Prefix {
                op: Operator::PlusPlus | Operator::MinusMinus,
                ..
            }
            | ExprKind::Postfix { .. }
            | ExprKind::ChildCall { .. }
            | ExprKind::Poison => ControlFlow::Break(()),
            ExprKind::FunctionCall { function, .. } => {
                if function.intrinsic.map(|i| i.is_pure()).unwrap_or(false) {
                    walk_expression(self, e)
                } else {
                    ControlFlow::Break(())
                }
            }
            _ => walk_expression(self, e),
        }
    }
}

/// True if `expr` only combines literals and `const` variables, so that it
/// is a legal `const` initializer.
pub fn is_constant_expression(expr: &Expression) -> bool {
    ConstantExpression.visit_expression(expr).is_continue()
}

struct DynamicallyUniform;

impl Visitor for DynamicallyUniform {
    type Break = ();

    fn visit_expression(&mut self, e: &Expression) -> ControlFlow<()> {
        match &e.kind {
            ExprKind::VariableReference { variable, ref_kind } => {
                let fixed = variable.is_uniform() || variable.is_const();
                if fixed && *ref_kind == RefKind::Read {
                    ControlFlow::Continue(())
                } else {
                    ControlFlow::Break(())
                }
            }
            ExprKind::FunctionCall { .. } if !call_is_pure(e) => ControlFlow::Break(()),
            ExprKind::ChildCall { .. } | ExprKind::Poison => ControlFlow::Break(()),
            _ => walk_expression(self, e),
        }
    }
}

/// True if `expr` has the same value in every lane: it reads only uniforms,
/// literals and constants, combined by pure operations.
pub fn is_dynamically_uniform(expr: &Expression) -> bool {
    DynamicallyUniform.visit_expression(expr).is_continue()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::modifiers::{ModifierFlags, Modifiers};
    use crate::ir::types::builtin_types;
    use crate::ir::variable::{Variable, VariableStorage};
    use crate::position::Position;

    fn reference(flags: ModifierFlags, ref_kind: RefKind) -> Expression {
        let variable = Variable::new(
            "v",
            builtin_types().float.clone(),
            Modifiers::new(flags),
            VariableStorage::Global,
            Position::default(),
            false,
        );
        Expression::variable_reference(Position::default(), variable, ref_kind)
    }

    fn binary(left: Expression, op: Operator, right: Expression) -> Expression {
        Expression::new(
            Position::default(),
            left.ty.clone(),
            ExprKind::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
            },
        )
    }

    #[test]
    fn test_side_effects() {
        let one = Expression::literal(Position::default(), 1.0, builtin_types().float.clone());
        let read = binary(reference(ModifierFlags::NONE, RefKind::Read), Operator::Plus, one.clone());
        assert!(!has_side_effects(&read));
        let write = binary(reference(ModifierFlags::NONE, RefKind::Write), Operator::Eq, one);
        assert!(has_side_effects(&write));
    }

    #[test]
    fn test_dynamic_uniformity() {
        let one = Expression::literal(Position::default(), 1.0, builtin_types().float.clone());
        let uniform = binary(reference(ModifierFlags::UNIFORM, RefKind::Read), Operator::Star, one.clone());
        assert!(is_dynamically_uniform(&uniform));
        let local = binary(reference(ModifierFlags::NONE, RefKind::Read), Operator::Star, one);
        assert!(!is_dynamically_uniform(&local));
    }

    #[test]
    fn test_trivial_and_constant() {
        let t = builtin_types();
        let lit = Expression::literal(Position::default(), 2.0, t.float.clone());
        let splat = Expression::new(
            Position::default(),
            t.float_vecs[1].clone(),
            ExprKind::ConstructorSplat(Box::new(lit.clone())),
        );
        assert!(is_trivial_expression(&splat));
        assert!(is_compile_time_constant(&splat));
        let sum = binary(lit.clone(), Operator::Plus, lit);
        assert!(!is_trivial_expression(&sum));
        assert!(is_constant_expression(&sum));
    }
}
