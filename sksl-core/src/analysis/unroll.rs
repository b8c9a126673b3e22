//! Trip-count analysis for `for` loops of the form
//! `for (T i = c0; i OP c1; i += c2)`.

use crate::ir::constant::get_constant_value;
use crate::ir::expr::{ExprKind, Expression, RefKind};
use crate::ir::operator::Operator;
use crate::ir::stmt::{LoopUnrollInfo, Statement, StmtKind};
use crate::ir::variable::Variable;
use crate::ir::visitor::{walk_expression, Visitor};
use std::ops::ControlFlow;
use std::sync::Arc;

pub const MAX_UNROLL_ITERATIONS: u32 = 100_000;

fn constant_scalar(expr: &Expression) -> Option<f64> {
    let values = get_constant_value(expr)?;
    match values.as_slice() {
        [v] => Some(*v),
        _ => None,
    }
}

fn is_index(expr: &Expression, index: &Variable) -> bool {
    matches!(&expr.kind, ExprKind::VariableReference { variable, .. } if variable.id == index.id)
}

struct IndexWrites<'a> {
    index: &'a Variable,
}

impl Visitor for IndexWrites<'_> {
    type Break = ();

    fn visit_expression(&mut self, e: &Expression) -> ControlFlow<()> {
        if let ExprKind::VariableReference { variable, ref_kind } = &e.kind {
            if variable.id == self.index.id && *ref_kind != RefKind::Read {
                return ControlFlow::Break(());
            }
        }
        walk_expression(self, e)
    }
}

fn compare(op: Operator, a: f64, b: f64) -> bool {
    match op {
        Operator::Lt => a < b,
        Operator::LtEq => a <= b,
        Operator::Gt => a > b,
        Operator::GtEq => a >= b,
        Operator::EqEq => a == b,
        Operator::Neq => a != b,
        _ => false,
    }
}

/// Works out the index variable, start, step and trip count of a loop, or
/// explains why the loop does not have that shape.
pub fn get_loop_unroll_info(
    initializer: Option<&Statement>,
    test: Option<&Expression>,
    next: Option<&Expression>,
    body: &Statement,
) -> Result<LoopUnrollInfo, String> {
    let Some(Statement {
        kind: StmtKind::VarDeclaration {
            variable,
            value: Some(value),
        },
        ..
    }) = initializer
    else {
        return Err("missing init declaration".into());
    };
    let index: Arc<Variable> = variable.clone();
    if !index.ty.is_scalar() || !(index.ty.is_float() || index.ty.is_integer()) {
        return Err("invalid variable type for loop index".into());
    }
    let start = constant_scalar(value).ok_or("loop index initializer must be a constant expression")?;

    let test = test.ok_or("missing condition")?;
    let (op, limit) = match &test.kind {
        ExprKind::Binary { left, op, right } if is_index(left, &index) => {
            if !(op.is_relational() || op.is_equality()) {
                return Err("invalid loop condition".into());
            }
            let limit = constant_scalar(right).ok_or("loop index must be compared with a constant expression")?;
            (*op, limit)
        }
        _ => return Err("invalid loop condition".into()),
    };

    let next = next.ok_or("missing loop expression")?;
    let delta = match &next.kind {
        ExprKind::Binary { left, op, right } if is_index(left, &index) => {
            let step = constant_scalar(right).ok_or("loop index must be modified by a constant expression")?;
            match op {
                Operator::PlusEq => step,
                Operator::MinusEq => -step,
                _ => return Err("invalid loop expression".into()),
            }
        }
        ExprKind::Prefix { op, operand } | ExprKind::Postfix { op, operand } if is_index(operand, &index) => match op {
            Operator::PlusPlus => 1.0,
            Operator::MinusMinus => -1.0,
            _ => return Err("invalid loop expression".into()),
        },
        _ => return Err("invalid loop expression".into()),
    };

    if (IndexWrites { index: &index }).visit_statement(body).is_break() {
        return Err("loop index must not be modified within body of the loop".into());
    }

    let mut count = 0u32;
    let mut current = start;
    while compare(op, current, limit) {
        count += 1;
        if count > MAX_UNROLL_ITERATIONS {
            return Err("loop must guarantee termination in fewer iterations".into());
        }
        current += delta;
        if index.ty.is_float() {
            current = current as f32 as f64;
        }
    }
    Ok(LoopUnrollInfo {
        index,
        start,
        delta,
        count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::modifiers::Modifiers;
    use crate::ir::types::builtin_types;
    use crate::ir::variable::VariableStorage;
    use crate::position::Position;

    fn int(v: f64) -> Expression {
        Expression::literal(Position::default(), v, builtin_types().int.clone())
    }

    fn loop_parts(start: f64, op: Operator, limit: f64, step_op: Operator, step: f64) -> (Statement, Expression, Expression) {
        let pos = Position::default();
        let i = Variable::new(
            "i",
            builtin_types().int.clone(),
            Modifiers::default(),
            VariableStorage::Local,
            pos,
            false,
        );
        let init = Statement::new(
            pos,
            StmtKind::VarDeclaration {
                variable: i.clone(),
                value: Some(int(start)),
            },
        );
        let binary = |left: Expression, op: Operator, right: Expression, ty| {
            Expression::new(
                pos,
                ty,
                ExprKind::Binary {
                    left: Box::new(left),
                    op,
                    right: Box::new(right),
                },
            )
        };
        let test = binary(
            Expression::variable_reference(pos, i.clone(), RefKind::Read),
            op,
            int(limit),
            builtin_types().bool_.clone(),
        );
        let next = binary(
            Expression::variable_reference(pos, i.clone(), RefKind::ReadWrite),
            step_op,
            int(step),
            builtin_types().int.clone(),
        );
        (init, test, next)
    }

    #[test]
    fn test_trip_counts() {
        let body = Statement::nop(Position::default());
        let (init, test, next) = loop_parts(0.0, Operator::Lt, 10.0, Operator::PlusEq, 3.0);
        let info = get_loop_unroll_info(Some(&init), Some(&test), Some(&next), &body).unwrap();
        assert_eq!(info.count, 4);
        assert_eq!(info.delta, 3.0);

        let (init, test, next) = loop_parts(5.0, Operator::Gt, 0.0, Operator::MinusEq, 1.0);
        let info = get_loop_unroll_info(Some(&init), Some(&test), Some(&next), &body).unwrap();
        assert_eq!(info.count, 5);
    }

    #[test]
    fn test_rejected_loops() {
        let body = Statement::nop(Position::default());
        let (init, test, next) = loop_parts(0.0, Operator::GtEq, 0.0, Operator::PlusEq, 1.0);
        let err = get_loop_unroll_info(Some(&init), Some(&test), Some(&next), &body).unwrap_err();
        assert_eq!(err, "loop must guarantee termination in fewer iterations");

        let (init, test, next) = loop_parts(0.0, Operator::Lt, 10.0, Operator::StarEq, 2.0);
        let err = get_loop_unroll_info(Some(&init), Some(&test), Some(&next), &body).unwrap_err();
        assert_eq!(err, "invalid loop expression");

        let err = get_loop_unroll_info(None, Some(&test), Some(&next), &body).unwrap_err();
        assert_eq!(err, "missing init declaration");
    }
}
