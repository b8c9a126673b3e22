//! Compile-time constant evaluation and literal folding.
//!
//! Values are carried as one `f64` per slot. Integers and booleans are stored
//! exactly; floats are rounded through `f32` after every operation so that a
//! folded result matches what the raster pipeline would compute.

use super::expr::{ExprKind, Expression};
use super::operator::Operator;
use super::types::{NumberKind, TypeKind, TypeRef};
use crate::position::Position;

/// Flattened slot values of `expr`, if it is a compile-time constant.
pub fn get_constant_value(expr: &Expression) -> Option<Vec<f64>> {
    match &expr.kind {
        ExprKind::Literal(v) => Some(vec![*v]),
        ExprKind::VariableReference { variable, .. } => {
            if !variable.is_const() {
                return None;
            }
            variable.constant_initializer().and_then(get_constant_value)
        }
        ExprKind::ConstructorSplat(arg) => {
            let value = *get_constant_value(arg)?.first()?;
            Some(vec![value; expr.ty.slot_count()])
        }
        ExprKind::ConstructorDiagonalMatrix(arg) => {
            let value = *get_constant_value(arg)?.first()?;
            let (columns, rows) = (expr.ty.columns(), expr.ty.rows());
            let mut out = Vec::with_capacity(columns * rows);
            for c in 0..columns {
                for r in 0..rows {
                    out.push(if c == r { value } else { 0.0 });
                }
            }
            Some(out)
        }
        ExprKind::ConstructorMatrixResize(arg) => {
            let source = get_constant_value(arg)?;
            let (src_columns, src_rows) = (arg.ty.columns(), arg.ty.rows());
            let (columns, rows) = (expr.ty.columns(), expr.ty.rows());
            let mut out = Vec::with_capacity(columns * rows);
            for c in 0..columns {
                for r in 0..rows {
                    if c < src_columns && r < src_rows {
                        out.push(source[c * src_rows + r]);
                    } else {
                        out.push(if c == r { 1.0 } else { 0.0 });
                    }
                }
            }
            Some(out)
        }
        ExprKind::ConstructorCast(arg) => {
            let kind = expr.ty.number_kind();
            Some(get_constant_value(arg)?.into_iter().map(|v| cast_value(v, kind)).collect())
        }
        ExprKind::ConstructorCompound(args) | ExprKind::ConstructorArray(args) | ExprKind::ConstructorStruct(args) => {
            let mut out = Vec::with_capacity(expr.ty.slot_count());
            for arg in args {
                out.extend(get_constant_value(arg)?);
            }
            Some(out)
        }
        ExprKind::Swizzle { base, components } => {
            let values = get_constant_value(base)?;
            components.iter().map(|c| values.get(*c as usize).copied()).collect()
        }
        ExprKind::FieldAccess { base, field_index } => {
            let values = get_constant_value(base)?;
            let offset = base.ty.field_slot_offset(*field_index);
            let count = expr.ty.slot_count();
            values.get(offset..offset + count).map(<[f64]>::to_vec)
        }
        ExprKind::Index { base, index } => {
            let values = get_constant_value(base)?;
            let i = get_constant_int(index)?;
            let stride = expr.ty.slot_count();
            let start = usize::try_from(i).ok()? * stride;
            values.get(start..start + stride).map(<[f64]>::to_vec)
        }
        ExprKind::Prefix {
            op: Operator::Minus,
            operand,
        } => {
            let kind = expr.ty.number_kind();
            Some(
                get_constant_value(operand)?
                    .into_iter()
                    .map(|v| normalize(-v, kind))
                    .collect(),
            )
        }
        _ => None,
    }
}

/// The value of a constant scalar integer expression.
pub fn get_constant_int(expr: &Expression) -> Option<i64> {
    if !expr.ty.is_scalar() || !expr.ty.is_integer() {
        return None;
    }
    get_constant_value(expr).and_then(|v| v.first().map(|x| *x as i64))
}

/// Converts a slot value to a different number kind using the raster
/// pipeline's cast semantics.
pub fn cast_value(value: f64, to: NumberKind) -> f64 {
    match to {
        NumberKind::Float => value as f32 as f64,
        NumberKind::Signed => {
            if value.is_nan() {
                0.0
            } else {
                value.trunc().clamp(i32::MIN as f64, i32::MAX as f64)
            }
        }
        NumberKind::Unsigned => {
            if value.is_nan() {
                0.0
            } else {
                value.trunc().clamp(0.0, u32::MAX as f64)
            }
        }
        NumberKind::Boolean => {
            if value != 0.0 {
                1.0
            } else {
                0.0
            }
        }
        NumberKind::Nonnumeric => value,
    }
}

/// Wraps integers to 32 bits and rounds floats through `f32`.
fn normalize(value: f64, kind: NumberKind) -> f64 {
    match kind {
        NumberKind::Float => value as f32 as f64,
        NumberKind::Signed => (value as i64 as i32) as f64,
        NumberKind::Unsigned => (value as i64 as u32) as f64,
        _ => value,
    }
}

/// Builds an expression of type `ty` holding the given flattened slot values.
pub fn make_constant(position: Position, ty: &TypeRef, values: &[f64]) -> Expression {
    match &ty.kind {
        TypeKind::Scalar(_) => Expression::literal(position, values.first().copied().unwrap_or(0.0), ty.clone()),
        TypeKind::Vector { component, .. } | TypeKind::Matrix { component, .. } => {
            let first = values.first().copied().unwrap_or(0.0);
            if ty.is_vector() && values.iter().all(|v| v.to_bits() == first.to_bits()) {
                return Expression::new(
                    position,
                    ty.clone(),
                    ExprKind::ConstructorSplat(Box::new(Expression::literal(position, first, component.clone()))),
                );
            }
            let args = values
                .iter()
                .map(|v| Expression::literal(position, *v, component.clone()))
                .collect();
            Expression::new(position, ty.clone(), ExprKind::ConstructorCompound(args))
        }
        TypeKind::Array { element, count } => {
            let stride = element.slot_count();
            let args = (0..count.unwrap_or(0) as usize)
                .map(|i| make_constant(position, element, &values[i * stride..(i + 1) * stride]))
                .collect();
            Expression::new(position, ty.clone(), ExprKind::ConstructorArray(args))
        }
        TypeKind::Struct { fields, .. } => {
            let mut offset = 0;
            let mut args = Vec::with_capacity(fields.len());
            for field in fields {
                let count = field.ty.slot_count();
                args.push(make_constant(position, &field.ty, &values[offset..offset + count]));
                offset += count;
            }
            Expression::new(position, ty.clone(), ExprKind::ConstructorStruct(args))
        }
        _ => Expression::poison(position),
    }
}

fn fold_component(op: Operator, kind: NumberKind, a: f64, b: f64) -> Result<Option<f64>, String> {
    let value = match (op, kind) {
        (Operator::Plus, _) => a + b,
        (Operator::Minus, _) => a - b,
        (Operator::Star, NumberKind::Signed) => ((a as i32).wrapping_mul(b as i32)) as f64,
        (Operator::Star, NumberKind::Unsigned) => ((a as u32).wrapping_mul(b as u32)) as f64,
        (Operator::Star, _) => a * b,
        (Operator::Slash, NumberKind::Float) => {
            if b == 0.0 {
                return Ok(None);
            }
            a / b
        }
        (Operator::Slash | Operator::Percent, NumberKind::Signed | NumberKind::Unsigned) => {
            if b == 0.0 {
                return Err("division by zero".to_string());
            }
            if kind == NumberKind::Signed {
                let (a, b) = (a as i32, b as i32);
                if op == Operator::Slash { a.wrapping_div(b) as f64 } else { a.wrapping_rem(b) as f64 }
            } else {
                let (a, b) = (a as u32, b as u32);
                if op == Operator::Slash { (a / b) as f64 } else { (a % b) as f64 }
            }
        }
        (Operator::BitwiseAnd, NumberKind::Signed) => ((a as i32) & (b as i32)) as f64,
        (Operator::BitwiseOr, NumberKind::Signed) => ((a as i32) | (b as i32)) as f64,
        (Operator::BitwiseXor, NumberKind::Signed) => ((a as i32) ^ (b as i32)) as f64,
        (Operator::BitwiseAnd, NumberKind::Unsigned) => ((a as u32) & (b as u32)) as f64,
        (Operator::BitwiseOr, NumberKind::Unsigned) => ((a as u32) | (b as u32)) as f64,
        (Operator::BitwiseXor, NumberKind::Unsigned) => ((a as u32) ^ (b as u32)) as f64,
        (Operator::Shl, NumberKind::Signed | NumberKind::Unsigned) => {
            if !(0.0..32.0).contains(&b) {
                return Err("shift value out of range".to_string());
            }
            ((a as i64 as u32) << (b as u32)) as f64
        }
        (Operator::Shr, NumberKind::Signed) => {
            if !(0.0..32.0).contains(&b) {
                return Err("shift value out of range".to_string());
            }
            ((a as i32) >> (b as u32)) as f64
        }
        (Operator::Shr, NumberKind::Unsigned) => {
            if !(0.0..32.0).contains(&b) {
                return Err("shift value out of range".to_string());
            }
            ((a as u32) >> (b as u32)) as f64
        }
        _ => return Ok(None),
    };
    let value = normalize(value, kind);
    if !value.is_finite() {
        return Ok(None);
    }
    Ok(Some(value))
}

/// Folds a binary operation whose operands are both compile-time constants.
/// Returns `Ok(None)` when the operation cannot be folded, and an error
/// message for operations that are statically invalid (division by zero).
pub fn fold_binary(
    position: Position,
    left: &Expression,
    op: Operator,
    right: &Expression,
    result_type: &TypeRef,
) -> Result<Option<Expression>, String> {
    if op.is_assignment() || op == Operator::Comma || left.ty.is_matrix() || right.ty.is_matrix() {
        return Ok(None);
    }
    let (Some(a), Some(b)) = (get_constant_value(left), get_constant_value(right)) else {
        return Ok(None);
    };
    if !left.ty.is_scalar() && !left.ty.is_vector() || !right.ty.is_scalar() && !right.ty.is_vector() {
        return Ok(None);
    }

    if op.is_equality() {
        if a.len() != b.len() {
            return Ok(None);
        }
        let equal = a.iter().zip(&b).all(|(x, y)| x == y);
        return Ok(Some(Expression::bool_literal(position, equal == (op == Operator::EqEq))));
    }

    if op.is_logical() {
        let (x, y) = (a[0] != 0.0, b[0] != 0.0);
        let value = match op {
            Operator::LogicalAnd => x && y,
            Operator::LogicalOr => x || y,
            _ => x != y,
        };
        return Ok(Some(Expression::bool_literal(position, value)));
    }

    let width = a.len().max(b.len());
    let at = |v: &[f64], i: usize| if v.len() == 1 { v[0] } else { v[i] };

    if op.is_relational() {
        if width != 1 {
            return Ok(None);
        }
        let (x, y) = (a[0], b[0]);
        let value = match op {
            Operator::Lt => x < y,
            Operator::Gt => x > y,
            Operator::LtEq => x <= y,
            _ => x >= y,
        };
        return Ok(Some(Expression::bool_literal(position, value)));
    }

    let kind = result_type.number_kind();
    let mut out = Vec::with_capacity(width);
    for i in 0..width {
        match fold_component(op, kind, at(&a, i), at(&b, i))? {
            Some(v) => out.push(v),
            None => return Ok(None),
        }
    }
    Ok(Some(make_constant(position, result_type, &out)))
}

/// Folds `-x`, `!x` and `~x` on constants.
pub fn fold_prefix(position: Position, op: Operator, operand: &Expression) -> Option<Expression> {
    if operand.ty.is_matrix() && op != Operator::Minus {
        return None;
    }
    let values = get_constant_value(operand)?;
    let kind = operand.ty.number_kind();
    let out: Vec<f64> = match op {
        Operator::Minus => values.iter().map(|v| normalize(-v, kind)).collect(),
        Operator::Plus => values,
        Operator::LogicalNot => values.iter().map(|v| if *v != 0.0 { 0.0 } else { 1.0 }).collect(),
        Operator::BitwiseNot => match kind {
            NumberKind::Signed => values.iter().map(|v| (!(*v as i32)) as f64).collect(),
            NumberKind::Unsigned => values.iter().map(|v| (!(*v as u32)) as f64).collect(),
            _ => return None,
        },
        _ => return None,
    };
    Some(make_constant(position, &operand.ty, &out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types::builtin_types;

    fn lit(v: f64, ty: &TypeRef) -> Expression {
        Expression::literal(Position::default(), v, ty.clone())
    }

    #[test]
    fn test_fold_int_arithmetic_wraps() {
        let t = builtin_types();
        let folded = fold_binary(
            Position::default(),
            &lit(i32::MAX as f64, &t.int),
            Operator::Plus,
            &lit(1.0, &t.int),
            &t.int,
        )
        .unwrap()
        .unwrap();
        assert_eq!(folded.literal_value(), Some(i32::MIN as f64));
    }

    #[test]
    fn test_fold_division_by_zero() {
        let t = builtin_types();
        let err = fold_binary(Position::default(), &lit(1.0, &t.int), Operator::Slash, &lit(0.0, &t.int), &t.int);
        assert_eq!(err.unwrap_err(), "division by zero");
        let float = fold_binary(
            Position::default(),
            &lit(1.0, &t.float),
            Operator::Slash,
            &lit(0.0, &t.float),
            &t.float,
        );
        assert!(float.unwrap().is_none());
    }

    #[test]
    fn test_vector_constant_values() {
        let t = builtin_types();
        let v = make_constant(Position::default(), &t.float_vecs[1], &[1.0, 2.0, 3.0]);
        assert_eq!(get_constant_value(&v), Some(vec![1.0, 2.0, 3.0]));
        let splat = make_constant(Position::default(), &t.float_vecs[2], &[0.5; 4]);
        assert!(matches!(splat.kind, ExprKind::ConstructorSplat(_)));
        assert_eq!(splat.description(), "float4(0.5)");
    }

    #[test]
    fn test_cast_value() {
        assert_eq!(cast_value(-2.7, NumberKind::Signed), -2.0);
        assert_eq!(cast_value(-2.7, NumberKind::Unsigned), 0.0);
        assert_eq!(cast_value(3.0, NumberKind::Boolean), 1.0);
    }
}
