use crate::context::Context;
use crate::ir::constant::{cast_value, fold_binary, fold_prefix, get_constant_int, get_constant_value, make_constant};
use crate::ir::expr::{ExprKind, Expression, RefKind};
use crate::ir::modifiers::ModifierFlags;
use crate::ir::operator::Operator;
use crate::ir::types::{builtin_types, TypeRef};
use crate::ir::variable::VariableStorage;
use crate::position::Position;
use crate::symbol_table::Symbol;

/// Scalar literals take on the type they are combined with, as long as no
/// precision is lost: integer literals become any numeric scalar, float
/// literals any float scalar.
fn literal_can_adapt(expr: &Expression, ty: &TypeRef) -> bool {
    expr.is_literal()
        && ty.is_scalar()
        && ((expr.ty.is_integer() && ty.is_number()) || (expr.ty.is_float() && ty.is_float()))
}

/// Cost of implicitly converting `expr` to `ty`, or `None` when no implicit
/// conversion exists.
pub fn coercion_cost(expr: &Expression, ty: &TypeRef) -> Option<u32> {
    if expr.ty == *ty {
        return Some(0);
    }
    if literal_can_adapt(expr, ty) {
        return Some(1);
    }
    expr.ty.coercion_cost(ty)
}

/// Wraps `expr` in a cast to `ty`, folding literal and constant constructor
/// operands in place.
pub(crate) fn make_cast(expr: Expression, ty: &TypeRef) -> Expression {
    let position = expr.position;
    if let ExprKind::Literal(value) = expr.kind {
        return Expression::literal(position, cast_value(value, ty.number_kind()), ty.clone());
    }
    if expr.is_constructor() {
        if let Some(values) = get_constant_value(&expr) {
            let kind = ty.number_kind();
            let values: Vec<f64> = values.into_iter().map(|v| cast_value(v, kind)).collect();
            return make_constant(position, ty, &values);
        }
    }
    Expression::new(position, ty.clone(), ExprKind::ConstructorCast(Box::new(expr)))
}

/// Converts `expr` to `ty`, inserting an implicit cast when one is permitted
/// and reporting an error otherwise.
pub fn coerce(ctx: &mut Context, expr: Expression, ty: &TypeRef) -> Expression {
    if expr.is_poison() || ty.is_poison() || expr.ty == *ty {
        return expr;
    }
    if coercion_cost(&expr, ty).is_none() {
        ctx.error(
            expr.position,
            format!("expected '{}', but found '{}'", ty.name, expr.ty.name),
        );
        return Expression::poison(expr.position);
    }
    make_cast(expr, ty)
}

/// Resolves a name used as a value. Types and functions are handled by the
/// parser before it gets here.
pub fn convert_identifier(ctx: &mut Context, position: Position, name: &str) -> Expression {
    match ctx.symbols.lookup(name) {
        Some(Symbol::Variable(variable)) => Expression::variable_reference(position, variable, RefKind::Read),
        Some(Symbol::Field { owner, field_index }) => {
            let Some(field) = owner.ty.fields().get(field_index) else {
                return Expression::poison(position);
            };
            let ty = field.ty.clone();
            let base = Expression::variable_reference(position, owner, RefKind::Read);
            Expression::new(
                position,
                ty,
                ExprKind::FieldAccess {
                    base: Box::new(base),
                    field_index,
                },
            )
        }
        Some(Symbol::Type(_)) => {
            ctx.error(position, "expected '(' to begin constructor invocation");
            Expression::poison(position)
        }
        Some(Symbol::Functions(_)) => {
            ctx.error(position, "expected '(' to begin function call");
            Expression::poison(position)
        }
        None => {
            ctx.error(position, format!("unknown identifier '{}'", name));
            Expression::poison(position)
        }
    }
}

fn is_low_precision(ty: &TypeRef) -> bool {
    matches!(ty.component_type().name.as_str(), "half" | "short" | "ushort")
}

/// The scalar type both operands convert to. Ties prefer full precision.
fn common_scalar(a: &TypeRef, b: &TypeRef) -> Option<TypeRef> {
    if a == b {
        return Some(a.clone());
    }
    match (a.coercion_cost(b), b.coercion_cost(a)) {
        (Some(ab), Some(ba)) if ab < ba => Some(b.clone()),
        (Some(ab), Some(ba)) if ba < ab => Some(a.clone()),
        (Some(_), Some(_)) => Some(if is_low_precision(a) { b.clone() } else { a.clone() }),
        (Some(_), None) => Some(b.clone()),
        (None, Some(_)) => Some(a.clone()),
        (None, None) => None,
    }
}

/// Operand and result types of a component-wise operation. A scalar operand
/// combines with every component of the other side.
fn componentwise(left: &TypeRef, right: &TypeRef) -> Option<(TypeRef, TypeRef, TypeRef)> {
    if left == right {
        return Some((left.clone(), right.clone(), left.clone()));
    }
    if left.is_scalar() && (right.is_vector() || right.is_matrix()) {
        let scalar = common_scalar(left, &right.component_type())?;
        let other = scalar.to_compound(right.columns(), right.rows())?;
        return Some((scalar, other.clone(), other));
    }
    if right.is_scalar() && (left.is_vector() || left.is_matrix()) {
        let scalar = common_scalar(&left.component_type(), right)?;
        let other = scalar.to_compound(left.columns(), left.rows())?;
        return Some((other.clone(), scalar, other));
    }
    if left.same_shape(right) {
        let scalar = common_scalar(&left.component_type(), &right.component_type())?;
        let both = scalar.to_compound(left.columns(), left.rows())?;
        return Some((both.clone(), both.clone(), both));
    }
    None
}

fn matrix_multiply(left: &TypeRef, right: &TypeRef) -> Option<(TypeRef, TypeRef, TypeRef)> {
    let scalar = common_scalar(&left.component_type(), &right.component_type())?;
    let l = scalar.to_compound(left.columns(), left.rows())?;
    let r = scalar.to_compound(right.columns(), right.rows())?;
    if left.is_matrix() && right.is_matrix() {
        if left.columns() != right.rows() {
            return None;
        }
        let result = scalar.to_compound(right.columns(), left.rows())?;
        return Some((l, r, result));
    }
    if left.is_matrix() && right.is_vector() {
        if left.columns() != right.columns() {
            return None;
        }
        let result = scalar.to_compound(left.rows(), 1)?;
        return Some((l, r, result));
    }
    if left.is_vector() && right.is_matrix() {
        if left.columns() != right.rows() {
            return None;
        }
        let result = scalar.to_compound(right.columns(), 1)?;
        return Some((l, r, result));
    }
    componentwise(left, right)
}

/// Types the operands of `left op right` are converted to, and the result type.
pub fn determine_binary_type(op: Operator, left: &TypeRef, right: &TypeRef) -> Option<(TypeRef, TypeRef, TypeRef)> {
    let types = builtin_types();
    match op {
        Operator::Eq => {
            if !left.supports_equality() || right.coercion_cost(left).is_none() {
                return None;
            }
            Some((left.clone(), left.clone(), left.clone()))
        }
        Operator::Comma => Some((left.clone(), right.clone(), right.clone())),
        Operator::EqEq | Operator::Neq => {
            if !left.supports_equality() || !right.supports_equality() {
                return None;
            }
            if left == right {
                return Some((left.clone(), right.clone(), types.bool_.clone()));
            }
            if !left.same_shape(right) {
                return None;
            }
            let scalar = common_scalar(&left.component_type(), &right.component_type())?;
            let both = scalar.to_compound(left.columns(), left.rows())?;
            Some((both.clone(), both, types.bool_.clone()))
        }
        Operator::LogicalAnd | Operator::LogicalOr | Operator::LogicalXor => {
            let b = &types.bool_;
            (left == b && right == b).then(|| (b.clone(), b.clone(), b.clone()))
        }
        Operator::Lt | Operator::Gt | Operator::LtEq | Operator::GtEq => {
            if !left.is_scalar() || !right.is_scalar() || !left.is_number() || !right.is_number() {
                return None;
            }
            let scalar = common_scalar(left, right)?;
            Some((scalar.clone(), scalar, types.bool_.clone()))
        }
        Operator::Star if left.is_matrix() || right.is_matrix() => {
            if !left.is_number() || !right.is_number() {
                return None;
            }
            matrix_multiply(left, right)
        }
        Operator::Plus | Operator::Minus | Operator::Star | Operator::Slash => {
            if !left.is_number() || !right.is_number() {
                return None;
            }
            componentwise(left, right)
        }
        Operator::Percent
        | Operator::BitwiseAnd
        | Operator::BitwiseOr
        | Operator::BitwiseXor
        | Operator::Shl
        | Operator::Shr => {
            if !left.is_integer() || !right.is_integer() || left.is_matrix() || right.is_matrix() {
                return None;
            }
            componentwise(left, right)
        }
        _ => None,
    }
}

/// An integer or float literal next to a differently typed operand takes on
/// that operand's component type.
fn adapt_literal(expr: Expression, other: &TypeRef) -> Expression {
    let target = other.component_type();
    if !target.is_scalar() || target == expr.ty || !literal_can_adapt(&expr, &target) {
        return expr;
    }
    make_cast(expr, &target)
}

fn type_mismatch(ctx: &mut Context, position: Position, op: Operator, left: &TypeRef, right: &TypeRef) -> Expression {
    ctx.error(
        position,
        format!(
            "type mismatch: '{}' cannot operate on '{}', '{}'",
            op.symbol(),
            left.name,
            right.name
        ),
    );
    Expression::poison(position)
}

fn assignable(ctx: &mut Context, expr: &Expression) -> bool {
    match &expr.kind {
        ExprKind::VariableReference { variable, .. } => {
            let flags = variable.modifiers.flags;
            let stage_input = variable.storage != VariableStorage::Parameter
                && flags.contains(ModifierFlags::IN)
                && !flags.contains(ModifierFlags::OUT);
            if flags.intersects(ModifierFlags::CONST | ModifierFlags::UNIFORM | ModifierFlags::READONLY)
                || stage_input
            {
                ctx.error(
                    expr.position,
                    format!("cannot modify immutable variable '{}'", variable.name),
                );
                return false;
            }
            true
        }
        ExprKind::FieldAccess { base, .. } | ExprKind::Index { base, .. } => assignable(ctx, base),
        ExprKind::Swizzle { base, components } => {
            let mut seen = [false; 4];
            for c in components {
                let slot = &mut seen[(*c as usize).min(3)];
                if *slot {
                    ctx.error(expr.position, "cannot write to the same swizzle field more than once");
                    return false;
                }
                *slot = true;
            }
            assignable(ctx, base)
        }
        ExprKind::Poison => false,
        _ => {
            ctx.error(expr.position, "cannot assign to this expression");
            false
        }
    }
}

/// Verifies `expr` names writable storage and marks how it is used.
pub fn check_assignable(ctx: &mut Context, expr: &mut Expression, kind: RefKind) -> bool {
    if !assignable(ctx, expr) {
        return false;
    }
    expr.set_ref_kind(kind);
    true
}

fn constant_bool(expr: &Expression) -> Option<bool> {
    if !expr.ty.is_boolean() || !expr.ty.is_scalar() {
        return None;
    }
    expr.literal_value().map(|v| v != 0.0)
}

pub fn convert_binary(ctx: &mut Context, mut left: Expression, op: Operator, right: Expression) -> Expression {
    let position = left.position.join(right.position);
    if left.is_poison() || right.is_poison() {
        return Expression::poison(position);
    }
    if op.is_assignment() {
        let kind = if op == Operator::Eq { RefKind::Write } else { RefKind::ReadWrite };
        if !check_assignable(ctx, &mut left, kind) {
            return Expression::poison(position);
        }
    }
    let right = adapt_literal(right, &left.ty);
    let left = if op.is_assignment() { left } else { adapt_literal(left, &right.ty) };

    let base_op = op.remove_assignment();
    let Some((left_type, right_type, result_type)) = determine_binary_type(base_op, &left.ty, &right.ty) else {
        return type_mismatch(ctx, position, op, &left.ty, &right.ty);
    };
    if op.is_compound_assignment() && (left_type != left.ty || result_type != left.ty) {
        return type_mismatch(ctx, position, op, &left.ty, &right.ty);
    }
    let left = if op.is_assignment() { left } else { coerce(ctx, left, &left_type) };
    let right = coerce(ctx, right, &right_type);
    if left.is_poison() || right.is_poison() {
        return Expression::poison(position);
    }

    if ctx.settings.optimize {
        match (op, constant_bool(&left)) {
            (Operator::LogicalAnd, Some(true)) | (Operator::LogicalOr, Some(false)) => return right,
            (Operator::LogicalAnd, Some(false)) | (Operator::LogicalOr, Some(true)) => return left,
            _ => {}
        }
    }
    match fold_binary(position, &left, op, &right, &result_type) {
        Ok(Some(folded)) if ctx.settings.optimize => return folded,
        Ok(_) => {}
        Err(message) => {
            ctx.error(position, message);
            return Expression::poison(position);
        }
    }
    Expression::new(
        position,
        result_type,
        ExprKind::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        },
    )
}

pub fn convert_prefix(ctx: &mut Context, position: Position, op: Operator, mut operand: Expression) -> Expression {
    let position = position.join(operand.position);
    if operand.is_poison() {
        return operand;
    }
    let ty = operand.ty.clone();
    let valid = match op {
        Operator::Plus | Operator::Minus => ty.is_number(),
        Operator::LogicalNot => ty.is_boolean() && ty.is_scalar(),
        Operator::BitwiseNot => ty.is_integer() && !ty.is_matrix(),
        Operator::PlusPlus | Operator::MinusMinus => ty.is_number() && !ty.is_matrix(),
        _ => false,
    };
    if !valid {
        ctx.error(
            position,
            format!("'{}' cannot operate on '{}'", op.symbol(), ty.name),
        );
        return Expression::poison(position);
    }
    match op {
        Operator::Plus => return operand,
        Operator::PlusPlus | Operator::MinusMinus => {
            if !check_assignable(ctx, &mut operand, RefKind::ReadWrite) {
                return Expression::poison(position);
            }
        }
        _ => {
            // Negated literals always fold so that `-1` is a literal everywhere.
            if ctx.settings.optimize || (op == Operator::Minus && operand.is_literal()) {
                if let Some(folded) = fold_prefix(position, op, &operand) {
                    return folded;
                }
            }
        }
    }
    Expression::new(
        position,
        ty,
        ExprKind::Prefix {
            op,
            operand: Box::new(operand),
        },
    )
}

pub fn convert_postfix(ctx: &mut Context, mut operand: Expression, op: Operator, position: Position) -> Expression {
    let position = operand.position.join(position);
    if operand.is_poison() {
        return operand;
    }
    let ty = operand.ty.clone();
    if !ty.is_number() || ty.is_matrix() {
        ctx.error(
            position,
            format!("'{}' cannot operate on '{}'", op.symbol(), ty.name),
        );
        return Expression::poison(position);
    }
    if !check_assignable(ctx, &mut operand, RefKind::ReadWrite) {
        return Expression::poison(position);
    }
    Expression::new(
        position,
        ty,
        ExprKind::Postfix {
            op,
            operand: Box::new(operand),
        },
    )
}

pub fn convert_index(ctx: &mut Context, base: Expression, index: Expression, position: Position) -> Expression {
    let position = base.position.join(position);
    if base.is_poison() || index.is_poison() {
        return Expression::poison(position);
    }
    let base_type = base.ty.clone();
    let element = if base_type.is_array() || base_type.is_vector() {
        base_type.component_type()
    } else if base_type.is_matrix() {
        match base_type.component_type().to_compound(base_type.rows(), 1) {
            Some(column) => column,
            None => return Expression::poison(position),
        }
    } else {
        ctx.error(position, format!("expected array, but found '{}'", base_type.name));
        return Expression::poison(position);
    };

    let index = if index.ty.is_scalar() && index.ty.is_unsigned() {
        index
    } else {
        coerce(ctx, index, &builtin_types().int)
    };
    if index.is_poison() {
        return Expression::poison(position);
    }
    if let Some(i) = get_constant_int(&index) {
        let limit = if base_type.is_array() {
            base_type.array_size()
        } else {
            Some(base_type.columns())
        };
        let out_of_range = i < 0 || limit.map(|n| i >= n as i64).unwrap_or(false);
        if out_of_range {
            ctx.error(
                index.position,
                format!("index {} out of range for '{}'", i, base_type.name),
            );
            return Expression::poison(position);
        }
    }
    Expression::new(
        position,
        element,
        ExprKind::Index {
            base: Box::new(base),
            index: Box::new(index),
        },
    )
}

pub fn convert_field_access(ctx: &mut Context, base: Expression, field: &str, position: Position) -> Expression {
    let position = base.position.join(position);
    if base.is_poison() {
        return base;
    }
    if base.ty.is_struct() {
        if let Some(index) = base.ty.fields().iter().position(|f| f.name == field) {
            let ty = base.ty.fields()[index].ty.clone();
            return Expression::new(
                position,
                ty,
                ExprKind::FieldAccess {
                    base: Box::new(base),
                    field_index: index,
                },
            );
        }
    } else if base.ty.is_scalar() || base.ty.is_vector() {
        return convert_swizzle(ctx, base, field, position);
    }
    ctx.error(
        position,
        format!("type '{}' does not have a field named '{}'", base.ty.name, field),
    );
    Expression::poison(position)
}

/// A parsed swizzle mask entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MaskComponent {
    Slot(u8),
    Zero,
    One,
}

fn mask_component(c: char) -> Option<MaskComponent> {
    let component = match c {
        'x' | 'r' | 's' => MaskComponent::Slot(0),
        'y' | 'g' | 't' => MaskComponent::Slot(1),
        'z' | 'b' | 'p' => MaskComponent::Slot(2),
        'w' | 'a' | 'q' => MaskComponent::Slot(3),
        '0' => MaskComponent::Zero,
        '1' => MaskComponent::One,
        _ => return None,
    };
    Some(component)
}

fn make_swizzle(position: Position, base: Expression, components: Vec<u8>) -> Option<Expression> {
    let scalar = base.ty.component_type();
    let ty = scalar.to_compound(components.len(), 1)?;
    let identity = components.len() == base.ty.columns() && components.iter().enumerate().all(|(i, c)| i == *c as usize);
    if identity {
        return Some(base);
    }
    // Swizzles of swizzles collapse into one.
    if let ExprKind::Swizzle {
        base: inner,
        components: inner_components,
    } = base.kind
    {
        let composed: Vec<u8> = components
            .iter()
            .map(|c| inner_components.get(*c as usize).copied().unwrap_or(0))
            .collect();
        return make_swizzle(position, *inner, composed);
    }
    Some(Expression::new(
        position,
        ty,
        ExprKind::Swizzle {
            base: Box::new(base),
            components,
        },
    ))
}

/// Converts `base.mask`. Masks may name constant `0` and `1` components;
/// those build a constructor around the non-constant part.
pub fn convert_swizzle(ctx: &mut Context, base: Expression, mask: &str, position: Position) -> Expression {
    if mask.chars().count() > 4 {
        ctx.error(position, "too many components in swizzle mask");
        return Expression::poison(position);
    }
    let columns = base.ty.columns();
    let mut components = Vec::with_capacity(4);
    for c in mask.chars() {
        match mask_component(c) {
            Some(MaskComponent::Slot(n)) if (n as usize) < columns => components.push(MaskComponent::Slot(n)),
            Some(constant @ (MaskComponent::Zero | MaskComponent::One)) => components.push(constant),
            _ => {
                ctx.error(position, format!("invalid swizzle component '{}'", c));
                return Expression::poison(position);
            }
        }
    }
    if components.is_empty() {
        ctx.error(position, "invalid swizzle");
        return Expression::poison(position);
    }

    let scalar = base.ty.component_type();
    let slots: Vec<u8> = components
        .iter()
        .filter_map(|c| match c {
            MaskComponent::Slot(n) => Some(*n),
            _ => None,
        })
        .collect();
    if slots.len() == components.len() {
        return make_swizzle(position, base, slots).unwrap_or_else(|| Expression::poison(position));
    }
    // An all-constant mask still evaluates a base with side effects.
    let discarded_base = (slots.is_empty() && crate::analysis::has_side_effects(&base)).then(|| base.clone());

    // Evaluate the base once: compound(base.<slots>, constants...) then reorder.
    let mut arguments = Vec::new();
    if !slots.is_empty() {
        match make_swizzle(position, base, slots.clone()) {
            Some(swizzled) => arguments.push(swizzled),
            None => return Expression::poison(position),
        }
    }
    let mut order = Vec::with_capacity(components.len());
    let mut next_slot = 0u8;
    let mut next_constant = slots.len() as u8;
    for c in &components {
        match c {
            MaskComponent::Slot(_) => {
                order.push(next_slot);
                next_slot += 1;
            }
            MaskComponent::Zero | MaskComponent::One => {
                let value = if *c == MaskComponent::One { 1.0 } else { 0.0 };
                arguments.push(Expression::literal(
                    position,
                    cast_value(value, scalar.number_kind()),
                    scalar.clone(),
                ));
                order.push(next_constant);
                next_constant += 1;
            }
        }
    }
    let Some(ty) = scalar.to_compound(components.len(), 1) else {
        return Expression::poison(position);
    };
    let compound = if arguments.len() == 1 {
        arguments.remove(0)
    } else {
        Expression::new(position, ty, ExprKind::ConstructorCompound(arguments))
    };
    let mut result = make_swizzle(position, compound, order).unwrap_or_else(|| Expression::poison(position));
    if ctx.settings.optimize {
        if let Some(values) = get_constant_value(&result) {
            let ty = result.ty.clone();
            result = make_constant(position, &ty, &values);
        }
    }
    match discarded_base {
        Some(base) => Expression::new(
            position,
            result.ty.clone(),
            ExprKind::Binary {
                left: Box::new(base),
                op: Operator::Comma,
                right: Box::new(result),
            },
        ),
        None => result,
    }
}

pub fn convert_ternary(
    ctx: &mut Context,
    test: Expression,
    if_true: Expression,
    if_false: Expression,
    position: Position,
) -> Expression {
    let position = test.position.join(if_false.position).join(position);
    let test = coerce(ctx, test, &builtin_types().bool_);
    if test.is_poison() || if_true.is_poison() || if_false.is_poison() {
        return Expression::poison(position);
    }
    let if_false = adapt_literal(if_false, &if_true.ty);
    let if_true = adapt_literal(if_true, &if_false.ty);
    let Some((true_type, false_type, _)) = determine_binary_type(Operator::EqEq, &if_true.ty, &if_false.ty) else {
        ctx.error(
            position,
            format!(
                "ternary operator result mismatch: '{}', '{}'",
                if_true.ty.name, if_false.ty.name
            ),
        );
        return Expression::poison(position);
    };
    if true_type.is_or_contains_effect() {
        ctx.error(
            position,
            format!("ternary expression of opaque type '{}' not allowed", true_type.name),
        );
        return Expression::poison(position);
    }
    if ctx.strict_es2() && true_type.is_or_contains_array() {
        ctx.error(
            position,
            "ternary operator result may not be an array (or struct containing an array)",
        );
        return Expression::poison(position);
    }
    let if_true = coerce(ctx, if_true, &true_type);
    let if_false = coerce(ctx, if_false, &false_type);
    if ctx.settings.optimize {
        if let Some(value) = constant_bool(&test) {
            return if value { if_true } else { if_false };
        }
    }
    Expression::new(
        position,
        true_type,
        ExprKind::Ternary {
            test: Box::new(test),
            if_true: Box::new(if_true),
            if_false: Box::new(if_false),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_types() {
        let t = builtin_types();
        let float3 = &t.float_vecs[1];
        let (l, r, result) = determine_binary_type(Operator::Star, float3, &t.float).unwrap();
        assert_eq!((l.name.as_str(), r.name.as_str(), result.name.as_str()), ("float3", "float", "float3"));

        let mat = t.matrix(&t.float, 3, 2).unwrap();
        let (_, _, result) = determine_binary_type(Operator::Star, &mat, float3).unwrap();
        assert_eq!(result.name, "float2");
        assert!(determine_binary_type(Operator::Star, float3, &mat).is_none());

        let (_, _, result) = determine_binary_type(Operator::Lt, &t.int, &t.float).unwrap();
        assert_eq!(result.name, "bool");
        assert!(determine_binary_type(Operator::Lt, float3, float3).is_none());
        assert!(determine_binary_type(Operator::Percent, &t.float, &t.float).is_none());
        assert!(determine_binary_type(Operator::LogicalAnd, &t.int, &t.bool_).is_none());
    }

    #[test]
    fn test_precision_tie_prefers_float() {
        let t = builtin_types();
        let (_, _, result) = determine_binary_type(Operator::Plus, &t.half, &t.float).unwrap();
        assert_eq!(result.name, "float");
        let (_, _, result) = determine_binary_type(Operator::Plus, &t.float, &t.half).unwrap();
        assert_eq!(result.name, "float");
    }

    #[test]
    fn test_literal_adaptation() {
        let t = builtin_types();
        let one = Expression::literal(Position::default(), 1.0, t.int.clone());
        let adapted = adapt_literal(one, &t.uint_vecs[0]);
        assert_eq!(adapted.ty.name, "uint");
        assert_eq!(adapted.description(), "1u");

        let half = Expression::literal(Position::default(), 0.5, t.float.clone());
        assert_eq!(adapt_literal(half, &t.int).ty.name, "float");
    }
}
