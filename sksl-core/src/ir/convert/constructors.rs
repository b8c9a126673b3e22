use super::expressions::{coerce, make_cast};
use crate::context::Context;
use crate::ir::constant::{get_constant_value, make_constant};
use crate::ir::expr::{ExprKind, Expression};
use crate::ir::types::{Type, TypeRef};
use crate::position::Position;

fn invalid_count(ctx: &mut Context, position: Position, ty: &TypeRef, what: &str, expected: usize, found: usize) -> Expression {
    ctx.error(
        position,
        format!(
            "invalid arguments to '{}' constructor (expected {} {}, but found {})",
            ty.name, expected, what, found
        ),
    );
    Expression::poison(position)
}

/// Folds a constructor whose arguments are all constant.
fn fold(ctx: &Context, expr: Expression) -> Expression {
    if !ctx.settings.optimize {
        return expr;
    }
    match get_constant_value(&expr) {
        Some(values) => {
            let ty = expr.ty.clone();
            make_constant(expr.position, &ty, &values)
        }
        None => expr,
    }
}

/// `T(args...)` for every constructible type.
pub fn convert_constructor(ctx: &mut Context, position: Position, ty: TypeRef, arguments: Vec<Expression>) -> Expression {
    if arguments.iter().any(Expression::is_poison) || ty.is_poison() {
        return Expression::poison(position);
    }
    if ty.is_array() {
        return convert_array(ctx, position, ty, arguments);
    }
    if ty.is_struct() && !ty.is_interface_block() && !ty.is_or_contains_effect() {
        return convert_struct(ctx, position, ty, arguments);
    }
    if ty.is_scalar() || ty.is_vector() || ty.is_matrix() {
        if arguments.is_empty() {
            return invalid_count(ctx, position, &ty, "scalars", ty.slot_count(), 0);
        }
        if arguments.len() == 1 {
            if let Some(expr) = convert_single(ctx, position, &ty, &arguments[0]) {
                return expr;
            }
        }
        return convert_compound(ctx, position, ty, arguments);
    }
    ctx.error(position, format!("cannot construct '{}'", ty.name));
    Expression::poison(position)
}

fn convert_array(ctx: &mut Context, position: Position, ty: TypeRef, arguments: Vec<Expression>) -> Expression {
    if ctx.strict_es2() {
        ctx.error(position, format!("construction of array type '{}' is not supported", ty.name));
        return Expression::poison(position);
    }
    let element = ty.component_type();
    let ty = match ty.array_size() {
        Some(n) if n != arguments.len() => {
            return invalid_count(ctx, position, &ty, "elements", n, arguments.len());
        }
        Some(_) => ty,
        None => Type::new_array(&element, Some(arguments.len() as u32)),
    };
    let arguments: Vec<Expression> = arguments.into_iter().map(|a| coerce(ctx, a, &element)).collect();
    if arguments.iter().any(Expression::is_poison) {
        return Expression::poison(position);
    }
    fold(ctx, Expression::new(position, ty, ExprKind::ConstructorArray(arguments)))
}

fn convert_struct(ctx: &mut Context, position: Position, ty: TypeRef, arguments: Vec<Expression>) -> Expression {
    let field_types: Vec<TypeRef> = ty.fields().iter().map(|f| f.ty.clone()).collect();
    if field_types.len() != arguments.len() {
        return invalid_count(ctx, position, &ty, "elements", field_types.len(), arguments.len());
    }
    let arguments: Vec<Expression> = arguments
        .into_iter()
        .zip(&field_types)
        .map(|(a, t)| coerce(ctx, a, t))
        .collect();
    if arguments.iter().any(Expression::is_poison) {
        return Expression::poison(position);
    }
    fold(ctx, Expression::new(position, ty, ExprKind::ConstructorStruct(arguments)))
}

/// Single-argument constructors: casts, splats, diagonal matrices and matrix
/// resizes. Returns `None` when the argument should be treated as a compound
/// constructor instead.
fn convert_single(ctx: &mut Context, position: Position, ty: &TypeRef, arg: &Expression) -> Option<Expression> {
    let arg_ty = &arg.ty;
    if !arg_ty.is_scalar() && !arg_ty.is_vector() && !arg_ty.is_matrix() {
        return None;
    }
    let component = ty.component_type();
    if ty.is_scalar() {
        if !arg_ty.is_scalar() {
            return None;
        }
        let mut expr = if arg_ty == ty { arg.clone() } else { make_cast(arg.clone(), ty) };
        expr.position = position;
        return Some(expr);
    }
    if arg_ty.is_scalar() {
        let scalar = if *arg_ty == component { arg.clone() } else { make_cast(arg.clone(), &component) };
        let kind = if ty.is_vector() {
            ExprKind::ConstructorSplat(Box::new(scalar))
        } else {
            ExprKind::ConstructorDiagonalMatrix(Box::new(scalar))
        };
        return Some(fold(ctx, Expression::new(position, ty.clone(), kind)));
    }
    if arg_ty.same_shape(ty) {
        if arg_ty == ty {
            let mut expr = arg.clone();
            expr.position = position;
            return Some(expr);
        }
        let mut expr = make_cast(arg.clone(), ty);
        expr.position = position;
        return Some(expr);
    }
    if arg_ty.is_matrix() && ty.is_matrix() {
        let source_ty = component.to_compound(arg_ty.columns(), arg_ty.rows())?;
        let source = if *arg_ty == source_ty { arg.clone() } else { make_cast(arg.clone(), &source_ty) };
        let expr = Expression::new(position, ty.clone(), ExprKind::ConstructorMatrixResize(Box::new(source)));
        return Some(fold(ctx, expr));
    }
    None
}

/// Vectors and matrices assembled from a flat list of scalars, vectors and
/// matrices whose slot counts add up to the target's.
fn convert_compound(ctx: &mut Context, position: Position, ty: TypeRef, arguments: Vec<Expression>) -> Expression {
    let component = ty.component_type();
    let mut total = 0;
    let mut converted = Vec::with_capacity(arguments.len());
    for arg in arguments {
        let arg_ty = arg.ty.clone();
        if !arg_ty.is_scalar() && !arg_ty.is_vector() && !arg_ty.is_matrix() {
            ctx.error(
                arg.position,
                format!("'{}' is not a valid parameter to '{}' constructor", arg_ty.name, ty.name),
            );
            return Expression::poison(position);
        }
        // Matrices only feed matrices or a four-component vector.
        if arg_ty.is_matrix() && !ty.is_matrix() && ty.slot_count() != arg_ty.slot_count() {
            ctx.error(
                arg.position,
                format!("'{}' is not a valid parameter to '{}' constructor", arg_ty.name, ty.name),
            );
            return Expression::poison(position);
        }
        total += arg_ty.slot_count();
        let target = match component.to_compound(arg_ty.columns(), arg_ty.rows()) {
            Some(t) => t,
            None => return Expression::poison(position),
        };
        converted.push(if target == arg_ty { arg } else { make_cast(arg, &target) });
    }
    if total != ty.slot_count() {
        return invalid_count(ctx, position, &ty, "scalars", ty.slot_count(), total);
    }
    fold(ctx, Expression::new(position, ty, ExprKind::ConstructorCompound(converted)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diags::{DiagnosticCollector, ErrorSink};
    use crate::ir::types::builtin_types;
    use crate::settings::{ProgramKind, Settings};

    fn lit(v: f64, ty: &TypeRef) -> Expression {
        Expression::literal(Position::default(), v, ty.clone())
    }

    #[test]
    fn test_constructor_shapes() {
        let t = builtin_types();
        let mut collector = DiagnosticCollector::new();
        let mut ctx = Context::new(
            ProgramKind::RuntimeShader,
            Settings {
                optimize: false,
                ..Settings::default()
            },
            None,
            false,
            ErrorSink::new(&mut collector),
        );
        let float4 = t.float_vecs[2].clone();
        let splat = convert_constructor(&mut ctx, Position::default(), float4.clone(), vec![lit(1.0, &t.int)]);
        assert!(matches!(splat.kind, ExprKind::ConstructorSplat(_)));
        assert_eq!(splat.description(), "float4(1.0)");

        let mat = t.matrix(&t.float, 2, 2).unwrap();
        let diag = convert_constructor(&mut ctx, Position::default(), mat, vec![lit(2.0, &t.float)]);
        assert!(matches!(diag.kind, ExprKind::ConstructorDiagonalMatrix(_)));

        let short = convert_constructor(
            &mut ctx,
            Position::default(),
            float4,
            vec![lit(1.0, &t.float), lit(2.0, &t.float)],
        );
        assert!(short.is_poison());
        drop(ctx);
        assert_eq!(
            collector.diagnostics()[0].message,
            "invalid arguments to 'float4' constructor (expected 4 scalars, but found 2)"
        );
    }
}
