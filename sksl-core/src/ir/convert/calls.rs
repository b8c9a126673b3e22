use super::expressions::{check_assignable, coerce, coercion_cost};
use crate::context::Context;
use crate::ir::expr::{ExprKind, Expression, RefKind};
use crate::ir::function::FunctionDeclaration;
use crate::ir::modifiers::ModifierFlags;
use crate::ir::types::{builtin_types, EffectKind, TypeKind, TypeRef};
use crate::position::Position;
use std::sync::Arc;

/// Resolves a possibly generic parameter type against an argument. The first
/// generic parameter picks the member index; later generic parameters and
/// the return type reuse it.
fn resolve_type(ty: &TypeRef, argument: Option<&Expression>, generic_index: &mut Option<usize>) -> Option<TypeRef> {
    let TypeKind::Generic(members) = &ty.kind else {
        return Some(ty.clone());
    };
    if let Some(index) = *generic_index {
        return members.get(index).cloned();
    }
    let argument = argument?;
    let (index, _) = members
        .iter()
        .enumerate()
        .filter_map(|(i, m)| coercion_cost(argument, m).map(|cost| (i, cost)))
        .min_by_key(|(_, cost)| *cost)?;
    *generic_index = Some(index);
    members.get(index).cloned()
}

fn is_out_parameter(flags: ModifierFlags) -> bool {
    flags.contains(ModifierFlags::OUT)
}

/// Parameter types and return type of `function` when called with `arguments`.
fn resolve_signature(function: &FunctionDeclaration, arguments: &[Expression]) -> Option<(Vec<TypeRef>, TypeRef)> {
    let mut generic_index = None;
    let mut params = Vec::with_capacity(arguments.len());
    for (param, arg) in function.parameters.iter().zip(arguments) {
        params.push(resolve_type(&param.ty, Some(arg), &mut generic_index)?);
    }
    let return_type = resolve_type(&function.return_type, None, &mut generic_index)?;
    Some((params, return_type))
}

/// Total coercion cost of calling `function` with `arguments`.
fn call_cost(function: &FunctionDeclaration, arguments: &[Expression]) -> Option<u32> {
    if function.parameters.len() != arguments.len() {
        return None;
    }
    let (params, _) = resolve_signature(function, arguments)?;
    let mut total = 0;
    for ((param, ty), arg) in function.parameters.iter().zip(&params).zip(arguments) {
        if is_out_parameter(param.modifiers.flags) {
            if arg.ty != *ty {
                return None;
            }
            continue;
        }
        total += coercion_cost(arg, ty)?;
    }
    Some(total)
}

fn argument_list(arguments: &[Expression]) -> String {
    arguments
        .iter()
        .map(|a| a.ty.name.clone())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Calls the best overload among `functions`.
pub fn convert_function_call(
    ctx: &mut Context,
    position: Position,
    functions: &[Arc<FunctionDeclaration>],
    arguments: Vec<Expression>,
) -> Expression {
    if arguments.iter().any(Expression::is_poison) {
        return Expression::poison(position);
    }
    let chosen = if functions.len() == 1 {
        functions[0].clone()
    } else {
        let best = functions
            .iter()
            .filter_map(|f| call_cost(f, &arguments).map(|cost| (f, cost)))
            .min_by_key(|(_, cost)| *cost);
        match best {
            Some((f, _)) => f.clone(),
            None => {
                let name = functions.first().map(|f| f.name.as_str()).unwrap_or("");
                ctx.error(
                    position,
                    format!("no match for {}({})", name, argument_list(&arguments)),
                );
                return Expression::poison(position);
            }
        }
    };
    call(ctx, position, chosen, arguments)
}

fn call(ctx: &mut Context, position: Position, function: Arc<FunctionDeclaration>, arguments: Vec<Expression>) -> Expression {
    let expected = function.parameters.len();
    if expected != arguments.len() {
        ctx.error(
            position,
            format!(
                "call to '{}' expected {} argument{}, but found {}",
                function.name,
                expected,
                if expected == 1 { "" } else { "s" },
                arguments.len()
            ),
        );
        return Expression::poison(position);
    }
    if function.is_main() && !function.builtin {
        ctx.error(position, "call to 'main' is not allowed");
        return Expression::poison(position);
    }
    let Some((params, return_type)) = resolve_signature(&function, &arguments) else {
        ctx.error(
            position,
            format!("no match for {}({})", function.name, argument_list(&arguments)),
        );
        return Expression::poison(position);
    };

    let mut converted = Vec::with_capacity(arguments.len());
    for ((param, ty), mut arg) in function.parameters.iter().zip(&params).zip(arguments) {
        if is_out_parameter(param.modifiers.flags) {
            if arg.ty != *ty {
                ctx.error(
                    arg.position,
                    format!("expected '{}', but found '{}'", ty.name, arg.ty.name),
                );
                return Expression::poison(position);
            }
            if !check_assignable(ctx, &mut arg, RefKind::Pointer) {
                return Expression::poison(position);
            }
            converted.push(arg);
        } else {
            let arg = coerce(ctx, arg, ty);
            if arg.is_poison() {
                return Expression::poison(position);
            }
            converted.push(arg);
        }
    }
    Expression::new(
        position,
        return_type,
        ExprKind::FunctionCall {
            function,
            arguments: converted,
        },
    )
}

/// Parameter types of `child.eval(...)` for each child effect kind.
pub fn child_eval_parameters(kind: EffectKind) -> Vec<TypeRef> {
    let types = builtin_types();
    match kind {
        EffectKind::Shader => vec![types.float_vecs[0].clone()],
        EffectKind::ColorFilter => vec![types.half_vecs[2].clone()],
        EffectKind::Blender => vec![types.half_vecs[2].clone(), types.half_vecs[2].clone()],
    }
}

/// `base.name(arguments)`: `eval` on child effects and `length` on arrays.
pub fn convert_method_call(
    ctx: &mut Context,
    position: Position,
    base: Expression,
    name: &str,
    arguments: Vec<Expression>,
) -> Expression {
    if base.is_poison() || arguments.iter().any(Expression::is_poison) {
        return Expression::poison(position);
    }
    if let (Some(kind), "eval") = (base.ty.effect_kind(), name) {
        let ExprKind::VariableReference { variable, .. } = &base.kind else {
            ctx.error(position, "child effects may only be called directly");
            return Expression::poison(position);
        };
        let child = variable.clone();
        let params = child_eval_parameters(kind);
        if params.len() != arguments.len() {
            ctx.error(
                position,
                format!(
                    "call to 'eval' expected {} argument{}, but found {}",
                    params.len(),
                    if params.len() == 1 { "" } else { "s" },
                    arguments.len()
                ),
            );
            return Expression::poison(position);
        }
        let arguments: Vec<Expression> = arguments
            .into_iter()
            .zip(&params)
            .map(|(a, t)| coerce(ctx, a, t))
            .collect();
        if arguments.iter().any(Expression::is_poison) {
            return Expression::poison(position);
        }
        return Expression::new(
            position,
            builtin_types().half_vecs[2].clone(),
            ExprKind::ChildCall { child, arguments },
        );
    }
    if base.ty.is_array() && name == "length" && arguments.is_empty() {
        if let Some(size) = base.ty.array_size() {
            return Expression::literal(position, size as f64, builtin_types().int.clone());
        }
    }
    ctx.error(
        position,
        format!("type '{}' does not have a method named '{}'", base.ty.name, name),
    );
    Expression::poison(position)
}
