use super::expressions::coerce;
use crate::analysis::unroll::get_loop_unroll_info;
use crate::context::Context;
use crate::ir::constant::get_constant_int;
use crate::ir::expr::Expression;
use crate::ir::modifiers::{ModifierFlags, Modifiers};
use crate::ir::stmt::{Statement, StmtKind, SwitchCase};
use crate::ir::types::{builtin_types, TypeRef};
use crate::ir::variable::{Variable, VariableStorage};
use crate::position::Position;
use crate::symbol_table::Symbol;
use std::collections::HashSet;
use std::sync::Arc;

pub fn convert_expression_statement(expr: Expression) -> Statement {
    if expr.is_poison() {
        return Statement::nop(expr.position);
    }
    Statement::new(expr.position, StmtKind::Expression(expr))
}

fn permitted_modifiers(ctx: &Context, storage: VariableStorage) -> ModifierFlags {
    match storage {
        VariableStorage::Global | VariableStorage::InterfaceBlock => {
            if ctx.kind.is_runtime_effect() {
                ModifierFlags::CONST | ModifierFlags::UNIFORM
            } else if ctx.kind.is_compute() {
                ModifierFlags::CONST
                    | ModifierFlags::UNIFORM
                    | ModifierFlags::IN
                    | ModifierFlags::OUT
                    | ModifierFlags::WORKGROUP
                    | ModifierFlags::BUFFER
                    | ModifierFlags::READONLY
                    | ModifierFlags::WRITEONLY
            } else {
                ModifierFlags::CONST
                    | ModifierFlags::UNIFORM
                    | ModifierFlags::IN
                    | ModifierFlags::OUT
                    | ModifierFlags::FLAT
                    | ModifierFlags::NOPERSPECTIVE
                    | ModifierFlags::BUFFER
                    | ModifierFlags::READONLY
                    | ModifierFlags::WRITEONLY
            }
        }
        VariableStorage::Local => ModifierFlags::CONST,
        VariableStorage::Parameter => ModifierFlags::CONST | ModifierFlags::IN | ModifierFlags::OUT,
    }
}

/// Reports every flag in `modifiers` outside of `permitted`.
pub(crate) fn check_modifiers(ctx: &mut Context, modifiers: &Modifiers, permitted: ModifierFlags) {
    let mut disallowed = modifiers.flags;
    disallowed.remove(permitted);
    for name in disallowed.names() {
        ctx.error(modifiers.position, format!("'{}' is not permitted here", name));
    }
}

/// Declares one variable and converts its initializer. The symbol becomes
/// visible only after the initializer, so `float x = x;` reads an outer `x`.
#[allow(clippy::too_many_arguments)]
pub fn convert_var_declaration(
    ctx: &mut Context,
    position: Position,
    modifiers: Modifiers,
    ty: TypeRef,
    name: &str,
    value: Option<Expression>,
    storage: VariableStorage,
) -> Statement {
    check_modifiers(ctx, &modifiers, permitted_modifiers(ctx, storage));
    if ty.is_void() {
        ctx.error(position, "variables of type 'void' are not allowed");
        return Statement::nop(position);
    }
    if ty.is_or_contains_effect() {
        if storage != VariableStorage::Global {
            ctx.error(position, format!("variables of type '{}' must be global", ty.name));
            return Statement::nop(position);
        }
        if !modifiers.is_uniform() {
            ctx.error(position, format!("variables of type '{}' must be uniform", ty.name));
            return Statement::nop(position);
        }
    }
    if modifiers.is_uniform() && ctx.kind.is_runtime_effect() && contains_bool(&ty) {
        ctx.error(position, format!("variables of type '{}' may not be uniform", ty.name));
    }
    if ty.is_unsized_array() && storage == VariableStorage::Local {
        ctx.error(position, "unsized arrays are not permitted here");
        return Statement::nop(position);
    }

    let value = match value {
        Some(value) => {
            if modifiers.is_uniform() {
                ctx.error(value.position, "'uniform' variables cannot use initializer expressions");
                return Statement::nop(position);
            }
            if modifiers.flags.intersects(ModifierFlags::IN | ModifierFlags::OUT) && storage == VariableStorage::Global {
                ctx.error(value.position, "'in' and 'out' variables cannot use initializer expressions");
                return Statement::nop(position);
            }
            let value = coerce(ctx, value, &ty);
            if value.is_poison() {
                return Statement::nop(position);
            }
            Some(value)
        }
        None => None,
    };
    if modifiers.is_const() {
        match &value {
            None => {
                ctx.error(position, "'const' variables must be initialized");
                return Statement::nop(position);
            }
            Some(value) if !crate::analysis::is_constant_expression(value) => {
                ctx.error(value.position, "'const' variable initializer must be a constant expression");
                return Statement::nop(position);
            }
            Some(_) => {}
        }
    }

    let variable = Variable::new(name, ty, modifiers, storage, position, ctx.is_builtin);
    if let (true, Some(value)) = (variable.is_const(), value.as_ref()) {
        let _ = variable.const_value.set(value.clone());
    }
    if let Err(message) = ctx.symbols.insert(name, Symbol::Variable(variable.clone())) {
        ctx.error(position, message);
        return Statement::nop(position);
    }
    Statement::new(position, StmtKind::VarDeclaration { variable, value })
}

fn contains_bool(ty: &TypeRef) -> bool {
    if ty.is_array() {
        return contains_bool(&ty.component_type());
    }
    if ty.is_struct() {
        return ty.fields().iter().any(|f| contains_bool(&f.ty));
    }
    ty.is_boolean()
}

fn bool_test(ctx: &mut Context, test: Expression) -> Expression {
    coerce(ctx, test, &builtin_types().bool_)
}

pub fn convert_if(
    ctx: &mut Context,
    position: Position,
    test: Expression,
    if_true: Statement,
    if_false: Option<Statement>,
) -> Statement {
    let test = bool_test(ctx, test);
    if test.is_poison() {
        return Statement::nop(position);
    }
    if ctx.settings.optimize {
        if let Some(value) = test.literal_value() {
            return if value != 0.0 {
                if_true
            } else {
                if_false.unwrap_or_else(|| Statement::nop(position))
            };
        }
    }
    Statement::new(
        position,
        StmtKind::If {
            test,
            if_true: Box::new(if_true),
            if_false: if_false.map(Box::new),
        },
    )
}

pub fn convert_for(
    ctx: &mut Context,
    position: Position,
    initializer: Option<Statement>,
    test: Option<Expression>,
    next: Option<Expression>,
    body: Statement,
) -> Statement {
    let test = match test {
        Some(test) => {
            let test = bool_test(ctx, test);
            if test.is_poison() {
                return Statement::nop(position);
            }
            Some(test)
        }
        None => None,
    };
    if next.as_ref().map(Expression::is_poison).unwrap_or(false) {
        return Statement::nop(position);
    }
    let unroll_info = match get_loop_unroll_info(initializer.as_ref(), test.as_ref(), next.as_ref(), &body) {
        Ok(info) => Some(info),
        Err(message) => {
            if ctx.strict_es2() {
                ctx.error(position, message);
                return Statement::nop(position);
            }
            None
        }
    };
    Statement::new(
        position,
        StmtKind::For {
            initializer: initializer.map(Box::new),
            test,
            next,
            body: Box::new(body),
            unroll_info,
        },
    )
}

/// `while` loops are `for` loops without an initializer or next-expression.
pub fn convert_while(ctx: &mut Context, position: Position, test: Expression, body: Statement) -> Statement {
    if ctx.strict_es2() {
        ctx.error(position, "while loops are not supported");
        return Statement::nop(position);
    }
    let test = bool_test(ctx, test);
    if test.is_poison() {
        return Statement::nop(position);
    }
    Statement::new(
        position,
        StmtKind::For {
            initializer: None,
            test: Some(test),
            next: None,
            body: Box::new(body),
            unroll_info: None,
        },
    )
}

pub fn convert_do(ctx: &mut Context, position: Position, body: Statement, test: Expression) -> Statement {
    if ctx.strict_es2() {
        ctx.error(position, "do-while loops are not supported");
        return Statement::nop(position);
    }
    let test = bool_test(ctx, test);
    if test.is_poison() {
        return Statement::nop(position);
    }
    Statement::new(
        position,
        StmtKind::Do {
            body: Box::new(body),
            test,
        },
    )
}

/// A parsed `case`: its value expression (`None` for `default`), position and body.
pub type ParsedCase = (Option<Expression>, Position, Vec<Statement>);

pub fn convert_switch(ctx: &mut Context, position: Position, value: Expression, cases: Vec<ParsedCase>) -> Statement {
    if ctx.strict_es2() {
        ctx.error(position, "switch statements are not supported");
        return Statement::nop(position);
    }
    if value.is_poison() {
        return Statement::nop(position);
    }
    let value = if value.ty.is_scalar() && value.ty.is_integer() {
        value
    } else {
        coerce(ctx, value, &builtin_types().int)
    };
    if value.is_poison() {
        return Statement::nop(position);
    }

    let mut seen = HashSet::new();
    let mut converted = Vec::with_capacity(cases.len());
    for (case_value, case_position, statements) in cases {
        let case_value = match case_value {
            None => None,
            Some(expr) => {
                let expr = coerce(ctx, expr, &value.ty);
                if expr.is_poison() {
                    continue;
                }
                match get_constant_int(&expr) {
                    Some(v) => {
                        if !seen.insert(v) {
                            ctx.error(case_position, format!("duplicate case value '{}'", v));
                        }
                        Some(v)
                    }
                    None => {
                        ctx.error(expr.position, "case value must be a constant integer");
                        continue;
                    }
                }
            }
        };
        converted.push(SwitchCase {
            position: case_position,
            value: case_value,
            statements,
        });
    }
    Statement::new(
        position,
        StmtKind::Switch {
            value,
            cases: converted,
        },
    )
}

pub fn convert_return(ctx: &mut Context, position: Position, value: Option<Expression>) -> Statement {
    let Some(function) = ctx.current_function.clone() else {
        ctx.error(position, "return statement must be inside a function");
        return Statement::nop(position);
    };
    let return_type = &function.return_type;
    match value {
        Some(value) => {
            // A return whose value already failed still ends the path, so
            // the missing-return check stays quiet about it.
            if value.is_poison() {
                return Statement::new(position, StmtKind::Return(Some(value)));
            }
            if return_type.is_void() {
                ctx.error(value.position, "may not return a value from a void function");
                return Statement::nop(position);
            }
            let value = coerce(ctx, value, return_type);
            Statement::new(position, StmtKind::Return(Some(value)))
        }
        None => {
            if !return_type.is_void() {
                ctx.error(position, format!("expected function to return '{}'", return_type.name));
                return Statement::nop(position);
            }
            Statement::new(position, StmtKind::Return(None))
        }
    }
}

pub fn convert_break(ctx: &mut Context, position: Position) -> Statement {
    if !ctx.can_break() {
        ctx.error(position, "break statement must be inside a loop or switch");
        return Statement::nop(position);
    }
    Statement::new(position, StmtKind::Break)
}

pub fn convert_continue(ctx: &mut Context, position: Position) -> Statement {
    if !ctx.in_loop() {
        ctx.error(position, "continue statement must be inside a loop");
        return Statement::nop(position);
    }
    Statement::new(position, StmtKind::Continue)
}

pub fn convert_discard(ctx: &mut Context, position: Position) -> Statement {
    if !ctx.kind.is_fragment() {
        ctx.error(position, "discard statement is only permitted in fragment shaders");
        return Statement::nop(position);
    }
    Statement::new(position, StmtKind::Discard)
}

/// Registers a parameter symbol inside a function body scope.
pub(crate) fn declare_parameter(ctx: &mut Context, parameter: &Arc<Variable>) {
    if parameter.name.is_empty() {
        return;
    }
    if let Err(message) = ctx
        .symbols
        .insert(&parameter.name, Symbol::Variable(parameter.clone()))
    {
        ctx.error(parameter.position, message);
    }
}
