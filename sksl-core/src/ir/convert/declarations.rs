use super::statements::{check_modifiers, convert_var_declaration, declare_parameter};
use crate::analysis::control_flow::can_exit_without_returning_value;
use crate::analysis::recursion::{detect_recursion, undefined_calls};
use crate::context::Context;
use crate::ir::constant::get_constant_int;
use crate::ir::expr::Expression;
use crate::ir::function::{FunctionDeclaration, FunctionDefinition};
use crate::ir::modifiers::{ModifierFlags, Modifiers};
use crate::ir::program::ProgramElement;
use crate::ir::stmt::{Statement, StmtKind};
use crate::ir::types::{Field, Type, TypeRef};
use crate::ir::variable::{Variable, VariableStorage};
use crate::position::Position;
use crate::settings::ProgramKind;
use crate::symbol_table::Symbol;
use std::collections::HashSet;
use std::sync::Arc;

const MAX_STRUCT_NESTING: usize = 8;

/// `base[size]` or `base[]`. Invalid sizes are reported and replaced with 1.
pub fn array_type(ctx: &mut Context, position: Position, base: &TypeRef, size: Option<Expression>) -> TypeRef {
    if base.is_array() {
        ctx.error(position, "multi-dimensional arrays are not supported");
        return base.clone();
    }
    if base.is_void() || base.is_or_contains_effect() {
        ctx.error(position, format!("type '{}' may not be used in an array", base.name));
        return Type::new_array(base, Some(1));
    }
    let Some(size) = size else {
        if !ctx.kind.allows_unsized_arrays() {
            ctx.error(position, "unsized arrays are not permitted here");
            return Type::new_array(base, Some(1));
        }
        return Type::new_array(base, None);
    };
    if size.is_poison() {
        return Type::new_array(base, Some(1));
    }
    if !size.ty.is_integer() || !size.ty.is_scalar() {
        ctx.error(size.position, "array size must be an integer");
        return Type::new_array(base, Some(1));
    }
    match get_constant_int(&size) {
        Some(n) if n <= 0 => {
            ctx.error(size.position, "array size must be positive");
            Type::new_array(base, Some(1))
        }
        Some(n) if n > i32::MAX as i64 => {
            ctx.error(size.position, "array size is too large");
            Type::new_array(base, Some(1))
        }
        Some(n) => Type::new_array(base, Some(n as u32)),
        None => {
            ctx.error(size.position, "array size must be a constant integer expression");
            Type::new_array(base, Some(1))
        }
    }
}

pub fn make_parameter(
    ctx: &mut Context,
    position: Position,
    modifiers: Modifiers,
    ty: TypeRef,
    name: &str,
) -> Option<Arc<Variable>> {
    check_modifiers(ctx, &modifiers, ModifierFlags::CONST | ModifierFlags::IN | ModifierFlags::OUT);
    if ty.is_void() {
        ctx.error(position, "parameters of type 'void' are not allowed");
        return None;
    }
    if ty.is_unsized_array() {
        ctx.error(position, "unsized arrays are not permitted here");
        return None;
    }
    if ty.is_or_contains_effect() && modifiers.is_out() {
        ctx.error(position, format!("parameters of type '{}' cannot be 'out'", ty.name));
        return None;
    }
    Some(Variable::new(
        name,
        ty,
        modifiers,
        VariableStorage::Parameter,
        position,
        ctx.is_builtin,
    ))
}

fn is_color(ty: &TypeRef) -> bool {
    ty.name == "half4" || ty.name == "float4"
}

fn check_main(ctx: &mut Context, position: Position, return_type: &TypeRef, parameters: &[Arc<Variable>]) -> bool {
    let param_types: Vec<&str> = parameters.iter().map(|p| p.ty.name.as_str()).collect();
    let is_coords = |name: &str| name == "float2";
    let is_color_name = |name: &str| name == "half4" || name == "float4";
    let (returns_ok, params_ok, returns_text, params_text) = match ctx.kind {
        ProgramKind::RuntimeShader => (
            is_color(return_type),
            param_types.is_empty() || matches!(param_types.as_slice(), [p] if is_coords(p)),
            "'half4' or 'float4'",
            "(float2 coords)",
        ),
        ProgramKind::RuntimeColorFilter => (
            is_color(return_type),
            matches!(param_types.as_slice(), [p] if is_color_name(p)),
            "'half4' or 'float4'",
            "(half4 color)",
        ),
        ProgramKind::RuntimeBlender => (
            is_color(return_type),
            matches!(param_types.as_slice(), [a, b] if is_color_name(a) && is_color_name(b)),
            "'half4' or 'float4'",
            "(half4 src, half4 dst)",
        ),
        ProgramKind::Fragment | ProgramKind::GraphiteFragment | ProgramKind::GraphiteFragmentES2 => (
            return_type.is_void() || is_color(return_type),
            if return_type.is_void() {
                param_types.is_empty()
            } else {
                param_types.len() <= 1 && param_types.iter().all(|p| is_coords(p))
            },
            "'void', 'half4' or 'float4'",
            "() or (float2 coords)",
        ),
        ProgramKind::Vertex
        | ProgramKind::GraphiteVertex
        | ProgramKind::GraphiteVertexES2
        | ProgramKind::Compute => (return_type.is_void(), param_types.is_empty(), "'void'", "()"),
        ProgramKind::Generic => (true, true, "", ""),
    };
    if !returns_ok {
        ctx.error(position, format!("'main' must return {}", returns_text));
        return false;
    }
    if !params_ok {
        ctx.error(position, format!("'main' parameters must be {}", params_text));
        return false;
    }
    if parameters.iter().any(|p| p.modifiers.flags.intersects(ModifierFlags::OUT)) {
        ctx.error(position, "'main' parameters may not be 'out'");
        return false;
    }
    true
}

fn has_definition(ctx: &Context, decl: &FunctionDeclaration) -> bool {
    let in_program = ctx.elements.iter().any(|e| match e {
        ProgramElement::Function(def) => def.declaration.id == decl.id,
        _ => false,
    });
    in_program
        || ctx
            .module
            .as_ref()
            .map(|m| m.find_definition(decl).is_some())
            .unwrap_or(false)
}

/// Declares a function signature. Returns the declaration, or `None` after
/// reporting an error. `is_definition` is true when a body follows.
pub fn declare_function(
    ctx: &mut Context,
    position: Position,
    modifiers: Modifiers,
    return_type: TypeRef,
    name: &str,
    parameters: Vec<Arc<Variable>>,
    is_definition: bool,
) -> Option<Arc<FunctionDeclaration>> {
    let permitted = if ctx.is_builtin {
        ModifierFlags::INLINE | ModifierFlags::NOINLINE | ModifierFlags::PURE
    } else {
        ModifierFlags::INLINE | ModifierFlags::NOINLINE
    };
    check_modifiers(ctx, &modifiers, permitted);
    if modifiers.flags.contains(ModifierFlags::INLINE | ModifierFlags::NOINLINE) {
        ctx.error(position, "functions cannot be both 'inline' and 'noinline'");
        return None;
    }
    if return_type.is_or_contains_effect() || return_type.is_unsized_array() {
        ctx.error(position, format!("functions may not return type '{}'", return_type.name));
        return None;
    }
    if ctx.strict_es2() && return_type.is_or_contains_array() {
        ctx.error(position, format!("functions may not return type '{}'", return_type.name));
        return None;
    }
    if name == "main" && !ctx.is_builtin && !check_main(ctx, position, &return_type, &parameters) {
        return None;
    }

    let decl = FunctionDeclaration::new(name, parameters, return_type, modifiers, ctx.is_builtin, position);
    match ctx.symbols.lookup(name) {
        Some(Symbol::Functions(existing)) => {
            for other in existing.iter().filter(|o| o.matches_signature(&decl)) {
                if other.return_type != decl.return_type {
                    ctx.error(
                        position,
                        format!(
                            "functions '{}' and '{}' differ only in return type",
                            decl.signature(),
                            other.signature()
                        ),
                    );
                    return None;
                }
                for (i, (a, b)) in decl.parameters.iter().zip(&other.parameters).enumerate() {
                    if a.modifiers.flags != b.modifiers.flags {
                        ctx.error(
                            position,
                            format!(
                                "modifiers on parameter {} differ between declaration and definition",
                                i + 1
                            ),
                        );
                        return None;
                    }
                }
                if !is_definition {
                    // A repeated prototype adds nothing new.
                    return Some(other.clone());
                }
                if has_definition(ctx, other) && !other.builtin {
                    ctx.error(position, format!("duplicate definition of '{}'", decl.signature()));
                    return None;
                }
                if !other.builtin {
                    ctx.symbols.replace_function(other, decl.clone());
                    return Some(decl);
                }
            }
        }
        Some(_) if ctx.symbols.is_defined_in_current_scope(name) => {
            ctx.error(position, format!("symbol '{}' was already defined", name));
            return None;
        }
        _ => {}
    }
    if let Err(message) = ctx.symbols.insert_function(decl.clone()) {
        ctx.error(position, message);
        return None;
    }
    Some(decl)
}

/// Opens the body scope of `decl` and makes its parameters visible.
pub fn start_function(ctx: &mut Context, decl: &Arc<FunctionDeclaration>) {
    ctx.current_function = Some(decl.clone());
    ctx.symbols.push_scope();
    for parameter in &decl.parameters {
        declare_parameter(ctx, parameter);
    }
}

/// Closes the body scope opened by `start_function` and records the definition.
pub fn finish_function(ctx: &mut Context, decl: Arc<FunctionDeclaration>, body: Statement) {
    ctx.symbols.pop_scope();
    ctx.current_function = None;
    if !decl.return_type.is_void() && can_exit_without_returning_value(&body) {
        ctx.error(
            decl.position,
            format!("function '{}' can exit without returning a value", decl.name),
        );
    }
    ctx.elements.push(ProgramElement::Function(Arc::new(FunctionDefinition {
        declaration: decl,
        body,
    })));
}

pub fn declare_prototype(ctx: &mut Context, decl: Arc<FunctionDeclaration>) {
    ctx.elements.push(ProgramElement::Prototype(decl));
}

fn check_fields(ctx: &mut Context, owner: &str, fields: &[Field], what: &str) -> bool {
    let mut names = HashSet::new();
    for field in fields {
        if !field.modifiers.flags.is_empty() && what == "struct" {
            for name in field.modifiers.flags.names() {
                ctx.error(field.position, format!("modifier '{}' is not permitted on a struct field", name));
            }
            return false;
        }
        if field.ty.is_void() {
            ctx.error(field.position, "type 'void' is not permitted in a struct");
            return false;
        }
        if field.ty.is_or_contains_effect() {
            ctx.error(
                field.position,
                format!("opaque type '{}' is not permitted in a {}", field.ty.name, what),
            );
            return false;
        }
        if field.ty.is_unsized_array() && what == "struct" {
            ctx.error(field.position, "unsized arrays are not permitted here");
            return false;
        }
        if !names.insert(field.name.clone()) {
            ctx.error(
                field.position,
                format!("field '{}' was already defined in the same {} ('{}')", field.name, what, owner),
            );
            return false;
        }
    }
    true
}

pub fn declare_struct(ctx: &mut Context, position: Position, name: &str, fields: Vec<Field>) -> Option<TypeRef> {
    if fields.is_empty() {
        ctx.error(position, format!("struct '{}' must contain at least one field", name));
        return None;
    }
    if !check_fields(ctx, name, &fields, "struct") {
        return None;
    }
    let ty = Type::new_struct(name, fields, false);
    if ty.struct_nesting_depth() > MAX_STRUCT_NESTING {
        ctx.error(position, format!("struct '{}' is too deeply nested", name));
        return None;
    }
    if let Err(message) = ctx.symbols.insert(name, Symbol::Type(ty.clone())) {
        ctx.error(position, message);
        return None;
    }
    ctx.elements.push(ProgramElement::StructDefinition {
        ty: ty.clone(),
        position,
    });
    Some(ty)
}

/// `modifiers Name { fields } [instance [size]];`
pub fn declare_interface_block(
    ctx: &mut Context,
    position: Position,
    modifiers: Modifiers,
    type_name: &str,
    fields: Vec<Field>,
    instance: Option<(String, Option<u32>)>,
) -> Option<Arc<Variable>> {
    if ctx.kind.is_runtime_effect() {
        ctx.error(position, "interface blocks are not allowed in this kind of program");
        return None;
    }
    if fields.is_empty() {
        ctx.error(
            position,
            format!("interface block '{}' must contain at least one member", type_name),
        );
        return None;
    }
    if !check_fields(ctx, type_name, &fields, "interface block") {
        return None;
    }
    check_modifiers(
        ctx,
        &modifiers,
        ModifierFlags::UNIFORM
            | ModifierFlags::IN
            | ModifierFlags::OUT
            | ModifierFlags::BUFFER
            | ModifierFlags::READONLY
            | ModifierFlags::WRITEONLY,
    );
    let block_type = Type::new_struct(type_name, fields, true);
    let (instance_name, ty) = match &instance {
        Some((name, Some(size))) => (name.clone(), Type::new_array(&block_type, Some(*size))),
        Some((name, None)) => (name.clone(), block_type.clone()),
        None => (String::new(), block_type.clone()),
    };
    let variable_name = if instance_name.is_empty() { type_name } else { instance_name.as_str() };
    let variable = Variable::new(
        variable_name,
        ty,
        modifiers,
        VariableStorage::InterfaceBlock,
        position,
        ctx.is_builtin,
    );
    if instance_name.is_empty() {
        for (field_index, field) in block_type.fields().iter().enumerate() {
            let symbol = Symbol::Field {
                owner: variable.clone(),
                field_index,
            };
            if let Err(message) = ctx.symbols.insert(&field.name, symbol) {
                ctx.error(field.position, message);
                return None;
            }
        }
    } else if let Err(message) = ctx.symbols.insert(&instance_name, Symbol::Variable(variable.clone())) {
        ctx.error(position, message);
        return None;
    }
    ctx.elements.push(ProgramElement::InterfaceBlock {
        variable: variable.clone(),
        type_name: type_name.to_string(),
        instance_name,
        position,
    });
    Some(variable)
}

/// Declares a global variable and records it as a program element.
pub fn declare_global_variable(
    ctx: &mut Context,
    position: Position,
    modifiers: Modifiers,
    ty: TypeRef,
    name: &str,
    value: Option<Expression>,
) {
    let stmt = convert_var_declaration(ctx, position, modifiers, ty, name, value, VariableStorage::Global);
    if matches!(stmt.kind, StmtKind::VarDeclaration { .. }) {
        ctx.elements.push(ProgramElement::GlobalVar(stmt));
    }
}

/// Whole-program checks that need every function: call cycles and calls to
/// functions that were declared but never defined.
pub fn finish_program(ctx: &mut Context) {
    if ctx.is_builtin {
        return;
    }
    let functions: Vec<Arc<FunctionDefinition>> = ctx
        .elements
        .iter()
        .filter_map(|e| match e {
            ProgramElement::Function(def) => Some(def.clone()),
            _ => None,
        })
        .collect();
    if let Some(decl) = detect_recursion(&functions) {
        ctx.error(decl.position, "potential recursion (function call cycle) not allowed");
    }
    let module = ctx.module.clone();
    for (position, decl) in undefined_calls(&functions, module.as_deref()) {
        ctx.error(position, format!("function '{}' is not defined", decl.signature()));
    }
}
