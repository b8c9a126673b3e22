use super::function::FunctionDeclaration;
use super::operator::{Operator, Precedence};
use super::types::{builtin_types, TypeRef};
use super::variable::Variable;
use crate::position::Position;
use std::sync::Arc;

/// How a variable reference uses its variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefKind {
    Read,
    Write,
    ReadWrite,
    /// Passed to an `out` parameter; written by the callee.
    Pointer,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    /// Numeric and boolean literals. Integers and booleans are stored exactly
    /// in the `f64`; booleans are 0 or 1.
    Literal(f64),
    VariableReference {
        variable: Arc<Variable>,
        ref_kind: RefKind,
    },
    Binary {
        left: Box<Expression>,
        op: Operator,
        right: Box<Expression>,
    },
    Prefix {
        op: Operator,
        operand: Box<Expression>,
    },
    Postfix {
        op: Operator,
        operand: Box<Expression>,
    },
    FieldAccess {
        base: Box<Expression>,
        field_index: usize,
    },
    Index {
        base: Box<Expression>,
        index: Box<Expression>,
    },
    /// Components are 0..=3 (x, y, z, w).
    Swizzle {
        base: Box<Expression>,
        components: Vec<u8>,
    },
    Ternary {
        test: Box<Expression>,
        if_true: Box<Expression>,
        if_false: Box<Expression>,
    },
    FunctionCall {
        function: Arc<FunctionDeclaration>,
        arguments: Vec<Expression>,
    },
    /// `child.eval(...)` on a shader, color filter or blender.
    ChildCall {
        child: Arc<Variable>,
        arguments: Vec<Expression>,
    },
    /// Scalar or vector cast to a different number kind of the same shape.
    ConstructorCast(Box<Expression>),
    /// Scalar replicated into every component of a vector.
    ConstructorSplat(Box<Expression>),
    /// Scalar placed on the diagonal of a matrix.
    ConstructorDiagonalMatrix(Box<Expression>),
    /// Matrix resized to a matrix of different dimensions.
    ConstructorMatrixResize(Box<Expression>),
    /// Vector or matrix built from a flat list of scalars and vectors.
    ConstructorCompound(Vec<Expression>),
    ConstructorArray(Vec<Expression>),
    ConstructorStruct(Vec<Expression>),
    /// Stands in for an expression that failed to type-check.
    Poison,
}

#[derive(Debug, Clone)]
pub struct Expression {
    pub position: Position,
    pub ty: TypeRef,
    pub kind: ExprKind,
}

fn swizzle_letter(component: u8) -> char {
    match component {
        0 => 'x',
        1 => 'y',
        2 => 'z',
        _ => 'w',
    }
}

fn literal_text(value: f64, ty: &TypeRef) -> String {
    if ty.is_boolean() {
        return if value != 0.0 { "true" } else { "false" }.to_string();
    }
    if ty.is_float() {
        return format!("{:?}", value);
    }
    if ty.is_unsigned() {
        return format!("{}u", value as i64);
    }
    format!("{}", value as i64)
}

impl Expression {
    pub fn new(position: Position, ty: TypeRef, kind: ExprKind) -> Expression {
        Expression { position, ty, kind }
    }

    pub fn literal(position: Position, value: f64, ty: TypeRef) -> Expression {
        Expression::new(position, ty, ExprKind::Literal(value))
    }

    pub fn bool_literal(position: Position, value: bool) -> Expression {
        Expression::literal(position, if value { 1.0 } else { 0.0 }, builtin_types().bool_.clone())
    }

    pub fn poison(position: Position) -> Expression {
        Expression::new(position, builtin_types().poison.clone(), ExprKind::Poison)
    }

    pub fn variable_reference(position: Position, variable: Arc<Variable>, ref_kind: RefKind) -> Expression {
        let ty = variable.ty.clone();
        Expression::new(position, ty, ExprKind::VariableReference { variable, ref_kind })
    }

    pub fn is_literal(&self) -> bool {
        matches!(self.kind, ExprKind::Literal(_))
    }

    pub fn literal_value(&self) -> Option<f64> {
        match self.kind {
            ExprKind::Literal(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_poison(&self) -> bool {
        matches!(self.kind, ExprKind::Poison)
    }

    pub fn is_constructor(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::ConstructorCast(_)
                | ExprKind::ConstructorSplat(_)
                | ExprKind::ConstructorDiagonalMatrix(_)
                | ExprKind::ConstructorMatrixResize(_)
                | ExprKind::ConstructorCompound(_)
                | ExprKind::ConstructorArray(_)
                | ExprKind::ConstructorStruct(_)
        )
    }

    /// Arguments of a constructor in source order, or an empty slice.
    pub fn constructor_arguments(&self) -> &[Expression] {
        match &self.kind {
            ExprKind::ConstructorCast(arg)
            | ExprKind::ConstructorSplat(arg)
            | ExprKind::ConstructorDiagonalMatrix(arg)
            | ExprKind::ConstructorMatrixResize(arg) => std::slice::from_ref(arg.as_ref()),
            ExprKind::ConstructorCompound(args)
            | ExprKind::ConstructorArray(args)
            | ExprKind::ConstructorStruct(args) => args,
            _ => &[],
        }
    }

    /// The variable a (possibly field-, index- or swizzle-qualified) reference bottoms out at.
    pub fn base_variable(&self) -> Option<&Arc<Variable>> {
        match &self.kind {
            ExprKind::VariableReference { variable, .. } => Some(variable),
            ExprKind::FieldAccess { base, .. } | ExprKind::Index { base, .. } | ExprKind::Swizzle { base, .. } => {
                base.base_variable()
            }
            _ => None,
        }
    }

    /// Marks the variable reference at the root of an assignable expression.
    pub fn set_ref_kind(&mut self, kind: RefKind) {
        match &mut self.kind {
            ExprKind::VariableReference { ref_kind, .. } => *ref_kind = kind,
            ExprKind::FieldAccess { base, .. } | ExprKind::Index { base, .. } | ExprKind::Swizzle { base, .. } => {
                base.set_ref_kind(kind)
            }
            _ => {}
        }
    }

    pub fn description(&self) -> String {
        self.description_at(Precedence::TopLevel)
    }

    /// Source text for this expression, parenthesized when it binds more
    /// loosely than `parent`.
    pub fn description_at(&self, parent: Precedence) -> String {
        let list = |args: &[Expression]| {
            args.iter()
                .map(|a| a.description_at(Precedence::Sequence))
                .collect::<Vec<_>>()
                .join(", ")
        };
        match &self.kind {
            ExprKind::Literal(v) => {
                let text = literal_text(*v, &self.ty);
                if text.starts_with('-') && parent <= Precedence::Prefix {
                    format!("({})", text)
                } else {
                    text
                }
            }
            ExprKind::VariableReference { variable, .. } => variable.name.clone(),
            ExprKind::Binary { left, op, right } => {
                let precedence = op.precedence();
                let needs_parens = precedence >= parent;
                let text = format!(
                    "{} {} {}",
                    left.description_at(precedence),
                    op.symbol(),
                    right.description_at(precedence)
                );
                if needs_parens {
                    format!("({})", text)
                } else {
                    text
                }
            }
            ExprKind::Prefix { op, operand } => {
                let text = format!("{}{}", op.symbol(), operand.description_at(Precedence::Prefix));
                if Precedence::Prefix >= parent {
                    format!("({})", text)
                } else {
                    text
                }
            }
            ExprKind::Postfix { op, operand } => {
                let text = format!("{}{}", operand.description_at(Precedence::Postfix), op.symbol());
                if Precedence::Postfix >= parent {
                    format!("({})", text)
                } else {
                    text
                }
            }
            ExprKind::FieldAccess { base, field_index } => {
                let name = base
                    .ty
                    .fields()
                    .get(*field_index)
                    .map(|f| f.name.clone())
                    .unwrap_or_default();
                format!("{}.{}", base.description_at(Precedence::Postfix), name)
            }
            ExprKind::Index { base, index } => format!(
                "{}[{}]",
                base.description_at(Precedence::Postfix),
                index.description()
            ),
            ExprKind::Swizzle { base, components } => {
                let mask: String = components.iter().map(|c| swizzle_letter(*c)).collect();
                format!("{}.{}", base.description_at(Precedence::Postfix), mask)
            }
            ExprKind::Ternary {
                test,
                if_true,
                if_false,
            } => {
                let text = format!(
                    "{} ? {} : {}",
                    test.description_at(Precedence::Ternary),
                    if_true.description_at(Precedence::Ternary),
                    if_false.description_at(Precedence::Ternary)
                );
                if Precedence::Ternary >= parent {
                    format!("({})", text)
                } else {
                    text
                }
            }
            ExprKind::FunctionCall { function, arguments } => {
                format!("{}({})", function.name, list(arguments))
            }
            ExprKind::ChildCall { child, arguments } => format!("{}.eval({})", child.name, list(arguments)),
            ExprKind::ConstructorCast(_)
            | ExprKind::ConstructorSplat(_)
            | ExprKind::ConstructorDiagonalMatrix(_)
            | ExprKind::ConstructorMatrixResize(_)
            | ExprKind::ConstructorCompound(_)
            | ExprKind::ConstructorArray(_)
            | ExprKind::ConstructorStruct(_) => {
                format!("{}({})", self.ty.name, list(self.constructor_arguments()))
            }
            ExprKind::Poison => "<POISON>".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_text() {
        let t = builtin_types();
        assert_eq!(Expression::literal(Position::default(), 1.0, t.float.clone()).description(), "1.0");
        assert_eq!(Expression::literal(Position::default(), 7.0, t.uint.clone()).description(), "7u");
        assert_eq!(Expression::bool_literal(Position::default(), true).description(), "true");
    }

    #[test]
    fn test_binary_parenthesization() {
        let t = builtin_types();
        let lit = |v: f64| Box::new(Expression::literal(Position::default(), v, t.int.clone()));
        let sum = Expression::new(
            Position::default(),
            t.int.clone(),
            ExprKind::Binary {
                left: lit(1.0),
                op: Operator::Plus,
                right: lit(2.0),
            },
        );
        let product = Expression::new(
            Position::default(),
            t.int.clone(),
            ExprKind::Binary {
                left: Box::new(sum),
                op: Operator::Star,
                right: lit(3.0),
            },
        );
        assert_eq!(product.description(), "(1 + 2) * 3");
    }
}
