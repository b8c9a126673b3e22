use super::lvalue::LValue;
use super::slots::{constant_bits, leaf_kinds, literal_bits};
use super::Generator;
use crate::analysis::{has_side_effects, is_trivial_expression};
use crate::bail_unsupported;
use crate::error::Result;
use crate::ir::constant::get_constant_value;
use crate::ir::types::EffectKind;
use crate::ir::{ExprKind, Expression, FunctionDeclaration, ModifierFlags, NumberKind, Operator, Type, Variable};
use crate::rp::builder::{BinaryOp, NumType, SlotRange, TernaryOp, UnaryOp};
use std::sync::Arc;

const FLOAT_SIGN_BIT: u32 = 0x8000_0000;

pub(super) fn num_type(ty: &Type) -> Result<NumType> {
    num_type_of(ty.number_kind(), ty)
}

fn num_type_of(kind: NumberKind, ty: &Type) -> Result<NumType> {
    Ok(match kind {
        NumberKind::Float => NumType::Float,
        NumberKind::Signed | NumberKind::Boolean => NumType::Int,
        NumberKind::Unsigned => NumType::Uint,
        NumberKind::Nonnumeric => bail_unsupported!("no arithmetic on type '{}'", ty),
    })
}

/// Bits of the value one in a slot of `kind`.
pub(super) fn one_bits(kind: NumberKind) -> u32 {
    literal_bits(1.0, kind)
}

/// Matrix shape used by `matrix_multiply`; vectors are a row on the left and
/// a column on the right.
fn matrix_shape(ty: &Type, left: bool) -> (usize, usize) {
    if ty.is_matrix() {
        (ty.columns(), ty.rows())
    } else if left {
        (ty.slot_count(), 1)
    } else {
        (1, ty.slot_count())
    }
}

fn is_matrix_multiply(left: &Type, right: &Type) -> bool {
    (left.is_matrix() || right.is_matrix()) && !left.is_scalar() && !right.is_scalar()
}

impl<'a> Generator<'a> {
    pub(super) fn push_expression(&mut self, expr: &Expression) -> Result<()> {
        if expr.is_constructor() && self.program.settings.optimize {
            if let Some(values) = get_constant_value(expr) {
                for bits in constant_bits(&expr.ty, &values) {
                    self.builder.push_constant_bits(bits, 1);
                }
                return Ok(());
            }
        }
        match &expr.kind {
            ExprKind::Literal(value) => {
                self.builder.push_constant_bits(literal_bits(*value, expr.ty.number_kind()), 1);
                Ok(())
            }
            ExprKind::VariableReference { variable, .. } => self.push_variable(variable),
            ExprKind::Binary { left, op, right } => self.push_binary(expr, left, *op, right),
            ExprKind::Prefix { op, operand } => self.push_prefix(*op, operand),
            ExprKind::Postfix { op, operand } => self.push_postfix(*op, operand),
            ExprKind::FieldAccess { .. } | ExprKind::Index { .. } => self.push_through_lvalue(expr),
            ExprKind::Swizzle { base, components } => {
                if names_storage(base) {
                    return self.push_through_lvalue(expr);
                }
                self.push_expression(base)?;
                self.builder.swizzle(base.ty.slot_count(), components);
                Ok(())
            }
            ExprKind::Ternary {
                test,
                if_true,
                if_false,
            } => self.push_ternary(expr, test, if_true, if_false),
            ExprKind::FunctionCall { function, arguments } => match function.intrinsic {
                Some(kind) => self.push_intrinsic(kind, expr, arguments),
                None => self.push_function_call(function, arguments),
            },
            ExprKind::ChildCall { child, arguments } => self.push_child_call(child, arguments),
            ExprKind::ConstructorCast(arg) => {
                self.push_expression(arg)?;
                self.push_cast(arg.ty.number_kind(), expr.ty.number_kind(), expr.ty.slot_count())
            }
            ExprKind::ConstructorSplat(arg) => {
                self.push_expression(arg)?;
                self.builder.push_duplicates(expr.ty.slot_count().saturating_sub(1));
                Ok(())
            }
            ExprKind::ConstructorDiagonalMatrix(arg) => {
                self.push_expression(arg)?;
                self.builder.diagonal_matrix(expr.ty.columns(), expr.ty.rows());
                Ok(())
            }
            ExprKind::ConstructorMatrixResize(arg) => {
                self.push_expression(arg)?;
                self.builder
                    .matrix_resize((arg.ty.columns(), arg.ty.rows()), (expr.ty.columns(), expr.ty.rows()));
                Ok(())
            }
            ExprKind::ConstructorCompound(args) | ExprKind::ConstructorArray(args) | ExprKind::ConstructorStruct(args) => {
                args.iter().try_for_each(|arg| self.push_expression(arg))
            }
            ExprKind::Poison => bail_unsupported!("invalid expression"),
        }
    }

    fn push_through_lvalue(&mut self, expr: &Expression) -> Result<()> {
        let lvalue = self.make_lvalue(expr)?;
        self.push_lvalue(&lvalue)?;
        self.release_lvalue(lvalue)
    }

    fn push_variable(&mut self, variable: &Arc<Variable>) -> Result<()> {
        if Self::is_frag_coord(variable) {
            self.builder.push_device_xy01();
            return Ok(());
        }
        if let Some(&range) = self.immutable_vars.get(&variable.id) {
            // Single values go back to literals so later ops can fold them.
            if range.count == 1 {
                if let Some(bits) = self.immutables.bits(range.index) {
                    self.builder.push_constant_bits(bits, 1);
                    return Ok(());
                }
            }
            self.builder.push_immutable(range);
            return Ok(());
        }
        let lvalue = self.variable_lvalue(variable)?;
        self.push_lvalue(&lvalue)
    }

    /// Pushes `expr`, repeating a scalar until it fills `count` slots.
    pub(super) fn push_splatted(&mut self, expr: &Expression, count: usize) -> Result<()> {
        self.push_expression(expr)?;
        if expr.ty.slot_count() == 1 && count > 1 {
            self.builder.push_duplicates(count - 1);
        }
        Ok(())
    }

    fn push_binary(&mut self, expr: &Expression, left: &Expression, op: Operator, right: &Expression) -> Result<()> {
        match op {
            Operator::Comma => {
                self.push_expression(left)?;
                self.builder.discard_stack(left.ty.slot_count());
                self.push_expression(right)
            }
            Operator::Eq => {
                let lvalue = self.make_lvalue(left)?;
                self.push_expression(right)?;
                self.store_lvalue(&lvalue)?;
                self.release_lvalue(lvalue)
            }
            Operator::PlusEq
            | Operator::MinusEq
            | Operator::StarEq
            | Operator::SlashEq
            | Operator::PercentEq
            | Operator::ShlEq
            | Operator::ShrEq
            | Operator::BitwiseAndEq
            | Operator::BitwiseOrEq
            | Operator::BitwiseXorEq => {
                let lvalue = self.make_lvalue(left)?;
                self.push_lvalue(&lvalue)?;
                self.push_arithmetic_rhs(op.remove_assignment(), &left.ty, right, &left.ty)?;
                self.store_lvalue(&lvalue)?;
                self.release_lvalue(lvalue)
            }
            Operator::LogicalAnd | Operator::LogicalOr if has_side_effects(right) => {
                // Short-circuit: the right side only runs in lanes that need it.
                let (if_true, if_false) = if op == Operator::LogicalAnd {
                    (right.clone(), Expression::bool_literal(expr.position, false))
                } else {
                    (Expression::bool_literal(expr.position, true), right.clone())
                };
                let ternary = Expression::new(
                    expr.position,
                    expr.ty.clone(),
                    ExprKind::Ternary {
                        test: Box::new(left.clone()),
                        if_true: Box::new(if_true),
                        if_false: Box::new(if_false),
                    },
                );
                self.push_expression(&ternary)
            }
            Operator::LogicalAnd | Operator::LogicalOr | Operator::LogicalXor => {
                self.push_expression(left)?;
                self.push_expression(right)?;
                let bop = match op {
                    Operator::LogicalAnd => BinaryOp::BitwiseAnd,
                    Operator::LogicalOr => BinaryOp::BitwiseOr,
                    _ => BinaryOp::CmpNe,
                };
                self.builder.binary_op(bop, NumType::Int, 1);
                Ok(())
            }
            Operator::EqEq | Operator::Neq => self.push_equality(left, right, op == Operator::Neq),
            Operator::Lt | Operator::LtEq => {
                let ty = num_type(&left.ty)?;
                let n = left.ty.slot_count();
                self.push_expression(left)?;
                self.push_expression(right)?;
                let bop = if op == Operator::Lt { BinaryOp::CmpLt } else { BinaryOp::CmpLe };
                self.builder.binary_op(bop, ty, n);
                Ok(())
            }
            Operator::Gt | Operator::GtEq => {
                let ty = num_type(&left.ty)?;
                let n = left.ty.slot_count();
                if has_side_effects(left) || has_side_effects(right) {
                    self.push_expression(left)?;
                    self.push_expression(right)?;
                    self.builder.swizzle(2 * n, &swapped_halves(n));
                } else {
                    self.push_expression(right)?;
                    self.push_expression(left)?;
                }
                let bop = if op == Operator::Gt { BinaryOp::CmpLt } else { BinaryOp::CmpLe };
                self.builder.binary_op(bop, ty, n);
                Ok(())
            }
            _ => {
                self.push_arithmetic_lhs(op, left, right, &expr.ty)?;
                self.push_arithmetic_rhs(op, &left.ty, right, &expr.ty)
            }
        }
    }

    fn push_arithmetic_lhs(&mut self, op: Operator, left: &Expression, right: &Expression, result: &Type) -> Result<()> {
        if op == Operator::Star && is_matrix_multiply(&left.ty, &right.ty) {
            return self.push_expression(left);
        }
        self.push_splatted(left, result.slot_count())
    }

    /// Pushes the right operand and applies `op` to the left operand already
    /// on the stack.
    fn push_arithmetic_rhs(&mut self, op: Operator, left_ty: &Type, right: &Expression, result: &Type) -> Result<()> {
        if op == Operator::Star && is_matrix_multiply(left_ty, &right.ty) {
            self.push_expression(right)?;
            self.builder
                .matrix_multiply(matrix_shape(left_ty, true), matrix_shape(&right.ty, false));
            return Ok(());
        }
        let n = result.slot_count();
        let ty = num_type(result)?;
        self.push_splatted(right, n)?;
        let bop = match op {
            Operator::Plus => BinaryOp::Add,
            Operator::Minus => BinaryOp::Sub,
            Operator::Star => BinaryOp::Mul,
            Operator::Slash => BinaryOp::Div,
            Operator::Percent if ty == NumType::Float => BinaryOp::Mod,
            Operator::Percent => {
                // a - (a / b) * b
                self.builder.push_clone(2 * n, 2 * n);
                self.builder.binary_op(BinaryOp::Div, ty, n);
                self.builder.binary_op(BinaryOp::Mul, ty, n);
                self.builder.binary_op(BinaryOp::Sub, ty, n);
                return Ok(());
            }
            Operator::BitwiseAnd => BinaryOp::BitwiseAnd,
            Operator::BitwiseOr => BinaryOp::BitwiseOr,
            Operator::BitwiseXor => BinaryOp::BitwiseXor,
            Operator::Shl | Operator::Shr => bail_unsupported!("shift operators are not supported"),
            _ => bail_unsupported!("unsupported binary operator '{}'", op.symbol()),
        };
        let ty = match bop {
            BinaryOp::BitwiseAnd | BinaryOp::BitwiseOr | BinaryOp::BitwiseXor => NumType::Int,
            _ => ty,
        };
        self.builder.binary_op(bop, ty, n);
        Ok(())
    }

    fn push_equality(&mut self, left: &Expression, right: &Expression, not_equal: bool) -> Result<()> {
        let n = left.ty.slot_count();
        let (cmp, fold) = if not_equal {
            (BinaryOp::CmpNe, BinaryOp::BitwiseOr)
        } else {
            (BinaryOp::CmpEq, BinaryOp::BitwiseAnd)
        };
        let kinds = leaf_kinds(&left.ty)
            .into_iter()
            .map(|kind| num_type_of(kind, &left.ty))
            .collect::<Result<Vec<_>>>()?;
        self.push_expression(left)?;
        self.push_expression(right)?;
        let Some(&first) = kinds.first() else {
            self.builder.discard_stack(2 * n);
            self.builder.push_constant_bits(if not_equal { 0 } else { !0 }, 1);
            return Ok(());
        };
        if kinds.iter().all(|&k| k == first) {
            self.builder.binary_op(cmp, first, n);
            self.fold_booleans(n, fold);
            return Ok(());
        }

        // Mixed number kinds: compare each run of same-kind slots separately.
        let mut results = 0;
        let mut offset = 0;
        while offset < n {
            let kind = kinds[offset];
            let run = kinds[offset..].iter().take_while(|&&k| k == kind).count();
            self.builder.push_clone(run, 2 * n + results - offset);
            self.builder.push_clone(run, n + results + run - offset);
            self.builder.binary_op(cmp, kind, run);
            self.fold_booleans(run, fold);
            results += 1;
            offset += run;
        }
        self.fold_booleans(results, fold);
        let scratch = self.values.allocate("", &crate::ir::builtin_types().bool_, 0, None);
        self.builder.pop_slots_unmasked(scratch);
        self.builder.discard_stack(2 * n);
        self.builder.push_slots(scratch);
        Ok(())
    }

    /// Reduces the top `count` boolean slots to one with `op`.
    pub(super) fn fold_booleans(&mut self, mut count: usize, op: BinaryOp) {
        while count > 1 {
            let half = count / 2;
            self.builder.binary_op(op, NumType::Int, half);
            count -= half;
        }
    }

    /// Flips the sign of the top `count` slots.
    pub(super) fn negate(&mut self, ty: &Type, count: usize) -> Result<()> {
        match num_type(ty)? {
            NumType::Float => {
                self.builder.push_constant_bits(FLOAT_SIGN_BIT, count);
                self.builder.binary_op(BinaryOp::BitwiseXor, NumType::Int, count);
            }
            ty => {
                self.builder.push_constant_bits(-1i32 as u32, count);
                self.builder.binary_op(BinaryOp::Mul, ty, count);
            }
        }
        Ok(())
    }

    fn push_prefix(&mut self, op: Operator, operand: &Expression) -> Result<()> {
        let n = operand.ty.slot_count();
        match op {
            Operator::Plus => self.push_expression(operand),
            Operator::Minus => {
                self.push_expression(operand)?;
                self.negate(&operand.ty, n)
            }
            Operator::LogicalNot => {
                self.push_expression(operand)?;
                self.builder.push_constant_bits(!0, n);
                self.builder.binary_op(BinaryOp::BitwiseXor, NumType::Int, n);
                Ok(())
            }
            Operator::BitwiseNot => {
                self.push_expression(operand)?;
                self.builder.unary_op(UnaryOp::BitwiseNot, NumType::Int, n);
                Ok(())
            }
            Operator::PlusPlus | Operator::MinusMinus => {
                let lvalue = self.make_lvalue(operand)?;
                self.push_lvalue(&lvalue)?;
                self.step_by_one(op, &operand.ty, n)?;
                self.store_lvalue(&lvalue)?;
                self.release_lvalue(lvalue)
            }
            _ => bail_unsupported!("unsupported prefix operator '{}'", op.symbol()),
        }
    }

    /// Evaluates `expr` only for its side effects and leaves the stack as it
    /// was. A postfix step whose old value is unused becomes a prefix step.
    pub(super) fn write_discarded_expression(&mut self, expr: &Expression) -> Result<()> {
        match &expr.kind {
            ExprKind::Postfix { op, operand } => self.push_prefix(*op, operand)?,
            _ => self.push_expression(expr)?,
        }
        self.builder.discard_stack(expr.ty.slot_count());
        Ok(())
    }

    fn push_postfix(&mut self, op: Operator, operand: &Expression) -> Result<()> {
        let n = operand.ty.slot_count();
        let lvalue = self.make_lvalue(operand)?;
        self.push_lvalue(&lvalue)?;
        self.builder.push_clone(n, n);
        self.step_by_one(op, &operand.ty, n)?;
        self.store_lvalue(&lvalue)?;
        self.builder.discard_stack(n);
        self.release_lvalue(lvalue)
    }

    fn step_by_one(&mut self, op: Operator, ty: &Type, n: usize) -> Result<()> {
        let bop = match op {
            Operator::PlusPlus => BinaryOp::Add,
            Operator::MinusMinus => BinaryOp::Sub,
            _ => bail_unsupported!("unsupported operator '{}'", op.symbol()),
        };
        self.builder.push_constant_bits(one_bits(ty.number_kind()), n);
        self.builder.binary_op(bop, num_type(ty)?, n);
        Ok(())
    }

    fn push_ternary(
        &mut self,
        expr: &Expression,
        test: &Expression,
        if_true: &Expression,
        if_false: &Expression,
    ) -> Result<()> {
        let n = expr.ty.slot_count();
        let simple = !has_side_effects(test)
            && !has_side_effects(if_true)
            && !has_side_effects(if_false)
            && is_trivial_expression(if_true)
            && is_trivial_expression(if_false);
        if simple {
            self.push_expression(if_false)?;
            self.push_expression(if_true)?;
            self.push_expression(test)?;
            self.builder.push_duplicates(n.saturating_sub(1));
            self.builder.ternary_op(TernaryOp::Mix, NumType::Int, n);
            return Ok(());
        }

        self.builder.enable_execution_mask_writes();
        let test_stack = self.create_stack();
        self.with_stack(test_stack, |g| {
            g.builder.push_condition_mask();
            g.push_expression(test)?;
            g.builder.merge_condition_mask();
            Ok(())
        })?;

        let false_label = self.builder.next_label_id();
        let exit_label = self.builder.next_label_id();
        if !is_trivial_expression(if_true) {
            self.builder.branch_if_no_lanes_active(false_label);
        }
        self.push_expression(if_true)?;
        self.builder.label(false_label);
        self.with_stack(test_stack, |g| {
            g.builder.merge_inv_condition_mask();
            Ok(())
        })?;
        if !is_trivial_expression(if_false) {
            self.builder.branch_if_no_lanes_active(exit_label);
        }
        self.push_expression(if_false)?;
        self.builder.select(n);
        self.builder.label(exit_label);

        self.with_stack(test_stack, |g| {
            g.builder.discard_stack(1);
            g.builder.pop_condition_mask();
            Ok(())
        })?;
        self.recycle_stack(test_stack);
        self.builder.disable_execution_mask_writes();
        Ok(())
    }

    pub(super) fn push_cast(&mut self, from: NumberKind, to: NumberKind, n: usize) -> Result<()> {
        use NumberKind::*;
        match (from, to) {
            _ if from == to => {}
            (Signed | Unsigned, Signed | Unsigned) => {}
            (Signed, Float) => self.builder.unary_op(UnaryOp::CastToFloatFromInt, NumType::Int, n),
            (Unsigned, Float) => self.builder.unary_op(UnaryOp::CastToFloatFromUint, NumType::Uint, n),
            (Float, Signed) => self.builder.unary_op(UnaryOp::CastToIntFromFloat, NumType::Float, n),
            (Float, Unsigned) => self.builder.unary_op(UnaryOp::CastToUintFromFloat, NumType::Float, n),
            (Boolean, Float | Signed | Unsigned) => {
                self.builder.push_constant_bits(one_bits(to), n);
                self.builder.binary_op(BinaryOp::BitwiseAnd, NumType::Int, n);
            }
            (Float | Signed | Unsigned, Boolean) => {
                self.builder.push_zeros(n);
                let ty = if from == Float { NumType::Float } else { NumType::Int };
                self.builder.binary_op(BinaryOp::CmpNe, ty, n);
            }
            _ => bail_unsupported!("unsupported cast"),
        }
        Ok(())
    }

    fn push_function_call(&mut self, function: &Arc<FunctionDeclaration>, arguments: &[Expression]) -> Result<()> {
        let Some(definition) = self.program.find_definition(function) else {
            bail_unsupported!("function '{}' is declared but never defined", function.signature());
        };
        let declaration = &definition.declaration;

        let mut copies: Vec<SlotRange> = Vec::new();
        let mut outs: Vec<(SlotRange, LValue)> = Vec::new();
        let mut aliases: Vec<(u32, SlotRange)> = Vec::new();
        for (parameter, argument) in declaration.parameters.iter().zip(arguments) {
            let line = self.line(parameter.position);
            if parameter.modifiers.is_out() {
                let lvalue = self.make_lvalue(argument)?;
                let slots = self.values.get_or_allocate(parameter, line);
                if parameter.modifiers.flags.contains(ModifierFlags::IN) {
                    self.push_lvalue(&lvalue)?;
                    copies.push(slots);
                }
                outs.push((slots, lvalue));
                continue;
            }
            if let Some(range) = self.aliasable_argument(parameter, argument) {
                aliases.push((parameter.id, range));
                continue;
            }
            self.push_expression(argument)?;
            copies.push(self.values.get_or_allocate(parameter, line));
        }
        for &slots in copies.iter().rev() {
            self.builder.pop_slots(slots);
        }

        let previous: Vec<(u32, Option<SlotRange>)> = aliases
            .iter()
            .map(|&(id, range)| (id, self.values.alias(id, range)))
            .collect();
        let result = if declaration.return_type.is_void() {
            None
        } else {
            let index = self.function_index(declaration);
            let line = self.line(declaration.position);
            Some(self.values.allocate(
                &format!("[{}].result", declaration.name),
                &declaration.return_type,
                line,
                index,
            ))
        };

        let skip_label = self.builder.next_label_id();
        let guarded = self.builder.execution_mask_writes_enabled();
        if guarded {
            self.builder.branch_if_no_lanes_active(skip_label);
        }
        let written = self.write_function(&definition, result);
        if guarded {
            self.builder.label(skip_label);
        }
        for (id, range) in previous {
            self.values.restore_alias(id, range);
        }
        written?;

        for (slots, lvalue) in outs {
            self.builder.push_slots(slots);
            self.store_lvalue(&lvalue)?;
            self.builder.discard_stack(slots.count);
            self.release_lvalue(lvalue)?;
        }
        if let Some(result) = result {
            self.builder.push_slots(result);
        }
        Ok(())
    }

    /// Slots an argument can lend to a read-only parameter instead of being
    /// copied.
    fn aliasable_argument(&mut self, parameter: &Variable, argument: &Expression) -> Option<SlotRange> {
        if self.usage.get(parameter).writes > 0 {
            return None;
        }
        let ExprKind::VariableReference { variable, .. } = &argument.kind else {
            return None;
        };
        if variable.is_global()
            || variable.is_uniform()
            || variable.builtin
            || self.immutable_vars.contains_key(&variable.id)
        {
            return None;
        }
        self.values.get(variable)
    }

    fn push_child_call(&mut self, child: &Arc<Variable>, arguments: &[Expression]) -> Result<()> {
        let Some(&index) = self.child_indices.get(&child.id) else {
            bail_unsupported!("'{}' is not a child effect of this program", child.name);
        };
        match (child.ty.effect_kind(), arguments) {
            (Some(EffectKind::Shader), [coords]) => {
                self.push_expression(coords)?;
                self.builder.pop_src_rg();
                self.builder.invoke_shader(index);
            }
            (Some(EffectKind::ColorFilter), [color]) => {
                self.push_expression(color)?;
                self.builder.pop_src_rgba();
                self.builder.invoke_color_filter(index);
            }
            (Some(EffectKind::Blender), [src, dst]) => {
                self.push_expression(src)?;
                self.push_expression(dst)?;
                self.builder.pop_dst_rgba();
                self.builder.pop_src_rgba();
                self.builder.invoke_blender(index);
            }
            _ => bail_unsupported!("invalid call to child effect '{}'", child.name),
        }
        self.builder.push_src_rgba();
        Ok(())
    }
}

/// Does `expr` name slots directly (possibly through fields, indices and
/// swizzles)?
fn names_storage(expr: &Expression) -> bool {
    match &expr.kind {
        ExprKind::VariableReference { .. } => true,
        ExprKind::FieldAccess { base, .. } | ExprKind::Index { base, .. } | ExprKind::Swizzle { base, .. } => {
            names_storage(base)
        }
        _ => false,
    }
}

/// Swizzle components that exchange two adjacent runs of `n` slots.
fn swapped_halves(n: usize) -> Vec<u8> {
    (n..2 * n).chain(0..n).map(|c| c as u8).collect()
}
