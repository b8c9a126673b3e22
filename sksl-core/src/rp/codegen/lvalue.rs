//! Assignable (and readable) views onto slots.

use super::Generator;
use crate::bail_unsupported;
use crate::error::Result;
use crate::ir::constant::get_constant_int;
use crate::ir::{ExprKind, Expression, Variable};
use crate::rp::builder::{BinaryOp, NumType, SlotRange};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotSpace {
    Value,
    Uniform,
    Immutable,
}

/// Where an lvalue's slots are: a fixed range, optionally displaced at run
/// time by the value on top of `dynamic`, clamped below `limit`.
struct Location {
    space: SlotSpace,
    fixed: SlotRange,
    limit: usize,
    dynamic: Option<i32>,
}

#[derive(Debug, Clone)]
pub(super) enum LValue {
    Variable(SlotRange),
    Uniform(SlotRange),
    Immutable(SlotRange),
    /// Anonymous value slots holding an evaluated rvalue.
    Scratch(SlotRange),
    Slice {
        parent: Box<LValue>,
        offset: usize,
        count: usize,
    },
    Swizzle {
        parent: Box<LValue>,
        components: Vec<u8>,
    },
    DynamicIndex {
        parent: Box<LValue>,
        count: usize,
        offset_stack: i32,
    },
}

impl LValue {
    fn slice(parent: LValue, offset: usize, count: usize) -> LValue {
        match parent {
            LValue::Slice {
                parent,
                offset: base,
                ..
            } => LValue::Slice {
                parent,
                offset: base + offset,
                count,
            },
            LValue::Swizzle { parent, components } => {
                let picked = components[offset..offset + count].to_vec();
                LValue::swizzle(*parent, &picked)
            }
            parent => LValue::Slice {
                parent: Box::new(parent),
                offset,
                count,
            },
        }
    }

    fn swizzle(parent: LValue, components: &[u8]) -> LValue {
        let (parent, components) = match parent {
            LValue::Swizzle {
                parent,
                components: inner,
            } => (*parent, components.iter().map(|&c| inner[c as usize]).collect::<Vec<u8>>()),
            parent => (parent, components.to_vec()),
        };
        let first = components.first().copied().unwrap_or(0);
        let contiguous = components.iter().enumerate().all(|(i, &c)| c as usize == first as usize + i);
        if contiguous {
            return LValue::slice(parent, first as usize, components.len());
        }
        LValue::Swizzle {
            parent: Box::new(parent),
            components,
        }
    }

    pub fn slot_count(&self) -> usize {
        match self {
            LValue::Variable(r) | LValue::Uniform(r) | LValue::Immutable(r) | LValue::Scratch(r) => r.count,
            LValue::Slice { count, .. } | LValue::DynamicIndex { count, .. } => *count,
            LValue::Swizzle { components, .. } => components.len(),
        }
    }

    fn location(&self) -> Result<Location> {
        let fixed = |space, range: &SlotRange| Location {
            space,
            fixed: *range,
            limit: range.end(),
            dynamic: None,
        };
        Ok(match self {
            LValue::Variable(r) | LValue::Scratch(r) => fixed(SlotSpace::Value, r),
            LValue::Uniform(r) => fixed(SlotSpace::Uniform, r),
            LValue::Immutable(r) => fixed(SlotSpace::Immutable, r),
            LValue::Slice { parent, offset, count } => {
                let p = parent.location()?;
                Location {
                    fixed: p.fixed.slice(*offset, *count),
                    ..p
                }
            }
            LValue::DynamicIndex {
                parent,
                count,
                offset_stack,
            } => {
                let p = parent.location()?;
                let limit = if p.dynamic.is_some() { p.limit } else { p.fixed.end() };
                Location {
                    space: p.space,
                    fixed: SlotRange::new(p.fixed.index, *count),
                    limit,
                    dynamic: Some(*offset_stack),
                }
            }
            LValue::Swizzle { .. } => bail_unsupported!("swizzle has no contiguous location"),
        })
    }

    /// The stack holding this lvalue's dynamic offset, if any.
    fn dynamic_stack(&self) -> Result<Option<i32>> {
        match self {
            LValue::Swizzle { .. } => bail_unsupported!("dynamic index into a swizzle"),
            _ => Ok(self.location()?.dynamic),
        }
    }
}

impl<'a> Generator<'a> {
    pub(super) fn variable_lvalue(&mut self, variable: &Arc<Variable>) -> Result<LValue> {
        if variable.ty.is_effect_child() {
            bail_unsupported!("child effect '{}' used as a value", variable.name);
        }
        if Self::is_frag_coord(variable) {
            let scratch = self.values.allocate("", &variable.ty, 0, None);
            self.builder.push_device_xy01();
            self.builder.pop_slots_unmasked(scratch);
            return Ok(LValue::Scratch(scratch));
        }
        if let Some(&range) = self.immutable_vars.get(&variable.id) {
            return Ok(LValue::Immutable(range));
        }
        let line = self.line(variable.position);
        if variable.is_uniform() {
            return Ok(LValue::Uniform(self.uniforms.get_or_allocate(variable, line)));
        }
        let range = self.values.get_or_allocate(variable, line);
        if Self::is_frag_color(variable) {
            self.frag_color = Some(range);
        }
        Ok(LValue::Variable(range))
    }

    /// Builds an lvalue for `expr`. Expressions that do not name storage are
    /// evaluated into scratch slots first.
    pub(super) fn make_lvalue(&mut self, expr: &Expression) -> Result<LValue> {
        match &expr.kind {
            ExprKind::VariableReference { variable, .. } => self.variable_lvalue(variable),
            ExprKind::FieldAccess { base, field_index } => {
                let parent = self.make_lvalue(base)?;
                let offset = base.ty.field_slot_offset(*field_index);
                Ok(LValue::slice(parent, offset, expr.ty.slot_count()))
            }
            ExprKind::Index { base, index } => {
                let parent = self.make_lvalue(base)?;
                let stride = expr.ty.slot_count();
                match get_constant_int(index) {
                    Some(i) => {
                        let elements = base.ty.slot_count() / stride.max(1);
                        let i = (i.max(0) as usize).min(elements.saturating_sub(1));
                        Ok(LValue::slice(parent, i * stride, stride))
                    }
                    None => self.dynamic_index(parent, index, stride),
                }
            }
            ExprKind::Swizzle { base, components } => {
                let parent = self.make_lvalue(base)?;
                Ok(LValue::swizzle(parent, components))
            }
            _ => {
                let scratch = self.values.allocate("", &expr.ty, 0, None);
                self.push_expression(expr)?;
                self.builder.pop_slots_unmasked(scratch);
                Ok(LValue::Scratch(scratch))
            }
        }
    }

    fn dynamic_index(&mut self, parent: LValue, index: &Expression, stride: usize) -> Result<LValue> {
        let parent_stack = parent.dynamic_stack()?;
        let stack = self.create_stack();
        self.with_stack(stack, |g| {
            g.push_expression(index)?;
            if stride != 1 {
                g.builder.push_literal_i(stride as i32);
                g.builder.binary_op(BinaryOp::Mul, NumType::Int, 1);
            }
            if let Some(parent_stack) = parent_stack {
                g.builder.push_clone_from_stack(1, parent_stack, 1);
                g.builder.binary_op(BinaryOp::Add, NumType::Int, 1);
            }
            Ok(())
        })?;
        Ok(LValue::DynamicIndex {
            parent: Box::new(parent),
            count: stride,
            offset_stack: stack,
        })
    }

    pub(super) fn push_lvalue(&mut self, lvalue: &LValue) -> Result<()> {
        if let LValue::Swizzle { parent, components } = lvalue {
            self.push_lvalue(parent)?;
            self.builder.swizzle(parent.slot_count(), components);
            return Ok(());
        }
        let loc = lvalue.location()?;
        match (loc.dynamic, loc.space) {
            (None, SlotSpace::Value) => self.builder.push_slots(loc.fixed),
            (None, SlotSpace::Uniform) => self.builder.push_uniform(loc.fixed),
            (None, SlotSpace::Immutable) => self.builder.push_immutable(loc.fixed),
            (Some(stack), SlotSpace::Value) => self.builder.push_slots_indirect(loc.fixed, stack, loc.limit),
            (Some(stack), SlotSpace::Uniform) => self.builder.push_uniform_indirect(loc.fixed, stack, loc.limit),
            (Some(stack), SlotSpace::Immutable) => {
                self.builder.push_immutable_indirect(loc.fixed, stack, loc.limit)
            }
        }
        Ok(())
    }

    /// Copies the value on top of the stack into `lvalue`, leaving it on
    /// the stack.
    pub(super) fn store_lvalue(&mut self, lvalue: &LValue) -> Result<()> {
        if let LValue::Swizzle { parent, components } = lvalue {
            let loc = parent.location()?;
            if loc.space != SlotSpace::Value {
                bail_unsupported!("cannot assign to a uniform or constant");
            }
            match loc.dynamic {
                None => self
                    .builder
                    .swizzle_copy_stack_to_slots(loc.fixed, components, components.len()),
                Some(stack) => self.builder.swizzle_copy_stack_to_slots_indirect(
                    loc.fixed,
                    stack,
                    loc.limit,
                    components,
                    components.len(),
                ),
            }
            return Ok(());
        }
        let loc = lvalue.location()?;
        if loc.space != SlotSpace::Value {
            bail_unsupported!("cannot assign to a uniform or constant");
        }
        match loc.dynamic {
            None => self.builder.copy_stack_to_slots(loc.fixed, loc.fixed.count),
            Some(stack) => self
                .builder
                .copy_stack_to_slots_indirect(loc.fixed, stack, loc.limit, loc.fixed.count),
        }
        if self.trace && loc.dynamic.is_none() {
            self.builder.trace_var(loc.fixed);
        }
        Ok(())
    }

    /// Frees the offset stacks of dynamic indices.
    pub(super) fn release_lvalue(&mut self, lvalue: LValue) -> Result<()> {
        match lvalue {
            LValue::DynamicIndex {
                parent, offset_stack, ..
            } => {
                self.discard_on_stack(offset_stack, 1)?;
                self.recycle_stack(offset_stack);
                self.release_lvalue(*parent)
            }
            LValue::Slice { parent, .. } | LValue::Swizzle { parent, .. } => self.release_lvalue(*parent),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_slices_flatten() {
        let base = LValue::Variable(SlotRange::new(10, 8));
        let lv = LValue::slice(LValue::slice(base, 4, 4), 1, 2);
        match &lv {
            LValue::Slice { parent, offset, count } => {
                assert!(matches!(**parent, LValue::Variable(_)));
                assert_eq!((*offset, *count), (5, 2));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(lv.location().unwrap().fixed, SlotRange::new(15, 2));
    }

    #[test]
    fn test_swizzles_compose() {
        let base = LValue::Variable(SlotRange::new(0, 4));
        let lv = LValue::swizzle(LValue::swizzle(base.clone(), &[3, 2, 1, 0]), &[0, 2]);
        match &lv {
            LValue::Swizzle { components, .. } => assert_eq!(components, &vec![3, 1]),
            other => panic!("unexpected {:?}", other),
        }
        let contiguous = LValue::swizzle(base, &[1, 2]);
        assert_eq!(contiguous.location().unwrap().fixed, SlotRange::new(1, 2));
    }

    #[test]
    fn test_dynamic_index_limit() {
        let array = LValue::Variable(SlotRange::new(2, 6));
        let lv = LValue::DynamicIndex {
            parent: Box::new(array),
            count: 2,
            offset_stack: 1,
        };
        let loc = lv.location().unwrap();
        assert_eq!(loc.fixed, SlotRange::new(2, 2));
        assert_eq!(loc.limit, 8);
        assert_eq!(loc.dynamic, Some(1));
    }
}
