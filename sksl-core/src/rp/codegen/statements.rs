use super::slots::constant_bits;
use super::Generator;
use crate::analysis::{is_dynamically_uniform, loop_control_flow};
use crate::bail_unsupported;
use crate::error::Result;
use crate::ir::constant::get_constant_value;
use crate::ir::{Expression, LoopUnrollInfo, Statement, StmtKind, SwitchCase, Variable};
use crate::rp::builder::{BinaryOp, NumType};
use std::sync::Arc;

impl<'a> Generator<'a> {
    pub(super) fn write_statement(&mut self, stmt: &Statement) -> Result<()> {
        if self.trace && !matches!(stmt.kind, StmtKind::Block { .. } | StmtKind::Nop) {
            let line = self.line(stmt.position);
            self.builder.trace_line(line);
        }
        match &stmt.kind {
            StmtKind::Block { statements, scoped } => {
                let traced = self.trace && *scoped;
                if traced {
                    self.builder.trace_scope(1);
                }
                for statement in statements {
                    self.write_statement(statement)?;
                }
                if traced {
                    self.builder.trace_scope(-1);
                }
                Ok(())
            }
            StmtKind::Expression(expr) => self.write_discarded_expression(expr),
            StmtKind::VarDeclaration { variable, value } => self.write_var_declaration(variable, value.as_ref()),
            StmtKind::If {
                test,
                if_true,
                if_false,
            } => self.write_if(test, if_true, if_false.as_deref()),
            StmtKind::For {
                initializer,
                test,
                next,
                body,
                unroll_info,
            } => {
                if self.trace {
                    self.builder.trace_scope(1);
                }
                let written = self.write_for(
                    initializer.as_deref(),
                    test.as_ref(),
                    next.as_ref(),
                    body,
                    unroll_info.as_ref(),
                );
                if self.trace {
                    self.builder.trace_scope(-1);
                }
                written
            }
            StmtKind::Do { body, test } => self.write_do(body, test),
            StmtKind::Switch { value, cases } => self.write_switch(stmt, value, cases),
            StmtKind::Break => self.write_break(),
            StmtKind::Continue => self.write_continue(),
            StmtKind::Discard => bail_unsupported!("discard is not supported"),
            StmtKind::Return(value) => self.write_return(value.as_ref()),
            StmtKind::Nop => Ok(()),
        }
    }

    pub(super) fn write_var_declaration(&mut self, variable: &Arc<Variable>, value: Option<&Expression>) -> Result<()> {
        if let Some(value) = value {
            if self.promote_to_immutable(variable, value) {
                return Ok(());
            }
        }
        let line = self.line(variable.position);
        let slots = self.values.get_or_allocate(variable, line);
        match value {
            Some(value) => {
                self.push_expression(value)?;
                self.builder.pop_slots_unmasked(slots);
            }
            None => self.builder.zero_slots_unmasked(slots),
        }
        if self.trace {
            self.builder.trace_var(slots);
        }
        Ok(())
    }

    /// Variables written once with a constant live in immutable slots.
    fn promote_to_immutable(&mut self, variable: &Variable, value: &Expression) -> bool {
        if !self.program.settings.optimize || self.trace || self.usage.get(variable).writes != 1 {
            return false;
        }
        let Some(values) = get_constant_value(value) else {
            return false;
        };
        let bits = constant_bits(&variable.ty, &values);
        if bits.len() != variable.ty.slot_count() {
            return false;
        }
        let range = self.immutables.find_or_store(&mut self.builder, &bits);
        self.immutable_vars.insert(variable.id, range);
        true
    }

    fn write_if(&mut self, test: &Expression, if_true: &Statement, if_false: Option<&Statement>) -> Result<()> {
        if is_dynamically_uniform(test) {
            return self.write_uniform_if(test, if_true, if_false);
        }
        self.builder.enable_execution_mask_writes();
        self.builder.push_condition_mask();
        self.push_expression(test)?;
        self.builder.merge_condition_mask();

        let false_label = self.builder.next_label_id();
        self.builder.branch_if_no_lanes_active(false_label);
        self.write_statement(if_true)?;
        match if_false {
            Some(if_false) => {
                let exit_label = self.builder.next_label_id();
                self.builder.label(false_label);
                self.builder.merge_inv_condition_mask();
                self.builder.branch_if_no_lanes_active(exit_label);
                self.write_statement(if_false)?;
                self.builder.label(exit_label);
            }
            None => self.builder.label(false_label),
        }
        self.builder.discard_stack(1);
        self.builder.pop_condition_mask();
        self.builder.disable_execution_mask_writes();
        Ok(())
    }

    /// Every lane agrees on the test, so a branch replaces the masks.
    fn write_uniform_if(&mut self, test: &Expression, if_true: &Statement, if_false: Option<&Statement>) -> Result<()> {
        self.push_expression(test)?;
        let false_label = self.builder.next_label_id();
        self.builder.branch_if_no_active_lanes_on_stack_top_equal(!0, false_label);
        self.write_statement(if_true)?;
        match if_false {
            Some(if_false) => {
                let exit_label = self.builder.next_label_id();
                self.builder.jump(exit_label);
                self.builder.label(false_label);
                self.write_statement(if_false)?;
                self.builder.label(exit_label);
            }
            None => self.builder.label(false_label),
        }
        self.builder.discard_stack(1);
        Ok(())
    }

    fn write_for(
        &mut self,
        initializer: Option<&Statement>,
        test: Option<&Expression>,
        next: Option<&Expression>,
        body: &Statement,
        unroll_info: Option<&LoopUnrollInfo>,
    ) -> Result<()> {
        let flow = loop_control_flow(body);
        if let Some(info) = unroll_info {
            if !flow.has_break && !flow.has_continue && !flow.has_return {
                return self.write_counted_for(initializer, test, next, body, info);
            }
        }

        self.builder.enable_execution_mask_writes();
        let saved_break = self.break_target;
        let saved_continue = self.continue_stack;
        let continue_stack = if flow.has_continue {
            let stack = self.create_stack();
            self.with_stack(stack, |g| {
                g.builder.push_zeros(1);
                Ok(())
            })?;
            Some(stack)
        } else {
            None
        };

        if let Some(initializer) = initializer {
            self.write_statement(initializer)?;
        }
        self.builder.push_loop_mask();
        let body_label = self.builder.next_label_id();
        let test_label = self.builder.next_label_id();
        let exit_label = self.builder.next_label_id();
        self.builder.jump(test_label);
        self.builder.label(body_label);

        self.break_target = Some(exit_label);
        self.continue_stack = continue_stack;
        self.write_statement(body)?;
        self.reenable_continued_lanes(continue_stack)?;
        if let Some(next) = next {
            self.write_discarded_expression(next)?;
        }

        self.builder.label(test_label);
        if let Some(test) = test {
            self.push_expression(test)?;
            self.builder.merge_loop_mask();
        }
        self.builder.branch_if_any_lanes_active(body_label);
        self.builder.label(exit_label);
        self.builder.pop_loop_mask();

        if let Some(stack) = continue_stack {
            self.discard_on_stack(stack, 1)?;
            self.recycle_stack(stack);
        }
        self.break_target = saved_break;
        self.continue_stack = saved_continue;
        self.builder.disable_execution_mask_writes();
        Ok(())
    }

    /// A loop with a known trip count and no early exits needs no masks:
    /// every lane runs the same iterations.
    fn write_counted_for(
        &mut self,
        initializer: Option<&Statement>,
        test: Option<&Expression>,
        next: Option<&Expression>,
        body: &Statement,
        info: &LoopUnrollInfo,
    ) -> Result<()> {
        if let Some(initializer) = initializer {
            self.write_statement(initializer)?;
        }
        if info.count == 0 {
            return Ok(());
        }
        let body_label = self.builder.next_label_id();
        let exit_label = self.builder.next_label_id();
        self.builder.branch_if_no_lanes_active(exit_label);
        self.builder.label(body_label);
        self.write_statement(body)?;
        if info.count > 1 {
            let Some(test) = test else {
                bail_unsupported!("counted loop without a test");
            };
            if let Some(next) = next {
                self.write_discarded_expression(next)?;
            }
            self.push_expression(test)?;
            self.builder.branch_if_no_active_lanes_on_stack_top_equal(0, body_label);
            self.builder.discard_stack(1);
        }
        self.builder.label(exit_label);
        Ok(())
    }

    fn write_do(&mut self, body: &Statement, test: &Expression) -> Result<()> {
        let flow = loop_control_flow(body);
        self.builder.enable_execution_mask_writes();
        let saved_break = self.break_target;
        let saved_continue = self.continue_stack;
        let continue_stack = if flow.has_continue {
            let stack = self.create_stack();
            self.with_stack(stack, |g| {
                g.builder.push_zeros(1);
                Ok(())
            })?;
            Some(stack)
        } else {
            None
        };

        self.builder.push_loop_mask();
        let body_label = self.builder.next_label_id();
        let exit_label = self.builder.next_label_id();
        self.builder.label(body_label);
        self.break_target = Some(exit_label);
        self.continue_stack = continue_stack;
        self.write_statement(body)?;
        self.reenable_continued_lanes(continue_stack)?;
        self.push_expression(test)?;
        self.builder.merge_loop_mask();
        self.builder.branch_if_any_lanes_active(body_label);
        self.builder.label(exit_label);
        self.builder.pop_loop_mask();

        if let Some(stack) = continue_stack {
            self.discard_on_stack(stack, 1)?;
            self.recycle_stack(stack);
        }
        self.break_target = saved_break;
        self.continue_stack = saved_continue;
        self.builder.disable_execution_mask_writes();
        Ok(())
    }

    /// Lanes that hit `continue` rejoin the loop before the next iteration.
    fn reenable_continued_lanes(&mut self, continue_stack: Option<i32>) -> Result<()> {
        let Some(stack) = continue_stack else {
            return Ok(());
        };
        self.with_stack(stack, |g| {
            g.builder.pop_and_reenable_loop_mask();
            g.builder.push_zeros(1);
            Ok(())
        })
    }

    fn write_switch(&mut self, stmt: &Statement, value: &Expression, cases: &[SwitchCase]) -> Result<()> {
        self.builder.enable_execution_mask_writes();
        self.builder.push_loop_mask();

        // The switch stack holds [value, lanes not yet matched by any case].
        let switch_stack = self.create_stack();
        self.with_stack(switch_stack, |g| {
            g.push_expression(value)?;
            g.builder.push_loop_mask();
            Ok(())
        })?;
        self.builder.mask_off_loop_mask();

        let exit_label = self.builder.next_label_id();
        let saved_break = self.break_target.replace(exit_label);
        for case in cases {
            self.with_stack(switch_stack, |g| {
                match case.value {
                    Some(v) => g.builder.case_op(v as i32),
                    None => g.builder.reenable_loop_mask(),
                }
                Ok(())
            })?;
            for statement in &case.statements {
                self.write_statement(statement)?;
            }
        }
        self.builder.label(exit_label);
        self.break_target = saved_break;

        self.discard_on_stack(switch_stack, 2)?;
        self.recycle_stack(switch_stack);
        self.builder.pop_loop_mask();

        // Lanes that continued inside the switch stay off until the loop
        // reenables them.
        if let Some(continue_stack) = self.continue_stack {
            if loop_control_flow(stmt).has_continue {
                self.builder.push_clone_from_stack(1, continue_stack, 1);
                self.builder.push_constant_bits(!0, 1);
                self.builder.binary_op(BinaryOp::BitwiseXor, NumType::Int, 1);
                self.builder.merge_loop_mask();
            }
        }
        self.builder.disable_execution_mask_writes();
        Ok(())
    }

    fn write_break(&mut self) -> Result<()> {
        let Some(target) = self.break_target else {
            bail_unsupported!("break outside of a loop or switch");
        };
        self.builder.branch_if_all_lanes_active(target);
        self.builder.mask_off_loop_mask();
        Ok(())
    }

    fn write_continue(&mut self) -> Result<()> {
        let Some(stack) = self.continue_stack else {
            bail_unsupported!("continue outside of a loop");
        };
        self.builder.continue_op(stack);
        Ok(())
    }

    fn write_return(&mut self, value: Option<&Expression>) -> Result<()> {
        let Some(frame) = self.frame else {
            bail_unsupported!("return outside of a function");
        };
        if let Some(value) = value {
            let Some(result) = frame.result else {
                bail_unsupported!("value returned from a void function");
            };
            self.push_expression(value)?;
            self.builder.pop_slots(result);
        }
        if frame.uses_return_mask {
            self.builder.mask_off_return_mask();
        }
        Ok(())
    }
}
