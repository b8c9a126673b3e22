use crate::ir::expr::Expression;
use crate::ir::stmt::{Statement, StmtKind};
use crate::ir::visitor::{walk_statement, Visitor};
use std::ops::ControlFlow;

/// Jumps that leave the body of the innermost enclosing loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopControlFlow {
    pub has_break: bool,
    pub has_continue: bool,
    pub has_return: bool,
}

struct LoopJumps {
    result: LoopControlFlow,
    /// Loops and switches entered below the starting statement.
    loop_depth: usize,
    switch_depth: usize,
}

impl Visitor for LoopJumps {
    type Break = ();

    fn visit_expression(&mut self, _e: &Expression) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }

    fn visit_statement(&mut self, s: &Statement) -> ControlFlow<()> {
        match &s.kind {
            StmtKind::Break if self.loop_depth == 0 && self.switch_depth == 0 => self.result.has_break = true,
            StmtKind::Continue if self.loop_depth == 0 => self.result.has_continue = true,
            StmtKind::Return(_) => self.result.has_return = true,
            StmtKind::For { .. } | StmtKind::Do { .. } => {
                self.loop_depth += 1;
                let flow = walk_statement(self, s);
                self.loop_depth -= 1;
                return flow;
            }
            StmtKind::Switch { .. } => {
                self.switch_depth += 1;
                let flow = walk_statement(self, s);
                self.switch_depth -= 1;
                return flow;
            }
            _ => return walk_statement(self, s),
        }
        ControlFlow::Continue(())
    }
}

/// Which of `break`, `continue` and `return` can leave a loop whose body is `body`.
pub fn loop_control_flow(body: &Statement) -> LoopControlFlow {
    let mut visitor = LoopJumps {
        result: LoopControlFlow::default(),
        loop_depth: 0,
        switch_depth: 0,
    };
    let _ = visitor.visit_statement(body);
    visitor.result
}

/// How control leaves a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    /// Every path returns (or discards).
    Returns,
    /// Some path breaks or continues out of the enclosing construct.
    Jumps,
    /// Some path reaches the end of the statement.
    FallsThrough,
}

fn exit_of_block(statements: &[Statement], fallthrough: Exit) -> Exit {
    for stmt in statements {
        match exit_of(stmt) {
            Exit::FallsThrough => continue,
            exit => return exit,
        }
    }
    fallthrough
}

fn exit_of(stmt: &Statement) -> Exit {
    match &stmt.kind {
        StmtKind::Return(_) | StmtKind::Discard => Exit::Returns,
        StmtKind::Break | StmtKind::Continue => Exit::Jumps,
        StmtKind::Block { statements, .. } => exit_of_block(statements, Exit::FallsThrough),
        StmtKind::If {
            if_true, if_false, ..
        } => {
            let Some(if_false) = if_false else {
                return Exit::FallsThrough;
            };
            match (exit_of(if_true), exit_of(if_false)) {
                (Exit::Returns, Exit::Returns) => Exit::Returns,
                (Exit::FallsThrough, _) | (_, Exit::FallsThrough) => Exit::FallsThrough,
                _ => Exit::Jumps,
            }
        }
        StmtKind::For { test: None, body, .. } => {
            // `for (;;)` only ends through a jump out of its body.
            let flow = loop_control_flow(body);
            if flow.has_break {
                Exit::FallsThrough
            } else {
                Exit::Returns
            }
        }
        StmtKind::Do { body, .. } => match exit_of(body) {
            Exit::Returns if !loop_control_flow(body).has_break => Exit::Returns,
            _ => Exit::FallsThrough,
        },
        StmtKind::Switch { cases, .. } => {
            if !cases.iter().any(|c| c.is_default()) {
                return Exit::FallsThrough;
            }
            // Walk backwards so each case knows what falling through leads to.
            let mut next = Exit::FallsThrough;
            let mut all_return = true;
            for case in cases.iter().rev() {
                let exit = match exit_of_block(&case.statements, next) {
                    Exit::Jumps => Exit::FallsThrough,
                    exit => exit,
                };
                all_return &= exit == Exit::Returns;
                next = exit;
            }
            if all_return {
                Exit::Returns
            } else {
                Exit::FallsThrough
            }
        }
        _ => Exit::FallsThrough,
    }
}

/// True if control can reach the end of a non-void function's body.
pub fn can_exit_without_returning_value(body: &Statement) -> bool {
    exit_of(body) != Exit::Returns
}

struct ReturnCounter {
    count: usize,
}

impl Visitor for ReturnCounter {
    type Break = ();

    fn visit_expression(&mut self, _e: &Expression) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }

    fn visit_statement(&mut self, s: &Statement) -> ControlFlow<()> {
        if let StmtKind::Return(_) = s.kind {
            self.count += 1;
        }
        walk_statement(self, s)
    }
}

/// True if `body` returns anywhere other than as its final statement.
pub fn function_has_early_return(body: &Statement) -> bool {
    let mut counter = ReturnCounter { count: 0 };
    let _ = counter.visit_statement(body);
    if counter.count == 0 {
        return false;
    }
    let last_is_return = match &body.kind {
        StmtKind::Block { statements, .. } => {
            matches!(statements.last().map(|s| &s.kind), Some(StmtKind::Return(_)))
        }
        StmtKind::Return(_) => true,
        _ => false,
    };
    !(counter.count == 1 && last_is_return)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::stmt::SwitchCase;
    use crate::position::Position;

    fn stmt(kind: StmtKind) -> Statement {
        Statement::new(Position::default(), kind)
    }

    fn block(statements: Vec<Statement>) -> Statement {
        Statement::block(Position::default(), statements, true)
    }

    fn ret() -> Statement {
        stmt(StmtKind::Return(None))
    }

    #[test]
    fn test_return_on_all_paths() {
        assert!(!can_exit_without_returning_value(&block(vec![ret()])));
        assert!(can_exit_without_returning_value(&block(vec![])));
        let infinite = stmt(StmtKind::For {
            initializer: None,
            test: None,
            next: None,
            body: Box::new(block(vec![])),
            unroll_info: None,
        });
        assert!(!can_exit_without_returning_value(&block(vec![infinite])));
    }

    #[test]
    fn test_switch_fallthrough() {
        let case = |value: Option<i64>, statements: Vec<Statement>| SwitchCase {
            position: Position::default(),
            value,
            statements,
        };
        let value = crate::ir::expr::Expression::literal(
            Position::default(),
            0.0,
            crate::ir::types::builtin_types().int.clone(),
        );
        let falls_into_return = stmt(StmtKind::Switch {
            value: value.clone(),
            cases: vec![case(Some(0), vec![]), case(None, vec![ret()])],
        });
        assert!(!can_exit_without_returning_value(&block(vec![falls_into_return])));

        let breaks = stmt(StmtKind::Switch {
            value,
            cases: vec![case(Some(0), vec![stmt(StmtKind::Break)]), case(None, vec![ret()])],
        });
        assert!(can_exit_without_returning_value(&block(vec![breaks])));
    }

    #[test]
    fn test_loop_jumps_ignore_nested_loops() {
        let inner = stmt(StmtKind::Do {
            body: Box::new(block(vec![stmt(StmtKind::Break)])),
            test: crate::ir::expr::Expression::bool_literal(Position::default(), false),
        });
        let flow = loop_control_flow(&block(vec![inner, stmt(StmtKind::Continue)]));
        assert_eq!(
            flow,
            LoopControlFlow {
                has_break: false,
                has_continue: true,
                has_return: false
            }
        );
    }

    #[test]
    fn test_early_return() {
        assert!(!function_has_early_return(&block(vec![stmt(StmtKind::Nop), ret()])));
        let early = stmt(StmtKind::If {
            test: crate::ir::expr::Expression::bool_literal(Position::default(), true),
            if_true: Box::new(ret()),
            if_false: None,
        });
        assert!(function_has_early_return(&block(vec![early, ret()])));
    }
}
