use crate::ir::expr::{ExprKind, Expression, RefKind};
use crate::ir::program::{Program, ProgramElement};
use crate::ir::stmt::{Statement, StmtKind};
use crate::ir::variable::Variable;
use crate::ir::visitor::{walk_expression, walk_program_element, walk_statement, Visitor};
use std::collections::{HashMap, HashSet};
use std::ops::ControlFlow;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VariableCounts {
    pub declarations: usize,
    pub reads: usize,
    /// Includes the initializer, if any.
    pub writes: usize,
}

/// Read/write counts per variable and call counts per function, keyed by
/// symbol id.
#[derive(Debug, Default)]
pub struct ProgramUsage {
    variables: HashMap<u32, VariableCounts>,
    calls: HashMap<u32, usize>,
}

impl ProgramUsage {
    /// Counts every use in the program, following calls into built-in module
    /// functions so that their locals are counted too.
    pub fn for_program(program: &Program) -> ProgramUsage {
        let mut usage = ProgramUsage::default();
        for element in &program.elements {
            let _ = usage.visit_program_element(element);
        }
        let mut visited: HashSet<u32> = program.functions().map(|f| f.declaration.id).collect();
        let mut pending: Vec<_> = program
            .functions()
            .flat_map(|f| called_functions(&f.body))
            .collect();
        while let Some(decl) = pending.pop() {
            let Some(def) = program.find_definition(&decl) else {
                continue;
            };
            if visited.insert(def.declaration.id) {
                for param in &def.declaration.parameters {
                    usage.entry(param).declarations += 1;
                }
                let _ = usage.visit_statement(&def.body);
                pending.extend(called_functions(&def.body));
            }
        }
        log::debug!(
            "usage: {} variables, {} functions called",
            usage.variables.len(),
            usage.calls.len()
        );
        usage
    }

    /// Counts the uses in a list of elements only.
    pub fn for_elements(elements: &[ProgramElement]) -> ProgramUsage {
        let mut usage = ProgramUsage::default();
        for element in elements {
            let _ = usage.visit_program_element(element);
        }
        usage
    }

    pub fn get(&self, variable: &Variable) -> VariableCounts {
        self.variables.get(&variable.id).copied().unwrap_or_default()
    }

    pub fn call_count(&self, function_id: u32) -> usize {
        self.calls.get(&function_id).copied().unwrap_or(0)
    }

    fn entry(&mut self, variable: &Variable) -> &mut VariableCounts {
        self.variables.entry(variable.id).or_default()
    }
}

impl Visitor for ProgramUsage {
    type Break = ();

    fn visit_program_element(&mut self, e: &ProgramElement) -> ControlFlow<()> {
        if let ProgramElement::Function(def) = e {
            for param in &def.declaration.parameters {
                self.entry(param).declarations += 1;
            }
        }
        walk_program_element(self, e)
    }

    fn visit_statement(&mut self, s: &Statement) -> ControlFlow<()> {
        if let StmtKind::VarDeclaration { variable, value } = &s.kind {
            let counts = self.entry(variable);
            counts.declarations += 1;
            if value.is_some() {
                counts.writes += 1;
            }
        }
        walk_statement(self, s)
    }

    fn visit_expression(&mut self, e: &Expression) -> ControlFlow<()> {
        match &e.kind {
            ExprKind::VariableReference { variable, ref_kind } => {
                let counts = self.entry(variable);
                match ref_kind {
                    RefKind::Read => counts.reads += 1,
                    RefKind::Write => counts.writes += 1,
                    RefKind::ReadWrite | RefKind::Pointer => {
                        counts.reads += 1;
                        counts.writes += 1;
                    }
                }
            }
            ExprKind::FunctionCall { function, .. } => {
                *self.calls.entry(function.id).or_default() += 1;
            }
            _ => {}
        }
        walk_expression(self, e)
    }
}

struct CallCollector {
    calls: Vec<std::sync::Arc<crate::ir::function::FunctionDeclaration>>,
}

impl Visitor for CallCollector {
    type Break = ();

    fn visit_expression(&mut self, e: &Expression) -> ControlFlow<()> {
        if let ExprKind::FunctionCall { function, .. } = &e.kind {
            self.calls.push(function.clone());
        }
        walk_expression(self, e)
    }
}

/// Every function called from `body`, in call order, with repeats.
pub fn called_functions(body: &Statement) -> Vec<std::sync::Arc<crate::ir::function::FunctionDeclaration>> {
    let mut collector = CallCollector { calls: Vec::new() };
    let _ = collector.visit_statement(body);
    collector.calls
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::modifiers::Modifiers;
    use crate::ir::operator::Operator;
    use crate::ir::types::builtin_types;
    use crate::ir::variable::VariableStorage;
    use crate::position::Position;

    #[test]
    fn test_counts() {
        let pos = Position::default();
        let x = Variable::new(
            "x",
            builtin_types().float.clone(),
            Modifiers::default(),
            VariableStorage::Local,
            pos,
            false,
        );
        let one = Expression::literal(pos, 1.0, builtin_types().float.clone());
        let decl = Statement::new(
            pos,
            StmtKind::VarDeclaration {
                variable: x.clone(),
                value: Some(one.clone()),
            },
        );
        let add = Expression::new(
            pos,
            x.ty.clone(),
            ExprKind::Binary {
                left: Box::new(Expression::variable_reference(pos, x.clone(), RefKind::ReadWrite)),
                op: Operator::PlusEq,
                right: Box::new(Expression::variable_reference(pos, x.clone(), RefKind::Read)),
            },
        );
        let body = Statement::block(pos, vec![decl, Statement::new(pos, StmtKind::Expression(add))], true);
        let mut usage = ProgramUsage::default();
        let _ = usage.visit_statement(&body);
        assert_eq!(
            usage.get(&x),
            VariableCounts {
                declarations: 1,
                reads: 2,
                writes: 2
            }
        );
    }
}
