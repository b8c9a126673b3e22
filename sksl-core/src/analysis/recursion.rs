use crate::ir::expr::{ExprKind, Expression};
use crate::ir::function::{FunctionDeclaration, FunctionDefinition};
use crate::ir::program::Module;
use crate::ir::visitor::{walk_expression, Visitor};
use crate::position::Position;
use std::collections::HashSet;
use std::ops::ControlFlow;
use std::sync::Arc;

struct CallSites {
    sites: Vec<(Position, Arc<FunctionDeclaration>)>,
}

impl Visitor for CallSites {
    type Break = ();

    fn visit_expression(&mut self, e: &Expression) -> ControlFlow<()> {
        if let ExprKind::FunctionCall { function, .. } = &e.kind {
            self.sites.push((e.position, function.clone()));
        }
        walk_expression(self, e)
    }
}

fn call_sites(def: &FunctionDefinition) -> Vec<(Position, Arc<FunctionDeclaration>)> {
    let mut visitor = CallSites { sites: Vec::new() };
    let _ = visitor.visit_statement(&def.body);
    visitor.sites
}

fn resolve(functions: &[Arc<FunctionDefinition>], decl: &FunctionDeclaration) -> Option<usize> {
    functions
        .iter()
        .position(|f| f.declaration.id == decl.id)
        .or_else(|| functions.iter().position(|f| f.declaration.matches_signature(decl)))
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Returns a function that takes part in a call cycle, if any exists.
pub fn detect_recursion(functions: &[Arc<FunctionDefinition>]) -> Option<Arc<FunctionDeclaration>> {
    let edges: Vec<Vec<usize>> = functions
        .iter()
        .map(|f| {
            call_sites(f)
                .iter()
                .filter_map(|(_, callee)| resolve(functions, callee))
                .collect()
        })
        .collect();
    let mut marks = vec![Mark::Unvisited; functions.len()];

    fn visit(node: usize, edges: &[Vec<usize>], marks: &mut [Mark]) -> Option<usize> {
        marks[node] = Mark::InProgress;
        for &next in &edges[node] {
            match marks[next] {
                Mark::InProgress => return Some(next),
                Mark::Unvisited => {
                    if let Some(found) = visit(next, edges, marks) {
                        return Some(found);
                    }
                }
                Mark::Done => {}
            }
        }
        marks[node] = Mark::Done;
        None
    }

    for start in 0..functions.len() {
        if marks[start] == Mark::Unvisited {
            if let Some(found) = visit(start, &edges, &mut marks) {
                return Some(functions[found].declaration.clone());
            }
        }
    }
    None
}

/// Calls to functions that have neither a definition among `functions` nor
/// in `module`, and are not lowered as intrinsics.
pub fn undefined_calls(
    functions: &[Arc<FunctionDefinition>],
    module: Option<&Module>,
) -> Vec<(Position, Arc<FunctionDeclaration>)> {
    let mut reported = HashSet::new();
    let mut out = Vec::new();
    for def in functions {
        for (position, callee) in call_sites(def) {
            if callee.intrinsic.is_some() || resolve(functions, &callee).is_some() {
                continue;
            }
            if module.and_then(|m| m.find_definition(&callee)).is_some() {
                continue;
            }
            if reported.insert(callee.id) {
                out.push((position, callee));
            }
        }
    }
    out
}
