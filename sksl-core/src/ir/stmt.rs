use super::expr::Expression;
use super::variable::Variable;
use crate::position::Position;
use std::sync::Arc;

/// Trip information for a `for` loop with constant bounds and a constant step.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopUnrollInfo {
    pub index: Arc<Variable>,
    pub start: f64,
    pub delta: f64,
    pub count: u32,
}

#[derive(Debug, Clone)]
pub struct SwitchCase {
    pub position: Position,
    /// `None` for `default:`, which the grammar only accepts last.
    pub value: Option<i64>,
    pub statements: Vec<Statement>,
}

impl SwitchCase {
    pub fn is_default(&self) -> bool {
        self.value.is_none()
    }
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    Block {
        statements: Vec<Statement>,
        /// False for blocks synthesized by the compiler that do not open a scope.
        scoped: bool,
    },
    Expression(Expression),
    VarDeclaration {
        variable: Arc<Variable>,
        value: Option<Expression>,
    },
    If {
        test: Expression,
        if_true: Box<Statement>,
        if_false: Option<Box<Statement>>,
    },
    /// `while` loops are `for` loops without an initializer or next-expression.
    For {
        initializer: Option<Box<Statement>>,
        test: Option<Expression>,
        next: Option<Expression>,
        body: Box<Statement>,
        unroll_info: Option<LoopUnrollInfo>,
    },
    Do {
        body: Box<Statement>,
        test: Expression,
    },
    Switch {
        value: Expression,
        cases: Vec<SwitchCase>,
    },
    Break,
    Continue,
    Discard,
    Return(Option<Expression>),
    Nop,
}

#[derive(Debug, Clone)]
pub struct Statement {
    pub position: Position,
    pub kind: StmtKind,
}

fn indent(level: usize) -> String {
    "    ".repeat(level)
}

impl Statement {
    pub fn new(position: Position, kind: StmtKind) -> Statement {
        Statement { position, kind }
    }

    pub fn nop(position: Position) -> Statement {
        Statement::new(position, StmtKind::Nop)
    }

    pub fn block(position: Position, statements: Vec<Statement>, scoped: bool) -> Statement {
        Statement::new(position, StmtKind::Block { statements, scoped })
    }

    pub fn is_empty(&self) -> bool {
        match &self.kind {
            StmtKind::Nop => true,
            StmtKind::Block { statements, .. } => statements.iter().all(Statement::is_empty),
            _ => false,
        }
    }

    pub fn description(&self) -> String {
        self.description_at(0)
    }

    pub fn description_at(&self, level: usize) -> String {
        let pad = indent(level);
        match &self.kind {
            StmtKind::Block { statements, scoped } => {
                if !*scoped && level > 0 {
                    return statements
                        .iter()
                        .map(|s| s.description_at(level))
                        .collect::<Vec<_>>()
                        .join("\n");
                }
                let mut out = format!("{}{{\n", pad);
                for s in statements {
                    out.push_str(&s.description_at(level + 1));
                    out.push('\n');
                }
                out.push_str(&pad);
                out.push('}');
                out
            }
            StmtKind::Expression(expr) => format!("{}{};", pad, expr.description()),
            StmtKind::VarDeclaration { variable, value } => {
                format!("{}{}", pad, var_declaration_text(variable, value.as_ref()))
            }
            StmtKind::If {
                test,
                if_true,
                if_false,
            } => {
                let mut out = format!("{}if ({})\n{}", pad, test.description(), nested(if_true, level));
                if let Some(f) = if_false {
                    out.push_str(&format!("\n{}else\n{}", pad, nested(f, level)));
                }
                out
            }
            StmtKind::For {
                initializer,
                test,
                next,
                body,
                ..
            } => {
                if initializer.is_none() && next.is_none() {
                    if let Some(test) = test {
                        return format!("{}while ({})\n{}", pad, test.description(), nested(body, level));
                    }
                }
                let init = match initializer {
                    Some(s) => s.description_at(0),
                    None => ";".to_string(),
                };
                let test = test.as_ref().map(|t| t.description()).unwrap_or_default();
                let next = next.as_ref().map(|n| n.description()).unwrap_or_default();
                format!("{}for ({} {}; {})\n{}", pad, init, test, next, nested(body, level))
            }
            StmtKind::Do { body, test } => {
                format!("{}do\n{}\n{}while ({});", pad, nested(body, level), pad, test.description())
            }
            StmtKind::Switch { value, cases } => {
                let mut out = format!("{}switch ({}) {{\n", pad, value.description());
                for case in cases {
                    match case.value {
                        Some(v) => out.push_str(&format!("{}    case {}:\n", pad, v)),
                        None => out.push_str(&format!("{}    default:\n", pad)),
                    }
                    for s in &case.statements {
                        out.push_str(&s.description_at(level + 2));
                        out.push('\n');
                    }
                }
                out.push_str(&pad);
                out.push('}');
                out
            }
            StmtKind::Break => format!("{}break;", pad),
            StmtKind::Continue => format!("{}continue;", pad),
            StmtKind::Discard => format!("{}discard;", pad),
            StmtKind::Return(Some(expr)) => format!("{}return {};", pad, expr.description()),
            StmtKind::Return(None) => format!("{}return;", pad),
            StmtKind::Nop => format!("{};", pad),
        }
    }
}

fn nested(stmt: &Statement, level: usize) -> String {
    match &stmt.kind {
        StmtKind::Block { .. } => stmt.description_at(level),
        _ => stmt.description_at(level + 1),
    }
}

/// `const float x = 1.0;` and friends.
pub fn var_declaration_text(variable: &Variable, value: Option<&Expression>) -> String {
    let (base, suffix) = match variable.ty.name.find('[') {
        Some(i) => (&variable.ty.name[..i], &variable.ty.name[i..]),
        None => (variable.ty.name.as_str(), ""),
    };
    let mut out = format!("{}{} {}{}", variable.modifiers, base, variable.name, suffix);
    if let Some(value) = value {
        out.push_str(" = ");
        out.push_str(&value.description());
    }
    out.push(';');
    out
}
