use super::{position_of, span, Parser};
use crate::ir::convert::{
    array_type, convert_binary, convert_constructor, convert_field_access, convert_function_call,
    convert_identifier, convert_index, convert_method_call, convert_postfix, convert_prefix, convert_swizzle,
    convert_ternary,
};
use crate::ir::expr::Expression;
use crate::ir::function::FunctionDeclaration;
use crate::ir::operator::Operator;
use crate::ir::types::{builtin_types, TypeRef};
use crate::lexer::{Token, TokenKind};
use crate::position::Position;
use crate::symbol_table::Symbol;
use log::trace;
use std::sync::Arc;

/// Binary operator levels, loosest first. Each level's operands are parsed
/// at the next level down; the last level's operands are unary expressions.
const BINARY_LEVELS: &[&[TokenKind]] = &[
    &[TokenKind::LogicalOr],
    &[TokenKind::LogicalXor],
    &[TokenKind::LogicalAnd],
    &[TokenKind::BitwiseOr],
    &[TokenKind::BitwiseXor],
    &[TokenKind::BitwiseAnd],
    &[TokenKind::EqEq, TokenKind::Neq],
    &[TokenKind::Lt, TokenKind::Gt, TokenKind::LtEq, TokenKind::GtEq],
    &[TokenKind::Shl, TokenKind::Shr],
    &[TokenKind::Plus, TokenKind::Minus],
    &[TokenKind::Star, TokenKind::Slash, TokenKind::Percent],
];

/// What a primary expression turned out to be. Type and function names only
/// become expressions once a call or constructor suffix is applied.
enum Term {
    Expr(Expression),
    Type(TypeRef, Position),
    Functions(Vec<Arc<FunctionDeclaration>>, Position),
}

impl<'s, 'e> Parser<'s, 'e> {
    /// expression: assignmentExpression (COMMA assignmentExpression)*
    pub(crate) fn parse_expression(&mut self) -> Option<Expression> {
        trace!("parse_expression: next token = {:?}", self.peek());
        self.depth_scope(|p| {
            let mut result = p.parse_assignment_expression()?;
            while p.check_next(TokenKind::Comma).is_some() {
                if !p.increase_depth() {
                    return None;
                }
                let right = p.parse_assignment_expression()?;
                result = convert_binary(&mut p.ctx, result, Operator::Comma, right);
            }
            Some(result)
        })
    }

    /// assignmentExpression: ternaryExpression (ASSIGNOP assignmentExpression)?
    pub(crate) fn parse_assignment_expression(&mut self) -> Option<Expression> {
        trace!("parse_assignment_expression: next token = {:?}", self.peek());
        self.depth_scope(|p| {
            let result = p.parse_ternary_expression()?;
            let token = p.peek();
            match Operator::from_token(token.kind) {
                Some(op) if op.is_assignment() => {
                    p.next_token();
                    if !p.increase_depth() {
                        return None;
                    }
                    let right = p.parse_assignment_expression()?;
                    Some(convert_binary(&mut p.ctx, result, op, right))
                }
                _ => Some(result),
            }
        })
    }

    /// ternaryExpression: logicalOrExpression (QUESTION expression COLON assignmentExpression)?
    fn parse_ternary_expression(&mut self) -> Option<Expression> {
        trace!("parse_ternary_expression: next token = {:?}", self.peek());
        self.depth_scope(|p| {
            let test = p.parse_binary_expression(0)?;
            let Some(question) = p.check_next(TokenKind::Question) else {
                return Some(test);
            };
            if !p.increase_depth() {
                return None;
            }
            let if_true = p.parse_expression()?;
            p.expect(TokenKind::Colon, "':'")?;
            let if_false = p.parse_assignment_expression()?;
            Some(convert_ternary(&mut p.ctx, test, if_true, if_false, position_of(question)))
        })
    }

    fn parse_binary_expression(&mut self, level: usize) -> Option<Expression> {
        let Some(operators) = BINARY_LEVELS.get(level) else {
            return self.parse_unary_expression();
        };
        self.depth_scope(|p| {
            let mut result = p.parse_binary_expression(level + 1)?;
            loop {
                let token = p.peek();
                if !operators.contains(&token.kind) {
                    return Some(result);
                }
                let op = Operator::from_token(token.kind)?;
                p.next_token();
                if !p.increase_depth() {
                    return None;
                }
                let right = p.parse_binary_expression(level + 1)?;
                result = convert_binary(&mut p.ctx, result, op, right);
            }
        })
    }

    /// unaryExpression: (PLUS | MINUS | LOGICALNOT | BITWISENOT | PLUSPLUS | MINUSMINUS) unaryExpression
    ///                | postfixExpression
    fn parse_unary_expression(&mut self) -> Option<Expression> {
        trace!("parse_unary_expression: next token = {:?}", self.peek());
        self.depth_scope(|p| {
            let token = p.peek();
            match token.kind {
                TokenKind::Plus
                | TokenKind::Minus
                | TokenKind::LogicalNot
                | TokenKind::BitwiseNot
                | TokenKind::PlusPlus
                | TokenKind::MinusMinus => {
                    let op = Operator::from_token(token.kind)?;
                    p.next_token();
                    if !p.increase_depth() {
                        return None;
                    }
                    let operand = p.parse_unary_expression()?;
                    Some(convert_prefix(&mut p.ctx, position_of(token), op, operand))
                }
                _ => p.parse_postfix_expression(),
            }
        })
    }

    /// postfixExpression: term suffix*
    fn parse_postfix_expression(&mut self) -> Option<Expression> {
        trace!("parse_postfix_expression: next token = {:?}", self.peek());
        self.depth_scope(|p| {
            let mut term = p.parse_term()?;
            loop {
                let token = p.peek();
                let is_suffix = match token.kind {
                    TokenKind::LBracket
                    | TokenKind::Dot
                    | TokenKind::LParen
                    | TokenKind::PlusPlus
                    | TokenKind::MinusMinus => true,
                    TokenKind::FloatLiteral => p.text(token).starts_with('.'),
                    _ => false,
                };
                if !is_suffix {
                    return Some(p.finish_term(term));
                }
                if !p.increase_depth() {
                    return None;
                }
                term = p.parse_suffix(term)?;
            }
        })
    }

    /// Turns a term into a value, reporting type and function names used
    /// without a call.
    fn finish_term(&mut self, term: Term) -> Expression {
        match term {
            Term::Expr(expr) => expr,
            Term::Type(_, position) => {
                self.error(position, "expected '(' to begin constructor invocation");
                Expression::poison(position)
            }
            Term::Functions(_, position) => {
                self.error(position, "expected '(' to begin function call");
                Expression::poison(position)
            }
        }
    }

    fn parse_suffix(&mut self, term: Term) -> Option<Term> {
        let token = self.next_token();
        trace!("parse_suffix: {:?}", token);
        match (token.kind, term) {
            (TokenKind::LParen, Term::Type(ty, position)) => {
                let (arguments, end) = self.parse_call_arguments()?;
                let position = position.join(position_of(end));
                Some(Term::Expr(convert_constructor(&mut self.ctx, position, ty, arguments)))
            }
            (TokenKind::LParen, Term::Functions(functions, position)) => {
                let (arguments, end) = self.parse_call_arguments()?;
                let position = position.join(position_of(end));
                Some(Term::Expr(convert_function_call(&mut self.ctx, position, &functions, arguments)))
            }
            (TokenKind::LParen, Term::Expr(base)) => {
                let (_, end) = self.parse_call_arguments()?;
                let position = base.position.join(position_of(end));
                if !base.is_poison() {
                    self.error(position, format!("'{}' is not a function", base.description()));
                }
                Some(Term::Expr(Expression::poison(position)))
            }
            (TokenKind::LBracket, Term::Type(ty, position)) => {
                if let Some(end) = self.check_next(TokenKind::RBracket) {
                    let ty = array_type(&mut self.ctx, span(token, end), &ty, None);
                    return Some(Term::Type(ty, position.join(position_of(end))));
                }
                let size = self.parse_expression()?;
                let end = self.expect(TokenKind::RBracket, "']'")?;
                let ty = array_type(&mut self.ctx, span(token, end), &ty, Some(size));
                Some(Term::Type(ty, position.join(position_of(end))))
            }
            (_, term @ (Term::Type(..) | Term::Functions(..))) => {
                self.pushback = Some(token);
                let expr = self.finish_term(term);
                Some(Term::Expr(Expression::poison(expr.position)))
            }
            (TokenKind::LBracket, Term::Expr(base)) => {
                if let Some(end) = self.check_next(TokenKind::RBracket) {
                    self.error(span(token, end), "missing index in '[]'");
                    return Some(Term::Expr(Expression::poison(base.position)));
                }
                let index = self.parse_expression()?;
                let end = self.expect(TokenKind::RBracket, "']'")?;
                Some(Term::Expr(convert_index(&mut self.ctx, base, index, span(token, end))))
            }
            (TokenKind::Dot, Term::Expr(base)) => {
                let name = self.expect(TokenKind::Identifier, "an identifier")?;
                let text = self.text(name);
                if self.check_next(TokenKind::LParen).is_some() {
                    let (arguments, end) = self.parse_call_arguments()?;
                    let position = base.position.join(position_of(end));
                    return Some(Term::Expr(convert_method_call(&mut self.ctx, position, base, text, arguments)));
                }
                Some(Term::Expr(convert_field_access(&mut self.ctx, base, text, position_of(name))))
            }
            (TokenKind::FloatLiteral, Term::Expr(base)) => {
                // `.0r` lexes as the float `.0` followed directly by `r`.
                let mut mask = self.text(token)[1..].to_string();
                let mut end = token;
                let raw = self.next_raw_token();
                if raw.kind == TokenKind::Identifier && raw.offset as usize == token.end() {
                    mask.push_str(self.text(raw));
                    end = raw;
                } else {
                    self.pushback = Some(raw);
                }
                let position = base.position.join(position_of(end));
                Some(Term::Expr(convert_swizzle(&mut self.ctx, base, &mask, position)))
            }
            (TokenKind::PlusPlus | TokenKind::MinusMinus, Term::Expr(base)) => {
                let op = Operator::from_token(token.kind)?;
                Some(Term::Expr(convert_postfix(&mut self.ctx, base, op, position_of(token))))
            }
            (_, Term::Expr(base)) => {
                self.error(position_of(token), format!("unexpected {}", self.describe(token)));
                Some(Term::Expr(base))
            }
        }
    }

    /// Arguments after an opening parenthesis, through the closing one.
    fn parse_call_arguments(&mut self) -> Option<(Vec<Expression>, Token)> {
        let mut arguments = Vec::new();
        if let Some(end) = self.check_next(TokenKind::RParen) {
            return Some((arguments, end));
        }
        loop {
            arguments.push(self.parse_assignment_expression()?);
            if self.check_next(TokenKind::Comma).is_none() {
                break;
            }
        }
        let end = self.expect(TokenKind::RParen, "')'")?;
        Some((arguments, end))
    }

    /// term: IDENTIFIER | INT_LITERAL | FLOAT_LITERAL | BOOL_LITERAL | LPAREN expression RPAREN
    fn parse_term(&mut self) -> Option<Term> {
        trace!("parse_term: next token = {:?}", self.peek());
        let token = self.next_token();
        let position = position_of(token);
        match token.kind {
            TokenKind::Identifier => {
                let name = self.text(token);
                let term = match self.ctx.symbols.lookup(name) {
                    Some(Symbol::Type(ty)) => Term::Type(ty, position),
                    Some(Symbol::Functions(functions)) => Term::Functions(functions, position),
                    _ => Term::Expr(convert_identifier(&mut self.ctx, position, name)),
                };
                Some(term)
            }
            TokenKind::IntLiteral => Some(Term::Expr(self.int_literal(token))),
            TokenKind::FloatLiteral => Some(Term::Expr(self.float_literal(token))),
            TokenKind::TrueLiteral => Some(Term::Expr(Expression::bool_literal(position, true))),
            TokenKind::FalseLiteral => Some(Term::Expr(Expression::bool_literal(position, false))),
            TokenKind::LParen => {
                if !self.increase_depth() {
                    return None;
                }
                let mut expr = self.parse_expression()?;
                let end = self.expect(TokenKind::RParen, "')'")?;
                expr.position = span(token, end);
                Some(Term::Expr(expr))
            }
            _ => {
                self.error(position, format!("expected expression, but found {}", self.describe(token)));
                None
            }
        }
    }

    fn int_literal(&mut self, token: Token) -> Expression {
        let text = self.text(token);
        let position = position_of(token);
        let (digits, unsigned) = match text.strip_suffix(['u', 'U']) {
            Some(digits) => (digits, true),
            None => (text, false),
        };
        let is_hex = digits.starts_with("0x") || digits.starts_with("0X");
        let parsed = if is_hex {
            u64::from_str_radix(&digits[2..], 16)
        } else {
            digits.parse::<u64>()
        };
        let value = match parsed {
            Ok(v) if v <= u32::MAX as u64 => v,
            _ => {
                self.error(position, format!("integer is too large: {}", text));
                return Expression::poison(position);
            }
        };
        let types = builtin_types();
        if unsigned {
            return Expression::literal(position, value as f64, types.uint.clone());
        }
        if value > i32::MAX as u64 {
            if !is_hex {
                self.error(position, format!("integer is out of range for type 'int': {}", text));
                return Expression::poison(position);
            }
            // Hex literals spell out a bit pattern.
            return Expression::literal(position, value as u32 as i32 as f64, types.int.clone());
        }
        Expression::literal(position, value as f64, types.int.clone())
    }

    fn float_literal(&mut self, token: Token) -> Expression {
        let text = self.text(token);
        let position = position_of(token);
        let digits = text.trim_end_matches(['f', 'F']);
        match digits.parse::<f64>() {
            Ok(v) if (v as f32).is_finite() => Expression::literal(position, v as f32 as f64, builtin_types().float.clone()),
            _ => {
                self.error(position, format!("floating-point value is too large: {}", text));
                Expression::poison(position)
            }
        }
    }
}
