use super::{position_of, span, Parser, VarDeclarationPrefix};
use crate::ir::convert::{
    convert_break, convert_continue, convert_discard, convert_do, convert_expression_statement, convert_for,
    convert_if, convert_return, convert_switch, convert_var_declaration, convert_while, ParsedCase,
};
use crate::ir::stmt::Statement;
use crate::ir::variable::VariableStorage;
use crate::lexer::{Token, TokenKind};
use log::trace;

impl<'s, 'e> Parser<'s, 'e> {
    pub(crate) fn parse_statement(&mut self) -> Option<Statement> {
        trace!("parse_statement: next token = {:?}", self.peek());
        self.depth_scope(|p| {
            if !p.increase_depth() {
                return None;
            }
            let token = p.peek();
            match token.kind {
                TokenKind::If => p.parse_if_statement(),
                TokenKind::For => p.parse_for_statement(),
                TokenKind::Do => p.parse_do_statement(),
                TokenKind::While => p.parse_while_statement(),
                TokenKind::Switch => p.parse_switch_statement(),
                TokenKind::Return => p.parse_return_statement(),
                TokenKind::Break => {
                    p.next_token();
                    let end = p.expect(TokenKind::Semicolon, "';'")?;
                    Some(convert_break(&mut p.ctx, span(token, end)))
                }
                TokenKind::Continue => {
                    p.next_token();
                    let end = p.expect(TokenKind::Semicolon, "';'")?;
                    Some(convert_continue(&mut p.ctx, span(token, end)))
                }
                TokenKind::Discard => {
                    p.next_token();
                    let end = p.expect(TokenKind::Semicolon, "';'")?;
                    Some(convert_discard(&mut p.ctx, span(token, end)))
                }
                TokenKind::LBrace => p.parse_block(),
                TokenKind::Semicolon => {
                    p.next_token();
                    Some(Statement::nop(position_of(token)))
                }
                TokenKind::Const
                | TokenKind::Highp
                | TokenKind::Mediump
                | TokenKind::Lowp
                | TokenKind::Identifier => p.parse_var_declarations_or_expression_statement(),
                _ => p.parse_expression_statement(),
            }
        })
    }

    /// block: LBRACE statement* RBRACE
    pub(crate) fn parse_block(&mut self) -> Option<Statement> {
        trace!("parse_block: next token = {:?}", self.peek());
        self.depth_scope(|p| {
            let start = p.expect(TokenKind::LBrace, "'{'")?;
            if !p.increase_depth() {
                return None;
            }
            p.ctx.symbols.push_scope();
            let result = p.parse_block_contents(start);
            p.ctx.symbols.pop_scope();
            result
        })
    }

    fn parse_block_contents(&mut self, start: Token) -> Option<Statement> {
        let mut statements = Vec::new();
        loop {
            let token = self.peek();
            match token.kind {
                TokenKind::RBrace => {
                    self.next_token();
                    return Some(Statement::block(span(start, token), statements, true));
                }
                TokenKind::EndOfFile => {
                    self.fatal_error(position_of(token), "expected '}', but found end of file");
                    return None;
                }
                _ => {
                    let before = self.cursor();
                    let statement = self.parse_statement();
                    if self.encountered_fatal_error {
                        return None;
                    }
                    match statement {
                        Some(statement) => statements.push(statement),
                        None if self.cursor() == before => {
                            self.next_token();
                        }
                        None => {}
                    }
                }
            }
        }
    }

    fn parse_if_statement(&mut self) -> Option<Statement> {
        trace!("parse_if_statement: next token = {:?}", self.peek());
        let start = self.expect(TokenKind::If, "'if'")?;
        self.expect(TokenKind::LParen, "'('")?;
        let test = self.parse_expression()?;
        self.expect(TokenKind::RParen, "')'")?;
        let if_true = self.parse_statement()?;
        let mut position = position_of(start).join(if_true.position);
        let if_false = match self.check_next(TokenKind::Else) {
            Some(_) => {
                let statement = self.parse_statement()?;
                position = position.join(statement.position);
                Some(statement)
            }
            None => None,
        };
        Some(convert_if(&mut self.ctx, position, test, if_true, if_false))
    }

    /// Parses a loop body with `break` and `continue` permitted.
    fn parse_loop_body(&mut self) -> Option<Statement> {
        self.ctx.enter_loop();
        let body = self.parse_statement();
        self.ctx.exit_loop();
        body
    }

    /// forStatement: FOR LPAREN (declaration | expression)? SEMICOLON expression? SEMICOLON expression? RPAREN statement
    fn parse_for_statement(&mut self) -> Option<Statement> {
        trace!("parse_for_statement: next token = {:?}", self.peek());
        let start = self.expect(TokenKind::For, "'for'")?;
        self.expect(TokenKind::LParen, "'('")?;
        // The loop header declares into a scope of its own.
        self.ctx.symbols.push_scope();
        let result = self.parse_for_rest(start);
        self.ctx.symbols.pop_scope();
        result
    }

    fn parse_for_rest(&mut self, start: Token) -> Option<Statement> {
        let initializer = match self.check_next(TokenKind::Semicolon) {
            Some(_) => None,
            None => Some(self.parse_var_declarations_or_expression_statement()?),
        };
        let test = match self.peek().kind {
            TokenKind::Semicolon => None,
            _ => Some(self.parse_expression()?),
        };
        self.expect(TokenKind::Semicolon, "';'")?;
        let next = match self.peek().kind {
            TokenKind::RParen => None,
            _ => Some(self.parse_expression()?),
        };
        self.expect(TokenKind::RParen, "')'")?;
        let body = self.parse_loop_body()?;
        let position = position_of(start).join(body.position);
        Some(convert_for(&mut self.ctx, position, initializer, test, next, body))
    }

    /// whileStatement: WHILE LPAREN expression RPAREN statement
    fn parse_while_statement(&mut self) -> Option<Statement> {
        trace!("parse_while_statement: next token = {:?}", self.peek());
        let start = self.expect(TokenKind::While, "'while'")?;
        self.expect(TokenKind::LParen, "'('")?;
        let test = self.parse_expression()?;
        self.expect(TokenKind::RParen, "')'")?;
        let body = self.parse_loop_body()?;
        let position = position_of(start).join(body.position);
        Some(convert_while(&mut self.ctx, position, test, body))
    }

    /// doStatement: DO statement WHILE LPAREN expression RPAREN SEMICOLON
    fn parse_do_statement(&mut self) -> Option<Statement> {
        trace!("parse_do_statement: next token = {:?}", self.peek());
        let start = self.expect(TokenKind::Do, "'do'")?;
        let body = self.parse_loop_body()?;
        self.expect(TokenKind::While, "'while'")?;
        self.expect(TokenKind::LParen, "'('")?;
        let test = self.parse_expression()?;
        self.expect(TokenKind::RParen, "')'")?;
        let end = self.expect(TokenKind::Semicolon, "';'")?;
        Some(convert_do(&mut self.ctx, span(start, end), body, test))
    }

    /// switchStatement: SWITCH LPAREN expression RPAREN LBRACE switchCase* defaultCase? RBRACE
    fn parse_switch_statement(&mut self) -> Option<Statement> {
        trace!("parse_switch_statement: next token = {:?}", self.peek());
        let start = self.expect(TokenKind::Switch, "'switch'")?;
        self.expect(TokenKind::LParen, "'('")?;
        let value = self.parse_expression()?;
        self.expect(TokenKind::RParen, "')'")?;
        self.expect(TokenKind::LBrace, "'{'")?;
        self.ctx.symbols.push_scope();
        self.ctx.enter_switch();
        let cases = self.parse_switch_cases();
        self.ctx.exit_switch();
        self.ctx.symbols.pop_scope();
        let (cases, end) = cases?;
        Some(convert_switch(&mut self.ctx, span(start, end), value, cases))
    }

    /// `default` may only come last; anything after it other than `}` is
    /// rejected by the closing-brace check.
    fn parse_switch_cases(&mut self) -> Option<(Vec<ParsedCase>, Token)> {
        let mut cases = Vec::new();
        while let Some(case) = self.check_next(TokenKind::Case) {
            let value = self.parse_expression()?;
            self.expect(TokenKind::Colon, "':'")?;
            let statements = self.parse_case_body()?;
            cases.push((Some(value), position_of(case), statements));
        }
        if let Some(default) = self.check_next(TokenKind::Default) {
            self.expect(TokenKind::Colon, "':'")?;
            let statements = self.parse_case_body()?;
            cases.push((None, position_of(default), statements));
        }
        let end = self.expect(TokenKind::RBrace, "'}'")?;
        Some((cases, end))
    }

    fn parse_case_body(&mut self) -> Option<Vec<Statement>> {
        let mut statements = Vec::new();
        loop {
            match self.peek().kind {
                TokenKind::RBrace | TokenKind::Case | TokenKind::Default | TokenKind::EndOfFile => {
                    return Some(statements);
                }
                _ => statements.push(self.parse_statement()?),
            }
        }
    }

    /// returnStatement: RETURN expression? SEMICOLON
    fn parse_return_statement(&mut self) -> Option<Statement> {
        trace!("parse_return_statement: next token = {:?}", self.peek());
        let start = self.expect(TokenKind::Return, "'return'")?;
        let value = match self.peek().kind {
            TokenKind::Semicolon => None,
            _ => Some(self.parse_expression()?),
        };
        let end = self.expect(TokenKind::Semicolon, "';'")?;
        Some(convert_return(&mut self.ctx, span(start, end), value))
    }

    /// expressionStatement: expression SEMICOLON
    fn parse_expression_statement(&mut self) -> Option<Statement> {
        trace!("parse_expression_statement: next token = {:?}", self.peek());
        let expr = self.parse_expression()?;
        self.expect(TokenKind::Semicolon, "';'")?;
        Some(convert_expression_statement(expr))
    }

    /// A local declaration if the tokens read as `modifiers type name`,
    /// otherwise an expression statement. Only the declaration prefix is
    /// parsed speculatively.
    pub(crate) fn parse_var_declarations_or_expression_statement(&mut self) -> Option<Statement> {
        trace!(
            "parse_var_declarations_or_expression_statement: next token = {:?}",
            self.peek()
        );
        let token = self.peek();
        if token.kind == TokenKind::Const {
            let prefix = self.parse_var_declaration_prefix()?;
            return self.parse_local_declarations_end(prefix);
        }
        let looks_like_type = match token.kind {
            TokenKind::Highp | TokenKind::Mediump | TokenKind::Lowp => true,
            TokenKind::Identifier => self.ctx.symbols.is_type(self.text(token)),
            _ => false,
        };
        if looks_like_type {
            let checkpoint = self.checkpoint();
            if let Some(prefix) = self.parse_var_declaration_prefix() {
                self.accept(checkpoint);
                return self.parse_local_declarations_end(prefix);
            }
            self.rewind(checkpoint);
        }
        self.parse_expression_statement()
    }

    pub(crate) fn parse_var_declaration_prefix(&mut self) -> Option<VarDeclarationPrefix> {
        trace!("parse_var_declaration_prefix: next token = {:?}", self.peek());
        let modifiers = self.parse_modifiers();
        let ty = self.parse_type()?;
        let name = self.expect_identifier()?;
        Some(VarDeclarationPrefix { modifiers, ty, name })
    }

    fn parse_local_declarations_end(&mut self, prefix: VarDeclarationPrefix) -> Option<Statement> {
        let start = prefix.modifiers.position.join(position_of(prefix.name));
        let mut statements = Vec::new();
        self.parse_var_declarations_end(prefix, |p, position, modifiers, ty, name, value| {
            let statement = convert_var_declaration(
                &mut p.ctx,
                position,
                modifiers,
                ty,
                name,
                value,
                VariableStorage::Local,
            );
            statements.push(statement);
        })?;
        if statements.len() == 1 {
            return statements.pop();
        }
        let position = statements.iter().fold(start, |acc, s| acc.join(s.position));
        Some(Statement::block(position, statements, false))
    }
}
