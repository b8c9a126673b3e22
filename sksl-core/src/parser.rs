//! Recursive-descent parser.
//!
//! Tokens are pulled from the [`Lexer`] on demand, and every construct is
//! handed to the `ir::convert` layer as soon as it is recognized, so the
//! parser produces type-checked IR directly. Syntax errors go through the
//! context's error sink; a production that cannot continue returns `None`
//! and lets its caller resynchronize.

mod declarations;
mod expression;
mod statements;

#[cfg(test)]
mod tests;

use crate::context::Context;
use crate::ir::convert::finish_program;
use crate::ir::modifiers::Modifiers;
use crate::ir::program::{Module, Program, ProgramElement};
use crate::ir::types::TypeRef;
use crate::lexer::{Lexer, Token, TokenKind};
use crate::position::Position;
use crate::settings::Version;
use log::trace;
use std::sync::Arc;

/// Nesting limit for statements, blocks and expressions.
pub const MAX_PARSE_DEPTH: usize = 50;

/// Sources beyond this many bytes are rejected outright.
pub const MAX_SOURCE_LENGTH: usize = 8 * 1024 * 1024;

pub(crate) fn position_of(token: Token) -> Position {
    Position::range(token.offset as usize, token.end())
}

pub(crate) fn span(start: Token, end: Token) -> Position {
    Position::range(start.offset as usize, end.end())
}

/// Saved parser state for speculative parsing.
struct Checkpoint {
    offset: usize,
    pushback: Option<Token>,
    depth: usize,
    encountered_fatal_error: bool,
}

/// `modifiers type name`, the part shared by every variable declaration.
pub(crate) struct VarDeclarationPrefix {
    pub modifiers: Modifiers,
    pub ty: TypeRef,
    pub name: Token,
}

pub struct Parser<'s, 'e> {
    lexer: Lexer<'s>,
    pushback: Option<Token>,
    pub(crate) ctx: Context<'e>,
    depth: usize,
    encountered_fatal_error: bool,
    /// Errors already reported before this parser started.
    initial_errors: usize,
    /// Becomes true once anything other than `#version` has been read.
    started: bool,
}

impl<'s, 'e> Parser<'s, 'e> {
    pub fn new(source: &'s str, ctx: Context<'e>) -> Self {
        let initial_errors = ctx.errors.error_count();
        Parser {
            lexer: Lexer::new(source),
            pushback: None,
            ctx,
            depth: 0,
            encountered_fatal_error: false,
            initial_errors,
            started: false,
        }
    }

    /// Parses a complete program. Returns `None` if any error was reported.
    pub fn program(mut self) -> Option<Program> {
        self.parse_declarations();
        finish_program(&mut self.ctx);
        let source: Arc<str> = Arc::from(self.lexer.source());
        let ctx = self.ctx;
        if ctx.errors.error_count() > self.initial_errors {
            return None;
        }
        let module = ctx.module?;
        Some(Program {
            kind: ctx.kind,
            settings: ctx.settings,
            source,
            module,
            symbols: ctx.symbols,
            elements: ctx.elements,
        })
    }

    /// Parses a built-in module on top of the context's parent module. A
    /// module is produced even when errors were reported; callers check the
    /// reporter.
    pub fn module_inheriting_from(mut self, name: &'static str) -> Module {
        self.parse_declarations();
        let ctx = self.ctx;
        Module {
            name,
            symbols: Arc::new(ctx.symbols),
            elements: ctx.elements,
            parent: ctx.module,
        }
    }

    fn parse_declarations(&mut self) {
        if self.lexer.source().len() > MAX_SOURCE_LENGTH {
            self.error(Position::at(0), "program is too large");
            return;
        }
        loop {
            let token = self.peek();
            trace!("parse_declarations: next token = {:?}", token);
            match token.kind {
                TokenKind::EndOfFile => return,
                TokenKind::Invalid => {
                    self.error(position_of(token), "invalid token");
                    return;
                }
                TokenKind::Directive => self.parse_directive(),
                _ => {
                    let before = self.cursor();
                    self.parse_declaration();
                    if self.encountered_fatal_error {
                        return;
                    }
                    if self.cursor() == before {
                        self.next_token();
                    }
                }
            }
            self.started = true;
        }
    }

    fn parse_directive(&mut self) {
        let token = self.next_token();
        trace!("parse_directive: {:?}", self.text(token));
        match self.text(token) {
            "#version" => {
                if self.started {
                    self.error(position_of(token), "'#version' must be the first token in the file");
                }
                self.parse_version(token);
            }
            "#extension" => {
                self.parse_extension(token);
            }
            other => {
                self.error(position_of(token), format!("unsupported directive '{}'", other));
            }
        }
    }

    fn parse_version(&mut self, directive: Token) -> Option<()> {
        let number = self.expect(TokenKind::IntLiteral, "a version number")?;
        let text = self.text(number);
        let version = match text {
            "100" => Version::V100,
            "300" => Version::V300,
            _ => {
                self.error(span(directive, number), format!("unsupported version '{}'", text));
                return None;
            }
        };
        if version > self.ctx.settings.max_version_allowed {
            self.error(span(directive, number), format!("version '{}' is not supported", text));
            return None;
        }
        let next = self.peek();
        if next.kind == TokenKind::Identifier && self.text(next) == "es" {
            self.next_token();
        }
        if version == Version::V100 {
            self.ctx.settings.enforce_es2_restrictions = true;
        }
        Some(())
    }

    fn parse_extension(&mut self, directive: Token) -> Option<()> {
        let name = self.expect(TokenKind::Identifier, "an identifier")?;
        self.expect(TokenKind::Colon, "':'")?;
        let behavior = self.expect(TokenKind::Identifier, "an identifier")?;
        let after = self.next_raw_token();
        let ends_line = match after.kind {
            TokenKind::EndOfFile | TokenKind::LineComment => true,
            TokenKind::Whitespace => {
                let text = self.text(after);
                text.contains('\n') || text.contains('\r')
            }
            _ => false,
        };
        self.pushback = Some(after);
        if !ends_line {
            self.error(position_of(after), "invalid #extension directive");
            return None;
        }
        let position = span(directive, behavior);
        let (name, behavior) = (self.text(name).to_string(), self.text(behavior).to_string());
        self.ctx.elements.push(ProgramElement::Extension {
            name,
            behavior,
            position,
        });
        Some(())
    }

    // Token stream

    pub(crate) fn text(&self, token: Token) -> &'s str {
        self.lexer.text(token)
    }

    /// Offset of the next unread token.
    fn cursor(&self) -> usize {
        match self.pushback {
            Some(token) => token.offset as usize,
            None => self.lexer.checkpoint(),
        }
    }

    /// The next token, trivia included.
    fn next_raw_token(&mut self) -> Token {
        match self.pushback.take() {
            Some(token) => token,
            None => self.lexer.next(),
        }
    }

    /// The next non-trivia token. Reserved words and private identifiers
    /// are reported here and handed on as plain identifiers.
    pub(crate) fn next_token(&mut self) -> Token {
        if let Some(token) = self.pushback.take() {
            if !token.kind.is_trivia() {
                return token;
            }
        }
        loop {
            let mut token = self.lexer.next();
            if token.kind.is_trivia() {
                continue;
            }
            let text = self.text(token);
            match token.kind {
                TokenKind::Reserved => {
                    self.error(position_of(token), format!("'{}' is a reserved word", text));
                    token.kind = TokenKind::Identifier;
                }
                TokenKind::Identifier | TokenKind::Pure if text.starts_with('$') && !self.private_identifiers_allowed() => {
                    self.error(position_of(token), format!("'{}' is a reserved word", text));
                    token.kind = TokenKind::Identifier;
                }
                _ => {}
            }
            return token;
        }
    }

    fn private_identifiers_allowed(&self) -> bool {
        self.ctx.is_builtin || self.ctx.settings.allow_private_identifiers
    }

    pub(crate) fn peek(&mut self) -> Token {
        let token = self.next_token();
        self.pushback = Some(token);
        token
    }

    /// Consumes the next token if it has the given kind.
    pub(crate) fn check_next(&mut self, kind: TokenKind) -> Option<Token> {
        let token = self.peek();
        if token.kind == kind {
            self.pushback = None;
            Some(token)
        } else {
            None
        }
    }

    /// `'text'`, or `end of file`.
    pub(crate) fn describe(&self, token: Token) -> String {
        match token.kind {
            TokenKind::EndOfFile => "end of file".to_string(),
            _ => format!("'{}'", self.text(token)),
        }
    }

    pub(crate) fn expect(&mut self, kind: TokenKind, expected: &str) -> Option<Token> {
        let token = self.next_token();
        if token.kind == kind {
            return Some(token);
        }
        let message = format!("expected {}, but found {}", expected, self.describe(token));
        self.error(position_of(token), message);
        self.pushback = Some(token);
        None
    }

    /// An identifier that does not name a type.
    pub(crate) fn expect_identifier(&mut self) -> Option<Token> {
        let token = self.next_token();
        if token.kind != TokenKind::Identifier {
            let message = format!("expected an identifier, but found {}", self.describe(token));
            self.fatal_error(position_of(token), message);
            self.pushback = Some(token);
            return None;
        }
        let text = self.text(token);
        if self.ctx.symbols.is_type(text) {
            self.fatal_error(
                position_of(token),
                format!("expected an identifier, but found type '{}'", text),
            );
            return None;
        }
        Some(token)
    }

    pub(crate) fn error(&mut self, position: Position, message: impl Into<String>) {
        if !self.encountered_fatal_error {
            self.ctx.error(position, message);
        }
    }

    pub(crate) fn fatal_error(&mut self, position: Position, message: impl Into<String>) {
        self.error(position, message);
        self.encountered_fatal_error = true;
    }

    // Nesting depth

    /// Counts one more level of nesting, failing once the limit is exceeded.
    pub(crate) fn increase_depth(&mut self) -> bool {
        self.depth += 1;
        if self.depth > MAX_PARSE_DEPTH {
            let token = self.peek();
            self.fatal_error(position_of(token), "exceeded max parse depth");
            return false;
        }
        true
    }

    /// Runs `f` and restores the nesting depth to its value on entry,
    /// however many levels `f` added.
    pub(crate) fn depth_scope<T>(&mut self, f: impl FnOnce(&mut Self) -> Option<T>) -> Option<T> {
        let saved = self.depth;
        let result = f(self);
        self.depth = saved;
        result
    }

    // Backtracking

    fn checkpoint(&mut self) -> Checkpoint {
        self.ctx.errors.begin_buffer();
        Checkpoint {
            offset: self.lexer.checkpoint(),
            pushback: self.pushback,
            depth: self.depth,
            encountered_fatal_error: self.encountered_fatal_error,
        }
    }

    fn accept(&mut self, _checkpoint: Checkpoint) {
        self.ctx.errors.commit_buffer();
    }

    fn rewind(&mut self, checkpoint: Checkpoint) {
        self.lexer.rewind_to(checkpoint.offset);
        self.pushback = checkpoint.pushback;
        self.depth = checkpoint.depth;
        self.encountered_fatal_error = checkpoint.encountered_fatal_error;
        self.ctx.errors.discard_buffer();
    }
}
