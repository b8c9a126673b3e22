use super::{position_of, span, Parser, VarDeclarationPrefix};
use crate::ir::convert::{
    array_type, declare_function, declare_global_variable, declare_interface_block, declare_prototype,
    declare_struct, finish_function, make_parameter, start_function,
};
use crate::ir::expr::Expression;
use crate::ir::modifiers::{layout_qualifier, Layout, LayoutQualifier, ModifierFlags, Modifiers};
use crate::ir::types::{Field, TypeRef};
use crate::ir::variable::Variable;
use crate::lexer::{Token, TokenKind};
use crate::position::Position;
use log::trace;
use std::sync::Arc;

impl<'s, 'e> Parser<'s, 'e> {
    /// declaration: modifiers (interfaceBlock | structVarDeclaration | type IDENTIFIER (functionDeclarationEnd | varDeclarationEnd))
    pub(crate) fn parse_declaration(&mut self) -> Option<()> {
        trace!("parse_declaration: next token = {:?}", self.peek());
        let token = self.peek();
        if token.kind == TokenKind::Semicolon {
            self.next_token();
            self.error(position_of(token), "expected a declaration, but found ';'");
            return None;
        }
        let modifiers = self.parse_modifiers();
        let token = self.peek();
        match token.kind {
            TokenKind::Identifier if !self.ctx.symbols.is_type(self.text(token)) => {
                return self.parse_interface_block(modifiers);
            }
            TokenKind::Struct => return self.parse_struct_var_declaration(modifiers),
            // A bare `layout(...) out;` style declaration carries nothing we use.
            TokenKind::Semicolon if !modifiers.layout.is_empty() || !modifiers.flags.is_empty() => {
                self.next_token();
                return Some(());
            }
            _ => {}
        }
        let ty = self.parse_type()?;
        let name = self.expect_identifier()?;
        if self.check_next(TokenKind::LParen).is_some() {
            return self.parse_function_declaration_end(modifiers, ty, name);
        }
        let prefix = VarDeclarationPrefix { modifiers, ty, name };
        self.parse_var_declarations_end(prefix, |p, position, modifiers, ty, name, value| {
            declare_global_variable(&mut p.ctx, position, modifiers, ty, name, value);
        })
    }

    /// modifiers: layout? (UNIFORM | CONST | IN | OUT | INOUT | FLAT | ...)*
    pub(crate) fn parse_modifiers(&mut self) -> Modifiers {
        trace!("parse_modifiers: next token = {:?}", self.peek());
        let start = self.peek();
        let mut layout = Layout::default();
        let mut flags = ModifierFlags::NONE;
        let mut end = start.offset as usize;
        loop {
            let token = self.peek();
            let flag = match token.kind {
                TokenKind::Layout => {
                    self.parse_layout(&mut layout);
                    end = end.max(token.end());
                    continue;
                }
                TokenKind::Uniform => ModifierFlags::UNIFORM,
                TokenKind::Const => ModifierFlags::CONST,
                TokenKind::In => ModifierFlags::IN,
                TokenKind::Out => ModifierFlags::OUT,
                TokenKind::Inout => ModifierFlags::IN | ModifierFlags::OUT,
                TokenKind::Flat => ModifierFlags::FLAT,
                TokenKind::Noperspective => ModifierFlags::NOPERSPECTIVE,
                TokenKind::Inline => ModifierFlags::INLINE,
                TokenKind::Noinline => ModifierFlags::NOINLINE,
                TokenKind::Pure => ModifierFlags::PURE,
                TokenKind::Workgroup => ModifierFlags::WORKGROUP,
                TokenKind::Readonly => ModifierFlags::READONLY,
                TokenKind::Writeonly => ModifierFlags::WRITEONLY,
                TokenKind::Buffer => ModifierFlags::BUFFER,
                // Precision qualifiers have no effect.
                TokenKind::Highp | TokenKind::Mediump | TokenKind::Lowp => ModifierFlags::NONE,
                _ => break,
            };
            self.next_token();
            if flags.intersects(flag) {
                self.error(
                    position_of(token),
                    format!("'{}' appears more than once", self.text(token)),
                );
            }
            flags |= flag;
            end = token.end();
        }
        Modifiers {
            layout,
            flags,
            position: Position::range(start.offset as usize, end),
        }
    }

    /// layout: LAYOUT LPAREN IDENTIFIER (EQ INT_LITERAL)? (COMMA IDENTIFIER (EQ INT_LITERAL)?)* RPAREN
    fn parse_layout(&mut self, layout: &mut Layout) -> Option<()> {
        trace!("parse_layout: next token = {:?}", self.peek());
        self.expect(TokenKind::Layout, "'layout'")?;
        self.expect(TokenKind::LParen, "'('")?;
        loop {
            let key = self.next_token();
            let name = self.text(key);
            match layout_qualifier(name) {
                Some(LayoutQualifier::Flag(flag)) => {
                    if layout.has_flag(flag) {
                        self.error(
                            position_of(key),
                            format!("layout qualifier '{}' appears more than once", name),
                        );
                    } else {
                        layout.flags.push(flag);
                    }
                }
                Some(LayoutQualifier::Value(layout_key)) => {
                    self.expect(TokenKind::Eq, "'='")?;
                    let value = self.expect(TokenKind::IntLiteral, "an integer")?;
                    let text = self.text(value);
                    let Ok(parsed) = text.parse::<i32>() else {
                        self.error(position_of(value), format!("value in layout is too large: {}", text));
                        return None;
                    };
                    if layout.get(layout_key).is_some() {
                        self.error(
                            position_of(key),
                            format!("layout qualifier '{}' appears more than once", name),
                        );
                    } else {
                        layout.values.push((layout_key, parsed));
                    }
                }
                None => {
                    self.error(
                        position_of(key),
                        format!("'{}' is not a valid layout qualifier", name),
                    );
                }
            }
            if self.check_next(TokenKind::RParen).is_some() {
                return Some(());
            }
            self.expect(TokenKind::Comma, "','")?;
        }
    }

    /// type: IDENTIFIER (LBRACKET expression? RBRACKET)*
    pub(crate) fn parse_type(&mut self) -> Option<TypeRef> {
        trace!("parse_type: next token = {:?}", self.peek());
        let token = self.expect(TokenKind::Identifier, "a type")?;
        let name = self.text(token);
        let Some(ty) = self.ctx.symbols.lookup_type(name) else {
            self.error(position_of(token), format!("unknown type '{}'", name));
            return None;
        };
        self.parse_array_suffix(&ty)
    }

    /// Zero or more `[size]` / `[]` suffixes applied to `base`.
    pub(crate) fn parse_array_suffix(&mut self, base: &TypeRef) -> Option<TypeRef> {
        let mut ty = base.clone();
        while let Some(open) = self.check_next(TokenKind::LBracket) {
            if let Some(close) = self.check_next(TokenKind::RBracket) {
                ty = array_type(&mut self.ctx, span(open, close), &ty, None);
                continue;
            }
            let size = self.parse_expression()?;
            let close = self.expect(TokenKind::RBracket, "']'")?;
            ty = array_type(&mut self.ctx, span(open, close), &ty, Some(size));
        }
        Some(ty)
    }

    /// varDeclarationEnd: arraySuffix (EQ assignmentExpression)? (COMMA IDENTIFIER arraySuffix (EQ assignmentExpression)?)* SEMICOLON
    ///
    /// `declare` is called once per declarator with its position, modifiers,
    /// full type, name and initializer.
    pub(crate) fn parse_var_declarations_end(
        &mut self,
        prefix: VarDeclarationPrefix,
        mut declare: impl FnMut(&mut Self, Position, Modifiers, TypeRef, &str, Option<Expression>),
    ) -> Option<()> {
        trace!("parse_var_declarations_end: next token = {:?}", self.peek());
        let VarDeclarationPrefix { modifiers, ty: base, mut name } = prefix;
        loop {
            let ty = self.parse_array_suffix(&base)?;
            let mut position = modifiers.position.join(position_of(name));
            let value = match self.check_next(TokenKind::Eq) {
                Some(_) => {
                    let value = self.parse_assignment_expression()?;
                    position = position.join(value.position);
                    Some(value)
                }
                None => None,
            };
            let text = self.text(name);
            declare(self, position, modifiers.clone(), ty, text, value);
            if self.check_next(TokenKind::Comma).is_none() {
                break;
            }
            name = self.expect_identifier()?;
        }
        self.expect(TokenKind::Semicolon, "';'")?;
        Some(())
    }

    /// functionDeclarationEnd: (VOID | parameter (COMMA parameter)*)? RPAREN (SEMICOLON | block)
    fn parse_function_declaration_end(&mut self, modifiers: Modifiers, return_type: TypeRef, name: Token) -> Option<()> {
        trace!("parse_function_declaration_end: next token = {:?}", self.peek());
        let mut parameters = Vec::new();
        let mut valid = true;
        let token = self.peek();
        if token.kind == TokenKind::Identifier && self.text(token) == "void" {
            self.next_token();
        } else if token.kind != TokenKind::RParen {
            loop {
                match self.parse_parameter()? {
                    Some(parameter) => parameters.push(parameter),
                    None => valid = false,
                }
                if self.check_next(TokenKind::Comma).is_none() {
                    break;
                }
            }
        }
        let close = self.expect(TokenKind::RParen, "')'")?;
        let is_definition = self.peek().kind != TokenKind::Semicolon;
        let position = modifiers.position.join(span(name, close));
        let name = self.text(name);
        let declaration = if valid {
            declare_function(
                &mut self.ctx,
                position,
                modifiers,
                return_type,
                name,
                parameters,
                is_definition,
            )
        } else {
            None
        };
        if self.check_next(TokenKind::Semicolon).is_some() {
            if let Some(declaration) = declaration {
                declare_prototype(&mut self.ctx, declaration);
            }
            return Some(());
        }
        match declaration {
            Some(declaration) => {
                start_function(&mut self.ctx, &declaration);
                match self.parse_block() {
                    Some(body) => finish_function(&mut self.ctx, declaration, body),
                    None => {
                        self.ctx.symbols.pop_scope();
                        self.ctx.current_function = None;
                    }
                }
            }
            None => {
                // The declaration already failed; errors from its body would
                // only repeat that failure.
                self.ctx.errors.begin_buffer();
                self.ctx.symbols.push_scope();
                self.parse_block();
                self.ctx.symbols.pop_scope();
                self.ctx.errors.discard_buffer();
            }
        }
        Some(())
    }

    /// parameter: modifiers type IDENTIFIER (LBRACKET expression RBRACKET)?
    ///
    /// The outer `Option` fails on a syntax error; the inner one is `None`
    /// when the parameter parsed but was rejected.
    fn parse_parameter(&mut self) -> Option<Option<Arc<Variable>>> {
        trace!("parse_parameter: next token = {:?}", self.peek());
        let modifiers = self.parse_modifiers();
        let ty = self.parse_type()?;
        let name = self.expect_identifier()?;
        let ty = self.parse_array_suffix(&ty)?;
        let position = modifiers.position.join(position_of(name));
        let name = self.text(name);
        Some(make_parameter(&mut self.ctx, position, modifiers, ty, name))
    }

    /// Fields of a struct or interface block, through the closing brace.
    fn parse_fields(&mut self, allow_initializers: bool) -> Option<(Vec<Field>, Token)> {
        let mut fields = Vec::new();
        loop {
            if let Some(end) = self.check_next(TokenKind::RBrace) {
                return Some((fields, end));
            }
            let modifiers = self.parse_modifiers();
            let base = self.parse_type()?;
            loop {
                let name = self.expect_identifier()?;
                let ty = self.parse_array_suffix(&base)?;
                if let Some(eq) = self.check_next(TokenKind::Eq) {
                    if !allow_initializers {
                        self.error(position_of(eq), "initializers are not permitted on struct fields");
                    }
                    self.parse_assignment_expression()?;
                }
                fields.push(Field {
                    name: self.text(name).to_string(),
                    ty,
                    modifiers: modifiers.clone(),
                    position: modifiers.position.join(position_of(name)),
                });
                if self.check_next(TokenKind::Comma).is_none() {
                    break;
                }
            }
            self.expect(TokenKind::Semicolon, "';'")?;
        }
    }

    /// structDeclaration: STRUCT IDENTIFIER LBRACE varDeclaration* RBRACE
    fn parse_struct_declaration(&mut self) -> Option<TypeRef> {
        trace!("parse_struct_declaration: next token = {:?}", self.peek());
        self.depth_scope(|p| {
            let start = p.expect(TokenKind::Struct, "'struct'")?;
            let name = p.expect_identifier()?;
            p.expect(TokenKind::LBrace, "'{'")?;
            if !p.increase_depth() {
                return None;
            }
            let (fields, end) = p.parse_fields(false)?;
            let name = p.text(name);
            declare_struct(&mut p.ctx, span(start, end), name, fields)
        })
    }

    /// structVarDeclaration: structDeclaration ((IDENTIFIER varDeclarationEnd) | SEMICOLON)
    fn parse_struct_var_declaration(&mut self, modifiers: Modifiers) -> Option<()> {
        let ty = self.parse_struct_declaration()?;
        match self.check_next(TokenKind::Identifier) {
            Some(name) => {
                let prefix = VarDeclarationPrefix { modifiers, ty, name };
                self.parse_var_declarations_end(prefix, |p, position, modifiers, ty, name, value| {
                    declare_global_variable(&mut p.ctx, position, modifiers, ty, name, value);
                })
            }
            None => {
                self.expect(TokenKind::Semicolon, "';'")?;
                Some(())
            }
        }
    }

    /// interfaceBlock: IDENTIFIER LBRACE varDeclaration* RBRACE (IDENTIFIER (LBRACKET INT_LITERAL RBRACKET)?)? SEMICOLON
    fn parse_interface_block(&mut self, modifiers: Modifiers) -> Option<()> {
        trace!("parse_interface_block: next token = {:?}", self.peek());
        let type_name = self.next_token();
        let name = self.text(type_name);
        if self.check_next(TokenKind::LBrace).is_none() {
            // An identifier that is neither a type nor the start of a block.
            self.error(position_of(type_name), format!("no type named '{}'", name));
            return None;
        }
        let (fields, end) = self.parse_fields(false)?;
        let mut position = modifiers.position.join(span(type_name, end));
        let instance = match self.check_next(TokenKind::Identifier) {
            Some(instance) => {
                position = position.join(position_of(instance));
                let size = match self.check_next(TokenKind::LBracket) {
                    Some(_) => {
                        let size = self.expect(TokenKind::IntLiteral, "an integer")?;
                        self.expect(TokenKind::RBracket, "']'")?;
                        match self.text(size).parse::<u32>() {
                            Ok(n) if n > 0 => Some(n),
                            _ => {
                                self.error(position_of(size), "array size must be positive");
                                return None;
                            }
                        }
                    }
                    None => None,
                };
                Some((self.text(instance).to_string(), size))
            }
            None => None,
        };
        self.expect(TokenKind::Semicolon, "';'")?;
        declare_interface_block(&mut self.ctx, position, modifiers, name, fields, instance);
        Some(())
    }
}
