//! Parser for Paw syntax: `TokenStream -> AST` (spec §4.2)
//!
//! Two-pass recursive-descent. Pass 1 (`collect_types`) scans the whole
//! token stream once, remembering every name introduced by a `type`
//! declaration without parsing its body (brace-matching skip). Pass 2 is
//! the full parse, consulting the type-name set from pass 1 at the
//! single call site where `identifier <` needs to be disambiguated
//! between a generic argument list and a comparison.

use crate::ast::*;
use crate::diagnostics::{Diagnostic, ParseError};
use crate::lexer::{Token, TokenKind, TokenStream};
use crate::types::{primitive_type_from_name, Type};
use std::collections::HashSet;

/// Pass 1: populate the known-type-name set consulted by pass 2.
fn collect_types(tokens: &[Token]) -> HashSet<String> {
    let mut names = HashSet::new();
    let mut i = 0;
    while i < tokens.len() {
        if tokens[i].kind == TokenKind::Type {
            if let Some(name_tok) = tokens.get(i + 1) {
                if name_tok.kind == TokenKind::Identifier {
                    names.insert(name_tok.lexeme.clone());
                }
            }
            // Skip to the end of the declaration: either a top-level `;`
            // (type alias with no body) or the matching `}` of its body.
            let mut depth = 0usize;
            let mut seen_brace = false;
            i += 2;
            while i < tokens.len() {
                match tokens[i].kind {
                    TokenKind::LBrace => {
                        depth += 1;
                        seen_brace = true;
                    }
                    TokenKind::RBrace => {
                        depth = depth.saturating_sub(1);
                        if seen_brace && depth == 0 {
                            i += 1;
                            break;
                        }
                    }
                    TokenKind::Semi if depth == 0 => {
                        i += 1;
                        break;
                    }
                    TokenKind::Eof => break,
                    _ => {}
                }
                i += 1;
            }
            continue;
        }
        i += 1;
    }
    names
}

pub fn parse(stream: &TokenStream) -> Result<Program, ParseError> {
    let known_types = collect_types(&stream.tokens);
    let mut parser = Parser::new(&stream.tokens, stream.filename.clone(), known_types);
    let program = parser.parse_program();
    if parser.diagnostics.is_empty() {
        Ok(program)
    } else {
        Err(ParseError(parser.diagnostics))
    }
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    filename: String,
    known_types: HashSet<String>,
    type_param_scope: Vec<HashSet<String>>,
    no_struct_literal: bool,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token], filename: String, known_types: HashSet<String>) -> Self {
        Parser {
            tokens,
            pos: 0,
            filename,
            known_types,
            type_param_scope: Vec::new(),
            no_struct_literal: false,
            diagnostics: Vec::new(),
        }
    }

    // --- token stream plumbing -------------------------------------------------

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_at(&self, offset: usize) -> &Token {
        let idx = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[idx]
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn is_eof(&self) -> bool {
        self.check(TokenKind::Eof)
    }

    fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if !self.is_eof() {
            self.pos += 1;
        }
        tok
    }

    fn current_span(&self) -> Span {
        let tok = self.peek();
        Span::new(tok.line, tok.column, tok.lexeme.chars().count().max(1))
    }

    fn err(&self, message: impl Into<String>) -> Diagnostic {
        let tok = self.peek();
        Diagnostic::error(self.filename.clone(), tok.line, tok.column, message)
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<Token, Diagnostic> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.err(format!("expected {}, found '{}'", what, self.peek().lexeme)))
        }
    }

    fn expect_identifier(&mut self) -> Result<String, Diagnostic> {
        if self.check(TokenKind::Identifier) {
            Ok(self.advance().lexeme)
        } else {
            Err(self.err(format!("expected identifier, found '{}'", self.peek().lexeme)))
        }
    }

    /// Statement-boundary recovery (spec §4.2): advance to the next `;`
    /// or `}` and continue, so one bad declaration doesn't abort parsing
    /// of the rest of the file.
    fn recover_to_boundary(&mut self) {
        while !self.is_eof() && !self.check(TokenKind::Semi) && !self.check(TokenKind::RBrace) {
            self.advance();
        }
        if self.check(TokenKind::Semi) || self.check(TokenKind::RBrace) {
            self.advance();
        }
    }

    fn is_type_param(&self, name: &str) -> bool {
        self.type_param_scope.iter().rev().any(|s| s.contains(name))
    }

    /// Struct-literal disambiguation (spec §4.2): `Name { ... }` is a
    /// struct initializer only when `Name` is a type name.
    fn is_type_name(&self, name: &str) -> bool {
        name.chars().next().is_some_and(|c| c.is_uppercase()) || self.known_types.contains(name)
    }

    /// `identifier <` disambiguation (spec §4.2): look at the token
    /// immediately after `<` to decide generic-application vs comparison.
    fn generic_args_follow(&self) -> bool {
        debug_assert!(self.check(TokenKind::Lt));
        let next = self.peek_at(1);
        match next.kind {
            TokenKind::TypeKeyword => true,
            TokenKind::LBracket => true,
            TokenKind::Identifier => self.known_types.contains(&next.lexeme) || self.is_type_param(&next.lexeme),
            _ => false,
        }
    }

    // --- top level ---------------------------------------------------------

    fn parse_program(&mut self) -> Program {
        let mut program = Program::new();
        while !self.is_eof() {
            match self.parse_declaration() {
                Ok(decl) => program.declarations.push(decl),
                Err(diag) => {
                    self.diagnostics.push(diag);
                    self.recover_to_boundary();
                }
            }
        }
        program
    }

    fn parse_declaration(&mut self) -> Result<Declaration, Diagnostic> {
        let is_public = if self.check(TokenKind::Pub) {
            self.advance();
            true
        } else {
            false
        };

        if self.check(TokenKind::Import) {
            return self.parse_import();
        }
        if self.check(TokenKind::Type) {
            return self.parse_type_decl(is_public);
        }
        if self.check(TokenKind::Async) {
            self.advance();
            self.expect(TokenKind::Fn, "'fn' after 'async'")?;
            return Ok(Declaration::Function(self.parse_function(is_public, true, None)?));
        }
        if self.check(TokenKind::Fn) {
            return Ok(Declaration::Function(self.parse_function(is_public, false, None)?));
        }
        Err(self.err(format!(
            "expected a declaration ('fn', 'type', 'import'), found '{}'",
            self.peek().lexeme
        )))
    }

    fn parse_import(&mut self) -> Result<Declaration, Diagnostic> {
        let span = self.current_span();
        self.advance(); // 'import'
        let path = if self.check(TokenKind::StringLiteral) {
            self.advance().lexeme
        } else {
            let mut parts = vec![self.expect_identifier()?];
            while self.check(TokenKind::ColonColon) {
                self.advance();
                parts.push(self.expect_identifier()?);
            }
            parts.join("::")
        };
        if self.check(TokenKind::Semi) {
            self.advance();
        }
        Ok(Declaration::Import(ImportDecl {
            path,
            source: Some(self.source_location(span)),
        }))
    }

    fn source_location(&self, span: Span) -> SourceLocation {
        SourceLocation::new(std::path::PathBuf::from(&self.filename), span.line, span.column)
    }

    // --- type declarations ---------------------------------------------------

    fn parse_type_param_list(&mut self) -> Result<Vec<String>, Diagnostic> {
        let mut params = Vec::new();
        if self.check(TokenKind::Lt) {
            self.advance();
            while !self.check(TokenKind::Gt) && !self.is_eof() {
                params.push(self.expect_identifier()?);
                if self.check(TokenKind::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
            self.expect(TokenKind::Gt, "'>' to close type parameter list")?;
        }
        Ok(params)
    }

    fn parse_type_decl(&mut self, is_public: bool) -> Result<Declaration, Diagnostic> {
        let span = self.current_span();
        self.advance(); // 'type'
        let name = self.expect_identifier()?;
        let type_params = self.parse_type_param_list()?;

        let mut scope = HashSet::new();
        scope.extend(type_params.iter().cloned());
        self.type_param_scope.push(scope);

        let kind_result = (|| -> Result<TypeDeclKind, Diagnostic> {
            if self.check(TokenKind::Eq) {
                self.advance();
                let keyword = self.expect_identifier()?;
                match keyword.as_str() {
                    "struct" => self.parse_struct_body(&name),
                    "enum" => self.parse_enum_body(&name),
                    "trait" => self.parse_trait_body(),
                    other => Err(self.err(format!("expected 'struct', 'enum' or 'trait', found '{}'", other))),
                }
            } else {
                self.parse_struct_body(&name)
            }
        })();

        self.type_param_scope.pop();
        let kind = kind_result?;

        Ok(Declaration::TypeDecl(TypeDecl {
            name,
            type_params,
            kind,
            is_public,
            source: Some(self.source_location(span)),
        }))
    }

    fn parse_struct_body(&mut self, owner: &str) -> Result<TypeDeclKind, Diagnostic> {
        self.expect(TokenKind::LBrace, "'{' to start struct body")?;
        let mut fields = Vec::new();
        let mut methods = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.is_eof() {
            if self.check(TokenKind::Fn) {
                methods.push(self.parse_function(false, false, Some(owner))?);
            } else if self.check(TokenKind::Async) {
                self.advance();
                self.expect(TokenKind::Fn, "'fn' after 'async'")?;
                methods.push(self.parse_function(false, true, Some(owner))?);
            } else {
                let name = self.expect_identifier()?;
                self.expect(TokenKind::Colon, "':' after field name")?;
                let type_ann = self.parse_type()?;
                fields.push(FieldDecl { name, type_ann });
                if self.check(TokenKind::Comma) {
                    self.advance();
                }
            }
        }
        self.expect(TokenKind::RBrace, "'}' to close struct body")?;
        Ok(TypeDeclKind::Struct { fields, methods })
    }

    fn parse_enum_body(&mut self, owner: &str) -> Result<TypeDeclKind, Diagnostic> {
        self.expect(TokenKind::LBrace, "'{' to start enum body")?;
        let mut variants = Vec::new();
        let mut methods = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.is_eof() {
            if self.check(TokenKind::Fn) {
                methods.push(self.parse_function(false, false, Some(owner))?);
            } else if self.check(TokenKind::Async) {
                self.advance();
                self.expect(TokenKind::Fn, "'fn' after 'async'")?;
                methods.push(self.parse_function(false, true, Some(owner))?);
            } else {
                let name = self.expect_identifier()?;
                let fields = if self.check(TokenKind::LParen) {
                    self.advance();
                    let mut list = Vec::new();
                    while !self.check(TokenKind::RParen) && !self.is_eof() {
                        list.push(self.parse_type()?);
                        if self.check(TokenKind::Comma) {
                            self.advance();
                        } else {
                            break;
                        }
                    }
                    self.expect(TokenKind::RParen, "')' to close variant fields")?;
                    list
                } else {
                    Vec::new()
                };
                variants.push(EnumVariantDecl { name, fields });
                if self.check(TokenKind::Comma) {
                    self.advance();
                }
            }
        }
        self.expect(TokenKind::RBrace, "'}' to close enum body")?;
        Ok(TypeDeclKind::Enum { variants, methods })
    }

    fn parse_trait_body(&mut self) -> Result<TypeDeclKind, Diagnostic> {
        self.expect(TokenKind::LBrace, "'{' to start trait body")?;
        let mut methods = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.is_eof() {
            self.expect(TokenKind::Fn, "'fn' in trait body")?;
            let name = self.expect_identifier()?;
            self.expect(TokenKind::LParen, "'(' after trait method name")?;
            if self.check(TokenKind::SelfKw) {
                self.advance();
                if self.check(TokenKind::Comma) {
                    self.advance();
                }
            }
            let mut params = Vec::new();
            while !self.check(TokenKind::RParen) && !self.is_eof() {
                if self.check(TokenKind::Identifier) && self.peek_at(1).kind == TokenKind::Colon {
                    self.advance();
                    self.advance();
                }
                params.push(self.parse_type()?);
                if self.check(TokenKind::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
            self.expect(TokenKind::RParen, "')' to close trait method parameters")?;
            let return_type = if self.check(TokenKind::Arrow) {
                self.advance();
                self.parse_type()?
            } else {
                Type::Void
            };
            self.expect(TokenKind::Semi, "';' after trait method signature")?;
            methods.push(TraitMethodSig { name, params, return_type });
        }
        self.expect(TokenKind::RBrace, "'}' to close trait body")?;
        Ok(TypeDeclKind::Trait { methods })
    }

    // --- functions -----------------------------------------------------------

    fn parse_function(
        &mut self,
        is_public: bool,
        is_async: bool,
        owner: Option<&str>,
    ) -> Result<FunctionDecl, Diagnostic> {
        let span = self.current_span();
        self.advance(); // 'fn'
        let name = self.expect_identifier()?;
        let type_params = self.parse_type_param_list()?;

        let mut scope = HashSet::new();
        scope.extend(type_params.iter().cloned());
        self.type_param_scope.push(scope);

        let result = (|| -> Result<FunctionDecl, Diagnostic> {
            self.expect(TokenKind::LParen, "'(' after function name")?;
            let params = self.parse_params(owner)?;
            self.expect(TokenKind::RParen, "')' to close parameter list")?;
            let return_type = if self.check(TokenKind::Arrow) {
                self.advance();
                self.parse_type()?
            } else {
                Type::Void
            };
            self.expect(TokenKind::LBrace, "'{' to start function body")?;
            let body = self.parse_stmt_list_until_rbrace()?;
            Ok(FunctionDecl {
                name: name.clone(),
                type_params: type_params.clone(),
                params,
                return_type,
                body,
                is_async,
                is_public,
                self_type: owner.map(str::to_string),
                source: Some(self.source_location(span)),
            })
        })();

        self.type_param_scope.pop();
        result
    }

    fn parse_params(&mut self, owner: Option<&str>) -> Result<Vec<Param>, Diagnostic> {
        let mut params = Vec::new();
        if self.check(TokenKind::SelfKw) {
            self.advance();
            if let Some(owner) = owner {
                params.push(Param {
                    name: "self".to_string(),
                    type_ann: Type::Named(owner.to_string()),
                });
            }
            if self.check(TokenKind::Comma) {
                self.advance();
            }
        }
        while !self.check(TokenKind::RParen) && !self.is_eof() {
            let name = self.expect_identifier()?;
            self.expect(TokenKind::Colon, "':' after parameter name")?;
            let type_ann = self.parse_type()?;
            params.push(Param { name, type_ann });
            if self.check(TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        Ok(params)
    }

    // --- types -----------------------------------------------------------

    fn parse_type(&mut self) -> Result<Type, Diagnostic> {
        if self.check(TokenKind::TypeKeyword) {
            let name = self.advance().lexeme;
            return Ok(primitive_type_from_name(&name).expect("lexer only emits known primitive names"));
        }
        if self.check(TokenKind::Star) {
            self.advance();
            return Ok(Type::Pointer(Box::new(self.parse_type()?)));
        }
        if self.check(TokenKind::LBracket) {
            self.advance();
            let elem = self.parse_type()?;
            let size = if self.check(TokenKind::Semi) {
                self.advance();
                let tok = self.expect(TokenKind::IntLiteral, "array size")?;
                Some(tok.lexeme.parse::<usize>().map_err(|_| self.err("invalid array size"))?)
            } else {
                None
            };
            self.expect(TokenKind::RBracket, "']' to close array type")?;
            return Ok(Type::Array(Box::new(elem), size));
        }
        if self.check(TokenKind::Fn) {
            self.advance();
            self.expect(TokenKind::LParen, "'(' in function type")?;
            let mut params = Vec::new();
            while !self.check(TokenKind::RParen) && !self.is_eof() {
                params.push(self.parse_type()?);
                if self.check(TokenKind::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
            self.expect(TokenKind::RParen, "')' to close function type parameters")?;
            let return_type = if self.check(TokenKind::Arrow) {
                self.advance();
                self.parse_type()?
            } else {
                Type::Void
            };
            return Ok(Type::Function {
                params,
                return_type: Box::new(return_type),
            });
        }
        if self.check(TokenKind::Identifier) {
            let name = self.advance().lexeme;
            if self.check(TokenKind::Lt) {
                self.advance();
                let mut args = Vec::new();
                while !self.check(TokenKind::Gt) && !self.is_eof() {
                    args.push(self.parse_type()?);
                    if self.check(TokenKind::Comma) {
                        self.advance();
                    } else {
                        break;
                    }
                }
                self.expect(TokenKind::Gt, "'>' to close generic type arguments")?;
                return Ok(Type::GenericInstance { name, args });
            }
            if self.is_type_param(&name) {
                return Ok(Type::Generic(name));
            }
            return Ok(Type::Named(name));
        }
        Err(self.err(format!("expected a type, found '{}'", self.peek().lexeme)))
    }

    // --- statements -----------------------------------------------------------

    fn parse_stmt_list_until_rbrace(&mut self) -> Result<Vec<Stmt>, Diagnostic> {
        let mut stmts = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.is_eof() {
            match self.parse_stmt() {
                Ok(stmt) => stmts.push(stmt),
                Err(diag) => {
                    self.diagnostics.push(diag);
                    self.recover_to_boundary();
                }
            }
        }
        self.expect(TokenKind::RBrace, "'}' to close block")?;
        Ok(stmts)
    }

    fn parse_stmt(&mut self) -> Result<Stmt, Diagnostic> {
        let span = self.current_span();
        match self.peek().kind {
            TokenKind::Let => self.parse_let(),
            TokenKind::Return => {
                self.advance();
                let value = if self.check(TokenKind::Semi) || self.check(TokenKind::RBrace) {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                self.consume_optional_semi();
                Ok(Stmt::Return(value, span))
            }
            TokenKind::Break => {
                self.advance();
                let value = if self.check(TokenKind::Semi) || self.check(TokenKind::RBrace) {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                self.consume_optional_semi();
                Ok(Stmt::Break(value, span))
            }
            TokenKind::Continue => {
                self.advance();
                self.consume_optional_semi();
                Ok(Stmt::Continue(span))
            }
            TokenKind::Loop => self.parse_loop(),
            _ => self.parse_expr_stmt(),
        }
    }

    fn consume_optional_semi(&mut self) {
        if self.check(TokenKind::Semi) {
            self.advance();
        }
    }

    fn parse_let(&mut self) -> Result<Stmt, Diagnostic> {
        let span = self.current_span();
        self.advance(); // 'let'
        let is_mut = if self.check(TokenKind::Mut) {
            self.advance();
            true
        } else {
            false
        };
        let name = self.expect_identifier()?;
        let type_ann = if self.check(TokenKind::Colon) {
            self.advance();
            Some(self.parse_type()?)
        } else {
            None
        };
        let init = if self.check(TokenKind::Eq) {
            self.advance();
            Some(self.parse_expr()?)
        } else {
            None
        };
        self.expect(TokenKind::Semi, "';' after let statement")?;
        Ok(Stmt::Let {
            name,
            is_mut,
            type_ann,
            init,
            span,
        })
    }

    fn parse_loop(&mut self) -> Result<Stmt, Diagnostic> {
        let span = self.current_span();
        self.advance(); // 'loop'

        if self.check(TokenKind::LBrace) {
            self.advance();
            let body = self.parse_stmt_list_until_rbrace()?;
            return Ok(Stmt::Loop {
                cond: None,
                iterator: None,
                body,
                span,
            });
        }

        if self.check(TokenKind::Identifier) && self.peek_at(1).kind == TokenKind::In {
            let binding = self.advance().lexeme;
            self.advance(); // 'in'
            let saved = self.no_struct_literal;
            self.no_struct_literal = true;
            let iterable = self.parse_expr()?;
            self.no_struct_literal = saved;
            self.expect(TokenKind::LBrace, "'{' to start loop body")?;
            let body = self.parse_stmt_list_until_rbrace()?;
            return Ok(Stmt::Loop {
                cond: None,
                iterator: Some((binding, iterable)),
                body,
                span,
            });
        }

        let saved = self.no_struct_literal;
        self.no_struct_literal = true;
        let cond = self.parse_expr()?;
        self.no_struct_literal = saved;
        self.expect(TokenKind::LBrace, "'{' to start loop body")?;
        let body = self.parse_stmt_list_until_rbrace()?;
        Ok(Stmt::Loop {
            cond: Some(cond),
            iterator: None,
            body,
            span,
        })
    }

    fn compound_op(kind: TokenKind) -> Option<CompoundOp> {
        Some(match kind {
            TokenKind::PlusEq => CompoundOp::AddAssign,
            TokenKind::MinusEq => CompoundOp::SubAssign,
            TokenKind::StarEq => CompoundOp::MulAssign,
            TokenKind::SlashEq => CompoundOp::DivAssign,
            TokenKind::PercentEq => CompoundOp::ModAssign,
            _ => return None,
        })
    }

    fn is_block_like(expr: &Expr) -> bool {
        matches!(expr, Expr::Block(_) | Expr::If { .. } | Expr::Is { .. })
    }

    fn parse_expr_stmt(&mut self) -> Result<Stmt, Diagnostic> {
        let span = self.current_span();
        let expr = self.parse_expr()?;

        if self.check(TokenKind::Eq) {
            self.advance();
            let value = self.parse_expr()?;
            self.expect(TokenKind::Semi, "';' after assignment")?;
            return Ok(Stmt::Assign {
                target: expr,
                value,
                span,
            });
        }
        if let Some(op) = Self::compound_op(self.peek().kind) {
            self.advance();
            let value = self.parse_expr()?;
            self.expect(TokenKind::Semi, "';' after compound assignment")?;
            return Ok(Stmt::CompoundAssign {
                target: expr,
                op,
                value,
                span,
            });
        }

        if self.check(TokenKind::Semi) {
            self.advance();
        } else if !Self::is_block_like(&expr) && !self.check(TokenKind::RBrace) && !self.is_eof() {
            return Err(self.err(format!("expected ';' after expression, found '{}'", self.peek().lexeme)));
        }
        Ok(Stmt::Expr(expr))
    }

    // --- expressions, by ascending precedence ---------------------------------
    // is (lowest) -> as -> || -> && -> == != -> < <= > >= -> .. ..= -> + - -> * / % -> unary -> postfix (highest)

    fn parse_expr(&mut self) -> Result<Expr, Diagnostic> {
        self.parse_is()
    }

    fn parse_is(&mut self) -> Result<Expr, Diagnostic> {
        let value = self.parse_as()?;
        if self.check(TokenKind::Is) {
            let span = self.current_span();
            self.advance();
            self.expect(TokenKind::LBrace, "'{' to start 'is' arms")?;
            let mut arms = Vec::new();
            while !self.check(TokenKind::RBrace) && !self.is_eof() {
                arms.push(self.parse_is_arm()?);
                if self.check(TokenKind::Comma) {
                    self.advance();
                }
            }
            self.expect(TokenKind::RBrace, "'}' to close 'is' arms")?;
            return Ok(Expr::Is {
                value: Box::new(value),
                arms,
                span,
            });
        }
        Ok(value)
    }

    fn parse_is_arm(&mut self) -> Result<IsArm, Diagnostic> {
        let span = self.current_span();
        let pattern = self.parse_pattern()?;
        let guard = if self.check(TokenKind::If) {
            self.advance();
            Some(self.parse_expr()?)
        } else {
            None
        };
        self.expect(TokenKind::FatArrow, "'=>' in 'is' arm")?;
        let body = self.parse_expr()?;
        Ok(IsArm {
            pattern,
            guard,
            body: Box::new(body),
            span,
        })
    }

    fn parse_pattern(&mut self) -> Result<Pattern, Diagnostic> {
        if self.check(TokenKind::Identifier) {
            let name = self.advance().lexeme;
            if name == "_" {
                return Ok(Pattern::Wildcard);
            }
            if self.check(TokenKind::LParen) {
                self.advance();
                let mut bindings = Vec::new();
                while !self.check(TokenKind::RParen) && !self.is_eof() {
                    bindings.push(self.expect_identifier()?);
                    if self.check(TokenKind::Comma) {
                        self.advance();
                    } else {
                        break;
                    }
                }
                self.expect(TokenKind::RParen, "')' to close pattern bindings")?;
                return Ok(Pattern::Variant { name, bindings });
            }
            return Ok(Pattern::Identifier(name));
        }
        let literal = self.parse_unary()?;
        Ok(Pattern::Literal(Box::new(literal)))
    }

    fn parse_as(&mut self) -> Result<Expr, Diagnostic> {
        let mut left = self.parse_or()?;
        while self.check(TokenKind::As) {
            let span = self.current_span();
            self.advance();
            let target_type = self.parse_type()?;
            left = Expr::As {
                value: Box::new(left),
                target_type,
                span,
            };
        }
        Ok(left)
    }

    fn parse_or(&mut self) -> Result<Expr, Diagnostic> {
        let mut left = self.parse_and()?;
        while self.check(TokenKind::OrOr) {
            let span = self.current_span();
            self.advance();
            let right = self.parse_and()?;
            left = Expr::Binary {
                op: BinaryOp::Or,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, Diagnostic> {
        let mut left = self.parse_equality()?;
        while self.check(TokenKind::AndAnd) {
            let span = self.current_span();
            self.advance();
            let right = self.parse_equality()?;
            left = Expr::Binary {
                op: BinaryOp::And,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, Diagnostic> {
        let mut left = self.parse_comparison()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::EqEq => BinaryOp::Eq,
                TokenKind::NotEq => BinaryOp::NotEq,
                _ => break,
            };
            let span = self.current_span();
            self.advance();
            let right = self.parse_comparison()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expr, Diagnostic> {
        let mut left = self.parse_range()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Lt => BinaryOp::Lt,
                TokenKind::LtEq => BinaryOp::LtEq,
                TokenKind::Gt => BinaryOp::Gt,
                TokenKind::GtEq => BinaryOp::GtEq,
                _ => break,
            };
            let span = self.current_span();
            self.advance();
            let right = self.parse_range()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn parse_range(&mut self) -> Result<Expr, Diagnostic> {
        let left = self.parse_additive()?;
        if self.check(TokenKind::DotDot) || self.check(TokenKind::DotDotEq) {
            let span = self.current_span();
            let inclusive = self.check(TokenKind::DotDotEq);
            self.advance();
            let right = self.parse_additive()?;
            return Ok(Expr::Range {
                start: Box::new(left),
                end: Box::new(right),
                inclusive,
                span,
            });
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, Diagnostic> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            let span = self.current_span();
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, Diagnostic> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Mod,
                _ => break,
            };
            let span = self.current_span();
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, Diagnostic> {
        let span = self.current_span();
        if self.check(TokenKind::Minus) {
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(operand),
                span,
            });
        }
        if self.check(TokenKind::Bang) {
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
                span,
            });
        }
        if self.check(TokenKind::Await) {
            self.advance();
            let value = self.parse_unary()?;
            return Ok(Expr::Await {
                value: Box::new(value),
                span,
            });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_primary()?;
        loop {
            let span = self.current_span();
            match self.peek().kind {
                TokenKind::Dot => {
                    self.advance();
                    let field = self.expect_identifier()?;
                    expr = Expr::FieldAccess {
                        object: Box::new(expr),
                        field,
                        span,
                    };
                }
                TokenKind::LBracket => {
                    self.advance();
                    let index = self.parse_expr()?;
                    self.expect(TokenKind::RBracket, "']' to close index expression")?;
                    expr = Expr::ArrayIndex {
                        array: Box::new(expr),
                        index: Box::new(index),
                        span,
                    };
                }
                TokenKind::LParen => {
                    self.advance();
                    let args = self.parse_arg_list()?;
                    self.expect(TokenKind::RParen, "')' to close argument list")?;
                    expr = match &expr {
                        Expr::Identifier(name) if name.chars().next().is_some_and(|c| c.is_uppercase()) => {
                            Expr::EnumVariant {
                                enum_name: None,
                                variant: name.clone(),
                                args,
                                span,
                            }
                        }
                        _ => Expr::Call {
                            callee: Box::new(expr),
                            args,
                            type_args: Vec::new(),
                            span,
                        },
                    };
                }
                TokenKind::ColonColon => {
                    self.advance();
                    let method_name = self.expect_identifier()?;
                    self.expect(TokenKind::LParen, "'(' after static method name")?;
                    let args = self.parse_arg_list()?;
                    self.expect(TokenKind::RParen, "')' to close argument list")?;
                    let type_name = match &expr {
                        Expr::Identifier(name) => name.clone(),
                        _ => return Err(self.err("static method calls require a type name on the left of '::'")),
                    };
                    expr = Expr::StaticMethodCall {
                        type_name,
                        type_args: Vec::new(),
                        method_name,
                        args,
                        span,
                    };
                }
                TokenKind::Question => {
                    self.advance();
                    expr = Expr::Try {
                        value: Box::new(expr),
                        span,
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_arg_list(&mut self) -> Result<Vec<Expr>, Diagnostic> {
        let mut args = Vec::new();
        while !self.check(TokenKind::RParen) && !self.is_eof() {
            args.push(self.parse_expr()?);
            if self.check(TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Expr, Diagnostic> {
        let span = self.current_span();
        match self.peek().kind {
            TokenKind::IntLiteral => {
                let lexeme = self.advance().lexeme;
                let value = lexeme.parse::<i64>().map_err(|_| self.err("invalid integer literal"))?;
                Ok(Expr::IntLiteral(value))
            }
            TokenKind::FloatLiteral => {
                let lexeme = self.advance().lexeme;
                let value = lexeme.parse::<f64>().map_err(|_| self.err("invalid float literal"))?;
                Ok(Expr::FloatLiteral(value))
            }
            TokenKind::StringLiteral => {
                let raw = self.advance().lexeme;
                self.build_string_literal(raw, span)
            }
            TokenKind::CharLiteral => {
                let lexeme = self.advance().lexeme;
                Ok(Expr::CharLiteral(lexeme.chars().next().unwrap_or('\0')))
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::BoolLiteral(true))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::BoolLiteral(false))
            }
            TokenKind::SelfKw => {
                self.advance();
                Ok(Expr::Identifier("self".to_string()))
            }
            TokenKind::LParen => {
                self.advance();
                let saved = self.no_struct_literal;
                self.no_struct_literal = false;
                let expr = self.parse_expr()?;
                self.no_struct_literal = saved;
                self.expect(TokenKind::RParen, "')' to close grouped expression")?;
                Ok(expr)
            }
            TokenKind::LBracket => {
                self.advance();
                let mut elements = Vec::new();
                while !self.check(TokenKind::RBracket) && !self.is_eof() {
                    elements.push(self.parse_expr()?);
                    if self.check(TokenKind::Comma) {
                        self.advance();
                    } else {
                        break;
                    }
                }
                self.expect(TokenKind::RBracket, "']' to close array literal")?;
                Ok(Expr::ArrayLiteral { elements, span })
            }
            TokenKind::LBrace => {
                self.advance();
                let stmts = self.parse_stmt_list_until_rbrace()?;
                Ok(Expr::Block(stmts))
            }
            TokenKind::If => self.parse_if_expr(),
            TokenKind::Identifier => self.parse_identifier_primary(),
            _ => Err(self.err(format!("unexpected token '{}'", self.peek().lexeme))),
        }
    }

    fn parse_identifier_primary(&mut self) -> Result<Expr, Diagnostic> {
        let span = self.current_span();
        let name = self.advance().lexeme;

        if self.check(TokenKind::Lt) && self.generic_args_follow() {
            self.advance();
            let mut type_args = Vec::new();
            while !self.check(TokenKind::Gt) && !self.is_eof() {
                type_args.push(self.parse_type()?);
                if self.check(TokenKind::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
            self.expect(TokenKind::Gt, "'>' to close generic type arguments")?;
            if self.check(TokenKind::ColonColon) {
                self.advance();
                let method_name = self.expect_identifier()?;
                self.expect(TokenKind::LParen, "'(' after static method name")?;
                let args = self.parse_arg_list()?;
                self.expect(TokenKind::RParen, "')' to close argument list")?;
                return Ok(Expr::StaticMethodCall {
                    type_name: name,
                    type_args,
                    method_name,
                    args,
                    span,
                });
            }
            self.expect(TokenKind::LParen, "'(' after generic type arguments")?;
            let args = self.parse_arg_list()?;
            self.expect(TokenKind::RParen, "')' to close argument list")?;
            return Ok(Expr::Call {
                callee: Box::new(Expr::Identifier(name)),
                args,
                type_args,
                span,
            });
        }

        if self.check(TokenKind::LBrace) && !self.no_struct_literal && self.is_type_name(&name) {
            return self.parse_struct_init(name, span);
        }

        Ok(Expr::Identifier(name))
    }

    fn parse_struct_init(&mut self, type_name: String, span: Span) -> Result<Expr, Diagnostic> {
        self.expect(TokenKind::LBrace, "'{' to start struct initializer")?;
        let mut fields = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.is_eof() {
            let name = self.expect_identifier()?;
            self.expect(TokenKind::Colon, "':' after field name")?;
            let value = self.parse_expr()?;
            fields.push(FieldInit { name, value });
            if self.check(TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        self.expect(TokenKind::RBrace, "'}' to close struct initializer")?;
        Ok(Expr::StructInit {
            type_name,
            type_args: Vec::new(),
            fields,
            span,
        })
    }

    fn parse_if_expr(&mut self) -> Result<Expr, Diagnostic> {
        let span = self.current_span();
        self.advance(); // 'if'
        let cond = if self.check(TokenKind::LParen) {
            self.advance();
            let saved = self.no_struct_literal;
            self.no_struct_literal = false;
            let e = self.parse_expr()?;
            self.no_struct_literal = saved;
            self.expect(TokenKind::RParen, "')' to close 'if' condition")?;
            e
        } else {
            let saved = self.no_struct_literal;
            self.no_struct_literal = true;
            let e = self.parse_expr()?;
            self.no_struct_literal = saved;
            e
        };
        self.expect(TokenKind::LBrace, "'{' to start 'if' body")?;
        let then_branch = Expr::Block(self.parse_stmt_list_until_rbrace()?);
        let else_branch = if self.check(TokenKind::Else) {
            self.advance();
            if self.check(TokenKind::If) {
                Some(Box::new(self.parse_if_expr()?))
            } else {
                self.expect(TokenKind::LBrace, "'{' to start 'else' body")?;
                Some(Box::new(Expr::Block(self.parse_stmt_list_until_rbrace()?)))
            }
        } else {
            None
        };
        Ok(Expr::If {
            cond: Box::new(cond),
            then_branch: Box::new(then_branch),
            else_branch,
            span,
        })
    }

    /// String interpolation (spec §4.2): scan the raw literal content
    /// into alternating literal/expr parts, re-parsing `${...}` (or bare
    /// `$name`) slots as expressions with a nested parser instance.
    fn build_string_literal(&mut self, raw: String, span: Span) -> Result<Expr, Diagnostic> {
        if !raw.contains('$') {
            return Ok(Expr::StringLiteral(raw));
        }
        let mut parts = Vec::new();
        let mut literal = String::new();
        let chars: Vec<char> = raw.chars().collect();
        let mut i = 0;
        while i < chars.len() {
            if chars[i] == '$' && i + 1 < chars.len() && chars[i + 1] == '{' {
                if !literal.is_empty() {
                    parts.push(InterpPart::Literal(std::mem::take(&mut literal)));
                }
                let mut depth = 1;
                let mut j = i + 2;
                let start = j;
                while j < chars.len() && depth > 0 {
                    match chars[j] {
                        '{' => depth += 1,
                        '}' => depth -= 1,
                        _ => {}
                    }
                    if depth == 0 {
                        break;
                    }
                    j += 1;
                }
                let inner: String = chars[start..j].iter().collect();
                parts.push(InterpPart::Expr(self.parse_nested_expr(&inner)?));
                i = j + 1;
            } else if chars[i] == '$' && i + 1 < chars.len() && (chars[i + 1].is_alphabetic() || chars[i + 1] == '_') {
                if !literal.is_empty() {
                    parts.push(InterpPart::Literal(std::mem::take(&mut literal)));
                }
                let mut j = i + 1;
                while j < chars.len() && (chars[j].is_alphanumeric() || chars[j] == '_') {
                    j += 1;
                }
                let name: String = chars[i + 1..j].iter().collect();
                parts.push(InterpPart::Expr(Expr::Identifier(name)));
                i = j;
            } else {
                literal.push(chars[i]);
                i += 1;
            }
        }
        if !literal.is_empty() {
            parts.push(InterpPart::Literal(literal));
        }
        Ok(Expr::StringInterp { parts, span })
    }

    fn parse_nested_expr(&mut self, text: &str) -> Result<Expr, Diagnostic> {
        let stream = crate::lexer::tokenize(text, self.filename.clone())
            .map_err(|e| Diagnostic::error(self.filename.clone(), e.line, e.column, e.message))?;
        let mut nested = Parser::new(&stream.tokens, self.filename.clone(), self.known_types.clone());
        nested.type_param_scope = self.type_param_scope.clone();
        let expr = nested.parse_expr()?;
        if let Some(diag) = nested.diagnostics.into_iter().next() {
            return Err(diag);
        }
        Ok(expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn parse_str(src: &str) -> Program {
        let stream = tokenize(src, "test.paw").unwrap();
        parse(&stream).unwrap()
    }

    #[test]
    fn parses_minimal_main_function() {
        let program = parse_str("fn main() -> i32 { return 40 + 2; }");
        assert!(program.find_function("main").is_some());
    }

    #[test]
    fn parses_enum_type_decl_with_generic_params() {
        let program = parse_str("type Result<T,E> = enum { Ok(T), Err(E) }");
        let decl = program.find_type("Result").expect("Result type decl");
        match &decl.kind {
            TypeDeclKind::Enum { variants, .. } => {
                assert_eq!(variants.len(), 2);
                assert_eq!(variants[0].name, "Ok");
            }
            _ => panic!("expected enum"),
        }
    }

    #[test]
    fn disambiguates_generic_instance_from_comparison() {
        // Scenario (f)/property 6: both forms must parse without conflict.
        let program = parse_str(
            "fn f() -> i32 { let a: Vec<i32> = a; let b = 2; if (a < b) { return 1; } return 0; }",
        );
        let f = program.find_function("f").unwrap();
        match &f.body[0] {
            Stmt::Let { type_ann: Some(Type::GenericInstance { name, .. }), .. } => assert_eq!(name, "Vec"),
            other => panic!("expected generic instance let, got {:?}", other),
        }
    }

    #[test]
    fn parses_loop_iterator_form() {
        let program = parse_str("fn main() -> i32 { let mut s: i32 = 0; loop i in 1..=10 { s += i; } return s; }");
        let f = program.find_function("main").unwrap();
        assert!(matches!(f.body[1], Stmt::Loop { iterator: Some(_), .. }));
    }

    #[test]
    fn parses_is_expression_with_wildcard_and_guard() {
        let program = parse_str(
            "fn main() -> i32 { return r is { Ok(x) if x > 0 => x, Ok(y) => 0, _ => -1 }; }",
        );
        let f = program.find_function("main").unwrap();
        match &f.body[0] {
            Stmt::Return(Some(Expr::Is { arms, .. }), _) => {
                assert_eq!(arms.len(), 3);
                assert!(arms[0].guard.is_some());
                assert!(matches!(arms[2].pattern, Pattern::Wildcard));
            }
            other => panic!("unexpected stmt: {:?}", other),
        }
    }

    #[test]
    fn enum_variant_call_recognized_by_uppercase_callee() {
        let program = parse_str("fn f() -> i32 { return Ok(1); }");
        let f = program.find_function("f").unwrap();
        match &f.body[0] {
            Stmt::Return(Some(Expr::EnumVariant { variant, .. }), _) => assert_eq!(variant, "Ok"),
            other => panic!("unexpected stmt: {:?}", other),
        }
    }

    #[test]
    fn struct_init_requires_type_name() {
        let program = parse_str("fn f() -> i32 { let p = Point { x: 1, y: 2 }; return 0; }");
        let f = program.find_function("f").unwrap();
        match &f.body[0] {
            Stmt::Let { init: Some(Expr::StructInit { type_name, .. }), .. } => assert_eq!(type_name, "Point"),
            other => panic!("unexpected stmt: {:?}", other),
        }
    }

    #[test]
    fn string_interpolation_splits_literal_and_expr_parts() {
        let program = parse_str(r#"fn f() -> i32 { let s = "hi $name and ${1 + 2}"; return 0; }"#);
        let f = program.find_function("f").unwrap();
        match &f.body[0] {
            Stmt::Let { init: Some(Expr::StringInterp { parts, .. }), .. } => {
                assert_eq!(parts.len(), 4);
            }
            other => panic!("unexpected stmt: {:?}", other),
        }
    }

    #[test]
    fn parser_recovers_after_malformed_declaration_and_keeps_parsing() {
        let stream = tokenize("fn )(( garbage fn main() -> i32 { return 0; }", "test.paw").unwrap();
        let mut parser = Parser::new(&stream.tokens, stream.filename.clone(), HashSet::new());
        let program = parser.parse_program();
        assert!(!parser.diagnostics.is_empty());
        assert!(program.find_function("main").is_some());
    }

    #[test]
    fn try_expr_parses_question_mark_operator() {
        let program = parse_str("fn run() -> i32 { let v = div(10, 2)?; return v; }");
        let f = program.find_function("run").unwrap();
        match &f.body[0] {
            Stmt::Let { init: Some(Expr::Try { .. }), .. } => {}
            other => panic!("unexpected stmt: {:?}", other),
        }
    }
}
