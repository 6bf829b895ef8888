use crate::ast::*;
use crate::lexer::{LexError, Lexer, Spanned, Token};

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Lex error: {0}")]
    Lex(#[from] LexError),
    #[error("Unexpected token {found:?} at {span}, expected {expected}")]
    Unexpected {
        found: Token,
        expected: &'static str,
        span: Span,
    },
}

impl ParseError {
    pub fn span(&self) -> Span {
        match self {
            ParseError::Lex(e) => e.span(),
            ParseError::Unexpected { span, .. } => *span,
        }
    }
}

static EOF: Spanned = Spanned {
    token: Token::Eof,
    span: Span {
        start: Position { line: 0, column: 0 },
        end: Position { line: 0, column: 0 },
    },
};

pub struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    pub fn new(input: &str) -> Result<Self, ParseError> {
        let tokens = Lexer::new(input).tokenize()?;
        Ok(Self { tokens, pos: 0 })
    }

    fn current(&self) -> &Spanned {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .unwrap_or(&EOF)
    }

    fn peek(&self) -> &Token {
        &self.current().token
    }

    fn span(&self) -> Span {
        self.current().span
    }

    /// Span of the most recently consumed token.
    fn prev_span(&self) -> Span {
        self.pos
            .checked_sub(1)
            .and_then(|i| self.tokens.get(i))
            .map(|t| t.span)
            .unwrap_or_default()
    }

    fn advance(&mut self) -> Spanned {
        let tok = self.current().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn unexpected<T>(&self, expected: &'static str) -> Result<T, ParseError> {
        Err(ParseError::Unexpected {
            found: self.peek().clone(),
            expected,
            span: self.span(),
        })
    }

    fn expect_ident(&mut self) -> Result<String, ParseError> {
        match self.peek().clone() {
            Token::Ident(s) => {
                self.advance();
                Ok(s)
            }
            _ => self.unexpected("identifier"),
        }
    }

    fn expect_string(&mut self) -> Result<String, ParseError> {
        match self.peek().clone() {
            Token::Str(s) => {
                self.advance();
                Ok(s)
            }
            _ => self.unexpected("string"),
        }
    }

    fn expect_int(&mut self) -> Result<i64, ParseError> {
        match self.peek().clone() {
            Token::Int(n) => {
                self.advance();
                Ok(n)
            }
            _ => self.unexpected("integer"),
        }
    }

    fn expect(&mut self, expected: Token, what: &'static str) -> Result<(), ParseError> {
        if *self.peek() == expected {
            self.advance();
            Ok(())
        } else {
            self.unexpected(what)
        }
    }

    fn check_ident(&self, name: &str) -> bool {
        matches!(self.peek(), Token::Ident(s) if s == name)
    }

    fn eat_ident(&mut self, name: &str) -> bool {
        if self.check_ident(name) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub fn parse(&mut self) -> Result<File, ParseError> {
        let mut file = File::default();

        while *self.peek() != Token::Eof {
            let start = self.span();
            let keyword = self.expect_ident().or_else(|_| {
                self.unexpected(
                    "app, entity, relation, rule, access, action, message, job, hook, view, webhook, migrate or test",
                )
            })?;
            match keyword.as_str() {
                "app" => file.apps.push(self.parse_app(start)?),
                "entity" => file.entities.push(self.parse_entity(start)?),
                "relation" => file.relations.push(self.parse_relation(start)?),
                "rule" => file.rules.push(self.parse_rule(start)?),
                "access" => file.access.push(self.parse_access(start)?),
                "action" => file.actions.push(self.parse_action(start)?),
                "message" => file.messages.push(self.parse_message(start)?),
                "job" => file.jobs.push(self.parse_job(start)?),
                "hook" => file.hooks.push(self.parse_hook(start)?),
                "view" => file.views.push(self.parse_view(start)?),
                "webhook" => file.webhooks.push(self.parse_webhook(start)?),
                "migrate" => file.migrations.push(self.parse_migrate(start)?),
                "test" => file.tests.push(self.parse_test(start)?),
                _ => {
                    return Err(ParseError::Unexpected {
                        found: Token::Ident(keyword),
                        expected: "declaration keyword",
                        span: start,
                    });
                }
            }
        }

        Ok(file)
    }

    /// Parses `{ key: value ... }`, handing each key to `entry`.
    fn parse_block<F>(&mut self, mut entry: F) -> Result<(), ParseError>
    where
        F: FnMut(&mut Self, &str, Span) -> Result<(), ParseError>,
    {
        self.expect(Token::LBrace, "'{'")?;
        while *self.peek() != Token::RBrace {
            let key_span = self.span();
            let key = self.expect_ident()?;
            self.expect(Token::Colon, "':'")?;
            entry(self, &key, key_span)?;
        }
        self.expect(Token::RBrace, "'}'")
    }

    fn unknown_key<T>(key: &str, span: Span, expected: &'static str) -> Result<T, ParseError> {
        Err(ParseError::Unexpected {
            found: Token::Ident(key.to_string()),
            expected,
            span,
        })
    }

    /// Identifier or string.
    fn parse_word(&mut self) -> Result<String, ParseError> {
        match self.peek().clone() {
            Token::Ident(s) | Token::Str(s) => {
                self.advance();
                Ok(s)
            }
            _ => self.unexpected("identifier or string"),
        }
    }

    fn parse_dotted(&mut self) -> Result<Vec<String>, ParseError> {
        let mut segments = vec![self.expect_ident()?];
        while *self.peek() == Token::Dot {
            self.advance();
            segments.push(self.expect_ident()?);
        }
        Ok(segments)
    }

    fn parse_ident_list(&mut self) -> Result<Vec<String>, ParseError> {
        let mut list = vec![self.expect_ident()?];
        while *self.peek() == Token::Comma {
            self.advance();
            list.push(self.expect_ident()?);
        }
        Ok(list)
    }

    fn parse_app(&mut self, start: Span) -> Result<App, ParseError> {
        let name = self.expect_ident()?;
        let mut app = App {
            name,
            auth: None,
            database: None,
            frontend: None,
            span: start,
        };
        self.parse_block(|p, key, span| {
            let value = p.parse_word()?;
            match key {
                "auth" => app.auth = Some(value),
                "database" => app.database = Some(value),
                "frontend" => app.frontend = Some(value),
                _ => return Self::unknown_key(key, span, "auth, database or frontend"),
            }
            Ok(())
        })?;
        app.span = start.to(self.prev_span());
        Ok(app)
    }

    fn parse_entity(&mut self, start: Span) -> Result<Entity, ParseError> {
        let name = self.expect_ident()?;
        self.expect(Token::LBrace, "'{'")?;

        let mut fields = Vec::new();
        while *self.peek() != Token::RBrace {
            fields.push(self.parse_field()?);
        }
        self.expect(Token::RBrace, "'}'")?;

        Ok(Entity {
            name,
            fields,
            span: start.to(self.prev_span()),
        })
    }

    fn parse_field(&mut self) -> Result<Field, ParseError> {
        let start = self.span();
        let name = self.expect_ident()?;
        self.expect(Token::Colon, "':'")?;

        let ty = if self.eat_ident("enum") {
            self.expect(Token::LParen, "'('")?;
            let values = self.parse_ident_list()?;
            self.expect(Token::RParen, "')'")?;
            FieldType::Enum(values)
        } else {
            FieldType::Named(self.expect_ident()?)
        };

        let mut modifiers = Vec::new();
        loop {
            if self.eat_ident("unique") {
                modifiers.push(FieldModifier::Unique);
            } else if self.eat_ident("optional") {
                modifiers.push(FieldModifier::Optional);
            } else if self.eat_ident("default") {
                let lit = self.parse_literal()?;
                modifiers.push(FieldModifier::Default(lit));
            } else if self.eat_ident("length") {
                let op = match self.peek() {
                    Token::Lt => BinaryOp::Lt,
                    Token::Le => BinaryOp::Le,
                    Token::Gt => BinaryOp::Gt,
                    Token::Ge => BinaryOp::Ge,
                    Token::EqEq => BinaryOp::Eq,
                    _ => return self.unexpected("length comparison (<, <=, >, >=, ==)"),
                };
                self.advance();
                let value = self.expect_int()?;
                modifiers.push(FieldModifier::Length { op, value });
            } else {
                break;
            }
        }

        Ok(Field {
            name,
            ty,
            modifiers,
            span: start.to(self.prev_span()),
        })
    }

    fn parse_literal(&mut self) -> Result<Literal, ParseError> {
        let lit = match self.peek().clone() {
            Token::Str(s) => Literal::Str(s),
            Token::Int(n) => Literal::Int(n),
            Token::Float(f) => Literal::Float(f),
            Token::Minus => {
                self.advance();
                return match self.peek().clone() {
                    Token::Int(n) => {
                        self.advance();
                        Ok(Literal::Int(-n))
                    }
                    Token::Float(f) => {
                        self.advance();
                        Ok(Literal::Float(-f))
                    }
                    _ => self.unexpected("number"),
                };
            }
            Token::Ident(s) if s == "true" => Literal::Bool(true),
            Token::Ident(s) if s == "false" => Literal::Bool(false),
            Token::Ident(s) if s == "null" => Literal::Null,
            _ => return self.unexpected("literal"),
        };
        self.advance();
        Ok(lit)
    }

    fn parse_relation(&mut self, start: Span) -> Result<Relation, ParseError> {
        let source = self.expect_ident()?;
        self.expect(Token::Dot, "'.'")?;
        let field = self.expect_ident()?;
        self.expect(Token::Arrow, "'->'")?;
        let many = if self.eat_ident("many") {
            true
        } else {
            self.eat_ident("one");
            false
        };
        let target = self.expect_ident()?;

        Ok(Relation {
            source,
            field,
            target,
            many,
            span: start.to(self.prev_span()),
        })
    }

    /// `Entity.operation`
    fn parse_target(&mut self) -> Result<(String, String), ParseError> {
        let entity = self.expect_ident()?;
        self.expect(Token::Dot, "'.'")?;
        let operation = self.expect_ident()?;
        Ok((entity, operation))
    }

    fn parse_rule(&mut self, start: Span) -> Result<Rule, ParseError> {
        let name = self.expect_ident()?;
        if !self.eat_ident("on") {
            return self.unexpected("'on'");
        }
        let (entity, operation) = self.parse_target()?;
        self.expect(Token::LBrace, "'{'")?;

        let kind = if self.eat_ident("forbid") {
            self.eat_ident("if");
            RuleKind::Forbid
        } else if self.eat_ident("require") {
            RuleKind::Require
        } else {
            return self.unexpected("'forbid' or 'require'");
        };
        let condition = self.parse_expr()?;

        let emit = if self.eat_ident("emit") {
            Some(self.expect_ident()?)
        } else {
            None
        };
        self.expect(Token::RBrace, "'}'")?;

        Ok(Rule {
            name,
            entity,
            operation,
            kind,
            condition,
            emit,
            span: start.to(self.prev_span()),
        })
    }

    fn parse_access(&mut self, start: Span) -> Result<Access, ParseError> {
        let entity = self.expect_ident()?;
        let mut read = None;
        let mut write = None;
        self.parse_block(|p, key, span| {
            match key {
                "read" => read = Some(p.parse_expr()?),
                "write" => write = Some(p.parse_expr()?),
                _ => return Self::unknown_key(key, span, "read or write"),
            }
            Ok(())
        })?;
        Ok(Access {
            entity,
            read,
            write,
            span: start.to(self.prev_span()),
        })
    }

    fn parse_action(&mut self, start: Span) -> Result<Action, ParseError> {
        let name = self.expect_ident()?;
        let name_span = self.prev_span();
        let mut input = None;
        let mut operation = None;
        self.parse_block(|p, key, span| {
            match key {
                "input" => input = Some(p.expect_ident()?),
                "operation" => operation = Some(p.expect_ident()?),
                _ => return Self::unknown_key(key, span, "input or operation"),
            }
            Ok(())
        })?;
        let Some(input) = input else {
            return Err(ParseError::Unexpected {
                found: Token::RBrace,
                expected: "'input' in action",
                span: name_span,
            });
        };
        Ok(Action {
            name,
            input,
            operation,
            span: start.to(self.prev_span()),
        })
    }

    fn parse_message(&mut self, start: Span) -> Result<Message, ParseError> {
        let code = self.expect_ident()?;
        let mut level = None;
        let mut default = None;
        if *self.peek() == Token::LBrace {
            self.parse_block(|p, key, span| {
                match key {
                    "level" => level = Some(p.expect_ident()?),
                    "default" => default = Some(p.expect_string()?),
                    _ => return Self::unknown_key(key, span, "level or default"),
                }
                Ok(())
            })?;
        }
        Ok(Message {
            code,
            level,
            default,
            span: start.to(self.prev_span()),
        })
    }

    fn parse_job(&mut self, start: Span) -> Result<Job, ParseError> {
        let name = self.expect_ident()?;
        let name_span = self.prev_span();
        let mut input = None;
        let mut needs = None;
        let mut capabilities = Vec::new();
        self.parse_block(|p, key, span| {
            match key {
                "input" => input = Some(p.expect_ident()?),
                "needs" => {
                    let needs_start = p.span();
                    let path = p.parse_dotted()?;
                    let filter = if p.eat_ident("where") {
                        Some(p.parse_expr()?)
                    } else {
                        None
                    };
                    needs = Some(Needs {
                        path,
                        filter,
                        span: needs_start.to(p.prev_span()),
                    });
                }
                "capabilities" | "effect" => {
                    capabilities.push(p.parse_dotted()?.join("."));
                    while *p.peek() == Token::Comma {
                        p.advance();
                        capabilities.push(p.parse_dotted()?.join("."));
                    }
                }
                _ => return Self::unknown_key(key, span, "input, needs or capabilities"),
            }
            Ok(())
        })?;
        let Some(input) = input else {
            return Err(ParseError::Unexpected {
                found: Token::RBrace,
                expected: "'input' in job",
                span: name_span,
            });
        };
        Ok(Job {
            name,
            input,
            needs,
            capabilities,
            span: start.to(self.prev_span()),
        })
    }

    fn parse_hook(&mut self, start: Span) -> Result<Hook, ParseError> {
        let entity = self.expect_ident()?;
        self.expect(Token::Dot, "'.'")?;
        let event_span = self.span();
        let event = self.expect_ident()?;
        let (timing, operation) = match event.split_once('_') {
            Some(("before", op)) if !op.is_empty() => (Timing::Before, op.to_string()),
            Some(("after", op)) if !op.is_empty() => (Timing::After, op.to_string()),
            _ => {
                return Err(ParseError::Unexpected {
                    found: Token::Ident(event),
                    expected: "lifecycle event like after_create",
                    span: event_span,
                });
            }
        };

        self.expect(Token::LBrace, "'{'")?;
        let mut jobs = Vec::new();
        while *self.peek() != Token::RBrace {
            if !self.eat_ident("enqueue") {
                return self.unexpected("'enqueue'");
            }
            jobs.extend(self.parse_ident_list()?);
        }
        self.expect(Token::RBrace, "'}'")?;

        Ok(Hook {
            entity,
            timing,
            operation,
            jobs,
            span: start.to(self.prev_span()),
        })
    }

    fn parse_view(&mut self, start: Span) -> Result<View, ParseError> {
        let name = self.expect_ident()?;
        let name_span = self.prev_span();
        let mut source = None;
        let mut fields = Vec::new();
        let mut filter = None;
        let mut sort = None;
        let mut limit = None;
        self.parse_block(|p, key, span| {
            match key {
                "source" => source = Some(p.expect_ident()?),
                "fields" => fields = p.parse_ident_list()?,
                "filter" => filter = Some(p.parse_expr()?),
                "sort" => {
                    let field = p.expect_ident()?;
                    let descending = if p.eat_ident("desc") {
                        true
                    } else {
                        p.eat_ident("asc");
                        false
                    };
                    sort = Some(Sort { field, descending });
                }
                "limit" => limit = Some(p.expect_int()?),
                _ => return Self::unknown_key(key, span, "source, fields, filter, sort or limit"),
            }
            Ok(())
        })?;
        let Some(source) = source else {
            return Err(ParseError::Unexpected {
                found: Token::RBrace,
                expected: "'source' in view",
                span: name_span,
            });
        };
        Ok(View {
            name,
            source,
            fields,
            filter,
            sort,
            limit,
            span: start.to(self.prev_span()),
        })
    }

    fn parse_webhook(&mut self, start: Span) -> Result<Webhook, ParseError> {
        let name = self.expect_ident()?;
        let mut provider = None;
        let mut events = Vec::new();
        let mut triggers = None;
        let mut route = None;
        self.parse_block(|p, key, span| {
            match key {
                "provider" => provider = Some(p.parse_word()?),
                "events" => {
                    events.push(p.parse_word()?);
                    while *p.peek() == Token::Comma {
                        p.advance();
                        events.push(p.parse_word()?);
                    }
                }
                "triggers" => triggers = Some(p.expect_ident()?),
                "route" => route = Some(p.expect_string()?),
                _ => return Self::unknown_key(key, span, "provider, events, triggers or route"),
            }
            Ok(())
        })?;
        Ok(Webhook {
            name,
            provider,
            events,
            triggers,
            route,
            span: start.to(self.prev_span()),
        })
    }

    fn parse_migrate(&mut self, start: Span) -> Result<Migrate, ParseError> {
        let version = self.parse_word()?;
        let mut description = None;
        if *self.peek() == Token::LBrace {
            self.parse_block(|p, key, span| {
                match key {
                    "description" => description = Some(p.expect_string()?),
                    _ => return Self::unknown_key(key, span, "description"),
                }
                Ok(())
            })?;
        }
        Ok(Migrate {
            version,
            description,
            span: start.to(self.prev_span()),
        })
    }

    fn parse_test(&mut self, start: Span) -> Result<Test, ParseError> {
        let name = self.parse_word()?;
        let name_span = self.prev_span();
        let mut entity = None;
        let mut expect = None;
        self.parse_block(|p, key, span| {
            match key {
                "entity" => entity = Some(p.expect_ident()?),
                "expect" => expect = Some(p.parse_expr()?),
                _ => return Self::unknown_key(key, span, "entity or expect"),
            }
            Ok(())
        })?;
        let (Some(entity), Some(expect)) = (entity, expect) else {
            return Err(ParseError::Unexpected {
                found: Token::RBrace,
                expected: "'entity' and 'expect' in test",
                span: name_span,
            });
        };
        Ok(Test {
            name,
            entity,
            expect,
            span: start.to(self.prev_span()),
        })
    }

    // Expressions, lowest precedence first.

    pub fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_or()
    }

    fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        let span = left.span().to(right.span());
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
            span,
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_and()?;
        while *self.peek() == Token::OrOr || self.check_ident("or") {
            self.advance();
            let right = self.parse_and()?;
            left = Self::binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_not()?;
        while *self.peek() == Token::AndAnd || self.check_ident("and") {
            self.advance();
            let right = self.parse_not()?;
            left = Self::binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, ParseError> {
        if self.check_ident("not") {
            let start = self.advance().span;
            let operand = self.parse_not()?;
            let span = start.to(operand.span());
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
                span,
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let left = self.parse_additive()?;
        let op = match self.peek() {
            Token::EqEq => BinaryOp::Eq,
            Token::NotEq => BinaryOp::Ne,
            Token::Lt => BinaryOp::Lt,
            Token::Le => BinaryOp::Le,
            Token::Gt => BinaryOp::Gt,
            Token::Ge => BinaryOp::Ge,
            Token::Ident(s) if s == "in" => BinaryOp::In,
            _ => return Ok(left),
        };
        self.advance();
        let right = self.parse_additive()?;
        Ok(Self::binary(op, left, right))
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Self::binary(op, left, right);
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                Token::Percent => BinaryOp::Mod,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_unary()?;
            left = Self::binary(op, left, right);
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let op = match self.peek() {
            Token::Bang => UnaryOp::Not,
            Token::Minus => UnaryOp::Neg,
            _ => return self.parse_primary(),
        };
        let start = self.advance().span;
        let operand = self.parse_unary()?;
        let span = start.to(operand.span());
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
            span,
        })
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let start = self.span();
        match self.peek().clone() {
            Token::Str(s) => {
                self.advance();
                Ok(Expr::Literal(Literal::Str(s), start))
            }
            Token::Int(n) => {
                self.advance();
                Ok(Expr::Literal(Literal::Int(n), start))
            }
            Token::Float(f) => {
                self.advance();
                Ok(Expr::Literal(Literal::Float(f), start))
            }
            Token::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            Token::Ident(name) => {
                self.advance();
                match name.as_str() {
                    "true" => return Ok(Expr::Literal(Literal::Bool(true), start)),
                    "false" => return Ok(Expr::Literal(Literal::Bool(false), start)),
                    "null" => return Ok(Expr::Literal(Literal::Null, start)),
                    _ => {}
                }

                if *self.peek() == Token::LParen {
                    self.advance();
                    let mut args = Vec::new();
                    if *self.peek() != Token::RParen {
                        args.push(self.parse_expr()?);
                        while *self.peek() == Token::Comma {
                            self.advance();
                            args.push(self.parse_expr()?);
                        }
                    }
                    self.expect(Token::RParen, "')'")?;
                    return Ok(Expr::Call {
                        name,
                        args,
                        span: start.to(self.prev_span()),
                    });
                }

                let mut segments = vec![name];
                while *self.peek() == Token::Dot {
                    self.advance();
                    segments.push(self.expect_ident()?);
                }
                let span = start.to(self.prev_span());
                if segments.len() == 1 {
                    Ok(Expr::Ident(segments.remove(0), span))
                } else {
                    Ok(Expr::Path(segments, span))
                }
            }
            _ => self.unexpected("expression"),
        }
    }
}

/// Parses a complete source text into a [`File`].
pub fn parse(input: &str) -> Result<File, ParseError> {
    Parser::new(input)?.parse()
}
