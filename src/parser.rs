use crate::ast::{BinaryOp, Keyword, Node, Statement, Target};
use crate::error::{Code, Diagnostic, Span};
use crate::lexer::{tokenize, Token};
use crate::registry::Registry;
use crate::value::Payload;

/// Tokenizes and parses one source line. Blank lines yield `None`.
pub fn parse_line(source: &str, registry: &Registry) -> Result<Option<Statement>, Diagnostic> {
    let tokens = tokenize(source)?;
    if tokens.is_empty() {
        return Ok(None);
    }
    Parser::new(tokens, registry).parse_statement().map(Some)
}

fn syntax_error(span: Span, message: impl Into<String>) -> Diagnostic {
    Diagnostic::fatal(Code::IllegalSymbol, message).with_span(span)
}

pub fn is_identifier(lexeme: &str) -> bool {
    let mut chars = lexeme.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_')
        && !matches!(lexeme, "true" | "false" | "null")
}

/// Classifies a literal token. `Ok(None)` means the token is not a literal.
pub fn literal(token: &Token) -> Result<Option<Payload>, Diagnostic> {
    let lexeme = token.lexeme.as_str();
    let value = match lexeme {
        "true" => Payload::Bool(true),
        "false" => Payload::Bool(false),
        "null" => Payload::Null,
        _ if lexeme.starts_with('"') => {
            if lexeme.len() < 2 || !lexeme.ends_with('"') {
                return Err(syntax_error(token.span, "Unterminated string"));
            }
            Payload::String(unescape(&lexeme[1..lexeme.len() - 1]))
        }
        _ if lexeme.starts_with(|c: char| c.is_ascii_digit()) => number(token)?,
        _ => return Ok(None),
    };
    Ok(Some(value))
}

fn number(token: &Token) -> Result<Payload, Diagnostic> {
    let lexeme = token.lexeme.as_str();
    if lexeme.chars().all(|c| c.is_ascii_digit()) {
        return lexeme.parse::<i64>().map(Payload::Int).map_err(|_| {
            Diagnostic::fatal(
                Code::IllegalParam,
                format!("Integer literal '{}' is out of range", lexeme),
            )
            .with_span(token.span)
        });
    }

    let well_formed = match lexeme.split_once('.') {
        Some((whole, fraction)) => {
            !fraction.is_empty() && [whole, fraction].iter().all(|part| part.chars().all(|c| c.is_ascii_digit()))
        }
        None => false,
    };
    if !well_formed {
        return Err(syntax_error(token.span, format!("Malformed number '{}'", lexeme)));
    }
    lexeme
        .parse::<f64>()
        .map(Payload::Double)
        .map_err(|_| syntax_error(token.span, format!("Malformed number '{}'", lexeme)))
}

fn unescape(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }
        match chars.next() {
            Some('"') => result.push('"'),
            Some('\\') => result.push('\\'),
            Some('n') => result.push('\n'),
            Some('t') => result.push('\t'),
            Some(other) => {
                result.push('\\');
                result.push(other);
            }
            None => result.push('\\'),
        }
    }
    result
}

/// Builds the operator tree for one line by precedence climbing.
///
/// The registry is consulted only to tell calls from variables: an
/// identifier naming a callable entry is a call, with or without parentheses.
pub struct Parser<'r> {
    tokens: Vec<Token>,
    current: usize,
    registry: &'r Registry,
}

impl<'r> Parser<'r> {
    pub fn new(tokens: Vec<Token>, registry: &'r Registry) -> Self {
        Self {
            tokens,
            current: 0,
            registry,
        }
    }

    pub fn parse_statement(&mut self) -> Result<Statement, Diagnostic> {
        let keyword = self.peek().and_then(|token| Keyword::from_lexeme(&token.lexeme));
        let statement = match keyword {
            Some(keyword) => {
                let start = self.advance_or_end()?.span;
                self.keyword_statement(keyword, start)?
            }
            None => self.plain_statement()?,
        };
        self.expect_end()?;
        Ok(statement)
    }

    fn keyword_statement(&mut self, keyword: Keyword, start: Span) -> Result<Statement, Diagnostic> {
        match keyword {
            Keyword::Var => {
                let name = self.identifier("variable name")?;
                let value = if self.is_at_end() {
                    Node::Literal {
                        value: Payload::Null,
                        span: name.span,
                    }
                } else {
                    self.consume("=", "Expected '=' after variable name")?;
                    self.expression()?
                };
                Ok(Statement::Declare {
                    name: name.lexeme,
                    span: start.to(value.span()),
                    value,
                })
            }
            Keyword::Ref => {
                let name = self.identifier("reference name")?;
                self.consume("=", "Expected '=' after reference name")?;
                let target = self.target()?;
                Ok(Statement::Bind {
                    name: name.lexeme,
                    span: start.to(target.span),
                    target,
                })
            }
            Keyword::Return => {
                if self.is_at_end() {
                    return Ok(Statement::Return {
                        value: None,
                        span: start,
                    });
                }
                let value = self.expression()?;
                Ok(Statement::Return {
                    span: start.to(value.span()),
                    value: Some(value),
                })
            }
            Keyword::Dispose => {
                let name = self.identifier("variable name")?;
                Ok(Statement::Dispose {
                    span: start.to(name.span),
                    name: name.lexeme,
                })
            }
            Keyword::Def => {
                let name = self.identifier("function name")?;
                self.consume("(", "Expected '(' after function name")?;
                let mut params = Vec::new();
                if !self.check(")") {
                    loop {
                        params.push(self.identifier("parameter name")?.lexeme);
                        if !self.match_lexeme(",") {
                            break;
                        }
                    }
                }
                let close = self.consume(")", "Expected ')' after parameters")?;
                Ok(Statement::Define {
                    name: name.lexeme,
                    params,
                    span: start.to(close.span),
                })
            }
            Keyword::End => Ok(Statement::End { span: start }),
        }
    }

    fn plain_statement(&mut self) -> Result<Statement, Diagnostic> {
        for (brace, opens) in [("{", true), ("}", false)] {
            if self.check(brace) {
                let span = self.advance_or_end()?.span;
                if !self.is_at_end() {
                    return Err(syntax_error(
                        span,
                        format!("'{}' must stand on its own line", brace),
                    ));
                }
                return Ok(if opens {
                    Statement::OpenScope { span }
                } else {
                    Statement::CloseScope { span }
                });
            }
        }

        if self.is_assignment() {
            let target = self.target()?;
            self.consume("=", "Expected '=' in assignment")?;
            let value = self.expression()?;
            return Ok(Statement::Assign {
                span: target.span.to(value.span()),
                target,
                value,
            });
        }

        Ok(Statement::Expression {
            expr: self.comma_expression()?,
        })
    }

    /// `name =` or `domain:name =` at the start of the line.
    fn is_assignment(&self) -> bool {
        let lexeme = |offset: usize| self.tokens.get(self.current + offset).map(|t| t.lexeme.as_str());
        let Some(first) = lexeme(0) else {
            return false;
        };
        if !is_identifier(first) {
            return false;
        }
        match (lexeme(1), lexeme(2), lexeme(3)) {
            (Some("="), _, _) => true,
            (Some(":"), Some(member), Some("=")) => is_identifier(member),
            _ => false,
        }
    }

    fn target(&mut self) -> Result<Target, Diagnostic> {
        let first = self.identifier("variable name")?;
        if self.match_lexeme(":") {
            let member = self.identifier("member name")?;
            return Ok(Target {
                span: first.span.to(member.span),
                name: member.lexeme,
                domain: Some(first.lexeme),
            });
        }
        Ok(Target {
            name: first.lexeme,
            domain: None,
            span: first.span,
        })
    }

    /// Top-level expression; a bare comma list groups like `(a, b)`.
    fn comma_expression(&mut self) -> Result<Node, Diagnostic> {
        let first = self.expression()?;
        if !self.check(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.match_lexeme(",") {
            items.push(self.expression()?);
        }
        let span = items[0].span().to(items[items.len() - 1].span());
        Ok(Node::Group { items, span })
    }

    pub fn expression(&mut self) -> Result<Node, Diagnostic> {
        self.binary(0)
    }

    fn binary(&mut self, min_precedence: u8) -> Result<Node, Diagnostic> {
        let mut left = self.unary()?;

        while let Some(operator) = self.peek().and_then(|token| BinaryOp::from_symbol(&token.lexeme)) {
            if operator.precedence() < min_precedence {
                break;
            }
            let operator_token = self.advance_or_end()?;
            if self.is_at_end() {
                return Err(syntax_error(
                    operator_token.span,
                    format!("Expected expression after '{}'", operator_token.lexeme),
                ));
            }
            // Left-associative: the right operand binds strictly tighter.
            let right = self.binary(operator.precedence() + 1)?;
            let span = left.span().to(right.span());
            left = Node::Binary {
                left: Box::new(left),
                operator,
                right: Box::new(right),
                span,
            };
        }

        Ok(left)
    }

    fn unary(&mut self) -> Result<Node, Diagnostic> {
        if !self.check("-") {
            return self.primary();
        }
        let minus = self.advance_or_end()?;
        if self.is_at_end() {
            return Err(syntax_error(minus.span, "Expected expression after '-'"));
        }
        let operand = self.unary()?;
        let span = minus.span.to(operand.span());

        match operand {
            Node::Literal {
                value: Payload::Int(n),
                ..
            } => Ok(Node::Literal {
                value: Payload::Int(-n),
                span,
            }),
            Node::Literal {
                value: Payload::Double(n),
                ..
            } => Ok(Node::Literal {
                value: Payload::Double(-n),
                span,
            }),
            operand => Ok(Node::Binary {
                left: Box::new(Node::Literal {
                    value: Payload::Int(0),
                    span: minus.span,
                }),
                operator: BinaryOp::Subtract,
                right: Box::new(operand),
                span,
            }),
        }
    }

    fn primary(&mut self) -> Result<Node, Diagnostic> {
        let token = self.advance_or_end()?;

        match token.lexeme.as_str() {
            "(" => return self.group(token),
            ")" => return Err(syntax_error(token.span, "Unbalanced bracket: unexpected ')'")),
            _ => {}
        }

        if let Some(value) = literal(&token)? {
            return Ok(Node::Literal {
                value,
                span: token.span,
            });
        }

        if Keyword::from_lexeme(&token.lexeme).is_some() {
            return Err(syntax_error(
                token.span,
                format!("Keyword '{}' cannot be used in an expression", token.lexeme),
            ));
        }
        if !is_identifier(&token.lexeme) {
            return Err(syntax_error(
                token.span,
                format!("Expected expression, found '{}'", token.lexeme),
            ));
        }

        let callable = self.registry.is_callable(&token.lexeme);
        if self.check("(") {
            if !callable {
                return Err(Diagnostic::fatal(
                    Code::IllegalCall,
                    format!("Entry not found - {}", token.lexeme),
                )
                .with_span(token.span));
            }
            return self.call(token);
        }
        if callable {
            let args = self.bare_arguments()?;
            let span = args.last().map_or(token.span, |last| token.span.to(last.span()));
            return Ok(Node::Call {
                name: token.lexeme,
                args,
                span,
            });
        }

        if self.match_lexeme(":") {
            let member = self.identifier("member name")?;
            return Ok(Node::Member {
                span: token.span.to(member.span),
                domain: token.lexeme,
                name: member.lexeme,
            });
        }

        Ok(Node::Variable {
            name: token.lexeme,
            span: token.span,
        })
    }

    fn group(&mut self, open: Token) -> Result<Node, Diagnostic> {
        if self.check(")") {
            let close = self.advance_or_end()?;
            return Err(syntax_error(
                open.span.to(close.span),
                "Empty parentheses are not allowed",
            ));
        }

        let items = self.arguments(&open)?;
        let close = self.close_bracket(&open)?;
        let span = open.span.to(close.span);
        match <[Node; 1]>::try_from(items) {
            Ok([single]) => Ok(single),
            Err(items) => Ok(Node::Group { items, span }),
        }
    }

    fn call(&mut self, name: Token) -> Result<Node, Diagnostic> {
        let open = self.advance_or_end()?;
        let args = if self.check(")") {
            Vec::new()
        } else {
            self.arguments(&open)?
        };
        let close = self.close_bracket(&open)?;
        Ok(Node::Call {
            span: name.span.to(close.span),
            name: name.lexeme,
            args,
        })
    }

    /// Comma-separated expressions inside a bracket opened by `open`.
    fn arguments(&mut self, open: &Token) -> Result<Vec<Node>, Diagnostic> {
        let mut args = Vec::new();
        loop {
            if self.is_at_end() {
                return Err(syntax_error(open.span, "Unbalanced bracket: '(' is never closed"));
            }
            args.push(self.expression()?);
            if !self.match_lexeme(",") {
                break;
            }
            if self.check(")") {
                return Err(syntax_error(self.previous_span(), "Expected expression after ','"));
            }
        }
        Ok(args)
    }

    /// Arguments of a call written without parentheses; they run to the end
    /// of the line or the enclosing bracket.
    fn bare_arguments(&mut self) -> Result<Vec<Node>, Diagnostic> {
        let mut args = Vec::new();
        if self.is_at_end() || self.check(")") || self.check(",") {
            return Ok(args);
        }
        loop {
            args.push(self.expression()?);
            if !self.match_lexeme(",") {
                break;
            }
        }
        Ok(args)
    }

    fn close_bracket(&mut self, open: &Token) -> Result<Token, Diagnostic> {
        if self.is_at_end() {
            return Err(syntax_error(open.span, "Unbalanced bracket: '(' is never closed"));
        }
        self.consume(")", "Unbalanced bracket: expected ')'")
    }

    fn expect_end(&self) -> Result<(), Diagnostic> {
        match self.peek() {
            None => Ok(()),
            Some(token) if token.is(")") => {
                Err(syntax_error(token.span, "Unbalanced bracket: unexpected ')'"))
            }
            Some(token) => Err(syntax_error(
                token.span,
                format!("Unexpected '{}' after statement", token.lexeme),
            )),
        }
    }

    fn identifier(&mut self, what: &str) -> Result<Token, Diagnostic> {
        match self.peek() {
            Some(token) if is_identifier(&token.lexeme) && Keyword::from_lexeme(&token.lexeme).is_none() => {
                self.advance_or_end()
            }
            Some(token) => Err(syntax_error(
                token.span,
                format!("Expected {}, found '{}'", what, token.lexeme),
            )),
            None => Err(syntax_error(self.end_span(), format!("Expected {}", what))),
        }
    }

    fn consume(&mut self, lexeme: &str, message: &str) -> Result<Token, Diagnostic> {
        if self.check(lexeme) {
            return self.advance_or_end();
        }
        let span = match self.peek() {
            Some(token) => token.span,
            None => self.end_span(),
        };
        Err(syntax_error(span, message))
    }

    fn match_lexeme(&mut self, lexeme: &str) -> bool {
        if self.check(lexeme) {
            self.current += 1;
            return true;
        }
        false
    }

    fn check(&self, lexeme: &str) -> bool {
        self.peek().is_some_and(|token| token.is(lexeme))
    }

    fn advance_or_end(&mut self) -> Result<Token, Diagnostic> {
        match self.tokens.get(self.current) {
            Some(token) => {
                self.current += 1;
                Ok(token.clone())
            }
            None => Err(syntax_error(self.end_span(), "Unexpected end of line")),
        }
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.current)
    }

    fn previous_span(&self) -> Span {
        self.current
            .checked_sub(1)
            .and_then(|index| self.tokens.get(index))
            .map_or(Span::single(0), |token| token.span)
    }

    /// Zero-width position just past the last token.
    fn end_span(&self) -> Span {
        let end = self.tokens.last().map_or(0, |token| token.span.end);
        Span::single(end)
    }
}
