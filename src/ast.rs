//! Operator tree for one line, built by the parser and walked by the
//! evaluator.

use crate::error::Span;
use crate::value::Payload;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
}

impl BinaryOp {
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        let op = match symbol {
            "+" => BinaryOp::Add,
            "-" => BinaryOp::Subtract,
            "*" => BinaryOp::Multiply,
            "/" => BinaryOp::Divide,
            "==" => BinaryOp::Equal,
            "!=" => BinaryOp::NotEqual,
            "<" => BinaryOp::Less,
            "<=" => BinaryOp::LessEqual,
            ">" => BinaryOp::Greater,
            ">=" => BinaryOp::GreaterEqual,
            _ => return None,
        };
        Some(op)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::Less => "<",
            BinaryOp::LessEqual => "<=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEqual => ">=",
        }
    }

    /// Binding strength; higher binds tighter.
    pub fn precedence(self) -> u8 {
        match self {
            BinaryOp::Multiply | BinaryOp::Divide => 2,
            BinaryOp::Add | BinaryOp::Subtract => 1,
            _ => 0,
        }
    }

    pub fn is_arithmetic(self) -> bool {
        self.precedence() > 0
    }
}

/// Statement keywords, handled natively rather than through the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Var,
    Ref,
    Return,
    Dispose,
    Def,
    End,
}

impl Keyword {
    pub fn from_lexeme(lexeme: &str) -> Option<Self> {
        let keyword = match lexeme {
            "var" => Keyword::Var,
            "ref" => Keyword::Ref,
            "return" => Keyword::Return,
            "dispose" => Keyword::Dispose,
            "def" => Keyword::Def,
            "end" => Keyword::End,
            _ => return None,
        };
        Some(keyword)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Literal {
        value: Payload,
        span: Span,
    },
    Variable {
        name: String,
        span: Span,
    },
    /// `domain:name`
    Member {
        domain: String,
        name: String,
        span: Span,
    },
    Call {
        name: String,
        args: Vec<Node>,
        span: Span,
    },
    Binary {
        left: Box<Node>,
        operator: BinaryOp,
        right: Box<Node>,
        span: Span,
    },
    /// Comma expression `(a, b, c)`; yields its last element.
    Group {
        items: Vec<Node>,
        span: Span,
    },
}

impl Node {
    pub fn span(&self) -> Span {
        match self {
            Node::Literal { span, .. }
            | Node::Variable { span, .. }
            | Node::Member { span, .. }
            | Node::Call { span, .. }
            | Node::Binary { span, .. }
            | Node::Group { span, .. } => *span,
        }
    }
}

/// Assignable place: a variable or a struct member.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub name: String,
    pub domain: Option<String>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Declare {
        name: String,
        value: Node,
        span: Span,
    },
    /// `ref name = target`
    Bind {
        name: String,
        target: Target,
        span: Span,
    },
    Assign {
        target: Target,
        value: Node,
        span: Span,
    },
    Return {
        value: Option<Node>,
        span: Span,
    },
    Dispose {
        name: String,
        span: Span,
    },
    OpenScope {
        span: Span,
    },
    CloseScope {
        span: Span,
    },
    Define {
        name: String,
        params: Vec<String>,
        span: Span,
    },
    End {
        span: Span,
    },
    Expression {
        expr: Node,
    },
}

impl Statement {
    pub fn span(&self) -> Span {
        match self {
            Statement::Declare { span, .. }
            | Statement::Bind { span, .. }
            | Statement::Assign { span, .. }
            | Statement::Return { span, .. }
            | Statement::Dispose { span, .. }
            | Statement::OpenScope { span }
            | Statement::CloseScope { span }
            | Statement::Define { span, .. }
            | Statement::End { span } => *span,
            Statement::Expression { expr } => expr.span(),
        }
    }
}
