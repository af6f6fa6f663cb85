use crate::error::{Code, Diagnostic, Span};

/// Characters that always stand alone outside string literals.
const STRUCTURAL: [char; 10] = ['(', ')', '{', '}', ',', ':', '+', '-', '*', '/'];

/// Two-character operators recognised by look-ahead on their first char.
const PAIRED_OPERATORS: [&str; 4] = ["==", "<=", ">=", "!="];

/// Structural token. Classification is left to the parser.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub lexeme: String,
    pub span: Span,
}

impl Token {
    pub fn new(lexeme: String, span: Span) -> Self {
        Self { lexeme, span }
    }

    pub fn is(&self, lexeme: &str) -> bool {
        self.lexeme == lexeme
    }
}

fn is_blank(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r' | '\n')
}

/// Splits one source line into tokens.
pub fn tokenize(source: &str) -> Result<Vec<Token>, Diagnostic> {
    Lexer::new(source).scan_tokens()
}

pub struct Lexer<'a> {
    source: &'a str,
    chars: Vec<(usize, char)>,
    tokens: Vec<Token>,
    current: String,
    start: usize,
    /// Inside a double-quoted literal.
    verbatim: bool,
    /// Previous character inside the literal was an unescaped backslash.
    escaped: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().collect(),
            tokens: Vec::new(),
            current: String::new(),
            start: 0,
            verbatim: false,
            escaped: false,
        }
    }

    pub fn scan_tokens(mut self) -> Result<Vec<Token>, Diagnostic> {
        // Head lock: leading blanks are skipped outright.
        let first = self
            .chars
            .iter()
            .position(|&(_, c)| !is_blank(c))
            .unwrap_or(self.chars.len());

        let mut i = first;
        while i < self.chars.len() {
            let (pos, c) = self.chars[i];

            if self.verbatim {
                self.scan_verbatim(pos, c);
                i += 1;
                continue;
            }

            match c {
                '"' => {
                    self.flush();
                    self.verbatim = true;
                    self.escaped = false;
                    self.append(pos, c);
                }
                c if STRUCTURAL.contains(&c) => {
                    self.flush();
                    self.push_single(pos, c);
                }
                '=' | '<' | '>' | '!' => {
                    let next = self.chars.get(i + 1).map(|&(_, next)| next);
                    let pair: String = [c, next.unwrap_or('\0')].iter().collect();
                    if next == Some('=') && PAIRED_OPERATORS.contains(&pair.as_str()) {
                        self.flush();
                        self.tokens.push(Token::new(pair, Span::new(pos, pos + 2)));
                        i += 2;
                        continue;
                    } else if c == '!' {
                        self.append(pos, c);
                    } else {
                        self.flush();
                        self.push_single(pos, c);
                    }
                }
                c if is_blank(c) => self.flush(),
                _ => self.append(pos, c),
            }
            i += 1;
        }

        if self.verbatim {
            return Err(Diagnostic::fatal(Code::IllegalSymbol, "Unterminated string")
                .with_span(Span::new(self.start, self.source.len())));
        }
        self.flush();

        self.tokens.retain(|token| !token.lexeme.is_empty());
        Ok(self.tokens)
    }

    fn scan_verbatim(&mut self, pos: usize, c: char) {
        self.append(pos, c);
        match c {
            '\\' => self.escaped = !self.escaped,
            '"' if !self.escaped => {
                self.verbatim = false;
                self.flush();
            }
            _ => self.escaped = false,
        }
    }

    fn append(&mut self, pos: usize, c: char) {
        if self.current.is_empty() {
            self.start = pos;
        }
        self.current.push(c);
    }

    fn push_single(&mut self, pos: usize, c: char) {
        self.tokens
            .push(Token::new(c.to_string(), Span::new(pos, pos + c.len_utf8())));
    }

    fn flush(&mut self) {
        if self.current.is_empty() {
            return;
        }
        let end = self.start + self.current.len();
        let lexeme = std::mem::take(&mut self.current);
        self.tokens.push(Token::new(lexeme, Span::new(self.start, end)));
    }
}
