use crate::ast::{Position, Span};
use std::iter::Peekable;
use std::str::Chars;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Str(String),
    Int(i64),
    Float(f64),

    LBrace,   // {
    RBrace,   // }
    LParen,   // (
    RParen,   // )
    LBracket, // [
    RBracket, // ]
    Comma,    // ,
    Colon,    // :
    Dot,      // .
    Arrow,    // ->
    EqEq,     // ==
    NotEq,    // !=
    Lt,       // <
    Le,       // <=
    Gt,       // >
    Ge,       // >=
    AndAnd,   // &&
    OrOr,     // ||
    Bang,     // !
    Plus,     // +
    Minus,    // -
    Star,     // *
    Slash,    // /
    Percent,  // %

    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub span: Span,
}

#[derive(Debug, thiserror::Error)]
pub enum LexError {
    #[error("Unexpected character '{0}' at {1}")]
    UnexpectedChar(char, Span),
    #[error("Unterminated string starting at {0}")]
    UnterminatedString(Span),
    #[error("Invalid number '{0}' at {1}")]
    InvalidNumber(String, Span),
}

impl LexError {
    pub fn span(&self) -> Span {
        match self {
            LexError::UnexpectedChar(_, span)
            | LexError::UnterminatedString(span)
            | LexError::InvalidNumber(_, span) => *span,
        }
    }
}

pub struct Lexer<'a> {
    chars: Peekable<Chars<'a>>,
    line: u32,
    column: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars().peekable(),
            line: 1,
            column: 1,
        }
    }

    fn position(&self) -> Position {
        Position {
            line: self.line,
            column: self.column,
        }
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn bump_if(&mut self, expected: char) -> bool {
        if self.chars.peek() == Some(&expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    /// Character after the next one, without consuming anything.
    fn peek_second(&self) -> Option<char> {
        let mut ahead = self.chars.clone();
        ahead.next();
        ahead.next()
    }

    fn skip_line(&mut self) {
        while let Some(c) = self.bump() {
            if c == '\n' {
                break;
            }
        }
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.chars.peek().copied() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('#') => self.skip_line(),
                Some('/') if self.peek_second() == Some('/') => self.skip_line(),
                _ => break,
            }
        }
    }

    fn read_ident(&mut self, first: char) -> String {
        let mut s = String::from(first);
        while let Some(&c) = self.chars.peek() {
            if c.is_alphanumeric() || c == '_' {
                s.push(c);
                self.bump();
            } else {
                break;
            }
        }
        s
    }

    fn read_string(&mut self, start: Position) -> Result<String, LexError> {
        let mut s = String::new();
        loop {
            match self.bump() {
                Some('"') => return Ok(s),
                Some('\\') => {
                    if let Some(c) = self.bump() {
                        match c {
                            'n' => s.push('\n'),
                            't' => s.push('\t'),
                            'r' => s.push('\r'),
                            _ => s.push(c),
                        }
                    }
                }
                Some(c) => s.push(c),
                None => {
                    return Err(LexError::UnterminatedString(Span::new(
                        start,
                        self.position(),
                    )));
                }
            }
        }
    }

    fn read_number(&mut self, first: char, start: Position) -> Result<Token, LexError> {
        let mut s = String::from(first);
        let mut is_float = false;
        loop {
            match self.chars.peek().copied() {
                Some(c) if c.is_ascii_digit() => {
                    s.push(c);
                    self.bump();
                }
                Some('.')
                    if !is_float && self.peek_second().is_some_and(|c| c.is_ascii_digit()) =>
                {
                    is_float = true;
                    s.push('.');
                    self.bump();
                }
                _ => break,
            }
        }
        let span = Span::new(start, self.position());
        if is_float {
            s.parse()
                .map(Token::Float)
                .map_err(|_| LexError::InvalidNumber(s, span))
        } else {
            s.parse()
                .map(Token::Int)
                .map_err(|_| LexError::InvalidNumber(s, span))
        }
    }

    pub fn next_token(&mut self) -> Result<Spanned, LexError> {
        self.skip_whitespace_and_comments();

        let start = self.position();
        let c = match self.bump() {
            Some(c) => c,
            None => {
                return Ok(Spanned {
                    token: Token::Eof,
                    span: Span::new(start, start),
                });
            }
        };

        let token = match c {
            '{' => Token::LBrace,
            '}' => Token::RBrace,
            '(' => Token::LParen,
            ')' => Token::RParen,
            '[' => Token::LBracket,
            ']' => Token::RBracket,
            ',' => Token::Comma,
            ':' => Token::Colon,
            '.' => Token::Dot,
            '+' => Token::Plus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '%' => Token::Percent,
            '-' => {
                if self.bump_if('>') {
                    Token::Arrow
                } else {
                    Token::Minus
                }
            }
            '=' => {
                if self.bump_if('=') {
                    Token::EqEq
                } else {
                    return Err(LexError::UnexpectedChar(c, Span::new(start, self.position())));
                }
            }
            '!' => {
                if self.bump_if('=') {
                    Token::NotEq
                } else {
                    Token::Bang
                }
            }
            '<' => {
                if self.bump_if('=') {
                    Token::Le
                } else {
                    Token::Lt
                }
            }
            '>' => {
                if self.bump_if('=') {
                    Token::Ge
                } else {
                    Token::Gt
                }
            }
            '&' => {
                if self.bump_if('&') {
                    Token::AndAnd
                } else {
                    return Err(LexError::UnexpectedChar(c, Span::new(start, self.position())));
                }
            }
            '|' => {
                if self.bump_if('|') {
                    Token::OrOr
                } else {
                    return Err(LexError::UnexpectedChar(c, Span::new(start, self.position())));
                }
            }
            '"' => Token::Str(self.read_string(start)?),
            c if c.is_ascii_digit() => self.read_number(c, start)?,
            c if c.is_alphabetic() || c == '_' => Token::Ident(self.read_ident(c)),
            _ => return Err(LexError::UnexpectedChar(c, Span::new(start, self.position()))),
        };

        Ok(Spanned {
            token,
            span: Span::new(start, self.position()),
        })
    }

    pub fn tokenize(mut self) -> Result<Vec<Spanned>, LexError> {
        let mut tokens = Vec::new();
        loop {
            let tok = self.next_token()?;
            if tok.token == Token::Eof {
                tokens.push(tok);
                break;
            }
            tokens.push(tok);
        }
        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<Token> {
        Lexer::new(input)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.token)
            .collect()
    }

    #[test]
    fn test_basic_tokens() {
        assert_eq!(
            kinds("entity User { }"),
            vec![
                Token::Ident("entity".into()),
                Token::Ident("User".into()),
                Token::LBrace,
                Token::RBrace,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_comments() {
        let input = "# comment\nentity User { // inline\n}";
        assert_eq!(
            kinds(input),
            vec![
                Token::Ident("entity".into()),
                Token::Ident("User".into()),
                Token::LBrace,
                Token::RBrace,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            kinds("== != < <= > >= && || ! -> - + * / %"),
            vec![
                Token::EqEq,
                Token::NotEq,
                Token::Lt,
                Token::Le,
                Token::Gt,
                Token::Ge,
                Token::AndAnd,
                Token::OrOr,
                Token::Bang,
                Token::Arrow,
                Token::Minus,
                Token::Plus,
                Token::Star,
                Token::Slash,
                Token::Percent,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_numbers_and_paths() {
        assert_eq!(
            kinds("42 3.5 user.role"),
            vec![
                Token::Int(42),
                Token::Float(3.5),
                Token::Ident("user".into()),
                Token::Dot,
                Token::Ident("role".into()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_positions() {
        let tokens = Lexer::new("entity\n  User").tokenize().unwrap();
        assert_eq!(tokens[1].span.start, Position { line: 2, column: 3 });
        assert_eq!(tokens[1].span.end, Position { line: 2, column: 7 });
    }

    #[test]
    fn test_unterminated_string() {
        let err = Lexer::new("\"open").tokenize().unwrap_err();
        assert!(matches!(err, LexError::UnterminatedString(_)));
    }

    #[test]
    fn test_single_equals_rejected() {
        let err = Lexer::new("a = b").tokenize().unwrap_err();
        assert!(matches!(err, LexError::UnexpectedChar('=', _)));
    }
}
