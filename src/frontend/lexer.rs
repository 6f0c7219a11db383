use crate::frontend::token::{Token, TokenKind};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{line}:{col}: {message}")]
pub struct LexerError {
    pub message: String,
    pub line: usize,
    pub col: usize,
}

pub struct Lexer {
    source: Vec<char>,
    pos: usize,
    /// Byte offset of `source[pos]` in the original text.
    offset: usize,
    line: usize,
    col: usize,
}

/// Position captured at the start of a token.
#[derive(Debug, Clone, Copy)]
struct Mark {
    offset: usize,
    line: usize,
    col: usize,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Lexer {
            source: source.chars().collect(),
            pos: 0,
            offset: 0,
            line: 1,
            col: 1,
        }
    }

    fn current(&self) -> Option<char> {
        self.source.get(self.pos).copied()
    }

    fn peek(&self) -> Option<char> {
        self.source.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.current();
        if let Some(c) = ch {
            if c == '\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
            self.offset += c.len_utf8();
        }
        self.pos += 1;
        ch
    }

    fn mark(&self) -> Mark {
        Mark {
            offset: self.offset,
            line: self.line,
            col: self.col,
        }
    }

    fn error_at(&self, mark: Mark, message: impl Into<String>) -> LexerError {
        LexerError {
            message: message.into(),
            line: mark.line,
            col: mark.col,
        }
    }

    /// Skips whitespace and both comment forms.
    fn skip_trivia(&mut self) -> Result<(), LexerError> {
        loop {
            match (self.current(), self.peek()) {
                (Some(ch), _) if ch.is_whitespace() => {
                    self.advance();
                }
                (Some('/'), Some('/')) => {
                    while let Some(ch) = self.current() {
                        if ch == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                (Some('/'), Some('*')) => {
                    let start = self.mark();
                    self.advance();
                    self.advance();
                    loop {
                        match (self.current(), self.peek()) {
                            (Some('*'), Some('/')) => {
                                self.advance();
                                self.advance();
                                break;
                            }
                            (Some(_), _) => {
                                self.advance();
                            }
                            (None, _) => {
                                return Err(self.error_at(start, "unterminated block comment"));
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn read_string(&mut self, quote: char) -> Result<TokenKind, LexerError> {
        let start = self.mark();
        self.advance();

        let mut string = String::new();
        loop {
            match self.current() {
                Some(ch) if ch == quote => {
                    self.advance();
                    return Ok(TokenKind::String(string));
                }
                Some('\\') => {
                    let escape = self.mark();
                    self.advance();
                    match self.current() {
                        Some('n') => string.push('\n'),
                        Some('t') => string.push('\t'),
                        Some('r') => string.push('\r'),
                        Some('\\') => string.push('\\'),
                        Some('"') => string.push('"'),
                        Some('\'') => string.push('\''),
                        Some('0') => string.push('\0'),
                        Some(ch) => {
                            return Err(
                                self.error_at(escape, format!("unknown escape sequence: \\{}", ch))
                            );
                        }
                        None => {
                            return Err(self.error_at(escape, "unexpected EOF in escape sequence"));
                        }
                    }
                    self.advance();
                }
                Some('\n') => {
                    return Err(self.error_at(
                        start,
                        "unterminated string (newline before closing quote)",
                    ));
                }
                Some(ch) => {
                    string.push(ch);
                    self.advance();
                }
                None => {
                    return Err(self.error_at(start, "unterminated string literal"));
                }
            }
        }
    }

    fn read_number(&mut self) -> Result<TokenKind, LexerError> {
        let start = self.mark();

        // Hex: 0x... or 0X...
        if self.current() == Some('0') && matches!(self.peek(), Some('x') | Some('X')) {
            self.advance();
            self.advance();

            let mut hex = String::new();
            while let Some(ch) = self.current() {
                if ch.is_ascii_hexdigit() {
                    hex.push(ch);
                    self.advance();
                } else {
                    break;
                }
            }

            if hex.is_empty() {
                return Err(self.error_at(start, "expected hex digits after 0x"));
            }

            let value = u64::from_str_radix(&hex, 16)
                .map_err(|_| self.error_at(start, format!("invalid hex number: 0x{}", hex)))?;
            return Ok(TokenKind::Number(value as f64));
        }

        let mut digits = String::new();
        let mut has_dot = false;

        while let Some(ch) = self.current() {
            if ch.is_ascii_digit() {
                digits.push(ch);
                self.advance();
            } else if ch == '.' && !has_dot {
                // Only a decimal point if a digit follows; `1.foo` is member access.
                if self.peek().map(|c| c.is_ascii_digit()).unwrap_or(false) {
                    has_dot = true;
                    digits.push('.');
                    self.advance();
                } else {
                    break;
                }
            } else {
                break;
            }
        }

        let value: f64 = digits
            .parse()
            .map_err(|_| self.error_at(start, format!("invalid number: {}", digits)))?;
        Ok(TokenKind::Number(value))
    }

    fn read_identifier(&mut self) -> TokenKind {
        let mut ident = String::new();
        while let Some(ch) = self.current() {
            if ch.is_alphanumeric() || ch == '_' || ch == '$' {
                ident.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        TokenKind::keyword(&ident).unwrap_or(TokenKind::Ident(ident))
    }

    fn read_operator(&mut self) -> Option<TokenKind> {
        let ch = self.current()?;
        let next = self.peek();

        let (kind, width) = match (ch, next) {
            ('=', Some('=')) => (TokenKind::Eq, 2),
            ('!', Some('=')) => (TokenKind::NotEq, 2),
            ('<', Some('=')) => (TokenKind::LtEq, 2),
            ('>', Some('=')) => (TokenKind::GtEq, 2),
            ('&', Some('&')) => (TokenKind::AndAnd, 2),
            ('|', Some('|')) => (TokenKind::OrOr, 2),
            ('=', _) => (TokenKind::Assign, 1),
            ('!', _) => (TokenKind::Bang, 1),
            ('<', _) => (TokenKind::Lt, 1),
            ('>', _) => (TokenKind::Gt, 1),
            ('+', _) => (TokenKind::Plus, 1),
            ('-', _) => (TokenKind::Minus, 1),
            ('*', _) => (TokenKind::Star, 1),
            ('/', _) => (TokenKind::Slash, 1),
            ('%', _) => (TokenKind::Percent, 1),
            ('(', _) => (TokenKind::LParen, 1),
            (')', _) => (TokenKind::RParen, 1),
            ('{', _) => (TokenKind::LBrace, 1),
            ('}', _) => (TokenKind::RBrace, 1),
            ('[', _) => (TokenKind::LBracket, 1),
            (']', _) => (TokenKind::RBracket, 1),
            (',', _) => (TokenKind::Comma, 1),
            (';', _) => (TokenKind::Semicolon, 1),
            ('.', _) => (TokenKind::Dot, 1),
            _ => return None,
        };

        for _ in 0..width {
            self.advance();
        }
        Some(kind)
    }

    /// Scans the whole source. The result always ends with an `Eof` token.
    pub fn tokenize(&mut self) -> Result<Vec<Token>, LexerError> {
        let mut tokens = Vec::new();
        let text: String = self.source.iter().collect();

        loop {
            self.skip_trivia()?;
            let start = self.mark();

            let kind = match self.current() {
                None => {
                    tokens.push(Token {
                        kind: TokenKind::Eof,
                        lexeme: String::new(),
                        line: start.line,
                        col: start.col,
                        start: start.offset,
                        end: start.offset,
                    });
                    break;
                }
                Some(q @ ('"' | '\'')) => self.read_string(q)?,
                Some(ch) if ch.is_ascii_digit() => self.read_number()?,
                Some(ch) if ch.is_alphabetic() || ch == '_' || ch == '$' => self.read_identifier(),
                Some(ch) => match self.read_operator() {
                    Some(kind) => kind,
                    None => {
                        return Err(self.error_at(start, format!("unexpected character '{}'", ch)));
                    }
                },
            };

            tokens.push(Token {
                kind,
                lexeme: text[start.offset..self.offset].to_string(),
                line: start.line,
                col: start.col,
                start: start.offset,
                end: self.offset,
            });
        }

        Ok(tokens)
    }
}

/// Convenience wrapper: scan `source` into tokens.
pub fn tokenize(source: &str) -> Result<Vec<Token>, LexerError> {
    Lexer::new(source).tokenize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source)
            .expect("lexing should succeed")
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_simple_statement() {
        assert_eq!(
            kinds("var a = 1;"),
            vec![
                TokenKind::Var,
                TokenKind::Ident("a".into()),
                TokenKind::Assign,
                TokenKind::Number(1.0),
                TokenKind::Semicolon,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_two_char_operators() {
        assert_eq!(
            kinds("a == b != c <= d >= e && f || g"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::Eq,
                TokenKind::Ident("b".into()),
                TokenKind::NotEq,
                TokenKind::Ident("c".into()),
                TokenKind::LtEq,
                TokenKind::Ident("d".into()),
                TokenKind::GtEq,
                TokenKind::Ident("e".into()),
                TokenKind::AndAnd,
                TokenKind::Ident("f".into()),
                TokenKind::OrOr,
                TokenKind::Ident("g".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(kinds("42")[0], TokenKind::Number(42.0));
        assert_eq!(kinds("3.25")[0], TokenKind::Number(3.25));
        assert_eq!(kinds("0xff")[0], TokenKind::Number(255.0));
    }

    #[test]
    fn test_number_followed_by_member_access() {
        assert_eq!(
            kinds("1.x"),
            vec![
                TokenKind::Number(1.0),
                TokenKind::Dot,
                TokenKind::Ident("x".into()),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_strings_and_escapes() {
        assert_eq!(kinds(r#""a\nb""#)[0], TokenKind::String("a\nb".into()));
        assert_eq!(kinds("'it\\'s'")[0], TokenKind::String("it's".into()));
    }

    #[test]
    fn test_comments_are_skipped() {
        assert_eq!(
            kinds("// line\n/* block\n */ x"),
            vec![TokenKind::Ident("x".into()), TokenKind::Eof]
        );
    }

    #[test]
    fn test_offsets_and_positions() {
        let tokens = tokenize("var x;\n  y = 2;").unwrap();
        let y = &tokens[3];
        assert_eq!(y.kind, TokenKind::Ident("y".into()));
        assert_eq!((y.line, y.col), (2, 3));
        assert_eq!((y.start, y.end), (9, 10));
        assert_eq!(y.lexeme, "y");
    }

    #[test]
    fn test_offsets_with_multibyte_chars() {
        let source = "'é' + x";
        let tokens = tokenize(source).unwrap();
        assert_eq!(&source[tokens[0].start..tokens[0].end], "'é'");
        assert_eq!(&source[tokens[2].start..tokens[2].end], "x");
    }

    #[test]
    fn test_unterminated_string() {
        let err = tokenize("\"abc").unwrap_err();
        assert!(err.message.contains("unterminated"));
        assert_eq!((err.line, err.col), (1, 1));
    }

    #[test]
    fn test_unknown_escape() {
        let err = tokenize(r#""\q""#).unwrap_err();
        assert!(err.message.contains("unknown escape"));
    }

    #[test]
    fn test_unexpected_character() {
        let err = tokenize("a # b").unwrap_err();
        assert_eq!(err.to_string(), "1:3: unexpected character '#'");
    }

    #[test]
    fn test_eof_is_always_last() {
        let tokens = tokenize("").unwrap();
        assert_eq!(tokens.len(), 1);
        assert!(tokens[0].is_eof());
    }
}
