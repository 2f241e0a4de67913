/// SQL Lexer - converts SQL string into tokens, honoring the dialect's
/// quoting, escaping and comment rules

use super::token::{Token, TokenType};
use crate::dialect::{Dialect, StringEscapeStyle};
use crate::error::{Result, SqlError};

pub struct Lexer<'d> {
    input: Vec<char>,
    position: usize,
    line: usize,
    column: usize,
    dialect: &'d Dialect,
}

impl<'d> Lexer<'d> {
    pub fn new(input: &str, dialect: &'d Dialect) -> Self {
        Self {
            input: input.chars().collect(),
            position: 0,
            line: 1,
            column: 1,
            dialect,
        }
    }

    pub fn tokenize(&mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();

        loop {
            let token = self.next_token()?;
            let is_eof = matches!(token.token_type, TokenType::Eof);
            tokens.push(token);
            if is_eof {
                break;
            }
        }

        Ok(tokens)
    }

    pub fn next_token(&mut self) -> Result<Token> {
        self.skip_whitespace();

        let line = self.line;
        let column = self.column;
        let offset = self.position;

        if self.is_eof() {
            return Ok(Token::new(TokenType::Eof, line, column, offset));
        }

        let ch = self.current_char();

        // Skip comments
        if ch == '-' && self.peek_char() == Some('-') {
            self.skip_line_comment();
            return self.next_token();
        }

        if ch == '#' && self.dialect.allows_hash_comments {
            self.skip_line_comment();
            return self.next_token();
        }

        if ch == '/' && self.peek_char() == Some('*') {
            self.skip_block_comment()?;
            return self.next_token();
        }

        if self.dialect.is_string_quote(ch) {
            let token_type = self.read_string(ch)?;
            return Ok(Token::new(token_type, line, column, offset));
        }

        if let Some(close) = self.dialect.identifier_quote(ch) {
            let token_type = self.read_quoted_identifier(close)?;
            return Ok(Token::new(token_type, line, column, offset));
        }

        if matches!(ch, '`' | '"' | '[') {
            return Err(SqlError::NotSupported {
                construct: format!("identifiers quoted with '{}'", ch),
                dialect: self.dialect.name().to_string(),
                version: self.dialect.version,
                min_version: None,
            });
        }

        if self.dialect.is_parameter_prefix(ch) && !(ch == ':' && self.peek_char() == Some(':')) {
            let token_type = self.read_parameter();
            return Ok(Token::new(token_type, line, column, offset));
        }

        let token_type = match ch {
            // Numbers
            '0'..='9' => self.read_number()?,
            '.' if self.peek_char().map_or(false, |c| c.is_ascii_digit()) => self.read_number()?,

            // Identifiers and keywords
            c if c.is_alphabetic() || c == '_' => self.read_identifier(),

            // Operators and delimiters
            '=' => {
                self.advance();
                TokenType::Eq
            }
            '!' => {
                self.advance();
                if self.current_char() == '=' {
                    self.advance();
                    TokenType::Ne
                } else {
                    return Err(self.unexpected('!', line, column));
                }
            }
            '<' => {
                self.advance();
                if self.current_char() == '=' {
                    self.advance();
                    if self.current_char() == '>' {
                        self.advance();
                        TokenType::NullSafeEq
                    } else {
                        TokenType::Le
                    }
                } else if self.current_char() == '>' {
                    self.advance();
                    TokenType::Ne
                } else {
                    TokenType::Lt
                }
            }
            '>' => {
                self.advance();
                if self.current_char() == '=' {
                    self.advance();
                    TokenType::Ge
                } else {
                    TokenType::Gt
                }
            }
            '|' => {
                self.advance();
                if self.current_char() == '|' {
                    self.advance();
                    TokenType::Concat
                } else {
                    return Err(self.unexpected('|', line, column));
                }
            }
            '+' => {
                self.advance();
                TokenType::Plus
            }
            '-' => {
                self.advance();
                if self.current_char() == '>' {
                    self.advance();
                    if self.current_char() == '>' {
                        self.advance();
                        TokenType::LongArrow
                    } else {
                        TokenType::Arrow
                    }
                } else {
                    TokenType::Minus
                }
            }
            '*' => {
                self.advance();
                TokenType::Star
            }
            '/' => {
                self.advance();
                TokenType::Slash
            }
            '%' => {
                self.advance();
                TokenType::Percent
            }
            '(' => {
                self.advance();
                TokenType::LParen
            }
            ')' => {
                self.advance();
                TokenType::RParen
            }
            ',' => {
                self.advance();
                TokenType::Comma
            }
            ';' => {
                self.advance();
                TokenType::Semicolon
            }
            '.' => {
                self.advance();
                TokenType::Dot
            }
            _ => return Err(self.unexpected(ch, line, column)),
        };

        Ok(Token::new(token_type, line, column, offset))
    }

    fn unexpected(&self, ch: char, line: usize, column: usize) -> SqlError {
        SqlError::syntax(
            format!("Unexpected character '{}' at {}:{}", ch, line, column),
            ch.to_string(),
        )
    }

    fn current_char(&self) -> char {
        if self.is_eof() {
            '\0'
        } else {
            self.input[self.position]
        }
    }

    fn peek_char(&self) -> Option<char> {
        self.input.get(self.position + 1).copied()
    }

    fn advance(&mut self) {
        if !self.is_eof() {
            if self.input[self.position] == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
            self.position += 1;
        }
    }

    fn is_eof(&self) -> bool {
        self.position >= self.input.len()
    }

    fn skip_whitespace(&mut self) {
        while !self.is_eof() && self.current_char().is_whitespace() {
            self.advance();
        }
    }

    fn skip_line_comment(&mut self) {
        while !self.is_eof() && self.current_char() != '\n' {
            self.advance();
        }
        if !self.is_eof() {
            self.advance(); // skip newline
        }
    }

    fn skip_block_comment(&mut self) -> Result<()> {
        self.advance(); // skip '/'
        self.advance(); // skip '*'

        while !self.is_eof() {
            if self.current_char() == '*' && self.peek_char() == Some('/') {
                self.advance();
                self.advance();
                return Ok(());
            }
            self.advance();
        }

        Err(SqlError::syntax("Unterminated block comment", "/*"))
    }

    fn read_string(&mut self, quote: char) -> Result<TokenType> {
        self.advance(); // skip opening quote
        let mut value = String::new();

        loop {
            if self.is_eof() {
                return Err(SqlError::syntax("Unterminated string", format!("{}{}", quote, value)));
            }
            let ch = self.current_char();

            if ch == '\\' && self.dialect.string_escape == StringEscapeStyle::Backslash {
                self.advance();
                if self.is_eof() {
                    return Err(SqlError::syntax("Unterminated string", format!("{}{}", quote, value)));
                }
                let escaped = match self.current_char() {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    '0' => '\0',
                    c => c,
                };
                value.push(escaped);
                self.advance();
                continue;
            }

            if ch == quote {
                // Doubled quote is an escaped quote in every dialect
                if self.peek_char() == Some(quote) {
                    value.push(quote);
                    self.advance();
                    self.advance();
                    continue;
                }
                self.advance(); // skip closing quote
                return Ok(TokenType::String(value));
            }

            value.push(ch);
            self.advance();
        }
    }

    fn read_quoted_identifier(&mut self, close: char) -> Result<TokenType> {
        let open = self.current_char();
        self.advance();
        let mut value = String::new();

        loop {
            if self.is_eof() {
                return Err(SqlError::syntax(
                    "Unterminated quoted identifier",
                    format!("{}{}", open, value),
                ));
            }
            let ch = self.current_char();
            if ch == close {
                if self.peek_char() == Some(close) {
                    value.push(close);
                    self.advance();
                    self.advance();
                    continue;
                }
                self.advance();
                return Ok(TokenType::QuotedIdentifier(value));
            }
            value.push(ch);
            self.advance();
        }
    }

    fn read_parameter(&mut self) -> TokenType {
        let mut value = String::new();
        value.push(self.current_char());
        self.advance();

        while !self.is_eof() {
            let ch = self.current_char();
            if ch.is_alphanumeric() || ch == '_' {
                value.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        TokenType::Parameter(value)
    }

    fn read_number(&mut self) -> Result<TokenType> {
        let mut value = String::new();
        let mut seen_dot = false;

        while !self.is_eof() {
            let ch = self.current_char();
            if ch.is_ascii_digit() {
                value.push(ch);
            } else if ch == '.' && !seen_dot {
                seen_dot = true;
                value.push(ch);
            } else {
                break;
            }
            self.advance();
        }

        // Handle scientific notation (e.g., 1.5e10)
        if !self.is_eof() && (self.current_char() == 'e' || self.current_char() == 'E') {
            let digits_follow = match self.peek_char() {
                Some(c) if c.is_ascii_digit() => true,
                Some('+') | Some('-') => self
                    .input
                    .get(self.position + 2)
                    .map_or(false, |c| c.is_ascii_digit()),
                _ => false,
            };
            if digits_follow {
                value.push(self.current_char());
                self.advance();
                if self.current_char() == '+' || self.current_char() == '-' {
                    value.push(self.current_char());
                    self.advance();
                }
                while !self.is_eof() && self.current_char().is_ascii_digit() {
                    value.push(self.current_char());
                    self.advance();
                }
            }
        }

        if value == "." {
            return Err(SqlError::syntax("Invalid number", value));
        }
        Ok(TokenType::Number(value))
    }

    fn read_identifier(&mut self) -> TokenType {
        let mut value = String::new();

        while !self.is_eof() {
            let ch = self.current_char();
            if ch.is_alphanumeric() || ch == '_' || ch == '$' {
                value.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        // Check if it's a keyword
        TokenType::from_keyword(&value).unwrap_or(TokenType::Identifier(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::DialectKind;

    fn lex(sql: &str, kind: DialectKind) -> Result<Vec<Token>> {
        let dialect = Dialect::latest(kind);
        Lexer::new(sql, &dialect).tokenize()
    }

    #[test]
    fn test_lexer_simple_select() {
        let tokens = lex("SELECT * FROM users", DialectKind::MySql).unwrap();

        assert_eq!(tokens.len(), 5); // SELECT, *, FROM, users, EOF
        assert!(matches!(tokens[0].token_type, TokenType::Select));
        assert!(matches!(tokens[1].token_type, TokenType::Star));
        assert!(matches!(tokens[2].token_type, TokenType::From));
        assert!(matches!(tokens[3].token_type, TokenType::Identifier(_)));
        assert!(matches!(tokens[4].token_type, TokenType::Eof));
    }

    #[test]
    fn test_lexer_string_escapes_per_dialect() {
        let tokens = lex(r"SELECT 'it\'s', 'a''b'", DialectKind::MySql).unwrap();
        assert!(matches!(tokens[1].token_type, TokenType::String(ref s) if s == "it's"));
        assert!(matches!(tokens[3].token_type, TokenType::String(ref s) if s == "a'b"));

        // Backslash is literal under doubled-quote escaping
        let tokens = lex(r"SELECT 'c:\dir'", DialectKind::PostgreSql).unwrap();
        assert!(matches!(tokens[1].token_type, TokenType::String(ref s) if s == r"c:\dir"));
    }

    #[test]
    fn test_lexer_quoted_identifiers() {
        let tokens = lex("SELECT `order` FROM t", DialectKind::MySql).unwrap();
        assert!(matches!(tokens[1].token_type, TokenType::QuotedIdentifier(ref s) if s == "order"));

        let tokens = lex("SELECT [my col] FROM t", DialectKind::SqlServer).unwrap();
        assert!(matches!(tokens[1].token_type, TokenType::QuotedIdentifier(ref s) if s == "my col"));

        // Double quotes are strings in MySQL, identifiers in PostgreSQL
        let tokens = lex("SELECT \"x\"", DialectKind::MySql).unwrap();
        assert!(matches!(tokens[1].token_type, TokenType::String(_)));
        let tokens = lex("SELECT \"x\"", DialectKind::PostgreSql).unwrap();
        assert!(matches!(tokens[1].token_type, TokenType::QuotedIdentifier(_)));
    }

    #[test]
    fn test_lexer_rejects_foreign_quotes() {
        let err = lex("SELECT `x` FROM t", DialectKind::PostgreSql).unwrap_err();
        assert!(matches!(err, SqlError::NotSupported { .. }));
    }

    #[test]
    fn test_lexer_operators() {
        let tokens = lex("= != <> < > <= >= <=> || -> ->>", DialectKind::MySql).unwrap();

        assert!(matches!(tokens[0].token_type, TokenType::Eq));
        assert!(matches!(tokens[1].token_type, TokenType::Ne));
        assert!(matches!(tokens[2].token_type, TokenType::Ne));
        assert!(matches!(tokens[3].token_type, TokenType::Lt));
        assert!(matches!(tokens[4].token_type, TokenType::Gt));
        assert!(matches!(tokens[5].token_type, TokenType::Le));
        assert!(matches!(tokens[6].token_type, TokenType::Ge));
        assert!(matches!(tokens[7].token_type, TokenType::NullSafeEq));
        assert!(matches!(tokens[8].token_type, TokenType::Concat));
        assert!(matches!(tokens[9].token_type, TokenType::Arrow));
        assert!(matches!(tokens[10].token_type, TokenType::LongArrow));
    }

    #[test]
    fn test_lexer_parameters_and_numbers() {
        let tokens = lex("WHERE id = @id AND x = :x AND v = 1.50", DialectKind::MySql).unwrap();
        assert!(matches!(tokens[3].token_type, TokenType::Parameter(ref p) if p == "@id"));
        assert!(matches!(tokens[7].token_type, TokenType::Parameter(ref p) if p == ":x"));
        assert!(matches!(tokens[11].token_type, TokenType::Number(ref n) if n == "1.50"));
    }

    #[test]
    fn test_lexer_comments() {
        let tokens = lex("SELECT * -- trailing\nFROM users # mysql", DialectKind::MySql).unwrap();
        assert_eq!(tokens.len(), 5);
        assert!(matches!(tokens[2].token_type, TokenType::From));

        assert!(lex("SELECT 1 # nope", DialectKind::PostgreSql).is_err());
    }
}
