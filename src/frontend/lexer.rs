use crate::frontend::token::{Token, TokenKind};

#[derive(Debug)]
pub struct LexerError {
    pub message: String,
    pub line: usize,
    pub col: usize,
}

impl std::fmt::Display for LexerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}: {}", self.line, self.col, self.message)
    }
}

impl std::error::Error for LexerError {}

pub struct Lexer {
    source: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Lexer {
            source: source.chars().collect(),
            pos: 0,
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
        if ch == Some('\n') {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        self.pos += 1;
        ch
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.current() {
            if ch == ' ' || ch == '\t' || ch == '\r' || ch == '\n' {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn skip_comment(&mut self) {
        while let Some(ch) = self.current() {
            if ch == '\n' {
                break;
            }
            self.advance();
        }
    }

    fn read_string(&mut self) -> Result<Token, LexerError> {
        let start_line = self.line;
        let start_col = self.col;
        self.advance();

        // No escape sequences; everything up to the closing quote is literal,
        // newlines included.
        let mut string = String::new();
        loop {
            match self.current() {
                Some('\'') => {
                    self.advance();
                    return Ok(Token::new(
                        TokenKind::StringLit,
                        start_line,
                        start_col,
                        string,
                    ));
                }
                Some(ch) => {
                    string.push(ch);
                    self.advance();
                }
                None => {
                    return Err(LexerError {
                        message: "unterminated string literal".to_string(),
                        line: start_line,
                        col: start_col,
                    });
                }
            }
        }
    }

    fn read_number(&mut self) -> Result<Token, LexerError> {
        let start_line = self.line;
        let start_col = self.col;

        let mut digits = String::new();
        let mut has_dot = false;

        while let Some(ch) = self.current() {
            if ch.is_ascii_digit() {
                digits.push(ch);
                self.advance();
            } else if ch == '.' {
                if has_dot {
                    return Err(LexerError {
                        message: format!("multiple decimal points in number: {}.", digits),
                        line: start_line,
                        col: start_col,
                    });
                }
                has_dot = true;
                digits.push('.');
                self.advance();
            } else {
                break;
            }
        }

        let kind = if has_dot {
            TokenKind::FloatLit
        } else {
            TokenKind::IntLit
        };
        Ok(Token::new(kind, start_line, start_col, digits))
    }

    fn read_identifier(&mut self) -> Token {
        let start_line = self.line;
        let start_col = self.col;

        let mut ident = String::new();
        while let Some(ch) = self.current() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                ident.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        let kind = match ident.as_str() {
            // Booleans
            "true" | "false" => TokenKind::BoolLit,

            // Type names
            "int" | "float" | "bool" | "string" | "void" | "capture" => TokenKind::TypeId,

            // Definitions and control flow
            "proc" => TokenKind::Proc,
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "loop" => TokenKind::Loop,
            "return" => TokenKind::Return,
            "struct" => TokenKind::Struct,
            "using" => TokenKind::Using,

            // Bindings
            "bind" => TokenKind::Bind,
            "strict" => TokenKind::Strict,
            "unbind" => TokenKind::Unbind,

            // Stack ops
            "dup" => TokenKind::Dup,
            "swap" => TokenKind::Swap,
            "rot" => TokenKind::Rot,
            "drop" => TokenKind::Drop,

            // Logic
            "not" => TokenKind::Not,
            "or" => TokenKind::Or,
            "and" => TokenKind::And,

            // I/O
            "print" => TokenKind::Print,
            "println" => TokenKind::Println,

            _ => TokenKind::Ident,
        };

        Token::new(kind, start_line, start_col, ident)
    }

    fn read_operator(&mut self) -> Option<Token> {
        let start_line = self.line;
        let start_col = self.col;
        let ch = self.current()?;
        let next = self.peek();

        let (kind, lexeme): (TokenKind, &str) = match (ch, next) {
            ('-', Some('>')) => {
                self.advance();
                self.advance();
                (TokenKind::Arrow, "->")
            }
            ('>', Some('=')) => {
                self.advance();
                self.advance();
                (TokenKind::GreaterEq, ">=")
            }
            ('<', Some('=')) => {
                self.advance();
                self.advance();
                (TokenKind::LessEq, "<=")
            }
            ('+', _) => {
                self.advance();
                (TokenKind::Plus, "+")
            }
            ('-', _) => {
                self.advance();
                (TokenKind::Minus, "-")
            }
            ('*', _) => {
                self.advance();
                (TokenKind::Star, "*")
            }
            ('/', _) => {
                self.advance();
                (TokenKind::Slash, "/")
            }
            ('%', _) => {
                self.advance();
                (TokenKind::Percent, "%")
            }
            ('>', _) => {
                self.advance();
                (TokenKind::Greater, ">")
            }
            ('<', _) => {
                self.advance();
                (TokenKind::Less, "<")
            }
            ('=', _) => {
                self.advance();
                (TokenKind::Equal, "=")
            }
            ('!', _) => {
                self.advance();
                (TokenKind::Bang, "!")
            }
            ('@', _) => {
                self.advance();
                (TokenKind::At, "@")
            }
            ('|', _) => {
                self.advance();
                (TokenKind::Pipe, "|")
            }
            (':', _) => {
                self.advance();
                (TokenKind::Colon, ":")
            }
            (',', _) => {
                self.advance();
                (TokenKind::Comma, ",")
            }
            ('(', _) => {
                self.advance();
                (TokenKind::LParen, "(")
            }
            (')', _) => {
                self.advance();
                (TokenKind::RParen, ")")
            }
            ('{', _) => {
                self.advance();
                (TokenKind::LBrace, "{")
            }
            ('}', _) => {
                self.advance();
                (TokenKind::RBrace, "}")
            }
            _ => return None,
        };

        Some(Token::new(kind, start_line, start_col, lexeme))
    }

    /// Tokenizes the whole source. Comments are dropped; the returned stream
    /// always ends with an `Eof` token.
    pub fn tokenize(&mut self) -> Result<Vec<Token>, LexerError> {
        let mut tokens = Vec::new();

        loop {
            self.skip_whitespace();

            match self.current() {
                None => {
                    tokens.push(Token::new(TokenKind::Eof, self.line, self.col, ""));
                    break;
                }
                Some('#') => {
                    self.skip_comment();
                }
                Some('\'') => {
                    tokens.push(self.read_string()?);
                }
                Some(ch) if ch.is_ascii_digit() => {
                    tokens.push(self.read_number()?);
                }
                Some(ch) if ch.is_ascii_alphabetic() || ch == '_' => {
                    tokens.push(self.read_identifier());
                }
                Some(ch) => match self.read_operator() {
                    Some(token) => tokens.push(token),
                    None => {
                        return Err(LexerError {
                            message: format!("unexpected character: '{}'", ch),
                            line: self.line,
                            col: self.col,
                        });
                    }
                },
            }
        }

        Ok(tokens)
    }
}
