#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    // Literals
    IntLit,
    FloatLit,
    StringLit,
    BoolLit,

    // Names
    Ident,
    TypeId,

    // Keywords
    Proc,
    If,
    Else,
    Loop,
    Bind,
    Strict,
    Unbind,
    Using,
    Return,
    Struct,
    Print,
    Println,
    Dup,
    Swap,
    Rot,
    Drop,
    Not,
    Or,
    And,

    // Arithmetic
    Plus,
    Minus,
    Star,
    Slash,
    Percent,

    // Comparison
    Greater,
    Less,
    GreaterEq,
    LessEq,
    Equal,

    // Punctuation
    Bang,
    At,
    Pipe,
    Arrow,
    Colon,
    Comma,
    LParen,
    RParen,
    LBrace,
    RBrace,

    Eof,
}

impl TokenKind {
    /// Short uppercase tag used by the token dump.
    pub fn tag(self) -> &'static str {
        match self {
            TokenKind::IntLit => "INT",
            TokenKind::FloatLit => "FLOAT",
            TokenKind::StringLit => "STRING",
            TokenKind::BoolLit => "BOOL",
            TokenKind::Ident => "IDENT",
            TokenKind::TypeId => "TYPE",
            TokenKind::Proc
            | TokenKind::If
            | TokenKind::Else
            | TokenKind::Loop
            | TokenKind::Bind
            | TokenKind::Strict
            | TokenKind::Unbind
            | TokenKind::Using
            | TokenKind::Return
            | TokenKind::Struct
            | TokenKind::Print
            | TokenKind::Println
            | TokenKind::Dup
            | TokenKind::Swap
            | TokenKind::Rot
            | TokenKind::Drop
            | TokenKind::Not
            | TokenKind::Or
            | TokenKind::And => "KEYWORD",
            TokenKind::Plus
            | TokenKind::Minus
            | TokenKind::Star
            | TokenKind::Slash
            | TokenKind::Percent => "OP",
            TokenKind::Greater
            | TokenKind::Less
            | TokenKind::GreaterEq
            | TokenKind::LessEq
            | TokenKind::Equal => "CMP",
            TokenKind::Bang
            | TokenKind::At
            | TokenKind::Pipe
            | TokenKind::Arrow
            | TokenKind::Colon
            | TokenKind::Comma
            | TokenKind::LParen
            | TokenKind::RParen
            | TokenKind::LBrace
            | TokenKind::RBrace => "PUNCT",
            TokenKind::Eof => "EOF",
        }
    }

    /// How this kind reads in a compile error, e.g. "expected '{', found 'proc'".
    pub fn describe(self) -> &'static str {
        match self {
            TokenKind::IntLit => "an integer literal",
            TokenKind::FloatLit => "a float literal",
            TokenKind::StringLit => "a string literal",
            TokenKind::BoolLit => "a boolean literal",
            TokenKind::Ident => "an identifier",
            TokenKind::TypeId => "a type name",
            TokenKind::Proc => "'proc'",
            TokenKind::If => "'if'",
            TokenKind::Else => "'else'",
            TokenKind::Loop => "'loop'",
            TokenKind::Bind => "'bind'",
            TokenKind::Strict => "'strict'",
            TokenKind::Unbind => "'unbind'",
            TokenKind::Using => "'using'",
            TokenKind::Return => "'return'",
            TokenKind::Struct => "'struct'",
            TokenKind::Print => "'print'",
            TokenKind::Println => "'println'",
            TokenKind::Dup => "'dup'",
            TokenKind::Swap => "'swap'",
            TokenKind::Rot => "'rot'",
            TokenKind::Drop => "'drop'",
            TokenKind::Not => "'not'",
            TokenKind::Or => "'or'",
            TokenKind::And => "'and'",
            TokenKind::Plus => "'+'",
            TokenKind::Minus => "'-'",
            TokenKind::Star => "'*'",
            TokenKind::Slash => "'/'",
            TokenKind::Percent => "'%'",
            TokenKind::Greater => "'>'",
            TokenKind::Less => "'<'",
            TokenKind::GreaterEq => "'>='",
            TokenKind::LessEq => "'<='",
            TokenKind::Equal => "'='",
            TokenKind::Bang => "'!'",
            TokenKind::At => "'@'",
            TokenKind::Pipe => "'|'",
            TokenKind::Arrow => "'->'",
            TokenKind::Colon => "':'",
            TokenKind::Comma => "','",
            TokenKind::LParen => "'('",
            TokenKind::RParen => "')'",
            TokenKind::LBrace => "'{'",
            TokenKind::RBrace => "'}'",
            TokenKind::Eof => "end of input",
        }
    }
}

/// A lexed token. `lexeme` holds the source text (string literals without
/// their quotes), so the compiler parses literal values straight from it.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub col: usize,
    pub lexeme: String,
}

impl Token {
    pub fn new(kind: TokenKind, line: usize, col: usize, lexeme: impl Into<String>) -> Self {
        Token {
            kind,
            line,
            col,
            lexeme: lexeme.into(),
        }
    }

    /// How this token reads in a compile error message.
    pub fn describe(&self) -> String {
        match self.kind {
            TokenKind::Eof => "end of input".to_string(),
            _ => format!("'{}'", self.lexeme),
        }
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.lexeme)
    }
}
