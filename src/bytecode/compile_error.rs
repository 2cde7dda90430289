use crate::frontend::lexer::LexerError;
use crate::frontend::token::Token;

/// A fatal compile-time error. Compilation stops at the first one; the line
/// and column point at the token that triggered it.
#[derive(Debug, Clone)]
pub struct CompileError {
    pub message: String,
    pub line: usize,
    pub col: usize,
}

impl CompileError {
    pub fn new(message: impl Into<String>, line: usize, col: usize) -> Self {
        CompileError {
            message: message.into(),
            line,
            col,
        }
    }

    /// Create an error at the position of `token`.
    pub fn at(token: &Token, message: impl Into<String>) -> Self {
        CompileError::new(message, token.line, token.col)
    }

    /// Create an error for a token that was not what the grammar needed.
    pub fn unexpected(expected: &str, found: &Token) -> Self {
        CompileError::at(
            found,
            format!("expected {}, found {}", expected, found.describe()),
        )
    }

    /// Create an error for a call to a procedure that has not been declared
    /// yet. Declarations are strictly before use; there is no second pass.
    pub fn undeclared_procedure(name: &str, token: &Token) -> Self {
        CompileError::at(token, format!("call to undeclared procedure '{}'", name))
    }

    pub fn undeclared_native(name: &str, token: &Token) -> Self {
        CompileError::at(token, format!("reference to undeclared native '{}'", name))
    }

    pub fn duplicate_overload(name: &str, token: &Token) -> Self {
        CompileError::at(
            token,
            format!("an overload of '{}' with this signature already exists", name),
        )
    }

    /// Create an error for a capture body that breaks the capture rules.
    pub fn malformed_capture(detail: &str, line: usize, col: usize) -> Self {
        CompileError::new(format!("malformed capture: {}", detail), line, col)
    }

    pub fn call_without_capture(name: &str, token: &Token) -> Self {
        CompileError::at(
            token,
            format!("call to '{}' must be immediately preceded by a capture", name),
        )
    }

    pub fn no_matching_overload(name: &str, token: &Token) -> Self {
        CompileError::at(
            token,
            format!("no overload of '{}' matches the captured argument kinds", name),
        )
    }

    pub fn no_overload_arity(name: &str, count: usize, token: &Token) -> Self {
        CompileError::at(
            token,
            format!("no overload of '{}' takes {} argument(s)", name, count),
        )
    }

    pub fn ambiguous_call(name: &str, count: usize, token: &Token) -> Self {
        CompileError::at(
            token,
            format!(
                "cannot statically resolve call to '{}': multiple overloads take {} argument(s)",
                name, count
            ),
        )
    }

    pub fn top_level_only(what: &str, token: &Token) -> Self {
        CompileError::at(token, format!("'{}' is only allowed at the top level", what))
    }
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}: {}", self.line, self.col, self.message)
    }
}

impl std::error::Error for CompileError {}

impl From<LexerError> for CompileError {
    fn from(e: LexerError) -> Self {
        CompileError {
            message: e.message,
            line: e.line,
            col: e.col,
        }
    }
}
