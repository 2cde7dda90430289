/// An error raised while executing bytecode.
///
/// The VM decorates every error with the opcode and code offset it was
/// raised at, and non-internal errors additionally carry a rendered call
/// stack trace. Internal errors (corrupt bytecode, a missing entry point)
/// describe states a compiled program cannot reach, so they skip the trace.
#[derive(Debug)]
pub struct RuntimeError {
    pub message: String,
    pub opcode: Option<&'static str>,
    pub offset: Option<usize>,
    pub trace: Option<String>,
    pub internal: bool,
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "runtime error: {}", self.message)?;
        if let (Some(opcode), Some(offset)) = (self.opcode, self.offset) {
            write!(f, "\n  at {} (offset {})", opcode, offset)?;
        }
        if let Some(trace) = &self.trace {
            write!(f, "\n{}", trace)?;
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {}

impl RuntimeError {
    pub fn new(message: impl Into<String>) -> Self {
        RuntimeError {
            message: message.into(),
            opcode: None,
            offset: None,
            trace: None,
            internal: false,
        }
    }

    /// For states a well-formed program cannot produce.
    pub fn internal(message: impl Into<String>) -> Self {
        RuntimeError {
            internal: true,
            ..RuntimeError::new(message)
        }
    }

    pub fn with_location(mut self, opcode: &'static str, offset: usize) -> Self {
        self.opcode = Some(opcode);
        self.offset = Some(offset);
        self
    }

    pub fn with_trace(mut self, trace: String) -> Self {
        self.trace = Some(trace);
        self
    }
}

pub fn stack_underflow() -> RuntimeError {
    RuntimeError::new("stack underflow")
}

pub fn type_error(expected: &str, got: &str) -> RuntimeError {
    RuntimeError::new(format!("expected {}, got {}", expected, got))
}

pub fn division_by_zero() -> RuntimeError {
    RuntimeError::new("division by zero")
}
