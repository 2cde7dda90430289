use serde::{Deserialize, Serialize};
use std::rc::Rc;

/// Runtime value in the eso language.
///
/// Values live on the operand stack behind `Rc` and are never mutated in
/// place; every operation that "changes" a value pushes a fresh one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// 64-bit signed integer.
    Int(i64),

    /// 32-bit floating-point number.
    Float(f32),

    /// Boolean value.
    Bool(bool),

    /// UTF-8 string value: `'hello'`.
    String(String),

    /// Fixed-length aggregate of values: `|1 2 3|`.
    ///
    /// Captures are how arguments reach procedures. A call pops one capture
    /// and spreads its elements onto the callee's stack region.
    Capture(Vec<Rc<Value>>),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::Bool(_) => ValueKind::Bool,
            Value::String(_) => ValueKind::String,
            Value::Capture(_) => ValueKind::Capture,
        }
    }

    /// Format a value the way the disassembler and stack dumps show it:
    /// like `Display`, but strings keep their quotes.
    pub fn repr(&self) -> String {
        match self {
            Value::String(s) => format!("'{}'", s),
            Value::Capture(items) => {
                let rendered: Vec<String> = items.iter().map(|v| v.repr()).collect();
                format!("|{}|", rendered.join(" "))
            }
            other => other.to_string(),
        }
    }
}

impl std::fmt::Display for Value {
    /// Format a value using eso surface syntax. Strings print bare, which is
    /// what `print` and `println` rely on.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(n) => write!(f, "{}", n),
            Value::Bool(b) => write!(f, "{}", b),
            Value::String(s) => write!(f, "{}", s),
            Value::Capture(items) => {
                write!(f, "|")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "|")
            }
        }
    }
}

/// The kind of a value, without its payload. Used for procedure signatures,
/// overload resolution, and type errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueKind {
    Int,
    Float,
    Bool,
    String,
    Capture,
}

impl ValueKind {
    pub fn name(self) -> &'static str {
        match self {
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::Bool => "bool",
            ValueKind::String => "string",
            ValueKind::Capture => "capture",
        }
    }

    /// Parses a surface type name. `void` is not a value kind; procedure
    /// headers handle it separately.
    pub fn from_name(name: &str) -> Option<ValueKind> {
        match name {
            "int" => Some(ValueKind::Int),
            "float" => Some(ValueKind::Float),
            "bool" => Some(ValueKind::Bool),
            "string" => Some(ValueKind::String),
            "capture" => Some(ValueKind::Capture),
            _ => None,
        }
    }
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
