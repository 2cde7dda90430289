use crate::bytecode::op::Word;
use crate::lang::value::{Value, ValueKind};
use crate::runtime::runtime_error::RuntimeError;
use crate::runtime::vm::Vm;
use serde::{Deserialize, Serialize};
use std::rc::Rc;

/// Bumped whenever the instruction set or this layout changes shape; a cached
/// program compiled under a different version is refused on load.
pub const BYTECODE_VERSION: u32 = 1;

/// A compiled eso program: one flat code array plus the pools it indexes
/// into. This is the unit the VM executes and the `.esoc` cache stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    pub version: u32,

    /// Flat instruction stream. Opcodes and operands interleave; offsets in
    /// jump operands and `ProcedureDef::start` index into this array.
    pub code: Vec<Word>,

    /// Literal pool, appended in compilation order. Not de-duplicated.
    pub literals: Vec<Rc<Value>>,

    /// Identifier pool for binding names. De-duplicated on insert.
    pub identifiers: Vec<String>,

    /// Procedures in declaration order, each with its overloads in
    /// declaration order. `Call` operands index into this table.
    pub procedures: Vec<(String, Vec<ProcedureDef>)>,

    /// Native functions in registry order. Not serialized; after loading a
    /// cached program the registry is installed again in the same order.
    #[serde(skip)]
    pub natives: Vec<(String, NativeDef)>,
}

/// One overload of a procedure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcedureDef {
    /// Offset of the first instruction of the body.
    pub start: usize,
    /// Parameters in declaration order.
    pub params: Vec<(String, ValueKind)>,
    /// Declared return kinds; empty means `void`.
    pub returns: Vec<ValueKind>,
}

impl ProcedureDef {
    pub fn param_kinds(&self) -> impl Iterator<Item = ValueKind> + '_ {
        self.params.iter().map(|(_, kind)| *kind)
    }
}

pub type NativeFn = fn(&mut Vm) -> Result<(), RuntimeError>;

/// A registered native. The parameter kinds are informational (they show up
/// in the disassembly); natives work on the stack directly and the VM does
/// not check them.
#[derive(Debug, Clone)]
pub struct NativeDef {
    pub func: NativeFn,
    pub params: Vec<ValueKind>,
}

impl Program {
    pub fn new() -> Self {
        Program {
            version: BYTECODE_VERSION,
            code: Vec::new(),
            literals: Vec::new(),
            identifiers: Vec::new(),
            procedures: Vec::new(),
            natives: Vec::new(),
        }
    }

    /// Appends a literal and returns its pool index.
    pub fn add_literal(&mut self, value: Value) -> usize {
        self.literals.push(Rc::new(value));
        self.literals.len() - 1
    }

    /// Returns the pool index for `name`, inserting it if new.
    pub fn intern_identifier(&mut self, name: &str) -> usize {
        if let Some(idx) = self.identifiers.iter().position(|s| s == name) {
            return idx;
        }
        self.identifiers.push(name.to_string());
        self.identifiers.len() - 1
    }

    pub fn find_procedure(&self, name: &str) -> Option<(usize, &[ProcedureDef])> {
        self.procedures
            .iter()
            .position(|(n, _)| n == name)
            .map(|idx| (idx, self.procedures[idx].1.as_slice()))
    }

    pub fn find_native(&self, name: &str) -> Option<usize> {
        self.natives.iter().position(|(n, _)| n == name)
    }

    /// Serializes for the `.esoc` cache.
    pub fn to_bytes(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    /// Deserializes a `.esoc` image. The native table comes back empty; the
    /// caller reinstalls the registry before running.
    pub fn from_bytes(bytes: &[u8]) -> Result<Program, LoadError> {
        let program: Program = postcard::from_bytes(bytes).map_err(LoadError::Decode)?;
        if program.version != BYTECODE_VERSION {
            return Err(LoadError::VersionMismatch {
                found: program.version,
                expected: BYTECODE_VERSION,
            });
        }
        Ok(program)
    }
}

impl Default for Program {
    fn default() -> Self {
        Program::new()
    }
}

#[derive(Debug)]
pub enum LoadError {
    Decode(postcard::Error),
    VersionMismatch { found: u32, expected: u32 },
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadError::Decode(e) => write!(f, "not a valid compiled program: {}", e),
            LoadError::VersionMismatch { found, expected } => write!(
                f,
                "compiled with bytecode version {}, this build expects {}",
                found, expected
            ),
        }
    }
}

impl std::error::Error for LoadError {}
