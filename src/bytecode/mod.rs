pub mod compile;
pub mod compile_error;
pub mod disasm;
pub mod op;
pub mod program;

pub use op::{Opcode, Word};
pub use program::Program;
