// =============================================================================
// Opcode - flat bytecode instruction set
// =============================================================================

/// One slot of the code array. Opcodes and their operands share this type.
pub type Word = usize;

/// A bytecode instruction. Each opcode occupies one code word; its operands,
/// if any, follow inline (variable-width encoding, no fixed instruction
/// size). Jump operands are absolute code offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum Opcode {
    Halt = 0,

    // literals & plain stack ops
    PushLit = 1, // ( -- v )  operand: literal index
    Drop = 2,
    Dup = 3,
    Swap = 4,
    Rot = 5, // ( a b c -- b c a )
    Not = 6,

    // I/O
    Print = 7,   // ( v -- )
    Println = 8, // ( v -- )

    // arithmetic
    Add = 9,
    Sub = 10,
    Mul = 11,
    Div = 12,
    Mod = 13,

    // comparison
    Greater = 14,
    Less = 15,
    GreaterEq = 16,
    LessEq = 17,
    Equal = 18,

    // logic
    Or = 19,
    And = 20,

    // control flow
    /// Unconditional jump. Operand: absolute target offset.
    Jump = 21,
    /// Pop a bool, jump to the operand offset if it is false.
    JumpFalse = 22,
    /// Loop pretest. Same dispatch as `JumpFalse`; kept distinct so the
    /// disassembly reads like the source.
    LoopJump = 23,

    // bindings
    // Operands: a name count n, then n identifier-pool indexes. The bind
    // family pops one value per name; the rightmost name takes the top of
    // the stack.
    Bind = 24,
    BindStrict = 25,
    BindParam = 26,
    Unbind = 27,
    LoadBinding = 28, // ( -- v )  operand: identifier index

    // captures & calls
    Capture = 29, // ( v1 .. vn -- cap )  operand: element count
    Call = 30,    // ( cap -- results.. )  operands: procedure index, overload index
    NativeCall = 31, // operand: native index
    Return = 32,     // ( -- results.. )  operand: overload index
}

impl Opcode {
    /// Decodes a code word. Returns `None` for words that are not a valid
    /// opcode, which the VM reports as corrupt code instead of panicking.
    pub fn from_word(word: Word) -> Option<Opcode> {
        match word {
            0 => Some(Opcode::Halt),
            1 => Some(Opcode::PushLit),
            2 => Some(Opcode::Drop),
            3 => Some(Opcode::Dup),
            4 => Some(Opcode::Swap),
            5 => Some(Opcode::Rot),
            6 => Some(Opcode::Not),
            7 => Some(Opcode::Print),
            8 => Some(Opcode::Println),
            9 => Some(Opcode::Add),
            10 => Some(Opcode::Sub),
            11 => Some(Opcode::Mul),
            12 => Some(Opcode::Div),
            13 => Some(Opcode::Mod),
            14 => Some(Opcode::Greater),
            15 => Some(Opcode::Less),
            16 => Some(Opcode::GreaterEq),
            17 => Some(Opcode::LessEq),
            18 => Some(Opcode::Equal),
            19 => Some(Opcode::Or),
            20 => Some(Opcode::And),
            21 => Some(Opcode::Jump),
            22 => Some(Opcode::JumpFalse),
            23 => Some(Opcode::LoopJump),
            24 => Some(Opcode::Bind),
            25 => Some(Opcode::BindStrict),
            26 => Some(Opcode::BindParam),
            27 => Some(Opcode::Unbind),
            28 => Some(Opcode::LoadBinding),
            29 => Some(Opcode::Capture),
            30 => Some(Opcode::Call),
            31 => Some(Opcode::NativeCall),
            32 => Some(Opcode::Return),
            _ => None,
        }
    }

    /// Uppercase mnemonic used by the disassembler and runtime errors.
    pub fn name(self) -> &'static str {
        match self {
            Opcode::Halt => "HALT",
            Opcode::PushLit => "PUSH_LIT",
            Opcode::Drop => "DROP",
            Opcode::Dup => "DUP",
            Opcode::Swap => "SWAP",
            Opcode::Rot => "ROT",
            Opcode::Not => "NOT",
            Opcode::Print => "PRINT",
            Opcode::Println => "PRINTLN",
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::Mul => "MUL",
            Opcode::Div => "DIV",
            Opcode::Mod => "MOD",
            Opcode::Greater => "GT",
            Opcode::Less => "LT",
            Opcode::GreaterEq => "GE",
            Opcode::LessEq => "LE",
            Opcode::Equal => "EQ",
            Opcode::Or => "OR",
            Opcode::And => "AND",
            Opcode::Jump => "JUMP",
            Opcode::JumpFalse => "JUMP_FALSE",
            Opcode::LoopJump => "LOOP_JUMP",
            Opcode::Bind => "BIND",
            Opcode::BindStrict => "BIND_STRICT",
            Opcode::BindParam => "BIND_PARAM",
            Opcode::Unbind => "UNBIND",
            Opcode::LoadBinding => "LOAD",
            Opcode::Capture => "CAPTURE",
            Opcode::Call => "CALL",
            Opcode::NativeCall => "NATIVE",
            Opcode::Return => "RETURN",
        }
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
