use crate::bytecode::program::ProcedureDef;
use crate::bytecode::{Opcode, Program};

/// Print a full program listing: constant pools, natives, and the code
/// walk with procedure entry labels.
pub fn print_program(program: &Program) {
    println!("════════════════════════════════════════");
    println!(" {} words of code", program.code.len());
    println!("════════════════════════════════════════");

    if !program.literals.is_empty() {
        println!("literals:");
        for (i, value) in program.literals.iter().enumerate() {
            println!("  [{}] {}", i, value.repr());
        }
    }
    if !program.identifiers.is_empty() {
        println!("identifiers:");
        for (i, name) in program.identifiers.iter().enumerate() {
            println!("  [{}] {}", i, name);
        }
    }
    if !program.natives.is_empty() {
        println!("natives:");
        for (i, (name, def)) in program.natives.iter().enumerate() {
            let kinds: Vec<String> = def.params.iter().map(|k| k.to_string()).collect();
            println!("  [{}] {}({})", i, name, kinds.join(", "));
        }
    }

    println!("{}", disassemble_to_string(program));
}

/// Return the code listing as a String.
pub fn disassemble_to_string(program: &Program) -> String {
    let mut out = String::new();
    let targets = jump_targets(program);

    let mut labels: Vec<(usize, String)> = Vec::new();
    for (name, overloads) in &program.procedures {
        for def in overloads {
            labels.push((def.start, signature(name, def)));
        }
    }

    let mut at = 0;
    while at < program.code.len() {
        for (start, sig) in &labels {
            if *start == at {
                out.push_str(&format!("\n{}:\n", sig));
            }
        }

        let marker = if targets.contains(&at) { "► " } else { "  " };
        match Opcode::from_word(program.code[at]) {
            Some(op) => {
                out.push_str(&format!(
                    "{:04} {}{}\n",
                    at,
                    marker,
                    render_instruction(program, at, op)
                ));
                at = at.saturating_add(instruction_width(program, at));
            }
            None => {
                // keep walking on corrupt input; the VM will report it
                out.push_str(&format!("{:04} {}?? {}\n", at, marker, program.code[at]));
                at += 1;
            }
        }
    }
    out
}

fn render_instruction(program: &Program, at: usize, op: Opcode) -> String {
    let operand = |i: usize| program.code.get(at + i).copied();
    match op {
        Opcode::PushLit => match operand(1).and_then(|idx| program.literals.get(idx)) {
            Some(value) => format!("{:<12}{}", op.name(), value.repr()),
            None => format!("{:<12}<bad literal index>", op.name()),
        },
        Opcode::LoadBinding => {
            format!("{:<12}{}", op.name(), identifier_at(program, operand(1)))
        }
        Opcode::Jump | Opcode::JumpFalse | Opcode::LoopJump => match operand(1) {
            Some(target) => format!("{:<12}-> {:04}", op.name(), target),
            None => format!("{:<12}-> ????", op.name()),
        },
        Opcode::Bind | Opcode::BindStrict | Opcode::BindParam | Opcode::Unbind => {
            // cap a corrupt count at the words actually present
            let count = operand(1)
                .unwrap_or(0)
                .min(program.code.len().saturating_sub(at + 2));
            let names: Vec<String> = (0..count)
                .map(|i| identifier_at(program, operand(2 + i)))
                .collect();
            format!("{:<12}{}", op.name(), names.join(", "))
        }
        Opcode::Capture | Opcode::Return => {
            format!("{:<12}{}", op.name(), operand(1).unwrap_or(0))
        }
        Opcode::Call => match operand(1).and_then(|p| program.procedures.get(p)) {
            Some((name, defs)) => {
                let params = operand(2)
                    .and_then(|o| defs.get(o))
                    .map(param_list)
                    .unwrap_or_else(|| "?".to_string());
                format!("{:<12}{}({})", op.name(), name, params)
            }
            None => format!("{:<12}<bad procedure index>", op.name()),
        },
        Opcode::NativeCall => match operand(1).and_then(|idx| program.natives.get(idx)) {
            Some((name, _)) => format!("{:<12}@{}", op.name(), name),
            None => format!("{:<12}<bad native index>", op.name()),
        },
        _ => op.name().to_string(),
    }
}

fn jump_targets(program: &Program) -> Vec<usize> {
    let mut targets = Vec::new();
    let mut at = 0;
    while at < program.code.len() {
        match Opcode::from_word(program.code[at]) {
            Some(op) => {
                if matches!(op, Opcode::Jump | Opcode::JumpFalse | Opcode::LoopJump) {
                    if let Some(&target) = program.code.get(at + 1) {
                        if !targets.contains(&target) {
                            targets.push(target);
                        }
                    }
                }
                at = at.saturating_add(instruction_width(program, at));
            }
            None => at += 1,
        }
    }
    targets
}

fn instruction_width(program: &Program, at: usize) -> usize {
    match Opcode::from_word(program.code[at]) {
        Some(Opcode::Bind | Opcode::BindStrict | Opcode::BindParam | Opcode::Unbind) => {
            program.code.get(at + 1).copied().unwrap_or(0).saturating_add(2)
        }
        Some(Opcode::Call) => 3,
        Some(
            Opcode::PushLit
            | Opcode::Jump
            | Opcode::JumpFalse
            | Opcode::LoopJump
            | Opcode::LoadBinding
            | Opcode::Capture
            | Opcode::NativeCall
            | Opcode::Return,
        ) => 2,
        _ => 1,
    }
}

fn identifier_at(program: &Program, idx: Option<usize>) -> String {
    idx.and_then(|i| program.identifiers.get(i))
        .cloned()
        .unwrap_or_else(|| "?".to_string())
}

fn param_list(def: &ProcedureDef) -> String {
    let parts: Vec<String> = def
        .params
        .iter()
        .map(|(name, kind)| format!("{}: {}", name, kind))
        .collect();
    parts.join(", ")
}

fn signature(name: &str, def: &ProcedureDef) -> String {
    let returns = if def.returns.is_empty() {
        "void".to_string()
    } else {
        let parts: Vec<String> = def.returns.iter().map(|k| k.to_string()).collect();
        parts.join(", ")
    };
    format!("{}({}) -> {}", name, param_list(def), returns)
}
