//! The bytecode interpreter.
//!
//! Execution walks a flat word array. Most instructions work on the operand
//! stack of shared values; calls push frames that fence off the caller's
//! portion of that stack and hold the frame's name bindings.

use crate::bytecode::Program;
use crate::bytecode::op::Opcode;
use crate::lang::value::Value;
use crate::runtime::runtime_error::{self, RuntimeError};
use std::collections::HashMap;
use std::rc::Rc;

/// Execution limits. The defaults match ordinary programs; tests tighten
/// them to observe the failure paths.
#[derive(Debug, Clone)]
pub struct VmConfig {
    pub max_call_depth: usize,
    /// Instruction budget; `None` runs without one.
    pub max_steps: Option<usize>,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            max_call_depth: 1000,
            max_steps: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BindingFlag {
    Plain,
    Strict,
    Param,
}

#[derive(Debug)]
struct Binding {
    flag: BindingFlag,
    value: Rc<Value>,
}

/// One live procedure activation.
struct CallFrame {
    name: String,
    return_ip: usize,
    /// The callee may not pop below this stack index.
    stack_start: usize,
    bindings: HashMap<String, Binding>,
}

pub struct Vm {
    program: Program,
    stack: Vec<Rc<Value>>,
    frames: Vec<CallFrame>,
    ip: usize,
    argv: Vec<String>,
    config: VmConfig,
    steps: usize,
    halted: bool,
}

impl Vm {
    pub fn new(program: Program) -> Self {
        Vm::with_config(program, VmConfig::default())
    }

    pub fn with_config(program: Program, config: VmConfig) -> Self {
        Vm {
            program,
            stack: Vec::new(),
            frames: Vec::new(),
            ip: 0,
            argv: Vec::new(),
            config,
            steps: 0,
            halted: false,
        }
    }

    /// Arguments exposed to the program through the `argv`/`argc` natives.
    pub fn set_argv(&mut self, argv: Vec<String>) {
        self.argv = argv;
    }

    /// Runs the program's `main` procedure to completion.
    pub fn run(&mut self) -> Result<(), RuntimeError> {
        // a decoded image may carry a procedure entry with no overloads
        let start = match self.program.find_procedure("main") {
            Some((_, overloads)) => overloads
                .first()
                .ok_or_else(|| RuntimeError::internal("'main' has no overloads"))?
                .start,
            None => return Err(RuntimeError::internal("program has no 'main' procedure")),
        };
        self.frames.push(CallFrame {
            name: "main".to_string(),
            return_ip: self.program.code.len(),
            stack_start: 0,
            bindings: HashMap::new(),
        });
        self.ip = start;
        self.exec()
    }

    fn exec(&mut self) -> Result<(), RuntimeError> {
        while self.ip < self.program.code.len() && !self.halted {
            let at = self.ip;
            let word = self.program.code[at];
            let Some(op) = Opcode::from_word(word) else {
                return Err(RuntimeError::internal(format!(
                    "invalid opcode {} at offset {}",
                    word, at
                )));
            };

            if let Some(limit) = self.config.max_steps {
                if self.steps >= limit {
                    let e = RuntimeError::new(format!("step limit exceeded ({})", limit));
                    return Err(self.annotate(e, op, at));
                }
            }
            self.steps += 1;

            // advance past the whole instruction first; jumps, calls and
            // returns overwrite the ip afterwards
            match self.next_ip(op, at) {
                Ok(next) => self.ip = next,
                Err(e) => return Err(self.annotate(e, op, at)),
            }

            if let Err(e) = self.step(op, at) {
                return Err(self.annotate(e, op, at));
            }
        }
        Ok(())
    }

    /// Attach the faulting instruction, and for errors a program can
    /// actually cause, the call stack.
    fn annotate(&self, e: RuntimeError, op: Opcode, at: usize) -> RuntimeError {
        let e = e.with_location(op.name(), at);
        if e.internal {
            e
        } else {
            let trace = self.render_trace();
            e.with_trace(trace)
        }
    }

    /// Offset of the instruction after the one at `at`, operands included.
    /// A count operand large enough to overflow the span is corrupt code.
    fn next_ip(&self, op: Opcode, at: usize) -> Result<usize, RuntimeError> {
        let width = match op {
            Opcode::Bind | Opcode::BindStrict | Opcode::BindParam | Opcode::Unbind => {
                let count = self.operand(at + 1)?;
                count.checked_add(2).ok_or_else(|| {
                    RuntimeError::internal(format!("corrupt name count {}", count))
                })?
            }
            Opcode::Call => 3,
            Opcode::PushLit
            | Opcode::Jump
            | Opcode::JumpFalse
            | Opcode::LoopJump
            | Opcode::LoadBinding
            | Opcode::Capture
            | Opcode::NativeCall
            | Opcode::Return => 2,
            _ => 1,
        };
        at.checked_add(width)
            .ok_or_else(|| RuntimeError::internal("corrupt instruction width"))
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    fn step(&mut self, op: Opcode, at: usize) -> Result<(), RuntimeError> {
        match op {
            Opcode::Halt => {
                if self.visible_len() > 0 {
                    return Err(RuntimeError::new(format!(
                        "halting with {} value(s) on the stack",
                        self.visible_len()
                    )));
                }
                self.halted = true;
                Ok(())
            }

            Opcode::PushLit => {
                let idx = self.operand(at + 1)?;
                let value = self.program.literals.get(idx).cloned().ok_or_else(|| {
                    RuntimeError::internal(format!("literal index {} out of range", idx))
                })?;
                self.stack.push(value);
                Ok(())
            }

            Opcode::Drop => {
                self.pop()?;
                Ok(())
            }
            Opcode::Dup => {
                let v = self.pop()?;
                self.stack.push(Rc::clone(&v));
                self.stack.push(v);
                Ok(())
            }
            Opcode::Swap => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.stack.push(b);
                self.stack.push(a);
                Ok(())
            }
            Opcode::Rot => {
                // ( a b c -- b c a )
                let c = self.pop()?;
                let b = self.pop()?;
                let a = self.pop()?;
                self.stack.push(b);
                self.stack.push(c);
                self.stack.push(a);
                Ok(())
            }

            Opcode::Not => {
                let v = self.pop_bool()?;
                self.stack.push(Rc::new(Value::Bool(!v)));
                Ok(())
            }

            Opcode::Print => {
                let v = self.pop()?;
                print!("{}", v);
                Ok(())
            }
            Opcode::Println => {
                let v = self.pop()?;
                println!("{}", v);
                Ok(())
            }

            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Mod => self.arith(op),

            Opcode::Greater
            | Opcode::Less
            | Opcode::GreaterEq
            | Opcode::LessEq
            | Opcode::Equal => self.compare(op),

            Opcode::Or | Opcode::And => self.logic(op),

            Opcode::Jump => {
                self.ip = self.operand(at + 1)?;
                Ok(())
            }
            Opcode::JumpFalse | Opcode::LoopJump => {
                let target = self.operand(at + 1)?;
                if !self.pop_bool()? {
                    self.ip = target;
                }
                Ok(())
            }

            Opcode::Bind | Opcode::BindStrict | Opcode::BindParam => {
                let count = self.operand(at + 1)?;
                let flag = match op {
                    Opcode::BindStrict => BindingFlag::Strict,
                    Opcode::BindParam => BindingFlag::Param,
                    _ => BindingFlag::Plain,
                };
                // rightmost name takes the top of the stack
                for i in (0..count).rev() {
                    let name = self.identifier(at + 2 + i)?;
                    let value = self.pop()?;
                    self.bind_value(name, flag, value)?;
                }
                Ok(())
            }

            Opcode::Unbind => {
                let count = self.operand(at + 1)?;
                for i in 0..count {
                    let name = self.identifier(at + 2 + i)?;
                    self.unbind_value(&name)?;
                }
                Ok(())
            }

            Opcode::LoadBinding => {
                let name = self.identifier(at + 1)?;
                let value = self
                    .frame()?
                    .bindings
                    .get(&name)
                    .map(|b| Rc::clone(&b.value));
                match value {
                    Some(v) => {
                        self.stack.push(v);
                        Ok(())
                    }
                    None => Err(RuntimeError::new(format!("unbound name '{}'", name))),
                }
            }

            Opcode::Capture => {
                let count = self.operand(at + 1)?;
                if self.visible_len() < count {
                    return Err(runtime_error::stack_underflow());
                }
                let split = self.stack.len() - count;
                let elems = self.stack.split_off(split);
                self.stack.push(Rc::new(Value::Capture(elems)));
                Ok(())
            }

            Opcode::Call => {
                if self.frames.len() >= self.config.max_call_depth {
                    return Err(RuntimeError::new(format!(
                        "call depth limit exceeded ({})",
                        self.config.max_call_depth
                    )));
                }
                let proc_idx = self.operand(at + 1)?;
                let overload_idx = self.operand(at + 2)?;
                let (name, start) = {
                    let (name, overloads) =
                        self.program.procedures.get(proc_idx).ok_or_else(|| {
                            RuntimeError::internal(format!(
                                "procedure index {} out of range",
                                proc_idx
                            ))
                        })?;
                    let def = overloads.get(overload_idx).ok_or_else(|| {
                        RuntimeError::internal(format!(
                            "overload index {} out of range",
                            overload_idx
                        ))
                    })?;
                    (name.clone(), def.start)
                };

                let capture = self.pop()?;
                let elems = match capture.as_ref() {
                    Value::Capture(elems) => elems.clone(),
                    other => {
                        return Err(runtime_error::type_error("capture", other.kind().name()));
                    }
                };
                let argc = elems.len();
                self.stack.extend(elems);
                let stack_start = self.stack.len() - argc;

                self.frames.push(CallFrame {
                    name,
                    return_ip: self.ip, // already past the call
                    stack_start,
                    bindings: HashMap::new(),
                });
                self.ip = start;
                Ok(())
            }

            Opcode::NativeCall => {
                let idx = self.operand(at + 1)?;
                let func = self
                    .program
                    .natives
                    .get(idx)
                    .map(|(_, def)| def.func)
                    .ok_or_else(|| {
                        RuntimeError::internal(format!("native index {} out of range", idx))
                    })?;
                func(self)
            }

            Opcode::Return => {
                if self.frames.len() <= 1 {
                    return Err(RuntimeError::new("return with no enclosing call"));
                }
                let overload_idx = self.operand(at + 1)?;
                // checked before the frame pops so the trace still shows it
                let (produced, name, return_ip) = {
                    let frame = self.frame()?;
                    (
                        self.stack.len() - frame.stack_start,
                        frame.name.clone(),
                        frame.return_ip,
                    )
                };
                let declared = self
                    .program
                    .find_procedure(&name)
                    .and_then(|(_, overloads)| overloads.get(overload_idx))
                    .map(|def| def.returns.len())
                    .ok_or_else(|| {
                        RuntimeError::internal(format!(
                            "return from unknown overload {} of '{}'",
                            overload_idx, name
                        ))
                    })?;
                if produced != declared {
                    return Err(RuntimeError::new(format!(
                        "procedure '{}' returned {} value(s), expected {}",
                        name, produced, declared
                    )));
                }
                self.frames.pop();
                self.ip = return_ip;
                Ok(())
            }
        }
    }

    // =========================================================================
    // Arithmetic, comparison, logic
    // =========================================================================

    fn arith(&mut self, op: Opcode) -> Result<(), RuntimeError> {
        let b = self.pop()?;
        let a = self.pop()?;
        let result = match (a.as_ref(), b.as_ref()) {
            (Value::Int(x), Value::Int(y)) => Value::Int(int_arith(op, *x, *y)?),
            (Value::Float(x), Value::Float(y)) => Value::Float(float_arith(op, *x, *y)),
            (Value::Int(x), Value::Float(y)) => Value::Float(float_arith(op, *x as f32, *y)),
            (Value::Float(x), Value::Int(y)) => Value::Float(float_arith(op, *x, *y as f32)),
            (Value::String(x), Value::String(y)) if op == Opcode::Add => {
                let mut s = String::with_capacity(x.len() + y.len());
                s.push_str(x);
                s.push_str(y);
                Value::String(s)
            }
            _ => {
                return Err(RuntimeError::new(format!(
                    "cannot {} {} and {}",
                    arith_verb(op),
                    a.kind(),
                    b.kind()
                )));
            }
        };
        self.stack.push(Rc::new(result));
        Ok(())
    }

    fn compare(&mut self, op: Opcode) -> Result<(), RuntimeError> {
        let b = self.pop()?;
        let a = self.pop()?;
        let result = match (a.as_ref(), b.as_ref()) {
            (Value::Int(x), Value::Int(y)) => int_compare(op, *x, *y),
            (Value::Float(x), Value::Float(y)) => float_compare(op, *x, *y),
            // strings compare by byte length; content equality is @str_cmp
            (Value::String(x), Value::String(y)) => length_compare(op, x.len(), y.len()),
            (Value::Bool(x), Value::Bool(y)) if op == Opcode::Equal => x == y,
            _ => {
                return Err(RuntimeError::new(format!(
                    "cannot compare {} and {}",
                    a.kind(),
                    b.kind()
                )));
            }
        };
        self.stack.push(Rc::new(Value::Bool(result)));
        Ok(())
    }

    fn logic(&mut self, op: Opcode) -> Result<(), RuntimeError> {
        let b = self.pop_bool()?;
        let a = self.pop_bool()?;
        let result = if op == Opcode::Or { a || b } else { a && b };
        self.stack.push(Rc::new(Value::Bool(result)));
        Ok(())
    }

    // =========================================================================
    // Bindings
    // =========================================================================

    fn bind_value(
        &mut self,
        name: String,
        flag: BindingFlag,
        value: Rc<Value>,
    ) -> Result<(), RuntimeError> {
        let frame = self.frame_mut()?;
        if let Some(existing) = frame.bindings.get(&name) {
            match existing.flag {
                BindingFlag::Strict => {
                    return Err(RuntimeError::new(format!(
                        "cannot rebind strict binding '{}'",
                        name
                    )));
                }
                BindingFlag::Param => {
                    return Err(RuntimeError::new(format!(
                        "cannot rebind parameter '{}'",
                        name
                    )));
                }
                BindingFlag::Plain => {}
            }
        }
        frame.bindings.insert(name, Binding { flag, value });
        Ok(())
    }

    fn unbind_value(&mut self, name: &str) -> Result<(), RuntimeError> {
        let frame = self.frame_mut()?;
        match frame.bindings.get(name) {
            None => Err(RuntimeError::new(format!(
                "unbind of unbound name '{}'",
                name
            ))),
            Some(b) if b.flag == BindingFlag::Strict => Err(RuntimeError::new(format!(
                "cannot unbind strict binding '{}'",
                name
            ))),
            Some(b) if b.flag == BindingFlag::Param => Err(RuntimeError::new(format!(
                "cannot unbind parameter '{}'",
                name
            ))),
            Some(_) => {
                frame.bindings.remove(name);
                Ok(())
            }
        }
    }

    // =========================================================================
    // Stack access (also the native call interface)
    // =========================================================================

    pub fn push(&mut self, value: Value) {
        self.stack.push(Rc::new(value));
    }

    pub fn push_rc(&mut self, value: Rc<Value>) {
        self.stack.push(value);
    }

    /// Pops the top value. The current frame's floor is a hard boundary:
    /// a callee cannot pop its caller's values.
    pub fn pop(&mut self) -> Result<Rc<Value>, RuntimeError> {
        if self.stack.len() <= self.floor() {
            return Err(runtime_error::stack_underflow());
        }
        match self.stack.pop() {
            Some(v) => Ok(v),
            None => Err(runtime_error::stack_underflow()),
        }
    }

    /// Reads `depth` values down from the top without popping.
    pub fn peek(&self, depth: usize) -> Result<Rc<Value>, RuntimeError> {
        if depth >= self.visible_len() {
            return Err(runtime_error::stack_underflow());
        }
        Ok(Rc::clone(&self.stack[self.stack.len() - 1 - depth]))
    }

    pub fn pop_int(&mut self) -> Result<i64, RuntimeError> {
        let v = self.pop()?;
        match v.as_ref() {
            Value::Int(n) => Ok(*n),
            other => Err(runtime_error::type_error("int", other.kind().name())),
        }
    }

    pub fn pop_float(&mut self) -> Result<f32, RuntimeError> {
        let v = self.pop()?;
        match v.as_ref() {
            Value::Float(n) => Ok(*n),
            other => Err(runtime_error::type_error("float", other.kind().name())),
        }
    }

    pub fn pop_bool(&mut self) -> Result<bool, RuntimeError> {
        let v = self.pop()?;
        match v.as_ref() {
            Value::Bool(b) => Ok(*b),
            other => Err(runtime_error::type_error("bool", other.kind().name())),
        }
    }

    pub fn pop_string(&mut self) -> Result<String, RuntimeError> {
        let v = self.pop()?;
        match v.as_ref() {
            Value::String(s) => Ok(s.clone()),
            other => Err(runtime_error::type_error("string", other.kind().name())),
        }
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// Stack depth the current frame can see.
    pub fn stack_len(&self) -> usize {
        self.visible_len()
    }

    pub fn global_stack_len(&self) -> usize {
        self.stack.len()
    }

    /// Clears the current frame's portion of the stack.
    pub fn clear_visible(&mut self) {
        let floor = self.floor();
        self.stack.truncate(floor);
    }

    fn floor(&self) -> usize {
        self.frames.last().map_or(0, |f| f.stack_start)
    }

    fn visible_len(&self) -> usize {
        self.stack.len() - self.floor()
    }

    // =========================================================================
    // Frames and operands
    // =========================================================================

    fn frame(&self) -> Result<&CallFrame, RuntimeError> {
        self.frames
            .last()
            .ok_or_else(|| RuntimeError::internal("no active call frame"))
    }

    fn frame_mut(&mut self) -> Result<&mut CallFrame, RuntimeError> {
        self.frames
            .last_mut()
            .ok_or_else(|| RuntimeError::internal("no active call frame"))
    }

    fn operand(&self, at: usize) -> Result<usize, RuntimeError> {
        self.program
            .code
            .get(at)
            .copied()
            .ok_or_else(|| RuntimeError::internal("truncated instruction"))
    }

    fn identifier(&self, at: usize) -> Result<String, RuntimeError> {
        let idx = self.operand(at)?;
        self.program.identifiers.get(idx).cloned().ok_or_else(|| {
            RuntimeError::internal(format!("identifier index {} out of range", idx))
        })
    }

    // =========================================================================
    // Error trace
    // =========================================================================

    /// Renders the live call stack, innermost frame first, with each
    /// frame's slice of the operand stack and its bindings.
    fn render_trace(&self) -> String {
        let mut out = String::from("  call stack (innermost first):");
        let mut top = self.stack.len();
        for frame in self.frames.iter().rev() {
            let start = frame.stack_start.min(top);
            let values: Vec<String> = self.stack[start..top].iter().map(|v| v.repr()).collect();
            out.push_str(&format!("\n    {} [{}]", frame.name, values.join(" ")));

            let mut names: Vec<&String> = frame.bindings.keys().collect();
            names.sort();
            for name in names {
                let binding = &frame.bindings[name];
                let suffix = match binding.flag {
                    BindingFlag::Strict => " (strict)",
                    BindingFlag::Param => " (param)",
                    BindingFlag::Plain => "",
                };
                out.push_str(&format!(
                    "\n      {} = {}{}",
                    name,
                    binding.value.repr(),
                    suffix
                ));
            }
            top = start;
        }
        out
    }
}

#[cfg(test)]
impl Vm {
    /// Executes a raw word sequence inside a synthetic frame; the fragment
    /// ends by falling off the end of the code.
    pub(crate) fn run_raw(program: Program) -> Result<Vm, RuntimeError> {
        let mut vm = Vm::new(program);
        vm.frames.push(CallFrame {
            name: "fragment".to_string(),
            return_ip: vm.program.code.len(),
            stack_start: 0,
            bindings: HashMap::new(),
        });
        vm.ip = 0;
        vm.exec()?;
        Ok(vm)
    }

    pub(crate) fn frame_binding(&self, name: &str) -> Option<Rc<Value>> {
        self.frames
            .last()
            .and_then(|f| f.bindings.get(name))
            .map(|b| Rc::clone(&b.value))
    }

    pub(crate) fn stack_values(&self) -> Vec<Value> {
        self.stack.iter().map(|v| v.as_ref().clone()).collect()
    }
}

fn arith_verb(op: Opcode) -> &'static str {
    match op {
        Opcode::Add => "add",
        Opcode::Sub => "subtract",
        Opcode::Mul => "multiply",
        Opcode::Div => "divide",
        _ => "modulo",
    }
}

fn int_arith(op: Opcode, x: i64, y: i64) -> Result<i64, RuntimeError> {
    Ok(match op {
        Opcode::Add => x.wrapping_add(y),
        Opcode::Sub => x.wrapping_sub(y),
        Opcode::Mul => x.wrapping_mul(y),
        Opcode::Div => {
            if y == 0 {
                return Err(runtime_error::division_by_zero());
            }
            x.wrapping_div(y)
        }
        _ => {
            if y == 0 {
                return Err(runtime_error::division_by_zero());
            }
            x.wrapping_rem(y)
        }
    })
}

fn float_arith(op: Opcode, x: f32, y: f32) -> f32 {
    match op {
        Opcode::Add => x + y,
        Opcode::Sub => x - y,
        Opcode::Mul => x * y,
        Opcode::Div => x / y,
        _ => x % y,
    }
}

fn int_compare(op: Opcode, x: i64, y: i64) -> bool {
    match op {
        Opcode::Greater => x > y,
        Opcode::Less => x < y,
        Opcode::GreaterEq => x >= y,
        Opcode::LessEq => x <= y,
        _ => x == y,
    }
}

// direct operators so NaN compares false everywhere
fn float_compare(op: Opcode, x: f32, y: f32) -> bool {
    match op {
        Opcode::Greater => x > y,
        Opcode::Less => x < y,
        Opcode::GreaterEq => x >= y,
        Opcode::LessEq => x <= y,
        _ => x == y,
    }
}

fn length_compare(op: Opcode, x: usize, y: usize) -> bool {
    match op {
        Opcode::Greater => x > y,
        Opcode::Less => x < y,
        Opcode::GreaterEq => x >= y,
        Opcode::LessEq => x <= y,
        _ => x == y,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::compile::Compiler;
    use crate::bytecode::op::Word;
    use crate::bytecode::program::ProcedureDef;
    use crate::runtime::natives::NativeRegistry;

    fn raw(code: Vec<Word>, literals: Vec<Value>) -> Result<Vm, RuntimeError> {
        let mut program = Program::new();
        program.code = code;
        program.literals = literals.into_iter().map(Rc::new).collect();
        Vm::run_raw(program)
    }

    fn raw_ok(code: Vec<Word>, literals: Vec<Value>) -> Vm {
        match raw(code, literals) {
            Ok(vm) => vm,
            Err(e) => panic!("execution failed: {}", e),
        }
    }

    fn raw_err(code: Vec<Word>, literals: Vec<Value>) -> String {
        match raw(code, literals) {
            Ok(_) => panic!("expected a runtime error"),
            Err(e) => e.to_string(),
        }
    }

    fn binary(op: Opcode, a: Value, b: Value) -> Result<Vm, RuntimeError> {
        raw(
            vec![
                Opcode::PushLit as Word,
                0,
                Opcode::PushLit as Word,
                1,
                op as Word,
            ],
            vec![a, b],
        )
    }

    fn binary_ok(op: Opcode, a: Value, b: Value) -> Value {
        match binary(op, a, b) {
            Ok(vm) => vm.stack_values().pop().unwrap(),
            Err(e) => panic!("execution failed: {}", e),
        }
    }

    fn binary_err(op: Opcode, a: Value, b: Value) -> String {
        match binary(op, a, b) {
            Ok(_) => panic!("expected a runtime error"),
            Err(e) => e.to_string(),
        }
    }

    fn compile(source: &str) -> Program {
        Compiler::new(NativeRegistry::standard())
            .compile_source(source)
            .unwrap()
    }

    // =========================================================================
    // Arithmetic
    // =========================================================================

    #[test]
    fn test_int_arithmetic() {
        assert_eq!(binary_ok(Opcode::Add, Value::Int(2), Value::Int(3)), Value::Int(5));
        assert_eq!(binary_ok(Opcode::Sub, Value::Int(2), Value::Int(3)), Value::Int(-1));
        assert_eq!(binary_ok(Opcode::Mul, Value::Int(4), Value::Int(3)), Value::Int(12));
        assert_eq!(binary_ok(Opcode::Div, Value::Int(7), Value::Int(2)), Value::Int(3));
        assert_eq!(binary_ok(Opcode::Mod, Value::Int(7), Value::Int(2)), Value::Int(1));
    }

    #[test]
    fn test_int_overflow_wraps() {
        assert_eq!(
            binary_ok(Opcode::Add, Value::Int(i64::MAX), Value::Int(1)),
            Value::Int(i64::MIN)
        );
        assert_eq!(
            binary_ok(Opcode::Mul, Value::Int(i64::MAX), Value::Int(2)),
            Value::Int(-2)
        );
    }

    #[test]
    fn test_mixed_arithmetic_promotes_to_float() {
        assert_eq!(
            binary_ok(Opcode::Add, Value::Int(1), Value::Float(2.5)),
            Value::Float(3.5)
        );
        assert_eq!(
            binary_ok(Opcode::Mul, Value::Float(2.0), Value::Int(3)),
            Value::Float(6.0)
        );
    }

    #[test]
    fn test_string_concat() {
        assert_eq!(
            binary_ok(
                Opcode::Add,
                Value::String("ab".to_string()),
                Value::String("cd".to_string())
            ),
            Value::String("abcd".to_string())
        );
    }

    #[test]
    fn test_string_subtraction_is_an_error() {
        let msg = binary_err(
            Opcode::Sub,
            Value::String("ab".to_string()),
            Value::String("cd".to_string()),
        );
        assert!(msg.contains("cannot subtract string and string"), "msg was: {}", msg);
    }

    #[test]
    fn test_division_by_zero() {
        let msg = binary_err(Opcode::Div, Value::Int(1), Value::Int(0));
        assert!(msg.contains("division by zero"), "msg was: {}", msg);
        let msg = binary_err(Opcode::Mod, Value::Int(1), Value::Int(0));
        assert!(msg.contains("division by zero"), "msg was: {}", msg);
    }

    #[test]
    fn test_float_division_by_zero_is_infinite() {
        assert_eq!(
            binary_ok(Opcode::Div, Value::Float(1.0), Value::Float(0.0)),
            Value::Float(f32::INFINITY)
        );
    }

    #[test]
    fn test_float_modulo_is_fmod() {
        assert_eq!(
            binary_ok(Opcode::Mod, Value::Float(7.5), Value::Float(2.0)),
            Value::Float(1.5)
        );
    }

    // =========================================================================
    // Comparison and logic
    // =========================================================================

    #[test]
    fn test_int_comparisons() {
        assert_eq!(binary_ok(Opcode::Less, Value::Int(1), Value::Int(2)), Value::Bool(true));
        assert_eq!(binary_ok(Opcode::Greater, Value::Int(1), Value::Int(2)), Value::Bool(false));
        assert_eq!(binary_ok(Opcode::GreaterEq, Value::Int(2), Value::Int(2)), Value::Bool(true));
        assert_eq!(binary_ok(Opcode::Equal, Value::Int(2), Value::Int(2)), Value::Bool(true));
    }

    #[test]
    fn test_mixed_comparison_is_an_error() {
        let msg = binary_err(Opcode::Less, Value::Int(1), Value::Float(2.0));
        assert!(msg.contains("cannot compare int and float"), "msg was: {}", msg);
    }

    #[test]
    fn test_strings_compare_by_length() {
        assert_eq!(
            binary_ok(
                Opcode::Less,
                Value::String("ab".to_string()),
                Value::String("abc".to_string())
            ),
            Value::Bool(true)
        );
        // equal lengths are equal, content notwithstanding
        assert_eq!(
            binary_ok(
                Opcode::Equal,
                Value::String("ab".to_string()),
                Value::String("cd".to_string())
            ),
            Value::Bool(true)
        );
    }

    #[test]
    fn test_bool_equal_but_not_ordered() {
        assert_eq!(
            binary_ok(Opcode::Equal, Value::Bool(true), Value::Bool(true)),
            Value::Bool(true)
        );
        let msg = binary_err(Opcode::Less, Value::Bool(true), Value::Bool(false));
        assert!(msg.contains("cannot compare bool and bool"), "msg was: {}", msg);
    }

    #[test]
    fn test_nan_compares_false() {
        assert_eq!(
            binary_ok(Opcode::Less, Value::Float(f32::NAN), Value::Float(1.0)),
            Value::Bool(false)
        );
        assert_eq!(
            binary_ok(Opcode::Equal, Value::Float(f32::NAN), Value::Float(f32::NAN)),
            Value::Bool(false)
        );
    }

    #[test]
    fn test_logic_ops() {
        assert_eq!(
            binary_ok(Opcode::And, Value::Bool(true), Value::Bool(false)),
            Value::Bool(false)
        );
        assert_eq!(
            binary_ok(Opcode::Or, Value::Bool(true), Value::Bool(false)),
            Value::Bool(true)
        );
    }

    #[test]
    fn test_logic_requires_bools() {
        let msg = binary_err(Opcode::And, Value::Bool(true), Value::Int(1));
        assert!(msg.contains("expected bool, got int"), "msg was: {}", msg);
    }

    #[test]
    fn test_not_inverts() {
        let vm = raw_ok(
            vec![Opcode::PushLit as Word, 0, Opcode::Not as Word],
            vec![Value::Bool(false)],
        );
        assert_eq!(vm.stack_values(), vec![Value::Bool(true)]);
    }

    // =========================================================================
    // Stack shuffles
    // =========================================================================

    #[test]
    fn test_dup_swap_rot() {
        let vm = raw_ok(
            vec![Opcode::PushLit as Word, 0, Opcode::Dup as Word],
            vec![Value::Int(7)],
        );
        assert_eq!(vm.stack_values(), vec![Value::Int(7), Value::Int(7)]);

        let vm = raw_ok(
            vec![
                Opcode::PushLit as Word,
                0,
                Opcode::PushLit as Word,
                1,
                Opcode::Swap as Word,
            ],
            vec![Value::Int(1), Value::Int(2)],
        );
        assert_eq!(vm.stack_values(), vec![Value::Int(2), Value::Int(1)]);

        let vm = raw_ok(
            vec![
                Opcode::PushLit as Word,
                0,
                Opcode::PushLit as Word,
                1,
                Opcode::PushLit as Word,
                2,
                Opcode::Rot as Word,
            ],
            vec![Value::Int(1), Value::Int(2), Value::Int(3)],
        );
        assert_eq!(
            vm.stack_values(),
            vec![Value::Int(2), Value::Int(3), Value::Int(1)]
        );
    }

    #[test]
    fn test_underflow_names_the_instruction() {
        let msg = raw_err(vec![Opcode::Add as Word], vec![]);
        assert!(msg.contains("stack underflow"), "msg was: {}", msg);
        assert!(msg.contains("at ADD (offset 0)"), "msg was: {}", msg);
    }

    // =========================================================================
    // Jumps, halt, captures
    // =========================================================================

    #[test]
    fn test_jump_is_absolute() {
        // jumps over the push
        let vm = raw_ok(
            vec![Opcode::Jump as Word, 4, Opcode::PushLit as Word, 0],
            vec![Value::Int(1)],
        );
        assert!(vm.stack_values().is_empty());
    }

    #[test]
    fn test_jump_false_takes_the_branch() {
        let vm = raw_ok(
            vec![
                Opcode::PushLit as Word,
                0,
                Opcode::JumpFalse as Word,
                6,
                Opcode::PushLit as Word,
                1,
            ],
            vec![Value::Bool(false), Value::Int(1)],
        );
        assert!(vm.stack_values().is_empty());
    }

    #[test]
    fn test_jump_false_requires_a_bool() {
        let msg = raw_err(
            vec![Opcode::PushLit as Word, 0, Opcode::JumpFalse as Word, 4],
            vec![Value::Int(1)],
        );
        assert!(msg.contains("expected bool, got int"), "msg was: {}", msg);
    }

    #[test]
    fn test_halt_stops_execution() {
        let vm = raw_ok(
            vec![Opcode::Halt as Word, Opcode::PushLit as Word, 0],
            vec![Value::Int(1)],
        );
        assert!(vm.stack_values().is_empty());
    }

    #[test]
    fn test_halt_with_leftovers_fails() {
        let msg = raw_err(
            vec![Opcode::PushLit as Word, 0, Opcode::Halt as Word],
            vec![Value::Int(1)],
        );
        assert!(msg.contains("halting with 1 value(s)"), "msg was: {}", msg);
    }

    #[test]
    fn test_capture_wraps_values() {
        let vm = raw_ok(
            vec![
                Opcode::PushLit as Word,
                0,
                Opcode::PushLit as Word,
                1,
                Opcode::Capture as Word,
                2,
            ],
            vec![Value::Int(1), Value::Int(2)],
        );
        assert_eq!(
            vm.stack_values(),
            vec![Value::Capture(vec![
                Rc::new(Value::Int(1)),
                Rc::new(Value::Int(2))
            ])]
        );
    }

    #[test]
    fn test_capture_underflows() {
        let msg = raw_err(
            vec![Opcode::PushLit as Word, 0, Opcode::Capture as Word, 2],
            vec![Value::Int(1)],
        );
        assert!(msg.contains("stack underflow"), "msg was: {}", msg);
    }

    // =========================================================================
    // Bindings
    // =========================================================================

    fn bind_program(flag_op: Opcode) -> Program {
        let mut program = Program::new();
        program.identifiers = vec!["x".to_string()];
        program.literals = vec![Rc::new(Value::Int(1)), Rc::new(Value::Int(2))];
        program.code = vec![
            Opcode::PushLit as Word,
            0,
            flag_op as Word,
            1,
            0,
            Opcode::PushLit as Word,
            1,
            Opcode::Bind as Word,
            1,
            0,
        ];
        program
    }

    #[test]
    fn test_plain_bindings_can_be_rebound() {
        let vm = Vm::run_raw(bind_program(Opcode::Bind)).unwrap();
        assert_eq!(*vm.frame_binding("x").unwrap(), Value::Int(2));
    }

    #[test]
    fn test_strict_bindings_cannot_be_rebound() {
        let msg = Vm::run_raw(bind_program(Opcode::BindStrict))
            .err()
            .unwrap()
            .to_string();
        assert!(msg.contains("cannot rebind strict binding 'x'"), "msg was: {}", msg);
    }

    #[test]
    fn test_parameters_cannot_be_rebound() {
        let msg = Vm::run_raw(bind_program(Opcode::BindParam))
            .err()
            .unwrap()
            .to_string();
        assert!(msg.contains("cannot rebind parameter 'x'"), "msg was: {}", msg);
    }

    #[test]
    fn test_multi_bind_pops_rightmost_first() {
        let mut program = Program::new();
        program.identifiers = vec!["a".to_string(), "b".to_string()];
        program.literals = vec![Rc::new(Value::Int(1)), Rc::new(Value::Int(2))];
        program.code = vec![
            Opcode::PushLit as Word,
            0,
            Opcode::PushLit as Word,
            1,
            Opcode::Bind as Word,
            2,
            0,
            1,
        ];
        let vm = Vm::run_raw(program).unwrap();
        assert_eq!(*vm.frame_binding("a").unwrap(), Value::Int(1));
        assert_eq!(*vm.frame_binding("b").unwrap(), Value::Int(2));
    }

    #[test]
    fn test_unbind_removes_and_checks() {
        let mut program = Program::new();
        program.identifiers = vec!["x".to_string()];
        program.literals = vec![Rc::new(Value::Int(1))];
        program.code = vec![
            Opcode::PushLit as Word,
            0,
            Opcode::Bind as Word,
            1,
            0,
            Opcode::Unbind as Word,
            1,
            0,
        ];
        let vm = Vm::run_raw(program).unwrap();
        assert!(vm.frame_binding("x").is_none());
    }

    #[test]
    fn test_unbind_of_unbound_name() {
        let mut program = Program::new();
        program.identifiers = vec!["x".to_string()];
        program.code = vec![Opcode::Unbind as Word, 1, 0];
        let msg = Vm::run_raw(program).err().unwrap().to_string();
        assert!(msg.contains("unbind of unbound name 'x'"), "msg was: {}", msg);
    }

    #[test]
    fn test_unbind_of_strict_binding() {
        let mut program = Program::new();
        program.identifiers = vec!["x".to_string()];
        program.literals = vec![Rc::new(Value::Int(1))];
        program.code = vec![
            Opcode::PushLit as Word,
            0,
            Opcode::BindStrict as Word,
            1,
            0,
            Opcode::Unbind as Word,
            1,
            0,
        ];
        let msg = Vm::run_raw(program).err().unwrap().to_string();
        assert!(msg.contains("cannot unbind strict binding 'x'"), "msg was: {}", msg);
    }

    #[test]
    fn test_unbind_of_parameter() {
        let mut program = Program::new();
        program.identifiers = vec!["x".to_string()];
        program.literals = vec![Rc::new(Value::Int(1))];
        program.code = vec![
            Opcode::PushLit as Word,
            0,
            Opcode::BindParam as Word,
            1,
            0,
            Opcode::Unbind as Word,
            1,
            0,
        ];
        let msg = Vm::run_raw(program).err().unwrap().to_string();
        assert!(msg.contains("cannot unbind parameter 'x'"), "msg was: {}", msg);
    }

    #[test]
    fn test_load_of_unbound_name() {
        let mut program = Program::new();
        program.identifiers = vec!["ghost".to_string()];
        program.code = vec![Opcode::LoadBinding as Word, 0];
        let msg = Vm::run_raw(program).err().unwrap().to_string();
        assert!(msg.contains("unbound name 'ghost'"), "msg was: {}", msg);
    }

    // =========================================================================
    // Calls
    // =========================================================================

    #[test]
    fn test_call_requires_a_capture_value() {
        let mut program = Program::new();
        program.procedures = vec![(
            "f".to_string(),
            vec![ProcedureDef {
                start: 0,
                params: vec![],
                returns: vec![],
            }],
        )];
        program.literals = vec![Rc::new(Value::Int(1))];
        program.code = vec![Opcode::PushLit as Word, 0, Opcode::Call as Word, 0, 0];
        let msg = Vm::run_raw(program).err().unwrap().to_string();
        assert!(msg.contains("expected capture, got int"), "msg was: {}", msg);
    }

    #[test]
    fn test_return_with_no_enclosing_call() {
        let msg = raw_err(vec![Opcode::Return as Word], vec![]);
        assert!(msg.contains("return with no enclosing call"), "msg was: {}", msg);
    }

    #[test]
    fn test_return_count_mismatch() {
        let program = compile(
            "proc f() -> int { }\n\
             proc main() -> void { || !f drop }",
        );
        let mut vm = Vm::new(program);
        let msg = vm.run().err().unwrap().to_string();
        assert!(
            msg.contains("procedure 'f' returned 0 value(s), expected 1"),
            "msg was: {}",
            msg
        );
    }

    #[test]
    fn test_callee_cannot_pop_caller_values() {
        let program = compile(
            "proc f(a: int) -> int { drop a }\n\
             proc main() -> void { 9 |1| !f drop drop }",
        );
        let mut vm = Vm::new(program);
        let msg = vm.run().err().unwrap().to_string();
        assert!(msg.contains("stack underflow"), "msg was: {}", msg);
        assert!(msg.contains("at DROP"), "msg was: {}", msg);
    }

    #[test]
    fn test_call_depth_limit() {
        let program = compile(
            "proc spin() -> void { || !spin }\n\
             proc main() -> void { || !spin }",
        );
        let config = VmConfig {
            max_call_depth: 16,
            max_steps: None,
        };
        let mut vm = Vm::with_config(program, config);
        let msg = vm.run().err().unwrap().to_string();
        assert!(msg.contains("call depth limit exceeded (16)"), "msg was: {}", msg);
    }

    #[test]
    fn test_step_limit() {
        let program = compile("proc main() -> void { true loop { true } }");
        let config = VmConfig {
            max_call_depth: 1000,
            max_steps: Some(100),
        };
        let mut vm = Vm::with_config(program, config);
        let msg = vm.run().err().unwrap().to_string();
        assert!(msg.contains("step limit exceeded (100)"), "msg was: {}", msg);
    }

    // =========================================================================
    // Errors and traces
    // =========================================================================

    #[test]
    fn test_invalid_opcode_is_internal() {
        let msg = raw_err(vec![9999], vec![]);
        assert!(msg.contains("invalid opcode 9999 at offset 0"), "msg was: {}", msg);
        assert!(!msg.contains("call stack"), "msg was: {}", msg);
    }

    #[test]
    fn test_corrupt_bind_count_is_internal() {
        let msg = raw_err(vec![Opcode::Bind as Word, Word::MAX], vec![]);
        assert!(msg.contains("corrupt name count"), "msg was: {}", msg);
        assert!(!msg.contains("call stack"), "msg was: {}", msg);

        // a count that survives the width sum can still push the span
        // past the end of the address space
        let msg = raw_err(
            vec![Opcode::PushLit as Word, 0, Opcode::Bind as Word, Word::MAX - 2],
            vec![Value::Int(7)],
        );
        assert!(msg.contains("corrupt instruction width"), "msg was: {}", msg);
    }

    #[test]
    fn test_missing_main() {
        let mut vm = Vm::new(Program::new());
        let msg = vm.run().err().unwrap().to_string();
        assert!(msg.contains("program has no 'main' procedure"), "msg was: {}", msg);
    }

    #[test]
    fn test_main_with_no_overloads() {
        // the cache loader checks only the version tag, so a decoded image
        // can carry a procedure entry with an empty overload list
        let mut program = Program::new();
        program.procedures.push(("main".to_string(), vec![]));
        let bytes = program.to_bytes().unwrap();

        let mut vm = Vm::new(Program::from_bytes(&bytes).unwrap());
        let msg = vm.run().err().unwrap().to_string();
        assert!(msg.contains("'main' has no overloads"), "msg was: {}", msg);
    }

    #[test]
    fn test_trace_shows_frames_and_bindings() {
        let program = compile(
            "proc inner(p: int) -> int { 'x' 1 - }\n\
             proc main() -> void { 7 bind seven |seven| !inner drop }",
        );
        let mut vm = Vm::new(program);
        let msg = vm.run().err().unwrap().to_string();
        assert!(msg.contains("cannot subtract string and int"), "msg was: {}", msg);
        assert!(msg.contains("at SUB"), "msg was: {}", msg);
        assert!(msg.contains("call stack (innermost first):"), "msg was: {}", msg);
        assert!(msg.contains("inner"), "msg was: {}", msg);
        assert!(msg.contains("p = 7 (param)"), "msg was: {}", msg);
        assert!(msg.contains("seven = 7"), "msg was: {}", msg);
    }

    #[test]
    fn test_config_defaults() {
        let config = VmConfig::default();
        assert_eq!(config.max_call_depth, 1000);
        assert!(config.max_steps.is_none());
    }
}
