//! The built-in native procedures.
//!
//! Natives are plain Rust functions behind the `@name` call syntax. They
//! receive the live VM and work on the operand stack directly, under the
//! same frame discipline as compiled code. The registry is an explicit
//! object handed to the compiler (which interns call indexes against it)
//! and re-installed into deserialized programs, so the registration order
//! below is part of the bytecode format.

use crate::bytecode::compile::Compiler;
use crate::bytecode::program::{NativeDef, NativeFn, Program};
use crate::lang::value::{Value, ValueKind};
use crate::runtime::runtime_error::RuntimeError;
use crate::runtime::vm::Vm;
use std::io::{self, BufRead, Write};
use std::path::Path;

pub struct NativeRegistry {
    entries: Vec<(String, NativeDef)>,
}

impl NativeRegistry {
    pub fn new() -> Self {
        NativeRegistry {
            entries: Vec::new(),
        }
    }

    pub fn register(&mut self, name: &str, func: NativeFn, params: &[ValueKind]) {
        self.entries.push((
            name.to_string(),
            NativeDef {
                func,
                params: params.to_vec(),
            },
        ));
    }

    /// The full built-in set, in its fixed historical order. Compiled
    /// programs encode positions in this list, so entries are only ever
    /// appended.
    pub fn standard() -> Self {
        let mut r = NativeRegistry::new();
        r.register("error", native_error, &[ValueKind::String]);
        r.register(
            "native_assertm",
            native_assertm,
            &[ValueKind::String, ValueKind::Bool],
        );
        r.register("native_assert", native_assert, &[ValueKind::Bool]);
        r.register("file_exists", native_file_exists, &[ValueKind::String]);
        r.register("read_file", native_read_file, &[ValueKind::String]);
        r.register("eval", native_eval, &[ValueKind::String]);
        r.register("input", native_input, &[ValueKind::String]);
        r.register("stoi", native_stoi, &[ValueKind::String]);
        r.register("stof", native_stof, &[ValueKind::String]);
        r.register("stob", native_stob, &[ValueKind::String]);
        r.register("flip", native_flip, &[ValueKind::Int]);
        r.register("flipf", native_flipf, &[ValueKind::Float]);
        r.register("str_len", native_str_len, &[ValueKind::String]);
        r.register(
            "str_cmp",
            native_str_cmp,
            &[ValueKind::String, ValueKind::String],
        );
        r.register(
            "split",
            native_split,
            &[ValueKind::String, ValueKind::String],
        );
        r.register("to_bytes", native_to_bytes, &[ValueKind::String]);
        r.register("from_bytes", native_from_bytes, &[ValueKind::Int]);
        r.register(
            "str_index",
            native_str_index,
            &[ValueKind::Int, ValueKind::String],
        );
        r.register("kind_cmp", native_kind_cmp, &[]);
        r.register("peek", native_peek, &[ValueKind::Int]);
        r.register("drop_n", native_drop_n, &[ValueKind::Int]);
        r.register("argv", native_argv, &[]);
        r.register("argc", native_argc, &[]);
        r.register("drop_stack", native_drop_stack, &[]);
        r.register("stack_len", native_stack_len, &[]);
        r.register("global_stack_len", native_global_stack_len, &[]);
        r
    }

    /// Copies the registry into a program's native table.
    pub fn install(&self, program: &mut Program) {
        for (name, def) in &self.entries {
            program.natives.push((name.clone(), def.clone()));
        }
    }
}

impl Default for NativeRegistry {
    fn default() -> Self {
        NativeRegistry::new()
    }
}

// =========================================================================
// Errors and assertions
// =========================================================================

/// `( message -- )` aborts execution with the popped message.
fn native_error(vm: &mut Vm) -> Result<(), RuntimeError> {
    let message = vm.pop_string()?;
    Err(RuntimeError::new(message))
}

/// `( condition message -- )` fails with the message when the condition is
/// true. Asserting the failure condition rather than the invariant is
/// historical; scripts read `x 0 < 'x went negative' @native_assertm`.
fn native_assertm(vm: &mut Vm) -> Result<(), RuntimeError> {
    let message = vm.pop_string()?;
    if vm.pop_bool()? {
        return Err(RuntimeError::new(format!("assert: {}", message)));
    }
    Ok(())
}

/// `( condition -- )` like `@native_assertm` without the message.
fn native_assert(vm: &mut Vm) -> Result<(), RuntimeError> {
    if vm.pop_bool()? {
        return Err(RuntimeError::new("assertion triggered"));
    }
    Ok(())
}

// =========================================================================
// Files, stdin, eval
// =========================================================================

/// `( path -- bool )`
fn native_file_exists(vm: &mut Vm) -> Result<(), RuntimeError> {
    let path = vm.pop_string()?;
    vm.push(Value::Bool(Path::new(&path).is_file()));
    Ok(())
}

/// `( path -- contents? )` pushes the file's text, or nothing at all when
/// the file cannot be read. Scripts guard with `@file_exists` first.
fn native_read_file(vm: &mut Vm) -> Result<(), RuntimeError> {
    let path = vm.pop_string()?;
    if let Ok(contents) = std::fs::read_to_string(&path) {
        vm.push(Value::String(contents));
    }
    Ok(())
}

/// `( source -- )` compiles and runs a source string in a fresh VM with
/// its own stack and empty argv. Failures go to stderr and do not abort
/// the calling program.
fn native_eval(vm: &mut Vm) -> Result<(), RuntimeError> {
    let source = vm.pop_string()?;
    if source.is_empty() {
        return Ok(());
    }
    match Compiler::new(NativeRegistry::standard()).compile_source(&source) {
        Ok(program) => {
            if let Err(e) = Vm::new(program).run() {
                eprintln!("eval: {}", e);
            }
        }
        Err(e) => eprintln!("eval: {}", e),
    }
    Ok(())
}

/// `( prompt -- line )` prints the prompt and reads one line from stdin,
/// without the trailing newline.
fn native_input(vm: &mut Vm) -> Result<(), RuntimeError> {
    let prompt = vm.pop_string()?;
    print!("{}", prompt);
    io::stdout().flush().ok();

    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(|e| RuntimeError::new(format!("cannot read stdin: {}", e)))?;
    if line.ends_with('\n') {
        line.pop();
        if line.ends_with('\r') {
            line.pop();
        }
    }
    vm.push(Value::String(line));
    Ok(())
}

// =========================================================================
// Numeric conversions
// =========================================================================

/// `( text -- int | false )` the whole string, surrounding whitespace
/// aside, must parse; anything else pushes `false` for the script to
/// test.
fn native_stoi(vm: &mut Vm) -> Result<(), RuntimeError> {
    let text = vm.pop_string()?;
    match text.trim().parse::<i64>() {
        Ok(n) => vm.push(Value::Int(n)),
        Err(_) => vm.push(Value::Bool(false)),
    }
    Ok(())
}

/// `( text -- float | false )`
fn native_stof(vm: &mut Vm) -> Result<(), RuntimeError> {
    let text = vm.pop_string()?;
    match text.trim().parse::<f32>() {
        Ok(n) => vm.push(Value::Float(n)),
        Err(_) => vm.push(Value::Bool(false)),
    }
    Ok(())
}

/// `( text -- bool )` only the exact text "false" reads as false;
/// everything else, the empty string included, reads as true.
fn native_stob(vm: &mut Vm) -> Result<(), RuntimeError> {
    let text = vm.pop_string()?;
    vm.push(Value::Bool(text != "false"));
    Ok(())
}

/// `( n -- -n )`
fn native_flip(vm: &mut Vm) -> Result<(), RuntimeError> {
    let n = vm.pop_int()?;
    vm.push(Value::Int(n.wrapping_neg()));
    Ok(())
}

/// `( x -- -x )`
fn native_flipf(vm: &mut Vm) -> Result<(), RuntimeError> {
    let x = vm.pop_float()?;
    vm.push(Value::Float(-x));
    Ok(())
}

// =========================================================================
// Strings
// =========================================================================

/// `( text -- len )` byte length, the same measure the comparison
/// operators use on strings.
fn native_str_len(vm: &mut Vm) -> Result<(), RuntimeError> {
    let text = vm.pop_string()?;
    vm.push(Value::Int(text.len() as i64));
    Ok(())
}

/// `( a b -- bool )` content equality. `=` only sees string lengths, so
/// this is the way to compare the text itself.
fn native_str_cmp(vm: &mut Vm) -> Result<(), RuntimeError> {
    let b = vm.pop_string()?;
    let a = vm.pop_string()?;
    vm.push(Value::Bool(a == b));
    Ok(())
}

/// `( text delim -- part... count )` splits on the delimiter, keeping
/// empty parts. Parts go up in reverse so the first part sits on top,
/// just under the part count.
fn native_split(vm: &mut Vm) -> Result<(), RuntimeError> {
    let delim = vm.pop_string()?;
    let text = vm.pop_string()?;
    if delim.is_empty() {
        return Err(RuntimeError::new("cannot split on an empty delimiter"));
    }
    let parts: Vec<&str> = text.split(delim.as_str()).collect();
    let count = parts.len();
    for part in parts.into_iter().rev() {
        vm.push(Value::String(part.to_string()));
    }
    vm.push(Value::Int(count as i64));
    Ok(())
}

/// `( text -- byte... )` one int per byte, first byte deepest.
fn native_to_bytes(vm: &mut Vm) -> Result<(), RuntimeError> {
    let text = vm.pop_string()?;
    for byte in text.bytes() {
        vm.push(Value::Int(byte as i64));
    }
    Ok(())
}

/// `( byte... count -- text )` inverse of `@to_bytes`: pops `count` ints
/// and assembles them with the top of the stack as the final byte.
fn native_from_bytes(vm: &mut Vm) -> Result<(), RuntimeError> {
    let count = pop_count(vm, "byte count")?;
    let mut bytes = vec![0u8; count];
    for slot in bytes.iter_mut().rev() {
        let byte = vm.pop_int()?;
        *slot = u8::try_from(byte)
            .map_err(|_| RuntimeError::new(format!("byte value {} out of range", byte)))?;
    }
    match String::from_utf8(bytes) {
        Ok(text) => {
            vm.push(Value::String(text));
            Ok(())
        }
        Err(_) => Err(RuntimeError::new("bytes do not form valid utf-8")),
    }
}

/// `( text index -- char )` one-character string at a byte index.
fn native_str_index(vm: &mut Vm) -> Result<(), RuntimeError> {
    let idx = pop_count(vm, "string index")?;
    let text = vm.pop_string()?;
    match text.as_bytes().get(idx) {
        Some(&byte) => {
            vm.push(Value::String((byte as char).to_string()));
            Ok(())
        }
        None => Err(RuntimeError::new(format!(
            "string index {} out of range for a {}-byte string",
            idx,
            text.len()
        ))),
    }
}

// =========================================================================
// Stack introspection
// =========================================================================

/// `( a b -- bool )` whether the two values share a kind.
fn native_kind_cmp(vm: &mut Vm) -> Result<(), RuntimeError> {
    let b = vm.pop()?;
    let a = vm.pop()?;
    vm.push(Value::Bool(a.kind() == b.kind()));
    Ok(())
}

/// `( n -- value )` copies the value `n` slots below the top; 0 is the
/// top itself.
fn native_peek(vm: &mut Vm) -> Result<(), RuntimeError> {
    let depth = pop_count(vm, "peek depth")?;
    if depth >= vm.stack_len() {
        return Err(RuntimeError::new(format!(
            "cannot peek {} value(s) down, the stack holds {}",
            depth,
            vm.stack_len()
        )));
    }
    let value = vm.peek(depth)?;
    vm.push_rc(value);
    Ok(())
}

/// `( n -- )` drops the top `n` values.
fn native_drop_n(vm: &mut Vm) -> Result<(), RuntimeError> {
    let count = pop_count(vm, "drop count")?;
    if count > vm.stack_len() {
        return Err(RuntimeError::new(format!(
            "cannot drop {} value(s), the stack holds {}",
            count,
            vm.stack_len()
        )));
    }
    for _ in 0..count {
        vm.pop()?;
    }
    Ok(())
}

/// `( -- arg... )` every program argument, first argument deepest.
fn native_argv(vm: &mut Vm) -> Result<(), RuntimeError> {
    let args: Vec<String> = vm.argv().to_vec();
    for arg in args {
        vm.push(Value::String(arg));
    }
    Ok(())
}

/// `( -- n )`
fn native_argc(vm: &mut Vm) -> Result<(), RuntimeError> {
    let n = vm.argv().len();
    vm.push(Value::Int(n as i64));
    Ok(())
}

/// `( ... -- )` clears the current frame's portion of the stack.
fn native_drop_stack(vm: &mut Vm) -> Result<(), RuntimeError> {
    vm.clear_visible();
    Ok(())
}

/// `( -- n )` depth of the current frame's stack.
fn native_stack_len(vm: &mut Vm) -> Result<(), RuntimeError> {
    let n = vm.stack_len();
    vm.push(Value::Int(n as i64));
    Ok(())
}

/// `( -- n )` depth of the whole stack, callers' fenced values included.
fn native_global_stack_len(vm: &mut Vm) -> Result<(), RuntimeError> {
    let n = vm.global_stack_len();
    vm.push(Value::Int(n as i64));
    Ok(())
}

/// Pops an int meant to be a count or index; negatives are errors.
fn pop_count(vm: &mut Vm, what: &str) -> Result<usize, RuntimeError> {
    let n = vm.pop_int()?;
    usize::try_from(n)
        .map_err(|_| RuntimeError::new(format!("{} cannot be negative, got {}", what, n)))
}
