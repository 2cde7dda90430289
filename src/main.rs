mod bytecode;
mod frontend;
mod lang;
mod runtime;

use std::{env, fs, path::Path};

use crate::bytecode::compile::Compiler;
use crate::bytecode::disasm;
use crate::bytecode::program::Program;
use crate::frontend::lexer::Lexer;
use crate::runtime::natives::NativeRegistry;
use crate::runtime::vm::Vm;

fn main() {
    let args: Vec<String> = env::args().collect();

    // everything after `--` is the executed program's argv
    let (own, prog_args) = match args.iter().position(|a| a == "--") {
        Some(at) => (&args[..at], args[at + 1..].to_vec()),
        None => (&args[..], Vec::new()),
    };

    let dump = own.contains(&"-d".to_string());
    let tokens_only = own.contains(&"--tokens".to_string());
    let compile_only = own.contains(&"-c".to_string());

    // first non-flag argument is the filename
    let filename = own.iter().skip(1).find(|a| !a.starts_with('-'));

    let Some(filename) = filename else {
        print_usage();
        return;
    };

    if tokens_only {
        dump_tokens(filename);
        return;
    }

    let program = load_program(filename);

    if compile_only {
        write_image(filename, &program);
        return;
    }
    if dump {
        disasm::print_program(&program);
    }

    let mut vm = Vm::new(program);
    vm.set_argv(prog_args);
    if let Err(e) = vm.run() {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

/// `.esoc` images load directly; anything else goes through the compiler.
fn load_program(filename: &str) -> Program {
    let path = Path::new(filename);
    if path.extension().and_then(|e| e.to_str()) == Some("esoc") {
        return load_image(path);
    }
    match Compiler::new(NativeRegistry::standard()).compile_file(path) {
        Ok(program) => program,
        Err(e) => {
            eprintln!("{}:{}", filename, e);
            std::process::exit(1);
        }
    }
}

fn load_image(path: &Path) -> Program {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("cannot read '{}': {}", path.display(), e);
            std::process::exit(1);
        }
    };
    match Program::from_bytes(&bytes) {
        Ok(mut program) => {
            // the image carries no function pointers
            NativeRegistry::standard().install(&mut program);
            program
        }
        Err(e) => {
            eprintln!("{}: {}", path.display(), e);
            std::process::exit(1);
        }
    }
}

/// `-c`: writes the compiled program next to the source as `<stem>.esoc`.
fn write_image(filename: &str, program: &Program) {
    let out = Path::new(filename).with_extension("esoc");
    let bytes = match program.to_bytes() {
        Ok(b) => b,
        Err(e) => {
            eprintln!("cannot serialize '{}': {}", filename, e);
            std::process::exit(1);
        }
    };
    match fs::write(&out, &bytes) {
        Ok(()) => println!("wrote {}", out.display()),
        Err(e) => {
            eprintln!("cannot write '{}': {}", out.display(), e);
            std::process::exit(1);
        }
    }
}

/// One `line:col kind lexeme` row per token, the end-of-input marker
/// included.
fn dump_tokens(filename: &str) {
    let source = match fs::read_to_string(filename) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("cannot read '{}': {}", filename, e);
            std::process::exit(1);
        }
    };
    match Lexer::new(&source).tokenize() {
        Ok(tokens) => {
            for token in &tokens {
                println!(
                    "{}:{}\t{}\t{}",
                    token.line,
                    token.col,
                    token.kind.tag(),
                    token.lexeme
                );
            }
        }
        Err(e) => {
            eprintln!("{}:{}", filename, e);
            std::process::exit(1);
        }
    }
}

fn print_usage() {
    println!("eso - a small stack language");
    println!();
    println!("Usage:");
    println!("  eso <file.eso>         Compile and run a program");
    println!("  eso <file.esoc>        Run a compiled image directly");
    println!("  eso <file> -d          Dump the compiled program, then run it");
    println!("  eso <file> --tokens    Show the token stream and exit");
    println!("  eso <file> -c          Write <file>.esoc and exit");
    println!("  eso <file> -- <args>   Pass everything after -- to the program");
}
