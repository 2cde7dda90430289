use crate::bytecode::compile_error::CompileError;
use crate::bytecode::program::{ProcedureDef, Program};
use crate::bytecode::{Opcode, Word};
use crate::frontend::lexer::Lexer;
use crate::frontend::token::{Token, TokenKind};
use crate::lang::value::{Value, ValueKind};
use crate::runtime::natives::NativeRegistry;
use std::collections::HashMap;
use std::collections::HashSet;
use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

// =============================================================================
// Compiler - single pass, tokens to bytecode
// =============================================================================

/// Compiles token streams straight into a [`Program`]. There is no syntax
/// tree: every statement emits its words as soon as it is recognized, and
/// forward jumps are patched once their target offset is known.
///
/// Consequences the language wears openly: procedures must be declared
/// before they are called, and overloads are resolved with whatever kind
/// information the compiler has at the call site.
pub struct Compiler {
    program: Program,
    tokens: Vec<Token>,
    pos: usize,
    /// Content hashes of every compiled unit, for import de-duplication.
    included: HashSet<u64>,
}

impl Compiler {
    pub fn new(natives: NativeRegistry) -> Self {
        let mut program = Program::new();
        natives.install(&mut program);
        Compiler {
            program,
            tokens: Vec::new(),
            pos: 0,
            included: HashSet::new(),
        }
    }

    pub fn compile_file(mut self, path: &Path) -> Result<Program, CompileError> {
        let source = fs::read_to_string(path).map_err(|e| {
            CompileError::new(format!("cannot read '{}': {}", path.display(), e), 0, 0)
        })?;
        self.included.insert(content_hash(&source));
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        self.compile_unit(&source, &base_dir, true)?;
        Ok(self.program)
    }

    /// Compiles a source string with imports resolved against the current
    /// directory. Used by tests and the `eval` native.
    pub fn compile_source(mut self, source: &str) -> Result<Program, CompileError> {
        self.included.insert(content_hash(source));
        self.compile_unit(source, Path::new("."), true)?;
        Ok(self.program)
    }

    /// Lexes and compiles one file's worth of source. The current token
    /// stream is stashed and restored around it so that `using` can nest.
    fn compile_unit(
        &mut self,
        source: &str,
        base_dir: &Path,
        is_root: bool,
    ) -> Result<(), CompileError> {
        let tokens = Lexer::new(source).tokenize()?;
        let saved_tokens = std::mem::replace(&mut self.tokens, tokens);
        let saved_pos = std::mem::replace(&mut self.pos, 0);
        let result = self.compile_top_level(base_dir, is_root);
        self.tokens = saved_tokens;
        self.pos = saved_pos;
        result
    }

    fn compile_top_level(&mut self, base_dir: &Path, is_root: bool) -> Result<(), CompileError> {
        while self.current().kind != TokenKind::Eof {
            match self.current().kind {
                TokenKind::Using => self.compile_using(base_dir)?,
                TokenKind::Struct => self.compile_struct()?,
                TokenKind::Proc => self.compile_proc(is_root)?,
                _ => {
                    return Err(CompileError::unexpected(
                        "'proc', 'struct', or 'using'",
                        self.current(),
                    ));
                }
            }
        }
        Ok(())
    }

    // =========================================================================
    // Imports
    // =========================================================================

    fn compile_using(&mut self, base_dir: &Path) -> Result<(), CompileError> {
        let using_tok = self.expect(TokenKind::Using)?;
        let path_tok = self.expect(TokenKind::StringLit)?;
        self.import_file(&path_tok.lexeme, base_dir, &using_tok)
    }

    fn import_file(&mut self, raw: &str, base_dir: &Path, at: &Token) -> Result<(), CompileError> {
        let path = resolve_import(raw, base_dir);
        let source = fs::read_to_string(&path)
            .map_err(|e| CompileError::at(at, format!("cannot read '{}': {}", path.display(), e)))?;

        // Same content twice (diamond imports, or a file importing itself)
        // is a warning and a no-op, not an error.
        if !self.included.insert(content_hash(&source)) {
            eprintln!("Warning: skipping duplicate import '{}'", path.display());
            return Ok(());
        }

        let parent = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        self.compile_unit(&source, &parent, false)
            .map_err(|e| CompileError::at(at, format!("in '{}': {}", path.display(), e)))
    }

    // =========================================================================
    // Definitions
    // =========================================================================

    /// Struct definitions parse but compile to nothing; there is no struct
    /// value kind yet.
    fn compile_struct(&mut self) -> Result<(), CompileError> {
        self.expect(TokenKind::Struct)?;
        self.expect(TokenKind::Ident)?;
        self.expect(TokenKind::LBrace)?;
        if self.current().kind != TokenKind::RBrace {
            loop {
                self.expect(TokenKind::Ident)?;
                self.expect(TokenKind::Colon)?;
                self.expect(TokenKind::TypeId)?;
                if self.current().kind == TokenKind::Comma {
                    self.bump();
                } else {
                    break;
                }
            }
        }
        self.expect(TokenKind::RBrace)?;
        Ok(())
    }

    fn compile_proc(&mut self, is_root: bool) -> Result<(), CompileError> {
        self.expect(TokenKind::Proc)?;
        let name_tok = self.expect(TokenKind::Ident)?;
        let name = name_tok.lexeme.clone();

        self.expect(TokenKind::LParen)?;
        let params = self.parse_params()?;
        self.expect(TokenKind::RParen)?;
        self.expect(TokenKind::Arrow)?;
        let returns = self.parse_returns()?;

        let is_main = name == "main";
        if is_main {
            if !params.is_empty() {
                return Err(CompileError::at(&name_tok, "main takes no parameters"));
            }
            if !returns.is_empty() {
                return Err(CompileError::at(&name_tok, "main must be declared to return void"));
            }
        }

        // An imported file's main still has to parse and type-check, but its
        // code is thrown away and it is never registered.
        let discard = is_main && !is_root;
        let rollback = self.code_len();

        let mut overload_idx = 0;
        if !discard {
            if is_main && self.program.find_procedure("main").is_some() {
                return Err(CompileError::at(&name_tok, "multiple definitions of 'main'"));
            }
            // Registered before the body compiles so the body can call
            // itself recursively.
            overload_idx = self.register_overload(&name, &params, &returns, &name_tok)?;
        }

        if !params.is_empty() {
            self.emit_op(Opcode::BindParam);
            self.emit(params.len());
            for (pname, _) in &params {
                let idx = self.program.intern_identifier(pname);
                self.emit(idx);
            }
        }

        let mut ctx = BodyCtx::new(is_main, overload_idx, &params);
        self.expect(TokenKind::LBrace)?;
        self.compile_block_body(&mut ctx)?;

        if is_main {
            self.emit_op(Opcode::Halt);
        } else {
            self.emit_op(Opcode::Return);
            self.emit(overload_idx);
        }

        if discard {
            self.program.code.truncate(rollback);
        }
        Ok(())
    }

    /// Adds the overload to the procedure table and returns its index within
    /// the overload set. That index rides on the body's `Return` operands.
    fn register_overload(
        &mut self,
        name: &str,
        params: &[(String, ValueKind)],
        returns: &[ValueKind],
        at: &Token,
    ) -> Result<usize, CompileError> {
        let start = self.code_len();
        let proc_idx = match self.program.procedures.iter().position(|(n, _)| n == name) {
            Some(idx) => idx,
            None => {
                self.program.procedures.push((name.to_string(), Vec::new()));
                self.program.procedures.len() - 1
            }
        };
        let kinds: Vec<ValueKind> = params.iter().map(|(_, k)| *k).collect();
        let overloads = &mut self.program.procedures[proc_idx].1;
        if overloads
            .iter()
            .any(|d| d.param_kinds().eq(kinds.iter().copied()))
        {
            return Err(CompileError::duplicate_overload(name, at));
        }
        overloads.push(ProcedureDef {
            start,
            params: params.to_vec(),
            returns: returns.to_vec(),
        });
        Ok(overloads.len() - 1)
    }

    fn parse_params(&mut self) -> Result<Vec<(String, ValueKind)>, CompileError> {
        let mut params = Vec::new();
        if self.current().kind == TokenKind::RParen {
            return Ok(params);
        }
        loop {
            let name_tok = self.expect(TokenKind::Ident)?;
            self.expect(TokenKind::Colon)?;
            let type_tok = self.expect(TokenKind::TypeId)?;
            let kind = ValueKind::from_name(&type_tok.lexeme).ok_or_else(|| {
                CompileError::at(
                    &type_tok,
                    format!("'{}' is not a valid parameter type", type_tok.lexeme),
                )
            })?;
            if params.iter().any(|(n, _)| *n == name_tok.lexeme) {
                return Err(CompileError::at(
                    &name_tok,
                    format!("duplicate parameter name '{}'", name_tok.lexeme),
                ));
            }
            params.push((name_tok.lexeme.clone(), kind));
            if self.current().kind == TokenKind::Comma {
                self.bump();
            } else {
                break;
            }
        }
        Ok(params)
    }

    fn parse_returns(&mut self) -> Result<Vec<ValueKind>, CompileError> {
        let first = self.expect(TokenKind::TypeId)?;
        if first.lexeme == "void" {
            if self.current().kind == TokenKind::Comma {
                return Err(CompileError::at(
                    self.current(),
                    "'void' cannot be combined with other return types",
                ));
            }
            return Ok(Vec::new());
        }

        let mut returns = vec![type_kind(&first)?];
        while self.current().kind == TokenKind::Comma {
            self.bump();
            let tok = self.expect(TokenKind::TypeId)?;
            if tok.lexeme == "void" {
                return Err(CompileError::at(
                    &tok,
                    "'void' cannot be combined with other return types",
                ));
            }
            returns.push(type_kind(&tok)?);
        }
        Ok(returns)
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn compile_block(&mut self, ctx: &mut BodyCtx) -> Result<(), CompileError> {
        self.expect(TokenKind::LBrace)?;
        ctx.branch_depth += 1;
        let result = self.compile_block_body(ctx);
        ctx.branch_depth -= 1;
        result
    }

    fn compile_block_body(&mut self, ctx: &mut BodyCtx) -> Result<(), CompileError> {
        while self.current().kind != TokenKind::RBrace {
            if self.current().kind == TokenKind::Eof {
                return Err(CompileError::unexpected("'}'", self.current()));
            }
            self.compile_statement(ctx)?;
        }
        self.bump(); // }
        Ok(())
    }

    fn compile_statement(&mut self, ctx: &mut BodyCtx) -> Result<(), CompileError> {
        match self.current().kind {
            TokenKind::Pipe => self.compile_capture(ctx),
            TokenKind::Bang => self.compile_call(ctx),
            _ => {
                // Anything else breaks the capture-then-call adjacency.
                ctx.last_capture = None;
                self.compile_plain_statement(ctx)
            }
        }
    }

    fn compile_plain_statement(&mut self, ctx: &mut BodyCtx) -> Result<(), CompileError> {
        let tok = self.current().clone();

        if let Some(op) = simple_opcode(tok.kind) {
            self.bump();
            self.emit_op(op);
            track_simple(ctx, op);
            return Ok(());
        }

        match tok.kind {
            TokenKind::IntLit | TokenKind::FloatLit | TokenKind::BoolLit | TokenKind::StringLit => {
                let kind = self.compile_literal(&tok)?;
                ctx.push_kind(Some(kind));
                Ok(())
            }
            TokenKind::Ident => {
                self.bump();
                let idx = self.program.intern_identifier(&tok.lexeme);
                self.emit_op(Opcode::LoadBinding);
                self.emit(idx);
                ctx.push_kind(ctx.load_kind(&tok.lexeme));
                Ok(())
            }
            TokenKind::If => self.compile_if(ctx),
            TokenKind::Loop => self.compile_loop(ctx),
            TokenKind::Bind => self.compile_bind(ctx, Opcode::Bind),
            TokenKind::Strict => self.compile_bind(ctx, Opcode::BindStrict),
            TokenKind::Unbind => self.compile_unbind(ctx),
            TokenKind::Return => {
                self.bump();
                // main has no caller to return to; its return is a halt
                if ctx.in_main {
                    self.emit_op(Opcode::Halt);
                } else {
                    self.emit_op(Opcode::Return);
                    self.emit(ctx.overload);
                }
                ctx.clear_kinds();
                Ok(())
            }
            TokenKind::At => self.compile_native_call(ctx),
            TokenKind::Using => Err(CompileError::top_level_only("using", &tok)),
            TokenKind::Struct => Err(CompileError::top_level_only("struct", &tok)),
            TokenKind::Proc => {
                Err(CompileError::at(&tok, "nested procedure definitions are not allowed"))
            }
            TokenKind::Else => Err(CompileError::at(&tok, "'else' without a matching 'if'")),
            _ => Err(CompileError::unexpected("a statement", &tok)),
        }
    }

    fn compile_literal(&mut self, tok: &Token) -> Result<ValueKind, CompileError> {
        self.bump();
        let (value, kind) = match tok.kind {
            TokenKind::IntLit => {
                let n: i64 = tok.lexeme.parse().map_err(|_| {
                    CompileError::at(tok, format!("integer literal out of range: {}", tok.lexeme))
                })?;
                (Value::Int(n), ValueKind::Int)
            }
            TokenKind::FloatLit => {
                let n: f32 = tok.lexeme.parse().map_err(|_| {
                    CompileError::at(tok, format!("invalid float literal: {}", tok.lexeme))
                })?;
                (Value::Float(n), ValueKind::Float)
            }
            TokenKind::BoolLit => (Value::Bool(tok.lexeme == "true"), ValueKind::Bool),
            _ => (Value::String(tok.lexeme.clone()), ValueKind::String),
        };
        let idx = self.program.add_literal(value);
        self.emit_op(Opcode::PushLit);
        self.emit(idx);
        Ok(kind)
    }

    // =========================================================================
    // Control flow
    // =========================================================================

    fn compile_if(&mut self, ctx: &mut BodyCtx) -> Result<(), CompileError> {
        self.bump(); // if
        ctx.pop_kind(); // condition
        self.emit_op(Opcode::JumpFalse);
        let false_patch = self.reserve();
        self.compile_block(ctx)?;

        if self.current().kind == TokenKind::Else {
            self.bump();
            self.emit_op(Opcode::Jump);
            let end_patch = self.reserve();
            // false lands past the jump that skips the else block
            let target = self.code_len();
            self.patch(false_patch, target);
            self.compile_block(ctx)?;
            let target = self.code_len();
            self.patch(end_patch, target);
        } else {
            let target = self.code_len();
            self.patch(false_patch, target);
        }

        // What the branches left on the stack is unknowable from here.
        ctx.clear_kinds();
        ctx.last_capture = None;
        Ok(())
    }

    fn compile_loop(&mut self, ctx: &mut BodyCtx) -> Result<(), CompileError> {
        self.bump(); // loop
        let test = self.code_len();
        ctx.pop_kind(); // pretest condition
        self.emit_op(Opcode::LoopJump);
        let exit_patch = self.reserve();
        self.compile_block(ctx)?;
        // the block leaves the next iteration's condition on top
        self.emit_op(Opcode::Jump);
        self.emit(test);
        let target = self.code_len();
        self.patch(exit_patch, target);

        ctx.clear_kinds();
        ctx.last_capture = None;
        Ok(())
    }

    // =========================================================================
    // Bindings
    // =========================================================================

    fn compile_bind(&mut self, ctx: &mut BodyCtx, op: Opcode) -> Result<(), CompileError> {
        self.bump(); // bind / strict
        let names = self.parse_name_list()?;
        self.emit_op(op);
        self.emit(names.len());
        for tok in &names {
            let idx = self.program.intern_identifier(&tok.lexeme);
            self.emit(idx);
        }
        // Values pop right to left: the rightmost name takes the top of the
        // stack. Kinds recorded inside a branch are not trusted afterwards.
        for tok in names.iter().rev() {
            let kind = ctx.pop_kind();
            let recorded = if ctx.branch_depth == 0 { kind } else { None };
            ctx.locals.insert(tok.lexeme.clone(), recorded);
        }
        Ok(())
    }

    fn compile_unbind(&mut self, ctx: &mut BodyCtx) -> Result<(), CompileError> {
        self.bump(); // unbind
        let names = self.parse_name_list()?;
        self.emit_op(Opcode::Unbind);
        self.emit(names.len());
        for tok in &names {
            let idx = self.program.intern_identifier(&tok.lexeme);
            self.emit(idx);
            ctx.locals.remove(&tok.lexeme);
        }
        Ok(())
    }

    fn parse_name_list(&mut self) -> Result<Vec<Token>, CompileError> {
        let mut names = vec![self.expect(TokenKind::Ident)?];
        while self.current().kind == TokenKind::Comma {
            self.bump();
            names.push(self.expect(TokenKind::Ident)?);
        }
        Ok(names)
    }

    // =========================================================================
    // Captures and calls
    // =========================================================================

    fn compile_capture(&mut self, ctx: &mut BodyCtx) -> Result<(), CompileError> {
        let open = self.current().clone();
        self.bump(); // |
        if self.current().kind == TokenKind::Bang {
            return self.compile_dynamic_capture(ctx);
        }

        let mut elems: Vec<Option<ValueKind>> = Vec::new();
        while self.current().kind != TokenKind::Pipe {
            if self.current().kind == TokenKind::Eof {
                return Err(CompileError::malformed_capture(
                    "missing closing '|'",
                    open.line,
                    open.col,
                ));
            }
            self.compile_capture_statement(ctx, &mut elems)?;
        }
        self.bump(); // |

        self.emit_op(Opcode::Capture);
        self.emit(elems.len());
        ctx.push_kind(Some(ValueKind::Capture));
        ctx.last_capture = Some(elems);
        Ok(())
    }

    /// `|! n |` wraps the top `n` values already on the stack instead of
    /// computing fresh ones.
    fn compile_dynamic_capture(&mut self, ctx: &mut BodyCtx) -> Result<(), CompileError> {
        self.bump(); // !
        let count_tok = self.expect(TokenKind::IntLit)?;
        let count: usize = count_tok.lexeme.parse().map_err(|_| {
            CompileError::at(
                &count_tok,
                format!("invalid capture count: {}", count_tok.lexeme),
            )
        })?;
        self.expect(TokenKind::Pipe)?;

        let mut elems: Vec<Option<ValueKind>> = (0..count).map(|_| ctx.pop_kind()).collect();
        elems.reverse();

        self.emit_op(Opcode::Capture);
        self.emit(count);
        ctx.push_kind(Some(ValueKind::Capture));
        ctx.last_capture = Some(elems);
        Ok(())
    }

    /// A capture body is a closed world: literals, binding loads, and plain
    /// stack/arithmetic/print statements only, and it may not reach below
    /// the values it produced itself.
    fn compile_capture_statement(
        &mut self,
        ctx: &mut BodyCtx,
        elems: &mut Vec<Option<ValueKind>>,
    ) -> Result<(), CompileError> {
        let tok = self.current().clone();

        if let Some(op) = simple_opcode(tok.kind) {
            self.bump();
            track_capture(elems, op, &tok)?;
            self.emit_op(op);
            return Ok(());
        }

        match tok.kind {
            TokenKind::IntLit | TokenKind::FloatLit | TokenKind::BoolLit | TokenKind::StringLit => {
                let kind = self.compile_literal(&tok)?;
                elems.push(Some(kind));
                Ok(())
            }
            TokenKind::Ident => {
                self.bump();
                let idx = self.program.intern_identifier(&tok.lexeme);
                self.emit_op(Opcode::LoadBinding);
                self.emit(idx);
                elems.push(ctx.load_kind(&tok.lexeme));
                Ok(())
            }
            TokenKind::If
            | TokenKind::Else
            | TokenKind::Loop
            | TokenKind::Bang
            | TokenKind::At
            | TokenKind::Bind
            | TokenKind::Strict
            | TokenKind::Unbind
            | TokenKind::Return
            | TokenKind::Using
            | TokenKind::Struct
            | TokenKind::Proc => Err(CompileError::malformed_capture(
                &format!("'{}' is not allowed inside a capture", tok.lexeme),
                tok.line,
                tok.col,
            )),
            _ => Err(CompileError::malformed_capture(
                &format!("unexpected {}", tok.describe()),
                tok.line,
                tok.col,
            )),
        }
    }

    fn compile_call(&mut self, ctx: &mut BodyCtx) -> Result<(), CompileError> {
        let bang = self.current().clone();
        self.bump(); // !
        let name_tok = self.expect(TokenKind::Ident)?;
        let name = name_tok.lexeme.clone();

        let Some(capture) = ctx.last_capture.take() else {
            return Err(CompileError::call_without_capture(&name, &bang));
        };

        let (proc_idx, overload_idx) = self.resolve_overload(&name, &capture, &name_tok)?;
        self.emit_op(Opcode::Call);
        self.emit(proc_idx);
        self.emit(overload_idx);

        ctx.pop_kind(); // the capture value itself
        let returns = self.program.procedures[proc_idx].1[overload_idx].returns.clone();
        for kind in returns {
            ctx.push_kind(Some(kind));
        }
        Ok(())
    }

    /// Picks the overload a call compiles against. With every captured kind
    /// known the signature must match exactly; with unknowns in the mix the
    /// element count has to single out one overload.
    fn resolve_overload(
        &self,
        name: &str,
        capture: &[Option<ValueKind>],
        at: &Token,
    ) -> Result<(usize, usize), CompileError> {
        let Some((proc_idx, overloads)) = self.program.find_procedure(name) else {
            return Err(CompileError::undeclared_procedure(name, at));
        };

        if capture.iter().all(|k| k.is_some()) {
            let kinds: Vec<ValueKind> = capture.iter().filter_map(|k| *k).collect();
            for (idx, def) in overloads.iter().enumerate() {
                if def.params.len() == kinds.len() && def.param_kinds().eq(kinds.iter().copied()) {
                    return Ok((proc_idx, idx));
                }
            }
            return Err(CompileError::no_matching_overload(name, at));
        }

        let mut by_arity = overloads
            .iter()
            .enumerate()
            .filter(|(_, d)| d.params.len() == capture.len());
        match (by_arity.next(), by_arity.next()) {
            (Some((idx, _)), None) => Ok((proc_idx, idx)),
            (None, _) => Err(CompileError::no_overload_arity(name, capture.len(), at)),
            (Some(_), Some(_)) => Err(CompileError::ambiguous_call(name, capture.len(), at)),
        }
    }

    fn compile_native_call(&mut self, ctx: &mut BodyCtx) -> Result<(), CompileError> {
        self.bump(); // @
        let name_tok = self.expect(TokenKind::Ident)?;
        let idx = self
            .program
            .find_native(&name_tok.lexeme)
            .ok_or_else(|| CompileError::undeclared_native(&name_tok.lexeme, &name_tok))?;
        self.emit_op(Opcode::NativeCall);
        self.emit(idx);
        // natives reach into the stack directly
        ctx.clear_kinds();
        Ok(())
    }

    // =========================================================================
    // Emission and cursor helpers
    // =========================================================================

    fn code_len(&self) -> usize {
        self.program.code.len()
    }

    fn emit(&mut self, word: Word) {
        self.program.code.push(word);
    }

    fn emit_op(&mut self, op: Opcode) {
        self.program.code.push(op as Word);
    }

    /// Emits a placeholder operand and returns its offset for `patch`.
    fn reserve(&mut self) -> usize {
        let at = self.program.code.len();
        self.program.code.push(0);
        at
    }

    fn patch(&mut self, at: usize, target: usize) {
        self.program.code[at] = target;
    }

    fn current(&self) -> &Token {
        &self.tokens[self.pos]
    }

    /// Advances, sticking at the trailing `Eof` token.
    fn bump(&mut self) {
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, CompileError> {
        let tok = self.current().clone();
        if tok.kind != kind {
            return Err(CompileError::unexpected(kind.describe(), &tok));
        }
        self.bump();
        Ok(tok)
    }
}

// =============================================================================
// Compile-time kind tracking
// =============================================================================

/// Per-body compile state. `kinds` mirrors the runtime stack as far as the
/// compiler can see it; a `None` entry is a value of unknown kind. The whole
/// stack goes unknown after control flow or a native call.
struct BodyCtx {
    in_main: bool,
    /// Index of this body within its overload set, emitted with `Return`.
    overload: usize,
    branch_depth: usize,
    kinds: Vec<Option<ValueKind>>,
    params: HashMap<String, ValueKind>,
    locals: HashMap<String, Option<ValueKind>>,
    /// Element kinds of the capture compiled by the directly preceding
    /// statement, if there was one. Consumed by `!name`.
    last_capture: Option<Vec<Option<ValueKind>>>,
}

impl BodyCtx {
    fn new(in_main: bool, overload: usize, params: &[(String, ValueKind)]) -> Self {
        BodyCtx {
            in_main,
            overload,
            branch_depth: 0,
            kinds: Vec::new(),
            params: params.iter().cloned().collect(),
            locals: HashMap::new(),
            last_capture: None,
        }
    }

    fn push_kind(&mut self, kind: Option<ValueKind>) {
        self.kinds.push(kind);
    }

    /// Popping past what the tracker has seen yields unknown, not an error;
    /// real underflow is the VM's to report.
    fn pop_kind(&mut self) -> Option<ValueKind> {
        self.kinds.pop().flatten()
    }

    fn clear_kinds(&mut self) {
        self.kinds.clear();
    }

    fn load_kind(&self, name: &str) -> Option<ValueKind> {
        if let Some(kind) = self.params.get(name) {
            return Some(*kind);
        }
        self.locals.get(name).copied().flatten()
    }
}

fn type_kind(tok: &Token) -> Result<ValueKind, CompileError> {
    ValueKind::from_name(&tok.lexeme)
        .ok_or_else(|| CompileError::at(tok, format!("'{}' is not a value type", tok.lexeme)))
}

/// Statements that compile to exactly one opcode with no operands.
fn simple_opcode(kind: TokenKind) -> Option<Opcode> {
    match kind {
        TokenKind::Plus => Some(Opcode::Add),
        TokenKind::Minus => Some(Opcode::Sub),
        TokenKind::Star => Some(Opcode::Mul),
        TokenKind::Slash => Some(Opcode::Div),
        TokenKind::Percent => Some(Opcode::Mod),
        TokenKind::Greater => Some(Opcode::Greater),
        TokenKind::Less => Some(Opcode::Less),
        TokenKind::GreaterEq => Some(Opcode::GreaterEq),
        TokenKind::LessEq => Some(Opcode::LessEq),
        TokenKind::Equal => Some(Opcode::Equal),
        TokenKind::Or => Some(Opcode::Or),
        TokenKind::And => Some(Opcode::And),
        TokenKind::Not => Some(Opcode::Not),
        TokenKind::Dup => Some(Opcode::Dup),
        TokenKind::Swap => Some(Opcode::Swap),
        TokenKind::Rot => Some(Opcode::Rot),
        TokenKind::Drop => Some(Opcode::Drop),
        TokenKind::Print => Some(Opcode::Print),
        TokenKind::Println => Some(Opcode::Println),
        _ => None,
    }
}

fn arith_kind(a: Option<ValueKind>, b: Option<ValueKind>, is_add: bool) -> Option<ValueKind> {
    match (a, b) {
        (Some(ValueKind::Int), Some(ValueKind::Int)) => Some(ValueKind::Int),
        (Some(ValueKind::Float), Some(ValueKind::Float))
        | (Some(ValueKind::Int), Some(ValueKind::Float))
        | (Some(ValueKind::Float), Some(ValueKind::Int)) => Some(ValueKind::Float),
        (Some(ValueKind::String), Some(ValueKind::String)) if is_add => Some(ValueKind::String),
        _ => None,
    }
}

/// Applies a simple opcode's stack effect to the body tracker.
fn track_simple(ctx: &mut BodyCtx, op: Opcode) {
    match op {
        Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Mod => {
            let b = ctx.pop_kind();
            let a = ctx.pop_kind();
            ctx.push_kind(arith_kind(a, b, op == Opcode::Add));
        }
        Opcode::Greater
        | Opcode::Less
        | Opcode::GreaterEq
        | Opcode::LessEq
        | Opcode::Equal
        | Opcode::Or
        | Opcode::And => {
            ctx.pop_kind();
            ctx.pop_kind();
            ctx.push_kind(Some(ValueKind::Bool));
        }
        Opcode::Not => {
            ctx.pop_kind();
            ctx.push_kind(Some(ValueKind::Bool));
        }
        Opcode::Dup => {
            let k = ctx.pop_kind();
            ctx.push_kind(k);
            ctx.push_kind(k);
        }
        Opcode::Swap => {
            let b = ctx.pop_kind();
            let a = ctx.pop_kind();
            ctx.push_kind(b);
            ctx.push_kind(a);
        }
        Opcode::Rot => {
            let c = ctx.pop_kind();
            let b = ctx.pop_kind();
            let a = ctx.pop_kind();
            ctx.push_kind(b);
            ctx.push_kind(c);
            ctx.push_kind(a);
        }
        Opcode::Drop | Opcode::Print | Opcode::Println => {
            ctx.pop_kind();
        }
        _ => {}
    }
}

/// Same as [`track_simple`], but for a capture body, where consuming a value
/// the body did not produce is an error.
fn track_capture(
    elems: &mut Vec<Option<ValueKind>>,
    op: Opcode,
    tok: &Token,
) -> Result<(), CompileError> {
    let take = |elems: &mut Vec<Option<ValueKind>>,
                n: usize|
     -> Result<Vec<Option<ValueKind>>, CompileError> {
        if elems.len() < n {
            return Err(CompileError::malformed_capture(
                &format!("'{}' would consume values from outside the capture", tok.lexeme),
                tok.line,
                tok.col,
            ));
        }
        Ok(elems.split_off(elems.len() - n))
    };

    match op {
        Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Mod => {
            let t = take(elems, 2)?;
            elems.push(arith_kind(t[0], t[1], op == Opcode::Add));
        }
        Opcode::Greater
        | Opcode::Less
        | Opcode::GreaterEq
        | Opcode::LessEq
        | Opcode::Equal
        | Opcode::Or
        | Opcode::And => {
            take(elems, 2)?;
            elems.push(Some(ValueKind::Bool));
        }
        Opcode::Not => {
            take(elems, 1)?;
            elems.push(Some(ValueKind::Bool));
        }
        Opcode::Dup => {
            let t = take(elems, 1)?;
            elems.push(t[0]);
            elems.push(t[0]);
        }
        Opcode::Swap => {
            let t = take(elems, 2)?;
            elems.push(t[1]);
            elems.push(t[0]);
        }
        Opcode::Rot => {
            let t = take(elems, 3)?;
            elems.push(t[1]);
            elems.push(t[2]);
            elems.push(t[0]);
        }
        Opcode::Drop | Opcode::Print | Opcode::Println => {
            take(elems, 1)?;
        }
        _ => {}
    }
    Ok(())
}

// =============================================================================
// Import resolution
// =============================================================================

/// `std:` paths resolve against `$ESO_STD` (default `std/`); everything else
/// is relative to the importing file. A missing extension defaults to `.eso`.
fn resolve_import(raw: &str, base_dir: &Path) -> PathBuf {
    let mut path = match raw.strip_prefix("std:") {
        Some(rest) => {
            let root = std::env::var("ESO_STD").unwrap_or_else(|_| "std".to_string());
            Path::new(&root).join(rest)
        }
        None => base_dir.join(raw),
    };
    if path.extension().is_none() {
        path.set_extension("eso");
    }
    path
}

fn content_hash(source: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    source.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::vm::Vm;

    fn compile_src(source: &str) -> Result<Program, CompileError> {
        Compiler::new(NativeRegistry::standard()).compile_source(source)
    }

    fn compile_ok(source: &str) -> Program {
        match compile_src(source) {
            Ok(p) => p,
            Err(e) => panic!("compile failed: {}", e),
        }
    }

    fn compile_err(source: &str) -> String {
        match compile_src(source) {
            Ok(_) => panic!("expected a compile error"),
            Err(e) => e.to_string(),
        }
    }

    fn run_ok(source: &str) -> Vm {
        let mut vm = Vm::new(compile_ok(source));
        if let Err(e) = vm.run() {
            panic!("run failed: {}", e);
        }
        vm
    }

    fn run_err(source: &str) -> String {
        let mut vm = Vm::new(compile_ok(source));
        match vm.run() {
            Ok(()) => panic!("expected a runtime error"),
            Err(e) => e.to_string(),
        }
    }

    /// Collects the (procedure, overload) operands of every CALL in order.
    fn call_targets(program: &Program) -> Vec<(usize, usize)> {
        let mut out = Vec::new();
        let mut at = 0;
        while at < program.code.len() {
            let op = Opcode::from_word(program.code[at]).unwrap();
            let width = match op {
                Opcode::Bind | Opcode::BindStrict | Opcode::BindParam | Opcode::Unbind => {
                    2 + program.code[at + 1]
                }
                Opcode::Call => {
                    out.push((program.code[at + 1], program.code[at + 2]));
                    3
                }
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
            at += width;
        }
        out
    }

    // =========================================================================
    // Emission shapes
    // =========================================================================

    #[test]
    fn test_arithmetic_statement_words() {
        let program = compile_ok("proc main() -> void { 1 2 + println }");
        assert_eq!(
            program.code,
            vec![
                Opcode::PushLit as Word,
                0,
                Opcode::PushLit as Word,
                1,
                Opcode::Add as Word,
                Opcode::Println as Word,
                Opcode::Halt as Word,
            ]
        );
        assert_eq!(*program.literals[0], Value::Int(1));
        assert_eq!(*program.literals[1], Value::Int(2));
    }

    #[test]
    fn test_empty_main_is_a_single_halt() {
        let program = compile_ok("proc main() -> void { }");
        assert_eq!(program.code, vec![Opcode::Halt as Word]);
    }

    #[test]
    fn test_literals_are_appended_not_deduped() {
        let program = compile_ok("proc main() -> void { 7 7 + drop }");
        assert_eq!(program.literals.len(), 2);
    }

    #[test]
    fn test_identifiers_are_interned() {
        let program = compile_ok("proc main() -> void { 5 bind x x x + bind x }");
        assert_eq!(program.identifiers, vec!["x"]);
    }

    #[test]
    fn test_if_else_patches_absolute_targets() {
        let program = compile_ok("proc main() -> void { true if { 1 print } else { 2 print } }");
        // 0: PUSH_LIT true   2: JUMP_FALSE -> else   4: PUSH_LIT 1
        // 6: PRINT           7: JUMP -> end          9: PUSH_LIT 2
        // 11: PRINT          12: HALT
        assert_eq!(program.code[2], Opcode::JumpFalse as Word);
        assert_eq!(program.code[3], 9);
        assert_eq!(program.code[7], Opcode::Jump as Word);
        assert_eq!(program.code[8], 12);
    }

    #[test]
    fn test_if_without_else_falls_through() {
        let program = compile_ok("proc main() -> void { true if { 1 print } }");
        assert_eq!(program.code[2], Opcode::JumpFalse as Word);
        assert_eq!(program.code[3], 7); // straight to HALT
    }

    #[test]
    fn test_loop_jumps_back_to_the_test() {
        let program = compile_ok("proc main() -> void { false loop { true } }");
        // 0: PUSH_LIT false   2: LOOP_JUMP -> 8   4: PUSH_LIT true
        // 6: JUMP -> 2        8: HALT
        assert_eq!(program.code[2], Opcode::LoopJump as Word);
        assert_eq!(program.code[3], 8);
        assert_eq!(program.code[6], Opcode::Jump as Word);
        assert_eq!(program.code[7], 2);
    }

    #[test]
    fn test_param_prelude_binds_in_declaration_order() {
        let program = compile_ok(
            "proc add(a: int, b: int) -> int { a b + }\n\
             proc main() -> void { |1 2| !add drop }",
        );
        let (_, overloads) = program.find_procedure("add").unwrap();
        let start = overloads[0].start;
        assert_eq!(program.code[start], Opcode::BindParam as Word);
        assert_eq!(program.code[start + 1], 2);
        let a = program.code[start + 2];
        let b = program.code[start + 3];
        assert_eq!(program.identifiers[a], "a");
        assert_eq!(program.identifiers[b], "b");
    }

    // =========================================================================
    // Overload resolution
    // =========================================================================

    #[test]
    fn test_known_kinds_select_the_exact_overload() {
        let program = compile_ok(
            "proc f(a: int, b: int) -> int { a }\n\
             proc f(a: float, b: float) -> float { a }\n\
             proc main() -> void { |1 2| !f drop |1.5 2.5| !f drop }",
        );
        assert_eq!(call_targets(&program), vec![(0, 0), (0, 1)]);
    }

    #[test]
    fn test_no_matching_overload_is_an_error() {
        let msg = compile_err(
            "proc f(a: int, b: int) -> void { }\n\
             proc main() -> void { |1.5 2.5| !f }",
        );
        assert!(msg.contains("no overload of 'f' matches"), "msg was: {}", msg);
    }

    #[test]
    fn test_unknown_kinds_fall_back_to_arity() {
        // after the if the tracker is cleared, so |! 1 | captures an unknown
        let program = compile_ok(
            "proc g(a: int) -> void { }\n\
             proc main() -> void { 1 true if { } |! 1 | !g }",
        );
        assert_eq!(call_targets(&program), vec![(0, 0)]);
    }

    #[test]
    fn test_unknown_kinds_with_two_candidates_is_ambiguous() {
        let msg = compile_err(
            "proc f(a: int, b: int) -> void { }\n\
             proc f(a: float, b: float) -> void { }\n\
             proc main() -> void { 1 2 true if { } |! 2 | !f }",
        );
        assert!(msg.contains("cannot statically resolve"), "msg was: {}", msg);
    }

    #[test]
    fn test_unknown_kinds_with_no_arity_match() {
        let msg = compile_err(
            "proc f(a: int) -> void { }\n\
             proc main() -> void { 1 2 true if { } |! 2 | !f }",
        );
        assert!(msg.contains("takes 2 argument"), "msg was: {}", msg);
    }

    #[test]
    fn test_call_tracks_declared_return_kinds() {
        // !pair leaves (int, float); the float picks g's float overload
        let program = compile_ok(
            "proc pair() -> int, float { 1 2.5 }\n\
             proc g(x: float) -> void { }\n\
             proc g(x: string) -> void { }\n\
             proc main() -> void { || !pair |! 1 | !g drop }",
        );
        assert_eq!(call_targets(&program), vec![(0, 0), (1, 0)]);
    }

    #[test]
    fn test_duplicate_overload_is_rejected() {
        let msg = compile_err(
            "proc f(a: int) -> void { }\n\
             proc f(b: int) -> void { }\n\
             proc main() -> void { }",
        );
        assert!(msg.contains("already exists"), "msg was: {}", msg);
    }

    #[test]
    fn test_undeclared_procedure() {
        let msg = compile_err("proc main() -> void { |1| !nope }");
        assert!(msg.contains("undeclared procedure 'nope'"), "msg was: {}", msg);
    }

    #[test]
    fn test_native_calls_encode_the_registry_index() {
        let program = compile_ok("proc main() -> void { @stack_len drop }");
        let expected = program.find_native("stack_len").unwrap();
        let native_at = program
            .code
            .iter()
            .position(|&w| w == Opcode::NativeCall as Word)
            .unwrap();
        assert_eq!(program.code[native_at + 1], expected);
    }

    #[test]
    fn test_undeclared_native() {
        let msg = compile_err("proc main() -> void { @no_such_builtin }");
        assert!(
            msg.contains("undeclared native 'no_such_builtin'"),
            "msg was: {}",
            msg
        );
    }

    #[test]
    fn test_declaration_must_precede_use() {
        let msg = compile_err(
            "proc main() -> void { || !later }\n\
             proc later() -> void { }",
        );
        assert!(msg.contains("undeclared procedure 'later'"), "msg was: {}", msg);
    }

    #[test]
    fn test_call_requires_adjacent_capture() {
        let msg = compile_err(
            "proc f() -> void { }\n\
             proc main() -> void { || drop !f }",
        );
        assert!(msg.contains("immediately preceded"), "msg was: {}", msg);
    }

    #[test]
    fn test_capture_inside_branch_is_not_adjacent_after_it() {
        let msg = compile_err(
            "proc f(a: int) -> void { }\n\
             proc main() -> void { true if { |1| } !f }",
        );
        assert!(msg.contains("immediately preceded"), "msg was: {}", msg);
    }

    // =========================================================================
    // Captures
    // =========================================================================

    #[test]
    fn test_capture_counts_its_net_values() {
        let program = compile_ok("proc main() -> void { |1 2 + 3| drop }");
        // the body nets two values: 1+2 and 3
        let cap_at = program
            .code
            .iter()
            .position(|&w| w == Opcode::Capture as Word)
            .unwrap();
        assert_eq!(program.code[cap_at + 1], 2);
    }

    #[test]
    fn test_inner_bar_closes_the_capture() {
        // captures cannot nest: |1 | 2 | 3| is a capture, a bare push,
        // and a second capture
        let program = compile_ok("proc main() -> void { |1 | 2 | 3| drop drop drop }");
        let captures = program
            .code
            .iter()
            .filter(|&&w| w == Opcode::Capture as Word)
            .count();
        assert_eq!(captures, 2);
        run_ok("proc main() -> void { |1 | 2 | 3| drop drop drop }");
    }

    #[test]
    fn test_capture_may_not_reach_outside() {
        let msg = compile_err("proc main() -> void { 1 |dup| drop drop }");
        assert!(msg.contains("malformed capture"), "msg was: {}", msg);
        assert!(msg.contains("outside the capture"), "msg was: {}", msg);
    }

    #[test]
    fn test_control_flow_is_not_allowed_in_captures() {
        let msg = compile_err("proc main() -> void { |true if { }| drop }");
        assert!(msg.contains("malformed capture"), "msg was: {}", msg);
        assert!(msg.contains("'if'"), "msg was: {}", msg);
    }

    #[test]
    fn test_unterminated_capture() {
        let msg = compile_err("proc main() -> void { |1 2 }");
        assert!(msg.contains("malformed capture"), "msg was: {}", msg);
    }

    #[test]
    fn test_dynamic_capture_wraps_existing_values() {
        let program = compile_ok(
            "proc f(a: int, b: int) -> void { }\n\
             proc main() -> void { 1 2 |! 2 | !f }",
        );
        assert_eq!(call_targets(&program), vec![(0, 0)]);
        let cap_at = program
            .code
            .iter()
            .position(|&w| w == Opcode::Capture as Word)
            .unwrap();
        assert_eq!(program.code[cap_at + 1], 2);
    }

    // =========================================================================
    // Procedure headers
    // =========================================================================

    #[test]
    fn test_main_takes_no_parameters() {
        let msg = compile_err("proc main(a: int) -> void { }");
        assert!(msg.contains("main takes no parameters"), "msg was: {}", msg);
    }

    #[test]
    fn test_main_returns_void() {
        let msg = compile_err("proc main() -> int { 1 }");
        assert!(msg.contains("return void"), "msg was: {}", msg);
    }

    #[test]
    fn test_multiple_mains_are_rejected() {
        let msg = compile_err(
            "proc main() -> void { }\n\
             proc main() -> void { }",
        );
        assert!(msg.contains("multiple definitions of 'main'"), "msg was: {}", msg);
    }

    #[test]
    fn test_void_cannot_join_other_returns() {
        let msg = compile_err("proc f() -> void, int { 1 }\nproc main() -> void { }");
        assert!(msg.contains("'void' cannot be combined"), "msg was: {}", msg);
    }

    #[test]
    fn test_void_is_not_a_parameter_type() {
        let msg = compile_err("proc f(a: void) -> void { }\nproc main() -> void { }");
        assert!(msg.contains("not a valid parameter type"), "msg was: {}", msg);
    }

    #[test]
    fn test_duplicate_parameter_names() {
        let msg = compile_err("proc f(a: int, a: int) -> void { }\nproc main() -> void { }");
        assert!(msg.contains("duplicate parameter name"), "msg was: {}", msg);
    }

    #[test]
    fn test_nested_procs_are_rejected() {
        let msg = compile_err("proc main() -> void { proc x() -> void { } }");
        assert!(msg.contains("nested procedure"), "msg was: {}", msg);
    }

    #[test]
    fn test_using_is_top_level_only() {
        let msg = compile_err("proc main() -> void { using 'x' }");
        assert!(msg.contains("only allowed at the top level"), "msg was: {}", msg);
    }

    #[test]
    fn test_structs_parse_to_nothing() {
        let program = compile_ok(
            "struct point { x: int, y: int }\n\
             proc main() -> void { }",
        );
        assert_eq!(program.procedures.len(), 1);
        assert_eq!(program.code, vec![Opcode::Halt as Word]);
    }

    // =========================================================================
    // End-to-end through the VM
    // =========================================================================

    #[test]
    fn test_println_pops_its_operand() {
        // prints 3; an unpopped operand would fail the final halt
        run_ok("proc main() -> void { 1 2 + println }");
    }

    #[test]
    fn test_overloaded_add_runs_both_variants() {
        run_ok(
            "proc add(a: int, b: int) -> int { a b + }\n\
             proc add(a: float, b: float) -> float { a b + }\n\
             proc main() -> void { |1 2| !add println |1.5 2.5| !add println }",
        );
    }

    #[test]
    fn test_loop_counts_to_its_bound() {
        let vm = run_ok(
            "proc main() -> void {\n\
             0 bind i\n\
             i 3 <\n\
             loop {\n\
               i 1 + bind i\n\
               i 3 <\n\
             }\n\
             }",
        );
        assert_eq!(*vm.frame_binding("i").unwrap(), Value::Int(3));
    }

    #[test]
    fn test_bindings_survive_across_statements() {
        let vm = run_ok("proc main() -> void { 2 3 bind x, y x y + bind sum }");
        // rightmost name takes the top of the stack
        assert_eq!(*vm.frame_binding("x").unwrap(), Value::Int(2));
        assert_eq!(*vm.frame_binding("y").unwrap(), Value::Int(3));
        assert_eq!(*vm.frame_binding("sum").unwrap(), Value::Int(5));
    }

    #[test]
    fn test_return_in_main_halts_cleanly() {
        run_ok("proc main() -> void { return 1 }");
    }

    #[test]
    fn test_leftover_values_fail_the_halt() {
        let msg = run_err("proc main() -> void { 1 }");
        assert!(msg.contains("halting with"), "msg was: {}", msg);
    }

    #[test]
    fn test_multi_value_returns_arrive_in_push_order() {
        let vm = run_ok(
            "proc pair() -> int, int { 1 2 }\n\
             proc main() -> void { || !pair bind a, b }",
        );
        assert_eq!(*vm.frame_binding("a").unwrap(), Value::Int(1));
        assert_eq!(*vm.frame_binding("b").unwrap(), Value::Int(2));
    }

    #[test]
    fn test_capture_snapshots_bound_values() {
        let vm = run_ok(
            "proc id(x: int) -> int { x }\n\
             proc main() -> void { 5 bind n |n| !id bind out }",
        );
        assert_eq!(*vm.frame_binding("out").unwrap(), Value::Int(5));
    }

    // =========================================================================
    // Imports
    // =========================================================================

    fn temp_file(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_import_brings_procedures_in() {
        let lib = temp_file("eso_import_lib.eso", "proc inc(a: int) -> int { a 1 + }");
        let root = temp_file(
            "eso_import_root.eso",
            &format!(
                "using '{}'\nproc main() -> void {{ |1| !inc drop }}",
                lib.display()
            ),
        );
        let program = Compiler::new(NativeRegistry::standard())
            .compile_file(&root)
            .unwrap();
        assert!(program.find_procedure("inc").is_some());
    }

    #[test]
    fn test_duplicate_import_is_skipped() {
        let lib = temp_file("eso_dup_lib.eso", "proc twice(a: int) -> int { a a + }");
        let root = temp_file(
            "eso_dup_root.eso",
            &format!(
                "using '{}'\nusing '{}'\nproc main() -> void {{ |4| !twice drop }}",
                lib.display(),
                lib.display()
            ),
        );
        let program = Compiler::new(NativeRegistry::standard())
            .compile_file(&root)
            .unwrap();
        let (_, overloads) = program.find_procedure("twice").unwrap();
        assert_eq!(overloads.len(), 1);
    }

    #[test]
    fn test_imported_main_is_discarded() {
        let lib = temp_file(
            "eso_main_lib.eso",
            "proc helper() -> int { 9 }\nproc main() -> void { 1 println }",
        );
        let root = temp_file(
            "eso_main_root.eso",
            &format!(
                "using '{}'\nproc main() -> void {{ || !helper drop }}",
                lib.display()
            ),
        );
        let program = Compiler::new(NativeRegistry::standard())
            .compile_file(&root)
            .unwrap();
        let (_, overloads) = program.find_procedure("main").unwrap();
        assert_eq!(overloads.len(), 1);

        let mut vm = Vm::new(program);
        vm.run().unwrap();
    }

    #[test]
    fn test_missing_import_is_a_compile_error() {
        let msg = compile_err("using 'no_such_file_anywhere'\nproc main() -> void { }");
        assert!(msg.contains("cannot read"), "msg was: {}", msg);
        // the default extension gets appended first
        assert!(msg.contains("no_such_file_anywhere.eso"), "msg was: {}", msg);
    }
}
