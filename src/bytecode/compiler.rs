//! The bytecode emitter: a second visitor over the same AST the checker
//! walked, re-entering the symbol table's scope tree via
//! `reset_scopes`/`start_scope` so both passes see identical scope
//! boundaries without the AST needing to carry its own copy of them (spec
//! §4.6).
//!
//! Variable references are resolved the same way `qcc`'s compiler resolves
//! them: a name found among the current function's locals becomes a
//! `GetLocal`/`SetLocal` slot access; failing that, a name captured from an
//! enclosing function becomes an upvalue; failing that, it's a global.

use std::rc::Rc;

use crate::ast::{BinaryOp, ClassDecl, Expr, FunctionDecl, Literal, LoopGoto, Module, Stmt, UnaryOp};
use crate::bytecode::builder::CodeBuilder;
use crate::bytecode::chunk::{Code, Constant};
use crate::bytecode::op::Opcode;
use crate::symbol::{ScopeId, SymbolTable};
use crate::type_pool::TypePool;
use crate::value::FunctionProto;

struct LocalVar {
    name: String,
    depth: u32,
}

#[derive(Clone, Copy)]
enum UpvalueSource {
    Local(u8),
    Upvalue(u8),
}

struct LoopContext {
    loop_start: usize,
    break_jumps: Vec<usize>,
}

struct FunctionFrame {
    builder: CodeBuilder,
    locals: Vec<LocalVar>,
    upvalues: Vec<UpvalueSource>,
    scope_depth: u32,
    loops: Vec<LoopContext>,
    name: String,
    arity: u8,
}

impl FunctionFrame {
    fn new(name: impl Into<String>) -> Self {
        Self {
            builder: CodeBuilder::new(),
            locals: Vec::new(),
            upvalues: Vec::new(),
            scope_depth: 0,
            loops: Vec::new(),
            name: name.into(),
            arity: 0,
        }
    }

    fn resolve_local(&self, name: &str) -> Option<u8> {
        self.locals.iter().rposition(|l| l.name == name).map(|i| i as u8)
    }
}

/// Walks a checked AST and produces bytecode for it. Carries its own stack
/// of `FunctionFrame`s (one per nested function currently being compiled),
/// mirroring how the parser's own recursive descent nests function bodies.
pub struct Compiler<'a> {
    symbols: &'a mut SymbolTable,
    types: &'a TypePool,
    frames: Vec<FunctionFrame>,
}

impl<'a> Compiler<'a> {
    pub fn new(symbols: &'a mut SymbolTable, types: &'a TypePool) -> Self {
        Self { symbols, types, frames: vec![FunctionFrame::new("<script>")] }
    }

    fn frame(&mut self) -> &mut FunctionFrame {
        self.frames.last_mut().expect("at least the script frame is always present")
    }

    pub fn compile_module(mut self, module: &Module) -> Code {
        self.symbols.reset_scopes();
        for stmt in &module.stmts {
            self.compile_stmt(stmt);
        }
        self.frame().builder.emit(Opcode::Nil);
        self.frame().builder.emit(Opcode::Return);
        self.frames.pop().unwrap().builder.finish()
    }

    fn begin_scope(&mut self) {
        self.frame().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        let frame = self.frame();
        frame.scope_depth -= 1;
        let depth = frame.scope_depth;
        while let Some(last) = frame.locals.last() {
            if last.depth > depth {
                frame.builder.emit(Opcode::Pop);
                frame.locals.pop();
            } else {
                break;
            }
        }
    }

    fn compile_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Expr(expr) => {
                self.compile_expr(expr);
                self.frame().builder.emit(Opcode::Pop);
            }
            Stmt::Var { name, init, span, .. } => {
                self.frame().builder.set_location(span.line);
                match init {
                    Some(expr) => self.compile_expr(expr),
                    None => self.frame().builder.emit(Opcode::Nil),
                }
                self.declare_variable(name);
            }
            Stmt::Function(decl) => {
                self.compile_function(decl);
                self.declare_variable(&decl.name);
            }
            Stmt::List(stmts) => {
                for s in stmts {
                    self.compile_stmt(s);
                }
            }
            Stmt::Block { stmts, scope } => {
                self.enter_block(*scope, stmts);
            }
            Stmt::Return { value, span } => {
                self.frame().builder.set_location(span.line);
                match value {
                    Some(expr) => self.compile_expr(expr),
                    None => self.frame().builder.emit(Opcode::Nil),
                }
                self.frame().builder.emit(Opcode::Return);
            }
            Stmt::If { cond, then_branch, else_branch } => {
                self.compile_expr(cond);
                let then_jump = self.frame().builder.emit_jump(Opcode::JumpIfFalse);
                self.frame().builder.emit(Opcode::Pop);
                self.compile_stmt(then_branch);
                let else_jump = self.frame().builder.emit_jump(Opcode::Jump);
                self.frame().builder.patch_jump(then_jump);
                self.frame().builder.emit(Opcode::Pop);
                if let Some(else_branch) = else_branch {
                    self.compile_stmt(else_branch);
                }
                self.frame().builder.patch_jump(else_jump);
            }
            Stmt::For { init, cond, step, body, scope } => {
                let _ = scope;
                self.begin_scope();
                self.symbols.start_scope();
                if let Some(init) = init {
                    self.compile_stmt(init);
                }
                let loop_start = self.frame().builder.current_offset();
                self.frame().loops.push(LoopContext { loop_start, break_jumps: Vec::new() });

                let exit_jump = cond.as_ref().map(|cond| {
                    self.compile_expr(cond);
                    let j = self.frame().builder.emit_jump(Opcode::JumpIfFalse);
                    self.frame().builder.emit(Opcode::Pop);
                    j
                });

                self.compile_stmt(body);

                if let Some(step) = step {
                    self.compile_expr(step);
                    self.frame().builder.emit(Opcode::Pop);
                }
                self.frame().builder.emit_loop(loop_start);

                if let Some(exit_jump) = exit_jump {
                    self.frame().builder.patch_jump(exit_jump);
                    self.frame().builder.emit(Opcode::Pop);
                }
                let ctx = self.frame().loops.pop().unwrap();
                for break_jump in ctx.break_jumps {
                    self.frame().builder.patch_jump(break_jump);
                }
                self.end_scope();
            }
            Stmt::While { cond, body } => {
                let loop_start = self.frame().builder.current_offset();
                self.frame().loops.push(LoopContext { loop_start, break_jumps: Vec::new() });
                self.compile_expr(cond);
                let exit_jump = self.frame().builder.emit_jump(Opcode::JumpIfFalse);
                self.frame().builder.emit(Opcode::Pop);
                self.compile_stmt(body);
                self.frame().builder.emit_loop(loop_start);
                self.frame().builder.patch_jump(exit_jump);
                self.frame().builder.emit(Opcode::Pop);
                let ctx = self.frame().loops.pop().unwrap();
                for break_jump in ctx.break_jumps {
                    self.frame().builder.patch_jump(break_jump);
                }
            }
            Stmt::LoopGoto(kind, span) => {
                self.frame().builder.set_location(span.line);
                match kind {
                    LoopGoto::Break => {
                        let jump = self.frame().builder.emit_jump(Opcode::Jump);
                        self.frame().loops.last_mut().expect("checker rejects break outside a loop").break_jumps.push(jump);
                    }
                    LoopGoto::Continue => {
                        let loop_start = self.frame().loops.last().expect("checker rejects continue outside a loop").loop_start;
                        self.frame().builder.emit_loop(loop_start);
                    }
                }
            }
            Stmt::Typealias { .. } => {
                // Purely a type-level declaration; nothing to emit.
            }
            Stmt::Import { .. } => {
                // The parser flattens an import's contents into a
                // `Stmt::List` already merged into the enclosing module; a
                // bare `Stmt::Import` left over (an already-loaded repeat)
                // carries nothing to compile.
            }
            Stmt::NativeFunction { .. } | Stmt::NativeClass { .. } => {
                // Resolved through the native registry at call time, not
                // through emitted bytecode.
            }
            Stmt::Class(decl) => {
                self.compile_class(decl);
            }
        }
    }

    fn enter_block(&mut self, scope: ScopeId, stmts: &[Stmt]) {
        let _ = scope;
        self.begin_scope();
        self.symbols.start_scope();
        for stmt in stmts {
            self.compile_stmt(stmt);
        }
        self.end_scope();
    }

    /// Emits the initializer, then binds `name` either as a local slot (if
    /// we're below the function's top scope) or as a global.
    fn declare_variable(&mut self, name: &str) {
        if self.frame().scope_depth > 0 {
            self.frame().locals.push(LocalVar { name: name.to_string(), depth: self.frame().scope_depth });
        } else {
            let const_index = self.frame().builder.add_constant(Constant::Str(name.to_string()));
            self.frame().builder.emit_op_u16(Opcode::DefineGlobal, const_index);
        }
    }

    fn compile_function(&mut self, decl: &FunctionDecl) {
        let mut frame = FunctionFrame::new(decl.name.clone());
        frame.arity = decl.params.len() as u8;
        self.frames.push(frame);
        self.begin_scope();
        self.symbols.start_scope();
        for param in &decl.params {
            let depth = self.frame().scope_depth;
            self.frame().locals.push(LocalVar { name: param.name.clone(), depth });
        }
        for stmt in &decl.body {
            self.compile_stmt(stmt);
        }
        self.frame().builder.emit(Opcode::Nil);
        self.frame().builder.emit(Opcode::Return);
        self.end_scope();

        let finished = self.frames.pop().unwrap();
        let upvalue_count = finished.upvalues.len() as u8;
        let code = finished.builder.finish();
        let proto = Rc::new(FunctionProto {
            name: finished.name,
            arity: finished.arity,
            upvalue_count,
            param_types: decl.params.iter().map(|p| p.type_annotation).collect(),
            return_type: decl.return_type,
            code,
        });

        let const_index = self.frame().builder.add_constant(Constant::Function(proto));
        self.frame().builder.emit_op_u16(Opcode::MakeClosure, const_index);
        for upvalue in &finished.upvalues {
            match upvalue {
                UpvalueSource::Local(index) => {
                    self.frame().builder.emit_u8(1);
                    self.frame().builder.emit_u8(*index);
                }
                UpvalueSource::Upvalue(index) => {
                    self.frame().builder.emit_u8(0);
                    self.frame().builder.emit_u8(*index);
                }
            }
        }
    }

    /// Classes compile to a `MakeClass` instruction: every method is
    /// compiled first (each leaves a closure on the stack), then `MakeClass`
    /// pops exactly that many closures off and pairs them with the method
    /// names that follow its operands, building the class object in one
    /// step (mirrors how `MakeArray` collects its elements off the stack).
    fn compile_class(&mut self, decl: &ClassDecl) {
        for method in &decl.methods {
            self.compile_function(method);
        }
        let name_index = self.frame().builder.add_constant(Constant::Str(decl.name.clone()));
        self.frame().builder.emit(Opcode::MakeClass);
        self.frame().builder.emit_u16(name_index);

        self.frame().builder.emit_u8(decl.vars.len() as u8);
        for var in &decl.vars {
            let field_index = self.frame().builder.add_constant(Constant::Str(var.name.clone()));
            self.frame().builder.emit_u16(field_index);
        }

        self.frame().builder.emit_u8(decl.methods.len() as u8);
        for method in &decl.methods {
            let method_index = self.frame().builder.add_constant(Constant::Str(method.name.clone()));
            self.frame().builder.emit_u16(method_index);
        }

        self.declare_variable(&decl.name);
    }

    fn compile_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Literal(literal, span) => {
                self.frame().builder.set_location(span.line);
                match literal {
                    Literal::Number(n) => self.frame().builder.emit_constant(Constant::Number(*n)),
                    Literal::Bool(true) => self.frame().builder.emit(Opcode::True),
                    Literal::Bool(false) => self.frame().builder.emit(Opcode::False),
                    Literal::Nil => self.frame().builder.emit(Opcode::Nil),
                    Literal::String(s) => self.frame().builder.emit_constant(Constant::Str(s.clone())),
                }
            }
            Expr::Identifier(name, span) => {
                self.frame().builder.set_location(span.line);
                self.load_variable(name);
            }
            Expr::Assignment { name, value, span } => {
                self.compile_expr(value);
                self.frame().builder.set_location(span.line);
                self.store_variable(name);
            }
            Expr::Unary { op, operand, span } => {
                self.compile_expr(operand);
                self.frame().builder.set_location(span.line);
                match op {
                    UnaryOp::Negate => self.frame().builder.emit(Opcode::Negate),
                    UnaryOp::Not => self.frame().builder.emit(Opcode::Not),
                }
            }
            Expr::Binary { op, left, right, span } => self.compile_binary(op, left, right, span.line),
            Expr::Call { callee, args, span } => {
                self.compile_expr(callee);
                for arg in args {
                    self.compile_expr(arg);
                }
                self.frame().builder.set_location(span.line);
                self.frame().builder.emit_op_u8(Opcode::Call, args.len() as u8);
            }
            Expr::New { class_name, args, span } => {
                for arg in args {
                    self.compile_expr(arg);
                }
                self.frame().builder.set_location(span.line);
                let name_index = self.frame().builder.add_constant(Constant::Str(class_name.clone()));
                self.frame().builder.emit(Opcode::New);
                self.frame().builder.emit_u16(name_index);
                self.frame().builder.emit_u8(args.len() as u8);
            }
            Expr::Prop { object, name, span } => {
                self.compile_expr(object);
                self.frame().builder.set_location(span.line);
                let const_index = self.frame().builder.add_constant(Constant::Str(name.clone()));
                self.frame().builder.emit_op_u16(Opcode::GetProp, const_index);
            }
            Expr::PropAssign { object, name, value, span } => {
                self.compile_expr(object);
                self.compile_expr(value);
                self.frame().builder.set_location(span.line);
                let const_index = self.frame().builder.add_constant(Constant::Str(name.clone()));
                self.frame().builder.emit_op_u16(Opcode::SetProp, const_index);
            }
            Expr::Array { elements, span, .. } => {
                for element in elements {
                    self.compile_expr(element);
                }
                self.frame().builder.set_location(span.line);
                self.frame().builder.emit_op_u16(Opcode::MakeArray, elements.len() as u16);
            }
            Expr::Cast { target, operand, span } => {
                self.compile_expr(operand);
                if self.types.type_equals(*target, self.types.bool_()) {
                    self.frame().builder.set_location(span.line);
                    self.frame().builder.emit(Opcode::CastToBool);
                }
            }
        }
    }

    fn compile_binary(&mut self, op: &BinaryOp, left: &Expr, right: &Expr, line: u32) {
        self.compile_expr(left);
        self.compile_expr(right);
        self.frame().builder.set_location(line);
        match op {
            BinaryOp::Add => self.frame().builder.emit(Opcode::Add),
            BinaryOp::Sub => self.frame().builder.emit(Opcode::Sub),
            BinaryOp::Mul => self.frame().builder.emit(Opcode::Mul),
            BinaryOp::Div => self.frame().builder.emit(Opcode::Div),
            BinaryOp::Mod => self.frame().builder.emit(Opcode::Mod),
            BinaryOp::Equal => self.frame().builder.emit(Opcode::Equal),
            BinaryOp::Greater => self.frame().builder.emit(Opcode::Greater),
            BinaryOp::Lower => self.frame().builder.emit(Opcode::Lower),
            BinaryOp::And => self.frame().builder.emit(Opcode::And),
            BinaryOp::Or => self.frame().builder.emit(Opcode::Or),
            BinaryOp::NotEqual => {
                self.frame().builder.emit(Opcode::Equal);
                self.frame().builder.emit(Opcode::Not);
            }
            BinaryOp::GreaterEqual => {
                self.frame().builder.emit(Opcode::Lower);
                self.frame().builder.emit(Opcode::Not);
            }
            BinaryOp::LowerEqual => {
                self.frame().builder.emit(Opcode::Greater);
                self.frame().builder.emit(Opcode::Not);
            }
        }
    }

    fn load_variable(&mut self, name: &str) {
        if let Some(slot) = self.frame().resolve_local(name) {
            self.frame().builder.emit_op_u8(Opcode::GetLocal, slot);
            return;
        }
        if let Some(index) = self.resolve_upvalue(self.frames.len() - 1, name) {
            self.frame().builder.emit_op_u8(Opcode::GetUpvalue, index);
            return;
        }
        let const_index = self.frame().builder.add_constant(Constant::Str(name.to_string()));
        self.frame().builder.emit_op_u16(Opcode::GetGlobal, const_index);
    }

    fn store_variable(&mut self, name: &str) {
        if let Some(slot) = self.frame().resolve_local(name) {
            self.frame().builder.emit_op_u8(Opcode::SetLocal, slot);
            return;
        }
        if let Some(index) = self.resolve_upvalue(self.frames.len() - 1, name) {
            self.frame().builder.emit_op_u8(Opcode::SetUpvalue, index);
            return;
        }
        let const_index = self.frame().builder.add_constant(Constant::Str(name.to_string()));
        self.frame().builder.emit_op_u16(Opcode::SetGlobal, const_index);
    }

    /// Resolves `name` as an upvalue of `self.frames[frame_index]`, walking
    /// outward and recording a capture chain at every level in between —
    /// the same scheme `qcc` uses to promote a variable from an enclosing
    /// function into a chain of upvalues as needed.
    fn resolve_upvalue(&mut self, frame_index: usize, name: &str) -> Option<u8> {
        if frame_index == 0 {
            return None;
        }
        let enclosing = frame_index - 1;
        if let Some(local_slot) = self.frames[enclosing].resolve_local(name) {
            return Some(self.add_upvalue(frame_index, UpvalueSource::Local(local_slot)));
        }
        let outer_upvalue = self.resolve_upvalue(enclosing, name)?;
        Some(self.add_upvalue(frame_index, UpvalueSource::Upvalue(outer_upvalue)))
    }

    fn add_upvalue(&mut self, frame_index: usize, source: UpvalueSource) -> u8 {
        let frame = &mut self.frames[frame_index];
        for (i, existing) in frame.upvalues.iter().enumerate() {
            match (existing, &source) {
                (UpvalueSource::Local(a), UpvalueSource::Local(b)) if a == b => return i as u8,
                (UpvalueSource::Upvalue(a), UpvalueSource::Upvalue(b)) if a == b => return i as u8,
                _ => {}
            }
        }
        frame.upvalues.push(source);
        (frame.upvalues.len() - 1) as u8
    }
}
