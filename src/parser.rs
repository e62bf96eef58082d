//! Recursive-descent parser with Pratt expression parsing, grounded on
//! `qcc/parser.c`'s grammar and precedence table (spec §4.2).
//!
//! Per spec.md §9's design note preferring a tagged-variant AST over a
//! function-pointer vtable, prefix/infix dispatch here is a `match` on
//! `TokenKind` rather than a `ParseRule` table of function pointers — same
//! grammar, idiomatic Rust shape. Assignment detection is inline in
//! `identifier`/`prop`, exactly like the original's `can_assign`-threaded
//! design, rather than a separate `parse_assignment` wrapper: that keeps
//! `a.b = c` and `a = b` from needing a post-hoc rewrite of an already-built
//! expression node.
//!
//! The two intrinsic classes (`Array`, `String`) are registered directly
//! into the symbol table before any user source is read, the way
//! `qcc/parser.c`'s `parse_global` unconditionally calls `native_class` for
//! both before looking at a single token of the program. `import` of a
//! *native* module (as opposed to a file) has no counterpart in this
//! crate's `SourceProvider`, which only exposes `load`; `Stmt::NativeFunction`
//! is therefore a reachable AST shape for an embedder to construct directly,
//! but this parser never produces one itself.

use std::path::PathBuf;

use crate::ast::{
    BinaryOp, ClassDecl, ClassMemberVar, Expr, FunctionDecl, Literal, LoopGoto, Module, Param, Span, Stmt, UnaryOp,
};
use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::lexer::Lexer;
use crate::source::{ImportTracker, SourceProvider};
use crate::symbol::{ClassInfo, FunctionInfo, SymbolKind, SymbolTable, Visibility};
use crate::symbol::Symbol;
use crate::token::{FileId, Token, TokenKind};
use crate::type_pool::{Type, TypePool, TypeRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    None,
    Assignment,
    Or,
    And,
    Equality,
    Comparison,
    Term,
    Factor,
    Unary,
    Call,
    Cast,
    Primary,
}

impl Precedence {
    fn next(self) -> Self {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary => Precedence::Call,
            Precedence::Call => Precedence::Cast,
            Precedence::Cast | Precedence::Primary => Precedence::Primary,
        }
    }
}

fn precedence_of(kind: TokenKind) -> Precedence {
    match kind {
        TokenKind::Plus | TokenKind::Minus => Precedence::Term,
        TokenKind::Star | TokenKind::Slash | TokenKind::Percent => Precedence::Factor,
        TokenKind::AndAnd => Precedence::And,
        TokenKind::OrOr => Precedence::Or,
        TokenKind::EqualEqual | TokenKind::BangEqual => Precedence::Equality,
        TokenKind::Lower | TokenKind::LowerEqual | TokenKind::Greater | TokenKind::GreaterEqual => Precedence::Comparison,
        TokenKind::LeftParen | TokenKind::Dot => Precedence::Call,
        _ => Precedence::None,
    }
}

/// Parses `source` as a complete compilation unit: the two intrinsic native
/// classes are registered first, then every top-level declaration, into
/// `symbols`/`types`, accumulating diagnostics rather than stopping at the
/// first error (spec §7.2).
pub fn parse_module(
    source: &str,
    file: FileId,
    symbols: &mut SymbolTable,
    types: &mut TypePool,
    diagnostics: &mut DiagnosticSink,
    provider: Option<&dyn SourceProvider>,
) -> Module {
    let mut tracker = ImportTracker::new();
    let mut parser = Parser::new(source, file.clone(), symbols, types, diagnostics, &mut tracker, provider);
    let stmts = parser.parse_top_level();
    Module { file, stmts }
}

fn parse_imported(
    source: &str,
    file: FileId,
    symbols: &mut SymbolTable,
    types: &mut TypePool,
    diagnostics: &mut DiagnosticSink,
    import_tracker: &mut ImportTracker,
    provider: Option<&dyn SourceProvider>,
) -> Vec<Stmt> {
    let mut parser = Parser::new(source, file, symbols, types, diagnostics, import_tracker, provider);
    parser.write_declaration_block(TokenKind::End)
}

struct Parser<'src, 'ctx> {
    source: &'src str,
    lexer: Lexer<'src>,
    current: Token<'src>,
    previous: Token<'src>,

    symbols: &'ctx mut SymbolTable,
    types: &'ctx mut TypePool,
    diagnostics: &'ctx mut DiagnosticSink,
    import_tracker: &'ctx mut ImportTracker,
    provider: Option<&'ctx dyn SourceProvider>,

    panic_mode: bool,
    scope_depth: u32,
    function_depth: u32,
    is_in_loop: bool,
    current_class: Option<TypeRef>,
}

impl<'src, 'ctx> Parser<'src, 'ctx> {
    fn new(
        source: &'src str,
        file: FileId,
        symbols: &'ctx mut SymbolTable,
        types: &'ctx mut TypePool,
        diagnostics: &'ctx mut DiagnosticSink,
        import_tracker: &'ctx mut ImportTracker,
        provider: Option<&'ctx dyn SourceProvider>,
    ) -> Self {
        let mut lexer = Lexer::new(source, file);
        let first = lexer.next_token();
        Self {
            source,
            lexer,
            previous: first.clone(),
            current: first,
            symbols,
            types,
            diagnostics,
            import_tracker,
            provider,
            panic_mode: false,
            scope_depth: 0,
            function_depth: 0,
            is_in_loop: false,
            current_class: None,
        }
    }

    // ---- token stream plumbing -------------------------------------------------

    fn advance(&mut self) {
        if self.current.kind == TokenKind::End {
            return;
        }
        self.previous = self.current.clone();
        self.current = self.lexer.next_token();
        if self.current.kind == TokenKind::Error {
            self.error_current("unexpected character");
            // Lexical errors are fatal (spec §7.1): stop scanning rather
            // than risk cascading nonsense tokens.
            self.current = Token { kind: TokenKind::End, ..self.current.clone() };
        }
    }

    fn consume(&mut self, expected: TokenKind, message: &str) -> bool {
        if self.current.kind != expected {
            self.error_current(message);
            return false;
        }
        self.advance();
        true
    }

    fn prev_span(&self) -> Span {
        Span { line: self.previous.line, column: self.previous.column }
    }

    fn current_span(&self) -> Span {
        Span { line: self.current.line, column: self.current.column }
    }

    fn error_current(&mut self, message: &str) {
        let token = self.current.clone();
        self.error_at(&token, message);
    }

    fn error_prev(&mut self, message: &str) {
        let token = self.previous.clone();
        self.error_at(&token, message);
    }

    /// Suppresses every error after the first one per synchronization
    /// window, matching `qcc/parser.c`'s `error_at` — otherwise a single
    /// missing token can cascade into dozens of misleading diagnostics.
    fn error_at(&mut self, token: &Token, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        let source_line = self.source.lines().nth(token.line.saturating_sub(1) as usize).unwrap_or("").to_string();
        self.diagnostics.push(Diagnostic::error(token.file.clone(), token.line, token.column, source_line, message));
    }

    fn synchronize(&mut self) {
        self.panic_mode = false;
        loop {
            match self.current.kind {
                TokenKind::Semicolon => {
                    self.advance();
                    return;
                }
                TokenKind::Var
                | TokenKind::Function
                | TokenKind::Continue
                | TokenKind::Break
                | TokenKind::If
                | TokenKind::While
                | TokenKind::For
                | TokenKind::Return
                | TokenKind::End => return,
                _ => self.advance(),
            }
        }
    }

    // ---- intrinsic classes ------------------------------------------------------

    fn parse_top_level(&mut self) -> Vec<Stmt> {
        let mut stmts = vec![self.native_class_stmt("Array"), self.native_class_stmt("String")];
        stmts.extend(self.write_declaration_block(TokenKind::End));
        stmts
    }

    fn native_class_stmt(&mut self, name: &str) -> Stmt {
        let span = Span { line: 0, column: 0 };
        let class_ty = self.types.class(name);
        let mut symbol = Symbol::new(name, SymbolKind::Class, class_ty, 0, 0);
        symbol.global = true;
        symbol.assigned = true;
        symbol.native = true;
        let sym_id = self.symbols.insert(symbol).expect("intrinsic class names never collide with user source");

        self.symbols.create_class_scope();
        let body_scope = self.symbols.current_scope();
        let any = self.types.any();
        let number = self.types.number();
        let void = self.types.void();
        let methods: Vec<(&str, Vec<TypeRef>, TypeRef)> = match name {
            "Array" => vec![
                ("push", vec![any], void),
                ("get", vec![number], any),
                ("set", vec![number, any], void),
                ("length", vec![], number),
            ],
            "String" => {
                let string = self.types.string();
                vec![
                    ("length", vec![], number),
                    ("get_char", vec![number], string),
                    ("to_ascii", vec![], number),
                ]
            }
            _ => Vec::new(),
        };
        for (method, params, ret) in methods {
            self.register_native_method(method, params, ret);
        }
        self.symbols.end_scope();

        self.symbols.symbol_mut(sym_id).class = Some(ClassInfo { body: body_scope });
        Stmt::NativeClass { name: name.to_string(), span }
    }

    fn register_native_method(&mut self, name: &str, params: Vec<TypeRef>, ret: TypeRef) {
        let fn_ty = self.types.function(params, ret);
        let mut symbol = Symbol::new(name, SymbolKind::Function, fn_ty, 0, 0);
        symbol.visibility = Visibility::Public;
        symbol.native = true;
        symbol.assigned = true;
        let _ = self.symbols.insert(symbol);
    }

    /// `import "stdio"` (and `stdtime`/`stdconv`) name one of the fixed
    /// native modules spec's standard-library section lists, not a file on
    /// disk — resolved against a hardcoded signature table the same way
    /// `qcc/parser.c`'s `native_import` resolves a `NativeImport` struct
    /// compiled into the binary, rather than against the source provider.
    /// Returns `None` for any other import path, which falls back to
    /// `SourceProvider::load`.
    fn native_module_stmts(&mut self, module: &str) -> Option<Vec<Stmt>> {
        let string = self.types.string();
        let number = self.types.number();
        let bool_ = self.types.bool_();
        let void = self.types.void();
        let any = self.types.any();
        let signatures: Vec<(&str, Vec<TypeRef>, TypeRef)> = match module {
            "stdio" => vec![
                ("println", vec![string], void),
                ("print", vec![string], void),
                ("readstr", vec![], string),
                ("stdin", vec![], string),
            ],
            "stdtime" => vec![("time", vec![], number)],
            "stdconv" => vec![
                ("ntos", vec![number], string),
                ("btos", vec![bool_], string),
                ("ston", vec![string], number),
                ("typeof", vec![any], string),
            ],
            _ => return None,
        };
        let mut stmts = Vec::with_capacity(signatures.len());
        for (name, params, ret) in signatures {
            let fn_ty = self.types.function(params, ret);
            let mut symbol = Symbol::new(name, SymbolKind::Function, fn_ty, 0, 0);
            symbol.visibility = Visibility::Public;
            symbol.native = true;
            symbol.assigned = true;
            symbol.global = true;
            let _ = self.symbols.insert(symbol);
            stmts.push(Stmt::NativeFunction { name: name.to_string(), span: Span { line: 0, column: 0 } });
        }
        Some(stmts)
    }

    // ---- declarations & statements ----------------------------------------------

    fn write_declaration_block(&mut self, limit: TokenKind) -> Vec<Stmt> {
        let mut stmts = Vec::new();
        while self.current.kind != limit && self.current.kind != TokenKind::End {
            let stmt = self.declaration();
            if self.panic_mode {
                self.synchronize();
            } else {
                stmts.push(stmt);
            }
        }
        stmts
    }

    fn declaration(&mut self) -> Stmt {
        match self.current.kind {
            TokenKind::Var => self.variable_decl(),
            TokenKind::Function => self.function_decl(),
            TokenKind::Typedef => self.typealias_decl(),
            TokenKind::Import => self.import_decl(),
            TokenKind::Class => self.class_decl(),
            _ => self.statement(),
        }
    }

    fn statement(&mut self) -> Stmt {
        match self.current.kind {
            TokenKind::LeftBrace => self.block_stmt(),
            TokenKind::Return => self.return_stmt(),
            TokenKind::If => self.if_stmt(),
            TokenKind::For => self.for_stmt(),
            TokenKind::While => self.while_stmt(),
            TokenKind::Continue | TokenKind::Break => self.loop_goto_stmt(),
            _ => self.expr_stmt(),
        }
    }

    fn block_stmt(&mut self) -> Stmt {
        self.consume(TokenKind::LeftBrace, "expected block to start with '{'");
        self.scope_depth += 1;
        self.symbols.create_scope();
        let scope = self.symbols.current_scope();
        let stmts = self.write_declaration_block(TokenKind::RightBrace);
        self.consume(TokenKind::RightBrace, "expected block to end with '}'");
        self.symbols.end_scope();
        self.scope_depth -= 1;
        Stmt::Block { stmts, scope }
    }

    /// Parses `var name [: Type] [= expr]` without the trailing `;` — shared
    /// by `variable_decl` and the `for`-loop initializer.
    fn parse_variable(&mut self) -> Stmt {
        self.consume(TokenKind::Var, "expected variable declaration to start with 'var'");
        let span = self.current_span();
        if self.current.kind != TokenKind::Identifier {
            self.error_current("expected an identifier as variable name");
        }
        let name = self.current.lexeme.to_string();
        let (line, column) = (self.current.line, self.current.column);
        self.advance();

        let mut type_annotation = None;
        if self.current.kind == TokenKind::Colon {
            self.advance();
            let ty = self.parse_type();
            if matches!(self.types.get(ty), Type::Unknown) {
                self.error_prev("unknown type in variable declaration");
            }
            type_annotation = Some(ty);
        }

        let mut init = None;
        if self.current.kind == TokenKind::Equal {
            self.advance();
            init = Some(self.expression());
        }

        if type_annotation.is_none() && init.is_none() {
            self.error_prev("variable declaration needs either a type annotation or an initializer");
        }

        let ty = type_annotation.unwrap_or_else(|| self.types.unknown());
        let mut symbol = Symbol::new(name.clone(), SymbolKind::Var, ty, line, column);
        symbol.assigned = init.is_some();
        symbol.global = self.scope_depth == 0;
        if let Err(msg) = self.symbols.insert(symbol) {
            self.error_prev(&msg);
        }

        Stmt::Var { name, type_annotation, init, span }
    }

    fn variable_decl(&mut self) -> Stmt {
        let stmt = self.parse_variable();
        self.consume(TokenKind::Semicolon, "expected ';' after variable declaration");
        stmt
    }

    fn typealias_decl(&mut self) -> Stmt {
        self.consume(TokenKind::Typedef, "expected 'typedef'");
        let span = self.current_span();
        if self.current.kind != TokenKind::Identifier {
            self.error_current("expected an identifier as type alias name");
        }
        let name = self.current.lexeme.to_string();
        let (line, column) = (self.current.line, self.current.column);
        self.advance();

        self.consume(TokenKind::Equal, "expected '=' after type alias name");
        let def = self.parse_type();
        self.consume(TokenKind::Semicolon, "expected ';' after type alias");

        let alias_ty = self.types.alias(name.clone(), def);
        let mut symbol = Symbol::new(name.clone(), SymbolKind::Typealias, alias_ty, line, column);
        symbol.global = self.scope_depth == 0;
        symbol.assigned = true;
        if self.symbols.insert(symbol).is_err() {
            self.error_prev("type alias already defined");
        }
        Stmt::Typealias { name, span }
    }

    fn import_decl(&mut self) -> Stmt {
        let span = self.current_span();
        self.consume(TokenKind::Import, "expected 'import'");
        if self.current.kind != TokenKind::String {
            self.error_current("expected a string literal path after 'import'");
        }
        let path = self.current.lexeme.to_string();
        self.advance();
        self.consume(TokenKind::Semicolon, "expected ';' after import path");

        let path_buf = PathBuf::from(&path);
        if !self.import_tracker.mark_loaded(&path_buf) {
            return Stmt::Import { path, already_loaded: true, span };
        }

        let marker = Stmt::Import { path: path.clone(), already_loaded: false, span };
        if let Some(stmts) = self.native_module_stmts(&path) {
            return Stmt::List(vec![marker, Stmt::List(stmts)]);
        }
        let Some(provider) = self.provider else {
            self.error_prev("no source provider configured for 'import'");
            return marker;
        };
        let text = match provider.load(&path_buf) {
            Ok(text) => text,
            Err(_) => {
                self.error_prev("could not load imported file");
                return marker;
            }
        };
        let sub_file = FileId::new(path.clone());
        let sub_stmts = parse_imported(&text, sub_file, self.symbols, self.types, self.diagnostics, self.import_tracker, self.provider);
        Stmt::List(vec![marker, Stmt::List(sub_stmts)])
    }

    fn class_decl(&mut self) -> Stmt {
        self.consume(TokenKind::Class, "expected 'class'");
        let span = self.current_span();
        if self.current.kind != TokenKind::Identifier {
            self.error_current("expected an identifier as class name");
        }
        let name = self.current.lexeme.to_string();
        let (line, column) = (self.current.line, self.current.column);
        self.advance();

        let class_ty = self.types.class(name.clone());
        let mut symbol = Symbol::new(name.clone(), SymbolKind::Class, class_ty, line, column);
        symbol.global = self.scope_depth == 0;
        symbol.assigned = true;
        let sym_id = match self.symbols.insert(symbol) {
            Ok(id) => Some(id),
            Err(msg) => {
                self.error_prev(&msg);
                None
            }
        };

        self.consume(TokenKind::LeftBrace, "expected '{' after class name");
        self.symbols.create_class_scope();
        let body_scope = self.symbols.current_scope();
        let prev_class = self.current_class.replace(class_ty);
        let (vars, methods) = self.parse_class_body();
        self.current_class = prev_class;
        self.symbols.end_scope();
        self.consume(TokenKind::RightBrace, "expected '}' to close class body");

        if let Some(id) = sym_id {
            self.symbols.symbol_mut(id).class = Some(ClassInfo { body: body_scope });
        }

        Stmt::Class(ClassDecl { name, vars, methods, body_scope, span })
    }

    fn parse_class_body(&mut self) -> (Vec<ClassMemberVar>, Vec<FunctionDecl>) {
        let mut vars = Vec::new();
        let mut methods = Vec::new();
        while self.current.kind != TokenKind::RightBrace && self.current.kind != TokenKind::End {
            let is_public = self.parse_visibility();
            match self.current.kind {
                TokenKind::Var => {
                    let span = self.current_span();
                    let stmt = self.variable_decl();
                    if let Stmt::Var { name, type_annotation, init, .. } = stmt {
                        if init.is_some() {
                            self.error_prev("class properties cannot have initializers");
                        }
                        self.set_visibility(&name, is_public);
                        vars.push(ClassMemberVar {
                            name,
                            type_annotation: type_annotation.unwrap_or_else(|| self.types.unknown()),
                            is_public,
                            span,
                        });
                    }
                }
                TokenKind::Function => {
                    let decl = self.function_decl_inner(true, is_public);
                    self.set_visibility(&decl.name, is_public);
                    methods.push(decl);
                }
                _ => {
                    self.error_current("expected 'var' or 'fn' inside class body");
                    self.advance();
                }
            }
        }
        (vars, methods)
    }

    fn set_visibility(&mut self, name: &str, is_public: bool) {
        if let Some(id) = self.symbols.lookup_with_class(name) {
            self.symbols.symbol_mut(id).visibility = if is_public { Visibility::Public } else { Visibility::Private };
        }
    }

    fn parse_visibility(&mut self) -> bool {
        if self.current.kind == TokenKind::Public {
            self.advance();
            true
        } else {
            false
        }
    }

    fn function_decl(&mut self) -> Stmt {
        Stmt::Function(self.function_decl_inner(false, false))
    }

    fn function_decl_inner(&mut self, is_method: bool, is_public: bool) -> FunctionDecl {
        self.consume(TokenKind::Function, "expected 'fn'");
        let span = self.current_span();
        if self.current.kind != TokenKind::Identifier {
            self.error_current("expected an identifier as function name");
        }
        let name = self.current.lexeme.to_string();
        let (line, column) = (self.current.line, self.current.column);
        self.advance();

        self.consume(TokenKind::LeftParen, "expected '(' after function name");
        let mut param_names = Vec::new();
        let mut param_types = Vec::new();
        if self.current.kind != TokenKind::RightParen {
            loop {
                if self.current.kind != TokenKind::Identifier {
                    self.error_current("expected a parameter name");
                }
                let pname = self.current.lexeme.to_string();
                self.advance();
                self.consume(TokenKind::Colon, "expected ':' after parameter name");
                let pty = self.parse_type();
                if matches!(self.types.get(pty), Type::Unknown) {
                    self.error_prev("unknown parameter type");
                }
                param_names.push(pname);
                param_types.push(pty);
                if self.current.kind != TokenKind::Comma {
                    break;
                }
                self.advance();
            }
        }
        self.consume(TokenKind::RightParen, "expected ')' after function parameters");

        let mut return_type = self.types.void();
        if self.current.kind == TokenKind::Colon {
            self.advance();
            return_type = self.parse_type();
            if matches!(self.types.get(return_type), Type::Unknown) {
                self.error_prev("unknown return type");
            }
        }

        let fn_ty = self.types.function(param_types.clone(), return_type);
        let mut symbol = Symbol::new(name.clone(), SymbolKind::Function, fn_ty, line, column);
        symbol.global = self.scope_depth == 0;
        symbol.assigned = true;
        symbol.function = Some(FunctionInfo { param_names: param_names.clone(), upvalues: Vec::new() });
        // Registered before the body is parsed so recursive calls resolve.
        if let Err(msg) = self.symbols.insert(symbol) {
            self.error_prev(&msg);
        }

        self.symbols.create_scope();
        let body_scope = self.symbols.current_scope();

        let mut params = Vec::new();
        if is_method {
            let class_ty = self.current_class.expect("a method is always parsed with current_class set");
            let obj_ty = self.types.object(class_ty);
            let mut self_symbol = Symbol::new("self", SymbolKind::Var, obj_ty, line, column);
            self_symbol.assigned = true;
            let _ = self.symbols.insert(self_symbol);
            params.push(Param { name: "self".to_string(), type_annotation: obj_ty, span });
        }
        for (pname, pty) in param_names.iter().zip(param_types.iter()) {
            let mut psym = Symbol::new(pname.clone(), SymbolKind::Var, *pty, line, column);
            psym.assigned = true;
            if let Err(msg) = self.symbols.insert(psym) {
                self.error_prev(&msg);
            }
            params.push(Param { name: pname.clone(), type_annotation: *pty, span });
        }

        self.function_depth += 1;
        self.consume(TokenKind::LeftBrace, "expected '{' to start function body");
        let body = self.write_declaration_block(TokenKind::RightBrace);
        self.consume(TokenKind::RightBrace, "expected '}' to end function body");
        self.function_depth -= 1;
        self.symbols.end_scope();

        FunctionDecl { name, params, return_type, body, body_scope, is_method, is_public, span }
    }

    fn return_stmt(&mut self) -> Stmt {
        let span = self.current_span();
        if self.function_depth == 0 {
            self.error_current("cannot use 'return' outside a function");
        }
        self.consume(TokenKind::Return, "expected 'return'");
        let value = if self.current.kind == TokenKind::Semicolon { None } else { Some(self.expression()) };
        self.consume(TokenKind::Semicolon, "expected ';' after return statement");
        Stmt::Return { value, span }
    }

    fn if_stmt(&mut self) -> Stmt {
        self.consume(TokenKind::If, "expected 'if'");
        self.consume(TokenKind::LeftParen, "expected '(' after 'if'");
        let cond = self.expression();
        self.consume(TokenKind::RightParen, "expected ')' after if condition");
        let then_branch = Box::new(self.statement());
        let else_branch = if self.current.kind == TokenKind::Else {
            self.advance();
            Some(Box::new(self.statement()))
        } else {
            None
        };
        Stmt::If { cond, then_branch, else_branch }
    }

    fn while_stmt(&mut self) -> Stmt {
        self.consume(TokenKind::While, "expected 'while'");
        self.consume(TokenKind::LeftParen, "expected '(' after 'while'");
        let cond = self.expression();
        self.consume(TokenKind::RightParen, "expected ')' after while condition");
        let prev = self.is_in_loop;
        self.is_in_loop = true;
        let body = Box::new(self.statement());
        self.is_in_loop = prev;
        Stmt::While { cond, body }
    }

    fn loop_goto_stmt(&mut self) -> Stmt {
        let span = self.current_span();
        if !self.is_in_loop {
            self.error_current("'break'/'continue' must be inside a loop");
        }
        let kind = if self.current.kind == TokenKind::Break { LoopGoto::Break } else { LoopGoto::Continue };
        self.advance();
        self.consume(TokenKind::Semicolon, "expected ';' after break/continue");
        Stmt::LoopGoto(kind, span)
    }

    fn for_stmt(&mut self) -> Stmt {
        // An extra scope: a `for`'s init clause can declare a variable that
        // should live no longer than the loop itself.
        self.symbols.create_scope();
        self.scope_depth += 1;
        let scope = self.symbols.current_scope();

        self.consume(TokenKind::For, "expected 'for'");
        self.consume(TokenKind::LeftParen, "expected '(' after 'for'");

        let init = if self.current.kind == TokenKind::Semicolon {
            self.advance();
            None
        } else {
            let stmt = self.parse_variable();
            self.consume(TokenKind::Semicolon, "expected ';' after for-loop initializer");
            Some(Box::new(stmt))
        };

        let cond = if self.current.kind == TokenKind::Semicolon { None } else { Some(self.expression()) };
        self.consume(TokenKind::Semicolon, "expected ';' after for-loop condition");

        let step = if self.current.kind == TokenKind::RightParen { None } else { Some(self.expression()) };
        self.consume(TokenKind::RightParen, "expected ')' after for-loop clauses");

        let prev = self.is_in_loop;
        self.is_in_loop = true;
        let body = Box::new(self.statement());
        self.is_in_loop = prev;

        self.symbols.end_scope();
        self.scope_depth -= 1;
        Stmt::For { init, cond, step, body, scope }
    }

    fn expr_stmt(&mut self) -> Stmt {
        let expr = self.expression();
        self.consume(TokenKind::Semicolon, "expected ';' after expression");
        Stmt::Expr(expr)
    }

    // ---- types -------------------------------------------------------------------

    fn parse_type(&mut self) -> TypeRef {
        let ty = match self.current.kind {
            TokenKind::TypeAny => self.types.any(),
            TokenKind::TypeNumber => self.types.number(),
            TokenKind::TypeString => self.types.string(),
            TokenKind::TypeBool => self.types.bool_(),
            TokenKind::TypeVoid => self.types.void(),
            TokenKind::TypeNil => self.types.nil(),
            TokenKind::LeftParen => return self.parse_function_type(),
            TokenKind::LeftBracket => return self.parse_array_type(),
            TokenKind::Identifier => {
                let name = self.current.lexeme.to_string();
                self.advance();
                return match self.symbols.lookup(&name) {
                    Some(id) => {
                        let sym = self.symbols.symbol(id);
                        if sym.kind == SymbolKind::Class { self.types.object(sym.ty) } else { sym.ty }
                    }
                    None => {
                        self.error_prev(&format!("the type '{name}' is not defined"));
                        self.types.unknown()
                    }
                };
            }
            _ => return self.types.unknown(),
        };
        self.advance();
        ty
    }

    fn parse_array_type(&mut self) -> TypeRef {
        self.consume(TokenKind::LeftBracket, "expected '[' in array type");
        self.consume(TokenKind::RightBracket, "expected ']' in array type");
        let inner = self.parse_type();
        self.types.array(inner)
    }

    fn parse_function_type(&mut self) -> TypeRef {
        self.consume(TokenKind::LeftParen, "expected '(' in function type");
        let mut params = Vec::new();
        if self.current.kind != TokenKind::RightParen {
            loop {
                let param = self.parse_type();
                if matches!(self.types.get(param), Type::Void) {
                    self.error_prev("'Void' cannot be used as a parameter type");
                }
                params.push(param);
                if self.current.kind != TokenKind::Comma {
                    break;
                }
                self.advance();
            }
        }
        self.consume(TokenKind::RightParen, "expected ')' after function type parameters");
        self.consume(TokenKind::Colon, "expected ':' before function type return type");
        let ret = self.parse_type();
        self.types.function(params, ret)
    }

    // ---- expressions ---------------------------------------------------------------

    fn expression(&mut self) -> Expr {
        self.parse_precedence(Precedence::Assignment)
    }

    fn parse_precedence(&mut self, min_prec: Precedence) -> Expr {
        self.advance();
        let can_assign = min_prec <= Precedence::Assignment;
        let mut left = match self.prefix(can_assign) {
            Some(expr) => expr,
            None => {
                self.error_prev("expected an expression");
                Expr::Literal(Literal::Nil, self.prev_span())
            }
        };
        while min_prec <= precedence_of(self.current.kind) {
            self.advance();
            left = match self.infix(can_assign, left) {
                Some(expr) => expr,
                None => break,
            };
        }
        left
    }

    fn prefix(&mut self, can_assign: bool) -> Option<Expr> {
        match self.previous.kind {
            TokenKind::Number | TokenKind::String | TokenKind::True | TokenKind::False | TokenKind::Nil => Some(self.primary()),
            TokenKind::Identifier => Some(self.identifier(can_assign)),
            TokenKind::SelfKw => self.self_expr(),
            TokenKind::Minus | TokenKind::Bang => Some(self.unary()),
            TokenKind::LeftParen => Some(self.grouping()),
            TokenKind::New => Some(self.new_expr()),
            TokenKind::LeftBracket => Some(self.array_expr()),
            TokenKind::Cast => Some(self.cast_expr()),
            _ => None,
        }
    }

    fn infix(&mut self, can_assign: bool, left: Expr) -> Option<Expr> {
        match self.previous.kind {
            TokenKind::Plus
            | TokenKind::Minus
            | TokenKind::Star
            | TokenKind::Slash
            | TokenKind::Percent
            | TokenKind::AndAnd
            | TokenKind::OrOr
            | TokenKind::EqualEqual
            | TokenKind::BangEqual
            | TokenKind::Lower
            | TokenKind::LowerEqual
            | TokenKind::Greater
            | TokenKind::GreaterEqual => Some(self.binary(left)),
            TokenKind::LeftParen => Some(self.call(left)),
            TokenKind::Dot => Some(self.prop(can_assign, left)),
            _ => None,
        }
    }

    fn primary(&mut self) -> Expr {
        let tok = self.previous.clone();
        let span = Span { line: tok.line, column: tok.column };
        match tok.kind {
            TokenKind::Number => {
                let value: f64 = tok.lexeme.parse().unwrap_or_else(|_| {
                    self.error_prev("malformed number literal");
                    0.0
                });
                Expr::Literal(Literal::Number(value), span)
            }
            TokenKind::String => Expr::Literal(Literal::String(tok.lexeme.to_string()), span),
            TokenKind::True => Expr::Literal(Literal::Bool(true), span),
            TokenKind::False => Expr::Literal(Literal::Bool(false), span),
            TokenKind::Nil => Expr::Literal(Literal::Nil, span),
            _ => unreachable!("primary() dispatched for a non-literal token"),
        }
    }

    fn identifier(&mut self, can_assign: bool) -> Expr {
        let tok = self.previous.clone();
        let span = Span { line: tok.line, column: tok.column };
        let name = tok.lexeme.to_string();

        let existing = match self.symbols.lookup(&name) {
            Some(id) => id,
            None => {
                self.error_prev(&format!("use of undeclared variable '{name}'"));
                return Expr::Literal(Literal::Nil, span);
            }
        };
        // The AST is order-sensitive: a reference compiled before its
        // declaration's line would later resolve to the wrong constant slot.
        if self.symbols.symbol(existing).line > tok.line {
            self.error_prev(&format!("use of variable '{name}' before its declaration"));
        }

        if can_assign && self.current.kind == TokenKind::Equal {
            self.symbols.symbol_mut(existing).assigned = true;
            self.advance();
            let value = Box::new(self.parse_precedence(Precedence::Assignment));
            Expr::Assignment { name, value, span }
        } else {
            if !self.symbols.symbol(existing).assigned {
                self.error_prev(&format!("use of unassigned variable '{name}'"));
            }
            Expr::Identifier(name, span)
        }
    }

    fn self_expr(&mut self) -> Option<Expr> {
        let tok = self.previous.clone();
        let span = Span { line: tok.line, column: tok.column };
        if self.current_class.is_none() {
            self.error_prev("'self' can only be used inside a class definition");
        }
        if self.current.kind == TokenKind::Equal {
            self.error_current("cannot assign to 'self'");
            return Some(Expr::Literal(Literal::Nil, span));
        }
        Some(Expr::Identifier("self".to_string(), span))
    }

    fn unary(&mut self) -> Expr {
        let tok = self.previous.clone();
        let span = Span { line: tok.line, column: tok.column };
        let op = match tok.kind {
            TokenKind::Minus => UnaryOp::Negate,
            TokenKind::Bang => UnaryOp::Not,
            _ => unreachable!(),
        };
        let operand = Box::new(self.parse_precedence(Precedence::Unary));
        Expr::Unary { op, operand, span }
    }

    fn grouping(&mut self) -> Expr {
        let inner = self.expression();
        self.consume(TokenKind::RightParen, "expected ')' to close '('");
        inner
    }

    fn binary(&mut self, left: Expr) -> Expr {
        let tok = self.previous.clone();
        let span = Span { line: tok.line, column: tok.column };
        let op = match tok.kind {
            TokenKind::Plus => BinaryOp::Add,
            TokenKind::Minus => BinaryOp::Sub,
            TokenKind::Star => BinaryOp::Mul,
            TokenKind::Slash => BinaryOp::Div,
            TokenKind::Percent => BinaryOp::Mod,
            TokenKind::AndAnd => BinaryOp::And,
            TokenKind::OrOr => BinaryOp::Or,
            TokenKind::EqualEqual => BinaryOp::Equal,
            TokenKind::BangEqual => BinaryOp::NotEqual,
            TokenKind::Lower => BinaryOp::Lower,
            TokenKind::LowerEqual => BinaryOp::LowerEqual,
            TokenKind::Greater => BinaryOp::Greater,
            TokenKind::GreaterEqual => BinaryOp::GreaterEqual,
            _ => unreachable!(),
        };
        let right = Box::new(self.parse_precedence(precedence_of(tok.kind).next()));
        Expr::Binary { op, left: Box::new(left), right, span }
    }

    fn call(&mut self, left: Expr) -> Expr {
        let span = left.span();
        let args = self.parse_expression_list(TokenKind::RightParen, "expected ')' to close call arguments");
        Expr::Call { callee: Box::new(left), args, span }
    }

    fn prop(&mut self, can_assign: bool, left: Expr) -> Expr {
        let span = left.span();
        if self.current.kind != TokenKind::Identifier {
            self.error_current("expected a property name after '.'");
        }
        let name = self.current.lexeme.to_string();
        self.advance();
        if can_assign && self.current.kind == TokenKind::Equal {
            self.advance();
            let value = Box::new(self.parse_precedence(Precedence::Assignment));
            Expr::PropAssign { object: Box::new(left), name, value, span }
        } else {
            Expr::Prop { object: Box::new(left), name, span }
        }
    }

    fn new_expr(&mut self) -> Expr {
        let span = self.prev_span();
        if self.current.kind != TokenKind::Identifier {
            self.error_current("expected a class name after 'new'");
        }
        let class_name = self.current.lexeme.to_string();
        match self.symbols.lookup(&class_name) {
            Some(id) if self.symbols.symbol(id).kind != SymbolKind::Class => {
                self.error_current(&format!("'{class_name}' is not a class"));
            }
            None => self.error_current(&format!("undeclared class '{class_name}'")),
            _ => {}
        }
        self.advance();
        self.consume(TokenKind::LeftParen, "expected '(' after class name in 'new' expression");
        let args = self.parse_expression_list(TokenKind::RightParen, "expected ')' to close 'new' arguments");
        Expr::New { class_name, args, span }
    }

    fn array_expr(&mut self) -> Expr {
        let span = self.prev_span();
        self.consume(TokenKind::RightBracket, "expected ']' after '[' in array expression");
        let element_type = self.parse_type();
        self.consume(TokenKind::LeftBrace, "expected '{' after element type in array expression");
        let elements = self.parse_expression_list(TokenKind::RightBrace, "expected '}' to close array expression");
        Expr::Array { element_type, elements, span }
    }

    fn cast_expr(&mut self) -> Expr {
        let span = self.prev_span();
        self.consume(TokenKind::Lower, "expected '<' after 'cast'");
        if self.current.kind == TokenKind::Greater {
            self.error_current("expected a type after '<' in cast");
        }
        let target = self.parse_type();
        self.consume(TokenKind::Greater, "expected '>' after type in cast");
        self.consume(TokenKind::LeftParen, "expected '(' after 'cast<Type>'");
        let operand = Box::new(self.expression());
        self.consume(TokenKind::RightParen, "expected ')' after expression in cast<>");
        Expr::Cast { target, operand, span }
    }

    fn parse_expression_list(&mut self, end: TokenKind, message: &str) -> Vec<Expr> {
        let mut items = Vec::new();
        if self.current.kind != end {
            loop {
                items.push(self.expression());
                if self.current.kind != TokenKind::Comma {
                    break;
                }
                self.advance();
            }
        }
        self.consume(end, message);
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::DiagnosticSink;
    use crate::source::SourceError;
    use std::path::Path;

    fn parse(source: &str) -> (Module, DiagnosticSink) {
        let mut symbols = SymbolTable::new();
        let mut types = TypePool::new();
        let mut diagnostics = DiagnosticSink::new();
        let module = parse_module(source, FileId::new("test.qz"), &mut symbols, &mut types, &mut diagnostics, None);
        (module, diagnostics)
    }

    fn user_stmts(module: &Module) -> &[Stmt] {
        // Index 0 and 1 are the Array/String native-class markers.
        &module.stmts[2..]
    }

    #[test]
    fn arithmetic_respects_precedence() {
        let (module, diags) = parse("1 + 2 * 3;");
        assert!(!diags.has_errors());
        match &user_stmts(&module)[0] {
            Stmt::Expr(Expr::Binary { op: BinaryOp::Add, right, .. }) => {
                assert!(matches!(**right, Expr::Binary { op: BinaryOp::Mul, .. }));
            }
            other => panic!("expected Add(.., Mul(..)), got {other:?}"),
        }
    }

    #[test]
    fn variable_without_type_or_initializer_is_an_error() {
        let (_, diags) = parse("var x;");
        assert!(diags.has_errors());
    }

    #[test]
    fn method_gets_a_synthetic_self_parameter_first() {
        let (module, diags) = parse("class Point { fn dist(): Number { return 0; } }");
        assert!(!diags.has_errors());
        match &user_stmts(&module)[0] {
            Stmt::Class(decl) => {
                assert_eq!(decl.methods[0].params[0].name, "self");
                assert!(decl.methods[0].is_method);
            }
            other => panic!("expected a class declaration, got {other:?}"),
        }
    }

    #[test]
    fn break_outside_a_loop_is_an_error() {
        let (_, diags) = parse("break;");
        assert!(diags.has_errors());
    }

    #[test]
    fn repeated_import_of_the_same_path_is_a_noop_the_second_time() {
        struct Stub;
        impl SourceProvider for Stub {
            fn load(&self, _path: &Path) -> Result<String, SourceError> {
                Ok(String::new())
            }
        }
        let mut symbols = SymbolTable::new();
        let mut types = TypePool::new();
        let mut diagnostics = DiagnosticSink::new();
        let provider = Stub;
        let module = parse_module(
            "import \"a.qz\"; import \"a.qz\";",
            FileId::new("test.qz"),
            &mut symbols,
            &mut types,
            &mut diagnostics,
            Some(&provider),
        );
        assert!(!diagnostics.has_errors());
        let stmts = user_stmts(&module);
        assert!(matches!(&stmts[0], Stmt::List(inner) if matches!(inner[0], Stmt::Import { already_loaded: false, .. })));
        assert!(matches!(&stmts[1], Stmt::Import { already_loaded: true, .. }));
    }
}
