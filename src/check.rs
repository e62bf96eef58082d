//! Single-pass type checker (spec §4.5).
//!
//! Re-walks the same scope tree the parser built, via `reset_scopes`/
//! `start_scope`, rather than keeping its own copy of scope structure —
//! same approach `symbol.rs`'s re-walk cursor was built for. Diagnostics
//! accumulate into the caller's `DiagnosticSink`; a rule violation reports
//! and keeps going; the driver (outside this crate) decides whether any
//! accumulated error should stop the pipeline before bytecode emission
//! (spec §7.3).

use ahash::AHashSet;

use crate::ast::{BinaryOp, ClassDecl, Expr, FunctionDecl, Literal, Module, Span, Stmt, UnaryOp};
use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::symbol::{SymbolId, SymbolKind, SymbolTable, Visibility};
use crate::token::FileId;
use crate::type_pool::{Type, TypePool, TypeRef};

/// One checker-reported problem, before it's rendered into a `Diagnostic`.
/// Kept as its own enum (rather than pushing `Diagnostic`s inline
/// everywhere) so call sites read as "what rule failed", not "what string
/// to print".
#[derive(Debug, Clone)]
pub enum TypeError {
    Mismatch { expected: String, found: String },
    Undefined(String),
    Arity { expected: usize, found: usize },
    NotCallable(String),
    NotAssignable { from: String, to: String },
    Visibility(String),
    UnreachableReturn(String),
    Other(String),
}

impl TypeError {
    fn message(&self) -> String {
        match self {
            TypeError::Mismatch { expected, found } => format!("expected type '{expected}', found '{found}'"),
            TypeError::Undefined(name) => format!("'{name}' is not defined"),
            TypeError::Arity { expected, found } => format!("expected {expected} argument(s), got {found}"),
            TypeError::NotCallable(what) => format!("'{what}' is not callable"),
            TypeError::NotAssignable { from, to } => format!("value of type '{from}' is not assignable to '{to}'"),
            TypeError::Visibility(name) => format!("'{name}' is private"),
            TypeError::UnreachableReturn(name) => format!("function '{name}' does not return on every path"),
            TypeError::Other(msg) => msg.clone(),
        }
    }
}

/// The currently-open function's locals, for upvalue discovery (spec
/// §4.5's "Upvalue discovery" rule): any identifier reference resolving to
/// a symbol outside this set, and not global, is an upvalue of `symbol_id`.
struct FuncFrame {
    symbol_id: Option<SymbolId>,
    return_type: TypeRef,
    locals: AHashSet<SymbolId>,
}

pub fn check_module(module: &Module, file: FileId, source: &str, symbols: &mut SymbolTable, types: &mut TypePool, diagnostics: &mut DiagnosticSink) {
    symbols.reset_scopes();
    let mut checker = Checker { file, source, symbols, types, diagnostics, functions: Vec::new(), is_in_class: false };
    checker.check_stmts(&module.stmts);
}

struct Checker<'src, 'ctx> {
    file: FileId,
    source: &'src str,
    symbols: &'ctx mut SymbolTable,
    types: &'ctx mut TypePool,
    diagnostics: &'ctx mut DiagnosticSink,
    functions: Vec<FuncFrame>,
    is_in_class: bool,
}

impl<'src, 'ctx> Checker<'src, 'ctx> {
    fn error(&mut self, span: Span, err: TypeError) {
        let source_line = self.source.lines().nth(span.line.saturating_sub(1) as usize).unwrap_or("").to_string();
        self.diagnostics.push(Diagnostic::error(self.file.clone(), span.line, span.column, source_line, err.message()));
    }

    fn display(&self, ty: TypeRef) -> String {
        self.types.display(ty)
    }

    /// Records a declared symbol as belonging to the innermost open
    /// function, if any — called for every parameter and every `var`
    /// encountered while checking a function body.
    fn note_local(&mut self, id: SymbolId) {
        if let Some(frame) = self.functions.last_mut() {
            frame.locals.insert(id);
        }
    }

    fn check_stmts(&mut self, stmts: &[Stmt]) {
        for stmt in stmts {
            self.check_stmt(stmt);
        }
    }

    fn check_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Expr(e) => {
                self.check_expr(e);
            }
            Stmt::Var { name, type_annotation, init, span } => self.check_var(name, *type_annotation, init.as_ref(), *span),
            Stmt::Function(decl) => self.check_function(decl),
            Stmt::List(inner) => self.check_stmts(inner),
            Stmt::Block { stmts, .. } => {
                self.symbols.start_scope();
                self.check_stmts(stmts);
                self.symbols.end_scope();
            }
            Stmt::Return { value, span } => self.check_return(value.as_ref(), *span),
            Stmt::If { cond, then_branch, else_branch } => {
                self.expect_bool(cond);
                self.check_stmt(then_branch);
                if let Some(e) = else_branch {
                    self.check_stmt(e);
                }
            }
            Stmt::For { init, cond, step, body, scope: _ } => {
                self.symbols.start_scope();
                if let Some(i) = init {
                    self.check_stmt(i);
                }
                if let Some(c) = cond {
                    self.expect_bool(c);
                }
                if let Some(s) = step {
                    self.check_expr(s);
                }
                self.check_stmt(body);
                self.symbols.end_scope();
            }
            Stmt::While { cond, body } => {
                self.expect_bool(cond);
                self.check_stmt(body);
            }
            Stmt::LoopGoto(..) => {}
            Stmt::Typealias { .. } => {}
            Stmt::Import { .. } => {}
            Stmt::NativeFunction { .. } => {}
            Stmt::NativeClass { .. } => {}
            Stmt::Class(decl) => self.check_class(decl),
        }
    }

    fn expect_bool(&mut self, expr: &Expr) {
        let ty = self.check_expr(expr);
        let bool_ty = self.types.bool_();
        if !self.types.is_assignable(ty, bool_ty) {
            self.error(expr.span(), TypeError::Mismatch { expected: "Bool".into(), found: self.display(ty) });
        }
    }

    fn check_var(&mut self, name: &str, type_annotation: Option<TypeRef>, init: Option<&Expr>, span: Span) {
        let void = self.types.void();
        if let Some(ty) = type_annotation {
            if self.types.type_equals(ty, void) {
                self.error(span, TypeError::Other(format!("variable '{name}' cannot have type 'Void'")));
            }
        }
        let id = self.symbols.lookup(name);
        let init_ty = init.map(|e| self.check_expr(e));

        if let (Some(declared), Some(found)) = (type_annotation, init_ty) {
            if !self.types.is_assignable(found, declared) {
                self.error(span, TypeError::NotAssignable { from: self.display(found), to: self.display(declared) });
            }
        } else if type_annotation.is_none() {
            if let (Some(id), Some(found)) = (id, init_ty) {
                self.symbols.symbol_mut(id).ty = found;
            }
        }
        if let Some(id) = id {
            self.note_local(id);
        }
    }

    fn check_return(&mut self, value: Option<&Expr>, span: Span) {
        let actual = match value {
            Some(e) => self.check_expr(e),
            None => self.types.void(),
        };
        let Some(frame) = self.functions.last() else {
            self.error(span, TypeError::Other("'return' outside a function".into()));
            return;
        };
        let expected = frame.return_type;
        if !self.types.type_equals(actual, expected) {
            self.error(span, TypeError::Mismatch { expected: self.display(expected), found: self.display(actual) });
        }
    }

    fn check_function(&mut self, decl: &FunctionDecl) {
        let fn_symbol = self.symbols.lookup_with_class(&decl.name);
        self.symbols.start_scope();

        let mut locals = AHashSet::new();
        if decl.is_method {
            if let Some(id) = self.symbols.lookup_in_scope(self.symbols.current_scope(), "self") {
                locals.insert(id);
            }
        }
        for param in &decl.params {
            if let Some(id) = self.symbols.lookup_in_scope(self.symbols.current_scope(), &param.name) {
                locals.insert(id);
            }
        }
        self.functions.push(FuncFrame { symbol_id: fn_symbol, return_type: decl.return_type, locals });

        self.check_stmts(&decl.body);

        let void = self.types.void();
        let nil = self.types.nil();
        if !self.types.type_equals(decl.return_type, void) && !self.types.type_equals(decl.return_type, nil) && !body_always_returns(&decl.body) {
            self.error(decl.span, TypeError::UnreachableReturn(decl.name.clone()));
        }

        self.functions.pop();
        self.symbols.end_scope();
    }

    fn check_class(&mut self, decl: &ClassDecl) {
        self.symbols.start_scope();
        let prev = self.is_in_class;
        self.is_in_class = true;
        for method in &decl.methods {
            self.check_function(method);
        }
        self.is_in_class = prev;
        self.symbols.end_scope();

        if let Some(init) = decl.methods.iter().find(|m| m.name == "init") {
            if !init.is_public {
                self.error(init.span, TypeError::Visibility("init".into()));
            }
            let void = self.types.void();
            if !self.types.type_equals(init.return_type, void) {
                self.error(init.span, TypeError::Other("'init' must return 'Void'".into()));
            }
        }
    }

    fn check_expr(&mut self, expr: &Expr) -> TypeRef {
        match expr {
            Expr::Literal(lit, _) => self.literal_type(lit),
            Expr::Identifier(name, span) => self.check_identifier(name, *span),
            Expr::Assignment { name, value, span } => self.check_assignment(name, value, *span),
            Expr::Unary { op, operand, span } => self.check_unary(*op, operand, *span),
            Expr::Binary { op, left, right, span } => self.check_binary(*op, left, right, *span),
            Expr::Call { callee, args, span } => self.check_call(callee, args, *span),
            Expr::New { class_name, args, span } => self.check_new(class_name, args, *span),
            Expr::Prop { object, name, span } => self.check_prop(object, name, *span, false),
            Expr::PropAssign { object, name, value, span } => self.check_prop_assign(object, name, value, *span),
            Expr::Array { element_type, elements, span } => self.check_array(*element_type, elements, *span),
            Expr::Cast { target, operand, span } => {
                let operand_ty = self.check_expr(operand);
                if !self.cast_is_legal(operand_ty, *target) {
                    self.error(
                        *span,
                        TypeError::Other(format!("cannot cast '{}' to '{}'", self.display(operand_ty), self.display(*target))),
                    );
                }
                *target
            }
        }
    }

    /// Spec §4.2's cast legality: identity, widening to `Bool` (truthiness),
    /// or either side being `Any`. Everything else is a compile-time error.
    fn cast_is_legal(&self, from: TypeRef, to: TypeRef) -> bool {
        if self.types.type_equals(from, to) {
            return true;
        }
        let to_resolved = self.types.resolve(to);
        if matches!(self.types.get(to_resolved), Type::Bool | Type::Any) {
            return true;
        }
        let from_resolved = self.types.resolve(from);
        matches!(self.types.get(from_resolved), Type::Any)
    }

    fn literal_type(&mut self, lit: &Literal) -> TypeRef {
        match lit {
            Literal::Number(_) => self.types.number(),
            Literal::String(_) => self.types.string(),
            Literal::Bool(_) => self.types.bool_(),
            Literal::Nil => self.types.nil(),
        }
    }

    fn check_identifier(&mut self, name: &str, span: Span) -> TypeRef {
        let Some(id) = self.symbols.lookup_with_class(name) else {
            self.error(span, TypeError::Undefined(name.to_string()));
            return self.types.unknown();
        };
        self.record_upvalue_if_needed(id);
        self.symbols.symbol(id).ty
    }

    /// Spec §4.5's upvalue-discovery rule: a reference to a non-global
    /// symbol that isn't among the current function's own locals is an
    /// upvalue of that function.
    fn record_upvalue_if_needed(&mut self, id: SymbolId) {
        if self.symbols.symbol(id).global {
            return;
        }
        let Some(frame) = self.functions.last() else { return };
        if frame.locals.contains(&id) {
            return;
        }
        if let Some(fn_id) = frame.symbol_id {
            self.symbols.upvalue(fn_id, id);
        }
    }

    fn check_assignment(&mut self, name: &str, value: &Expr, span: Span) -> TypeRef {
        let value_ty = self.check_expr(value);
        let Some(id) = self.symbols.lookup_with_class(name) else {
            self.error(span, TypeError::Undefined(name.to_string()));
            return value_ty;
        };
        self.record_upvalue_if_needed(id);
        let declared = self.symbols.symbol(id).ty;
        if !self.types.is_assignable(value_ty, declared) {
            self.error(span, TypeError::NotAssignable { from: self.display(value_ty), to: self.display(declared) });
        }
        self.symbols.symbol_mut(id).assigned = true;
        declared
    }

    fn check_unary(&mut self, op: UnaryOp, operand: &Expr, span: Span) -> TypeRef {
        let operand_ty = self.check_expr(operand);
        match op {
            UnaryOp::Not => {
                let bool_ty = self.types.bool_();
                if !self.types.is_assignable(operand_ty, bool_ty) {
                    self.error(span, TypeError::Mismatch { expected: "Bool".into(), found: self.display(operand_ty) });
                }
                bool_ty
            }
            UnaryOp::Negate => {
                let number = self.types.number();
                if !self.types.is_assignable(operand_ty, number) {
                    self.error(span, TypeError::Mismatch { expected: "Number".into(), found: self.display(operand_ty) });
                }
                number
            }
        }
    }

    fn check_binary(&mut self, op: BinaryOp, left: &Expr, right: &Expr, span: Span) -> TypeRef {
        let left_ty = self.check_expr(left);
        let right_ty = self.check_expr(right);
        let number = self.types.number();
        let string = self.types.string();
        let bool_ty = self.types.bool_();

        match op {
            BinaryOp::Add => {
                let both_number = self.types.is_assignable(left_ty, number) && self.types.is_assignable(right_ty, number);
                let both_string = self.types.is_assignable(left_ty, string) && self.types.is_assignable(right_ty, string);
                if !both_number && !both_string {
                    self.error(span, TypeError::Other("'+' requires two Numbers or two Strings".into()));
                }
                if both_string { string } else { number }
            }
            BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
                self.require_numeric_pair(left_ty, right_ty, span);
                number
            }
            BinaryOp::Greater | BinaryOp::GreaterEqual | BinaryOp::Lower | BinaryOp::LowerEqual => {
                self.require_numeric_pair(left_ty, right_ty, span);
                bool_ty
            }
            BinaryOp::And | BinaryOp::Or => {
                if !self.types.is_assignable(left_ty, bool_ty) || !self.types.is_assignable(right_ty, bool_ty) {
                    self.error(span, TypeError::Other("'&&'/'||' require Bool operands".into()));
                }
                bool_ty
            }
            BinaryOp::Equal | BinaryOp::NotEqual => {
                if !self.types.is_assignable(left_ty, right_ty) && !self.types.is_assignable(right_ty, left_ty) {
                    self.error(span, TypeError::Mismatch { expected: self.display(left_ty), found: self.display(right_ty) });
                }
                bool_ty
            }
        }
    }

    fn require_numeric_pair(&mut self, left: TypeRef, right: TypeRef, span: Span) {
        let number = self.types.number();
        if !self.types.is_assignable(left, number) || !self.types.is_assignable(right, number) {
            self.error(span, TypeError::Other("operator requires two Numbers".into()));
        }
    }

    fn check_call(&mut self, callee: &Expr, args: &[Expr], span: Span) -> TypeRef {
        let callee_ty = self.check_expr(callee);
        let arg_types: Vec<TypeRef> = args.iter().map(|a| self.check_expr(a)).collect();
        let resolved = self.types.resolve(callee_ty);
        match self.types.get(resolved).clone() {
            Type::Function { params, ret } => {
                if params.len() != arg_types.len() {
                    self.error(span, TypeError::Arity { expected: params.len(), found: arg_types.len() });
                } else {
                    for (param, arg) in params.iter().zip(arg_types.iter()) {
                        if !self.types.is_assignable(*arg, *param) {
                            self.error(span, TypeError::NotAssignable { from: self.display(*arg), to: self.display(*param) });
                        }
                    }
                }
                ret
            }
            Type::Any => self.types.any(),
            _ => {
                self.error(span, TypeError::NotCallable(self.types.display(resolved)));
                self.types.unknown()
            }
        }
    }

    fn check_new(&mut self, class_name: &str, args: &[Expr], span: Span) -> TypeRef {
        let arg_types: Vec<TypeRef> = args.iter().map(|a| self.check_expr(a)).collect();
        let Some(class_id) = self.symbols.lookup(class_name) else {
            self.error(span, TypeError::Undefined(class_name.to_string()));
            return self.types.unknown();
        };
        let class_symbol = self.symbols.symbol(class_id);
        if class_symbol.kind != SymbolKind::Class {
            self.error(span, TypeError::Other(format!("'{class_name}' is not a class")));
            return self.types.unknown();
        }
        let class_ty = class_symbol.ty;
        let body = class_symbol.class.map(|c| c.body);

        if let Some(body) = body {
            if let Some(init_id) = self.symbols.lookup_in_scope(body, "init") {
                let init = self.symbols.symbol(init_id);
                if init.visibility != Visibility::Public {
                    self.error(span, TypeError::Visibility("init".into()));
                }
                let resolved = self.types.resolve(init.ty);
                if let Type::Function { params, ret } = self.types.get(resolved).clone() {
                    let void = self.types.void();
                    if !self.types.type_equals(ret, void) {
                        self.error(span, TypeError::Other("'init' must return 'Void'".into()));
                    }
                    let params: Vec<TypeRef> = params.into_iter().skip(1).collect(); // drop synthetic `self`
                    if params.len() != arg_types.len() {
                        self.error(span, TypeError::Arity { expected: params.len(), found: arg_types.len() });
                    } else {
                        for (param, arg) in params.iter().zip(arg_types.iter()) {
                            if !self.types.is_assignable(*arg, *param) {
                                self.error(span, TypeError::NotAssignable { from: self.display(*arg), to: self.display(*param) });
                            }
                        }
                    }
                }
            } else if !arg_types.is_empty() {
                self.error(span, TypeError::Arity { expected: 0, found: arg_types.len() });
            }
        }
        self.types.object(class_ty)
    }

    fn check_prop(&mut self, object: &Expr, name: &str, span: Span, for_write: bool) -> TypeRef {
        let object_ty = self.check_expr(object);
        let resolved = self.types.resolve(object_ty);
        let class_name = match self.types.get(resolved).clone() {
            Type::Object { class } => match self.types.get(self.types.resolve(class)).clone() {
                Type::Class { name } => Some(name),
                _ => None,
            },
            Type::Array { .. } => Some("Array".to_string()),
            Type::String => Some("String".to_string()),
            Type::Any => return self.types.any(),
            _ => {
                self.error(span, TypeError::Other("only objects, Arrays and Strings have properties".into()));
                return self.types.unknown();
            }
        };
        let Some(class_name) = class_name else {
            self.error(span, TypeError::Other(format!("property '{name}' has no resolvable receiver class")));
            return self.types.unknown();
        };
        let Some(class_id) = self.symbols.lookup(&class_name) else {
            self.error(span, TypeError::Undefined(class_name));
            return self.types.unknown();
        };
        let Some(body) = self.symbols.symbol(class_id).class.map(|c| c.body) else {
            return self.types.unknown();
        };
        let Some(member_id) = self.symbols.lookup_in_scope(body, name) else {
            self.error(span, TypeError::Other(format!("no property '{name}' on '{class_name}'")));
            return self.types.unknown();
        };
        let member = self.symbols.symbol(member_id);
        if member.visibility == Visibility::Private && !self.is_in_class {
            self.error(span, TypeError::Visibility(name.to_string()));
        }
        if for_write && member.kind == SymbolKind::Function {
            self.error(span, TypeError::Other(format!("cannot assign to function property '{name}'")));
        }
        member.ty
    }

    fn check_prop_assign(&mut self, object: &Expr, name: &str, value: &Expr, span: Span) -> TypeRef {
        let member_ty = self.check_prop(object, name, span, true);
        let value_ty = self.check_expr(value);
        if !self.types.is_assignable(value_ty, member_ty) {
            self.error(span, TypeError::NotAssignable { from: self.display(value_ty), to: self.display(member_ty) });
        }
        member_ty
    }

    fn check_array(&mut self, element_type: TypeRef, elements: &[Expr], span: Span) -> TypeRef {
        for element in elements {
            let ty = self.check_expr(element);
            if !self.types.is_assignable(ty, element_type) {
                self.error(span, TypeError::NotAssignable { from: self.display(ty), to: self.display(element_type) });
            }
        }
        self.types.array(element_type)
    }
}

/// Last-statement walk of a function body's terminal path (spec §4.5):
/// a `Return` is terminal; a `Block`/`List` is terminal iff its last
/// statement is; an `If` is terminal iff both branches are present and
/// both terminal. Loops are never considered terminal, since their body
/// isn't guaranteed to execute.
fn body_always_returns(body: &[Stmt]) -> bool {
    match body.last() {
        Some(stmt) => stmt_always_returns(stmt),
        None => false,
    }
}

fn stmt_always_returns(stmt: &Stmt) -> bool {
    match stmt {
        Stmt::Return { .. } => true,
        Stmt::Block { stmts, .. } => body_always_returns(stmts),
        Stmt::List(stmts) => body_always_returns(stmts),
        Stmt::If { then_branch, else_branch: Some(else_branch), .. } => stmt_always_returns(then_branch) && stmt_always_returns(else_branch),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_module;

    fn check(source: &str) -> DiagnosticSink {
        let mut symbols = SymbolTable::new();
        let mut types = TypePool::new();
        let mut diagnostics = DiagnosticSink::new();
        let file = FileId::new("test.qz");
        let module = parse_module(source, file.clone(), &mut symbols, &mut types, &mut diagnostics, None);
        assert!(!diagnostics.has_errors(), "parse produced unexpected diagnostics");
        check_module(&module, file, source, &mut symbols, &mut types, &mut diagnostics);
        diagnostics
    }

    #[test]
    fn adding_a_number_and_a_bool_is_rejected() {
        let diags = check("var x: Number = 1; var y: Bool = x && true;");
        assert!(diags.has_errors());
    }

    #[test]
    fn string_concatenation_with_plus_is_accepted() {
        let diags = check(r#"var x: String = "a" + "b";"#);
        assert!(!diags.has_errors());
    }

    #[test]
    fn function_missing_a_return_on_every_path_is_an_error() {
        let diags = check("fn f(): Number { if (true) { return 1; } }");
        assert!(diags.has_errors());
    }

    #[test]
    fn function_returning_on_every_path_is_accepted() {
        let diags = check("fn f(): Number { if (true) { return 1; } else { return 2; } }");
        assert!(!diags.has_errors());
    }

    #[test]
    fn wrong_call_arity_is_an_error() {
        let diags = check("fn f(x: Number): Void {} f(1, 2);");
        assert!(diags.has_errors());
    }

    #[test]
    fn closing_over_an_outer_local_records_an_upvalue() {
        let mut symbols = SymbolTable::new();
        let mut types = TypePool::new();
        let mut diagnostics = DiagnosticSink::new();
        let file = FileId::new("test.qz");
        let source = "fn outer(): Void { var x: Number = 1; fn inner(): Number { return x; } }";
        let module = parse_module(source, file.clone(), &mut symbols, &mut types, &mut diagnostics, None);
        check_module(&module, file, source, &mut symbols, &mut types, &mut diagnostics);
        assert!(!diagnostics.has_errors());
    }
}
