//! The scoped symbol table: a persistent, tree-shaped record of nested
//! lexical scopes, grown by the parser and re-walked in the same order by
//! the checker and the emitter (spec §4.3).
//!
//! Per spec.md §9's design note on cyclic symbol/function references, both
//! symbols and scope nodes live in flat arenas and refer to each other by
//! index (`SymbolId` / `ScopeId`) rather than by raw pointer — the arena
//! owns them, everything else stores ids.

use std::cell::Cell;

use ahash::AHashMap;

use crate::type_pool::TypeRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolId(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(u32);

pub const NO_CONSTANT: u16 = u16::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Var,
    Function,
    Class,
    Typealias,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Undefined,
    Private,
    Public,
}

/// Function-only metadata: parameter names (for closures resolving by
/// name) and the set of outer-scope variables this function closes over.
#[derive(Debug, Clone, Default)]
pub struct FunctionInfo {
    pub param_names: Vec<String>,
    pub upvalues: Vec<SymbolId>,
}

/// Class-only metadata: the scope node holding the class's members.
#[derive(Debug, Clone, Copy)]
pub struct ClassInfo {
    pub body: ScopeId,
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub ty: TypeRef,
    pub visibility: Visibility,
    pub line: u32,
    pub column: u32,
    pub constant_index: u16,
    pub global: bool,
    pub assigned: bool,
    pub native: bool,
    /// Functions that close over this variable (back-reference of
    /// `FunctionInfo::upvalues`).
    pub upvalue_fn_refs: Vec<SymbolId>,
    pub function: Option<FunctionInfo>,
    pub class: Option<ClassInfo>,
}

impl Symbol {
    pub fn new(name: impl Into<String>, kind: SymbolKind, ty: TypeRef, line: u32, column: u32) -> Self {
        Self {
            name: name.into(),
            kind,
            ty,
            visibility: Visibility::Undefined,
            line,
            column,
            constant_index: NO_CONSTANT,
            global: false,
            assigned: false,
            native: false,
            upvalue_fn_refs: Vec::new(),
            function: None,
            class: None,
        }
    }
}

struct ScopeNode {
    symbols: AHashMap<String, SymbolId>,
    parent: Option<ScopeId>,
    children: Vec<ScopeId>,
    is_class_scope: bool,
    /// Re-walk cursor: incremented each time `start_scope` descends into a
    /// child, so a second full traversal (checker, then emitter) visits the
    /// same children in the same order the parser created them.
    next_child_to_visit: Cell<usize>,
}

pub struct SymbolTable {
    symbols: Vec<Symbol>,
    scopes: Vec<ScopeNode>,
    global: ScopeId,
    current: ScopeId,
}

impl SymbolTable {
    pub fn new() -> Self {
        let root = ScopeNode {
            symbols: AHashMap::new(),
            parent: None,
            children: Vec::new(),
            is_class_scope: false,
            next_child_to_visit: Cell::new(0),
        };
        Self { symbols: Vec::new(), scopes: vec![root], global: ScopeId(0), current: ScopeId(0) }
    }

    pub fn global_scope(&self) -> ScopeId {
        self.global
    }

    pub fn current_scope(&self) -> ScopeId {
        self.current
    }

    fn new_scope(&mut self, is_class_scope: bool) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(ScopeNode {
            symbols: AHashMap::new(),
            parent: Some(self.current),
            children: Vec::new(),
            is_class_scope,
            next_child_to_visit: Cell::new(0),
        });
        self.scopes[self.current.0 as usize].children.push(id);
        id
    }

    /// Opens an ordinary lexical scope (block, function body, for-loop).
    pub fn create_scope(&mut self) -> ScopeId {
        let id = self.new_scope(false);
        self.current = id;
        id
    }

    /// Opens a class scope. Class scopes are skipped by ordinary upward
    /// lookups (`lookup`), but visible to `lookup_with_class`.
    pub fn create_class_scope(&mut self) -> ScopeId {
        let id = self.new_scope(true);
        self.current = id;
        id
    }

    pub fn end_scope(&mut self) {
        if let Some(parent) = self.scopes[self.current.0 as usize].parent {
            self.current = parent;
        }
    }

    /// Re-enters the scope tree at the root, as the checker and emitter do
    /// before their own pass over the already-parsed AST.
    pub fn reset_scopes(&mut self) {
        self.current = self.global;
        for scope in &self.scopes {
            scope.next_child_to_visit.set(0);
        }
    }

    /// Descends into the next not-yet-visited child of the current scope, in
    /// the order the parser created them. This is how the checker and
    /// emitter re-walk the same scope shape the parser built without storing
    /// a second copy of it on the AST.
    pub fn start_scope(&mut self) -> ScopeId {
        let node = &self.scopes[self.current.0 as usize];
        let idx = node.next_child_to_visit.get();
        let child = node.children[idx];
        node.next_child_to_visit.set(idx + 1);
        self.current = child;
        child
    }

    /// Inserts a symbol into the current scope. Rejects a duplicate name
    /// within the same scope node (the parser surfaces this as "already
    /// declared").
    pub fn insert(&mut self, symbol: Symbol) -> Result<SymbolId, String> {
        let name = symbol.name.clone();
        if self.scopes[self.current.0 as usize].symbols.contains_key(&name) {
            return Err(format!("'{name}' is already declared in this scope"));
        }
        let id = SymbolId(self.symbols.len() as u32);
        self.symbols.push(symbol);
        self.scopes[self.current.0 as usize].symbols.insert(name, id);
        Ok(id)
    }

    pub fn symbol(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.0 as usize]
    }

    pub fn symbol_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.symbols[id.0 as usize]
    }

    fn lookup_from(&self, mut scope: ScopeId, name: &str, skip_class: bool, max_levels: Option<usize>) -> Option<SymbolId> {
        let mut levels = 0;
        loop {
            let node = &self.scopes[scope.0 as usize];
            if !(skip_class && node.is_class_scope) {
                if let Some(&id) = node.symbols.get(name) {
                    return Some(id);
                }
            }
            if let Some(limit) = max_levels {
                if levels >= limit {
                    return None;
                }
            }
            match node.parent {
                Some(parent) => {
                    scope = parent;
                    levels += 1;
                }
                None => return None,
            }
        }
    }

    /// Walks parents from the current scope, skipping class-scope nodes.
    pub fn lookup(&self, name: &str) -> Option<SymbolId> {
        self.lookup_from(self.current, name, true, None)
    }

    /// Like `lookup`, but class scopes are visible (used inside a method
    /// body to resolve sibling members via `self.x`).
    pub fn lookup_with_class(&self, name: &str) -> Option<SymbolId> {
        self.lookup_from(self.current, name, false, None)
    }

    /// Walks at most `n` parent scopes.
    pub fn lookup_levels(&self, name: &str, n: usize) -> Option<SymbolId> {
        self.lookup_from(self.current, name, true, Some(n))
    }

    /// Looks up a property on a class's own scope (no walking to parents);
    /// used for `obj.prop` resolution.
    pub fn lookup_in_scope(&self, scope: ScopeId, name: &str) -> Option<SymbolId> {
        self.scopes[scope.0 as usize].symbols.get(name).copied()
    }

    pub fn is_global_scope(&self, scope: ScopeId) -> bool {
        scope == self.global
    }

    /// Records that `function` reads a variable from an enclosing
    /// function's frame. Both directions are stored: the function remembers
    /// what it captured, the variable remembers who captured it (so that,
    /// when its scope ends, every capturing function's open upvalue can be
    /// closed).
    pub fn upvalue(&mut self, function: SymbolId, variable: SymbolId) {
        {
            let sym = self.symbol_mut(function);
            let info = sym.function.get_or_insert_with(FunctionInfo::default);
            if !info.upvalues.contains(&variable) {
                info.upvalues.push(variable);
            }
        }
        let var = self.symbol_mut(variable);
        if !var.upvalue_fn_refs.contains(&function) {
            var.upvalue_fn_refs.push(function);
        }
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::type_pool::TypePool;

    #[test]
    fn duplicate_insert_in_same_scope_rejected() {
        let pool = TypePool::new();
        let mut table = SymbolTable::new();
        table.insert(Symbol::new("x", SymbolKind::Var, pool.number(), 1, 1)).unwrap();
        let err = table.insert(Symbol::new("x", SymbolKind::Var, pool.number(), 2, 1));
        assert!(err.is_err());
    }

    #[test]
    fn lookup_walks_parents_but_skips_class_scopes() {
        let pool = TypePool::new();
        let mut table = SymbolTable::new();
        table.insert(Symbol::new("outer", SymbolKind::Var, pool.number(), 1, 1)).unwrap();
        table.create_class_scope();
        table.insert(Symbol::new("field", SymbolKind::Var, pool.number(), 2, 1)).unwrap();

        assert!(table.lookup("outer").is_some());
        assert!(table.lookup("field").is_some()); // visible from inside the class scope itself
        table.create_scope(); // method body, nested under the class scope
        assert!(table.lookup("outer").is_some());
        assert!(table.lookup("field").is_none(), "ordinary lookup must skip class scopes above it");
        assert!(table.lookup_with_class("field").is_some());
    }

    #[test]
    fn reset_and_start_scope_revisit_children_in_creation_order() {
        let mut table = SymbolTable::new();
        let a = table.create_scope();
        table.end_scope();
        let b = table.create_scope();
        table.end_scope();

        table.reset_scopes();
        assert_eq!(table.start_scope(), a);
        assert_eq!(table.start_scope(), b);
    }

    #[test]
    fn upvalue_relationship_is_bidirectional() {
        let pool = TypePool::new();
        let mut table = SymbolTable::new();
        let var = table.insert(Symbol::new("x", SymbolKind::Var, pool.number(), 1, 1)).unwrap();
        let func = table.insert(Symbol::new("inner", SymbolKind::Function, pool.unknown(), 1, 1)).unwrap();
        table.upvalue(func, var);
        assert_eq!(table.symbol(func).function.as_ref().unwrap().upvalues, vec![var]);
        assert_eq!(table.symbol(var).upvalue_fn_refs, vec![func]);
    }
}
