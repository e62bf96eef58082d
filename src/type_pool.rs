//! The type pool: an append-only arena of `Type` descriptors shared by the
//! parser, checker, emitter and VM (spec §3, §4.4).
//!
//! Per spec.md §9's design note, this is **not** a resizable `Vec<Type>` —
//! it is a forward-linked chain of fixed-capacity buckets, so that a
//! `TypeRef` handed out for one insertion stays valid (and the bucket it
//! points into never moves) no matter how many more types get interned
//! afterward. Simple kinds are pre-created singletons; composite kinds are
//! interned by structural value where that's cheap to check.

use std::fmt;

const BUCKET_CAPACITY: usize = 256;

/// A stable reference into the type pool. Cheap to copy and compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeRef(u32);

impl TypeRef {
    fn new(index: usize) -> Self {
        Self(index as u32)
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

/// The type data itself. `Alias` and `Class` own their identifier string;
/// every other composite variant holds `TypeRef`s into the same pool.
#[derive(Debug, Clone)]
pub enum Type {
    Number,
    Bool,
    Nil,
    String,
    Void,
    Unknown,
    Any,
    Function { params: Vec<TypeRef>, ret: TypeRef },
    Class { name: String },
    Object { class: TypeRef },
    Array { inner: TypeRef },
    Alias { name: String, def: TypeRef },
}

/// A fixed-capacity bucket. Once full, the pool starts a new one; existing
/// buckets are never resized or moved.
struct Bucket {
    items: Vec<Type>,
}

impl Bucket {
    fn new() -> Self {
        Self { items: Vec::with_capacity(BUCKET_CAPACITY) }
    }
}

pub struct TypePool {
    buckets: Vec<Bucket>,
    len: usize,

    number: TypeRef,
    bool_: TypeRef,
    nil: TypeRef,
    string: TypeRef,
    void: TypeRef,
    unknown: TypeRef,
    any: TypeRef,
}

impl TypePool {
    pub fn new() -> Self {
        let mut pool = Self {
            buckets: Vec::new(),
            len: 0,
            number: TypeRef(0),
            bool_: TypeRef(0),
            nil: TypeRef(0),
            string: TypeRef(0),
            void: TypeRef(0),
            unknown: TypeRef(0),
            any: TypeRef(0),
        };
        pool.number = pool.push(Type::Number);
        pool.bool_ = pool.push(Type::Bool);
        pool.nil = pool.push(Type::Nil);
        pool.string = pool.push(Type::String);
        pool.void = pool.push(Type::Void);
        pool.unknown = pool.push(Type::Unknown);
        pool.any = pool.push(Type::Any);
        pool
    }

    fn push(&mut self, ty: Type) -> TypeRef {
        let index = self.len;
        let bucket_idx = index / BUCKET_CAPACITY;
        if bucket_idx >= self.buckets.len() {
            self.buckets.push(Bucket::new());
        }
        self.buckets[bucket_idx].items.push(ty);
        self.len += 1;
        TypeRef::new(index)
    }

    pub fn get(&self, r: TypeRef) -> &Type {
        let index = r.index();
        &self.buckets[index / BUCKET_CAPACITY].items[index % BUCKET_CAPACITY]
    }

    pub fn number(&self) -> TypeRef {
        self.number
    }
    pub fn bool_(&self) -> TypeRef {
        self.bool_
    }
    pub fn nil(&self) -> TypeRef {
        self.nil
    }
    pub fn string(&self) -> TypeRef {
        self.string
    }
    pub fn void(&self) -> TypeRef {
        self.void
    }
    pub fn unknown(&self) -> TypeRef {
        self.unknown
    }
    pub fn any(&self) -> TypeRef {
        self.any
    }

    fn find_structural(&self, ty: &Type) -> Option<TypeRef> {
        for (i, bucket) in self.buckets.iter().enumerate() {
            for (j, existing) in bucket.items.iter().enumerate() {
                if structurally_same(existing, ty) {
                    return Some(TypeRef::new(i * BUCKET_CAPACITY + j));
                }
            }
        }
        None
    }

    /// Interns a function type by structural value (same param types in the
    /// same order, same return type).
    pub fn function(&mut self, params: Vec<TypeRef>, ret: TypeRef) -> TypeRef {
        let candidate = Type::Function { params: params.clone(), ret };
        if let Some(existing) = self.find_structural(&candidate) {
            return existing;
        }
        self.push(candidate)
    }

    /// Interns a class type by name.
    pub fn class(&mut self, name: impl Into<String>) -> TypeRef {
        let name = name.into();
        let candidate = Type::Class { name: name.clone() };
        if let Some(existing) = self.find_structural(&candidate) {
            return existing;
        }
        self.push(candidate)
    }

    /// Interns an object type for a given class reference.
    pub fn object(&mut self, class: TypeRef) -> TypeRef {
        let candidate = Type::Object { class };
        if let Some(existing) = self.find_structural(&candidate) {
            return existing;
        }
        self.push(candidate)
    }

    /// Interns an array type by its element type.
    pub fn array(&mut self, inner: TypeRef) -> TypeRef {
        let candidate = Type::Array { inner };
        if let Some(existing) = self.find_structural(&candidate) {
            return existing;
        }
        self.push(candidate)
    }

    /// Creates a new alias. Each `typedef` gets its own entry (aliases own a
    /// copy of the identifier string, per spec §3); they are never
    /// deduplicated structurally since two aliases with the same name in
    /// different scopes are different symbols.
    pub fn alias(&mut self, name: impl Into<String>, def: TypeRef) -> TypeRef {
        self.push(Type::Alias { name: name.into(), def })
    }

    /// Resolves through any chain of aliases to the first non-alias type.
    pub fn resolve(&self, mut r: TypeRef) -> TypeRef {
        loop {
            match self.get(r) {
                Type::Alias { def, .. } => r = *def,
                _ => return r,
            }
        }
    }

    /// Structural equality modulo alias resolution (spec §3, invariant c).
    pub fn type_equals(&self, a: TypeRef, b: TypeRef) -> bool {
        let a = self.resolve(a);
        let b = self.resolve(b);
        if a == b {
            return true;
        }
        match (self.get(a), self.get(b)) {
            (Type::Number, Type::Number)
            | (Type::Bool, Type::Bool)
            | (Type::Nil, Type::Nil)
            | (Type::String, Type::String)
            | (Type::Void, Type::Void)
            | (Type::Unknown, Type::Unknown)
            | (Type::Any, Type::Any) => true,
            (Type::Class { name: n1 }, Type::Class { name: n2 }) => n1 == n2,
            (Type::Object { class: c1 }, Type::Object { class: c2 }) => self.type_equals(*c1, *c2),
            (Type::Array { inner: i1 }, Type::Array { inner: i2 }) => self.type_equals(*i1, *i2),
            (Type::Function { params: p1, ret: r1 }, Type::Function { params: p2, ret: r2 }) => {
                p1.len() == p2.len()
                    && p1.iter().zip(p2.iter()).all(|(x, y)| self.type_equals(*x, *y))
                    && self.type_equals(*r1, *r2)
            }
            _ => false,
        }
    }

    /// Whether a value of type `from` may be used where `to` is expected.
    /// `Any` is assignable to and from anything; everything else falls back
    /// to `type_equals` (spec §3, invariant d).
    pub fn is_assignable(&self, from: TypeRef, to: TypeRef) -> bool {
        let from_r = self.resolve(from);
        let to_r = self.resolve(to);
        if matches!(self.get(from_r), Type::Any) || matches!(self.get(to_r), Type::Any) {
            return true;
        }
        self.type_equals(from_r, to_r)
    }

    pub fn display(&self, r: TypeRef) -> String {
        match self.get(r) {
            Type::Number => "Number".into(),
            Type::Bool => "Bool".into(),
            Type::Nil => "Nil".into(),
            Type::String => "String".into(),
            Type::Void => "Void".into(),
            Type::Unknown => "Unknown".into(),
            Type::Any => "Any".into(),
            Type::Class { name } => name.clone(),
            Type::Object { class } => self.display(*class),
            Type::Array { inner } => format!("[]{}", self.display(*inner)),
            Type::Alias { name, .. } => name.clone(),
            Type::Function { params, ret } => {
                let ps: Vec<String> = params.iter().map(|p| self.display(*p)).collect();
                format!("({}): {}", ps.join(", "), self.display(*ret))
            }
        }
    }
}

impl Default for TypePool {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TypePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypePool").field("len", &self.len).finish()
    }
}

fn structurally_same(a: &Type, b: &Type) -> bool {
    match (a, b) {
        (Type::Class { name: n1 }, Type::Class { name: n2 }) => n1 == n2,
        (Type::Object { class: c1 }, Type::Object { class: c2 }) => c1 == c2,
        (Type::Array { inner: i1 }, Type::Array { inner: i2 }) => i1 == i2,
        (Type::Function { params: p1, ret: r1 }, Type::Function { params: p2, ret: r2 }) => p1 == p2 && r1 == r2,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_types_are_singletons() {
        let pool = TypePool::new();
        assert_eq!(pool.number(), pool.number());
        assert_ne!(pool.number(), pool.bool_());
    }

    #[test]
    fn function_types_intern_structurally() {
        let mut pool = TypePool::new();
        let n = pool.number();
        let f1 = pool.function(vec![n], n);
        let f2 = pool.function(vec![n], n);
        assert_eq!(f1, f2);
    }

    #[test]
    fn alias_resolves_transitively() {
        let mut pool = TypePool::new();
        let n = pool.number();
        let a1 = pool.alias("MyNum", n);
        let a2 = pool.alias("YourNum", a1);
        assert!(pool.type_equals(a2, n));
    }

    #[test]
    fn any_is_assignable_both_ways() {
        let mut pool = TypePool::new();
        let n = pool.number();
        assert!(pool.is_assignable(n, pool.any()));
        assert!(pool.is_assignable(pool.any(), n));
        let s = pool.string();
        assert!(!pool.type_equals(n, s));
    }

    #[test]
    fn class_equality_is_by_name_not_identity() {
        let mut pool = TypePool::new();
        let c1 = pool.class("Point");
        let c2 = pool.class("Point");
        // Interned to the same slot since classes dedup by name.
        assert_eq!(c1, c2);
    }
}
