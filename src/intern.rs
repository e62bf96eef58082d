//! String interning. Every `Value::String` and every identifier used as a
//! global or property name is stored once in the heap's string table and
//! referred to everywhere else by `StringId`, grounded on the `StringId`
//! newtype in `ouros::intern`.
//!
//! Entries are reclaimed at GC time (spec §4.8): `evict_unreachable` drops
//! every string whose id wasn't reported live by the last `Heap::collect`,
//! using the same free-list trick as `heap.rs` so the freed index can be
//! handed back out by a later `intern` without disturbing anyone else's
//! `StringId`.

use std::sync::LazyLock;

use ahash::AHashSet;

use crate::hash_table::HashTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StringId(pub(crate) u32);

impl StringId {
    fn from_index(index: usize) -> Self {
        Self(index as u32)
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

/// The single-character strings show up constantly (property names,
/// one-character identifiers) so they're pre-interned once at startup
/// instead of hashing the same handful of bytes over and over.
static SINGLE_CHAR_STRS: LazyLock<[&'static str; 128]> = LazyLock::new(|| {
    let mut arr = [""; 128];
    for (i, slot) in arr.iter_mut().enumerate() {
        if let Some(c) = char::from_u32(i as u32) {
            let s: &'static str = Box::leak(c.to_string().into_boxed_str());
            *slot = s;
        }
    }
    arr
});

/// Interned strings, keyed for lookup by their byte content and stored
/// densely so they can also be indexed by `StringId`. A freed slot (see
/// `evict_unreachable`) becomes `None` and its index is queued on `free`
/// for reuse, the same way `Heap`'s slots are.
pub struct Interner {
    strings: Vec<Option<std::rc::Rc<str>>>,
    free: Vec<u32>,
    lookup: HashTable<String, StringId>,
}

impl Interner {
    pub fn new() -> Self {
        let mut interner = Self { strings: Vec::new(), free: Vec::new(), lookup: HashTable::new() };
        for s in SINGLE_CHAR_STRS.iter() {
            if !s.is_empty() {
                interner.intern(s);
            }
        }
        interner
    }

    pub fn intern(&mut self, s: &str) -> StringId {
        if let Some(&id) = self.lookup.get(&s.to_string()) {
            return id;
        }
        let id = if let Some(index) = self.free.pop() {
            self.strings[index as usize] = Some(std::rc::Rc::from(s));
            StringId::from_index(index as usize)
        } else {
            let index = self.strings.len();
            self.strings.push(Some(std::rc::Rc::from(s)));
            StringId::from_index(index)
        };
        self.lookup.insert(s.to_string(), id);
        id
    }

    pub fn resolve(&self, id: StringId) -> &str {
        self.strings[id.index()].as_deref().expect("resolved a StringId that was already evicted")
    }

    /// Drops every interned entry not named in `reachable`, per spec §4.8:
    /// string table entries whose keys are white at the end of marking must
    /// not keep themselves alive. Called once per GC cycle, after marking
    /// and before the next allocation.
    pub fn evict_unreachable(&mut self, reachable: &AHashSet<StringId>) {
        for index in 0..self.strings.len() {
            let id = StringId::from_index(index);
            if reachable.contains(&id) {
                continue;
            }
            if let Some(text) = self.strings[index].take() {
                self.lookup.remove(&text.to_string());
                self.free.push(index as u32);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.strings.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Interner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_the_same_text_returns_the_same_id() {
        let mut interner = Interner::new();
        let a = interner.intern("hello");
        let b = interner.intern("hello");
        assert_eq!(a, b);
        assert_eq!(interner.resolve(a), "hello");
    }

    #[test]
    fn different_text_gets_different_ids() {
        let mut interner = Interner::new();
        let a = interner.intern("foo");
        let b = interner.intern("bar");
        assert_ne!(a, b);
    }

    #[test]
    fn eviction_drops_unreached_entries_and_frees_their_slot() {
        let mut interner = Interner::new();
        let kept = interner.intern("kept");
        let garbage = interner.intern("garbage");
        let reachable = AHashSet::from_iter([kept]);
        interner.evict_unreachable(&reachable);
        assert_eq!(interner.resolve(kept), "kept");

        let reinterned = interner.intern("garbage");
        assert_eq!(reinterned, garbage, "freed slot should be reused by the next intern");
        assert_eq!(interner.resolve(reinterned), "garbage");
    }
}
