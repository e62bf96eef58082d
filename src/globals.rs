//! The VM's global environment: top-level `var`/`fn`/`class` bindings,
//! looked up by name at `GetGlobal`/`SetGlobal`/`DefineGlobal` (spec §4.7).
//!
//! Built on the same Robin Hood table as the string interner, keyed
//! directly by the interned name's text rather than by `StringId`, since
//! the table itself doesn't know about the interner.

use crate::hash_table::HashTable;
use crate::value::Value;

#[derive(Default)]
pub struct Globals {
    table: HashTable<String, Value>,
}

impl Globals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&mut self, name: &str, value: Value) {
        self.table.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.table.get(&name.to_string()).copied()
    }

    /// Assigns to an existing global. Unlike `define`, this does not create
    /// a new binding — assigning to an undeclared global is a runtime error
    /// (spec §4.7, undefined-global rule).
    pub fn assign(&mut self, name: &str, value: Value) -> bool {
        if !self.table.contains(&name.to_string()) {
            return false;
        }
        self.table.insert(name.to_string(), value);
        true
    }

    pub fn iter_values(&self) -> impl Iterator<Item = Value> + '_ {
        self.table.iter().map(|(_, v)| *v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assigning_to_an_undefined_global_fails() {
        let mut globals = Globals::new();
        assert!(!globals.assign("x", Value::Number(1.0)));
    }

    #[test]
    fn define_then_assign_updates_the_binding() {
        let mut globals = Globals::new();
        globals.define("x", Value::Number(1.0));
        assert!(globals.assign("x", Value::Number(2.0)));
        assert!(matches!(globals.get("x"), Some(Value::Number(n)) if n == 2.0));
    }
}
