//! The native-function boundary: how host-provided functions are named,
//! type-checked at the call site, and invoked from the VM (spec §6.2).
//!
//! Concrete bindings (the actual stdlib the host exposes — `print`,
//! `sqrt`, array helpers and the like) are outside this crate's scope; what
//! lives here is the ABI the host implements against: a registry the VM
//! looks functions up in, and the calling convention (arity check, argument
//! type check, `Void` results coerced to `Nil`) every call goes through.

use crate::type_pool::{TypePool, TypeRef};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeId(pub u32);

#[derive(Debug)]
pub enum NativeError {
    /// The native function itself failed (host-defined message); becomes a
    /// runtime error at the call site, same as any other VM fault.
    Failed(String),
}

/// The type signature a native function is declared with, checked against
/// the call site the same way a `qz`-defined function's signature is (spec
/// §4.5, native-function rules).
#[derive(Debug, Clone)]
pub struct NativeSignature {
    pub params: Vec<TypeRef>,
    pub return_type: TypeRef,
}

/// What a native call can do with heap-backed values — read a `String`
/// argument's text, or allocate a new one to return — without handing the
/// whole VM heap and interner to host code. The VM implements this itself
/// and passes `&mut dyn NativeContext` into every native call.
pub trait NativeContext {
    fn resolve_string(&self, value: Value) -> Option<String>;
    fn make_string(&mut self, text: &str) -> Value;
}

/// Implemented by the host embedding this crate. `call` receives already
/// arity- and type-checked arguments; it only needs to do the work and
/// produce a `Value` (or fail).
pub trait NativeFn {
    fn signature(&self, types: &TypePool) -> NativeSignature;
    fn call(&self, args: &[Value], ctx: &mut dyn NativeContext) -> Result<Value, NativeError>;
}

/// Where the checker and the VM look up `native fn` declarations by name.
/// A `native class` is just a class whose methods resolve through here
/// instead of through emitted bytecode.
pub trait NativeRegistry {
    fn lookup(&self, name: &str) -> Option<NativeId>;
    fn signature(&self, id: NativeId, types: &TypePool) -> NativeSignature;
    fn call(&self, id: NativeId, args: &[Value], ctx: &mut dyn NativeContext) -> Result<Value, NativeError>;
}

/// Performs the calling-convention coercion the VM applies on every native
/// call: a `Void`-returning native that yields no meaningful value reports
/// `Nil` to the caller, matching how a `qz`-defined `Void` function behaves.
pub fn coerce_result(types: &TypePool, return_type: TypeRef, result: Value) -> Value {
    if matches!(types.get(types.resolve(return_type)), crate::type_pool::Type::Void) {
        Value::Nil
    } else {
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Registry;

    impl NativeRegistry for Registry {
        fn lookup(&self, name: &str) -> Option<NativeId> {
            (name == "noop").then_some(NativeId(0))
        }

        fn signature(&self, _id: NativeId, types: &TypePool) -> NativeSignature {
            NativeSignature { params: vec![], return_type: types.void() }
        }

        fn call(&self, _id: NativeId, _args: &[Value], _ctx: &mut dyn NativeContext) -> Result<Value, NativeError> {
            Ok(Value::Bool(true))
        }
    }

    struct NoCtx;

    impl NativeContext for NoCtx {
        fn resolve_string(&self, _value: Value) -> Option<String> {
            None
        }

        fn make_string(&mut self, _text: &str) -> Value {
            Value::Nil
        }
    }

    #[test]
    fn void_returning_native_is_coerced_to_nil() {
        let types = TypePool::new();
        let registry = Registry;
        let id = registry.lookup("noop").unwrap();
        let sig = registry.signature(id, &types);
        let raw = registry.call(id, &[], &mut NoCtx).unwrap();
        assert!(matches!(coerce_result(&types, sig.return_type, raw), Value::Nil));
    }
}
