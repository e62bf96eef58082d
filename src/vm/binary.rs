//! Arithmetic, comparison and equality semantics for `Value`, split out of
//! the dispatch loop the way `ouros::bytecode::vm`'s `binary.rs`/`compare.rs`
//! separate operator logic from opcode fetch-and-decode.

use crate::heap::Heap;
use crate::value::{Obj, Value};
use crate::vm::RuntimeError;

fn as_number(v: Value) -> Result<f64, RuntimeError> {
    match v {
        Value::Number(n) => Ok(n),
        other => Err(RuntimeError::TypeError(format!("expected Number, got {}", other.type_name()))),
    }
}

fn is_string(v: Value, heap: &Heap) -> bool {
    matches!(v, Value::Obj(id) if matches!(heap.get(id), Obj::Str(_)))
}

/// `+` is overloaded: numeric addition, or string concatenation when either
/// side is a string (matching `qcc`'s dynamic-dispatch-on-runtime-tag
/// behavior for this one operator, spec §4.4).
pub fn add(left: Value, right: Value, heap: &Heap) -> Result<BinResult, RuntimeError> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => Ok(BinResult::Number(a + b)),
        (l, r) if is_string(l, heap) || is_string(r, heap) => Ok(BinResult::Concat(l, r)),
        _ => Err(RuntimeError::TypeError("'+' requires two Numbers or at least one String".into())),
    }
}

/// `add` can't allocate (it doesn't have `&mut Heap`), so it reports back
/// either an immediate numeric result or a request to concatenate — the VM
/// performs the actual string allocation with a mutable heap borrow.
pub enum BinResult {
    Number(f64),
    Concat(Value, Value),
}

pub fn sub(left: Value, right: Value) -> Result<f64, RuntimeError> {
    Ok(as_number(left)? - as_number(right)?)
}

pub fn mul(left: Value, right: Value) -> Result<f64, RuntimeError> {
    Ok(as_number(left)? * as_number(right)?)
}

pub fn div(left: Value, right: Value) -> Result<f64, RuntimeError> {
    let divisor = as_number(right)?;
    if divisor == 0.0 {
        return Err(RuntimeError::DivisionByZero);
    }
    Ok(as_number(left)? / divisor)
}

pub fn rem(left: Value, right: Value) -> Result<f64, RuntimeError> {
    let divisor = as_number(right)?;
    if divisor == 0.0 {
        return Err(RuntimeError::DivisionByZero);
    }
    Ok(as_number(left)? % divisor)
}

pub fn negate(value: Value) -> Result<f64, RuntimeError> {
    Ok(-as_number(value)?)
}

pub fn greater(left: Value, right: Value) -> Result<bool, RuntimeError> {
    Ok(as_number(left)? > as_number(right)?)
}

pub fn lower(left: Value, right: Value) -> Result<bool, RuntimeError> {
    Ok(as_number(left)? < as_number(right)?)
}

/// Reference-typed values (arrays, instances, closures) compare by
/// identity; immediates and interned strings compare by value.
pub fn values_equal(left: Value, right: Value, heap: &Heap) -> bool {
    match (left, right) {
        (Value::Nil, Value::Nil) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Number(a), Value::Number(b)) => a == b,
        (Value::Obj(a), Value::Obj(b)) => {
            if a == b {
                return true;
            }
            match (heap.get(a), heap.get(b)) {
                (Obj::Str(x), Obj::Str(y)) => x == y,
                _ => false,
            }
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn division_by_zero_is_a_runtime_error() {
        assert!(matches!(div(Value::Number(1.0), Value::Number(0.0)), Err(RuntimeError::DivisionByZero)));
    }

    #[test]
    fn equal_numbers_compare_by_value() {
        let heap = Heap::new();
        assert!(values_equal(Value::Number(1.0), Value::Number(1.0), &heap));
        assert!(!values_equal(Value::Number(1.0), Value::Number(2.0), &heap));
    }
}
