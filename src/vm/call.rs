//! Call mechanics: invoking a closure, a native function, a bound method,
//! or constructing an instance via `new`. Split out of the dispatch loop
//! the way `ouros::bytecode::vm`'s `call.rs` isolates callee resolution
//! from opcode fetch-and-decode.

use std::rc::Rc;

use indexmap::IndexMap;

use crate::native::coerce_result;
use crate::tracer::{TraceEvent, VmTracer};
use crate::value::{BoundMethod, ClassObj, Closure, FunctionProto, HeapId, Instance, Intrinsic, Obj, Value};
use crate::vm::{CallFrame, RuntimeError, Vm};

impl<'a, T: VmTracer> Vm<'a, T> {
    /// Calls whatever is at `stack[stack.len() - arg_count - 1]` with the
    /// `arg_count` values above it. On return, the whole `[callee, args...]`
    /// range collapses to a single result value — except for a
    /// `Value::Obj` closure call, which instead pushes a new `CallFrame` and
    /// lets the dispatch loop keep running inside it.
    pub(super) fn call_value(&mut self, arg_count: u8) -> Result<(), RuntimeError> {
        let arg_count = arg_count as usize;
        let callee_index = self.stack.len() - arg_count - 1;
        let callee = self.stack[callee_index];

        match callee {
            Value::Obj(id) => match self.heap.get(id) {
                Obj::Closure(closure) => {
                    let function = closure.function.clone();
                    self.push_call_frame(id, function, callee_index + 1, arg_count)
                }
                Obj::Native(native_id) => {
                    let native_id = *native_id;
                    let args = self.stack[callee_index + 1..].to_vec();
                    let sig = self.natives.signature(native_id, self.types);
                    if args.len() != sig.params.len() {
                        return Err(RuntimeError::ArityMismatch { expected: sig.params.len() as u8, got: args.len() as u8 });
                    }
                    let natives = self.natives;
                    let raw = natives.call(native_id, &args, self).map_err(|e| RuntimeError::NativeError(format!("{e:?}")))?;
                    let result = coerce_result(self.types, sig.return_type, raw);
                    self.stack.truncate(callee_index);
                    self.stack.push(result);
                    Ok(())
                }
                Obj::BoundMethod(bound) => {
                    let BoundMethod { receiver, method } = *bound;
                    self.stack[callee_index] = receiver;
                    let function = match self.heap.get(method) {
                        Obj::Closure(c) => c.function.clone(),
                        _ => return Err(RuntimeError::NotCallable("bound method target is not a function".into())),
                    };
                    self.push_call_frame(method, function, callee_index + 1, arg_count)
                }
                Obj::BoundIntrinsic { receiver, intrinsic } => {
                    let (receiver, intrinsic) = (*receiver, *intrinsic);
                    let args = self.stack[callee_index + 1..].to_vec();
                    let expected = intrinsic.arity();
                    if args.len() != expected as usize {
                        return Err(RuntimeError::ArityMismatch { expected, got: args.len() as u8 });
                    }
                    let result = self.call_intrinsic(receiver, intrinsic, &args)?;
                    self.stack.truncate(callee_index);
                    self.stack.push(result);
                    Ok(())
                }
                _ => Err(RuntimeError::NotCallable(format!("{} is not callable", self.heap.get(id).type_name()))),
            },
            other => Err(RuntimeError::NotCallable(format!("{} is not callable", other.type_name()))),
        }
    }

    fn push_call_frame(&mut self, closure: HeapId, function: Rc<FunctionProto>, stack_base: usize, arg_count: usize) -> Result<(), RuntimeError> {
        if arg_count != function.arity as usize {
            return Err(RuntimeError::ArityMismatch { expected: function.arity, got: arg_count as u8 });
        }
        if self.frames.len() >= self.config.max_frames {
            return Err(RuntimeError::StackOverflow);
        }
        self.tracer.on_event(TraceEvent::Call { name: function.name.clone(), depth: self.frames.len() });
        self.frames.push(CallFrame { closure, function, ip: 0, stack_base, open_upvalues: Vec::new() });
        Ok(())
    }

    /// `new ClassName(args...)`: looks the class up as a global, allocates a
    /// zero-initialized instance, then calls its `init` method (if any)
    /// exactly like an ordinary method call.
    pub(super) fn construct(&mut self, class_name: &str, arg_count: u8) -> Result<(), RuntimeError> {
        let class_value = self.globals.get(class_name).ok_or_else(|| RuntimeError::UndefinedGlobal(class_name.to_string()))?;
        let class_id = match class_value {
            Value::Obj(id) if matches!(self.heap.get(id), Obj::Class(_)) => id,
            _ => return Err(RuntimeError::NotCallable(format!("'{class_name}' is not a class"))),
        };
        let (fields, init) = match self.heap.get(class_id) {
            Obj::Class(class) => (class.fields.clone(), class.init),
            _ => unreachable!(),
        };
        let mut field_values = IndexMap::new();
        for field in fields {
            field_values.insert(field, Value::Nil);
        }
        let instance_id = self.heap.alloc(Obj::Instance(Instance { class: class_id, fields: field_values }));
        let instance_value = Value::Obj(instance_id);

        let arg_count = arg_count as usize;
        let callee_index = self.stack.len() - arg_count - 1;
        self.stack[callee_index] = instance_value;

        match init {
            Some(method_id) => {
                let function = match self.heap.get(method_id) {
                    Obj::Closure(c) => c.function.clone(),
                    _ => unreachable!(),
                };
                self.push_call_frame(method_id, function, callee_index + 1, arg_count)?;
            }
            None => {
                if arg_count != 0 {
                    return Err(RuntimeError::ArityMismatch { expected: 0, got: arg_count as u8 });
                }
                self.stack.truncate(callee_index);
                self.stack.push(instance_value);
            }
        }
        Ok(())
    }

    /// Builds the `Obj::Class` described by a `MakeClass` instruction: pops
    /// `method_count` closures already on the stack and pairs them with the
    /// method names that followed the opcode's operands.
    pub(super) fn make_class(&mut self, name: String, field_names: Vec<String>, method_names: Vec<String>) -> Result<(), RuntimeError> {
        let name_id = self.interner.intern(&name);
        let fields = field_names.iter().map(|f| self.interner.intern(f)).collect();

        let method_values: Vec<Value> = self.stack.split_off(self.stack.len() - method_names.len());
        let mut methods = IndexMap::new();
        let mut init = None;
        for (name, value) in method_names.iter().zip(method_values) {
            let id = match value {
                Value::Obj(id) => id,
                _ => return Err(RuntimeError::TypeError("method value was not a closure".into())),
            };
            let interned = self.interner.intern(name);
            if name == "init" {
                init = Some(id);
            }
            methods.insert(interned, id);
        }

        let class_id = self.heap.alloc(Obj::Class(ClassObj { name: name_id, fields, methods, init }));
        self.stack.push(Value::Obj(class_id));
        Ok(())
    }

    pub(super) fn get_property(&mut self, name: &str) -> Result<Value, RuntimeError> {
        let receiver = *self.stack.last().expect("GetProp operates on the value just pushed");
        if let Value::Obj(id) = receiver {
            let native_class = match self.heap.get(id) {
                Obj::Array { .. } => Some("Array"),
                Obj::Str(_) => Some("String"),
                _ => None,
            };
            if let Some(class) = native_class {
                let intrinsic = Intrinsic::lookup(class, name).ok_or_else(|| RuntimeError::UndefinedProperty(name.to_string()))?;
                let bound = self.heap.alloc(Obj::BoundIntrinsic { receiver, intrinsic });
                return Ok(Value::Obj(bound));
            }
        }
        let instance_id = match receiver {
            Value::Obj(id) if matches!(self.heap.get(id), Obj::Instance(_)) => id,
            Value::Obj(id) => return Err(RuntimeError::TypeError(format!("{} has no properties", self.heap.get(id).type_name()))),
            other => return Err(RuntimeError::TypeError(format!("{} has no properties", other.type_name()))),
        };
        let name_id = self.interner.intern(name);
        let (class_id, field_value) = match self.heap.get(instance_id) {
            Obj::Instance(instance) => (instance.class, instance.fields.get(&name_id).copied()),
            _ => unreachable!(),
        };
        if let Some(value) = field_value {
            return Ok(value);
        }
        let method_id = match self.heap.get(class_id) {
            Obj::Class(class) => class.methods.get(&name_id).copied(),
            _ => unreachable!(),
        };
        match method_id {
            Some(method) => {
                let bound = self.heap.alloc(Obj::BoundMethod(BoundMethod { receiver, method }));
                Ok(Value::Obj(bound))
            }
            None => Err(RuntimeError::UndefinedProperty(name.to_string())),
        }
    }

    pub(super) fn set_property(&mut self, name: &str, value: Value) -> Result<(), RuntimeError> {
        let receiver = self.stack.pop().expect("SetProp's receiver is below the assigned value");
        let instance_id = match receiver {
            Value::Obj(id) if matches!(self.heap.get(id), Obj::Instance(_)) => id,
            other => return Err(RuntimeError::TypeError(format!("{} has no properties", other.type_name()))),
        };
        let name_id = self.interner.intern(name);
        match self.heap.get_mut(instance_id) {
            Obj::Instance(instance) => {
                instance.fields.insert(name_id, value);
            }
            _ => unreachable!(),
        }
        Ok(())
    }

    /// Runs an `Array`/`String` built-in method body directly against the
    /// heap, the way `qcc/array.c` and `qcc/string.c` reach into `ObjArray`/
    /// `ObjString` rather than going through the general native-call path.
    pub(super) fn call_intrinsic(&mut self, receiver: Value, intrinsic: Intrinsic, args: &[Value]) -> Result<Value, RuntimeError> {
        let receiver_id = match receiver {
            Value::Obj(id) => id,
            _ => unreachable!("intrinsics are only ever bound to heap receivers"),
        };
        match intrinsic {
            Intrinsic::ArrayPush => {
                match self.heap.get_mut(receiver_id) {
                    Obj::Array { elements, .. } => elements.push(args[0]),
                    _ => unreachable!("ArrayPush bound to a non-array receiver"),
                }
                Ok(Value::Nil)
            }
            Intrinsic::ArrayGet => {
                let index = Self::array_index(args[0])?;
                match self.heap.get(receiver_id) {
                    Obj::Array { elements, .. } => {
                        elements.get(index).copied().ok_or_else(|| RuntimeError::TypeError("array index out of bounds".into()))
                    }
                    _ => unreachable!("ArrayGet bound to a non-array receiver"),
                }
            }
            Intrinsic::ArraySet => {
                let index = Self::array_index(args[0])?;
                let value = args[1];
                match self.heap.get_mut(receiver_id) {
                    Obj::Array { elements, .. } => {
                        if index >= elements.len() {
                            return Err(RuntimeError::TypeError("array index out of bounds".into()));
                        }
                        elements[index] = value;
                    }
                    _ => unreachable!("ArraySet bound to a non-array receiver"),
                }
                Ok(value)
            }
            Intrinsic::ArrayLength => match self.heap.get(receiver_id) {
                Obj::Array { elements, .. } => Ok(Value::Number(elements.len() as f64)),
                _ => unreachable!("ArrayLength bound to a non-array receiver"),
            },
            Intrinsic::StringLength => Ok(Value::Number(self.string_text(receiver_id).chars().count() as f64)),
            Intrinsic::StringGetChar => {
                let index = Self::array_index(args[0])?;
                let ch = self
                    .string_text(receiver_id)
                    .chars()
                    .nth(index)
                    .ok_or_else(|| RuntimeError::TypeError("string index out of bounds".into()))?;
                let id = self.interner.intern(&ch.to_string());
                Ok(Value::Obj(self.heap.alloc(Obj::Str(id))))
            }
            Intrinsic::StringToAscii => {
                let ch = self
                    .string_text(receiver_id)
                    .chars()
                    .next()
                    .ok_or_else(|| RuntimeError::TypeError("to_ascii on an empty string".into()))?;
                Ok(Value::Number(ch as u32 as f64))
            }
        }
    }

    fn array_index(value: Value) -> Result<usize, RuntimeError> {
        match value {
            Value::Number(n) if n >= 0.0 => Ok(n as usize),
            Value::Number(_) => Err(RuntimeError::TypeError("negative array index".into())),
            other => Err(RuntimeError::TypeError(format!("expected a Number index, got {}", other.type_name()))),
        }
    }

    fn string_text(&self, id: HeapId) -> String {
        match self.heap.get(id) {
            Obj::Str(s) => self.interner.resolve(*s).to_string(),
            _ => unreachable!("string intrinsic bound to a non-string receiver"),
        }
    }

    /// Finds (or lazily creates) the open upvalue cell for an absolute
    /// stack slot within the current frame, so two closures capturing the
    /// same local share one cell.
    pub(super) fn capture_local(&mut self, absolute_slot: usize) -> HeapId {
        let frame = self.frames.last_mut().expect("capturing an upvalue always happens inside a call");
        if let Some((_, id)) = frame.open_upvalues.iter().find(|(slot, _)| *slot == absolute_slot) {
            return *id;
        }
        let id = self.heap.alloc(Obj::Upvalue(crate::value::UpvalueState::Open(absolute_slot)));
        self.frames.last_mut().unwrap().open_upvalues.push((absolute_slot, id));
        id
    }

    pub(super) fn close_frame_upvalues(&mut self, frame: &CallFrame) {
        for (slot, id) in &frame.open_upvalues {
            let value = self.stack[*slot];
            *self.heap.get_mut(*id) = Obj::Upvalue(crate::value::UpvalueState::Closed(value));
        }
    }

    pub(super) fn make_closure(&mut self, function: Rc<FunctionProto>, upvalues: Vec<HeapId>) -> Value {
        let id = self.heap.alloc(Obj::Closure(Closure { function, upvalues }));
        Value::Obj(id)
    }
}
