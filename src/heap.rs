//! The garbage-collected heap: a mark-sweep collector over an intrusive
//! free-list arena of [`Obj`]s, triggered by allocation pressure (spec
//! §4.8). Tracing uses an explicit gray worklist rather than recursion, so a
//! deep array-of-arrays can't blow the native stack during collection.

use ahash::AHashSet;

use crate::intern::StringId;
use crate::value::{HeapId, Obj, UpvalueState, Value};

enum Slot {
    Occupied { obj: Obj, marked: bool },
    Free { next: Option<u32> },
}

/// A point-in-time snapshot of heap occupancy, grounded on
/// `ouros::heap::HeapStats` — used by tests and by an embedder that wants to
/// observe GC behavior without re-deriving it from `Heap`'s internals.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeapStats {
    pub live_objects: usize,
    pub free_slots: usize,
    pub total_slots: usize,
    pub bytes_allocated: usize,
}

pub struct Heap {
    slots: Vec<Slot>,
    free_head: Option<u32>,
    bytes_allocated: usize,
    next_gc_trigger: usize,
    gray: Vec<HeapId>,
}

const INITIAL_GC_TRIGGER: usize = 1 << 20;
const GC_GROWTH_FACTOR: usize = 2;
/// A rough per-object overhead used to decide when to collect; the exact
/// value doesn't matter for correctness, only for how eagerly we collect.
const OBJ_OVERHEAD_BYTES: usize = 48;

impl Heap {
    pub fn new() -> Self {
        Self { slots: Vec::new(), free_head: None, bytes_allocated: 0, next_gc_trigger: INITIAL_GC_TRIGGER, gray: Vec::new() }
    }

    pub fn alloc(&mut self, obj: Obj) -> HeapId {
        self.bytes_allocated += OBJ_OVERHEAD_BYTES;
        if let Some(index) = self.free_head {
            let slot = &mut self.slots[index as usize];
            let next = match slot {
                Slot::Free { next } => *next,
                Slot::Occupied { .. } => unreachable!("free list pointed at an occupied slot"),
            };
            self.free_head = next;
            *slot = Slot::Occupied { obj, marked: false };
            HeapId(index)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot::Occupied { obj, marked: false });
            HeapId(index)
        }
    }

    pub fn get(&self, id: HeapId) -> &Obj {
        match &self.slots[id.0 as usize] {
            Slot::Occupied { obj, .. } => obj,
            Slot::Free { .. } => panic!("dangling HeapId {id:?}"),
        }
    }

    pub fn get_mut(&mut self, id: HeapId) -> &mut Obj {
        match &mut self.slots[id.0 as usize] {
            Slot::Occupied { obj, .. } => obj,
            Slot::Free { .. } => panic!("dangling HeapId {id:?}"),
        }
    }

    pub fn should_collect(&self) -> bool {
        self.bytes_allocated > self.next_gc_trigger
    }

    fn mark_value(&mut self, value: Value) {
        if let Value::Obj(id) = value {
            self.mark(id);
        }
    }

    fn mark(&mut self, id: HeapId) {
        let already_marked = match &mut self.slots[id.0 as usize] {
            Slot::Occupied { marked, .. } => std::mem::replace(marked, true),
            Slot::Free { .. } => return,
        };
        if !already_marked {
            self.gray.push(id);
        }
    }

    fn blacken(&mut self, id: HeapId) {
        let children: Vec<HeapId> = match self.get(id) {
            Obj::Array { elements, .. } => elements.iter().filter_map(|v| if let Value::Obj(h) = v { Some(*h) } else { None }).collect(),
            Obj::Closure(closure) => closure.upvalues.clone(),
            Obj::Instance(instance) => {
                let mut ids = vec![instance.class];
                ids.extend(instance.fields.values().filter_map(|v| if let Value::Obj(h) = v { Some(*h) } else { None }));
                ids
            }
            Obj::Class(class) => {
                let mut ids: Vec<HeapId> = class.methods.values().copied().collect();
                if let Some(init) = class.init {
                    ids.push(init);
                }
                ids
            }
            Obj::BoundMethod(bound) => {
                let mut ids = vec![bound.method];
                if let Value::Obj(h) = bound.receiver {
                    ids.push(h);
                }
                ids
            }
            Obj::BoundIntrinsic { receiver: Value::Obj(h), .. } => vec![*h],
            Obj::Upvalue(UpvalueState::Closed(Value::Obj(h))) => vec![*h],
            Obj::BoundIntrinsic { .. } | Obj::Upvalue(_) | Obj::Str(_) | Obj::Function(_) | Obj::Native(_) => Vec::new(),
        };
        for child in children {
            self.mark(child);
        }
    }

    /// Runs a full mark-sweep cycle. `roots` yields every value currently
    /// reachable from outside the heap: the VM's value stack, the globals
    /// table, and any open upvalue cells. Returns every `StringId` still
    /// reachable through a marked object, so the caller can evict the rest
    /// from the interner (spec §4.8).
    pub fn collect(&mut self, roots: impl IntoIterator<Item = Value>) -> AHashSet<StringId> {
        for slot in &mut self.slots {
            if let Slot::Occupied { marked, .. } = slot {
                *marked = false;
            }
        }
        for root in roots {
            self.mark_value(root);
        }
        while let Some(id) = self.gray.pop() {
            self.blacken(id);
        }
        let reachable_strings = self.reachable_strings();
        self.sweep();
        self.next_gc_trigger = self.bytes_allocated * GC_GROWTH_FACTOR + INITIAL_GC_TRIGGER;
        reachable_strings
    }

    /// Every `StringId` referenced by a marked object: a boxed `Str`
    /// directly, or a class/instance's name, field names or method-table
    /// keys. Must run after marking and before `sweep` clears the bits.
    fn reachable_strings(&self) -> AHashSet<StringId> {
        let mut ids = AHashSet::new();
        for slot in &self.slots {
            let Slot::Occupied { obj, marked: true } = slot else { continue };
            match obj {
                Obj::Str(id) => {
                    ids.insert(*id);
                }
                Obj::Class(class) => {
                    ids.insert(class.name);
                    ids.extend(class.fields.iter().copied());
                    ids.extend(class.methods.keys().copied());
                }
                Obj::Instance(instance) => {
                    ids.extend(instance.fields.keys().copied());
                }
                _ => {}
            }
        }
        ids
    }

    fn sweep(&mut self) {
        for index in 0..self.slots.len() {
            let is_garbage = matches!(&self.slots[index], Slot::Occupied { marked: false, .. });
            if is_garbage {
                self.bytes_allocated = self.bytes_allocated.saturating_sub(OBJ_OVERHEAD_BYTES);
                self.slots[index] = Slot::Free { next: self.free_head };
                self.free_head = Some(index as u32);
            }
        }
    }

    pub fn stats(&self) -> HeapStats {
        let live_objects = self.slots.iter().filter(|s| matches!(s, Slot::Occupied { .. })).count();
        HeapStats {
            live_objects,
            free_slots: self.slots.len() - live_objects,
            total_slots: self.slots.len(),
            bytes_allocated: self.bytes_allocated,
        }
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn string_id(n: u32) -> StringId {
        StringId(n)
    }

    #[test]
    fn unreachable_objects_are_swept() {
        let mut heap = Heap::new();
        let kept = heap.alloc(Obj::Str(string_id(0)));
        let _garbage = heap.alloc(Obj::Str(string_id(1)));
        let reachable = heap.collect([Value::Obj(kept)]);
        assert_eq!(heap.stats().live_objects, 1);
        assert!(reachable.contains(&string_id(0)));
        assert!(!reachable.contains(&string_id(1)));
    }

    #[test]
    fn class_name_and_method_names_are_reported_reachable() {
        let mut heap = Heap::new();
        let method = heap.alloc(Obj::Function(std::rc::Rc::new(crate::value::FunctionProto {
            name: "greet".to_string(),
            arity: 0,
            upvalue_count: 0,
            param_types: Vec::new(),
            return_type: crate::type_pool::TypePool::new().void(),
            code: crate::bytecode::chunk::Code::default(),
        })));
        let mut methods = indexmap::IndexMap::new();
        methods.insert(string_id(2), method);
        let class = heap.alloc(Obj::Class(crate::value::ClassObj {
            name: string_id(1),
            fields: vec![string_id(3)],
            methods,
            init: None,
        }));
        let reachable = heap.collect([Value::Obj(class)]);
        assert!(reachable.contains(&string_id(1)));
        assert!(reachable.contains(&string_id(2)));
        assert!(reachable.contains(&string_id(3)));
    }

    #[test]
    fn arrays_keep_their_elements_alive() {
        let mut heap = Heap::new();
        let inner = heap.alloc(Obj::Str(string_id(0)));
        let array = heap.alloc(Obj::Array { elements: vec![Value::Obj(inner)].into(), element_type: crate::type_pool::TypePool::new().any() });
        heap.collect([Value::Obj(array)]);
        assert_eq!(heap.stats().live_objects, 2);
    }

    #[test]
    fn freed_slots_are_reused_on_next_alloc() {
        let mut heap = Heap::new();
        let a = heap.alloc(Obj::Str(string_id(0)));
        heap.collect([]);
        let _ = a;
        let total_before = heap.stats().total_slots;
        heap.alloc(Obj::Str(string_id(1)));
        assert_eq!(heap.stats().total_slots, total_before);
    }
}
