//! Execution tracing: this crate's stand-in for a logging layer, grounded
//! on `ouros::tracer`'s `VmTracer` trait. There is no `log`/`tracing`
//! dependency here — the VM is generic over a `VmTracer` implementation and
//! the no-op case monomorphizes away to nothing, so tracing costs zero
//! unless a caller asks for it.

use crate::bytecode::Opcode;

#[derive(Debug, Clone)]
pub enum TraceEvent {
    Instruction { ip: usize, opcode: Opcode, stack_depth: usize },
    Call { name: String, depth: usize },
    Return { depth: usize },
    GlobalDefine { name: String },
}

pub trait VmTracer {
    fn on_event(&mut self, event: TraceEvent);
}

/// Costs nothing: every call is an empty function the compiler inlines
/// away entirely.
pub struct NoopTracer;

impl VmTracer for NoopTracer {
    #[inline(always)]
    fn on_event(&mut self, _event: TraceEvent) {}
}

/// Prints every event to stderr as it happens — useful for debugging a
/// single run interactively, not for production use.
pub struct StderrTracer;

impl VmTracer for StderrTracer {
    fn on_event(&mut self, event: TraceEvent) {
        match event {
            TraceEvent::Instruction { ip, opcode, stack_depth } => {
                eprintln!("{ip:04} {opcode:?} (stack={stack_depth})");
            }
            TraceEvent::Call { name, depth } => eprintln!("{}call {name}", "  ".repeat(depth)),
            TraceEvent::Return { depth } => eprintln!("{}return", "  ".repeat(depth)),
            TraceEvent::GlobalDefine { name } => eprintln!("define global {name}"),
        }
    }
}

/// Collects every event into a `Vec` for later inspection — what tests in
/// this crate use to assert on VM behavior without depending on stderr
/// output.
#[derive(Default)]
pub struct RecordingTracer {
    pub events: Vec<TraceEvent>,
}

impl RecordingTracer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VmTracer for RecordingTracer {
    fn on_event(&mut self, event: TraceEvent) {
        self.events.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_tracer_keeps_events_in_order() {
        let mut tracer = RecordingTracer::new();
        tracer.on_event(TraceEvent::Call { name: "f".into(), depth: 0 });
        tracer.on_event(TraceEvent::Return { depth: 0 });
        assert_eq!(tracer.events.len(), 2);
    }
}
