//! Bytecode representation and the compiler that emits it (spec §4.6).
//!
//! Mirrors the shape of `ouros::bytecode`'s module split: opcodes, the
//! compiled-code container, the emission builder, and the AST-to-bytecode
//! compiler each get their own file.

pub mod builder;
pub mod chunk;
pub mod compiler;
pub mod op;

pub use builder::CodeBuilder;
pub use chunk::{Code, Constant};
pub use compiler::Compiler;
pub use op::Opcode;
