//! Emission helpers used by the compiler, grounded on
//! `ouros::bytecode::builder::CodeBuilder`'s shape: track the current source
//! location once, then let every `emit_*` call consult it instead of
//! threading a line number through every call site.

use crate::bytecode::chunk::{Code, Constant};
use crate::bytecode::op::Opcode;

pub struct CodeBuilder {
    code: Code,
    current_line: u32,
}

impl CodeBuilder {
    pub fn new() -> Self {
        Self { code: Code::new(), current_line: 0 }
    }

    pub fn set_location(&mut self, line: u32) {
        self.current_line = line;
    }

    pub fn emit(&mut self, op: Opcode) {
        self.code.push_byte(op as u8, self.current_line);
    }

    pub fn emit_u8(&mut self, byte: u8) {
        self.code.push_byte(byte, self.current_line);
    }

    pub fn emit_u16(&mut self, value: u16) {
        self.code.push_u16(value, self.current_line);
    }

    pub fn emit_op_u16(&mut self, op: Opcode, operand: u16) {
        self.emit(op);
        self.emit_u16(operand);
    }

    pub fn emit_op_u8(&mut self, op: Opcode, operand: u8) {
        self.emit(op);
        self.emit_u8(operand);
    }

    pub fn add_constant(&mut self, value: Constant) -> u16 {
        self.code.add_constant(value)
    }

    pub fn emit_constant(&mut self, value: Constant) {
        let index = self.add_constant(value);
        self.emit_op_u16(Opcode::Constant, index);
    }

    /// Emits a jump with a placeholder offset and returns the offset of that
    /// placeholder, to be filled in later by [`Self::patch_jump`] once the
    /// jump target is known.
    pub fn emit_jump(&mut self, op: Opcode) -> usize {
        self.emit(op);
        let placeholder = self.code.len();
        self.emit_u16(0xFFFF);
        placeholder
    }

    /// Backpatches the jump placeholder at `offset` so it lands on the
    /// instruction stream's current end (the "here" of wherever the caller
    /// has emitted to by the time the jump target is known).
    pub fn patch_jump(&mut self, offset: usize) {
        let jump_len = self.code.len() - offset - 2;
        let jump_len: u16 = jump_len.try_into().expect("jump target further than u16::MAX bytes away");
        let bytes = jump_len.to_be_bytes();
        self.code.bytes[offset] = bytes[0];
        self.code.bytes[offset + 1] = bytes[1];
    }

    /// Emits a backward jump (`Opcode::Loop`) straight to `loop_start`.
    pub fn emit_loop(&mut self, loop_start: usize) {
        self.emit(Opcode::Loop);
        let offset = self.code.len() - loop_start + 2;
        let offset: u16 = offset.try_into().expect("loop body further than u16::MAX bytes away");
        self.emit_u16(offset);
    }

    pub fn current_offset(&self) -> usize {
        self.code.len()
    }

    pub fn finish(self) -> Code {
        self.code
    }
}

impl Default for CodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_jump_patches_to_the_current_end() {
        let mut builder = CodeBuilder::new();
        let placeholder = builder.emit_jump(Opcode::Jump);
        builder.emit(Opcode::Nop);
        builder.emit(Opcode::Nop);
        builder.patch_jump(placeholder);
        let code = builder.finish();
        assert_eq!(code.read_u16(placeholder), 2);
    }

    #[test]
    fn backward_loop_offset_points_to_loop_start() {
        let mut builder = CodeBuilder::new();
        let loop_start = builder.current_offset();
        builder.emit(Opcode::Nop);
        builder.emit_loop(loop_start);
        let code = builder.finish();
        // Opcode::Loop byte + its u16 operand = 3 bytes emitted after Nop.
        assert_eq!(code.read_u16(2), 4);
    }
}
