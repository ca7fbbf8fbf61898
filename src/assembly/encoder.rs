//! Instruction encoding with label resolution.
//!
//! [`Assembler`] is the reverse counterpart of the decoder: it emits opcode and operand
//! cells, and resolves named labels used as jump, call and case targets once the whole
//! function body is known. The decompiler never needs it at run time; tests, benchmarks and
//! the fuzz harness use it to produce well-formed programs.
//!
//! # Usage Examples
//!
//! ```rust
//! use smxscope::{assembly::Assembler, disassembler::Opcode};
//!
//! let mut asm = Assembler::new();
//! asm.emit(Opcode::Proc, &[])?;
//! asm.emit(Opcode::LoadSPri, &[12])?;
//! asm.emit_branch(Opcode::Jzer, "zero")?;
//! asm.emit(Opcode::ConstPri, &[1])?;
//! asm.emit(Opcode::Retn, &[])?;
//! asm.define_label("zero")?;
//! asm.emit(Opcode::ZeroPri, &[])?;
//! asm.emit(Opcode::Retn, &[])?;
//!
//! let code = asm.finalize()?;
//! assert_eq!(code.len(), 4 * 10);
//! # Ok::<(), smxscope::Error>(())
//! ```

use std::collections::HashMap;

use crate::{disassembler::Opcode, Error, Result};

/// A pending reference to a label, patched during [`Assembler::finalize`].
#[derive(Debug, Clone)]
struct LabelFixup {
    /// Label being referenced
    label: String,
    /// Byte offset of the operand cell to patch
    position: usize,
}

/// Encodes instructions into code cells.
#[derive(Debug, Default)]
pub struct Assembler {
    bytecode: Vec<u8>,
    labels: HashMap<String, u32>,
    fixups: Vec<LabelFixup>,
}

impl Assembler {
    /// Creates an empty assembler positioned at address 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an assembler whose first instruction lands at `base`, padding with `NOP`s.
    ///
    /// Useful to place several functions in one code segment.
    #[must_use]
    pub fn at(base: u32) -> Self {
        let mut asm = Self::default();
        while asm.current_position() < base {
            asm.push_cell(Opcode::Nop.cell());
        }
        asm
    }

    /// Emits an instruction with literal operand cells.
    ///
    /// # Errors
    /// Returns [`Error::Error`] if the operand count does not match the opcode.
    pub fn emit(&mut self, opcode: Opcode, operands: &[i32]) -> Result<()> {
        if opcode == Opcode::Casetbl {
            return Err(Error::Error(
                "casetbl must be emitted with emit_case_table".to_string(),
            ));
        }
        if operands.len() != opcode.operand_count() {
            return Err(Error::Error(format!(
                "{} expects {} operands, got {}",
                opcode.mnemonic(),
                opcode.operand_count(),
                operands.len()
            )));
        }

        self.push_cell(opcode.cell());
        for &operand in operands {
            self.push_cell(operand);
        }
        Ok(())
    }

    /// Emits a jump, `CALL` or `SWITCH` whose code operand refers to `label`.
    ///
    /// # Errors
    /// Returns [`Error::Error`] if the opcode takes no code operand.
    pub fn emit_branch(&mut self, opcode: Opcode, label: &str) -> Result<()> {
        if !opcode.has_code_operand() {
            return Err(Error::Error(format!(
                "{} does not take a code operand",
                opcode.mnemonic()
            )));
        }

        self.push_cell(opcode.cell());
        self.push_fixup(label);
        Ok(())
    }

    /// Emits a `CASETBL` with a default target and `(value, label)` cases.
    ///
    /// # Errors
    /// Returns [`Error::Error`] if the table has more cases than a cell can count.
    pub fn emit_case_table(&mut self, default: &str, cases: &[(i32, &str)]) -> Result<()> {
        let count = i32::try_from(cases.len())
            .map_err(|_| Error::Error("case table too large".to_string()))?;

        self.push_cell(Opcode::Casetbl.cell());
        self.push_cell(count);
        self.push_fixup(default);
        for (value, label) in cases {
            self.push_cell(*value);
            self.push_fixup(label);
        }
        Ok(())
    }

    /// Binds `name` to the current position.
    ///
    /// # Errors
    /// Returns [`Error::Error`] if the label was already defined.
    pub fn define_label(&mut self, name: &str) -> Result<()> {
        let position = self.current_position();
        if self.labels.insert(name.to_string(), position).is_some() {
            return Err(Error::Error(format!("Label '{name}' defined twice")));
        }
        Ok(())
    }

    /// Address of the next emitted cell.
    #[must_use]
    pub fn current_position(&self) -> u32 {
        u32::try_from(self.bytecode.len()).unwrap_or(u32::MAX)
    }

    /// Address bound to a label, if defined.
    #[must_use]
    pub fn label_offset(&self, name: &str) -> Option<u32> {
        self.labels.get(name).copied()
    }

    /// Resolves all label references and returns the code bytes.
    ///
    /// # Errors
    /// Returns [`Error::Error`] if a referenced label was never defined.
    pub fn finalize(mut self) -> Result<Vec<u8>> {
        for fixup in &self.fixups {
            let target = self
                .labels
                .get(&fixup.label)
                .ok_or_else(|| Error::Error(format!("Undefined label '{}'", fixup.label)))?;
            self.bytecode[fixup.position..fixup.position + 4]
                .copy_from_slice(&target.to_le_bytes());
        }
        Ok(self.bytecode)
    }

    fn push_cell(&mut self, cell: i32) {
        self.bytecode.extend_from_slice(&cell.to_le_bytes());
    }

    fn push_fixup(&mut self, label: &str) {
        self.fixups.push(LabelFixup {
            label: label.to_string(),
            position: self.bytecode.len(),
        });
        self.push_cell(0);
    }
}
