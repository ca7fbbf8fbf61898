//! Decoded instruction representation.

use std::fmt;

use crate::disassembler::{FlowType, Opcode};

/// The case table referenced by a `SWITCH` instruction.
///
/// Encoded as `CASETBL n default (value target)*n` at the address given by the switch
/// operand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseTable {
    /// Address of the `CASETBL` opcode cell
    pub address: u32,
    /// Target taken when no case matches
    pub default: u32,
    /// `(value, target)` pairs in table order
    pub cases: Vec<(i32, u32)>,
}

impl CaseTable {
    /// Address just past the last cell of the table.
    #[must_use]
    pub fn end(&self) -> u32 {
        // opcode, count, default, then two cells per case
        let cells = 3 + 2 * self.cases.len() as u32;
        self.address + cells * 4
    }

    /// All targets, default first.
    pub fn targets(&self) -> impl Iterator<Item = u32> + '_ {
        std::iter::once(self.default).chain(self.cases.iter().map(|(_, target)| *target))
    }
}

/// A decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// Code address of the opcode cell
    pub address: u32,
    /// Size in bytes, opcode and operands
    pub size: u32,
    /// The opcode
    pub opcode: Opcode,
    /// Raw operand cells
    pub operands: Vec<i32>,
    /// How the instruction affects control flow
    pub flow_type: FlowType,
    /// Jump targets; for a switch the default followed by every case target
    pub branch_targets: Vec<u32>,
    /// Case table of a `SWITCH`
    pub case_table: Option<CaseTable>,
}

impl Instruction {
    /// Address of the following instruction.
    #[must_use]
    pub fn next_address(&self) -> u32 {
        self.address + self.size
    }

    /// Operand cell `index`, zero when absent.
    #[must_use]
    pub fn operand(&self, index: usize) -> i32 {
        self.operands.get(index).copied().unwrap_or(0)
    }

    /// Returns `true` if this instruction ends a basic block.
    #[must_use]
    pub fn is_terminator(&self) -> bool {
        self.flow_type.is_terminator()
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}  {}", self.address, self.opcode.mnemonic())?;
        for (index, operand) in self.operands.iter().enumerate() {
            let sep = if index == 0 { " " } else { ", " };
            if self.opcode.has_code_operand() && index == 0 {
                write!(f, "{sep}{operand:#x}")?;
            } else {
                write!(f, "{sep}{operand}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_table_layout() {
        let table = CaseTable {
            address: 0x40,
            default: 0x10,
            cases: vec![(1, 0x20), (2, 0x30)],
        };
        assert_eq!(table.end(), 0x40 + 7 * 4);
        assert_eq!(table.targets().collect::<Vec<_>>(), vec![0x10, 0x20, 0x30]);
    }

    #[test]
    fn test_display() {
        let instr = Instruction {
            address: 8,
            size: 8,
            opcode: Opcode::Jzer,
            operands: vec![0x20],
            flow_type: FlowType::ConditionalBranch,
            branch_targets: vec![0x20],
            case_table: None,
        };
        assert_eq!(instr.to_string(), "00000008  jzer 0x20");
        assert_eq!(instr.next_address(), 16);
        assert_eq!(instr.operand(3), 0);
    }
}
