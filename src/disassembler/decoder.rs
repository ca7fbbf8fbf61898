//! Instruction decoding and control flow recovery.
//!
//! [`decode_instruction`] decodes a single instruction at a code address. [`decode_blocks`]
//! runs a worklist over every address reachable from a function entry and splits the result
//! into basic blocks, opening a new block at every jump target, every case target and every
//! instruction following a conditional branch.
//!
//! # Example: Decoding a Single Instruction
//!
//! ```rust
//! use smxscope::{disassembler::{decode_instruction, Opcode}, Parser};
//!
//! let mut code = Vec::new();
//! for cell in [Opcode::ConstPri.cell(), 7] {
//!     code.extend_from_slice(&cell.to_le_bytes());
//! }
//! let mut parser = Parser::new(&code);
//! let instr = decode_instruction(&mut parser, 0)?;
//! assert_eq!(instr.opcode, Opcode::ConstPri);
//! assert_eq!(instr.operands, vec![7]);
//! # Ok::<(), smxscope::Error>(())
//! ```

use std::collections::{BTreeMap, BTreeSet};

use crate::{
    disassembler::{
        visitedmap::VisitedMap, BasicBlock, CaseTable, FlowType, Instruction, Opcode,
    },
    file::parser::{Parser, CELL_SIZE},
    Error, Result,
};

/// Upper bound on case table entries; real tables are far smaller.
const MAX_CASES: i32 = 0x1_0000;

/// Decodes the instruction at `address`.
///
/// The parser must cover the whole code segment; it is left positioned after the
/// instruction (not after an out-of-line case table).
///
/// # Errors
///
/// - [`Error::InvalidOpcode`] for an unknown opcode cell or a `CASETBL` reached by execution
/// - [`Error::OutOfBounds`] for a truncated instruction
/// - [`Error::Malformed`] for a misaligned or out-of-range jump target or a bad case table
pub fn decode_instruction(parser: &mut Parser, address: u32) -> Result<Instruction> {
    parser.seek(address as usize)?;
    let cell = parser.read_cell()?;
    let opcode = match Opcode::from_cell(cell) {
        Some(Opcode::Casetbl) | None => {
            return Err(Error::InvalidOpcode {
                opcode: cell,
                address,
            })
        }
        Some(opcode) => opcode,
    };

    let operands = (0..opcode.operand_count())
        .map(|_| parser.read_cell())
        .collect::<Result<Vec<i32>>>()?;
    let size = ((1 + operands.len()) * CELL_SIZE) as u32;
    let flow_type = opcode.flow_type();

    let mut branch_targets = Vec::new();
    let mut case_table = None;
    match flow_type {
        FlowType::ConditionalBranch | FlowType::UnconditionalBranch => {
            branch_targets.push(code_target(parser.len(), operands[0], address)?);
        }
        FlowType::Switch => {
            let table_address = code_target(parser.len(), operands[0], address)?;
            let end = address + size;
            let table = parser.transactional(|p| read_case_table(p, table_address))?;
            parser.seek(end as usize)?;

            for target in table.targets() {
                branch_targets.push(code_target(parser.len(), target as i32, address)?);
            }
            case_table = Some(table);
        }
        _ => {}
    }

    Ok(Instruction {
        address,
        size,
        opcode,
        operands,
        flow_type,
        branch_targets,
        case_table,
    })
}

fn code_target(code_len: usize, raw: i32, address: u32) -> Result<u32> {
    let target = u32::try_from(raw)
        .map_err(|_| malformed_error!("Negative jump target {} at {:#x}", raw, address))?;
    if target as usize >= code_len || target as usize % CELL_SIZE != 0 {
        return Err(malformed_error!(
            "Jump target {:#x} at {:#x} is outside the code segment or misaligned",
            target,
            address
        ));
    }
    Ok(target)
}

fn read_case_table(parser: &mut Parser, address: u32) -> Result<CaseTable> {
    parser.seek(address as usize)?;
    if parser.read_cell()? != Opcode::Casetbl.cell() {
        return Err(malformed_error!(
            "Switch table at {:#x} does not start with casetbl",
            address
        ));
    }

    let count = parser.read_cell()?;
    if !(0..=MAX_CASES).contains(&count) {
        return Err(malformed_error!(
            "Switch table at {:#x} has an invalid case count {}",
            address,
            count
        ));
    }

    let default = parser.read_cell()?;
    let mut cases = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let value = parser.read_cell()?;
        let target = parser.read_cell()?;
        cases.push((value, target as u32));
    }

    Ok(CaseTable {
        address,
        default: default as u32,
        cases,
    })
}

/// Result of decoding one function.
#[derive(Debug, Clone)]
pub struct DecodedFunction {
    /// Blocks in address order, the entry block first
    pub blocks: Vec<BasicBlock>,
    /// Address just past the furthest decoded instruction or case table
    pub exit_pc: u32,
}

/// A stateful decoder instance, running the worklist for a single function
struct Decoder<'a> {
    parser: Parser<'a>,
    visited: VisitedMap,
    instructions: BTreeMap<u32, Instruction>,
    leaders: BTreeSet<u32>,
    worklist: Vec<u32>,
    exit_pc: u32,
}

impl<'a> Decoder<'a> {
    fn new(code: &'a [u8], entry: u32) -> Self {
        let mut leaders = BTreeSet::new();
        leaders.insert(entry);

        Decoder {
            parser: Parser::new(code),
            visited: VisitedMap::new(code.len()),
            instructions: BTreeMap::new(),
            leaders,
            worklist: vec![entry],
            exit_pc: entry,
        }
    }

    fn decode(mut self) -> Result<DecodedFunction> {
        while let Some(address) = self.worklist.pop() {
            self.decode_run(address)?;
        }

        for leader in &self.leaders {
            if !self.instructions.contains_key(leader) {
                return Err(malformed_error!(
                    "Branch into the middle of an instruction at {:#x}",
                    leader
                ));
            }
        }

        let exit_pc = self.exit_pc;
        Ok(DecodedFunction {
            blocks: self.split_blocks()?,
            exit_pc,
        })
    }

    /// Decode a straight-line run until a terminator or already decoded code.
    fn decode_run(&mut self, start: u32) -> Result<()> {
        let mut address = start;
        loop {
            if self.instructions.contains_key(&address) {
                if address != start {
                    self.leaders.insert(address);
                }
                return Ok(());
            }
            if self.visited.get(address as usize) {
                return Err(malformed_error!(
                    "Overlapping instructions at {:#x}",
                    address
                ));
            }

            let instruction = decode_instruction(&mut self.parser, address)?;
            if self
                .visited
                .any_in_range(address as usize, instruction.size as usize)
            {
                return Err(malformed_error!(
                    "Instruction at {:#x} overlaps decoded code",
                    address
                ));
            }
            self.visited
                .set_range(address as usize, instruction.size as usize);
            self.exit_pc = self.exit_pc.max(instruction.next_address());

            let next = instruction.next_address();
            let flow_type = instruction.flow_type;
            match flow_type {
                FlowType::ConditionalBranch => {
                    self.push_target(instruction.branch_targets[0]);
                    self.push_target(next);
                }
                FlowType::UnconditionalBranch => {
                    self.push_target(instruction.branch_targets[0]);
                }
                FlowType::Switch => {
                    if let Some(table) = &instruction.case_table {
                        let len = (table.end() - table.address) as usize;
                        self.visited.set_range(table.address as usize, len);
                        self.exit_pc = self.exit_pc.max(table.end());
                    }
                    for target in instruction.branch_targets.clone() {
                        self.push_target(target);
                    }
                }
                FlowType::Return | FlowType::Halt | FlowType::Sequential | FlowType::Call => {}
            }

            self.instructions.insert(address, instruction);
            if flow_type.is_terminator() {
                return Ok(());
            }
            address = next;
        }
    }

    fn push_target(&mut self, target: u32) {
        self.leaders.insert(target);
        if !self.instructions.contains_key(&target) {
            self.worklist.push(target);
        }
    }

    fn split_blocks(self) -> Result<Vec<BasicBlock>> {
        let mut blocks: Vec<BasicBlock> = Vec::new();
        let mut block_of: BTreeMap<u32, usize> = BTreeMap::new();

        let mut previous_terminated = true;
        for (address, instruction) in self.instructions {
            if previous_terminated || self.leaders.contains(&address) {
                block_of.insert(address, blocks.len());
                blocks.push(BasicBlock::new(blocks.len(), address));
            }
            previous_terminated = instruction.is_terminator();
            if let Some(block) = blocks.last_mut() {
                block.instructions.push(instruction);
            }
        }

        let lookup = |address: u32| {
            block_of.get(&address).copied().ok_or_else(|| {
                malformed_error!("No block starts at branch target {:#x}", address)
            })
        };

        for index in 0..blocks.len() {
            let targets: Vec<u32> = match blocks[index].terminator() {
                Some(last) => match last.flow_type {
                    FlowType::ConditionalBranch => {
                        vec![last.branch_targets[0], last.next_address()]
                    }
                    FlowType::UnconditionalBranch | FlowType::Switch => {
                        last.branch_targets.clone()
                    }
                    FlowType::Return | FlowType::Halt => Vec::new(),
                    FlowType::Sequential | FlowType::Call => vec![last.next_address()],
                },
                None => Vec::new(),
            };

            let mut successors = Vec::with_capacity(targets.len());
            for target in targets {
                let succ = lookup(target)?;
                if !successors.contains(&succ) {
                    successors.push(succ);
                }
            }
            for &succ in &successors {
                blocks[succ].predecessors.push(index);
            }
            blocks[index].successors = successors;
        }

        Ok(blocks)
    }
}

/// Decodes every instruction reachable from `entry` and splits them into basic blocks.
///
/// # Errors
///
/// Returns a decode failure for invalid opcodes, truncated code, bad jump targets,
/// overlapping instructions or malformed case tables.
pub fn decode_blocks(code: &[u8], entry: u32) -> Result<DecodedFunction> {
    if entry as usize >= code.len() {
        return Err(Error::OutOfBounds);
    }
    Decoder::new(code, entry).decode()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::Assembler;

    #[test]
    fn test_decode_invalid_opcode() {
        let code = 9999i32.to_le_bytes();
        let mut parser = Parser::new(&code);
        assert!(matches!(
            decode_instruction(&mut parser, 0),
            Err(Error::InvalidOpcode { opcode: 9999, .. })
        ));
    }

    #[test]
    fn test_decode_truncated() {
        let code = Opcode::ConstPri.cell().to_le_bytes();
        let mut parser = Parser::new(&code);
        assert!(matches!(
            decode_instruction(&mut parser, 0),
            Err(Error::OutOfBounds)
        ));
    }

    #[test]
    fn test_linear_function() {
        let mut asm = Assembler::new();
        asm.emit(Opcode::Proc, &[]).unwrap();
        asm.emit(Opcode::ConstPri, &[1]).unwrap();
        asm.emit(Opcode::Retn, &[]).unwrap();
        let code = asm.finalize().unwrap();

        let decoded = decode_blocks(&code, 0).unwrap();
        assert_eq!(decoded.blocks.len(), 1);
        assert_eq!(decoded.blocks[0].instructions.len(), 3);
        assert_eq!(decoded.exit_pc, 16);
    }

    #[test]
    fn test_conditional_split() {
        let mut asm = Assembler::new();
        asm.emit(Opcode::Proc, &[]).unwrap();
        asm.emit_branch(Opcode::Jzer, "else").unwrap();
        asm.emit(Opcode::ConstPri, &[1]).unwrap();
        asm.emit(Opcode::Retn, &[]).unwrap();
        asm.define_label("else").unwrap();
        asm.emit(Opcode::ConstPri, &[2]).unwrap();
        asm.emit(Opcode::Retn, &[]).unwrap();
        let code = asm.finalize().unwrap();

        let decoded = decode_blocks(&code, 0).unwrap();
        assert_eq!(decoded.blocks.len(), 3);
        // taken target first, fallthrough second
        assert_eq!(decoded.blocks[0].successors, vec![2, 1]);
        assert_eq!(decoded.blocks[2].predecessors, vec![0]);
    }

    #[test]
    fn test_switch_table() {
        let mut asm = Assembler::new();
        asm.emit(Opcode::Proc, &[]).unwrap();
        asm.emit_branch(Opcode::Switch, "table").unwrap();
        asm.define_label("one").unwrap();
        asm.emit(Opcode::Retn, &[]).unwrap();
        asm.define_label("other").unwrap();
        asm.emit(Opcode::Retn, &[]).unwrap();
        asm.define_label("table").unwrap();
        asm.emit_case_table("other", &[(1, "one"), (2, "one")]).unwrap();
        let code = asm.finalize().unwrap();

        let decoded = decode_blocks(&code, 0).unwrap();
        assert_eq!(decoded.blocks.len(), 3);
        assert_eq!(decoded.blocks[0].successors, vec![2, 1]);
        assert_eq!(decoded.exit_pc as usize, code.len());
    }

    #[test]
    fn test_jump_into_instruction() {
        let mut code = Vec::new();
        for cell in [
            Opcode::Jzer.cell(),
            12,
            Opcode::ConstPri.cell(),
            Opcode::Retn.cell(),
            Opcode::Retn.cell(),
        ] {
            code.extend_from_slice(&cell.to_le_bytes());
        }
        assert!(matches!(
            decode_blocks(&code, 0),
            Err(Error::Malformed { .. })
        ));
    }
}
