//! Opcode table of the SP1 cell machine.
//!
//! Numbering follows the SourcePawn virtual machine where an equivalent exists. The float
//! instructions operate on PRI and ALT and are numbered after the integer set. Packed and
//! debugger-only opcodes of the machine are not part of this table and decode as
//! invalid.

use strum::{Display, FromRepr, IntoStaticStr};

/// How an instruction affects control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowType {
    /// Execution continues with the next instruction
    Sequential,
    /// Branches to its target when the condition holds, falls through otherwise
    ConditionalBranch,
    /// Always branches to its target
    UnconditionalBranch,
    /// Calls a function or native and continues with the next instruction
    Call,
    /// Multi-way dispatch through a case table
    Switch,
    /// Returns from the function
    Return,
    /// Stops the machine
    Halt,
}

impl FlowType {
    /// Returns `true` if the instruction ends a basic block.
    #[must_use]
    pub fn is_terminator(self) -> bool {
        !matches!(self, FlowType::Sequential | FlowType::Call)
    }
}

/// An opcode of the machine.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, FromRepr, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
#[repr(i32)]
pub enum Opcode {
    LoadPri = 1,
    LoadAlt = 2,
    LoadSPri = 3,
    LoadSAlt = 4,
    LrefSPri = 7,
    LrefSAlt = 8,
    LoadI = 9,
    ConstPri = 11,
    ConstAlt = 12,
    AddrPri = 13,
    AddrAlt = 14,
    StorPri = 15,
    StorAlt = 16,
    StorSPri = 17,
    StorSAlt = 18,
    SrefSPri = 21,
    SrefSAlt = 22,
    StorI = 23,
    Lidx = 25,
    Idxaddr = 27,
    MovePri = 33,
    MoveAlt = 34,
    Xchg = 35,
    PushPri = 36,
    PushAlt = 37,
    PushC = 39,
    Push = 40,
    PushS = 41,
    PopPri = 42,
    PopAlt = 43,
    Stack = 44,
    Heap = 45,
    Proc = 46,
    Retn = 48,
    Call = 49,
    Jump = 51,
    Jzer = 53,
    Jnz = 54,
    Jeq = 55,
    Jneq = 56,
    Jsless = 61,
    Jsleq = 62,
    Jsgrtr = 63,
    Jsgeq = 64,
    Shl = 65,
    Shr = 66,
    Sshr = 67,
    Smul = 72,
    Sdiv = 73,
    SdivAlt = 74,
    Add = 78,
    Sub = 79,
    SubAlt = 80,
    And = 81,
    Or = 82,
    Xor = 83,
    Not = 84,
    Neg = 85,
    Invert = 86,
    AddC = 87,
    SmulC = 88,
    ZeroPri = 89,
    ZeroAlt = 90,
    Zero = 91,
    ZeroS = 92,
    Eq = 95,
    Neq = 96,
    Sless = 101,
    Sleq = 102,
    Sgrtr = 103,
    Sgeq = 104,
    EqCPri = 105,
    IncPri = 107,
    IncAlt = 108,
    Inc = 109,
    IncS = 110,
    IncI = 111,
    DecPri = 112,
    DecAlt = 113,
    Dec = 114,
    DecS = 115,
    DecI = 116,
    Movs = 117,
    Fill = 119,
    Halt = 120,
    Bounds = 121,
    SysreqC = 123,
    Switch = 129,
    Casetbl = 130,
    PushAdr = 133,
    Nop = 134,
    SysreqN = 135,
    Break = 137,
    Push2C = 138,
    Push2 = 139,
    Push2S = 140,
    Push2Adr = 141,
    Push3C = 142,
    Push3 = 143,
    Push3S = 144,
    Push3Adr = 145,
    Push4C = 146,
    Push4 = 147,
    Push4S = 148,
    Push4Adr = 149,
    Push5C = 150,
    Push5 = 151,
    Push5S = 152,
    Push5Adr = 153,
    LoadBoth = 154,
    LoadSBoth = 155,
    Const = 156,
    ConstS = 157,
    Float = 166,
    FloatAdd = 167,
    FloatSub = 168,
    FloatMul = 169,
    FloatDiv = 170,
    RndToZero = 174,
    FloatGt = 176,
    FloatGe = 177,
    FloatLt = 178,
    FloatLe = 179,
    FloatNe = 180,
    FloatEq = 181,
}

impl Opcode {
    /// Decodes a raw opcode cell.
    #[must_use]
    pub fn from_cell(cell: i32) -> Option<Opcode> {
        Opcode::from_repr(cell)
    }

    /// The raw opcode cell.
    #[must_use]
    pub fn cell(self) -> i32 {
        self as i32
    }

    /// The mnemonic, e.g. `load_s_pri`.
    #[must_use]
    pub fn mnemonic(self) -> &'static str {
        self.into()
    }

    /// Number of operand cells following the opcode.
    ///
    /// `CASETBL` reports zero; its length is encoded in the table itself.
    #[must_use]
    pub fn operand_count(self) -> usize {
        use Opcode::*;
        match self {
            LoadPri | LoadAlt | LoadSPri | LoadSAlt | LrefSPri | LrefSAlt | ConstPri
            | ConstAlt | AddrPri | AddrAlt | StorPri | StorAlt | StorSPri | StorSAlt
            | SrefSPri | SrefSAlt | PushC | Push | PushS | Stack | Heap | Call | Jump | Jzer
            | Jnz | Jeq | Jneq | Jsless | Jsleq | Jsgrtr | Jsgeq | AddC | SmulC | Zero
            | ZeroS | EqCPri | Inc | IncS | Dec | DecS | Movs | Fill | Halt | Bounds
            | SysreqC | Switch | PushAdr => 1,
            SysreqN | Push2C | Push2 | Push2S | Push2Adr | LoadBoth | LoadSBoth | Const
            | ConstS => 2,
            Push3C | Push3 | Push3S | Push3Adr => 3,
            Push4C | Push4 | Push4S | Push4Adr => 4,
            Push5C | Push5 | Push5S | Push5Adr => 5,
            _ => 0,
        }
    }

    /// How the instruction affects control flow.
    #[must_use]
    pub fn flow_type(self) -> FlowType {
        use Opcode::*;
        match self {
            Jzer | Jnz | Jeq | Jneq | Jsless | Jsleq | Jsgrtr | Jsgeq => {
                FlowType::ConditionalBranch
            }
            Jump => FlowType::UnconditionalBranch,
            Call | SysreqC | SysreqN => FlowType::Call,
            Switch => FlowType::Switch,
            Retn => FlowType::Return,
            Halt => FlowType::Halt,
            _ => FlowType::Sequential,
        }
    }

    /// Returns `true` for instructions whose first operand is a code address.
    #[must_use]
    pub fn has_code_operand(self) -> bool {
        matches!(
            self.flow_type(),
            FlowType::ConditionalBranch | FlowType::UnconditionalBranch | FlowType::Switch
        ) || self == Opcode::Call
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_numbering() {
        assert_eq!(Opcode::from_cell(3), Some(Opcode::LoadSPri));
        assert_eq!(Opcode::from_cell(129), Some(Opcode::Switch));
        assert_eq!(Opcode::Retn.cell(), 48);
        assert_eq!(Opcode::from_cell(0), None);
        assert_eq!(Opcode::from_cell(5), None);
    }

    #[test]
    fn test_mnemonics() {
        assert_eq!(Opcode::LoadSPri.mnemonic(), "load_s_pri");
        assert_eq!(Opcode::Retn.to_string(), "retn");
    }

    #[test]
    fn test_operands_and_flow() {
        assert_eq!(Opcode::Push5S.operand_count(), 5);
        assert_eq!(Opcode::SysreqN.operand_count(), 2);
        assert_eq!(Opcode::Add.operand_count(), 0);
        assert_eq!(Opcode::Jsgeq.flow_type(), FlowType::ConditionalBranch);
        assert!(Opcode::Retn.flow_type().is_terminator());
        assert!(!Opcode::Call.flow_type().is_terminator());
        assert!(Opcode::Call.has_code_operand());
        assert!(!Opcode::SysreqC.has_code_operand());
    }
}
