//! Node definitions for the function IR.
//!
//! Every value, memory effect and control transfer of a function is a [`Node`] in the arena
//! of a [`crate::analysis::NodeGraph`]. The set of node kinds is closed; passes, the type
//! propagator and the emitter all match on [`NodeKind`] exhaustively.

use std::fmt;

use bitflags::bitflags;

use crate::analysis::types::Type;

/// Stable index of a node in its graph's arena.
///
/// Indices are never reused within one graph, so a removed node's index stays invalid.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeRef(usize);

impl NodeRef {
    /// Creates a reference from a raw arena index.
    #[must_use]
    pub const fn new(index: usize) -> Self {
        NodeRef(index)
    }

    /// The raw arena index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Binary operators. Float variants come from the dedicated float opcodes.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Shl,
    /// Logical shift right
    Shr,
    /// Arithmetic shift right
    Sshr,
    And,
    Or,
    Xor,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    FloatAdd,
    FloatSub,
    FloatMul,
    FloatDiv,
    FloatEq,
    FloatNe,
    FloatLt,
    FloatLe,
    FloatGt,
    FloatGe,
}

impl BinaryOp {
    /// Source-level operator symbol.
    #[must_use]
    pub fn symbol(self) -> &'static str {
        use BinaryOp::*;
        match self {
            Add | FloatAdd => "+",
            Sub | FloatSub => "-",
            Mul | FloatMul => "*",
            Div | FloatDiv => "/",
            Mod => "%",
            Shl => "<<",
            Shr => ">>>",
            Sshr => ">>",
            And => "&",
            Or => "|",
            Xor => "^",
            Eq | FloatEq => "==",
            Ne | FloatNe => "!=",
            Lt | FloatLt => "<",
            Le | FloatLe => "<=",
            Gt | FloatGt => ">",
            Ge | FloatGe => ">=",
        }
    }

    /// Binding strength; higher binds tighter.
    #[must_use]
    pub fn precedence(self) -> u8 {
        use BinaryOp::*;
        match self {
            Mul | Div | Mod | FloatMul | FloatDiv => 10,
            Add | Sub | FloatAdd | FloatSub => 9,
            Shl | Shr | Sshr => 8,
            Lt | Le | Gt | Ge | FloatLt | FloatLe | FloatGt | FloatGe => 7,
            Eq | Ne | FloatEq | FloatNe => 6,
            And => 5,
            Xor => 4,
            Or => 3,
        }
    }

    /// Returns `true` for operators producing a boolean.
    #[must_use]
    pub fn is_comparison(self) -> bool {
        self.precedence() == 6 || self.precedence() == 7
    }

    /// Returns `true` for operators whose operands are floats.
    #[must_use]
    pub fn is_float(self) -> bool {
        use BinaryOp::*;
        matches!(
            self,
            FloatAdd
                | FloatSub
                | FloatMul
                | FloatDiv
                | FloatEq
                | FloatNe
                | FloatLt
                | FloatLe
                | FloatGt
                | FloatGe
        )
    }

    /// The comparison testing the opposite condition.
    #[must_use]
    pub fn negated(self) -> Option<BinaryOp> {
        use BinaryOp::*;
        Some(match self {
            Eq => Ne,
            Ne => Eq,
            Lt => Ge,
            Ge => Lt,
            Le => Gt,
            Gt => Le,
            FloatEq => FloatNe,
            FloatNe => FloatEq,
            FloatLt => FloatGe,
            FloatGe => FloatLt,
            FloatLe => FloatGt,
            FloatGt => FloatLe,
            _ => return None,
        })
    }

    /// Returns `true` for operators usable in a compound assignment (`+=`).
    #[must_use]
    pub fn is_compound_assignable(self) -> bool {
        !self.is_comparison()
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// Logical not
    Not,
    /// Arithmetic negation
    Neg,
    /// Bitwise complement
    Invert,
    /// `float(x)`
    IntToFloat,
    /// `RoundToZero(x)`
    FloatToInt,
}

/// A constant aggregate placed into a variable by an initializer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Literal {
    /// A NUL-terminated string
    String(String),
    /// An explicit cell list; missing trailing cells are zero
    Cells(Vec<i32>),
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::String(s) => write!(f, "\"{}\"", s.escape_default()),
            Literal::Cells(cells) => {
                write!(f, "{{")?;
                for (i, cell) in cells.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{cell}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// The operation performed by a node.
///
/// Operand layouts are listed per variant; `addr` operands are address-valued nodes
/// (`LocalRef`, `GlobalRef`, `Index`, `ArrayRef`, or any pointer-valued expression).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Integer constant; no operands
    Constant(i32),
    /// Aggregate literal; no operands
    Literal(Literal),
    /// Argument variable `i`; no operands
    Argument(usize),
    /// A cell range pushed on the stack at frame offset `offset`; operands `[init]` or `[]`
    StackSlot {
        /// Frame offset of the lowest cell
        offset: i32,
        /// Size in cells
        cells: u32,
    },
    /// A local variable declaration; operands `[init]` or `[]`
    DeclareLocal {
        /// Frame offset of the lowest cell
        offset: i32,
        /// Size in cells
        cells: u32,
    },
    /// A heap-allocated temporary; no operands
    Heap {
        /// Size in cells
        cells: u32,
    },
    /// Address of a variable; operands `[variable]`
    LocalRef,
    /// Address of a global; no operands
    GlobalRef(u32),
    /// Address arithmetic `base + 4 * index`; operands `[base, index]`
    Index,
    /// Element access `base[index]`, used as an address; operands `[base, index]`
    ArrayRef,
    /// Memory read; operands `[addr]`
    Load,
    /// Binary operation; operands `[lhs, rhs]`
    Binary(BinaryOp),
    /// Unary operation; operands `[value]`
    Unary(UnaryOp),
    /// Merge of incoming values, one operand per predecessor in predecessor order
    Phi,
    /// Memory write; operands `[addr, value]`
    Store,
    /// `addr op= value`; operands `[addr, value]`
    CompoundStore(BinaryOp),
    /// `addr += delta` with delta 1 or -1; operands `[addr]`
    IncDec(i32),
    /// Call of the function at the given address; operands are the arguments
    Call(u32),
    /// Call of the native with the given index; operands are the arguments
    SysReq(u32),
    /// Block copy of the given number of bytes; operands `[dst, src]`
    MemCopy(u32),
    /// Block fill of the given number of bytes; operands `[dst, value]`
    Fill(u32),
    /// Aggregate initialization; operands `[dst, literal]`
    Initialize,
    /// Bounds check `0 <= index <= limit`; operands `[index]`
    Bounds(i32),
    /// Unconditional transfer to the block's only successor; no operands
    Jump,
    /// Two-way branch; operands `[condition]`
    ///
    /// The branch is taken (first successor) when the condition is non-zero, or zero if
    /// `on_zero` is set. Rewriting normalizes every branch to `on_zero == false`.
    JumpCondition {
        /// Branch taken when the condition is zero
        on_zero: bool,
    },
    /// Multi-way dispatch through the block's case edges; operands `[value]`
    Switch,
    /// Function return; operands `[value]` or `[]`
    Return,
    /// Machine halt; operands `[code]`
    Halt,
}

impl NodeKind {
    /// Returns `true` for nodes ending a block.
    #[must_use]
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            NodeKind::Jump
                | NodeKind::JumpCondition { .. }
                | NodeKind::Switch
                | NodeKind::Return
                | NodeKind::Halt
        )
    }

    /// Returns `true` for nodes with an observable effect on memory or the outside world.
    #[must_use]
    pub fn is_effect(&self) -> bool {
        matches!(
            self,
            NodeKind::Store
                | NodeKind::CompoundStore(_)
                | NodeKind::IncDec(_)
                | NodeKind::Call(_)
                | NodeKind::SysReq(_)
                | NodeKind::MemCopy(_)
                | NodeKind::Fill(_)
                | NodeKind::Initialize
                | NodeKind::Bounds(_)
        )
    }

    /// Returns `true` for nodes that may write memory.
    #[must_use]
    pub fn writes_memory(&self) -> bool {
        self.is_effect() && !matches!(self, NodeKind::Bounds(_))
    }

    /// Returns `true` for variables: storage with a name of its own.
    #[must_use]
    pub fn is_variable(&self) -> bool {
        matches!(
            self,
            NodeKind::Argument(_)
                | NodeKind::StackSlot { .. }
                | NodeKind::DeclareLocal { .. }
                | NodeKind::Heap { .. }
        )
    }

    /// Returns `true` for calls of functions or natives.
    #[must_use]
    pub fn is_call(&self) -> bool {
        matches!(self, NodeKind::Call(_) | NodeKind::SysReq(_))
    }

    /// Returns `true` for element address computations.
    #[must_use]
    pub fn is_element_address(&self) -> bool {
        matches!(self, NodeKind::Index | NodeKind::ArrayRef)
    }

    /// Returns `true` for nodes that dead-code elimination may remove once unused.
    #[must_use]
    pub fn is_removable(&self) -> bool {
        match self {
            NodeKind::Constant(_)
            | NodeKind::Literal(_)
            | NodeKind::StackSlot { .. }
            | NodeKind::Heap { .. }
            | NodeKind::LocalRef
            | NodeKind::GlobalRef(_)
            | NodeKind::Index
            | NodeKind::ArrayRef
            | NodeKind::Load
            | NodeKind::Binary(_)
            | NodeKind::Unary(_)
            | NodeKind::Phi => true,
            NodeKind::Argument(_) | NodeKind::DeclareLocal { .. } => false,
            kind => !(kind.is_effect() || kind.is_control()),
        }
    }

    /// Position of the address operand for memory-writing nodes.
    #[must_use]
    pub fn written_address(&self) -> Option<usize> {
        match self {
            NodeKind::Store
            | NodeKind::CompoundStore(_)
            | NodeKind::IncDec(_)
            | NodeKind::MemCopy(_)
            | NodeKind::Fill(_)
            | NodeKind::Initialize => Some(0),
            _ => None,
        }
    }
}

bitflags! {
    /// Facts attached to a node by the analyses.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct NodeFlags: u8 {
        /// Heap temporary that outlives a single call and must stay a variable
        const HEAP = 0b0000_0001;
        /// Local whose address is passed to a call or stored
        const ESCAPES = 0b0000_0010;
        /// Value printed through a named temporary
        const MATERIALIZED = 0b0000_0100;
    }
}

/// A node of the function IR.
#[derive(Debug, Clone)]
pub struct Node {
    /// The operation
    pub kind: NodeKind,
    /// Operands, uses pointing at their definitions
    pub(crate) operands: Vec<NodeRef>,
    /// Owning block
    pub block: usize,
    /// Inferred type, starting at [`Type::Bottom`]
    pub(crate) ty: Type,
    /// Analysis facts
    pub flags: NodeFlags,
    /// Final source name, assigned by renaming
    pub name: Option<String>,
}

impl Node {
    pub(crate) fn new(kind: NodeKind, operands: Vec<NodeRef>, block: usize) -> Self {
        Node {
            kind,
            operands,
            block,
            ty: Type::Bottom,
            flags: NodeFlags::empty(),
            name: None,
        }
    }

    /// Operand references.
    #[must_use]
    pub fn operands(&self) -> &[NodeRef] {
        &self.operands
    }

    /// Operand at `index`, if present.
    #[must_use]
    pub fn operand(&self, index: usize) -> Option<NodeRef> {
        self.operands.get(index).copied()
    }

    /// The inferred type.
    #[must_use]
    pub fn ty(&self) -> &Type {
        &self.ty
    }

    /// The constant value, for `Constant` nodes.
    #[must_use]
    pub fn as_constant(&self) -> Option<i32> {
        match self.kind {
            NodeKind::Constant(value) => Some(value),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negation_roundtrips() {
        for op in [BinaryOp::Eq, BinaryOp::Lt, BinaryOp::Le, BinaryOp::FloatGt] {
            let negated = op.negated().unwrap();
            assert_eq!(negated.negated(), Some(op));
        }
        assert_eq!(BinaryOp::Add.negated(), None);
        assert!(BinaryOp::FloatLe.is_comparison());
        assert!(!BinaryOp::Xor.is_comparison());
    }

    #[test]
    fn test_kind_classes() {
        assert!(NodeKind::Store.is_effect());
        assert!(!NodeKind::Store.is_removable());
        assert!(NodeKind::Phi.is_removable());
        assert!(!NodeKind::DeclareLocal { offset: -4, cells: 1 }.is_removable());
        assert!(NodeKind::Return.is_control());
        assert!(!NodeKind::Bounds(3).writes_memory());
    }

    #[test]
    fn test_literal_display() {
        assert_eq!(Literal::String("hi\n".into()).to_string(), "\"hi\\n\"");
        assert_eq!(Literal::Cells(vec![1, 2]).to_string(), "{1, 2}");
    }
}
