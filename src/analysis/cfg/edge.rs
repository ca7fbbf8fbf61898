//! Control flow edge kinds.

/// The kind of control flow represented by an edge.
///
/// # Examples
///
/// ```rust
/// use smxscope::analysis::CfgEdgeKind;
///
/// assert!(CfgEdgeKind::ConditionalTrue.is_conditional());
/// assert!(!CfgEdgeKind::Fallthrough.is_conditional());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CfgEdgeKind {
    /// Target of an unconditional jump
    Unconditional,
    /// Flow into the next block after a block split at a jump target
    Fallthrough,
    /// Taken target of a conditional branch
    ConditionalTrue,
    /// Not-taken (fallthrough) target of a conditional branch
    ConditionalFalse,
    /// A switch case; the value is the first case mapping to this target
    SwitchCase(i32),
    /// The default arm of a switch
    SwitchDefault,
}

impl CfgEdgeKind {
    /// Returns `true` for both edges of a conditional branch.
    #[must_use]
    pub fn is_conditional(self) -> bool {
        matches!(
            self,
            CfgEdgeKind::ConditionalTrue | CfgEdgeKind::ConditionalFalse
        )
    }

    /// Returns `true` for switch dispatch edges.
    #[must_use]
    pub fn is_switch(self) -> bool {
        matches!(self, CfgEdgeKind::SwitchCase(_) | CfgEdgeKind::SwitchDefault)
    }
}
