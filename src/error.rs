use thiserror::Error;

use crate::compiler::Stage;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! structural_error {
    ($msg:expr) => {
        crate::Error::Structural($msg.to_string())
    };

    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Structural(format!($fmt, $($arg)*))
    };
}

macro_rules! out_of_bounds_error {
    () => {
        crate::Error::OutOfBounds
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Errors fall into three families. Decode failures are produced while recovering the control
/// flow graph of a function, structural inconsistencies are produced by the node graph and the
/// passes operating on it, and pipeline misuse is reported when a stage is requested out of
/// order. All of them are fatal to the function being processed, never to the whole run: the
/// [`crate::Decompiler`] catches them at the function boundary and records a placeholder.
///
/// Type conflicts and irreducible control flow are not errors. They resolve to
/// [`crate::analysis::Type::Conflict`] and to labeled fallback blocks respectively.
///
/// # Examples
///
/// ```rust
/// use smxscope::{Error, Program};
///
/// // A lone, unknown opcode cell
/// let code = 0x7fff_0000_i32.to_le_bytes().to_vec();
/// let program = Program::builder().code(code).function("main", 0).build();
///
/// // The run itself succeeds; only the function is replaced by a placeholder
/// let decompilation = smxscope::Decompiler::new(program).run();
/// assert!(decompilation.functions()[0].is_failed());
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The bytecode is damaged and could not be decoded.
    ///
    /// The error carries the source location where the malformation was detected
    /// for debugging purposes.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while reading code or data cells.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// An unknown opcode was found at a reachable address.
    #[error("Invalid opcode {opcode} at address {address:#x}")]
    InvalidOpcode {
        /// The raw opcode cell
        opcode: i32,
        /// Code address of the instruction
        address: u32,
    },

    /// The node graph violates one of its invariants.
    ///
    /// Orphaned operand references, phi operand counts that do not match the predecessor
    /// count of their block, operand cycles that do not pass through a phi and
    /// inconsistent stack depths at merge points all end up here.
    #[error("Structural inconsistency: {0}")]
    Structural(String),

    /// A pipeline stage was invoked out of its fixed order.
    #[error("Pass order violation: expected {expected}, found {found}")]
    PassOrder {
        /// The stage that would have been legal
        expected: Stage,
        /// The stage that was requested
        found: Stage,
    },

    /// Recursion limit reached while structuring deeply nested control flow.
    #[error("Reach the maximum recursion level allowed - {0}")]
    RecursionLimit(usize),

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_macro_records_location() {
        let err = malformed_error!("bad table of {} entries", 3);
        match err {
            Error::Malformed { message, file, .. } => {
                assert_eq!(message, "bad table of 3 entries");
                assert!(file.ends_with("error.rs"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_display() {
        let err = Error::InvalidOpcode {
            opcode: 999,
            address: 0x20,
        };
        assert_eq!(err.to_string(), "Invalid opcode 999 at address 0x20");

        let err = structural_error!("phi {} has {} operands", 4, 1);
        assert_eq!(
            err.to_string(),
            "Structural inconsistency: phi 4 has 1 operands"
        );
    }
}
