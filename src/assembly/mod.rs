//! Bytecode assembly.
//!
//! - [`Assembler`] - emits instructions and case tables with label fixups

mod encoder;

pub use encoder::Assembler;
