//! Low-level access to code and data segments.

pub mod parser;
