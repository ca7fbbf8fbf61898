//! In-memory model of a compiled program.
//!
//! A container reader populates a [`Program`] with the code segment, the data segment, the
//! function table with whatever debug information survived, the global variable table and
//! the native (host) function signatures. The decompiler only reads it, except for the
//! one-time preprocessing step that corrects function bounds and synthesizes arguments.
//!
//! # Examples
//!
//! ```rust
//! use smxscope::program::{Argument, Program, Tag, VariableKind};
//!
//! let program = Program::builder()
//!     .code(vec![0u8; 8])
//!     .data(b"hello\0".to_vec())
//!     .function("OnPluginStart", 0)
//!     .native("PrintToServer", vec![Argument::new(VariableKind::Array, "fmt").with_tag(Tag::String)], None)
//!     .build();
//!
//! assert_eq!(program.functions().len(), 1);
//! assert_eq!(program.string_at(0).as_deref(), Some("hello"));
//! ```

use std::fmt;

use strum::{Display, EnumString};

use crate::{file::parser::Parser, Result};

/// How a variable or parameter is passed and stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
pub enum VariableKind {
    /// A single cell passed by value
    #[strum(serialize = "scalar")]
    Scalar,
    /// A single cell passed by address (`&x`)
    #[strum(serialize = "reference")]
    Reference,
    /// An array, always passed by address
    #[strum(serialize = "array")]
    Array,
}

/// Type tag attached to a variable, parameter or return value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Tag {
    /// Untagged cell
    Int,
    /// `Float:`
    Float,
    /// `bool:`
    Bool,
    /// `String:` (character arrays)
    String,
    /// `any:`
    Any,
    /// Any other tag, typically an opaque handle type
    Named(String),
}

impl Tag {
    /// Parses a tag name as found in debug symbols.
    #[must_use]
    pub fn from_name(name: &str) -> Tag {
        match name {
            "" | "_" | "int" => Tag::Int,
            "Float" | "float" => Tag::Float,
            "bool" => Tag::Bool,
            "String" | "char" => Tag::String,
            "any" => Tag::Any,
            other => Tag::Named(other.to_string()),
        }
    }

    /// The tag prefix used in declarations (`Float:`), empty for untagged cells.
    #[must_use]
    pub fn prefix(&self) -> String {
        match self {
            Tag::Int => String::new(),
            other => format!("{other}:"),
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tag::Int => write!(f, "_"),
            Tag::Float => write!(f, "Float"),
            Tag::Bool => write!(f, "bool"),
            Tag::String => write!(f, "String"),
            Tag::Any => write!(f, "any"),
            Tag::Named(name) => write!(f, "{name}"),
        }
    }
}

/// A declared or synthesized function parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Argument {
    /// How the parameter is passed
    pub kind: VariableKind,
    /// Parameter name, `_argN` when synthesized
    pub name: String,
    /// Optional type tag
    pub tag: Option<Tag>,
    /// Array dimensions, empty for scalars and references
    pub dims: Vec<u32>,
    /// Default value, if declared
    pub default: Option<i32>,
    /// Placeholder created for a slot missing from debug information
    pub synthesized: bool,
}

impl Argument {
    /// Creates an untagged argument without default value.
    pub fn new(kind: VariableKind, name: impl Into<String>) -> Self {
        Argument {
            kind,
            name: name.into(),
            tag: None,
            dims: Vec::new(),
            default: None,
            synthesized: false,
        }
    }

    /// Creates the placeholder for an argument slot missing from debug information.
    #[must_use]
    pub fn synthesized(index: usize) -> Self {
        Argument {
            synthesized: true,
            ..Argument::new(VariableKind::Scalar, format!("_arg{index}"))
        }
    }

    /// Sets the type tag.
    #[must_use]
    pub fn with_tag(mut self, tag: Tag) -> Self {
        self.tag = Some(tag);
        self
    }

    /// Sets the default value.
    #[must_use]
    pub fn with_default(mut self, value: i32) -> Self {
        self.default = Some(value);
        self
    }

    /// Sets the array dimensions.
    #[must_use]
    pub fn with_dims(mut self, dims: Vec<u32>) -> Self {
        self.dims = dims;
        self
    }
}

/// Debug symbol of a local variable, addressed by frame offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalSymbol {
    /// Frame offset (negative for locals)
    pub offset: i32,
    /// Variable name
    pub name: String,
    /// Storage kind
    pub kind: VariableKind,
    /// Optional type tag
    pub tag: Option<Tag>,
}

/// A function of the program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    /// Function name, synthesized (`sub_<addr>`) when unknown
    pub name: String,
    /// Address of the first instruction
    pub address: u32,
    /// Address just past the last instruction; equal to the code length when unknown
    pub code_end: u32,
    /// Declared arguments, possibly fewer than the code actually uses
    pub args: Vec<Argument>,
    /// Declared return tag
    pub return_tag: Option<Tag>,
    /// Local variable symbols
    pub locals: Vec<LocalSymbol>,
}

impl Function {
    /// Creates a function without debug information.
    pub fn new(name: impl Into<String>, address: u32, code_end: u32) -> Self {
        Function {
            name: name.into(),
            address,
            code_end,
            args: Vec::new(),
            return_tag: None,
            locals: Vec::new(),
        }
    }

    /// Looks up the debug symbol of the local at `offset`.
    #[must_use]
    pub fn local_at(&self, offset: i32) -> Option<&LocalSymbol> {
        self.locals.iter().find(|l| l.offset == offset)
    }

    /// Appends `_argN` placeholders until the function declares `arity` arguments.
    ///
    /// Returns the number of arguments added; declared arguments are never touched.
    pub fn synthesize_arguments(&mut self, arity: usize) -> usize {
        let declared = self.args.len();
        for index in declared..arity {
            self.args.push(Argument::synthesized(index));
        }
        arity.saturating_sub(declared)
    }
}

/// An entry of the global variable table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Global {
    /// Address in the data segment
    pub address: u32,
    /// Variable name
    pub name: String,
    /// Storage kind
    pub kind: VariableKind,
    /// Optional type tag
    pub tag: Option<Tag>,
    /// Array dimensions
    pub dims: Vec<u32>,
}

impl Global {
    /// Creates an untagged scalar global.
    pub fn new(name: impl Into<String>, address: u32) -> Self {
        Global {
            address,
            name: name.into(),
            kind: VariableKind::Scalar,
            tag: None,
            dims: Vec::new(),
        }
    }

    /// Size in bytes occupied in the data segment.
    #[must_use]
    pub fn size(&self) -> u32 {
        match self.kind {
            VariableKind::Array => self.dims.iter().product::<u32>().max(1) * 4,
            _ => 4,
        }
    }
}

/// Signature of a host function reachable through `SYSREQ`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Native {
    /// Native name
    pub name: String,
    /// Declared parameters
    pub args: Vec<Argument>,
    /// Declared return tag
    pub return_tag: Option<Tag>,
}

/// A complete compiled program.
#[derive(Debug, Clone, Default)]
pub struct Program {
    code: Vec<u8>,
    data: Vec<u8>,
    functions: Vec<Function>,
    globals: Vec<Global>,
    natives: Vec<Native>,
}

impl Program {
    /// Starts building a program.
    #[must_use]
    pub fn builder() -> ProgramBuilder {
        ProgramBuilder::default()
    }

    /// The code segment.
    #[must_use]
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    /// The data segment.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Functions, ordered by address.
    #[must_use]
    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    pub(crate) fn functions_mut(&mut self) -> &mut [Function] {
        &mut self.functions
    }

    /// Global variables, ordered by address.
    #[must_use]
    pub fn globals(&self) -> &[Global] {
        &self.globals
    }

    /// Native signatures, indexed by native number.
    #[must_use]
    pub fn natives(&self) -> &[Native] {
        &self.natives
    }

    /// Finds the function starting at `address`.
    #[must_use]
    pub fn function_at(&self, address: u32) -> Option<&Function> {
        self.functions
            .binary_search_by_key(&address, |f| f.address)
            .ok()
            .map(|index| &self.functions[index])
    }

    /// Finds the global occupying `address`, including array interiors.
    #[must_use]
    pub fn global_at(&self, address: u32) -> Option<&Global> {
        self.globals
            .iter()
            .find(|g| address >= g.address && address < g.address + g.size())
    }

    /// Returns the native with the given index.
    #[must_use]
    pub fn native(&self, index: u32) -> Option<&Native> {
        self.natives.get(index as usize)
    }

    /// Reads a NUL-terminated string literal from the data segment.
    #[must_use]
    pub fn string_at(&self, address: u32) -> Option<String> {
        let mut parser = Parser::new(&self.data);
        parser.seek(address as usize).ok()?;
        parser.read_string().ok()
    }

    /// Reads `count` cells from the data segment.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the range leaves the data segment.
    pub fn data_cells(&self, address: u32, count: usize) -> Result<Vec<i32>> {
        let mut parser = Parser::new(&self.data);
        parser.seek(address as usize)?;
        (0..count).map(|_| parser.read_cell()).collect()
    }
}

/// Builder for [`Program`].
///
/// Functions added without an explicit end receive the full code length as their end, the
/// same way a container without debug bounds reports them.
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    code: Vec<u8>,
    data: Vec<u8>,
    functions: Vec<Function>,
    globals: Vec<Global>,
    natives: Vec<Native>,
}

impl ProgramBuilder {
    /// Sets the code segment.
    #[must_use]
    pub fn code(mut self, code: Vec<u8>) -> Self {
        self.code = code;
        self
    }

    /// Sets the data segment.
    #[must_use]
    pub fn data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }

    /// Adds a function without debug information.
    #[must_use]
    pub fn function(mut self, name: &str, address: u32) -> Self {
        self.functions.push(Function::new(name, address, u32::MAX));
        self
    }

    /// Adds a fully described function.
    #[must_use]
    pub fn function_with(mut self, function: Function) -> Self {
        self.functions.push(function);
        self
    }

    /// Adds a global variable.
    #[must_use]
    pub fn global(mut self, global: Global) -> Self {
        self.globals.push(global);
        self
    }

    /// Adds a native signature; natives are numbered in insertion order.
    #[must_use]
    pub fn native(mut self, name: &str, args: Vec<Argument>, return_tag: Option<Tag>) -> Self {
        self.natives.push(Native {
            name: name.to_string(),
            args,
            return_tag,
        });
        self
    }

    /// Finishes the program.
    #[must_use]
    pub fn build(mut self) -> Program {
        let code_len = u32::try_from(self.code.len()).unwrap_or(u32::MAX);
        for function in &mut self.functions {
            if function.code_end == u32::MAX || function.code_end > code_len {
                function.code_end = code_len;
            }
        }
        self.functions.sort_by_key(|f| f.address);
        self.globals.sort_by_key(|g| g.address);

        Program {
            code: self.code,
            data: self.data,
            functions: self.functions,
            globals: self.globals,
            natives: self.natives,
        }
    }
}
