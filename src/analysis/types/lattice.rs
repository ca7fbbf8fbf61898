//! The type lattice.
//!
//! ```text
//!                  Conflict
//!     /     /     |      \        \        \
//!   Int  Float  String  Array(T) Reference(T) Object(tag)
//!    |            |
//!   Bool      Array(Int)
//!     \     \     |      /        /        /
//!                  Dynamic
//!                     |
//!                   Bottom
//! ```
//!
//! Types only ever move up: every update goes through [`Type::join`].

use std::fmt;

use crate::program::{Tag, VariableKind};

/// An inferred type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Type {
    /// Nothing known yet
    #[default]
    Bottom,
    /// Explicitly untyped (`any:`)
    Dynamic,
    /// Plain cell
    Int,
    /// Boolean
    Bool,
    /// Single precision float
    Float,
    /// Character array
    String,
    /// Array with the given element type
    Array(Box<Type>),
    /// Address of a value of the given type
    Reference(Box<Type>),
    /// Opaque tagged value, usually a handle
    Object(String),
    /// Incompatible evidence
    Conflict,
}

impl Type {
    /// Shorthand for `Array(element)`.
    #[must_use]
    pub fn array(element: Type) -> Type {
        Type::Array(Box::new(element))
    }

    /// Shorthand for `Reference(target)`.
    #[must_use]
    pub fn reference(target: Type) -> Type {
        Type::Reference(Box::new(target))
    }

    /// The type implied by a declared tag.
    #[must_use]
    pub fn from_tag(tag: Option<&Tag>) -> Type {
        match tag {
            None | Some(Tag::Int) => Type::Int,
            Some(Tag::Float) => Type::Float,
            Some(Tag::Bool) => Type::Bool,
            Some(Tag::String) => Type::String,
            Some(Tag::Any) => Type::Dynamic,
            Some(Tag::Named(name)) => Type::Object(name.clone()),
        }
    }

    /// The type of a variable declared with `kind` and `tag`.
    ///
    /// Arrays tagged `String` are strings; references wrap the scalar type.
    #[must_use]
    pub fn from_declaration(kind: VariableKind, tag: Option<&Tag>) -> Type {
        let scalar = Type::from_tag(tag);
        match kind {
            VariableKind::Scalar => scalar,
            VariableKind::Reference => Type::reference(scalar),
            VariableKind::Array if scalar == Type::String => Type::String,
            VariableKind::Array => Type::array(scalar),
        }
    }

    /// Least upper bound of two types.
    #[must_use]
    pub fn join(&self, other: &Type) -> Type {
        use Type::*;
        match (self, other) {
            (Bottom, t) | (t, Bottom) => t.clone(),
            (Conflict, _) | (_, Conflict) => Conflict,
            (a, b) if a == b => a.clone(),
            (Dynamic, t) | (t, Dynamic) => t.clone(),
            (Bool, Int) | (Int, Bool) => Int,
            (String, Array(e)) | (Array(e), String) => match e.as_ref() {
                Bottom | Dynamic | Int | Bool => String,
                _ => Conflict,
            },
            (Array(a), Array(b)) => match a.join(b) {
                Conflict => Conflict,
                e => Type::array(e),
            },
            (Reference(a), Reference(b)) => match a.join(b) {
                Conflict => Conflict,
                t => Type::reference(t),
            },
            _ => Conflict,
        }
    }

    /// Returns `true` if `self` is below or equal to `other` in the lattice.
    #[must_use]
    pub fn is_at_most(&self, other: &Type) -> bool {
        &self.join(other) == other
    }

    /// Returns `true` if nothing is known.
    #[must_use]
    pub fn is_bottom(&self) -> bool {
        matches!(self, Type::Bottom)
    }

    /// Returns `true` for strings and arrays.
    #[must_use]
    pub fn is_array(&self) -> bool {
        matches!(self, Type::String | Type::Array(_))
    }

    /// Type of an element of an array, or of the target of a reference.
    #[must_use]
    pub fn element(&self) -> Type {
        match self {
            Type::String => Type::Int,
            Type::Array(e) | Type::Reference(e) => e.as_ref().clone(),
            _ => Type::Bottom,
        }
    }

    /// The declaration tag prefix, e.g. `Float:`; empty for plain cells.
    #[must_use]
    pub fn tag_prefix(&self) -> String {
        match self {
            Type::Float => "Float:".to_string(),
            Type::Bool => "bool:".to_string(),
            Type::String => "String:".to_string(),
            Type::Dynamic => "any:".to_string(),
            Type::Object(tag) => format!("{tag}:"),
            Type::Array(e) | Type::Reference(e) => e.tag_prefix(),
            Type::Bottom | Type::Int | Type::Conflict => String::new(),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Bottom => write!(f, "bottom"),
            Type::Dynamic => write!(f, "any"),
            Type::Int => write!(f, "int"),
            Type::Bool => write!(f, "bool"),
            Type::Float => write!(f, "float"),
            Type::String => write!(f, "string"),
            Type::Array(e) => write!(f, "{e}[]"),
            Type::Reference(t) => write!(f, "&{t}"),
            Type::Object(tag) => write!(f, "{tag}"),
            Type::Conflict => write!(f, "conflict"),
        }
    }
}
