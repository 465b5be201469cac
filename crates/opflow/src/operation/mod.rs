//! Operation Trees
//!
//! The resolved, immutable tree of statements and expressions that the
//! graph builder consumes. The same node type also describes the
//! statements and branch values stored in the finished graph, with a few
//! output-only kinds (flow captures, caught exceptions, null tests).

mod factory;
mod kind;

pub use kind::*;

use std::fmt;
use std::sync::Arc;

/// Shared handle to an operation node
pub type OpRef = Arc<Operation>;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl $name {
            pub fn new(id: u32) -> Self {
                Self(id)
            }

            pub fn as_u32(&self) -> u32 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

id_type!(
    /// A declared local variable
    LocalId,
    "local"
);
id_type!(
    /// A method, constructor, operator or local function symbol
    MethodId,
    "method"
);
id_type!(
    /// A label that branches can target
    LabelId,
    "label"
);
id_type!(
    /// A synthesized temporary written by a flow capture
    CaptureId,
    "capture"
);

/// Source range of the syntax an operation came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }
}

/// Primitive types the builder needs to reason about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialType {
    Boolean,
    Int32,
    Int64,
    UInt32,
    Double,
    Char,
    String,
    Object,
    Void,
}

impl SpecialType {
    pub fn is_value_type(&self) -> bool {
        !matches!(self, SpecialType::String | SpecialType::Object)
    }

    pub fn is_unsigned(&self) -> bool {
        matches!(self, SpecialType::UInt32 | SpecialType::Char)
    }
}

/// Resolved type of an operation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeRef {
    Special(SpecialType),
    /// A named class, struct or interface
    Named { name: String, is_value_type: bool },
    /// `T?` over a value type
    Nullable(Box<TypeRef>),
    Dynamic,
    Error,
}

impl TypeRef {
    pub fn boolean() -> Self {
        TypeRef::Special(SpecialType::Boolean)
    }

    pub fn int32() -> Self {
        TypeRef::Special(SpecialType::Int32)
    }

    pub fn object() -> Self {
        TypeRef::Special(SpecialType::Object)
    }

    pub fn class(name: impl Into<String>) -> Self {
        TypeRef::Named {
            name: name.into(),
            is_value_type: false,
        }
    }

    pub fn structure(name: impl Into<String>) -> Self {
        TypeRef::Named {
            name: name.into(),
            is_value_type: true,
        }
    }

    pub fn nullable(underlying: TypeRef) -> Self {
        TypeRef::Nullable(Box::new(underlying))
    }

    pub fn is_boolean(&self) -> bool {
        matches!(self, TypeRef::Special(SpecialType::Boolean))
    }

    pub fn is_nullable(&self) -> bool {
        matches!(self, TypeRef::Nullable(_))
    }

    pub fn is_nullable_boolean(&self) -> bool {
        matches!(self, TypeRef::Nullable(inner) if inner.is_boolean())
    }

    pub fn is_object(&self) -> bool {
        matches!(self, TypeRef::Special(SpecialType::Object))
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, TypeRef::Dynamic)
    }

    /// Values of this type can never be null
    pub fn is_non_nullable_value_type(&self) -> bool {
        match self {
            TypeRef::Special(s) => s.is_value_type(),
            TypeRef::Named { is_value_type, .. } => *is_value_type,
            TypeRef::Nullable(_) | TypeRef::Dynamic | TypeRef::Error => false,
        }
    }

    /// Underlying type of a nullable, or the type itself
    pub fn underlying(&self) -> &TypeRef {
        match self {
            TypeRef::Nullable(inner) => inner,
            other => other,
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Special(s) => write!(f, "{:?}", s),
            TypeRef::Named { name, .. } => write!(f, "{}", name),
            TypeRef::Nullable(inner) => write!(f, "{}?", inner),
            TypeRef::Dynamic => write!(f, "dynamic"),
            TypeRef::Error => write!(f, "?"),
        }
    }
}

/// Compile-time constant attached to an operation
#[derive(Debug, Clone, PartialEq)]
pub enum ConstantValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Char(char),
    String(String),
}

impl ConstantValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConstantValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Sign of a numeric constant: `Some(true)` for non-negative values
    pub fn is_non_negative(&self) -> Option<bool> {
        match self {
            ConstantValue::Int(v) => Some(*v >= 0),
            ConstantValue::Float(v) if !v.is_nan() => Some(*v >= 0.0),
            ConstantValue::Char(_) => Some(true),
            _ => None,
        }
    }
}

/// A node of the operation tree
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub kind: OperationKind,
    /// Result type; `None` for statements
    pub ty: Option<TypeRef>,
    pub constant: Option<ConstantValue>,
    /// Synthesized rather than written in source
    pub is_implicit: bool,
    pub span: Option<Span>,
}

impl Operation {
    pub fn new(kind: OperationKind) -> Self {
        Self {
            kind,
            ty: None,
            constant: None,
            is_implicit: false,
            span: None,
        }
    }

    pub fn with_type(mut self, ty: TypeRef) -> Self {
        self.ty = Some(ty);
        self
    }

    pub fn with_constant(mut self, constant: ConstantValue) -> Self {
        self.constant = Some(constant);
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn implicit(mut self) -> Self {
        self.is_implicit = true;
        self
    }

    pub fn into_ref(self) -> OpRef {
        Arc::new(self)
    }

    pub fn constant_bool(&self) -> Option<bool> {
        self.constant.as_ref().and_then(ConstantValue::as_bool)
    }

    pub fn is_boolean(&self) -> bool {
        self.ty.as_ref().is_some_and(TypeRef::is_boolean)
    }

    /// Short name of the operation kind, used in diagnostics
    pub fn kind_name(&self) -> &'static str {
        self.kind.name()
    }
}
