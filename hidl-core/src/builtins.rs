//! Built-in type names known to the front end.
//!
//! These are not keywords at the lexer level; the parser consults this
//! table whenever a type position starts with an identifier so that a
//! user type can never shadow a builtin.

use crate::types::{FmqFlavor, ScalarKind};

/// Kind of builtin, used by the parser to build the type expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinKind {
    Scalar(ScalarKind),
    String,
    Handle,
    Memory,
    Pointer,
    /// `vec<T>`
    Vector,
    /// `fmq_sync<T>` / `fmq_unsync<T>`
    Fmq(FmqFlavor),
}

impl BuiltinKind {
    /// Whether the builtin needs a `<T>` argument.
    pub fn is_generic(self) -> bool {
        matches!(self, BuiltinKind::Vector | BuiltinKind::Fmq(_))
    }
}

/// Metadata about a single builtin type name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuiltinDescriptor {
    pub name: &'static str,
    pub kind: BuiltinKind,
}

/// The complete list of builtin type names.
pub const BUILTINS: &[BuiltinDescriptor] = &[
    BuiltinDescriptor { name: "bool", kind: BuiltinKind::Scalar(ScalarKind::Bool) },
    BuiltinDescriptor { name: "int8_t", kind: BuiltinKind::Scalar(ScalarKind::Int8) },
    BuiltinDescriptor { name: "uint8_t", kind: BuiltinKind::Scalar(ScalarKind::Uint8) },
    BuiltinDescriptor { name: "int16_t", kind: BuiltinKind::Scalar(ScalarKind::Int16) },
    BuiltinDescriptor { name: "uint16_t", kind: BuiltinKind::Scalar(ScalarKind::Uint16) },
    BuiltinDescriptor { name: "int32_t", kind: BuiltinKind::Scalar(ScalarKind::Int32) },
    BuiltinDescriptor { name: "uint32_t", kind: BuiltinKind::Scalar(ScalarKind::Uint32) },
    BuiltinDescriptor { name: "int64_t", kind: BuiltinKind::Scalar(ScalarKind::Int64) },
    BuiltinDescriptor { name: "uint64_t", kind: BuiltinKind::Scalar(ScalarKind::Uint64) },
    BuiltinDescriptor { name: "float", kind: BuiltinKind::Scalar(ScalarKind::Float) },
    BuiltinDescriptor { name: "double", kind: BuiltinKind::Scalar(ScalarKind::Double) },
    BuiltinDescriptor { name: "string", kind: BuiltinKind::String },
    BuiltinDescriptor { name: "handle", kind: BuiltinKind::Handle },
    BuiltinDescriptor { name: "memory", kind: BuiltinKind::Memory },
    BuiltinDescriptor { name: "pointer", kind: BuiltinKind::Pointer },
    BuiltinDescriptor { name: "vec", kind: BuiltinKind::Vector },
    BuiltinDescriptor { name: "fmq_sync", kind: BuiltinKind::Fmq(FmqFlavor::Sync) },
    BuiltinDescriptor { name: "fmq_unsync", kind: BuiltinKind::Fmq(FmqFlavor::Unsync) },
];

/// Look up a builtin by its source-level name.
///
/// The search is linear because the table is small.
pub fn find_builtin(name: &str) -> Option<&'static BuiltinDescriptor> {
    BUILTINS.iter().find(|builtin| builtin.name == name)
}

/// Look up a scalar builtin only (used for casts in constant expressions).
pub fn find_scalar(name: &str) -> Option<ScalarKind> {
    match find_builtin(name)?.kind {
        BuiltinKind::Scalar(kind) => Some(kind),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_scalar_round_trips_through_its_name() {
        for builtin in BUILTINS {
            if let BuiltinKind::Scalar(kind) = builtin.kind {
                assert_eq!(kind.name(), builtin.name);
                assert_eq!(find_scalar(builtin.name), Some(kind));
            }
        }
    }

    #[test]
    fn generic_builtins_are_flagged() {
        assert!(find_builtin("vec").map(|b| b.kind.is_generic()).unwrap_or(false));
        assert!(!find_builtin("string").map(|b| b.kind.is_generic()).unwrap_or(true));
        assert!(find_builtin("IFoo").is_none());
        assert_eq!(find_scalar("vec"), None);
    }
}
