//! Type system of the interface language.
//!
//! [`Type`] is the structural form used in field, argument and typedef
//! positions. Declared types (enums, structs, unions, typedefs and
//! interfaces) live in the owning file's arena as [`NamedType`] and are
//! referenced weakly through [`TypeRef`]: a reference never owns its
//! target, which stays owned by the file that declared it.

use std::collections::BTreeSet;
use std::fmt;
use std::rc::Rc;

use crate::constant::ConstantExpression;
use crate::fqname::FqName;
use crate::hir::{Annotation, HirFile};
use crate::scope::{ScopeId, TypeId};
use crate::span::Location;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScalarKind {
    Bool,
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Float,
    Double,
}

impl ScalarKind {
    pub fn name(self) -> &'static str {
        match self {
            ScalarKind::Bool => "bool",
            ScalarKind::Int8 => "int8_t",
            ScalarKind::Uint8 => "uint8_t",
            ScalarKind::Int16 => "int16_t",
            ScalarKind::Uint16 => "uint16_t",
            ScalarKind::Int32 => "int32_t",
            ScalarKind::Uint32 => "uint32_t",
            ScalarKind::Int64 => "int64_t",
            ScalarKind::Uint64 => "uint64_t",
            ScalarKind::Float => "float",
            ScalarKind::Double => "double",
        }
    }

    /// Storage width in bits.
    pub fn bits(self) -> u32 {
        match self {
            ScalarKind::Bool | ScalarKind::Int8 | ScalarKind::Uint8 => 8,
            ScalarKind::Int16 | ScalarKind::Uint16 => 16,
            ScalarKind::Int32 | ScalarKind::Uint32 | ScalarKind::Float => 32,
            ScalarKind::Int64 | ScalarKind::Uint64 | ScalarKind::Double => 64,
        }
    }

    pub fn size(self) -> u64 {
        u64::from(self.bits() / 8)
    }

    pub fn is_integral(self) -> bool {
        !matches!(self, ScalarKind::Bool | ScalarKind::Float | ScalarKind::Double)
    }

    pub fn is_floating(self) -> bool {
        matches!(self, ScalarKind::Float | ScalarKind::Double)
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            ScalarKind::Int8
                | ScalarKind::Int16
                | ScalarKind::Int32
                | ScalarKind::Int64
                | ScalarKind::Float
                | ScalarKind::Double
        )
    }

    /// Smallest and largest representable integer, for integral kinds
    /// (and bool, as 0..=1).
    pub fn integer_range(self) -> Option<(i128, i128)> {
        match self {
            ScalarKind::Bool => Some((0, 1)),
            ScalarKind::Float | ScalarKind::Double => None,
            kind if kind.is_signed() => {
                let bits = kind.bits();
                Some((-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1))
            }
            kind => Some((0, (1i128 << kind.bits()) - 1)),
        }
    }

    /// The unsigned integral kind with the given width.
    pub fn unsigned_of_bits(bits: u32) -> ScalarKind {
        match bits {
            0..=8 => ScalarKind::Uint8,
            9..=16 => ScalarKind::Uint16,
            17..=32 => ScalarKind::Uint32,
            _ => ScalarKind::Uint64,
        }
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FmqFlavor {
    Sync,
    Unsync,
}

impl FmqFlavor {
    pub fn name(self) -> &'static str {
        match self {
            FmqFlavor::Sync => "fmq_sync",
            FmqFlavor::Unsync => "fmq_unsync",
        }
    }
}

/// Where a [`TypeRef`] points.
#[derive(Clone)]
pub enum TypeTarget {
    /// A declaration of the file holding the reference.
    Local(TypeId),
    /// A declaration of another, already completed file.
    External(Rc<HirFile>, TypeId),
}

/// Weak, name-resolved reference to a declared type.
#[derive(Clone)]
pub struct TypeRef {
    pub fq_name: FqName,
    pub target: TypeTarget,
}

impl TypeRef {
    pub fn local(fq_name: FqName, id: TypeId) -> Self {
        TypeRef {
            fq_name,
            target: TypeTarget::Local(id),
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self.target, TypeTarget::Local(_))
    }

    /// Re-anchors a reference taken from `owner` so that it is valid when
    /// seen from a different file.
    pub fn relative_to(&self, owner: &Rc<HirFile>) -> TypeRef {
        match &self.target {
            TypeTarget::Local(id) => TypeRef {
                fq_name: self.fq_name.clone(),
                target: TypeTarget::External(Rc::clone(owner), *id),
            },
            TypeTarget::External(..) => self.clone(),
        }
    }
}

impl fmt::Debug for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeRef({})", self.fq_name)
    }
}

impl PartialEq for TypeRef {
    fn eq(&self, other: &Self) -> bool {
        self.fq_name == other.fq_name
    }
}

impl Eq for TypeRef {}

/// Structural type as written in a field, argument or typedef.
#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    Scalar(ScalarKind),
    String,
    Handle,
    Memory,
    Pointer,
    Array {
        element: Box<Type>,
        size: ConstantExpression,
    },
    Vector(Box<Type>),
    Fmq {
        flavor: FmqFlavor,
        element: Box<Type>,
    },
    /// Enum, struct, union, typedef or interface.
    Named(TypeRef),
}

impl Type {
    pub fn is_scalar(&self) -> bool {
        matches!(self, Type::Scalar(_))
    }

    pub fn as_named(&self) -> Option<&TypeRef> {
        match self {
            Type::Named(r) => Some(r),
            _ => None,
        }
    }

    /// Number of elements of an array type.
    pub fn array_len(&self) -> Option<u64> {
        match self {
            Type::Array { size, .. } => size.as_u64(),
            _ => None,
        }
    }

    /// Collects every declared type referenced by name, without following
    /// the references.
    pub fn collect_references(&self, out: &mut BTreeSet<FqName>) {
        match self {
            Type::Scalar(_) | Type::String | Type::Handle | Type::Memory | Type::Pointer => {}
            Type::Array { element, .. } | Type::Vector(element) | Type::Fmq { element, .. } => {
                element.collect_references(out)
            }
            Type::Named(r) => {
                out.insert(r.fq_name.clone());
            }
        }
    }

    /// Source-like rendering; named types print their full name.
    pub fn describe(&self) -> String {
        match self {
            Type::Scalar(kind) => kind.name().to_string(),
            Type::String => "string".to_string(),
            Type::Handle => "handle".to_string(),
            Type::Memory => "memory".to_string(),
            Type::Pointer => "pointer".to_string(),
            Type::Array { element, size } => {
                format!("{}[{}]", element.describe(), size.value())
            }
            Type::Vector(element) => format!("vec<{}>", element.describe()),
            Type::Fmq { flavor, element } => format!("{}<{}>", flavor.name(), element.describe()),
            Type::Named(r) => r.fq_name.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NamedType {
    pub name: String,
    pub fq_name: FqName,
    pub location: Location,
    pub doc: Option<String>,
    pub annotations: Vec<Annotation>,
    /// Scope the type is declared in.
    pub parent_scope: ScopeId,
    pub kind: NamedTypeKind,
}

impl NamedType {
    pub fn annotation(&self, name: &str) -> Option<&Annotation> {
        self.annotations.iter().find(|a| a.name == name)
    }

    pub fn is_exported(&self) -> bool {
        self.annotation("export").is_some()
    }

    pub fn is_typedef(&self) -> bool {
        matches!(self.kind, NamedTypeKind::Typedef(_))
    }

    pub fn is_interface(&self) -> bool {
        matches!(self.kind, NamedTypeKind::Interface(_))
    }

    /// Scope holding nested declarations, for compound types and
    /// interfaces.
    pub fn inner_scope(&self) -> Option<ScopeId> {
        match &self.kind {
            NamedTypeKind::Struct(c) | NamedTypeKind::Union(c) | NamedTypeKind::SafeUnion(c) => {
                Some(c.scope)
            }
            NamedTypeKind::Interface(i) => Some(i.scope),
            NamedTypeKind::Enum(_) | NamedTypeKind::Typedef(_) => None,
        }
    }

    pub fn as_enum(&self) -> Option<&EnumType> {
        match &self.kind {
            NamedTypeKind::Enum(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_interface(&self) -> Option<&InterfaceType> {
        match &self.kind {
            NamedTypeKind::Interface(i) => Some(i),
            _ => None,
        }
    }

    pub fn keyword(&self) -> &'static str {
        match &self.kind {
            NamedTypeKind::Enum(_) => "enum",
            NamedTypeKind::Struct(_) => "struct",
            NamedTypeKind::Union(_) => "union",
            NamedTypeKind::SafeUnion(_) => "safe_union",
            NamedTypeKind::Typedef(_) => "typedef",
            NamedTypeKind::Interface(_) => "interface",
        }
    }
}

#[derive(Debug, Clone)]
pub enum NamedTypeKind {
    Enum(EnumType),
    Struct(CompoundType),
    Union(CompoundType),
    SafeUnion(CompoundType),
    Typedef(Type),
    Interface(InterfaceType),
}

#[derive(Debug, Clone)]
pub struct EnumType {
    /// Storage as written, possibly a typedef or a parent enum.
    pub storage: Type,
    /// Underlying integral kind after resolving the storage.
    pub scalar: ScalarKind,
    /// Parent enum whose values are inherited.
    pub parent: Option<TypeRef>,
    /// Values declared by this enum only, in order.
    pub values: Vec<EnumValue>,
}

impl EnumType {
    pub fn value(&self, name: &str) -> Option<&EnumValue> {
        self.values.iter().find(|v| v.name == name)
    }
}

#[derive(Debug, Clone)]
pub struct EnumValue {
    pub name: String,
    pub location: Location,
    pub doc: Option<String>,
    pub value: ConstantExpression,
    /// False for auto-incremented values.
    pub explicit: bool,
}

#[derive(Debug, Clone)]
pub struct CompoundType {
    pub scope: ScopeId,
    pub fields: Vec<Field>,
}

#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub ty: Type,
    pub location: Location,
    pub doc: Option<String>,
    pub annotations: Vec<Annotation>,
}

#[derive(Debug, Clone)]
pub struct InterfaceType {
    pub scope: ScopeId,
    pub parent: Option<TypeRef>,
    pub methods: Vec<Method>,
}

#[derive(Debug, Clone)]
pub struct Method {
    pub name: String,
    pub location: Location,
    pub doc: Option<String>,
    pub annotations: Vec<Annotation>,
    pub oneway: bool,
    pub args: Vec<Field>,
    pub results: Vec<Field>,
}

/// Size and alignment of the in-memory representation, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub size: u64,
    pub align: u64,
}

impl Layout {
    pub const fn new(size: u64, align: u64) -> Self {
        Layout { size, align }
    }

    const POINTER: Layout = Layout::new(8, 8);
    /// Pointer + length + ownership flag.
    const STRING: Layout = Layout::new(16, 8);
    /// Same shape as a string.
    const VECTOR: Layout = Layout::new(16, 8);
    /// Native handle pointer + ownership flag.
    const HANDLE: Layout = Layout::new(16, 8);
    /// Handle + size + name.
    const MEMORY: Layout = Layout::new(40, 8);
    /// Grantor vector + handle pointer + quantum + flags.
    const FMQ: Layout = Layout::new(32, 8);
}

fn align_up(offset: u64, align: u64) -> u64 {
    if align <= 1 {
        offset
    } else {
        offset.div_ceil(align) * align
    }
}

/// Layout of a structural type seen from `file`.
///
/// Only valid for files that passed validation: a struct containing
/// itself by value would not terminate.
pub fn layout_of(file: &HirFile, ty: &Type) -> Layout {
    match ty {
        Type::Scalar(kind) => Layout::new(kind.size(), kind.size()),
        Type::String => Layout::STRING,
        Type::Handle => Layout::HANDLE,
        Type::Memory => Layout::MEMORY,
        Type::Pointer => Layout::POINTER,
        Type::Vector(_) => Layout::VECTOR,
        Type::Fmq { .. } => Layout::FMQ,
        Type::Array { element, size } => {
            let element = layout_of(file, element);
            Layout::new(element.size * size.as_u64().unwrap_or(0), element.align)
        }
        Type::Named(r) => {
            let (owner, named) = file.resolve(r);
            named_layout(owner, named)
        }
    }
}

/// Layout of a declared type; `owner` is the file that declares it.
pub fn named_layout(owner: &HirFile, named: &NamedType) -> Layout {
    match &named.kind {
        NamedTypeKind::Enum(e) => Layout::new(e.scalar.size(), e.scalar.size()),
        NamedTypeKind::Typedef(target) => layout_of(owner, target),
        NamedTypeKind::Interface(_) => Layout::POINTER,
        NamedTypeKind::Struct(c) => {
            let mut offset = 0;
            let mut align = 1;
            for field in &c.fields {
                let l = layout_of(owner, &field.ty);
                offset = align_up(offset, l.align) + l.size;
                align = align.max(l.align);
            }
            Layout::new(align_up(offset, align), align)
        }
        NamedTypeKind::Union(c) => union_body(owner, c),
        NamedTypeKind::SafeUnion(c) => {
            let body = union_body(owner, c);
            let discriminator = safe_union_discriminator(c.fields.len()).size();
            let align = body.align.max(discriminator);
            let offset = align_up(discriminator, body.align);
            Layout::new(align_up(offset + body.size, align), align)
        }
    }
}

fn union_body(owner: &HirFile, c: &CompoundType) -> Layout {
    let (size, align) = c.fields.iter().fold((0, 1), |(size, align), field| {
        let l = layout_of(owner, &field.ty);
        (size.max(l.size), align.max(l.align))
    });
    Layout::new(align_up(size, align), align)
}

/// Discriminator of a safe union with `fields` alternatives.
pub fn safe_union_discriminator(fields: usize) -> ScalarKind {
    let needed = usize::BITS - fields.saturating_sub(1).leading_zeros();
    ScalarKind::unsigned_of_bits(needed)
}

/// Whether the type can be expressed by a target language that lacks
/// unsigned and pointer primitives and unions.
pub fn is_java_compatible(file: &HirFile, ty: &Type, visiting: &mut Vec<FqName>) -> bool {
    match ty {
        Type::Scalar(_) | Type::String => true,
        Type::Handle | Type::Memory | Type::Pointer | Type::Fmq { .. } => false,
        Type::Array { element, .. } | Type::Vector(element) => {
            is_java_compatible(file, element, visiting)
        }
        Type::Named(r) => {
            if visiting.contains(&r.fq_name) {
                return true;
            }
            visiting.push(r.fq_name.clone());
            let (owner, named) = file.resolve(r);
            let compatible = named_is_java_compatible(owner, named, visiting);
            visiting.pop();
            compatible
        }
    }
}

pub fn named_is_java_compatible(owner: &HirFile, named: &NamedType, visiting: &mut Vec<FqName>) -> bool {
    match &named.kind {
        NamedTypeKind::Enum(_) => true,
        NamedTypeKind::Union(_) => false,
        NamedTypeKind::Typedef(target) => is_java_compatible(owner, target, visiting),
        NamedTypeKind::Struct(c) | NamedTypeKind::SafeUnion(c) => c
            .fields
            .iter()
            .all(|field| is_java_compatible(owner, &field.ty, visiting)),
        NamedTypeKind::Interface(i) => {
            let parent_ok = i.parent.as_ref().is_none_or(|parent| {
                is_java_compatible(owner, &Type::Named(parent.clone()), visiting)
            });
            parent_ok
                && i.methods.iter().all(|method| {
                    method
                        .args
                        .iter()
                        .chain(method.results.iter())
                        .all(|arg| is_java_compatible(owner, &arg.ty, visiting))
                })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_ranges_follow_width_and_signedness() {
        assert_eq!(ScalarKind::Int8.integer_range(), Some((-128, 127)));
        assert_eq!(ScalarKind::Uint16.integer_range(), Some((0, 65535)));
        assert_eq!(
            ScalarKind::Uint64.integer_range(),
            Some((0, u64::MAX as i128))
        );
        assert_eq!(ScalarKind::Double.integer_range(), None);
        assert!(ScalarKind::Uint32.is_integral());
        assert!(!ScalarKind::Bool.is_integral());
    }

    #[test]
    fn safe_union_discriminator_grows_with_alternatives() {
        assert_eq!(safe_union_discriminator(1), ScalarKind::Uint8);
        assert_eq!(safe_union_discriminator(256), ScalarKind::Uint8);
        assert_eq!(safe_union_discriminator(257), ScalarKind::Uint16);
    }

    #[test]
    fn align_up_rounds_to_multiples() {
        assert_eq!(align_up(5, 4), 8);
        assert_eq!(align_up(8, 4), 8);
        assert_eq!(align_up(3, 1), 3);
    }
}
