//! The validated, immutable form of one parsed file.
//!
//! A [`HirFile`] is produced by [`crate::name_resolve`], checked by
//! [`crate::typecheck`] and then shared through `Rc` by the
//! [`crate::coordinator::CompilationContext`]. Everything here is
//! read-only; emitters walk it through the query methods.

use std::cell::OnceCell;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::constant::ConstantExpression;
use crate::diagnostic::Diagnostic;
use crate::fqname::FqName;
use crate::scope::{ConstId, Entity, Scope, ScopeArena, ScopeId, TypeId};
use crate::span::Location;
use crate::types::{
    Layout, NamedType, NamedTypeKind, Type, TypeRef, TypeTarget, is_java_compatible, layout_of,
    named_is_java_compatible,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub name: String,
    pub location: Location,
    pub params: Vec<AnnotationParam>,
}

impl Annotation {
    pub fn param(&self, name: &str) -> Option<&AnnotationParam> {
        self.params.iter().find(|p| p.name == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationParam {
    pub name: String,
    pub values: Vec<AnnotationValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AnnotationValue {
    String(String),
    Constant(ConstantExpression),
}

impl AnnotationValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AnnotationValue::String(s) => Some(s),
            AnnotationValue::Constant(_) => None,
        }
    }

    /// Canonical text; constants render as their value.
    pub fn render(&self) -> String {
        match self {
            AnnotationValue::String(s) => format!("{s:?}"),
            AnnotationValue::Constant(c) => c.value_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConstantDecl {
    pub name: String,
    pub fq_name: FqName,
    pub location: Location,
    pub doc: Option<String>,
    pub annotations: Vec<Annotation>,
    pub ty: Type,
    pub value: ConstantExpression,
    pub parent_scope: ScopeId,
}

impl ConstantDecl {
    pub fn is_exported(&self) -> bool {
        self.annotations.iter().any(|a| a.name == "export")
    }
}

/// A declaration of a file, in source order.
#[derive(Debug, Clone, Copy)]
pub enum Declaration<'a> {
    Type(TypeId, &'a NamedType),
    Constant(ConstId, &'a ConstantDecl),
}

impl<'a> Declaration<'a> {
    pub fn fq_name(&self) -> &'a FqName {
        match self {
            Declaration::Type(_, t) => &t.fq_name,
            Declaration::Constant(_, c) => &c.fq_name,
        }
    }
}

#[derive(Debug)]
pub struct HirFile {
    pub(crate) fq_name: FqName,
    pub(crate) path: PathBuf,
    pub(crate) scopes: ScopeArena,
    pub(crate) types: Vec<NamedType>,
    pub(crate) constants: Vec<ConstantDecl>,
    /// Names of `import` statements, completed against this package.
    pub(crate) imports: Vec<FqName>,
    /// Files this one depends on directly, in first-use order.
    pub(crate) dependencies: Vec<Rc<HirFile>>,
    pub(crate) warnings: Vec<Diagnostic>,
    pub(crate) hash: OnceCell<String>,
    pub(crate) hierarchy: OnceCell<BTreeSet<FqName>>,
}

impl HirFile {
    /// `pkg@M.m::IFoo` or `pkg@M.m::types`.
    pub fn fq_name(&self) -> &FqName {
        &self.fq_name
    }

    pub fn package(&self) -> FqName {
        self.fq_name.package_name()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_types_file(&self) -> bool {
        self.fq_name.name() == "types"
    }

    pub fn root_scope(&self) -> ScopeId {
        self.scopes.root()
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        self.scopes.get(id)
    }

    pub fn named_type(&self, id: TypeId) -> &NamedType {
        &self.types[id.index()]
    }

    pub fn constant(&self, id: ConstId) -> &ConstantDecl {
        &self.constants[id.index()]
    }

    /// Every declared type, outer declarations before nested ones.
    pub fn types(&self) -> &[NamedType] {
        &self.types
    }

    pub fn constants(&self) -> &[ConstantDecl] {
        &self.constants
    }

    pub fn warnings(&self) -> &[Diagnostic] {
        &self.warnings
    }

    pub fn imports(&self) -> &[FqName] {
        &self.imports
    }

    pub fn dependencies(&self) -> &[Rc<HirFile>] {
        &self.dependencies
    }

    /// The interface of an interface file.
    pub fn interface(&self) -> Option<&NamedType> {
        self.scopes
            .get(self.root_scope())
            .types()
            .map(|id| self.named_type(id))
            .find(|t| t.is_interface())
    }

    /// Follows a reference to the declaring file and declaration.
    pub fn resolve<'a>(&'a self, r: &'a TypeRef) -> (&'a HirFile, &'a NamedType) {
        match &r.target {
            TypeTarget::Local(id) => (self, self.named_type(*id)),
            TypeTarget::External(file, id) => (file.as_ref(), file.named_type(*id)),
        }
    }

    /// Replaces typedefs by their targets until a non-alias type is
    /// reached. Returns the file the final type must be interpreted in.
    ///
    /// Only valid on checked files: a typedef cycle would not terminate.
    pub fn strip_typedefs<'a>(&'a self, ty: &'a Type) -> (&'a HirFile, &'a Type) {
        let mut file = self;
        let mut current = ty;
        while let Type::Named(r) = current {
            let (owner, named) = file.resolve(r);
            match &named.kind {
                NamedTypeKind::Typedef(target) => {
                    file = owner;
                    current = target;
                }
                _ => break,
            }
        }
        (file, current)
    }

    /// Finds a declaration by its dotted path from the root scope.
    pub fn find_entity(&self, names: &[String]) -> Option<Entity> {
        let (first, rest) = names.split_first()?;
        let entity = self.scopes.get(self.root_scope()).get(first)?.entity;
        walk_members(&self.scopes, &self.types, entity, rest)
    }

    /// Descends from `entity` through nested declarations named `rest`.
    pub fn member(&self, entity: Entity, rest: &[String]) -> Option<Entity> {
        walk_members(&self.scopes, &self.types, entity, rest)
    }

    pub fn find_type(&self, names: &[String]) -> Option<TypeId> {
        match self.find_entity(names)? {
            Entity::Type(id) => Some(id),
            Entity::Constant(_) => None,
        }
    }

    /// All declarations in source order, nested ones right after their
    /// enclosing declaration.
    pub fn declarations(&self) -> Vec<Declaration<'_>> {
        let mut out = Vec::new();
        self.collect_declarations(self.root_scope(), &mut out);
        out
    }

    fn collect_declarations<'a>(&'a self, scope: ScopeId, out: &mut Vec<Declaration<'a>>) {
        for entry in self.scopes.get(scope).entries() {
            match entry.entity {
                Entity::Type(id) => {
                    let named = self.named_type(id);
                    out.push(Declaration::Type(id, named));
                    if let Some(inner) = named.inner_scope() {
                        self.collect_declarations(inner, out);
                    }
                }
                Entity::Constant(id) => out.push(Declaration::Constant(id, self.constant(id))),
            }
        }
    }

    /// `@export` declarations in source order.
    pub fn exported_types(&self) -> Vec<Declaration<'_>> {
        self.declarations()
            .into_iter()
            .filter(|decl| match decl {
                Declaration::Type(_, t) => t.is_exported(),
                Declaration::Constant(_, c) => c.is_exported(),
            })
            .collect()
    }

    /// Types of other files referenced by this file, plus explicitly
    /// imported type names.
    pub fn imported_names(&self) -> BTreeSet<FqName> {
        let mut names: BTreeSet<FqName> = self
            .imports
            .iter()
            .filter(|name| name.is_fully_qualified())
            .cloned()
            .collect();
        for named in &self.types {
            for ty in referenced_types(named) {
                collect_external(ty, &mut names);
            }
        }
        for constant in &self.constants {
            collect_external(&constant.ty, &mut names);
        }
        names
    }

    /// Packages of [`HirFile::imported_names`] and package imports,
    /// without this file's own package.
    pub fn imported_packages(&self) -> BTreeSet<FqName> {
        let own = self.package();
        self.imports
            .iter()
            .map(FqName::package_name)
            .chain(self.imported_names().iter().map(FqName::package_name))
            .filter(|package| *package != own)
            .collect()
    }

    /// Imported packages of this file and, transitively, of every file
    /// it depends on.
    pub fn imported_packages_hierarchy(&self) -> &BTreeSet<FqName> {
        self.hierarchy.get_or_init(|| {
            let own = self.package();
            let mut packages = self.imported_packages();
            for dependency in &self.dependencies {
                packages.extend(
                    dependency
                        .imported_packages_hierarchy()
                        .iter()
                        .filter(|package| **package != own)
                        .cloned(),
                );
                let package = dependency.package();
                if package != own {
                    packages.insert(package);
                }
            }
            packages
        })
    }

    /// True when every declaration can be expressed without unsigned
    /// pointers, raw memory, handles, queues or unions.
    pub fn is_java_compatible(&self) -> bool {
        let mut visiting = Vec::new();
        self.types
            .iter()
            .all(|named| named_is_java_compatible(self, named, &mut visiting))
            && self
                .constants
                .iter()
                .all(|c| is_java_compatible(self, &c.ty, &mut visiting))
    }

    pub fn layout(&self, ty: &Type) -> Layout {
        layout_of(self, ty)
    }

    /// Structural hash, computed on first use.
    pub fn hash(&self) -> &str {
        self.hash.get_or_init(|| crate::hash::file_hash(self))
    }
}

pub(crate) fn walk_members(
    scopes: &ScopeArena,
    types: &[NamedType],
    mut entity: Entity,
    rest: &[String],
) -> Option<Entity> {
    for name in rest {
        let Entity::Type(id) = entity else {
            return None;
        };
        let inner = types[id.index()].inner_scope()?;
        entity = scopes.get(inner).get(name)?.entity;
    }
    Some(entity)
}

/// Types written in the declaration itself, not in nested declarations.
pub(crate) fn referenced_types(named: &NamedType) -> Vec<&Type> {
    match &named.kind {
        NamedTypeKind::Enum(e) => vec![&e.storage],
        NamedTypeKind::Typedef(target) => vec![target],
        NamedTypeKind::Struct(c) | NamedTypeKind::Union(c) | NamedTypeKind::SafeUnion(c) => {
            c.fields.iter().map(|f| &f.ty).collect()
        }
        NamedTypeKind::Interface(i) => i
            .methods
            .iter()
            .flat_map(|m| m.args.iter().chain(m.results.iter()))
            .map(|f| &f.ty)
            .collect(),
    }
}

fn collect_external(ty: &Type, out: &mut BTreeSet<FqName>) {
    match ty {
        Type::Named(r) if !r.is_local() => {
            out.insert(r.fq_name.clone());
        }
        Type::Array { element, .. } | Type::Vector(element) | Type::Fmq { element, .. } => {
            collect_external(element, out)
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::{Package, context_with};

    #[test]
    fn finds_nested_declarations_by_path() {
        let (_dir, mut context) = context_with(&[Package::new(
            "test@1.0",
            &[(
                "IFoo",
                "package test@1.0;\n\
                 interface IFoo {\n\
                     struct Point { int32_t x; };\n\
                     const int32_t LIMIT = 3;\n\
                     get() generates (Point p);\n\
                 };\n",
            )],
        )]);
        let file = context.parse_str("test@1.0::IFoo").expect("parse");
        let names = |path: &str| path.split('.').map(str::to_string).collect::<Vec<_>>();
        assert!(file.find_type(&names("IFoo.Point")).is_some());
        assert!(file.find_type(&names("IFoo.LIMIT")).is_none());
        assert!(file.find_entity(&names("IFoo.LIMIT")).is_some());
        assert!(file.find_type(&names("Point")).is_none());

        let order: Vec<String> = file
            .declarations()
            .iter()
            .map(|d| d.fq_name().to_string())
            .collect();
        assert_eq!(
            order,
            vec!["test@1.0::IFoo", "test@1.0::IFoo.Point", "test@1.0::IFoo.LIMIT"]
        );
        assert_eq!(file.interface().map(|i| i.name.as_str()), Some("IFoo"));
    }

    #[test]
    fn reports_imported_packages_and_exports() {
        let (_dir, mut context) = context_with(&[
            Package::new(
                "base@1.0",
                &[("types", "package base@1.0;\nstruct Blob { vec<uint8_t> data; };\n")],
            ),
            Package::new(
                "deep@1.0",
                &[("types", "package deep@1.0;\nimport base@1.0::Blob;\nstruct Wrapped { Blob blob; };\n")],
            ),
            Package::new(
                "test@1.0",
                &[(
                    "types",
                    "package test@1.0;\n\
                     import deep@1.0::Wrapped;\n\
                     @export(name=\"mode_t\")\n\
                     enum Mode : uint8_t { OFF, ON };\n\
                     struct Holder { Wrapped w; Mode m; };\n\
                     @export\n\
                     const uint32_t MAX = 10;\n",
                )],
            ),
        ]);
        let file = context.parse_str("test@1.0::types").expect("parse");
        let names: Vec<String> = file.imported_names().iter().map(ToString::to_string).collect();
        assert_eq!(names, vec!["deep@1.0::Wrapped"]);
        let packages: Vec<String> =
            file.imported_packages().iter().map(ToString::to_string).collect();
        assert_eq!(packages, vec!["deep@1.0"]);
        let hierarchy: Vec<String> = file
            .imported_packages_hierarchy()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(hierarchy, vec!["base@1.0", "deep@1.0"]);

        let exported: Vec<String> = file
            .exported_types()
            .iter()
            .map(|d| d.fq_name().to_string())
            .collect();
        assert_eq!(exported, vec!["test@1.0::Mode", "test@1.0::MAX"]);
        assert!(file.is_java_compatible());
    }

    #[test]
    fn java_compatibility_follows_references() {
        let (_dir, mut context) = context_with(&[Package::new(
            "test@1.0",
            &[
                (
                    "types",
                    "package test@1.0;\n\
                     struct Raw { handle h; };\n\
                     typedef Raw Alias;\n",
                ),
                (
                    "IUses",
                    "package test@1.0;\ninterface IUses { take(Alias a); };\n",
                ),
                (
                    "IPlain",
                    "package test@1.0;\ninterface IPlain { take(vec<string> names); };\n",
                ),
            ],
        )]);
        let uses = context.parse_str("test@1.0::IUses").expect("parse");
        assert!(!uses.is_java_compatible());
        let plain = context.parse_str("test@1.0::IPlain").expect("parse");
        assert!(plain.is_java_compatible());
    }
}
