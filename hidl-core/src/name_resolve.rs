//! Name resolution: lowers an [`ast::File`] into a [`HirFile`].
//!
//! Resolution runs in two steps. The declare step binds every declaration
//! of the file in its scope, so that forward references work and
//! redefinitions are caught regardless of order. The resolve step then
//! fills in each declaration on demand: a constant, enum or typedef is
//! resolved the first time something needs its value, and asking for a
//! declaration that is still being resolved is a cycle.
//!
//! Unqualified names are looked up in this order:
//!
//! 1. the enclosing scopes, innermost first;
//! 2. explicitly imported types and `types` files;
//! 3. this file's own package (`Name.hal`, then `types.hal`);
//! 4. each imported package, in import order.
//!
//! Names carrying a package or version skip straight to the package they
//! name. Looking into another file parses it through the
//! [`CompilationContext`], which rejects files that are still in progress.

use std::cell::OnceCell;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::ast::{self, CompoundKind, DeclKind, NameRef, TypeExprKind};
use crate::builtins::BuiltinKind;
use crate::constant::{self, ConstEnv, ConstantExpression};
use crate::coordinator::{CompilationContext, Enforce};
use crate::diagnostic::Diagnostic;
use crate::error::CoreError;
use crate::fqname::FqName;
use crate::hir::{self, ConstantDecl, HirFile, walk_members};
use crate::scope::{ConstId, Entity, ScopeArena, ScopeId, TypeId};
use crate::span::Location;
use crate::types::{
    CompoundType, EnumType, EnumValue, Field, InterfaceType, Method, NamedType, NamedTypeKind,
    ScalarKind, Type, TypeRef, TypeTarget,
};

/// Resolves one parsed file. `fq_name` names the file itself
/// (`pkg@M.m::types` or `pkg@M.m::IFoo`).
pub(crate) fn resolve_file(
    context: &mut CompilationContext,
    fq_name: &FqName,
    path: &Path,
    file: &ast::File,
) -> Result<HirFile, CoreError> {
    check_file_structure(fq_name, path, file)?;

    let mut resolver = Resolver::new(context, fq_name, path, file);
    for decl in &file.decls {
        let root = resolver.scopes.root();
        let package = resolver.package.clone();
        resolver.declare(decl, root, &package)?;
    }
    resolver.resolve_imports()?;
    for index in 0..resolver.types.len() {
        resolver.resolve_type(TypeId::new(index))?;
    }
    for index in 0..resolver.constants.len() {
        resolver.resolve_const(ConstId::new(index))?;
    }
    Ok(resolver.finish())
}

/// `types.hal` holds no interface; `IFoo.hal` holds interface `IFoo` and
/// nothing else; the package header matches the file's location.
fn check_file_structure(fq_name: &FqName, path: &Path, file: &ast::File) -> Result<(), CoreError> {
    let expected = fq_name.package_name();
    if file.package != expected {
        return Err(CoreError::PackageMismatch {
            path: path.to_path_buf(),
            declared: file.package.clone(),
            expected,
        });
    }

    let invalid = |location: Location, message: String| CoreError::TypeValidation {
        path: path.to_path_buf(),
        location,
        message,
    };
    let name = fq_name.name();
    if name == "types" {
        if let Some(decl) = file
            .decls
            .iter()
            .find(|decl| matches!(decl.kind, DeclKind::Interface { .. }))
        {
            return Err(invalid(
                decl.location,
                format!("types.hal cannot declare interface '{}'", decl.name),
            ));
        }
        return Ok(());
    }

    match file.decls.as_slice() {
        [decl] if matches!(decl.kind, DeclKind::Interface { .. }) && decl.name == name => Ok(()),
        decls => {
            let location = decls
                .first()
                .map(|decl| decl.location)
                .unwrap_or(file.package_location);
            Err(invalid(
                location,
                format!("{name}.hal must declare exactly one interface named '{name}' and nothing else"),
            ))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Pending,
    InProgress,
    Done,
}

/// Values of the enum currently being resolved, visible to its own
/// value expressions.
struct EnumFrame {
    id: TypeId,
    values: Vec<EnumValue>,
    parent: Option<TypeRef>,
}

/// Where a name lookup ended.
enum Found {
    Local(Entity),
    External(Rc<HirFile>, Entity),
}

struct Resolver<'c, 'a> {
    context: &'c mut CompilationContext,
    fq_name: FqName,
    package: FqName,
    path: PathBuf,
    file: &'a ast::File,
    scopes: ScopeArena,
    types: Vec<NamedType>,
    type_decls: Vec<&'a ast::Decl>,
    type_states: Vec<State>,
    constants: Vec<ConstantDecl>,
    const_decls: Vec<&'a ast::Decl>,
    const_states: Vec<State>,
    imports: Vec<FqName>,
    /// `import pkg@M.m::Name;` makes `Name` visible.
    imported_names: Vec<(String, Rc<HirFile>, TypeId)>,
    /// `import pkg@M.m::types;` makes every top-level name visible.
    imported_files: Vec<Rc<HirFile>>,
    imported_packages: Vec<FqName>,
    dependencies: Vec<Rc<HirFile>>,
    warnings: Vec<Diagnostic>,
    enum_frames: Vec<EnumFrame>,
}

impl<'c, 'a> Resolver<'c, 'a> {
    fn new(
        context: &'c mut CompilationContext,
        fq_name: &FqName,
        path: &Path,
        file: &'a ast::File,
    ) -> Self {
        Resolver {
            context,
            fq_name: fq_name.clone(),
            package: fq_name.package_name(),
            path: path.to_path_buf(),
            file,
            scopes: ScopeArena::new(path),
            types: Vec::new(),
            type_decls: Vec::new(),
            type_states: Vec::new(),
            constants: Vec::new(),
            const_decls: Vec::new(),
            const_states: Vec::new(),
            imports: Vec::new(),
            imported_names: Vec::new(),
            imported_files: Vec::new(),
            imported_packages: Vec::new(),
            dependencies: Vec::new(),
            warnings: Vec::new(),
            enum_frames: Vec::new(),
        }
    }

    fn finish(self) -> HirFile {
        HirFile {
            fq_name: self.fq_name,
            path: self.path,
            scopes: self.scopes,
            types: self.types,
            constants: self.constants,
            imports: self.imports,
            dependencies: self.dependencies,
            warnings: self.warnings,
            hash: OnceCell::new(),
            hierarchy: OnceCell::new(),
        }
    }

    fn validation_error(&self, location: Location, message: String) -> CoreError {
        CoreError::TypeValidation {
            path: self.path.clone(),
            location,
            message,
        }
    }

    // -----------------------------------------------------------------
    // Declare step
    // -----------------------------------------------------------------

    fn declare(&mut self, decl: &'a ast::Decl, scope: ScopeId, outer: &FqName) -> Result<(), CoreError> {
        let fq_name = outer.nested(&decl.name);

        if let DeclKind::Const { .. } = decl.kind {
            let id = ConstId::new(self.constants.len());
            self.scopes
                .declare(scope, &decl.name, Entity::Constant(id), decl.location)?;
            self.constants.push(ConstantDecl {
                name: decl.name.clone(),
                fq_name,
                location: decl.location,
                doc: decl.doc.clone(),
                annotations: Vec::new(),
                ty: Type::Scalar(ScalarKind::Int32),
                value: ConstantExpression::integer(ScalarKind::Int32, 0),
                parent_scope: scope,
            });
            self.const_decls.push(decl);
            self.const_states.push(State::Pending);
            return Ok(());
        }

        if matches!(decl.kind, DeclKind::Interface { .. }) && scope != self.scopes.root() {
            return Err(self.validation_error(
                decl.location,
                format!("interface '{}' must be declared at file scope", decl.name),
            ));
        }

        let id = TypeId::new(self.types.len());
        self.scopes
            .declare(scope, &decl.name, Entity::Type(id), decl.location)?;

        // Placeholders until the resolve step; only the inner scope is real.
        let (kind, inner) = match &decl.kind {
            DeclKind::Interface { .. } => {
                let inner = self.scopes.push(&decl.name, scope, id);
                let interface = InterfaceType {
                    scope: inner,
                    parent: None,
                    methods: Vec::new(),
                };
                (NamedTypeKind::Interface(interface), Some(inner))
            }
            DeclKind::Compound { kind, .. } => {
                let inner = self.scopes.push(&decl.name, scope, id);
                let compound = CompoundType {
                    scope: inner,
                    fields: Vec::new(),
                };
                let kind = match kind {
                    CompoundKind::Struct => NamedTypeKind::Struct(compound),
                    CompoundKind::Union => NamedTypeKind::Union(compound),
                    CompoundKind::SafeUnion => NamedTypeKind::SafeUnion(compound),
                };
                (kind, Some(inner))
            }
            DeclKind::Enum { .. } => {
                let placeholder = EnumType {
                    storage: Type::Scalar(ScalarKind::Int32),
                    scalar: ScalarKind::Int32,
                    parent: None,
                    values: Vec::new(),
                };
                (NamedTypeKind::Enum(placeholder), None)
            }
            DeclKind::Typedef { .. } | DeclKind::Const { .. } => {
                (NamedTypeKind::Typedef(Type::Scalar(ScalarKind::Int32)), None)
            }
        };

        self.types.push(NamedType {
            name: decl.name.clone(),
            fq_name: fq_name.clone(),
            location: decl.location,
            doc: decl.doc.clone(),
            annotations: Vec::new(),
            parent_scope: scope,
            kind,
        });
        self.type_decls.push(decl);
        self.type_states.push(State::Pending);

        if let Some(inner) = inner {
            for member in decl.kind.members() {
                self.declare(member, inner, &fq_name)?;
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Imports and file dependencies
    // -----------------------------------------------------------------

    fn resolve_imports(&mut self) -> Result<(), CoreError> {
        let file = self.file;
        for import in &file.imports {
            let name = import.name.apply_defaults(&self.package);
            self.imports.push(name.clone());

            if name.is_package() {
                if name == self.package || self.imported_packages.contains(&name) {
                    continue;
                }
                let dir = self.context.roots().package_dir(&name);
                if !dir.as_ref().is_ok_and(|dir| dir.is_dir()) {
                    return Err(CoreError::UnresolvedName {
                        path: self.path.clone(),
                        location: import.location,
                        name: name.to_string(),
                        searched: dir.map(|d| d.display().to_string()).into_iter().collect(),
                    });
                }
                log::trace!("{}: imports package {name}", self.fq_name);
                self.imported_packages.push(name);
                continue;
            }

            if name.name() == "types" {
                let types = self.context.parse(&name, Enforce::None)?;
                self.add_dependency(&types);
                self.imported_files.push(types);
                continue;
            }

            let mut searched = Vec::new();
            match self.find_in_package(&name.package_name(), name.names(), &mut searched)? {
                Some(Found::External(file, Entity::Type(id))) => {
                    self.imported_names
                        .push((name.local_name().to_string(), file, id));
                }
                Some(Found::Local(Entity::Type(_))) => {}
                _ => {
                    return Err(CoreError::UnresolvedName {
                        path: self.path.clone(),
                        location: import.location,
                        name: name.to_string(),
                        searched,
                    });
                }
            }
        }
        Ok(())
    }

    fn add_dependency(&mut self, file: &Rc<HirFile>) {
        if !self.dependencies.iter().any(|dep| Rc::ptr_eq(dep, file)) {
            self.dependencies.push(Rc::clone(file));
        }
    }

    /// Looks `names` up in `Name.hal`, then `types.hal`, of `package`.
    fn find_in_package(
        &mut self,
        package: &FqName,
        names: &[String],
        searched: &mut Vec<String>,
    ) -> Result<Option<Found>, CoreError> {
        let Some(first) = names.first() else {
            return Ok(None);
        };
        let candidates = [package.with_name(first), package.types_for_package()];
        for candidate in candidates {
            if candidate == self.fq_name {
                searched.push(candidate.to_string());
                let root = self.scopes.root();
                let found = self
                    .scopes
                    .get(root)
                    .get(first)
                    .and_then(|entry| walk_members(&self.scopes, &self.types, entry.entity, &names[1..]));
                if let Some(entity) = found {
                    return Ok(Some(Found::Local(entity)));
                }
                continue;
            }
            if !self.context.file_exists(&candidate) {
                continue;
            }
            searched.push(candidate.to_string());
            let file = self.context.parse(&candidate, Enforce::None)?;
            if let Some(entity) = file.find_entity(names) {
                self.add_dependency(&file);
                return Ok(Some(Found::External(file, entity)));
            }
        }
        Ok(None)
    }

    // -----------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------

    fn try_lookup(
        &mut self,
        name: &FqName,
        scope: ScopeId,
        searched: &mut Vec<String>,
    ) -> Result<Option<Found>, CoreError> {
        let names = name.names();
        let Some((first, rest)) = names.split_first() else {
            return Ok(None);
        };
        log::trace!("{}: looking up {name}", self.fq_name);

        if name.has_package() || name.version().is_some() {
            let full = name.apply_defaults(&self.package);
            return self.find_in_package(&full.package_name(), names, searched);
        }

        let scope_path = self.scopes.path_of(scope);
        searched.push(if scope_path.is_empty() {
            format!("{} (file scope)", self.fq_name)
        } else {
            format!("{}::{}", self.package, scope_path.join("."))
        });
        if let Some((_, entry)) = self.scopes.lookup(scope, first) {
            if let Some(entity) = walk_members(&self.scopes, &self.types, entry.entity, rest) {
                return Ok(Some(Found::Local(entity)));
            }
        }

        for (local, file, id) in &self.imported_names {
            if local == first {
                if let Some(entity) = file.member(Entity::Type(*id), rest) {
                    return Ok(Some(Found::External(Rc::clone(file), entity)));
                }
            }
        }
        for file in &self.imported_files {
            if let Some(entity) = file.find_entity(names) {
                return Ok(Some(Found::External(Rc::clone(file), entity)));
            }
        }
        if !self.imported_names.is_empty() || !self.imported_files.is_empty() {
            searched.push("imported types".to_string());
        }

        let own = self.package.clone();
        if let Some(found) = self.find_in_package(&own, names, searched)? {
            return Ok(Some(found));
        }
        for package in self.imported_packages.clone() {
            if let Some(found) = self.find_in_package(&package, names, searched)? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    fn lookup_type_ref(
        &mut self,
        name: &FqName,
        scope: ScopeId,
        location: Location,
    ) -> Result<TypeRef, CoreError> {
        let mut searched = Vec::new();
        let found = self.try_lookup(name, scope, &mut searched)?;
        match found.and_then(|found| self.type_ref(found)) {
            Some(r) => Ok(r),
            None => Err(CoreError::UnresolvedName {
                path: self.path.clone(),
                location,
                name: name.to_string(),
                searched,
            }),
        }
    }

    fn type_ref(&self, found: Found) -> Option<TypeRef> {
        match found {
            Found::Local(Entity::Type(id)) => Some(TypeRef::local(
                self.types[id.index()].fq_name.clone(),
                id,
            )),
            Found::External(file, Entity::Type(id)) => Some(TypeRef {
                fq_name: file.named_type(id).fq_name.clone(),
                target: TypeTarget::External(file, id),
            }),
            Found::Local(Entity::Constant(_)) | Found::External(_, Entity::Constant(_)) => None,
        }
    }

    /// Value of a constant or enum value reference inside an expression.
    fn lookup_value(
        &mut self,
        name: &NameRef,
        scope: ScopeId,
        location: Location,
    ) -> Result<ConstantExpression, CoreError> {
        let unresolved = |resolver: &Self, searched: Vec<String>| CoreError::UnresolvedName {
            path: resolver.path.clone(),
            location,
            name: name.to_string(),
            searched,
        };

        if let Some(member) = &name.member {
            let r = self.lookup_type_ref(&name.path, scope, location)?;
            return match self.enum_value(&r, member)? {
                Some(value) => Ok(value),
                None => Err(unresolved(self, vec![r.fq_name.to_string()])),
            };
        }

        let path = &name.path;
        let names = path.names();
        if let [single] = names {
            if !path.has_package() && path.version().is_none() {
                if let Some(value) = self.frame_value(single)? {
                    return Ok(value);
                }
            }
        }

        let mut searched = Vec::new();
        match self.try_lookup(path, scope, &mut searched)? {
            Some(Found::Local(Entity::Constant(id))) => {
                self.resolve_const(id)?;
                return Ok(self.constants[id.index()].value.clone());
            }
            Some(Found::External(file, Entity::Constant(id))) => {
                return Ok(file.constant(id).value.clone());
            }
            Some(_) | None => {}
        }

        // `Enum.VALUE`
        if let Some((value, enum_names)) = names.split_last() {
            if !enum_names.is_empty() {
                let enum_path = FqName::new(
                    path.package_components().to_vec(),
                    path.version(),
                    enum_names.to_vec(),
                );
                let found = self.try_lookup(&enum_path, scope, &mut searched)?;
                if let Some(r) = found.and_then(|found| self.type_ref(found)) {
                    if let Some(value) = self.enum_value(&r, value)? {
                        return Ok(value);
                    }
                    searched.push(r.fq_name.to_string());
                }
            }
        }
        Err(unresolved(self, searched))
    }

    /// An unqualified name inside an enum body: one of the values declared
    /// so far, or an inherited value.
    fn frame_value(&mut self, name: &str) -> Result<Option<ConstantExpression>, CoreError> {
        let Some(frame) = self.enum_frames.last() else {
            return Ok(None);
        };
        if let Some(value) = frame.values.iter().find(|v| v.name == name) {
            return Ok(Some(value.value.clone()));
        }
        match frame.parent.clone() {
            Some(parent) => self.enum_value(&parent, name),
            None => Ok(None),
        }
    }

    /// Value `name` of the enum `r` or one of its ancestors. `Ok(None)`
    /// when there is no such value or `r` is not an enum.
    fn enum_value(&mut self, r: &TypeRef, name: &str) -> Result<Option<ConstantExpression>, CoreError> {
        match &r.target {
            TypeTarget::Local(id) => {
                let id = *id;
                if let Some(frame) = self.enum_frames.iter().rev().find(|f| f.id == id) {
                    if let Some(value) = frame.values.iter().find(|v| v.name == name) {
                        return Ok(Some(value.value.clone()));
                    }
                    return match frame.parent.clone() {
                        Some(parent) => self.enum_value(&parent, name),
                        None => Ok(None),
                    };
                }
                self.resolve_type(id)?;
                let next = match &self.types[id.index()].kind {
                    NamedTypeKind::Enum(e) => {
                        if let Some(value) = e.value(name) {
                            return Ok(Some(value.value.clone()));
                        }
                        e.parent.clone()
                    }
                    NamedTypeKind::Typedef(Type::Named(target)) => Some(target.clone()),
                    _ => None,
                };
                match next {
                    Some(next) => self.enum_value(&next, name),
                    None => Ok(None),
                }
            }
            TypeTarget::External(file, id) => Ok(external_enum_value(file, *id, name)),
        }
    }

    /// Every value of enum `r`, ancestors first.
    fn inherited_values(&mut self, r: &TypeRef) -> Result<Vec<EnumValue>, CoreError> {
        match &r.target {
            TypeTarget::Local(id) => {
                let id = *id;
                self.resolve_type(id)?;
                let Some(e) = self.types[id.index()].as_enum() else {
                    return Ok(Vec::new());
                };
                let (own, parent) = (e.values.clone(), e.parent.clone());
                let mut values = match parent {
                    Some(parent) => self.inherited_values(&parent)?,
                    None => Vec::new(),
                };
                values.extend(own);
                Ok(values)
            }
            TypeTarget::External(file, id) => Ok(external_enum_values(file, *id)),
        }
    }

    /// Replaces typedefs by their targets; the result's references are
    /// valid from this file.
    fn strip(&mut self, ty: &Type, location: Location) -> Result<Type, CoreError> {
        let mut current = ty.clone();
        let mut seen = BTreeSet::new();
        loop {
            let r = match current {
                Type::Named(ref r) => r.clone(),
                other => return Ok(other),
            };
            if !seen.insert(r.fq_name.clone()) {
                return Err(self.validation_error(
                    location,
                    format!("typedef '{}' refers to itself", r.fq_name),
                ));
            }
            let next = match &r.target {
                TypeTarget::Local(id) => {
                    self.resolve_type(*id)?;
                    match &self.types[id.index()].kind {
                        NamedTypeKind::Typedef(target) => target.clone(),
                        _ => return Ok(current),
                    }
                }
                TypeTarget::External(file, id) => match &file.named_type(*id).kind {
                    NamedTypeKind::Typedef(Type::Named(target)) => {
                        Type::Named(target.relative_to(file))
                    }
                    NamedTypeKind::Typedef(target) => target.clone(),
                    _ => return Ok(current),
                },
            };
            current = next;
        }
    }

    /// Underlying kind of an enum reference.
    fn enum_scalar(&mut self, r: &TypeRef) -> Result<Option<ScalarKind>, CoreError> {
        match &r.target {
            TypeTarget::Local(id) => {
                self.resolve_type(*id)?;
                Ok(self.types[id.index()].as_enum().map(|e| e.scalar))
            }
            TypeTarget::External(file, id) => Ok(file.named_type(*id).as_enum().map(|e| e.scalar)),
        }
    }

    // -----------------------------------------------------------------
    // Resolve step
    // -----------------------------------------------------------------

    fn evaluate(&mut self, expr: &ast::Expr, scope: ScopeId) -> Result<ConstantExpression, CoreError> {
        let mut env = Env {
            resolver: self,
            scope,
        };
        constant::evaluate(expr, &mut env)
    }

    fn warn_overflow(&mut self, what: &str, value: &ConstantExpression, location: Location) {
        if !value.overflowed() {
            return;
        }
        let message = format!(
            "{what} '{}' overflows its type; using truncated value {}",
            value.description(),
            value.value_string()
        );
        self.warnings.push(
            Diagnostic::warning(message, location)
                .with_code("W0001")
                .with_path(self.path.clone()),
        );
    }

    fn resolve_type(&mut self, id: TypeId) -> Result<(), CoreError> {
        let index = id.index();
        match self.type_states[index] {
            State::Done => return Ok(()),
            State::InProgress => {
                let named = &self.types[index];
                return Err(self.validation_error(
                    named.location,
                    format!("definition of '{}' depends on itself", named.name),
                ));
            }
            State::Pending => {}
        }
        self.type_states[index] = State::InProgress;

        let decl = self.type_decls[index];
        let scope = self.types[index].parent_scope;
        let inner = self.types[index].inner_scope().unwrap_or(scope);
        let annotations = self.resolve_annotations(&decl.annotations, scope)?;

        let kind = match &decl.kind {
            DeclKind::Enum { storage, values } => {
                NamedTypeKind::Enum(self.resolve_enum(id, storage, values, scope)?)
            }
            DeclKind::Typedef { target } => {
                NamedTypeKind::Typedef(self.resolve_type_expr(target, scope)?)
            }
            DeclKind::Compound { kind, fields, .. } => {
                let compound = CompoundType {
                    scope: inner,
                    fields: self.resolve_fields(fields, inner)?,
                };
                match kind {
                    CompoundKind::Struct => NamedTypeKind::Struct(compound),
                    CompoundKind::Union => NamedTypeKind::Union(compound),
                    CompoundKind::SafeUnion => NamedTypeKind::SafeUnion(compound),
                }
            }
            DeclKind::Interface {
                extends, methods, ..
            } => {
                let parent = match extends {
                    Some(extends) => Some(self.resolve_parent(id, decl, extends, scope)?),
                    None => None,
                };
                let mut resolved = Vec::with_capacity(methods.len());
                for method in methods {
                    resolved.push(Method {
                        name: method.name.clone(),
                        location: method.location,
                        doc: method.doc.clone(),
                        annotations: self.resolve_annotations(&method.annotations, inner)?,
                        oneway: method.oneway,
                        args: self.resolve_fields(&method.args, inner)?,
                        results: match &method.results {
                            Some(results) => self.resolve_fields(results, inner)?,
                            None => Vec::new(),
                        },
                    });
                }
                NamedTypeKind::Interface(InterfaceType {
                    scope: inner,
                    parent,
                    methods: resolved,
                })
            }
            DeclKind::Const { .. } => self.types[index].kind.clone(),
        };

        let named = &mut self.types[index];
        named.kind = kind;
        named.annotations = annotations;
        self.type_states[index] = State::Done;
        Ok(())
    }

    fn resolve_parent(
        &mut self,
        id: TypeId,
        decl: &ast::Decl,
        extends: &ast::TypeName,
        scope: ScopeId,
    ) -> Result<TypeRef, CoreError> {
        let parent = match self.lookup_type_ref(&extends.name, scope, extends.location) {
            Ok(parent) => parent,
            Err(
                CoreError::UnresolvedName { .. }
                | CoreError::FileNotFound { .. }
                | CoreError::MissingPackageRoot(_),
            ) => {
                return Err(CoreError::UnresolvedParent {
                    path: self.path.clone(),
                    location: extends.location,
                    interface: decl.name.clone(),
                    parent: extends.name.apply_defaults(&self.package).to_string(),
                });
            }
            Err(err) => return Err(err),
        };

        let is_interface = match &parent.target {
            TypeTarget::Local(parent_id) if *parent_id == id => {
                return Err(self.validation_error(
                    extends.location,
                    format!("interface '{}' cannot extend itself", decl.name),
                ));
            }
            TypeTarget::Local(parent_id) => self.types[parent_id.index()].is_interface(),
            TypeTarget::External(file, parent_id) => file.named_type(*parent_id).is_interface(),
        };
        if !is_interface {
            return Err(self.validation_error(
                extends.location,
                format!(
                    "interface '{}' extends '{}', which is not an interface",
                    decl.name, parent.fq_name
                ),
            ));
        }
        Ok(parent)
    }

    fn resolve_enum(
        &mut self,
        id: TypeId,
        storage: &ast::TypeExpr,
        values: &[ast::EnumValue],
        scope: ScopeId,
    ) -> Result<EnumType, CoreError> {
        let storage_ty = self.resolve_type_expr(storage, scope)?;
        let (scalar, parent) = match self.strip(&storage_ty, storage.location)? {
            Type::Scalar(kind) if kind.is_integral() => (kind, None),
            Type::Named(r) => match self.enum_scalar(&r)? {
                Some(kind) => (kind, Some(r)),
                None => {
                    return Err(self.validation_error(
                        storage.location,
                        format!("invalid enum storage type '{}'", storage_ty.describe()),
                    ));
                }
            },
            other => {
                return Err(self.validation_error(
                    storage.location,
                    format!("invalid enum storage type '{}'", other.describe()),
                ));
            }
        };

        let inherited = match &parent {
            Some(parent) => self.inherited_values(parent)?,
            None => Vec::new(),
        };

        self.enum_frames.push(EnumFrame {
            id,
            values: Vec::new(),
            parent: parent.clone(),
        });
        let resolved = self.resolve_enum_values(scalar, &inherited, values, scope);
        let frame = self.enum_frames.pop();
        resolved?;

        Ok(EnumType {
            storage: storage_ty,
            scalar,
            parent,
            values: frame.map(|frame| frame.values).unwrap_or_default(),
        })
    }

    /// Evaluates the values into the innermost enum frame.
    fn resolve_enum_values(
        &mut self,
        scalar: ScalarKind,
        inherited: &[EnumValue],
        values: &[ast::EnumValue],
        scope: ScopeId,
    ) -> Result<(), CoreError> {
        let (min, max) = scalar.integer_range().unwrap_or((0, 0));
        let mut next = inherited
            .last()
            .and_then(|v| v.value.as_i128())
            .map_or(0, |v| v + 1);

        for value in values {
            let previous = self
                .enum_frames
                .last()
                .into_iter()
                .flat_map(|frame| frame.values.iter())
                .chain(inherited)
                .find(|v| v.name == value.name)
                .map(|v| v.location);
            if let Some(previous) = previous {
                return Err(CoreError::DuplicateDeclaration {
                    path: self.path.clone(),
                    location: value.location,
                    name: value.name.clone(),
                    previous,
                });
            }

            let (resolved, explicit) = match &value.value {
                Some(expr) => {
                    let evaluated = self.evaluate(expr, scope)?;
                    let number = match evaluated.as_i128() {
                        Some(number) if evaluated.kind().is_integral() => number,
                        _ => {
                            return Err(CoreError::ConstantEvaluation {
                                path: self.path.clone(),
                                location: expr.location,
                                expression: expr.to_string(),
                                message: format!(
                                    "enum values must be integral, found {}",
                                    evaluated.kind()
                                ),
                            });
                        }
                    };
                    if number < min || number > max {
                        return Err(self.validation_error(
                            value.location,
                            format!(
                                "value {} = {number} does not fit in {scalar}",
                                value.name
                            ),
                        ));
                    }
                    let stored = evaluated.cast(scalar);
                    self.warn_overflow("enum value", &stored, expr.location);
                    (stored, true)
                }
                None => {
                    if next > max {
                        return Err(self.validation_error(
                            value.location,
                            format!("value {} = {next} does not fit in {scalar}", value.name),
                        ));
                    }
                    (ConstantExpression::integer(scalar, next), false)
                }
            };

            next = resolved.as_i128().map_or(next, |v| v + 1);
            if let Some(frame) = self.enum_frames.last_mut() {
                frame.values.push(EnumValue {
                    name: value.name.clone(),
                    location: value.location,
                    doc: value.doc.clone(),
                    value: resolved,
                    explicit,
                });
            }
        }
        Ok(())
    }

    fn resolve_fields(&mut self, fields: &[ast::Field], scope: ScopeId) -> Result<Vec<Field>, CoreError> {
        let mut resolved = Vec::with_capacity(fields.len());
        for field in fields {
            resolved.push(Field {
                name: field.name.clone(),
                ty: self.resolve_type_expr(&field.ty, scope)?,
                location: field.location,
                doc: field.doc.clone(),
                annotations: self.resolve_annotations(&field.annotations, scope)?,
            });
        }
        Ok(resolved)
    }

    fn resolve_type_expr(&mut self, ty: &ast::TypeExpr, scope: ScopeId) -> Result<Type, CoreError> {
        let resolved = match &ty.kind {
            TypeExprKind::Builtin(builtin) => match builtin {
                BuiltinKind::Scalar(kind) => Type::Scalar(*kind),
                BuiltinKind::String => Type::String,
                BuiltinKind::Handle => Type::Handle,
                BuiltinKind::Memory => Type::Memory,
                BuiltinKind::Pointer => Type::Pointer,
                BuiltinKind::Vector | BuiltinKind::Fmq(_) => {
                    return Err(self.validation_error(
                        ty.location,
                        "generic type used without an element type".to_string(),
                    ));
                }
            },
            TypeExprKind::Generic { builtin, argument } => {
                let element = Box::new(self.resolve_type_expr(argument, scope)?);
                match builtin {
                    BuiltinKind::Vector => Type::Vector(element),
                    BuiltinKind::Fmq(flavor) => Type::Fmq {
                        flavor: *flavor,
                        element,
                    },
                    _ => {
                        return Err(self.validation_error(
                            ty.location,
                            "type does not take an element type".to_string(),
                        ));
                    }
                }
            }
            TypeExprKind::Named(name) => Type::Named(self.lookup_type_ref(name, scope, ty.location)?),
            TypeExprKind::Array { element, size } => {
                let element = Box::new(self.resolve_type_expr(element, scope)?);
                let value = self.evaluate(size, scope)?;
                let valid = value.kind().is_integral()
                    && value.as_i128().is_some_and(|n| n > 0 && n <= i128::from(u32::MAX));
                if !valid {
                    return Err(self.validation_error(
                        size.location,
                        format!(
                            "array size must be a positive integer, found '{}' = {}",
                            size,
                            value.value_string()
                        ),
                    ));
                }
                self.warn_overflow("array size", &value, size.location);
                Type::Array {
                    element,
                    size: value,
                }
            }
        };
        Ok(resolved)
    }

    fn resolve_annotations(
        &mut self,
        annotations: &[ast::Annotation],
        scope: ScopeId,
    ) -> Result<Vec<hir::Annotation>, CoreError> {
        let mut resolved = Vec::with_capacity(annotations.len());
        for annotation in annotations {
            let mut params = Vec::with_capacity(annotation.params.len());
            for param in &annotation.params {
                let mut values = Vec::with_capacity(param.values.len());
                for value in &param.values {
                    values.push(match value {
                        ast::AnnotationValue::String(s) => hir::AnnotationValue::String(s.clone()),
                        ast::AnnotationValue::Expr(expr) => {
                            hir::AnnotationValue::Constant(self.evaluate(expr, scope)?)
                        }
                    });
                }
                params.push(hir::AnnotationParam {
                    name: param.name.clone(),
                    values,
                });
            }
            resolved.push(hir::Annotation {
                name: annotation.name.clone(),
                location: annotation.location,
                params,
            });
        }
        Ok(resolved)
    }

    fn resolve_const(&mut self, id: ConstId) -> Result<(), CoreError> {
        let index = id.index();
        let decl = self.const_decls[index];
        let DeclKind::Const { ty, value } = &decl.kind else {
            return Ok(());
        };
        match self.const_states[index] {
            State::Done => return Ok(()),
            State::InProgress => {
                return Err(CoreError::ConstantEvaluation {
                    path: self.path.clone(),
                    location: value.location,
                    expression: value.to_string(),
                    message: format!("constant '{}' is defined in terms of itself", decl.name),
                });
            }
            State::Pending => {}
        }
        self.const_states[index] = State::InProgress;

        let scope = self.constants[index].parent_scope;
        let annotations = self.resolve_annotations(&decl.annotations, scope)?;
        let declared = self.resolve_type_expr(ty, scope)?;
        let kind = match self.strip(&declared, ty.location)? {
            Type::Scalar(kind) => Some(kind),
            Type::Named(r) => self.enum_scalar(&r)?,
            _ => None,
        };
        let Some(kind) = kind else {
            return Err(self.validation_error(
                ty.location,
                format!(
                    "constant '{}' must have a scalar or enum type, found '{}'",
                    decl.name,
                    declared.describe()
                ),
            ));
        };

        let evaluated = self.evaluate(value, scope)?;
        let stored = evaluated
            .assign_to(kind)
            .map_err(|message| CoreError::ConstantEvaluation {
                path: self.path.clone(),
                location: value.location,
                expression: value.to_string(),
                message,
            })?;
        self.warn_overflow(&format!("constant {}", decl.name), &stored, value.location);

        let constant = &mut self.constants[index];
        constant.annotations = annotations;
        constant.ty = declared;
        constant.value = stored;
        self.const_states[index] = State::Done;
        Ok(())
    }
}

/// Evaluation environment for one scope.
struct Env<'r, 'c, 'a> {
    resolver: &'r mut Resolver<'c, 'a>,
    scope: ScopeId,
}

impl ConstEnv for Env<'_, '_, '_> {
    fn lookup(&mut self, name: &NameRef, location: Location) -> Result<ConstantExpression, CoreError> {
        self.resolver.lookup_value(name, self.scope, location)
    }

    fn path(&self) -> &Path {
        &self.resolver.path
    }
}

fn external_enum_value(file: &Rc<HirFile>, id: TypeId, name: &str) -> Option<ConstantExpression> {
    match &file.named_type(id).kind {
        NamedTypeKind::Enum(e) => match e.value(name) {
            Some(value) => Some(value.value.clone()),
            None => {
                let parent = e.parent.as_ref()?.relative_to(file);
                let TypeTarget::External(owner, parent_id) = &parent.target else {
                    return None;
                };
                external_enum_value(owner, *parent_id, name)
            }
        },
        NamedTypeKind::Typedef(Type::Named(target)) => {
            let target = target.relative_to(file);
            let TypeTarget::External(owner, target_id) = &target.target else {
                return None;
            };
            external_enum_value(owner, *target_id, name)
        }
        _ => None,
    }
}

fn external_enum_values(file: &Rc<HirFile>, id: TypeId) -> Vec<EnumValue> {
    let Some(e) = file.named_type(id).as_enum() else {
        return Vec::new();
    };
    let mut values = match e.parent.as_ref().map(|parent| parent.relative_to(file)) {
        Some(TypeRef {
            target: TypeTarget::External(owner, parent_id),
            ..
        }) => external_enum_values(&owner, parent_id),
        _ => Vec::new(),
    };
    values.extend(e.values.iter().cloned());
    values
}

#[cfg(test)]
mod tests {
    use crate::constant::ConstValue;
    use crate::error::CoreError;
    use crate::scope::Entity;
    use crate::testing::{Package, context_with};
    use crate::types::NamedTypeKind;

    fn types_only(source: &str) -> Result<std::rc::Rc<crate::hir::HirFile>, CoreError> {
        let (_dir, mut context) = context_with(&[Package::new("test@1.0", &[("types", source)])]);
        context.parse_str("test@1.0::types")
    }

    fn constant_value(file: &crate::hir::HirFile, name: &str) -> ConstValue {
        match file.find_entity(&[name.to_string()]) {
            Some(Entity::Constant(id)) => file.constant(id).value.value(),
            other => panic!("{name} is not a constant: {other:?}"),
        }
    }

    #[test]
    fn auto_increments_enum_values() {
        let file = types_only(
            "package test@1.0;\n\
             enum Color : int32_t { RED, GREEN, BLUE = 10, CYAN };\n\
             const int32_t G = Color.GREEN;\n\
             const int32_t C = Color:CYAN;\n",
        )
        .expect("parse");
        assert_eq!(constant_value(&file, "G"), ConstValue::Int(1));
        assert_eq!(constant_value(&file, "C"), ConstValue::Int(11));
        let color = file.named_type(file.find_type(&["Color".to_string()]).expect("Color"));
        let e = color.as_enum().expect("enum");
        assert!(!e.values[0].explicit);
        assert!(e.values[2].explicit);
    }

    #[test]
    fn enum_values_see_earlier_and_inherited_values() {
        let file = types_only(
            "package test@1.0;\n\
             enum Base : uint8_t { A = 4, B };\n\
             enum Derived : Base { C, D = B + C, E = Derived.C };\n\
             const uint8_t LAST = Derived.E;\n\
             const uint8_t FROM_PARENT = Derived.A;\n",
        )
        .expect("parse");
        assert_eq!(constant_value(&file, "LAST"), ConstValue::Uint(6));
        assert_eq!(constant_value(&file, "FROM_PARENT"), ConstValue::Uint(4));
        let derived = file.named_type(file.find_type(&["Derived".to_string()]).expect("Derived"));
        let values: Vec<_> = derived
            .as_enum()
            .expect("enum")
            .values
            .iter()
            .map(|v| v.value.value())
            .collect();
        assert_eq!(values, vec![ConstValue::Uint(6), ConstValue::Uint(11), ConstValue::Uint(6)]);
    }

    #[test]
    fn constants_resolve_out_of_order() {
        let file = types_only(
            "package test@1.0;\n\
             const int32_t A = B * 2;\n\
             const int32_t B = 21;\n",
        )
        .expect("parse");
        assert_eq!(constant_value(&file, "A"), ConstValue::Int(42));
    }

    #[test]
    fn self_referencing_constant_is_rejected() {
        let err = types_only("package test@1.0;\nconst int32_t A = A + 1;\n").unwrap_err();
        assert_eq!(err.kind(), "ConstantEvaluationError");
    }

    #[test]
    fn untaken_branch_names_must_resolve() {
        let err = types_only("package test@1.0;\nconst int32_t A = 0 ? MISSING : 1;\n").unwrap_err();
        assert_eq!(err.kind(), "UnresolvedNameError");

        let err = types_only(
            "package test@1.0;\n\
             const int32_t A = 0 ? B : 1;\n\
             const int32_t B = MISSING;\n",
        )
        .unwrap_err();
        assert_eq!(err.kind(), "UnresolvedNameError", "{err}");

        let file = types_only(
            "package test@1.0;\n\
             const int32_t A = 0 ? B / 0 : 7;\n\
             const int32_t B = 3;\n",
        )
        .expect("parse");
        assert_eq!(constant_value(&file, "A"), ConstValue::Int(7));
    }

    #[test]
    fn untaken_branch_reports_broken_imports() {
        let (_dir, mut context) = context_with(&[
            Package::new(
                "test@1.0",
                &[("types", "package test@1.0;\nconst int32_t A = 0 ? other@1.0::X : 1;\n")],
            ),
            Package::new("other@1.0", &[("types", "package other@1.0;\nconst int32_t X = 1 +;\n")]),
        ]);
        let err = context.parse_str("test@1.0::types").unwrap_err();
        assert_eq!(err.kind(), "SyntaxError", "{err}");
    }

    #[test]
    fn rejects_enum_value_out_of_range() {
        let err = types_only("package test@1.0;\nenum Small : uint8_t { BIG = 256 };\n").unwrap_err();
        assert_eq!(err.kind(), "TypeValidationError");
        let err = types_only("package test@1.0;\nenum Small : int8_t { A = 127, B };\n").unwrap_err();
        assert!(err.to_string().contains("does not fit"), "{err}");
    }

    #[test]
    fn rejects_duplicate_enum_values_including_inherited() {
        let err = types_only("package test@1.0;\nenum E : int32_t { A, A };\n").unwrap_err();
        assert_eq!(err.kind(), "DuplicateDeclarationError");
        let err = types_only(
            "package test@1.0;\nenum P : int32_t { A };\nenum C : P { A };\n",
        )
        .unwrap_err();
        assert_eq!(err.kind(), "DuplicateDeclarationError");
    }

    #[test]
    fn rejects_invalid_enum_storage() {
        let err = types_only("package test@1.0;\nenum E : float { A };\n").unwrap_err();
        assert_eq!(err.kind(), "TypeValidationError");
        let err = types_only("package test@1.0;\nstruct S { int32_t x; };\nenum E : S { A };\n")
            .unwrap_err();
        assert_eq!(err.kind(), "TypeValidationError");
    }

    #[test]
    fn enum_storage_through_typedef() {
        let file = types_only(
            "package test@1.0;\ntypedef uint16_t Storage;\nenum E : Storage { A = 65535 };\n",
        )
        .expect("parse");
        let e = file.named_type(file.find_type(&["E".to_string()]).expect("E"));
        assert_eq!(e.as_enum().map(|e| e.scalar), Some(crate::types::ScalarKind::Uint16));
    }

    #[test]
    fn overflow_becomes_a_warning() {
        let file = types_only(
            "package test@1.0;\n\
             const int8_t SMALL = 200;\n\
             const int32_t WRAP = 2147483647 + 1;\n\
             const uint8_t CAST = (uint8_t)300;\n",
        )
        .expect("parse");
        assert_eq!(constant_value(&file, "SMALL"), ConstValue::Int(-56));
        assert_eq!(constant_value(&file, "WRAP"), ConstValue::Int(i64::from(i32::MIN)));
        assert_eq!(constant_value(&file, "CAST"), ConstValue::Uint(44));
        assert_eq!(file.warnings().len(), 2);
        assert!(file.warnings().iter().all(|w| !w.is_error()));
        assert!(file.warnings()[0].to_string().contains("truncated value -56"));
    }

    #[test]
    fn nested_types_visible_unqualified_and_qualified() {
        let (_dir, mut context) = context_with(&[Package::new(
            "test@1.0",
            &[
                (
                    "IFoo",
                    "package test@1.0;\n\
                     interface IFoo {\n\
                         enum Mode : uint8_t { SLOW, FAST };\n\
                         struct Config { Mode mode; };\n\
                         set(Config config, IFoo.Mode mode);\n\
                     };\n",
                ),
                (
                    "IBar",
                    "package test@1.0;\n\
                     interface IBar {\n\
                         get() generates (IFoo.Config config);\n\
                         const uint8_t FAST = IFoo.Mode.FAST;\n\
                     };\n",
                ),
            ],
        )]);
        let bar = context.parse_str("test@1.0::IBar").expect("parse");
        let interface = bar.interface().expect("interface");
        let NamedTypeKind::Interface(i) = &interface.kind else {
            panic!("not an interface");
        };
        let result = &i.methods[0].results[0].ty;
        assert_eq!(result.describe(), "test@1.0::IFoo.Config");
        let fast = bar.find_entity(&["IBar".to_string(), "FAST".to_string()]);
        let Some(Entity::Constant(id)) = fast else {
            panic!("FAST missing");
        };
        assert_eq!(bar.constant(id).value.value(), ConstValue::Uint(1));
        assert_eq!(bar.dependencies().len(), 1);
    }

    #[test]
    fn unresolved_names_list_searched_places() {
        let err = types_only("package test@1.0;\nstruct S { Missing m; };\n").unwrap_err();
        match err {
            CoreError::UnresolvedName { name, searched, location, .. } => {
                assert_eq!(name, "Missing");
                assert_eq!(location.line, 2);
                assert!(searched.iter().any(|s| s.contains("test@1.0::types")), "{searched:?}");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn imports_make_names_visible() {
        let (_dir, mut context) = context_with(&[
            Package::new(
                "other@2.0",
                &[("types", "package other@2.0;\nenum Level : int32_t { LOW, HIGH };\n")],
            ),
            Package::new(
                "test@1.0",
                &[
                    (
                        "types",
                        "package test@1.0;\n\
                         import other@2.0::Level;\n\
                         struct S { Level level; };\n\
                         const int32_t H = Level.HIGH;\n",
                    ),
                    (
                        "IPkg",
                        "package test@1.0;\n\
                         import other@2.0;\n\
                         interface IPkg { set(Level level); };\n",
                    ),
                ],
            ),
        ]);
        let types = context.parse_str("test@1.0::types").expect("parse");
        assert_eq!(constant_value(&types, "H"), ConstValue::Int(1));
        let pkg = context.parse_str("test@1.0::IPkg").expect("parse");
        let names: Vec<String> = pkg.imported_names().iter().map(ToString::to_string).collect();
        assert_eq!(names, vec!["other@2.0::Level"]);
    }

    #[test]
    fn missing_import_is_unresolved() {
        let err = types_only("package test@1.0;\nimport test@1.0::Nope;\n").unwrap_err();
        assert_eq!(err.kind(), "UnresolvedNameError");
    }

    #[test]
    fn interface_file_structure_is_enforced() {
        let (_dir, mut context) = context_with(&[Package::new(
            "test@1.0",
            &[
                ("IWrong", "package test@1.0;\ninterface IRight {};\n"),
                ("IExtra", "package test@1.0;\ninterface IExtra {};\nstruct S {};\n"),
                ("types", "package test@1.0;\ninterface INo {};\n"),
                ("IMoved", "package other@1.0;\ninterface IMoved {};\n"),
            ],
        )]);
        for name in ["test@1.0::IWrong", "test@1.0::IExtra", "test@1.0::types"] {
            let err = context.parse_str(name).unwrap_err();
            assert_eq!(err.kind(), "TypeValidationError", "{name}: {err}");
        }
        let err = context.parse_str("test@1.0::IMoved").unwrap_err();
        assert!(matches!(err, CoreError::PackageMismatch { .. }), "{err:?}");
    }

    #[test]
    fn extending_a_non_interface_is_rejected() {
        let (_dir, mut context) = context_with(&[Package::new(
            "test@1.0",
            &[
                ("types", "package test@1.0;\nstruct S {};\n"),
                ("IFoo", "package test@1.0;\ninterface IFoo extends S {};\n"),
                ("ISelf", "package test@1.0;\ninterface ISelf extends ISelf {};\n"),
            ],
        )]);
        let err = context.parse_str("test@1.0::IFoo").unwrap_err();
        assert!(err.to_string().contains("not an interface"), "{err}");
        let err = context.parse_str("test@1.0::ISelf").unwrap_err();
        assert!(err.to_string().contains("cannot extend itself"), "{err}");
    }

    #[test]
    fn array_sizes_must_be_positive() {
        let err = types_only("package test@1.0;\nstruct S { int32_t[0] none; };\n").unwrap_err();
        assert_eq!(err.kind(), "TypeValidationError");
        let file = types_only(
            "package test@1.0;\nconst uint32_t N = 4;\nstruct S { int32_t[N][2] grid; };\n",
        )
        .expect("parse");
        let s = file.named_type(file.find_type(&["S".to_string()]).expect("S"));
        let NamedTypeKind::Struct(c) = &s.kind else {
            panic!("not a struct");
        };
        assert_eq!(c.fields[0].ty.array_len(), Some(4));
        assert_eq!(file.layout(&c.fields[0].ty).size, 32);
    }
}
