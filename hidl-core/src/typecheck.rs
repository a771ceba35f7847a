//! Per-declaration legality checks on a resolved file.
//!
//! Name resolution guarantees that every reference points somewhere and
//! every constant has a value; this pass checks the rules that depend on
//! what the references point to. The first violation aborts the file.

use std::collections::{BTreeSet, HashMap};

use crate::error::CoreError;
use crate::hir::{Annotation, HirFile};
use crate::scope::TypeId;
use crate::span::Location;
use crate::types::{Field, InterfaceType, NamedType, NamedTypeKind, Type, TypeTarget};

/// Keys accepted by `@export`.
const EXPORT_KEYS: [&str; 3] = ["name", "value_prefix", "value_suffix"];

/// Validates a freshly resolved file.
pub(crate) fn validate(file: &HirFile) -> Result<(), CoreError> {
    let checker = TypeChecker { file };
    // Typedef cycles first; the other checks strip typedefs.
    for (index, named) in file.types().iter().enumerate() {
        if named.is_typedef() {
            checker.check_typedef_chain(TypeId::new(index))?;
        }
    }
    for (index, named) in file.types().iter().enumerate() {
        checker.check_named(TypeId::new(index), named)?;
    }
    for constant in file.constants() {
        checker.check_export(&constant.annotations, true)?;
    }
    Ok(())
}

struct TypeChecker<'a> {
    file: &'a HirFile,
}

impl TypeChecker<'_> {
    fn error(&self, location: Location, message: String) -> CoreError {
        CoreError::TypeValidation {
            path: self.file.path().to_path_buf(),
            location,
            message,
        }
    }

    fn check_typedef_chain(&self, start: TypeId) -> Result<(), CoreError> {
        let mut seen = BTreeSet::new();
        let mut current = start;
        loop {
            if !seen.insert(current) {
                let named = self.file.named_type(start);
                return Err(self.error(
                    named.location,
                    format!("typedef '{}' refers to itself", named.name),
                ));
            }
            match &self.file.named_type(current).kind {
                NamedTypeKind::Typedef(Type::Named(r)) => match r.target {
                    TypeTarget::Local(next) => current = next,
                    // Other files are complete and were checked already.
                    TypeTarget::External(..) => return Ok(()),
                },
                _ => return Ok(()),
            }
        }
    }

    fn check_named(&self, id: TypeId, named: &NamedType) -> Result<(), CoreError> {
        self.check_export(&named.annotations, matches!(named.kind, NamedTypeKind::Enum(_)))?;
        match &named.kind {
            NamedTypeKind::Struct(c) | NamedTypeKind::SafeUnion(c) => {
                self.check_unique_fields(&c.fields)?;
                self.check_fields(&c.fields)?;
                self.check_recursion(id, named)
            }
            NamedTypeKind::Union(c) => {
                self.check_unique_fields(&c.fields)?;
                self.check_fields(&c.fields)?;
                for field in &c.fields {
                    if !self.is_plain_data(self.file, &field.ty) {
                        return Err(self.error(
                            field.location,
                            format!(
                                "union member '{}' of type '{}' is not plain data; use a safe_union",
                                field.name,
                                field.ty.describe()
                            ),
                        ));
                    }
                }
                self.check_recursion(id, named)
            }
            NamedTypeKind::Interface(i) => self.check_interface(named, i),
            NamedTypeKind::Typedef(target) => self.check_type(target, named.location),
            NamedTypeKind::Enum(_) => Ok(()),
        }
    }

    fn check_export(&self, annotations: &[Annotation], allowed: bool) -> Result<(), CoreError> {
        let Some(export) = annotations.iter().find(|a| a.name == "export") else {
            return Ok(());
        };
        if !allowed {
            return Err(self.error(
                export.location,
                "@export is only allowed on enums and constants".to_string(),
            ));
        }
        for param in &export.params {
            if !EXPORT_KEYS.contains(&param.name.as_str()) {
                return Err(self.error(
                    export.location,
                    format!(
                        "unknown @export argument '{}' (expected one of {})",
                        param.name,
                        EXPORT_KEYS.join(", ")
                    ),
                ));
            }
        }
        Ok(())
    }

    fn check_unique_fields(&self, fields: &[Field]) -> Result<(), CoreError> {
        let mut seen: HashMap<&str, Location> = HashMap::new();
        for field in fields {
            if let Some(previous) = seen.insert(&field.name, field.location) {
                return Err(CoreError::DuplicateDeclaration {
                    path: self.file.path().to_path_buf(),
                    location: field.location,
                    name: field.name.clone(),
                    previous,
                });
            }
        }
        Ok(())
    }

    fn check_fields(&self, fields: &[Field]) -> Result<(), CoreError> {
        for field in fields {
            self.check_type(&field.ty, field.location)?;
        }
        Ok(())
    }

    /// Rules on the structural type itself: queue elements.
    fn check_type(&self, ty: &Type, location: Location) -> Result<(), CoreError> {
        match ty {
            Type::Array { element, .. } | Type::Vector(element) => self.check_type(element, location),
            Type::Fmq { flavor, element } => {
                if !self.is_plain_data(self.file, element) {
                    return Err(self.error(
                        location,
                        format!(
                            "{} element type '{}' must be fixed-size plain data",
                            flavor.name(),
                            element.describe()
                        ),
                    ));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn check_interface(&self, named: &NamedType, interface: &InterfaceType) -> Result<(), CoreError> {
        let mut inherited = BTreeSet::new();
        if let Some(parent) = &interface.parent {
            let (owner, parent) = self.file.resolve(parent);
            collect_method_names(owner, parent, &mut inherited);
        }

        let mut seen: HashMap<&str, Location> = HashMap::new();
        for method in &interface.methods {
            if inherited.contains(&method.name) {
                return Err(self.error(
                    method.location,
                    format!(
                        "method '{}' of '{}' is already defined by a parent interface",
                        method.name, named.name
                    ),
                ));
            }
            if let Some(previous) = seen.insert(&method.name, method.location) {
                return Err(CoreError::DuplicateDeclaration {
                    path: self.file.path().to_path_buf(),
                    location: method.location,
                    name: method.name.clone(),
                    previous,
                });
            }
            if method.oneway && !method.results.is_empty() {
                return Err(self.error(
                    method.location,
                    format!("oneway method '{}' cannot return results", method.name),
                ));
            }
            let params: Vec<Field> = method.args.iter().chain(&method.results).cloned().collect();
            self.check_unique_fields(&params)?;
            self.check_fields(&params)?;
            if let Some(export) = method.annotations.iter().find(|a| a.name == "export") {
                return Err(self.error(
                    export.location,
                    "@export is only allowed on enums and constants".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// A compound type may not contain itself by value.
    fn check_recursion(&self, id: TypeId, named: &NamedType) -> Result<(), CoreError> {
        let mut path = Vec::new();
        if self.contains_by_value(id, named, &mut path) {
            let chain: Vec<String> = path
                .iter()
                .map(|&step: &TypeId| self.file.named_type(step).name.clone())
                .collect();
            return Err(self.error(
                named.location,
                format!(
                    "'{}' contains itself without indirection ({} -> {})",
                    named.name,
                    named.name,
                    chain.join(" -> ")
                ),
            ));
        }
        Ok(())
    }

    /// Whether `named` reaches `target` through by-value fields. Only
    /// local declarations can reach back into this file.
    fn contains_by_value(&self, target: TypeId, named: &NamedType, path: &mut Vec<TypeId>) -> bool {
        let fields = match &named.kind {
            NamedTypeKind::Struct(c) | NamedTypeKind::Union(c) | NamedTypeKind::SafeUnion(c) => &c.fields,
            _ => return false,
        };
        fields
            .iter()
            .any(|field| self.type_reaches(target, &field.ty, path))
    }

    fn type_reaches(&self, target: TypeId, ty: &Type, path: &mut Vec<TypeId>) -> bool {
        match ty {
            Type::Array { element, .. } => self.type_reaches(target, element, path),
            Type::Named(r) => {
                let TypeTarget::Local(id) = r.target else {
                    return false;
                };
                if path.contains(&id) {
                    return false;
                }
                path.push(id);
                let named = self.file.named_type(id);
                let found = id == target
                    || match &named.kind {
                        NamedTypeKind::Typedef(inner) => self.type_reaches(target, inner, path),
                        _ => self.contains_by_value(target, named, path),
                    };
                if !found {
                    path.pop();
                }
                found
            }
            // vec, pointer and the rest are indirections or leaves.
            _ => false,
        }
    }

    /// Fixed-size data without ownership: no strings, vectors, handles,
    /// memory, pointers, interfaces or queues anywhere inside.
    fn is_plain_data(&self, file: &HirFile, ty: &Type) -> bool {
        let (file, ty) = file.strip_typedefs(ty);
        match ty {
            Type::Scalar(_) => true,
            Type::Array { element, .. } => self.is_plain_data(file, element),
            Type::Named(r) => {
                let (owner, named) = file.resolve(r);
                match &named.kind {
                    NamedTypeKind::Enum(_) => true,
                    NamedTypeKind::Struct(c) | NamedTypeKind::Union(c) | NamedTypeKind::SafeUnion(c) => {
                        c.fields.iter().all(|field| self.is_plain_data(owner, &field.ty))
                    }
                    NamedTypeKind::Interface(_) | NamedTypeKind::Typedef(_) => false,
                }
            }
            Type::String
            | Type::Handle
            | Type::Memory
            | Type::Pointer
            | Type::Vector(_)
            | Type::Fmq { .. } => false,
        }
    }
}

fn collect_method_names(owner: &HirFile, named: &NamedType, out: &mut BTreeSet<String>) {
    let Some(interface) = named.as_interface() else {
        return;
    };
    out.extend(interface.methods.iter().map(|m| m.name.clone()));
    if let Some(parent) = &interface.parent {
        let (grand_owner, parent) = owner.resolve(parent);
        collect_method_names(grand_owner, parent, out);
    }
}

#[cfg(test)]
mod tests {
    use crate::error::CoreError;
    use crate::testing::{Package, context_with};

    fn check(source: &str) -> Result<(), CoreError> {
        let (_dir, mut context) = context_with(&[Package::new("test@1.0", &[("types", source)])]);
        context.parse_str("test@1.0::types").map(|_| ())
    }

    fn check_interface(files: &[(&str, &str)], name: &str) -> Result<(), CoreError> {
        let (_dir, mut context) = context_with(&[Package::new("test@1.0", files)]);
        context.parse_str(name).map(|_| ())
    }

    fn message(result: Result<(), CoreError>) -> String {
        match result {
            Err(err) => err.to_string(),
            Ok(()) => panic!("expected a validation error"),
        }
    }

    #[test]
    fn accepts_well_formed_types() {
        check(
            "package test@1.0;\n\
             @export(name=\"mode\", value_prefix=\"MODE_\")\n\
             enum Mode : uint8_t { A, B };\n\
             struct Node { vec<Node> children; Mode mode; };\n\
             union Raw { int32_t i; float f; uint8_t[4] bytes; };\n\
             safe_union Value { string s; Node n; };\n\
             typedef fmq_sync<Raw> Queue;\n",
        )
        .expect("valid");
    }

    #[test]
    fn rejects_typedef_cycles() {
        let err = message(check("package test@1.0;\ntypedef B A;\ntypedef A B;\n"));
        assert!(err.contains("refers to itself"), "{err}");
    }

    #[test]
    fn rejects_recursive_struct_by_value() {
        let err = message(check("package test@1.0;\nstruct S { int32_t x; S again; };\n"));
        assert!(err.contains("contains itself"), "{err}");
        let err = message(check(
            "package test@1.0;\n\
             struct A { B b; };\n\
             typedef C B;\n\
             struct C { A[2] a; };\n",
        ));
        assert!(err.contains("A -> B -> C -> A"), "{err}");
        check("package test@1.0;\nstruct L { vec<L> next; pointer p; };\n").expect("indirect");
    }

    #[test]
    fn rejects_non_plain_union_members() {
        let err = message(check("package test@1.0;\nunion U { string s; int32_t i; };\n"));
        assert!(err.contains("not plain data"), "{err}");
        let err = message(check(
            "package test@1.0;\nstruct Inner { vec<int8_t> v; };\ntypedef Inner Alias;\nunion U { Alias a; };\n",
        ));
        assert!(err.contains("not plain data"), "{err}");
    }

    #[test]
    fn rejects_duplicate_fields() {
        let err = check("package test@1.0;\nstruct S { int32_t x; int64_t x; };\n").unwrap_err();
        assert_eq!(err.kind(), "DuplicateDeclarationError");
    }

    #[test]
    fn restricts_export_annotation() {
        let err = message(check("package test@1.0;\n@export\nstruct S { int32_t x; };\n"));
        assert!(err.contains("only allowed on enums and constants"), "{err}");
        let err = message(check("package test@1.0;\n@export(prefix=\"X\")\nenum E : int32_t { A };\n"));
        assert!(err.contains("unknown @export argument 'prefix'"), "{err}");
        check("package test@1.0;\n@export(name=\"limit\")\nconst int32_t LIMIT = 3;\n").expect("constant export");
    }

    #[test]
    fn rejects_fmq_of_non_plain_data() {
        let err = message(check("package test@1.0;\nstruct S { fmq_unsync<string> q; };\n"));
        assert!(err.contains("fmq_unsync element type 'string'"), "{err}");
    }

    #[test]
    fn checks_methods() {
        let files = [
            ("IBase", "package test@1.0;\ninterface IBase { ping(); };\n"),
            ("IOneway", "package test@1.0;\ninterface IOneway { oneway f() generates (int32_t r); };\n"),
            ("IDup", "package test@1.0;\ninterface IDup { f(); f(int32_t x); };\n"),
            ("IParams", "package test@1.0;\ninterface IParams { f(int32_t x) generates (int32_t x); };\n"),
            ("IChild", "package test@1.0;\ninterface IChild extends IBase { ping(); };\n"),
            ("IGood", "package test@1.0;\ninterface IGood extends IBase { oneway pong(int8_t a, int8_t b); };\n"),
        ];
        let err = message(check_interface(&files, "test@1.0::IOneway"));
        assert!(err.contains("cannot return results"), "{err}");
        let err = check_interface(&files, "test@1.0::IDup").unwrap_err();
        assert_eq!(err.kind(), "DuplicateDeclarationError");
        let err = check_interface(&files, "test@1.0::IParams").unwrap_err();
        assert_eq!(err.kind(), "DuplicateDeclarationError");
        let err = message(check_interface(&files, "test@1.0::IChild"));
        assert!(err.contains("already defined by a parent"), "{err}");
        check_interface(&files, "test@1.0::IGood").expect("valid");
    }
}
