//! Structural hash of a resolved file.
//!
//! The hash is SHA-256 over a canonical text of the file's declarations,
//! so it ignores whitespace, comments, docs and the way names or values
//! were spelled. Typedefs are transparent wherever a type is used: a field
//! declared through an alias hashes exactly like one declared with the
//! alias target.

use std::fmt::Write;

use sha2::{Digest, Sha256};

use crate::hir::{Annotation, Declaration, HirFile};
use crate::types::{Field, NamedTypeKind, Type};

/// Hex-encoded SHA-256 of [`canonical_form`].
pub(crate) fn file_hash(file: &HirFile) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_form(file).as_bytes());
    hex::encode(hasher.finalize())
}

/// The text the hash is computed over. One declaration per line, in
/// declaration order, with fully-qualified names.
pub fn canonical_form(file: &HirFile) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "package {};", file.package());
    for decl in file.declarations() {
        match decl {
            Declaration::Type(_, named) => {
                write_annotations(&mut out, &named.annotations);
                match &named.kind {
                    NamedTypeKind::Enum(e) => {
                        let _ = write!(out, "enum {} : {} {{", named.fq_name, canonical_type(file, &e.storage));
                        for value in &e.values {
                            let _ = write!(out, " {} = {};", value.name, value.value.value_string());
                        }
                        out.push_str(" };\n");
                    }
                    NamedTypeKind::Struct(c) | NamedTypeKind::Union(c) | NamedTypeKind::SafeUnion(c) => {
                        let _ = write!(out, "{} {} {{", named.keyword(), named.fq_name);
                        write_fields(&mut out, file, &c.fields, ";");
                        out.push_str(" };\n");
                    }
                    NamedTypeKind::Typedef(target) => {
                        let _ = writeln!(out, "typedef {} = {};", named.fq_name, canonical_type(file, target));
                    }
                    NamedTypeKind::Interface(i) => {
                        let _ = write!(out, "interface {}", named.fq_name);
                        if let Some(parent) = &i.parent {
                            let _ = write!(out, " extends {}", parent.fq_name);
                        }
                        out.push_str(" {");
                        for method in &i.methods {
                            out.push(' ');
                            write_annotations(&mut out, &method.annotations);
                            if method.oneway {
                                out.push_str("oneway ");
                            }
                            let _ = write!(out, "{}(", method.name);
                            write_fields(&mut out, file, &method.args, ",");
                            out.push_str(" )");
                            if !method.results.is_empty() {
                                out.push_str(" generates (");
                                write_fields(&mut out, file, &method.results, ",");
                                out.push_str(" )");
                            }
                            out.push(';');
                        }
                        out.push_str(" };\n");
                    }
                }
            }
            Declaration::Constant(_, constant) => {
                write_annotations(&mut out, &constant.annotations);
                let _ = writeln!(
                    out,
                    "const {} : {} = {};",
                    constant.fq_name,
                    canonical_type(file, &constant.ty),
                    constant.value.value_string()
                );
            }
        }
    }
    out
}

fn write_annotations(out: &mut String, annotations: &[Annotation]) {
    for annotation in annotations {
        let _ = write!(out, "@{}", annotation.name);
        if !annotation.params.is_empty() {
            let params: Vec<String> = annotation
                .params
                .iter()
                .map(|param| {
                    let values: Vec<String> = param.values.iter().map(|v| v.render()).collect();
                    format!("{}={{{}}}", param.name, values.join(","))
                })
                .collect();
            let _ = write!(out, "({})", params.join(","));
        }
        out.push(' ');
    }
}

fn write_fields(out: &mut String, file: &HirFile, fields: &[Field], separator: &str) {
    for (index, field) in fields.iter().enumerate() {
        if index > 0 && separator == "," {
            out.push(',');
        }
        out.push(' ');
        write_annotations(out, &field.annotations);
        let _ = write!(out, "{} {}", canonical_type(file, &field.ty), field.name);
        if separator == ";" {
            out.push(';');
        }
    }
}

/// Type text with every typedef replaced by its target.
fn canonical_type(file: &HirFile, ty: &Type) -> String {
    match ty {
        Type::Scalar(kind) => kind.name().to_string(),
        Type::String => "string".to_string(),
        Type::Handle => "handle".to_string(),
        Type::Memory => "memory".to_string(),
        Type::Pointer => "pointer".to_string(),
        Type::Array { element, size } => {
            format!("{}[{}]", canonical_type(file, element), size.value_string())
        }
        Type::Vector(element) => format!("vec<{}>", canonical_type(file, element)),
        Type::Fmq { flavor, element } => {
            format!("{}<{}>", flavor.name(), canonical_type(file, element))
        }
        Type::Named(r) => {
            let (owner, named) = file.resolve(r);
            match &named.kind {
                NamedTypeKind::Typedef(target) => canonical_type(owner, target),
                _ => named.fq_name.to_string(),
            }
        }
    }
}
