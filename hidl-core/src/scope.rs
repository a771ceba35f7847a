//! Lexical scopes of one file.
//!
//! All scopes of a file live in a single [`ScopeArena`]; a scope refers to
//! its enclosing scope by [`ScopeId`] and never owns it. Entries keep
//! declaration order so that every consumer iterates deterministically.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::CoreError;
use crate::span::Location;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConstId(u32);

macro_rules! arena_index {
    ($($id:ident),*) => {
        $(
            impl $id {
                pub fn new(index: usize) -> Self {
                    $id(index as u32)
                }

                pub fn index(self) -> usize {
                    self.0 as usize
                }
            }
        )*
    };
}

arena_index!(ScopeId, TypeId, ConstId);

/// What a name in a scope is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Type(TypeId),
    Constant(ConstId),
}

#[derive(Debug, Clone)]
pub struct ScopeEntry {
    pub name: String,
    pub entity: Entity,
    pub location: Location,
}

#[derive(Debug, Clone)]
pub struct Scope {
    name: String,
    parent: Option<ScopeId>,
    owner: Option<TypeId>,
    entries: Vec<ScopeEntry>,
    index: HashMap<String, usize>,
}

impl Scope {
    fn new(name: String, parent: Option<ScopeId>, owner: Option<TypeId>) -> Self {
        Scope {
            name,
            parent,
            owner,
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Local name of the declaration owning this scope, empty at the root.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<ScopeId> {
        self.parent
    }

    pub fn owner(&self) -> Option<TypeId> {
        self.owner
    }

    pub fn get(&self, name: &str) -> Option<&ScopeEntry> {
        self.index.get(name).map(|&i| &self.entries[i])
    }

    pub fn entries(&self) -> &[ScopeEntry] {
        &self.entries
    }

    pub fn types(&self) -> impl Iterator<Item = TypeId> + '_ {
        self.entries.iter().filter_map(|entry| match entry.entity {
            Entity::Type(id) => Some(id),
            Entity::Constant(_) => None,
        })
    }

    pub fn constants(&self) -> impl Iterator<Item = ConstId> + '_ {
        self.entries.iter().filter_map(|entry| match entry.entity {
            Entity::Constant(id) => Some(id),
            Entity::Type(_) => None,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ScopeArena {
    path: PathBuf,
    scopes: Vec<Scope>,
}

impl ScopeArena {
    /// Creates the arena with its root scope.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        ScopeArena {
            path: path.into(),
            scopes: vec![Scope::new(String::new(), None, None)],
        }
    }

    pub fn root(&self) -> ScopeId {
        ScopeId(0)
    }

    pub fn get(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.index()]
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    /// Opens a nested scope owned by the declaration `owner`.
    pub fn push(&mut self, name: &str, parent: ScopeId, owner: TypeId) -> ScopeId {
        let id = ScopeId::new(self.scopes.len());
        self.scopes
            .push(Scope::new(name.to_string(), Some(parent), Some(owner)));
        id
    }

    /// Binds `name` in `scope`; a second binding of the same name in the
    /// same scope is a redefinition, whatever the entity kinds.
    pub fn declare(
        &mut self,
        scope: ScopeId,
        name: &str,
        entity: Entity,
        location: Location,
    ) -> Result<(), CoreError> {
        let target = &mut self.scopes[scope.index()];
        if let Some(previous) = target.get(name) {
            return Err(CoreError::DuplicateDeclaration {
                path: self.path.clone(),
                location,
                name: name.to_string(),
                previous: previous.location,
            });
        }
        target.index.insert(name.to_string(), target.entries.len());
        target.entries.push(ScopeEntry {
            name: name.to_string(),
            entity,
            location,
        });
        Ok(())
    }

    /// Walks from `start` outwards and returns the first binding of `name`.
    pub fn lookup(&self, start: ScopeId, name: &str) -> Option<(ScopeId, &ScopeEntry)> {
        let mut current = Some(start);
        while let Some(id) = current {
            let scope = self.get(id);
            if let Some(entry) = scope.get(name) {
                return Some((id, entry));
            }
            current = scope.parent;
        }
        None
    }

    /// Scope names from the root down to `id`, for diagnostics and nested
    /// fully-qualified names.
    pub fn path_of(&self, id: ScopeId) -> Vec<String> {
        let mut names = Vec::new();
        let mut current = Some(id);
        while let Some(scope_id) = current {
            let scope = self.get(scope_id);
            if scope.parent.is_some() {
                names.push(scope.name.clone());
            }
            current = scope.parent;
        }
        names.reverse();
        names
    }

    pub fn file_path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_duplicate_names_in_one_scope() {
        let mut arena = ScopeArena::new("types.hal");
        let root = arena.root();
        arena
            .declare(root, "Color", Entity::Type(TypeId::new(0)), Location::new(2, 1))
            .expect("first declaration");
        let err = arena
            .declare(root, "Color", Entity::Constant(ConstId::new(0)), Location::new(5, 1))
            .unwrap_err();
        match err {
            CoreError::DuplicateDeclaration { name, previous, location, .. } => {
                assert_eq!(name, "Color");
                assert_eq!(previous, Location::new(2, 1));
                assert_eq!(location, Location::new(5, 1));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn lookup_walks_enclosing_scopes() {
        let mut arena = ScopeArena::new("IFoo.hal");
        let root = arena.root();
        arena
            .declare(root, "Shared", Entity::Type(TypeId::new(0)), Location::START)
            .expect("declare");
        let inner = arena.push("IFoo", root, TypeId::new(1));
        arena
            .declare(inner, "Local", Entity::Type(TypeId::new(2)), Location::START)
            .expect("declare");

        let (found_in, entry) = arena.lookup(inner, "Shared").expect("visible from inner");
        assert_eq!(found_in, root);
        assert_eq!(entry.entity, Entity::Type(TypeId::new(0)));
        assert!(arena.lookup(root, "Local").is_none());
        assert_eq!(arena.path_of(inner), vec!["IFoo".to_string()]);
    }

    #[test]
    fn keeps_declaration_order() {
        let mut arena = ScopeArena::new("types.hal");
        let root = arena.root();
        for (i, name) in ["Zeta", "Alpha", "Mid"].iter().enumerate() {
            arena
                .declare(root, name, Entity::Type(TypeId::new(i)), Location::START)
                .expect("declare");
        }
        let names: Vec<_> = arena.get(root).entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Zeta", "Alpha", "Mid"]);
    }
}
