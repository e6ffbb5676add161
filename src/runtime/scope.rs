use std::collections::HashMap;
use std::fmt;

use indexmap::IndexMap;

use super::error::{EngineFault, RuntimeError};
use super::heap::RefId;

/// Scope identity. Ids are never reused, so an owner mark left on a
/// reference can never be mistaken for a later scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(u64);

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Named bindings plus an optional parent used only for lookup fallback.
#[derive(Debug, Default)]
pub struct Scope {
    bindings: IndexMap<String, RefId>,
    parent: Option<ScopeId>,
}

#[derive(Debug, Default)]
pub struct Scopes {
    live: HashMap<ScopeId, Scope>,
    next_id: u64,
}

impl Scopes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, parent: Option<ScopeId>) -> ScopeId {
        let id = ScopeId(self.next_id);
        self.next_id += 1;
        self.live.insert(
            id,
            Scope {
                bindings: IndexMap::new(),
                parent,
            },
        );
        id
    }

    fn scope(&self, id: ScopeId) -> Result<&Scope, EngineFault> {
        self.live.get(&id).ok_or(EngineFault::DeadScope(id.0))
    }

    fn scope_mut(&mut self, id: ScopeId) -> Result<&mut Scope, EngineFault> {
        self.live.get_mut(&id).ok_or(EngineFault::DeadScope(id.0))
    }

    pub fn declare(&mut self, id: ScopeId, name: &str, reference: RefId) -> Result<(), RuntimeError> {
        let scope = self.scope_mut(id)?;
        if scope.bindings.contains_key(name) {
            return Err(RuntimeError::AlreadyDefined(format!("variable '{}'", name)));
        }
        scope.bindings.insert(name.to_string(), reference);
        Ok(())
    }

    pub fn contains_local(&self, id: ScopeId, name: &str) -> Result<bool, EngineFault> {
        Ok(self.scope(id)?.bindings.contains_key(name))
    }

    /// Local bindings first, then the parent chain.
    pub fn find(&self, id: ScopeId, name: &str) -> Result<Option<RefId>, EngineFault> {
        let mut current = Some(id);
        while let Some(scope_id) = current {
            let scope = self.scope(scope_id)?;
            if let Some(found) = scope.bindings.get(name) {
                return Ok(Some(*found));
            }
            current = scope.parent;
        }
        Ok(None)
    }

    pub fn lookup(&self, id: ScopeId, name: &str) -> Result<RefId, RuntimeError> {
        self.find(id, name)?
            .ok_or_else(|| RuntimeError::name_error(format!("variable '{}' is not defined", name)))
    }

    pub fn remove(&mut self, id: ScopeId, name: &str) -> Result<Option<RefId>, EngineFault> {
        Ok(self.scope_mut(id)?.bindings.shift_remove(name))
    }

    /// Bound references in declaration order.
    pub fn bindings(&self, id: ScopeId) -> Result<Vec<RefId>, EngineFault> {
        Ok(self.scope(id)?.bindings.values().copied().collect())
    }

    pub fn names(&self, id: ScopeId) -> Result<Vec<String>, EngineFault> {
        Ok(self.scope(id)?.bindings.keys().cloned().collect())
    }

    pub fn live(&self) -> usize {
        self.live.len()
    }

    pub fn destroy(&mut self, id: ScopeId) -> Result<(), EngineFault> {
        self.live.remove(&id).map(|_| ()).ok_or(EngineFault::DeadScope(id.0))
    }
}

/// One execution of a statement sequence: a scope plus its control flags.
#[derive(Debug)]
pub struct Activation {
    pub scope: ScopeId,
    pub finished: bool,
    pub break_requested: bool,
    pub loop_depth: usize,
    pub return_value: Option<RefId>,
}

impl Activation {
    pub fn new(scope: ScopeId) -> Self {
        Self {
            scope,
            finished: false,
            break_requested: false,
            loop_depth: 0,
            return_value: None,
        }
    }

    /// Whether the current block should stop executing statements.
    pub fn interrupted(&self) -> bool {
        self.finished || self.break_requested
    }
}
