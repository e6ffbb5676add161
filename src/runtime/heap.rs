//! Reference storage.
//!
//! Every reference cell lives in a generational arena and is addressed by a
//! copyable [`RefId`]. A cell either owns a [`Value`] (a root) or aliases
//! another cell, and remembers which scope is responsible for freeing it.
//! Freeing a cell bumps its slot generation, so a handle that outlives its
//! storage is caught as [`EngineFault::DanglingReference`] on next use.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use super::error::EngineFault;
use super::scope::ScopeId;
use super::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RefId {
    index: u32,
    generation: u32,
}

#[derive(Debug)]
pub enum Target {
    Owned(Value),
    Alias(RefId),
}

#[derive(Debug)]
pub struct Reference {
    pub target: Target,
    pub owner: Option<ScopeId>,
    incoming: u32,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    cell: Option<Reference>,
}

/// Outcome of an escape check on a single reference chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escape {
    /// The chain now ends at storage that outlives the dying scope.
    Safe,
    /// Every link of the chain belongs to the dying scope.
    Doomed,
}

#[derive(Debug, Default)]
pub struct Heap {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
    owned: HashMap<ScopeId, Vec<RefId>>,
    /// Entries of `owned` freed ahead of their scope.
    stale: HashMap<ScopeId, usize>,
}

/// Stale ownership entries tolerated per scope before its list is compacted.
const STALE_LIMIT: usize = 64;

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of reference cells currently allocated.
    pub fn live(&self) -> usize {
        self.live
    }

    pub fn is_live(&self, id: RefId) -> bool {
        self.get(id).is_ok()
    }

    // ── Allocation ──────────────────────────────────────────────────────

    pub fn alloc_root(&mut self, value: Value) -> RefId {
        self.alloc(Target::Owned(value))
    }

    pub fn alloc_alias(&mut self, target: RefId) -> Result<RefId, EngineFault> {
        self.get_mut(target)?.incoming += 1;
        Ok(self.alloc(Target::Alias(target)))
    }

    fn alloc(&mut self, target: Target) -> RefId {
        let cell = Reference {
            target,
            owner: None,
            incoming: 0,
        };
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.cell = Some(cell);
            RefId {
                index,
                generation: slot.generation,
            }
        } else {
            self.slots.push(Slot {
                generation: 0,
                cell: Some(cell),
            });
            RefId {
                index: (self.slots.len() - 1) as u32,
                generation: 0,
            }
        }
    }

    fn free(&mut self, id: RefId) -> Result<(), EngineFault> {
        let slot = self
            .slots
            .get_mut(id.index as usize)
            .filter(|s| s.generation == id.generation && s.cell.is_some())
            .ok_or(EngineFault::DanglingReference {
                index: id.index,
                generation: id.generation,
            })?;
        let cell = slot.cell.take();
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.live -= 1;
        let Some(cell) = cell else {
            return Ok(());
        };
        if let Target::Alias(next) = cell.target {
            if let Ok(next) = self.get_mut(next) {
                next.incoming = next.incoming.saturating_sub(1);
            }
        }
        if let Some(scope) = cell.owner {
            self.note_stale(scope);
        }
        Ok(())
    }

    fn note_stale(&mut self, scope: ScopeId) {
        let Some(list) = self.owned.get_mut(&scope) else {
            return;
        };
        let stale = self.stale.entry(scope).or_default();
        *stale += 1;
        if *stale <= STALE_LIMIT || *stale * 2 < list.len() {
            return;
        }
        let slots = &self.slots;
        list.retain(|id| {
            slots
                .get(id.index as usize)
                .filter(|s| s.generation == id.generation)
                .and_then(|s| s.cell.as_ref())
                .is_some_and(|cell| cell.owner == Some(scope))
        });
        *stale = 0;
    }

    /// Free an unanchored temporary, along with any unanchored payload it
    /// still owns. Anchored references are left to their scope.
    pub fn discard(&mut self, id: RefId) -> Result<(), EngineFault> {
        if self.get(id)?.owner.is_some() {
            return Ok(());
        }
        let payload = match &self.get(id)?.target {
            Target::Owned(value) => value.payload(),
            Target::Alias(_) => Vec::new(),
        };
        self.free(id)?;
        for slot in payload {
            if self.is_live(slot) {
                self.discard(slot)?;
            }
        }
        Ok(())
    }

    // ── Access ──────────────────────────────────────────────────────────

    pub fn get(&self, id: RefId) -> Result<&Reference, EngineFault> {
        self.slots
            .get(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.cell.as_ref())
            .ok_or(EngineFault::DanglingReference {
                index: id.index,
                generation: id.generation,
            })
    }

    fn get_mut(&mut self, id: RefId) -> Result<&mut Reference, EngineFault> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.cell.as_mut())
            .ok_or(EngineFault::DanglingReference {
                index: id.index,
                generation: id.generation,
            })
    }

    pub fn owner(&self, id: RefId) -> Result<Option<ScopeId>, EngineFault> {
        Ok(self.get(id)?.owner)
    }

    pub fn is_root(&self, id: RefId) -> Result<bool, EngineFault> {
        Ok(matches!(self.get(id)?.target, Target::Owned(_)))
    }

    pub fn alias_target(&self, id: RefId) -> Result<Option<RefId>, EngineFault> {
        match self.get(id)?.target {
            Target::Alias(next) => Ok(Some(next)),
            Target::Owned(_) => Ok(None),
        }
    }

    pub fn incoming(&self, id: RefId) -> Result<u32, EngineFault> {
        Ok(self.get(id)?.incoming)
    }

    /// The links from `id` to its root, inclusive at both ends.
    pub fn chain(&self, id: RefId) -> Result<Vec<RefId>, EngineFault> {
        let mut links = vec![id];
        let mut current = id;
        while let Target::Alias(next) = self.get(current)?.target {
            if links.len() > self.live {
                return Err(EngineFault::AliasCycle);
            }
            links.push(next);
            current = next;
        }
        Ok(links)
    }

    pub fn resolve_root(&self, id: RefId) -> Result<RefId, EngineFault> {
        let mut current = id;
        let mut steps = 0;
        while let Target::Alias(next) = self.get(current)?.target {
            steps += 1;
            if steps > self.live {
                return Err(EngineFault::AliasCycle);
            }
            current = next;
        }
        Ok(current)
    }

    /// The value stored at the root of `id`'s chain.
    pub fn value(&self, id: RefId) -> Result<&Value, EngineFault> {
        let root = self.resolve_root(id)?;
        match &self.get(root)?.target {
            Target::Owned(value) => Ok(value),
            Target::Alias(_) => Err(EngineFault::AliasCycle),
        }
    }

    pub fn value_mut(&mut self, id: RefId) -> Result<&mut Value, EngineFault> {
        let root = self.resolve_root(id)?;
        match &mut self.get_mut(root)?.target {
            Target::Owned(value) => Ok(value),
            Target::Alias(_) => Err(EngineFault::AliasCycle),
        }
    }

    // ── Mutation ────────────────────────────────────────────────────────

    /// Replace the value at the root; every alias observes the new value.
    /// The previous payload is released unless something still aliases it.
    pub fn set_value(&mut self, id: RefId, value: Value) -> Result<(), EngineFault> {
        let root = self.resolve_root(id)?;
        let previous = std::mem::replace(self.value_mut(root)?, value);
        let owner = self.get(root)?.owner;
        self.release_payload(previous, owner)
    }

    /// Move the value out of the root, leaving null behind.
    pub fn take_value(&mut self, id: RefId) -> Result<Value, EngineFault> {
        Ok(std::mem::replace(self.value_mut(id)?, Value::Null))
    }

    /// Redirect the root of `id`'s chain so it aliases `target`. Everything
    /// already aliasing the old root now reaches the new storage.
    pub fn rebind(&mut self, id: RefId, target: RefId) -> Result<(), EngineFault> {
        let root = self.resolve_root(id)?;
        if self.resolve_root(target)? == root {
            return Ok(());
        }
        let previous = self.retarget(root, Target::Alias(target))?;
        if let Target::Owned(value) = previous {
            let owner = self.get(root)?.owner;
            self.release_payload(value, owner)?;
        }
        Ok(())
    }

    /// Point `id` itself (not its root) at `target`.
    pub fn point_at(&mut self, id: RefId, target: RefId) -> Result<(), EngineFault> {
        if self.chain(target)?.contains(&id) {
            return Err(EngineFault::AliasCycle);
        }
        self.retarget(id, Target::Alias(target)).map(|_| ())
    }

    /// Swap `id`'s target, keeping incoming counts straight. Returns the
    /// target it had before.
    fn retarget(&mut self, id: RefId, target: Target) -> Result<Target, EngineFault> {
        if let Target::Alias(next) = target {
            self.get_mut(next)?.incoming += 1;
        }
        let previous = std::mem::replace(&mut self.get_mut(id)?.target, target);
        if let Target::Alias(old) = previous {
            if let Ok(old) = self.get_mut(old) {
                old.incoming = old.incoming.saturating_sub(1);
            }
        }
        Ok(previous)
    }

    pub(crate) fn replace_slot(
        &mut self,
        container: RefId,
        slot: usize,
        id: RefId,
    ) -> Result<(), EngineFault> {
        self.value_mut(container)?.replace_slot(slot, id);
        Ok(())
    }

    // ── Ownership ───────────────────────────────────────────────────────

    /// Give every unowned link of `id`'s chain to `scope`. A root anchored
    /// here for the first time carries its payload into its own scope.
    pub fn anchor(&mut self, id: RefId, scope: ScopeId) -> Result<(), EngineFault> {
        let mut visited = HashSet::new();
        self.anchor_inner(id, scope, &mut visited)
    }

    fn anchor_inner(
        &mut self,
        id: RefId,
        scope: ScopeId,
        visited: &mut HashSet<RefId>,
    ) -> Result<(), EngineFault> {
        let links = self.chain(id)?;
        let root = links[links.len() - 1];
        let root_was_unowned = self.get(root)?.owner.is_none();
        for link in links {
            let cell = self.get_mut(link)?;
            if cell.owner.is_none() {
                cell.owner = Some(scope);
                self.owned.entry(scope).or_default().push(link);
            }
        }
        if root_was_unowned && visited.insert(root) {
            let home = self.get(root)?.owner.unwrap_or(scope);
            let payload = self.value(root)?.payload();
            for slot in payload {
                self.anchor_inner(slot, home, visited)?;
            }
        }
        Ok(())
    }

    /// Anchor the payload of a root whose value was just replaced.
    pub fn anchor_payload(&mut self, root: RefId, fallback: ScopeId) -> Result<(), EngineFault> {
        let home = self.get(root)?.owner.unwrap_or(fallback);
        let mut visited = HashSet::new();
        visited.insert(root);
        let payload = self.value(root)?.payload();
        for slot in payload {
            self.anchor_inner(slot, home, &mut visited)?;
        }
        Ok(())
    }

    /// Free every reference still owned by `scope`. Returns how many died.
    pub fn release_scope(&mut self, scope: ScopeId) -> usize {
        let ids = self.owned.remove(&scope).unwrap_or_default();
        self.stale.remove(&scope);
        let mut released = 0;
        for id in ids {
            let still_ours = matches!(self.get(id), Ok(cell) if cell.owner == Some(scope));
            if still_ours && self.free(id).is_ok() {
                released += 1;
            }
        }
        released
    }

    /// Free `id` early if `scope` owns it and nothing aliases it, together
    /// with whatever part of its payload is equally unreachable.
    pub fn release_if_unaliased(&mut self, id: RefId, scope: ScopeId) -> Result<(), EngineFault> {
        let cell = self.get(id)?;
        if cell.owner != Some(scope) || cell.incoming != 0 {
            return Ok(());
        }
        let payload = match &cell.target {
            Target::Owned(value) => value.payload(),
            Target::Alias(_) => Vec::new(),
        };
        self.free(id)?;
        self.release_slots(payload, Some(scope))
    }

    /// Free the payload of a value that is no longer stored anywhere.
    /// Slots owned elsewhere, or still aliased, stay live.
    pub fn release_payload(&mut self, value: Value, owner: Option<ScopeId>) -> Result<(), EngineFault> {
        self.release_slots(value.payload(), owner)
    }

    fn release_slots(&mut self, slots: Vec<RefId>, owner: Option<ScopeId>) -> Result<(), EngineFault> {
        let mut pending = slots;
        loop {
            let mut aliased = Vec::new();
            let mut progressed = false;
            while let Some(id) = pending.pop() {
                let Ok(cell) = self.get(id) else {
                    continue;
                };
                if cell.owner != owner {
                    continue;
                }
                if cell.incoming > 0 {
                    aliased.push(id);
                    continue;
                }
                if let Target::Owned(value) = &cell.target {
                    pending.extend(value.payload());
                }
                self.free(id)?;
                progressed = true;
            }
            // Freeing a slot can drop the last alias into a sibling.
            if !progressed || aliased.is_empty() {
                return Ok(());
            }
            pending = aliased;
        }
    }

    // ── Escape repair ───────────────────────────────────────────────────

    /// Make sure `id` does not reach storage owned by `dying`.
    ///
    /// Surviving links that pass through dying intermediates are re-pointed
    /// at the next surviving link. When the root itself is dying, the chain
    /// is detached at its last surviving link, which takes over a shallow
    /// clone of the root's value. Payload slots are then repaired the same
    /// way, recursively.
    pub fn check_escape(
        &mut self,
        id: RefId,
        dying: ScopeId,
        allow_repair: bool,
    ) -> Result<Escape, EngineFault> {
        let mut pass = RepairPass::default();
        self.escape_inner(id, dying, allow_repair, &mut pass)
    }

    fn escape_inner(
        &mut self,
        id: RefId,
        dying: ScopeId,
        allow_repair: bool,
        pass: &mut RepairPass,
    ) -> Result<Escape, EngineFault> {
        let links = self.chain(id)?;
        let root = links[links.len() - 1];
        let mut survivors = Vec::with_capacity(links.len());
        for link in &links {
            if self.get(*link)?.owner != Some(dying) {
                survivors.push(*link);
            }
        }

        let Some(&last) = survivors.last() else {
            // The chain dies with the scope, but its payload may still be
            // reachable from surviving storage.
            self.repair_payload(root, dying, pass)?;
            return Ok(Escape::Doomed);
        };
        let home = if last == root {
            root
        } else {
            if !allow_repair {
                return Ok(Escape::Doomed);
            }
            let copy = self.value(root)?.shallow_clone();
            self.retarget(last, Target::Owned(copy))?;
            pass.migrated.entry(root).or_insert(last);
            debug!(?last, ?dying, "detached escaping reference");
            last
        };

        for pair in survivors.windows(2) {
            if self.alias_target(pair[0])? != Some(pair[1]) {
                self.retarget(pair[0], Target::Alias(pair[1]))?;
            }
        }

        self.repair_payload(home, dying, pass)?;
        Ok(Escape::Safe)
    }

    fn repair_payload(
        &mut self,
        container: RefId,
        dying: ScopeId,
        pass: &mut RepairPass,
    ) -> Result<(), EngineFault> {
        if !pass.visited.insert(container) {
            return Ok(());
        }
        let home = self.get(container)?.owner;
        let container_dies = home == Some(dying);
        let slots = self.value(container)?.payload();
        for (index, slot) in slots.into_iter().enumerate() {
            let slot_dies = self.get(slot)?.owner == Some(dying);
            let outcome = self.escape_inner(slot, dying, true, pass)?;
            if container_dies {
                continue;
            }
            let fresh = match outcome {
                Escape::Safe if !slot_dies => continue,
                Escape::Safe => {
                    let next = self.first_survivor(slot, dying)?;
                    self.alloc_alias(next)?
                }
                Escape::Doomed => self.migrate(slot, dying, pass)?,
            };
            self.replace_slot(container, index, fresh)?;
            if let Some(home) = home {
                self.anchor(fresh, home)?;
            }
        }
        Ok(())
    }

    /// Copy a dying slot's storage out of the scope. Storage reached more
    /// than once is copied once and shared.
    fn migrate(
        &mut self,
        slot: RefId,
        dying: ScopeId,
        pass: &mut RepairPass,
    ) -> Result<RefId, EngineFault> {
        let root = self.resolve_root(slot)?;
        if let Some(&moved) = pass.migrated.get(&root) {
            return self.alloc_alias(moved);
        }
        let copy = self.value(root)?.shallow_clone();
        let fresh = self.alloc_root(copy);
        pass.migrated.insert(root, fresh);
        if self.escape_inner(fresh, dying, false, pass)? == Escape::Doomed {
            return Err(EngineFault::UnrepairableEscape);
        }
        Ok(fresh)
    }

    fn first_survivor(&self, id: RefId, dying: ScopeId) -> Result<RefId, EngineFault> {
        for link in self.chain(id)?.into_iter().skip(1) {
            if self.get(link)?.owner != Some(dying) {
                return Ok(link);
            }
        }
        Err(EngineFault::UnrepairableEscape)
    }
}

/// Bookkeeping for one escape check: containers already repaired, and the
/// replacement chosen for each dying root that has been copied out.
#[derive(Debug, Default)]
struct RepairPass {
    visited: HashSet<RefId>,
    migrated: HashMap<RefId, RefId>,
}
