//! Pack Selection Model
//!
//! `SelectionState` is the single source of truth for which packs will be
//! installed. Both presentation adapters ([`flat`] and [`tree`]) and the
//! automation snapshot funnel every change through [`SelectionState::toggle`]
//! so they can never disagree.
//!
//! # Rules
//!
//! - **Required**: required packs, and every pack they depend on, are
//!   selected and *locked*. Locked packs cannot be toggled.
//! - **Dependencies**: selecting a pack selects its transitive dependency
//!   closure. Deselecting does not cascade unless the state was built with
//!   [`DeselectPolicy::Cascade`]; unmet dependencies surface at validation.
//! - **Exclude groups**: at most one selected pack per group. Selecting a
//!   pack evicts its non-locked group siblings. A group held by a locked
//!   pack refuses the request instead (required always wins).
//! - **Dangling references** are logged and ignored.

pub mod flat;
pub mod tree;
pub mod validation;

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::{InstallerError, Result};
use crate::install_data::InstallContext;
use crate::pack::Pack;
use crate::types::DeselectPolicy;

pub use validation::{PackValidator, ValidationOutcome, ValidatorError, ValidatorRegistry};

/// Packs added and removed by one selection operation (pack indices).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionDelta {
    pub added: Vec<usize>,
    pub removed: Vec<usize>,
}

impl SelectionDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    /// Fold a later delta into this one, cancelling add/remove pairs.
    pub fn merge(&mut self, other: SelectionDelta) {
        for idx in other.removed {
            if let Some(pos) = self.added.iter().position(|&a| a == idx) {
                self.added.remove(pos);
            } else if !self.removed.contains(&idx) {
                self.removed.push(idx);
            }
        }
        for idx in other.added {
            if let Some(pos) = self.removed.iter().position(|&r| r == idx) {
                self.removed.remove(pos);
            } else if !self.added.contains(&idx) {
                self.added.push(idx);
            }
        }
    }
}

/// One row of the automation snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackSnapshotEntry {
    /// Position in the available pack list
    pub index: Option<usize>,
    /// Pack id, empty for legacy packs
    pub id: String,
    pub name: String,
    pub selected: bool,
}

/// A selected pack whose dependency is not selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnmetDependency {
    pub pack: usize,
    pub dependency: usize,
}

/// Authoritative pack selection.
#[derive(Debug, Clone)]
pub struct SelectionState {
    packs: Vec<Pack>,
    lookup: HashMap<String, usize>,
    /// Resolved dependency indices per pack (dangling references dropped)
    dependencies: Vec<Vec<usize>>,
    parents: Vec<Option<usize>>,
    children: Vec<Vec<usize>>,
    selected: BTreeSet<usize>,
    locked: BTreeSet<usize>,
    policy: DeselectPolicy,
}

impl SelectionState {
    /// Build the state with the default (lenient) deselect policy.
    pub fn new<I, S>(packs: Vec<Pack>, initially_selected: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::with_policy(packs, initially_selected, DeselectPolicy::default())
    }

    /// Build the state: required packs and their closure are locked in,
    /// then each initial entry is selected through the usual rules.
    pub fn with_policy<I, S>(
        packs: Vec<Pack>,
        initially_selected: I,
        policy: DeselectPolicy,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let lookup = build_lookup(&packs);
        let dependencies: Vec<Vec<usize>> = packs
            .iter()
            .map(|pack| {
                pack.dependencies
                    .iter()
                    .filter_map(|dep| {
                        let resolved = lookup.get(dep.as_str()).copied();
                        if resolved.is_none() {
                            log::warn!(
                                "Pack '{}' depends on unknown pack '{}', ignoring",
                                pack.key(),
                                dep
                            );
                        }
                        resolved
                    })
                    .collect::<Vec<usize>>()
            })
            .collect();

        let mut state = Self {
            lookup,
            dependencies,
            parents: vec![None; packs.len()],
            children: vec![Vec::new(); packs.len()],
            selected: BTreeSet::new(),
            locked: BTreeSet::new(),
            policy,
            packs,
        };
        state.link_parents();

        let required: Vec<usize> =
            (0..state.packs.len()).filter(|&i| state.packs[i].required).collect();
        for &idx in &required {
            let closure = state.dependency_closure(idx);
            state.locked.extend(closure);
        }
        state.selected.extend(state.locked.iter().copied());
        state.warn_locked_group_conflicts();

        for reference in initially_selected {
            let reference = reference.as_ref();
            match state.resolve(reference) {
                Some(idx) => {
                    state.toggle_index(idx, true);
                }
                None => {
                    log::warn!("Initially selected pack '{}' is not available, ignoring", reference)
                }
            }
        }

        log::debug!(
            "Selection initialised: {} packs, {} locked, {} selected",
            state.packs.len(),
            state.locked.len(),
            state.selected.len()
        );
        state
    }

    fn link_parents(&mut self) {
        for idx in 0..self.packs.len() {
            let Some(reference) = self.packs[idx].parent.as_deref().filter(|p| !p.is_empty()) else {
                continue;
            };
            match self.lookup.get(reference).copied() {
                Some(parent) if parent != idx => {
                    self.parents[idx] = Some(parent);
                    self.children[parent].push(idx);
                }
                Some(_) => {
                    log::warn!("Pack '{}' names itself as parent, ignoring", self.packs[idx].key())
                }
                None => log::warn!(
                    "Pack '{}' has unknown parent '{}', treating it as top level",
                    self.packs[idx].key(),
                    reference
                ),
            }
        }

        // Parent cycles: detach the first member found so the hierarchy stays a forest
        for idx in 0..self.packs.len() {
            let mut current = self.parents[idx];
            let mut steps = 0;
            while let Some(parent) = current {
                if parent == idx {
                    log::warn!(
                        "Pack '{}' is its own ancestor, treating it as top level",
                        self.packs[idx].key()
                    );
                    if let Some(old) = self.parents[idx].take() {
                        self.children[old].retain(|&c| c != idx);
                    }
                    break;
                }
                steps += 1;
                if steps > self.packs.len() {
                    break;
                }
                current = self.parents[parent];
            }
        }
    }

    fn warn_locked_group_conflicts(&self) {
        let mut holders: HashMap<&str, usize> = HashMap::new();
        for &idx in &self.locked {
            if let Some(group) = self.packs[idx].group() {
                if let Some(&other) = holders.get(group) {
                    log::warn!(
                        "Locked packs '{}' and '{}' share exclude group '{}'; both stay selected",
                        self.packs[other].key(),
                        self.packs[idx].key(),
                        group
                    );
                } else {
                    holders.insert(group, idx);
                }
            }
        }
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    pub fn packs(&self) -> &[Pack] {
        &self.packs
    }

    pub fn pack(&self, idx: usize) -> Option<&Pack> {
        self.packs.get(idx)
    }

    pub fn len(&self) -> usize {
        self.packs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packs.is_empty()
    }

    pub fn policy(&self) -> DeselectPolicy {
        self.policy
    }

    /// Resolve a reference by id first, then by name.
    pub fn resolve(&self, reference: &str) -> Option<usize> {
        self.lookup.get(reference).copied()
    }

    pub fn parent_of(&self, idx: usize) -> Option<usize> {
        self.parents.get(idx).copied().flatten()
    }

    pub fn children(&self, idx: usize) -> &[usize] {
        self.children.get(idx).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Packs without a (resolvable) parent, in pack order
    pub fn roots(&self) -> Vec<usize> {
        (0..self.packs.len()).filter(|&i| self.parents[i].is_none()).collect()
    }

    /// Resolved direct dependencies of a pack
    pub fn dependencies_of(&self, idx: usize) -> &[usize] {
        self.dependencies.get(idx).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Packs that directly depend on `idx`
    pub fn dependents_of(&self, idx: usize) -> Vec<usize> {
        (0..self.packs.len())
            .filter(|&i| self.dependencies[i].contains(&idx))
            .collect()
    }

    /// `idx` followed by everything it transitively depends on.
    ///
    /// Cycle-safe: every pack is visited at most once.
    pub fn dependency_closure(&self, idx: usize) -> Vec<usize> {
        let mut visited = BTreeSet::new();
        let mut order = Vec::new();
        let mut stack = vec![idx];
        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            order.push(current);
            for &dep in self.dependencies[current].iter().rev() {
                if !visited.contains(&dep) {
                    stack.push(dep);
                }
            }
        }
        order
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn is_selected(&self, idx: usize) -> bool {
        self.selected.contains(&idx)
    }

    pub fn is_selected_ref(&self, reference: &str) -> bool {
        self.resolve(reference).is_some_and(|idx| self.is_selected(idx))
    }

    /// Required, or needed by a required pack
    pub fn is_locked(&self, idx: usize) -> bool {
        self.locked.contains(&idx)
    }

    /// Not selectable because a locked pack holds its exclude group
    pub fn is_blocked(&self, idx: usize) -> bool {
        if self.is_selected(idx) {
            return false;
        }
        let Some(group) = self.packs.get(idx).and_then(Pack::group) else {
            return false;
        };
        self.locked
            .iter()
            .any(|&other| other != idx && self.packs[other].group() == Some(group))
    }

    /// True if another selected pack directly depends on `idx`
    pub fn is_needed(&self, idx: usize) -> bool {
        self.selected
            .iter()
            .any(|&p| p != idx && self.dependencies[p].contains(&idx))
    }

    /// True if the user may toggle this pack
    pub fn is_enabled(&self, idx: usize) -> bool {
        idx < self.packs.len() && !self.is_locked(idx) && !self.is_blocked(idx)
    }

    pub fn selected_indices(&self) -> Vec<usize> {
        self.selected.iter().copied().collect()
    }

    pub fn selected_packs(&self) -> impl Iterator<Item = &Pack> {
        self.selected.iter().map(move |&idx| &self.packs[idx])
    }

    pub fn selected_keys(&self) -> Vec<String> {
        self.selected_packs().map(|p| p.key().to_string()).collect()
    }

    /// Bytes over selected ∪ required packs, each pack counted once
    pub fn selected_bytes(&self) -> u64 {
        let required = self.packs.iter().enumerate().filter(|(_, p)| p.required).map(|(i, _)| i);
        let union: BTreeSet<usize> = self.selected.iter().copied().chain(required).collect();
        union.into_iter().map(|idx| self.packs[idx].nbytes).sum()
    }

    pub fn unmet_dependencies(&self) -> Vec<UnmetDependency> {
        let mut unmet = Vec::new();
        for &pack in &self.selected {
            for &dependency in &self.dependencies[pack] {
                if !self.selected.contains(&dependency) {
                    unmet.push(UnmetDependency { pack, dependency });
                }
            }
        }
        unmet
    }

    /// Other packs sharing `idx`'s exclude group
    pub fn excluded_siblings(&self, idx: usize) -> Vec<usize> {
        let Some(group) = self.packs.get(idx).and_then(Pack::group) else {
            return Vec::new();
        };
        (0..self.packs.len())
            .filter(|&i| i != idx && self.packs[i].group() == Some(group))
            .collect()
    }

    /// True if the pack has at least one exclude-group sibling
    pub fn has_excludes(&self, idx: usize) -> bool {
        !self.excluded_siblings(idx).is_empty()
    }

    /// True if any descendant (through parent links) is selected
    pub fn has_selected_descendant(&self, idx: usize) -> bool {
        let mut stack: Vec<usize> = self.children(idx).to_vec();
        let mut visited = BTreeSet::new();
        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            if self.is_selected(current) {
                return true;
            }
            stack.extend_from_slice(self.children(current));
        }
        false
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Set one pack's selection by reference (id, then name).
    pub fn toggle(&mut self, reference: &str, desired: bool) -> SelectionDelta {
        match self.resolve(reference) {
            Some(idx) => self.toggle_index(idx, desired),
            None => {
                log::warn!("Toggle of unknown pack '{}' ignored", reference);
                SelectionDelta::default()
            }
        }
    }

    /// Apply explicit select then deselect requests.
    ///
    /// Unlike [`toggle`](Self::toggle), an unknown reference is an error: these
    /// come from a person naming packs, not from stored data.
    pub fn apply_requests<S: AsRef<str>>(
        &mut self,
        select: &[S],
        deselect: &[S],
    ) -> Result<SelectionDelta> {
        let mut delta = SelectionDelta::default();
        for (references, desired) in [(select, true), (deselect, false)] {
            for reference in references {
                let reference = reference.as_ref();
                let idx = self.resolve(reference).ok_or_else(|| {
                    InstallerError::selection(format!("unknown pack '{}'", reference))
                })?;
                delta.merge(self.toggle_index(idx, desired));
            }
        }
        Ok(delta)
    }

    /// Set one pack's selection by index.
    pub fn toggle_index(&mut self, idx: usize, desired: bool) -> SelectionDelta {
        if idx >= self.packs.len() {
            log::warn!("Toggle of pack index {} out of range ({} packs)", idx, self.packs.len());
            return SelectionDelta::default();
        }
        if self.is_locked(idx) {
            log::debug!("Pack '{}' is locked, toggle ignored", self.packs[idx].key());
            return SelectionDelta::default();
        }
        if desired {
            self.select(idx)
        } else {
            self.deselect(idx)
        }
    }

    fn select(&mut self, idx: usize) -> SelectionDelta {
        let closure = self.dependency_closure(idx);
        if let Some(reason) = self.selection_conflict(&closure) {
            log::warn!("Cannot select pack '{}': {}", self.packs[idx].key(), reason);
            return SelectionDelta::default();
        }

        let mut delta = SelectionDelta::default();
        for &member in &closure {
            if !self.is_locked(member) {
                if let Some(group) = self.packs[member].group() {
                    let evicted: Vec<usize> = self
                        .selected
                        .iter()
                        .copied()
                        .filter(|&other| {
                            other != member
                                && !closure.contains(&other)
                                && !self.locked.contains(&other)
                                && self.packs[other].group() == Some(group)
                        })
                        .collect();
                    for other in evicted {
                        self.selected.remove(&other);
                        log::debug!(
                            "Pack '{}' evicted by '{}' (exclude group '{}')",
                            self.packs[other].key(),
                            self.packs[member].key(),
                            group
                        );
                        delta.removed.push(other);
                    }
                }
            }
            if self.selected.insert(member) {
                delta.added.push(member);
            }
        }

        if !delta.is_empty() {
            log::info!(
                "Selected pack '{}' (+{} / -{})",
                self.packs[idx].key(),
                delta.added.len(),
                delta.removed.len()
            );
        }
        delta
    }

    /// Why the closure cannot be selected, if it cannot.
    fn selection_conflict(&self, closure: &[usize]) -> Option<String> {
        for &member in closure {
            if self.is_locked(member) {
                continue;
            }
            let Some(group) = self.packs[member].group() else {
                continue;
            };
            if let Some(&other) = closure
                .iter()
                .find(|&&o| o != member && self.packs[o].group() == Some(group))
            {
                return Some(format!(
                    "'{}' and '{}' both need to be selected but share exclude group '{}'",
                    self.packs[member].key(),
                    self.packs[other].key(),
                    group
                ));
            }
            if let Some(&holder) = self
                .locked
                .iter()
                .find(|&&q| q != member && self.packs[q].group() == Some(group))
            {
                return Some(format!(
                    "exclude group '{}' is held by required pack '{}'",
                    group,
                    self.packs[holder].key()
                ));
            }
        }
        None
    }

    fn deselect(&mut self, idx: usize) -> SelectionDelta {
        let mut delta = SelectionDelta::default();
        if !self.selected.remove(&idx) {
            return delta;
        }
        delta.removed.push(idx);

        if self.policy == DeselectPolicy::Cascade {
            let mut worklist = vec![idx];
            while let Some(removed) = worklist.pop() {
                for dependent in self.dependents_of(removed) {
                    if !self.is_locked(dependent) && self.selected.remove(&dependent) {
                        log::debug!(
                            "Pack '{}' deselected with its dependency '{}'",
                            self.packs[dependent].key(),
                            self.packs[removed].key()
                        );
                        delta.removed.push(dependent);
                        worklist.push(dependent);
                    }
                }
            }
        }

        log::info!("Deselected pack '{}' (-{})", self.packs[idx].key(), delta.removed.len());
        delta
    }

    // =========================================================================
    // Automation snapshot
    // =========================================================================

    /// Every available pack with its current selection, in pack order.
    pub fn snapshot_for_automation(&self) -> Vec<PackSnapshotEntry> {
        self.packs
            .iter()
            .enumerate()
            .map(|(index, pack)| PackSnapshotEntry {
                index: Some(index),
                id: pack.id_or_empty().to_string(),
                name: pack.name.clone(),
                selected: self.is_selected(index),
            })
            .collect()
    }

    /// Merge recorded entries into the current selection.
    ///
    /// Entries are applied as recorded, without dependency closure, so that
    /// replaying a snapshot reproduces it exactly. Locked packs are never
    /// removed; packs are only added when `ctx` allows them and no locked
    /// pack holds their exclude group.
    pub fn apply_automation_snapshot(
        &mut self,
        entries: &[PackSnapshotEntry],
        ctx: &dyn InstallContext,
    ) -> SelectionDelta {
        let mut delta = SelectionDelta::default();
        for entry in entries {
            let Some(idx) = self.match_entry(entry) else {
                log::warn!(
                    "Automation entry (index {:?}, id '{}', name '{}') matches no pack, ignoring",
                    entry.index,
                    entry.id,
                    entry.name
                );
                continue;
            };

            if entry.selected {
                if self.is_selected(idx) {
                    continue;
                }
                if !ctx.can_install(&self.packs[idx]) {
                    log::info!(
                        "Pack '{}' cannot be installed under current conditions",
                        self.packs[idx].key()
                    );
                    continue;
                }
                if self.is_blocked(idx) {
                    log::warn!(
                        "Pack '{}' is excluded by a required pack, not selecting",
                        self.packs[idx].key()
                    );
                    continue;
                }
                if let Some(group) = self.packs[idx].group() {
                    let evicted: Vec<usize> = self
                        .selected
                        .iter()
                        .copied()
                        .filter(|&o| {
                            o != idx
                                && !self.locked.contains(&o)
                                && self.packs[o].group() == Some(group)
                        })
                        .collect();
                    for other in evicted {
                        self.selected.remove(&other);
                        delta.merge(SelectionDelta { added: vec![], removed: vec![other] });
                    }
                }
                self.selected.insert(idx);
                delta.merge(SelectionDelta { added: vec![idx], removed: vec![] });
            } else if self.is_locked(idx) {
                log::debug!("Pack '{}' is required, keeping it selected", self.packs[idx].key());
            } else if self.selected.remove(&idx) {
                delta.merge(SelectionDelta { added: vec![], removed: vec![idx] });
            }
        }

        let missing: Vec<usize> = self.locked.difference(&self.selected).copied().collect();
        for idx in missing {
            self.selected.insert(idx);
            delta.merge(SelectionDelta { added: vec![idx], removed: vec![] });
        }

        log::info!(
            "Applied automation snapshot: {} entries, +{} / -{}",
            entries.len(),
            delta.added.len(),
            delta.removed.len()
        );
        delta
    }

    /// Match an entry by id, then index, then name.
    fn match_entry(&self, entry: &PackSnapshotEntry) -> Option<usize> {
        if !entry.id.is_empty() {
            if let Some(idx) = self.packs.iter().position(|p| p.id_or_empty() == entry.id) {
                return Some(idx);
            }
        }
        if let Some(index) = entry.index.filter(|&i| i < self.packs.len()) {
            return Some(index);
        }
        if !entry.name.is_empty() {
            return self.packs.iter().position(|p| p.name == entry.name);
        }
        None
    }
}

/// Map names, then ids (which override), to pack indices.
fn build_lookup(packs: &[Pack]) -> HashMap<String, usize> {
    let mut lookup = HashMap::new();
    for (idx, pack) in packs.iter().enumerate() {
        if lookup.insert(pack.name.clone(), idx).is_some() {
            log::warn!("Duplicate pack name '{}'; the last one wins for name lookups", pack.name);
        }
    }
    let mut seen_ids = BTreeSet::new();
    for (idx, pack) in packs.iter().enumerate() {
        if let Some(id) = pack.id.as_deref().filter(|id| !id.is_empty()) {
            if !seen_ids.insert(id) {
                log::warn!("Duplicate pack id '{}'", id);
            }
            lookup.insert(id.to_string(), idx);
        }
    }
    lookup
}
