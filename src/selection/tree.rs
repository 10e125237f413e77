//! Tree packs adapter
//!
//! Projects the selection onto a checkbox tree built from the packs' parent
//! links. Nodes live in an arena indexed by [`NodeId`]; node 0 is a
//! synthetic root without a pack. Node flags are presentation state only:
//! every edit is pushed into the [`SelectionState`] and read back with
//! [`PackTree::sync`].
//!
//! Parent nodes reflect their children: all selected makes the parent
//! selected, none selected makes it deselected, a mix marks it partial. A
//! partial parent counts as selected in the model only if its own pack
//! carries bytes.
//!
//! Synchronisation never deselects a pack that another selected pack
//! depends on. Such a parent stays selected in the model and is shown as
//! partial while its children are unselected, so a selection made through
//! the initial list, the flat table or a replay keeps its dependencies.

use std::collections::{BTreeSet, HashMap};

use super::{SelectionDelta, SelectionState};

/// Index of a node in the tree arena
pub type NodeId = usize;

/// The synthetic root node
pub const ROOT: NodeId = 0;

/// One checkbox in the packs tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckBoxNode {
    /// Pack key, or "Root" for the synthetic root
    pub id: String,
    pub translated_text: String,
    pub selected: bool,
    /// Some but not all descendants selected
    pub partial: bool,
    /// The user may toggle this node
    pub enabled: bool,
    /// Own bytes plus selected-or-partial children
    pub total_size: u64,
    /// Last size recomputation changed `total_size`
    pub total_size_changed: bool,
    /// Pack index; `None` only for the root
    pub pack: Option<usize>,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

impl CheckBoxNode {
    fn new(id: String, translated_text: String, pack: Option<usize>) -> Self {
        Self {
            id,
            translated_text,
            selected: false,
            partial: false,
            enabled: true,
            total_size: 0,
            total_size_changed: false,
            pack,
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// Checkbox tree over a selection state.
#[derive(Debug, Clone)]
pub struct PackTree {
    nodes: Vec<CheckBoxNode>,
    /// Pack index to node
    by_pack: Vec<NodeId>,
    id_to_node: HashMap<String, NodeId>,
    /// Own bytes per node (0 for the root)
    pack_bytes: Vec<u64>,
}

/// Nodes already expanded during one cascading select.
#[derive(Default)]
struct Walk {
    dependencies: BTreeSet<NodeId>,
    children: BTreeSet<NodeId>,
}

impl PackTree {
    /// Build the tree and bring it in line with `state`.
    ///
    /// May adjust `state`: children of a pack disabled by exclusion are
    /// deselected and parents follow their children.
    pub fn build(state: &mut SelectionState) -> Self {
        let mut nodes = vec![CheckBoxNode::new("Root".to_string(), "Root".to_string(), None)];
        let mut id_to_node = HashMap::new();
        let mut by_pack = Vec::with_capacity(state.len());
        let mut pack_bytes = vec![0];

        for (idx, pack) in state.packs().iter().enumerate() {
            let node_id = nodes.len();
            nodes.push(CheckBoxNode::new(pack.key().to_string(), pack.name.clone(), Some(idx)));
            id_to_node.insert(pack.key().to_string(), node_id);
            by_pack.push(node_id);
            pack_bytes.push(pack.nbytes);
        }

        for idx in 0..state.len() {
            let node_id = by_pack[idx];
            let parent = state.parent_of(idx).map_or(ROOT, |p| by_pack[p]);
            nodes[node_id].parent = Some(parent);
            nodes[parent].children.push(node_id);
        }

        let mut tree = Self {
            nodes,
            by_pack,
            id_to_node,
            pack_bytes,
        };
        tree.sync(state);
        tree.init_total_size(ROOT, false);
        log::debug!("Pack tree built with {} nodes", tree.nodes.len());
        tree
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn node(&self, node: NodeId) -> Option<&CheckBoxNode> {
        self.nodes.get(node)
    }

    pub fn root(&self) -> &CheckBoxNode {
        &self.nodes[ROOT]
    }

    pub fn node_for_pack(&self, pack: usize) -> Option<NodeId> {
        self.by_pack.get(pack).copied()
    }

    pub fn node_by_id(&self, id: &str) -> Option<NodeId> {
        self.id_to_node.get(id).copied()
    }

    /// Bytes shown as "space required" (the root's total)
    pub fn total_bytes(&self) -> u64 {
        self.nodes[ROOT].total_size
    }

    /// Subtree of `node` in post-order (children before their parent).
    pub fn depth_first(&self, node: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        if node >= self.nodes.len() {
            return order;
        }
        let mut stack = vec![(node, false)];
        while let Some((current, expanded)) = stack.pop() {
            if expanded {
                order.push(current);
                continue;
            }
            stack.push((current, true));
            for &child in self.nodes[current].children.iter().rev() {
                stack.push((child, false));
            }
        }
        order
    }

    /// True if any pack in the subtree of `node` belongs to an exclude group
    pub fn has_excludes(&self, node: NodeId, state: &SelectionState) -> bool {
        self.depth_first(node).into_iter().any(|n| {
            self.nodes[n]
                .pack
                .and_then(|p| state.pack(p))
                .is_some_and(|pack| pack.group().is_some())
        })
    }

    // =========================================================================
    // Model synchronisation
    // =========================================================================

    /// Copy selection and enablement from the model. Partial flags are
    /// cleared; [`update_all_parents`](Self::update_all_parents) recomputes them.
    pub fn from_model(&mut self, state: &SelectionState) {
        for node_id in 1..self.nodes.len() {
            let Some(pack) = self.nodes[node_id].pack else {
                continue;
            };
            let enabled = state.is_enabled(pack) && !self.has_blocked_ancestor(node_id, state);
            let node = &mut self.nodes[node_id];
            node.selected = state.is_selected(pack);
            node.enabled = enabled;
            node.partial = false;
        }
    }

    fn has_blocked_ancestor(&self, node: NodeId, state: &SelectionState) -> bool {
        let mut current = self.nodes[node].parent;
        while let Some(ancestor) = current {
            if let Some(pack) = self.nodes[ancestor].pack {
                if state.is_blocked(pack) {
                    return true;
                }
            }
            current = self.nodes[ancestor].parent;
        }
        false
    }

    /// Push one node's checkbox into the model.
    pub fn set_model_value(&mut self, node: NodeId, state: &mut SelectionState) -> SelectionDelta {
        let Some(n) = self.nodes.get(node) else {
            return SelectionDelta::default();
        };
        let Some(pack) = n.pack else {
            return SelectionDelta::default();
        };
        let has_bytes = state.pack(pack).is_some_and(|p| p.nbytes > 0);
        let keep = state.is_selected(pack) && state.is_needed(pack);
        let desired = (n.selected && (!n.partial || has_bytes)) || keep;
        let delta = state.toggle_index(pack, desired);
        self.nodes[node].selected = state.is_selected(pack);
        delta
    }

    /// Recompute partial flags bottom-up and report parents to the model.
    pub fn update_all_parents(&mut self, state: &mut SelectionState) -> SelectionDelta {
        let mut delta = SelectionDelta::default();
        for node_id in self.depth_first(ROOT) {
            if node_id == ROOT || self.nodes[node_id].is_leaf() {
                continue;
            }
            let children = &self.nodes[node_id].children;
            let all_selected = children
                .iter()
                .all(|&c| self.nodes[c].selected && !self.nodes[c].partial);
            let none_selected = children
                .iter()
                .all(|&c| !self.nodes[c].selected && !self.nodes[c].partial);

            let needed = self.nodes[node_id]
                .pack
                .is_some_and(|p| state.is_selected(p) && state.is_needed(p));

            let node = &mut self.nodes[node_id];
            node.partial = (!all_selected && !none_selected) || (none_selected && needed);
            node.selected = !none_selected || needed;
            delta.merge(self.set_model_value(node_id, state));
        }
        delta
    }

    /// Bring the tree and the model to a common fixed point.
    pub fn sync(&mut self, state: &mut SelectionState) -> SelectionDelta {
        let mut delta = self.clear_under_blocked(state);
        let limit = self.nodes.len() + 1;
        let mut settled = false;
        for _ in 0..limit {
            self.from_model(state);
            let step = self.update_all_parents(state);
            if step.is_empty() {
                settled = true;
                break;
            }
            delta.merge(step);
        }
        if !settled {
            log::warn!("Pack tree did not settle after {} passes", limit);
        }
        delta
    }

    /// Deselect everything below a pack that is disabled by exclusion,
    /// except packs a selected pack depends on.
    fn clear_under_blocked(&mut self, state: &mut SelectionState) -> SelectionDelta {
        let mut delta = SelectionDelta::default();
        for node_id in 1..self.nodes.len() {
            let Some(pack) = self.nodes[node_id].pack else {
                continue;
            };
            if !state.is_blocked(pack) {
                continue;
            }
            for below in self.depth_first(node_id) {
                if below == node_id {
                    continue;
                }
                if let Some(p) = self.nodes[below].pack {
                    if state.is_selected(p) && !state.is_locked(p) && !state.is_needed(p) {
                        delta.merge(state.toggle_index(p, false));
                    }
                }
            }
        }
        delta
    }

    // =========================================================================
    // Cascading selection
    // =========================================================================

    /// Select every descendant of `node`, dependencies first.
    pub fn select_all_child_nodes(
        &mut self,
        node: NodeId,
        state: &mut SelectionState,
    ) -> SelectionDelta {
        let mut walk = Walk::default();
        self.select_children(node, state, &mut walk)
    }

    /// Fully select every dependency of `node`, including the subtrees of
    /// dependencies that are group nodes.
    pub fn select_all_dependencies(
        &mut self,
        node: NodeId,
        state: &mut SelectionState,
    ) -> SelectionDelta {
        let mut walk = Walk::default();
        self.select_dependencies(node, state, &mut walk)
    }

    fn select_children(
        &mut self,
        node: NodeId,
        state: &mut SelectionState,
        walk: &mut Walk,
    ) -> SelectionDelta {
        let mut delta = SelectionDelta::default();
        if node >= self.nodes.len() || !walk.children.insert(node) {
            return delta;
        }
        let children = self.nodes[node].children.clone();
        for child in children {
            delta.merge(self.select_dependencies(child, state, walk));
            if !self.nodes[child].is_leaf() {
                delta.merge(self.select_children(child, state, walk));
            }
            delta.merge(self.select_one(child, state));
        }
        delta
    }

    fn select_dependencies(
        &mut self,
        node: NodeId,
        state: &mut SelectionState,
        walk: &mut Walk,
    ) -> SelectionDelta {
        let mut delta = SelectionDelta::default();
        if node >= self.nodes.len() || !walk.dependencies.insert(node) {
            return delta;
        }
        let Some(pack) = self.nodes[node].pack else {
            return delta;
        };
        let dependencies = state.dependencies_of(pack).to_vec();
        for dep in dependencies {
            let Some(dep_node) = self.node_for_pack(dep) else {
                log::warn!("No tree node for dependency index {}", dep);
                continue;
            };
            delta.merge(self.select_dependencies(dep_node, state, walk));
            let n = &self.nodes[dep_node];
            if !n.is_leaf() && (!n.selected || n.partial) {
                delta.merge(self.select_children(dep_node, state, walk));
            }
            delta.merge(self.select_one(dep_node, state));
        }
        delta
    }

    fn select_one(&mut self, node: NodeId, state: &mut SelectionState) -> SelectionDelta {
        let Some(pack) = self.nodes[node].pack else {
            return SelectionDelta::default();
        };
        let delta = state.toggle_index(pack, true);
        let n = &mut self.nodes[node];
        n.selected = state.is_selected(pack);
        n.partial = false;
        delta
    }

    /// Set `node` and its whole subtree to `value`. Locked packs keep
    /// their selection.
    fn select_node(
        &mut self,
        node: NodeId,
        value: bool,
        state: &mut SelectionState,
    ) -> SelectionDelta {
        let mut delta = SelectionDelta::default();
        for n in self.depth_first(node).into_iter().rev() {
            let Some(pack) = self.nodes[n].pack else {
                continue;
            };
            delta.merge(state.toggle_index(pack, value));
            let entry = &mut self.nodes[n];
            entry.selected = state.is_selected(pack);
            entry.partial = false;
        }
        delta
    }

    /// Handle a click on the checkbox of `node`.
    ///
    /// - partial node whose subtree has exclude groups: deselect the subtree
    /// - unselected node: select it with its children and dependencies
    /// - selected node: deselect it and its children (dependents untouched)
    pub fn click(&mut self, node: NodeId, state: &mut SelectionState) -> SelectionDelta {
        let Some(current) = self.nodes.get(node) else {
            log::warn!("Click on unknown tree node {}", node);
            return SelectionDelta::default();
        };
        let Some(pack) = current.pack else {
            return SelectionDelta::default();
        };
        if state.is_locked(pack) || !current.enabled {
            log::debug!("Tree node '{}' is not editable, click ignored", current.id);
            return SelectionDelta::default();
        }

        let is_partial = current.partial;
        let is_selected = current.selected && !is_partial;
        let mut delta = SelectionDelta::default();

        if is_partial && self.has_excludes(node, state) {
            delta.merge(self.select_node(node, false, state));
        } else if !is_selected {
            let mut walk = Walk::default();
            delta.merge(self.select_dependencies(node, state, &mut walk));
            delta.merge(self.select_children(node, state, &mut walk));
            delta.merge(self.select_node(node, true, state));
        } else {
            delta.merge(self.select_node(node, false, state));
        }

        delta.merge(self.sync(state));
        self.init_total_size(ROOT, true);
        delta
    }

    // =========================================================================
    // Sizes and results
    // =========================================================================

    /// Recompute `total_size` for the subtree of `node` and return it.
    pub fn init_total_size(&mut self, node: NodeId, mark_changed: bool) -> u64 {
        if node >= self.nodes.len() {
            return 0;
        }
        let own = self.own_bytes(node);
        let mut bytes = own;
        let children = self.nodes[node].children.clone();
        for child in children {
            let size = self.init_total_size(child, mark_changed);
            if self.nodes[child].selected || self.nodes[child].partial {
                bytes += size;
            }
        }
        let n = &mut self.nodes[node];
        if mark_changed {
            n.total_size_changed = n.total_size != bytes;
        }
        n.total_size = bytes;
        bytes
    }

    fn own_bytes(&self, node: NodeId) -> u64 {
        self.pack_bytes.get(node).copied().unwrap_or(0)
    }

    /// Packs the tree reports for installation, in post-order.
    pub fn refresh_packs_to_install(&self, state: &SelectionState) -> Vec<usize> {
        self.depth_first(ROOT)
            .into_iter()
            .filter_map(|n| self.nodes[n].pack)
            .filter(|&p| state.is_selected(p))
            .collect()
    }
}
