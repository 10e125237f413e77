//! Flat packs table adapter
//!
//! One row per available pack, in pack order. The cell value folds the
//! selection, lock and exclusion state into a single [`PackCellState`].
//! The table holds no selection of its own; it caches cell values and is
//! refreshed from the [`SelectionState`] after every edit.

use super::{SelectionDelta, SelectionState};
use crate::pack::Pack;
use crate::types::PackCellState;

/// Table projection of a selection state.
#[derive(Debug, Clone, Default)]
pub struct PacksTableModel {
    cells: Vec<PackCellState>,
}

impl PacksTableModel {
    pub fn new(state: &SelectionState) -> Self {
        let mut model = Self::default();
        model.refresh(state);
        model
    }

    /// Recompute every cell from the selection state.
    pub fn refresh(&mut self, state: &SelectionState) {
        self.cells = (0..state.len()).map(|idx| cell_state(state, idx)).collect();
    }

    pub fn row_count(&self) -> usize {
        self.cells.len()
    }

    pub fn value_at(&self, row: usize) -> Option<PackCellState> {
        self.cells.get(row).copied()
    }

    pub fn is_editable(&self, row: usize) -> bool {
        self.value_at(row).is_some_and(PackCellState::is_editable)
    }

    /// Apply a checkbox edit on `row`.
    ///
    /// Edits on locked or disabled rows are ignored.
    pub fn set_value_at(
        &mut self,
        row: usize,
        selected: bool,
        state: &mut SelectionState,
    ) -> SelectionDelta {
        if !self.is_editable(row) {
            log::debug!("Row {} is not editable, edit ignored", row);
            return SelectionDelta::default();
        }
        let delta = state.toggle_index(row, selected);
        self.refresh(state);
        delta
    }

    /// Packs whose rows read as selected, in row order
    pub fn packs_to_install<'a>(&self, state: &'a SelectionState) -> Vec<&'a Pack> {
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, cell)| cell.is_selected())
            .filter_map(|(row, _)| state.pack(row))
            .collect()
    }
}

/// Cell value of one pack.
pub fn cell_state(state: &SelectionState, idx: usize) -> PackCellState {
    if state.is_locked(idx) {
        PackCellState::RequiredSelected
    } else if state.is_selected(idx) {
        PackCellState::Selected
    } else if state.is_blocked(idx) {
        PackCellState::Disabled
    } else if state.has_selected_descendant(idx) {
        PackCellState::Partial
    } else {
        PackCellState::Deselected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packs() -> Vec<Pack> {
        vec![
            Pack::new("Core", 0).required().in_exclude_group("base"),
            Pack::new("Minimal", 1).in_exclude_group("base"),
            Pack::new("Docs", 10).depends_on("Core"),
            Pack::new("Tools", 0),
            Pack::new("Profiler", 3).with_parent("Tools"),
        ]
    }

    #[test]
    fn test_cell_states_after_init() {
        let state = SelectionState::new(packs(), Vec::<String>::new());
        let model = PacksTableModel::new(&state);
        assert_eq!(model.row_count(), 5);
        assert_eq!(model.value_at(0), Some(PackCellState::RequiredSelected));
        assert_eq!(model.value_at(1), Some(PackCellState::Disabled));
        assert_eq!(model.value_at(2), Some(PackCellState::Deselected));
        assert_eq!(model.value_at(5), None);
    }

    #[test]
    fn test_set_value_updates_cells() {
        let mut state = SelectionState::new(packs(), Vec::<String>::new());
        let mut model = PacksTableModel::new(&state);

        let delta = model.set_value_at(2, true, &mut state);
        assert_eq!(delta.added, vec![2]);
        assert_eq!(model.value_at(2), Some(PackCellState::Selected));

        model.set_value_at(2, false, &mut state);
        assert_eq!(model.value_at(2), Some(PackCellState::Deselected));
    }

    #[test]
    fn test_locked_and_disabled_rows_reject_edits() {
        let mut state = SelectionState::new(packs(), Vec::<String>::new());
        let mut model = PacksTableModel::new(&state);
        assert!(!model.is_editable(0));
        assert!(!model.is_editable(1));
        assert!(model.set_value_at(0, false, &mut state).is_empty());
        assert!(model.set_value_at(1, true, &mut state).is_empty());
        assert!(state.is_selected(0));
        assert!(!state.is_selected(1));
    }

    #[test]
    fn test_partial_parent_row() {
        let mut state = SelectionState::new(packs(), Vec::<String>::new());
        let mut model = PacksTableModel::new(&state);
        model.set_value_at(4, true, &mut state);
        assert_eq!(model.value_at(3), Some(PackCellState::Partial));
        assert_eq!(model.value_at(4), Some(PackCellState::Selected));
    }

    #[test]
    fn test_packs_to_install_in_row_order() {
        let mut state = SelectionState::new(packs(), ["Profiler"]);
        let mut model = PacksTableModel::new(&state);
        model.set_value_at(2, true, &mut state);
        let names: Vec<&str> =
            model.packs_to_install(&state).iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Core", "Docs", "Profiler"]);
    }
}
