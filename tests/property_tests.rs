//! Property-Based Tests for wizard-panels
//!
//! Uses proptest over random pack graphs and toggle sequences.
//!
//! These tests verify:
//! - Required packs are always selected
//! - Selecting a pack selects its dependency closure
//! - Exclude groups hold at most one user-selected pack
//! - Byte accounting matches the selected set
//! - The pack tree agrees with the model and never drops a needed dependency
//! - Automation snapshots replay idempotently
//! - Enum string round-trips

use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use std::collections::{BTreeMap, BTreeSet};

use wizard_panels::install_data::InstallData;
use wizard_panels::pack::Pack;
use wizard_panels::selection::SelectionState;
use wizard_panels::selection::tree::PackTree;
use wizard_panels::substitute::VariableSubstitutor;
use wizard_panels::types::{DeselectPolicy, JobAction, PackCellState};

// =============================================================================
// Strategies
// =============================================================================

/// Random packs `p0..pN` with dependencies, exclude groups and required flags
fn packs_strategy() -> impl Strategy<Value = Vec<Pack>> {
    (2usize..8)
        .prop_flat_map(|n| {
            prop::collection::vec(
                (
                    prop::bool::weighted(0.2),
                    prop::collection::vec(0..n, 0..3),
                    prop::option::of(0u8..2),
                ),
                n,
            )
        })
        .prop_map(|specs| {
            specs
                .into_iter()
                .enumerate()
                .map(|(i, (required, deps, group))| {
                    let mut pack = Pack::new(format!("p{}", i), (i as u64 + 1) * 10);
                    if required {
                        pack = pack.required();
                    }
                    for dep in deps {
                        pack = pack.depends_on(format!("p{}", dep));
                    }
                    if let Some(group) = group {
                        pack = pack.in_exclude_group(format!("g{}", group));
                    }
                    pack
                })
                .collect()
        })
}

fn ops_strategy() -> impl Strategy<Value = Vec<(usize, bool)>> {
    prop::collection::vec((0usize..8, any::<bool>()), 0..20)
}

fn policy_strategy() -> impl Strategy<Value = DeselectPolicy> {
    prop_oneof![Just(DeselectPolicy::Lenient), Just(DeselectPolicy::Cascade)]
}

fn check_invariants(state: &SelectionState) -> Result<(), TestCaseError> {
    for (idx, pack) in state.packs().iter().enumerate() {
        if pack.required {
            prop_assert!(state.is_selected(idx), "required pack {} not selected", pack.name);
        }
    }

    let mut groups: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
    for (idx, pack) in state.packs().iter().enumerate() {
        if let Some(group) = pack.group() {
            let entry = groups.entry(group).or_default();
            if state.is_locked(idx) {
                entry.0 += 1;
            } else if state.is_selected(idx) {
                entry.1 += 1;
            }
        }
    }
    for (group, (locked, selected)) in groups {
        prop_assert!(selected <= 1, "group {} has {} selected packs", group, selected);
        if locked > 0 {
            prop_assert_eq!(selected, 0, "group {} is held by a required pack", group);
        }
    }

    let expected: u64 = state.selected_packs().map(|p| p.nbytes).sum();
    prop_assert_eq!(state.selected_bytes(), expected);
    Ok(())
}

// =============================================================================
// Selection Properties
// =============================================================================

proptest! {
    /// Invariants hold after every toggle, under both deselect policies
    #[test]
    fn selection_invariants_hold(
        packs in packs_strategy(),
        ops in ops_strategy(),
        policy in policy_strategy(),
    ) {
        let n = packs.len();
        let mut state = SelectionState::with_policy(packs, Vec::<String>::new(), policy);
        check_invariants(&state)?;

        for (idx, desired) in ops {
            let idx = idx % n;
            state.toggle_index(idx, desired);
            check_invariants(&state)?;

            if desired && state.is_selected(idx) {
                for dep in state.dependency_closure(idx) {
                    prop_assert!(state.is_selected(dep), "dependency {} of {} missing", dep, idx);
                }
            }
        }
    }

    /// Deselect then reselect restores the byte total
    #[test]
    fn bytes_round_trip(packs in packs_strategy(), pick in 0usize..8) {
        let idx = pick % packs.len();
        let mut state = SelectionState::new(packs, Vec::<String>::new());
        state.toggle_index(idx, true);
        let before = state.selected_bytes();
        let delta = state.toggle_index(idx, false);
        if !delta.is_empty() {
            prop_assert!(state.selected_bytes() < before);
        }
        state.toggle_index(idx, true);
        prop_assert_eq!(state.selected_bytes(), before);
    }

    /// Replaying a snapshot onto its own state changes nothing
    #[test]
    fn snapshot_replay_is_idempotent(packs in packs_strategy(), ops in ops_strategy()) {
        let n = packs.len();
        let mut state = SelectionState::new(packs.clone(), Vec::<String>::new());
        for (idx, desired) in ops {
            state.toggle_index(idx % n, desired);
        }

        let snapshot = state.snapshot_for_automation();
        let before = state.selected_indices();
        prop_assert!(state.apply_automation_snapshot(&snapshot, &InstallData::new()).is_empty());
        prop_assert_eq!(state.selected_indices(), before.clone());

        let mut replayed = SelectionState::new(packs, Vec::<String>::new());
        replayed.apply_automation_snapshot(&snapshot, &InstallData::new());
        prop_assert_eq!(replayed.selected_indices(), before);
    }
}

// =============================================================================
// Tree Properties
// =============================================================================

/// Random packs with parent links and dependencies; exclude groups only when `groups`
fn tree_packs_strategy(groups: bool) -> impl Strategy<Value = Vec<Pack>> {
    (2usize..8)
        .prop_flat_map(|n| {
            prop::collection::vec(
                (
                    prop::bool::weighted(0.15),
                    prop::collection::vec(0..n, 0..3),
                    prop::option::of(0..n),
                    prop::option::of(0u8..2),
                    0u64..3,
                ),
                n,
            )
        })
        .prop_map(move |specs| {
            specs
                .into_iter()
                .enumerate()
                .map(|(i, (required, deps, parent, group, size))| {
                    // Zero-byte packs make partial parents drop out of the model
                    let mut pack = Pack::new(format!("p{}", i), size * 10);
                    if required {
                        pack = pack.required();
                    }
                    for dep in deps {
                        pack = pack.depends_on(format!("p{}", dep));
                    }
                    if let Some(parent) = parent {
                        pack = pack.with_parent(format!("p{}", parent));
                    }
                    if let (true, Some(group)) = (groups, group) {
                        pack = pack.in_exclude_group(format!("g{}", group));
                    }
                    pack
                })
                .collect()
        })
}

/// (click in the tree?, pack, desired state for a flat toggle)
fn tree_ops_strategy() -> impl Strategy<Value = Vec<(bool, usize, bool)>> {
    prop::collection::vec((any::<bool>(), 0usize..8, any::<bool>()), 0..16)
}

fn unmet(state: &SelectionState) -> BTreeSet<(usize, usize)> {
    state
        .unmet_dependencies()
        .into_iter()
        .map(|u| (u.pack, u.dependency))
        .collect()
}

fn check_tree(tree: &PackTree, state: &SelectionState) -> Result<(), TestCaseError> {
    check_invariants(state)?;
    let mut installed = tree.refresh_packs_to_install(state);
    installed.sort();
    prop_assert_eq!(installed, state.selected_indices());
    Ok(())
}

proptest! {
    /// Tree clicks and flat toggles followed by a sync keep the model invariants
    #[test]
    fn tree_and_model_agree(
        packs in tree_packs_strategy(true),
        ops in tree_ops_strategy(),
        policy in policy_strategy(),
    ) {
        let n = packs.len();
        let mut state = SelectionState::with_policy(packs, Vec::<String>::new(), policy);
        let mut tree = PackTree::build(&mut state);
        check_tree(&tree, &state)?;

        for (click, idx, desired) in ops {
            let idx = idx % n;
            if click {
                let node = tree.node_for_pack(idx).expect("every pack has a node");
                tree.click(node, &mut state);
            } else {
                state.toggle_index(idx, desired);
                tree.sync(&mut state);
            }
            check_tree(&tree, &state)?;
        }
    }

    /// Building or syncing the tree never leaves a selected pack without a
    /// dependency it had before
    #[test]
    fn tree_sync_keeps_dependencies(
        packs in tree_packs_strategy(false),
        initial in prop::collection::vec(0usize..8, 0..4),
        ops in tree_ops_strategy(),
        policy in policy_strategy(),
    ) {
        let n = packs.len();
        let initial: Vec<String> = initial.iter().map(|i| format!("p{}", i % n)).collect();
        let mut state = SelectionState::with_policy(packs, initial, policy);

        let before = unmet(&state);
        let mut tree = PackTree::build(&mut state);
        prop_assert!(unmet(&state).is_subset(&before), "build broke dependencies");

        for (click, idx, desired) in ops {
            let idx = idx % n;
            if click {
                let node = tree.node_for_pack(idx).expect("every pack has a node");
                tree.click(node, &mut state);
            } else {
                state.toggle_index(idx, desired);
            }
            let before = unmet(&state);
            tree.sync(&mut state);
            prop_assert!(unmet(&state).is_subset(&before), "sync broke dependencies");
            check_tree(&tree, &state)?;
        }
    }
}

// =============================================================================
// Enum Property Tests
// =============================================================================

fn job_action_strategy() -> impl Strategy<Value = JobAction> {
    prop_oneof![
        Just(JobAction::Continue),
        Just(JobAction::Abort),
        Just(JobAction::Reconfigure),
    ]
}

fn cell_state_strategy() -> impl Strategy<Value = PackCellState> {
    prop_oneof![
        Just(PackCellState::Selected),
        Just(PackCellState::Deselected),
        Just(PackCellState::RequiredSelected),
        Just(PackCellState::Disabled),
        Just(PackCellState::Partial),
    ]
}

proptest! {
    /// JobAction: to_string → parse round-trip is identity
    #[test]
    fn job_action_roundtrip(action in job_action_strategy()) {
        let parsed: JobAction = action.to_string().parse().expect("Should parse");
        prop_assert_eq!(action, parsed);
    }

    /// JobAction: the first letter alone parses to the same action
    #[test]
    fn job_action_short_form(action in job_action_strategy()) {
        let short = &action.to_string()[..1];
        let parsed: JobAction = short.parse().expect("Should parse");
        prop_assert_eq!(action, parsed);
    }

    /// PackCellState: editable exactly when the legacy code is non-negative
    #[test]
    fn cell_state_editability(code in cell_state_strategy()) {
        prop_assert_eq!(code.is_editable(), code.code() >= 0);
    }
}

// =============================================================================
// Substitution Properties
// =============================================================================

proptest! {
    /// Text without `$` is never changed
    #[test]
    fn substitution_leaves_plain_text(text in "[^$]{0,40}") {
        let data = InstallData::new().with_variable("A", "x");
        let subst = VariableSubstitutor::new(&data);
        prop_assert_eq!(subst.substitute(&text), text);
    }
}
