//! Session transition table properties.

use igs_core::state_machine::Symbol;
use igs_core::{DeviceSession, SessionInput, SessionState};
use std::collections::HashSet;

#[test]
fn every_state_input_pair_has_exactly_one_row() {
    let table = DeviceSession::transition_table();
    let mut seen = HashSet::new();
    for row in &table {
        assert!(
            seen.insert((row.from, row.input)),
            "duplicate row for {} / {}",
            row.from,
            row.input
        );
    }
    for &state in SessionState::all() {
        for &input in SessionInput::all() {
            assert!(seen.contains(&(state, input)), "missing {state} / {input}");
        }
    }
}

#[test]
fn invalid_rows_never_change_state() {
    for row in DeviceSession::transition_table() {
        if !row.valid {
            assert_eq!(row.from, row.to, "{} / {}", row.from, row.input);
        }
    }
}

#[test]
fn start_is_only_valid_from_tools_active() {
    let valid: Vec<_> = DeviceSession::transition_table()
        .into_iter()
        .filter(|r| r.input == SessionInput::Start && r.valid)
        .collect();
    assert_eq!(valid.len(), 1);
    assert_eq!(valid[0].from, SessionState::ToolsActive);
    assert_eq!(valid[0].to, SessionState::Starting);
}

#[test]
fn lifecycle_rows_match_documented_table() {
    let table = DeviceSession::transition_table();
    let to = |from, input| {
        table
            .iter()
            .find(|r| r.from == from && r.input == input && r.valid)
            .map(|r| r.to)
    };

    use SessionInput as I;
    use SessionState as S;
    assert_eq!(to(S::Idle, I::Open), Some(S::Opening));
    assert_eq!(to(S::Opening, I::Failure), Some(S::Idle));
    assert_eq!(to(S::Activating, I::Failure), Some(S::Connected));
    assert_eq!(to(S::Updating, I::Failure), Some(S::Streaming));
    assert_eq!(to(S::Stopping, I::Failure), Some(S::Streaming));
    assert_eq!(to(S::Closing, I::Failure), Some(S::Connected));
    assert_eq!(to(S::Streaming, I::Reset), Some(S::Connected));
    assert_eq!(to(S::Streaming, I::Close), Some(S::Closing));
    assert_eq!(to(S::Streaming, I::AttachTool), None);
    assert_eq!(to(S::Streaming, I::SetFrequency), None);
    assert_eq!(to(S::Idle, I::SetFrequency), Some(S::Idle));
}

#[test]
fn dot_export_contains_every_valid_edge() {
    let dot = DeviceSession::state_machine_dot(false);
    let valid = DeviceSession::transition_table()
        .into_iter()
        .filter(|r| r.valid)
        .count();
    assert_eq!(dot.matches("style=solid").count(), valid);
    assert!(!dot.contains("style=dashed"));
}
