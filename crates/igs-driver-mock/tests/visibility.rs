//! Per-cycle visibility and transform publication.

mod common;

use common::{manual_options, named_tool, record_session, record_tool, DRIVER};
use igs_core::{
    DeviceSession, FetchBatch, RequestOutcome, StrategyError, Tool, ToolDescriptor, ToolSpec,
    ToolState, Transform,
};
use igs_driver_mock::scripted::{absent, hidden, visible};
use igs_driver_mock::{ScriptedStrategy, SimulatedImager, SimulatedImagerConfig, SIM_IMAGER_DRIVER};
use std::sync::Arc;

fn batch<const N: usize>(records: [(String, igs_core::ToolRecord); N]) -> FetchBatch {
    records.into_iter().collect()
}

/// Streaming session over `strategy` with the named tools attached.
fn streaming(strategy: &Arc<ScriptedStrategy>, names: &[&str]) -> DeviceSession {
    let session = DeviceSession::new(Arc::clone(strategy) as _, manual_options());
    session.request_open().into_result().unwrap();
    let tools: Vec<_> = names
        .iter()
        .enumerate()
        .map(|(n, name)| named_tool(DRIVER, name, n as u32 + 1))
        .collect();
    session.request_initialize(&tools).into_result().unwrap();
    session.request_start().into_result().unwrap();
    session
}

fn assert_translation(transform: &Transform, expected: [f64; 3]) {
    let actual = transform.translation();
    for axis in 0..3 {
        assert!(
            (actual[axis] - expected[axis]).abs() < 1e-9,
            "translation {actual:?} != {expected:?}"
        );
    }
}

#[test]
fn test_tracked_absent_tracked() {
    let strategy = Arc::new(ScriptedStrategy::new(DRIVER).with_cycles([
        batch([visible("probe", [1.0, 2.0, 3.0])]),
        batch([absent("probe")]),
        batch([visible("probe", [4.0, 5.0, 6.0])]),
    ]));
    let session = streaming(&strategy, &["probe"]);
    let probe = session.tool("probe").unwrap();
    let events = record_tool(&probe);

    session.request_update_status().into_result().unwrap();
    assert!(probe.is_updated());
    assert_eq!(probe.state(), ToolState::Tracked);

    session.request_update_status().into_result().unwrap();
    assert!(!probe.is_updated());
    assert_eq!(probe.state(), ToolState::NotAvailable);

    session.request_update_status().into_result().unwrap();
    assert!(probe.is_updated());
    assert_translation(&probe.transform().unwrap(), [4.0, 5.0, 6.0]);

    let visibility: Vec<_> = events
        .kinds()
        .into_iter()
        .filter(|k| *k == "MadeTransitionToTracked" || *k == "NotAvailable")
        .collect();
    assert_eq!(
        visibility,
        vec!["MadeTransitionToTracked", "NotAvailable", "MadeTransitionToTracked"]
    );
    assert_eq!(events.count("TransformModified"), 2);
}

#[test]
fn test_visibility_events_fire_on_edges_only() {
    let mut cycles = Vec::new();
    for _ in 0..5 {
        cycles.push(batch([visible("probe", [0.0, 0.0, 1.0])]));
    }
    cycles.push(batch([hidden("probe")]));
    cycles.push(batch([absent("probe")]));
    cycles.push(batch([hidden("probe")]));
    cycles.push(batch([absent("probe")]));
    cycles.push(batch([hidden("probe")]));
    cycles.push(batch([visible("probe", [0.0, 0.0, 2.0])]));

    let strategy = Arc::new(ScriptedStrategy::new(DRIVER).with_cycles(cycles));
    let session = streaming(&strategy, &["probe"]);
    let probe = session.tool("probe").unwrap();
    let events = record_tool(&probe);

    let mut windows = Vec::new();
    for len in [5, 5, 1] {
        events.clear();
        for _ in 0..len {
            session.request_update_status().into_result().unwrap();
        }
        windows.push((
            events.count("MadeTransitionToTracked"),
            events.count("NotAvailable"),
        ));
    }

    assert_eq!(windows, vec![(1, 0), (0, 1), (1, 0)]);
    assert_eq!(strategy.remaining_cycles(), 0);
}

#[test]
fn test_unreported_tool_keeps_state_but_is_not_updated() {
    let strategy = Arc::new(ScriptedStrategy::new(DRIVER).with_cycles([
        batch([visible("a", [0.0; 3]), visible("b", [0.0; 3])]),
        batch([visible("a", [1.0, 0.0, 0.0])]),
    ]));
    let session = streaming(&strategy, &["a", "b"]);
    let a = session.tool("a").unwrap();
    let b = session.tool("b").unwrap();

    session.request_update_status().into_result().unwrap();
    session.request_update_status().into_result().unwrap();

    assert!(a.is_updated());
    assert!(!b.is_updated());
    assert_eq!(b.state(), ToolState::Tracked);
    assert_translation(&b.transform().unwrap(), [0.0; 3]);
}

#[test]
fn test_samples_for_unknown_tools_are_dropped() {
    let strategy = Arc::new(ScriptedStrategy::new(DRIVER).with_cycles([batch([
        visible("probe", [1.0, 0.0, 0.0]),
        visible("stray", [9.0, 9.0, 9.0]),
    ])]));
    let session = streaming(&strategy, &["probe"]);

    assert!(session.request_update_status().is_completed());
    assert!(session.tool("stray").is_none());
    assert!(session.tool("probe").unwrap().is_tracked());
}

#[test]
fn test_reference_and_world_composition() {
    let strategy = Arc::new(ScriptedStrategy::new(DRIVER).with_cycles([
        batch([
            visible("ref", [0.0, 0.0, 10.0]),
            visible("probe", [5.0, 0.0, 10.0]),
        ]),
        batch([
            visible("ref", [0.0, 0.0, 10.0]),
            visible("probe", [5.0, 0.0, 10.0]),
        ]),
    ]));
    let session = streaming(&strategy, &["probe", "ref"]);
    let reference = session.tool("ref").unwrap();
    let probe = session.tool("probe").unwrap();
    assert!(session.set_reference_tool(Some(&reference)));
    assert_eq!(session.reference_tool_id().as_deref(), Some("ref"));

    session.request_update_status().into_result().unwrap();
    assert_translation(&probe.transform().unwrap(), [5.0, 0.0, 0.0]);
    // The reference tool is reported relative to itself.
    assert_translation(&reference.transform().unwrap(), [0.0, 0.0, 0.0]);

    session.set_world_transform(Some(Transform::from_parts(
        [100.0, 0.0, 0.0],
        [1.0, 0.0, 0.0, 0.0],
    )));
    session.request_update_status().into_result().unwrap();
    assert_translation(&probe.transform().unwrap(), [105.0, 0.0, 0.0]);
}

#[test]
fn test_invisible_reference_withholds_transforms() {
    let strategy = Arc::new(ScriptedStrategy::new(DRIVER).with_cycles([
        batch([
            visible("ref", [0.0, 0.0, 10.0]),
            visible("probe", [5.0, 0.0, 10.0]),
        ]),
        batch([absent("ref"), visible("probe", [7.0, 0.0, 10.0])]),
    ]));
    let session = streaming(&strategy, &["probe", "ref"]);
    let reference = session.tool("ref").unwrap();
    let probe = session.tool("probe").unwrap();
    session.set_reference_tool(Some(&reference));
    let events = record_tool(&probe);

    session.request_update_status().into_result().unwrap();
    session.request_update_status().into_result().unwrap();

    assert!(probe.is_updated());
    assert!(probe.is_tracked());
    assert_translation(&probe.transform().unwrap(), [5.0, 0.0, 0.0]);
    let raw = probe.raw_sample().unwrap();
    assert_translation(raw.as_transform().unwrap(), [7.0, 0.0, 10.0]);
    assert_eq!(events.count("TransformModified"), 1);
    assert_eq!(reference.state(), ToolState::NotAvailable);
}

#[test]
fn test_detaching_the_reference_releases_other_tools() {
    let strategy = Arc::new(
        ScriptedStrategy::new(DRIVER)
            .with_cycles([
                batch([
                    visible("ref", [0.0, 0.0, 10.0]),
                    visible("probe", [5.0, 0.0, 10.0]),
                ]),
                // The device keeps reporting the detached reference.
                batch([
                    visible("ref", [0.0, 0.0, 10.0]),
                    visible("probe", [7.0, 0.0, 10.0]),
                ]),
            ])
            .repeating_last(),
    );
    let session = streaming(&strategy, &["probe", "ref"]);
    let reference = session.tool("ref").unwrap();
    let probe = session.tool("probe").unwrap();
    session.set_reference_tool(Some(&reference));

    session.request_update_status().into_result().unwrap();
    assert_translation(&probe.transform().unwrap(), [5.0, 0.0, 0.0]);

    assert!(session.detach_tool(&reference).is_completed());
    assert_eq!(session.reference_tool_id(), None);
    assert!(session.reference_tool().is_none());

    for _ in 0..3 {
        session.request_update_status().into_result().unwrap();
        assert!(probe.is_updated());
        assert_translation(&probe.transform().unwrap(), [7.0, 0.0, 10.0]);
    }
    assert!(!reference.is_updated());
}

#[test]
fn test_close_clears_the_reference() {
    let strategy = Arc::new(
        ScriptedStrategy::new(DRIVER)
            .with_cycles([batch([
                visible("ref", [0.0, 0.0, 10.0]),
                visible("probe", [5.0, 0.0, 10.0]),
            ])])
            .repeating_last(),
    );
    let session = streaming(&strategy, &["probe", "ref"]);
    let reference = session.tool("ref").unwrap();
    session.set_reference_tool(Some(&reference));

    session.request_close().into_result().unwrap();
    assert_eq!(session.reference_tool_id(), None);
}

#[test]
fn test_calibration_is_applied_before_the_reference() {
    let strategy = Arc::new(
        ScriptedStrategy::new(DRIVER)
            .with_cycles([batch([visible("needle", [0.0, 0.0, 50.0])])]),
    );
    let session = DeviceSession::new(Arc::clone(&strategy) as _, manual_options());
    session.request_open().into_result().unwrap();
    let needle = Tool::new(
        ToolDescriptor::new(DRIVER, ToolSpec::Named { name: "needle".into() })
            .with_calibration(Transform::from_parts([0.0, 0.0, -120.0], [1.0, 0.0, 0.0, 0.0])),
    );
    needle.request_configure().unwrap();
    session
        .request_initialize(&[Arc::clone(&needle)])
        .into_result()
        .unwrap();
    session.request_start().into_result().unwrap();

    session.request_update_status().into_result().unwrap();
    assert_translation(&needle.transform().unwrap(), [0.0, 0.0, -70.0]);
}

#[test]
fn test_detach_while_streaming_purges_the_tool() {
    let strategy = Arc::new(
        ScriptedStrategy::new(DRIVER)
            .with_cycles([batch([
                visible("a", [1.0, 0.0, 0.0]),
                visible("b", [2.0, 0.0, 0.0]),
            ])])
            .repeating_last(),
    );
    let session = streaming(&strategy, &["a", "b"]);
    let a = session.tool("a").unwrap();
    let b = session.tool("b").unwrap();
    let sessions = record_session(&session);
    session.request_update_status().into_result().unwrap();

    assert!(session.detach_tool(&b).is_completed());
    assert_eq!(b.state(), ToolState::Configured);
    assert!(!b.is_updated());
    assert_eq!(strategy.container_ids(), vec!["a"]);
    assert_eq!(sessions.count("ToolDetached"), 1);

    // Later cycles still report "b"; the session ignores it.
    session.request_update_status().into_result().unwrap();
    assert!(a.is_updated());
    assert!(!b.is_updated());
    assert_eq!(b.state(), ToolState::Configured);
    assert_eq!(session.attached_tools().len(), 1);
}

#[test]
fn test_detach_failure_keeps_the_tool_attached() {
    let strategy = Arc::new(
        ScriptedStrategy::new(DRIVER)
            .with_cycles([batch([visible("a", [1.0, 0.0, 0.0])])])
            .repeating_last(),
    );
    let session = streaming(&strategy, &["a"]);
    let a = session.tool("a").unwrap();
    session.request_update_status().into_result().unwrap();
    strategy.fail_on(
        "remove_tool_from_containers",
        StrategyError::communication("bus busy"),
    );
    let events = record_tool(&a);

    let outcome = session.detach_tool(&a);
    assert!(matches!(outcome, RequestOutcome::Failed(ref m) if m.contains("bus busy")));
    assert_eq!(a.state(), ToolState::Attached);
    assert!(session.tool("a").is_some());
    assert_eq!(events.kinds(), vec!["DetachmentFailed"]);

    // Visibility is derived again on the next cycle.
    session.request_update_status().into_result().unwrap();
    assert_eq!(a.state(), ToolState::Tracked);
}

#[test]
fn test_failed_fetch_keeps_streaming() {
    let strategy = Arc::new(ScriptedStrategy::new(DRIVER));
    strategy.push_fetch_error(StrategyError::communication("crc mismatch"));
    strategy.push_cycle(batch([visible("probe", [0.0; 3])]));
    let session = streaming(&strategy, &["probe"]);
    let events = record_session(&session);

    let outcome = session.request_update_status();
    assert!(matches!(outcome, RequestOutcome::Failed(ref m) if m.contains("crc mismatch")));
    assert_eq!(session.state(), igs_core::SessionState::Streaming);

    assert!(session.request_update_status().is_completed());
    assert_eq!(events.kinds(), vec!["UpdateFailed", "Updated"]);
    assert_eq!(session.acquisition_stats().failures, 1);
}

#[test]
fn test_update_outside_streaming_is_rejected() {
    let strategy = Arc::new(ScriptedStrategy::new(DRIVER));
    let session = DeviceSession::new(Arc::clone(&strategy) as _, manual_options());
    assert!(session.request_update_status().is_rejected());
    assert_eq!(strategy.fetch_count(), 0);
}

#[test]
fn test_imager_publishes_frames() {
    let imager = Arc::new(SimulatedImager::with_config(SimulatedImagerConfig {
        width: 32,
        height: 24,
        ..SimulatedImagerConfig::default()
    }));
    let session = DeviceSession::new(Arc::clone(&imager) as _, manual_options());
    session.request_open().into_result().unwrap();
    let us = Tool::new(ToolDescriptor::new(
        SIM_IMAGER_DRIVER,
        ToolSpec::Video {
            name: "ultrasound".into(),
            width: 32,
            height: 24,
            channels: 1,
        },
    ));
    us.request_configure().unwrap();
    session
        .request_initialize(&[Arc::clone(&us)])
        .into_result()
        .unwrap();
    session.request_start().into_result().unwrap();
    let events = record_tool(&us);

    session.request_update_status().into_result().unwrap();
    session.request_update_status().into_result().unwrap();

    let frame = us.frame().unwrap();
    assert_eq!(frame.pixels().len(), 32 * 24);
    assert!(us.transform().is_none());
    assert_eq!(events.count("FrameModified"), 2);
    assert_eq!(imager.frames_grabbed(), 2);
}
