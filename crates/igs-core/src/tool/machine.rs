//! Tool lifecycle transition table.

use crate::state_machine::{StateMachine, StateMachineBuilder};
use crate::symbol_enum;

/// Lifecycle state of a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ToolState {
    /// Not configured.
    Idle,
    /// Configuration is being validated.
    Configuring,
    /// Configured, not attached to a session.
    Configured,
    /// Waiting for the session to accept the tool.
    Attaching,
    /// Attached, session not streaming.
    Attached,
    /// Waiting for the session to release the tool.
    Detaching,
    /// Streaming, tool not seen by the device.
    NotAvailable,
    /// Streaming, tool seen by the device.
    Tracked,
}
symbol_enum!(ToolState {
    Idle,
    Configuring,
    Configured,
    Attaching,
    Attached,
    Detaching,
    NotAvailable,
    Tracked,
});

/// Inputs accepted by the tool state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ToolInput {
    /// Validate the descriptor.
    Configure,
    /// Register with a session.
    AttachToSession,
    /// Leave the session.
    Detach,
    /// Session entered streaming.
    StreamingStarted,
    /// Session left streaming.
    StreamingStopped,
    /// Device reports the tool present.
    Tracked,
    /// Device reports the tool missing.
    NotAvailable,
    /// Previous action succeeded.
    Success,
    /// Previous action failed.
    Failure,
}
symbol_enum!(ToolInput {
    Configure,
    AttachToSession,
    Detach,
    StreamingStarted,
    StreamingStopped,
    Tracked,
    NotAvailable,
    Success,
    Failure,
});

/// Work the tool performs after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ToolAction {
    Validate,
    ReportConfigured,
    ReportConfigurationFailed,
    RequestAttach,
    ReportAttached,
    ReportAttachmentFailed,
    RequestDetach,
    ReportDetached,
    ReportDetachmentFailed,
    ReportStreamingStarted,
    ReportStreamingStopped,
    ReportTracked,
    ReportNotAvailable,
    Nothing,
    ReportInvalidRequest,
}

/// Build the tool transition table.
pub(crate) fn build() -> StateMachine<ToolState, ToolInput, ToolAction> {
    use ToolAction as A;
    use ToolInput as I;
    use ToolState as S;

    StateMachineBuilder::new("tool", S::Idle)
        .transition(S::Idle, I::Configure, S::Configuring, A::Validate)
        .transition(S::Configuring, I::Success, S::Configured, A::ReportConfigured)
        .transition(S::Configuring, I::Failure, S::Idle, A::ReportConfigurationFailed)
        .transition(S::Configured, I::AttachToSession, S::Attaching, A::RequestAttach)
        .transition(S::Attaching, I::Success, S::Attached, A::ReportAttached)
        .transition(S::Attaching, I::Failure, S::Configured, A::ReportAttachmentFailed)
        .transition(S::Attached, I::StreamingStarted, S::NotAvailable, A::ReportStreamingStarted)
        .transition(S::Attached, I::NotAvailable, S::NotAvailable, A::ReportNotAvailable)
        .transition(S::Attached, I::Tracked, S::Tracked, A::ReportTracked)
        .transition(S::NotAvailable, I::Tracked, S::Tracked, A::ReportTracked)
        .transition(S::NotAvailable, I::NotAvailable, S::NotAvailable, A::Nothing)
        .transition(S::Tracked, I::Tracked, S::Tracked, A::Nothing)
        .transition(S::Tracked, I::NotAvailable, S::NotAvailable, A::ReportNotAvailable)
        .transitions_from(
            &[S::Tracked, S::NotAvailable],
            I::StreamingStopped,
            S::Attached,
            A::ReportStreamingStopped,
        )
        .transitions_from(
            &[S::Attached, S::NotAvailable, S::Tracked],
            I::Detach,
            S::Detaching,
            A::RequestDetach,
        )
        .self_transitions(&[S::Detaching], I::Tracked, A::Nothing)
        .self_transitions(&[S::Detaching], I::NotAvailable, A::Nothing)
        .transition(S::Detaching, I::Success, S::Configured, A::ReportDetached)
        .transition(S::Detaching, I::Failure, S::Attached, A::ReportDetachmentFailed)
        .build(A::ReportInvalidRequest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::Symbol;

    #[test]
    fn table_is_total() {
        let machine = build();
        assert!(machine.is_total());
        assert_eq!(
            machine.transitions().count(),
            ToolState::all().len() * ToolInput::all().len()
        );
    }

    #[test]
    fn attach_only_from_configured() {
        let machine = build();
        for &state in ToolState::all() {
            let entry = machine.lookup(state, ToolInput::AttachToSession).unwrap();
            assert_eq!(entry.valid, state == ToolState::Configured, "{state}");
        }
    }
}
