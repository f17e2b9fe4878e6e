//! Session lifecycle transition table.

use crate::state_machine::{StateMachine, StateMachineBuilder};
use crate::symbol_enum;

/// Lifecycle state of a device session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SessionState {
    /// No communication with the device.
    Idle,
    /// Opening the transport.
    Opening,
    /// Device reachable, no tools active.
    Connected,
    /// Activating the tool set.
    Activating,
    /// Tools active, not acquiring.
    ToolsActive,
    /// Entering acquisition.
    Starting,
    /// Acquiring; update cycles run.
    Streaming,
    /// Running one update cycle.
    Updating,
    /// Leaving acquisition.
    Stopping,
    /// Releasing the device.
    Closing,
}
symbol_enum!(SessionState {
    Idle,
    Opening,
    Connected,
    Activating,
    ToolsActive,
    Starting,
    Streaming,
    Updating,
    Stopping,
    Closing,
});

/// Inputs accepted by the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SessionInput {
    /// Open the device.
    Open,
    /// Activate a tool set.
    Initialize,
    /// Register one tool.
    AttachTool,
    /// Change the cadence frequency.
    SetFrequency,
    /// Start acquisition.
    Start,
    /// Run one update cycle.
    UpdateStatus,
    /// Stop acquisition.
    Stop,
    /// Reset the device.
    Reset,
    /// Close the device.
    Close,
    /// Previous action succeeded.
    Success,
    /// Previous action failed.
    Failure,
}
symbol_enum!(SessionInput {
    Open,
    Initialize,
    AttachTool,
    SetFrequency,
    Start,
    UpdateStatus,
    Stop,
    Reset,
    Close,
    Success,
    Failure,
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionAction {
    OpenDevice,
    ReportOpened,
    ReportOpenFailed,
    ActivateTools,
    AttachStagedTools,
    ReportInitializeFailed,
    RegisterTool,
    ApplyFrequency,
    StartAcquisition,
    EnterStreaming,
    ReportStartFailed,
    UpdateStatus,
    ReportUpdated,
    ReportUpdateFailed,
    StopAcquisition,
    ReportStopped,
    ResumeStreaming,
    CloseDevice,
    ReportClosed,
    ReportCloseFailed,
    ResetDevice,
    ReportInvalidRequest,
}

pub(crate) type SessionMachine = StateMachine<SessionState, SessionInput, SessionAction>;

/// Build the session transition table.
pub(crate) fn build() -> SessionMachine {
    use SessionAction as A;
    use SessionInput as I;
    use SessionState as S;

    StateMachineBuilder::new("session", S::Idle)
        .transition(S::Idle, I::Open, S::Opening, A::OpenDevice)
        .transition(S::Opening, I::Success, S::Connected, A::ReportOpened)
        .transition(S::Opening, I::Failure, S::Idle, A::ReportOpenFailed)
        .transition(S::Connected, I::Initialize, S::Activating, A::ActivateTools)
        .transition(S::Activating, I::Success, S::ToolsActive, A::AttachStagedTools)
        .transition(S::Activating, I::Failure, S::Connected, A::ReportInitializeFailed)
        .self_transitions(&[S::Connected, S::ToolsActive], I::AttachTool, A::RegisterTool)
        .self_transitions(
            &[S::Idle, S::Connected, S::ToolsActive],
            I::SetFrequency,
            A::ApplyFrequency,
        )
        .transition(S::ToolsActive, I::Start, S::Starting, A::StartAcquisition)
        .transition(S::Starting, I::Success, S::Streaming, A::EnterStreaming)
        .transition(S::Starting, I::Failure, S::ToolsActive, A::ReportStartFailed)
        .transition(S::Streaming, I::UpdateStatus, S::Updating, A::UpdateStatus)
        .transition(S::Updating, I::Success, S::Streaming, A::ReportUpdated)
        .transition(S::Updating, I::Failure, S::Streaming, A::ReportUpdateFailed)
        .transition(S::Streaming, I::Stop, S::Stopping, A::StopAcquisition)
        .transition(S::Stopping, I::Success, S::ToolsActive, A::ReportStopped)
        .transition(S::Stopping, I::Failure, S::Streaming, A::ResumeStreaming)
        .transitions_from(
            &[S::Connected, S::ToolsActive, S::Streaming],
            I::Close,
            S::Closing,
            A::CloseDevice,
        )
        .transition(S::Closing, I::Success, S::Idle, A::ReportClosed)
        .transition(S::Closing, I::Failure, S::Connected, A::ReportCloseFailed)
        .transitions_from(
            &[S::Connected, S::ToolsActive, S::Streaming],
            I::Reset,
            S::Connected,
            A::ResetDevice,
        )
        .build(A::ReportInvalidRequest)
}
