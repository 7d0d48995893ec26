use crate::CoreError;
use serde::Serialize;
use std::fmt;

/// Steps of the reconciliation state machine.
///
/// `Ready` is never persisted; it is re-derived from the backend on every
/// invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProvisionState {
    Absent,
    Creating,
    Attaching,
    Starting,
    AwaitingGuestReady,
    ConfiguringDisplay,
    RunningScripts,
    Ready,
    PromptRebuild,
    Rebuilding,
}

impl fmt::Display for ProvisionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Absent => "absent",
            Self::Creating => "creating",
            Self::Attaching => "attaching",
            Self::Starting => "starting",
            Self::AwaitingGuestReady => "awaiting-guest-ready",
            Self::ConfiguringDisplay => "configuring-display",
            Self::RunningScripts => "running-scripts",
            Self::Ready => "ready",
            Self::PromptRebuild => "prompt-rebuild",
            Self::Rebuilding => "rebuilding",
        };
        f.write_str(s)
    }
}

pub fn validate_transition(from: ProvisionState, to: ProvisionState) -> Result<(), CoreError> {
    use ProvisionState::{
        Absent, Attaching, AwaitingGuestReady, ConfiguringDisplay, Creating, PromptRebuild, Ready,
        Rebuilding, RunningScripts, Starting,
    };
    let valid = matches!(
        (from, to),
        (Absent, Creating | Ready | Starting)
            | (Creating, Attaching)
            | (Attaching, Starting)
            | (Starting, AwaitingGuestReady)
            | (AwaitingGuestReady, ConfiguringDisplay | RunningScripts | Ready)
            | (ConfiguringDisplay, RunningScripts | Ready)
            | (RunningScripts, Ready)
            | (Ready, PromptRebuild | Starting)
            | (PromptRebuild, Rebuilding | Ready)
            | (Rebuilding, Absent)
    );

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}
