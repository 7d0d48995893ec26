use igloo_schema::Fingerprint;
use serde::Serialize;

/// What the engine knows when the configuration tree changed since the
/// instance was provisioned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriftNotice {
    pub name: String,
    pub stored: Fingerprint,
    pub current: Fingerprint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DriftDecision {
    /// Destroy and re-provision from scratch.
    Rebuild,
    /// Keep the instance and record the current fingerprint.
    Accept,
}

/// How drift is resolved. `Prompt` lets the caller ask interactively.
pub enum DriftPolicy<'a> {
    AlwaysRebuild,
    NeverRebuild,
    Prompt(Box<dyn FnMut(&DriftNotice) -> bool + 'a>),
}

impl DriftPolicy<'_> {
    pub fn decide(&mut self, notice: &DriftNotice) -> DriftDecision {
        let rebuild = match self {
            Self::AlwaysRebuild => true,
            Self::NeverRebuild => false,
            Self::Prompt(ask) => ask(notice),
        };
        if rebuild {
            DriftDecision::Rebuild
        } else {
            DriftDecision::Accept
        }
    }
}

impl std::fmt::Debug for DriftPolicy<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlwaysRebuild => f.write_str("AlwaysRebuild"),
            Self::NeverRebuild => f.write_str("NeverRebuild"),
            Self::Prompt(_) => f.write_str("Prompt(..)"),
        }
    }
}
