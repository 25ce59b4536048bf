//! Apply-all state machine.
//!
//! [`transition`] is pure: given the current [`ApplyState`] and an
//! [`ApplyEvent`] it returns the next state and the [`ApplyEffect`]s the
//! driver must execute. Every path, including failures, funnels into
//! [`ApplyEffect::DeleteBranch`] and ends in [`ApplyState::CleanedUp`].

use serde::{Deserialize, Serialize};

use crate::errors::ApplyError;

// ---------------------------------------------------------------------------
// States
// ---------------------------------------------------------------------------

/// States of one apply-all run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApplyState {
    Init,
    BranchCreated,
    FilesCopied,
    ResolutionsAttempted { applied: usize, total: usize },
    BranchUpdated { applied: usize, total: usize },
    UpdateFailed,
    CleanedUp { success: bool },
}

impl ApplyState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::CleanedUp { .. })
    }
}

impl std::fmt::Display for ApplyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::BranchCreated => write!(f, "branch_created"),
            Self::FilesCopied => write!(f, "files_copied"),
            Self::ResolutionsAttempted { applied, total } => {
                write!(f, "resolutions_attempted({applied}/{total})")
            }
            Self::BranchUpdated { applied, total } => {
                write!(f, "branch_updated({applied}/{total})")
            }
            Self::UpdateFailed => write!(f, "update_failed"),
            Self::CleanedUp { success } => write!(f, "cleaned_up(success={success})"),
        }
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Results fed back into the machine by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyEvent {
    /// The run starts with `pending` confirmed, unapplied resolutions.
    Start { pending: usize },
    BranchCreated,
    FilesCopied,
    ResolutionsWritten { applied: usize, total: usize },
    BranchUpdateSucceeded,
    BranchUpdateFailed { reason: String },
    /// A step before the branch update failed.
    Failed { step: &'static str, reason: String },
    CleanupFinished,
}

impl ApplyEvent {
    fn name(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::BranchCreated => "branch_created",
            Self::FilesCopied => "files_copied",
            Self::ResolutionsWritten { .. } => "resolutions_written",
            Self::BranchUpdateSucceeded => "branch_update_succeeded",
            Self::BranchUpdateFailed { .. } => "branch_update_failed",
            Self::Failed { .. } => "failed",
            Self::CleanupFinished => "cleanup_finished",
        }
    }
}

// ---------------------------------------------------------------------------
// Effects
// ---------------------------------------------------------------------------

/// Comment posted on the pull request at the end of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyNotice {
    NothingPending,
    Applied { applied: usize, total: usize },
    NoneApplied { total: usize },
    Failed { step: String, reason: String },
}

impl ApplyNotice {
    /// Markdown body of the comment.
    pub fn body(&self) -> String {
        match self {
            Self::NothingPending => {
                "No confirmed resolutions are waiting to be applied on this pull request."
                    .to_string()
            }
            Self::Applied { applied, total } if applied == total => format!(
                "Applied all {total} resolution{} to this pull request.",
                plural(*total)
            ),
            Self::Applied { applied, total } => format!(
                "Applied {applied} out of {total} resolutions to this pull request. \
                 The remaining files could not be written and still need attention."
            ),
            Self::NoneApplied { total } => format!(
                "Failed to apply any of the {total} resolution{}. \
                 All resolutions were reset and can be applied again.",
                plural(*total)
            ),
            Self::Failed { step, reason } => format!(
                "Failed to apply resolutions while trying to {step}: {reason}. \
                 All resolutions were reset and can be applied again."
            ),
        }
    }
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

/// Side effects the driver executes, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyEffect {
    CreateBranch,
    CopyUnchangedFiles,
    WriteResolutions,
    UpdatePullRequestBranch,
    ResetApplied,
    PostComment(ApplyNotice),
    DeleteBranch,
}

/// Result of a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub state: ApplyState,
    pub effects: Vec<ApplyEffect>,
}

impl Step {
    fn to(state: ApplyState, effects: Vec<ApplyEffect>) -> Self {
        Self { state, effects }
    }
}

fn failure_effects(notice: ApplyNotice) -> Vec<ApplyEffect> {
    vec![
        ApplyEffect::ResetApplied,
        ApplyEffect::PostComment(notice),
        ApplyEffect::DeleteBranch,
    ]
}

// ---------------------------------------------------------------------------
// Transition function
// ---------------------------------------------------------------------------

/// Compute the next state and effects for `event` in `state`.
pub fn transition(state: &ApplyState, event: ApplyEvent) -> Result<Step, ApplyError> {
    use ApplyEffect as E;
    use ApplyState as S;

    let step = match (*state, event) {
        (S::Init, ApplyEvent::Start { pending: 0 }) => Step::to(
            S::CleanedUp { success: false },
            vec![E::PostComment(ApplyNotice::NothingPending)],
        ),
        (S::Init, ApplyEvent::Start { .. }) => Step::to(S::Init, vec![E::CreateBranch]),
        (S::Init, ApplyEvent::BranchCreated) => {
            Step::to(S::BranchCreated, vec![E::CopyUnchangedFiles])
        }
        (S::BranchCreated, ApplyEvent::FilesCopied) => {
            Step::to(S::FilesCopied, vec![E::WriteResolutions])
        }
        (S::FilesCopied, ApplyEvent::ResolutionsWritten { applied: 0, total }) => Step::to(
            S::ResolutionsAttempted { applied: 0, total },
            failure_effects(ApplyNotice::NoneApplied { total }),
        ),
        (S::FilesCopied, ApplyEvent::ResolutionsWritten { applied, total }) => Step::to(
            S::ResolutionsAttempted { applied, total },
            vec![E::UpdatePullRequestBranch],
        ),
        (S::ResolutionsAttempted { applied, total }, ApplyEvent::BranchUpdateSucceeded)
            if applied > 0 =>
        {
            Step::to(
                S::BranchUpdated { applied, total },
                vec![
                    E::PostComment(ApplyNotice::Applied { applied, total }),
                    E::DeleteBranch,
                ],
            )
        }
        (S::ResolutionsAttempted { applied, .. }, ApplyEvent::BranchUpdateFailed { reason })
            if applied > 0 =>
        {
            Step::to(
                S::UpdateFailed,
                failure_effects(ApplyNotice::Failed {
                    step: "update the pull request branch".into(),
                    reason,
                }),
            )
        }
        (
            S::Init | S::BranchCreated | S::FilesCopied | S::ResolutionsAttempted { .. },
            ApplyEvent::Failed { step, reason },
        ) => Step::to(
            S::UpdateFailed,
            failure_effects(ApplyNotice::Failed {
                step: step.to_string(),
                reason,
            }),
        ),
        (S::BranchUpdated { .. }, ApplyEvent::CleanupFinished) => {
            Step::to(S::CleanedUp { success: true }, Vec::new())
        }
        (S::UpdateFailed, ApplyEvent::CleanupFinished)
        | (S::ResolutionsAttempted { applied: 0, .. }, ApplyEvent::CleanupFinished) => {
            Step::to(S::CleanedUp { success: false }, Vec::new())
        }
        (from, event) => {
            return Err(ApplyError::InvalidTransition {
                from: from.to_string(),
                event: event.name().to_string(),
            })
        }
    };
    Ok(step)
}
