use crate::domain::procedure_step::StepState;

// ============================================================================
// Workflow Errors
// ============================================================================
//
// Every rule break fails synchronously. Nothing here is transient, so
// callers roll back their transaction instead of retrying.
//
// ============================================================================

pub type Result<T> = std::result::Result<T, WorkflowError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkflowError {
    /// Business rule violation with a human readable reason.
    #[error("Workflow violation: {0}")]
    Violation(String),

    #[error("Illegal state transition from {from} to {to}")]
    IllegalStateTransition { from: StepState, to: StepState },

    #[error("Required field missing: {0}")]
    MissingField(&'static str),

    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("Merge rejected: {0}")]
    MergeRejected(#[from] MergeRejection),
}

impl WorkflowError {
    pub fn violation(reason: impl Into<String>) -> Self {
        Self::Violation(reason.into())
    }

    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        Self::NotFound { entity, key: key.to_string() }
    }

    /// True for rule breaks, false for lookup and construction failures.
    pub fn is_violation(&self) -> bool {
        matches!(
            self,
            Self::Violation(_) | Self::IllegalStateTransition { .. } | Self::MergeRejected(_)
        )
    }
}

// ============================================================================
// Merge Rejections
// ============================================================================

/// Reason a merge or unmerge precondition failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MergeRejection {
    #[error("cannot merge an order with itself")]
    SameOrder,

    #[error("cannot merge orders with the same accession number")]
    SameAccessionNumber,

    #[error("only orders in the scheduled status can be merged")]
    AlreadyStarted,

    #[error("cannot merge orders belonging to different patients")]
    DifferentPatient,

    #[error("cannot merge orders from different information authorities")]
    DifferentInformationAuthority,

    #[error("cannot merge or unmerge orders in downtime recovery mode")]
    DowntimeRecovery,

    #[error("only orders whose procedures are all scheduled can be merged")]
    ProceduresNotScheduled,

    #[error("order was not merged into the given destination")]
    NotMerged,

    #[error("destination order has already started")]
    DestinationStarted,

    #[error("destination order has cancelled procedures")]
    DestinationHasCancelledProcedures,

    #[error("destination order would be left without procedures of its own")]
    DestinationWouldBeEmpty,

    #[error("a reason must be provided")]
    MissingReason,

    #[error("unmerge is not supported")]
    NotSupported,

    #[error("cannot merge a contact point with itself")]
    SameContactPoint,

    #[error("contact points belong to different practitioners")]
    DifferentPractitioners,

    #[error("cannot merge a deactivated contact point")]
    Deactivated,

    #[error("contact point has already been merged")]
    AlreadyMerged,

    #[error("cannot merge a practitioner with itself")]
    SamePractitioner,

    #[error("practitioner has already been merged")]
    PractitionerAlreadyMerged,

    #[error("cannot merge a deactivated practitioner")]
    PractitionerDeactivated,
}

impl MergeRejection {
    pub fn reason(&self) -> String {
        self.to_string()
    }
}
