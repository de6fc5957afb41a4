//! Typed error hierarchy for the pipeline engine.
//!
//! Two top-level enums cover the two failure domains:
//! - `EngineError` — fatal transition failures (abort the advance)
//! - `NotifyError` — outbound channel failures (logged, never propagated as
//!   the transition's result)

use thiserror::Error;

use crate::phase::{InvalidPhaseState, PhaseFamily, PhaseState};

/// Fatal errors from the transition engine.
///
/// Any of these aborts the remaining steps of the advance. Partial writes
/// performed before the failure are not rolled back; readers must tolerate a
/// task with partially-applied side effects.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The caller's declared current phase does not belong to the handler's
    /// family. No writes are attempted.
    #[error("phase mismatch: handler for {expected} cannot advance from {current}")]
    PhaseMismatch {
        expected: PhaseFamily,
        current: PhaseState,
    },

    /// A referenced row required by the transition does not exist.
    #[error("{entity} not found for group {group_id}")]
    NotFound {
        entity: &'static str,
        group_id: i64,
    },

    /// The (phase, subphase) pair supplied by the caller is not constructible.
    #[error(transparent)]
    InvalidState(#[from] InvalidPhaseState),

    /// An entity-store or lookup-service call failed.
    #[error("dependency failure: {0}")]
    Dependency(#[source] anyhow::Error),

    /// Wrapper the batch runner uses to annotate the first failing item.
    #[error("batch item {position} ({phase_label}) failed: {source}")]
    BatchItem {
        /// 1-based position inside the batch.
        position: usize,
        phase_label: &'static str,
        #[source]
        source: Box<EngineError>,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    /// Wrap a store/lookup failure.
    pub fn dependency(err: anyhow::Error) -> Self {
        Self::Dependency(err)
    }
}

/// Non-fatal errors from the outbound notification channels.
///
/// The engine logs these and reports the transition as successful anyway.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("chat delivery failed: {0}")]
    Chat(#[source] anyhow::Error),

    #[error("email delivery failed: {0}")]
    Email(#[source] anyhow::Error),

    #[error("push delivery failed: {0}")]
    Push(#[source] anyhow::Error),

    /// The candidate has neither an active chat identity nor an email.
    #[error("candidate {candidate_id} has no reachable channel")]
    Unreachable { candidate_id: i64 },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::{Phase, Subphase};

    #[test]
    fn phase_mismatch_names_both_sides() {
        let err = EngineError::PhaseMismatch {
            expected: PhaseFamily::Selection,
            current: PhaseState::new(Phase::Entry, Subphase::SoundOut).unwrap(),
        };
        let text = err.to_string();
        assert!(text.contains("selection"));
        assert!(text.contains("entry"));
    }

    #[test]
    fn not_found_carries_entity_and_group() {
        let err = EngineError::NotFound {
            entity: "forecast entry",
            group_id: 42,
        };
        assert!(err.to_string().contains("forecast entry"));
        assert!(err.to_string().contains("42"));
    }

    #[test]
    fn batch_item_reports_one_based_position_and_label() {
        let inner = EngineError::NotFound {
            entity: "task",
            group_id: 9,
        };
        let err = EngineError::BatchItem {
            position: 2,
            phase_label: Phase::Round1.label(),
            source: Box::new(inner),
        };
        let text = err.to_string();
        assert!(text.contains("2"));
        assert!(text.contains("first round"));
    }

    #[test]
    fn invalid_state_converts() {
        let invalid = PhaseState::new(Phase::Entry, Subphase::CollectResult).unwrap_err();
        let err: EngineError = invalid.into();
        assert!(matches!(err, EngineError::InvalidState(_)));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        let engine_err = EngineError::NotFound {
            entity: "task",
            group_id: 1,
        };
        assert_std_error(&engine_err);
        let notify_err = NotifyError::Unreachable { candidate_id: 3 };
        assert_std_error(&notify_err);
    }
}
