//! Pure transition policy: decides, from (previous state, requested state,
//! options), which marker tasks to insert and which side effects to run.
//!
//! Nothing here touches the store or the network; the engine executes the
//! returned [`TransitionPlan`]. Each predicate is a standalone function so it
//! can be unit-tested without fixtures.

use crate::models::{AdvanceOptions, MessageAudience, TaskOption};
use crate::phase::{Phase, PhaseFamily, PhaseState, Subphase};

/// A marker task the engine inserts before the requested one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreInsert {
    /// Implicit confirm-intent task (entry family shortcut).
    ConfirmIntent,
    /// Reschedule marker, preceded by deletion of the scheduling records
    /// newer than the latest collect-result task.
    RescheduleMarker,
    /// Marker for a skipped selection round.
    SkipMarker(Phase),
}

/// One side effect the engine runs after creating the requested task,
/// in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideEffect {
    RecordEvaluation { passed: bool, retry: bool },
    ReplaceProposedSlots,
    UpsertConfirmedSlot,
    LinkReschedule,
    MarkDualSided,
    MessageCandidate,
}

/// Ordered decisions for one transition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitionPlan {
    pub pre_inserts: Vec<PreInsert>,
    pub effects: Vec<SideEffect>,
}

/// True when the requested subphase is the reserved continuation marker.
pub fn is_continuation(requested: PhaseState) -> bool {
    requested.subphase == Subphase::ContinuePrevious
}

/// Entry-family shortcut: a request-documents or hold transition directly
/// after a literal sound-out first records the skipped confirm-intent step.
/// Both outcomes get the insertion even though one moves forward and one
/// stops the pipeline; product has been asked to confirm the hold case.
pub fn needs_confirm_intent(
    family: PhaseFamily,
    prev: Option<PhaseState>,
    requested: PhaseState,
) -> bool {
    family == PhaseFamily::Entry
        && prev.map(|p| p.subphase) == Some(Subphase::SoundOut)
        && matches!(
            requested.subphase,
            Subphase::RequestDocuments | Subphase::EntryHeld
        )
}

/// The family's explicit fail marker, when it has one.
fn fail_marker(family: PhaseFamily) -> Option<Subphase> {
    match family {
        PhaseFamily::Document => Some(Subphase::ScreeningFailed),
        PhaseFamily::Selection => Some(Subphase::SelectionFailed),
        _ => None,
    }
}

/// Markers that mean "run this step again" when requested within the same
/// phase.
fn retry_markers(family: PhaseFamily) -> &'static [Subphase] {
    match family {
        PhaseFamily::Document => &[Subphase::PrepareDocuments, Subphase::SubmitDocuments],
        PhaseFamily::Selection => &[Subphase::CollectAvailability, Subphase::RequestGuidance],
        _ => &[],
    }
}

/// True when the requested state is the explicit fail marker of its family.
pub fn is_fail(requested: PhaseState) -> bool {
    fail_marker(requested.phase.family()) == Some(requested.subphase)
}

/// True when the requested transition re-attempts the step just judged.
pub fn is_retry(prev: PhaseState, requested: PhaseState) -> bool {
    requested.phase == prev.phase
        && retry_markers(prev.phase.family()).contains(&requested.subphase)
}

/// An evaluation is recorded whenever the step being left was a
/// collect-result marker.
pub fn records_evaluation(prev: Option<PhaseState>, requested: PhaseState) -> Option<SideEffect> {
    let prev = prev?;
    if prev.subphase != Subphase::CollectResult {
        return None;
    }
    let (passed, retry) = if is_fail(requested) {
        (false, false)
    } else if is_retry(prev, requested) {
        (true, true)
    } else {
        (true, false)
    };
    Some(SideEffect::RecordEvaluation { passed, retry })
}

/// True when the requested subphase asks the candidate for availability or
/// schedule confirmation (proposed slots are rewritten).
pub fn requests_scheduling(requested: PhaseState) -> bool {
    matches!(
        requested.subphase,
        Subphase::CollectAvailability | Subphase::ConfirmSchedule
    )
}

/// True when the requested subphase carries the single confirmed slot.
pub fn requests_confirmed_slot(requested: PhaseState) -> bool {
    requested.subphase == Subphase::DayOfDetails
}

/// True when the transition reschedules a confirmed slot in place.
pub fn links_reschedule(
    prev: Option<PhaseState>,
    options: &AdvanceOptions,
) -> bool {
    options.task_option == TaskOption::Reschedule
        && matches!(
            prev.map(|p| p.subphase),
            Some(Subphase::ConfirmSchedule) | Some(Subphase::DayOfDetails)
        )
}

/// True when the transition marks the group dual-sided.
pub fn marks_dual_sided(requested: PhaseState, options: &AdvanceOptions) -> bool {
    options.mark_dual_sided && requested.subphase == Subphase::RequestRecommendation
}

/// Per-family allow-list for candidate-facing messages.
fn message_allowed(family: PhaseFamily, subphase: Subphase) -> bool {
    match family {
        PhaseFamily::Entry => subphase == Subphase::ConfirmIntent,
        PhaseFamily::Document => subphase == Subphase::PrepareDocuments,
        PhaseFamily::Selection => matches!(
            subphase,
            Subphase::CandidateSupport
                | Subphase::CollectAvailability
                | Subphase::ConfirmSchedule
                | Subphase::DayOfDetails
                | Subphase::CollectResult
        ),
        _ => false,
    }
}

/// True when the caller asked for a candidate message and the requested
/// subphase permits one.
pub fn sends_candidate_message(requested: PhaseState, options: &AdvanceOptions) -> bool {
    options.task_option == TaskOption::SendMessage(MessageAudience::ForCandidate)
        && message_allowed(requested.phase.family(), requested.subphase)
}

/// The phase a skip marker records: one past the latest task's phase, pinned
/// to the final round when skipping straight into offer-hold.
pub fn skipped_phase(prev: Option<PhaseState>, requested: PhaseState) -> Option<Phase> {
    if requested.phase == Phase::OfferHold {
        return Some(Phase::FinalRound);
    }
    prev?.phase.next()
}

/// Decide the whole plan for one transition. `prev` is the group's actual
/// latest task state (not the caller's declared one), `requested` is the
/// continuation-resolved target.
pub fn plan_transition(
    family: PhaseFamily,
    prev: Option<PhaseState>,
    requested: PhaseState,
    options: &AdvanceOptions,
) -> TransitionPlan {
    let mut plan = TransitionPlan::default();

    if needs_confirm_intent(family, prev, requested) {
        plan.pre_inserts.push(PreInsert::ConfirmIntent);
    }
    if options.task_option == TaskOption::RescheduleAndDelete {
        plan.pre_inserts.push(PreInsert::RescheduleMarker);
    }
    if options.task_option == TaskOption::SkipSelection {
        if let Some(phase) = skipped_phase(prev, requested) {
            plan.pre_inserts.push(PreInsert::SkipMarker(phase));
        }
    }

    if let Some(effect) = records_evaluation(prev, requested) {
        plan.effects.push(effect);
    }
    if requests_scheduling(requested) {
        plan.effects.push(SideEffect::ReplaceProposedSlots);
    }
    if requests_confirmed_slot(requested) {
        plan.effects.push(SideEffect::UpsertConfirmedSlot);
    }
    if links_reschedule(prev, options) {
        plan.effects.push(SideEffect::LinkReschedule);
    }
    if marks_dual_sided(requested, options) {
        plan.effects.push(SideEffect::MarkDualSided);
    }
    if sends_candidate_message(requested, options) {
        plan.effects.push(SideEffect::MessageCandidate);
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(phase: Phase, subphase: Subphase) -> PhaseState {
        PhaseState::new(phase, subphase).unwrap()
    }

    // ── confirm-intent insertion ─────────────────────────────────────

    #[test]
    fn confirm_intent_inserted_after_literal_sound_out() {
        let prev = Some(state(Phase::Entry, Subphase::SoundOut));
        assert!(needs_confirm_intent(
            PhaseFamily::Entry,
            prev,
            state(Phase::Entry, Subphase::RequestDocuments)
        ));
        assert!(needs_confirm_intent(
            PhaseFamily::Entry,
            prev,
            state(Phase::Entry, Subphase::EntryHeld)
        ));
    }

    #[test]
    fn confirm_intent_not_inserted_when_requested_directly() {
        // The request itself being confirm-intent must not trigger insertion.
        let prev = Some(state(Phase::Entry, Subphase::SoundOut));
        assert!(!needs_confirm_intent(
            PhaseFamily::Entry,
            prev,
            state(Phase::Entry, Subphase::ConfirmIntent)
        ));
    }

    #[test]
    fn confirm_intent_requires_sound_out_predecessor() {
        let prev = Some(state(Phase::Entry, Subphase::ConfirmIntent));
        assert!(!needs_confirm_intent(
            PhaseFamily::Entry,
            prev,
            state(Phase::Entry, Subphase::RequestDocuments)
        ));
        assert!(!needs_confirm_intent(
            PhaseFamily::Entry,
            None,
            state(Phase::Entry, Subphase::RequestDocuments)
        ));
    }

    // ── evaluation derivation ────────────────────────────────────────

    #[test]
    fn evaluation_fail_on_family_fail_marker() {
        let prev = Some(state(Phase::Round1, Subphase::CollectResult));
        assert_eq!(
            records_evaluation(prev, state(Phase::Round1, Subphase::SelectionFailed)),
            Some(SideEffect::RecordEvaluation {
                passed: false,
                retry: false
            })
        );
    }

    #[test]
    fn evaluation_retry_on_same_phase_reattempt() {
        let prev = Some(state(Phase::Round2, Subphase::CollectResult));
        assert_eq!(
            records_evaluation(prev, state(Phase::Round2, Subphase::CollectAvailability)),
            Some(SideEffect::RecordEvaluation {
                passed: true,
                retry: true
            })
        );
        assert_eq!(
            records_evaluation(prev, state(Phase::Round2, Subphase::RequestGuidance)),
            Some(SideEffect::RecordEvaluation {
                passed: true,
                retry: true
            })
        );
    }

    #[test]
    fn evaluation_pass_on_forward_move() {
        let prev = Some(state(Phase::Round2, Subphase::CollectResult));
        assert_eq!(
            records_evaluation(prev, state(Phase::Round3, Subphase::CandidateSupport)),
            Some(SideEffect::RecordEvaluation {
                passed: true,
                retry: false
            })
        );
    }

    #[test]
    fn no_evaluation_without_collect_result_predecessor() {
        let prev = Some(state(Phase::Round2, Subphase::DayOfDetails));
        assert_eq!(
            records_evaluation(prev, state(Phase::Round3, Subphase::CandidateSupport)),
            None
        );
    }

    // ── skip phase computation ───────────────────────────────────────

    #[test]
    fn skip_records_next_phase() {
        let prev = Some(state(Phase::Round2, Subphase::CollectResult));
        assert_eq!(
            skipped_phase(prev, state(Phase::Round4, Subphase::CandidateSupport)),
            Some(Phase::Round3)
        );
    }

    #[test]
    fn skip_into_offer_hold_pins_final_round() {
        let prev = Some(state(Phase::Round2, Subphase::CollectResult));
        assert_eq!(
            skipped_phase(prev, state(Phase::OfferHold, Subphase::OfferApproval)),
            Some(Phase::FinalRound)
        );
    }

    // ── reschedule link ──────────────────────────────────────────────

    #[test]
    fn reschedule_link_requires_confirmed_predecessor_and_option() {
        let options = AdvanceOptions {
            task_option: TaskOption::Reschedule,
            ..Default::default()
        };
        assert!(links_reschedule(
            Some(state(Phase::Round2, Subphase::ConfirmSchedule)),
            &options
        ));
        assert!(links_reschedule(
            Some(state(Phase::Round2, Subphase::DayOfDetails)),
            &options
        ));
        assert!(!links_reschedule(
            Some(state(Phase::Round2, Subphase::CollectAvailability)),
            &options
        ));
        assert!(!links_reschedule(
            Some(state(Phase::Round2, Subphase::ConfirmSchedule)),
            &AdvanceOptions::default()
        ));
    }

    // ── message allow-list ───────────────────────────────────────────

    #[test]
    fn message_gated_by_family_allow_list() {
        let options = AdvanceOptions {
            task_option: TaskOption::SendMessage(MessageAudience::ForCandidate),
            ..Default::default()
        };
        assert!(sends_candidate_message(
            state(Phase::Entry, Subphase::ConfirmIntent),
            &options
        ));
        assert!(sends_candidate_message(
            state(Phase::Round1, Subphase::CollectAvailability),
            &options
        ));
        // collect-result messaging is a selection-family affordance only
        assert!(!sends_candidate_message(
            state(Phase::DocumentScreening, Subphase::CollectResult),
            &options
        ));
        assert!(!sends_candidate_message(
            state(Phase::OfferHold, Subphase::OfferApproval),
            &options
        ));
        assert!(!sends_candidate_message(
            state(Phase::Entry, Subphase::ConfirmIntent),
            &AdvanceOptions::default()
        ));
    }

    // ── full plan ordering ───────────────────────────────────────────

    #[test]
    fn plan_orders_effects_canonically() {
        let prev = Some(state(Phase::Round1, Subphase::CollectResult));
        let options = AdvanceOptions {
            task_option: TaskOption::SendMessage(MessageAudience::ForCandidate),
            ..Default::default()
        };
        let plan = plan_transition(
            PhaseFamily::Selection,
            prev,
            state(Phase::Round2, Subphase::CollectAvailability),
            &options,
        );
        assert!(plan.pre_inserts.is_empty());
        assert_eq!(
            plan.effects,
            vec![
                SideEffect::RecordEvaluation {
                    passed: true,
                    retry: false
                },
                SideEffect::ReplaceProposedSlots,
                SideEffect::MessageCandidate,
            ]
        );
    }

    #[test]
    fn plan_inserts_skip_marker() {
        let prev = Some(state(Phase::Round2, Subphase::CollectResult));
        let options = AdvanceOptions {
            task_option: TaskOption::SkipSelection,
            ..Default::default()
        };
        let plan = plan_transition(
            PhaseFamily::Selection,
            prev,
            state(Phase::Round4, Subphase::CandidateSupport),
            &options,
        );
        assert_eq!(plan.pre_inserts, vec![PreInsert::SkipMarker(Phase::Round3)]);
    }
}
