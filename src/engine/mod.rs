//! The phase-transition engine.
//!
//! One advance method per phase family, all delegating to a shared core:
//! guard the declared phase, resolve the continuation special-case, let
//! [`policy`] decide the plan, insert marker tasks, create the requested
//! task, execute side effects in order, then run bookkeeping and the
//! terminal check.
//!
//! Failure policy: store and lookup failures abort the transition
//! (fail-fast, no rollback of writes already made); the candidate-message
//! and operator-push legs are isolated — their errors are logged via
//! `tracing` and never surface as the transition's result.

pub mod batch;
mod evaluation;
pub mod policy;
mod scheduling;

pub use batch::BatchRunner;

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::errors::EngineError;
use crate::flow::FlowPatternLookup;
use crate::identity::IdentityResolver;
use crate::models::{
    AdvanceOptions, AdvanceRequest, ConfidenceBucket, MessageChannel, NewMessageLog, NewTask,
    OperatorRole, Task, TaskGroup,
};
use crate::notify::NotificationSink;
use crate::phase::{Phase, PhaseFamily, PhaseState, Subphase};
use crate::store::EntityStore;
use policy::{PreInsert, SideEffect};

pub(crate) const PUSH_TITLE: &str = "Pipeline update";

/// The engine. Holds the store plus the three external lookup/delivery seams.
pub struct TransitionEngine {
    store: Arc<dyn EntityStore>,
    sink: Arc<dyn NotificationSink>,
    identities: Arc<dyn IdentityResolver>,
    flows: Arc<dyn FlowPatternLookup>,
}

impl TransitionEngine {
    pub fn new(
        store: Arc<dyn EntityStore>,
        sink: Arc<dyn NotificationSink>,
        identities: Arc<dyn IdentityResolver>,
        flows: Arc<dyn FlowPatternLookup>,
    ) -> Self {
        Self {
            store,
            sink,
            identities,
            flows,
        }
    }

    // ── Per-family advance operations ────────────────────────────────

    pub async fn advance_entry(&self, request: AdvanceRequest) -> Result<Task, EngineError> {
        self.advance_family(PhaseFamily::Entry, request, true).await
    }

    pub async fn advance_document(&self, request: AdvanceRequest) -> Result<Task, EngineError> {
        self.advance_family(PhaseFamily::Document, request, true)
            .await
    }

    pub async fn advance_selection(&self, request: AdvanceRequest) -> Result<Task, EngineError> {
        self.advance_family(PhaseFamily::Selection, request, true)
            .await
    }

    pub async fn advance_offer_hold(&self, request: AdvanceRequest) -> Result<Task, EngineError> {
        self.advance_family(PhaseFamily::OfferHold, request, true)
            .await
    }

    pub async fn advance_offer_accept(&self, request: AdvanceRequest) -> Result<Task, EngineError> {
        self.advance_family(PhaseFamily::OfferAccept, request, true)
            .await
    }

    pub async fn advance_decline(&self, request: AdvanceRequest) -> Result<Task, EngineError> {
        self.advance_family(PhaseFamily::Decline, request, true)
            .await
    }

    // ── Shared core ──────────────────────────────────────────────────

    /// Run one transition. `finalize` controls whether the bookkeeping and
    /// terminal steps run; the batch runner defers them to its last item.
    pub(crate) async fn advance_family(
        &self,
        family: PhaseFamily,
        request: AdvanceRequest,
        finalize: bool,
    ) -> Result<Task, EngineError> {
        if request.current.phase.family() != family {
            return Err(EngineError::PhaseMismatch {
                expected: family,
                current: request.current,
            });
        }

        let group = self
            .store
            .find_group(request.group_id)
            .await
            .map_err(EngineError::dependency)?
            .ok_or(EngineError::NotFound {
                entity: "task group",
                group_id: request.group_id,
            })?;
        let prev = self
            .store
            .latest_task(group.id)
            .await
            .map_err(EngineError::dependency)?;

        // Continuation: re-create the pre-decline task instead of a literal
        // "continue" one.
        let (effective, role, operator_id) = if policy::is_continuation(request.requested) {
            let template = self
                .store
                .latest_task_matching_phase_before_decline(group.id, request.requested.phase)
                .await
                .map_err(EngineError::dependency)?
                .ok_or(EngineError::NotFound {
                    entity: "continuation source task",
                    group_id: group.id,
                })?;
            (template.state, template.role, template.operator_id)
        } else {
            (request.requested, request.role, request.operator_id)
        };

        let plan = policy::plan_transition(
            family,
            prev.as_ref().map(|t| t.state),
            effective,
            &request.options,
        );

        for pre in &plan.pre_inserts {
            match pre {
                PreInsert::ConfirmIntent => {
                    let state = PhaseState::new(Phase::Entry, Subphase::ConfirmIntent)?;
                    self.store
                        .create_task(NewTask::marker(group.id, state, role, operator_id))
                        .await
                        .map_err(EngineError::dependency)?;
                }
                PreInsert::RescheduleMarker => {
                    let anchor = self
                        .store
                        .latest_collect_result_task(group.id)
                        .await
                        .map_err(EngineError::dependency)?
                        .ok_or(EngineError::NotFound {
                            entity: "collect-result task",
                            group_id: group.id,
                        })?;
                    self.store
                        .delete_schedules_after_task(group.id, anchor.id)
                        .await
                        .map_err(EngineError::dependency)?;
                    let state = PhaseState::new(effective.phase, Subphase::RescheduleMarker)?;
                    self.store
                        .create_task(NewTask::marker(group.id, state, role, operator_id))
                        .await
                        .map_err(EngineError::dependency)?;
                }
                PreInsert::SkipMarker(phase) => {
                    let state = PhaseState::new(*phase, Subphase::SkipMarker)?;
                    self.store
                        .create_task(NewTask::marker(group.id, state, role, operator_id))
                        .await
                        .map_err(EngineError::dependency)?;
                }
            }
        }

        let task = self
            .store
            .create_task(NewTask {
                group_id: group.id,
                state: effective,
                role,
                operator_id,
                remarks: request.options.remarks.clone(),
                deadline: request.options.deadline,
                annotations: request.options.annotations.clone(),
                auto_generated: false,
                confirms_dual_sided: plan.effects.contains(&SideEffect::MarkDualSided),
            })
            .await
            .map_err(EngineError::dependency)?;

        for effect in &plan.effects {
            match effect {
                SideEffect::RecordEvaluation { passed, retry } => {
                    // the plan only carries this when a previous task exists
                    if let Some(judged) = prev.as_ref() {
                        evaluation::record_outcome(
                            self.store.as_ref(),
                            self.flows.as_ref(),
                            &group,
                            judged,
                            request.options.evaluation.as_ref(),
                            *passed,
                            *retry,
                        )
                        .await?;
                    }
                }
                SideEffect::ReplaceProposedSlots => {
                    scheduling::replace_proposed_slots(
                        self.store.as_ref(),
                        group.id,
                        task.state.phase,
                        task.id,
                        &request.options.proposed_slots,
                    )
                    .await?;
                }
                SideEffect::UpsertConfirmedSlot => {
                    let input = request.options.confirmed_slot.ok_or_else(|| {
                        EngineError::Other(anyhow::anyhow!(
                            "day-of-details transition requires a confirmed slot"
                        ))
                    })?;
                    scheduling::upsert_confirmed_slot(
                        self.store.as_ref(),
                        group.id,
                        task.state.phase,
                        task.id,
                        &input,
                    )
                    .await?;
                }
                SideEffect::LinkReschedule => {
                    let phase = prev.as_ref().map(|t| t.state.phase).unwrap_or(task.state.phase);
                    scheduling::link_reschedule(
                        self.store.as_ref(),
                        group.id,
                        phase,
                        task.id,
                        request.options.confirmed_slot.as_ref(),
                    )
                    .await?;
                }
                SideEffect::MarkDualSided => {
                    self.store
                        .set_dual_sided(group.id, true)
                        .await
                        .map_err(EngineError::dependency)?;
                }
                SideEffect::MessageCandidate => {
                    self.message_candidate(&group, &request.options).await;
                }
            }
        }

        if finalize {
            self.finalize(&group, &task).await?;
        }
        Ok(task)
    }

    /// Bookkeeping and terminal check (steps run once per advance, or once
    /// per batch for its last item).
    pub(crate) async fn finalize(&self, group: &TaskGroup, task: &Task) -> Result<(), EngineError> {
        self.store
            .set_last_request(group.id, task.role, Utc::now())
            .await
            .map_err(EngineError::dependency)?;

        if task.state.subphase == Subphase::Accepted {
            self.flip_forecast(group, ConfidenceBucket::Accepted).await?;
        }
        // only closing markers end the thread of work; an acceptance still
        // alerts the operator now responsible for the offer stage
        if task.state.subphase.is_closing() {
            self.flip_forecast(group, ConfidenceBucket::Lost).await?;
        } else {
            self.push_responsible(group, task).await;
        }
        Ok(())
    }

    /// Flip the forecast bucket. Re-flipping to the same bucket is a no-op
    /// success; a missing entry is tolerated.
    async fn flip_forecast(
        &self,
        group: &TaskGroup,
        bucket: ConfidenceBucket,
    ) -> Result<(), EngineError> {
        match self
            .store
            .find_forecast(group.candidate_id, group.posting_id)
            .await
            .map_err(EngineError::dependency)?
        {
            Some(entry) => self
                .store
                .set_forecast_bucket(entry.id, bucket)
                .await
                .map_err(EngineError::dependency),
            None => {
                debug!(group_id = group.id, "no forecast entry to flip");
                Ok(())
            }
        }
    }

    /// Push the responsible operator. Failure-isolated.
    pub(crate) async fn push_responsible(&self, group: &TaskGroup, task: &Task) {
        // one operator covers both sides of a dual-sided instance; the
        // supply-side alert would duplicate the demand-side one
        if task.role == OperatorRole::Supply && group.dual_sided {
            return;
        }
        let operator = match self.identities.resolve(task.operator_id).await {
            Some(operator) => operator,
            None => {
                debug!(
                    operator_id = task.operator_id,
                    "operator identity not resolvable; push skipped"
                );
                return;
            }
        };
        if let Err(err) = self
            .sink
            .push_operator(&operator, PUSH_TITLE, &task.state.label())
            .await
        {
            warn!(group_id = group.id, error = %err, "operator push failed");
        }
    }

    /// Deliver a candidate message and record it durably. Failure-isolated.
    pub(crate) async fn message_candidate(&self, group: &TaskGroup, options: &AdvanceOptions) {
        let body = match options.message_body.as_deref() {
            Some(body) => body,
            None => {
                warn!(
                    group_id = group.id,
                    "candidate message requested without a body; skipping"
                );
                return;
            }
        };
        if let Err(err) = self.try_message_candidate(group, body).await {
            warn!(group_id = group.id, error = %err, "candidate message delivery failed");
        }
    }

    async fn try_message_candidate(&self, group: &TaskGroup, body: &str) -> anyhow::Result<()> {
        let contact = self
            .store
            .find_candidate_contact(group.candidate_id)
            .await?
            .ok_or_else(|| {
                anyhow::anyhow!("no contact record for candidate {}", group.candidate_id)
            })?;
        let channel = self.sink.message_candidate(&contact, body).await?;
        self.store
            .log_message(NewMessageLog {
                group_id: group.id,
                candidate_id: group.candidate_id,
                channel,
                body: body.to_string(),
                receipt_id: uuid::Uuid::new_v4().to_string(),
            })
            .await?;
        if channel == MessageChannel::Chat {
            self.store
                .touch_chat_thread(group.candidate_id, Utc::now())
                .await?;
        }
        Ok(())
    }

    // ── Instance bookkeeping operations ──────────────────────────────

    /// Delete a task, cascading: deleting the newest task also removes an
    /// immediately-preceding auto-generated skip/reschedule marker; deleting
    /// the task that confirmed the dual-sided flag clears it; deleting the
    /// last task deletes the group.
    pub async fn delete_task(&self, group_id: i64, task_id: i64) -> Result<(), EngineError> {
        let tasks = self
            .store
            .tasks_for_group(group_id)
            .await
            .map_err(EngineError::dependency)?;
        let pos = tasks
            .iter()
            .position(|t| t.id == task_id)
            .ok_or(EngineError::NotFound {
                entity: "task",
                group_id,
            })?;

        if tasks[pos].confirms_dual_sided {
            self.store
                .set_dual_sided(group_id, false)
                .await
                .map_err(EngineError::dependency)?;
        }

        self.store
            .delete_task(task_id)
            .await
            .map_err(EngineError::dependency)?;
        let mut deleted = 1;

        if pos + 1 == tasks.len() && pos > 0 {
            let preceding = &tasks[pos - 1];
            if preceding.auto_generated
                && matches!(
                    preceding.state.subphase,
                    Subphase::SkipMarker | Subphase::RescheduleMarker
                )
            {
                self.store
                    .delete_task(preceding.id)
                    .await
                    .map_err(EngineError::dependency)?;
                deleted += 1;
            }
        }

        if tasks.len() == deleted {
            self.store
                .delete_group(group_id)
                .await
                .map_err(EngineError::dependency)?;
        }
        Ok(())
    }

    /// Attach (or detach) a selection flow pattern.
    pub async fn choose_flow_pattern(
        &self,
        group_id: i64,
        pattern_id: Option<i64>,
    ) -> Result<(), EngineError> {
        self.store
            .set_flow_pattern(group_id, pattern_id)
            .await
            .map_err(EngineError::dependency)
    }

    /// Update the external-posting metadata.
    pub async fn set_external_posting(
        &self,
        group_id: i64,
        posting: Option<crate::models::ExternalPosting>,
    ) -> Result<(), EngineError> {
        self.store
            .set_external_posting(group_id, posting)
            .await
            .map_err(EngineError::dependency)
    }

    /// Record that the given side has viewed the instance (unread
    /// computation happens elsewhere).
    pub async fn mark_watched(&self, group_id: i64, side: OperatorRole) -> Result<(), EngineError> {
        self.store
            .set_last_watched(group_id, side, Utc::now())
            .await
            .map_err(EngineError::dependency)
    }
}
