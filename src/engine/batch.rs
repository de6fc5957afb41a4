//! Batch transition runner and same-task fan-out.

use std::collections::HashSet;

use tracing::warn;

use super::{policy, TransitionEngine, PUSH_TITLE};
use crate::errors::EngineError;
use crate::models::{
    AdvanceOptions, AdvanceRequest, ConfidenceBucket, NewTask, OperatorRole, Task,
};
use crate::phase::{PhaseState, Subphase};

/// Runs an ordered list of advance requests for one operator, routing each
/// item to its phase-family handler by the item's declared current phase.
///
/// Fail-fast: the first failing item aborts the batch, annotated with its
/// 1-based position and phase label; already-created tasks are not rolled
/// back. Bookkeeping and the terminal check run once, for the last item.
pub struct BatchRunner<'a> {
    engine: &'a TransitionEngine,
}

impl<'a> BatchRunner<'a> {
    pub fn new(engine: &'a TransitionEngine) -> Self {
        Self { engine }
    }

    pub async fn run(&self, items: Vec<AdvanceRequest>) -> Result<Vec<Task>, EngineError> {
        let count = items.len();
        let mut tasks = Vec::with_capacity(count);
        for (idx, item) in items.into_iter().enumerate() {
            let family = item.current.phase.family();
            let phase_label = item.current.phase.label();
            let finalize = idx + 1 == count;
            match self.engine.advance_family(family, item, finalize).await {
                Ok(task) => tasks.push(task),
                Err(err) => {
                    return Err(EngineError::BatchItem {
                        position: idx + 1,
                        phase_label,
                        source: Box::new(err),
                    })
                }
            }
        }
        Ok(tasks)
    }
}

impl TransitionEngine {
    /// Apply one identical requested state to several pipeline instances
    /// (e.g. withdrawing a candidate from multiple postings at once).
    ///
    /// Per instance: task creation, the candidate-message side effect, and
    /// the terminal forecast flip. The demand-side operator push is throttled
    /// to at most one delivery per distinct device target for the whole call.
    pub async fn fan_out(
        &self,
        group_ids: &[i64],
        requested: PhaseState,
        role: OperatorRole,
        operator_id: i64,
        options: AdvanceOptions,
    ) -> Result<Vec<Task>, EngineError> {
        let mut pushed: HashSet<String> = HashSet::new();
        let mut tasks = Vec::with_capacity(group_ids.len());

        for &group_id in group_ids {
            let group = self
                .store
                .find_group(group_id)
                .await
                .map_err(EngineError::dependency)?
                .ok_or(EngineError::NotFound {
                    entity: "task group",
                    group_id,
                })?;

            let task = self
                .store
                .create_task(NewTask {
                    group_id,
                    state: requested,
                    role,
                    operator_id,
                    remarks: options.remarks.clone(),
                    deadline: options.deadline,
                    annotations: options.annotations.clone(),
                    auto_generated: false,
                    confirms_dual_sided: false,
                })
                .await
                .map_err(EngineError::dependency)?;

            if policy::sends_candidate_message(requested, &options) {
                self.message_candidate(&group, &options).await;
            }

            if requested.subphase == Subphase::Accepted {
                self.flip_forecast(&group, ConfidenceBucket::Accepted).await?;
            }
            if requested.subphase.is_closing() {
                self.flip_forecast(&group, ConfidenceBucket::Lost).await?;
            } else if role == OperatorRole::Demand {
                self.push_throttled(&group, &task, &mut pushed).await;
            } else {
                self.push_responsible(&group, &task).await;
            }

            tasks.push(task);
        }
        Ok(tasks)
    }

    /// Demand-side push with per-call dedup on the device target.
    async fn push_throttled(
        &self,
        group: &crate::models::TaskGroup,
        task: &Task,
        pushed: &mut HashSet<String>,
    ) {
        let operator = match self.identities.resolve(task.operator_id).await {
            Some(operator) => operator,
            None => return,
        };
        let target = match operator.device_token.as_deref() {
            Some(target) => target.to_string(),
            None => return,
        };
        if !pushed.insert(target) {
            return;
        }
        if let Err(err) = self
            .sink
            .push_operator(&operator, PUSH_TITLE, &task.state.label())
            .await
        {
            warn!(group_id = group.id, error = %err, "operator push failed");
        }
    }
}
