//! Evaluation-ledger executor for the engine's evaluation intent.

use crate::errors::EngineError;
use crate::flow::FlowPatternLookup;
use crate::models::{EvaluationInput, EvaluationRecord, NewEvaluation, Task, TaskGroup};
use crate::store::EntityStore;

/// Record the outcome of the step just judged. The record links to the
/// collect-result task being left, and to the flow-pattern criterion for its
/// phase when the group is pinned to a pattern that covers it.
pub(crate) async fn record_outcome(
    store: &dyn EntityStore,
    flows: &dyn FlowPatternLookup,
    group: &TaskGroup,
    judged: &Task,
    input: Option<&EvaluationInput>,
    passed: bool,
    retry: bool,
) -> Result<EvaluationRecord, EngineError> {
    let criterion_id = match group.flow_pattern_id {
        Some(pattern_id) => flows.criterion_for(pattern_id, judged.state.phase).await,
        None => None,
    };

    store
        .create_evaluation(NewEvaluation {
            task_id: judged.id,
            criterion_id,
            strengths: input.and_then(|i| i.strengths.clone()),
            weaknesses: input.and_then(|i| i.weaknesses.clone()),
            passed,
            retry,
        })
        .await
        .map_err(EngineError::dependency)
}
