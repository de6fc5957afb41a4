//! Scheduling-ledger executors for the engine's side-effect intents.

use crate::errors::EngineError;
use crate::models::{NewSchedule, SchedulingKind, SchedulingRecord, Slot, SlotInput};
use crate::phase::Phase;
use crate::store::EntityStore;

fn to_slot(input: &SlotInput) -> Slot {
    Slot {
        starts_at: input.starts_at,
        ends_at: input.ends_at,
    }
}

/// Replace-semantics rewrite of the proposed slots: every un-confirmed record
/// for the group is deleted, then the supplied slots are written back, one
/// record per task link. A slot that was already persisted keeps its original
/// task link; new slots link to the task being created.
pub(crate) async fn replace_proposed_slots(
    store: &dyn EntityStore,
    group_id: i64,
    phase: Phase,
    task_id: i64,
    inputs: &[SlotInput],
) -> Result<(), EngineError> {
    store
        .delete_proposed_schedules(group_id)
        .await
        .map_err(EngineError::dependency)?;

    // Group by task link, preserving first-seen order.
    let mut by_link: Vec<(i64, Vec<Slot>)> = Vec::new();
    for input in inputs {
        let link = input.original_task_id.unwrap_or(task_id);
        match by_link.iter_mut().find(|(id, _)| *id == link) {
            Some((_, slots)) => slots.push(to_slot(input)),
            None => by_link.push((link, vec![to_slot(input)])),
        }
    }

    for (link, slots) in by_link {
        store
            .create_schedule(NewSchedule {
                group_id,
                task_id: link,
                phase,
                kind: SchedulingKind::ProposedByOperator,
                slots,
                reschedule_of: None,
            })
            .await
            .map_err(EngineError::dependency)?;
    }
    Ok(())
}

/// Create or update in place the single confirmed slot for the phase.
pub(crate) async fn upsert_confirmed_slot(
    store: &dyn EntityStore,
    group_id: i64,
    phase: Phase,
    task_id: i64,
    input: &SlotInput,
) -> Result<(), EngineError> {
    let live = store
        .live_confirmed_slot(group_id, phase)
        .await
        .map_err(EngineError::dependency)?;
    match live {
        Some(record) => store
            .update_schedule(record.id, task_id, vec![to_slot(input)])
            .await
            .map_err(EngineError::dependency),
        None => store
            .create_schedule(NewSchedule {
                group_id,
                task_id,
                phase,
                kind: SchedulingKind::ConfirmedByCounterparty,
                slots: vec![to_slot(input)],
                reschedule_of: None,
            })
            .await
            .map(|_| ())
            .map_err(EngineError::dependency),
    }
}

/// Record a reschedule back-reference from the new task to the live confirmed
/// slot, superseding it. The new record carries the replacement slot when the
/// caller supplied one, otherwise the old slot unchanged.
pub(crate) async fn link_reschedule(
    store: &dyn EntityStore,
    group_id: i64,
    phase: Phase,
    task_id: i64,
    replacement: Option<&SlotInput>,
) -> Result<SchedulingRecord, EngineError> {
    let live = store
        .live_confirmed_slot(group_id, phase)
        .await
        .map_err(EngineError::dependency)?
        .ok_or(EngineError::NotFound {
            entity: "live confirmed slot",
            group_id,
        })?;

    let slots = match replacement {
        Some(input) => vec![to_slot(input)],
        None => live.slots.clone(),
    };
    store
        .create_schedule(NewSchedule {
            group_id,
            task_id,
            phase,
            kind: SchedulingKind::ConfirmedByCounterparty,
            slots,
            reschedule_of: Some(live.id),
        })
        .await
        .map_err(EngineError::dependency)
}
