//! In-memory [`EntityStore`] used by the test suites.
//!
//! Mirrors the SQLite implementation's query semantics exactly (latest-task
//! ordering, live-slot supersession, delete-above-task) so engine tests can
//! run without touching disk.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{EntityStore, NewTaskGroup};
use crate::models::{
    CandidateContact, ConfidenceBucket, EvaluationRecord, ExternalPosting, ForecastEntry,
    MessageChannel, NewEvaluation, NewMessageLog, NewSchedule, NewTask, OperatorRole,
    SchedulingKind, SchedulingRecord, Slot, Task, TaskGroup,
};
use crate::phase::{Phase, Subphase};

/// A logged outbound message, retained for inspection in tests.
#[derive(Debug, Clone)]
pub struct LoggedMessage {
    pub group_id: i64,
    pub candidate_id: i64,
    pub channel: MessageChannel,
    pub body: String,
    pub receipt_id: String,
}

#[derive(Default)]
struct Inner {
    next_id: i64,
    groups: HashMap<i64, TaskGroup>,
    tasks: Vec<Task>,
    schedules: Vec<SchedulingRecord>,
    evaluations: Vec<EvaluationRecord>,
    forecasts: Vec<ForecastEntry>,
    contacts: HashMap<i64, CandidateContact>,
    messages: Vec<LoggedMessage>,
    chat_threads: HashMap<i64, DateTime<Utc>>,
}

impl Inner {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory store; cheap to construct per test.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a candidate contact row (out-of-scope CRUD in production).
    pub fn insert_contact(&self, contact: CandidateContact) {
        let mut inner = self.lock().unwrap();
        inner.contacts.insert(contact.candidate_id, contact);
    }

    /// Seed a forecast entry (owned by the reporting subsystem in production).
    pub fn insert_forecast(
        &self,
        candidate_id: i64,
        posting_id: i64,
        bucket: ConfidenceBucket,
    ) -> i64 {
        let mut inner = self.lock().unwrap();
        let id = inner.next_id();
        inner.forecasts.push(ForecastEntry {
            id,
            candidate_id,
            posting_id,
            bucket,
        });
        id
    }

    /// All logged outbound messages, oldest first.
    pub fn logged_messages(&self) -> Vec<LoggedMessage> {
        self.lock().unwrap().messages.clone()
    }

    /// Chat-thread last-sent timestamp for a candidate, if any.
    pub fn chat_thread_last_sent(&self, candidate_id: i64) -> Option<DateTime<Utc>> {
        self.lock().unwrap().chat_threads.get(&candidate_id).copied()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|e| anyhow::anyhow!("store lock poisoned: {}", e))
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn create_group(&self, group: NewTaskGroup) -> Result<TaskGroup> {
        let mut inner = self.lock()?;
        let id = inner.next_id();
        let group = TaskGroup {
            id,
            candidate_id: group.candidate_id,
            posting_id: group.posting_id,
            dual_sided: group.dual_sided,
            external_posting: group.external_posting,
            flow_pattern_id: group.flow_pattern_id,
            demand_last_request_at: None,
            supply_last_request_at: None,
            demand_last_watched_at: None,
            supply_last_watched_at: None,
            documents: group.documents,
            created_at: Utc::now(),
        };
        inner.groups.insert(id, group.clone());
        Ok(group)
    }

    async fn find_group(&self, group_id: i64) -> Result<Option<TaskGroup>> {
        Ok(self.lock()?.groups.get(&group_id).cloned())
    }

    async fn set_dual_sided(&self, group_id: i64, dual_sided: bool) -> Result<()> {
        let mut inner = self.lock()?;
        match inner.groups.get_mut(&group_id) {
            Some(group) => {
                group.dual_sided = dual_sided;
                Ok(())
            }
            None => bail!("group {} not found", group_id),
        }
    }

    async fn set_flow_pattern(&self, group_id: i64, pattern_id: Option<i64>) -> Result<()> {
        let mut inner = self.lock()?;
        match inner.groups.get_mut(&group_id) {
            Some(group) => {
                group.flow_pattern_id = pattern_id;
                Ok(())
            }
            None => bail!("group {} not found", group_id),
        }
    }

    async fn set_external_posting(
        &self,
        group_id: i64,
        posting: Option<ExternalPosting>,
    ) -> Result<()> {
        let mut inner = self.lock()?;
        match inner.groups.get_mut(&group_id) {
            Some(group) => {
                group.external_posting = posting;
                Ok(())
            }
            None => bail!("group {} not found", group_id),
        }
    }

    async fn set_last_request(
        &self,
        group_id: i64,
        side: OperatorRole,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.lock()?;
        match inner.groups.get_mut(&group_id) {
            Some(group) => {
                match side {
                    OperatorRole::Demand => group.demand_last_request_at = Some(at),
                    OperatorRole::Supply => group.supply_last_request_at = Some(at),
                }
                Ok(())
            }
            None => bail!("group {} not found", group_id),
        }
    }

    async fn set_last_watched(
        &self,
        group_id: i64,
        side: OperatorRole,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.lock()?;
        match inner.groups.get_mut(&group_id) {
            Some(group) => {
                match side {
                    OperatorRole::Demand => group.demand_last_watched_at = Some(at),
                    OperatorRole::Supply => group.supply_last_watched_at = Some(at),
                }
                Ok(())
            }
            None => bail!("group {} not found", group_id),
        }
    }

    async fn delete_group(&self, group_id: i64) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.tasks.iter().any(|t| t.group_id == group_id) {
            bail!("group {} still has tasks", group_id);
        }
        inner.groups.remove(&group_id);
        Ok(())
    }

    async fn create_task(&self, task: NewTask) -> Result<Task> {
        let mut inner = self.lock()?;
        if !inner.groups.contains_key(&task.group_id) {
            bail!("group {} not found", task.group_id);
        }
        let id = inner.next_id();
        let task = Task {
            id,
            group_id: task.group_id,
            state: task.state,
            role: task.role,
            operator_id: task.operator_id,
            remarks: task.remarks,
            deadline: task.deadline,
            annotations: task.annotations,
            auto_generated: task.auto_generated,
            confirms_dual_sided: task.confirms_dual_sided,
            created_at: Utc::now(),
        };
        inner.tasks.push(task.clone());
        Ok(task)
    }

    async fn delete_task(&self, task_id: i64) -> Result<()> {
        let mut inner = self.lock()?;
        inner.tasks.retain(|t| t.id != task_id);
        Ok(())
    }

    async fn latest_task(&self, group_id: i64) -> Result<Option<Task>> {
        let inner = self.lock()?;
        Ok(inner
            .tasks
            .iter()
            .filter(|t| t.group_id == group_id)
            .max_by_key(|t| t.id)
            .cloned())
    }

    async fn latest_task_matching_phase_before_decline(
        &self,
        group_id: i64,
        phase: Phase,
    ) -> Result<Option<Task>> {
        let inner = self.lock()?;
        let boundary = inner
            .tasks
            .iter()
            .filter(|t| t.group_id == group_id && t.state.phase == Phase::Decline)
            .map(|t| t.id)
            .max()
            .unwrap_or(i64::MAX);
        Ok(inner
            .tasks
            .iter()
            .filter(|t| t.group_id == group_id && t.state.phase == phase && t.id < boundary)
            .max_by_key(|t| t.id)
            .cloned())
    }

    async fn latest_collect_result_task(&self, group_id: i64) -> Result<Option<Task>> {
        let inner = self.lock()?;
        Ok(inner
            .tasks
            .iter()
            .filter(|t| t.group_id == group_id && t.state.subphase == Subphase::CollectResult)
            .max_by_key(|t| t.id)
            .cloned())
    }

    async fn tasks_for_group(&self, group_id: i64) -> Result<Vec<Task>> {
        let inner = self.lock()?;
        let mut tasks: Vec<Task> = inner
            .tasks
            .iter()
            .filter(|t| t.group_id == group_id)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.id);
        Ok(tasks)
    }

    async fn create_schedule(&self, schedule: NewSchedule) -> Result<SchedulingRecord> {
        let mut inner = self.lock()?;
        let id = inner.next_id();
        let record = SchedulingRecord {
            id,
            group_id: schedule.group_id,
            task_id: schedule.task_id,
            phase: schedule.phase,
            kind: schedule.kind,
            slots: schedule.slots,
            reschedule_of: schedule.reschedule_of,
            created_at: Utc::now(),
        };
        inner.schedules.push(record.clone());
        Ok(record)
    }

    async fn update_schedule(&self, record_id: i64, task_id: i64, slots: Vec<Slot>) -> Result<()> {
        let mut inner = self.lock()?;
        match inner.schedules.iter_mut().find(|r| r.id == record_id) {
            Some(record) => {
                record.task_id = task_id;
                record.slots = slots;
                Ok(())
            }
            None => bail!("scheduling record {} not found", record_id),
        }
    }

    async fn delete_proposed_schedules(&self, group_id: i64) -> Result<()> {
        let mut inner = self.lock()?;
        inner.schedules.retain(|r| {
            !(r.group_id == group_id && r.kind == SchedulingKind::ProposedByOperator)
        });
        Ok(())
    }

    async fn delete_schedules_after_task(&self, group_id: i64, task_id: i64) -> Result<()> {
        let mut inner = self.lock()?;
        inner
            .schedules
            .retain(|r| !(r.group_id == group_id && r.task_id > task_id));
        Ok(())
    }

    async fn schedules_for_group(&self, group_id: i64) -> Result<Vec<SchedulingRecord>> {
        let inner = self.lock()?;
        let mut records: Vec<SchedulingRecord> = inner
            .schedules
            .iter()
            .filter(|r| r.group_id == group_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.id);
        Ok(records)
    }

    async fn live_confirmed_slot(
        &self,
        group_id: i64,
        phase: Phase,
    ) -> Result<Option<SchedulingRecord>> {
        let inner = self.lock()?;
        let superseded: Vec<i64> = inner
            .schedules
            .iter()
            .filter(|r| r.group_id == group_id)
            .filter_map(|r| r.reschedule_of)
            .collect();
        Ok(inner
            .schedules
            .iter()
            .filter(|r| {
                r.group_id == group_id
                    && r.phase == phase
                    && r.kind == SchedulingKind::ConfirmedByCounterparty
                    && !superseded.contains(&r.id)
            })
            .max_by_key(|r| r.id)
            .cloned())
    }

    async fn create_evaluation(&self, evaluation: NewEvaluation) -> Result<EvaluationRecord> {
        let mut inner = self.lock()?;
        let id = inner.next_id();
        let record = EvaluationRecord {
            id,
            task_id: evaluation.task_id,
            criterion_id: evaluation.criterion_id,
            strengths: evaluation.strengths,
            weaknesses: evaluation.weaknesses,
            passed: evaluation.passed,
            retry: evaluation.retry,
            created_at: Utc::now(),
        };
        inner.evaluations.push(record.clone());
        Ok(record)
    }

    async fn evaluations_for_group(&self, group_id: i64) -> Result<Vec<EvaluationRecord>> {
        let inner = self.lock()?;
        let task_ids: Vec<i64> = inner
            .tasks
            .iter()
            .filter(|t| t.group_id == group_id)
            .map(|t| t.id)
            .collect();
        let mut records: Vec<EvaluationRecord> = inner
            .evaluations
            .iter()
            .filter(|e| task_ids.contains(&e.task_id))
            .cloned()
            .collect();
        records.sort_by_key(|e| e.id);
        Ok(records)
    }

    async fn find_forecast(
        &self,
        candidate_id: i64,
        posting_id: i64,
    ) -> Result<Option<ForecastEntry>> {
        let inner = self.lock()?;
        Ok(inner
            .forecasts
            .iter()
            .find(|f| f.candidate_id == candidate_id && f.posting_id == posting_id)
            .cloned())
    }

    async fn set_forecast_bucket(&self, forecast_id: i64, bucket: ConfidenceBucket) -> Result<()> {
        let mut inner = self.lock()?;
        match inner.forecasts.iter_mut().find(|f| f.id == forecast_id) {
            Some(forecast) => {
                forecast.bucket = bucket;
                Ok(())
            }
            None => bail!("forecast {} not found", forecast_id),
        }
    }

    async fn find_candidate_contact(&self, candidate_id: i64) -> Result<Option<CandidateContact>> {
        Ok(self.lock()?.contacts.get(&candidate_id).cloned())
    }

    async fn log_message(&self, message: NewMessageLog) -> Result<()> {
        let mut inner = self.lock()?;
        inner.messages.push(LoggedMessage {
            group_id: message.group_id,
            candidate_id: message.candidate_id,
            channel: message.channel,
            body: message.body,
            receipt_id: message.receipt_id,
        });
        Ok(())
    }

    async fn touch_chat_thread(&self, candidate_id: i64, sent_at: DateTime<Utc>) -> Result<()> {
        let mut inner = self.lock()?;
        inner.chat_threads.insert(candidate_id, sent_at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::PhaseState;

    fn state(phase: Phase, subphase: Subphase) -> PhaseState {
        PhaseState::new(phase, subphase).unwrap()
    }

    async fn store_with_group() -> (MemoryStore, i64) {
        let store = MemoryStore::new();
        let group = store.create_group(NewTaskGroup::new(1, 2)).await.unwrap();
        (store, group.id)
    }

    fn task(group_id: i64, phase: Phase, subphase: Subphase) -> NewTask {
        NewTask::marker(group_id, state(phase, subphase), OperatorRole::Supply, 9)
    }

    #[tokio::test]
    async fn latest_task_is_most_recently_created() {
        let (store, gid) = store_with_group().await;
        store
            .create_task(task(gid, Phase::Entry, Subphase::SoundOut))
            .await
            .unwrap();
        let second = store
            .create_task(task(gid, Phase::Entry, Subphase::ConfirmIntent))
            .await
            .unwrap();

        let latest = store.latest_task(gid).await.unwrap().unwrap();
        assert_eq!(latest.id, second.id);
    }

    #[tokio::test]
    async fn create_task_rejects_unknown_group() {
        let store = MemoryStore::new();
        let result = store
            .create_task(task(404, Phase::Entry, Subphase::SoundOut))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn matching_phase_before_decline_skips_post_decline_tasks() {
        let (store, gid) = store_with_group().await;
        let wanted = store
            .create_task(task(gid, Phase::Round1, Subphase::CollectAvailability))
            .await
            .unwrap();
        store
            .create_task(task(gid, Phase::Decline, Subphase::Declined))
            .await
            .unwrap();
        // A round-1 task created after the decline must not be picked up.
        store
            .create_task(task(gid, Phase::Round1, Subphase::CandidateSupport))
            .await
            .unwrap();

        let found = store
            .latest_task_matching_phase_before_decline(gid, Phase::Round1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, wanted.id);
    }

    #[tokio::test]
    async fn live_confirmed_slot_excludes_superseded_records() {
        let (store, gid) = store_with_group().await;
        let t = store
            .create_task(task(gid, Phase::Round2, Subphase::DayOfDetails))
            .await
            .unwrap();
        let now = Utc::now();
        let confirmed = store
            .create_schedule(NewSchedule {
                group_id: gid,
                task_id: t.id,
                phase: Phase::Round2,
                kind: SchedulingKind::ConfirmedByCounterparty,
                slots: vec![Slot {
                    starts_at: now,
                    ends_at: now,
                }],
                reschedule_of: None,
            })
            .await
            .unwrap();

        let live = store.live_confirmed_slot(gid, Phase::Round2).await.unwrap();
        assert_eq!(live.unwrap().id, confirmed.id);

        // A reschedule link supersedes the confirmed slot.
        store
            .create_schedule(NewSchedule {
                group_id: gid,
                task_id: t.id,
                phase: Phase::Round2,
                kind: SchedulingKind::ProposedByOperator,
                slots: vec![],
                reschedule_of: Some(confirmed.id),
            })
            .await
            .unwrap();

        let live = store.live_confirmed_slot(gid, Phase::Round2).await.unwrap();
        assert!(live.is_none());
    }

    #[tokio::test]
    async fn delete_schedules_after_task_keeps_older_records() {
        let (store, gid) = store_with_group().await;
        let old_task = store
            .create_task(task(gid, Phase::Round1, Subphase::CollectResult))
            .await
            .unwrap();
        let new_task = store
            .create_task(task(gid, Phase::Round2, Subphase::CollectAvailability))
            .await
            .unwrap();
        for task_id in [old_task.id, new_task.id] {
            store
                .create_schedule(NewSchedule {
                    group_id: gid,
                    task_id,
                    phase: Phase::Round2,
                    kind: SchedulingKind::ProposedByOperator,
                    slots: vec![],
                    reschedule_of: None,
                })
                .await
                .unwrap();
        }

        store
            .delete_schedules_after_task(gid, old_task.id)
            .await
            .unwrap();

        let remaining = store.schedules_for_group(gid).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].task_id, old_task.id);
    }

    #[tokio::test]
    async fn delete_group_refuses_while_tasks_remain() {
        let (store, gid) = store_with_group().await;
        let t = store
            .create_task(task(gid, Phase::Entry, Subphase::SoundOut))
            .await
            .unwrap();
        assert!(store.delete_group(gid).await.is_err());

        store.delete_task(t.id).await.unwrap();
        store.delete_group(gid).await.unwrap();
        assert!(store.find_group(gid).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn poisoned_lock_surfaces_as_error() {
        let store = std::sync::Arc::new(MemoryStore::new());
        let poisoner = store.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.inner.lock().unwrap();
            panic!("poison the store lock");
        })
        .join();

        assert!(store.find_group(1).await.is_err());
    }

    #[tokio::test]
    async fn forecast_seed_and_flip() {
        let store = MemoryStore::new();
        let id = store.insert_forecast(1, 2, ConfidenceBucket::Medium);
        store
            .set_forecast_bucket(id, ConfidenceBucket::Lost)
            .await
            .unwrap();
        let found = store.find_forecast(1, 2).await.unwrap().unwrap();
        assert_eq!(found.bucket, ConfidenceBucket::Lost);
    }
}
