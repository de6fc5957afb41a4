//! Persistence contract the transition engine drives.
//!
//! The engine never talks to a database directly; it goes through
//! [`EntityStore`], which the embedding application implements. Two
//! implementations ship with the crate:
//! - [`sqlite::SqliteStore`] — rusqlite-backed, behind a `spawn_blocking`
//!   handle for use from async contexts
//! - [`memory::MemoryStore`] — in-memory, for tests
//!
//! All methods return `anyhow::Result`; the engine wraps failures into
//! `EngineError::Dependency`.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    CandidateContact, ConfidenceBucket, EvaluationRecord, ExternalPosting, ForecastEntry,
    NewEvaluation, NewMessageLog, NewSchedule, NewTask, OperatorRole, SchedulingRecord, Slot,
    Task, TaskGroup,
};
use crate::phase::Phase;

/// Creation payload for a task group.
#[derive(Debug, Clone)]
pub struct NewTaskGroup {
    pub candidate_id: i64,
    pub posting_id: i64,
    pub dual_sided: bool,
    pub external_posting: Option<ExternalPosting>,
    pub flow_pattern_id: Option<i64>,
    pub documents: Vec<String>,
}

impl NewTaskGroup {
    pub fn new(candidate_id: i64, posting_id: i64) -> Self {
        Self {
            candidate_id,
            posting_id,
            dual_sided: false,
            external_posting: None,
            flow_pattern_id: None,
            documents: Vec::new(),
        }
    }
}

/// Externally-owned persistence contract (spec'd by what the engine reads and
/// writes, nothing more).
#[async_trait]
pub trait EntityStore: Send + Sync {
    // ── Task groups ──────────────────────────────────────────────────

    async fn create_group(&self, group: NewTaskGroup) -> Result<TaskGroup>;

    async fn find_group(&self, group_id: i64) -> Result<Option<TaskGroup>>;

    async fn set_dual_sided(&self, group_id: i64, dual_sided: bool) -> Result<()>;

    async fn set_flow_pattern(&self, group_id: i64, pattern_id: Option<i64>) -> Result<()>;

    async fn set_external_posting(
        &self,
        group_id: i64,
        posting: Option<ExternalPosting>,
    ) -> Result<()>;

    /// Update the per-side last-request timestamp.
    async fn set_last_request(
        &self,
        group_id: i64,
        side: OperatorRole,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Update the per-side last-watched timestamp.
    async fn set_last_watched(
        &self,
        group_id: i64,
        side: OperatorRole,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Delete a group (only valid once its last task is gone).
    async fn delete_group(&self, group_id: i64) -> Result<()>;

    // ── Tasks ────────────────────────────────────────────────────────

    async fn create_task(&self, task: NewTask) -> Result<Task>;

    async fn delete_task(&self, task_id: i64) -> Result<()>;

    /// The most recently created task, i.e. the group's current state.
    async fn latest_task(&self, group_id: i64) -> Result<Option<Task>>;

    /// The most recent task in the given phase that predates the most recent
    /// decline-phase task. Backs the decline continuation special-case.
    async fn latest_task_matching_phase_before_decline(
        &self,
        group_id: i64,
        phase: Phase,
    ) -> Result<Option<Task>>;

    /// The most recent collect-result task in the group.
    async fn latest_collect_result_task(&self, group_id: i64) -> Result<Option<Task>>;

    /// Full history, oldest first.
    async fn tasks_for_group(&self, group_id: i64) -> Result<Vec<Task>>;

    // ── Scheduling ledger ────────────────────────────────────────────

    async fn create_schedule(&self, schedule: NewSchedule) -> Result<SchedulingRecord>;

    /// Replace the slots and task link of an existing record.
    async fn update_schedule(&self, record_id: i64, task_id: i64, slots: Vec<Slot>) -> Result<()>;

    /// Delete all proposed (un-confirmed) records for the group.
    async fn delete_proposed_schedules(&self, group_id: i64) -> Result<()>;

    /// Delete every scheduling record whose task link is newer than the given
    /// task id. Backs the reschedule-with-delete special-case.
    async fn delete_schedules_after_task(&self, group_id: i64, task_id: i64) -> Result<()>;

    async fn schedules_for_group(&self, group_id: i64) -> Result<Vec<SchedulingRecord>>;

    /// The confirmed slot for the phase that is not superseded by a later
    /// record's reschedule back-reference.
    async fn live_confirmed_slot(
        &self,
        group_id: i64,
        phase: Phase,
    ) -> Result<Option<SchedulingRecord>>;

    // ── Evaluation ledger ────────────────────────────────────────────

    async fn create_evaluation(&self, evaluation: NewEvaluation) -> Result<EvaluationRecord>;

    async fn evaluations_for_group(&self, group_id: i64) -> Result<Vec<EvaluationRecord>>;

    // ── Sales forecast ───────────────────────────────────────────────

    async fn find_forecast(
        &self,
        candidate_id: i64,
        posting_id: i64,
    ) -> Result<Option<ForecastEntry>>;

    async fn set_forecast_bucket(&self, forecast_id: i64, bucket: ConfidenceBucket) -> Result<()>;

    // ── Candidate reachability & message log ─────────────────────────

    async fn find_candidate_contact(&self, candidate_id: i64) -> Result<Option<CandidateContact>>;

    /// Durable copy of an outbound message, written before dispatch
    /// bookkeeping.
    async fn log_message(&self, message: NewMessageLog) -> Result<()>;

    /// Last-sent bookkeeping on the candidate's chat thread.
    async fn touch_chat_thread(&self, candidate_id: i64, sent_at: DateTime<Utc>) -> Result<()>;
}
