//! SQLite-backed [`EntityStore`].
//!
//! `PipelineDb` owns the connection and exposes synchronous methods;
//! `SqliteStore` wraps it behind `Arc<Mutex>` and runs every access on
//! tokio's blocking thread pool via `spawn_blocking`, preventing synchronous
//! SQLite I/O from tying up async worker threads.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{EntityStore, NewTaskGroup};
use crate::models::{
    CandidateContact, ConfidenceBucket, Deadline, EvaluationRecord, ExternalPosting,
    ForecastEntry, NewEvaluation, NewMessageLog, NewSchedule, NewTask, OperatorRole,
    SchedulingKind, SchedulingRecord, Slot, Task, TaskAnnotations, TaskGroup,
};
use crate::phase::{Phase, PhaseState, Subphase};

/// Async-safe handle over [`PipelineDb`].
#[derive(Clone)]
pub struct SqliteStore {
    inner: Arc<std::sync::Mutex<PipelineDb>>,
}

impl SqliteStore {
    pub fn new(db: PipelineDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(PipelineDb::new(path)?))
    }

    /// In-memory database, for tests.
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(PipelineDb::new_in_memory()?))
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&PipelineDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }
}

pub struct PipelineDb {
    conn: Connection,
}

impl PipelineDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS task_groups (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    candidate_id INTEGER NOT NULL,
                    posting_id INTEGER NOT NULL,
                    dual_sided INTEGER NOT NULL DEFAULT 0,
                    ext_title TEXT,
                    ext_company TEXT,
                    ext_url TEXT,
                    flow_pattern_id INTEGER,
                    demand_last_request_at TEXT,
                    supply_last_request_at TEXT,
                    demand_last_watched_at TEXT,
                    supply_last_watched_at TEXT,
                    documents TEXT NOT NULL DEFAULT '[]',
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS tasks (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    group_id INTEGER NOT NULL REFERENCES task_groups(id),
                    phase INTEGER NOT NULL,
                    subphase INTEGER NOT NULL,
                    role TEXT NOT NULL,
                    operator_id INTEGER NOT NULL,
                    remarks TEXT,
                    deadline_date TEXT,
                    deadline_hour INTEGER,
                    talking_points TEXT,
                    schedule_instructions TEXT,
                    exam_guidance TEXT,
                    auto_generated INTEGER NOT NULL DEFAULT 0,
                    confirms_dual_sided INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
                );

                CREATE TABLE IF NOT EXISTS schedules (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    group_id INTEGER NOT NULL REFERENCES task_groups(id),
                    task_id INTEGER NOT NULL,
                    phase INTEGER NOT NULL,
                    kind TEXT NOT NULL,
                    slots TEXT NOT NULL DEFAULT '[]',
                    reschedule_of INTEGER,
                    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
                );

                CREATE TABLE IF NOT EXISTS evaluations (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    task_id INTEGER NOT NULL,
                    criterion_id INTEGER,
                    strengths TEXT,
                    weaknesses TEXT,
                    passed INTEGER NOT NULL,
                    retry INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
                );

                CREATE TABLE IF NOT EXISTS forecasts (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    candidate_id INTEGER NOT NULL,
                    posting_id INTEGER NOT NULL,
                    bucket TEXT NOT NULL,
                    UNIQUE(candidate_id, posting_id)
                );

                CREATE TABLE IF NOT EXISTS candidate_contacts (
                    candidate_id INTEGER PRIMARY KEY,
                    display_name TEXT NOT NULL,
                    chat_user_id TEXT,
                    chat_active INTEGER NOT NULL DEFAULT 0,
                    email TEXT
                );

                CREATE TABLE IF NOT EXISTS message_log (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    group_id INTEGER NOT NULL,
                    candidate_id INTEGER NOT NULL,
                    channel TEXT NOT NULL,
                    body TEXT NOT NULL,
                    receipt_id TEXT NOT NULL,
                    sent_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
                );

                CREATE TABLE IF NOT EXISTS chat_threads (
                    candidate_id INTEGER PRIMARY KEY,
                    last_sent_at TEXT
                );

                CREATE INDEX IF NOT EXISTS idx_tasks_group ON tasks(group_id);
                CREATE INDEX IF NOT EXISTS idx_tasks_group_phase ON tasks(group_id, phase);
                CREATE INDEX IF NOT EXISTS idx_schedules_group ON schedules(group_id);
                CREATE INDEX IF NOT EXISTS idx_evaluations_task ON evaluations(task_id);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Task groups ──────────────────────────────────────────────────

    fn create_group(&self, group: NewTaskGroup) -> Result<TaskGroup> {
        let documents =
            serde_json::to_string(&group.documents).context("Failed to serialize documents")?;
        let (title, company, url) = match &group.external_posting {
            Some(p) => (Some(p.title.clone()), Some(p.company.clone()), p.url.clone()),
            None => (None, None, None),
        };
        self.conn
            .execute(
                "INSERT INTO task_groups
                 (candidate_id, posting_id, dual_sided, ext_title, ext_company, ext_url, flow_pattern_id, documents, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    group.candidate_id,
                    group.posting_id,
                    group.dual_sided,
                    title,
                    company,
                    url,
                    group.flow_pattern_id,
                    documents,
                    Utc::now().to_rfc3339(),
                ],
            )
            .context("Failed to insert task group")?;
        let id = self.conn.last_insert_rowid();
        self.find_group(id)?
            .context("Task group not found after insert")
    }

    fn find_group(&self, group_id: i64) -> Result<Option<TaskGroup>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, candidate_id, posting_id, dual_sided, ext_title, ext_company, ext_url,
                        flow_pattern_id, demand_last_request_at, supply_last_request_at,
                        demand_last_watched_at, supply_last_watched_at, documents, created_at
                 FROM task_groups WHERE id = ?1",
            )
            .context("Failed to prepare find_group")?;
        let row = stmt
            .query_row(params![group_id], |row| {
                Ok(GroupRow {
                    id: row.get(0)?,
                    candidate_id: row.get(1)?,
                    posting_id: row.get(2)?,
                    dual_sided: row.get(3)?,
                    ext_title: row.get(4)?,
                    ext_company: row.get(5)?,
                    ext_url: row.get(6)?,
                    flow_pattern_id: row.get(7)?,
                    demand_last_request_at: row.get(8)?,
                    supply_last_request_at: row.get(9)?,
                    demand_last_watched_at: row.get(10)?,
                    supply_last_watched_at: row.get(11)?,
                    documents: row.get(12)?,
                    created_at: row.get(13)?,
                })
            })
            .optional()
            .context("Failed to query task group")?;
        row.map(GroupRow::into_group).transpose()
    }

    fn set_dual_sided(&self, group_id: i64, dual_sided: bool) -> Result<()> {
        let updated = self
            .conn
            .execute(
                "UPDATE task_groups SET dual_sided = ?1 WHERE id = ?2",
                params![dual_sided, group_id],
            )
            .context("Failed to update dual_sided")?;
        anyhow::ensure!(updated == 1, "group {} not found", group_id);
        Ok(())
    }

    fn set_flow_pattern(&self, group_id: i64, pattern_id: Option<i64>) -> Result<()> {
        let updated = self
            .conn
            .execute(
                "UPDATE task_groups SET flow_pattern_id = ?1 WHERE id = ?2",
                params![pattern_id, group_id],
            )
            .context("Failed to update flow_pattern_id")?;
        anyhow::ensure!(updated == 1, "group {} not found", group_id);
        Ok(())
    }

    fn set_external_posting(&self, group_id: i64, posting: Option<ExternalPosting>) -> Result<()> {
        let (title, company, url) = match &posting {
            Some(p) => (Some(p.title.clone()), Some(p.company.clone()), p.url.clone()),
            None => (None, None, None),
        };
        let updated = self
            .conn
            .execute(
                "UPDATE task_groups SET ext_title = ?1, ext_company = ?2, ext_url = ?3 WHERE id = ?4",
                params![title, company, url, group_id],
            )
            .context("Failed to update external posting")?;
        anyhow::ensure!(updated == 1, "group {} not found", group_id);
        Ok(())
    }

    fn set_last_request(&self, group_id: i64, side: OperatorRole, at: DateTime<Utc>) -> Result<()> {
        let column = match side {
            OperatorRole::Demand => "demand_last_request_at",
            OperatorRole::Supply => "supply_last_request_at",
        };
        let updated = self
            .conn
            .execute(
                &format!("UPDATE task_groups SET {} = ?1 WHERE id = ?2", column),
                params![at.to_rfc3339(), group_id],
            )
            .context("Failed to update last-request timestamp")?;
        anyhow::ensure!(updated == 1, "group {} not found", group_id);
        Ok(())
    }

    fn set_last_watched(&self, group_id: i64, side: OperatorRole, at: DateTime<Utc>) -> Result<()> {
        let column = match side {
            OperatorRole::Demand => "demand_last_watched_at",
            OperatorRole::Supply => "supply_last_watched_at",
        };
        let updated = self
            .conn
            .execute(
                &format!("UPDATE task_groups SET {} = ?1 WHERE id = ?2", column),
                params![at.to_rfc3339(), group_id],
            )
            .context("Failed to update last-watched timestamp")?;
        anyhow::ensure!(updated == 1, "group {} not found", group_id);
        Ok(())
    }

    fn delete_group(&self, group_id: i64) -> Result<()> {
        let remaining: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM tasks WHERE group_id = ?1",
                params![group_id],
                |row| row.get(0),
            )
            .context("Failed to count remaining tasks")?;
        anyhow::ensure!(remaining == 0, "group {} still has tasks", group_id);
        self.conn
            .execute("DELETE FROM task_groups WHERE id = ?1", params![group_id])
            .context("Failed to delete task group")?;
        Ok(())
    }

    // ── Tasks ────────────────────────────────────────────────────────

    fn create_task(&self, task: NewTask) -> Result<Task> {
        let group = self
            .find_group(task.group_id)?
            .with_context(|| format!("group {} not found", task.group_id))?;
        self.conn
            .execute(
                "INSERT INTO tasks
                 (group_id, phase, subphase, role, operator_id, remarks, deadline_date, deadline_hour,
                  talking_points, schedule_instructions, exam_guidance, auto_generated, confirms_dual_sided, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    group.id,
                    task.state.phase.code(),
                    task.state.subphase.code(),
                    task.role.as_str(),
                    task.operator_id,
                    task.remarks,
                    task.deadline.map(|d| d.date.to_string()),
                    task.deadline.and_then(|d| d.hour),
                    task.annotations.talking_points,
                    task.annotations.schedule_instructions,
                    task.annotations.exam_guidance,
                    task.auto_generated,
                    task.confirms_dual_sided,
                    Utc::now().to_rfc3339(),
                ],
            )
            .context("Failed to insert task")?;
        let id = self.conn.last_insert_rowid();
        self.get_task(id)?.context("Task not found after insert")
    }

    fn get_task(&self, task_id: i64) -> Result<Option<Task>> {
        self.query_one_task("WHERE id = ?1", params![task_id])
    }

    fn delete_task(&self, task_id: i64) -> Result<()> {
        self.conn
            .execute("DELETE FROM tasks WHERE id = ?1", params![task_id])
            .context("Failed to delete task")?;
        Ok(())
    }

    fn latest_task(&self, group_id: i64) -> Result<Option<Task>> {
        self.query_one_task(
            "WHERE group_id = ?1 ORDER BY id DESC LIMIT 1",
            params![group_id],
        )
    }

    fn latest_task_matching_phase_before_decline(
        &self,
        group_id: i64,
        phase: Phase,
    ) -> Result<Option<Task>> {
        self.query_one_task(
            "WHERE group_id = ?1 AND phase = ?2
               AND id < (SELECT COALESCE(MAX(id), 9223372036854775807)
                         FROM tasks WHERE group_id = ?1 AND phase = ?3)
             ORDER BY id DESC LIMIT 1",
            params![group_id, phase.code(), Phase::Decline.code()],
        )
    }

    fn latest_collect_result_task(&self, group_id: i64) -> Result<Option<Task>> {
        self.query_one_task(
            "WHERE group_id = ?1 AND subphase = ?2 ORDER BY id DESC LIMIT 1",
            params![group_id, Subphase::CollectResult.code()],
        )
    }

    fn tasks_for_group(&self, group_id: i64) -> Result<Vec<Task>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{} WHERE group_id = ?1 ORDER BY id", TASK_SELECT))
            .context("Failed to prepare tasks_for_group")?;
        let rows = stmt
            .query_map(params![group_id], task_row)
            .context("Failed to query tasks")?;
        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row.context("Failed to read task row")?.into_task()?);
        }
        Ok(tasks)
    }

    fn query_one_task(&self, suffix: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Option<Task>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{} {}", TASK_SELECT, suffix))
            .context("Failed to prepare task query")?;
        let row = stmt
            .query_row(args, task_row)
            .optional()
            .context("Failed to query task")?;
        row.map(TaskRow::into_task).transpose()
    }

    // ── Scheduling ledger ────────────────────────────────────────────

    fn create_schedule(&self, schedule: NewSchedule) -> Result<SchedulingRecord> {
        let slots =
            serde_json::to_string(&schedule.slots).context("Failed to serialize slots")?;
        self.conn
            .execute(
                "INSERT INTO schedules (group_id, task_id, phase, kind, slots, reschedule_of, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    schedule.group_id,
                    schedule.task_id,
                    schedule.phase.code(),
                    schedule.kind.as_str(),
                    slots,
                    schedule.reschedule_of,
                    Utc::now().to_rfc3339(),
                ],
            )
            .context("Failed to insert scheduling record")?;
        let id = self.conn.last_insert_rowid();
        self.get_schedule(id)?
            .context("Scheduling record not found after insert")
    }

    fn get_schedule(&self, record_id: i64) -> Result<Option<SchedulingRecord>> {
        self.query_one_schedule("WHERE id = ?1", params![record_id])
    }

    fn update_schedule(&self, record_id: i64, task_id: i64, slots: Vec<Slot>) -> Result<()> {
        let slots = serde_json::to_string(&slots).context("Failed to serialize slots")?;
        let updated = self
            .conn
            .execute(
                "UPDATE schedules SET task_id = ?1, slots = ?2 WHERE id = ?3",
                params![task_id, slots, record_id],
            )
            .context("Failed to update scheduling record")?;
        anyhow::ensure!(updated == 1, "scheduling record {} not found", record_id);
        Ok(())
    }

    fn delete_proposed_schedules(&self, group_id: i64) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM schedules WHERE group_id = ?1 AND kind = ?2",
                params![group_id, SchedulingKind::ProposedByOperator.as_str()],
            )
            .context("Failed to delete proposed schedules")?;
        Ok(())
    }

    fn delete_schedules_after_task(&self, group_id: i64, task_id: i64) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM schedules WHERE group_id = ?1 AND task_id > ?2",
                params![group_id, task_id],
            )
            .context("Failed to delete schedules after task")?;
        Ok(())
    }

    fn schedules_for_group(&self, group_id: i64) -> Result<Vec<SchedulingRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{} WHERE group_id = ?1 ORDER BY id", SCHEDULE_SELECT))
            .context("Failed to prepare schedules_for_group")?;
        let rows = stmt
            .query_map(params![group_id], schedule_row)
            .context("Failed to query schedules")?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row.context("Failed to read schedule row")?.into_record()?);
        }
        Ok(records)
    }

    fn live_confirmed_slot(&self, group_id: i64, phase: Phase) -> Result<Option<SchedulingRecord>> {
        self.query_one_schedule(
            "WHERE group_id = ?1 AND phase = ?2 AND kind = ?3
               AND id NOT IN (SELECT reschedule_of FROM schedules
                              WHERE group_id = ?1 AND reschedule_of IS NOT NULL)
             ORDER BY id DESC LIMIT 1",
            params![
                group_id,
                phase.code(),
                SchedulingKind::ConfirmedByCounterparty.as_str()
            ],
        )
    }

    fn query_one_schedule(
        &self,
        suffix: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<Option<SchedulingRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{} {}", SCHEDULE_SELECT, suffix))
            .context("Failed to prepare schedule query")?;
        let row = stmt
            .query_row(args, schedule_row)
            .optional()
            .context("Failed to query schedule")?;
        row.map(ScheduleRow::into_record).transpose()
    }

    // ── Evaluation ledger ────────────────────────────────────────────

    fn create_evaluation(&self, evaluation: NewEvaluation) -> Result<EvaluationRecord> {
        self.conn
            .execute(
                "INSERT INTO evaluations (task_id, criterion_id, strengths, weaknesses, passed, retry, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    evaluation.task_id,
                    evaluation.criterion_id,
                    evaluation.strengths,
                    evaluation.weaknesses,
                    evaluation.passed,
                    evaluation.retry,
                    Utc::now().to_rfc3339(),
                ],
            )
            .context("Failed to insert evaluation record")?;
        let id = self.conn.last_insert_rowid();
        let mut stmt = self
            .conn
            .prepare(&format!("{} WHERE id = ?1", EVALUATION_SELECT))
            .context("Failed to prepare evaluation query")?;
        let row = stmt
            .query_row(params![id], evaluation_row)
            .context("Evaluation record not found after insert")?;
        row.into_record()
    }

    fn evaluations_for_group(&self, group_id: i64) -> Result<Vec<EvaluationRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "{} WHERE task_id IN (SELECT id FROM tasks WHERE group_id = ?1) ORDER BY id",
                EVALUATION_SELECT
            ))
            .context("Failed to prepare evaluations_for_group")?;
        let rows = stmt
            .query_map(params![group_id], evaluation_row)
            .context("Failed to query evaluations")?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row.context("Failed to read evaluation row")?.into_record()?);
        }
        Ok(records)
    }

    // ── Sales forecast ───────────────────────────────────────────────

    fn find_forecast(&self, candidate_id: i64, posting_id: i64) -> Result<Option<ForecastEntry>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, candidate_id, posting_id, bucket FROM forecasts
                 WHERE candidate_id = ?1 AND posting_id = ?2",
                params![candidate_id, posting_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()
            .context("Failed to query forecast")?;
        match row {
            Some((id, candidate_id, posting_id, bucket)) => Ok(Some(ForecastEntry {
                id,
                candidate_id,
                posting_id,
                bucket: ConfidenceBucket::from_str(&bucket)
                    .map_err(|e| anyhow::anyhow!("Invalid forecast bucket: {}", e))?,
            })),
            None => Ok(None),
        }
    }

    fn set_forecast_bucket(&self, forecast_id: i64, bucket: ConfidenceBucket) -> Result<()> {
        let updated = self
            .conn
            .execute(
                "UPDATE forecasts SET bucket = ?1 WHERE id = ?2",
                params![bucket.as_str(), forecast_id],
            )
            .context("Failed to update forecast bucket")?;
        anyhow::ensure!(updated == 1, "forecast {} not found", forecast_id);
        Ok(())
    }

    /// Seed a forecast entry. Production rows are owned by the reporting
    /// subsystem; this exists for embedding applications and tests.
    pub fn insert_forecast(
        &self,
        candidate_id: i64,
        posting_id: i64,
        bucket: ConfidenceBucket,
    ) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO forecasts (candidate_id, posting_id, bucket) VALUES (?1, ?2, ?3)",
                params![candidate_id, posting_id, bucket.as_str()],
            )
            .context("Failed to insert forecast")?;
        Ok(self.conn.last_insert_rowid())
    }

    // ── Candidate reachability & message log ─────────────────────────

    fn find_candidate_contact(&self, candidate_id: i64) -> Result<Option<CandidateContact>> {
        self.conn
            .query_row(
                "SELECT candidate_id, display_name, chat_user_id, chat_active, email
                 FROM candidate_contacts WHERE candidate_id = ?1",
                params![candidate_id],
                |row| {
                    Ok(CandidateContact {
                        candidate_id: row.get(0)?,
                        display_name: row.get(1)?,
                        chat_user_id: row.get(2)?,
                        chat_active: row.get(3)?,
                        email: row.get(4)?,
                    })
                },
            )
            .optional()
            .context("Failed to query candidate contact")
    }

    /// Seed a candidate contact row (out-of-scope CRUD in production).
    pub fn insert_contact(&self, contact: &CandidateContact) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO candidate_contacts
                 (candidate_id, display_name, chat_user_id, chat_active, email)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    contact.candidate_id,
                    contact.display_name,
                    contact.chat_user_id,
                    contact.chat_active,
                    contact.email,
                ],
            )
            .context("Failed to insert candidate contact")?;
        Ok(())
    }

    fn log_message(&self, message: NewMessageLog) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO message_log (group_id, candidate_id, channel, body, receipt_id, sent_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    message.group_id,
                    message.candidate_id,
                    message.channel.as_str(),
                    message.body,
                    message.receipt_id,
                    Utc::now().to_rfc3339(),
                ],
            )
            .context("Failed to insert message log")?;
        Ok(())
    }

    fn touch_chat_thread(&self, candidate_id: i64, sent_at: DateTime<Utc>) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO chat_threads (candidate_id, last_sent_at) VALUES (?1, ?2)
                 ON CONFLICT(candidate_id) DO UPDATE SET last_sent_at = excluded.last_sent_at",
                params![candidate_id, sent_at.to_rfc3339()],
            )
            .context("Failed to touch chat thread")?;
        Ok(())
    }
}

// ── Row structs (raw column capture, converted outside the closure) ──

const TASK_SELECT: &str = "SELECT id, group_id, phase, subphase, role, operator_id, remarks,
        deadline_date, deadline_hour, talking_points, schedule_instructions, exam_guidance,
        auto_generated, confirms_dual_sided, created_at FROM tasks";

const SCHEDULE_SELECT: &str =
    "SELECT id, group_id, task_id, phase, kind, slots, reschedule_of, created_at FROM schedules";

const EVALUATION_SELECT: &str =
    "SELECT id, task_id, criterion_id, strengths, weaknesses, passed, retry, created_at FROM evaluations";

struct TaskRow {
    id: i64,
    group_id: i64,
    phase: i64,
    subphase: i64,
    role: String,
    operator_id: i64,
    remarks: Option<String>,
    deadline_date: Option<String>,
    deadline_hour: Option<u8>,
    talking_points: Option<String>,
    schedule_instructions: Option<String>,
    exam_guidance: Option<String>,
    auto_generated: bool,
    confirms_dual_sided: bool,
    created_at: String,
}

fn task_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskRow> {
    Ok(TaskRow {
        id: row.get(0)?,
        group_id: row.get(1)?,
        phase: row.get(2)?,
        subphase: row.get(3)?,
        role: row.get(4)?,
        operator_id: row.get(5)?,
        remarks: row.get(6)?,
        deadline_date: row.get(7)?,
        deadline_hour: row.get(8)?,
        talking_points: row.get(9)?,
        schedule_instructions: row.get(10)?,
        exam_guidance: row.get(11)?,
        auto_generated: row.get(12)?,
        confirms_dual_sided: row.get(13)?,
        created_at: row.get(14)?,
    })
}

impl TaskRow {
    fn into_task(self) -> Result<Task> {
        let state = PhaseState::from_codes(self.phase, self.subphase)
            .map_err(|e| anyhow::anyhow!("Corrupt task row {}: {}", self.id, e))?;
        let deadline = match self.deadline_date {
            Some(date) => Some(Deadline {
                date: NaiveDate::from_str(&date).context("Invalid deadline date")?,
                hour: self.deadline_hour,
            }),
            None => None,
        };
        Ok(Task {
            id: self.id,
            group_id: self.group_id,
            state,
            role: OperatorRole::from_str(&self.role)
                .map_err(|e| anyhow::anyhow!("Corrupt task row {}: {}", self.id, e))?,
            operator_id: self.operator_id,
            remarks: self.remarks,
            deadline,
            annotations: TaskAnnotations {
                talking_points: self.talking_points,
                schedule_instructions: self.schedule_instructions,
                exam_guidance: self.exam_guidance,
            },
            auto_generated: self.auto_generated,
            confirms_dual_sided: self.confirms_dual_sided,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

struct ScheduleRow {
    id: i64,
    group_id: i64,
    task_id: i64,
    phase: i64,
    kind: String,
    slots: String,
    reschedule_of: Option<i64>,
    created_at: String,
}

fn schedule_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScheduleRow> {
    Ok(ScheduleRow {
        id: row.get(0)?,
        group_id: row.get(1)?,
        task_id: row.get(2)?,
        phase: row.get(3)?,
        kind: row.get(4)?,
        slots: row.get(5)?,
        reschedule_of: row.get(6)?,
        created_at: row.get(7)?,
    })
}

impl ScheduleRow {
    fn into_record(self) -> Result<SchedulingRecord> {
        Ok(SchedulingRecord {
            id: self.id,
            group_id: self.group_id,
            task_id: self.task_id,
            phase: Phase::from_code(self.phase)
                .with_context(|| format!("Corrupt schedule row {}", self.id))?,
            kind: SchedulingKind::from_str(&self.kind)
                .map_err(|e| anyhow::anyhow!("Corrupt schedule row {}: {}", self.id, e))?,
            slots: serde_json::from_str(&self.slots).context("Failed to parse slots")?,
            reschedule_of: self.reschedule_of,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

struct EvaluationRow {
    id: i64,
    task_id: i64,
    criterion_id: Option<i64>,
    strengths: Option<String>,
    weaknesses: Option<String>,
    passed: bool,
    retry: bool,
    created_at: String,
}

fn evaluation_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EvaluationRow> {
    Ok(EvaluationRow {
        id: row.get(0)?,
        task_id: row.get(1)?,
        criterion_id: row.get(2)?,
        strengths: row.get(3)?,
        weaknesses: row.get(4)?,
        passed: row.get(5)?,
        retry: row.get(6)?,
        created_at: row.get(7)?,
    })
}

impl EvaluationRow {
    fn into_record(self) -> Result<EvaluationRecord> {
        Ok(EvaluationRecord {
            id: self.id,
            task_id: self.task_id,
            criterion_id: self.criterion_id,
            strengths: self.strengths,
            weaknesses: self.weaknesses,
            passed: self.passed,
            retry: self.retry,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

struct GroupRow {
    id: i64,
    candidate_id: i64,
    posting_id: i64,
    dual_sided: bool,
    ext_title: Option<String>,
    ext_company: Option<String>,
    ext_url: Option<String>,
    flow_pattern_id: Option<i64>,
    demand_last_request_at: Option<String>,
    supply_last_request_at: Option<String>,
    demand_last_watched_at: Option<String>,
    supply_last_watched_at: Option<String>,
    documents: String,
    created_at: String,
}

impl GroupRow {
    fn into_group(self) -> Result<TaskGroup> {
        let external_posting = match (self.ext_title, self.ext_company) {
            (Some(title), Some(company)) => Some(ExternalPosting {
                title,
                company,
                url: self.ext_url,
            }),
            _ => None,
        };
        Ok(TaskGroup {
            id: self.id,
            candidate_id: self.candidate_id,
            posting_id: self.posting_id,
            dual_sided: self.dual_sided,
            external_posting,
            flow_pattern_id: self.flow_pattern_id,
            demand_last_request_at: parse_opt_ts(self.demand_last_request_at)?,
            supply_last_request_at: parse_opt_ts(self.supply_last_request_at)?,
            demand_last_watched_at: parse_opt_ts(self.demand_last_watched_at)?,
            supply_last_watched_at: parse_opt_ts(self.supply_last_watched_at)?,
            documents: serde_json::from_str(&self.documents).context("Failed to parse documents")?,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Invalid timestamp: {}", s))
}

fn parse_opt_ts(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
    s.as_deref().map(parse_ts).transpose()
}

#[async_trait]
impl EntityStore for SqliteStore {
    async fn create_group(&self, group: NewTaskGroup) -> Result<TaskGroup> {
        self.call(move |db| db.create_group(group)).await
    }

    async fn find_group(&self, group_id: i64) -> Result<Option<TaskGroup>> {
        self.call(move |db| db.find_group(group_id)).await
    }

    async fn set_dual_sided(&self, group_id: i64, dual_sided: bool) -> Result<()> {
        self.call(move |db| db.set_dual_sided(group_id, dual_sided))
            .await
    }

    async fn set_flow_pattern(&self, group_id: i64, pattern_id: Option<i64>) -> Result<()> {
        self.call(move |db| db.set_flow_pattern(group_id, pattern_id))
            .await
    }

    async fn set_external_posting(
        &self,
        group_id: i64,
        posting: Option<ExternalPosting>,
    ) -> Result<()> {
        self.call(move |db| db.set_external_posting(group_id, posting))
            .await
    }

    async fn set_last_request(
        &self,
        group_id: i64,
        side: OperatorRole,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.call(move |db| db.set_last_request(group_id, side, at))
            .await
    }

    async fn set_last_watched(
        &self,
        group_id: i64,
        side: OperatorRole,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.call(move |db| db.set_last_watched(group_id, side, at))
            .await
    }

    async fn delete_group(&self, group_id: i64) -> Result<()> {
        self.call(move |db| db.delete_group(group_id)).await
    }

    async fn create_task(&self, task: NewTask) -> Result<Task> {
        self.call(move |db| db.create_task(task)).await
    }

    async fn delete_task(&self, task_id: i64) -> Result<()> {
        self.call(move |db| db.delete_task(task_id)).await
    }

    async fn latest_task(&self, group_id: i64) -> Result<Option<Task>> {
        self.call(move |db| db.latest_task(group_id)).await
    }

    async fn latest_task_matching_phase_before_decline(
        &self,
        group_id: i64,
        phase: Phase,
    ) -> Result<Option<Task>> {
        self.call(move |db| db.latest_task_matching_phase_before_decline(group_id, phase))
            .await
    }

    async fn latest_collect_result_task(&self, group_id: i64) -> Result<Option<Task>> {
        self.call(move |db| db.latest_collect_result_task(group_id))
            .await
    }

    async fn tasks_for_group(&self, group_id: i64) -> Result<Vec<Task>> {
        self.call(move |db| db.tasks_for_group(group_id)).await
    }

    async fn create_schedule(&self, schedule: NewSchedule) -> Result<SchedulingRecord> {
        self.call(move |db| db.create_schedule(schedule)).await
    }

    async fn update_schedule(&self, record_id: i64, task_id: i64, slots: Vec<Slot>) -> Result<()> {
        self.call(move |db| db.update_schedule(record_id, task_id, slots))
            .await
    }

    async fn delete_proposed_schedules(&self, group_id: i64) -> Result<()> {
        self.call(move |db| db.delete_proposed_schedules(group_id))
            .await
    }

    async fn delete_schedules_after_task(&self, group_id: i64, task_id: i64) -> Result<()> {
        self.call(move |db| db.delete_schedules_after_task(group_id, task_id))
            .await
    }

    async fn schedules_for_group(&self, group_id: i64) -> Result<Vec<SchedulingRecord>> {
        self.call(move |db| db.schedules_for_group(group_id)).await
    }

    async fn live_confirmed_slot(
        &self,
        group_id: i64,
        phase: Phase,
    ) -> Result<Option<SchedulingRecord>> {
        self.call(move |db| db.live_confirmed_slot(group_id, phase))
            .await
    }

    async fn create_evaluation(&self, evaluation: NewEvaluation) -> Result<EvaluationRecord> {
        self.call(move |db| db.create_evaluation(evaluation)).await
    }

    async fn evaluations_for_group(&self, group_id: i64) -> Result<Vec<EvaluationRecord>> {
        self.call(move |db| db.evaluations_for_group(group_id)).await
    }

    async fn find_forecast(
        &self,
        candidate_id: i64,
        posting_id: i64,
    ) -> Result<Option<ForecastEntry>> {
        self.call(move |db| db.find_forecast(candidate_id, posting_id))
            .await
    }

    async fn set_forecast_bucket(&self, forecast_id: i64, bucket: ConfidenceBucket) -> Result<()> {
        self.call(move |db| db.set_forecast_bucket(forecast_id, bucket))
            .await
    }

    async fn find_candidate_contact(&self, candidate_id: i64) -> Result<Option<CandidateContact>> {
        self.call(move |db| db.find_candidate_contact(candidate_id))
            .await
    }

    async fn log_message(&self, message: NewMessageLog) -> Result<()> {
        self.call(move |db| db.log_message(message)).await
    }

    async fn touch_chat_thread(&self, candidate_id: i64, sent_at: DateTime<Utc>) -> Result<()> {
        self.call(move |db| db.touch_chat_thread(candidate_id, sent_at))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> PipelineDb {
        PipelineDb::new_in_memory().unwrap()
    }

    fn sample_group(db: &PipelineDb) -> TaskGroup {
        db.create_group(NewTaskGroup::new(10, 20)).unwrap()
    }

    fn sample_task(db: &PipelineDb, group_id: i64, phase: Phase, subphase: Subphase) -> Task {
        db.create_task(NewTask::marker(
            group_id,
            PhaseState::new(phase, subphase).unwrap(),
            OperatorRole::Demand,
            5,
        ))
        .unwrap()
    }

    #[test]
    fn migrations_are_idempotent() {
        let db = db();
        db.run_migrations().unwrap();
        db.run_migrations().unwrap();
    }

    #[test]
    fn group_create_and_find_roundtrip() {
        let db = db();
        let group = sample_group(&db);
        let found = db.find_group(group.id).unwrap().unwrap();
        assert_eq!(found.candidate_id, 10);
        assert_eq!(found.posting_id, 20);
        assert!(!found.dual_sided);
        assert!(found.external_posting.is_none());
    }

    #[test]
    fn external_posting_roundtrip() {
        let db = db();
        let group = sample_group(&db);
        db.set_external_posting(
            group.id,
            Some(ExternalPosting {
                title: "Staff Engineer".into(),
                company: "Acme".into(),
                url: Some("https://example.com/jobs/1".into()),
            }),
        )
        .unwrap();
        let found = db.find_group(group.id).unwrap().unwrap();
        let posting = found.external_posting.unwrap();
        assert_eq!(posting.title, "Staff Engineer");
        assert_eq!(posting.company, "Acme");
    }

    #[test]
    fn task_roundtrip_preserves_state_and_annotations() {
        let db = db();
        let group = sample_group(&db);
        let task = db
            .create_task(NewTask {
                group_id: group.id,
                state: PhaseState::new(Phase::Round2, Subphase::CollectAvailability).unwrap(),
                role: OperatorRole::Supply,
                operator_id: 7,
                remarks: Some("prefers mornings".into()),
                deadline: Some(Deadline {
                    date: NaiveDate::from_ymd_opt(2026, 9, 1).unwrap(),
                    hour: Some(14),
                }),
                annotations: TaskAnnotations {
                    schedule_instructions: Some("two options minimum".into()),
                    ..Default::default()
                },
                auto_generated: false,
                confirms_dual_sided: false,
            })
            .unwrap();

        assert_eq!(task.state.phase, Phase::Round2);
        assert_eq!(task.state.subphase, Subphase::CollectAvailability);
        assert_eq!(task.role, OperatorRole::Supply);
        assert_eq!(task.deadline.unwrap().hour, Some(14));
        assert_eq!(
            task.annotations.schedule_instructions.as_deref(),
            Some("two options minimum")
        );
    }

    #[test]
    fn latest_task_orders_by_insert() {
        let db = db();
        let group = sample_group(&db);
        sample_task(&db, group.id, Phase::Entry, Subphase::SoundOut);
        let last = sample_task(&db, group.id, Phase::Entry, Subphase::ConfirmIntent);
        assert_eq!(db.latest_task(group.id).unwrap().unwrap().id, last.id);
    }

    #[test]
    fn before_decline_query_matches_memory_semantics() {
        let db = db();
        let group = sample_group(&db);
        let wanted = sample_task(&db, group.id, Phase::Round1, Subphase::CollectAvailability);
        sample_task(&db, group.id, Phase::Decline, Subphase::Declined);
        sample_task(&db, group.id, Phase::Round1, Subphase::CandidateSupport);

        let found = db
            .latest_task_matching_phase_before_decline(group.id, Phase::Round1)
            .unwrap()
            .unwrap();
        assert_eq!(found.id, wanted.id);
    }

    #[test]
    fn live_confirmed_slot_respects_supersession() {
        let db = db();
        let group = sample_group(&db);
        let task = sample_task(&db, group.id, Phase::Round2, Subphase::DayOfDetails);
        let now = Utc::now();
        let confirmed = db
            .create_schedule(NewSchedule {
                group_id: group.id,
                task_id: task.id,
                phase: Phase::Round2,
                kind: SchedulingKind::ConfirmedByCounterparty,
                slots: vec![Slot {
                    starts_at: now,
                    ends_at: now,
                }],
                reschedule_of: None,
            })
            .unwrap();

        assert_eq!(
            db.live_confirmed_slot(group.id, Phase::Round2)
                .unwrap()
                .unwrap()
                .id,
            confirmed.id
        );

        db.create_schedule(NewSchedule {
            group_id: group.id,
            task_id: task.id,
            phase: Phase::Round2,
            kind: SchedulingKind::ProposedByOperator,
            slots: vec![],
            reschedule_of: Some(confirmed.id),
        })
        .unwrap();

        assert!(db.live_confirmed_slot(group.id, Phase::Round2).unwrap().is_none());
    }

    #[test]
    fn forecast_flip_is_persisted() {
        let db = db();
        let id = db.insert_forecast(10, 20, ConfidenceBucket::High).unwrap();
        db.set_forecast_bucket(id, ConfidenceBucket::Lost).unwrap();
        let found = db.find_forecast(10, 20).unwrap().unwrap();
        assert_eq!(found.bucket, ConfidenceBucket::Lost);
    }

    #[test]
    fn contact_roundtrip() {
        let db = db();
        db.insert_contact(&CandidateContact {
            candidate_id: 10,
            display_name: "A. Candidate".into(),
            chat_user_id: Some("U42".into()),
            chat_active: true,
            email: None,
        })
        .unwrap();
        let found = db.find_candidate_contact(10).unwrap().unwrap();
        assert!(found.chat_reachable());
        assert!(db.find_candidate_contact(11).unwrap().is_none());
    }

    #[tokio::test]
    async fn async_handle_runs_on_blocking_pool() {
        let store = SqliteStore::open_in_memory().unwrap();
        let group = store.create_group(NewTaskGroup::new(1, 2)).await.unwrap();
        let found = store.find_group(group.id).await.unwrap().unwrap();
        assert_eq!(found.id, group.id);
    }

    #[test]
    fn on_disk_database_persists_between_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.db");
        let group_id = {
            let db = PipelineDb::new(&path).unwrap();
            db.create_group(NewTaskGroup::new(3, 4)).unwrap().id
        };
        let db = PipelineDb::new(&path).unwrap();
        assert!(db.find_group(group_id).unwrap().is_some());
    }
}
