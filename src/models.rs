//! Domain models for the pipeline engine: task groups, tasks, scheduling and
//! evaluation ledger rows, sales forecast entries, and the advance request
//! shape the engine consumes.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::phase::{Phase, PhaseState};

/// Maximum uploaded-document slots on a task group.
pub const MAX_DOCUMENT_SLOTS: usize = 5;

/// Which side of the engagement an operator works.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorRole {
    /// Represents the hiring company.
    Demand,
    /// Represents the candidate.
    Supply,
}

impl OperatorRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Demand => "demand",
            Self::Supply => "supply",
        }
    }

    /// The opposite side.
    pub fn counterpart(&self) -> Self {
        match self {
            Self::Demand => Self::Supply,
            Self::Supply => Self::Demand,
        }
    }
}

impl FromStr for OperatorRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "demand" => Ok(Self::Demand),
            "supply" => Ok(Self::Supply),
            _ => Err(format!("Invalid operator role: {}", s)),
        }
    }
}

/// Sales-forecast confidence bucket for a pipeline instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceBucket {
    Accepted,
    High,
    Medium,
    Low,
    Speculative,
    Lost,
}

impl ConfidenceBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Speculative => "speculative",
            Self::Lost => "lost",
        }
    }
}

impl FromStr for ConfidenceBucket {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accepted" => Ok(Self::Accepted),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            "speculative" => Ok(Self::Speculative),
            "lost" => Ok(Self::Lost),
            _ => Err(format!("Invalid confidence bucket: {}", s)),
        }
    }
}

/// Kind of scheduling record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingKind {
    /// Candidate slots proposed by an operator, awaiting confirmation.
    ProposedByOperator,
    /// The single slot confirmed by the counterparty.
    ConfirmedByCounterparty,
}

impl SchedulingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProposedByOperator => "proposed_by_operator",
            Self::ConfirmedByCounterparty => "confirmed_by_counterparty",
        }
    }
}

impl FromStr for SchedulingKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "proposed_by_operator" => Ok(Self::ProposedByOperator),
            "confirmed_by_counterparty" => Ok(Self::ConfirmedByCounterparty),
            _ => Err(format!("Invalid scheduling kind: {}", s)),
        }
    }
}

/// Metadata for a posting that originates outside the system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalPosting {
    pub title: String,
    pub company: String,
    pub url: Option<String>,
}

/// Pipeline instance: one candidate engaged against one job posting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskGroup {
    pub id: i64,
    pub candidate_id: i64,
    pub posting_id: i64,
    /// True when one operator represents both sides.
    pub dual_sided: bool,
    pub external_posting: Option<ExternalPosting>,
    pub flow_pattern_id: Option<i64>,
    pub demand_last_request_at: Option<DateTime<Utc>>,
    pub supply_last_request_at: Option<DateTime<Utc>>,
    pub demand_last_watched_at: Option<DateTime<Utc>>,
    pub supply_last_watched_at: Option<DateTime<Utc>>,
    /// Up to [`MAX_DOCUMENT_SLOTS`] uploaded document references.
    pub documents: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Deadline for a task: a date plus an optional hour of day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deadline {
    pub date: NaiveDate,
    /// 0–23, or `None` when the hour is unspecified.
    pub hour: Option<u8>,
}

/// Phase-specific free-text annotations carried on a task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskAnnotations {
    pub talking_points: Option<String>,
    pub schedule_instructions: Option<String>,
    pub exam_guidance: Option<String>,
}

impl TaskAnnotations {
    pub fn is_empty(&self) -> bool {
        self.talking_points.is_none()
            && self.schedule_instructions.is_none()
            && self.exam_guidance.is_none()
    }
}

/// One immutable unit of work inside a task group.
///
/// Tasks form a linear append-only history; the group's current state is the
/// most recently created task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub group_id: i64,
    pub state: PhaseState,
    pub role: OperatorRole,
    pub operator_id: i64,
    pub remarks: Option<String>,
    pub deadline: Option<Deadline>,
    pub annotations: TaskAnnotations,
    /// Set on engine-inserted marker tasks (skip, reschedule, implicit
    /// confirm-intent); drives the delete cascade.
    pub auto_generated: bool,
    /// Set on the task whose transition marked the group dual-sided.
    pub confirms_dual_sided: bool,
    pub created_at: DateTime<Utc>,
}

/// Creation payload for a task.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub group_id: i64,
    pub state: PhaseState,
    pub role: OperatorRole,
    pub operator_id: i64,
    pub remarks: Option<String>,
    pub deadline: Option<Deadline>,
    pub annotations: TaskAnnotations,
    pub auto_generated: bool,
    pub confirms_dual_sided: bool,
}

impl NewTask {
    /// A bare task at the given state, with no operator-supplied extras.
    /// Used for engine-inserted markers.
    pub fn marker(group_id: i64, state: PhaseState, role: OperatorRole, operator_id: i64) -> Self {
        Self {
            group_id,
            state,
            role,
            operator_id,
            remarks: None,
            deadline: None,
            annotations: TaskAnnotations::default(),
            auto_generated: true,
            confirms_dual_sided: false,
        }
    }
}

/// One proposed or confirmed time slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

/// Operator-supplied slot, optionally carrying the task link of an already
/// persisted record so a rewrite preserves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotInput {
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    #[serde(default)]
    pub original_task_id: Option<i64>,
}

/// Scheduling ledger row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingRecord {
    pub id: i64,
    pub group_id: i64,
    pub task_id: i64,
    pub phase: Phase,
    pub kind: SchedulingKind,
    pub slots: Vec<Slot>,
    /// Back-reference to the record this one reschedules.
    pub reschedule_of: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Creation payload for a scheduling record.
#[derive(Debug, Clone)]
pub struct NewSchedule {
    pub group_id: i64,
    pub task_id: i64,
    pub phase: Phase,
    pub kind: SchedulingKind,
    pub slots: Vec<Slot>,
    pub reschedule_of: Option<i64>,
}

/// Evaluation ledger row: pass/fail outcome for a completed step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub id: i64,
    pub task_id: i64,
    /// Criterion inside the chosen flow pattern, when resolvable.
    pub criterion_id: Option<i64>,
    pub strengths: Option<String>,
    pub weaknesses: Option<String>,
    pub passed: bool,
    pub retry: bool,
    pub created_at: DateTime<Utc>,
}

/// Creation payload for an evaluation record.
#[derive(Debug, Clone)]
pub struct NewEvaluation {
    pub task_id: i64,
    pub criterion_id: Option<i64>,
    pub strengths: Option<String>,
    pub weaknesses: Option<String>,
    pub passed: bool,
    pub retry: bool,
}

/// Operator-supplied free text attached to an evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationInput {
    pub strengths: Option<String>,
    pub weaknesses: Option<String>,
}

/// Sales forecast entry for a pipeline instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastEntry {
    pub id: i64,
    pub candidate_id: i64,
    pub posting_id: i64,
    pub bucket: ConfidenceBucket,
}

/// Candidate reachability, read-only to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateContact {
    pub candidate_id: i64,
    pub display_name: String,
    /// Messaging-platform user id, when the candidate linked an account.
    pub chat_user_id: Option<String>,
    /// False once the linked account is deactivated; fall back to email.
    pub chat_active: bool,
    pub email: Option<String>,
}

impl CandidateContact {
    /// True when the candidate can be reached over the chat platform.
    pub fn chat_reachable(&self) -> bool {
        self.chat_active && self.chat_user_id.is_some()
    }
}

/// Durable copy of an outbound candidate message.
#[derive(Debug, Clone)]
pub struct NewMessageLog {
    pub group_id: i64,
    pub candidate_id: i64,
    pub channel: MessageChannel,
    pub body: String,
    /// Engine-generated delivery receipt id.
    pub receipt_id: String,
}

/// Channel an outbound message was delivered on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageChannel {
    Chat,
    Email,
}

impl MessageChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Email => "email",
        }
    }
}

/// Caller-selected behavior modifier for a transition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOption {
    #[default]
    None,
    /// Re-link the live confirmed slot to the new task.
    Reschedule,
    /// Drop scheduling records created after the latest collect-result task
    /// and insert a reschedule marker.
    RescheduleAndDelete,
    /// Insert a marker for the skipped round before the requested task.
    SkipSelection,
    /// Send an outbound message alongside the transition.
    SendMessage(MessageAudience),
}

/// Who an outbound message is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageAudience {
    ForCandidate,
}

/// Contextual parameters for a single advance call.
#[derive(Debug, Clone, Default)]
pub struct AdvanceOptions {
    pub task_option: TaskOption,
    /// Explicit request to mark the group dual-sided (only honored on a
    /// request-recommendation transition).
    pub mark_dual_sided: bool,
    pub remarks: Option<String>,
    pub deadline: Option<Deadline>,
    /// Proposed candidate slots for an availability/confirmation request.
    pub proposed_slots: Vec<SlotInput>,
    /// The confirmed slot for a day-of-details request.
    pub confirmed_slot: Option<SlotInput>,
    pub evaluation: Option<EvaluationInput>,
    pub annotations: TaskAnnotations,
    /// Body for the outbound message when `task_option` requests one.
    pub message_body: Option<String>,
}

/// One requested transition for a pipeline instance.
#[derive(Debug, Clone)]
pub struct AdvanceRequest {
    pub group_id: i64,
    /// The caller's declared current state; must match the handler's family.
    pub current: PhaseState,
    pub requested: PhaseState,
    pub role: OperatorRole,
    pub operator_id: i64,
    pub options: AdvanceOptions,
}

impl AdvanceRequest {
    pub fn new(
        group_id: i64,
        current: PhaseState,
        requested: PhaseState,
        role: OperatorRole,
        operator_id: i64,
    ) -> Self {
        Self {
            group_id,
            current,
            requested,
            role,
            operator_id,
            options: AdvanceOptions::default(),
        }
    }

    pub fn with_options(mut self, options: AdvanceOptions) -> Self {
        self.options = options;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::Subphase;

    #[test]
    fn test_operator_role_roundtrip() {
        for role in [OperatorRole::Demand, OperatorRole::Supply] {
            assert_eq!(role.as_str().parse::<OperatorRole>().unwrap(), role);
        }
        assert!("both".parse::<OperatorRole>().is_err());
    }

    #[test]
    fn test_operator_role_counterpart() {
        assert_eq!(OperatorRole::Demand.counterpart(), OperatorRole::Supply);
        assert_eq!(OperatorRole::Supply.counterpart(), OperatorRole::Demand);
    }

    #[test]
    fn test_confidence_bucket_roundtrip() {
        for bucket in [
            ConfidenceBucket::Accepted,
            ConfidenceBucket::High,
            ConfidenceBucket::Medium,
            ConfidenceBucket::Low,
            ConfidenceBucket::Speculative,
            ConfidenceBucket::Lost,
        ] {
            assert_eq!(bucket.as_str().parse::<ConfidenceBucket>().unwrap(), bucket);
        }
        assert!("certain".parse::<ConfidenceBucket>().is_err());
    }

    #[test]
    fn test_scheduling_kind_roundtrip() {
        for kind in [
            SchedulingKind::ProposedByOperator,
            SchedulingKind::ConfirmedByCounterparty,
        ] {
            assert_eq!(kind.as_str().parse::<SchedulingKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_chat_reachable() {
        let mut contact = CandidateContact {
            candidate_id: 1,
            display_name: "A. Candidate".into(),
            chat_user_id: Some("U123".into()),
            chat_active: true,
            email: Some("a@example.com".into()),
        };
        assert!(contact.chat_reachable());

        contact.chat_active = false;
        assert!(!contact.chat_reachable());

        contact.chat_active = true;
        contact.chat_user_id = None;
        assert!(!contact.chat_reachable());
    }

    #[test]
    fn test_task_option_default_is_none() {
        assert_eq!(TaskOption::default(), TaskOption::None);
    }

    #[test]
    fn test_marker_task_is_auto_generated() {
        let state = PhaseState::new(Phase::Round3, Subphase::SkipMarker).unwrap();
        let task = NewTask::marker(7, state, OperatorRole::Supply, 42);
        assert!(task.auto_generated);
        assert!(!task.confirms_dual_sided);
        assert!(task.remarks.is_none());
        assert!(task.annotations.is_empty());
    }

    #[test]
    fn test_task_option_serialization() {
        let opt = TaskOption::SendMessage(MessageAudience::ForCandidate);
        let json = serde_json::to_string(&opt).unwrap();
        let parsed: TaskOption = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, opt);
    }

    #[test]
    fn test_annotations_is_empty() {
        assert!(TaskAnnotations::default().is_empty());
        let ann = TaskAnnotations {
            talking_points: Some("strength areas".into()),
            ..Default::default()
        };
        assert!(!ann.is_empty());
    }
}
