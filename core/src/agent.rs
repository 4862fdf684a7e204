//! Agent audit-trail model: sessions, messages, plans and events.
//!
//! A plan is an ordered list of tool invocations the assistant wants to run.
//! It moves through a small state machine and every move is written to the
//! append-only event log of its session.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

/// Maximum number of steps a single plan may contain.
pub const MAX_PLAN_STEPS: usize = 50;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AgentError {
    #[error("unknown {kind} '{value}'")]
    UnknownValue { kind: &'static str, value: String },
    #[error("plan cannot move from '{from}' to '{to}'")]
    InvalidTransition { from: PlanStatus, to: PlanStatus },
    #[error("{message}")]
    InvalidPlan { field: String, message: String },
}

/// How much the assistant may do without asking first.
///
/// Ordered: `ReadOnly < Recommendations < Assisted < Autonomous`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum AutonomyLevel {
    /// L0: every plan waits for the user.
    ReadOnly,
    /// L1: low-risk plans run without approval.
    Recommendations,
    /// L2: low and medium risk plans run without approval.
    Assisted,
    /// L3: everything except critical plans runs without approval.
    Autonomous,
}

impl Default for AutonomyLevel {
    fn default() -> Self {
        Self::Recommendations
    }
}

impl AutonomyLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReadOnly => "read_only",
            Self::Recommendations => "recommendations",
            Self::Assisted => "assisted",
            Self::Autonomous => "autonomous",
        }
    }

    /// Whether a plan of the given risk may skip user approval.
    pub fn auto_approves(self, risk: RiskLevel) -> bool {
        match self {
            Self::ReadOnly => false,
            Self::Recommendations => risk == RiskLevel::Low,
            Self::Assisted => risk <= RiskLevel::Medium,
            Self::Autonomous => risk < RiskLevel::Critical,
        }
    }
}

impl fmt::Display for AutonomyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AutonomyLevel {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "read_only" | "l0" | "0" => Ok(Self::ReadOnly),
            "recommendations" | "l1" | "1" => Ok(Self::Recommendations),
            "assisted" | "l2" | "2" => Ok(Self::Assisted),
            "autonomous" | "l3" | "3" => Ok(Self::Autonomous),
            _ => Err(AgentError::UnknownValue {
                kind: "autonomy level",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl Default for RiskLevel {
    fn default() -> Self {
        Self::Low
    }
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            _ => Err(AgentError::UnknownValue {
                kind: "risk level",
                value: s.to_string(),
            }),
        }
    }
}

/// Lifecycle of a plan:
/// `proposed → approved | rejected`, `approved → executing | rejected`,
/// `executing → completed | failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Proposed,
    Approved,
    Rejected,
    Executing,
    Completed,
    Failed,
}

impl PlanStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Proposed => "proposed",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Completed | Self::Failed)
    }

    pub fn can_transition_to(self, next: PlanStatus) -> bool {
        matches!(
            (self, next),
            (Self::Proposed, Self::Approved)
                | (Self::Proposed, Self::Rejected)
                | (Self::Approved, Self::Executing)
                | (Self::Approved, Self::Rejected)
                | (Self::Executing, Self::Completed)
                | (Self::Executing, Self::Failed)
        )
    }

    pub fn transition(self, next: PlanStatus) -> Result<PlanStatus, AgentError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(AgentError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanStatus {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "proposed" => Ok(Self::Proposed),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "executing" => Ok(Self::Executing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(AgentError::UnknownValue {
                kind: "plan status",
                value: s.to_string(),
            }),
        }
    }
}

/// User-facing operations on a plan. Each maps to exactly one target status
/// and one audit event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanAction {
    Approve,
    Reject,
    Start,
    Complete,
    Fail,
}

impl PlanAction {
    pub fn target(self) -> PlanStatus {
        match self {
            Self::Approve => PlanStatus::Approved,
            Self::Reject => PlanStatus::Rejected,
            Self::Start => PlanStatus::Executing,
            Self::Complete => PlanStatus::Completed,
            Self::Fail => PlanStatus::Failed,
        }
    }

    pub fn event_type(self) -> &'static str {
        match self {
            Self::Approve => event_types::PLAN_APPROVED,
            Self::Reject => event_types::PLAN_REJECTED,
            Self::Start => event_types::PLAN_STARTED,
            Self::Complete => event_types::PLAN_COMPLETED,
            Self::Fail => event_types::PLAN_FAILED,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Tool,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
            Self::Tool => "tool",
        }
    }
}

impl FromStr for MessageRole {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            "tool" => Ok(Self::Tool),
            _ => Err(AgentError::UnknownValue {
                kind: "message role",
                value: s.to_string(),
            }),
        }
    }
}

/// Audit event types written to `agent_events`.
pub mod event_types {
    pub const SESSION_CREATED: &str = "session_created";
    pub const SESSION_UPDATED: &str = "session_updated";
    pub const MESSAGE_ADDED: &str = "message_added";
    pub const PLAN_PROPOSED: &str = "plan_proposed";
    pub const PLAN_APPROVED: &str = "plan_approved";
    pub const PLAN_REJECTED: &str = "plan_rejected";
    pub const PLAN_STARTED: &str = "plan_started";
    pub const PLAN_COMPLETED: &str = "plan_completed";
    pub const PLAN_FAILED: &str = "plan_failed";
    pub const STEP_COMPLETED: &str = "step_completed";
    pub const STEP_FAILED: &str = "step_failed";
}

/// One tool invocation inside a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PlanStep {
    /// Tool name, e.g. "market.refresh" or "shopping.add_item"
    pub tool: String,
    /// Tool arguments, passed through verbatim
    #[serde(default)]
    pub arguments: serde_json::Value,
    /// Risk of this individual step (default "low")
    #[serde(default)]
    pub risk_level: RiskLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

pub fn validate_steps(steps: &[PlanStep]) -> Result<(), AgentError> {
    if steps.is_empty() {
        return Err(AgentError::InvalidPlan {
            field: "steps".to_string(),
            message: "a plan needs at least one step".to_string(),
        });
    }
    if steps.len() > MAX_PLAN_STEPS {
        return Err(AgentError::InvalidPlan {
            field: "steps".to_string(),
            message: format!(
                "plan has {} steps, maximum is {}",
                steps.len(),
                MAX_PLAN_STEPS
            ),
        });
    }
    for (i, step) in steps.iter().enumerate() {
        if step.tool.trim().is_empty() {
            return Err(AgentError::InvalidPlan {
                field: format!("steps[{i}].tool"),
                message: format!("steps[{i}]: tool must not be empty"),
            });
        }
    }
    Ok(())
}

/// Plan risk is the highest of the requested level and every step's level.
pub fn effective_risk(requested: Option<RiskLevel>, steps: &[PlanStep]) -> RiskLevel {
    steps
        .iter()
        .map(|s| s.risk_level)
        .chain(requested)
        .max()
        .unwrap_or_default()
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Session {
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub character_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub autonomy_level: AutonomyLevel,
    pub is_archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Message {
    pub id: Uuid,
    pub session_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Plan {
    pub id: Uuid,
    pub session_id: Uuid,
    pub purpose: String,
    pub steps: Vec<PlanStep>,
    pub risk_level: RiskLevel,
    pub status: PlanStatus,
    /// True when the session's autonomy level let the plan skip approval
    pub auto_approved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// An entry of the append-only audit log.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AgentEvent {
    pub id: Uuid,
    pub session_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<Uuid>,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Cursor-based pagination
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    /// Cursor for the next page. None if this is the last page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    /// Whether there are more results after this page
    pub has_more: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(tool: &str, risk: RiskLevel) -> PlanStep {
        PlanStep {
            tool: tool.to_string(),
            arguments: serde_json::json!({}),
            risk_level: risk,
            description: None,
        }
    }

    #[test]
    fn plan_lifecycle_happy_path() {
        let s = PlanStatus::Proposed;
        let s = s.transition(PlanStatus::Approved).unwrap();
        let s = s.transition(PlanStatus::Executing).unwrap();
        let s = s.transition(PlanStatus::Completed).unwrap();
        assert!(s.is_terminal());
    }

    #[test]
    fn plan_cannot_skip_approval_or_leave_terminal_states() {
        assert!(PlanStatus::Proposed
            .transition(PlanStatus::Executing)
            .is_err());
        assert!(!PlanStatus::Proposed.can_transition_to(PlanStatus::Completed));
        for terminal in [
            PlanStatus::Rejected,
            PlanStatus::Completed,
            PlanStatus::Failed,
        ] {
            for next in [
                PlanStatus::Proposed,
                PlanStatus::Approved,
                PlanStatus::Executing,
                PlanStatus::Completed,
            ] {
                assert!(!terminal.can_transition_to(next), "{terminal} -> {next}");
            }
        }
    }

    #[test]
    fn approved_plan_can_still_be_rejected_but_executing_cannot() {
        assert!(PlanStatus::Approved.can_transition_to(PlanStatus::Rejected));
        let err = PlanStatus::Executing
            .transition(PlanStatus::Rejected)
            .unwrap_err();
        assert_eq!(
            err,
            AgentError::InvalidTransition {
                from: PlanStatus::Executing,
                to: PlanStatus::Rejected
            }
        );
        assert_eq!(
            err.to_string(),
            "plan cannot move from 'executing' to 'rejected'"
        );
    }

    #[test]
    fn auto_approval_follows_autonomy_level() {
        use RiskLevel::*;
        assert!(!AutonomyLevel::ReadOnly.auto_approves(Low));
        assert!(AutonomyLevel::Recommendations.auto_approves(Low));
        assert!(!AutonomyLevel::Recommendations.auto_approves(Medium));
        assert!(AutonomyLevel::Assisted.auto_approves(Medium));
        assert!(!AutonomyLevel::Assisted.auto_approves(High));
        assert!(AutonomyLevel::Autonomous.auto_approves(High));
        assert!(!AutonomyLevel::Autonomous.auto_approves(Critical));
    }

    #[test]
    fn autonomy_level_parses_names_and_short_codes() {
        assert_eq!(
            "L2".parse::<AutonomyLevel>().unwrap(),
            AutonomyLevel::Assisted
        );
        assert_eq!(
            " read_only ".parse::<AutonomyLevel>().unwrap(),
            AutonomyLevel::ReadOnly
        );
        assert!("god_mode".parse::<AutonomyLevel>().is_err());
        assert_eq!(AutonomyLevel::default(), AutonomyLevel::Recommendations);
    }

    #[test]
    fn effective_risk_takes_the_highest_level() {
        let steps = vec![step("market.refresh", RiskLevel::Low), step("shopping.delete_list", RiskLevel::High)];
        assert_eq!(effective_risk(None, &steps), RiskLevel::High);
        assert_eq!(
            effective_risk(Some(RiskLevel::Critical), &steps),
            RiskLevel::Critical
        );
        assert_eq!(
            effective_risk(Some(RiskLevel::Low), &[step("a", RiskLevel::Medium)]),
            RiskLevel::Medium
        );
    }

    #[test]
    fn step_validation_reports_offending_field() {
        assert!(validate_steps(&[]).is_err());
        let err = validate_steps(&[step("ok", RiskLevel::Low), step("  ", RiskLevel::Low)])
            .unwrap_err();
        match err {
            AgentError::InvalidPlan { field, .. } => assert_eq!(field, "steps[1].tool"),
            other => panic!("unexpected error: {other:?}"),
        }
        let too_many: Vec<PlanStep> = (0..=MAX_PLAN_STEPS)
            .map(|i| step(&format!("t{i}"), RiskLevel::Low))
            .collect();
        assert!(validate_steps(&too_many).is_err());
    }

    #[test]
    fn plan_step_defaults_when_deserialized() {
        let parsed: PlanStep = serde_json::from_value(serde_json::json!({"tool": "market.compare"}))
            .unwrap();
        assert_eq!(parsed.risk_level, RiskLevel::Low);
        assert!(parsed.arguments.is_null());
    }

    #[test]
    fn every_action_targets_a_reachable_status() {
        assert_eq!(PlanAction::Start.target(), PlanStatus::Executing);
        assert_eq!(PlanAction::Fail.event_type(), event_types::PLAN_FAILED);
        assert_eq!(PlanAction::Approve.event_type(), "plan_approved");
    }
}
