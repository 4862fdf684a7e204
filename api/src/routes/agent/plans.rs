use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use eve_copilot_core::agent::{
    AgentEvent, Plan, PlanAction, PlanStatus, PlanStep, RiskLevel, effective_risk, event_types,
    validate_steps,
};
use eve_copilot_core::error::ApiError;

use crate::error::AppError;
use crate::extract::{AppJson, AppQuery, OptionalJson};
use crate::state::AppState;

use super::events::record_event;
use super::{ensure_active, fetch_session};

const MAX_PURPOSE_LEN: usize = 2_000;
const MAX_REASON_LEN: usize = 2_000;

/// Internal row type for sqlx mapping
#[derive(sqlx::FromRow)]
struct PlanRow {
    id: Uuid,
    session_id: Uuid,
    purpose: String,
    steps: serde_json::Value,
    risk_level: String,
    status: String,
    auto_approved: bool,
    rejection_reason: Option<String>,
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
    decided_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl PlanRow {
    fn into_plan(self) -> Result<Plan, AppError> {
        let id = self.id;
        let corrupt = |what: &str, e: &dyn std::fmt::Display| {
            AppError::Internal(format!("plan {id} has corrupt {what}: {e}"))
        };
        let steps: Vec<PlanStep> =
            serde_json::from_value(self.steps).map_err(|e| corrupt("steps", &e))?;
        let risk_level = self
            .risk_level
            .parse::<RiskLevel>()
            .map_err(|e| corrupt("risk level", &e))?;
        let status = self
            .status
            .parse::<PlanStatus>()
            .map_err(|e| corrupt("status", &e))?;

        Ok(Plan {
            id: self.id,
            session_id: self.session_id,
            purpose: self.purpose,
            steps,
            risk_level,
            status,
            auto_approved: self.auto_approved,
            rejection_reason: self.rejection_reason,
            failure_reason: self.failure_reason,
            created_at: self.created_at,
            decided_at: self.decided_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
        })
    }
}

const PLAN_COLUMNS: &str = "id, session_id, purpose, steps, risk_level, status, auto_approved, \
     rejection_reason, failure_reason, created_at, decided_at, started_at, finished_at";

async fn fetch_plan(
    conn: &mut sqlx::PgConnection,
    plan_id: Uuid,
    for_update: bool,
) -> Result<Plan, AppError> {
    let lock = if for_update { " FOR UPDATE" } else { "" };
    sqlx::query_as::<_, PlanRow>(&format!(
        "SELECT {PLAN_COLUMNS} FROM agent_plans WHERE id = $1{lock}"
    ))
    .bind(plan_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::not_found(format!("agent plan {plan_id}")))?
    .into_plan()
}

fn clean_reason(reason: Option<String>) -> Result<Option<String>, AppError> {
    let Some(reason) = reason else {
        return Ok(None);
    };
    let trimmed = reason.trim();
    if trimmed.chars().count() > MAX_REASON_LEN {
        return Err(AppError::validation(
            "reason",
            format!("reason must be at most {MAX_REASON_LEN} characters"),
        ));
    }
    Ok(Some(trimmed.to_string()).filter(|r| !r.is_empty()))
}

// --- Proposal ---

#[derive(Debug, Deserialize, ToSchema)]
pub struct ProposePlanRequest {
    pub purpose: String,
    pub steps: Vec<PlanStep>,
    /// Raised to the riskiest step when lower
    #[serde(default)]
    pub risk_level: Option<RiskLevel>,
}

/// Propose a plan for the session
///
/// The plan's risk is the highest of the requested level and its steps. When
/// the session's autonomy level covers that risk, the plan is approved on the
/// spot and both events are recorded.
#[utoipa::path(
    post,
    path = "/api/agent/sessions/{id}/plans",
    params(("id" = Uuid, Path, description = "Session id")),
    request_body = ProposePlanRequest,
    responses(
        (status = 201, description = "Plan recorded", body = Plan),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 404, description = "Session not found", body = ApiError),
        (status = 409, description = "Session is archived", body = ApiError)
    ),
    tag = "agent"
)]
pub async fn propose_plan(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    AppJson(req): AppJson<ProposePlanRequest>,
) -> Result<impl IntoResponse, AppError> {
    let purpose = req.purpose.trim();
    if purpose.is_empty() {
        return Err(AppError::validation("purpose", "purpose must not be empty"));
    }
    if purpose.chars().count() > MAX_PURPOSE_LEN {
        return Err(AppError::validation(
            "purpose",
            format!("purpose must be at most {MAX_PURPOSE_LEN} characters"),
        ));
    }
    validate_steps(&req.steps)?;

    let risk = effective_risk(req.risk_level, &req.steps);
    let steps_json = serde_json::to_value(&req.steps)
        .map_err(|e| AppError::Internal(format!("failed to encode plan steps: {e}")))?;

    let mut tx = state.db.begin().await?;
    let session = fetch_session(&mut tx, session_id, true).await?;
    ensure_active(&session)?;

    let auto_approved = session.autonomy_level.auto_approves(risk);
    let status = if auto_approved {
        PlanStatus::Approved
    } else {
        PlanStatus::Proposed
    };

    let plan = sqlx::query_as::<_, PlanRow>(&format!(
        "INSERT INTO agent_plans (id, session_id, purpose, steps, risk_level, status, \
                                  auto_approved, decided_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, CASE WHEN $7 THEN now() END) \
         RETURNING {PLAN_COLUMNS}"
    ))
    .bind(Uuid::now_v7())
    .bind(session_id)
    .bind(purpose)
    .bind(&steps_json)
    .bind(risk.as_str())
    .bind(status.as_str())
    .bind(auto_approved)
    .fetch_one(&mut *tx)
    .await?
    .into_plan()?;

    let mut recorded = vec![
        record_event(
            &mut tx,
            session_id,
            Some(plan.id),
            event_types::PLAN_PROPOSED,
            serde_json::json!({
                "purpose": plan.purpose,
                "risk_level": risk,
                "step_count": plan.steps.len(),
                "autonomy_level": session.autonomy_level,
            }),
        )
        .await?,
    ];
    if auto_approved {
        recorded.push(
            record_event(
                &mut tx,
                session_id,
                Some(plan.id),
                event_types::PLAN_APPROVED,
                serde_json::json!({
                    "from": PlanStatus::Proposed,
                    "to": PlanStatus::Approved,
                    "auto": true,
                }),
            )
            .await?,
        );
    }
    tx.commit().await?;
    for event in recorded {
        state.events.publish(event);
    }

    tracing::info!(
        plan_id = %plan.id,
        session_id = %session_id,
        risk_level = %risk,
        auto_approved,
        "plan proposed"
    );
    Ok((StatusCode::CREATED, Json(plan)))
}

// --- Queries ---

#[derive(Debug, Deserialize, IntoParams)]
pub struct PlanListQuery {
    /// Only plans in this status
    #[serde(default)]
    pub status: Option<PlanStatus>,
}

/// Plans of a session, newest first
#[utoipa::path(
    get,
    path = "/api/agent/sessions/{id}/plans",
    params(("id" = Uuid, Path, description = "Session id"), PlanListQuery),
    responses(
        (status = 200, description = "Plans", body = Vec<Plan>),
        (status = 404, description = "Session not found", body = ApiError)
    ),
    tag = "agent"
)]
pub async fn list_plans(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    AppQuery(params): AppQuery<PlanListQuery>,
) -> Result<Json<Vec<Plan>>, AppError> {
    let mut conn = state.db.acquire().await?;
    fetch_session(&mut conn, session_id, false).await?;

    let rows = sqlx::query_as::<_, PlanRow>(&format!(
        "SELECT {PLAN_COLUMNS} FROM agent_plans \
         WHERE session_id = $1 AND ($2::TEXT IS NULL OR status = $2) \
         ORDER BY created_at DESC, id DESC"
    ))
    .bind(session_id)
    .bind(params.status.map(PlanStatus::as_str))
    .fetch_all(&mut *conn)
    .await?;

    let plans = rows
        .into_iter()
        .map(PlanRow::into_plan)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(plans))
}

/// Get one plan
#[utoipa::path(
    get,
    path = "/api/agent/plans/{plan_id}",
    params(("plan_id" = Uuid, Path, description = "Plan id")),
    responses(
        (status = 200, description = "Plan", body = Plan),
        (status = 404, description = "Plan not found", body = ApiError)
    ),
    tag = "agent"
)]
pub async fn get_plan(
    State(state): State<AppState>,
    Path(plan_id): Path<Uuid>,
) -> Result<Json<Plan>, AppError> {
    let mut conn = state.db.acquire().await?;
    Ok(Json(fetch_plan(&mut conn, plan_id, false).await?))
}

// --- Lifecycle ---

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct TransitionRequest {
    /// Why the plan was rejected or failed; free-form note on completion
    #[serde(default)]
    pub reason: Option<String>,
}

/// Move a plan to the status an action targets, in one transaction with its
/// audit event.
async fn apply_action(
    state: &AppState,
    plan_id: Uuid,
    action: PlanAction,
    reason: Option<String>,
) -> Result<Plan, AppError> {
    let reason = clean_reason(reason)?;

    let mut tx = state.db.begin().await?;
    let plan = fetch_plan(&mut tx, plan_id, true).await?;
    let from = plan.status;
    let to = from.transition(action.target())?;

    let (rejection_reason, failure_reason) = match action {
        PlanAction::Reject => (reason.as_deref(), None),
        PlanAction::Fail => (None, reason.as_deref()),
        _ => (None, None),
    };

    let updated = sqlx::query_as::<_, PlanRow>(&format!(
        "UPDATE agent_plans \
         SET status = $2, \
             rejection_reason = COALESCE($3, rejection_reason), \
             failure_reason = COALESCE($4, failure_reason), \
             decided_at = CASE WHEN $2 IN ('approved', 'rejected') THEN now() ELSE decided_at END, \
             started_at = CASE WHEN $2 = 'executing' THEN now() ELSE started_at END, \
             finished_at = CASE WHEN $2 IN ('completed', 'failed', 'rejected') THEN now() ELSE finished_at END \
         WHERE id = $1 RETURNING {PLAN_COLUMNS}"
    ))
    .bind(plan_id)
    .bind(to.as_str())
    .bind(rejection_reason)
    .bind(failure_reason)
    .fetch_one(&mut *tx)
    .await?
    .into_plan()?;

    let mut payload = serde_json::json!({ "from": from, "to": to });
    if let Some(reason) = &reason {
        payload["reason"] = serde_json::json!(reason);
    }
    let event = record_event(
        &mut tx,
        plan.session_id,
        Some(plan_id),
        action.event_type(),
        payload,
    )
    .await?;
    tx.commit().await?;
    state.events.publish(event);

    tracing::info!(plan_id = %plan_id, from = %from, to = %to, "plan transition");
    Ok(updated)
}

/// Approve a proposed plan
#[utoipa::path(
    post,
    path = "/api/agent/plans/{plan_id}/approve",
    params(("plan_id" = Uuid, Path, description = "Plan id")),
    responses(
        (status = 200, description = "Plan approved", body = Plan),
        (status = 404, description = "Plan not found", body = ApiError),
        (status = 409, description = "Plan is not proposed", body = ApiError)
    ),
    tag = "agent"
)]
pub async fn approve_plan(
    State(state): State<AppState>,
    Path(plan_id): Path<Uuid>,
) -> Result<Json<Plan>, AppError> {
    Ok(Json(apply_action(&state, plan_id, PlanAction::Approve, None).await?))
}

/// Reject a proposed or approved plan
#[utoipa::path(
    post,
    path = "/api/agent/plans/{plan_id}/reject",
    params(("plan_id" = Uuid, Path, description = "Plan id")),
    request_body(content = TransitionRequest, description = "Optional; an empty body is accepted"),
    responses(
        (status = 200, description = "Plan rejected", body = Plan),
        (status = 404, description = "Plan not found", body = ApiError),
        (status = 409, description = "Plan already started or finished", body = ApiError)
    ),
    tag = "agent"
)]
pub async fn reject_plan(
    State(state): State<AppState>,
    Path(plan_id): Path<Uuid>,
    OptionalJson(req): OptionalJson<TransitionRequest>,
) -> Result<Json<Plan>, AppError> {
    Ok(Json(
        apply_action(&state, plan_id, PlanAction::Reject, req.reason).await?,
    ))
}

/// Mark an approved plan as executing
#[utoipa::path(
    post,
    path = "/api/agent/plans/{plan_id}/start",
    params(("plan_id" = Uuid, Path, description = "Plan id")),
    responses(
        (status = 200, description = "Plan executing", body = Plan),
        (status = 404, description = "Plan not found", body = ApiError),
        (status = 409, description = "Plan is not approved", body = ApiError)
    ),
    tag = "agent"
)]
pub async fn start_plan(
    State(state): State<AppState>,
    Path(plan_id): Path<Uuid>,
) -> Result<Json<Plan>, AppError> {
    Ok(Json(apply_action(&state, plan_id, PlanAction::Start, None).await?))
}

/// Mark an executing plan as completed
#[utoipa::path(
    post,
    path = "/api/agent/plans/{plan_id}/complete",
    params(("plan_id" = Uuid, Path, description = "Plan id")),
    request_body(content = TransitionRequest, description = "Optional; an empty body is accepted"),
    responses(
        (status = 200, description = "Plan completed", body = Plan),
        (status = 404, description = "Plan not found", body = ApiError),
        (status = 409, description = "Plan is not executing", body = ApiError)
    ),
    tag = "agent"
)]
pub async fn complete_plan(
    State(state): State<AppState>,
    Path(plan_id): Path<Uuid>,
    OptionalJson(req): OptionalJson<TransitionRequest>,
) -> Result<Json<Plan>, AppError> {
    Ok(Json(
        apply_action(&state, plan_id, PlanAction::Complete, req.reason).await?,
    ))
}

/// Mark an executing plan as failed
#[utoipa::path(
    post,
    path = "/api/agent/plans/{plan_id}/fail",
    params(("plan_id" = Uuid, Path, description = "Plan id")),
    request_body(content = TransitionRequest, description = "Optional; an empty body is accepted"),
    responses(
        (status = 200, description = "Plan failed", body = Plan),
        (status = 404, description = "Plan not found", body = ApiError),
        (status = 409, description = "Plan is not executing", body = ApiError)
    ),
    tag = "agent"
)]
pub async fn fail_plan(
    State(state): State<AppState>,
    Path(plan_id): Path<Uuid>,
    OptionalJson(req): OptionalJson<TransitionRequest>,
) -> Result<Json<Plan>, AppError> {
    Ok(Json(
        apply_action(&state, plan_id, PlanAction::Fail, req.reason).await?,
    ))
}

// --- Step outcomes ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Completed,
    Failed,
}

impl StepOutcome {
    fn event_type(self) -> &'static str {
        match self {
            Self::Completed => event_types::STEP_COMPLETED,
            Self::Failed => event_types::STEP_FAILED,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct StepOutcomeRequest {
    pub outcome: StepOutcome,
    /// Tool output, stored verbatim in the event payload
    #[serde(default)]
    pub output: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}

fn check_step(plan: &Plan, index: usize) -> Result<&PlanStep, AppError> {
    if plan.status != PlanStatus::Executing {
        return Err(AppError::Conflict {
            message: format!(
                "step outcomes can only be recorded while the plan is executing (plan is {})",
                plan.status
            ),
        });
    }
    plan.steps.get(index).ok_or_else(|| AppError::Validation {
        message: format!("plan has {} steps, index {index} is out of range", plan.steps.len()),
        field: Some("index".to_string()),
        received: Some(serde_json::json!(index)),
        docs_hint: None,
    })
}

/// Record the outcome of one step of an executing plan
///
/// Only writes the audit event; the plan itself is finished with
/// `complete` or `fail`.
#[utoipa::path(
    post,
    path = "/api/agent/plans/{plan_id}/steps/{index}",
    params(
        ("plan_id" = Uuid, Path, description = "Plan id"),
        ("index" = usize, Path, description = "Zero-based step index")
    ),
    request_body = StepOutcomeRequest,
    responses(
        (status = 201, description = "Step event recorded", body = AgentEvent),
        (status = 400, description = "Index out of range", body = ApiError),
        (status = 404, description = "Plan not found", body = ApiError),
        (status = 409, description = "Plan is not executing", body = ApiError)
    ),
    tag = "agent"
)]
pub async fn record_step(
    State(state): State<AppState>,
    Path((plan_id, index)): Path<(Uuid, usize)>,
    AppJson(req): AppJson<StepOutcomeRequest>,
) -> Result<impl IntoResponse, AppError> {
    let mut tx = state.db.begin().await?;
    let plan = fetch_plan(&mut tx, plan_id, true).await?;
    let step = check_step(&plan, index)?;

    let mut payload = serde_json::json!({
        "index": index,
        "tool": step.tool,
        "outcome": req.outcome,
    });
    if let Some(output) = req.output {
        payload["output"] = output;
    }
    if let Some(error) = req.error {
        payload["error"] = serde_json::json!(error);
    }

    let event = record_event(
        &mut tx,
        plan.session_id,
        Some(plan_id),
        req.outcome.event_type(),
        payload,
    )
    .await?;
    tx.commit().await?;
    state.events.publish(event.clone());

    tracing::info!(plan_id = %plan_id, index, outcome = ?req.outcome, "plan step recorded");
    Ok((StatusCode::CREATED, Json(event)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use tower::ServiceExt;

    use crate::state::test_state;
    use eve_copilot_core::agent::AutonomyLevel;

    fn plan(status: PlanStatus, steps: usize) -> Plan {
        Plan {
            id: Uuid::now_v7(),
            session_id: Uuid::now_v7(),
            purpose: "restock".to_string(),
            steps: (0..steps)
                .map(|i| PlanStep {
                    tool: format!("tool{i}"),
                    arguments: serde_json::Value::Null,
                    risk_level: RiskLevel::Low,
                    description: None,
                })
                .collect(),
            risk_level: RiskLevel::Low,
            status,
            auto_approved: false,
            rejection_reason: None,
            failure_reason: None,
            created_at: Utc::now(),
            decided_at: None,
            started_at: None,
            finished_at: None,
        }
    }

    #[test]
    fn steps_are_only_recorded_while_executing() {
        let p = plan(PlanStatus::Approved, 2);
        assert!(matches!(check_step(&p, 0), Err(AppError::Conflict { .. })));

        let p = plan(PlanStatus::Executing, 2);
        assert_eq!(check_step(&p, 1).unwrap().tool, "tool1");
        match check_step(&p, 2) {
            Err(AppError::Validation { field, .. }) => assert_eq!(field.as_deref(), Some("index")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn reasons_are_trimmed_and_bounded() {
        assert_eq!(clean_reason(None).unwrap(), None);
        assert_eq!(clean_reason(Some("  ".into())).unwrap(), None);
        assert_eq!(
            clean_reason(Some(" too pricey ".into())).unwrap().as_deref(),
            Some("too pricey")
        );
        assert!(clean_reason(Some("x".repeat(MAX_REASON_LEN + 1))).is_err());
    }

    #[test]
    fn corrupt_plan_rows_are_internal_errors() {
        let row = PlanRow {
            id: Uuid::now_v7(),
            session_id: Uuid::now_v7(),
            purpose: "p".to_string(),
            steps: serde_json::json!([{"tool": "market.refresh"}]),
            risk_level: "extreme".to_string(),
            status: "proposed".to_string(),
            auto_approved: false,
            rejection_reason: None,
            failure_reason: None,
            created_at: Utc::now(),
            decided_at: None,
            started_at: None,
            finished_at: None,
        };
        assert!(matches!(row.into_plan(), Err(AppError::Internal(_))));
    }

    async fn insert_session(state: &AppState, level: AutonomyLevel) -> Uuid {
        let id = Uuid::now_v7();
        sqlx::query("INSERT INTO agent_sessions (id, autonomy_level) VALUES ($1, $2)")
            .bind(id)
            .bind(level.as_str())
            .execute(&state.db)
            .await
            .expect("insert session");
        id
    }

    async fn event_types_of(state: &AppState, plan_id: Uuid) -> Vec<String> {
        sqlx::query_scalar::<_, String>(
            "SELECT event_type FROM agent_events WHERE plan_id = $1 ORDER BY created_at, id",
        )
        .bind(plan_id)
        .fetch_all(&state.db)
        .await
        .expect("events")
    }

    fn proposal(risk: RiskLevel) -> ProposePlanRequest {
        ProposePlanRequest {
            purpose: "buy minerals".to_string(),
            steps: vec![PlanStep {
                tool: "shopping.add_item".to_string(),
                arguments: serde_json::json!({"type_id": 34, "quantity": 1000}),
                risk_level: risk,
                description: None,
            }],
            risk_level: None,
        }
    }

    #[tokio::test]
    async fn full_lifecycle_is_audited_in_order() {
        let Some(state) = test_state().await else {
            return;
        };
        let session_id = insert_session(&state, AutonomyLevel::ReadOnly).await;
        let mut live = state.events.subscribe();

        let created = propose_plan(
            State(state.clone()),
            Path(session_id),
            AppJson(proposal(RiskLevel::Low)),
        )
        .await
        .expect("propose")
        .into_response();
        assert_eq!(created.status(), StatusCode::CREATED);

        let plan_id = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM agent_plans WHERE session_id = $1",
        )
        .bind(session_id)
        .fetch_one(&state.db)
        .await
        .expect("plan id");

        apply_action(&state, plan_id, PlanAction::Approve, None)
            .await
            .expect("approve");
        apply_action(&state, plan_id, PlanAction::Start, None)
            .await
            .expect("start");
        let done = apply_action(&state, plan_id, PlanAction::Complete, None)
            .await
            .expect("complete");
        assert_eq!(done.status, PlanStatus::Completed);
        assert!(done.finished_at.is_some());

        let err = apply_action(&state, plan_id, PlanAction::Reject, Some("late".into()))
            .await
            .expect_err("terminal plans cannot move");
        assert!(matches!(err, AppError::InvalidTransition { .. }));

        assert_eq!(
            event_types_of(&state, plan_id).await,
            vec![
                "plan_proposed",
                "plan_approved",
                "plan_started",
                "plan_completed"
            ]
        );
        let first = live.recv().await.expect("live event");
        assert_eq!(first.event_type, event_types::PLAN_PROPOSED);

        sqlx::query("DELETE FROM agent_sessions WHERE id = $1")
            .bind(session_id)
            .execute(&state.db)
            .await
            .expect("cleanup");
    }

    #[tokio::test]
    async fn autonomy_level_auto_approves_covered_risk() {
        let Some(state) = test_state().await else {
            return;
        };
        let session_id = insert_session(&state, AutonomyLevel::Assisted).await;

        propose_plan(
            State(state.clone()),
            Path(session_id),
            AppJson(proposal(RiskLevel::Medium)),
        )
        .await
        .expect("propose");

        let status = sqlx::query_scalar::<_, String>(
            "SELECT status FROM agent_plans WHERE session_id = $1",
        )
        .bind(session_id)
        .fetch_one(&state.db)
        .await
        .expect("status");
        assert_eq!(status, "approved");

        sqlx::query("DELETE FROM agent_sessions WHERE id = $1")
            .bind(session_id)
            .execute(&state.db)
            .await
            .expect("cleanup");
    }

    #[tokio::test]
    async fn reject_accepts_a_request_without_body() {
        let Some(state) = test_state().await else {
            return;
        };
        let session_id = insert_session(&state, AutonomyLevel::ReadOnly).await;
        propose_plan(
            State(state.clone()),
            Path(session_id),
            AppJson(proposal(RiskLevel::High)),
        )
        .await
        .expect("propose");
        let plan_id = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM agent_plans WHERE session_id = $1",
        )
        .bind(session_id)
        .fetch_one(&state.db)
        .await
        .expect("plan id");

        let app = crate::routes::agent::router().with_state(state.clone());
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri(format!("/api/agent/plans/{plan_id}/reject"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "rejected");
        assert!(body["rejection_reason"].is_null());

        sqlx::query("DELETE FROM agent_sessions WHERE id = $1")
            .bind(session_id)
            .execute(&state.db)
            .await
            .expect("cleanup");
    }
}
