use crate::errors::{AppError, CoreError};
use crate::models::{
    GroupSummary, Member, MemberNameRequest, MemberStatus, RemoveResponse, ReportQuery, SignRequest,
    SignResponse, StatusResponse, TodayResponse, UndoResponse,
};
use crate::report::{Report, ReportPeriod, build_report, parse_anchor};
use crate::state::AppState;
use crate::status::SignOutcome;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use tracing::info;

pub async fn get_today(State(state): State<AppState>) -> Json<TodayResponse> {
    Json(TodayResponse {
        date: state.engine.current_day_key().await,
        timezone: state.calendar.timezone().name().to_string(),
    })
}

pub async fn list_groups(State(state): State<AppState>) -> Json<Vec<GroupSummary>> {
    let groups = state
        .roster
        .list_groups()
        .await
        .into_iter()
        .map(|(id, name, member_count)| GroupSummary { id, name, member_count })
        .collect();
    Json(groups)
}

pub async fn list_members(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
) -> Result<Json<Vec<MemberStatus>>, AppError> {
    Ok(Json(status_response(&state, &group_id).await?.members))
}

pub async fn add_member(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
    Json(payload): Json<MemberNameRequest>,
) -> Result<(StatusCode, Json<Member>), AppError> {
    let member = state.roster.add_member(&group_id, &payload.name).await?;
    info!(group_id = %member.group_id, member_id = %member.id, "member added");
    Ok((StatusCode::CREATED, Json(member)))
}

pub async fn rename_member(
    State(state): State<AppState>,
    Path((group_id, member_id)): Path<(String, String)>,
    Json(payload): Json<MemberNameRequest>,
) -> Result<Json<Member>, AppError> {
    let member = state
        .roster
        .rename_member(&group_id, &member_id, &payload.name)
        .await?;
    Ok(Json(member))
}

pub async fn remove_member(
    State(state): State<AppState>,
    Path((group_id, member_id)): Path<(String, String)>,
) -> Result<Json<RemoveResponse>, AppError> {
    let removed = state.roster.remove_member(&group_id, &member_id).await?;
    if removed.is_some() {
        info!(%group_id, %member_id, "member removed");
    }
    Ok(Json(RemoveResponse {
        removed: removed.is_some(),
    }))
}

pub async fn get_status(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
) -> Result<Json<StatusResponse>, AppError> {
    Ok(Json(status_response(&state, &group_id).await?))
}

pub async fn sign_out(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
    Json(payload): Json<SignRequest>,
) -> Result<Json<SignResponse>, AppError> {
    let member = resolve_member(&state, &group_id, &payload.member_id).await?;
    let outcome = state.engine.sign_out(&member).await?;
    sign_response(&state, &group_id, outcome).await
}

pub async fn sign_in(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
    Json(payload): Json<SignRequest>,
) -> Result<Json<SignResponse>, AppError> {
    let member = resolve_member(&state, &group_id, &payload.member_id).await?;
    let outcome = state.engine.sign_in(&member).await?;
    sign_response(&state, &group_id, outcome).await
}

pub async fn undo(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
) -> Result<Json<UndoResponse>, AppError> {
    let removed = state.engine.undo_last(&group_id).await?;
    Ok(Json(UndoResponse {
        removed,
        status: status_response(&state, &group_id).await?,
    }))
}

pub async fn get_report(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
    Query(query): Query<ReportQuery>,
) -> Result<Json<Report>, AppError> {
    let period = match query.period.as_deref() {
        Some(value) => value.parse()?,
        None => ReportPeriod::Week,
    };
    let today = state.calendar.local_date(state.clock.now());
    let anchor = parse_anchor(query.date.as_deref(), today)?;
    let report = build_report(state.store.as_ref(), &state.calendar, &group_id, period, anchor).await?;
    Ok(Json(report))
}

async fn resolve_member(state: &AppState, group_id: &str, member_id: &str) -> Result<Member, AppError> {
    if member_id.trim().is_empty() {
        return Err(AppError::bad_request("memberId must not be empty"));
    }
    state
        .roster
        .find_member(group_id, member_id)
        .await
        .ok_or_else(|| AppError::not_found(format!("member `{member_id}` not found in group `{group_id}`")))
}

async fn sign_response(
    state: &AppState,
    group_id: &str,
    outcome: SignOutcome,
) -> Result<Json<SignResponse>, AppError> {
    let event = outcome.event().cloned();
    Ok(Json(SignResponse {
        recorded: event.is_some(),
        event,
        status: status_response(state, group_id).await?,
    }))
}

async fn status_response(state: &AppState, group_id: &str) -> Result<StatusResponse, CoreError> {
    state.engine.watch(group_id).await?;
    let snapshot = state.engine.snapshot(group_id).await?;
    let members = state
        .roster
        .list_members(group_id)
        .await
        .into_iter()
        .map(|member| MemberStatus {
            is_out: snapshot.is_out(&member.id),
            id: member.id,
            name: member.name,
        })
        .collect();
    Ok(StatusResponse {
        group_id: group_id.to_string(),
        date: snapshot.day_key,
        members,
        events: snapshot.events,
    })
}
