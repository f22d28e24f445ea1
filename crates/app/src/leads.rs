use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use estate_desk_core::types::{ContactRecord, Lead, LeadDraft, LeadPatch, LeadStatus};
use estate_desk_core::Category;
use estate_desk_storage::{new_id, LeadError, LeadFilter};

use crate::problem::{parse_json, parse_query, ProblemResponse};
use crate::properties::Created;
use crate::router::{observe, AppState};
use crate::session::require_user;

#[derive(Debug, Serialize)]
struct LeadListing {
    items: Vec<Lead>,
}

#[derive(Debug, Serialize)]
struct OverdueListing {
    as_of: NaiveDate,
    items: Vec<Lead>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    property_id: Option<String>,
    #[serde(default)]
    limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct OverdueQuery {
    #[serde(default)]
    limit: Option<u32>,
}

pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ProblemResponse> {
    observe("leads.create", create_lead(&state, &headers, &body).await)
}

pub async fn list(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response, ProblemResponse> {
    observe("leads.list", list_leads(&state, &headers, &uri).await)
}

pub async fn overdue(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response, ProblemResponse> {
    observe("leads.overdue", list_overdue(&state, &headers, &uri).await)
}

pub async fn fetch(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ProblemResponse> {
    observe("leads.fetch", fetch_lead(&state, &headers, &id).await)
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ProblemResponse> {
    observe("leads.update", update_lead(&state, &headers, &id, &body).await)
}

pub async fn contact(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ProblemResponse> {
    observe("leads.contact", record_contact(&state, &headers, &id, &body).await)
}

pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ProblemResponse> {
    observe("leads.delete", delete_lead(&state, &headers, &id).await)
}

async fn create_lead(
    state: &AppState,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<Response, ProblemResponse> {
    let user = require_user(state, headers)?;
    let draft: LeadDraft = parse_json(body)?;
    draft.validate().map_err(ProblemResponse::invalid_payload)?;

    let now = state.now();
    let follow_up_on = state.schedule().next_follow_up(draft.status, now);
    let id = new_id();
    let repo = state.storage().leads();
    let code = state
        .issuer()
        .issue(Category::Lead, |code| {
            let lead = draft
                .clone()
                .into_lead(id.clone(), code, &user, follow_up_on, now);
            let repo = repo.clone();
            async move { repo.insert(&lead).await }
        })
        .await
        .map_err(|err| err.into_problem(lead_problem))?;

    info!(stage = "leads", %id, %code, %user, "lead created");
    Ok((StatusCode::CREATED, Json(Created { id, code })).into_response())
}

async fn list_leads(
    state: &AppState,
    headers: &HeaderMap,
    uri: &Uri,
) -> Result<Response, ProblemResponse> {
    require_user(state, headers)?;
    let query: ListQuery = parse_query(uri)?;
    let status = query
        .status
        .as_deref()
        .map(|raw| {
            LeadStatus::parse(raw).ok_or_else(|| {
                ProblemResponse::invalid_payload(format!("unknown status '{raw}'"))
            })
        })
        .transpose()?;

    let items = state
        .storage()
        .leads()
        .list(&LeadFilter {
            status,
            property_id: query.property_id,
            limit: query.limit,
        })
        .await
        .map_err(lead_problem)?;
    Ok(Json(LeadListing { items }).into_response())
}

async fn list_overdue(
    state: &AppState,
    headers: &HeaderMap,
    uri: &Uri,
) -> Result<Response, ProblemResponse> {
    require_user(state, headers)?;
    let query: OverdueQuery = parse_query(uri)?;
    let as_of = state.schedule().overdue_cutoff(state.now());
    let items = state
        .storage()
        .leads()
        .list_overdue(as_of, query.limit)
        .await
        .map_err(lead_problem)?;
    Ok(Json(OverdueListing { as_of, items }).into_response())
}

async fn fetch_lead(
    state: &AppState,
    headers: &HeaderMap,
    id: &str,
) -> Result<Response, ProblemResponse> {
    require_user(state, headers)?;
    let lead = state
        .storage()
        .leads()
        .fetch(id)
        .await
        .map_err(lead_problem)?;
    Ok(Json(lead).into_response())
}

async fn update_lead(
    state: &AppState,
    headers: &HeaderMap,
    id: &str,
    body: &Bytes,
) -> Result<Response, ProblemResponse> {
    let user = require_user(state, headers)?;
    let patch: LeadPatch = parse_json(body)?;
    let repo = state.storage().leads();

    let mut lead = repo.fetch(id).await.map_err(lead_problem)?;
    let reschedule =
        patch.follow_up_on.is_none() && patch.status.is_some_and(|status| status != lead.status);
    let now = state.now();
    lead.apply(patch, now).map_err(ProblemResponse::invalid_payload)?;
    if reschedule {
        lead.follow_up_on = state.schedule().next_follow_up(lead.status, now);
    }
    repo.update(&lead).await.map_err(lead_problem)?;

    info!(
        stage = "leads",
        %id,
        code = %lead.code,
        status = lead.status.as_str(),
        %user,
        "lead updated"
    );
    Ok(Json(lead).into_response())
}

async fn record_contact(
    state: &AppState,
    headers: &HeaderMap,
    id: &str,
    body: &Bytes,
) -> Result<Response, ProblemResponse> {
    let user = require_user(state, headers)?;
    let record: ContactRecord = if body.is_empty() {
        ContactRecord::default()
    } else {
        parse_json(body)?
    };
    let repo = state.storage().leads();
    let mut lead = repo.fetch(id).await.map_err(lead_problem)?;
    let now = state.now();

    // A first contact moves a new lead along the pipeline.
    lead.status = match record.status {
        Some(status) => status,
        None if lead.status == LeadStatus::New => LeadStatus::Contacted,
        None => lead.status,
    };
    if let Some(note) = record.notes.map(|note| note.trim().to_string()) {
        if !note.is_empty() {
            lead.notes = Some(match lead.notes.take() {
                Some(existing) => format!("{existing}\n{note}"),
                None => note,
            });
        }
    }
    lead.last_contacted_at = Some(now);
    lead.follow_up_on = state.schedule().next_follow_up(lead.status, now);
    lead.updated_at = now;
    repo.update(&lead).await.map_err(lead_problem)?;

    info!(
        stage = "leads",
        %id,
        code = %lead.code,
        status = lead.status.as_str(),
        follow_up_on = ?lead.follow_up_on,
        %user,
        "contact recorded"
    );
    Ok(Json(lead).into_response())
}

async fn delete_lead(
    state: &AppState,
    headers: &HeaderMap,
    id: &str,
) -> Result<Response, ProblemResponse> {
    let user = require_user(state, headers)?;
    state
        .storage()
        .leads()
        .delete(id)
        .await
        .map_err(lead_problem)?;
    info!(stage = "leads", %id, %user, "lead deleted");
    Ok(StatusCode::NO_CONTENT.into_response())
}

fn lead_problem(err: LeadError) -> ProblemResponse {
    match err {
        LeadError::NotFound => ProblemResponse::not_found("lead not found"),
        LeadError::UnknownProperty => ProblemResponse::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "unknown_property",
            "referenced property does not exist",
        ),
        other => {
            error!(stage = "leads", error = %other, "storage failure");
            ProblemResponse::internal("storage_error", "failed to access leads")
        }
    }
}
