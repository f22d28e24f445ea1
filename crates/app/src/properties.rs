use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use estate_desk_core::types::{Property, PropertyDraft, PropertyPatch, PropertyStatus};
use estate_desk_core::{Category, Code, HighlightChange, HighlightError};
use estate_desk_storage::{new_id, PropertyError, PropertyFilter};

use crate::problem::{parse_json, parse_query, ProblemResponse};
use crate::router::{observe, AppState};
use crate::session::require_user;

#[derive(Debug, Serialize)]
pub(crate) struct Created {
    pub id: String,
    pub code: Code,
}

#[derive(Debug, Serialize)]
struct Listing<T> {
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    highlighted: Option<bool>,
    #[serde(default)]
    limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct HighlightRequest {
    highlighted: bool,
}

pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ProblemResponse> {
    observe("properties.create", create_property(&state, &headers, &body).await)
}

pub async fn list(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response, ProblemResponse> {
    observe("properties.list", list_properties(&state, &headers, &uri).await)
}

pub async fn fetch(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ProblemResponse> {
    observe("properties.fetch", fetch_property(&state, &headers, &id).await)
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ProblemResponse> {
    observe("properties.update", update_property(&state, &headers, &id, &body).await)
}

pub async fn highlight(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ProblemResponse> {
    observe("properties.highlight", highlight_property(&state, &headers, &id, &body).await)
}

pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ProblemResponse> {
    observe("properties.delete", delete_property(&state, &headers, &id).await)
}

async fn create_property(
    state: &AppState,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<Response, ProblemResponse> {
    let user = require_user(state, headers)?;
    let draft: PropertyDraft = parse_json(body)?;
    draft.validate().map_err(ProblemResponse::invalid_payload)?;

    let now = state.now();
    let id = new_id();
    let repo = state.storage().properties();
    let code = state
        .issuer()
        .issue(Category::Property, |code| {
            let property = draft.clone().into_property(id.clone(), code, &user, now);
            let repo = repo.clone();
            async move { repo.insert(&property).await }
        })
        .await
        .map_err(|err| err.into_problem(property_problem))?;

    info!(stage = "properties", %id, %code, %user, "property created");
    Ok((StatusCode::CREATED, Json(Created { id, code })).into_response())
}

async fn list_properties(
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
            PropertyStatus::parse(raw)
                .ok_or_else(|| ProblemResponse::invalid_payload(format!("unknown status '{raw}'")))
        })
        .transpose()?;

    let items = state
        .storage()
        .properties()
        .list(&PropertyFilter {
            status,
            highlighted: query.highlighted,
            limit: query.limit,
        })
        .await
        .map_err(property_problem)?;
    Ok(Json(Listing { items }).into_response())
}

async fn fetch_property(
    state: &AppState,
    headers: &HeaderMap,
    id: &str,
) -> Result<Response, ProblemResponse> {
    require_user(state, headers)?;
    let property = state
        .storage()
        .properties()
        .fetch(id)
        .await
        .map_err(property_problem)?;
    Ok(Json(property).into_response())
}

async fn update_property(
    state: &AppState,
    headers: &HeaderMap,
    id: &str,
    body: &Bytes,
) -> Result<Response, ProblemResponse> {
    let user = require_user(state, headers)?;
    let patch: PropertyPatch = parse_json(body)?;
    let repo = state.storage().properties();

    let mut property = repo.fetch(id).await.map_err(property_problem)?;
    property
        .apply(patch, state.now())
        .map_err(ProblemResponse::invalid_payload)?;
    repo.update(&property).await.map_err(property_problem)?;

    info!(stage = "properties", %id, code = %property.code, %user, "property updated");
    Ok(Json(property).into_response())
}

async fn highlight_property(
    state: &AppState,
    headers: &HeaderMap,
    id: &str,
    body: &Bytes,
) -> Result<Response, ProblemResponse> {
    let user = require_user(state, headers)?;
    let request: HighlightRequest = parse_json(body)?;
    let repo = state.storage().properties();

    let mut property: Property = repo.fetch(id).await.map_err(property_problem)?;
    let quota = state.highlight_quota();
    let highlighted = repo.count_highlighted().await.map_err(property_problem)?;
    let change = quota
        .check(request.highlighted, property.highlighted, highlighted)
        .map_err(quota_problem)?;

    let now = state.now();
    match change {
        HighlightChange::Unchanged => return Ok(Json(property).into_response()),
        HighlightChange::Set => {
            let granted = repo
                .highlight_within(id, quota.max(), now)
                .await
                .map_err(property_problem)?;
            if !granted {
                return Err(quota_problem(HighlightError::QuotaExceeded { max: quota.max() }));
            }
        }
        HighlightChange::Cleared => {
            repo.clear_highlight(id, now)
                .await
                .map_err(property_problem)?;
        }
    }
    property.highlighted = request.highlighted;
    property.updated_at = now;
    info!(
        stage = "properties",
        %id,
        highlighted = request.highlighted,
        %user,
        "highlight changed"
    );
    Ok(Json(property).into_response())
}

async fn delete_property(
    state: &AppState,
    headers: &HeaderMap,
    id: &str,
) -> Result<Response, ProblemResponse> {
    let user = require_user(state, headers)?;
    state
        .storage()
        .properties()
        .delete(id)
        .await
        .map_err(property_problem)?;
    info!(stage = "properties", %id, %user, "property deleted");
    Ok(StatusCode::NO_CONTENT.into_response())
}

fn quota_problem(err: HighlightError) -> ProblemResponse {
    ProblemResponse::new(
        StatusCode::CONFLICT,
        "highlight_quota_exceeded",
        err.to_string(),
    )
}

fn property_problem(err: PropertyError) -> ProblemResponse {
    match err {
        PropertyError::NotFound => ProblemResponse::not_found("property not found"),
        other => {
            error!(stage = "properties", error = %other, "storage failure");
            ProblemResponse::internal("storage_error", "failed to access properties")
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::router::test_support::*;
    use axum::http::StatusCode;
    use estate_desk_core::{AllocatorPolicy, Category, Code, CodeAllocator, HighlightQuota};
    use serde_json::{json, Value};

    fn payload(title: &str) -> Value {
        json!({
            "title": title,
            "kind": "apartment",
            "operation": "sale",
            "price": 2_350_000,
            "currency": "MXN",
            "city": "Guadalajara",
            "bedrooms": 3
        })
    }

    fn is_property_code(value: &Value) -> bool {
        let raw = value.as_str().unwrap_or_default();
        raw.len() == 7 && raw.starts_with("P-") && raw[2..].bytes().all(|b| b.is_ascii_digit())
    }

    #[tokio::test]
    async fn create_assigns_a_property_code() {
        let state = setup_state().await;

        let (status, body) =
            send(&state, "POST", "/api/properties", Some(payload("Depto centro"))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(is_property_code(&body["code"]), "unexpected code {}", body["code"]);

        let id = body["id"].as_str().expect("id").to_string();
        let (status, fetched) = send(&state, "GET", &format!("/api/properties/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched["code"], body["code"]);
        assert_eq!(fetched["created_by"], "agent-1");
        assert_eq!(fetched["status"], "available");
        assert_eq!(fetched["highlighted"], false);
    }

    #[tokio::test]
    async fn create_rejects_invalid_payloads() {
        let state = setup_state().await;

        let mut bad = payload("Depto");
        bad["price"] = json!(-5);
        let (status, body) = send(&state, "POST", "/api/properties", Some(bad)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["type"], "invalid_payload");

        let (status, body) =
            send(&state, "POST", "/api/properties", Some(json!({ "title": "x" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["type"], "invalid_json");

        let (_, listing) = send(&state, "GET", "/api/properties", None).await;
        assert_eq!(listing["items"].as_array().unwrap().len(), 0, "nothing persisted");
    }

    #[tokio::test]
    async fn exhausted_code_space_fails_without_persisting() {
        let allocator = CodeAllocator::new(AllocatorPolicy::new(1, 5).unwrap());
        let state = setup_state_with(allocator, HighlightQuota::default()).await;
        let repo = state.storage().properties();
        for value in 0..10 {
            repo.insert(&property_with_code(Code::format(Category::Property, value, 1)))
                .await
                .expect("seed");
        }

        let (status, body) = send(&state, "POST", "/api/properties", Some(payload("Extra"))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["type"], "allocation_exhausted");

        let (_, listing) = send(&state, "GET", "/api/properties?limit=200", None).await;
        assert_eq!(listing["items"].as_array().unwrap().len(), 10);
    }

    #[tokio::test]
    async fn update_changes_fields_but_not_code() {
        let state = setup_state().await;
        let (_, created) = send(&state, "POST", "/api/properties", Some(payload("Casa"))).await;
        let uri = format!("/api/properties/{}", created["id"].as_str().unwrap());

        let patch = json!({ "price": 2_100_000, "status": "reserved" });
        let (status, updated) = send(&state, "PATCH", &uri, Some(patch)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["price"], 2_100_000);
        assert_eq!(updated["status"], "reserved");
        assert_eq!(updated["code"], created["code"]);

        let (status, body) = send(&state, "PATCH", &uri, Some(json!({ "code": "P-00001" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["type"], "invalid_json");
    }

    #[tokio::test]
    async fn highlight_quota_is_enforced() {
        let state = setup_state_with(CodeAllocator::default(), HighlightQuota::new(1)).await;
        let (_, first) = send(&state, "POST", "/api/properties", Some(payload("Uno"))).await;
        let (_, second) = send(&state, "POST", "/api/properties", Some(payload("Dos"))).await;
        let first_uri = format!("/api/properties/{}/highlight", first["id"].as_str().unwrap());
        let second_uri = format!("/api/properties/{}/highlight", second["id"].as_str().unwrap());

        let (status, body) =
            send(&state, "PUT", &first_uri, Some(json!({ "highlighted": true }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["highlighted"], true);

        let (status, _) =
            send(&state, "PUT", &first_uri, Some(json!({ "highlighted": true }))).await;
        assert_eq!(status, StatusCode::OK, "re-highlighting is a no-op");

        let (status, body) =
            send(&state, "PUT", &second_uri, Some(json!({ "highlighted": true }))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["type"], "highlight_quota_exceeded");

        let (status, _) =
            send(&state, "PUT", &first_uri, Some(json!({ "highlighted": false }))).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) =
            send(&state, "PUT", &second_uri, Some(json!({ "highlighted": true }))).await;
        assert_eq!(status, StatusCode::OK);

        let (_, listing) = send(&state, "GET", "/api/properties?highlighted=true", None).await;
        let items = listing["items"].as_array().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["id"], second["id"]);
    }

    #[tokio::test]
    async fn delete_frees_the_record() {
        let state = setup_state().await;
        let (_, created) = send(&state, "POST", "/api/properties", Some(payload("Lote"))).await;
        let uri = format!("/api/properties/{}", created["id"].as_str().unwrap());

        let (status, _) = send(&state, "DELETE", &uri, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, body) = send(&state, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["type"], "not_found");
        let (status, _) = send(&state, "DELETE", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn list_rejects_unknown_status() {
        let state = setup_state().await;
        let (status, body) = send(&state, "GET", "/api/properties?status=haunted", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["type"], "invalid_payload");
    }
}
