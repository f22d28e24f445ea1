use axum::{
    body::Bytes,
    extract::Query,
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use serde::{de::DeserializeOwned, Serialize};

#[derive(Debug, Serialize)]
struct ProblemDetails {
    #[serde(rename = "type")]
    problem_type: &'static str,
    title: &'static str,
    detail: String,
}

#[derive(Debug)]
pub struct ProblemResponse {
    status: StatusCode,
    body: ProblemDetails,
}

impl ProblemResponse {
    pub fn new<S: Into<String>>(status: StatusCode, problem_type: &'static str, detail: S) -> Self {
        Self {
            status,
            body: ProblemDetails {
                problem_type,
                title: status.canonical_reason().unwrap_or("error"),
                detail: detail.into(),
            },
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", detail)
    }

    pub fn invalid_payload(detail: impl ToString) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_payload", detail.to_string())
    }

    pub fn internal(problem_type: &'static str, detail: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, problem_type, detail)
    }
}

impl IntoResponse for ProblemResponse {
    fn into_response(self) -> Response {
        let mut response = Json(self.body).into_response();
        *response.status_mut() = self.status;
        response.headers_mut().insert(
            axum::http::header::CONTENT_TYPE,
            axum::http::HeaderValue::from_static("application/problem+json"),
        );
        response
    }
}

/// Decodes a JSON request body into `T`, reporting failures as problem documents.
pub fn parse_json<T: DeserializeOwned>(body: &Bytes) -> Result<T, ProblemResponse> {
    serde_json::from_slice(body).map_err(|err| {
        ProblemResponse::new(
            StatusCode::BAD_REQUEST,
            "invalid_json",
            format!("failed to parse payload: {err}"),
        )
    })
}

/// Decodes the request query string into `T`, reporting failures as problem documents.
pub fn parse_query<T: DeserializeOwned>(uri: &Uri) -> Result<T, ProblemResponse> {
    Query::<T>::try_from_uri(uri)
        .map(|Query(query)| query)
        .map_err(|err| {
            ProblemResponse::invalid_payload(format!("invalid query: {}", err.body_text()))
        })
}
