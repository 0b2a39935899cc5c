//! HTTP surface: health, status, clarification answers and manual cycles.

use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRequest, Path, Query, Request, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::status::StatusData;
use crate::workflow::WorkflowError;
use crate::AppState;
use taskpilot_core::{Clarification, ClarificationId};

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(status_handler))
        .route("/cycle", post(cycle_handler))
        .route(
            "/clarifications/:id/answer",
            get(answer_form_handler).post(answer_handler),
        )
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// A [`WorkflowError`] on its way to becoming a response.
struct ApiError(WorkflowError);

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            WorkflowError::NotFound(_) => StatusCode::NOT_FOUND,
            WorkflowError::InvalidTransition { .. } | WorkflowError::ConflictingUpdate(_) => {
                StatusCode::CONFLICT
            }
            WorkflowError::MissingArtifact { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            WorkflowError::InvalidToken => StatusCode::UNAUTHORIZED,
            WorkflowError::ExpiredToken => StatusCode::GONE,
            WorkflowError::ExternalSyncFailed(_) | WorkflowError::UnparsableOutput(_) => {
                StatusCode::BAD_GATEWAY
            }
            WorkflowError::LlmUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            WorkflowError::HistoryMismatch { .. } | WorkflowError::Repository(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

/// Constant-time token comparison over equal-length keyed digests.
fn token_matches(provided: &str, expected: &str) -> bool {
    let digest = |token: &str| {
        Hmac::<Sha256>::new_from_slice(expected.as_bytes()).map(|mut mac| {
            mac.update(token.as_bytes());
            mac
        })
    };
    match (digest(provided), digest(expected)) {
        (Ok(provided), Ok(expected)) => provided
            .verify_slice(&expected.finalize().into_bytes())
            .is_ok(),
        _ => false,
    }
}

/// Check the bearer token for the protected endpoints.
///
/// Without a configured token the endpoints are disabled outright.
#[allow(clippy::result_large_err)]
fn validate_auth(headers: &HeaderMap, auth_token: &Option<String>) -> Result<(), Response> {
    let Some(expected_token) = auth_token else {
        return Err((
            StatusCode::FORBIDDEN,
            "Endpoint is disabled (STATUS_AUTH_TOKEN not configured)",
        )
            .into_response());
    };

    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    match auth_header.and_then(|value| value.strip_prefix("Bearer ")) {
        Some(provided) if token_matches(provided, expected_token) => Ok(()),
        Some(_) => Err((StatusCode::UNAUTHORIZED, "Invalid token").into_response()),
        None => Err((
            StatusCode::UNAUTHORIZED,
            "Missing or malformed Authorization header. Expected: Bearer <token>",
        )
            .into_response()),
    }
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": "taskpilot",
        "version": taskpilot_core::get_service_version(),
    }))
}

async fn status_handler(headers: HeaderMap, State(state): State<Arc<AppState>>) -> Response {
    if let Err(response) = validate_auth(&headers, &state.status_auth_token) {
        return response;
    }
    match state.scheduler.service().list_items().await {
        Ok(items) => Json(StatusData::from_items(
            items,
            taskpilot_core::get_service_version(),
        ))
        .into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

async fn cycle_handler(headers: HeaderMap, State(state): State<Arc<AppState>>) -> Response {
    if let Err(response) = validate_auth(&headers, &state.status_auth_token) {
        return response;
    }
    info!("Pipeline cycle requested over HTTP");
    match state.scheduler.run_cycle().await {
        Ok(Some(report)) => Json(report).into_response(),
        Ok(None) => (
            StatusCode::CONFLICT,
            Json(json!({ "error": "a pipeline cycle is already running" })),
        )
            .into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: String,
}

#[derive(Debug, Deserialize)]
struct AnswerRequest {
    token: String,
    answer: String,
}

/// An answer sent either as JSON or from the HTML form.
struct AnswerBody {
    request: AnswerRequest,
    from_form: bool,
}

#[async_trait]
impl<S: Send + Sync> FromRequest<S> for AnswerBody {
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let from_form = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("application/x-www-form-urlencoded"));

        let request = if from_form {
            let Form(request) = Form::<AnswerRequest>::from_request(req, state)
                .await
                .map_err(IntoResponse::into_response)?;
            request
        } else {
            let Json(request) = Json::<AnswerRequest>::from_request(req, state)
                .await
                .map_err(IntoResponse::into_response)?;
            request
        };
        Ok(Self { request, from_form })
    }
}

async fn answer_form_handler(
    Path(id): Path<String>,
    Query(query): Query<TokenQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let id = ClarificationId::from(id);
    match state
        .scheduler
        .service()
        .open_clarification(&id, &query.token)
        .await
    {
        Ok(clarification) => Html(answer_page(&clarification, &query.token)).into_response(),
        Err(e) => {
            let error = ApiError(e);
            (error.status(), Html(message_page(&error.0.to_string()))).into_response()
        }
    }
}

async fn answer_handler(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
    body: AnswerBody,
) -> Response {
    let AnswerBody { request, from_form } = body;
    let answer = request.answer.trim();
    if answer.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "answer must not be empty" })),
        )
            .into_response();
    }

    let id = ClarificationId::from(id);
    let result = state
        .scheduler
        .service()
        .answer_clarification(&id, &request.token, answer)
        .await;

    match (result, from_form) {
        (Ok(_), true) => Html(message_page("Thanks, your answer was recorded.")).into_response(),
        (Ok(answered), false) => Json(answered).into_response(),
        (Err(e), true) => {
            let error = ApiError(e);
            (error.status(), Html(message_page(&error.0.to_string()))).into_response()
        }
        (Err(e), false) => ApiError(e).into_response(),
    }
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

const PAGE_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="utf-8"><title>taskpilot</title></head>
<body style="font-family: sans-serif; max-width: 40em; margin: 2em auto;">
{body}
</body>
</html>
"#;

fn message_page(message: &str) -> String {
    PAGE_TEMPLATE.replace("{body}", &format!("<p>{}</p>", escape_html(message)))
}

fn answer_page(clarification: &Clarification, token: &str) -> String {
    let mut body = format!("<h1>{}</h1>\n", escape_html(&clarification.question));
    if !clarification.context.trim().is_empty() {
        body.push_str(&format!("<p>{}</p>\n", escape_html(&clarification.context)));
    }
    if !clarification.options.is_empty() {
        body.push_str("<ul>\n");
        for option in &clarification.options {
            body.push_str(&format!("<li>{}</li>\n", escape_html(option)));
        }
        body.push_str("</ul>\n");
    }
    body.push_str(&format!(
        "<form method=\"post\">\n\
         <input type=\"hidden\" name=\"token\" value=\"{}\">\n\
         <textarea name=\"answer\" rows=\"6\" cols=\"60\" required></textarea>\n\
         <p><button type=\"submit\">Send answer</button></p>\n\
         </form>\n\
         <p><small>Answer before {}</small></p>",
        escape_html(token),
        clarification.expires_at.format("%Y-%m-%d %H:%M UTC")
    ));
    PAGE_TEMPLATE.replace("{body}", &body)
}
