use super::{
    CorrelationId, Direction, RecordedEvent, RecordingLogger, Sanitizer, ServiceType,
    CORRELATION_ID_HEADER,
};
use axum::http;
use reqwest::header::HeaderValue;
use reqwest::{Request, Response};
use reqwest_middleware::{Middleware, Next, Result as MiddlewareResult};
use std::collections::HashMap;
use uuid::Uuid;

/// Bodies above this size are recorded by length only.
const MAX_RECORDED_BODY: usize = 10_000;

pub struct RecordingMiddleware {
    logger: RecordingLogger,
    service_type: ServiceType,
}

impl RecordingMiddleware {
    pub fn new(logger: RecordingLogger, service_type: ServiceType) -> Self {
        Self {
            logger,
            service_type,
        }
    }
}

#[async_trait::async_trait]
impl Middleware for RecordingMiddleware {
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> MiddlewareResult<Response> {
        let correlation_id = match req.headers().get(CORRELATION_ID_HEADER) {
            Some(existing) => existing
                .to_str()
                .map(str::to_string)
                .unwrap_or_else(|_| Uuid::new_v4().to_string()),
            None => extensions
                .get::<CorrelationId>()
                .map(|id| id.0.clone())
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
        };

        if !req.headers().contains_key(CORRELATION_ID_HEADER) {
            if let Ok(value) = HeaderValue::from_str(&correlation_id) {
                req.headers_mut().insert(CORRELATION_ID_HEADER, value);
            }
        }

        let request_data = extract_request_data(&req);
        self.record(
            &correlation_id,
            Direction::Request,
            format!(
                "{} {}",
                request_data.method,
                extract_path(&request_data.url)
            ),
            serde_json::to_value(&request_data).unwrap_or(serde_json::Value::Null),
        );

        let response = next.run(req, extensions).await;

        match &response {
            Ok(resp) => {
                let response_data = extract_response_data(resp);
                self.record(
                    &correlation_id,
                    Direction::Response,
                    format!("response_{}", response_data.status_code),
                    serde_json::to_value(&response_data).unwrap_or(serde_json::Value::Null),
                );
            }
            Err(err) => {
                self.record(
                    &correlation_id,
                    Direction::Response,
                    "error".to_string(),
                    serde_json::json!({ "error": error_message(err) }),
                );
            }
        }

        response
    }
}

impl RecordingMiddleware {
    fn record(
        &self,
        correlation_id: &str,
        direction: Direction,
        operation: String,
        data: serde_json::Value,
    ) {
        self.logger.record(RecordedEvent {
            timestamp: chrono::Utc::now().to_rfc3339(),
            correlation_id: correlation_id.to_string(),
            event_type: self.service_type.event_type(),
            direction,
            operation,
            data,
            metadata: HashMap::new(),
        });
    }
}

fn header_map(headers: &reqwest::header::HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.to_string(), value.to_string()))
        })
        .collect()
}

fn extract_request_data(request: &Request) -> RequestData {
    let body = match request.body() {
        Some(body) => match body.as_bytes() {
            Some(bytes) if bytes.len() > MAX_RECORDED_BODY => {
                serde_json::Value::String(format!("[LARGE_BODY_{}b]", bytes.len()))
            }
            Some(bytes) => match serde_json::from_slice::<serde_json::Value>(bytes) {
                Ok(json) => Sanitizer::sanitize_json(&json),
                Err(_) => match std::str::from_utf8(bytes) {
                    Ok(text) => serde_json::Value::String(text.to_string()),
                    Err(_) => serde_json::Value::String(format!("[BINARY_BODY_{}b]", bytes.len())),
                },
            },
            None => serde_json::Value::String("[STREAM_BODY]".to_string()),
        },
        None => serde_json::Value::Null,
    };

    RequestData {
        method: request.method().to_string(),
        url: Sanitizer::sanitize_url(request.url().as_str()),
        headers: Sanitizer::sanitize_headers(&header_map(request.headers())),
        body,
    }
}

fn extract_response_data(response: &Response) -> ResponseData {
    ResponseData {
        status_code: response.status().as_u16(),
        headers: Sanitizer::sanitize_headers(&header_map(response.headers())),
        body_size: response.content_length().unwrap_or(0),
    }
}

#[derive(Debug, serde::Serialize)]
struct RequestData {
    method: String,
    url: String,
    headers: HashMap<String, String>,
    body: serde_json::Value,
}

#[derive(Debug, serde::Serialize)]
struct ResponseData {
    status_code: u16,
    headers: HashMap<String, String>,
    body_size: u64,
}

/// Error text with any credential in the request URL redacted.
fn error_message(error: &reqwest_middleware::Error) -> String {
    let mut message = error.to_string();
    if let reqwest_middleware::Error::Reqwest(inner) = error {
        if let Some(url) = inner.url() {
            message = message.replace(url.as_str(), &Sanitizer::sanitize_url(url.as_str()));
        }
    }
    message
}

fn extract_path(url: &str) -> String {
    url::Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.to_string())
}
