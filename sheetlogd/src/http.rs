use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::OffsetDateTime;
use tokio::sync::mpsc;

use crate::sync::engine::LogEntry;

const MAX_KIND_LEN: usize = 30;
const MAX_TEXT_LEN: usize = 150;
const MAX_UNIX_TIME_LEN: usize = 11;

/// One accepted request, handed to the dispatcher. The response has
/// already been sent by the time this is processed: ingestion is
/// fire-and-forget and failures are only logged.
#[derive(Debug)]
pub struct IngestJob {
    pub entry: LogEntry,
    pub received_at: OffsetDateTime,
}

/// Shared handler state, constructed explicitly at bootstrap.
#[derive(Clone)]
pub struct AppContext {
    pub jobs: mpsc::UnboundedSender<IngestJob>,
}

pub fn router(ctx: AppContext) -> Router {
    Router::new().route("/", post(ingest)).with_state(ctx)
}

async fn ingest(State(ctx): State<AppContext>, headers: HeaderMap, body: Bytes) -> Response {
    let payload = match parse_payload(&headers, &body) {
        Ok(payload) => payload,
        Err(message) => {
            eprintln!("[sheetlogd] unreadable request body: {message}");
            return Json(json!({ "error": message })).into_response();
        }
    };
    match validate(payload) {
        Ok(entry) => {
            let job = IngestJob {
                entry,
                received_at: OffsetDateTime::now_utc(),
            };
            if ctx.jobs.send(job).is_err() {
                eprintln!("[sheetlogd] ingest queue is closed; dropping entry");
            }
            "done".into_response()
        }
        Err(err) => {
            eprintln!("[sheetlogd] invalid input: {}: {}", err.field, err.message);
            Json(err).into_response()
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct LogPayload {
    #[serde(default)]
    log_kind_name: Option<String>,
    #[serde(default)]
    sub_kind_name: Option<String>,
    #[serde(default)]
    sub_sub_kind_name: Option<String>,
    #[serde(default)]
    log_text: Option<String>,
    #[serde(default)]
    unix_time: Option<String>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

fn parse_payload(headers: &HeaderMap, body: &Bytes) -> Result<LogPayload, String> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if content_type.starts_with("application/json") {
        serde_json::from_slice(body).map_err(|err| err.to_string())
    } else {
        serde_urlencoded::from_bytes(body).map_err(|err| err.to_string())
    }
}

fn validate(payload: LogPayload) -> Result<LogEntry, ValidationError> {
    let log_kind_name = required(payload.log_kind_name, "log_kind_name", MAX_KIND_LEN)?;
    let sub_kind_name = required(payload.sub_kind_name, "sub_kind_name", MAX_KIND_LEN)?;
    let sub_sub_kind_name = required(payload.sub_sub_kind_name, "sub_sub_kind_name", MAX_KIND_LEN)?;
    let log_text = required(payload.log_text, "log_text", MAX_TEXT_LEN)?;
    let unix_time_raw = required(payload.unix_time, "unix_time", MAX_UNIX_TIME_LEN)?;
    let unix_time = unix_time_raw
        .parse::<i64>()
        .map_err(|_| ValidationError {
            field: "unix_time",
            message: "must be a numeric string".into(),
        })?;

    Ok(LogEntry {
        log_kind_name,
        sub_kind_name,
        sub_sub_kind_name,
        log_text,
        unix_time,
    })
}

fn required(
    value: Option<String>,
    field: &'static str,
    max_len: usize,
) -> Result<String, ValidationError> {
    let value = value.unwrap_or_default();
    if value.is_empty() {
        return Err(ValidationError {
            field,
            message: "is required".into(),
        });
    }
    if value.len() > max_len {
        return Err(ValidationError {
            field,
            message: format!("must be at most {max_len} characters"),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;

    fn payload(unix_time: &str) -> LogPayload {
        LogPayload {
            log_kind_name: Some("auth".into()),
            sub_kind_name: Some("login".into()),
            sub_sub_kind_name: Some("attempt".into()),
            log_text: Some("failed".into()),
            unix_time: Some(unix_time.into()),
        }
    }

    #[test]
    fn validate_accepts_well_formed_payload() {
        let entry = validate(payload("1700000000")).unwrap();
        assert_eq!(entry.log_kind_name, "auth");
        assert_eq!(entry.unix_time, 1_700_000_000);
    }

    #[test]
    fn validate_rejects_missing_fields_in_order() {
        let err = validate(LogPayload::default()).unwrap_err();
        assert_eq!(err.field, "log_kind_name");
        assert_eq!(err.message, "is required");

        let mut partial = LogPayload::default();
        partial.log_kind_name = Some("auth".into());
        let err = validate(partial).unwrap_err();
        assert_eq!(err.field, "sub_kind_name");
    }

    #[test]
    fn validate_enforces_field_lengths() {
        let mut oversized = payload("1700000000");
        oversized.log_kind_name = Some("x".repeat(31));
        assert_eq!(validate(oversized).unwrap_err().field, "log_kind_name");

        let mut oversized = payload("1700000000");
        oversized.log_text = Some("x".repeat(151));
        assert_eq!(validate(oversized).unwrap_err().field, "log_text");

        let err = validate(payload("170000000000")).unwrap_err();
        assert_eq!(err.field, "unix_time");
        assert_eq!(err.message, "must be at most 11 characters");
    }

    #[test]
    fn validate_rejects_non_numeric_unix_time() {
        let err = validate(payload("not-a-time")).unwrap_err();
        assert_eq!(err.field, "unix_time");
        assert_eq!(err.message, "must be a numeric string");
    }

    fn make_app() -> (Router, mpsc::UnboundedReceiver<IngestJob>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (router(AppContext { jobs: tx }), rx)
    }

    #[tokio::test]
    async fn json_body_is_acknowledged_and_queued() {
        let (app, mut rx) = make_app();
        let request = Request::builder()
            .method("POST")
            .uri("/")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::to_vec(&json!({
                    "log_kind_name": "auth",
                    "sub_kind_name": "login",
                    "sub_sub_kind_name": "attempt",
                    "log_text": "failed",
                    "unix_time": "1700000000"
                }))
                .unwrap(),
            ))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"done");

        let job = rx.try_recv().unwrap();
        assert_eq!(job.entry.log_kind_name, "auth");
        assert_eq!(job.entry.unix_time, 1_700_000_000);
    }

    #[tokio::test]
    async fn form_body_is_acknowledged_and_queued() {
        let (app, mut rx) = make_app();
        let request = Request::builder()
            .method("POST")
            .uri("/")
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Body::from(
                "log_kind_name=auth&sub_kind_name=login&sub_sub_kind_name=attempt\
                 &log_text=failed&unix_time=1700000000",
            ))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let job = rx.try_recv().unwrap();
        assert_eq!(job.entry.sub_kind_name, "login");
    }

    #[tokio::test]
    async fn invalid_payload_returns_the_validation_error() {
        let (app, mut rx) = make_app();
        let request = Request::builder()
            .method("POST")
            .uri("/")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::to_vec(&json!({ "log_kind_name": "auth" })).unwrap(),
            ))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();

        // The legacy service answered validation failures with its default
        // status; only the body distinguishes them.
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let error: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(error["field"], "sub_kind_name");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn malformed_json_reports_a_parse_error() {
        let (app, mut rx) = make_app();
        let request = Request::builder()
            .method("POST")
            .uri("/")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let error: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(error["error"].is_string());
        assert!(rx.try_recv().is_err());
    }
}
