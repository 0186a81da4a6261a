//! Strict JSON decoding of inbound alert bodies.
//!
//! Every client-caused failure becomes a [`MalformedRequest`] whose status and
//! message can be returned to the caller as-is. Failures reading the body off
//! the wire are reported separately so the handler can log them and answer
//! with a generic 500.

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, StatusCode};
use http_body_util::LengthLimitError;
use serde::Deserialize;
use serde_json::error::Category;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::alert::{AlertPayload, KNOWN_FIELDS};
use crate::config::DEFAULT_MAX_BODY_BYTES;

/// How unknown top-level fields are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DecodeMode {
    /// Reject bodies with fields outside the webhook schema.
    Strict,
    /// Ignore fields outside the webhook schema.
    #[default]
    Lenient,
}

/// Decoder limits.
#[derive(Debug, Clone)]
pub struct DecoderConfig {
    /// Largest accepted body in bytes.
    pub max_body_bytes: usize,
    /// Unknown field handling.
    pub mode: DecodeMode,
    /// Upper bound for reading the whole body.
    pub read_timeout: Duration,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            mode: DecodeMode::Lenient,
            read_timeout: Duration::from_secs(10),
        }
    }
}

/// A request the caller got wrong. Safe to echo back verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct MalformedRequest {
    /// Status to answer with.
    pub status: StatusCode,
    /// Message to answer with.
    pub message: String,
    /// Parser output behind the message. Logged, never returned.
    pub detail: Option<String>,
}

impl MalformedRequest {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            detail: None,
        }
    }

    fn with_detail(mut self, err: &serde_json::Error) -> Self {
        self.detail = Some(err.to_string());
        self
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn too_large(limit: usize) -> Self {
        Self::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("Request body must not be larger than {limit} bytes"),
        )
    }
}

/// Errors produced while decoding an alert body.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Client-caused failure
    #[error(transparent)]
    Malformed(#[from] MalformedRequest),

    /// Reading the body failed
    #[error("failed to read request body: {0}")]
    Read(#[source] axum::Error),

    /// The body did not arrive in time
    #[error("timed out after {0:?} reading request body")]
    ReadTimeout(Duration),
}

/// Decodes alert bodies according to a [`DecoderConfig`].
#[derive(Debug, Clone)]
pub struct AlertDecoder {
    config: DecoderConfig,
}

impl AlertDecoder {
    #[must_use]
    pub fn new(config: DecoderConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Read and decode an alert from a request's headers and body.
    ///
    /// A declared `Content-Length` over the limit is rejected before any of
    /// the body is read.
    pub async fn decode(&self, headers: &HeaderMap, body: Body) -> Result<AlertPayload, DecodeError> {
        check_content_type(headers)?;

        let limit = self.config.max_body_bytes;
        if declared_length(headers).is_some_and(|len| len > limit as u64) {
            return Err(MalformedRequest::too_large(limit).into());
        }

        let bytes = self.read_body(body).await?;
        Ok(self.parse(&bytes)?)
    }

    async fn read_body(&self, body: Body) -> Result<Bytes, DecodeError> {
        let limit = self.config.max_body_bytes;
        let read = axum::body::to_bytes(body, limit);

        match tokio::time::timeout(self.config.read_timeout, read).await {
            Ok(Ok(bytes)) => Ok(bytes),
            Ok(Err(e)) if exceeded_limit(&e) => Err(MalformedRequest::too_large(limit).into()),
            Ok(Err(e)) => Err(DecodeError::Read(e)),
            Err(_) => Err(DecodeError::ReadTimeout(self.config.read_timeout)),
        }
    }

    /// Decode an already buffered body.
    pub fn parse(&self, bytes: &[u8]) -> Result<AlertPayload, MalformedRequest> {
        if bytes.len() > self.config.max_body_bytes {
            return Err(MalformedRequest::too_large(self.config.max_body_bytes));
        }
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(MalformedRequest::bad_request("Request body must not be empty"));
        }

        let mut de = serde_json::Deserializer::from_slice(bytes);
        let value = Value::deserialize(&mut de).map_err(|e| syntax_error(&e))?;
        de.end().map_err(|e| {
            MalformedRequest::bad_request("Request body must only contain a single JSON object")
                .with_detail(&e)
        })?;

        let Value::Object(fields) = &value else {
            return Err(MalformedRequest::bad_request("Request body must be a JSON object"));
        };

        if self.config.mode == DecodeMode::Strict {
            if let Some(unknown) = fields.keys().find(|k| !KNOWN_FIELDS.contains(&k.as_str())) {
                return Err(MalformedRequest::bad_request(format!(
                    "Request body contains unknown field \"{unknown}\""
                )));
            }
        }

        let alert: AlertPayload = serde_json::from_value(value).map_err(|e| data_error(&e))?;

        require_non_empty("sid", &alert.sid)?;
        require_non_empty("result.user", &alert.result.user)?;

        Ok(alert)
    }
}

fn check_content_type(headers: &HeaderMap) -> Result<(), MalformedRequest> {
    let Some(value) = headers.get(header::CONTENT_TYPE) else {
        return Ok(());
    };

    let essence = value
        .to_str()
        .ok()
        .and_then(|v| v.split(';').next())
        .map(str::trim);

    match essence {
        Some(e) if e.eq_ignore_ascii_case("application/json") => Ok(()),
        _ => Err(MalformedRequest::new(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "Content-Type header is not application/json",
        )),
    }
}

fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

fn exceeded_limit(err: &axum::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = source {
        if e.is::<LengthLimitError>() {
            return true;
        }
        source = e.source();
    }
    false
}

fn syntax_error(err: &serde_json::Error) -> MalformedRequest {
    let rejection = match err.classify() {
        Category::Eof | Category::Io => {
            MalformedRequest::bad_request("Request body contains badly-formed JSON")
        }
        Category::Syntax | Category::Data => MalformedRequest::bad_request(format!(
            "Request body contains badly-formed JSON (at line {} column {})",
            err.line(),
            err.column()
        )),
    };
    rejection.with_detail(err)
}

fn data_error(err: &serde_json::Error) -> MalformedRequest {
    let rejection = match missing_field(err) {
        Some(field) => MalformedRequest::bad_request(format!(
            "Request body is missing required field \"{field}\""
        )),
        None => MalformedRequest::bad_request("Request body contains an invalid value"),
    };
    rejection.with_detail(err)
}

/// Field name out of serde's "missing field `x`" error.
fn missing_field(err: &serde_json::Error) -> Option<String> {
    let message = err.to_string();
    let rest = message.strip_prefix("missing field `")?;
    rest.split('`').next().map(String::from)
}

fn require_non_empty(field: &str, value: &str) -> Result<(), MalformedRequest> {
    if value.trim().is_empty() {
        return Err(MalformedRequest::bad_request(format!(
            "Request body field \"{field}\" must not be empty"
        )));
    }
    Ok(())
}
