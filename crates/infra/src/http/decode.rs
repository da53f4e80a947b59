//! Response decoding
//!
//! | Status | Result |
//! |--------|--------|
//! | `204` | `Ok`, no body read |
//! | `2xx` | body decoded as JSON into `T` (empty body → `None`) or copied to a writer |
//! | `>= 300` | [`HttpError::Api`] for a `{code, message}` body with a non-empty code, else [`HttpError::Status`] with the raw body |
//!
//! Numbers decode according to the target field type. Integers land exactly
//! in `u64`/`i64`; a JSON number read into `f64` is rounded. Amounts that
//! must keep every digit belong in a `String` (or a decimal type with its
//! own `Deserialize`) on the target struct.

use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::context::RequestContext;
use super::error::HttpError;
use super::policy::RetryReason;

/// Structured error object returned by the server
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default, deserialize_with = "string_or_number")]
    pub code: String,
    #[serde(default)]
    pub message: String,
    /// Any other members of the object
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Code {
        Text(String),
        Number(i64),
        Null(()),
    }

    Ok(match Code::deserialize(deserializer)? {
        Code::Text(text) => text,
        Code::Number(n) => n.to_string(),
        Code::Null(()) => String::new(),
    })
}

/// Successful call result: the `(headers, status, body)` triple
#[derive(Debug, Clone)]
pub struct Response<T> {
    pub headers: HeaderMap,
    pub status: StatusCode,
    pub body: Option<T>,
}

impl<T> Response<T> {
    pub fn into_body(self) -> Option<T> {
        self.body
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Response<U> {
        Response { headers: self.headers, status: self.status, body: self.body.map(f) }
    }
}

/// Build the error for an error status from its body.
pub(crate) fn error_from_body(
    status: StatusCode,
    headers: HeaderMap,
    body: &[u8],
    reason: RetryReason,
) -> HttpError {
    match serde_json::from_slice::<ApiErrorBody>(body) {
        Ok(api) if !api.code.is_empty() => HttpError::Api { status, headers, body: api, reason },
        _ => HttpError::Status {
            status,
            headers,
            body: String::from_utf8_lossy(body).trim().to_string(),
            reason,
        },
    }
}

async fn read_body(
    ctx: &RequestContext,
    response: reqwest::Response,
    status: StatusCode,
    headers: &HeaderMap,
) -> Result<Bytes, HttpError> {
    ctx.run(response.bytes()).await?.map_err(|e| HttpError::Decode {
        status,
        headers: headers.clone(),
        message: e.to_string(),
    })
}

/// Decode a final response into `T`.
///
/// # Errors
/// Error statuses become [`HttpError::Api`] or [`HttpError::Status`];
/// unreadable or malformed bodies become [`HttpError::Decode`].
pub(crate) async fn decode_json<T: DeserializeOwned>(
    ctx: &RequestContext,
    response: reqwest::Response,
    reason: RetryReason,
) -> Result<Response<T>, HttpError> {
    let status = response.status();
    let headers = response.headers().clone();

    if status == StatusCode::NO_CONTENT {
        return Ok(Response { headers, status, body: None });
    }

    let bytes = read_body(ctx, response, status, &headers).await?;
    if status.as_u16() >= 300 {
        return Err(error_from_body(status, headers, &bytes, reason));
    }

    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Response { headers, status, body: None });
    }

    match serde_json::from_slice::<T>(&bytes) {
        Ok(body) => Ok(Response { headers, status, body: Some(body) }),
        Err(e) => Err(HttpError::Decode { status, headers, message: e.to_string() }),
    }
}

/// Copy a final response body into `writer`; the body is the byte count.
///
/// # Errors
/// As [`decode_json`], plus [`HttpError::Write`] when the writer fails.
pub(crate) async fn decode_to_writer<W: AsyncWrite + Unpin + ?Sized>(
    ctx: &RequestContext,
    mut response: reqwest::Response,
    reason: RetryReason,
    writer: &mut W,
) -> Result<Response<u64>, HttpError> {
    let status = response.status();
    let headers = response.headers().clone();

    if status == StatusCode::NO_CONTENT {
        return Ok(Response { headers, status, body: None });
    }
    if status.as_u16() >= 300 {
        let bytes = read_body(ctx, response, status, &headers).await?;
        return Err(error_from_body(status, headers, &bytes, reason));
    }

    let mut written = 0u64;
    loop {
        let chunk = ctx.run(response.chunk()).await?.map_err(|e| HttpError::Decode {
            status,
            headers: headers.clone(),
            message: e.to_string(),
        })?;
        let Some(chunk) = chunk else { break };
        writer.write_all(&chunk).await.map_err(HttpError::Write)?;
        written += chunk.len() as u64;
    }
    writer.flush().await.map_err(HttpError::Write)?;

    Ok(Response { headers, status, body: Some(written) })
}
