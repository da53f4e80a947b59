//! Multi-host failover
//!
//! Hosts are tried in order, each through the full attempt engine. A host
//! is abandoned for the next one on a transport error or a status in
//! [`FAILOVER_STATUSES`]; any other outcome is final. With more than one
//! host, exhausting the list yields [`HttpError::AllHostsFailed`].

use reqwest::StatusCode;
use url::Url;

use super::attempt::{AttemptSpec, Engine, Final};
use super::body::RequestBody;
use super::context::RequestContext;
use super::error::{HostFailure, HttpError};

/// Statuses that move a call on to the next host
pub const FAILOVER_STATUSES: &[StatusCode] = &[
    StatusCode::INTERNAL_SERVER_ERROR,
    StatusCode::BAD_GATEWAY,
    StatusCode::SERVICE_UNAVAILABLE,
    StatusCode::GATEWAY_TIMEOUT,
    StatusCode::TOO_MANY_REQUESTS,
];

pub(crate) struct CallSpec<'a> {
    pub method: &'a reqwest::Method,
    pub path: &'a str,
    pub body: &'a RequestBody,
    pub correlation_id: &'a reqwest::header::HeaderValue,
    pub harvest: bool,
}

/// Join a host base URL and a request path.
///
/// # Errors
/// [`HttpError::InvalidRequest`] when the result is not a valid URL.
pub fn join_url(host: &str, path: &str) -> Result<Url, HttpError> {
    let joined = if path.is_empty() {
        host.to_string()
    } else {
        format!("{}/{}", host.trim_end_matches('/'), path.trim_start_matches('/'))
    };
    Url::parse(&joined).map_err(|e| HttpError::InvalidRequest(format!("url '{joined}': {e}")))
}

fn falls_through(outcome: &Final) -> bool {
    match outcome {
        Final::Transport { .. } => true,
        Final::Response { response, .. } => FAILOVER_STATUSES.contains(&response.status()),
    }
}

/// Try `hosts` in order and return the first final outcome.
///
/// # Errors
/// Context cancellation and deadline are returned at once, as are auth and
/// request building failures. [`HttpError::AllHostsFailed`] when every host
/// of a multi-host call fell through.
pub(crate) async fn execute_hosts(
    engine: &Engine<'_>,
    ctx: &RequestContext,
    hosts: &[String],
    call: &CallSpec<'_>,
) -> Result<Final, HttpError> {
    let Some((last, rest)) = hosts.split_last() else {
        return Err(HttpError::Config("no host configured".to_string()));
    };

    let mut failures = Vec::new();
    for host in rest {
        let outcome = engine.execute(ctx, &attempt_spec(host, call)?).await?;
        if !falls_through(&outcome) {
            return Ok(outcome);
        }

        let detail = match outcome {
            Final::Transport { error, .. } => error.message().to_string(),
            Final::Response { response, .. } => {
                let status = response.status();
                let _ = ctx.run(response.bytes()).await?;
                status.to_string()
            }
        };
        tracing::warn!(host = %host, detail = %detail, "host failed, trying next");
        failures.push(failure(host, call, detail));
    }

    let outcome = engine.execute(ctx, &attempt_spec(last, call)?).await?;
    if rest.is_empty() || !falls_through(&outcome) {
        return Ok(outcome);
    }

    let (detail, status, headers) = match outcome {
        Final::Transport { error, .. } => (error.message().to_string(), None, None),
        Final::Response { response, .. } => {
            let status = response.status();
            let headers = response.headers().clone();
            let _ = ctx.run(response.bytes()).await?;
            (status.to_string(), Some(status), Some(headers))
        }
    };
    failures.push(failure(last, call, detail));
    Err(HttpError::AllHostsFailed { failures, status, headers })
}

fn attempt_spec<'a>(host: &str, call: &CallSpec<'a>) -> Result<AttemptSpec<'a>, HttpError> {
    Ok(AttemptSpec {
        method: call.method,
        url: join_url(host, call.path)?,
        body: call.body,
        correlation_id: call.correlation_id,
        harvest: call.harvest,
    })
}

fn failure(host: &str, call: &CallSpec<'_>, detail: String) -> HostFailure {
    HostFailure {
        host: host.to_string(),
        method: call.method.clone(),
        path: call.path.to_string(),
        detail,
    }
}
