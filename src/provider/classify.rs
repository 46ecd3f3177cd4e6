//! Translation of raw provider failures into the engine's error taxonomy.
//!
//! Bindings call [`translate`] on every non-success response. The result is a
//! [`ProviderError`] whose [`ProviderError::is_recoverable`] answer is final:
//! 400/401/403/404/409 are permanent, over-limit responses are transient and
//! carry the provider's delay hint, anything else is transient.

use serde_json::Value;

use crate::error::{ProviderError, is_permanent_status};

use super::types::ResourceKind;

/// Target of a failed request, used to build not-found errors.
#[derive(Debug, Clone, Copy)]
pub struct RequestTarget<'a> {
    /// Kind addressed by the request.
    pub kind: ResourceKind,
    /// Id addressed by the request, if any.
    pub id: Option<&'a str>,
}

/// Translates a failed response into a [`ProviderError`].
///
/// `retry_after` is the provider's `Retry-After` hint; `0` means "no hint".
#[must_use]
pub fn translate(
    target: Option<RequestTarget<'_>>,
    status: u16,
    body: &str,
    retry_after: Option<u64>,
) -> ProviderError {
    let message = extract_message(body).unwrap_or_else(|| {
        if body.is_empty() {
            format!("HTTP {status}")
        } else {
            body.to_string()
        }
    });

    match (status, target) {
        (404, Some(RequestTarget { kind, id: Some(id) })) => ProviderError::not_found(kind, id),
        (413 | 429, _) => ProviderError::OverLimit {
            retry_after_secs: retry_after.filter(|secs| *secs > 0),
            message,
        },
        (401, _) => ProviderError::AuthenticationFailed { message },
        _ => ProviderError::api_error(status, message),
    }
}

/// Returns true if a failed response with `status` may succeed when retried.
#[must_use]
pub const fn is_transient_status(status: u16) -> bool {
    !is_permanent_status(status)
}

/// Pulls the human-readable message out of an OpenStack error body.
///
/// The sub-services wrap it differently: `{"itemNotFound": {"message": ..}}`,
/// `{"NeutronError": {"message": ..}}`, `{"error": {"message": ..}}` or a
/// bare `{"message": ..}`.
fn extract_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    let object = value.as_object()?;

    if let Some(message) = object.get("message").and_then(Value::as_str) {
        return Some(message.to_string());
    }

    object
        .values()
        .filter_map(|inner| inner.get("message"))
        .find_map(Value::as_str)
        .map(str::to_string)
}
