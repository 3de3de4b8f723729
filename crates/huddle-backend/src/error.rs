use huddle_core::{ChatError, ErrorCategory};
use huddle_platform::CredentialError;
use serde_json::Value;

pub(crate) fn map_request_error(operation: &str, err: reqwest::Error) -> ChatError {
    if err.is_decode() {
        return ChatError::new(
            ErrorCategory::Serialization,
            "decode_failed",
            format!("{operation}: unexpected response body: {err}"),
        );
    }
    if let Some(status) = err.status() {
        return ChatError::http_status(status.as_u16(), format!("{operation}: {err}"));
    }

    ChatError::new(
        ErrorCategory::Fetch,
        "http_request_failed",
        format!("{operation}: {err}"),
    )
}

/// Non-success response: prefer the server's `detail` or `error` text.
pub(crate) fn map_status_error(operation: &str, status: u16, body: &str) -> ChatError {
    let detail = server_detail(body).unwrap_or_else(|| format!("HTTP {status}"));
    ChatError::http_status(status, format!("{operation}: {detail}"))
}

pub(crate) fn map_decode_error(operation: &str, err: serde_json::Error) -> ChatError {
    ChatError::new(
        ErrorCategory::Serialization,
        "decode_failed",
        format!("{operation}: unexpected response body: {err}"),
    )
}

pub(crate) fn map_credential_error(operation: &str, err: CredentialError) -> ChatError {
    let (CredentialError::Unavailable(message) | CredentialError::Backend(message)) = err;
    ChatError::new(
        ErrorCategory::Storage,
        "credential_store_error",
        format!("credential store failed during {operation}: {message}"),
    )
}

pub(crate) fn map_ws_error(
    target: &url::Url,
    err: tokio_tungstenite::tungstenite::Error,
) -> ChatError {
    use tokio_tungstenite::tungstenite::Error;

    match err {
        Error::Http(response) => {
            let status = response.status().as_u16();
            let mut mapped =
                ChatError::connect_failed(target, format!("handshake rejected with HTTP {status}"));
            if matches!(status, 401 | 403) {
                mapped.category = ErrorCategory::Auth;
            }
            mapped
        }
        other => ChatError::connect_failed(target, other.to_string()),
    }
}

fn server_detail(body: &str) -> Option<String> {
    let value = serde_json::from_str::<Value>(body).ok()?;
    let object = value.as_object()?;
    ["detail", "error"]
        .iter()
        .find_map(|key| object.get(*key).and_then(Value::as_str))
        .map(str::to_owned)
        .or_else(|| {
            // DRF validation errors: {"field": ["message", ...]}
            object.iter().find_map(|(field, value)| {
                let first = value.as_array()?.first()?.as_str()?;
                Some(format!("{field}: {first}"))
            })
        })
}
