//! Error types for first-generation Rackspace API operations.
//!
//! The cloud reports failures as JSON bodies with a single top-level key
//! naming the fault. [`CloudFault::parse`] normalizes those bodies into a
//! `{code, kind, message, details}` record independent of the transport, and
//! [`Error`] is the one failure type every client method returns.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Classification of a cloud-reported fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CloudErrorKind {
    /// The credentials or token were rejected
    Authentication,
    /// The provider lacks capacity to satisfy the request
    Capacity,
    /// The request was malformed or used an unsupported method/media type
    Communication,
    /// An account limit was exceeded
    Quota,
    /// Anything the provider did not classify further
    General,
}

/// Normalized record of a non-2xx cloud response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CloudFault {
    /// HTTP status code the fault arrived with
    pub code: u16,
    /// Fault classification derived from the provider's message vocabulary
    pub kind: CloudErrorKind,
    /// Short provider message (e.g. "badRequest")
    pub message: String,
    /// Human-readable detail text
    pub details: String,
}

impl CloudFault {
    /// Parse a JSON error body into a normalized fault.
    ///
    /// Returns `None` for the provider's `itemNotFound` message: that is the
    /// absence sentinel, and callers must treat it as "no such resource"
    /// rather than a failure. Unparseable bodies fall back to a general
    /// fault carrying the raw text as details.
    #[must_use]
    pub fn parse(code: u16, body: &str) -> Option<Self> {
        let mut fault = Self {
            code,
            kind: CloudErrorKind::General,
            message: "unknown".to_string(),
            details: "The cloud provided an error code without explanation".to_string(),
        };

        if body.trim().is_empty() {
            return Some(fault);
        }
        let Ok(root) = serde_json::from_str::<Value>(body) else {
            tracing::warn!(%code, "invalid JSON in cloud error response");
            fault.details = body.to_string();
            return Some(fault);
        };
        // The interesting fields live under a single wrapper key naming the
        // fault ("badRequest", "itemNotFound", ...) on most endpoints, or at
        // the top level on older ones.
        let ob = root
            .as_object()
            .and_then(|map| {
                if map.contains_key("message") || map.contains_key("details") {
                    None
                } else {
                    map.values().find(|v| v.is_object())
                }
            })
            .unwrap_or(&root);

        match ob.get("details").and_then(Value::as_str) {
            Some(details) => fault.details = details.to_string(),
            None => fault.details = format!("[{code}] {}", fault.message),
        }
        if let Some(message) = ob.get("message").and_then(Value::as_str) {
            fault.message = message.trim().to_string();
            if code == 400 && fault.message.eq_ignore_ascii_case("validation failure") {
                if let Some(messages) = ob
                    .get("validationErrors")
                    .and_then(|v| v.get("messages"))
                    .and_then(Value::as_array)
                {
                    let joined = messages
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::trim)
                        .filter(|m| !m.is_empty())
                        .collect::<Vec<_>>()
                        .join("; ");

                    if !joined.is_empty() {
                        fault.details = joined;
                    }
                }
            }
        }
        fault.kind = match fault.message.to_lowercase().trim() {
            "unauthorized" => CloudErrorKind::Authentication,
            "serviceunavailable" | "servercapacityunavailable" => CloudErrorKind::Capacity,
            "badrequest" | "badmediatype" | "badmethod" | "notimplemented" => {
                CloudErrorKind::Communication
            }
            "overlimit" => CloudErrorKind::Quota,
            "itemnotfound" => return None,
            _ => CloudErrorKind::General,
        };
        Some(fault)
    }

    /// Synthesize the NotFound fault mutating verbs report when the decoder
    /// yields the absence sentinel.
    #[must_use]
    pub fn not_found(resource: &str) -> Self {
        Self {
            code: 404,
            kind: CloudErrorKind::Communication,
            message: "itemNotFound".to_string(),
            details: format!("No such object: {resource}"),
        }
    }

    /// The canonical fault raised when authentication yields no context.
    #[must_use]
    pub fn unauthorized() -> Self {
        Self {
            code: 401,
            kind: CloudErrorKind::Authentication,
            message: "unauthorized".to_string(),
            details: "The API keys failed to authenticate with the specified endpoint".to_string(),
        }
    }
}

/// Main error type for first-generation API operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// The cloud returned a well-formed error response
    #[error("Cloud error [{} {}]: {}", .0.code, .0.message, .0.details)]
    Cloud(CloudFault),

    /// The HTTP exchange itself failed (connect, timeout, malformed response)
    #[error("Transport failure: {0}")]
    Transport(String),

    /// Response body was not the JSON the API contract promises
    #[error("Failed to parse cloud response: {0}")]
    Parse(String),

    /// Uploaded data hash did not match the server-computed ETag
    #[error("Data corruption: {0}")]
    DataCorruption(String),

    /// Configuration was invalid before any request was made
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid endpoint URL
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// A response violated the API contract in a way retrying cannot fix
    #[error("Internal error: {0}")]
    Internal(String),

    /// The requested resource does not exist where absence is not tolerated
    #[error("Not found: {0}")]
    NotFound(String),

    /// The operation is not supported by this provider
    #[error("Not supported: {0}")]
    NotSupported(String),
}

/// Specialized result type for first-generation API operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// The HTTP status code of the underlying cloud fault, if any.
    #[must_use]
    pub fn http_code(&self) -> Option<u16> {
        match self {
            Self::Cloud(fault) => Some(fault.code),
            _ => None,
        }
    }

    /// True when this error is an HTTP 409 conflict, the signal that an
    /// asynchronous provider-side teardown is still in progress.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        self.http_code() == Some(409)
    }

    /// The fault classification, if the cloud reported one.
    #[must_use]
    pub fn cloud_kind(&self) -> Option<CloudErrorKind> {
        match self {
            Self::Cloud(fault) => Some(fault.kind),
            _ => None,
        }
    }
}

impl From<CloudFault> for Error {
    fn from(fault: CloudFault) -> Self {
        Self::Cloud(fault)
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidEndpoint(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_not_found_is_the_absence_sentinel() {
        let body = r#"{"itemNotFound":{"message":"itemNotFound","details":"gone"}}"#;
        assert_eq!(CloudFault::parse(404, body), None);

        let flat = r#"{"message":"itemNotFound"}"#;
        assert_eq!(CloudFault::parse(404, flat), None);
    }

    #[test]
    fn unauthorized_classifies_as_authentication() {
        let body = r#"{"unauthorized":{"message":"unauthorized","details":"bad key"}}"#;
        let fault = CloudFault::parse(401, body).unwrap();
        assert_eq!(fault.kind, CloudErrorKind::Authentication);
        assert_eq!(fault.message, "unauthorized");
        assert_eq!(fault.details, "bad key");
    }

    #[test]
    fn vocabulary_classification() {
        for (msg, kind) in [
            ("serviceUnavailable", CloudErrorKind::Capacity),
            ("serverCapacityUnavailable", CloudErrorKind::Capacity),
            ("badRequest", CloudErrorKind::Communication),
            ("badMediaType", CloudErrorKind::Communication),
            ("badMethod", CloudErrorKind::Communication),
            ("notImplemented", CloudErrorKind::Communication),
            ("overLimit", CloudErrorKind::Quota),
            ("somethingElse", CloudErrorKind::General),
        ] {
            let body = format!(r#"{{"message":"{msg}"}}"#);
            let fault = CloudFault::parse(500, &body).unwrap();
            assert_eq!(fault.kind, kind, "message {msg}");
        }
    }

    #[test]
    fn validation_failure_joins_messages() {
        let body = r#"{
            "badRequest": {
                "message": "validation failure",
                "validationErrors": {"messages": ["a", "b"]}
            }
        }"#;
        let fault = CloudFault::parse(400, body).unwrap();
        assert_eq!(fault.details, "a; b");
    }

    #[test]
    fn validation_failure_requires_code_400() {
        let body = r#"{
            "message": "validation failure",
            "validationErrors": {"messages": ["a", "b"]}
        }"#;
        let fault = CloudFault::parse(500, body).unwrap();
        assert_ne!(fault.details, "a; b");
    }

    #[test]
    fn malformed_body_falls_back_to_raw_text() {
        let fault = CloudFault::parse(500, "<html>oops</html>").unwrap();
        assert_eq!(fault.kind, CloudErrorKind::General);
        assert_eq!(fault.details, "<html>oops</html>");
        assert_eq!(fault.message, "unknown");
    }

    #[test]
    fn empty_body_keeps_defaults() {
        let fault = CloudFault::parse(503, "").unwrap();
        assert_eq!(fault.message, "unknown");
        assert_eq!(
            fault.details,
            "The cloud provided an error code without explanation"
        );
    }

    #[test]
    fn details_synthesized_when_absent() {
        let fault = CloudFault::parse(500, r#"{"message":"badRequest"}"#).unwrap();
        assert_eq!(fault.details, "[500] unknown");
    }

    #[test]
    fn conflict_detection() {
        let mut fault = CloudFault::not_found("/servers/1");
        fault.code = 409;
        let err = Error::from(fault);
        assert!(err.is_conflict());
        assert!(!Error::Transport("x".into()).is_conflict());
    }

    #[test]
    fn error_display() {
        let err = Error::Cloud(CloudFault::unauthorized());
        assert!(err.to_string().contains("401"));
        assert!(err.to_string().contains("unauthorized"));
    }
}
