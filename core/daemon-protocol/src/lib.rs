//! Wire payload types and validation for formtrace-daemon.
//!
//! This crate is shared by the daemon and anything that posts events to it so
//! the JSON shape cannot drift. The daemon remains the authority on validation:
//! every payload goes through [`parse_event`] before it can touch session state.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const MAX_REQUEST_BYTES: usize = 1024 * 1024; // 1MB

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl Response {
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(ErrorInfo::new(code, message)),
        }
    }

    pub fn error_with_info(error: ErrorInfo) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(error),
        }
    }
}

/// Which endpoint a payload arrived on. The kind decides the required fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Open,
    Resize,
    Paste,
    Complete,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Open => "open",
            EventKind::Resize => "resize",
            EventKind::Paste => "paste",
            EventKind::Complete => "complete",
        }
    }

    /// HTTP path the browser client posts this event to.
    pub fn path(&self) -> &'static str {
        match self {
            EventKind::Open => "/new",
            EventKind::Resize => "/resize",
            EventKind::Paste => "/copyandpaste",
            EventKind::Complete => "/submit",
        }
    }
}

/// Browser window size as reported by the client. Both values are kept as the
/// strings the client sent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimension {
    pub width: String,
    pub height: String,
}

impl Dimension {
    pub fn new(width: impl Into<String>, height: impl Into<String>) -> Self {
        Self {
            width: width.into(),
            height: height.into(),
        }
    }
}

/// Flat JSON object posted by the client. Every endpoint shares this shape and
/// only a subset of the fields is required for a given [`EventKind`].
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct EventPayload {
    #[serde(rename = "websiteURL", default, skip_serializing_if = "Option::is_none")]
    pub website_url: Option<String>,
    #[serde(rename = "sessionId", default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(rename = "resizeFrom", default, skip_serializing_if = "Option::is_none")]
    pub resize_from: Option<Dimension>,
    #[serde(rename = "resizeTo", default, skip_serializing_if = "Option::is_none")]
    pub resize_to: Option<Dimension>,
    #[serde(rename = "formId", default, skip_serializing_if = "Option::is_none")]
    pub form_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paste: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<f64>,
}

/// Identifies one session record: a session id scoped to a website.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub website_url: String,
    pub session_id: String,
}

impl SessionKey {
    pub fn new(website_url: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            website_url: website_url.into(),
            session_id: session_id.into(),
        }
    }
}

/// A payload that passed validation for its endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Open {
        key: SessionKey,
    },
    Resize {
        key: SessionKey,
        from: Dimension,
        to: Dimension,
    },
    Paste {
        key: SessionKey,
        form_id: String,
        paste: bool,
    },
    Complete {
        key: SessionKey,
        elapsed_secs: u64,
    },
}

impl Event {
    pub fn key(&self) -> &SessionKey {
        match self {
            Event::Open { key }
            | Event::Resize { key, .. }
            | Event::Paste { key, .. }
            | Event::Complete { key, .. } => key,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Event::Open { .. } => EventKind::Open,
            Event::Resize { .. } => EventKind::Resize,
            Event::Paste { .. } => EventKind::Paste,
            Event::Complete { .. } => EventKind::Complete,
        }
    }
}

impl EventPayload {
    pub fn validate(self, kind: EventKind) -> Result<Event, ErrorInfo> {
        let website_url = require_string(self.website_url, "websiteURL")?;
        let session_id = require_string(self.session_id, "sessionId")?;
        let key = SessionKey {
            website_url,
            session_id,
        };

        match kind {
            EventKind::Open => Ok(Event::Open { key }),
            EventKind::Resize => {
                let from = require_present(self.resize_from, "resizeFrom")?;
                let to = require_present(self.resize_to, "resizeTo")?;
                Ok(Event::Resize { key, from, to })
            }
            EventKind::Paste => {
                let form_id = require_string(self.form_id, "formId")?;
                let paste = require_present(self.paste, "paste")?;
                Ok(Event::Paste {
                    key,
                    form_id,
                    paste,
                })
            }
            EventKind::Complete => {
                let time = require_present(self.time, "time")?;
                let elapsed_secs = whole_seconds(time)?;
                Ok(Event::Complete { key, elapsed_secs })
            }
        }
    }
}

/// Parses and validates a raw request body for the given endpoint.
pub fn parse_event(kind: EventKind, body: &[u8]) -> Result<Event, ErrorInfo> {
    if body.len() > MAX_REQUEST_BYTES {
        return Err(ErrorInfo::new(
            "request_too_large",
            "request exceeded maximum size",
        ));
    }
    if body.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    let value: Value = serde_json::from_slice(body).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("request was not valid JSON: {}", err),
        )
    })?;
    // Derived Deserialize also fills a struct from a positional array.
    if !value.is_object() {
        return Err(ErrorInfo::new(
            "invalid_json",
            format!("{} payload must be a JSON object", kind.as_str()),
        ));
    }

    let payload: EventPayload = serde_json::from_value(value).map_err(|err| {
        ErrorInfo::new(
            "invalid_field",
            format!("{} payload has a mistyped field: {}", kind.as_str(), err),
        )
    })?;
    payload.validate(kind)
}

fn require_string(value: Option<String>, field: &str) -> Result<String, ErrorInfo> {
    match value {
        Some(candidate) if !candidate.trim().is_empty() => Ok(candidate),
        _ => Err(ErrorInfo::new(
            "missing_field",
            format!("{} is required", field),
        )),
    }
}

fn require_present<T>(value: Option<T>, field: &str) -> Result<T, ErrorInfo> {
    value.ok_or_else(|| ErrorInfo::new("missing_field", format!("{} is required", field)))
}

// JSON numbers arrive as f64; any fractional part is dropped.
fn whole_seconds(time: f64) -> Result<u64, ErrorInfo> {
    if !time.is_finite() || time < 0.0 || time > u64::MAX as f64 {
        return Err(ErrorInfo::new(
            "invalid_field",
            "time must be a non-negative number of seconds",
        ));
    }
    Ok(time.trunc() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> EventPayload {
        EventPayload {
            website_url: Some("site.com".to_string()),
            session_id: Some("abc".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn validates_open_event() {
        let event = payload().validate(EventKind::Open).expect("valid open");
        assert_eq!(
            event,
            Event::Open {
                key: SessionKey::new("site.com", "abc")
            }
        );
    }

    #[test]
    fn rejects_missing_session_id() {
        let mut event = payload();
        event.session_id = None;
        let err = event.validate(EventKind::Open).unwrap_err();
        assert_eq!(err.code, "missing_field");
        assert!(err.message.contains("sessionId"));
    }

    #[test]
    fn rejects_blank_website() {
        let mut event = payload();
        event.website_url = Some("   ".to_string());
        assert!(event.validate(EventKind::Open).is_err());
    }

    #[test]
    fn resize_requires_both_dimensions() {
        let mut event = payload();
        event.resize_from = Some(Dimension::new("100", "200"));
        let err = event.validate(EventKind::Resize).unwrap_err();
        assert!(err.message.contains("resizeTo"));
    }

    #[test]
    fn paste_requires_flag() {
        let mut event = payload();
        event.form_id = Some("email".to_string());
        let err = event.validate(EventKind::Paste).unwrap_err();
        assert!(err.message.contains("paste"));
    }

    #[test]
    fn parses_client_resize_body() {
        let body = br#"{
            "websiteURL": "site.com",
            "sessionId": "abc",
            "resizeFrom": {"width": "100", "height": "200"},
            "resizeTo": {"width": "300", "height": "400"}
        }"#;
        let event = parse_event(EventKind::Resize, body).expect("valid resize");
        assert_eq!(
            event,
            Event::Resize {
                key: SessionKey::new("site.com", "abc"),
                from: Dimension::new("100", "200"),
                to: Dimension::new("300", "400"),
            }
        );
    }

    #[test]
    fn truncates_fractional_time() {
        let body = br#"{"websiteURL":"site.com","sessionId":"abc","time":42.9}"#;
        let event = parse_event(EventKind::Complete, body).expect("valid complete");
        assert_eq!(event.kind(), EventKind::Complete);
        assert!(matches!(event, Event::Complete { elapsed_secs: 42, .. }));
    }

    #[test]
    fn rejects_negative_time() {
        let body = br#"{"websiteURL":"site.com","sessionId":"abc","time":-1}"#;
        let err = parse_event(EventKind::Complete, body).unwrap_err();
        assert_eq!(err.code, "invalid_field");
    }

    #[test]
    fn classifies_mistyped_field() {
        let body = br#"{"websiteURL":"site.com","sessionId":"abc","formId":"email","paste":"yes"}"#;
        let err = parse_event(EventKind::Paste, body).unwrap_err();
        assert_eq!(err.code, "invalid_field");
    }

    #[test]
    fn classifies_invalid_json() {
        let err = parse_event(EventKind::Open, b"{not json").unwrap_err();
        assert_eq!(err.code, "invalid_json");
    }

    #[test]
    fn rejects_non_object_bodies() {
        for body in [
            &br#"["site.com","abc"]"#[..],
            &b"[1,2]"[..],
            &b"42"[..],
            &br#""site.com""#[..],
            &b"null"[..],
        ] {
            let err = parse_event(EventKind::Open, body).unwrap_err();
            assert_eq!(err.code, "invalid_json");
            assert!(err.message.contains("JSON object"));
        }
    }

    #[test]
    fn rejects_empty_body() {
        let err = parse_event(EventKind::Open, b"  \n").unwrap_err();
        assert_eq!(err.code, "empty_request");
    }

    #[test]
    fn ignores_unknown_fields() {
        let body = br#"{"websiteURL":"site.com","sessionId":"abc","eventType":"copy"}"#;
        assert!(parse_event(EventKind::Open, body).is_ok());
    }
}
