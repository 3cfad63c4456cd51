//! Push-channel protocol definitions and URL helpers.

use serde::{Deserialize, Serialize};

/// Path of the realtime push endpoint.
pub const WS_PATH: &str = "/api/ws";

/// Close code the server uses to reject an unauthenticated socket.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// Server → client push frame.
///
/// Frames are JSON text, discriminated by `type`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushMessage {
    /// The backend worker finished (re)generating an explanation.
    ExplanationReady { id: String },
    /// Generation failed.
    ExplanationError {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        error: String,
    },
}

impl PushMessage {
    /// Parse a text frame.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Check if a host is a local/development address.
pub fn is_local_address(host: &str) -> bool {
    let host_part = host.split(':').next().unwrap_or(host);
    host_part == "localhost"
        || host_part == "127.0.0.1"
        || host_part == "0.0.0.0"
        || host_part.starts_with("192.168.")
        || host_part.starts_with("10.")
}

/// Turn a configured base (`example.com`, `localhost:8000`, `https://x/`) into
/// an absolute origin without a trailing slash.
pub fn normalize_base_url(base: &str) -> String {
    let base = base.trim().trim_end_matches('/');
    if base.contains("://") {
        base.to_string()
    } else if is_local_address(base) {
        format!("http://{base}")
    } else {
        format!("https://{base}")
    }
}

/// Join a base URL and an absolute or relative path.
pub fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

/// Convert an HTTP(S) URL to the matching WS(S) URL; secure pages get secure sockets.
pub fn http_to_ws(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        url.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ready_and_error_frames() {
        assert_eq!(
            PushMessage::parse(r#"{"type":"explanation_ready","id":"42"}"#).unwrap(),
            PushMessage::ExplanationReady { id: "42".into() }
        );
        assert_eq!(
            PushMessage::parse(r#"{"type":"explanation_error","error":"boom"}"#).unwrap(),
            PushMessage::ExplanationError {
                id: None,
                error: "boom".into()
            }
        );
    }

    #[test]
    fn rejects_unknown_frames() {
        assert!(PushMessage::parse(r#"{"type":"something_else"}"#).is_err());
        assert!(PushMessage::parse("not json").is_err());
    }

    #[test]
    fn base_urls_pick_scheme_by_locality() {
        assert_eq!(normalize_base_url("localhost:8000"), "http://localhost:8000");
        assert_eq!(normalize_base_url("ord.example.se/"), "https://ord.example.se");
        assert_eq!(normalize_base_url("http://10.0.0.2:8000/"), "http://10.0.0.2:8000");
    }

    #[test]
    fn socket_scheme_mirrors_page_scheme() {
        assert_eq!(http_to_ws("https://ord.example.se/api/ws"), "wss://ord.example.se/api/ws");
        assert_eq!(http_to_ws("http://localhost:8000/api/ws"), "ws://localhost:8000/api/ws");
        assert_eq!(join_url("http://a/", "/api/ws"), "http://a/api/ws");
    }
}
