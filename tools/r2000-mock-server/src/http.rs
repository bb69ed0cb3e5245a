//! Minimal HTTP handling for the command interface.

use serde_json::Value;
use url::form_urlencoded;

/// A parsed `GET /cmd/<command>?<query>` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    pub command: String,
    pub params: Vec<(String, String)>,
}

impl CommandRequest {
    /// Value of the first parameter named `name`.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Returns true once `raw` holds a complete request head.
pub(crate) fn is_complete(raw: &[u8]) -> bool {
    raw.windows(4).any(|w| w == b"\r\n\r\n")
}

/// Parse a request head. Returns `None` for anything but a command request.
pub fn parse_request(raw: &[u8]) -> Option<CommandRequest> {
    let head = std::str::from_utf8(raw).ok()?;
    let request_line = head.lines().next()?;
    let mut parts = request_line.split_whitespace();
    if parts.next()? != "GET" {
        return None;
    }
    let target = parts.next()?;
    let path = target.strip_prefix("/cmd/")?;

    let (command, query) = match path.split_once('?') {
        Some((command, query)) => (command, query),
        None => (path, ""),
    };
    if command.is_empty() {
        return None;
    }

    let params = form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    Some(CommandRequest {
        command: command.to_string(),
        params,
    })
}

/// A `200 OK` response carrying `body`.
pub(crate) fn json_response(body: &Value) -> Vec<u8> {
    let body = body.to_string();
    format!(
        "HTTP/1.0 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    )
    .into_bytes()
}

pub(crate) fn not_found() -> Vec<u8> {
    b"HTTP/1.0 404 Not Found\r\nConnection: close\r\n\r\n".to_vec()
}
