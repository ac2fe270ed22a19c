//! XML envelope construction and response inspection for the appliance API.
//!
//! The appliance speaks a small, fixed-shape XML dialect. Requests carry a
//! protocol version and a request ID; error responses carry an
//! `<error><code>N</code><message>..</message></error>` element, sometimes
//! inside an HTTP 200. Code 29 is the appliance's "another session is already
//! open" signal and is always classified separately from other application
//! errors.
//!
//! Extraction is intentionally regex-based: the schema is tiny and never
//! nests, so a full XML parser buys nothing. Matching is case-insensitive and
//! tolerates CDATA-wrapped message text.

use std::sync::LazyLock;

use regex::Regex;

/// Application error code the appliance uses for "session already open".
pub const SESSION_CONFLICT_CODE: u32 = 29;

/// Protocol version stamped into every request envelope.
const PROTOCOL_VERSION: &str = "1.0";

static ERROR_CODE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<error\b[^>]*>.*?<code\b[^>]*>\s*(\d+)\s*</code>").unwrap()
});
static ERROR_MESSAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<message\b[^>]*>\s*(?:<!\[CDATA\[(.*?)\]\]>|(.*?))\s*</message>").unwrap()
});
static SESSION_TIMEOUT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<session-?timeout\b[^>]*>\s*(\d+)\s*</session-?timeout>").unwrap()
});

/// Outcome of a login attempt against one candidate base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    /// 2xx response with no `<error>` element.
    Success {
        /// Session-timeout hint from the body, in minutes, when present.
        session_timeout_minutes: Option<u64>,
    },
    /// Application error code 29 — another session is already open.
    SessionConflict { message: Option<String> },
    /// Any other `<error>` element.
    ApplicationError { code: u32, message: Option<String> },
    /// Non-2xx status without a recognizable application error.
    HttpError { status: u16 },
}

/// Build the XML body for a login request.
///
/// Credentials are XML-escaped so passwords containing `&`, `<`, or quotes
/// survive the trip.
pub fn login_envelope(request_id: &str, username: &str, password: &str) -> String {
    format!(
        concat!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>",
            "<nbi-request version=\"{}\" requestId=\"{}\">",
            "<login><username>{}</username><password>{}</password></login>",
            "</nbi-request>"
        ),
        PROTOCOL_VERSION,
        escape_xml(request_id),
        escape_xml(username),
        escape_xml(password),
    )
}

/// Build the XML body for a logout request.
pub fn logout_envelope(request_id: &str) -> String {
    format!(
        concat!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>",
            "<nbi-request version=\"{}\" requestId=\"{}\">",
            "<logout/>",
            "</nbi-request>"
        ),
        PROTOCOL_VERSION,
        escape_xml(request_id),
    )
}

/// Classify a login response into a [`LoginOutcome`].
///
/// The appliance reports some failures as application-level `<error>` elements
/// inside an HTTP 200, so the body is checked before the status code.
pub fn parse_login_outcome(status: u16, body: &str) -> LoginOutcome {
    if let Some(code) = extract_error_code(body) {
        let message = extract_error_message(body);
        if code == SESSION_CONFLICT_CODE {
            return LoginOutcome::SessionConflict { message };
        }
        return LoginOutcome::ApplicationError { code, message };
    }
    if (200..300).contains(&status) {
        LoginOutcome::Success {
            session_timeout_minutes: extract_session_timeout(body),
        }
    } else {
        LoginOutcome::HttpError { status }
    }
}

/// Whether `body` carries the appliance's session-conflict signal (code 29).
///
/// Used on authenticated-request responses: the appliance reports a stolen or
/// expired session as a code-29 error inside an HTTP 200.
pub fn contains_session_conflict(body: &str) -> bool {
    extract_error_code(body) == Some(SESSION_CONFLICT_CODE)
}

/// Extract the first `<error><code>N</code>` value, if any.
pub fn extract_error_code(body: &str) -> Option<u32> {
    ERROR_CODE_RE
        .captures(body)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Extract the `<message>` text of an error response, unwrapping CDATA.
pub fn extract_error_message(body: &str) -> Option<String> {
    ERROR_MESSAGE_RE.captures(body).and_then(|c| {
        c.get(1)
            .or_else(|| c.get(2))
            .map(|m| m.as_str().trim().to_string())
            .filter(|s| !s.is_empty())
    })
}

/// Extract the session-timeout hint (minutes) from a login response body.
pub fn extract_session_timeout(body: &str) -> Option<u64> {
    SESSION_TIMEOUT_RE
        .captures(body)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Merge raw `Set-Cookie` header values into a single `Cookie` header value.
///
/// Keeps only the leading `name=value` of each header (attributes like
/// `Path` and `HttpOnly` are per-response metadata, not credential material)
/// and joins the pairs with `; ` in header order.
pub fn extract_set_cookie_pairs(header_values: &[String]) -> String {
    header_values
        .iter()
        .filter_map(|raw| {
            let pair = raw.split(';').next().unwrap_or("").trim();
            if pair.contains('=') {
                Some(pair.to_string())
            } else {
                None
            }
        })
        .collect::<Vec<_>>()
        .join("; ")
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_envelope_escapes_credentials() {
        let xml = login_envelope("req-1", "admin", "p<a&s>s\"w'd");
        assert!(xml.contains("<username>admin</username>"));
        assert!(xml.contains("<password>p&lt;a&amp;s&gt;s&quot;w&apos;d</password>"));
        assert!(xml.contains("requestId=\"req-1\""));
        assert!(xml.contains("version=\"1.0\""));
    }

    #[test]
    fn test_parse_success_with_timeout_hint() {
        let body = "<nbi-response><ok/><sessionTimeout>45</sessionTimeout></nbi-response>";
        assert_eq!(
            parse_login_outcome(200, body),
            LoginOutcome::Success {
                session_timeout_minutes: Some(45)
            }
        );
    }

    #[test]
    fn test_parse_success_without_timeout_hint() {
        assert_eq!(
            parse_login_outcome(200, "<nbi-response><ok/></nbi-response>"),
            LoginOutcome::Success {
                session_timeout_minutes: None
            }
        );
    }

    #[test]
    fn test_parse_session_conflict_in_200() {
        let body = "<ERROR><CODE>29</CODE><MESSAGE>session in use</MESSAGE></ERROR>";
        assert_eq!(
            parse_login_outcome(200, body),
            LoginOutcome::SessionConflict {
                message: Some("session in use".to_string())
            }
        );
        assert!(contains_session_conflict(body));
    }

    #[test]
    fn test_parse_application_error_with_cdata_message() {
        let body = "<error><code>12</code><message><![CDATA[bad credentials <here>]]></message></error>";
        assert_eq!(
            parse_login_outcome(200, body),
            LoginOutcome::ApplicationError {
                code: 12,
                message: Some("bad credentials <here>".to_string())
            }
        );
        assert!(!contains_session_conflict(body));
    }

    #[test]
    fn test_parse_http_error_without_error_element() {
        assert_eq!(
            parse_login_outcome(502, "bad gateway"),
            LoginOutcome::HttpError { status: 502 }
        );
    }

    #[test]
    fn test_cookie_pairs_strip_attributes_and_keep_order() {
        let headers = vec![
            "asCookie=XYZ; Path=/; HttpOnly".to_string(),
            "nbiToken=abc123; Max-Age=1800".to_string(),
        ];
        assert_eq!(
            extract_set_cookie_pairs(&headers),
            "asCookie=XYZ; nbiToken=abc123"
        );
    }

    #[test]
    fn test_cookie_pairs_skip_malformed_headers() {
        let headers = vec!["nonsense".to_string(), "a=b".to_string()];
        assert_eq!(extract_set_cookie_pairs(&headers), "a=b");
    }

    #[test]
    fn test_session_timeout_hyphenated_element() {
        assert_eq!(
            extract_session_timeout("<session-timeout>30</session-timeout>"),
            Some(30)
        );
    }
}
