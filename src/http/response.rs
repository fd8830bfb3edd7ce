//! Response head.
//!
//! # Responsibilities
//! - Describe a response before its body: status, headers, mime type, charset
//! - Detect redirects and resolve their targets
//!
//! # Design Decisions
//! - Built fresh for every response and handed to the consumer by value
//! - Redirect detection uses the status set transports actually follow
//!   (301, 302, 303, 307, 308) plus a non-empty `Location`

use http::header::{HeaderMap, CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use http::{StatusCode, Version};
use url::Url;

use crate::http::headers::parse_content_type;

/// Status line, headers and body metadata of a response.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub status_text: String,
    pub version: Version,
    pub mime_type: String,
    pub charset: String,
    pub headers: HeaderMap,
    pub content_length: Option<u64>,
}

impl Default for ResponseHead {
    fn default() -> Self {
        Self::new(StatusCode::OK)
    }
}

impl ResponseHead {
    /// Head with the handler defaults: `text/html`, `utf-8`, no headers.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            status_text: status.canonical_reason().unwrap_or("").to_string(),
            version: Version::HTTP_11,
            mime_type: "text/html".to_string(),
            charset: "utf-8".to_string(),
            headers: HeaderMap::new(),
            content_length: None,
        }
    }

    /// Head for a response received from the network.
    pub fn from_parts(parts: &http::response::Parts) -> Self {
        let (mime_type, charset) = parts
            .headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(parse_content_type)
            .unwrap_or_default();

        let content_length = parts
            .headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok());

        Self {
            status: parts.status,
            status_text: parts.status.canonical_reason().unwrap_or("").to_string(),
            version: parts.version,
            mime_type,
            charset: charset.unwrap_or_default(),
            headers: parts.headers.clone(),
            content_length,
        }
    }

    pub fn location(&self) -> Option<&str> {
        self.headers
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self.status.as_u16(), 301 | 302 | 303 | 307 | 308) && self.location().is_some()
    }

    /// Redirect target resolved against `base`, if this head is a redirect.
    pub fn redirect_target(&self, base: &Url) -> Option<Url> {
        if !self.is_redirect() {
            return None;
        }
        base.join(self.location()?).ok()
    }

    /// HTTP version as `major.minor`.
    pub fn http_version(&self) -> &'static str {
        match self.version {
            Version::HTTP_09 => "0.9",
            Version::HTTP_10 => "1.0",
            Version::HTTP_2 => "2.0",
            Version::HTTP_3 => "3.0",
            _ => "1.1",
        }
    }

    /// e.g. `HTTP/1.1 200 OK`
    pub fn status_line(&self) -> String {
        format!("HTTP/{} {} {}", self.http_version(), self.status.as_u16(), self.status_text)
            .trim_end()
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn defaults_match_handler_contract() {
        let head = ResponseHead::default();
        assert_eq!(head.status, StatusCode::OK);
        assert_eq!(head.mime_type, "text/html");
        assert_eq!(head.charset, "utf-8");
        assert_eq!(head.status_line(), "HTTP/1.1 200 OK");
    }

    #[test]
    fn redirect_requires_status_and_location() {
        let base = Url::parse("https://example.test/dir/page").unwrap();
        let mut head = ResponseHead::new(StatusCode::FOUND);
        assert!(!head.is_redirect());

        head.headers.insert(LOCATION, HeaderValue::from_static("../next"));
        assert!(head.is_redirect());
        assert_eq!(
            head.redirect_target(&base).unwrap().as_str(),
            "https://example.test/next"
        );

        head.status = StatusCode::OK;
        assert!(head.redirect_target(&base).is_none());
    }

    #[test]
    fn from_parts_reads_content_headers() {
        let response = http::Response::builder()
            .status(404)
            .header(CONTENT_TYPE, "application/json; charset=UTF-8")
            .header(CONTENT_LENGTH, "17")
            .body(())
            .unwrap();
        let (parts, _) = response.into_parts();

        let head = ResponseHead::from_parts(&parts);
        assert_eq!(head.status_text, "Not Found");
        assert_eq!(head.mime_type, "application/json");
        assert_eq!(head.charset, "utf-8");
        assert_eq!(head.content_length, Some(17));
    }
}
