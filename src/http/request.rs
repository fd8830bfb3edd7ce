//! Request descriptor.
//!
//! # Responsibilities
//! - Carry everything a transport needs to fulfil a request
//! - Validate caller-supplied headers on the way in
//! - Track the redirect chain across transports
//!
//! # Design Decisions
//! - Cloning is cheap enough to hand handlers their own copy: bodies hold
//!   `Bytes` or shared handles, never owned buffers
//! - Load flags are plain booleans; the only bitmask in the pipeline is the
//!   request/response lifecycle state

use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::Method;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::NetResult;
use crate::http::headers::parse_header;
use crate::http::referrer::ReferrerPolicy;
use crate::observability::RequestId;
use crate::upload::RequestBody;

/// Scheduling priority hint for transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestPriority {
    Idle,
    Lowest,
    Low,
    #[default]
    Medium,
    Highest,
}

impl RequestPriority {
    pub const MAXIMUM: RequestPriority = RequestPriority::Highest;
}

/// Per-request load flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadFlags {
    /// Attach and store cookies from the session jar.
    pub use_session_cookies: bool,
    /// Skip registered and intercepted scheme handlers.
    pub bypass_custom_protocol_handlers: bool,
    pub has_user_activation: bool,
    /// Exempt from the global outbound connection limit.
    pub ignore_limits: bool,
}

/// A request as seen by transports and handlers.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub id: RequestId,
    pub method: Method,
    pub url: Url,
    pub referrer: Option<Url>,
    pub referrer_policy: ReferrerPolicy,
    pub site_for_cookies: Option<Url>,
    pub headers: HeaderMap,
    /// Headers exempt from CORS checks; sent but never exposed to handlers'
    /// override merging.
    pub cors_exempt_headers: HeaderMap,
    pub body: Option<RequestBody>,
    pub flags: LoadFlags,
    pub priority: RequestPriority,
    /// Navigations move site-for-cookies along with redirects.
    pub is_navigation: bool,
    /// URLs this request has been redirected away from, oldest first.
    pub redirect_chain: Vec<Url>,
}

impl RequestDescriptor {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            id: RequestId::new(),
            site_for_cookies: Some(url.clone()),
            method,
            url,
            referrer: None,
            referrer_policy: ReferrerPolicy::default(),
            headers: HeaderMap::new(),
            cors_exempt_headers: HeaderMap::new(),
            body: None,
            flags: LoadFlags::default(),
            priority: RequestPriority::default(),
            is_navigation: false,
            redirect_chain: Vec::new(),
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// Validate and append a header.
    pub fn append_header(&mut self, name: &str, value: &str) -> NetResult<()> {
        let (name, value) = parse_header(name, value)?;
        self.headers.append(name, value);
        Ok(())
    }

    /// Builder form of [`append_header`](Self::append_header).
    pub fn with_header(mut self, name: &str, value: &str) -> NetResult<Self> {
        self.append_header(name, value)?;
        Ok(self)
    }

    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = Some(body);
        self
    }

    pub fn set_cors_exempt_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.cors_exempt_headers.insert(name, value);
    }

    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    /// Number of redirects already taken.
    pub fn redirect_count(&self) -> usize {
        self.redirect_chain.len()
    }

    /// True when the method must not carry a body.
    pub fn is_bodyless_method(&self) -> bool {
        self.method == Method::GET || self.method == Method::HEAD
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_descriptor_defaults() {
        let request = RequestDescriptor::get(Url::parse("https://example.test/a").unwrap());
        assert_eq!(request.method, Method::GET);
        assert_eq!(request.priority, RequestPriority::Medium);
        assert_eq!(request.site_for_cookies.as_ref(), Some(&request.url));
        assert_eq!(request.redirect_count(), 0);
        assert!(request.body.is_none());
    }

    #[test]
    fn headers_are_validated_and_duplicates_kept() {
        let request = RequestDescriptor::get(Url::parse("https://example.test/").unwrap())
            .with_header("Accept", "text/html")
            .unwrap()
            .with_header("accept", "application/json")
            .unwrap();
        assert_eq!(request.headers.get_all("ACCEPT").iter().count(), 2);

        let err = RequestDescriptor::get(Url::parse("https://example.test/").unwrap())
            .with_header("bad header", "x")
            .unwrap_err();
        assert_eq!(err, crate::error::NetError::InvalidArgument);
    }

    #[test]
    fn ids_differ_per_descriptor() {
        let url = Url::parse("https://example.test/").unwrap();
        assert_ne!(RequestDescriptor::get(url.clone()).id, RequestDescriptor::get(url).id);
    }
}
