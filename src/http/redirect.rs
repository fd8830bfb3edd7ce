//! Redirect computation and request rewriting.
//!
//! # Responsibilities
//! - Derive the follow-up method, URL, referrer and site-for-cookies
//! - Rewrite a held descriptor in place when a redirect is followed
//!
//! # Design Decisions
//! - 303 (except HEAD) and 301/302 on POST become GET; a method change
//!   always drops the body and its entity headers

use http::header::{HeaderMap, HeaderName, CONTENT_LENGTH, CONTENT_TYPE};
use http::{Method, StatusCode};
use url::Url;

use crate::http::referrer::ReferrerPolicy;
use crate::http::request::RequestDescriptor;
use crate::http::response::ResponseHead;

const REFERRER_POLICY: &str = "referrer-policy";

/// Where a redirect leads and how the request changes on the way.
#[derive(Debug, Clone, PartialEq)]
pub struct RedirectInfo {
    pub status_code: StatusCode,
    pub new_method: Method,
    pub new_url: Url,
    pub new_site_for_cookies: Option<Url>,
    pub new_referrer: Option<Url>,
    pub new_referrer_policy: ReferrerPolicy,
}

impl RedirectInfo {
    pub fn compute(request: &RequestDescriptor, head: &ResponseHead, new_url: Url) -> Self {
        let status = head.status.as_u16();
        let new_method = if (status == 303 && request.method != Method::HEAD)
            || ((status == 301 || status == 302) && request.method == Method::POST)
        {
            Method::GET
        } else {
            request.method.clone()
        };

        let new_referrer_policy = head
            .headers
            .get(REFERRER_POLICY)
            .and_then(|v| v.to_str().ok())
            .and_then(ReferrerPolicy::from_header)
            .unwrap_or(request.referrer_policy);

        let new_referrer = request
            .referrer
            .as_ref()
            .and_then(|referrer| new_referrer_policy.referrer_for(referrer, &new_url));

        let new_site_for_cookies = if request.is_navigation {
            Some(new_url.clone())
        } else {
            request.site_for_cookies.clone()
        };

        Self {
            status_code: head.status,
            new_method,
            new_url,
            new_site_for_cookies,
            new_referrer,
            new_referrer_policy,
        }
    }
}

/// Consumer-side adjustments sent along with a follow-redirect.
#[derive(Debug, Clone, Default)]
pub struct FollowRedirectParams {
    pub removed_headers: Vec<HeaderName>,
    pub modified_headers: HeaderMap,
    pub modified_cors_exempt_headers: HeaderMap,
    /// Replaces the redirect target when set.
    pub new_url: Option<Url>,
}

impl RequestDescriptor {
    /// Rewrite this request to follow `info`.
    ///
    /// Returns true when the body was cleared.
    pub fn apply_redirect(&mut self, info: &RedirectInfo, params: &FollowRedirectParams) -> bool {
        let clear_body = self.method != info.new_method;
        if clear_body {
            self.body = None;
            self.headers.remove(CONTENT_TYPE);
            self.headers.remove(CONTENT_LENGTH);
        }

        for name in &params.removed_headers {
            self.headers.remove(name);
            self.cors_exempt_headers.remove(name);
        }
        crate::http::headers::merge_headers(&mut self.headers, &params.modified_headers);
        crate::http::headers::merge_headers(
            &mut self.cors_exempt_headers,
            &params.modified_cors_exempt_headers,
        );

        let new_url = params.new_url.clone().unwrap_or_else(|| info.new_url.clone());
        let old_url = std::mem::replace(&mut self.url, new_url);
        self.redirect_chain.push(old_url);

        self.method = info.new_method.clone();
        self.site_for_cookies = info.new_site_for_cookies.clone();
        self.referrer = info.new_referrer.clone();
        self.referrer_policy = info.new_referrer_policy;

        clear_body
    }
}
