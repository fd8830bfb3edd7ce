//! Caller-facing request options.

use std::collections::BTreeMap;

use http::header::{HeaderValue, ORIGIN};
use http::Method;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::NetError;
use crate::http::{ReferrerPolicy, RequestDescriptor, RequestPriority};
use crate::request::events::RequestError;

/// What to do when the server redirects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedirectMode {
    /// Report the redirect, then follow it.
    #[default]
    Follow,
    /// Fail the request.
    Error,
    /// Report the redirect and wait for `follow_redirect()` or `abort()`.
    Manual,
}

/// Options for `Session::request`, in camelCase when deserialized.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestOptions {
    /// Defaults to `GET`.
    pub method: Option<String>,
    pub url: String,
    pub referrer: Option<String>,
    pub referrer_policy: Option<ReferrerPolicy>,
    pub origin: Option<String>,
    pub has_user_activation: bool,
    pub extra_headers: BTreeMap<String, String>,
    pub use_session_cookies: bool,
    pub bypass_custom_protocol_handlers: bool,
    pub redirect: RedirectMode,
    pub priority: RequestPriority,
    pub is_navigation: bool,
}

impl RequestOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.insert(name.into(), value.into());
        self
    }

    pub fn redirect(mut self, mode: RedirectMode) -> Self {
        self.redirect = mode;
        self
    }

    /// Validate the options into a descriptor. No body is attached.
    pub fn to_descriptor(&self) -> Result<RequestDescriptor, RequestError> {
        let url = Url::parse(&self.url).map_err(|_| NetError::InvalidArgument)?;
        let method = match &self.method {
            Some(m) => Method::from_bytes(m.to_ascii_uppercase().as_bytes())
                .map_err(|_| NetError::InvalidArgument)?,
            None => Method::GET,
        };

        let mut request = RequestDescriptor::new(method, url);
        for (name, value) in &self.extra_headers {
            request.append_header(name, value)?;
        }
        if let Some(origin) = &self.origin {
            let value = HeaderValue::from_str(origin).map_err(|_| NetError::InvalidArgument)?;
            request.headers.insert(ORIGIN, value);
        }
        if let Some(referrer) = &self.referrer {
            request.referrer = Some(Url::parse(referrer).map_err(|_| NetError::InvalidArgument)?);
        }
        if let Some(policy) = self.referrer_policy {
            request.referrer_policy = policy;
        }

        request.flags.use_session_cookies = self.use_session_cookies;
        request.flags.bypass_custom_protocol_handlers = self.bypass_custom_protocol_handlers;
        request.flags.has_user_activation = self.has_user_activation;
        request.priority = self.priority;
        request.is_navigation = self.is_navigation;
        if request.is_navigation {
            request.site_for_cookies = Some(request.url.clone());
        }
        Ok(request)
    }
}
