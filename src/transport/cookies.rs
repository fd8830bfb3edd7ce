//! Minimal per-session cookie jar.
//!
//! Stores `name=value` pairs per host from `Set-Cookie` and replays them on
//! later requests to the same host. Attributes other than `Max-Age=0` are
//! ignored.

use std::sync::Arc;

use dashmap::DashMap;
use http::header::{HeaderMap, HeaderValue, SET_COOKIE};
use url::Url;

#[derive(Debug, Clone, Default)]
pub struct CookieJar {
    hosts: Arc<DashMap<String, Vec<(String, String)>>>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record every `Set-Cookie` in `headers` for `url`'s host.
    pub fn store(&self, url: &Url, headers: &HeaderMap) {
        let Some(host) = url.host_str() else {
            return;
        };

        for value in headers.get_all(SET_COOKIE) {
            let Ok(value) = value.to_str() else {
                continue;
            };
            let mut parts = value.split(';');
            let Some((name, val)) = parts.next().and_then(|pair| pair.split_once('=')) else {
                continue;
            };
            let (name, val) = (name.trim().to_string(), val.trim().to_string());
            if name.is_empty() {
                continue;
            }
            let expired = parts.any(|attr| attr.trim().eq_ignore_ascii_case("max-age=0"));

            let mut cookies = self.hosts.entry(host.to_string()).or_default();
            cookies.retain(|(existing, _)| *existing != name);
            if !expired {
                cookies.push((name, val));
            }
        }
    }

    /// `Cookie` header for `url`, if any cookies are stored for its host.
    pub fn header_for(&self, url: &Url) -> Option<HeaderValue> {
        let cookies = self.hosts.get(url.host_str()?)?;
        if cookies.is_empty() {
            return None;
        }
        let joined = cookies
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join("; ");
        HeaderValue::from_str(&joined).ok()
    }

    pub fn clear(&self) {
        self.hosts.clear();
    }
}
