//! Referrer policy.
//!
//! Decides which referrer, if any, accompanies a request after a redirect
//! or a handler override moves it to a new URL.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

/// Standard referrer policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReferrerPolicy {
    NoReferrer,
    NoReferrerWhenDowngrade,
    Origin,
    OriginWhenCrossOrigin,
    SameOrigin,
    StrictOrigin,
    #[default]
    StrictOriginWhenCrossOrigin,
    UnsafeUrl,
}

impl ReferrerPolicy {
    /// Referrer to send from `referrer` to `target` under this policy.
    pub fn referrer_for(&self, referrer: &Url, target: &Url) -> Option<Url> {
        let same_origin = referrer.origin() == target.origin();
        let downgrade = referrer.scheme() == "https" && target.scheme() != "https";

        match self {
            ReferrerPolicy::NoReferrer => None,
            ReferrerPolicy::UnsafeUrl => Some(strip(referrer)),
            ReferrerPolicy::Origin => origin_of(referrer),
            ReferrerPolicy::SameOrigin => same_origin.then(|| strip(referrer)),
            ReferrerPolicy::OriginWhenCrossOrigin => {
                if same_origin {
                    Some(strip(referrer))
                } else {
                    origin_of(referrer)
                }
            }
            ReferrerPolicy::StrictOrigin => {
                if downgrade {
                    None
                } else {
                    origin_of(referrer)
                }
            }
            ReferrerPolicy::NoReferrerWhenDowngrade => (!downgrade).then(|| strip(referrer)),
            ReferrerPolicy::StrictOriginWhenCrossOrigin => {
                if same_origin {
                    Some(strip(referrer))
                } else if downgrade {
                    None
                } else {
                    origin_of(referrer)
                }
            }
        }
    }

    /// Last recognised token of a `Referrer-Policy` header value.
    pub fn from_header(value: &str) -> Option<Self> {
        value.split(',').rev().find_map(|token| token.trim().parse().ok())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReferrerPolicy::NoReferrer => "no-referrer",
            ReferrerPolicy::NoReferrerWhenDowngrade => "no-referrer-when-downgrade",
            ReferrerPolicy::Origin => "origin",
            ReferrerPolicy::OriginWhenCrossOrigin => "origin-when-cross-origin",
            ReferrerPolicy::SameOrigin => "same-origin",
            ReferrerPolicy::StrictOrigin => "strict-origin",
            ReferrerPolicy::StrictOriginWhenCrossOrigin => "strict-origin-when-cross-origin",
            ReferrerPolicy::UnsafeUrl => "unsafe-url",
        }
    }
}

impl FromStr for ReferrerPolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "no-referrer" => Ok(ReferrerPolicy::NoReferrer),
            "no-referrer-when-downgrade" => Ok(ReferrerPolicy::NoReferrerWhenDowngrade),
            "origin" => Ok(ReferrerPolicy::Origin),
            "origin-when-cross-origin" => Ok(ReferrerPolicy::OriginWhenCrossOrigin),
            "same-origin" => Ok(ReferrerPolicy::SameOrigin),
            "strict-origin" => Ok(ReferrerPolicy::StrictOrigin),
            "strict-origin-when-cross-origin" => Ok(ReferrerPolicy::StrictOriginWhenCrossOrigin),
            "unsafe-url" => Ok(ReferrerPolicy::UnsafeUrl),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for ReferrerPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn strip(url: &Url) -> Url {
    let mut url = url.clone();
    url.set_fragment(None);
    let _ = url.set_username("");
    let _ = url.set_password(None);
    url
}

fn origin_of(url: &Url) -> Option<Url> {
    let origin = url.origin();
    if !origin.is_tuple() {
        return None;
    }
    Url::parse(&format!("{}/", origin.ascii_serialization())).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn default_policy_trims_cross_origin_to_origin() {
        let policy = ReferrerPolicy::default();
        let from = url("https://a.test/page?q=1#frag");

        assert_eq!(
            policy.referrer_for(&from, &url("https://a.test/other")),
            Some(url("https://a.test/page?q=1"))
        );
        assert_eq!(
            policy.referrer_for(&from, &url("https://b.test/")),
            Some(url("https://a.test/"))
        );
        assert_eq!(policy.referrer_for(&from, &url("http://b.test/")), None);
    }

    #[test]
    fn no_referrer_never_sends() {
        let from = url("https://a.test/");
        assert_eq!(ReferrerPolicy::NoReferrer.referrer_for(&from, &from), None);
    }

    #[test]
    fn header_uses_last_known_token() {
        assert_eq!(
            ReferrerPolicy::from_header("no-referrer, bogus, origin"),
            Some(ReferrerPolicy::Origin)
        );
        assert_eq!(ReferrerPolicy::from_header("bogus"), None);
    }

    #[test]
    fn serde_names_match_tokens() {
        let policy: ReferrerPolicy = serde_json::from_str("\"same-origin\"").unwrap();
        assert_eq!(policy, ReferrerPolicy::SameOrigin);
        assert_eq!(policy.to_string(), "same-origin");
    }
}
