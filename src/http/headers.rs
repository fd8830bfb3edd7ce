//! Header validation and parsing helpers.

use base64::engine::general_purpose::STANDARD;
use http::header::{HeaderMap, HeaderName, HeaderValue};

use crate::error::{NetError, NetResult};

/// Validate a caller-supplied header pair.
pub fn parse_header(name: &str, value: &str) -> NetResult<(HeaderName, HeaderValue)> {
    let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
        tracing::debug!(header = name, "Rejected invalid header name");
        NetError::InvalidArgument
    })?;
    let value = HeaderValue::from_str(value).map_err(|_| {
        tracing::debug!(header = %name, "Rejected invalid header value");
        NetError::InvalidArgument
    })?;
    Ok((name, value))
}

/// Split a `Content-Type` value into lowercase mime type and charset.
pub fn parse_content_type(value: &str) -> (String, Option<String>) {
    let mut parts = value.split(';');
    let mime = parts
        .next()
        .map(|m| m.trim().to_ascii_lowercase())
        .unwrap_or_default();

    let charset = parts.find_map(|param| {
        let (key, val) = param.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("charset") {
            return None;
        }
        let val = val.trim().trim_matches('"');
        (!val.is_empty()).then(|| val.to_ascii_lowercase())
    });

    (mime, charset)
}

/// Replace every header named in `overrides`, keeping their duplicates.
pub fn merge_headers(target: &mut HeaderMap, overrides: &HeaderMap) {
    for name in overrides.keys() {
        target.remove(name);
    }
    for (name, value) in overrides.iter() {
        target.append(name.clone(), value.clone());
    }
}

/// `Authorization` value for HTTP Basic credentials.
pub fn basic_credentials(username: &str, password: &str) -> NetResult<HeaderValue> {
    use base64::Engine as _;

    let encoded = STANDARD.encode(format!("{}:{}", username, password));
    HeaderValue::from_str(&format!("Basic {}", encoded)).map_err(|_| NetError::InvalidArgument)
}

/// Auth scheme and realm from a `WWW-Authenticate`/`Proxy-Authenticate` value.
pub fn parse_challenge(value: &str) -> (String, Option<String>) {
    let value = value.trim();
    let (scheme, params) = value.split_once(' ').unwrap_or((value, ""));
    let realm = params.split(',').find_map(|param| {
        let (key, val) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("realm")
            .then(|| val.trim().trim_matches('"').to_string())
    });
    (scheme.to_ascii_lowercase(), realm)
}
