//! Response descriptor builder.
//!
//! # Responsibilities
//! - Turn a handler outcome into a response head and a classification
//! - Reconcile `content-type` headers with the `mimeType`/`charset` fields
//! - Detect handler-level redirects before looking at the protocol type
//!
//! # Data Flow
//! ```text
//! HandlerOutcome
//!     Continue                    → Passthrough
//!     Respond(Object{error})      → Err(code)
//!     Respond(Object) + redirect  → Redirect(RedirectInfo)
//!     Respond(..) by ProtocolType → Buffer | String | File | ProxiedHttp | Stream
//! ```
//!
//! # Design Decisions
//! - Only `String`, `File` and `Free` accept bare text, and only the
//!   matching type or `Free` accepts bare bytes or a bare stream; anything
//!   else is a contract violation (`NotImplemented`)
//! - A result of the right shape but missing its payload is `Failed`

use std::fmt;
use std::path::PathBuf;

use bytes::Bytes;
use http::header::{HeaderMap, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use http::{Method, StatusCode};
use url::Url;

use crate::error::{NetError, NetResult};
use crate::http::headers::{parse_content_type, parse_header};
use crate::http::{RedirectInfo, RequestDescriptor, ResponseHead};
use crate::protocol::handler::{
    HandlerOutcome, HandlerResult, ProtocolResponse, ProtocolType, ResponseData, SessionChoice,
    UploadOverride,
};
use crate::protocol::stream::PullSource;

/// Head plus classification of a handler's answer.
#[derive(Debug)]
pub struct ResponseDescriptor {
    pub head: ResponseHead,
    pub kind: ResponseKind,
}

pub enum ResponseKind {
    Buffer(Bytes),
    String(Bytes),
    File {
        path: PathBuf,
        method: Option<Method>,
        referrer: Option<Url>,
    },
    ProxiedHttp(ProxyTarget),
    /// `None` is an empty body.
    Stream(Option<Box<dyn PullSource>>),
    Redirect(RedirectInfo),
    Passthrough,
}

impl ResponseKind {
    pub fn name(&self) -> &'static str {
        match self {
            ResponseKind::Buffer(_) => "buffer",
            ResponseKind::String(_) => "string",
            ResponseKind::File { .. } => "file",
            ResponseKind::ProxiedHttp(_) => "http",
            ResponseKind::Stream(_) => "stream",
            ResponseKind::Redirect(_) => "redirect",
            ResponseKind::Passthrough => "passthrough",
        }
    }
}

impl fmt::Debug for ResponseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseKind::Buffer(b) | ResponseKind::String(b) => {
                write!(f, "{}({} bytes)", self.name(), b.len())
            }
            ResponseKind::File { path, .. } => write!(f, "file({})", path.display()),
            ResponseKind::ProxiedHttp(target) => write!(f, "http({})", target.url),
            ResponseKind::Redirect(info) => write!(f, "redirect({})", info.new_url),
            _ => f.write_str(self.name()),
        }
    }
}

/// Where and how a `ProxiedHttp` result reissues the request.
#[derive(Debug, Clone)]
pub struct ProxyTarget {
    pub url: Url,
    pub method: Option<Method>,
    pub referrer: Option<Url>,
    /// Merged over the original request headers.
    pub headers: HeaderMap,
    pub session: SessionChoice,
    pub upload_data: Option<UploadOverride>,
}

/// Classify a handler outcome. `None` means the handler never answered.
pub fn build_response(
    ptype: ProtocolType,
    outcome: Option<HandlerOutcome>,
    request: &RequestDescriptor,
) -> NetResult<ResponseDescriptor> {
    let result = match outcome {
        None => return Err(NetError::NotImplemented),
        Some(HandlerOutcome::Continue) => {
            return Ok(ResponseDescriptor {
                head: ResponseHead::default(),
                kind: ResponseKind::Passthrough,
            })
        }
        Some(HandlerOutcome::Respond(result)) => result,
    };

    let head = ResponseHead::default();
    let kind = match result {
        HandlerResult::Object(response) => return build_object(ptype, response, request),
        HandlerResult::Text(text) if ptype.accepts_bare_text() => match ptype {
            ProtocolType::File => ResponseKind::File {
                path: PathBuf::from(text),
                method: None,
                referrer: None,
            },
            _ => ResponseKind::String(Bytes::from(text)),
        },
        HandlerResult::Bytes(bytes)
            if matches!(ptype, ProtocolType::Buffer | ProtocolType::Free) =>
        {
            ResponseKind::Buffer(bytes)
        }
        HandlerResult::Stream(source)
            if matches!(ptype, ProtocolType::Stream | ProtocolType::Free) =>
        {
            ResponseKind::Stream(Some(source))
        }
        other => {
            tracing::debug!(
                protocol_type = ptype.as_str(),
                answer = other.kind(),
                "Bare answer does not fit the protocol type"
            );
            return Err(NetError::NotImplemented);
        }
    };
    Ok(ResponseDescriptor { head, kind })
}

fn build_object(
    ptype: ProtocolType,
    response: ProtocolResponse,
    request: &RequestDescriptor,
) -> NetResult<ResponseDescriptor> {
    if let Some(code) = response.error {
        return Err(NetError::from_code(code));
    }

    let head = build_head(&response)?;
    if let Some(target) = head.redirect_target(&request.url) {
        let info = RedirectInfo::compute(request, &head, target);
        return Ok(ResponseDescriptor {
            head,
            kind: ResponseKind::Redirect(info),
        });
    }

    let ProtocolResponse {
        data,
        path,
        url,
        method,
        referrer,
        session,
        upload_data,
        headers,
        ..
    } = response;

    let method = method
        .map(|m| Method::from_bytes(m.as_bytes()).map_err(|_| NetError::InvalidArgument))
        .transpose()?;
    let referrer = referrer.and_then(|r| Url::parse(&r).ok());
    let file = |path: PathBuf| ResponseKind::File {
        path,
        method: method.clone(),
        referrer: referrer.clone(),
    };

    let kind = match ptype {
        ProtocolType::Buffer => match data {
            ResponseData::Bytes(bytes) => ResponseKind::Buffer(bytes),
            _ => return Err(NetError::Failed),
        },
        ProtocolType::String => match data {
            ResponseData::Text(text) => ResponseKind::String(Bytes::from(text)),
            ResponseData::Bytes(bytes) => ResponseKind::String(bytes),
            _ => return Err(NetError::Failed),
        },
        ProtocolType::File => file(path.ok_or(NetError::Failed)?),
        ProtocolType::Http => {
            let url = url.as_deref().ok_or(NetError::InvalidUrl)?;
            ResponseKind::ProxiedHttp(ProxyTarget {
                url: Url::parse(url).map_err(|_| NetError::InvalidUrl)?,
                method: method.clone(),
                referrer: referrer.clone(),
                headers: header_map(&headers)?,
                session,
                upload_data,
            })
        }
        ProtocolType::Stream => match data {
            ResponseData::Stream(source) => ResponseKind::Stream(Some(source)),
            ResponseData::Null => ResponseKind::Stream(None),
            _ => return Err(NetError::Failed),
        },
        ProtocolType::Free => match data {
            ResponseData::Bytes(bytes) => ResponseKind::Buffer(bytes),
            ResponseData::Text(text) => ResponseKind::String(Bytes::from(text)),
            ResponseData::Stream(source) => ResponseKind::Stream(Some(source)),
            ResponseData::Null => match (url, path) {
                (Some(url), _) => ResponseKind::ProxiedHttp(ProxyTarget {
                    url: Url::parse(&url).map_err(|_| NetError::InvalidUrl)?,
                    method: method.clone(),
                    referrer: referrer.clone(),
                    headers: header_map(&headers)?,
                    session,
                    upload_data,
                }),
                (None, Some(path)) => file(path),
                (None, None) => return Err(NetError::Failed),
            },
        },
    };

    Ok(ResponseDescriptor { head, kind })
}

/// Response head from a structured result.
///
/// A `content-type` header wins over `mimeType`; charset comes from the
/// header, then the `charset` field, then a charset on `mimeType`, then
/// `utf-8`.
pub fn build_head(response: &ProtocolResponse) -> NetResult<ResponseHead> {
    let status = match response.status_code {
        Some(code) => StatusCode::from_u16(code).map_err(|_| NetError::InvalidArgument)?,
        None => StatusCode::OK,
    };
    let mut head = ResponseHead::new(status);

    let mut header_content_type = None;
    for (name, value) in &response.headers {
        let (name, value) = parse_header(name, value)?;
        if name == CONTENT_TYPE {
            if header_content_type.is_some() {
                continue;
            }
            header_content_type = Some(parse_content_type(value.to_str().unwrap_or_default()));
        } else if name == CONTENT_LENGTH {
            head.content_length = value.to_str().ok().and_then(|v| v.trim().parse().ok());
        }
        head.headers.append(name, value);
    }

    let (field_mime, field_charset) = match response.mime_type.as_deref() {
        Some(mime) => {
            let (mime, charset) = parse_content_type(mime);
            ((!mime.is_empty()).then_some(mime), charset)
        }
        None => (None, None),
    };
    let charset_field = response.charset.as_ref().map(|c| c.to_ascii_lowercase());

    let (mime_type, header_charset) = match header_content_type {
        Some((mime, charset)) => (Some(mime), charset),
        None => {
            if let Some(mime) = &response.mime_type {
                let value = HeaderValue::from_str(mime).map_err(|_| NetError::InvalidArgument)?;
                head.headers.insert(CONTENT_TYPE, value);
            }
            (field_mime, None)
        }
    };

    if let Some(mime) = mime_type.filter(|m| !m.is_empty()) {
        head.mime_type = mime;
    }
    head.charset = header_charset
        .or(charset_field)
        .or(field_charset)
        .unwrap_or_else(|| "utf-8".to_string());

    Ok(head)
}

fn header_map(headers: &[(String, String)]) -> NetResult<HeaderMap> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let (name, value) = parse_header(name, value)?;
        map.append(name, value);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::LOCATION;

    fn request() -> RequestDescriptor {
        RequestDescriptor::get(Url::parse("myproto://host/page").unwrap())
    }

    fn respond(result: impl Into<HandlerResult>) -> Option<HandlerOutcome> {
        Some(HandlerOutcome::Respond(result.into()))
    }

    #[test]
    fn missing_answer_is_not_implemented() {
        let err = build_response(ProtocolType::String, None, &request()).unwrap_err();
        assert_eq!(err, NetError::NotImplemented);
    }

    #[test]
    fn error_field_short_circuits() {
        let result = ProtocolResponse::error(NetError::FileNotFound).text("ignored");
        let err = build_response(ProtocolType::String, respond(result), &request()).unwrap_err();
        assert_eq!(err, NetError::FileNotFound);
    }

    #[test]
    fn string_with_mime_type() {
        let result = ProtocolResponse::new().text("hello").mime_type("text/plain");
        let rd = build_response(ProtocolType::String, respond(result), &request()).unwrap();

        assert_eq!(rd.head.status, StatusCode::OK);
        assert_eq!(rd.head.mime_type, "text/plain");
        assert_eq!(rd.head.charset, "utf-8");
        assert_eq!(rd.head.headers[CONTENT_TYPE], "text/plain");
        assert!(matches!(rd.kind, ResponseKind::String(ref b) if &b[..] == b"hello"));
    }

    #[test]
    fn content_type_header_wins_over_mime_type() {
        let result = ProtocolResponse::new()
            .text("x")
            .mime_type("text/plain; charset=latin1")
            .header("Content-Type", "application/json")
            .header("content-type", "text/css");
        let rd = build_response(ProtocolType::String, respond(result), &request()).unwrap();

        assert_eq!(rd.head.mime_type, "application/json");
        assert_eq!(rd.head.charset, "latin1");
        let values: Vec<_> = rd.head.headers.get_all(CONTENT_TYPE).iter().collect();
        assert_eq!(values, vec!["application/json"]);
    }

    #[test]
    fn charset_field_beats_mime_type_parameter() {
        let result = ProtocolResponse::new()
            .text("x")
            .mime_type("text/plain; charset=latin1")
            .charset("UTF-16");
        let rd = build_response(ProtocolType::String, respond(result), &request()).unwrap();
        assert_eq!(rd.head.charset, "utf-16");
    }

    #[test]
    fn location_header_makes_a_redirect() {
        let result = ProtocolResponse::new()
            .status(302)
            .header("location", "https://example.test/next");
        let rd = build_response(ProtocolType::Buffer, respond(result), &request()).unwrap();

        let ResponseKind::Redirect(info) = rd.kind else {
            panic!("expected redirect, got {:?}", rd.kind);
        };
        assert_eq!(info.new_url.as_str(), "https://example.test/next");
        assert_eq!(info.new_method, Method::GET);
        assert_eq!(rd.head.headers[LOCATION], "https://example.test/next");
    }

    #[test]
    fn relative_location_resolves_against_request() {
        let result = ProtocolResponse::new().status(307).header("location", "/other");
        let rd = build_response(ProtocolType::String, respond(result), &request()).unwrap();
        let ResponseKind::Redirect(info) = rd.kind else {
            panic!("expected redirect");
        };
        assert_eq!(info.new_url.as_str(), "myproto://host/other");
    }

    #[test]
    fn bare_text_only_for_permissive_types() {
        for ptype in [ProtocolType::Buffer, ProtocolType::Http, ProtocolType::Stream] {
            let err = build_response(ptype, respond("x"), &request()).unwrap_err();
            assert_eq!(err, NetError::NotImplemented);
        }

        let err = build_response(ProtocolType::Http, respond(Bytes::from_static(b"x")), &request())
            .unwrap_err();
        assert_eq!(err, NetError::NotImplemented);

        let rd = build_response(ProtocolType::File, respond("/tmp/a.txt"), &request()).unwrap();
        assert!(matches!(rd.kind, ResponseKind::File { ref path, .. } if path == &PathBuf::from("/tmp/a.txt")));
    }

    #[test]
    fn missing_payloads_fail() {
        let cases = [
            (ProtocolType::Buffer, ProtocolResponse::new().text("not bytes"), NetError::Failed),
            (ProtocolType::String, ProtocolResponse::new(), NetError::Failed),
            (ProtocolType::File, ProtocolResponse::new(), NetError::Failed),
            (ProtocolType::Http, ProtocolResponse::new(), NetError::InvalidUrl),
            (ProtocolType::Http, ProtocolResponse::new().url("not a url"), NetError::InvalidUrl),
            (ProtocolType::Free, ProtocolResponse::new(), NetError::Failed),
        ];
        for (ptype, result, expected) in cases {
            let err = build_response(ptype, respond(result), &request()).unwrap_err();
            assert_eq!(err, expected, "{:?}", ptype);
        }
    }

    #[test]
    fn bad_header_is_invalid_argument() {
        let result = ProtocolResponse::new().text("x").header("bad header", "v");
        let err = build_response(ProtocolType::String, respond(result), &request()).unwrap_err();
        assert_eq!(err, NetError::InvalidArgument);

        let result = ProtocolResponse::new().text("x").status(42);
        let err = build_response(ProtocolType::String, respond(result), &request()).unwrap_err();
        assert_eq!(err, NetError::InvalidArgument);
    }

    #[test]
    fn free_type_infers_kind() {
        let rd = build_response(ProtocolType::Free, respond(Bytes::from_static(b"b")), &request()).unwrap();
        assert_eq!(rd.kind.name(), "buffer");

        let rd = build_response(ProtocolType::Free, respond("s"), &request()).unwrap();
        assert_eq!(rd.kind.name(), "string");

        let result = ProtocolResponse::new().url("https://example.test/").method("POST");
        let rd = build_response(ProtocolType::Free, respond(result), &request()).unwrap();
        let ResponseKind::ProxiedHttp(target) = rd.kind else {
            panic!("expected proxied http");
        };
        assert_eq!(target.method, Some(Method::POST));

        let result = ProtocolResponse::new().path("/srv/index.html");
        let rd = build_response(ProtocolType::Free, respond(result), &request()).unwrap();
        assert_eq!(rd.kind.name(), "file");
    }

    #[test]
    fn stream_with_null_data_is_empty_body() {
        let rd = build_response(ProtocolType::Stream, respond(ProtocolResponse::new()), &request()).unwrap();
        assert!(matches!(rd.kind, ResponseKind::Stream(None)));
    }

    #[test]
    fn continue_is_passthrough() {
        let rd = build_response(ProtocolType::Free, Some(HandlerOutcome::Continue), &request()).unwrap();
        assert_eq!(rd.kind.name(), "passthrough");
    }
}
