//! Local-file transport.
//!
//! Streams a file into a pipe in `read_chunk_bytes` pieces. Responses are
//! always `200 OK`; a missing file or a directory completes with
//! `FileNotFound` and no response head.

use http::header::{HeaderMap, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use http::{Method, StatusCode};
use tokio::io::AsyncReadExt;

use crate::config::LoaderConfig;
use crate::error::NetError;
use crate::http::{RequestDescriptor, ResponseHead};
use crate::loader::{spawn_loader, CompletionStatus, LoaderClient, LoaderEndpoint, UrlLoaderFactory};
use crate::net::pipe;
use crate::observability::{metrics, span::request_span};

/// Factory for `file:` loads.
#[derive(Debug, Clone)]
pub struct FileLoaderFactory {
    read_chunk_bytes: usize,
    pipe_capacity: usize,
}

impl FileLoaderFactory {
    pub fn new(config: &LoaderConfig) -> Self {
        Self {
            read_chunk_bytes: config.file.read_chunk_bytes.max(1),
            pipe_capacity: config.pipe.capacity_bytes,
        }
    }

    /// Start a load whose response carries `extra_headers` in addition to
    /// the content headers.
    pub fn start_with_headers(
        &self,
        request: RequestDescriptor,
        endpoint: LoaderEndpoint,
        extra_headers: HeaderMap,
    ) {
        let (client, _commands) = endpoint.into_parts();
        let span = request_span(request.id, "file", &request.url);
        metrics::record_request_started("file");

        let this = self.clone();
        let task_client = client.clone();
        spawn_loader(&client, span, async move {
            let status = this.load(&request, &task_client, extra_headers).await;
            metrics::record_request_completed("file", status.error);
            if let Some(error) = status.error {
                tracing::info!(%error, "File load failed");
            }
            task_client.on_complete(status);
        });
    }

    async fn load(
        &self,
        request: &RequestDescriptor,
        client: &LoaderClient,
        extra_headers: HeaderMap,
    ) -> CompletionStatus {
        if request.url.scheme() != "file" {
            return CompletionStatus::failed(NetError::InvalidUrl);
        }
        let Ok(path) = request.url.to_file_path() else {
            return CompletionStatus::failed(NetError::InvalidUrl);
        };

        let metadata = match tokio::fs::metadata(&path).await {
            Ok(m) if m.is_file() => m,
            _ => return CompletionStatus::failed(NetError::FileNotFound),
        };
        let mut file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Cannot open file");
                return CompletionStatus::failed(NetError::FileNotFound);
            }
        };

        let mime_type = mime_for_extension(path.extension().and_then(|e| e.to_str()));
        let mut head = ResponseHead::new(StatusCode::OK);
        head.mime_type = mime_type.to_string();
        head.content_length = Some(metadata.len());
        head.headers.extend(extra_headers);
        head.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static(mime_type));
        head.headers.insert(CONTENT_LENGTH, HeaderValue::from(metadata.len()));

        let (mut producer, consumer) = match pipe::create(self.pipe_capacity) {
            Ok(pair) => pair,
            Err(e) => return CompletionStatus::failed(e),
        };
        client.on_receive_response(head, consumer);

        if request.method == Method::HEAD {
            return CompletionStatus::ok(0);
        }

        let mut sent = 0u64;
        let mut buf = vec![0u8; self.read_chunk_bytes];
        loop {
            let n = match file.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "File read failed");
                    return CompletionStatus::failed(NetError::Failed);
                }
            };
            if producer.write(bytes::Bytes::copy_from_slice(&buf[..n])).await.is_err() {
                return CompletionStatus::failed(NetError::Canceled);
            }
            sent += n as u64;
        }

        metrics::record_body_bytes("download", sent);
        CompletionStatus::ok(sent)
    }
}

impl UrlLoaderFactory for FileLoaderFactory {
    fn create_loader_and_start(&self, request: RequestDescriptor, endpoint: LoaderEndpoint) {
        self.start_with_headers(request, endpoint, HeaderMap::new());
    }
}

/// Mime type by file extension; `application/octet-stream` when unknown.
pub fn mime_for_extension(extension: Option<&str>) -> &'static str {
    let Some(ext) = extension else {
        return "application/octet-stream";
    };
    match ext.to_ascii_lowercase().as_str() {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" | "mjs" => "text/javascript",
        "json" => "application/json",
        "txt" | "text" => "text/plain",
        "xml" => "text/xml",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "wasm" => "application/wasm",
        "pdf" => "application/pdf",
        "mp4" => "video/mp4",
        "mp3" => "audio/mpeg",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        _ => "application/octet-stream",
    }
}
