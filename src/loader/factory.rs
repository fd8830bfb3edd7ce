//! Loader factory trait.

use std::sync::Arc;

use crate::http::RequestDescriptor;
use crate::loader::channel::{pair, LoaderEndpoint, LoaderHandle};

/// Anything that can fulfil a request.
///
/// Implementations spawn their work and return immediately; everything the
/// consumer learns afterwards arrives through the endpoint. Must be called
/// from within a Tokio runtime.
pub trait UrlLoaderFactory: Send + Sync + 'static {
    fn create_loader_and_start(&self, request: RequestDescriptor, endpoint: LoaderEndpoint);

    /// Convenience wrapper that creates the channel pair.
    fn start(&self, request: RequestDescriptor) -> LoaderHandle {
        let (handle, endpoint) = pair();
        self.create_loader_and_start(request, endpoint);
        handle
    }
}

pub type SharedLoaderFactory = Arc<dyn UrlLoaderFactory>;
