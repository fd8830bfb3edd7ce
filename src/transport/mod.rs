//! Concrete transports.
//!
//! # Data Flow
//! ```text
//! RequestDescriptor
//!     → TransportRouter (wrapped target of the intercepting factory)
//!         file:            → file.rs (tokio::fs → pipe)
//!         everything else  → network.rs (hyper-util client → pipe)
//! ```
//!
//! # Design Decisions
//! - The network transport never follows redirects on its own; it reports
//!   them and waits, so the consumer can decide to follow or restart
//! - Cookies are kept per session and only used when a request opts in

pub mod cookies;
pub mod file;
pub mod network;

use url::Url;

use crate::http::RequestDescriptor;
use crate::loader::{LoaderEndpoint, SharedLoaderFactory, UrlLoaderFactory};

pub use cookies::CookieJar;
pub use file::FileLoaderFactory;
pub use network::NetworkLoaderFactory;

/// Schemes served by the network transport.
pub fn is_network_scheme(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https")
}

/// Routes `file:` to the file transport and everything else to the network.
pub struct TransportRouter {
    network: SharedLoaderFactory,
    file: SharedLoaderFactory,
}

impl TransportRouter {
    pub fn new(network: SharedLoaderFactory, file: SharedLoaderFactory) -> Self {
        Self { network, file }
    }
}

impl UrlLoaderFactory for TransportRouter {
    fn create_loader_and_start(&self, request: RequestDescriptor, endpoint: LoaderEndpoint) {
        if request.url.scheme() == "file" {
            self.file.create_loader_and_start(request, endpoint);
        } else {
            self.network.create_loader_and_start(request, endpoint);
        }
    }
}
