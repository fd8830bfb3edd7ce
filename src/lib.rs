//! Custom-scheme and streaming request pipeline.

pub mod config;
pub mod error;
pub mod http;
pub mod intercept;
pub mod loader;
pub mod net;
pub mod observability;
pub mod protocol;
pub mod request;
pub mod session;
pub mod transport;
pub mod upload;

pub use config::LoaderConfig;
pub use error::{NetError, NetResult};
pub use protocol::{ProtocolRegistry, ProtocolResponse, ProtocolType, Responder};
pub use request::{ClientRequest, RedirectMode, RequestEvent, RequestOptions};
pub use session::Session;
