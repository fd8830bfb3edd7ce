//! Transport-neutral loader contract.
//!
//! # Data Flow
//! ```text
//! consumer (controller / redirected request)      transport (network, file, protocol)
//!   LoaderHandle ◀──── LoaderEvent ───────────────── LoaderClient
//!   LoaderHandle ───── LoaderCommand ─────────────▶ CommandReceiver
//!                      (FollowRedirect, SetPriority)
//! ```
//!
//! # Design Decisions
//! - A factory call hands the transport a `LoaderEndpoint`; the consumer
//!   keeps the matching `LoaderHandle`
//! - Dropping the handle is the cancel signal: transports run under
//!   `spawn_loader`, which aborts them once the client side disconnects
//! - An endpoint can be split and rejoined so a redirect can hand the same
//!   connection to a different factory

pub mod channel;
pub mod events;
pub mod factory;

pub use channel::{pair, spawn_loader, CommandReceiver, LoaderClient, LoaderEndpoint, LoaderHandle};
pub use events::{
    AuthChallenge, AuthCredentials, AuthResponder, CompletionStatus, LoaderCommand, LoaderEvent,
};
pub use factory::{SharedLoaderFactory, UrlLoaderFactory};
