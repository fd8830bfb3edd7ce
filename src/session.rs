//! Session: one browsing context's loaders and handler table.
//!
//! # Responsibilities
//! - Own the protocol registry, transport factories and blob store
//! - Hand out intercepting factories and client requests bound to them
//!
//! # Design Decisions
//! - Cheap to clone; every clone shares the same registry and transports
//! - An ephemeral session is a throwaway partition with its own network
//!   transport (own connection pool and cookie jar)

use std::fmt;
use std::sync::Arc;

use hyper_util::client::legacy::connect::Connect;
use uuid::Uuid;

use crate::config::LoaderConfig;
use crate::intercept::InterceptingLoaderFactory;
use crate::loader::SharedLoaderFactory;
use crate::protocol::ProtocolRegistry;
use crate::request::{ClientRequest, RequestError, RequestOptions};
use crate::transport::{FileLoaderFactory, NetworkLoaderFactory, TransportRouter};
use crate::upload::BlobStore;

const DEFAULT_PARTITION: &str = "default";

#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    partition: String,
    config: LoaderConfig,
    protocol: ProtocolRegistry,
    network: SharedLoaderFactory,
    file: Arc<FileLoaderFactory>,
    router: SharedLoaderFactory,
    blobs: BlobStore,
}

impl Session {
    /// Session on the default partition with a plain-HTTP network transport.
    pub fn new(config: LoaderConfig) -> Self {
        let blobs = BlobStore::new();
        let network = Arc::new(NetworkLoaderFactory::new(&config, blobs.clone()));
        Self::build(DEFAULT_PARTITION.to_string(), config, network, blobs)
    }

    /// Fresh in-memory partition, e.g. for `session: null` proxy results.
    pub fn ephemeral(config: LoaderConfig) -> Self {
        let blobs = BlobStore::new();
        let network = Arc::new(NetworkLoaderFactory::new(&config, blobs.clone()));
        let partition = format!("ephemeral-{}", Uuid::new_v4());
        tracing::debug!(partition = %partition, "Created ephemeral session");
        Self::build(partition, config, network, blobs)
    }

    /// Session whose network transport connects through `connector`, e.g. a
    /// TLS-capable connector for `https`.
    pub fn with_connector<C>(config: LoaderConfig, connector: C) -> Self
    where
        C: Connect + Clone + Send + Sync + 'static,
    {
        let blobs = BlobStore::new();
        let network = Arc::new(NetworkLoaderFactory::with_connector(
            connector,
            &config,
            blobs.clone(),
        ));
        Self::build(DEFAULT_PARTITION.to_string(), config, network, blobs)
    }

    /// Session with a caller-supplied network transport.
    pub fn with_network(config: LoaderConfig, network: SharedLoaderFactory) -> Self {
        Self::build(DEFAULT_PARTITION.to_string(), config, network, BlobStore::new())
    }

    fn build(
        partition: String,
        config: LoaderConfig,
        network: SharedLoaderFactory,
        blobs: BlobStore,
    ) -> Self {
        let file = Arc::new(FileLoaderFactory::new(&config));
        let router: SharedLoaderFactory = Arc::new(TransportRouter::new(
            Arc::clone(&network),
            Arc::clone(&file) as SharedLoaderFactory,
        ));
        Self {
            inner: Arc::new(SessionInner {
                partition,
                config,
                protocol: ProtocolRegistry::new(),
                network,
                file,
                router,
                blobs,
            }),
        }
    }

    pub fn partition(&self) -> &str {
        &self.inner.partition
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.inner.config
    }

    /// Scheme handler table.
    pub fn protocol(&self) -> &ProtocolRegistry {
        &self.inner.protocol
    }

    pub fn network(&self) -> SharedLoaderFactory {
        Arc::clone(&self.inner.network)
    }

    pub fn file(&self) -> &FileLoaderFactory {
        &self.inner.file
    }

    /// `file:` to the file transport, everything else to the network.
    pub fn router(&self) -> SharedLoaderFactory {
        Arc::clone(&self.inner.router)
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.inner.blobs
    }

    /// Factory giving this session's interceptors first refusal before the
    /// router.
    pub fn intercepting_factory(&self) -> InterceptingLoaderFactory {
        InterceptingLoaderFactory::new(self.clone(), Some(self.router()))
    }

    /// Prepare an outbound request. Nothing is sent until `write` or `end`.
    pub fn request(&self, options: RequestOptions) -> Result<ClientRequest, RequestError> {
        ClientRequest::new(self.clone(), options)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("partition", &self.inner.partition)
            .finish()
    }
}
