//! Intercepting loader factory.
//!
//! # Responsibilities
//! - Give intercepting handlers first refusal over matching schemes
//! - Forward everything else, and continued requests, to the wrapped target
//! - Exempt allowlisted domains from the outbound connection limit
//! - Tear down once nothing can use it any more
//!
//! # Design Decisions
//! - Every clone is a receiver; the last receiver dropping disconnects the
//!   target, and teardown completes when intercepted requests in flight
//!   (including their redirect hops) have finished
//! - Redirects of intercepted requests are re-dispatched through a clone of
//!   this factory, so interceptors see their own redirect targets

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use url::Url;

use crate::error::NetError;
use crate::http::{RequestDescriptor, RequestPriority};
use crate::loader::{CompletionStatus, LoaderEndpoint, SharedLoaderFactory, UrlLoaderFactory};
use crate::protocol::responder::Dispatch;
use crate::session::Session;

pub struct InterceptingLoaderFactory {
    shared: Arc<Shared>,
}

struct Shared {
    session: Session,
    target: Mutex<Option<SharedLoaderFactory>>,
    receivers: AtomicUsize,
    in_flight: AtomicUsize,
    ignore_limits: Vec<String>,
    torn_down: watch::Sender<bool>,
}

impl InterceptingLoaderFactory {
    pub fn new(session: Session, target: Option<SharedLoaderFactory>) -> Self {
        let ignore_limits = session
            .config()
            .network
            .ignore_connections_limit
            .iter()
            .map(|d| d.trim_start_matches('.').to_ascii_lowercase())
            .collect();
        let (torn_down, _) = watch::channel(false);

        Self {
            shared: Arc::new(Shared {
                session,
                target: Mutex::new(target),
                receivers: AtomicUsize::new(1),
                in_flight: AtomicUsize::new(0),
                ignore_limits,
                torn_down,
            }),
        }
    }

    /// Drop the wrapped target. Later requests that would reach it fail.
    pub fn disconnect_target(&self) {
        self.shared.disconnect_target();
    }

    pub fn is_torn_down(&self) -> bool {
        *self.shared.torn_down.borrow()
    }

    /// Watches teardown without counting as a receiver.
    pub fn observer(&self) -> TeardownObserver {
        TeardownObserver {
            rx: self.shared.torn_down.subscribe(),
        }
    }

    /// Intercepted requests that have not finished.
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::SeqCst)
    }

    fn exempt_from_limits(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();
        self.shared.ignore_limits.iter().any(|domain| {
            host == *domain
                || (host.len() > domain.len()
                    && host.ends_with(domain.as_str())
                    && host.as_bytes()[host.len() - domain.len() - 1] == b'.')
        })
    }
}

impl UrlLoaderFactory for InterceptingLoaderFactory {
    fn create_loader_and_start(&self, mut request: RequestDescriptor, endpoint: LoaderEndpoint) {
        if self.exempt_from_limits(&request.url) {
            request.priority = RequestPriority::MAXIMUM;
            request.flags.ignore_limits = true;
        }

        let target = self.shared.target();
        let entry = if request.flags.bypass_custom_protocol_handlers {
            None
        } else {
            self.shared.session.protocol().intercepted(request.scheme())
        };

        if let Some(entry) = entry {
            tracing::debug!(request_id = %request.id, scheme = %request.scheme(), "Request intercepted");
            let guard = InFlightGuard::new(&self.shared);
            Dispatch {
                session: self.shared.session.clone(),
                entry,
                interceptable: true,
                redirect_target: Some(Arc::new(self.clone())),
                passthrough: target,
            }
            .start(request, endpoint, guard);
            return;
        }

        match target {
            Some(target) => target.create_loader_and_start(request, endpoint),
            None => {
                tracing::debug!(request_id = %request.id, "Intercepting factory has no target");
                endpoint
                    .client()
                    .on_complete(CompletionStatus::failed(NetError::Failed));
            }
        }
    }
}

impl Clone for InterceptingLoaderFactory {
    fn clone(&self) -> Self {
        self.shared.receivers.fetch_add(1, Ordering::SeqCst);
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Drop for InterceptingLoaderFactory {
    fn drop(&mut self) {
        if self.shared.receivers.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.shared.disconnect_target();
        }
    }
}

impl fmt::Debug for InterceptingLoaderFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptingLoaderFactory")
            .field("receivers", &self.shared.receivers.load(Ordering::SeqCst))
            .field("in_flight", &self.in_flight())
            .field("torn_down", &self.is_torn_down())
            .finish()
    }
}

impl Shared {
    fn target(&self) -> Option<SharedLoaderFactory> {
        self.target
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn disconnect_target(&self) {
        let previous = self
            .target
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if previous.is_some() {
            tracing::debug!(partition = %self.session.partition(), "Intercepting factory target disconnected");
        }
        self.maybe_tear_down();
    }

    fn maybe_tear_down(&self) {
        let target_gone = self
            .target
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none();
        if target_gone && self.in_flight.load(Ordering::SeqCst) == 0 && !*self.torn_down.borrow() {
            tracing::debug!(partition = %self.session.partition(), "Intercepting factory torn down");
            self.torn_down.send_replace(true);
        }
    }
}

/// Keeps an intercepted request counted until its load finishes.
struct InFlightGuard {
    shared: Arc<Shared>,
}

impl InFlightGuard {
    fn new(shared: &Arc<Shared>) -> Self {
        shared.in_flight.fetch_add(1, Ordering::SeqCst);
        Self {
            shared: Arc::clone(shared),
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.shared.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.shared.maybe_tear_down();
        }
    }
}

/// Observes an intercepting factory's teardown.
#[derive(Debug, Clone)]
pub struct TeardownObserver {
    rx: watch::Receiver<bool>,
}

impl TeardownObserver {
    pub fn is_torn_down(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the factory has torn down.
    pub async fn torn_down(&mut self) {
        let _ = self.rx.wait_for(|down| *down).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoaderConfig;
    use crate::loader::{pair, LoaderEvent};
    use crate::protocol::{ProtocolType, Responder};
    use std::time::Duration;

    fn session_with_allowlist(domains: &[&str]) -> Session {
        let mut config = LoaderConfig::default();
        config.network.ignore_connections_limit = domains.iter().map(|d| d.to_string()).collect();
        Session::new(config)
    }

    #[test]
    fn allowlist_matches_domain_suffixes() {
        let session = session_with_allowlist(&["example.test"]);
        let factory = InterceptingLoaderFactory::new(session, None);

        let exempt = |u: &str| factory.exempt_from_limits(&Url::parse(u).unwrap());
        assert!(exempt("https://example.test/"));
        assert!(exempt("https://api.EXAMPLE.test/"));
        assert!(!exempt("https://badexample.test/"));
        assert!(!exempt("https://other.test/"));
    }

    #[test]
    fn last_receiver_drop_tears_down() {
        let session = Session::new(LoaderConfig::default());
        let factory = InterceptingLoaderFactory::new(session.clone(), Some(session.router()));
        let clone = factory.clone();
        let observer = factory.observer();

        drop(factory);
        assert!(!observer.is_torn_down());
        assert!(!clone.is_torn_down());

        drop(clone);
        assert!(observer.is_torn_down());
    }

    #[tokio::test]
    async fn disconnected_target_fails_requests() {
        let session = Session::new(LoaderConfig::default());
        let factory = InterceptingLoaderFactory::new(session.clone(), Some(session.router()));
        factory.disconnect_target();
        assert!(factory.is_torn_down());

        let mut handle = factory.start(RequestDescriptor::get(Url::parse("http://a.test/").unwrap()));
        let Some(LoaderEvent::Complete(status)) = handle.next_event().await else {
            panic!("expected completion");
        };
        assert_eq!(status.error, Some(NetError::Failed));
    }

    #[tokio::test]
    async fn teardown_waits_for_in_flight_requests() {
        let session = Session::new(LoaderConfig::default());
        let (release_tx, release_rx) = std::sync::mpsc::channel::<Responder>();
        let release_tx = Mutex::new(release_tx);
        session
            .protocol()
            .intercept_protocol("http", ProtocolType::String, move |_: RequestDescriptor, responder: Responder| {
                let _ = release_tx.lock().unwrap().send(responder);
            })
            .unwrap();

        let factory = session.intercepting_factory();
        let mut observer = factory.observer();
        let (mut handle, endpoint) = pair();
        factory.create_loader_and_start(
            RequestDescriptor::get(Url::parse("http://a.test/").unwrap()),
            endpoint,
        );

        let responder = tokio::task::spawn_blocking(move || release_rx.recv().unwrap())
            .await
            .unwrap();
        drop(factory);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!observer.is_torn_down());

        responder.respond("done").unwrap();
        let Some(LoaderEvent::ReceiveResponse { mut body, .. }) = handle.next_event().await else {
            panic!("expected response");
        };
        assert_eq!(&body.read_to_end().await[..], b"done");
        assert!(matches!(handle.next_event().await, Some(LoaderEvent::Complete(s)) if s.is_ok()));

        tokio::time::timeout(Duration::from_secs(1), observer.torn_down())
            .await
            .unwrap();
    }
}
