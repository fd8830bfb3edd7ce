//! Per-session scheme handler table.
//!
//! Registered handlers serve schemes nothing else serves; interceptors get
//! first refusal over schemes that would otherwise reach a transport.

use std::fmt;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;

use crate::protocol::handler::{ProtocolHandler, ProtocolType, SharedHandler};

/// Schemes served without any registration.
const BUILTIN_SCHEMES: &[&str] = &["about", "file", "http", "https", "data", "filesystem", "ws", "wss"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("The scheme has been registered")]
    AlreadyRegistered,

    #[error("The scheme has not been registered")]
    NotRegistered,

    #[error("The scheme has been intercepted")]
    AlreadyIntercepted,

    #[error("The scheme has not been intercepted")]
    NotIntercepted,

    #[error("The request has already been handled")]
    AlreadyHandled,

    #[error("Only intercepted requests can continue")]
    ContinueNotAllowed,

    #[error("Invalid scheme: {0}")]
    InvalidScheme(String),

    #[error("Unknown protocol type: {0}")]
    UnknownType(String),

    #[error("Invalid handler response: {0}")]
    InvalidResponse(String),
}

/// A handler together with how its results are read.
#[derive(Clone)]
pub struct HandlerEntry {
    pub ptype: ProtocolType,
    pub handler: SharedHandler,
}

impl fmt::Debug for HandlerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerEntry").field("ptype", &self.ptype).finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProtocolRegistry {
    handlers: Arc<DashMap<String, HandlerEntry>>,
    interceptors: Arc<DashMap<String, HandlerEntry>>,
}

impl ProtocolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_protocol(
        &self,
        scheme: &str,
        ptype: ProtocolType,
        handler: impl ProtocolHandler,
    ) -> Result<(), ProtocolError> {
        let scheme = normalize_scheme(scheme)?;
        match self.handlers.entry(scheme) {
            Entry::Occupied(_) => Err(ProtocolError::AlreadyRegistered),
            Entry::Vacant(slot) => {
                tracing::info!(scheme = %slot.key(), ptype = %ptype, "Protocol registered");
                slot.insert(HandlerEntry {
                    ptype,
                    handler: Arc::new(handler),
                });
                Ok(())
            }
        }
    }

    pub fn unregister_protocol(&self, scheme: &str) -> Result<(), ProtocolError> {
        let scheme = normalize_scheme(scheme)?;
        self.handlers
            .remove(&scheme)
            .map(|_| tracing::info!(scheme = %scheme, "Protocol unregistered"))
            .ok_or(ProtocolError::NotRegistered)
    }

    pub fn is_protocol_registered(&self, scheme: &str) -> bool {
        self.handlers.contains_key(&scheme.to_ascii_lowercase())
    }

    pub fn intercept_protocol(
        &self,
        scheme: &str,
        ptype: ProtocolType,
        handler: impl ProtocolHandler,
    ) -> Result<(), ProtocolError> {
        let scheme = normalize_scheme(scheme)?;
        match self.interceptors.entry(scheme) {
            Entry::Occupied(_) => Err(ProtocolError::AlreadyIntercepted),
            Entry::Vacant(slot) => {
                tracing::info!(scheme = %slot.key(), ptype = %ptype, "Protocol intercepted");
                slot.insert(HandlerEntry {
                    ptype,
                    handler: Arc::new(handler),
                });
                Ok(())
            }
        }
    }

    pub fn unintercept_protocol(&self, scheme: &str) -> Result<(), ProtocolError> {
        let scheme = normalize_scheme(scheme)?;
        self.interceptors
            .remove(&scheme)
            .map(|_| tracing::info!(scheme = %scheme, "Protocol interception removed"))
            .ok_or(ProtocolError::NotIntercepted)
    }

    pub fn is_protocol_intercepted(&self, scheme: &str) -> bool {
        self.interceptors.contains_key(&scheme.to_ascii_lowercase())
    }

    /// Built in, or registered on this session.
    pub fn is_protocol_handled(&self, scheme: &str) -> bool {
        let scheme = scheme.to_ascii_lowercase();
        BUILTIN_SCHEMES.contains(&scheme.as_str()) || self.handlers.contains_key(&scheme)
    }

    pub fn registered(&self, scheme: &str) -> Option<HandlerEntry> {
        self.handlers
            .get(&scheme.to_ascii_lowercase())
            .map(|entry| entry.value().clone())
    }

    pub fn intercepted(&self, scheme: &str) -> Option<HandlerEntry> {
        self.interceptors
            .get(&scheme.to_ascii_lowercase())
            .map(|entry| entry.value().clone())
    }
}

/// Lowercase `scheme` and check it is `ALPHA *( ALPHA / DIGIT / "+" / "-" / "." )`.
fn normalize_scheme(scheme: &str) -> Result<String, ProtocolError> {
    let mut chars = scheme.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    if !valid {
        return Err(ProtocolError::InvalidScheme(scheme.to_string()));
    }
    Ok(scheme.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::RequestDescriptor;
    use crate::protocol::handler::Responder;

    fn noop(_request: RequestDescriptor, _responder: Responder) {}

    #[test]
    fn register_twice_fails() {
        let registry = ProtocolRegistry::new();
        registry.register_protocol("MyProto", ProtocolType::String, noop).unwrap();

        assert!(registry.is_protocol_registered("myproto"));
        assert_eq!(
            registry.register_protocol("myproto", ProtocolType::Buffer, noop),
            Err(ProtocolError::AlreadyRegistered)
        );
        assert_eq!(registry.registered("myproto").unwrap().ptype, ProtocolType::String);
    }

    #[test]
    fn unregister_unknown_fails() {
        let registry = ProtocolRegistry::new();
        assert_eq!(registry.unregister_protocol("nope"), Err(ProtocolError::NotRegistered));
        assert_eq!(registry.unintercept_protocol("http"), Err(ProtocolError::NotIntercepted));
    }

    #[test]
    fn intercept_is_independent_of_registration() {
        let registry = ProtocolRegistry::new();
        registry.intercept_protocol("https", ProtocolType::Free, noop).unwrap();

        assert!(registry.is_protocol_intercepted("https"));
        assert!(!registry.is_protocol_registered("https"));
        assert_eq!(
            registry.intercept_protocol("https", ProtocolType::Free, noop),
            Err(ProtocolError::AlreadyIntercepted)
        );

        registry.unintercept_protocol("https").unwrap();
        assert!(!registry.is_protocol_intercepted("https"));
    }

    #[test]
    fn handled_includes_builtins() {
        let registry = ProtocolRegistry::new();
        assert!(registry.is_protocol_handled("https"));
        assert!(registry.is_protocol_handled("about"));
        assert!(!registry.is_protocol_handled("myproto"));

        registry.register_protocol("myproto", ProtocolType::Buffer, noop).unwrap();
        assert!(registry.is_protocol_handled("myproto"));
    }

    #[test]
    fn invalid_schemes_are_rejected() {
        let registry = ProtocolRegistry::new();
        for scheme in ["", "1abc", "my proto", "a:b"] {
            assert!(matches!(
                registry.register_protocol(scheme, ProtocolType::String, noop),
                Err(ProtocolError::InvalidScheme(_))
            ));
        }
    }

    #[test]
    fn clones_share_the_table() {
        let registry = ProtocolRegistry::new();
        let clone = registry.clone();
        registry.register_protocol("app", ProtocolType::File, noop).unwrap();
        assert!(clone.is_protocol_registered("app"));
    }
}
