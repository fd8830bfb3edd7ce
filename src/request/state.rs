//! Request/response lifecycle bitmask.

use std::fmt;
use std::ops::BitOr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Set of lifecycle flags.
///
/// `CANCELED`, `FAILED` and `CLOSED` are terminal; once any of them is set
/// nothing more is delivered for the request.
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct RequestState(u8);

impl RequestState {
    pub const STARTED: Self = Self(1 << 0);
    pub const FINISHED: Self = Self(1 << 1);
    pub const CANCELED: Self = Self(1 << 2);
    pub const FAILED: Self = Self(1 << 3);
    pub const CLOSED: Self = Self(1 << 4);
    pub const ERROR: Self = Self(Self::CANCELED.0 | Self::FAILED.0 | Self::CLOSED.0);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn is_error(self) -> bool {
        self.intersects(Self::ERROR)
    }
}

impl BitOr for RequestState {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(RequestState, &str); 5] = [
            (RequestState::STARTED, "STARTED"),
            (RequestState::FINISHED, "FINISHED"),
            (RequestState::CANCELED, "CANCELED"),
            (RequestState::FAILED, "FAILED"),
            (RequestState::CLOSED, "CLOSED"),
        ];
        let set: Vec<&str> = NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "RequestState({})", set.join(" | "))
    }
}

/// State shared between a `ClientRequest` and its controller task.
#[derive(Debug, Clone, Default)]
pub(crate) struct SharedState(Arc<AtomicU8>);

impl SharedState {
    pub(crate) fn get(&self) -> RequestState {
        RequestState(self.0.load(Ordering::SeqCst))
    }

    pub(crate) fn insert(&self, flags: RequestState) {
        self.0.fetch_or(flags.0, Ordering::SeqCst);
    }

    /// Set a terminal flag unless one is already set. Returns false if the
    /// state was already terminal.
    pub(crate) fn enter_terminal(&self, flag: RequestState) -> bool {
        self.0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |bits| {
                (!RequestState(bits).is_error()).then_some(bits | flag.0)
            })
            .is_ok()
    }
}
