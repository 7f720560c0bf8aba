//! Execution identity for observer callbacks.
//!
//! Observers run on scheduler threads that carry no caller identity, so the
//! bus elevates each invocation to [`ExecutionIdentity::System`]. The
//! identity is thread-local and always restored when the scope ends, even if
//! the callback panics.

use std::cell::RefCell;
use std::fmt;

/// Identity the current thread acts as.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ExecutionIdentity {
    /// No identity established.
    #[default]
    Anonymous,
    /// A named principal.
    User(String),
    /// Full system privileges.
    System,
}

impl ExecutionIdentity {
    #[allow(missing_docs)]
    #[must_use]
    pub fn is_system(&self) -> bool {
        matches!(self, Self::System)
    }
}

impl fmt::Display for ExecutionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => f.write_str("anonymous"),
            Self::User(name) => write!(f, "user:{name}"),
            Self::System => f.write_str("system"),
        }
    }
}

thread_local! {
    static IDENTITY: RefCell<ExecutionIdentity> = RefCell::new(ExecutionIdentity::Anonymous);
}

/// Identity of the calling thread.
#[must_use]
pub fn current_identity() -> ExecutionIdentity {
    IDENTITY.with(|id| id.borrow().clone())
}

/// Restores the previous identity on drop.
#[derive(Debug)]
#[must_use = "the identity is restored as soon as the guard is dropped"]
pub struct IdentityGuard {
    previous: Option<ExecutionIdentity>,
}

impl IdentityGuard {
    /// Switch the current thread to `identity` until the guard drops.
    pub fn enter(identity: ExecutionIdentity) -> Self {
        let previous = IDENTITY.with(|id| std::mem::replace(&mut *id.borrow_mut(), identity));
        Self {
            previous: Some(previous),
        }
    }
}

impl Drop for IdentityGuard {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            IDENTITY.with(|id| *id.borrow_mut() = previous);
        }
    }
}

/// Run `f` as [`ExecutionIdentity::System`].
pub fn run_as_system<T>(f: impl FnOnce() -> T) -> T {
    let _guard = IdentityGuard::enter(ExecutionIdentity::System);
    f()
}
