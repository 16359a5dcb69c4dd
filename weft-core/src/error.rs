//! Error Types
//!
//! Every fallible operation in the engine returns [`Result`]. Errors are
//! cheap to clone because a failed state evaluation is cached and handed
//! back on every later read until the state is invalidated.

use thiserror::Error;

use crate::reactive::HookKind;
use crate::value::Value;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised by states, effects and the hooks that run inside them.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// A hook was called while no state was being evaluated.
    #[error("hook called outside of a state evaluation")]
    NoActiveScope,

    /// A hook id was reused with a different hook kind.
    #[error("hook `{id}` (call #{index}) was registered as a {expected} hook but called as a {found} hook")]
    HookOrderViolation {
        id: String,
        index: usize,
        expected: HookKind,
        found: HookKind,
    },

    /// An operation was attempted on a disposed state or effect.
    #[error("{kind} #{id} was used after being disposed")]
    DisposedAccess { kind: &'static str, id: u64 },

    /// An effect produced an expression the interpreter cannot run.
    #[error("unsupported expression: {0}")]
    UnsupportedExpression(String),

    /// A read-only state was written to.
    #[error("state #{id} is read-only")]
    ReadonlyStateMutation { id: u64 },

    /// The awaited call was cancelled before it could produce a value.
    #[error("call was cancelled")]
    Cancelled,

    /// An error raised by user code (initializers, effect bodies, reducers).
    #[error("{0}")]
    Thrown(Value),
}

impl Error {
    /// Build a user error from any value, usually a message.
    pub fn msg(value: impl Into<Value>) -> Self {
        Self::Thrown(value.into())
    }

    /// The value carried by a user error.
    pub fn thrown(&self) -> Option<&Value> {
        match self {
            Self::Thrown(value) => Some(value),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_errors_keep_their_payload() {
        let error = Error::msg("boom");
        assert_eq!(error.thrown(), Some(&Value::from("boom")));
        assert_eq!(error.to_string(), "boom");
    }

    #[test]
    fn engine_errors_render_their_context() {
        let error = Error::DisposedAccess { kind: "state", id: 7 };
        assert_eq!(error.to_string(), "state #7 was used after being disposed");
        assert!(error.thrown().is_none());
    }
}
