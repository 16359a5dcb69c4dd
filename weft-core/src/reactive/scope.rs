//! Evaluation Scope
//!
//! The scope stack tracks which state is currently being evaluated. This
//! enables automatic dependency tracking: when a state is read, we can
//! register it as a dependency of the state whose initializer is running.
//!
//! # Implementation
//!
//! We use a thread-local stack of frames. Evaluating a state pushes a frame
//! for it and pops the frame when the returned guard drops, so the stack
//! stays balanced even if the initializer panics. Nested evaluation (a
//! derived state reading another derived state that has not been computed
//! yet) pushes a second frame; only the innermost frame is "active".
//!
//! Each frame also counts hook calls, so hooks can report their position.

use std::cell::RefCell;

use super::State;
use crate::error::{Error, Result};

thread_local! {
    static SCOPE_STACK: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

/// An entry in the scope stack.
struct Frame {
    /// The state whose initializer is running.
    node: State,
    /// Number of hook calls made so far in this evaluation.
    hook_index: usize,
}

/// Guard that pops the frame when dropped.
pub(crate) struct Scope {
    id: u64,
}

impl Scope {
    /// Enter a new evaluation frame for the given state.
    pub(crate) fn enter(node: State) -> Self {
        let id = node.id();
        SCOPE_STACK.with(|stack| {
            stack.borrow_mut().push(Frame {
                node,
                hook_index: 0,
            });
        });

        Self { id }
    }

    /// Check if there is an active evaluation.
    pub(crate) fn is_active() -> bool {
        SCOPE_STACK.with(|stack| !stack.borrow().is_empty())
    }

    /// Get the state being evaluated, if any.
    pub(crate) fn current() -> Option<State> {
        SCOPE_STACK.with(|stack| stack.borrow().last().map(|frame| frame.node.clone()))
    }

    /// Record that the active evaluation read `source`.
    ///
    /// Does nothing outside an evaluation or when a state reads itself.
    pub(crate) fn track(source: &State) {
        if let Some(reader) = Self::current() {
            if reader.id() != source.id() {
                reader.add_dependency(source);
            }
        }
    }

    /// Claim the next hook position in the active evaluation.
    pub(crate) fn next_hook() -> Result<(State, usize)> {
        SCOPE_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            let frame = stack.last_mut().ok_or(Error::NoActiveScope)?;
            let index = frame.hook_index;
            frame.hook_index += 1;
            Ok((frame.node.clone(), index))
        })
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        let popped = SCOPE_STACK.with(|stack| stack.borrow_mut().pop());

        // Frames must be popped in the order they were pushed.
        if let Some(frame) = popped {
            debug_assert_eq!(
                frame.node.id(),
                self.id,
                "Scope mismatch: expected state #{}, got #{}",
                self.id,
                frame.node.id()
            );
        }
    }
}
