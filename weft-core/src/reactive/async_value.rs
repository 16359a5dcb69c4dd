//! Asynchronous Values
//!
//! An [`AsyncValue`] is the engine's promise: a cloneable handle to a shared
//! future that settles once with `Result<Value, Error>`. Clones share the
//! same settlement, and equality is handle identity, so a state holding an
//! in-flight value only "changes" when it is given a different handle.
//!
//! Futures are lazy. Something has to poll an async value for it to
//! settle: awaiting it, a loadable projection, a watcher, or an effect
//! (which drives its own continuation through the runtime).

use std::fmt;
use std::future::{Future, IntoFuture};
use std::rc::Rc;

use futures::future::{self, FutureExt, LocalBoxFuture, Shared};

use crate::effect::ExecutionContext;
use crate::error::{Error, Result};
use crate::value::Value;

/// The shared future behind an async value.
pub type SharedResult = Shared<LocalBoxFuture<'static, Result<Value>>>;

struct AsyncInner {
    future: SharedResult,
    /// Set when the value is the result of an effect call.
    context: Option<Rc<ExecutionContext>>,
}

/// A promise-like handle to a value that settles later.
#[derive(Clone)]
pub struct AsyncValue {
    inner: Rc<AsyncInner>,
}

impl AsyncValue {
    /// Wrap a future.
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = Result<Value>> + 'static,
    {
        Self::from_parts(future.boxed_local(), None)
    }

    pub(crate) fn with_context<F>(future: F, context: Rc<ExecutionContext>) -> Self
    where
        F: Future<Output = Result<Value>> + 'static,
    {
        Self::from_parts(future.boxed_local(), Some(context))
    }

    fn from_parts(future: LocalBoxFuture<'static, Result<Value>>, context: Option<Rc<ExecutionContext>>) -> Self {
        Self {
            inner: Rc::new(AsyncInner {
                future: future.shared(),
                context,
            }),
        }
    }

    /// An async value that is already fulfilled.
    pub fn resolved(value: impl Into<Value>) -> Self {
        Self::new(future::ready(Ok(value.into())))
    }

    /// An async value that is already rejected.
    pub fn rejected(error: Error) -> Self {
        Self::new(future::ready(Err(error)))
    }

    /// Chain a continuation that runs once this value is fulfilled.
    ///
    /// Rejections skip `f` and propagate. If `f` returns another async
    /// value, the result settles with it.
    pub fn then<F>(&self, f: F) -> AsyncValue
    where
        F: FnOnce(Value) -> Result<Value> + 'static,
    {
        let source = self.future();
        AsyncValue::new(async move {
            match f(source.await?)? {
                Value::Async(next) => next.future().await,
                value => Ok(value),
            }
        })
    }

    /// A clone of the shared future.
    pub fn future(&self) -> SharedResult {
        self.inner.future.clone()
    }

    /// The settled result, if the future has completed.
    pub fn peek(&self) -> Option<Result<Value>> {
        self.inner.future.peek().cloned()
    }

    pub fn is_settled(&self) -> bool {
        self.inner.future.peek().is_some()
    }

    /// Cancel the effect call that produced this value.
    ///
    /// Does nothing for values that do not come from an effect.
    pub fn cancel(&self) {
        if let Some(context) = &self.inner.context {
            context.cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.context.as_ref().is_some_and(|context| context.is_cancelled())
    }

    /// The execution context of the producing effect call, if any.
    pub fn context(&self) -> Option<&Rc<ExecutionContext>> {
        self.inner.context.as_ref()
    }

    pub fn ptr_eq(&self, other: &AsyncValue) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.inner) as usize
    }
}

impl IntoFuture for AsyncValue {
    type Output = Result<Value>;
    type IntoFuture = SharedResult;

    fn into_future(self) -> Self::IntoFuture {
        self.future()
    }
}

impl fmt::Debug for AsyncValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncValue")
            .field("addr", &format_args!("{:#x}", self.addr()))
            .field("settled", &self.is_settled())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
