//! Effects
//!
//! An Effect wraps a body that mutates states, calls other effects and
//! waits on signals, plus optional `success`, `error` and `done` handlers.
//!
//! # Calling
//!
//! `call(payload)` creates an [`ExecutionContext`] and runs the body right
//! away. If the body never suspends, the result comes back synchronously.
//! Otherwise the call returns `Value::Async`, a cancellable handle whose
//! remaining work is driven on the local executor.
//!
//! # Bodies
//!
//! - [`Effect::from_expr`]: a fixed expression, e.g. a `(state, reducer)`
//!   pair. Applied once per call.
//! - [`Effect::plain`]: a function from the payload to one expression.
//! - [`Effect::generator`]: an async body that yields any number of
//!   expressions through its [`Co`] handle.
//!
//! ```rust,ignore
//! let count = Family::state(1);
//! let add = Effect::from_expr(Expr::update(&count, |v, payload| {
//!     let by = payload.get("by").and_then(Value::as_f64).unwrap_or(1.0);
//!     Ok(Value::from(v.as_f64().unwrap_or(0.0) + by))
//! }));
//! add.call(json!({"by": 5}))?;
//! ```

mod context;
mod expr;
mod interpreter;
mod timing;

use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::rc::Rc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::{FutureExt, LocalBoxFuture};
use futures::task::noop_waker_ref;
use tracing::debug;

pub use context::{ExecutionContext, RunStatus};
pub use expr::{Arg, Expr, Func, Reducer, Target};
pub use interpreter::Co;
pub use timing::{Debounced, Latest, Throttled};

use crate::error::{Error, Result};
use crate::middleware;
use crate::reactive::{AsyncValue, Family, Loadable, LoadableCache, Observable, Runtime, State, Subscription};
use crate::value::Value;

/// Maps a family root and the call's payload to the member to act on.
pub type StateResolver = Rc<dyn Fn(&Family, &Value) -> Result<State>>;

type GeneratorFn = Rc<dyn Fn(Co, Value) -> LocalBoxFuture<'static, Result<Value>>>;

/// What an effect runs.
#[derive(Clone)]
pub enum Body {
    Plain(Rc<dyn Fn(&Value) -> Result<Expr>>),
    Generator(GeneratorFn),
}

impl Body {
    pub fn plain<F>(body: F) -> Self
    where
        F: Fn(&Value) -> Result<Expr> + 'static,
    {
        Self::Plain(Rc::new(body))
    }

    pub fn expr(expr: Expr) -> Self {
        Self::plain(move |_| Ok(expr.clone()))
    }

    pub fn generator<F, Fut>(body: F) -> Self
    where
        F: Fn(Co, Value) -> Fut + 'static,
        Fut: Future<Output = Result<Value>> + 'static,
    {
        Self::Generator(Rc::new(move |co, payload| body(co, payload).boxed_local()))
    }
}

impl From<Expr> for Body {
    fn from(expr: Expr) -> Self {
        Self::expr(expr)
    }
}

/// Handlers and settings for an effect.
#[derive(Clone, Default)]
pub struct EffectOptions {
    pub(crate) success: Option<Rc<dyn Fn(&Value) -> Expr>>,
    pub(crate) error: Option<Rc<dyn Fn(&Error) -> Expr>>,
    pub(crate) done: Option<Rc<dyn Fn() -> Expr>>,
    pub(crate) state_resolver: Option<StateResolver>,
    pub(crate) name: Option<Rc<str>>,
}

impl EffectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run after the body finishes without error and without being cancelled.
    pub fn on_success<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Value) -> Expr + 'static,
    {
        self.success = Some(Rc::new(handler));
        self
    }

    /// Run when the body fails. The call then resolves to the handler's result.
    pub fn on_error<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Error) -> Expr + 'static,
    {
        self.error = Some(Rc::new(handler));
        self
    }

    /// Run exactly once at the end of every started call.
    pub fn on_done<F>(mut self, handler: F) -> Self
    where
        F: Fn() -> Expr + 'static,
    {
        self.done = Some(Rc::new(handler));
        self
    }

    /// Choose which family member a family target refers to.
    pub fn state_resolver<F>(mut self, resolver: F) -> Self
    where
        F: Fn(&Family, &Value) -> Result<State> + 'static,
    {
        self.state_resolver = Some(Rc::new(resolver));
        self
    }

    pub fn name(mut self, name: impl Into<Rc<str>>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl fmt::Debug for EffectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectOptions")
            .field("success", &self.success.is_some())
            .field("error", &self.error.is_some())
            .field("done", &self.done.is_some())
            .field("state_resolver", &self.state_resolver.is_some())
            .field("name", &self.name)
            .finish()
    }
}

/// Sent to `on` listeners once per settled call.
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub payload: Value,
    pub result: Result<Value>,
}

struct EffectInner {
    id: u64,
    body: Body,
    options: EffectOptions,
    dispatches: Observable<Dispatch>,
    latest: RefCell<Option<Rc<ExecutionContext>>>,
    /// Result of the latest call; `Value::Async` while it is in flight.
    result: RefCell<Option<Result<Value>>>,
    /// Bumped whenever `result` is replaced.
    generation: Cell<u64>,
    loadable: LoadableCache,
    disposed: Cell<bool>,
}

/// A callable that runs a body against the expression interpreter.
#[derive(Clone)]
pub struct Effect {
    inner: Rc<EffectInner>,
}

impl Effect {
    /// Create an effect. The new instance passes through the registered
    /// middleware.
    pub fn new(body: Body, options: EffectOptions) -> Self {
        let effect = Self {
            inner: Rc::new(EffectInner {
                id: Runtime::next_id(),
                body,
                options,
                dispatches: Observable::new(),
                latest: RefCell::new(None),
                result: RefCell::new(None),
                generation: Cell::new(0),
                loadable: LoadableCache::default(),
                disposed: Cell::new(false),
            }),
        };
        debug!(effect = effect.id(), name = effect.name(), "effect created");
        middleware::apply_effect(effect)
    }

    /// An effect that applies `expr` on every call.
    pub fn from_expr(expr: Expr) -> Self {
        Self::new(Body::expr(expr), EffectOptions::default())
    }

    pub fn plain<F>(body: F) -> Self
    where
        F: Fn(&Value) -> Result<Expr> + 'static,
    {
        Self::new(Body::plain(body), EffectOptions::default())
    }

    pub fn generator<F, Fut>(body: F) -> Self
    where
        F: Fn(Co, Value) -> Fut + 'static,
        Fut: Future<Output = Result<Value>> + 'static,
    {
        Self::new(Body::generator(body), EffectOptions::default())
    }

    /// Get the effect's unique ID.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.options.name.as_deref()
    }

    pub fn options(&self) -> &EffectOptions {
        &self.inner.options
    }

    pub(crate) fn body(&self) -> &Body {
        &self.inner.body
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::DisposedAccess {
                kind: "effect",
                id: self.id(),
            });
        }
        Ok(())
    }

    /// Run the effect with `payload`.
    ///
    /// Returns the result directly if the body never suspends, otherwise
    /// `Value::Async`. A body error with no error handler is returned (or,
    /// for async calls, rejects the returned value).
    ///
    /// # Panics
    ///
    /// Panics outside a tokio `LocalSet` if the body suspends, since the
    /// rest of the call is driven by a local task.
    pub fn call(&self, payload: impl Into<Value>) -> Result<Value> {
        self.ensure_live()?;
        let context = Rc::new(ExecutionContext::new(self.id(), payload.into()));
        *self.inner.latest.borrow_mut() = Some(Rc::clone(&context));

        let mut future = Self::settle(self.clone(), Rc::clone(&context)).boxed_local();
        let mut cx = Context::from_waker(noop_waker_ref());
        match future.as_mut().poll(&mut cx) {
            // Already recorded and dispatched by `settle`.
            Poll::Ready(result) => result,
            Poll::Pending => {
                context.detach();
                let pending = AsyncValue::with_context(future, Rc::clone(&context));
                let driver = pending.future();
                // Detached: cancellation goes through the context.
                let _ = Runtime::spawn(async move {
                    let _ = driver.await;
                });
                let result = Ok(Value::Async(pending));
                self.store_result(result.clone());
                result
            }
        }
    }

    /// Alias for [`call`](Effect::call).
    pub fn run(&self, payload: impl Into<Value>) -> Result<Value> {
        self.call(payload)
    }

    /// Run the call, record it and notify listeners.
    async fn settle(effect: Effect, context: Rc<ExecutionContext>) -> Result<Value> {
        let result = interpreter::run(effect.clone(), Rc::clone(&context)).await;
        if !context.is_detached() {
            effect.store_result(result.clone());
        }
        if !context.is_cancelled() && !effect.is_disposed() {
            effect.inner.dispatches.dispatch(&Dispatch {
                payload: context.payload().clone(),
                result: result.clone(),
            });
        }
        result
    }

    fn store_result(&self, result: Result<Value>) {
        *self.inner.result.borrow_mut() = Some(result);
        self.inner.generation.set(self.inner.generation.get() + 1);
    }

    /// Cancel the latest call if it is still in flight.
    pub fn cancel(&self) {
        let latest = self.inner.latest.borrow().clone();
        if let Some(context) = latest {
            if context.status() != RunStatus::Done {
                debug!(effect = self.id(), call = context.id(), "cancelling effect call");
                context.cancel();
            }
        }
    }

    /// Status of the latest call, if there was one.
    pub fn status(&self) -> Option<RunStatus> {
        self.inner.latest.borrow().as_ref().map(|context| context.status())
    }

    /// Result of the latest call. `Undefined` before the first call.
    pub fn value(&self) -> Result<Value> {
        self.ensure_live()?;
        self.inner
            .result
            .borrow()
            .clone()
            .unwrap_or(Ok(Value::Undefined))
    }

    /// Loadable snapshot of the latest call's result.
    pub fn loadable(&self) -> Result<Loadable> {
        self.ensure_live()?;
        Ok(self.inner.loadable.project(self.value(), self.inner.generation.get()))
    }

    /// Subscribe to settled calls.
    pub fn on<F>(&self, listener: F) -> Result<Subscription>
    where
        F: Fn(&Dispatch) + 'static,
    {
        self.ensure_live()?;
        Ok(self.inner.dispatches.subscribe(listener))
    }

    /// Get the number of dispatch listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.dispatches.len()
    }

    /// A wrapper that cancels the previous call before each new one.
    pub fn latest(&self) -> Latest {
        Latest::new(self.clone())
    }

    /// A wrapper that calls only after `delay` passes without another call.
    pub fn debounce(&self, delay: Duration) -> Debounced {
        Debounced::new(self.clone(), delay)
    }

    /// A wrapper that calls at most once per `window`.
    pub fn throttle(&self, window: Duration) -> Throttled {
        Throttled::new(self.clone(), window)
    }

    /// Cancel the latest call and release listeners.
    pub fn dispose(&self) {
        if self.inner.disposed.get() {
            return;
        }
        self.cancel();
        self.inner.disposed.set(true);
        self.inner.dispatches.clear();
        self.inner.loadable.dispose();
        debug!(effect = self.id(), "effect disposed");
    }

    pub fn ptr_eq(&self, other: &Effect) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for Effect {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.inner.id)
            .field("name", &self.inner.options.name)
            .field("status", &self.status())
            .field("disposed", &self.inner.disposed.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::task::LocalSet;

    fn add_by() -> (Family, Effect) {
        let count = Family::state(1);
        let add = Effect::from_expr(Expr::update(&count, |v, payload| {
            let by = payload.get("by").and_then(Value::as_f64).unwrap_or(1.0);
            Ok(Value::from(v.as_f64().unwrap_or(0.0) + by))
        }));
        (count, add)
    }

    #[test]
    fn reducer_effect_applies_payload() {
        let (count, add) = add_by();
        add.call(json!({"by": 5})).unwrap();
        add.call(json!({"by": 5})).unwrap();
        assert_eq!(count.value().unwrap(), Value::from(11));

        add.call(Value::Undefined).unwrap();
        assert_eq!(count.value().unwrap(), Value::from(12));
        assert_eq!(add.status(), Some(RunStatus::Done));
    }

    #[test]
    fn plain_bodies_dispatch_their_expression() {
        let name = Family::state("");
        let target = name.clone();
        let rename = Effect::plain(move |payload| Ok(Expr::set(&target, payload.clone())));

        assert_eq!(rename.call("weft").unwrap(), Value::from("weft"));
        assert_eq!(name.value().unwrap(), Value::from("weft"));
        assert_eq!(rename.value().unwrap(), Value::from("weft"));
    }

    #[test]
    fn sync_generators_return_synchronously() {
        let count = Family::state(0);
        let target = count.clone();
        let twice = Effect::generator(move |co, _| {
            let target = target.clone();
            async move {
                co.yield_(Expr::update(&target, |v, _| Ok(Value::from(v.as_f64().unwrap_or(0.0) + 1.0))))
                    .await?;
                let second = co
                    .yield_(Expr::update(&target, |v, _| Ok(Value::from(v.as_f64().unwrap_or(0.0) + 1.0))))
                    .await?;
                Ok(second)
            }
        });

        assert_eq!(twice.call(()).unwrap(), Value::from(2));
        assert_eq!(count.value().unwrap(), Value::from(2));
    }

    #[test]
    fn handlers_run_in_order() {
        let log = Family::state(Value::list([]));
        let push = |entry: &'static str| {
            let log = log.clone();
            move || {
                Expr::update(&log, move |v, _| {
                    let mut items = v.as_list().map(<[Value]>::to_vec).unwrap_or_default();
                    items.push(Value::from(entry));
                    Ok(Value::list(items))
                })
            }
        };

        let (on_success, on_done) = (push("success"), push("done"));
        let effect = Effect::new(
            Body::plain(|_| Ok(Expr::value(1))),
            EffectOptions::new()
                .on_success(move |_| on_success())
                .on_done(move || on_done()),
        );
        assert_eq!(effect.call(()).unwrap(), Value::from(1));
        assert_eq!(log.value().unwrap().to_string(), r#"["success", "done"]"#);
    }

    #[test]
    fn errors_go_to_the_handler_or_the_caller() {
        let failing = Effect::plain(|_| Err(Error::msg("nope")));
        assert!(matches!(failing.call(()), Err(Error::Thrown(_))));

        let done = Family::state(0);
        let done_target = done.clone();
        let handled = Effect::new(
            Body::plain(|_| Err(Error::msg("nope"))),
            EffectOptions::new()
                .on_error(|error| Expr::value(format!("handled: {error}")))
                .on_done(move || Expr::update(&done_target, |v, _| Ok(Value::from(v.as_f64().unwrap_or(0.0) + 1.0)))),
        );
        assert_eq!(handled.call(()).unwrap(), Value::from("handled: nope"));
        assert_eq!(done.value().unwrap(), Value::from(1));
    }

    #[test]
    fn dispatch_listeners_fire_once_per_call() {
        let (_, add) = add_by();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = seen.clone();
        let subscription = add
            .on(move |dispatch| seen_clone.borrow_mut().push(dispatch.result.clone().unwrap()))
            .unwrap();

        add.call(json!({"by": 2})).unwrap();
        add.call(json!({"by": 3})).unwrap();
        assert_eq!(*seen.borrow(), vec![Value::from(3), Value::from(6)]);
        assert_eq!(add.listener_count(), 1);

        subscription.unsubscribe();
        add.call(Value::Undefined).unwrap();
        assert_eq!(seen.borrow().len(), 2);
    }

    #[test]
    fn state_resolver_picks_the_family_member() {
        let todos = Family::family(|_| Ok(Value::from(false)));
        let toggle = Effect::new(
            Body::expr(Expr::update(&todos, |v, _| Ok(Value::from(!v.as_bool().unwrap_or(false))))),
            EffectOptions::new().state_resolver(|family, payload| Ok(family.member(&[payload.clone()]))),
        );

        toggle.call(7).unwrap();
        assert_eq!(todos.member(&[Value::from(7)]).value().unwrap(), Value::from(true));
        assert_eq!(todos.member(&[Value::from(8)]).value().unwrap(), Value::from(false));
    }

    #[test]
    fn unsupported_shapes_are_rejected() {
        let count = Family::state(0);
        let bad_batch = Effect::from_expr(Expr::batch([Expr::next(&count)]));
        assert!(matches!(bad_batch.call(()), Err(Error::UnsupportedExpression(_))));

        let bad_reducer = Effect::from_expr(Expr::Apply(
            Target::Func(Rc::new(|_| Ok(Value::Null))),
            vec![Arg::Reducer(Rc::new(|v, _| Ok(v)))],
        ));
        assert!(matches!(bad_reducer.call(()), Err(Error::UnsupportedExpression(_))));
    }

    #[test]
    fn disposed_effects_refuse_calls() {
        let (_, add) = add_by();
        add.dispose();
        assert!(matches!(add.call(()), Err(Error::DisposedAccess { kind: "effect", .. })));
        assert!(add.on(|_| {}).is_err());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn waiting_generators_resume_on_signals() {
        LocalSet::new()
            .run_until(async {
                let ready = Family::state(false);
                let log = Family::state(Value::Null);
                let (ready_target, log_target) = (ready.clone(), log.clone());
                let waiter = Effect::generator(move |co, _| {
                    let (ready, log) = (ready_target.clone(), log_target.clone());
                    async move {
                        let fired = co.yield_(Expr::next(&ready)).await?;
                        co.yield_(Expr::set(&log, fired)).await?;
                        Ok(Value::from("resumed"))
                    }
                });

                let pending = waiter.call(()).unwrap();
                assert!(pending.is_async());
                assert_eq!(waiter.status(), Some(RunStatus::Suspended));

                ready.set_value(true).unwrap();
                let result = pending.as_async().unwrap().clone().await.unwrap();
                assert_eq!(result, Value::from("resumed"));
                assert_eq!(log.value().unwrap(), Value::from(true));
                assert_eq!(waiter.status(), Some(RunStatus::Done));
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn race_resolves_to_the_first_winner() {
        LocalSet::new()
            .run_until(async {
                let a = Family::state(0);
                let b = Family::state(0);
                let (ta, tb) = (a.clone(), b.clone());
                let racer = Effect::generator(move |co, _| {
                    let (a, b) = (ta.clone(), tb.clone());
                    async move { co.yield_(Expr::race([("a", &a), ("b", &b)])).await }
                });

                let pending = racer.call(()).unwrap();
                b.set_value(2).unwrap();
                a.set_value(1).unwrap();

                let winner = pending.as_async().unwrap().clone().await.unwrap();
                assert_eq!(winner.get("b"), Some(&Value::from(2)));
                assert!(winner.get("a").is_none());
                assert_eq!(a.default_member().listener_count(), 0);
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn all_waits_for_every_target() {
        LocalSet::new()
            .run_until(async {
                let a = Family::state(0);
                let ping = Effect::plain(|payload| Ok(Expr::value(payload.clone())));
                let (ta, tp) = (a.clone(), ping.clone());
                let joiner = Effect::generator(move |co, _| {
                    let (a, ping) = (ta.clone(), tp.clone());
                    async move {
                        co.yield_(Expr::all([("a", Target::from(&a)), ("ping", Target::from(&ping))]))
                            .await
                    }
                });

                let pending = joiner.call(()).unwrap();
                a.set_value(1).unwrap();
                Runtime::sleep(Duration::from_millis(1)).await;
                assert!(!pending.as_async().unwrap().is_settled());

                ping.call("pong").unwrap();
                let all = pending.as_async().unwrap().clone().await.unwrap();
                assert_eq!(all.get("a"), Some(&Value::from(1)));
                assert_eq!(all.get("ping"), Some(&Value::from("pong")));
            })
            .await;
    }

    #[test]
    fn loadable_follows_the_latest_error() {
        let failing = Effect::plain(|payload| Err(Error::Thrown(payload.clone())));
        assert!(failing.call("first").is_err());
        let first = failing.loadable().unwrap();
        assert_eq!(first.error().and_then(Error::thrown), Some(&Value::from("first")));
        assert!(first.ptr_eq(&failing.loadable().unwrap()));

        assert!(failing.call("second").is_err());
        let second = failing.loadable().unwrap();
        assert_eq!(second.error().and_then(Error::thrown), Some(&Value::from("second")));
        assert!(!second.ptr_eq(&first));
    }

    #[test]
    #[should_panic]
    fn suspending_outside_a_local_set_panics() {
        let gate = Family::state(0);
        let waiter = Effect::generator(move |co, _| {
            let gate = gate.clone();
            async move { co.yield_(Expr::next(&gate)).await }
        });
        let _ = waiter.call(());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn async_errors_go_to_the_handler_or_reject() {
        LocalSet::new()
            .run_until(async {
                let gate = Family::state(0);
                let failing_body = |gate: Family| {
                    Body::generator(move |co, _| {
                        let gate = gate.clone();
                        async move {
                            co.yield_(Expr::next(&gate)).await?;
                            Err(Error::msg("late"))
                        }
                    })
                };

                let unhandled = Effect::new(failing_body(gate.clone()), EffectOptions::new());
                let handled = Effect::new(
                    failing_body(gate.clone()),
                    EffectOptions::new().on_error(|error| Expr::value(format!("handled: {error}"))),
                );

                let rejected = unhandled.call(()).unwrap();
                let recovered = handled.call(()).unwrap();
                assert!(rejected.is_async() && recovered.is_async());

                gate.set_value(1).unwrap();
                let error = rejected.as_async().unwrap().clone().await.unwrap_err();
                assert_eq!(error.thrown(), Some(&Value::from("late")));
                assert_eq!(recovered.as_async().unwrap().clone().await.unwrap(), Value::from("handled: late"));
                assert_eq!(handled.status(), Some(RunStatus::Done));
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn all_remembers_firings_across_yields() {
        LocalSet::new()
            .run_until(async {
                let a = Family::state(0);
                let b = Family::state(0);
                let rounds = Family::state(0);
                let (ta, tb, tr) = (a.clone(), b.clone(), rounds.clone());
                let joiner = Effect::generator(move |co, _| {
                    let (a, b, rounds) = (ta.clone(), tb.clone(), tr.clone());
                    async move {
                        let mut last = Value::Undefined;
                        for _ in 0..2 {
                            last = co.yield_(Expr::all([("a", &a), ("b", &b)])).await?;
                            co.yield_(Expr::update(&rounds, |v, _| Ok(Value::from(v.as_f64().unwrap_or(0.0) + 1.0))))
                                .await?;
                        }
                        Ok(last)
                    }
                });

                let pending = joiner.call(()).unwrap();
                a.set_value(1).unwrap();
                Runtime::sleep(Duration::from_millis(1)).await;
                assert_eq!(rounds.value().unwrap(), Value::from(0));

                b.set_value(2).unwrap();
                let all = pending.as_async().unwrap().clone().await.unwrap();
                assert_eq!(rounds.value().unwrap(), Value::from(2));
                assert_eq!(all.get("a"), Some(&Value::from(1)));
                assert_eq!(all.get("b"), Some(&Value::from(2)));
            })
            .await;
    }
}
