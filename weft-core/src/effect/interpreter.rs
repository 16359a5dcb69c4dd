//! Effect Interpreter
//!
//! Turns expressions into mutations, calls and suspensions, and steps
//! generator bodies.
//!
//! # How a Call Runs
//!
//! 1. The body runs. A plain body returns one expression, which is
//!    dispatched once. A generator body yields expressions through its
//!    [`Co`] handle; each one is dispatched, awaited if asynchronous, and
//!    the result is sent back into the body.
//!
//! 2. After every resumption the call checks its cancellation flag. A
//!    cancelled call stops without further side effects.
//!
//! 3. On completion the `success` or `error` handler runs, then `done`
//!    runs exactly once, whichever way the body ended.
//!
//! # Stepping
//!
//! Generators are async closures. `Co::yield_` parks its expression in a
//! shared airlock and returns `Pending`; the interpreter sees the parked
//! expression, dispatches it, writes the result back and polls the body
//! again. This is an explicit loop, so long-running generator loops do not
//! grow the stack.

use std::cell::RefCell;
use std::future::Future;
use std::rc::{Rc, Weak};
use std::task::Poll;

use futures::channel::oneshot;
use futures::future::{self, FutureExt, LocalBoxFuture};
use indexmap::IndexMap;
use tracing::{debug, trace};

use super::context::{ExecutionContext, RunStatus};
use super::expr::{Arg, Expr, Target};
use super::{Body, Effect, StateResolver};
use crate::error::{Error, Result};
use crate::reactive::{AsyncValue, Family, Runtime, State, Subscription};
use crate::value::Value;

enum Airlock {
    Idle,
    Yielded(Expr),
    Resumed(Result<Value>),
}

/// The handle a generator body uses to talk to the interpreter.
pub struct Co {
    airlock: Rc<RefCell<Airlock>>,
    context: Rc<ExecutionContext>,
}

impl Co {
    /// Hand `expr` to the interpreter and wait for its result.
    ///
    /// Errors raised while running the expression come back here, so the
    /// body can handle them or pass them on with `?`.
    pub async fn yield_(&self, expr: impl Into<Expr>) -> Result<Value> {
        *self.airlock.borrow_mut() = Airlock::Yielded(expr.into());
        future::poll_fn(|_| {
            let mut airlock = self.airlock.borrow_mut();
            match std::mem::replace(&mut *airlock, Airlock::Idle) {
                Airlock::Resumed(result) => Poll::Ready(result),
                parked => {
                    *airlock = parked;
                    Poll::Pending
                }
            }
        })
        .await
    }

    pub fn payload(&self) -> &Value {
        self.context.payload()
    }

    pub fn is_cancelled(&self) -> bool {
        self.context.is_cancelled()
    }

    pub fn context(&self) -> &Rc<ExecutionContext> {
        &self.context
    }
}

/// The result of dispatching an expression.
pub(crate) enum Resolved {
    Ready(Value),
    Pending(AsyncValue),
}

impl Resolved {
    fn from_value(value: Value) -> Self {
        match value {
            Value::Async(pending) => Self::Pending(pending),
            value => Self::Ready(value),
        }
    }
}

/// Outcome of driving a generator body up to its next event.
enum Step {
    Yield(Expr),
    Complete(Result<Value>),
    Cancelled,
}

/// Dispatches expressions on behalf of one call.
#[derive(Clone)]
pub(crate) struct Interpreter {
    context: Rc<ExecutionContext>,
    resolver: Option<StateResolver>,
}

impl Interpreter {
    pub(crate) fn new(context: Rc<ExecutionContext>, resolver: Option<StateResolver>) -> Self {
        Self { context, resolver }
    }

    /// Turn an expression into a ready or pending value.
    pub(crate) fn dispatch(&self, expr: &Expr) -> Result<Resolved> {
        trace!(call = self.context.id(), expr = %expr.describe(), "dispatch");
        match expr {
            Expr::Apply(target, args) => self.apply(target, args),
            Expr::Batch(exprs) => self.batch(exprs),
            Expr::Next(target) => self.next(target),
            Expr::Race(targets) => self.race(targets),
            Expr::All(targets) => self.all(targets),
            Expr::Return(value) => Ok(Resolved::from_value(value.clone())),
        }
    }

    /// Dispatch and wait for the result.
    pub(crate) async fn resolve(&self, expr: &Expr) -> Result<Value> {
        match self.dispatch(expr)? {
            Resolved::Ready(value) => Ok(value),
            Resolved::Pending(pending) => pending.await,
        }
    }

    /// Pick the member a family target refers to.
    fn member(&self, family: &Family) -> Result<State> {
        match &self.resolver {
            Some(resolver) => resolver(family, self.context.payload()),
            None => Ok(family.default_member()),
        }
    }

    fn apply(&self, target: &Target, args: &[Arg]) -> Result<Resolved> {
        let payload = self.context.payload();
        match target {
            Target::State(state) => self.apply_state(state, args.first()),
            Target::Family(family) => self.apply_state(&self.member(family)?, args.first()),
            Target::Effect(effect) => {
                let mut values = self.values(target, args)?.into_iter();
                let payload = values.next().unwrap_or_else(|| payload.clone());
                Ok(Resolved::from_value(effect.call(payload)?))
            }
            Target::Func(func) if args.is_empty() => Ok(Resolved::from_value(func(std::slice::from_ref(payload))?)),
            Target::Func(func) => Ok(Resolved::from_value(func(&self.values(target, args)?)?)),
        }
    }

    fn apply_state(&self, state: &State, arg: Option<&Arg>) -> Result<Resolved> {
        let payload = self.context.payload();
        let next = match arg {
            None => state.assign(payload.clone())?,
            Some(Arg::Value(value)) => state.assign(value.clone())?,
            Some(Arg::Reducer(reducer)) => {
                let (reducer, payload) = (Rc::clone(reducer), payload.clone());
                state.update(move |current| reducer(current, &payload))?
            }
        };
        Ok(Resolved::from_value(next))
    }

    fn values(&self, target: &Target, args: &[Arg]) -> Result<Vec<Value>> {
        args.iter()
            .map(|arg| match arg {
                Arg::Value(value) => Ok(value.clone()),
                Arg::Reducer(_) => Err(Error::UnsupportedExpression(format!(
                    "a reducer can only be applied to a state, not a {}",
                    target.kind()
                ))),
            })
            .collect()
    }

    fn batch(&self, exprs: &[Expr]) -> Result<Resolved> {
        if let Some(expr) = exprs.iter().find(|expr| !matches!(expr, Expr::Apply(..))) {
            return Err(Error::UnsupportedExpression(format!(
                "batch entries must be applications, found {}",
                expr.describe()
            )));
        }
        // Listeners hear about the writes once all of them are applied.
        let resolved = Runtime::batch(|| exprs.iter().map(|expr| self.dispatch(expr)).collect::<Result<Vec<_>>>())?;

        if resolved.iter().all(|r| matches!(r, Resolved::Ready(_))) {
            let values = resolved.into_iter().map(|r| match r {
                Resolved::Ready(value) => value,
                Resolved::Pending(pending) => Value::Async(pending),
            });
            return Ok(Resolved::Ready(values.collect()));
        }

        let futures = resolved.into_iter().map(|r| match r {
            Resolved::Ready(value) => future::ready(Ok(value)).left_future(),
            Resolved::Pending(pending) => pending.future().right_future(),
        });
        let joined = future::try_join_all(futures);
        Ok(Resolved::Pending(AsyncValue::new(async move {
            Ok(Value::list(joined.await?))
        })))
    }

    /// Subscribe `on_fire` to a target's changes or dispatches.
    fn watch<F>(&self, target: &Target, on_fire: F) -> Result<Subscription>
    where
        F: Fn(Result<Value>) + 'static,
    {
        let state = match target {
            Target::Effect(effect) => return effect.on(move |dispatch| on_fire(dispatch.result.clone())),
            Target::State(state) => state.clone(),
            Target::Family(family) => self.member(family)?,
            Target::Func(_) => return Err(Error::UnsupportedExpression("cannot wait on a function".to_owned())),
        };
        state.on(move |change| on_fire(change.new.clone()))
    }

    /// The id firings of `target` are recorded under.
    fn target_id(&self, target: &Target) -> Result<u64> {
        match target {
            Target::Effect(effect) => Ok(effect.id()),
            Target::State(state) => Ok(state.id()),
            Target::Family(family) => Ok(self.member(family)?.id()),
            Target::Func(_) => Err(Error::UnsupportedExpression("cannot wait on a function".to_owned())),
        }
    }

    fn next(&self, target: &Target) -> Result<Resolved> {
        let (sender, receiver) = oneshot::channel();
        let sender = RefCell::new(Some(sender));
        let subscription = self.watch(target, move |result| {
            if let Some(sender) = sender.borrow_mut().take() {
                let _ = sender.send(result);
            }
        })?;

        Ok(Resolved::Pending(AsyncValue::new(async move {
            let fired = receiver.await.map_err(|_| Error::Cancelled);
            drop(subscription);
            fired?
        })))
    }

    fn race(&self, targets: &IndexMap<String, Target>) -> Result<Resolved> {
        let (sender, receiver) = oneshot::channel::<(String, Result<Value>)>();
        let sender = Rc::new(RefCell::new(Some(sender)));

        let mut subscriptions = Vec::with_capacity(targets.len());
        for (name, target) in targets {
            let (name, sender) = (name.clone(), Rc::clone(&sender));
            let subscription = self.watch(target, move |result| {
                if let Some(sender) = sender.borrow_mut().take() {
                    let _ = sender.send((name.clone(), result));
                }
            })?;
            subscriptions.push(subscription);
        }

        Ok(Resolved::Pending(AsyncValue::new(async move {
            let fired = receiver.await.map_err(|_| Error::Cancelled);
            // The losers stop listening as soon as there is a winner.
            drop(subscriptions);
            let (name, result) = fired?;
            Ok(Value::map([(name, result?)]))
        })))
    }

    fn all(&self, targets: &IndexMap<String, Target>) -> Result<Resolved> {
        let mut ids = Vec::with_capacity(targets.len());
        for target in targets.values() {
            let id = self.target_id(target)?;
            let context: Weak<ExecutionContext> = Rc::downgrade(&self.context);
            self.context.record(id, || {
                self.watch(target, move |result| {
                    if let Some(context) = context.upgrade() {
                        context.fire(id, result);
                    }
                })
            })?;
            ids.push(id);
        }

        let names: Vec<String> = targets.keys().cloned().collect();
        let context = Rc::clone(&self.context);
        Ok(Resolved::Pending(AsyncValue::new(async move {
            let fired = future::poll_fn(|cx| {
                if context.is_cancelled() {
                    return Poll::Ready(None);
                }
                match context.poll_fired(&ids, cx.waker()) {
                    Some(fired) => Poll::Ready(Some(fired)),
                    None => Poll::Pending,
                }
            })
            .await
            .ok_or(Error::Cancelled)?;

            let entries = names
                .into_iter()
                .zip(fired)
                .map(|(name, result)| result.map(|value| (name, value)))
                .collect::<Result<Vec<_>>>()?;
            Ok(Value::map(entries))
        })))
    }
}

/// Drive a generator body to completion.
async fn step_generator(interpreter: &Interpreter, mut body: LocalBoxFuture<'static, Result<Value>>, airlock: Rc<RefCell<Airlock>>) -> Result<Value> {
    let context = Rc::clone(&interpreter.context);
    loop {
        let step = future::poll_fn(|cx| {
            if context.is_cancelled() {
                return Poll::Ready(Step::Cancelled);
            }
            match body.as_mut().poll(cx) {
                Poll::Ready(result) => Poll::Ready(Step::Complete(result)),
                Poll::Pending => {
                    let mut parked = airlock.borrow_mut();
                    match std::mem::replace(&mut *parked, Airlock::Idle) {
                        Airlock::Yielded(expr) => Poll::Ready(Step::Yield(expr)),
                        other => {
                            *parked = other;
                            context.set_status(RunStatus::Suspended);
                            context.register_cancel_waker(cx.waker());
                            Poll::Pending
                        }
                    }
                }
            }
        })
        .await;

        let expr = match step {
            Step::Yield(expr) => expr,
            Step::Complete(result) => return result,
            Step::Cancelled => return Err(Error::Cancelled),
        };

        context.set_status(RunStatus::Running);
        let resumed = match interpreter.dispatch(&expr) {
            Ok(Resolved::Ready(value)) => Ok(value),
            Ok(Resolved::Pending(pending)) => {
                context.set_status(RunStatus::Suspended);
                match context.until_cancelled(pending.future()).await {
                    Some(result) => result,
                    None => {
                        pending.cancel();
                        return Err(Error::Cancelled);
                    }
                }
            }
            Err(error) => Err(error),
        };

        if context.is_cancelled() {
            return Err(Error::Cancelled);
        }
        context.set_status(RunStatus::Running);
        *airlock.borrow_mut() = Airlock::Resumed(resumed);
    }
}

/// Run the body of `effect` for one call, including its handlers.
pub(crate) async fn run(effect: Effect, context: Rc<ExecutionContext>) -> Result<Value> {
    if context.is_cancelled() {
        // Never started: no handlers run.
        return Ok(Value::Undefined);
    }

    let options = effect.options().clone();
    let interpreter = Interpreter::new(Rc::clone(&context), options.state_resolver.clone());
    debug!(effect = effect.id(), call = context.id(), "effect call started");

    let outcome = match effect.body() {
        Body::Plain(body) => match body(context.payload()) {
            Ok(expr) => match interpreter.dispatch(&expr) {
                Ok(Resolved::Ready(value)) => Ok(value),
                Ok(Resolved::Pending(pending)) => {
                    context.set_status(RunStatus::Suspended);
                    match context.until_cancelled(pending.future()).await {
                        Some(result) => result,
                        None => {
                            pending.cancel();
                            Err(Error::Cancelled)
                        }
                    }
                }
                Err(error) => Err(error),
            },
            Err(error) => Err(error),
        },
        Body::Generator(body) => {
            let airlock = Rc::new(RefCell::new(Airlock::Idle));
            let co = Co {
                airlock: Rc::clone(&airlock),
                context: Rc::clone(&context),
            };
            let future = body(co, context.payload().clone());
            step_generator(&interpreter, future, airlock).await
        }
    };

    context.set_status(RunStatus::Running);
    let result = if context.is_cancelled() {
        debug!(effect = effect.id(), call = context.id(), "effect call cancelled");
        Ok(Value::Undefined)
    } else {
        match outcome {
            Ok(value) => match &options.success {
                Some(success) => interpreter.resolve(&success(&value)).await.map(|_| value),
                None => Ok(value),
            },
            Err(error) => match &options.error {
                Some(handler) => {
                    debug!(effect = effect.id(), %error, "effect call failed, running error handler");
                    interpreter.resolve(&handler(&error)).await
                }
                None => Err(error),
            },
        }
    };

    let result = match &options.done {
        Some(done) => match interpreter.resolve(&done()).await {
            Ok(_) => result,
            Err(error) => result.and(Err(error)),
        },
        None => result,
    };

    context.finish();
    debug!(effect = effect.id(), call = context.id(), ok = result.is_ok(), "effect call finished");
    result
}

