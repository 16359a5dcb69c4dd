//! Effect Expressions
//!
//! The small algebra an effect body speaks. A body yields (or returns)
//! an [`Expr`] and the interpreter turns it into a state mutation, a nested
//! effect call, a function call or a suspension:
//!
//! | Expression          | Meaning                                             |
//! |---------------------|-----------------------------------------------------|
//! | `Apply(target, ..)` | set/update a state, call an effect, call a function |
//! | `Batch([..])`       | apply several; waits for all async results          |
//! | `Next(target)`      | wait for the target's next change or dispatch       |
//! | `Race({..})`        | wait for whichever named target fires first         |
//! | `All({..})`         | wait until every named target has fired in the call |
//! | `Return(value)`     | no effect; resolves to `value`                      |
//!
//! Applying without arguments forwards the call's payload: a state is set
//! to it and an effect is called with it. Reducers receive the state's
//! current value and the call's payload.

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use super::Effect;
use crate::error::Result;
use crate::reactive::{Family, State};
use crate::value::Value;

/// `(current, payload) -> next`
pub type Reducer = Rc<dyn Fn(Value, &Value) -> Result<Value>>;

/// A plain function target.
pub type Func = Rc<dyn Fn(&[Value]) -> Result<Value>>;

/// Something an expression can act on.
#[derive(Clone)]
pub enum Target {
    State(State),
    /// A family root. Resolved to a member through the effect's state
    /// resolver, or to the default member.
    Family(Family),
    Effect(Effect),
    Func(Func),
}

impl Target {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Self::State(_) => "state",
            Self::Family(_) => "family",
            Self::Effect(_) => "effect",
            Self::Func(_) => "function",
        }
    }
}

impl From<State> for Target {
    fn from(state: State) -> Self {
        Self::State(state)
    }
}

impl From<&State> for Target {
    fn from(state: &State) -> Self {
        Self::State(state.clone())
    }
}

impl From<Family> for Target {
    fn from(family: Family) -> Self {
        Self::Family(family)
    }
}

impl From<&Family> for Target {
    fn from(family: &Family) -> Self {
        Self::Family(family.clone())
    }
}

impl From<Effect> for Target {
    fn from(effect: Effect) -> Self {
        Self::Effect(effect)
    }
}

impl From<&Effect> for Target {
    fn from(effect: &Effect) -> Self {
        Self::Effect(effect.clone())
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::State(state) => write!(f, "State(#{})", state.id()),
            Self::Family(_) => f.write_str("Family"),
            Self::Effect(effect) => write!(f, "Effect(#{})", effect.id()),
            Self::Func(_) => f.write_str("Func"),
        }
    }
}

/// An argument to an application.
#[derive(Clone)]
pub enum Arg {
    Value(Value),
    Reducer(Reducer),
}

impl fmt::Debug for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => fmt::Debug::fmt(value, f),
            Self::Reducer(_) => f.write_str("Reducer"),
        }
    }
}

/// An expression for the effect interpreter.
#[derive(Clone, Debug)]
pub enum Expr {
    Apply(Target, Vec<Arg>),
    Batch(Vec<Expr>),
    Next(Target),
    Race(IndexMap<String, Target>),
    All(IndexMap<String, Target>),
    Return(Value),
}

impl Expr {
    /// Set a state, or call an effect or function, with `value`.
    pub fn set(target: impl Into<Target>, value: impl Into<Value>) -> Self {
        Self::Apply(target.into(), vec![Arg::Value(value.into())])
    }

    /// Apply `reducer(current, payload)` to a state.
    pub fn update<F>(target: impl Into<Target>, reducer: F) -> Self
    where
        F: Fn(Value, &Value) -> Result<Value> + 'static,
    {
        Self::Apply(target.into(), vec![Arg::Reducer(Rc::new(reducer))])
    }

    /// Call an effect with `payload`.
    pub fn call(effect: &Effect, payload: impl Into<Value>) -> Self {
        Self::set(effect, payload)
    }

    /// Call a plain function with `args`.
    pub fn invoke<F>(func: F, args: Vec<Value>) -> Self
    where
        F: Fn(&[Value]) -> Result<Value> + 'static,
    {
        Self::Apply(Target::Func(Rc::new(func)), args.into_iter().map(Arg::Value).collect())
    }

    /// Apply the target with the call's payload.
    pub fn forward(target: impl Into<Target>) -> Self {
        Self::Apply(target.into(), Vec::new())
    }

    pub fn batch(exprs: impl IntoIterator<Item = Expr>) -> Self {
        Self::Batch(exprs.into_iter().collect())
    }

    /// Wait for the target's next change or dispatch.
    pub fn next(target: impl Into<Target>) -> Self {
        Self::Next(target.into())
    }

    /// Wait for the first of the named targets to fire.
    pub fn race<K, T>(targets: impl IntoIterator<Item = (K, T)>) -> Self
    where
        K: Into<String>,
        T: Into<Target>,
    {
        Self::Race(targets.into_iter().map(|(k, t)| (k.into(), t.into())).collect())
    }

    /// Wait until every named target has fired during this call.
    pub fn all<K, T>(targets: impl IntoIterator<Item = (K, T)>) -> Self
    where
        K: Into<String>,
        T: Into<Target>,
    {
        Self::All(targets.into_iter().map(|(k, t)| (k.into(), t.into())).collect())
    }

    pub fn value(value: impl Into<Value>) -> Self {
        Self::Return(value.into())
    }

    /// A short description for errors and logs.
    pub(crate) fn describe(&self) -> String {
        match self {
            Self::Apply(target, args) => format!("apply {} with {} argument(s)", target.kind(), args.len()),
            Self::Batch(exprs) => format!("batch of {}", exprs.len()),
            Self::Next(target) => format!("next {}", target.kind()),
            Self::Race(targets) => format!("race over {}", targets.len()),
            Self::All(targets) => format!("all of {}", targets.len()),
            Self::Return(_) => "return".to_owned(),
        }
    }
}

impl From<Value> for Expr {
    fn from(value: Value) -> Self {
        Self::Return(value)
    }
}

impl From<()> for Expr {
    fn from(_: ()) -> Self {
        Self::Return(Value::Undefined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_produce_expected_shapes() {
        let count = Family::state(0);

        assert!(matches!(Expr::set(&count, 1), Expr::Apply(Target::Family(_), ref args) if args.len() == 1));
        assert!(matches!(
            Expr::update(count.default_member(), |v, _| Ok(v)),
            Expr::Apply(Target::State(_), ref args) if matches!(args[0], Arg::Reducer(_))
        ));
        assert!(matches!(Expr::forward(&count), Expr::Apply(_, ref args) if args.is_empty()));
        assert!(matches!(Expr::race([("a", &count)]), Expr::Race(ref t) if t.contains_key("a")));
        assert!(matches!(Expr::from(()), Expr::Return(Value::Undefined)));
    }

    #[test]
    fn descriptions_name_the_shape() {
        let func = Expr::invoke(|_| Ok(Value::Null), vec![Value::from(1), Value::from(2)]);
        assert_eq!(func.describe(), "apply function with 2 argument(s)");
        assert_eq!(Expr::next(Family::state(0)).describe(), "next family");
    }
}
