//! Ordered-strategy fallback resolution.
//!
//! A [`FallbackChain`] tries each named strategy in order. A strategy succeeds
//! only when it produces a value and that value passes its validator; the
//! first success wins and later strategies are never run. When every strategy
//! fails, the chain yields the caller's declared unknown value.

use tracing::{debug, trace};

type Probe<'a, T> = Box<dyn FnOnce() -> Option<T> + 'a>;
type Validator<'a, T> = Box<dyn Fn(&T) -> bool + 'a>;

struct Strategy<'a, T> {
    name: &'static str,
    probe: Probe<'a, T>,
    accept: Validator<'a, T>,
}

/// Outcome of running a [`FallbackChain`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution<T> {
    /// A strategy produced an accepted value.
    Resolved { strategy: &'static str, value: T },
    /// Every strategy failed.
    Unknown,
}

impl<T> Resolution<T> {
    pub fn value(self) -> Option<T> {
        match self {
            Resolution::Resolved { value, .. } => Some(value),
            Resolution::Unknown => None,
        }
    }

    /// Name of the strategy that produced the value.
    pub fn strategy(&self) -> Option<&'static str> {
        match self {
            Resolution::Resolved { strategy, .. } => Some(*strategy),
            Resolution::Unknown => None,
        }
    }

    pub fn unwrap_or(self, unknown: T) -> T {
        self.value().unwrap_or(unknown)
    }
}

/// An ordered list of strategies for resolving one attribute.
pub struct FallbackChain<'a, T> {
    attribute: &'static str,
    strategies: Vec<Strategy<'a, T>>,
}

impl<'a, T: 'a> FallbackChain<'a, T> {
    /// Start an empty chain for the named attribute (used in diagnostics).
    pub fn new(attribute: &'static str) -> Self {
        Self {
            attribute,
            strategies: Vec::new(),
        }
    }

    /// Add a strategy whose every present value is accepted.
    pub fn then<F>(self, name: &'static str, probe: F) -> Self
    where
        F: FnOnce() -> Option<T> + 'a,
    {
        self.then_validated(name, probe, |_| true)
    }

    /// Add a strategy with its own validator.
    pub fn then_validated<F, V>(mut self, name: &'static str, probe: F, accept: V) -> Self
    where
        F: FnOnce() -> Option<T> + 'a,
        V: Fn(&T) -> bool + 'a,
    {
        self.strategies.push(Strategy {
            name,
            probe: Box::new(probe),
            accept: Box::new(accept),
        });
        self
    }

    /// Run the strategies in order until one succeeds.
    pub fn resolve(self) -> Resolution<T> {
        for strategy in self.strategies {
            match (strategy.probe)() {
                Some(value) if (strategy.accept)(&value) => {
                    debug!(
                        attribute = self.attribute,
                        strategy = strategy.name,
                        "Resolved attribute"
                    );
                    return Resolution::Resolved {
                        strategy: strategy.name,
                        value,
                    };
                }
                Some(_) => trace!(
                    attribute = self.attribute,
                    strategy = strategy.name,
                    "Strategy value rejected"
                ),
                None => trace!(
                    attribute = self.attribute,
                    strategy = strategy.name,
                    "Strategy produced nothing"
                ),
            }
        }
        debug!(attribute = self.attribute, "All strategies exhausted");
        Resolution::Unknown
    }

    /// Run the chain, substituting `unknown` on exhaustion.
    pub fn resolve_or(self, unknown: T) -> T {
        self.resolve().unwrap_or(unknown)
    }
}

/// Validator for strings: non-empty after trimming and not a vendor
/// placeholder such as "To Be Filled By O.E.M." or "Not Specified".
pub fn meaningful_string<S: AsRef<str>>(value: &S) -> bool {
    let v = value.as_ref().trim();
    if v.is_empty() {
        return false;
    }
    let lower = v.to_ascii_lowercase();
    const PLACEHOLDERS: [&str; 8] = [
        "unknown",
        "none",
        "n/a",
        "default string",
        "not specified",
        "not applicable",
        "to be filled by o.e.m.",
        "0",
    ];
    !PLACEHOLDERS.contains(&lower.as_str())
        && !lower.chars().all(|c| c == '0' || c == ' ' || c == 'f' || c == ':')
}
