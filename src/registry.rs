//! Builtin dispatch table.
//!
//! Maps entry names to callables with an arity contract and a priority tier.
//! Operator symbols resolve to the shared operator-tier entries
//! ([`ARITHMETIC_ENTRY`] for `+ - * /`, [`COMPARISON_ENTRY`] for comparisons),
//! which receive the operator symbol as their last argument.
//!
//! Mutation is refused while an evaluation holds the registry (see
//! [`Registry::begin_evaluation`]).

use std::fmt;
use std::rc::Rc;

use crate::ast::BinaryOp;
use crate::error::{Code, Diagnostic, RegistryError};
use crate::evaluator::Evaluator;
use crate::value::Object;

pub const ARITHMETIC_ENTRY: &str = "binexp";
pub const COMPARISON_ENTRY: &str = "logic";

pub type NativeActivity = Rc<dyn Fn(&mut Evaluator, Vec<Object>) -> Diagnostic>;
/// Plugin callables hand back an owned, heap-allocated result.
pub type PluginActivity = Rc<dyn Fn(&mut Evaluator, Vec<Object>) -> Box<Diagnostic>>;

#[derive(Clone)]
pub enum Activity {
    Native(NativeActivity),
    Plugin(PluginActivity),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    /// Variable; the callee validates its own arguments.
    AutoSize,
    /// Not a valid entry.
    Undefined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Normal,
    BinaryOperator,
    Plugin,
}

#[derive(Clone)]
pub struct Entry {
    name: String,
    arity: Arity,
    tier: Tier,
    activity: Option<Activity>,
}

impl Entry {
    pub fn native(
        name: impl Into<String>,
        arity: usize,
        f: impl Fn(&mut Evaluator, Vec<Object>) -> Diagnostic + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            arity: Arity::Exact(arity),
            tier: Tier::Normal,
            activity: Some(Activity::Native(Rc::new(f))),
        }
    }

    pub fn variadic(
        name: impl Into<String>,
        f: impl Fn(&mut Evaluator, Vec<Object>) -> Diagnostic + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            arity: Arity::AutoSize,
            tier: Tier::Normal,
            activity: Some(Activity::Native(Rc::new(f))),
        }
    }

    /// Operator-tier entry. `arity` counts the operator symbol itself.
    pub fn operator(
        name: impl Into<String>,
        arity: usize,
        f: impl Fn(&mut Evaluator, Vec<Object>) -> Diagnostic + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            arity: Arity::Exact(arity),
            tier: Tier::BinaryOperator,
            activity: Some(Activity::Native(Rc::new(f))),
        }
    }

    pub fn plugin(
        name: impl Into<String>,
        f: impl Fn(&mut Evaluator, Vec<Object>) -> Box<Diagnostic> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            arity: Arity::AutoSize,
            tier: Tier::Plugin,
            activity: Some(Activity::Plugin(Rc::new(f))),
        }
    }

    pub fn with_arity(mut self, arity: Arity) -> Self {
        self.arity = arity;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> Arity {
        self.arity
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn is_good(&self) -> bool {
        self.activity.is_some() && self.arity != Arity::Undefined
    }

    /// Runs the callable after checking the arity contract. Plugin entries
    /// validate their own arguments.
    pub fn invoke(&self, evaluator: &mut Evaluator, args: Vec<Object>) -> Diagnostic {
        tracing::trace!(entry = %self.name, args = args.len(), "invoke");

        let activity = match (&self.activity, self.arity) {
            (Some(activity), arity) if arity != Arity::Undefined => activity,
            _ => {
                return Diagnostic::fatal(
                    Code::BrokenEntry,
                    format!("Illegal entry - {}", self.name),
                )
            }
        };

        if self.tier != Tier::Plugin {
            if let Arity::Exact(required) = self.arity {
                if args.len() != required {
                    return Diagnostic::fatal(
                        Code::IllegalArgs,
                        format!(
                            "Parameter count doesn't match - {} (expected {}, got {})",
                            self.name,
                            required,
                            args.len()
                        ),
                    );
                }
            }
        }

        match activity {
            Activity::Native(f) => f(evaluator, args),
            Activity::Plugin(f) => *f(evaluator, args),
        }
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("tier", &self.tier)
            .finish()
    }
}

/// Name of the operator-tier entry serving `op`.
pub fn operator_entry(op: BinaryOp) -> &'static str {
    if op.is_arithmetic() {
        ARITHMETIC_ENTRY
    } else {
        COMPARISON_ENTRY
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    entries: Vec<Entry>,
    in_flight: usize,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_idle(&self, name: &str) -> Result<(), RegistryError> {
        if self.in_flight > 0 {
            return Err(RegistryError::Busy {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    /// Inserts `entry`, replacing any entry with the same name.
    pub fn register(&mut self, entry: Entry) -> Result<(), RegistryError> {
        self.check_idle(entry.name())?;
        tracing::debug!(name = entry.name(), tier = ?entry.tier(), "register entry");
        self.entries.retain(|existing| existing.name() != entry.name());
        self.entries.push(entry);
        Ok(())
    }

    pub fn unregister(&mut self, name: &str) -> Result<bool, RegistryError> {
        self.check_idle(name)?;
        let before = self.entries.len();
        self.entries.retain(|entry| entry.name() != name);
        Ok(self.entries.len() != before)
    }

    /// Removes every entry of `tier`, returning how many went.
    pub fn unregister_tier(&mut self, tier: Tier) -> Result<usize, RegistryError> {
        self.check_idle(&format!("{:?} tier", tier))?;
        let before = self.entries.len();
        self.entries.retain(|entry| entry.tier() != tier);
        let removed = before - self.entries.len();
        if removed > 0 {
            tracing::debug!(?tier, removed, "unregistered tier");
        }
        Ok(removed)
    }

    /// Exact-name lookup; operator symbols map onto their operator-tier entry.
    pub fn resolve(&self, name: &str) -> Option<Entry> {
        // The closure lets the result borrow from `name` instead of being `'static`.
        let name = BinaryOp::from_symbol(name).map_or(name, |op| operator_entry(op));
        self.entries.iter().rev().find(|entry| entry.name() == name).cloned()
    }

    /// Arguments the evaluator must supply. For operator-tier entries the
    /// operator symbol is not counted.
    pub fn required_arity(&self, name: &str) -> Arity {
        match self.resolve(name) {
            Some(entry) => match (entry.tier(), entry.arity()) {
                (Tier::BinaryOperator, Arity::Exact(n)) => Arity::Exact(n.saturating_sub(1)),
                (_, arity) => arity,
            },
            None => Arity::Undefined,
        }
    }

    /// Whether `name` can be called by name from source code.
    pub fn is_callable(&self, name: &str) -> bool {
        BinaryOp::from_symbol(name).is_none()
            && self
                .resolve(name)
                .is_some_and(|entry| entry.tier() != Tier::BinaryOperator)
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(Entry::name).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn begin_evaluation(&mut self) {
        self.in_flight += 1;
    }

    pub fn end_evaluation(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn counting(name: &str, arity: usize, calls: Rc<Cell<usize>>) -> Entry {
        Entry::native(name, arity, move |_, _| {
            calls.set(calls.get() + 1);
            Diagnostic::success()
        })
    }

    #[test]
    fn arity_mismatch_does_not_invoke() {
        let calls = Rc::new(Cell::new(0));
        let entry = counting("pair", 2, calls.clone());
        let mut evaluator = Evaluator::new();

        let short = entry.invoke(&mut evaluator, vec![Object::int(1)]);
        assert!(short.is_fatal());
        assert_eq!(short.code, Code::IllegalArgs);

        let long = entry.invoke(
            &mut evaluator,
            vec![Object::int(1), Object::int(2), Object::int(3)],
        );
        assert_eq!(long.code, Code::IllegalArgs);
        assert_eq!(calls.get(), 0);

        let exact = entry.invoke(&mut evaluator, vec![Object::int(1), Object::int(2)]);
        assert!(exact.is_success());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn undefined_arity_is_a_broken_entry() {
        let calls = Rc::new(Cell::new(0));
        let entry = counting("broken", 1, calls.clone()).with_arity(Arity::Undefined);
        let mut evaluator = Evaluator::new();

        let result = entry.invoke(&mut evaluator, vec![Object::int(1)]);
        assert_eq!(result.code, Code::BrokenEntry);
        assert!(!entry.is_good());
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn plugin_entries_skip_the_arity_check() {
        let entry = Entry::plugin("count", |_, args| {
            Box::new(Diagnostic::with_object(Object::int(args.len() as i64)))
        });
        let mut evaluator = Evaluator::new();
        let result = entry.invoke(&mut evaluator, vec![Object::null(); 5]);
        assert_eq!(result.value.map(|v| v.cast::<i64>()), Some(Ok(5)));
    }

    #[test]
    fn last_registration_wins() {
        let mut registry = Registry::new();
        registry
            .register(Entry::native("f", 1, |_, _| Diagnostic::success()))
            .expect("register");
        registry
            .register(Entry::native("f", 3, |_, _| Diagnostic::success()))
            .expect("register");
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.required_arity("f"), Arity::Exact(3));
        assert_eq!(registry.required_arity("missing"), Arity::Undefined);
    }

    #[test]
    fn operator_symbols_resolve_to_operator_entries() {
        let mut registry = Registry::new();
        registry
            .register(Entry::operator(ARITHMETIC_ENTRY, 3, |_, _| Diagnostic::success()))
            .expect("register");
        registry
            .register(Entry::operator(COMPARISON_ENTRY, 3, |_, _| Diagnostic::success()))
            .expect("register");

        for symbol in ["+", "-", "*", "/"] {
            assert_eq!(
                registry.resolve(symbol).map(|e| e.name().to_string()),
                Some(ARITHMETIC_ENTRY.to_string())
            );
            assert_eq!(registry.required_arity(symbol), Arity::Exact(2));
        }
        assert_eq!(
            registry.resolve("<=").map(|e| e.name().to_string()),
            Some(COMPARISON_ENTRY.to_string())
        );
        assert!(!registry.is_callable("+"));
        assert!(!registry.is_callable(ARITHMETIC_ENTRY));
    }

    #[test]
    fn resolve_accepts_borrowed_names() {
        let mut registry = Registry::new();
        registry
            .register(Entry::native("shout", 1, |_, _| Diagnostic::success()))
            .expect("register");

        let typed = String::from("shout");
        assert_eq!(registry.resolve(&typed).map(|e| e.name().to_string()), Some(typed.clone()));
        let unknown = String::from("whisper");
        assert!(registry.resolve(&unknown).is_none());
    }

    #[test]
    fn plugin_tier_can_be_unloaded_in_one_go() {
        let mut registry = Registry::new();
        registry
            .register(Entry::native("keep", 0, |_, _| Diagnostic::success()))
            .expect("register");
        for name in ["p1", "p2"] {
            registry
                .register(Entry::plugin(name, |_, _| Box::new(Diagnostic::success())))
                .expect("register");
        }

        assert_eq!(registry.unregister_tier(Tier::Plugin), Ok(2));
        assert_eq!(registry.names(), vec!["keep"]);
        assert_eq!(registry.unregister("keep"), Ok(true));
        assert_eq!(registry.unregister("keep"), Ok(false));
    }

    #[test]
    fn mutation_is_refused_during_evaluation() {
        let mut registry = Registry::new();
        registry.begin_evaluation();
        let error = registry
            .register(Entry::native("late", 0, |_, _| Diagnostic::success()))
            .expect_err("busy");
        assert_eq!(
            error,
            RegistryError::Busy {
                name: "late".to_string()
            }
        );
        assert!(registry.unregister_tier(Tier::Plugin).is_err());

        registry.end_evaluation();
        assert!(!registry.is_busy());
        assert!(registry
            .register(Entry::native("late", 0, |_, _| Diagnostic::success()))
            .is_ok());
    }
}
