//! Validation engine contract and the default rule-set engine.
//!
//! A [`RuleSet`] holds field-level rules registered per value type. Values
//! of a type with no registered rules pass validation.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A single field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// Name of the offending field.
    pub field: String,
    /// Name of the rule that rejected it (e.g. `"required"`).
    pub rule: String,
    /// Human-readable description of the failure.
    pub message: String,
}

impl Violation {
    #[must_use]
    pub fn new(
        field: impl Into<String>,
        rule: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            rule: rule.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed '{}': {}", self.field, self.rule, self.message)
    }
}

/// Result of validating a value against one or more engines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    /// The value conforms to every applied rule.
    Valid,
    /// The value violates one or more rules of a single engine.
    Invalid {
        /// Violations reported by the first engine that rejected the value.
        violations: Vec<Violation>,
    },
}

impl ValidationResult {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    #[must_use]
    pub fn violations(&self) -> &[Violation] {
        match self {
            Self::Valid => &[],
            Self::Invalid { violations } => violations,
        }
    }

    fn from_violations(violations: Vec<Violation>) -> Self {
        if violations.is_empty() {
            Self::Valid
        } else {
            Self::Invalid { violations }
        }
    }
}

/// Opaque validation engine: validates a value, returning zero or more violations.
pub trait Validator: Send + Sync {
    /// Validates a type-erased value. An empty vector means the value passed.
    fn validate_dyn(&self, value: &dyn Any) -> Vec<Violation>;
}

/// Typed convenience entry point for every [`Validator`].
pub trait ValidatorExt: Validator {
    fn validate<T: Any>(&self, value: &T) -> ValidationResult {
        ValidationResult::from_violations(self.validate_dyn(value))
    }
}

impl<V: Validator + ?Sized> ValidatorExt for V {}

type Check = Box<dyn Fn(&dyn Any) -> Option<Violation> + Send + Sync>;

/// Closure-based rule set keyed by value type.
///
/// Rules are installed through [`RuleSet::rule`] while the set is still
/// mutable (inside a cache `configure` callback); once shared the set is
/// read-only.
#[derive(Default)]
pub struct RuleSet {
    rules: HashMap<TypeId, Vec<Check>>,
}

impl RuleSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a rule for values of type `T`.
    ///
    /// `check` returns `Some(message)` when `field` violates `rule`. Rules
    /// for the same type run in registration order and all of them report.
    pub fn rule<T, F>(&mut self, field: &'static str, rule: &'static str, check: F) -> &mut Self
    where
        T: Any,
        F: Fn(&T) -> Option<String> + Send + Sync + 'static,
    {
        let erased: Check = Box::new(move |value: &dyn Any| {
            let value = value.downcast_ref::<T>()?;
            check(value).map(|message| Violation::new(field, rule, message))
        });
        self.rules.entry(TypeId::of::<T>()).or_default().push(erased);
        self
    }

    /// Shorthand for a rule that rejects empty strings.
    pub fn required<T, F>(&mut self, field: &'static str, get: F) -> &mut Self
    where
        T: Any,
        F: Fn(&T) -> &str + Send + Sync + 'static,
    {
        self.rule(field, "required", move |value: &T| {
            get(value)
                .trim()
                .is_empty()
                .then(|| format!("{field} is required"))
        })
    }

    /// Number of rules registered for `T`.
    #[must_use]
    pub fn rule_count<T: Any>(&self) -> usize {
        self.rules.get(&TypeId::of::<T>()).map_or(0, Vec::len)
    }
}

impl Validator for RuleSet {
    fn validate_dyn(&self, value: &dyn Any) -> Vec<Violation> {
        let Some(checks) = self.rules.get(&value.type_id()) else {
            return Vec::new();
        };
        checks.iter().filter_map(|check| check(value)).collect()
    }
}

impl fmt::Debug for RuleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleSet")
            .field("types", &self.rules.len())
            .field("rules", &self.rules.values().map(Vec::len).sum::<usize>())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
