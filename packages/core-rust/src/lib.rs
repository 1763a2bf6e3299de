//! `rpcguard` Core: call outcome classification and the scoped validator cache.

pub mod outcome;
pub mod validation;
pub mod validator_cache;

pub use outcome::{classify, is_severe, CallOutcome};
pub use validation::{RuleSet, ValidationResult, Validator, ValidatorExt, Violation};
pub use validator_cache::{CacheError, ScopedValidator};
