//! Scoped validator cache.
//!
//! Memoizes configured [`RuleSet`] engines under caller-chosen keys for the
//! lifetime of the cache, and composes them with parent engines that apply
//! to every validation.

use std::any::Any;
use std::sync::Arc;

use dashmap::DashMap;

use crate::validation::{RuleSet, ValidationResult, Validator};

/// Errors from building a keyed engine.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("failed to configure validator for key '{key}'")]
    Configure {
        key: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Process-lifetime cache of keyed validation engines.
///
/// Each key maps to exactly one engine. The first caller to use a key builds
/// the engine and runs its `configure` callback while holding the entry's
/// shard lock, so concurrent first uses observe a single engine and a single
/// `configure` call. Lookups of populated keys take a shared lock only.
///
/// `configure` runs with the write lock of the key's `DashMap` shard held.
/// Calling back into the same cache from `configure` can deadlock for any
/// key that hashes to that shard, not only the key being configured, so
/// `configure` must not touch this cache at all.
#[derive(Debug, Default)]
pub struct ScopedValidator {
    engines: DashMap<String, Arc<RuleSet>>,
    parents: Vec<Arc<RuleSet>>,
}

impl ScopedValidator {
    /// Creates a cache whose `parents` run, in order, before every keyed engine.
    #[must_use]
    pub fn new(parents: Vec<Arc<RuleSet>>) -> Self {
        Self {
            engines: DashMap::new(),
            parents,
        }
    }

    /// Returns the engine for `key`, building and configuring it on first use.
    ///
    /// `configure` is ignored when the key is already populated.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Configure`] if `configure` fails. Nothing is
    /// stored in that case, so a later call retries construction.
    pub fn resolve<F>(&self, key: &str, configure: F) -> Result<Arc<RuleSet>, CacheError>
    where
        F: FnOnce(&mut RuleSet) -> anyhow::Result<()>,
    {
        if let Some(engine) = self.engines.get(key) {
            return Ok(Arc::clone(engine.value()));
        }

        let entry = self
            .engines
            .entry(key.to_string())
            .or_try_insert_with(|| {
                let mut engine = RuleSet::new();
                configure(&mut engine).map_err(|source| CacheError::Configure {
                    key: key.to_string(),
                    source,
                })?;
                tracing::debug!(key, "validator configured");
                Ok::<_, CacheError>(Arc::new(engine))
            })?;
        Ok(Arc::clone(entry.value()))
    }

    /// Validates `value` with every parent engine, then the engine for `key`.
    ///
    /// Stops at the first engine that reports violations and returns only
    /// that engine's violations.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the keyed engine had to be built and its
    /// `configure` callback failed.
    pub fn validate_with_parents<T, F>(
        &self,
        value: &T,
        key: &str,
        configure: F,
    ) -> Result<ValidationResult, CacheError>
    where
        T: Any,
        F: FnOnce(&mut RuleSet) -> anyhow::Result<()>,
    {
        let keyed = self.resolve(key, configure)?;
        Ok(first_failure(
            self.parents.iter().chain(std::iter::once(&keyed)),
            value,
        ))
    }

    /// Validates `value` with the parent engines only.
    #[must_use]
    pub fn validate_parents_only<T: Any>(&self, value: &T) -> ValidationResult {
        first_failure(self.parents.iter(), value)
    }

    /// Whether an engine has been built for `key`.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.engines.contains_key(key)
    }

    /// Number of keyed engines built so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.engines.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}

fn first_failure<'a, T: Any>(
    engines: impl Iterator<Item = &'a Arc<RuleSet>>,
    value: &T,
) -> ValidationResult {
    for engine in engines {
        let violations = engine.validate_dyn(value);
        if !violations.is_empty() {
            return ValidationResult::Invalid { violations };
        }
    }
    ValidationResult::Valid
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
