//! Per-call metadata supplied by the hosting server.

use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// TargetRef
// ---------------------------------------------------------------------------

/// Identity of the service object a call is dispatched to.
///
/// Equality and hashing use the address of the shared allocation, never the
/// value: two targets with identical contents are still different targets.
#[derive(Clone)]
pub struct TargetRef(Arc<dyn Any + Send + Sync>);

impl TargetRef {
    /// Wraps a shared service object.
    #[must_use]
    pub fn new<T: Any + Send + Sync>(target: Arc<T>) -> Self {
        Self(target)
    }

    fn addr(&self) -> *const () {
        Arc::as_ptr(&self.0).cast::<()>()
    }
}

impl PartialEq for TargetRef {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.addr(), other.addr())
    }
}

impl Eq for TargetRef {}

impl Hash for TargetRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl fmt::Debug for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TargetRef").field(&self.addr()).finish()
    }
}

impl<T: Any + Send + Sync> From<Arc<T>> for TargetRef {
    fn from(target: Arc<T>) -> Self {
        Self::new(target)
    }
}

// ---------------------------------------------------------------------------
// FilterSet
// ---------------------------------------------------------------------------

/// Targets whose calls bypass the logging interceptor.
///
/// Built once; there is no way to add or remove members afterwards. The set
/// keeps its targets alive, so a member's address cannot be reused by an
/// unrelated object.
#[derive(Debug, Clone, Default)]
pub struct FilterSet {
    targets: HashSet<TargetRef>,
}

impl FilterSet {
    /// Empty set: every call is logged.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn contains(&self, target: &TargetRef) -> bool {
        self.targets.contains(target)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

impl FromIterator<TargetRef> for FilterSet {
    fn from_iter<I: IntoIterator<Item = TargetRef>>(iter: I) -> Self {
        Self {
            targets: iter.into_iter().collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// CallInfo / InboundCall
// ---------------------------------------------------------------------------

/// What the server knows about a call before the handler runs.
#[derive(Debug, Clone)]
pub struct CallInfo {
    /// Fully-qualified method name, e.g. `/inventory.v1.Stock/Reserve`.
    pub method: Arc<str>,
    /// Service object the call is dispatched to.
    pub target: TargetRef,
}

impl CallInfo {
    #[must_use]
    pub fn new(method: impl Into<Arc<str>>, target: TargetRef) -> Self {
        Self {
            method: method.into(),
            target,
        }
    }
}

/// Request type seen by inbound interceptors.
///
/// `message` is the request for a unary call, or the stream handle for a
/// streaming call.
#[derive(Debug)]
pub struct InboundCall<T> {
    pub info: CallInfo,
    pub message: T,
}

impl<T> InboundCall<T> {
    #[must_use]
    pub fn new(info: CallInfo, message: T) -> Self {
        Self { info, message }
    }

    pub fn into_inner(self) -> T {
        self.message
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
