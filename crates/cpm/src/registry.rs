//! filter registry
//!
//! Lets one entity declare a filter and another reference it by [identity](crate::filter::identity).
//! Both may be created in the same run in any order, so [FilterRegistry::resolve] waits a bounded
//! amount of time for a missing identity to show up.
//!
//! The registry lives as long as the process (or whoever owns it). Share it by reference, usually
//! behind an [std::sync::Arc].
use crate::filter::FilterNode;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

/// How long [FilterRegistry::resolve] keeps looking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Lookups after the first one
    pub retries: u32,
    /// Sleep before each retry
    pub delay: Duration,
}

impl RetryPolicy {
    pub const DEFAULT_RETRIES: u32 = 10;
    pub const DEFAULT_DELAY: Duration = Duration::from_secs(1);

    pub fn new(retries: u32, delay: Duration) -> Self {
        Self { retries, delay }
    }

    /// Single lookup, fail immediately
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Total time spent sleeping when an identity never shows up
    pub fn worst_case(&self) -> Duration {
        self.delay * self.retries
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_RETRIES, Self::DEFAULT_DELAY)
    }
}

#[derive(Debug, Default)]
pub struct FilterRegistry {
    entries: RwLock<HashMap<String, FilterNode>>,
    retry: RetryPolicy,
}

impl FilterRegistry {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            entries: Default::default(),
            retry,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Insert or overwrite
    pub fn register(&self, identity: impl Into<String>, node: FilterNode) {
        let identity = identity.into();
        tracing::debug!(%identity, "registering filter");

        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(identity, node);
    }

    /// Register the normalized filter under its own identity
    pub fn register_filter(&self, node: FilterNode) -> String {
        let node = node.normalized();
        let identity = node.identity();
        self.register(identity.clone(), node);
        identity
    }

    /// Point-in-time lookup without retries
    pub fn get(&self, identity: &str) -> Option<FilterNode> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identity)
            .cloned()
    }

    /// Look up `identity`, retrying according to the [RetryPolicy]
    ///
    /// Blocks the calling thread for at most [RetryPolicy::worst_case]. The lock is never held
    /// while sleeping.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn resolve(&self, identity: &str) -> Result<FilterNode, FilterNotFoundError> {
        let mut attempts: u32 = 0;
        for retry in 0..=self.retry.retries {
            if retry > 0 {
                tracing::trace!(attempts, delay = ?self.retry.delay, "filter not registered yet");
                std::thread::sleep(self.retry.delay);
            }

            attempts = attempts.saturating_add(1);
            if let Some(node) = self.get(identity) {
                tracing::trace!(attempts, "filter resolved");
                return Ok(node);
            }
        }

        tracing::warn!(attempts, "filter not found");
        Err(FilterNotFoundError {
            identity: identity.to_string(),
            attempts,
        })
    }

    /// Remove an entry, absent identities are ignored
    pub fn remove(&self, identity: &str) -> Option<FilterNode> {
        let removed = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(identity);

        tracing::debug!(%identity, removed = removed.is_some(), "removing filter");
        removed
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error(
    "filter `{identity}` not found after {attempts} attempts; \
     make the entity referencing it depend on the entity declaring it"
)]
pub struct FilterNotFoundError {
    pub identity: String,
    pub attempts: u32,
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::filter::FilterKind;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::time::Instant;

    fn filter() -> FilterNode {
        FilterNode::and(vec![
            FilterNode::metadata("environment", "equals", "staging"),
            FilterNode::leaf(FilterKind::Kind, "equals", "Deployment"),
        ])
    }

    #[test]
    fn register_resolve_remove() {
        let registry = FilterRegistry::new(RetryPolicy::none());
        assert!(registry.is_empty());

        let identity = registry.register_filter(filter());
        assert_eq!(identity, filter().identity());
        assert_eq!(registry.resolve(&identity).unwrap(), filter());
        assert_eq!(registry.len(), 1);

        assert_eq!(registry.remove(&identity), Some(filter()));
        assert_eq!(registry.remove(&identity), None);
        assert!(registry.get(&identity).is_none());
    }

    #[test]
    fn register_overwrites() {
        let registry = FilterRegistry::new(RetryPolicy::none());
        registry.register("shared", filter());
        registry.register("shared", FilterNode::or(vec![]));

        assert_eq!(registry.resolve("shared").unwrap(), FilterNode::or(vec![]));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn resolve_waits_for_late_registration() {
        let registry = Arc::new(FilterRegistry::new(RetryPolicy::new(
            50,
            Duration::from_millis(10),
        )));
        let identity = filter().identity();

        let writer = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(60));
                registry.register_filter(filter())
            })
        };

        assert_eq!(registry.resolve(&identity).unwrap(), filter());
        assert_eq!(writer.join().unwrap(), identity);
    }

    #[test]
    fn resolve_uses_full_budget_before_failing() {
        let policy = RetryPolicy::new(3, Duration::from_millis(30));
        let registry = FilterRegistry::new(policy);

        let started = Instant::now();
        let err = registry.resolve("0123456789abcdef").unwrap_err();

        assert!(started.elapsed() >= policy.worst_case());
        assert_eq!(
            err,
            FilterNotFoundError {
                identity: "0123456789abcdef".into(),
                attempts: 4
            }
        );
        assert!(err.to_string().contains("depend on"));
    }

    #[test]
    fn register_filter_normalizes() {
        let registry = FilterRegistry::new(RetryPolicy::none());
        let mut leftover = filter();
        leftover.value = "leftover".into();

        let identity = registry.register_filter(leftover.clone());
        let decoded =
            crate::filter::decode(&crate::filter::encode(&leftover).unwrap()).unwrap();
        assert_eq!(identity, decoded.identity());
        assert_eq!(registry.resolve(&decoded.identity()).unwrap(), decoded);
    }

    #[test]
    fn unbounded_retries_do_not_overflow() {
        let registry = FilterRegistry::new(RetryPolicy::new(u32::MAX, Duration::ZERO));
        registry.register_filter(filter());
        assert_eq!(registry.resolve(&filter().identity()).unwrap(), filter());
    }

    #[test]
    fn default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.retries, 10);
        assert_eq!(policy.worst_case(), Duration::from_secs(10));
    }
}
