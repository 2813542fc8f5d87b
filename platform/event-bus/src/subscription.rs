//! # Subscriptions
//!
//! Handlers are registered under a pattern string and matched lazily against
//! each published event type:
//!
//! - exact: `billing.invoice.created` matches only itself
//! - `*` matches every event type
//! - `billing.*` matches anything under `billing.` at any depth
//!   (`billing.paid`, `billing.invoice.created`) but not `billing` itself
//!
//! Handler contract: a failed round re-invokes *every* matched handler, not
//! only the one that failed. Handlers must therefore be idempotent.

use crate::event::Event;
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Failure reported by a handler; drives the retry state machine
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(e: serde_json::Error) -> Self {
        Self::new(format!("payload deserialization failed: {}", e))
    }
}

impl From<Box<dyn std::error::Error + Send + Sync>> for HandlerError {
    fn from(e: Box<dyn std::error::Error + Send + Sync>) -> Self {
        Self::new(e.to_string())
    }
}

/// Reaction to published events
///
/// # Example
/// ```rust
/// use async_trait::async_trait;
/// use event_bus::{Event, EventHandler, HandlerError};
///
/// struct AuditWriter;
///
/// #[async_trait]
/// impl EventHandler for AuditWriter {
///     fn name(&self) -> &str {
///         "audit_writer"
///     }
///
///     async fn handle(&self, event: &Event) -> Result<(), HandlerError> {
///         if event.tenant_id().is_none() {
///             return Err(HandlerError::new("audit requires a tenant"));
///         }
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn handle(&self, event: &Event) -> Result<(), HandlerError>;
}

impl fmt::Debug for dyn EventHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventHandler({})", self.name())
    }
}

/// EventHandler wrapping an async closure
pub struct FnHandler<F> {
    name: String,
    f: F,
}

/// Build a handler from an async closure receiving an owned copy of the event
///
/// # Example
/// ```rust
/// use event_bus::{handler_fn, HandlerError};
///
/// let handler = handler_fn("noop", |_event| async { Ok::<(), HandlerError>(()) });
/// assert_eq!(handler.name(), "noop");
/// ```
pub fn handler_fn<F, Fut>(name: impl Into<String>, f: F) -> Arc<dyn EventHandler>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler {
        name: name.into(),
        f,
    })
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        (self.f)(event.clone()).await
    }
}

/// Whether a subscription `pattern` covers `event_type`
pub fn matches_pattern(pattern: &str, event_type: &str) -> bool {
    if pattern == "*" || pattern == event_type {
        return true;
    }

    match pattern.strip_suffix('*') {
        // "billing.*" -> "billing." must prefix a longer event type
        Some(prefix) if prefix.ends_with('.') => {
            event_type.len() > prefix.len() && event_type.starts_with(prefix)
        }
        _ => false,
    }
}

/// Pattern -> handlers, both in registration order
#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: Vec<(String, Vec<Arc<dyn EventHandler>>)>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under the exact `pattern` string
    pub fn subscribe(&mut self, pattern: &str, handler: Arc<dyn EventHandler>) {
        match self.entries.iter_mut().find(|(p, _)| p == pattern) {
            Some((_, handlers)) => handlers.push(handler),
            None => self.entries.push((pattern.to_string(), vec![handler])),
        }
    }

    /// Remove `handler` (by identity) from `pattern`
    ///
    /// # Returns
    /// * `true` if a registration was removed, `false` if there was none
    pub fn unsubscribe(&mut self, pattern: &str, handler: &Arc<dyn EventHandler>) -> bool {
        let Some(index) = self.entries.iter().position(|(p, _)| p == pattern) else {
            return false;
        };

        let handlers = &mut self.entries[index].1;
        let Some(position) = handlers.iter().position(|h| Arc::ptr_eq(h, handler)) else {
            return false;
        };
        handlers.remove(position);

        if handlers.is_empty() {
            self.entries.remove(index);
        }
        true
    }

    /// Every handler whose pattern matches `event_type`
    ///
    /// A handler registered under several matching patterns appears once per
    /// pattern.
    pub fn resolve(&self, event_type: &str) -> Vec<Arc<dyn EventHandler>> {
        self.entries
            .iter()
            .filter(|(pattern, _)| matches_pattern(pattern, event_type))
            .flat_map(|(_, handlers)| handlers.iter().cloned())
            .collect()
    }

    /// Total registrations across all patterns
    pub fn handler_count(&self) -> usize {
        self.entries.iter().map(|(_, handlers)| handlers.len()).sum()
    }

    pub fn patterns(&self) -> Vec<String> {
        self.entries.iter().map(|(p, _)| p.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(name: &str) -> Arc<dyn EventHandler> {
        handler_fn(name.to_string(), |_event| async { Ok::<(), HandlerError>(()) })
    }

    fn names(handlers: &[Arc<dyn EventHandler>]) -> Vec<String> {
        handlers.iter().map(|h| h.name().to_string()).collect()
    }

    #[test]
    fn test_pattern_matching() {
        // Exact match
        assert!(matches_pattern("billing.invoice.created", "billing.invoice.created"));
        assert!(!matches_pattern("billing.invoice.created", "billing.invoice.paid"));

        // Global wildcard
        assert!(matches_pattern("*", "customer.created"));
        assert!(matches_pattern("*", "single"));

        // Namespace wildcard at any depth
        assert!(matches_pattern("billing.*", "billing.invoice.created"));
        assert!(matches_pattern("billing.*", "billing.anything"));
        assert!(!matches_pattern("billing.*", "customer.created"));
        assert!(!matches_pattern("billing.*", "billing"));
        assert!(!matches_pattern("billing.*", "billingx.paid"));
        assert!(matches_pattern("billing.invoice.*", "billing.invoice.created"));
        assert!(!matches_pattern("billing.invoice.*", "billing.payment.created"));

        // "*" inside a pattern is not a wildcard
        assert!(!matches_pattern("billing*", "billing.paid"));
        assert!(!matches_pattern("*.created", "customer.created"));
    }

    #[test]
    fn test_resolve_collects_all_matching_patterns() {
        let mut registry = SubscriptionRegistry::new();
        registry.subscribe("billing.invoice.created", noop("exact"));
        registry.subscribe("billing.*", noop("namespace"));
        registry.subscribe("*", noop("global"));
        registry.subscribe("customer.*", noop("other"));

        let resolved = registry.resolve("billing.invoice.created");
        assert_eq!(names(&resolved), vec!["exact", "namespace", "global"]);

        let resolved = registry.resolve("customer.created");
        assert_eq!(names(&resolved), vec!["global", "other"]);
    }

    #[test]
    fn test_same_handler_under_two_patterns_resolves_twice() {
        let mut registry = SubscriptionRegistry::new();
        let handler = noop("shared");
        registry.subscribe("billing.*", handler.clone());
        registry.subscribe("*", handler.clone());

        let resolved = registry.resolve("billing.paid");
        assert_eq!(resolved.len(), 2);
        assert!(resolved.iter().all(|h| Arc::ptr_eq(h, &handler)));
    }

    #[test]
    fn test_unsubscribe() {
        let mut registry = SubscriptionRegistry::new();
        let first = noop("first");
        let second = noop("second");
        registry.subscribe("test.event", first.clone());
        registry.subscribe("test.event", second.clone());

        assert!(registry.unsubscribe("test.event", &first));
        assert_eq!(names(&registry.resolve("test.event")), vec!["second"]);

        // Already removed, wrong pattern, unknown pattern: all no-ops
        assert!(!registry.unsubscribe("test.event", &first));
        assert!(!registry.unsubscribe("test.*", &second));
        assert!(!registry.unsubscribe("missing", &second));

        assert!(registry.unsubscribe("test.event", &second));
        assert_eq!(registry.handler_count(), 0);
        assert!(registry.patterns().is_empty());
    }

    #[test]
    fn test_unsubscribe_matches_identity_not_name() {
        let mut registry = SubscriptionRegistry::new();
        let registered = noop("same-name");
        let lookalike = noop("same-name");
        registry.subscribe("test.event", registered);

        assert!(!registry.unsubscribe("test.event", &lookalike));
        assert_eq!(registry.handler_count(), 1);
    }

    #[test]
    fn test_handler_error_conversions() {
        assert_eq!(HandlerError::from("boom").message(), "boom");
        assert_eq!(HandlerError::from("boom".to_string()).to_string(), "boom");

        let json_err = serde_json::from_str::<u32>("nope").unwrap_err();
        assert!(HandlerError::from(json_err)
            .message()
            .starts_with("payload deserialization failed"));
    }
}
