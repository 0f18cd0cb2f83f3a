//! Per-connection tracking of in-flight tool calls.
//!
//! The upstream announces a function call via `conversation.item.created`
//! before streaming its arguments; the relay records the call here so that
//! when the arguments are finalized it still knows which conversation item
//! preceded the call. The table is owned by exactly one connection session
//! and never shared.

use std::collections::HashMap;

/// One outstanding function call announced by the upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingToolCall {
    /// Call identifier assigned by the upstream.
    pub call_id: String,
    /// Identifier of the conversation item preceding the call.
    pub previous_item_id: Option<String>,
}

/// Table of in-flight tool calls keyed by call identifier.
#[derive(Debug, Default)]
pub struct PendingToolCalls {
    calls: HashMap<String, PendingToolCall>,
}

impl PendingToolCalls {
    /// Empty tracker for a fresh connection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a call. The first registration for a call identifier wins;
    /// duplicate announcements keep the original preceding-item reference.
    pub fn insert(&mut self, call_id: &str, previous_item_id: Option<String>) {
        self.calls
            .entry(call_id.to_string())
            .or_insert_with(|| PendingToolCall {
                call_id: call_id.to_string(),
                previous_item_id,
            });
    }

    /// Look up a call without removing it.
    pub fn get(&self, call_id: &str) -> Option<&PendingToolCall> {
        self.calls.get(call_id)
    }

    /// Remove and return a call.
    pub fn remove(&mut self, call_id: &str) -> Option<PendingToolCall> {
        self.calls.remove(call_id)
    }

    /// Discard every tracked call.
    pub fn clear(&mut self) {
        self.calls.clear();
    }

    /// Number of calls currently tracked.
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    /// Whether no calls are tracked.
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_remove() {
        let mut pending = PendingToolCalls::new();
        assert!(pending.is_empty());

        pending.insert("c1", Some("p0".to_string()));
        assert_eq!(pending.len(), 1);
        assert_eq!(
            pending.get("c1").unwrap().previous_item_id.as_deref(),
            Some("p0")
        );

        let call = pending.remove("c1").unwrap();
        assert_eq!(call.call_id, "c1");
        assert!(pending.is_empty());
        assert!(pending.remove("c1").is_none());
    }

    #[test]
    fn test_first_registration_wins() {
        let mut pending = PendingToolCalls::new();
        pending.insert("c1", Some("p0".to_string()));
        pending.insert("c1", Some("p9".to_string()));
        assert_eq!(pending.len(), 1);
        assert_eq!(
            pending.get("c1").unwrap().previous_item_id.as_deref(),
            Some("p0")
        );
    }

    #[test]
    fn test_clear() {
        let mut pending = PendingToolCalls::new();
        pending.insert("c1", None);
        pending.insert("c2", Some("p1".to_string()));
        assert_eq!(pending.len(), 2);
        pending.clear();
        assert!(pending.is_empty());
    }
}
