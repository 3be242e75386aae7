//! Bounded conversation cache keyed by thread id.

use super::Conversation;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError};

/// A conversation shared between the handlers of one thread.
pub type SharedConversation = Arc<tokio::sync::Mutex<Conversation>>;

/// Thread id → conversation, bounded at a fixed number of entries.
///
/// Lookups never refresh an entry, so once full the earliest inserted
/// conversation is the one evicted.
pub struct ConversationCache {
    entries: Mutex<LruCache<String, SharedConversation>>,
}

impl ConversationCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Insert a conversation, evicting the oldest one when full.
    pub fn add(&self, key: &str, conversation: Conversation) -> SharedConversation {
        let shared = Arc::new(tokio::sync::Mutex::new(conversation));
        let evicted = self
            .lock()
            .push(key.to_string(), shared.clone());
        if let Some((evicted_key, _)) = evicted.filter(|(k, _)| k != key) {
            tracing::debug!(thread_id = %evicted_key, "Evicted conversation from cache");
        }
        shared
    }

    /// Insert `conversation` unless `key` is already cached. Returns the
    /// cached entry and whether it is the one just inserted.
    pub fn get_or_add(&self, key: &str, conversation: Conversation) -> (SharedConversation, bool) {
        let mut entries = self.lock();
        if let Some(existing) = entries.peek(key) {
            return (existing.clone(), false);
        }
        let shared = Arc::new(tokio::sync::Mutex::new(conversation));
        if let Some((evicted_key, _)) = entries.push(key.to_string(), shared.clone()) {
            tracing::debug!(thread_id = %evicted_key, "Evicted conversation from cache");
        }
        (shared, true)
    }

    pub fn get(&self, key: &str) -> Option<SharedConversation> {
        self.lock().peek(key).cloned()
    }

    pub fn remove(&self, key: &str) -> Option<SharedConversation> {
        self.lock().pop(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.lock().cap().get()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<String, SharedConversation>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Turn;

    fn conversation(prompt: &str) -> Conversation {
        Conversation::new("gpt-3.5-turbo").with_turn(Turn::user(prompt))
    }

    #[test]
    fn test_evicts_earliest_inserted() {
        let cache = ConversationCache::new(2);
        cache.add("A", conversation("a"));
        cache.add("B", conversation("b"));
        cache.add("C", conversation("c"));
        assert!(cache.get("A").is_none());
        assert!(cache.get("B").is_some());
        assert!(cache.get("C").is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_get_does_not_refresh() {
        let cache = ConversationCache::new(2);
        cache.add("A", conversation("a"));
        cache.add("B", conversation("b"));
        assert!(cache.get("A").is_some());
        cache.add("C", conversation("c"));
        assert!(cache.get("A").is_none());
        assert!(cache.get("B").is_some());
    }

    #[test]
    fn test_remove_and_zero_capacity() {
        let cache = ConversationCache::new(0);
        assert_eq!(cache.capacity(), 1);
        cache.add("A", conversation("a"));
        assert!(cache.remove("A").is_some());
        assert!(cache.remove("A").is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_entries_are_shared() {
        let cache = ConversationCache::new(4);
        let first = cache.add("T", conversation("hi"));
        first.lock().await.push(Turn::assistant("hello"));
        let again = cache.get("T").unwrap();
        assert_eq!(again.lock().await.turns.len(), 2);
    }

    #[tokio::test]
    async fn test_get_or_add_keeps_existing_entry() {
        let cache = ConversationCache::new(4);
        let (first, inserted) = cache.get_or_add("T", conversation("hi"));
        assert!(inserted);
        first.lock().await.push(Turn::assistant("hello"));

        let (second, inserted) = cache.get_or_add("T", conversation("rebuilt"));
        assert!(!inserted);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.lock().await.turns.len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_get_or_add_shares_one_entry() {
        let cache = Arc::new(ConversationCache::new(4));
        let mut tasks = Vec::new();
        for i in 0..16 {
            let cache = cache.clone();
            tasks.push(tokio::spawn(async move {
                let (shared, inserted) = cache.get_or_add("T", conversation("x"));
                shared.lock().await.push(Turn::assistant(format!("answer {i}")));
                inserted
            }));
        }
        let mut inserted = 0;
        for task in tasks {
            if task.await.unwrap() {
                inserted += 1;
            }
        }
        assert_eq!(inserted, 1);
        let shared = cache.get("T").unwrap();
        assert_eq!(shared.lock().await.turns.len(), 17);
    }

    #[tokio::test]
    async fn test_concurrent_adds_stay_bounded() {
        let cache = Arc::new(ConversationCache::new(8));
        let mut tasks = Vec::new();
        for i in 0..32 {
            let cache = cache.clone();
            tasks.push(tokio::spawn(async move {
                cache.add(&format!("t-{i}"), conversation("x"));
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(cache.len(), 8);
    }
}
