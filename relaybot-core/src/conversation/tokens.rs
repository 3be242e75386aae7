//! Token budgeting.
//!
//! Counts how many prompt tokens a conversation costs for a model and trims
//! the oldest turns until it fits under the model's truncate limit. Counts
//! are advisory: a model without a known accounting scheme or limit is never
//! truncated.

use super::Conversation;
use crate::types::Turn;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tiktoken_rs::CoreBPE;

/// Every reply is primed with `<|start|>assistant<|message|>`.
pub const REPLY_PRIMING_TOKENS: i64 = 3;

/// Counts tokens in a piece of text as a given model would.
pub trait Tokenizer: Send + Sync {
    fn count(&self, text: &str, model: &str) -> usize;
}

/// BPE tokenizer backed by `tiktoken-rs`.
///
/// Encoders are built once per model and reused. Models `tiktoken-rs` does
/// not know fall back to `cl100k_base`.
#[derive(Default)]
pub struct TiktokenTokenizer {
    encoders: Mutex<HashMap<String, Option<Arc<CoreBPE>>>>,
}

impl TiktokenTokenizer {
    pub fn new() -> Self {
        Self::default()
    }

    fn encoder(&self, model: &str) -> Option<Arc<CoreBPE>> {
        let mut encoders = self.encoders.lock().unwrap_or_else(PoisonError::into_inner);
        encoders
            .entry(model.to_string())
            .or_insert_with(|| {
                tiktoken_rs::get_bpe_from_model(model)
                    .or_else(|_| tiktoken_rs::cl100k_base())
                    .map(Arc::new)
                    .map_err(|e| tracing::warn!(model, error = %e, "No BPE encoder available"))
                    .ok()
            })
            .clone()
    }
}

impl Tokenizer for TiktokenTokenizer {
    fn count(&self, text: &str, model: &str) -> usize {
        match self.encoder(model) {
            Some(bpe) => bpe.encode_with_special_tokens(text).len(),
            // Rough estimate when no encoder can be loaded at all.
            None => text.len().div_ceil(4),
        }
    }
}

/// Per-message overhead of a chat model's prompt format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenScheme {
    pub tokens_per_message: i64,
    /// Added when a turn carries a name. Negative where the name replaces the role.
    pub tokens_per_name: i64,
}

const LEGACY_SCHEME: TokenScheme = TokenScheme {
    tokens_per_message: 4,
    tokens_per_name: -1,
};

const CHAT_SCHEME: TokenScheme = TokenScheme {
    tokens_per_message: 3,
    tokens_per_name: 1,
};

fn default_schemes() -> HashMap<String, TokenScheme> {
    let mut schemes = HashMap::new();
    schemes.insert("gpt-3.5-turbo-0301".to_string(), LEGACY_SCHEME);
    for model in [
        "gpt-3.5-turbo",
        "gpt-3.5-turbo-0613",
        "gpt-3.5-turbo-16k",
        "gpt-3.5-turbo-16k-0613",
        "gpt-4",
        "gpt-4-0314",
        "gpt-4-0613",
        "gpt-4-32k",
        "gpt-4-32k-0314",
        "gpt-4-32k-0613",
    ] {
        schemes.insert(model.to_string(), CHAT_SCHEME);
    }
    schemes
}

fn default_limits() -> HashMap<String, usize> {
    [
        ("gpt-3.5-turbo", 3_500),
        ("gpt-3.5-turbo-0301", 3_500),
        ("gpt-4", 6_500),
        ("gpt-4-0314", 6_500),
        ("gpt-4-32k", 30_500),
        ("gpt-4-32k-0314", 30_500),
    ]
    .into_iter()
    .map(|(model, limit)| (model.to_string(), limit))
    .collect()
}

/// Computes conversation token costs and enforces per-model ceilings.
pub struct TokenBudget {
    tokenizer: Arc<dyn Tokenizer>,
    schemes: HashMap<String, TokenScheme>,
    limits: HashMap<String, usize>,
}

impl TokenBudget {
    /// Budget with the built-in schemes and truncate limits.
    pub fn new(tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self {
            tokenizer,
            schemes: default_schemes(),
            limits: default_limits(),
        }
    }

    /// Set or override the truncate limit of a model.
    pub fn with_limit(mut self, model: impl Into<String>, limit: usize) -> Self {
        self.limits.insert(model.into(), limit);
        self
    }

    pub fn with_limits(mut self, limits: impl IntoIterator<Item = (String, usize)>) -> Self {
        self.limits.extend(limits);
        self
    }

    pub fn with_scheme(mut self, model: impl Into<String>, scheme: TokenScheme) -> Self {
        self.schemes.insert(model.into(), scheme);
        self
    }

    pub fn scheme(&self, model: &str) -> Option<TokenScheme> {
        self.schemes.get(model).copied()
    }

    /// Tokens one turn costs, or `None` for an unknown model.
    pub fn count_tokens(&self, turn: &Turn, model: &str) -> Option<usize> {
        let scheme = self.scheme(model)?;
        Some(self.count_with(scheme, turn, model).max(0) as usize)
    }

    fn count_with(&self, scheme: TokenScheme, turn: &Turn, model: &str) -> i64 {
        let mut tokens = scheme.tokens_per_message;
        tokens += self.tokenizer.count(&turn.content, model) as i64;
        tokens += self.tokenizer.count(turn.role.as_str(), model) as i64;
        if let Some(name) = turn.name.as_deref().filter(|n| !n.is_empty()) {
            tokens += scheme.tokens_per_name;
            tokens += self.tokenizer.count(name, model) as i64;
        }
        tokens
    }

    /// Tokens the whole prompt costs including reply priming.
    pub fn count_all(&self, system: Option<&Turn>, turns: &[Turn], model: &str) -> Option<usize> {
        let scheme = self.scheme(model)?;
        let total: i64 = turns
            .iter()
            .chain(system)
            .map(|turn| self.count_with(scheme, turn, model))
            .sum::<i64>()
            + REPLY_PRIMING_TOKENS;
        Some(total.max(0) as usize)
    }

    pub fn truncate_limit(&self, model: &str) -> Option<usize> {
        self.limits.get(model).copied()
    }

    /// Recount `conversation` and compare it against its model's limit.
    ///
    /// Updates the cached token count. Unknown models always fit and
    /// report a count of zero.
    pub fn is_within_limit(&self, conversation: &mut Conversation) -> (bool, usize) {
        let Some(limit) = self.truncate_limit(&conversation.model) else {
            return (true, 0);
        };
        let Some(count) = self.count_all(
            conversation.system.as_ref(),
            &conversation.turns,
            &conversation.model,
        ) else {
            return (true, 0);
        };
        conversation.token_count = count;
        (count <= limit, count)
    }

    /// Drop oldest turns while the cached count exceeds the model's limit.
    ///
    /// Stops early, keeping the remaining turns, when the limit or a turn's
    /// cost cannot be determined or no turns are left.
    pub fn adjust(&self, conversation: &mut Conversation) {
        let Some(limit) = self.truncate_limit(&conversation.model) else {
            return;
        };
        while conversation.token_count > limit {
            let Some(oldest) = conversation.turns.first() else {
                return;
            };
            let Some(removed) = self.count_tokens(oldest, &conversation.model) else {
                return;
            };
            conversation.turns.remove(0);
            conversation.token_count = conversation.token_count.saturating_sub(removed);
            tracing::debug!(
                model = %conversation.model,
                removed,
                token_count = conversation.token_count,
                limit,
                "Truncated oldest turn"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One token per whitespace-separated word.
    struct WordTokenizer;

    impl Tokenizer for WordTokenizer {
        fn count(&self, text: &str, _model: &str) -> usize {
            text.split_whitespace().count()
        }
    }

    fn budget() -> TokenBudget {
        TokenBudget::new(Arc::new(WordTokenizer))
    }

    /// A user turn that measures exactly `tokens` under the chat scheme.
    fn turn_of(tokens: usize) -> Turn {
        // 3 per message + 1 for the role.
        Turn::user(vec!["w"; tokens - 4].join(" "))
    }

    #[test]
    fn test_count_tokens_chat_scheme() {
        let budget = budget();
        let turn = Turn::user("hello there world");
        assert_eq!(budget.count_tokens(&turn, "gpt-4"), Some(3 + 3 + 1));
        let named = turn.with_name("alice");
        assert_eq!(budget.count_tokens(&named, "gpt-4"), Some(3 + 3 + 1 + 1 + 1));
    }

    #[test]
    fn test_count_tokens_legacy_scheme_name_replaces_role() {
        let budget = budget();
        let named = Turn::user("hi").with_name("bob");
        assert_eq!(budget.count_tokens(&named, "gpt-3.5-turbo-0301"), Some(4 + 1 + 1 - 1 + 1));
    }

    #[test]
    fn test_unknown_model_has_no_count_or_limit() {
        let budget = budget();
        assert_eq!(budget.count_tokens(&Turn::user("hi"), "llama-70b"), None);
        assert_eq!(budget.count_all(None, &[Turn::user("hi")], "llama-70b"), None);
        assert_eq!(budget.truncate_limit("llama-70b"), None);
    }

    #[test]
    fn test_count_all_includes_system_and_priming() {
        let budget = budget();
        let system = Turn::system("be brief");
        let turns = vec![Turn::user("hi")];
        // system: 3 + 2 + 1, user: 3 + 1 + 1, priming: 3
        assert_eq!(budget.count_all(Some(&system), &turns, "gpt-4"), Some(6 + 5 + 3));
    }

    #[test]
    fn test_limits() {
        let budget = budget().with_limit("gpt-4", 8_000);
        assert_eq!(budget.truncate_limit("gpt-3.5-turbo"), Some(3_500));
        assert_eq!(budget.truncate_limit("gpt-4"), Some(8_000));
        assert_eq!(budget.truncate_limit("gpt-4-32k-0314"), Some(30_500));
        assert_eq!(budget.truncate_limit("gpt-3.5-turbo-16k"), None);
    }

    #[test]
    fn test_is_within_limit_updates_count() {
        let budget = budget().with_limit("gpt-4", 10);
        let mut conversation = Conversation::new("gpt-4").with_turn(turn_of(5));
        assert_eq!(budget.is_within_limit(&mut conversation), (true, 8));
        assert_eq!(conversation.token_count, 8);

        conversation.push(turn_of(5));
        assert_eq!(budget.is_within_limit(&mut conversation), (false, 13));
        assert_eq!(conversation.token_count, 13);
    }

    #[test]
    fn test_is_within_limit_unknown_model() {
        let budget = budget();
        let mut conversation = Conversation::new("mystery").with_turn(Turn::user("hi"));
        conversation.token_count = 42;
        assert_eq!(budget.is_within_limit(&mut conversation), (true, 0));
        assert_eq!(conversation.token_count, 42);
    }

    #[test]
    fn test_adjust_drops_oldest_until_within_limit() {
        let budget = budget().with_limit("gpt-4", 100);
        let mut conversation = Conversation::new("gpt-4")
            .with_turn(turn_of(40))
            .with_turn(turn_of(30))
            .with_turn(turn_of(50));
        conversation.token_count = 120;
        budget.adjust(&mut conversation);
        assert_eq!(conversation.turns.len(), 2);
        assert_eq!(conversation.token_count, 80);
        assert_eq!(conversation.turns[0], turn_of(30));
    }

    #[test]
    fn test_adjust_within_limit_is_noop() {
        let budget = budget().with_limit("gpt-4", 100);
        let mut conversation = Conversation::new("gpt-4").with_turn(turn_of(40));
        conversation.token_count = 100;
        let before = conversation.clone();
        budget.adjust(&mut conversation);
        assert_eq!(conversation, before);
    }

    #[test]
    fn test_adjust_stops_when_turns_run_out() {
        let budget = budget().with_limit("gpt-4", 10);
        let mut conversation = Conversation::new("gpt-4").with_turn(turn_of(5));
        conversation.token_count = 500;
        budget.adjust(&mut conversation);
        assert!(conversation.turns.is_empty());
        assert_eq!(conversation.token_count, 495);
    }

    #[test]
    fn test_adjust_unknown_scheme_keeps_turns() {
        let budget = budget().with_limit("custom-model", 10);
        let mut conversation = Conversation::new("custom-model").with_turn(Turn::user("hi"));
        conversation.token_count = 50;
        budget.adjust(&mut conversation);
        assert_eq!(conversation.turns.len(), 1);
    }

    #[test]
    fn test_tiktoken_counts_text() {
        let tokenizer = TiktokenTokenizer::new();
        let count = tokenizer.count("hello world", "gpt-3.5-turbo");
        assert!(count >= 2);
        // Unknown models fall back to cl100k_base.
        assert_eq!(tokenizer.count("hello world", "not-a-model"), count);
    }
}
