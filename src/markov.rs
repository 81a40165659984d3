//! Markov-chain fallback text generation.
//!
//! When no rule matches an incoming message, the server falls back to a
//! Markov chain trained on a text corpus, producing plausible filler text.
//! Seeded runs are reproducible: the starting prefix is chosen from a
//! deterministically sorted key list.

use std::collections::HashMap;

use parking_lot::Mutex;
use rand::prelude::*;

use crate::error::MockError;
use crate::types::{extract_input, InternalMessage, Reply};

/// The embedded default training corpus.
pub const DEFAULT_CORPUS: &str = include_str!("corpus.txt");

/// Fallback sentence when the chain produces nothing.
const NEUTRAL_FALLBACK: &str = "I understand. Could you tell me more about that?";

/// Generates text using a Markov chain trained on a corpus.
/// Training happens once at startup; afterwards the chain is read-only.
#[derive(Debug, Default)]
pub struct MarkovChain {
    order: usize,
    chain: HashMap<String, Vec<String>>,
}

impl MarkovChain {
    /// Create a chain with the given order (prefix length in words).
    /// Orders below 1 are clamped to 1.
    pub fn new(order: usize) -> Self {
        Self {
            order: order.max(1),
            chain: HashMap::new(),
        }
    }

    /// Add text to the chain's model. The text is split into
    /// whitespace-delimited tokens.
    pub fn train(&mut self, text: &str) {
        let words: Vec<&str> = text.split_whitespace().collect();
        if words.len() <= self.order {
            return;
        }
        for i in 0..=(words.len() - self.order - 1) {
            let prefix = words[i..i + self.order].join(" ");
            let next = words[i + self.order].to_string();
            self.chain.entry(prefix).or_default().push(next);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    /// Produce up to `max_tokens` words using the given random source.
    /// Generation stops at `max_tokens`, or at a natural sentence ending
    /// once at least `order + 4` tokens have been produced.
    pub fn generate(&self, max_tokens: usize, rng: &mut StdRng) -> String {
        if self.chain.is_empty() || max_tokens == 0 {
            return String::new();
        }

        // Sorted key list so that seeded runs are reproducible.
        let mut keys: Vec<&String> = self.chain.keys().collect();
        keys.sort();
        let mut prefix = keys[rng.gen_range(0..keys.len())].clone();

        let mut result: Vec<String> =
            prefix.split_whitespace().map(str::to_string).collect();

        while result.len() < max_tokens {
            let Some(followers) = self.chain.get(&prefix) else {
                break;
            };
            if followers.is_empty() {
                break;
            }
            let next = followers[rng.gen_range(0..followers.len())].clone();
            result.push(next.clone());

            let mut prefix_words: Vec<&str> = prefix.split_whitespace().collect();
            prefix_words.remove(0);
            prefix_words.push(&next);
            prefix = prefix_words.join(" ");

            if result.len() >= self.order + 4 && ends_with_sentence(&next) {
                break;
            }
        }

        result.join(" ")
    }
}

fn ends_with_sentence(word: &str) -> bool {
    matches!(word.chars().last(), Some('.') | Some('!') | Some('?'))
}

/// A responder backed by a Markov chain with its own seeded RNG.
/// The RNG mutex serializes generation so concurrent calls stay
/// deterministic under single-threaded test load.
pub struct MarkovResponder {
    chain: MarkovChain,
    rng: Mutex<StdRng>,
}

impl MarkovResponder {
    /// Build a responder trained on the given corpus. A `None` seed uses
    /// OS entropy.
    pub fn new(corpus: &str, seed: Option<u64>) -> Self {
        let mut chain = MarkovChain::new(2);
        chain.train(corpus);
        Self {
            chain,
            rng: Mutex::new(seeded_rng(seed)),
        }
    }

    /// Generate Markov text with a token limit, for template expansion.
    pub fn generate(&self, max_tokens: usize) -> String {
        let mut rng = self.rng.lock();
        let text = self.chain.generate(max_tokens, &mut rng);
        if text.is_empty() {
            NEUTRAL_FALLBACK.to_string()
        } else {
            text
        }
    }

    /// Respond to a conversation with generated filler text.
    pub fn respond(&self, messages: &[InternalMessage]) -> Result<Reply, MockError> {
        if extract_input(messages).is_empty() {
            return Err(MockError::NoMessages);
        }
        Ok(Reply::text(self.generate(100)))
    }
}

/// A `StdRng` seeded from the given value, or from entropy when absent.
pub fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    }
}
