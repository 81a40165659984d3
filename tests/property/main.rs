//! Property tests for the quantified invariants.

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

use llmock::fault::{Fault, FaultKind, FaultState};
use llmock::markov::{MarkovChain, MarkovResponder};
use llmock::rules::expand_dollar_placeholders;
use llmock::server::streaming::{split_string, tokenize_chunks};
use llmock::types::count_tokens;

proptest! {
    /// Concatenating stream chunks always reconstructs the original text,
    /// for any chunking RNG.
    #[test]
    fn tokenize_chunks_reconstructs(text in "[ -~]{0,200}", seed in any::<u64>()) {
        let mut rng = StdRng::seed_from_u64(seed);
        let chunks = tokenize_chunks(&text, &mut rng);
        let expected: Vec<&str> = text.split_whitespace().collect();
        prop_assert_eq!(chunks.concat(), expected.join(" "));
    }

    /// Every chunk holds between one and three words.
    #[test]
    fn tokenize_chunk_sizes_bounded(text in "[a-z ]{0,200}", seed in any::<u64>()) {
        let mut rng = StdRng::seed_from_u64(seed);
        for chunk in tokenize_chunks(&text, &mut rng) {
            let words = chunk.split_whitespace().count();
            prop_assert!((1..=3).contains(&words));
        }
    }

    /// Argument-JSON slicing never loses bytes and respects the size cap.
    #[test]
    fn split_string_concat_identity(s in "\\PC{0,200}", max in 1usize..64) {
        let chunks = split_string(&s, max);
        prop_assert_eq!(chunks.concat(), s.clone());
        for chunk in &chunks {
            // A single wide char may exceed the cap, but never two chunks.
            prop_assert!(chunk.len() <= max.max(4));
        }
    }

    /// Templates without placeholders pass through untouched.
    #[test]
    fn expansion_without_placeholders_is_identity(
        template in "[a-zA-Z0-9 .,!?]{0,100}",
        input in "[a-z ]{0,40}",
    ) {
        let captures = vec![input.clone()];
        prop_assert_eq!(
            expand_dollar_placeholders(&template, &captures, &input),
            template
        );
    }

    /// Expansion is a pure function of template, captures, and input.
    #[test]
    fn expansion_is_deterministic(
        template in "\\PC{0,100}",
        input in "\\PC{0,40}",
    ) {
        let captures = vec![input.clone(), "group".to_string()];
        let a = expand_dollar_placeholders(&template, &captures, &input);
        let b = expand_dollar_placeholders(&template, &captures, &input);
        prop_assert_eq!(a, b);
    }

    /// `${input}` always expands to the input string.
    #[test]
    fn input_placeholder_expands(input in "[a-zA-Z0-9 ]{0,40}") {
        let expanded = expand_dollar_placeholders("got: ${input}", &[], &input);
        prop_assert_eq!(expanded, format!("got: {input}"));
    }

    /// Token counts are positive for non-empty text.
    #[test]
    fn count_tokens_positive_for_non_empty(s in "\\PC{1,100}") {
        prop_assert!(count_tokens(&s) >= 1);
    }

    /// Markov output only contains corpus tokens and is reproducible for
    /// the same seed and call sequence.
    #[test]
    fn markov_output_from_corpus(seed in any::<u64>(), max in 1usize..60) {
        let corpus = "alpha beta gamma delta epsilon zeta eta theta iota kappa";
        let mut chain = MarkovChain::new(2);
        chain.train(corpus);

        let mut rng = StdRng::seed_from_u64(seed);
        let text = chain.generate(max, &mut rng);
        for word in text.split_whitespace() {
            prop_assert!(corpus.split_whitespace().any(|w| w == word));
        }

        let mut rng2 = StdRng::seed_from_u64(seed);
        prop_assert_eq!(chain.generate(max, &mut rng2), text);
    }

    /// A count-limited fault fires exactly N times, then disappears.
    #[test]
    fn fault_count_fires_exactly_n(n in 1u32..20) {
        let fault = Fault {
            count: n,
            ..Fault::new(FaultKind::Error)
        };
        let state = FaultState::new(vec![fault], Some(7));
        for _ in 0..n {
            prop_assert!(state.evaluate().is_some());
        }
        prop_assert!(state.evaluate().is_none());
        prop_assert!(state.list().is_empty());
    }
}

#[test]
fn request_log_never_exceeds_capacity() {
    use chrono::Utc;
    use llmock::admin::{AdminState, RequestLogEntry};

    let admin = AdminState::new(vec![]);
    for i in 0..500 {
        admin.log_request(RequestLogEntry {
            timestamp: Utc::now(),
            method: "POST".into(),
            path: "/v1/chat/completions".into(),
            user_message: format!("m{i}"),
            matched_rule: String::new(),
            response: String::new(),
        });
        assert!(admin.requests().len() <= 100);
    }
    assert_eq!(admin.requests().len(), 100);
}

#[test]
fn seeded_responders_are_reproducible() {
    let a = MarkovResponder::new(llmock::markov::DEFAULT_CORPUS, Some(99));
    let b = MarkovResponder::new(llmock::markov::DEFAULT_CORPUS, Some(99));
    for _ in 0..5 {
        assert_eq!(a.generate(40), b.generate(40));
    }
}
