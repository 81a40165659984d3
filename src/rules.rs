//! The rule engine: ordered regex rules with templated responses.
//!
//! A [`RuleResponder`] matches the input string against an ordered rule
//! list; the first match wins. Rules may carry text response templates, a
//! tool-call template, or both. When nothing matches, the Markov fallback
//! takes over.

use std::sync::Arc;

use parking_lot::Mutex;
use rand::prelude::*;
use regex::Regex;

use crate::error::MockError;
use crate::markov::{seeded_rng, MarkovResponder};
use crate::toolcall::{resolve_tool_call, ToolCallTemplate};
use crate::types::{extract_input, InternalMessage, Reply, Responder, Response};

/// A compiled regex pattern with response templates and/or a tool call.
///
/// Templates may use `$1`..`$9` for capture groups, `${input}` for the full
/// input string, and `{{markov}}` / `{{markov:N}}` for generated filler.
///
/// `max_calls` limits how many times the rule's tool call fires. After that
/// many invocations the rule falls through to its text responses, or is
/// skipped entirely if it has none. `None` means unlimited. The invocation
/// counter belongs to this rule instance: rebuilding the rule list (e.g. a
/// rules reset) starts fresh counters.
#[derive(Debug)]
pub struct Rule {
    pub pattern: Regex,
    pub responses: Vec<String>,
    pub tool_call: Option<ToolCallTemplate>,
    pub max_calls: Option<u32>,
    invocations: Mutex<u32>,
}

impl Rule {
    pub fn new(pattern: Regex, responses: Vec<String>) -> Self {
        Self {
            pattern,
            responses,
            tool_call: None,
            max_calls: None,
            invocations: Mutex::new(0),
        }
    }

    /// Compile a rule from its configuration parts. A rule must have at
    /// least one response or a tool call.
    pub fn compile(
        pattern: &str,
        responses: Vec<String>,
        tool_call: Option<ToolCallTemplate>,
        max_calls: Option<u32>,
    ) -> Result<Self, MockError> {
        let regex = Regex::new(pattern).map_err(|e| MockError::InvalidPattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;
        if responses.is_empty() && tool_call.is_none() {
            return Err(MockError::Validation(format!(
                "rule pattern {pattern:?} has no responses or tool_call"
            )));
        }
        Ok(Self {
            pattern: regex,
            responses,
            tool_call,
            max_calls,
            invocations: Mutex::new(0),
        })
    }

    /// A copy of this rule with a fresh invocation counter. Used when the
    /// rule list is rebuilt from its baseline.
    pub fn fresh_clone(&self) -> Self {
        Self {
            pattern: self.pattern.clone(),
            responses: self.responses.clone(),
            tool_call: self.tool_call.clone(),
            max_calls: self.max_calls,
            invocations: Mutex::new(0),
        }
    }
}

/// Try each rule in order against the input; the first match wins.
/// Returns `None` when no rule produced a response.
pub fn match_rules(
    rules: &[Arc<Rule>],
    input: &str,
    markov: &MarkovResponder,
    rng: &Mutex<StdRng>,
) -> Option<Reply> {
    for rule in rules {
        let Some(caps) = rule.pattern.captures(input) else {
            continue;
        };
        let captures = captures_to_vec(&caps);

        if let Some(template) = &rule.tool_call {
            if let Some(max) = rule.max_calls {
                let exhausted = {
                    let mut count = rule.invocations.lock();
                    if *count >= max {
                        true
                    } else {
                        *count += 1;
                        false
                    }
                };
                if exhausted {
                    // Fall through to text responses if the rule has any;
                    // otherwise skip it and keep matching.
                    if rule.responses.is_empty() {
                        continue;
                    }
                    let text = pick_and_expand(rule, &captures, input, markov, rng);
                    return Some(Reply {
                        response: Response::Text(text),
                        matched_rule: Some(rule.pattern.to_string()),
                    });
                }
            }
            let tc = resolve_tool_call(template, &captures, input);
            return Some(Reply {
                response: Response::ToolCalls(vec![tc]),
                matched_rule: Some(rule.pattern.to_string()),
            });
        }

        let text = pick_and_expand(rule, &captures, input, markov, rng);
        return Some(Reply {
            response: Response::Text(text),
            matched_rule: Some(rule.pattern.to_string()),
        });
    }
    None
}

fn pick_and_expand(
    rule: &Rule,
    captures: &[String],
    input: &str,
    markov: &MarkovResponder,
    rng: &Mutex<StdRng>,
) -> String {
    let template = {
        let mut rng = rng.lock();
        let idx = rng.gen_range(0..rule.responses.len());
        &rule.responses[idx]
    };
    expand_template(template, captures, input, markov)
}

/// Collect capture groups as strings: index 0 is the whole match,
/// non-participating groups become empty strings.
pub(crate) fn captures_to_vec(caps: &regex::Captures<'_>) -> Vec<String> {
    (0..caps.len())
        .map(|i| caps.get(i).map(|m| m.as_str().to_string()).unwrap_or_default())
        .collect()
}

/// Expand a response template: `{{markov}}` / `{{markov:N}}` placeholders
/// first, then one left-to-right pass replacing `${input}` and `$1`..`$9`.
pub fn expand_template(
    template: &str,
    captures: &[String],
    input: &str,
    markov: &MarkovResponder,
) -> String {
    let expanded = expand_markov_placeholders(template, markov);
    expand_dollar_placeholders(&expanded, captures, input)
}

/// Replace `{{markov}}` with 100 tokens of generated text and
/// `{{markov:N}}` with N tokens. Unrecognized forms stay literal.
fn expand_markov_placeholders(template: &str, markov: &MarkovResponder) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(pos) = rest.find("{{markov") {
        out.push_str(&rest[..pos]);
        let after = &rest[pos..];
        if let Some(tail) = after.strip_prefix("{{markov}}") {
            out.push_str(&markov.generate(100));
            rest = tail;
            continue;
        }
        if let Some(tail) = after.strip_prefix("{{markov:") {
            if let Some(end) = tail.find("}}") {
                if let Ok(n) = tail[..end].parse::<usize>() {
                    if n > 0 {
                        out.push_str(&markov.generate(n));
                        rest = &tail[end + 2..];
                        continue;
                    }
                }
            }
        }
        out.push_str("{{");
        rest = &after[2..];
    }
    out.push_str(rest);
    out
}

/// One left-to-right pass replacing `${input}` with the full input string
/// and `$1`..`$9` with the corresponding capture group when that group
/// index is within the match's capture list. Dollar signs not forming a
/// recognized placeholder stay literal.
pub fn expand_dollar_placeholders(template: &str, captures: &[String], input: &str) -> String {
    let mut out = String::with_capacity(template.len() * 2);
    let mut rest = template;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos..];
        if let Some(tail) = after.strip_prefix("${input}") {
            out.push_str(input);
            rest = tail;
            continue;
        }
        let bytes = after.as_bytes();
        if bytes.len() > 1 && bytes[1].is_ascii_digit() && bytes[1] != b'0' {
            let idx = (bytes[1] - b'0') as usize;
            if idx < captures.len() {
                out.push_str(&captures[idx]);
                rest = &after[2..];
                continue;
            }
        }
        out.push('$');
        rest = &after[1..];
    }
    out.push_str(rest);
    out
}

/// Matches messages against an ordered rule list with a Markov fallback.
pub struct RuleResponder {
    rules: Vec<Arc<Rule>>,
    markov: Arc<MarkovResponder>,
    rng: Mutex<StdRng>,
}

impl RuleResponder {
    /// Create a responder from the given rules. An empty rule list gets
    /// the built-in defaults.
    pub fn new(rules: Vec<Rule>, markov: Arc<MarkovResponder>, seed: Option<u64>) -> Self {
        let rules = if rules.is_empty() { default_rules() } else { rules };
        Self {
            rules: rules.into_iter().map(Arc::new).collect(),
            markov,
            rng: Mutex::new(seeded_rng(seed)),
        }
    }

    /// The responder's rule list, shared with the admin state at startup.
    pub fn rules(&self) -> &[Arc<Rule>] {
        &self.rules
    }
}

impl Responder for RuleResponder {
    fn respond(&self, messages: &[InternalMessage]) -> Result<Reply, MockError> {
        let input = extract_input(messages);
        if input.is_empty() {
            return Err(MockError::NoMessages);
        }

        if let Some(reply) = match_rules(&self.rules, &input, &self.markov, &self.rng) {
            return Ok(reply);
        }
        self.markov.respond(messages)
    }
}

fn builtin(pattern: &str, responses: &[&str]) -> Rule {
    Rule::new(
        Regex::new(pattern).expect("built-in rule pattern"),
        responses.iter().map(|s| s.to_string()).collect(),
    )
}

/// Built-in rules producing helpful assistant-like responses, used when no
/// rules are configured.
pub fn default_rules() -> Vec<Rule> {
    vec![
        builtin(
            r"(?i)^(?:hi|hello|hey|greetings|good (?:morning|afternoon|evening))[\s!.,]*$",
            &[
                "Hello! How can I help you today?",
                "Hi there! What can I assist you with?",
                "Hey! What would you like to work on?",
            ],
        ),
        builtin(
            r"(?i)I need (.*)",
            &[
                "I understand you need $1. Let me help you with that.",
                "Sure, I can help with $1. What specifically would you like to know?",
                "Let's work on getting you $1. Can you give me more details?",
            ],
        ),
        builtin(
            r"(?i)how do I (.*)",
            &[
                "Here's how you can approach $1: first, break it down into smaller steps.",
                "To $1, I'd recommend starting with the basics and building from there.",
                "Great question! There are several ways to $1. Let me walk you through the most common approach.",
            ],
        ),
        builtin(
            r"(?i)what is (.*)",
            &[
                "That's a great question. $1 refers to a concept that I can explain in detail.",
                "Good question! $1 is something worth understanding well. Let me break it down.",
                "Let me explain $1 for you in a clear and concise way.",
            ],
        ),
        builtin(
            r"(?i)help me (.*)",
            &[
                "I'd be happy to help you $1. Let me break this down step by step.",
                "Of course! Let me assist you with $1. Here's what I suggest.",
                "Sure thing! To $1, here's what we should do.",
            ],
        ),
        builtin(
            r"(?i)(?:can you|could you|would you) (.*)",
            &[
                "Absolutely! I can $1. Let me work on that.",
                "Sure, I'd be happy to $1. Here's what I've got.",
                "Of course! Let me $1 for you.",
            ],
        ),
        builtin(
            r"(?i)(?:thanks|thank you|thx)[\s!.,]*$",
            &[
                "You're welcome! Let me know if you need anything else.",
                "Happy to help! Is there anything else I can assist with?",
                "Glad I could help! Don't hesitate to ask if you have more questions.",
            ],
        ),
        builtin(
            r"(?i)(?:bye|goodbye|see you|farewell)[\s!.,]*$",
            &[
                "Goodbye! Feel free to come back anytime.",
                "See you later! Have a great day.",
                "Take care! I'm here whenever you need me.",
            ],
        ),
        builtin(
            r".*",
            &[
                "That's an interesting point about '${input}'. Could you tell me more?",
                "I see what you mean. Let me think about '${input}' and get back to you with some ideas.",
                "Interesting! Can you elaborate on '${input}'?",
            ],
        ),
    ]
}
