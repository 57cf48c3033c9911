//! Request complexity analysis for model routing.
//!
//! Provides a [`ComplexityAnalyzer`] that scores the difficulty of a
//! request on a 0-100 scale using lightweight heuristics over three
//! independent inputs: the user message, the tools the model was offered,
//! and the tool-call history of an in-flight chain.
//!
//! The analyser does **not** use an LLM or neural model. It relies on
//! surface properties that correlate with cognitive load: message length,
//! task-keyword density, tool fan-out, and chain depth. Scores from the
//! individual inputs are merged with [`ComplexityAnalyzer::combine`],
//! which takes the **maximum** rather than the sum -- any one strong
//! signal drives the decision.

use manifold_llm::{ToolCall, ToolDefinition};
use manifold_types::ComplexityLevel;

// ── ComplexityScore ────────────────────────────────────────────────────

/// The result of one complexity analysis: a clamped 0-100 score, the level
/// band it falls into, and the reasons that contributed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComplexityScore {
    /// Score in `0..=100`.
    pub score: u32,
    /// The band the score lands in.
    pub level: ComplexityLevel,
    /// Human-readable contributions, in the order they applied.
    pub reasons: Vec<String>,
}

impl ComplexityScore {
    fn from_raw(raw: i32, reasons: Vec<String>) -> Self {
        let score = raw.clamp(0, 100) as u32;
        Self {
            score,
            level: ComplexityLevel::from_score(score),
            reasons,
        }
    }

    /// A zero score with no reasons.
    pub fn zero() -> Self {
        Self::from_raw(0, Vec::new())
    }
}

// ── Scoring tables ─────────────────────────────────────────────────────

/// Task keywords and their weights, strongest first.
const KEYWORD_WEIGHTS: [(&str, i32); 16] = [
    ("refactor", 20),
    ("implement", 15),
    ("analyze", 15),
    ("research", 15),
    ("debug", 15),
    ("migrate", 15),
    ("architecture", 15),
    ("multiple files", 15),
    ("build", 10),
    ("create", 10),
    ("compare", 10),
    ("plan", 10),
    ("design", 10),
    ("fix", 10),
    ("step by step", 10),
    ("test", 5),
];

/// Openers that mark a message as a simple question or pleasantry.
const SIMPLE_OPENERS: [&str; 8] = [
    "hi", "hello", "what is", "thanks", "yes", "no", "ok", "how do i",
];

/// Tools whose invocation signals heavier work.
const COMPLEX_TOOLS: [&str; 8] = [
    "Bash",
    "Edit",
    "Write",
    "WebSearch",
    "WebFetch",
    "Task",
    "NotebookEdit",
    "SessionsSpawn",
];

/// Read-only tools whose exclusive use signals light work.
const SIMPLE_TOOLS: [&str; 5] = ["Read", "Glob", "Grep", "TodoWrite", "MemorySearch"];

fn is_complex_tool(name: &str) -> bool {
    COMPLEX_TOOLS.iter().any(|t| *t == name)
}

fn is_simple_tool(name: &str) -> bool {
    SIMPLE_TOOLS.iter().any(|t| *t == name)
}

// ── ComplexityAnalyzer ─────────────────────────────────────────────────

/// Deterministic request-difficulty scorer.
///
/// All four analysis operations are pure: the same inputs always produce
/// the same score, which makes routing decisions reproducible in tests.
#[derive(Debug, Clone, Default)]
pub struct ComplexityAnalyzer;

impl ComplexityAnalyzer {
    /// Create a new analyser.
    pub fn new() -> Self {
        Self
    }

    /// Score a user message from its length and task keywords.
    pub fn analyze_message(&self, text: &str) -> ComplexityScore {
        let mut raw = 0i32;
        let mut reasons = Vec::new();

        let lower = text.to_lowercase();
        let word_count = lower.split_whitespace().count();

        let length_bonus = if word_count > 200 {
            30
        } else if word_count > 80 {
            15
        } else if word_count > 30 {
            5
        } else {
            0
        };
        if length_bonus > 0 {
            raw += length_bonus;
            reasons.push(format!("long message ({word_count} words)"));
        }

        let mut matched = 0;
        for (keyword, weight) in KEYWORD_WEIGHTS {
            if lower.contains(keyword) {
                raw += weight;
                matched += 1;
                reasons.push(format!("keyword \"{keyword}\""));
            }
        }
        if matched >= 3 {
            raw += 10;
            reasons.push(format!("{matched} task keywords"));
        }

        let trimmed = lower.trim_start();
        if SIMPLE_OPENERS.iter().any(|o| trimmed.starts_with(o)) {
            raw -= 15;
            reasons.push("simple question opener".into());
        }

        ComplexityScore::from_raw(raw, reasons)
    }

    /// Score an in-flight batch of tool calls from its fan-out, the tools
    /// invoked, and the shape of their arguments.
    pub fn analyze_tool_calls(&self, calls: &[ToolCall]) -> ComplexityScore {
        if calls.is_empty() {
            return ComplexityScore::zero();
        }

        let mut raw = 0i32;
        let mut reasons = Vec::new();

        let n = calls.len();
        let count_bonus = if n >= 5 {
            35
        } else if n >= 3 {
            20
        } else if n >= 2 {
            10
        } else {
            3
        };
        raw += count_bonus;
        reasons.push(format!("{n} tool calls"));

        for call in calls {
            if is_complex_tool(&call.name) {
                raw += 12;
                reasons.push(format!("complex tool {}", call.name));
            }
        }

        if calls.iter().all(|c| is_simple_tool(&c.name)) {
            raw -= 10;
            reasons.push("read-only tools".into());
        }

        for call in calls {
            raw += Self::parameter_complexity(call, &mut reasons);
        }

        ComplexityScore::from_raw(raw, reasons)
    }

    /// Score the tool surface offered to the model.
    pub fn analyze_tool_definitions(&self, tools: &[ToolDefinition]) -> ComplexityScore {
        let mut raw = 0i32;
        let mut reasons = Vec::new();

        let n = tools.len();
        if n >= 15 {
            raw += 15;
            reasons.push(format!("{n} tools available"));
        } else if n >= 8 {
            raw += 8;
            reasons.push(format!("{n} tools available"));
        }

        let complex_available = tools.iter().filter(|t| is_complex_tool(&t.name)).count();
        if complex_available >= 3 {
            raw += 10;
            reasons.push(format!("{complex_available} complex tools available"));
        }

        ComplexityScore::from_raw(raw, reasons)
    }

    /// Score the depth of an in-flight tool chain: how many steps it has
    /// run and how varied the history is.
    pub fn analyze_tool_chain_depth(&self, steps: u32, history: &[ToolCall]) -> ComplexityScore {
        let mut raw = 0i32;
        let mut reasons = Vec::new();

        let step_bonus = if steps >= 10 {
            40
        } else if steps >= 5 {
            25
        } else if steps >= 3 {
            15
        } else if steps >= 1 {
            5
        } else {
            0
        };
        if step_bonus > 0 {
            raw += step_bonus;
            reasons.push(format!("chain depth {steps}"));
        }

        let mut names: Vec<&str> = history.iter().map(|c| c.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        if names.len() >= 4 {
            raw += 15;
            reasons.push(format!("{} distinct tools in chain", names.len()));
        }

        if history.len() >= 8 {
            raw += 10;
            reasons.push(format!("{} total calls in chain", history.len()));
        }

        ComplexityScore::from_raw(raw, reasons)
    }

    /// Merge independent scores: the result is the **maximum** score with
    /// the union of reasons. Summing would double-count the same
    /// underlying difficulty; one strong signal is enough.
    pub fn combine(&self, scores: impl IntoIterator<Item = ComplexityScore>) -> ComplexityScore {
        let mut max = 0u32;
        let mut reasons: Vec<String> = Vec::new();
        for score in scores {
            max = max.max(score.score);
            for reason in score.reasons {
                if !reasons.contains(&reason) {
                    reasons.push(reason);
                }
            }
        }
        ComplexityScore::from_raw(max as i32, reasons)
    }

    /// Argument-shape score for one call: wide parameter lists, long string
    /// values, nested objects, and arrays each add once per call.
    fn parameter_complexity(call: &ToolCall, reasons: &mut Vec<String>) -> i32 {
        let Some(params) = call.arguments.as_object() else {
            return 0;
        };

        let mut bonus = 0i32;
        if params.len() >= 5 {
            bonus += 8;
            reasons.push(format!("{} parameters to {}", params.len(), call.name));
        }

        let heavy_value = params.values().any(|v| {
            v.as_str().is_some_and(|s| s.len() > 500) || v.is_object()
        });
        if heavy_value {
            bonus += 5;
            reasons.push(format!("heavy arguments to {}", call.name));
        }

        if params.values().any(|v| v.is_array()) {
            bonus += 3;
            reasons.push(format!("array arguments to {}", call.name));
        }

        bonus
    }
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(name: &str) -> ToolCall {
        ToolCall {
            id: format!("tc-{name}"),
            name: name.into(),
            arguments: json!({}),
        }
    }

    fn call_with_args(name: &str, arguments: serde_json::Value) -> ToolCall {
        ToolCall {
            id: format!("tc-{name}"),
            name: name.into(),
            arguments,
        }
    }

    // ── analyze_message ────────────────────────────────────────────

    #[test]
    fn greeting_scores_simple() {
        let a = ComplexityAnalyzer::new();
        let score = a.analyze_message("hi");
        assert_eq!(score.score, 0);
        assert_eq!(score.level, ComplexityLevel::Simple);
        assert!(score.reasons.iter().any(|r| r.contains("simple")));
    }

    #[test]
    fn simple_opener_penalty_applies() {
        let a = ComplexityAnalyzer::new();
        // "what is" opener cancels the "test" keyword.
        let with_opener = a.analyze_message("what is a test");
        let without = a.analyze_message("run a test");
        assert!(with_opener.score < without.score);
    }

    #[test]
    fn refactor_request_scores_complex() {
        let a = ComplexityAnalyzer::new();
        let score = a.analyze_message(
            "Refactor the entire authentication module to use OAuth2 with PKCE flow. \
             Analyze the existing codebase, implement the migration plan, and update \
             all tests. This involves multiple files across the architecture.",
        );
        assert!(score.score >= 40, "expected complex, got {}", score.score);
        assert_eq!(score.level, ComplexityLevel::Complex);
        assert!(score.reasons.iter().any(|r| r.contains("refactor")));
    }

    #[test]
    fn keyword_bonus_needs_three_matches() {
        let a = ComplexityAnalyzer::new();
        let two = a.analyze_message("implement and debug");
        // implement(15) + debug(15), no bonus.
        assert_eq!(two.score, 30);
        let three = a.analyze_message("implement, debug, and compare");
        // implement(15) + debug(15) + compare(10) + bonus(10).
        assert_eq!(three.score, 50);
    }

    #[test]
    fn word_count_bands() {
        let a = ComplexityAnalyzer::new();
        let words_40 = "word ".repeat(40);
        let words_100 = "word ".repeat(100);
        let words_250 = "word ".repeat(250);
        assert_eq!(a.analyze_message(&words_40).score, 5);
        assert_eq!(a.analyze_message(&words_100).score, 15);
        assert_eq!(a.analyze_message(&words_250).score, 30);
    }

    #[test]
    fn score_never_negative() {
        let a = ComplexityAnalyzer::new();
        let score = a.analyze_message("thanks");
        assert_eq!(score.score, 0);
    }

    #[test]
    fn score_clamped_at_hundred() {
        let a = ComplexityAnalyzer::new();
        let text = format!(
            "{} refactor implement analyze research debug migrate architecture \
             multiple files build create compare plan design fix step by step test",
            "word ".repeat(250)
        );
        let score = a.analyze_message(&text);
        assert_eq!(score.score, 100);
    }

    // ── analyze_tool_calls ─────────────────────────────────────────

    #[test]
    fn no_calls_scores_zero() {
        let a = ComplexityAnalyzer::new();
        let score = a.analyze_tool_calls(&[]);
        assert_eq!(score.score, 0);
        assert!(score.reasons.is_empty());
    }

    #[test]
    fn call_count_bands() {
        let a = ComplexityAnalyzer::new();
        // Neutral tool name: not complex, not simple, no argument bonuses.
        assert_eq!(a.analyze_tool_calls(&[call("Custom")]).score, 3);
        assert_eq!(
            a.analyze_tool_calls(&[call("Custom"), call("Custom")]).score,
            10
        );
        assert_eq!(
            a.analyze_tool_calls(&vec![call("Custom"); 3]).score,
            20
        );
        assert_eq!(
            a.analyze_tool_calls(&vec![call("Custom"); 5]).score,
            35
        );
    }

    #[test]
    fn complex_tools_add_per_call() {
        let a = ComplexityAnalyzer::new();
        // 2 calls (10) + Bash(12) + Edit(12).
        let score = a.analyze_tool_calls(&[call("Bash"), call("Edit")]);
        assert_eq!(score.score, 34);
    }

    #[test]
    fn all_simple_tools_discounted() {
        let a = ComplexityAnalyzer::new();
        // 2 calls (10) - read-only (10).
        let score = a.analyze_tool_calls(&[call("Read"), call("Grep")]);
        assert_eq!(score.score, 0);
    }

    #[test]
    fn mixed_tools_not_discounted() {
        let a = ComplexityAnalyzer::new();
        // 2 calls (10) + Bash(12), no read-only discount.
        let score = a.analyze_tool_calls(&[call("Read"), call("Bash")]);
        assert_eq!(score.score, 22);
    }

    #[test]
    fn wide_parameter_list_bonus() {
        let a = ComplexityAnalyzer::new();
        let wide = call_with_args(
            "Custom",
            json!({"a": 1, "b": 2, "c": 3, "d": 4, "e": 5}),
        );
        // 1 call (3) + >=5 params (8).
        assert_eq!(a.analyze_tool_calls(&[wide]).score, 11);
    }

    #[test]
    fn long_string_and_nested_object_bonus_counted_once() {
        let a = ComplexityAnalyzer::new();
        let heavy = call_with_args(
            "Custom",
            json!({"content": "x".repeat(600), "options": {"deep": true}}),
        );
        // 1 call (3) + heavy value (5), not 10.
        assert_eq!(a.analyze_tool_calls(&[heavy]).score, 8);
    }

    #[test]
    fn array_argument_bonus() {
        let a = ComplexityAnalyzer::new();
        let with_array = call_with_args("Custom", json!({"files": ["a", "b"]}));
        // 1 call (3) + array (3).
        assert_eq!(a.analyze_tool_calls(&[with_array]).score, 6);
    }

    // ── analyze_tool_definitions ───────────────────────────────────

    #[test]
    fn small_tool_surface_scores_zero() {
        let a = ComplexityAnalyzer::new();
        let tools: Vec<ToolDefinition> = (0..7)
            .map(|i| ToolDefinition::new(format!("t{i}"), ""))
            .collect();
        assert_eq!(a.analyze_tool_definitions(&tools).score, 0);
    }

    #[test]
    fn tool_surface_bands() {
        let a = ComplexityAnalyzer::new();
        let eight: Vec<ToolDefinition> = (0..8)
            .map(|i| ToolDefinition::new(format!("t{i}"), ""))
            .collect();
        assert_eq!(a.analyze_tool_definitions(&eight).score, 8);

        let fifteen: Vec<ToolDefinition> = (0..15)
            .map(|i| ToolDefinition::new(format!("t{i}"), ""))
            .collect();
        assert_eq!(a.analyze_tool_definitions(&fifteen).score, 15);
    }

    #[test]
    fn complex_tool_availability_bonus() {
        let a = ComplexityAnalyzer::new();
        let tools = vec![
            ToolDefinition::new("Bash", ""),
            ToolDefinition::new("Edit", ""),
            ToolDefinition::new("Write", ""),
        ];
        assert_eq!(a.analyze_tool_definitions(&tools).score, 10);
    }

    // ── analyze_tool_chain_depth ───────────────────────────────────

    #[test]
    fn chain_step_bands() {
        let a = ComplexityAnalyzer::new();
        assert_eq!(a.analyze_tool_chain_depth(0, &[]).score, 0);
        assert_eq!(a.analyze_tool_chain_depth(1, &[]).score, 5);
        assert_eq!(a.analyze_tool_chain_depth(3, &[]).score, 15);
        assert_eq!(a.analyze_tool_chain_depth(5, &[]).score, 25);
        assert_eq!(a.analyze_tool_chain_depth(10, &[]).score, 40);
    }

    #[test]
    fn varied_history_bonus() {
        let a = ComplexityAnalyzer::new();
        let history = vec![call("Read"), call("Bash"), call("Edit"), call("Grep")];
        // 4 distinct tools (15), no step band (0 steps), < 8 total.
        assert_eq!(a.analyze_tool_chain_depth(0, &history).score, 15);
    }

    #[test]
    fn long_history_bonus() {
        let a = ComplexityAnalyzer::new();
        let history = vec![call("Read"); 8];
        // 8 total calls (10), 1 distinct tool.
        assert_eq!(a.analyze_tool_chain_depth(0, &history).score, 10);
    }

    // ── combine ────────────────────────────────────────────────────

    #[test]
    fn combine_takes_maximum_not_sum() {
        let a = ComplexityAnalyzer::new();
        let s1 = ComplexityScore::from_raw(30, vec!["a".into()]);
        let s2 = ComplexityScore::from_raw(45, vec!["b".into()]);
        let s3 = ComplexityScore::from_raw(10, vec!["c".into()]);
        let combined = a.combine([s1, s2, s3]);
        assert_eq!(combined.score, 45);
        assert_eq!(combined.level, ComplexityLevel::Complex);
        assert_eq!(combined.reasons, vec!["a", "b", "c"]);
    }

    #[test]
    fn combine_unions_reasons_without_duplicates() {
        let a = ComplexityAnalyzer::new();
        let s1 = ComplexityScore::from_raw(20, vec!["shared".into(), "x".into()]);
        let s2 = ComplexityScore::from_raw(25, vec!["shared".into(), "y".into()]);
        let combined = a.combine([s1, s2]);
        assert_eq!(combined.reasons, vec!["shared", "x", "y"]);
    }

    #[test]
    fn combine_of_nothing_is_zero() {
        let a = ComplexityAnalyzer::new();
        let combined = a.combine([]);
        assert_eq!(combined.score, 0);
        assert_eq!(combined.level, ComplexityLevel::Simple);
    }
}
