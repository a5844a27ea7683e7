//! Natural-language query -> structured filter plan
//!
//! The planner asks a generation model for a single JSON object and stops
//! decoding as soon as the first balanced `{...}` has been produced. Anything
//! that goes wrong on the way (no object, malformed JSON, wrong field types,
//! an unreachable model) yields the empty plan, which filters nothing, so a
//! query always falls back to plain semantic recall.

use std::ops::ControlFlow;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};

use crate::generate::Generator;

const INSTRUCTIONS: &str = "\
You turn a search request over local text files into a cautious JSON filter plan.
Reply with exactly one JSON object and nothing else, shaped like:
{\"filters\": [\"...\"], \"regex\": [\"...\"], \"time_from\": \"\", \"time_to\": \"\"}
- filters: plain keywords that every result must contain (file names count). Prefer few.
- regex: short, safe patterns; a result must match at least one. Leave empty if unsure.
- time_from / time_to: ISO-8601 bounds only when the request names a time, otherwise \"\".
";

/// A conservative interpretation of a query. All-empty means "match everything".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// Case-insensitive substrings, all of which must occur
    #[serde(default)]
    pub filters: Vec<String>,

    /// Patterns of which at least one must match
    #[serde(default)]
    pub regex: Vec<String>,

    /// Advisory lower time bound; parsed but not enforced
    #[serde(default, deserialize_with = "empty_as_none")]
    pub time_from: Option<String>,

    /// Advisory upper time bound; parsed but not enforced
    #[serde(default, deserialize_with = "empty_as_none")]
    pub time_to: Option<String>,
}

fn empty_as_none<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}

impl Plan {
    /// True when the plan constrains nothing.
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
            && self.regex.is_empty()
            && self.time_from.is_none()
            && self.time_to.is_none()
    }

    /// The same plan with its regex list cleared.
    pub fn without_regex(self) -> Self {
        Self {
            regex: Vec::new(),
            ..self
        }
    }
}

/// Finds the first balanced top-level `{...}` in text that arrives piecewise.
///
/// Braces are counted without regard to JSON strings.
#[derive(Debug, Default)]
pub struct ObjectScanner {
    text: String,
    start: Option<usize>,
    depth: usize,
    end: Option<usize>,
}

impl ObjectScanner {
    /// Append a decoded piece. Returns true once an object is complete.
    pub fn push(&mut self, piece: &str) -> bool {
        if self.end.is_some() {
            return true;
        }

        let offset = self.text.len();
        self.text.push_str(piece);

        for (i, c) in self.text[offset..].char_indices() {
            match c {
                '{' => {
                    if self.start.is_none() {
                        self.start = Some(offset + i);
                    }
                    self.depth += 1;
                }
                '}' if self.start.is_some() => {
                    self.depth -= 1;
                    if self.depth == 0 {
                        self.end = Some(offset + i + 1);
                        return true;
                    }
                }
                _ => {}
            }
        }
        false
    }

    /// The completed object, if one has been seen.
    pub fn object(&self) -> Option<&str> {
        match (self.start, self.end) {
            (Some(start), Some(end)) => Some(&self.text[start..end]),
            _ => None,
        }
    }
}

/// Parse captured planner output, falling back to the empty plan.
pub fn parse_plan(raw: &str) -> Plan {
    match serde_json::from_str::<Plan>(raw.trim()) {
        Ok(plan) => plan,
        Err(e) => {
            tracing::debug!("Discarding unparseable plan {:?}: {}", raw, e);
            Plan::default()
        }
    }
}

/// Build the single instruction-plus-query prompt.
pub fn build_prompt(query: &str) -> String {
    format!("{INSTRUCTIONS}\nRequest:\n{query}\nJSON:")
}

/// Compiles queries into plans through a [`Generator`].
pub struct QueryPlanner {
    generator: Arc<dyn Generator>,
    max_tokens: usize,
}

impl QueryPlanner {
    pub fn new(generator: Arc<dyn Generator>, max_tokens: usize) -> Self {
        Self {
            generator,
            max_tokens,
        }
    }

    /// Compile `query` into a plan. Never fails.
    pub fn compile(&self, query: &str) -> Plan {
        let prompt = build_prompt(query);
        let mut scanner = ObjectScanner::default();

        let generated = self
            .generator
            .generate(&prompt, self.max_tokens, &mut |piece| {
                if scanner.push(piece) {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            });
        if let Err(e) = generated {
            tracing::warn!("Planner generation failed, using empty plan: {}", e);
        }

        match scanner.object() {
            Some(raw) => parse_plan(raw),
            None => {
                tracing::debug!("Planner produced no JSON object, using empty plan");
                Plan::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LgrepError, Result};
    use std::sync::Mutex;

    /// Replays fixed pieces and records how many were consumed.
    struct Scripted {
        pieces: Vec<&'static str>,
        consumed: Mutex<usize>,
    }

    impl Scripted {
        fn new(pieces: Vec<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                pieces,
                consumed: Mutex::new(0),
            })
        }

        fn consumed(&self) -> usize {
            *self.consumed.lock().unwrap()
        }
    }

    impl Generator for Scripted {
        fn generate(
            &self,
            _prompt: &str,
            max_tokens: usize,
            on_token: &mut dyn FnMut(&str) -> ControlFlow<()>,
        ) -> Result<()> {
            for piece in self.pieces.iter().take(max_tokens) {
                *self.consumed.lock().unwrap() += 1;
                if on_token(piece).is_break() {
                    break;
                }
            }
            Ok(())
        }
    }

    struct Unreachable;

    impl Generator for Unreachable {
        fn generate(
            &self,
            _prompt: &str,
            _max_tokens: usize,
            _on_token: &mut dyn FnMut(&str) -> ControlFlow<()>,
        ) -> Result<()> {
            Err(LgrepError::Generation("connection refused".to_string()))
        }
    }

    fn compile(pieces: Vec<&'static str>) -> Plan {
        QueryPlanner::new(Scripted::new(pieces), 256).compile("anything")
    }

    #[test]
    fn well_formed_plan_is_parsed() {
        let plan = compile(vec![
            r#"{"filters": ["Error", "db"], "regex": ["time.?out"], "#,
            r#""time_from": "2024-01-01", "time_to": ""}"#,
        ]);
        assert_eq!(plan.filters, vec!["Error", "db"]);
        assert_eq!(plan.regex, vec!["time.?out"]);
        assert_eq!(plan.time_from.as_deref(), Some("2024-01-01"));
        assert_eq!(plan.time_to, None);
    }

    #[test]
    fn chatter_around_the_object_is_ignored() {
        let plan = compile(vec!["Sure! ", "Here it is: {\"filters\":", "[\"x\"]}", " hope this helps"]);
        assert_eq!(plan.filters, vec!["x"]);
    }

    #[test]
    fn generation_stops_at_first_complete_object() {
        let generator = Scripted::new(vec!["{", "\"filters\": []", "}", "{", "junk"]);
        let plan = QueryPlanner::new(generator.clone(), 256).compile("q");
        assert!(plan.is_empty());
        assert_eq!(generator.consumed(), 3);
    }

    #[test]
    fn nested_braces_are_balanced() {
        let mut scanner = ObjectScanner::default();
        assert!(!scanner.push(r#"prefix {"a": {"b": "#));
        assert!(scanner.push(r#"{}}, "c": 1} trailing }"#));
        assert_eq!(scanner.object(), Some(r#"{"a": {"b": {}}, "c": 1}"#));
    }

    #[test]
    fn stray_closing_brace_before_object_is_ignored() {
        let mut scanner = ObjectScanner::default();
        assert!(scanner.push("} {\"x\": 1}"));
        assert_eq!(scanner.object(), Some("{\"x\": 1}"));
    }

    #[test]
    fn unbalanced_output_yields_empty_plan() {
        assert_eq!(compile(vec!["{\"filters\": [\"a\"", ", \"regex\": []"]), Plan::default());
        assert_eq!(compile(vec!["no json here"]), Plan::default());
        assert_eq!(compile(vec![]), Plan::default());
    }

    #[test]
    fn budget_cuts_off_generation() {
        let generator = Scripted::new(vec!["{", "\"filters\": [\"a\"]", "}"]);
        let plan = QueryPlanner::new(generator.clone(), 2).compile("q");
        assert_eq!(plan, Plan::default());
        assert_eq!(generator.consumed(), 2);
    }

    #[test]
    fn malformed_json_yields_empty_plan() {
        assert_eq!(compile(vec!["{filters: [a]}"]), Plan::default());
    }

    #[test]
    fn wrong_field_types_yield_empty_plan() {
        assert_eq!(compile(vec![r#"{"filters": "error"}"#]), Plan::default());
        assert_eq!(compile(vec![r#"{"regex": [1, 2]}"#]), Plan::default());
        assert_eq!(compile(vec![r#"{"time_from": 2024}"#]), Plan::default());
    }

    #[test]
    fn missing_and_unknown_fields_are_tolerated() {
        let plan = compile(vec![r#"{"regex": ["^fn "], "confidence": 0.9}"#]);
        assert!(plan.filters.is_empty());
        assert_eq!(plan.regex, vec!["^fn "]);
        assert_eq!(plan.time_from, None);
    }

    #[test]
    fn generator_failure_yields_empty_plan() {
        let plan = QueryPlanner::new(Arc::new(Unreachable), 256).compile("q");
        assert!(plan.is_empty());
    }

    #[test]
    fn prompt_carries_the_query() {
        let prompt = build_prompt("logs from last week mentioning OOM");
        assert!(prompt.contains("logs from last week mentioning OOM"));
        assert!(prompt.trim_end().ends_with("JSON:"));
    }

    #[test]
    fn without_regex_keeps_filters() {
        let plan = Plan {
            filters: vec!["a".to_string()],
            regex: vec!["(".to_string()],
            ..Plan::default()
        };
        let stripped = plan.without_regex();
        assert_eq!(stripped.filters, vec!["a"]);
        assert!(stripped.regex.is_empty());
    }
}
