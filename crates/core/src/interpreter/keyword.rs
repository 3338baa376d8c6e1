//! Rule-based step interpreter.
//!
//! Understands a small imperative vocabulary, one clause at a time:
//!
//! ```text
//! open https://example.com/login
//! click "Sign in"
//! type "alice@example.com" into #email
//! press Enter
//! wait 2 s
//! verify page shows "Welcome back"
//! ```
//!
//! A line may chain clauses with `;`, `then` or `and then`. Leading list
//! markers (`1.`, `2)`, `-`, `*`) are ignored.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex_lite::Regex;

use crate::driver::{Action, PageContext};

use super::{InterpretError, ParsedStep, StepInterpreter};

static LIST_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:\d+[.)]|[-*•])\s*").expect("valid list marker regex"));

static CLAUSE_SEPARATOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s*;\s*|,?\s+and then\s+|,?\s+then\s+").expect("valid separator regex")
});

static NAVIGATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:open|navigate to|go to|visit|load)\s+(\S+)$").expect("valid regex")
});

static CLICK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:click|tap)(?:\s+on)?\s+(.+)$").expect("valid regex")
});

static TYPE_INTO: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)^(?:type|enter|input|fill)\s+"([^"]*)"\s+(?:into|in)\s+(.+)$"#)
        .expect("valid regex")
});

static FILL_WITH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)^fill(?:\s+in)?\s+(.+?)\s+with\s+"([^"]*)"$"#).expect("valid regex")
});

static PRESS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^press\s+(.+)$").expect("valid regex"));

static WAIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^wait(?:\s+for)?\s+(\d+)\s*(ms|milliseconds?|s|secs?|seconds?)?$")
        .expect("valid regex")
});

static ASSERT_QUOTED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)^(?:verify|assert|check|expect)\b.*?"([^"]+)""#).expect("valid regex")
});

static ASSERT_PLAIN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?:verify|assert|check|expect)\s+(?:that\s+)?(?:the\s+)?page\s+(?:shows|contains|displays)\s+(.+)$",
    )
    .expect("valid regex")
});

/// Deterministic keyword-driven interpreter.
#[derive(Debug, Clone, Default)]
pub struct KeywordInterpreter;

impl KeywordInterpreter {
    pub fn new() -> Self {
        Self
    }

    /// Interpret the first clause of `remaining`.
    pub fn parse(&self, remaining: &str) -> ParsedStep {
        let text = remaining.trim_start();
        let (line, rest_lines) = match text.split_once('\n') {
            Some((line, rest)) => (line, rest),
            None => (text, ""),
        };

        let line = LIST_MARKER.replace(line.trim(), "");
        let (clause, rest_clauses) = match CLAUSE_SEPARATOR.find(&line) {
            Some(m) => (&line[..m.start()], &line[m.end()..]),
            None => (&line[..], ""),
        };

        match parse_clause(clause.trim()) {
            Some(action) => ParsedStep::action(action, join_residual(rest_clauses, rest_lines)),
            None => ParsedStep::no_action(
                remaining,
                format!("no action found in \"{}\"", clause.trim()),
            ),
        }
    }
}

#[async_trait]
impl StepInterpreter for KeywordInterpreter {
    fn name(&self) -> &str {
        "keyword"
    }

    async fn parse_next(
        &self,
        remaining: &str,
        _context: &PageContext,
    ) -> Result<ParsedStep, InterpretError> {
        Ok(self.parse(remaining))
    }
}

fn join_residual(rest_clauses: &str, rest_lines: &str) -> String {
    let rest_clauses = rest_clauses.trim();
    if rest_clauses.is_empty() {
        rest_lines.to_string()
    } else if rest_lines.trim().is_empty() {
        rest_clauses.to_string()
    } else {
        format!("{}\n{}", rest_clauses, rest_lines)
    }
}

fn unquote(value: &str) -> String {
    let value = value.trim();
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
        .to_string()
}

fn parse_clause(clause: &str) -> Option<Action> {
    if clause.is_empty() {
        return None;
    }

    if let Some(caps) = NAVIGATE.captures(clause) {
        return Some(Action::Navigate {
            url: unquote(&caps[1]),
        });
    }

    if let Some(caps) = TYPE_INTO.captures(clause) {
        return Some(Action::Type {
            text: caps[1].to_string(),
            target: unquote(&caps[2]),
        });
    }

    if let Some(caps) = FILL_WITH.captures(clause) {
        return Some(Action::Type {
            target: unquote(&caps[1]),
            text: caps[2].to_string(),
        });
    }

    if let Some(caps) = CLICK.captures(clause) {
        return Some(Action::Click {
            target: unquote(&caps[1]),
        });
    }

    if let Some(caps) = PRESS.captures(clause) {
        return Some(Action::Press {
            key: unquote(&caps[1]),
        });
    }

    if let Some(caps) = WAIT.captures(clause) {
        let amount: u64 = caps[1].parse().ok()?;
        let unit = caps.get(2).map(|m| m.as_str().to_lowercase());
        let duration_ms = match unit.as_deref() {
            Some(u) if u.starts_with('m') => amount,
            Some(_) => amount.saturating_mul(1000),
            // Bare numbers are seconds
            None => amount.saturating_mul(1000),
        };
        return Some(Action::Wait { duration_ms });
    }

    if let Some(caps) = ASSERT_QUOTED.captures(clause) {
        return Some(Action::AssertText {
            text: caps[1].to_string(),
        });
    }

    if let Some(caps) = ASSERT_PLAIN.captures(clause) {
        return Some(Action::AssertText {
            text: unquote(&caps[1]),
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> ParsedStep {
        KeywordInterpreter::new().parse(text)
    }

    #[test]
    fn test_navigate() {
        let step = parse("open https://example.com/login");
        assert_eq!(
            step.action,
            Some(Action::Navigate {
                url: "https://example.com/login".into()
            })
        );
        assert_eq!(step.remaining, "");
    }

    #[test]
    fn test_type_into_and_fill_with() {
        let step = parse(r#"type "alice@example.com" into #email"#);
        assert_eq!(
            step.action,
            Some(Action::Type {
                target: "#email".into(),
                text: "alice@example.com".into()
            })
        );

        let step = parse(r#"fill in "Password" with "hunter2""#);
        assert_eq!(
            step.action,
            Some(Action::Type {
                target: "Password".into(),
                text: "hunter2".into()
            })
        );
    }

    #[test]
    fn test_click_strips_quotes() {
        let step = parse(r#"click on "Sign in""#);
        assert_eq!(
            step.action,
            Some(Action::Click {
                target: "Sign in".into()
            })
        );
    }

    #[test]
    fn test_wait_units() {
        assert_eq!(
            parse("wait 250 ms").action,
            Some(Action::Wait { duration_ms: 250 })
        );
        assert_eq!(
            parse("wait for 2 seconds").action,
            Some(Action::Wait { duration_ms: 2000 })
        );
        assert_eq!(parse("wait 3").action, Some(Action::Wait { duration_ms: 3000 }));
    }

    #[test]
    fn test_assertions() {
        assert_eq!(
            parse(r#"verify the banner says "Welcome back""#).action,
            Some(Action::AssertText {
                text: "Welcome back".into()
            })
        );
        assert_eq!(
            parse("check that the page shows Dashboard").action,
            Some(Action::AssertText {
                text: "Dashboard".into()
            })
        );
    }

    #[test]
    fn test_list_markers_and_remaining_lines() {
        let step = parse("1. open https://example.com\n2. click Login\n");
        assert_eq!(
            step.action,
            Some(Action::Navigate {
                url: "https://example.com".into()
            })
        );
        assert_eq!(step.remaining, "2. click Login\n");

        let step = parse(&step.remaining);
        assert_eq!(
            step.action,
            Some(Action::Click {
                target: "Login".into()
            })
        );
        assert!(step.remaining.trim().is_empty());
    }

    #[test]
    fn test_chained_clauses_split_into_actions() {
        let step = parse("click Login then wait 1 s\npress Enter");
        assert_eq!(
            step.action,
            Some(Action::Click {
                target: "Login".into()
            })
        );
        assert_eq!(step.remaining, "wait 1 s\npress Enter");
    }

    #[test]
    fn test_unknown_clause_reports_no_action_and_keeps_text() {
        let step = parse("admire the colour scheme\nclick Login");
        assert!(step.action.is_none());
        assert_eq!(step.remaining, "admire the colour scheme\nclick Login");
        assert!(step.error.unwrap().contains("admire the colour scheme"));
    }

    #[tokio::test]
    async fn test_parse_next_never_errors() {
        let interpreter = KeywordInterpreter::new();
        let result = interpreter
            .parse_next("gibberish", &PageContext::default())
            .await
            .unwrap();
        assert!(result.action.is_none());
    }
}
