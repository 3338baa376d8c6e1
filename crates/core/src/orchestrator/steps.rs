//! Step text folding.
//!
//! A case's step text is split into segments (one per non-empty line). Each
//! segment is folded through the interpreter: every call yields one action
//! plus the unconsumed rest of the segment, until the rest is empty or no
//! action can be derived from it.

use crate::driver::Action;
use crate::interpreter::ParsedStep;

/// Split stored step text into non-empty segments.
pub fn segments(steps: &str) -> Vec<String> {
    steps
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// What to do with one interpreter answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepPlan {
    /// Run `action`, then keep folding `rest` (empty when the segment is done).
    Execute { action: Action, rest: String },
    /// Nothing could be derived; the segment is skipped.
    Blocked { reason: String },
}

/// Fold one interpreter answer for `remaining`.
///
/// A rest that is not shorter than `remaining` would never terminate, so it
/// is dropped after the action runs.
pub fn advance(remaining: &str, parsed: ParsedStep) -> StepPlan {
    match parsed.action {
        Some(action) => {
            let rest = parsed.remaining.trim();
            let rest = if rest.len() < remaining.trim().len() {
                rest.to_string()
            } else {
                String::new()
            };
            StepPlan::Execute { action, rest }
        }
        None => StepPlan::Blocked {
            reason: parsed
                .error
                .unwrap_or_else(|| format!("no action found in \"{}\"", remaining.trim())),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn click(target: &str) -> Action {
        Action::Click {
            target: target.to_string(),
        }
    }

    #[test]
    fn test_segments_skip_blank_lines() {
        let text = "open https://example.com\n\n  click Login  \n\t\nverify Welcome";
        assert_eq!(
            segments(text),
            vec!["open https://example.com", "click Login", "verify Welcome"]
        );
        assert!(segments("  \n ").is_empty());
    }

    #[test]
    fn test_advance_keeps_shorter_rest() {
        let plan = advance(
            "click Login then wait 1s",
            ParsedStep::action(click("Login"), "wait 1s"),
        );
        assert_eq!(
            plan,
            StepPlan::Execute {
                action: click("Login"),
                rest: "wait 1s".into()
            }
        );
    }

    #[test]
    fn test_advance_drops_unconsumed_rest() {
        let plan = advance("click Login", ParsedStep::action(click("Login"), "click Login"));
        assert_eq!(
            plan,
            StepPlan::Execute {
                action: click("Login"),
                rest: String::new()
            }
        );
    }

    #[test]
    fn test_advance_blocked_uses_interpreter_reason() {
        let plan = advance("dance", ParsedStep::no_action("dance", "nope"));
        assert_eq!(
            plan,
            StepPlan::Blocked {
                reason: "nope".into()
            }
        );

        let plan = advance("dance", ParsedStep::default());
        assert!(matches!(plan, StepPlan::Blocked { reason } if reason.contains("dance")));
    }
}
