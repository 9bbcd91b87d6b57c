//! Conflict resolution policies

use std::collections::VecDeque;
use std::io::{BufRead, Write};

use tracing::{debug, info, warn};

use crate::error::Result;

use super::conflict::{Choices, ConflictAction, ConflictEvent, ConflictType};

/// Decides how each conflict is resolved
pub trait ConflictPolicy {
    fn decide(&mut self, event: &ConflictEvent<'_>) -> Result<ConflictAction>;
}

impl<P: ConflictPolicy + ?Sized> ConflictPolicy for &mut P {
    fn decide(&mut self, event: &ConflictEvent<'_>) -> Result<ConflictAction> {
        (**self).decide(event)
    }
}

impl<P: ConflictPolicy + ?Sized> ConflictPolicy for Box<P> {
    fn decide(&mut self, event: &ConflictEvent<'_>) -> Result<ConflictAction> {
        (**self).decide(event)
    }
}

/// Prompt text for a choice set
pub fn prompt_for(choices: Choices) -> String {
    let mut prompt = String::from("Choose: [o]mit");
    if choices.contains(Choices::REPLACE) {
        prompt.push_str(", [r]eplace");
    }
    prompt.push_str(", [a]bort > ");
    prompt
}

/// Asks a human, one line per attempt.
///
/// The first byte of the line decides (ASCII, case-insensitive), so input
/// need not be UTF-8. Empty lines re-prompt quietly; anything else
/// unrecognised prints `Invalid choice.`. End of input aborts.
pub struct InteractivePolicy<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> InteractivePolicy<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    pub fn into_inner(self) -> (R, W) {
        (self.input, self.output)
    }
}

impl<R: BufRead, W: Write> ConflictPolicy for InteractivePolicy<R, W> {
    fn decide(&mut self, event: &ConflictEvent<'_>) -> Result<ConflictAction> {
        let choices = event.choices();
        let prompt = prompt_for(choices);
        let mut line = Vec::new();
        loop {
            self.output.write_all(prompt.as_bytes())?;
            self.output.flush()?;

            line.clear();
            if self.input.read_until(b'\n', &mut line)? == 0 {
                info!(kind = %event.kind, "end of input at conflict prompt, aborting");
                self.output.write_all(b"\n")?;
                return Ok(ConflictAction::Abort);
            }

            let first = line.first().copied().filter(|&b| b != b'\n' && b != b'\r');
            let Some(first) = first else {
                continue;
            };
            let action = match first.to_ascii_lowercase() {
                b'o' => Some(ConflictAction::Omit),
                b'r' => Some(ConflictAction::Replace),
                b'a' => Some(ConflictAction::Abort),
                _ => None,
            };
            match action {
                Some(action) if choices.allows(action) => {
                    debug!(kind = %event.kind, %action, "conflict resolved interactively");
                    return Ok(action);
                }
                _ => self.output.write_all(b"Invalid choice.\n")?,
            }
        }
    }
}

/// Resolves every conflict the same way
#[derive(Debug, Clone, Copy)]
pub struct FixedPolicy {
    action: ConflictAction,
}

impl FixedPolicy {
    pub fn new(action: ConflictAction) -> Self {
        Self { action }
    }
}

impl ConflictPolicy for FixedPolicy {
    fn decide(&mut self, event: &ConflictEvent<'_>) -> Result<ConflictAction> {
        if event.choices().allows(self.action) {
            return Ok(self.action);
        }
        warn!(kind = %event.kind, action = %self.action, "action not allowed for conflict, aborting");
        Ok(ConflictAction::Abort)
    }
}

/// Replays a fixed sequence of answers and records what it was asked
#[derive(Debug, Clone, Default)]
pub struct ScriptedPolicy {
    actions: VecDeque<ConflictAction>,
    seen: Vec<ConflictType>,
}

impl ScriptedPolicy {
    pub fn new(actions: impl IntoIterator<Item = ConflictAction>) -> Self {
        Self {
            actions: actions.into_iter().collect(),
            seen: Vec::new(),
        }
    }

    /// Conflict kinds presented so far, in order
    pub fn seen(&self) -> &[ConflictType] {
        &self.seen
    }

    pub fn remaining(&self) -> usize {
        self.actions.len()
    }
}

impl ConflictPolicy for ScriptedPolicy {
    fn decide(&mut self, event: &ConflictEvent<'_>) -> Result<ConflictAction> {
        self.seen.push(event.kind);
        match self.actions.pop_front() {
            Some(action) if event.choices().allows(action) => Ok(action),
            Some(action) => {
                warn!(kind = %event.kind, %action, "scripted action not allowed, aborting");
                Ok(ConflictAction::Abort)
            }
            None => {
                warn!(kind = %event.kind, "script exhausted, aborting");
                Ok(ConflictAction::Abort)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::conflict::FkViolation;

    fn ask(kind_replace_legal: bool, input: &str) -> (ConflictAction, String) {
        ask_bytes(kind_replace_legal, input.as_bytes())
    }

    fn ask_bytes(kind_replace_legal: bool, input: &[u8]) -> (ConflictAction, String) {
        let violations: Vec<FkViolation> = Vec::new();
        let mut event = ConflictEvent::foreign_keys(&violations);
        if kind_replace_legal {
            event.kind = ConflictType::Data;
        }
        let mut policy = InteractivePolicy::new(input, Vec::new());
        let action = policy.decide(&event).unwrap();
        let (_, output) = policy.into_inner();
        (action, String::from_utf8(output).unwrap())
    }

    #[test]
    fn test_prompt_lists_legal_choices() {
        assert_eq!(prompt_for(Choices::all()), "Choose: [o]mit, [r]eplace, [a]bort > ");
        assert_eq!(
            prompt_for(Choices::OMIT | Choices::ABORT),
            "Choose: [o]mit, [a]bort > "
        );
    }

    #[test]
    fn test_first_character_decides() {
        let (action, _) = ask(true, "Replace everything\n");
        assert_eq!(action, ConflictAction::Replace);
        let (action, _) = ask(true, "O\n");
        assert_eq!(action, ConflictAction::Omit);
    }

    #[test]
    fn test_empty_line_reprompts_quietly() {
        let (action, output) = ask(true, "\n\r\na\n");
        assert_eq!(action, ConflictAction::Abort);
        assert_eq!(output.matches("Choose:").count(), 3);
        assert!(!output.contains("Invalid choice."));
    }

    #[test]
    fn test_illegal_replace_is_invalid() {
        let (action, output) = ask(false, "r\no\n");
        assert_eq!(action, ConflictAction::Omit);
        assert_eq!(
            output,
            "Choose: [o]mit, [a]bort > Invalid choice.\nChoose: [o]mit, [a]bort > "
        );
    }

    #[test]
    fn test_unknown_choice_reprompts() {
        let (action, output) = ask(true, "x\nomit\n");
        assert_eq!(action, ConflictAction::Omit);
        assert_eq!(output.matches("Invalid choice.").count(), 1);
    }

    #[test]
    fn test_non_utf8_line_is_an_invalid_choice() {
        let (action, output) = ask_bytes(false, b"\xe9\no\n");
        assert_eq!(action, ConflictAction::Omit);
        assert_eq!(output.matches("Invalid choice.").count(), 1);
    }

    #[test]
    fn test_end_of_input_aborts() {
        let (action, _) = ask(true, "");
        assert_eq!(action, ConflictAction::Abort);
        let (action, _) = ask(true, "zz\n");
        assert_eq!(action, ConflictAction::Abort);
    }

    #[test]
    fn test_fixed_policy_downgrades_illegal_replace() {
        let violations: Vec<FkViolation> = Vec::new();
        let event = ConflictEvent::foreign_keys(&violations);
        let mut policy = FixedPolicy::new(ConflictAction::Replace);
        assert_eq!(policy.decide(&event).unwrap(), ConflictAction::Abort);
        let mut policy = FixedPolicy::new(ConflictAction::Omit);
        assert_eq!(policy.decide(&event).unwrap(), ConflictAction::Omit);
    }

    #[test]
    fn test_scripted_policy() {
        let violations: Vec<FkViolation> = Vec::new();
        let event = ConflictEvent::foreign_keys(&violations);
        let mut policy = ScriptedPolicy::new([ConflictAction::Omit, ConflictAction::Replace]);
        assert_eq!(policy.decide(&event).unwrap(), ConflictAction::Omit);
        assert_eq!(policy.decide(&event).unwrap(), ConflictAction::Abort);
        assert_eq!(policy.decide(&event).unwrap(), ConflictAction::Abort);
        assert_eq!(policy.seen().len(), 3);
        assert_eq!(policy.remaining(), 0);
    }
}
