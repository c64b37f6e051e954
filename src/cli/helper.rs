use rustyline::completion::{Completer, Pair};
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::{ValidationContext, ValidationResult, Validator};
use rustyline::{Context, Helper, Result};

use super::commands::all_commands_info;

pub struct CliHelper {}

// The accompanying helper for ShardlineCli.
// Completes command names and only accepts backslash commands.
impl CliHelper {
    fn validate_input(&self, input: &str) -> Result<ValidationResult> {
        if input.is_empty() || input.starts_with('\\') {
            Ok(ValidationResult::Valid(None))
        } else {
            Ok(ValidationResult::Invalid(Some(
                "  (commands start with '\\', try \\?)".to_string(),
            )))
        }
    }

    fn complete_command(&self, line: &str) -> Vec<Pair> {
        // Only the command itself, not its argument
        if line.contains(' ') {
            return vec![];
        }

        all_commands_info()
            .into_iter()
            .filter_map(|(usage, _)| usage.split(' ').next())
            .filter(|command| command.starts_with(line))
            .map(|command| Pair {
                display: command.to_string(),
                replacement: command.to_string(),
            })
            .collect()
    }
}

impl Highlighter for CliHelper {}

impl Hinter for CliHelper {
    type Hint = String;
}

impl Completer for CliHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> Result<(usize, Vec<Pair>)> {
        Ok((0, self.complete_command(&line[..pos])))
    }
}

impl Validator for CliHelper {
    fn validate(&self, ctx: &mut ValidationContext<'_>) -> Result<ValidationResult> {
        let input = ctx.input().trim();
        self.validate_input(input)
    }
}

impl Helper for CliHelper {}
