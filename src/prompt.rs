use std::io::{self, BufRead, Write};

use crate::error::Result;

/// Operator confirmation for destructive steps. Only an explicit "y"
/// counts as yes.
pub trait Confirm: Send + Sync {
    fn confirm(&self, question: &str) -> Result<bool>;
}

/// Reads the answer from stdin.
#[derive(Debug, Default)]
pub struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm(&self, question: &str) -> Result<bool> {
        let mut stdout = io::stdout();
        write!(stdout, "{} (y/N): ", question)?;
        stdout.flush()?;

        let mut answer = String::new();
        io::stdin().lock().read_line(&mut answer)?;
        Ok(is_yes(&answer))
    }
}

/// `--yes`: every question is answered affirmatively.
#[derive(Debug, Default)]
pub struct AssumeYes;

impl Confirm for AssumeYes {
    fn confirm(&self, _question: &str) -> Result<bool> {
        Ok(true)
    }
}

pub fn is_yes(answer: &str) -> bool {
    matches!(answer.trim(), "y" | "Y")
}
