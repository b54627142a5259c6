// ABOUTME: Interactive terminal prompts for destructive confirmations and column selection
// ABOUTME: The Prompt trait lets library code ask questions without touching the terminal in tests

use crate::error::{EtlError, Result};
use dialoguer::{theme::ColorfulTheme, Confirm, MultiSelect};

/// Source of yes/no answers for operations that need explicit consent
pub trait Prompt {
    fn confirm(&self, message: &str) -> Result<bool>;
}

/// Asks on the terminal; the default answer is "no"
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompt;

impl Prompt for TerminalPrompt {
    fn confirm(&self, message: &str) -> Result<bool> {
        Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(message)
            .default(false)
            .interact()
            .map_err(prompt_error)
    }
}

/// Answers every question with a fixed response (`--yes`, scripts and tests)
#[derive(Debug, Clone, Copy)]
pub struct FixedAnswer(pub bool);

impl Prompt for FixedAnswer {
    fn confirm(&self, message: &str) -> Result<bool> {
        tracing::debug!("Auto-answering '{}' with {}", message, self.0);
        Ok(self.0)
    }
}

/// Prompt to use given the `--yes` flag
pub fn prompt_for(assume_yes: bool) -> Box<dyn Prompt> {
    if assume_yes {
        Box::new(FixedAnswer(true))
    } else {
        Box::new(TerminalPrompt)
    }
}

/// Interactive multi-select of columns
///
/// Presents every name in `columns` with all of them preselected and returns the
/// names the user kept, in their original order.
///
/// # Arguments
///
/// * `title` - Line printed above the selection list
/// * `columns` - Candidate column names
///
/// # Errors
///
/// Returns an error if the terminal cannot be read, or [`EtlError::Cancelled`] if
/// the user deselects everything.
pub fn select_columns(title: &str, columns: &[String]) -> Result<Vec<String>> {
    println!("{}", title);
    println!("(Use arrow keys to navigate, Space to select, Enter to confirm)");
    println!();

    let defaults = vec![true; columns.len()];
    let selections = MultiSelect::with_theme(&ColorfulTheme::default())
        .items(columns)
        .defaults(&defaults)
        .interact()
        .map_err(prompt_error)?;

    if selections.is_empty() {
        tracing::warn!("⚠ No columns selected");
        return Err(EtlError::Cancelled("no columns selected".to_string()));
    }

    let selected: Vec<String> = selections.iter().map(|&idx| columns[idx].clone()).collect();
    tracing::info!("✓ Selected {} column(s): {}", selected.len(), selected.join(", "));
    Ok(selected)
}

fn prompt_error(err: dialoguer::Error) -> EtlError {
    EtlError::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        format!("terminal prompt failed: {}", err),
    ))
}
