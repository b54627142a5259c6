// ABOUTME: Progress bars for long batch jobs, hidden when verbosity is zero
// ABOUTME: Uses one indicatif bar style across transfer, diff, copy and delete jobs

use indicatif::{ProgressBar, ProgressStyle};

const TEMPLATE: &str = "[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}";

/// Bar counting `len` units of work.
///
/// Verbosity 0 returns a hidden bar so callers never branch on whether to report.
pub fn job_progress(len: usize, verbosity: u8, message: &str) -> ProgressBar {
    if verbosity == 0 {
        return ProgressBar::hidden();
    }
    let progress = ProgressBar::new(len as u64);
    let style = ProgressStyle::default_bar()
        .template(TEMPLATE)
        .map(|s| s.progress_chars("##-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    progress.set_style(style);
    progress.set_message(message.to_string());
    progress
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silent_verbosity_hides_bar() {
        let progress = job_progress(10, 0, "copying");
        assert!(progress.is_hidden());
        progress.inc(3);
        assert_eq!(progress.position(), 3);
    }

    #[test]
    fn test_bar_length() {
        let progress = job_progress(42, 1, "copying");
        assert_eq!(progress.length(), Some(42));
        progress.finish_and_clear();
    }
}
