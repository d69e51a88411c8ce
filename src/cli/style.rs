//! Terminal styling helpers
//!
//! Colors are only emitted when stdout supports them; `anstream` strips
//! anything left over when output is redirected.

use indicatif::ProgressStyle;
use owo_colors::{OwoColorize, Stream};
use std::fmt;
use supports_hyperlinks::Stream as LinkStream;
use terminal_link::Link;

/// Semantic styles for CLI output
pub trait Stylize: fmt::Display {
    /// Secondary text
    fn muted(&self) -> String {
        paint(&self.to_string(), |t| t.dimmed())
    }

    /// Headings and key nouns
    fn emphasis(&self) -> String {
        paint(&self.to_string(), |t| t.bold())
    }

    /// Names: branches, repositories, PR numbers
    fn accent(&self) -> String {
        paint(&self.to_string(), |t| t.cyan())
    }

    /// Completed steps
    fn success(&self) -> String {
        paint(&self.to_string(), |t| t.green())
    }

    /// Problems the user needs to look at
    fn warn(&self) -> String {
        paint(&self.to_string(), |t| t.yellow())
    }

    /// Failures
    fn failure(&self) -> String {
        paint(&self.to_string(), |t| t.red())
    }
}

impl<T: fmt::Display + ?Sized> Stylize for T {}

#[allow(clippy::ptr_arg)]
fn paint<'a, F, D>(text: &'a String, apply: F) -> String
where
    F: Fn(&'a String) -> D,
    D: fmt::Display,
{
    text.if_supports_color(Stream::Stdout, apply).to_string()
}

/// Green check mark
pub fn check() -> String {
    "✓".success()
}

/// Red cross
pub fn cross() -> String {
    "✗".failure()
}

/// Spinner used while waiting on GitHub
pub fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "✓"])
}

/// `PR #n`, hyperlinked to the PR when the terminal supports it
pub fn pr_link(pr_number: u64, url: &str) -> String {
    let text = format!("PR #{pr_number}");
    if !url.is_empty() && supports_hyperlinks::on(LinkStream::Stdout) {
        Link::new(&text, url).to_string().accent()
    } else {
        text.accent()
    }
}
