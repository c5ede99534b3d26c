//! Consumers of the download and extraction event streams.
//!
//! Each consumer reads its channel until `Quit`, renders the events, and
//! returns a tally. Exit status is decided from the tally after the stream
//! has drained, never while events are still arriving.

pub mod download;
pub mod extract;

use indicatif::ProgressStyle;

/// How progress is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// One log line per finished item.
    Plain,
    /// Live progress bars.
    Bars,
}

impl OutputMode {
    /// Bars only on an interactive stdout and when not disabled.
    pub fn detect(no_tty: bool) -> Self {
        if !no_tty && console::Term::stdout().is_term() {
            OutputMode::Bars
        } else {
            OutputMode::Plain
        }
    }
}

/// Build a style from a template known to be valid.
fn style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template).unwrap_or_else(|_| ProgressStyle::default_bar())
}

/// Shorten a label to `max` characters, keeping the end.
fn truncate_start(label: &str, max: usize) -> String {
    let count = label.chars().count();
    if count <= max {
        return label.to_string();
    }
    let tail: String = label.chars().skip(count - (max - 1)).collect();
    format!("…{}", tail)
}
