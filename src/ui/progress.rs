//! Terminal rendering of the engine's progress stream.
//!
//! Supports three output modes:
//! - `full`: spinner for the active feature plus colored event lines
//! - `minimal`: one plain line per status change
//! - `json`: one JSON object per event for machine consumption

use console::{Term, style};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::io::Write;
use std::time::Duration;

use crate::engine::EngineEvent;
use crate::project::{FeatureStatus, TaskStatus};
use crate::ui::icons::{CHECK, CROSS, PROGRESS, RUNNING, SKIP, SPARKLE, STOP};

/// Output mode for the run UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UiMode {
    #[default]
    Full,
    Minimal,
    Json,
}

impl std::str::FromStr for UiMode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "json" => Self::Json,
            "minimal" => Self::Minimal,
            _ => Self::Full,
        })
    }
}

/// One-line rendering used by minimal mode and by the full-mode log lines.
pub fn describe(event: &EngineEvent) -> String {
    match event {
        EngineEvent::Status { message, percent } => match percent {
            Some(p) => format!("{} ({}%)", message, p),
            None => message.clone(),
        },
        EngineEvent::FeatureStatusChanged { feature, name, from, to } => {
            format!("Feature {} ({}): {} -> {}", feature, name, from, to)
        }
        EngineEvent::TaskStatusChanged { feature, label, status, .. } => {
            format!("[{}] {}: {}", feature, label, status)
        }
        EngineEvent::Error { message, .. } => format!("Error: {}", message),
    }
}

pub struct RunUI {
    mode: UiMode,
    multi: MultiProgress,
    spinner: ProgressBar,
    verbose: bool,
    term: Term,
}

impl RunUI {
    pub fn new(mode: UiMode, verbose: bool) -> Self {
        let multi = MultiProgress::new();
        let spinner = multi.add(ProgressBar::new_spinner());
        if mode == UiMode::Full {
            let spinner_style = ProgressStyle::default_spinner()
                .template("{prefix:.bold.dim} {spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            spinner.set_style(spinner_style);
            spinner.set_prefix("wright");
            spinner.enable_steady_tick(Duration::from_millis(100));
        } else {
            spinner.finish_and_clear();
        }

        Self {
            mode,
            multi,
            spinner,
            verbose,
            term: Term::stdout(),
        }
    }

    /// Print a line above the spinner, falling back to stderr.
    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    pub fn handle_event(&self, event: &EngineEvent) {
        match self.mode {
            UiMode::Json => {
                if let Ok(json) = serde_json::to_string(event) {
                    let _ = writeln!(&self.term, "{}", json);
                }
            }
            UiMode::Minimal => {
                let _ = writeln!(&self.term, "{}", describe(event));
            }
            UiMode::Full => self.handle_full(event),
        }
    }

    fn handle_full(&self, event: &EngineEvent) {
        match event {
            EngineEvent::Status { message, percent } => {
                match percent {
                    Some(p) => self.spinner.set_message(format!(
                        "{} {}",
                        message,
                        style(format!("{}%", p)).cyan().bold()
                    )),
                    None => self.spinner.set_message(message.clone()),
                }
                if self.verbose {
                    self.print_line(format!("    {} {}", style("→").dim(), style(message).dim()));
                }
            }
            EngineEvent::FeatureStatusChanged { feature, name, to, .. } => {
                let line = match to {
                    FeatureStatus::Merged => format!(
                        "\n{} Feature {} merged: {}\n",
                        SPARKLE,
                        style(feature).green().bold(),
                        name
                    ),
                    FeatureStatus::Cancelled => format!(
                        "{} Feature {} cancelled: {}",
                        STOP,
                        style(feature).yellow().bold(),
                        name
                    ),
                    s if s.is_failure() => format!(
                        "{} Feature {} {}: {}",
                        CROSS,
                        style(feature).red().bold(),
                        s,
                        name
                    ),
                    FeatureStatus::Implementing => format!(
                        "{} Feature {}: {}",
                        RUNNING,
                        style(feature).yellow().bold(),
                        name
                    ),
                    s => format!("  {} {} {}", style(feature).dim(), style("→").dim(), s),
                };
                self.print_line(line);
            }
            EngineEvent::TaskStatusChanged { label, status, .. } => match status {
                TaskStatus::Completed => self.print_line(format!("    {} {}", CHECK, label)),
                TaskStatus::Failed => {
                    self.print_line(format!("    {} {}", CROSS, style(label).red()))
                }
                TaskStatus::Skipped => {
                    self.print_line(format!("    {} {}", SKIP, style(label).dim()))
                }
                TaskStatus::InProgress => {
                    self.spinner.set_message(format!("{}", style(label).yellow()))
                }
                _ => {
                    if self.verbose {
                        self.print_line(format!("    {} {} {}", PROGRESS, label, style(status).dim()));
                    }
                }
            },
            EngineEvent::Error { message, .. } => {
                self.print_line(format!("{} {}", CROSS, style(message).red().bold()));
            }
        }
    }

    /// Stop the spinner with a final message.
    pub fn finish(&self, success: bool, message: &str) {
        if self.mode != UiMode::Full {
            if self.mode == UiMode::Minimal {
                let _ = writeln!(&self.term, "{}", message);
            }
            return;
        }
        let icon = if success { CHECK } else { CROSS };
        self.spinner
            .finish_with_message(format!("{} {}", icon, message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ui_mode_parse() {
        assert_eq!("json".parse::<UiMode>().unwrap(), UiMode::Json);
        assert_eq!("MINIMAL".parse::<UiMode>().unwrap(), UiMode::Minimal);
        assert_eq!("anything".parse::<UiMode>().unwrap(), UiMode::Full);
    }

    #[test]
    fn test_describe_feature_change() {
        let line = describe(&EngineEvent::FeatureStatusChanged {
            feature: "f1".into(),
            name: "Accounts".into(),
            from: FeatureStatus::Planned,
            to: FeatureStatus::Implementing,
        });
        assert_eq!(line, "Feature f1 (Accounts): planned -> implementing");
    }

    #[test]
    fn test_describe_status_with_percent() {
        let line = describe(&EngineEvent::Status {
            message: "Task 2 completed".into(),
            percent: Some(50),
        });
        assert_eq!(line, "Task 2 completed (50%)");
    }
}
