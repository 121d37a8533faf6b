use console::{Style, style};

use crate::types::{Action, RunStatus};

/// Terminal printer shared by every command
#[derive(Debug, Clone, Copy, Default)]
pub struct Output;

impl Output {
    pub fn new() -> Self {
        Self
    }

    pub fn success(&self, message: &str) {
        println!("{} {}", style("✓").green(), message);
    }

    pub fn error(&self, message: &str) {
        eprintln!("{} {}", style("✗").red(), message);
    }

    pub fn warning(&self, message: &str) {
        println!("{} {}", style("⚠").yellow(), message);
    }

    pub fn info(&self, message: &str) {
        println!("{} {}", style("ℹ").blue(), message);
    }

    pub fn header(&self, message: &str) {
        println!("\n{}", style(message).bold().underlined());
    }

    pub fn section(&self, message: &str) {
        println!("\n{}", style(message).bold());
        println!("{}", "─".repeat(40));
    }

    /// Aligned `label: value` line
    pub fn field(&self, label: &str, value: impl std::fmt::Display) {
        println!("  {:<20} {}", style(format!("{}:", label)).dim(), value);
    }

    /// `✓ message` or `✗ message` on stdout
    pub fn check(&self, ok: bool, message: &str) {
        if ok {
            println!("{} {}", style("✓").green(), message);
        } else {
            println!("{} {}", style("✗").red(), message);
        }
    }

    pub fn status(&self, status: RunStatus) -> String {
        let styled = match status {
            RunStatus::Success => Style::new().green(),
            RunStatus::Failed => Style::new().red(),
            RunStatus::Pending => Style::new().yellow(),
        };
        styled.apply_to(status.as_str()).to_string()
    }

    pub fn action(&self, action: Action) -> String {
        let styled = match action {
            Action::Call => Style::new().green().bold(),
            Action::Put => Style::new().red().bold(),
            Action::Wait => Style::new().yellow().bold(),
        };
        styled.apply_to(action.to_string()).to_string()
    }
}
