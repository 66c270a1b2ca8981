pub mod build;
pub mod checksum;
pub mod completions;
pub mod inspect;
pub mod man_pages;
pub mod plugins;
pub mod validate;
pub mod verify;

use bagsmith_core::{CoreError, ErrorKind, ProfileResolver, ServiceConfig, ValidationReport};
use bagsmith_remote::HttpFetcher;
use indicatif::{ProgressBar, ProgressStyle};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_CONFIG_ERROR: u8 = 2;
pub const EXIT_RESOURCE_ERROR: u8 = 3;
pub const EXIT_INVALID: u8 = 4;
/// EX_SOFTWARE from sysexits.h.
pub const EXIT_INTERNAL: u8 = 70;

/// A failed command: what to print and which exit code to use.
#[derive(Debug)]
pub struct CommandError {
    pub code: u8,
    pub message: String,
}

impl CommandError {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            code: EXIT_FAILURE,
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self {
            code: EXIT_CONFIG_ERROR,
            message: message.into(),
        }
    }

    pub fn is_internal(&self) -> bool {
        self.code == EXIT_INTERNAL
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl From<CoreError> for CommandError {
    fn from(err: CoreError) -> Self {
        let code = match err.kind() {
            ErrorKind::Configuration => EXIT_CONFIG_ERROR,
            ErrorKind::Resource => EXIT_RESOURCE_ERROR,
            ErrorKind::Plugin | ErrorKind::Cancelled => EXIT_FAILURE,
            ErrorKind::Internal => EXIT_INTERNAL,
        };
        Self {
            code,
            message: err.to_string(),
        }
    }
}

pub type CommandResult = Result<u8, CommandError>;

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, CommandError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| CommandError::failure(format!("JSON serialization failed: {e}")))
}

/// Profile resolver with the configured fetch limits and default profile.
pub fn profile_resolver(config: &ServiceConfig) -> ProfileResolver {
    ProfileResolver::new(Arc::new(HttpFetcher::new(config.fetch_config())))
        .with_default(config.validation.default_profile.clone())
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

fn finish(pb: &ProgressBar, msg: String) {
    if let Ok(style) = ProgressStyle::with_template("{msg}") {
        pb.set_style(style);
    }
    pb.finish_with_message(msg);
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    finish(pb, format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    finish(pb, format!("✗ {msg}"));
}

pub fn colorize_verdict(valid: bool) -> String {
    use console::Style;
    if valid {
        Style::new().green().apply_to("valid").to_string()
    } else {
        Style::new().red().bold().apply_to("invalid").to_string()
    }
}

/// Human-readable rendering of a validation report.
pub fn print_report(report: &ValidationReport) {
    println!("package:  {}", report.package);
    println!(
        "profile:  {}",
        report.profile.as_ref().map_or("(no identifier)", |p| p.as_str())
    );
    if let Some(serialization) = &report.serialization {
        println!("format:   {serialization}");
    }
    println!("result:   {}", colorize_verdict(report.valid));
    for finding in &report.findings {
        println!("  {finding}");
    }
    for note in &report.notes {
        println!("  note: {note}");
    }
}

pub fn report_exit_code(report: &ValidationReport) -> u8 {
    if report.valid {
        EXIT_SUCCESS
    } else {
        EXIT_INVALID
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bagsmith_mapping::{ResolutionError, StrategyKind};

    #[test]
    fn json_pretty_serializes_object() {
        let val = serde_json::json!({"key": "value"});
        let result = json_pretty(&val).unwrap();
        assert!(result.contains("\"key\""));
        assert!(result.contains("\"value\""));
    }

    #[test]
    fn exit_codes_are_distinct() {
        let codes = [
            EXIT_SUCCESS,
            EXIT_FAILURE,
            EXIT_CONFIG_ERROR,
            EXIT_RESOURCE_ERROR,
            EXIT_INVALID,
            EXIT_INTERNAL,
        ];
        for (i, a) in codes.iter().enumerate() {
            for b in &codes[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn core_errors_map_to_exit_codes() {
        let disabled = CoreError::from(ResolutionError::ResolutionDisabled {
            strategy: StrategyKind::Remote,
        });
        assert_eq!(CommandError::from(disabled).code, EXIT_CONFIG_ERROR);
        assert_eq!(
            CommandError::from(CoreError::StagingFailed("disk full".to_owned())).code,
            EXIT_RESOURCE_ERROR
        );
        assert_eq!(CommandError::from(CoreError::Cancelled).code, EXIT_FAILURE);
        let internal = CommandError::from(CoreError::InvariantViolation("count".to_owned()));
        assert_eq!(internal.code, EXIT_INTERNAL);
        assert!(internal.is_internal());
    }

    #[test]
    fn verdict_contains_word() {
        assert!(colorize_verdict(true).contains("valid"));
        assert!(colorize_verdict(false).contains("invalid"));
    }

    #[test]
    fn spinner_finishes() {
        let pb = spinner("testing...");
        spin_ok(&pb, "done");
        let pb = spinner("testing...");
        spin_fail(&pb, "failed");
    }
}
