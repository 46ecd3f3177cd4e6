//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use serde_json::Value;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::ValidationResult;
use crate::context::{SECRET_KEYS, StoredProperties};
use crate::outcome::OperationResult;
use crate::trampoline::InvocationReport;

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Property row for table display.
#[derive(Tabled)]
struct PropertyRow {
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Value")]
    value: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats the outcome of a trampoline run.
    #[must_use]
    pub fn format_report(&self, report: &InvocationReport) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Text => {
                let status = match &report.result {
                    OperationResult::Success => format!("{} {}", "✓".green(), "success".green()),
                    OperationResult::RetryAfter { secs, message } => format!(
                        "{} {} in {secs}s: {message}",
                        "↻".yellow(),
                        "retry".yellow()
                    ),
                    OperationResult::Fail {
                        message,
                        recoverable: true,
                    } => format!(
                        "{} {}: {message}",
                        "✗".yellow(),
                        "failed (recoverable)".yellow()
                    ),
                    OperationResult::Fail { message, .. } => {
                        format!("{} {}: {message}", "✗".red(), "failed".red())
                    }
                };
                format!(
                    "{} {} ({} attempt(s)): {status}\n",
                    report.operation.bold(),
                    report.instance_id,
                    report.attempts
                )
            }
        }
    }

    /// Formats stored runtime properties as a key/value table.
    ///
    /// Secret payload keys are masked.
    #[must_use]
    pub fn format_props(&self, instance_id: &str, stored: Option<&StoredProperties>) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = stored.map_or(Value::Null, |s| {
                    serde_json::to_value(s).unwrap_or(Value::Null)
                });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => {
                let Some(stored) = stored else {
                    return format!("No properties stored for {instance_id}.\n");
                };

                let mut output = String::new();
                let _ = write!(
                    output,
                    "\nProperties of {} (updated {})\n\n",
                    instance_id.bold(),
                    stored.updated_at.format("%Y-%m-%d %H:%M:%S")
                );

                if stored.properties.is_empty() {
                    output.push_str("   (empty)\n");
                    return output;
                }

                let rows: Vec<PropertyRow> = stored
                    .properties
                    .iter()
                    .map(|(key, value)| PropertyRow {
                        key: key.clone(),
                        value: Self::truncate(&Self::render_value(key, value), 60),
                    })
                    .collect();
                output.push_str(&Table::new(rows).to_string());
                output.push('\n');
                output
            }
        }
    }

    /// Formats a document validation result.
    #[must_use]
    pub fn format_validation(&self, result: &ValidationResult, show_warnings: bool) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({
                    "valid": result.is_valid(),
                    "errors": result.errors.iter().map(ToString::to_string).collect::<Vec<_>>(),
                    "warnings": result.warnings,
                });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => {
                let mut output = if result.is_valid() {
                    format!("{} Node document is valid\n", "✓".green())
                } else {
                    format!("{} Node document is invalid\n", "✗".red())
                };
                for error in &result.errors {
                    let _ = writeln!(output, "   - {error}");
                }
                if show_warnings && !result.warnings.is_empty() {
                    let _ = write!(output, "\n{} Warnings:\n", "⚠".yellow());
                    for warning in &result.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                }
                output
            }
        }
    }

    fn render_value(key: &str, value: &Value) -> String {
        if SECRET_KEYS.contains(&key) || key == crate::context::keys::PASSWORD {
            return String::from("********");
        }
        match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{kept}...")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{RuntimeProperties, keys};

    fn stored() -> StoredProperties {
        let mut props = RuntimeProperties::new();
        props.set(keys::EXTERNAL_ID, "srv-1");
        props.set(keys::PASSWORD, "hunter2");
        StoredProperties::new("vm_1", props)
    }

    #[test]
    fn test_props_table_masks_password() {
        colored::control::set_override(false);
        let text = OutputFormatter::new(OutputFormat::Text).format_props("vm_1", Some(&stored()));
        assert!(text.contains("srv-1"));
        assert!(!text.contains("hunter2"));
    }

    #[test]
    fn test_missing_props() {
        let text = OutputFormatter::new(OutputFormat::Text).format_props("vm_1", None);
        assert!(text.contains("No properties stored"));
        let json = OutputFormatter::new(OutputFormat::Json).format_props("vm_1", None);
        assert_eq!(json, "null");
    }

    #[test]
    fn test_report_json_is_tagged() {
        let report = InvocationReport {
            operation: String::from("create"),
            instance_id: String::from("vm_1"),
            attempts: 2,
            result: OperationResult::RetryAfter {
                secs: 30,
                message: String::from("waiting"),
            },
        };
        let json = OutputFormatter::new(OutputFormat::Json).format_report(&report);
        let value: Value = serde_json::from_str(&json).expect("json");
        assert_eq!(value["result"], "retry_after");
        assert_eq!(value["secs"], 30);
        assert_eq!(value["attempts"], 2);
    }

    #[test]
    fn test_exhausted_follow_reads_as_recoverable() {
        colored::control::set_override(false);
        let report = InvocationReport {
            operation: String::from("create"),
            instance_id: String::from("vol_1"),
            attempts: 10,
            result: OperationResult::Fail {
                message: String::from("still pending after 10 attempt(s): waiting"),
                recoverable: true,
            },
        };
        let text = OutputFormatter::new(OutputFormat::Text).format_report(&report);
        assert!(text.contains("failed (recoverable): still pending"));

        let json = OutputFormatter::new(OutputFormat::Json).format_report(&report);
        let value: Value = serde_json::from_str(&json).expect("json");
        assert_eq!(value["result"], "fail");
        assert_eq!(value["recoverable"], true);
    }

    #[test]
    fn test_truncate_counts_characters() {
        assert_eq!(OutputFormatter::truncate("short", 10), "short");
        assert_eq!(OutputFormatter::truncate("abcdefghij", 6), "abc...");
    }
}
