//! Shared printing for text and JSON output.

use colored::Colorize;
use serde::Serialize;

use crate::OutputFormat;

/// Print a serializable result as JSON. Text output is left to the caller.
pub fn print<T: Serialize>(value: &T, format: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    if let OutputFormat::Json = format {
        match serde_json::to_string_pretty(value) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("{}: failed to serialize output: {e}", "Error".red()),
        }
    }
}

/// Print a completion line in text mode.
pub fn success(message: &str, format: OutputFormat, quiet: bool) {
    if !quiet && matches!(format, OutputFormat::Text) {
        println!("{} {}", "✓".green().bold(), message);
    }
}

/// Print a progress line in text mode.
pub fn info(message: &str, format: OutputFormat, quiet: bool) {
    if !quiet && matches!(format, OutputFormat::Text) {
        println!("{} {}", "→".cyan(), message);
    }
}
