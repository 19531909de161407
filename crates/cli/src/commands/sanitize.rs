//! Tag sanitization command

use anyhow::Result;
use scheduler_lib::sanitizer::sanitize;
use serde::Serialize;
use tabled::Tabled;

use crate::output::{print_json, print_table, OutputFormat};

#[derive(Tabled, Serialize)]
struct SanitizedRow {
    #[tabled(rename = "Original")]
    original: String,
    #[tabled(rename = "Sanitized")]
    sanitized: String,
    #[tabled(rename = "Modified")]
    modified: bool,
}

/// Print each value as it would be written to an EKS tag
pub fn show_sanitized(values: &[String], format: OutputFormat) -> Result<()> {
    let rows: Vec<SanitizedRow> = values
        .iter()
        .map(|value| {
            let (sanitized, modified) = sanitize(value);
            SanitizedRow {
                original: value.clone(),
                sanitized,
                modified,
            }
        })
        .collect();

    match format {
        OutputFormat::Json => print_json(&rows)?,
        OutputFormat::Table => print_table(rows, "No values given"),
    }
    Ok(())
}
