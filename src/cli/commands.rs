//! CLI command definitions

use crate::core::Document;
use clap::Args;
use serde_json::Value;

/// Run one document through a pipeline
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to pipeline YAML or JSON file
    #[arg(short, long)]
    pub file: String,

    /// JSON file holding the input document
    #[arg(short, long)]
    pub input: Option<String>,

    /// Input document fields (key=value, value parsed as JSON when possible)
    #[arg(long, value_parser = parse_key_value)]
    pub field: Vec<(String, String)>,

    /// System configuration entries (key=value)
    #[arg(long, value_parser = parse_key_value)]
    pub system: Vec<(String, String)>,

    /// Give up when the document has not finished after this many seconds
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,

    /// Pretty-print the resulting document
    #[arg(long)]
    pub pretty: bool,
}

/// Validate a pipeline definition
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to pipeline YAML or JSON file
    #[arg(short, long)]
    pub file: String,

    /// Output the normalized definition as JSON
    #[arg(long)]
    pub json: bool,
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let parts: Vec<&str> = s.splitn(2, '=').collect();
    if parts.len() != 2 || parts[0].is_empty() {
        return Err(format!("Invalid key=value pair: {}", s));
    }
    Ok((parts[0].to_string(), parts[1].to_string()))
}

/// Interpret a command-line value: JSON when it parses, a plain string otherwise
pub fn parse_field_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Build a document from key=value pairs
pub fn document_from_pairs(pairs: &[(String, String)]) -> Document {
    pairs
        .iter()
        .map(|(key, value)| (key.clone(), parse_field_value(value)))
        .collect()
}
