//! `{{ dotted.path[0] }}` substitution

use super::{TemplateError, TemplateProcessor};
use serde_json::Value;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Replaces `{{ path }}` expressions with values looked up in the variable tree.
///
/// Paths are dot separated keys with optional `[n]` array indices. Strings
/// are inserted raw, `null` renders empty and other values as compact JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathTemplateProcessor;

impl PathTemplateProcessor {
    pub fn new() -> Self {
        Self
    }
}

impl TemplateProcessor for PathTemplateProcessor {
    fn render(&self, vars: &Value, template: &str) -> Result<String, TemplateError> {
        let mut output = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find(OPEN) {
            output.push_str(&rest[..start]);
            let after = &rest[start + OPEN.len()..];
            let end = after
                .find(CLOSE)
                .ok_or_else(|| TemplateError::Syntax(format!("unclosed expression in '{}'", template)))?;

            let expression = after[..end].trim();
            push_value(&mut output, lookup(vars, expression)?);
            rest = &after[end + CLOSE.len()..];
        }

        output.push_str(rest);
        Ok(output)
    }
}

enum Segment<'a> {
    Key(&'a str),
    Index(usize),
}

fn lookup<'v>(vars: &'v Value, expression: &str) -> Result<&'v Value, TemplateError> {
    let segments = parse_path(expression)
        .ok_or_else(|| TemplateError::Syntax(format!("invalid expression '{}'", expression)))?;

    let mut current = vars;
    for segment in segments {
        let next = match segment {
            Segment::Key(key) => current.get(key),
            Segment::Index(index) => current.get(index),
        };
        current = next.ok_or_else(|| TemplateError::MissingParameter(expression.to_string()))?;
    }
    Ok(current)
}

fn parse_path(expression: &str) -> Option<Vec<Segment<'_>>> {
    if expression.is_empty() {
        return None;
    }

    let mut segments = Vec::new();
    for part in expression.split('.') {
        let (name, mut indices) = match part.find('[') {
            Some(bracket) => (&part[..bracket], &part[bracket..]),
            None => (part, ""),
        };
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return None;
        }
        segments.push(Segment::Key(name));

        while !indices.is_empty() {
            let inner = indices.strip_prefix('[')?;
            let close = inner.find(']')?;
            segments.push(Segment::Index(inner[..close].trim().parse().ok()?));
            indices = &inner[close + 1..];
        }
    }
    Some(segments)
}

fn push_value(output: &mut String, value: &Value) {
    match value {
        Value::Null => {}
        Value::String(s) => output.push_str(s),
        other => output.push_str(&other.to_string()),
    }
}
