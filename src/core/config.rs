//! Pipeline definition loading from YAML or JSON

use crate::core::document::DOC_ID_KEY;
use crate::core::environment::StepMetadata;
use crate::core::error::ConfigError;
use crate::steps::derive_short_name;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

/// Keys with engine-level meaning on a step node; anything else selects an implementation
pub const RESERVED_KEYS: &[&str] = &[
    "name",
    "register",
    "steps",
    "timeout",
    "concurrent",
    "when",
    "return",
    "vars",
    "class",
];

/// Name given to a top-level list of steps
pub const DEFAULT_SECTION_NAME: &str = "default";

/// Step keys that only make sense under a parent section
const NESTED_ONLY_KEYS: &[&str] = &["register", "timeout", "when", "return"];

/// A parsed pipeline: the root section definition
#[derive(Debug, Clone)]
pub struct PipelineDefinition {
    pub root: StepDefinition,
}

impl PipelineDefinition {
    /// Load a pipeline definition from a YAML or JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::parse(&content)?)
    }

    /// Parse a pipeline definition; JSON is accepted as a YAML subset
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let value: Value =
            serde_yaml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Self::from_value(value)
    }

    /// Build the root section. A top-level list becomes the `default` section.
    ///
    /// The root runs directly under the engine, so `register`, `timeout`,
    /// `when` and `return` are rejected there instead of being ignored.
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        let root = match value {
            Value::Array(steps) => json!({ "name": DEFAULT_SECTION_NAME, "steps": steps }),
            Value::Object(mut map) => {
                if let Some(key) = NESTED_ONLY_KEYS.iter().find(|key| map.contains_key(**key)) {
                    let name = map
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or(DEFAULT_SECTION_NAME);
                    return Err(invalid(
                        name,
                        &format!("'{}' is not supported on the pipeline root", key),
                    ));
                }
                if !map.contains_key("steps") {
                    map.insert("steps".to_string(), Value::Array(Vec::new()));
                }
                Value::Object(map)
            }
            Value::Null => return Err(ConfigError::Parse("empty pipeline definition".to_string())),
            other => {
                return Err(ConfigError::Parse(format!(
                    "pipeline must be a list or a map of steps, got {}",
                    other
                )))
            }
        };

        Ok(Self {
            root: StepDefinition::from_value(&root)?,
        })
    }
}

/// What a step node runs
#[derive(Debug, Clone, PartialEq)]
pub enum StepKind {
    /// Nested child steps
    Section(Vec<StepDefinition>),
    /// A registered implementation with its private config sub-object
    Leaf {
        short_name: String,
        config: Map<String, Value>,
    },
}

/// One node of the pipeline definition tree
#[derive(Debug, Clone, PartialEq)]
pub struct StepDefinition {
    pub name: Option<String>,
    /// Document key the step's result is merged into
    pub register: Option<String>,
    pub timeout: Option<Duration>,
    pub concurrent: bool,
    pub when: Option<Value>,
    pub returns: Option<Value>,
    /// Legacy step-local variables
    pub vars: Map<String, Value>,
    pub kind: StepKind,
    /// The node as written
    pub raw: Value,
}

impl StepDefinition {
    pub fn from_value(value: &Value) -> Result<Self, ConfigError> {
        let Value::Object(node) = value else {
            return Err(ConfigError::Invalid {
                step: "<unnamed>".to_string(),
                message: format!("step definition must be a map, got {}", value),
            });
        };

        let name = optional_string(node, "name", "<unnamed>")?;
        let label = name.clone().unwrap_or_else(|| "<unnamed>".to_string());

        let register = optional_string(node, "register", &label)?;
        if let Some(key) = &register {
            if key.trim().is_empty() {
                return Err(invalid(&label, "register key must not be empty"));
            }
            if key == DOC_ID_KEY {
                return Err(invalid(
                    &label,
                    &format!("'{}' is reserved for the document id", DOC_ID_KEY),
                ));
            }
        }

        let timeout = node.get("timeout").map(parse_timeout_value).transpose()?;

        let concurrent = match node.get("concurrent") {
            None | Some(Value::Null) => false,
            Some(Value::Bool(flag)) => *flag,
            Some(other) => {
                return Err(invalid(&label, &format!("concurrent must be a boolean, got {}", other)))
            }
        };

        let vars = match node.get("vars") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(vars)) => vars.clone(),
            Some(_) => return Err(invalid(&label, "vars must be a map")),
        };

        let selectors: Vec<&String> = node
            .keys()
            .filter(|key| !RESERVED_KEYS.contains(&key.as_str()))
            .collect();
        let class = optional_string(node, "class", &label)?;

        let kind = if let Some(steps) = node.get("steps") {
            if !selectors.is_empty() {
                return Err(unexpected_keys(&label, &selectors));
            }
            if let Some(class) = &class {
                if derive_short_name(class) != "section" {
                    return Err(invalid(&label, &format!("class '{}' cannot have steps", class)));
                }
            }
            let Value::Array(children) = steps else {
                return Err(invalid(&label, "steps must be a list"));
            };
            StepKind::Section(
                children
                    .iter()
                    .map(StepDefinition::from_value)
                    .collect::<Result<Vec<_>, _>>()?,
            )
        } else {
            match (selectors.as_slice(), class) {
                ([selector], None) => {
                    let config = match &node[selector.as_str()] {
                        Value::Null => Map::new(),
                        Value::Object(config) => config.clone(),
                        other => {
                            return Err(invalid(
                                &label,
                                &format!("config for '{}' must be a map, got {}", selector, other),
                            ))
                        }
                    };
                    StepKind::Leaf {
                        short_name: selector.to_string(),
                        config,
                    }
                }
                ([], Some(class)) => StepKind::Leaf {
                    short_name: derive_short_name(&class),
                    config: Map::new(),
                },
                ([], None) => return Err(ConfigError::MissingImplementation(label)),
                (selectors, _) => return Err(unexpected_keys(&label, selectors)),
            }
        };

        Ok(Self {
            name,
            register,
            timeout,
            concurrent,
            when: node.get("when").cloned(),
            returns: node.get("return").cloned(),
            vars,
            kind,
            raw: value.clone(),
        })
    }

    pub fn is_section(&self) -> bool {
        matches!(self.kind, StepKind::Section(_))
    }

    /// Implementation short name; `section` for composite nodes
    pub fn short_name(&self) -> &str {
        match &self.kind {
            StepKind::Section(_) => "section",
            StepKind::Leaf { short_name, .. } => short_name,
        }
    }

    /// Explicit name, falling back to the short name
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.short_name().to_string())
    }

    /// Step-local variables: legacy `vars` overlaid by the implementation config
    pub fn step_vars(&self) -> Map<String, Value> {
        let mut vars = self.vars.clone();
        if let StepKind::Leaf { config, .. } = &self.kind {
            vars.extend(config.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        vars
    }

    pub fn metadata(&self) -> StepMetadata {
        StepMetadata {
            name: self.display_name(),
            short_name: self.short_name().to_string(),
            timeout: self.timeout,
            config: self.raw.clone(),
        }
    }

    pub fn children(&self) -> &[StepDefinition] {
        match &self.kind {
            StepKind::Section(children) => children,
            StepKind::Leaf { .. } => &[],
        }
    }

    /// Number of leaf steps in this subtree
    pub fn leaf_count(&self) -> usize {
        match &self.kind {
            StepKind::Section(children) => children.iter().map(Self::leaf_count).sum(),
            StepKind::Leaf { .. } => 1,
        }
    }

    /// Every register key in this subtree, in declaration order
    pub fn registered_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.register.as_deref().into_iter().collect();
        for child in self.children() {
            keys.extend(child.registered_keys());
        }
        keys
    }
}

// With a leading `P`, time fields need the `T` separator (`P1DT2H`, not `P1D2H`).
// Without it the `T` is optional (`0.25S`, `T5S`, `2H`).
const DURATION_REGEX: &str = concat!(
    r"^(?:P(?:(\d+(?:\.\d+)?)D)?(?:T(?:(\d+(?:\.\d+)?)H)?(?:(\d+(?:\.\d+)?)M)?(?:(\d+(?:\.\d+)?)S)?)?",
    r"|T?(?:(\d+(?:\.\d+)?)H)?(?:(\d+(?:\.\d+)?)M)?(?:(\d+(?:\.\d+)?)S)?)$",
);

/// Capture group and its length in seconds
const DURATION_UNITS: [(usize, f64); 7] = [
    (1, 86_400.0),
    (2, 3_600.0),
    (3, 60.0),
    (4, 1.0),
    (5, 3_600.0),
    (6, 60.0),
    (7, 1.0),
];

static DURATION_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();

/// Parse a timeout: ISO-8601 duration with optional `PT`, any case, or bare seconds
pub fn parse_duration(text: &str) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::InvalidTimeout(text.to_string());
    let trimmed = text.trim();

    if let Ok(seconds) = trimmed.parse::<f64>() {
        return positive_seconds(seconds).ok_or_else(invalid);
    }

    let pattern = DURATION_PATTERN
        .get_or_init(|| Regex::new(DURATION_REGEX).ok())
        .as_ref()
        .ok_or_else(invalid)?;
    let upper = trimmed.to_ascii_uppercase();
    let captures = pattern.captures(&upper).ok_or_else(invalid)?;

    let mut seconds = 0.0;
    let mut matched = false;
    for (group, unit) in DURATION_UNITS {
        if let Some(amount) = captures.get(group) {
            matched = true;
            seconds += amount.as_str().parse::<f64>().map_err(|_| invalid())? * unit;
        }
    }

    if !matched {
        return Err(invalid());
    }
    positive_seconds(seconds).ok_or_else(invalid)
}

fn positive_seconds(seconds: f64) -> Option<Duration> {
    // Whole nanoseconds, so "0.1S" is exactly 100ms.
    (seconds.is_finite() && seconds > 0.0)
        .then(|| Duration::from_nanos((seconds * 1e9).round() as u64))
        .filter(|duration| !duration.is_zero())
}

fn parse_timeout_value(value: &Value) -> Result<Duration, ConfigError> {
    match value {
        Value::String(text) => parse_duration(text),
        Value::Number(number) => number
            .as_f64()
            .and_then(positive_seconds)
            .ok_or_else(|| ConfigError::InvalidTimeout(number.to_string())),
        other => Err(ConfigError::InvalidTimeout(other.to_string())),
    }
}

fn optional_string(
    node: &Map<String, Value>,
    key: &str,
    label: &str,
) -> Result<Option<String>, ConfigError> {
    match node.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(invalid(label, &format!("{} must be a string, got {}", key, other))),
    }
}

fn invalid(step: &str, message: &str) -> ConfigError {
    ConfigError::Invalid {
        step: step.to_string(),
        message: message.to_string(),
    }
}

fn unexpected_keys(step: &str, keys: &[&String]) -> ConfigError {
    ConfigError::UnexpectedKeys {
        step: step.to_string(),
        keys: keys
            .iter()
            .map(|k| k.as_str())
            .collect::<Vec<_>>()
            .join(", "),
    }
}
