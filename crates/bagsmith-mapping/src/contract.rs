use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// JSON type of a mapper argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgKind {
    String,
    Boolean,
    Integer,
    Array,
    Object,
}

impl ArgKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::Array => "array",
            Self::Object => "object",
        }
    }

    pub fn accepts(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Boolean => value.is_boolean(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }
}

impl fmt::Display for ArgKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ArgKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "string" => Ok(Self::String),
            "boolean" | "bool" => Ok(Self::Boolean),
            "integer" | "int" => Ok(Self::Integer),
            "array" => Ok(Self::Array),
            "object" => Ok(Self::Object),
            other => Err(format!("unknown argument type '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArgSpec {
    #[serde(rename = "type")]
    pub kind: ArgKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ArgSpec {
    pub fn new(kind: ArgKind) -> Self {
        Self {
            kind,
            required: false,
            description: None,
        }
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Arguments a mapper accepts, keyed by name.
///
/// Checked before a mapper is handed out so invocation never sees
/// unexpected input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InputContract {
    args: BTreeMap<String, ArgSpec>,
}

impl InputContract {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, spec: ArgSpec) {
        self.args.insert(name.into(), spec);
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, spec: ArgSpec) -> Self {
        self.insert(name, spec);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ArgSpec> {
        self.args.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.args.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArgSpec)> {
        self.args.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Every problem with `args`: unknown keys, missing required keys and
    /// type mismatches, in key order.
    pub fn check(&self, args: &serde_json::Map<String, Value>) -> Result<(), Vec<String>> {
        let mut problems = Vec::new();
        let mut given: Vec<&String> = args.keys().collect();
        given.sort();
        for key in given {
            match self.args.get(key) {
                None => problems.push(format!("unknown argument '{key}'")),
                Some(spec) if !spec.kind.accepts(&args[key]) => problems.push(format!(
                    "argument '{key}' must be of type {}",
                    spec.kind
                )),
                Some(_) => {}
            }
        }
        for (key, spec) in &self.args {
            if spec.required && !args.contains_key(key) {
                problems.push(format!("missing required argument '{key}'"));
            }
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }
}
