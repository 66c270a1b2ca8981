//! Declarative mapping templates.
//!
//! A template is data, not code: static values plus ordered rules that copy
//! XPath selections or request arguments into bag-info keys.
//!
//! ```json
//! {
//!   "namespaces": { "": "http://www.openarchives.org/OAI/2.0/" },
//!   "static": { "Source-Organization": "https://d-nb.info/gnd/0" },
//!   "arguments": { "collection": { "type": "string" } },
//!   "rules": [
//!     { "key": "DC-Title", "path": "./GetRecord/record/metadata/*/*", "required": true },
//!     { "key": "Collection", "arg": "collection" }
//!   ]
//! }
//! ```

use crate::contract::InputContract;
use crate::ops::{apply_all, compile_all, Budget, Op, PostOp};
use crate::xpath::{Namespaces, XPath};
use crate::{arg_values, Mapper, MappingError, MappingInput};
use bagsmith_schema::{is_valid_tag_name, BagInfo};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A value in the `static` section: one string or several.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StaticValue {
    One(String),
    Many(Vec<String>),
}

impl StaticValue {
    fn values(&self) -> Vec<String> {
        match self {
            Self::One(v) => vec![v.clone()],
            Self::Many(vs) => vs.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleDocument {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arg: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post: Vec<PostOp>,
    #[serde(default)]
    pub required: bool,
}

/// Serde model of a template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TemplateDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Context the template registers under when loaded from an extension directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default)]
    pub namespaces: Namespaces,
    #[serde(default, rename = "static")]
    pub statics: BTreeMap<String, StaticValue>,
    #[serde(default)]
    pub arguments: InputContract,
    #[serde(default)]
    pub rules: Vec<RuleDocument>,
}

#[derive(Debug, Clone)]
enum RuleSource {
    Path(XPath),
    Arg(String),
}

#[derive(Debug, Clone)]
struct Rule {
    key: String,
    source: RuleSource,
    ops: Vec<Op>,
    required: bool,
}

/// A compiled template.
#[derive(Debug, Clone)]
pub struct Template {
    description: Option<String>,
    context: Option<String>,
    statics: Vec<(String, Vec<String>)>,
    rules: Vec<Rule>,
    contract: InputContract,
}

impl Template {
    /// Compile `doc`. Errors name the offending rule by its 1-based position.
    pub fn compile(doc: &TemplateDocument) -> Result<Self, (Option<usize>, String)> {
        let mut rules = Vec::with_capacity(doc.rules.len());
        for (idx, rule) in doc.rules.iter().enumerate() {
            let at = |msg: String| (Some(idx + 1), format!("rule '{}': {msg}", rule.key));
            if !is_valid_tag_name(&rule.key) {
                return Err(at("invalid key".to_owned()));
            }
            let source = match (&rule.path, &rule.arg) {
                (Some(path), None) => RuleSource::Path(XPath::parse(path, &doc.namespaces).map_err(at)?),
                (None, Some(arg)) => {
                    if !doc.arguments.contains(arg) {
                        return Err(at(format!("argument '{arg}' is not declared in 'arguments'")));
                    }
                    RuleSource::Arg(arg.clone())
                }
                _ => return Err(at("exactly one of 'path' and 'arg' is required".to_owned())),
            };
            rules.push(Rule {
                key: rule.key.clone(),
                source,
                ops: compile_all(&rule.post).map_err(at)?,
                required: rule.required,
            });
        }

        if let Some(key) = doc.statics.keys().find(|k| !is_valid_tag_name(k)) {
            return Err((None, format!("static tag {key:?}: invalid key")));
        }

        Ok(Self {
            description: doc.description.clone(),
            context: doc.context.clone(),
            statics: doc
                .statics
                .iter()
                .map(|(k, v)| (k.clone(), v.values()))
                .collect(),
            rules,
            contract: doc.arguments.clone(),
        })
    }

    pub fn from_json_str(text: &str) -> Result<Self, (Option<usize>, String)> {
        let doc: TemplateDocument =
            serde_json::from_str(text).map_err(|e| (Some(e.line()), e.to_string()))?;
        Self::compile(&doc)
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    fn needs_document(&self) -> bool {
        self.rules
            .iter()
            .any(|r| matches!(r.source, RuleSource::Path(_)))
    }
}

impl Mapper for Template {
    fn map(&self, input: &MappingInput) -> Result<BagInfo, MappingError> {
        let doc = if self.needs_document() {
            Some(input.document()?)
        } else {
            None
        };
        let mut budget = Budget::unlimited();
        let mut out = BagInfo::new();
        for (key, values) in &self.statics {
            out.extend_values(key, values.iter().cloned());
        }
        for rule in &self.rules {
            let selected = match (&rule.source, &doc) {
                (RuleSource::Path(path), Some(doc)) => path.select(doc),
                (RuleSource::Arg(name), _) => input.args.get(name).map(arg_values).unwrap_or_default(),
                (RuleSource::Path(_), None) => Vec::new(),
            };
            let values = apply_all(&rule.ops, selected, &mut budget)?;
            if values.is_empty() {
                if rule.required {
                    return Err(MappingError::MissingField {
                        key: rule.key.clone(),
                    });
                }
                continue;
            }
            out.extend_values(&rule.key, values);
        }
        Ok(out)
    }

    fn contract(&self) -> InputContract {
        self.contract.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const RECORD: &str = r#"<record xmlns:dc="http://purl.org/dc/elements/1.1/">
  <dc:title> A title </dc:title>
  <dc:creator>Doe, Jane</dc:creator>
  <dc:creator>Roe, Richard</dc:creator>
  <id>repo:item:7</id>
</record>"#;

    fn template(v: serde_json::Value) -> Template {
        let doc: TemplateDocument = serde_json::from_value(v).unwrap();
        Template::compile(&doc).unwrap()
    }

    fn input() -> MappingInput {
        MappingInput::new(Some(RECORD.to_owned()))
    }

    #[test]
    fn maps_statics_then_rules_in_order() {
        let t = template(json!({
            "namespaces": {"dc": "http://purl.org/dc/elements/1.1/"},
            "static": {"Source-Organization": "Org"},
            "rules": [
                {"key": "DC-Title", "path": "dc:title", "post": [{"op": "trim"}]},
                {"key": "DC-Creator", "path": "dc:creator"},
                {"key": "External-Identifier", "path": "id",
                 "post": [{"op": "split", "separator": ":", "index": 1, "from_right": true}]}
            ]
        }));
        let info = t.map(&input()).unwrap();
        let keys: Vec<&str> = info.keys().collect();
        assert_eq!(
            keys,
            vec!["Source-Organization", "DC-Title", "DC-Creator", "External-Identifier"]
        );
        assert_eq!(info.first("DC-Title"), Some("A title"));
        assert_eq!(info.get("DC-Creator").unwrap(), ["Doe, Jane", "Roe, Richard"]);
        assert_eq!(info.first("External-Identifier"), Some("7"));
    }

    #[test]
    fn empty_optional_rule_is_omitted() {
        let t = template(json!({"rules": [{"key": "DC-Rights", "path": "rights"}]}));
        let info = t.map(&input()).unwrap();
        assert!(!info.contains_key("DC-Rights"));
    }

    #[test]
    fn required_rule_without_value_fails() {
        let t = template(json!({"rules": [{"key": "DC-Rights", "path": "rights", "required": true}]}));
        let err = t.map(&input()).unwrap_err();
        assert!(matches!(err, MappingError::MissingField { key } if key == "DC-Rights"));
    }

    #[test]
    fn arguments_are_mapped() {
        let t = template(json!({
            "arguments": {"collection": {"type": "array"}},
            "rules": [{"key": "Collection", "arg": "collection"}]
        }));
        let args = json!({"collection": ["a", "b"]}).as_object().cloned().unwrap();
        let info = t.map(&MappingInput::new(None).with_args(args)).unwrap();
        assert_eq!(info.get("Collection").unwrap(), ["a", "b"]);
        assert!(t.contract().contains("collection"));
    }

    #[test]
    fn static_only_template_needs_no_metadata() {
        let t = template(json!({"static": {"A": ["1", "2"]}}));
        let info = t.map(&MappingInput::new(None)).unwrap();
        assert_eq!(info.get("A").unwrap(), ["1", "2"]);
    }

    #[test]
    fn path_rule_without_metadata_fails() {
        let t = template(json!({"rules": [{"key": "A", "path": "a"}]}));
        assert!(matches!(
            t.map(&MappingInput::new(None)),
            Err(MappingError::MissingSourceMetadata)
        ));
    }

    #[test]
    fn compile_errors_name_the_rule() {
        let doc: TemplateDocument = serde_json::from_value(json!({
            "rules": [{"key": "A", "path": "a"}, {"key": "B", "path": "x:b"}]
        }))
        .unwrap();
        let (line, msg) = Template::compile(&doc).unwrap_err();
        assert_eq!(line, Some(2));
        assert!(msg.contains("rule 'B'"));
    }

    #[test]
    fn static_keys_must_be_tag_names() {
        for key in ["Payload-Oxum: 999.9\nX-Note", "A:B", " A", ""] {
            let doc: TemplateDocument = serde_json::from_value(json!({"static": {key: "v"}})).unwrap();
            let (line, msg) = Template::compile(&doc).unwrap_err();
            assert_eq!(line, None);
            assert!(msg.contains("invalid key"), "{msg}");
        }
    }

    #[test]
    fn undeclared_argument_rejected() {
        let doc: TemplateDocument =
            serde_json::from_value(json!({"rules": [{"key": "A", "arg": "x"}]})).unwrap();
        assert!(Template::compile(&doc).is_err());
    }

    #[test]
    fn path_and_arg_are_exclusive() {
        let doc: TemplateDocument = serde_json::from_value(json!({
            "arguments": {"x": {"type": "string"}},
            "rules": [{"key": "A", "arg": "x", "path": "a"}]
        }))
        .unwrap();
        assert!(Template::compile(&doc).is_err());
    }

    #[test]
    fn unknown_fields_rejected() {
        assert!(Template::from_json_str(r#"{"rulez": []}"#).is_err());
    }
}
