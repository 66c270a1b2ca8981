//! A small XPath subset over `roxmltree` documents.
//!
//! Supported forms:
//!
//! ```text
//! ./a/b          children of the root element, then their children
//! a/b            same as ./a/b
//! /root/a        absolute, first step matches the root element
//! //a            every `a` element in the document
//! a//b           `b` descendants of `a`
//! p:name         element in the namespace bound to prefix `p`
//! *              any element
//! a/@attr        attribute value (last step only)
//! a/text()       element text (last step only, same as `a`)
//! ```
//!
//! Unprefixed element names use the namespace bound to the empty prefix, if
//! any. Predicates and functions other than `text()` are rejected.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Prefix to namespace URI. The empty prefix is the default namespace.
pub type Namespaces = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Child,
    Descendant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum NameTest {
    Any,
    Name { ns: Option<String>, local: String },
}

impl NameTest {
    fn matches(&self, node: roxmltree::Node<'_, '_>) -> bool {
        if !node.is_element() {
            return false;
        }
        match self {
            Self::Any => true,
            Self::Name { ns, local } => {
                let tag = node.tag_name();
                tag.name() == local && tag.namespace() == ns.as_deref()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Step {
    axis: Axis,
    test: NameTest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Output {
    Text,
    Attribute { ns: Option<String>, local: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XPath {
    source: String,
    absolute: bool,
    steps: Vec<Step>,
    output: Output,
}

impl XPath {
    pub fn parse(source: &str, namespaces: &Namespaces) -> Result<Self, String> {
        let trimmed = source.trim();
        if trimmed.is_empty() {
            return Err("empty path".to_owned());
        }

        let (absolute, mut descend, rest) = if let Some(r) = trimmed.strip_prefix("//") {
            (true, true, r)
        } else if let Some(r) = trimmed.strip_prefix('/') {
            (true, false, r)
        } else if trimmed == "." {
            (false, false, "")
        } else if let Some(r) = trimmed.strip_prefix("./") {
            (false, false, r)
        } else {
            (false, false, trimmed)
        };

        let segments: Vec<&str> = if rest.is_empty() {
            Vec::new()
        } else {
            rest.split('/').collect()
        };
        let mut steps = Vec::new();
        let mut output = Output::Text;
        for (idx, segment) in segments.iter().enumerate() {
            let last = idx + 1 == segments.len();
            match *segment {
                "" => {
                    if last {
                        return Err(format!("'{source}' ends with '/'"));
                    }
                    descend = true;
                    continue;
                }
                "." => continue,
                "text()" if last => output = Output::Text,
                s if s.starts_with('@') && last => {
                    let (ns, local) = resolve_name(&s[1..], namespaces, false)?;
                    output = Output::Attribute { ns, local };
                }
                s if s.starts_with('@') || s == "text()" => {
                    return Err(format!("'{s}' is only allowed as the last step"));
                }
                s if s.contains(['[', ']', '(', ')']) => {
                    return Err(format!("unsupported step '{s}'"));
                }
                "*" => steps.push(Step {
                    axis: if descend { Axis::Descendant } else { Axis::Child },
                    test: NameTest::Any,
                }),
                s => {
                    let (ns, local) = resolve_name(s, namespaces, true)?;
                    steps.push(Step {
                        axis: if descend { Axis::Descendant } else { Axis::Child },
                        test: NameTest::Name { ns, local },
                    });
                }
            }
            descend = false;
        }
        if absolute && steps.is_empty() {
            return Err(format!("'{source}' selects no element"));
        }

        Ok(Self {
            source: source.to_owned(),
            absolute,
            steps,
            output,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Evaluate against `doc`, returning values in document order. Elements
    /// without text contribute nothing.
    pub fn select(&self, doc: &roxmltree::Document<'_>) -> Vec<String> {
        let start = if self.absolute {
            doc.root()
        } else {
            doc.root_element()
        };
        let mut current = vec![start];
        for step in &self.steps {
            let mut seen = HashSet::new();
            let mut next = Vec::new();
            for node in &current {
                match step.axis {
                    Axis::Child => collect_matching(&step.test, node.children(), &mut seen, &mut next),
                    Axis::Descendant => {
                        collect_matching(&step.test, node.descendants().skip(1), &mut seen, &mut next);
                    }
                }
            }
            current = next;
        }

        current
            .into_iter()
            .filter_map(|node| match &self.output {
                Output::Text => node.text().map(str::to_owned),
                Output::Attribute { ns, local } => match ns {
                    Some(uri) => node.attribute((uri.as_str(), local.as_str())),
                    None => node.attribute(local.as_str()),
                }
                .map(str::to_owned),
            })
            .collect()
    }
}

impl fmt::Display for XPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn collect_matching<'a, 'input>(
    test: &NameTest,
    candidates: impl Iterator<Item = roxmltree::Node<'a, 'input>>,
    seen: &mut HashSet<roxmltree::NodeId>,
    out: &mut Vec<roxmltree::Node<'a, 'input>>,
) {
    for candidate in candidates {
        if test.matches(candidate) && seen.insert(candidate.id()) {
            out.push(candidate);
        }
    }
}

fn resolve_name(
    name: &str,
    namespaces: &Namespaces,
    use_default: bool,
) -> Result<(Option<String>, String), String> {
    if name.is_empty() {
        return Err("empty name".to_owned());
    }
    match name.split_once(':') {
        Some((prefix, local)) => {
            let uri = namespaces
                .get(prefix)
                .filter(|_| !prefix.is_empty())
                .ok_or_else(|| format!("undeclared namespace prefix '{prefix}'"))?;
            if local.is_empty() {
                return Err(format!("empty local name in '{name}'"));
            }
            Ok((Some(uri.clone()), local.to_owned()))
        }
        None if use_default => Ok((namespaces.get("").cloned(), name.to_owned())),
        None => Ok((None, name.to_owned())),
    }
}
