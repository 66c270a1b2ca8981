//! Mapping scripts: a restricted, line-oriented language for request-supplied
//! and remotely fetched mappers.
//!
//! ```text
//! # context: mapping
//! # description: OAI-DC titles and identifiers
//! ns = "http://www.openarchives.org/OAI/2.0/"
//! ns dc = "http://purl.org/dc/elements/1.1/"
//! arg collection string required
//! set Source-Organization = "https://d-nb.info/gnd/0"
//! set Collection = $collection
//! let id <- ./GetRecord/record/header/identifier | first
//! emit Origin-System-Identifier = @id | split ":" 0 right
//! map DC-Title <- //dc:title | trim
//! require DC-Title
//! default DC-Rights = "unknown"
//! drop Internal-Note
//! ```
//!
//! There are no loops or calls. Execution is still bounded by a budget of
//! value operations so a hostile document cannot make a script run long.

use crate::contract::{ArgKind, ArgSpec, InputContract};
use crate::ops::{apply_all, Budget, Op, PostOp};
use crate::xpath::{Namespaces, XPath};
use crate::{arg_values, Mapper, MappingError, MappingInput};
use bagsmith_schema::{is_valid_tag_name, BagInfo};
use std::collections::{HashMap, HashSet};

pub const DEFAULT_SCRIPT_BUDGET: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Str(String),
    Pipe,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Self::Word(w) => format!("'{w}'"),
            Self::Str(s) => format!("\"{s}\""),
            Self::Pipe => "'|'".to_owned(),
        }
    }
}

fn tokenize(line: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == '|' {
            chars.next();
            tokens.push(Token::Pipe);
        } else if c == '"' {
            chars.next();
            let mut s = String::new();
            loop {
                match chars.next() {
                    None => return Err("unterminated string".to_owned()),
                    Some('"') => break,
                    Some('\\') => match chars.next() {
                        Some('n') => s.push('\n'),
                        Some('t') => s.push('\t'),
                        Some(e @ ('"' | '\\')) => s.push(e),
                        // Other escapes stay verbatim so regex classes like `\d` need no doubling.
                        Some(e) => {
                            s.push('\\');
                            s.push(e);
                        }
                        None => return Err("unterminated string".to_owned()),
                    },
                    Some(other) => s.push(other),
                }
            }
            tokens.push(Token::Str(s));
        } else {
            let mut w = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() || c == '|' || c == '"' {
                    break;
                }
                w.push(c);
                chars.next();
            }
            tokens.push(Token::Word(w));
        }
    }
    Ok(tokens)
}

struct Cursor {
    tokens: Vec<Token>,
    pos: usize,
}

impl Cursor {
    fn next(&mut self, what: &str) -> Result<Token, String> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| format!("expected {what}"))?;
        self.pos += 1;
        Ok(token)
    }

    fn word(&mut self, what: &str) -> Result<String, String> {
        match self.next(what)? {
            Token::Word(w) => Ok(w),
            other => Err(format!("expected {what}, found {}", other.describe())),
        }
    }

    fn string(&mut self, what: &str) -> Result<String, String> {
        match self.next(what)? {
            Token::Str(s) => Ok(s),
            other => Err(format!("expected quoted {what}, found {}", other.describe())),
        }
    }

    fn expect(&mut self, symbol: &str) -> Result<(), String> {
        match self.next(&format!("'{symbol}'"))? {
            Token::Word(w) if w == symbol => Ok(()),
            other => Err(format!("expected '{symbol}', found {}", other.describe())),
        }
    }

    fn peek_word(&self, word: &str) -> bool {
        matches!(self.tokens.get(self.pos), Some(Token::Word(w)) if w == word)
    }

    fn peek_pipe(&self) -> bool {
        matches!(self.tokens.get(self.pos), Some(Token::Pipe))
    }

    fn finish(&self) -> Result<(), String> {
        match self.tokens.get(self.pos) {
            None => Ok(()),
            Some(t) => Err(format!("unexpected {}", t.describe())),
        }
    }
}

#[derive(Debug, Clone)]
enum Value {
    Literal(String),
    Arg(String),
}

#[derive(Debug, Clone)]
enum Statement {
    Set { key: String, value: Value },
    Map { key: String, path: XPath, ops: Vec<Op> },
    Let { var: String, path: XPath, ops: Vec<Op> },
    Emit { key: String, var: String, ops: Vec<Op> },
    Require { key: String },
    Default { key: String, value: String },
    Drop { key: String },
}

/// A parsed mapping script.
#[derive(Debug, Clone)]
pub struct Script {
    description: Option<String>,
    context: Option<String>,
    statements: Vec<Statement>,
    contract: InputContract,
    budget: u64,
    needs_document: bool,
}

impl Script {
    /// Parse `source`. Errors carry the 1-based line number.
    pub fn parse(source: &str, budget: u64) -> Result<Self, (usize, String)> {
        let mut parser = Parser::default();
        for (idx, raw) in source.lines().enumerate() {
            parser.line(raw).map_err(|e| (idx + 1, e))?;
        }
        if parser.statements.is_empty() {
            return Err((source.lines().count().max(1), "script has no statements".to_owned()));
        }
        let needs_document = parser
            .statements
            .iter()
            .any(|s| matches!(s, Statement::Map { .. } | Statement::Let { .. }));
        Ok(Self {
            description: parser.description,
            context: parser.context,
            statements: parser.statements,
            contract: parser.contract,
            budget,
            needs_document,
        })
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    pub fn budget(&self) -> u64 {
        self.budget
    }
}

#[derive(Default)]
struct Parser {
    description: Option<String>,
    context: Option<String>,
    namespaces: Namespaces,
    contract: InputContract,
    vars: HashSet<String>,
    statements: Vec<Statement>,
}

impl Parser {
    fn line(&mut self, raw: &str) -> Result<(), String> {
        let line = raw.trim();
        if line.is_empty() {
            return Ok(());
        }
        if let Some(comment) = line.strip_prefix('#') {
            if self.statements.is_empty() {
                self.header(comment.trim());
            }
            return Ok(());
        }

        let mut cur = Cursor {
            tokens: tokenize(line)?,
            pos: 0,
        };
        let keyword = cur.word("statement")?;
        match keyword.as_str() {
            "ns" => {
                let prefix = if cur.peek_word("=") {
                    String::new()
                } else {
                    cur.word("namespace prefix")?
                };
                cur.expect("=")?;
                let uri = match cur.next("namespace URI")? {
                    Token::Str(s) | Token::Word(s) => s,
                    Token::Pipe => return Err("expected namespace URI, found '|'".to_owned()),
                };
                self.namespaces.insert(prefix, uri);
            }
            "arg" => {
                let name = identifier(&cur.word("argument name")?)?;
                let kind: ArgKind = cur.word("argument type")?.parse()?;
                let mut spec = ArgSpec::new(kind);
                if cur.peek_word("required") {
                    cur.pos += 1;
                    spec = spec.required();
                }
                if self.contract.contains(&name) {
                    return Err(format!("argument '{name}' declared twice"));
                }
                self.contract.insert(name, spec);
            }
            "set" => {
                let key = tag_key(&cur.word("tag name")?)?;
                cur.expect("=")?;
                let value = match cur.next("value")? {
                    Token::Str(s) => Value::Literal(s),
                    Token::Word(w) if w.starts_with('$') => {
                        let name = &w[1..];
                        if !self.contract.contains(name) {
                            return Err(format!("argument '{name}' is not declared with 'arg'"));
                        }
                        Value::Arg(name.to_owned())
                    }
                    other => return Err(format!("expected quoted value or $argument, found {}", other.describe())),
                };
                self.statements.push(Statement::Set { key, value });
            }
            "map" | "let" => {
                let target = cur.word(if keyword == "map" { "tag name" } else { "variable name" })?;
                cur.expect("<-")?;
                let path = XPath::parse(&cur.word("path")?, &self.namespaces)?;
                let ops = parse_ops(&mut cur)?;
                if keyword == "map" {
                    self.statements.push(Statement::Map {
                        key: tag_key(&target)?,
                        path,
                        ops,
                    });
                } else {
                    let var = identifier(&target)?;
                    self.vars.insert(var.clone());
                    self.statements.push(Statement::Let { var, path, ops });
                }
            }
            "emit" => {
                let key = tag_key(&cur.word("tag name")?)?;
                cur.expect("=")?;
                let reference = cur.word("@variable")?;
                let var = reference
                    .strip_prefix('@')
                    .ok_or_else(|| format!("expected @variable, found '{reference}'"))?;
                if !self.vars.contains(var) {
                    return Err(format!("variable '{var}' is not defined with 'let'"));
                }
                let ops = parse_ops(&mut cur)?;
                self.statements.push(Statement::Emit {
                    key,
                    var: var.to_owned(),
                    ops,
                });
            }
            "require" => {
                let key = tag_key(&cur.word("tag name")?)?;
                self.statements.push(Statement::Require { key });
            }
            "default" => {
                let key = tag_key(&cur.word("tag name")?)?;
                cur.expect("=")?;
                let value = cur.string("value")?;
                self.statements.push(Statement::Default { key, value });
            }
            "drop" => {
                let key = tag_key(&cur.word("tag name")?)?;
                self.statements.push(Statement::Drop { key });
            }
            other => return Err(format!("unknown statement '{other}'")),
        }
        cur.finish()
    }

    fn header(&mut self, comment: &str) {
        if let Some(ctx) = comment.strip_prefix("context:") {
            self.context = Some(ctx.trim().to_owned());
        } else if let Some(desc) = comment.strip_prefix("description:") {
            self.description = Some(desc.trim().to_owned());
        }
    }
}

fn parse_ops(cur: &mut Cursor) -> Result<Vec<Op>, String> {
    let mut ops = Vec::new();
    while cur.peek_pipe() {
        cur.pos += 1;
        let name = cur.word("operation")?;
        let op = match name.as_str() {
            "trim" => PostOp::Trim,
            "first" => PostOp::First,
            "unique" => PostOp::Unique,
            "split" => {
                let separator = cur.string("separator")?;
                let index = cur
                    .word("index")?
                    .parse()
                    .map_err(|_| "split index must be a non-negative integer".to_owned())?;
                let from_right = cur.peek_word("right");
                if from_right {
                    cur.pos += 1;
                }
                PostOp::Split {
                    separator,
                    index,
                    from_right,
                }
            }
            "filter" => PostOp::Filter {
                regex: cur.string("pattern")?,
            },
            "replace" => PostOp::Replace {
                regex: cur.string("pattern")?,
                with: cur.string("replacement")?,
            },
            "prefix" => PostOp::Prefix {
                value: cur.string("prefix")?,
            },
            other => return Err(format!("unknown operation '{other}'")),
        };
        ops.push(Op::compile(&op)?);
    }
    Ok(ops)
}

fn tag_key(word: &str) -> Result<String, String> {
    if !is_valid_tag_name(word) || word.starts_with(['$', '@']) {
        return Err(format!("invalid tag name '{word}'"));
    }
    Ok(word.to_owned())
}

fn identifier(word: &str) -> Result<String, String> {
    let valid = word
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && word.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(word.to_owned())
    } else {
        Err(format!("invalid name '{word}'"))
    }
}

impl Mapper for Script {
    fn map(&self, input: &MappingInput) -> Result<BagInfo, MappingError> {
        let doc = if self.needs_document {
            Some(input.document()?)
        } else {
            None
        };
        let select = |path: &XPath, budget: &mut Budget| -> Result<Vec<String>, MappingError> {
            let values = doc.as_ref().map(|d| path.select(d)).unwrap_or_default();
            budget.charge(values.len() as u64)?;
            Ok(values)
        };

        let mut budget = Budget::new(self.budget);
        let mut out = BagInfo::new();
        let mut vars: HashMap<&str, Vec<String>> = HashMap::new();
        for statement in &self.statements {
            budget.charge(1)?;
            match statement {
                Statement::Set { key, value } => {
                    let values = match value {
                        Value::Literal(s) => vec![s.clone()],
                        Value::Arg(name) => input.args.get(name).map(arg_values).unwrap_or_default(),
                    };
                    budget.charge(values.len() as u64)?;
                    out.extend_values(key, values);
                }
                Statement::Map { key, path, ops } => {
                    let values = apply_all(ops, select(path, &mut budget)?, &mut budget)?;
                    out.extend_values(key, values);
                }
                Statement::Let { var, path, ops } => {
                    let values = apply_all(ops, select(path, &mut budget)?, &mut budget)?;
                    vars.insert(var.as_str(), values);
                }
                Statement::Emit { key, var, ops } => {
                    let values = vars.get(var.as_str()).cloned().unwrap_or_default();
                    let values = apply_all(ops, values, &mut budget)?;
                    out.extend_values(key, values);
                }
                Statement::Require { key } => {
                    if !out.contains_key(key) {
                        return Err(MappingError::MissingField { key: key.clone() });
                    }
                }
                Statement::Default { key, value } => {
                    if !out.contains_key(key) {
                        out.push(key.clone(), value.clone());
                    }
                }
                Statement::Drop { key } => {
                    out.remove(key);
                }
            }
        }
        Ok(out)
    }

    fn contract(&self) -> InputContract {
        self.contract.clone()
    }
}
