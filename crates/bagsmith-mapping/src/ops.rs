//! Value post-processing shared by templates and mapping scripts.

use crate::MappingError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Post-processing step as written in a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case", deny_unknown_fields)]
pub enum PostOp {
    /// Strip surrounding whitespace; values that become empty are dropped.
    Trim,
    /// Keep only the first value.
    First,
    /// Split each value once at the first (or last) separator and keep one part.
    Split {
        separator: String,
        index: usize,
        #[serde(default)]
        from_right: bool,
    },
    /// Keep values in which the pattern occurs.
    Filter { regex: String },
    /// Replace every match of the pattern.
    Replace { regex: String, with: String },
    Prefix { value: String },
    /// Drop repeated values, keeping the first occurrence.
    Unique,
}

/// A `PostOp` with its pattern compiled.
#[derive(Debug, Clone)]
pub enum Op {
    Trim,
    First,
    Split {
        separator: String,
        index: usize,
        from_right: bool,
    },
    Filter(Regex),
    Replace(Regex, String),
    Prefix(String),
    Unique,
}

impl Op {
    pub fn compile(op: &PostOp) -> Result<Self, String> {
        let pattern = |re: &str| Regex::new(re).map_err(|e| format!("invalid regex '{re}': {e}"));
        Ok(match op {
            PostOp::Trim => Self::Trim,
            PostOp::First => Self::First,
            PostOp::Split {
                separator,
                index,
                from_right,
            } => {
                if separator.is_empty() {
                    return Err("split separator must not be empty".to_owned());
                }
                Self::Split {
                    separator: separator.clone(),
                    index: *index,
                    from_right: *from_right,
                }
            }
            PostOp::Filter { regex } => Self::Filter(pattern(regex)?),
            PostOp::Replace { regex, with } => Self::Replace(pattern(regex)?, with.clone()),
            PostOp::Prefix { value } => Self::Prefix(value.clone()),
            PostOp::Unique => Self::Unique,
        })
    }

    pub fn apply(&self, values: Vec<String>, budget: &mut Budget) -> Result<Vec<String>, MappingError> {
        budget.charge(values.len() as u64)?;
        Ok(match self {
            Self::Trim => values
                .into_iter()
                .map(|v| v.trim().to_owned())
                .filter(|v| !v.is_empty())
                .collect(),
            Self::First => values.into_iter().take(1).collect(),
            Self::Split {
                separator,
                index,
                from_right,
            } => values
                .into_iter()
                .filter_map(|v| {
                    let parts = if *from_right {
                        v.rsplit_once(separator.as_str())
                    } else {
                        v.split_once(separator.as_str())
                    };
                    match parts {
                        Some((a, b)) => [a, b].get(*index).map(|s| (*s).to_owned()),
                        None if *index == 0 => Some(v),
                        None => None,
                    }
                })
                .collect(),
            Self::Filter(re) => values.into_iter().filter(|v| re.is_match(v)).collect(),
            Self::Replace(re, with) => values
                .into_iter()
                .map(|v| re.replace_all(&v, with.as_str()).into_owned())
                .collect(),
            Self::Prefix(prefix) => values.into_iter().map(|v| format!("{prefix}{v}")).collect(),
            Self::Unique => {
                let mut seen = HashSet::new();
                values.into_iter().filter(|v| seen.insert(v.clone())).collect()
            }
        })
    }
}

pub fn compile_all(ops: &[PostOp]) -> Result<Vec<Op>, String> {
    ops.iter().map(Op::compile).collect()
}

pub fn apply_all(ops: &[Op], mut values: Vec<String>, budget: &mut Budget) -> Result<Vec<String>, MappingError> {
    for op in ops {
        values = op.apply(values, budget)?;
    }
    Ok(values)
}

/// Count of value operations a mapping may still perform.
#[derive(Debug, Clone, Copy)]
pub struct Budget {
    limit: u64,
    remaining: u64,
}

impl Budget {
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            remaining: limit,
        }
    }

    pub fn unlimited() -> Self {
        Self::new(u64::MAX)
    }

    pub fn charge(&mut self, amount: u64) -> Result<(), MappingError> {
        if amount > self.remaining {
            self.remaining = 0;
            return Err(MappingError::BudgetExhausted { budget: self.limit });
        }
        self.remaining -= amount;
        Ok(())
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }
}
