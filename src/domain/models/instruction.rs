//! Review comments and the instructions embedded in them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;

/// A human comment on a pull request or commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub author: String,
    pub body: String,
    pub updated_at: DateTime<Utc>,
}

impl Comment {
    pub fn new(author: impl Into<String>, body: impl Into<String>, updated_at: DateTime<Utc>) -> Self {
        Self {
            author: author.into(),
            body: body.into(),
            updated_at,
        }
    }
}

/// A directive addressed to the bot.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub author: String,
    pub name: String,
    /// `Value::Null` when the directive carries no argument.
    pub args: Value,
    pub date: DateTime<Utc>,
}

impl Instruction {
    pub fn new(
        author: impl Into<String>,
        name: impl Into<String>,
        args: Value,
        date: DateTime<Utc>,
    ) -> Self {
        Self {
            author: author.into(),
            name: name.into().trim().to_lowercase(),
            args,
            date,
        }
    }

    pub fn has_args(&self) -> bool {
        !self.args.is_null()
    }

    /// Arguments as a list of strings: a scalar becomes a one-item list.
    pub fn args_as_patterns(&self) -> Vec<String> {
        match &self.args {
            Value::Null => Vec::new(),
            Value::Sequence(items) => items.iter().filter_map(scalar_to_string).collect(),
            other => scalar_to_string(other).into_iter().collect(),
        }
    }
}

/// Render a YAML scalar as text, `None` for collections.
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
