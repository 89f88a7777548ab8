//! Extraction of `jenkins:` directives from comment bodies.
//!
//! Four forms are recognized:
//!
//! 1. a directive opening the comment, optionally wrapped in backticks;
//! 2. a directive starting a later line;
//! 3. a directive wrapped in backticks starting a later line;
//! 4. a fenced block, optionally tagged `yaml` or `yml`, whose first line is
//!    `jenkins:`.
//!
//! Each match is parsed as YAML. Malformed matches are logged and skipped.

use serde_yaml::{Mapping, Value};
use std::collections::VecDeque;
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::domain::models::instruction::scalar_to_string;
use crate::domain::models::{Comment, Instruction};

const DIRECTIVE_KEY: &str = "jenkins";

fn directive_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(concat!(
            r"\A`*jenkins:[^\n]*`*",
            r"|\njenkins:[^\n]*",
            r"|\n`+jenkins:[^\n]*`+",
            r"|(?s:```(?:ya?ml)?\njenkins:.*?\n```)",
        ))
        .expect("directive pattern is valid")
    })
}

/// Lazily parse instructions of comments, oldest comment first.
///
/// The returned iterator is cheap to clone, so the sequence can be
/// replayed from the start.
pub fn parse_instructions(comments: &[Comment]) -> Instructions<'_> {
    Instructions {
        comments: comments.iter(),
        pending: VecDeque::new(),
    }
}

/// Iterator over the instructions of a comment list.
#[derive(Debug, Clone)]
pub struct Instructions<'a> {
    comments: std::slice::Iter<'a, Comment>,
    pending: VecDeque<Instruction>,
}

impl Iterator for Instructions<'_> {
    type Item = Instruction;

    fn next(&mut self) -> Option<Instruction> {
        loop {
            if let Some(instruction) = self.pending.pop_front() {
                return Some(instruction);
            }
            let comment = self.comments.next()?;
            self.pending.extend(parse_comment(comment));
        }
    }
}

/// Instructions of one comment, in textual order.
pub fn parse_comment(comment: &Comment) -> Vec<Instruction> {
    let body = comment.body.replace('\r', "");
    let mut instructions = Vec::new();

    for found in directive_re().find_iter(&body) {
        let text = found.as_str().trim().trim_matches('`');
        let text = text
            .strip_prefix("yaml\n")
            .or_else(|| text.strip_prefix("yml\n"))
            .unwrap_or(text)
            .trim();

        let document: Value = match serde_yaml::from_str(text) {
            Ok(document) => document,
            Err(e) => {
                warn!(
                    author = %comment.author,
                    error = %e,
                    "Ignoring malformed instruction"
                );
                continue;
            }
        };

        let Value::Mapping(mut mapping) = document else {
            continue;
        };
        let directive = mapping.remove(DIRECTIVE_KEY).unwrap_or(Value::Null);
        // An unindented block puts the directives next to the marker.
        let directive = if directive.is_null() && !mapping.is_empty() {
            Value::Mapping(mapping)
        } else {
            directive
        };

        push_directive(&mut instructions, comment, directive);
    }

    instructions
}

fn push_directive(instructions: &mut Vec<Instruction>, comment: &Comment, directive: Value) {
    match directive {
        Value::Null => {}
        Value::String(name) if name.trim().is_empty() => {}
        Value::String(name) => {
            instructions.push(instruction(comment, &name, Value::Null));
        }
        Value::Mapping(mapping) => push_mapping(instructions, comment, mapping),
        Value::Sequence(items) => {
            for item in items {
                push_directive(instructions, comment, item);
            }
        }
        other => {
            debug!(author = %comment.author, directive = ?other, "Ignoring scalar directive");
        }
    }
}

fn push_mapping(instructions: &mut Vec<Instruction>, comment: &Comment, mapping: Mapping) {
    for (name, args) in mapping {
        if let Some(name) = scalar_to_string(&name) {
            instructions.push(instruction(comment, &name, args));
        }
    }
}

fn instruction(comment: &Comment, name: &str, args: Value) -> Instruction {
    Instruction::new(comment.author.clone(), name, args, comment.updated_at)
}
