//! Answers `help` requests with a manual of the instructions.

use async_trait::async_trait;
use std::fmt::Write;

use super::{Current, Extension, Services};
use crate::domain::errors::PhaseResult;
use crate::domain::models::Instruction;

const MANUAL: &str = "\
I reconcile this head with its job specification file. Instructions are \
written in comments, on their own line:

- `jenkins: help`: show this manual.
- `jenkins: rebuild`: build failed jobs again.
- `jenkins: skip`: skip every job, or `jenkins: {skip: [pattern]}` for some.
- `jenkins: {jobs: [pattern]}`: build only matching jobs.
- `jenkins: refresh-jobs`: rewrite job definitions on the build server.
- `jenkins: {yaml: {job: {key: value}}}`: override job configuration.
- `jenkins: {params: {job: {NAME: value}}}`: override job parameters.
- `jenkins: reset-errors`: stop reporting errors met so far.
";

pub struct HelpExtension;

#[async_trait]
impl Extension for HelpExtension {
    fn name(&self) -> &'static str {
        "help"
    }

    fn instructions(&self) -> &'static [&'static str] {
        &["help", "man", "help-reset"]
    }

    async fn process_instruction(&self, current: &mut Current, instruction: &Instruction) -> PhaseResult {
        if instruction.name == "help-reset" {
            current
                .help_mentions
                .retain(|_, asked_at| *asked_at >= instruction.date);
        } else {
            current
                .help_mentions
                .insert(instruction.author.clone(), instruction.date);
        }
        Ok(())
    }

    async fn run(&self, current: &mut Current, services: &Services) -> PhaseResult {
        if current.help_mentions.is_empty() {
            return Ok(());
        }

        let body = help_comment(current.help_mentions.keys().map(String::as_str));
        services.comment(&current.head, &body).await?;
        current.help_mentions.clear();
        Ok(())
    }
}

fn help_comment<'a>(authors: impl Iterator<Item = &'a str>) -> String {
    let mut body = String::new();
    for author in authors {
        let _ = write!(body, "@{author} ");
    }
    body.push_str("\n\n");
    body.push_str(MANUAL);
    body.push_str("\n<!--\njenkins: help-reset\n-->\n");
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Comment;
    use crate::services::instruction_parser::parse_comment;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_help_comment_only_resets() {
        let body = help_comment(["alice", "bob"].into_iter());
        assert!(body.starts_with("@alice @bob"));

        let date = Utc.with_ymd_and_hms(2016, 8, 3, 9, 0, 0).unwrap();
        let names: Vec<_> = parse_comment(&Comment::new("bot", body, date))
            .into_iter()
            .map(|i| i.name)
            .collect();
        assert_eq!(names, vec!["help-reset"]);
    }
}
