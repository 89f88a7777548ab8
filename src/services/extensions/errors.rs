//! Reports errors met while processing the head.

use async_trait::async_trait;

use super::{Current, Extension, Services};
use crate::domain::errors::PhaseResult;
use crate::domain::models::Instruction;

pub struct ErrorsExtension;

#[async_trait]
impl Extension for ErrorsExtension {
    fn name(&self) -> &'static str {
        "error"
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &["help", "builder", "poll"]
    }

    fn instructions(&self) -> &'static [&'static str] {
        &["reset-errors"]
    }

    async fn process_instruction(&self, current: &mut Current, instruction: &Instruction) -> PhaseResult {
        if current.errors_reset.is_none_or(|reset| reset < instruction.date) {
            current.errors_reset = Some(instruction.date);
        }
        Ok(())
    }

    async fn run(&self, current: &mut Current, services: &Services) -> PhaseResult {
        let messages: Vec<&str> = current
            .unreported_errors()
            .map(|error| error.message.as_str())
            .collect();
        if messages.is_empty() {
            return Ok(());
        }

        let body = error_comment(&messages);
        services.comment(&current.head, &body).await?;
        Ok(())
    }
}

fn error_comment(messages: &[&str]) -> String {
    let mut body = String::from("Sorry, I met errors while processing this head:\n\n");
    for message in messages {
        body.push_str("```\n");
        body.push_str(message.trim());
        body.push_str("\n```\n\n");
    }
    body.push_str("<!--\njenkins: reset-errors\n-->\n");
    body
}
