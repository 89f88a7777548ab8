//! The extension pipeline: the decision engine run once per head.
//!
//! Extensions are registered once and sorted so that each one runs after
//! its dependencies. For every head, the pipeline runs all `begin` phases,
//! routes comment instructions to the extensions declaring them, then runs
//! all `run` phases. A phase may stop the head with
//! [`Interrupt::SkipHead`]; any other failure is recorded in
//! [`Current::errors`] and the remaining extensions still run.

pub mod autocancel;
pub mod builder;
pub mod context;
pub mod create_jobs;
pub mod errors;
pub mod head;
pub mod help;
pub mod poll;
pub mod rebuild;
pub mod report;
pub mod skip;
pub mod stages;
pub mod yaml;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::ops::ControlFlow;
use tracing::{debug, info, instrument};

use crate::domain::errors::{Interrupt, PhaseResult};
use crate::domain::models::{Head, Instruction, RepositorySettings};
use crate::services::instruction_parser::parse_instructions;

pub use context::{CancelRequest, Current, ErrorEntry, JobOverride, Services};

/// Instructions anybody may give, collaborator or not.
const PUBLIC_INSTRUCTIONS: [&str; 2] = ["help", "man"];

/// A pluggable decision unit of the pipeline.
#[async_trait]
pub trait Extension: Send + Sync {
    fn name(&self) -> &'static str;

    /// Extensions which must run before this one.
    fn dependencies(&self) -> &'static [&'static str] {
        &[]
    }

    /// Instruction names routed to [`Extension::process_instruction`].
    fn instructions(&self) -> &'static [&'static str] {
        &[]
    }

    async fn begin(&self, _current: &mut Current, _services: &Services) -> PhaseResult {
        Ok(())
    }

    async fn process_instruction(
        &self,
        _current: &mut Current,
        _instruction: &Instruction,
    ) -> PhaseResult {
        Ok(())
    }

    async fn run(&self, _current: &mut Current, _services: &Services) -> PhaseResult {
        Ok(())
    }
}

/// Every extension, in registration order.
pub fn default_extensions() -> Vec<Box<dyn Extension>> {
    vec![
        Box::new(head::HeadExtension),
        Box::new(help::HelpExtension),
        Box::new(yaml::YamlExtension),
        Box::new(create_jobs::CreateJobsExtension),
        Box::new(rebuild::RebuildExtension),
        Box::new(stages::StagesExtension),
        Box::new(skip::SkipExtension),
        Box::new(autocancel::AutoCancelExtension),
        Box::new(builder::BuilderExtension),
        Box::new(poll::PollExtension),
        Box::new(report::ReportExtension),
        Box::new(errors::ErrorsExtension),
    ]
}

/// Extensions sorted by dependency, bound to their services.
pub struct ExtensionPipeline {
    extensions: Vec<Box<dyn Extension>>,
    services: Services,
}

impl ExtensionPipeline {
    /// Sort `extensions` so dependencies come first.
    ///
    /// The sort is stable: independent extensions keep their registration
    /// order. Unknown dependencies and cycles are rejected.
    pub fn new(extensions: Vec<Box<dyn Extension>>, services: Services) -> Result<Self> {
        let extensions = sort_by_dependencies(extensions)?;
        debug!(
            order = ?extensions.iter().map(|e| e.name()).collect::<Vec<_>>(),
            "Extensions sorted"
        );
        Ok(Self {
            extensions,
            services,
        })
    }

    pub fn with_default_extensions(services: Services) -> Result<Self> {
        Self::new(default_extensions(), services)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.extensions.iter().map(|e| e.name()).collect()
    }

    pub const fn services(&self) -> &Services {
        &self.services
    }

    /// Reconcile one head and return its final state.
    #[instrument(skip(self, head, settings), fields(head = %head))]
    pub async fn run(&self, head: Head, settings: RepositorySettings) -> Current {
        let mut current = Current::new(head, settings);

        for extension in &self.extensions {
            let result = extension.begin(&mut current, &self.services).await;
            if settle(&mut current, extension.name(), result, None).is_break() {
                return current;
            }
        }

        for instruction in self.collect_instructions(&current) {
            for extension in &self.extensions {
                if !extension.instructions().contains(&instruction.name.as_str()) {
                    continue;
                }
                debug!(
                    extension = extension.name(),
                    instruction = %instruction.name,
                    author = %instruction.author,
                    "Processing instruction"
                );
                let result = extension.process_instruction(&mut current, &instruction).await;
                if settle(&mut current, extension.name(), result, Some(instruction.date)).is_break() {
                    return current;
                }
            }
        }

        for extension in &self.extensions {
            let result = extension.run(&mut current, &self.services).await;
            if settle(&mut current, extension.name(), result, None).is_break() {
                return current;
            }
        }

        current
    }

    /// Instructions of the head's comments, oldest first, from authors
    /// allowed to instruct the bot.
    fn collect_instructions(&self, current: &Current) -> Vec<Instruction> {
        let mut comments = current.commit.comments.clone();
        comments.sort_by_key(|comment| comment.updated_at);

        parse_instructions(&comments)
            .filter(|instruction| {
                let allowed = PUBLIC_INSTRUCTIONS.contains(&instruction.name.as_str())
                    || self.services.is_bot(&instruction.author)
                    || current.settings.is_collaborator(&instruction.author);
                if !allowed {
                    info!(
                        author = %instruction.author,
                        instruction = %instruction.name,
                        "Ignoring instruction from non-collaborator"
                    );
                }
                allowed
            })
            .collect()
    }
}

/// Apply the outcome of one phase to the head state.
fn settle(
    current: &mut Current,
    extension: &str,
    result: PhaseResult,
    instruction_date: Option<DateTime<Utc>>,
) -> ControlFlow<()> {
    match result {
        Ok(()) => ControlFlow::Continue(()),
        Err(Interrupt::SkipHead(reason)) => {
            debug!(head = %current.head, extension, %reason, "Skipping head");
            current.skipped = Some(reason);
            ControlFlow::Break(())
        }
        Err(Interrupt::Failed(e)) => {
            let timestamp = instruction_date.unwrap_or_else(|| current.error_timestamp());
            current.record_error(format!("{extension}: {e:#}"), timestamp);
            ControlFlow::Continue(())
        }
    }
}

/// Kahn's algorithm, always picking the earliest registered ready node.
fn sort_by_dependencies(extensions: Vec<Box<dyn Extension>>) -> Result<Vec<Box<dyn Extension>>> {
    let index: HashMap<&'static str, usize> = extensions
        .iter()
        .enumerate()
        .map(|(i, e)| (e.name(), i))
        .collect();

    let mut in_degree = vec![0usize; extensions.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); extensions.len()];
    for (i, extension) in extensions.iter().enumerate() {
        for dependency in extension.dependencies() {
            let Some(&d) = index.get(dependency) else {
                bail!(
                    "Extension {} depends on unknown extension {}",
                    extension.name(),
                    dependency
                );
            };
            dependents[d].push(i);
            in_degree[i] += 1;
        }
    }

    let mut order = Vec::with_capacity(extensions.len());
    let mut done = vec![false; extensions.len()];
    while let Some(next) = (0..extensions.len()).find(|&i| !done[i] && in_degree[i] == 0) {
        done[next] = true;
        order.push(next);
        for &dependent in &dependents[next] {
            in_degree[dependent] -= 1;
        }
    }

    if order.len() != extensions.len() {
        let stuck: Vec<_> = (0..extensions.len())
            .filter(|&i| !done[i])
            .map(|i| extensions[i].name())
            .collect();
        bail!("Circular extension dependencies among: {}", stuck.join(", "));
    }

    let mut slots: Vec<Option<Box<dyn Extension>>> = extensions.into_iter().map(Some).collect();
    Ok(order
        .into_iter()
        .filter_map(|i| slots[i].take())
        .collect())
}
