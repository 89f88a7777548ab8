//! Stagehand - CI reconciliation bot
//!
//! Stagehand keeps a Jenkins server and GitHub commit statuses in line with
//! what repositories declare: the jobs of their `jenkins.yml`, and the
//! instructions collaborators leave in review comments (`jenkins: rebuild`,
//! `jenkins: skip`, ...). Each branch or pull request head is run through a
//! pipeline of extensions that creates missing jobs, builds the current
//! stage, cancels outdated builds and mirrors build results into statuses.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): models, ports and errors
//! - **Service Layer** (`services`): instruction parsing, the extension
//!   pipeline, job reconciliation, throttling and the worker pool
//! - **Infrastructure Layer** (`infrastructure`): GitHub and Jenkins clients,
//!   webhook server, configuration and logging
//! - **CLI Layer** (`cli`): command-line interface

pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use domain::errors::{DomainError, DomainResult};
pub use domain::models::{Config, Head, JobSpec, Pipeline, Repository};
pub use domain::ports::{BuildServer, Cache, CodeHost};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{ExtensionPipeline, Reconciler, Services, WorkerPool};
