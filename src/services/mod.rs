//! Service layer: the decision engine and the procedures driving it.

pub mod extensions;
pub mod instruction_parser;
pub mod job_reconciler;
pub mod procedures;
pub mod throttle;
pub mod webhook;
pub mod worker_pool;

pub use extensions::{Current, Extension, ExtensionPipeline, Services};
pub use instruction_parser::parse_instructions;
pub use job_reconciler::{JobAction, JobReconciler};
pub use procedures::{CycleReport, HeadReport, HookReport, PipelineReport, Reconciler};
pub use throttle::ThrottleController;
pub use worker_pool::{Task, WorkerPool};
