pub mod commit;
pub mod config;
pub mod head;
pub mod instruction;
pub mod job;
pub mod job_spec;
pub mod pattern;
pub mod pipeline;
pub mod queue;
pub mod rate_limit;
pub mod settings;

pub use commit::{Commit, CommitStatus, StatusState};
pub use config::{
    CacheConfig, Config, GitHubConfig, JenkinsConfig, LogFormat, LoggingConfig, RateLimitConfig,
    RetryConfig, RotationPolicy, ServerConfig, ThrottleConfig,
};
pub use head::{Head, HeadKind, HeadLocator, Repository};
pub use instruction::{Comment, Instruction};
pub use job::{Build, BuildResult, Job, JobKind, JobParameter};
pub use job_spec::{JobConfig, JobSpec};
pub use pipeline::{Pipeline, Stage, StageEntry, StageSummary};
pub use queue::{Enqueued, Priority, TaskQueue};
pub use rate_limit::RateLimit;
pub use settings::RepositorySettings;
