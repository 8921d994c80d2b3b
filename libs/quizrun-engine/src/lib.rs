//! Untrusted code execution core.
//!
//! A job flows through the pieces in this order:
//! [`toolchain`] resolves the language, [`workspace`] gives the job a private
//! directory holding its source, [`runner`] compiles and runs it under a
//! timeout, [`evaluator`] turns raw runs into verdicts, and [`executor`]
//! sequences all of it and always releases the workspace.

pub mod config;
pub mod error;
pub mod evaluator;
pub mod executor;
pub mod runner;
pub mod store;
pub mod toolchain;
pub mod workspace;

pub use config::{EngineConfig, Isolation, LanguageConfigManager};
pub use error::{CompileError, JobError, RunError};
pub use executor::{CancelToken, JobCoordinator, JobOutput};
pub use runner::{ProcessRunner, RawOutput};
pub use store::{InMemorySubmissionStore, RedisSubmissionStore, StoreError, SubmissionStore};
