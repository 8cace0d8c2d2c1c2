//! Sandbox: static screening and bounded execution of generated scripts.
//!
//! Every candidate script is parsed and screened before a process exists.
//! Accepted scripts run as a child process in a scratch directory with a
//! cleared environment, a wall-clock timeout and, on Unix, lowered resource
//! limits in a dedicated process group.
//!
//! # Modules
//!
//! - [`validator`] : `StaticValidator`, `DenyList`
//! - [`runner`]    : `SandboxRunner`, `RunnerConfig`, `ExecutionResult`, `ScriptExecutor`
//! - [`error`]     : `SandboxError` / `SandboxResult`

pub mod error;
#[cfg(unix)]
mod limits;
pub mod runner;
pub mod validator;

pub use error::{SandboxError, SandboxResult};
pub use runner::{
    ExecutionOutcome, ExecutionResult, RunnerConfig, SandboxRunner, ScriptExecutor, SCRATCH_PREFIX,
};
pub use validator::{DenyList, StaticValidator};
