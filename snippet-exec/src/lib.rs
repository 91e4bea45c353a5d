//! # Snippet Execution Service
//!
//! Runs caller-submitted source snippets through an interpreter in a separate process.
//! A request is authorized, its code staged into a private scratch file, executed under a
//! wall-clock deadline with the whole process group killed on expiry, and the outcome mapped
//! onto a fixed response schema. The scratch file never outlives its request.

mod auth;
mod classify;
mod config;
mod error;
mod runner;
mod service;
mod stager;
mod types;

#[cfg(test)]
mod tests;

pub use auth::CredentialGate;
pub use classify::{classify, classify_error, classify_outcome, internal_error};
pub use config::{Credential, InterpreterConfig, ServiceConfig};
pub use error::Error;
pub use runner::{ProcessRunner, Runner};
pub use service::ExecutionService;
pub use stager::{validate_code, ScratchArtifact, SnippetStager};
pub use types::{
    ExecutionOutcome, ExecutionRequest, ExecutionResponse, ExecutionStatus, ResourceLimits,
    INTERNAL_EXIT_CODE, MISSING_CODE_EXIT_CODE, TIMEOUT_EXIT_CODE, UNAUTHORIZED_EXIT_CODE,
};

/// Result type for snippet execution operations
pub type Result<T> = std::result::Result<T, Error>;
