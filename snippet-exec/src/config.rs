use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::{error::Error, types::ResourceLimits, Result};

/// The shared secret callers must present. Loaded once at startup and never mutated.
#[derive(Clone)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Interpreter invocation settings. Deployment-time constants, never request input.
#[derive(Debug, Clone)]
pub struct InterpreterConfig {
    /// Interpreter binary, either a bare name looked up on `PATH` or a path
    pub program: String,
    /// Configuration/profile file handed to the interpreter
    pub profile: Option<PathBuf>,
    /// Flag that introduces the profile path (`-c` for php)
    pub profile_flag: String,
    /// Extension given to scratch artifacts
    pub extension: String,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            program: "php".to_string(),
            profile: None,
            profile_flag: "-c".to_string(),
            extension: "php".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub credential: Credential,
    pub interpreter: InterpreterConfig,
    /// Wall-clock deadline for one execution
    pub timeout: Duration,
    /// Time between SIGTERM and SIGKILL once the deadline expired
    pub kill_grace: Duration,
    /// Directory holding scratch artifacts
    pub scratch_dir: PathBuf,
    /// Upper bound on simultaneously running interpreter processes
    pub max_concurrent: usize,
    pub limits: ResourceLimits,
}

impl ServiceConfig {
    pub fn new(credential: Credential) -> Self {
        Self {
            credential,
            interpreter: InterpreterConfig::default(),
            timeout: Duration::from_secs(10),
            kill_grace: Duration::from_millis(500),
            scratch_dir: std::env::temp_dir(),
            max_concurrent: 10,
            limits: ResourceLimits::default(),
        }
    }

    pub fn with_interpreter(mut self, interpreter: InterpreterConfig) -> Self {
        self.interpreter = interpreter;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_kill_grace(mut self, kill_grace: Duration) -> Self {
        self.kill_grace = kill_grace;
        self
    }

    pub fn with_scratch_dir(mut self, scratch_dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = scratch_dir.into();
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Rejects settings the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.credential.is_empty() {
            return Err(Error::Config("API key must not be empty".to_string()));
        }
        if self.timeout.is_zero() {
            return Err(Error::Config("timeout must be positive".to_string()));
        }
        if self.max_concurrent == 0 {
            return Err(Error::Config(
                "max concurrent executions must be positive".to_string(),
            ));
        }
        if self.interpreter.program.is_empty() {
            return Err(Error::Config("interpreter must not be empty".to_string()));
        }
        Ok(())
    }
}
