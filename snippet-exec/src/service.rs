use axum::http::StatusCode;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::Duration;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::{
    auth::CredentialGate,
    classify::classify,
    config::ServiceConfig,
    error::Error,
    runner::{ProcessRunner, Runner},
    stager::{validate_code, SnippetStager},
    types::{ExecutionOutcome, ExecutionRequest, ExecutionResponse, ExecutionStatus},
    Result,
};

/// Request pipeline: authorize, stage, run, classify, clean up.
#[derive(Clone)]
pub struct ExecutionService {
    gate: CredentialGate,
    stager: SnippetStager,
    runner: Arc<dyn Runner>,
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
    timeout: Duration,
}

impl ExecutionService {
    pub async fn new(config: ServiceConfig) -> Result<Self> {
        let runner = ProcessRunner::new(
            config.interpreter.clone(),
            &config.scratch_dir,
            config.limits.clone(),
            config.kill_grace,
        );
        Self::with_runner(config, Arc::new(runner)).await
    }

    /// Builds the pipeline around a custom runner.
    pub async fn with_runner(config: ServiceConfig, runner: Arc<dyn Runner>) -> Result<Self> {
        config.validate()?;

        let stager = SnippetStager::new(&config.scratch_dir, &config.interpreter.extension);
        stager.ensure_scratch_dir().await?;

        Ok(Self {
            gate: CredentialGate::new(config.credential),
            stager,
            runner,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent)),
            max_concurrent: config.max_concurrent,
            timeout: config.timeout,
        })
    }

    /// Runs one request end to end and returns the response with its transport status.
    pub async fn handle(&self, request: ExecutionRequest) -> (ExecutionResponse, StatusCode) {
        let request_id = Uuid::new_v4();
        let span = info_span!("execution", %request_id);

        async move {
            let result = self.execute(request, request_id).await;
            classify(&result, self.timeout)
        }
        .instrument(span)
        .await
    }

    /// Stops at the first failing stage. The artifact is released after the runner returns,
    /// whatever it returned; panics and cancellation are covered by its drop guard.
    pub async fn execute(
        &self,
        request: ExecutionRequest,
        request_id: Uuid,
    ) -> Result<ExecutionOutcome> {
        self.gate.authorize(request.credential.as_deref())?;
        validate_code(&request.code).inspect_err(|_| warn!("Rejected request without code"))?;

        // Acquire execution permit
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| Error::Internal(format!("Failed to acquire execution permit: {}", e)))?;

        debug!("Staging {} bytes of code", request.code.len());
        let artifact = self.stager.stage(&request.code, request_id).await?;

        let result = self.runner.run(artifact.path(), self.timeout).await;

        if let Err(e) = artifact.release().await {
            error!("Failed to clean up scratch artifact: {}", e);
        }

        match &result {
            Ok(outcome) => match &outcome.status {
                ExecutionStatus::Completed => info!(
                    "Execution completed with exit code {} in {:?}",
                    outcome.exit_code, outcome.elapsed
                ),
                ExecutionStatus::TimedOut => {
                    warn!("Execution timed out after {:?}", outcome.elapsed)
                }
                ExecutionStatus::SpawnFailed(reason) => {
                    error!("Interpreter could not be started: {}", reason)
                }
            },
            Err(e) => error!("Runner failed: {}", e),
        }

        result
    }

    pub fn get_available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::utils::defaults::test_config;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_execution_limit() -> Result<()> {
        let dir = tempdir()?;
        let max_executions = 2;
        let service =
            ExecutionService::new(test_config(dir.path()).with_max_concurrent(max_executions))
                .await?;

        assert_eq!(service.get_available_slots(), max_executions);
        assert_eq!(service.max_concurrent(), max_executions);
        Ok(())
    }

    #[tokio::test]
    async fn test_rejects_invalid_config() -> Result<()> {
        let dir = tempdir()?;
        let result = ExecutionService::new(test_config(dir.path()).with_max_concurrent(0)).await;
        assert!(matches!(result, Err(Error::Config(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_creates_scratch_dir() -> Result<()> {
        let dir = tempdir()?;
        let scratch = dir.path().join("scratch");
        ExecutionService::new(test_config(&scratch)).await?;
        assert!(scratch.is_dir());
        Ok(())
    }
}
