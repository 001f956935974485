//! Handlers for the asynchronous optimize and rebuild jobs.
//!
//! Queue transport and locking belong to the caller. This module validates the payload,
//! checks the student's status and runs the work, mapping the result to the outcome the
//! queue records.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::database::Database;
use crate::errors::{Result, SchedulerError};
use crate::log_job;
use crate::models::{Context, OptimizationResult, RebuildResult, StudentStatus};
use crate::optimizer::ParameterOptimizer;
use crate::rebuild::CacheRebuilder;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    OptimizeParameters,
    RebuildCache,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::OptimizeParameters => "optimize_parameters",
            JobType::RebuildCache => "rebuild_cache",
        }
    }
}

impl FromStr for JobType {
    type Err = SchedulerError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "optimize_parameters" => Ok(JobType::OptimizeParameters),
            "rebuild_cache" => Ok(JobType::RebuildCache),
            other => Err(SchedulerError::UnknownJobType(other.to_string())),
        }
    }
}

/// Job payload. Without a context the job covers all three.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobPayload {
    pub student_id: Uuid,
    #[serde(default)]
    pub context: Option<Context>,
}

impl JobPayload {
    pub fn parse(payload: Value) -> Result<Self> {
        serde_json::from_value(payload).map_err(|e| SchedulerError::InvalidPayload(e.to_string()))
    }

    pub fn contexts(&self) -> Vec<Context> {
        match self.context {
            Some(context) => vec![context],
            None => Context::ALL.to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    Completed { result: Value },
    Skipped { reason: String },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizeJobResult {
    pub message: String,
    pub results: Vec<OptimizationResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebuildJobResult {
    pub cards_rebuilt: usize,
    pub results: Vec<RebuildResult>,
}

/// Student status lookup owned by account management.
#[async_trait]
pub trait StudentDirectory: Send + Sync {
    async fn student_status(&self, student_id: Uuid) -> Result<Option<StudentStatus>>;
}

#[async_trait]
impl StudentDirectory for Database {
    async fn student_status(&self, student_id: Uuid) -> Result<Option<StudentStatus>> {
        self.get_student_status(student_id).await
    }
}

#[derive(Clone)]
pub struct JobRunner {
    optimizer: ParameterOptimizer,
    rebuilder: CacheRebuilder,
    directory: Arc<dyn StudentDirectory>,
}

impl JobRunner {
    pub fn new(db: Database, config: SchedulerConfig) -> Self {
        Self {
            optimizer: ParameterOptimizer::new(db.clone(), config.clone()),
            rebuilder: CacheRebuilder::new(db.clone(), config),
            directory: Arc::new(db),
        }
    }

    /// Check student status against another directory.
    pub fn with_directory(mut self, directory: Arc<dyn StudentDirectory>) -> Self {
        self.directory = directory;
        self
    }

    /// Run one job. Never returns an error: failures become [`JobOutcome::Failed`].
    pub async fn run(&self, job_type: &str, payload: Value) -> JobOutcome {
        match self.try_run(job_type, payload).await {
            Ok(outcome) => outcome,
            Err(error) => {
                log_job!(failed, job_type, error = error);
                JobOutcome::Failed {
                    error: error.to_string(),
                }
            }
        }
    }

    async fn try_run(&self, job_type: &str, payload: Value) -> Result<JobOutcome> {
        let job_type = JobType::from_str(job_type)?;
        let payload = JobPayload::parse(payload)?;
        let student_id = payload.student_id;

        match self.directory.student_status(student_id).await? {
            Some(StudentStatus::Active) => {}
            Some(status) => {
                let reason = format!("student {} is {}", student_id, status.as_str().to_lowercase());
                log_job!(skipped, job_type.as_str(), student_id = student_id, &reason);
                return Ok(JobOutcome::Skipped { reason });
            }
            None => {
                let reason = format!("student {} not found", student_id);
                log_job!(skipped, job_type.as_str(), student_id = student_id, &reason);
                return Ok(JobOutcome::Skipped { reason });
            }
        }

        log_job!(start, job_type.as_str(), student_id = student_id);
        let start = Instant::now();

        let result = match job_type {
            JobType::OptimizeParameters => {
                serde_json::to_value(self.optimize_all(student_id, &payload.contexts()).await?)?
            }
            JobType::RebuildCache => {
                serde_json::to_value(self.rebuild_all(student_id, &payload.contexts()).await?)?
            }
        };

        log_job!(
            completed,
            job_type.as_str(),
            student_id = student_id,
            duration_ms = start.elapsed().as_millis() as u64
        );
        Ok(JobOutcome::Completed { result })
    }

    async fn optimize_all(&self, student_id: Uuid, contexts: &[Context]) -> Result<OptimizeJobResult> {
        let now = Utc::now();
        let mut results = Vec::with_capacity(contexts.len());
        for context in contexts {
            results.push(self.optimizer.optimize_parameters(student_id, *context, now).await?);
        }

        let message = results
            .iter()
            .map(|r| format!("{}: {}", r.context, r.message))
            .collect::<Vec<_>>()
            .join("; ");

        Ok(OptimizeJobResult { message, results })
    }

    async fn rebuild_all(&self, student_id: Uuid, contexts: &[Context]) -> Result<RebuildJobResult> {
        let mut results = Vec::with_capacity(contexts.len());
        for context in contexts {
            results.push(self.rebuilder.rebuild_cache(student_id, *context).await?);
        }

        Ok(RebuildJobResult {
            cards_rebuilt: results.iter().map(|r| r.cards_rebuilt).sum(),
            results,
        })
    }
}
