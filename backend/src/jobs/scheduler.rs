// Job Scheduler - Runs the periodic timeout sweep

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler as TokioScheduler, JobSchedulerError};
use tracing::{error, info};
use uuid::Uuid;

use super::TimeoutSweepJob;
use crate::workflows::WorkflowEngine;

pub const TIMEOUT_SWEEP_JOB: &str = "timeout_sweep";

// Oldest entries are dropped past this count
const MAX_EXECUTION_LOGS: usize = 100;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Scheduler error: {0}")]
    SchedulerError(#[from] JobSchedulerError),
    #[error("Job execution error: {0}")]
    ExecutionError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type JobResult<T> = Result<T, JobError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub sweep_interval_minutes: u32,
    pub sweep_enabled: bool,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            sweep_interval_minutes: 5,
            sweep_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobExecutionLog {
    pub id: Uuid,
    pub job_name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: JobStatus,
    pub items_processed: i32,
    pub errors: Vec<String>,
    pub duration_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
}

pub struct JobScheduler {
    scheduler: TokioScheduler,
    engine: Arc<WorkflowEngine>,
    config: JobConfig,
    execution_logs: Arc<RwLock<Vec<JobExecutionLog>>>,
}

impl JobScheduler {
    pub async fn new(engine: Arc<WorkflowEngine>, config: JobConfig) -> JobResult<Self> {
        let scheduler = TokioScheduler::new().await?;

        Ok(Self {
            scheduler,
            engine,
            config,
            execution_logs: Arc::new(RwLock::new(Vec::new())),
        })
    }

    pub async fn start(&self) -> JobResult<()> {
        info!("Starting background job scheduler");

        self.schedule_timeout_sweep().await?;
        self.scheduler.start().await?;

        info!("Background job scheduler started");
        Ok(())
    }

    pub async fn shutdown(&mut self) -> JobResult<()> {
        info!("Shutting down background job scheduler");
        self.scheduler.shutdown().await?;
        Ok(())
    }

    async fn schedule_timeout_sweep(&self) -> JobResult<()> {
        if !self.config.sweep_enabled {
            info!("Timeout sweep is disabled, skipping");
            return Ok(());
        }

        let interval = self.config.sweep_interval_minutes;
        if interval == 0 || interval > 59 {
            return Err(JobError::ConfigError(format!(
                "Sweep interval must be between 1 and 59 minutes, got {}",
                interval
            )));
        }
        let cron_expr = format!("0 */{} * * * *", interval); // Every N minutes

        let engine = self.engine.clone();
        let logs = self.execution_logs.clone();

        let job = Job::new_async(cron_expr.as_str(), move |_uuid, _lock| {
            let engine = engine.clone();
            let logs = logs.clone();

            Box::pin(async move {
                if let Err(e) = run_sweep(engine, &logs).await {
                    error!(error = %e, "Timeout sweep failed");
                }
            })
        })?;

        self.scheduler.add(job).await?;
        info!(interval_minutes = interval, "Scheduled timeout sweep");

        Ok(())
    }

    pub async fn get_execution_logs(&self) -> Vec<JobExecutionLog> {
        self.execution_logs.read().await.clone()
    }

    pub async fn run_job_now(&self, job_name: &str) -> JobResult<()> {
        match job_name {
            TIMEOUT_SWEEP_JOB => run_sweep(self.engine.clone(), &self.execution_logs).await,
            _ => Err(JobError::ConfigError(format!("Unknown job: {}", job_name))),
        }
    }
}

async fn run_sweep(engine: Arc<WorkflowEngine>, logs: &RwLock<Vec<JobExecutionLog>>) -> JobResult<()> {
    let started_at = Utc::now();
    let outcome = TimeoutSweepJob::new(engine).run().await;
    let completed_at = Utc::now();

    let mut log = JobExecutionLog {
        id: Uuid::new_v4(),
        job_name: TIMEOUT_SWEEP_JOB.to_string(),
        started_at,
        completed_at: Some(completed_at),
        status: JobStatus::Completed,
        items_processed: 0,
        errors: Vec::new(),
        duration_ms: Some((completed_at - started_at).num_milliseconds()),
    };

    let result = match outcome {
        Ok(sweep) => {
            log.items_processed = sweep.instances_swept;
            Ok(())
        }
        Err(e) => {
            log.status = JobStatus::Failed;
            log.errors.push(e.to_string());
            Err(JobError::ExecutionError(e.to_string()))
        }
    };

    let mut logs = logs.write().await;
    logs.push(log);
    if logs.len() > MAX_EXECUTION_LOGS {
        logs.remove(0);
    }

    result
}
