// Background Jobs
//
// Scheduled jobs for the approval engine, run with tokio-cron-scheduler.

pub mod scheduler;
pub mod timeout_sweeper;

pub use scheduler::{JobConfig, JobError, JobExecutionLog, JobResult, JobScheduler, JobStatus, TIMEOUT_SWEEP_JOB};
pub use timeout_sweeper::{SweepResult, TimeoutSweepJob};
