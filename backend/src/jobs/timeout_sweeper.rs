// Timeout Sweep Job - Applies timeout policies to overdue approval steps

use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::error::WorkflowError;
use crate::workflows::WorkflowEngine;

pub struct TimeoutSweepJob {
    engine: Arc<WorkflowEngine>,
}

#[derive(Debug, Default)]
pub struct SweepResult {
    pub instances_swept: i32,
    pub swept_ids: Vec<Uuid>,
}

impl TimeoutSweepJob {
    pub fn new(engine: Arc<WorkflowEngine>) -> Self {
        Self { engine }
    }

    pub async fn run(&self) -> Result<SweepResult, WorkflowError> {
        let swept_ids = self.engine.sweep_timeouts().await?;

        let result = SweepResult {
            instances_swept: swept_ids.len() as i32,
            swept_ids,
        };

        info!(
            instances_swept = result.instances_swept,
            "Timeout sweep finished"
        );
        Ok(result)
    }
}
