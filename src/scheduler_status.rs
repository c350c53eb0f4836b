use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Cloneable view of a scheduler batch, readable from any thread.
#[derive(Clone, Default)]
pub struct SchedulerStatus {
    inner: Arc<Mutex<SchedulerStatusData>>,
}

#[derive(Default)]
struct SchedulerStatusData {
    phase: String,
    total_tasks: usize,
    completed_tasks: usize,
    failed_tasks: usize,
    elapsed: Duration,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SchedulerStatusSnapshot {
    pub phase: String,
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub elapsed: Duration,
}

impl SchedulerStatusSnapshot {
    pub fn completion_percentage(&self) -> f64 {
        if self.total_tasks == 0 {
            return 0.0;
        }
        self.completed_tasks as f64 * 100.0 / self.total_tasks as f64
    }
}

impl SchedulerStatus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(SchedulerStatusData {
                phase: "Idle".to_string(),
                ..Default::default()
            })),
        }
    }

    pub fn set_phase<S: Into<String>>(&self, phase: S) {
        if let Ok(mut data) = self.inner.lock() {
            data.phase = phase.into();
        }
    }

    pub fn set_progress(
        &self,
        total_tasks: usize,
        completed_tasks: usize,
        failed_tasks: usize,
        elapsed: Duration,
    ) {
        if let Ok(mut data) = self.inner.lock() {
            data.total_tasks = total_tasks;
            data.completed_tasks = completed_tasks;
            data.failed_tasks = failed_tasks;
            data.elapsed = elapsed;
        }
    }

    pub fn snapshot(&self) -> SchedulerStatusSnapshot {
        if let Ok(data) = self.inner.lock() {
            SchedulerStatusSnapshot {
                phase: data.phase.clone(),
                total_tasks: data.total_tasks,
                completed_tasks: data.completed_tasks,
                failed_tasks: data.failed_tasks,
                elapsed: data.elapsed,
            }
        } else {
            SchedulerStatusSnapshot {
                phase: "Status unavailable".to_string(),
                total_tasks: 0,
                completed_tasks: 0,
                failed_tasks: 0,
                elapsed: Duration::ZERO,
            }
        }
    }
}
