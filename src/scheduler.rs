use crate::error::SchedulerError;
use crate::scheduler_status::SchedulerStatus;
use crate::task::{ProgressTable, Task, TaskHandle, TaskId, TaskProgress, WorkUnit};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use dashmap::DashMap;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{debug, error, info, warn};
use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(6);
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Clone)]
pub struct ScheduleOptions {
    pub label: String,
    pub show_progress: bool,
    pub timeout: Duration,
    /// Stop waiting once this share (0-100) of the batch has finished.
    pub min_acceptable_completion_percentage: f64,
    pub max_workers: Option<usize>,
    pub status: Option<SchedulerStatus>,
}

impl Default for ScheduleOptions {
    fn default() -> Self {
        Self {
            label: "Pending jobs progress".to_string(),
            show_progress: false,
            timeout: DEFAULT_TIMEOUT,
            min_acceptable_completion_percentage: 100.0,
            max_workers: None,
            status: None,
        }
    }
}

impl ScheduleOptions {
    pub fn new<S: Into<String>>(label: S) -> Self {
        Self {
            label: label.into(),
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_min_completion(mut self, percentage: f64) -> Self {
        self.min_acceptable_completion_percentage = percentage;
        self
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn with_max_workers(mut self, max_workers: Option<usize>) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_status(mut self, status: SchedulerStatus) -> Self {
        self.status = Some(status);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleReport {
    pub total: usize,
    pub completed: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Tasks still running (or queued) when the coordinator stopped waiting.
    pub pending: usize,
    pub timed_out: bool,
    pub elapsed: Duration,
}

impl ScheduleReport {
    pub fn completion_percentage(&self) -> f64 {
        completion_percentage(self.completed, self.total)
    }
}

struct Job<T> {
    id: TaskId,
    name: String,
    work: WorkUnit<T>,
}

struct Completion<T> {
    id: TaskId,
    output: Option<T>,
}

pub fn default_worker_count() -> usize {
    std::cmp::max(1, num_cpus::get().saturating_sub(1))
}

/// Runs `tasks` on a bounded worker pool and writes each finished task's output
/// onto its `result` slot.
///
/// Returns once the completed share reaches the configured threshold or the
/// timeout expires. Work still running at that point is not cancelled; its
/// task simply keeps an empty result. Failures inside a task are logged and
/// never reach the caller.
pub fn schedule_tasks<T: Send + 'static>(
    tasks: &mut [Task<T>],
    options: &ScheduleOptions,
) -> Result<ScheduleReport, SchedulerError> {
    validate(tasks, options)?;

    let started = Instant::now();
    let deadline = started + options.timeout;
    let total = tasks.len();
    let requested_workers = options
        .max_workers
        .unwrap_or_else(default_worker_count)
        .max(1);
    let num_workers = std::cmp::min(total, requested_workers);
    info!(
        "{}: scheduling {} task(s) on {} worker thread(s), timeout {:.1}s, stop at {:.0}% completion",
        options.label,
        total,
        num_workers,
        options.timeout.as_secs_f64(),
        options.min_acceptable_completion_percentage
    );
    if let Some(status) = &options.status {
        status.set_phase(options.label.clone());
        status.set_progress(total, 0, 0, Duration::ZERO);
    }

    let progress: ProgressTable = Arc::new(DashMap::new());
    let abandoned = Arc::new(AtomicBool::new(false));
    let (job_tx, job_rx): (Sender<Job<T>>, Receiver<Job<T>>) = bounded(total);
    let (done_tx, done_rx): (Sender<Completion<T>>, Receiver<Completion<T>>) = bounded(total);

    for _worker_id in 0..num_workers {
        let job_rx = job_rx.clone();
        let done_tx = done_tx.clone();
        let progress = Arc::clone(&progress);
        let abandoned = Arc::clone(&abandoned);
        thread::spawn(move || {
            while let Ok(job) = job_rx.recv() {
                if abandoned.load(Ordering::Acquire) {
                    debug!("Dropping queued task {} after coordinator stopped", job.name);
                    continue;
                }
                let id = job.id;
                let output = run_job(job, &progress);
                if done_tx.send(Completion { id, output }).is_err() {
                    break;
                }
            }
        });
    }
    drop(job_rx);
    drop(done_tx);

    let mut names = HashMap::with_capacity(total);
    for (index, task) in tasks.iter_mut().enumerate() {
        let id = index + 1;
        task.assign_id(id);
        names.insert(id, task.name().to_string());
        let Some(work) = task.take_work() else {
            continue;
        };
        progress.insert(id, TaskProgress::default());
        let job = Job {
            id,
            name: task.name().to_string(),
            work,
        };
        if job_tx.send(job).is_err() {
            warn!("{}: worker pool closed before all tasks were submitted", options.label);
            break;
        }
    }
    drop(job_tx);

    let display = ProgressDisplay::new(&options.label, total, options.show_progress);
    let mut completed = 0;
    let mut failed = 0;
    let mut timed_out = false;

    loop {
        if completion_percentage(completed, total) >= options.min_acceptable_completion_percentage {
            break;
        }
        let now = Instant::now();
        if now >= deadline {
            timed_out = true;
            break;
        }
        let wait = POLL_INTERVAL.min(deadline - now);
        match done_rx.recv_timeout(wait) {
            Ok(completion) => {
                completed += 1;
                if !apply_completion(tasks, completion) {
                    failed += 1;
                }
                while let Ok(completion) = done_rx.try_recv() {
                    completed += 1;
                    if !apply_completion(tasks, completion) {
                        failed += 1;
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                if completed < total {
                    warn!(
                        "{}: result channel closed unexpectedly. Some results may be lost.",
                        options.label
                    );
                }
                break;
            }
        }

        reconcile_progress(tasks, &progress);
        display.render(completed, &progress, &names);
        if let Some(status) = &options.status {
            status.set_progress(total, completed, failed, started.elapsed());
        }
    }

    abandoned.store(true, Ordering::Release);
    while let Ok(completion) = done_rx.try_recv() {
        completed += 1;
        if !apply_completion(tasks, completion) {
            failed += 1;
        }
    }
    reconcile_progress(tasks, &progress);
    display.render(completed, &progress, &names);

    let elapsed = started.elapsed();
    let pending = total - completed;
    if pending > 0 {
        let reason = if timed_out {
            "timeout reached"
        } else {
            "completion threshold reached"
        };
        info!(
            "{}: stopped waiting after {:.2}s ({}); {} of {} task(s) still pending",
            options.label,
            elapsed.as_secs_f64(),
            reason,
            pending,
            total
        );
        display.finish(&format!("{} pending", pending));
    } else if failed > 0 {
        warn!("{}: completed with {} task error(s)", options.label, failed);
        display.finish("Completed with errors");
    } else {
        display.finish("Completed");
    }

    if let Some(status) = &options.status {
        status.set_progress(total, completed, failed, elapsed);
        status.set_phase(if pending > 0 { "Partial" } else { "Idle" });
    }

    Ok(ScheduleReport {
        total,
        completed,
        succeeded: completed - failed,
        failed,
        pending,
        timed_out,
        elapsed,
    })
}

fn validate<T>(tasks: &[Task<T>], options: &ScheduleOptions) -> Result<(), SchedulerError> {
    if tasks.is_empty() {
        return Err(SchedulerError::configuration("no tasks in the task list"));
    }
    let threshold = options.min_acceptable_completion_percentage;
    if !threshold.is_finite() || !(0.0..=100.0).contains(&threshold) {
        return Err(SchedulerError::configuration(format!(
            "minimum completion percentage must be within 0-100 (value: {})",
            threshold
        )));
    }
    if options.timeout.is_zero() {
        return Err(SchedulerError::configuration("timeout must be positive"));
    }
    if let Some(task) = tasks.iter().find(|task| !task.has_work()) {
        return Err(SchedulerError::configuration(format!(
            "task {} has no work unit (was it already scheduled?)",
            task.name()
        )));
    }
    Ok(())
}

fn completion_percentage(completed: usize, total: usize) -> f64 {
    if total == 0 {
        return 100.0;
    }
    completed as f64 * 100.0 / total as f64
}

fn run_job<T>(job: Job<T>, progress: &ProgressTable) -> Option<T> {
    let Job { id, name, work } = job;
    let handle = TaskHandle::new(id, name.clone(), Arc::clone(progress));
    let start_time = Instant::now();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| work.execute(&handle)));
    let duration = start_time.elapsed();

    match outcome {
        Ok(Ok(value)) => {
            debug!(
                "Worker finished task {} ({}) in {:.2}s",
                id,
                name,
                duration.as_secs_f64()
            );
            Some(value)
        }
        Ok(Err(err)) => {
            warn!(
                "Worker finished task {} ({}) in {:.2}s with error: {:#}",
                id,
                name,
                duration.as_secs_f64(),
                err
            );
            None
        }
        Err(payload) => {
            error!(
                "Task {} ({}) panicked after {:.2}s: {}",
                id,
                name,
                duration.as_secs_f64(),
                panic_message(payload.as_ref())
            );
            None
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Returns false when the task finished without a result.
fn apply_completion<T>(tasks: &mut [Task<T>], completion: Completion<T>) -> bool {
    let Some(task) = completion
        .id
        .checked_sub(1)
        .and_then(|index| tasks.get_mut(index))
    else {
        warn!("Received result for unknown task {}", completion.id);
        return false;
    };
    match completion.output {
        Some(value) => {
            task.set_result(value);
            true
        }
        None => false,
    }
}

fn reconcile_progress<T>(tasks: &mut [Task<T>], progress: &ProgressTable) {
    for task in tasks.iter_mut() {
        let Some(id) = task.id() else {
            continue;
        };
        if let Some(entry) = progress.get(&id) {
            task.set_progress(*entry.value());
        }
    }
}

struct ProgressDisplay {
    multi: MultiProgress,
    overall: ProgressBar,
    task_bars: Mutex<HashMap<TaskId, ProgressBar>>,
}

impl ProgressDisplay {
    fn new(label: &str, total: usize, visible: bool) -> Self {
        let multi = if visible {
            MultiProgress::new()
        } else {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        };
        let overall = multi.add(ProgressBar::new(total as u64));
        overall.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} {msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        overall.set_message(label.to_string());
        Self {
            multi,
            overall,
            task_bars: Mutex::new(HashMap::new()),
        }
    }

    fn render(&self, completed: usize, progress: &ProgressTable, names: &HashMap<TaskId, String>) {
        let Ok(mut bars) = self.task_bars.lock() else {
            return;
        };
        self.overall.set_position(completed as u64);
        for entry in progress.iter() {
            let (id, task_progress) = (*entry.key(), *entry.value());
            if task_progress.total == 0 {
                continue;
            }
            if task_progress.is_finished() {
                if let Some(bar) = bars.remove(&id) {
                    bar.finish_and_clear();
                }
                continue;
            }
            let bar = bars.entry(id).or_insert_with(|| {
                let bar = self.multi.add(ProgressBar::new(task_progress.total));
                bar.set_style(
                    ProgressStyle::default_bar()
                        .template("  {msg} [{bar:30.green/white}] {pos}/{len}")
                        .unwrap_or_else(|_| ProgressStyle::default_bar())
                        .progress_chars("=>-"),
                );
                let name = names.get(&id).cloned().unwrap_or_default();
                bar.set_message(format!("Task: {}", name));
                bar
            });
            bar.set_length(task_progress.total);
            bar.set_position(task_progress.current);
        }
    }

    fn finish(&self, message: &str) {
        if let Ok(mut bars) = self.task_bars.lock() {
            for (_, bar) in bars.drain() {
                bar.finish_and_clear();
            }
        }
        self.overall.finish_with_message(message.to_string());
    }
}
