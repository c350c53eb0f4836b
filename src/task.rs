use crate::error::SchedulerError;
use anyhow::Result;
use dashmap::DashMap;
use log::warn;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

pub type TaskId = usize;

/// Shared `TaskId -> progress` table written by workers and read by the coordinator.
pub type ProgressTable = Arc<DashMap<TaskId, TaskProgress>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskProgress {
    pub current: u64,
    pub total: u64,
}

impl TaskProgress {
    pub fn new(current: u64, total: u64) -> Self {
        Self { current, total }
    }

    pub fn is_finished(&self) -> bool {
        self.total > 0 && self.current >= self.total
    }
}

/// Handle given to a running work unit so it can publish progress.
#[derive(Clone)]
pub struct TaskHandle {
    id: TaskId,
    name: String,
    progress: ProgressTable,
}

impl TaskHandle {
    pub(crate) fn new(id: TaskId, name: String, progress: ProgressTable) -> Self {
        Self { id, name, progress }
    }

    /// A handle that is not attached to any scheduler batch.
    pub fn detached<S: Into<String>>(name: S) -> Self {
        Self {
            id: 0,
            name: name.into(),
            progress: Arc::new(DashMap::new()),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn update_progress(&self, current: u64, total: u64) {
        self.progress
            .insert(self.id, TaskProgress::new(current, total));
    }

    pub fn progress(&self) -> TaskProgress {
        self.progress
            .get(&self.id)
            .map(|entry| *entry.value())
            .unwrap_or_default()
    }
}

type ArgumentsFn<T> = Box<dyn FnOnce() -> Result<T> + Send + 'static>;
type TaskFn<T> = Box<dyn FnOnce(&TaskHandle) -> Result<T> + Send + 'static>;

/// The work a task performs, either over captured arguments or over its own handle.
pub enum WorkUnit<T> {
    Arguments(ArgumentsFn<T>),
    Task(TaskFn<T>),
}

impl<T> WorkUnit<T> {
    pub fn with_arguments<A, F>(work: F, arguments: A) -> Self
    where
        A: Send + 'static,
        F: FnOnce(A) -> Result<T> + Send + 'static,
    {
        Self::Arguments(Box::new(move || work(arguments)))
    }

    pub fn with_task<F>(work: F) -> Self
    where
        F: FnOnce(&TaskHandle) -> Result<T> + Send + 'static,
    {
        Self::Task(Box::new(work))
    }

    pub fn execute(self, handle: &TaskHandle) -> Result<T> {
        match self {
            Self::Arguments(work) => work(),
            Self::Task(work) => work(handle),
        }
    }
}

pub struct Task<T> {
    name: String,
    work: Option<WorkUnit<T>>,
    id: Option<TaskId>,
    progress: TaskProgress,
    result: Option<T>,
    user_data: Option<Value>,
}

impl<T> Task<T> {
    pub fn new<S: Into<String>>(name: S, work: WorkUnit<T>) -> Result<Self, SchedulerError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(SchedulerError::configuration(
                "task name cannot be empty",
            ));
        }
        Ok(Self {
            name,
            work: Some(work),
            id: None,
            progress: TaskProgress::default(),
            result: None,
            user_data: None,
        })
    }

    pub fn with_user_data(mut self, user_data: Value) -> Self {
        self.user_data = Some(user_data);
        self
    }

    pub fn user_data(&self) -> Option<&Value> {
        self.user_data.as_ref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identity assigned by the scheduler on submission.
    pub fn id(&self) -> Option<TaskId> {
        self.id
    }

    pub fn progress(&self) -> TaskProgress {
        self.progress
    }

    pub fn result(&self) -> Option<&T> {
        self.result.as_ref()
    }

    pub fn take_result(&mut self) -> Option<T> {
        self.result.take()
    }

    pub fn has_work(&self) -> bool {
        self.work.is_some()
    }

    pub(crate) fn assign_id(&mut self, id: TaskId) {
        self.id = Some(id);
    }

    pub(crate) fn take_work(&mut self) -> Option<WorkUnit<T>> {
        self.work.take()
    }

    pub(crate) fn set_progress(&mut self, progress: TaskProgress) {
        self.progress = progress;
    }

    pub(crate) fn set_result(&mut self, value: T) {
        if self.result.is_some() {
            warn!("Ignoring second result for task {}", self.name);
            return;
        }
        self.result = Some(value);
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("progress", &self.progress)
            .field("has_work", &self.work.is_some())
            .field("has_result", &self.result.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_blank_task_name() {
        let outcome = Task::new("  ", WorkUnit::with_arguments(|x: i32| Ok(x), 1));
        assert!(matches!(outcome, Err(SchedulerError::Configuration(_))));
    }

    #[test]
    fn work_unit_variants_execute() {
        let handle = TaskHandle::detached("unit");
        let by_args = WorkUnit::with_arguments(|(a, b): (i32, i32)| Ok(a + b), (2, 3));
        assert_eq!(by_args.execute(&handle).unwrap(), 5);

        let by_task = WorkUnit::with_task(|h: &TaskHandle| {
            h.update_progress(3, 4);
            Ok(h.name().to_string())
        });
        assert_eq!(by_task.execute(&handle).unwrap(), "unit");
        assert_eq!(handle.progress(), TaskProgress::new(3, 4));
    }

    #[test]
    fn result_is_write_once() {
        let mut task = Task::new("once", WorkUnit::with_arguments(|_: ()| Ok(1), ())).unwrap();
        task.set_result(1);
        task.set_result(2);
        assert_eq!(task.result(), Some(&1));
    }

    #[test]
    fn user_data_travels_with_the_task() {
        let task = Task::new("tagged", WorkUnit::with_arguments(|_: ()| Ok(0), ()))
            .unwrap()
            .with_user_data(serde_json::json!({"scan": "X:12:9"}));
        assert_eq!(task.user_data().unwrap()["scan"], "X:12:9");
        assert!(task.has_work());
    }
}
