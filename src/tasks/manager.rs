//! Background task manager for tracking and controlling concurrent tasks.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crate::cancel::CancelFlag;
use crate::config::TaskConfig;
use crate::error::CurioError;

use super::progress::{ProgressReporter, ProgressUpdate};
use super::{Task, TaskContext, TaskEvent, TaskState};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Per-task control block shared between the manager and the task thread.
struct TaskControl {
    state: Mutex<TaskState>,
    cancel: CancelFlag,
    /// Set when the manager gave up waiting; the thread's events are dropped.
    detached: AtomicBool,
}

impl TaskControl {
    fn new() -> Self {
        Self {
            state: Mutex::new(TaskState::Idle),
            cancel: CancelFlag::new(),
            detached: AtomicBool::new(false),
        }
    }

    fn state(&self) -> TaskState {
        lock(&self.state).clone()
    }

    fn set_state(&self, state: TaskState) {
        *lock(&self.state) = state;
    }

    /// `Idle -> Running`, unless a cancel request got there first.
    fn mark_running(&self) {
        let mut state = lock(&self.state);
        if *state == TaskState::Idle {
            *state = TaskState::Running;
        }
    }

    fn request_cancel(&self) {
        self.cancel.cancel();
        let mut state = lock(&self.state);
        if !state.is_terminal() {
            *state = TaskState::Canceling;
        }
    }

    fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }
}

struct ActiveTask {
    name: String,
    control: Arc<TaskControl>,
    started_at: Instant,
}

type ActiveSet = HashMap<String, ActiveTask>;

fn is_current(active: &ActiveSet, id: &str, control: &Arc<TaskControl>) -> bool {
    active
        .get(id)
        .is_some_and(|task| Arc::ptr_eq(&task.control, control))
}

struct Inner {
    active: Mutex<ActiveSet>,
    /// Signalled whenever an entry leaves the active set.
    changed: Condvar,
    subscribers: Mutex<Vec<mpsc::Sender<TaskEvent>>>,
    progress_interval: Duration,
    cancel_timeout: Duration,
}

impl Inner {
    /// Fan an event out to subscribers, pruning closed receivers.
    ///
    /// Callers hold the `active` lock, so events of one task keep their order
    /// and nothing from a detached thread slips in after its `Canceled`.
    fn broadcast(&self, event: TaskEvent) {
        let mut subscribers = lock(&self.subscribers);
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Event emitted by a task thread while it is still running.
    fn emit_from(&self, control: &TaskControl, event: TaskEvent) {
        let _active = lock(&self.active);
        if !control.is_detached() {
            self.broadcast(event);
        }
    }

    fn finish(&self, id: &str, control: &Arc<TaskControl>, state: TaskState, event: TaskEvent) {
        let mut active = lock(&self.active);
        if control.is_detached() {
            tracing::debug!(id = %id, "Detached task thread finished");
            return;
        }

        if is_current(&active, id, control) {
            if let Some(task) = active.remove(id) {
                tracing::info!(
                    id = %id,
                    name = %task.name,
                    elapsed_ms = task.started_at.elapsed().as_millis() as u64,
                    state = ?state,
                    "Task finished"
                );
            }
        }
        control.set_state(state);

        self.broadcast(event);
        if active.is_empty() {
            self.broadcast(TaskEvent::AllFinished);
        }
        self.changed.notify_all();
    }

    /// Stop tracking a task whose thread did not stop in time.
    fn detach(&self, active: &mut ActiveSet, id: &str, control: &Arc<TaskControl>) {
        control.detached.store(true, Ordering::SeqCst);
        control.set_state(TaskState::Canceled);
        active.remove(id);
        tracing::warn!(id = %id, "Task did not stop within the cancel wait, detaching its thread");

        self.broadcast(TaskEvent::Canceled { id: id.to_string() });
        if active.is_empty() {
            self.broadcast(TaskEvent::AllFinished);
        }
        self.changed.notify_all();
    }

    /// Block while `pending` holds, up to `deadline` (`None` waits forever).
    fn wait_while<'a, P>(
        &self,
        mut active: MutexGuard<'a, ActiveSet>,
        deadline: Option<Instant>,
        pending: P,
    ) -> MutexGuard<'a, ActiveSet>
    where
        P: Fn(&ActiveSet) -> bool,
    {
        while pending(&active) {
            match deadline {
                None => {
                    active = self
                        .changed
                        .wait(active)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    let (guard, _) = self
                        .changed
                        .wait_timeout(active, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner);
                    active = guard;
                }
            }
        }
        active
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("task panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("task panicked: {message}")
    } else {
        "task panicked".to_string()
    }
}

fn is_cancellation(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| matches!(cause.downcast_ref::<CurioError>(), Some(CurioError::Cancelled)))
}

fn run_task(inner: Arc<Inner>, id: String, control: Arc<TaskControl>, mut task: Box<dyn Task>) {
    control.mark_running();

    let sink_inner = Arc::clone(&inner);
    let sink_control = Arc::clone(&control);
    let sink_id = id.clone();
    let reporter = ProgressReporter::new(inner.progress_interval, move |update| {
        let event = match update {
            ProgressUpdate::Progress(progress) => TaskEvent::Progress {
                id: sink_id.clone(),
                progress,
            },
            ProgressUpdate::Batch(progress) => TaskEvent::BatchProgress {
                id: sink_id.clone(),
                progress,
            },
        };
        sink_inner.emit_from(&sink_control, event);
    });
    let ctx = TaskContext::new(id.clone(), control.cancel.clone(), reporter);

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| task.execute(&ctx)));
    let cancelled = control.cancel.is_cancelled();

    let (state, event) = match outcome {
        Ok(Ok(output)) if !cancelled => (
            TaskState::Completed,
            TaskEvent::Completed {
                id: id.clone(),
                output: Arc::new(output),
            },
        ),
        // A result produced after cancellation is discarded.
        Ok(Ok(_)) => (TaskState::Canceled, TaskEvent::Canceled { id: id.clone() }),
        Ok(Err(err)) if cancelled && is_cancellation(&err) => {
            (TaskState::Canceled, TaskEvent::Canceled { id: id.clone() })
        }
        Ok(Err(err)) => {
            let error = format!("{err:#}");
            tracing::error!(id = %id, error = %error, "Task failed");
            (
                TaskState::Failed(error.clone()),
                TaskEvent::Failed {
                    id: id.clone(),
                    error,
                },
            )
        }
        Err(payload) => {
            let error = panic_message(payload);
            tracing::error!(id = %id, error = %error, "Task panicked");
            (
                TaskState::Failed(error.clone()),
                TaskEvent::Failed {
                    id: id.clone(),
                    error,
                },
            )
        }
    };

    inner.finish(&id, &control, state, event);
}

/// Runs tasks on dedicated threads and tracks them by id.
///
/// Cloning yields another handle to the same manager.
#[derive(Clone)]
pub struct TaskManager {
    inner: Arc<Inner>,
}

impl TaskManager {
    pub fn new(config: &TaskConfig) -> Self {
        Self::with_timings(config.progress_interval(), config.cancel_timeout())
    }

    pub fn with_timings(progress_interval: Duration, cancel_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                active: Mutex::new(HashMap::new()),
                changed: Condvar::new(),
                subscribers: Mutex::new(Vec::new()),
                progress_interval,
                cancel_timeout,
            }),
        }
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> mpsc::Receiver<TaskEvent> {
        let (tx, rx) = mpsc::channel();
        lock(&self.inner.subscribers).push(tx);
        rx
    }

    /// Start `task` under `id`. Returns false if `id` is already active.
    pub fn start<T: Task>(&self, id: impl Into<String>, task: T) -> bool {
        self.start_boxed(id, Box::new(task))
    }

    pub fn start_boxed(&self, id: impl Into<String>, task: Box<dyn Task>) -> bool {
        let id = id.into();
        let name = task.name().to_string();

        let mut active = lock(&self.inner.active);
        if active.contains_key(&id) {
            tracing::warn!(id = %id, name = %name, "Task id already active");
            return false;
        }

        let control = Arc::new(TaskControl::new());
        let thread_inner = Arc::clone(&self.inner);
        let thread_control = Arc::clone(&control);
        let thread_id = id.clone();

        // The thread cannot publish anything before the lock is released, so
        // `Started` is always its first event.
        let spawned = thread::Builder::new()
            .name(format!("task-{id}"))
            .spawn(move || run_task(thread_inner, thread_id, thread_control, task));
        if let Err(e) = spawned {
            tracing::error!(id = %id, error = %e, "Failed to spawn task thread");
            return false;
        }

        active.insert(
            id.clone(),
            ActiveTask {
                name: name.clone(),
                control,
                started_at: Instant::now(),
            },
        );
        tracing::info!(id = %id, name = %name, "Task started");
        self.inner.broadcast(TaskEvent::Started { id, name });
        true
    }

    /// Request cancellation and wait, up to the cancel timeout, for the task
    /// to stop. A task still running after that is detached and reported as
    /// canceled. Returns false if `id` is not active.
    pub fn cancel(&self, id: &str) -> bool {
        let deadline = Instant::now().checked_add(self.inner.cancel_timeout);
        let active = lock(&self.inner.active);
        let Some(control) = active.get(id).map(|task| Arc::clone(&task.control)) else {
            return false;
        };

        tracing::info!(id = %id, "Cancelling task");
        control.request_cancel();

        let mut active = self
            .inner
            .wait_while(active, deadline, |active| is_current(active, id, &control));
        if is_current(&active, id, &control) {
            self.inner.detach(&mut active, id, &control);
        }
        true
    }

    /// Cancel every active task, sharing one bounded wait.
    pub fn cancel_all(&self) {
        let deadline = Instant::now().checked_add(self.inner.cancel_timeout);
        let active = lock(&self.inner.active);
        let targets: Vec<(String, Arc<TaskControl>)> = active
            .iter()
            .map(|(id, task)| (id.clone(), Arc::clone(&task.control)))
            .collect();
        if targets.is_empty() {
            return;
        }

        tracing::info!(count = targets.len(), "Cancelling all tasks");
        for (_, control) in &targets {
            control.request_cancel();
        }

        let mut active = self.inner.wait_while(active, deadline, |active| {
            targets
                .iter()
                .any(|(id, control)| is_current(active, id, control))
        });
        for (id, control) in &targets {
            if is_current(&active, id, control) {
                self.inner.detach(&mut active, id, control);
            }
        }
    }

    pub fn active_count(&self) -> usize {
        lock(&self.inner.active).len()
    }

    /// Active ids, sorted.
    pub fn active_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.inner.active).keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn is_active(&self, id: &str) -> bool {
        lock(&self.inner.active).contains_key(id)
    }

    /// State of an active task; `None` once it has left the active set.
    pub fn state(&self, id: &str) -> Option<TaskState> {
        lock(&self.inner.active)
            .get(id)
            .map(|task| task.control.state())
    }

    /// Block until no task is active or `timeout` elapses. Returns whether
    /// every task finished.
    pub fn wait_for_all(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let active = lock(&self.inner.active);
        let active = self
            .inner
            .wait_while(active, deadline, |active| !active.is_empty());
        active.is_empty()
    }
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new(&TaskConfig::default())
    }
}

impl std::fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskManager")
            .field("active", &self.active_ids())
            .field("progress_interval", &self.inner.progress_interval)
            .field("cancel_timeout", &self.inner.cancel_timeout)
            .finish()
    }
}
