//! Debounced background tasks
//!
//! Each task key holds at most one pending execution. Adding a key that
//! is already scheduled only replaces its arguments; the timer keeps
//! running. A task that fails is retried after the same delay until it
//! succeeds or the runner is reset.

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

/// Work run by the [`TasksRunner`]
pub type TaskFn<A> = Arc<dyn Fn(A) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

struct Scheduled<A> {
    task: TaskFn<A>,
    args: A,
    /// Distinguishes this schedule from an earlier one under the same key
    generation: u64,
    running: bool,
    /// Arguments were replaced while the task was running
    dirty: bool,
    timer: AbortHandle,
}

struct Registry<K, A> {
    tasks: HashMap<K, Scheduled<A>>,
    next_generation: u64,
}

/// Keyed debounce scheduler.
///
/// Must be used from within a tokio runtime. Dropping the runner cancels
/// every task that is not currently executing.
pub struct TasksRunner<K, A> {
    delay: Duration,
    registry: Arc<Mutex<Registry<K, A>>>,
}

impl<K, A> TasksRunner<K, A>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
    A: Clone + Send + 'static,
{
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            registry: Arc::new(Mutex::new(Registry {
                tasks: HashMap::new(),
                next_generation: 0,
            })),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Schedule `task` under `key`, or refresh the arguments of the
    /// execution already pending for it.
    pub fn add_task(&self, key: K, task: TaskFn<A>, args: A) {
        let mut registry = self.registry.lock();

        if let Some(scheduled) = registry.tasks.get_mut(&key) {
            scheduled.task = task;
            scheduled.args = args;
            if scheduled.running {
                scheduled.dirty = true;
            }
            debug!(key = ?key, "Task arguments replaced");
            return;
        }

        let generation = registry.next_generation;
        registry.next_generation += 1;

        let handle = tokio::spawn(run_scheduled(
            self.registry.clone(),
            key.clone(),
            generation,
            self.delay,
        ));

        debug!(key = ?key, delay_ms = self.delay.as_millis() as u64, "Task scheduled");
        registry.tasks.insert(
            key,
            Scheduled {
                task,
                args,
                generation,
                running: false,
                dirty: false,
                timer: handle.abort_handle(),
            },
        );
    }

    /// Cancel every pending timer and forget all tasks.
    ///
    /// Executions already in flight finish, but are not retried or
    /// re-armed afterwards.
    pub fn reset(&self) {
        let mut registry = self.registry.lock();
        let count = registry.tasks.len();
        for (_, scheduled) in registry.tasks.drain() {
            if !scheduled.running {
                scheduled.timer.abort();
            }
        }
        if count > 0 {
            debug!(count, "Tasks reset");
        }
    }

    /// Number of scheduled or running tasks
    pub fn pending(&self) -> usize {
        self.registry.lock().tasks.len()
    }

    /// Whether a task is scheduled or running under `key`
    pub fn contains(&self, key: &K) -> bool {
        self.registry.lock().tasks.contains_key(key)
    }
}

impl<K, A> Drop for TasksRunner<K, A> {
    fn drop(&mut self) {
        for (_, scheduled) in self.registry.lock().tasks.drain() {
            if !scheduled.running {
                scheduled.timer.abort();
            }
        }
    }
}

/// Timer loop for one scheduled key
async fn run_scheduled<K, A>(
    registry: Arc<Mutex<Registry<K, A>>>,
    key: K,
    generation: u64,
    delay: Duration,
) where
    K: Eq + Hash + Clone + Debug + Send + 'static,
    A: Clone + Send + 'static,
{
    loop {
        tokio::time::sleep(delay).await;

        let (task, args) = {
            let mut registry = registry.lock();
            match registry.tasks.get_mut(&key) {
                Some(scheduled) if scheduled.generation == generation => {
                    scheduled.running = true;
                    scheduled.dirty = false;
                    (scheduled.task.clone(), scheduled.args.clone())
                }
                _ => return,
            }
        };

        // A panic counts as a failure
        let outcome = AssertUnwindSafe(async move { task(args).await })
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(anyhow::anyhow!("task panicked: {}", panic_message(&*panic)))
            });

        let finished = {
            let mut registry = registry.lock();
            let Some(scheduled) = registry
                .tasks
                .get_mut(&key)
                .filter(|s| s.generation == generation)
            else {
                // Reset while running
                return;
            };
            scheduled.running = false;

            match outcome {
                Ok(()) if !scheduled.dirty => true,
                Ok(()) => {
                    debug!(key = ?key, "Arguments changed during run, re-arming");
                    false
                }
                Err(e) => {
                    warn!(key = ?key, error = %e, "Task failed, retrying");
                    false
                }
            }
        };

        if finished {
            registry.lock().tasks.remove(&key);
            debug!(key = ?key, "Task completed");
            return;
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg
    } else {
        "unknown panic"
    }
}
