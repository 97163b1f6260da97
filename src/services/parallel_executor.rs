//! Bounded-concurrency fan-out of skill tasks.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, warn};

use crate::domain::models::{merge_results, MergeStrategy, ParallelTask, TaskResult};
use crate::domain::ports::SkillExecutor;

/// Configuration for the parallel executor.
#[derive(Debug, Clone)]
pub struct ParallelExecutorConfig {
    /// Maximum tasks running at once.
    pub max_concurrency: usize,
    /// Timeout for tasks that declare none.
    pub task_timeout: Duration,
}

impl Default for ParallelExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 5,
            task_timeout: Duration::from_secs(60),
        }
    }
}

/// Runs fan-out tasks on a bounded worker pool.
#[derive(Clone)]
pub struct ParallelExecutor {
    skills: Arc<dyn SkillExecutor>,
    config: ParallelExecutorConfig,
}

impl ParallelExecutor {
    pub fn new(skills: Arc<dyn SkillExecutor>, config: ParallelExecutorConfig) -> Self {
        Self { skills, config }
    }

    /// Run tasks in ascending priority order, at most `max_concurrency` at a
    /// time.
    ///
    /// A task is spawned only once it holds a worker permit, so tasks start
    /// in priority order whatever the runtime flavor. When `wait_for_all` is
    /// false this returns once every blocking task has finished; the rest
    /// keep running in the background and are not reported. A global
    /// `deadline` aborts whatever is still outstanding, submitted or not,
    /// and reports it as timed out. Results come back in submission order.
    pub async fn execute(&self, mut tasks: Vec<ParallelTask>, wait_for_all: bool, deadline: Option<Duration>) -> Vec<TaskResult> {
        if tasks.is_empty() {
            return Vec::new();
        }
        tasks.sort_by_key(|t| t.priority);

        let blocking: Vec<usize> = (0..tasks.len()).filter(|i| tasks[*i].blocking).collect();
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let global_deadline = deadline.map(|d| Instant::now() + d);
        let mut set: JoinSet<(usize, TaskResult)> = JoinSet::new();
        let mut results: Vec<Option<TaskResult>> = vec![None; tasks.len()];
        let mut submitted = 0;
        let mut timed_out = false;

        debug!(tasks = tasks.len(), max_concurrency = self.config.max_concurrency, wait_for_all, "fan-out started");

        loop {
            if !wait_for_all && blocking.iter().all(|i| results[*i].is_some()) {
                break;
            }
            if submitted == tasks.len() && set.is_empty() {
                break;
            }

            let expired = async {
                match global_deadline {
                    Some(at) => sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                biased;
                () = expired => {
                    timed_out = true;
                    break;
                }
                Some(joined) = set.join_next(), if !set.is_empty() => match joined {
                    Ok((index, result)) => results[index] = Some(result),
                    Err(err) => warn!(error = %err, "parallel task did not complete"),
                },
                permit = Arc::clone(&semaphore).acquire_owned(), if submitted < tasks.len() => {
                    let Ok(permit) = permit else {
                        break;
                    };
                    let index = submitted;
                    submitted += 1;
                    let task = tasks[index].clone();
                    let limit = task.timeout().unwrap_or(self.config.task_timeout);
                    let skills = Arc::clone(&self.skills);
                    set.spawn(async move {
                        let result = run_task(skills, task, limit).await;
                        drop(permit);
                        (index, result)
                    });
                }
            }
        }

        let finished = results.iter().filter(|r| r.is_some()).count();
        if timed_out {
            set.abort_all();
            let secs = deadline.map_or(0.0, |d| d.as_secs_f64());
            warn!(outstanding = tasks.len() - finished, "fan-out deadline reached");
            for (slot, task) in results.iter_mut().zip(&tasks).filter(|(slot, _)| slot.is_none()) {
                *slot = Some(TaskResult::failed(
                    task.task_id.clone(),
                    format!("Task timed out after {secs:.1}s (global timeout)"),
                    None,
                    deadline.unwrap_or_default(),
                ));
            }
        } else if submitted == tasks.len() && set.is_empty() {
            for (slot, task) in results.iter_mut().zip(&tasks).filter(|(slot, _)| slot.is_none()) {
                *slot = Some(TaskResult::failed(task.task_id.clone(), "Task panicked or was cancelled", None, Duration::ZERO));
            }
        } else {
            let background: Vec<ParallelTask> = tasks.iter().skip(submitted).cloned().collect();
            debug!(running = set.len(), queued = background.len(), "returning before non-blocking tasks finished");
            set.detach_all();
            if !background.is_empty() {
                let skills = Arc::clone(&self.skills);
                let task_timeout = self.config.task_timeout;
                tokio::spawn(async move {
                    for task in background {
                        let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                            return;
                        };
                        let limit = task.timeout().unwrap_or(task_timeout);
                        let skills = Arc::clone(&skills);
                        tokio::spawn(async move {
                            let _ = run_task(skills, task, limit).await;
                            drop(permit);
                        });
                    }
                });
            }
        }

        results.into_iter().flatten().collect()
    }

    /// Combine results with a merge strategy.
    pub fn merge(results: &[TaskResult], strategy: MergeStrategy) -> Value {
        merge_results(results, strategy)
    }
}

async fn run_task(skills: Arc<dyn SkillExecutor>, task: ParallelTask, limit: Duration) -> TaskResult {
    let started_at = Utc::now();
    let clock = Instant::now();
    let context = Value::Object(task.context.clone());
    let outcome = timeout(limit, skills.execute(&task.skill, &task.instruction, &context, &Map::new())).await;
    let elapsed = clock.elapsed();

    match outcome {
        Ok(Ok(value)) => TaskResult::completed(task.task_id, value, started_at, elapsed),
        Ok(Err(err)) => {
            debug!(task_id = %task.task_id, skill = %task.skill, error = %err, "parallel task failed");
            TaskResult::failed(task.task_id, err.to_string(), Some(started_at), elapsed)
        }
        Err(_) => TaskResult::failed(
            task.task_id,
            format!("Task timed out after {:.1}s", limit.as_secs_f64()),
            Some(started_at),
            elapsed,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::TaskStatus;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Sleeps for `context.sleep_ms`, fails when `context.fail` is set, and
    /// tracks how many calls overlap.
    #[derive(Default)]
    struct SleepySkill {
        active: AtomicUsize,
        peak: AtomicUsize,
        started: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SkillExecutor for SleepySkill {
        async fn execute(&self, _skill: &str, instruction: &str, context: &Value, _params: &Map<String, Value>) -> anyhow::Result<Value> {
            self.started.lock().unwrap().push(instruction.to_string());
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let sleep_ms = context.get("sleep_ms").and_then(Value::as_u64).unwrap_or(10);
            tokio::time::sleep(Duration::from_millis(sleep_ms)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            if context.get("fail").is_some() {
                anyhow::bail!("skill exploded");
            }
            Ok(json!({"instruction": instruction}))
        }
    }

    fn task(id: &str, sleep_ms: u64) -> ParallelTask {
        let mut task = ParallelTask::new("sleep", id).with_id(id);
        task.context.insert("sleep_ms".to_string(), json!(sleep_ms));
        task
    }

    fn executor(skill: Arc<SleepySkill>, max_concurrency: usize) -> ParallelExecutor {
        ParallelExecutor::new(
            skill,
            ParallelExecutorConfig {
                max_concurrency,
                task_timeout: Duration::from_secs(5),
            },
        )
    }

    #[tokio::test]
    async fn test_never_exceeds_max_concurrency() {
        let skill = Arc::new(SleepySkill::default());
        let tasks = (0..5).map(|i| task(&format!("t{i}"), 40)).collect();

        let results = executor(Arc::clone(&skill), 2).execute(tasks, true, None).await;

        assert_eq!(results.len(), 5);
        assert!(results.iter().all(TaskResult::is_success));
        assert!(skill.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_task_timeout_yields_failure() {
        let skill = Arc::new(SleepySkill::default());
        let slow = task("slow", 2_000).with_timeout(Duration::from_millis(50));

        let started = Instant::now();
        let results = executor(skill, 2).execute(vec![slow, task("fast", 5)], true, None).await;

        assert!(started.elapsed() < Duration::from_secs(1));
        let slow = results.iter().find(|r| r.task_id == "slow").unwrap();
        assert_eq!(slow.status, TaskStatus::Failed);
        assert!(slow.error.as_deref().unwrap().contains("timed out"));
        assert!(results.iter().find(|r| r.task_id == "fast").unwrap().is_success());
    }

    #[tokio::test]
    async fn test_global_timeout_synthesizes_failures() {
        let skill = Arc::new(SleepySkill::default());
        let tasks = vec![task("a", 2_000), task("b", 2_000), task("c", 5)];

        let results = executor(skill, 3)
            .execute(tasks, true, Some(Duration::from_millis(100)))
            .await;

        assert_eq!(results.len(), 3);
        let ids: Vec<&str> = results.iter().map(|r| r.task_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(results[0].error.as_deref().unwrap().contains("global timeout"));
        assert!(results[2].is_success());
    }

    #[tokio::test]
    async fn test_returns_after_blocking_tasks_when_not_waiting_for_all() {
        let skill = Arc::new(SleepySkill::default());
        let tasks = vec![task("background", 2_000).non_blocking(), task("needed", 10)];

        let started = Instant::now();
        let results = executor(skill, 2).execute(tasks, false, None).await;

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].task_id, "needed");
    }

    #[tokio::test]
    async fn test_priority_order_with_single_worker() {
        let skill = Arc::new(SleepySkill::default());
        let tasks = vec![
            task("low", 5).with_priority(3),
            task("high", 5).with_priority(0),
            task("mid", 5).with_priority(1),
        ];

        let results = executor(Arc::clone(&skill), 1).execute(tasks, true, None).await;

        let ids: Vec<&str> = results.iter().map(|r| r.task_id.as_str()).collect();
        assert_eq!(ids, vec!["high", "mid", "low"]);
        assert_eq!(skill.started.lock().unwrap().first().map(String::as_str), Some("high"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_priority_order_holds_on_multi_thread_runtime() {
        for _ in 0..20 {
            let skill = Arc::new(SleepySkill::default());
            let tasks = (0..5).rev().map(|i| task(&format!("p{i}"), 1).with_priority(i)).collect();
            let executor = executor(Arc::clone(&skill), 1);

            let results = tokio::spawn(async move { executor.execute(tasks, true, None).await })
                .await
                .unwrap();

            assert!(results.iter().all(TaskResult::is_success));
            let started = skill.started.lock().unwrap().clone();
            assert_eq!(started, vec!["p0", "p1", "p2", "p3", "p4"]);
        }
    }

    #[tokio::test]
    async fn test_global_timeout_reports_unsubmitted_tasks() {
        let skill = Arc::new(SleepySkill::default());
        let tasks = vec![task("first", 2_000), task("queued", 5)];

        let results = executor(Arc::clone(&skill), 1)
            .execute(tasks, true, Some(Duration::from_millis(50)))
            .await;

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.error.as_deref().unwrap_or_default().contains("global timeout")));
        assert_eq!(skill.started.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_shared_task_ids_are_each_reported() {
        let skill = Arc::new(SleepySkill::default());
        let tasks = vec![task("same", 2_000), task("same", 2_000)];

        let results = executor(skill, 2)
            .execute(tasks, true, Some(Duration::from_millis(50)))
            .await;

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.task_id == "same" && !r.is_success()));
    }

    #[tokio::test]
    async fn test_skill_error_is_reported() {
        let skill = Arc::new(SleepySkill::default());
        let mut failing = task("bad", 1);
        failing.context.insert("fail".to_string(), json!(true));

        let results = executor(skill, 1).execute(vec![failing], true, None).await;
        assert_eq!(results[0].error.as_deref(), Some("skill exploded"));
        assert!(results[0].started_at.is_some());
    }
}
