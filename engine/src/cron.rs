//! Background job scheduler: ticks once a second, fires any job whose
//! `next_run` has elapsed, and reschedules it. Grounded in the same
//! tick-and-rescan shape as a Tauri scheduler, adapted to run headless
//! against engine tasks instead of UI-bound agent turns.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex, RwLock};

use crate::error::{EngineError, Result};
use crate::message::Role;
use crate::router::session::SessionKey;
use crate::router::Router;
use crate::store::{FactExtractor, HistoryStore, MemoryStore};

const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Default schedules for the scheduler's own built-in jobs.
pub const DEFAULT_SESSION_CLEANUP_CRON: &str = "0 */5 * * * *";
pub const DEFAULT_SESSION_MAX_IDLE: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_MEMORY_EXTRACTION_CRON: &str = "0 */10 * * * *";
pub const DEFAULT_MEMORY_COMPACTION_CRON: &str = "0 0 * * * *";

/// One unit of recurring work. The concrete agent-turn / memory-extraction
/// logic a job runs is supplied by the caller; the scheduler only owns
/// timing and overlap prevention.
#[async_trait]
pub trait CronTask: Send + Sync {
    async fn run(&self);
}

/// Adapts a plain async closure to [`CronTask`].
pub struct FnTask<F>(pub F);

#[async_trait]
impl<F, Fut> CronTask for FnTask<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: std::future::Future<Output = ()> + Send,
{
    async fn run(&self) {
        (self.0)().await;
    }
}

struct Job {
    name: String,
    schedule: cron::Schedule,
    task: Arc<dyn CronTask>,
    next_run: Mutex<Option<DateTime<Utc>>>,
    /// Held for the duration of one execution; `try_lock` lets the ticker
    /// skip a job that is still running rather than overlap it.
    running: Mutex<()>,
}

/// In-memory, Tokio-driven job scheduler. One instance serves every
/// registered job; each job's overlap prevention is independent of the
/// others.
pub struct CronScheduler {
    jobs: RwLock<HashMap<String, Arc<Job>>>,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
}

impl Default for CronScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl CronScheduler {
    #[must_use]
    pub fn new() -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            jobs: RwLock::new(HashMap::new()),
            stop_tx,
            stop_rx,
        }
    }

    /// Parses `cron_expr` (6-field, seconds-first) and registers the job
    /// under `name`. Rejects a duplicate name.
    pub async fn register_job(
        &self,
        name: impl Into<String>,
        cron_expr: &str,
        task: Arc<dyn CronTask>,
    ) -> Result<()> {
        let name = name.into();
        let schedule = cron::Schedule::from_str(cron_expr)
            .map_err(|e| EngineError::InvalidSchedule(format!("{cron_expr:?}: {e}")))?;
        let next_run = schedule.upcoming(Utc).next();
        let job = Arc::new(Job {
            name: name.clone(),
            schedule,
            task,
            next_run: Mutex::new(next_run),
            running: Mutex::new(()),
        });

        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&name) {
            return Err(EngineError::DuplicateJob(name));
        }
        jobs.insert(name, job);
        Ok(())
    }

    pub async fn unregister_job(&self, name: &str) -> bool {
        self.jobs.write().await.remove(name).is_some()
    }

    pub async fn job_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.jobs.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Spawns the background ticker. Returns immediately; `stop` signals the
    /// ticker to exit on its next wakeup.
    pub fn start(self: &Arc<Self>) {
        let scheduler = self.clone();
        let mut stop_rx = self.stop_rx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(TICK_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        scheduler.tick().await;
                    }
                    Ok(()) = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });
    }

    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    async fn tick(&self) {
        let now = Utc::now();
        let due: Vec<Arc<Job>> = {
            let jobs = self.jobs.read().await;
            let mut due = Vec::new();
            for job in jobs.values() {
                let next_run = *job.next_run.lock().await;
                if next_run.is_some_and(|t| t <= now) {
                    due.push(job.clone());
                }
            }
            due
        };

        for job in due {
            let Ok(_guard) = job.running.try_lock() else {
                // Still running from a previous tick; skip this firing
                // rather than overlap it.
                continue;
            };
            job.task.run().await;
            let mut next_run = job.next_run.lock().await;
            *next_run = job.schedule.upcoming(Utc).next();
            tracing::debug!(job = %job.name, next_run = ?*next_run, "cron job fired");
        }
    }
}

/// Session-cleanup built-in: prunes sessions idle past `max_idle`.
pub fn session_cleanup_task(router: Arc<Router>, max_idle: Duration) -> Arc<dyn CronTask> {
    Arc::new(FnTask(move || {
        let router = router.clone();
        async move {
            let pruned = router.prune_idle_sessions(max_idle).await;
            if pruned > 0 {
                tracing::info!(pruned, "session-cleanup removed idle sessions");
            }
        }
    }))
}

/// Memory-extraction built-in: walks every session's history for
/// (user, assistant) exchange pairs that closed since the last run, turns
/// each into facts via `extractor`, and indexes them into `memory`. Tracks
/// the last-seen row per session in memory, so a process restart re-walks
/// full history once rather than losing track of where it left off.
pub fn memory_extraction_task(
    router: Arc<Router>,
    history: Arc<dyn HistoryStore>,
    memory: Arc<dyn MemoryStore>,
    extractor: Arc<dyn FactExtractor>,
) -> Arc<dyn CronTask> {
    let cursors: Arc<Mutex<HashMap<SessionKey, u64>>> = Arc::new(Mutex::new(HashMap::new()));
    Arc::new(FnTask(move || {
        let router = router.clone();
        let history = history.clone();
        let memory = memory.clone();
        let extractor = extractor.clone();
        let cursors = cursors.clone();
        async move {
            let mut keys = Vec::new();
            router.sessions().range(|key, _session| keys.push(key.clone())).await;

            let mut extracted = 0usize;
            for key in keys {
                let Ok(rows) = history.load_recent(&key, usize::MAX).await else {
                    continue;
                };
                let start_seq = cursors.lock().await.get(&key).copied().unwrap_or(0);
                let mut pending_user: Option<String> = None;
                let mut advanced_to = start_seq;

                for row in rows.iter().filter(|r| r.seq >= start_seq) {
                    match row.message.role {
                        Role::User => pending_user = Some(row.message.content.clone()),
                        Role::Assistant => {
                            if let Some(user_content) = pending_user.take() {
                                for fact in extractor.extract(&user_content, &row.message.content).await {
                                    if memory.index(fact).await.is_ok() {
                                        extracted += 1;
                                    }
                                }
                            }
                            advanced_to = row.seq + 1;
                        }
                        Role::System | Role::Tool => {}
                    }
                }
                cursors.lock().await.insert(key, advanced_to);
            }

            if extracted > 0 {
                tracing::info!(extracted, "memory-extraction indexed new facts");
            }
        }
    }))
}

/// Consumed: a periodic history-compaction hook. The merging/summarizing
/// algorithm itself is out of scope; this trait only gives the scheduler
/// something to call on the configured schedule.
#[async_trait]
pub trait CompactionHook: Send + Sync {
    async fn compact(&self);
}

/// Memory-compaction built-in: fires `hook` on the configured schedule.
pub fn memory_compaction_task(hook: Arc<dyn CompactionHook>) -> Arc<dyn CronTask> {
    Arc::new(FnTask(move || {
        let hook = hook.clone();
        async move {
            hook.compact().await;
        }
    }))
}
