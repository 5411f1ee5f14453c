//! The tick engine.
//!
//! Two dedicated threads drive the runtime: the engine thread executes the
//! monotonic loop (advancing `CurrentTick` exactly once per iteration,
//! launching static cyclic jobs and drained dynamic tasks onto the shared
//! tokio executor), the physics thread steps the world coordinator at its
//! own cadence. Neither thread ever awaits the tasks it launches.

mod cron;
mod cycle;
mod readiness;
mod registry;
mod tasks;

pub use self::cron::CronJobSpec;
pub use self::cycle::CycleRate;
pub use self::readiness::{ReadyState, Readiness};
pub use self::registry::ServiceRegistry;
pub use self::tasks::{dynamic_task_key, DynamicTaskTable, IntoCyclicJob, JobFactory, OneShotTask};

use futures_util::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};
use uuid::Uuid;

use crate::metrics::ServerMetrics;
use crate::world::GameWorldCoordinator;
use self::tasks::StaticJobSpec;

/// Engine registration and startup failures; all fatal at boot.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("cyclic job {job}: declared rate {rate:?} is faster than the engine rate {engine_rate:?}")]
    RateFasterThanEngine {
        job: String,
        rate: Duration,
        engine_rate: Duration,
    },
    #[error("cyclic job {0} is already registered")]
    DuplicateJob(String),
    #[error("no service of type {type_name} registered for a job parameter")]
    UnresolvedDependency { type_name: &'static str },
    #[error("invalid cron expression {expression:?}: {source}")]
    InvalidCron {
        expression: String,
        #[source]
        source: ::cron::error::Error,
    },
    #[error("tick engine already started")]
    AlreadyStarted,
    #[error("tick engine must be started from within a tokio runtime")]
    NoRuntime,
    #[error("failed to spawn engine thread: {0}")]
    ThreadSpawn(#[source] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct TickEngineConfig {
    /// Minimum wall time between engine iterations that tick.
    pub engine_rate: Duration,
    /// Cadence of the world physics step.
    pub physics_rate: Duration,
    /// Completed task executions are reaped every this many ticks.
    pub prune_interval_ticks: u64,
}

impl Default for TickEngineConfig {
    fn default() -> Self {
        Self {
            engine_rate: Duration::from_millis(50),
            // 15 Hz
            physics_rate: Duration::from_millis(66),
            prune_interval_ticks: 64,
        }
    }
}

/// Cheap handle onto the process-global tick counter, used by the sync
/// engine as its frequency clock.
#[derive(Debug, Clone)]
pub struct TickClock(Arc<AtomicU64>);

impl TickClock {
    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct TickEngine {
    config: TickEngineConfig,
    current_tick: Arc<AtomicU64>,
    registry: Mutex<ServiceRegistry>,
    static_jobs: Mutex<Vec<StaticJobSpec>>,
    cron_jobs: Mutex<Vec<CronJobSpec>>,
    dynamic: Arc<DynamicTaskTable>,
    readiness: Readiness,
    cancel: CancellationToken,
    metrics: Arc<ServerMetrics>,
    coordinator: Arc<GameWorldCoordinator>,
    started: AtomicBool,
    threads: Mutex<Vec<std::thread::JoinHandle<()>>>,
}

impl TickEngine {
    pub fn new(
        config: TickEngineConfig,
        coordinator: Arc<GameWorldCoordinator>,
        metrics: Arc<ServerMetrics>,
    ) -> Self {
        Self {
            config,
            current_tick: Arc::new(AtomicU64::new(0)),
            registry: Mutex::new(ServiceRegistry::new()),
            static_jobs: Mutex::new(Vec::new()),
            cron_jobs: Mutex::new(Vec::new()),
            dynamic: Arc::new(DynamicTaskTable::new()),
            readiness: Readiness::new(),
            cancel: CancellationToken::new(),
            metrics,
            coordinator,
            started: AtomicBool::new(false),
            threads: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &TickEngineConfig {
        &self.config
    }

    pub fn readiness(&self) -> &Readiness {
        &self.readiness
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    pub fn current_tick(&self) -> u64 {
        self.current_tick.load(Ordering::SeqCst)
    }

    pub fn tick_clock(&self) -> TickClock {
        TickClock(Arc::clone(&self.current_tick))
    }

    pub fn dynamic_tasks(&self) -> Arc<DynamicTaskTable> {
        Arc::clone(&self.dynamic)
    }

    /// Make a service resolvable as a cyclic-job parameter.
    pub fn register_service<T: Send + Sync + 'static>(&self, service: Arc<T>) {
        self.registry.lock().expect("service registry lock").register(service);
    }

    /// Register a cyclic job at `rate`.
    ///
    /// The job's parameters are resolved from the service registry here,
    /// once; the engine stores the bound zero-argument closure. Rates
    /// faster than the engine rate and duplicate names fail registration.
    pub fn schedule_task<Params, J>(
        &self,
        name: impl Into<String>,
        rate: CycleRate,
        job: J,
    ) -> Result<Uuid, EngineError>
    where
        J: IntoCyclicJob<Params>,
    {
        if self.started.load(Ordering::SeqCst) {
            return Err(EngineError::AlreadyStarted);
        }
        let name = name.into();
        let normalized = rate.to_duration(self.config.engine_rate);
        if normalized < self.config.engine_rate {
            return Err(EngineError::RateFasterThanEngine {
                job: name,
                rate: normalized,
                engine_rate: self.config.engine_rate,
            });
        }

        let factory = {
            let registry = self.registry.lock().expect("service registry lock");
            job.bind(&registry)?
        };

        let mut jobs = self.static_jobs.lock().expect("static jobs lock");
        if jobs.iter().any(|existing| existing.name == name) {
            return Err(EngineError::DuplicateJob(name));
        }

        let id = Uuid::new_v4();
        debug!(job = %name, rate_ms = normalized.as_millis() as u64, "Registered cyclic job");
        jobs.push(StaticJobSpec {
            id,
            name,
            rate: normalized,
            factory,
        });
        Ok(id)
    }

    /// Register a job on a cron expression, parsed here.
    pub fn schedule_cron<Params, J>(
        &self,
        name: impl Into<String>,
        expression: &str,
        job: J,
    ) -> Result<(), EngineError>
    where
        J: IntoCyclicJob<Params>,
    {
        if self.started.load(Ordering::SeqCst) {
            return Err(EngineError::AlreadyStarted);
        }
        let name = name.into();
        let factory = {
            let registry = self.registry.lock().expect("service registry lock");
            job.bind(&registry)?
        };
        let spec = CronJobSpec::new(name.clone(), expression, factory)?;

        let mut jobs = self.cron_jobs.lock().expect("cron jobs lock");
        if jobs.iter().any(|existing| existing.name == name) {
            return Err(EngineError::DuplicateJob(name));
        }
        jobs.push(spec);
        Ok(())
    }

    /// Enqueue a dynamic one-shot task, deduplicated by `key` within the
    /// current engine iteration (latest enqueue wins; enqueues while the
    /// key's previous execution is still running are dropped).
    pub fn send_task<F, Fut>(&self, key: u64, task: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.dynamic.send_task(key, task);
    }

    /// Spawn the engine and physics threads and the cron runners.
    ///
    /// The loops idle until readiness reaches `Alive` and pause again
    /// whenever it leaves that state.
    pub fn start(&self) -> Result<(), EngineError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(EngineError::AlreadyStarted);
        }
        let runtime = Handle::try_current().map_err(|_| EngineError::NoRuntime)?;

        for job in self.cron_jobs.lock().expect("cron jobs lock").drain(..) {
            runtime.spawn(self::cron::run_cron_job(
                job,
                self.cancel.child_token(),
                Arc::clone(&self.metrics),
            ));
        }

        let jobs = std::mem::take(&mut *self.static_jobs.lock().expect("static jobs lock"));
        let engine_thread = std::thread::Builder::new()
            .name("altruist-engine".to_string())
            .spawn({
                let config = self.config.clone();
                let current_tick = Arc::clone(&self.current_tick);
                let dynamic = Arc::clone(&self.dynamic);
                let readiness = self.readiness.clone();
                let cancel = self.cancel.child_token();
                let metrics = Arc::clone(&self.metrics);
                let runtime = runtime.clone();
                move || {
                    run_engine_loop(
                        config,
                        jobs,
                        current_tick,
                        dynamic,
                        readiness,
                        cancel,
                        metrics,
                        runtime,
                    );
                }
            })
            .map_err(EngineError::ThreadSpawn)?;

        let physics_thread = std::thread::Builder::new()
            .name("altruist-physics".to_string())
            .spawn({
                let physics_rate = self.config.physics_rate;
                let coordinator = Arc::clone(&self.coordinator);
                let readiness = self.readiness.clone();
                let cancel = self.cancel.child_token();
                move || run_physics_loop(physics_rate, coordinator, readiness, cancel)
            })
            .map_err(EngineError::ThreadSpawn)?;

        let mut threads = self.threads.lock().expect("engine threads lock");
        threads.push(engine_thread);
        threads.push(physics_thread);
        info!("Tick engine started");
        Ok(())
    }

    /// Cancel both loops and join their threads.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        let handles = std::mem::take(&mut *self.threads.lock().expect("engine threads lock"));
        for handle in handles {
            let _ = handle.join();
        }
        info!("Tick engine stopped");
    }
}

/// Sleep granularity of both loops while idle or waiting for readiness.
const LOOP_IDLE_SLEEP: Duration = Duration::from_micros(500);

struct RunningJob {
    spec: StaticJobSpec,
    accumulated: Duration,
    handle: Option<tokio::task::JoinHandle<()>>,
}

#[allow(clippy::too_many_arguments)]
fn run_engine_loop(
    config: TickEngineConfig,
    jobs: Vec<StaticJobSpec>,
    current_tick: Arc<AtomicU64>,
    dynamic: Arc<DynamicTaskTable>,
    readiness: Readiness,
    cancel: CancellationToken,
    metrics: Arc<ServerMetrics>,
    runtime: Handle,
) {
    // Wait for system ready before the first tick.
    while !cancel.is_cancelled() && !readiness.is_alive() {
        std::thread::sleep(LOOP_IDLE_SLEEP);
    }
    if cancel.is_cancelled() {
        return;
    }

    let mut jobs: Vec<RunningJob> = jobs
        .into_iter()
        .map(|spec| RunningJob {
            spec,
            accumulated: Duration::ZERO,
            handle: None,
        })
        .collect();
    let mut dynamic_running: HashMap<u64, tokio::task::JoinHandle<()>> = HashMap::new();
    let prune_interval = config.prune_interval_ticks.max(1);
    let mut last_tick = Instant::now();

    while !cancel.is_cancelled() {
        if !readiness.is_alive() {
            // A Failed transition stops ticking; resume from a fresh delta.
            last_tick = Instant::now();
            std::thread::sleep(LOOP_IDLE_SLEEP);
            continue;
        }

        let now = Instant::now();
        let elapsed = now - last_tick;
        if elapsed < config.engine_rate {
            std::thread::sleep(LOOP_IDLE_SLEEP.min(config.engine_rate - elapsed));
            continue;
        }

        // All tasks launched below observe the same tick value.
        let tick = current_tick.fetch_add(1, Ordering::SeqCst) + 1;
        last_tick = now;
        metrics.engine_ticks.fetch_add(1, Ordering::Relaxed);

        for job in &mut jobs {
            job.accumulated += elapsed;
            if job.accumulated < job.spec.rate {
                continue;
            }
            let in_flight = job.handle.as_ref().is_some_and(|handle| !handle.is_finished());
            if in_flight {
                metrics.static_tasks_skipped.fetch_add(1, Ordering::Relaxed);
                trace!(
                    job = %job.spec.name,
                    job_id = %job.spec.id,
                    tick,
                    "Skipping cycle; previous execution still running"
                );
                continue;
            }
            job.accumulated = Duration::ZERO;
            job.handle = Some(launch_guarded(
                &runtime,
                job.spec.name.clone(),
                (job.spec.factory)(),
                &metrics,
            ));
            metrics.static_tasks_launched.fetch_add(1, Ordering::Relaxed);
        }

        if tick % prune_interval == 0 {
            for job in &mut jobs {
                if job.handle.as_ref().is_some_and(|handle| handle.is_finished()) {
                    job.handle = None;
                }
            }
            dynamic_running.retain(|_, handle| !handle.is_finished());
        }

        for (key, task) in dynamic.drain() {
            if dynamic_running.get(&key).is_some_and(|handle| !handle.is_finished()) {
                // Documented drop: while a key's previous execution runs,
                // fresh enqueues for that key are discarded.
                metrics.dynamic_tasks_dropped.fetch_add(1, Ordering::Relaxed);
                debug!(key, tick, "Dropping dynamic task; previous execution still running");
                continue;
            }
            let handle = launch_guarded(&runtime, format!("dynamic:{key:x}"), task(), &metrics);
            dynamic_running.insert(key, handle);
            metrics.dynamic_tasks_launched.fetch_add(1, Ordering::Relaxed);
        }

        metrics.record_tick_duration(now.elapsed());
    }
}

/// Per-task boundary: a panicking delegate is logged and counted, never
/// propagated into the engine loop.
fn launch_guarded(
    runtime: &Handle,
    name: String,
    task: futures_util::future::BoxFuture<'static, ()>,
    metrics: &Arc<ServerMetrics>,
) -> tokio::task::JoinHandle<()> {
    let metrics = Arc::clone(metrics);
    runtime.spawn(async move {
        if let Err(panic) = AssertUnwindSafe(task).catch_unwind().await {
            metrics.task_errors.fetch_add(1, Ordering::Relaxed);
            error!(task = %name, panic = %describe_panic(&panic), "Task delegate panicked");
        }
    })
}

fn describe_panic(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn run_physics_loop(
    physics_rate: Duration,
    coordinator: Arc<GameWorldCoordinator>,
    readiness: Readiness,
    cancel: CancellationToken,
) {
    let mut last_step = Instant::now();
    while !cancel.is_cancelled() {
        std::thread::sleep(Duration::from_millis(1));
        if !readiness.is_alive() {
            last_step = Instant::now();
            continue;
        }

        let now = Instant::now();
        let elapsed = now - last_step;
        if elapsed >= physics_rate {
            last_step = now;
            coordinator.step(elapsed.as_secs_f64());
        }
    }
}
