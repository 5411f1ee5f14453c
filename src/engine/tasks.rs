use dashmap::DashMap;
use futures_util::future::BoxFuture;
use std::future::Future;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::registry::ServiceRegistry;
use super::EngineError;

/// Bound, zero-argument cyclic job body; invoked once per cycle fire.
pub type JobFactory = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// One-shot dynamic task body.
pub type OneShotTask = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Deduplication key for dynamic tasks.
pub fn dynamic_task_key<K: Hash>(key: K) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

/// A statically registered cyclic job with its normalized rate.
pub struct StaticJobSpec {
    pub id: Uuid,
    pub name: String,
    pub rate: Duration,
    pub factory: JobFactory,
}

/// Conversion of job functions into bound closures.
///
/// The function's parameters are resolved from the service registry exactly
/// once, here; what the engine stores and launches is a zero-argument
/// closure over the resolved `Arc`s. A parameter missing from the registry
/// fails the registration.
pub trait IntoCyclicJob<Params> {
    fn bind(self, registry: &ServiceRegistry) -> Result<JobFactory, EngineError>;
}

impl<F, Fut> IntoCyclicJob<()> for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn bind(self, _registry: &ServiceRegistry) -> Result<JobFactory, EngineError> {
        Ok(Arc::new(move || -> BoxFuture<'static, ()> { Box::pin(self()) }))
    }
}

impl<F, Fut, A> IntoCyclicJob<(A,)> for F
where
    F: Fn(Arc<A>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
    A: Send + Sync + 'static,
{
    fn bind(self, registry: &ServiceRegistry) -> Result<JobFactory, EngineError> {
        let a = registry.resolve::<A>()?;
        Ok(Arc::new(move || -> BoxFuture<'static, ()> {
            Box::pin(self(Arc::clone(&a)))
        }))
    }
}

impl<F, Fut, A, B> IntoCyclicJob<(A, B)> for F
where
    F: Fn(Arc<A>, Arc<B>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
    A: Send + Sync + 'static,
    B: Send + Sync + 'static,
{
    fn bind(self, registry: &ServiceRegistry) -> Result<JobFactory, EngineError> {
        let a = registry.resolve::<A>()?;
        let b = registry.resolve::<B>()?;
        Ok(Arc::new(move || -> BoxFuture<'static, ()> {
            Box::pin(self(Arc::clone(&a), Arc::clone(&b)))
        }))
    }
}

impl<F, Fut, A, B, C> IntoCyclicJob<(A, B, C)> for F
where
    F: Fn(Arc<A>, Arc<B>, Arc<C>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
    A: Send + Sync + 'static,
    B: Send + Sync + 'static,
    C: Send + Sync + 'static,
{
    fn bind(self, registry: &ServiceRegistry) -> Result<JobFactory, EngineError> {
        let a = registry.resolve::<A>()?;
        let b = registry.resolve::<B>()?;
        let c = registry.resolve::<C>()?;
        Ok(Arc::new(move || -> BoxFuture<'static, ()> {
            Box::pin(self(Arc::clone(&a), Arc::clone(&b), Arc::clone(&c)))
        }))
    }
}

struct PendingTask {
    sequence: u64,
    task: std::sync::Mutex<Option<OneShotTask>>,
}

/// Lock-free table of dynamically enqueued one-shot tasks.
///
/// Enqueues for the same key within one engine iteration overwrite, keeping
/// the most recent delegate; the engine loop drains the table once per
/// iteration in enqueue order.
pub struct DynamicTaskTable {
    pending: DashMap<u64, PendingTask>,
    sequence: AtomicU64,
}

impl DynamicTaskTable {
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
            sequence: AtomicU64::new(0),
        }
    }

    /// Enqueue a task under `key`; the latest enqueue for a key wins.
    pub fn send_task<F, Fut>(&self, key: u64, task: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        self.pending.insert(
            key,
            PendingTask {
                sequence,
                task: std::sync::Mutex::new(Some(
                    Box::new(move || -> BoxFuture<'static, ()> { Box::pin(task()) }) as OneShotTask,
                )),
            },
        );
    }

    /// Take every pending task, ordered by enqueue sequence.
    pub fn drain(&self) -> Vec<(u64, OneShotTask)> {
        let keys: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
        let mut drained: Vec<(u64, PendingTask)> = keys
            .into_iter()
            .filter_map(|key| self.pending.remove(&key))
            .collect();
        drained.sort_by_key(|(_, pending)| pending.sequence);
        drained
            .into_iter()
            .map(|(key, pending)| {
                let task = pending
                    .task
                    .lock()
                    .unwrap()
                    .take()
                    .expect("pending task taken exactly once during drain");
                (key, task)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl Default for DynamicTaskTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn latest_enqueue_for_a_key_wins() {
        let table = DynamicTaskTable::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let key = dynamic_task_key(("client", "SyncPacket"));

        for marker in [1usize, 2] {
            let hits = Arc::clone(&hits);
            table.send_task(key, move || async move {
                hits.store(marker, Ordering::SeqCst);
            });
        }
        assert_eq!(table.len(), 1);

        let drained = table.drain();
        assert_eq!(drained.len(), 1);
        assert!(table.is_empty());

        futures::executor::block_on((drained.into_iter().next().unwrap().1)());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn drain_preserves_enqueue_order() {
        let table = DynamicTaskTable::new();
        for i in 0..8u64 {
            table.send_task(dynamic_task_key(i), || async {});
        }

        let drained = table.drain();
        let keys: Vec<u64> = drained.iter().map(|(key, _)| *key).collect();
        let expected: Vec<u64> = (0..8u64).map(dynamic_task_key).collect();
        assert_eq!(keys, expected);
    }

    #[test]
    fn task_key_is_stable_per_input() {
        let a = dynamic_task_key(("c1", "SyncPacket"));
        let b = dynamic_task_key(("c1", "SyncPacket"));
        let c = dynamic_task_key(("c2", "SyncPacket"));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn binding_resolves_parameters_once() {
        struct Counter(AtomicUsize);

        let mut registry = ServiceRegistry::new();
        registry.register(Arc::new(Counter(AtomicUsize::new(0))));

        let job = |counter: Arc<Counter>| async move {
            counter.0.fetch_add(1, Ordering::SeqCst);
        };
        let factory = job.bind(&registry).unwrap();

        factory().await;
        factory().await;

        let counter = registry.resolve::<Counter>().unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn binding_fails_for_missing_dependency() {
        struct Absent;
        let registry = ServiceRegistry::new();
        let job = |_absent: Arc<Absent>| async {};
        assert!(matches!(
            job.bind(&registry),
            Err(EngineError::UnresolvedDependency { .. })
        ));
    }
}
